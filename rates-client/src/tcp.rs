use log::{debug, info, warn};
use rates_core::ProtocolSetupError;
use rates_core::line_protocol::{Dispatch, Message, Speaker, Value};
use rates_core::price::scaled_to_float;
use rates_core::protodef::{RATE_PROTOCOL, REG_PROTOCOL, RateMessage, RegMessage};
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;

use crate::instruments::Request;

const TCP_CONNECT_TIMEOUT_S: u64 = 5;
const TCP_WRITE_TIMEOUT_S: u64 = 5;
const TICK_RATE_MS: u64 = 200;

pub(crate) type ClientSpeaker = Speaker<RegMessage, RateMessage>;

pub(crate) fn client_speaker() -> Result<ClientSpeaker, ProtocolSetupError> {
    Speaker::new(&[&REG_PROTOCOL], &[&RATE_PROTOCOL])
}

pub(crate) fn connect(addr: SocketAddr) -> anyhow::Result<TcpStream> {
    let stream = TcpStream::connect_timeout(&addr, Duration::from_secs(TCP_CONNECT_TIMEOUT_S))?;
    stream.set_nodelay(true).ok();
    stream
        .set_read_timeout(Some(Duration::from_millis(TICK_RATE_MS)))
        .ok();
    stream
        .set_write_timeout(Some(Duration::from_secs(TCP_WRITE_TIMEOUT_S)))
        .ok();
    Ok(stream)
}

/// Отправляет регистрационные сообщения запроса
pub(crate) fn send_request<W: Write>(
    out: &mut W,
    speaker: &ClientSpeaker,
    request: &Request,
) -> anyhow::Result<()> {
    let mut lines = Vec::new();
    match request {
        Request::Subscribe(list) => {
            for symbol in list {
                lines.push(speaker.encode(RegMessage::Subscribe, &[symbol.as_str().into()])?);
            }
        }
        Request::SubscribeAll => lines.push(speaker.encode(RegMessage::SubscribeAll, &[])?),
        Request::Snapshot(txnid) => {
            lines.push(speaker.encode(RegMessage::GetRateAll, &[Value::Int(*txnid)])?)
        }
    }

    for line in lines {
        debug!("-> {line}");
        out.write_all(line.as_bytes())?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

/// Печатает курсы; в режиме снимка ждёт маркер конца транзакции
pub(crate) struct Printer<W: Write> {
    out: W,
    wait_txn: Option<i64>,
    done: bool,
    rates: u64,
}

impl<W: Write> Printer<W> {
    pub(crate) fn new(out: W, wait_txn: Option<i64>) -> Self {
        Self {
            out,
            wait_txn,
            done: false,
            rates: 0,
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        self.done
    }

    pub(crate) fn rates(&self) -> u64 {
        self.rates
    }
}

impl<W: Write> Dispatch<RateMessage> for Printer<W> {
    fn dispatch(&mut self, msg: Message<RateMessage>) {
        match msg.kind {
            RateMessage::Rate => {
                let ts = msg.int(0).unwrap_or(0);
                let symbol = msg.text(1).unwrap_or("");
                let bid = scaled_to_float(msg.int(2).unwrap_or(0));
                let ask = scaled_to_float(msg.int(3).unwrap_or(0));
                self.rates += 1;
                if let Err(e) = writeln!(self.out, "{ts} {symbol} bid={bid:.5} ask={ask:.5}") {
                    warn!("cannot print rate: {e}");
                }
            }
            RateMessage::DeclInstrument => match msg.text(0) {
                Some("") | None => debug!("end of instrument list"),
                Some(symbol) => info!("instrument {symbol}"),
            },
            RateMessage::EndTxn => {
                let txnid = msg.int(0).unwrap_or(0);
                debug!("end of transaction {txnid}");
                if self.wait_txn == Some(txnid) {
                    self.done = true;
                }
            }
            RateMessage::Error => warn!("server error: {}", msg.text(0).unwrap_or("")),
            RateMessage::Comment => info!("{}", msg.text(0).unwrap_or("")),
        }
    }
}

/// Читает строки сервера до закрытия соединения, Ctrl+C или конца снимка.
/// Возвращает число напечатанных курсов.
pub(crate) fn run_session<R: Read, W: Write>(
    input: R,
    speaker: &ClientSpeaker,
    printer: &mut Printer<W>,
    shutdown: Arc<AtomicBool>,
) -> anyhow::Result<u64> {
    let mut reader = BufReader::new(input);
    let mut line = Vec::new();

    while !shutdown.load(Ordering::Relaxed) && !printer.is_done() {
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => {
                info!("server closed connection");
                break;
            }
            Ok(_) if line.ends_with(b"\n") => {
                speaker.line_received(&line, printer);
                line.clear();
            }
            // хвост без перевода строки перед закрытием
            Ok(_) => continue,
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(printer.rates())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::net::TcpListener;
    use std::thread;

    const RATE: &str = "R   1700000000000EUR/USD        117000000       117020000\n";

    fn speaker() -> ClientSpeaker {
        client_speaker().unwrap()
    }

    #[test]
    fn request_lines() {
        let sp = speaker();
        let mut out = Vec::new();
        send_request(
            &mut out,
            &sp,
            &Request::Subscribe(vec!["EUR/USD".to_string(), "USD/JPY".to_string()]),
        )
        .unwrap();
        send_request(&mut out, &sp, &Request::SubscribeAll).unwrap();
        send_request(&mut out, &sp, &Request::Snapshot(7)).unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "SEUR/USD \nSUSD/JPY \nA\nT       7\n"
        );
    }

    #[test]
    fn printer_formats_rates_and_ignores_noise() {
        let sp = speaker();
        let mut printer = Printer::new(Vec::new(), None);
        let input = format!("{RATE}C hello\nIEUR/USD \nE oops\n\nZ what\n");

        let n = run_session(
            Cursor::new(input),
            &sp,
            &mut printer,
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap();

        assert_eq!(n, 1);
        assert_eq!(
            String::from_utf8(printer.out).unwrap(),
            "1700000000000 EUR/USD bid=1.17000 ask=1.17020\n"
        );
    }

    #[test]
    fn snapshot_stops_at_matching_end_marker() {
        let sp = speaker();
        let mut printer = Printer::new(Vec::new(), Some(1));
        let input = format!("{RATE}X       2\n{RATE}X       1\n{RATE}");

        let n = run_session(
            Cursor::new(input),
            &sp,
            &mut printer,
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap();
        assert_eq!(n, 2);
        assert!(printer.is_done());
    }

    #[test]
    fn session_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(sock.try_clone().unwrap());
            let mut req = String::new();
            reader.read_line(&mut req).unwrap();
            assert_eq!(req, "T       1\n");

            sock.write_all(RATE.as_bytes()).unwrap();
            sock.write_all(b"X       1\n").unwrap();
        });

        let sp = speaker();
        let mut stream = connect(addr).unwrap();
        send_request(&mut stream, &sp, &Request::Snapshot(1)).unwrap();

        let mut printer = Printer::new(Vec::new(), Some(1));
        let n = run_session(stream, &sp, &mut printer, Arc::new(AtomicBool::new(false))).unwrap();
        assert_eq!(n, 1);
        assert!(printer.is_done());
        server.join().unwrap();
    }
}
