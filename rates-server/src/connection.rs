use crate::config::{ConnId, MAX_LINE_LEN, MAX_PENDING_OUTPUT};
use log::{error, warn};
use std::io::{self, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};

const READ_CHUNK: usize = 4096;

/// Состояние чтения из сокета
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadStatus {
    Open,
    Eof,
}

/// Неблокирующее TCP-соединение с буферами строк.
///
/// Входящие байты режутся на строки по `\n`, исходящие строки копятся
/// и уходят в [`Connection::flush`]. Если клиент не успевает читать и
/// очередь превышает [`MAX_PENDING_OUTPUT`], соединение помечается на закрытие.
pub(crate) struct Connection {
    id: ConnId,
    stream: TcpStream,
    peer: SocketAddr,
    inbuf: Vec<u8>,
    outbuf: Vec<u8>,
    closing: bool,
}

impl Connection {
    pub(crate) fn new(id: ConnId, stream: TcpStream, peer: SocketAddr) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true).ok();
        Ok(Self {
            id,
            stream,
            peer,
            inbuf: Vec::new(),
            outbuf: Vec::new(),
            closing: false,
        })
    }

    pub(crate) fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.closing
    }

    pub(crate) fn close(&mut self) {
        self.closing = true;
    }

    pub(crate) fn pending_output(&self) -> usize {
        self.outbuf.len()
    }

    /// Читает всё, что есть в сокете, не блокируясь
    pub(crate) fn read_available(&mut self) -> io::Result<ReadStatus> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return Ok(ReadStatus::Eof),
                Ok(n) => self.inbuf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(ReadStatus::Open),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Забирает полные строки (с терминатором) из входного буфера
    pub(crate) fn take_lines(&mut self) -> Vec<Vec<u8>> {
        let mut lines = Vec::new();
        while let Some(pos) = self.inbuf.iter().position(|&b| b == b'\n') {
            lines.push(self.inbuf.drain(..=pos).collect());
        }
        if self.inbuf.len() > MAX_LINE_LEN {
            error!(
                "conn {}: dropping {} bytes without a line terminator",
                self.id,
                self.inbuf.len()
            );
            self.inbuf.clear();
        }
        lines
    }

    /// Ставит строку в очередь на отправку. false - соединение закрывается.
    pub(crate) fn queue_line(&mut self, line: &str) -> bool {
        if self.closing {
            return false;
        }
        self.outbuf.extend_from_slice(line.as_bytes());
        self.outbuf.push(b'\n');
        if self.outbuf.len() > MAX_PENDING_OUTPUT {
            warn!(
                "conn {} ({}): {} bytes pending, closing slow consumer",
                self.id,
                self.peer,
                self.outbuf.len()
            );
            self.closing = true;
        }
        true
    }

    /// Пишет сколько получится, не блокируясь
    pub(crate) fn flush(&mut self) -> io::Result<()> {
        let mut written = 0;
        while written < self.outbuf.len() {
            match self.stream.write(&self.outbuf[written..]) {
                Ok(0) => return Err(io::Error::from(ErrorKind::WriteZero)),
                Ok(n) => written += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        self.outbuf.drain(..written);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;
    use std::time::{Duration, Instant};

    fn connect_pair() -> (TcpStream, Connection) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let client = TcpStream::connect(addr).unwrap();
        let (server, peer) = listener.accept().unwrap();

        (client, Connection::new(1, server, peer).unwrap())
    }

    // ждём, пока данные дойдут через loopback
    fn read_until<F: Fn(&Connection) -> bool>(conn: &mut Connection, ready: F) -> ReadStatus {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let st = conn.read_available().unwrap();
            if st == ReadStatus::Eof || ready(conn) || Instant::now() > deadline {
                return st;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn splits_input_into_lines_and_keeps_partial_tail() {
        let (mut client, mut conn) = connect_pair();
        client.write_all(b"SEUR/USD\r\nL\nSUS").unwrap();

        read_until(&mut conn, |c| c.inbuf.len() >= 15);
        let lines = conn.take_lines();
        assert_eq!(lines, vec![b"SEUR/USD\r\n".to_vec(), b"L\n".to_vec()]);
        assert_eq!(conn.inbuf, b"SUS");

        client.write_all(b"D/JPY\n").unwrap();
        read_until(&mut conn, |c| c.inbuf.contains(&b'\n'));
        assert_eq!(conn.take_lines(), vec![b"SUSD/JPY\n".to_vec()]);
    }

    #[test]
    fn overlong_unterminated_input_is_dropped() {
        let (mut client, mut conn) = connect_pair();
        client.write_all(&vec![b'x'; MAX_LINE_LEN + 10]).unwrap();

        read_until(&mut conn, |c| c.inbuf.len() > MAX_LINE_LEN);
        assert!(conn.take_lines().is_empty());
        assert!(conn.inbuf.is_empty());
    }

    #[test]
    fn eof_is_reported() {
        let (client, mut conn) = connect_pair();
        drop(client);
        assert_eq!(read_until(&mut conn, |_| false), ReadStatus::Eof);
    }

    #[test]
    fn queued_lines_are_flushed_with_newlines() {
        let (mut client, mut conn) = connect_pair();
        assert!(conn.queue_line("I        "));
        assert!(conn.queue_line("X      42"));
        conn.flush().unwrap();
        assert_eq!(conn.pending_output(), 0);

        client
            .set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();
        let mut buf = [0u8; 20];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"I        \nX      42\n");
    }

    #[test]
    fn slow_consumer_is_marked_for_closing() {
        let (_client, mut conn) = connect_pair();
        let line = "C".repeat(81);
        let mut accepted = 0;
        while conn.queue_line(&line) {
            accepted += 1;
        }
        assert!(conn.is_closing());
        assert!(accepted > MAX_PENDING_OUTPUT / 82);
        assert!(!conn.queue_line("X"));
    }
}
