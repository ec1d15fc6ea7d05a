//! Состояние сервера курсов и обработчики протокола.
//!
//! Всё здесь выполняется в потоке цикла событий: таблица курсов и
//! подписки меняются только отсюда, поэтому без блокировок. Ответы
//! клиентам уходят через [`Outbox`], сам сервис сокетов не знает.

use crate::config::ConnId;
use crate::feed::RateLookup;
use crate::rate_table::{Quote, RateTable};
use crate::registry::{BroadcastStats, Subscriptions};
use log::{error, info, warn};
use rates_core::instruments::normalize_pair;
use rates_core::line_protocol::{Dispatch, Message, Speaker, Value};
use rates_core::protodef::{RATE_PROTOCOL, REG_PROTOCOL, RateMessage, RegMessage, TEXT_WIDTH};
use rates_core::tick::now_millis;
use rates_core::{DumpWriter, ProtocolSetupError, Tick};
use std::collections::HashSet;
use std::io;
use std::rc::Rc;

/// Куда сервис пишет строки для соединений
pub(crate) trait Outbox {
    /// Ставит строку в очередь соединения. false - соединения нет или оно закрывается.
    fn send_line(&mut self, conn: ConnId, line: &str) -> bool;
}

pub(crate) type ServerSpeaker = Speaker<RateMessage, RegMessage>;

pub(crate) fn server_speaker() -> Result<ServerSpeaker, ProtocolSetupError> {
    Speaker::new(&[&RATE_PROTOCOL], &[&REG_PROTOCOL])
}

pub(crate) struct RateService {
    speaker: Rc<ServerSpeaker>,
    rates: RateTable,
    subs: Subscriptions,
    sink: Option<DumpWriter>,
    upstream: Option<Box<dyn RateLookup>>,
    discard_ooo: bool,
    discarded: u64,
    sink_errors: u64,
    seen: HashSet<String>,
    new_instruments: Vec<String>,
    totals: BroadcastStats,
}

impl RateService {
    pub(crate) fn new() -> Result<Self, ProtocolSetupError> {
        Ok(Self {
            speaker: Rc::new(server_speaker()?),
            rates: RateTable::new(),
            subs: Subscriptions::new(),
            sink: None,
            upstream: None,
            discard_ooo: false,
            discarded: 0,
            sink_errors: 0,
            seen: HashSet::new(),
            new_instruments: Vec::new(),
            totals: BroadcastStats::default(),
        })
    }

    /// Все принятые тики дописываются в дампфайл
    pub(crate) fn with_sink(mut self, sink: DumpWriter) -> Self {
        self.sink = Some(sink);
        self
    }

    pub(crate) fn with_upstream(mut self, upstream: Box<dyn RateLookup>) -> Self {
        self.upstream = Some(upstream);
        self
    }

    pub(crate) fn discard_out_of_order(mut self, on: bool) -> Self {
        self.discard_ooo = on;
        self
    }

    pub(crate) fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Сколько тиков не удалось записать в дампфайл
    pub(crate) fn sink_errors(&self) -> u64 {
        self.sink_errors
    }

    pub(crate) fn totals(&self) -> BroadcastStats {
        self.totals
    }

    pub(crate) fn quote(&self, symbol: &str) -> Option<Quote> {
        self.rates.get(symbol)
    }

    pub(crate) fn instrument_count(&self) -> usize {
        self.rates.len()
    }

    /// Запоминает инструмент; впервые увиденный попадает в очередь
    /// [`Self::take_new_instruments`]
    pub(crate) fn note_instrument(&mut self, symbol: &str) {
        if !self.seen.contains(symbol) {
            self.seen.insert(symbol.to_string());
            self.new_instruments.push(symbol.to_string());
        }
    }

    /// Инструменты, увиденные впервые с прошлого вызова
    pub(crate) fn take_new_instruments(&mut self) -> Vec<String> {
        std::mem::take(&mut self.new_instruments)
    }

    /// Принимает тик: фильтр, запись в дампфайл, таблица, рассылка.
    ///
    /// `None` - тик отброшен как пришедший не по порядку. Ошибка записи
    /// в дампфайл только логируется и считается, тик всё равно рассылается.
    pub(crate) fn ingest<O: Outbox>(&mut self, tick: &Tick, out: &mut O) -> Option<BroadcastStats> {
        if self.discard_ooo
            && self
                .rates
                .get(&tick.symbol)
                .is_some_and(|q| q.timestamp > tick.update)
        {
            self.discarded += 1;
            return None;
        }

        if let Some(sink) = self.sink.as_mut() {
            // в файл пишется локальное время приёма, не время источника
            let arrival = now_millis().max(sink.last_arrival().unwrap_or(i64::MIN));
            let stored = Tick {
                arrival,
                ..tick.clone()
            };
            if let Err(e) = sink.append(&stored) {
                self.sink_errors += 1;
                error!(
                    "Cannot append {} to {}: {e}",
                    tick.symbol,
                    sink.path().display()
                );
            }
        }

        let quote = Quote {
            timestamp: tick.update,
            bid: tick.bid,
            ask: tick.ask,
        };
        self.rates.insert(&tick.symbol, quote);
        self.note_instrument(&tick.symbol);

        let mut stats = BroadcastStats::default();
        let notify = self.subs.notify_set(&tick.symbol);
        if notify.is_empty() {
            return Some(stats);
        }

        // кодируем один раз на всех подписчиков
        let line = match self.speaker.encode(RateMessage::Rate, &rate_args(&tick.symbol, quote)) {
            Ok(line) => line,
            Err(e) => {
                error!("Cannot encode rate for {}: {e}", tick.symbol);
                return Some(stats);
            }
        };
        for conn in notify {
            if out.send_line(conn, &line) {
                stats.sent += 1;
            } else {
                stats.dropped += 1;
            }
        }
        self.totals.add(stats);
        Some(stats)
    }

    /// Разбирает строку от соединения и вызывает обработчик.
    /// Ошибки разбора логируются, соединение живёт дальше.
    pub(crate) fn handle_line<O: Outbox>(&mut self, conn: ConnId, line: &[u8], out: &mut O) -> bool {
        let speaker = Rc::clone(&self.speaker);
        let mut session = Session {
            svc: self,
            conn,
            out,
        };
        speaker.line_received(line, &mut session)
    }

    /// Отключение: всегда снимаем все подписки
    pub(crate) fn disconnect(&mut self, conn: ConnId) {
        let removed = self.subs.unsubscribe_all(conn);
        info!("conn {conn}: disconnected, {removed} subscriptions removed");
    }

    /// Закрывает дампфайл; пустой файл удаляется
    pub(crate) fn close(self) -> io::Result<()> {
        if let Some(sink) = self.sink {
            let path = sink.path().to_path_buf();
            let written = sink.written();
            if sink.close_remove_empty()? {
                info!("Removed empty dumpfile {}", path.display());
            } else {
                info!("Appended {written} ticks to {}", path.display());
            }
            if self.sink_errors > 0 {
                warn!("{} ticks could not be written to {}", self.sink_errors, path.display());
            }
        }
        Ok(())
    }

    fn send<O: Outbox>(&self, out: &mut O, conn: ConnId, kind: RateMessage, args: &[Value]) -> bool {
        match self.speaker.encode(kind, args) {
            Ok(line) => out.send_line(conn, &line),
            Err(e) => {
                error!("conn {conn}: {e}");
                false
            }
        }
    }

    fn send_rate<O: Outbox>(&self, out: &mut O, conn: ConnId, symbol: &str, quote: Quote) -> bool {
        self.send(out, conn, RateMessage::Rate, &rate_args(symbol, quote))
    }

    fn send_decl<O: Outbox>(&self, out: &mut O, conn: ConnId, symbol: &str) -> bool {
        self.send(out, conn, RateMessage::DeclInstrument, &[symbol.into()])
    }

    fn send_error<O: Outbox>(&self, out: &mut O, conn: ConnId, msg: &str) -> bool {
        self.send(out, conn, RateMessage::Error, &[clip(msg).into()])
    }
}

fn rate_args(symbol: &str, q: Quote) -> [Value; 4] {
    [
        Value::Int(q.timestamp),
        symbol.into(),
        Value::Int(q.bid),
        Value::Int(q.ask),
    ]
}

// текстовые поля E/C фиксированной ширины
fn clip(s: &str) -> &str {
    s.get(..TEXT_WIDTH).unwrap_or(s)
}

/// Обработчики сообщений одного соединения
struct Session<'a, O> {
    svc: &'a mut RateService,
    conn: ConnId,
    out: &'a mut O,
}

impl<O: Outbox> Session<'_, O> {
    // нормализованный инструмент или ответ E
    fn instrument(&mut self, msg: &Message<RegMessage>) -> Option<String> {
        let raw = msg.text(0).unwrap_or("");
        let symbol = normalize_pair(raw);
        if symbol.is_empty() {
            warn!("conn {}: invalid instrument {raw:?} in {}", self.conn, msg.name);
            self.svc
                .send_error(self.out, self.conn, &format!("Invalid instrument: {raw:?}"));
            return None;
        }
        Some(symbol)
    }

    fn list_instruments(&mut self) {
        for symbol in self.svc.rates.symbols() {
            self.svc.send_decl(self.out, self.conn, symbol);
        }
        self.svc.send_decl(self.out, self.conn, "");
    }

    fn list_subscriptions(&mut self) {
        if self.svc.subs.is_global(self.conn) {
            return self.list_instruments();
        }
        for symbol in self.svc.subs.subscriptions_of(self.conn) {
            self.svc.send_decl(self.out, self.conn, symbol);
        }
        self.svc.send_decl(self.out, self.conn, "");
    }

    fn getrate(&mut self, symbol: &str) {
        let quote = match self.svc.rates.get(symbol) {
            Some(q) => q,
            None => match self.svc.upstream.as_ref().and_then(|u| u.fetch(symbol)) {
                Some(q) => {
                    self.svc.rates.insert(symbol, q);
                    q
                }
                None => Quote::default(),
            },
        };
        self.svc.send_rate(self.out, self.conn, symbol, quote);
    }

    fn getrateall(&mut self, txnid: i64) {
        for (symbol, quote) in self.svc.rates.iter() {
            self.svc.send_rate(self.out, self.conn, symbol, quote);
        }
        self.svc
            .send(self.out, self.conn, RateMessage::EndTxn, &[Value::Int(txnid)]);
    }

    fn help(&mut self) {
        let speaker = Rc::clone(&self.svc.speaker);
        speaker.line_help(|line| {
            self.svc
                .send(self.out, self.conn, RateMessage::Comment, &[clip(line).into()]);
        });
    }
}

impl<O: Outbox> Dispatch<RegMessage> for Session<'_, O> {
    fn dispatch(&mut self, msg: Message<RegMessage>) {
        let args: Vec<String> = msg.args.iter().map(ToString::to_string).collect();
        info!("conn {}: {}({})", self.conn, msg.name, args.join(", "));

        match msg.kind {
            RegMessage::ListInstruments => self.list_instruments(),
            RegMessage::Subscribe => {
                if let Some(symbol) = self.instrument(&msg) {
                    self.svc.subs.subscribe(self.conn, &symbol);
                    self.svc.note_instrument(&symbol);
                }
            }
            RegMessage::Unsubscribe => {
                if let Some(symbol) = self.instrument(&msg) {
                    if !self.svc.subs.unsubscribe(self.conn, &symbol) {
                        warn!("conn {}: not subscribed to {symbol}", self.conn);
                    }
                    self.svc.note_instrument(&symbol);
                }
            }
            RegMessage::SubscribeAll => {
                self.svc.subs.subscribe_all(self.conn);
            }
            RegMessage::UnsubscribeAll => {
                self.svc.subs.unsubscribe_all(self.conn);
            }
            RegMessage::ListSubscriptions => self.list_subscriptions(),
            RegMessage::GetRate => {
                if let Some(symbol) = self.instrument(&msg) {
                    self.svc.note_instrument(&symbol);
                    self.getrate(&symbol);
                }
            }
            RegMessage::GetRateAll => self.getrateall(msg.int(0).unwrap_or(0)),
            RegMessage::Help => self.help(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rates_core::price::float_to_scaled;
    use rates_core::{Codec, DetectConfig, open_dump};
    use std::collections::HashMap;

    const T0: i64 = 1_700_000_000_000;

    #[derive(Default)]
    struct RecordingOutbox {
        lines: HashMap<ConnId, Vec<String>>,
        closed: HashSet<ConnId>,
    }

    impl Outbox for RecordingOutbox {
        fn send_line(&mut self, conn: ConnId, line: &str) -> bool {
            if self.closed.contains(&conn) {
                return false;
            }
            self.lines.entry(conn).or_default().push(line.to_string());
            true
        }
    }

    impl RecordingOutbox {
        fn take(&mut self, conn: ConnId) -> Vec<Message<RateMessage>> {
            let client = Speaker::<RegMessage, RateMessage>::new(&[&REG_PROTOCOL], &[&RATE_PROTOCOL])
                .unwrap();
            self.lines
                .remove(&conn)
                .unwrap_or_default()
                .iter()
                .map(|l| client.decode(l.as_bytes()).unwrap())
                .collect()
        }
    }

    fn tick(ts: i64, symbol: &str, bid: f64, ask: f64) -> Tick {
        Tick::new(ts, symbol, float_to_scaled(bid), float_to_scaled(ask))
    }

    fn kinds(msgs: &[Message<RateMessage>]) -> Vec<RateMessage> {
        msgs.iter().map(|m| m.kind).collect()
    }

    struct FixedLookup;

    impl RateLookup for FixedLookup {
        fn fetch(&self, symbol: &str) -> Option<Quote> {
            (symbol == "GBP/USD").then_some(Quote {
                timestamp: T0,
                bid: 125_000_000,
                ask: 125_010_000,
            })
        }
    }

    #[test]
    fn subscribers_get_rates_and_getrateall_returns_latest() {
        let mut svc = RateService::new().unwrap();
        let mut out = RecordingOutbox::default();

        assert!(svc.handle_line(1, b"SEUR/USD\r\n", &mut out));
        assert!(svc.handle_line(2, b"SUSD/JPY\n", &mut out));

        svc.ingest(&tick(T0, "EUR/USD", 1.1700, 1.1702), &mut out);
        svc.ingest(&tick(T0 + 5, "EUR/USD", 1.1701, 1.1703), &mut out);

        let got = out.take(1);
        assert_eq!(kinds(&got), vec![RateMessage::Rate, RateMessage::Rate]);
        assert_eq!(got[0].int(2), Some(117_000_000));
        assert_eq!(got[1].int(2), Some(117_010_000));
        assert_eq!(got[1].int(0), Some(T0 + 5));
        assert_eq!(got[1].text(1), Some("EUR/USD"));
        assert!(out.take(2).is_empty());

        svc.handle_line(3, b"T      42", &mut out);
        let got = out.take(3);
        assert_eq!(kinds(&got), vec![RateMessage::Rate, RateMessage::EndTxn]);
        assert_eq!(got[0].int(2), Some(117_010_000));
        assert_eq!(got[1].int(0), Some(42));
    }

    #[test]
    fn global_subscriber_gets_everything_once() {
        let mut svc = RateService::new().unwrap();
        let mut out = RecordingOutbox::default();
        svc.handle_line(1, b"A", &mut out);
        svc.handle_line(1, b"SEUR/USD", &mut out);

        let st = svc
            .ingest(&tick(T0, "EUR/USD", 1.17, 1.1702), &mut out)
            .unwrap();
        svc.ingest(&tick(T0, "USD/JPY", 150.1, 150.12), &mut out);

        assert_eq!(st, BroadcastStats { sent: 1, dropped: 0 });
        assert_eq!(out.take(1).len(), 2);

        svc.handle_line(1, b"Z", &mut out);
        svc.ingest(&tick(T0 + 1, "EUR/USD", 1.17, 1.1702), &mut out);
        assert!(out.take(1).is_empty());
    }

    #[test]
    fn dropped_deliveries_are_counted() {
        let mut svc = RateService::new().unwrap();
        let mut out = RecordingOutbox::default();
        svc.handle_line(1, b"SEUR/USD", &mut out);
        svc.handle_line(2, b"A", &mut out);
        out.closed.insert(2);

        let st = svc
            .ingest(&tick(T0, "EUR/USD", 1.17, 1.1702), &mut out)
            .unwrap();
        assert_eq!(st, BroadcastStats { sent: 1, dropped: 1 });
        assert_eq!(svc.totals(), st);
    }

    #[test]
    fn out_of_order_ticks_are_discarded_when_enabled() {
        let mut svc = RateService::new().unwrap().discard_out_of_order(true);
        let mut out = RecordingOutbox::default();
        svc.handle_line(1, b"A", &mut out);

        for ts in [100, 200, 150, 300] {
            svc.ingest(&tick(ts, "EUR/USD", 1.17, 1.1702), &mut out);
        }
        let ts: Vec<i64> = out.take(1).iter().filter_map(|m| m.int(0)).collect();
        assert_eq!(ts, vec![100, 200, 300]);
        assert_eq!(svc.discarded(), 1);
        assert_eq!(svc.quote("EUR/USD").unwrap().timestamp, 300);

        let mut svc = RateService::new().unwrap();
        for ts in [100, 200, 150] {
            svc.ingest(&tick(ts, "EUR/USD", 1.17, 1.1702), &mut out);
        }
        assert_eq!(svc.discarded(), 0);
        assert_eq!(svc.quote("EUR/USD").unwrap().timestamp, 150);
    }

    #[test]
    fn list_instruments_ends_with_empty_declaration() {
        let mut svc = RateService::new().unwrap();
        let mut out = RecordingOutbox::default();
        svc.ingest(&tick(T0, "USD/JPY", 150.1, 150.12), &mut out);
        svc.ingest(&tick(T0, "EUR/USD", 1.17, 1.1702), &mut out);

        svc.handle_line(1, b"L", &mut out);
        let names: Vec<String> = out
            .take(1)
            .iter()
            .map(|m| m.text(0).unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["EUR/USD", "USD/JPY", ""]);
    }

    #[test]
    fn list_subscriptions_reports_own_or_all() {
        let mut svc = RateService::new().unwrap();
        let mut out = RecordingOutbox::default();
        svc.ingest(&tick(T0, "USD/JPY", 150.1, 150.12), &mut out);
        svc.ingest(&tick(T0, "EUR/USD", 1.17, 1.1702), &mut out);

        svc.handle_line(1, b"SUSD/JPY", &mut out);
        svc.handle_line(1, b"V", &mut out);
        let names: Vec<String> = out
            .take(1)
            .iter()
            .map(|m| m.text(0).unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["USD/JPY", ""]);

        svc.handle_line(2, b"A", &mut out);
        svc.handle_line(2, b"V", &mut out);
        assert_eq!(out.take(2).len(), 3);
    }

    #[test]
    fn getrate_uses_cache_upstream_or_zero() {
        let mut svc = RateService::new().unwrap();
        let mut out = RecordingOutbox::default();

        svc.handle_line(1, b"GEUR/USD", &mut out);
        let got = out.take(1);
        assert_eq!(got.len(), 1);
        assert_eq!((got[0].int(0), got[0].int(2), got[0].int(3)), (Some(0), Some(0), Some(0)));

        let mut svc = RateService::new()
            .unwrap()
            .with_upstream(Box::new(FixedLookup));
        svc.handle_line(1, b"G GBP/USD", &mut out);
        let got = out.take(1);
        assert_eq!(got[0].text(1), Some("GBP/USD"));
        assert_eq!(got[0].int(2), Some(125_000_000));
        // закэшировано
        assert_eq!(svc.quote("GBP/USD").unwrap().bid, 125_000_000);

        svc.ingest(&tick(T0 + 9, "GBP/USD", 1.26, 1.2601), &mut out);
        svc.handle_line(1, b"GGBP/USD", &mut out);
        assert_eq!(out.take(1)[0].int(2), Some(126_000_000));
    }

    #[test]
    fn invalid_instrument_gets_an_error_reply() {
        let mut svc = RateService::new().unwrap();
        let mut out = RecordingOutbox::default();

        svc.handle_line(1, b"Geurusd", &mut out);
        svc.handle_line(1, b"Sbogus", &mut out);
        let got = out.take(1);
        assert_eq!(kinds(&got), vec![RateMessage::Error, RateMessage::Error]);
        assert!(got[0].text(0).unwrap().contains("Invalid instrument"));
        assert!(svc.take_new_instruments().is_empty());
    }

    #[test]
    fn unsubscribe_of_non_member_is_harmless() {
        let mut svc = RateService::new().unwrap();
        let mut out = RecordingOutbox::default();

        assert!(svc.handle_line(1, b"UEUR/USD", &mut out));
        svc.handle_line(1, b"SUSD/JPY", &mut out);
        svc.handle_line(1, b"UEUR/USD", &mut out);

        svc.ingest(&tick(T0, "USD/JPY", 150.1, 150.12), &mut out);
        assert_eq!(out.take(1).len(), 1);
    }

    #[test]
    fn disconnect_removes_all_subscriptions() {
        let mut svc = RateService::new().unwrap();
        let mut out = RecordingOutbox::default();

        svc.disconnect(5);

        svc.handle_line(1, b"SEUR/USD", &mut out);
        svc.handle_line(1, b"A", &mut out);
        svc.disconnect(1);

        svc.ingest(&tick(T0, "EUR/USD", 1.17, 1.1702), &mut out);
        assert!(out.take(1).is_empty());
    }

    #[test]
    fn malformed_lines_do_not_stop_the_session() {
        let mut svc = RateService::new().unwrap();
        let mut out = RecordingOutbox::default();

        assert!(!svc.handle_line(1, b"", &mut out));
        assert!(!svc.handle_line(1, b"?", &mut out));
        assert!(!svc.handle_line(1, b"LLLL", &mut out));
        assert!(!svc.handle_line(1, b"Tabc", &mut out));
        assert!(!svc.handle_line(1, b"T", &mut out));
        assert!(out.take(1).is_empty());

        assert!(svc.handle_line(1, b"L", &mut out));
        assert_eq!(out.take(1).len(), 1);
    }

    #[test]
    fn help_is_sent_as_comments() {
        let mut svc = RateService::new().unwrap();
        let mut out = RecordingOutbox::default();

        svc.handle_line(1, b"H", &mut out);
        let got = out.take(1);
        assert!(got.len() > 20);
        assert!(got.iter().all(|m| m.kind == RateMessage::Comment));

        let text: Vec<&str> = got.iter().filter_map(|m| m.text(0)).collect();
        assert!(text.contains(&"   'S <instrument>'"));
        assert!(text.iter().any(|l| l.contains("getrateall:")));
        assert!(text.iter().any(|l| l.contains("decl_instrument:")));
    }

    #[test]
    fn new_instruments_are_reported_once() {
        let mut svc = RateService::new().unwrap();
        let mut out = RecordingOutbox::default();

        svc.handle_line(1, b"SEUR/USD", &mut out);
        svc.handle_line(2, b"SEUR/USD", &mut out);
        svc.handle_line(2, b"GUSD/JPY", &mut out);
        assert_eq!(svc.take_new_instruments(), vec!["EUR/USD", "USD/JPY"]);

        svc.ingest(&tick(T0, "EUR/USD", 1.17, 1.1702), &mut out);
        svc.ingest(&tick(T0, "AUD/USD", 0.65, 0.6501), &mut out);
        assert_eq!(svc.take_new_instruments(), vec!["AUD/USD"]);
        assert!(svc.take_new_instruments().is_empty());
    }

    #[test]
    fn accepted_ticks_are_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.dump");
        let sink = DumpWriter::open_for_append(&path, &DetectConfig::default()).unwrap();

        let mut svc = RateService::new()
            .unwrap()
            .with_sink(sink)
            .discard_out_of_order(true);
        let mut out = RecordingOutbox::default();
        let t0 = now_millis();
        for ts in [t0, t0 + 10, t0 + 5, t0 + 20] {
            svc.ingest(&tick(ts, "EUR/USD", 1.17, 1.1702), &mut out);
        }
        svc.close().unwrap();

        let mut dump = open_dump(&path, &DetectConfig::default()).unwrap();
        let got: Vec<i64> = dump.by_ref().map(|t| t.unwrap().update).collect();
        assert_eq!(got, vec![t0, t0 + 10, t0 + 20]);
    }

    #[test]
    fn stored_arrival_is_local_and_never_goes_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.dump");
        // последняя запись файла из будущего: часы отстают от файла
        let ahead = now_millis() + 100_000;
        let mut w = DumpWriter::open_for_append(&path, &DetectConfig::default()).unwrap();
        w.append(&tick(ahead, "EUR/USD", 1.17, 1.1702)).unwrap();
        drop(w);

        let sink = DumpWriter::open_for_append(&path, &DetectConfig::default()).unwrap();
        let mut svc = RateService::new().unwrap().with_sink(sink);
        let mut out = RecordingOutbox::default();
        let replayed = [ahead - 50_000, ahead - 40_000, ahead - 30_000];
        for ts in replayed {
            svc.ingest(&tick(ts, "EUR/USD", 1.17, 1.1702), &mut out);
        }
        svc.close().unwrap();

        let mut dump = open_dump(&path, &DetectConfig::default()).unwrap();
        let stored: Vec<Tick> = dump.by_ref().map(|t| t.unwrap()).collect();
        let arrivals: Vec<i64> = stored.iter().map(|t| t.arrival).collect();
        assert!(arrivals.windows(2).all(|w| w[0] <= w[1]), "{arrivals:?}");
        assert!(arrivals.iter().all(|&a| a >= ahead));
        let updates: Vec<i64> = stored.iter().map(|t| t.update).collect();
        assert_eq!(updates[1..], replayed);

        assert_eq!(dump.find_time(ahead).unwrap(), 0);
        assert_eq!(dump.find_time(arrivals[3] + 1).unwrap(), 4);
    }

    #[test]
    fn sink_failure_does_not_stop_the_broadcast() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pairs.dump");
        let sink =
            DumpWriter::open_with_preference(&path, &DetectConfig::default(), Codec::Raw24).unwrap();

        let mut svc = RateService::new().unwrap().with_sink(sink);
        let mut out = RecordingOutbox::default();
        svc.handle_line(1, b"A", &mut out);

        // raw24 хранит только пары вида AAA/BBB
        let st = svc.ingest(&tick(T0, "XAUUSD", 2400.0, 2400.5), &mut out).unwrap();
        assert_eq!(st, BroadcastStats { sent: 1, dropped: 0 });
        assert_eq!(svc.sink_errors(), 1);
        assert_eq!(svc.quote("XAUUSD").unwrap().timestamp, T0);

        svc.ingest(&tick(T0 + 1, "EUR/USD", 1.17, 1.1702), &mut out);
        assert_eq!(out.take(1).len(), 2);
        assert_eq!(svc.sink_errors(), 1);
        svc.close().unwrap();

        assert_eq!(std::fs::metadata(&path).unwrap().len(), 24);
    }

    #[test]
    fn empty_sink_is_removed_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unused.dump");
        let sink = DumpWriter::open_for_append(&path, &DetectConfig::default()).unwrap();

        RateService::new().unwrap().with_sink(sink).close().unwrap();
        assert!(!path.exists());
    }
}
