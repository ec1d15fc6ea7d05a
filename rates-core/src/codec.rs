//! Бинарные форматы записи тика.
//!
//! Все форматы big-endian и фиксированного размера. 48-битные поля
//! хранятся парой (high:u16, low:u32), см. [`crate::price::split48`].
//!
//! ```text
//! raw24   ts:6  base:3 quote:3          bid:6 ask:6
//! raw32   ts:8  venue:1 symbol:7        bid:8 ask:8
//! raw40   arrival:8 update:8 venue:1 symbol:7 bid:8 ask:8
//! raw32n  arrival:6 update:6 venue:1 symbol:7 bid:6 ask:6
//! ```
//!
//! В raw24/raw32 одна метка времени (update); при декодировании она
//! дублируется в `arrival`.

use std::fmt;
use std::str::FromStr;

use byteorder::{BigEndian, ByteOrder};

use crate::constants::{DEFAULT_VENUE, DETECT_MAX_SPREAD_RATIO, DETECT_MAX_TIME_GAP_MS};
use crate::error::FormatError;
use crate::price::{join48, split48};
use crate::tick::Tick;

const SYMBOL_LEN: usize = 7;
const CCY_LEN: usize = 3;

/// Формат записи дампфайла
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Codec {
    Raw24,
    Raw32,
    Raw40,
    #[default]
    Raw32n,
}

impl Codec {
    /// Все форматы
    pub const ALL: [Codec; 4] = [Codec::Raw24, Codec::Raw32, Codec::Raw40, Codec::Raw32n];

    /// Порядок перебора при автоопределении
    pub const DETECTION_ORDER: [Codec; 4] =
        [Codec::Raw32n, Codec::Raw40, Codec::Raw32, Codec::Raw24];

    /// Размер самой длинной записи
    pub const MAX_RECORD_SIZE: usize = 40;

    pub fn name(self) -> &'static str {
        match self {
            Codec::Raw24 => "raw24",
            Codec::Raw32 => "raw32",
            Codec::Raw40 => "raw40",
            Codec::Raw32n => "raw32n",
        }
    }

    pub fn record_size(self) -> usize {
        match self {
            Codec::Raw24 => 24,
            Codec::Raw32 | Codec::Raw32n => 32,
            Codec::Raw40 => 40,
        }
    }

    /// Кодирует тик ровно в `record_size()` байт
    pub fn encode(self, tick: &Tick) -> Result<Vec<u8>, FormatError> {
        let mut w = RecordWriter::new(self.record_size());
        match self {
            Codec::Raw24 => {
                let (base, quote) =
                    tick.symbol
                        .split_once('/')
                        .ok_or_else(|| FormatError::BadSymbol {
                            codec: self.name(),
                            symbol: tick.symbol.clone(),
                        })?;
                w.put_48(tick.update);
                w.put_padded(base.as_bytes(), CCY_LEN);
                w.put_padded(quote.as_bytes(), CCY_LEN);
                w.put_48(tick.bid);
                w.put_48(tick.ask);
            }
            Codec::Raw32 => {
                w.put_i64(tick.update);
                w.put_u8(tick.venue);
                w.put_padded(tick.symbol.as_bytes(), SYMBOL_LEN);
                w.put_i64(tick.bid);
                w.put_i64(tick.ask);
            }
            Codec::Raw40 => {
                w.put_i64(tick.arrival);
                w.put_i64(tick.update);
                w.put_u8(tick.venue);
                w.put_padded(tick.symbol.as_bytes(), SYMBOL_LEN);
                w.put_i64(tick.bid);
                w.put_i64(tick.ask);
            }
            Codec::Raw32n => {
                w.put_48(tick.arrival);
                w.put_48(tick.update);
                w.put_u8(tick.venue);
                w.put_padded(tick.symbol.as_bytes(), SYMBOL_LEN);
                w.put_48(tick.bid);
                w.put_48(tick.ask);
            }
        }
        Ok(w.finish())
    }

    /// Декодирует одну запись, проверяя длину и знаки полей
    pub fn decode(self, record: &[u8]) -> Result<Tick, FormatError> {
        self.check_len(record)?;
        let mut r = RecordReader::new(record);
        let tick = match self {
            Codec::Raw24 => {
                let ts = r.get_48();
                let base = r.get_text(CCY_LEN);
                let quote = r.get_text(CCY_LEN);
                Tick {
                    arrival: ts,
                    update: ts,
                    venue: DEFAULT_VENUE,
                    symbol: format!("{base}/{quote}"),
                    bid: r.get_48(),
                    ask: r.get_48(),
                }
            }
            Codec::Raw32 => {
                let ts = r.get_i64();
                Tick {
                    arrival: ts,
                    update: ts,
                    venue: r.get_u8(),
                    symbol: r.get_text(SYMBOL_LEN),
                    bid: r.get_i64(),
                    ask: r.get_i64(),
                }
            }
            Codec::Raw40 => Tick {
                arrival: r.get_i64(),
                update: r.get_i64(),
                venue: r.get_u8(),
                symbol: r.get_text(SYMBOL_LEN),
                bid: r.get_i64(),
                ask: r.get_i64(),
            },
            Codec::Raw32n => Tick {
                arrival: r.get_48(),
                update: r.get_48(),
                venue: r.get_u8(),
                symbol: r.get_text(SYMBOL_LEN),
                bid: r.get_48(),
                ask: r.get_48(),
            },
        };
        self.validate(tick)
    }

    /// Читает только arrival-метку записи, без остальных проверок.
    /// Нужно для бинарного поиска по времени.
    pub fn arrival_of(self, record: &[u8]) -> Result<i64, FormatError> {
        self.check_len(record)?;
        let mut r = RecordReader::new(record);
        Ok(match self {
            Codec::Raw24 | Codec::Raw32n => r.get_48(),
            Codec::Raw32 | Codec::Raw40 => r.get_i64(),
        })
    }

    fn check_len(self, record: &[u8]) -> Result<(), FormatError> {
        if record.len() != self.record_size() {
            return Err(FormatError::RecordLength {
                codec: self.name(),
                expected: self.record_size(),
                got: record.len(),
            });
        }
        Ok(())
    }

    fn validate(self, tick: Tick) -> Result<Tick, FormatError> {
        for (field, value) in [("arrival", tick.arrival), ("update", tick.update)] {
            if value <= 0 {
                return Err(FormatError::BadTimestamp {
                    codec: self.name(),
                    field,
                    value,
                });
            }
        }
        for (field, value) in [("bid", tick.bid), ("ask", tick.ask)] {
            if value <= 0 {
                return Err(FormatError::BadPrice {
                    codec: self.name(),
                    field,
                    value,
                });
            }
        }
        Ok(tick)
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Codec {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Codec::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| FormatError::UnknownCodec(s.to_string()))
    }
}

/// Пороги проверки правдоподобия при автоопределении
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectConfig {
    /// Максимальная разница между метками времени, мс
    pub max_time_gap_ms: i64,
    /// Максимальный относительный спред `(ask - bid) / (ask + bid)`
    pub max_spread_ratio: f64,
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self {
            max_time_gap_ms: DETECT_MAX_TIME_GAP_MS,
            max_spread_ratio: DETECT_MAX_SPREAD_RATIO,
        }
    }
}

impl DetectConfig {
    /// Похожи ли две соседние записи на настоящие данные
    pub fn plausible(&self, a: &Tick, b: &Tick) -> bool {
        let gap = self.max_time_gap_ms;
        if (b.arrival - a.arrival).abs() > gap || (b.update - a.update).abs() > gap {
            return false;
        }
        if (a.arrival - a.update).abs() > gap || (b.arrival - b.update).abs() > gap {
            return false;
        }
        if !a.symbol.contains('/') || !b.symbol.contains('/') {
            return false;
        }
        // сумма цен может переполниться на мусоре
        [a, b].iter().all(|t| match t.ask.checked_add(t.bid) {
            Some(sum) => ((t.ask - t.bid) as f64 / sum as f64) < self.max_spread_ratio,
            None => false,
        })
    }
}

/// Определяет формат по началу данных (обычно первые `2 * MAX_RECORD_SIZE` байт).
///
/// Для каждого кандидата декодируются две первые записи; кандидат без двух
/// целых записей в `head` пропускается.
pub fn detect_codec(head: &[u8], cfg: &DetectConfig) -> Option<Codec> {
    Codec::DETECTION_ORDER.into_iter().find(|codec| {
        let size = codec.record_size();
        if head.len() < 2 * size {
            return false;
        }
        match (codec.decode(&head[..size]), codec.decode(&head[size..2 * size])) {
            (Ok(a), Ok(b)) => cfg.plausible(&a, &b),
            _ => false,
        }
    })
}

struct RecordWriter {
    buf: Vec<u8>,
    pos: usize,
}

impl RecordWriter {
    fn new(size: usize) -> Self {
        Self {
            buf: vec![0; size],
            pos: 0,
        }
    }

    fn put_u8(&mut self, v: u8) {
        self.buf[self.pos] = v;
        self.pos += 1;
    }

    fn put_i64(&mut self, v: i64) {
        BigEndian::write_i64(&mut self.buf[self.pos..self.pos + 8], v);
        self.pos += 8;
    }

    fn put_48(&mut self, v: i64) {
        let (high, low) = split48(v);
        BigEndian::write_u16(&mut self.buf[self.pos..self.pos + 2], high);
        BigEndian::write_u32(&mut self.buf[self.pos + 2..self.pos + 6], low);
        self.pos += 6;
    }

    // как struct "Ns": обрезаем или добиваем нулями
    fn put_padded(&mut self, bytes: &[u8], width: usize) {
        let n = bytes.len().min(width);
        self.buf[self.pos..self.pos + n].copy_from_slice(&bytes[..n]);
        self.pos += width;
    }

    fn finish(self) -> Vec<u8> {
        debug_assert_eq!(self.pos, self.buf.len());
        self.buf
    }
}

struct RecordReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> RecordReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> &'a [u8] {
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        s
    }

    fn get_u8(&mut self) -> u8 {
        self.take(1)[0]
    }

    fn get_i64(&mut self) -> i64 {
        BigEndian::read_i64(self.take(8))
    }

    fn get_48(&mut self) -> i64 {
        let high = BigEndian::read_u16(self.take(2));
        let low = BigEndian::read_u32(self.take(4));
        join48(high, low)
    }

    fn get_text(&mut self, width: usize) -> String {
        let raw = self.take(width);
        String::from_utf8_lossy(raw)
            .trim_end_matches(['\0', ' '])
            .to_string()
    }
}
