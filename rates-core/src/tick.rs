use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::constants::DEFAULT_VENUE;
use crate::price::scaled_to_float;

/// Одно наблюдение bid/ask по инструменту.
///
/// `arrival` - время получения у нас (монотонно по всему потоку),
/// `update` - время от источника (бывает не по порядку).
/// Цены в масштабированном виде, см. [`crate::price`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tick {
    pub arrival: i64,
    pub update: i64,
    pub venue: u8,
    pub symbol: String,
    pub bid: i64,
    pub ask: i64,
}

impl Tick {
    /// Тик с одинаковыми метками arrival/update и площадкой по умолчанию
    pub fn new(timestamp: i64, symbol: impl Into<String>, bid: i64, ask: i64) -> Self {
        Self {
            arrival: timestamp,
            update: timestamp,
            venue: DEFAULT_VENUE,
            symbol: symbol.into(),
            bid,
            ask,
        }
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} bid={:.5} ask={:.5} arrival={}",
            self.update,
            self.venue as char,
            self.symbol,
            scaled_to_float(self.bid),
            scaled_to_float(self.ask),
            self.arrival
        )
    }
}

/// Текущее время в миллисекундах от эпохи
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
