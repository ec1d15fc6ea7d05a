//! # rates-core
//!
//! Общая часть сервиса курсов (Rate Server / Rate Client).
//!
//! Этот крейт содержит:
//!
//! - [`price`] - цены в масштабированном целочисленном виде (`x * 10^8`)
//! - [`codec`] - бинарные форматы записи тика и их автоопределение
//! - [`dumpfile`] - чтение и дописывание дампфайлов (обычных, gzip, stdin)
//! - [`line_protocol`] - текстовый протокол с полями фиксированной ширины
//! - [`protodef`] - протоколы подписки и курсов
//! - [`instruments`] - нормализация и чтение списка инструментов
//! - [`error`] - типы ошибок
//!
//! ## Пример: тик через дампфайл в памяти
//!
//! ```rust
//! use rates_core::{Codec, DumpFile, Tick};
//! use rates_core::price::float_to_scaled;
//! use std::io::Cursor;
//!
//! let tick = Tick::new(1_700_000_000_000, "EUR/USD", float_to_scaled(1.17), float_to_scaled(1.1702));
//! let bytes = Codec::Raw32n.encode(&tick).unwrap();
//!
//! let mut dump = DumpFile::with_codec(Cursor::new(bytes), "mem", Codec::Raw32n);
//! assert_eq!(dump.record_count().unwrap(), 1);
//! assert_eq!(dump.next_tick().unwrap(), Some(tick));
//! ```
//!
//! ## Пример: строка протокола
//!
//! ```rust
//! use rates_core::line_protocol::{Speaker, Value};
//! use rates_core::protodef::{RATE_PROTOCOL, REG_PROTOCOL, RateMessage, RegMessage};
//!
//! let client = Speaker::<RegMessage, RateMessage>::new(&[&REG_PROTOCOL], &[&RATE_PROTOCOL]).unwrap();
//! let line = client.encode(RegMessage::Subscribe, &[Value::from("EUR/USD")]).unwrap();
//! assert_eq!(line, "SEUR/USD ");
//! ```
//!
//! ## Дизайн
//!
//! Здесь нет потоков и сети: только типы, форматы и разбор. Цикл событий,
//! подписки и источники данных живут в `rates-server`.

#![forbid(unsafe_code)]

/// Масштабированные цены.
pub mod price;

/// Тик.
pub mod tick;

/// Бинарные форматы записей.
pub mod codec;

/// Дампфайлы.
pub mod dumpfile;

/// Gzip-источник для дампфайлов.
pub mod gzfile;

/// Несикаемые потоки с кэшем начала.
pub mod lookahead;

/// Текстовый протокол фиксированной ширины.
pub mod line_protocol;

/// Справка по протоколам.
pub mod protocol_doc;

/// Протоколы сервиса курсов.
pub mod protodef;

/// Инструменты.
pub mod instruments;

/// Ошибки `rates-core`.
pub mod error;

/// Общие константы
mod constants;
pub use constants::{DEFAULT_VENUE, HEAD_CACHE_SIZE};

// --- Re-exports (публичный фасад API) ---

pub use crate::codec::{Codec, DetectConfig, detect_codec};
pub use crate::dumpfile::{BoxedSource, DumpFile, DumpSource, DumpWriter, open_dump};
pub use crate::error::{
    DumpError, EncodeError, FormatError, LineError, ProtocolSetupError, RatesCoreError,
};
pub use crate::tick::Tick;
