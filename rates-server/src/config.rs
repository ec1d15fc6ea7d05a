use std::io;
use std::io::Cursor;
use std::path::Path;
use std::time::Duration;

const DEFAULT_INSTRUMENTS: &str = include_str!("../assets/instruments.txt");

pub(crate) const BIND_ADDR: &str = "0.0.0.0:5970";

/// Максимальное ожидание одной итерации цикла событий
pub(crate) const LOOP_TICK: Duration = Duration::from_millis(10);

/// То же, когда нет ни источника, ни клиентов
pub(crate) const IDLE_LOOP_TICK: Duration = Duration::from_millis(100);

/// Очередь тиков от потока источника к циклу событий
pub(crate) const FEED_QUEUE_CAPACITY: usize = 4096;

/// Сколько неотправленных байт держим на соединение, дальше - закрываем
pub(crate) const MAX_PENDING_OUTPUT: usize = 1 << 20;

/// Длина входящей строки без перевода строки, после которой буфер сбрасывается
pub(crate) const MAX_LINE_LEN: usize = 16 * 1024;

/// Таймаут тишины источника по умолчанию, секунды
pub(crate) const IDLE_SECS: u64 = 600;

/// Коды завершения процесса
pub(crate) const EXIT_CANNOT_CONNECT: u8 = 10;
pub(crate) const EXIT_IDLE: u8 = 11;

pub(crate) fn load_instruments(path: Option<&Path>) -> io::Result<Vec<String>> {
    match path {
        Some(p) => rates_core::instruments::read_instruments_from_path(p),
        None => rates_core::instruments::read_instruments(Cursor::new(DEFAULT_INSTRUMENTS)),
    }
}

pub(crate) type ConnId = u64;
