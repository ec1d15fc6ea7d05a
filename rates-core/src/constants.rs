/// Площадка по умолчанию (для форматов без поля venue)
pub const DEFAULT_VENUE: u8 = b'O';

/// Порог автоопределения: максимальный разброс временных меток (3 часа, мс)
pub const DETECT_MAX_TIME_GAP_MS: i64 = 3 * 3600 * 1000;

/// Порог автоопределения: максимальный относительный спред
pub const DETECT_MAX_SPREAD_RATIO: f64 = 0.02;

/// Сколько байт начала потока кэшируем для несикаемых источников (stdin)
pub const HEAD_CACHE_SIZE: usize = 512;
