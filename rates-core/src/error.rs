use std::io;

use thiserror::Error;

/// Верхнеуровневый тип ошибок крейта
#[derive(Debug, Error)]
pub enum RatesCoreError {
    /// Ошибки бинарных кодеков
    #[error(transparent)]
    Format(#[from] FormatError),

    /// Ошибки дампфайла
    #[error(transparent)]
    Dump(#[from] DumpError),

    /// Ошибки сборки протокола (фатальные, до старта сервиса)
    #[error(transparent)]
    ProtocolSetup(#[from] ProtocolSetupError),

    /// Ошибки разбора входящих строк
    #[error(transparent)]
    Line(#[from] LineError),

    /// Ошибки кодирования исходящих строк
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// Ошибки бинарных кодеков тиков
#[derive(Debug, Error)]
pub enum FormatError {
    /// Неизвестное имя кодека
    #[error("unknown codec: {0:?}")]
    UnknownCodec(String),

    /// Автоопределение не нашло подходящего кодека
    #[error("could not detect dumpfile encoding")]
    Undetectable,

    /// Длина записи не совпадает с размером кодека
    #[error("{codec}: record must be {expected} bytes, got {got}")]
    RecordLength {
        codec: &'static str,
        expected: usize,
        got: usize,
    },

    /// Временная метка <= 0
    #[error("{codec}: invalid {field} timestamp {value}")]
    BadTimestamp {
        codec: &'static str,
        field: &'static str,
        value: i64,
    },

    /// Цена <= 0
    #[error("{codec}: invalid {field} price {value}")]
    BadPrice {
        codec: &'static str,
        field: &'static str,
        value: i64,
    },

    /// Инструмент нельзя разложить на BASE/QUOTE
    #[error("{codec}: cannot encode symbol {symbol:?}")]
    BadSymbol { codec: &'static str, symbol: String },
}

/// Ошибки дампфайла
#[derive(Debug, Error)]
pub enum DumpError {
    /// Ошибки ввода-вывода
    #[error("dumpfile io error: {0}")]
    Io(#[from] io::Error),

    /// Ошибки формата записей
    #[error(transparent)]
    Format(#[from] FormatError),

    /// Позиция чтения не кратна размеру записи
    #[error("position {position} is not a multiple of record size {record_size}")]
    Misaligned { position: u64, record_size: usize },

    /// Обрезанная запись посреди чтения
    #[error("truncated record at index {index}: {got} of {expected} bytes")]
    TruncatedRecord {
        index: u64,
        got: usize,
        expected: usize,
    },

    /// Источник не умеет сообщать свой размер
    #[error("size of {0} cannot be determined")]
    UnknownLength(String),
}

/// Ошибки сборки таблиц протокола
#[derive(Debug, Error)]
pub enum ProtocolSetupError {
    /// Повтор имени сообщения в одном направлении
    #[error("collision in {direction} protocol names: {name}")]
    DuplicateName {
        direction: &'static str,
        name: &'static str,
    },

    /// Два принимаемых сообщения с одним кодом
    #[error("collision in receive codes: {code:?} used by {first} and {second}")]
    DuplicateCode {
        code: char,
        first: &'static str,
        second: &'static str,
    },
}

/// Ошибки разбора входящей строки (соединение при этом живёт дальше)
#[derive(Debug, Error)]
pub enum LineError {
    /// Пустая строка
    #[error("empty line")]
    Empty,

    /// Неизвестный код сообщения
    #[error("unknown message: {0:?}")]
    UnknownCode(String),

    /// Строка длиннее, чем положено сообщению
    #[error("invalid message length, expecting {expected}, got {got}: {line:?}")]
    TooLong {
        expected: usize,
        got: usize,
        line: String,
    },

    /// Пустое обязательное поле
    #[error("incomplete message, field {field} is empty: {line:?}")]
    Incomplete { field: &'static str, line: String },

    /// Числовое поле не разбирается
    #[error("field {field} is not an integer: {value:?}")]
    BadInteger { field: &'static str, value: String },
}

/// Ошибки кодирования исходящего сообщения
#[derive(Debug, Error)]
pub enum EncodeError {
    /// Сообщение не входит в таблицу отправки
    #[error("message {0} is not in the send table")]
    NotInSendTable(String),

    /// Неверное число аргументов
    #[error("{message}() takes exactly {expected} arguments ({given} given)")]
    ArgumentCount {
        message: &'static str,
        expected: usize,
        given: usize,
    },

    /// Неверный тип аргумента
    #[error("{message}(): field {field} expects {expected}")]
    ArgumentType {
        message: &'static str,
        field: &'static str,
        expected: &'static str,
    },

    /// Значение не влезает в ширину поля
    #[error("{message}() could not be encoded in {width} bytes: {line:?}")]
    Overflow {
        message: &'static str,
        width: usize,
        line: String,
    },
}
