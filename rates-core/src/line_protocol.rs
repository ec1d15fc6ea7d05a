//! Текстовый протокол с полями фиксированной ширины.
//!
//! Сообщение - одна строка: байт-код, затем поля в объявленном порядке.
//! Целые выравниваются вправо, текст - влево и добивается пробелами.
//! Длина строки всегда `1 + сумма ширин полей`.
//!
//! Протокол описывается статической таблицей [`Protocol`]. Из набора
//! таблиц собирается [`Speaker`] - одна сторона соединения: что она
//! отправляет (`S`) и что принимает (`R`). Принятые сообщения отдаются
//! обработчику через [`Dispatch`] с типизированным видом сообщения.

use std::collections::{HashMap, HashSet};
use std::fmt::{self, Debug};
use std::hash::Hash;

use log::{error, warn};

use crate::error::{EncodeError, LineError, ProtocolSetupError};
use crate::protocol_doc::{ProtocolSummary, gen_line_help};

/// Тип поля
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Integer,
}

impl FieldType {
    pub fn name(self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Integer => "integer",
        }
    }
}

/// Описание поля сообщения
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    pub name: &'static str,
    pub ty: FieldType,
    pub width: usize,
}

impl FieldDef {
    pub const fn text(name: &'static str, width: usize) -> Self {
        Self {
            name,
            ty: FieldType::Text,
            width,
        }
    }

    pub const fn integer(name: &'static str, width: usize) -> Self {
        Self {
            name,
            ty: FieldType::Integer,
            width,
        }
    }
}

/// Описание одного сообщения
#[derive(Debug)]
pub struct MessageDef<K: 'static> {
    pub kind: K,
    pub name: &'static str,
    pub code: u8,
    pub doc: &'static str,
    pub fields: &'static [FieldDef],
}

impl<K> MessageDef<K> {
    /// Полная длина строки без перевода строки
    pub fn line_len(&self) -> usize {
        1 + self.fields.iter().map(|f| f.width).sum::<usize>()
    }
}

/// Набор сообщений
#[derive(Debug)]
pub struct Protocol<K: 'static> {
    pub name: &'static str,
    pub doc: &'static str,
    pub messages: &'static [MessageDef<K>],
}

/// Значение поля
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Text(String),
    Int(i64),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => f.write_str(s),
            Value::Int(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

/// Разобранное входящее сообщение
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message<K> {
    pub kind: K,
    pub name: &'static str,
    pub args: Vec<Value>,
}

impl<K> Message<K> {
    /// Текстовое поле `i`
    pub fn text(&self, i: usize) -> Option<&str> {
        match self.args.get(i) {
            Some(Value::Text(s)) => Some(s),
            _ => None,
        }
    }

    /// Целое поле `i`
    pub fn int(&self, i: usize) -> Option<i64> {
        match self.args.get(i) {
            Some(Value::Int(v)) => Some(*v),
            _ => None,
        }
    }
}

/// Обработчик входящих сообщений
pub trait Dispatch<K> {
    fn dispatch(&mut self, msg: Message<K>);
}

/// Одна сторона соединения: таблица отправки и таблица приёма
#[derive(Debug)]
pub struct Speaker<S: 'static, R: 'static> {
    send: HashMap<S, &'static MessageDef<S>>,
    recv: HashMap<u8, &'static MessageDef<R>>,
    send_protocols: Vec<&'static Protocol<S>>,
    recv_protocols: Vec<&'static Protocol<R>>,
}

impl<S, R> Speaker<S, R>
where
    S: Copy + Eq + Hash + Debug + 'static,
    R: Copy + Eq + Hash + Debug + 'static,
{
    /// Собирает таблицы. Повтор имени (отдельно для отправки и приёма)
    /// или кода приёма - ошибка.
    pub fn new(
        send: &[&'static Protocol<S>],
        recv: &[&'static Protocol<R>],
    ) -> Result<Self, ProtocolSetupError> {
        let mut send_table = HashMap::new();
        let mut names = HashSet::new();
        for def in send.iter().flat_map(|p| p.messages) {
            if !names.insert(def.name) {
                return Err(ProtocolSetupError::DuplicateName {
                    direction: "send",
                    name: def.name,
                });
            }
            send_table.insert(def.kind, def);
        }

        let mut recv_table: HashMap<u8, &'static MessageDef<R>> = HashMap::new();
        let mut names = HashSet::new();
        for def in recv.iter().flat_map(|p| p.messages) {
            if !names.insert(def.name) {
                return Err(ProtocolSetupError::DuplicateName {
                    direction: "receive",
                    name: def.name,
                });
            }
            if let Some(prev) = recv_table.insert(def.code, def) {
                return Err(ProtocolSetupError::DuplicateCode {
                    code: def.code as char,
                    first: prev.name,
                    second: def.name,
                });
            }
        }

        Ok(Self {
            send: send_table,
            recv: recv_table,
            send_protocols: send.to_vec(),
            recv_protocols: recv.to_vec(),
        })
    }

    /// Строка сообщения `kind` (без перевода строки)
    pub fn encode(&self, kind: S, args: &[Value]) -> Result<String, EncodeError> {
        let def = self
            .send
            .get(&kind)
            .ok_or_else(|| EncodeError::NotInSendTable(format!("{kind:?}")))?;

        if args.len() != def.fields.len() {
            return Err(EncodeError::ArgumentCount {
                message: def.name,
                expected: def.fields.len(),
                given: args.len(),
            });
        }

        let mut line = String::with_capacity(def.line_len());
        line.push(def.code as char);
        for (field, value) in def.fields.iter().zip(args) {
            let w = field.width;
            match (field.ty, value) {
                (FieldType::Integer, Value::Int(v)) => line.push_str(&format!("{v:>w$}")),
                (FieldType::Text, Value::Text(s)) => line.push_str(&format!("{s:<w$}")),
                (ty, _) => {
                    return Err(EncodeError::ArgumentType {
                        message: def.name,
                        field: field.name,
                        expected: ty.name(),
                    });
                }
            }
        }

        if line.len() != def.line_len() {
            return Err(EncodeError::Overflow {
                message: def.name,
                width: def.line_len(),
                line,
            });
        }
        Ok(line)
    }

    /// Разбирает одну входящую строку
    pub fn decode(&self, line: &[u8]) -> Result<Message<R>, LineError> {
        let line = trim_line_end(line);
        let Some(&code) = line.first() else {
            return Err(LineError::Empty);
        };
        let def = self
            .recv
            .get(&code)
            .ok_or_else(|| LineError::UnknownCode(lossy(line)))?;

        let expected = def.line_len();
        let padded;
        let line = if line.len() < expected {
            warn!(
                "Padding short message {} ({} of {expected} bytes): {:?}",
                def.name,
                line.len(),
                lossy(line)
            );
            let mut buf = line.to_vec();
            buf.resize(expected, b' ');
            padded = buf;
            &padded[..]
        } else if line.len() > expected {
            return Err(LineError::TooLong {
                expected,
                got: line.len(),
                line: lossy(line),
            });
        } else {
            line
        };

        let mut args = Vec::with_capacity(def.fields.len());
        let mut pos = 1;
        for field in def.fields {
            let raw = lossy(&line[pos..pos + field.width]);
            pos += field.width;
            match field.ty {
                FieldType::Text => args.push(Value::Text(raw.trim_end().to_string())),
                FieldType::Integer => {
                    let digits = raw.trim();
                    if digits.is_empty() {
                        return Err(LineError::Incomplete {
                            field: field.name,
                            line: lossy(line),
                        });
                    }
                    let v = digits.parse::<i64>().map_err(|_| LineError::BadInteger {
                        field: field.name,
                        value: digits.to_string(),
                    })?;
                    args.push(Value::Int(v));
                }
            }
        }

        Ok(Message {
            kind: def.kind,
            name: def.name,
            args,
        })
    }

    /// Разбирает строку и передаёт сообщение обработчику.
    ///
    /// Ошибки только логируются: соединение продолжает работать.
    /// Возвращает true, если обработчик был вызван.
    pub fn line_received<D: Dispatch<R>>(&self, line: &[u8], handler: &mut D) -> bool {
        match self.decode(line) {
            Ok(msg) => {
                handler.dispatch(msg);
                true
            }
            Err(LineError::Empty) => {
                warn!("Empty line received");
                false
            }
            Err(e) => {
                error!("{e}");
                false
            }
        }
    }

    /// Справка по протоколам этой стороны: сначала принимаемые, затем отправляемые.
    /// `out` вызывается по одному разу на строку.
    pub fn line_help(&self, mut out: impl FnMut(&str)) {
        for summary in self.summaries() {
            gen_line_help(&summary, &mut out);
        }
    }

    /// Описания всех протоколов этой стороны
    pub fn summaries(&self) -> Vec<ProtocolSummary> {
        self.recv_protocols
            .iter()
            .map(|p| ProtocolSummary::of(p))
            .chain(self.send_protocols.iter().map(|p| ProtocolSummary::of(p)))
            .collect()
    }
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && matches!(line[end - 1], b'\r' | b'\n') {
        end -= 1;
    }
    &line[..end]
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Up {
        Ping,
        Say,
        Sum,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Down {
        Rate,
        Other,
    }

    static UP: Protocol<Up> = Protocol {
        name: "Up",
        doc: "Client side.",
        messages: &[
            MessageDef {
                kind: Up::Ping,
                name: "ping",
                code: b'P',
                doc: "No fields.",
                fields: &[],
            },
            MessageDef {
                kind: Up::Say,
                name: "say",
                code: b'S',
                doc: "One text field.",
                fields: &[FieldDef::text("word", 8)],
            },
            MessageDef {
                kind: Up::Sum,
                name: "sum",
                code: b'N',
                doc: "Text and two integers.",
                fields: &[
                    FieldDef::text("tag", 4),
                    FieldDef::integer("a", 6),
                    FieldDef::integer("b", 6),
                ],
            },
        ],
    };

    static RATE_A: Protocol<Down> = Protocol {
        name: "A",
        doc: "",
        messages: &[MessageDef {
            kind: Down::Rate,
            name: "rate",
            code: b'R',
            doc: "",
            fields: &[],
        }],
    };

    static RATE_B: Protocol<Down> = Protocol {
        name: "B",
        doc: "",
        messages: &[MessageDef {
            kind: Down::Other,
            name: "rate",
            code: b'Q',
            doc: "",
            fields: &[],
        }],
    };

    static SAME_CODE: Protocol<Up> = Protocol {
        name: "Clash",
        doc: "",
        messages: &[MessageDef {
            kind: Up::Ping,
            name: "pong",
            code: b'P',
            doc: "",
            fields: &[],
        }],
    };

    fn client() -> Speaker<Up, Down> {
        Speaker::new(&[&UP], &[&RATE_A]).unwrap()
    }

    fn server() -> Speaker<Down, Up> {
        Speaker::new(&[&RATE_A], &[&UP]).unwrap()
    }

    #[derive(Default)]
    struct Collect(Vec<Message<Up>>);

    impl Dispatch<Up> for Collect {
        fn dispatch(&mut self, msg: Message<Up>) {
            self.0.push(msg);
        }
    }

    #[test]
    fn duplicate_send_name_is_rejected() {
        let err = Speaker::<Down, Up>::new(&[&RATE_A, &RATE_B], &[&UP]).unwrap_err();
        assert!(matches!(
            err,
            ProtocolSetupError::DuplicateName {
                direction: "send",
                name: "rate"
            }
        ));
    }

    #[test]
    fn duplicate_receive_name_and_code_are_rejected() {
        let err = Speaker::<Up, Down>::new(&[&UP], &[&RATE_A, &RATE_B]).unwrap_err();
        assert!(matches!(
            err,
            ProtocolSetupError::DuplicateName {
                direction: "receive",
                ..
            }
        ));

        let err = Speaker::<Down, Up>::new(&[&RATE_A], &[&UP, &SAME_CODE]).unwrap_err();
        assert!(matches!(err, ProtocolSetupError::DuplicateCode { code: 'P', .. }));
    }

    #[test]
    fn same_name_in_both_directions_is_fine() {
        assert!(Speaker::<Down, Down>::new(&[&RATE_A], &[&RATE_A]).is_ok());
    }

    #[test]
    fn encode_pads_and_justifies() {
        let c = client();
        assert_eq!(c.encode(Up::Ping, &[]).unwrap(), "P");
        assert_eq!(c.encode(Up::Say, &["hi".into()]).unwrap(), "Shi      ");
        assert_eq!(
            c.encode(Up::Sum, &["ab".into(), Value::Int(12), Value::Int(-3)]).unwrap(),
            "Nab      12    -3"
        );
    }

    #[test]
    fn encode_checks_arity_type_and_width() {
        let c = client();
        assert!(matches!(
            c.encode(Up::Say, &[]),
            Err(EncodeError::ArgumentCount {
                expected: 1,
                given: 0,
                ..
            })
        ));
        assert!(matches!(
            c.encode(Up::Say, &[Value::Int(5)]),
            Err(EncodeError::ArgumentType { field: "word", .. })
        ));
        assert!(matches!(
            c.encode(Up::Say, &["toolongword".into()]),
            Err(EncodeError::Overflow { width: 9, .. })
        ));
        assert!(matches!(
            c.encode(Up::Sum, &["x".into(), Value::Int(1234567), Value::Int(0)]),
            Err(EncodeError::Overflow { .. })
        ));
    }

    #[test]
    fn encode_rejects_messages_of_the_other_direction() {
        let s: Speaker<Down, Up> = Speaker::new(&[&RATE_A], &[&UP]).unwrap();
        assert!(matches!(
            s.encode(Down::Other, &[]),
            Err(EncodeError::NotInSendTable(_))
        ));
    }

    #[test]
    fn lines_travel_between_speakers() {
        let c = client();
        let s = server();
        let line = c
            .encode(Up::Sum, &["eur".into(), Value::Int(70), Value::Int(100001)])
            .unwrap();

        let msg = s.decode(format!("{line}\r\n").as_bytes()).unwrap();
        assert_eq!(msg.kind, Up::Sum);
        assert_eq!(msg.name, "sum");
        assert_eq!(msg.text(0), Some("eur"));
        assert_eq!(msg.int(1), Some(70));
        assert_eq!(msg.int(2), Some(100001));
        assert_eq!(msg.int(0), None);
    }

    #[test]
    fn short_line_is_padded_long_line_is_dropped() {
        let s = server();
        let msg = s.decode(b"SEUR").unwrap();
        assert_eq!(msg.text(0), Some("EUR"));

        let msg = s.decode(b"S").unwrap();
        assert_eq!(msg.text(0), Some(""));

        assert!(matches!(
            s.decode(b"SEUR/USD  x"),
            Err(LineError::TooLong {
                expected: 9,
                got: 11,
                ..
            })
        ));
    }

    #[test]
    fn blank_or_malformed_integer_fields_fail() {
        let s = server();
        assert!(matches!(
            s.decode(b"Nab      12"),
            Err(LineError::Incomplete { field: "b", .. })
        ));
        assert!(matches!(
            s.decode(b"Nab      12  zz12"),
            Err(LineError::BadInteger { field: "b", .. })
        ));
    }

    #[test]
    fn unknown_and_empty_lines_are_dropped_without_dispatch() {
        let s = server();
        let mut got = Collect::default();

        assert!(!s.line_received(b"\r\n", &mut got));
        assert!(!s.line_received(b"?what", &mut got));
        assert!(!s.line_received(b"PPPPPP", &mut got));
        assert!(s.line_received(b"P\n", &mut got));
        assert!(s.line_received(b"Sxy", &mut got));

        let kinds: Vec<Up> = got.0.iter().map(|m| m.kind).collect();
        assert_eq!(kinds, vec![Up::Ping, Up::Say]);
    }

    #[test]
    fn help_lists_every_message_once() {
        let s = server();
        let mut lines = Vec::new();
        s.line_help(|l| lines.push(l.to_string()));

        for name in ["ping", "say", "sum", "rate"] {
            let hits = lines
                .iter()
                .filter(|l| l.trim_start().starts_with(&format!("{name}:")))
                .count();
            assert_eq!(hits, 1, "{name}");
        }
        assert!(lines.iter().any(|l| l.contains("'N <tag> <a> <b>'")));
    }
}
