//! Протоколы сервиса курсов.
//!
//! [`REG_PROTOCOL`] - от клиента к серверу (подписки и запросы),
//! [`RATE_PROTOCOL`] - от сервера к клиенту (курсы и ответы).

use crate::line_protocol::{FieldDef, MessageDef, Protocol};

/// Ширина поля инструмента (`EUR/USD` + запас)
pub const INSTRUMENT_WIDTH: usize = 8;

/// Ширина текстовых полей `E` и `C`
pub const TEXT_WIDTH: usize = 80;

/// Сообщения клиента
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegMessage {
    ListInstruments,
    Subscribe,
    Unsubscribe,
    SubscribeAll,
    UnsubscribeAll,
    ListSubscriptions,
    GetRate,
    GetRateAll,
    Help,
}

/// Сообщения сервера
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateMessage {
    Rate,
    DeclInstrument,
    EndTxn,
    Error,
    Comment,
}

const INSTRUMENT: &[FieldDef] = &[FieldDef::text("instrument", INSTRUMENT_WIDTH)];

pub static REG_PROTOCOL: Protocol<RegMessage> = Protocol {
    name: "Registration",
    doc: "Instrument listing and subscription management.",
    messages: &[
        MessageDef {
            kind: RegMessage::ListInstruments,
            name: "list_instruments",
            code: b'L',
            doc: "List all the supported instruments.",
            fields: &[],
        },
        MessageDef {
            kind: RegMessage::Subscribe,
            name: "subscribe",
            code: b'S',
            doc: "Subscribe for notifications on a specific instrument.",
            fields: INSTRUMENT,
        },
        MessageDef {
            kind: RegMessage::Unsubscribe,
            name: "unsubscribe",
            code: b'U',
            doc: "Remove a subscription to a specific instrument.",
            fields: INSTRUMENT,
        },
        MessageDef {
            kind: RegMessage::SubscribeAll,
            name: "subscribe_all",
            code: b'A',
            doc: "Subscribe globally to all instruments.",
            fields: &[],
        },
        MessageDef {
            kind: RegMessage::UnsubscribeAll,
            name: "unsubscribe_all",
            code: b'Z',
            doc: "Remove subscriptions (global and specific).",
            fields: &[],
        },
        MessageDef {
            kind: RegMessage::ListSubscriptions,
            name: "list_subscriptions",
            code: b'V',
            doc: "List the currently active subscriptions.",
            fields: &[],
        },
        MessageDef {
            kind: RegMessage::GetRate,
            name: "getrate",
            code: b'G',
            doc: "Immediately fetch a rate for a specific instrument.",
            fields: INSTRUMENT,
        },
        MessageDef {
            kind: RegMessage::GetRateAll,
            name: "getrateall",
            code: b'T',
            doc: "Immediately fetch rates for all supported instruments.",
            fields: &[FieldDef::integer("txnid", 8)],
        },
        MessageDef {
            kind: RegMessage::Help,
            name: "help",
            code: b'H',
            doc: "Request user-readable help summary.",
            fields: &[],
        },
    ],
};

pub static RATE_PROTOCOL: Protocol<RateMessage> = Protocol {
    name: "Rates",
    doc: "Rate notifications and replies.",
    messages: &[
        MessageDef {
            kind: RateMessage::Rate,
            name: "rate",
            code: b'R',
            doc: "Rate notification.",
            fields: &[
                FieldDef::integer("timestamp", 16),
                FieldDef::text("instrument", INSTRUMENT_WIDTH),
                FieldDef::integer("bid", 16),
                FieldDef::integer("ask", 16),
            ],
        },
        MessageDef {
            kind: RateMessage::DeclInstrument,
            name: "decl_instrument",
            code: b'I',
            doc: "Instrument declaration.",
            fields: INSTRUMENT,
        },
        MessageDef {
            kind: RateMessage::EndTxn,
            name: "end_txn",
            code: b'X',
            doc: "End transaction.",
            fields: &[FieldDef::integer("txnid", 8)],
        },
        MessageDef {
            kind: RateMessage::Error,
            name: "error",
            code: b'E',
            doc: "Error messages.",
            fields: &[FieldDef::text("msg", TEXT_WIDTH)],
        },
        MessageDef {
            kind: RateMessage::Comment,
            name: "comment",
            code: b'C',
            doc: "Display human-readable text.",
            fields: &[FieldDef::text("comment", TEXT_WIDTH)],
        },
    ],
};
