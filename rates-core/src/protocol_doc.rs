//! Справка по протоколам: текст (для команды `help`) и HTML.

use std::fmt::Write as _;

use crate::line_protocol::{FieldType, Protocol};

/// Описание протокола без привязки к типу вида сообщений
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolSummary {
    pub name: &'static str,
    pub doc: &'static str,
    pub messages: Vec<MessageSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSummary {
    pub name: &'static str,
    pub code: char,
    pub doc: &'static str,
    pub fields: Vec<FieldSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSummary {
    pub name: &'static str,
    pub ty: FieldType,
    pub width: usize,
}

impl ProtocolSummary {
    pub fn of<K>(protocol: &Protocol<K>) -> Self {
        Self {
            name: protocol.name,
            doc: protocol.doc,
            messages: protocol
                .messages
                .iter()
                .map(|m| MessageSummary {
                    name: m.name,
                    code: m.code as char,
                    doc: m.doc,
                    fields: m
                        .fields
                        .iter()
                        .map(|f| FieldSummary {
                            name: f.name,
                            ty: f.ty,
                            width: f.width,
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

impl MessageSummary {
    /// Пример строки: `S <instrument>`
    pub fn usage(&self) -> String {
        let mut s = self.code.to_string();
        for f in &self.fields {
            let _ = write!(s, " <{}>", f.name);
        }
        s
    }
}

/// Текстовая справка по одному протоколу, по строке на вызов `out`
pub fn gen_line_help(protocol: &ProtocolSummary, out: &mut impl FnMut(&str)) {
    out(&format!(" Protocol: {}", protocol.name));
    out("");
    for m in &protocol.messages {
        out(&format!("   '{}'", m.usage()));
        out(&format!("       {}: {}", m.name, m.doc));
        out("");
    }
}

/// HTML-таблицы по списку протоколов
pub fn to_html(protocols: &[ProtocolSummary]) -> String {
    let mut html = String::from("<html>\n<body>\n");
    for p in protocols {
        let _ = writeln!(html, "<h2>{}</h2>", escape(p.name));
        if !p.doc.is_empty() {
            let _ = writeln!(html, "<p>{}</p>", escape(p.doc));
        }
        html.push_str("<table border=\"1\">\n");
        html.push_str("<tr><th>Code</th><th>Message</th><th>Fields</th><th>Description</th></tr>\n");
        for m in &p.messages {
            let fields = m
                .fields
                .iter()
                .map(|f| format!("{} ({} {})", escape(f.name), f.ty.name(), f.width))
                .collect::<Vec<_>>()
                .join("<br>");
            let _ = writeln!(
                html,
                "<tr><td><tt>{}</tt></td><td>{}</td><td>{}</td><td>{}</td></tr>",
                escape(&m.code.to_string()),
                escape(m.name),
                fields,
                escape(m.doc)
            );
        }
        html.push_str("</table>\n");
    }
    html.push_str("</body>\n</html>\n");
    html
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
