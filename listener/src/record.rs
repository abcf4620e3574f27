use std::fmt::{Display, Formatter};

use crate::message::Message;

/// A `Record` is what gets logged about one inbound request: its method, its headers in the
/// order they arrived, and its body as text.
///
/// A `Record` is built once per request, logged, and dropped.
#[derive(PartialEq, Debug, Clone)]
pub struct Record {
    pub method: String,
    pub headers: Headers,
    pub body: String,
}

impl Record {
    /// The three lines written to the log sink for this request: method, headers, body.
    pub fn lines(&self) -> [String; 3] {
        [
            self.method.clone(),
            self.headers.to_string(),
            self.body.clone(),
        ]
    }
}

/// Bodies are decoded leniently: invalid UTF-8 sequences become U+FFFD rather than an error.
impl From<Message> for Record {
    fn from(message: Message) -> Self {
        Record {
            method: message.method().to_string(),
            body: String::from_utf8_lossy(&message.body).into_owned(),
            headers: Headers(message.headers),
        }
    }
}

/// The header collection of a `Record`, with duplicates and order preserved.
#[derive(PartialEq, Debug, Clone)]
pub struct Headers(pub Vec<(String, String)>);

fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Renders as `Headers { "name": "value", ... }`, or `Headers {}` when there are none.
impl Display for Headers {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            return write!(f, "Headers {{}}");
        }

        let entries = self
            .0
            .iter()
            .map(|(name, value)| format!("{}: {}", quoted(name), quoted(value)))
            .collect::<Vec<String>>()
            .join(", ");

        write!(f, "Headers {{ {} }}", entries)
    }
}
