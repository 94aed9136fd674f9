//! Line protocol shared by the relay and its clients.
//!
//! Every message is one line of UTF-8 text terminated by `\n`. The server
//! only ever looks at the first line of a connection (the `CONNECT:`
//! handshake); everything after that is relayed verbatim. The remaining
//! prefixes are conventions between clients, which is why [`Message`] lives
//! here for client code and is never consulted by the hub.

pub const CONNECT_PREFIX: &str = "CONNECT:";
pub const SYSTEM_PREFIX: &str = "SYSTEM: ";
pub const PARTICIPANTS_PREFIX: &str = "PARTICIPANTS: ";
pub const IMAGE_PREFIX: &str = "IMAGE:";

const JOINED_SUFFIX: &str = " hat den Chat betreten.";
const LEFT_SUFFIX: &str = " hat den Chat verlassen.";
const ROSTER_SEPARATOR: &str = ", ";

/// Extracts the display name from a join handshake line.
///
/// The name is trimmed but otherwise unchecked: empty and duplicate names
/// are accepted.
pub fn parse_connect(line: &str) -> Option<&str> {
    line.strip_prefix(CONNECT_PREFIX).map(str::trim)
}

pub fn connect_line(name: &str) -> String {
    format!("{CONNECT_PREFIX}{name}")
}

pub fn join_notice(name: &str) -> String {
    format!("{SYSTEM_PREFIX}{name}{JOINED_SUFFIX}")
}

pub fn leave_notice(name: &str) -> String {
    format!("{SYSTEM_PREFIX}{name}{LEFT_SUFFIX}")
}

/// Builds the roster line. Every entry, including the last, is followed by
/// `", "`; clients depend on that trailing separator.
pub fn roster_line<'a, I>(names: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut line = String::from(PARTICIPANTS_PREFIX);
    for name in names {
        line.push_str(name);
        line.push_str(ROSTER_SEPARATOR);
    }
    line
}

/// A received line as a client sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message<'a> {
    Joined(&'a str),
    Left(&'a str),
    /// Roster entries in server order. Empty entries are dropped.
    Participants(Vec<&'a str>),
    Image { sender: &'a str, base64: &'a str },
    Chat { sender: &'a str, text: &'a str },
    /// A system line that is neither a join nor a leave notice, or a line
    /// without any known framing.
    Other(&'a str),
}

impl<'a> Message<'a> {
    pub fn classify(line: &'a str) -> Self {
        if let Some(rest) = line.strip_prefix(PARTICIPANTS_PREFIX) {
            let names = rest
                .split(ROSTER_SEPARATOR)
                .filter(|n| !n.is_empty())
                .collect();
            return Message::Participants(names);
        }
        if let Some(rest) = line.strip_prefix(SYSTEM_PREFIX) {
            if let Some(name) = rest.strip_suffix(JOINED_SUFFIX) {
                return Message::Joined(name);
            }
            if let Some(name) = rest.strip_suffix(LEFT_SUFFIX) {
                return Message::Left(name);
            }
            return Message::Other(line);
        }
        if let Some(rest) = line.strip_prefix(IMAGE_PREFIX) {
            if let Some((sender, base64)) = rest.split_once(':') {
                return Message::Image { sender, base64 };
            }
        }
        match line.split_once(": ") {
            Some((sender, text)) => Message::Chat { sender, text },
            None => Message::Other(line),
        }
    }
}
