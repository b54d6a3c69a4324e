//! Classification of input lines into commands.

use once_cell::sync::Lazy;
use regex::bytes::Regex;

static TERMINATOR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?-u)\\msg\s+(.*)").expect("terminator pattern is valid"));

/// A command recognized on a line received while idle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `\msg [terminator]`: start collecting a heredoc message
    Message {
        /// Line that ends the message, including its trailing newline
        terminator: Vec<u8>,
    },
    /// `\hdrclr`: forget every header
    ClearHeaders,
    /// `\hdrlst`: print the headers
    ListHeaders,
    /// `\hup`: close the active connection
    HangUp,
    /// `\dial ws...`: connect to a websocket URL
    Dial(String),
    /// `Key: value` adds a value, `Key:` removes the key
    Header {
        /// Header name, trimmed
        name: String,
        /// Header value, trimmed; empty means remove
        value: String,
    },
    /// Anything else
    Noop,
}

impl Command {
    /// Classify one line, checking the prefixes in priority order.
    pub fn parse(line: &[u8]) -> Self {
        if line.starts_with(b"\\msg") {
            let mut terminator = TERMINATOR_PATTERN
                .captures(line)
                .and_then(|captures| captures.get(1))
                .map(|m| m.as_bytes().to_vec())
                .unwrap_or_default();
            terminator.push(b'\n');
            return Command::Message { terminator };
        }
        if line.starts_with(b"\\hdrclr") {
            return Command::ClearHeaders;
        }
        if line.starts_with(b"\\hdrlst") {
            return Command::ListHeaders;
        }
        if line.starts_with(b"\\hup") {
            return Command::HangUp;
        }
        if line.starts_with(b"\\dial ws") {
            let target = line.strip_prefix(b"\\dial ").unwrap_or(line).trim_ascii();
            if target.is_empty() {
                return Command::Noop;
            }
            return Command::Dial(String::from_utf8_lossy(target).into_owned());
        }

        let Some(colon) = line.iter().position(|&b| b == b':') else {
            return Command::Noop;
        };
        let name = line[..colon].trim_ascii();
        if name.is_empty() {
            return Command::Noop;
        }
        Command::Header {
            name: String::from_utf8_lossy(name).into_owned(),
            value: String::from_utf8_lossy(line[colon + 1..].trim_ascii()).into_owned(),
        }
    }
}
