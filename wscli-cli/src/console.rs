//! Console sink: rendering of inbound frames, notices and error reports.
//!
//! Everything user-facing goes through [`Console`], which the session and
//! the read pump share. Writers are injected so tests can capture output.

use async_trait::async_trait;
use chrono::{Local, SecondsFormat};
use colored::Colorize;
use http::HeaderMap;
use parking_lot::Mutex;
use std::fmt;
use std::fs::File;
use std::io::{self, Write};
use std::net::SocketAddr;
use tokio::io::AsyncReadExt;
use wscli_websocket::{Connection, InboundFrame, MessageHandler, WebSocketError};

type Writer = Box<dyn Write + Send>;

// Written around raw payload bytes, which may not be UTF-8.
const PAYLOAD_COLOR: &str = "\x1b[92m";
const COLOR_RESET: &str = "\x1b[0m";

/// Output settings for a [`Console`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleOptions {
    /// Print a timestamp and remote address before each inbound frame
    pub timestamps: bool,
    /// Use ANSI colors
    pub color: bool,
}

/// Shared output for the session and the read pump.
pub struct Console {
    out: Mutex<Writer>,
    err: Mutex<Writer>,
    log: Mutex<Option<Writer>>,
    options: ConsoleOptions,
}

impl Console {
    /// Create a console over arbitrary writers.
    pub fn new(out: Writer, err: Writer, log: Option<Writer>, options: ConsoleOptions) -> Self {
        Self {
            out: Mutex::new(out),
            err: Mutex::new(err),
            log: Mutex::new(log),
            options,
        }
    }

    /// Console on the process's stdout and stderr, mirroring frames to `log`.
    pub fn stdio(log: Option<File>, options: ConsoleOptions) -> Self {
        Self::new(
            Box::new(io::stdout()),
            Box::new(io::stderr()),
            log.map(|file| Box::new(file) as Writer),
            options,
        )
    }

    /// Report a failure; processing continues.
    pub fn report(&self, err: &dyn fmt::Display) {
        let line = err.to_string();
        let line = if self.options.color {
            line.bright_red().to_string()
        } else {
            line
        };
        let mut stderr = self.err.lock();
        if let Err(e) = writeln!(stderr, "{}", line).and_then(|_| stderr.flush()) {
            tracing::warn!(error = %e, "failed to write error report");
        }
    }

    /// Report a failure under an upper-cased context label.
    pub fn report_error(&self, context: &str, err: &dyn fmt::Display) {
        self.report(&format_args!("{}: {}", context.to_uppercase(), err));
    }

    /// Print a short status line such as `SENT`.
    pub fn notice(&self, text: &str) {
        let line = if self.options.color {
            text.bright_cyan().to_string()
        } else {
            text.to_string()
        };
        self.write_out(format!("{}\n", line).as_bytes());
    }

    /// Print each header key with its values as `\tkey: [v1 v2]`.
    pub fn list_headers(&self, headers: &HeaderMap) {
        let mut listing = String::new();
        for name in headers.keys() {
            let values: Vec<String> = headers
                .get_all(name)
                .iter()
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                .collect();
            let key = format!("{}:", name);
            let key = if self.options.color {
                key.bright_yellow().to_string()
            } else {
                key
            };
            listing.push_str(&format!("\t{} [{}]\n", key, values.join(" ")));
        }
        self.write_out(listing.as_bytes());
    }

    /// Render one inbound payload and mirror it to the log file.
    pub fn deliver(&self, remote_addr: Option<SocketAddr>, payload: &[u8]) {
        if payload.is_empty() {
            return;
        }

        if let Some(log) = self.log.lock().as_mut() {
            if let Err(e) = log.write_all(payload).and_then(|_| log.flush()) {
                tracing::warn!(error = %e, "failed to write log file");
            }
        }

        let mut out = self.out.lock();
        let result = if self.options.timestamps {
            let from = remote_addr.map(|addr| addr.to_string()).unwrap_or_default();
            let header = format!(
                "{} [{}]:",
                Local::now().to_rfc3339_opts(SecondsFormat::Secs, true),
                from
            );
            if self.options.color {
                writeln!(out, "{}", header.white())
                    .and_then(|_| out.write_all(PAYLOAD_COLOR.as_bytes()))
                    .and_then(|_| out.write_all(payload))
                    .and_then(|_| out.write_all(COLOR_RESET.as_bytes()))
            } else {
                writeln!(out, "{}", header).and_then(|_| out.write_all(payload))
            }
        } else {
            out.write_all(payload)
        };

        if let Err(e) = result.and_then(|_| out.flush()) {
            tracing::warn!(error = %e, "failed to write frame to stdout");
        }
    }

    fn write_out(&self, bytes: &[u8]) {
        let mut out = self.out.lock();
        if let Err(e) = out.write_all(bytes).and_then(|_| out.flush()) {
            tracing::warn!(error = %e, "failed to write to stdout");
        }
    }
}

#[async_trait]
impl MessageHandler for Console {
    async fn on_frame(
        &self,
        connection: &Connection,
        frame: Result<InboundFrame, &WebSocketError>,
    ) -> bool {
        let mut frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(connection_id = %connection.id(), error = %e, "receive failed");
                return false;
            }
        };

        let mut payload = Vec::new();
        if let Err(e) = frame.payload.read_to_end(&mut payload).await {
            self.report_error("websocket->stdout", &e);
            return false;
        }

        tracing::trace!(
            connection_id = %connection.id(),
            message_type = %frame.message_type,
            len = payload.len(),
            "frame received"
        );
        self.deliver(connection.remote_addr(), &payload);
        true
    }
}


#[cfg(test)]
mod tests {
    use super::testing::capture;
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_deliver_writes_raw_payload_and_log() {
        let (console, out, _, log) = capture(ConsoleOptions::default());

        console.deliver(None, b"{\"ok\":true}\n");

        assert_eq!(out.contents(), "{\"ok\":true}\n");
        assert_eq!(log.bytes(), b"{\"ok\":true}\n");
    }

    #[test]
    fn test_deliver_with_timestamps_prints_sender() {
        let (console, out, _, log) = capture(ConsoleOptions {
            timestamps: true,
            color: false,
        });

        console.deliver(Some("127.0.0.1:9000".parse().unwrap()), b"hi\n");

        let text = out.contents();
        let (header, body) = text.split_once('\n').unwrap();
        assert!(header.ends_with(" [127.0.0.1:9000]:"), "{}", header);
        assert!(chrono::DateTime::parse_from_rfc3339(header.split(' ').next().unwrap()).is_ok());
        assert_eq!(body, "hi\n");
        assert_eq!(log.bytes(), b"hi\n");
    }

    #[test]
    fn test_colored_deliver_keeps_binary_payload_intact() {
        let (console, out, _, log) = capture(ConsoleOptions {
            timestamps: true,
            color: true,
        });
        let payload: &[u8] = b"\xff\x00raw\xe9\n";

        console.deliver(None, payload);

        let bytes = out.bytes();
        let expected = [PAYLOAD_COLOR.as_bytes(), payload, COLOR_RESET.as_bytes()].concat();
        assert!(bytes.ends_with(&expected), "{:?}", bytes);
        assert_eq!(log.bytes(), payload);
    }

    #[test]
    fn test_deliver_skips_empty_payload() {
        let (console, out, _, log) = capture(ConsoleOptions {
            timestamps: true,
            color: false,
        });

        console.deliver(None, b"");

        assert!(out.contents().is_empty());
        assert!(log.bytes().is_empty());
    }

    #[test]
    fn test_list_headers_format() {
        let (console, out, _, _) = capture(ConsoleOptions::default());
        let mut headers = HeaderMap::new();
        headers.append("x-token", HeaderValue::from_static("a"));
        headers.append("x-token", HeaderValue::from_static("b"));

        console.list_headers(&headers);

        assert_eq!(out.contents(), "\tx-token: [a b]\n");
    }

    #[test]
    fn test_report_error_uppercases_context() {
        let (console, out, err, _) = capture(ConsoleOptions::default());

        console.report_error("websocket->stdout", &"unexpected end of file");

        assert_eq!(err.contents(), "WEBSOCKET->STDOUT: unexpected end of file\n");
        assert!(out.contents().is_empty());
    }

    #[test]
    fn test_notice() {
        let (console, out, _, _) = capture(ConsoleOptions::default());
        console.notice("SENT");
        assert_eq!(out.contents(), "SENT\n");
    }
}
