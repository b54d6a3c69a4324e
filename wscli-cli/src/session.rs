//! The session state machine driven by the command stream.

use crate::command::Command;
use crate::console::Console;
use crate::error::{CliError, CliResult};
use crate::input::LineBuffer;
use http::header::{HeaderName, HeaderValue};
use http::HeaderMap;
use std::sync::Arc;
use wscli_websocket::{ConnectionHandler, Connector, HandlerConfig, MessageHandler};

/// Interpreter state for one run of the program.
///
/// While idle every complete line is parsed as a [`Command`]. After `\msg`
/// the session collects lines until the terminator line arrives, then sends
/// the collected bytes as one text frame.
pub struct Session {
    input: LineBuffer,
    headers: HeaderMap,
    pending: Vec<u8>,
    terminator: Option<Vec<u8>>,
    handler: Option<ConnectionHandler>,
    console: Arc<Console>,
    connector: Arc<dyn Connector>,
    config: HandlerConfig,
}

impl Session {
    /// Create an idle session with no headers and no connection.
    pub fn new(console: Arc<Console>, connector: Arc<dyn Connector>, config: HandlerConfig) -> Self {
        Self {
            input: LineBuffer::new(),
            headers: HeaderMap::new(),
            pending: Vec::new(),
            terminator: None,
            handler: None,
            console,
            connector,
            config,
        }
    }

    /// Feed a chunk of raw input, running every line it completes.
    pub async fn feed(&mut self, chunk: &[u8]) {
        self.input.push(chunk);
        while let Some(line) = self.input.next_line() {
            self.run_line(&line).await;
        }
    }

    /// Run a trailing partial line left at end of input.
    pub async fn finish(&mut self) {
        if let Some(line) = self.input.finish() {
            self.run_line(&line).await;
        }
    }

    /// Hang up before exit.
    pub async fn shutdown(&mut self) {
        self.hang_up().await;
    }

    /// Whether a connection is active.
    pub fn is_connected(&self) -> bool {
        self.handler.is_some()
    }

    /// Whether a `\msg` heredoc is being collected.
    pub fn is_collecting(&self) -> bool {
        self.terminator.is_some()
    }

    /// The headers sent with the next dial.
    #[cfg(test)]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    async fn run_line(&mut self, line: &[u8]) {
        if let Err(e) = self.process_line(line).await {
            tracing::debug!(error = %e, "command failed");
            self.console.report(&e);
        }
    }

    /// Process one newline-terminated line.
    pub async fn process_line(&mut self, line: &[u8]) -> CliResult<()> {
        if let Some(terminator) = &self.terminator {
            if line == terminator.as_slice() {
                return self.send_pending().await;
            }
            self.pending.extend_from_slice(line);
            return Ok(());
        }

        match Command::parse(line) {
            Command::Message { terminator } => {
                self.reset_message();
                self.terminator = Some(terminator);
            }
            Command::ClearHeaders => self.headers = HeaderMap::new(),
            Command::ListHeaders => self.console.list_headers(&self.headers),
            Command::HangUp => self.hang_up().await,
            Command::Dial(url) => self.dial(&url).await?,
            Command::Header { name, value } => self.set_header(&name, &value)?,
            Command::Noop => {}
        }
        Ok(())
    }

    /// Hang up any active connection, then connect to `url`.
    pub async fn dial(&mut self, url: &str) -> CliResult<()> {
        self.hang_up().await;

        tracing::info!(url, headers = self.headers.len(), "dialing");
        let transport = self
            .connector
            .dial(url, &self.headers)
            .await
            .map_err(|e| CliError::websocket("WS DIAL", e))?;

        let sink: Arc<dyn MessageHandler> = self.console.clone();
        let handler = ConnectionHandler::start(Some(transport), self.config, sink)
            .map_err(|e| CliError::websocket("WS HANDLER", e))?;
        tracing::info!(
            url,
            connection_id = %handler.connection().id(),
            remote_addr = ?handler.remote_addr(),
            "connected"
        );
        self.handler = Some(handler);
        Ok(())
    }

    /// Close the active connection and wait for its pumps.
    ///
    /// Close and pump errors are reported, never returned. The pending
    /// message is discarded whether or not a connection was active.
    pub async fn hang_up(&mut self) {
        if let Some(mut handler) = self.handler.take() {
            if let Err(e) = handler.close().await {
                self.console.report(&CliError::websocket("WS CLOSE", e));
            }
            let errors = handler.wait().await;
            if let Some(e) = errors.reader {
                self.console.report(&CliError::websocket("WS READER", e));
            }
            if let Some(e) = errors.prober {
                self.console.report(&CliError::websocket("WS PROBER", e));
            }
            tracing::info!("hung up");
        }
        self.reset_message();
    }

    async fn send_pending(&mut self) -> CliResult<()> {
        let message = std::mem::take(&mut self.pending);
        self.terminator = None;

        let Some(handler) = &self.handler else {
            tracing::debug!(len = message.len(), "no connection, message discarded");
            return Ok(());
        };
        handler
            .send_text(message)
            .await
            .map_err(|e| CliError::websocket("WS WRITE", e))?;
        self.console.notice("SENT");
        Ok(())
    }

    fn set_header(&mut self, name: &str, value: &str) -> CliResult<()> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| CliError::InvalidHeader(format!("{:?}: {}", name, e)))?;
        if value.is_empty() {
            self.headers.remove(&name);
            return Ok(());
        }
        let value = HeaderValue::from_str(value)
            .map_err(|e| CliError::InvalidHeader(format!("{:?}: {}", value, e)))?;
        self.headers.append(name, value);
        Ok(())
    }

    fn reset_message(&mut self) {
        self.pending.clear();
        self.terminator = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::testing::{SharedBuffer, capture};
    use crate::console::ConsoleOptions;
    use http::StatusCode;
    use std::time::Duration;
    use wscli_websocket::mock::{MockConnector, MockTransport};
    use wscli_websocket::{MessageType, WebSocketError};

    struct Fixture {
        session: Session,
        connector: Arc<MockConnector>,
        out: SharedBuffer,
        err: SharedBuffer,
    }

    fn fixture() -> Fixture {
        fixture_with(ConsoleOptions::default())
    }

    fn fixture_with(options: ConsoleOptions) -> Fixture {
        let (console, out, err, _) = capture(options);
        let connector = MockConnector::new();
        let config = HandlerConfig::new().read_timeout(Duration::from_secs(10));
        let session = Session::new(Arc::new(console), connector.clone(), config);
        Fixture {
            session,
            connector,
            out,
            err,
        }
    }

    async fn connected() -> (Fixture, Arc<MockTransport>) {
        let mut fx = fixture();
        let transport = MockTransport::new();
        fx.connector.push_transport(transport.clone());
        fx.session.feed(b"\\dial ws://127.0.0.1:8080/ws\n").await;
        assert!(fx.session.is_connected());
        (fx, transport)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    fn texts(transport: &MockTransport) -> Vec<Vec<u8>> {
        transport
            .sent_of(MessageType::Text)
            .into_iter()
            .map(|m| m.payload.to_vec())
            .collect()
    }

    #[tokio::test]
    async fn test_heredoc_with_terminator_sends_one_frame() {
        let (mut fx, transport) = connected().await;

        fx.session
            .feed(b"\\msg EOF\n{\n  \"op\": \"sub\"\n}\nEOF\n")
            .await;

        assert_eq!(texts(&transport), vec![b"{\n  \"op\": \"sub\"\n}\n".to_vec()]);
        assert_eq!(fx.out.contents(), "SENT\n");
        assert!(!fx.session.is_collecting());
        fx.session.shutdown().await;
    }

    #[tokio::test]
    async fn test_heredoc_default_terminator_is_blank_line() {
        let (mut fx, transport) = connected().await;

        fx.session.feed(b"\\msg\nping\n\n").await;

        assert_eq!(texts(&transport), vec![b"ping\n".to_vec()]);
        fx.session.shutdown().await;
    }

    #[tokio::test]
    async fn test_heredoc_lines_look_like_commands_while_collecting() {
        let (mut fx, transport) = connected().await;

        fx.session
            .feed(b"\\msg END\n\\hup\nKey: value\nEND \n END\nEND\n")
            .await;

        assert!(fx.session.is_connected());
        assert!(fx.session.headers().is_empty());
        assert_eq!(
            texts(&transport),
            vec![b"\\hup\nKey: value\nEND \n END\n".to_vec()]
        );
        fx.session.shutdown().await;
    }

    #[tokio::test]
    async fn test_heredoc_is_identical_for_any_chunking() {
        let (mut fx, transport) = connected().await;
        let script: &[u8] = b"\\msg --\nalpha\nbeta\n--\n";

        for byte in script {
            fx.session.feed(std::slice::from_ref(byte)).await;
        }
        fx.session.feed(script).await;

        let sent = texts(&transport);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], b"alpha\nbeta\n");
        assert_eq!(sent[0], sent[1]);
        fx.session.shutdown().await;
    }

    #[tokio::test]
    async fn test_heredoc_with_crlf_input() {
        let (mut fx, transport) = connected().await;

        fx.session.feed(b"\\msg END\r\nline\r\nEND\r\n").await;

        assert_eq!(texts(&transport), vec![b"line\n".to_vec()]);
        fx.session.shutdown().await;
    }

    #[tokio::test]
    async fn test_heredoc_without_connection_is_discarded() {
        let mut fx = fixture();

        fx.session.feed(b"\\msg\nnobody listens\n\n").await;

        assert!(!fx.session.is_collecting());
        assert!(fx.out.contents().is_empty());
        assert!(fx.err.contents().is_empty());
    }

    #[tokio::test]
    async fn test_msg_line_inside_heredoc_is_content() {
        let (mut fx, transport) = connected().await;

        fx.session.feed(b"\\msg A\nfirst\n").await;
        assert!(fx.session.is_collecting());
        fx.session.feed(b"\\msg B\nA\n").await;

        assert_eq!(texts(&transport), vec![b"first\n\\msg B\n".to_vec()]);
        fx.session.shutdown().await;
    }

    #[tokio::test]
    async fn test_write_failure_is_reported_and_message_dropped() {
        let (mut fx, transport) = connected().await;
        transport.fail_writes(true);

        fx.session.feed(b"\\msg\nlost\n\n").await;

        assert!(fx.err.contents().starts_with("WS WRITE: "));
        assert!(!fx.out.contents().contains("SENT"));
        assert!(!fx.session.is_collecting());
        fx.session.shutdown().await;
    }

    #[tokio::test]
    async fn test_non_utf8_heredoc_is_reported_not_rewritten() {
        let (mut fx, transport) = connected().await;

        fx.session.feed(b"\\msg\ncaf\xe9\n\n").await;

        let errors = fx.err.contents();
        assert!(errors.starts_with("WS WRITE: "), "{}", errors);
        assert!(texts(&transport).is_empty());
        assert!(!fx.out.contents().contains("SENT"));
        assert!(!fx.session.is_collecting());
        fx.session.shutdown().await;
    }

    #[tokio::test]
    async fn test_header_add_list_and_remove() {
        let mut fx = fixture();

        fx.session.feed(b"X-Token: one\nX-Token: two\n\\hdrlst\n").await;
        assert_eq!(fx.out.contents(), "\tx-token: [one two]\n");

        fx.session.feed(b"x-token:\n").await;
        assert!(fx.session.headers().is_empty());
    }

    #[tokio::test]
    async fn test_hdrclr_empties_headers() {
        let mut fx = fixture();

        fx.session.feed(b"A: 1\nB: 2\n\\hdrclr\n").await;

        assert!(fx.session.headers().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_header_is_reported_and_processing_continues() {
        let mut fx = fixture();

        fx.session.feed(b"Bad Name: x\nGood: y\n").await;

        assert!(fx.err.contents().starts_with("HEADER: "));
        assert_eq!(fx.session.headers().len(), 1);
        assert_eq!(fx.session.headers()["good"], "y");
    }

    #[tokio::test]
    async fn test_hang_up_without_connection_is_silent() {
        let mut fx = fixture();

        fx.session.feed(b"\\hup\n\\hup\n").await;

        assert!(!fx.session.is_connected());
        assert!(fx.out.contents().is_empty());
        assert!(fx.err.contents().is_empty());
    }

    #[tokio::test]
    async fn test_dial_sends_current_headers() {
        let mut fx = fixture();
        fx.connector.push_transport(MockTransport::new());

        fx.session
            .feed(b"Authorization: Bearer t0k3n\n\\dial ws://example.test/feed\n")
            .await;

        let dials = fx.connector.dials();
        assert_eq!(dials.len(), 1);
        assert_eq!(dials[0].0, "ws://example.test/feed");
        assert_eq!(dials[0].1["authorization"], "Bearer t0k3n");
        fx.session.shutdown().await;
    }

    #[tokio::test]
    async fn test_dial_failure_reports_status_and_leaves_no_connection() {
        let mut fx = fixture();
        fx.connector.push_error(WebSocketError::Rejected {
            status: StatusCode::UNAUTHORIZED,
        });

        fx.session.feed(b"\\dial ws://example.test/\n\\hup\n").await;

        assert!(!fx.session.is_connected());
        assert!(
            fx.err.contents().starts_with("WS DIAL [401 Unauthorized]: "),
            "{}",
            fx.err.contents()
        );
    }

    #[tokio::test]
    async fn test_dial_refused_then_later_lines_still_run() {
        let mut fx = fixture();

        fx.session.feed(b"\\dial ws://127.0.0.1:1/\nK: v\n").await;

        assert!(!fx.session.is_connected());
        assert!(fx.err.contents().starts_with("WS DIAL: "));
        assert_eq!(fx.session.headers().len(), 1);
    }

    #[tokio::test]
    async fn test_redial_hangs_up_previous_connection() {
        let (mut fx, first) = connected().await;
        let second = MockTransport::new();
        fx.connector.push_transport(second.clone());

        fx.session.feed(b"\\dial ws://127.0.0.1:8081/ws\n").await;

        assert!(first.is_closed());
        assert!(!second.is_closed());
        assert!(fx.session.is_connected());
        fx.session.shutdown().await;
        assert!(second.is_closed());
    }

    #[tokio::test]
    async fn test_hang_up_discards_pending_message() {
        let (mut fx, transport) = connected().await;

        fx.session.feed(b"\\msg END\npartial\n").await;
        fx.session.hang_up().await;

        assert!(!fx.session.is_collecting());
        assert!(transport.is_closed());
        assert!(texts(&transport).is_empty());
    }

    #[tokio::test]
    async fn test_inbound_frames_reach_stdout() {
        let (mut fx, transport) = connected().await;

        transport.push_text("{\"event\":\"tick\"}\n");
        transport.push_text("");
        settle().await;

        assert_eq!(fx.out.contents(), "{\"event\":\"tick\"}\n");
        fx.session.shutdown().await;
    }

    #[tokio::test]
    async fn test_timestamped_frames_name_the_sender() {
        let mut fx = fixture_with(ConsoleOptions {
            timestamps: true,
            color: false,
        });
        let transport = MockTransport::new();
        transport.set_remote_addr("10.0.0.7:8443".parse().unwrap());
        fx.connector.push_transport(transport.clone());
        fx.session.feed(b"\\dial wss://10.0.0.7:8443/feed\n").await;

        transport.push_text("tick\n");
        settle().await;

        let text = fx.out.contents();
        let (header, body) = text.split_once('\n').unwrap();
        assert!(header.ends_with(" [10.0.0.7:8443]:"), "{}", header);
        assert_eq!(body, "tick\n");
        fx.session.shutdown().await;
    }

    #[tokio::test]
    async fn test_hang_up_reports_pump_error() {
        let (mut fx, transport) = connected().await;

        transport.push_close(1001, "going away");
        settle().await;
        fx.session.feed(b"\\hup\n").await;

        let errors = fx.err.contents();
        assert!(errors.starts_with("WS READER: "), "{}", errors);
        assert!(errors.contains("going away"));
        assert!(!fx.session.is_connected());
    }

    #[tokio::test]
    async fn test_unreadable_payload_is_reported() {
        let (mut fx, transport) = connected().await;

        transport.push_broken_payload();
        settle().await;
        fx.session.hang_up().await;

        assert!(fx.err.contents().starts_with("WEBSOCKET->STDOUT: "));
    }

    #[tokio::test]
    async fn test_finish_runs_partial_last_line() {
        let (mut fx, transport) = connected().await;

        fx.session.feed(b"\\msg END\nbody\nEND").await;
        assert!(texts(&transport).is_empty());

        fx.session.finish().await;

        assert_eq!(texts(&transport), vec![b"body\n".to_vec()]);
        fx.session.shutdown().await;
    }
}
