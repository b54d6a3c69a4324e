//! Scriptable in-memory transport for tests.
//!
//! [`MockTransport`] stands in for a live socket: tests push inbound frames,
//! control frames and errors onto it, then inspect what was sent, how often
//! deadlines were set and whether writes ever overlapped. [`MockConnector`]
//! hands out prepared transports in place of a real dial.

use crate::error::{WebSocketError, WebSocketResult};
use crate::message::{InboundFrame, Message, MessageType};
use crate::transport::{Connector, PingCallback, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use http::HeaderMap;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::{Notify, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// What the mock yields on the next receive.
#[derive(Debug)]
enum Scripted {
    Frame(MessageType, Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close { code: u16, reason: String },
    Error(WebSocketError),
    BrokenPayload,
}

/// In-memory [`Transport`] driven by the test.
pub struct MockTransport {
    inbound_tx: Mutex<Option<mpsc::UnboundedSender<Scripted>>>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Scripted>>,
    sent: Mutex<Vec<Message>>,
    sent_notify: Notify,
    ping_callback: RwLock<Option<PingCallback>>,
    read_deadline: Mutex<Option<Instant>>,
    read_deadline_sets: AtomicUsize,
    write_deadline_sets: AtomicUsize,
    writing: AtomicBool,
    overlapping_writes: AtomicUsize,
    write_delay: Duration,
    fail_writes: AtomicBool,
    fail_read_deadline: AtomicBool,
    close_calls: AtomicUsize,
    closed: CancellationToken,
    remote_addr: Mutex<Option<SocketAddr>>,
}

impl MockTransport {
    /// A mock whose writes complete immediately.
    pub fn new() -> Arc<Self> {
        Self::with_write_delay(Duration::ZERO)
    }

    /// A mock whose every write takes `delay`.
    pub fn with_write_delay(delay: Duration) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            inbound_tx: Mutex::new(Some(tx)),
            inbound_rx: tokio::sync::Mutex::new(rx),
            sent: Mutex::new(Vec::new()),
            sent_notify: Notify::new(),
            ping_callback: RwLock::new(None),
            read_deadline: Mutex::new(None),
            read_deadline_sets: AtomicUsize::new(0),
            write_deadline_sets: AtomicUsize::new(0),
            writing: AtomicBool::new(false),
            overlapping_writes: AtomicUsize::new(0),
            write_delay: delay,
            fail_writes: AtomicBool::new(false),
            fail_read_deadline: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
            closed: CancellationToken::new(),
            remote_addr: Mutex::new(None),
        })
    }

    fn script(&self, item: Scripted) {
        if let Some(tx) = self.inbound_tx.lock().as_ref() {
            let _ = tx.send(item);
        }
    }

    /// Queue an inbound data frame.
    pub fn push_frame<B: Into<Bytes>>(&self, message_type: MessageType, payload: B) {
        self.script(Scripted::Frame(message_type, payload.into()));
    }

    /// Queue an inbound text frame.
    pub fn push_text<B: Into<Bytes>>(&self, text: B) {
        self.push_frame(MessageType::Text, text);
    }

    /// Queue an inbound ping.
    pub fn push_ping<B: Into<Bytes>>(&self, payload: B) {
        self.script(Scripted::Ping(payload.into()));
    }

    /// Queue an inbound pong.
    pub fn push_pong<B: Into<Bytes>>(&self, payload: B) {
        self.script(Scripted::Pong(payload.into()));
    }

    /// Queue a close frame from the peer.
    pub fn push_close(&self, code: u16, reason: &str) {
        self.script(Scripted::Close {
            code,
            reason: reason.to_string(),
        });
    }

    /// Queue a receive error.
    pub fn push_error(&self, error: WebSocketError) {
        self.script(Scripted::Error(error));
    }

    /// Queue a text frame whose payload fails to read.
    pub fn push_broken_payload(&self) {
        self.script(Scripted::BrokenPayload);
    }

    /// End the inbound stream once the queued items are consumed.
    pub fn end_stream(&self) {
        self.inbound_tx.lock().take();
    }

    /// Make every subsequent write fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent read deadline update fail.
    pub fn fail_read_deadline(&self, fail: bool) {
        self.fail_read_deadline.store(fail, Ordering::SeqCst);
    }

    /// Set the address reported by [`Transport::remote_addr`].
    pub fn set_remote_addr(&self, addr: SocketAddr) {
        *self.remote_addr.lock() = Some(addr);
    }

    /// Every frame written so far.
    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().clone()
    }

    /// Frames of one type written so far.
    pub fn sent_of(&self, message_type: MessageType) -> Vec<Message> {
        self.sent
            .lock()
            .iter()
            .filter(|m| m.message_type == message_type)
            .cloned()
            .collect()
    }

    /// Wait until at least `count` frames have been written.
    pub async fn wait_for_sent(&self, count: usize) {
        loop {
            let notified = self.sent_notify.notified();
            if self.sent.lock().len() >= count {
                return;
            }
            notified.await;
        }
    }

    /// Number of read deadline updates.
    pub fn read_deadline_sets(&self) -> usize {
        self.read_deadline_sets.load(Ordering::SeqCst)
    }

    /// Number of write deadline updates.
    pub fn write_deadline_sets(&self) -> usize {
        self.write_deadline_sets.load(Ordering::SeqCst)
    }

    /// Number of writes that started while another was in flight.
    pub fn overlapping_writes(&self) -> usize {
        self.overlapping_writes.load(Ordering::SeqCst)
    }

    /// Number of calls to [`Transport::close`].
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Whether the transport was closed.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    async fn receive(&self) -> WebSocketResult<InboundFrame> {
        let mut inbound = self.inbound_rx.lock().await;
        loop {
            let deadline = *self.read_deadline.lock();
            let expiry = async {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            let item = tokio::select! {
                biased;
                _ = self.closed.cancelled() => return Err(WebSocketError::ConnectionClosed),
                item = inbound.recv() => item,
                _ = expiry => return Err(WebSocketError::Timeout),
            };

            match item {
                None => return Err(WebSocketError::ConnectionClosed),
                Some(Scripted::Frame(message_type, payload)) => {
                    return Ok(InboundFrame::from_bytes(message_type, payload));
                }
                Some(Scripted::BrokenPayload) => {
                    return Ok(InboundFrame::from_reader(MessageType::Text, BrokenReader));
                }
                Some(Scripted::Ping(payload)) => {
                    let callback = self.ping_callback.read().clone();
                    if let Some(callback) = callback {
                        callback(payload).await?;
                    }
                }
                Some(Scripted::Pong(_)) => {}
                Some(Scripted::Close { code, reason }) => {
                    return Err(WebSocketError::PeerClosed { code, reason });
                }
                Some(Scripted::Error(e)) => return Err(e),
            }
        }
    }
}

struct WritingGuard<'a>(&'a AtomicBool);

impl Drop for WritingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send_frame(&self, message: Message) -> WebSocketResult<()> {
        if self.closed.is_cancelled() {
            return Err(WebSocketError::ConnectionClosed);
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(WebSocketError::Send("scripted write failure".to_string()));
        }
        // same framing rules as the tungstenite transport
        tungstenite::Message::try_from(message.clone())?;

        if self.writing.swap(true, Ordering::SeqCst) {
            self.overlapping_writes.fetch_add(1, Ordering::SeqCst);
        }
        let _writing = WritingGuard(&self.writing);

        if !self.write_delay.is_zero() {
            tokio::select! {
                _ = self.closed.cancelled() => return Err(WebSocketError::ConnectionClosed),
                _ = tokio::time::sleep(self.write_delay) => {}
            }
        }

        self.sent.lock().push(message);
        self.sent_notify.notify_waiters();
        Ok(())
    }

    async fn next_frame(&self) -> WebSocketResult<InboundFrame> {
        self.receive().await
    }

    fn set_read_deadline(&self, deadline: Option<Instant>) -> WebSocketResult<()> {
        if self.fail_read_deadline.load(Ordering::SeqCst) {
            return Err(WebSocketError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "scripted deadline failure",
            )));
        }
        self.read_deadline_sets.fetch_add(1, Ordering::SeqCst);
        *self.read_deadline.lock() = deadline;
        Ok(())
    }

    fn set_write_deadline(&self, _deadline: Option<Instant>) -> WebSocketResult<()> {
        self.write_deadline_sets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_inbound_ping(&self, callback: PingCallback) {
        *self.ping_callback.write() = Some(callback);
    }

    async fn close(&self) -> WebSocketResult<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.cancel();
        Ok(())
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        *self.remote_addr.lock()
    }
}

/// Payload reader that fails on first use.
pub struct BrokenReader;

impl AsyncRead for BrokenReader {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "payload truncated",
        )))
    }
}

/// [`Connector`] that hands out prepared results in order.
#[derive(Default)]
pub struct MockConnector {
    results: Mutex<VecDeque<WebSocketResult<Arc<MockTransport>>>>,
    dials: Mutex<Vec<(String, HeaderMap)>>,
}

impl MockConnector {
    /// Create a connector with nothing queued.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a transport for the next dial.
    pub fn push_transport(&self, transport: Arc<MockTransport>) {
        self.results.lock().push_back(Ok(transport));
    }

    /// Queue a failure for the next dial.
    pub fn push_error(&self, error: WebSocketError) {
        self.results.lock().push_back(Err(error));
    }

    /// URLs and headers of every dial so far.
    pub fn dials(&self) -> Vec<(String, HeaderMap)> {
        self.dials.lock().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn dial(&self, url: &str, headers: &HeaderMap) -> WebSocketResult<Arc<dyn Transport>> {
        self.dials.lock().push((url.to_string(), headers.clone()));
        match self.results.lock().pop_front() {
            Some(Ok(transport)) => Ok(transport as Arc<dyn Transport>),
            Some(Err(e)) => Err(e),
            None => Err(WebSocketError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connection refused",
            ))),
        }
    }
}
