//! Connection handler: the read and probe pumps and their shutdown.
//!
//! A [`ConnectionHandler`] owns one [`Transport`] and runs up to two tasks
//! against it:
//!
//! - the **read pump**, which receives frames and hands each one (or the
//!   receive error) to a [`MessageHandler`];
//! - the **probe pump**, which sends a ping every `probe_interval`.
//!
//! Both tasks watch a shared close signal and each other's completion
//! signal, so when one of them ends the other follows at its next
//! scheduling point. Every outbound frame, including probes and replies to
//! inbound pings, goes through [`Connection::send`] and its write lock.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use wscli_websocket::{ConnectionHandler, Dialer, HandlerConfig, MessageHandler};
//!
//! # async fn run(sink: Arc<dyn MessageHandler>) -> wscli_websocket::WebSocketResult<()> {
//! let transport = Dialer::new().connect("ws://127.0.0.1:8080/ws", &Default::default()).await?;
//! let config = HandlerConfig::new().read_timeout(Duration::from_secs(10));
//! let mut handler = ConnectionHandler::start(Some(Arc::new(transport)), config, sink)?;
//!
//! handler.send_text("hello\n").await?;
//! handler.close().await?;
//! let errors = handler.wait().await;
//! assert!(errors.is_clean());
//! # Ok(())
//! # }
//! ```

use crate::connection::{Connection, WeakConnection};
use crate::error::{WebSocketError, WebSocketResult};
use crate::handler::MessageHandler;
use crate::message::Message;
use crate::transport::{PingCallback, Transport};
use bytes::Bytes;
use futures::future::BoxFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Timing configuration for a [`ConnectionHandler`].
///
/// A zero duration disables the corresponding feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HandlerConfig {
    /// Interval between outbound pings; zero disables the probe pump
    pub probe_interval: Duration,
    /// Read deadline renewed before every receive
    pub read_timeout: Duration,
    /// Write deadline set before every send
    pub write_timeout: Duration,
}

impl HandlerConfig {
    /// All timers disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the probe interval.
    pub fn probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    /// Set the read timeout.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the write timeout.
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }
}

/// Final errors of the two pumps, as returned by [`ConnectionHandler::wait`].
#[derive(Debug, Default)]
pub struct PumpErrors {
    /// Error the read pump stopped with
    pub reader: Option<WebSocketError>,
    /// Error the probe pump stopped with (always `None` when probing is off)
    pub prober: Option<WebSocketError>,
}

impl PumpErrors {
    /// Whether both pumps stopped cleanly.
    pub fn is_clean(&self) -> bool {
        self.reader.is_none() && self.prober.is_none()
    }

    /// Iterate over the recorded errors, reader first.
    pub fn iter(&self) -> impl Iterator<Item = &WebSocketError> {
        self.reader.iter().chain(self.prober.iter())
    }
}

type PumpHandle = JoinHandle<Option<WebSocketError>>;

/// Supervises the pumps of one connection.
pub struct ConnectionHandler {
    connection: Connection,
    reader: Option<PumpHandle>,
    prober: Option<PumpHandle>,
}

impl ConnectionHandler {
    /// Start the pumps for `transport`.
    ///
    /// Must be called from within a Tokio runtime. Fails with
    /// [`WebSocketError::NilConnection`] when no transport is given.
    pub fn start(
        transport: Option<Arc<dyn Transport>>,
        config: HandlerConfig,
        handler: Arc<dyn MessageHandler>,
    ) -> WebSocketResult<Self> {
        let transport = transport.ok_or(WebSocketError::NilConnection)?;
        let connection = Connection::new(
            Arc::clone(&transport),
            config.read_timeout,
            config.write_timeout,
        );

        let reader_done = CancellationToken::new();
        let prober_done = CancellationToken::new();

        transport.on_inbound_ping(ping_reply(connection.downgrade()));

        let prober = if config.probe_interval.is_zero() {
            None
        } else {
            Some(tokio::spawn(probe_pump(
                connection.clone(),
                config.probe_interval,
                reader_done.clone(),
                prober_done.clone(),
            )))
        };

        let reader = tokio::spawn(read_pump(
            connection.clone(),
            transport,
            handler,
            prober_done,
            reader_done,
        ));

        tracing::debug!(
            connection_id = %connection.id(),
            remote_addr = ?connection.remote_addr(),
            probe_interval = ?config.probe_interval,
            read_timeout = ?config.read_timeout,
            write_timeout = ?config.write_timeout,
            "connection handler started"
        );

        Ok(Self {
            connection,
            reader: Some(reader),
            prober,
        })
    }

    /// The shared connection.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Remote address of the peer.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.connection.remote_addr()
    }

    /// Send one frame through the serialized write path.
    pub async fn send(&self, message: Message) -> WebSocketResult<()> {
        self.connection.send(message).await
    }

    /// Send a text frame.
    pub async fn send_text<B: Into<Bytes>>(&self, text: B) -> WebSocketResult<()> {
        self.connection.send_text(text).await
    }

    /// Signal both pumps to stop and close the transport. Does not wait.
    pub async fn close(&self) -> WebSocketResult<()> {
        self.connection.close().await
    }

    /// Wait for both pumps to finish and release the transport.
    ///
    /// Calling this again returns immediately with no errors.
    pub async fn wait(&mut self) -> PumpErrors {
        let mut errors = PumpErrors::default();
        if let Some(reader) = self.reader.take() {
            errors.reader = join_pump(reader).await;
        }
        if let Some(prober) = self.prober.take() {
            errors.prober = join_pump(prober).await;
        }
        self.connection.detach();
        errors
    }
}

impl Drop for ConnectionHandler {
    fn drop(&mut self) {
        // pumps of a handler dropped without wait() must not outlive it
        self.connection.shutdown_token().cancel();
    }
}

async fn join_pump(handle: PumpHandle) -> Option<WebSocketError> {
    match handle.await {
        Ok(error) => error,
        Err(e) => Some(WebSocketError::Task(e.to_string())),
    }
}

/// Reply to inbound pings through the write lock and renew the read deadline.
fn ping_reply(connection: WeakConnection) -> PingCallback {
    Arc::new(move |payload: Bytes| -> BoxFuture<'static, WebSocketResult<()>> {
        let connection = connection.clone();
        Box::pin(async move {
            let connection = connection.upgrade().ok_or(WebSocketError::NilConnection)?;
            connection.send(Message::pong(payload)).await?;
            let transport = connection.transport()?;
            connection.renew_read_deadline(transport.as_ref())
        })
    })
}

async fn read_pump(
    connection: Connection,
    transport: Arc<dyn Transport>,
    handler: Arc<dyn MessageHandler>,
    prober_done: CancellationToken,
    reader_done: CancellationToken,
) -> Option<WebSocketError> {
    let _done = reader_done.drop_guard();
    let shutdown = connection.shutdown_token().clone();
    let mut last_error = None;

    loop {
        if shutdown.is_cancelled() || prober_done.is_cancelled() {
            break;
        }
        if let Err(e) = connection.renew_read_deadline(transport.as_ref()) {
            last_error = Some(e);
            break;
        }

        let received = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = prober_done.cancelled() => break,
            received = transport.next_frame() => received,
        };

        match received {
            Ok(frame) => {
                last_error = None;
                if !handler.on_frame(&connection, Ok(frame)).await {
                    break;
                }
            }
            Err(e) => {
                let keep_reading = handler.on_frame(&connection, Err(&e)).await;
                // a receive cut short by our own close is not a failure
                last_error = if shutdown.is_cancelled() { None } else { Some(e) };
                if !keep_reading {
                    break;
                }
            }
        }
    }

    tracing::debug!(
        connection_id = %connection.id(),
        error = ?last_error,
        "read pump stopped"
    );
    last_error
}

async fn probe_pump(
    connection: Connection,
    interval: Duration,
    reader_done: CancellationToken,
    prober_done: CancellationToken,
) -> Option<WebSocketError> {
    let _done = prober_done.drop_guard();
    let shutdown = connection.shutdown_token().clone();

    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let error = loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break None,
            _ = reader_done.cancelled() => break None,
            _ = ticker.tick() => {
                tracing::trace!(connection_id = %connection.id(), "sending probe");
                if let Err(e) = connection.send(Message::ping(Bytes::new())).await {
                    break if shutdown.is_cancelled() { None } else { Some(e) };
                }
            }
        }
    };

    tracing::debug!(
        connection_id = %connection.id(),
        error = ?error,
        "probe pump stopped"
    );
    error
}
