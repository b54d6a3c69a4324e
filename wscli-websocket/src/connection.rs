//! WebSocket connection management.

use crate::error::{WebSocketError, WebSocketResult};
use crate::message::Message;
use crate::transport::Transport;
use bytes::Bytes;
use parking_lot::RwLock;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Unique identifier for a connection.
pub type ConnectionId = String;

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connection is open and ready
    Open,
    /// Close has been requested, pumps are winding down
    Closing,
    /// Pumps have finished and the transport was released
    Closed,
}

struct ConnectionInner {
    id: ConnectionId,
    remote_addr: Option<SocketAddr>,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    read_timeout: Duration,
    write_timeout: Duration,
    /// Every outbound frame is written while holding this lock.
    write_lock: tokio::sync::Mutex<()>,
    shutdown: CancellationToken,
    state: RwLock<ConnectionState>,
}

/// A WebSocket connection shared between the handler, its pumps and the
/// delivery callback.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Create a new connection.
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        read_timeout: Duration,
        write_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                id: uuid::Uuid::new_v4().to_string(),
                remote_addr: transport.remote_addr(),
                transport: RwLock::new(Some(transport)),
                read_timeout,
                write_timeout,
                write_lock: tokio::sync::Mutex::new(()),
                shutdown: CancellationToken::new(),
                state: RwLock::new(ConnectionState::Open),
            }),
        }
    }

    /// Unique connection identifier.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Remote address of the peer.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.remote_addr
    }

    /// Get the connection state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.read()
    }

    /// Whether close has been requested.
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// The underlying transport, or `NilConnection` once released.
    pub(crate) fn transport(&self) -> WebSocketResult<Arc<dyn Transport>> {
        self.inner
            .transport
            .read()
            .clone()
            .ok_or(WebSocketError::NilConnection)
    }

    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.inner.shutdown
    }

    /// Send a message to this connection.
    ///
    /// Writes are serialized: the call waits for any in-flight write (user
    /// message, probe or probe reply) before placing its own frame.
    pub async fn send(&self, message: Message) -> WebSocketResult<()> {
        let transport = self.transport()?;

        let _guard = self.inner.write_lock.lock().await;
        if !self.inner.write_timeout.is_zero() {
            transport.set_write_deadline(Some(Instant::now() + self.inner.write_timeout))?;
        }
        transport.send_frame(message).await
    }

    /// Send a text message.
    pub async fn send_text<B: Into<Bytes>>(&self, text: B) -> WebSocketResult<()> {
        self.send(Message::text(text)).await
    }

    /// Close the connection without waiting for the pumps.
    ///
    /// The close signal fires at most once no matter how often this is
    /// called; the transport is closed even when deadlines are in use.
    pub async fn close(&self) -> WebSocketResult<()> {
        self.inner.shutdown.cancel();
        {
            let mut state = self.inner.state.write();
            if *state == ConnectionState::Open {
                *state = ConnectionState::Closing;
            }
        }

        let transport = self.transport()?;
        transport.close().await
    }

    /// Push the read deadline out by the configured read timeout.
    pub(crate) fn renew_read_deadline(&self, transport: &dyn Transport) -> WebSocketResult<()> {
        if self.inner.read_timeout.is_zero() {
            return Ok(());
        }
        transport.set_read_deadline(Some(Instant::now() + self.inner.read_timeout))
    }

    /// Drop the transport reference and mark the connection closed.
    pub(crate) fn detach(&self) {
        self.inner.transport.write().take();
        *self.inner.state.write() = ConnectionState::Closed;
    }

    pub(crate) fn downgrade(&self) -> WeakConnection {
        WeakConnection {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("remote_addr", &self.inner.remote_addr)
            .field("state", &self.state())
            .finish()
    }
}

/// Non-owning handle used by the transport's ping callback.
#[derive(Clone)]
pub(crate) struct WeakConnection {
    inner: Weak<ConnectionInner>,
}

impl WeakConnection {
    pub(crate) fn upgrade(&self) -> Option<Connection> {
        self.inner.upgrade().map(|inner| Connection { inner })
    }
}
