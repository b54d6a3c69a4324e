//! The connection primitive consumed by the handler.
//!
//! A [`Transport`] is an established, full-duplex, message-framed connection.
//! The handler never touches the socket directly; everything it needs
//! (framed sends, blocking receives, deadlines, the inbound ping hook and
//! close) goes through this trait, which keeps the pumps testable against
//! [`crate::mock::MockTransport`].

use crate::error::WebSocketResult;
use crate::message::{InboundFrame, Message};
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use http::HeaderMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::Instant;

/// Callback invoked with the payload of every ping received from the peer.
///
/// An error returned here is surfaced from [`Transport::next_frame`].
pub type PingCallback = Arc<dyn Fn(Bytes) -> BoxFuture<'static, WebSocketResult<()>> + Send + Sync>;

/// An established message-framed connection.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Place one frame on the wire.
    async fn send_frame(&self, message: Message) -> WebSocketResult<()>;

    /// Block until the next text or binary frame arrives.
    ///
    /// Control frames are consumed here: pings are handed to the callback
    /// installed with [`Transport::on_inbound_ping`], pongs are dropped, and a
    /// close frame ends the stream with [`crate::WebSocketError::PeerClosed`].
    async fn next_frame(&self) -> WebSocketResult<InboundFrame>;

    /// Set the absolute deadline for reads; `None` clears it.
    fn set_read_deadline(&self, deadline: Option<Instant>) -> WebSocketResult<()>;

    /// Set the absolute deadline for writes; `None` clears it.
    fn set_write_deadline(&self, deadline: Option<Instant>) -> WebSocketResult<()>;

    /// Install the handler for inbound pings, replacing any previous one.
    fn on_inbound_ping(&self, callback: PingCallback);

    /// Close the connection. Interrupts a pending [`Transport::next_frame`].
    async fn close(&self) -> WebSocketResult<()>;

    /// Address of the peer, when known.
    fn remote_addr(&self) -> Option<SocketAddr>;
}

/// Something that can open a [`Transport`] to a URL.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Dial `url`, sending `headers` with the upgrade request.
    async fn dial(&self, url: &str, headers: &HeaderMap) -> WebSocketResult<Arc<dyn Transport>>;
}
