//! WebSocket client implementation.

use crate::error::{WebSocketError, WebSocketResult};
use crate::message::{InboundFrame, Message, MessageType};
use crate::transport::{Connector, PingCallback, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use http::HeaderMap;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, client_async_tls_with_config};
use tokio_util::sync::CancellationToken;
use tungstenite::client::IntoClientRequest;
use tungstenite::protocol::WebSocketConfig;
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long a local close waits for the close frame to be flushed.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Dials WebSocket servers.
#[derive(Debug, Clone)]
pub struct Dialer {
    connect_timeout: Duration,
    max_message_size: Option<usize>,
}

impl Default for Dialer {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(45),
            max_message_size: None,
        }
    }
}

impl Dialer {
    /// Create a dialer with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the timeout covering TCP connect, TLS and the upgrade handshake.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the maximum inbound message size.
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = Some(size);
        self
    }

    /// Connect to `url`, sending `headers` with the upgrade request.
    pub async fn connect(
        &self,
        url: &str,
        headers: &HeaderMap,
    ) -> WebSocketResult<TungsteniteTransport> {
        let url = Url::parse(url).map_err(|e| WebSocketError::InvalidUrl(e.to_string()))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(WebSocketError::InvalidUrl(format!(
                "unsupported scheme '{}'",
                url.scheme()
            )));
        }
        let host = url
            .host_str()
            .ok_or_else(|| WebSocketError::InvalidUrl("missing host".to_string()))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| WebSocketError::InvalidUrl("missing port".to_string()))?;

        let mut request = url.as_str().into_client_request()?;
        for (name, value) in headers {
            request.headers_mut().append(name.clone(), value.clone());
        }

        let mut config = WebSocketConfig::default();
        if let Some(size) = self.max_message_size {
            config.max_message_size = Some(size);
        }

        let address = format!("{}:{}", host, port);
        let handshake = async {
            let tcp = TcpStream::connect(address.as_str()).await?;
            let remote_addr = tcp.peer_addr().ok();
            tcp.set_nodelay(true)?;
            let (stream, _response) = client_async_tls_with_config(request, tcp, Some(config), None)
                .await
                .map_err(handshake_error)?;
            Ok::<_, WebSocketError>((stream, remote_addr))
        };

        let (stream, remote_addr) = tokio::time::timeout(self.connect_timeout, handshake)
            .await
            .map_err(|_| WebSocketError::Timeout)??;

        tracing::debug!(url = %url, remote_addr = ?remote_addr, "WebSocket handshake complete");

        Ok(TungsteniteTransport::new(stream, remote_addr))
    }
}

#[async_trait]
impl Connector for Dialer {
    async fn dial(&self, url: &str, headers: &HeaderMap) -> WebSocketResult<Arc<dyn Transport>> {
        let transport = self.connect(url, headers).await?;
        Ok(Arc::new(transport))
    }
}

fn handshake_error(err: tungstenite::Error) -> WebSocketError {
    match err {
        tungstenite::Error::Http(response) => WebSocketError::Rejected {
            status: response.status(),
        },
        other => WebSocketError::Protocol(other),
    }
}

/// Run `fut`, failing with [`WebSocketError::Timeout`] once `deadline` passes.
async fn within<F, T>(deadline: Option<Instant>, fut: F) -> WebSocketResult<T>
where
    F: Future<Output = WebSocketResult<T>>,
{
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, fut)
            .await
            .map_err(|_| WebSocketError::Timeout)?,
        None => fut.await,
    }
}

/// [`Transport`] over a tokio-tungstenite stream.
///
/// The two halves are locked independently so a blocked read never holds up
/// a write. Deadlines persist until replaced.
pub struct TungsteniteTransport {
    sink: tokio::sync::Mutex<SplitSink<WsStream, tungstenite::Message>>,
    stream: tokio::sync::Mutex<SplitStream<WsStream>>,
    read_deadline: Mutex<Option<Instant>>,
    write_deadline: Mutex<Option<Instant>>,
    ping_callback: RwLock<Option<PingCallback>>,
    closed: CancellationToken,
    remote_addr: Option<SocketAddr>,
}

impl TungsteniteTransport {
    /// Wrap an established stream.
    pub fn new(stream: WsStream, remote_addr: Option<SocketAddr>) -> Self {
        let (sink, stream) = stream.split();
        Self {
            sink: tokio::sync::Mutex::new(sink),
            stream: tokio::sync::Mutex::new(stream),
            read_deadline: Mutex::new(None),
            write_deadline: Mutex::new(None),
            ping_callback: RwLock::new(None),
            closed: CancellationToken::new(),
            remote_addr,
        }
    }
}

#[async_trait]
impl Transport for TungsteniteTransport {
    async fn send_frame(&self, message: Message) -> WebSocketResult<()> {
        if self.closed.is_cancelled() {
            return Err(WebSocketError::ConnectionClosed);
        }
        let deadline = *self.write_deadline.lock();
        let raw = tungstenite::Message::try_from(message)?;

        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(WebSocketError::ConnectionClosed),
            sent = within(deadline, async {
                let mut sink = self.sink.lock().await;
                sink.send(raw).await.map_err(WebSocketError::from)
            }) => sent,
        }
    }

    async fn next_frame(&self) -> WebSocketResult<InboundFrame> {
        let mut stream = self.stream.lock().await;

        loop {
            // re-read each round: the ping callback may have renewed it
            let deadline = *self.read_deadline.lock();
            let next = tokio::select! {
                biased;
                _ = self.closed.cancelled() => return Err(WebSocketError::ConnectionClosed),
                next = within(deadline, async { Ok(stream.next().await) }) => next?,
            };

            match next {
                None => return Err(WebSocketError::ConnectionClosed),
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(tungstenite::Message::Text(text))) => {
                    return Ok(InboundFrame::from_bytes(
                        MessageType::Text,
                        Bytes::copy_from_slice(text.as_str().as_bytes()),
                    ));
                }
                Some(Ok(tungstenite::Message::Binary(data))) => {
                    return Ok(InboundFrame::from_bytes(MessageType::Binary, data));
                }
                Some(Ok(tungstenite::Message::Ping(data))) => {
                    let callback = self.ping_callback.read().clone();
                    if let Some(callback) = callback {
                        callback(data).await?;
                    }
                }
                Some(Ok(tungstenite::Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.as_str().to_string()))
                        .unwrap_or((1005, String::new()));
                    return Err(WebSocketError::PeerClosed { code, reason });
                }
                Some(Ok(tungstenite::Message::Pong(_) | tungstenite::Message::Frame(_))) => {}
            }
        }
    }

    fn set_read_deadline(&self, deadline: Option<Instant>) -> WebSocketResult<()> {
        *self.read_deadline.lock() = deadline;
        Ok(())
    }

    fn set_write_deadline(&self, deadline: Option<Instant>) -> WebSocketResult<()> {
        *self.write_deadline.lock() = deadline;
        Ok(())
    }

    fn on_inbound_ping(&self, callback: PingCallback) {
        *self.ping_callback.write() = Some(callback);
    }

    async fn close(&self) -> WebSocketResult<()> {
        if self.closed.is_cancelled() {
            return Ok(());
        }
        self.closed.cancel();

        let flush = async {
            let mut sink = self.sink.lock().await;
            sink.close().await
        };

        match tokio::time::timeout(CLOSE_GRACE, flush).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                let err = WebSocketError::from(e);
                if err.is_closed() {
                    Ok(())
                } else {
                    Err(err)
                }
            }
            Err(_) => {
                tracing::debug!(remote_addr = ?self.remote_addr, "close frame not flushed in time");
                Ok(())
            }
        }
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }
}

impl fmt::Debug for TungsteniteTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TungsteniteTransport")
            .field("remote_addr", &self.remote_addr)
            .field("closed", &self.closed.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_invalid_url_returns_error() {
        let result = Dialer::new().connect("not-a-url", &HeaderMap::new()).await;
        assert!(matches!(result, Err(WebSocketError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_connect_rejects_http_scheme() {
        let result = Dialer::new()
            .connect("http://127.0.0.1:8080/ws", &HeaderMap::new())
            .await;
        assert!(matches!(result, Err(WebSocketError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_connect_unreachable_host_returns_error() {
        let result = Dialer::new()
            .connect_timeout(Duration::from_secs(5))
            .connect("ws://127.0.0.1:1/ws", &HeaderMap::new())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_within_times_out() {
        let deadline = Instant::now() + Duration::from_millis(10);
        let result: WebSocketResult<()> = within(Some(deadline), std::future::pending()).await;
        assert!(matches!(result, Err(WebSocketError::Timeout)));
    }

    #[tokio::test]
    async fn test_within_without_deadline() {
        let result = within(None, async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
