//! # wscli WebSocket
//!
//! Client-side WebSocket connection handling using tokio-tungstenite.
//!
//! ## Features
//!
//! - Dialing `ws://` and `wss://` endpoints with custom handshake headers
//! - A connection handler running a read pump and an optional probe pump
//! - Serialized writes shared by user messages, probes and ping replies
//! - Read and write deadlines with automatic renewal on inbound pings
//! - Idempotent close with a wait that reports each pump's final error
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use tokio::io::AsyncReadExt;
//! use wscli_websocket::{
//!     Connection, ConnectionHandler, Dialer, HandlerConfig, InboundFrame, MessageHandler,
//!     WebSocketError,
//! };
//!
//! struct Printer;
//!
//! #[async_trait]
//! impl MessageHandler for Printer {
//!     async fn on_frame(
//!         &self,
//!         _connection: &Connection,
//!         frame: Result<InboundFrame, &WebSocketError>,
//!     ) -> bool {
//!         let Ok(mut frame) = frame else { return false };
//!         let mut text = String::new();
//!         if frame.payload.read_to_string(&mut text).await.is_err() {
//!             return false;
//!         }
//!         print!("{}", text);
//!         true
//!     }
//! }
//!
//! # async fn run() -> wscli_websocket::WebSocketResult<()> {
//! let transport = Dialer::new().connect("ws://localhost:8080/ws", &Default::default()).await?;
//! let mut handler =
//!     ConnectionHandler::start(Some(Arc::new(transport)), HandlerConfig::new(), Arc::new(Printer))?;
//! handler.send_text("hello\n").await?;
//! handler.close().await?;
//! handler.wait().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod client;
mod connection;
mod error;
mod handler;
mod message;
mod pump;
mod transport;

#[cfg(any(test, feature = "testing"))]
pub mod mock;

pub use client::{Dialer, TungsteniteTransport};
pub use connection::{Connection, ConnectionId, ConnectionState};
pub use error::{WebSocketError, WebSocketResult};
pub use handler::MessageHandler;
pub use message::{InboundFrame, Message, MessageType, PayloadReader};
pub use pump::{ConnectionHandler, HandlerConfig, PumpErrors};
pub use transport::{Connector, PingCallback, Transport};

// Re-export commonly used types from tungstenite
pub use tungstenite::Message as RawMessage;
