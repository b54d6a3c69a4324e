//! WebSocket message types.

use crate::error::WebSocketError;
use bytes::Bytes;
use std::fmt;
use std::io::Cursor;
use tokio::io::AsyncRead;
use tungstenite::Utf8Bytes;

/// Message type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Text message
    Text,
    /// Binary message
    Binary,
    /// Ping message
    Ping,
    /// Pong message
    Pong,
    /// Close message
    Close,
}

impl MessageType {
    /// Whether this is a control frame (ping, pong or close).
    pub fn is_control(&self) -> bool {
        matches!(self, MessageType::Ping | MessageType::Pong | MessageType::Close)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::Text => "text",
            MessageType::Binary => "binary",
            MessageType::Ping => "ping",
            MessageType::Pong => "pong",
            MessageType::Close => "close",
        };
        f.write_str(name)
    }
}

/// An outbound WebSocket message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// The message type
    pub message_type: MessageType,
    /// The message payload
    pub payload: Bytes,
}

impl Message {
    /// Create a message of the given type.
    pub fn new<B: Into<Bytes>>(message_type: MessageType, payload: B) -> Self {
        Self {
            message_type,
            payload: payload.into(),
        }
    }

    /// Create a new text message.
    pub fn text<B: Into<Bytes>>(text: B) -> Self {
        Self::new(MessageType::Text, text)
    }

    /// Create a new ping message.
    pub fn ping<B: Into<Bytes>>(data: B) -> Self {
        Self::new(MessageType::Ping, data)
    }

    /// Create a new pong message.
    pub fn pong<B: Into<Bytes>>(data: B) -> Self {
        Self::new(MessageType::Pong, data)
    }

    /// Get the message payload as bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.payload
    }
}

impl TryFrom<Message> for tungstenite::Message {
    type Error = WebSocketError;

    /// Fails for a text message whose payload is not valid UTF-8; the
    /// payload is never rewritten.
    fn try_from(msg: Message) -> Result<Self, Self::Error> {
        Ok(match msg.message_type {
            MessageType::Text => tungstenite::Message::Text(Utf8Bytes::try_from(msg.payload)?),
            MessageType::Binary => tungstenite::Message::Binary(msg.payload),
            MessageType::Ping => tungstenite::Message::Ping(msg.payload),
            MessageType::Pong => tungstenite::Message::Pong(msg.payload),
            MessageType::Close => tungstenite::Message::Close(None),
        })
    }
}

/// Readable payload of an inbound frame.
pub type PayloadReader = Box<dyn AsyncRead + Send + Unpin>;

/// A received data frame: its type and a stream over its payload.
pub struct InboundFrame {
    /// The message type
    pub message_type: MessageType,
    /// The payload, read to completion by the consumer
    pub payload: PayloadReader,
}

impl InboundFrame {
    /// Create a frame from an in-memory payload.
    pub fn from_bytes<B: Into<Bytes>>(message_type: MessageType, payload: B) -> Self {
        Self {
            message_type,
            payload: Box::new(Cursor::new(payload.into())),
        }
    }

    /// Create a frame whose payload is read from an arbitrary stream.
    pub fn from_reader<R>(message_type: MessageType, reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            message_type,
            payload: Box::new(reader),
        }
    }
}

impl fmt::Debug for InboundFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundFrame")
            .field("message_type", &self.message_type)
            .finish_non_exhaustive()
    }
}
