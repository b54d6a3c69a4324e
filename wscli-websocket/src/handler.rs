//! Delivery callback trait for inbound frames.

use crate::connection::Connection;
use crate::error::WebSocketError;
use crate::message::InboundFrame;
use async_trait::async_trait;

/// Trait for consuming what the read pump receives.
///
/// Implement this trait to decide what happens with each inbound frame and
/// whether the read pump keeps running.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Called once per receive attempt.
    ///
    /// # Arguments
    /// * `connection` - The connection the frame arrived on
    /// * `frame` - The received frame, or the error the receive ended with
    ///
    /// # Returns
    /// `true` to keep reading, `false` to stop the read pump
    async fn on_frame(
        &self,
        connection: &Connection,
        frame: Result<InboundFrame, &WebSocketError>,
    ) -> bool;
}
