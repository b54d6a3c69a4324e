// wscli - an interactive command-line client for a single websocket connection
//
// The binary lives in `wscli-cli`; this crate re-exports the libraries it is
// built from so they can be used and tested on their own.

// Re-export the connection layer
pub use wscli_websocket::*;

// Re-export logging setup
pub use wscli_log;

pub use wscli_websocket;
