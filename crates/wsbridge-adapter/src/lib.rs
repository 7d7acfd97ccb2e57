//! Client-side transport adapter for the WebSocket relay
//!
//! Browser WebSockets are callback driven: the page registers `onopen`,
//! `onmessage`, `onerror` and `onclose` handlers and the socket calls them
//! whenever it likes. Protocol libraries, on the other hand, want a plain
//! byte stream they can read from and write to. [`TransportAdapter`] sits in
//! between.
//!
//! # Usage
//!
//! ```ignore
//! use wsbridge_adapter::{connect, target_url, BrowserHost, CancellationToken};
//!
//! let url = target_url("wss://relay.example.com/ws", "ssh.example.com", 22);
//! let stream = connect(&BrowserHost, &url, &CancellationToken::new()).await?;
//! stream.write(b"SSH-2.0-client\r\n").await?;
//! ```
//!
//! The stream implements `tokio::io::AsyncRead` and `AsyncWrite`, so it can be
//! handed to any tokio-based protocol implementation.

pub mod adapter;
pub mod address;
pub mod error;
pub mod event;
pub mod host;

#[cfg(target_arch = "wasm32")]
pub mod browser;

pub use adapter::{connect, connect_url, TransportAdapter};
pub use address::target_url;
pub use error::{AdapterError, AdapterResult};
pub use event::{ClosePayload, ErrorPayload, EventSender, TransportEvent};
pub use host::{Host, HostSocket};

#[cfg(target_arch = "wasm32")]
pub use browser::{BrowserHost, BrowserSocket};

/// Re-exported so callers can cancel [`connect`] without depending on
/// `tokio-util` themselves.
pub use tokio_util::sync::CancellationToken;
