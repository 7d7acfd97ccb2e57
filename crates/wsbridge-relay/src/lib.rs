//! WebSocket to TCP relay
//!
//! Browsers cannot open raw TCP connections, so the relay accepts a
//! WebSocket at `/ws/{server}/{port}`, dials `server:port` and shuttles bytes
//! in both directions until either side goes away.
//!
//! # Architecture
//!
//! ```text
//! Browser ──WebSocket──► RelayServer (axum) ──► RelaySession
//!                                                  ├─ copy: peer → target
//!                                                  ├─ copy: target → peer
//!                                                  ├─ keepalive (Ping every 20s)
//!                                                  └─ byte counter
//! ```
//!
//! Requests are filtered by [`wsbridge_policy::AccessPolicy`] before the
//! upgrade; nothing is dialed for a refused request.

pub mod config;
pub mod copy;
pub mod dialer;
pub mod io;
pub mod listener;
pub mod session;

pub use config::RelayConfig;
pub use copy::copy_data;
pub use dialer::{Dialer, TcpDialer};
pub use io::{ByteSink, ByteSource, PingSink, WsReader, WsWriter};
pub use listener::{bind, serve, RelayServer, RELAY_ROUTE};
pub use session::{RelaySession, SessionSummary};

use thiserror::Error;

/// Relay errors
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timed out dialing {target} after {seconds}s")]
    DialTimeout { target: String, seconds: u64 },

    #[error("Failed to dial {target}: {reason}")]
    Dial { target: String, reason: String },

    #[error("Target {target} refused: {reason}")]
    TargetRejected { target: String, reason: String },

    #[error("Failed to bind to {address}:{port}: {reason}")]
    BindError {
        address: String,
        port: u16,
        reason: String,
    },
}

/// Result type for relay operations
pub type RelayResult<T> = Result<T, RelayError>;
