//! Access policy for the WebSocket relay
//!
//! Every upgrade request that reaches the relay is checked twice before any
//! socket is opened:
//!
//! - **Origin**: the browser-supplied `Origin` header must name a host from a
//!   fixed allow-list (`localhost`, the site domain and its `www.` alias).
//! - **Target**: the requested TCP destination must not be a loopback,
//!   private-use or unspecified address, so untrusted page script cannot use
//!   the relay to reach the relay host's own network (SSRF).
//!
//! Host names are not resolved here; the relay's dialer re-applies
//! [`is_disallowed_ip`] to every address a name resolves to.

pub mod origin;
pub mod policy;
pub mod target;

pub use origin::{origin_host, OriginAllowList};
pub use policy::AccessPolicy;
pub use target::{is_disallowed_ip, is_disallowed_target};

use thiserror::Error;

/// Reasons a relay request is refused before it is upgraded
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("missing Origin header")]
    MissingOrigin,

    #[error("malformed Origin header: {0}")]
    MalformedOrigin(String),

    #[error("origin host '{host}' is not allowed")]
    OriginNotAllowed { host: String },

    #[error("target '{target}' is a loopback, private or unspecified address")]
    TargetNotAllowed { target: String },
}

/// Result type for policy checks
pub type PolicyResult<T> = Result<T, PolicyError>;
