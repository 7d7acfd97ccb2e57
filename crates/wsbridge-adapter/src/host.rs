//! Host environment seam
//!
//! The adapter never talks to a concrete socket API. A [`Host`] opens sockets
//! whose callbacks feed an [`EventSender`], and runs the adapter's dispatch
//! loop on its local executor. The browser implementation lives in
//! `browser`; tests provide an in-memory one.

use crate::error::AdapterResult;
use crate::event::EventSender;
use futures::future::LocalBoxFuture;

/// A callback-driven socket owned by the host environment
pub trait HostSocket: 'static {
    /// Send one payload as a single binary message.
    fn send(&self, data: &[u8]) -> AdapterResult<()>;

    /// Detach every callback and ask the host to close the socket.
    ///
    /// The adapter calls this at most once per socket.
    fn close(&self);
}

/// The environment the adapter runs in
pub trait Host {
    type Socket: HostSocket;

    /// Start opening a socket to `url`. Every subsequent callback must be
    /// forwarded to `events` as exactly one [`crate::TransportEvent`].
    fn open(&self, url: &str, events: EventSender) -> AdapterResult<Self::Socket>;

    /// Run `task` on the host's single-threaded executor.
    fn spawn_local(&self, task: LocalBoxFuture<'static, ()>);
}
