//! Stream adapter over a callback-driven host socket
//!
//! A single dispatch loop turns queued host events into a receive buffer;
//! readers drain that buffer and park on a waker list when it is empty.
//! Writes go straight to the host socket.

use crate::error::{AdapterError, AdapterResult};
use crate::event::{event_queue, EventQueue, TransportEvent, EVENT_QUEUE_CAPACITY};
use crate::host::{Host, HostSocket};
use bytes::{Buf, BytesMut};
use std::future::poll_fn;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll, Waker};
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

#[derive(Debug, Default)]
struct State {
    buffer: BytesMut,
    terminal_error: Option<AdapterError>,
    read_wakers: Vec<Waker>,
}

struct Shared<S> {
    url: String,
    socket: S,
    lifecycle: CancellationToken,
    socket_closed: AtomicBool,
    state: Mutex<State>,
}

impl<S: HostSocket> Shared<S> {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn append(&self, data: &[u8]) {
        let wakers = {
            let mut state = self.state();
            if state.terminal_error.is_some() || self.lifecycle.is_cancelled() {
                trace!("Discarding {} bytes received after close", data.len());
                return;
            }
            state.buffer.extend_from_slice(data);
            std::mem::take(&mut state.read_wakers)
        };
        wakers.into_iter().for_each(Waker::wake);
    }

    fn fail(&self, err: AdapterError) {
        let wakers = {
            let mut state = self.state();
            if state.terminal_error.is_none() {
                state.terminal_error = Some(err);
            }
            std::mem::take(&mut state.read_wakers)
        };
        wakers.into_iter().for_each(Waker::wake);
    }

    fn poll_read_into(&self, cx: &mut Context<'_>, out: &mut [u8]) -> Poll<AdapterResult<usize>> {
        if out.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let mut state = self.state();
        if !state.buffer.is_empty() {
            let n = state.buffer.len().min(out.len());
            out[..n].copy_from_slice(&state.buffer[..n]);
            state.buffer.advance(n);
            return Poll::Ready(Ok(n));
        }
        if let Some(err) = &state.terminal_error {
            return Poll::Ready(Err(err.clone()));
        }
        if self.lifecycle.is_cancelled() {
            return Poll::Ready(Ok(0));
        }

        if !state.read_wakers.iter().any(|w| w.will_wake(cx.waker())) {
            state.read_wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }

    fn write(&self, data: &[u8]) -> AdapterResult<usize> {
        if let Some(err) = &self.state().terminal_error {
            return Err(err.clone());
        }
        if self.lifecycle.is_cancelled() {
            return Err(AdapterError::ConnectionClosed);
        }

        self.socket.send(data)?;
        trace!("Sent {} bytes to {}", data.len(), self.url);
        Ok(data.len())
    }

    fn close(&self) -> AdapterResult<()> {
        self.lifecycle.cancel();
        self.release_socket();

        let (wakers, terminal_error) = {
            let mut state = self.state();
            (
                std::mem::take(&mut state.read_wakers),
                state.terminal_error.clone(),
            )
        };
        wakers.into_iter().for_each(Waker::wake);

        match terminal_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn release_socket(&self) {
        if !self.socket_closed.swap(true, Ordering::AcqRel) {
            debug!("Closing socket to {}", self.url);
            self.socket.close();
        }
    }
}

/// A connected relay stream
///
/// Cheap to clone; every clone refers to the same connection. Reads and
/// writes are also available through [`AsyncRead`] and [`AsyncWrite`].
pub struct TransportAdapter<S: HostSocket> {
    shared: Arc<Shared<S>>,
}

impl<S: HostSocket> Clone for TransportAdapter<S> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<S: HostSocket> std::fmt::Debug for TransportAdapter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportAdapter")
            .field("url", &self.shared.url)
            .field("closed", &self.shared.lifecycle.is_cancelled())
            .finish()
    }
}

/// Open a relay stream to `url` through `host`.
///
/// Resolves once the socket reports open. A failure or close before that, or
/// cancellation of `cancel`, closes the socket and is reported as an error.
pub async fn connect<H: Host>(
    host: &H,
    url: &str,
    cancel: &CancellationToken,
) -> AdapterResult<TransportAdapter<H::Socket>> {
    let lifecycle = CancellationToken::new();
    let (sender, mut queue) = event_queue(EVENT_QUEUE_CAPACITY, lifecycle.clone());

    let socket = host.open(url, sender)?;

    if let Err(err) = wait_for_open(&mut queue, cancel).await {
        warn!("Connect to {} failed: {}", url, err);
        lifecycle.cancel();
        socket.close();
        return Err(err);
    }
    debug!("Connected to {}", url);

    let adapter = TransportAdapter {
        shared: Arc::new(Shared {
            url: url.to_string(),
            socket,
            lifecycle,
            socket_closed: AtomicBool::new(false),
            state: Mutex::new(State::default()),
        }),
    };
    host.spawn_local(Box::pin(dispatch(adapter.shared.clone(), queue)));

    Ok(adapter)
}

/// [`connect`] without a caller-side cancellation.
pub async fn connect_url<H: Host>(host: &H, url: &str) -> AdapterResult<TransportAdapter<H::Socket>> {
    connect(host, url, &CancellationToken::new()).await
}

async fn next_event(
    queue: &mut EventQueue,
    cancel: &CancellationToken,
) -> AdapterResult<Option<TransportEvent>> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AdapterError::Cancelled),
        event = queue.recv() => Ok(event),
    }
}

async fn wait_for_open(queue: &mut EventQueue, cancel: &CancellationToken) -> AdapterResult<()> {
    loop {
        match next_event(queue, cancel).await? {
            Some(TransportEvent::Opened) => return Ok(()),
            Some(TransportEvent::Error(payload)) => {
                if let Some(message) = payload.message {
                    return Err(AdapterError::ConnectFailed(message));
                }
                // Hosts that hide the reason usually follow up with a close.
                return match next_event(queue, cancel).await? {
                    Some(TransportEvent::Closed(close)) => {
                        Err(AdapterError::ClosedBeforeOpen { code: close.code })
                    }
                    _ => Err(AdapterError::ConnectFailedSeeConsole),
                };
            }
            Some(TransportEvent::Closed(close)) => {
                return Err(AdapterError::ClosedBeforeOpen { code: close.code })
            }
            Some(TransportEvent::Data(data)) => {
                warn!("Ignoring {} bytes received before open", data.len());
            }
            None => return Err(AdapterError::ConnectFailedSeeConsole),
        }
    }
}

async fn dispatch<S: HostSocket>(shared: Arc<Shared<S>>, mut queue: EventQueue) {
    loop {
        let event = tokio::select! {
            biased;
            _ = shared.lifecycle.cancelled() => break,
            event = queue.recv() => event,
        };

        match event {
            Some(TransportEvent::Data(data)) => {
                trace!("Received {} bytes from {}", data.len(), shared.url);
                shared.append(&data);
            }
            Some(TransportEvent::Closed(close)) => {
                debug!(
                    "Connection to {} closed (code {}, reason {:?})",
                    shared.url, close.code, close.reason
                );
                shared.fail(AdapterError::ConnectionClosed);
                break;
            }
            Some(TransportEvent::Error(payload)) => {
                warn!("Transport error on {}: {}", shared.url, payload.describe());
                shared.fail(AdapterError::Transport(payload.describe()));
                break;
            }
            Some(TransportEvent::Opened) => trace!("Ignoring repeated open event"),
            None => {
                shared.fail(AdapterError::ConnectionClosed);
                break;
            }
        }
    }

    // Terminal error, if any, is already recorded.
    let _ = shared.close();
    trace!("Dispatch loop for {} finished", shared.url);
}

impl<S: HostSocket> TransportAdapter<S> {
    /// Read into `buf`.
    ///
    /// Buffered bytes come first, even after the connection failed; then the
    /// terminal error; then end of stream (`Ok(0)`) once closed.
    pub async fn read(&self, buf: &mut [u8]) -> AdapterResult<usize> {
        poll_fn(|cx| self.shared.poll_read_into(cx, &mut *buf)).await
    }

    /// Send `data` as one message and return its length.
    pub async fn write(&self, data: &[u8]) -> AdapterResult<usize> {
        self.shared.write(data)
    }

    /// Close the connection. Idempotent; returns the terminal error, if one
    /// was recorded, on every call.
    pub async fn close(&self) -> AdapterResult<()> {
        self.shared.close()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lifecycle.is_cancelled()
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    /// Accepted and ignored; reads and writes never time out.
    pub fn set_deadline(&self, _deadline: Option<Instant>) {}

    /// Accepted and ignored.
    pub fn set_read_deadline(&self, _deadline: Option<Instant>) {}

    /// Accepted and ignored.
    pub fn set_write_deadline(&self, _deadline: Option<Instant>) {}
}

impl<S: HostSocket> AsyncRead for TransportAdapter<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let out = buf.initialize_unfilled();
        match self.shared.poll_read_into(cx, out) {
            Poll::Ready(Ok(n)) => {
                buf.advance(n);
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(err)) => Poll::Ready(Err(err.into())),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S: HostSocket> AsyncWrite for TransportAdapter<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(self.shared.write(buf).map_err(Into::into))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        // A recorded transport error has already been surfaced to readers.
        let _ = self.shared.close();
        Poll::Ready(Ok(()))
    }
}
