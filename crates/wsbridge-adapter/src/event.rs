//! Host callback events and the queue that carries them to the dispatch loop
//!
//! Host callbacks run synchronously and must never block, while the dispatch
//! loop consumes at its own pace. Events go into a small bounded channel; when
//! it is full they are staged in an overflow list that the consumer drains
//! after the channel, so arrival order is kept without blocking the producer.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Capacity of the channel between host callbacks and the dispatch loop
pub const EVENT_QUEUE_CAPACITY: usize = 2;

/// Payload of an `error` callback
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorPayload {
    /// Descriptive message, when the host provides one
    pub message: Option<String>,
}

impl ErrorPayload {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
        }
    }

    pub fn describe(&self) -> String {
        self.message
            .clone()
            .unwrap_or_else(|| "unspecified transport error".to_string())
    }
}

/// Payload of a `close` callback
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClosePayload {
    pub code: u16,
    pub reason: String,
}

/// One host callback invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Error(ErrorPayload),
    Closed(ClosePayload),
    Data(Vec<u8>),
}

impl TransportEvent {
    fn kind(&self) -> &'static str {
        match self {
            TransportEvent::Opened => "opened",
            TransportEvent::Error(_) => "error",
            TransportEvent::Closed(_) => "closed",
            TransportEvent::Data(_) => "data",
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Producer side, handed to the host socket's callbacks.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<TransportEvent>,
    overflow: Arc<Mutex<VecDeque<TransportEvent>>>,
    lifecycle: CancellationToken,
}

impl EventSender {
    /// Enqueue an event without blocking.
    ///
    /// Returns `false` when the event was dropped because the adapter's
    /// lifecycle has ended or the consumer is gone.
    pub fn push(&self, event: TransportEvent) -> bool {
        if self.lifecycle.is_cancelled() {
            trace!("Dropping late {} event", event.kind());
            return false;
        }

        let mut overflow = lock(&self.overflow);
        if !overflow.is_empty() {
            overflow.push_back(event);
            return true;
        }

        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                trace!("Event queue full, staging {} event", event.kind());
                overflow.push_back(event);
                true
            }
            Err(TrySendError::Closed(event)) => {
                trace!("Event queue closed, dropping {} event", event.kind());
                false
            }
        }
    }
}

/// Consumer side, owned by exactly one task.
#[derive(Debug)]
pub struct EventQueue {
    rx: mpsc::Receiver<TransportEvent>,
    overflow: Arc<Mutex<VecDeque<TransportEvent>>>,
}

impl EventQueue {
    /// Next event in arrival order, or `None` once every sender is gone and
    /// nothing is left.
    ///
    /// Cancel safe: an event is only removed from the queue when it is
    /// returned.
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        {
            // Producers push under this lock, so the channel and the overflow
            // are observed consistently.
            let mut overflow = lock(&self.overflow);
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Empty) => {
                    if let Some(event) = overflow.pop_front() {
                        return Some(event);
                    }
                }
                Err(TryRecvError::Disconnected) => return overflow.pop_front(),
            }
        }

        // Both empty. Anything staged from here on sits behind a full
        // channel, which wakes us first.
        match self.rx.recv().await {
            Some(event) => Some(event),
            None => lock(&self.overflow).pop_front(),
        }
    }
}

/// Create a connected sender/queue pair. Once `lifecycle` is cancelled the
/// sender silently drops events.
pub fn event_queue(capacity: usize, lifecycle: CancellationToken) -> (EventSender, EventQueue) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let overflow = Arc::new(Mutex::new(VecDeque::new()));
    (
        EventSender {
            tx,
            overflow: overflow.clone(),
            lifecycle,
        },
        EventQueue { rx, overflow },
    )
}
