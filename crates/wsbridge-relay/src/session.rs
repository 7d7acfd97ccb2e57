//! One relayed connection: peer WebSocket <-> target TCP stream
//!
//! A session runs four tasks: a copy task per direction, a keepalive that
//! pings the peer, and a counter that sums the bytes both copy tasks report.
//! It ends once both copy tasks have exited; whichever finishes first trips
//! the stop signal so the other follows immediately.
//!
//! Teardown closes each writer once. A graceful close is bounded by the read
//! deadline, and skipped entirely when the relay is shutting down, so a peer
//! that stopped reading cannot hold the session open.

use crate::config::RelayConfig;
use crate::copy::copy_data;
use crate::dialer::Dialer;
use crate::io::{ByteSink, ByteSource, PingSink, WsReader, WsWriter};
use crate::RelayResult;
use axum::extract::ws::WebSocket;
use futures_util::{SinkExt, StreamExt};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Capacity of the byte-count channel shared by both copy tasks
const COUNTER_CAPACITY: usize = 10;

/// Outcome of a finished session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: String,
    pub target: String,
    /// Bytes written in both directions
    pub bytes: u64,
    pub duration: Duration,
}

/// A single relay session
pub struct RelaySession {
    id: String,
    host: String,
    port: u16,
    config: Arc<RelayConfig>,
    shutdown: CancellationToken,
    scope: CancellationToken,
}

impl RelaySession {
    /// Create a session whose lifetime is bounded by `parent`.
    pub fn new(host: String, port: u16, config: Arc<RelayConfig>, parent: &CancellationToken) -> Self {
        Self {
            id: format!("session-{}", uuid::Uuid::new_v4()),
            host,
            port,
            config,
            shutdown: parent.clone(),
            scope: parent.child_token(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Dial the target and relay until either side goes away.
    ///
    /// A failed dial closes the peer and is returned as an error; there is no
    /// retry.
    pub async fn run(self, mut peer: WebSocket, dialer: &dyn Dialer) -> RelayResult<SessionSummary> {
        debug!("[{}] Dialing {}", self.id, self.target());

        let target = match dialer.dial(&self.host, self.port).await {
            Ok(stream) => stream,
            Err(e) => {
                if let Err(close_err) = SinkExt::close(&mut peer).await {
                    debug!("[{}] Closing peer after failed dial: {}", self.id, close_err);
                }
                return Err(e);
            }
        };

        Ok(self.relay(peer, target).await)
    }

    /// Relay between an upgraded peer socket and an already connected target.
    pub async fn relay(self, peer: WebSocket, target: TcpStream) -> SessionSummary {
        if let Err(e) = target.set_nodelay(true) {
            debug!("[{}] Failed to set TCP_NODELAY: {}", self.id, e);
        }

        let (peer_sink, peer_stream) = peer.split();
        let peer_writer = WsWriter::new(peer_sink);
        let peer_reader = WsReader::new(peer_stream);
        let (target_reader, target_writer) = target.into_split();

        let pinger = peer_writer.clone();
        self.pump(peer_reader, peer_writer, target_reader, target_writer, pinger)
            .await
    }

    /// Run both copy tasks, the keepalive and the counter, then tear down.
    ///
    /// The cancellation scope is cancelled once both copy tasks have exited,
    /// and each writer is closed at most once.
    pub(crate) async fn pump<PR, PW, TR, TW, P>(
        self,
        peer_reader: PR,
        peer_writer: PW,
        target_reader: TR,
        target_writer: TW,
        pinger: P,
    ) -> SessionSummary
    where
        PR: ByteSource + 'static,
        PW: ByteSink + 'static,
        TR: ByteSource + 'static,
        TW: ByteSink + 'static,
        P: PingSink + 'static,
    {
        let started = Instant::now();
        let target = self.target();
        info!("[{}] Relaying to {}", self.id, target);

        let keepalive = tokio::spawn(keepalive(
            self.id.clone(),
            pinger,
            self.config.keepalive_interval,
            self.scope.clone(),
        ));

        let stop = self.scope.child_token();
        let (count_tx, count_rx) = mpsc::channel(COUNTER_CAPACITY);
        let counter = tokio::spawn(count_bytes(count_rx, self.scope.clone()));

        let inbound = self.spawn_copy(peer_reader, target_writer, count_tx.clone(), stop.clone());
        let outbound = self.spawn_copy(target_reader, peer_writer, count_tx, stop);

        let (inbound, outbound) = tokio::join!(inbound, outbound);
        self.scope.cancel();

        self.finish_copy("inbound", inbound).await;
        self.finish_copy("outbound", outbound).await;

        if let Err(e) = keepalive.await {
            warn!("[{}] Keepalive task failed: {}", self.id, e);
        }

        let bytes = match counter.await {
            Ok(total) => total,
            Err(e) => {
                warn!("[{}] Counter task failed: {}", self.id, e);
                0
            }
        };

        let summary = SessionSummary {
            id: self.id,
            target,
            bytes,
            duration: started.elapsed(),
        };
        info!(
            "[{}] Session to {} closed: {} bytes in {:?}",
            summary.id, summary.target, summary.bytes, summary.duration
        );
        summary
    }

    fn spawn_copy<S, D>(
        &self,
        mut src: S,
        mut dst: D,
        counter: mpsc::Sender<usize>,
        stop: CancellationToken,
    ) -> JoinHandle<(io::Result<u64>, S, D)>
    where
        S: ByteSource + 'static,
        D: ByteSink + 'static,
    {
        let buffer_size = self.config.copy_buffer_size;
        let read_deadline = self.config.read_deadline;

        tokio::spawn(async move {
            let result =
                copy_data(&mut src, &mut dst, buffer_size, read_deadline, &counter, &stop).await;
            // Wind down the other direction too.
            stop.cancel();
            (result, src, dst)
        })
    }

    async fn finish_copy<S, D>(
        &self,
        direction: &'static str,
        joined: Result<(io::Result<u64>, S, D), tokio::task::JoinError>,
    ) where
        S: ByteSource,
        D: ByteSink,
    {
        match joined {
            Ok((result, src, mut dst)) => {
                match result {
                    Ok(n) => debug!("[{}] {} copy finished after {} bytes", self.id, direction, n),
                    Err(e) => debug!("[{}] {} copy ended with error: {}", self.id, direction, e),
                }
                if self.shutdown.is_cancelled() {
                    debug!("[{}] Shutting down, dropping {} destination", self.id, direction);
                } else {
                    let grace = self.config.read_deadline;
                    match tokio::time::timeout(grace, dst.close()).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            debug!("[{}] Closing {} destination: {}", self.id, direction, e)
                        }
                        Err(_) => debug!(
                            "[{}] Gave up closing {} destination after {:?}",
                            self.id, direction, grace
                        ),
                    }
                }
                drop(dst);
                drop(src);
            }
            Err(e) => warn!("[{}] {} copy task failed: {}", self.id, direction, e),
        }
    }
}

/// Ping the peer every `interval`. A failed ping only ends the keepalive.
async fn keepalive<P: PingSink>(id: String, pinger: P, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let sent = tokio::select! {
            _ = cancel.cancelled() => break,
            sent = pinger.ping() => sent,
        };
        if let Err(e) = sent {
            debug!("[{}] Keepalive ping failed, stopping keepalive: {}", id, e);
            break;
        }
    }
}

async fn count_bytes(mut rx: mpsc::Receiver<usize>, cancel: CancellationToken) -> u64 {
    let mut total: u64 = 0;
    loop {
        tokio::select! {
            biased;
            n = rx.recv() => match n {
                Some(n) => total += n as u64,
                None => break,
            },
            _ = cancel.cancelled() => break,
        }
    }
    total
}
