//! Byte-level I/O seams for the copy engine
//!
//! The copy loop moves raw bytes, but one side of every session is a
//! message-oriented WebSocket. [`WsReader`] and [`WsWriter`] flatten it into
//! a byte stream; TCP halves get the same traits directly.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tracing::trace;

/// Readable half of a session socket
#[async_trait]
pub trait ByteSource: Send {
    /// Read into `buf`. `Ok(0)` is end of stream.
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Writable half of a session socket
#[async_trait]
pub trait ByteSink: Send {
    /// Write some prefix of `buf` and return how much was accepted.
    async fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Close the underlying socket.
    async fn close(&mut self) -> io::Result<()>;
}

/// Keepalive pings on the peer connection
#[async_trait]
pub trait PingSink: Send + Sync {
    async fn ping(&self) -> io::Result<()>;
}

#[async_trait]
impl ByteSource for OwnedReadHalf {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        AsyncReadExt::read(self, buf).await
    }
}

#[async_trait]
impl ByteSink for OwnedWriteHalf {
    async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        AsyncWriteExt::write(self, buf).await
    }

    async fn close(&mut self) -> io::Result<()> {
        self.shutdown().await
    }
}

/// Receiving half of an upgraded WebSocket, read as a byte stream
pub struct WsReader {
    stream: SplitStream<WebSocket>,
    pending: Bytes,
}

impl WsReader {
    pub fn new(stream: SplitStream<WebSocket>) -> Self {
        Self {
            stream,
            pending: Bytes::new(),
        }
    }
}

#[async_trait]
impl ByteSource for WsReader {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        while self.pending.is_empty() {
            match self.stream.next().await {
                Some(Ok(Message::Binary(data))) => self.pending = data,
                Some(Ok(Message::Text(text))) => {
                    self.pending = Bytes::copy_from_slice(text.as_str().as_bytes())
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    trace!("Peer sent close frame: {:?}", frame);
                    return Ok(0);
                }
                Some(Err(e)) => return Err(io::Error::other(e)),
                None => return Ok(0),
            }
        }

        let chunk = self.pending.split_to(self.pending.len().min(buf.len()));
        buf[..chunk.len()].copy_from_slice(&chunk);
        Ok(chunk.len())
    }
}

/// Sending half of an upgraded WebSocket
///
/// Cloning shares the same sink; every frame is written under one async
/// mutex, so the keepalive task and a copy task never interleave frames.
#[derive(Clone)]
pub struct WsWriter {
    sink: Arc<Mutex<SplitSink<WebSocket, Message>>>,
}

impl WsWriter {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self {
            sink: Arc::new(Mutex::new(sink)),
        }
    }
}

#[async_trait]
impl PingSink for WsWriter {
    /// Send an empty Ping frame.
    async fn ping(&self) -> io::Result<()> {
        self.sink
            .lock()
            .await
            .send(Message::Ping(Bytes::new()))
            .await
            .map_err(io::Error::other)
    }
}

#[async_trait]
impl ByteSink for WsWriter {
    async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sink
            .lock()
            .await
            .send(Message::Binary(Bytes::copy_from_slice(buf)))
            .await
            .map_err(io::Error::other)?;
        Ok(buf.len())
    }

    async fn close(&mut self) -> io::Result<()> {
        self.sink.lock().await.close().await.map_err(io::Error::other)
    }
}
