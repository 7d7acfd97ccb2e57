//! One-directional copy loop with a read deadline and stop signal

use crate::io::{ByteSink, ByteSource};
use std::io;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}

/// Copy bytes from `src` to `dst` until end of stream, an error or `stop`.
///
/// Each read waits at most `read_deadline`; a deadline that passes without
/// data is not an error, the loop re-checks `stop` and reads again. Short
/// writes are retried until the whole chunk is flushed, before the next
/// read. Every successful write's byte count is sent to `counter`.
///
/// Returns the number of bytes written. End of stream and `stop` both end
/// the copy with `Ok`; a chunk still being flushed when `stop` fires is
/// dropped.
pub async fn copy_data<S, D>(
    src: &mut S,
    dst: &mut D,
    buffer_size: usize,
    read_deadline: Duration,
    counter: &mpsc::Sender<usize>,
    stop: &CancellationToken,
) -> io::Result<u64>
where
    S: ByteSource + ?Sized,
    D: ByteSink + ?Sized,
{
    let mut buf = vec![0u8; buffer_size.max(1)];
    let mut total: u64 = 0;

    loop {
        if stop.is_cancelled() {
            return Ok(total);
        }

        let read = tokio::select! {
            biased;
            _ = stop.cancelled() => return Ok(total),
            read = tokio::time::timeout(read_deadline, src.read(&mut buf)) => read,
        };

        let n = match read {
            Err(_elapsed) => continue,
            Ok(Err(e)) if is_timeout(&e) => continue,
            Ok(Err(e)) => return Err(e),
            Ok(Ok(0)) => return Ok(total),
            Ok(Ok(n)) => n,
        };
        trace!("Read {} bytes", n);

        let mut offset = 0;
        while offset < n {
            let written = tokio::select! {
                biased;
                _ = stop.cancelled() => {
                    debug!("Stopped mid-write, discarding {} unwritten bytes", n - offset);
                    return Ok(total);
                }
                written = dst.write(&buf[offset..n]) => written?,
            };
            if written == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }

            offset += written;
            total += written as u64;

            // The counter may already be gone during teardown.
            let _ = counter.send(written).await;
        }
    }
}
