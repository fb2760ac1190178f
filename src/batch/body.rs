//! Deadline-bounded buffering of upstream response bodies.
//!
//! The whole body is read into memory before the response record is emitted;
//! there is no streaming. Every frame read is awaited under the task's
//! deadline, so a stalled upstream cannot hold the batch past its timeout.
//! Dropping the body on any failure path releases the underlying connection
//! back to the client's pool.

use bytes::{BufMut, Bytes, BytesMut};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use tokio::time::{timeout_at, Instant};

use crate::config::BODY_CHUNK_SIZE;

/// Smallest remaining-read budget. Budgets below this produce zero-duration
/// timers that pre-empt the read unconditionally.
pub const MIN_READ_BUDGET: std::time::Duration = std::time::Duration::from_millis(1);

#[derive(Debug)]
pub enum ReadBodyError {
    /// The remaining-time budget elapsed mid-read. Partial data is discarded.
    TimedOut,
    /// The stream failed before end-of-stream.
    Read(String),
}

/// Clamp a deadline so the read budget never drops below [`MIN_READ_BUDGET`].
pub fn clamp_deadline(deadline: Instant) -> Instant {
    deadline.max(Instant::now() + MIN_READ_BUDGET)
}

/// Buffer the whole body before `deadline`. On success the returned buffer
/// ends with a trailing CRLF, ready for part serialisation. The initial
/// capacity follows the declared `Content-Length` when that is known and
/// smaller than the default chunk size.
pub async fn read_to_end(
    mut body: Incoming,
    content_length: Option<u64>,
    deadline: Instant,
) -> Result<Bytes, ReadBodyError> {
    let initial = match content_length {
        Some(length) if (length as usize) < BODY_CHUNK_SIZE => length as usize,
        _ => BODY_CHUNK_SIZE,
    };
    let mut buf = BytesMut::with_capacity(initial + 2);

    loop {
        match timeout_at(deadline, body.frame()).await {
            Err(_) => return Err(ReadBodyError::TimedOut),
            Ok(None) => break,
            Ok(Some(Err(err))) => return Err(ReadBodyError::Read(err.to_string())),
            Ok(Some(Ok(frame))) => {
                if let Ok(data) = frame.into_data() {
                    buf.put_slice(&data);
                }
            }
        }
    }

    buf.put_slice(b"\r\n");
    Ok(buf.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn clamp_keeps_future_deadlines() {
        let deadline = Instant::now() + Duration::from_secs(5);
        assert_eq!(clamp_deadline(deadline), deadline);
    }

    #[test]
    fn clamp_lifts_exhausted_deadlines() {
        let now = Instant::now();
        assert!(clamp_deadline(now) > now);
    }
}
