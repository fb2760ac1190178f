//! Serialisation of the ordered response vector into the reply envelope.
//!
//! The whole envelope is built in memory and committed in one write. Writing
//! parts straight to the outer stream would implicitly commit a `200 OK`,
//! making later errors unreportable - buffering is the contract, not an
//! optimisation.

use bytes::{BufMut, Bytes, BytesMut};
use uuid::Uuid;

use crate::batch::{BatchResponse, Outcome};

/// A fully built reply envelope, ready for a single commit write.
#[derive(Debug)]
pub struct EncodedEnvelope {
    pub content_type: String,
    pub body: Bytes,
}

/// Incremental envelope writer with a freshly generated boundary. One
/// [`write_response`](Self::write_response) call per record, then
/// [`finish`](Self::finish) to append the terminating boundary.
pub struct EnvelopeWriter {
    boundary: String,
    buf: BytesMut,
}

impl EnvelopeWriter {
    pub fn new() -> Self {
        Self {
            boundary: Uuid::new_v4().simple().to_string(),
            buf: BytesMut::new(),
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Append one `application/http` part. Either outcome variant projects
    /// to the same wire shape: status line, header block when non-empty,
    /// body when present.
    pub fn write_response(&mut self, response: &BatchResponse) {
        self.buf.put_slice(b"--");
        self.buf.put_slice(self.boundary.as_bytes());
        self.buf.put_slice(b"\r\n");
        self.buf.put_slice(b"Content-Type: application/http\r\n\r\n");

        let status_line = format!(
            "{} {}\r\n",
            response.outcome.protocol(),
            response.outcome.status_text()
        );
        self.buf.put_slice(status_line.as_bytes());

        if let Outcome::Completed(done) = &response.outcome {
            if !done.headers.is_empty() {
                for (name, value) in done.headers.iter() {
                    self.buf.put_slice(name.as_str().as_bytes());
                    self.buf.put_slice(b": ");
                    self.buf.put_slice(value.as_bytes());
                    self.buf.put_slice(b"\r\n");
                }
                self.buf.put_slice(b"\r\n");
            }
            if let Some(body) = &done.body {
                self.buf.put_slice(body);
                self.buf.put_slice(b"\r\n");
            }
        }
    }

    /// Close the envelope and hand back the buffered reply.
    pub fn finish(mut self) -> EncodedEnvelope {
        self.buf.put_slice(b"--");
        self.buf.put_slice(self.boundary.as_bytes());
        self.buf.put_slice(b"--\r\n");

        EncodedEnvelope {
            content_type: format!("multipart/mixed; boundary={}", self.boundary),
            body: self.buf.freeze(),
        }
    }
}

impl Default for EnvelopeWriter {
    fn default() -> Self {
        Self::new()
    }
}
