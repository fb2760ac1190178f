//! The batch processor: a bounded-parallel fan-out executor that dispatches
//! the decoded requests concurrently and returns their responses in input
//! order. Dispatch failures are materialised as synthetic 400 responses so
//! partial success stays reportable.

pub mod body;
pub mod processor;
mod redirect;

pub use processor::process_batch;

use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode, Version};
use url::Url;

/// One outbound request parsed from an envelope part. Its position in the
/// decoder's output vector is its sequence index.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// A completed remote exchange: any status line counts, including remote
/// errors and unfollowed redirects.
#[derive(Debug)]
pub struct CompletedResponse {
    pub version: Version,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

/// Outcome of one dispatched request.
#[derive(Debug)]
pub enum Outcome {
    Completed(CompletedResponse),
    /// A dispatch failure (transport, read, deadline, bad target) projected
    /// onto the wire as a 400 with the original error as the reason phrase.
    Synthetic { reason: String },
}

impl Outcome {
    /// Status text as it appears after the protocol on the wire, e.g.
    /// `200 OK` or `400 connection refused`.
    pub fn status_text(&self) -> String {
        match self {
            Outcome::Completed(done) => match done.status.canonical_reason() {
                Some(reason) => format!("{} {}", done.status.as_u16(), reason),
                None => done.status.as_u16().to_string(),
            },
            Outcome::Synthetic { reason } => {
                format!("{} {}", StatusCode::BAD_REQUEST.as_u16(), reason)
            }
        }
    }

    /// Protocol token for the status line.
    pub fn protocol(&self) -> &'static str {
        let version = match self {
            Outcome::Completed(done) => done.version,
            Outcome::Synthetic { .. } => Version::HTTP_11,
        };
        match version {
            Version::HTTP_10 => "HTTP/1.0",
            Version::HTTP_2 => "HTTP/2.0",
            _ => "HTTP/1.1",
        }
    }
}

/// One slot of the ordered result vector. Every request yields exactly one.
#[derive(Debug)]
pub struct BatchResponse {
    pub sequence: usize,
    pub outcome: Outcome,
    pub duration: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_text_for_completed_response() {
        let outcome = Outcome::Completed(CompletedResponse {
            version: Version::HTTP_11,
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: None,
        });
        assert_eq!(outcome.status_text(), "200 OK");
        assert_eq!(outcome.protocol(), "HTTP/1.1");
    }

    #[test]
    fn status_text_for_synthetic_response() {
        let outcome = Outcome::Synthetic {
            reason: "connection refused".to_string(),
        };
        assert_eq!(outcome.status_text(), "400 connection refused");
        assert_eq!(outcome.protocol(), "HTTP/1.1");
    }
}
