//! The fan-out executor.
//!
//! Each request in the batch runs on its own task against the shared
//! outbound client, under a per-request wall-clock deadline covering the
//! header round-trip, one redirect hop and the body read. Tasks emit exactly
//! one record into a sink sized to the batch, the join barrier releases when
//! every task has finished, and the result vector is reassembled in sequence
//! order.

use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderName, CONTENT_LENGTH, LOCATION, TRANSFER_ENCODING, USER_AGENT};
use http::{HeaderValue, Method, Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, debug_span, warn, Instrument};

use super::body::{self, ReadBodyError};
use super::redirect;
use super::{BatchRequest, BatchResponse, CompletedResponse, Outcome};
use crate::client::OutboundClient;
use crate::error::RrpError;

/// `User-Agent` injected when a batched request does not carry one.
pub const DEFAULT_USER_AGENT: &str = concat!("RRP ", env!("CARGO_PKG_VERSION"));

/// Dispatch `requests` concurrently and return their responses in input
/// order. Transport and read failures come back as synthetic records inside
/// the vector; the call itself only fails when the join barrier releases
/// with the wrong number of records.
pub async fn process_batch(
    client: &OutboundClient,
    requests: Vec<BatchRequest>,
    timeout: Duration,
) -> Result<Vec<BatchResponse>, RrpError> {
    let expected = requests.len();
    if expected == 0 {
        return Ok(Vec::new());
    }

    // Sink sized to the batch so emitters never block on send.
    let (record_tx, mut record_rx) = mpsc::channel::<BatchResponse>(expected);

    let mut tasks = Vec::with_capacity(expected);
    for (sequence, request) in requests.into_iter().enumerate() {
        let client = client.clone();
        let record_tx = record_tx.clone();
        let span = debug_span!("batch_request", sequence, url = %request.url);
        tasks.push(tokio::spawn(
            async move {
                let started = Instant::now();
                let outcome = dispatch(&client, request, started + timeout).await;
                let record = BatchResponse {
                    sequence,
                    outcome,
                    duration: started.elapsed(),
                };
                let _ = record_tx.send(record).await;
            }
            .instrument(span),
        ));
    }
    drop(record_tx);

    // Join barrier. A panicked task cannot have emitted, so its slot is
    // materialised here to keep the output total.
    let mut aborted = Vec::new();
    for (sequence, task) in tasks.into_iter().enumerate() {
        if let Err(err) = task.await {
            warn!(sequence, error = %err, "batch task aborted");
            aborted.push(BatchResponse {
                sequence,
                outcome: Outcome::Synthetic {
                    reason: format!("request processing failed: {err}"),
                },
                duration: timeout,
            });
        }
    }

    let mut records = Vec::with_capacity(expected);
    while let Some(record) = record_rx.recv().await {
        records.push(record);
    }
    records.extend(aborted);

    if records.len() != expected {
        return Err(RrpError::ResponseCountMismatch {
            expected,
            received: records.len(),
        });
    }

    let mut slots: Vec<Option<BatchResponse>> = Vec::new();
    slots.resize_with(expected, || None);
    let mut filled = 0usize;
    for record in records {
        let sequence = record.sequence;
        if sequence < expected && slots[sequence].is_none() {
            slots[sequence] = Some(record);
            filled += 1;
        }
    }
    if filled != expected {
        return Err(RrpError::ResponseCountMismatch {
            expected,
            received: filled,
        });
    }

    Ok(slots.into_iter().flatten().collect())
}

/// Run one request to a terminal outcome. Never returns an error; every
/// failure is projected into `Outcome::Synthetic`.
async fn dispatch(client: &OutboundClient, request: BatchRequest, deadline: Instant) -> Outcome {
    let outbound = match build_outbound(&request) {
        Ok(outbound) => outbound,
        Err(err) => {
            return Outcome::Synthetic {
                reason: annotate(err, deadline),
            }
        }
    };

    let response = match timeout_at(deadline, client.request(outbound)).await {
        Err(_) => {
            return Outcome::Synthetic {
                reason: "timeout waiting for response headers".to_string(),
            }
        }
        Ok(Err(err)) => {
            return Outcome::Synthetic {
                reason: annotate(err.to_string(), deadline),
            }
        }
        Ok(Ok(response)) => response,
    };

    let response = if response.status() == StatusCode::FOUND {
        match follow_redirect(client, &request, response, deadline).await {
            Ok(response) => response,
            Err(reason) => {
                return Outcome::Synthetic {
                    reason: annotate(reason, deadline),
                }
            }
        }
    } else {
        response
    };

    debug!(status = %response.status(), "upstream response");

    let (parts, incoming) = response.into_parts();
    let content_length = parts
        .headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok());

    match body::read_to_end(incoming, content_length, body::clamp_deadline(deadline)).await {
        Ok(buffered) => Outcome::Completed(CompletedResponse {
            version: parts.version,
            status: parts.status,
            headers: parts.headers,
            body: Some(buffered),
        }),
        Err(ReadBodyError::TimedOut) => Outcome::Synthetic {
            reason: "timeout reading response body".to_string(),
        },
        Err(ReadBodyError::Read(err)) => Outcome::Synthetic {
            reason: annotate(err, deadline),
        },
    }
}

/// Build the hyper request for one batch entry, injecting the default
/// `User-Agent` when the part did not carry one.
fn build_outbound(request: &BatchRequest) -> Result<Request<Full<Bytes>>, String> {
    let mut builder = Request::builder()
        .method(request.method.clone())
        .uri(request.url.as_str());

    let mut has_user_agent = false;
    for (name, value) in request.headers.iter() {
        if should_skip_header(name) {
            continue;
        }
        if name == USER_AGENT {
            has_user_agent = true;
        }
        builder = builder.header(name.clone(), value.clone());
    }
    if !has_user_agent {
        builder = builder.header(USER_AGENT, DEFAULT_USER_AGENT);
    }

    builder
        .body(Full::new(request.body.clone()))
        .map_err(|err| err.to_string())
}

/// Framing headers are recomputed by the client from the materialised body;
/// forwarding the part's own values would let a short body hang the exchange.
fn should_skip_header(name: &HeaderName) -> bool {
    name == CONTENT_LENGTH || name == TRANSFER_ENCODING
}

/// Follow one 302 hop. Returns the follow-up response, or the original
/// response when there is no usable `Location`, or the transport failure as
/// a reason string. Further 302s from the follow-up are returned verbatim.
async fn follow_redirect(
    client: &OutboundClient,
    request: &BatchRequest,
    response: Response<Incoming>,
    deadline: Instant,
) -> Result<Response<Incoming>, String> {
    let location = match response
        .headers()
        .get(LOCATION)
        .and_then(|value| value.to_str().ok())
    {
        Some(location) => location.to_string(),
        None => return Ok(response),
    };

    let target = match redirect::resolve(&request.url, &location) {
        Some(target) => target,
        None => return Ok(response),
    };

    debug!(location = %target, "following redirect");

    let user_agent = request
        .headers
        .get(USER_AGENT)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_USER_AGENT));

    let follow_up = Request::builder()
        .method(Method::GET)
        .uri(target.as_str())
        .header(USER_AGENT, user_agent)
        .body(Full::new(Bytes::new()))
        .map_err(|err| err.to_string())?;

    match timeout_at(deadline, client.request(follow_up)).await {
        Err(_) => Err("timeout following redirect".to_string()),
        Ok(Err(err)) => Err(err.to_string()),
        Ok(Ok(follow_response)) => Ok(follow_response),
    }
}

/// Tag a failure reason when the deadline has already passed, since the
/// underlying error text rarely names the cause.
fn annotate(reason: String, deadline: Instant) -> String {
    if Instant::now() > deadline {
        format!("{reason} (probably caused by timeout)")
    } else {
        reason
    }
}
