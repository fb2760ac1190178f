//! The request-handler facade for `POST /batch/multipartmixed`: decode the
//! envelope, dispatch the batch, serialise the reply. Envelope errors map to
//! the statuses the decoder assigned; dispatch failures never surface here
//! because the processor materialises them as synthetic parts.

use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, Response, StatusCode};
use http_body_util::Full;
use tracing::{debug, error};

use crate::batch::{self, BatchResponse};
use crate::client::OutboundClient;
use crate::config;
use crate::elf::{self, LogOptions};
use crate::error::RrpError;
use crate::multipart::{decoder, EncodedEnvelope, EnvelopeWriter};

/// Optional outer header carrying the batch timeout in decimal seconds.
pub const TIMEOUT_HEADER: &str = "x-rrp-timeout";

/// Handle one batch request. `body` is the fully buffered envelope; the
/// returned response is complete and ready to write.
pub async fn handle_multipart_mixed(
    client: &OutboundClient,
    headers: &HeaderMap,
    body: Bytes,
) -> Response<Full<Bytes>> {
    let started = Instant::now();
    match run(client, headers, body).await {
        Ok(response) => response,
        Err(err) => {
            elf::log(
                "ERROR",
                "Error whilst processing batch/multipartmixed request",
                LogOptions {
                    started: Some(started),
                    cause: Some(err.to_string()),
                    ..LogOptions::default()
                },
            );
            error_response(&err)
        }
    }
}

async fn run(
    client: &OutboundClient,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response<Full<Bytes>>, RrpError> {
    let timeout = parse_timeout(headers.get(TIMEOUT_HEADER))?;

    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    let requests = decoder::decode_envelope(content_type, &body)?;

    // Kept for reporting: these outlive the request records, which the
    // processor consumes.
    let urls: Vec<String> = requests.iter().map(|r| r.url.to_string()).collect();

    debug!(batch_size = requests.len(), ?timeout, "dispatching batch");
    let responses = batch::process_batch(client, requests, timeout).await?;

    let progress = Cell::new(0usize);
    let encoded = match catch_unwind(AssertUnwindSafe(|| {
        encode_all(&responses, &urls, &progress)
    })) {
        Ok(encoded) => encoded,
        Err(_) => {
            let index = progress.get();
            let url = urls.get(index).map(String::as_str).unwrap_or("-");
            error!(index, url, "panic while encoding batch response");
            elf::log(
                "ERROR",
                "Panic whilst processing batch/multipartmixed request",
                LogOptions {
                    payload: Some(format!("index={index} url={url}")),
                    cause: Some("panic while processing request".to_string()),
                    ..LogOptions::default()
                },
            );
            return Err(RrpError::EncodePanic);
        }
    };

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, encoded.content_type)
        .body(Full::new(encoded.body))?)
}

/// Serialise every record, logging one ELF line per inner response with
/// `time-taken` equal to that request's processing duration.
fn encode_all(
    responses: &[BatchResponse],
    urls: &[String],
    progress: &Cell<usize>,
) -> EncodedEnvelope {
    let mut writer = EnvelopeWriter::new();
    for (index, response) in responses.iter().enumerate() {
        progress.set(index);
        let url = urls.get(index).map(String::as_str).unwrap_or("-");
        elf::log(
            "INFO",
            &format!("Received {} from {}", response.outcome.status_text(), url),
            LogOptions {
                started: Instant::now().checked_sub(response.duration),
                ..LogOptions::default()
            },
        );
        writer.write_response(response);
    }
    writer.finish()
}

/// Parse `x-rrp-timeout` (decimal seconds). Absent or empty falls back to
/// the default; anything non-numeric or negative is a client error.
fn parse_timeout(value: Option<&HeaderValue>) -> Result<Duration, RrpError> {
    let raw = match value {
        Some(value) => value.to_str().map_err(|_| invalid_timeout())?.trim(),
        None => "",
    };
    if raw.is_empty() {
        elf::log(
            "INFO",
            &format!(
                "Default timeout is {:.3}",
                config::DEFAULT_TIMEOUT.as_secs_f64()
            ),
            LogOptions::default(),
        );
        return Ok(config::DEFAULT_TIMEOUT);
    }

    let seconds: f64 = raw.parse().map_err(|_| invalid_timeout())?;
    let timeout = Duration::try_from_secs_f64(seconds).map_err(|_| invalid_timeout())?;
    elf::log(
        "INFO",
        &format!("Timeout specified is {:.3}", timeout.as_secs_f64()),
        LogOptions::default(),
    );
    Ok(timeout)
}

fn invalid_timeout() -> RrpError {
    RrpError::envelope(
        StatusCode::BAD_REQUEST,
        "invalid value for x-rrp-timeout header, expected number of seconds",
    )
}

/// Plain-text error reply, mirroring the shape clients of the original
/// endpoint expect: the message followed by a newline.
fn error_response(err: &RrpError) -> Response<Full<Bytes>> {
    let builder = Response::builder()
        .status(err.status())
        .header(CONTENT_TYPE, "text/plain; charset=utf-8");
    match builder.body(Full::new(Bytes::from(format!("{err}\n")))) {
        Ok(response) => response,
        Err(_) => {
            let mut response = Response::new(Full::new(Bytes::new()));
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        }
    }
}
