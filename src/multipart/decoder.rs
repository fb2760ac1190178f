//! Decoding of the outer `multipart/mixed` envelope into outbound request
//! records.
//!
//! Each part must be `application/http` and contain a complete HTTP/1.x
//! request whose `Forwarded` header names the target scheme (`proto=http` or
//! `proto=https`); the target URL is synthesised from that scheme, the part's
//! `Host` header and its request target. The part body is taken only up to
//! the declared `Content-Length` - with no declaration the body is empty,
//! which is accepted.

use bytes::Bytes;
use http::header::{CONTENT_LENGTH, HOST};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use url::Url;

use crate::batch::BatchRequest;
use crate::error::RrpError;

/// Parse the envelope into the ordered request vector. The position of each
/// record in the returned vector is its sequence index.
pub fn decode_envelope(content_type: &str, body: &[u8]) -> Result<Vec<BatchRequest>, RrpError> {
    let media = parse_media_type(content_type).ok_or_else(|| {
        RrpError::envelope(StatusCode::BAD_REQUEST, "malformed Content-Type header")
    })?;
    if media.essence != "multipart/mixed" {
        return Err(RrpError::envelope(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "unsupported content type, expected multipart/mixed",
        ));
    }
    let boundary = media.boundary.ok_or_else(|| {
        RrpError::envelope(StatusCode::BAD_REQUEST, "missing multipart boundary")
    })?;

    let parts = split_parts(body, &boundary)?;
    parts.into_iter().map(decode_part).collect()
}

struct MediaType {
    essence: String,
    boundary: Option<String>,
}

/// Minimal `type/subtype; key=value` media type parsing: enough for the
/// envelope contract, not a general RFC 2045 parser.
fn parse_media_type(value: &str) -> Option<MediaType> {
    let mut segments = value.split(';');
    let essence = segments.next()?.trim().to_ascii_lowercase();
    if essence.is_empty() || !essence.contains('/') {
        return None;
    }

    let mut boundary = None;
    for segment in segments {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        let (key, val) = segment.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("boundary") {
            let val = val.trim().trim_matches('"');
            if !val.is_empty() {
                boundary = Some(val.to_string());
            }
        }
    }

    Some(MediaType { essence, boundary })
}

fn invalid_multipart() -> RrpError {
    RrpError::envelope(StatusCode::BAD_REQUEST, "invalid multipart content")
}

fn malformed_part(detail: &str) -> RrpError {
    RrpError::envelope(
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("malformed multipart content: {detail}"),
    )
}

/// Split the envelope body on `--boundary` delimiter lines. An envelope with
/// no complete part is a client error; a truncated envelope past the first
/// delimiter is a lower-level parse failure.
fn split_parts<'a>(body: &'a [u8], boundary: &str) -> Result<Vec<&'a [u8]>, RrpError> {
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();

    let mut parts = Vec::new();
    let mut cursor = match find_delimiter(body, delimiter, 0) {
        Some(at) => at + delimiter.len(),
        None => return Err(invalid_multipart()),
    };

    loop {
        if body[cursor..].starts_with(b"--") {
            break;
        }
        let content_start = match skip_line(body, cursor) {
            Some(at) => at,
            None => return Err(malformed_part("missing closing boundary")),
        };
        let next = match find_delimiter(body, delimiter, content_start) {
            Some(at) => at,
            None => return Err(malformed_part("missing closing boundary")),
        };
        parts.push(strip_trailing_newline(&body[content_start..next]));
        cursor = next + delimiter.len();
    }

    if parts.is_empty() {
        return Err(invalid_multipart());
    }
    Ok(parts)
}

/// Find the next `--boundary` occurrence at the start of a line.
fn find_delimiter(body: &[u8], delimiter: &[u8], from: usize) -> Option<usize> {
    let mut at = from;
    while at + delimiter.len() <= body.len() {
        if body[at..].starts_with(delimiter) && (at == 0 || body[at - 1] == b'\n') {
            return Some(at);
        }
        at += 1;
    }
    None
}

/// Index just past the newline terminating the line starting at `from`.
fn skip_line(body: &[u8], from: usize) -> Option<usize> {
    let newline = body[from..].iter().position(|&b| b == b'\n')?;
    Some(from + newline + 1)
}

/// Part content excludes the line break that precedes the next delimiter.
fn strip_trailing_newline(content: &[u8]) -> &[u8] {
    if content.ends_with(b"\r\n") {
        &content[..content.len() - 2]
    } else if content.ends_with(b"\n") {
        &content[..content.len() - 1]
    } else {
        content
    }
}

/// Decode one part: validate its MIME header, then parse the embedded
/// HTTP/1.x request.
fn decode_part(raw: &[u8]) -> Result<BatchRequest, RrpError> {
    let (mime_headers, content) = split_header_block(raw)
        .ok_or_else(|| malformed_part("part has no header block"))?;

    let content_type = header_line_value(mime_headers, "content-type")
        .ok_or_else(|| malformed_part("part has no Content-Type header"))?;
    let media = parse_media_type(content_type)
        .ok_or_else(|| malformed_part("part has a malformed Content-Type header"))?;
    if media.essence != "application/http" {
        return Err(RrpError::envelope(
            StatusCode::BAD_REQUEST,
            "unsupported content type for multipart/mixed content, expected each part to be application/http",
        ));
    }

    parse_inner_request(content)
}

/// Split a byte block into its header lines and the remainder after the
/// first blank line. Returns `None` when the block is empty.
fn split_header_block(raw: &[u8]) -> Option<(&[u8], &[u8])> {
    if raw.is_empty() {
        return None;
    }
    if let Some(at) = find_subslice(raw, b"\r\n\r\n") {
        return Some((&raw[..at], &raw[at + 4..]));
    }
    if let Some(at) = find_subslice(raw, b"\n\n") {
        return Some((&raw[..at], &raw[at + 2..]));
    }
    Some((raw, &[]))
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Case-insensitive lookup of one header value in a raw header block.
fn header_line_value<'a>(block: &'a [u8], name: &str) -> Option<&'a str> {
    for line in block.split(|&b| b == b'\n') {
        let line = std::str::from_utf8(line).ok()?.trim_end_matches('\r');
        if let Some((key, value)) = line.split_once(':') {
            if key.trim().eq_ignore_ascii_case(name) {
                return Some(value.trim());
            }
        }
    }
    None
}

/// Parse the embedded HTTP/1.x request: request line, header block, body.
fn parse_inner_request(content: &[u8]) -> Result<BatchRequest, RrpError> {
    let (request_line, rest) = split_line(content);
    let request_line = std::str::from_utf8(request_line)
        .map_err(|_| malformed_part("request line is not valid UTF-8"))?;

    let mut tokens = request_line.split_ascii_whitespace();
    let (method, target) = match (tokens.next(), tokens.next(), tokens.next()) {
        (Some(method), Some(target), Some(_version)) => (method, target),
        _ => return Err(malformed_part("invalid request line in application/http part")),
    };
    let method = Method::from_bytes(method.as_bytes())
        .map_err(|_| malformed_part("invalid method in application/http part"))?;

    let (headers, body_rest) = parse_header_lines(rest)?;

    let proto = forwarded_proto(&headers)?;
    let host = headers
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    let url = Url::parse(&format!("{proto}://{host}{target}")).map_err(|err| {
        malformed_part(&format!("cannot build url for application/http part: {err}"))
    })?;

    // Without a Content-Length declaration the part body is empty.
    let body = match headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<usize>().ok())
    {
        Some(length) => Bytes::copy_from_slice(&body_rest[..length.min(body_rest.len())]),
        None => Bytes::new(),
    };

    Ok(BatchRequest {
        method,
        url,
        headers,
        body,
    })
}

/// The `Forwarded` contract: the header must contain `proto=http`, and the
/// text after the first `proto=` must be exactly `http` or `https`. This is
/// deliberately a substring match, not an RFC 7239 parse.
fn forwarded_proto(headers: &HeaderMap) -> Result<&'static str, RrpError> {
    let forwarded = headers
        .get("forwarded")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    if forwarded.is_empty() || !forwarded.contains("proto=http") {
        return Err(RrpError::envelope(
            StatusCode::BAD_REQUEST,
            "missing header in multipart/mixed content, expected each part to contain a Forwarded header with a valid proto value (proto=http or proto=https)",
        ));
    }
    match forwarded.split_once("proto=").map(|(_, rest)| rest) {
        Some("http") => Ok("http"),
        Some("https") => Ok("https"),
        _ => Err(RrpError::envelope(
            StatusCode::BAD_REQUEST,
            "invalid proto value in Forwarded header, expected proto=http or proto=https",
        )),
    }
}

/// Parse header lines until the first blank line; the remainder is the body.
fn parse_header_lines(mut rest: &[u8]) -> Result<(HeaderMap, &[u8]), RrpError> {
    let mut headers = HeaderMap::new();
    while !rest.is_empty() {
        let (line, next) = split_line(rest);
        if line.is_empty() {
            return Ok((headers, next));
        }
        let line = std::str::from_utf8(line)
            .map_err(|_| malformed_part("header line is not valid UTF-8"))?;
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| malformed_part("invalid header line in application/http part"))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|_| malformed_part("invalid header name in application/http part"))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|_| malformed_part("invalid header value in application/http part"))?;
        headers.append(name, value);
        rest = next;
    }
    Ok((headers, rest))
}

/// Split off the first line, tolerating both CRLF and bare LF endings.
fn split_line(block: &[u8]) -> (&[u8], &[u8]) {
    match block.iter().position(|&b| b == b'\n') {
        Some(at) => {
            let line = &block[..at];
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            (line, &block[at + 1..])
        }
        None => (block, &[]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUNDARY: &str = "batch-test";

    fn envelope(parts: &[&str]) -> Vec<u8> {
        let mut body = String::new();
        for part in parts {
            body.push_str(&format!("--{BOUNDARY}\r\n"));
            body.push_str("Content-Type: application/http\r\n\r\n");
            body.push_str(part);
            body.push_str("\r\n");
        }
        body.push_str(&format!("--{BOUNDARY}--\r\n"));
        body.into_bytes()
    }

    fn content_type() -> String {
        format!("multipart/mixed; boundary={BOUNDARY}")
    }

    #[test]
    fn decodes_a_single_part() {
        let body = envelope(&[
            "GET /ping?x=1 HTTP/1.1\r\nHost: svc.local\r\nForwarded: proto=http\r\n\r\n",
        ]);
        let requests = decode_envelope(&content_type(), &body).unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, Method::GET);
        assert_eq!(requests[0].url.as_str(), "http://svc.local/ping?x=1");
        assert_eq!(requests[0].headers.get(HOST).unwrap(), "svc.local");
        assert!(requests[0].body.is_empty());
    }

    #[test]
    fn decodes_parts_in_order_with_bodies() {
        let body = envelope(&[
            "POST /a HTTP/1.1\r\nHost: one.local\r\nForwarded: proto=https\r\nContent-Length: 5\r\n\r\nhello",
            "GET /b HTTP/1.1\r\nHost: two.local\r\nForwarded: proto=http\r\n\r\n",
        ]);
        let requests = decode_envelope(&content_type(), &body).unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].url.as_str(), "https://one.local/a");
        assert_eq!(requests[0].body.as_ref(), b"hello");
        assert_eq!(requests[1].url.as_str(), "http://two.local/b");
        assert!(requests[1].body.is_empty());
    }

    #[test]
    fn body_without_content_length_is_empty() {
        let body = envelope(&[
            "POST /a HTTP/1.1\r\nHost: one.local\r\nForwarded: proto=http\r\n\r\nignored",
        ]);
        let requests = decode_envelope(&content_type(), &body).unwrap();
        assert!(requests[0].body.is_empty());
    }

    #[test]
    fn rejects_non_multipart_content_type() {
        let err = decode_envelope("application/json", b"{}").unwrap_err();
        assert_eq!(err.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[test]
    fn rejects_missing_boundary() {
        let err = decode_envelope("multipart/mixed", b"").unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(err.to_string().contains("missing multipart boundary"));
    }

    #[test]
    fn rejects_garbage_envelope() {
        let err = decode_envelope("multipart/mixed; boundary=x", b":(").unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(err.to_string().contains("invalid multipart content"));
    }

    #[test]
    fn rejects_empty_envelope() {
        let body = format!("--{BOUNDARY}--\r\n").into_bytes();
        let err = decode_envelope(&content_type(), &body).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn rejects_wrong_part_content_type() {
        let body = format!(
            "--{BOUNDARY}\r\nContent-Type: text/plain\r\n\r\nhello\r\n--{BOUNDARY}--\r\n"
        )
        .into_bytes();
        let err = decode_envelope(&content_type(), &body).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(err.to_string().contains("application/http"));
    }

    #[test]
    fn rejects_missing_forwarded_header() {
        let body = envelope(&["GET /ping HTTP/1.1\r\nHost: svc.local\r\n\r\n"]);
        let err = decode_envelope(&content_type(), &body).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(err.to_string().contains("Forwarded header"));
    }

    #[test]
    fn rejects_invalid_forwarded_proto() {
        let body = envelope(&[
            "GET /ping HTTP/1.1\r\nHost: svc.local\r\nForwarded: proto=httpx\r\n\r\n",
        ]);
        let err = decode_envelope(&content_type(), &body).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(err.to_string().contains("invalid proto value"));
    }

    #[test]
    fn accepts_forwarded_with_leading_parameters() {
        let body = envelope(&[
            "GET /ping HTTP/1.1\r\nHost: svc.local\r\nForwarded: for=10.0.0.1;proto=https\r\n\r\n",
        ]);
        let requests = decode_envelope(&content_type(), &body).unwrap();
        assert_eq!(requests[0].url.scheme(), "https");
    }

    #[test]
    fn truncated_envelope_is_a_server_error() {
        let body = format!(
            "--{BOUNDARY}\r\nContent-Type: application/http\r\n\r\nGET / HTTP/1.1\r\n"
        )
        .into_bytes();
        let err = decode_envelope(&content_type(), &body).unwrap_err();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn parses_quoted_boundary() {
        let body = envelope(&[
            "GET /ping HTTP/1.1\r\nHost: svc.local\r\nForwarded: proto=http\r\n\r\n",
        ]);
        let ct = format!("multipart/mixed; boundary=\"{BOUNDARY}\"");
        assert_eq!(decode_envelope(&ct, &body).unwrap().len(), 1);
    }

    #[test]
    fn media_type_parsing_is_case_insensitive() {
        let media = parse_media_type("Multipart/Mixed; Boundary=abc").unwrap();
        assert_eq!(media.essence, "multipart/mixed");
        assert_eq!(media.boundary.as_deref(), Some("abc"));
    }
}
