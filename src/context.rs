//! Correlation id handling for the outer batch request, following the
//! Heroku `x-request-id` convention: the inbound value is adopted when
//! present, otherwise a fresh UUID is generated, and the id is echoed on the
//! outer response.

use http::{HeaderMap, HeaderValue, Request};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Ensure the request carries an `x-request-id`, generating one when absent,
/// and return the effective id.
pub fn ensure_request_id<B>(req: &mut Request<B>) -> String {
    if let Some(existing) = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        return existing.to_string();
    }

    let request_id = Uuid::new_v4().to_string();
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        req.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    request_id
}

/// Attach the id to a response header map unless one is already present.
pub fn attach_request_id(headers: &mut HeaderMap, request_id: &str) {
    if headers.contains_key(REQUEST_ID_HEADER) {
        return;
    }
    if let Ok(value) = HeaderValue::from_str(request_id) {
        headers.insert(REQUEST_ID_HEADER, value);
    }
}
