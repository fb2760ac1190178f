//! Single-hop 302 redirect resolution.
//!
//! Only `302 Found` is handled; every other redirect code flows through to
//! the caller verbatim. A relative `Location` is resolved against the
//! original request's scheme and host. The follow-up is always a GET with
//! the query re-encoded and the fragment dropped.

use url::Url;

/// Resolve a `Location` header value against the request's original URL.
/// Returns `None` when the location cannot be turned into a usable absolute
/// target, in which case the 302 is passed through unchanged.
pub(crate) fn resolve(original: &Url, location: &str) -> Option<Url> {
    let parsed = match Url::parse(location) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let base = format!(
                "{}://{}/",
                original.scheme(),
                original.host_str().map(|host| match original.port() {
                    Some(port) => format!("{host}:{port}"),
                    None => host.to_string(),
                })?
            );
            Url::parse(&base)
                .ok()?
                .join(location.trim_start_matches('/'))
                .ok()?
        }
        Err(_) => return None,
    };

    let mut target = parsed;
    target.set_fragment(None);
    if target.query() == Some("") {
        target.set_query(None);
    }
    if !target.has_host() {
        return None;
    }
    Some(target)
}
