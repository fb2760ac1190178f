//! The shared outbound HTTP client.
//!
//! One long-lived client instance is built at startup and handed to every
//! batch task; its connection pool and TLS configuration are process-scoped.
//! Inner parts may name `proto=http` or `proto=https`, so the connector
//! accepts both schemes.

use bytes::Bytes;
use http_body_util::Full;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;

pub type OutboundClient = Client<HttpsConnector<HttpConnector>, Full<Bytes>>;

pub fn build_outbound_client() -> OutboundClient {
    let https = HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_or_http()
        .enable_http1()
        .build();

    Client::builder(TokioExecutor::new()).build(https)
}
