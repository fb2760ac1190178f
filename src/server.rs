//! The HTTP/1.1 server exposing the batch endpoint.
//!
//! One plain-TCP listener bound to the configured address, one spawned
//! connection task per accept, a single route: `POST /batch/multipartmixed`.
//! The correlation id middleware runs for every request so the outer reply
//! always carries an `x-request-id`.

use std::convert::Infallible;
use std::time::Instant;

use bytes::Bytes;
use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::client::{build_outbound_client, OutboundClient};
use crate::config::RrpConfig;
use crate::context;
use crate::elf::{self, LogOptions};
use crate::error::RrpError;
use crate::handler;

pub const BATCH_PATH: &str = "/batch/multipartmixed";

pub struct RrpServer {
    config: RrpConfig,
    client: OutboundClient,
}

impl RrpServer {
    pub fn new(config: RrpConfig) -> Self {
        Self {
            config,
            client: build_outbound_client(),
        }
    }

    /// Bind the listener and serve until the shutdown signal fires.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<()>) -> Result<(), RrpError> {
        let started = Instant::now();
        let listener = TcpListener::bind(&self.config.bind).await.map_err(|err| {
            RrpError::Config(format!("failed to bind {}: {err}", self.config.bind))
        })?;
        let addr = listener.local_addr()?;
        info!(address = %addr, "RRP listening");
        elf::log(
            "INFO",
            "Successfully configured and started RRP",
            LogOptions {
                started: Some(started),
                ..LogOptions::default()
            },
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    info!("RRP server shutting down");
                    break;
                }
                accept_res = listener.accept() => {
                    match accept_res {
                        Ok((stream, _peer)) => {
                            let client = self.client.clone();
                            tokio::spawn(async move {
                                let service = service_fn(move |req: Request<Incoming>| {
                                    let client = client.clone();
                                    async move { route(&client, req).await }
                                });
                                if let Err(err) = http1::Builder::new()
                                    .serve_connection(TokioIo::new(stream), service)
                                    .await
                                {
                                    debug!(error = %err, "connection closed with error");
                                }
                            });
                        }
                        Err(err) => {
                            error!(error = %err, "accept failed");
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

/// Per-request middleware and routing: ensure a correlation id, dispatch the
/// one known route, echo the id on the response.
async fn route(
    client: &OutboundClient,
    mut req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let request_id = context::ensure_request_id(&mut req);

    let mut response = if req.method() == Method::POST && req.uri().path() == BATCH_PATH {
        let (parts, body) = req.into_parts();
        match body.collect().await {
            Ok(collected) => {
                handler::handle_multipart_mixed(client, &parts.headers, collected.to_bytes())
                    .await
            }
            Err(err) => text_response(
                StatusCode::BAD_REQUEST,
                &format!("failed to read request body: {err}"),
            ),
        }
    } else {
        text_response(StatusCode::NOT_FOUND, "no such endpoint")
    };

    context::attach_request_id(response.headers_mut(), &request_id);
    Ok(response)
}

fn text_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(format!("{message}\n"))));
    *response.status_mut() = status;
    response
}
