//! RRP - Reverse Request Proxy.
//!
//! Accepts a single `multipart/mixed` request whose `application/http` parts
//! each encode an independent outbound HTTP request, dispatches them
//! concurrently through a shared client, and returns the responses in the
//! original order as a single `multipart/mixed` reply.

pub mod batch;
pub mod client;
pub mod config;
pub mod context;
pub mod elf;
pub mod error;
pub mod handler;
pub mod multipart;
pub mod server;

pub use client::{build_outbound_client, OutboundClient};
pub use config::RrpConfig;
pub use error::{RrpError, RrpResult};
pub use server::RrpServer;
