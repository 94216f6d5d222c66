//! postgres-autoconf library
//!
//! Compiles PostgreSQL authentication policy at container start.
//!
//! # Features
//!
//! - **Certificates**: root CA, server certificate and key from `CERTS` or
//!   mounted files, provisioned with `0600`/`0644` modes
//! - **Access control**: fail-closed `pg_hba.conf` per connection class
//!   (local socket, LAN, WAN); WAN requires client certificates unless a
//!   password method is explicitly allowed
//! - **Overrides**: `HBA_EXTRA_RULES` placed after their class's records,
//!   `CONF_EXTRA` in an included overlay
//! - **Idempotent**: identical inputs give byte-identical files; unchanged
//!   files are not rewritten
//!
//! # Pipeline
//!
//! [`config::resolve`] → [`certs::provision`] → [`hba::compile`] →
//! [`overlay`] → [`render`], driven by [`pipeline::apply`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod certs;
pub mod cli;
pub mod config;
pub mod error;
pub mod fsio;
pub mod hba;
pub mod overlay;
pub mod pipeline;
pub mod render;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// Logs go to stderr; stdout is reserved for `check` output.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            subscriber
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    Ok(())
}
