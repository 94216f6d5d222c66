//! Server configuration: the engine-owned base file and the operator overlay.
//!
//! `postgresql.conf` is fully generated. Its last line includes
//! `postgresql.extra.conf`, which carries `CONF_EXTRA` verbatim, so a setting
//! in the overlay overrides the same setting in the base file.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::certs::ArtifactKind;
use crate::config::Layout;

const GENERATED: &str =
    "# Generated by postgres-autoconf at container start; local edits are overwritten.\n";

/// Operator settings from `CONF_EXTRA`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overlay {
    text: String,
}

impl Overlay {
    /// Take `conf_extra` verbatim, normalizing only the trailing newline.
    #[must_use]
    pub fn compile(conf_extra: &str) -> Self {
        let body = conf_extra.trim_end_matches(['\n', '\r']);
        let mut text = String::with_capacity(body.len() + 1);
        if !body.is_empty() {
            text.push_str(body);
            text.push('\n');
        }
        Self { text }
    }

    /// Whether there is nothing to override.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Overlay file text.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::from(GENERATED);
        out.push_str("# Set CONF_EXTRA to add settings here.\n");
        if !self.is_empty() {
            out.push('\n');
            out.push_str(&self.text);
        }
        out
    }
}

/// TLS files referenced from the base file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SslFiles {
    /// `ssl_ca_file`.
    pub ca: PathBuf,
    /// `ssl_cert_file`.
    pub cert: PathBuf,
    /// `ssl_key_file`.
    pub key: PathBuf,
}

/// The engine-owned `postgresql.conf`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseConfig {
    hba_file: PathBuf,
    overlay_file: PathBuf,
    ssl: Option<SslFiles>,
}

impl BaseConfig {
    /// Base file for `layout`; TLS is enabled only with a usable certificate set.
    #[must_use]
    pub fn new(layout: &Layout, cert_set_usable: bool) -> Self {
        let ssl = cert_set_usable.then(|| SslFiles {
            ca: layout.cert_target(ArtifactKind::RootCa),
            cert: layout.cert_target(ArtifactKind::ServerCert),
            key: layout.cert_target(ArtifactKind::ServerKey),
        });
        Self {
            hba_file: layout.hba_file(),
            overlay_file: layout.overlay_file(),
            ssl,
        }
    }

    /// Whether `ssl = on` is rendered.
    #[must_use]
    pub fn ssl_enabled(&self) -> bool {
        self.ssl.is_some()
    }

    /// Base file text.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::from(GENERATED);
        out.push_str("# Put overrides in CONF_EXTRA; they are included last.\n\n");
        out.push_str("listen_addresses = '*'\n");
        let _ = writeln!(out, "hba_file = {}", quote(&self.hba_file));
        match &self.ssl {
            Some(files) => {
                out.push_str("ssl = on\n");
                let _ = writeln!(out, "ssl_ca_file = {}", quote(&files.ca));
                let _ = writeln!(out, "ssl_cert_file = {}", quote(&files.cert));
                let _ = writeln!(out, "ssl_key_file = {}", quote(&files.key));
            }
            None => out.push_str("ssl = off\n"),
        }
        let _ = writeln!(out, "include_if_exists = {}", quote(&self.overlay_file));
        out
    }
}

/// Single-quoted configuration string; embedded quotes are doubled.
fn quote(path: &Path) -> String {
    format!("'{}'", path.display().to_string().replace('\'', "''"))
}
