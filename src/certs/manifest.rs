//! Record of artifacts the engine itself wrote from inline material.
//!
//! When the mount directory and the target directory are the same (the
//! default), a file written from `CERTS` on a previous start is
//! indistinguishable from an operator mount by path alone. The manifest keeps
//! the SHA-256 of each inline-provisioned artifact so the resolver can tell
//! them apart and the provisioner can retire stale ones.
//!
//! A digest is recorded and saved *before* the artifact is replaced, and the
//! previous digest is dropped only after the replacement landed. Whichever
//! version an interrupted run leaves on disk is therefore still recognized as
//! ours on the next start.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::fsio::{self, WriteOutcome};
use crate::{Error, Result};

/// File name of the manifest inside the configuration directory.
pub const MANIFEST_FILE: &str = ".autoconf-provisioned.json";

/// Hex SHA-256 of `bytes`.
#[must_use]
pub fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes).as_slice())
}

/// Artifact file name → digests of the inline material written for it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionManifest {
    /// Entries keyed by artifact file name. More than one digest means a
    /// replacement was in flight.
    pub inline: BTreeMap<String, BTreeSet<String>>,
}

impl ProvisionManifest {
    /// Load the manifest; a missing or unreadable manifest is empty.
    pub fn load(path: &Path) -> Result<Self> {
        let Some(bytes) = fsio::read_optional(path)? else {
            return Ok(Self::default());
        };
        match serde_json::from_slice(&bytes) {
            Ok(manifest) => Ok(manifest),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring corrupt provisioning manifest");
                Ok(Self::default())
            }
        }
    }

    /// Persist the manifest atomically.
    pub fn save(&self, path: &Path) -> Result<WriteOutcome> {
        let mut json = serde_json::to_vec_pretty(self).map_err(|e| Error::fs(path, e.into()))?;
        json.push(b'\n');
        fsio::write_if_changed(path, &json, fsio::CONFIG_MODE)
    }

    /// Whether `content` is exactly something we wrote (or were about to
    /// write) for `name`.
    #[must_use]
    pub fn wrote(&self, name: &str, content: &[u8]) -> bool {
        self.inline
            .get(name)
            .is_some_and(|recorded| recorded.contains(&digest(content)))
    }

    /// Record inline material about to be written for `name`, keeping any
    /// digest recorded earlier.
    pub fn record(&mut self, name: &str, content: &[u8]) {
        self.inline
            .entry(name.to_string())
            .or_default()
            .insert(digest(content));
    }

    /// `content` is now on disk for `name`; drop every other digest.
    pub fn settle(&mut self, name: &str, content: &[u8]) {
        self.inline
            .insert(name.to_string(), BTreeSet::from([digest(content)]));
    }

    /// Forget `name`; returns the digests that were recorded.
    pub fn forget(&mut self, name: &str) -> Option<BTreeSet<String>> {
        self.inline.remove(name)
    }
}
