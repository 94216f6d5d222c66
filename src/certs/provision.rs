//! Materialize certificate artifacts with the permissions the daemon expects.
//!
//! For every present artifact the canonical file is replaced only when its
//! content differs, always through [`fsio::write_if_changed`]. Keys end up
//! `0600`, certificates `0644`. Inline artifacts are recorded in the
//! [`ProvisionManifest`] before their target is replaced; inline artifacts
//! that are no longer supplied are removed so a previous run's key does not
//! outlive its configuration.

use std::path::Path;

use tracing::{debug, info, warn};

use crate::certs::artifact::{ArtifactKind, ArtifactSource, CertificateArtifact, CertificateSet};
use crate::certs::identity::CertSummary;
use crate::certs::manifest::ProvisionManifest;
use crate::config::Layout;
use crate::fsio::{self, WriteOutcome};
use crate::Result;

/// What happened to one artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactOutcome {
    /// Material was written or its mode corrected.
    Provisioned(WriteOutcome),
    /// No material; a previously provisioned inline file was removed.
    Retired,
    /// No material and nothing on disk to clean up.
    Absent,
}

impl ArtifactOutcome {
    /// Whether the filesystem was modified.
    #[must_use]
    pub fn changed(self) -> bool {
        match self {
            Self::Provisioned(outcome) => outcome.changed(),
            Self::Retired => true,
            Self::Absent => false,
        }
    }
}

/// Provisioning result for one artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactStatus {
    /// Set member.
    pub kind: ArtifactKind,
    /// Where the material came from.
    pub source: ArtifactSource,
    /// Present, non-empty and successfully placed.
    pub usable: bool,
    /// Filesystem effect.
    pub outcome: ArtifactOutcome,
}

/// Provisioning result for the whole set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionReport {
    /// Per-artifact results in [`ArtifactKind::ALL`] order.
    pub artifacts: Vec<ArtifactStatus>,
}

impl ProvisionReport {
    /// Certificate authentication may be enabled only when this is `true`.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.artifacts.len() == ArtifactKind::ALL.len() && self.artifacts.iter().all(|a| a.usable)
    }

    /// Whether any artifact was written, corrected or removed.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.artifacts.iter().any(|a| a.outcome.changed())
    }

    /// Status of `kind`.
    #[must_use]
    pub fn get(&self, kind: ArtifactKind) -> Option<&ArtifactStatus> {
        self.artifacts.iter().find(|a| a.kind == kind)
    }
}

/// Provision every artifact of `set` under `layout`.
///
/// # Errors
///
/// Any filesystem failure is returned immediately; the atomic write
/// primitive guarantees no partially written artifact is left at its target.
pub fn provision(set: &CertificateSet, layout: &Layout) -> Result<ProvisionReport> {
    let manifest_path = layout.manifest_file();
    let mut manifest = ProvisionManifest::load(&manifest_path)?;
    let mut artifacts = Vec::with_capacity(ArtifactKind::ALL.len());

    for artifact in set.iter() {
        let status = match artifact.content.as_deref().filter(|c| !c.is_empty()) {
            Some(content) => place(artifact, content, &mut manifest, &manifest_path)?,
            None => retire(artifact, &mut manifest)?,
        };
        artifacts.push(status);
    }

    manifest.save(&manifest_path)?;

    let report = ProvisionReport { artifacts };
    if report.is_usable() {
        info!("Certificate set complete; certificate authentication available for WAN");
    } else {
        let missing: Vec<&str> = report
            .artifacts
            .iter()
            .filter(|a| !a.usable)
            .map(|a| a.kind.file_name())
            .collect();
        info!(missing = ?missing, "Certificate set incomplete; WAN certificate authentication disabled");
    }
    Ok(report)
}

fn place(
    artifact: &CertificateArtifact,
    content: &[u8],
    manifest: &mut ProvisionManifest,
    manifest_path: &Path,
) -> Result<ArtifactStatus> {
    let kind = artifact.kind;
    let inline = artifact.source == ArtifactSource::Inline;

    if inline && !manifest.wrote(kind.file_name(), content) {
        manifest.record(kind.file_name(), content);
        manifest.save(manifest_path)?;
    }

    let outcome = fsio::write_if_changed(&artifact.target, content, kind.mode())?;

    if inline {
        manifest.settle(kind.file_name(), content);
    } else {
        // Operator material is never ours to retire.
        manifest.forget(kind.file_name());
    }

    info!(
        artifact = %kind,
        source = %artifact.source,
        path = %artifact.target.display(),
        changed = outcome.changed(),
        "Certificate artifact provisioned"
    );
    if !kind.is_private() {
        inspect(kind, content);
    }

    Ok(ArtifactStatus {
        kind,
        source: artifact.source,
        usable: true,
        outcome: ArtifactOutcome::Provisioned(outcome),
    })
}

fn retire(artifact: &CertificateArtifact, manifest: &mut ProvisionManifest) -> Result<ArtifactStatus> {
    let kind = artifact.kind;
    let mut outcome = ArtifactOutcome::Absent;

    if let Some(on_disk) = fsio::read_optional(&artifact.target)? {
        if manifest.wrote(kind.file_name(), &on_disk) {
            fsio::remove_if_exists(&artifact.target)?;
            outcome = ArtifactOutcome::Retired;
            info!(artifact = %kind, path = %artifact.target.display(), "Retired stale inline artifact");
        } else {
            debug!(artifact = %kind, path = %artifact.target.display(), "Leaving unmanaged file in place");
        }
    }
    manifest.forget(kind.file_name());

    Ok(ArtifactStatus {
        kind,
        source: ArtifactSource::None,
        usable: false,
        outcome,
    })
}

fn inspect(kind: ArtifactKind, content: &[u8]) {
    match CertSummary::from_pem(kind.file_name(), content) {
        Ok(summary) => {
            if summary.currently_valid {
                info!(
                    artifact = %kind,
                    subject = summary.display_name(),
                    dns = ?summary.san_dns_names,
                    ca = summary.is_ca,
                    not_after = %summary.not_after,
                    "Certificate details"
                );
            } else {
                warn!(
                    artifact = %kind,
                    subject = summary.display_name(),
                    not_after = %summary.not_after,
                    "Certificate is outside its validity period"
                );
            }
        }
        Err(e) => warn!(artifact = %kind, error = %e, "Could not inspect certificate"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    fn layout(dir: &Path) -> Layout {
        Layout::new(dir, dir)
    }

    fn inline_set(layout: &Layout, key: &[u8]) -> CertificateSet {
        inline_set_of(layout, b"ca", key)
    }

    fn inline_set_of(layout: &Layout, ca: &[u8], key: &[u8]) -> CertificateSet {
        let art = |kind: ArtifactKind, bytes: &[u8]| {
            CertificateArtifact::with_content(
                kind,
                bytes.to_vec(),
                ArtifactSource::Inline,
                layout.cert_target(kind),
            )
        };
        CertificateSet::new(
            art(ArtifactKind::RootCa, ca),
            art(ArtifactKind::ServerCert, b"cert"),
            art(ArtifactKind::ServerKey, key),
        )
    }

    #[test]
    fn complete_set_is_usable_and_written() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());

        let report = provision(&inline_set(&layout, b"key"), &layout).unwrap();

        assert!(report.is_usable());
        assert_eq!(fs::read(layout.cert_target(ArtifactKind::ServerKey)).unwrap(), b"key");
        assert_eq!(
            report.get(ArtifactKind::RootCa).unwrap().outcome,
            ArtifactOutcome::Provisioned(WriteOutcome::Written)
        );
    }

    #[test]
    fn second_run_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());
        let set = inline_set(&layout, b"key");

        provision(&set, &layout).unwrap();
        let report = provision(&set, &layout).unwrap();

        assert!(report.artifacts.iter().all(|a| a.outcome
            == ArtifactOutcome::Provisioned(WriteOutcome::Unchanged)));
    }

    #[test]
    fn missing_member_makes_set_unusable() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());

        let report = provision(&inline_set(&layout, b""), &layout).unwrap();

        assert!(!report.is_usable());
        assert!(report.get(ArtifactKind::RootCa).unwrap().usable);
        assert_eq!(
            report.get(ArtifactKind::ServerKey).unwrap().outcome,
            ArtifactOutcome::Absent
        );
    }

    #[test]
    fn stale_inline_artifact_is_retired() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());
        provision(&inline_set(&layout, b"key"), &layout).unwrap();

        // Key no longer supplied on the next start.
        let report = provision(&inline_set(&layout, b""), &layout).unwrap();

        assert_eq!(
            report.get(ArtifactKind::ServerKey).unwrap().outcome,
            ArtifactOutcome::Retired
        );
        assert!(!layout.cert_target(ArtifactKind::ServerKey).exists());
    }

    #[test]
    fn unmanaged_files_are_never_removed() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());
        let key_path = layout.cert_target(ArtifactKind::ServerKey);
        fs::write(&key_path, b"operator key").unwrap();

        let report = provision(&inline_set(&layout, b""), &layout).unwrap();

        assert_eq!(
            report.get(ArtifactKind::ServerKey).unwrap().outcome,
            ArtifactOutcome::Absent
        );
        assert_eq!(fs::read(&key_path).unwrap(), b"operator key");
    }

    #[test]
    fn replacement_is_recorded_before_the_target_changes() {
        // GIVEN: a provisioned set
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());
        provision(&inline_set(&layout, b"key"), &layout).unwrap();

        // WHEN: the CA is rotated but a later artifact cannot be written
        let cert_path = layout.cert_target(ArtifactKind::ServerCert);
        fs::remove_file(&cert_path).unwrap();
        fs::create_dir(&cert_path).unwrap();
        let err = provision(&inline_set_of(&layout, b"ca-2", b"key"), &layout).unwrap_err();
        assert!(matches!(err, crate::Error::Filesystem { .. }), "{err}");

        // THEN: the new CA landed and the saved manifest still claims it
        assert_eq!(fs::read(layout.cert_target(ArtifactKind::RootCa)).unwrap(), b"ca-2");
        let manifest = ProvisionManifest::load(&layout.manifest_file()).unwrap();
        assert!(manifest.wrote(ArtifactKind::RootCa.file_name(), b"ca-2"));
    }

    #[test]
    fn settled_manifest_keeps_only_the_current_digest() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());
        provision(&inline_set_of(&layout, b"ca-1", b"key"), &layout).unwrap();
        provision(&inline_set_of(&layout, b"ca-2", b"key"), &layout).unwrap();

        let manifest = ProvisionManifest::load(&layout.manifest_file()).unwrap();
        assert!(manifest.wrote(ArtifactKind::RootCa.file_name(), b"ca-2"));
        assert!(!manifest.wrote(ArtifactKind::RootCa.file_name(), b"ca-1"));
    }

    #[cfg(unix)]
    #[test]
    fn mode_only_fix_is_reported_as_a_change() {
        use std::os::unix::fs::PermissionsExt;

        // GIVEN: a provisioned key whose mode was loosened
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());
        let set = inline_set(&layout, b"key");
        provision(&set, &layout).unwrap();
        let key_path = layout.cert_target(ArtifactKind::ServerKey);
        fs::set_permissions(&key_path, fs::Permissions::from_mode(0o644)).unwrap();

        // WHEN: provisioning the same material again
        let report = provision(&set, &layout).unwrap();

        // THEN: the correction shows up in the report
        assert_eq!(
            report.get(ArtifactKind::ServerKey).unwrap().outcome,
            ArtifactOutcome::Provisioned(WriteOutcome::ModeCorrected)
        );
        assert!(report.changed());
        assert_eq!(fs::metadata(&key_path).unwrap().permissions().mode() & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn permissions_follow_artifact_kind() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());
        provision(&inline_set(&layout, b"key"), &layout).unwrap();

        let mode = |kind: ArtifactKind| {
            fs::metadata(layout.cert_target(kind))
                .unwrap()
                .permissions()
                .mode()
                & 0o777
        };
        assert_eq!(mode(ArtifactKind::ServerKey), 0o600);
        assert_eq!(mode(ArtifactKind::ServerCert), 0o644);
        assert_eq!(mode(ArtifactKind::RootCa), 0o644);
    }
}
