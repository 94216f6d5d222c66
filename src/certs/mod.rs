//! Certificate artifacts: resolution types, provisioning and inspection.

pub mod artifact;
pub mod identity;
pub mod manifest;
pub mod provision;

pub use artifact::{ArtifactKind, ArtifactSource, CertificateArtifact, CertificateSet};
pub use identity::CertSummary;
pub use manifest::{MANIFEST_FILE, ProvisionManifest};
pub use provision::{ArtifactOutcome, ArtifactStatus, ProvisionReport, provision};
