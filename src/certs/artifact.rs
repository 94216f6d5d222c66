//! Certificate artifacts and the three-member certificate set.

use std::fmt;
use std::path::PathBuf;

// ─────────────────────────────────────────────────────────────────────────────
// Artifact kind
// ─────────────────────────────────────────────────────────────────────────────

/// Which member of the certificate set an artifact is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ArtifactKind {
    /// CA that client certificates must chain to.
    RootCa,
    /// Server certificate presented to clients.
    ServerCert,
    /// Private key of the server certificate.
    ServerKey,
}

impl ArtifactKind {
    /// All members, in provisioning order.
    pub const ALL: [Self; 3] = [Self::RootCa, Self::ServerCert, Self::ServerKey];

    /// File name used both as the `CERTS` key and on disk.
    #[must_use]
    pub fn file_name(self) -> &'static str {
        match self {
            Self::RootCa => "client.ca.cert.pem",
            Self::ServerCert => "server.cert.pem",
            Self::ServerKey => "server.key.pem",
        }
    }

    /// Look up a kind by its file name.
    #[must_use]
    pub fn from_file_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.file_name() == name)
    }

    /// Whether the artifact is private key material.
    #[must_use]
    pub fn is_private(self) -> bool {
        self == Self::ServerKey
    }

    /// Required permission bits: owner-only for keys, world-readable otherwise.
    #[must_use]
    pub fn mode(self) -> u32 {
        if self.is_private() { 0o600 } else { 0o644 }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Source
// ─────────────────────────────────────────────────────────────────────────────

/// Where an artifact's content came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactSource {
    /// A file in the mount directory.
    Mounted,
    /// The `CERTS` variable.
    Inline,
    /// Nowhere; the artifact is absent.
    None,
}

impl ArtifactSource {
    /// Label used in logs.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Mounted => "mounted",
            Self::Inline => "inline-variable",
            Self::None => "none",
        }
    }
}

impl fmt::Display for ArtifactSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Artifact
// ─────────────────────────────────────────────────────────────────────────────

/// A resolved certificate artifact.
///
/// `content` is `Some` only for non-empty material.
#[derive(Clone, PartialEq, Eq)]
pub struct CertificateArtifact {
    /// Set member.
    pub kind: ArtifactKind,
    /// Resolved bytes.
    pub content: Option<Vec<u8>>,
    /// Where the bytes came from.
    pub source: ArtifactSource,
    /// Canonical path the daemon reads.
    pub target: PathBuf,
}

impl CertificateArtifact {
    /// An artifact with no material.
    #[must_use]
    pub fn absent(kind: ArtifactKind, target: PathBuf) -> Self {
        Self {
            kind,
            content: None,
            source: ArtifactSource::None,
            target,
        }
    }

    /// An artifact with material from `source`; empty material is absent.
    #[must_use]
    pub fn with_content(
        kind: ArtifactKind,
        content: Vec<u8>,
        source: ArtifactSource,
        target: PathBuf,
    ) -> Self {
        if content.is_empty() {
            return Self::absent(kind, target);
        }
        Self {
            kind,
            content: Some(content),
            source,
            target,
        }
    }

    /// Whether non-empty material was resolved.
    #[must_use]
    pub fn is_present(&self) -> bool {
        self.content.as_ref().is_some_and(|c| !c.is_empty())
    }
}

// Never print key material.
impl fmt::Debug for CertificateArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateArtifact")
            .field("kind", &self.kind)
            .field("bytes", &self.content.as_ref().map(Vec::len))
            .field("source", &self.source)
            .field("target", &self.target)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Set
// ─────────────────────────────────────────────────────────────────────────────

/// Root CA, server certificate and server key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateSet {
    artifacts: [CertificateArtifact; 3],
}

impl CertificateSet {
    /// Build a set from its three members in [`ArtifactKind::ALL`] order.
    #[must_use]
    pub fn new(
        root_ca: CertificateArtifact,
        server_cert: CertificateArtifact,
        server_key: CertificateArtifact,
    ) -> Self {
        Self {
            artifacts: [root_ca, server_cert, server_key],
        }
    }

    /// Member of the given kind.
    #[must_use]
    pub fn get(&self, kind: ArtifactKind) -> &CertificateArtifact {
        match kind {
            ArtifactKind::RootCa => &self.artifacts[0],
            ArtifactKind::ServerCert => &self.artifacts[1],
            ArtifactKind::ServerKey => &self.artifacts[2],
        }
    }

    /// Members in provisioning order.
    pub fn iter(&self) -> impl Iterator<Item = &CertificateArtifact> {
        self.artifacts.iter()
    }

    /// Whether every member resolved to non-empty material.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.artifacts.iter().all(CertificateArtifact::is_present)
    }

    /// Kinds that did not resolve.
    #[must_use]
    pub fn missing(&self) -> Vec<ArtifactKind> {
        self.iter()
            .filter(|a| !a.is_present())
            .map(|a| a.kind)
            .collect()
    }
}
