//! Error types for postgres-autoconf

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result type alias for postgres-autoconf
pub type Result<T> = std::result::Result<T, Error>;

/// Fatal configuration errors.
///
/// Every variant aborts the pipeline before the daemon is started. An
/// incomplete certificate set is deliberately *not* an error: it resolves to
/// "absent" and the WAN class falls through to its override or to deny.
#[derive(Error, Debug)]
pub enum Error {
    /// An input could not be parsed or does not match its schema
    #[error("Malformed input {input}: {reason}")]
    MalformedInput {
        /// Name of the offending input (usually the environment variable)
        input: String,
        /// What was wrong with it
        reason: String,
    },

    /// A security-relevant override carries a value we do not support
    #[error("Unsupported value for {variable}: '{value}'")]
    UnsupportedOverride {
        /// Environment variable carrying the override
        variable: String,
        /// The rejected value
        value: String,
    },

    /// Provisioned certificate material could not be parsed for inspection
    #[error("Cannot inspect {artifact}: {reason}")]
    CertificateInspection {
        /// File name of the artifact
        artifact: String,
        /// Parser failure
        reason: String,
    },

    /// Reading, writing or replacing a file failed
    #[error("Filesystem error at {}: {source}", path.display())]
    Filesystem {
        /// Path being operated on
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// Create a [`Error::MalformedInput`]
    pub fn malformed(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedInput {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Create a [`Error::UnsupportedOverride`]
    pub fn unsupported(variable: impl Into<String>, value: impl Into<String>) -> Self {
        Self::UnsupportedOverride {
            variable: variable.into(),
            value: value.into(),
        }
    }

    /// Create a [`Error::CertificateInspection`]
    pub fn inspection(artifact: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CertificateInspection {
            artifact: artifact.into(),
            reason: reason.into(),
        }
    }

    /// Create a [`Error::Filesystem`] for `path`
    pub fn fs(path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Filesystem {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Whether the error was caused by operator input rather than the host
    #[must_use]
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedInput { .. } | Self::UnsupportedOverride { .. }
        )
    }
}
