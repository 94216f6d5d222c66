//! `pg_hba.conf` vocabulary: connection classes, connection types, methods
//! and the rule entries the compiler emits.

use std::fmt;

use ipnetwork::IpNetwork;

use crate::hba::extra::ExtraHbaRule;

// ─────────────────────────────────────────────────────────────────────────────
// Connection class
// ─────────────────────────────────────────────────────────────────────────────

/// Trust boundary an incoming connection belongs to.
///
/// The declaration order is also the order the classes appear in the
/// rendered file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConnectionClass {
    /// Server-local Unix socket.
    Local,
    /// Same-host or trusted-network TCP.
    Lan,
    /// Untrusted network reachable through a separately attached interface.
    Wan,
}

impl ConnectionClass {
    /// All classes, in file order.
    pub const ALL: [Self; 3] = [Self::Local, Self::Lan, Self::Wan];

    /// Human-readable label used in section comments and logs.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Lan => "lan",
            Self::Wan => "wan",
        }
    }
}

impl fmt::Display for ConnectionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Connection type (TYPE column)
// ─────────────────────────────────────────────────────────────────────────────

/// The `TYPE` column of a `pg_hba.conf` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HbaConnection {
    /// `local`: Unix-domain socket.
    Local,
    /// `host`: TCP, encrypted or not.
    Host,
    /// `hostssl`: TCP, TLS only.
    HostSsl,
    /// `hostnossl`: TCP, plaintext only.
    HostNoSsl,
}

impl HbaConnection {
    /// Keyword as written in `pg_hba.conf`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Host => "host",
            Self::HostSsl => "hostssl",
            Self::HostNoSsl => "hostnossl",
        }
    }

    /// Parse a `TYPE` keyword. Case-sensitive like the daemon.
    #[must_use]
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "local" => Some(Self::Local),
            "host" => Some(Self::Host),
            "hostssl" => Some(Self::HostSsl),
            "hostnossl" => Some(Self::HostNoSsl),
            _ => None,
        }
    }
}

impl fmt::Display for HbaConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Authentication method (METHOD column)
// ─────────────────────────────────────────────────────────────────────────────

/// Authentication methods the engine is willing to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMethod {
    /// No authentication.
    Trust,
    /// MD5 challenge-response (also accepts SCRAM secrets).
    Md5,
    /// SCRAM-SHA-256 challenge-response.
    ScramSha256,
    /// Cleartext password.
    Password,
    /// TLS client certificate.
    Cert,
}

impl AuthMethod {
    /// Keyword as written in `pg_hba.conf`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trust => "trust",
            Self::Md5 => "md5",
            Self::ScramSha256 => "scram-sha-256",
            Self::Password => "password",
            Self::Cert => "cert",
        }
    }

    /// Parse a `METHOD` keyword.
    #[must_use]
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "trust" => Some(Self::Trust),
            "md5" => Some(Self::Md5),
            "scram-sha-256" => Some(Self::ScramSha256),
            "password" => Some(Self::Password),
            "cert" => Some(Self::Cert),
            _ => None,
        }
    }

    /// Whether the method proves identity with a password.
    #[must_use]
    pub fn is_password(self) -> bool {
        matches!(self, Self::Md5 | Self::ScramSha256 | Self::Password)
    }

    /// Map the method onto the decision it represents.
    #[must_use]
    pub fn decision(self) -> AuthDecision {
        match self {
            Self::Trust => AuthDecision::Trust,
            Self::Cert => AuthDecision::Cert,
            method => AuthDecision::Password(method),
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Decision
// ─────────────────────────────────────────────────────────────────────────────

/// How a connection class must authenticate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDecision {
    /// Accept without credentials.
    Trust,
    /// Require a password using the given method.
    Password(AuthMethod),
    /// Require a client certificate chaining to the provisioned root.
    Cert,
    /// No automatic rule; the daemon's implicit reject applies.
    Deny,
}

impl fmt::Display for AuthDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trust => f.write_str("trust"),
            Self::Password(method) => write!(f, "password({method})"),
            Self::Cert => f.write_str("cert"),
            Self::Deny => f.write_str("deny"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Rule entries
// ─────────────────────────────────────────────────────────────────────────────

/// A record generated by the compiler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoRule {
    /// Class the record serves.
    pub class: ConnectionClass,
    /// `TYPE` column.
    pub connection: HbaConnection,
    /// `DATABASE` column.
    pub database: String,
    /// `USER` column.
    pub user: String,
    /// `ADDRESS` column; `None` for `local` records.
    pub address: Option<IpNetwork>,
    /// `METHOD` column.
    pub method: AuthMethod,
}

impl fmt::Display for AutoRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.connection, self.database, self.user)?;
        if let Some(address) = self.address {
            write!(f, " {address}")?;
        }
        write!(f, " {}", self.method)
    }
}

/// One line of the compiled access-control file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HbaEntry {
    /// Generated by the decision table.
    Auto(AutoRule),
    /// Supplied verbatim by the operator.
    Extra(ExtraHbaRule),
}

impl HbaEntry {
    /// Class the entry was placed under.
    #[must_use]
    pub fn class(&self) -> ConnectionClass {
        match self {
            Self::Auto(rule) => rule.class,
            Self::Extra(rule) => rule.class(),
        }
    }

    /// Whether the operator supplied this entry.
    #[must_use]
    pub fn is_extra(&self) -> bool {
        matches!(self, Self::Extra(_))
    }
}

impl fmt::Display for HbaEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto(rule) => rule.fmt(f),
            Self::Extra(rule) => f.write_str(rule.line()),
        }
    }
}
