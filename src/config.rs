//! Input resolution.
//!
//! Everything the pipeline needs is collected here, once, into an immutable
//! [`Snapshot`]. The environment is read only by clap (through [`RawInputs`]);
//! nothing downstream of [`resolve`] looks at it again.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use clap::Args;
use ipnetwork::IpNetwork;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::certs::{
    ArtifactKind, ArtifactSource, CertificateArtifact, CertificateSet, MANIFEST_FILE,
    ProvisionManifest,
};
use crate::fsio;
use crate::hba::network::{default_wan_networks, detect_lan_networks};
use crate::hba::{
    AuthMethod, ExtraHbaRule, HbaConnection, LanPolicy, LocalPolicy, PolicyInputs, Scope,
    WanPolicy,
};
use crate::{Error, Result};

/// Default configuration and certificate directory.
pub const DEFAULT_CONF_DIR: &str = "/etc/postgres";

/// Default routing table used for LAN detection.
pub const DEFAULT_ROUTE_TABLE: &str = "/proc/net/route";

/// Access-control file name.
pub const HBA_FILE: &str = "pg_hba.conf";

/// Engine-owned base configuration file name.
pub const BASE_CONF_FILE: &str = "postgresql.conf";

/// Operator overlay file name.
pub const OVERLAY_FILE: &str = "postgresql.extra.conf";

// ─────────────────────────────────────────────────────────────────────────────
// Raw inputs
// ─────────────────────────────────────────────────────────────────────────────

/// Unparsed inputs, exactly as supplied on the command line or environment.
#[derive(Args, Clone, Default, PartialEq, Eq)]
pub struct RawInputs {
    /// Bootstrap database name
    #[arg(long, env = "POSTGRES_DB")]
    pub postgres_db: Option<String>,

    /// Bootstrap superuser name
    #[arg(long, env = "POSTGRES_USER")]
    pub postgres_user: Option<String>,

    /// Bootstrap superuser password
    #[arg(long, env = "POSTGRES_PASSWORD", hide_env_values = true)]
    pub postgres_password: Option<String>,

    /// JSON object mapping certificate file names to PEM text (or false/null)
    #[arg(long, env = "CERTS", hide_env_values = true)]
    pub certs: Option<String>,

    /// JSON array of extra pg_hba.conf records
    #[arg(long, env = "HBA_EXTRA_RULES")]
    pub hba_extra_rules: Option<String>,

    /// Free-text settings written to the configuration overlay
    #[arg(long, env = "CONF_EXTRA")]
    pub conf_extra: Option<String>,

    /// WAN password method override (md5, scram-sha-256, password; cert = none)
    #[arg(long, env = "WAN_AUTH_METHOD")]
    pub wan_auth_method: Option<String>,

    /// WAN record type for the password override (hostssl, host)
    #[arg(long, env = "WAN_CONNECTION")]
    pub wan_connection: Option<String>,

    /// JSON array of WAN address ranges
    #[arg(long, env = "WAN_CIDRS")]
    pub wan_cidrs: Option<String>,

    /// JSON array of databases WAN records apply to
    #[arg(long, env = "WAN_DATABASES")]
    pub wan_databases: Option<String>,

    /// JSON array of users WAN records apply to
    #[arg(long, env = "WAN_USERS")]
    pub wan_users: Option<String>,

    /// LAN password method (md5, scram-sha-256, password)
    #[arg(long, env = "LAN_AUTH_METHOD")]
    pub lan_auth_method: Option<String>,

    /// LAN record type (host, hostssl, hostnossl)
    #[arg(long, env = "LAN_CONNECTION")]
    pub lan_connection: Option<String>,

    /// JSON array of LAN address ranges (detected when unset)
    #[arg(long, env = "LAN_CIDRS")]
    pub lan_cidrs: Option<String>,

    /// JSON array of databases LAN records apply to
    #[arg(long, env = "LAN_DATABASES")]
    pub lan_databases: Option<String>,

    /// JSON array of users LAN records apply to
    #[arg(long, env = "LAN_USERS")]
    pub lan_users: Option<String>,

    /// Local socket method (trust, md5, scram-sha-256, password)
    #[arg(long, env = "LOCAL_AUTH_METHOD")]
    pub local_auth_method: Option<String>,
}

impl fmt::Debug for RawInputs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redacted = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("RawInputs")
            .field("postgres_db", &self.postgres_db)
            .field("postgres_user", &self.postgres_user)
            .field("postgres_password", &redacted(&self.postgres_password))
            .field("certs", &redacted(&self.certs))
            .field("hba_extra_rules", &self.hba_extra_rules)
            .field("conf_extra", &self.conf_extra)
            .field("wan_auth_method", &self.wan_auth_method)
            .field("wan_connection", &self.wan_connection)
            .field("wan_cidrs", &self.wan_cidrs)
            .field("wan_databases", &self.wan_databases)
            .field("wan_users", &self.wan_users)
            .field("lan_auth_method", &self.lan_auth_method)
            .field("lan_connection", &self.lan_connection)
            .field("lan_cidrs", &self.lan_cidrs)
            .field("lan_databases", &self.lan_databases)
            .field("lan_users", &self.lan_users)
            .field("local_auth_method", &self.local_auth_method)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Layout
// ─────────────────────────────────────────────────────────────────────────────

/// Where files are read from and written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    /// Directory holding every rendered file and provisioned artifact.
    pub conf_dir: PathBuf,
    /// Directory operators mount certificate files into.
    pub mount_dir: PathBuf,
    /// Routing table consulted when `LAN_CIDRS` is unset.
    pub route_table: PathBuf,
}

impl Layout {
    /// Layout with the default routing table.
    pub fn new(conf_dir: impl Into<PathBuf>, mount_dir: impl Into<PathBuf>) -> Self {
        Self {
            conf_dir: conf_dir.into(),
            mount_dir: mount_dir.into(),
            route_table: PathBuf::from(DEFAULT_ROUTE_TABLE),
        }
    }

    /// Replace the routing table path.
    #[must_use]
    pub fn with_route_table(mut self, route_table: impl Into<PathBuf>) -> Self {
        self.route_table = route_table.into();
        self
    }

    /// `pg_hba.conf`.
    #[must_use]
    pub fn hba_file(&self) -> PathBuf {
        self.conf_dir.join(HBA_FILE)
    }

    /// `postgresql.conf`.
    #[must_use]
    pub fn base_conf_file(&self) -> PathBuf {
        self.conf_dir.join(BASE_CONF_FILE)
    }

    /// `postgresql.extra.conf`.
    #[must_use]
    pub fn overlay_file(&self) -> PathBuf {
        self.conf_dir.join(OVERLAY_FILE)
    }

    /// Provisioning manifest.
    #[must_use]
    pub fn manifest_file(&self) -> PathBuf {
        self.conf_dir.join(MANIFEST_FILE)
    }

    /// Canonical path the daemon reads `kind` from.
    #[must_use]
    pub fn cert_target(&self, kind: ArtifactKind) -> PathBuf {
        self.conf_dir.join(kind.file_name())
    }

    /// Where an operator would mount `kind`.
    #[must_use]
    pub fn cert_mount(&self, kind: ArtifactKind) -> PathBuf {
        self.mount_dir.join(kind.file_name())
    }
}

impl Default for Layout {
    fn default() -> Self {
        Self::new(DEFAULT_CONF_DIR, DEFAULT_CONF_DIR)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Snapshot
// ─────────────────────────────────────────────────────────────────────────────

/// Bootstrap identity, passed through untouched.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Bootstrap {
    /// `POSTGRES_DB`.
    pub database: Option<String>,
    /// `POSTGRES_USER`.
    pub user: Option<String>,
    /// `POSTGRES_PASSWORD`.
    pub password: Option<String>,
}

impl fmt::Debug for Bootstrap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bootstrap")
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Immutable result of input resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Bootstrap identity.
    pub bootstrap: Bootstrap,
    /// Resolved certificate artifacts.
    pub certificates: CertificateSet,
    /// Per-class policy and extra rules.
    pub policy: PolicyInputs,
    /// Raw `CONF_EXTRA`.
    pub conf_extra: String,
    /// Filesystem layout.
    pub layout: Layout,
}

/// Resolve every input into a [`Snapshot`].
///
/// Nothing is written. Mounted certificate files and the provisioning
/// manifest are read; so is the routing table when `LAN_CIDRS` is unset.
///
/// # Errors
///
/// [`Error::MalformedInput`] for unparseable or ill-typed inputs,
/// [`Error::UnsupportedOverride`] for unknown methods or record types, and
/// [`Error::Filesystem`] when a mount or the routing table cannot be read.
pub fn resolve(raw: &RawInputs, layout: Layout) -> Result<Snapshot> {
    let inline_certs = parse_certs(non_blank(raw.certs.as_ref()))?;
    let policy = resolve_policy(raw, &layout)?;
    let certificates = resolve_certificates(&inline_certs, &layout)?;
    require_tls_for_hostssl(&policy, &certificates)?;

    Ok(Snapshot {
        bootstrap: Bootstrap {
            database: raw.postgres_db.clone(),
            user: raw.postgres_user.clone(),
            password: raw.postgres_password.clone(),
        },
        certificates,
        policy,
        conf_extra: raw.conf_extra.clone().unwrap_or_default(),
        layout,
    })
}

/// `hostssl` records only match once the server enables TLS, which needs a
/// complete certificate set. Without one, such records would never match.
fn require_tls_for_hostssl(policy: &PolicyInputs, certificates: &CertificateSet) -> Result<()> {
    if certificates.is_complete() {
        return Ok(());
    }
    if policy.wan.override_method.is_some() && policy.wan.connection == HbaConnection::HostSsl {
        warn!(missing = ?certificates.missing(), "WAN_AUTH_METHOD needs TLS; set WAN_CONNECTION=host or provide certificates");
        return Err(Error::unsupported("WAN_CONNECTION", "hostssl"));
    }
    if policy.lan.connection == HbaConnection::HostSsl {
        warn!(missing = ?certificates.missing(), "LAN_CONNECTION=hostssl needs certificates");
        return Err(Error::unsupported("LAN_CONNECTION", "hostssl"));
    }
    Ok(())
}

fn non_blank(value: Option<&String>) -> Option<&str> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty())
}

// ─────────────────────────────────────────────────────────────────────────────
// Certificates
// ─────────────────────────────────────────────────────────────────────────────

fn parse_certs(raw: Option<&str>) -> Result<BTreeMap<ArtifactKind, String>> {
    let mut certs = BTreeMap::new();
    let Some(raw) = raw else {
        return Ok(certs);
    };

    let value: Value = serde_json::from_str(raw)
        .map_err(|e| Error::malformed("CERTS", format!("invalid JSON: {e}")))?;
    let Value::Object(map) = value else {
        return Err(Error::malformed("CERTS", "expected a JSON object"));
    };

    for (name, value) in map {
        let kind = ArtifactKind::from_file_name(&name)
            .ok_or_else(|| Error::malformed("CERTS", format!("unknown certificate file '{name}'")))?;
        match value {
            Value::String(pem) if !pem.is_empty() => {
                certs.insert(kind, pem);
            }
            Value::String(_) | Value::Bool(false) | Value::Null => {}
            other => {
                return Err(Error::malformed(
                    "CERTS",
                    format!("'{name}' must be a string, false or null, got {other}"),
                ));
            }
        }
    }
    Ok(certs)
}

fn resolve_certificates(
    inline: &BTreeMap<ArtifactKind, String>,
    layout: &Layout,
) -> Result<CertificateSet> {
    let manifest = ProvisionManifest::load(&layout.manifest_file())?;
    let [root_ca, server_cert, server_key] =
        ArtifactKind::ALL.map(|kind| resolve_artifact(kind, inline.get(&kind), layout, &manifest));
    Ok(CertificateSet::new(root_ca?, server_cert?, server_key?))
}

fn resolve_artifact(
    kind: ArtifactKind,
    inline: Option<&String>,
    layout: &Layout,
    manifest: &ProvisionManifest,
) -> Result<CertificateArtifact> {
    let target = layout.cert_target(kind);
    let mount = layout.cert_mount(kind);

    if let Some(bytes) = fsio::read_optional(&mount)? {
        let own_write = mount == target && manifest.wrote(kind.file_name(), &bytes);
        if own_write {
            debug!(artifact = %kind, "File at target was provisioned from CERTS; not a mount");
        } else {
            let artifact =
                CertificateArtifact::with_content(kind, bytes, ArtifactSource::Mounted, target);
            if inline.is_some() {
                info!(artifact = %kind, "Mounted file takes precedence over CERTS");
            }
            debug!(artifact = %kind, source = %artifact.source, "Resolved certificate artifact");
            return Ok(artifact);
        }
    }

    let artifact = match inline {
        Some(pem) => CertificateArtifact::with_content(
            kind,
            pem.clone().into_bytes(),
            ArtifactSource::Inline,
            target,
        ),
        None => CertificateArtifact::absent(kind, target),
    };
    debug!(artifact = %kind, source = %artifact.source, "Resolved certificate artifact");
    Ok(artifact)
}

// ─────────────────────────────────────────────────────────────────────────────
// Policy
// ─────────────────────────────────────────────────────────────────────────────

fn resolve_policy(raw: &RawInputs, layout: &Layout) -> Result<PolicyInputs> {
    let local = LocalPolicy {
        method: parse_method(
            "LOCAL_AUTH_METHOD",
            non_blank(raw.local_auth_method.as_ref()),
            AuthMethod::Trust,
            |m| m == AuthMethod::Trust || m.is_password(),
        )?,
    };

    let lan_networks = match parse_cidrs("LAN_CIDRS", non_blank(raw.lan_cidrs.as_ref()))? {
        Some(networks) => networks,
        None => detect_lan_networks(&layout.route_table)?,
    };
    let lan = LanPolicy {
        connection: parse_connection(
            "LAN_CONNECTION",
            non_blank(raw.lan_connection.as_ref()),
            HbaConnection::Host,
            &[HbaConnection::Host, HbaConnection::HostSsl, HbaConnection::HostNoSsl],
        )?,
        method: parse_method(
            "LAN_AUTH_METHOD",
            non_blank(raw.lan_auth_method.as_ref()),
            AuthMethod::Md5,
            AuthMethod::is_password,
        )?,
        scope: parse_scope(
            ("LAN_DATABASES", non_blank(raw.lan_databases.as_ref())),
            ("LAN_USERS", non_blank(raw.lan_users.as_ref())),
        )?,
        networks: lan_networks,
    };

    let wan = WanPolicy {
        connection: parse_connection(
            "WAN_CONNECTION",
            non_blank(raw.wan_connection.as_ref()),
            HbaConnection::HostSsl,
            &[HbaConnection::HostSsl, HbaConnection::Host],
        )?,
        override_method: parse_wan_override(non_blank(raw.wan_auth_method.as_ref()))?,
        networks: parse_cidrs("WAN_CIDRS", non_blank(raw.wan_cidrs.as_ref()))?
            .unwrap_or_else(default_wan_networks),
        scope: parse_scope(
            ("WAN_DATABASES", non_blank(raw.wan_databases.as_ref())),
            ("WAN_USERS", non_blank(raw.wan_users.as_ref())),
        )?,
    };

    let extra_rules = parse_string_list("HBA_EXTRA_RULES", non_blank(raw.hba_extra_rules.as_ref()))?
        .unwrap_or_default()
        .iter()
        .map(|line| ExtraHbaRule::classify(line, &lan.networks))
        .collect::<Result<Vec<_>>>()?;

    info!(
        local = %local.method,
        lan = %lan.method,
        lan_networks = ?lan.networks,
        wan_override = ?wan.override_method.map(AuthMethod::as_str),
        extra_rules = extra_rules.len(),
        "Resolved access policy"
    );

    Ok(PolicyInputs {
        local,
        lan,
        wan,
        extra_rules,
    })
}

fn parse_method(
    variable: &str,
    raw: Option<&str>,
    default: AuthMethod,
    allowed: impl Fn(AuthMethod) -> bool,
) -> Result<AuthMethod> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    AuthMethod::from_keyword(raw)
        .filter(|m| allowed(*m))
        .ok_or_else(|| Error::unsupported(variable, raw))
}

/// `cert` (or unset) means "no override"; only password methods override.
fn parse_wan_override(raw: Option<&str>) -> Result<Option<AuthMethod>> {
    match raw.map(|r| (r, AuthMethod::from_keyword(r))) {
        None | Some((_, Some(AuthMethod::Cert))) => Ok(None),
        Some((_, Some(method))) if method.is_password() => Ok(Some(method)),
        Some((raw, _)) => Err(Error::unsupported("WAN_AUTH_METHOD", raw)),
    }
}

fn parse_connection(
    variable: &str,
    raw: Option<&str>,
    default: HbaConnection,
    allowed: &[HbaConnection],
) -> Result<HbaConnection> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    HbaConnection::from_keyword(raw)
        .filter(|c| allowed.contains(c))
        .ok_or_else(|| Error::unsupported(variable, raw))
}

fn parse_string_list(input: &str, raw: Option<&str>) -> Result<Option<Vec<String>>> {
    raw.map(|raw| {
        serde_json::from_str::<Vec<String>>(raw)
            .map_err(|e| Error::malformed(input, format!("expected a JSON array of strings: {e}")))
    })
    .transpose()
}

fn parse_cidrs(input: &str, raw: Option<&str>) -> Result<Option<Vec<IpNetwork>>> {
    let Some(list) = parse_string_list(input, raw)? else {
        return Ok(None);
    };
    list.iter()
        .map(|cidr| {
            cidr.trim()
                .parse::<IpNetwork>()
                .map_err(|e| Error::malformed(input, format!("invalid address range '{cidr}': {e}")))
        })
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

fn parse_scope(databases: (&str, Option<&str>), users: (&str, Option<&str>)) -> Result<Scope> {
    let defaults = Scope::default();
    Ok(Scope {
        databases: parse_names(databases.0, databases.1)?.unwrap_or(defaults.databases),
        users: parse_names(users.0, users.1)?.unwrap_or(defaults.users),
    })
}

fn parse_names(input: &str, raw: Option<&str>) -> Result<Option<Vec<String>>> {
    let Some(names) = parse_string_list(input, raw)? else {
        return Ok(None);
    };
    if names.is_empty() {
        return Err(Error::malformed(input, "list must not be empty"));
    }
    for name in &names {
        if name.is_empty() || name.contains(|c: char| c.is_whitespace() || c == '#') {
            return Err(Error::malformed(input, format!("invalid name {name:?}")));
        }
    }
    Ok(Some(names))
}
