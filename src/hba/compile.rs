//! The access-control decision table.
//!
//! [`compile`] is a pure function of the resolved policy and the certificate
//! set's usability. Records are accumulated per connection class in file
//! order, and each extra rule follows the automatic records of the earliest
//! class it can match:
//!
//! ```text
//! Local: local <db> <user> <LOCAL_AUTH_METHOD>        + local extras
//! Lan:   <LAN_CONNECTION> <db> <user> <cidr> <method>   + lan extras
//! Wan:   certs usable  → hostssl <db> <user> <cidr> cert
//!        override set  → <WAN_CONNECTION> <db> <user> <cidr> <method>
//!        otherwise     → nothing (implicit reject)     + wan extras
//! ```
//!
//! The daemon evaluates records top to bottom and the first match decides,
//! so WAN traffic that matches nothing is rejected. The compiler never emits
//! a catch-all allow.

use std::fmt::Write as _;

use ipnetwork::IpNetwork;

use crate::hba::extra::ExtraHbaRule;
use crate::hba::rule::{AuthDecision, AuthMethod, AutoRule, ConnectionClass, HbaConnection, HbaEntry};

/// Databases and users a class's records are generated for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    /// `DATABASE` column values.
    pub databases: Vec<String>,
    /// `USER` column values.
    pub users: Vec<String>,
}

impl Default for Scope {
    fn default() -> Self {
        Self {
            databases: vec!["all".to_string()],
            users: vec!["all".to_string()],
        }
    }
}

/// Local socket policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalPolicy {
    /// Method for socket connections; `trust` unless overridden.
    pub method: AuthMethod,
}

impl Default for LocalPolicy {
    fn default() -> Self {
        Self {
            method: AuthMethod::Trust,
        }
    }
}

/// Trusted-network policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanPolicy {
    /// Record type; `host` unless overridden.
    pub connection: HbaConnection,
    /// Password method; `md5` unless overridden.
    pub method: AuthMethod,
    /// Address ranges considered LAN.
    pub networks: Vec<IpNetwork>,
    /// Databases and users.
    pub scope: Scope,
}

/// Untrusted-network policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WanPolicy {
    /// Record type for the password override; `hostssl` unless overridden.
    pub connection: HbaConnection,
    /// Explicit password method used when certificates are unusable.
    pub override_method: Option<AuthMethod>,
    /// Address ranges considered WAN.
    pub networks: Vec<IpNetwork>,
    /// Databases and users.
    pub scope: Scope,
}

/// Everything the decision table depends on besides certificates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyInputs {
    /// Local class.
    pub local: LocalPolicy,
    /// LAN class.
    pub lan: LanPolicy,
    /// WAN class.
    pub wan: WanPolicy,
    /// Operator rules, in the order supplied.
    pub extra_rules: Vec<ExtraHbaRule>,
}

/// Per-class outcome of the decision table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decisions {
    /// Local class.
    pub local: AuthDecision,
    /// LAN class.
    pub lan: AuthDecision,
    /// WAN class.
    pub wan: AuthDecision,
}

impl Decisions {
    /// Decision for `class`.
    #[must_use]
    pub fn get(&self, class: ConnectionClass) -> AuthDecision {
        match class {
            ConnectionClass::Local => self.local,
            ConnectionClass::Lan => self.lan,
            ConnectionClass::Wan => self.wan,
        }
    }
}

/// Ordered, compiled access-control records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HbaRuleSet {
    entries: Vec<HbaEntry>,
    decisions: Decisions,
}

impl HbaRuleSet {
    /// All records in evaluation order.
    #[must_use]
    pub fn entries(&self) -> &[HbaEntry] {
        &self.entries
    }

    /// Per-class decisions.
    #[must_use]
    pub fn decisions(&self) -> Decisions {
        self.decisions
    }

    /// Records placed under `class`, in evaluation order.
    pub fn for_class(&self, class: ConnectionClass) -> impl Iterator<Item = &HbaEntry> {
        self.entries.iter().filter(move |e| e.class() == class)
    }

    /// Serialize to `pg_hba.conf` text.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::from(
            "# Generated by postgres-autoconf at container start; local edits are overwritten.\n\
             # Add records through HBA_EXTRA_RULES instead.\n\
             # TYPE DATABASE USER ADDRESS METHOD\n",
        );

        for class in ConnectionClass::ALL {
            let _ = write!(
                out,
                "\n# {} connections: {}\n",
                class.label(),
                self.decisions.get(class)
            );
            let mut any = false;
            for entry in self.for_class(class) {
                let _ = writeln!(out, "{entry}");
                any = true;
            }
            if !any {
                out.push_str("# (no records; unmatched connections are rejected)\n");
            }
        }

        out
    }
}

/// Compile the ordered rule list.
///
/// `cert_set_usable` must only be `true` when the root CA, server certificate
/// and server key were all resolved and provisioned.
#[must_use]
pub fn compile(policy: &PolicyInputs, cert_set_usable: bool) -> HbaRuleSet {
    let decisions = Decisions {
        local: policy.local.method.decision(),
        lan: policy.lan.method.decision(),
        wan: wan_decision(&policy.wan, cert_set_usable),
    };

    let mut entries = Vec::new();
    for class in ConnectionClass::ALL {
        entries.extend(auto_rules(policy, class, decisions.get(class)).map(HbaEntry::Auto));
        entries.extend(
            policy
                .extra_rules
                .iter()
                .filter(|rule| rule.class() == class)
                .cloned()
                .map(HbaEntry::Extra),
        );
    }

    HbaRuleSet { entries, decisions }
}

fn wan_decision(wan: &WanPolicy, cert_set_usable: bool) -> AuthDecision {
    if cert_set_usable {
        AuthDecision::Cert
    } else if let Some(method) = wan.override_method {
        AuthDecision::Password(method)
    } else {
        AuthDecision::Deny
    }
}

fn auto_rules<'a>(
    policy: &'a PolicyInputs,
    class: ConnectionClass,
    decision: AuthDecision,
) -> Box<dyn Iterator<Item = AutoRule> + 'a> {
    let method = match decision {
        AuthDecision::Deny => return Box::new(std::iter::empty()),
        AuthDecision::Trust => AuthMethod::Trust,
        AuthDecision::Cert => AuthMethod::Cert,
        AuthDecision::Password(method) => method,
    };

    match class {
        ConnectionClass::Local => Box::new(std::iter::once(AutoRule {
            class,
            connection: HbaConnection::Local,
            database: "all".to_string(),
            user: "all".to_string(),
            address: None,
            method,
        })),
        ConnectionClass::Lan => Box::new(host_rules(
            class,
            policy.lan.connection,
            &policy.lan.scope,
            &policy.lan.networks,
            method,
        )),
        ConnectionClass::Wan => {
            // Client certificates are only presented over TLS.
            let connection = if method == AuthMethod::Cert {
                HbaConnection::HostSsl
            } else {
                policy.wan.connection
            };
            Box::new(host_rules(
                class,
                connection,
                &policy.wan.scope,
                &policy.wan.networks,
                method,
            ))
        }
    }
}

fn host_rules<'a>(
    class: ConnectionClass,
    connection: HbaConnection,
    scope: &'a Scope,
    networks: &'a [IpNetwork],
    method: AuthMethod,
) -> impl Iterator<Item = AutoRule> + 'a {
    scope.databases.iter().flat_map(move |database| {
        scope.users.iter().flat_map(move |user| {
            networks.iter().map(move |network| AutoRule {
                class,
                connection,
                database: database.clone(),
                user: user.clone(),
                address: Some(*network),
                method,
            })
        })
    })
}
