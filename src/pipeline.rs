//! One container start: provision, compile, render.
//!
//! Stages run strictly in order and never call back into an earlier one.
//! Any error aborts the run; files already placed stay consistent because
//! each is replaced atomically.

use tracing::{info, warn};

use crate::certs::{ProvisionReport, provision};
use crate::config::Snapshot;
use crate::hba::{AuthDecision, ConnectionClass, Decisions, HbaRuleSet, compile};
use crate::overlay::{BaseConfig, Overlay};
use crate::render::{RenderReport, RenderedFiles, render_all};
use crate::Result;

/// Outcome of [`apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    /// Certificate provisioning.
    pub certificates: ProvisionReport,
    /// Per-class authentication decisions.
    pub decisions: Decisions,
    /// Rendered configuration files.
    pub files: RenderReport,
}

impl ApplyReport {
    /// Whether anything on disk changed.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.files.changed() || self.certificates.changed()
    }
}

/// Compiled output without filesystem effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    /// Ordered access-control records.
    pub rules: HbaRuleSet,
    /// File text.
    pub files: RenderedFiles,
}

/// Compile `snapshot` assuming a complete certificate set is usable.
///
/// Used for dry runs; nothing is read or written.
#[must_use]
pub fn plan(snapshot: &Snapshot) -> Plan {
    compile_with(snapshot, snapshot.certificates.is_complete())
}

/// Run the full pipeline for `snapshot`.
pub fn apply(snapshot: &Snapshot) -> Result<ApplyReport> {
    let certificates = provision(&snapshot.certificates, &snapshot.layout)?;
    let Plan { rules, files } = compile_with(snapshot, certificates.is_usable());
    log_decisions(rules.decisions());

    let report = files.write(&snapshot.layout)?;
    Ok(ApplyReport {
        certificates,
        decisions: rules.decisions(),
        files: report,
    })
}

fn compile_with(snapshot: &Snapshot, cert_set_usable: bool) -> Plan {
    let rules = compile(&snapshot.policy, cert_set_usable);
    let overlay = Overlay::compile(&snapshot.conf_extra);
    let base = BaseConfig::new(&snapshot.layout, cert_set_usable);
    let files = render_all(&rules, &base, &overlay);
    Plan { rules, files }
}

fn log_decisions(decisions: Decisions) {
    for class in ConnectionClass::ALL {
        info!(class = %class, decision = %decisions.get(class), "Access decision");
    }
    if decisions.wan == AuthDecision::Deny {
        warn!("No WAN records: provide CERTS or WAN_AUTH_METHOD to allow untrusted networks");
    }
}
