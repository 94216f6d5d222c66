//! Access-control (`pg_hba.conf`) compilation.
//!
//! # Modules
//!
//! - [`rule`]: connection classes, record types, methods, decisions
//! - [`extra`]: operator-supplied records and their class tagging
//! - [`network`]: LAN detection and CIDR containment
//! - [`compile`]: the fail-closed decision table (`compile`, `HbaRuleSet`)

pub mod compile;
pub mod extra;
pub mod network;
pub mod rule;

pub use compile::{
    Decisions, HbaRuleSet, LanPolicy, LocalPolicy, PolicyInputs, Scope, WanPolicy, compile,
};
pub use extra::ExtraHbaRule;
pub use rule::{AuthDecision, AuthMethod, AutoRule, ConnectionClass, HbaConnection, HbaEntry};
