//! Operator-supplied `HBA_EXTRA_RULES`.
//!
//! Rules are kept verbatim. At resolution time each one is tagged with every
//! connection class its `ADDRESS` column can match, and placed right after
//! the automatic records of the earliest of them. A rule that reaches WAN
//! clients as well as LAN clients therefore precedes the WAN records:
//!
//! | Record | Classes | Placed after |
//! |--------|---------|--------------|
//! | `local ...` | Local | Local |
//! | address `samehost` / `samenet` | Lan | Lan |
//! | CIDR (or address + mask) inside a LAN range | Lan | Lan |
//! | `all`, or a CIDR overlapping a LAN range | Lan, Wan | Lan |
//! | anything else (disjoint CIDRs, host names) | Wan | Wan |

use std::net::IpAddr;

use ipnetwork::IpNetwork;

use crate::hba::network::{host_network, is_within, overlaps};
use crate::hba::rule::ConnectionClass;
use crate::{Error, Result};

/// Name of the input, used in error messages.
const INPUT: &str = "HBA_EXTRA_RULES";

/// TCP record types accepted in extra rules.
const HOST_TYPES: &[&str] = &["host", "hostssl", "hostnossl", "hostgssenc", "hostnogssenc"];

/// One verbatim rule line with the connection classes it can match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraHbaRule {
    line: String,
    /// Sorted, never empty.
    classes: Vec<ConnectionClass>,
}

impl ExtraHbaRule {
    /// Validate `line` and tag it against the LAN ranges.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedInput`] for empty or multi-line entries,
    /// unknown record types, and host records without an address column.
    pub fn classify(line: &str, lan: &[IpNetwork]) -> Result<Self> {
        if line.contains(['\n', '\r']) {
            return Err(Error::malformed(
                INPUT,
                format!("rule spans multiple lines: {line:?}"),
            ));
        }
        let tokens = tokenize(line);
        let Some(kind) = tokens.first() else {
            return Err(Error::malformed(INPUT, "empty rule"));
        };

        let classes = if kind == "local" {
            vec![ConnectionClass::Local]
        } else if HOST_TYPES.contains(&kind.as_str()) {
            let address = tokens.get(3).ok_or_else(|| {
                Error::malformed(INPUT, format!("rule has no address column: {line:?}"))
            })?;
            classify_address(address, tokens.get(4).map(String::as_str), lan)
        } else {
            return Err(Error::malformed(
                INPUT,
                format!("unknown record type '{kind}' in {line:?}"),
            ));
        };

        Ok(Self {
            line: line.to_string(),
            classes,
        })
    }

    /// The rule exactly as it will be written.
    #[must_use]
    pub fn line(&self) -> &str {
        &self.line
    }

    /// Class the rule is placed under: the earliest one it can match.
    #[must_use]
    pub fn class(&self) -> ConnectionClass {
        self.classes
            .first()
            .copied()
            .unwrap_or(ConnectionClass::Wan)
    }

    /// Every class whose clients the rule can match, in file order.
    #[must_use]
    pub fn classes(&self) -> &[ConnectionClass] {
        &self.classes
    }

    /// Whether clients of `class` can match the rule.
    #[must_use]
    pub fn applies_to(&self, class: ConnectionClass) -> bool {
        self.classes.contains(&class)
    }
}

fn classify_address(address: &str, mask: Option<&str>, lan: &[IpNetwork]) -> Vec<ConnectionClass> {
    match address {
        "samehost" | "samenet" => return vec![ConnectionClass::Lan],
        "all" => return vec![ConnectionClass::Lan, ConnectionClass::Wan],
        _ => {}
    }

    let network = if address.contains('/') {
        address.parse::<IpNetwork>().ok()
    } else if let Ok(addr) = address.parse::<IpAddr>() {
        // Address + separate netmask column, or a bare host address.
        match mask.and_then(|m| m.parse::<IpAddr>().ok()) {
            Some(mask) => IpNetwork::with_netmask(addr, mask).ok(),
            None => Some(host_network(addr)),
        }
    } else {
        None
    };

    match network {
        Some(net) if is_within(lan, &net) => vec![ConnectionClass::Lan],
        Some(net) if overlaps(lan, &net) => vec![ConnectionClass::Lan, ConnectionClass::Wan],
        _ => vec![ConnectionClass::Wan],
    }
}

/// Split a record into columns, keeping double-quoted names together and
/// stopping at a trailing comment.
fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;

    for ch in line.chars() {
        match ch {
            '"' => {
                quoted = !quoted;
                current.push(ch);
            }
            '#' if !quoted => break,
            c if c.is_whitespace() && !quoted => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lan() -> Vec<IpNetwork> {
        vec![
            "127.0.0.0/8".parse().unwrap(),
            "172.18.0.0/16".parse().unwrap(),
        ]
    }

    fn class_of(line: &str) -> ConnectionClass {
        ExtraHbaRule::classify(line, &lan()).unwrap().class()
    }

    #[test]
    fn local_records_are_local() {
        assert_eq!(class_of("local replication all peer"), ConnectionClass::Local);
    }

    #[test]
    fn records_inside_lan_are_lan() {
        assert_eq!(class_of("host all all 172.18.3.0/24 trust"), ConnectionClass::Lan);
        assert_eq!(class_of("host all all 127.0.0.1/32 trust"), ConnectionClass::Lan);
        assert_eq!(class_of("host all all samenet md5"), ConnectionClass::Lan);
        assert_eq!(
            class_of("host all all 172.18.0.7 255.255.255.255 trust"),
            ConnectionClass::Lan
        );
    }

    #[test]
    fn addresses_spanning_lan_and_wan_are_placed_with_lan() {
        // GIVEN: rules reachable from both trusted and untrusted networks
        for line in [
            "host test_db test_user all trust",
            "host test_db test_user 0.0.0.0/0 trust",
            "hostssl all all 172.0.0.0/8 cert",
        ] {
            // WHEN: classifying against the LAN ranges
            let rule = ExtraHbaRule::classify(line, &lan()).unwrap();
            // THEN: they match both classes and sit before the WAN records
            assert_eq!(
                rule.classes(),
                [ConnectionClass::Lan, ConnectionClass::Wan],
                "{line}"
            );
            assert_eq!(rule.class(), ConnectionClass::Lan);
            assert!(rule.applies_to(ConnectionClass::Wan));
        }
    }

    #[test]
    fn disjoint_or_named_addresses_are_wan() {
        assert_eq!(
            class_of("host test_db test_user 203.0.113.0/24 trust"),
            ConnectionClass::Wan
        );
        assert_eq!(class_of("host all all .example.com md5"), ConnectionClass::Wan);
        // No IPv6 LAN range to overlap with.
        assert_eq!(class_of("host all all ::/0 md5"), ConnectionClass::Wan);
        let rule = ExtraHbaRule::classify("host all all 203.0.113.9 md5", &lan()).unwrap();
        assert_eq!(rule.classes(), [ConnectionClass::Wan]);
        assert!(!rule.applies_to(ConnectionClass::Lan));
    }

    #[test]
    fn quoted_names_do_not_shift_columns() {
        assert_eq!(
            class_of(r#"host "my db" "some user" 172.18.0.0/16 md5"#),
            ConnectionClass::Lan
        );
    }

    #[test]
    fn rule_text_is_kept_verbatim() {
        let rule = ExtraHbaRule::classify("  hostssl  app  bob 10.0.0.0/8  cert # ops ", &lan())
            .unwrap();
        assert_eq!(rule.line(), "  hostssl  app  bob 10.0.0.0/8  cert # ops ");
    }

    #[test]
    fn malformed_rules_are_rejected() {
        for bad in [
            "",
            "   ",
            "# only a comment",
            "host all all",
            "include other.conf",
            "host all all 0.0.0.0/0 trust\nlocal all all trust",
        ] {
            let err = ExtraHbaRule::classify(bad, &lan()).unwrap_err();
            assert!(err.is_input_error(), "{bad:?} should be rejected");
        }
    }
}
