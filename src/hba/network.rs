//! Network ranges for the LAN and WAN classes.
//!
//! LAN ranges come from `LAN_CIDRS` when the operator sets it. Otherwise they
//! are detected from the kernel routing table: every directly connected IPv4
//! subnet (no gateway) the container can see at start time is LAN, plus
//! loopback. Networks attached later (the WAN alias) are not in the table yet
//! and therefore stay untrusted.

use std::fs;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::Path;

use ipnetwork::{IpNetwork, Ipv4Network, Ipv6Network};
use tracing::{debug, warn};

use crate::{Error, Result};

/// Routing flag: route is up.
const RTF_UP: u32 = 0x0001;

/// Loopback ranges that are always part of the detected LAN.
#[must_use]
pub fn loopback_networks() -> Vec<IpNetwork> {
    let mut nets = Vec::with_capacity(2);
    if let Ok(v4) = Ipv4Network::new(Ipv4Addr::new(127, 0, 0, 0), 8) {
        nets.push(IpNetwork::V4(v4));
    }
    if let Ok(v6) = Ipv6Network::new(Ipv6Addr::LOCALHOST, 128) {
        nets.push(IpNetwork::V6(v6));
    }
    nets
}

/// Default WAN ranges: everything.
#[must_use]
pub fn default_wan_networks() -> Vec<IpNetwork> {
    let mut nets = Vec::with_capacity(2);
    if let Ok(v4) = Ipv4Network::new(Ipv4Addr::UNSPECIFIED, 0) {
        nets.push(IpNetwork::V4(v4));
    }
    if let Ok(v6) = Ipv6Network::new(Ipv6Addr::UNSPECIFIED, 0) {
        nets.push(IpNetwork::V6(v6));
    }
    nets
}

/// Detect LAN ranges from a `/proc/net/route` style table.
///
/// A missing table (non-Linux host, restricted procfs) yields loopback only.
pub fn detect_lan_networks(route_table: &Path) -> Result<Vec<IpNetwork>> {
    let mut nets = loopback_networks();

    match fs::read_to_string(route_table) {
        Ok(content) => {
            let connected = parse_route_table(&content);
            debug!(
                table = %route_table.display(),
                subnets = connected.len(),
                "Detected directly connected subnets"
            );
            nets.extend(connected.into_iter().map(IpNetwork::V4));
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!(
                table = %route_table.display(),
                "Routing table not found; LAN limited to loopback"
            );
        }
        Err(e) => return Err(Error::fs(route_table, e)),
    }

    normalize(&mut nets);
    Ok(nets)
}

/// Parse the directly connected subnets out of a `/proc/net/route` dump.
///
/// Columns are `Iface Destination Gateway Flags RefCnt Use Metric Mask ...`
/// with addresses printed as host-order hex of the network-order bytes.
#[must_use]
pub fn parse_route_table(content: &str) -> Vec<Ipv4Network> {
    let mut nets = Vec::new();

    for line in content.lines().skip(1) {
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.len() < 8 || cols[0] == "lo" {
            continue;
        }
        let (Some(dest), Some(gateway), Some(flags), Some(mask)) = (
            parse_hex_addr(cols[1]),
            parse_hex_addr(cols[2]),
            u32::from_str_radix(cols[3], 16).ok(),
            parse_hex_addr(cols[7]),
        ) else {
            continue;
        };

        // Only up, on-link, non-default routes describe an attached subnet.
        if flags & RTF_UP == 0 || !gateway.is_unspecified() || dest.is_unspecified() {
            continue;
        }
        match Ipv4Network::with_netmask(dest, mask) {
            Ok(net) => nets.push(net),
            Err(e) => debug!(destination = %dest, netmask = %mask, error = %e, "Skipping route"),
        }
    }

    nets
}

/// Whether every address of `inner` lies inside `outer`.
#[must_use]
pub fn covers(outer: &IpNetwork, inner: &IpNetwork) -> bool {
    outer.prefix() <= inner.prefix() && outer.contains(inner.network())
}

/// Whether `net` lies entirely inside one of `lan`.
#[must_use]
pub fn is_within(lan: &[IpNetwork], net: &IpNetwork) -> bool {
    lan.iter().any(|outer| covers(outer, net))
}

/// Whether `net` shares any address with one of `lan`.
///
/// CIDR blocks either nest or are disjoint, so overlap is containment in
/// either direction.
#[must_use]
pub fn overlaps(lan: &[IpNetwork], net: &IpNetwork) -> bool {
    lan.iter().any(|outer| covers(outer, net) || covers(net, outer))
}

/// Build the network of a bare address (`/32` or `/128`).
#[must_use]
pub fn host_network(addr: IpAddr) -> IpNetwork {
    IpNetwork::from(addr)
}

/// Sort and de-duplicate so detection output is stable across runs.
fn normalize(nets: &mut Vec<IpNetwork>) {
    nets.sort_by_key(|n| (n.is_ipv6(), n.network(), n.prefix()));
    nets.dedup_by_key(|n| (n.network(), n.prefix()));
}

fn parse_hex_addr(hex: &str) -> Option<Ipv4Addr> {
    u32::from_str_radix(hex, 16)
        .ok()
        .map(|raw| Ipv4Addr::from(raw.to_le_bytes()))
}
