//! Hardware address resolution via the kernel neighbor table

use std::net::Ipv4Addr;
use std::process::Command;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Failed to read neighbor table: {0}")]
    Io(#[from] std::io::Error),
    #[error("Neighbor table lookup failed: {0}")]
    Command(String),
    #[error("No hardware address known for {0}")]
    NotFound(Ipv4Addr),
}

/// Maps an IPv4 address to its link-layer address
///
/// A failed resolution means the reply that referenced the address is
/// skipped; it never ends the discovery session.
pub trait ResolveHardware: Send + Sync {
    fn resolve(&self, ip: Ipv4Addr) -> Result<String, ResolveError>;
}

/// Neighbor table entry with a known link-layer address
#[derive(Debug, Clone)]
struct NeighborEntry {
    ip: Ipv4Addr,
    mac: String,
}

/// Resolver backed by `ip neigh show`
///
/// A device that just answered our multicast probe has an entry in the
/// neighbor table in practice; entries without an lladdr (INCOMPLETE,
/// FAILED) count as not found.
pub struct ArpResolver;

impl ResolveHardware for ArpResolver {
    fn resolve(&self, ip: Ipv4Addr) -> Result<String, ResolveError> {
        let output = Command::new("ip").args(["neigh", "show"]).output()?;

        if !output.status.success() {
            return Err(ResolveError::Command(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        for line in stdout.lines() {
            if let Some(entry) = parse_neighbor_line(line) {
                if entry.ip == ip {
                    debug!(ip = %ip, mac = %entry.mac, "Resolved hardware address");
                    return Ok(entry.mac);
                }
            }
        }

        Err(ResolveError::NotFound(ip))
    }
}

/// Parse a line from `ip neigh show` output
fn parse_neighbor_line(line: &str) -> Option<NeighborEntry> {
    // Format: "192.168.1.1 dev eth0 lladdr aa:bb:cc:dd:ee:ff REACHABLE"
    let parts: Vec<&str> = line.split_whitespace().collect();

    let ip = Ipv4Addr::from_str(parts.first()?).ok()?;

    let lladdr_idx = parts.iter().position(|&p| p == "lladdr")?;
    let mac = parts.get(lladdr_idx + 1)?.to_string();

    Some(NeighborEntry { ip, mac })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_neighbor_line_reachable() {
        let line = "192.168.1.100 dev eth0 lladdr aa:bb:cc:dd:ee:ff REACHABLE";
        let entry = parse_neighbor_line(line).unwrap();
        assert_eq!(entry.ip, Ipv4Addr::new(192, 168, 1, 100));
        assert_eq!(entry.mac, "aa:bb:cc:dd:ee:ff");
    }

    #[test]
    fn test_parse_neighbor_line_stale() {
        let line = "192.168.1.100 dev eth0 lladdr aa:bb:cc:dd:ee:ff STALE";
        let entry = parse_neighbor_line(line).unwrap();
        assert_eq!(entry.mac, "aa:bb:cc:dd:ee:ff");
    }

    #[test]
    fn test_parse_incomplete_line_has_no_mac() {
        let line = "192.168.1.100 dev eth0 INCOMPLETE";
        assert!(parse_neighbor_line(line).is_none());
    }

    #[test]
    fn test_parse_garbage_line() {
        assert!(parse_neighbor_line("not a neighbor entry").is_none());
        assert!(parse_neighbor_line("").is_none());
    }
}
