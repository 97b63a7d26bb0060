//! root server hints, the starting point of every resolution

use std::net::Ipv4Addr;
use std::sync::OnceLock;

use tracing::warn;

/// IPv4 addresses of the thirteen root servers, a through m.
pub const ROOT_SERVERS: &str = "198.41.0.4,170.247.170.2,192.33.4.12,199.7.91.13,\
192.203.230.10,192.5.5.241,192.112.36.4,198.97.190.53,192.36.148.17,\
192.58.128.30,193.0.14.129,199.7.83.42,202.12.27.33";

/// Parse a comma separated list of dotted-decimal addresses, keeping the
/// order. Entries that don't parse are skipped.
pub fn parse_root_hints(hints: &str) -> Vec<Ipv4Addr> {
    hints
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| match entry.parse::<Ipv4Addr>() {
            Ok(addr) => Some(addr),
            Err(e) => {
                warn!(entry, error = %e, "Skipping malformed root server address");
                None
            }
        })
        .collect()
}

/// The built in root servers, parsed on first use.
pub fn root_servers() -> &'static [Ipv4Addr] {
    static ROOTS: OnceLock<Vec<Ipv4Addr>> = OnceLock::new();

    ROOTS.get_or_init(|| parse_root_hints(ROOT_SERVERS))
}
