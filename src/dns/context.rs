//! The `ServerContext` holds the configuration shared by every request

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::dns::client::{DnsClient, DnsNetworkClient};
use crate::dns::hints;

pub const DEFAULT_DNS_PORT: u16 = 1053;
pub const DEFAULT_UPSTREAM_PORT: u16 = 53;
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_DEPTH: usize = 4;

#[derive(Default)]
pub struct ServerStatistics {
    pub udp_query_count: AtomicUsize,
    pub failed_query_count: AtomicUsize,
}

impl ServerStatistics {
    pub fn get_udp_query_count(&self) -> usize {
        self.udp_query_count.load(Ordering::Acquire)
    }

    pub fn get_failed_query_count(&self) -> usize {
        self.failed_query_count.load(Ordering::Acquire)
    }
}

/// Filled in once at startup and shared read-only between all request
/// threads afterwards. Only the statistics counters change.
pub struct ServerContext {
    pub client: Box<dyn DnsClient + Sync + Send>,
    pub root_servers: Vec<Ipv4Addr>,
    pub dns_port: u16,
    /// How many nameserver lookups may be nested below the original query.
    pub max_depth: usize,
    pub statistics: ServerStatistics,
}

impl Default for ServerContext {
    fn default() -> Self {
        ServerContext::new()
    }
}

impl ServerContext {
    pub fn new() -> ServerContext {
        ServerContext {
            client: Box::new(DnsNetworkClient::new(
                DEFAULT_UPSTREAM_PORT,
                Some(DEFAULT_UPSTREAM_TIMEOUT),
            )),
            root_servers: hints::root_servers().to_vec(),
            dns_port: DEFAULT_DNS_PORT,
            max_depth: DEFAULT_MAX_DEPTH,
            statistics: ServerStatistics::default(),
        }
    }
}
