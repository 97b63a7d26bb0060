//! resolver implementation: walks the delegation chain from the root servers

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Arc;

use derive_more::{Display, From};
use tracing::{debug, info, warn};

use crate::dns::client::ClientError;
use crate::dns::context::ServerContext;
use crate::dns::protocol::{DnsPacket, DnsQuestion, QueryType, ResultCode};

/// Number of delegation steps taken before giving up with SERVFAIL.
pub const MAX_ITERATIONS: usize = 3;

#[derive(Debug, Display, From)]
pub enum ResolveError {
    Client(ClientError),
    #[display(fmt = "Nameserver lookups nested deeper than {}", _0)]
    DepthExceeded(usize),
    #[display(fmt = "Already resolving {}", _0)]
    Cycle(String),
}

impl std::error::Error for ResolveError {}

type Result<T> = std::result::Result<T, ResolveError>;

/// Questions being resolved further up the chain, by name and type.
type InFlight = HashSet<(String, QueryType)>;

/// Iterative resolution starting at the root servers. No state survives
/// between calls to `resolve`.
pub struct RecursiveDnsResolver {
    context: Arc<ServerContext>,
}

impl RecursiveDnsResolver {
    pub fn new(context: Arc<ServerContext>) -> RecursiveDnsResolver {
        RecursiveDnsResolver { context }
    }

    /// Resolve `question`. Answers, NXDOMAIN and SERVFAIL all come back as
    /// `Ok`; an `Err` means the query should be dropped.
    pub fn resolve(&self, question: &DnsQuestion) -> Result<DnsPacket> {
        let mut in_flight = HashSet::new();

        self.resolve_with(question, self.context.root_servers.clone(), 0, &mut in_flight)
    }

    /// `depth` counts the nameserver lookups enclosing this one.
    fn resolve_with(
        &self,
        question: &DnsQuestion,
        servers: Vec<Ipv4Addr>,
        depth: usize,
        in_flight: &mut InFlight,
    ) -> Result<DnsPacket> {
        if depth > self.context.max_depth {
            return Err(ResolveError::DepthExceeded(self.context.max_depth));
        }

        let key = (question.name.clone(), question.qtype);
        if !in_flight.insert(key.clone()) {
            return Err(ResolveError::Cycle(question.name.clone()));
        }

        let result = self.walk(question, servers, depth, in_flight);
        in_flight.remove(&key);

        result
    }

    fn walk(
        &self,
        question: &DnsQuestion,
        mut servers: Vec<Ipv4Addr>,
        depth: usize,
        in_flight: &mut InFlight,
    ) -> Result<DnsPacket> {
        info!(%question, depth, "Resolving");

        for iteration in 0..MAX_ITERATIONS {
            if servers.is_empty() {
                warn!(%question, iteration, "No nameserver addresses left to query");
                return Ok(terminal(ResultCode::SERVFAIL));
            }

            let response = self.context.client.send_query(question, &servers)?;

            // The zone's own servers have the final word, negative or not
            if response.header.authoritative_answer {
                let mut packet = terminal(response.header.rescode);
                packet.answers = response.answers;
                return Ok(packet);
            }

            // Neither an answer nor a referral
            if response.authorities.is_empty() {
                return Ok(terminal(ResultCode::NXDOMAIN));
            }

            let hosts = response.get_ns_hosts();
            debug!(%question, iteration, ?hosts, "Following delegation");

            let glue = response.get_glue_addrs(&hosts);
            servers = if glue.is_empty() {
                self.resolve_nameservers(&hosts, depth, in_flight)?
            } else {
                glue
            };
        }

        warn!(%question, "Gave up after {} delegations", MAX_ITERATIONS);
        Ok(terminal(ResultCode::SERVFAIL))
    }

    /// Look up the addresses of delegated nameservers that came without
    /// glue. Each host is resolved from the root, in order, until one lookup
    /// succeeds.
    fn resolve_nameservers(
        &self,
        hosts: &[&str],
        depth: usize,
        in_flight: &mut InFlight,
    ) -> Result<Vec<Ipv4Addr>> {
        for host in hosts {
            let ns_question = DnsQuestion::new(host.to_string(), QueryType::A);
            let roots = self.context.root_servers.clone();

            match self.resolve_with(&ns_question, roots, depth + 1, in_flight) {
                Ok(packet) if packet.header.rescode == ResultCode::NOERROR => {
                    return Ok(packet.get_answer_addrs());
                }
                Ok(packet) => {
                    warn!(host, rescode = ?packet.header.rescode, "Lookup of nameserver failed");
                }
                Err(e @ ResolveError::DepthExceeded(_)) => return Err(e),
                Err(e) => {
                    warn!(host, error = %e, "Lookup of nameserver failed");
                }
            }
        }

        Ok(Vec::new())
    }
}

fn terminal(rescode: ResultCode) -> DnsPacket {
    let mut packet = DnsPacket::new();
    packet.header.response = true;
    packet.header.rescode = rescode;

    packet
}
