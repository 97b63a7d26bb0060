use std::env;
use std::sync::Arc;
use std::time::Duration;

use derive_more::{Display, From};
use getopts::{Matches, Options};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use rootwalk::dns::client::DnsNetworkClient;
use rootwalk::dns::context::{
    ServerContext, DEFAULT_DNS_PORT, DEFAULT_MAX_DEPTH, DEFAULT_UPSTREAM_PORT,
    DEFAULT_UPSTREAM_TIMEOUT,
};
use rootwalk::dns::hints::parse_root_hints;
use rootwalk::dns::protocol::{DnsQuestion, QueryType};
use rootwalk::dns::resolve::{RecursiveDnsResolver, ResolveError};
use rootwalk::dns::server::{DnsServer, DnsUdpServer, ServerError};

#[derive(Debug, Display, From)]
enum CliError {
    Options(getopts::Fail),
    Server(ServerError),
    Resolve(ResolveError),
    #[display(fmt = "Invalid value for --{}: {}", _0, _1)]
    InvalidValue(&'static str, String),
    #[display(fmt = "Unknown record type: {}", _0)]
    #[from(ignore)]
    UnknownType(String),
    #[display(fmt = "No usable root servers given")]
    NoRootServers,
}

impl std::error::Error for CliError {}

fn print_usage(program: &str, opts: &Options) {
    let brief = format!("Usage: {} [options] [NAME [TYPE]]", program);
    print!("{}", opts.usage(&brief));
}

fn parse_opt<T: std::str::FromStr>(
    matches: &Matches,
    name: &'static str,
    default: T,
) -> Result<T, CliError> {
    match matches.opt_str(name) {
        Some(value) => value
            .parse::<T>()
            .map_err(|_| CliError::InvalidValue(name, value)),
        None => Ok(default),
    }
}

fn build_context(matches: &Matches) -> Result<ServerContext, CliError> {
    let mut context = ServerContext::new();

    context.dns_port = parse_opt(matches, "port", DEFAULT_DNS_PORT)?;
    context.max_depth = parse_opt(matches, "max-depth", DEFAULT_MAX_DEPTH)?;

    let upstream_port = parse_opt(matches, "upstream-port", DEFAULT_UPSTREAM_PORT)?;
    let timeout = match parse_opt(matches, "timeout", DEFAULT_UPSTREAM_TIMEOUT.as_secs())? {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };
    context.client = Box::new(DnsNetworkClient::new(upstream_port, timeout));

    if let Some(hints) = matches.opt_str("root-servers") {
        context.root_servers = parse_root_hints(&hints);
        if context.root_servers.is_empty() {
            return Err(CliError::NoRootServers);
        }
    }

    Ok(context)
}

/// Resolve a single name from the command line and print the outcome.
fn lookup(context: Arc<ServerContext>, name: &str, qtype: Option<&String>) -> Result<(), CliError> {
    let qtype = match qtype {
        Some(t) => QueryType::from_name(t).ok_or_else(|| CliError::UnknownType(t.clone()))?,
        None => QueryType::A,
    };

    let question = DnsQuestion::new(name.to_string(), qtype);
    let resolver = RecursiveDnsResolver::new(context);
    let packet = resolver.resolve(&question)?;

    println!(";; {} -> {:?}", question, packet.header.rescode);
    for answer in &packet.answers {
        println!("{}", answer);
    }

    Ok(())
}

fn run() -> Result<(), CliError> {
    let args: Vec<String> = env::args().collect();
    let program = args
        .first()
        .cloned()
        .unwrap_or_else(|| "rootwalk".to_string());

    let mut opts = Options::new();
    opts.optopt(
        "p",
        "port",
        &format!("port to listen on (default {})", DEFAULT_DNS_PORT),
        "PORT",
    );
    opts.optopt(
        "",
        "upstream-port",
        &format!("port of upstream nameservers (default {})", DEFAULT_UPSTREAM_PORT),
        "PORT",
    );
    opts.optopt(
        "t",
        "timeout",
        &format!(
            "seconds to wait for an upstream reply, 0 waits forever (default {})",
            DEFAULT_UPSTREAM_TIMEOUT.as_secs()
        ),
        "SECS",
    );
    opts.optopt(
        "",
        "max-depth",
        &format!("maximum nesting of nameserver lookups (default {})", DEFAULT_MAX_DEPTH),
        "N",
    );
    opts.optopt(
        "r",
        "root-servers",
        "comma separated root server addresses to use instead of the built in ones",
        "ADDRS",
    );
    opts.optflag("h", "help", "print this help menu");

    let matches = opts.parse(args.iter().skip(1))?;
    if matches.opt_present("h") {
        print_usage(&program, &opts);
        return Ok(());
    }

    let context = Arc::new(build_context(&matches)?);
    info!(
        root_servers = context.root_servers.len(),
        max_depth = context.max_depth,
        "Initialized resolver"
    );

    if let Some(name) = matches.free.first() {
        return lookup(context, name, matches.free.get(1));
    }

    let server = DnsUdpServer::new(context);
    server.run_server()?;

    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run() {
        error!(error = %e, "Exiting");
        std::process::exit(1);
    }
}
