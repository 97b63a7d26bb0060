//! UDP server: one thread per incoming query

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::Builder;

use derive_more::{Display, From};
use tracing::{debug, error, info, warn};

use crate::dns::buffer::{BufferError, BytePacketBuffer, MAX_PACKET_SIZE};
use crate::dns::context::ServerContext;
use crate::dns::protocol::DnsPacket;
use crate::dns::resolve::{RecursiveDnsResolver, ResolveError};

#[derive(Debug, Display, From)]
pub enum ServerError {
    Buffer(BufferError),
    Io(io::Error),
    Resolve(ResolveError),
    #[display(fmt = "Request carries no question")]
    NoQuestion,
}

impl std::error::Error for ServerError {}

type Result<T> = std::result::Result<T, ServerError>;

pub trait DnsServer {
    /// Bind and serve until the process exits. Only failing to bind is
    /// reported back.
    fn run_server(self) -> Result<()>;
}

/// Decode a request, resolve its first question and encode the reply.
///
/// The reply carries the request's id and question. Records beyond the
/// 512 byte limit are dropped and the truncation flag is set.
pub fn build_response(context: Arc<ServerContext>, data: &[u8]) -> Result<Vec<u8>> {
    let mut req_buffer = BytePacketBuffer::from_slice(data);
    let request = DnsPacket::from_buffer(&mut req_buffer)?;

    // Only the first question is honoured
    let question = request.questions.first().ok_or(ServerError::NoQuestion)?;
    info!(id = request.header.id, %question, "Received query");

    let resolver = RecursiveDnsResolver::new(context);
    let mut packet = resolver.resolve(question)?;

    packet.header.id = request.header.id;
    packet.header.response = true;
    packet.header.recursion_desired = request.header.recursion_desired;
    packet.header.recursion_available = true;
    packet.questions = vec![question.clone()];

    let mut res_buffer = BytePacketBuffer::new();
    packet.write(&mut res_buffer)?;

    debug!(
        id = packet.header.id,
        rescode = ?packet.header.rescode,
        answers = packet.header.answers,
        truncated = packet.header.truncated_message,
        "Sending response"
    );

    Ok(res_buffer.written().to_vec())
}

/// Handle one datagram from `src`. Failures are logged and the request is
/// dropped without a reply.
pub fn handle_packet(context: Arc<ServerContext>, socket: &UdpSocket, src: SocketAddr, data: &[u8]) {
    context
        .statistics
        .udp_query_count
        .fetch_add(1, Ordering::Release);

    let result = build_response(context.clone(), data)
        .and_then(|response| Ok(socket.send_to(&response, src)?));

    if let Err(e) = result {
        context
            .statistics
            .failed_query_count
            .fetch_add(1, Ordering::Release);
        warn!(%src, error = %e, "Failed to handle query");
    }
}

pub struct DnsUdpServer {
    context: Arc<ServerContext>,
}

impl DnsUdpServer {
    pub fn new(context: Arc<ServerContext>) -> DnsUdpServer {
        DnsUdpServer { context }
    }
}

impl DnsServer for DnsUdpServer {
    fn run_server(self) -> Result<()> {
        let socket = UdpSocket::bind(("0.0.0.0", self.context.dns_port))?;
        info!(port = self.context.dns_port, "Listening for UDP queries");

        loop {
            let mut buffer = [0; MAX_PACKET_SIZE];
            let (len, src) = match socket.recv_from(&mut buffer) {
                Ok(x) => x,
                Err(e) => {
                    error!(error = %e, "Failed to read from UDP socket");
                    continue;
                }
            };

            let socket_clone = match socket.try_clone() {
                Ok(x) => x,
                Err(e) => {
                    error!(%src, error = %e, "Failed to clone UDP socket");
                    continue;
                }
            };

            let context = self.context.clone();
            let data = buffer[..len].to_vec();
            let spawned = Builder::new()
                .name(format!("query-{}", src))
                .spawn(move || handle_packet(context, &socket_clone, src, &data));

            if let Err(e) = spawned {
                error!(%src, error = %e, "Failed to spawn query thread");
            }

            debug!(
                queries = self.context.statistics.get_udp_query_count(),
                failed = self.context.statistics.get_failed_query_count(),
                "Dispatched query"
            );
        }
    }
}
