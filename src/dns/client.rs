//! client for sending DNS queries to other servers

use std::io;
use std::net::{Ipv4Addr, UdpSocket};
use std::time::Duration;

use derive_more::{Display, From};
use tracing::{debug, trace};

use crate::dns::buffer::{BufferError, BytePacketBuffer, MAX_PACKET_SIZE};
use crate::dns::protocol::{DnsPacket, DnsQuestion};

#[derive(Debug, Display, From)]
pub enum ClientError {
    Buffer(BufferError),
    Io(io::Error),
    #[display(fmt = "No servers to query")]
    NoServers,
    #[display(fmt = "None of the servers could be reached: {}", _0)]
    #[from(ignore)]
    Unreachable(io::Error),
    #[display(fmt = "Sent {} question(s) but the reply carries {}", sent, received)]
    QuestionMismatch { sent: usize, received: usize },
}

impl std::error::Error for ClientError {}

type Result<T> = std::result::Result<T, ClientError>;

/// Sends a single question to the first reachable server of a set.
pub trait DnsClient {
    fn send_query(&self, question: &DnsQuestion, servers: &[Ipv4Addr]) -> Result<DnsPacket>;
}

/// The UDP implementation of `DnsClient`. Every query gets its own socket,
/// which is closed as soon as the reply has been read.
pub struct DnsNetworkClient {
    port: u16,
    timeout: Option<Duration>,
}

impl DnsNetworkClient {
    pub fn new(port: u16, timeout: Option<Duration>) -> DnsNetworkClient {
        DnsNetworkClient { port, timeout }
    }

    /// Bind an ephemeral socket and associate it with the first server that
    /// accepts it.
    fn connect(&self, servers: &[Ipv4Addr]) -> Result<UdpSocket> {
        let mut last_err = None;
        for server in servers {
            let attempt = UdpSocket::bind(("0.0.0.0", 0))
                .and_then(|socket| socket.connect((*server, self.port)).map(|_| socket));

            match attempt {
                Ok(socket) => {
                    trace!(%server, "Connected to upstream server");
                    return Ok(socket);
                }
                Err(e) => {
                    debug!(%server, error = %e, "Failed to connect to upstream server");
                    last_err = Some(e);
                }
            }
        }

        match last_err {
            Some(e) => Err(ClientError::Unreachable(e)),
            None => Err(ClientError::NoServers),
        }
    }
}

impl DnsClient for DnsNetworkClient {
    fn send_query(&self, question: &DnsQuestion, servers: &[Ipv4Addr]) -> Result<DnsPacket> {
        if servers.is_empty() {
            return Err(ClientError::NoServers);
        }

        debug!(%question, ?servers, "New outgoing query");

        // Prepare request
        let mut packet = DnsPacket::new();

        packet.header.id = rand::random::<u16>();
        packet.header.opcode = 0;
        packet.header.response = false;
        packet.header.recursion_desired = false;
        packet.questions.push(question.clone());

        let mut req_buffer = BytePacketBuffer::new();
        packet.write(&mut req_buffer)?;

        let socket = self.connect(servers)?;
        socket.set_read_timeout(self.timeout)?;
        socket.send(req_buffer.written())?;

        // A single read. Replies larger than this are cut off.
        let mut buf = [0; MAX_PACKET_SIZE];
        let len = socket.recv(&mut buf)?;
        drop(socket);

        trace!(len, id = packet.header.id, "Received reply");

        let mut res_buffer = BytePacketBuffer::from_slice(&buf[..len]);
        let response = DnsPacket::from_buffer(&mut res_buffer)?;
        if response.questions.len() != packet.questions.len() {
            return Err(ClientError::QuestionMismatch {
                sent: packet.questions.len(),
                received: response.questions.len(),
            });
        }

        Ok(response)
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    use std::thread;

    use crate::dns::protocol::{DnsHeader, DnsRecord, QueryType, RecordData};

    /// Answers the first datagram it receives with whatever `respond` makes
    /// of the request.
    fn spawn_upstream<F>(respond: F) -> (u16, thread::JoinHandle<()>)
    where
        F: FnOnce(DnsPacket) -> DnsPacket + Send + 'static,
    {
        let socket = UdpSocket::bind(("127.0.0.1", 0)).unwrap();
        let port = socket.local_addr().unwrap().port();

        let handle = thread::spawn(move || {
            let mut buf = [0; MAX_PACKET_SIZE];
            let (len, src) = socket.recv_from(&mut buf).unwrap();
            let mut req_buffer = BytePacketBuffer::from_slice(&buf[..len]);
            let request = DnsPacket::from_buffer(&mut req_buffer).unwrap();

            let mut response = respond(request);
            let mut res_buffer = BytePacketBuffer::new();
            response.write(&mut res_buffer).unwrap();
            socket.send_to(res_buffer.written(), src).unwrap();
        });

        (port, handle)
    }

    #[test]
    fn test_send_query() {
        let (port, handle) = spawn_upstream(|request| {
            assert!(!request.header.response);
            assert!(!request.header.recursion_desired);
            assert_eq!(0, request.header.opcode);
            assert_eq!(1, request.questions.len());

            let mut response = DnsPacket::new();
            response.header.id = request.header.id;
            response.header.response = true;
            response.header.authoritative_answer = true;
            response.questions = request.questions.clone();
            response.answers.push(DnsRecord::new(
                &request.questions[0].name,
                300,
                RecordData::A(Ipv4Addr::new(93, 184, 216, 34)),
            ));
            response
        });

        let client = DnsNetworkClient::new(port, Some(Duration::from_secs(5)));
        let question = DnsQuestion::new("www.example.com".to_string(), QueryType::A);
        let response = client
            .send_query(&question, &[Ipv4Addr::LOCALHOST])
            .unwrap();

        handle.join().unwrap();

        assert!(response.header.authoritative_answer);
        assert_eq!(vec![question], response.questions);
        assert_eq!(
            vec![Ipv4Addr::new(93, 184, 216, 34)],
            response.get_answer_addrs()
        );
    }

    #[test]
    fn test_question_mismatch() {
        let (port, handle) = spawn_upstream(|request| {
            let mut response = DnsPacket::new();
            response.header.id = request.header.id;
            response.header.response = true;
            response
        });

        let client = DnsNetworkClient::new(port, Some(Duration::from_secs(5)));
        let question = DnsQuestion::new("example.com".to_string(), QueryType::A);
        let result = client.send_query(&question, &[Ipv4Addr::LOCALHOST]);

        handle.join().unwrap();

        match result {
            Err(ClientError::QuestionMismatch { sent, received }) => {
                assert_eq!(1, sent);
                assert_eq!(0, received);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_truncated_reply() {
        let socket = UdpSocket::bind(("127.0.0.1", 0)).unwrap();
        let port = socket.local_addr().unwrap().port();

        // A bare header that announces a question it doesn't carry
        let handle = thread::spawn(move || {
            let mut buf = [0; MAX_PACKET_SIZE];
            let (len, src) = socket.recv_from(&mut buf).unwrap();
            let mut req_buffer = BytePacketBuffer::from_slice(&buf[..len]);
            let request = DnsPacket::from_buffer(&mut req_buffer).unwrap();

            let mut header = DnsHeader::new();
            header.id = request.header.id;
            header.response = true;
            header.questions = 1;
            let mut res_buffer = BytePacketBuffer::new();
            header.write(&mut res_buffer).unwrap();
            socket.send_to(res_buffer.written(), src).unwrap();
        });

        let client = DnsNetworkClient::new(port, Some(Duration::from_secs(5)));
        let question = DnsQuestion::new("example.com".to_string(), QueryType::A);
        let result = client.send_query(&question, &[Ipv4Addr::LOCALHOST]);

        handle.join().unwrap();

        match result {
            Err(ClientError::Buffer(BufferError::EndOfBuffer)) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_no_servers() {
        let client = DnsNetworkClient::new(53, None);
        let question = DnsQuestion::new("example.com".to_string(), QueryType::A);

        assert!(matches!(
            client.send_query(&question, &[]),
            Err(ClientError::NoServers)
        ));
    }

    #[test]
    fn test_silent_server_times_out() {
        // Bound but never answers
        let silent = UdpSocket::bind(("127.0.0.1", 0)).unwrap();
        let port = silent.local_addr().unwrap().port();

        let client = DnsNetworkClient::new(port, Some(Duration::from_millis(200)));
        let question = DnsQuestion::new("example.com".to_string(), QueryType::A);

        assert!(matches!(
            client.send_query(&question, &[Ipv4Addr::LOCALHOST]),
            Err(ClientError::Io(_))
        ));
    }
}
