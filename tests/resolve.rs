//! End to end resolution against the real root servers. These need network
//! access, run them with `cargo test -- --ignored`.

use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rootwalk::dns::buffer::{BytePacketBuffer, MAX_PACKET_SIZE};
use rootwalk::dns::client::DnsNetworkClient;
use rootwalk::dns::context::ServerContext;
use rootwalk::dns::protocol::{DnsPacket, DnsQuestion, QueryType, RecordData, ResultCode};
use rootwalk::dns::resolve::RecursiveDnsResolver;
use rootwalk::dns::server::handle_packet;

fn resolver(context: ServerContext) -> RecursiveDnsResolver {
    RecursiveDnsResolver::new(Arc::new(context))
}

#[test]
#[ignore]
fn test_resolve_www_example_com() {
    let question = DnsQuestion::new("www.example.com.".to_string(), QueryType::A);
    let res = resolver(ServerContext::new()).resolve(&question).unwrap();

    assert_eq!(ResultCode::NOERROR, res.header.rescode);
    assert!(res.answers.iter().any(|record| {
        record.domain == "www.example.com" && matches!(record.data, RecordData::A(_))
    }));
}

#[test]
#[ignore]
fn test_resolve_nonexistent_name() {
    let question = DnsQuestion::new("doesnotexist123456.com.".to_string(), QueryType::A);
    let res = resolver(ServerContext::new()).resolve(&question).unwrap();

    assert_eq!(ResultCode::NXDOMAIN, res.header.rescode);
}

#[test]
#[ignore]
fn test_unreachable_root_servers() {
    // TEST-NET-1, nothing answers there
    let mut context = ServerContext::new();
    context.root_servers = vec![Ipv4Addr::new(192, 0, 2, 1)];
    context.client = Box::new(DnsNetworkClient::new(53, Some(Duration::from_secs(1))));

    let question = DnsQuestion::new("www.example.com".to_string(), QueryType::A);
    match resolver(context).resolve(&question) {
        Err(_) => {}
        Ok(res) => assert_eq!(ResultCode::SERVFAIL, res.header.rescode),
    }
}

#[test]
#[ignore]
fn test_handle_packet_over_udp() {
    let context = Arc::new(ServerContext::new());

    let server_socket = UdpSocket::bind(("127.0.0.1", 0)).unwrap();
    let server_addr = server_socket.local_addr().unwrap();
    let client_socket = UdpSocket::bind(("127.0.0.1", 0)).unwrap();
    client_socket
        .set_read_timeout(Some(Duration::from_secs(30)))
        .unwrap();

    let mut request = DnsPacket::new();
    request.header.id = 0xBEEF;
    request.header.recursion_desired = true;
    request.questions.push(DnsQuestion::new(
        "www.example.com".to_string(),
        QueryType::A,
    ));
    let mut req_buffer = BytePacketBuffer::new();
    request.write(&mut req_buffer).unwrap();
    client_socket
        .send_to(req_buffer.written(), server_addr)
        .unwrap();

    let worker = thread::spawn(move || {
        let mut buffer = [0; MAX_PACKET_SIZE];
        let (len, src): (usize, SocketAddr) = server_socket.recv_from(&mut buffer).unwrap();
        handle_packet(context, &server_socket, src, &buffer[..len]);
    });

    let mut buffer = [0; MAX_PACKET_SIZE];
    let (len, _) = client_socket.recv_from(&mut buffer).unwrap();
    worker.join().unwrap();

    let mut res_buffer = BytePacketBuffer::from_slice(&buffer[..len]);
    let response = DnsPacket::from_buffer(&mut res_buffer).unwrap();
    assert_eq!(0xBEEF, response.header.id);
    assert!(response.header.response);
    assert!(!response.get_answer_addrs().is_empty());
}
