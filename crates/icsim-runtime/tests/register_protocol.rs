mod common;

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use icsim_runtime::protocol::{RegisterClient, RegisterServer};
use icsim_runtime::{RuntimeError, TagValue};

fn started_server(max_id: u16) -> (RegisterServer, std::net::SocketAddr) {
    let mut server = RegisterServer::new("127.0.0.1:0".parse().expect("addr"), max_id);
    let addr = server.start().expect("start server");
    (server, addr)
}

#[test]
fn client_reads_and_writes_fixed_point_tags() {
    let (server, addr) = started_server(10);
    let mut client = RegisterClient::new(addr);

    client.send(4, &TagValue::from(-12.3456)).expect("send");
    assert_eq!(server.get(4).expect("local read"), TagValue::from(-12.3456));

    server.set(7, &TagValue::from(3.5)).expect("local write");
    assert_eq!(client.receive(7).expect("receive"), TagValue::from(3.5));
    assert_eq!(client.receive(0).expect("receive unset"), TagValue::ZERO);
    assert!(client.is_connected());
}

#[test]
fn out_of_range_ids_are_reported() {
    let (server, addr) = started_server(3);
    let mut client = RegisterClient::new(addr);
    let err = client.receive(9).unwrap_err();
    assert!(matches!(err, RuntimeError::Register(ref message) if message.contains("exception code 2")), "{err}");
    assert_eq!(server.get(9).unwrap_err(), RuntimeError::RegisterAddress(9));
    assert!(client.receive(3).is_ok(), "client stays usable after an exception");
}

#[test]
fn text_values_cannot_be_sent() {
    let (_server, addr) = started_server(3);
    let mut client = RegisterClient::new(addr);
    assert!(matches!(
        client.send(1, &TagValue::from("open")),
        Err(RuntimeError::NonNumericRegister(_))
    ));
}

#[test]
fn unknown_function_gets_an_illegal_function_exception() {
    let (_server, addr) = started_server(3);
    let mut stream = TcpStream::connect(addr).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .expect("timeout");
    // Write single register (0x06) is not served.
    let frame = [0x00, 0x2a, 0x00, 0x00, 0x00, 0x06, 0x01, 0x06, 0x00, 0x01, 0x00, 0x05];
    stream.write_all(&frame).expect("write");

    let mut response = [0u8; 9];
    stream.read_exact(&mut response).expect("read");
    assert_eq!(&response[0..2], &[0x00, 0x2a], "transaction id echoed");
    assert_eq!(&response[4..6], &[0x00, 0x03]);
    assert_eq!(&response[7..9], &[0x86, 0x01]);
}

#[test]
fn unreachable_server_is_a_transient_failure() {
    let mut client = RegisterClient::new(common::free_addr()).with_timeout(Duration::from_millis(200));
    let err = client.receive(1).unwrap_err();
    assert!(err.is_transient(), "{err}");
    assert!(!client.is_connected());
}

#[test]
fn stopped_server_refuses_clients() {
    let (mut server, addr) = started_server(3);
    let mut client = RegisterClient::new(addr);
    client.send(1, &TagValue::from(1.0)).expect("send while running");
    server.stop();
    assert!(!server.is_running());

    let mut fresh = RegisterClient::new(addr).with_timeout(Duration::from_millis(200));
    assert!(fresh.receive(1).is_err());
    assert_eq!(server.get(1).expect("image kept"), TagValue::from(1.0));
}

#[test]
fn stop_closes_connections_already_open() {
    let (mut server, addr) = started_server(3);
    server.set(1, &TagValue::from(2.5)).expect("local write");
    let mut client = RegisterClient::new(addr).with_timeout(Duration::from_millis(200));
    assert_eq!(client.receive(1).expect("receive while running"), TagValue::from(2.5));
    std::thread::sleep(Duration::from_millis(5));

    server.stop();
    for _ in 0..5 {
        let err = client.receive(1).unwrap_err();
        assert!(err.is_transient(), "{err}");
    }
}
