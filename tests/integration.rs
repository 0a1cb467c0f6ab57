//! End-to-end socket scenarios run against a real `respd` process bound to a loopback
//! port, exercising the request/response byte sequences a client actually sees.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

use respd::config::Config;
use respd::server::bootstrap;

fn spawn_server(port: u16, replicaof: Option<(String, u16)>) {
    let config = Config {
        dir: String::new(),
        dbfilename: String::new(),
        port,
        replicaof,
    };
    thread::spawn(move || {
        let _ = bootstrap::run(config);
    });
    // Give the listener a moment to bind before any test connects.
    thread::sleep(Duration::from_millis(150));
}

fn connect(port: u16) -> TcpStream {
    for _ in 0..20 {
        if let Ok(stream) = TcpStream::connect(("127.0.0.1", port)) {
            stream.set_nodelay(true).ok();
            return stream;
        }
        thread::sleep(Duration::from_millis(25));
    }
    panic!("could not connect to test server on port {port}");
}

fn read_reply(stream: &mut TcpStream, expected_len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; expected_len];
    stream.read_exact(&mut buf).expect("reading reply");
    buf
}

#[test]
fn ping_with_no_argument_replies_pong() {
    spawn_server(16399, None);
    let mut stream = connect(16399);
    stream.write_all(b"*1\r\n$4\r\nPING\r\n").unwrap();
    assert_eq!(read_reply(&mut stream, 7), b"+PONG\r\n");
}

#[test]
fn set_then_get_round_trips_and_missing_key_is_null() {
    spawn_server(16400, None);
    let mut stream = connect(16400);

    stream
        .write_all(b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n")
        .unwrap();
    assert_eq!(read_reply(&mut stream, 5), b"+OK\r\n");

    stream.write_all(b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n").unwrap();
    assert_eq!(read_reply(&mut stream, 9), b"$3\r\nbar\r\n");

    stream
        .write_all(b"*2\r\n$3\r\nGET\r\n$6\r\nnokey!\r\n")
        .unwrap();
    assert_eq!(read_reply(&mut stream, 5), b"$-1\r\n");
}

#[test]
fn px_expiry_makes_a_key_unreadable_after_it_elapses() {
    spawn_server(16401, None);
    let mut stream = connect(16401);

    stream
        .write_all(b"*5\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n$2\r\nPX\r\n$3\r\n100\r\n")
        .unwrap();
    assert_eq!(read_reply(&mut stream, 5), b"+OK\r\n");

    thread::sleep(Duration::from_millis(150));
    stream.write_all(b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n").unwrap();
    assert_eq!(read_reply(&mut stream, 5), b"$-1\r\n");
}

#[test]
fn wait_with_no_prior_writes_returns_replica_count_immediately() {
    spawn_server(16402, None);
    let mut stream = connect(16402);

    let start = std::time::Instant::now();
    stream
        .write_all(b"*3\r\n$4\r\nWAIT\r\n$1\r\n0\r\n$3\r\n500\r\n")
        .unwrap();
    assert_eq!(read_reply(&mut stream, 4), b":0\r\n");
    assert!(start.elapsed() < Duration::from_millis(100));
}

#[test]
fn replica_receives_propagated_writes_after_the_handshake() {
    spawn_server(16403, None);
    // Give the master a moment before pointing a replica at it.
    spawn_server(16404, Some(("127.0.0.1".to_string(), 16403)));
    thread::sleep(Duration::from_millis(200));

    let mut master = connect(16403);
    master
        .write_all(b"*3\r\n$3\r\nSET\r\n$1\r\nx\r\n$1\r\n1\r\n")
        .unwrap();
    assert_eq!(read_reply(&mut master, 5), b"+OK\r\n");

    thread::sleep(Duration::from_millis(200));

    let mut replica_client = connect(16404);
    replica_client
        .write_all(b"*2\r\n$3\r\nGET\r\n$1\r\nx\r\n")
        .unwrap();
    assert_eq!(read_reply(&mut replica_client, 7), b"$1\r\n1\r\n");
}
