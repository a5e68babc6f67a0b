//! Live Stress Test - concurrent clients against a real listener
//!
//! Setiap test menyalakan server sendiri di port ephemeral, jadi tidak
//! perlu server eksternal.
//!
//! Usage:
//!   cargo test --release --test live_stress_test -- --nocapture

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use framerpc::{Client, Error, Metadata, Server, ServerConfig, HEADER_SIZE};

/// Wire constants, duplicated here so the test does not trust the codec.
const ENDPOINT_OFFSET: usize = 125;
const BODY_SIZE_OFFSET: usize = 17;

/// Encode a request header by hand (untuk test independence)
fn encode_request(endpoint: &str, body: &[u8]) -> Vec<u8> {
    let mut buf = vec![0u8; HEADER_SIZE + body.len()];
    buf[0] = 0; // request
    buf[1..9].copy_from_slice(&42i64.to_le_bytes());
    buf[9..17].copy_from_slice(&0u64.to_le_bytes());
    buf[BODY_SIZE_OFFSET..BODY_SIZE_OFFSET + 8].copy_from_slice(&(body.len() as u64).to_le_bytes());
    buf[ENDPOINT_OFFSET..ENDPOINT_OFFSET + endpoint.len()].copy_from_slice(endpoint.as_bytes());
    buf[HEADER_SIZE..].copy_from_slice(body);
    buf
}

struct Running {
    server: Arc<Server>,
    addr: String,
    handle: thread::JoinHandle<framerpc::Result<()>>,
}

impl Running {
    fn stop(self) {
        self.server.shutdown();
        self.handle.join().unwrap().unwrap();
    }
}

fn start(server: Server) -> Running {
    let server = Arc::new(server);
    let listener = server.bind().unwrap();
    let addr = listener.local_addr().to_string();
    let handle = {
        let server = Arc::clone(&server);
        thread::spawn(move || server.serve(listener))
    };
    Running {
        server,
        addr,
        handle,
    }
}

fn echo_server(config: ServerConfig) -> Server {
    let mut server = Server::with_config(config);
    server.add_request_endpoint("echo", |_, w, r| {
        std::io::copy(r, w)?;
        Ok(())
    });
    server.add_request_endpoint("upper", |_, w, r| {
        let mut body = Vec::new();
        r.read_to_end(&mut body)?;
        body.make_ascii_uppercase();
        w.write_all(&body)?;
        Ok(())
    });
    server
}

/// Statistics collector
struct StressStats {
    completed: AtomicU64,
    errors: AtomicU64,
    total_latency_ns: AtomicU64,
    max_latency_ns: AtomicU64,
}

impl StressStats {
    fn new() -> Self {
        Self {
            completed: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            total_latency_ns: AtomicU64::new(0),
            max_latency_ns: AtomicU64::new(0),
        }
    }

    fn record(&self, latency: Duration) {
        let ns = latency.as_nanos() as u64;
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ns.fetch_add(ns, Ordering::Relaxed);
        self.max_latency_ns.fetch_max(ns, Ordering::Relaxed);
    }

    fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    fn print_report(&self, duration: Duration) {
        let completed = self.completed.load(Ordering::Relaxed);
        let errors = self.errors.load(Ordering::Relaxed);
        let avg = self.total_latency_ns.load(Ordering::Relaxed) / completed.max(1);
        let max = self.max_latency_ns.load(Ordering::Relaxed);

        println!("\nSTRESS TEST RESULTS");
        println!("===================");
        println!("  Duration:   {:.2}s", duration.as_secs_f64());
        println!("  Round trips: {}", completed);
        println!("  Errors:     {}", errors);
        println!(
            "  Rate:       {:.0} req/sec",
            completed as f64 / duration.as_secs_f64()
        );
        println!("  Avg:        {:.2} us", avg as f64 / 1000.0);
        println!("  Max:        {:.2} us", max as f64 / 1000.0);
    }
}

#[test]
fn test_concurrent_round_trips() {
    const CLIENTS: usize = 16;
    const ROUND_TRIPS: usize = 200;

    let running = start(echo_server(ServerConfig::default()));
    let stats = Arc::new(StressStats::new());
    let start_time = Instant::now();

    let handles: Vec<_> = (0..CLIENTS)
        .map(|c| {
            let addr = running.addr.clone();
            let stats = Arc::clone(&stats);
            thread::spawn(move || {
                let mut client = Client::connect("tcp", &addr).unwrap();
                for i in 0..ROUND_TRIPS {
                    let msg = format!("client {c} message {i}");
                    let sent = Instant::now();
                    let reply = client
                        .write_framed_str("echo", &msg)
                        .and_then(|_| client.read_framed_string());
                    match reply {
                        Ok((_, body)) if body == msg => stats.record(sent.elapsed()),
                        _ => stats.record_error(),
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    stats.print_report(start_time.elapsed());

    assert_eq!(stats.errors.load(Ordering::Relaxed), 0);
    assert_eq!(
        stats.completed.load(Ordering::Relaxed),
        (CLIENTS * ROUND_TRIPS) as u64
    );

    // Every client hung up; their connection threads wind down.
    let deadline = Instant::now() + Duration::from_secs(5);
    while running.server.active_connections() > 0 {
        assert!(Instant::now() < deadline, "connections never drained");
        thread::sleep(Duration::from_millis(5));
    }

    // Still serviceable afterwards.
    let mut late = Client::connect("tcp", &running.addr).unwrap();
    late.write_framed_str("echo", "after the crowd").unwrap();
    assert_eq!(late.read_framed_string().unwrap().1, "after the crowd");
    drop(late);

    running.stop();
}

#[test]
fn test_raw_wire_echo() {
    let running = start(echo_server(ServerConfig::default()));

    let mut stream = TcpStream::connect(&running.addr).unwrap();
    stream.write_all(&encode_request("echo", b"hello")).unwrap();

    let mut reply = vec![0u8; HEADER_SIZE + 5];
    stream.read_exact(&mut reply).unwrap();

    assert_eq!(reply[0], 0);
    assert_eq!(
        u64::from_le_bytes(reply[BODY_SIZE_OFFSET..BODY_SIZE_OFFSET + 8].try_into().unwrap()),
        5
    );
    assert_eq!(&reply[ENDPOINT_OFFSET..ENDPOINT_OFFSET + 4], b"echo");
    assert!(reply[ENDPOINT_OFFSET + 4..HEADER_SIZE].iter().all(|&b| b == 0));
    assert_eq!(&reply[HEADER_SIZE..], b"hello");

    drop(stream);
    running.stop();
}

#[test]
fn test_pipelined_requests_on_one_connection() {
    let running = start(echo_server(ServerConfig::default()));

    // Three requests in a single write; replies come back in order.
    let mut wire = encode_request("echo", b"one");
    wire.extend(encode_request("upper", b"two"));
    wire.extend(encode_request("echo", b""));

    let mut client = Client::connect("tcp", &running.addr).unwrap();
    client.write_all(&wire).unwrap();

    let replies: Vec<(String, String)> = (0..3)
        .map(|_| {
            let (meta, body) = client.read_framed_string().unwrap();
            (meta.endpoint, body)
        })
        .collect();
    assert_eq!(
        replies,
        [
            ("echo".to_string(), "one".to_string()),
            ("upper".to_string(), "TWO".to_string()),
            ("echo".to_string(), String::new()),
        ]
    );

    drop(client);
    running.stop();
}

#[test]
fn test_unregistered_endpoint_drops_only_that_connection() {
    let running = start(echo_server(ServerConfig::default()));

    let mut bad = Client::connect("tcp", &running.addr).unwrap();
    let mut good = Client::connect("tcp", &running.addr).unwrap();

    bad.write_framed_str("missing", "x").unwrap();
    assert!(bad.read_framed().unwrap_err().is_disconnect());

    good.write_framed_str("upper", "fine").unwrap();
    assert_eq!(good.read_framed_string().unwrap().1, "FINE");

    drop(good);
    running.stop();
}

#[test]
fn test_stream_endpoint_chat() {
    // Every stream connection joins a room; each line it sends is
    // forwarded to every member, framed under "chat".
    let room: Arc<Mutex<Vec<Client>>> = Arc::new(Mutex::new(Vec::new()));
    let mut server = Server::with_config(ServerConfig::default());
    {
        let room = Arc::clone(&room);
        server.add_stream_endpoint("chat", move |meta, mut conn| {
            let writer = Client::connect("tcp", &meta.content_type)?;
            room.lock().unwrap().push(writer);

            loop {
                let (_, line) = match conn.read_framed_string() {
                    Ok(frame) => frame,
                    Err(e) if e.is_disconnect() => return Ok(()),
                    Err(e) => return Err(e.into()),
                };
                for member in room.lock().unwrap().iter_mut() {
                    member.write_framed_str("chat", &line)?;
                }
            }
        });
    }
    let running = start(server);

    // Each member gets its own inbox listener for forwarded lines.
    let inbox = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let inbox_addr = inbox.local_addr().unwrap().to_string();

    let mut member = Client::connect("tcp", &running.addr).unwrap();
    let meta = Metadata {
        content_type: inbox_addr,
        ..Metadata::stream("chat")
    };
    member.write_metadata(&meta).unwrap();

    let (inbox_stream, _) = inbox.accept().unwrap();
    let mut inbox_client = Client::from(inbox_stream);

    member.write_framed_str("chat", "hi all").unwrap();
    let (meta, line) = inbox_client.read_framed_string().unwrap();
    assert_eq!(meta.endpoint, "chat");
    assert_eq!(line, "hi all");

    member.close().unwrap();
    assert!(matches!(member.write_framed_str("chat", "late"), Err(Error::ConnectionClosed)));

    room.lock().unwrap().clear();
    running.stop();
}

#[cfg(unix)]
#[test]
fn test_unix_socket_drain_on_shutdown() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("drain.sock");
    let path = path.to_str().unwrap().to_string();

    let mut server = Server::new("unix", &path).unwrap();
    server.add_request_endpoint("slow", |_, w, r| {
        thread::sleep(Duration::from_millis(200));
        std::io::copy(r, w)?;
        Ok(())
    });
    let running = start(server);

    let mut client = Client::connect("unix", &path).unwrap();
    client.write_framed_str("slow", "in flight").unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while running.server.active_connections() == 0 {
        assert!(Instant::now() < deadline);
        thread::sleep(Duration::from_millis(5));
    }

    let reader = thread::spawn(move || client.read_framed_string().map(|(_, body)| body));
    let server = Arc::clone(&running.server);
    running.stop();

    assert_eq!(server.active_connections(), 0);
    assert_eq!(reader.join().unwrap().unwrap(), "in flight");
    assert!(Client::connect("unix", &path).is_err());
}

#[test]
fn test_invalid_protocol() {
    assert!(matches!(
        Server::new("foo", "127.0.0.1:0"),
        Err(Error::InvalidProtocol(p)) if p == "foo"
    ));
    assert!(matches!(
        Client::connect("udp", "127.0.0.1:1"),
        Err(Error::InvalidProtocol(_))
    ));
}
