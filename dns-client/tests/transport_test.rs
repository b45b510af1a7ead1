//! Loopback tests for the UDP and TCP resolvers.
//!
//! Every test starts its own stub server on an OS-chosen `127.0.0.1` port in
//! a background thread, so no network access is needed.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use dns_client::dns::{RecordClass, ResponseCode};
use dns_client::{
    Client, Error, Message, RecordData, RecordType, Resolver, ResourceRecord, Response,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Successful answer to `query` with one A record.
fn answer(query: &Message) -> Message {
    let mut msg = query.clone();
    msg.header.set_response(true);
    msg.header.set_recursion_available(true);
    let name = query.questions[0].name.clone();
    msg.answers.push(ResourceRecord {
        name,
        record_type: RecordType::A,
        class: RecordClass::IN,
        ttl: 300,
        data: RecordData::A("93.184.216.34".parse().unwrap()),
    });
    msg
}

fn truncated(query: &Message) -> Message {
    let mut msg = query.clone();
    msg.header.set_response(true);
    msg.header.set_truncated(true);
    msg
}

/// Answers `count` datagrams, each with whatever `respond` builds.
fn udp_stub<F>(socket: UdpSocket, count: usize, respond: F) -> JoinHandle<()>
where
    F: Fn(&Message) -> Vec<u8> + Send + 'static,
{
    thread::spawn(move || {
        let mut buf = [0u8; 4096];
        for _ in 0..count {
            let (len, peer) = socket.recv_from(&mut buf).expect("stub recv");
            let query = Message::decode(&buf[..len]).expect("stub decode");
            socket.send_to(&respond(&query), peer).expect("stub send");
        }
    })
}

/// Accepts one connection, reads one framed query and hands it to `respond`
/// together with the stream.
fn tcp_stub<F>(listener: TcpListener, respond: F) -> JoinHandle<Message>
where
    F: FnOnce(&Message, &mut TcpStream) + Send + 'static,
{
    thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("stub accept");
        let mut prefix = [0u8; 2];
        stream.read_exact(&mut prefix).expect("stub read prefix");
        let mut query = vec![0u8; u16::from_be_bytes(prefix) as usize];
        stream.read_exact(&mut query).expect("stub read query");
        let query = Message::decode(&query).expect("stub decode");
        respond(&query, &mut stream);
        query
    })
}

fn frame(message: &Message) -> Vec<u8> {
    let bytes = message.encode().unwrap();
    let mut out = (bytes.len() as u16).to_be_bytes().to_vec();
    out.extend_from_slice(&bytes);
    out
}

fn bind_udp() -> UdpSocket {
    UdpSocket::bind("127.0.0.1:0").expect("bind udp")
}

/// UDP socket and TCP listener sharing one port.
fn bind_pair() -> (UdpSocket, TcpListener, SocketAddr) {
    for _ in 0..16 {
        let udp = bind_udp();
        let addr = udp.local_addr().unwrap();
        if let Ok(tcp) = TcpListener::bind(addr) {
            return (udp, tcp, addr);
        }
    }
    panic!("no port free for both UDP and TCP");
}

fn client(server: SocketAddr, resolver: Resolver) -> Client {
    let mut client = Client::with_resolver(server, resolver);
    client.set_timeout(Some(Duration::from_secs(5)));
    client
}

// ---------------------------------------------------------------------------
// UDP
// ---------------------------------------------------------------------------

#[test]
fn udp_answer_is_returned_with_raw_bytes() {
    let socket = bind_udp();
    let server = socket.local_addr().unwrap();
    let sent = Arc::new(std::sync::Mutex::new(Vec::new()));
    let record = Arc::clone(&sent);
    let stub = udp_stub(socket, 1, move |q| {
        let bytes = answer(q).encode().unwrap();
        *record.lock().unwrap() = bytes.clone();
        bytes
    });

    let response = client(server, Resolver::udp())
        .resolve("example.com", RecordType::A)
        .expect("resolve");
    stub.join().unwrap();

    assert_eq!(response.bytes(), sent.lock().unwrap().as_slice());
    assert_eq!(response.size(), response.bytes().len());
    assert!(response.recursion_available());
    assert_eq!(response.answers().len(), 1);
    assert_eq!(response.request().questions()[0].name, "example.com");
}

#[test]
fn truncated_udp_answer_falls_back_to_tcp() {
    let (udp, tcp, server) = bind_pair();
    let udp_stub = udp_stub(udp, 1, |q| truncated(q).encode().unwrap());
    let tcp_stub = tcp_stub(tcp, |q, stream| {
        stream.write_all(&frame(&answer(q))).unwrap();
    });

    let mut request = client(server, Resolver::default()).create_request();
    request.set_id(0x1234);
    request.set_recursion_desired(true);
    request
        .questions_mut()
        .push(dns_client::Question::new("example.com", RecordType::A));
    let response = request.resolve().expect("resolve via tcp");

    udp_stub.join().unwrap();
    let tcp_query = tcp_stub.join().unwrap();

    assert_eq!(tcp_query, *request.message());
    assert_eq!(response.id(), 0x1234);
    assert!(!response.truncated());
    assert_eq!(response.response_code(), ResponseCode::NoError);
    assert_eq!(
        response.answers()[0].data,
        RecordData::A("93.184.216.34".parse().unwrap())
    );
}

#[test]
fn fallback_result_is_returned_unchanged() {
    let socket = bind_udp();
    let server = socket.local_addr().unwrap();
    let stub = udp_stub(socket, 1, |q| truncated(q).encode().unwrap());

    let fallback = Resolver::with_backend(|request, _| {
        let mut msg = answer(request.message());
        msg.header.set_authoritative(true);
        Ok(Response::from_bytes(request.clone(), msg.encode()?)?)
    });
    let client = client(server, Resolver::udp_with_fallback(fallback.clone()));
    let request = {
        let mut r = client.create_request();
        r.questions_mut()
            .push(dns_client::Question::new("example.com", RecordType::A));
        r
    };

    let via_udp = request.resolve().expect("resolve");
    stub.join().unwrap();
    let standalone = fallback.resolve(&request, None).unwrap();

    assert_eq!(via_udp.bytes(), standalone.bytes());
    assert!(via_udp.authoritative());
}

#[test]
fn truncated_reply_cut_mid_record_still_falls_back() {
    let socket = bind_udp();
    let server = socket.local_addr().unwrap();
    let stub = udp_stub(socket, 1, |q| {
        let mut bytes = truncated(q).encode().unwrap();
        bytes[7] = 1; // ancount says one answer, the datagram holds none
        bytes
    });

    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let fallback = Resolver::with_backend(move |request, _| {
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(Response::from_bytes(
            request.clone(),
            answer(request.message()).encode()?,
        )?)
    });

    let response = client(server, Resolver::udp_with_fallback(fallback))
        .resolve("example.com", RecordType::A)
        .expect("resolve via fallback");
    stub.join().unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!response.truncated());
    assert_eq!(response.answers().len(), 1);
}

#[test]
fn truncation_without_fallback_fails() {
    let socket = bind_udp();
    let server = socket.local_addr().unwrap();
    let stub = udp_stub(socket, 1, |q| truncated(q).encode().unwrap());

    let err = client(server, Resolver::udp())
        .resolve("example.com", RecordType::A)
        .unwrap_err();
    stub.join().unwrap();

    assert_eq!(err.to_string(), "request failed");
}

#[test]
fn mismatched_identifier_is_rejected() {
    let socket = bind_udp();
    let server = socket.local_addr().unwrap();
    let stub = udp_stub(socket, 1, |q| {
        let mut msg = answer(q);
        msg.header.id = q.header.id.wrapping_add(1);
        msg.encode().unwrap()
    });

    let err = client(server, Resolver::default())
        .resolve("example.com", RecordType::A)
        .unwrap_err();
    stub.join().unwrap();

    match err {
        Error::Response(e) => {
            assert_eq!(e.message(), "mismatching request/response identifiers");
            let response = e.response().expect("response attached");
            assert_ne!(response.id(), response.request().id());
        }
        other => panic!("expected response error, got {other:?}"),
    }
}

#[test]
fn error_rcode_is_rejected_with_records_present() {
    let socket = bind_udp();
    let server = socket.local_addr().unwrap();
    let stub = udp_stub(socket, 1, |q| {
        let mut msg = answer(q);
        msg.header.set_response_code(ResponseCode::ServFail);
        msg.encode().unwrap()
    });

    let err = client(server, Resolver::default())
        .resolve("example.com", RecordType::A)
        .unwrap_err();
    stub.join().unwrap();

    assert_eq!(err.to_string(), "SERVFAIL (server failure)");
    let response = err.response().expect("response attached");
    assert_eq!(response.answers().len(), 1);
}

#[test]
fn malformed_datagram_is_an_invalid_response() {
    let socket = bind_udp();
    let server = socket.local_addr().unwrap();
    let stub = udp_stub(socket, 1, |q| q.header.id.to_be_bytes().to_vec());

    let err = client(server, Resolver::default())
        .resolve("example.com", RecordType::A)
        .unwrap_err();
    stub.join().unwrap();

    match err {
        Error::Response(e) => {
            assert_eq!(e.message(), "invalid response");
            assert!(std::error::Error::source(&e).is_some());
        }
        other => panic!("expected response error, got {other:?}"),
    }
}

#[test]
fn udp_transport_errors_are_not_retried_over_tcp() {
    let server = bind_udp().local_addr().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let fallback = Resolver::with_backend(move |_, _| {
        seen.fetch_add(1, Ordering::SeqCst);
        Err(dns_client::ResponseError::new("fallback used").into())
    });

    let err = client(server, Resolver::udp_with_fallback(fallback))
        .resolve("example.com", RecordType::A)
        .unwrap_err();

    assert!(matches!(err, Error::Io(_)), "got {err:?}");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn silent_server_times_out() {
    let socket = bind_udp();
    let server = socket.local_addr().unwrap();

    let mut client = Client::new(server);
    client.set_timeout(Some(Duration::from_millis(200)));
    let err = client.resolve("example.com", RecordType::A).unwrap_err();
    drop(socket);

    match err {
        Error::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::TimedOut),
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[test]
fn identical_requests_give_identical_answers() {
    let socket = bind_udp();
    let server = socket.local_addr().unwrap();
    let stub = udp_stub(socket, 2, |q| answer(q).encode().unwrap());
    let client = client(server, Resolver::default());

    let build = || {
        let mut r = client.create_request();
        r.set_id(0x0101);
        r.set_recursion_desired(true);
        r.questions_mut()
            .push(dns_client::Question::new("example.com", RecordType::A));
        r
    };
    let first = build().resolve().unwrap();
    let second = build().resolve().unwrap();
    stub.join().unwrap();

    assert_eq!(first.message(), second.message());
    assert_eq!(first.bytes(), second.bytes());
}

#[test]
fn one_client_serves_many_threads() {
    const THREADS: usize = 8;
    let socket = bind_udp();
    let server = socket.local_addr().unwrap();
    let stub = udp_stub(socket, THREADS, |q| answer(q).encode().unwrap());
    let client = Arc::new(client(server, Resolver::default()));

    let workers: Vec<_> = (0..THREADS)
        .map(|i| {
            let client = Arc::clone(&client);
            thread::spawn(move || {
                let name = format!("host{i}.example.com");
                let response = client.resolve(&name, RecordType::A).unwrap();
                assert_eq!(response.answers()[0].name, name);
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    stub.join().unwrap();
}

#[test]
fn lookup_over_udp() {
    let socket = bind_udp();
    let server = socket.local_addr().unwrap();
    let stub = udp_stub(socket, 1, |q| answer(q).encode().unwrap());

    let ips = client(server, Resolver::default())
        .lookup("example.com", RecordType::A)
        .unwrap();
    stub.join().unwrap();

    assert_eq!(ips, vec!["93.184.216.34".parse::<std::net::IpAddr>().unwrap()]);
}

// ---------------------------------------------------------------------------
// TCP
// ---------------------------------------------------------------------------

#[test]
fn tcp_reply_in_fragments_is_reassembled() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let server = listener.local_addr().unwrap();
    let stub = tcp_stub(listener, |q, stream| {
        stream.set_nodelay(true).unwrap();
        for chunk in frame(&answer(q)).chunks(3) {
            stream.write_all(chunk).unwrap();
            stream.flush().unwrap();
            thread::sleep(Duration::from_millis(2));
        }
    });

    let response = client(server, Resolver::Tcp)
        .resolve("fragmented.example.com", RecordType::A)
        .expect("resolve");
    stub.join().unwrap();

    assert_eq!(response.answers()[0].name, "fragmented.example.com");
    assert_eq!(response.size(), response.message().encode().unwrap().len());
}

#[test]
fn tcp_close_mid_reply_is_end_of_stream() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let server = listener.local_addr().unwrap();
    let stub = tcp_stub(listener, |q, stream| {
        let framed = frame(&answer(q));
        stream.write_all(&framed[..framed.len() / 2]).unwrap();
    });

    let err = client(server, Resolver::Tcp)
        .resolve("example.com", RecordType::A)
        .unwrap_err();
    stub.join().unwrap();

    match err {
        Error::Io(e) => {
            assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof);
            assert_eq!(e.to_string(), "unexpected end of stream");
        }
        other => panic!("expected end of stream, got {other:?}"),
    }
}

#[test]
fn tcp_connection_refused_is_io_error() {
    let server = TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap();

    let err = client(server, Resolver::Tcp)
        .resolve("example.com", RecordType::A)
        .unwrap_err();

    assert!(matches!(err, Error::Io(_)), "got {err:?}");
}
