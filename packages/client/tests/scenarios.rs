//! End-to-end scenarios against canned fixture servers
//!
//! The client under test stays single-threaded; each fixture server runs on
//! a background thread, serves scripted bytes to sequential connections, and
//! returns the request heads it captured.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::thread::{self, JoinHandle};

use flate2::write::GzEncoder;
use flate2::Compression;
use shoal_client::{
    Client, ClientConfig, EventKind, EventQuery, Kind, Request, RequestId, RequestState,
};

/// Serve one canned response per expected connection, in order, capturing
/// each request head.
fn serve(responses: Vec<Vec<u8>>) -> (String, JoinHandle<Vec<Vec<u8>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind fixture listener");
    let addr = listener.local_addr().expect("fixture local addr");
    let handle = thread::spawn(move || {
        let mut captured = Vec::new();
        for response in responses {
            let (mut sock, _) = listener.accept().expect("fixture accept");
            captured.push(read_head(&mut sock));
            sock.write_all(&response).expect("fixture write");
        }
        captured
    });
    (format!("127.0.0.1:{}", addr.port()), handle)
}

fn read_head(sock: &mut impl Read) -> Vec<u8> {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        match sock.read(&mut byte) {
            Ok(0) => break,
            Ok(_) => head.push(byte[0]),
            Err(e) => panic!("fixture head read failed: {e}"),
        }
    }
    head
}

/// Drain every event, returning the full event log and the concatenated
/// body bytes per request.
fn drain(client: &mut Client) -> (Vec<(RequestId, EventKind)>, HashMap<RequestId, Vec<u8>>) {
    let mut log = Vec::new();
    let mut bodies: HashMap<RequestId, Vec<u8>> = HashMap::new();
    while client.await_next_event() {
        let kind = client.event().expect("cursor must hold an event");
        let id = client
            .event_request()
            .expect("cursor must hold a request")
            .id();
        log.push((id, kind));
        if kind == EventKind::BodyChunkAvailable {
            bodies
                .entry(id)
                .or_default()
                .extend_from_slice(&client.body_chunk().unwrap_or_default());
        }
    }
    (log, bodies)
}

fn gzip_bytes(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).expect("gzip encode");
    encoder.finish().expect("gzip finish")
}

fn events_for(log: &[(RequestId, EventKind)], id: RequestId) -> Vec<EventKind> {
    log.iter()
        .filter(|(i, _)| *i == id)
        .map(|(_, k)| *k)
        .collect()
}

fn assert_success_stream(events: &[EventKind]) {
    assert_eq!(events.first(), Some(&EventKind::GotHeaders));
    assert_eq!(events.last(), Some(&EventKind::Finished));
    assert!(
        events[1..events.len() - 1]
            .iter()
            .all(|k| *k == EventKind::BodyChunkAvailable),
        "unexpected events between headers and completion: {events:?}"
    );
    assert!(
        events.len() >= 3,
        "expected at least one body chunk: {events:?}"
    );
}

#[test]
fn plain_200_identity() {
    let (addr, server) = serve(vec![
        b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nHello".to_vec(),
    ]);
    let mut client = Client::new(ClientConfig::default()).expect("client");
    let id = client.enqueue(
        Request::get(format!("http://{addr}/"))
            .build()
            .expect("request"),
    );

    let (log, bodies) = drain(&mut client);

    assert_success_stream(&events_for(&log, id));
    assert_eq!(&bodies[&id][..], b"Hello");

    let req = client.request(id).expect("request lookup");
    assert_eq!(req.state(), RequestState::Finished);
    let resp = req.response().expect("response");
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(resp.reason(), "OK");
    assert_eq!(resp.header("content-length"), Some("5"));
    assert_eq!(resp.header("Content-Length"), Some("5"));
    assert_eq!(resp.header("CONTENT-LENGTH"), Some("5"));
    assert_eq!(resp.received_bytes(), 5);
    assert_eq!(resp.total_bytes(), Some(5));

    let heads = server.join().expect("fixture thread");
    let head = String::from_utf8_lossy(&heads[0]).into_owned();
    assert!(head.starts_with("GET / HTTP/1.1\r\n"));
    assert!(head.contains("Connection: close\r\n"));
    assert!(head.contains("Accept-Encoding: gzip\r\n"));
    assert!(head.contains(&format!("Host: {addr}\r\n")));
}

#[test]
fn chunked_200() {
    let (addr, server) = serve(vec![
        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nHello\r\n6\r\n World\r\n0\r\n\r\n"
            .to_vec(),
    ]);
    let mut client = Client::new(ClientConfig::default()).expect("client");
    let id = client.enqueue(
        Request::get(format!("http://{addr}/chunked"))
            .build()
            .expect("request"),
    );

    let (log, bodies) = drain(&mut client);

    let events = events_for(&log, id);
    assert_eq!(events.first(), Some(&EventKind::GotHeaders));
    assert_eq!(events.last(), Some(&EventKind::Finished));
    assert_eq!(&bodies[&id][..], b"Hello World");
    server.join().expect("fixture thread");
}

#[test]
fn gzip_200() {
    let payload = gzip_bytes(b"Hello World");
    let mut response = format!(
        "HTTP/1.1 200 OK\r\nContent-Encoding: gzip\r\nContent-Length: {}\r\n\r\n",
        payload.len()
    )
    .into_bytes();
    response.extend_from_slice(&payload);

    let (addr, server) = serve(vec![response]);
    let mut client = Client::new(ClientConfig::default()).expect("client");
    let id = client.enqueue(
        Request::get(format!("http://{addr}/archive"))
            .build()
            .expect("request"),
    );

    let (_, bodies) = drain(&mut client);
    assert_eq!(&bodies[&id][..], b"Hello World");
    assert_eq!(
        client.request(id).expect("request").state(),
        RequestState::Finished
    );
    server.join().expect("fixture thread");
}

#[test]
fn redirect_301_within_limit() {
    let (addr, server) = serve(vec![
        b"HTTP/1.1 301 Moved Permanently\r\nLocation: /b\r\nContent-Length: 0\r\n\r\n".to_vec(),
        b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nOK".to_vec(),
    ]);
    let mut client = Client::new(ClientConfig::default()).expect("client");
    let id = client.enqueue(
        Request::get(format!("http://{addr}/a"))
            .build()
            .expect("request"),
    );

    let (log, bodies) = drain(&mut client);

    // The original's event stream ends with Redirect.
    assert_eq!(events_for(&log, id), vec![EventKind::Redirect]);

    let original = client.request(id).expect("original");
    let child_id = original.redirected_to().expect("redirect child");
    let child = client.request(child_id).expect("child");
    assert_eq!(child.redirected_from(), Some(id));
    assert_eq!(child.url().path(), "/b");
    assert_success_stream(&events_for(&log, child_id));
    assert_eq!(&bodies[&child_id][..], b"OK");

    let heads = server.join().expect("fixture thread");
    assert!(String::from_utf8_lossy(&heads[1]).starts_with("GET /b HTTP/1.1\r\n"));
}

#[test]
fn redirect_loop_exceeds_bound() {
    let redirect =
        b"HTTP/1.1 301 Moved Permanently\r\nLocation: /loop\r\nContent-Length: 0\r\n\r\n".to_vec();
    let (addr, server) = serve(vec![redirect.clone(), redirect.clone(), redirect]);
    let mut client = Client::new(ClientConfig::new().max_redirects(2)).expect("client");
    let id = client.enqueue(
        Request::get(format!("http://{addr}/loop"))
            .build()
            .expect("request"),
    );

    let (log, _) = drain(&mut client);

    // Two hops succeed as redirects; the third request dies on the bound.
    let first = client.request(id).expect("first");
    let second_id = first.redirected_to().expect("second request");
    let third_id = client
        .request(second_id)
        .expect("second")
        .redirected_to()
        .expect("third request");
    assert_eq!(events_for(&log, id), vec![EventKind::Redirect]);
    assert_eq!(events_for(&log, second_id), vec![EventKind::Redirect]);
    assert_eq!(events_for(&log, third_id), vec![EventKind::Failed]);

    let third = client.request(third_id).expect("third");
    assert_eq!(third.state(), RequestState::Failed);
    assert_eq!(
        third.error().map(shoal_client::Error::kind),
        Some(Kind::TooManyRedirects)
    );
    assert!(third.redirected_to().is_none());
    server.join().expect("fixture thread");
}

#[test]
fn unsupported_encoding_fails_without_body_events() {
    let (addr, server) = serve(vec![
        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: br\r\n\r\nxxxx".to_vec(),
    ]);
    let mut client = Client::new(ClientConfig::default()).expect("client");
    let id = client.enqueue(
        Request::get(format!("http://{addr}/"))
            .build()
            .expect("request"),
    );

    let (log, _) = drain(&mut client);

    let events = events_for(&log, id);
    assert!(!events.contains(&EventKind::BodyChunkAvailable));
    assert_eq!(events.last(), Some(&EventKind::Failed));
    assert_eq!(
        client
            .request(id)
            .expect("request")
            .error()
            .map(shoal_client::Error::kind),
        Some(Kind::UnsupportedEncoding)
    );
    server.join().expect("fixture thread");
}

#[test]
fn concurrency_cap_holds() {
    let response = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nHello".to_vec();
    let (addr, server) = serve(vec![response; 5]);
    let mut client = Client::new(ClientConfig::new().concurrency(2)).expect("client");
    let ids = client.enqueue_all((0..5).map(|i| {
        Request::get(format!("http://{addr}/{i}"))
            .build()
            .expect("request")
    }));

    let mut finished = 0;
    while client.await_next_event() {
        let active = client.requests().filter(|r| r.state().is_active()).count();
        assert!(active <= 2, "{active} sockets in flight under a cap of 2");
        if client.event() == Some(EventKind::Finished) {
            finished += 1;
        }
    }
    assert_eq!(finished, 5);
    for id in ids {
        assert_eq!(
            client.request(id).expect("request").state(),
            RequestState::Finished
        );
    }
    server.join().expect("fixture thread");
}

#[test]
fn post_streams_the_upload_body() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind fixture listener");
    let addr = format!("127.0.0.1:{}", listener.local_addr().expect("addr").port());
    let server = thread::spawn(move || {
        let (mut sock, _) = listener.accept().expect("fixture accept");
        let head = read_head(&mut sock);
        let mut body = vec![0u8; 11];
        sock.read_exact(&mut body).expect("fixture body read");
        assert_eq!(&body[..], b"hello world");
        sock.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\ndone")
            .expect("fixture write");
        head
    });

    let mut client = Client::new(ClientConfig::default()).expect("client");
    let id = client.enqueue(
        Request::post(format!("http://{addr}/upload"))
            .header("Content-Length", "11")
            .body(std::io::Cursor::new(b"hello world".to_vec()))
            .build()
            .expect("request"),
    );

    let (log, bodies) = drain(&mut client);
    assert_success_stream(&events_for(&log, id));
    assert_eq!(&bodies[&id][..], b"done");

    let head = String::from_utf8_lossy(&server.join().expect("fixture thread")).into_owned();
    assert!(head.starts_with("POST /upload HTTP/1.1\r\n"));
    assert!(head.contains("Content-Length: 11\r\n"));
}

#[test]
fn scoped_wait_leaves_other_requests_untouched() {
    let response = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nHello".to_vec();
    let (addr_a, server_a) = serve(vec![response.clone()]);
    let (addr_b, server_b) = serve(vec![response]);

    let mut client = Client::new(ClientConfig::default()).expect("client");
    let id_a = client.enqueue(
        Request::get(format!("http://{addr_a}/a"))
            .build()
            .expect("request"),
    );
    let id_b = client.enqueue(
        Request::get(format!("http://{addr_b}/b"))
            .build()
            .expect("request"),
    );

    // Drain A alone; B's events must all still be pending afterwards.
    let query_a = EventQuery::for_requests([id_a]);
    let mut a_events = Vec::new();
    while client.await_next_event_for(&query_a) {
        assert_eq!(client.event_request().expect("cursor request").id(), id_a);
        a_events.push(client.event().expect("event"));
    }
    assert_success_stream(&a_events);

    let query_b = EventQuery::for_requests([id_b]);
    let mut b_events = Vec::new();
    while client.await_next_event_for(&query_b) {
        assert_eq!(client.event_request().expect("cursor request").id(), id_b);
        b_events.push(client.event().expect("event"));
    }
    assert_success_stream(&b_events);

    server_a.join().expect("fixture thread");
    server_b.join().expect("fixture thread");
}

#[test]
fn unsupported_scheme_fails_at_admission() {
    let mut client = Client::new(ClientConfig::default()).expect("client");
    let id = client.enqueue(Request::get("ftp://example.com/f").build().expect("request"));

    assert!(client.await_next_event());
    assert_eq!(client.event(), Some(EventKind::Failed));
    assert_eq!(
        client
            .request(id)
            .expect("request")
            .error()
            .map(shoal_client::Error::kind),
        Some(Kind::InvalidScheme)
    );
    assert!(!client.await_next_event());
}

#[test]
fn connection_refused_surfaces_as_connect_failure() {
    // Bind then drop to find a port with nothing listening on it.
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind probe listener");
        listener.local_addr().expect("addr").port()
    };

    let mut client = Client::new(ClientConfig::default()).expect("client");
    let id = client.enqueue(
        Request::get(format!("http://127.0.0.1:{port}/"))
            .build()
            .expect("request"),
    );

    let (log, _) = drain(&mut client);
    assert_eq!(events_for(&log, id).last(), Some(&EventKind::Failed));
    let err = client
        .request(id)
        .expect("request")
        .error()
        .map(shoal_client::Error::kind);
    assert!(
        matches!(err, Some(Kind::Connect | Kind::Write | Kind::Protocol)),
        "unexpected error kind {err:?}"
    );
}

#[test]
fn truncated_chunked_body_is_a_protocol_error() {
    let (addr, server) = serve(vec![
        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nHello\r\n".to_vec(),
    ]);
    let mut client = Client::new(ClientConfig::default()).expect("client");
    let id = client.enqueue(
        Request::get(format!("http://{addr}/"))
            .build()
            .expect("request"),
    );

    let (log, _) = drain(&mut client);
    assert_eq!(events_for(&log, id).last(), Some(&EventKind::Failed));
    assert_eq!(
        client
            .request(id)
            .expect("request")
            .error()
            .map(shoal_client::Error::kind),
        Some(Kind::Protocol)
    );
    server.join().expect("fixture thread");
}
