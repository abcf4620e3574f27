use std::io::{BufRead, BufReader, Read, Write};
use std::net::{IpAddr, Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use listener::address::Address;
use listener::sink::Memory;
use listener::Listener;

/// Starts a `Listener` on a free localhost port, logging into the returned `Memory`.
fn start() -> (SocketAddr, Memory) {
    let sink = Memory::new();
    let address = Address::new(IpAddr::from([127, 0, 0, 1]), 0);
    let listener = Listener::bind(address, Arc::new(sink.clone())).unwrap();
    let address = SocketAddr::from(listener.address());
    listener.spawn();
    (address, sink)
}

fn connect(address: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(address).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    stream
}

/// A response as seen by the client: status line, headers (lowercased names), and body.
struct Response {
    status_line: String,
    headers: Vec<(String, String)>,
    body: String,
}

impl Response {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Reads one `Content-Length`-framed response off the `reader`.
fn read_response(reader: &mut impl BufRead) -> Response {
    let mut status_line = String::new();
    reader.read_line(&mut status_line).unwrap();

    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        let (key, value) = line.split_once(": ").unwrap();
        headers.push((key.to_ascii_lowercase(), value.to_string()));
    }

    let response = Response {
        status_line: status_line.trim_end().to_string(),
        headers,
        body: String::new(),
    };

    let length: usize = response.header("content-length").unwrap().parse().unwrap();
    let mut body = vec![0; length];
    reader.read_exact(&mut body).unwrap();

    Response {
        body: String::from_utf8(body).unwrap(),
        ..response
    }
}

/// Sends `raw` on a fresh connection and reads back a single response.
fn exchange(address: SocketAddr, raw: &[u8]) -> Response {
    let mut stream = connect(address);
    stream.write_all(raw).unwrap();
    read_response(&mut BufReader::new(&stream))
}

#[test]
fn test_get_without_headers_or_body() {
    let (address, sink) = start();

    let response = exchange(address, b"GET / HTTP/1.1\r\n\r\n");

    assert_eq!(response.status_line, "HTTP/1.1 200 OK");
    assert_eq!(response.body, "Logged");
    assert_eq!(sink.lines(), vec!["GET", "Headers {}", ""]);
}

#[test]
fn test_post_with_content_type_and_body() {
    let (address, sink) = start();

    let response = exchange(
        address,
        b"POST /submit HTTP/1.1\r\nContent-Type: text/plain\r\nContent-Length: 5\r\n\r\nhello",
    );

    assert_eq!(response.status_line, "HTTP/1.1 200 OK");
    assert_eq!(response.header("content-type"), Some("text/plain;charset=UTF-8"));
    assert_eq!(response.body, "Logged");

    let lines = sink.lines();
    assert_eq!(lines[0], "POST");
    assert!(lines[1].contains(r#""Content-Type": "text/plain""#));
    assert_eq!(lines[2], "hello");
}

#[test]
fn test_every_method_path_and_header_set_gets_200_logged() {
    let (address, sink) = start();

    let requests: [&[u8]; 5] = [
        b"DELETE /things/42 HTTP/1.1\r\n\r\n",
        b"OPTIONS * HTTP/1.1\r\nHost: example\r\n\r\n",
        b"PATCH /a?b=c HTTP/1.1\r\nContent-Length: 2\r\n\r\n{}",
        b"PROPFIND /dav HTTP/1.1\r\nDepth: 1\r\n\r\n",
        b"GET /deep/path/ HTTP/1.0\r\n\r\n",
    ];

    for raw in requests {
        let response = exchange(address, raw);
        assert_eq!(response.status_line, "HTTP/1.1 200 OK");
        assert_eq!(response.body, "Logged");
    }

    let mut methods: Vec<String> = sink.lines().chunks(3).map(|group| group[0].clone()).collect();
    methods.sort();
    assert_eq!(methods, vec!["DELETE", "GET", "OPTIONS", "PATCH", "PROPFIND"]);
}

#[test]
fn test_headers_keep_duplicates_order_and_casing() {
    let (address, sink) = start();

    exchange(
        address,
        b"GET / HTTP/1.1\r\nX-Dup: first\r\nhOsT: localhost\r\nX-Dup: second\r\nACCEPT: */*\r\n\r\n",
    );

    assert_eq!(
        sink.lines()[1],
        r#"Headers { "X-Dup": "first", "hOsT": "localhost", "X-Dup": "second", "ACCEPT": "*/*" }"#
    );
}

#[test]
fn test_body_is_logged_exactly() {
    let (address, sink) = start();
    let body = "  leading and trailing spaces  \r\nsecond line\n{\"json\": [1, 2, 3]}\n";

    let raw = format!("PUT / HTTP/1.1\r\nContent-Length: {}\r\n\r\n{}", body.len(), body);
    exchange(address, raw.as_bytes());

    assert_eq!(sink.lines()[2], body);
}

#[test]
fn test_non_utf8_body_is_decoded_leniently() {
    let (address, sink) = start();

    exchange(address, b"POST / HTTP/1.1\r\nContent-Length: 4\r\n\r\nab\xff\xfe");

    assert_eq!(sink.lines()[2], "ab\u{FFFD}\u{FFFD}");
}

#[test]
fn test_chunked_body() {
    let (address, sink) = start();

    let response = exchange(
        address,
        b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWiki\r\n6\r\npedia \r\n0\r\n\r\n",
    );

    assert_eq!(response.body, "Logged");
    assert_eq!(sink.lines()[2], "Wikipedia ");
}

#[test]
fn test_missing_body_does_not_hang() {
    let (address, sink) = start();

    // no Content-Length and no Transfer-Encoding: the request ends with its headers
    let response = exchange(address, b"POST /empty HTTP/1.1\r\nX-Note: no body\r\n\r\n");

    assert_eq!(response.body, "Logged");
    assert_eq!(sink.lines()[2], "");
}

#[test]
fn test_expect_continue() {
    let (address, sink) = start();
    let stream = connect(address);
    let mut writer = &stream;
    let mut reader = BufReader::new(&stream);

    writer
        .write_all(b"POST / HTTP/1.1\r\nExpect: 100-continue\r\nContent-Length: 3\r\n\r\n")
        .unwrap();

    let mut interim = String::new();
    reader.read_line(&mut interim).unwrap();
    assert_eq!(interim, "HTTP/1.1 100 Continue\r\n");
    reader.read_line(&mut interim).unwrap();

    writer.write_all(b"abc").unwrap();
    let response = read_response(&mut reader);

    assert_eq!(response.body, "Logged");
    assert_eq!(sink.lines()[2], "abc");
}

#[test]
fn test_head_has_no_body() {
    let (address, sink) = start();
    let mut stream = connect(address);

    stream
        .write_all(b"HEAD / HTTP/1.1\r\nConnection: close\r\n\r\n")
        .unwrap();

    let mut raw = String::new();
    stream.read_to_string(&mut raw).unwrap();

    assert!(raw.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(raw.contains("content-length: 6\r\n"));
    assert!(raw.ends_with("\r\n\r\n"));
    assert_eq!(sink.lines()[0], "HEAD");
}

#[test]
fn test_keep_alive_serves_several_requests_per_connection() {
    let (address, sink) = start();
    let stream = connect(address);
    let mut writer = &stream;
    let mut reader = BufReader::new(&stream);

    for i in 0..3 {
        let body = format!("request {}", i);
        let raw = format!("POST / HTTP/1.1\r\nContent-Length: {}\r\n\r\n{}", body.len(), body);
        writer.write_all(raw.as_bytes()).unwrap();

        let response = read_response(&mut reader);
        assert_eq!(response.body, "Logged");
        assert_eq!(response.header("connection"), None);
    }

    let bodies: Vec<String> = sink.lines().chunks(3).map(|group| group[2].clone()).collect();
    assert_eq!(bodies, vec!["request 0", "request 1", "request 2"]);
}

#[test]
fn test_malformed_request_gets_400_and_is_not_logged() {
    let (address, sink) = start();

    let response = exchange(address, b"NOT AN HTTP REQUEST\r\n\r\n");

    assert_eq!(response.status_line, "HTTP/1.1 400 Bad Request");
    assert_eq!(response.header("connection"), Some("close"));
    assert!(sink.lines().is_empty());
}

#[test]
fn test_abrupt_disconnect_mid_body_leaves_listener_running() {
    let (address, sink) = start();

    {
        let mut stream = connect(address);
        stream
            .write_all(b"POST /upload HTTP/1.1\r\nContent-Length: 1000\r\n\r\nonly part of it")
            .unwrap();
        stream.shutdown(Shutdown::Both).unwrap();
    }

    let response = exchange(address, b"GET /after HTTP/1.1\r\n\r\n");

    assert_eq!(response.status_line, "HTTP/1.1 200 OK");
    assert_eq!(response.body, "Logged");
    assert_eq!(sink.lines(), vec!["GET", "Headers {}", ""]);
}

#[test]
fn test_concurrent_connections_log_contiguous_groups() {
    let (address, sink) = start();
    let clients = 16;
    let requests_per_client = 10;

    let threads: Vec<_> = (0..clients)
        .map(|client| {
            thread::spawn(move || {
                let stream = connect(address);
                let mut writer = &stream;
                let mut reader = BufReader::new(&stream);

                for request in 0..requests_per_client {
                    let body = format!("client {} request {}", client, request);
                    let raw = format!(
                        "POST / HTTP/1.1\r\nX-Client: {}\r\nContent-Length: {}\r\n\r\n{}",
                        client,
                        body.len(),
                        body
                    );
                    writer.write_all(raw.as_bytes()).unwrap();
                    assert_eq!(read_response(&mut reader).body, "Logged");
                }
            })
        })
        .collect();

    for thread in threads {
        thread.join().unwrap();
    }

    let lines = sink.lines();
    assert_eq!(lines.len(), clients * requests_per_client * 3);

    for group in lines.chunks(3) {
        assert_eq!(group[0], "POST");
        let client = group[2]
            .trim_start_matches("client ")
            .split(' ')
            .next()
            .unwrap();
        assert!(
            group[1].contains(&format!(r#""X-Client": "{}""#, client)),
            "{:?}",
            group
        );
    }
}
