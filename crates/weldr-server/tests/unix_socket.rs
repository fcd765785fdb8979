//! The API over a Unix domain socket, spoken with a raw HTTP/1.1 client.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use weldr_server::TestServer;

fn request(socket: &Path, method: &str, path: &str, body: Option<(&str, &str)>) -> (u16, String) {
    let mut stream = UnixStream::connect(socket).unwrap();
    let mut req = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n");
    match body {
        Some((content_type, body)) => {
            req.push_str(&format!(
                "Content-Type: {content_type}\r\nContent-Length: {}\r\n\r\n{body}",
                body.len()
            ));
        }
        None => req.push_str("\r\n"),
    }
    stream.write_all(req.as_bytes()).unwrap();

    let mut raw = String::new();
    stream.read_to_string(&mut raw).unwrap();
    let status = raw
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    let body = raw
        .split_once("\r\n\r\n")
        .map(|(_, b)| b.to_owned())
        .unwrap_or_default();
    (status, body)
}

#[test]
fn serves_api_over_unix_socket() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("run").join("api.socket");
    let _server = TestServer::start_unix(dir.path().join("state"), socket.clone());
    assert!(socket.exists());

    let (status, body) = request(&socket, "GET", "/api/status", None);
    assert_eq!(status, 200);
    let v: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(v["api"], "1");

    let bp = r#"{"name": "socket-test", "version": "1.0.0"}"#;
    let (status, body) = request(
        &socket,
        "POST",
        "/api/v1/blueprints/new",
        Some(("application/json", bp)),
    );
    assert_eq!(status, 200, "{body}");

    let (status, body) = request(&socket, "GET", "/api/v1/blueprints/list", None);
    assert_eq!(status, 200);
    let v: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(v["blueprints"], serde_json::json!(["socket-test"]));
}

#[test]
fn stale_socket_file_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("api.socket");
    std::fs::write(&socket, b"left over").unwrap();

    let _server = TestServer::start_unix(dir.path().join("state"), socket.clone());
    let (status, _) = request(&socket, "GET", "/api/status", None);
    assert_eq!(status, 200);
}
