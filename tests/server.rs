//! End-to-end tests over real TCP connections.

use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use staticd::config::ServerConfig;
use staticd::server::Server;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// `index.html` (12 bytes), `notes.txt` and an `img/` directory.
fn site() -> TempDir {
    let root = tempfile::tempdir().unwrap();
    fs::write(root.path().join("index.html"), "<h1>hi</h1>\n").unwrap();
    fs::write(root.path().join("notes.txt"), "plain notes").unwrap();
    fs::create_dir(root.path().join("img")).unwrap();
    fs::write(root.path().join("img/logo.png"), [0x89, b'P', b'N', b'G']).unwrap();
    fs::create_dir(root.path().join("img/thumbs")).unwrap();
    root
}

async fn start(root: &TempDir) -> Server {
    let config = ServerConfig {
        address: IpAddr::from([127, 0, 0, 1]),
        port: 0,
        acceptors: 2,
        ..ServerConfig::new(root.path())
    };
    let mut server = Server::bind(&config, config.dispatcher().unwrap())
        .await
        .unwrap();
    server.start();
    server
}

async fn exchange(addr: SocketAddr, request: &[u8]) -> (String, Vec<u8>) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    let mut raw = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut raw))
        .await
        .unwrap()
        .unwrap();
    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("no header terminator");
    let head = String::from_utf8(raw[..split].to_vec()).unwrap();
    (head, raw[split + 4..].to_vec())
}

#[tokio::test]
async fn get_root_serves_index() {
    let root = site();
    let mut server = start(&root).await;

    let (head, body) = exchange(server.local_addr(), b"GET / HTTP/1.1\r\nHost: t\r\n\r\n").await;
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(head.contains("\r\nContent-Type: text/html"));
    assert!(head.contains("\r\nContent-Length: 12"));
    assert!(head.contains("\r\nServer: staticd/"));
    assert!(head.contains("\r\nDate: "));
    assert!(head.contains("\r\nConnection: close"));
    assert_eq!(body, b"<h1>hi</h1>\n");

    server.stop().await;
}

#[tokio::test]
async fn missing_and_forbidden() {
    let root = site();
    let mut server = start(&root).await;
    let addr = server.local_addr();

    let (head, body) = exchange(addr, b"GET /missing.txt HTTP/1.1\r\n\r\n").await;
    assert!(head.starts_with("HTTP/1.1 404 Not Found\r\n"));
    assert!(String::from_utf8(body).unwrap().contains("404 - Not Found"));

    let (head, _) = exchange(addr, b"GET /../etc/passwd HTTP/1.1\r\n\r\n").await;
    assert!(head.starts_with("HTTP/1.1 403 Forbidden\r\n"));

    let (head, _) = exchange(addr, b"GET /img/%2e%2e/%2e%2e/etc HTTP/1.1\r\n\r\n").await;
    assert!(head.starts_with("HTTP/1.1 403 Forbidden\r\n"));

    server.stop().await;
}

#[tokio::test]
async fn head_has_get_headers_and_no_body() {
    let root = site();
    let mut server = start(&root).await;
    let addr = server.local_addr();

    let (get_head, get_body) = exchange(addr, b"GET /notes.txt HTTP/1.0\r\n\r\n").await;
    let (head_head, head_body) = exchange(addr, b"HEAD /notes.txt HTTP/1.0\r\n\r\n").await;

    let without_date = |head: &str| -> Vec<String> {
        head.lines()
            .filter(|l| !l.starts_with("Date:"))
            .map(str::to_owned)
            .collect()
    };
    assert_eq!(without_date(&get_head), without_date(&head_head));
    assert!(head_head.contains("Content-Length: 11"));
    assert_eq!(get_body, b"plain notes");
    assert!(head_body.is_empty());

    server.stop().await;
}

#[tokio::test]
async fn directory_listing() {
    let root = site();
    let mut server = start(&root).await;

    let (head, body) = exchange(server.local_addr(), b"GET /img/ HTTP/1.1\r\n\r\n").await;
    let body = String::from_utf8(body).unwrap();
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(head.contains("Content-Type: text/html; charset=utf-8"));
    assert!(body.contains("Index of /img/"));
    let thumbs = body.find("/img/thumbs/").unwrap();
    let logo = body.find("/img/logo.png").unwrap();
    assert!(thumbs < logo);

    server.stop().await;
}

#[tokio::test]
async fn protocol_errors() {
    let root = site();
    let mut server = start(&root).await;
    let addr = server.local_addr();

    let cases: [(&[u8], &str); 4] = [
        (b"GET /\r\n\r\n", "400"),
        (b"PUT / HTTP/1.1\r\n\r\n", "501"),
        (b"POST / HTTP/1.1\r\nContent-Length: 3\r\n\r\na=1", "411"),
        (
            b"POST / HTTP/1.1\r\nContent-Type: multipart/form-data\r\nContent-Length: 3\r\n\r\na=1",
            "501",
        ),
    ];
    for (request, code) in cases {
        let (head, _) = exchange(addr, request).await;
        assert!(
            head.starts_with(&format!("HTTP/1.1 {code} ")),
            "expected {code}, got {head}"
        );
    }

    let long = format!("GET /{} HTTP/1.1\r\n\r\n", "a".repeat(5000));
    let (head, _) = exchange(addr, long.as_bytes()).await;
    assert!(head.starts_with("HTTP/1.1 414 "));

    server.stop().await;
}

#[tokio::test]
async fn form_post_is_served() {
    let root = site();
    let mut server = start(&root).await;

    let request = b"POST /notes.txt HTTP/1.1\r\n\
        Content-Type: application/x-www-form-urlencoded\r\n\
        Content-Length: 7\r\n\r\na=1&b=2";
    let (head, body) = exchange(server.local_addr(), request).await;
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(body, b"plain notes");

    server.stop().await;
}

#[tokio::test]
async fn concurrent_connections() {
    let root = site();
    let mut server = start(&root).await;
    let addr = server.local_addr();

    let clients: Vec<_> = (0..32)
        .map(|_| tokio::spawn(async move { exchange(addr, b"GET /notes.txt HTTP/1.1\r\n\r\n").await }))
        .collect();
    for client in clients {
        let (head, body) = client.await.unwrap();
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert_eq!(body, b"plain notes");
    }

    server.stop().await;
}
