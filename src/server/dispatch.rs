//! Per-connection request handling: decode, resolve, respond.

use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::time::{Duration, SystemTime};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info};

use crate::http::{
    ProtocolError, Request, RequestDecoder, RequestError, Response, ResponseHeader, StatusCode,
};
use crate::mime::MimeTypes;
use crate::resource::{DirEntry, ResolvedResource, Resolver, listing};
use crate::template::Templates;

const HTML_UTF8: &str = "text/html; charset=utf-8";

/// Unread request bytes discarded after responding, before the socket closes.
const LINGER_BYTES: u64 = 64 * 1024;
const LINGER_TIMEOUT: Duration = Duration::from_secs(2);

/// Turns one connection's request into exactly one response.
///
/// Holds only read-only state, so a single instance is shared by every worker.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    resolver: Resolver,
    mime: MimeTypes,
    templates: Templates,
    decoder: RequestDecoder,
}

impl Dispatcher {
    pub fn new(resolver: Resolver, mime: MimeTypes, templates: Templates) -> Self {
        Self {
            resolver,
            mime,
            templates,
            decoder: RequestDecoder::default(),
        }
    }

    /// Sets the idle-read timeout applied while decoding requests.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.decoder = RequestDecoder::new(timeout);
        self
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Serves a single request on `stream`, then shuts down its write side.
    ///
    /// Never fails: protocol errors become error responses, and a peer that
    /// goes away or stays silent simply gets no response.
    pub async fn handle<S>(&self, stream: S, peer: SocketAddr)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(reader);

        let response = match self.decoder.decode(&mut reader).await {
            Ok(request) => {
                let response = self.respond(&request).await;
                info!(
                    peer = %peer,
                    method = %request.method(),
                    uri = request.uri(),
                    status = response.status().as_u16(),
                    "request served"
                );
                response
            }
            Err(RequestError::Protocol(e)) => {
                info!(peer = %peer, status = e.code(), reason = %e.reason(), "request rejected");
                self.error_response(&e)
            }
            Err(RequestError::ConnectionClosed) => {
                debug!(peer = %peer, "connection closed before a request");
                return;
            }
            Err(RequestError::IdleTimeout(after)) => {
                debug!(peer = %peer, ?after, "connection idle, closing");
                return;
            }
        };

        if let Err(e) = response.send(&mut writer).await {
            debug!(peer = %peer, error = %e, "failed to write response");
            return;
        }
        if let Err(e) = writer.shutdown().await {
            debug!(peer = %peer, error = %e, "failed to shut down connection");
            return;
        }
        linger(&mut reader).await;
    }

    /// Builds the response for a decoded request.
    pub async fn respond(&self, request: &Request) -> Response {
        let response = match self.resolver.resolve(request.uri()).await {
            ResolvedResource::RegularFile { path, modified, .. } => {
                self.file_response(&path, modified).await
            }
            ResolvedResource::Directory { entries, .. } => {
                self.listing_response(request.uri(), &entries)
            }
            ResolvedResource::NotFound => {
                self.error_response(&ProtocolError::new(StatusCode::NotFound))
            }
            ResolvedResource::Forbidden => {
                self.error_response(&ProtocolError::new(StatusCode::Forbidden))
            }
        };
        response.omit_body(!request.method().has_body_in_response())
    }

    /// Renders `error` as an HTML error page with the matching status.
    pub fn error_response(&self, error: &ProtocolError) -> Response {
        Response::new(error.status())
            .header(ResponseHeader::ContentType, HTML_UTF8)
            .body(self.templates.render_error(error))
    }

    async fn file_response(&self, path: &Path, modified: SystemTime) -> Response {
        match tokio::fs::read(path).await {
            Ok(body) => Response::new(StatusCode::Ok)
                .header(ResponseHeader::ContentType, self.mime.lookup(path))
                .last_modified(modified)
                .body(body),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "resolved file could not be read");
                let status = match e.kind() {
                    io::ErrorKind::NotFound => StatusCode::NotFound,
                    io::ErrorKind::PermissionDenied => StatusCode::Forbidden,
                    _ => StatusCode::InternalServerError,
                };
                self.error_response(&ProtocolError::new(status))
            }
        }
    }

    fn listing_response(&self, uri: &str, entries: &[DirEntry]) -> Response {
        let items = listing::listing_items(uri, entries, &self.mime);
        Response::new(StatusCode::Ok)
            .header(ResponseHeader::ContentType, HTML_UTF8)
            .body(self.templates.render_listing(uri, &items))
    }
}

/// Drains what the peer still sends so closing with unread data does not
/// reset the connection before the response is read.
async fn linger<R>(reader: &mut R)
where
    R: AsyncRead + Unpin,
{
    let mut rest = (&mut *reader).take(LINGER_BYTES);
    let mut sink = tokio::io::sink();
    let drain = tokio::io::copy(&mut rest, &mut sink);
    let _ = tokio::time::timeout(LINGER_TIMEOUT, drain).await;
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    fn site() -> (TempDir, Dispatcher) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.html"), "<h1>hi</h1>\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "notes").unwrap();
        fs::create_dir(dir.path().join("img")).unwrap();
        fs::write(dir.path().join("img/logo.png"), [0u8; 4]).unwrap();
        fs::create_dir(dir.path().join("img/icons")).unwrap();
        let resolver = Resolver::new(
            dir.path(),
            vec!["index.html".to_owned(), "index.htm".to_owned()],
        )
        .unwrap();
        let dispatcher = Dispatcher::new(resolver, MimeTypes::embedded(), Templates::embedded());
        (dir, dispatcher)
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    async fn exchange(dispatcher: &Dispatcher, raw: &[u8]) -> String {
        let (mut client, server) = tokio::io::duplex(1 << 16);
        client.write_all(raw).await.unwrap();
        client.shutdown().await.unwrap();
        dispatcher.handle(server, peer()).await;
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        String::from_utf8(out).unwrap()
    }

    fn split(response: &str) -> (&str, &str) {
        response.split_once("\r\n\r\n").unwrap()
    }

    /// Header block without the `Date` line, which can differ between two calls.
    fn stable_head(head: &str) -> Vec<&str> {
        head.split("\r\n")
            .filter(|line| !line.starts_with("Date:"))
            .collect()
    }

    #[tokio::test]
    async fn root_serves_index_file() {
        let (_dir, dispatcher) = site();
        let response = exchange(&dispatcher, b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").await;
        let (head, body) = split(&response);
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(head.contains("Content-Type: text/html\r\n"));
        assert!(head.contains("Content-Length: 12\r\n"));
        assert!(head.contains("Last-Modified: "));
        assert!(head.contains("Connection: close"));
        assert_eq!(body, "<h1>hi</h1>\n");
    }

    #[tokio::test]
    async fn missing_file_is_404_page() {
        let (_dir, dispatcher) = site();
        let response = exchange(&dispatcher, b"GET /missing.txt HTTP/1.1\r\n\r\n").await;
        let (head, body) = split(&response);
        assert!(head.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(head.contains("Content-Type: text/html; charset=utf-8\r\n"));
        assert!(body.contains("404 - Not Found"));
    }

    #[tokio::test]
    async fn traversal_is_403() {
        let (_dir, dispatcher) = site();
        let response = exchange(&dispatcher, b"GET /../etc/passwd HTTP/1.1\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 403 Forbidden\r\n"));
    }

    #[tokio::test]
    async fn head_matches_get_without_body() {
        let (_dir, dispatcher) = site();
        let get = exchange(&dispatcher, b"GET /notes.txt HTTP/1.1\r\n\r\n").await;
        let head = exchange(&dispatcher, b"HEAD /notes.txt HTTP/1.1\r\n\r\n").await;

        let (get_head, get_body) = split(&get);
        let (head_head, head_body) = split(&head);
        assert_eq!(stable_head(get_head), stable_head(head_head));
        assert_eq!(get_body, "notes");
        assert_eq!(head_body, "");
        assert!(head_head.contains("Content-Length: 5"));
    }

    #[tokio::test]
    async fn directory_without_index_is_listed() {
        let (_dir, dispatcher) = site();
        let response = exchange(&dispatcher, b"GET /img HTTP/1.0\r\n\r\n").await;
        let (head, body) = split(&response);
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(head.contains("Content-Type: text/html; charset=utf-8\r\n"));
        assert!(body.contains("Index of /img"));
        let dir = body.find(r#"href="/img/icons/""#).unwrap();
        let file = body.find(r#"href="/img/logo.png""#).unwrap();
        assert!(dir < file);
        assert!(body.contains("image/png"));
    }

    #[tokio::test]
    async fn protocol_errors_become_error_pages() {
        let (_dir, dispatcher) = site();
        let response = exchange(&dispatcher, b"GARBAGE\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));

        let response = exchange(&dispatcher, b"DELETE / HTTP/1.1\r\n\r\n").await;
        let (head, body) = split(&response);
        assert!(head.starts_with("HTTP/1.1 501 Not Implemented\r\n"));
        assert!(body.contains("501 - Not Implemented"));
    }

    #[tokio::test]
    async fn post_form_still_serves_resource() {
        let (_dir, dispatcher) = site();
        let raw = b"POST /notes.txt HTTP/1.1\r\n\
            Content-Type: application/x-www-form-urlencoded\r\n\
            Content-Length: 7\r\n\r\na=1&b=2";
        let response = exchange(&dispatcher, raw).await;
        let (head, body) = split(&response);
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert_eq!(body, "notes");
    }

    #[tokio::test]
    async fn closed_connection_gets_no_response() {
        let (_dir, dispatcher) = site();
        assert_eq!(exchange(&dispatcher, b"").await, "");
    }

    #[tokio::test]
    async fn idle_connection_gets_no_response() {
        let (_dir, dispatcher) = site();
        let dispatcher = dispatcher.idle_timeout(Duration::from_millis(50));
        let (mut client, server) = tokio::io::duplex(1024);
        dispatcher.handle(server, peer()).await;
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn linger_drains_unread_request_bytes() {
        let mut unread: &[u8] = b"a=1&b=2 left behind by an early error";
        linger(&mut unread).await;
        assert!(unread.is_empty());
    }

    #[tokio::test]
    async fn error_response_uses_template() {
        let (_dir, dispatcher) = site();
        let response =
            dispatcher.error_response(&ProtocolError::new(StatusCode::LengthRequired));
        assert_eq!(response.status(), StatusCode::LengthRequired);
        let body = String::from_utf8(response.body_bytes().to_vec()).unwrap();
        assert!(body.contains("411 - Length Required"));
    }
}
