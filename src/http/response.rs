//! HTTP/1.x response builder and encoder.
//!
//! A [`Response`] is built up by the dispatcher and then written once with
//! [`Response::send`]. The encoder owns the framing headers (`Server`,
//! `Date`, `Content-Length`, `Connection`) so they always agree with what is
//! actually written.

use std::io;
use std::time::SystemTime;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::headers::{Headers, ResponseHeader};
use super::{CRLF, SERVER_NAME, StatusCode, Version};

/// An HTTP response, ready to be serialized and sent.
///
/// # Examples
///
/// ```
/// use staticd::http::{Response, ResponseHeader, StatusCode};
///
/// let response = Response::new(StatusCode::Ok)
///     .header(ResponseHeader::ContentType, "text/plain")
///     .body("hello");
///
/// let bytes = response.into_bytes();
/// let text = std::str::from_utf8(&bytes).unwrap();
/// assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(text.contains("Content-Length: 5\r\n"));
/// assert!(text.contains("Connection: close\r\n"));
/// assert!(text.ends_with("\r\n\r\nhello"));
/// ```
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: Headers<ResponseHeader>,
    body: Vec<u8>,
    omit_body: bool,
}

impl Response {
    /// Creates a new response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Vec::new(),
            omit_body: false,
        }
    }

    /// Sets a response header, replacing any previous value.
    #[must_use]
    pub fn header(mut self, name: ResponseHeader, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets a header in-place.
    pub fn set_header(&mut self, name: ResponseHeader, value: impl Into<String>) {
        self.headers.insert(name, value);
    }

    /// Sets the response body.
    ///
    /// `Content-Length` is derived from it by [`into_bytes`](Self::into_bytes).
    #[must_use]
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Sets `Last-Modified` from a filesystem timestamp.
    #[must_use]
    pub fn last_modified(self, modified: SystemTime) -> Self {
        self.header(ResponseHeader::LastModified, httpdate::fmt_http_date(modified))
    }

    /// Suppresses the body on the wire while keeping its `Content-Length`.
    ///
    /// Used for responses to HEAD requests.
    #[must_use]
    pub fn omit_body(mut self, omit: bool) -> Self {
        self.omit_body = omit;
        self
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &Headers<ResponseHeader> {
        &self.headers
    }

    pub fn get_header(&self, name: ResponseHeader) -> Option<&str> {
        self.headers.get(name)
    }

    /// The full body, even when it will be omitted on the wire.
    pub fn body_bytes(&self) -> &[u8] {
        &self.body
    }

    pub fn is_body_omitted(&self) -> bool {
        self.omit_body
    }

    /// Serializes the response into a `BytesMut` buffer.
    ///
    /// Always sets `Server`, `Date`, `Content-Length` (length of the body,
    /// even if omitted) and `Connection: close`, overriding caller values.
    pub fn into_bytes(self) -> BytesMut {
        self.encode_at(SystemTime::now())
    }

    fn encode_at(mut self, now: SystemTime) -> BytesMut {
        let content_length = self.body.len();

        self.headers.insert(ResponseHeader::Server, SERVER_NAME);
        self.headers
            .insert(ResponseHeader::Date, httpdate::fmt_http_date(now));
        self.headers
            .insert(ResponseHeader::ContentLength, content_length.to_string());
        self.headers.insert(ResponseHeader::Connection, "close");

        let written_body = if self.omit_body { 0 } else { content_length };
        let estimated_size = 128 + self.headers.len() * 64 + written_body;
        let mut buf = BytesMut::with_capacity(estimated_size);

        // Status line
        buf.put(
            format!(
                "{} {} {}{CRLF}",
                Version::Http11,
                self.status.as_u16(),
                self.status.canonical_reason()
            )
            .as_bytes(),
        );

        // Headers
        buf.put(self.headers.to_string().as_bytes());

        // Header/body separator
        buf.put(CRLF.as_bytes());

        if !self.omit_body {
            buf.put(self.body.as_slice());
        }

        buf
    }

    /// Writes the response to `writer` and flushes it.
    ///
    /// Returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// Any I/O error from the underlying writer. Part of the response may
    /// already have been written when this happens.
    pub async fn send<W>(self, writer: &mut W) -> io::Result<usize>
    where
        W: AsyncWrite + Unpin,
    {
        let buf = self.into_bytes();
        writer.write_all(&buf).await?;
        writer.flush().await?;
        Ok(buf.len())
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::Ok)
    }
}
