//! HTTP/1.x request decoding.
//!
//! [`RequestDecoder`] reads one request from a buffered byte stream in three
//! ordered phases (request line, header block, form parameters). Each phase
//! can end decoding early with a [`ProtocolError`] that the dispatcher turns
//! into an error page.

use std::collections::HashMap;
use std::io;
use std::time::Duration;

use percent_encoding::{percent_decode, percent_decode_str};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use tokio::time::timeout;

use super::headers::{HeaderName, Headers, RequestHeader};
use super::{Method, ProtocolError, StatusCode, Version};

/// Longest accepted request URI, in decoded characters.
pub const MAX_URI_LENGTH: usize = 4096;

/// Largest form body the decoder will buffer.
pub const MAX_FORM_BYTES: usize = 1024 * 1024;

/// Longest accepted request or header line, excluding the terminator.
const MAX_LINE_BYTES: usize = 16 * 1024;

const MAX_HEADER_LINES: usize = 100;

/// Empty lines tolerated ahead of the request line (RFC 9112 §2.2).
const MAX_LEADING_EMPTY_LINES: usize = 8;

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";
const MULTIPART_FORM_DATA: &str = "multipart/form-data";

/// Why a request could not be decoded.
#[derive(Debug, Error)]
pub enum RequestError {
    /// The request is malformed or unsupported; answer with this status.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The peer closed the connection before sending a request line.
    #[error("connection closed before a request was received")]
    ConnectionClosed,

    /// No data arrived within the idle-read timeout.
    #[error("no data received within {0:?}")]
    IdleTimeout(Duration),
}

/// A decoded HTTP request. Immutable once built.
///
/// # Examples
///
/// ```
/// use staticd::http::{Method, RequestDecoder, RequestHeader};
///
/// # tokio_test();
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn tokio_test() {
/// let mut raw: &[u8] = b"GET /docs/a%20b.txt?x=1 HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let request = RequestDecoder::default().decode(&mut raw).await.unwrap();
///
/// assert_eq!(request.method(), Method::Get);
/// assert_eq!(request.uri(), "/docs/a b.txt");
/// assert_eq!(request.query_string(), Some("x=1"));
/// assert_eq!(request.header(RequestHeader::Host), Some("localhost"));
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    uri: String,
    query: Option<String>,
    version: Version,
    headers: Headers<RequestHeader>,
    params: HashMap<String, String>,
}

impl Request {
    /// Returns the HTTP method.
    pub fn method(&self) -> Method {
        self.method
    }

    /// Returns the percent-decoded request path (without the query string).
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Returns the raw query string (without the leading `?`), if any.
    pub fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &Headers<RequestHeader> {
        &self.headers
    }

    pub fn header(&self, name: RequestHeader) -> Option<&str> {
        self.headers.get(name)
    }

    /// Returns a decoded form parameter by name.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Returns every decoded form parameter.
    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    /// Returns the value of the `Content-Length` header parsed as a `usize`, if present.
    pub fn content_length(&self) -> Option<usize> {
        self.headers.get(RequestHeader::ContentLength)?.parse().ok()
    }
}

/// Reads and validates one request from a byte stream.
#[derive(Debug, Clone)]
pub struct RequestDecoder {
    idle_timeout: Duration,
}

impl Default for RequestDecoder {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

impl RequestDecoder {
    /// Creates a decoder whose every read gives up after `idle_timeout`.
    pub fn new(idle_timeout: Duration) -> Self {
        Self { idle_timeout }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Decodes one request from `reader`.
    ///
    /// # Errors
    ///
    /// - [`RequestError::Protocol`] — malformed or unsupported input, carrying
    ///   the status to answer with.
    /// - [`RequestError::ConnectionClosed`] — the stream ended before any
    ///   request line.
    /// - [`RequestError::IdleTimeout`] — a read exceeded the idle timeout.
    pub async fn decode<R>(&self, reader: &mut R) -> Result<Request, RequestError>
    where
        R: AsyncBufRead + Unpin,
    {
        let request_line = self.read_request_line(reader).await?;
        let RequestLine {
            method,
            uri,
            query,
            version,
        } = parse_request_line(&request_line)?;

        let headers = self.read_headers(reader).await?;

        // Form parameters are only decoded for POST; PUT is never accepted.
        let params = if method == Method::Post {
            self.read_form(reader, &headers).await?
        } else {
            HashMap::new()
        };

        Ok(Request {
            method,
            uri,
            query,
            version,
            headers,
            params,
        })
    }

    async fn read_request_line<R>(&self, reader: &mut R) -> Result<String, RequestError>
    where
        R: AsyncBufRead + Unpin,
    {
        for _ in 0..=MAX_LEADING_EMPTY_LINES {
            match self.read_line(reader).await {
                Ok(Some(line)) if line.is_empty() => continue,
                Ok(Some(line)) => return Ok(line),
                Ok(None) => return Err(RequestError::ConnectionClosed),
                Err(e) => return Err(self.line_error(e, StatusCode::UriTooLong)),
            }
        }
        Err(ProtocolError::with_reason(StatusCode::BadRequest, "missing request line").into())
    }

    async fn read_headers<R>(&self, reader: &mut R) -> Result<Headers<RequestHeader>, RequestError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut headers = Headers::new();
        let mut lines = 0;

        loop {
            let line = match self.read_line(reader).await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    return Err(bad_request("header block ended unexpectedly").into());
                }
                Err(e) => {
                    return Err(self.line_error(e, StatusCode::RequestHeaderFieldsTooLarge));
                }
            };

            let line = line.trim();
            if line.is_empty() {
                return Ok(headers);
            }

            lines += 1;
            if lines > MAX_HEADER_LINES {
                return Err(ProtocolError::new(StatusCode::RequestHeaderFieldsTooLarge).into());
            }

            let (field, value) = line
                .split_once(':')
                .ok_or_else(|| bad_request("malformed header line"))?;

            // Headers outside the recognized set are dropped.
            if let Some(name) = RequestHeader::from_name(field.trim()) {
                headers.insert(name, value.trim());
            }
        }
    }

    async fn read_form<R>(
        &self,
        reader: &mut R,
        headers: &Headers<RequestHeader>,
    ) -> Result<HashMap<String, String>, RequestError>
    where
        R: AsyncBufRead + Unpin,
    {
        let length = match headers.get(RequestHeader::ContentLength) {
            Some(value) => value
                .parse::<usize>()
                .map_err(|_| bad_request("invalid Content-Length"))?,
            None => return Ok(HashMap::new()),
        };
        if length == 0 {
            return Ok(HashMap::new());
        }

        let content_type = headers
            .get(RequestHeader::ContentType)
            .ok_or_else(|| ProtocolError::new(StatusCode::LengthRequired))?;
        let charset = parse_form_content_type(content_type)?;

        if length > MAX_FORM_BYTES {
            return Err(ProtocolError::new(StatusCode::PayloadTooLarge).into());
        }

        let mut body = vec![0u8; length];
        match timeout(self.idle_timeout, reader.read_exact(&mut body)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(bad_request("body shorter than Content-Length").into());
            }
            Ok(Err(_)) => return Err(ProtocolError::new(StatusCode::InternalServerError).into()),
            Err(_) => return Err(RequestError::IdleTimeout(self.idle_timeout)),
        }

        Ok(parse_form(body.trim_ascii(), charset)?)
    }

    /// Reads one line, without its terminator.
    ///
    /// Returns `Ok(None)` at end of stream. A final unterminated line is
    /// returned as-is.
    async fn read_line<R>(&self, reader: &mut R) -> Result<Option<String>, LineError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut buf = Vec::with_capacity(128);
        let mut limited = (&mut *reader).take(MAX_LINE_BYTES as u64 + 2);

        let read = match timeout(self.idle_timeout, limited.read_until(b'\n', &mut buf)).await {
            Ok(result) => result.map_err(LineError::Io)?,
            Err(_) => return Err(LineError::TimedOut),
        };
        if read == 0 {
            return Ok(None);
        }

        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        }
        if buf.len() > MAX_LINE_BYTES {
            return Err(LineError::TooLong);
        }

        String::from_utf8(buf)
            .map(Some)
            .map_err(|_| LineError::InvalidUtf8)
    }

    fn line_error(&self, error: LineError, too_long: StatusCode) -> RequestError {
        match error {
            LineError::TooLong => ProtocolError::new(too_long).into(),
            LineError::InvalidUtf8 => bad_request("line is not valid UTF-8").into(),
            LineError::Io(_) => ProtocolError::new(StatusCode::InternalServerError).into(),
            LineError::TimedOut => RequestError::IdleTimeout(self.idle_timeout),
        }
    }
}

#[derive(Debug)]
enum LineError {
    TooLong,
    InvalidUtf8,
    Io(io::Error),
    TimedOut,
}

#[derive(Debug)]
struct RequestLine {
    method: Method,
    uri: String,
    query: Option<String>,
    version: Version,
}

/// Parses `METHOD SP URI SP VERSION`.
fn parse_request_line(line: &str) -> Result<RequestLine, ProtocolError> {
    let parts: Vec<&str> = line.split(' ').collect();
    let [method, target, version] = parts.as_slice() else {
        return Err(bad_request("malformed request line"));
    };

    let method: Method = method.parse()?;

    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path, Some(query.to_owned())),
        None => (*target, None),
    };

    let uri = percent_decode_str(path)
        .decode_utf8()
        .map_err(|_| bad_request("URI is not valid UTF-8"))?
        .into_owned();

    if is_traversal(&uri) {
        return Err(ProtocolError::new(StatusCode::Forbidden));
    }
    if uri.chars().count() > MAX_URI_LENGTH {
        return Err(ProtocolError::new(StatusCode::UriTooLong));
    }

    Ok(RequestLine {
        method,
        uri,
        query,
        version: Version::from_token(version),
    })
}

/// `true` if the URI has a `..` segment or ends in `..`.
fn is_traversal(uri: &str) -> bool {
    uri.ends_with("..") || uri.split(['/', '\\']).any(|segment| segment == "..")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Charset {
    Utf8,
    Latin1,
}

impl Charset {
    fn from_label(label: &str) -> Option<Self> {
        match label.to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Some(Self::Utf8),
            "iso-8859-1" | "latin1" | "us-ascii" => Some(Self::Latin1),
            _ => None,
        }
    }

    fn decode(self, bytes: Vec<u8>) -> Result<String, ProtocolError> {
        match self {
            Self::Utf8 => {
                String::from_utf8(bytes).map_err(|_| bad_request("parameter is not valid UTF-8"))
            }
            Self::Latin1 => Ok(bytes.into_iter().map(char::from).collect()),
        }
    }
}

/// Validates a form body's `Content-Type` and extracts its charset.
fn parse_form_content_type(value: &str) -> Result<Charset, ProtocolError> {
    let mut parts = value.split(';');
    let media_type = parts.next().unwrap_or_default().trim();

    if media_type.eq_ignore_ascii_case(MULTIPART_FORM_DATA) {
        return Err(ProtocolError::new(StatusCode::NotImplemented));
    }
    if !media_type.eq_ignore_ascii_case(FORM_URLENCODED) {
        return Err(bad_request("unsupported Content-Type"));
    }

    let label = parts
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("charset"))
        .map(|(_, value)| value.trim().trim_matches('"'));

    match label {
        None => Ok(Charset::Utf8),
        Some(label) => {
            Charset::from_label(label).ok_or_else(|| bad_request("unsupported charset"))
        }
    }
}

/// Parses `key=value&key2=value2`, decoding `+` and percent escapes.
fn parse_form(body: &[u8], charset: Charset) -> Result<HashMap<String, String>, ProtocolError> {
    let mut params = HashMap::new();
    for pair in body.split(|&b| b == b'&').filter(|pair| !pair.is_empty()) {
        let split = pair
            .iter()
            .position(|&b| b == b'=')
            .ok_or_else(|| bad_request("malformed form parameter"))?;
        let key = decode_component(&pair[..split], charset)?;
        let value = decode_component(&pair[split + 1..], charset)?;
        params.insert(key, value);
    }
    Ok(params)
}

fn decode_component(raw: &[u8], charset: Charset) -> Result<String, ProtocolError> {
    let spaced: Vec<u8> = raw
        .iter()
        .map(|&b| if b == b'+' { b' ' } else { b })
        .collect();
    charset.decode(percent_decode(&spaced).collect())
}

fn bad_request(reason: &'static str) -> ProtocolError {
    ProtocolError::with_reason(StatusCode::BadRequest, reason)
}
