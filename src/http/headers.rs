//! Recognized header names and an order-preserving header map keyed by them.
//!
//! Requests and responses only carry headers from a fixed vocabulary:
//! [`RequestHeader`] for what the decoder keeps, [`ResponseHeader`] for what
//! the encoder may emit. Anything else is dropped at the boundary.

use std::fmt;

/// A closed set of header names with a canonical wire spelling.
pub trait HeaderName: Copy + Eq + fmt::Debug + 'static {
    /// Every member of the set.
    const ALL: &'static [Self];

    /// The canonical wire spelling, e.g. `Content-Type`.
    fn as_str(self) -> &'static str;

    /// Case-insensitive lookup of a wire name.
    fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|h| h.as_str().eq_ignore_ascii_case(name))
    }
}

macro_rules! header_names {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $wire:literal,)+ }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant,)+
        }

        impl HeaderName for $name {
            const ALL: &'static [Self] = &[$(Self::$variant,)+];

            fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $wire,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

header_names! {
    /// Request headers retained by the decoder.
    RequestHeader {
        Accept => "Accept",
        AcceptCharset => "Accept-Charset",
        AcceptEncoding => "Accept-Encoding",
        AcceptLanguage => "Accept-Language",
        AcceptDatetime => "Accept-Datetime",
        Authorization => "Authorization",
        CacheControl => "Cache-Control",
        Connection => "Connection",
        Cookie => "Cookie",
        ContentLength => "Content-Length",
        ContentMd5 => "Content-MD5",
        ContentType => "Content-Type",
        Date => "Date",
        Expect => "Expect",
        From => "From",
        Host => "Host",
        IfMatch => "If-Match",
        IfModifiedSince => "If-Modified-Since",
        IfNoneMatch => "If-None-Match",
        IfRange => "If-Range",
        IfUnmodifiedSince => "If-Unmodified-Since",
        MaxForwards => "Max-Forwards",
        Origin => "Origin",
        Pragma => "Pragma",
        Range => "Range",
        Referer => "Referer",
        Te => "TE",
        Upgrade => "Upgrade",
        UserAgent => "User-Agent",
        Via => "Via",
        Warning => "Warning",
    }
}

header_names! {
    /// Response headers the encoder knows how to emit.
    ResponseHeader {
        AccessControlAllowOrigin => "Access-Control-Allow-Origin",
        AcceptRanges => "Accept-Ranges",
        Age => "Age",
        Allow => "Allow",
        CacheControl => "Cache-Control",
        Connection => "Connection",
        ContentEncoding => "Content-Encoding",
        ContentLanguage => "Content-Language",
        ContentLength => "Content-Length",
        ContentLocation => "Content-Location",
        ContentMd5 => "Content-MD5",
        ContentDisposition => "Content-Disposition",
        ContentType => "Content-Type",
        Date => "Date",
        Etag => "ETag",
        Expires => "Expires",
        LastModified => "Last-Modified",
        Link => "Link",
        Location => "Location",
        P3p => "P3P",
        Pragma => "Pragma",
        ProxyAuthenticate => "Proxy-Authenticate",
        Refresh => "Refresh",
        RetryAfter => "Retry-After",
        Server => "Server",
        SetCookie => "Set-Cookie",
        Status => "Status",
        StrictTransportSecurity => "Strict-Transport-Security",
        Trailer => "Trailer",
        TransferEncoding => "Transfer-Encoding",
        Vary => "Vary",
        Via => "Via",
        Warning => "Warning",
        WwwAuthenticate => "WWW-Authenticate",
    }
}

/// An order-preserving map from a recognized header name to one value.
///
/// Unlike a general-purpose HTTP header map, each name holds a single value:
/// inserting an existing name replaces its value in place.
///
/// # Examples
///
/// ```
/// use staticd::http::{Headers, ResponseHeader};
///
/// let mut headers = Headers::new();
/// headers.insert(ResponseHeader::ContentType, "text/html");
/// headers.insert(ResponseHeader::ContentType, "text/plain");
///
/// assert_eq!(headers.get(ResponseHeader::ContentType), Some("text/plain"));
/// assert_eq!(headers.len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Headers<N> {
    inner: Vec<(N, String)>,
}

impl<N> Default for Headers<N> {
    fn default() -> Self {
        Self { inner: Vec::new() }
    }
}

impl<N: HeaderName> Headers<N> {
    /// Creates an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `name` to `value`, replacing an existing value in place.
    pub fn insert(&mut self, name: N, value: impl Into<String>) {
        let value = value.into();
        match self.inner.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = value,
            None => self.inner.push((name, value)),
        }
    }

    /// Returns the value for `name`, or `None`.
    pub fn get(&self, name: N) -> Option<&str> {
        self.inner
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Removes `name`. Returns `true` if it was present.
    pub fn remove(&mut self, name: N) -> bool {
        let before = self.inner.len();
        self.inner.retain(|(k, _)| *k != name);
        self.inner.len() < before
    }

    pub fn contains(&self, name: N) -> bool {
        self.inner.iter().any(|(k, _)| *k == name)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns an iterator over all `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (N, &str)> {
        self.inner.iter().map(|(k, v)| (*k, v.as_str()))
    }
}

impl<N: HeaderName> fmt::Display for Headers<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.inner {
            write!(f, "{}: {value}\r\n", name.as_str())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_insensitive_lookup() {
        assert_eq!(
            RequestHeader::from_name("content-type"),
            Some(RequestHeader::ContentType)
        );
        assert_eq!(RequestHeader::from_name("USER-AGENT"), Some(RequestHeader::UserAgent));
        assert_eq!(RequestHeader::from_name("te"), Some(RequestHeader::Te));
        assert_eq!(RequestHeader::from_name("X-Forwarded-For"), None);
    }

    #[test]
    fn wire_names_round_trip() {
        for h in RequestHeader::ALL {
            assert_eq!(RequestHeader::from_name(h.as_str()), Some(*h));
        }
        for h in ResponseHeader::ALL {
            assert_eq!(ResponseHeader::from_name(h.as_str()), Some(*h));
        }
    }

    #[test]
    fn insert_replaces_in_place() {
        let mut h = Headers::new();
        h.insert(ResponseHeader::Server, "a");
        h.insert(ResponseHeader::Date, "b");
        h.insert(ResponseHeader::Server, "c");
        let pairs: Vec<_> = h.iter().collect();
        assert_eq!(pairs, vec![(ResponseHeader::Server, "c"), (ResponseHeader::Date, "b")]);
    }

    #[test]
    fn remove() {
        let mut h = Headers::new();
        h.insert(RequestHeader::Host, "localhost");
        assert!(h.remove(RequestHeader::Host));
        assert!(h.is_empty());
        assert!(!h.remove(RequestHeader::Host)); // already gone
    }

    #[test]
    fn display_uses_wire_format() {
        let mut h = Headers::new();
        h.insert(ResponseHeader::ContentLength, "12");
        h.insert(ResponseHeader::Etag, "\"x\"");
        assert_eq!(h.to_string(), "Content-Length: 12\r\nETag: \"x\"\r\n");
    }
}
