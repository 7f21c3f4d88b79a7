//! HTTP/1.1 message types.

use crate::url::RequestTarget;
use fl_core::ProxyError;
use fl_core::ProxyResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    Http10,
    Http11,
}

impl HttpVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http10 => "HTTP/1.0",
            Self::Http11 => "HTTP/1.1",
        }
    }
}

/// Single HTTP header with validated wire-safe name/value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: &str, value: &str) -> ProxyResult<Self> {
        if name.is_empty() || !name.bytes().all(is_token_char) {
            return Err(ProxyError::network(
                "net.http.header_name_invalid",
                format!("invalid HTTP header name `{name}`"),
            ));
        }

        if value.bytes().any(|byte| matches!(byte, b'\r' | b'\n' | 0)) {
            return Err(ProxyError::network(
                "net.http.header_value_invalid",
                format!("invalid characters found in HTTP header `{name}`"),
            ));
        }

        Ok(Self {
            name: name.to_owned(),
            value: value.to_owned(),
        })
    }
}

/// Outgoing GET request; documents are the only thing fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub target: RequestTarget,
    pub headers: Vec<Header>,
}

impl HttpRequest {
    /// GET with a `Host` header and `Connection: close`.
    pub fn get(target: RequestTarget) -> ProxyResult<Self> {
        let host = Header::new("Host", &target.authority())?;
        Ok(Self {
            target,
            headers: vec![host, Header::new("Connection", "close")?],
        })
    }

    pub fn with_header(mut self, name: &str, value: &str) -> ProxyResult<Self> {
        if header_value(&self.headers, name).is_some() {
            return Err(ProxyError::network(
                "net.http.duplicate_header",
                format!("header `{name}` must appear at most once"),
            ));
        }

        self.headers.push(Header::new(name, value)?);
        Ok(self)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoded = Vec::new();
        encoded.extend_from_slice(b"GET ");
        encoded.extend_from_slice(self.target.path_and_query().as_bytes());
        encoded.push(b' ');
        encoded.extend_from_slice(HttpVersion::Http11.as_str().as_bytes());
        encoded.extend_from_slice(b"\r\n");

        for header in &self.headers {
            encoded.extend_from_slice(header.name.as_bytes());
            encoded.extend_from_slice(b": ");
            encoded.extend_from_slice(header.value.as_bytes());
            encoded.extend_from_slice(b"\r\n");
        }
        encoded.extend_from_slice(b"\r\n");
        encoded
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct HttpStatusCode(u16);

impl HttpStatusCode {
    pub fn new(code: u16) -> ProxyResult<Self> {
        if (100..=599).contains(&code) {
            return Ok(Self(code));
        }

        Err(ProxyError::network(
            "net.http.status_invalid",
            format!("status code must be 100-599, got `{code}`"),
        ))
    }

    pub fn as_u16(self) -> u16 {
        self.0
    }

    pub fn is_success(self) -> bool {
        (200..=299).contains(&self.0)
    }

    pub fn is_redirect(self) -> bool {
        matches!(self.0, 301 | 302 | 303 | 307 | 308)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub version: HttpVersion,
    pub status: HttpStatusCode,
    pub headers: Vec<Header>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }
}

fn header_value<'a>(headers: &'a [Header], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|header| header.name.eq_ignore_ascii_case(name))
        .map(|header| header.value.as_str())
}

fn is_token_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric()
        || matches!(
            byte,
            b'!' | b'#'
                | b'$'
                | b'%'
                | b'&'
                | b'\''
                | b'*'
                | b'+'
                | b'-'
                | b'.'
                | b'^'
                | b'_'
                | b'`'
                | b'|'
                | b'~'
        )
}

#[cfg(test)]
mod tests {
    use super::Header;
    use super::HttpRequest;
    use super::HttpStatusCode;
    use crate::url::RequestTarget;

    fn target(input: &str) -> RequestTarget {
        match RequestTarget::parse(input) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        }
    }

    #[test]
    fn get_request_encodes_host_and_target() {
        let request = HttpRequest::get(target("http://127.0.0.1:3000/api/proxy/a.htm?x=1"))
            .and_then(|request| request.with_header("Accept", "text/html"));
        assert!(request.is_ok());
        let request = match request {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };

        let encoded = String::from_utf8_lossy(&request.encode()).into_owned();
        assert!(encoded.starts_with("GET /api/proxy/a.htm?x=1 HTTP/1.1\r\n"));
        assert!(encoded.contains("Host: 127.0.0.1:3000\r\n"));
        assert!(encoded.contains("Connection: close\r\n"));
        assert!(encoded.ends_with("Accept: text/html\r\n\r\n"));
    }

    #[test]
    fn duplicate_headers_are_rejected() {
        let request =
            HttpRequest::get(target("https://upstream.example/")).and_then(|r| r.with_header("host", "x"));
        assert!(request.is_err());
    }

    #[test]
    fn header_values_cannot_smuggle_lines() {
        assert!(Header::new("X-Test", "a\r\nInjected: 1").is_err());
        assert!(Header::new("Bad Name", "a").is_err());
    }

    #[test]
    fn status_classes() {
        assert!(HttpStatusCode::new(99).is_err());
        assert!(HttpStatusCode::new(600).is_err());
        assert!(matches!(HttpStatusCode::new(302), Ok(code) if code.is_redirect()));
        assert!(matches!(HttpStatusCode::new(304), Ok(code) if !code.is_redirect()));
        assert!(matches!(HttpStatusCode::new(204), Ok(code) if code.is_success()));
    }
}
