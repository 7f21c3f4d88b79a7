//! Blocking HTTP/1.1 client: one connection per request, `Connection: close`.

use crate::http::Header;
use crate::http::HttpRequest;
use crate::http::HttpResponse;
use crate::http::HttpStatusCode;
use crate::http::HttpVersion;
use crate::tls::TlsSettings;
use crate::tls::connect_tls;
use crate::url::RequestTarget;
use brotli::Decompressor;
use flate2::read::DeflateDecoder;
use flate2::read::GzDecoder;
use flate2::read::ZlibDecoder;
use fl_core::ProxyError;
use fl_core::ProxyResult;
use std::io::Cursor;
use std::io::Read;
use std::io::Write;
use std::net::SocketAddr;
use std::net::TcpStream;
use std::net::ToSocketAddrs;
use std::time::Duration;
use tracing::debug;

const MAX_RESPONSE_HEAD_BYTES: usize = 128 * 1024;
const MAX_CHUNK_LINE_BYTES: usize = 8 * 1024;
/// Applies to the body as received and again after content decoding.
const MAX_RESPONSE_BODY_BYTES: usize = 16 * 1024 * 1024;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const USER_AGENT: &str = concat!("framelift/", env!("CARGO_PKG_VERSION"));
const ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
const ACCEPT_LANGUAGE: &str = "ta,en-US;q=0.8,en;q=0.6";

/// Byte stream shared by the plain and TLS paths.
pub(crate) trait IoStream: Read + Write + Send {}
impl<T> IoStream for T where T: Read + Write + Send {}

pub(crate) type BoxedIoStream = Box<dyn IoStream>;

/// One GET round trip. The seam the document fetcher is written against.
pub trait HttpExchange: Send + Sync {
    fn get(&self, target: &RequestTarget) -> ProxyResult<HttpResponse>;
}

#[derive(Debug, Clone)]
pub struct Http11Client {
    tls_settings: TlsSettings,
}

impl Http11Client {
    pub fn new(tls_settings: TlsSettings) -> ProxyResult<Self> {
        tls_settings.validate()?;
        Ok(Self { tls_settings })
    }

    pub fn execute(&self, request: &HttpRequest) -> ProxyResult<HttpResponse> {
        let mut stream = self.open_stream(&request.target)?;
        write_request(&mut *stream, request)?;
        read_response(&mut *stream)
    }

    fn open_stream(&self, target: &RequestTarget) -> ProxyResult<BoxedIoStream> {
        let addresses = resolve_addresses(target)?;
        let stream = connect_first_available(&addresses, CONNECT_TIMEOUT)?;

        if target.is_secure() {
            return connect_tls(stream, target.server_name(), &self.tls_settings);
        }

        Ok(Box::new(stream))
    }
}

impl HttpExchange for Http11Client {
    fn get(&self, target: &RequestTarget) -> ProxyResult<HttpResponse> {
        let request = HttpRequest::get(target.clone())?
            .with_header("User-Agent", USER_AGENT)?
            .with_header("Accept", ACCEPT)?
            .with_header("Accept-Language", ACCEPT_LANGUAGE)?
            .with_header("Accept-Encoding", "gzip, deflate, br")?;

        debug!(url = target.as_str(), "http get");
        self.execute(&request)
    }
}

fn resolve_addresses(target: &RequestTarget) -> ProxyResult<Vec<SocketAddr>> {
    let authority = target.authority();
    let addresses = (target.host(), target.port())
        .to_socket_addrs()
        .map_err(|error| {
            ProxyError::network(
                "net.dns.resolve_failed",
                format!("failed to resolve `{authority}`: {error}"),
            )
        })?
        .collect::<Vec<_>>();

    if addresses.is_empty() {
        return Err(ProxyError::network(
            "net.dns.no_results",
            format!("resolver returned no addresses for `{authority}`"),
        ));
    }

    Ok(addresses)
}

fn connect_first_available(addresses: &[SocketAddr], timeout: Duration) -> ProxyResult<TcpStream> {
    let mut last_error: Option<ProxyError> = None;

    for address in addresses {
        match connect(*address, timeout) {
            Ok(stream) => return Ok(stream),
            Err(error) => {
                debug!(%address, code = error.code, "connect attempt failed");
                last_error = Some(error);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        ProxyError::network(
            "net.transport.no_addresses",
            "no addresses available to open a connection",
        )
    }))
}

/// Connects with `timeout` applied to the handshake and to every read and write.
fn connect(address: SocketAddr, timeout: Duration) -> ProxyResult<TcpStream> {
    let stream = TcpStream::connect_timeout(&address, timeout).map_err(|error| {
        ProxyError::network(
            "net.transport.connect_failed",
            format!("failed to connect to `{address}`: {error}"),
        )
    })?;

    let configured = stream
        .set_nodelay(true)
        .and_then(|()| stream.set_read_timeout(Some(timeout)))
        .and_then(|()| stream.set_write_timeout(Some(timeout)));
    configured.map_err(|error| {
        ProxyError::network(
            "net.transport.configure_failed",
            format!("failed to configure socket for `{address}`: {error}"),
        )
    })?;

    Ok(stream)
}

fn write_request(stream: &mut dyn Write, request: &HttpRequest) -> ProxyResult<()> {
    stream.write_all(&request.encode()).map_err(|error| {
        ProxyError::network(
            "net.http.write_failed",
            format!("failed to write HTTP request bytes: {error}"),
        )
    })?;
    stream.flush().map_err(|error| {
        ProxyError::network(
            "net.http.flush_failed",
            format!("failed to flush HTTP request bytes: {error}"),
        )
    })
}

fn read_response(stream: &mut dyn Read) -> ProxyResult<HttpResponse> {
    let mut buffer = Vec::new();
    let mut chunk = [0_u8; 4096];

    let header_end = loop {
        if let Some(end) = find_header_end(&buffer) {
            break end;
        }

        let read = stream.read(&mut chunk).map_err(|error| {
            ProxyError::network(
                "net.http.read_head_failed",
                format!("failed while reading HTTP response head: {error}"),
            )
        })?;

        if read == 0 {
            return Err(ProxyError::network(
                "net.http.unexpected_eof",
                "unexpected EOF before response head completed",
            ));
        }

        buffer.extend_from_slice(&chunk[..read]);
        if buffer.len() > MAX_RESPONSE_HEAD_BYTES {
            return Err(ProxyError::network(
                "net.http.head_too_large",
                format!("HTTP response head exceeds {MAX_RESPONSE_HEAD_BYTES} bytes"),
            ));
        }
    };

    let head_text = String::from_utf8_lossy(&buffer[..header_end]).into_owned();
    let mut body = buffer[header_end..].to_vec();

    let mut lines = head_text.split("\r\n");
    let status_line = lines.next().unwrap_or_default();
    let (version, status) = parse_status_line(status_line)?;

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }

        let (name, value) = line.split_once(':').ok_or_else(|| {
            ProxyError::network(
                "net.http.header_invalid",
                format!("invalid HTTP header line `{line}`"),
            )
        })?;
        headers.push(Header::new(name.trim(), value.trim())?);
    }

    let has_transfer_encoding = headers
        .iter()
        .any(|header| header.name.eq_ignore_ascii_case("transfer-encoding"));
    let chunked = header_contains(&headers, "transfer-encoding", "chunked");
    if has_transfer_encoding && !chunked {
        return Err(ProxyError::network(
            "net.http.transfer_encoding_unsupported",
            "only chunked transfer encoding is supported",
        ));
    }

    if status_disallows_body(status.as_u16()) {
        return Ok(HttpResponse {
            version,
            status,
            headers,
            body: Vec::new(),
        });
    }

    if chunked {
        body = read_chunked_body(stream, body)?;
    } else if let Some(len) = parse_content_length(&headers)? {
        if len > MAX_RESPONSE_BODY_BYTES {
            return Err(body_too_large());
        }
        if body.len() < len {
            let mut rest = vec![0_u8; len - body.len()];
            stream.read_exact(&mut rest).map_err(|error| {
                ProxyError::network(
                    "net.http.read_body_failed",
                    format!("failed to read HTTP body bytes: {error}"),
                )
            })?;
            body.extend_from_slice(&rest);
        } else {
            body.truncate(len);
        }
    } else {
        // Requests always send `Connection: close`, so EOF delimits the body.
        let remaining = (MAX_RESPONSE_BODY_BYTES + 1).saturating_sub(body.len());
        let mut limited = (&mut *stream).take(u64::try_from(remaining).unwrap_or(u64::MAX));
        limited.read_to_end(&mut body).map_err(|error| {
            ProxyError::network(
                "net.http.read_body_failed",
                format!("failed while draining response body: {error}"),
            )
        })?;
        if body.len() > MAX_RESPONSE_BODY_BYTES {
            return Err(body_too_large());
        }
    }

    let body = decode_content_encoding(&headers, &body)?;

    Ok(HttpResponse {
        version,
        status,
        headers,
        body,
    })
}

struct PrefixedStreamReader<'a> {
    prefetched: Vec<u8>,
    offset: usize,
    stream: &'a mut dyn Read,
}

impl<'a> PrefixedStreamReader<'a> {
    fn new(stream: &'a mut dyn Read, prefetched: Vec<u8>) -> Self {
        Self {
            prefetched,
            offset: 0,
            stream,
        }
    }

    fn read_exact_into(&mut self, out: &mut [u8], detail: &str) -> ProxyResult<()> {
        let available = self.prefetched.len().saturating_sub(self.offset);
        let prefix_take = available.min(out.len());

        if prefix_take > 0 {
            out[..prefix_take]
                .copy_from_slice(&self.prefetched[self.offset..self.offset + prefix_take]);
            self.offset += prefix_take;
        }

        if prefix_take < out.len() {
            self.stream
                .read_exact(&mut out[prefix_take..])
                .map_err(|error| {
                    ProxyError::network("net.http.read_body_failed", format!("{detail}: {error}"))
                })?;
        }

        Ok(())
    }
}

fn read_chunked_body(stream: &mut dyn Read, prefetched: Vec<u8>) -> ProxyResult<Vec<u8>> {
    let mut reader = PrefixedStreamReader::new(stream, prefetched);
    let mut decoded = Vec::new();

    loop {
        let size_line = read_crlf_line(&mut reader)?;
        if size_line.is_empty() {
            continue;
        }

        let size_token = size_line.split(';').next().unwrap_or_default().trim();
        let chunk_size = usize::from_str_radix(size_token, 16).map_err(|error| {
            ProxyError::network(
                "net.http.chunk_size_invalid",
                format!("invalid chunk size `{size_token}`: {error}"),
            )
        })?;

        if chunk_size == 0 {
            // Trailers are irrelevant for documents; stop at the terminal chunk.
            break;
        }

        let start = decoded.len();
        let end = start
            .checked_add(chunk_size)
            .filter(|end| *end <= MAX_RESPONSE_BODY_BYTES)
            .ok_or_else(body_too_large)?;
        decoded.resize(end, 0);
        reader.read_exact_into(
            &mut decoded[start..],
            "failed while reading chunked HTTP body bytes",
        )?;

        let mut terminator = [0_u8; 2];
        reader.read_exact_into(&mut terminator, "failed while reading chunk terminator")?;
        if terminator != *b"\r\n" {
            return Err(ProxyError::network(
                "net.http.chunk_terminator_invalid",
                "chunk data is missing trailing CRLF",
            ));
        }
    }

    Ok(decoded)
}

fn read_crlf_line(reader: &mut PrefixedStreamReader<'_>) -> ProxyResult<String> {
    let mut line = Vec::new();

    loop {
        let mut byte = [0_u8; 1];
        reader.read_exact_into(&mut byte, "failed while reading chunked transfer line")?;
        line.push(byte[0]);

        if line.len() > MAX_CHUNK_LINE_BYTES {
            return Err(ProxyError::network(
                "net.http.chunk_line_too_large",
                format!("chunk metadata line exceeds {MAX_CHUNK_LINE_BYTES} bytes"),
            ));
        }

        if line.ends_with(b"\r\n") {
            line.truncate(line.len() - 2);
            return Ok(String::from_utf8_lossy(&line).into_owned());
        }
    }
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|idx| idx + 4)
}

fn parse_status_line(line: &str) -> ProxyResult<(HttpVersion, HttpStatusCode)> {
    let mut parts = line.splitn(3, ' ');
    let version = match parts.next().unwrap_or_default() {
        "HTTP/1.0" => HttpVersion::Http10,
        "HTTP/1.1" => HttpVersion::Http11,
        other => {
            return Err(ProxyError::network(
                "net.http.version_unsupported",
                format!("unsupported response version `{other}`"),
            ));
        }
    };

    let code_text = parts.next().unwrap_or_default();
    let code_value = code_text.parse::<u16>().map_err(|error| {
        ProxyError::network(
            "net.http.status_line_invalid",
            format!("invalid status code `{code_text}`: {error}"),
        )
    })?;

    Ok((version, HttpStatusCode::new(code_value)?))
}

fn parse_content_length(headers: &[Header]) -> ProxyResult<Option<usize>> {
    let mut value: Option<usize> = None;
    for header in headers {
        if !header.name.eq_ignore_ascii_case("content-length") {
            continue;
        }

        let parsed = header.value.trim().parse::<usize>().map_err(|error| {
            ProxyError::network(
                "net.http.content_length_invalid",
                format!("invalid Content-Length `{}`: {error}", header.value),
            )
        })?;

        match value {
            Some(existing) if existing != parsed => {
                return Err(ProxyError::network(
                    "net.http.content_length_conflict",
                    "conflicting Content-Length headers in response",
                ));
            }
            _ => value = Some(parsed),
        }
    }

    Ok(value)
}

fn status_disallows_body(status_code: u16) -> bool {
    (100..200).contains(&status_code) || status_code == 204 || status_code == 304
}

fn header_contains(headers: &[Header], name: &str, value: &str) -> bool {
    headers.iter().any(|header| {
        header.name.eq_ignore_ascii_case(name)
            && header
                .value
                .split(',')
                .any(|token| token.trim().eq_ignore_ascii_case(value))
    })
}

fn decode_content_encoding(headers: &[Header], body: &[u8]) -> ProxyResult<Vec<u8>> {
    let encodings = headers
        .iter()
        .filter(|header| header.name.eq_ignore_ascii_case("content-encoding"))
        .flat_map(|header| header.value.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
        .collect::<Vec<_>>();

    let mut decoded = body.to_vec();
    for encoding in encodings.iter().rev() {
        decoded = match encoding.as_str() {
            "identity" => decoded,
            "gzip" | "x-gzip" => read_all(GzDecoder::new(Cursor::new(&decoded)), "gzip")?,
            "deflate" => match read_all(ZlibDecoder::new(Cursor::new(&decoded)), "deflate") {
                Ok(value) => value,
                Err(_) => read_all(DeflateDecoder::new(Cursor::new(&decoded)), "deflate")?,
            },
            "br" => read_all(Decompressor::new(Cursor::new(&decoded), 4096), "brotli")?,
            _ => {
                return Err(ProxyError::network(
                    "net.http.content_encoding_unsupported",
                    format!("unsupported content encoding `{encoding}`"),
                ));
            }
        };
    }

    Ok(decoded)
}

fn read_all<D: Read>(decoder: D, label: &str) -> ProxyResult<Vec<u8>> {
    let limit = u64::try_from(MAX_RESPONSE_BODY_BYTES + 1).unwrap_or(u64::MAX);
    let mut decoded = Vec::new();
    decoder
        .take(limit)
        .read_to_end(&mut decoded)
        .map_err(|error| {
            ProxyError::network(
                "net.http.decode_failed",
                format!("{label} decode failed: {error}"),
            )
        })?;
    if decoded.len() > MAX_RESPONSE_BODY_BYTES {
        return Err(body_too_large());
    }
    Ok(decoded)
}

fn body_too_large() -> ProxyError {
    ProxyError::network(
        "net.http.body_too_large",
        format!("HTTP response body exceeds {MAX_RESPONSE_BODY_BYTES} bytes"),
    )
}
