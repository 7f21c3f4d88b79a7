//! Proxy path resolution and wire-level URL validation.

use fl_core::ProxyConfig;
use fl_core::ProxyError;
use fl_core::ProxyResult;
use std::fmt;
use url::Url;

/// Local path under the reverse-proxy prefix, e.g. `/api/proxy/dir/page.htm?x=1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyPath(String);

impl ProxyPath {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProxyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The URL's host is not the upstream host; the caller picks direct fetch or refusal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotProxiable {
    pub url: Url,
}

impl fmt::Display for NotProxiable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}` is not served by the upstream host", self.url)
    }
}

impl std::error::Error for NotProxiable {}

/// Maps absolute upstream URLs to proxy paths and back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyPathResolver {
    upstream_scheme: String,
    upstream_host: String,
    prefix: String,
}

impl ProxyPathResolver {
    pub fn new(upstream_scheme: &str, upstream_host: &str, prefix: &str) -> Self {
        Self {
            upstream_scheme: upstream_scheme.to_ascii_lowercase(),
            upstream_host: upstream_host.to_ascii_lowercase(),
            prefix: prefix.trim_end_matches('/').to_owned(),
        }
    }

    pub fn from_config(config: &ProxyConfig) -> Self {
        Self::new(
            &config.upstream_scheme,
            &config.upstream_host,
            &config.proxy_prefix,
        )
    }

    pub fn upstream_host(&self) -> &str {
        &self.upstream_host
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn is_upstream(&self, url: &Url) -> bool {
        matches!(url.scheme(), "http" | "https")
            && url
                .host_str()
                .is_some_and(|host| host.eq_ignore_ascii_case(&self.upstream_host))
    }

    /// `<prefix>/<path without its leading slash>[?query]`. The fragment is dropped.
    pub fn resolve(&self, url: &Url) -> Result<ProxyPath, NotProxiable> {
        if !self.is_upstream(url) {
            return Err(NotProxiable { url: url.clone() });
        }

        let path = url.path();
        let path = path.strip_prefix('/').unwrap_or(path);
        let mut proxied = format!("{}/{path}", self.prefix);
        if let Some(query) = url.query() {
            proxied.push('?');
            proxied.push_str(query);
        }

        Ok(ProxyPath(proxied))
    }

    /// Inverse of [`resolve`](Self::resolve) for paths under the prefix.
    pub fn upstream_url(&self, path: &ProxyPath) -> ProxyResult<Url> {
        self.upstream_url_for_path(path.as_str()).ok_or_else(|| {
            ProxyError::resolution(
                "resolve.outside_prefix",
                format!("`{path}` is not under proxy prefix `{}`", self.prefix),
            )
        })
    }

    /// Maps a raw `path[?query]` under the prefix back to its upstream URL.
    pub fn upstream_url_for_path(&self, path_and_query: &str) -> Option<Url> {
        let rest = path_and_query.strip_prefix(&self.prefix)?;
        let rest = rest.strip_prefix('/')?;
        Url::parse(&format!(
            "{}://{}/{rest}",
            self.upstream_scheme, self.upstream_host
        ))
        .ok()
    }
}

/// Validated absolute http(s) URL ready to be put on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTarget {
    parsed: Url,
    secure: bool,
    host: String,
    port: u16,
}

impl RequestTarget {
    pub fn parse(input: &str) -> ProxyResult<Self> {
        let parsed = Url::parse(input).map_err(|error| {
            ProxyError::resolution(
                "net.url.invalid",
                format!("failed to parse URL `{input}`: {error}"),
            )
        })?;
        Self::from_url(&parsed)
    }

    pub fn from_url(url: &Url) -> ProxyResult<Self> {
        let mut parsed = url.clone();

        if !parsed.username().is_empty() || parsed.password().is_some() {
            return Err(ProxyError::resolution(
                "net.url.credentials_disallowed",
                "URL userinfo (`username:password@`) is not allowed",
            ));
        }

        let secure = match parsed.scheme() {
            "http" => false,
            "https" => true,
            other => {
                return Err(ProxyError::resolution(
                    "net.url.scheme_unsupported",
                    format!("unsupported scheme `{other}`"),
                ));
            }
        };

        let host = parsed
            .host_str()
            .ok_or_else(|| ProxyError::resolution("net.url.host_missing", "URL must include a host"))?
            .to_ascii_lowercase();

        let port = parsed.port_or_known_default().ok_or_else(|| {
            ProxyError::resolution(
                "net.url.port_missing",
                "unable to determine effective port for URL",
            )
        })?;

        // Fragments are client-side only and never sent on the wire.
        parsed.set_fragment(None);

        Ok(Self {
            parsed,
            secure,
            host,
            port,
        })
    }

    pub fn url(&self) -> &Url {
        &self.parsed
    }

    pub fn as_str(&self) -> &str {
        self.parsed.as_str()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Host without IPv6 brackets, as expected by TLS server names.
    pub fn server_name(&self) -> &str {
        self.host.trim_start_matches('[').trim_end_matches(']')
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn authority(&self) -> String {
        let default_port = if self.secure { 443 } else { 80 };
        if self.port == default_port {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn path_and_query(&self) -> String {
        let path = if self.parsed.path().is_empty() {
            "/"
        } else {
            self.parsed.path()
        };

        match self.parsed.query() {
            Some(query) => format!("{path}?{query}"),
            None => path.to_owned(),
        }
    }
}
