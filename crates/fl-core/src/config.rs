//! Proxy configuration with environment overrides.

use crate::ProxyError;
use crate::ProxyResult;
use tracing::warn;
use url::Url;

const ENV_UPSTREAM_SCHEME: &str = "FRAMELIFT_UPSTREAM_SCHEME";
const ENV_UPSTREAM_HOST: &str = "FRAMELIFT_UPSTREAM_HOST";
const ENV_PROXY_ORIGIN: &str = "FRAMELIFT_PROXY_ORIGIN";
const ENV_PROXY_PREFIX: &str = "FRAMELIFT_PROXY_PREFIX";
const ENV_MAX_FRAME_DEPTH: &str = "FRAMELIFT_MAX_FRAME_DEPTH";
const ENV_MAX_REDIRECTS: &str = "FRAMELIFT_MAX_REDIRECTS";
const ENV_HANDLE_SCHEME: &str = "FRAMELIFT_HANDLE_SCHEME";
const ENV_CROSS_ORIGIN: &str = "FRAMELIFT_CROSS_ORIGIN";
const ENV_VERIFY_AGENT: &str = "FRAMELIFT_VERIFY_AGENT";

/// What to do with a URL whose host is not the upstream host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossOriginPolicy {
    /// Fetch the URL directly, bypassing the proxy.
    Direct,
    /// Fail the fetch with `fetch.not_proxiable`.
    Refuse,
}

impl CrossOriginPolicy {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "direct" => Some(Self::Direct),
            "refuse" => Some(Self::Refuse),
            _ => None,
        }
    }
}

/// Runtime configuration for the proxy pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub upstream_scheme: String,
    pub upstream_host: String,
    /// Origin that serves the reverse-proxy route, e.g. `http://127.0.0.1:3000`.
    pub proxy_origin: String,
    /// Path prefix of the reverse-proxy route, always starting with `/`.
    pub proxy_prefix: String,
    pub max_frame_depth: usize,
    pub max_redirects: usize,
    /// Scheme used for published content handles (`<scheme>://content/<id>`).
    pub handle_scheme: String,
    pub cross_origin: CrossOriginPolicy,
    pub verify_agent_payload: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            upstream_scheme: "https".to_owned(),
            upstream_host: "www.bibleintamil.com".to_owned(),
            proxy_origin: "http://127.0.0.1:3000".to_owned(),
            proxy_prefix: "/api/proxy".to_owned(),
            max_frame_depth: 4,
            max_redirects: 5,
            handle_scheme: "framelift".to_owned(),
            cross_origin: CrossOriginPolicy::Direct,
            verify_agent_payload: true,
        }
    }
}

impl ProxyConfig {
    /// Defaults overridden by `FRAMELIFT_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each `FRAMELIFT_*` key.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = non_empty(lookup(ENV_UPSTREAM_SCHEME)) {
            config.upstream_scheme = value.to_ascii_lowercase();
        }
        if let Some(value) = non_empty(lookup(ENV_UPSTREAM_HOST)) {
            config.upstream_host = value.to_ascii_lowercase();
        }
        if let Some(value) = non_empty(lookup(ENV_PROXY_ORIGIN)) {
            config.proxy_origin = value;
        }
        if let Some(value) = non_empty(lookup(ENV_PROXY_PREFIX)) {
            config.proxy_prefix = value;
        }
        if let Some(value) = non_empty(lookup(ENV_HANDLE_SCHEME)) {
            config.handle_scheme = value.to_ascii_lowercase();
        }

        if let Some(value) = non_empty(lookup(ENV_MAX_FRAME_DEPTH)) {
            match value.parse::<usize>() {
                Ok(depth) => config.max_frame_depth = depth,
                Err(_) => warn!(key = ENV_MAX_FRAME_DEPTH, %value, "ignoring invalid override"),
            }
        }
        if let Some(value) = non_empty(lookup(ENV_MAX_REDIRECTS)) {
            match value.parse::<usize>() {
                Ok(limit) => config.max_redirects = limit,
                Err(_) => warn!(key = ENV_MAX_REDIRECTS, %value, "ignoring invalid override"),
            }
        }
        if let Some(value) = non_empty(lookup(ENV_CROSS_ORIGIN)) {
            match CrossOriginPolicy::parse(&value) {
                Some(policy) => config.cross_origin = policy,
                None => warn!(key = ENV_CROSS_ORIGIN, %value, "ignoring invalid override"),
            }
        }
        if let Some(value) = non_empty(lookup(ENV_VERIFY_AGENT)) {
            match parse_flag(&value) {
                Some(flag) => config.verify_agent_payload = flag,
                None => warn!(key = ENV_VERIFY_AGENT, %value, "ignoring invalid override"),
            }
        }

        config
    }

    pub fn validate(&self) -> ProxyResult<()> {
        if !matches!(self.upstream_scheme.as_str(), "http" | "https") {
            return Err(ProxyError::config(
                "config.upstream_scheme_invalid",
                format!(
                    "upstream scheme must be http or https, got `{}`",
                    self.upstream_scheme
                ),
            ));
        }

        if self.upstream_host.trim().is_empty() {
            return Err(ProxyError::config(
                "config.upstream_host_missing",
                "upstream host must not be empty",
            ));
        }

        if !self.proxy_prefix.starts_with('/') {
            return Err(ProxyError::config(
                "config.proxy_prefix_invalid",
                format!(
                    "proxy prefix must start with `/`, got `{}`",
                    self.proxy_prefix
                ),
            ));
        }

        let origin = Url::parse(&self.proxy_origin).map_err(|error| {
            ProxyError::config(
                "config.proxy_origin_invalid",
                format!("failed to parse proxy origin `{}`: {error}", self.proxy_origin),
            )
        })?;
        if !matches!(origin.scheme(), "http" | "https") || origin.host_str().is_none() {
            return Err(ProxyError::config(
                "config.proxy_origin_invalid",
                format!("proxy origin `{}` must be an http(s) origin", self.proxy_origin),
            ));
        }

        if self.max_frame_depth == 0 {
            return Err(ProxyError::config(
                "config.frame_depth_zero",
                "max frame depth must be at least 1",
            ));
        }

        if self.handle_scheme.is_empty()
            || !self
                .handle_scheme
                .bytes()
                .all(|byte| byte.is_ascii_alphanumeric() || matches!(byte, b'+' | b'-' | b'.'))
        {
            return Err(ProxyError::config(
                "config.handle_scheme_invalid",
                format!("invalid handle scheme `{}`", self.handle_scheme),
            ));
        }

        Ok(())
    }

    /// `<scheme>://<host>` of the upstream site.
    pub fn upstream_origin(&self) -> String {
        format!("{}://{}", self.upstream_scheme, self.upstream_host)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|raw| raw.trim().to_owned())
        .filter(|trimmed| !trimmed.is_empty())
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
