//! Document Fetcher: one logical fetch of an upstream document, through the proxy.

use crate::client::Http11Client;
use crate::client::HttpExchange;
use crate::charset::decode_text_response;
use crate::tls::TlsSettings;
use crate::url::ProxyPathResolver;
use crate::url::RequestTarget;
use fl_core::CrossOriginPolicy;
use fl_core::ProxyConfig;
use fl_core::ProxyError;
use fl_core::ProxyResult;
use std::collections::HashMap;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Markup fetched for an upstream URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedDocument {
    /// Upstream URL the markup was finally served from, after redirects.
    pub final_url: Url,
    pub content_type: Option<String>,
    pub markup: String,
}

/// Fetches upstream documents. Implementations never retry.
pub trait DocumentFetcher: Send + Sync {
    fn fetch(&self, url: &Url) -> ProxyResult<FetchedDocument>;
}

/// Fetches through the reverse-proxy route, following redirects.
pub struct ProxyFetcher<H = Http11Client>
where
    H: HttpExchange,
{
    resolver: ProxyPathResolver,
    proxy_origin: Url,
    cross_origin: CrossOriginPolicy,
    max_redirects: usize,
    http: H,
}

impl ProxyFetcher {
    pub fn new(config: &ProxyConfig) -> ProxyResult<Self> {
        Self::with_exchange(config, Http11Client::new(TlsSettings::default())?)
    }
}

impl<H> ProxyFetcher<H>
where
    H: HttpExchange,
{
    pub fn with_exchange(config: &ProxyConfig, http: H) -> ProxyResult<Self> {
        config.validate()?;
        let proxy_origin = Url::parse(&config.proxy_origin).map_err(|error| {
            ProxyError::config(
                "config.proxy_origin_invalid",
                format!("failed to parse proxy origin `{}`: {error}", config.proxy_origin),
            )
        })?;

        Ok(Self {
            resolver: ProxyPathResolver::from_config(config),
            proxy_origin,
            cross_origin: config.cross_origin,
            max_redirects: config.max_redirects,
            http,
        })
    }

    pub fn resolver(&self) -> &ProxyPathResolver {
        &self.resolver
    }

    /// Where a request for `url` actually goes on the wire.
    pub fn request_target_for(&self, url: &Url) -> ProxyResult<RequestTarget> {
        match self.resolver.resolve(url) {
            Ok(path) => {
                let mut proxied = self.proxy_origin.clone();
                let (path, query) = match path.as_str().split_once('?') {
                    Some((path, query)) => (path, Some(query)),
                    None => (path.as_str(), None),
                };
                proxied.set_path(path);
                proxied.set_query(query);
                RequestTarget::from_url(&proxied)
            }
            Err(not_proxiable) => match self.cross_origin {
                CrossOriginPolicy::Direct => {
                    debug!(source_url = %url, phase = "fetch", "not proxiable, fetching directly");
                    RequestTarget::from_url(url)
                }
                CrossOriginPolicy::Refuse => Err(ProxyError::network(
                    "fetch.not_proxiable",
                    not_proxiable.to_string(),
                )),
            },
        }
    }

    fn follow_location(
        &self,
        current: &Url,
        requested: &RequestTarget,
        location: &str,
    ) -> ProxyResult<Url> {
        let invalid = |error: url::ParseError| {
            ProxyError::network(
                "fetch.redirect_location_invalid",
                format!("cannot resolve redirect `{location}` from `{current}`: {error}"),
            )
        };

        if let Ok(absolute) = Url::parse(location) {
            return Ok(self.unproxy(&absolute).unwrap_or(absolute));
        }

        let joined = requested.url().join(location).map_err(invalid)?;
        match self.unproxy(&joined) {
            Some(upstream) => Ok(upstream),
            // Root-relative Locations written by the upstream itself.
            None => current.join(location).map_err(invalid),
        }
    }

    fn unproxy(&self, url: &Url) -> Option<Url> {
        if url.origin() != self.proxy_origin.origin() {
            return None;
        }

        let mut path_and_query = url.path().to_owned();
        if let Some(query) = url.query() {
            path_and_query.push('?');
            path_and_query.push_str(query);
        }
        self.resolver.upstream_url_for_path(&path_and_query)
    }
}

impl<H> DocumentFetcher for ProxyFetcher<H>
where
    H: HttpExchange,
{
    fn fetch(&self, url: &Url) -> ProxyResult<FetchedDocument> {
        let mut current = url.clone();
        current.set_fragment(None);

        for hop in 0..=self.max_redirects {
            let target = self.request_target_for(&current)?;
            let response = self.http.get(&target)?;

            if response.status.is_redirect() {
                let location = response.header("location").ok_or_else(|| {
                    ProxyError::network(
                        "fetch.redirect_location_missing",
                        format!(
                            "`{current}` answered {} without a Location",
                            response.status.as_u16()
                        ),
                    )
                })?;
                let next = self.follow_location(&current, &target, location)?;
                debug!(
                    source_url = %current,
                    location = %next,
                    hop,
                    phase = "fetch",
                    "following redirect"
                );
                current = next;
                current.set_fragment(None);
                continue;
            }

            if !response.status.is_success() {
                return Err(ProxyError::network(
                    "fetch.status",
                    format!(
                        "`{current}` answered with status {}",
                        response.status.as_u16()
                    ),
                ));
            }

            let content_type = response.content_type().map(str::to_owned);
            let markup = decode_text_response(content_type.as_deref(), &response.body);
            return Ok(FetchedDocument {
                final_url: current,
                content_type,
                markup,
            });
        }

        Err(ProxyError::network(
            "fetch.redirect_limit",
            format!(
                "`{url}` redirected more than {} times",
                self.max_redirects
            ),
        ))
    }
}

#[derive(Debug, Clone)]
enum StaticResponse {
    Page(String),
    Status(u16),
    Redirect(String),
}

#[derive(Debug, Clone)]
struct StaticRoute {
    response: StaticResponse,
    delay: Option<Duration>,
}

/// In-memory fetcher keyed by absolute URL; records every fetch it serves.
///
/// Unknown URLs answer 404. Redirects are followed up to five hops.
#[derive(Debug, Default)]
pub struct StaticFetcher {
    routes: Mutex<HashMap<String, StaticRoute>>,
    requests: Mutex<Vec<String>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, url: &str, markup: &str) -> Self {
        self.insert(url, StaticResponse::Page(markup.to_owned()));
        self
    }

    pub fn with_status(self, url: &str, status: u16) -> Self {
        self.insert(url, StaticResponse::Status(status));
        self
    }

    pub fn with_redirect(self, from: &str, to: &str) -> Self {
        self.insert(from, StaticResponse::Redirect(to.to_owned()));
        self
    }

    /// Delays every fetch of `url`; the URL must already be routed.
    pub fn with_delay(self, url: &str, delay: Duration) -> Self {
        let key = normalize(url);
        let mut routes = lock(&self.routes);
        if let Some(route) = routes.get_mut(&key) {
            route.delay = Some(delay);
        }
        drop(routes);
        self
    }

    /// Replaces (or adds) a page after construction.
    pub fn insert_page(&self, url: &str, markup: &str) {
        self.insert(url, StaticResponse::Page(markup.to_owned()));
    }

    pub fn requests(&self) -> Vec<String> {
        lock(&self.requests).clone()
    }

    pub fn request_count(&self, url: &str) -> usize {
        let key = normalize(url);
        lock(&self.requests)
            .iter()
            .filter(|requested| **requested == key)
            .count()
    }

    fn insert(&self, url: &str, response: StaticResponse) {
        lock(&self.routes).insert(
            normalize(url),
            StaticRoute {
                response,
                delay: None,
            },
        );
    }
}

impl DocumentFetcher for StaticFetcher {
    fn fetch(&self, url: &Url) -> ProxyResult<FetchedDocument> {
        let mut current = url.clone();
        current.set_fragment(None);

        for _ in 0..=5 {
            let key = current.as_str().to_owned();
            lock(&self.requests).push(key.clone());
            let route = lock(&self.routes).get(&key).cloned();

            let Some(route) = route else {
                return Err(ProxyError::network(
                    "fetch.status",
                    format!("`{current}` answered with status 404"),
                ));
            };

            if let Some(delay) = route.delay {
                thread::sleep(delay);
            }

            match route.response {
                StaticResponse::Page(markup) => {
                    return Ok(FetchedDocument {
                        final_url: current,
                        content_type: Some("text/html".to_owned()),
                        markup,
                    });
                }
                StaticResponse::Status(status) => {
                    return Err(ProxyError::network(
                        "fetch.status",
                        format!("`{current}` answered with status {status}"),
                    ));
                }
                StaticResponse::Redirect(to) => {
                    current = current.join(&to).map_err(|error| {
                        ProxyError::network(
                            "fetch.redirect_location_invalid",
                            format!("cannot resolve redirect `{to}`: {error}"),
                        )
                    })?;
                    current.set_fragment(None);
                }
            }
        }

        Err(ProxyError::network(
            "fetch.redirect_limit",
            format!("`{url}` redirected too many times"),
        ))
    }
}

fn normalize(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.into()
        }
        Err(_) => url.to_owned(),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
