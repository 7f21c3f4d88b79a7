//! Networking for the proxy pipeline: path resolution, HTTP/1.1 and document fetching.

pub mod charset;
pub mod client;
pub mod fetcher;
pub mod http;
pub mod tls;
pub mod url;

pub use client::Http11Client;
pub use client::HttpExchange;
pub use fetcher::DocumentFetcher;
pub use fetcher::FetchedDocument;
pub use fetcher::ProxyFetcher;
pub use fetcher::StaticFetcher;
pub use http::HttpResponse;
pub use tls::TlsSettings;
pub use tls::TrustStoreMode;
pub use url::NotProxiable;
pub use url::ProxyPath;
pub use url::ProxyPathResolver;
pub use url::RequestTarget;
