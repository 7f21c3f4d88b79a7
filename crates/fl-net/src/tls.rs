//! TLS settings and the rustls connector.

use crate::client::BoxedIoStream;
use fl_core::ProxyError;
use fl_core::ProxyResult;
use std::net::TcpStream;

#[cfg(feature = "tls-rustls")]
use rustls::RootCertStore;
#[cfg(feature = "tls-rustls")]
use rustls::SupportedProtocolVersion;
#[cfg(feature = "tls-rustls")]
use rustls::pki_types::ServerName;
#[cfg(feature = "tls-rustls")]
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    V1_2,
    V1_3,
}

/// Which trust anchors verify server certificates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustStoreMode {
    /// Embedded Mozilla/WebPKI roots only.
    WebPkiOnly,
    /// WebPKI roots merged with operating-system roots.
    WebPkiAndOs,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsSettings {
    pub minimum_version: TlsVersion,
    pub maximum_version: TlsVersion,
    pub trust_store_mode: TrustStoreMode,
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            minimum_version: TlsVersion::V1_2,
            maximum_version: TlsVersion::V1_3,
            trust_store_mode: TrustStoreMode::WebPkiOnly,
        }
    }
}

impl TlsSettings {
    pub fn with_trust_store_mode(mut self, mode: TrustStoreMode) -> Self {
        self.trust_store_mode = mode;
        self
    }

    pub fn validate(&self) -> ProxyResult<()> {
        if self.minimum_version > self.maximum_version {
            return Err(ProxyError::config(
                "net.tls.invalid_version_range",
                "minimum TLS version cannot be greater than maximum version",
            ));
        }

        Ok(())
    }
}

/// Upgrades a connected TCP stream to TLS for `server_name`.
#[cfg(feature = "tls-rustls")]
pub(crate) fn connect_tls(
    mut stream: TcpStream,
    server_name: &str,
    settings: &TlsSettings,
) -> ProxyResult<BoxedIoStream> {
    use rustls::ClientConfig;
    use rustls::ClientConnection;
    use rustls::StreamOwned;

    let versions = supported_versions(settings.minimum_version, settings.maximum_version)?;
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let roots = root_store(settings.trust_store_mode)?;

    let mut config = ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(&versions)
        .map_err(|error| {
            ProxyError::network(
                "net.tls.config_versions_invalid",
                format!("failed to configure TLS protocol versions: {error}"),
            )
        })?
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    let name = ServerName::try_from(server_name.to_owned()).map_err(|error| {
        ProxyError::network(
            "net.tls.server_name_invalid",
            format!("invalid TLS server name `{server_name}`: {error}"),
        )
    })?;

    let mut connection = ClientConnection::new(Arc::new(config), name).map_err(|error| {
        ProxyError::network(
            "net.tls.connection_init_failed",
            format!("failed to initialize TLS connection for `{server_name}`: {error}"),
        )
    })?;

    connection.complete_io(&mut stream).map_err(|error| {
        ProxyError::network(
            "net.tls.handshake_failed",
            format!("TLS handshake failed for `{server_name}`: {error}"),
        )
    })?;

    Ok(Box::new(StreamOwned::new(connection, stream)))
}

#[cfg(not(feature = "tls-rustls"))]
pub(crate) fn connect_tls(
    _stream: TcpStream,
    server_name: &str,
    _settings: &TlsSettings,
) -> ProxyResult<BoxedIoStream> {
    Err(ProxyError::network(
        "net.tls.backend_unavailable",
        format!("cannot reach `{server_name}`: rustls backend is disabled; enable `fl-net/tls-rustls`"),
    ))
}

#[cfg(feature = "tls-rustls")]
fn root_store(mode: TrustStoreMode) -> ProxyResult<RootCertStore> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if matches!(mode, TrustStoreMode::WebPkiAndOs) {
        let native = rustls_native_certs::load_native_certs();
        if native.certs.is_empty() && !native.errors.is_empty() {
            let details = native
                .errors
                .iter()
                .map(std::string::ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ProxyError::network(
                "net.tls.os_roots_load_failed",
                format!("failed to load operating-system roots: {details}"),
            ));
        }

        let (added, ignored) = roots.add_parsable_certificates(native.certs);
        tracing::debug!(added, ignored, "merged operating-system trust anchors");
    }

    if roots.is_empty() {
        return Err(ProxyError::network(
            "net.tls.root_store_empty",
            "no trust anchors available for TLS verification",
        ));
    }

    Ok(roots)
}

#[cfg(feature = "tls-rustls")]
fn supported_versions(
    minimum: TlsVersion,
    maximum: TlsVersion,
) -> ProxyResult<Vec<&'static SupportedProtocolVersion>> {
    let versions = [TlsVersion::V1_3, TlsVersion::V1_2]
        .into_iter()
        .filter(|version| *version >= minimum && *version <= maximum)
        .map(|version| match version {
            TlsVersion::V1_2 => &rustls::version::TLS12,
            TlsVersion::V1_3 => &rustls::version::TLS13,
        })
        .collect::<Vec<_>>();

    if versions.is_empty() {
        return Err(ProxyError::network(
            "net.tls.version_set_empty",
            "no supported TLS versions match the requested settings",
        ));
    }

    Ok(versions)
}
