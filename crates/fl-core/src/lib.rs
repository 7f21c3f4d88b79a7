//! Shared primitives used across framelift crates.

pub mod config;
pub mod request;

use core::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

pub use config::CrossOriginPolicy;
pub use config::ProxyConfig;
pub use request::ResourceRequest;

/// Result alias used across the workspace.
pub type ProxyResult<T> = Result<T, ProxyError>;

/// Failure classes surfaced by the proxy pipeline.
///
/// Markup parsing has no variant here: the parser is tolerant and never fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Fetch failed at the transport level or returned a non-success status.
    Network,
    /// A URL could not be resolved against its base or is not navigable.
    Resolution,
    /// A child frame could not be fetched, rewritten or published.
    FrameExpansion,
    /// A bridge message from an injected agent was malformed.
    Protocol,
    /// Invalid `ProxyConfig`.
    Configuration,
    /// The owning viewer was torn down while work was in flight.
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Resolution => "resolution",
            Self::FrameExpansion => "frame-expansion",
            Self::Protocol => "protocol",
            Self::Configuration => "configuration",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Workspace error: a taxonomy kind, a stable dotted code and a diagnostic message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyError {
    pub kind: ErrorKind,
    pub code: &'static str,
    pub message: String,
}

impl ProxyError {
    pub fn new(kind: ErrorKind, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
        }
    }

    pub fn network(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, code, message)
    }

    pub fn resolution(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Resolution, code, message)
    }

    pub fn frame(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FrameExpansion, code, message)
    }

    pub fn protocol(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Protocol, code, message)
    }

    pub fn config(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, code, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, "viewer.cancelled", message)
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]: {}", self.code, self.kind.as_str(), self.message)
    }
}

impl std::error::Error for ProxyError {}

/// Cooperative cancellation shared between a viewer and its in-flight loads.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Returns `Cancelled` once the flag is raised; `phase` names the checkpoint.
    pub fn check(&self, phase: &str) -> ProxyResult<()> {
        if self.is_cancelled() {
            return Err(ProxyError::cancelled(format!(
                "viewer torn down before {phase}"
            )));
        }

        Ok(())
    }
}
