use fl_agent::DocumentToken;
use fl_core::ProxyError;
use fl_dom::Document;
use fl_publish::ContentHandle;
use url::Url;

/// A fetched document after rewriting and frame expansion.
///
/// `raw_markup` is kept for diagnostics only; containers are only ever given
/// the published serialization of `tree`.
#[derive(Debug)]
pub struct ProxiedDocument {
    pub source_url: Url,
    pub raw_markup: String,
    pub token: DocumentToken,
    pub tree: Document,
    /// One binding per frame declaration, in document order.
    pub frame_bindings: Vec<FrameBinding>,
}

impl ProxiedDocument {
    pub fn is_frameset(&self) -> bool {
        !self.frame_bindings.is_empty()
    }

    /// Number of frames whose source was replaced by a handle.
    pub fn proxied_frame_count(&self) -> usize {
        self.frame_bindings
            .iter()
            .filter(|binding| binding.is_proxied())
            .count()
    }
}

#[derive(Debug)]
pub struct FrameBinding {
    pub index: usize,
    pub name: Option<String>,
    /// `src` as declared in the parent before expansion.
    pub original_src: String,
    pub outcome: FrameOutcome,
}

impl FrameBinding {
    pub fn is_proxied(&self) -> bool {
        matches!(self.outcome, FrameOutcome::Proxied { .. })
    }

    pub fn handle(&self) -> Option<&ContentHandle> {
        match &self.outcome {
            FrameOutcome::Proxied { handle, .. } => Some(handle),
            FrameOutcome::Unproxied { .. } => None,
        }
    }
}

#[derive(Debug)]
pub enum FrameOutcome {
    /// The child was loaded and published; the parent's `src` points at `handle`.
    Proxied {
        document: Box<ProxiedDocument>,
        handle: ContentHandle,
    },
    /// The child kept its original source.
    Unproxied {
        /// Absolute URL the frame resolved to, when it resolved at all.
        url: Option<Url>,
        error: ProxyError,
    },
}
