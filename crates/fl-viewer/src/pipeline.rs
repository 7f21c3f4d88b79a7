use crate::document::ProxiedDocument;
use crate::expand::FrameExpander;
use fl_core::CancelFlag;
use fl_core::ProxyConfig;
use fl_core::ProxyResult;
use fl_net::DocumentFetcher;
use fl_publish::ContentHandle;
use fl_publish::ContentPublisher;
use fl_rewrite::DocumentRewriter;
use std::sync::Arc;
use tracing::warn;
use url::Url;

/// A loaded document together with the handle its tree was published under.
#[derive(Debug)]
pub struct LoadedDocument {
    pub document: ProxiedDocument,
    pub handle: ContentHandle,
}

/// Fetch, rewrite, expand and publish, shared by the viewer and every frame.
pub struct Pipeline {
    fetcher: Arc<dyn DocumentFetcher>,
    rewriter: DocumentRewriter,
    publisher: ContentPublisher,
    max_frame_depth: usize,
}

impl Pipeline {
    pub fn new(
        fetcher: Arc<dyn DocumentFetcher>,
        publisher: ContentPublisher,
        max_frame_depth: usize,
    ) -> Self {
        Self {
            fetcher,
            rewriter: DocumentRewriter::default(),
            publisher,
            max_frame_depth,
        }
    }

    pub fn from_config(config: &ProxyConfig, fetcher: Arc<dyn DocumentFetcher>) -> Self {
        Self::new(
            fetcher,
            ContentPublisher::new(config.handle_scheme.clone()),
            config.max_frame_depth,
        )
    }

    pub fn with_rewriter(mut self, rewriter: DocumentRewriter) -> Self {
        self.rewriter = rewriter;
        self
    }

    pub fn publisher(&self) -> &ContentPublisher {
        &self.publisher
    }

    pub fn rewriter(&self) -> &DocumentRewriter {
        &self.rewriter
    }

    pub fn max_frame_depth(&self) -> usize {
        self.max_frame_depth
    }

    /// Fetches and rewrites `url`, then expands its frames as a document
    /// nested `depth` levels below the top.
    pub fn load(&self, url: &Url, depth: usize, cancel: &CancelFlag) -> ProxyResult<ProxiedDocument> {
        cancel.check("fetch")?;
        let fetched = self.fetcher.fetch(url).inspect_err(|error| {
            warn!(source_url = %url, phase = "fetch", code = error.code, %error, "fetch failed");
        })?;

        cancel.check("rewrite")?;
        let rewritten = self.rewriter.rewrite(&fetched.markup, &fetched.final_url);
        let document = ProxiedDocument {
            source_url: rewritten.source_url,
            raw_markup: fetched.markup,
            token: rewritten.token,
            tree: rewritten.tree,
            frame_bindings: Vec::new(),
        };

        FrameExpander::new(self).expand(document, depth, cancel)
    }

    /// Loads `url` as a top-level document and publishes it.
    pub fn run(&self, url: &Url, cancel: &CancelFlag) -> ProxyResult<LoadedDocument> {
        self.run_at(url, 0, cancel)
    }

    /// Loads `url` at `depth` and publishes it once every child frame is in place.
    pub fn run_at(&self, url: &Url, depth: usize, cancel: &CancelFlag) -> ProxyResult<LoadedDocument> {
        let document = self.load(url, depth, cancel)?;

        cancel.check("publish")?;
        let handle = self.publisher.publish(&document.tree);
        cancel.check("display")?;

        Ok(LoadedDocument { document, handle })
    }
}

#[cfg(test)]
mod tests {
    use super::Pipeline;
    use fl_core::CancelFlag;
    use fl_core::ErrorKind;
    use fl_net::StaticFetcher;
    use fl_publish::ContentPublisher;
    use std::sync::Arc;
    use url::Url;

    fn url(input: &str) -> Url {
        match Url::parse(input) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        }
    }

    #[test]
    fn run_publishes_rewritten_markup_with_final_url_as_base() {
        let fetcher = StaticFetcher::new()
            .with_redirect("https://upstream.example/old.htm", "/new/index.htm")
            .with_page(
                "https://upstream.example/new/index.htm",
                "<html><head></head><body><a href=next.htm target=_top>n</a></body></html>",
            );
        let pipeline = Pipeline::new(Arc::new(fetcher), ContentPublisher::default(), 4);

        let loaded = pipeline.run(&url("https://upstream.example/old.htm"), &CancelFlag::new());
        assert!(loaded.is_ok());
        let loaded = match loaded {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };

        assert_eq!(
            loaded.document.source_url.as_str(),
            "https://upstream.example/new/index.htm"
        );
        let published = pipeline.publisher().open(loaded.handle.href());
        let Some(published) = published else {
            panic!("handle not live");
        };
        assert!(published.contains("<base href=\"https://upstream.example/new/index.htm\""));
        assert!(published.contains("target=\"_self\""));
        assert!(!published.contains("_top"));
    }

    #[test]
    fn cancelled_run_publishes_nothing() {
        let fetcher = StaticFetcher::new().with_page("https://upstream.example/", "<p>x</p>");
        let fetcher = Arc::new(fetcher);
        let pipeline = Pipeline::new(fetcher.clone(), ContentPublisher::default(), 4);
        let cancel = CancelFlag::new();
        cancel.cancel();

        let loaded = pipeline.run(&url("https://upstream.example/"), &cancel);
        assert!(loaded.is_err());
        if let Err(error) = loaded {
            assert_eq!(error.kind, ErrorKind::Cancelled);
        }
        assert!(fetcher.requests().is_empty());
        assert_eq!(pipeline.publisher().stats().published, 0);
    }

    #[test]
    fn fetch_failure_surfaces_as_network_error() {
        let fetcher = StaticFetcher::new().with_status("https://upstream.example/gone.htm", 500);
        let pipeline = Pipeline::new(Arc::new(fetcher), ContentPublisher::default(), 4);

        let loaded = pipeline.run(&url("https://upstream.example/gone.htm"), &CancelFlag::new());
        assert!(loaded.is_err());
        if let Err(error) = loaded {
            assert_eq!(error.kind, ErrorKind::Network);
            assert_eq!(error.code, "fetch.status");
        }
    }
}
