//! Frame Expander: recursive, concurrent loading of child frames.

use crate::document::FrameBinding;
use crate::document::FrameOutcome;
use crate::document::ProxiedDocument;
use crate::pipeline::LoadedDocument;
use crate::pipeline::Pipeline;
use fl_core::CancelFlag;
use fl_core::ProxyError;
use fl_core::ProxyResult;
use fl_rewrite::FrameDeclaration;
use fl_rewrite::frame_sources;
use std::thread;
use std::thread::ScopedJoinHandle;
use tracing::debug;
use tracing::warn;
use url::Url;

enum ChildTask<'scope> {
    Settled(FrameOutcome),
    Running(Url, ScopedJoinHandle<'scope, ProxyResult<LoadedDocument>>),
    Finished(Url, ProxyResult<LoadedDocument>),
}

/// Replaces every frame's `src` with a published handle for its loaded child.
#[derive(Clone, Copy)]
pub struct FrameExpander<'a> {
    pipeline: &'a Pipeline,
}

impl<'a> FrameExpander<'a> {
    pub fn new(pipeline: &'a Pipeline) -> Self {
        Self { pipeline }
    }

    /// Expands the frames of `document`, which sits `depth` levels below the
    /// top-level document.
    ///
    /// Children load concurrently and all of them settle before this returns.
    /// A failing child keeps its original source; only cancellation aborts.
    pub fn expand(
        &self,
        mut document: ProxiedDocument,
        depth: usize,
        cancel: &CancelFlag,
    ) -> ProxyResult<ProxiedDocument> {
        let frames = frame_sources(&document.tree);
        if frames.is_empty() {
            return Ok(document);
        }

        cancel.check("expand")?;
        let child_depth = depth.saturating_add(1);
        let outcomes = if child_depth > self.pipeline.max_frame_depth() {
            frames
                .iter()
                .map(|frame| self.depth_exceeded(&document.source_url, frame, child_depth))
                .collect::<Vec<_>>()
        } else {
            self.load_children(&document.source_url, &frames, child_depth, cancel)?
        };

        let hrefs = outcomes
            .iter()
            .map(|outcome| match outcome {
                FrameOutcome::Proxied { handle, .. } => Some(handle.href().to_owned()),
                FrameOutcome::Unproxied { .. } => None,
            })
            .collect::<Vec<_>>();

        let mut position = 0_usize;
        document.tree.for_each_element_mut(|element| {
            if element.name != "frame" {
                return;
            }
            if let Some(Some(href)) = hrefs.get(position) {
                element.set_attr("src", href.as_str());
            }
            position += 1;
        });

        document.frame_bindings = frames
            .into_iter()
            .zip(outcomes)
            .map(|(frame, outcome)| FrameBinding {
                index: frame.index,
                name: frame.name,
                original_src: frame.src,
                outcome,
            })
            .collect();

        debug!(
            source_url = %document.source_url,
            phase = "expand",
            depth,
            frames = document.frame_bindings.len(),
            proxied = document.proxied_frame_count(),
            "frames expanded"
        );

        Ok(document)
    }

    fn load_children(
        &self,
        base: &Url,
        frames: &[FrameDeclaration],
        depth: usize,
        cancel: &CancelFlag,
    ) -> ProxyResult<Vec<FrameOutcome>> {
        thread::scope(|scope| {
            let mut tasks = Vec::with_capacity(frames.len());

            for frame in frames {
                let url = match resolve_frame_src(base, &frame.src) {
                    Ok(url) => url,
                    Err(error) => {
                        log_unproxied(base, frame, &error);
                        tasks.push(ChildTask::Settled(FrameOutcome::Unproxied {
                            url: None,
                            error,
                        }));
                        continue;
                    }
                };

                let pipeline = self.pipeline;
                let child_url = url.clone();
                let spawned = thread::Builder::new()
                    .name(format!("framelift-frame-{}", frame.index))
                    .spawn_scoped(scope, move || pipeline.run_at(&child_url, depth, cancel));

                match spawned {
                    Ok(handle) => tasks.push(ChildTask::Running(url, handle)),
                    Err(spawn_error) => {
                        debug!(source_url = %url, phase = "expand", %spawn_error, "loading frame inline");
                        let result = self.pipeline.run_at(&url, depth, cancel);
                        tasks.push(ChildTask::Finished(url, result));
                    }
                }
            }

            frames
                .iter()
                .zip(tasks)
                .map(|(frame, task)| {
                    let (url, result) = match task {
                        ChildTask::Settled(outcome) => return Ok(outcome),
                        ChildTask::Finished(url, result) => (url, result),
                        ChildTask::Running(url, handle) => {
                            let result = handle.join().unwrap_or_else(|_| {
                                Err(ProxyError::frame(
                                    "frame.worker_panicked",
                                    format!("frame worker for `{url}` panicked"),
                                ))
                            });
                            (url, result)
                        }
                    };
                    settle(base, frame, url, result)
                })
                .collect()
        })
    }

    fn depth_exceeded(&self, base: &Url, frame: &FrameDeclaration, depth: usize) -> FrameOutcome {
        let url = resolve_frame_src(base, &frame.src).ok();
        let error = ProxyError::frame(
            "frame.depth_exceeded",
            format!(
                "frame nesting depth {depth} exceeds the limit of {}",
                self.pipeline.max_frame_depth()
            ),
        );
        log_unproxied(base, frame, &error);
        FrameOutcome::Unproxied { url, error }
    }
}

fn settle(
    base: &Url,
    frame: &FrameDeclaration,
    url: Url,
    result: ProxyResult<LoadedDocument>,
) -> ProxyResult<FrameOutcome> {
    match result {
        Ok(loaded) => Ok(FrameOutcome::Proxied {
            document: Box::new(loaded.document),
            handle: loaded.handle,
        }),
        Err(error) if error.is_cancelled() => Err(error),
        Err(error) => {
            let error =
                ProxyError::frame("frame.child_failed", format!("frame `{url}`: {error}"));
            log_unproxied(base, frame, &error);
            Ok(FrameOutcome::Unproxied {
                url: Some(url),
                error,
            })
        }
    }
}

fn resolve_frame_src(base: &Url, src: &str) -> ProxyResult<Url> {
    if src.is_empty() {
        return Err(ProxyError::frame(
            "frame.src_missing",
            "frame declares no source",
        ));
    }

    let url = base.join(src).map_err(|error| {
        ProxyError::resolution(
            "resolve.join_failed",
            format!("cannot resolve frame source `{src}` against `{base}`: {error}"),
        )
    })?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ProxyError::resolution(
            "resolve.scheme_unsupported",
            format!("frame source `{url}` is not an http(s) document"),
        ));
    }

    Ok(url)
}

fn log_unproxied(base: &Url, frame: &FrameDeclaration, error: &ProxyError) {
    warn!(
        source_url = %base,
        phase = "expand",
        frame = frame.index,
        src = %frame.src,
        code = error.code,
        %error,
        "frame left unproxied"
    );
}
