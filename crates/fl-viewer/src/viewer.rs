//! Host-side loader and agent dispatch.
//!
//! Loads run on worker threads and report back over a channel; the host
//! drives the viewer by calling [`Viewer::poll`] (or [`Viewer::wait`]) from
//! its own event loop, so the container is only ever touched from there.

use crate::pipeline::LoadedDocument;
use crate::pipeline::Pipeline;
use crate::tree::FrameTree;
use crate::tree::SlotAddress;
use crate::tree::SlotId;
use fl_agent::AgentPayload;
use fl_agent::ClickDecision;
use fl_agent::ClickEvent;
use fl_agent::decide;
use fl_agent::parse_bridge_message;
use fl_core::CancelFlag;
use fl_core::ProxyConfig;
use fl_core::ProxyError;
use fl_core::ProxyResult;
use fl_core::ResourceRequest;
use fl_net::DocumentFetcher;
use fl_publish::ContentPublisher;
use fl_rewrite::DocumentRewriter;
use std::collections::HashMap;
use std::panic;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use std::time::Instant;
use tracing::debug;
use tracing::info;
use tracing::warn;
use url::Url;

/// The hosting container: whatever actually shows published documents.
pub trait HostContainer {
    /// Shows the published document `href` in the frame at `address`.
    fn display(&mut self, address: &SlotAddress, href: &str);

    /// A load for `address` failed; its current content stays.
    fn load_failed(&mut self, address: &SlotAddress, error: &ProxyError);

    fn loading(&mut self, _address: &SlotAddress, _url: &Url) {}
}

/// What the viewer did with one intercepted click.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickOutcome {
    /// Hash reference; the document scrolls natively.
    NativeScroll,
    /// Left to native handling (`_blank`, empty href).
    NotIntercepted,
    /// A load into `slot` was started.
    Dispatched { slot: SlotId },
    /// The click was logged and ignored; the document keeps its content.
    Dropped,
}

struct LoadReport {
    request_id: u64,
    slot: SlotId,
    url: Url,
    result: ProxyResult<LoadedDocument>,
}

type Channel = (mpsc::Sender<LoadReport>, mpsc::Receiver<LoadReport>);

pub struct Viewer<C: HostContainer> {
    request: ResourceRequest,
    pipeline: Arc<Pipeline>,
    container: C,
    tree: FrameTree,
    cancel: CancelFlag,
    next_request_id: u64,
    inflight: HashMap<SlotId, u64>,
    /// `None` once the viewer is closed.
    channel: Option<Channel>,
}

impl<C: HostContainer> Viewer<C> {
    /// Validates `config` and starts loading `request` into the root slot.
    ///
    /// A request without a URL is a no-op viewer that never loads anything.
    pub fn open(
        config: ProxyConfig,
        request: ResourceRequest,
        fetcher: Arc<dyn DocumentFetcher>,
        container: C,
    ) -> ProxyResult<Self> {
        config.validate()?;

        let payload = AgentPayload::standard();
        if config.verify_agent_payload {
            fl_js::verify_payload(&payload)?;
        }

        let pipeline = Pipeline::from_config(&config, fetcher)
            .with_rewriter(DocumentRewriter::new(payload));
        let mut viewer = Self {
            request,
            pipeline: Arc::new(pipeline),
            container,
            tree: FrameTree::new(),
            cancel: CancelFlag::new(),
            next_request_id: 1,
            inflight: HashMap::new(),
            channel: Some(mpsc::channel()),
        };

        let Some(target) = viewer.request.target().map(str::to_owned) else {
            debug!(title = %viewer.request.title, "viewer opened without a url");
            return Ok(viewer);
        };

        match Url::parse(&target) {
            Ok(url) => {
                info!(source_url = %url, title = %viewer.request.title, "viewer opened");
                let root = viewer.tree.root();
                viewer.navigate(root, url);
            }
            Err(error) => {
                let error = ProxyError::resolution(
                    "resolve.request_invalid",
                    format!("requested url `{target}` is not absolute: {error}"),
                );
                warn!(source_url = %target, phase = "fetch", code = error.code, %error, "viewer request rejected");
                viewer.container.load_failed(&SlotAddress::root(), &error);
            }
        }

        Ok(viewer)
    }

    pub fn request(&self) -> &ResourceRequest {
        &self.request
    }

    pub fn tree(&self) -> &FrameTree {
        &self.tree
    }

    pub fn container(&self) -> &C {
        &self.container
    }

    pub fn container_mut(&mut self) -> &mut C {
        &mut self.container
    }

    /// Publisher the container reads handle bodies from.
    pub fn publisher(&self) -> &ContentPublisher {
        self.pipeline.publisher()
    }

    pub fn is_idle(&self) -> bool {
        self.inflight.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.channel.is_none()
    }

    /// Starts loading `url` into `slot`, superseding any load already in
    /// flight for that slot.
    pub fn navigate(&mut self, slot: SlotId, url: Url) {
        let sender = match &self.channel {
            Some((sender, _)) => sender.clone(),
            None => return,
        };
        if !self.tree.contains(slot) {
            debug!(source_url = %url, %slot, "navigation to a removed slot ignored");
            return;
        }

        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.saturating_add(1);
        if let Some(previous) = self.inflight.insert(slot, request_id) {
            debug!(%slot, previous, request_id, "load superseded");
        }

        let depth = self.tree.depth(slot);
        if let Some(address) = self.tree.address(slot) {
            self.container.loading(&address, &url);
        }

        let pipeline = Arc::clone(&self.pipeline);
        let cancel = self.cancel.clone();
        let task_url = url.clone();
        let job = move || {
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                pipeline.run_at(&task_url, depth, &cancel)
            }))
            .unwrap_or_else(|_| {
                Err(ProxyError::network(
                    "viewer.worker_panicked",
                    format!("load worker for `{task_url}` panicked"),
                ))
            });
            let _ = sender.send(LoadReport {
                request_id,
                slot,
                url: task_url,
                result,
            });
        };

        debug!(source_url = %url, phase = "fetch", %slot, request_id, "load started");
        if let Err(spawn_error) = thread::Builder::new()
            .name("framelift-load".to_owned())
            .spawn(job)
        {
            self.inflight.remove(&slot);
            let error = ProxyError::network(
                "viewer.spawn_failed",
                format!("failed to spawn load worker: {spawn_error}"),
            );
            warn!(source_url = %url, phase = "fetch", %slot, code = error.code, "load not started");
            if let Some(address) = self.tree.address(slot) {
                self.container.load_failed(&address, &error);
            }
        }
    }

    /// Applies every finished load; returns how many reached the container.
    pub fn poll(&mut self) -> usize {
        let mut applied = 0;
        loop {
            let report = match &self.channel {
                Some((_, receiver)) => receiver.try_recv().ok(),
                None => None,
            };
            let Some(report) = report else {
                break;
            };
            if self.apply(report) {
                applied += 1;
            }
        }
        applied
    }

    /// Blocks until no load is in flight or `timeout` elapses; returns
    /// whether the viewer went idle.
    pub fn wait(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.poll();
            if self.inflight.is_empty() {
                return true;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }

            let report = match &self.channel {
                Some((_, receiver)) => receiver.recv_timeout(remaining),
                None => return true,
            };
            match report {
                Ok(report) => {
                    self.apply(report);
                }
                Err(mpsc::RecvTimeoutError::Timeout) => return self.inflight.is_empty(),
                Err(mpsc::RecvTimeoutError::Disconnected) => return true,
            }
        }
    }

    /// Handles a raw message posted by an injected agent.
    pub fn handle_bridge_message(&mut self, raw: &str) -> ClickOutcome {
        match parse_bridge_message(raw) {
            Ok(event) => self.handle_click(event),
            Err(error) => {
                warn!(phase = "dispatch", code = error.code, %error, "bridge message dropped");
                ClickOutcome::Dropped
            }
        }
    }

    pub fn handle_click(&mut self, event: ClickEvent) -> ClickOutcome {
        if self.is_closed() {
            return ClickOutcome::Dropped;
        }

        let Some(slot) = self.tree.slot_for_token(event.token) else {
            debug!(phase = "dispatch", token = %event.token, "click from a document no longer displayed");
            return ClickOutcome::Dropped;
        };
        let Some(base) = self.tree.source_url(slot).cloned() else {
            return ClickOutcome::Dropped;
        };

        let intent = match decide(&event, &base) {
            Ok(ClickDecision::NativeScroll) => return ClickOutcome::NativeScroll,
            Ok(ClickDecision::NotIntercepted) => return ClickOutcome::NotIntercepted,
            Ok(ClickDecision::Navigate(intent)) => intent,
            Err(error) => {
                warn!(source_url = %base, phase = "dispatch", %slot, code = error.code, %error, "click dropped");
                return ClickOutcome::Dropped;
            }
        };

        let target = match intent.target_frame_name.as_deref() {
            None => slot,
            Some(name) => match self.tree.find_named_frame(slot, name) {
                Some(found) => found,
                None => {
                    debug!(source_url = %base, phase = "dispatch", frame = name, "no frame by that name; navigating self");
                    slot
                }
            },
        };

        info!(
            source_url = %base,
            phase = "dispatch",
            slot = %target,
            resolved = %intent.resolved_url,
            "click dispatched"
        );
        self.navigate(target, intent.resolved_url);
        ClickOutcome::Dispatched { slot: target }
    }

    /// Cancels in-flight loads and releases every handle this viewer owns.
    pub fn close(&mut self) {
        if self.channel.take().is_none() {
            return;
        }

        self.cancel.cancel();
        self.inflight.clear();
        let handles = self.tree.clear();
        let released = handles.len();
        for handle in handles {
            self.pipeline.publisher().release(handle);
        }
        info!(title = %self.request.title, released, "viewer closed");
    }

    fn apply(&mut self, report: LoadReport) -> bool {
        if self.inflight.get(&report.slot) != Some(&report.request_id) {
            debug!(source_url = %report.url, slot = %report.slot, request_id = report.request_id, "stale load discarded");
            return false;
        }
        self.inflight.remove(&report.slot);

        let Some(address) = self.tree.address(report.slot) else {
            return false;
        };

        match report.result {
            Ok(loaded) => {
                let href = loaded.handle.href().to_owned();
                let stale = self
                    .tree
                    .replace_content(report.slot, loaded.document, loaded.handle);
                self.container.display(&address, &href);

                let released = stale.len();
                for handle in stale {
                    self.pipeline.publisher().release(handle);
                }
                let tree = &self.tree;
                self.inflight.retain(|slot, _| tree.contains(*slot));

                info!(source_url = %report.url, slot = %report.slot, %address, handle = %href, released, "document displayed");
                true
            }
            Err(error) if error.is_cancelled() => false,
            Err(error) => {
                warn!(source_url = %report.url, phase = "load", slot = %report.slot, code = error.code, %error, "failed to load");
                self.container.load_failed(&address, &error);
                true
            }
        }
    }
}

impl<C: HostContainer> Drop for Viewer<C> {
    fn drop(&mut self) {
        self.close();
    }
}
