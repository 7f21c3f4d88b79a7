//! Content Publisher: ephemeral, revocable, in-memory document handles.
//!
//! A [`ContentHandle`] owns its registry entry. Dropping it (or passing it to
//! [`ContentPublisher::release`]) removes the entry, so a handle can be
//! released at most once and is never leaked past its owner.

use fl_dom::Document;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use tracing::debug;

/// Number of hex digits of the body digest kept in a handle reference.
const DIGEST_PREFIX_LEN: usize = 12;

/// Counters describing the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublisherStats {
    /// Handles currently published and not yet released.
    pub live: usize,
    pub published: u64,
    pub released: u64,
}

#[derive(Debug, Default)]
struct Registry {
    bodies: Mutex<HashMap<String, Arc<str>>>,
    next_serial: AtomicU64,
    published: AtomicU64,
    released: AtomicU64,
}

impl Registry {
    fn bodies(&self) -> MutexGuard<'_, HashMap<String, Arc<str>>> {
        match self.bodies.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn remove(&self, href: &str) {
        if self.bodies().remove(href).is_some() {
            self.released.fetch_add(1, Ordering::SeqCst);
            debug!(phase = "publish", handle = href, "content handle released");
        }
    }
}

/// Publishes serialized documents under `<scheme>://content/<id>` references.
///
/// Cloning shares the registry.
#[derive(Debug, Clone)]
pub struct ContentPublisher {
    scheme: String,
    registry: Arc<Registry>,
}

impl Default for ContentPublisher {
    fn default() -> Self {
        Self::new("framelift")
    }
}

impl ContentPublisher {
    pub fn new(scheme: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            registry: Arc::new(Registry::default()),
        }
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Serializes `tree` and publishes it under a fresh handle.
    pub fn publish(&self, tree: &Document) -> ContentHandle {
        self.publish_markup(tree.to_html())
    }

    pub fn publish_markup(&self, markup: impl Into<String>) -> ContentHandle {
        let markup: String = markup.into();
        let serial = self
            .registry
            .next_serial
            .fetch_add(1, Ordering::SeqCst)
            .saturating_add(1);
        let digest = sha1_smol::Sha1::from(markup.as_bytes()).digest().to_string();
        let short = digest.get(..DIGEST_PREFIX_LEN).unwrap_or(&digest);
        let href = format!("{}://content/{serial}-{short}", self.scheme);

        let bytes = markup.len();
        self.registry.bodies().insert(href.clone(), Arc::from(markup));
        self.registry.published.fetch_add(1, Ordering::SeqCst);
        debug!(phase = "publish", handle = %href, bytes, "content published");

        ContentHandle {
            href,
            registry: Arc::clone(&self.registry),
        }
    }

    /// Releases `handle` now instead of when it goes out of scope.
    pub fn release(&self, handle: ContentHandle) {
        drop(handle);
    }

    /// Published markup for `href`, or `None` once it was released.
    pub fn open(&self, href: &str) -> Option<Arc<str>> {
        self.registry.bodies().get(href).cloned()
    }

    pub fn is_live(&self, href: &str) -> bool {
        self.registry.bodies().contains_key(href)
    }

    pub fn stats(&self) -> PublisherStats {
        PublisherStats {
            live: self.registry.bodies().len(),
            published: self.registry.published.load(Ordering::SeqCst),
            released: self.registry.released.load(Ordering::SeqCst),
        }
    }
}

/// Exclusive owner of one published body.
///
/// Not `Clone`: the container only ever sees the `href`.
pub struct ContentHandle {
    href: String,
    registry: Arc<Registry>,
}

impl ContentHandle {
    pub fn href(&self) -> &str {
        &self.href
    }
}

impl fmt::Debug for ContentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ContentHandle").field(&self.href).finish()
    }
}

impl PartialEq for ContentHandle {
    fn eq(&self, other: &Self) -> bool {
        self.href == other.href && Arc::ptr_eq(&self.registry, &other.registry)
    }
}

impl Eq for ContentHandle {}

impl Drop for ContentHandle {
    fn drop(&mut self) {
        self.registry.remove(&self.href);
    }
}

/// The handle currently bound to one display slot.
#[derive(Debug, Default)]
pub struct ContentSlot {
    current: Option<ContentHandle>,
}

impl ContentSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handle(handle: ContentHandle) -> Self {
        Self {
            current: Some(handle),
        }
    }

    /// Binds `handle` and hands back the previous one.
    ///
    /// The caller releases the returned handle once the container shows the
    /// new one.
    pub fn install(&mut self, handle: ContentHandle) -> Option<ContentHandle> {
        self.current.replace(handle)
    }

    pub fn current(&self) -> Option<&ContentHandle> {
        self.current.as_ref()
    }

    pub fn href(&self) -> Option<&str> {
        self.current.as_ref().map(ContentHandle::href)
    }

    pub fn take(&mut self) -> Option<ContentHandle> {
        self.current.take()
    }
}

#[cfg(test)]
mod tests {
    use super::ContentPublisher;
    use super::ContentSlot;
    use fl_dom::Document;
    use fl_dom::Element;
    use fl_dom::Node;

    fn page(text: &str) -> Document {
        Document::new(vec![Node::Element(Element::new("p").with_text(text))])
    }

    #[test]
    fn published_markup_is_readable_until_released() {
        let publisher = ContentPublisher::new("framelift");
        let handle = publisher.publish(&page("hello"));

        assert!(handle.href().starts_with("framelift://content/1-"));
        assert_eq!(publisher.open(handle.href()).as_deref(), Some("<p>hello</p>"));

        let href = handle.href().to_owned();
        publisher.release(handle);
        assert!(publisher.open(&href).is_none());
        assert!(!publisher.is_live(&href));
    }

    #[test]
    fn identical_bodies_get_distinct_handles() {
        let publisher = ContentPublisher::default();
        let first = publisher.publish(&page("same"));
        let second = publisher.publish(&page("same"));

        assert_ne!(first.href(), second.href());
        assert_eq!(publisher.stats().live, 2);
    }

    #[test]
    fn slot_install_releases_only_prior_handle_once() {
        let publisher = ContentPublisher::default();
        let mut slot = ContentSlot::new();

        assert!(slot.install(publisher.publish(&page("one"))).is_none());
        let first_href = slot.href().map(str::to_owned);

        let prior = slot.install(publisher.publish(&page("two")));
        let second_href = slot.href().map(str::to_owned);
        assert_eq!(prior.as_ref().map(|handle| handle.href().to_owned()), first_href);

        if let Some(prior) = prior {
            publisher.release(prior);
        }

        let stats = publisher.stats();
        assert_eq!(stats.published, 2);
        assert_eq!(stats.released, 1);
        assert_eq!(stats.live, 1);
        assert!(second_href.as_deref().is_some_and(|href| publisher.is_live(href)));
    }

    #[test]
    fn dropping_slot_releases_current_handle() {
        let publisher = ContentPublisher::default();
        {
            let mut slot = ContentSlot::new();
            let _ = slot.install(publisher.publish(&page("bound")));
            assert_eq!(publisher.stats().live, 1);
        }

        let stats = publisher.stats();
        assert_eq!(stats.live, 0);
        assert_eq!(stats.released, 1);
    }

    #[test]
    fn clones_share_one_registry() {
        let publisher = ContentPublisher::new("test");
        let observer = publisher.clone();
        let handle = publisher.publish_markup("<p>x</p>");

        assert!(observer.is_live(handle.href()));
        drop(handle);
        assert_eq!(observer.stats().released, 1);
    }
}
