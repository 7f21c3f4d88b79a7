//! The viewer's mirror of the displayed frameset.

use crate::document::FrameBinding;
use crate::document::FrameOutcome;
use crate::document::ProxiedDocument;
use fl_agent::DocumentToken;
use fl_publish::ContentHandle;
use fl_publish::ContentSlot;
use std::collections::HashMap;
use std::fmt;
use url::Url;

/// Identifies one display slot for the lifetime of a viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(u64);

impl SlotId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot-{}", self.0)
    }
}

/// One hop from a document to one of its frames.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FrameStep {
    Named(String),
    /// Position among the parent's frames, for frames without a name.
    Index(usize),
}

/// Path from the root document to a frame, as the container addresses it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SlotAddress(Vec<FrameStep>);

impl SlotAddress {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn from_steps(steps: Vec<FrameStep>) -> Self {
        Self(steps)
    }

    pub fn steps(&self) -> &[FrameStep] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SlotAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("/");
        }

        for step in &self.0 {
            match step {
                FrameStep::Named(name) => write!(f, "/{name}")?,
                FrameStep::Index(index) => write!(f, "/#{index}")?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Slot {
    name: Option<String>,
    index: usize,
    parent: Option<SlotId>,
    children: Vec<SlotId>,
    content: ContentSlot,
    source_url: Option<Url>,
    token: Option<DocumentToken>,
}

/// Slots for the root document and every frame beneath it.
///
/// Each slot owns the handle of the document it currently shows.
#[derive(Debug)]
pub struct FrameTree {
    slots: HashMap<SlotId, Slot>,
    root: SlotId,
    next_id: u64,
}

impl Default for FrameTree {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameTree {
    pub fn new() -> Self {
        let root = SlotId(0);
        let mut slots = HashMap::new();
        slots.insert(root, Slot::default());
        Self {
            slots,
            root,
            next_id: 1,
        }
    }

    pub fn root(&self) -> SlotId {
        self.root
    }

    pub fn contains(&self, id: SlotId) -> bool {
        self.slots.contains_key(&id)
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn href(&self, id: SlotId) -> Option<&str> {
        self.slots.get(&id).and_then(|slot| slot.content.href())
    }

    pub fn source_url(&self, id: SlotId) -> Option<&Url> {
        self.slots.get(&id).and_then(|slot| slot.source_url.as_ref())
    }

    pub fn token(&self, id: SlotId) -> Option<DocumentToken> {
        self.slots.get(&id).and_then(|slot| slot.token)
    }

    pub fn name(&self, id: SlotId) -> Option<&str> {
        self.slots.get(&id).and_then(|slot| slot.name.as_deref())
    }

    pub fn parent(&self, id: SlotId) -> Option<SlotId> {
        self.slots.get(&id).and_then(|slot| slot.parent)
    }

    pub fn children(&self, id: SlotId) -> &[SlotId] {
        self.slots
            .get(&id)
            .map(|slot| slot.children.as_slice())
            .unwrap_or_default()
    }

    /// Number of frame hops between the root and `id`.
    pub fn depth(&self, id: SlotId) -> usize {
        let mut depth = 0;
        let mut current = self.parent(id);
        while let Some(parent) = current {
            depth += 1;
            current = self.parent(parent);
        }
        depth
    }

    pub fn address(&self, id: SlotId) -> Option<SlotAddress> {
        let mut steps = Vec::new();
        let mut current = id;
        loop {
            let slot = self.slots.get(&current)?;
            let Some(parent) = slot.parent else {
                break;
            };
            steps.push(match &slot.name {
                Some(name) => FrameStep::Named(name.clone()),
                None => FrameStep::Index(slot.index),
            });
            current = parent;
        }
        steps.reverse();
        Some(SlotAddress(steps))
    }

    /// Slot currently showing the document that was minted `token`.
    pub fn slot_for_token(&self, token: DocumentToken) -> Option<SlotId> {
        self.slots
            .iter()
            .find(|(_, slot)| slot.token == Some(token))
            .map(|(id, _)| *id)
    }

    /// Looks up a frame called `name` among the frames of `from`'s parent
    /// document, then among the frames of the root document.
    pub fn find_named_frame(&self, from: SlotId, name: &str) -> Option<SlotId> {
        let parent = self.parent(from).unwrap_or(self.root);
        self.named_child(parent, name)
            .or_else(|| self.named_child(self.root, name))
    }

    /// Shows `document` in slot `id` and rebuilds the slots beneath it.
    ///
    /// Returns the handles that were displayed before: the slot's previous
    /// handle and those of every frame slot that was replaced. The caller
    /// releases them once the container shows the new handle.
    pub fn replace_content(
        &mut self,
        id: SlotId,
        document: ProxiedDocument,
        handle: ContentHandle,
    ) -> Vec<ContentHandle> {
        let mut stale = Vec::new();
        let Some(slot) = self.slots.get_mut(&id) else {
            stale.push(handle);
            return stale;
        };

        stale.extend(slot.content.install(handle));
        slot.source_url = Some(document.source_url);
        slot.token = Some(document.token);
        let old_children = std::mem::take(&mut slot.children);

        for child in old_children {
            self.remove_subtree(child, &mut stale);
        }
        self.attach_bindings(id, document.frame_bindings);

        stale
    }

    /// Drops every frame slot and unbinds the root; returns all handles.
    pub fn clear(&mut self) -> Vec<ContentHandle> {
        let mut handles = Vec::new();
        let children = match self.slots.get_mut(&self.root) {
            Some(root) => {
                handles.extend(root.content.take());
                root.source_url = None;
                root.token = None;
                std::mem::take(&mut root.children)
            }
            None => Vec::new(),
        };

        for child in children {
            self.remove_subtree(child, &mut handles);
        }
        handles
    }

    fn named_child(&self, parent: SlotId, name: &str) -> Option<SlotId> {
        self.children(parent)
            .iter()
            .copied()
            .find(|child| self.name(*child) == Some(name))
    }

    fn allocate(&mut self) -> SlotId {
        let id = SlotId(self.next_id);
        self.next_id = self.next_id.saturating_add(1);
        id
    }

    fn remove_subtree(&mut self, id: SlotId, stale: &mut Vec<ContentHandle>) {
        let Some(mut slot) = self.slots.remove(&id) else {
            return;
        };
        stale.extend(slot.content.take());
        for child in slot.children {
            self.remove_subtree(child, stale);
        }
    }

    fn attach_bindings(&mut self, parent: SlotId, bindings: Vec<FrameBinding>) {
        for binding in bindings {
            let id = self.allocate();
            let mut slot = Slot {
                name: binding.name,
                index: binding.index,
                parent: Some(parent),
                ..Slot::default()
            };

            let grandchildren = match binding.outcome {
                FrameOutcome::Proxied { document, handle } => {
                    let document = *document;
                    slot.content = ContentSlot::with_handle(handle);
                    slot.source_url = Some(document.source_url);
                    slot.token = Some(document.token);
                    document.frame_bindings
                }
                FrameOutcome::Unproxied { url, .. } => {
                    slot.source_url = url;
                    Vec::new()
                }
            };

            self.slots.insert(id, slot);
            if let Some(parent) = self.slots.get_mut(&parent) {
                parent.children.push(id);
            }
            self.attach_bindings(id, grandchildren);
        }
    }
}
