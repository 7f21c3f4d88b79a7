//! The proxied viewer: loads a requested document through the fetch,
//! rewrite, expand and publish pipeline and keeps routing agent clicks back
//! through it.

pub mod document;
pub mod expand;
pub mod pipeline;
pub mod tree;
pub mod viewer;

pub use document::FrameBinding;
pub use document::FrameOutcome;
pub use document::ProxiedDocument;
pub use expand::FrameExpander;
pub use pipeline::LoadedDocument;
pub use pipeline::Pipeline;
pub use tree::FrameStep;
pub use tree::FrameTree;
pub use tree::SlotAddress;
pub use tree::SlotId;
pub use viewer::ClickOutcome;
pub use viewer::HostContainer;
pub use viewer::Viewer;

#[cfg(test)]
mod tests;
