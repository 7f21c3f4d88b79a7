//! Document Rewriter.
//!
//! Turns fetched markup into a tree that can be hosted away from its origin:
//! relative references keep resolving against the source URL, nothing can
//! replace the hosting container, and the navigation agent is in place before
//! the user can interact.

use fl_agent::AgentPayload;
use fl_agent::DocumentToken;
use fl_dom::Document;
use fl_dom::Element;
use fl_dom::Node;
use fl_html::HtmlParser;
use tracing::debug;
use url::Url;

/// Marker attribute on elements the rewriter injects.
pub const INJECTED_ATTR: &str = "data-framelift";

/// Elements whose `target` attribute can navigate another browsing context.
const TARGETING_ELEMENTS: [&str; 4] = ["a", "area", "form", "base"];

/// A parsed, rewritten document ready for frame expansion and publishing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenDocument {
    pub source_url: Url,
    /// Token baked into this document's agent instance.
    pub token: DocumentToken,
    pub tree: Document,
}

/// A `frame` element found in a rewritten tree, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameDeclaration {
    /// Position among the document's frame elements.
    pub index: usize,
    pub name: Option<String>,
    /// Declared `src`, unresolved. Empty when the attribute is missing.
    pub src: String,
}

#[derive(Debug, Clone, Default)]
pub struct DocumentRewriter {
    parser: HtmlParser,
    payload: AgentPayload,
}

impl DocumentRewriter {
    pub fn new(payload: AgentPayload) -> Self {
        Self {
            parser: HtmlParser,
            payload,
        }
    }

    pub fn payload(&self) -> &AgentPayload {
        &self.payload
    }

    /// Parses `markup` tolerantly and rewrites it for hosting. Never fails.
    pub fn rewrite(&self, markup: &str, source_url: &Url) -> RewrittenDocument {
        self.rewrite_tree(self.parser.parse(markup), source_url)
    }

    pub fn rewrite_tree(&self, mut tree: Document, source_url: &Url) -> RewrittenDocument {
        let token = DocumentToken::mint();

        tree.ensure_head();
        let neutralized = neutralize_escape_targets(&mut tree);

        if let Some(head) = tree.head_mut() {
            head.children.retain(|node| !is_injected(node));

            let base = Element::new("base")
                .with_attr("href", source_url.as_str())
                .with_attr(INJECTED_ATTR, "base");
            head.prepend_child(Node::Element(base));

            let agent = Element::new("script")
                .with_attr("type", "text/javascript")
                .with_attr(INJECTED_ATTR, "agent")
                .with_text(self.payload.instantiate(token));
            head.append_child(Node::Element(agent));
        }

        debug!(
            source_url = %source_url,
            phase = "rewrite",
            %token,
            neutralized,
            "document rewritten"
        );

        RewrittenDocument {
            source_url: source_url.clone(),
            token,
            tree,
        }
    }
}

/// Rewrites `_top`/`_parent` targets to `_self`; returns how many changed.
///
/// Named targets, empty targets and `_blank` are left alone.
pub fn neutralize_escape_targets(tree: &mut Document) -> usize {
    let mut changed = 0;
    tree.for_each_element_mut(|element| {
        if !TARGETING_ELEMENTS.contains(&element.name.as_str()) {
            return;
        }

        let escapes = element.attr("target").is_some_and(|target| {
            let target = target.trim();
            target.eq_ignore_ascii_case("_top") || target.eq_ignore_ascii_case("_parent")
        });
        if escapes {
            element.set_attr("target", "_self");
            changed += 1;
        }
    });
    changed
}

/// Frame declarations in document order.
pub fn frame_sources(tree: &Document) -> Vec<FrameDeclaration> {
    tree.elements_named("frame")
        .into_iter()
        .enumerate()
        .map(|(index, frame)| FrameDeclaration {
            index,
            name: frame
                .attr("name")
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_owned),
            src: frame.attr("src").unwrap_or_default().trim().to_owned(),
        })
        .collect()
}

fn is_injected(node: &Node) -> bool {
    node.as_element()
        .is_some_and(|element| element.has_attr(INJECTED_ATTR))
}
