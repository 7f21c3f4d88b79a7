//! Owned markup tree used by the parser, the rewriter and the publisher.
//!
//! Text is stored exactly as it appeared in the source so that serializing an
//! untouched tree reproduces the original character references. Attribute
//! values are stored decoded and re-escaped on output.

use std::fmt::Write as _;

/// Parsed document: an ordered list of top-level nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    /// Raw source text, character references left undecoded.
    Text(String),
    /// Comment body without the `<!--`/`-->` delimiters.
    Comment(String),
    /// Markup declaration body without `<!`/`>`, e.g. `DOCTYPE html`.
    Declaration(String),
}

impl Node {
    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Self::Element(element) => Some(element),
            _ => None,
        }
    }

    fn is_element_named(&self, name: &str) -> bool {
        self.as_element()
            .is_some_and(|element| element.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// Lowercase tag name.
    pub name: String,
    /// Attributes in source order; names lowercase, values decoded.
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        let name: String = name.into();
        Self {
            name: name.to_ascii_lowercase(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_attr(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(Node::Text(text.into()));
        self
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attr(name).is_some()
    }

    /// Replaces the first attribute called `name`, or appends it.
    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .attrs
            .iter_mut()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
        {
            Some((_, existing)) => *existing = value,
            None => self.attrs.push((name.to_ascii_lowercase(), value)),
        }
    }

    pub fn remove_attr(&mut self, name: &str) -> Option<String> {
        let index = self
            .attrs
            .iter()
            .position(|(key, _)| key.eq_ignore_ascii_case(name))?;
        Some(self.attrs.remove(index).1)
    }

    pub fn prepend_child(&mut self, node: Node) {
        self.children.insert(0, node);
    }

    pub fn append_child(&mut self, node: Node) {
        self.children.push(node);
    }

    pub fn is_void(&self) -> bool {
        is_void_element(&self.name)
    }
}

impl Document {
    pub fn new(children: Vec<Node>) -> Self {
        Self { children }
    }

    /// Visits every element in document order.
    pub fn for_each_element<F>(&self, mut visit: F)
    where
        F: FnMut(&Element),
    {
        walk(&self.children, &mut visit);
    }

    /// Visits every element in document order, allowing mutation.
    pub fn for_each_element_mut<F>(&mut self, mut visit: F)
    where
        F: FnMut(&mut Element),
    {
        walk_mut(&mut self.children, &mut visit);
    }

    pub fn find_first(&self, name: &str) -> Option<&Element> {
        find_in(&self.children, name)
    }

    pub fn find_first_mut(&mut self, name: &str) -> Option<&mut Element> {
        find_in_mut(&mut self.children, name)
    }

    /// Elements called `name`, in document order.
    pub fn elements_named(&self, name: &str) -> Vec<&Element> {
        let mut found = Vec::new();
        collect_named(&self.children, name, &mut found);
        found
    }

    /// Makes sure the document has a `head` element.
    ///
    /// A missing head is created as the first child of the top-level `html`
    /// element, or, for fragments without one, right after any leading
    /// declarations and comments.
    pub fn ensure_head(&mut self) {
        if self.find_first("head").is_some() {
            return;
        }

        let head = Node::Element(Element::new("head"));
        let html = self
            .children
            .iter_mut()
            .find(|node| node.is_element_named("html"));
        if let Some(Node::Element(html)) = html {
            let at = leading_prologue_len(&html.children);
            html.children.insert(at, head);
            return;
        }

        let at = leading_prologue_len(&self.children);
        self.children.insert(at, head);
    }

    pub fn head_mut(&mut self) -> Option<&mut Element> {
        self.find_first_mut("head")
    }

    pub fn to_html(&self) -> String {
        let mut out = String::new();
        for node in &self.children {
            write_node(node, &mut out);
        }
        out
    }
}

/// Elements that never carry children or an end tag.
pub fn is_void_element(name: &str) -> bool {
    matches!(
        name,
        "area"
            | "base"
            | "basefont"
            | "br"
            | "col"
            | "embed"
            | "frame"
            | "hr"
            | "img"
            | "input"
            | "keygen"
            | "link"
            | "meta"
            | "param"
            | "source"
            | "track"
            | "wbr"
    )
}

/// Elements whose content is raw text rather than markup.
pub fn is_raw_text_element(name: &str) -> bool {
    matches!(name, "script" | "style" | "textarea" | "title")
}

/// Escapes a value for use inside a double-quoted attribute.
pub fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

fn leading_prologue_len(nodes: &[Node]) -> usize {
    nodes
        .iter()
        .take_while(|node| match node {
            Node::Declaration(_) | Node::Comment(_) => true,
            Node::Text(text) => text.trim().is_empty(),
            Node::Element(_) => false,
        })
        .count()
}

fn walk<F>(nodes: &[Node], visit: &mut F)
where
    F: FnMut(&Element),
{
    for node in nodes {
        if let Node::Element(element) = node {
            visit(element);
            walk(&element.children, visit);
        }
    }
}

fn walk_mut<F>(nodes: &mut [Node], visit: &mut F)
where
    F: FnMut(&mut Element),
{
    for node in nodes.iter_mut() {
        if let Node::Element(element) = node {
            visit(element);
            walk_mut(&mut element.children, visit);
        }
    }
}

fn find_in<'a>(nodes: &'a [Node], name: &str) -> Option<&'a Element> {
    for node in nodes {
        let Node::Element(element) = node else {
            continue;
        };

        if element.name == name {
            return Some(element);
        }

        if let Some(found) = find_in(&element.children, name) {
            return Some(found);
        }
    }

    None
}

fn find_in_mut<'a>(nodes: &'a mut [Node], name: &str) -> Option<&'a mut Element> {
    for node in nodes.iter_mut() {
        let Node::Element(element) = node else {
            continue;
        };

        if element.name == name {
            return Some(element);
        }

        if let Some(found) = find_in_mut(&mut element.children, name) {
            return Some(found);
        }
    }

    None
}

fn collect_named<'a>(nodes: &'a [Node], name: &str, out: &mut Vec<&'a Element>) {
    for node in nodes {
        if let Node::Element(element) = node {
            if element.name == name {
                out.push(element);
            }
            collect_named(&element.children, name, out);
        }
    }
}

fn write_node(node: &Node, out: &mut String) {
    match node {
        Node::Text(text) => out.push_str(text),
        Node::Comment(body) => {
            out.push_str("<!--");
            out.push_str(body);
            out.push_str("-->");
        }
        Node::Declaration(body) => {
            out.push_str("<!");
            out.push_str(body);
            out.push('>');
        }
        Node::Element(element) => write_element(element, out),
    }
}

fn write_element(element: &Element, out: &mut String) {
    out.push('<');
    out.push_str(&element.name);
    for (name, value) in &element.attrs {
        if value.is_empty() {
            let _ = write!(out, " {name}");
        } else {
            let _ = write!(out, " {name}=\"{}\"", escape_attr(value));
        }
    }
    out.push('>');

    if element.is_void() {
        return;
    }

    for child in &element.children {
        write_node(child, out);
    }

    out.push_str("</");
    out.push_str(&element.name);
    out.push('>');
}

#[cfg(test)]
mod tests {
    use super::Document;
    use super::Element;
    use super::Node;

    fn frameset_document() -> Document {
        let mut frameset = Element::new("frameset").with_attr("cols", "20%,*");
        for src in ["menu.htm", "body.htm"] {
            frameset.append_child(Node::Element(Element::new("frame").with_attr("src", src)));
        }
        let html = Element {
            name: "html".to_owned(),
            attrs: Vec::new(),
            children: vec![Node::Element(frameset)],
        };
        Document::new(vec![
            Node::Declaration("DOCTYPE html".to_owned()),
            Node::Element(html),
        ])
    }

    #[test]
    fn serializes_void_elements_and_escapes_attributes() {
        let doc = Document::new(vec![Node::Element(
            Element::new("a")
                .with_attr("href", "x.htm?a=1&b=\"2\"")
                .with_attr("nowrap", "")
                .with_text("A &amp; B"),
        )]);

        assert_eq!(
            doc.to_html(),
            "<a href=\"x.htm?a=1&amp;b=&quot;2&quot;\" nowrap>A &amp; B</a>"
        );
    }

    #[test]
    fn ensure_head_inserts_inside_html() {
        let mut doc = frameset_document();
        doc.ensure_head();

        assert_eq!(
            doc.to_html(),
            "<!DOCTYPE html><html><head></head><frameset cols=\"20%,*\"><frame src=\"menu.htm\"><frame src=\"body.htm\"></frameset></html>"
        );

        doc.ensure_head();
        assert_eq!(doc.elements_named("head").len(), 1);
    }

    #[test]
    fn ensure_head_on_fragment_skips_prologue() {
        let mut doc = Document::new(vec![
            Node::Comment(" legacy ".to_owned()),
            Node::Element(Element::new("p").with_text("hi")),
        ]);
        doc.ensure_head();
        assert_eq!(doc.to_html(), "<!-- legacy --><head></head><p>hi</p>");
    }

    #[test]
    fn traversal_is_in_document_order() {
        let doc = frameset_document();
        let mut names = Vec::new();
        doc.for_each_element(|element| names.push(element.name.clone()));
        assert_eq!(names, vec!["html", "frameset", "frame", "frame"]);

        let sources = doc
            .elements_named("frame")
            .into_iter()
            .filter_map(|frame| frame.attr("src"))
            .collect::<Vec<_>>();
        assert_eq!(sources, vec!["menu.htm", "body.htm"]);
    }

    #[test]
    fn set_attr_replaces_first_match_case_insensitively() {
        let mut element = Element::new("A").with_attr("TARGET", "_top");
        element.set_attr("target", "_self");
        assert_eq!(element.name, "a");
        assert_eq!(element.attrs.len(), 1);
        assert_eq!(element.attr("target"), Some("_self"));
        assert_eq!(element.remove_attr("target"), Some("_self".to_owned()));
        assert!(!element.has_attr("target"));
    }

    #[test]
    fn mutable_walk_reaches_nested_elements() {
        let mut doc = frameset_document();
        doc.for_each_element_mut(|element| {
            if element.name == "frame" {
                element.set_attr("src", "framelift://content/1");
            }
        });
        assert!(
            doc.elements_named("frame")
                .iter()
                .all(|frame| frame.attr("src") == Some("framelift://content/1"))
        );
    }
}
