//! Document abstraction and an in-memory DOM.

// ============================================================================
// Imports
// ============================================================================

use crate::identifiers::ConfigId;

// ============================================================================
// Types
// ============================================================================

/// Attribute carrying the owning configuration id.
pub const CONFIG_ATTRIBUTE: &str = "data-config";

/// Attribute carrying the item name.
pub const FILE_ATTRIBUTE: &str = "data-css-file";

/// A tagged `<style>` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleElement {
    /// Owning configuration.
    pub config_id: ConfigId,
    /// Item name: file name or `inline_<index>`.
    pub file: String,
    /// Style text.
    pub css: String,
}

impl StyleElement {
    /// Creates a style element.
    #[must_use]
    pub fn new(config_id: ConfigId, file: impl Into<String>, css: impl Into<String>) -> Self {
        Self {
            config_id,
            file: file.into(),
            css: css.into(),
        }
    }

    /// Serializes as HTML.
    #[must_use]
    pub fn to_html(&self) -> String {
        format!(
            "<style {CONFIG_ATTRIBUTE}=\"{}\" {FILE_ATTRIBUTE}=\"{}\">{}</style>",
            escape_attribute(self.config_id.as_str()),
            escape_attribute(&self.file),
            self.css
        )
    }

    fn is_tagged(&self, config_id: &ConfigId, file: &str) -> bool {
        &self.config_id == config_id && self.file == file
    }
}

/// Where an element is inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Appended to `<head>`.
    Head,
    /// Appended to the document root (no `<head>`).
    Root,
    /// Prepended to `<body>`.
    BodyStart,
    /// Appended to `<body>`.
    BodyEnd,
}

/// The page a content script runs in.
pub trait Document: Send + Sync {
    /// Document URL.
    fn url(&self) -> &str;

    /// Returns `true` if `<head>` exists.
    fn has_head(&self) -> bool;

    /// Returns `true` if `<body>` exists.
    fn has_body(&self) -> bool;

    /// Returns `true` if a style tagged with this config and file exists.
    fn find_style(&self, config_id: &ConfigId, file: &str) -> bool;

    /// Inserts a style now.
    fn insert_style(&mut self, style: StyleElement, placement: Placement);

    /// Inserts a body style once `<body>` appears.
    fn insert_when_body_ready(&mut self, style: StyleElement, placement: Placement);

    /// Removes every element tagged with `config_id`, returning the count.
    fn remove_tagged(&mut self, config_id: &ConfigId) -> usize;

    /// Counts elements tagged with `config_id`.
    fn count_tagged(&self, config_id: &ConfigId) -> usize;
}

// ============================================================================
// MemoryDocument
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Style(StyleElement),
    Markup(String),
}

impl Node {
    fn style(&self) -> Option<&StyleElement> {
        match self {
            Self::Style(style) => Some(style),
            Self::Markup(_) => None,
        }
    }

    fn render(&self, out: &mut String) {
        match self {
            Self::Style(style) => out.push_str(&style.to_html()),
            Self::Markup(markup) => out.push_str(markup),
        }
    }
}

/// A minimal DOM: head, body and root-level children.
#[derive(Debug, Clone)]
pub struct MemoryDocument {
    url: String,
    head: Option<Vec<Node>>,
    body: Option<Vec<Node>>,
    root: Vec<Node>,
    deferred: Vec<(StyleElement, Placement)>,
}

impl MemoryDocument {
    /// A fully parsed document with head and body.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            head: Some(Vec::new()),
            body: Some(Vec::new()),
            root: Vec::new(),
            deferred: Vec::new(),
        }
    }

    /// A document whose body has not been parsed yet.
    #[must_use]
    pub fn loading(url: impl Into<String>) -> Self {
        Self {
            body: None,
            ..Self::new(url)
        }
    }

    /// A document without `<head>`.
    #[must_use]
    pub fn headless(url: impl Into<String>) -> Self {
        Self {
            head: None,
            ..Self::new(url)
        }
    }

    /// Appends raw markup to `<head>`.
    #[must_use]
    pub fn with_head_markup(mut self, markup: impl Into<String>) -> Self {
        if let Some(head) = &mut self.head {
            head.push(Node::Markup(markup.into()));
        }
        self
    }

    /// Appends raw markup to `<body>`.
    #[must_use]
    pub fn with_body_markup(mut self, markup: impl Into<String>) -> Self {
        if let Some(body) = &mut self.body {
            body.push(Node::Markup(markup.into()));
        }
        self
    }

    /// Creates `<body>` and flushes deferred inserts in order.
    pub fn attach_body(&mut self) {
        if self.body.is_none() {
            self.body = Some(Vec::new());
        }
        for (style, placement) in std::mem::take(&mut self.deferred) {
            self.insert_style(style, placement);
        }
    }

    /// Inner HTML of `<head>`, empty if absent.
    #[must_use]
    pub fn head_html(&self) -> String {
        render(self.head.as_deref().unwrap_or_default())
    }

    /// Inner HTML of `<body>`, empty if absent.
    #[must_use]
    pub fn body_html(&self) -> String {
        render(self.body.as_deref().unwrap_or_default())
    }

    /// Root-level children appended outside head and body.
    #[must_use]
    pub fn root_html(&self) -> String {
        render(&self.root)
    }

    /// Placed styles: head, then body, then root.
    #[must_use]
    pub fn styles(&self) -> Vec<&StyleElement> {
        self.nodes().filter_map(Node::style).collect()
    }

    /// Inserts waiting for `<body>`.
    #[must_use]
    pub fn deferred_count(&self) -> usize {
        self.deferred.len()
    }

    fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.head
            .iter()
            .flatten()
            .chain(self.body.iter().flatten())
            .chain(self.root.iter())
    }
}

impl Document for MemoryDocument {
    fn url(&self) -> &str {
        &self.url
    }

    fn has_head(&self) -> bool {
        self.head.is_some()
    }

    fn has_body(&self) -> bool {
        self.body.is_some()
    }

    fn find_style(&self, config_id: &ConfigId, file: &str) -> bool {
        self.styles().iter().any(|s| s.is_tagged(config_id, file))
            || self.deferred.iter().any(|(s, _)| s.is_tagged(config_id, file))
    }

    fn insert_style(&mut self, style: StyleElement, placement: Placement) {
        let node = Node::Style(style);
        match (placement, &mut self.head, &mut self.body) {
            (Placement::Head, Some(head), _) => head.push(node),
            (Placement::BodyStart, _, Some(body)) => body.insert(0, node),
            (Placement::BodyEnd, _, Some(body)) => body.push(node),
            _ => self.root.push(node),
        }
    }

    fn insert_when_body_ready(&mut self, style: StyleElement, placement: Placement) {
        if self.body.is_some() {
            self.insert_style(style, placement);
        } else {
            self.deferred.push((style, placement));
        }
    }

    fn remove_tagged(&mut self, config_id: &ConfigId) -> usize {
        let keep = |node: &Node| node.style().is_none_or(|s| &s.config_id != config_id);
        let placed = self.count_tagged(config_id);
        let deferred = self.deferred.len();

        if let Some(head) = &mut self.head {
            head.retain(keep);
        }
        if let Some(body) = &mut self.body {
            body.retain(keep);
        }
        self.root.retain(keep);
        self.deferred.retain(|(s, _)| &s.config_id != config_id);

        placed + deferred - self.deferred.len()
    }

    fn count_tagged(&self, config_id: &ConfigId) -> usize {
        self.styles()
            .iter()
            .filter(|s| &s.config_id == config_id)
            .count()
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn render(nodes: &[Node]) -> String {
    let mut out = String::new();
    for node in nodes {
        node.render(&mut out);
    }
    out
}

fn escape_attribute(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            _ => out.push(ch),
        }
    }
    out
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn style(id: &str, file: &str) -> StyleElement {
        StyleElement::new(ConfigId::new(id), file, "a{}")
    }

    #[test]
    fn test_style_html() {
        let element = StyleElement::new(ConfigId::new("demo-id"), "style.css", "body{color:red}");
        assert_eq!(
            element.to_html(),
            r#"<style data-config="demo-id" data-css-file="style.css">body{color:red}</style>"#
        );
    }

    #[test]
    fn test_placements() {
        let mut doc = MemoryDocument::new("https://example.com/").with_body_markup("<p>hi</p>");
        doc.insert_style(style("a", "head.css"), Placement::Head);
        doc.insert_style(style("a", "start.css"), Placement::BodyStart);
        doc.insert_style(style("a", "end.css"), Placement::BodyEnd);

        assert!(doc.head_html().contains("head.css"));
        let body = doc.body_html();
        assert!(body.starts_with("<style data-config=\"a\" data-css-file=\"start.css\">"));
        assert!(body.ends_with("</style>") && body.contains("<p>hi</p>"));
        assert_eq!(doc.count_tagged(&ConfigId::new("a")), 3);
    }

    #[test]
    fn test_headless_falls_back_to_root() {
        let mut doc = MemoryDocument::headless("https://example.com/");
        doc.insert_style(style("a", "x.css"), Placement::Head);
        assert!(doc.root_html().contains("x.css"));
    }

    #[test]
    fn test_deferred_until_body() {
        let mut doc = MemoryDocument::loading("https://example.com/");
        doc.insert_when_body_ready(style("a", "x.css"), Placement::BodyEnd);

        assert_eq!(doc.deferred_count(), 1);
        assert!(doc.find_style(&ConfigId::new("a"), "x.css"));
        assert_eq!(doc.count_tagged(&ConfigId::new("a")), 0);

        doc.attach_body();
        assert_eq!(doc.deferred_count(), 0);
        assert!(doc.body_html().contains("x.css"));
    }

    #[test]
    fn test_remove_tagged() {
        let mut doc = MemoryDocument::loading("https://example.com/").with_head_markup("<title>t</title>");
        doc.insert_style(style("a", "1.css"), Placement::Head);
        doc.insert_style(style("b", "2.css"), Placement::Head);
        doc.insert_when_body_ready(style("a", "3.css"), Placement::BodyStart);

        assert_eq!(doc.remove_tagged(&ConfigId::new("a")), 2);
        assert_eq!(doc.count_tagged(&ConfigId::new("a")), 0);
        assert_eq!(doc.count_tagged(&ConfigId::new("b")), 1);
        assert!(doc.head_html().starts_with("<title>t</title>"));
        assert_eq!(doc.deferred_count(), 0);
    }
}
