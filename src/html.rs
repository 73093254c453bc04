//! HTML tree helpers shared by the extractor, standardizer and sanitizer.
//!
//! `scraper` parses into an `ego_tree` of [`Node`]s but offers no way to edit
//! and re-serialize a subtree. Instead of mutating the parsed tree, stages
//! describe their edits through the [`Rewrite`] trait (drop a node, rename a
//! tag, rewrite attributes) and serialize with [`write_node`] /
//! [`write_children`].

use ego_tree::{NodeId, NodeRef};
use scraper::node::Element;
use scraper::{ElementRef, Html, Node, Selector};
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &[
    "script", "style", "xmp", "iframe", "noembed", "noframes", "plaintext", "noscript",
];

/// Edits applied while serializing a tree.
pub trait Rewrite {
    /// Whether `node` (and its subtree) is written at all.
    fn keep(&self, _node: NodeRef<'_, Node>) -> bool {
        true
    }

    fn tag_name<'a>(&self, _node: NodeRef<'_, Node>, element: &'a Element) -> Cow<'a, str> {
        Cow::Borrowed(element.name())
    }

    fn attributes(&self, _node: NodeRef<'_, Node>, element: &Element) -> Vec<(String, String)> {
        element
            .attrs()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect()
    }
}

/// Serializes nodes unchanged.
pub struct Verbatim;

impl Rewrite for Verbatim {}

/// Drops a set of nodes and renames others.
#[derive(Debug, Default, Clone)]
pub struct Pruned {
    pub removed: HashSet<NodeId>,
    pub renamed: HashMap<NodeId, &'static str>,
}

impl Rewrite for Pruned {
    fn keep(&self, node: NodeRef<'_, Node>) -> bool {
        !self.removed.contains(&node.id())
    }

    fn tag_name<'a>(&self, node: NodeRef<'_, Node>, element: &'a Element) -> Cow<'a, str> {
        match self.renamed.get(&node.id()) {
            Some(name) => Cow::Borrowed(*name),
            None => Cow::Borrowed(element.name()),
        }
    }
}

pub fn escape_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn escape_attr(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(c),
        }
    }
    out
}

/// Serialize `node` and its subtree into `out`.
pub fn write_node<R: Rewrite>(node: NodeRef<'_, Node>, rewrite: &R, out: &mut String) {
    if !rewrite.keep(node) {
        return;
    }
    match node.value() {
        Node::Text(text) => {
            let raw_parent = node
                .parent()
                .and_then(|p| p.value().as_element().map(|e| e.name()))
                .is_some_and(|name| RAW_TEXT_ELEMENTS.contains(&name));
            if raw_parent {
                out.push_str(text);
            } else {
                out.push_str(&escape_text(text));
            }
        }
        Node::Element(element) => {
            let name = rewrite.tag_name(node, element);
            out.push('<');
            out.push_str(&name);
            for (attr, value) in rewrite.attributes(node, element) {
                out.push(' ');
                out.push_str(&attr);
                out.push_str("=\"");
                out.push_str(&escape_attr(&value));
                out.push('"');
            }
            out.push('>');
            if VOID_ELEMENTS.contains(&name.as_ref()) {
                return;
            }
            write_children(node, rewrite, out);
            out.push_str("</");
            out.push_str(&name);
            out.push('>');
        }
        Node::Comment(comment) => {
            out.push_str("<!--");
            out.push_str(comment);
            out.push_str("-->");
        }
        Node::Doctype(_) | Node::ProcessingInstruction(_) => {}
        Node::Document | Node::Fragment => write_children(node, rewrite, out),
    }
}

pub fn write_children<R: Rewrite>(node: NodeRef<'_, Node>, rewrite: &R, out: &mut String) {
    for child in node.children() {
        write_node(child, rewrite, out);
    }
}

pub fn outer_html(node: NodeRef<'_, Node>) -> String {
    let mut out = String::new();
    write_node(node, &Verbatim, &mut out);
    out
}

pub fn inner_html(node: NodeRef<'_, Node>) -> String {
    let mut out = String::new();
    write_children(node, &Verbatim, &mut out);
    out
}

/// Top-level nodes of a parsed fragment.
pub fn fragment_nodes(fragment: &Html) -> Vec<NodeRef<'_, Node>> {
    fragment.root_element().children().collect()
}

/// Concatenated text of a subtree.
pub fn text_of(node: NodeRef<'_, Node>) -> String {
    match ElementRef::wrap(node) {
        Some(element) => element.text().collect::<String>(),
        None => node
            .value()
            .as_text()
            .map(|t| String::from(&**t))
            .unwrap_or_default(),
    }
}

pub fn is_whitespace_text(node: NodeRef<'_, Node>) -> bool {
    node.value()
        .as_text()
        .is_some_and(|t| t.trim().is_empty())
}

pub fn element_name<'a>(node: NodeRef<'a, Node>) -> Option<&'a str> {
    node.value().as_element().map(|e| e.name())
}

/// Whether `node` has `ancestor` somewhere above it.
pub fn has_ancestor(node: NodeRef<'_, Node>, ancestor: NodeId) -> bool {
    node.ancestors().any(|a| a.id() == ancestor)
}

/// Parse a selector, mapping the parse error to a message.
pub fn selector(css: &str) -> Result<Selector, String> {
    Selector::parse(css).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbatim_round_trip_keeps_structure() {
        let fragment = Html::parse_fragment(
            r#"<div class="a"><p>one &amp; two</p><img alt="q&quot;" src="x.jpg"><br></div>"#,
        );
        let nodes = fragment_nodes(&fragment);
        assert_eq!(nodes.len(), 1);
        assert_eq!(
            outer_html(nodes[0]),
            r#"<div class="a"><p>one &amp; two</p><img alt="q&quot;" src="x.jpg"><br></div>"#
        );
    }

    #[test]
    fn pruned_drops_and_renames() {
        let fragment = Html::parse_fragment("<div><header>h</header><p>keep</p><span>drop</span></div>");
        let root = fragment_nodes(&fragment)[0];
        let mut pruned = Pruned::default();
        for child in root.children() {
            match element_name(child) {
                Some("span") => {
                    pruned.removed.insert(child.id());
                }
                Some("header") => {
                    pruned.renamed.insert(child.id(), "div");
                }
                _ => {}
            }
        }
        let mut out = String::new();
        write_node(root, &pruned, &mut out);
        assert_eq!(out, "<div><div>h</div><p>keep</p></div>");
    }

    #[test]
    fn script_text_is_not_escaped() {
        let fragment = Html::parse_fragment("<script>if (a < b) {}</script>");
        assert_eq!(
            outer_html(fragment_nodes(&fragment)[0]),
            "<script>if (a < b) {}</script>"
        );
    }
}
