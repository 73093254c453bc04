//! Markup sanitizing.
//!
//! Executable and styling content is removed outright. Presentational and
//! scripting attributes are renamed to `data-sanitized-*` instead of being
//! dropped, so the original value can still be inspected.
//!
//! The only frames that survive sit inside the whitelisted embed container
//! and point at the internal video proxy or a recognized embed link, which is
//! what the media resolver generates. Style blocks never survive. Raw-text
//! containers (`noscript` and friends) are dropped whole, since the parser
//! keeps their content as unparsed text.
//! Sanitizing already sanitized markup changes nothing.

use crate::config::MediaConfig;
use crate::html::{self, Rewrite};
use crate::media::providers;
use ego_tree::NodeRef;
use scraper::node::Element;
use scraper::{Html, Node};
use std::borrow::Cow;
use std::cell::Cell;
use tracing::{debug, instrument};

const ALWAYS_REMOVED: [&str; 10] = [
    "script",
    "style",
    "object",
    "embed",
    "noscript",
    "noembed",
    "noframes",
    "xmp",
    "plaintext",
    "template",
];
const PRESERVED_DATA: [&str; 2] = ["data-src", "data-srcset"];
const SANITIZED_PREFIX: &str = "data-sanitized-";
const URL_ATTRIBUTES: [&str; 5] = ["href", "src", "action", "formaction", "xlink:href"];

pub struct Sanitizer {
    container_class: String,
    proxy_path: String,
    removed: Cell<usize>,
    renamed: Cell<usize>,
}

fn has_class(element: &Element, class: &str) -> bool {
    element
        .attr("class")
        .is_some_and(|value| value.split_ascii_whitespace().any(|c| c == class))
}

/// `javascript:` URL, allowing the whitespace and control characters
/// browsers ignore.
fn is_script_url(value: &str) -> bool {
    let compact: String = value
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .take(11)
        .collect();
    compact.to_ascii_lowercase().starts_with("javascript:")
}

impl Sanitizer {
    pub fn new(media: &MediaConfig) -> Self {
        Self {
            container_class: media.embed_container_class.clone(),
            proxy_path: media.video_proxy_path.trim_end_matches('/').to_string(),
            removed: Cell::new(0),
            renamed: Cell::new(0),
        }
    }

    fn is_container(&self, node: NodeRef<'_, Node>) -> bool {
        node.value()
            .as_element()
            .is_some_and(|el| el.name() == "div" && has_class(el, &self.container_class))
    }

    fn in_container(&self, node: NodeRef<'_, Node>) -> bool {
        node.ancestors().any(|a| self.is_container(a))
    }

    /// A frame source the media resolver could have generated.
    fn is_known_frame_src(&self, src: &str) -> bool {
        let src = src.trim();
        let proxied = src
            .strip_prefix(self.proxy_path.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .is_some_and(|rest| {
                !rest.is_empty()
                    && !rest.contains("..")
                    && rest.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            });
        proxied || providers::is_embed_link(src)
    }

    /// Sanitize an HTML fragment.
    #[instrument(level = "debug", skip_all, fields(bytes = input.len()))]
    pub fn sanitize(&self, input: &str) -> String {
        self.removed.set(0);
        self.renamed.set(0);
        let fragment = Html::parse_fragment(input);
        let mut out = String::with_capacity(input.len());
        html::write_children(*fragment.root_element(), self, &mut out);
        debug!(
            removed = self.removed.get(),
            renamed = self.renamed.get(),
            "Sanitized markup"
        );
        out
    }
}

impl Rewrite for Sanitizer {
    fn keep(&self, node: NodeRef<'_, Node>) -> bool {
        let Some(element) = node.value().as_element() else {
            return true;
        };
        let name = element.name();
        let keep = if ALWAYS_REMOVED.contains(&name) {
            false
        } else if name == "iframe" {
            self.in_container(node)
                && element.attr("src").is_some_and(|src| self.is_known_frame_src(src))
        } else {
            true
        };
        if !keep {
            self.removed.set(self.removed.get() + 1);
        }
        keep
    }

    fn tag_name<'a>(&self, _node: NodeRef<'_, Node>, element: &'a Element) -> Cow<'a, str> {
        Cow::Borrowed(element.name())
    }

    fn attributes(&self, node: NodeRef<'_, Node>, element: &Element) -> Vec<(String, String)> {
        let container = self.is_container(node);
        let mut out: Vec<(String, String)> = Vec::new();
        let mut push = |name: String, value: String| {
            if !out.iter().any(|(existing, _)| *existing == name) {
                out.push((name, value));
            }
        };

        for (name, value) in element.attrs() {
            let lowered = name.to_ascii_lowercase();
            let renamed = match lowered.as_str() {
                "class" if container => {
                    push(name.to_string(), self.container_class.clone());
                    continue;
                }
                "class" | "id" | "style" => Some(format!("{SANITIZED_PREFIX}{lowered}")),
                n if n.starts_with(SANITIZED_PREFIX) || PRESERVED_DATA.contains(&n) => None,
                n if n.starts_with("data-") => {
                    Some(format!("{SANITIZED_PREFIX}{}", &n["data-".len()..]))
                }
                n if n.starts_with("on") => Some(format!("{SANITIZED_PREFIX}{n}")),
                n if URL_ATTRIBUTES.contains(&n) && is_script_url(value) => {
                    Some(format!("{SANITIZED_PREFIX}{}", n.replace(':', "-")))
                }
                _ => None,
            };
            match renamed {
                Some(new_name) => {
                    self.renamed.set(self.renamed.get() + 1);
                    push(new_name, value.to_string());
                }
                None => push(name.to_string(), value.to_string()),
            }
        }
        out
    }
}

/// Sanitize `input`, keeping only generated frames inside the embed container.
pub fn sanitize(input: &str, media: &MediaConfig) -> String {
    Sanitizer::new(media).sanitize(input)
}
