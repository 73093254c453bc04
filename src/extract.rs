//! Main-content extraction with provider-specific selectors.
//!
//! Unwanted elements (navigation, ads, share widgets) are removed first, then
//! the inner markup of the element matching the provider's content selector is
//! returned. Multi-page input (several pages concatenated before parsing)
//! yields several content roots; their children are merged in document order.
//! When nothing matches, the whole `<body>` is used and the result is flagged
//! as degraded.

use crate::config::ProviderProfile;
use crate::error::ExtractError;
use crate::html::{self, Pruned};
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument, warn};

/// Selector settings for one extraction.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub content_selector: String,
    pub selectors_to_remove: Vec<String>,
}

impl From<&ProviderProfile> for ExtractOptions {
    fn from(profile: &ProviderProfile) -> Self {
        Self {
            content_selector: profile.content_selector.clone(),
            selectors_to_remove: profile.selectors_to_remove.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub html: String,
    /// Number of content roots merged into `html` (0 when degraded).
    pub roots: usize,
    /// No content root matched and the full body was used.
    pub degraded: bool,
}

fn parse_selector(css: &str) -> Result<Selector, ExtractError> {
    html::selector(css).map_err(|message| ExtractError::Selector {
        selector: css.to_string(),
        message,
    })
}

/// Isolate the main content of `raw_html`.
#[instrument(level = "info", skip_all, fields(selector = %options.content_selector))]
pub fn extract(raw_html: &str, options: &ExtractOptions) -> Result<Extraction, ExtractError> {
    let content_selector = parse_selector(&options.content_selector)?;
    let removals = options
        .selectors_to_remove
        .iter()
        .map(|css| parse_selector(css))
        .collect::<Result<Vec<_>, _>>()?;

    let document = Html::parse_document(raw_html);

    let mut pruned = Pruned::default();
    for selector in &removals {
        for element in document.select(selector) {
            pruned.removed.insert(element.id());
        }
    }
    debug!(removed = pruned.removed.len(), "Marked unwanted elements");

    let is_removed = |element: &ElementRef<'_>| {
        element
            .ancestors()
            .chain(std::iter::once(**element))
            .any(|node| pruned.removed.contains(&node.id()))
    };

    // Outermost matches only: a root nested in an earlier root is already
    // part of it.
    let mut roots: Vec<ElementRef<'_>> = Vec::new();
    for candidate in document.select(&content_selector) {
        if is_removed(&candidate) {
            continue;
        }
        let nested = roots
            .iter()
            .any(|root: &ElementRef<'_>| html::has_ancestor(*candidate, root.id()));
        if !nested {
            roots.push(candidate);
        }
    }

    if roots.is_empty() {
        warn!("Content selector matched nothing; falling back to full body");
        let body_selector = parse_selector("body")?;
        let body = document
            .select(&body_selector)
            .next()
            .unwrap_or_else(|| document.root_element());
        let mut out = String::new();
        html::write_children(*body, &pruned, &mut out);
        return Ok(Extraction {
            html: out.trim().to_string(),
            roots: 0,
            degraded: true,
        });
    }

    let mut out = String::new();
    for root in &roots {
        html::write_children(**root, &pruned, &mut out);
    }
    if roots.len() > 1 {
        debug!(roots = roots.len(), "Merged multiple content roots");
    }

    Ok(Extraction {
        html: out.trim().to_string(),
        roots: roots.len(),
        degraded: false,
    })
}
