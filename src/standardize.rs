//! Canonical article markup.
//!
//! Every article leaves this stage shaped as
//!
//! ```text
//! <article>
//!   <header>…</header>      optional, at most one
//!   <section>…</section>    main content
//!   <section>…</section>    optional, comments
//!   <footer>…</footer>      optional
//! </article>
//! ```
//!
//! Running the standardizer over its own output yields the same markup: an
//! outer `<article>` is unwrapped, the main `<section>` is unwrapped and the
//! existing header and footer are reused.

use crate::error::{Classify, ErrorKind, MediaError};
use crate::fetcher::Renderer;
use crate::html::{self, Pruned};
use crate::media::icons::IconLookup;
use crate::media::{MediaResolver, providers};
use crate::models::{HeaderElement, RawArticle};
use ego_tree::{NodeId, NodeRef};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Node};
use std::collections::HashSet;
use tracing::{debug, info, instrument, warn};
use url::Url;

static COMMENTS_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\W*(\d+\s+)?comments?\b").expect("valid regex"));

/// Markers of unrendered templates leaking into attribute values.
const TEMPLATE_ARTIFACTS: [&str; 6] = ["{{", "}}", "{%", "%7B%7B", "%7b%7b", "${"];

const HEADINGS: [&str; 6] = ["h1", "h2", "h3", "h4", "h5", "h6"];

#[derive(Debug, Clone, Copy, Default)]
pub struct StandardizeOptions {
    pub generate_header_image: bool,
    pub add_source_footer: bool,
}

#[derive(Debug, Clone)]
pub struct Standardized {
    pub html: String,
    /// The element generated for `<header>`; `None` when the input already
    /// had a header or nothing was generated.
    pub header: HeaderElement,
    /// The input could not be restructured and was wrapped as-is.
    pub degraded: bool,
}

/// Where the content nodes of the parsed input live.
struct Layout<'a> {
    /// Parent of `nodes`; empty-ancestor collapsing stops here.
    container: NodeRef<'a, Node>,
    nodes: Vec<NodeRef<'a, Node>>,
}

fn content_nodes(fragment: &Html) -> Option<Layout<'_>> {
    let root = *fragment.root_element();
    let meaningful: Vec<_> = root
        .children()
        .filter(|n| !html::is_whitespace_text(*n))
        .collect();
    if let [only] = meaningful.as_slice() {
        if html::element_name(*only) == Some("article") {
            return Some(Layout {
                container: *only,
                nodes: only.children().collect(),
            });
        }
    }
    if meaningful.is_empty() {
        return None;
    }
    Some(Layout {
        container: root,
        nodes: root.children().collect(),
    })
}

fn is_heading(node: NodeRef<'_, Node>) -> bool {
    html::element_name(node).is_some_and(|name| HEADINGS.contains(&name))
}

fn mentions_comments(text: &str) -> bool {
    COMMENTS_HEADING.is_match(text.trim())
}

fn has_comments_marker(node: NodeRef<'_, Node>) -> bool {
    node.value().as_element().is_some_and(|el| {
        ["class", "id"]
            .iter()
            .filter_map(|attr| el.attr(attr))
            .any(|value| value.to_ascii_lowercase().contains("comment"))
    })
}

/// A block whose leading text announces comments, either in a heading or in
/// a block marked as comments by its class or id. A paragraph opening with
/// "Comment:" alone does not count.
fn is_comments_block(node: NodeRef<'_, Node>) -> bool {
    let Some(first_text) = node.descendants().find(|n| {
        n.value()
            .as_text()
            .is_some_and(|t| !t.trim().is_empty())
    }) else {
        return false;
    };
    let text = first_text.value().as_text().map(|t| t.trim()).unwrap_or_default();
    if !mentions_comments(text) {
        return false;
    }
    let in_heading = first_text
        .ancestors()
        .take_while(|a| a.id() != node.id())
        .any(is_heading);
    in_heading || has_comments_marker(node)
}

fn descendants<'a>(nodes: &'a [NodeRef<'a, Node>]) -> impl Iterator<Item = NodeRef<'a, Node>> + 'a {
    nodes.iter().flat_map(|n| n.descendants())
}

fn find_element<'a>(nodes: &'a [NodeRef<'a, Node>], name: &str) -> Vec<NodeRef<'a, Node>> {
    descendants(nodes)
        .filter(|n| html::element_name(*n) == Some(name))
        .collect()
}

fn has_template_artifacts(candidate: &str) -> bool {
    TEMPLATE_ARTIFACTS.iter().any(|marker| candidate.contains(marker))
}

/// First image or link in the body, resolved against the article URL.
fn first_media_reference(nodes: &[NodeRef<'_, Node>], base: Option<&Url>) -> Option<String> {
    descendants(nodes).find_map(|node| {
        let element = node.value().as_element()?;
        let raw = match element.name() {
            "img" => element
                .attr("src")
                .filter(|s| !s.trim().starts_with("data:"))
                .or_else(|| element.attr("data-src")),
            "a" => element.attr("href"),
            _ => None,
        }?
        .trim();
        let lowered = raw.to_ascii_lowercase();
        if raw.is_empty()
            || raw.starts_with('#')
            || lowered.starts_with("javascript:")
            || lowered.starts_with("mailto:")
            || lowered.starts_with("data:")
        {
            return None;
        }
        match base {
            Some(base) => base.join(raw).ok().map(|u| u.to_string()),
            None => Url::parse(raw).ok().map(|u| u.to_string()),
        }
    })
}

/// Mark `node` removed, then every ancestor below `stop` left without content.
fn remove_collapsing(node: NodeRef<'_, Node>, stop: NodeId, removed: &mut HashSet<NodeId>) {
    removed.insert(node.id());
    let mut current = node.parent();
    while let Some(parent) = current {
        if parent.id() == stop {
            break;
        }
        let empty = parent
            .children()
            .all(|c| removed.contains(&c.id()) || html::is_whitespace_text(c));
        if !empty {
            break;
        }
        removed.insert(parent.id());
        current = parent.parent();
    }
}

/// Remove body occurrences of `video_id`, returning how many were found.
fn remove_video_duplicates(layout: &Layout<'_>, video_id: &str, removed: &mut HashSet<NodeId>) -> usize {
    let hits: Vec<_> = descendants(&layout.nodes)
        .filter(|node| {
            node.value().as_element().is_some_and(|el| {
                ["href", "src", "data-src"]
                    .iter()
                    .filter_map(|attr| el.attr(attr))
                    .any(|value| providers::video_id(value).as_deref() == Some(video_id))
            })
        })
        .collect();
    for node in &hits {
        remove_collapsing(*node, layout.container.id(), removed);
    }
    hits.len()
}

pub fn source_footer(url: &str) -> String {
    let label = Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()))
        .unwrap_or_else(|| url.to_string());
    format!(
        r#"<footer><p><a href="{}" rel="noopener noreferrer">Source: {}</a></p></footer>"#,
        html::escape_attr(url),
        html::escape_text(&label)
    )
}

/// Wrap the untouched input when it cannot be restructured.
fn degraded(original: &str, article: &RawArticle, options: StandardizeOptions) -> Standardized {
    let mut out = String::from("<article>");
    out.push_str(original);
    if options.add_source_footer && !original.contains("<footer") {
        out.push_str(&source_footer(&article.url));
    }
    out.push_str("</article>");
    Standardized {
        html: out,
        header: HeaderElement::None,
        degraded: true,
    }
}

/// Assemble canonical markup, generating a header element when asked to.
///
/// Only skip-worthy media errors are returned; everything else degrades the
/// output instead of failing the article.
#[instrument(level = "info", skip_all, fields(url = %article.url))]
pub async fn standardize<R: Renderer, I: IconLookup>(
    resolver: &MediaResolver<R, I>,
    extracted_html: &str,
    article: &RawArticle,
    options: StandardizeOptions,
    header_hint: Option<&str>,
) -> Result<Standardized, MediaError> {
    let fragment = Html::parse_fragment(extracted_html);
    let Some(layout) = content_nodes(&fragment) else {
        if !extracted_html.trim().is_empty() {
            warn!("Content did not parse into any nodes; wrapping as-is");
        }
        return Ok(degraded(extracted_html, article, options));
    };

    let mut body = Pruned::default();

    let headers = find_element(&layout.nodes, "header");
    let existing_header = headers.first().copied();
    for extra in headers.iter().skip(1) {
        body.renamed.insert(extra.id(), "div");
    }
    let footers = find_element(&layout.nodes, "footer");
    let existing_footer = footers.first().copied();
    for extra in footers.iter().skip(1) {
        body.renamed.insert(extra.id(), "div");
    }
    // The lifted elements are written with their own subtree intact.
    let lifted = body.clone();
    body.removed.extend(existing_header.map(|n| n.id()));
    body.removed.extend(existing_footer.map(|n| n.id()));

    let mut header_html = None;
    let mut generated = HeaderElement::None;

    if let Some(header) = existing_header {
        debug!("Keeping existing header");
        let mut out = String::new();
        html::write_node(header, &lifted, &mut out);
        header_html = Some(out);
    } else if options.generate_header_image {
        let base = Url::parse(&article.url).ok();
        let candidate = header_hint
            .map(str::trim)
            .filter(|hint| !hint.is_empty())
            .map(String::from)
            .or_else(|| first_media_reference(&layout.nodes, base.as_ref()))
            .unwrap_or_else(|| article.url.clone());
        let candidate = if has_template_artifacts(&candidate) {
            warn!(%candidate, "Header candidate contains template artifacts; using article URL");
            article.url.clone()
        } else {
            candidate
        };

        match resolver.resolve(&candidate, &article.title).await {
            Ok(element) => generated = element,
            Err(e) if e.kind() == ErrorKind::SkipWorthy => return Err(e),
            Err(e) => warn!(error = %e, "Header generation failed; continuing without header"),
        }

        if let HeaderElement::Embed {
            video_id: Some(ref id),
            ..
        } = generated
        {
            let removed = remove_video_duplicates(&layout, id, &mut body.removed);
            if removed > 0 {
                info!(video_id = %id, removed, "Removed duplicate video references from body");
            }
        }
        header_html = generated
            .to_html(&article.title)
            .map(|inner| format!("<header>{inner}</header>"));
    }

    let mut main = String::new();
    let mut comments = String::new();
    let mut in_comments = false;
    for node in &layout.nodes {
        let node = *node;
        if html::is_whitespace_text(node) || body.removed.contains(&node.id()) {
            continue;
        }
        if in_comments {
            html::write_node(node, &body, &mut comments);
            continue;
        }
        match html::element_name(node) {
            Some("section") if is_comments_block(node) => {
                html::write_children(node, &body, &mut comments)
            }
            Some("section") => html::write_children(node, &body, &mut main),
            Some(_) if is_heading(node) && mentions_comments(&html::text_of(node)) => {
                in_comments = true;
                html::write_node(node, &body, &mut comments);
            }
            Some("div" | "aside") if is_comments_block(node) => {
                html::write_node(node, &body, &mut comments)
            }
            _ => html::write_node(node, &body, &mut main),
        }
    }

    let mut out = String::from("<article>");
    if let Some(header) = header_html {
        out.push_str(&header);
    }
    out.push_str("<section>");
    out.push_str(main.trim());
    out.push_str("</section>");
    if !comments.trim().is_empty() {
        out.push_str("<section>");
        out.push_str(comments.trim());
        out.push_str("</section>");
    }
    if let Some(footer) = existing_footer {
        html::write_node(footer, &lifted, &mut out);
    } else if options.add_source_footer {
        out.push_str(&source_footer(&article.url));
    }
    out.push_str("</article>");

    Ok(Standardized {
        html: out,
        header: generated,
        degraded: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MediaConfig, StrategyKind};
    use crate::media::tests::{FakeIcons, resolver_with};
    use chrono::Utc;

    fn article(url: &str) -> RawArticle {
        RawArticle {
            url: url.to_string(),
            title: "Launch day".to_string(),
            published_at: Utc::now(),
            provider_id: "example".to_string(),
            raw_html: String::new(),
            header_image_hint: None,
        }
    }

    fn opts(generate_header_image: bool, add_source_footer: bool) -> StandardizeOptions {
        StandardizeOptions {
            generate_header_image,
            add_source_footer,
        }
    }

    /// Resolver that can only produce embeds, so no test touches the network.
    fn offline_resolver() -> MediaResolver<crate::fetcher::tests::ScriptedRenderer, FakeIcons> {
        let config = MediaConfig {
            strategies: vec![StrategyKind::EmbedLink, StrategyKind::Video],
            ..MediaConfig::default()
        };
        resolver_with(FakeIcons::default(), config)
    }

    #[tokio::test]
    async fn wraps_plain_content_with_footer() {
        let result = standardize(
            &offline_resolver(),
            "<p>Hello</p>\n<p>World</p>",
            &article("https://www.example.com/a"),
            opts(false, true),
            None,
        )
        .await
        .unwrap();
        assert_eq!(
            result.html,
            r#"<article><section><p>Hello</p><p>World</p></section><footer><p><a href="https://www.example.com/a" rel="noopener noreferrer">Source: example.com</a></p></footer></article>"#
        );
        assert!(!result.degraded);
    }

    #[tokio::test]
    async fn video_header_replaces_body_occurrence() {
        let body = r#"<p>Watch this:</p><p><a href="https://youtu.be/abc12345678">video</a></p><p>More text</p>"#;
        let result = standardize(
            &offline_resolver(),
            body,
            &article("https://www.youtube.com/watch?v=abc12345678"),
            opts(true, false),
            None,
        )
        .await
        .unwrap();
        assert!(result.html.starts_with("<article><header>"));
        assert!(result.html.contains("/video-proxy/abc12345678"));
        assert_eq!(result.html.matches("abc12345678").count(), 1);
        assert!(result.html.contains("<p>Watch this:</p><p>More text</p>"));
        assert!(matches!(result.header, HeaderElement::Embed { .. }));
    }

    #[tokio::test]
    async fn duplicate_removal_keeps_ancestors_with_other_content() {
        let body = r#"<figure><iframe src="https://www.youtube.com/embed/abc12345678"></iframe><figcaption>Demo</figcaption></figure><div><div><a href="https://youtu.be/abc12345678"></a></div></div><p>end</p>"#;
        let result = standardize(
            &offline_resolver(),
            body,
            &article("https://www.youtube.com/watch?v=abc12345678"),
            opts(true, false),
            None,
        )
        .await
        .unwrap();
        assert!(result.html.contains("<figure><figcaption>Demo</figcaption></figure>"));
        assert!(!result.html.contains("<div><div>"));
        assert!(result.html.contains("<p>end</p>"));
    }

    #[tokio::test]
    async fn existing_header_is_kept_and_never_doubled() {
        let body = r#"<header><h1>Title</h1></header><p>Body</p><header>second</header>"#;
        let result = standardize(
            &offline_resolver(),
            body,
            &article("https://www.youtube.com/watch?v=abc12345678"),
            opts(true, false),
            None,
        )
        .await
        .unwrap();
        assert_eq!(result.html.matches("<header").count(), 1);
        assert!(result.html.starts_with("<article><header><h1>Title</h1></header>"));
        assert!(result.html.contains("<div>second</div>"));
        assert!(result.header.is_none());
    }

    #[tokio::test]
    async fn comments_split_into_trailing_section() {
        let body = r#"<p>Story</p><h2>12 Comments</h2><ul><li>first!</li></ul>"#;
        let result = standardize(
            &offline_resolver(),
            body,
            &article("https://example.com/a"),
            opts(false, false),
            None,
        )
        .await
        .unwrap();
        assert_eq!(
            result.html,
            "<article><section><p>Story</p></section><section><h2>12 Comments</h2><ul><li>first!</li></ul></section></article>"
        );
    }

    #[tokio::test]
    async fn labelled_column_stays_in_main_section() {
        let body = r#"<p>Story</p><div><p>Comment: the budget misses the point</p><p>Argument</p></div><aside class="comment-thread"><p>2 comments</p><p>great</p></aside>"#;
        let result = standardize(
            &offline_resolver(),
            body,
            &article("https://example.com/a"),
            opts(false, false),
            None,
        )
        .await
        .unwrap();
        assert_eq!(
            result.html,
            r#"<article><section><p>Story</p><div><p>Comment: the budget misses the point</p><p>Argument</p></div></section><section><aside class="comment-thread"><p>2 comments</p><p>great</p></aside></section></article>"#
        );
    }

    #[tokio::test]
    async fn standardizing_twice_changes_nothing() {
        let resolver = offline_resolver();
        let article = article("https://www.youtube.com/watch?v=abc12345678");
        let body = r#"<p>Intro <a href="https://youtu.be/abc12345678">clip</a></p><div class="comments"><h3>Comments</h3><p>nice</p></div><footer>by staff</footer>"#;
        let once = standardize(&resolver, body, &article, opts(true, true), None)
            .await
            .unwrap();
        let twice = standardize(&resolver, &once.html, &article, opts(true, true), None)
            .await
            .unwrap();
        assert_eq!(once.html, twice.html);
        assert_eq!(twice.html.matches("<header").count(), 1);
        assert_eq!(twice.html.matches("<footer").count(), 1);
        assert_eq!(twice.html.matches("<article").count(), 1);
    }

    #[tokio::test]
    async fn hint_with_template_artifacts_falls_back_to_article_url() {
        let result = standardize(
            &offline_resolver(),
            "<p>x</p>",
            &article("https://www.youtube.com/watch?v=abc12345678"),
            opts(true, false),
            Some("https://cdn.example.com/{{ image }}.jpg"),
        )
        .await
        .unwrap();
        assert!(result.html.contains("/video-proxy/abc12345678"));
    }

    #[tokio::test]
    async fn hint_takes_precedence_over_body_media() {
        let result = standardize(
            &offline_resolver(),
            r#"<p><img src="/inline.jpg"></p>"#,
            &article("https://example.com/a"),
            opts(true, false),
            Some("https://youtu.be/zzzzzzzzzzz"),
        )
        .await
        .unwrap();
        assert!(result.html.contains("/video-proxy/zzzzzzzzzzz"));
    }

    #[tokio::test]
    async fn skip_worthy_media_errors_propagate() {
        let icons = FakeIcons {
            status: Some(404),
            ..FakeIcons::default()
        };
        let resolver = resolver_with(icons, MediaConfig {
            strategies: vec![StrategyKind::CommunityThumbnail],
            ..MediaConfig::default()
        });
        let err = standardize(
            &resolver,
            "<p>x</p>",
            &article("https://www.reddit.com/r/gone/comments/1/"),
            opts(true, false),
            None,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SkipWorthy);
    }

    #[tokio::test]
    async fn blank_input_degrades_but_keeps_footer() {
        let result = standardize(
            &offline_resolver(),
            "   ",
            &article("https://example.com/a"),
            opts(true, true),
            None,
        )
        .await
        .unwrap();
        assert!(result.degraded);
        assert!(result.html.starts_with("<article>"));
        assert!(result.html.contains("Source: example.com"));
    }

    #[test]
    fn comments_pattern() {
        assert!(mentions_comments("Comments"));
        assert!(mentions_comments("  42 comments"));
        assert!(mentions_comments("— Comment"));
        assert!(!mentions_comments("Commentary on the budget"));
        assert!(!mentions_comments("No comments were made"));
    }
}
