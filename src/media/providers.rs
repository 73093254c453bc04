//! URL patterns for the providers the header strategies recognize.

use crate::html::escape_attr;
use once_cell::sync::Lazy;
use regex::Regex;

/// Compact embed URLs served for a single post.
static EMBED_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^https?://(?:embed\.reddit\.com|(?:www\.)?redditmedia\.com)/r/[A-Za-z0-9_]+/comments/[A-Za-z0-9]+",
    )
    .expect("valid regex")
});

static COMMUNITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^https?://(?:[a-z0-9-]+\.)?reddit\.com/r/([A-Za-z0-9_]{2,21})(?:[/?#]|$)")
        .expect("valid regex")
});

static VIDEO_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:youtube(?:-nocookie)?\.com/(?:watch\?(?:[^#]*&)?v=|embed/|shorts/|live/|v/)|youtu\.be/)([A-Za-z0-9_-]{11})(?:[^A-Za-z0-9_-]|$)",
    )
    .expect("valid regex")
});

pub fn is_embed_link(url: &str) -> bool {
    EMBED_LINK.is_match(url)
}

/// Community name encoded in the URL, e.g. `rust` for `/r/rust/...`.
pub fn community(url: &str) -> Option<String> {
    COMMUNITY.captures(url).map(|c| c[1].to_string())
}

/// The 11 character video id encoded in a video URL.
pub fn video_id(url: &str) -> Option<String> {
    VIDEO_ID.captures(url).map(|c| c[1].to_string())
}

// Attributes are listed alphabetically, matching how parsed markup is
// re-serialized.

/// Frame for an embed-link URL, wrapped in the whitelisted container.
pub fn embed_frame(url: &str, container_class: &str) -> String {
    format!(
        r#"<div class="{}"><iframe allowfullscreen="" loading="lazy" src="{}"></iframe></div>"#,
        escape_attr(container_class),
        escape_attr(url)
    )
}

/// Player frame pointing at the internal video proxy, never the third party.
pub fn video_frame(video_id: &str, proxy_path: &str, container_class: &str) -> String {
    format!(
        r#"<div class="{}"><iframe allowfullscreen="" loading="lazy" src="{}/{}"></iframe></div>"#,
        escape_attr(container_class),
        escape_attr(proxy_path.trim_end_matches('/')),
        escape_attr(video_id)
    )
}
