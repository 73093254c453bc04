//! Community icon lookup.

use crate::config::{FetchConfig, ImageConfig};
use crate::error::MediaError;
use crate::retry::RetryPolicy;
use serde::Deserialize;
use tracing::{debug, instrument};

/// Resolves a community identifier to the URL of its icon.
pub trait IconLookup {
    /// `Ok(None)` when the community exists but has no icon.
    async fn community_icon(&self, community: &str) -> Result<Option<String>, MediaError>;
}

#[derive(Debug, Deserialize)]
struct AboutResponse {
    data: AboutData,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AboutData {
    community_icon: Option<String>,
    icon_img: Option<String>,
}

/// Looks icons up through the public `about.json` endpoint.
pub struct RedditIconLookup {
    client: reqwest::Client,
    base: String,
    policy: RetryPolicy,
}

impl RedditIconLookup {
    pub fn new(base: &str, images: &ImageConfig, fetch: &FetchConfig) -> Result<Self, MediaError> {
        let client = reqwest::Client::builder()
            .timeout(images.request_timeout())
            .user_agent(fetch.user_agent.as_str())
            .build()
            .map_err(|e| MediaError::Client(e.to_string()))?;
        Ok(Self {
            client,
            base: base.trim_end_matches('/').to_string(),
            policy: RetryPolicy::from_config(fetch),
        })
    }
}

fn clean_icon_url(raw: &str) -> Option<String> {
    let url = raw.trim().replace("&amp;", "&");
    (!url.is_empty()).then_some(url)
}

impl IconLookup for RedditIconLookup {
    #[instrument(level = "info", skip(self))]
    async fn community_icon(&self, community: &str) -> Result<Option<String>, MediaError> {
        let url = format!("{}/r/{}/about.json", self.base, community);
        let client = &self.client;
        let url_ref = url.as_str();

        let about = self
            .policy
            .run("community_icon", move || async move {
                let response = client
                    .get(url_ref)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| MediaError::from_reqwest(url_ref, e))?;
                response
                    .json::<AboutResponse>()
                    .await
                    .map_err(|e| MediaError::Payload {
                        url: url_ref.to_string(),
                        message: e.to_string(),
                    })
            })
            .await
            .map_err(|failure| failure.last)?;

        let icon = about
            .data
            .community_icon
            .as_deref()
            .and_then(clean_icon_url)
            .or_else(|| about.data.icon_img.as_deref().and_then(clean_icon_url));
        debug!(?icon, "Community icon lookup finished");
        Ok(icon)
    }
}
