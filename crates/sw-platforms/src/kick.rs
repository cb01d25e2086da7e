use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use sw_core::{
    domain::{LiveStatus, Platform},
    errors::Error,
    ports::{StreamingPlatform, SubscribeOutcome, SubscriptionKind},
    Result,
};

use crate::{error_for_status, http_client, non_blank, request_error};

const CHANNELS_URL: &str = "https://kick.com/api/v1/channels";

/// Kick public channel API. Accounts are channel slugs; presence is polled.
pub struct KickClient {
    http: reqwest::Client,
    channels_url: String,
}

#[derive(Debug, Default, Deserialize)]
struct Channel {
    #[serde(default)]
    slug: Option<String>,
    #[serde(default)]
    user: Option<KickUser>,
    #[serde(default)]
    live: Option<bool>,
    #[serde(default)]
    stream: Option<KickStream>,
    #[serde(default)]
    livestream: Option<KickLivestream>,
}

#[derive(Debug, Deserialize)]
struct KickUser {
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KickStream {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    thumbnail_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KickLivestream {
    #[serde(default)]
    is_live: Option<bool>,
    #[serde(default)]
    session_title: Option<String>,
    #[serde(default)]
    thumbnail: Option<KickThumbnail>,
    #[serde(default)]
    categories: Vec<KickCategory>,
}

#[derive(Debug, Deserialize)]
struct KickThumbnail {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KickCategory {
    #[serde(default)]
    name: Option<String>,
}

impl KickClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: http_client(timeout)?,
            channels_url: CHANNELS_URL.to_string(),
        })
    }

    pub fn with_channels_url(mut self, url: impl Into<String>) -> Self {
        self.channels_url = url.into();
        self
    }
}

/// The channel payload has carried presence in two shapes over time; accept both.
fn status_from_channel(channel: Channel, slug: &str) -> LiveStatus {
    let slug = non_blank(channel.slug).unwrap_or_else(|| slug.to_string());
    let url = Some(format!("https://kick.com/{slug}"));
    let name = channel.user.and_then(|u| non_blank(u.username));

    if let Some(ls) = channel.livestream.filter(|ls| ls.is_live.unwrap_or(true)) {
        return LiveStatus {
            is_live: true,
            account_name: name,
            title: non_blank(ls.session_title),
            url,
            thumbnail_url: ls.thumbnail.and_then(|t| non_blank(t.url)),
            category: ls.categories.into_iter().find_map(|c| non_blank(c.name)),
        };
    }
    if channel.live.unwrap_or(false) {
        let stream = channel.stream;
        return LiveStatus {
            is_live: true,
            account_name: name,
            title: stream.as_ref().and_then(|s| non_blank(s.title.clone())),
            url,
            thumbnail_url: stream.and_then(|s| non_blank(s.thumbnail_url)),
            category: None,
        };
    }
    LiveStatus::offline()
}

#[async_trait]
impl StreamingPlatform for KickClient {
    fn platform(&self) -> Platform {
        Platform::Kick
    }

    async fn live_status(&self, account_id: &str, _account_username: &str) -> Result<LiveStatus> {
        let slug = account_id.trim();
        let resp = self
            .http
            .get(format!("{}/{slug}", self.channels_url))
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| request_error("kick", e))?;
        if !resp.status().is_success() {
            return Err(error_for_status("kick", resp).await);
        }
        let channel: Channel = resp
            .json()
            .await
            .map_err(|e| Error::External(format!("kick json error: {e}")))?;
        Ok(status_from_channel(channel, slug))
    }

    async fn resolve_account(&self, username: &str) -> Result<Option<String>> {
        Ok(Some(username.trim().to_lowercase()).filter(|s| !s.is_empty()))
    }

    async fn subscribe(&self, _account_id: &str, _kind: SubscriptionKind) -> Result<SubscribeOutcome> {
        Err(Error::External("kick: push subscriptions unsupported".into()))
    }
}
