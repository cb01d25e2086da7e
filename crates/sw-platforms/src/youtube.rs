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

const SEARCH_URL: &str = "https://www.googleapis.com/youtube/v3/search";

/// YouTube Data API client. Accounts are channel ids; presence is polled.
pub struct YouTubeClient {
    api_key: String,
    http: reqwest::Client,
    search_url: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: VideoRef,
    #[serde(default)]
    snippet: Option<Snippet>,
}

#[derive(Debug, Deserialize)]
struct VideoRef {
    #[serde(rename = "videoId", default)]
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Snippet {
    #[serde(default)]
    title: Option<String>,
    #[serde(rename = "channelTitle", default)]
    channel_title: Option<String>,
    #[serde(default)]
    thumbnails: Option<Thumbnails>,
}

#[derive(Debug, Deserialize)]
struct Thumbnails {
    #[serde(default)]
    high: Option<Thumbnail>,
    #[serde(default)]
    medium: Option<Thumbnail>,
    #[serde(default)]
    default: Option<Thumbnail>,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
}

impl YouTubeClient {
    pub fn new(api_key: String, timeout: Duration) -> Result<Self> {
        Ok(Self {
            api_key,
            http: http_client(timeout)?,
            search_url: SEARCH_URL.to_string(),
        })
    }

    pub fn with_search_url(mut self, url: impl Into<String>) -> Self {
        self.search_url = url.into();
        self
    }
}

fn status_from_search(resp: SearchResponse) -> LiveStatus {
    let Some(item) = resp.items.into_iter().find(|i| i.id.video_id.is_some()) else {
        return LiveStatus::offline();
    };
    let url = item
        .id
        .video_id
        .map(|id| format!("https://youtube.com/watch?v={id}"));
    let snippet = item.snippet;
    let thumbnail = snippet
        .as_ref()
        .and_then(|s| s.thumbnails.as_ref())
        .and_then(|t| t.high.as_ref().or(t.medium.as_ref()).or(t.default.as_ref()))
        .map(|t| t.url.clone());
    let (title, name) = match snippet {
        Some(s) => (s.title, s.channel_title),
        None => (None, None),
    };
    LiveStatus {
        is_live: true,
        account_name: non_blank(name),
        title: non_blank(title),
        url,
        thumbnail_url: thumbnail,
        category: None,
    }
}

#[async_trait]
impl StreamingPlatform for YouTubeClient {
    fn platform(&self) -> Platform {
        Platform::YouTube
    }

    async fn live_status(&self, account_id: &str, _account_username: &str) -> Result<LiveStatus> {
        let resp = self
            .http
            .get(&self.search_url)
            .query(&[
                ("part", "snippet"),
                ("channelId", account_id),
                ("type", "video"),
                ("eventType", "live"),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| request_error("youtube", e))?;
        if !resp.status().is_success() {
            return Err(error_for_status("youtube", resp).await);
        }
        let body: SearchResponse = resp
            .json()
            .await
            .map_err(|e| Error::External(format!("youtube json error: {e}")))?;
        Ok(status_from_search(body))
    }

    async fn resolve_account(&self, username: &str) -> Result<Option<String>> {
        // Operators register the channel id directly.
        Ok(Some(username.trim().to_string()).filter(|s| !s.is_empty()))
    }

    async fn subscribe(&self, _account_id: &str, _kind: SubscriptionKind) -> Result<SubscribeOutcome> {
        Err(Error::External("youtube: push subscriptions unsupported".into()))
    }
}
