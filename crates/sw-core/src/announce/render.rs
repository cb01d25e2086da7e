//! Announcement content: header line plus a single embed.

use chrono::{DateTime, Utc};

use crate::domain::{LiveStatus, Platform, PresenceObservation, SubscriberRecord};

pub const EMBED_COLOR: u32 = 0x9146FF;
pub const DEFAULT_TITLE: &str = "Live now!";
pub const WATCH_FIELD_NAME: &str = "▶️ Watch Now";

/// Everything known about a live session, merged from ingress snapshots and
/// platform re-queries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamMetadata {
    pub display_name: String,
    pub title: Option<String>,
    pub url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub category: Option<String>,
}

impl StreamMetadata {
    pub fn from_observation(record: &SubscriberRecord, obs: &PresenceObservation) -> Self {
        let display_name = obs
            .account_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| record.account_username.clone());
        Self {
            display_name,
            title: obs.title.clone(),
            url: obs.stream_url.clone(),
            thumbnail_url: obs.thumbnail_url.clone(),
            category: obs.category.clone(),
        }
    }

    /// Overlay fresher values from a platform query; gaps keep the old value.
    pub fn merge(&mut self, status: &LiveStatus) {
        fn overlay(slot: &mut Option<String>, fresh: &Option<String>) {
            if let Some(v) = fresh.as_ref().filter(|v| !v.trim().is_empty()) {
                *slot = Some(v.clone());
            }
        }
        overlay(&mut self.title, &status.title);
        overlay(&mut self.url, &status.url);
        overlay(&mut self.thumbnail_url, &status.thumbnail_url);
        overlay(&mut self.category, &status.category);
    }

    pub fn has_title(&self) -> bool {
        self.title
            .as_deref()
            .map(|t| !t.trim().is_empty())
            .unwrap_or(false)
    }
}

/// Rendered, platform-neutral announcement. Adapters map it onto their message format.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Announcement {
    pub header: String,
    pub title: String,
    pub url: String,
    pub image_url: String,
    pub category: Option<String>,
    pub color: u32,
    pub timestamp: DateTime<Utc>,
}

pub fn render(
    platform: Platform,
    account_username: &str,
    meta: &StreamMetadata,
    fallback_image: &str,
    now: DateTime<Utc>,
) -> Announcement {
    let url = meta
        .url
        .clone()
        .filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| default_stream_url(platform, account_username, &meta.display_name));
    let title = meta
        .title
        .clone()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_TITLE.to_string());

    Announcement {
        header: format!(
            "## {} is now live on {}!",
            meta.display_name,
            platform.label()
        ),
        title,
        url,
        image_url: thumbnail(platform, meta.thumbnail_url.as_deref(), fallback_image),
        category: meta.category.clone().filter(|c| !c.trim().is_empty()),
        color: EMBED_COLOR,
        timestamp: now,
    }
}

/// Where to watch when the platform did not hand us a URL.
pub fn default_stream_url(platform: Platform, account_username: &str, display_name: &str) -> String {
    match platform {
        Platform::Twitch => format!("https://twitch.tv/{}", first_non_empty(account_username, display_name)),
        Platform::YouTube => format!("https://youtube.com/channel/{account_username}"),
        Platform::Kick => format!("https://kick.com/{account_username}"),
    }
}

/// Resolve the embed image. Twitch hands out templated URLs.
pub fn thumbnail(platform: Platform, raw: Option<&str>, fallback: &str) -> String {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return fallback.to_string();
    };
    match platform {
        Platform::Twitch => raw.replace("{width}", "1280").replace("{height}", "720"),
        _ => raw.to_string(),
    }
}

fn first_non_empty<'a>(a: &'a str, b: &'a str) -> &'a str {
    if a.trim().is_empty() {
        b
    } else {
        a
    }
}
