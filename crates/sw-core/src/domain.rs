use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};

use crate::errors::Error;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Chat community (Discord guild) id.
    CommunityId
);
string_id!(
    /// Community member id. Subscribers are keyed by the member they are linked to.
    MemberId
);
string_id!(
    /// Announcement channel id.
    ChannelId
);
string_id!(
    /// Role granted while a subscriber is live.
    RoleId
);
string_id!(MessageId);

/// A stable reference to a posted announcement.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
}

/// Streaming platform a subscriber is tracked on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Platform {
    Twitch,
    YouTube,
    Kick,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Twitch => "twitch",
            Platform::YouTube => "youtube",
            Platform::Kick => "kick",
        }
    }

    /// Label shown in announcement headers.
    pub fn label(&self) -> &'static str {
        match self {
            Platform::Twitch => "🎮 Twitch",
            Platform::YouTube => "📺 YouTube",
            Platform::Kick => "🔥 Kick",
        }
    }

    /// Whether presence for this platform arrives by push (webhook) rather than polling.
    pub fn supports_push(&self) -> bool {
        matches!(self, Platform::Twitch)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "twitch" => Ok(Platform::Twitch),
            "youtube" => Ok(Platform::YouTube),
            "kick" => Ok(Platform::Kick),
            other => Err(Error::Config(format!("unknown platform: {other}"))),
        }
    }
}

/// Primary key of a persisted subscriber record.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberKey {
    pub community: CommunityId,
    pub subscriber: MemberId,
    pub platform: Platform,
}

impl SubscriberKey {
    pub fn new(community: CommunityId, subscriber: MemberId, platform: Platform) -> Self {
        Self {
            community,
            subscriber,
            platform,
        }
    }

    pub fn announcement_key(&self) -> AnnouncementKey {
        AnnouncementKey {
            community: self.community.clone(),
            subscriber: self.subscriber.clone(),
        }
    }
}

impl fmt::Display for SubscriberKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.community, self.subscriber, self.platform)
    }
}

/// Key of a live announcement. One subscriber has at most one per community,
/// regardless of how many platforms they are tracked on.
///
/// A member tracked on several platforms therefore shares one message and one
/// role: an offline on any of them revokes the role and tears the message down,
/// even while a sibling record is still flagged live. That sibling's next
/// online or poll reading posts a fresh announcement.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AnnouncementKey {
    pub community: CommunityId,
    pub subscriber: MemberId,
}

impl fmt::Display for AnnouncementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.community, self.subscriber)
    }
}

/// One tracked streaming account linked to a community member.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriberRecord {
    pub key: SubscriberKey,
    pub account_id: String,
    pub account_username: String,
    pub channel_id: Option<ChannelId>,
    pub role_id: Option<RoleId>,
    pub category_filter: Option<String>,
    pub is_live: bool,
}

impl SubscriberRecord {
    pub fn new(
        key: SubscriberKey,
        account_id: impl Into<String>,
        account_username: impl Into<String>,
    ) -> Self {
        Self {
            key,
            account_id: account_id.into(),
            account_username: account_username.into(),
            channel_id: None,
            role_id: None,
            category_filter: None,
            is_live: false,
        }
    }

    /// The configured category filter, ignoring blank values.
    pub fn category_filter(&self) -> Option<&str> {
        self.category_filter
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
    }

    /// Category filter check. An observation without a category never counts
    /// as a mismatch (offline events carry none).
    pub fn accepts_category(&self, category: Option<&str>) -> bool {
        let Some(filter) = self.category_filter() else {
            return true;
        };
        let Some(category) = category.map(str::trim).filter(|c| !c.is_empty()) else {
            return true;
        };
        filter.eq_ignore_ascii_case(category)
    }
}

/// Per-community fallback targets, written by configuration commands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommunityDefaults {
    pub community: CommunityId,
    pub channel_id: Option<ChannelId>,
    pub role_id: Option<RoleId>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Presence {
    Online,
    Offline,
}

/// Normalized live/offline signal from either ingress path.
#[derive(Clone, Debug, PartialEq)]
pub struct PresenceObservation {
    pub platform: Platform,
    pub account_id: String,
    pub account_name: Option<String>,
    pub presence: Presence,
    pub title: Option<String>,
    pub thumbnail_url: Option<String>,
    pub category: Option<String>,
    pub stream_url: Option<String>,
    pub observed_at: DateTime<Utc>,
}

impl PresenceObservation {
    pub fn new(platform: Platform, account_id: impl Into<String>, presence: Presence) -> Self {
        Self {
            platform,
            account_id: account_id.into(),
            account_name: None,
            presence,
            title: None,
            thumbnail_url: None,
            category: None,
            stream_url: None,
            observed_at: Utc::now(),
        }
    }

    pub fn online(platform: Platform, account_id: impl Into<String>) -> Self {
        Self::new(platform, account_id, Presence::Online)
    }

    pub fn offline(platform: Platform, account_id: impl Into<String>) -> Self {
        Self::new(platform, account_id, Presence::Offline)
    }

    pub fn is_live(&self) -> bool {
        self.presence == Presence::Online
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Fill fields the ingress snapshot left empty from a platform query.
    pub fn fill_from(&mut self, status: &LiveStatus) {
        fn fill(slot: &mut Option<String>, value: &Option<String>) {
            if slot.is_none() {
                slot.clone_from(value);
            }
        }
        fill(&mut self.account_name, &status.account_name);
        fill(&mut self.title, &status.title);
        fill(&mut self.thumbnail_url, &status.thumbnail_url);
        fill(&mut self.category, &status.category);
        fill(&mut self.stream_url, &status.url);
    }
}

/// Live metadata as reported by a streaming platform query.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LiveStatus {
    pub is_live: bool,
    pub account_name: Option<String>,
    pub title: Option<String>,
    pub url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub category: Option<String>,
}

impl LiveStatus {
    pub fn offline() -> Self {
        Self::default()
    }

    pub fn into_observation(self, platform: Platform, account_id: &str) -> PresenceObservation {
        let presence = if self.is_live {
            Presence::Online
        } else {
            Presence::Offline
        };
        PresenceObservation {
            platform,
            account_id: account_id.to_string(),
            account_name: self.account_name,
            presence,
            title: self.title,
            thumbnail_url: self.thumbnail_url,
            category: self.category,
            stream_url: self.url,
            observed_at: Utc::now(),
        }
    }
}

/// Community as seen by the chat platform.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Community {
    pub id: CommunityId,
    pub name: String,
}

/// Community member as seen by the chat platform.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Member {
    pub id: MemberId,
    pub display_name: String,
}
