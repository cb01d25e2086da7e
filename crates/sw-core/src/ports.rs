use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;

use crate::{
    announce::render::Announcement,
    domain::{ChannelId, Community, CommunityId, LiveStatus, Member, MemberId, MessageRef, Platform, RoleId},
    Result,
};

/// Hexagonal port for the chat platform (Discord today).
///
/// `fetch_*` return `Ok(None)` when the platform reports the entity as missing;
/// everything else that goes wrong is an error.
#[async_trait]
pub trait ChatPort: Send + Sync {
    async fn fetch_community(&self, community: &CommunityId) -> Result<Option<Community>>;

    async fn fetch_member(
        &self,
        community: &CommunityId,
        member: &MemberId,
    ) -> Result<Option<Member>>;

    async fn add_role(&self, community: &CommunityId, member: &MemberId, role: &RoleId)
        -> Result<()>;

    async fn remove_role(
        &self,
        community: &CommunityId,
        member: &MemberId,
        role: &RoleId,
    ) -> Result<()>;

    async fn send_announcement(
        &self,
        channel: &ChannelId,
        announcement: &Announcement,
    ) -> Result<MessageRef>;

    async fn edit_announcement(&self, message: &MessageRef, announcement: &Announcement)
        -> Result<()>;
}

/// Push subscription kinds a platform can deliver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SubscriptionKind {
    Online,
    Offline,
}

impl SubscriptionKind {
    /// EventSub subscription type name.
    pub fn event_type(&self) -> &'static str {
        match self {
            SubscriptionKind::Online => "stream.online",
            SubscriptionKind::Offline => "stream.offline",
        }
    }
}

impl fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_type())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscribeOutcome {
    Created,
    /// The platform already holds an equivalent subscription.
    AlreadyExists,
}

/// Hexagonal port for a streaming platform (Twitch, YouTube, Kick).
#[async_trait]
pub trait StreamingPlatform: Send + Sync {
    fn platform(&self) -> Platform;

    fn supports_push(&self) -> bool {
        self.platform().supports_push()
    }

    /// Query the current live status and metadata of an account.
    async fn live_status(&self, account_id: &str, account_username: &str) -> Result<LiveStatus>;

    /// Resolve an operator-supplied username into the platform account id.
    async fn resolve_account(&self, username: &str) -> Result<Option<String>>;

    /// Register a push subscription for the account.
    async fn subscribe(&self, account_id: &str, kind: SubscriptionKind) -> Result<SubscribeOutcome>;
}

/// The set of streaming platform adapters available at runtime.
#[derive(Clone, Default)]
pub struct PlatformRegistry {
    inner: HashMap<Platform, Arc<dyn StreamingPlatform>>,
}

impl PlatformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, adapter: Arc<dyn StreamingPlatform>) -> Self {
        self.insert(adapter);
        self
    }

    pub fn insert(&mut self, adapter: Arc<dyn StreamingPlatform>) {
        self.inner.insert(adapter.platform(), adapter);
    }

    pub fn get(&self, platform: Platform) -> Option<Arc<dyn StreamingPlatform>> {
        self.inner.get(&platform).cloned()
    }

    pub fn supports_push(&self, platform: Platform) -> bool {
        self.inner
            .get(&platform)
            .map(|p| p.supports_push())
            .unwrap_or(false)
    }

    pub fn platforms(&self) -> Vec<Platform> {
        let mut out: Vec<_> = self.inner.keys().copied().collect();
        out.sort();
        out
    }

    /// Wrap every adapter so each outbound call is bounded by `timeout`.
    pub fn bounded(self, timeout: std::time::Duration) -> Self {
        let inner = self
            .inner
            .into_iter()
            .map(|(platform, adapter)| {
                let wrapped: Arc<dyn StreamingPlatform> =
                    Arc::new(crate::bounded::BoundedPlatform::new(adapter, timeout));
                (platform, wrapped)
            })
            .collect();
        Self { inner }
    }
}
