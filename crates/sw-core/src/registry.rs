use std::sync::Arc;

use crate::{
    announce::AnnouncementManager,
    domain::{
        AnnouncementKey, ChannelId, CommunityDefaults, CommunityId, MemberId, Platform, RoleId,
        SubscriberKey, SubscriberRecord,
    },
    errors::Error,
    locks::KeyLocks,
    ports::PlatformRegistry,
    store::PresenceStore,
    subscriptions::{EstablishReport, SubscriptionManager},
    Result,
};

/// An operator request to start tracking an account.
#[derive(Clone, Debug)]
pub struct NewAccount {
    pub community: CommunityId,
    pub subscriber: MemberId,
    pub platform: Platform,
    /// Username (Twitch login, Kick slug) or channel id (YouTube).
    pub username: String,
    pub channel_id: Option<ChannelId>,
    pub role_id: Option<RoleId>,
    pub category_filter: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Registration {
    pub record: SubscriberRecord,
    /// False when the key was already tracked; the stored record is left as is.
    pub inserted: bool,
    pub subscriptions: Option<EstablishReport>,
}

/// Account management used by configuration commands.
pub struct AccountRegistry {
    store: Arc<dyn PresenceStore>,
    platforms: PlatformRegistry,
    subscriptions: Arc<SubscriptionManager>,
    announcements: Arc<AnnouncementManager>,
    locks: Arc<KeyLocks<AnnouncementKey>>,
}

impl AccountRegistry {
    pub fn new(
        store: Arc<dyn PresenceStore>,
        platforms: PlatformRegistry,
        subscriptions: Arc<SubscriptionManager>,
        announcements: Arc<AnnouncementManager>,
        locks: Arc<KeyLocks<AnnouncementKey>>,
    ) -> Self {
        Self {
            store,
            platforms,
            subscriptions,
            announcements,
            locks,
        }
    }

    pub async fn register_account(&self, req: NewAccount) -> Result<Registration> {
        let username = req.username.trim();
        if username.is_empty() {
            return Err(Error::Config("username must not be empty".into()));
        }
        let platform = self
            .platforms
            .get(req.platform)
            .ok_or_else(|| Error::Config(format!("{} is not configured", req.platform)))?;

        let push = platform.supports_push();
        let account_id = if push {
            platform
                .resolve_account(username)
                .await?
                .ok_or_else(|| Error::NotFound(format!("{} user {username}", req.platform)))?
        } else {
            username.to_string()
        };

        let key = SubscriberKey::new(req.community, req.subscriber, req.platform);
        let mut record = SubscriberRecord::new(key, account_id, username);
        record.channel_id = req.channel_id;
        record.role_id = req.role_id;
        record.category_filter = req
            .category_filter
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty());

        let inserted = self.store.insert_if_absent(&record).await?;
        if inserted {
            tracing::info!(subscriber = %record.key, account = %record.account_id, "account registered");
        } else {
            tracing::info!(subscriber = %record.key, "account already tracked");
        }

        let subscriptions = if push {
            match self
                .subscriptions
                .establish(record.key.platform, &record.account_id)
                .await
            {
                Ok(report) => Some(report),
                Err(e) => {
                    tracing::warn!(subscriber = %record.key, "subscription setup failed: {e}");
                    None
                }
            }
        } else {
            None
        };

        Ok(Registration {
            record,
            inserted,
            subscriptions,
        })
    }

    /// Stop tracking every platform account of a subscriber and drop its announcement.
    pub async fn remove_account(
        &self,
        community: &CommunityId,
        subscriber: &MemberId,
    ) -> Result<Vec<SubscriberKey>> {
        let subject = AnnouncementKey {
            community: community.clone(),
            subscriber: subscriber.clone(),
        };
        let guard = self.locks.lock(&subject).await;
        let removed = self.store.remove(community, subscriber).await?;
        if !removed.is_empty() {
            self.announcements.teardown(&guard);
            tracing::info!(%community, %subscriber, records = removed.len(), "account removed");
        }
        Ok(removed)
    }

    pub async fn set_category_filter(
        &self,
        community: &CommunityId,
        subscriber: &MemberId,
        filter: Option<String>,
    ) -> Result<usize> {
        let filter = filter.map(|f| f.trim().to_string()).filter(|f| !f.is_empty());
        let updated = self
            .store
            .set_category_filter(community, subscriber, filter.as_deref())
            .await?;
        if updated == 0 {
            return Err(Error::NotFound(format!("no tracked account for {subscriber}")));
        }
        Ok(updated)
    }

    pub async fn list_accounts(&self, community: &CommunityId) -> Result<Vec<SubscriberRecord>> {
        self.store.list_community(community).await
    }

    /// Make `channel` the community's default announcement channel and move every
    /// tracked account onto it. Returns the number of records updated.
    pub async fn set_announcement_channel(
        &self,
        community: &CommunityId,
        channel: ChannelId,
    ) -> Result<usize> {
        let mut defaults = self.defaults_of(community).await?;
        defaults.channel_id = Some(channel.clone());
        self.store.set_community_defaults(&defaults).await?;
        let updated = self
            .store
            .retarget_community(community, Some(&channel), None)
            .await?;
        tracing::info!(%community, %channel, records = updated, "announcement channel set");
        Ok(updated)
    }

    /// Make `role` the community's default live role and apply it to every
    /// tracked account. Returns the number of records updated.
    pub async fn set_live_role(&self, community: &CommunityId, role: RoleId) -> Result<usize> {
        let mut defaults = self.defaults_of(community).await?;
        defaults.role_id = Some(role.clone());
        self.store.set_community_defaults(&defaults).await?;
        let updated = self
            .store
            .retarget_community(community, None, Some(&role))
            .await?;
        tracing::info!(%community, %role, records = updated, "live role set");
        Ok(updated)
    }

    async fn defaults_of(&self, community: &CommunityId) -> Result<CommunityDefaults> {
        Ok(self
            .store
            .community_defaults(community)
            .await?
            .unwrap_or_else(|| CommunityDefaults {
                community: community.clone(),
                channel_id: None,
                role_id: None,
            }))
    }

    pub async fn set_community_defaults(&self, defaults: CommunityDefaults) -> Result<()> {
        self.store.set_community_defaults(&defaults).await?;
        tracing::info!(community = %defaults.community, channel = ?defaults.channel_id, role = ?defaults.role_id, "community defaults updated");
        Ok(())
    }
}
