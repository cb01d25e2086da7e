//! Persisted presence state: subscriber records and community defaults.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;

use crate::{
    domain::{ChannelId, CommunityDefaults, CommunityId, MemberId, Platform, RoleId, SubscriberKey, SubscriberRecord},
    Result,
};

/// Storage port for subscriber records and community defaults.
///
/// `compare_and_set_live` is the only way the live flag changes, so a writer
/// that decided on a stale read loses instead of overwriting.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Insert the record unless its key already exists. Returns whether it was inserted.
    async fn insert_if_absent(&self, record: &SubscriberRecord) -> Result<bool>;

    async fn get(&self, key: &SubscriberKey) -> Result<Option<SubscriberRecord>>;

    async fn find_by_account(
        &self,
        platform: Platform,
        account_id: &str,
    ) -> Result<Vec<SubscriberRecord>>;

    async fn list_all(&self) -> Result<Vec<SubscriberRecord>>;

    async fn list_community(&self, community: &CommunityId) -> Result<Vec<SubscriberRecord>>;

    /// Persist resolved announcement channel and role.
    async fn set_targets(
        &self,
        key: &SubscriberKey,
        channel_id: Option<&ChannelId>,
        role_id: Option<&RoleId>,
    ) -> Result<()>;

    /// Flip `is_live` from `expected` to `live`. Returns false when the stored
    /// value was not `expected` (or the record is gone).
    async fn compare_and_set_live(
        &self,
        key: &SubscriberKey,
        expected: bool,
        live: bool,
    ) -> Result<bool>;

    /// Point every record of a community at the given channel and/or role.
    /// `None` leaves that field as stored. Returns the number of records updated.
    async fn retarget_community(
        &self,
        community: &CommunityId,
        channel_id: Option<&ChannelId>,
        role_id: Option<&RoleId>,
    ) -> Result<usize>;

    /// Set (or clear) the category filter on every platform record of a subscriber.
    async fn set_category_filter(
        &self,
        community: &CommunityId,
        subscriber: &MemberId,
        filter: Option<&str>,
    ) -> Result<usize>;

    /// Delete every platform record of a subscriber. Returns the removed keys.
    async fn remove(
        &self,
        community: &CommunityId,
        subscriber: &MemberId,
    ) -> Result<Vec<SubscriberKey>>;

    async fn community_defaults(&self, community: &CommunityId)
        -> Result<Option<CommunityDefaults>>;

    async fn set_community_defaults(&self, defaults: &CommunityDefaults) -> Result<()>;
}
