use std::{
    collections::{BTreeMap, HashMap},
    sync::Mutex,
};

use async_trait::async_trait;

use crate::{
    domain::{ChannelId, CommunityDefaults, CommunityId, MemberId, Platform, RoleId, SubscriberKey, SubscriberRecord},
    errors::Error,
    store::PresenceStore,
    Result,
};

/// In-process store. Used by tests and by embedders that do not need durability.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<SubscriberKey, SubscriberRecord>>,
    defaults: Mutex<HashMap<CommunityId, CommunityDefaults>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<SubscriberKey, SubscriberRecord>>> {
        self.records
            .lock()
            .map_err(|_| Error::External("memory store poisoned".to_string()))
    }

    fn defaults(&self) -> Result<std::sync::MutexGuard<'_, HashMap<CommunityId, CommunityDefaults>>> {
        self.defaults
            .lock()
            .map_err(|_| Error::External("memory store poisoned".to_string()))
    }
}

#[async_trait]
impl PresenceStore for MemoryStore {
    async fn insert_if_absent(&self, record: &SubscriberRecord) -> Result<bool> {
        let mut records = self.records()?;
        if records.contains_key(&record.key) {
            return Ok(false);
        }
        records.insert(record.key.clone(), record.clone());
        Ok(true)
    }

    async fn get(&self, key: &SubscriberKey) -> Result<Option<SubscriberRecord>> {
        Ok(self.records()?.get(key).cloned())
    }

    async fn find_by_account(
        &self,
        platform: Platform,
        account_id: &str,
    ) -> Result<Vec<SubscriberRecord>> {
        Ok(self
            .records()?
            .values()
            .filter(|r| r.key.platform == platform && r.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn list_all(&self) -> Result<Vec<SubscriberRecord>> {
        Ok(self.records()?.values().cloned().collect())
    }

    async fn list_community(&self, community: &CommunityId) -> Result<Vec<SubscriberRecord>> {
        Ok(self
            .records()?
            .values()
            .filter(|r| &r.key.community == community)
            .cloned()
            .collect())
    }

    async fn set_targets(
        &self,
        key: &SubscriberKey,
        channel_id: Option<&ChannelId>,
        role_id: Option<&RoleId>,
    ) -> Result<()> {
        let mut records = self.records()?;
        let record = records
            .get_mut(key)
            .ok_or_else(|| Error::NotFound(format!("subscriber {key}")))?;
        record.channel_id = channel_id.cloned();
        record.role_id = role_id.cloned();
        Ok(())
    }

    async fn compare_and_set_live(
        &self,
        key: &SubscriberKey,
        expected: bool,
        live: bool,
    ) -> Result<bool> {
        let mut records = self.records()?;
        match records.get_mut(key) {
            Some(record) if record.is_live == expected => {
                record.is_live = live;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn retarget_community(
        &self,
        community: &CommunityId,
        channel_id: Option<&ChannelId>,
        role_id: Option<&RoleId>,
    ) -> Result<usize> {
        let mut records = self.records()?;
        let mut changed = 0usize;
        for record in records.values_mut().filter(|r| &r.key.community == community) {
            if let Some(channel) = channel_id {
                record.channel_id = Some(channel.clone());
            }
            if let Some(role) = role_id {
                record.role_id = Some(role.clone());
            }
            changed += 1;
        }
        Ok(changed)
    }

    async fn set_category_filter(
        &self,
        community: &CommunityId,
        subscriber: &MemberId,
        filter: Option<&str>,
    ) -> Result<usize> {
        let mut records = self.records()?;
        let mut changed = 0usize;
        for record in records
            .values_mut()
            .filter(|r| &r.key.community == community && &r.key.subscriber == subscriber)
        {
            record.category_filter = filter.map(str::to_string);
            changed += 1;
        }
        Ok(changed)
    }

    async fn remove(
        &self,
        community: &CommunityId,
        subscriber: &MemberId,
    ) -> Result<Vec<SubscriberKey>> {
        let mut records = self.records()?;
        let keys: Vec<_> = records
            .keys()
            .filter(|k| &k.community == community && &k.subscriber == subscriber)
            .cloned()
            .collect();
        for key in keys.iter() {
            records.remove(key);
        }
        Ok(keys)
    }

    async fn community_defaults(
        &self,
        community: &CommunityId,
    ) -> Result<Option<CommunityDefaults>> {
        Ok(self.defaults()?.get(community).cloned())
    }

    async fn set_community_defaults(&self, defaults: &CommunityDefaults) -> Result<()> {
        self.defaults()?
            .insert(defaults.community.clone(), defaults.clone());
        Ok(())
    }
}
