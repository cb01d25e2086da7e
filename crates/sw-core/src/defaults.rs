use std::{str::FromStr, sync::Arc};

use crate::{
    domain::{ChannelId, RoleId, SubscriberRecord},
    errors::Error,
    store::PresenceStore,
    Result,
};

/// How community defaults apply to records that already carry targets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DefaultsPolicy {
    /// Fill unset channel/role once; later default changes never overwrite them.
    #[default]
    Sticky,
    /// Current community defaults win on every observation.
    Reresolve,
}

impl FromStr for DefaultsPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sticky" => Ok(DefaultsPolicy::Sticky),
            "reresolve" | "re-resolve" => Ok(DefaultsPolicy::Reresolve),
            other => Err(Error::Config(format!(
                "DEFAULTS_POLICY must be sticky or reresolve, got {other}"
            ))),
        }
    }
}

/// Effective announcement targets after default resolution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedTargets {
    pub channel_id: Option<ChannelId>,
    pub role_id: Option<RoleId>,
    /// The record's stored targets differ from these.
    pub changed: bool,
}

/// Maps a subscriber to its effective channel and role.
///
/// Resolution only reads; callers decide whether the observation is actionable
/// before calling [`DefaultsResolver::persist`].
pub struct DefaultsResolver {
    store: Arc<dyn PresenceStore>,
    policy: DefaultsPolicy,
}

impl DefaultsResolver {
    pub fn new(store: Arc<dyn PresenceStore>, policy: DefaultsPolicy) -> Self {
        Self { store, policy }
    }

    pub async fn resolve(&self, record: &SubscriberRecord) -> Result<ResolvedTargets> {
        let complete = record.channel_id.is_some() && record.role_id.is_some();
        if self.policy == DefaultsPolicy::Sticky && complete {
            return Ok(targets_of(record));
        }

        let Some(defaults) = self.store.community_defaults(&record.key.community).await? else {
            return Ok(targets_of(record));
        };

        let (channel_id, role_id) = match self.policy {
            DefaultsPolicy::Sticky => (
                record.channel_id.clone().or(defaults.channel_id),
                record.role_id.clone().or(defaults.role_id),
            ),
            DefaultsPolicy::Reresolve => (
                defaults.channel_id.or_else(|| record.channel_id.clone()),
                defaults.role_id.or_else(|| record.role_id.clone()),
            ),
        };
        let changed = channel_id != record.channel_id || role_id != record.role_id;
        Ok(ResolvedTargets {
            channel_id,
            role_id,
            changed,
        })
    }

    /// Write resolved targets onto the record, in the store and in place.
    pub async fn persist(&self, record: &mut SubscriberRecord, targets: &ResolvedTargets) -> Result<()> {
        if !targets.changed {
            return Ok(());
        }
        self.store
            .set_targets(&record.key, targets.channel_id.as_ref(), targets.role_id.as_ref())
            .await?;
        tracing::debug!(
            subscriber = %record.key,
            channel = ?targets.channel_id,
            role = ?targets.role_id,
            "resolved announcement targets from community defaults"
        );
        record.channel_id = targets.channel_id.clone();
        record.role_id = targets.role_id.clone();
        Ok(())
    }
}

fn targets_of(record: &SubscriberRecord) -> ResolvedTargets {
    ResolvedTargets {
        channel_id: record.channel_id.clone(),
        role_id: record.role_id.clone(),
        changed: false,
    }
}
