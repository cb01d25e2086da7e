use std::{collections::BTreeSet, sync::Arc};

use crate::{
    domain::Platform,
    errors::Error,
    ports::{PlatformRegistry, StreamingPlatform, SubscribeOutcome, SubscriptionKind},
    store::PresenceStore,
    Result,
};

/// Result of registering one subscription kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KindOutcome {
    Created,
    AlreadyExists,
    Failed(String),
}

impl KindOutcome {
    pub fn is_ok(&self) -> bool {
        !matches!(self, KindOutcome::Failed(_))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EstablishReport {
    pub platform: Platform,
    pub account_id: String,
    pub online: KindOutcome,
    pub offline: KindOutcome,
}

impl EstablishReport {
    pub fn is_complete(&self) -> bool {
        self.online.is_ok() && self.offline.is_ok()
    }
}

/// Keeps push subscriptions in place for tracked accounts.
pub struct SubscriptionManager {
    platforms: PlatformRegistry,
}

impl SubscriptionManager {
    pub fn new(platforms: PlatformRegistry) -> Self {
        Self { platforms }
    }

    /// Register online and offline subscriptions for an account. Each kind is
    /// attempted on its own; an existing subscription counts as success.
    pub async fn establish(&self, platform: Platform, account_id: &str) -> Result<EstablishReport> {
        let adapter = self
            .platforms
            .get(platform)
            .filter(|p| p.supports_push())
            .ok_or_else(|| Error::Config(format!("{platform} has no push delivery configured")))?;

        let online = register(adapter.as_ref(), account_id, SubscriptionKind::Online).await;
        let offline = register(adapter.as_ref(), account_id, SubscriptionKind::Offline).await;
        Ok(EstablishReport {
            platform,
            account_id: account_id.to_string(),
            online,
            offline,
        })
    }

    /// Re-establish subscriptions for every push-capable tracked account,
    /// once per distinct account.
    pub async fn resubscribe_all(&self, store: &Arc<dyn PresenceStore>) -> Result<Vec<EstablishReport>> {
        let accounts: BTreeSet<(Platform, String)> = store
            .list_all()
            .await?
            .into_iter()
            .filter(|r| self.platforms.supports_push(r.key.platform))
            .map(|r| (r.key.platform, r.account_id))
            .collect();

        let mut reports = Vec::with_capacity(accounts.len());
        for (platform, account_id) in accounts {
            match self.establish(platform, &account_id).await {
                Ok(report) => reports.push(report),
                Err(e) => tracing::warn!(%platform, account = %account_id, "resubscribe skipped: {e}"),
            }
        }
        let incomplete = reports.iter().filter(|r| !r.is_complete()).count();
        tracing::info!(accounts = reports.len(), incomplete, "startup resubscription finished");
        Ok(reports)
    }
}

async fn register(adapter: &dyn StreamingPlatform, account_id: &str, kind: SubscriptionKind) -> KindOutcome {
    let platform = adapter.platform();
    match adapter.subscribe(account_id, kind).await {
        Ok(SubscribeOutcome::Created) => {
            tracing::info!(%platform, account = %account_id, %kind, "push subscription created");
            KindOutcome::Created
        }
        Ok(SubscribeOutcome::AlreadyExists) => {
            tracing::debug!(%platform, account = %account_id, %kind, "push subscription already exists");
            KindOutcome::AlreadyExists
        }
        Err(e) => {
            tracing::warn!(%platform, account = %account_id, %kind, "push subscription failed: {e}");
            KindOutcome::Failed(e.to_string())
        }
    }
}
