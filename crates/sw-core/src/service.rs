//! Wiring and the surface exposed to the outside: webhook ingestion, poll
//! ticks, account registration and lifecycle.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    announce::AnnouncementManager,
    config::Config,
    defaults::{DefaultsPolicy, DefaultsResolver},
    eventsub::{WebhookAdapter, WebhookHeaders, WebhookReply, WebhookSettings},
    locks::KeyLocks,
    polling::{PollAdapter, PollSummary},
    ports::{ChatPort, PlatformRegistry},
    reconciler::StateReconciler,
    registry::{AccountRegistry, NewAccount, Registration},
    store::PresenceStore,
    subscriptions::{EstablishReport, SubscriptionManager},
    Result,
};

#[derive(Clone, Debug)]
pub struct ServiceSettings {
    pub poll_interval: Duration,
    pub refresh_interval: Duration,
    pub defaults_policy: DefaultsPolicy,
    pub fallback_image: String,
    pub webhook: WebhookSettings,
}

impl ServiceSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval,
            refresh_interval: config.refresh_interval,
            defaults_policy: config.defaults_policy,
            fallback_image: config.fallback_thumbnail_url.clone(),
            webhook: WebhookSettings {
                secret: config.eventsub_secret.clone(),
                max_message_age: config.eventsub_max_message_age,
            },
        }
    }
}

pub struct PresenceService {
    store: Arc<dyn PresenceStore>,
    announcements: Arc<AnnouncementManager>,
    poller: Arc<PollAdapter>,
    webhook: Arc<WebhookAdapter>,
    subscriptions: Arc<SubscriptionManager>,
    registry: AccountRegistry,
    poll_interval: Duration,
    cancel: CancellationToken,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

impl PresenceService {
    pub fn new(
        store: Arc<dyn PresenceStore>,
        chat: Arc<dyn ChatPort>,
        platforms: PlatformRegistry,
        settings: ServiceSettings,
    ) -> Self {
        let locks = Arc::new(KeyLocks::new());
        let announcements = Arc::new(AnnouncementManager::new(
            chat.clone(),
            platforms.clone(),
            settings.refresh_interval,
            settings.fallback_image,
        ));
        let reconciler = Arc::new(StateReconciler::new(
            store.clone(),
            chat,
            platforms.clone(),
            DefaultsResolver::new(store.clone(), settings.defaults_policy),
            announcements.clone(),
            locks.clone(),
        ));
        let subscriptions = Arc::new(SubscriptionManager::new(platforms.clone()));
        let registry = AccountRegistry::new(
            store.clone(),
            platforms.clone(),
            subscriptions.clone(),
            announcements.clone(),
            locks,
        );

        Self {
            poller: Arc::new(PollAdapter::new(store.clone(), platforms, reconciler.clone())),
            webhook: Arc::new(WebhookAdapter::new(reconciler, settings.webhook)),
            store,
            announcements,
            subscriptions,
            registry,
            poll_interval: settings.poll_interval,
            cancel: CancellationToken::new(),
            poll_task: Mutex::new(None),
        }
    }

    /// Authenticate, parse and hand off one webhook delivery. Returns the reply
    /// to send without waiting for reconciliation.
    pub fn ingest_webhook_event(&self, headers: &WebhookHeaders, body: &[u8]) -> WebhookReply {
        self.webhook.handle(headers, body)
    }

    /// Run one poll tick now.
    pub async fn ingest_poll_tick(&self) -> PollSummary {
        self.poller.tick().await
    }

    pub async fn register_account(&self, req: NewAccount) -> Result<Registration> {
        self.registry.register_account(req).await
    }

    pub fn accounts(&self) -> &AccountRegistry {
        &self.registry
    }

    pub fn webhook(&self) -> Arc<WebhookAdapter> {
        self.webhook.clone()
    }

    pub fn announcements(&self) -> &Arc<AnnouncementManager> {
        &self.announcements
    }

    /// Re-establish push subscriptions for everything tracked.
    pub async fn resubscribe_all(&self) -> Result<Vec<EstablishReport>> {
        self.subscriptions.resubscribe_all(&self.store).await
    }

    /// Start the background poll loop. Calling it twice keeps the first loop.
    pub fn start_polling(&self) {
        let Ok(mut slot) = self.poll_task.lock() else {
            tracing::error!("poll task slot poisoned");
            return;
        };
        if slot.is_some() {
            return;
        }
        *slot = Some(
            self.poller
                .clone()
                .spawn(self.poll_interval, self.cancel.child_token()),
        );
    }

    /// Stop polling, wait for in-flight webhook work, then stop every refresh timer.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let poll = self.poll_task.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = poll {
            if let Err(e) = handle.await {
                tracing::warn!("poll loop ended abnormally: {e}");
            }
        }
        self.webhook.drain().await;
        self.announcements.shutdown().await;
        tracing::info!("presence service stopped");
    }
}
