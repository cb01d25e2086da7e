//! Announcement lifecycle: one tracked message per (community, subscriber),
//! with a refresh timer whose lifetime matches the entry.
//!
//! Mutating calls take a [`KeyGuard`] so they only run while the caller holds
//! the subject's lock, the same lock the reconciler decides transitions under.

pub mod render;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::Utc;
use tokio::{
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    domain::{AnnouncementKey, ChannelId, MessageRef, Platform, PresenceObservation, SubscriberRecord},
    locks::KeyGuard,
    outcome::{AnnouncementEffect, SkipReason},
    ports::{ChatPort, PlatformRegistry, StreamingPlatform},
};

use self::render::{render, StreamMetadata};

/// What a refresh tick needs to re-derive content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnnouncementSource {
    pub platform: Platform,
    pub account_id: String,
    pub account_username: String,
    pub meta: StreamMetadata,
}

struct LiveAnnouncement {
    message: MessageRef,
    source: Arc<Mutex<AnnouncementSource>>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct AnnouncementManager {
    chat: Arc<dyn ChatPort>,
    platforms: PlatformRegistry,
    refresh_interval: Duration,
    fallback_image: String,
    entries: Mutex<HashMap<AnnouncementKey, LiveAnnouncement>>,
    shutdown: CancellationToken,
}

impl AnnouncementManager {
    pub fn new(
        chat: Arc<dyn ChatPort>,
        platforms: PlatformRegistry,
        refresh_interval: Duration,
        fallback_image: impl Into<String>,
    ) -> Self {
        Self {
            chat,
            platforms,
            refresh_interval,
            fallback_image: fallback_image.into(),
            entries: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Build the announcement source for a transition, re-querying the platform
    /// when the ingress snapshot carries no title (push events often do not).
    pub async fn compose(
        &self,
        record: &SubscriberRecord,
        obs: &PresenceObservation,
    ) -> AnnouncementSource {
        let mut meta = StreamMetadata::from_observation(record, obs);
        if !meta.has_title() {
            if let Some(platform) = self.platforms.get(record.key.platform) {
                match platform
                    .live_status(&record.account_id, &record.account_username)
                    .await
                {
                    Ok(status) => meta.merge(&status),
                    Err(e) => tracing::debug!(
                        subscriber = %record.key,
                        "metadata lookup failed, announcing with snapshot: {e}"
                    ),
                }
            }
        }
        AnnouncementSource {
            platform: record.key.platform,
            account_id: record.account_id.clone(),
            account_username: record.account_username.clone(),
            meta,
        }
    }

    /// Edit the tracked message in place, or post a new one and start its refresh timer.
    pub async fn create_or_update(
        &self,
        guard: &KeyGuard<AnnouncementKey>,
        channel: &ChannelId,
        source: AnnouncementSource,
    ) -> AnnouncementEffect {
        if self.is_tracked(guard.key()) {
            return self.update(guard, source).await;
        }
        if self.shutdown.is_cancelled() {
            return AnnouncementEffect::Failed("announcement manager is shut down".to_string());
        }

        let content = self.render(&source);
        let message = match self.chat.send_announcement(channel, &content).await {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(subject = %guard.key(), %channel, "failed to post announcement: {e}");
                return AnnouncementEffect::Failed(e.to_string());
            }
        };

        let source = Arc::new(Mutex::new(source));
        let cancel = self.shutdown.child_token();
        let handle = tokio::spawn(refresh_loop(RefreshTask {
            chat: self.chat.clone(),
            platform: self.platforms.get(platform_of(&source)),
            message: message.clone(),
            source: source.clone(),
            fallback_image: self.fallback_image.clone(),
            period: self.refresh_interval,
            cancel: cancel.clone(),
        }));

        let Ok(mut entries) = self.entries.lock() else {
            cancel.cancel();
            handle.abort();
            return AnnouncementEffect::Failed("announcement map poisoned".to_string());
        };
        entries.insert(
            guard.key().clone(),
            LiveAnnouncement {
                message: message.clone(),
                source,
                cancel,
                handle,
            },
        );
        tracing::info!(subject = %guard.key(), channel = %message.channel_id, message = %message.message_id, "announcement posted");
        AnnouncementEffect::Created
    }

    /// Refresh content only when an announcement is already tracked.
    pub async fn refresh_if_tracked(
        &self,
        guard: &KeyGuard<AnnouncementKey>,
        source: AnnouncementSource,
    ) -> AnnouncementEffect {
        if !self.is_tracked(guard.key()) {
            return AnnouncementEffect::Skipped(SkipReason::NotTracked);
        }
        self.update(guard, source).await
    }

    async fn update(
        &self,
        guard: &KeyGuard<AnnouncementKey>,
        source: AnnouncementSource,
    ) -> AnnouncementEffect {
        let tracked = self.with_entries(|entries| {
            entries
                .get(guard.key())
                .map(|e| (e.message.clone(), e.source.clone()))
        });
        let Some((message, shared)) = tracked.flatten() else {
            return AnnouncementEffect::Skipped(SkipReason::NotTracked);
        };

        if let Ok(mut current) = shared.lock() {
            *current = source.clone();
        }
        let content = self.render(&source);
        match self.chat.edit_announcement(&message, &content).await {
            Ok(()) => AnnouncementEffect::Updated,
            Err(e) => {
                tracing::warn!(subject = %guard.key(), "failed to edit announcement: {e}");
                AnnouncementEffect::Failed(e.to_string())
            }
        }
    }

    /// Stop the refresh timer and forget the message. Idempotent.
    pub fn teardown(&self, guard: &KeyGuard<AnnouncementKey>) -> AnnouncementEffect {
        let removed = self
            .with_entries(|entries| entries.remove(guard.key()))
            .flatten();
        match removed {
            Some(entry) => {
                entry.cancel.cancel();
                entry.handle.abort();
                tracing::info!(subject = %guard.key(), message = %entry.message.message_id, "announcement tracking removed");
                AnnouncementEffect::TornDown
            }
            None => AnnouncementEffect::Skipped(SkipReason::NotTracked),
        }
    }

    pub fn is_tracked(&self, key: &AnnouncementKey) -> bool {
        self.with_entries(|entries| entries.contains_key(key))
            .unwrap_or(false)
    }

    pub fn message_for(&self, key: &AnnouncementKey) -> Option<MessageRef> {
        self.with_entries(|entries| entries.get(key).map(|e| e.message.clone()))
            .flatten()
    }

    pub fn tracked_count(&self) -> usize {
        self.with_entries(|entries| entries.len()).unwrap_or(0)
    }

    /// Cancel every refresh timer and wait for them to stop.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let drained: Vec<_> = self
            .with_entries(|entries| entries.drain().map(|(_, e)| e).collect())
            .unwrap_or_default();
        let count = drained.len();
        for entry in drained {
            entry.cancel.cancel();
            let _ = entry.handle.await;
        }
        tracing::info!(timers = count, "announcement refresh timers stopped");
    }

    fn render(&self, source: &AnnouncementSource) -> render::Announcement {
        render(
            source.platform,
            &source.account_username,
            &source.meta,
            &self.fallback_image,
            Utc::now(),
        )
    }

    fn with_entries<T>(
        &self,
        f: impl FnOnce(&mut HashMap<AnnouncementKey, LiveAnnouncement>) -> T,
    ) -> Option<T> {
        match self.entries.lock() {
            Ok(mut entries) => Some(f(&mut entries)),
            Err(_) => {
                tracing::error!("announcement map poisoned");
                None
            }
        }
    }
}

fn platform_of(source: &Arc<Mutex<AnnouncementSource>>) -> Platform {
    match source.lock() {
        Ok(s) => s.platform,
        Err(poisoned) => poisoned.into_inner().platform,
    }
}

struct RefreshTask {
    chat: Arc<dyn ChatPort>,
    platform: Option<Arc<dyn StreamingPlatform>>,
    message: MessageRef,
    source: Arc<Mutex<AnnouncementSource>>,
    fallback_image: String,
    period: Duration,
    cancel: CancellationToken,
}

async fn refresh_loop(task: RefreshTask) {
    let mut tick = interval_at(Instant::now() + task.period, task.period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
          _ = task.cancel.cancelled() => break,
          _ = tick.tick() => {
            tokio::select! {
              _ = task.cancel.cancelled() => break,
              _ = refresh_once(&task) => {}
            }
          }
        }
    }
}

async fn refresh_once(task: &RefreshTask) {
    let Ok(mut source) = task.source.lock().map(|s| s.clone()) else {
        return;
    };

    if let Some(platform) = task.platform.as_ref() {
        match platform
            .live_status(&source.account_id, &source.account_username)
            .await
        {
            Ok(status) => {
                if status.is_live {
                    source.meta.merge(&status);
                    if let Ok(mut shared) = task.source.lock() {
                        shared.meta = source.meta.clone();
                    }
                }
            }
            Err(e) => {
                tracing::debug!(message = %task.message.message_id, "refresh metadata query failed, skipping tick: {e}");
                return;
            }
        }
    }

    let content = render(
        source.platform,
        &source.account_username,
        &source.meta,
        &task.fallback_image,
        Utc::now(),
    );
    if let Err(e) = task.chat.edit_announcement(&task.message, &content).await {
        tracing::debug!(message = %task.message.message_id, "announcement refresh failed: {e}");
    }
}
