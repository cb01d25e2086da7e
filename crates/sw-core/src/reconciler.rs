//! Turns presence observations into exactly-once transitions.
//!
//! Every read-decide-write for a subscriber runs under the subscriber's
//! [`KeyLocks`] entry, the same lock the announcement manager requires, and the
//! live flag is committed with a conditional write. Duplicate, reordered or
//! concurrent observations from either ingress path therefore collapse into one
//! grant and one message per went-live.

use std::{borrow::Cow, sync::Arc};

use crate::{
    announce::AnnouncementManager,
    defaults::DefaultsResolver,
    domain::{AnnouncementKey, PresenceObservation, SubscriberKey, SubscriberRecord},
    errors::Error,
    locks::{KeyGuard, KeyLocks},
    outcome::{AnnouncementEffect, EffectOutcome, SkipReason, Transition, TransitionOutcome},
    ports::{ChatPort, PlatformRegistry},
    roles::RoleManager,
    store::PresenceStore,
    Result,
};

pub struct StateReconciler {
    store: Arc<dyn PresenceStore>,
    chat: Arc<dyn ChatPort>,
    platforms: PlatformRegistry,
    defaults: DefaultsResolver,
    roles: RoleManager,
    announcements: Arc<AnnouncementManager>,
    locks: Arc<KeyLocks<AnnouncementKey>>,
}

impl StateReconciler {
    pub fn new(
        store: Arc<dyn PresenceStore>,
        chat: Arc<dyn ChatPort>,
        platforms: PlatformRegistry,
        defaults: DefaultsResolver,
        announcements: Arc<AnnouncementManager>,
        locks: Arc<KeyLocks<AnnouncementKey>>,
    ) -> Self {
        Self {
            roles: RoleManager::new(chat.clone()),
            store,
            chat,
            platforms,
            defaults,
            announcements,
            locks,
        }
    }

    pub fn announcements(&self) -> &Arc<AnnouncementManager> {
        &self.announcements
    }

    /// Reconcile an observation against every subscriber tracking its account.
    /// Never fails: lookup errors are logged and yield no outcomes.
    pub async fn observe(&self, obs: &PresenceObservation) -> Vec<TransitionOutcome> {
        let records = match self.store.find_by_account(obs.platform, &obs.account_id).await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(platform = %obs.platform, account = %obs.account_id, "subscriber lookup failed: {e}");
                return Vec::new();
            }
        };
        if records.is_empty() {
            tracing::debug!(platform = %obs.platform, account = %obs.account_id, "observation for untracked account");
        }

        let mut outcomes = Vec::with_capacity(records.len());
        for record in records {
            outcomes.push(self.reconcile(&record.key, obs).await);
        }
        outcomes
    }

    /// Reconcile one subscriber. The record is re-read under the subscriber's lock;
    /// whatever the caller saw before is not trusted.
    pub async fn reconcile(&self, key: &SubscriberKey, obs: &PresenceObservation) -> TransitionOutcome {
        let subject = key.announcement_key();
        let guard = self.locks.lock(&subject).await;
        let outcome = self.reconcile_locked(&guard, key, obs).await;
        drop(guard);
        self.locks.forget(&subject).await;

        match &outcome.transition {
            Transition::Aborted(reason) => {
                tracing::warn!(subscriber = %key, "observation skipped: {reason}")
            }
            t if t.changed_state() => tracing::info!(
                subscriber = %key,
                transition = %t,
                role = ?outcome.role,
                announcement = ?outcome.announcement,
                "presence transition applied"
            ),
            t => tracing::debug!(subscriber = %key, transition = %t, "no transition"),
        }
        outcome
    }

    async fn reconcile_locked(
        &self,
        guard: &KeyGuard<AnnouncementKey>,
        key: &SubscriberKey,
        obs: &PresenceObservation,
    ) -> TransitionOutcome {
        let mut record = match self.store.get(key).await {
            Ok(Some(record)) => record,
            Ok(None) => return TransitionOutcome::without_effects(key.clone(), Transition::Untracked),
            Err(e) => return aborted(key, format!("record lookup failed: {e}")),
        };

        match self.chat.fetch_community(&key.community).await {
            Ok(Some(_)) => {}
            Ok(None) => return aborted(key, "community not found".to_string()),
            Err(e) => return aborted(key, format!("community lookup failed: {e}")),
        }

        let targets = match self.defaults.resolve(&record).await {
            Ok(targets) => targets,
            Err(e) => return aborted(key, format!("defaults resolution failed: {e}")),
        };

        let obs = match self.with_category(&record, obs).await {
            Ok(obs) => obs,
            Err(e) => return aborted(key, format!("category lookup failed: {e}")),
        };

        if !record.accepts_category(obs.category.as_deref()) {
            tracing::debug!(
                subscriber = %key,
                filter = ?record.category_filter,
                category = ?obs.category,
                "category filter mismatch"
            );
            return TransitionOutcome::without_effects(key.clone(), Transition::Filtered);
        }

        if let Err(e) = self.defaults.persist(&mut record, &targets).await {
            return aborted(key, format!("persisting resolved targets failed: {e}"));
        }
        let obs = &*obs;

        match (obs.is_live(), record.is_live) {
            (true, false) => {
                if let Some(outcome) = self.commit(key, false, true).await {
                    return outcome;
                }
                let role = self
                    .roles
                    .grant(&key.community, &key.subscriber, targets.role_id.as_ref())
                    .await;
                let announcement = match targets.channel_id.as_ref() {
                    Some(channel) => {
                        let source = self.announcements.compose(&record, obs).await;
                        self.announcements
                            .create_or_update(guard, channel, source)
                            .await
                    }
                    None => AnnouncementEffect::Skipped(SkipReason::NotConfigured),
                };
                TransitionOutcome {
                    key: key.clone(),
                    transition: Transition::WentLive,
                    role,
                    announcement,
                }
            }
            (true, true) => {
                let announcement = if self.announcements.is_tracked(guard.key()) {
                    let source = self.announcements.compose(&record, obs).await;
                    self.announcements.refresh_if_tracked(guard, source).await
                } else {
                    AnnouncementEffect::Skipped(SkipReason::NotTracked)
                };
                TransitionOutcome {
                    key: key.clone(),
                    transition: Transition::StillLive,
                    role: EffectOutcome::none(),
                    announcement,
                }
            }
            (false, true) => {
                if let Some(outcome) = self.commit(key, true, false).await {
                    return outcome;
                }
                let role = self
                    .roles
                    .revoke(&key.community, &key.subscriber, targets.role_id.as_ref())
                    .await;
                let announcement = self.announcements.teardown(guard);
                TransitionOutcome {
                    key: key.clone(),
                    transition: Transition::WentOffline,
                    role,
                    announcement,
                }
            }
            (false, false) => TransitionOutcome::without_effects(key.clone(), Transition::StillOffline),
        }
    }

    /// Push events announce a stream without its category. When the record
    /// filters on category, ask the platform before deciding.
    async fn with_category<'a>(
        &self,
        record: &SubscriberRecord,
        obs: &'a PresenceObservation,
    ) -> Result<Cow<'a, PresenceObservation>> {
        if !obs.is_live() || obs.category.is_some() || record.category_filter().is_none() {
            return Ok(Cow::Borrowed(obs));
        }
        let platform = self.platforms.get(record.key.platform).ok_or_else(|| {
            Error::Config(format!("no {} adapter to read the stream category", record.key.platform))
        })?;
        let status = platform
            .live_status(&record.account_id, &record.account_username)
            .await?;
        let mut obs = obs.clone();
        obs.fill_from(&status);
        Ok(Cow::Owned(obs))
    }

    /// Conditionally flip the live flag. `None` means the write landed and the
    /// caller owns the transition's effects.
    async fn commit(&self, key: &SubscriberKey, expected: bool, live: bool) -> Option<TransitionOutcome> {
        match self.store.compare_and_set_live(key, expected, live).await {
            Ok(true) => None,
            Ok(false) => {
                // Someone else moved the record; whatever it holds now is settled.
                let transition = match self.store.get(key).await {
                    Ok(Some(SubscriberRecord { is_live: true, .. })) => Transition::StillLive,
                    Ok(Some(_)) => Transition::StillOffline,
                    Ok(None) => Transition::Untracked,
                    Err(e) => Transition::Aborted(format!("record re-read failed: {e}")),
                };
                Some(TransitionOutcome::without_effects(key.clone(), transition))
            }
            Err(e) => Some(aborted(key, format!("state write failed: {e}"))),
        }
    }
}

fn aborted(key: &SubscriberKey, reason: String) -> TransitionOutcome {
    TransitionOutcome::without_effects(key.clone(), Transition::Aborted(reason))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::defaults::DefaultsPolicy;
    use crate::eventsub::{parse_delivery, Inbound};
    use crate::domain::{
        ChannelId, CommunityDefaults, CommunityId, LiveStatus, MemberId, Platform, RoleId,
    };
    use crate::ports::PlatformRegistry;
    use crate::store::MemoryStore;
    use crate::testing::{FakeChat, FakePlatform};

    struct Harness {
        store: Arc<MemoryStore>,
        chat: Arc<FakeChat>,
        platform: Arc<FakePlatform>,
        reconciler: Arc<StateReconciler>,
    }

    impl Harness {
        fn new(refresh: Duration) -> Self {
            let store = Arc::new(MemoryStore::new());
            let chat = Arc::new(FakeChat::default());
            let platform = Arc::new(FakePlatform::new(Platform::Twitch));
            let platforms = PlatformRegistry::new().with(platform.clone());
            let announcements = Arc::new(AnnouncementManager::new(
                chat.clone(),
                platforms.clone(),
                refresh,
                "https://fallback",
            ));
            let reconciler = Arc::new(StateReconciler::new(
                store.clone(),
                chat.clone(),
                platforms,
                DefaultsResolver::new(store.clone(), DefaultsPolicy::Sticky),
                announcements,
                Arc::new(KeyLocks::new()),
            ));
            Self {
                store,
                chat,
                platform,
                reconciler,
            }
        }

        async fn track(&self, configure: impl FnOnce(&mut SubscriberRecord)) -> SubscriberKey {
            let key = SubscriberKey::new(CommunityId::new("g"), MemberId::new("u"), Platform::Twitch);
            let mut record = SubscriberRecord::new(key.clone(), "100", "streamer");
            record.channel_id = Some(ChannelId::new("c"));
            record.role_id = Some(RoleId::new("r"));
            configure(&mut record);
            self.store.insert_if_absent(&record).await.unwrap();
            key
        }

        async fn is_live(&self, key: &SubscriberKey) -> bool {
            self.store.get(key).await.unwrap().unwrap().is_live
        }

        fn tracked(&self) -> usize {
            self.reconciler.announcements().tracked_count()
        }
    }

    fn online() -> PresenceObservation {
        PresenceObservation::online(Platform::Twitch, "100").with_title("hello")
    }

    fn offline() -> PresenceObservation {
        PresenceObservation::offline(Platform::Twitch, "100")
    }

    #[tokio::test]
    async fn duplicate_online_grants_once_and_posts_once() {
        let h = Harness::new(Duration::from_secs(60));
        h.track(|_| {}).await;

        let first = h.reconciler.observe(&online()).await;
        assert_eq!(first[0].transition, Transition::WentLive);
        assert_eq!(first[0].role, EffectOutcome::Applied);
        assert_eq!(first[0].announcement, AnnouncementEffect::Created);

        for _ in 0..4 {
            let again = h.reconciler.observe(&online()).await;
            assert_eq!(again[0].transition, Transition::StillLive);
            assert_eq!(again[0].announcement, AnnouncementEffect::Updated);
        }
        assert_eq!(h.chat.grants(), 1);
        assert_eq!(h.chat.sends(), 1);
        assert_eq!(h.chat.edits(), 4);
        assert_eq!(h.tracked(), 1);
    }

    #[tokio::test]
    async fn online_then_offline_revokes_and_untracks() {
        let h = Harness::new(Duration::from_secs(60));
        let key = h.track(|_| {}).await;

        h.reconciler.observe(&online()).await;
        let out = h.reconciler.observe(&offline()).await;
        assert_eq!(out[0].transition, Transition::WentOffline);
        assert_eq!(out[0].announcement, AnnouncementEffect::TornDown);

        let out = h.reconciler.observe(&offline()).await;
        assert_eq!(out[0].transition, Transition::StillOffline);

        assert_eq!(h.chat.revokes(), 1);
        assert_eq!(h.tracked(), 0);
        assert!(!h.is_live(&key).await);
    }

    #[tokio::test]
    async fn category_mismatch_has_no_effects() {
        let h = Harness::new(Duration::from_secs(60));
        let key = h.track(|r| r.category_filter = Some("RPG".into())).await;

        let out = h.reconciler.observe(&online().with_category("FPS")).await;
        assert_eq!(out[0].transition, Transition::Filtered);
        assert_eq!(h.chat.grants(), 0);
        assert_eq!(h.chat.sends(), 0);
        assert!(!h.is_live(&key).await);

        let out = h.reconciler.observe(&online().with_category("rpg")).await;
        assert_eq!(out[0].transition, Transition::WentLive);
    }

    #[tokio::test]
    async fn pushed_online_reads_category_before_filtering() {
        let h = Harness::new(Duration::from_secs(60));
        let key = h.track(|r| r.category_filter = Some("RPG".into())).await;
        h.platform.set_status(LiveStatus {
            is_live: true,
            category: Some("FPS".into()),
            ..LiveStatus::default()
        });

        let body = r#"{"subscription":{"type":"stream.online","version":"1"},
            "event":{"broadcaster_user_id":"100","broadcaster_user_login":"streamer",
            "broadcaster_user_name":"Streamer","type":"live"}}"#;
        let Ok(Inbound::Event(pushed)) = parse_delivery(Some("notification"), body.as_bytes()) else {
            panic!("expected an event");
        };
        assert_eq!(pushed.category, None);

        let out = h.reconciler.observe(&pushed).await;
        assert_eq!(out[0].transition, Transition::Filtered);
        assert_eq!(h.platform.status_calls(), 1);
        assert_eq!(h.chat.grants(), 0);
        assert_eq!(h.chat.sends(), 0);
        assert!(!h.is_live(&key).await);

        h.platform.set_status(LiveStatus {
            is_live: true,
            category: Some("rpg".into()),
            ..LiveStatus::default()
        });
        let out = h.reconciler.observe(&pushed).await;
        assert_eq!(out[0].transition, Transition::WentLive);
        assert_eq!(h.chat.grants(), 1);
        assert_eq!(h.chat.sends(), 1);
    }

    #[tokio::test]
    async fn category_lookup_failure_aborts_the_observation() {
        let h = Harness::new(Duration::from_secs(60));
        let key = h.track(|r| r.category_filter = Some("RPG".into())).await;
        h.platform.fail_status(true);

        let out = h.reconciler.observe(&online()).await;
        assert!(matches!(out[0].transition, Transition::Aborted(_)));
        assert_eq!(h.chat.grants(), 0);
        assert!(!h.is_live(&key).await);

        // Without a filter the category is never looked up.
        let h = Harness::new(Duration::from_secs(60));
        h.track(|_| {}).await;
        h.platform.fail_status(true);
        let out = h.reconciler.observe(&online()).await;
        assert_eq!(out[0].transition, Transition::WentLive);
        assert_eq!(h.platform.status_calls(), 0);
    }

    #[tokio::test]
    async fn filtered_observation_leaves_targets_unresolved() {
        let h = Harness::new(Duration::from_secs(60));
        let key = h
            .track(|r| {
                r.channel_id = None;
                r.role_id = None;
                r.category_filter = Some("RPG".into());
            })
            .await;
        h.store
            .set_community_defaults(&CommunityDefaults {
                community: CommunityId::new("g"),
                channel_id: Some(ChannelId::new("C")),
                role_id: Some(RoleId::new("R")),
            })
            .await
            .unwrap();

        let out = h.reconciler.observe(&online().with_category("FPS")).await;
        assert_eq!(out[0].transition, Transition::Filtered);
        let stored = h.store.get(&key).await.unwrap().unwrap();
        assert_eq!(stored.channel_id, None);
        assert_eq!(stored.role_id, None);

        h.reconciler.observe(&online().with_category("RPG")).await;
        let stored = h.store.get(&key).await.unwrap().unwrap();
        assert_eq!(stored.channel_id, Some(ChannelId::new("C")));
        assert_eq!(stored.role_id, Some(RoleId::new("R")));
    }

    #[tokio::test]
    async fn platforms_of_one_member_share_an_announcement() {
        let h = Harness::new(Duration::from_secs(60));
        let twitch = h.track(|_| {}).await;
        let mut kick = SubscriberRecord::new(
            SubscriberKey::new(CommunityId::new("g"), MemberId::new("u"), Platform::Kick),
            "slug",
            "slug",
        );
        kick.channel_id = Some(ChannelId::new("c"));
        kick.role_id = Some(RoleId::new("r"));
        h.store.insert_if_absent(&kick).await.unwrap();

        h.reconciler.observe(&online()).await;
        let out = h
            .reconciler
            .observe(&PresenceObservation::online(Platform::Kick, "slug").with_title("kick"))
            .await;
        assert_eq!(out[0].transition, Transition::WentLive);
        assert_eq!(out[0].announcement, AnnouncementEffect::Updated);
        assert_eq!(h.chat.sends(), 1);
        assert_eq!(h.tracked(), 1);

        let out = h.reconciler.observe(&offline()).await;
        assert_eq!(out[0].announcement, AnnouncementEffect::TornDown);
        assert_eq!(h.chat.revokes(), 1);
        assert!(!h.is_live(&twitch).await);
        assert!(h.is_live(&kick.key).await);
        assert_eq!(h.tracked(), 0);
    }

    #[tokio::test]
    async fn unset_targets_are_filled_from_community_defaults() {
        let h = Harness::new(Duration::from_secs(60));
        let key = h
            .track(|r| {
                r.channel_id = None;
                r.role_id = None;
            })
            .await;
        h.store
            .set_community_defaults(&CommunityDefaults {
                community: CommunityId::new("g"),
                channel_id: Some(ChannelId::new("C")),
                role_id: Some(RoleId::new("R")),
            })
            .await
            .unwrap();

        h.reconciler.observe(&online()).await;
        let stored = h.store.get(&key).await.unwrap().unwrap();
        assert_eq!(stored.channel_id, Some(ChannelId::new("C")));
        assert_eq!(stored.role_id, Some(RoleId::new("R")));
        assert_eq!(h.chat.sends(), 1);
    }

    #[tokio::test]
    async fn missing_targets_still_persist_the_transition() {
        let h = Harness::new(Duration::from_secs(60));
        let key = h
            .track(|r| {
                r.channel_id = None;
                r.role_id = None;
            })
            .await;

        let out = h.reconciler.observe(&online()).await;
        assert_eq!(out[0].transition, Transition::WentLive);
        assert_eq!(out[0].role, EffectOutcome::Skipped(SkipReason::NotConfigured));
        assert_eq!(
            out[0].announcement,
            AnnouncementEffect::Skipped(SkipReason::NotConfigured)
        );
        assert!(h.is_live(&key).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_observations_produce_one_grant_and_one_message() {
        let h = Harness::new(Duration::from_secs(60));
        h.chat.delay_sends(Duration::from_millis(30));
        h.track(|_| {}).await;

        let pushed = online();
        let polled = LiveStatus {
            is_live: true,
            title: Some("from poll".into()),
            ..LiveStatus::default()
        }
        .into_observation(Platform::Twitch, "100");

        let (a, b) = tokio::join!(h.reconciler.observe(&pushed), h.reconciler.observe(&polled));
        let went_live = [&a[0], &b[0]]
            .iter()
            .filter(|o| o.transition == Transition::WentLive)
            .count();
        assert_eq!(went_live, 1);
        assert_eq!(h.chat.grants(), 1);
        assert_eq!(h.chat.sends(), 1);
        assert_eq!(h.tracked(), 1);
    }

    #[tokio::test]
    async fn refresh_then_offline_then_new_message() {
        let h = Harness::new(Duration::from_millis(20));
        let key = h.track(|_| {}).await;

        h.reconciler.observe(&online()).await;
        let first = h
            .reconciler
            .announcements()
            .message_for(&key.announcement_key())
            .unwrap();

        h.platform.set_status(LiveStatus {
            is_live: true,
            title: Some("new title".into()),
            ..LiveStatus::default()
        });
        tokio::time::sleep(Duration::from_millis(70)).await;
        assert_eq!(h.chat.last_edit_title().as_deref(), Some("new title"));

        h.reconciler.observe(&offline()).await;
        assert_eq!(h.chat.revokes(), 1);
        assert_eq!(h.tracked(), 0);

        let out = h.reconciler.observe(&online()).await;
        assert_eq!(out[0].announcement, AnnouncementEffect::Created);
        let second = h
            .reconciler
            .announcements()
            .message_for(&key.announcement_key())
            .unwrap();
        assert_ne!(first, second);
        assert_eq!(h.chat.sends(), 2);
    }

    #[tokio::test]
    async fn offline_after_restart_revokes_without_tracking() {
        let h = Harness::new(Duration::from_secs(60));
        let key = h.track(|r| r.is_live = true).await;

        let out = h.reconciler.observe(&offline()).await;
        assert_eq!(out[0].transition, Transition::WentOffline);
        assert_eq!(out[0].role, EffectOutcome::Applied);
        assert_eq!(
            out[0].announcement,
            AnnouncementEffect::Skipped(SkipReason::NotTracked)
        );
        assert!(!h.is_live(&key).await);
        assert_eq!(h.tracked(), 0);
    }

    #[tokio::test]
    async fn effect_failures_do_not_block_each_other() {
        let h = Harness::new(Duration::from_secs(60));
        let key = h.track(|_| {}).await;
        h.chat.fail_roles(true);

        let out = h.reconciler.observe(&online()).await;
        assert!(out[0].role.is_failed());
        assert_eq!(out[0].announcement, AnnouncementEffect::Created);
        assert!(h.is_live(&key).await);
    }

    #[tokio::test]
    async fn community_lookup_failure_leaves_state_intact() {
        let h = Harness::new(Duration::from_secs(60));
        let key = h.track(|_| {}).await;
        h.chat.fail_community(true);

        let out = h.reconciler.observe(&online()).await;
        assert!(matches!(out[0].transition, Transition::Aborted(_)));
        assert!(!h.is_live(&key).await);
        assert_eq!(h.chat.sends(), 0);

        h.chat.fail_community(false);
        let out = h.reconciler.observe(&online()).await;
        assert_eq!(out[0].transition, Transition::WentLive);
    }

    #[tokio::test]
    async fn untracked_account_yields_nothing() {
        let h = Harness::new(Duration::from_secs(60));
        assert!(h.reconciler.observe(&online()).await.is_empty());

        let key = SubscriberKey::new(CommunityId::new("g"), MemberId::new("gone"), Platform::Twitch);
        let out = h.reconciler.reconcile(&key, &online()).await;
        assert_eq!(out.transition, Transition::Untracked);
    }
}
