use std::{sync::Arc, time::Duration};

use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    outcome::{Transition, TransitionOutcome},
    ports::PlatformRegistry,
    reconciler::StateReconciler,
    store::PresenceStore,
};

/// Per-tick counters, mostly for logs and tests.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub checked: usize,
    pub push_delivered: usize,
    pub unavailable: usize,
    pub failed: usize,
    pub transitions: usize,
}

/// Drives presence for platforms without push delivery.
pub struct PollAdapter {
    store: Arc<dyn PresenceStore>,
    platforms: PlatformRegistry,
    reconciler: Arc<StateReconciler>,
}

impl PollAdapter {
    pub fn new(
        store: Arc<dyn PresenceStore>,
        platforms: PlatformRegistry,
        reconciler: Arc<StateReconciler>,
    ) -> Self {
        Self {
            store,
            platforms,
            reconciler,
        }
    }

    /// Query every polled subscriber once. A failure for one subscriber is
    /// logged and counted; the rest of the batch still runs.
    pub async fn tick(&self) -> PollSummary {
        let mut summary = PollSummary::default();
        let records = match self.store.list_all().await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!("poll tick could not list subscribers: {e}");
                return summary;
            }
        };

        for record in records {
            let Some(platform) = self.platforms.get(record.key.platform) else {
                summary.unavailable += 1;
                continue;
            };
            if platform.supports_push() {
                summary.push_delivered += 1;
                continue;
            }

            summary.checked += 1;
            let status = match platform
                .live_status(&record.account_id, &record.account_username)
                .await
            {
                Ok(status) => status,
                Err(e) => {
                    summary.failed += 1;
                    tracing::warn!(subscriber = %record.key, account = %record.account_id, "live status query failed: {e}");
                    continue;
                }
            };

            let obs = status.into_observation(record.key.platform, &record.account_id);
            let TransitionOutcome { transition, .. } = self.reconciler.reconcile(&record.key, &obs).await;
            match transition {
                Transition::Aborted(_) => summary.failed += 1,
                t if t.changed_state() => summary.transitions += 1,
                _ => {}
            }
        }

        tracing::debug!(
            checked = summary.checked,
            failed = summary.failed,
            transitions = summary.transitions,
            "poll tick finished"
        );
        summary
    }

    /// Run `tick` every `period` until `cancel` fires. The first tick runs immediately.
    pub fn spawn(self: Arc<Self>, period: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(period_secs = period.as_secs(), "poll loop started");
            loop {
                tokio::select! {
                  _ = cancel.cancelled() => break,
                  _ = interval.tick() => {
                    tokio::select! {
                      _ = cancel.cancelled() => break,
                      _ = self.tick() => {}
                    }
                  }
                }
            }
            tracing::info!("poll loop stopped");
        })
    }
}
