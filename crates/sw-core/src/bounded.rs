//! Port decorators that put a deadline on every outbound call.
//!
//! Nothing in the pipeline retries inline; a call that overruns is reported as
//! `Error::Timeout` and the next observation or refresh tick is the retry.

use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;

use crate::{
    announce::render::Announcement,
    domain::{ChannelId, Community, CommunityId, LiveStatus, Member, MemberId, MessageRef, Platform, RoleId},
    errors::Error,
    ports::{ChatPort, StreamingPlatform, SubscribeOutcome, SubscriptionKind},
    Result,
};

async fn deadline<T>(timeout: Duration, what: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(res) => res,
        Err(_) => Err(Error::Timeout(format!("{what} after {}ms", timeout.as_millis()))),
    }
}

/// ChatPort decorator that bounds each call.
pub struct BoundedChat {
    inner: Arc<dyn ChatPort>,
    timeout: Duration,
}

impl BoundedChat {
    pub fn new(inner: Arc<dyn ChatPort>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl ChatPort for BoundedChat {
    async fn fetch_community(&self, community: &CommunityId) -> Result<Option<Community>> {
        deadline(self.timeout, "fetch community", self.inner.fetch_community(community)).await
    }

    async fn fetch_member(
        &self,
        community: &CommunityId,
        member: &MemberId,
    ) -> Result<Option<Member>> {
        deadline(
            self.timeout,
            "fetch member",
            self.inner.fetch_member(community, member),
        )
        .await
    }

    async fn add_role(
        &self,
        community: &CommunityId,
        member: &MemberId,
        role: &RoleId,
    ) -> Result<()> {
        deadline(
            self.timeout,
            "add role",
            self.inner.add_role(community, member, role),
        )
        .await
    }

    async fn remove_role(
        &self,
        community: &CommunityId,
        member: &MemberId,
        role: &RoleId,
    ) -> Result<()> {
        deadline(
            self.timeout,
            "remove role",
            self.inner.remove_role(community, member, role),
        )
        .await
    }

    async fn send_announcement(
        &self,
        channel: &ChannelId,
        announcement: &Announcement,
    ) -> Result<MessageRef> {
        deadline(
            self.timeout,
            "send announcement",
            self.inner.send_announcement(channel, announcement),
        )
        .await
    }

    async fn edit_announcement(
        &self,
        message: &MessageRef,
        announcement: &Announcement,
    ) -> Result<()> {
        deadline(
            self.timeout,
            "edit announcement",
            self.inner.edit_announcement(message, announcement),
        )
        .await
    }
}

/// StreamingPlatform decorator that bounds each call.
pub struct BoundedPlatform {
    inner: Arc<dyn StreamingPlatform>,
    timeout: Duration,
}

impl BoundedPlatform {
    pub fn new(inner: Arc<dyn StreamingPlatform>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl StreamingPlatform for BoundedPlatform {
    fn platform(&self) -> Platform {
        self.inner.platform()
    }

    fn supports_push(&self) -> bool {
        self.inner.supports_push()
    }

    async fn live_status(&self, account_id: &str, account_username: &str) -> Result<LiveStatus> {
        deadline(
            self.timeout,
            "live status query",
            self.inner.live_status(account_id, account_username),
        )
        .await
    }

    async fn resolve_account(&self, username: &str) -> Result<Option<String>> {
        deadline(
            self.timeout,
            "account lookup",
            self.inner.resolve_account(username),
        )
        .await
    }

    async fn subscribe(&self, account_id: &str, kind: SubscriptionKind) -> Result<SubscribeOutcome> {
        deadline(
            self.timeout,
            "subscription registration",
            self.inner.subscribe(account_id, kind),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::PlatformRegistry;
    use crate::testing::FakePlatform;

    struct SlowPlatform;

    #[async_trait]
    impl StreamingPlatform for SlowPlatform {
        fn platform(&self) -> Platform {
            Platform::Kick
        }

        async fn live_status(&self, _account_id: &str, _username: &str) -> Result<LiveStatus> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(LiveStatus::offline())
        }

        async fn resolve_account(&self, username: &str) -> Result<Option<String>> {
            Ok(Some(username.to_string()))
        }

        async fn subscribe(&self, _id: &str, _kind: SubscriptionKind) -> Result<SubscribeOutcome> {
            Ok(SubscribeOutcome::Created)
        }
    }

    #[tokio::test]
    async fn slow_calls_become_timeouts() {
        let bounded = BoundedPlatform::new(Arc::new(SlowPlatform), Duration::from_millis(20));
        let err = bounded.live_status("slug", "slug").await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));

        // Fast calls pass through untouched.
        let ok = bounded.resolve_account("slug").await.unwrap();
        assert_eq!(ok.as_deref(), Some("slug"));
    }

    #[tokio::test]
    async fn registry_wraps_every_adapter() {
        let registry = PlatformRegistry::new()
            .with(Arc::new(FakePlatform::new(Platform::Twitch)))
            .with(Arc::new(FakePlatform::new(Platform::Kick)))
            .bounded(Duration::from_secs(1));
        assert_eq!(registry.platforms(), vec![Platform::Twitch, Platform::Kick]);
        assert!(registry.supports_push(Platform::Twitch));
        assert!(!registry.supports_push(Platform::Kick));
        assert!(!registry.supports_push(Platform::YouTube));
    }
}
