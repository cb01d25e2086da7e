//! In-memory port fakes shared by unit tests.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    announce::render::Announcement,
    domain::{
        ChannelId, Community, CommunityId, LiveStatus, Member, MemberId, MessageId, MessageRef,
        Platform, RoleId,
    },
    errors::Error,
    ports::{ChatPort, StreamingPlatform, SubscribeOutcome, SubscriptionKind},
    Result,
};

#[derive(Default)]
pub(crate) struct FakeChat {
    missing_members: Mutex<HashSet<String>>,
    missing_communities: Mutex<HashSet<String>>,
    fail_roles: AtomicBool,
    fail_sends: AtomicBool,
    fail_community: AtomicBool,
    send_delay: Mutex<Option<Duration>>,
    grants: AtomicUsize,
    revokes: AtomicUsize,
    sends: AtomicUsize,
    edits: AtomicUsize,
    next_id: AtomicUsize,
    edit_titles: Mutex<Vec<String>>,
}

impl FakeChat {
    pub fn remove_member(&self, member: &str) {
        self.missing_members.lock().unwrap().insert(member.to_string());
    }

    pub fn remove_community(&self, community: &str) {
        self.missing_communities
            .lock()
            .unwrap()
            .insert(community.to_string());
    }

    pub fn fail_roles(&self, fail: bool) {
        self.fail_roles.store(fail, Ordering::SeqCst);
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn fail_community(&self, fail: bool) {
        self.fail_community.store(fail, Ordering::SeqCst);
    }

    pub fn delay_sends(&self, delay: Duration) {
        *self.send_delay.lock().unwrap() = Some(delay);
    }

    pub fn grants(&self) -> usize {
        self.grants.load(Ordering::SeqCst)
    }

    pub fn revokes(&self) -> usize {
        self.revokes.load(Ordering::SeqCst)
    }

    pub fn sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    pub fn edits(&self) -> usize {
        self.edits.load(Ordering::SeqCst)
    }

    pub fn last_edit_title(&self) -> Option<String> {
        self.edit_titles.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl ChatPort for FakeChat {
    async fn fetch_community(&self, community: &CommunityId) -> Result<Option<Community>> {
        if self.fail_community.load(Ordering::SeqCst) {
            return Err(Error::External("community lookup unavailable".into()));
        }
        if self
            .missing_communities
            .lock()
            .unwrap()
            .contains(community.as_str())
        {
            return Ok(None);
        }
        Ok(Some(Community {
            id: community.clone(),
            name: format!("community {community}"),
        }))
    }

    async fn fetch_member(
        &self,
        _community: &CommunityId,
        member: &MemberId,
    ) -> Result<Option<Member>> {
        if self.missing_members.lock().unwrap().contains(member.as_str()) {
            return Ok(None);
        }
        Ok(Some(Member {
            id: member.clone(),
            display_name: member.to_string(),
        }))
    }

    async fn add_role(&self, _: &CommunityId, _: &MemberId, _: &RoleId) -> Result<()> {
        if self.fail_roles.load(Ordering::SeqCst) {
            return Err(Error::External("missing permissions".into()));
        }
        self.grants.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove_role(&self, _: &CommunityId, _: &MemberId, _: &RoleId) -> Result<()> {
        if self.fail_roles.load(Ordering::SeqCst) {
            return Err(Error::External("missing permissions".into()));
        }
        self.revokes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send_announcement(
        &self,
        channel: &ChannelId,
        _announcement: &Announcement,
    ) -> Result<MessageRef> {
        let delay = *self.send_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::External("cannot send messages".into()));
        }
        self.sends.fetch_add(1, Ordering::SeqCst);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MessageRef {
            channel_id: channel.clone(),
            message_id: MessageId::new(id.to_string()),
        })
    }

    async fn edit_announcement(&self, _message: &MessageRef, announcement: &Announcement) -> Result<()> {
        self.edits.fetch_add(1, Ordering::SeqCst);
        self.edit_titles
            .lock()
            .unwrap()
            .push(announcement.title.clone());
        Ok(())
    }
}

pub(crate) struct FakePlatform {
    platform: Platform,
    status: Mutex<LiveStatus>,
    fail_status: AtomicBool,
    status_calls: AtomicUsize,
    accounts: Mutex<HashMap<String, String>>,
    existing: Mutex<HashSet<SubscriptionKind>>,
    failing: Mutex<HashSet<SubscriptionKind>>,
    subscriptions: Mutex<Vec<(String, SubscriptionKind)>>,
}

impl FakePlatform {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            status: Mutex::new(LiveStatus::offline()),
            fail_status: AtomicBool::new(false),
            status_calls: AtomicUsize::new(0),
            accounts: Mutex::new(HashMap::new()),
            existing: Mutex::new(HashSet::new()),
            failing: Mutex::new(HashSet::new()),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    pub fn set_status(&self, status: LiveStatus) {
        *self.status.lock().unwrap() = status;
    }

    pub fn set_live(&self, live: bool) {
        self.status.lock().unwrap().is_live = live;
    }

    pub fn fail_status(&self, fail: bool) {
        self.fail_status.store(fail, Ordering::SeqCst);
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn add_account(&self, username: &str, id: &str) {
        self.accounts
            .lock()
            .unwrap()
            .insert(username.to_lowercase(), id.to_string());
    }

    pub fn already_subscribed(&self, kind: SubscriptionKind) {
        self.existing.lock().unwrap().insert(kind);
    }

    pub fn fail_subscribe(&self, kind: SubscriptionKind) {
        self.failing.lock().unwrap().insert(kind);
    }

    pub fn subscriptions(&self) -> Vec<(String, SubscriptionKind)> {
        self.subscriptions.lock().unwrap().clone()
    }
}

#[async_trait]
impl StreamingPlatform for FakePlatform {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn live_status(&self, _account_id: &str, _account_username: &str) -> Result<LiveStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_status.load(Ordering::SeqCst) {
            return Err(Error::External("platform unavailable".into()));
        }
        Ok(self.status.lock().unwrap().clone())
    }

    async fn resolve_account(&self, username: &str) -> Result<Option<String>> {
        Ok(self
            .accounts
            .lock()
            .unwrap()
            .get(&username.to_lowercase())
            .cloned())
    }

    async fn subscribe(&self, account_id: &str, kind: SubscriptionKind) -> Result<SubscribeOutcome> {
        self.subscriptions
            .lock()
            .unwrap()
            .push((account_id.to_string(), kind));
        if self.failing.lock().unwrap().contains(&kind) {
            return Err(Error::External(format!("{kind} rejected")));
        }
        if self.existing.lock().unwrap().contains(&kind) {
            return Ok(SubscribeOutcome::AlreadyExists);
        }
        Ok(SubscribeOutcome::Created)
    }
}
