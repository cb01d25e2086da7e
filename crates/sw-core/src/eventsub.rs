//! Push ingress: EventSub-style webhook envelopes.
//!
//! The HTTP layer hands raw headers and body to [`WebhookAdapter::handle`] and
//! maps the [`WebhookReply`] back onto a response. Notifications are handed to
//! the reconciler on a tracked background task, so the sender is acknowledged
//! before (and regardless of how) reconciliation completes.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tokio_util::task::TaskTracker;

use crate::{
    domain::{Platform, Presence, PresenceObservation},
    errors::Error,
    reconciler::StateReconciler,
    Result,
};

pub const HEADER_MESSAGE_ID: &str = "twitch-eventsub-message-id";
pub const HEADER_TIMESTAMP: &str = "twitch-eventsub-message-timestamp";
pub const HEADER_SIGNATURE: &str = "twitch-eventsub-message-signature";
pub const HEADER_MESSAGE_TYPE: &str = "twitch-eventsub-message-type";

/// The delivery headers the adapter cares about, already extracted by the HTTP layer.
#[derive(Clone, Debug, Default)]
pub struct WebhookHeaders {
    pub message_id: Option<String>,
    pub timestamp: Option<String>,
    pub signature: Option<String>,
    pub message_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    challenge: Option<String>,
    #[serde(default)]
    subscription: Option<SubscriptionInfo>,
    #[serde(default, rename = "subscriptionType", alias = "subscription_type")]
    subscription_type: Option<String>,
    #[serde(default)]
    event: Option<EventFields>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionInfo {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct EventFields {
    #[serde(default, alias = "accountId")]
    broadcaster_user_id: Option<String>,
    #[serde(default, alias = "accountName")]
    broadcaster_user_name: Option<String>,
    #[serde(default)]
    broadcaster_user_login: Option<String>,
    #[serde(default, alias = "categoryName", alias = "category_name")]
    game_name: Option<String>,
    #[serde(default, alias = "thumbnailUrlTemplate")]
    thumbnail_url: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

/// A parsed delivery.
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    Challenge(String),
    Event(PresenceObservation),
    Revocation { kind: String, status: Option<String> },
}

/// Map a subscription type, native or logical, onto presence.
pub fn presence_for(subscription_type: &str) -> Option<Presence> {
    match subscription_type.trim() {
        "stream.online" | "presence.online" => Some(Presence::Online),
        "stream.offline" | "presence.offline" => Some(Presence::Offline),
        _ => None,
    }
}

/// Parse a delivery body. `message_type` is the value of the message-type
/// header when the sender provided one.
pub fn parse_delivery(message_type: Option<&str>, body: &[u8]) -> Result<Inbound> {
    let envelope: Envelope = serde_json::from_slice(body)
        .map_err(|e| Error::InvalidPayload(format!("malformed webhook body: {e}")))?;

    match message_type.map(str::trim) {
        Some("webhook_callback_verification") => {
            return envelope
                .challenge
                .filter(|c| !c.is_empty())
                .map(Inbound::Challenge)
                .ok_or_else(|| Error::InvalidPayload("verification without challenge".into()));
        }
        Some("revocation") => {
            let (kind, status) = envelope
                .subscription
                .map(|s| (s.kind, s.status))
                .unwrap_or_else(|| ("unknown".to_string(), None));
            return Ok(Inbound::Revocation { kind, status });
        }
        _ => {}
    }

    if envelope.event.is_none() {
        if let Some(challenge) = envelope.challenge.filter(|c| !c.is_empty()) {
            return Ok(Inbound::Challenge(challenge));
        }
    }

    let kind = envelope
        .subscription
        .map(|s| s.kind)
        .or(envelope.subscription_type)
        .ok_or_else(|| Error::InvalidPayload("missing subscription type".into()))?;
    let presence = presence_for(&kind)
        .ok_or_else(|| Error::InvalidPayload(format!("unsupported subscription type {kind}")))?;

    let event = envelope
        .event
        .ok_or_else(|| Error::InvalidPayload("missing event".into()))?;
    let account_id = non_blank(event.broadcaster_user_id)
        .ok_or_else(|| Error::InvalidPayload("missing account id".into()))?;

    let mut obs = PresenceObservation::new(Platform::Twitch, account_id, presence);
    let login = non_blank(event.broadcaster_user_login);
    obs.account_name = non_blank(event.broadcaster_user_name).or_else(|| login.clone());
    obs.title = non_blank(event.title);
    obs.category = non_blank(event.game_name);
    obs.thumbnail_url = non_blank(event.thumbnail_url);
    obs.stream_url = login.map(|l| format!("https://twitch.tv/{l}"));
    Ok(Inbound::Event(obs))
}

fn non_blank(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Verify `sha256=<hex>` over `message_id + timestamp + body`.
pub fn verify_signature(
    secret: &str,
    message_id: &str,
    timestamp: &str,
    body: &[u8],
    signature_header: &str,
) -> Result<()> {
    let digest_hex = signature_header
        .trim()
        .strip_prefix("sha256=")
        .ok_or_else(|| Error::Signature("signature must use sha256=<hex> format".into()))?;
    let expected = decode_hex(digest_hex)?;
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::Signature(format!("failed to initialize hmac verifier: {e}")))?;
    mac.update(message_id.as_bytes());
    mac.update(timestamp.as_bytes());
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| Error::Signature("signature verification failed".into()))
}

/// Reject deliveries whose timestamp is further than `max_age` from `now`.
pub fn check_message_age(timestamp: &str, max_age: Duration, now: DateTime<Utc>) -> Result<()> {
    let sent = DateTime::parse_from_rfc3339(timestamp.trim())
        .map_err(|e| Error::Signature(format!("invalid message timestamp: {e}")))?
        .with_timezone(&Utc);
    let age = now.signed_duration_since(sent).num_seconds().unsigned_abs();
    if age > max_age.as_secs() {
        return Err(Error::Signature(format!("message is {age}s old")));
    }
    Ok(())
}

fn decode_hex(raw: &str) -> Result<Vec<u8>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.len() % 2 != 0 {
        return Err(Error::Signature("signature digest must be non-empty even-length hex".into()));
    }
    (0..trimmed.len())
        .step_by(2)
        .map(|i| {
            trimmed
                .get(i..i + 2)
                .and_then(|chunk| u8::from_str_radix(chunk, 16).ok())
                .ok_or_else(|| Error::Signature("invalid hex in signature digest".into()))
        })
        .collect()
}

#[derive(Clone, Debug)]
pub struct WebhookSettings {
    /// Shared signing secret. Without one, signatures and ages are not checked.
    pub secret: Option<String>,
    pub max_message_age: Duration,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WebhookReply {
    /// Echo as `text/plain` with 200.
    Challenge(String),
    /// Event handed off; acknowledge with 204.
    Accepted,
    /// Subscription revoked by the sender; acknowledge with 204.
    Revoked,
    /// Bad signature or stale delivery; 403.
    Forbidden(String),
    /// Undecodable body; 400.
    Malformed(String),
}

pub struct WebhookAdapter {
    reconciler: Arc<StateReconciler>,
    settings: WebhookSettings,
    tracker: TaskTracker,
}

impl WebhookAdapter {
    pub fn new(reconciler: Arc<StateReconciler>, settings: WebhookSettings) -> Self {
        Self {
            reconciler,
            settings,
            tracker: TaskTracker::new(),
        }
    }

    pub fn handle(&self, headers: &WebhookHeaders, body: &[u8]) -> WebhookReply {
        if let Err(e) = self.authenticate(headers, body) {
            tracing::warn!(message_id = ?headers.message_id, "webhook rejected: {e}");
            return WebhookReply::Forbidden(e.to_string());
        }

        match parse_delivery(headers.message_type.as_deref(), body) {
            Ok(Inbound::Challenge(challenge)) => {
                tracing::info!("webhook verification handshake answered");
                WebhookReply::Challenge(challenge)
            }
            Ok(Inbound::Revocation { kind, status }) => {
                tracing::warn!(%kind, status = ?status, "push subscription revoked by sender");
                WebhookReply::Revoked
            }
            Ok(Inbound::Event(obs)) => {
                self.ingest(obs);
                WebhookReply::Accepted
            }
            Err(e) => {
                tracing::warn!(message_id = ?headers.message_id, "webhook body rejected: {e}");
                WebhookReply::Malformed(e.to_string())
            }
        }
    }

    /// Reconcile in the background. Failures are logged by the reconciler and
    /// never reach the sender.
    pub fn ingest(&self, obs: PresenceObservation) {
        let reconciler = self.reconciler.clone();
        tracing::debug!(platform = %obs.platform, account = %obs.account_id, presence = ?obs.presence, "webhook event accepted");
        self.tracker.spawn(async move {
            reconciler.observe(&obs).await;
        });
    }

    /// Stop accepting work and wait for in-flight reconciliation.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    fn authenticate(&self, headers: &WebhookHeaders, body: &[u8]) -> Result<()> {
        let Some(secret) = self.settings.secret.as_deref() else {
            return Ok(());
        };
        let (Some(id), Some(ts), Some(sig)) = (
            headers.message_id.as_deref(),
            headers.timestamp.as_deref(),
            headers.signature.as_deref(),
        ) else {
            return Err(Error::Signature("missing signature headers".into()));
        };
        verify_signature(secret, id, ts, body, sig)?;
        check_message_age(ts, self.settings.max_message_age, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::announce::AnnouncementManager;
    use crate::defaults::{DefaultsPolicy, DefaultsResolver};
    use crate::domain::{ChannelId, CommunityId, MemberId, RoleId, SubscriberKey, SubscriberRecord};
    use crate::locks::KeyLocks;
    use crate::ports::PlatformRegistry;
    use crate::store::{MemoryStore, PresenceStore};
    use crate::testing::{FakeChat, FakePlatform};

    fn sign(secret: &str, message_id: &str, timestamp: &str, body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(message_id.as_bytes());
        mac.update(timestamp.as_bytes());
        mac.update(body);
        let hex: String = mac
            .finalize()
            .into_bytes()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();
        format!("sha256={hex}")
    }

    const NATIVE_ONLINE: &str = r#"{
        "subscription": {"type": "stream.online", "status": "enabled"},
        "event": {
            "broadcaster_user_id": "100",
            "broadcaster_user_login": "streamer",
            "broadcaster_user_name": "Streamer"
        }
    }"#;

    #[test]
    fn parses_native_and_logical_envelopes() {
        let Inbound::Event(obs) = parse_delivery(Some("notification"), NATIVE_ONLINE.as_bytes()).unwrap() else {
            panic!("expected event");
        };
        assert!(obs.is_live());
        assert_eq!(obs.account_id, "100");
        assert_eq!(obs.account_name.as_deref(), Some("Streamer"));
        assert_eq!(obs.stream_url.as_deref(), Some("https://twitch.tv/streamer"));

        let logical = br#"{"subscriptionType":"presence.offline","event":{"accountId":"7","accountName":"X","categoryName":"RPG"}}"#;
        let Inbound::Event(obs) = parse_delivery(None, logical).unwrap() else {
            panic!("expected event");
        };
        assert!(!obs.is_live());
        assert_eq!(obs.account_id, "7");
        assert_eq!(obs.category.as_deref(), Some("RPG"));
    }

    #[test]
    fn challenge_and_revocation() {
        let body = br#"{"challenge":"abc123","subscription":{"type":"stream.online"}}"#;
        assert_eq!(
            parse_delivery(Some("webhook_callback_verification"), body).unwrap(),
            Inbound::Challenge("abc123".into())
        );
        assert_eq!(
            parse_delivery(None, br#"{"challenge":"xyz"}"#).unwrap(),
            Inbound::Challenge("xyz".into())
        );
        let revoked = br#"{"subscription":{"type":"stream.offline","status":"authorization_revoked"}}"#;
        assert_eq!(
            parse_delivery(Some("revocation"), revoked).unwrap(),
            Inbound::Revocation {
                kind: "stream.offline".into(),
                status: Some("authorization_revoked".into())
            }
        );
    }

    #[test]
    fn rejects_bad_shapes() {
        assert!(parse_delivery(None, b"not json").is_err());
        assert!(parse_delivery(None, br#"{"subscriptionType":"channel.follow","event":{"accountId":"1"}}"#).is_err());
        assert!(parse_delivery(None, br#"{"subscriptionType":"presence.online","event":{}}"#).is_err());
        assert!(parse_delivery(Some("webhook_callback_verification"), b"{}").is_err());
    }

    #[test]
    fn signature_roundtrip_and_tamper() {
        let ts = "2026-01-01T00:00:00Z";
        let sig = sign("s3cret", "m1", ts, b"body");
        assert!(verify_signature("s3cret", "m1", ts, b"body", &sig).is_ok());
        assert!(verify_signature("s3cret", "m1", ts, b"b0dy", &sig).is_err());
        assert!(verify_signature("other", "m1", ts, b"body", &sig).is_err());
        assert!(verify_signature("s3cret", "m1", ts, b"body", "md5=00").is_err());
        assert!(verify_signature("s3cret", "m1", ts, b"body", "sha256=zz").is_err());
    }

    #[test]
    fn stale_messages_are_rejected() {
        let now = DateTime::parse_from_rfc3339("2026-01-01T00:20:00Z").unwrap().with_timezone(&Utc);
        let max = Duration::from_secs(600);
        assert!(check_message_age("2026-01-01T00:15:00Z", max, now).is_ok());
        assert!(check_message_age("2026-01-01T00:05:00Z", max, now).is_err());
        assert!(check_message_age("yesterday", max, now).is_err());
    }

    async fn adapter(secret: Option<&str>) -> (WebhookAdapter, Arc<FakeChat>) {
        let store = Arc::new(MemoryStore::new());
        let mut record = SubscriberRecord::new(
            SubscriberKey::new(CommunityId::new("g"), MemberId::new("u"), Platform::Twitch),
            "100",
            "streamer",
        );
        record.channel_id = Some(ChannelId::new("c"));
        record.role_id = Some(RoleId::new("r"));
        store.insert_if_absent(&record).await.unwrap();

        let chat = Arc::new(FakeChat::default());
        let platforms = PlatformRegistry::new().with(Arc::new(FakePlatform::new(Platform::Twitch)));
        let announcements = Arc::new(AnnouncementManager::new(
            chat.clone(),
            platforms.clone(),
            Duration::from_secs(60),
            "https://fallback",
        ));
        let reconciler = Arc::new(StateReconciler::new(
            store.clone(),
            chat.clone(),
            platforms,
            DefaultsResolver::new(store, DefaultsPolicy::Sticky),
            announcements,
            Arc::new(KeyLocks::new()),
        ));
        let settings = WebhookSettings {
            secret: secret.map(str::to_string),
            max_message_age: Duration::from_secs(600),
        };
        (WebhookAdapter::new(reconciler, settings), chat)
    }

    #[tokio::test]
    async fn accepted_events_reconcile_in_background() {
        let (adapter, chat) = adapter(None).await;
        let headers = WebhookHeaders {
            message_type: Some("notification".into()),
            ..WebhookHeaders::default()
        };
        for _ in 0..3 {
            assert_eq!(adapter.handle(&headers, NATIVE_ONLINE.as_bytes()), WebhookReply::Accepted);
        }
        adapter.drain().await;
        assert_eq!(chat.grants(), 1);
        assert_eq!(chat.sends(), 1);
    }

    #[tokio::test]
    async fn signed_deliveries_are_enforced() {
        let (adapter, chat) = adapter(Some("s3cret")).await;
        let ts = Utc::now().to_rfc3339();
        let body = NATIVE_ONLINE.as_bytes();

        let unsigned = WebhookHeaders::default();
        assert!(matches!(adapter.handle(&unsigned, body), WebhookReply::Forbidden(_)));

        let forged = WebhookHeaders {
            message_id: Some("m1".into()),
            timestamp: Some(ts.clone()),
            signature: Some(sign("wrong", "m1", &ts, body)),
            message_type: Some("notification".into()),
        };
        assert!(matches!(adapter.handle(&forged, body), WebhookReply::Forbidden(_)));

        let signed = WebhookHeaders {
            signature: Some(sign("s3cret", "m1", &ts, body)),
            ..forged
        };
        assert_eq!(adapter.handle(&signed, body), WebhookReply::Accepted);
        adapter.drain().await;
        assert_eq!(chat.grants(), 1);
    }

    #[tokio::test]
    async fn malformed_body_is_reported() {
        let (adapter, _) = adapter(None).await;
        let reply = adapter.handle(&WebhookHeaders::default(), b"{");
        assert!(matches!(reply, WebhookReply::Malformed(_)));
        assert_eq!(adapter.in_flight(), 0);
    }
}
