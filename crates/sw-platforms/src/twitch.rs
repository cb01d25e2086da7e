//! Twitch Helix + EventSub client.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::{sync::Mutex, time::Instant};

use sw_core::{
    domain::{LiveStatus, Platform},
    errors::Error,
    ports::{StreamingPlatform, SubscribeOutcome, SubscriptionKind},
    Result,
};

use crate::{error_for_status, http_client, non_blank, request_error};

const TOKEN_URL: &str = "https://id.twitch.tv/oauth2/token";
const HELIX_URL: &str = "https://api.twitch.tv/helix";
/// Refresh the app token this long before Twitch says it expires.
const TOKEN_EARLY_REFRESH: Duration = Duration::from_secs(60);

#[derive(Clone, Debug)]
pub struct TwitchSettings {
    pub client_id: String,
    pub client_secret: String,
    /// Public URL of the webhook endpoint. Without it no subscriptions are created.
    pub callback_url: Option<String>,
    pub eventsub_secret: Option<String>,
}

struct CachedToken {
    token: String,
    refresh_at: Instant,
}

pub struct TwitchClient {
    settings: TwitchSettings,
    http: reqwest::Client,
    token: Mutex<Option<CachedToken>>,
    helix_url: String,
    token_url: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct HelixUser {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct HelixStream {
    #[serde(default)]
    user_login: Option<String>,
    #[serde(default)]
    user_name: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    game_name: Option<String>,
    #[serde(default)]
    thumbnail_url: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateSubscription<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    version: &'a str,
    condition: Condition<'a>,
    transport: Transport<'a>,
}

#[derive(Debug, Serialize)]
struct Condition<'a> {
    broadcaster_user_id: &'a str,
}

#[derive(Debug, Serialize)]
struct Transport<'a> {
    method: &'a str,
    callback: &'a str,
    secret: &'a str,
}

impl TwitchClient {
    pub fn new(settings: TwitchSettings, timeout: Duration) -> Result<Self> {
        Ok(Self {
            settings,
            http: http_client(timeout)?,
            token: Mutex::new(None),
            helix_url: HELIX_URL.to_string(),
            token_url: TOKEN_URL.to_string(),
        })
    }

    /// Point the client at another Helix deployment (mock servers).
    pub fn with_base_urls(mut self, helix_url: impl Into<String>, token_url: impl Into<String>) -> Self {
        self.helix_url = helix_url.into();
        self.token_url = token_url.into();
        self
    }

    async fn app_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(t) = cached.as_ref() {
            if Instant::now() < t.refresh_at {
                return Ok(t.token.clone());
            }
        }

        let resp = self
            .http
            .post(&self.token_url)
            .query(&[
                ("client_id", self.settings.client_id.as_str()),
                ("client_secret", self.settings.client_secret.as_str()),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await
            .map_err(|e| request_error("twitch", e))?;
        if !resp.status().is_success() {
            return Err(error_for_status("twitch token", resp).await);
        }
        let body: TokenResponse = resp
            .json()
            .await
            .map_err(|e| Error::External(format!("twitch token json error: {e}")))?;

        let lifetime = Duration::from_secs(body.expires_in).saturating_sub(TOKEN_EARLY_REFRESH);
        *cached = Some(CachedToken {
            token: body.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        tracing::debug!(expires_in = body.expires_in, "twitch app token refreshed");
        Ok(body.access_token)
    }

    async fn forget_token(&self) {
        *self.token.lock().await = None;
    }

    async fn helix_get<T: for<'de> Deserialize<'de>>(&self, path: &str, query: &[(&str, &str)]) -> Result<Page<T>> {
        let token = self.app_token().await?;
        let resp = self
            .http
            .get(format!("{}/{path}", self.helix_url))
            .header("Client-ID", &self.settings.client_id)
            .bearer_auth(token)
            .query(query)
            .send()
            .await
            .map_err(|e| request_error("twitch", e))?;

        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            self.forget_token().await;
        }
        if !resp.status().is_success() {
            return Err(error_for_status("twitch", resp).await);
        }
        resp.json()
            .await
            .map_err(|e| Error::External(format!("twitch json error: {e}")))
    }
}

fn status_from_streams(page: Page<HelixStream>, login: &str) -> LiveStatus {
    let Some(stream) = page.data.into_iter().next() else {
        return LiveStatus::offline();
    };
    let login = non_blank(stream.user_login).unwrap_or_else(|| login.to_string());
    LiveStatus {
        is_live: true,
        account_name: non_blank(stream.user_name),
        title: non_blank(stream.title),
        url: Some(format!("https://twitch.tv/{login}")),
        thumbnail_url: non_blank(stream.thumbnail_url),
        category: non_blank(stream.game_name),
    }
}

#[async_trait]
impl StreamingPlatform for TwitchClient {
    fn platform(&self) -> Platform {
        Platform::Twitch
    }

    async fn live_status(&self, account_id: &str, account_username: &str) -> Result<LiveStatus> {
        let page = self
            .helix_get::<HelixStream>("streams", &[("user_id", account_id)])
            .await?;
        Ok(status_from_streams(page, account_username))
    }

    async fn resolve_account(&self, username: &str) -> Result<Option<String>> {
        let page = self
            .helix_get::<HelixUser>("users", &[("login", username.trim())])
            .await?;
        Ok(page.data.into_iter().next().map(|u| u.id))
    }

    async fn subscribe(&self, account_id: &str, kind: SubscriptionKind) -> Result<SubscribeOutcome> {
        let callback = self
            .settings
            .callback_url
            .as_deref()
            .ok_or_else(|| Error::Config("TWITCH_CALLBACK_URL is not set".into()))?;
        let secret = self
            .settings
            .eventsub_secret
            .as_deref()
            .unwrap_or(&self.settings.client_secret);

        let body = CreateSubscription {
            kind: kind.event_type(),
            version: "1",
            condition: Condition {
                broadcaster_user_id: account_id,
            },
            transport: Transport {
                method: "webhook",
                callback,
                secret,
            },
        };

        let token = self.app_token().await?;
        let resp = self
            .http
            .post(format!("{}/eventsub/subscriptions", self.helix_url))
            .header("Client-ID", &self.settings.client_id)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| request_error("twitch", e))?;

        match resp.status() {
            s if s.is_success() => Ok(SubscribeOutcome::Created),
            reqwest::StatusCode::CONFLICT => Ok(SubscribeOutcome::AlreadyExists),
            reqwest::StatusCode::UNAUTHORIZED => {
                self.forget_token().await;
                Err(error_for_status("twitch eventsub", resp).await)
            }
            _ => Err(error_for_status("twitch eventsub", resp).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_stream_page_means_offline() {
        let page: Page<HelixStream> = serde_json::from_str(r#"{"data":[]}"#).unwrap();
        assert_eq!(status_from_streams(page, "x"), LiveStatus::offline());
        let page: Page<HelixStream> = serde_json::from_str("{}").unwrap();
        assert!(!status_from_streams(page, "x").is_live);
    }

    #[test]
    fn stream_page_maps_to_live_status() {
        let page: Page<HelixStream> = serde_json::from_str(
            r#"{"data":[{"user_login":"streamer","user_name":"Streamer","title":"speedrun",
                "game_name":"RPG","thumbnail_url":"https://t/{width}x{height}.jpg"}]}"#,
        )
        .unwrap();
        let status = status_from_streams(page, "ignored");
        assert!(status.is_live);
        assert_eq!(status.url.as_deref(), Some("https://twitch.tv/streamer"));
        assert_eq!(status.title.as_deref(), Some("speedrun"));
        assert_eq!(status.category.as_deref(), Some("RPG"));
        assert_eq!(status.account_name.as_deref(), Some("Streamer"));
    }

    #[test]
    fn subscription_body_matches_eventsub_shape() {
        let body = CreateSubscription {
            kind: SubscriptionKind::Offline.event_type(),
            version: "1",
            condition: Condition {
                broadcaster_user_id: "42",
            },
            transport: Transport {
                method: "webhook",
                callback: "https://example.com/eventsub",
                secret: "s",
            },
        };
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["type"], "stream.offline");
        assert_eq!(v["condition"]["broadcaster_user_id"], "42");
        assert_eq!(v["transport"]["method"], "webhook");
    }

    #[tokio::test]
    async fn subscribe_without_callback_is_a_config_error() {
        let client = TwitchClient::new(
            TwitchSettings {
                client_id: "id".into(),
                client_secret: "secret".into(),
                callback_url: None,
                eventsub_secret: None,
            },
            Duration::from_secs(1),
        )
        .unwrap();
        let err = client
            .subscribe("42", SubscriptionKind::Online)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
