//! Streaming platform adapters (reqwest).
//!
//! Twitch is push-capable (Helix + EventSub); YouTube and Kick are polled.

use std::{sync::Arc, time::Duration};

use sw_core::{config::Config, errors::Error, ports::PlatformRegistry, Result};

pub mod kick;
pub mod twitch;
pub mod youtube;

pub use kick::KickClient;
pub use twitch::{TwitchClient, TwitchSettings};
pub use youtube::YouTubeClient;

const USER_AGENT: &str = concat!("streamwatch/", env!("CARGO_PKG_VERSION"));

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| Error::Config(format!("failed to build http client: {e}")))
}

pub(crate) fn request_error(platform: &str, e: reqwest::Error) -> Error {
    if e.is_timeout() {
        return Error::Timeout(format!("{platform} request: {e}"));
    }
    Error::External(format!("{platform} request error: {e}"))
}

/// Turn a non-success response into an error, keeping a short body excerpt.
pub(crate) async fn error_for_status(platform: &str, resp: reqwest::Response) -> Error {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    let excerpt: String = body.chars().take(200).collect();
    if status == reqwest::StatusCode::NOT_FOUND {
        return Error::NotFound(format!("{platform}: {excerpt}"));
    }
    Error::External(format!("{platform} request failed: {status} {excerpt}"))
}

pub(crate) fn non_blank(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Build every adapter the configuration has credentials for.
pub fn build_registry(config: &Config) -> Result<PlatformRegistry> {
    let timeout = config.outbound_timeout;
    let mut registry = PlatformRegistry::new();

    match config.twitch.as_ref() {
        Some(creds) => {
            let settings = TwitchSettings {
                client_id: creds.client_id.clone(),
                client_secret: creds.client_secret.clone(),
                callback_url: creds.callback_url.clone(),
                eventsub_secret: config.eventsub_secret.clone(),
            };
            registry.insert(Arc::new(TwitchClient::new(settings, timeout)?));
        }
        None => tracing::warn!("twitch credentials missing; push ingestion disabled"),
    }

    match config.youtube_api_key.as_ref() {
        Some(key) => registry.insert(Arc::new(YouTubeClient::new(key.clone(), timeout)?)),
        None => tracing::info!("YOUTUBE_API_KEY not set; youtube polling disabled"),
    }

    registry.insert(Arc::new(KickClient::new(timeout)?));

    tracing::info!(platforms = ?registry.platforms(), "streaming platforms configured");
    Ok(registry)
}
