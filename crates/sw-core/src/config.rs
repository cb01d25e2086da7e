use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{defaults::DefaultsPolicy, errors::Error, Result};

const DEFAULT_FALLBACK_THUMBNAIL: &str = "https://i.imgur.com/x7kHaIB.jpeg";

/// Typed configuration, read from the environment (and `.env` if present).
#[derive(Clone, Debug)]
pub struct Config {
    // Chat platform
    pub discord_token: String,

    // Storage
    pub database_path: PathBuf,

    // Webhook ingress
    pub webhook_bind: String,
    pub webhook_path: String,
    pub eventsub_secret: Option<String>,
    pub eventsub_max_message_age: Duration,

    // Streaming platforms
    pub twitch: Option<TwitchCredentials>,
    pub youtube_api_key: Option<String>,

    // Timing
    pub poll_interval: Duration,
    pub refresh_interval: Duration,
    pub outbound_timeout: Duration,

    // Behavior
    pub defaults_policy: DefaultsPolicy,
    pub fallback_thumbnail_url: String,
}

#[derive(Clone, Debug)]
pub struct TwitchCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub callback_url: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let discord_token = env_str("DISCORD_TOKEN").unwrap_or_default();
        if discord_token.trim().is_empty() {
            return Err(Error::Config(
                "DISCORD_TOKEN environment variable is required".to_string(),
            ));
        }

        let database_path =
            PathBuf::from(env_str("DATABASE_PATH").unwrap_or("./streamers.db".to_string()));

        let webhook_bind = env_str("WEBHOOK_BIND")
            .and_then(non_empty)
            .unwrap_or("0.0.0.0:8080".to_string());
        let webhook_path = normalize_route(
            &env_str("WEBHOOK_PATH")
                .and_then(non_empty)
                .unwrap_or("/eventsub".to_string()),
        );

        // Twitch is enabled only when both halves of the app credential are present.
        let twitch = match (
            env_str("TWITCH_CLIENT_ID").and_then(non_empty),
            env_str("TWITCH_CLIENT_SECRET").and_then(non_empty),
        ) {
            (Some(client_id), Some(client_secret)) => Some(TwitchCredentials {
                client_id,
                client_secret,
                callback_url: env_str("TWITCH_CALLBACK_URL").and_then(non_empty),
            }),
            _ => None,
        };
        let eventsub_secret = env_str("TWITCH_EVENTSUB_SECRET")
            .and_then(non_empty)
            .or_else(|| twitch.as_ref().map(|t| t.client_secret.clone()));
        let eventsub_max_message_age =
            Duration::from_secs(env_u64("EVENTSUB_MAX_MESSAGE_AGE_SECS").unwrap_or(600));

        let youtube_api_key = env_str("YOUTUBE_API_KEY").and_then(non_empty);

        let poll_interval = Duration::from_secs(env_u64("POLL_INTERVAL_SECS").unwrap_or(60).max(1));
        let refresh_interval =
            Duration::from_secs(env_u64("REFRESH_INTERVAL_SECS").unwrap_or(30).max(1));
        let outbound_timeout =
            Duration::from_millis(env_u64("OUTBOUND_TIMEOUT_MS").unwrap_or(10_000).max(100));

        let defaults_policy = match env_str("DEFAULTS_POLICY").and_then(non_empty) {
            Some(raw) => raw.parse()?,
            None => DefaultsPolicy::Sticky,
        };

        let fallback_thumbnail_url = env_str("FALLBACK_THUMBNAIL_URL")
            .and_then(non_empty)
            .unwrap_or(DEFAULT_FALLBACK_THUMBNAIL.to_string());

        Ok(Self {
            discord_token,
            database_path,
            webhook_bind,
            webhook_path,
            eventsub_secret,
            eventsub_max_message_age,
            twitch,
            youtube_api_key,
            poll_interval,
            refresh_interval,
            outbound_timeout,
            defaults_policy,
            fallback_thumbnail_url,
        })
    }

    /// Whether push ingestion can be served and subscriptions established.
    pub fn push_enabled(&self) -> bool {
        self.twitch
            .as_ref()
            .map(|t| t.callback_url.is_some())
            .unwrap_or(false)
    }
}

fn normalize_route(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        out.push((key.to_string(), val));
    }
    out
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
