//! Discord adapter (serenity HTTP client).
//!
//! Implements the `sw-core` ChatPort over the Discord REST API. No gateway
//! connection is opened; every call is a plain HTTP request.

use std::sync::Arc;

use async_trait::async_trait;
use serenity::{
    builder::{CreateEmbed, CreateMessage, EditMessage},
    http::Http,
    model::{
        id::{ChannelId as DcChannelId, GuildId, MessageId as DcMessageId, RoleId as DcRoleId, UserId},
        Timestamp,
    },
};

use sw_core::{
    announce::render::{Announcement, WATCH_FIELD_NAME},
    domain::{ChannelId, Community, CommunityId, Member, MemberId, MessageId, MessageRef, RoleId},
    errors::Error,
    ports::ChatPort,
    Result,
};

const AUDIT_REASON: &str = "streamwatch live status";

#[derive(Clone)]
pub struct DiscordChat {
    http: Arc<Http>,
}

impl DiscordChat {
    pub fn new(token: &str) -> Self {
        Self {
            http: Arc::new(Http::new(token)),
        }
    }

    pub fn from_http(http: Arc<Http>) -> Self {
        Self { http }
    }

    fn map_err(e: serenity::Error) -> Error {
        if is_not_found(&e) {
            return Error::NotFound(format!("discord: {e}"));
        }
        Error::External(format!("discord error: {e}"))
    }
}

fn is_not_found(e: &serenity::Error) -> bool {
    match e {
        serenity::Error::Http(http) => http.status_code().map(|s| s.as_u16()) == Some(404),
        _ => false,
    }
}

/// Discord snowflakes are non-zero u64s; the id constructors panic on zero.
fn snowflake(kind: &str, raw: &str) -> Result<u64> {
    match raw.trim().parse::<u64>() {
        Ok(id) if id != 0 => Ok(id),
        _ => Err(Error::InvalidPayload(format!("invalid discord {kind} id: {raw:?}"))),
    }
}

fn guild(id: &CommunityId) -> Result<GuildId> {
    snowflake("guild", id.as_str()).map(GuildId::new)
}

fn user(id: &MemberId) -> Result<UserId> {
    snowflake("user", id.as_str()).map(UserId::new)
}

fn role(id: &RoleId) -> Result<DcRoleId> {
    snowflake("role", id.as_str()).map(DcRoleId::new)
}

fn channel(id: &ChannelId) -> Result<DcChannelId> {
    snowflake("channel", id.as_str()).map(DcChannelId::new)
}

fn message(id: &MessageId) -> Result<DcMessageId> {
    snowflake("message", id.as_str()).map(DcMessageId::new)
}

/// Embed body text: the optional category line.
fn description(a: &Announcement) -> Option<String> {
    a.category.as_ref().map(|c| format!("🎯 **Category:** {c}"))
}

fn embed(a: &Announcement) -> CreateEmbed {
    let mut embed = CreateEmbed::new()
        .title(&a.title)
        .url(&a.url)
        .colour(a.color)
        .image(&a.image_url)
        .field(WATCH_FIELD_NAME, &a.url, false);
    if let Some(text) = description(a) {
        embed = embed.description(text);
    }
    if let Ok(ts) = Timestamp::from_unix_timestamp(a.timestamp.timestamp()) {
        embed = embed.timestamp(ts);
    }
    embed
}

#[async_trait]
impl ChatPort for DiscordChat {
    async fn fetch_community(&self, community: &CommunityId) -> Result<Option<Community>> {
        match self.http.get_guild(guild(community)?).await {
            Ok(g) => Ok(Some(Community {
                id: community.clone(),
                name: g.name,
            })),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(Self::map_err(e)),
        }
    }

    async fn fetch_member(
        &self,
        community: &CommunityId,
        member: &MemberId,
    ) -> Result<Option<Member>> {
        match self.http.get_member(guild(community)?, user(member)?).await {
            Ok(m) => Ok(Some(Member {
                id: member.clone(),
                display_name: m.display_name().to_string(),
            })),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(Self::map_err(e)),
        }
    }

    async fn add_role(
        &self,
        community: &CommunityId,
        member: &MemberId,
        role_id: &RoleId,
    ) -> Result<()> {
        self.http
            .add_member_role(guild(community)?, user(member)?, role(role_id)?, Some(AUDIT_REASON))
            .await
            .map_err(Self::map_err)
    }

    async fn remove_role(
        &self,
        community: &CommunityId,
        member: &MemberId,
        role_id: &RoleId,
    ) -> Result<()> {
        self.http
            .remove_member_role(guild(community)?, user(member)?, role(role_id)?, Some(AUDIT_REASON))
            .await
            .map_err(Self::map_err)
    }

    async fn send_announcement(
        &self,
        channel_id: &ChannelId,
        announcement: &Announcement,
    ) -> Result<MessageRef> {
        let builder = CreateMessage::new()
            .content(&announcement.header)
            .embed(embed(announcement));
        let sent = channel(channel_id)?
            .send_message(&*self.http, builder)
            .await
            .map_err(Self::map_err)?;
        tracing::debug!(channel = %channel_id, message = %sent.id, "discord message sent");
        Ok(MessageRef {
            channel_id: channel_id.clone(),
            message_id: MessageId::new(sent.id.get().to_string()),
        })
    }

    async fn edit_announcement(&self, msg: &MessageRef, announcement: &Announcement) -> Result<()> {
        let builder = EditMessage::new()
            .content(&announcement.header)
            .embed(embed(announcement));
        channel(&msg.channel_id)?
            .edit_message(&*self.http, message(&msg.message_id)?, builder)
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }
}
