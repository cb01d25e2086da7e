use std::sync::Arc;

use crate::{
    domain::{CommunityId, MemberId, RoleId},
    outcome::{EffectOutcome, SkipReason},
    ports::ChatPort,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RoleAction {
    Grant,
    Revoke,
}

/// Grants and revokes the live role. Best-effort: never returns an error.
pub struct RoleManager {
    chat: Arc<dyn ChatPort>,
}

impl RoleManager {
    pub fn new(chat: Arc<dyn ChatPort>) -> Self {
        Self { chat }
    }

    pub async fn grant(
        &self,
        community: &CommunityId,
        member: &MemberId,
        role: Option<&RoleId>,
    ) -> EffectOutcome {
        self.apply(RoleAction::Grant, community, member, role).await
    }

    pub async fn revoke(
        &self,
        community: &CommunityId,
        member: &MemberId,
        role: Option<&RoleId>,
    ) -> EffectOutcome {
        self.apply(RoleAction::Revoke, community, member, role).await
    }

    async fn apply(
        &self,
        action: RoleAction,
        community: &CommunityId,
        member: &MemberId,
        role: Option<&RoleId>,
    ) -> EffectOutcome {
        let Some(role) = role.filter(|r| !r.as_str().trim().is_empty()) else {
            return EffectOutcome::Skipped(SkipReason::NotConfigured);
        };

        match self.chat.fetch_member(community, member).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                tracing::debug!(%community, %member, "member not found, skipping role change");
                return EffectOutcome::Skipped(SkipReason::MemberNotFound);
            }
            Err(e) if e.is_not_found() => {
                return EffectOutcome::Skipped(SkipReason::MemberNotFound);
            }
            Err(e) => {
                tracing::warn!(%community, %member, "member lookup failed: {e}");
                return EffectOutcome::Failed(e.to_string());
            }
        }

        let res = match action {
            RoleAction::Grant => self.chat.add_role(community, member, role).await,
            RoleAction::Revoke => self.chat.remove_role(community, member, role).await,
        };

        match res {
            Ok(()) => {
                tracing::info!(%community, %member, %role, ?action, "live role updated");
                EffectOutcome::Applied
            }
            Err(e) => {
                tracing::warn!(%community, %member, %role, ?action, "live role update failed: {e}");
                EffectOutcome::Failed(e.to_string())
            }
        }
    }
}
