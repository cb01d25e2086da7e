//! Side effects reported as values.
//!
//! Role and announcement effects are best-effort: a failure is logged and
//! recorded here, never propagated, so one cannot block or roll back the other.

use std::fmt;

use crate::domain::SubscriberKey;

/// Why an effect was not attempted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// No role or channel resolved, even after community defaults.
    NotConfigured,
    /// The member left the community or never existed.
    MemberNotFound,
    /// No announcement is tracked for the subject.
    NotTracked,
    /// The transition did not call for this effect.
    NoTransition,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EffectOutcome {
    Applied,
    Skipped(SkipReason),
    Failed(String),
}

impl EffectOutcome {
    pub fn none() -> Self {
        EffectOutcome::Skipped(SkipReason::NoTransition)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, EffectOutcome::Failed(_))
    }
}

/// Announcement effect detail.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AnnouncementEffect {
    Created,
    Updated,
    TornDown,
    Skipped(SkipReason),
    Failed(String),
}

impl AnnouncementEffect {
    pub fn none() -> Self {
        AnnouncementEffect::Skipped(SkipReason::NoTransition)
    }
}

/// What the reconciler decided for one subscriber and one observation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transition {
    /// Persisted false -> true.
    WentLive,
    /// Already live; content refreshed if tracked.
    StillLive,
    /// Persisted true -> false.
    WentOffline,
    /// Already offline; nothing to do.
    StillOffline,
    /// Category filter mismatch. No state read or written.
    Filtered,
    /// No record for the key (untracked in the interim).
    Untracked,
    /// Community/record lookup or the state write failed; prior state intact.
    Aborted(String),
}

impl Transition {
    pub fn changed_state(&self) -> bool {
        matches!(self, Transition::WentLive | Transition::WentOffline)
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::WentLive => f.write_str("went live"),
            Transition::StillLive => f.write_str("still live"),
            Transition::WentOffline => f.write_str("went offline"),
            Transition::StillOffline => f.write_str("still offline"),
            Transition::Filtered => f.write_str("filtered"),
            Transition::Untracked => f.write_str("untracked"),
            Transition::Aborted(reason) => write!(f, "aborted: {reason}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub key: SubscriberKey,
    pub transition: Transition,
    pub role: EffectOutcome,
    pub announcement: AnnouncementEffect,
}

impl TransitionOutcome {
    pub fn without_effects(key: SubscriberKey, transition: Transition) -> Self {
        Self {
            key,
            transition,
            role: EffectOutcome::none(),
            announcement: AnnouncementEffect::none(),
        }
    }
}
