//! Daily usage quotas.
//!
//! Counters are reset lazily: every incoming message calls `Store::reset_quota_if_stale`,
//! which uses [`needs_reset`] against the stored last-reset timestamp. There is no
//! background timer.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{QuotaLimits, TierLimits};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuotaTier {
    #[default]
    Free,
    Premium,
}

impl QuotaTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaTier::Free => "free",
            QuotaTier::Premium => "premium",
        }
    }

    pub fn parse(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("premium") {
            QuotaTier::Premium
        } else {
            QuotaTier::Free
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuotaKind {
    Image,
    Video,
}

/// Current usage of one user
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    pub tier: QuotaTier,
    pub images_used: u32,
    pub videos_used: u32,
}

impl QuotaSnapshot {
    pub fn used(&self, kind: QuotaKind) -> u32 {
        match kind {
            QuotaKind::Image => self.images_used,
            QuotaKind::Video => self.videos_used,
        }
    }

    pub fn limit(&self, kind: QuotaKind, limits: &QuotaLimits) -> u32 {
        let tier: TierLimits = match self.tier {
            QuotaTier::Free => limits.free,
            QuotaTier::Premium => limits.premium,
        };
        match kind {
            QuotaKind::Image => tier.daily_images,
            QuotaKind::Video => tier.daily_videos,
        }
    }

    pub fn has_remaining(&self, kind: QuotaKind, limits: &QuotaLimits) -> bool {
        self.used(kind) < self.limit(kind, limits)
    }
}

/// A rolling 24h window has passed since `last_reset`
pub fn needs_reset(last_reset: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match last_reset {
        Some(last) => now - last >= Duration::days(1),
        None => true,
    }
}
