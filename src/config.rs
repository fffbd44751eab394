//! # Configuration Module
//!
//! This module defines configuration structures for the bot: retry policies for
//! every remote capability, rate limiting, quotas, moderation defaults and the
//! environment-driven boot settings.

use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

// Constants for bot configuration
pub const DEFAULT_PROVIDER_BASE_URL: &str = "https://sii3.top/api";
pub const MAX_COLLECTED_MEDIA: usize = 10;
pub const MAX_MESSAGE_CHARS: usize = 4000;
pub const MAX_DOCUMENT_SIZE: u32 = 20 * 1024 * 1024; // Bot API download limit
pub const MAX_EXERCISES: u32 = 20; // Per analysed page

/// Retry behaviour of a single remote capability
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts against this capability
    pub max_retries: u32,
    /// Fixed pause between attempts
    pub retry_delay: Duration,
    /// Per-attempt HTTP timeout
    pub timeout: Duration,
}

impl RetryPolicy {
    pub const fn new(max_retries: u32, retry_delay_ms: u64, timeout_secs: u64) -> Self {
        Self {
            max_retries,
            retry_delay: Duration::from_millis(retry_delay_ms),
            timeout: Duration::from_secs(timeout_secs),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2, 0, 30)
    }
}

/// Retry policies for every capability family
#[derive(Debug, Clone)]
pub struct CapabilityPolicies {
    pub translation: RetryPolicy,
    pub text: RetryPolicy,
    pub search: RetryPolicy,
    pub code: RetryPolicy,
    pub ocr: RetryPolicy,
    pub image_fast: RetryPolicy,
    pub image_edit_fast: RetryPolicy,
    pub image_heavy: RetryPolicy,
    pub quality: RetryPolicy,
    pub video: RetryPolicy,
    pub classifier: RetryPolicy,
    pub books: RetryPolicy,
}

impl Default for CapabilityPolicies {
    fn default() -> Self {
        Self {
            translation: RetryPolicy::new(1, 0, 5),
            text: RetryPolicy::new(3, 2000, 60),
            search: RetryPolicy::new(1, 0, 45),
            code: RetryPolicy::new(1, 0, 45),
            ocr: RetryPolicy::new(1, 0, 60),
            image_fast: RetryPolicy::new(2, 0, 30),
            image_edit_fast: RetryPolicy::new(2, 0, 60),
            image_heavy: RetryPolicy::new(2, 0, 150),
            quality: RetryPolicy::new(3, 3000, 150),
            video: RetryPolicy::new(2, 0, 180),
            classifier: RetryPolicy::new(1, 0, 10),
            books: RetryPolicy::new(1, 0, 10),
        }
    }
}

/// Circuit breaker settings shared by every capability
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive exhausted invocations before the capability is skipped
    pub threshold: u32,
    /// Time before a skipped capability is tried again
    pub reset_after: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            reset_after: Duration::from_secs(60),
        }
    }
}

/// Sliding-window rate limit per user
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_messages: usize,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_messages: 3,
            window: Duration::from_secs(2),
        }
    }
}

/// Daily limits of one subscription tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierLimits {
    pub daily_images: u32,
    pub daily_videos: u32,
}

/// Daily limits for every tier
#[derive(Debug, Clone)]
pub struct QuotaLimits {
    pub free: TierLimits,
    pub premium: TierLimits,
}

impl Default for QuotaLimits {
    fn default() -> Self {
        Self {
            free: TierLimits {
                daily_images: 10,
                daily_videos: 3,
            },
            premium: TierLimits {
                daily_images: 100,
                daily_videos: 30,
            },
        }
    }
}

/// Conversation window sizes
#[derive(Debug, Clone)]
pub struct ConversationConfig {
    /// Turns kept per (user, chat)
    pub retained_turns: usize,
    /// Turns folded into the outbound prompt
    pub prompt_turns: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            retained_turns: 10,
            prompt_turns: 5,
        }
    }
}

/// Group moderation defaults
#[derive(Debug, Clone)]
pub struct ModerationConfig {
    pub default_max_warnings: u32,
    /// Shorter messages are never classified
    pub min_text_len: usize,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            default_max_warnings: 3,
            min_text_len: 4,
        }
    }
}

/// Top-level configuration assembled at boot
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub bot_token: String,
    pub database_url: Option<String>,
    pub admin_ids: Vec<i64>,
    pub required_channel: Option<String>,
    pub provider_base_url: String,
    pub json_logs: bool,
    pub policies: CapabilityPolicies,
    pub circuit_breaker: CircuitBreakerConfig,
    pub rate_limit: RateLimitConfig,
    pub quotas: QuotaLimits,
    pub conversation: ConversationConfig,
    pub moderation: ModerationConfig,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            database_url: None,
            admin_ids: Vec::new(),
            required_channel: None,
            provider_base_url: DEFAULT_PROVIDER_BASE_URL.to_string(),
            json_logs: false,
            policies: CapabilityPolicies::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            quotas: QuotaLimits::default(),
            conversation: ConversationConfig::default(),
            moderation: ModerationConfig::default(),
        }
    }
}

impl BotConfig {
    /// Build the configuration from environment variables
    ///
    /// Only `TELEGRAM_BOT_TOKEN` is mandatory; everything else falls back to defaults.
    pub fn from_env() -> Result<Self> {
        let bot_token =
            env::var("TELEGRAM_BOT_TOKEN").context("TELEGRAM_BOT_TOKEN must be set")?;

        let mut admin_ids = Vec::new();
        if let Some(id) = non_empty_var("ADMIN_ID") {
            admin_ids.push(id.parse().context("ADMIN_ID must be a numeric user id")?);
        }
        if let Some(extra) = non_empty_var("EXTRA_ADMINS") {
            admin_ids.extend(parse_id_list(&extra));
        }
        admin_ids.sort_unstable();
        admin_ids.dedup();

        Ok(Self {
            bot_token,
            database_url: non_empty_var("DATABASE_URL"),
            admin_ids,
            required_channel: non_empty_var("REQUIRED_CHANNEL"),
            provider_base_url: non_empty_var("PROVIDER_BASE_URL")
                .unwrap_or_else(|| DEFAULT_PROVIDER_BASE_URL.to_string()),
            json_logs: non_empty_var("LOG_FORMAT").is_some_and(|v| v.eq_ignore_ascii_case("json")),
            ..Self::default()
        })
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_ids.contains(&user_id)
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse a comma separated list of numeric ids, skipping malformed entries
pub fn parse_id_list(raw: &str) -> Vec<i64> {
    raw.split(',')
        .filter_map(|part| part.trim().parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_defaults_follow_capability_weight() {
        let policies = CapabilityPolicies::default();

        assert_eq!(policies.translation.timeout, Duration::from_secs(5));
        assert!(policies.ocr.timeout >= Duration::from_secs(30));
        assert!(policies.image_heavy.timeout >= Duration::from_secs(150));
        assert_eq!(policies.video.timeout, Duration::from_secs(180));
        assert_eq!(policies.quality.max_retries, 3);
        assert!(policies.quality.retry_delay <= Duration::from_secs(3));
    }

    #[test]
    fn test_parse_id_list_skips_garbage() {
        assert_eq!(parse_id_list("1, 2,x,,3"), vec![1, 2, 3]);
        assert!(parse_id_list("").is_empty());
    }

    #[test]
    fn test_admin_lookup() {
        let config = BotConfig {
            admin_ids: vec![42],
            ..BotConfig::default()
        };
        assert!(config.is_admin(42));
        assert!(!config.is_admin(7));
    }

    #[test]
    fn test_quota_tiers_are_ordered() {
        let limits = QuotaLimits::default();
        assert!(limits.free.daily_images < limits.premium.daily_images);
        assert!(limits.free.daily_videos < limits.premium.daily_videos);
    }
}
