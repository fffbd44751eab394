//! # Store Module
//!
//! Persistent user, conversation, quota and group-moderation records.
//!
//! PostgreSQL (through `sqlx`) is used when `DATABASE_URL` is configured and
//! reachable. Every operation degrades to an in-memory fallback when the database
//! is missing or a query fails: failures are logged and callers always receive a
//! safe answer ("not banned", "empty history", default settings). Persistence is an
//! optimization here, never a precondition for answering a message.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::QuotaLimits;
use crate::quota::{needs_reset, QuotaKind, QuotaSnapshot, QuotaTier};
use crate::session::SessionKey;

/// A bot user as stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: i64,
    pub username: String,
    pub first_name: String,
    pub is_banned: bool,
    pub is_muted: bool,
    pub message_count: i64,
    pub tier: QuotaTier,
    pub images_used: u32,
    pub videos_used: u32,
    pub last_quota_reset: Option<DateTime<Utc>>,
    pub joined_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl UserRecord {
    fn new(user_id: i64, username: &str, first_name: &str, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            username: username.to_string(),
            first_name: first_name.to_string(),
            is_banned: false,
            is_muted: false,
            message_count: 0,
            tier: QuotaTier::Free,
            images_used: 0,
            videos_used: 0,
            last_quota_reset: Some(now),
            joined_at: now,
            last_activity: now,
        }
    }

    fn quota(&self) -> QuotaSnapshot {
        QuotaSnapshot {
            tier: self.tier,
            images_used: self.images_used,
            videos_used: self.videos_used,
        }
    }
}

/// One question/answer exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub user_id: i64,
    pub chat_id: i64,
    pub message: String,
    pub response: String,
    pub timestamp: DateTime<Utc>,
}

/// Moderation switches of one group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSettings {
    pub auto_moderation: bool,
    pub delete_profanity: bool,
    pub warn_on_profanity: bool,
    pub max_warnings: u32,
}

impl Default for GroupSettings {
    fn default() -> Self {
        Self {
            auto_moderation: true,
            delete_profanity: true,
            warn_on_profanity: true,
            max_warnings: 3,
        }
    }
}

/// Aggregate numbers for the admin panel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BotStats {
    pub total_users: i64,
    pub banned_users: i64,
    pub muted_users: i64,
    pub total_messages: i64,
}

/// A logged profanity detection
#[derive(Debug, Clone, PartialEq)]
pub struct ProfanityDetection {
    pub user_id: i64,
    pub group_id: i64,
    pub message_text: String,
    pub detected_words: String,
    pub action_taken: String,
    pub detected_at: DateTime<Utc>,
}

const MEMORY_DETECTION_LOG: usize = 200;

#[derive(Debug, Default)]
struct MemoryStore {
    users: HashMap<i64, UserRecord>,
    conversations: HashMap<SessionKey, VecDeque<ConversationTurn>>,
    groups: HashMap<i64, (String, GroupSettings)>,
    warnings: HashMap<(i64, i64), u32>,
    group_admins: HashSet<(i64, i64)>,
    detections: VecDeque<ProfanityDetection>,
}

/// User, conversation and group storage with in-memory degradation
pub struct Store {
    pool: Option<PgPool>,
    memory: Mutex<MemoryStore>,
    retained_turns: usize,
}

impl Store {
    /// Store that never touches a database
    pub fn in_memory(retained_turns: usize) -> Self {
        Self {
            pool: None,
            memory: Mutex::new(MemoryStore::default()),
            retained_turns: retained_turns.max(1),
        }
    }

    /// Store backed by an already initialized pool
    pub fn with_pool(pool: PgPool, retained_turns: usize) -> Self {
        Self {
            pool: Some(pool),
            ..Self::in_memory(retained_turns)
        }
    }

    /// Connect to `database_url` and initialize the schema
    ///
    /// Never fails: a missing URL, an unreachable server or a schema error all
    /// produce an in-memory store and a warning.
    pub async fn connect(database_url: Option<&str>, retained_turns: usize) -> Self {
        let Some(url) = database_url else {
            info!("No DATABASE_URL configured, using in-memory store");
            return Self::in_memory(retained_turns);
        };

        match Self::open_pool(url).await {
            Ok(pool) => {
                info!("Connected to PostgreSQL store");
                Self::with_pool(pool, retained_turns)
            }
            Err(e) => {
                warn!(error = %e, "Database unavailable, continuing with in-memory store");
                Self::in_memory(retained_turns)
            }
        }
    }

    async fn open_pool(url: &str) -> Result<PgPool> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .context("Failed to connect to database")?;
        init_database_schema(&pool).await?;
        Ok(pool)
    }

    pub fn is_persistent(&self) -> bool {
        self.pool.is_some()
    }

    fn memory<T>(&self, f: impl FnOnce(&mut MemoryStore) -> T) -> T {
        let mut memory = self.memory.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut memory)
    }

    /// Run `query` against the database, answering from memory when there is none
    /// or when the query fails
    async fn with_fallback<T, Q, Fut>(
        &self,
        operation: &'static str,
        query: Q,
        fallback: impl FnOnce(&mut MemoryStore) -> T,
    ) -> T
    where
        Q: FnOnce(PgPool) -> Fut,
        Fut: Future<Output = std::result::Result<T, sqlx::Error>>,
    {
        if let Some(pool) = &self.pool {
            match query(pool.clone()).await {
                Ok(value) => return value,
                Err(e) => warn!(operation, error = %e, "Store operation failed, using in-memory fallback"),
            }
        }
        self.memory(fallback)
    }

    /// Create the user or refresh names, activity and the message counter
    pub async fn upsert_user(&self, user_id: i64, username: &str, first_name: &str) {
        let now = Utc::now();
        let (u, f) = (username.to_string(), first_name.to_string());
        self.with_fallback(
            "upsert_user",
            |pool| async move {
                sqlx::query(
                    "INSERT INTO users (user_id, username, first_name, joined_at, last_activity, last_quota_reset, message_count)
                     VALUES ($1, $2, $3, $4, $4, $4, 1)
                     ON CONFLICT (user_id) DO UPDATE SET
                        username = EXCLUDED.username,
                        first_name = EXCLUDED.first_name,
                        last_activity = EXCLUDED.last_activity,
                        message_count = users.message_count + 1",
                )
                .bind(user_id)
                .bind(&u)
                .bind(&f)
                .bind(now)
                .execute(&pool)
                .await?;
                Ok(())
            },
            |m| {
                let user = m
                    .users
                    .entry(user_id)
                    .or_insert_with(|| UserRecord::new(user_id, username, first_name, now));
                user.username = username.to_string();
                user.first_name = first_name.to_string();
                user.last_activity = now;
                user.message_count += 1;
            },
        )
        .await
    }

    pub async fn get_user(&self, user_id: i64) -> Option<UserRecord> {
        self.with_fallback(
            "get_user",
            |pool| async move {
                let row = sqlx::query(
                    "SELECT user_id, username, first_name, is_banned, is_muted, message_count,
                            subscription_tier, daily_quota_used, daily_video_quota,
                            last_quota_reset, joined_at, last_activity
                     FROM users WHERE user_id = $1",
                )
                .bind(user_id)
                .fetch_optional(&pool)
                .await?;

                row.map(|row| -> std::result::Result<UserRecord, sqlx::Error> {
                    Ok(UserRecord {
                        user_id: row.try_get("user_id")?,
                        username: row.try_get::<Option<String>, _>("username")?.unwrap_or_default(),
                        first_name: row.try_get::<Option<String>, _>("first_name")?.unwrap_or_default(),
                        is_banned: row.try_get("is_banned")?,
                        is_muted: row.try_get("is_muted")?,
                        message_count: row.try_get("message_count")?,
                        tier: QuotaTier::parse(&row.try_get::<String, _>("subscription_tier")?),
                        images_used: row.try_get::<i32, _>("daily_quota_used")?.max(0) as u32,
                        videos_used: row.try_get::<i32, _>("daily_video_quota")?.max(0) as u32,
                        last_quota_reset: row.try_get("last_quota_reset")?,
                        joined_at: row.try_get("joined_at")?,
                        last_activity: row.try_get("last_activity")?,
                    })
                })
                .transpose()
            },
            |m| m.users.get(&user_id).cloned(),
        )
        .await
    }

    pub async fn is_banned(&self, user_id: i64) -> bool {
        self.get_user(user_id).await.is_some_and(|u| u.is_banned)
    }

    pub async fn is_muted(&self, user_id: i64) -> bool {
        self.get_user(user_id).await.is_some_and(|u| u.is_muted)
    }

    pub async fn ban(&self, user_id: i64) {
        self.set_flag(user_id, Flag::Banned, true).await
    }

    pub async fn unban(&self, user_id: i64) {
        self.set_flag(user_id, Flag::Banned, false).await
    }

    pub async fn mute(&self, user_id: i64) {
        self.set_flag(user_id, Flag::Muted, true).await
    }

    pub async fn unmute(&self, user_id: i64) {
        self.set_flag(user_id, Flag::Muted, false).await
    }

    async fn set_flag(&self, user_id: i64, flag: Flag, value: bool) {
        let now = Utc::now();
        self.with_fallback(
            "set_flag",
            |pool| async move {
                let sql = match flag {
                    Flag::Banned => {
                        "INSERT INTO users (user_id, is_banned, joined_at, last_activity, last_quota_reset)
                         VALUES ($1, $2, $3, $3, $3)
                         ON CONFLICT (user_id) DO UPDATE SET is_banned = EXCLUDED.is_banned"
                    }
                    Flag::Muted => {
                        "INSERT INTO users (user_id, is_muted, joined_at, last_activity, last_quota_reset)
                         VALUES ($1, $2, $3, $3, $3)
                         ON CONFLICT (user_id) DO UPDATE SET is_muted = EXCLUDED.is_muted"
                    }
                };
                sqlx::query(sql)
                    .bind(user_id)
                    .bind(value)
                    .bind(now)
                    .execute(&pool)
                    .await?;
                Ok(())
            },
            |m| {
                let user = m
                    .users
                    .entry(user_id)
                    .or_insert_with(|| UserRecord::new(user_id, "", "", now));
                match flag {
                    Flag::Banned => user.is_banned = value,
                    Flag::Muted => user.is_muted = value,
                }
            },
        )
        .await;
        info!(user_id, ?flag, value, "User flag updated");
    }

    pub async fn quota(&self, user_id: i64) -> QuotaSnapshot {
        self.get_user(user_id)
            .await
            .map(|u| u.quota())
            .unwrap_or_default()
    }

    /// Reserve one unit of `kind` if the user's tier still allows it
    ///
    /// Check and increment happen in one statement, so concurrent jobs cannot
    /// both take the last unit.
    pub async fn try_consume_quota(&self, user_id: i64, kind: QuotaKind, limits: &QuotaLimits) -> bool {
        let now = Utc::now();
        let column = quota_column(kind);
        let free = QuotaSnapshot::default().limit(kind, limits);
        let premium = QuotaSnapshot {
            tier: QuotaTier::Premium,
            ..Default::default()
        }
        .limit(kind, limits);
        self.with_fallback(
            "try_consume_quota",
            |pool| async move {
                let sql = format!(
                    "UPDATE users SET {column} = {column} + 1
                     WHERE user_id = $1
                       AND {column} < CASE WHEN subscription_tier = 'premium' THEN $3 ELSE $2 END
                     RETURNING {column}"
                );
                let row = sqlx::query(&sql)
                    .bind(user_id)
                    .bind(free as i32)
                    .bind(premium as i32)
                    .fetch_optional(&pool)
                    .await?;
                Ok(row.is_some())
            },
            |m| {
                let user = m
                    .users
                    .entry(user_id)
                    .or_insert_with(|| UserRecord::new(user_id, "", "", now));
                let allowed = user.quota().has_remaining(kind, limits);
                if allowed {
                    match kind {
                        QuotaKind::Image => user.images_used += 1,
                        QuotaKind::Video => user.videos_used += 1,
                    }
                }
                allowed
            },
        )
        .await
    }

    /// Give back a unit reserved for a job that produced nothing
    pub async fn release_quota(&self, user_id: i64, kind: QuotaKind) {
        let column = quota_column(kind);
        self.with_fallback(
            "release_quota",
            |pool| async move {
                let sql = format!("UPDATE users SET {column} = GREATEST({column} - 1, 0) WHERE user_id = $1");
                sqlx::query(&sql).bind(user_id).execute(&pool).await?;
                Ok(())
            },
            |m| {
                if let Some(user) = m.users.get_mut(&user_id) {
                    match kind {
                        QuotaKind::Image => user.images_used = user.images_used.saturating_sub(1),
                        QuotaKind::Video => user.videos_used = user.videos_used.saturating_sub(1),
                    }
                }
            },
        )
        .await
    }

    /// Zero the daily counters when a rolling day has passed since the last reset
    pub async fn reset_quota_if_stale(&self, user_id: i64, now: DateTime<Utc>) {
        self.with_fallback(
            "reset_quota_if_stale",
            |pool| async move {
                sqlx::query(
                    "UPDATE users SET daily_quota_used = 0, daily_video_quota = 0, last_quota_reset = $2
                     WHERE user_id = $1
                       AND (last_quota_reset IS NULL OR last_quota_reset <= $2 - INTERVAL '1 day')",
                )
                .bind(user_id)
                .bind(now)
                .execute(&pool)
                .await?;
                Ok(())
            },
            |m| {
                if let Some(user) = m.users.get_mut(&user_id) {
                    if needs_reset(user.last_quota_reset, now) {
                        debug!(user_id, "Daily quota reset");
                        user.images_used = 0;
                        user.videos_used = 0;
                        user.last_quota_reset = Some(now);
                    }
                }
            },
        )
        .await
    }

    pub async fn set_tier(&self, user_id: i64, tier: QuotaTier) {
        let now = Utc::now();
        self.with_fallback(
            "set_tier",
            |pool| async move {
                sqlx::query("UPDATE users SET subscription_tier = $2 WHERE user_id = $1")
                    .bind(user_id)
                    .bind(tier.as_str())
                    .execute(&pool)
                    .await?;
                Ok(())
            },
            |m| {
                m.users
                    .entry(user_id)
                    .or_insert_with(|| UserRecord::new(user_id, "", "", now))
                    .tier = tier;
            },
        )
        .await
    }

    /// Append a turn and evict the oldest ones past the retained window
    pub async fn append_turn(&self, key: SessionKey, message: &str, response: &str) {
        let turn = ConversationTurn {
            user_id: key.user_id,
            chat_id: key.chat_id,
            message: message.to_string(),
            response: response.to_string(),
            timestamp: Utc::now(),
        };
        self.append_turn_record(turn).await
    }

    /// Append a turn carrying its own timestamp
    pub async fn append_turn_record(&self, turn: ConversationTurn) {
        let retained = self.retained_turns as i64;
        let db_turn = turn.clone();
        let retained_turns = self.retained_turns;
        self.with_fallback(
            "append_turn",
            |pool| async move {
                let mut tx = pool.begin().await?;
                sqlx::query(
                    "INSERT INTO conversations (user_id, chat_id, message, response, created_at)
                     VALUES ($1, $2, $3, $4, $5)",
                )
                .bind(db_turn.user_id)
                .bind(db_turn.chat_id)
                .bind(&db_turn.message)
                .bind(&db_turn.response)
                .bind(db_turn.timestamp)
                .execute(&mut *tx)
                .await?;
                sqlx::query(
                    "DELETE FROM conversations WHERE user_id = $1 AND chat_id = $2 AND id NOT IN (
                        SELECT id FROM conversations WHERE user_id = $1 AND chat_id = $2
                        ORDER BY created_at DESC, id DESC LIMIT $3
                     )",
                )
                .bind(db_turn.user_id)
                .bind(db_turn.chat_id)
                .bind(retained)
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;
                Ok(())
            },
            |m| {
                let key = SessionKey::new(turn.user_id, turn.chat_id);
                let history = m.conversations.entry(key).or_default();
                // Ties keep insertion order: insert after every turn not newer than this one
                let position = history
                    .iter()
                    .rposition(|t| t.timestamp <= turn.timestamp)
                    .map_or(0, |p| p + 1);
                history.insert(position, turn);
                while history.len() > retained_turns {
                    history.pop_front();
                }
            },
        )
        .await
    }

    /// The most recent `limit` turns, oldest first
    pub async fn recent_turns(&self, key: SessionKey, limit: usize) -> Vec<ConversationTurn> {
        self.with_fallback(
            "recent_turns",
            |pool| async move {
                let rows = sqlx::query(
                    "SELECT user_id, chat_id, message, response, created_at FROM conversations
                     WHERE user_id = $1 AND chat_id = $2
                     ORDER BY created_at DESC, id DESC LIMIT $3",
                )
                .bind(key.user_id)
                .bind(key.chat_id)
                .bind(limit as i64)
                .fetch_all(&pool)
                .await?;

                let mut turns = rows
                    .iter()
                    .map(|row| {
                        Ok(ConversationTurn {
                            user_id: row.try_get("user_id")?,
                            chat_id: row.try_get("chat_id")?,
                            message: row.try_get("message")?,
                            response: row.try_get("response")?,
                            timestamp: row.try_get("created_at")?,
                        })
                    })
                    .collect::<std::result::Result<Vec<_>, sqlx::Error>>()?;
                turns.reverse();
                Ok(turns)
            },
            |m| {
                m.conversations
                    .get(&key)
                    .map(|history| {
                        let skip = history.len().saturating_sub(limit);
                        history.iter().skip(skip).cloned().collect()
                    })
                    .unwrap_or_default()
            },
        )
        .await
    }

    pub async fn stats(&self) -> BotStats {
        self.with_fallback(
            "stats",
            |pool| async move {
                let row = sqlx::query(
                    "SELECT COUNT(*) AS total_users,
                            COUNT(*) FILTER (WHERE is_banned) AS banned_users,
                            COUNT(*) FILTER (WHERE is_muted) AS muted_users,
                            COALESCE(SUM(message_count), 0)::BIGINT AS total_messages
                     FROM users",
                )
                .fetch_one(&pool)
                .await?;
                Ok(BotStats {
                    total_users: row.try_get("total_users")?,
                    banned_users: row.try_get("banned_users")?,
                    muted_users: row.try_get("muted_users")?,
                    total_messages: row.try_get("total_messages")?,
                })
            },
            |m| BotStats {
                total_users: m.users.len() as i64,
                banned_users: m.users.values().filter(|u| u.is_banned).count() as i64,
                muted_users: m.users.values().filter(|u| u.is_muted).count() as i64,
                total_messages: m.users.values().map(|u| u.message_count).sum(),
            },
        )
        .await
    }

    /// Ids of every non-banned user
    pub async fn broadcast_targets(&self) -> Vec<i64> {
        self.with_fallback(
            "broadcast_targets",
            |pool| async move {
                let rows = sqlx::query("SELECT user_id FROM users WHERE NOT is_banned ORDER BY user_id")
                    .fetch_all(&pool)
                    .await?;
                rows.iter().map(|row| row.try_get::<i64, _>("user_id")).collect()
            },
            |m| {
                let mut ids: Vec<i64> = m
                    .users
                    .values()
                    .filter(|u| !u.is_banned)
                    .map(|u| u.user_id)
                    .collect();
                ids.sort_unstable();
                ids
            },
        )
        .await
    }

    pub async fn add_group(&self, group_id: i64, group_name: &str) {
        let now = Utc::now();
        let name = group_name.to_string();
        self.with_fallback(
            "add_group",
            |pool| async move {
                sqlx::query(
                    "INSERT INTO group_settings (group_id, group_name, added_at, last_updated)
                     VALUES ($1, $2, $3, $3)
                     ON CONFLICT (group_id) DO UPDATE SET group_name = EXCLUDED.group_name",
                )
                .bind(group_id)
                .bind(&name)
                .bind(now)
                .execute(&pool)
                .await?;
                Ok(())
            },
            |m| {
                m.groups
                    .entry(group_id)
                    .or_insert_with(|| (group_name.to_string(), GroupSettings::default()))
                    .0 = group_name.to_string();
            },
        )
        .await
    }

    pub async fn group_settings(&self, group_id: i64) -> GroupSettings {
        self.with_fallback(
            "group_settings",
            |pool| async move {
                let row = sqlx::query(
                    "SELECT auto_moderation, delete_profanity, warn_on_profanity, max_warnings
                     FROM group_settings WHERE group_id = $1",
                )
                .bind(group_id)
                .fetch_optional(&pool)
                .await?;
                match row {
                    Some(row) => Ok(GroupSettings {
                        auto_moderation: row.try_get("auto_moderation")?,
                        delete_profanity: row.try_get("delete_profanity")?,
                        warn_on_profanity: row.try_get("warn_on_profanity")?,
                        max_warnings: row.try_get::<i32, _>("max_warnings")?.max(1) as u32,
                    }),
                    None => Ok(GroupSettings::default()),
                }
            },
            |m| m.groups.get(&group_id).map(|(_, s)| *s).unwrap_or_default(),
        )
        .await
    }

    pub async fn update_group_settings(&self, group_id: i64, settings: GroupSettings) {
        let now = Utc::now();
        self.with_fallback(
            "update_group_settings",
            |pool| async move {
                sqlx::query(
                    "INSERT INTO group_settings
                        (group_id, auto_moderation, delete_profanity, warn_on_profanity, max_warnings, added_at, last_updated)
                     VALUES ($1, $2, $3, $4, $5, $6, $6)
                     ON CONFLICT (group_id) DO UPDATE SET
                        auto_moderation = EXCLUDED.auto_moderation,
                        delete_profanity = EXCLUDED.delete_profanity,
                        warn_on_profanity = EXCLUDED.warn_on_profanity,
                        max_warnings = EXCLUDED.max_warnings,
                        last_updated = EXCLUDED.last_updated",
                )
                .bind(group_id)
                .bind(settings.auto_moderation)
                .bind(settings.delete_profanity)
                .bind(settings.warn_on_profanity)
                .bind(settings.max_warnings as i32)
                .bind(now)
                .execute(&pool)
                .await?;
                Ok(())
            },
            |m| {
                m.groups
                    .entry(group_id)
                    .or_insert_with(|| (String::new(), GroupSettings::default()))
                    .1 = settings;
            },
        )
        .await;
        info!(group_id, ?settings, "Group settings updated");
    }

    /// Record a warning and return the user's warning count in the group
    pub async fn add_warning(&self, user_id: i64, group_id: i64, reason: &str, warned_by: i64) -> u32 {
        let now = Utc::now();
        let reason = reason.to_string();
        self.with_fallback(
            "add_warning",
            |pool| async move {
                sqlx::query(
                    "INSERT INTO user_warnings (user_id, group_id, reason, warned_by, warned_at)
                     VALUES ($1, $2, $3, $4, $5)",
                )
                .bind(user_id)
                .bind(group_id)
                .bind(&reason)
                .bind(warned_by)
                .bind(now)
                .execute(&pool)
                .await?;
                let count: i64 = sqlx::query_scalar(
                    "SELECT COUNT(*) FROM user_warnings WHERE user_id = $1 AND group_id = $2",
                )
                .bind(user_id)
                .bind(group_id)
                .fetch_one(&pool)
                .await?;
                Ok(count.max(0) as u32)
            },
            |m| {
                let count = m.warnings.entry((user_id, group_id)).or_default();
                *count += 1;
                *count
            },
        )
        .await
    }

    pub async fn warning_count(&self, user_id: i64, group_id: i64) -> u32 {
        self.with_fallback(
            "warning_count",
            |pool| async move {
                let count: i64 = sqlx::query_scalar(
                    "SELECT COUNT(*) FROM user_warnings WHERE user_id = $1 AND group_id = $2",
                )
                .bind(user_id)
                .bind(group_id)
                .fetch_one(&pool)
                .await?;
                Ok(count.max(0) as u32)
            },
            |m| m.warnings.get(&(user_id, group_id)).copied().unwrap_or(0),
        )
        .await
    }

    pub async fn clear_warnings(&self, user_id: i64, group_id: i64) {
        self.with_fallback(
            "clear_warnings",
            |pool| async move {
                sqlx::query("DELETE FROM user_warnings WHERE user_id = $1 AND group_id = $2")
                    .bind(user_id)
                    .bind(group_id)
                    .execute(&pool)
                    .await?;
                Ok(())
            },
            |m| {
                m.warnings.remove(&(user_id, group_id));
            },
        )
        .await
    }

    pub async fn log_profanity(&self, detection: ProfanityDetection) {
        let row = detection.clone();
        self.with_fallback(
            "log_profanity",
            |pool| async move {
                sqlx::query(
                    "INSERT INTO profanity_detections
                        (user_id, group_id, message_text, detected_words, action_taken, detected_at)
                     VALUES ($1, $2, $3, $4, $5, $6)",
                )
                .bind(row.user_id)
                .bind(row.group_id)
                .bind(&row.message_text)
                .bind(&row.detected_words)
                .bind(&row.action_taken)
                .bind(row.detected_at)
                .execute(&pool)
                .await?;
                Ok(())
            },
            |m| {
                m.detections.push_back(detection);
                while m.detections.len() > MEMORY_DETECTION_LOG {
                    m.detections.pop_front();
                }
            },
        )
        .await
    }

    pub async fn is_group_admin(&self, user_id: i64, group_id: i64) -> bool {
        self.with_fallback(
            "is_group_admin",
            |pool| async move {
                let count: i64 = sqlx::query_scalar(
                    "SELECT COUNT(*) FROM group_admins WHERE group_id = $1 AND user_id = $2",
                )
                .bind(group_id)
                .bind(user_id)
                .fetch_one(&pool)
                .await?;
                Ok(count > 0)
            },
            |m| m.group_admins.contains(&(group_id, user_id)),
        )
        .await
    }

    pub async fn add_group_admin(&self, group_id: i64, user_id: i64, added_by: i64) {
        let now = Utc::now();
        self.with_fallback(
            "add_group_admin",
            |pool| async move {
                sqlx::query(
                    "INSERT INTO group_admins (group_id, user_id, added_by, added_at)
                     VALUES ($1, $2, $3, $4)
                     ON CONFLICT (group_id, user_id) DO NOTHING",
                )
                .bind(group_id)
                .bind(user_id)
                .bind(added_by)
                .bind(now)
                .execute(&pool)
                .await?;
                Ok(())
            },
            |m| {
                m.group_admins.insert((group_id, user_id));
            },
        )
        .await
    }

    pub async fn remove_group_admin(&self, group_id: i64, user_id: i64) {
        self.with_fallback(
            "remove_group_admin",
            |pool| async move {
                sqlx::query("DELETE FROM group_admins WHERE group_id = $1 AND user_id = $2")
                    .bind(group_id)
                    .bind(user_id)
                    .execute(&pool)
                    .await?;
                Ok(())
            },
            |m| {
                m.group_admins.remove(&(group_id, user_id));
            },
        )
        .await
    }
}

#[derive(Debug, Clone, Copy)]
enum Flag {
    Banned,
    Muted,
}

fn quota_column(kind: QuotaKind) -> &'static str {
    match kind {
        QuotaKind::Image => "daily_quota_used",
        QuotaKind::Video => "daily_video_quota",
    }
}

/// Initialize the database schema
pub async fn init_database_schema(pool: &PgPool) -> Result<()> {
    info!("Initializing database schema...");

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS users (
            user_id BIGINT PRIMARY KEY,
            username TEXT,
            first_name TEXT,
            is_banned BOOLEAN NOT NULL DEFAULT FALSE,
            is_muted BOOLEAN NOT NULL DEFAULT FALSE,
            message_count BIGINT NOT NULL DEFAULT 0,
            subscription_tier TEXT NOT NULL DEFAULT 'free',
            daily_quota_used INTEGER NOT NULL DEFAULT 0,
            daily_video_quota INTEGER NOT NULL DEFAULT 0,
            last_quota_reset TIMESTAMPTZ,
            joined_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            last_activity TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create users table")?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS conversations (
            id BIGSERIAL PRIMARY KEY,
            user_id BIGINT NOT NULL,
            chat_id BIGINT NOT NULL,
            message TEXT NOT NULL,
            response TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create conversations table")?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS conversations_key_idx
         ON conversations (user_id, chat_id, created_at DESC)",
    )
    .execute(pool)
    .await
    .context("Failed to create conversations index")?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS group_settings (
            group_id BIGINT PRIMARY KEY,
            group_name TEXT,
            auto_moderation BOOLEAN NOT NULL DEFAULT TRUE,
            delete_profanity BOOLEAN NOT NULL DEFAULT TRUE,
            warn_on_profanity BOOLEAN NOT NULL DEFAULT TRUE,
            max_warnings INTEGER NOT NULL DEFAULT 3,
            added_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            last_updated TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create group_settings table")?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS user_warnings (
            id BIGSERIAL PRIMARY KEY,
            user_id BIGINT NOT NULL,
            group_id BIGINT NOT NULL,
            reason TEXT NOT NULL,
            warned_by BIGINT NOT NULL,
            warned_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create user_warnings table")?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS profanity_detections (
            id BIGSERIAL PRIMARY KEY,
            user_id BIGINT NOT NULL,
            group_id BIGINT NOT NULL,
            message_text TEXT NOT NULL,
            detected_words TEXT NOT NULL,
            action_taken TEXT NOT NULL,
            detected_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create profanity_detections table")?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS group_admins (
            group_id BIGINT NOT NULL,
            user_id BIGINT NOT NULL,
            added_by BIGINT NOT NULL,
            added_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            PRIMARY KEY (group_id, user_id)
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create group_admins table")?;

    info!("Database schema initialized successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_unknown_user_defaults() {
        let store = Store::in_memory(10);
        assert!(!store.is_banned(99).await);
        assert!(!store.is_muted(99).await);
        assert_eq!(store.quota(99).await, QuotaSnapshot::default());
        assert!(store.recent_turns(SessionKey::new(99, 99), 5).await.is_empty());
    }

    #[tokio::test]
    async fn test_flags_round_trip() {
        let store = Store::in_memory(10);
        store.upsert_user(1, "alice", "Alice").await;

        store.ban(1).await;
        store.mute(1).await;
        assert!(store.is_banned(1).await);
        assert!(store.is_muted(1).await);

        store.unban(1).await;
        store.unmute(1).await;
        assert!(!store.is_banned(1).await);
        assert!(!store.is_muted(1).await);
    }

    #[tokio::test]
    async fn test_stale_quota_is_reset() {
        let store = Store::in_memory(10);
        store.upsert_user(5, "", "").await;
        let limits = QuotaLimits::default();
        assert!(store.try_consume_quota(5, QuotaKind::Image, &limits).await);
        assert!(store.try_consume_quota(5, QuotaKind::Video, &limits).await);

        let later = Utc::now() + Duration::hours(25);
        store.reset_quota_if_stale(5, later).await;

        let quota = store.quota(5).await;
        assert_eq!(quota.images_used, 0);
        assert_eq!(quota.videos_used, 0);
    }

    #[tokio::test]
    async fn test_fresh_quota_is_kept() {
        let store = Store::in_memory(10);
        store.upsert_user(5, "", "").await;
        store
            .try_consume_quota(5, QuotaKind::Image, &QuotaLimits::default())
            .await;

        store.reset_quota_if_stale(5, Utc::now()).await;
        assert_eq!(store.quota(5).await.images_used, 1);
    }
}
