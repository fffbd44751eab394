//! Bot module for handling Telegram interactions
//!
//! This module is split into several submodules:
//! - `events`, `effects`, `machine`: the transport-free interaction state machine
//! - `controller`: session ownership, job dispatch and result feedback
//! - `jobs`: remote work behind each dispatched job
//! - `prompts`: prompt templates and analysis parsing
//! - `messenger`: the outbound platform seam and its Telegram implementation
//! - `message_handler`: gatekeeping and conversion of incoming messages
//! - `callback_handler`: inline keyboard callback queries
//! - `moderation`: group profanity screening and group settings
//! - `ui_builder`: keyboards and long-message splitting

pub mod callback_handler;
pub mod controller;
pub mod effects;
pub mod events;
pub mod jobs;
pub mod machine;
pub mod message_handler;
pub mod messenger;
pub mod moderation;
pub mod prompts;
pub mod ui_builder;

use std::sync::Arc;

use crate::config::BotConfig;
use crate::rate_limit::RateLimiter;
use crate::remote::Catalog;
use crate::store::Store;
use controller::{Actor, InteractionController};
use jobs::JobRunner;
use messenger::Messenger;

// Re-export main handler functions for use in main.rs
pub use callback_handler::callback_handler;
pub use message_handler::message_handler;

/// Everything the handlers share
pub struct BotState {
    pub config: BotConfig,
    pub store: Arc<Store>,
    pub catalog: Arc<Catalog>,
    pub messenger: Arc<dyn Messenger>,
    pub controller: Arc<InteractionController>,
    pub rate_limiter: RateLimiter,
    /// Username of the bot, for mention detection in groups
    pub bot_username: String,
}

impl BotState {
    /// Wire the job runner and the controller; must run inside a Tokio runtime
    pub fn new(
        config: BotConfig,
        store: Arc<Store>,
        catalog: Arc<Catalog>,
        messenger: Arc<dyn Messenger>,
        bot_username: impl Into<String>,
    ) -> Arc<Self> {
        let runner = JobRunner::new(
            Arc::clone(&catalog),
            Arc::clone(&store),
            Arc::clone(&messenger),
            config.quotas.clone(),
            config.conversation.clone(),
        );
        let controller = InteractionController::start(Arc::new(runner), Arc::clone(&messenger));

        Arc::new(Self {
            rate_limiter: RateLimiter::new(config.rate_limit.clone()),
            config,
            store,
            catalog,
            messenger,
            controller,
            bot_username: bot_username.into(),
        })
    }

    pub fn actor(&self, user_id: i64, language: &'static str) -> Actor {
        Actor {
            language,
            is_admin: self.config.is_admin(user_id),
        }
    }
}
