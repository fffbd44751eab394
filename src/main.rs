use anyhow::Result;
use reqwest::Client;
use std::sync::Arc;
use teloxide::prelude::*;
use tracing::info;
use tracing_subscriber::EnvFilter;

use studybot::bot::messenger::TelegramMessenger;
use studybot::bot::{self, BotState};
use studybot::config::BotConfig;
use studybot::localization::init_localization;
use studybot::remote::Catalog;
use studybot::store::Store;

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let config = BotConfig::from_env()?;
    init_tracing(config.json_logs);
    info!("Starting study assistant bot");

    init_localization()?;

    let store = Arc::new(Store::connect(config.database_url.as_deref(), config.conversation.retained_turns).await);
    let catalog = Arc::new(Catalog::from_config(&config));

    let bot = Bot::new(config.bot_token.clone());
    let me = bot.get_me().await?;
    let bot_username = me.username.clone().unwrap_or_default();
    info!(bot = %bot_username, admins = config.admin_ids.len(), persistent = store.is_persistent(), "Bot initialized");

    let messenger = Arc::new(TelegramMessenger::new(bot.clone(), Client::new()));
    let state = BotState::new(config, store, catalog, messenger, bot_username);

    // Drop rate-limit windows of idle users
    tokio::spawn({
        let state = Arc::clone(&state);
        async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(300));
            loop {
                ticker.tick().await;
                state.rate_limiter.prune();
            }
        }
    });

    info!("Starting dispatcher");

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint({
            let state = Arc::clone(&state);
            move |bot: Bot, msg: Message| {
                let state = Arc::clone(&state);
                async move { bot::message_handler(bot, msg, state).await }
            }
        }))
        .branch(Update::filter_callback_query().endpoint({
            let state = Arc::clone(&state);
            move |bot: Bot, q: CallbackQuery| {
                let state = Arc::clone(&state);
                async move { bot::callback_handler(bot, q, state).await }
            }
        }));

    Dispatcher::builder(bot, handler)
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}
