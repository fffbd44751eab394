//! Callback Handler module for processing inline keyboard callback queries

use anyhow::Result;
use std::sync::Arc;
use teloxide::prelude::*;
use tracing::debug;

use crate::bot::events::{ButtonAction, Event};
use crate::bot::messenger::MessageRef;
use crate::bot::moderation::toggle_group_setting;
use crate::bot::BotState;
use crate::localization::{detect_language, t_lang};
use crate::session::SessionKey;

/// Route one decoded button press
///
/// Group settings buttons act on the group directly; every other button is an
/// event of the presser's session in that chat.
pub async fn handle_button(
    state: &BotState,
    key: SessionKey,
    message: MessageRef,
    action: ButtonAction,
    language: &'static str,
) {
    if let ButtonAction::GroupSetting { group_id, toggle } = action {
        if !toggle_group_setting(state, group_id, key.user_id, toggle, message, language).await {
            debug!(group_id, user_id = key.user_id, "Settings button from a non-admin ignored");
        }
        return;
    }

    if state.store.is_banned(key.user_id).await {
        let notice = t_lang("banned", Some(language));
        state.controller.notify(key.chat_id, &notice, None, language).await;
        return;
    }
    if state.store.is_muted(key.user_id).await {
        return;
    }

    let actor = state.actor(key.user_id, language);
    state.controller.handle(key, actor, Event::Button(action)).await;
}

/// Handle callback queries from inline keyboards
pub async fn callback_handler(bot: Bot, q: teloxide::types::CallbackQuery, state: Arc<BotState>) -> Result<()> {
    debug!(user_id = %q.from.id, data = ?q.data, "Received callback query from user");
    bot.answer_callback_query(q.id.clone()).await?;

    let (Some(data), Some(message)) = (q.data.as_deref(), q.message.as_ref()) else {
        return Ok(());
    };
    let Some(action) = ButtonAction::parse(data) else {
        debug!(data, "Unknown callback data");
        return Ok(());
    };

    let language = detect_language(q.from.language_code.as_deref());
    let key = SessionKey::new(q.from.id.0 as i64, message.chat().id.0);
    handle_button(&state, key, message.id().0, action, language).await;
    Ok(())
}
