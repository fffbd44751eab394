//! Message Handler module for processing incoming Telegram messages
//!
//! Every message passes the gatekeeping chain before it reaches the state
//! machine: group moderation, the group addressing filter, the rate limit, the
//! channel membership gate, user bookkeeping, then the ban and mute checks.

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use teloxide::prelude::*;
use tracing::{debug, info};

use crate::bot::events::{Command, DocumentInfo, Event};
use crate::bot::messenger::{MembershipStatus, MessageRef, TelegramMessenger};
use crate::bot::moderation::{moderate_group_message, show_group_settings};
use crate::bot::BotState;
use crate::localization::{detect_language, t_args_lang, t_lang};
use crate::rate_limit::RateDecision;
use crate::session::SessionKey;

/// Transport-independent facts about one incoming message
#[derive(Debug, Clone)]
pub struct Incoming {
    pub key: SessionKey,
    pub username: String,
    pub first_name: String,
    pub language: &'static str,
    /// Text or caption
    pub text: Option<String>,
    pub message: MessageRef,
    /// Group messages only: the bot was commanded, mentioned or replied to
    pub addressed: bool,
}

/// Whether a message continues to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    Dropped,
}

/// Run the gatekeeping chain for one message
pub async fn gatekeep(state: &BotState, incoming: &Incoming) -> Admission {
    let key = incoming.key;
    let user_id = key.user_id;
    let language = incoming.language;

    if key.is_group() {
        if let Some(text) = &incoming.text {
            let name = display_name(incoming);
            if moderate_group_message(state, key.chat_id, user_id, &name, text, incoming.message, language).await {
                return Admission::Dropped;
            }
        }
        if !incoming.addressed {
            return Admission::Dropped;
        }
    }

    if let RateDecision::Rejected { wait } = state.rate_limiter.check(user_id) {
        debug!(user_id, ?wait, "Rate limited");
        let seconds = wait.as_secs().max(1).to_string();
        let notice = t_args_lang("rate-limited", &[("seconds", &seconds)], Some(language));
        state.controller.notify(key.chat_id, &notice, None, language).await;
        return Admission::Dropped;
    }

    if !key.is_group() && !state.config.is_admin(user_id) {
        if let Some(channel) = &state.config.required_channel {
            if state.messenger.membership(channel, user_id).await == MembershipStatus::NotMember {
                let notice = t_args_lang("join-required", &[("channel", channel)], Some(language));
                state.controller.notify(key.chat_id, &notice, None, language).await;
                return Admission::Dropped;
            }
        }
    }

    state
        .store
        .upsert_user(user_id, &incoming.username, &incoming.first_name)
        .await;
    state.store.reset_quota_if_stale(user_id, Utc::now()).await;

    if state.store.is_banned(user_id).await {
        info!(user_id, "Message from banned user");
        let notice = t_lang("banned", Some(language));
        state.controller.notify(key.chat_id, &notice, None, language).await;
        return Admission::Dropped;
    }
    if state.store.is_muted(user_id).await {
        debug!(user_id, "Ignoring muted user");
        return Admission::Dropped;
    }

    Admission::Accepted
}

fn display_name(incoming: &Incoming) -> String {
    if !incoming.username.is_empty() {
        format!("@{}", incoming.username)
    } else {
        incoming.first_name.clone()
    }
}

/// Remove a `@botname` mention from group text
pub fn strip_mention(text: &str, bot_username: &str) -> String {
    if bot_username.is_empty() {
        return text.trim().to_string();
    }
    text.replace(&format!("@{bot_username}"), " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn is_settings_command(text: &str) -> bool {
    let head = text.split_whitespace().next().unwrap_or_default();
    head.split('@').next() == Some("/settings")
}

/// Event for a text message, once gatekeeping passed
pub fn text_event(text: &str, is_group: bool, bot_username: &str) -> Event {
    match Command::parse(text) {
        Some(command) => Event::Command(command),
        None if is_group => Event::Text(strip_mention(text, bot_username)),
        None => Event::Text(text.to_string()),
    }
}

fn is_addressed(msg: &Message, text: Option<&str>, bot_username: &str) -> bool {
    if let Some(text) = text {
        if text.starts_with('/') {
            return true;
        }
        if !bot_username.is_empty() && text.contains(&format!("@{bot_username}")) {
            return true;
        }
    }
    msg.reply_to_message()
        .and_then(|reply| reply.from.as_ref())
        .is_some_and(|author| author.is_bot && author.username.as_deref() == Some(bot_username))
}

/// Convert the message into a state machine event, resolving file URLs
async fn to_event(bot: &Bot, msg: &Message, state: &BotState, is_group: bool) -> Result<Option<Event>> {
    if let Some(photo) = msg.photo().and_then(|sizes| sizes.last()) {
        let url = TelegramMessenger::file_url(bot, photo.file.id.clone()).await?;
        return Ok(Some(Event::Photo(url)));
    }

    if let Some(document) = msg.document() {
        let mut info = DocumentInfo {
            media: String::new(),
            file_name: document.file_name.clone(),
            mime_type: document.mime_type.as_ref().map(|m| m.to_string()),
            size: document.file.size,
        };
        // Rejected documents are never downloaded
        if info.validate().is_ok() {
            info.media = TelegramMessenger::file_url(bot, document.file.id.clone()).await?;
        }
        return Ok(Some(Event::Document(info)));
    }

    Ok(msg
        .text()
        .map(|text| text_event(text, is_group, &state.bot_username)))
}

/// Handle one incoming Telegram message
pub async fn message_handler(bot: Bot, msg: Message, state: Arc<BotState>) -> Result<()> {
    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };
    if user.is_bot {
        return Ok(());
    }

    let language = detect_language(user.language_code.as_deref());
    let key = SessionKey::new(user.id.0 as i64, msg.chat.id.0);
    let text = msg.text().or(msg.caption()).map(str::to_string);
    debug!(session = %key, has_text = text.is_some(), "Received message");

    let incoming = Incoming {
        key,
        username: user.username.clone().unwrap_or_default(),
        first_name: user.first_name.clone(),
        language,
        addressed: is_addressed(&msg, text.as_deref(), &state.bot_username),
        text,
        message: msg.id.0,
    };

    if gatekeep(&state, &incoming).await == Admission::Dropped {
        return Ok(());
    }

    if key.is_group() && incoming.text.as_deref().is_some_and(is_settings_command) {
        let title = msg.chat.title().unwrap_or_default().to_string();
        show_group_settings(&state, key.chat_id, &title, key.user_id, language).await;
        return Ok(());
    }

    let event = match to_event(&bot, &msg, &state, key.is_group()).await? {
        Some(event) => event,
        None => {
            debug!(session = %key, "Unsupported message kind ignored");
            return Ok(());
        }
    };

    let actor = state.actor(key.user_id, language);
    state.controller.handle(key, actor, event).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_mention() {
        assert_eq!(strip_mention("@study_bot what is pi", "study_bot"), "what is pi");
        assert_eq!(strip_mention("what  is @study_bot pi", "study_bot"), "what is pi");
    }

    #[test]
    fn test_settings_command() {
        assert!(is_settings_command("/settings"));
        assert!(is_settings_command("/settings@study_bot"));
        assert!(!is_settings_command("/setting"));
        assert!(!is_settings_command("settings"));
    }

    #[test]
    fn test_text_event() {
        assert_eq!(text_event("/help", true, "study_bot"), Event::Command(Command::Help));
        assert_eq!(
            text_event("@study_bot hi there", true, "study_bot"),
            Event::Text("hi there".into())
        );
        assert_eq!(
            text_event("@study_bot hi", false, "study_bot"),
            Event::Text("@study_bot hi".into())
        );
    }
}
