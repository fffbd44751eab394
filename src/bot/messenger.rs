//! The outbound chat-platform seam
//!
//! Everything the bot sends, edits, deletes or asks the platform goes through
//! [`Messenger`], so the controller and the gatekeeping logic run unchanged
//! against a recording fake in tests.

use async_trait::async_trait;
use reqwest::{Client, Url};
use teloxide::prelude::*;
use teloxide::types::{InputFile, MessageId, Recipient};
use teloxide::{ApiError, RequestError};
use tracing::{debug, warn};

use crate::bot::effects::{ChoiceMenu, Reply, ReplyBody};
use crate::bot::ui_builder::{keyboard, split_message};
use crate::config::MAX_MESSAGE_CHARS;
use crate::session::MediaRef;

/// Platform id of a sent message
pub type MessageRef = i32;

/// Why a delivery did not happen
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The recipient blocked the bot or no longer exists
    Blocked,
    Failed(String),
}

impl std::fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryError::Blocked => write!(f, "Recipient blocked the bot"),
            DeliveryError::Failed(msg) => write!(f, "Delivery failed: {msg}"),
        }
    }
}

impl std::error::Error for DeliveryError {}

impl From<RequestError> for DeliveryError {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::Api(
                ApiError::BotBlocked
                | ApiError::UserDeactivated
                | ApiError::ChatNotFound
                | ApiError::BotKicked
                | ApiError::CantInitiateConversation,
            ) => DeliveryError::Blocked,
            other => DeliveryError::Failed(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        DeliveryError::Failed(err.to_string())
    }
}

/// A user's standing in a chat or channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipStatus {
    Member,
    Administrator,
    NotMember,
    /// The platform could not tell
    Unknown,
}

#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        menu: Option<&ChoiceMenu>,
        language: &str,
    ) -> Result<MessageRef, DeliveryError>;

    async fn edit_text(
        &self,
        chat_id: i64,
        message: MessageRef,
        text: &str,
        menu: Option<&ChoiceMenu>,
        language: &str,
    ) -> Result<(), DeliveryError>;

    async fn delete_message(&self, chat_id: i64, message: MessageRef) -> Result<(), DeliveryError>;

    async fn send_photo(
        &self,
        chat_id: i64,
        url: &str,
        caption: &str,
        menu: Option<&ChoiceMenu>,
        language: &str,
    ) -> Result<MessageRef, DeliveryError>;

    async fn send_video(
        &self,
        chat_id: i64,
        url: &str,
        caption: &str,
        menu: Option<&ChoiceMenu>,
        language: &str,
    ) -> Result<MessageRef, DeliveryError>;

    /// Raw bytes behind a media reference
    async fn download_media(&self, media: &MediaRef) -> Result<Vec<u8>, DeliveryError>;

    /// `chat` is a numeric id or an `@channel` username
    async fn membership(&self, chat: &str, user_id: i64) -> MembershipStatus;

    async fn ban_member(&self, chat_id: i64, user_id: i64) -> Result<(), DeliveryError>;
}

/// Render one reply, splitting long text so only the last chunk carries the menu
pub async fn deliver(
    messenger: &dyn Messenger,
    chat_id: i64,
    reply: &Reply,
    language: &str,
) -> Result<(), DeliveryError> {
    let menu = reply.menu.as_ref();
    match &reply.body {
        ReplyBody::Text(text) => {
            let chunks = split_message(text, MAX_MESSAGE_CHARS);
            let last = chunks.len() - 1;
            for (i, chunk) in chunks.iter().enumerate() {
                let chunk_menu = if i == last { menu } else { None };
                messenger.send_text(chat_id, chunk, chunk_menu, language).await?;
            }
        }
        ReplyBody::Photo { url, caption } => {
            if let Err(e) = messenger.send_photo(chat_id, url, caption, menu, language).await {
                // Some providers return links the platform cannot fetch; the link itself still works
                warn!(error = %e, "Sending photo failed, falling back to a link");
                messenger
                    .send_text(chat_id, &format!("{caption}\n{url}"), menu, language)
                    .await?;
            }
        }
        ReplyBody::Video { url, caption } => {
            if let Err(e) = messenger.send_video(chat_id, url, caption, menu, language).await {
                warn!(error = %e, "Sending video failed, falling back to a link");
                messenger
                    .send_text(chat_id, &format!("{caption}\n{url}"), menu, language)
                    .await?;
            }
        }
    }
    Ok(())
}

/// [`Messenger`] over the Telegram Bot API
pub struct TelegramMessenger {
    bot: Bot,
    client: Client,
}

impl TelegramMessenger {
    pub fn new(bot: Bot, client: Client) -> Self {
        Self { bot, client }
    }

    /// Resolve a Telegram file id into a URL the remote capabilities can fetch
    pub async fn file_url(bot: &Bot, file_id: teloxide::types::FileId) -> anyhow::Result<MediaRef> {
        let file = bot.get_file(file_id).await?;
        Ok(format!(
            "https://api.telegram.org/file/bot{}/{}",
            bot.token(),
            file.path
        ))
    }

    fn parse_url(url: &str) -> Result<Url, DeliveryError> {
        Url::parse(url).map_err(|e| DeliveryError::Failed(format!("Invalid media URL: {e}")))
    }

    // Caption limit of the Bot API
    fn caption(caption: &str) -> String {
        crate::remote::capability::truncate(caption, 1000)
    }
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        menu: Option<&ChoiceMenu>,
        language: &str,
    ) -> Result<MessageRef, DeliveryError> {
        let request = self.bot.send_message(ChatId(chat_id), text);
        let sent = match menu {
            Some(menu) => request.reply_markup(keyboard(menu, language)).await?,
            None => request.await?,
        };
        Ok(sent.id.0)
    }

    async fn edit_text(
        &self,
        chat_id: i64,
        message: MessageRef,
        text: &str,
        menu: Option<&ChoiceMenu>,
        language: &str,
    ) -> Result<(), DeliveryError> {
        let request = self
            .bot
            .edit_message_text(ChatId(chat_id), MessageId(message), text);
        match menu {
            Some(menu) => request.reply_markup(keyboard(menu, language)).await?,
            None => request.await?,
        };
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message: MessageRef) -> Result<(), DeliveryError> {
        self.bot
            .delete_message(ChatId(chat_id), MessageId(message))
            .await?;
        Ok(())
    }

    async fn send_photo(
        &self,
        chat_id: i64,
        url: &str,
        caption: &str,
        menu: Option<&ChoiceMenu>,
        language: &str,
    ) -> Result<MessageRef, DeliveryError> {
        let request = self
            .bot
            .send_photo(ChatId(chat_id), InputFile::url(Self::parse_url(url)?))
            .caption(Self::caption(caption));
        let sent = match menu {
            Some(menu) => request.reply_markup(keyboard(menu, language)).await?,
            None => request.await?,
        };
        Ok(sent.id.0)
    }

    async fn send_video(
        &self,
        chat_id: i64,
        url: &str,
        caption: &str,
        menu: Option<&ChoiceMenu>,
        language: &str,
    ) -> Result<MessageRef, DeliveryError> {
        let request = self
            .bot
            .send_video(ChatId(chat_id), InputFile::url(Self::parse_url(url)?))
            .caption(Self::caption(caption));
        let sent = match menu {
            Some(menu) => request.reply_markup(keyboard(menu, language)).await?,
            None => request.await?,
        };
        Ok(sent.id.0)
    }

    async fn download_media(&self, media: &MediaRef) -> Result<Vec<u8>, DeliveryError> {
        let response = self.client.get(media).send().await?.error_for_status()?;
        let bytes = response.bytes().await?;
        debug!(bytes = bytes.len(), "Media downloaded");
        Ok(bytes.to_vec())
    }

    async fn membership(&self, chat: &str, user_id: i64) -> MembershipStatus {
        let recipient = match chat.parse::<i64>() {
            Ok(id) => Recipient::Id(ChatId(id)),
            Err(_) => Recipient::ChannelUsername(chat.to_string()),
        };

        match self
            .bot
            .get_chat_member(recipient, UserId(user_id as u64))
            .await
        {
            Ok(member) if member.kind.is_privileged() => MembershipStatus::Administrator,
            Ok(member) if member.kind.is_present() => MembershipStatus::Member,
            Ok(_) => MembershipStatus::NotMember,
            Err(e) => {
                warn!(chat, user_id, error = %e, "Membership lookup failed");
                MembershipStatus::Unknown
            }
        }
    }

    async fn ban_member(&self, chat_id: i64, user_id: i64) -> Result<(), DeliveryError> {
        self.bot
            .ban_chat_member(ChatId(chat_id), UserId(user_id as u64))
            .await?;
        Ok(())
    }
}
