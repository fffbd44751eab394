//! # Controller Tests
//!
//! End-to-end runs of the gatekeeping chain, the interaction controller and the
//! job runner against a recording messenger and a mock AI provider.

use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use studybot::bot::callback_handler::handle_button;
use studybot::bot::effects::ChoiceMenu;
use studybot::bot::events::{ButtonAction, Command, Event, GroupToggle};
use studybot::bot::message_handler::{gatekeep, Admission, Incoming};
use studybot::bot::messenger::{DeliveryError, MembershipStatus, MessageRef, Messenger};
use studybot::bot::BotState;
use studybot::config::{BotConfig, CapabilityPolicies, RateLimitConfig, RetryPolicy};
use studybot::localization::init_localization;
use studybot::remote::Catalog;
use studybot::session::{MediaRef, SessionKey};
use studybot::store::Store;

const ANSWER: &str = "Photosynthesis turns light, water and carbon dioxide into sugar.";
const GROUP: i64 = -100_555;

#[derive(Debug, Clone, PartialEq)]
enum Sent {
    Text {
        chat_id: i64,
        text: String,
        menu: Option<ChoiceMenu>,
    },
    Edited {
        chat_id: i64,
        message: MessageRef,
        menu: Option<ChoiceMenu>,
    },
    Deleted {
        chat_id: i64,
        message: MessageRef,
    },
    Banned {
        chat_id: i64,
        user_id: i64,
    },
}

/// Records everything the bot does on the platform
#[derive(Default)]
struct RecordingMessenger {
    sent: Mutex<Vec<Sent>>,
    next_id: AtomicI32,
    memberships: Mutex<HashMap<(String, i64), MembershipStatus>>,
    /// Answers to this chat never finish sending
    stalled_chat: Mutex<Option<i64>>,
}

impl RecordingMessenger {
    fn set_membership(&self, chat: &str, user_id: i64, status: MembershipStatus) {
        self.memberships
            .lock()
            .unwrap()
            .insert((chat.to_string(), user_id), status);
    }

    fn record(&self, sent: Sent) -> MessageRef {
        self.sent.lock().unwrap().push(sent);
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    fn texts_to(&self, chat: i64) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Text { chat_id, text, .. } if chat_id == chat => Some(text),
                _ => None,
            })
            .collect()
    }

    fn has_text(&self, chat: i64, needle: &str) -> bool {
        self.texts_to(chat).iter().any(|t| t.contains(needle))
    }

    fn menu_of(&self, needle: &str) -> Option<ChoiceMenu> {
        self.sent().into_iter().find_map(|s| match s {
            Sent::Text { text, menu, .. } if text.contains(needle) => menu,
            _ => None,
        })
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        menu: Option<&ChoiceMenu>,
        _language: &str,
    ) -> Result<MessageRef, DeliveryError> {
        let stalled = *self.stalled_chat.lock().unwrap() == Some(chat_id);
        if stalled && text.contains(ANSWER) {
            std::future::pending::<()>().await;
        }
        Ok(self.record(Sent::Text {
            chat_id,
            text: text.to_string(),
            menu: menu.cloned(),
        }))
    }

    async fn edit_text(
        &self,
        chat_id: i64,
        message: MessageRef,
        _text: &str,
        menu: Option<&ChoiceMenu>,
        _language: &str,
    ) -> Result<(), DeliveryError> {
        self.record(Sent::Edited {
            chat_id,
            message,
            menu: menu.cloned(),
        });
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message: MessageRef) -> Result<(), DeliveryError> {
        self.record(Sent::Deleted { chat_id, message });
        Ok(())
    }

    async fn send_photo(
        &self,
        _chat_id: i64,
        _url: &str,
        _caption: &str,
        _menu: Option<&ChoiceMenu>,
        _language: &str,
    ) -> Result<MessageRef, DeliveryError> {
        Err(DeliveryError::Failed("photos are not recorded".into()))
    }

    async fn send_video(
        &self,
        _chat_id: i64,
        _url: &str,
        _caption: &str,
        _menu: Option<&ChoiceMenu>,
        _language: &str,
    ) -> Result<MessageRef, DeliveryError> {
        Err(DeliveryError::Failed("videos are not recorded".into()))
    }

    async fn download_media(&self, _media: &MediaRef) -> Result<Vec<u8>, DeliveryError> {
        Ok(b"lecture notes".to_vec())
    }

    async fn membership(&self, chat: &str, user_id: i64) -> MembershipStatus {
        self.memberships
            .lock()
            .unwrap()
            .get(&(chat.to_string(), user_id))
            .copied()
            .unwrap_or(MembershipStatus::Member)
    }

    async fn ban_member(&self, chat_id: i64, user_id: i64) -> Result<(), DeliveryError> {
        self.record(Sent::Banned { chat_id, user_id });
        Ok(())
    }
}

fn test_config() -> BotConfig {
    let fast = RetryPolicy::new(1, 0, 5);
    BotConfig {
        admin_ids: vec![1],
        policies: CapabilityPolicies {
            text: fast.clone(),
            classifier: fast.clone(),
            ocr: fast,
            ..Default::default()
        },
        ..BotConfig::default()
    }
}

fn setup(server: &MockServer, config: BotConfig) -> (Arc<BotState>, Arc<RecordingMessenger>) {
    init_localization().expect("Failed to initialize localization");
    let catalog = Catalog::build(
        &server.uri(),
        &config.policies,
        &config.circuit_breaker,
        Client::new(),
    );
    let messenger = Arc::new(RecordingMessenger::default());
    let state = BotState::new(
        config,
        Arc::new(Store::in_memory(10)),
        Arc::new(catalog),
        messenger.clone(),
        "study_bot",
    );
    (state, messenger)
}

async fn answering_provider(delay: Duration) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/grok4.php"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(format!(r#"{{"response": "{ANSWER}"}}"#))
                .set_delay(delay),
        )
        .mount(&server)
        .await;
    server
}

/// Poll until `check` holds, for at most two seconds
async fn eventually(check: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        sleep(Duration::from_millis(20)).await;
    }
    check()
}

fn incoming(key: SessionKey, text: &str) -> Incoming {
    Incoming {
        key,
        username: "student".into(),
        first_name: "Sam".into(),
        language: "en",
        text: Some(text.to_string()),
        message: 77,
        addressed: true,
    }
}

#[tokio::test]
async fn test_question_is_answered_and_remembered() {
    let server = answering_provider(Duration::ZERO).await;
    let (state, messenger) = setup(&server, test_config());
    let key = SessionKey::new(5, 5);

    state
        .controller
        .handle(key, state.actor(5, "en"), Event::Text("what is photosynthesis".into()))
        .await;

    assert!(eventually(|| messenger.has_text(5, ANSWER)).await);
    assert!(eventually(|| messenger.sent().iter().any(|s| matches!(s, Sent::Deleted { chat_id: 5, .. }))).await);

    assert_eq!(state.store.recent_turns(key, 5).await.len(), 1);
    let session = state.controller.session(&key).await;
    assert!(session.map_or(true, |s| s.in_flight().is_none()));
}

#[tokio::test]
async fn test_cancel_discards_late_answer() {
    let server = answering_provider(Duration::from_millis(300)).await;
    let (state, messenger) = setup(&server, test_config());
    let key = SessionKey::new(6, 6);
    let actor = state.actor(6, "en");

    state
        .controller
        .handle(key, actor, Event::Text("what is photosynthesis".into()))
        .await;
    state.controller.handle(key, actor, Event::Command(Command::Cancel)).await;

    assert!(eventually(|| messenger.has_text(6, "Cancelled")).await);
    sleep(Duration::from_millis(600)).await;
    assert!(!messenger.has_text(6, ANSWER));
}

#[tokio::test]
async fn test_slow_delivery_does_not_block_other_chats() {
    let server = answering_provider(Duration::ZERO).await;
    let (state, messenger) = setup(&server, test_config());
    *messenger.stalled_chat.lock().unwrap() = Some(900);

    let slow = SessionKey::new(900, 900);
    state
        .controller
        .handle(slow, state.actor(900, "en"), Event::Text("first question".into()))
        .await;
    assert!(eventually(|| messenger.sent().iter().any(|s| matches!(s, Sent::Deleted { chat_id: 900, .. }))).await);

    let fast = SessionKey::new(901, 901);
    state
        .controller
        .handle(fast, state.actor(901, "en"), Event::Text("second question".into()))
        .await;

    assert!(eventually(|| messenger.has_text(901, ANSWER)).await);
    assert!(!messenger.has_text(900, ANSWER));
}

#[tokio::test]
async fn test_busy_reply_while_answering() {
    let server = answering_provider(Duration::from_millis(300)).await;
    let (state, messenger) = setup(&server, test_config());
    let key = SessionKey::new(8, 8);
    let actor = state.actor(8, "en");

    state.controller.handle(key, actor, Event::Text("first question".into())).await;
    state.controller.handle(key, actor, Event::Text("second question".into())).await;

    assert!(messenger.has_text(8, "still working"));
    assert!(eventually(|| messenger.has_text(8, ANSWER)).await);
    assert_eq!(messenger.texts_to(8).iter().filter(|t| t.contains(ANSWER)).count(), 1);
}

#[tokio::test]
async fn test_provider_outage_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let (state, messenger) = setup(&server, test_config());
    let key = SessionKey::new(9, 9);

    state
        .controller
        .handle(key, state.actor(9, "en"), Event::Text("what is photosynthesis".into()))
        .await;

    assert!(eventually(|| messenger.has_text(9, "temporarily unavailable")).await);
    assert_eq!(
        messenger.menu_of("temporarily unavailable"),
        Some(ChoiceMenu::Failure { retry: None })
    );
}

#[tokio::test]
async fn test_admin_broadcast_reaches_users() {
    let server = answering_provider(Duration::ZERO).await;
    let (state, messenger) = setup(&server, test_config());
    state.store.upsert_user(21, "a", "A").await;
    state.store.upsert_user(22, "b", "B").await;
    state.store.upsert_user(23, "c", "C").await;
    state.store.ban(23).await;

    let key = SessionKey::new(1, 1);
    let admin = state.actor(1, "en");
    assert!(admin.is_admin);
    state.controller.handle(key, admin, Event::Command(Command::Broadcast)).await;
    state
        .controller
        .handle(key, admin, Event::Text("Exam moved to Monday".into()))
        .await;

    assert!(eventually(|| messenger.has_text(1, "Broadcast finished")).await);
    assert!(messenger.has_text(21, "Exam moved to Monday"));
    assert!(messenger.has_text(22, "Exam moved to Monday"));
    assert!(messenger.texts_to(23).is_empty());
    assert!(messenger.has_text(1, "Sent: 2"));
}

#[tokio::test]
async fn test_rate_limit_drops_excess_messages() {
    let server = answering_provider(Duration::ZERO).await;
    let config = BotConfig {
        rate_limit: RateLimitConfig {
            max_messages: 2,
            window: Duration::from_secs(60),
        },
        ..test_config()
    };
    let (state, messenger) = setup(&server, config);
    let key = SessionKey::new(30, 30);

    assert_eq!(gatekeep(&state, &incoming(key, "one")).await, Admission::Accepted);
    assert_eq!(gatekeep(&state, &incoming(key, "two")).await, Admission::Accepted);
    assert_eq!(gatekeep(&state, &incoming(key, "three")).await, Admission::Dropped);
    assert!(messenger.has_text(30, "Slow down"));

    let other = SessionKey::new(31, 31);
    assert_eq!(gatekeep(&state, &incoming(other, "hi")).await, Admission::Accepted);
}

#[tokio::test]
async fn test_banned_and_muted_users_are_dropped() {
    let server = answering_provider(Duration::ZERO).await;
    let (state, messenger) = setup(&server, test_config());
    state.store.ban(40).await;
    state.store.mute(41).await;

    let banned = SessionKey::new(40, 40);
    assert_eq!(gatekeep(&state, &incoming(banned, "hello")).await, Admission::Dropped);
    assert!(messenger.has_text(40, "banned"));

    let muted = SessionKey::new(41, 41);
    assert_eq!(gatekeep(&state, &incoming(muted, "hello")).await, Admission::Dropped);
    assert!(messenger.texts_to(41).is_empty());
}

#[tokio::test]
async fn test_required_channel_membership() {
    let server = answering_provider(Duration::ZERO).await;
    let config = BotConfig {
        required_channel: Some("@study_news".into()),
        ..test_config()
    };
    let (state, messenger) = setup(&server, config);
    messenger.set_membership("@study_news", 50, MembershipStatus::NotMember);
    messenger.set_membership("@study_news", 51, MembershipStatus::Unknown);

    let outsider = SessionKey::new(50, 50);
    assert_eq!(gatekeep(&state, &incoming(outsider, "hello")).await, Admission::Dropped);
    assert!(messenger.has_text(50, "@study_news"));

    let unknown = SessionKey::new(51, 51);
    assert_eq!(gatekeep(&state, &incoming(unknown, "hello")).await, Admission::Accepted);

    let admin = SessionKey::new(1, 1);
    messenger.set_membership("@study_news", 1, MembershipStatus::NotMember);
    assert_eq!(gatekeep(&state, &incoming(admin, "hello")).await, Admission::Accepted);
}

#[tokio::test]
async fn test_profane_group_message_is_moderated() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/grok4.php"))
        .and(body_string_contains("idiot"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"is_profane": true, "category": "insult", "severity": "high", "detected_words": ["idiot"]}"#,
        ))
        .mount(&server)
        .await;
    let (state, messenger) = setup(&server, test_config());
    let key = SessionKey::new(60, GROUP);

    let admission = gatekeep(&state, &incoming(key, "you are an idiot")).await;
    assert_eq!(admission, Admission::Dropped);

    let sent = messenger.sent();
    assert!(sent.contains(&Sent::Deleted {
        chat_id: GROUP,
        message: 77
    }));
    assert!(messenger.has_text(GROUP, "@student"));
    assert!(messenger.has_text(GROUP, "Warning 1 of 3"));
    assert_eq!(state.store.warning_count(60, GROUP).await, 1);

    gatekeep(&state, &incoming(key, "still an idiot")).await;
    gatekeep(&state, &incoming(key, "idiot again")).await;
    assert!(messenger.sent().contains(&Sent::Banned {
        chat_id: GROUP,
        user_id: 60
    }));
    assert_eq!(state.store.warning_count(60, GROUP).await, 0);
}

#[tokio::test]
async fn test_unaddressed_group_message_is_ignored() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"is_profane": false}"#))
        .mount(&server)
        .await;
    let (state, messenger) = setup(&server, test_config());
    let key = SessionKey::new(61, GROUP);

    let message = Incoming {
        addressed: false,
        ..incoming(key, "see you in class tomorrow")
    };
    assert_eq!(gatekeep(&state, &message).await, Admission::Dropped);
    assert!(messenger.sent().is_empty());
}

#[tokio::test]
async fn test_group_admin_toggles_settings() {
    let server = answering_provider(Duration::ZERO).await;
    let (state, messenger) = setup(&server, test_config());
    let group = GROUP.to_string();
    messenger.set_membership(&group, 70, MembershipStatus::Administrator);

    let key = SessionKey::new(70, GROUP);
    let toggle = ButtonAction::GroupSetting {
        group_id: GROUP,
        toggle: GroupToggle::MaxWarnings,
    };
    handle_button(&state, key, 900, toggle.clone(), "en").await;

    let settings = state.store.group_settings(GROUP).await;
    assert_eq!(settings.max_warnings, 5);
    assert!(state.store.is_group_admin(70, GROUP).await);
    assert!(messenger.sent().contains(&Sent::Edited {
        chat_id: GROUP,
        message: 900,
        menu: Some(ChoiceMenu::GroupSettings {
            group_id: GROUP,
            settings
        }),
    }));

    let member = SessionKey::new(71, GROUP);
    handle_button(&state, member, 900, toggle, "en").await;
    assert_eq!(state.store.group_settings(GROUP).await.max_warnings, 5);
}
