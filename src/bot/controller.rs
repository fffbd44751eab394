//! # Interaction Controller
//!
//! Owns the session table and drives the state machine. Each input is applied
//! under the table lock, so one session never sees two concurrent transitions;
//! the lock is released before anything is rendered or any job runs.
//!
//! Jobs run on their own tasks. Their outcomes come back through a channel and
//! are fed to the state machine as [`Event::Completed`], where the operation id
//! decides whether the result still matters. Each completion is handled on its
//! own task, so a slow delivery to one chat never holds back another.

use rand::seq::SliceRandom;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info};

use crate::bot::effects::{ChoiceMenu, Effect, Job, Outcome};
use crate::bot::events::Event;
use crate::bot::jobs::JobRunner;
use crate::bot::machine::{step, Context};
use crate::bot::messenger::{deliver, Messenger};
use crate::localization::t_lang;
use crate::session::{SessionKey, SessionMap, SessionState};

const STATUS_FRAMES: &[&str] = &["⏳", "⌛", "🔄", "⚙️", "🧠", "✍️"];

/// Who sent an event, as far as the state machine cares
#[derive(Debug, Clone, Copy)]
pub struct Actor {
    pub language: &'static str,
    pub is_admin: bool,
}

struct Completion {
    key: SessionKey,
    actor: Actor,
    operation: u64,
    job: Job,
    outcome: Outcome,
}

pub struct InteractionController {
    sessions: Mutex<SessionMap>,
    operations: AtomicU64,
    runner: Arc<JobRunner>,
    messenger: Arc<dyn Messenger>,
    completions: mpsc::UnboundedSender<Completion>,
}

impl InteractionController {
    /// Create the controller and start feeding job results back into it
    pub fn start(runner: Arc<JobRunner>, messenger: Arc<dyn Messenger>) -> Arc<Self> {
        let (completions, receiver) = mpsc::unbounded_channel();
        let controller = Arc::new(Self {
            sessions: Mutex::new(SessionMap::new()),
            operations: AtomicU64::new(0),
            runner,
            messenger,
            completions,
        });
        tokio::spawn(Self::feed_completions(Arc::downgrade(&controller), receiver));
        controller
    }

    async fn feed_completions(controller: Weak<Self>, mut receiver: mpsc::UnboundedReceiver<Completion>) {
        while let Some(completion) = receiver.recv().await {
            let Some(controller) = controller.upgrade() else {
                break;
            };
            let event = Event::Completed {
                operation: completion.operation,
                job: completion.job,
                outcome: completion.outcome,
            };
            tokio::spawn(async move {
                controller.handle(completion.key, completion.actor, event).await;
            });
        }
        debug!("Completion feed stopped");
    }

    /// Apply one event to the session of `key` and carry out the resulting effects
    pub async fn handle(&self, key: SessionKey, actor: Actor, event: Event) {
        let context = Context {
            language: actor.language,
            is_admin: actor.is_admin,
            operation: self.operations.fetch_add(1, Ordering::SeqCst) + 1,
        };

        let effects = {
            let mut sessions = self.sessions.lock().await;
            let state = sessions.take(&key);
            let (state, effects) = step(state, &context, event);
            sessions.put(key, state);
            effects
        };

        for effect in effects {
            match effect {
                Effect::Reply(reply) => {
                    if let Err(e) = deliver(self.messenger.as_ref(), key.chat_id, &reply, actor.language).await {
                        error!(session = %key, error = %e, "Failed to deliver reply");
                    }
                }
                Effect::Run { operation, job } => self.spawn_job(key, actor, operation, job).await,
            }
        }
    }

    async fn spawn_job(&self, key: SessionKey, actor: Actor, operation: u64, job: Job) {
        let status = self
            .messenger
            .send_text(key.chat_id, &status_text(actor.language), None, actor.language)
            .await
            .map_err(|e| debug!(error = %e, "Status message not sent"))
            .ok();

        let runner = Arc::clone(&self.runner);
        let messenger = Arc::clone(&self.messenger);
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let outcome = runner.run(key, actor.language, &job).await;
            if let Some(message) = status {
                if let Err(e) = messenger.delete_message(key.chat_id, message).await {
                    debug!(error = %e, "Status message not deleted");
                }
            }

            let completion = Completion {
                key,
                actor,
                operation,
                job,
                outcome,
            };
            if completions.send(completion).is_err() {
                info!(session = %key, operation, "Controller gone, dropping job result");
            }
        });
    }

    /// Send a reply that bypasses the state machine
    pub async fn notify(&self, chat_id: i64, text: &str, menu: Option<&ChoiceMenu>, language: &str) {
        if let Err(e) = self.messenger.send_text(chat_id, text, menu, language).await {
            error!(chat_id, error = %e, "Failed to send notice");
        }
    }

    /// Snapshot of one session
    pub async fn session(&self, key: &SessionKey) -> Option<SessionState> {
        self.sessions.lock().await.get(key).cloned()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

fn status_text(language: &str) -> String {
    let frame = STATUS_FRAMES
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or("⏳");
    format!("{frame} {}", t_lang("status-working", Some(language)))
}
