//! Job execution: turns a [`Job`] into an [`Outcome`] using the capability catalog,
//! the store and the messenger. Runs outside the session lock.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::bot::effects::{BroadcastReport, Job, JobFailure, Outcome};
use crate::bot::events::{FollowUpAction, OcrMode};
use crate::bot::messenger::{DeliveryError, Messenger};
use crate::bot::prompts::{
    clarify_exercise_prompt, code_prompt, detection_prompt, equation_prompt, explain_text_prompt,
    extract_exercise_prompt, freeform_prompt, parse_analysis, resolve_exercise_prompt,
    search_query, solve_exercise_prompt, summarize_prompt, translate_prompt,
};
use crate::config::{ConversationConfig, QuotaLimits};
use crate::document::extract_text;
use crate::errors::ValidationFailure;
use crate::quota::QuotaTier;
use crate::remote::capability::CapabilityRequest;
use crate::remote::catalog::Catalog;
use crate::remote::invoker::ResilientInvoker;
use crate::remote::text::prompt_with_history;
use crate::remote::translate::contains_arabic;
use crate::session::{AdminAction, MediaRef, SessionKey, SolvedExercise};
use crate::store::Store;

/// OCR and document text shorter than this is treated as "no text found"
const MIN_OCR_CHARS: usize = 5;

/// Broadcast pacing: pause after every batch
const BROADCAST_BATCH: usize = 20;
const BROADCAST_PAUSE: Duration = Duration::from_secs(1);

type JobResult = Result<Outcome, JobFailure>;

pub struct JobRunner {
    catalog: Arc<Catalog>,
    store: Arc<Store>,
    messenger: Arc<dyn Messenger>,
    quotas: QuotaLimits,
    conversation: ConversationConfig,
}

impl JobRunner {
    pub fn new(
        catalog: Arc<Catalog>,
        store: Arc<Store>,
        messenger: Arc<dyn Messenger>,
        quotas: QuotaLimits,
        conversation: ConversationConfig,
    ) -> Self {
        Self {
            catalog,
            store,
            messenger,
            quotas,
            conversation,
        }
    }

    /// Run `job` for `key`, enforcing and charging its quota
    ///
    /// The quota unit is reserved before the job starts and given back if the
    /// job fails, so only successful runs are charged.
    pub async fn run(&self, key: SessionKey, language: &str, job: &Job) -> Outcome {
        let quota = job.quota();
        if let Some(kind) = quota {
            if !self.store.try_consume_quota(key.user_id, kind, &self.quotas).await {
                info!(user_id = key.user_id, ?kind, "Daily quota exhausted");
                return Outcome::Failed(JobFailure::QuotaExceeded(kind));
            }
        }

        match self.execute(key, language, job).await {
            Ok(outcome) => outcome,
            Err(failure) => {
                warn!(job = job.name(), user_id = key.user_id, ?failure, "Job failed");
                if let Some(kind) = quota {
                    self.store.release_quota(key.user_id, kind).await;
                }
                Outcome::Failed(failure)
            }
        }
    }

    async fn execute(&self, key: SessionKey, language: &str, job: &Job) -> JobResult {
        let catalog = &self.catalog;
        match job {
            Job::Ask(question) => self.ask(key, question).await,
            Job::Search(query) => Ok(Outcome::Text(invoke_text(&catalog.search, query).await?)),
            Job::Code(request) => Ok(Outcome::Text(invoke_text(&catalog.code, &code_prompt(request)).await?)),
            Job::GenerateImage(prompt) => {
                let prompt = self.to_english(prompt).await;
                Ok(Outcome::Image(invoke_text(&catalog.image_generate, &prompt).await?))
            }
            Job::GenerateVideo(prompt) => {
                let prompt = self.to_english(prompt).await;
                Ok(Outcome::Video(invoke_text(&catalog.video, &prompt).await?))
            }
            Job::AnimateImage { prompt, image } => {
                let prompt = self.to_english(prompt).await;
                let request = CapabilityRequest::with_media(prompt, vec![image.clone()]);
                Ok(Outcome::Video(catalog.video.invoke(&request).await?))
            }
            Job::SolveEquation(equation) => {
                let prompt = equation_prompt(equation, language);
                Ok(Outcome::Text(invoke_text(&catalog.text, &prompt).await?))
            }
            Job::SearchBooks(query) => Ok(Outcome::Text(invoke_text(&catalog.books, query).await?)),
            Job::EditImage { instruction, media } => {
                let instruction = self.to_english(instruction).await;
                let request = CapabilityRequest::with_media(instruction, media.clone());
                Ok(Outcome::Image(catalog.image_edit.invoke(&request).await?))
            }
            Job::Enhance(photo) => {
                let request = CapabilityRequest::with_media("", vec![photo.clone()]);
                Ok(Outcome::Image(catalog.enhance.invoke(&request).await?))
            }
            Job::Ocr { media, mode } => self.ocr_job(media, mode, language).await,
            Job::AnalyzeExercises(media) => {
                let text = self.ocr(media).await?;
                let analysis = invoke_text(&catalog.text, &detection_prompt(&text, language)).await?;
                let parsed = parse_analysis(&analysis);
                debug!(
                    exercises = parsed.exercise_count,
                    has_questions = parsed.has_questions,
                    "Exercise analysis parsed"
                );
                Ok(Outcome::Exercises {
                    original_text: text,
                    analysis,
                    exercise_count: parsed.exercise_count,
                    has_questions: parsed.has_questions,
                })
            }
            Job::SolveExercise {
                index,
                original_text,
                analysis,
            } => {
                let solved = self.solve_one(*index, original_text, analysis, language).await?;
                Ok(Outcome::Solved(vec![solved]))
            }
            Job::SolveAll {
                from,
                to,
                original_text,
                analysis,
            } => self.solve_range(*from, *to, original_text, analysis, language).await,
            Job::ClarifyExercise { index, exercise } => {
                let prompt = clarify_exercise_prompt(*index, exercise, language);
                Ok(Outcome::Text(invoke_text(&catalog.text, &prompt).await?))
            }
            Job::ResolveExercise { index, exercise } => {
                let prompt = resolve_exercise_prompt(*index, exercise, language);
                Ok(Outcome::Text(invoke_text(&catalog.text, &prompt).await?))
            }
            Job::FollowUp { action, text } => self.follow_up(*action, text, language).await,
            Job::Freeform { instruction, text } => {
                let prompt = freeform_prompt(instruction, text, language);
                Ok(Outcome::Text(invoke_text(&catalog.text, &prompt).await?))
            }
            Job::ReadDocument(media) => self.read_document(media).await,
            Job::Stats => Ok(Outcome::Stats(self.store.stats().await)),
            Job::ModerateUser { action, user_id } => {
                match action {
                    AdminAction::Ban => self.store.ban(*user_id).await,
                    AdminAction::Unban => self.store.unban(*user_id).await,
                    AdminAction::Mute => self.store.mute(*user_id).await,
                    AdminAction::Unmute => self.store.unmute(*user_id).await,
                    AdminAction::GrantPremium => self.store.set_tier(*user_id, QuotaTier::Premium).await,
                    AdminAction::RevokePremium => self.store.set_tier(*user_id, QuotaTier::Free).await,
                }
                info!(?action, target = user_id, by = key.user_id, "Admin moderation applied");
                Ok(Outcome::UserModerated {
                    action: *action,
                    user_id: *user_id,
                })
            }
            Job::Broadcast(body) => Ok(Outcome::Broadcast(self.broadcast(body, language).await)),
        }
    }

    async fn ask(&self, key: SessionKey, question: &str) -> JobResult {
        let turns = self.conversation.prompt_turns;
        let history = self.store.recent_turns(key, turns).await;
        let prompt = prompt_with_history(question, &history, turns);
        let answer = invoke_text(&self.catalog.text, &prompt).await?;
        self.store.append_turn(key, question, &answer).await;
        Ok(Outcome::Text(answer))
    }

    /// Image and video providers understand English prompts best
    async fn to_english(&self, prompt: &str) -> String {
        if prompt.is_ascii() {
            return prompt.to_string();
        }
        match self
            .catalog
            .translate
            .invoke(&CapabilityRequest::translate(prompt, "en"))
            .await
        {
            Ok(english) => english,
            Err(e) => {
                debug!(error = %e, "Prompt translation failed, using the original prompt");
                prompt.to_string()
            }
        }
    }

    /// Translation chain first, then the text capability
    async fn translate(&self, text: &str, target: &str) -> Result<String, JobFailure> {
        match self
            .catalog
            .translate
            .invoke(&CapabilityRequest::translate(text, target))
            .await
        {
            Ok(translated) => Ok(translated),
            Err(e) => {
                info!(error = %e, "Translation services failed, asking the text capability");
                Ok(invoke_text(&self.catalog.text, &translate_prompt(text, target)).await?)
            }
        }
    }

    async fn ocr(&self, media: &[MediaRef]) -> Result<String, JobFailure> {
        let request = CapabilityRequest::with_media("", media.to_vec());
        let text = self.catalog.ocr.invoke(&request).await?;
        let text = text.trim();
        if text.chars().count() < MIN_OCR_CHARS {
            return Err(JobFailure::Invalid(ValidationFailure::EmptyOcrResult));
        }
        Ok(text.to_string())
    }

    async fn ocr_job(&self, media: &[MediaRef], mode: &OcrMode, language: &str) -> JobResult {
        let text = self.ocr(media).await?;
        info!(photos = media.len(), chars = text.chars().count(), "OCR completed");

        // The extracted text is worth showing even when the second step fails
        let extra = match mode {
            OcrMode::ExtractOnly => None,
            OcrMode::Explain => invoke_text(&self.catalog.text, &explain_text_prompt(&text, language))
                .await
                .map_err(|e| warn!(error = %e, "Explanation of OCR text failed"))
                .ok(),
            OcrMode::Translate(target) => self
                .translate(&text, target)
                .await
                .map_err(|failure| warn!(?failure, "Translation of OCR text failed"))
                .ok(),
        };
        Ok(Outcome::Extracted { text, extra })
    }

    async fn solve_one(
        &self,
        index: u32,
        original_text: &str,
        analysis: &str,
        language: &str,
    ) -> Result<SolvedExercise, JobFailure> {
        let extraction = invoke_text(
            &self.catalog.text,
            &extract_exercise_prompt(index, analysis, original_text),
        )
        .await?;
        let solution = invoke_text(
            &self.catalog.text,
            &solve_exercise_prompt(index, &extraction, original_text, language),
        )
        .await?;
        Ok(SolvedExercise {
            index,
            extraction,
            solution,
        })
    }

    /// Solve `from..=to` in order; a failure keeps whatever was solved before it
    async fn solve_range(
        &self,
        from: u32,
        to: u32,
        original_text: &str,
        analysis: &str,
        language: &str,
    ) -> JobResult {
        let mut solved = Vec::new();
        for index in from..=to {
            match self.solve_one(index, original_text, analysis, language).await {
                Ok(exercise) => solved.push(exercise),
                Err(failure) if solved.is_empty() => return Err(failure),
                Err(failure) => {
                    warn!(index, ?failure, "Stopping solve-all early");
                    break;
                }
            }
        }
        Ok(Outcome::Solved(solved))
    }

    async fn follow_up(&self, action: FollowUpAction, text: &str, language: &str) -> JobResult {
        let answer = match action {
            FollowUpAction::Explain => {
                invoke_text(&self.catalog.text, &explain_text_prompt(text, language)).await?
            }
            FollowUpAction::Summarize => {
                invoke_text(&self.catalog.text, &summarize_prompt(text, language)).await?
            }
            FollowUpAction::Search => invoke_text(&self.catalog.search, &search_query(text)).await?,
            FollowUpAction::Translate => {
                let target = if contains_arabic(text) { "en" } else { "ar" };
                self.translate(text, target).await?
            }
        };
        Ok(Outcome::Text(answer))
    }

    async fn read_document(&self, media: &MediaRef) -> JobResult {
        let bytes = self.messenger.download_media(media).await.map_err(|e| {
            warn!(error = %e, "Document download failed");
            JobFailure::Unavailable
        })?;

        // A panic inside the PDF parser surfaces as a join error
        let text = match tokio::task::spawn_blocking(move || extract_text(&bytes)).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!(error = %e, "Document text extraction failed");
                return Err(JobFailure::Invalid(ValidationFailure::UnreadableDocument));
            }
            Err(e) => {
                warn!(error = %e, "Document parser aborted");
                return Err(JobFailure::Invalid(ValidationFailure::UnreadableDocument));
            }
        };
        if text.chars().count() < MIN_OCR_CHARS {
            return Err(JobFailure::Invalid(ValidationFailure::UnreadableDocument));
        }
        info!(chars = text.chars().count(), "Document text extracted");
        Ok(Outcome::Extracted { text, extra: None })
    }

    async fn broadcast(&self, body: &str, language: &str) -> BroadcastReport {
        let targets = self.store.broadcast_targets().await;
        info!(recipients = targets.len(), "Starting broadcast");

        let mut report = BroadcastReport::default();
        for (i, user_id) in targets.iter().enumerate() {
            match self.messenger.send_text(*user_id, body, None, language).await {
                Ok(_) => report.sent += 1,
                Err(DeliveryError::Blocked) => report.blocked += 1,
                Err(DeliveryError::Failed(e)) => {
                    debug!(user_id, error = %e, "Broadcast delivery failed");
                    report.failed += 1;
                }
            }
            if (i + 1) % BROADCAST_BATCH == 0 && i + 1 < targets.len() {
                tokio::time::sleep(BROADCAST_PAUSE).await;
            }
        }

        info!(
            sent = report.sent,
            failed = report.failed,
            blocked = report.blocked,
            "Broadcast finished"
        );
        report
    }
}

async fn invoke_text(invoker: &ResilientInvoker, instruction: &str) -> Result<String, JobFailure> {
    Ok(invoker.invoke(&CapabilityRequest::text(instruction)).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::effects::ChoiceMenu;
    use crate::bot::messenger::{MembershipStatus, MessageRef};
    use crate::config::{CapabilityPolicies, CircuitBreakerConfig};
    use crate::quota::QuotaKind;
    use async_trait::async_trait;
    use reqwest::Client;
    use std::sync::Mutex;

    #[derive(Default)]
    struct SilentMessenger {
        sent: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl Messenger for SilentMessenger {
        async fn send_text(&self, chat_id: i64, _: &str, _: Option<&ChoiceMenu>, _: &str) -> Result<MessageRef, DeliveryError> {
            if chat_id == 13 {
                return Err(DeliveryError::Blocked);
            }
            self.sent.lock().unwrap().push(chat_id);
            Ok(1)
        }
        async fn edit_text(&self, _: i64, _: MessageRef, _: &str, _: Option<&ChoiceMenu>, _: &str) -> Result<(), DeliveryError> {
            Ok(())
        }
        async fn delete_message(&self, _: i64, _: MessageRef) -> Result<(), DeliveryError> {
            Ok(())
        }
        async fn send_photo(&self, _: i64, _: &str, _: &str, _: Option<&ChoiceMenu>, _: &str) -> Result<MessageRef, DeliveryError> {
            Ok(1)
        }
        async fn send_video(&self, _: i64, _: &str, _: &str, _: Option<&ChoiceMenu>, _: &str) -> Result<MessageRef, DeliveryError> {
            Ok(1)
        }
        async fn download_media(&self, media: &MediaRef) -> Result<Vec<u8>, DeliveryError> {
            Ok(media.as_bytes().to_vec())
        }
        async fn membership(&self, _: &str, _: i64) -> MembershipStatus {
            MembershipStatus::Member
        }
        async fn ban_member(&self, _: i64, _: i64) -> Result<(), DeliveryError> {
            Ok(())
        }
    }

    fn runner(store: Arc<Store>, messenger: Arc<SilentMessenger>) -> JobRunner {
        // Nothing listens on this port, so every remote call fails fast
        let catalog = Catalog::build(
            "http://127.0.0.1:9",
            &CapabilityPolicies::default(),
            &CircuitBreakerConfig::default(),
            Client::new(),
        );
        JobRunner::new(
            Arc::new(catalog),
            store,
            messenger,
            QuotaLimits::default(),
            ConversationConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_quota_checked_before_any_remote_call() {
        let store = Arc::new(Store::in_memory(10));
        store.upsert_user(1, "u", "U").await;
        let limits = QuotaLimits::default();
        for _ in 0..limits.free.daily_images {
            assert!(store.try_consume_quota(1, QuotaKind::Image, &limits).await);
        }
        let runner = runner(store, Arc::new(SilentMessenger::default()));

        let outcome = runner
            .run(SessionKey::new(1, 1), "en", &Job::GenerateImage("a cat".into()))
            .await;
        assert_eq!(outcome, Outcome::Failed(JobFailure::QuotaExceeded(QuotaKind::Image)));
    }

    #[tokio::test]
    async fn test_failed_job_gives_its_quota_back() {
        let store = Arc::new(Store::in_memory(10));
        store.upsert_user(1, "u", "U").await;
        let runner = runner(Arc::clone(&store), Arc::new(SilentMessenger::default()));

        let outcome = runner
            .run(SessionKey::new(1, 1), "en", &Job::GenerateImage("a cat".into()))
            .await;
        assert_eq!(outcome, Outcome::Failed(JobFailure::Unavailable));
        assert_eq!(store.quota(1).await.images_used, 0);
    }

    #[tokio::test]
    async fn test_premium_grant_changes_tier() {
        let store = Arc::new(Store::in_memory(10));
        store.upsert_user(42, "target", "T").await;
        let runner = runner(Arc::clone(&store), Arc::new(SilentMessenger::default()));

        let grant = Job::ModerateUser {
            action: AdminAction::GrantPremium,
            user_id: 42,
        };
        runner.run(SessionKey::new(1, 1), "en", &grant).await;
        assert_eq!(store.quota(42).await.tier, QuotaTier::Premium);

        let revoke = Job::ModerateUser {
            action: AdminAction::RevokePremium,
            user_id: 42,
        };
        runner.run(SessionKey::new(1, 1), "en", &revoke).await;
        assert_eq!(store.quota(42).await.tier, QuotaTier::Free);
    }

    #[tokio::test]
    async fn test_moderate_user_updates_store() {
        let store = Arc::new(Store::in_memory(10));
        store.upsert_user(42, "target", "T").await;
        let runner = runner(Arc::clone(&store), Arc::new(SilentMessenger::default()));

        let job = Job::ModerateUser {
            action: AdminAction::Ban,
            user_id: 42,
        };
        let outcome = runner.run(SessionKey::new(1, 1), "en", &job).await;
        assert_eq!(
            outcome,
            Outcome::UserModerated {
                action: AdminAction::Ban,
                user_id: 42
            }
        );
        assert!(store.is_banned(42).await);
    }

    #[tokio::test]
    async fn test_read_document_decodes_text() {
        let store = Arc::new(Store::in_memory(10));
        let runner = runner(store, Arc::new(SilentMessenger::default()));

        let outcome = runner
            .run(SessionKey::new(1, 1), "en", &Job::ReadDocument("  lecture notes  ".into()))
            .await;
        assert_eq!(
            outcome,
            Outcome::Extracted {
                text: "lecture notes".into(),
                extra: None
            }
        );
    }

    #[tokio::test]
    async fn test_unreadable_document_is_reported() {
        let store = Arc::new(Store::in_memory(10));
        let runner = runner(store, Arc::new(SilentMessenger::default()));

        for content in ["%PDF-1.7 not really a pdf", "PK\u{3}\u{4} broken archive", "   hi  "] {
            let outcome = runner
                .run(SessionKey::new(1, 1), "en", &Job::ReadDocument(content.into()))
                .await;
            assert_eq!(
                outcome,
                Outcome::Failed(JobFailure::Invalid(ValidationFailure::UnreadableDocument)),
                "{content}"
            );
        }
    }

    #[tokio::test]
    async fn test_broadcast_counts_blocked_recipients() {
        let store = Arc::new(Store::in_memory(10));
        for id in [11, 12, 13] {
            store.upsert_user(id, "u", "U").await;
        }
        let messenger = Arc::new(SilentMessenger::default());
        let runner = runner(store, Arc::clone(&messenger));

        let outcome = runner
            .run(SessionKey::new(1, 1), "en", &Job::Broadcast("hello".into()))
            .await;
        assert_eq!(
            outcome,
            Outcome::Broadcast(BroadcastReport {
                sent: 2,
                failed: 0,
                blocked: 1
            })
        );
        assert_eq!(messenger.sent.lock().unwrap().len(), 2);
    }
}
