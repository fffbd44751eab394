//! # Interaction state machine
//!
//! [`step`] is a pure transition `(SessionState, Event) -> (SessionState, Effects)`.
//! It never touches the transport or a provider: replies and remote jobs come out
//! as [`Effect`]s and job results come back in as [`Event::Completed`].
//!
//! Rules that hold for every transition:
//! - A top-level command or an uploaded document cancels whatever the session was
//!   doing before it is handled, so no stale buffer leaks into the new flow.
//! - While a job is in flight, any other input is answered with "busy".
//! - A completion whose operation id is no longer the session's in-flight id is
//!   dropped without a reply.
//! - Input that needs data the session no longer holds resets it and renders
//!   "session expired".

use tracing::{debug, info, warn};

use crate::bot::effects::{ChoiceMenu, Effect, Job, JobFailure, Outcome, Reply, ReplyBody};
use crate::bot::events::{ButtonAction, Command, DocumentInfo, Event, FollowUpAction, OcrMode};
use crate::bot::prompts::{exercise_summary, language_name};
use crate::config::MAX_COLLECTED_MEDIA;
use crate::errors::ValidationFailure;
use crate::localization::{t_args_lang, t_lang};
use crate::quota::QuotaKind;
use crate::session::{
    parse_user_id, validate_equation, validate_prompt, AdminAction, ExerciseSession, MediaRef,
    PendingOperation, PhotoPurpose, PromptKind, SessionState, SolvedExercise,
};

/// Per-event facts the state machine cannot know by itself
#[derive(Debug, Clone)]
pub struct Context {
    pub language: &'static str,
    pub is_admin: bool,
    /// Id assigned to the job this step dispatches, if it dispatches one
    pub operation: u64,
}

/// Apply one event to a session
pub fn step(mut state: SessionState, ctx: &Context, event: Event) -> (SessionState, Vec<Effect>) {
    let mut turn = Turn {
        ctx,
        effects: Vec::new(),
    };

    if event.is_top_level() {
        if !state.is_idle() || state.in_flight().is_some() {
            debug!(pending = ?state.pending(), "Top-level input cancels the pending operation");
        }
        state.cancel();
    }

    match event {
        Event::Completed {
            operation,
            job,
            outcome,
        } => {
            if state.complete_operation(operation) {
                turn.completed(&mut state, job, outcome);
            } else {
                debug!(operation, job = job.name(), "Dropping result of a superseded operation");
            }
        }
        Event::Command(command) | Event::Button(ButtonAction::Command(command)) => {
            turn.command(&mut state, command)
        }
        Event::Document(document) => turn.document(&mut state, document),
        _ if state.in_flight().is_some() => turn.say("busy", ChoiceMenu::CancelOnly),
        Event::Text(text) => turn.text(&mut state, text),
        Event::Photo(photo) => turn.photo(&mut state, photo),
        Event::Button(action) => turn.button(&mut state, action),
    }

    (state, turn.effects)
}

struct Turn<'a> {
    ctx: &'a Context,
    effects: Vec<Effect>,
}

impl Turn<'_> {
    fn t(&self, key: &str) -> String {
        t_lang(key, Some(self.ctx.language))
    }

    fn t_args(&self, key: &str, args: &[(&str, &str)]) -> String {
        t_args_lang(key, args, Some(self.ctx.language))
    }

    fn main_menu(&self) -> ChoiceMenu {
        ChoiceMenu::Main {
            admin: self.ctx.is_admin,
        }
    }

    fn reply(&mut self, reply: Reply) {
        self.effects.push(Effect::Reply(reply));
    }

    fn say(&mut self, key: &str, menu: ChoiceMenu) {
        let reply = Reply::text(self.t(key)).with_menu(menu);
        self.reply(reply);
    }

    fn say_args(&mut self, key: &str, args: &[(&str, &str)], menu: ChoiceMenu) {
        let reply = Reply::text(self.t_args(key, args)).with_menu(menu);
        self.reply(reply);
    }

    /// A titled block of text
    fn titled(&mut self, title: String, body: &str, menu: Option<ChoiceMenu>) {
        let mut reply = Reply::text(format!("{title}\n\n{body}"));
        reply.menu = menu;
        self.reply(reply);
    }

    fn invalid(&mut self, failure: ValidationFailure, menu: ChoiceMenu) {
        debug!(?failure, "Rejected input");
        self.say(failure.message_key(), menu);
    }

    fn expired(&mut self, state: &mut SessionState) {
        info!(pending = ?state.pending(), "Session data missing, resetting");
        state.cancel();
        let menu = self.main_menu();
        self.say("session-expired", menu);
    }

    fn dispatch(&mut self, state: &mut SessionState, job: Job) {
        let operation = self.ctx.operation;
        state.begin_operation(operation);
        info!(operation, job = job.name(), "Dispatching job");
        self.effects.push(Effect::Run { operation, job });
    }

    fn command(&mut self, state: &mut SessionState, command: Command) {
        if command.requires_admin() && !self.ctx.is_admin {
            let menu = self.main_menu();
            return self.invalid(ValidationFailure::NotAdmin, menu);
        }

        match command {
            Command::Start => {
                let menu = self.main_menu();
                self.say("welcome", menu);
            }
            Command::Help => {
                let menu = self.main_menu();
                self.say("help-text", menu);
            }
            Command::Cancel => {
                let menu = self.main_menu();
                self.say("cancelled", menu);
            }
            Command::RequestPhoto(purpose) => {
                state.set_pending(PendingOperation::AwaitingPhotoFor(purpose));
                self.say(photo_request_key(purpose), ChoiceMenu::CancelOnly);
            }
            Command::Prompt(kind, None) => {
                state.set_pending(PendingOperation::AwaitingPrompt(kind));
                self.say(prompt_request_key(kind), ChoiceMenu::CancelOnly);
            }
            Command::Prompt(kind, Some(text)) => self.prompt(state, kind, &text),
            Command::AdminPanel => self.say("admin-panel-title", ChoiceMenu::AdminPanel),
            Command::AdminStats => self.dispatch(state, Job::Stats),
            Command::Admin(action) => {
                state.set_pending(PendingOperation::AwaitingAdminTargetId(action));
                self.say("admin-enter-id", ChoiceMenu::CancelOnly);
            }
            Command::Broadcast => {
                state.set_pending(PendingOperation::AwaitingBroadcastBody);
                self.say("admin-enter-broadcast", ChoiceMenu::CancelOnly);
            }
        }
    }

    /// Run a prompt-driven feature; invalid input keeps the session waiting
    fn prompt(&mut self, state: &mut SessionState, kind: PromptKind, text: &str) {
        let validated = match kind {
            PromptKind::Equation => validate_equation(text),
            _ => validate_prompt(text),
        };

        match validated {
            Ok(text) => {
                let job = match kind {
                    PromptKind::Search => Job::Search(text),
                    PromptKind::Code => Job::Code(text),
                    PromptKind::ImageGenerate => Job::GenerateImage(text),
                    PromptKind::VideoGenerate => Job::GenerateVideo(text),
                    PromptKind::Equation => Job::SolveEquation(text),
                    PromptKind::BookSearch => Job::SearchBooks(text),
                };
                self.dispatch(state, job);
            }
            Err(failure) => {
                state.set_pending(PendingOperation::AwaitingPrompt(kind));
                self.invalid(failure, ChoiceMenu::CancelOnly);
            }
        }
    }

    fn document(&mut self, state: &mut SessionState, document: DocumentInfo) {
        match document.validate() {
            Ok(format) => {
                debug!(?format, size = document.size, "Document accepted");
                self.dispatch(state, Job::ReadDocument(document.media));
            }
            Err(failure) => {
                let menu = self.main_menu();
                self.invalid(failure, menu);
            }
        }
    }

    fn text(&mut self, state: &mut SessionState, text: String) {
        match state.pending().clone() {
            PendingOperation::None | PendingOperation::ExerciseFlow => match validate_prompt(&text) {
                Ok(question) => self.dispatch(state, Job::Ask(question)),
                Err(failure) => {
                    let menu = self.main_menu();
                    self.invalid(failure, menu);
                }
            },
            PendingOperation::AwaitingPhotoFor(_) => self.say("photo-expected", ChoiceMenu::CancelOnly),
            PendingOperation::CollectingPhotos(_) => {
                let count = state.collected_media().len();
                self.say("photo-expected", ChoiceMenu::CollectingPhotos { count });
            }
            PendingOperation::AwaitingPhotoChoice(_) => {
                self.say("photo-choice-expected", ChoiceMenu::PhotoChoice)
            }
            PendingOperation::AwaitingOcrChoice(_) => {
                self.say("ocr-choice-expected", ChoiceMenu::OcrOptions)
            }
            PendingOperation::AwaitingVideoPrompt(image) => match validate_prompt(&text) {
                Ok(prompt) => {
                    state.set_pending(PendingOperation::None);
                    self.dispatch(state, Job::AnimateImage { prompt, image });
                }
                Err(failure) => self.invalid(failure, ChoiceMenu::CancelOnly),
            },
            PendingOperation::AwaitingEditDescription(target) => self.edit(state, &text, vec![target]),
            PendingOperation::AwaitingMultiEditDescription(targets) => self.edit(state, &text, targets),
            PendingOperation::AwaitingPrompt(kind) => {
                state.set_pending(PendingOperation::None);
                self.prompt(state, kind, &text);
            }
            PendingOperation::AwaitingAdminTargetId(action) => {
                if !self.ctx.is_admin {
                    state.cancel();
                    let menu = self.main_menu();
                    return self.invalid(ValidationFailure::NotAdmin, menu);
                }
                match parse_user_id(&text) {
                    Ok(user_id) => {
                        state.set_pending(PendingOperation::None);
                        self.dispatch(state, Job::ModerateUser { action, user_id });
                    }
                    Err(failure) => self.invalid(failure, ChoiceMenu::CancelOnly),
                }
            }
            PendingOperation::AwaitingBroadcastBody => {
                if !self.ctx.is_admin {
                    state.cancel();
                    let menu = self.main_menu();
                    return self.invalid(ValidationFailure::NotAdmin, menu);
                }
                match validate_prompt(&text) {
                    Ok(body) => {
                        state.set_pending(PendingOperation::None);
                        self.dispatch(state, Job::Broadcast(body));
                    }
                    Err(failure) => self.invalid(failure, ChoiceMenu::CancelOnly),
                }
            }
            PendingOperation::AwaitingFreeformInstruction => {
                let Some(source) = state.last_extracted_text().map(str::to_string) else {
                    return self.expired(state);
                };
                match validate_prompt(&text) {
                    Ok(instruction) => {
                        state.set_pending(PendingOperation::None);
                        self.dispatch(
                            state,
                            Job::Freeform {
                                instruction,
                                text: source,
                            },
                        );
                    }
                    Err(failure) => self.invalid(failure, ChoiceMenu::CancelOnly),
                }
            }
        }
    }

    fn edit(&mut self, state: &mut SessionState, text: &str, media: Vec<MediaRef>) {
        match validate_prompt(text) {
            Ok(instruction) => {
                state.set_pending(PendingOperation::None);
                self.dispatch(state, Job::EditImage { instruction, media });
            }
            Err(failure) => self.invalid(failure, ChoiceMenu::CancelOnly),
        }
    }

    fn photo(&mut self, state: &mut SessionState, photo: MediaRef) {
        match state.pending().clone() {
            PendingOperation::AwaitingPhotoFor(purpose) => match purpose {
                PhotoPurpose::Edit | PhotoPurpose::Analyze => {
                    state.start_collecting(purpose, photo);
                    self.photo_received(1);
                }
                PhotoPurpose::Enhance => {
                    state.set_pending(PendingOperation::None);
                    self.dispatch(state, Job::Enhance(photo));
                }
                PhotoPurpose::MathSolve => {
                    state.set_pending(PendingOperation::None);
                    self.dispatch(state, Job::AnalyzeExercises(vec![photo]));
                }
            },
            PendingOperation::AwaitingPrompt(PromptKind::VideoGenerate)
            | PendingOperation::AwaitingVideoPrompt(_) => {
                state.set_pending(PendingOperation::AwaitingVideoPrompt(photo));
                self.say("video-photo-received", ChoiceMenu::CancelOnly);
            }
            PendingOperation::CollectingPhotos(_) => {
                let before = state.collected_media().len();
                let count = state.push_media(photo);
                if count == before {
                    let max = MAX_COLLECTED_MEDIA.to_string();
                    self.say_args(
                        "photo-limit-reached",
                        &[("max", &max)],
                        ChoiceMenu::CollectingPhotos { count },
                    );
                } else {
                    self.photo_received(count);
                }
            }
            _ => {
                state.set_pending(PendingOperation::AwaitingPhotoChoice(photo));
                self.say("photo-choice", ChoiceMenu::PhotoChoice);
            }
        }
    }

    fn photo_received(&mut self, count: usize) {
        let n = count.to_string();
        self.say_args(
            "photo-received",
            &[("count", &n)],
            ChoiceMenu::CollectingPhotos { count },
        );
    }

    fn ask_edit_description(&mut self, count: usize) {
        let n = count.to_string();
        self.say_args("edit-describe", &[("count", &n)], ChoiceMenu::CancelOnly);
    }

    fn ocr_options(&mut self, count: usize) {
        let n = count.to_string();
        self.say_args("ocr-options", &[("count", &n)], ChoiceMenu::OcrOptions);
    }

    fn button(&mut self, state: &mut SessionState, action: ButtonAction) {
        match action {
            ButtonAction::Command(command) => self.command(state, command),
            ButtonAction::PhotosDone => self.photos_done(state),
            ButtonAction::PhotoChoice(purpose) => self.photo_choice(state, purpose),
            ButtonAction::OcrExtract => self.ocr(state, OcrMode::ExtractOnly),
            ButtonAction::OcrExplain => self.ocr(state, OcrMode::Explain),
            ButtonAction::OcrTranslate(language) => {
                if language_name(&language).is_some() {
                    self.ocr(state, OcrMode::Translate(language));
                } else {
                    warn!(%language, "Unknown translation language");
                    self.expired(state);
                }
            }
            ButtonAction::OcrTranslateMenu => match ocr_batch_size(state) {
                Some(_) => self.say("ocr-choose-language", ChoiceMenu::TranslateLanguages),
                None => self.expired(state),
            },
            ButtonAction::OcrBack => match ocr_batch_size(state) {
                Some(count) => self.ocr_options(count),
                None => self.expired(state),
            },
            ButtonAction::FollowUp(action) => self.follow_up(state, action),
            ButtonAction::ShowFullText => self.show_full_text(state),
            ButtonAction::ExerciseNext => self.solve_next(state, false),
            ButtonAction::ExerciseAll => self.solve_next(state, true),
            ButtonAction::ExerciseClarify(index) => self.revisit(state, index, true),
            ButtonAction::ExerciseResolve(index) => self.revisit(state, index, false),
            ButtonAction::ExerciseShowAll => self.show_all(state),
            ButtonAction::ExerciseFinish => {
                state.set_exercise(None);
                state.set_pending(PendingOperation::None);
                self.say("exercise-finished", ChoiceMenu::ExerciseDone);
            }
            ButtonAction::EditAgain => match state.last_result().map(str::to_string) {
                Some(previous) => {
                    state.set_pending(PendingOperation::AwaitingEditDescription(previous));
                    self.ask_edit_description(1);
                }
                None => self.expired(state),
            },
            ButtonAction::GroupSetting { group_id, .. } => {
                debug!(group_id, "Group settings button reached a session");
            }
        }
    }

    fn photos_done(&mut self, state: &mut SessionState) {
        let PendingOperation::CollectingPhotos(purpose) = state.pending().clone() else {
            return self.expired(state);
        };
        let mut media = state.take_media();
        if media.is_empty() {
            return self.expired(state);
        }

        let count = media.len();
        match purpose {
            PhotoPurpose::Edit => {
                let next = if count == 1 {
                    PendingOperation::AwaitingEditDescription(media.swap_remove(0))
                } else {
                    PendingOperation::AwaitingMultiEditDescription(media)
                };
                state.set_pending(next);
                self.ask_edit_description(count);
            }
            PhotoPurpose::Analyze => {
                state.set_pending(PendingOperation::AwaitingOcrChoice(media));
                self.ocr_options(count);
            }
            PhotoPurpose::Enhance | PhotoPurpose::MathSolve => self.expired(state),
        }
    }

    fn photo_choice(&mut self, state: &mut SessionState, purpose: PhotoPurpose) {
        let PendingOperation::AwaitingPhotoChoice(photo) = state.pending().clone() else {
            return self.expired(state);
        };
        state.set_pending(PendingOperation::None);

        match purpose {
            PhotoPurpose::MathSolve => self.dispatch(state, Job::AnalyzeExercises(vec![photo])),
            PhotoPurpose::Analyze => {
                state.set_pending(PendingOperation::AwaitingOcrChoice(vec![photo]));
                self.ocr_options(1);
            }
            PhotoPurpose::Edit => {
                state.set_pending(PendingOperation::AwaitingEditDescription(photo));
                self.ask_edit_description(1);
            }
            PhotoPurpose::Enhance => self.dispatch(state, Job::Enhance(photo)),
        }
    }

    fn ocr(&mut self, state: &mut SessionState, mode: OcrMode) {
        let PendingOperation::AwaitingOcrChoice(media) = state.pending().clone() else {
            return self.expired(state);
        };
        state.set_pending(PendingOperation::None);
        self.dispatch(state, Job::Ocr { media, mode });
    }

    fn follow_up(&mut self, state: &mut SessionState, action: FollowUpAction) {
        let Some(text) = state.last_extracted_text().map(str::to_string) else {
            return self.expired(state);
        };

        self.dispatch(state, Job::FollowUp { action, text });
    }

    fn show_full_text(&mut self, state: &mut SessionState) {
        let Some(text) = state.last_extracted_text().map(str::to_string) else {
            return self.expired(state);
        };
        let title = self.t("extracted-text-title");
        self.titled(title, &text, Some(ChoiceMenu::FollowUp));
    }

    fn solve_next(&mut self, state: &mut SessionState, all: bool) {
        let Some(exercise) = state.exercise() else {
            return self.expired(state);
        };

        if exercise.is_complete() {
            let count = exercise.exercise_count.to_string();
            let index = exercise.current_index();
            return self.say_args(
                "exercise-all-solved",
                &[("count", &count)],
                ChoiceMenu::ExerciseStep { index },
            );
        }

        let job = if all {
            Job::SolveAll {
                from: exercise.next_index(),
                to: exercise.exercise_count,
                original_text: exercise.original_text.clone(),
                analysis: exercise.analysis.clone(),
            }
        } else {
            Job::SolveExercise {
                index: exercise.next_index(),
                original_text: exercise.original_text.clone(),
                analysis: exercise.analysis.clone(),
            }
        };
        state.set_pending(PendingOperation::ExerciseFlow);
        self.dispatch(state, job);
    }

    fn revisit(&mut self, state: &mut SessionState, index: u32, clarify: bool) {
        let Some(exercise) = state.exercise() else {
            return self.expired(state);
        };
        // Only solved exercises have a statement of their own
        let Some(statement) = exercise.find(index).map(|solved| solved.extraction.clone()) else {
            warn!(index, "Revisit of an exercise that was never solved");
            return self.expired(state);
        };

        let job = if clarify {
            Job::ClarifyExercise {
                index,
                exercise: statement,
            }
        } else {
            Job::ResolveExercise {
                index,
                exercise: statement,
            }
        };
        self.dispatch(state, job);
    }

    fn show_all(&mut self, state: &mut SessionState) {
        let Some(exercise) = state.exercise() else {
            return self.expired(state);
        };
        if exercise.solved().is_empty() {
            return self.say("exercise-none-solved", ChoiceMenu::ExerciseSummary);
        }
        let summary = exercise_summary(exercise.solved());
        let title = self.t("exercise-summary-title");
        self.titled(title, &summary, Some(ChoiceMenu::ExerciseSummary));
    }

    fn completed(&mut self, state: &mut SessionState, job: Job, outcome: Outcome) {
        debug!(job = job.name(), "Job completed");
        match outcome {
            Outcome::Failed(failure) => self.failed(&job, failure),
            Outcome::Text(text) => self.text_result(job, &text),
            Outcome::Extracted { text, extra } => {
                state.set_extracted_text(text.clone());
                let title = match job {
                    Job::ReadDocument(_) => self.t("document-text-title"),
                    _ => self.t("ocr-result-title"),
                };
                match extra {
                    None => self.titled(title, &text, Some(ChoiceMenu::FollowUp)),
                    Some(extra) => {
                        self.titled(title, &text, None);
                        let extra_title = match job {
                            Job::Ocr {
                                mode: OcrMode::Translate(_),
                                ..
                            } => self.t("ocr-translation-title"),
                            _ => self.t("ocr-explanation-title"),
                        };
                        self.titled(extra_title, &extra, Some(ChoiceMenu::FollowUp));
                    }
                }
            }
            Outcome::Image(url) => match job {
                Job::EditImage { instruction, .. } => {
                    state.set_last_result(Some(url.clone()));
                    let caption = self.t_args("edit-done", &[("prompt", &instruction)]);
                    self.reply(Reply {
                        body: ReplyBody::Photo { url, caption },
                        menu: Some(ChoiceMenu::EditResult),
                    });
                }
                Job::Enhance(_) => {
                    let caption = self.t("enhance-done");
                    self.reply(Reply {
                        body: ReplyBody::Photo { url, caption },
                        menu: Some(ChoiceMenu::EnhanceResult),
                    });
                }
                other => {
                    let caption = match &other {
                        Job::GenerateImage(prompt) => format!("🎨 {prompt}"),
                        _ => String::from("🎨"),
                    };
                    self.reply(Reply {
                        body: ReplyBody::Photo { url, caption },
                        menu: Some(ChoiceMenu::BackToMenu),
                    });
                }
            },
            Outcome::Video(url) => {
                let caption = match &job {
                    Job::GenerateVideo(prompt) | Job::AnimateImage { prompt, .. } => format!("🎬 {prompt}"),
                    _ => String::from("🎬"),
                };
                self.reply(Reply {
                    body: ReplyBody::Video { url, caption },
                    menu: Some(ChoiceMenu::BackToMenu),
                });
            }
            Outcome::Exercises {
                original_text,
                analysis,
                exercise_count,
                has_questions,
            } => {
                state.set_extracted_text(original_text.clone());
                let exercise =
                    ExerciseSession::new(original_text, analysis.clone(), exercise_count, has_questions);
                let count = exercise.exercise_count.to_string();
                state.set_exercise(Some(exercise));

                let title = self.t("exercise-analysis-title");
                self.titled(title, &analysis, None);
                if has_questions {
                    state.set_pending(PendingOperation::ExerciseFlow);
                    self.say_args("exercise-detected", &[("count", &count)], ChoiceMenu::ExerciseStart);
                } else {
                    state.set_pending(PendingOperation::AwaitingFreeformInstruction);
                    self.say("exercise-no-questions", ChoiceMenu::CancelOnly);
                }
            }
            Outcome::Solved(results) => self.solved(state, results),
            Outcome::Stats(stats) => {
                let users = stats.total_users.to_string();
                let banned = stats.banned_users.to_string();
                let muted = stats.muted_users.to_string();
                let messages = stats.total_messages.to_string();
                self.say_args(
                    "admin-stats",
                    &[
                        ("users", &users),
                        ("banned", &banned),
                        ("muted", &muted),
                        ("messages", &messages),
                    ],
                    ChoiceMenu::AdminPanel,
                );
            }
            Outcome::UserModerated { action, user_id } => {
                let id = user_id.to_string();
                self.say_args(admin_done_key(action), &[("id", &id)], ChoiceMenu::AdminPanel);
            }
            Outcome::Broadcast(report) => {
                let sent = report.sent.to_string();
                let failed = report.failed.to_string();
                let blocked = report.blocked.to_string();
                self.say_args(
                    "admin-broadcast-done",
                    &[("sent", &sent), ("failed", &failed), ("blocked", &blocked)],
                    ChoiceMenu::AdminPanel,
                );
            }
        }
    }

    fn failed(&mut self, job: &Job, failure: JobFailure) {
        match failure {
            JobFailure::Unavailable => self.say(
                "service-unavailable",
                ChoiceMenu::Failure {
                    retry: job.retry_button(),
                },
            ),
            JobFailure::QuotaExceeded(kind) => {
                let key = match kind {
                    QuotaKind::Image => "quota-exceeded-image",
                    QuotaKind::Video => "quota-exceeded-video",
                };
                let menu = self.main_menu();
                self.say(key, menu);
            }
            JobFailure::Invalid(failure) => {
                let menu = self.main_menu();
                self.invalid(failure, menu);
            }
        }
    }

    fn text_result(&mut self, job: Job, text: &str) {
        match job {
            Job::Ask(_) => self.reply(Reply::text(text)),
            Job::FollowUp { .. } | Job::Freeform { .. } => {
                self.reply(Reply::text(text).with_menu(ChoiceMenu::FollowUp))
            }
            Job::ClarifyExercise { index, .. } => {
                let n = index.to_string();
                let title = self.t_args("exercise-clarification", &[("index", &n)]);
                self.titled(title, text, Some(ChoiceMenu::ExerciseRevisited { index }));
            }
            Job::ResolveExercise { index, .. } => {
                let n = index.to_string();
                let title = self.t_args("exercise-resolution", &[("index", &n)]);
                self.titled(title, text, Some(ChoiceMenu::ExerciseRevisited { index }));
            }
            _ => self.reply(Reply::text(text).with_menu(ChoiceMenu::BackToMenu)),
        }
    }

    fn solved(&mut self, state: &mut SessionState, results: Vec<SolvedExercise>) {
        let Some(exercise) = state.exercise_mut() else {
            return self.expired(state);
        };

        let mut recorded = Vec::with_capacity(results.len());
        for result in results {
            if result.index != exercise.next_index() {
                warn!(
                    expected = exercise.next_index(),
                    got = result.index,
                    "Out-of-order exercise result dropped"
                );
                continue;
            }
            exercise.record_next(result.extraction.clone(), result.solution.clone());
            recorded.push(result);
        }
        let complete = exercise.is_complete();
        let count = exercise.exercise_count.to_string();
        let index = exercise.current_index();

        for result in &recorded {
            let n = result.index.to_string();
            let statement = self.t_args("exercise-statement", &[("index", &n)]);
            self.titled(statement, &result.extraction, None);
            let solution = self.t_args("exercise-solution", &[("index", &n)]);
            self.titled(solution, &result.solution, None);
        }

        let menu = ChoiceMenu::ExerciseStep { index };
        if complete {
            self.say_args("exercise-all-solved", &[("count", &count)], menu);
        } else {
            self.say("exercise-next-step", menu);
        }
    }
}

fn ocr_batch_size(state: &SessionState) -> Option<usize> {
    match state.pending() {
        PendingOperation::AwaitingOcrChoice(media) => Some(media.len()),
        _ => None,
    }
}

fn photo_request_key(purpose: PhotoPurpose) -> &'static str {
    match purpose {
        PhotoPurpose::Edit => "photo-request-edit",
        PhotoPurpose::Analyze => "photo-request-analyze",
        PhotoPurpose::Enhance => "photo-request-enhance",
        PhotoPurpose::MathSolve => "photo-request-exercise",
    }
}

fn prompt_request_key(kind: PromptKind) -> &'static str {
    match kind {
        PromptKind::Search => "prompt-search",
        PromptKind::Code => "prompt-code",
        PromptKind::ImageGenerate => "prompt-image",
        PromptKind::VideoGenerate => "prompt-video",
        PromptKind::Equation => "prompt-equation",
        PromptKind::BookSearch => "prompt-books",
    }
}

fn admin_done_key(action: AdminAction) -> &'static str {
    match action {
        AdminAction::Ban => "admin-ban-done",
        AdminAction::Unban => "admin-unban-done",
        AdminAction::Mute => "admin-mute-done",
        AdminAction::Unmute => "admin-unmute-done",
        AdminAction::GrantPremium => "admin-premium-done",
        AdminAction::RevokePremium => "admin-unpremium-done",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(operation: u64) -> Context {
        Context {
            language: "en",
            is_admin: false,
            operation,
        }
    }

    fn jobs(effects: &[Effect]) -> Vec<&Job> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Run { job, .. } => Some(job),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_idle_text_is_a_question() {
        let (state, effects) = step(SessionState::default(), &ctx(1), Event::Text("why is the sky blue".into()));
        assert_eq!(jobs(&effects), [&Job::Ask("why is the sky blue".into())]);
        assert_eq!(state.in_flight(), Some(1));
    }

    #[test]
    fn test_busy_while_in_flight() {
        let (state, _) = step(SessionState::default(), &ctx(1), Event::Text("first".into()));
        let (state, effects) = step(state, &ctx(2), Event::Text("second".into()));
        assert!(jobs(&effects).is_empty());
        assert_eq!(state.in_flight(), Some(1));
        assert!(matches!(
            &effects[0],
            Effect::Reply(Reply { menu: Some(ChoiceMenu::CancelOnly), .. })
        ));
    }

    #[test]
    fn test_admin_command_needs_admin() {
        let (state, effects) = step(SessionState::default(), &ctx(1), Event::Command(Command::Broadcast));
        assert!(state.is_idle());
        assert_eq!(effects.len(), 1);
    }

    #[test]
    fn test_invalid_equation_keeps_waiting() {
        let (state, _) = step(
            SessionState::default(),
            &ctx(1),
            Event::Command(Command::Prompt(PromptKind::Equation, None)),
        );
        let (state, effects) = step(state, &ctx(2), Event::Text("(x+1 = 2".into()));
        assert!(jobs(&effects).is_empty());
        assert_eq!(
            state.pending(),
            &PendingOperation::AwaitingPrompt(PromptKind::Equation)
        );

        let (state, effects) = step(state, &ctx(3), Event::Text("x + 1 = 2".into()));
        assert_eq!(jobs(&effects), [&Job::SolveEquation("x + 1 = 2".into())]);
        assert!(state.is_idle());
    }
}
