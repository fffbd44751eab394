//! Outputs of the interaction state machine: what to render and which remote job to run.

use crate::bot::events::{ButtonAction, FollowUpAction, OcrMode};
use crate::errors::{InvokeFailure, ValidationFailure};
use crate::quota::QuotaKind;
use crate::session::{AdminAction, MediaRef, SolvedExercise};
use crate::store::{BotStats, GroupSettings};

/// Remote work dispatched outside the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum Job {
    /// Free-text question answered with conversation context
    Ask(String),
    Search(String),
    Code(String),
    GenerateImage(String),
    GenerateVideo(String),
    /// Image-to-video from one still photo
    AnimateImage {
        prompt: String,
        image: MediaRef,
    },
    SolveEquation(String),
    SearchBooks(String),
    EditImage {
        instruction: String,
        media: Vec<MediaRef>,
    },
    Enhance(MediaRef),
    Ocr {
        media: Vec<MediaRef>,
        mode: OcrMode,
    },
    /// OCR the photos, then ask for an exercise analysis
    AnalyzeExercises(Vec<MediaRef>),
    SolveExercise {
        index: u32,
        original_text: String,
        analysis: String,
    },
    /// Solve exercises `from..=to` in order
    SolveAll {
        from: u32,
        to: u32,
        original_text: String,
        analysis: String,
    },
    ClarifyExercise {
        index: u32,
        exercise: String,
    },
    ResolveExercise {
        index: u32,
        exercise: String,
    },
    FollowUp {
        action: FollowUpAction,
        text: String,
    },
    Freeform {
        instruction: String,
        text: String,
    },
    ReadDocument(MediaRef),
    Stats,
    ModerateUser {
        action: AdminAction,
        user_id: i64,
    },
    Broadcast(String),
}

impl Job {
    /// Quota consumed by a successful run
    pub fn quota(&self) -> Option<QuotaKind> {
        match self {
            Job::GenerateImage(_) | Job::EditImage { .. } | Job::Enhance(_) => Some(QuotaKind::Image),
            Job::GenerateVideo(_) | Job::AnimateImage { .. } => Some(QuotaKind::Video),
            _ => None,
        }
    }

    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Job::Ask(_) => "ask",
            Job::Search(_) => "search",
            Job::Code(_) => "code",
            Job::GenerateImage(_) => "generate_image",
            Job::GenerateVideo(_) => "generate_video",
            Job::AnimateImage { .. } => "animate_image",
            Job::SolveEquation(_) => "solve_equation",
            Job::SearchBooks(_) => "search_books",
            Job::EditImage { .. } => "edit_image",
            Job::Enhance(_) => "enhance",
            Job::Ocr { .. } => "ocr",
            Job::AnalyzeExercises(_) => "analyze_exercises",
            Job::SolveExercise { .. } => "solve_exercise",
            Job::SolveAll { .. } => "solve_all",
            Job::ClarifyExercise { .. } => "clarify_exercise",
            Job::ResolveExercise { .. } => "resolve_exercise",
            Job::FollowUp { .. } => "follow_up",
            Job::Freeform { .. } => "freeform",
            Job::ReadDocument(_) => "read_document",
            Job::Stats => "stats",
            Job::ModerateUser { .. } => "moderate_user",
            Job::Broadcast(_) => "broadcast",
        }
    }

    /// The button that dispatches this job again after a failure, if any
    pub fn retry_button(&self) -> Option<ButtonAction> {
        match self {
            Job::SolveExercise { .. } => Some(ButtonAction::ExerciseNext),
            Job::SolveAll { .. } => Some(ButtonAction::ExerciseAll),
            Job::ClarifyExercise { index, .. } => Some(ButtonAction::ExerciseClarify(*index)),
            Job::ResolveExercise { index, .. } => Some(ButtonAction::ExerciseResolve(*index)),
            Job::FollowUp { action, .. } => Some(ButtonAction::FollowUp(*action)),
            _ => None,
        }
    }
}

/// Why a job produced no result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobFailure {
    /// Every capability of the chain failed
    Unavailable,
    QuotaExceeded(QuotaKind),
    Invalid(ValidationFailure),
}

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobFailure::Unavailable => write!(f, "Every capability failed"),
            JobFailure::QuotaExceeded(kind) => write!(f, "Daily {kind:?} quota exhausted"),
            JobFailure::Invalid(failure) => write!(f, "{failure}"),
        }
    }
}

impl std::error::Error for JobFailure {}

impl From<InvokeFailure> for JobFailure {
    fn from(_: InvokeFailure) -> Self {
        JobFailure::Unavailable
    }
}

/// Counters of a finished broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub sent: u32,
    pub failed: u32,
    pub blocked: u32,
}

/// Result of a job, fed back into the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Text(String),
    /// Text pulled out of photos or a document, with an optional explanation or translation
    Extracted {
        text: String,
        extra: Option<String>,
    },
    Image(String),
    Video(String),
    Exercises {
        original_text: String,
        analysis: String,
        exercise_count: u32,
        has_questions: bool,
    },
    Solved(Vec<SolvedExercise>),
    Stats(BotStats),
    UserModerated {
        action: AdminAction,
        user_id: i64,
    },
    Broadcast(BroadcastReport),
    Failed(JobFailure),
}

/// Which inline keyboard accompanies a reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChoiceMenu {
    Main { admin: bool },
    /// A single "main menu" button
    BackToMenu,
    CancelOnly,
    CollectingPhotos { count: usize },
    PhotoChoice,
    OcrOptions,
    TranslateLanguages,
    FollowUp,
    ExerciseStart,
    ExerciseStep { index: u32 },
    /// After a clarification or an alternative solution
    ExerciseRevisited { index: u32 },
    ExerciseSummary,
    ExerciseDone,
    EditResult,
    EnhanceResult,
    Failure { retry: Option<ButtonAction> },
    AdminPanel,
    /// Moderation switches of a group, shown to its admins
    GroupSettings { group_id: i64, settings: GroupSettings },
}

/// Content of one outgoing message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyBody {
    Text(String),
    Photo { url: String, caption: String },
    Video { url: String, caption: String },
}

/// One message to render
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub body: ReplyBody,
    pub menu: Option<ChoiceMenu>,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            body: ReplyBody::Text(text.into()),
            menu: None,
        }
    }

    pub fn with_menu(mut self, menu: ChoiceMenu) -> Self {
        self.menu = Some(menu);
        self
    }

    pub fn text_body(&self) -> Option<&str> {
        match &self.body {
            ReplyBody::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// Instruction produced by one state machine step
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Reply(Reply),
    Run { operation: u64, job: Job },
}
