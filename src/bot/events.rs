//! Inputs of the interaction state machine: commands, button presses and job completions.

use crate::bot::effects::{Job, Outcome};
use crate::config::MAX_DOCUMENT_SIZE;
use crate::document::DocumentFormat;
use crate::errors::ValidationFailure;
use crate::session::{AdminAction, MediaRef, PhotoPurpose, PromptKind};

/// A top-level command, typed as `/name args` or picked from a menu
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Cancel,
    RequestPhoto(PhotoPurpose),
    /// A prompt-driven feature; `None` waits for the prompt in the next message
    Prompt(PromptKind, Option<String>),
    AdminPanel,
    AdminStats,
    Admin(AdminAction),
    Broadcast,
}

impl Command {
    /// Parse a slash command, ignoring a `@botname` suffix
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let rest = text.strip_prefix('/')?;
        let (head, args) = match rest.split_once(char::is_whitespace) {
            Some((head, args)) => (head, args.trim()),
            None => (rest, ""),
        };
        let name = head.split('@').next().unwrap_or_default().to_lowercase();
        let arg = (!args.is_empty()).then(|| args.to_string());

        let command = match name.as_str() {
            "start" => Command::Start,
            "help" => Command::Help,
            "cancel" => Command::Cancel,
            "edit" => Command::RequestPhoto(PhotoPurpose::Edit),
            "analyze" | "ocr" => Command::RequestPhoto(PhotoPurpose::Analyze),
            "enhance" => Command::RequestPhoto(PhotoPurpose::Enhance),
            "exercise" => Command::RequestPhoto(PhotoPurpose::MathSolve),
            "search" => Command::Prompt(PromptKind::Search, arg),
            "code" => Command::Prompt(PromptKind::Code, arg),
            "image" => Command::Prompt(PromptKind::ImageGenerate, arg),
            "video" => Command::Prompt(PromptKind::VideoGenerate, arg),
            "solve" => Command::Prompt(PromptKind::Equation, arg),
            "book" | "books" => Command::Prompt(PromptKind::BookSearch, arg),
            "admin" => Command::AdminPanel,
            "stats" => Command::AdminStats,
            "ban" => Command::Admin(AdminAction::Ban),
            "unban" => Command::Admin(AdminAction::Unban),
            "mute" => Command::Admin(AdminAction::Mute),
            "unmute" => Command::Admin(AdminAction::Unmute),
            "premium" => Command::Admin(AdminAction::GrantPremium),
            "unpremium" => Command::Admin(AdminAction::RevokePremium),
            "broadcast" => Command::Broadcast,
            _ => return None,
        };
        Some(command)
    }

    pub fn requires_admin(&self) -> bool {
        matches!(
            self,
            Command::AdminPanel | Command::AdminStats | Command::Admin(_) | Command::Broadcast
        )
    }

    fn menu_data(&self) -> Option<&'static str> {
        let data = match self {
            Command::Start => "menu_main",
            Command::Help => "menu_help",
            Command::Cancel => "cancel",
            Command::RequestPhoto(PhotoPurpose::Edit) => "menu_edit",
            Command::RequestPhoto(PhotoPurpose::Analyze) => "menu_analyze",
            Command::RequestPhoto(PhotoPurpose::Enhance) => "menu_enhance",
            Command::RequestPhoto(PhotoPurpose::MathSolve) => "menu_exercise",
            Command::Prompt(_, Some(_)) => return None,
            Command::Prompt(PromptKind::Search, None) => "menu_search",
            Command::Prompt(PromptKind::Code, None) => "menu_code",
            Command::Prompt(PromptKind::ImageGenerate, None) => "menu_image",
            Command::Prompt(PromptKind::VideoGenerate, None) => "menu_video",
            Command::Prompt(PromptKind::Equation, None) => "menu_equation",
            Command::Prompt(PromptKind::BookSearch, None) => "menu_books",
            Command::AdminPanel => "admin_panel",
            Command::AdminStats => "admin_stats",
            Command::Admin(AdminAction::Ban) => "admin_ban",
            Command::Admin(AdminAction::Unban) => "admin_unban",
            Command::Admin(AdminAction::Mute) => "admin_mute",
            Command::Admin(AdminAction::Unmute) => "admin_unmute",
            Command::Admin(AdminAction::GrantPremium) => "admin_premium",
            Command::Admin(AdminAction::RevokePremium) => "admin_unpremium",
            Command::Broadcast => "admin_broadcast",
        };
        Some(data)
    }

    fn from_menu_data(data: &str) -> Option<Self> {
        let command = match data {
            "menu_main" => Command::Start,
            "menu_help" => Command::Help,
            "cancel" => Command::Cancel,
            "menu_edit" => Command::RequestPhoto(PhotoPurpose::Edit),
            "menu_analyze" => Command::RequestPhoto(PhotoPurpose::Analyze),
            "menu_enhance" => Command::RequestPhoto(PhotoPurpose::Enhance),
            "menu_exercise" => Command::RequestPhoto(PhotoPurpose::MathSolve),
            "menu_search" => Command::Prompt(PromptKind::Search, None),
            "menu_code" => Command::Prompt(PromptKind::Code, None),
            "menu_image" => Command::Prompt(PromptKind::ImageGenerate, None),
            "menu_video" => Command::Prompt(PromptKind::VideoGenerate, None),
            "menu_equation" => Command::Prompt(PromptKind::Equation, None),
            "menu_books" => Command::Prompt(PromptKind::BookSearch, None),
            "admin_panel" => Command::AdminPanel,
            "admin_stats" => Command::AdminStats,
            "admin_ban" => Command::Admin(AdminAction::Ban),
            "admin_unban" => Command::Admin(AdminAction::Unban),
            "admin_mute" => Command::Admin(AdminAction::Mute),
            "admin_unmute" => Command::Admin(AdminAction::Unmute),
            "admin_premium" => Command::Admin(AdminAction::GrantPremium),
            "admin_unpremium" => Command::Admin(AdminAction::RevokePremium),
            "admin_broadcast" => Command::Broadcast,
            _ => return None,
        };
        Some(command)
    }
}

/// Remote follow-up jobs on the last extracted text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowUpAction {
    Explain,
    Summarize,
    Search,
    Translate,
}

/// How the OCR text of an analyze batch is used
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OcrMode {
    ExtractOnly,
    Explain,
    Translate(String),
}

/// Group settings a group admin can flip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupToggle {
    AutoModeration,
    DeleteProfanity,
    WarnOnProfanity,
    /// Cycle the warning threshold through 3, 5 and 10
    MaxWarnings,
}

impl GroupToggle {
    fn code(&self) -> &'static str {
        match self {
            GroupToggle::AutoModeration => "auto",
            GroupToggle::DeleteProfanity => "delete",
            GroupToggle::WarnOnProfanity => "warn",
            GroupToggle::MaxWarnings => "max",
        }
    }

    fn from_code(code: &str) -> Option<Self> {
        match code {
            "auto" => Some(GroupToggle::AutoModeration),
            "delete" => Some(GroupToggle::DeleteProfanity),
            "warn" => Some(GroupToggle::WarnOnProfanity),
            "max" => Some(GroupToggle::MaxWarnings),
            _ => None,
        }
    }
}

/// An inline keyboard button press, encoded in the callback data
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ButtonAction {
    Command(Command),
    PhotosDone,
    PhotoChoice(PhotoPurpose),
    OcrExtract,
    OcrExplain,
    OcrTranslateMenu,
    OcrTranslate(String),
    OcrBack,
    FollowUp(FollowUpAction),
    /// Show the whole last extracted text again
    ShowFullText,
    ExerciseNext,
    ExerciseAll,
    ExerciseClarify(u32),
    ExerciseResolve(u32),
    ExerciseShowAll,
    ExerciseFinish,
    EditAgain,
    GroupSetting { group_id: i64, toggle: GroupToggle },
}

impl ButtonAction {
    /// Callback data for this button
    pub fn data(&self) -> String {
        match self {
            ButtonAction::Command(command) => command.menu_data().unwrap_or("menu_main").to_string(),
            ButtonAction::PhotosDone => "photos_done".to_string(),
            ButtonAction::PhotoChoice(PhotoPurpose::MathSolve) => "photo_exercise".to_string(),
            ButtonAction::PhotoChoice(PhotoPurpose::Analyze) => "photo_ocr".to_string(),
            ButtonAction::PhotoChoice(PhotoPurpose::Edit) => "photo_edit".to_string(),
            ButtonAction::PhotoChoice(PhotoPurpose::Enhance) => "photo_enhance".to_string(),
            ButtonAction::OcrExtract => "ocr_extract".to_string(),
            ButtonAction::OcrExplain => "ocr_explain".to_string(),
            ButtonAction::OcrTranslateMenu => "ocr_translate".to_string(),
            ButtonAction::OcrTranslate(lang) => format!("ocr_lang_{lang}"),
            ButtonAction::OcrBack => "ocr_back".to_string(),
            ButtonAction::FollowUp(FollowUpAction::Explain) => "text_explain".to_string(),
            ButtonAction::FollowUp(FollowUpAction::Summarize) => "text_summarize".to_string(),
            ButtonAction::FollowUp(FollowUpAction::Search) => "text_search".to_string(),
            ButtonAction::FollowUp(FollowUpAction::Translate) => "text_translate".to_string(),
            ButtonAction::ShowFullText => "text_full".to_string(),
            ButtonAction::ExerciseNext => "ex_next".to_string(),
            ButtonAction::ExerciseAll => "ex_all".to_string(),
            ButtonAction::ExerciseClarify(index) => format!("ex_clarify_{index}"),
            ButtonAction::ExerciseResolve(index) => format!("ex_resolve_{index}"),
            ButtonAction::ExerciseShowAll => "ex_show_all".to_string(),
            ButtonAction::ExerciseFinish => "ex_finish".to_string(),
            ButtonAction::EditAgain => "edit_again".to_string(),
            ButtonAction::GroupSetting { group_id, toggle } => {
                format!("gs_{}_{}", toggle.code(), group_id)
            }
        }
    }

    pub fn parse(data: &str) -> Option<Self> {
        if let Some(command) = Command::from_menu_data(data) {
            return Some(ButtonAction::Command(command));
        }
        if let Some(lang) = data.strip_prefix("ocr_lang_") {
            return Some(ButtonAction::OcrTranslate(lang.to_string()));
        }
        if let Some(index) = data.strip_prefix("ex_clarify_") {
            return index.parse().ok().map(ButtonAction::ExerciseClarify);
        }
        if let Some(index) = data.strip_prefix("ex_resolve_") {
            return index.parse().ok().map(ButtonAction::ExerciseResolve);
        }
        if let Some(rest) = data.strip_prefix("gs_") {
            let (code, group) = rest.split_once('_')?;
            return Some(ButtonAction::GroupSetting {
                group_id: group.parse().ok()?,
                toggle: GroupToggle::from_code(code)?,
            });
        }

        let action = match data {
            "photos_done" => ButtonAction::PhotosDone,
            "photo_exercise" => ButtonAction::PhotoChoice(PhotoPurpose::MathSolve),
            "photo_ocr" => ButtonAction::PhotoChoice(PhotoPurpose::Analyze),
            "photo_edit" => ButtonAction::PhotoChoice(PhotoPurpose::Edit),
            "photo_enhance" => ButtonAction::PhotoChoice(PhotoPurpose::Enhance),
            "ocr_extract" => ButtonAction::OcrExtract,
            "ocr_explain" => ButtonAction::OcrExplain,
            "ocr_translate" => ButtonAction::OcrTranslateMenu,
            "ocr_back" => ButtonAction::OcrBack,
            "text_explain" => ButtonAction::FollowUp(FollowUpAction::Explain),
            "text_summarize" => ButtonAction::FollowUp(FollowUpAction::Summarize),
            "text_search" => ButtonAction::FollowUp(FollowUpAction::Search),
            "text_translate" => ButtonAction::FollowUp(FollowUpAction::Translate),
            "text_full" => ButtonAction::ShowFullText,
            "ex_next" => ButtonAction::ExerciseNext,
            "ex_all" => ButtonAction::ExerciseAll,
            "ex_show_all" => ButtonAction::ExerciseShowAll,
            "ex_finish" => ButtonAction::ExerciseFinish,
            "edit_again" => ButtonAction::EditAgain,
            _ => return None,
        };
        Some(action)
    }
}

/// An uploaded document, before it is downloaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentInfo {
    pub media: MediaRef,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    pub size: u32,
}

impl DocumentInfo {
    /// PDF, DOCX and plain-text documents within the size limit are accepted
    pub fn validate(&self) -> Result<DocumentFormat, ValidationFailure> {
        let format = DocumentFormat::from_upload(self.file_name.as_deref(), self.mime_type.as_deref())
            .ok_or(ValidationFailure::UnsupportedDocument)?;
        if self.size > MAX_DOCUMENT_SIZE {
            return Err(ValidationFailure::DocumentTooLarge);
        }
        Ok(format)
    }
}

/// One input of the state machine for a single session
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Command(Command),
    Text(String),
    Photo(MediaRef),
    Document(DocumentInfo),
    Button(ButtonAction),
    /// A remote job dispatched for `operation` finished
    Completed {
        operation: u64,
        job: Job,
        outcome: Outcome,
    },
}

impl Event {
    /// Events that implicitly cancel whatever the session was doing
    pub fn is_top_level(&self) -> bool {
        matches!(
            self,
            Event::Command(_) | Event::Button(ButtonAction::Command(_)) | Event::Document(_)
        )
    }
}
