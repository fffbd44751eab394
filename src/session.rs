//! Per-user interaction state.
//!
//! A [`SessionState`] records what one `(user, chat)` pair is in the middle of:
//! the pending operation, photos collected so far, an exercise-solving flow and
//! the last extracted text. The accessors keep the at-most-one-pending-operation
//! invariant; the state machine in `bot::machine` is the only writer.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::MAX_COLLECTED_MEDIA;
use crate::errors::ValidationFailure;

/// A media reference the remote capabilities can fetch (a file URL)
pub type MediaRef = String;

/// Identifies one independent interaction stream
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub user_id: i64,
    pub chat_id: i64,
}

impl SessionKey {
    pub fn new(user_id: i64, chat_id: i64) -> Self {
        Self { user_id, chat_id }
    }

    pub fn is_group(&self) -> bool {
        self.chat_id < 0
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.user_id, self.chat_id)
    }
}

/// What an awaited photo will be used for
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhotoPurpose {
    Edit,
    Analyze,
    Enhance,
    MathSolve,
}

impl PhotoPurpose {
    /// Purposes that batch several photos before a "done" signal
    pub fn collects_batch(&self) -> bool {
        matches!(self, PhotoPurpose::Edit | PhotoPurpose::Analyze)
    }
}

/// Free-text prompts the bot waits for after a menu button
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromptKind {
    Search,
    Code,
    ImageGenerate,
    VideoGenerate,
    Equation,
    BookSearch,
}

/// Admin actions that need a target user id
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdminAction {
    Ban,
    Unban,
    Mute,
    Unmute,
    /// Move the user to the premium quota tier
    GrantPremium,
    RevokePremium,
}

/// The single operation a session is waiting on
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum PendingOperation {
    #[default]
    None,
    AwaitingPhotoFor(PhotoPurpose),
    CollectingPhotos(PhotoPurpose),
    /// A photo arrived with no command; the user picks what to do with it
    AwaitingPhotoChoice(MediaRef),
    AwaitingEditDescription(MediaRef),
    AwaitingMultiEditDescription(Vec<MediaRef>),
    AwaitingOcrChoice(Vec<MediaRef>),
    AwaitingPrompt(PromptKind),
    AwaitingAdminTargetId(AdminAction),
    AwaitingBroadcastBody,
    /// A photo to animate arrived after `/video`; the motion prompt comes next
    AwaitingVideoPrompt(MediaRef),
    /// Extracted text without explicit questions; the user says what to do with it
    AwaitingFreeformInstruction,
    ExerciseFlow,
}

/// One solved exercise of an exercise flow
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SolvedExercise {
    pub index: u32,
    pub extraction: String,
    pub solution: String,
}

/// Progress through the exercises found in one OCR'd image
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExerciseSession {
    pub original_text: String,
    pub analysis: String,
    pub exercise_count: u32,
    pub has_questions: bool,
    current_index: u32,
    solved: Vec<SolvedExercise>,
}

impl ExerciseSession {
    pub fn new(original_text: String, analysis: String, exercise_count: u32, has_questions: bool) -> Self {
        Self {
            original_text,
            analysis,
            exercise_count: exercise_count.max(1),
            has_questions,
            current_index: 0,
            solved: Vec::new(),
        }
    }

    pub fn current_index(&self) -> u32 {
        self.current_index
    }

    /// Index the next `solve_next` will work on
    pub fn next_index(&self) -> u32 {
        self.current_index + 1
    }

    /// Advance to the next exercise and store its result
    ///
    /// Returns the index the result was recorded under.
    pub fn record_next(&mut self, extraction: String, solution: String) -> u32 {
        self.current_index += 1;
        self.solved.push(SolvedExercise {
            index: self.current_index,
            extraction,
            solution,
        });
        self.current_index
    }

    pub fn solved(&self) -> &[SolvedExercise] {
        &self.solved
    }

    pub fn find(&self, index: u32) -> Option<&SolvedExercise> {
        self.solved.iter().find(|s| s.index == index)
    }

    pub fn is_complete(&self) -> bool {
        self.current_index >= self.exercise_count
    }
}

/// Everything a session remembers between events
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pending: PendingOperation,
    collected_media: Vec<MediaRef>,
    exercise: Option<ExerciseSession>,
    last_extracted_text: Option<String>,
    /// Output of the last edit/enhance, kept for "edit again"
    last_result: Option<MediaRef>,
    /// Operation id of the remote job whose result the session still accepts
    in_flight: Option<u64>,
}

impl SessionState {
    pub fn pending(&self) -> &PendingOperation {
        &self.pending
    }

    pub fn is_idle(&self) -> bool {
        self.pending == PendingOperation::None
    }

    /// Replace the pending operation
    ///
    /// Buffers tied to the previous operation (collected photos, edit result) are
    /// dropped; the exercise flow and the last extracted text survive.
    pub fn set_pending(&mut self, operation: PendingOperation) {
        self.collected_media.clear();
        self.last_result = None;
        self.pending = operation;
    }

    /// Start collecting for `purpose` with the first photo
    pub fn start_collecting(&mut self, purpose: PhotoPurpose, first: MediaRef) {
        self.set_pending(PendingOperation::CollectingPhotos(purpose));
        self.collected_media.push(first);
    }

    /// Append a photo to the batch; photos past the limit are dropped
    ///
    /// Returns the batch size after the call.
    pub fn push_media(&mut self, media: MediaRef) -> usize {
        if self.collected_media.len() < MAX_COLLECTED_MEDIA {
            self.collected_media.push(media);
        }
        self.collected_media.len()
    }

    pub fn collected_media(&self) -> &[MediaRef] {
        &self.collected_media
    }

    pub fn take_media(&mut self) -> Vec<MediaRef> {
        std::mem::take(&mut self.collected_media)
    }

    pub fn exercise(&self) -> Option<&ExerciseSession> {
        self.exercise.as_ref()
    }

    pub fn exercise_mut(&mut self) -> Option<&mut ExerciseSession> {
        self.exercise.as_mut()
    }

    pub fn set_exercise(&mut self, exercise: Option<ExerciseSession>) {
        self.exercise = exercise;
    }

    pub fn last_extracted_text(&self) -> Option<&str> {
        self.last_extracted_text.as_deref()
    }

    pub fn set_extracted_text(&mut self, text: String) {
        self.last_extracted_text = Some(text);
    }

    pub fn last_result(&self) -> Option<&str> {
        self.last_result.as_deref()
    }

    pub fn set_last_result(&mut self, url: Option<MediaRef>) {
        self.last_result = url;
    }

    /// Mark `operation` as the only remote job whose result is still wanted
    pub fn begin_operation(&mut self, operation: u64) {
        self.in_flight = Some(operation);
    }

    pub fn in_flight(&self) -> Option<u64> {
        self.in_flight
    }

    /// Consume the in-flight marker if it matches `operation`
    ///
    /// `false` means the result belongs to a cancelled or superseded operation.
    pub fn complete_operation(&mut self, operation: u64) -> bool {
        if self.in_flight == Some(operation) {
            self.in_flight = None;
            true
        } else {
            false
        }
    }

    /// Drop everything back to Idle
    pub fn cancel(&mut self) {
        *self = SessionState::default();
    }

    /// Nothing worth keeping in the map
    pub fn is_empty(&self) -> bool {
        *self == SessionState::default()
    }
}

/// In-memory map of all live sessions
///
/// Owned by the interaction controller behind a single mutex; sessions are created
/// lazily and dropped once they return to an empty Idle state.
#[derive(Debug, Default)]
pub struct SessionMap {
    sessions: HashMap<SessionKey, SessionState>,
}

impl SessionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return the session for `key`, or a fresh one
    pub fn take(&mut self, key: &SessionKey) -> SessionState {
        self.sessions.remove(key).unwrap_or_default()
    }

    /// Store the session back; empty sessions are not kept
    pub fn put(&mut self, key: SessionKey, state: SessionState) {
        if state.is_empty() {
            self.sessions.remove(&key);
        } else {
            self.sessions.insert(key, state);
        }
    }

    pub fn get(&self, key: &SessionKey) -> Option<&SessionState> {
        self.sessions.get(key)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Validate a free-text prompt
pub fn validate_prompt(text: &str) -> Result<String, ValidationFailure> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ValidationFailure::EmptyPrompt);
    }
    Ok(trimmed.to_string())
}

/// Validate an equation before asking the text capability to solve it
pub fn validate_equation(text: &str) -> Result<String, ValidationFailure> {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.chars().count() > 500 {
        return Err(ValidationFailure::InvalidEquation);
    }

    let mut depth: i32 = 0;
    for c in trimmed.chars() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => {
                depth -= 1;
                if depth < 0 {
                    return Err(ValidationFailure::InvalidEquation);
                }
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(ValidationFailure::InvalidEquation);
    }

    let has_operand = trimmed
        .chars()
        .any(|c| c.is_ascii_digit() || c.is_ascii_alphabetic());
    if !has_operand {
        return Err(ValidationFailure::InvalidEquation);
    }

    Ok(trimmed.to_string())
}

/// Parse the numeric user id an admin typed
pub fn parse_user_id(text: &str) -> Result<i64, ValidationFailure> {
    text.trim()
        .parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or(ValidationFailure::InvalidUserId)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_validation() {
        assert!(validate_prompt("draw a cat").is_ok());
        assert_eq!(validate_prompt("  x  ").unwrap(), "x");
        assert_eq!(validate_prompt("   "), Err(ValidationFailure::EmptyPrompt));
    }

    #[test]
    fn test_equation_validation() {
        assert!(validate_equation("2x + 3 = 7").is_ok());
        assert!(validate_equation("(x+1)*(x-1) = 0").is_ok());
        assert_eq!(validate_equation("(x+1 = 2"), Err(ValidationFailure::InvalidEquation));
        assert_eq!(validate_equation(")x("), Err(ValidationFailure::InvalidEquation));
        assert_eq!(validate_equation("+ = -"), Err(ValidationFailure::InvalidEquation));
        assert_eq!(validate_equation(&"1".repeat(501)), Err(ValidationFailure::InvalidEquation));
    }

    #[test]
    fn test_parse_user_id() {
        assert_eq!(parse_user_id(" 12345 "), Ok(12345));
        assert_eq!(parse_user_id("abc"), Err(ValidationFailure::InvalidUserId));
        assert_eq!(parse_user_id("-5"), Err(ValidationFailure::InvalidUserId));
    }

    #[test]
    fn test_set_pending_drops_batch_but_keeps_exercise() {
        let mut state = SessionState::default();
        state.set_exercise(Some(ExerciseSession::new("t".into(), "a".into(), 2, true)));
        state.start_collecting(PhotoPurpose::Edit, "u1".into());
        state.set_last_result(Some("r".into()));

        state.set_pending(PendingOperation::AwaitingBroadcastBody);

        assert!(state.collected_media().is_empty());
        assert!(state.last_result().is_none());
        assert!(state.exercise().is_some());
    }

    #[test]
    fn test_operation_guard() {
        let mut state = SessionState::default();
        state.begin_operation(7);
        assert!(!state.complete_operation(6));
        assert!(state.complete_operation(7));
        assert!(!state.complete_operation(7));
    }

    #[test]
    fn test_session_map_drops_empty_sessions() {
        let mut map = SessionMap::new();
        let key = SessionKey::new(1, 1);

        let mut state = map.take(&key);
        state.set_pending(PendingOperation::AwaitingBroadcastBody);
        map.put(key, state);
        assert_eq!(map.len(), 1);

        let mut state = map.take(&key);
        state.cancel();
        map.put(key, state);
        assert!(map.is_empty());
    }
}
