//! UI Builder module for creating keyboards and splitting long messages

use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

use crate::bot::effects::ChoiceMenu;
use crate::bot::events::{ButtonAction, Command, FollowUpAction, GroupToggle};
use crate::bot::prompts::TRANSLATION_LANGUAGES;
use crate::localization::{t_args_lang, t_lang};
use crate::session::{AdminAction, PhotoPurpose, PromptKind};
use crate::store::GroupSettings;

fn button(label: String, action: ButtonAction) -> InlineKeyboardButton {
    InlineKeyboardButton::callback(label, action.data())
}

fn command(label: String, command: Command) -> InlineKeyboardButton {
    button(label, ButtonAction::Command(command))
}

fn flag(enabled: bool) -> &'static str {
    if enabled {
        "✅"
    } else {
        "❌"
    }
}

/// Rows of `(label key, action)` pairs rendered in the user's language
fn rows(language: &str, layout: &[&[(&str, ButtonAction)]]) -> Vec<Vec<InlineKeyboardButton>> {
    layout.iter()
        .map(|row| {
            row.iter()
                .map(|(key, action)| button(t_lang(key, Some(language)), action.clone()))
                .collect()
        })
        .collect()
}

fn main_menu_row(language: &str) -> Vec<InlineKeyboardButton> {
    vec![command(t_lang("btn-main-menu", Some(language)), Command::Start)]
}

fn cancel_row(language: &str) -> Vec<InlineKeyboardButton> {
    vec![command(t_lang("btn-cancel", Some(language)), Command::Cancel)]
}

/// Build the inline keyboard for `menu`
pub fn keyboard(menu: &ChoiceMenu, language: &str) -> InlineKeyboardMarkup {
    let lang = Some(language);
    let buttons = match menu {
        ChoiceMenu::Main { admin } => {
            let mut buttons = rows(
                language,
                &[
                    &[
                        ("btn-edit", ButtonAction::Command(Command::RequestPhoto(PhotoPurpose::Edit))),
                        ("btn-analyze", ButtonAction::Command(Command::RequestPhoto(PhotoPurpose::Analyze))),
                    ],
                    &[
                        ("btn-enhance", ButtonAction::Command(Command::RequestPhoto(PhotoPurpose::Enhance))),
                        ("btn-exercise", ButtonAction::Command(Command::RequestPhoto(PhotoPurpose::MathSolve))),
                    ],
                    &[
                        ("btn-search", ButtonAction::Command(Command::Prompt(PromptKind::Search, None))),
                        ("btn-code", ButtonAction::Command(Command::Prompt(PromptKind::Code, None))),
                    ],
                    &[
                        ("btn-image", ButtonAction::Command(Command::Prompt(PromptKind::ImageGenerate, None))),
                        ("btn-video", ButtonAction::Command(Command::Prompt(PromptKind::VideoGenerate, None))),
                    ],
                    &[
                        ("btn-equation", ButtonAction::Command(Command::Prompt(PromptKind::Equation, None))),
                        ("btn-books", ButtonAction::Command(Command::Prompt(PromptKind::BookSearch, None))),
                    ],
                    &[("btn-help", ButtonAction::Command(Command::Help))],
                ],
            );
            if *admin {
                buttons.push(vec![command(t_lang("btn-admin", lang), Command::AdminPanel)]);
            }
            buttons
        }
        ChoiceMenu::BackToMenu => vec![main_menu_row(language)],
        ChoiceMenu::CancelOnly => vec![cancel_row(language)],
        ChoiceMenu::CollectingPhotos { count } => {
            let n = count.to_string();
            vec![
                vec![button(
                    t_args_lang("btn-done", &[("count", &n)], lang),
                    ButtonAction::PhotosDone,
                )],
                cancel_row(language),
            ]
        }
        ChoiceMenu::PhotoChoice => {
            let mut buttons = rows(
                language,
                &[
                    &[
                        ("btn-exercise", ButtonAction::PhotoChoice(PhotoPurpose::MathSolve)),
                        ("btn-analyze", ButtonAction::PhotoChoice(PhotoPurpose::Analyze)),
                    ],
                    &[
                        ("btn-edit", ButtonAction::PhotoChoice(PhotoPurpose::Edit)),
                        ("btn-enhance", ButtonAction::PhotoChoice(PhotoPurpose::Enhance)),
                    ],
                ],
            );
            buttons.push(cancel_row(language));
            buttons
        }
        ChoiceMenu::OcrOptions => {
            let mut buttons = rows(
                language,
                &[
                    &[("btn-ocr-extract", ButtonAction::OcrExtract)],
                    &[("btn-ocr-explain", ButtonAction::OcrExplain)],
                    &[("btn-ocr-translate", ButtonAction::OcrTranslateMenu)],
                ],
            );
            buttons.push(cancel_row(language));
            buttons
        }
        ChoiceMenu::TranslateLanguages => {
            let mut buttons: Vec<Vec<InlineKeyboardButton>> = TRANSLATION_LANGUAGES
                .chunks(3)
                .map(|chunk| {
                    chunk
                        .iter()
                        .map(|(code, name)| {
                            button(name.to_string(), ButtonAction::OcrTranslate(code.to_string()))
                        })
                        .collect()
                })
                .collect();
            buttons.push(vec![button(t_lang("btn-back", lang), ButtonAction::OcrBack)]);
            buttons
        }
        ChoiceMenu::FollowUp => {
            let mut buttons = rows(
                language,
                &[
                    &[
                        ("btn-explain", ButtonAction::FollowUp(FollowUpAction::Explain)),
                        ("btn-summarize", ButtonAction::FollowUp(FollowUpAction::Summarize)),
                    ],
                    &[
                        ("btn-search", ButtonAction::FollowUp(FollowUpAction::Search)),
                        ("btn-translate", ButtonAction::FollowUp(FollowUpAction::Translate)),
                    ],
                    &[("btn-show-full", ButtonAction::ShowFullText)],
                ],
            );
            buttons.push(main_menu_row(language));
            buttons
        }
        ChoiceMenu::ExerciseStart => {
            let mut buttons = rows(
                language,
                &[
                    &[("btn-next-exercise", ButtonAction::ExerciseNext)],
                    &[("btn-solve-all", ButtonAction::ExerciseAll)],
                ],
            );
            buttons.push(cancel_row(language));
            buttons
        }
        ChoiceMenu::ExerciseStep { index } | ChoiceMenu::ExerciseRevisited { index } => rows(
            language,
            &[
                &[
                    ("btn-next-exercise", ButtonAction::ExerciseNext),
                    ("btn-solve-all", ButtonAction::ExerciseAll),
                ],
                &[
                    ("btn-clarify", ButtonAction::ExerciseClarify(*index)),
                    ("btn-resolve", ButtonAction::ExerciseResolve(*index)),
                ],
                &[
                    ("btn-show-all", ButtonAction::ExerciseShowAll),
                    ("btn-finish", ButtonAction::ExerciseFinish),
                ],
            ],
        ),
        ChoiceMenu::ExerciseSummary => rows(
            language,
            &[&[
                ("btn-next-exercise", ButtonAction::ExerciseNext),
                ("btn-finish", ButtonAction::ExerciseFinish),
            ]],
        ),
        ChoiceMenu::ExerciseDone => vec![
            vec![command(
                t_lang("btn-new-exercise", lang),
                Command::RequestPhoto(PhotoPurpose::MathSolve),
            )],
            main_menu_row(language),
        ],
        ChoiceMenu::EditResult => vec![
            vec![button(t_lang("btn-edit-again", lang), ButtonAction::EditAgain)],
            vec![command(
                t_lang("btn-new-edit", lang),
                Command::RequestPhoto(PhotoPurpose::Edit),
            )],
            main_menu_row(language),
        ],
        ChoiceMenu::EnhanceResult => vec![
            vec![command(
                t_lang("btn-enhance-another", lang),
                Command::RequestPhoto(PhotoPurpose::Enhance),
            )],
            main_menu_row(language),
        ],
        ChoiceMenu::Failure { retry } => {
            let mut buttons = Vec::new();
            if let Some(action) = retry {
                buttons.push(vec![button(t_lang("btn-retry", lang), action.clone())]);
            }
            buttons.push(main_menu_row(language));
            buttons
        }
        ChoiceMenu::AdminPanel => {
            let mut buttons = rows(
                language,
                &[
                    &[("btn-stats", ButtonAction::Command(Command::AdminStats))],
                    &[
                        ("btn-ban", ButtonAction::Command(Command::Admin(AdminAction::Ban))),
                        ("btn-unban", ButtonAction::Command(Command::Admin(AdminAction::Unban))),
                    ],
                    &[
                        ("btn-mute", ButtonAction::Command(Command::Admin(AdminAction::Mute))),
                        ("btn-unmute", ButtonAction::Command(Command::Admin(AdminAction::Unmute))),
                    ],
                    &[
                        ("btn-premium", ButtonAction::Command(Command::Admin(AdminAction::GrantPremium))),
                        ("btn-unpremium", ButtonAction::Command(Command::Admin(AdminAction::RevokePremium))),
                    ],
                    &[("btn-broadcast", ButtonAction::Command(Command::Broadcast))],
                ],
            );
            buttons.push(main_menu_row(language));
            buttons
        }
        ChoiceMenu::GroupSettings { group_id, settings } => {
            group_settings_rows(*group_id, settings, language)
        }
    };

    InlineKeyboardMarkup::new(buttons)
}

fn group_settings_rows(group_id: i64, settings: &GroupSettings, language: &str) -> Vec<Vec<InlineKeyboardButton>> {
    let lang = Some(language);
    let toggle = |label: String, toggle: GroupToggle| {
        vec![button(label, ButtonAction::GroupSetting { group_id, toggle })]
    };
    let max = settings.max_warnings.to_string();

    vec![
        toggle(
            format!("{} {}", flag(settings.auto_moderation), t_lang("gs-auto-moderation", lang)),
            GroupToggle::AutoModeration,
        ),
        toggle(
            format!("{} {}", flag(settings.delete_profanity), t_lang("gs-delete-profanity", lang)),
            GroupToggle::DeleteProfanity,
        ),
        toggle(
            format!("{} {}", flag(settings.warn_on_profanity), t_lang("gs-warn-on-profanity", lang)),
            GroupToggle::WarnOnProfanity,
        ),
        toggle(
            t_args_lang("gs-max-warnings", &[("count", &max)], lang),
            GroupToggle::MaxWarnings,
        ),
    ]
}

/// Split `text` into chunks of at most `max_chars` characters
///
/// Chunks break on the last newline that fits when there is one, so paragraphs
/// stay whole where possible.
pub fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    if text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        let limit = remaining
            .char_indices()
            .nth(max_chars)
            .map(|(i, _)| i)
            .unwrap_or(remaining.len());
        if limit == remaining.len() {
            chunks.push(remaining.to_string());
            break;
        }

        let split_at = match remaining[..limit].rfind('\n') {
            Some(newline) if newline > 0 => newline + 1,
            _ => limit,
        };
        let (chunk, rest) = remaining.split_at(split_at);
        chunks.push(chunk.to_string());
        remaining = rest;
    }
    chunks
}
