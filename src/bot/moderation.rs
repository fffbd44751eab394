//! Group moderation: profanity screening with warnings and bans, and the
//! per-group settings view.

use chrono::Utc;
use tracing::{info, warn};

use crate::bot::effects::ChoiceMenu;
use crate::bot::events::GroupToggle;
use crate::bot::messenger::{MembershipStatus, MessageRef};
use crate::bot::BotState;
use crate::localization::{t_args_lang, t_lang};
use crate::remote::moderation::classify;
use crate::store::{GroupSettings, ProfanityDetection};

const MAX_WARNING_STEPS: &[u32] = &[3, 5, 10];

/// Flip one setting; the warning threshold cycles through 3, 5 and 10
pub fn apply_toggle(mut settings: GroupSettings, toggle: GroupToggle) -> GroupSettings {
    match toggle {
        GroupToggle::AutoModeration => settings.auto_moderation = !settings.auto_moderation,
        GroupToggle::DeleteProfanity => settings.delete_profanity = !settings.delete_profanity,
        GroupToggle::WarnOnProfanity => settings.warn_on_profanity = !settings.warn_on_profanity,
        GroupToggle::MaxWarnings => {
            settings.max_warnings = MAX_WARNING_STEPS
                .iter()
                .copied()
                .find(|step| *step > settings.max_warnings)
                .unwrap_or(MAX_WARNING_STEPS[0]);
        }
    }
    settings
}

/// Screen one group message; returns true when it was profane and handled here
pub async fn moderate_group_message(
    state: &BotState,
    group_id: i64,
    user_id: i64,
    display_name: &str,
    text: &str,
    message: MessageRef,
    language: &str,
) -> bool {
    let settings = state.store.group_settings(group_id).await;
    if !settings.auto_moderation || text.chars().count() < state.config.moderation.min_text_len {
        return false;
    }
    if state.config.is_admin(user_id) || state.store.is_group_admin(user_id, group_id).await {
        return false;
    }

    let verdict = classify(&state.catalog.classifier, text).await;
    if !verdict.is_profane {
        return false;
    }
    info!(
        group_id,
        user_id,
        category = %verdict.category,
        severity = %verdict.severity,
        "Profanity detected"
    );

    let mut actions = Vec::new();
    if settings.delete_profanity {
        match state.messenger.delete_message(group_id, message).await {
            Ok(()) => actions.push("deleted"),
            Err(e) => warn!(group_id, error = %e, "Could not delete profane message"),
        }
    }

    if settings.warn_on_profanity {
        let max = match settings.max_warnings {
            0 => state.config.moderation.default_max_warnings,
            n => n,
        };
        let reason = format!("Profanity: {}", verdict.category);
        let count = state.store.add_warning(user_id, group_id, &reason, 0).await;

        if count >= max {
            match state.messenger.ban_member(group_id, user_id).await {
                Ok(()) => {
                    state.store.clear_warnings(user_id, group_id).await;
                    actions.push("banned");
                    let notice = t_args_lang("moderation-banned", &[("name", display_name)], Some(language));
                    state.controller.notify(group_id, &notice, None, language).await;
                }
                Err(e) => warn!(group_id, user_id, error = %e, "Ban after warnings failed"),
            }
        } else {
            actions.push("warned");
            let (count, max) = (count.to_string(), max.to_string());
            let notice = t_args_lang(
                "moderation-warning",
                &[("name", display_name), ("count", &count), ("max", &max)],
                Some(language),
            );
            state.controller.notify(group_id, &notice, None, language).await;
        }
    }

    state
        .store
        .log_profanity(ProfanityDetection {
            user_id,
            group_id,
            message_text: text.to_string(),
            detected_words: verdict.detected_words.join(", "),
            action_taken: actions.join(","),
            detected_at: Utc::now(),
        })
        .await;
    true
}

/// Bot admins and admins of the group
///
/// The platform answer is cached in the store, which answers alone when the
/// platform lookup fails.
pub async fn can_manage_group(state: &BotState, group_id: i64, user_id: i64) -> bool {
    if state.config.is_admin(user_id) {
        return true;
    }
    match state.messenger.membership(&group_id.to_string(), user_id).await {
        MembershipStatus::Administrator => {
            state.store.add_group_admin(group_id, user_id, 0).await;
            true
        }
        MembershipStatus::Member | MembershipStatus::NotMember => {
            state.store.remove_group_admin(group_id, user_id).await;
            false
        }
        MembershipStatus::Unknown => state.store.is_group_admin(user_id, group_id).await,
    }
}

/// Render the settings view for `/settings` in a group
pub async fn show_group_settings(state: &BotState, group_id: i64, group_name: &str, user_id: i64, language: &str) {
    if !can_manage_group(state, group_id, user_id).await {
        let notice = t_lang("group-admins-only", Some(language));
        state.controller.notify(group_id, &notice, None, language).await;
        return;
    }

    state.store.add_group(group_id, group_name).await;
    let settings = state.store.group_settings(group_id).await;
    let menu = ChoiceMenu::GroupSettings { group_id, settings };
    let title = t_lang("group-settings-title", Some(language));
    state.controller.notify(group_id, &title, Some(&menu), language).await;
}

/// Apply a settings button and re-render the view in place
pub async fn toggle_group_setting(
    state: &BotState,
    group_id: i64,
    user_id: i64,
    toggle: GroupToggle,
    message: MessageRef,
    language: &str,
) -> bool {
    if !can_manage_group(state, group_id, user_id).await {
        return false;
    }

    let settings = apply_toggle(state.store.group_settings(group_id).await, toggle);
    state.store.update_group_settings(group_id, settings).await;
    info!(group_id, user_id, ?toggle, "Group setting changed");

    let menu = ChoiceMenu::GroupSettings { group_id, settings };
    let title = t_lang("group-settings-title", Some(language));
    if let Err(e) = state
        .messenger
        .edit_text(group_id, message, &title, Some(&menu), language)
        .await
    {
        warn!(group_id, error = %e, "Could not refresh the settings view");
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_flips_flags() {
        let settings = GroupSettings::default();
        let toggled = apply_toggle(settings, GroupToggle::DeleteProfanity);
        assert!(!toggled.delete_profanity);
        assert_eq!(toggled.auto_moderation, settings.auto_moderation);
        assert!(apply_toggle(toggled, GroupToggle::DeleteProfanity).delete_profanity);
    }

    #[test]
    fn test_max_warnings_cycles() {
        let mut settings = GroupSettings::default();
        let mut seen = Vec::new();
        for _ in 0..4 {
            settings = apply_toggle(settings, GroupToggle::MaxWarnings);
            seen.push(settings.max_warnings);
        }
        assert_eq!(seen, vec![5, 10, 3, 5]);

        settings.max_warnings = 7;
        assert_eq!(apply_toggle(settings, GroupToggle::MaxWarnings).max_warnings, 10);
    }
}
