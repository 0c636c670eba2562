//! Renderer (spec §4.8): turns a `TaskOutcome` into the text/quick-reply
//! pair that actually goes out over LINE. Template lookup goes through
//! `rust_i18n`'s locale files (`locales/zh-TW.yml`, `locales/en.yml`) the
//! same way the teacher keeps user-facing copy out of the handler code —
//! it just has none of this crate's conversational surface to localize.

use crate::db::Language;
use crate::dispatcher::TaskOutcome;
use crate::error::ResultCode;
use crate::messaging::{OutboundMessage, QuickReply, QuickReplyItem};
use crate::nlu::Intent;
use crate::slots::{Slots, TimeReference};

pub struct RenderedMessage {
    pub text: String,
    pub quick_reply: Option<QuickReply>,
}

impl RenderedMessage {
    pub fn to_outbound(&self) -> OutboundMessage {
        OutboundMessage {
            text: self.text.clone(),
            quick_reply: self.quick_reply.clone(),
        }
    }
}

fn date_description(time_reference: Option<TimeReference>) -> &'static str {
    match time_reference {
        Some(TimeReference::Today) => "今天",
        Some(TimeReference::Tomorrow) => "明天",
        Some(TimeReference::DayAfterTomorrow) => "後天",
        Some(TimeReference::Yesterday) => "昨天",
        Some(TimeReference::ThisWeek) => "本週",
        Some(TimeReference::NextWeek) => "下週",
        Some(TimeReference::LastWeek) => "上週",
        None => "",
    }
}

/// Code-keyed fallback used only when a handler left `message` empty —
/// in practice every handler in this crate sets one, so this mostly
/// covers future handlers and the dispatcher's own unmapped-intent path.
fn template_for_code(code: ResultCode, locale: &str) -> String {
    use rust_i18n::t;
    match code {
        ResultCode::MissingFields => t!("result.missing_fields", locale = locale).to_string(),
        ResultCode::NotFound => t!("result.not_found", locale = locale).to_string(),
        ResultCode::TimeConflict => t!("result.time_conflict", locale = locale).to_string(),
        ResultCode::InvalidTime => t!("result.invalid_time", locale = locale).to_string(),
        ResultCode::InvalidPastTime => t!("result.invalid_past_time", locale = locale).to_string(),
        ResultCode::PastReminderTime => t!("result.past_reminder_time", locale = locale).to_string(),
        ResultCode::RecurringCancelOptions => t!("result.recurring_cancel_options", locale = locale).to_string(),
        ResultCode::FeatureUnderDevelopment => t!("result.feature_under_development", locale = locale).to_string(),
        ResultCode::NotImplementedMonthly => t!("result.not_implemented_monthly", locale = locale).to_string(),
        ResultCode::UnknownHelp => t!("result.unknown_help", locale = locale).to_string(),
        ResultCode::TempUnavailable => t!("result.temp_unavailable", locale = locale).to_string(),
        ResultCode::FirebaseError => t!("result.firebase_error", locale = locale).to_string(),
        _ => t!("result.generic_ok", locale = locale).to_string(),
    }
}

/// Quick-reply mapping table, spec §4.8.
fn default_quick_reply(intent: Intent) -> Option<Vec<String>> {
    match intent {
        Intent::AddCourse
        | Intent::CreateRecurringCourse
        | Intent::SetReminder
        | Intent::RecordContent
        | Intent::AddCourseContent => Some(vec!["確認".to_string(), "取消操作".to_string()]),
        Intent::CancelCourse | Intent::StopRecurringCourse => {
            Some(vec!["確認刪除".to_string(), "取消操作".to_string()])
        }
        _ => None,
    }
}

pub struct Renderer;

impl Renderer {
    pub fn render(intent: Intent, slots: &Slots, outcome: &TaskOutcome, locale: &str) -> RenderedMessage {
        let text = if matches!(intent, Intent::QuerySchedule) && outcome.code == Some(ResultCode::QueryOkEmpty) {
            let student = slots.student_name.clone().unwrap_or_else(|| "所有學生".to_string());
            let date_desc = date_description(slots.time_reference);
            format!(
                "📅 {student}{date_desc}的課表\n沒有安排課程\n\n你可以說「小明明天下午2點要上數學課」來新增課程。"
            )
        } else if let Some(message) = outcome.message.as_ref().filter(|m| !m.is_empty()) {
            message.clone()
        } else {
            match outcome.code {
                Some(code) => template_for_code(code, locale),
                None => template_for_code(ResultCode::UnknownHelp, locale),
            }
        };

        let quick_reply = outcome
            .quick_reply
            .clone()
            .or_else(|| default_quick_reply(intent))
            .map(|labels| {
                QuickReply::new(
                    labels
                        .into_iter()
                        .map(|label| QuickReplyItem { text: label.clone(), label })
                        .collect(),
                )
            });

        RenderedMessage { text, quick_reply }
    }
}

pub fn locale_for(language: Language) -> &'static str {
    language.code()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_query_schedule_uses_fixed_empty_template() {
        let outcome = TaskOutcome::ok(ResultCode::QueryOkEmpty, String::new());
        let slots = Slots {
            student_name: Some("小明".to_string()),
            time_reference: Some(TimeReference::Tomorrow),
            ..Default::default()
        };
        let rendered = Renderer::render(Intent::QuerySchedule, &slots, &outcome, "zh-TW");
        assert!(rendered.text.contains("小明"));
        assert!(rendered.text.contains("明天"));
        assert!(rendered.text.contains("沒有安排課程"));
    }

    #[test]
    fn add_course_success_gets_confirm_quick_reply() {
        let outcome = TaskOutcome::ok(ResultCode::AddCourseOk, "已經安排好了");
        let rendered = Renderer::render(Intent::AddCourse, &Slots::default(), &outcome, "zh-TW");
        assert_eq!(rendered.text, "已經安排好了");
        let items = rendered.quick_reply.unwrap().items;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].label, "確認");
    }

    #[test]
    fn recurring_cancel_options_overrides_default_quick_reply() {
        let outcome = TaskOutcome::ok(ResultCode::RecurringCancelOptions, "怎麼取消？")
            .with_quick_reply(vec!["只取消今天".to_string(), "從明天開始取消".to_string(), "取消整個系列".to_string()]);
        let rendered = Renderer::render(Intent::CancelCourse, &Slots::default(), &outcome, "zh-TW");
        assert_eq!(rendered.quick_reply.unwrap().items.len(), 3);
    }

    #[test]
    fn unknown_intent_has_no_quick_reply() {
        let outcome = TaskOutcome::failure(ResultCode::UnknownHelp, "看不懂");
        let rendered = Renderer::render(Intent::Unknown, &Slots::default(), &outcome, "zh-TW");
        assert!(rendered.quick_reply.is_none());
    }
}
