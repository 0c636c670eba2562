//! SlotExtractor (spec §4.4). No repo in the pack extracts structured
//! slots from chat text; built fresh using `regex` (a new dependency — the
//! standard crate for this role) for the entity/time-token pass, and
//! `time_parser` for the date/time resolution the teacher's own
//! `parsing/pjatk/deduct.rs` already does for a different source format.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::context::ConversationContext;
use crate::llm_client::LLMClient;
use crate::nlu::Intent;
use crate::time_parser::{self, TimeInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum TimeReference {
    Today,
    Tomorrow,
    DayAfterTomorrow,
    Yesterday,
    ThisWeek,
    NextWeek,
    LastWeek,
}

/// Typed slot union, spec §3.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Slots {
    pub student_name: Option<String>,
    pub student_candidates: Vec<String>,
    pub course_name: Option<String>,
    pub schedule_time: Option<String>,
    pub course_date: Option<String>,
    pub time_reference: Option<TimeReference>,
    pub day_of_week: Vec<u8>,
    pub recurring: bool,
    pub recurrence_type: Option<crate::store::RecurrenceType>,
    pub location: Option<String>,
    pub teacher: Option<String>,
    pub content: Option<String>,
    pub reminder_time: Option<i64>,
    pub image_ref: Option<String>,
    /// Set when the text names an hour that failed to parse (spec §7
    /// `INVALID_TIME`, e.g. "25點") rather than no time at all.
    #[serde(default)]
    pub invalid_time_hint: bool,
    #[serde(skip)]
    pub time_info: Option<TimeInfo>,
}

fn re(pattern: &'static str, cell: &'static OnceLock<Regex>) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static slot pattern is valid"))
}

macro_rules! static_regex {
    ($name:ident, $pattern:literal) => {
        fn $name() -> &'static Regex {
            static CELL: OnceLock<Regex> = OnceLock::new();
            re($pattern, &CELL)
        }
    };
}

static_regex!(student_pattern, r"([\p{Han}]{2,4}?)(?:的|明天|今天|後天|昨天|要上|有)");
static_regex!(course_pattern, r"(數學|英文|物理|化學|生物|國文|歷史|地理|鋼琴|音樂|美術|游泳|體育|晨練)課?");
static_regex!(location_pattern, r"在([\p{Han}]{2,6}?)(?:上課|教室|上)");
static_regex!(teacher_pattern, r"([\p{Han}]{2,4})老師");
static_regex!(day_of_week_pattern, r"每週([一二三四五六日天])");
static_regex!(reminder_minutes_pattern, r"提前(\d+)分鐘");
static_regex!(hour_token_pattern, r"(\d{1,2})\s*(?:點|:|時)");

/// Leading intent/safety verbs and filler pronouns stripped before the
/// student-name scan so the lazy `student_pattern` capture can't swallow
/// them (e.g. "取消小明的晨練課" must not yield `student_name = "取消小明"`).
const ACTION_VERB_TOKENS: [&str; 13] = [
    "取消", "刪除", "刪掉", "提醒", "查詢", "新增", "設定", "記錄", "安排", "修改", "更改", "確認", "我",
];

fn strip_action_tokens(text: &str) -> String {
    let mut cleaned = text.to_string();
    for token in ACTION_VERB_TOKENS {
        cleaned = cleaned.replace(token, "");
    }
    cleaned
}

/// True when the text names an hour `time_parser` couldn't turn into a
/// `schedule_time` (spec §7 `INVALID_TIME` vs. plain "no time mentioned").
fn has_invalid_hour_token(text: &str) -> bool {
    hour_token_pattern().captures_iter(text).any(|c| {
        c.get(1)
            .and_then(|m| m.as_str().parse::<u8>().ok())
            .map(|hour| hour > 23)
            .unwrap_or(false)
    })
}

fn weekday_token_to_index(token: &str) -> Option<u8> {
    match token {
        "一" => Some(1),
        "二" => Some(2),
        "三" => Some(3),
        "四" => Some(4),
        "五" => Some(5),
        "六" => Some(6),
        "日" | "天" => Some(0),
        _ => None,
    }
}

/// Unified entity pass: student, course, location, teacher, raw time
/// tokens, plus recurrence detection. All matches best-effort; nothing
/// here panics or propagates an error (spec §4.4: "failures surface as
/// partial slots").
fn run_entity_pass(text: &str, slots: &mut Slots, enable_recurring_courses: bool) {
    let name_scan_text = strip_action_tokens(text);
    if let Some(captures) = student_pattern().captures(&name_scan_text) {
        slots.student_name = captures.get(1).map(|m| m.as_str().to_string());
    }
    if let Some(captures) = course_pattern().captures(text) {
        slots.course_name = captures.get(0).map(|m| m.as_str().to_string());
    }
    if let Some(captures) = location_pattern().captures(text) {
        slots.location = captures.get(1).map(|m| m.as_str().to_string());
    }
    if let Some(captures) = teacher_pattern().captures(text) {
        slots.teacher = captures.get(1).map(|m| m.as_str().to_string());
    }
    if let Some(minutes) = reminder_minutes_pattern()
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<i64>().ok())
    {
        slots.reminder_time = Some(minutes);
    }

    if text.contains("每天") || text.contains("每日") {
        if enable_recurring_courses {
            slots.recurring = true;
            slots.recurrence_type = Some(crate::store::RecurrenceType::Daily);
        }
    } else if text.contains("每週") || text.contains("每周") || text.contains("每星期") || text.contains("每个星期")
    {
        slots.recurring = true;
        slots.recurrence_type = Some(crate::store::RecurrenceType::Weekly);
        if let Some(day) = day_of_week_pattern()
            .captures(text)
            .and_then(|c| c.get(1))
            .and_then(|m| weekday_token_to_index(m.as_str()))
        {
            slots.day_of_week = vec![day];
        }
    } else if text.contains("每月") {
        slots.recurring = true;
        slots.recurrence_type = Some(crate::store::RecurrenceType::Monthly);
    }
}

fn time_reference_token(text: &str) -> Option<TimeReference> {
    if text.contains("後天") {
        Some(TimeReference::DayAfterTomorrow)
    } else if text.contains("明天") || text.contains("明日") {
        Some(TimeReference::Tomorrow)
    } else if text.contains("前天") {
        None
    } else if text.contains("昨天") || text.contains("昨日") {
        Some(TimeReference::Yesterday)
    } else if text.contains("下週") || text.contains("下周") {
        Some(TimeReference::NextWeek)
    } else if text.contains("上週") || text.contains("上周") {
        Some(TimeReference::LastWeek)
    } else if text.contains("這週") || text.contains("本週") {
        Some(TimeReference::ThisWeek)
    } else if text.contains("今天") || text.contains("今日") {
        Some(TimeReference::Today)
    } else {
        None
    }
}

/// `context_confidence`: heuristic field-coverage score used to decide
/// whether the LLM slot-enhancement pass is worth calling (spec §4.4).
pub fn context_confidence(slots: &Slots, intent: Intent) -> f64 {
    let present = |flag: bool| if flag { 1.0 } else { 0.0 };
    let (have, total): (f64, f64) = match intent {
        Intent::AddCourse | Intent::CreateRecurringCourse => (
            present(slots.student_name.is_some())
                + present(slots.course_name.is_some())
                + present(slots.schedule_time.is_some() || slots.course_date.is_some()),
            3.0,
        ),
        Intent::QuerySchedule => (
            present(slots.student_name.is_some())
                + present(slots.course_name.is_some())
                + present(slots.course_date.is_some()),
            3.0,
        ),
        Intent::RecordContent => (
            present(slots.student_name.is_some()) + present(slots.course_name.is_some()),
            2.0,
        ),
        _ => (present(slots.student_name.is_some() || slots.course_name.is_some()), 1.0),
    };
    have / total
}

/// `isCompleteForIntent(slots, intent)`, spec §4.4.
pub fn is_complete_for_intent(slots: &Slots, intent: Intent) -> bool {
    match intent {
        Intent::AddCourse | Intent::CreateRecurringCourse => {
            slots.student_name.is_some()
                && slots.course_name.is_some()
                && (slots.schedule_time.is_some()
                    || (slots.course_date.is_some() && !slots.day_of_week.is_empty()))
        }
        Intent::QuerySchedule => {
            slots.student_name.is_some() || slots.course_name.is_some() || slots.course_date.is_some()
        }
        Intent::RecordContent => slots.student_name.is_some() && slots.course_name.is_some(),
        _ => {
            slots.student_name.is_some()
                || slots.course_name.is_some()
                || slots.course_date.is_some()
                || slots.content.is_some()
        }
    }
}

/// Missing-field names for `MISSING_FIELDS` results (spec §4.7).
pub fn missing_fields_for(slots: &Slots, intent: Intent) -> Vec<String> {
    let mut missing = Vec::new();
    match intent {
        Intent::AddCourse | Intent::CreateRecurringCourse => {
            if slots.student_name.is_none() {
                missing.push("student_name".to_string());
            }
            if slots.course_name.is_none() {
                missing.push("course_name".to_string());
            }
            if slots.schedule_time.is_none() && slots.course_date.is_none() {
                missing.push("schedule_time".to_string());
            }
        }
        Intent::RecordContent => {
            if slots.student_name.is_none() {
                missing.push("student_name".to_string());
            }
            if slots.course_name.is_none() {
                missing.push("course_name".to_string());
            }
        }
        _ => {}
    }
    missing
}

/// `missing_fields_for`'s field names mapped to the documented
/// `expectingInput` tags (spec §3: `student_name_input`,
/// `course_name_input`, `schedule_time_input`, …).
pub fn missing_field_input_tags(slots: &Slots, intent: Intent) -> Vec<String> {
    missing_fields_for(slots, intent)
        .into_iter()
        .map(|field| format!("{field}_input"))
        .collect()
}

/// Merges an LLM-assisted enhancement, or a prior turn's pending slots,
/// over existing slots. Never replaces a field that is already populated —
/// spec §4.4's "merge the result over slots (never replace wholesale)",
/// reused by the NLU supplement-routing check (spec §4.3 step 2) to fold
/// `pendingData.slots` back in.
pub(crate) fn merge_over(slots: &mut Slots, enhancement: Slots) {
    if slots.student_name.is_none() {
        slots.student_name = enhancement.student_name;
    }
    if slots.course_name.is_none() {
        slots.course_name = enhancement.course_name;
    }
    if slots.schedule_time.is_none() {
        slots.schedule_time = enhancement.schedule_time;
    }
    if slots.course_date.is_none() {
        slots.course_date = enhancement.course_date;
    }
    if slots.location.is_none() {
        slots.location = enhancement.location;
    }
    if slots.teacher.is_none() {
        slots.teacher = enhancement.teacher;
    }
    if slots.content.is_none() {
        slots.content = enhancement.content;
    }
    if slots.reminder_time.is_none() {
        slots.reminder_time = enhancement.reminder_time;
    }
    if slots.student_candidates.is_empty() {
        slots.student_candidates = enhancement.student_candidates;
    }
}

pub struct SlotExtractor<'a> {
    pub llm_client: Option<&'a dyn LLMClient>,
    pub enable_ai_fallback: bool,
    pub enable_recurring_courses: bool,
    pub timezone: chrono_tz::Tz,
}

impl<'a> SlotExtractor<'a> {
    /// The rule/regex pass only: entity pass, recurrence detection, and
    /// `time_parser` resolution, with no context lookup or LLM call. Used
    /// by `extract` itself and, standalone, by `NLUPipeline`'s supplement-
    /// routing completeness check (spec §4.3 step 2), which needs a rule-
    /// based read of the slots before a `SlotExtractor` is even built.
    pub(crate) fn rule_based_slots(
        text: &str,
        timezone: chrono_tz::Tz,
        reference_time: chrono::DateTime<chrono_tz::Tz>,
        enable_recurring_courses: bool,
    ) -> Slots {
        let mut slots = Slots::default();
        run_entity_pass(text, &mut slots, enable_recurring_courses);
        slots.time_reference = time_reference_token(text);

        if let Ok(parsed) = time_parser::parse(text, reference_time, timezone) {
            let info = time_parser::create_time_info(parsed);
            slots.course_date = Some(info.date.clone());
            if time_parser::parse_time_component(text).is_some() {
                slots.schedule_time = Some(format!("{:02}:{:02}", parsed.hour_and_minute().0, parsed.hour_and_minute().1));
            }
            slots.time_info = Some(info);
        }

        if slots.schedule_time.is_none() && has_invalid_hour_token(text) {
            slots.invalid_time_hint = true;
        }

        slots
    }

    /// `extract(text, intent, userId, context) -> slots`, spec §4.4.
    pub async fn extract(
        &self,
        text: &str,
        intent: Intent,
        _user_id: &str,
        context: &ConversationContext,
        reference_time: chrono::DateTime<chrono_tz::Tz>,
    ) -> Slots {
        let mut slots = Self::rule_based_slots(text, self.timezone, reference_time, self.enable_recurring_courses);

        if matches!(intent, Intent::QuerySchedule) && slots.student_name.is_none() {
            for mentioned in context.mentioned_entities.students.iter().rev().take(3) {
                if text.contains(mentioned.as_str()) {
                    slots.student_name = Some(mentioned.clone());
                    break;
                }
            }
        }

        let confidence = context_confidence(&slots, intent);
        if confidence < 0.5 && self.enable_ai_fallback {
            if let Some(client) = self.llm_client {
                if let Ok(enhancement) = client.extract_slots(text, intent, &slots).await {
                    merge_over(&mut slots, enhancement);
                }
            }
        }

        if matches!(intent, Intent::QuerySchedule) && slots.student_candidates.len() > 1 {
            slots.student_name = None;
        }

        slots
    }
}

trait HourMinute {
    fn hour_and_minute(&self) -> (u32, u32);
}

impl HourMinute for chrono::DateTime<chrono_tz::Tz> {
    fn hour_and_minute(&self) -> (u32, u32) {
        use chrono::Timelike;
        (self.hour(), self.minute())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn empty_context() -> ConversationContext {
        ConversationContext::empty("u1")
    }

    fn reference() -> chrono::DateTime<chrono_tz::Tz> {
        time_parser::DEFAULT_TIMEZONE
            .with_ymd_and_hms(2025, 8, 10, 9, 0, 0)
            .unwrap()
    }

    #[tokio::test]
    async fn extracts_student_course_and_time() {
        let extractor = SlotExtractor {
            llm_client: None,
            enable_ai_fallback: false,
            enable_recurring_courses: true,
            timezone: time_parser::DEFAULT_TIMEZONE,
        };
        let slots = extractor
            .extract(
                "小明明天下午2點要上數學課",
                Intent::AddCourse,
                "u1",
                &empty_context(),
                reference(),
            )
            .await;
        assert_eq!(slots.student_name.as_deref(), Some("小明"));
        assert_eq!(slots.course_name.as_deref(), Some("數學課"));
        assert_eq!(slots.schedule_time.as_deref(), Some("14:00"));
        assert_eq!(slots.course_date.as_deref(), Some("2025-08-11"));
    }

    #[test]
    fn is_complete_requires_student_course_and_time_for_add() {
        let mut slots = Slots::default();
        assert!(!is_complete_for_intent(&slots, Intent::AddCourse));
        slots.student_name = Some("小明".to_string());
        slots.course_name = Some("數學課".to_string());
        slots.schedule_time = Some("14:00".to_string());
        assert!(is_complete_for_intent(&slots, Intent::AddCourse));
    }

    #[test]
    fn query_schedule_complete_with_any_single_field() {
        let mut slots = Slots::default();
        slots.course_date = Some("2025-08-11".to_string());
        assert!(is_complete_for_intent(&slots, Intent::QuerySchedule));
    }

    #[tokio::test]
    async fn flags_an_hour_that_time_parser_could_not_accept() {
        let extractor = SlotExtractor {
            llm_client: None,
            enable_ai_fallback: false,
            enable_recurring_courses: true,
            timezone: time_parser::DEFAULT_TIMEZONE,
        };
        let slots = extractor
            .extract(
                "小明明天25點上數學課",
                Intent::AddCourse,
                "u1",
                &empty_context(),
                reference(),
            )
            .await;
        assert!(slots.invalid_time_hint);
        assert!(slots.schedule_time.is_none());
    }

    #[test]
    fn merge_over_never_overwrites_existing_fields() {
        let mut slots = Slots {
            student_name: Some("小明".to_string()),
            ..Default::default()
        };
        let enhancement = Slots {
            student_name: Some("小華".to_string()),
            course_name: Some("英文課".to_string()),
            ..Default::default()
        };
        merge_over(&mut slots, enhancement);
        assert_eq!(slots.student_name.as_deref(), Some("小明"));
        assert_eq!(slots.course_name.as_deref(), Some("英文課"));
    }

    #[tokio::test]
    async fn cancel_course_name_does_not_swallow_the_leading_verb() {
        // spec §8 scenario 4: "取消小明的晨練課" must extract student_name =
        // "小明", not "取消小明".
        let extractor = SlotExtractor {
            llm_client: None,
            enable_ai_fallback: false,
            enable_recurring_courses: true,
            timezone: time_parser::DEFAULT_TIMEZONE,
        };
        let slots = extractor
            .extract("取消小明的晨練課", Intent::CancelCourse, "u1", &empty_context(), reference())
            .await;
        assert_eq!(slots.student_name.as_deref(), Some("小明"));
    }

    #[tokio::test]
    async fn reminder_course_name_does_not_swallow_the_leading_verb_and_pronoun() {
        // spec §8 scenario 5: "提醒我小明的物理課" must extract student_name
        // = "小明", not "醒我小明" (the defect this regresses against).
        let extractor = SlotExtractor {
            llm_client: None,
            enable_ai_fallback: false,
            enable_recurring_courses: true,
            timezone: time_parser::DEFAULT_TIMEZONE,
        };
        let slots = extractor
            .extract("提醒我小明的物理課", Intent::SetReminder, "u1", &empty_context(), reference())
            .await;
        assert_eq!(slots.student_name.as_deref(), Some("小明"));
    }
}
