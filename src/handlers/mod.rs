//! Task handlers (spec §4.7): one struct per domain operation, each
//! implementing `dispatcher::TaskHandler`. None of these propagate an
//! error past their own body — a store failure becomes a
//! `ResultCode::TempUnavailable`/`FirebaseError` outcome, the same
//! "errors never escape a handler" discipline the teacher's
//! `bot::handlers` module follows for Telegram command handlers.

pub mod action_verb;
pub mod add_course;
pub mod cancel_course;
pub mod confirm_action;
pub mod modify_course;
pub mod query_schedule;
pub mod record_content;
pub mod set_reminder;
pub mod unknown;

use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};

/// Feature-flag/timezone snapshot handlers are built with. A snapshot
/// rather than a live `Arc<ConfigRegistry>` keeps handler unit tests free
/// of a figment-backed config fixture.
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    pub enable_recurring_courses: bool,
    pub strict_record_requires_course: bool,
    pub default_reminder_minutes: i64,
    pub timezone: chrono_tz::Tz,
}

#[cfg(test)]
impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            enable_recurring_courses: true,
            strict_record_requires_course: false,
            default_reminder_minutes: 30,
            timezone: crate::time_parser::DEFAULT_TIMEZONE,
        }
    }
}

/// `course_date` (`YYYY-MM-DD`) + `schedule_time` (`HH:MM`) in the past
/// relative to now, spec §7 `INVALID_PAST_TIME`.
pub fn is_in_past(course_date: &str, schedule_time: &str, timezone: chrono_tz::Tz) -> bool {
    let Some(date) = NaiveDate::parse_from_str(course_date, "%Y-%m-%d").ok() else {
        return false;
    };
    let Some(time) = NaiveTime::parse_from_str(schedule_time, "%H:%M").ok() else {
        return false;
    };
    let Some(local) = timezone.from_local_datetime(&date.and_time(time)).single() else {
        return false;
    };
    local.with_timezone(&Utc) < Utc::now()
}

fn normalize_course_name(name: &str) -> &str {
    name.trim_end_matches('課')
}

/// Bidirectional containment after stripping a trailing "課" so "數學" and
/// "數學課" refer to the same course, spec §4.4's course-name matching note.
pub fn course_names_match(a: &str, b: &str) -> bool {
    let (a, b) = (normalize_course_name(a), normalize_course_name(b));
    a == b || a.contains(b) || b.contains(a)
}

/// Maps a stored `last_actions` intent tag back to the success code its
/// original handler would have returned, for `handleConfirmAction`'s
/// generic acknowledgement (spec §4.7).
pub fn success_code_for_intent_tag(tag: &str) -> crate::error::ResultCode {
    use crate::error::ResultCode;
    match tag {
        "add_course" | "create_recurring_course" => ResultCode::AddCourseOk,
        "modify_course" => ResultCode::ModifyOk,
        "cancel_course" | "stop_recurring_course" => ResultCode::CancelOk,
        _ => ResultCode::QueryOk,
    }
}
