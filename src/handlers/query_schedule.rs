//! `handleQuerySchedule` (spec §4.7). Expands recurring templates across
//! the resolved date range — daily and weekly only; a monthly template is
//! skipped the same way `handleAddCourse` refuses to create one (spec §9).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Datelike, Duration, NaiveDate, Utc};

use crate::context::ConversationContext;
use crate::dispatcher::{TaskHandler, TaskOutcome};
use crate::error::ResultCode;
use crate::handlers::{course_names_match, HandlerConfig};
use crate::slots::{Slots, TimeReference};
use crate::store::{Course, CourseRange, CourseStore, RecurrenceType};

pub struct QueryScheduleHandler {
    pub courses: Arc<dyn CourseStore>,
    pub config: HandlerConfig,
}

fn monday_of(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

fn resolve_range(slots: &Slots, today: NaiveDate) -> (NaiveDate, NaiveDate) {
    if let Some(date) = slots.course_date.as_deref().and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()) {
        return (date, date);
    }
    match slots.time_reference {
        Some(TimeReference::Today) => (today, today),
        Some(TimeReference::Tomorrow) => (today + Duration::days(1), today + Duration::days(1)),
        Some(TimeReference::DayAfterTomorrow) => (today + Duration::days(2), today + Duration::days(2)),
        Some(TimeReference::Yesterday) => (today - Duration::days(1), today - Duration::days(1)),
        Some(TimeReference::ThisWeek) => {
            let start = monday_of(today);
            (start, start + Duration::days(6))
        }
        Some(TimeReference::NextWeek) => {
            let start = monday_of(today) + Duration::days(7);
            (start, start + Duration::days(6))
        }
        Some(TimeReference::LastWeek) => {
            let start = monday_of(today) - Duration::days(7);
            (start, start + Duration::days(6))
        }
        None => (today, today + Duration::days(6)),
    }
}

fn expand_occurrences(template: &Course, from: NaiveDate, to: NaiveDate) -> Vec<Course> {
    let mut occurrences = Vec::new();
    let mut day = from;
    while day <= to {
        let matches = match template.recurrence_type {
            Some(RecurrenceType::Daily) => true,
            Some(RecurrenceType::Weekly) => template
                .day_of_week
                .as_deref()
                .map(|days| days.contains(&(day.weekday().num_days_from_sunday() as u8)))
                .unwrap_or(false),
            _ => false,
        };
        if matches {
            let mut occurrence = template.clone();
            occurrence.course_date = day.format("%Y-%m-%d").to_string();
            occurrences.push(occurrence);
        }
        day += Duration::days(1);
    }
    occurrences
}

#[async_trait]
impl TaskHandler for QueryScheduleHandler {
    async fn handle(&self, slots: &Slots, user_id: &str, _ctx: &ConversationContext) -> TaskOutcome {
        // spec §4.4 `isCompleteForIntent`: query_schedule is complete with
        // any one of studentName / courseName / courseDate, not studentName
        // alone — a course-name-only or date-only query still runs, just
        // across every student (rendered as "所有學生" when empty).
        if slots.student_name.is_none() && slots.course_name.is_none() && slots.course_date.is_none() {
            return TaskOutcome::failure(ResultCode::MissingFields, "請告訴我是哪位學生的課表");
        }

        let today = Utc::now().with_timezone(&self.config.timezone).date_naive();
        let (from, to) = resolve_range(slots, today);
        let from_s = from.format("%Y-%m-%d").to_string();
        let to_s = to.format("%Y-%m-%d").to_string();
        let range = Some(CourseRange { from: Some(from_s.clone()), to: Some(to_s.clone()) });

        let all = match &slots.student_name {
            Some(student_name) => self.courses.get_courses_by_student(user_id, student_name, None).await,
            None => self.courses.get_courses_for_range(user_id, range).await,
        };
        let all = match all {
            Ok(rows) => rows,
            Err(_) => return TaskOutcome::failure(ResultCode::TempUnavailable, "暫時無法查詢課表，請稍後再試一次"),
        };

        let mut occurrences: Vec<Course> = all
            .iter()
            .filter(|c| !c.is_recurring)
            .filter(|c| c.course_date.as_str() >= from_s.as_str() && c.course_date.as_str() <= to_s.as_str())
            .cloned()
            .collect();

        for template in all.iter().filter(|c| c.is_recurring) {
            occurrences.extend(expand_occurrences(template, from, to));
        }

        if let Some(course_name) = &slots.course_name {
            occurrences.retain(|c| course_names_match(&c.course_name, course_name));
        }

        occurrences.sort_by(|a, b| (a.course_date.as_str(), a.schedule_time.as_str()).cmp(&(b.course_date.as_str(), b.schedule_time.as_str())));
        occurrences.dedup_by(|a, b| a.course_date == b.course_date && a.schedule_time == b.schedule_time && a.course_name == b.course_name);

        if occurrences.is_empty() {
            return TaskOutcome::ok(ResultCode::QueryOkEmpty, String::new());
        }

        let lines: Vec<String> = occurrences
            .iter()
            .map(|c| match &slots.student_name {
                Some(_) => format!("{} {} {}", c.course_date, c.schedule_time, c.course_name),
                None => format!("{} {} {} {}", c.course_date, c.schedule_time, c.student_name, c.course_name),
            })
            .collect();
        let heading = slots.student_name.as_deref().unwrap_or("所有學生");
        TaskOutcome::ok(
            ResultCode::QueryOk,
            format!("📅 {}的課表\n{}", heading, lines.join("\n")),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::InMemoryCourseStore;
    use crate::store::CourseStatus;
    use chrono::Utc;

    fn handler() -> QueryScheduleHandler {
        QueryScheduleHandler {
            courses: Arc::new(InMemoryCourseStore::default()),
            config: HandlerConfig::default(),
        }
    }

    #[tokio::test]
    async fn empty_schedule_reports_query_ok_empty() {
        let h = handler();
        let slots = Slots {
            student_name: Some("小明".to_string()),
            time_reference: Some(TimeReference::Today),
            ..Default::default()
        };
        let outcome = h.handle(&slots, "u1", &ConversationContext::empty("u1")).await;
        assert_eq!(outcome.code, Some(ResultCode::QueryOkEmpty));
    }

    #[tokio::test]
    async fn weekly_template_expands_into_matching_weekday() {
        let h = handler();
        let now = Utc::now();
        let today = now.with_timezone(&h.config.timezone).date_naive();
        h.courses
            .create(Course {
                id: None,
                user_id: "u1".to_string(),
                student_name: "小明".to_string(),
                course_name: "鋼琴課".to_string(),
                course_date: today.format("%Y-%m-%d").to_string(),
                schedule_time: "15:00".to_string(),
                is_recurring: true,
                recurrence_type: Some(RecurrenceType::Weekly),
                day_of_week: Some(vec![today.weekday().num_days_from_sunday() as u8]),
                location: None,
                teacher: None,
                status: CourseStatus::Scheduled,
                cancelled: false,
                calendar_event_id: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();

        let slots = Slots {
            student_name: Some("小明".to_string()),
            time_reference: Some(TimeReference::ThisWeek),
            ..Default::default()
        };
        let outcome = h.handle(&slots, "u1", &ConversationContext::empty("u1")).await;
        assert_eq!(outcome.code, Some(ResultCode::QueryOk));
    }

    #[tokio::test]
    async fn course_name_only_query_runs_across_all_students() {
        let h = handler();
        let now = Utc::now();
        let today = now.with_timezone(&h.config.timezone).date_naive();
        h.courses
            .create(Course {
                id: None,
                user_id: "u1".to_string(),
                student_name: "小華".to_string(),
                course_name: "數學課".to_string(),
                course_date: today.format("%Y-%m-%d").to_string(),
                schedule_time: "09:00".to_string(),
                is_recurring: false,
                recurrence_type: None,
                day_of_week: None,
                location: None,
                teacher: None,
                status: CourseStatus::Scheduled,
                cancelled: false,
                calendar_event_id: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();

        // No studentName at all — isCompleteForIntent is satisfied by
        // courseName alone, spec §4.4.
        let slots = Slots {
            course_name: Some("數學課".to_string()),
            time_reference: Some(TimeReference::Today),
            ..Default::default()
        };
        let outcome = h.handle(&slots, "u1", &ConversationContext::empty("u1")).await;
        assert_eq!(outcome.code, Some(ResultCode::QueryOk));
        assert!(outcome.message.unwrap().contains("小華"));
    }
}
