//! `handleAddCourse` (spec §4.7). Also backs `create_recurring_course`: a
//! recurring request is the same write with `is_recurring`/`recurrence_type`
//! set, except monthly recurrence (spec §9's open question, resolved as
//! "not implemented").

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use slog::Logger;

use crate::calendar::CalendarSync;
use crate::channels::DynTx;
use crate::context::{recurrence_allowed, ConversationContext};
use crate::dispatcher::{TaskHandler, TaskOutcome};
use crate::error::ResultCode;
use crate::handlers::{is_in_past, HandlerConfig};
use crate::nlu::Intent;
use crate::reminders::manager::CourseEvents;
use crate::slots::{self, Slots};
use crate::store::{Course, CoursePatch, CourseStatus, CourseStore, RecurrenceType};

pub struct AddCourseHandler {
    pub courses: Arc<dyn CourseStore>,
    pub calendar: Arc<dyn CalendarSync>,
    pub reminder_events: Option<DynTx<CourseEvents>>,
    pub config: HandlerConfig,
    pub logger: Logger,
}

#[async_trait]
impl TaskHandler for AddCourseHandler {
    async fn handle(&self, slots: &Slots, user_id: &str, _ctx: &ConversationContext) -> TaskOutcome {
        // An hour that failed to parse (e.g. "25點") must surface as
        // INVALID_TIME even when that leaves `scheduleTime` absent and the
        // request would otherwise look incomplete — the user did name a
        // time, it just wasn't a valid one.
        if slots.invalid_time_hint {
            return TaskOutcome::failure(ResultCode::InvalidTime, "看不懂這個時間，麻煩再說一次幾點");
        }

        if !slots::is_complete_for_intent(slots, Intent::AddCourse) {
            let missing = slots::missing_fields_for(slots, Intent::AddCourse);
            return TaskOutcome::failure(ResultCode::MissingFields, "還缺少一些資訊，麻煩再補充一下")
                .with_data(json!({ "missingFields": missing }));
        }

        let Some(course_date) = slots.course_date.clone() else {
            return TaskOutcome::failure(ResultCode::InvalidTime, "看不懂這個時間，麻煩再說一次幾點");
        };
        let schedule_time = slots.schedule_time.clone().unwrap_or_else(|| "00:00".to_string());

        if is_in_past(&course_date, &schedule_time, self.config.timezone) {
            return TaskOutcome::failure(ResultCode::InvalidPastTime, "這個時間已經過去了，麻煩提供未來的時間");
        }

        if slots.recurring {
            if let Some(recurrence_type) = slots.recurrence_type {
                if !recurrence_allowed(recurrence_type, self.config.enable_recurring_courses) {
                    return TaskOutcome::failure(ResultCode::FeatureUnderDevelopment, "週期性課程功能目前尚未開放");
                }
                if recurrence_type == RecurrenceType::Monthly {
                    return TaskOutcome::failure(ResultCode::NotImplementedMonthly, "每月重複的課程目前還不支援，麻煩先用單次或每週安排");
                }
            }
        }

        match self
            .courses
            .check_time_conflicts(user_id, &course_date, &schedule_time, None)
            .await
        {
            Ok(conflicts) if !conflicts.is_empty() => {
                return TaskOutcome::failure(ResultCode::TimeConflict, "這個時間已經安排了其他課程了")
                    .with_data(json!({ "conflicts": conflicts.len() }));
            }
            Err(_) => {
                return TaskOutcome::failure(ResultCode::TempUnavailable, "暫時無法確認時間是否衝突，請稍後再試一次");
            }
            _ => {}
        }

        let now = Utc::now();
        let course = Course {
            id: None,
            user_id: user_id.to_string(),
            student_name: slots.student_name.clone().unwrap(),
            course_name: slots.course_name.clone().unwrap(),
            course_date,
            schedule_time,
            is_recurring: slots.recurring,
            recurrence_type: slots.recurrence_type,
            day_of_week: if slots.day_of_week.is_empty() { None } else { Some(slots.day_of_week.clone()) },
            location: slots.location.clone(),
            teacher: slots.teacher.clone(),
            status: CourseStatus::Scheduled,
            cancelled: false,
            calendar_event_id: None,
            created_at: now,
            updated_at: now,
        };

        let created = match self.courses.create(course).await {
            Ok(course) => course,
            Err(err) => {
                slog::error!(self.logger, "handlers.add_course.store_failed"; "err" => %err);
                return TaskOutcome::failure(ResultCode::FirebaseError, "儲存課程時發生問題，請稍後再試一次");
            }
        };

        if let (Ok(event_id), Some(id)) = (self.calendar.create_event(&created).await, created.id) {
            let _ = self
                .courses
                .update(
                    &id,
                    CoursePatch {
                        calendar_event_id: Some(event_id),
                        ..Default::default()
                    },
                )
                .await;
        }

        if let Some(tx) = &self.reminder_events {
            let mut events = CourseEvents::new();
            events.push(crate::reminders::manager::CourseEvent::Rescheduled(created.clone()));
            let _ = tx.send(events).await;
        }

        slog::info!(self.logger, "handlers.add_course.ok"; "user_id" => user_id);
        TaskOutcome::ok(
            ResultCode::AddCourseOk,
            format!(
                "已經幫{}安排好{}了，時間是 {} {}",
                created.student_name, created.course_name, created.course_date, created.schedule_time
            ),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::NullCalendarSync;
    use crate::store::test_support::InMemoryCourseStore;

    fn logger() -> Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    fn handler() -> AddCourseHandler {
        AddCourseHandler {
            courses: Arc::new(InMemoryCourseStore::default()),
            calendar: Arc::new(NullCalendarSync),
            reminder_events: None,
            config: HandlerConfig::default(),
            logger: logger(),
        }
    }

    fn complete_slots() -> Slots {
        Slots {
            student_name: Some("小明".to_string()),
            course_name: Some("數學課".to_string()),
            course_date: Some("2999-01-01".to_string()),
            schedule_time: Some("14:00".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn missing_fields_rejected() {
        let outcome = handler()
            .handle(&Slots::default(), "u1", &ConversationContext::empty("u1"))
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.code, Some(ResultCode::MissingFields));
    }

    #[tokio::test]
    async fn past_time_rejected() {
        let mut slots = complete_slots();
        slots.course_date = Some("2000-01-01".to_string());
        let outcome = handler().handle(&slots, "u1", &ConversationContext::empty("u1")).await;
        assert_eq!(outcome.code, Some(ResultCode::InvalidPastTime));
    }

    #[tokio::test]
    async fn complete_future_course_succeeds() {
        let outcome = handler()
            .handle(&complete_slots(), "u1", &ConversationContext::empty("u1"))
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.code, Some(ResultCode::AddCourseOk));
    }

    #[tokio::test]
    async fn conflicting_time_rejected() {
        let h = handler();
        h.handle(&complete_slots(), "u1", &ConversationContext::empty("u1")).await;
        let mut dup = complete_slots();
        dup.course_name = Some("英文課".to_string());
        let outcome = h.handle(&dup, "u1", &ConversationContext::empty("u1")).await;
        assert_eq!(outcome.code, Some(ResultCode::TimeConflict));
    }

    #[tokio::test]
    async fn invalid_hour_token_wins_over_missing_fields() {
        // "小明明天25點上數學課": student/course present, but 25點 is out of
        // range so scheduleTime never resolves. Must report INVALID_TIME,
        // not MISSING_FIELDS, per spec scenario 6.
        let mut slots = complete_slots();
        slots.schedule_time = None;
        slots.invalid_time_hint = true;
        let outcome = handler().handle(&slots, "u1", &ConversationContext::empty("u1")).await;
        assert_eq!(outcome.code, Some(ResultCode::InvalidTime));
    }

    #[tokio::test]
    async fn monthly_recurrence_not_implemented() {
        let mut slots = complete_slots();
        slots.recurring = true;
        slots.recurrence_type = Some(RecurrenceType::Monthly);
        let outcome = handler().handle(&slots, "u1", &ConversationContext::empty("u1")).await;
        assert_eq!(outcome.code, Some(ResultCode::NotImplementedMonthly));
    }
}
