//! `handleCancelCourse`/`handleStopRecurringCourse` (spec §4.7). A
//! recurring template can't be cancelled with a single implicit action —
//! the handler returns `RECURRING_CANCEL_OPTIONS` with the three choices
//! spec §7 lists and waits for a follow-up `ConfirmAction`/`ModifyAction`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use slog::Logger;

use crate::channels::DynTx;
use crate::context::ConversationContext;
use crate::dispatcher::{TaskHandler, TaskOutcome};
use crate::error::ResultCode;
use crate::reminders::manager::{CourseEvent, CourseEvents};
use crate::slots::Slots;
use crate::store::{CoursePatch, CourseStatus, CourseStore};

pub struct CancelCourseHandler {
    pub courses: Arc<dyn CourseStore>,
    pub reminder_events: Option<DynTx<CourseEvents>>,
    pub logger: Logger,
}

#[async_trait]
impl TaskHandler for CancelCourseHandler {
    async fn handle(&self, slots: &Slots, user_id: &str, _ctx: &ConversationContext) -> TaskOutcome {
        let (Some(student_name), Some(course_name)) = (&slots.student_name, &slots.course_name) else {
            return TaskOutcome::failure(ResultCode::MissingFields, "請告訴我要取消哪位學生的哪堂課");
        };

        let existing = match self
            .courses
            .find_course(user_id, student_name, course_name, slots.course_date.as_deref())
            .await
        {
            Ok(Some(course)) => course,
            Ok(None) => return TaskOutcome::failure(ResultCode::NotFound, "找不到符合的課程"),
            Err(_) => return TaskOutcome::failure(ResultCode::TempUnavailable, "暫時無法查詢課程，請稍後再試一次"),
        };
        let Some(id) = existing.id else {
            return TaskOutcome::failure(ResultCode::NotFound, "找不到符合的課程");
        };

        if existing.is_recurring {
            return TaskOutcome::failure(ResultCode::RecurringCancelOptions, "這是一堂重複的課，請問要怎麼取消？")
                .with_quick_reply(vec!["只取消今天".to_string(), "從明天開始取消".to_string(), "取消整個系列".to_string()])
                .with_data(json!({ "courseId": id.to_hex() }));
        }

        if let Err(err) = self
            .courses
            .update(
                &id,
                CoursePatch {
                    status: Some(CourseStatus::Cancelled),
                    cancelled: Some(true),
                    ..Default::default()
                },
            )
            .await
        {
            slog::error!(self.logger, "handlers.cancel_course.store_failed"; "err" => %err);
            return TaskOutcome::failure(ResultCode::FirebaseError, "取消課程時發生問題，請稍後再試一次");
        }

        if let Some(tx) = &self.reminder_events {
            let mut events = CourseEvents::new();
            events.push(CourseEvent::Cancelled(id));
            let _ = tx.send(events).await;
        }

        TaskOutcome::ok(ResultCode::CancelOk, format!("已經取消{}的{}了", student_name, course_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::InMemoryCourseStore;
    use crate::store::Course;
    use chrono::Utc;

    fn handler() -> CancelCourseHandler {
        CancelCourseHandler {
            courses: Arc::new(InMemoryCourseStore::default()),
            reminder_events: None,
            logger: slog::Logger::root(slog::Discard, slog::o!()),
        }
    }

    async fn seed(courses: &Arc<dyn CourseStore>, is_recurring: bool) {
        let now = Utc::now();
        courses
            .create(Course {
                id: None,
                user_id: "u1".to_string(),
                student_name: "小明".to_string(),
                course_name: "數學課".to_string(),
                course_date: "2999-01-01".to_string(),
                schedule_time: "14:00".to_string(),
                is_recurring,
                recurrence_type: is_recurring.then_some(crate::store::RecurrenceType::Weekly),
                day_of_week: None,
                location: None,
                teacher: None,
                status: crate::store::CourseStatus::Scheduled,
                cancelled: false,
                calendar_event_id: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
    }

    fn slots() -> Slots {
        Slots {
            student_name: Some("小明".to_string()),
            course_name: Some("數學課".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn single_course_cancels_directly() {
        let h = handler();
        seed(&h.courses, false).await;
        let outcome = h.handle(&slots(), "u1", &ConversationContext::empty("u1")).await;
        assert_eq!(outcome.code, Some(ResultCode::CancelOk));
    }

    #[tokio::test]
    async fn recurring_course_asks_for_scope() {
        let h = handler();
        seed(&h.courses, true).await;
        let outcome = h.handle(&slots(), "u1", &ConversationContext::empty("u1")).await;
        assert_eq!(outcome.code, Some(ResultCode::RecurringCancelOptions));
        assert_eq!(outcome.quick_reply.as_ref().map(Vec::len), Some(3));
    }
}
