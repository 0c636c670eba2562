//! `handleSetReminder` (spec §4.7): requires an existing course, rejects
//! an offset that would already have fired, defaults to
//! `DEFAULT_REMINDER_MINUTES` when the utterance didn't name one.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use slog::Logger;

use crate::context::ConversationContext;
use crate::dispatcher::{TaskHandler, TaskOutcome};
use crate::error::ResultCode;
use crate::handlers::HandlerConfig;
use crate::reminders::{Reminder, ReminderStore};
use crate::slots::Slots;
use crate::store::CourseStore;

pub struct SetReminderHandler {
    pub courses: Arc<dyn CourseStore>,
    pub reminders: Arc<dyn ReminderStore>,
    pub config: HandlerConfig,
    pub logger: Logger,
}

#[async_trait]
impl TaskHandler for SetReminderHandler {
    async fn handle(&self, slots: &Slots, user_id: &str, _ctx: &ConversationContext) -> TaskOutcome {
        let (Some(student_name), Some(course_name)) = (&slots.student_name, &slots.course_name) else {
            return TaskOutcome::failure(ResultCode::MissingFields, "請告訴我要提醒哪位學生的哪堂課");
        };

        let course = match self
            .courses
            .find_course(user_id, student_name, course_name, slots.course_date.as_deref())
            .await
        {
            Ok(Some(course)) => course,
            Ok(None) => return TaskOutcome::failure(ResultCode::NotFound, "找不到符合的課程"),
            Err(_) => return TaskOutcome::failure(ResultCode::TempUnavailable, "暫時無法查詢課程，請稍後再試一次"),
        };
        let Some(course_id) = course.id else {
            return TaskOutcome::failure(ResultCode::NotFound, "找不到符合的課程");
        };

        let offset_minutes = slots.reminder_time.unwrap_or(self.config.default_reminder_minutes);

        let fire_at = (|| {
            let date = NaiveDate::parse_from_str(&course.course_date, "%Y-%m-%d").ok()?;
            let time = NaiveTime::parse_from_str(&course.schedule_time, "%H:%M").ok()?;
            let local = self.config.timezone.from_local_datetime(&date.and_time(time)).single()?;
            Some(local.with_timezone(&Utc) - chrono::Duration::minutes(offset_minutes))
        })();

        let Some(fire_at) = fire_at else {
            return TaskOutcome::failure(ResultCode::InvalidTime, "這堂課的時間格式有問題，沒辦法設定提醒");
        };

        if fire_at < Utc::now() {
            return TaskOutcome::failure(ResultCode::PastReminderTime, "提醒時間已經過去了，麻煩提前少一點時間");
        }

        let reminder = Reminder {
            id: None,
            user_id: user_id.to_string(),
            course_id,
            student_name: student_name.clone(),
            course_name: course_name.clone(),
            fire_at,
            offset_minutes,
        };

        if let Err(err) = self.reminders.create(reminder).await {
            slog::error!(self.logger, "handlers.set_reminder.store_failed"; "err" => %err);
            return TaskOutcome::failure(ResultCode::FirebaseError, "設定提醒時發生問題，請稍後再試一次");
        }

        TaskOutcome::ok(
            ResultCode::AddCourseOk,
            format!("好的，會在{}{}開始前{}分鐘提醒你", student_name, course_name, offset_minutes),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reminders::test_support::InMemoryReminderStore;
    use crate::store::test_support::InMemoryCourseStore;
    use crate::store::{Course, CourseStatus};

    fn handler() -> SetReminderHandler {
        SetReminderHandler {
            courses: Arc::new(InMemoryCourseStore::default()),
            reminders: Arc::new(InMemoryReminderStore::default()),
            config: HandlerConfig::default(),
            logger: slog::Logger::root(slog::Discard, slog::o!()),
        }
    }

    fn slots() -> Slots {
        Slots {
            student_name: Some("小明".to_string()),
            course_name: Some("數學課".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn missing_course_returns_not_found() {
        let outcome = handler().handle(&slots(), "u1", &ConversationContext::empty("u1")).await;
        assert_eq!(outcome.code, Some(ResultCode::NotFound));
    }

    #[tokio::test]
    async fn sets_reminder_for_existing_future_course() {
        let h = handler();
        let now = Utc::now();
        h.courses
            .create(Course {
                id: None,
                user_id: "u1".to_string(),
                student_name: "小明".to_string(),
                course_name: "數學課".to_string(),
                course_date: "2999-01-01".to_string(),
                schedule_time: "14:00".to_string(),
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

        let outcome = h.handle(&slots(), "u1", &ConversationContext::empty("u1")).await;
        assert!(outcome.success);
    }
}
