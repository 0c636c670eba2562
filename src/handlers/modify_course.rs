//! `handleModifyCourse` (spec §4.7): locate the named course, apply
//! whichever fields the new utterance supplied, re-check time conflicts
//! only when the time is actually changing, and let `ReminderManager`
//! know so any pending reminder tracks the new time.

use std::sync::Arc;

use async_trait::async_trait;
use slog::Logger;

use crate::channels::DynTx;
use crate::context::ConversationContext;
use crate::dispatcher::{TaskHandler, TaskOutcome};
use crate::error::ResultCode;
use crate::handlers::course_names_match;
use crate::reminders::manager::{CourseEvent, CourseEvents};
use crate::slots::Slots;
use crate::store::{CoursePatch, CourseStore};

pub struct ModifyCourseHandler {
    pub courses: Arc<dyn CourseStore>,
    pub reminder_events: Option<DynTx<CourseEvents>>,
    pub logger: Logger,
}

#[async_trait]
impl TaskHandler for ModifyCourseHandler {
    async fn handle(&self, slots: &Slots, user_id: &str, _ctx: &ConversationContext) -> TaskOutcome {
        let (Some(student_name), Some(course_name)) = (&slots.student_name, &slots.course_name) else {
            return TaskOutcome::failure(ResultCode::MissingFields, "請告訴我要修改哪位學生的哪堂課");
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

        let new_date = slots.course_date.clone().unwrap_or_else(|| existing.course_date.clone());
        let new_time = slots.schedule_time.clone().unwrap_or_else(|| existing.schedule_time.clone());
        let time_changed = new_date != existing.course_date || new_time != existing.schedule_time;

        if time_changed {
            match self.courses.check_time_conflicts(user_id, &new_date, &new_time, Some(&id)).await {
                Ok(conflicts) if !conflicts.is_empty() => {
                    return TaskOutcome::failure(ResultCode::TimeConflict, "新的時間已經安排了其他課程了");
                }
                Err(_) => {
                    return TaskOutcome::failure(ResultCode::TempUnavailable, "暫時無法確認時間是否衝突，請稍後再試一次");
                }
                _ => {}
            }
        }

        let mut changed = Vec::new();
        let patch = CoursePatch {
            course_name: slots.course_name.clone().filter(|name| !course_names_match(name, &existing.course_name)).inspect(|_| changed.push("課程名稱")),
            schedule_time: slots.schedule_time.clone().filter(|t| t != &existing.schedule_time).inspect(|_| changed.push("時間")),
            course_date: slots.course_date.clone().filter(|d| d != &existing.course_date).inspect(|_| changed.push("日期")),
            location: slots.location.clone().inspect(|_| changed.push("地點")),
            teacher: slots.teacher.clone().inspect(|_| changed.push("老師")),
            ..Default::default()
        };

        if let Err(err) = self.courses.update(&id, patch).await {
            slog::error!(self.logger, "handlers.modify_course.store_failed"; "err" => %err);
            return TaskOutcome::failure(ResultCode::FirebaseError, "更新課程時發生問題，請稍後再試一次");
        }

        if time_changed {
            if let Some(tx) = &self.reminder_events {
                let mut rescheduled = existing.clone();
                rescheduled.course_date = new_date;
                rescheduled.schedule_time = new_time;
                let mut events = CourseEvents::new();
                events.push(CourseEvent::Rescheduled(rescheduled));
                let _ = tx.send(events).await;
            }
        }

        let summary = if changed.is_empty() {
            "已經更新課程了".to_string()
        } else {
            format!("已經更新{}的{}：{}", student_name, course_name, changed.join("、"))
        };
        TaskOutcome::ok(ResultCode::ModifyOk, summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::InMemoryCourseStore;
    use crate::store::{Course, CourseStatus};
    use chrono::Utc;

    fn handler() -> ModifyCourseHandler {
        ModifyCourseHandler {
            courses: Arc::new(InMemoryCourseStore::default()),
            reminder_events: None,
            logger: slog::Logger::root(slog::Discard, slog::o!()),
        }
    }

    async fn seed(courses: &Arc<dyn CourseStore>) {
        let now = Utc::now();
        courses
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
    }

    #[tokio::test]
    async fn missing_course_returns_not_found() {
        let h = handler();
        let slots = Slots {
            student_name: Some("小華".to_string()),
            course_name: Some("英文課".to_string()),
            ..Default::default()
        };
        let outcome = h.handle(&slots, "u1", &ConversationContext::empty("u1")).await;
        assert_eq!(outcome.code, Some(ResultCode::NotFound));
    }

    #[tokio::test]
    async fn updates_schedule_time() {
        let h = handler();
        seed(&h.courses).await;
        let slots = Slots {
            student_name: Some("小明".to_string()),
            course_name: Some("數學課".to_string()),
            schedule_time: Some("16:00".to_string()),
            ..Default::default()
        };
        let outcome = h.handle(&slots, "u1", &ConversationContext::empty("u1")).await;
        assert!(outcome.success);
        assert_eq!(outcome.code, Some(ResultCode::ModifyOk));
    }
}
