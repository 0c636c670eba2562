//! `ReminderManager`: keeps `Reminder` rows in sync with course lifecycle
//! events. Generalizes the teacher's `notifications::manager::
//! NotificationManager` (course-added/removed/user-updated → upsert/delete
//! notification rows) from resyncing against a scraped group timetable to
//! reacting to this spec's chat-driven course mutations: a cancelled course
//! drops its reminder, a rescheduled one gets its `fire_at` recomputed
//! against the same offset.

use std::convert::Infallible;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime, TimeZone};
use slog::Logger;
use smallvec::SmallVec;

use crate::channels;
use crate::reminders::{Reminder, ReminderStore};
use crate::store::Course;
use crate::time_parser;

/// Emitted by task handlers after a `CourseStore` write that should be
/// reflected into `reminders` (spec §9's idempotency note: reminders track
/// course identity, not the inverse).
#[derive(Debug, Clone)]
pub enum CourseEvent {
    Rescheduled(Course),
    Cancelled(bson::oid::ObjectId),
}

pub type CourseEvents = SmallVec<[CourseEvent; 32]>;

fn compute_fire_at(course: &Course, offset_minutes: i64) -> Option<chrono::DateTime<chrono::Utc>> {
    let date = NaiveDate::parse_from_str(&course.course_date, "%Y-%m-%d").ok()?;
    let time = NaiveTime::parse_from_str(&course.schedule_time, "%H:%M").ok()?;
    let local = time_parser::DEFAULT_TIMEZONE
        .from_local_datetime(&date.and_time(time))
        .single()?;
    Some(local.to_utc() - chrono::Duration::minutes(offset_minutes))
}

pub struct ReminderManager {
    reminders: Arc<dyn ReminderStore>,
    logger: Logger,
}

impl ReminderManager {
    pub fn new(reminders: Arc<dyn ReminderStore>, logger: &Logger) -> Self {
        Self {
            reminders,
            logger: logger.new(slog::o!("subsystem" => "reminder_manager")),
        }
    }

    async fn handle_event(&self, event: CourseEvent) -> eyre::Result<()> {
        match event {
            CourseEvent::Cancelled(course_id) => {
                self.reminders.delete_by_course(&course_id).await?;
                slog::info!(self.logger, "reminder_manager.course_cancelled"; "course_id" => %course_id);
            }
            CourseEvent::Rescheduled(course) => {
                let Some(course_id) = course.id else {
                    return Ok(());
                };
                let Some(existing) = self.reminders.find_by_course(&course_id).await? else {
                    return Ok(());
                };
                let Some(fire_at) = compute_fire_at(&course, existing.offset_minutes) else {
                    slog::warn!(self.logger, "reminder_manager.unparseable_schedule"; "course_id" => %course_id);
                    return Ok(());
                };
                self.reminders.delete_by_course(&course_id).await?;
                self.reminders
                    .create(Reminder {
                        id: None,
                        fire_at,
                        ..existing
                    })
                    .await?;
                slog::info!(self.logger, "reminder_manager.rescheduled"; "course_id" => %course_id);
            }
        }
        Ok(())
    }

    pub fn work(self, rx: channels::DynRx<CourseEvents>) -> tokio::task::JoinHandle<eyre::Result<Infallible>> {
        let fut = async move {
            loop {
                let events = rx.recv().await?;
                for event in events {
                    if let Err(err) = self.handle_event(event).await {
                        slog::error!(self.logger, "reminder_manager.handle_failed"; "err" => ?err);
                    }
                }
            }
        };
        tokio::task::spawn(fut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reminders::test_support::InMemoryReminderStore;
    use crate::store::{CourseStatus, RecurrenceType};
    use chrono::Utc;

    fn logger() -> Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    fn course(id: bson::oid::ObjectId, date: &str, time: &str) -> Course {
        Course {
            id: Some(id),
            user_id: "u1".to_string(),
            student_name: "小明".to_string(),
            course_name: "數學課".to_string(),
            course_date: date.to_string(),
            schedule_time: time.to_string(),
            is_recurring: false,
            recurrence_type: None::<RecurrenceType>,
            day_of_week: None,
            location: None,
            teacher: None,
            status: CourseStatus::Scheduled,
            cancelled: false,
            calendar_event_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn cancelled_course_deletes_its_reminder() {
        let store: Arc<InMemoryReminderStore> = Arc::default();
        let course_id = bson::oid::ObjectId::new();
        store
            .create(Reminder {
                id: None,
                user_id: "u1".to_string(),
                course_id,
                student_name: "小明".to_string(),
                course_name: "數學課".to_string(),
                fire_at: Utc::now(),
                offset_minutes: 30,
            })
            .await
            .unwrap();

        let manager = ReminderManager::new(store.clone(), &logger());
        manager
            .handle_event(CourseEvent::Cancelled(course_id))
            .await
            .unwrap();
        assert!(store.find_by_course(&course_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rescheduled_course_recomputes_fire_at_with_same_offset() {
        let store: Arc<InMemoryReminderStore> = Arc::default();
        let course_id = bson::oid::ObjectId::new();
        store
            .create(Reminder {
                id: None,
                user_id: "u1".to_string(),
                course_id,
                student_name: "小明".to_string(),
                course_name: "數學課".to_string(),
                fire_at: Utc::now(),
                offset_minutes: 30,
            })
            .await
            .unwrap();

        let manager = ReminderManager::new(store.clone(), &logger());
        let rescheduled = course(course_id, "2025-09-01", "15:00");
        manager
            .handle_event(CourseEvent::Rescheduled(rescheduled))
            .await
            .unwrap();

        let updated = store.find_by_course(&course_id).await.unwrap().unwrap();
        let expected = compute_fire_at(&course(course_id, "2025-09-01", "15:00"), 30).unwrap();
        assert_eq!(updated.fire_at, expected);
    }
}
