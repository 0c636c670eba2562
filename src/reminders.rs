//! Reminder records and the propagator background task. Generalizes the
//! teacher's `notifications::{NotificationEvent, propagator::Propagator}`
//! (`hdbg-pjatkbot/src/notifications.rs`) — same poll-fire_date-delete-fan
//! out shape, applied to a `handleSetReminder`-created reminder document
//! instead of a scraped-timetable class.

use std::convert::Infallible;

use async_trait::async_trait;
use bson::doc;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use mongodb::Collection;
use serde::{Deserialize, Serialize};
use slog::Logger;
use smallvec::SmallVec;

use crate::channels;
use crate::db::Model;
use crate::error::AppError;

/// A reminder set by `handleSetReminder`: fire `offset_minutes` before
/// `course_date`/`schedule_time`, then delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<bson::oid::ObjectId>,
    pub user_id: String,
    pub course_id: bson::oid::ObjectId,
    pub student_name: String,
    pub course_name: String,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub fire_at: DateTime<Utc>,
    pub offset_minutes: i64,
}

impl Model for Reminder {
    const COLLECTION_NAME: &'static str = "reminders";
}

/// Storage seam for `handleSetReminder` and `ReminderManager`, the same
/// shape as `CourseStore`/`ContentStore` so handlers stay testable against
/// hand-written fakes instead of a real Mongo connection.
#[async_trait]
pub trait ReminderStore: Send + Sync {
    async fn create(&self, reminder: Reminder) -> Result<Reminder, AppError>;
    async fn delete_by_course(&self, course_id: &bson::oid::ObjectId) -> Result<(), AppError>;
    async fn find_by_course(
        &self,
        course_id: &bson::oid::ObjectId,
    ) -> Result<Option<Reminder>, AppError>;
}

pub struct MongoReminderStore {
    collection: Collection<Reminder>,
}

impl MongoReminderStore {
    pub fn new(db: &mongodb::Database) -> Self {
        Self {
            collection: db.collection(Reminder::COLLECTION_NAME),
        }
    }
}

#[async_trait]
impl ReminderStore for MongoReminderStore {
    async fn create(&self, reminder: Reminder) -> Result<Reminder, AppError> {
        let result = self.collection.insert_one(&reminder).await?;
        let mut stored = reminder;
        stored.id = result.inserted_id.as_object_id();
        Ok(stored)
    }

    async fn delete_by_course(&self, course_id: &bson::oid::ObjectId) -> Result<(), AppError> {
        self.collection
            .delete_many(doc! { "course_id": course_id })
            .await?;
        Ok(())
    }

    async fn find_by_course(
        &self,
        course_id: &bson::oid::ObjectId,
    ) -> Result<Option<Reminder>, AppError> {
        Ok(self.collection.find_one(doc! { "course_id": course_id }).await?)
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use tokio::sync::Mutex;

    #[derive(Default)]
    pub struct InMemoryReminderStore {
        pub reminders: Mutex<Vec<Reminder>>,
    }

    #[async_trait]
    impl ReminderStore for InMemoryReminderStore {
        async fn create(&self, reminder: Reminder) -> Result<Reminder, AppError> {
            self.reminders.lock().await.push(reminder.clone());
            Ok(reminder)
        }

        async fn delete_by_course(&self, course_id: &bson::oid::ObjectId) -> Result<(), AppError> {
            self.reminders.lock().await.retain(|r| &r.course_id != course_id);
            Ok(())
        }

        async fn find_by_course(
            &self,
            course_id: &bson::oid::ObjectId,
        ) -> Result<Option<Reminder>, AppError> {
            Ok(self
                .reminders
                .lock()
                .await
                .iter()
                .find(|r| &r.course_id == course_id)
                .cloned())
        }
    }
}

/// Fired reminder event; the propagator fans these out to whatever sends
/// the actual chat message (the webhook process's outbound side).
#[derive(Debug, Clone)]
pub struct ReminderFired {
    pub user_id: String,
    pub student_name: String,
    pub course_name: String,
}

pub type ReminderEvents = SmallVec<[ReminderFired; 32]>;

#[derive(Debug, Clone, Deserialize)]
pub struct PropagatorConfig {
    pub poll_interval: std::time::Duration,
}

pub struct ReminderPropagator {
    reminders: Collection<Reminder>,
    config: PropagatorConfig,
    logger: Logger,
}

impl ReminderPropagator {
    pub fn new(db: &mongodb::Database, config: PropagatorConfig, logger: &Logger) -> Self {
        Self {
            reminders: db.collection(Reminder::COLLECTION_NAME),
            config,
            logger: logger.new(slog::o!("subsystem" => "reminder_propagator")),
        }
    }

    async fn try_find_due(&self) -> eyre::Result<ReminderEvents> {
        let query = doc! { "fire_at": { "$lte": bson::DateTime::from_chrono(Utc::now()) } };
        let mut cursor = self.reminders.find(query.clone()).await?;

        let mut result = SmallVec::new();
        while let Some(reminder) = cursor.next().await {
            let reminder = reminder?;
            result.push(ReminderFired {
                user_id: reminder.user_id,
                student_name: reminder.student_name,
                course_name: reminder.course_name,
            });
        }

        self.reminders.delete_many(query).await?;
        Ok(result)
    }

    pub fn work(
        self,
        tx: channels::DynTx<ReminderEvents>,
    ) -> tokio::task::JoinHandle<eyre::Result<Infallible>> {
        let mut interval = tokio::time::interval(self.config.poll_interval);

        let fut = async move {
            loop {
                interval.tick().await;
                match self.try_find_due().await {
                    Ok(due) if due.is_empty() => {
                        slog::debug!(self.logger, "reminders.propagator.no_due");
                    }
                    Ok(due) => {
                        slog::info!(self.logger, "reminders.propagator.fired"; "count" => due.len());
                        tx.send(due).await?;
                    }
                    Err(err) => {
                        slog::error!(self.logger, "reminders.propagator.poll_failed"; "err" => ?err);
                    }
                }
            }
        };

        tokio::task::spawn(fut)
    }
}

pub mod manager;

#[cfg(test)]
mod tests {
    use super::test_support::InMemoryReminderStore;
    use super::*;

    fn sample(course_id: bson::oid::ObjectId) -> Reminder {
        Reminder {
            id: None,
            user_id: "u1".to_string(),
            course_id,
            student_name: "小明".to_string(),
            course_name: "數學課".to_string(),
            fire_at: Utc::now(),
            offset_minutes: 30,
        }
    }

    #[tokio::test]
    async fn create_then_find_by_course_round_trips() {
        let store = InMemoryReminderStore::default();
        let course_id = bson::oid::ObjectId::new();
        store.create(sample(course_id)).await.unwrap();
        let found = store.find_by_course(&course_id).await.unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn delete_by_course_removes_matching_rows() {
        let store = InMemoryReminderStore::default();
        let course_id = bson::oid::ObjectId::new();
        store.create(sample(course_id)).await.unwrap();
        store.delete_by_course(&course_id).await.unwrap();
        assert!(store.find_by_course(&course_id).await.unwrap().is_none());
    }
}
