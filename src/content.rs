//! Per-course content notes (spec §4.7 `handleRecordContent`, §4.6
//! `query_course_content`). `spec.md`'s `Course` record (§3) has no field
//! for "what was taught today" — `record_content`/`add_course_content`
//! need somewhere to write it and `query_course_content` needs somewhere
//! to read it back. Modeled as its own collection, the same way the
//! teacher keeps `Notification` separate from `Class` rather than bolting
//! ad-hoc fields onto the schedule record (`hdbg-pjatkbot/src/db.rs`).

use async_trait::async_trait;
use bson::doc;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};

use crate::db::Model;
use crate::error::AppError;

/// One recorded note against a student's course on a given day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseContent {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<bson::oid::ObjectId>,
    pub user_id: String,
    pub student_name: String,
    pub course_name: String,
    pub course_date: String,
    pub content: String,
    pub image_ref: Option<String>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl Model for CourseContent {
    const COLLECTION_NAME: &'static str = "course_contents";
}

#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn record(&self, content: CourseContent) -> Result<CourseContent, AppError>;
    async fn latest_for(
        &self,
        user_id: &str,
        student_name: &str,
        course_name: &str,
    ) -> Result<Option<CourseContent>, AppError>;
}

pub struct MongoContentStore {
    collection: mongodb::Collection<CourseContent>,
}

impl MongoContentStore {
    pub fn new(db: &mongodb::Database) -> Self {
        Self {
            collection: db.collection(CourseContent::COLLECTION_NAME),
        }
    }
}

#[async_trait]
impl ContentStore for MongoContentStore {
    async fn record(&self, content: CourseContent) -> Result<CourseContent, AppError> {
        let result = self.collection.insert_one(&content).await?;
        let mut stored = content;
        stored.id = result.inserted_id.as_object_id();
        Ok(stored)
    }

    async fn latest_for(
        &self,
        user_id: &str,
        student_name: &str,
        course_name: &str,
    ) -> Result<Option<CourseContent>, AppError> {
        let filter = doc! {
            "user_id": user_id,
            "student_name": student_name,
            "course_name": course_name,
        };
        let cursor = self
            .collection
            .find(filter)
            .sort(doc! { "course_date": -1 })
            .limit(1)
            .await?;
        let mut all: Vec<CourseContent> = cursor.try_collect().await?;
        Ok(all.pop())
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use tokio::sync::Mutex;

    /// In-memory fake, matching the corpus's hand-written-fake-over-mocking-
    /// crate convention for seam-heavy async traits.
    #[derive(Default)]
    pub struct InMemoryContentStore {
        pub records: Mutex<Vec<CourseContent>>,
    }

    #[async_trait]
    impl ContentStore for InMemoryContentStore {
        async fn record(&self, content: CourseContent) -> Result<CourseContent, AppError> {
            self.records.lock().await.push(content.clone());
            Ok(content)
        }

        async fn latest_for(
            &self,
            user_id: &str,
            student_name: &str,
            course_name: &str,
        ) -> Result<Option<CourseContent>, AppError> {
            let records = self.records.lock().await;
            Ok(records
                .iter()
                .filter(|r| r.user_id == user_id && r.student_name == student_name && r.course_name == course_name)
                .max_by_key(|r| r.course_date.clone())
                .cloned())
        }
    }
}
