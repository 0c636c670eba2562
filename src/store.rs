//! Domain store over courses (spec §3 `Course`, §6 `CourseStore`).
//! Generalizes the teacher's `parsing::types::Class` + `db::Model` pattern
//! (`hdbg-pjatkbot/src/parsing/types.rs`) and its Mongo `Collection<Class>`
//! access style (`hdbg-pjatkbot/src/parsing.rs::replace_or_fill_day`) from a
//! scraped read-only timetable to a chat-mutated one.

use async_trait::async_trait;
use bson::doc;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};

use crate::db::Model;
use crate::error::AppError;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub enum RecurrenceType {
    Daily,
    Weekly,
    Monthly,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub enum CourseStatus {
    Scheduled,
    Cancelled,
    Completed,
}

/// A single scheduled (or recurring-template) course, spec §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Course {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<bson::oid::ObjectId>,
    pub user_id: String,
    pub student_name: String,
    pub course_name: String,
    pub course_date: String,
    pub schedule_time: String,
    pub is_recurring: bool,
    pub recurrence_type: Option<RecurrenceType>,
    pub day_of_week: Option<Vec<u8>>,
    pub location: Option<String>,
    pub teacher: Option<String>,
    pub status: CourseStatus,
    pub cancelled: bool,
    pub calendar_event_id: Option<String>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl Model for Course {
    const COLLECTION_NAME: &'static str = "courses";
}

/// Patch applied by `CourseStore::update`. `None` fields are left
/// untouched; this mirrors the teacher's `replace_or_fill_day` diffing
/// style of only writing what actually changed.
#[derive(Debug, Clone, Default)]
pub struct CoursePatch {
    pub course_name: Option<String>,
    pub schedule_time: Option<String>,
    pub course_date: Option<String>,
    pub location: Option<String>,
    pub teacher: Option<String>,
    pub status: Option<CourseStatus>,
    pub cancelled: Option<bool>,
    pub calendar_event_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CourseRange {
    pub from: Option<String>,
    pub to: Option<String>,
}

#[async_trait]
pub trait CourseStore: Send + Sync {
    async fn get_or_create_parent(&self, user_id: &str) -> Result<(), AppError>;
    async fn get_courses_by_student(
        &self,
        user_id: &str,
        student_name: &str,
        range: Option<CourseRange>,
    ) -> Result<Vec<Course>, AppError>;
    async fn find_course(
        &self,
        user_id: &str,
        student_name: &str,
        course_name: &str,
        date: Option<&str>,
    ) -> Result<Option<Course>, AppError>;
    async fn create(&self, course: Course) -> Result<Course, AppError>;
    async fn update(&self, id: &bson::oid::ObjectId, patch: CoursePatch) -> Result<(), AppError>;
    async fn delete(&self, id: &bson::oid::ObjectId) -> Result<(), AppError>;
    async fn check_time_conflicts(
        &self,
        user_id: &str,
        date: &str,
        time: &str,
        exclude_id: Option<&bson::oid::ObjectId>,
    ) -> Result<Vec<Course>, AppError>;
    /// Backs `handleQuerySchedule` when the request names a `courseName` or
    /// `courseDate` but no `studentName` (spec §4.4's `isCompleteForIntent`
    /// allows any one of the three) — the generalized form of spec §6's
    /// `queryDocuments(entityType, criteria)` for this store's one entity
    /// type.
    async fn get_courses_for_range(
        &self,
        user_id: &str,
        range: Option<CourseRange>,
    ) -> Result<Vec<Course>, AppError>;
}

pub struct MongoCourseStore {
    db: mongodb::Database,
}

impl MongoCourseStore {
    pub fn new(db: mongodb::Database) -> Self {
        Self { db }
    }

    fn collection(&self) -> mongodb::Collection<Course> {
        self.db.collection(Course::COLLECTION_NAME)
    }
}

#[async_trait]
impl CourseStore for MongoCourseStore {
    async fn get_or_create_parent(&self, user_id: &str) -> Result<(), AppError> {
        let parents: mongodb::Collection<crate::db::Parent> =
            self.db.collection(crate::db::Parent::COLLECTION_NAME);
        let now = Utc::now();
        parents
            .update_one(
                doc! { "_id": user_id },
                doc! {
                    "$setOnInsert": {
                        "_id": user_id,
                        "role": "Parent",
                        "language": "zh-TW",
                        "created_at": bson::DateTime::from_chrono(now),
                    },
                    "$set": { "updated_at": bson::DateTime::from_chrono(now) },
                },
            )
            .upsert(true)
            .await?;
        Ok(())
    }

    async fn get_courses_by_student(
        &self,
        user_id: &str,
        student_name: &str,
        range: Option<CourseRange>,
    ) -> Result<Vec<Course>, AppError> {
        let mut filter = doc! {
            "user_id": user_id,
            "student_name": student_name,
            "cancelled": false,
        };
        if let Some(range) = range {
            let mut date_filter = bson::Document::new();
            if let Some(from) = range.from {
                date_filter.insert("$gte", from);
            }
            if let Some(to) = range.to {
                date_filter.insert("$lte", to);
            }
            if !date_filter.is_empty() {
                filter.insert("course_date", date_filter);
            }
        }
        let cursor = self.collection().find(filter).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn get_courses_for_range(
        &self,
        user_id: &str,
        range: Option<CourseRange>,
    ) -> Result<Vec<Course>, AppError> {
        let mut filter = doc! {
            "user_id": user_id,
            "cancelled": false,
        };
        if let Some(range) = range {
            let mut date_filter = bson::Document::new();
            if let Some(from) = range.from {
                date_filter.insert("$gte", from);
            }
            if let Some(to) = range.to {
                date_filter.insert("$lte", to);
            }
            if !date_filter.is_empty() {
                filter.insert("course_date", date_filter);
            }
        }
        let cursor = self.collection().find(filter).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn find_course(
        &self,
        user_id: &str,
        student_name: &str,
        course_name: &str,
        date: Option<&str>,
    ) -> Result<Option<Course>, AppError> {
        let mut filter = doc! {
            "user_id": user_id,
            "student_name": student_name,
            "course_name": course_name,
            "cancelled": false,
        };
        if let Some(date) = date {
            filter.insert("course_date", date);
        }
        Ok(self.collection().find_one(filter).await?)
    }

    async fn create(&self, course: Course) -> Result<Course, AppError> {
        let collection = self.collection();
        let result = collection.insert_one(&course).await?;
        let mut stored = course;
        stored.id = result.inserted_id.as_object_id();
        Ok(stored)
    }

    async fn update(&self, id: &bson::oid::ObjectId, patch: CoursePatch) -> Result<(), AppError> {
        let mut set = bson::Document::new();
        if let Some(v) = patch.course_name {
            set.insert("course_name", v);
        }
        if let Some(v) = patch.schedule_time {
            set.insert("schedule_time", v);
        }
        if let Some(v) = patch.course_date {
            set.insert("course_date", v);
        }
        if let Some(v) = patch.location {
            set.insert("location", v);
        }
        if let Some(v) = patch.teacher {
            set.insert("teacher", v);
        }
        if let Some(v) = patch.status {
            set.insert("status", v.to_string());
        }
        if let Some(v) = patch.cancelled {
            set.insert("cancelled", v);
        }
        if let Some(v) = patch.calendar_event_id {
            set.insert("calendar_event_id", v);
        }
        set.insert("updated_at", bson::DateTime::from_chrono(Utc::now()));

        self.collection()
            .update_one(doc! { "_id": id }, doc! { "$set": set })
            .await?;
        Ok(())
    }

    async fn delete(&self, id: &bson::oid::ObjectId) -> Result<(), AppError> {
        self.collection().delete_one(doc! { "_id": id }).await?;
        Ok(())
    }

    async fn check_time_conflicts(
        &self,
        user_id: &str,
        date: &str,
        time: &str,
        exclude_id: Option<&bson::oid::ObjectId>,
    ) -> Result<Vec<Course>, AppError> {
        let mut filter = doc! {
            "user_id": user_id,
            "course_date": date,
            "schedule_time": time,
            "cancelled": false,
        };
        if let Some(exclude_id) = exclude_id {
            filter.insert("_id", doc! { "$ne": exclude_id });
        }
        let cursor = self.collection().find(filter).await?;
        Ok(cursor.try_collect().await?)
    }
}
