//! `handleRecordContent`/`handleAddCourseContent` and
//! `handleQueryCourseContent` (spec §4.6-4.7). Content recording has no
//! dedicated success code in the spec's result table (spec §7 only lists
//! add/modify/cancel/query OK rows); this treats a recorded note as a
//! modification of the day's course record and returns `MODIFY_OK`
//! (see DESIGN.md's open-question note).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::content::{ContentStore, CourseContent};
use crate::context::ConversationContext;
use crate::dispatcher::{TaskHandler, TaskOutcome};
use crate::error::ResultCode;
use crate::handlers::HandlerConfig;
use crate::slots::Slots;
use crate::store::CourseStore;

pub struct RecordContentHandler {
    pub courses: Arc<dyn CourseStore>,
    pub content: Arc<dyn ContentStore>,
    pub config: HandlerConfig,
}

#[async_trait]
impl TaskHandler for RecordContentHandler {
    async fn handle(&self, slots: &Slots, user_id: &str, _ctx: &ConversationContext) -> TaskOutcome {
        let (Some(student_name), Some(course_name)) = (&slots.student_name, &slots.course_name) else {
            return TaskOutcome::failure(ResultCode::MissingFields, "請告訴我是哪位學生的哪堂課");
        };

        let course_date = slots
            .course_date
            .clone()
            .unwrap_or_else(|| Utc::now().with_timezone(&self.config.timezone).format("%Y-%m-%d").to_string());

        if self.config.strict_record_requires_course {
            match self.courses.find_course(user_id, student_name, course_name, Some(&course_date)).await {
                Ok(Some(_)) => {}
                Ok(None) => return TaskOutcome::failure(ResultCode::NotFound, "找不到對應的課程，沒辦法記錄內容"),
                Err(_) => return TaskOutcome::failure(ResultCode::TempUnavailable, "暫時無法查詢課程，請稍後再試一次"),
            }
        }

        let record = CourseContent {
            id: None,
            user_id: user_id.to_string(),
            student_name: student_name.clone(),
            course_name: course_name.clone(),
            course_date,
            content: slots.content.clone().unwrap_or_default(),
            image_ref: slots.image_ref.clone(),
            created_at: Utc::now(),
        };

        if self.content.record(record).await.is_err() {
            return TaskOutcome::failure(ResultCode::FirebaseError, "記錄課程內容時發生問題，請稍後再試一次");
        }

        TaskOutcome::ok(ResultCode::ModifyOk, format!("已經記錄{}{}的上課內容了", student_name, course_name))
    }
}

pub struct QueryCourseContentHandler {
    pub content: Arc<dyn ContentStore>,
}

#[async_trait]
impl TaskHandler for QueryCourseContentHandler {
    async fn handle(&self, slots: &Slots, user_id: &str, _ctx: &ConversationContext) -> TaskOutcome {
        let (Some(student_name), Some(course_name)) = (&slots.student_name, &slots.course_name) else {
            return TaskOutcome::failure(ResultCode::MissingFields, "請告訴我是哪位學生的哪堂課");
        };

        match self.content.latest_for(user_id, student_name, course_name).await {
            Ok(Some(record)) => TaskOutcome::ok(
                ResultCode::QueryOk,
                format!("{}{}最近一次記錄（{}）：{}", student_name, course_name, record.course_date, record.content),
            ),
            Ok(None) => TaskOutcome::ok(ResultCode::QueryOkEmpty, format!("還沒有{}{}的記錄", student_name, course_name)),
            Err(_) => TaskOutcome::failure(ResultCode::TempUnavailable, "暫時無法查詢記錄，請稍後再試一次"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::test_support::InMemoryContentStore;
    use crate::store::test_support::InMemoryCourseStore;

    fn slots() -> Slots {
        Slots {
            student_name: Some("小明".to_string()),
            course_name: Some("數學課".to_string()),
            content: Some("今天學了分數".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn records_content_without_strict_course_check() {
        let handler = RecordContentHandler {
            courses: Arc::new(InMemoryCourseStore::default()),
            content: Arc::new(InMemoryContentStore::default()),
            config: HandlerConfig::default(),
        };
        let outcome = handler.handle(&slots(), "u1", &ConversationContext::empty("u1")).await;
        assert!(outcome.success);
    }

    #[tokio::test]
    async fn strict_mode_requires_existing_course() {
        let mut config = HandlerConfig::default();
        config.strict_record_requires_course = true;
        let handler = RecordContentHandler {
            courses: Arc::new(InMemoryCourseStore::default()),
            content: Arc::new(InMemoryContentStore::default()),
            config,
        };
        let outcome = handler.handle(&slots(), "u1", &ConversationContext::empty("u1")).await;
        assert_eq!(outcome.code, Some(ResultCode::NotFound));
    }

    #[tokio::test]
    async fn query_content_empty_when_nothing_recorded() {
        let handler = QueryCourseContentHandler {
            content: Arc::new(InMemoryContentStore::default()),
        };
        let outcome = handler.handle(&slots(), "u1", &ConversationContext::empty("u1")).await;
        assert_eq!(outcome.code, Some(ResultCode::QueryOkEmpty));
    }
}
