//! Calendar sync interface (spec §6). OAuth/token lifecycle is explicitly
//! out of scope (spec §1); this crate ships only the interface plus a
//! `NullCalendarSync` that reports mode `"mock"` on `GET /health/gcal`
//! (DESIGN.md "Calendar sync authentication mode").

use async_trait::async_trait;

use crate::error::AppError;
use crate::store::Course;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum CalendarAuthMode {
    Service,
    Oauth2,
    Mock,
}

#[async_trait]
pub trait CalendarSync: Send + Sync {
    async fn create_event(&self, course: &Course) -> Result<String, AppError>;
    async fn update_event(&self, calendar_event_id: &str, course: &Course) -> Result<(), AppError>;
    async fn delete_event(&self, calendar_event_id: &str) -> Result<(), AppError>;
    fn auth_mode(&self) -> CalendarAuthMode;
}

/// Always-succeeds stub. Calendar writes are a nice-to-have relative to
/// the `CourseStore` write, which is the real source of truth; a failed
/// calendar sync never blocks a course mutation (spec §7's table has no
/// calendar-specific failure code).
pub struct NullCalendarSync;

#[async_trait]
impl CalendarSync for NullCalendarSync {
    async fn create_event(&self, course: &Course) -> Result<String, AppError> {
        Ok(format!("null-event-{}", course.course_date))
    }

    async fn update_event(&self, _calendar_event_id: &str, _course: &Course) -> Result<(), AppError> {
        Ok(())
    }

    async fn delete_event(&self, _calendar_event_id: &str) -> Result<(), AppError> {
        Ok(())
    }

    fn auth_mode(&self) -> CalendarAuthMode {
        CalendarAuthMode::Mock
    }
}
