//! Crate-wide error type and the task result-code taxonomy (spec §7).

use thiserror::Error;

/// Result codes returned by task handlers and consumed by the Renderer.
///
/// One variant per row of the error-handling table: every handler converts
/// whatever went wrong into one of these before it ever reaches the
/// dispatcher, so nothing here ever needs a `#[from]` conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultCode {
    AddCourseOk,
    ModifyOk,
    CancelOk,
    QueryOk,
    QueryOkEmpty,
    MissingFields,
    NotFound,
    TimeConflict,
    InvalidTime,
    InvalidPastTime,
    PastReminderTime,
    RecurringCancelOptions,
    FeatureUnderDevelopment,
    NotImplementedMonthly,
    UnknownHelp,
    TempUnavailable,
    FirebaseError,
}

impl ResultCode {
    /// Whether this code represents a successful task outcome.
    pub fn is_success(self) -> bool {
        matches!(
            self,
            ResultCode::AddCourseOk
                | ResultCode::ModifyOk
                | ResultCode::CancelOk
                | ResultCode::QueryOk
                | ResultCode::QueryOkEmpty
        )
    }
}

/// Crate-wide error type for components with a closed set of recoverable
/// failure modes. Glue code (handler bodies, background loops, webhook
/// routing) uses `eyre::Result` instead, matching the teacher's own split
/// between `thiserror` leaf errors and `eyre` call-site plumbing.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("context store unavailable: {0}")]
    ContextUnavailable(String),

    #[error("course store error: {0}")]
    Store(#[from] mongodb::error::Error),

    #[error("llm request failed: {0}")]
    Llm(String),

    #[error("llm request timed out after {0}ms")]
    LlmTimeout(u64),

    #[error("messaging delivery failed: {0}")]
    Messaging(String),

    #[error("signature verification failed")]
    BadSignature,

    #[error("malformed webhook body: {0}")]
    MalformedBody(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Short error code, mirroring the pack's `SkynetError::code()` pattern.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::ContextUnavailable(_) => "CONTEXT_UNAVAILABLE",
            AppError::Store(_) => "STORE_ERROR",
            AppError::Llm(_) => "LLM_ERROR",
            AppError::LlmTimeout(_) => "LLM_TIMEOUT",
            AppError::Messaging(_) => "MESSAGING_ERROR",
            AppError::BadSignature => "BAD_SIGNATURE",
            AppError::MalformedBody(_) => "MALFORMED_BODY",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_codes_are_exactly_the_ok_rows() {
        assert!(ResultCode::AddCourseOk.is_success());
        assert!(ResultCode::QueryOkEmpty.is_success());
        assert!(!ResultCode::MissingFields.is_success());
        assert!(!ResultCode::NotFound.is_success());
    }

    #[test]
    fn result_code_round_trips_through_display_and_parse() {
        use std::str::FromStr;
        for code in [
            ResultCode::AddCourseOk,
            ResultCode::NotImplementedMonthly,
            ResultCode::RecurringCancelOptions,
        ] {
            let s = code.to_string();
            let parsed = ResultCode::from_str(&s).unwrap();
            assert_eq!(parsed, code);
        }
    }
}
