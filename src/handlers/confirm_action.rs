//! `handleConfirmAction` (spec §4.7): reads the most recent `lastActions`
//! entry and acknowledges it. No further store writes happen here — the
//! mutation already happened when the original intent ran; confirming
//! just closes the `expecting_input` loop the original handler opened.

use async_trait::async_trait;

use crate::context::ConversationContext;
use crate::dispatcher::{TaskHandler, TaskOutcome};
use crate::error::ResultCode;
use crate::handlers::success_code_for_intent_tag;
use crate::slots::Slots;

pub struct ConfirmActionHandler;

#[async_trait]
impl TaskHandler for ConfirmActionHandler {
    async fn handle(&self, _slots: &Slots, _user_id: &str, ctx: &ConversationContext) -> TaskOutcome {
        match ctx.get_last_action(None) {
            Some(last) => TaskOutcome::ok(success_code_for_intent_tag(&last.intent), "好的，已經確認了"),
            None => TaskOutcome::failure(ResultCode::UnknownHelp, "目前沒有可以確認的操作"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn no_prior_action_returns_unknown_help() {
        let outcome = ConfirmActionHandler
            .handle(&Slots::default(), "u1", &ConversationContext::empty("u1"))
            .await;
        assert_eq!(outcome.code, Some(ResultCode::UnknownHelp));
    }

    #[tokio::test]
    async fn prior_action_confirmed() {
        let mut ctx = ConversationContext::empty("u1");
        ctx.record_task_result("add_course", serde_json::json!({}), "ADD_COURSE_OK", true, Utc::now());
        let outcome = ConfirmActionHandler.handle(&Slots::default(), "u1", &ctx).await;
        assert_eq!(outcome.code, Some(ResultCode::AddCourseOk));
    }
}
