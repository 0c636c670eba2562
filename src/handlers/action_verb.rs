//! `handleModifyAction`/`handleCancelAction`/`handleRestartInput` and
//! `correction_intent` (spec §4.7; the last's routing is this crate's own
//! grouping decision, see DESIGN.md). All four are context-dependent
//! follow-ups on the most recent action — without one there's nothing to
//! alter, so they fall back to `UNKNOWN_HELP` exactly like
//! `handleConfirmAction` does.

use async_trait::async_trait;

use crate::context::ConversationContext;
use crate::dispatcher::{TaskHandler, TaskOutcome};
use crate::error::ResultCode;
use crate::slots::Slots;

pub struct ActionVerbHandler;

#[async_trait]
impl TaskHandler for ActionVerbHandler {
    async fn handle(&self, _slots: &Slots, _user_id: &str, ctx: &ConversationContext) -> TaskOutcome {
        match ctx.get_last_action(None) {
            Some(last) => TaskOutcome::ok(
                ResultCode::QueryOk,
                format!("好的，請告訴我想怎麼調整上一步「{}」的結果", last.intent),
            ),
            None => TaskOutcome::failure(ResultCode::UnknownHelp, "目前沒有可以修改或取消的操作"),
        }
    }
}
