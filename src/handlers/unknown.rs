//! `handleUnknown` (spec §4.7): the catch-all when nothing in the NLU
//! pipeline matched. Shows an example menu rather than a bare error.

use async_trait::async_trait;

use crate::context::ConversationContext;
use crate::dispatcher::{TaskHandler, TaskOutcome};
use crate::error::ResultCode;
use crate::slots::Slots;

const EXAMPLE_MENU: &str = "我還不太明白你的意思，你可以試試看：\n\
・「小明明天下午2點要上數學課」\n\
・「小明今天有什麼課？」\n\
・「提醒我小明的物理課」";

pub struct UnknownHandler;

#[async_trait]
impl TaskHandler for UnknownHandler {
    async fn handle(&self, _slots: &Slots, _user_id: &str, _ctx: &ConversationContext) -> TaskOutcome {
        TaskOutcome::failure(ResultCode::UnknownHelp, EXAMPLE_MENU)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn always_returns_unknown_help() {
        let outcome = UnknownHandler
            .handle(&Slots::default(), "u1", &ConversationContext::empty("u1"))
            .await;
        assert_eq!(outcome.code, Some(ResultCode::UnknownHelp));
    }
}
