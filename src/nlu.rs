//! NLUPipeline (spec §4.3): the layered intent classifier. No repo in the
//! pack implements a rule-scored classifier; built fresh using `regex` (new
//! dependency) for the pattern layer and the teacher's own enum/strum-derive
//! convention (`hdbg-pjatkbot/src/db.rs::Language`) for the closed intent set.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::IntentRule;
use crate::context::ConversationContext;
use crate::llm_client::LLMClient;

/// Closed intent set, spec §4.3.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[strum(serialize_all = "snake_case")]
pub enum Intent {
    AddCourse,
    CreateRecurringCourse,
    ModifyCourse,
    CancelCourse,
    StopRecurringCourse,
    QuerySchedule,
    QueryCourseContent,
    RecordContent,
    AddCourseContent,
    SetReminder,
    ConfirmAction,
    ModifyAction,
    CancelAction,
    RestartInput,
    CorrectionIntent,
    Unknown,
}

const DOMAIN_SWITCH_TOKENS: [&str; 7] = ["課表", "查詢", "新增", "刪除", "取消", "設定", "記錄"];
const CONTEXT_REQUIRED_INTENTS: [Intent; 4] = [
    Intent::ConfirmAction,
    Intent::ModifyAction,
    Intent::CancelAction,
    Intent::CorrectionIntent,
];

#[derive(Debug, Clone)]
pub struct Decision {
    pub intent: Intent,
    pub confidence: Option<f64>,
    pub via_supplement_routing: bool,
}

pub struct NLUPipeline<'a> {
    pub llm_client: Option<&'a dyn LLMClient>,
    pub enable_ai_fallback: bool,
    pub ai_fallback_min_confidence: f64,
    pub ai_fallback_timeout: Duration,
    pub intent_rules: &'a [IntentRule],
    pub timezone: chrono_tz::Tz,
    pub enable_recurring_courses: bool,
}

fn modify_pattern() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| Regex::new("改到|改成|修改|更改|換到|換成|改").unwrap())
}

fn add_action_pattern() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| Regex::new("要上|安排|新增").unwrap())
}

fn time_hint_pattern() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| Regex::new(r"點|:|上午|中午|下午|晚上|每週|每周|每天|每月").unwrap())
}

fn query_cue_pattern() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| {
        Regex::new("課表|查詢|看一下|有什麼課|今天|明天|後天|這週|下週|本週|課程安排|幾點").unwrap()
    })
}

impl<'a> NLUPipeline<'a> {
    /// `decide(user, text, context) -> Intent`. Strict order, first
    /// decisive layer wins; exceptions at any layer fall through to layer
    /// 4 and ultimately `unknown` (spec §4.3). `reference_time` is only
    /// needed by the supplement-routing completeness check (step 2), which
    /// resolves relative dates/times the same way `SlotExtractor` does.
    pub async fn decide(
        &self,
        text: &str,
        context: &ConversationContext,
        reference_time: chrono::DateTime<chrono_tz::Tz>,
    ) -> Decision {
        // 1. Safety short-circuit.
        if text.contains('提') && text.contains('醒') {
            return Decision {
                intent: Intent::SetReminder,
                confidence: None,
                via_supplement_routing: false,
            };
        }
        if ["取消", "刪除", "刪掉"].iter().any(|tok| text.contains(tok)) {
            return Decision {
                intent: Intent::CancelCourse,
                confidence: None,
                via_supplement_routing: false,
            };
        }

        // 2. Supplement routing.
        if let Some(decision) = self.supplement_routing(text, context, reference_time) {
            return decision;
        }

        // 3. LLM primary classifier.
        if self.enable_ai_fallback {
            if let Some(client) = self.llm_client {
                let call = client.classify_intent(text);
                if let Ok(Ok(result)) = tokio::time::timeout(self.ai_fallback_timeout, call).await {
                    if result.confidence >= self.ai_fallback_min_confidence {
                        return self.gate_context_required(result.intent, context, None);
                    }
                }
            }
        }

        // 4. Simple deterministic rules.
        if let Some(intent) = self.simple_deterministic_rules(text) {
            return self.gate_context_required(intent, context, None);
        }

        // 5. RuleMatcher over the full intent-rule table.
        if let Some(intent) = self.rule_matcher(text) {
            return self.gate_context_required(intent, context, None);
        }

        // 6/7. Context-required gate already folds into `unknown` above;
        // nothing matched.
        Decision {
            intent: Intent::Unknown,
            confidence: None,
            via_supplement_routing: false,
        }
    }

    /// Spec §4.3 step 2: re-extract against the pending intent and only
    /// route to it if the *merged* slots (fresh text merged over
    /// `pendingData.slots`, never replacing what the fresh text supplies)
    /// satisfy `isCompleteForIntent` — not merely "there is a pending
    /// intent". Otherwise fall through to the remaining classifier layers.
    fn supplement_routing(
        &self,
        text: &str,
        context: &ConversationContext,
        reference_time: chrono::DateTime<chrono_tz::Tz>,
    ) -> Option<Decision> {
        if context.expecting_input.is_empty() {
            return None;
        }
        if DOMAIN_SWITCH_TOKENS.iter().any(|tok| text.contains(tok)) {
            return None;
        }
        let pending = context.pending_data.as_ref()?;
        let age_ms = chrono::Utc::now().timestamp_millis() - pending.created_at_unix_ms;
        if age_ms >= 120_000 {
            return None;
        }
        let pending_intent: Intent = pending.intent.as_deref()?.parse().ok()?;

        let mut merged =
            crate::slots::SlotExtractor::rule_based_slots(text, self.timezone, reference_time, self.enable_recurring_courses);
        let existing: crate::slots::Slots = serde_json::from_value(pending.existing_slots.clone()).unwrap_or_default();
        crate::slots::merge_over(&mut merged, existing);
        if !crate::slots::is_complete_for_intent(&merged, pending_intent) {
            return None;
        }

        Some(Decision {
            intent: pending_intent,
            confidence: None,
            via_supplement_routing: true,
        })
    }

    fn simple_deterministic_rules(&self, text: &str) -> Option<Intent> {
        if modify_pattern().is_match(text) {
            return Some(Intent::ModifyCourse);
        }
        if add_action_pattern().is_match(text) && time_hint_pattern().is_match(text) {
            return Some(Intent::AddCourse);
        }
        if query_cue_pattern().is_match(text) {
            return Some(Intent::QuerySchedule);
        }
        None
    }

    /// `score = 10*match(keywords) + 15*match(patterns) + (20 - priority)`.
    fn rule_matcher(&self, text: &str) -> Option<Intent> {
        let mut best: Option<(i32, i32, Intent)> = None;

        for rule in self.intent_rules {
            if rule.exclusions.iter().any(|ex| text.contains(ex.as_str())) {
                continue;
            }
            if !rule.required_keywords.is_empty()
                && !rule.required_keywords.iter().any(|kw| text.contains(kw.as_str()))
            {
                continue;
            }
            if !rule
                .required_groups
                .iter()
                .all(|group| group.iter().any(|token| text.contains(token.as_str())))
            {
                continue;
            }

            let keyword_hits = rule.keywords.iter().filter(|kw| text.contains(kw.as_str())).count() as i32;
            let pattern_hits = rule
                .patterns
                .iter()
                .filter(|pattern| {
                    Regex::new(pattern.as_str())
                        .map(|re| re.is_match(text))
                        .unwrap_or(false)
                })
                .count() as i32;

            if keyword_hits == 0 && pattern_hits == 0 {
                continue;
            }

            let score = 10 * keyword_hits + 15 * pattern_hits + (20 - rule.priority);
            let Ok(intent) = rule.intent.parse::<Intent>() else {
                continue;
            };

            let replace = match &best {
                None => true,
                Some((best_score, best_priority, _)) => {
                    score > *best_score || (score == *best_score && rule.priority < *best_priority)
                }
            };
            if replace {
                best = Some((score, rule.priority, intent));
            }
        }

        best.map(|(_, _, intent)| intent)
    }

    fn gate_context_required(
        &self,
        intent: Intent,
        context: &ConversationContext,
        confidence: Option<f64>,
    ) -> Decision {
        if CONTEXT_REQUIRED_INTENTS.contains(&intent) {
            let has_prior_action = !context.last_actions.is_empty();
            let expecting_relevant = context
                .expecting_input
                .iter()
                .any(|tag| ["confirmation", "modification", "cancellation"].contains(&tag.as_str()));
            if !has_prior_action && !expecting_relevant {
                return Decision {
                    intent: Intent::Unknown,
                    confidence,
                    via_supplement_routing: false,
                };
            }
        }
        Decision {
            intent,
            confidence,
            via_supplement_routing: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PendingSlots;
    use chrono::TimeZone;

    fn pipeline(intent_rules: &[IntentRule]) -> NLUPipeline<'_> {
        NLUPipeline {
            llm_client: None,
            enable_ai_fallback: false,
            ai_fallback_min_confidence: 0.7,
            ai_fallback_timeout: Duration::from_secs(5),
            intent_rules,
            timezone: crate::time_parser::DEFAULT_TIMEZONE,
            enable_recurring_courses: true,
        }
    }

    fn reference() -> chrono::DateTime<chrono_tz::Tz> {
        crate::time_parser::DEFAULT_TIMEZONE.with_ymd_and_hms(2025, 8, 10, 9, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn reminder_keyword_short_circuits() {
        let rules = [];
        let decision = pipeline(&rules)
            .decide("提醒我小明的物理課", &ConversationContext::empty("u1"), reference())
            .await;
        assert_eq!(decision.intent, Intent::SetReminder);
    }

    #[tokio::test]
    async fn cancel_keyword_short_circuits() {
        let rules = [];
        let decision = pipeline(&rules)
            .decide("取消小明的晨練課", &ConversationContext::empty("u1"), reference())
            .await;
        assert_eq!(decision.intent, Intent::CancelCourse);
    }

    #[tokio::test]
    async fn add_course_deterministic_rule() {
        let rules = [];
        let decision = pipeline(&rules)
            .decide("小明明天下午2點要上數學課", &ConversationContext::empty("u1"), reference())
            .await;
        assert_eq!(decision.intent, Intent::AddCourse);
    }

    #[tokio::test]
    async fn query_schedule_deterministic_rule() {
        let rules = [];
        let decision = pipeline(&rules)
            .decide("小王今天有什麼課？", &ConversationContext::empty("u1"), reference())
            .await;
        assert_eq!(decision.intent, Intent::QuerySchedule);
    }

    #[tokio::test]
    async fn confirm_action_without_context_downgrades_to_unknown() {
        let rule = IntentRule {
            intent: "confirm_action".to_string(),
            keywords: vec!["確認".to_string()],
            patterns: vec![],
            required_keywords: vec![],
            required_groups: vec![],
            exclusions: vec![],
            priority: 10,
            requires_context: true,
        };
        let rules = [rule];
        let decision = pipeline(&rules)
            .decide("確認", &ConversationContext::empty("u1"), reference())
            .await;
        assert_eq!(decision.intent, Intent::Unknown);
    }

    #[tokio::test]
    async fn supplement_routing_requires_completeness_after_merge() {
        // spec §8 scenario 2, turn 2: pending add_course slots carry
        // {courseName, scheduleTime}; "小明" alone supplies only
        // studentName. Only the *merge* is complete, so decide() must
        // route back to add_course rather than leaving it to fall through
        // to the rule layers (which would misclassify a bare name).
        let mut ctx = ConversationContext::empty("u1");
        ctx.expecting_input = vec!["student_name_input".to_string()];
        ctx.pending_data = Some(PendingSlots {
            intent: Some("add_course".to_string()),
            existing_slots: serde_json::json!({
                "course_name": "數學課",
                "schedule_time": "15:00",
            }),
            missing_fields: vec!["student_name".to_string()],
            created_at_unix_ms: chrono::Utc::now().timestamp_millis(),
        });

        let rules = [];
        let decision = pipeline(&rules).decide("小明", &ctx, reference()).await;
        assert_eq!(decision.intent, Intent::AddCourse);
        assert!(decision.via_supplement_routing);
    }

    #[tokio::test]
    async fn supplement_routing_falls_through_when_merge_still_incomplete() {
        let mut ctx = ConversationContext::empty("u1");
        ctx.expecting_input = vec!["student_name_input".to_string()];
        ctx.pending_data = Some(PendingSlots {
            intent: Some("add_course".to_string()),
            existing_slots: serde_json::json!({}),
            missing_fields: vec!["student_name".to_string(), "course_name".to_string()],
            created_at_unix_ms: chrono::Utc::now().timestamp_millis(),
        });

        let rules = [];
        let decision = pipeline(&rules).decide("小明", &ctx, reference()).await;
        assert!(!decision.via_supplement_routing);
    }

    #[test]
    fn rule_matcher_prefers_higher_score() {
        let low_priority = IntentRule {
            intent: "record_content".to_string(),
            keywords: vec!["記錄".to_string()],
            patterns: vec![],
            required_keywords: vec![],
            required_groups: vec![],
            exclusions: vec![],
            priority: 4,
            requires_context: false,
        };
        let rules = [low_priority];
        let pipeline = pipeline(&rules);
        assert_eq!(pipeline.rule_matcher("幫我記錄今天的課"), Some(Intent::RecordContent));
    }
}
