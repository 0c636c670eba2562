//! Per-user conversation state (spec §3 `ConversationContext`, §4.5
//! `ContextStore`). Shape grounded on `other_examples/0667cb0e_eoranged-
//! SwingBuddy__src-state-context.rs`'s `ConversationContext` (`expires_at`/
//! `updated_at`, scenario/step, generic `data` bag); backing KV is a new
//! `redis` dependency (the standard crate for a keyed-TTL store — the same
//! role SwingBuddy's own `RedisService` plays), with an in-memory `dashmap`
//! backend (already used by `skynet-gateway::AppState`) for tests and
//! single-process deployments.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::store::RecurrenceType;

pub const DEFAULT_TTL_SECS: i64 = 1800;
const MAX_HISTORY: usize = 5;
const MAX_MENTIONED_ENTITIES: usize = 10;
const AVAILABILITY_CACHE_SECS: i64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurrentFlow {
    None,
    CourseCreation,
    CourseModification,
    ContentRecording,
}

impl Default for CurrentFlow {
    fn default() -> Self {
        CurrentFlow::None
    }
}

/// Partially-filled slot record kept while a multi-turn flow is pending
/// (spec §3 `pendingData.slots`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PendingSlots {
    pub intent: Option<String>,
    pub existing_slots: serde_json::Value,
    pub missing_fields: Vec<String>,
    pub created_at_unix_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastAction {
    pub intent: String,
    pub slots: serde_json::Value,
    pub result: String,
    pub timestamp_unix_ms: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MentionedEntities {
    pub students: Vec<String>,
    pub courses: Vec<String>,
    pub dates: Vec<String>,
    pub times: Vec<String>,
}

impl MentionedEntities {
    fn push_deduped(list: &mut Vec<String>, value: String) {
        list.retain(|existing| existing != &value);
        list.push(value);
        if list.len() > MAX_MENTIONED_ENTITIES {
            list.remove(0);
        }
    }

    pub fn mention_student(&mut self, value: impl Into<String>) {
        Self::push_deduped(&mut self.students, value.into());
    }
    pub fn mention_course(&mut self, value: impl Into<String>) {
        Self::push_deduped(&mut self.courses, value.into());
    }
    pub fn mention_date(&mut self, value: impl Into<String>) {
        Self::push_deduped(&mut self.dates, value.into());
    }
    pub fn mention_time(&mut self, value: impl Into<String>) {
        Self::push_deduped(&mut self.times, value.into());
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: String,
    pub text: String,
    pub intent: Option<String>,
    pub slots: Option<serde_json::Value>,
    pub timestamp_unix_ms: i64,
    pub quick_reply: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActiveQuerySession {
    pub student_name: Option<String>,
    pub time_reference: Option<String>,
}

/// Per-user conversation state document, spec §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationContext {
    pub user_id: String,
    pub last_activity_unix_ms: i64,
    pub current_flow: CurrentFlow,
    pub expecting_input: Vec<String>,
    pub pending_data: Option<PendingSlots>,
    pub last_actions: HashMap<String, LastAction>,
    pub mentioned_entities: MentionedEntities,
    pub history: Vec<HistoryTurn>,
    pub active_query_session: Option<ActiveQuerySession>,
}

impl ConversationContext {
    pub fn empty(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            last_activity_unix_ms: Utc::now().timestamp_millis(),
            current_flow: CurrentFlow::None,
            expecting_input: Vec::new(),
            pending_data: None,
            last_actions: HashMap::new(),
            mentioned_entities: MentionedEntities::default(),
            history: Vec::new(),
            active_query_session: None,
        }
    }

    pub fn is_expired(&self, ttl_secs: i64, now: DateTime<Utc>) -> bool {
        let age_ms = now.timestamp_millis() - self.last_activity_unix_ms;
        age_ms > ttl_secs * 1000
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity_unix_ms = now.timestamp_millis();
        if self.history.len() > MAX_HISTORY {
            let drop = self.history.len() - MAX_HISTORY;
            self.history.drain(0..drop);
        }
    }

    pub fn record_user_message(
        &mut self,
        text: impl Into<String>,
        intent: Option<String>,
        slots: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) {
        self.history.push(HistoryTurn {
            role: "user".to_string(),
            text: text.into(),
            intent,
            slots,
            timestamp_unix_ms: now.timestamp_millis(),
            quick_reply: None,
        });
        self.touch(now);
    }

    pub fn record_bot_response(
        &mut self,
        text: impl Into<String>,
        quick_reply: Option<bool>,
        now: DateTime<Utc>,
    ) {
        self.history.push(HistoryTurn {
            role: "bot".to_string(),
            text: text.into(),
            intent: None,
            slots: None,
            timestamp_unix_ms: now.timestamp_millis(),
            quick_reply,
        });
        self.touch(now);
    }

    pub fn record_task_result(
        &mut self,
        intent: impl Into<String>,
        slots: serde_json::Value,
        result: impl Into<String>,
        success: bool,
        now: DateTime<Utc>,
    ) {
        let intent = intent.into();
        self.last_actions.insert(
            intent.clone(),
            LastAction {
                intent,
                slots,
                result: result.into(),
                timestamp_unix_ms: now.timestamp_millis(),
            },
        );
        if success {
            self.current_flow = CurrentFlow::None;
            self.expecting_input = vec!["confirmation".to_string(), "modification".to_string()];
        }
        self.touch(now);
    }

    pub fn set_expected_input(
        &mut self,
        flow: CurrentFlow,
        inputs: Vec<String>,
        pending_slots: Option<PendingSlots>,
    ) {
        self.current_flow = flow;
        self.expecting_input = inputs;
        self.pending_data = pending_slots;
    }

    pub fn clear_expected_input(&mut self) {
        self.expecting_input.clear();
        self.pending_data = None;
    }

    /// Resets the pinned `activeQuerySession` when the new utterance names
    /// a *different* student than the one currently pinned (spec §4.5).
    pub fn set_active_query_session(&mut self, student_name: Option<String>, time_reference: Option<String>) {
        let should_reset = match (&self.active_query_session, &student_name) {
            (Some(existing), Some(new)) => existing.student_name.as_deref() != Some(new.as_str()),
            _ => false,
        };
        if should_reset || self.active_query_session.is_none() {
            self.active_query_session = Some(ActiveQuerySession {
                student_name,
                time_reference,
            });
        } else if let Some(session) = self.active_query_session.as_mut() {
            if time_reference.is_some() {
                session.time_reference = time_reference;
            }
        }
    }

    pub fn get_last_action(&self, intent_type: Option<&str>) -> Option<&LastAction> {
        match intent_type {
            Some(intent) => self.last_actions.get(intent),
            None => self.last_actions.values().max_by_key(|a| a.timestamp_unix_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub features: Vec<String>,
}

#[async_trait]
pub trait ContextBackend: Send + Sync {
    async fn get_raw(&self, key: &str) -> Result<Option<String>, AppError>;
    async fn set_raw(&self, key: &str, value: String, ttl_secs: i64) -> Result<(), AppError>;
    async fn delete_raw(&self, key: &str) -> Result<(), AppError>;
    async fn ping(&self) -> Result<(), AppError>;
}

/// In-process backend for tests and single-instance deployments, built on
/// `dashmap` (the same concurrent-map crate `skynet-gateway::AppState`
/// uses for its `ws_clients`/`notifications` maps).
#[derive(Default)]
pub struct InMemoryContextBackend {
    entries: dashmap::DashMap<String, (String, DateTime<Utc>)>,
}

impl InMemoryContextBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContextBackend for InMemoryContextBackend {
    async fn get_raw(&self, key: &str) -> Result<Option<String>, AppError> {
        match self.entries.get(key) {
            Some(entry) if entry.1 > Utc::now() => Ok(Some(entry.0.clone())),
            Some(_) => {
                self.entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_raw(&self, key: &str, value: String, ttl_secs: i64) -> Result<(), AppError> {
        let expires = Utc::now() + chrono::Duration::seconds(ttl_secs);
        self.entries.insert(key.to_string(), (value, expires));
        Ok(())
    }

    async fn delete_raw(&self, key: &str) -> Result<(), AppError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }
}

pub struct RedisContextBackend {
    manager: redis::aio::ConnectionManager,
}

impl RedisContextBackend {
    pub async fn connect(url: &str) -> Result<Self, AppError> {
        let client = redis::Client::open(url)
            .map_err(|err| AppError::ContextUnavailable(err.to_string()))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|err| AppError::ContextUnavailable(err.to_string()))?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl ContextBackend for RedisContextBackend {
    async fn get_raw(&self, key: &str) -> Result<Option<String>, AppError> {
        use redis::AsyncCommands;
        let mut conn = self.manager.clone();
        conn.get(key)
            .await
            .map_err(|err| AppError::ContextUnavailable(err.to_string()))
    }

    async fn set_raw(&self, key: &str, value: String, ttl_secs: i64) -> Result<(), AppError> {
        use redis::AsyncCommands;
        let mut conn = self.manager.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl_secs.max(1) as u64)
            .await
            .map_err(|err| AppError::ContextUnavailable(err.to_string()))
    }

    async fn delete_raw(&self, key: &str) -> Result<(), AppError> {
        use redis::AsyncCommands;
        let mut conn = self.manager.clone();
        conn.del::<_, ()>(key)
            .await
            .map_err(|err| AppError::ContextUnavailable(err.to_string()))
    }

    async fn ping(&self) -> Result<(), AppError> {
        use redis::AsyncCommands;
        let mut conn = self.manager.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|err| AppError::ContextUnavailable(err.to_string()))?;
        Ok(())
    }
}

/// `ContextStore` (spec §4.5). Degrades gracefully when the backend is
/// unreachable: writes return `false`, reads return a fresh empty context,
/// matching "the system must remain functional in stateless degraded mode."
pub struct ContextStore {
    backend: Arc<dyn ContextBackend>,
    ttl_secs: i64,
    last_backend_error_unix_ms: AtomicI64,
}

impl ContextStore {
    pub fn new(backend: Arc<dyn ContextBackend>, ttl_secs: i64) -> Self {
        Self {
            backend,
            ttl_secs,
            last_backend_error_unix_ms: AtomicI64::new(0),
        }
    }

    fn key(user_id: &str) -> String {
        format!("conversation:{user_id}")
    }

    fn mark_unavailable(&self) {
        self.last_backend_error_unix_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// Availability is cached for 5 minutes (spec §4.5) to avoid thrashing
    /// a down backend with a health check per request.
    fn recently_unavailable(&self) -> bool {
        let last = self.last_backend_error_unix_ms.load(Ordering::Relaxed);
        if last == 0 {
            return false;
        }
        Utc::now().timestamp_millis() - last < AVAILABILITY_CACHE_SECS * 1000
    }

    pub async fn get(&self, user_id: &str) -> ConversationContext {
        if self.recently_unavailable() {
            return ConversationContext::empty(user_id);
        }
        match self.backend.get_raw(&Self::key(user_id)).await {
            Ok(Some(raw)) => match serde_json::from_str::<ConversationContext>(&raw) {
                Ok(ctx) if !ctx.is_expired(self.ttl_secs, Utc::now()) => ctx,
                _ => ConversationContext::empty(user_id),
            },
            Ok(None) => ConversationContext::empty(user_id),
            Err(_) => {
                self.mark_unavailable();
                ConversationContext::empty(user_id)
            }
        }
    }

    pub async fn save(&self, ctx: &ConversationContext) -> bool {
        let Ok(raw) = serde_json::to_string(ctx) else {
            return false;
        };
        match self
            .backend
            .set_raw(&Self::key(&ctx.user_id), raw, self.ttl_secs)
            .await
        {
            Ok(()) => true,
            Err(_) => {
                self.mark_unavailable();
                false
            }
        }
    }

    pub async fn clear(&self, user_id: &str) -> bool {
        self.backend.delete_raw(&Self::key(user_id)).await.is_ok()
    }

    pub async fn set_expected_input(
        &self,
        user_id: &str,
        flow: CurrentFlow,
        inputs: Vec<String>,
        pending_slots: Option<PendingSlots>,
    ) -> bool {
        let mut ctx = self.get(user_id).await;
        ctx.set_expected_input(flow, inputs, pending_slots);
        self.save(&ctx).await
    }

    pub async fn clear_expected_input(&self, user_id: &str) -> bool {
        let mut ctx = self.get(user_id).await;
        ctx.clear_expected_input();
        self.save(&ctx).await
    }

    pub async fn record_user_message(
        &self,
        user_id: &str,
        text: &str,
        intent: Option<String>,
        slots: Option<serde_json::Value>,
    ) -> bool {
        let mut ctx = self.get(user_id).await;
        ctx.record_user_message(text, intent, slots, Utc::now());
        self.save(&ctx).await
    }

    pub async fn record_bot_response(&self, user_id: &str, text: &str, quick_reply: Option<bool>) -> bool {
        let mut ctx = self.get(user_id).await;
        ctx.record_bot_response(text, quick_reply, Utc::now());
        self.save(&ctx).await
    }

    pub async fn record_task_result(
        &self,
        user_id: &str,
        intent: &str,
        slots: serde_json::Value,
        result: &str,
        success: bool,
    ) -> bool {
        let mut ctx = self.get(user_id).await;
        ctx.record_task_result(intent, slots, result, success, Utc::now());
        self.save(&ctx).await
    }

    pub async fn set_active_query_session(
        &self,
        user_id: &str,
        student_name: Option<String>,
        time_reference: Option<String>,
    ) -> bool {
        let mut ctx = self.get(user_id).await;
        ctx.set_active_query_session(student_name, time_reference);
        self.save(&ctx).await
    }

    pub async fn get_last_action(&self, user_id: &str, intent_type: Option<&str>) -> Option<LastAction> {
        let ctx = self.get(user_id).await;
        ctx.get_last_action(intent_type).cloned()
    }

    pub async fn health_check(&self) -> HealthStatus {
        match tokio::time::timeout(StdDuration::from_secs(2), self.backend.ping()).await {
            Ok(Ok(())) => HealthStatus {
                status: "ok".to_string(),
                features: vec!["ttl".to_string()],
            },
            _ => HealthStatus {
                status: "degraded".to_string(),
                features: vec![],
            },
        }
    }
}

/// Used by SlotExtractor's recurrence detection (spec §4.4) to gate the
/// `daily` recurrence pattern behind `ENABLE_RECURRING_COURSES`.
pub fn recurrence_allowed(recurrence: RecurrenceType, enable_recurring_courses: bool) -> bool {
    match recurrence {
        RecurrenceType::Daily | RecurrenceType::Weekly | RecurrenceType::Monthly => {
            enable_recurring_courses
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_context_for_absent_user() {
        let backend = Arc::new(InMemoryContextBackend::new());
        let store = ContextStore::new(backend, DEFAULT_TTL_SECS);
        let ctx = store.get("u1").await;
        assert!(ctx.history.is_empty());
        assert_eq!(ctx.current_flow, CurrentFlow::None);
    }

    #[tokio::test]
    async fn save_then_get_round_trips() {
        let backend = Arc::new(InMemoryContextBackend::new());
        let store = ContextStore::new(backend, DEFAULT_TTL_SECS);
        let ok = store
            .record_user_message("u1", "小明明天要上數學課", Some("add_course".into()), None)
            .await;
        assert!(ok);
        let ctx = store.get("u1").await;
        assert_eq!(ctx.history.len(), 1);
    }

    #[test]
    fn history_truncates_to_five() {
        let mut ctx = ConversationContext::empty("u1");
        for i in 0..8 {
            ctx.record_user_message(format!("msg {i}"), None, None, Utc::now());
        }
        assert_eq!(ctx.history.len(), 5);
    }

    #[test]
    fn mentioned_entities_dedupe_and_cap_at_ten() {
        let mut entities = MentionedEntities::default();
        for i in 0..15 {
            entities.mention_student(format!("student-{}", i % 3));
        }
        assert!(entities.students.len() <= 10);
    }

    #[test]
    fn active_query_session_resets_on_different_student() {
        let mut ctx = ConversationContext::empty("u1");
        ctx.set_active_query_session(Some("小明".to_string()), Some("today".to_string()));
        ctx.set_active_query_session(Some("小王".to_string()), None);
        assert_eq!(
            ctx.active_query_session.unwrap().student_name,
            Some("小王".to_string())
        );
    }

    #[test]
    fn expired_context_detected() {
        let mut ctx = ConversationContext::empty("u1");
        ctx.last_activity_unix_ms = Utc::now().timestamp_millis() - (DEFAULT_TTL_SECS + 60) * 1000;
        assert!(ctx.is_expired(DEFAULT_TTL_SECS, Utc::now()));
    }
}
