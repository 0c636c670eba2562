//! LLM client interface (spec §1, §6): interface only per scope, backed by
//! a `reqwest`-based OpenAI-compatible chat-completions implementation.
//! `reqwest` is already one of the teacher's dependencies (used for the
//! PJATK scraper); this module is the first thing in the crate to use it
//! for a JSON API instead of scraping HTML. Bounded with
//! `tokio::time::timeout` per spec §5's 5 s LLM budget — both methods
//! "may fail without affecting correctness" (spec §6), so every failure
//! mode here maps to `Err` and callers are expected to fall through.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::AppError;
use crate::nlu::Intent;
use crate::slots::Slots;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifyResult {
    pub intent: Intent,
    pub confidence: f64,
    pub usage_tokens: Option<u32>,
}

#[async_trait]
pub trait LLMClient: Send + Sync {
    async fn classify_intent(&self, text: &str) -> Result<ClassifyResult, AppError>;
    async fn extract_slots(
        &self,
        text: &str,
        intent: Intent,
        existing_slots: &Slots,
    ) -> Result<Slots, AppError>;
}

pub struct HttpLlmClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl HttpLlmClient {
    pub fn new(api_key: String, base_url: String, model: String, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
            model,
            timeout,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    async fn chat(&self, system: &str, user: &str) -> Result<String, AppError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "temperature": 0.0,
            "response_format": {"type": "json_object"},
        });

        let request = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send();

        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| AppError::LlmTimeout(self.timeout.as_millis() as u64))?
            .map_err(|err| AppError::Llm(err.to_string()))?;

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|err| AppError::Llm(err.to_string()))?;

        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| AppError::Llm("missing choices[0].message.content".to_string()))
    }
}

#[async_trait]
impl LLMClient for HttpLlmClient {
    async fn classify_intent(&self, text: &str) -> Result<ClassifyResult, AppError> {
        const SYSTEM: &str = "You classify a parent's chat message about their child's course \
            schedule into one intent from a fixed set and report a 0-1 confidence. Reply with \
            JSON: {\"intent\": string, \"confidence\": number}.";

        let raw = self.chat(SYSTEM, text).await?;
        #[derive(Deserialize)]
        struct Raw {
            intent: String,
            confidence: f64,
        }
        let parsed: Raw =
            serde_json::from_str(&raw).map_err(|err| AppError::Llm(format!("bad classify response: {err}")))?;
        let intent: Intent = parsed
            .intent
            .parse()
            .map_err(|_| AppError::Llm(format!("intent {:?} outside closed set", parsed.intent)))?;

        Ok(ClassifyResult {
            intent,
            confidence: parsed.confidence,
            usage_tokens: None,
        })
    }

    async fn extract_slots(
        &self,
        text: &str,
        intent: Intent,
        existing_slots: &Slots,
    ) -> Result<Slots, AppError> {
        const SYSTEM: &str = "You extract structured course-schedule fields from a parent's chat \
            message. Only fill fields you can confidently find; leave others null. Reply with \
            JSON matching: {\"student_name\":string|null,\"course_name\":string|null,\
            \"schedule_time\":string|null,\"course_date\":string|null,\"location\":string|null,\
            \"teacher\":string|null,\"content\":string|null}.";

        let prompt = format!(
            "intent={intent:?}\nexisting_slots={}\ntext={text}",
            serde_json::to_string(existing_slots).unwrap_or_default()
        );

        let raw = self.chat(SYSTEM, &prompt).await?;
        serde_json::from_str(&raw).map_err(|err| AppError::Llm(format!("bad slot response: {err}")))
    }
}
