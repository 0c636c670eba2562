//! `DecisionLogger` (spec §4.9): a bounded ring buffer of per-request
//! traces, inspected through the debug endpoint. Grounded on the teacher's
//! own decision to keep recent-activity state in-process rather than
//! reaching for a store for something this short-lived and operator-facing.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

const MAX_RECORDS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStage {
    Inbound,
    Nlp,
    Slots,
    Task,
    Render,
    Outbound,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct TraceRecord {
    pub trace_id: String,
    pub user_id: String,
    pub stage: TraceStage,
    pub summary: String,
    pub recorded_at: DateTime<Utc>,
}

impl TraceRecord {
    pub fn new(trace_id: impl Into<String>, user_id: impl Into<String>, stage: TraceStage, summary: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            user_id: user_id.into(),
            stage,
            summary: summary.into(),
            recorded_at: Utc::now(),
        }
    }
}

/// Bounded FIFO of the last `MAX_RECORDS` trace entries across all users.
/// Single global buffer rather than per-user, since the debug endpoint
/// (spec §4.9) inspects "the last N decisions" across the whole bot.
pub struct DecisionLogger {
    records: Mutex<VecDeque<TraceRecord>>,
}

impl Default for DecisionLogger {
    fn default() -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(MAX_RECORDS)),
        }
    }
}

impl DecisionLogger {
    pub fn record(&self, record: TraceRecord) {
        let mut records = self.records.lock().expect("decision logger lock poisoned");
        if records.len() >= MAX_RECORDS {
            records.pop_front();
        }
        records.push_back(record);
    }

    pub fn push(&self, trace_id: &str, user_id: &str, stage: TraceStage, summary: impl Into<String>) {
        self.record(TraceRecord::new(trace_id, user_id, stage, summary));
    }

    pub fn recent(&self, limit: usize) -> Vec<TraceRecord> {
        let records = self.records.lock().expect("decision logger lock poisoned");
        records.iter().rev().take(limit).cloned().collect()
    }

    pub fn recent_for_user(&self, user_id: &str, limit: usize) -> Vec<TraceRecord> {
        let records = self.records.lock().expect("decision logger lock poisoned");
        records
            .iter()
            .rev()
            .filter(|record| record.user_id == user_id)
            .take(limit)
            .cloned()
            .collect()
    }

    /// `GET /debug/decision?traceId=` (spec §4.9/§6): every stage line
    /// recorded under one request's `traceId`, oldest first so the
    /// pipeline reads top to bottom.
    pub fn recent_for_trace(&self, trace_id: &str) -> Vec<TraceRecord> {
        let records = self.records.lock().expect("decision logger lock poisoned");
        records
            .iter()
            .filter(|record| record.trace_id == trace_id)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_the_most_recent_records() {
        let logger = DecisionLogger::default();
        for i in 0..(MAX_RECORDS + 10) {
            logger.push("t1", "u1", TraceStage::Inbound, format!("msg {i}"));
        }
        let recent = logger.recent(MAX_RECORDS + 10);
        assert_eq!(recent.len(), MAX_RECORDS);
        assert_eq!(recent[0].summary, format!("msg {}", MAX_RECORDS + 9));
    }

    #[test]
    fn filters_by_user() {
        let logger = DecisionLogger::default();
        logger.push("t1", "u1", TraceStage::Nlp, "intent=add_course");
        logger.push("t2", "u2", TraceStage::Nlp, "intent=cancel_course");
        let recent = logger.recent_for_user("u1", 10);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].user_id, "u1");
    }

    #[test]
    fn filters_by_trace_id() {
        let logger = DecisionLogger::default();
        logger.push("t1", "u1", TraceStage::Inbound, "event received");
        logger.push("t1", "u1", TraceStage::Nlp, "intent=add_course");
        logger.push("t2", "u2", TraceStage::Inbound, "event received");
        let trace = logger.recent_for_trace("t1");
        assert_eq!(trace.len(), 2);
        assert!(trace.iter().all(|r| r.trace_id == "t1"));
    }
}
