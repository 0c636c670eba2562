//! LINE webhook front door (spec §4.9): signature verification, per-event
//! orchestration of the NLU/slot/dispatch/render pipeline, and the health/
//! debug endpoints. Grounded on `skynet-gateway`'s `app.rs` + `http/
//! webhooks.rs` + `http/health.rs` (axum `Router<Arc<AppState>>`, a single
//! signed-ingress handler, a `GET /health` liveness probe) — this crate
//! swaps its generic multi-source HMAC dispatch for LINE's single fixed
//! signature scheme and its `tracing` calls for the rest of this crate's
//! `slog`.

pub mod signature;
pub mod trace;

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::context::{CurrentFlow, PendingSlots};
use crate::db::Language;
use crate::error::ResultCode;
use crate::messaging::{MessagingClient, OutboundMessage};
use crate::nlu::{Intent, NLUPipeline};
use crate::renderer::{self, Renderer};
use crate::slots::{self, SlotExtractor, Slots, TimeReference};
use crate::AppState;
use trace::TraceStage;

/// No per-parent language preference is surfaced by `CourseStore` yet
/// (`get_or_create_parent` always persists `Language::Chinese`), so every
/// reply renders in that default until a language-switching feature lands.
fn reply_locale() -> &'static str {
    renderer::locale_for(Language::Chinese)
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/callback", post(callback))
        .route("/health", get(health))
        .route("/health/deps", get(health_deps))
        .route("/health/gcal", get(health_gcal))
        .route("/debug/decision", get(debug_decision))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct WebhookBody {
    #[serde(default)]
    events: Vec<LineEvent>,
}

#[derive(Debug, Deserialize)]
struct LineEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "replyToken", default)]
    reply_token: Option<String>,
    #[serde(default)]
    source: Option<EventSource>,
    #[serde(default)]
    message: Option<EventMessage>,
    #[serde(default)]
    postback: Option<PostbackPayload>,
}

#[derive(Debug, Deserialize)]
struct EventSource {
    #[serde(rename = "userId", default)]
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PostbackPayload {
    data: String,
}

#[derive(Debug, Deserialize)]
pub struct DecisionQuery {
    #[serde(rename = "traceId", default)]
    trace_id: Option<String>,
    #[serde(rename = "userId", default)]
    user_id: Option<String>,
}

async fn callback(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> impl IntoResponse {
    let config = state.config.config();
    let qa_mode_header = headers.get("x-qa-mode").and_then(|v| v.to_str().ok());

    let bypass = signature::should_bypass_signature(
        &config.node_env,
        config.features.allow_test_webhook,
        config.features.use_mock_line_service,
        qa_mode_header,
    );

    // Spec §4.9: `x-qa-mode: real` header or `qaMode=real` query param force
    // the real messaging client even for a `U_test_`-prefixed user id.
    let qa_override_real =
        qa_mode_header == Some("real") || query.get("qaMode").map(String::as_str) == Some("real");

    if bypass {
        slog::info!(state.logger, "webhook.callback.signature_bypassed");
    } else {
        let Some(channel_secret) = config.channel_secret.as_deref() else {
            slog::error!(state.logger, "webhook.callback.missing_channel_secret");
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"status": "error"}))).into_response();
        };
        let signature_header = headers.get("x-line-signature").and_then(|v| v.to_str().ok());
        let Some(signature_header) = signature_header else {
            return (StatusCode::BAD_REQUEST, Json(json!({"status": "error"}))).into_response();
        };
        if signature::verify_signature(channel_secret, &body, signature_header).is_err() {
            return (StatusCode::BAD_REQUEST, Json(json!({"status": "error"}))).into_response();
        }
    }

    let parsed: WebhookBody = match serde_json::from_slice(&body) {
        Ok(parsed) => parsed,
        Err(err) => {
            slog::warn!(state.logger, "webhook.callback.malformed_body"; "err" => %err);
            return (StatusCode::BAD_REQUEST, Json(json!({"status": "error"}))).into_response();
        }
    };

    let reset_context = headers
        .get("x-qa-reset-context")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    // Sequential per delivery, preserving per-user ordering (spec §5).
    for event in parsed.events {
        handle_event(&state, event, reset_context, qa_override_real).await;
    }

    (StatusCode::OK, Json(json!({"status": "ok"}))).into_response()
}

async fn handle_event(state: &Arc<AppState>, event: LineEvent, reset_context: bool, qa_override_real: bool) {
    let trace_id = uuid::Uuid::new_v4().to_string();
    let user_id = event.source.as_ref().and_then(|s| s.user_id.clone()).unwrap_or_default();

    state.decisions.push(&trace_id, &user_id, TraceStage::Inbound, format!("type={}", event.kind));

    if reset_context && !user_id.is_empty() {
        state.context_store.clear(&user_id).await;
    }

    let messaging = state.messaging_for(&user_id, qa_override_real);

    let result = match event.kind.as_str() {
        "message" => handle_message(state, &messaging, &trace_id, &user_id, event).await,
        "postback" => handle_postback(state, &messaging, &trace_id, &user_id, event).await,
        "follow" => {
            let reply_token = event.reply_token.unwrap_or_default();
            handle_follow(state, &messaging, &trace_id, &user_id, &reply_token).await
        }
        "unfollow" => Ok(()),
        other => {
            state.decisions.push(&trace_id, &user_id, TraceStage::Error, format!("unhandled event type {other}"));
            Ok(())
        }
    };

    if let Err(err) = result {
        slog::error!(state.logger, "webhook.callback.event_failed"; "trace_id" => %trace_id, "err" => %err);
        state.decisions.push(&trace_id, &user_id, TraceStage::Error, err.to_string());
    }
}

async fn handle_message(
    state: &Arc<AppState>,
    messaging: &Arc<dyn MessagingClient>,
    trace_id: &str,
    user_id: &str,
    event: LineEvent,
) -> eyre::Result<()> {
    let Some(message) = event.message else { return Ok(()) };
    let reply_token = event.reply_token.unwrap_or_default();

    match message.kind.as_str() {
        "text" => {
            let text = message.text.unwrap_or_default();
            run_pipeline(state, messaging, trace_id, user_id, &reply_token, &text).await
        }
        "image" => {
            let Some(message_id) = message.id else { return Ok(()) };
            messaging.get_message_content(&message_id).await?;

            let mut ctx = state.context_store.get(user_id).await;
            let image_slots = Slots {
                image_ref: Some(message_id),
                time_reference: Some(TimeReference::Today),
                student_name: ctx.mentioned_entities.students.last().cloned(),
                course_name: ctx.mentioned_entities.courses.last().cloned(),
                ..Default::default()
            };

            state.decisions.push(trace_id, user_id, TraceStage::Slots, "message/image -> record_content");
            let outcome = state.dispatcher.dispatch(Intent::RecordContent, &image_slots, user_id, &ctx).await;
            state.decisions.push(trace_id, user_id, TraceStage::Task, format!("success={} code={:?}", outcome.success, outcome.code));

            let rendered = Renderer::render(Intent::RecordContent, &image_slots, &outcome, reply_locale());
            state.decisions.push(trace_id, user_id, TraceStage::Render, rendered.text.clone());

            let slots_json = serde_json::to_value(&image_slots).unwrap_or_default();
            ctx.record_task_result(
                Intent::RecordContent.to_string(),
                slots_json,
                outcome.code.map(|c| c.to_string()).unwrap_or_default(),
                outcome.success,
                chrono::Utc::now(),
            );
            ctx.record_bot_response(&rendered.text, Some(rendered.quick_reply.is_some()), chrono::Utc::now());
            state.context_store.save(&ctx).await;

            messaging.reply(&reply_token, vec![rendered.to_outbound()]).await?;
            state.decisions.push(trace_id, user_id, TraceStage::Outbound, "replied");
            Ok(())
        }
        _ => Ok(()),
    }
}

/// `message/text` pipeline: spec §4.9's `ContextStore.get -> NLUPipeline.decide
/// -> SlotExtractor.extract -> Dispatcher.dispatch -> Renderer.render ->
/// MessagingClient.reply -> ContextStore.save`, with one trace line per stage.
async fn run_pipeline(
    state: &Arc<AppState>,
    messaging: &Arc<dyn MessagingClient>,
    trace_id: &str,
    user_id: &str,
    reply_token: &str,
    text: &str,
) -> eyre::Result<()> {
    let config = state.config.config();
    let mut ctx = state.context_store.get(user_id).await;
    let reference_time = chrono::Utc::now().with_timezone(&state.handler_config.timezone);

    let llm_client = state.llm_client.as_deref();
    let nlu = NLUPipeline {
        llm_client,
        enable_ai_fallback: config.features.enable_ai_fallback,
        ai_fallback_min_confidence: config.features.ai_fallback_min_confidence,
        ai_fallback_timeout: std::time::Duration::from_millis(config.features.ai_fallback_timeout_ms),
        intent_rules: state.config.intent_rules(),
        timezone: state.handler_config.timezone,
        enable_recurring_courses: config.features.enable_recurring_courses,
    };
    let decision = nlu.decide(text, &ctx, reference_time).await;
    state.decisions.push(
        trace_id,
        user_id,
        TraceStage::Nlp,
        format!("intent={} via_supplement={}", decision.intent, decision.via_supplement_routing),
    );

    let extractor = SlotExtractor {
        llm_client,
        enable_ai_fallback: config.features.enable_ai_fallback,
        enable_recurring_courses: config.features.enable_recurring_courses,
        timezone: state.handler_config.timezone,
    };
    let mut slots = extractor.extract(text, decision.intent, user_id, &ctx, reference_time).await;

    // spec §4.3 step 2 / §4.4: a supplement-routing turn's fresh slots are
    // only part of the picture — fold the prior turn's pendingData.slots
    // back in without overwriting anything the new text just supplied.
    if decision.via_supplement_routing {
        if let Some(pending) = ctx.pending_data.clone() {
            let existing: Slots = serde_json::from_value(pending.existing_slots).unwrap_or_default();
            slots::merge_over(&mut slots, existing);
        }
    }

    state.decisions.push(
        trace_id,
        user_id,
        TraceStage::Slots,
        format!("student={:?} course={:?}", slots.student_name, slots.course_name),
    );

    if let Some(student) = slots.student_name.clone() {
        ctx.mentioned_entities.mention_student(student);
    }
    if let Some(course) = slots.course_name.clone() {
        ctx.mentioned_entities.mention_course(course);
    }
    if let Some(date) = slots.course_date.clone() {
        ctx.mentioned_entities.mention_date(date);
    }
    if let Some(time) = slots.schedule_time.clone() {
        ctx.mentioned_entities.mention_time(time);
    }
    if matches!(decision.intent, Intent::QuerySchedule) {
        ctx.set_active_query_session(slots.student_name.clone(), slots.time_reference.map(|t| t.to_string()));
    }

    let slots_json = serde_json::to_value(&slots).unwrap_or_default();
    ctx.record_user_message(text, Some(decision.intent.to_string()), Some(slots_json.clone()), chrono::Utc::now());

    let outcome = state.dispatcher.dispatch(decision.intent, &slots, user_id, &ctx).await;
    state.decisions.push(
        trace_id,
        user_id,
        TraceStage::Task,
        format!("success={} code={:?}", outcome.success, outcome.code),
    );

    ctx.record_task_result(
        decision.intent.to_string(),
        slots_json,
        outcome.code.map(|c| c.to_string()).unwrap_or_default(),
        outcome.success,
        chrono::Utc::now(),
    );

    if outcome.code == Some(ResultCode::MissingFields) {
        ctx.set_expected_input(
            CurrentFlow::CourseCreation,
            slots::missing_field_input_tags(&slots, decision.intent),
            Some(PendingSlots {
                intent: Some(decision.intent.to_string()),
                existing_slots: serde_json::to_value(&slots).unwrap_or_default(),
                missing_fields: slots::missing_fields_for(&slots, decision.intent),
                created_at_unix_ms: chrono::Utc::now().timestamp_millis(),
            }),
        );
    }

    let rendered = Renderer::render(decision.intent, &slots, &outcome, reply_locale());
    state.decisions.push(trace_id, user_id, TraceStage::Render, rendered.text.clone());

    ctx.record_bot_response(&rendered.text, Some(rendered.quick_reply.is_some()), chrono::Utc::now());
    state.context_store.save(&ctx).await;

    messaging.reply(reply_token, vec![rendered.to_outbound()]).await?;
    state.decisions.push(trace_id, user_id, TraceStage::Outbound, "replied");

    Ok(())
}

async fn handle_postback(
    state: &Arc<AppState>,
    messaging: &Arc<dyn MessagingClient>,
    trace_id: &str,
    user_id: &str,
    event: LineEvent,
) -> eyre::Result<()> {
    let Some(postback) = event.postback else { return Ok(()) };
    let reply_token = event.reply_token.unwrap_or_default();
    let fields = parse_postback_data(&postback.data);
    let action = fields.get("action").map(String::as_str).unwrap_or("");

    state.decisions.push(trace_id, user_id, TraceStage::Task, format!("postback action={action}"));

    let text = match action {
        "confirm_course" => "好的，已經確認了",
        "modify_course" => "好的，麻煩告訴我要改成什麼",
        "cancel_operation" => "好的，已經取消這次操作了",
        _ => "收到了",
    };

    messaging
        .reply(&reply_token, vec![OutboundMessage { text: text.to_string(), quick_reply: None }])
        .await?;
    state.decisions.push(trace_id, user_id, TraceStage::Outbound, "replied");
    Ok(())
}

async fn handle_follow(
    state: &Arc<AppState>,
    messaging: &Arc<dyn MessagingClient>,
    trace_id: &str,
    user_id: &str,
    reply_token: &str,
) -> eyre::Result<()> {
    state.courses.get_or_create_parent(user_id).await?;
    state.decisions.push(trace_id, user_id, TraceStage::Task, "parent profile ensured");

    let welcome = "您好！我是課程管理小幫手，您可以說「小明明天下午2點要上數學課」來新增課程，或是「小明今天有什麼課」來查詢課表。";
    messaging
        .reply(reply_token, vec![OutboundMessage { text: welcome.to_string(), quick_reply: None }])
        .await?;
    state.decisions.push(trace_id, user_id, TraceStage::Outbound, "replied");
    Ok(())
}

/// Minimal `application/x-www-form-urlencoded` decode for a postback
/// `data` string — small enough not to pull in a dedicated crate.
fn parse_postback_data(data: &str) -> HashMap<String, String> {
    data.split('&')
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?;
            let value = parts.next().unwrap_or("");
            Some((percent_decode(key), percent_decode(value)))
        })
        .collect()
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    None => {
                        out.push(bytes[i]);
                        i += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok", "version": env!("CARGO_PKG_VERSION")}))
}

async fn health_deps(State(state): State<Arc<AppState>>) -> Json<Value> {
    let context_status = state.context_store.health_check().await;
    Json(json!({
        "status": context_status.status,
        "checks": {
            "contextStore": {
                "status": context_status.status,
                "message": context_status.features.join(","),
            },
        },
    }))
}

async fn health_gcal(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({"mode": state.calendar.auth_mode().to_string()}))
}

/// `GET /debug/decision?traceId=` (spec §4.9/§6). Gated per DESIGN.md's
/// "debug endpoint exposure" decision: available outside production, or in
/// production only when explicitly opted into via `ENABLE_DEBUG_ENDPOINT`.
async fn debug_decision(State(state): State<Arc<AppState>>, Query(query): Query<DecisionQuery>) -> impl IntoResponse {
    let config = state.config.config();
    if config.is_production() && !config.features.enable_debug_endpoint {
        return (StatusCode::NOT_FOUND, Json(json!({"status": "not_found"}))).into_response();
    }

    let records = if let Some(trace_id) = query.trace_id {
        state.decisions.recent_for_trace(&trace_id)
    } else if let Some(user_id) = query.user_id {
        state.decisions.recent_for_user(&user_id, 50)
    } else {
        state.decisions.recent(50)
    };

    (StatusCode::OK, Json(json!({"records": records}))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_decode_handles_escaped_and_plus() {
        assert_eq!(percent_decode("confirm_course"), "confirm_course");
        assert_eq!(percent_decode("a%20b"), "a b");
        assert_eq!(percent_decode("a+b"), "a b");
    }

    #[test]
    fn parse_postback_data_splits_pairs() {
        let fields = parse_postback_data("action=confirm_course&courseId=abc123");
        assert_eq!(fields.get("action").map(String::as_str), Some("confirm_course"));
        assert_eq!(fields.get("courseId").map(String::as_str), Some("abc123"));
    }
}
