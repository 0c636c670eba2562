//! Boot sequence and axum wiring for the LINE course-management bot. The
//! logger setup mirrors the teacher's own `main.rs` (a plain
//! `sloggers::terminal::TerminalLoggerBuilder` at `Severity::Debug`) rather
//! than reaching for tracing — this crate never picked up `tracing` as a
//! dependency, so boot stays on the same `slog` stack as everything else.

mod calendar;
mod channels;
mod config;
mod content;
mod context;
mod db;
mod dispatcher;
mod error;
mod handlers;
mod llm_client;
mod messaging;
mod nlu;
mod reminders;
mod renderer;
mod slots;
mod store;
mod time_parser;
mod webhook;

use std::path::Path;
use std::sync::Arc;

use slog::{info, o};
use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::{Format, Severity};
use sloggers::Build;

use calendar::{CalendarSync, NullCalendarSync};
use channels::DynTx;
use config::ConfigRegistry;
use content::{ContentStore, MongoContentStore};
use context::{ContextBackend, ContextStore, InMemoryContextBackend, RedisContextBackend};
use dispatcher::Dispatcher;
use handlers::HandlerConfig;
use llm_client::{HttpLlmClient, LLMClient};
use messaging::{HttpMessagingClient, MessagingClient, MockMessagingClient};
use reminders::manager::{CourseEvents, ReminderManager};
use reminders::{MongoReminderStore, PropagatorConfig, ReminderEvents, ReminderPropagator, ReminderStore};
use store::{CourseStore, MongoCourseStore};
use webhook::trace::DecisionLogger;

/// Everything an axum handler needs, bundled the way the teacher's
/// `bot::BotState` bundles `bot`/`update_tx`/`config`/collections/`logger`
/// into one `Arc`-shared struct instead of threading each piece through
/// handler arguments separately.
pub struct AppState {
    pub config: Arc<ConfigRegistry>,
    pub context_store: Arc<ContextStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub courses: Arc<dyn CourseStore>,
    pub content: Arc<dyn ContentStore>,
    pub reminders: Arc<dyn ReminderStore>,
    pub calendar: Arc<dyn CalendarSync>,
    pub llm_client: Option<Arc<dyn LLMClient>>,
    pub messaging_real: Arc<dyn MessagingClient>,
    pub messaging_mock: Arc<MockMessagingClient>,
    pub decisions: Arc<DecisionLogger>,
    pub handler_config: HandlerConfig,
    pub logger: slog::Logger,
}

impl AppState {
    /// Spec §4.9's dynamic client-selection rule: `U_test_`-prefixed user
    /// ids get routed to a client that never calls out to LINE for real,
    /// unless overridden by `QA_FORCE_REAL`, an `x-qa-mode: real` header, or
    /// a `qaMode=real` query parameter on this request.
    pub fn messaging_for(&self, user_id: &str, qa_override_real: bool) -> Arc<dyn MessagingClient> {
        let config = self.config.config();
        if config.features.qa_force_real || qa_override_real {
            return self.messaging_real.clone();
        }
        if config.features.use_mock_line_service || user_id.starts_with("U_test_") {
            return self.messaging_mock.clone();
        }
        self.messaging_real.clone()
    }
}

fn build_logger() -> slog::Logger {
    let mut builder = TerminalLoggerBuilder::new();
    builder.level(Severity::Debug);
    builder.format(Format::Full);
    builder.destination(Destination::Stdout);
    builder.build().expect("terminal logger builds")
}

async fn build_context_store(config: &config::AppConfig, logger: &slog::Logger) -> Arc<ContextStore> {
    let backend: Arc<dyn ContextBackend> = match &config.redis_url {
        Some(url) => match RedisContextBackend::connect(url).await {
            Ok(backend) => {
                info!(logger, "boot.context_backend"; "backend" => "redis");
                Arc::new(backend)
            }
            Err(err) => {
                slog::warn!(logger, "boot.context_backend_fallback"; "err" => %err);
                Arc::new(InMemoryContextBackend::new())
            }
        },
        None => {
            info!(logger, "boot.context_backend"; "backend" => "in_memory");
            Arc::new(InMemoryContextBackend::new())
        }
    };
    Arc::new(ContextStore::new(backend, config.context_ttl_secs as i64))
}

/// Drains fired reminders off the propagator's channel and sends the actual
/// chat message, the same role the teacher's
/// `bot::notifications_sender::handle_scheduled` plays for scraped-class
/// notifications.
fn spawn_reminder_sender(
    rx: channels::DynRx<ReminderEvents>,
    messaging: Arc<dyn MessagingClient>,
    logger: slog::Logger,
) {
    tokio::task::spawn(async move {
        loop {
            let Ok(fired) = rx.recv().await else {
                break;
            };
            for reminder in fired {
                let message = messaging::OutboundMessage {
                    text: format!(
                        "⏰ 提醒：{}的{}課快要開始了",
                        reminder.student_name, reminder.course_name
                    ),
                    quick_reply: None,
                };
                if let Err(err) = messaging.push(&reminder.user_id, vec![message]).await {
                    slog::error!(logger, "reminders.sender.failed"; "user_id" => %reminder.user_id, "err" => %err);
                }
            }
        }
    });
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    rust_i18n::i18n!("locales", fallback = "zh-TW");

    let logger = build_logger();
    info!(logger, "boot");

    let _guard = slog_scope::set_global_logger(logger.clone());
    slog_stdlog::init().ok();

    let registry = ConfigRegistry::load(None, None)?;
    let config = registry.config();

    let db = db::load_database(&config).await?;
    info!(logger, "boot.db_connected");

    let context_store = build_context_store(&config, &logger).await;

    let courses: Arc<dyn CourseStore> = Arc::new(MongoCourseStore::new(db.clone()));
    let content: Arc<dyn ContentStore> = Arc::new(MongoContentStore::new(&db));
    let reminders_store: Arc<dyn ReminderStore> = Arc::new(MongoReminderStore::new(&db));
    let calendar: Arc<dyn CalendarSync> = Arc::new(NullCalendarSync);

    let llm_client: Option<Arc<dyn LLMClient>> = config.openai_api_key.clone().map(|api_key| {
        let client: Arc<dyn LLMClient> = Arc::new(HttpLlmClient::new(
            api_key,
            config.openai_base_url.clone(),
            config.openai_model.clone(),
            std::time::Duration::from_millis(config.features.ai_fallback_timeout_ms),
        ));
        client
    });

    let messaging_real: Arc<dyn MessagingClient> = Arc::new(HttpMessagingClient::new(
        config.channel_access_token.clone().unwrap_or_default(),
        logger.new(o!("component" => "messaging")),
    ));
    let messaging_mock = Arc::new(MockMessagingClient::default());

    let handler_config = HandlerConfig {
        enable_recurring_courses: config.features.enable_recurring_courses,
        strict_record_requires_course: config.features.strict_record_requires_course,
        default_reminder_minutes: config.default_reminder_minutes,
        timezone: time_parser::DEFAULT_TIMEZONE,
    };

    let (course_event_tx, course_event_rx): (DynTx<CourseEvents>, _) = channels::bounded(64);
    let manager = ReminderManager::new(reminders_store.clone(), &logger);
    let _manager_handle = manager.work(course_event_rx);

    let dispatcher = Arc::new(Dispatcher::build(
        courses.clone(),
        content.clone(),
        reminders_store.clone(),
        calendar.clone(),
        Some(course_event_tx),
        handler_config.clone(),
        &logger,
    ));

    let (reminder_fired_tx, reminder_fired_rx): (DynTx<ReminderEvents>, _) = channels::bounded(64);
    let propagator = ReminderPropagator::new(
        &db,
        PropagatorConfig { poll_interval: std::time::Duration::from_secs(30) },
        &logger,
    );
    let _propagator_handle = propagator.work(reminder_fired_tx);
    spawn_reminder_sender(reminder_fired_rx, messaging_real.clone(), logger.new(o!("component" => "reminder_sender")));

    let state = Arc::new(AppState {
        config: registry,
        context_store,
        dispatcher,
        courses,
        content,
        reminders: reminders_store,
        calendar,
        llm_client,
        messaging_real,
        messaging_mock,
        decisions: Arc::new(DecisionLogger::default()),
        handler_config,
        logger: logger.clone(),
    });

    let port = state.config.config().port;
    let app = webhook::router(state);

    let addr = format!("0.0.0.0:{port}");
    info!(logger, "boot.listening"; "addr" => &addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
