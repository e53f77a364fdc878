//! # Structured Logging Module
//!
//! Environment-aware tracing setup for the orchestrator plus helpers that emit
//! one structured event per orchestration milestone.

use chrono::Utc;
use std::io::IsTerminal;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use uuid::Uuid;

use crate::constants::ENVIRONMENT_VAR;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise the level follows the deployment
/// environment. `LOG_FORMAT=json` switches the console layer to JSON.
pub fn init_tracing() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(get_log_level(&environment)));

        let json = std::env::var("LOG_FORMAT")
            .map(|format| format.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let layer = if json {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .json()
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(std::io::stdout().is_terminal())
                .with_filter(filter)
                .boxed()
        };

        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            json = json,
            "Structured logging initialized"
        );
    });
}

fn get_environment() -> String {
    std::env::var(ENVIRONMENT_VAR).unwrap_or_else(|_| "development".to_string())
}

fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

/// Log one orchestration milestone for a connection.
pub fn log_connection_operation(
    operation: &str,
    connection_id: Option<Uuid>,
    job_id: Option<i64>,
    attempt_number: Option<u32>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        connection_id = connection_id.map(|id| id.to_string()),
        job_id = job_id,
        attempt_number = attempt_number,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "CONNECTION_OPERATION"
    );
}

/// Log an exhausted external operation.
pub fn log_activity_failure(
    activity: &str,
    connection_id: Uuid,
    error: &str,
    mandatory: bool,
) {
    tracing::error!(
        activity = %activity,
        connection_id = %connection_id,
        error = %error,
        mandatory = mandatory,
        timestamp = %Utc::now().to_rfc3339(),
        "[ACTIVITY-FAILURE]"
    );
}
