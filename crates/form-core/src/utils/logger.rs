use log::kv::{self, Key, Value, Visitor};
use log::{Log, Metadata, Record, SetLoggerError};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::cell::RefCell;
use std::collections::HashMap;

thread_local! {
    static CURRENT_EXECUTION_ID: RefCell<Option<String>> = RefCell::new(None);
}

/// Sets the current job-execution id for the calling thread, so every
/// log line emitted on it (worker loop, dispatch loop, monitor task)
/// carries it without needing to thread it through every call site.
pub fn set_current_execution_id(execution_id: String) {
    CURRENT_EXECUTION_ID.with(|id_cell| {
        *id_cell.borrow_mut() = Some(execution_id);
    });
}

pub fn clear_current_execution_id() {
    CURRENT_EXECUTION_ID.with(|id_cell| {
        *id_cell.borrow_mut() = None;
    });
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JsonLogRecord {
    pub timestamp: String,
    pub level: String,
    pub message: String,
    pub execution_id: Option<String>,
    pub target: String,
    pub module_path: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

struct JsonLogger;

struct KeyValueCollector<'a>(&'a mut HashMap<String, serde_json::Value>);

impl<'a> Visitor<'a> for KeyValueCollector<'a> {
    fn visit_pair(&mut self, key: Key<'a>, value: Value<'a>) -> Result<(), kv::Error> {
        self.0
            .insert(key.as_str().to_string(), json!(value.to_string()));
        Ok(())
    }
}

impl Log for JsonLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let execution_id = CURRENT_EXECUTION_ID.with(|id_cell| id_cell.borrow().clone());
        let mut extra_fields = HashMap::new();
        let mut collector = KeyValueCollector(&mut extra_fields);
        if let Err(e) = record.key_values().visit(&mut collector) {
            eprintln!("failed to visit log key-values: {:?}", e);
        }

        let log_record = JsonLogRecord {
            timestamp: chrono::Utc::now().to_rfc3339(),
            level: record.level().to_string(),
            message: format!("{}", record.args()),
            execution_id,
            target: record.target().to_string(),
            module_path: record.module_path().map(|s| s.to_string()),
            file: record.file().map(|s| s.to_string()),
            line: record.line(),
            extra: extra_fields,
        };

        println!(
            "{}",
            serde_json::to_string(&log_record).unwrap_or_else(|_| log_record.message.clone())
        );
    }

    fn flush(&self) {}
}

static LOGGER: JsonLogger = JsonLogger;
static INIT_LOGGER_ONCE: OnceCell<()> = OnceCell::new();

/// Initializes the process-wide JSON logger. Idempotent: safe to call
/// from every binary's `main` and from test setup.
pub fn init_logger() -> Result<(), SetLoggerError> {
    INIT_LOGGER_ONCE
        .get_or_try_init(|| {
            log::set_logger(&LOGGER)?;
            log::set_max_level(log::LevelFilter::Info);
            Ok(())
        })
        .map(|_| ())
}

/// Logs a back-pressure level transition (spec.md §9: "every
/// back-pressure level transition is logged once").
pub fn log_backpressure_transition(execution_id: &str, level: &str, buffer_utilization: f64) {
    log::warn!(
        target: "orchestrator::backpressure",
        level = level,
        buffer_utilization = buffer_utilization;
        "back-pressure level transition for {}", execution_id
    );
}

/// Logs a worker lifecycle event (ready, restarted, shut down).
pub fn log_worker_event(worker_id: &str, event: &str, details: Option<&serde_json::Value>) {
    let details_str = details.map(|d| d.to_string()).unwrap_or_default();
    log::info!(
        target: "orchestrator::worker",
        event = event,
        details = details_str.as_str();
        "worker {} event", worker_id
    );
}

/// Logs a database operation attempt, per spec.md §9's observability
/// minimum ("every DB operation logs attempt counts").
pub fn log_db_attempt(operation: &str, attempt: u32, max_attempts: u32, ok: bool) {
    log::info!(
        target: "repository",
        operation = operation,
        attempt = attempt,
        max_attempts = max_attempts,
        ok = ok;
        "db operation attempt"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::info;

    #[test]
    fn logger_initializes_and_carries_execution_id() {
        let _ = init_logger();
        set_current_execution_id("exec-123".to_string());
        info!(target: "test", "hello from test");
        clear_current_execution_id();
        info!(target: "test", "hello without execution id");
    }
}
