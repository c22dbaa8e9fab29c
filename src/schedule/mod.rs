pub mod calendar;
pub mod conflict;
pub mod generate;
pub mod sections;
pub mod validate;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::db;

#[derive(Debug, Clone, Serialize)]
pub struct EngineError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl EngineError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }
}

/// Engine knobs stored in the `setup.scheduler` settings section.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchedulerConfig {
    pub trial_budget: u32,
    pub max_synthesized_slots: usize,
    pub division_capacity: i64,
    pub synthesized_slot_minutes: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            trial_budget: 10,
            max_synthesized_slots: 24,
            division_capacity: 100,
            synthesized_slot_minutes: 60,
        }
    }
}

impl SchedulerConfig {
    /// Malformed historical sections must not block scheduling; anything
    /// unreadable falls back to the defaults.
    pub fn load(conn: &Connection) -> Result<Self, EngineError> {
        let saved = db::settings_get_json(conn, "setup.scheduler")
            .map_err(|e| EngineError::new("db_query_failed", e.to_string()))?;
        Ok(saved
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default())
    }
}
