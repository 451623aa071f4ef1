//! Activity notifications published by the gateway
//!
//! A `CommandActivity` is emitted once per command when it reaches a
//! terminal state. Progress tracking and achievements listen for these;
//! the gateway never reads them back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandOutcome {
    /// Refused by the validator, never spawned
    Rejected,
    /// Could not be started
    Errored,
    /// Exit code 0
    Completed,
    /// Non-zero exit
    Failed,
    TimedOut,
    Cancelled,
}

impl CommandOutcome {
    /// True when the command ran to a successful end.
    pub fn is_success(&self) -> bool {
        matches!(self, CommandOutcome::Completed)
    }
}

/// "A command ran" notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandActivity {
    pub session_id: String,
    /// `None` when the session never authenticated
    pub user_id: Option<String>,
    pub command_id: String,
    pub command: String,
    pub outcome: CommandOutcome,
    pub exit_code: Option<i32>,
    pub timestamp: DateTime<Utc>,
}

impl CommandActivity {
    pub fn new(
        session_id: &str,
        user_id: Option<&str>,
        command_id: &str,
        command: &str,
        outcome: CommandOutcome,
    ) -> Self {
        Self {
            session_id: session_id.to_string(),
            user_id: user_id.map(String::from),
            command_id: command_id.to_string(),
            command: command.to_string(),
            outcome,
            exit_code: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_exit_code(mut self, exit_code: Option<i32>) -> Self {
        self.exit_code = exit_code;
        self
    }
}
