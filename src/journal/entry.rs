//! Journal entry data structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RestoreError;
use crate::restore::{RestoreOutcome, RestoreState};

/// Outcome of one package restore as recorded in the journal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// When the restore finished (UTC)
    pub timestamp: DateTime<Utc>,

    pub package: String,

    /// Target user
    pub user: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Last state reached
    pub state: RestoreState,

    #[serde(default)]
    pub requires_restart: bool,

    /// Rule entries that failed to replay
    #[serde(default)]
    pub rules_failed: usize,

    /// Fatal error, for failed restores
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JournalEntry {
    /// Entry for a restore that completed
    pub fn completed(outcome: &RestoreOutcome) -> Self {
        Self {
            timestamp: Utc::now(),
            package: outcome.package.clone(),
            user: outcome.user,
            label: outcome.label.clone(),
            state: outcome.state,
            requires_restart: outcome.requires_restart,
            rules_failed: outcome.replay.failed,
            error: None,
        }
    }

    /// Entry for a restore that failed
    pub fn failed(package: &str, user: u32, label: Option<&str>, error: &RestoreError) -> Self {
        Self {
            timestamp: Utc::now(),
            package: package.to_string(),
            user,
            label: label.map(str::to_string),
            state: RestoreState::Failed,
            requires_restart: false,
            rules_failed: 0,
            error: Some(error.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Single-line description for display
    pub fn format_human_readable(&self) -> String {
        let label = self.label.as_deref().unwrap_or("default");
        let mut line = format!(
            "{} {} [{}] user {}: {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.package,
            label,
            self.user,
            self.state
        );
        if self.requires_restart {
            line.push_str(" (restart required)");
        }
        if self.rules_failed > 0 {
            line.push_str(&format!(" ({} rules failed)", self.rules_failed));
        }
        if let Some(error) = &self.error {
            line.push_str(&format!(" - {}", error));
        }
        line
    }
}
