//! Task record and state machine definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Lifecycle status of a task
///
/// Transitions form `queued -> running -> {completed, failed, cancelled}`
/// plus the short-circuit `queued -> cancelled`. Nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Whether the task has reached a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Whether the state machine permits moving from `self` to `next`
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Queued, Running) | (Queued, Cancelled) | (Running, Completed | Failed | Cancelled)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(TaskStatus::Queued),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(format!("unknown task status '{}'", other)),
        }
    }
}

/// A scheduled shell command and its full lifecycle record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Monotonic id assigned at submit time
    pub id: i64,
    /// User-supplied label
    pub name: String,
    /// GPU model name the task requires, matched against the probe verbatim
    pub gpu_type: String,
    /// Number of GPUs of that model
    pub gpu_count: u32,
    /// Shell command, possibly multi-line, executed verbatim
    pub command: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// GPU indices held while running, empty otherwise
    pub assigned_gpus: Vec<u32>,
    /// Multiplexer session name, `task_<id>`, empty until launch
    pub session_name: Option<String>,
    /// Combined stdout+stderr log, set at launch
    pub log_path: Option<PathBuf>,
    /// Recorded exactly when the task reaches a terminal status
    pub exit_code: Option<i64>,
    /// Populated on failed / cancelled with the reason
    pub error: Option<String>,
}

/// Upper bound on GPUs a single task may request
pub const MAX_GPU_COUNT: u32 = 8;

/// Fields required to create a task
#[derive(Debug, Clone)]
pub struct NewTask {
    pub name: String,
    pub gpu_type: String,
    pub gpu_count: u32,
    pub command: String,
}

/// Session name for a task id, stable for the task's life
pub fn session_name(task_id: i64) -> String {
    format!("task_{}", task_id)
}

/// Serialize GPU indices as the store's compact comma-joined form
pub fn join_gpu_indices(indices: &[u32]) -> String {
    indices
        .iter()
        .map(|idx| idx.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse the comma-joined form back into indices
///
/// Empty and whitespace-only input mean "no GPUs"; malformed entries are
/// dropped rather than failing the whole row.
pub fn parse_gpu_indices(raw: &str) -> Vec<u32> {
    raw.split(',')
        .filter_map(|part| part.trim().parse::<u32>().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_status_round_trip() {
        for status in [
            TaskStatus::Queued,
            TaskStatus::Running,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            let parsed = TaskStatus::from_str(&status.to_string()).unwrap();
            assert_eq!(parsed, status);
        }
        assert!(TaskStatus::from_str("paused").is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!TaskStatus::Queued.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_transitions() {
        use TaskStatus::*;
        assert!(Queued.can_transition_to(Running));
        assert!(Queued.can_transition_to(Cancelled));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));
        assert!(Running.can_transition_to(Cancelled));

        assert!(!Queued.can_transition_to(Completed));
        assert!(!Running.can_transition_to(Queued));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Cancelled.can_transition_to(Queued));
    }

    #[test]
    fn test_gpu_index_round_trip() {
        assert_eq!(join_gpu_indices(&[]), "");
        assert_eq!(join_gpu_indices(&[2]), "2");
        assert_eq!(join_gpu_indices(&[0, 1, 3]), "0,1,3");

        assert_eq!(parse_gpu_indices(""), Vec::<u32>::new());
        assert_eq!(parse_gpu_indices("0,1,3"), vec![0, 1, 3]);
        assert_eq!(parse_gpu_indices(" 4 , 5 "), vec![4, 5]);
        assert_eq!(parse_gpu_indices("4,x,5"), vec![4, 5]);
    }

    #[test]
    fn test_session_name_format() {
        assert_eq!(session_name(12), "task_12");
    }
}
