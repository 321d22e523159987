//! Task model — one persisted multi-step conversation per (user, role).
//!
//! `TaskData` is a tagged union per task type instead of a free-form
//! key-value bag, so flow steps are checked exhaustively at compile time.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::model::Role;

/// Collected answers for field-driven flows, keyed by field name.
pub type Collected = serde_json::Map<String, serde_json::Value>;

/// The kinds of multi-step tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Registration,
    ProfileEdit,
    AccountDeletion,
    HabitCreate,
    HabitEdit,
    HabitDelete,
    HabitAssign,
    HabitUnassign,
    HabitLog,
    InviteClient,
    RemoveClient,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Registration => "registration",
            TaskType::ProfileEdit => "profile_edit",
            TaskType::AccountDeletion => "account_deletion",
            TaskType::HabitCreate => "habit_create",
            TaskType::HabitEdit => "habit_edit",
            TaskType::HabitDelete => "habit_delete",
            TaskType::HabitAssign => "habit_assign",
            TaskType::HabitUnassign => "habit_unassign",
            TaskType::HabitLog => "habit_log",
            TaskType::InviteClient => "invite_client",
            TaskType::RemoveClient => "remove_client",
        }
    }

    /// The command a user re-issues after a forced stop.
    pub fn retry_command(&self) -> &'static str {
        match self {
            TaskType::Registration => "/register",
            TaskType::ProfileEdit => "/edit-profile",
            TaskType::AccountDeletion => "/delete-account",
            TaskType::HabitCreate => "/create-habit",
            TaskType::HabitEdit => "/edit-habit",
            TaskType::HabitDelete => "/delete-habit",
            TaskType::HabitAssign => "/assign-habit",
            TaskType::HabitUnassign => "/unassign-habit",
            TaskType::HabitLog => "/log",
            TaskType::InviteClient => "/invite",
            TaskType::RemoveClient => "/remove-client",
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Steps of the habit-edit flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum HabitEditStep {
    AwaitHabitId,
    AwaitField { habit_id: String },
    AwaitValue { habit_id: String, field: String },
}

/// Steps of the habit-delete flow. Deletion requires a literal YES.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum HabitDeleteStep {
    AwaitHabitId,
    Confirm { habit_id: String },
}

/// Steps of the assign-habit flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum HabitAssignStep {
    AwaitHabitId,
    AwaitClients { habit_id: String },
}

/// Steps of the unassign-habit flow: client, then habit, then yes/no.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum HabitUnassignStep {
    AwaitClientId,
    AwaitHabitId { client_id: String },
    Confirm { client_id: String, habit_id: String },
}

/// Steps of the habit-logging flow. `offered` preserves the numbered
/// habit list shown to the client so a reply like "2" stays meaningful.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum HabitLogStep {
    AwaitHabit { offered: Vec<String> },
    AwaitValue { habit_id: String },
}

/// Steps of the remove-client flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum RemoveClientStep {
    AwaitClientId,
    Confirm { client_id: String },
}

/// Per-task-type state. Serialized into the task row's `data` column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task_type", rename_all = "snake_case")]
pub enum TaskData {
    Registration {
        role: Role,
        current_field_index: usize,
        collected: Collected,
    },
    ProfileEdit {
        current_field_index: usize,
        collected: Collected,
    },
    /// Single confirmation step: a literal YES deletes the account.
    AccountDeletion,
    HabitCreate {
        current_field_index: usize,
        collected: Collected,
    },
    HabitEdit {
        #[serde(flatten)]
        step: HabitEditStep,
    },
    HabitDelete {
        #[serde(flatten)]
        step: HabitDeleteStep,
    },
    HabitAssign {
        #[serde(flatten)]
        step: HabitAssignStep,
    },
    HabitUnassign {
        #[serde(flatten)]
        step: HabitUnassignStep,
    },
    HabitLog {
        #[serde(flatten)]
        step: HabitLogStep,
    },
    /// Single step: awaiting the phone number to invite.
    InviteClient,
    RemoveClient {
        #[serde(flatten)]
        step: RemoveClientStep,
    },
}

impl TaskData {
    pub fn task_type(&self) -> TaskType {
        match self {
            TaskData::Registration { .. } => TaskType::Registration,
            TaskData::ProfileEdit { .. } => TaskType::ProfileEdit,
            TaskData::AccountDeletion => TaskType::AccountDeletion,
            TaskData::HabitCreate { .. } => TaskType::HabitCreate,
            TaskData::HabitEdit { .. } => TaskType::HabitEdit,
            TaskData::HabitDelete { .. } => TaskType::HabitDelete,
            TaskData::HabitAssign { .. } => TaskType::HabitAssign,
            TaskData::HabitUnassign { .. } => TaskType::HabitUnassign,
            TaskData::HabitLog { .. } => TaskType::HabitLog,
            TaskData::InviteClient => TaskType::InviteClient,
            TaskData::RemoveClient { .. } => TaskType::RemoveClient,
        }
    }
}

/// Terminal and non-terminal task states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Running,
    Completed,
    Stopped,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Stopped => "stopped",
        }
    }

    pub fn parse(s: &str) -> Option<TaskStatus> {
        match s {
            "running" => Some(TaskStatus::Running),
            "completed" => Some(TaskStatus::Completed),
            "stopped" => Some(TaskStatus::Stopped),
            _ => None,
        }
    }
}

/// Advisory window within which an interrupted registration can be
/// resumed instead of restarted. Not enforced by the store.
pub const RESUME_WINDOW_HOURS: i64 = 24;

/// A persisted multi-step conversation.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: Uuid,
    pub user_key: String,
    pub role: Role,
    pub data: TaskData,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Whether the task was touched recently enough to resume.
    pub fn within_resume_window(&self, now: DateTime<Utc>) -> bool {
        now - self.updated_at <= Duration::hours(RESUME_WINDOW_HOURS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_data_serde_round_trip() {
        let data = TaskData::HabitUnassign {
            step: HabitUnassignStep::Confirm {
                client_id: "CL7K2MXQ".into(),
                habit_id: "HB9PQRST".into(),
            },
        };
        let json = serde_json::to_string(&data).unwrap();
        assert!(json.contains("\"task_type\":\"habit_unassign\""));
        assert!(json.contains("\"step\":\"confirm\""));
        let parsed: TaskData = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, data);
    }

    #[test]
    fn registration_data_round_trip_keeps_collected() {
        let mut collected = Collected::new();
        collected.insert("name".into(), serde_json::json!("Thandi"));
        collected.insert("experience_years".into(), serde_json::json!(5.0));
        let data = TaskData::Registration {
            role: Role::Trainer,
            current_field_index: 2,
            collected,
        };
        let json = serde_json::to_string(&data).unwrap();
        let parsed: TaskData = serde_json::from_str(&json).unwrap();
        match parsed {
            TaskData::Registration {
                role,
                current_field_index,
                collected,
            } => {
                assert_eq!(role, Role::Trainer);
                assert_eq!(current_field_index, 2);
                assert_eq!(collected["name"], "Thandi");
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn task_type_matches_data() {
        assert_eq!(
            TaskData::AccountDeletion.task_type(),
            TaskType::AccountDeletion
        );
        assert_eq!(
            TaskData::HabitLog {
                step: HabitLogStep::AwaitValue {
                    habit_id: "HB1".into()
                }
            }
            .task_type(),
            TaskType::HabitLog
        );
    }

    #[test]
    fn task_status_round_trips() {
        for status in [TaskStatus::Running, TaskStatus::Completed, TaskStatus::Stopped] {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TaskStatus::parse("paused"), None);
    }

    #[test]
    fn resume_window_boundary() {
        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4(),
            user_key: "27820000000".into(),
            role: Role::Client,
            data: TaskData::AccountDeletion,
            status: TaskStatus::Running,
            created_at: now - Duration::hours(30),
            updated_at: now - Duration::hours(23),
        };
        assert!(task.within_resume_window(now));

        let stale = Task {
            updated_at: now - Duration::hours(25),
            ..task
        };
        assert!(!stale.within_resume_window(now));
    }
}
