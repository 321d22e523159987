//! Domain entities persisted by the store.
//!
//! Business ids (`trainer_id`, `client_id`, `habit_id`) are the
//! human-readable codes from [`crate::ids`]; row ids are UUIDs where a
//! separate key is needed.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The two roles a user can hold. A phone number may be registered as
/// both; `users.active_role` records which one is currently in effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Trainer,
    Client,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Trainer => "trainer",
            Role::Client => "client",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "trainer" => Some(Role::Trainer),
            "client" => Some(Role::Client),
            _ => None,
        }
    }

    /// The opposite role, used by `/switch-role`.
    pub fn other(&self) -> Role {
        match self {
            Role::Trainer => Role::Client,
            Role::Client => Role::Trainer,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A known phone number and its currently active role.
#[derive(Debug, Clone)]
pub struct User {
    pub phone: String,
    pub active_role: Option<Role>,
    pub created_at: DateTime<Utc>,
}

/// A registered trainer profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trainer {
    pub trainer_id: String,
    pub phone: String,
    pub name: String,
    pub email: Option<String>,
    pub business_name: Option<String>,
    pub specialization: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A registered client profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub client_id: String,
    pub phone: String,
    pub name: String,
    pub email: Option<String>,
    pub fitness_goal: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A trainer-defined measurable activity. Soft-deleted via `is_active`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Habit {
    pub habit_id: String,
    pub trainer_id: String,
    pub habit_name: String,
    pub description: Option<String>,
    pub target_value: f64,
    pub unit: String,
    pub frequency: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Links a habit to a client. Unique per (habit_id, client_id);
/// soft-deleted and reactivatable.
#[derive(Debug, Clone)]
pub struct HabitAssignment {
    pub id: Uuid,
    pub habit_id: String,
    pub client_id: String,
    pub trainer_id: String,
    pub is_active: bool,
    pub assigned_date: NaiveDate,
}

/// One recorded instance of progress toward a habit. Append-only;
/// multiple logs per day accumulate.
#[derive(Debug, Clone)]
pub struct HabitLog {
    pub id: Uuid,
    pub client_id: String,
    pub habit_id: String,
    pub value: f64,
    pub logged_on: NaiveDate,
    pub logged_at: DateTime<Utc>,
}

/// Lifecycle of a trainer's invitation to a phone number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Declined,
}

impl InvitationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationStatus::Pending => "pending",
            InvitationStatus::Accepted => "accepted",
            InvitationStatus::Declined => "declined",
        }
    }

    pub fn parse(s: &str) -> Option<InvitationStatus> {
        match s {
            "pending" => Some(InvitationStatus::Pending),
            "accepted" => Some(InvitationStatus::Accepted),
            "declined" => Some(InvitationStatus::Declined),
            _ => None,
        }
    }
}

/// An invitation from a trainer to a client's phone number.
#[derive(Debug, Clone)]
pub struct Invitation {
    pub invitation_id: String,
    pub trainer_id: String,
    pub phone: String,
    pub status: InvitationStatus,
    pub created_at: DateTime<Utc>,
}

/// A trainer-client link, created when an invitation is accepted.
/// Soft-deleted via `is_active` when the trainer removes the client.
#[derive(Debug, Clone)]
pub struct Relationship {
    pub id: Uuid,
    pub trainer_id: String,
    pub client_id: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Direction of a recorded chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDirection {
    Inbound,
    Outbound,
}

impl MessageDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageDirection::Inbound => "inbound",
            MessageDirection::Outbound => "outbound",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_str() {
        for role in [Role::Trainer, Role::Client] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("admin"), None);
    }

    #[test]
    fn role_other_flips() {
        assert_eq!(Role::Trainer.other(), Role::Client);
        assert_eq!(Role::Client.other(), Role::Trainer);
    }

    #[test]
    fn role_display_matches_serde() {
        for role in [Role::Trainer, Role::Client] {
            let json = serde_json::to_string(&role).unwrap();
            assert_eq!(json, format!("\"{role}\""));
        }
    }

    #[test]
    fn invitation_status_round_trips() {
        for status in [
            InvitationStatus::Pending,
            InvitationStatus::Accepted,
            InvitationStatus::Declined,
        ] {
            assert_eq!(InvitationStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(InvitationStatus::parse("expired"), None);
    }
}
