//! Unified `Database` trait — single async interface for all persistence.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::flows::task::{Task, TaskData, TaskStatus};
use crate::store::model::{
    Client, Habit, HabitAssignment, HabitLog, Invitation, InvitationStatus, MessageDirection,
    Relationship, Role, Trainer, User,
};

/// A registration task row reduced to what analytics needs.
#[derive(Debug, Clone)]
pub struct RegistrationTaskRow {
    pub role: Role,
    pub status: TaskStatus,
    /// Index of the field the user was on when the task last changed.
    pub field_index: usize,
    pub created_at: DateTime<Utc>,
}

/// Backend-agnostic database trait covering users, tasks, habits,
/// assignments, logs, relationships, and message history.
#[async_trait]
pub trait Database: Send + Sync {
    // ── Users ───────────────────────────────────────────────────────

    /// Insert the phone number if unknown; return the user either way.
    async fn ensure_user(&self, phone: &str) -> Result<User, DatabaseError>;

    async fn get_user(&self, phone: &str) -> Result<Option<User>, DatabaseError>;

    /// Set (or clear, on logout) the active role for a phone number.
    async fn set_active_role(
        &self,
        phone: &str,
        role: Option<Role>,
    ) -> Result<(), DatabaseError>;

    async fn delete_user(&self, phone: &str) -> Result<(), DatabaseError>;

    // ── Trainers ────────────────────────────────────────────────────

    async fn insert_trainer(&self, trainer: &Trainer) -> Result<(), DatabaseError>;

    async fn get_trainer(&self, trainer_id: &str) -> Result<Option<Trainer>, DatabaseError>;

    async fn get_trainer_by_phone(&self, phone: &str)
        -> Result<Option<Trainer>, DatabaseError>;

    /// Update a single whitelisted profile column.
    async fn update_trainer_field(
        &self,
        trainer_id: &str,
        field: &str,
        value: &str,
    ) -> Result<(), DatabaseError>;

    async fn delete_trainer(&self, trainer_id: &str) -> Result<(), DatabaseError>;

    // ── Clients ─────────────────────────────────────────────────────

    async fn insert_client(&self, client: &Client) -> Result<(), DatabaseError>;

    async fn get_client(&self, client_id: &str) -> Result<Option<Client>, DatabaseError>;

    async fn get_client_by_phone(&self, phone: &str) -> Result<Option<Client>, DatabaseError>;

    async fn update_client_field(
        &self,
        client_id: &str,
        field: &str,
        value: &str,
    ) -> Result<(), DatabaseError>;

    async fn delete_client(&self, client_id: &str) -> Result<(), DatabaseError>;

    /// Clients actively linked to the trainer, name-matched on `query`.
    async fn search_clients(
        &self,
        trainer_id: &str,
        query: &str,
    ) -> Result<Vec<Client>, DatabaseError>;

    /// All clients actively linked to the trainer.
    async fn list_clients_for_trainer(
        &self,
        trainer_id: &str,
    ) -> Result<Vec<Client>, DatabaseError>;

    // ── Tasks ───────────────────────────────────────────────────────

    /// Create a running task. Any task already running for the same
    /// `(user_key, role)` is stopped first — replaced, never interleaved.
    async fn create_task(
        &self,
        user_key: &str,
        role: Role,
        data: &TaskData,
    ) -> Result<Task, DatabaseError>;

    async fn get_running_task(
        &self,
        user_key: &str,
        role: Role,
    ) -> Result<Option<Task>, DatabaseError>;

    async fn update_task(&self, id: Uuid, data: &TaskData) -> Result<(), DatabaseError>;

    async fn complete_task(&self, id: Uuid) -> Result<(), DatabaseError>;

    async fn stop_task(&self, id: Uuid) -> Result<(), DatabaseError>;

    /// Registration tasks created on or after `since`, for analytics.
    async fn list_registration_tasks(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<RegistrationTaskRow>, DatabaseError>;

    // ── Habits ──────────────────────────────────────────────────────

    async fn insert_habit(&self, habit: &Habit) -> Result<(), DatabaseError>;

    async fn get_habit(&self, habit_id: &str) -> Result<Option<Habit>, DatabaseError>;

    /// Active habits owned by the trainer.
    async fn list_habits_for_trainer(
        &self,
        trainer_id: &str,
    ) -> Result<Vec<Habit>, DatabaseError>;

    async fn update_habit(&self, habit: &Habit) -> Result<(), DatabaseError>;

    /// Soft-delete: set `is_active = false`. Logs are never deleted.
    async fn deactivate_habit(&self, habit_id: &str) -> Result<(), DatabaseError>;

    // ── Assignments ─────────────────────────────────────────────────

    /// The assignment row for (habit, client), active or not.
    async fn get_assignment(
        &self,
        habit_id: &str,
        client_id: &str,
    ) -> Result<Option<HabitAssignment>, DatabaseError>;

    async fn insert_assignment(
        &self,
        assignment: &HabitAssignment,
    ) -> Result<(), DatabaseError>;

    async fn set_assignment_active(
        &self,
        habit_id: &str,
        client_id: &str,
        active: bool,
    ) -> Result<(), DatabaseError>;

    /// Active habits assigned to the client (assignment and habit both active).
    async fn list_active_habits_for_client(
        &self,
        client_id: &str,
    ) -> Result<Vec<Habit>, DatabaseError>;

    // ── Habit logs ──────────────────────────────────────────────────

    async fn insert_habit_log(&self, log: &HabitLog) -> Result<(), DatabaseError>;

    /// Sum of log values for (client, habit) on one day.
    async fn sum_logs_for_day(
        &self,
        client_id: &str,
        habit_id: &str,
        day: NaiveDate,
    ) -> Result<f64, DatabaseError>;

    /// All logs for the client on or after `since`, oldest first.
    async fn list_logs_since(
        &self,
        client_id: &str,
        since: NaiveDate,
    ) -> Result<Vec<HabitLog>, DatabaseError>;

    // ── Invitations & relationships ─────────────────────────────────

    async fn insert_invitation(&self, invitation: &Invitation) -> Result<(), DatabaseError>;

    async fn get_invitation(
        &self,
        invitation_id: &str,
    ) -> Result<Option<Invitation>, DatabaseError>;

    /// The most recent pending invitation addressed to a phone number.
    async fn get_pending_invitation_for_phone(
        &self,
        phone: &str,
    ) -> Result<Option<Invitation>, DatabaseError>;

    async fn set_invitation_status(
        &self,
        invitation_id: &str,
        status: InvitationStatus,
    ) -> Result<(), DatabaseError>;

    /// Create the trainer-client link, reactivating a soft-deleted row
    /// instead of inserting a duplicate.
    async fn insert_relationship(
        &self,
        trainer_id: &str,
        client_id: &str,
    ) -> Result<(), DatabaseError>;

    async fn get_relationship(
        &self,
        trainer_id: &str,
        client_id: &str,
    ) -> Result<Option<Relationship>, DatabaseError>;

    async fn set_relationship_active(
        &self,
        trainer_id: &str,
        client_id: &str,
        active: bool,
    ) -> Result<(), DatabaseError>;

    // ── Message history ─────────────────────────────────────────────

    async fn record_message(
        &self,
        phone: &str,
        direction: MessageDirection,
        content: &str,
    ) -> Result<(), DatabaseError>;
}
