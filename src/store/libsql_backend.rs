//! libSQL backend — async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. Timestamps are stored
//! as RFC 3339 TEXT; dates as `YYYY-MM-DD` TEXT; booleans as INTEGER.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use libsql::{params, Connection, Database as LibSqlDatabase};
use tracing::info;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::flows::task::{Task, TaskData, TaskStatus};
use crate::store::migrations;
use crate::store::model::{
    Client, Habit, HabitAssignment, HabitLog, Invitation, InvitationStatus, MessageDirection,
    Relationship, Role, Trainer, User,
};
use crate::store::traits::{Database, RegistrationTaskRow};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;
        info!(path = %path.display(), "Database opened");
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

fn query_err(e: libsql::Error) -> DatabaseError {
    DatabaseError::Query(e.to_string())
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap_or(NaiveDate::MIN)
}

fn parse_uuid(s: &str) -> Uuid {
    Uuid::parse_str(s).unwrap_or_else(|_| Uuid::nil())
}

fn row_to_user(row: &libsql::Row) -> Result<User, libsql::Error> {
    let role_str: Option<String> = row.get(1).ok();
    let created_str: String = row.get(2)?;
    Ok(User {
        phone: row.get(0)?,
        active_role: role_str.as_deref().and_then(Role::parse),
        created_at: parse_datetime(&created_str),
    })
}

/// Column order: trainer_id, phone, name, email, business_name,
/// specialization, created_at.
fn row_to_trainer(row: &libsql::Row) -> Result<Trainer, libsql::Error> {
    let created_str: String = row.get(6)?;
    Ok(Trainer {
        trainer_id: row.get(0)?,
        phone: row.get(1)?,
        name: row.get(2)?,
        email: row.get(3).ok(),
        business_name: row.get(4).ok(),
        specialization: row.get(5).ok(),
        created_at: parse_datetime(&created_str),
    })
}

/// Column order: client_id, phone, name, email, fitness_goal, created_at.
fn row_to_client(row: &libsql::Row) -> Result<Client, libsql::Error> {
    let created_str: String = row.get(5)?;
    Ok(Client {
        client_id: row.get(0)?,
        phone: row.get(1)?,
        name: row.get(2)?,
        email: row.get(3).ok(),
        fitness_goal: row.get(4).ok(),
        created_at: parse_datetime(&created_str),
    })
}

/// Column order: habit_id, trainer_id, habit_name, description,
/// target_value, unit, frequency, is_active, created_at.
fn row_to_habit(row: &libsql::Row) -> Result<Habit, libsql::Error> {
    let active: i64 = row.get(7)?;
    let created_str: String = row.get(8)?;
    Ok(Habit {
        habit_id: row.get(0)?,
        trainer_id: row.get(1)?,
        habit_name: row.get(2)?,
        description: row.get(3).ok(),
        target_value: row.get(4)?,
        unit: row.get(5)?,
        frequency: row.get(6)?,
        is_active: active != 0,
        created_at: parse_datetime(&created_str),
    })
}

/// Column order: id, habit_id, client_id, trainer_id, is_active, assigned_date.
fn row_to_assignment(row: &libsql::Row) -> Result<HabitAssignment, libsql::Error> {
    let id_str: String = row.get(0)?;
    let active: i64 = row.get(4)?;
    let date_str: String = row.get(5)?;
    Ok(HabitAssignment {
        id: parse_uuid(&id_str),
        habit_id: row.get(1)?,
        client_id: row.get(2)?,
        trainer_id: row.get(3)?,
        is_active: active != 0,
        assigned_date: parse_date(&date_str),
    })
}

/// Column order: id, client_id, habit_id, value, logged_on, logged_at.
fn row_to_log(row: &libsql::Row) -> Result<HabitLog, libsql::Error> {
    let id_str: String = row.get(0)?;
    let logged_on_str: String = row.get(4)?;
    let logged_at_str: String = row.get(5)?;
    Ok(HabitLog {
        id: parse_uuid(&id_str),
        client_id: row.get(1)?,
        habit_id: row.get(2)?,
        value: row.get(3)?,
        logged_on: parse_date(&logged_on_str),
        logged_at: parse_datetime(&logged_at_str),
    })
}

/// Column order: invitation_id, trainer_id, phone, status, created_at.
fn row_to_invitation(row: &libsql::Row) -> Result<Invitation, libsql::Error> {
    let status_str: String = row.get(3)?;
    let created_str: String = row.get(4)?;
    Ok(Invitation {
        invitation_id: row.get(0)?,
        trainer_id: row.get(1)?,
        phone: row.get(2)?,
        status: InvitationStatus::parse(&status_str).unwrap_or(InvitationStatus::Pending),
        created_at: parse_datetime(&created_str),
    })
}

/// Column order: id, trainer_id, client_id, is_active, created_at.
fn row_to_relationship(row: &libsql::Row) -> Result<Relationship, libsql::Error> {
    let id_str: String = row.get(0)?;
    let active: i64 = row.get(3)?;
    let created_str: String = row.get(4)?;
    Ok(Relationship {
        id: parse_uuid(&id_str),
        trainer_id: row.get(1)?,
        client_id: row.get(2)?,
        is_active: active != 0,
        created_at: parse_datetime(&created_str),
    })
}

/// Column order: id, user_key, role, data, status, created_at, updated_at.
fn row_to_task(row: &libsql::Row) -> Result<Task, DatabaseError> {
    let id_str: String = row.get(0).map_err(query_err)?;
    let user_key: String = row.get(1).map_err(query_err)?;
    let role_str: String = row.get(2).map_err(query_err)?;
    let data_str: String = row.get(3).map_err(query_err)?;
    let status_str: String = row.get(4).map_err(query_err)?;
    let created_str: String = row.get(5).map_err(query_err)?;
    let updated_str: String = row.get(6).map_err(query_err)?;

    let data: TaskData = serde_json::from_str(&data_str)
        .map_err(|e| DatabaseError::Serialization(format!("Bad task data: {e}")))?;
    let role = Role::parse(&role_str)
        .ok_or_else(|| DatabaseError::Serialization(format!("Bad task role: {role_str}")))?;
    let status = TaskStatus::parse(&status_str)
        .ok_or_else(|| DatabaseError::Serialization(format!("Bad task status: {status_str}")))?;

    Ok(Task {
        id: parse_uuid(&id_str),
        user_key,
        role,
        data,
        status,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

const TRAINER_COLUMNS: &str =
    "trainer_id, phone, name, email, business_name, specialization, created_at";
const CLIENT_COLUMNS: &str = "client_id, phone, name, email, fitness_goal, created_at";
const HABIT_COLUMNS: &str =
    "habit_id, trainer_id, habit_name, description, target_value, unit, frequency, is_active, created_at";
const TASK_COLUMNS: &str = "id, user_key, role, data, status, created_at, updated_at";

#[async_trait]
impl Database for LibSqlBackend {
    // ── Users ───────────────────────────────────────────────────────

    async fn ensure_user(&self, phone: &str) -> Result<User, DatabaseError> {
        self.conn()
            .execute(
                "INSERT OR IGNORE INTO users (phone, created_at) VALUES (?1, ?2)",
                params![phone, Utc::now().to_rfc3339()],
            )
            .await
            .map_err(query_err)?;

        self.get_user(phone).await?.ok_or_else(|| DatabaseError::NotFound {
            entity: "user".into(),
            id: phone.into(),
        })
    }

    async fn get_user(&self, phone: &str) -> Result<Option<User>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT phone, active_role, created_at FROM users WHERE phone = ?1",
                params![phone],
            )
            .await
            .map_err(query_err)?;
        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row_to_user(&row).map_err(query_err)?)),
            None => Ok(None),
        }
    }

    async fn set_active_role(
        &self,
        phone: &str,
        role: Option<Role>,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE users SET active_role = ?1 WHERE phone = ?2",
                params![role.map(|r| r.as_str()), phone],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn delete_user(&self, phone: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute("DELETE FROM users WHERE phone = ?1", params![phone])
            .await
            .map_err(query_err)?;
        Ok(())
    }

    // ── Trainers ────────────────────────────────────────────────────

    async fn insert_trainer(&self, trainer: &Trainer) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO trainers (trainer_id, phone, name, email, business_name, specialization, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    trainer.trainer_id.as_str(),
                    trainer.phone.as_str(),
                    trainer.name.as_str(),
                    trainer.email.as_deref(),
                    trainer.business_name.as_deref(),
                    trainer.specialization.as_deref(),
                    trainer.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn get_trainer(&self, trainer_id: &str) -> Result<Option<Trainer>, DatabaseError> {
        let sql = format!("SELECT {TRAINER_COLUMNS} FROM trainers WHERE trainer_id = ?1");
        let mut rows = self
            .conn()
            .query(&sql, params![trainer_id])
            .await
            .map_err(query_err)?;
        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row_to_trainer(&row).map_err(query_err)?)),
            None => Ok(None),
        }
    }

    async fn get_trainer_by_phone(
        &self,
        phone: &str,
    ) -> Result<Option<Trainer>, DatabaseError> {
        let sql = format!(
            "SELECT {TRAINER_COLUMNS} FROM trainers WHERE phone = ?1 ORDER BY created_at DESC LIMIT 1"
        );
        let mut rows = self
            .conn()
            .query(&sql, params![phone])
            .await
            .map_err(query_err)?;
        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row_to_trainer(&row).map_err(query_err)?)),
            None => Ok(None),
        }
    }

    async fn update_trainer_field(
        &self,
        trainer_id: &str,
        field: &str,
        value: &str,
    ) -> Result<(), DatabaseError> {
        // Whitelisted columns only; field names come from flow config.
        let column = match field {
            "name" => "name",
            "email" => "email",
            "business_name" => "business_name",
            "specialization" => "specialization",
            other => {
                return Err(DatabaseError::Query(format!(
                    "Unknown trainer profile field: {other}"
                )))
            }
        };
        let sql = format!("UPDATE trainers SET {column} = ?1 WHERE trainer_id = ?2");
        self.conn()
            .execute(&sql, params![value, trainer_id])
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn delete_trainer(&self, trainer_id: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "DELETE FROM trainers WHERE trainer_id = ?1",
                params![trainer_id],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    // ── Clients ─────────────────────────────────────────────────────

    async fn insert_client(&self, client: &Client) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO clients (client_id, phone, name, email, fitness_goal, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    client.client_id.as_str(),
                    client.phone.as_str(),
                    client.name.as_str(),
                    client.email.as_deref(),
                    client.fitness_goal.as_deref(),
                    client.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn get_client(&self, client_id: &str) -> Result<Option<Client>, DatabaseError> {
        let sql = format!("SELECT {CLIENT_COLUMNS} FROM clients WHERE client_id = ?1");
        let mut rows = self
            .conn()
            .query(&sql, params![client_id])
            .await
            .map_err(query_err)?;
        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row_to_client(&row).map_err(query_err)?)),
            None => Ok(None),
        }
    }

    async fn get_client_by_phone(&self, phone: &str) -> Result<Option<Client>, DatabaseError> {
        let sql = format!(
            "SELECT {CLIENT_COLUMNS} FROM clients WHERE phone = ?1 ORDER BY created_at DESC LIMIT 1"
        );
        let mut rows = self
            .conn()
            .query(&sql, params![phone])
            .await
            .map_err(query_err)?;
        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row_to_client(&row).map_err(query_err)?)),
            None => Ok(None),
        }
    }

    async fn update_client_field(
        &self,
        client_id: &str,
        field: &str,
        value: &str,
    ) -> Result<(), DatabaseError> {
        let column = match field {
            "name" => "name",
            "email" => "email",
            "fitness_goal" => "fitness_goal",
            other => {
                return Err(DatabaseError::Query(format!(
                    "Unknown client profile field: {other}"
                )))
            }
        };
        let sql = format!("UPDATE clients SET {column} = ?1 WHERE client_id = ?2");
        self.conn()
            .execute(&sql, params![value, client_id])
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn delete_client(&self, client_id: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "DELETE FROM clients WHERE client_id = ?1",
                params![client_id],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn search_clients(
        &self,
        trainer_id: &str,
        query: &str,
    ) -> Result<Vec<Client>, DatabaseError> {
        let sql = format!(
            "SELECT c.client_id, c.phone, c.name, c.email, c.fitness_goal, c.created_at
             FROM clients c
             JOIN relationships r ON r.client_id = c.client_id
             WHERE r.trainer_id = ?1 AND r.is_active = 1
               AND LOWER(c.name) LIKE '%' || LOWER(?2) || '%'
             ORDER BY c.name"
        );
        let mut rows = self
            .conn()
            .query(&sql, params![trainer_id, query])
            .await
            .map_err(query_err)?;
        let mut clients = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            clients.push(row_to_client(&row).map_err(query_err)?);
        }
        Ok(clients)
    }

    async fn list_clients_for_trainer(
        &self,
        trainer_id: &str,
    ) -> Result<Vec<Client>, DatabaseError> {
        let sql = "SELECT c.client_id, c.phone, c.name, c.email, c.fitness_goal, c.created_at
             FROM clients c
             JOIN relationships r ON r.client_id = c.client_id
             WHERE r.trainer_id = ?1 AND r.is_active = 1
             ORDER BY c.name";
        let mut rows = self
            .conn()
            .query(sql, params![trainer_id])
            .await
            .map_err(query_err)?;
        let mut clients = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            clients.push(row_to_client(&row).map_err(query_err)?);
        }
        Ok(clients)
    }

    // ── Tasks ───────────────────────────────────────────────────────

    async fn create_task(
        &self,
        user_key: &str,
        role: Role,
        data: &TaskData,
    ) -> Result<Task, DatabaseError> {
        // Replace, never interleave: at most one running task per (user, role).
        self.conn()
            .execute(
                "UPDATE tasks SET status = 'stopped', updated_at = ?1
                 WHERE user_key = ?2 AND role = ?3 AND status = 'running'",
                params![Utc::now().to_rfc3339(), user_key, role.as_str()],
            )
            .await
            .map_err(query_err)?;

        let id = Uuid::new_v4();
        let now = Utc::now();
        let data_json = serde_json::to_string(data)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        self.conn()
            .execute(
                "INSERT INTO tasks (id, user_key, role, task_type, data, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'running', ?6, ?6)",
                params![
                    id.to_string(),
                    user_key,
                    role.as_str(),
                    data.task_type().as_str(),
                    data_json,
                    now.to_rfc3339(),
                ],
            )
            .await
            .map_err(query_err)?;

        Ok(Task {
            id,
            user_key: user_key.to_string(),
            role,
            data: data.clone(),
            status: TaskStatus::Running,
            created_at: now,
            updated_at: now,
        })
    }

    async fn get_running_task(
        &self,
        user_key: &str,
        role: Role,
    ) -> Result<Option<Task>, DatabaseError> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks
             WHERE user_key = ?1 AND role = ?2 AND status = 'running'
             ORDER BY created_at DESC LIMIT 1"
        );
        let mut rows = self
            .conn()
            .query(&sql, params![user_key, role.as_str()])
            .await
            .map_err(query_err)?;
        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row_to_task(&row)?)),
            None => Ok(None),
        }
    }

    async fn update_task(&self, id: Uuid, data: &TaskData) -> Result<(), DatabaseError> {
        let data_json = serde_json::to_string(data)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        self.conn()
            .execute(
                "UPDATE tasks SET data = ?1, updated_at = ?2 WHERE id = ?3",
                params![data_json, Utc::now().to_rfc3339(), id.to_string()],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn complete_task(&self, id: Uuid) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE tasks SET status = 'completed', updated_at = ?1 WHERE id = ?2",
                params![Utc::now().to_rfc3339(), id.to_string()],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn stop_task(&self, id: Uuid) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE tasks SET status = 'stopped', updated_at = ?1 WHERE id = ?2",
                params![Utc::now().to_rfc3339(), id.to_string()],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn list_registration_tasks(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<RegistrationTaskRow>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT role, status, data, created_at FROM tasks
                 WHERE task_type = 'registration' AND created_at >= ?1
                 ORDER BY created_at",
                params![since.to_rfc3339()],
            )
            .await
            .map_err(query_err)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            let role_str: String = row.get(0).map_err(query_err)?;
            let status_str: String = row.get(1).map_err(query_err)?;
            let data_str: String = row.get(2).map_err(query_err)?;
            let created_str: String = row.get(3).map_err(query_err)?;

            let (Some(role), Some(status)) =
                (Role::parse(&role_str), TaskStatus::parse(&status_str))
            else {
                continue;
            };
            let field_index = serde_json::from_str::<serde_json::Value>(&data_str)
                .ok()
                .and_then(|v| v.get("current_field_index").and_then(|i| i.as_u64()))
                .unwrap_or(0) as usize;

            out.push(RegistrationTaskRow {
                role,
                status,
                field_index,
                created_at: parse_datetime(&created_str),
            });
        }
        Ok(out)
    }

    // ── Habits ──────────────────────────────────────────────────────

    async fn insert_habit(&self, habit: &Habit) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO fitness_habits
                   (habit_id, trainer_id, habit_name, description, target_value, unit, frequency, is_active, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    habit.habit_id.as_str(),
                    habit.trainer_id.as_str(),
                    habit.habit_name.as_str(),
                    habit.description.as_deref(),
                    habit.target_value,
                    habit.unit.as_str(),
                    habit.frequency.as_str(),
                    habit.is_active as i64,
                    habit.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn get_habit(&self, habit_id: &str) -> Result<Option<Habit>, DatabaseError> {
        let sql = format!("SELECT {HABIT_COLUMNS} FROM fitness_habits WHERE habit_id = ?1");
        let mut rows = self
            .conn()
            .query(&sql, params![habit_id])
            .await
            .map_err(query_err)?;
        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row_to_habit(&row).map_err(query_err)?)),
            None => Ok(None),
        }
    }

    async fn list_habits_for_trainer(
        &self,
        trainer_id: &str,
    ) -> Result<Vec<Habit>, DatabaseError> {
        let sql = format!(
            "SELECT {HABIT_COLUMNS} FROM fitness_habits
             WHERE trainer_id = ?1 AND is_active = 1
             ORDER BY habit_name"
        );
        let mut rows = self
            .conn()
            .query(&sql, params![trainer_id])
            .await
            .map_err(query_err)?;
        let mut habits = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            habits.push(row_to_habit(&row).map_err(query_err)?);
        }
        Ok(habits)
    }

    async fn update_habit(&self, habit: &Habit) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE fitness_habits
                 SET habit_name = ?1, description = ?2, target_value = ?3, unit = ?4, frequency = ?5
                 WHERE habit_id = ?6",
                params![
                    habit.habit_name.as_str(),
                    habit.description.as_deref(),
                    habit.target_value,
                    habit.unit.as_str(),
                    habit.frequency.as_str(),
                    habit.habit_id.as_str(),
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn deactivate_habit(&self, habit_id: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE fitness_habits SET is_active = 0 WHERE habit_id = ?1",
                params![habit_id],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    // ── Assignments ─────────────────────────────────────────────────

    async fn get_assignment(
        &self,
        habit_id: &str,
        client_id: &str,
    ) -> Result<Option<HabitAssignment>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, habit_id, client_id, trainer_id, is_active, assigned_date
                 FROM trainee_habit_assignments
                 WHERE habit_id = ?1 AND client_id = ?2",
                params![habit_id, client_id],
            )
            .await
            .map_err(query_err)?;
        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row_to_assignment(&row).map_err(query_err)?)),
            None => Ok(None),
        }
    }

    async fn insert_assignment(
        &self,
        assignment: &HabitAssignment,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO trainee_habit_assignments
                   (id, habit_id, client_id, trainer_id, is_active, assigned_date)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    assignment.id.to_string(),
                    assignment.habit_id.as_str(),
                    assignment.client_id.as_str(),
                    assignment.trainer_id.as_str(),
                    assignment.is_active as i64,
                    assignment.assigned_date.format("%Y-%m-%d").to_string(),
                ],
            )
            .await
            .map_err(|e| {
                let msg = e.to_string();
                if msg.contains("UNIQUE") {
                    DatabaseError::Constraint(format!(
                        "Assignment ({}, {})",
                        assignment.habit_id, assignment.client_id
                    ))
                } else {
                    DatabaseError::Query(msg)
                }
            })?;
        Ok(())
    }

    async fn set_assignment_active(
        &self,
        habit_id: &str,
        client_id: &str,
        active: bool,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE trainee_habit_assignments SET is_active = ?1
                 WHERE habit_id = ?2 AND client_id = ?3",
                params![active as i64, habit_id, client_id],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn list_active_habits_for_client(
        &self,
        client_id: &str,
    ) -> Result<Vec<Habit>, DatabaseError> {
        let sql = "SELECT h.habit_id, h.trainer_id, h.habit_name, h.description, h.target_value,
                    h.unit, h.frequency, h.is_active, h.created_at
             FROM fitness_habits h
             JOIN trainee_habit_assignments a ON a.habit_id = h.habit_id
             WHERE a.client_id = ?1 AND a.is_active = 1 AND h.is_active = 1
             ORDER BY h.habit_name";
        let mut rows = self
            .conn()
            .query(sql, params![client_id])
            .await
            .map_err(query_err)?;
        let mut habits = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            habits.push(row_to_habit(&row).map_err(query_err)?);
        }
        Ok(habits)
    }

    // ── Habit logs ──────────────────────────────────────────────────

    async fn insert_habit_log(&self, log: &HabitLog) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO habit_logs (id, client_id, habit_id, value, logged_on, logged_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    log.id.to_string(),
                    log.client_id.as_str(),
                    log.habit_id.as_str(),
                    log.value,
                    log.logged_on.format("%Y-%m-%d").to_string(),
                    log.logged_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn sum_logs_for_day(
        &self,
        client_id: &str,
        habit_id: &str,
        day: NaiveDate,
    ) -> Result<f64, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COALESCE(SUM(value), 0.0) FROM habit_logs
                 WHERE client_id = ?1 AND habit_id = ?2 AND logged_on = ?3",
                params![client_id, habit_id, day.format("%Y-%m-%d").to_string()],
            )
            .await
            .map_err(query_err)?;
        match rows.next().await.map_err(query_err)? {
            Some(row) => row.get(0).map_err(query_err),
            None => Ok(0.0),
        }
    }

    async fn list_logs_since(
        &self,
        client_id: &str,
        since: NaiveDate,
    ) -> Result<Vec<HabitLog>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, client_id, habit_id, value, logged_on, logged_at
                 FROM habit_logs
                 WHERE client_id = ?1 AND logged_on >= ?2
                 ORDER BY logged_at",
                params![client_id, since.format("%Y-%m-%d").to_string()],
            )
            .await
            .map_err(query_err)?;
        let mut logs = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            logs.push(row_to_log(&row).map_err(query_err)?);
        }
        Ok(logs)
    }

    // ── Invitations & relationships ─────────────────────────────────

    async fn insert_invitation(&self, invitation: &Invitation) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO client_invitations (invitation_id, trainer_id, phone, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    invitation.invitation_id.as_str(),
                    invitation.trainer_id.as_str(),
                    invitation.phone.as_str(),
                    invitation.status.as_str(),
                    invitation.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn get_invitation(
        &self,
        invitation_id: &str,
    ) -> Result<Option<Invitation>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT invitation_id, trainer_id, phone, status, created_at
                 FROM client_invitations WHERE invitation_id = ?1",
                params![invitation_id],
            )
            .await
            .map_err(query_err)?;
        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row_to_invitation(&row).map_err(query_err)?)),
            None => Ok(None),
        }
    }

    async fn get_pending_invitation_for_phone(
        &self,
        phone: &str,
    ) -> Result<Option<Invitation>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT invitation_id, trainer_id, phone, status, created_at
                 FROM client_invitations
                 WHERE phone = ?1 AND status = 'pending'
                 ORDER BY created_at DESC LIMIT 1",
                params![phone],
            )
            .await
            .map_err(query_err)?;
        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row_to_invitation(&row).map_err(query_err)?)),
            None => Ok(None),
        }
    }

    async fn set_invitation_status(
        &self,
        invitation_id: &str,
        status: InvitationStatus,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE client_invitations SET status = ?1 WHERE invitation_id = ?2",
                params![status.as_str(), invitation_id],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn insert_relationship(
        &self,
        trainer_id: &str,
        client_id: &str,
    ) -> Result<(), DatabaseError> {
        // Reactivate a soft-deleted link instead of inserting a duplicate.
        if self.get_relationship(trainer_id, client_id).await?.is_some() {
            return self
                .set_relationship_active(trainer_id, client_id, true)
                .await;
        }
        self.conn()
            .execute(
                "INSERT INTO relationships (id, trainer_id, client_id, is_active, created_at)
                 VALUES (?1, ?2, ?3, 1, ?4)",
                params![
                    Uuid::new_v4().to_string(),
                    trainer_id,
                    client_id,
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn get_relationship(
        &self,
        trainer_id: &str,
        client_id: &str,
    ) -> Result<Option<Relationship>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, trainer_id, client_id, is_active, created_at
                 FROM relationships WHERE trainer_id = ?1 AND client_id = ?2",
                params![trainer_id, client_id],
            )
            .await
            .map_err(query_err)?;
        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row_to_relationship(&row).map_err(query_err)?)),
            None => Ok(None),
        }
    }

    async fn set_relationship_active(
        &self,
        trainer_id: &str,
        client_id: &str,
        active: bool,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE relationships SET is_active = ?1
                 WHERE trainer_id = ?2 AND client_id = ?3",
                params![active as i64, trainer_id, client_id],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    // ── Message history ─────────────────────────────────────────────

    async fn record_message(
        &self,
        phone: &str,
        direction: MessageDirection,
        content: &str,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO message_history (id, phone, direction, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    Uuid::new_v4().to_string(),
                    phone,
                    direction.as_str(),
                    content,
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }
}
