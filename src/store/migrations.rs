//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "users_and_tasks",
        sql: r#"
            CREATE TABLE IF NOT EXISTS users (
                phone TEXT PRIMARY KEY,
                active_role TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS trainers (
                trainer_id TEXT PRIMARY KEY,
                phone TEXT NOT NULL,
                name TEXT NOT NULL,
                email TEXT,
                business_name TEXT,
                specialization TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_trainers_phone ON trainers(phone);

            CREATE TABLE IF NOT EXISTS clients (
                client_id TEXT PRIMARY KEY,
                phone TEXT NOT NULL,
                name TEXT NOT NULL,
                email TEXT,
                fitness_goal TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_clients_phone ON clients(phone);

            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                user_key TEXT NOT NULL,
                role TEXT NOT NULL,
                task_type TEXT NOT NULL,
                data TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'running',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_user_role ON tasks(user_key, role, status);
            CREATE INDEX IF NOT EXISTS idx_tasks_type ON tasks(task_type, created_at);
        "#,
    },
    Migration {
        version: 2,
        name: "habits_system",
        sql: r#"
            CREATE TABLE IF NOT EXISTS fitness_habits (
                habit_id TEXT PRIMARY KEY,
                trainer_id TEXT NOT NULL,
                habit_name TEXT NOT NULL,
                description TEXT,
                target_value REAL NOT NULL,
                unit TEXT NOT NULL,
                frequency TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_habits_trainer ON fitness_habits(trainer_id, is_active);

            CREATE TABLE IF NOT EXISTS trainee_habit_assignments (
                id TEXT PRIMARY KEY,
                habit_id TEXT NOT NULL,
                client_id TEXT NOT NULL,
                trainer_id TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                assigned_date TEXT NOT NULL,
                UNIQUE (habit_id, client_id)
            );
            CREATE INDEX IF NOT EXISTS idx_assignments_client
                ON trainee_habit_assignments(client_id, is_active);

            CREATE TABLE IF NOT EXISTS habit_logs (
                id TEXT PRIMARY KEY,
                client_id TEXT NOT NULL,
                habit_id TEXT NOT NULL,
                value REAL NOT NULL,
                logged_on TEXT NOT NULL,
                logged_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_logs_client_habit_day
                ON habit_logs(client_id, habit_id, logged_on);
        "#,
    },
    Migration {
        version: 3,
        name: "relationships_and_history",
        sql: r#"
            CREATE TABLE IF NOT EXISTS client_invitations (
                invitation_id TEXT PRIMARY KEY,
                trainer_id TEXT NOT NULL,
                phone TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_invitations_phone
                ON client_invitations(phone, status);

            CREATE TABLE IF NOT EXISTS relationships (
                id TEXT PRIMARY KEY,
                trainer_id TEXT NOT NULL,
                client_id TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                UNIQUE (trainer_id, client_id)
            );
            CREATE INDEX IF NOT EXISTS idx_relationships_trainer
                ON relationships(trainer_id, is_active);
            CREATE INDEX IF NOT EXISTS idx_relationships_client
                ON relationships(client_id, is_active);

            CREATE TABLE IF NOT EXISTS message_history (
                id TEXT PRIMARY KEY,
                phone TEXT NOT NULL,
                direction TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_history_phone ON message_history(phone, created_at);
        "#,
    },
];

/// Run all pending migrations against the given connection.
///
/// Creates the `_migrations` table if it doesn't exist.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    tracing::info!(
        version = get_current_version(conn).await?,
        "Database migrations complete"
    );
    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => {
            let version: i64 = row.get(0).map_err(|e| {
                DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
            })?;
            Ok(version)
        }
        None => Ok(0),
    }
}

/// Insert a version record into `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}
