//! Inbound message routing.
//!
//! Precedence: known button payloads, then `/stop`, then the running
//! task, then slash commands, then the canned fallback. One message per
//! phone number is processed at a time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::channels::{
    Button, FileStorage, InboundMessage, ListRow, MessagingClient,
};
use crate::channels::whatsapp::normalize_phone;
use crate::error::{ChannelError, FlowError, Result};
use crate::flows::habits::HabitFlows;
use crate::flows::logging::LoggingFlow;
use crate::flows::profile::ProfileFlow;
use crate::flows::registration::{
    RegistrationFlow, BUTTON_REGISTER_CLIENT, BUTTON_REGISTER_TRAINER,
};
use crate::flows::relationships::{
    RelationshipFlows, BUTTON_INVITE_ACCEPT, BUTTON_INVITE_DECLINE,
};
use crate::flows::report::ReportFlow;
use crate::flows::task::{Task, TaskData};
use crate::flows::FlowServices;
use crate::store::model::{Client, MessageDirection, Role, Trainer};
use crate::store::Database;

const TRAINER_COMMANDS: &[&str] = &[
    "/create-habit",
    "/edit-habit",
    "/delete-habit",
    "/assign-habit",
    "/unassign-habit",
    "/invite",
    "/clients",
    "/find-client",
    "/remove-client",
];

const CLIENT_COMMANDS: &[&str] = &["/log", "/progress", "/export"];

/// Routes every inbound message to the right flow.
pub struct Router {
    svc: FlowServices,
    registration: RegistrationFlow,
    profile: ProfileFlow,
    habits: HabitFlows,
    logging: LoggingFlow,
    relationships: RelationshipFlows,
    report: ReportFlow,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Router {
    pub fn new(
        db: Arc<dyn Database>,
        messaging: Arc<dyn MessagingClient>,
        storage: Arc<dyn FileStorage>,
    ) -> Self {
        let recorded: Arc<dyn MessagingClient> = Arc::new(RecordedMessaging {
            inner: messaging,
            db: db.clone(),
        });
        let svc = FlowServices::new(db, recorded, storage);
        Self {
            registration: RegistrationFlow::new(svc.clone()),
            profile: ProfileFlow::new(svc.clone()),
            habits: HabitFlows::new(svc.clone()),
            logging: LoggingFlow::new(svc.clone()),
            relationships: RelationshipFlows::new(svc.clone()),
            report: ReportFlow::new(svc.clone()),
            svc,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Process one inbound message end to end.
    pub async fn handle_message(&self, msg: InboundMessage) -> Result<()> {
        let phone = normalize_phone(&msg.phone);
        let lock = self.lock_for(&phone);
        let _guard = lock.lock().await;

        if let Err(err) = self
            .svc
            .db
            .record_message(&phone, MessageDirection::Inbound, &msg.text)
            .await
        {
            tracing::warn!(%err, "failed to record inbound message");
        }
        self.svc.db.ensure_user(&phone).await.map_err(FlowError::from)?;

        let input = msg.button_id.as_deref().unwrap_or(msg.text.trim());

        // Known button payloads bypass everything else.
        if let Some(handled) = self.try_buttons(&phone, input).await? {
            return Ok(handled);
        }

        let active_role = self
            .svc
            .db
            .get_user(&phone)
            .await
            .map_err(FlowError::from)?
            .and_then(|u| u.active_role);

        if input.eq_ignore_ascii_case("/stop") {
            return self.stop_running(&phone, active_role).await;
        }

        if let Some(task) = self.find_running(&phone, active_role).await? {
            if let Err(err) = self.dispatch_task(&phone, &task, input).await {
                let task_type = task.data.task_type();
                tracing::error!(%err, %task_type, "task step failed, stopping task");
                if let Err(stop_err) = self.svc.db.stop_task(task.id).await {
                    tracing::error!(%stop_err, "failed to stop task after error");
                }
                self.svc
                    .messaging
                    .send_text(&phone, &self.svc.messages.task_failed(task_type))
                    .await
                    .map_err(FlowError::from)?;
            }
            return Ok(());
        }

        if input.starts_with('/') {
            return self.dispatch_command(&phone, active_role, input).await;
        }

        self.fallback(&phone, active_role, input).await
    }

    fn lock_for(&self, phone: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        // Drop entries no handler is holding so the map doesn't grow
        // with every phone number ever seen.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry(phone.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    // ── Buttons ─────────────────────────────────────────────────────

    async fn try_buttons(&self, phone: &str, input: &str) -> Result<Option<()>> {
        if input == BUTTON_REGISTER_TRAINER {
            self.registration.start(phone, Role::Trainer).await?;
            return Ok(Some(()));
        }
        if input == BUTTON_REGISTER_CLIENT {
            self.registration.start(phone, Role::Client).await?;
            return Ok(Some(()));
        }
        if let Some(id) = input.strip_prefix(BUTTON_INVITE_ACCEPT) {
            self.relationships.respond_invitation(phone, id, true).await?;
            return Ok(Some(()));
        }
        if let Some(id) = input.strip_prefix(BUTTON_INVITE_DECLINE) {
            self.relationships
                .respond_invitation(phone, id, false)
                .await?;
            return Ok(Some(()));
        }
        Ok(None)
    }

    // ── Running tasks ───────────────────────────────────────────────

    /// Look up the running task, checking the active role first so a
    /// dual-role user's current conversation wins.
    async fn find_running(
        &self,
        phone: &str,
        active_role: Option<Role>,
    ) -> Result<Option<Task>> {
        let order = match active_role {
            Some(role) => [role, role.other()],
            None => [Role::Trainer, Role::Client],
        };
        for role in order {
            if let Some(task) = self
                .svc
                .db
                .get_running_task(phone, role)
                .await
                .map_err(FlowError::from)?
            {
                return Ok(Some(task));
            }
        }
        Ok(None)
    }

    async fn stop_running(&self, phone: &str, active_role: Option<Role>) -> Result<()> {
        let body = match self.find_running(phone, active_role).await? {
            Some(task) => {
                self.svc.db.stop_task(task.id).await.map_err(FlowError::from)?;
                self.svc.messages.task_stopped()
            }
            None => self.svc.messages.nothing_to_stop(),
        };
        self.svc
            .messaging
            .send_text(phone, &body)
            .await
            .map_err(FlowError::from)?;
        Ok(())
    }

    async fn dispatch_task(
        &self,
        phone: &str,
        task: &Task,
        input: &str,
    ) -> std::result::Result<(), FlowError> {
        match &task.data {
            TaskData::Registration { .. } => self.registration.handle(task, input).await,
            TaskData::ProfileEdit { .. } => self.profile.handle_edit(task, input).await,
            TaskData::AccountDeletion => self.profile.handle_delete(task, input).await,
            TaskData::HabitCreate { .. } => {
                let trainer = self.require_trainer(phone).await?;
                self.habits.handle_create(&trainer, task, input).await
            }
            TaskData::HabitEdit { .. } => {
                let trainer = self.require_trainer(phone).await?;
                self.habits.handle_edit(&trainer, task, input).await
            }
            TaskData::HabitDelete { .. } => {
                let trainer = self.require_trainer(phone).await?;
                self.habits.handle_delete(&trainer, task, input).await
            }
            TaskData::HabitAssign { .. } => {
                let trainer = self.require_trainer(phone).await?;
                self.habits.handle_assign(&trainer, task, input).await
            }
            TaskData::HabitUnassign { .. } => {
                let trainer = self.require_trainer(phone).await?;
                self.habits.handle_unassign(&trainer, task, input).await
            }
            TaskData::HabitLog { .. } => {
                let client = self.require_client(phone).await?;
                self.logging.handle(&client, task, input).await
            }
            TaskData::InviteClient => {
                let trainer = self.require_trainer(phone).await?;
                self.relationships.handle_invite(&trainer, task, input).await
            }
            TaskData::RemoveClient { .. } => {
                let trainer = self.require_trainer(phone).await?;
                self.relationships.handle_remove(&trainer, task, input).await
            }
        }
    }

    // ── Commands ────────────────────────────────────────────────────

    async fn dispatch_command(
        &self,
        phone: &str,
        active_role: Option<Role>,
        input: &str,
    ) -> Result<()> {
        let (command, args) = match input.split_once(char::is_whitespace) {
            Some((c, a)) => (c.to_lowercase(), a.trim()),
            None => (input.to_lowercase(), ""),
        };

        // Universal commands first.
        match command.as_str() {
            "/help" => {
                let body = match active_role {
                    Some(role) => self.svc.messages.help(role),
                    None => self.svc.messages.not_registered(),
                };
                self.send(phone, &body).await?;
                return Ok(());
            }
            "/register" => {
                match active_role {
                    Some(role) => self.registration.start(phone, role).await?,
                    None => self.registration.send_role_choice(phone).await?,
                }
                return Ok(());
            }
            "/switch-role" => return self.switch_role(phone, active_role).await,
            "/logout" => {
                self.svc
                    .db
                    .set_active_role(phone, None)
                    .await
                    .map_err(FlowError::from)?;
                self.send(phone, "You're logged out. Message me any time to pick a role.")
                    .await?;
                return Ok(());
            }
            "/edit-profile" => {
                let Some(role) = active_role else {
                    return self.send(phone, &self.svc.messages.not_registered()).await;
                };
                self.profile.start_edit(phone, role).await?;
                return Ok(());
            }
            "/delete-account" => {
                let Some(role) = active_role else {
                    return self.send(phone, &self.svc.messages.not_registered()).await;
                };
                self.profile.start_delete(phone, role).await?;
                return Ok(());
            }
            _ => {}
        }

        // Role-gated commands.
        let Some(role) = active_role else {
            return self.send(phone, &self.svc.messages.not_registered()).await;
        };
        if TRAINER_COMMANDS.contains(&command.as_str()) && role != Role::Trainer {
            return self.send(phone, &self.svc.messages.trainer_only()).await;
        }
        if CLIENT_COMMANDS.contains(&command.as_str()) && role != Role::Client {
            return self.send(phone, &self.svc.messages.client_only()).await;
        }

        match (role, command.as_str()) {
            (Role::Trainer, "/create-habit") => {
                let trainer = self.require_trainer(phone).await?;
                self.habits.start_create(&trainer).await?;
            }
            (Role::Trainer, "/habits") => {
                let trainer = self.require_trainer(phone).await?;
                self.habits.list_habits(&trainer).await?;
            }
            (Role::Trainer, "/edit-habit") => {
                let trainer = self.require_trainer(phone).await?;
                self.habits.start_edit(&trainer).await?;
            }
            (Role::Trainer, "/delete-habit") => {
                let trainer = self.require_trainer(phone).await?;
                self.habits.start_delete(&trainer).await?;
            }
            (Role::Trainer, "/assign-habit") => {
                let trainer = self.require_trainer(phone).await?;
                self.habits.start_assign(&trainer).await?;
            }
            (Role::Trainer, "/unassign-habit") => {
                let trainer = self.require_trainer(phone).await?;
                self.habits.start_unassign(&trainer).await?;
            }
            (Role::Trainer, "/invite") => {
                let trainer = self.require_trainer(phone).await?;
                self.relationships.start_invite(&trainer).await?;
            }
            (Role::Trainer, "/clients") => {
                let trainer = self.require_trainer(phone).await?;
                self.relationships.list(&trainer).await?;
            }
            (Role::Trainer, "/find-client") => {
                let trainer = self.require_trainer(phone).await?;
                self.relationships.search(&trainer, args).await?;
            }
            (Role::Trainer, "/remove-client") => {
                let trainer = self.require_trainer(phone).await?;
                self.relationships.start_remove(&trainer).await?;
            }
            (Role::Client, "/habits") => {
                let client = self.require_client(phone).await?;
                self.logging.list_habits(&client).await?;
            }
            (Role::Client, "/log") => {
                let client = self.require_client(phone).await?;
                self.logging.start(&client).await?;
            }
            (Role::Client, "/progress") => {
                let client = self.require_client(phone).await?;
                self.report.progress(&client).await?;
            }
            (Role::Client, "/export") => {
                let client = self.require_client(phone).await?;
                self.report.export_csv(&client).await?;
            }
            _ => {
                self.send(
                    phone,
                    "I don't know that command. Send /help to see what I can do.",
                )
                .await?;
            }
        }
        Ok(())
    }

    async fn switch_role(&self, phone: &str, active_role: Option<Role>) -> Result<()> {
        let Some(role) = active_role else {
            return self.send(phone, &self.svc.messages.not_registered()).await;
        };
        let other = role.other();
        let other_exists = match other {
            Role::Trainer => self
                .svc
                .db
                .get_trainer_by_phone(phone)
                .await
                .map_err(FlowError::from)?
                .is_some(),
            Role::Client => self
                .svc
                .db
                .get_client_by_phone(phone)
                .await
                .map_err(FlowError::from)?
                .is_some(),
        };
        if other_exists {
            self.svc
                .db
                .set_active_role(phone, Some(other))
                .await
                .map_err(FlowError::from)?;
            self.send(phone, &format!("Switched! You're now acting as a {other}."))
                .await?;
        } else {
            self.send(
                phone,
                &format!("You don't have a {other} profile yet. Let's create one."),
            )
            .await?;
            self.registration.start(phone, other).await?;
        }
        Ok(())
    }

    // ── Fallback ────────────────────────────────────────────────────

    async fn fallback(
        &self,
        phone: &str,
        active_role: Option<Role>,
        input: &str,
    ) -> Result<()> {
        match active_role {
            Some(role) => {
                let name = match role {
                    Role::Trainer => self
                        .svc
                        .db
                        .get_trainer_by_phone(phone)
                        .await
                        .map_err(FlowError::from)?
                        .map(|t| t.name),
                    Role::Client => self
                        .svc
                        .db
                        .get_client_by_phone(phone)
                        .await
                        .map_err(FlowError::from)?
                        .map(|c| c.name),
                };
                let name = name.unwrap_or_else(|| "there".to_string());
                self.send(phone, &self.svc.messages.fallback(&name)).await
            }
            None => {
                // Role keywords double as registration triggers.
                if let Some(role) = Role::parse(&input.to_lowercase()) {
                    self.registration.start(phone, role).await?;
                    return Ok(());
                }
                self.registration.send_role_choice(phone).await?;
                Ok(())
            }
        }
    }

    // ── Helpers ─────────────────────────────────────────────────────

    async fn send(&self, phone: &str, body: &str) -> Result<()> {
        self.svc
            .messaging
            .send_text(phone, body)
            .await
            .map_err(FlowError::from)?;
        Ok(())
    }

    async fn require_trainer(&self, phone: &str) -> std::result::Result<Trainer, FlowError> {
        self.svc
            .db
            .get_trainer_by_phone(phone)
            .await?
            .ok_or_else(|| FlowError::NotFound {
                entity: "trainer".into(),
                id: phone.into(),
            })
    }

    async fn require_client(&self, phone: &str) -> std::result::Result<Client, FlowError> {
        self.svc
            .db
            .get_client_by_phone(phone)
            .await?
            .ok_or_else(|| FlowError::NotFound {
                entity: "client".into(),
                id: phone.into(),
            })
    }
}

/// Messaging decorator that mirrors outbound sends into the message
/// history table. Recording failures never block the send.
struct RecordedMessaging {
    inner: Arc<dyn MessagingClient>,
    db: Arc<dyn Database>,
}

impl RecordedMessaging {
    async fn record(&self, to: &str, content: &str) {
        if let Err(err) = self
            .db
            .record_message(to, MessageDirection::Outbound, content)
            .await
        {
            tracing::warn!(%err, "failed to record outbound message");
        }
    }
}

#[async_trait]
impl MessagingClient for RecordedMessaging {
    async fn send_text(&self, to: &str, body: &str) -> std::result::Result<(), ChannelError> {
        self.inner.send_text(to, body).await?;
        self.record(to, body).await;
        Ok(())
    }

    async fn send_buttons(
        &self,
        to: &str,
        body: &str,
        buttons: &[Button],
    ) -> std::result::Result<(), ChannelError> {
        self.inner.send_buttons(to, body, buttons).await?;
        self.record(to, body).await;
        Ok(())
    }

    async fn send_list(
        &self,
        to: &str,
        body: &str,
        button_label: &str,
        rows: &[ListRow],
    ) -> std::result::Result<(), ChannelError> {
        self.inner.send_list(to, body, button_label, rows).await?;
        self.record(to, body).await;
        Ok(())
    }

    async fn send_document_link(
        &self,
        to: &str,
        url: &str,
        filename: &str,
        caption: Option<&str>,
    ) -> std::result::Result<(), ChannelError> {
        self.inner
            .send_document_link(to, url, filename, caption)
            .await?;
        self.record(to, &format!("[document] {filename}")).await;
        Ok(())
    }

    async fn send_registration_flow(
        &self,
        to: &str,
        role: Role,
    ) -> std::result::Result<(), ChannelError> {
        self.inner.send_registration_flow(to, role).await?;
        self.record(to, "[registration form]").await;
        Ok(())
    }
}
