//! Profile editing and account deletion.

use crate::error::FlowError;
use crate::flows::engine::{parse_confirm, ConfirmReply, FieldFlow, FieldStep};
use crate::flows::fields::{CLIENT_PROFILE_FIELDS, TRAINER_PROFILE_FIELDS};
use crate::flows::task::{Collected, Task, TaskData};
use crate::flows::FlowServices;
use crate::store::model::Role;

pub struct ProfileFlow {
    svc: FlowServices,
}

impl ProfileFlow {
    pub fn new(svc: FlowServices) -> Self {
        Self { svc }
    }

    fn field_flow(role: Role) -> FieldFlow {
        match role {
            Role::Trainer => FieldFlow::new(TRAINER_PROFILE_FIELDS),
            Role::Client => FieldFlow::new(CLIENT_PROFILE_FIELDS),
        }
    }

    /// Begin a profile edit: one question per field, skip keeps the
    /// current value.
    pub async fn start_edit(&self, phone: &str, role: Role) -> Result<(), FlowError> {
        let data = TaskData::ProfileEdit {
            current_field_index: 0,
            collected: Collected::new(),
        };
        self.svc.db.create_task(phone, role, &data).await?;
        let body = format!(
            "Let's update your profile. Reply 'skip' to keep a value as it is.\n\n{}",
            Self::field_flow(role).first_prompt()
        );
        self.svc.messaging.send_text(phone, &body).await?;
        Ok(())
    }

    pub async fn handle_edit(&self, task: &Task, input: &str) -> Result<(), FlowError> {
        let TaskData::ProfileEdit {
            current_field_index,
            collected,
        } = &task.data
        else {
            return Err(FlowError::Integration(
                "profile handler got a non-profile task".into(),
            ));
        };
        let mut index = *current_field_index;
        let mut collected = collected.clone();
        let role = task.role;

        let flow = Self::field_flow(role);
        match flow.handle(&mut index, &mut collected, input) {
            FieldStep::Reprompt(body) => {
                self.svc.messaging.send_text(&task.user_key, &body).await?;
                Ok(())
            }
            FieldStep::Next(prompt) => {
                let data = TaskData::ProfileEdit {
                    current_field_index: index,
                    collected,
                };
                self.svc.db.update_task(task.id, &data).await?;
                self.svc.messaging.send_text(&task.user_key, &prompt).await?;
                Ok(())
            }
            FieldStep::Complete => {
                self.svc.db.complete_task(task.id).await?;
                let changed = self.apply(&task.user_key, role, &collected).await?;
                let body = if changed == 0 {
                    "No changes made. Your profile is as it was.".to_string()
                } else {
                    format!("Done! Updated {changed} field(s) on your profile.")
                };
                self.svc.messaging.send_text(&task.user_key, &body).await?;
                Ok(())
            }
        }
    }

    /// Write each non-skipped answer to its profile column.
    async fn apply(
        &self,
        phone: &str,
        role: Role,
        collected: &Collected,
    ) -> Result<usize, FlowError> {
        let mut changed = 0;
        match role {
            Role::Trainer => {
                let trainer =
                    self.svc.db.get_trainer_by_phone(phone).await?.ok_or_else(|| {
                        FlowError::NotFound {
                            entity: "trainer".into(),
                            id: phone.into(),
                        }
                    })?;
                for (field, value) in collected {
                    if let Some(text) = value.as_str() {
                        self.svc
                            .db
                            .update_trainer_field(&trainer.trainer_id, field, text)
                            .await?;
                        changed += 1;
                    }
                }
            }
            Role::Client => {
                let client =
                    self.svc.db.get_client_by_phone(phone).await?.ok_or_else(|| {
                        FlowError::NotFound {
                            entity: "client".into(),
                            id: phone.into(),
                        }
                    })?;
                for (field, value) in collected {
                    if let Some(text) = value.as_str() {
                        self.svc
                            .db
                            .update_client_field(&client.client_id, field, text)
                            .await?;
                        changed += 1;
                    }
                }
            }
        }
        Ok(changed)
    }

    /// Begin account deletion: a single confirmation step.
    pub async fn start_delete(&self, phone: &str, role: Role) -> Result<(), FlowError> {
        self.svc
            .db
            .create_task(phone, role, &TaskData::AccountDeletion)
            .await?;
        let body = format!(
            "This will permanently remove your {role} profile. \
             Reply YES (in capitals) to confirm, or NO to keep it."
        );
        self.svc.messaging.send_text(phone, &body).await?;
        Ok(())
    }

    /// Only a literal uppercase YES deletes. NO cancels; anything else
    /// repeats the question.
    pub async fn handle_delete(&self, task: &Task, input: &str) -> Result<(), FlowError> {
        let phone = &task.user_key;
        let role = task.role;

        match parse_confirm(input) {
            ConfirmReply::Unclear => {
                self.svc
                    .messaging
                    .send_text(
                        phone,
                        "Please reply YES (in capitals) to delete your profile, or NO to keep it.",
                    )
                    .await?;
                return Ok(());
            }
            ConfirmReply::No => {
                self.svc.db.complete_task(task.id).await?;
                self.svc
                    .messaging
                    .send_text(phone, "Okay, your profile stays. Nothing was deleted.")
                    .await?;
                return Ok(());
            }
            ConfirmReply::Yes => {}
        }
        self.svc.db.complete_task(task.id).await?;

        match role {
            Role::Trainer => {
                if let Some(trainer) = self.svc.db.get_trainer_by_phone(phone).await? {
                    self.svc.db.delete_trainer(&trainer.trainer_id).await?;
                }
            }
            Role::Client => {
                if let Some(client) = self.svc.db.get_client_by_phone(phone).await? {
                    self.svc.db.delete_client(&client.client_id).await?;
                }
            }
        }

        // Fall back to the other role's profile if one exists.
        let other = role.other();
        let other_exists = match other {
            Role::Trainer => self.svc.db.get_trainer_by_phone(phone).await?.is_some(),
            Role::Client => self.svc.db.get_client_by_phone(phone).await?.is_some(),
        };
        let body = if other_exists {
            self.svc.db.set_active_role(phone, Some(other)).await?;
            format!("Your {role} profile is gone. You're now using your {other} profile.")
        } else {
            self.svc.db.set_active_role(phone, None).await?;
            "Your profile has been deleted. Message me any time to start again.".to_string()
        };
        self.svc.messaging.send_text(phone, &body).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Database;
    use crate::flows::testutil;

    const PHONE: &str = "27820000002";

    async fn running(db: &dyn crate::store::Database, role: Role) -> Task {
        db.get_running_task(PHONE, role).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn edit_updates_only_answered_fields() {
        let (svc, _messaging, db) = testutil::services().await;
        let trainer = testutil::seed_trainer(db.as_ref(), PHONE).await;
        let flow = ProfileFlow::new(svc);

        flow.start_edit(PHONE, Role::Trainer).await.unwrap();
        let task = running(db.as_ref(), Role::Trainer).await;
        flow.handle_edit(&task, "skip").await.unwrap();
        let task = running(db.as_ref(), Role::Trainer).await;
        flow.handle_edit(&task, "new@example.com").await.unwrap();
        let task = running(db.as_ref(), Role::Trainer).await;
        flow.handle_edit(&task, "skip").await.unwrap();
        let task = running(db.as_ref(), Role::Trainer).await;
        flow.handle_edit(&task, "yoga").await.unwrap();

        let stored = db.get_trainer(&trainer.trainer_id).await.unwrap().unwrap();
        assert_eq!(stored.name, trainer.name);
        assert_eq!(stored.email.as_deref(), Some("new@example.com"));
        assert_eq!(stored.specialization.as_deref(), Some("yoga"));
    }

    #[tokio::test]
    async fn all_skips_change_nothing() {
        let (svc, messaging, db) = testutil::services().await;
        testutil::seed_client(db.as_ref(), PHONE).await;
        let flow = ProfileFlow::new(svc);

        flow.start_edit(PHONE, Role::Client).await.unwrap();
        for _ in 0..3 {
            let task = running(db.as_ref(), Role::Client).await;
            flow.handle_edit(&task, "skip").await.unwrap();
        }
        let texts = messaging.texts_to(PHONE);
        assert!(texts.last().unwrap().contains("No changes"));
    }

    #[tokio::test]
    async fn deletion_requires_uppercase_yes() {
        let (svc, messaging, db) = testutil::services().await;
        testutil::seed_client(db.as_ref(), PHONE).await;
        let flow = ProfileFlow::new(svc);

        flow.start_delete(PHONE, Role::Client).await.unwrap();
        let task = running(db.as_ref(), Role::Client).await;
        flow.handle_delete(&task, "yes").await.unwrap();

        // Lowercase isn't good enough: the question is repeated and the
        // confirmation is still pending.
        assert!(db.get_client_by_phone(PHONE).await.unwrap().is_some());
        assert!(messaging
            .texts_to(PHONE)
            .last()
            .unwrap()
            .contains("YES (in capitals)"));
        let task = running(db.as_ref(), Role::Client).await;
        assert!(matches!(task.data, TaskData::AccountDeletion));

        // An explicit no ends the task without deleting anything.
        flow.handle_delete(&task, "NO").await.unwrap();
        assert!(db.get_client_by_phone(PHONE).await.unwrap().is_some());
        assert!(db
            .get_running_task(PHONE, Role::Client)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn deletion_removes_profile_and_clears_role() {
        let (svc, messaging, db) = testutil::services().await;
        testutil::seed_client(db.as_ref(), PHONE).await;
        let flow = ProfileFlow::new(svc);

        flow.start_delete(PHONE, Role::Client).await.unwrap();
        let task = running(db.as_ref(), Role::Client).await;
        flow.handle_delete(&task, "YES").await.unwrap();

        assert!(db.get_client_by_phone(PHONE).await.unwrap().is_none());
        let user = db.get_user(PHONE).await.unwrap().unwrap();
        assert_eq!(user.active_role, None);
        let texts = messaging.texts_to(PHONE);
        assert!(texts.last().unwrap().contains("deleted"));
    }

    #[tokio::test]
    async fn deletion_falls_back_to_other_role() {
        let (svc, _messaging, db) = testutil::services().await;
        testutil::seed_trainer(db.as_ref(), PHONE).await;
        testutil::seed_client(db.as_ref(), PHONE).await;
        let flow = ProfileFlow::new(svc);

        flow.start_delete(PHONE, Role::Client).await.unwrap();
        let task = running(db.as_ref(), Role::Client).await;
        flow.handle_delete(&task, "YES").await.unwrap();

        let user = db.get_user(PHONE).await.unwrap().unwrap();
        assert_eq!(user.active_role, Some(Role::Trainer));
        assert!(db.get_trainer_by_phone(PHONE).await.unwrap().is_some());
    }
}
