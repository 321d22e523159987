//! Registration flow: role selection, structured-form attempt, and the
//! question-per-field text fallback.

use chrono::Utc;

use crate::channels::Button;
use crate::error::FlowError;
use crate::flows::engine::{FieldFlow, FieldStep};
use crate::flows::fields::{CLIENT_REGISTRATION_FIELDS, TRAINER_REGISTRATION_FIELDS};
use crate::flows::task::{Collected, Task, TaskData};
use crate::flows::FlowServices;
use crate::ids;
use crate::store::model::{Client, InvitationStatus, Role, Trainer};

pub const BUTTON_REGISTER_TRAINER: &str = "register_trainer";
pub const BUTTON_REGISTER_CLIENT: &str = "register_client";

pub struct RegistrationFlow {
    svc: FlowServices,
}

impl RegistrationFlow {
    pub fn new(svc: FlowServices) -> Self {
        Self { svc }
    }

    fn field_flow(role: Role) -> FieldFlow {
        match role {
            Role::Trainer => FieldFlow::new(TRAINER_REGISTRATION_FIELDS),
            Role::Client => FieldFlow::new(CLIENT_REGISTRATION_FIELDS),
        }
    }

    /// Greet an unknown phone number with the role choice buttons.
    pub async fn send_role_choice(&self, phone: &str) -> Result<(), FlowError> {
        self.svc
            .messaging
            .send_buttons(
                phone,
                &self.svc.messages.welcome_unregistered(),
                &[
                    Button::new(BUTTON_REGISTER_TRAINER, "I'm a trainer"),
                    Button::new(BUTTON_REGISTER_CLIENT, "I'm a client"),
                ],
            )
            .await?;
        Ok(())
    }

    /// Begin registration for a chosen role.
    ///
    /// An existing profile short-circuits; a recent interrupted
    /// registration resumes instead of restarting. Otherwise a task is
    /// created and the structured WhatsApp form is attempted, falling
    /// back to text questions when the form cannot be sent.
    pub async fn start(&self, phone: &str, role: Role) -> Result<(), FlowError> {
        self.svc.db.ensure_user(phone).await?;

        if self.profile_exists(phone, role).await? {
            self.svc
                .messaging
                .send_text(phone, &self.svc.messages.already_registered(role))
                .await?;
            return Ok(());
        }

        if let Some(task) = self.svc.db.get_running_task(phone, role).await? {
            if let TaskData::Registration {
                role: task_role,
                current_field_index,
                ..
            } = &task.data
            {
                if *task_role == role && task.within_resume_window(Utc::now()) {
                    let prompt = Self::field_flow(role).prompt_at(*current_field_index);
                    let body =
                        format!("{}\n\n{prompt}", self.svc.messages.registration_resumed());
                    self.svc.messaging.send_text(phone, &body).await?;
                    return Ok(());
                }
            }
        }

        let data = TaskData::Registration {
            role,
            current_field_index: 0,
            collected: Collected::new(),
        };
        self.svc.db.create_task(phone, role, &data).await?;

        match self.svc.messaging.send_registration_flow(phone, role).await {
            Ok(()) => Ok(()),
            Err(err) => {
                tracing::info!(%err, phone, "form send failed, using text registration");
                let body = format!(
                    "Let's get you registered as a {role}. You can reply /stop at any time.\n\n{}",
                    Self::field_flow(role).first_prompt()
                );
                self.svc.messaging.send_text(phone, &body).await?;
                Ok(())
            }
        }
    }

    /// Feed one answer into a running registration task.
    pub async fn handle(&self, task: &Task, input: &str) -> Result<(), FlowError> {
        let TaskData::Registration {
            role,
            current_field_index,
            collected,
        } = &task.data
        else {
            return Err(FlowError::Integration(
                "registration handler got a non-registration task".into(),
            ));
        };
        let role = *role;
        let mut index = *current_field_index;
        let mut collected = collected.clone();

        let flow = Self::field_flow(role);
        match flow.handle(&mut index, &mut collected, input) {
            FieldStep::Reprompt(body) => {
                self.svc.messaging.send_text(&task.user_key, &body).await?;
                Ok(())
            }
            FieldStep::Next(prompt) => {
                let data = TaskData::Registration {
                    role,
                    current_field_index: index,
                    collected,
                };
                self.svc.db.update_task(task.id, &data).await?;
                self.svc.messaging.send_text(&task.user_key, &prompt).await?;
                Ok(())
            }
            FieldStep::Complete => {
                self.svc.db.complete_task(task.id).await?;
                self.finish(&task.user_key, role, &collected).await
            }
        }
    }

    /// Create the profile, activate the role, and link any pending
    /// invitation.
    async fn finish(
        &self,
        phone: &str,
        role: Role,
        collected: &Collected,
    ) -> Result<(), FlowError> {
        let name = text_field(collected, "name").ok_or_else(|| {
            FlowError::Integration("registration completed without a name".into())
        })?;

        let (id, confirmation) = match role {
            Role::Trainer => {
                let trainer = Trainer {
                    trainer_id: ids::trainer_id(),
                    phone: phone.to_string(),
                    name: name.clone(),
                    email: text_field(collected, "email"),
                    business_name: text_field(collected, "business_name"),
                    specialization: text_field(collected, "specialization"),
                    created_at: Utc::now(),
                };
                self.svc.db.insert_trainer(&trainer).await?;
                let body = self
                    .svc
                    .messages
                    .registration_complete(role, &trainer.trainer_id, &name);
                (trainer.trainer_id, body)
            }
            Role::Client => {
                let client = Client {
                    client_id: ids::client_id(),
                    phone: phone.to_string(),
                    name: name.clone(),
                    email: text_field(collected, "email"),
                    fitness_goal: text_field(collected, "fitness_goal"),
                    created_at: Utc::now(),
                };
                self.svc.db.insert_client(&client).await?;
                let body = self
                    .svc
                    .messages
                    .registration_complete(role, &client.client_id, &name);
                (client.client_id, body)
            }
        };

        self.svc.db.set_active_role(phone, Some(role)).await?;
        self.svc.messaging.send_text(phone, &confirmation).await?;

        if role == Role::Client {
            self.link_pending_invitation(phone, &id).await?;
        }
        Ok(())
    }

    /// A client who registered after being invited is linked to the
    /// inviting trainer automatically.
    async fn link_pending_invitation(
        &self,
        phone: &str,
        client_id: &str,
    ) -> Result<(), FlowError> {
        let Some(invitation) = self.svc.db.get_pending_invitation_for_phone(phone).await? else {
            return Ok(());
        };
        self.svc
            .db
            .set_invitation_status(&invitation.invitation_id, InvitationStatus::Accepted)
            .await?;
        self.svc
            .db
            .insert_relationship(&invitation.trainer_id, client_id)
            .await?;

        if let Some(trainer) = self.svc.db.get_trainer(&invitation.trainer_id).await? {
            self.svc
                .messaging
                .send_text(
                    phone,
                    &format!("You're now connected to your trainer, {}.", trainer.name),
                )
                .await?;
            self.svc
                .messaging
                .send_text(
                    &trainer.phone,
                    "Your invitation was accepted. Your new client is all set up!",
                )
                .await?;
        }
        Ok(())
    }

    async fn profile_exists(&self, phone: &str, role: Role) -> Result<bool, FlowError> {
        let exists = match role {
            Role::Trainer => self.svc.db.get_trainer_by_phone(phone).await?.is_some(),
            Role::Client => self.svc.db.get_client_by_phone(phone).await?.is_some(),
        };
        Ok(exists)
    }
}

fn text_field(collected: &Collected, key: &str) -> Option<String> {
    collected
        .get(key)
        .and_then(serde_json::Value::as_str)
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Database;
    use crate::channels::SentMessage;
    use crate::flows::testutil;

    const PHONE: &str = "27820000001";

    async fn answer(flow: &RegistrationFlow, db: &dyn crate::store::Database, input: &str) {
        let task = db.get_running_task(PHONE, Role::Trainer).await.unwrap();
        let task = task
            .or(db.get_running_task(PHONE, Role::Client).await.unwrap())
            .expect("running task");
        flow.handle(&task, input).await.unwrap();
    }

    #[tokio::test]
    async fn role_choice_offers_both_buttons() {
        let (svc, messaging, _db) = testutil::services().await;
        let flow = RegistrationFlow::new(svc);
        flow.send_role_choice(PHONE).await.unwrap();
        match messaging.last().unwrap() {
            SentMessage::Buttons { button_ids, .. } => {
                assert_eq!(
                    button_ids,
                    vec![
                        BUTTON_REGISTER_TRAINER.to_string(),
                        BUTTON_REGISTER_CLIENT.to_string()
                    ]
                );
            }
            other => panic!("expected buttons, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn flow_send_failure_falls_back_to_text_questions() {
        // The default fake rejects form sends.
        let (svc, messaging, db) = testutil::services().await;
        let flow = RegistrationFlow::new(svc);
        flow.start(PHONE, Role::Trainer).await.unwrap();

        assert!(db
            .get_running_task(PHONE, Role::Trainer)
            .await
            .unwrap()
            .is_some());
        let texts = messaging.texts_to(PHONE);
        assert!(texts.last().unwrap().contains("(1/4)"));
    }

    #[tokio::test]
    async fn full_trainer_registration_creates_profile() {
        let (svc, messaging, db) = testutil::services().await;
        let flow = RegistrationFlow::new(svc);
        flow.start(PHONE, Role::Trainer).await.unwrap();

        answer(&flow, db.as_ref(), "Thandi M").await;
        answer(&flow, db.as_ref(), "thandi@example.com").await;
        answer(&flow, db.as_ref(), "skip").await;
        answer(&flow, db.as_ref(), "strength").await;

        let trainer = db.get_trainer_by_phone(PHONE).await.unwrap().unwrap();
        assert_eq!(trainer.name, "Thandi M");
        assert_eq!(trainer.email.as_deref(), Some("thandi@example.com"));
        assert_eq!(trainer.business_name, None);
        assert_eq!(trainer.specialization.as_deref(), Some("strength"));
        assert!(trainer.trainer_id.starts_with("TR"));

        let user = db.get_user(PHONE).await.unwrap().unwrap();
        assert_eq!(user.active_role, Some(Role::Trainer));

        // Task is finished; a follow-up message has nothing to land on.
        assert!(db
            .get_running_task(PHONE, Role::Trainer)
            .await
            .unwrap()
            .is_none());

        let texts = messaging.texts_to(PHONE);
        assert!(texts.last().unwrap().contains(&trainer.trainer_id));
    }

    #[tokio::test]
    async fn invalid_answer_reprompts_without_advancing() {
        let (svc, messaging, db) = testutil::services().await;
        let flow = RegistrationFlow::new(svc);
        flow.start(PHONE, Role::Trainer).await.unwrap();

        answer(&flow, db.as_ref(), "x").await;
        let texts = messaging.texts_to(PHONE);
        assert!(texts.last().unwrap().contains("at least 2"));

        // Still on the first field.
        let task = db
            .get_running_task(PHONE, Role::Trainer)
            .await
            .unwrap()
            .unwrap();
        match task.data {
            TaskData::Registration {
                current_field_index,
                ..
            } => assert_eq!(current_field_index, 0),
            other => panic!("wrong data: {other:?}"),
        }
    }

    #[tokio::test]
    async fn restart_within_window_resumes() {
        let (svc, messaging, db) = testutil::services().await;
        let flow = RegistrationFlow::new(svc);
        flow.start(PHONE, Role::Trainer).await.unwrap();
        answer(&flow, db.as_ref(), "Thandi M").await;

        flow.start(PHONE, Role::Trainer).await.unwrap();
        let texts = messaging.texts_to(PHONE);
        let last = texts.last().unwrap();
        assert!(last.contains("pick up"));
        assert!(last.contains("(2/4)"));
    }

    #[tokio::test]
    async fn already_registered_short_circuits() {
        let (svc, messaging, db) = testutil::services().await;
        testutil::seed_trainer(db.as_ref(), PHONE).await;
        let flow = RegistrationFlow::new(svc);
        flow.start(PHONE, Role::Trainer).await.unwrap();

        let texts = messaging.texts_to(PHONE);
        assert!(texts.last().unwrap().contains("already registered"));
        assert!(db
            .get_running_task(PHONE, Role::Trainer)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn client_registration_links_pending_invitation() {
        let (svc, messaging, db) = testutil::services().await;
        let trainer = testutil::seed_trainer(db.as_ref(), "27829999999").await;
        let invitation = crate::store::model::Invitation {
            invitation_id: crate::ids::invitation_id(),
            trainer_id: trainer.trainer_id.clone(),
            phone: PHONE.to_string(),
            status: InvitationStatus::Pending,
            created_at: Utc::now(),
        };
        db.insert_invitation(&invitation).await.unwrap();

        let flow = RegistrationFlow::new(svc);
        flow.start(PHONE, Role::Client).await.unwrap();
        answer(&flow, db.as_ref(), "Sipho N").await;
        answer(&flow, db.as_ref(), "skip").await;
        answer(&flow, db.as_ref(), "Run a 10k").await;

        let client = db.get_client_by_phone(PHONE).await.unwrap().unwrap();
        let relationship = db
            .get_relationship(&trainer.trainer_id, &client.client_id)
            .await
            .unwrap()
            .unwrap();
        assert!(relationship.is_active);

        let stored = db
            .get_invitation(&invitation.invitation_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, InvitationStatus::Accepted);

        // The trainer hears about it too.
        assert!(!messaging.texts_to("27829999999").is_empty());
    }
}
