//! Trainer-client relationships: invitations, client search, and
//! removal. Links are soft-deleted and reactivated on re-invite.

use chrono::Utc;

use crate::channels::Button;
use crate::error::FlowError;
use crate::flows::engine::{parse_confirm, ConfirmReply};
use crate::flows::registration::RegistrationFlow;
use crate::flows::task::{RemoveClientStep, Task, TaskData};
use crate::flows::FlowServices;
use crate::ids;
use crate::store::model::{Invitation, InvitationStatus, Role, Trainer};

/// Button payload prefixes for invitation replies.
pub const BUTTON_INVITE_ACCEPT: &str = "invite_accept:";
pub const BUTTON_INVITE_DECLINE: &str = "invite_decline:";

pub struct RelationshipFlows {
    svc: FlowServices,
}

impl RelationshipFlows {
    pub fn new(svc: FlowServices) -> Self {
        Self { svc }
    }

    // ── Invite ──────────────────────────────────────────────────────

    pub async fn start_invite(&self, trainer: &Trainer) -> Result<(), FlowError> {
        self.svc
            .db
            .create_task(&trainer.phone, Role::Trainer, &TaskData::InviteClient)
            .await?;
        self.svc
            .messaging
            .send_text(
                &trainer.phone,
                "What's the client's WhatsApp number? Include the country code, e.g. 27821234567.",
            )
            .await?;
        Ok(())
    }

    pub async fn handle_invite(
        &self,
        trainer: &Trainer,
        task: &Task,
        input: &str,
    ) -> Result<(), FlowError> {
        let phone = &task.user_key;
        let digits: String = input.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.len() < 10 {
            self.svc
                .messaging
                .send_text(
                    phone,
                    "That doesn't look like a phone number. At least 10 digits, please.",
                )
                .await?;
            return Ok(());
        }
        if digits == trainer.phone {
            self.svc
                .messaging
                .send_text(phone, "That's your own number! Try your client's.")
                .await?;
            return Ok(());
        }

        // Already linked? No invitation needed.
        if let Some(client) = self.svc.db.get_client_by_phone(&digits).await? {
            if let Some(rel) = self
                .svc
                .db
                .get_relationship(&trainer.trainer_id, &client.client_id)
                .await?
            {
                if rel.is_active {
                    self.svc.db.complete_task(task.id).await?;
                    self.svc
                        .messaging
                        .send_text(
                            phone,
                            &format!("{} is already one of your clients.", client.name),
                        )
                        .await?;
                    return Ok(());
                }
            }
        }

        self.svc.db.complete_task(task.id).await?;

        let invitation = Invitation {
            invitation_id: ids::invitation_id(),
            trainer_id: trainer.trainer_id.clone(),
            phone: digits.clone(),
            status: InvitationStatus::Pending,
            created_at: Utc::now(),
        };
        self.svc.db.insert_invitation(&invitation).await?;

        let body = format!(
            "{} would like to coach you on Refiloe, a WhatsApp fitness assistant. \
             Would you like to connect?",
            trainer.name
        );
        self.svc
            .messaging
            .send_buttons(
                &digits,
                &body,
                &[
                    Button::new(
                        format!("{BUTTON_INVITE_ACCEPT}{}", invitation.invitation_id),
                        "Accept",
                    ),
                    Button::new(
                        format!("{BUTTON_INVITE_DECLINE}{}", invitation.invitation_id),
                        "Decline",
                    ),
                ],
            )
            .await?;
        self.svc
            .messaging
            .send_text(phone, &format!("Invitation sent to {digits}."))
            .await?;
        Ok(())
    }

    /// Handle an accept/decline button tap from the invitee.
    pub async fn respond_invitation(
        &self,
        phone: &str,
        invitation_id: &str,
        accepted: bool,
    ) -> Result<(), FlowError> {
        let Some(invitation) = self.svc.db.get_invitation(invitation_id).await? else {
            self.svc
                .messaging
                .send_text(phone, "That invitation is no longer around.")
                .await?;
            return Ok(());
        };
        if invitation.phone != phone || invitation.status != InvitationStatus::Pending {
            self.svc
                .messaging
                .send_text(phone, "That invitation has already been handled.")
                .await?;
            return Ok(());
        }

        let trainer = self
            .svc
            .db
            .get_trainer(&invitation.trainer_id)
            .await?
            .ok_or_else(|| FlowError::NotFound {
                entity: "trainer".into(),
                id: invitation.trainer_id.clone(),
            })?;

        if !accepted {
            self.svc
                .db
                .set_invitation_status(invitation_id, InvitationStatus::Declined)
                .await?;
            self.svc
                .messaging
                .send_text(phone, "No problem, I've declined the invitation.")
                .await?;
            self.svc
                .messaging
                .send_text(
                    &trainer.phone,
                    &format!("Your invitation to {phone} was declined."),
                )
                .await?;
            return Ok(());
        }

        match self.svc.db.get_client_by_phone(phone).await? {
            Some(client) => {
                self.svc
                    .db
                    .set_invitation_status(invitation_id, InvitationStatus::Accepted)
                    .await?;
                self.svc
                    .db
                    .insert_relationship(&trainer.trainer_id, &client.client_id)
                    .await?;
                self.svc
                    .messaging
                    .send_text(
                        phone,
                        &format!("You're connected to {} now. 💪", trainer.name),
                    )
                    .await?;
                self.svc
                    .messaging
                    .send_text(
                        &trainer.phone,
                        &format!("{} accepted your invitation!", client.name),
                    )
                    .await?;
            }
            None => {
                // Not registered yet: the invitation stays pending and is
                // linked automatically once client registration completes.
                self.svc
                    .messaging
                    .send_text(phone, "Great! Let's get you registered first.")
                    .await?;
                RegistrationFlow::new(self.svc.clone())
                    .start(phone, Role::Client)
                    .await?;
            }
        }
        Ok(())
    }

    // ── Search & list ───────────────────────────────────────────────

    /// `/find-client <name>`: name search among the trainer's own clients.
    pub async fn search(&self, trainer: &Trainer, query: &str) -> Result<(), FlowError> {
        let query = query.trim();
        if query.is_empty() {
            self.svc
                .messaging
                .send_text(&trainer.phone, "Usage: /find-client <name>")
                .await?;
            return Ok(());
        }
        let found = self.svc.db.search_clients(&trainer.trainer_id, query).await?;
        let body = if found.is_empty() {
            format!("No clients matching '{query}'.")
        } else {
            let lines: Vec<String> = found
                .iter()
                .map(|c| format!("{} ({}) - {}", c.name, c.client_id, c.phone))
                .collect();
            lines.join("\n")
        };
        self.svc.messaging.send_text(&trainer.phone, &body).await?;
        Ok(())
    }

    pub async fn list(&self, trainer: &Trainer) -> Result<(), FlowError> {
        let clients = self
            .svc
            .db
            .list_clients_for_trainer(&trainer.trainer_id)
            .await?;
        let body = if clients.is_empty() {
            "You have no clients yet. Send /invite to bring one on.".to_string()
        } else {
            let lines: Vec<String> = clients
                .iter()
                .map(|c| format!("{} ({})", c.name, c.client_id))
                .collect();
            format!("Your clients:\n{}", lines.join("\n"))
        };
        self.svc.messaging.send_text(&trainer.phone, &body).await?;
        Ok(())
    }

    // ── Remove ──────────────────────────────────────────────────────

    pub async fn start_remove(&self, trainer: &Trainer) -> Result<(), FlowError> {
        let clients = self
            .svc
            .db
            .list_clients_for_trainer(&trainer.trainer_id)
            .await?;
        if clients.is_empty() {
            self.svc
                .messaging
                .send_text(&trainer.phone, "You have no clients to remove.")
                .await?;
            return Ok(());
        }
        let data = TaskData::RemoveClient {
            step: RemoveClientStep::AwaitClientId,
        };
        self.svc
            .db
            .create_task(&trainer.phone, Role::Trainer, &data)
            .await?;
        let lines: Vec<String> = clients
            .iter()
            .map(|c| format!("{} ({})", c.name, c.client_id))
            .collect();
        let body = format!(
            "Which client should I remove? Reply with a client id:\n{}",
            lines.join("\n")
        );
        self.svc.messaging.send_text(&trainer.phone, &body).await?;
        Ok(())
    }

    pub async fn handle_remove(
        &self,
        trainer: &Trainer,
        task: &Task,
        input: &str,
    ) -> Result<(), FlowError> {
        let TaskData::RemoveClient { step } = &task.data else {
            return Err(FlowError::Integration(
                "remove-client handler got the wrong task".into(),
            ));
        };
        let phone = &task.user_key;

        match step {
            RemoveClientStep::AwaitClientId => {
                let client_id = input.trim().to_uppercase();
                let linked = self
                    .svc
                    .db
                    .list_clients_for_trainer(&trainer.trainer_id)
                    .await?;
                let Some(client) = linked.iter().find(|c| c.client_id == client_id) else {
                    self.svc
                        .messaging
                        .send_text(phone, "That's not one of your clients. Try again, or /stop.")
                        .await?;
                    return Ok(());
                };
                let data = TaskData::RemoveClient {
                    step: RemoveClientStep::Confirm {
                        client_id: client.client_id.clone(),
                    },
                };
                self.svc.db.update_task(task.id, &data).await?;
                let body = format!(
                    "Remove {}? They'll keep their account and history, but your habits \
                     come off their plan. Reply YES to confirm, or NO to cancel.",
                    client.name
                );
                self.svc.messaging.send_text(phone, &body).await?;
                Ok(())
            }
            RemoveClientStep::Confirm { client_id } => {
                match parse_confirm(input) {
                    ConfirmReply::Unclear => {
                        self.svc
                            .messaging
                            .send_text(phone, "Please reply YES to remove them, or NO to cancel.")
                            .await?;
                        return Ok(());
                    }
                    ConfirmReply::No => {
                        self.svc.db.complete_task(task.id).await?;
                        self.svc
                            .messaging
                            .send_text(phone, "Okay, nothing changed.")
                            .await?;
                        return Ok(());
                    }
                    ConfirmReply::Yes => {}
                }
                self.svc.db.complete_task(task.id).await?;
                self.svc
                    .db
                    .set_relationship_active(&trainer.trainer_id, client_id, false)
                    .await?;
                // Their plan loses this trainer's habits; logs stay.
                for habit in self
                    .svc
                    .db
                    .list_habits_for_trainer(&trainer.trainer_id)
                    .await?
                {
                    if let Some(assignment) = self
                        .svc
                        .db
                        .get_assignment(&habit.habit_id, client_id)
                        .await?
                    {
                        if assignment.is_active {
                            self.svc
                                .db
                                .set_assignment_active(&habit.habit_id, client_id, false)
                                .await?;
                        }
                    }
                }
                self.svc
                    .messaging
                    .send_text(phone, "Done. The client has been removed.")
                    .await?;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Database;
    use crate::channels::SentMessage;
    use crate::flows::testutil;

    const TRAINER_PHONE: &str = "27820000030";
    const CLIENT_PHONE: &str = "27820000031";

    async fn running(db: &dyn crate::store::Database, phone: &str, role: Role) -> Task {
        db.get_running_task(phone, role).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn invite_sends_buttons_to_invitee() {
        let (svc, messaging, db) = testutil::services().await;
        let trainer = testutil::seed_trainer(db.as_ref(), TRAINER_PHONE).await;
        let flows = RelationshipFlows::new(svc);

        flows.start_invite(&trainer).await.unwrap();
        let task = running(db.as_ref(), TRAINER_PHONE, Role::Trainer).await;
        flows
            .handle_invite(&trainer, &task, CLIENT_PHONE)
            .await
            .unwrap();

        let buttons = messaging
            .sent()
            .into_iter()
            .find_map(|m| match m {
                SentMessage::Buttons { to, button_ids, .. } if to == CLIENT_PHONE => {
                    Some(button_ids)
                }
                _ => None,
            })
            .expect("invite buttons");
        assert!(buttons[0].starts_with(BUTTON_INVITE_ACCEPT));
        assert!(buttons[1].starts_with(BUTTON_INVITE_DECLINE));

        let stored = db
            .get_pending_invitation_for_phone(CLIENT_PHONE)
            .await
            .unwrap();
        assert!(stored.is_some());
    }

    #[tokio::test]
    async fn invalid_phone_reprompts() {
        let (svc, messaging, db) = testutil::services().await;
        let trainer = testutil::seed_trainer(db.as_ref(), TRAINER_PHONE).await;
        let flows = RelationshipFlows::new(svc);

        flows.start_invite(&trainer).await.unwrap();
        let task = running(db.as_ref(), TRAINER_PHONE, Role::Trainer).await;
        flows.handle_invite(&trainer, &task, "12345").await.unwrap();

        let texts = messaging.texts_to(TRAINER_PHONE);
        assert!(texts.last().unwrap().contains("10 digits"));
        // Still waiting for a number.
        assert!(db
            .get_running_task(TRAINER_PHONE, Role::Trainer)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn accept_links_registered_client() {
        let (svc, messaging, db) = testutil::services().await;
        let trainer = testutil::seed_trainer(db.as_ref(), TRAINER_PHONE).await;
        let client = testutil::seed_client(db.as_ref(), CLIENT_PHONE).await;
        let invitation = Invitation {
            invitation_id: ids::invitation_id(),
            trainer_id: trainer.trainer_id.clone(),
            phone: CLIENT_PHONE.to_string(),
            status: InvitationStatus::Pending,
            created_at: Utc::now(),
        };
        db.insert_invitation(&invitation).await.unwrap();
        let flows = RelationshipFlows::new(svc);

        flows
            .respond_invitation(CLIENT_PHONE, &invitation.invitation_id, true)
            .await
            .unwrap();

        let rel = db
            .get_relationship(&trainer.trainer_id, &client.client_id)
            .await
            .unwrap()
            .unwrap();
        assert!(rel.is_active);
        assert!(messaging
            .texts_to(TRAINER_PHONE)
            .last()
            .unwrap()
            .contains("accepted"));
    }

    #[tokio::test]
    async fn accept_by_unregistered_phone_starts_registration() {
        let (svc, messaging, db) = testutil::services().await;
        let trainer = testutil::seed_trainer(db.as_ref(), TRAINER_PHONE).await;
        let invitation = Invitation {
            invitation_id: ids::invitation_id(),
            trainer_id: trainer.trainer_id.clone(),
            phone: CLIENT_PHONE.to_string(),
            status: InvitationStatus::Pending,
            created_at: Utc::now(),
        };
        db.insert_invitation(&invitation).await.unwrap();
        let flows = RelationshipFlows::new(svc);

        flows
            .respond_invitation(CLIENT_PHONE, &invitation.invitation_id, true)
            .await
            .unwrap();

        // A client registration task is now running and the invitation
        // is still pending, to be linked on completion.
        assert!(db
            .get_running_task(CLIENT_PHONE, Role::Client)
            .await
            .unwrap()
            .is_some());
        let stored = db
            .get_invitation(&invitation.invitation_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, InvitationStatus::Pending);
        assert!(!messaging.texts_to(CLIENT_PHONE).is_empty());
    }

    #[tokio::test]
    async fn decline_notifies_trainer() {
        let (svc, messaging, db) = testutil::services().await;
        let trainer = testutil::seed_trainer(db.as_ref(), TRAINER_PHONE).await;
        let invitation = Invitation {
            invitation_id: ids::invitation_id(),
            trainer_id: trainer.trainer_id.clone(),
            phone: CLIENT_PHONE.to_string(),
            status: InvitationStatus::Pending,
            created_at: Utc::now(),
        };
        db.insert_invitation(&invitation).await.unwrap();
        let flows = RelationshipFlows::new(svc);

        flows
            .respond_invitation(CLIENT_PHONE, &invitation.invitation_id, false)
            .await
            .unwrap();

        let stored = db
            .get_invitation(&invitation.invitation_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, InvitationStatus::Declined);
        assert!(messaging
            .texts_to(TRAINER_PHONE)
            .last()
            .unwrap()
            .contains("declined"));
    }

    #[tokio::test]
    async fn stale_invitation_is_refused() {
        let (svc, messaging, db) = testutil::services().await;
        let trainer = testutil::seed_trainer(db.as_ref(), TRAINER_PHONE).await;
        testutil::seed_client(db.as_ref(), CLIENT_PHONE).await;
        let invitation = Invitation {
            invitation_id: ids::invitation_id(),
            trainer_id: trainer.trainer_id.clone(),
            phone: CLIENT_PHONE.to_string(),
            status: InvitationStatus::Declined,
            created_at: Utc::now(),
        };
        db.insert_invitation(&invitation).await.unwrap();
        let flows = RelationshipFlows::new(svc);

        flows
            .respond_invitation(CLIENT_PHONE, &invitation.invitation_id, true)
            .await
            .unwrap();
        assert!(messaging
            .texts_to(CLIENT_PHONE)
            .last()
            .unwrap()
            .contains("already been handled"));
    }

    #[tokio::test]
    async fn remove_deactivates_relationship_and_assignments() {
        let (svc, _messaging, db) = testutil::services().await;
        let trainer = testutil::seed_trainer(db.as_ref(), TRAINER_PHONE).await;
        let client = testutil::seed_client(db.as_ref(), CLIENT_PHONE).await;
        testutil::link(db.as_ref(), &trainer.trainer_id, &client.client_id).await;

        let habit = crate::store::model::Habit {
            habit_id: ids::habit_id(),
            trainer_id: trainer.trainer_id.clone(),
            habit_name: "Water".to_string(),
            description: None,
            target_value: 8.0,
            unit: "glasses".to_string(),
            frequency: "daily".to_string(),
            is_active: true,
            created_at: Utc::now(),
        };
        db.insert_habit(&habit).await.unwrap();
        db.insert_assignment(&crate::store::model::HabitAssignment {
            id: uuid::Uuid::new_v4(),
            habit_id: habit.habit_id.clone(),
            client_id: client.client_id.clone(),
            trainer_id: trainer.trainer_id.clone(),
            is_active: true,
            assigned_date: Utc::now().date_naive(),
        })
        .await
        .unwrap();

        let flows = RelationshipFlows::new(svc);
        flows.start_remove(&trainer).await.unwrap();
        let task = running(db.as_ref(), TRAINER_PHONE, Role::Trainer).await;
        flows
            .handle_remove(&trainer, &task, &client.client_id)
            .await
            .unwrap();
        let task = running(db.as_ref(), TRAINER_PHONE, Role::Trainer).await;
        flows.handle_remove(&trainer, &task, "YES").await.unwrap();

        let rel = db
            .get_relationship(&trainer.trainer_id, &client.client_id)
            .await
            .unwrap()
            .unwrap();
        assert!(!rel.is_active);
        let assignment = db
            .get_assignment(&habit.habit_id, &client.client_id)
            .await
            .unwrap()
            .unwrap();
        assert!(!assignment.is_active);
        // The client profile itself survives.
        assert!(db.get_client_by_phone(CLIENT_PHONE).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn remove_confirmation_reprompts_on_unclear_reply() {
        let (svc, messaging, db) = testutil::services().await;
        let trainer = testutil::seed_trainer(db.as_ref(), TRAINER_PHONE).await;
        let client = testutil::seed_client(db.as_ref(), CLIENT_PHONE).await;
        testutil::link(db.as_ref(), &trainer.trainer_id, &client.client_id).await;

        let flows = RelationshipFlows::new(svc);
        flows.start_remove(&trainer).await.unwrap();
        let task = running(db.as_ref(), TRAINER_PHONE, Role::Trainer).await;
        flows
            .handle_remove(&trainer, &task, &client.client_id)
            .await
            .unwrap();
        let task = running(db.as_ref(), TRAINER_PHONE, Role::Trainer).await;
        flows.handle_remove(&trainer, &task, "maybe").await.unwrap();

        // The question is asked again; nothing ended, nothing changed.
        assert!(messaging
            .texts_to(TRAINER_PHONE)
            .last()
            .unwrap()
            .contains("YES to remove"));
        let task = running(db.as_ref(), TRAINER_PHONE, Role::Trainer).await;
        assert!(matches!(
            task.data,
            TaskData::RemoveClient {
                step: RemoveClientStep::Confirm { .. }
            }
        ));
        let rel = db
            .get_relationship(&trainer.trainer_id, &client.client_id)
            .await
            .unwrap()
            .unwrap();
        assert!(rel.is_active);

        flows.handle_remove(&trainer, &task, "no").await.unwrap();
        assert!(db
            .get_running_task(TRAINER_PHONE, Role::Trainer)
            .await
            .unwrap()
            .is_none());
        let rel = db
            .get_relationship(&trainer.trainer_id, &client.client_id)
            .await
            .unwrap()
            .unwrap();
        assert!(rel.is_active);
    }

    #[tokio::test]
    async fn search_requires_query_and_matches_by_name() {
        let (svc, messaging, db) = testutil::services().await;
        let trainer = testutil::seed_trainer(db.as_ref(), TRAINER_PHONE).await;
        let client = testutil::seed_client(db.as_ref(), CLIENT_PHONE).await;
        testutil::link(db.as_ref(), &trainer.trainer_id, &client.client_id).await;
        let flows = RelationshipFlows::new(svc);

        flows.search(&trainer, "").await.unwrap();
        assert!(messaging
            .texts_to(TRAINER_PHONE)
            .last()
            .unwrap()
            .contains("Usage"));

        flows.search(&trainer, "sipho").await.unwrap();
        assert!(messaging
            .texts_to(TRAINER_PHONE)
            .last()
            .unwrap()
            .contains(&client.client_id));
    }
}
