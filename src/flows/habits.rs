//! Trainer-side habit management: create, list, edit, retire, and
//! assignment to clients.

use chrono::Utc;

use crate::channels::ListRow;
use crate::error::FlowError;
use crate::flows::engine::{parse_confirm, ConfirmReply, FieldFlow, FieldStep};
use crate::flows::fields::HABIT_CREATE_FIELDS;
use crate::flows::task::{
    Collected, HabitAssignStep, HabitDeleteStep, HabitEditStep, HabitUnassignStep, Task, TaskData,
};
use crate::flows::FlowServices;
use crate::ids;
use crate::store::model::{Habit, HabitAssignment, Trainer};

const EDITABLE_FIELDS: &[&str] = &["name", "description", "target", "unit", "frequency"];

pub struct HabitFlows {
    svc: FlowServices,
}

impl HabitFlows {
    pub fn new(svc: FlowServices) -> Self {
        Self { svc }
    }

    fn describe(habit: &Habit) -> String {
        format!(
            "{} ({}) - {} {} {}",
            habit.habit_name, habit.habit_id, habit.target_value, habit.unit, habit.frequency
        )
    }

    /// Resolve user input (typed id or list-reply id) to a habit owned
    /// by the trainer.
    async fn owned_habit(
        &self,
        trainer_id: &str,
        raw: &str,
    ) -> Result<Option<Habit>, FlowError> {
        let id = raw.trim().to_uppercase();
        let Some(habit) = self.svc.db.get_habit(&id).await? else {
            return Ok(None);
        };
        if habit.trainer_id != trainer_id || !habit.is_active {
            return Ok(None);
        }
        Ok(Some(habit))
    }

    // ── List ────────────────────────────────────────────────────────

    pub async fn list_habits(&self, trainer: &Trainer) -> Result<(), FlowError> {
        let habits = self.svc.db.list_habits_for_trainer(&trainer.trainer_id).await?;
        let body = if habits.is_empty() {
            "You have no habits yet. Send /create-habit to build one.".to_string()
        } else {
            let lines: Vec<String> = habits.iter().map(Self::describe).collect();
            format!("Your habits:\n{}", lines.join("\n"))
        };
        self.svc.messaging.send_text(&trainer.phone, &body).await?;
        Ok(())
    }

    // ── Create ──────────────────────────────────────────────────────

    pub async fn start_create(&self, trainer: &Trainer) -> Result<(), FlowError> {
        let data = TaskData::HabitCreate {
            current_field_index: 0,
            collected: Collected::new(),
        };
        self.svc
            .db
            .create_task(&trainer.phone, crate::store::model::Role::Trainer, &data)
            .await?;
        let body = format!(
            "Let's create a habit.\n\n{}",
            FieldFlow::new(HABIT_CREATE_FIELDS).first_prompt()
        );
        self.svc.messaging.send_text(&trainer.phone, &body).await?;
        Ok(())
    }

    pub async fn handle_create(
        &self,
        trainer: &Trainer,
        task: &Task,
        input: &str,
    ) -> Result<(), FlowError> {
        let TaskData::HabitCreate {
            current_field_index,
            collected,
        } = &task.data
        else {
            return Err(FlowError::Integration(
                "habit-create handler got the wrong task".into(),
            ));
        };
        let mut index = *current_field_index;
        let mut collected = collected.clone();

        let flow = FieldFlow::new(HABIT_CREATE_FIELDS);
        match flow.handle(&mut index, &mut collected, input) {
            FieldStep::Reprompt(body) => {
                self.svc.messaging.send_text(&task.user_key, &body).await?;
                Ok(())
            }
            FieldStep::Next(prompt) => {
                let data = TaskData::HabitCreate {
                    current_field_index: index,
                    collected,
                };
                self.svc.db.update_task(task.id, &data).await?;
                self.svc.messaging.send_text(&task.user_key, &prompt).await?;
                Ok(())
            }
            FieldStep::Complete => {
                self.svc.db.complete_task(task.id).await?;
                let habit = Habit {
                    habit_id: ids::habit_id(),
                    trainer_id: trainer.trainer_id.clone(),
                    habit_name: text(&collected, "habit_name").ok_or_else(|| {
                        FlowError::Integration("habit created without a name".into())
                    })?,
                    description: text(&collected, "description"),
                    target_value: number(&collected, "target_value").ok_or_else(|| {
                        FlowError::Integration("habit created without a target".into())
                    })?,
                    unit: text(&collected, "unit").unwrap_or_else(|| "times".to_string()),
                    frequency: text(&collected, "frequency")
                        .unwrap_or_else(|| "daily".to_string()),
                    is_active: true,
                    created_at: Utc::now(),
                };
                self.svc.db.insert_habit(&habit).await?;
                let body = format!(
                    "Habit created! 🎯 {}\nSend /assign-habit to put it on a client's plan.",
                    Self::describe(&habit)
                );
                self.svc.messaging.send_text(&task.user_key, &body).await?;
                Ok(())
            }
        }
    }

    // ── Edit ────────────────────────────────────────────────────────

    pub async fn start_edit(&self, trainer: &Trainer) -> Result<(), FlowError> {
        let habits = self.svc.db.list_habits_for_trainer(&trainer.trainer_id).await?;
        if habits.is_empty() {
            self.svc
                .messaging
                .send_text(&trainer.phone, "You have no habits to edit yet.")
                .await?;
            return Ok(());
        }
        let data = TaskData::HabitEdit {
            step: HabitEditStep::AwaitHabitId,
        };
        self.svc
            .db
            .create_task(&trainer.phone, crate::store::model::Role::Trainer, &data)
            .await?;
        self.send_habit_list(&trainer.phone, "Which habit do you want to edit?", &habits)
            .await
    }

    pub async fn handle_edit(
        &self,
        trainer: &Trainer,
        task: &Task,
        input: &str,
    ) -> Result<(), FlowError> {
        let TaskData::HabitEdit { step } = &task.data else {
            return Err(FlowError::Integration(
                "habit-edit handler got the wrong task".into(),
            ));
        };
        let phone = &task.user_key;

        match step {
            HabitEditStep::AwaitHabitId => {
                let Some(habit) = self.owned_habit(&trainer.trainer_id, input).await? else {
                    self.svc
                        .messaging
                        .send_text(phone, "I don't know that habit id. Try again, or /stop.")
                        .await?;
                    return Ok(());
                };
                let data = TaskData::HabitEdit {
                    step: HabitEditStep::AwaitField {
                        habit_id: habit.habit_id.clone(),
                    },
                };
                self.svc.db.update_task(task.id, &data).await?;
                let body = format!(
                    "Editing {}. What do you want to change? One of: {}",
                    habit.habit_name,
                    EDITABLE_FIELDS.join(", ")
                );
                self.svc.messaging.send_text(phone, &body).await?;
                Ok(())
            }
            HabitEditStep::AwaitField { habit_id } => {
                let field = input.trim().to_lowercase();
                if !EDITABLE_FIELDS.contains(&field.as_str()) {
                    let body = format!("Please pick one of: {}", EDITABLE_FIELDS.join(", "));
                    self.svc.messaging.send_text(phone, &body).await?;
                    return Ok(());
                }
                let data = TaskData::HabitEdit {
                    step: HabitEditStep::AwaitValue {
                        habit_id: habit_id.clone(),
                        field: field.clone(),
                    },
                };
                self.svc.db.update_task(task.id, &data).await?;
                self.svc
                    .messaging
                    .send_text(phone, &format!("What should the new {field} be?"))
                    .await?;
                Ok(())
            }
            HabitEditStep::AwaitValue { habit_id, field } => {
                let mut habit = self
                    .svc
                    .db
                    .get_habit(habit_id)
                    .await?
                    .ok_or_else(|| FlowError::NotFound {
                        entity: "habit".into(),
                        id: habit_id.clone(),
                    })?;
                let value = input.trim();
                match field.as_str() {
                    "name" => {
                        if value.chars().count() < 2 {
                            self.svc
                                .messaging
                                .send_text(phone, "Name must be at least 2 characters.")
                                .await?;
                            return Ok(());
                        }
                        habit.habit_name = value.to_string();
                    }
                    "description" => habit.description = Some(value.to_string()),
                    "target" => {
                        let Ok(target) = value.parse::<f64>() else {
                            self.svc
                                .messaging
                                .send_text(phone, "The target must be a number, e.g. 8.")
                                .await?;
                            return Ok(());
                        };
                        if target <= 0.0 {
                            self.svc
                                .messaging
                                .send_text(phone, "The target must be greater than zero.")
                                .await?;
                            return Ok(());
                        }
                        habit.target_value = target;
                    }
                    "unit" => habit.unit = value.to_string(),
                    "frequency" => {
                        let lowered = value.to_lowercase();
                        if lowered != "daily" && lowered != "weekly" {
                            self.svc
                                .messaging
                                .send_text(phone, "Frequency is either daily or weekly.")
                                .await?;
                            return Ok(());
                        }
                        habit.frequency = lowered;
                    }
                    other => {
                        return Err(FlowError::Integration(format!(
                            "unexpected habit field {other}"
                        )))
                    }
                }
                self.svc.db.complete_task(task.id).await?;
                self.svc.db.update_habit(&habit).await?;
                let body = format!("Updated! {}", Self::describe(&habit));
                self.svc.messaging.send_text(phone, &body).await?;
                Ok(())
            }
        }
    }

    // ── Delete (soft) ───────────────────────────────────────────────

    pub async fn start_delete(&self, trainer: &Trainer) -> Result<(), FlowError> {
        let habits = self.svc.db.list_habits_for_trainer(&trainer.trainer_id).await?;
        if habits.is_empty() {
            self.svc
                .messaging
                .send_text(&trainer.phone, "You have no habits to delete.")
                .await?;
            return Ok(());
        }
        let data = TaskData::HabitDelete {
            step: HabitDeleteStep::AwaitHabitId,
        };
        self.svc
            .db
            .create_task(&trainer.phone, crate::store::model::Role::Trainer, &data)
            .await?;
        self.send_habit_list(&trainer.phone, "Which habit should I delete?", &habits)
            .await
    }

    pub async fn handle_delete(
        &self,
        trainer: &Trainer,
        task: &Task,
        input: &str,
    ) -> Result<(), FlowError> {
        let TaskData::HabitDelete { step } = &task.data else {
            return Err(FlowError::Integration(
                "habit-delete handler got the wrong task".into(),
            ));
        };
        let phone = &task.user_key;

        match step {
            HabitDeleteStep::AwaitHabitId => {
                let Some(habit) = self.owned_habit(&trainer.trainer_id, input).await? else {
                    self.svc
                        .messaging
                        .send_text(phone, "I don't know that habit id. Try again, or /stop.")
                        .await?;
                    return Ok(());
                };
                let data = TaskData::HabitDelete {
                    step: HabitDeleteStep::Confirm {
                        habit_id: habit.habit_id.clone(),
                    },
                };
                self.svc.db.update_task(task.id, &data).await?;
                let body = format!(
                    "Delete {}? Clients will stop seeing it, but their logged history stays. \
                     Reply YES to confirm, or NO to keep it.",
                    habit.habit_name
                );
                self.svc.messaging.send_text(phone, &body).await?;
                Ok(())
            }
            HabitDeleteStep::Confirm { habit_id } => match parse_confirm(input) {
                ConfirmReply::Yes => {
                    self.svc.db.complete_task(task.id).await?;
                    self.svc.db.deactivate_habit(habit_id).await?;
                    self.svc
                        .messaging
                        .send_text(phone, "Habit deleted. Logged history is kept.")
                        .await?;
                    Ok(())
                }
                ConfirmReply::No => {
                    self.svc.db.complete_task(task.id).await?;
                    self.svc
                        .messaging
                        .send_text(phone, "Okay, the habit stays.")
                        .await?;
                    Ok(())
                }
                ConfirmReply::Unclear => {
                    self.svc
                        .messaging
                        .send_text(phone, "Please reply YES to delete it, or NO to keep it.")
                        .await?;
                    Ok(())
                }
            },
        }
    }

    // ── Assign ──────────────────────────────────────────────────────

    pub async fn start_assign(&self, trainer: &Trainer) -> Result<(), FlowError> {
        let habits = self.svc.db.list_habits_for_trainer(&trainer.trainer_id).await?;
        if habits.is_empty() {
            self.svc
                .messaging
                .send_text(&trainer.phone, "Create a habit first with /create-habit.")
                .await?;
            return Ok(());
        }
        let clients = self
            .svc
            .db
            .list_clients_for_trainer(&trainer.trainer_id)
            .await?;
        if clients.is_empty() {
            self.svc
                .messaging
                .send_text(&trainer.phone, "You have no clients yet. Send /invite first.")
                .await?;
            return Ok(());
        }
        let data = TaskData::HabitAssign {
            step: HabitAssignStep::AwaitHabitId,
        };
        self.svc
            .db
            .create_task(&trainer.phone, crate::store::model::Role::Trainer, &data)
            .await?;
        self.send_habit_list(&trainer.phone, "Which habit do you want to assign?", &habits)
            .await
    }

    pub async fn handle_assign(
        &self,
        trainer: &Trainer,
        task: &Task,
        input: &str,
    ) -> Result<(), FlowError> {
        let TaskData::HabitAssign { step } = &task.data else {
            return Err(FlowError::Integration(
                "habit-assign handler got the wrong task".into(),
            ));
        };
        let phone = &task.user_key;

        match step {
            HabitAssignStep::AwaitHabitId => {
                let Some(habit) = self.owned_habit(&trainer.trainer_id, input).await? else {
                    self.svc
                        .messaging
                        .send_text(phone, "I don't know that habit id. Try again, or /stop.")
                        .await?;
                    return Ok(());
                };
                let data = TaskData::HabitAssign {
                    step: HabitAssignStep::AwaitClients {
                        habit_id: habit.habit_id.clone(),
                    },
                };
                self.svc.db.update_task(task.id, &data).await?;
                let clients = self
                    .svc
                    .db
                    .list_clients_for_trainer(&trainer.trainer_id)
                    .await?;
                let lines: Vec<String> = clients
                    .iter()
                    .map(|c| format!("{} ({})", c.name, c.client_id))
                    .collect();
                let body = format!(
                    "Assigning {}. Your clients:\n{}\n\nReply with client ids \
                     separated by commas, or 'all'.",
                    habit.habit_name,
                    lines.join("\n")
                );
                self.svc.messaging.send_text(phone, &body).await?;
                Ok(())
            }
            HabitAssignStep::AwaitClients { habit_id } => {
                self.svc.db.complete_task(task.id).await?;
                let habit = self
                    .svc
                    .db
                    .get_habit(habit_id)
                    .await?
                    .ok_or_else(|| FlowError::NotFound {
                        entity: "habit".into(),
                        id: habit_id.clone(),
                    })?;
                let linked = self
                    .svc
                    .db
                    .list_clients_for_trainer(&trainer.trainer_id)
                    .await?;

                let targets: Vec<String> = if input.trim().eq_ignore_ascii_case("all") {
                    linked.iter().map(|c| c.client_id.clone()).collect()
                } else {
                    input
                        .split(',')
                        .map(|t| t.trim().to_uppercase())
                        .filter(|t| !t.is_empty())
                        .collect()
                };

                let mut assigned = Vec::new();
                let mut already = Vec::new();
                let mut failed = Vec::new();

                // One client's failure must not sink the rest of the batch.
                for client_id in targets {
                    let Some(client) = linked.iter().find(|c| c.client_id == client_id) else {
                        failed.push(client_id);
                        continue;
                    };
                    match self.assign_one(trainer, &habit, &client.client_id).await {
                        Ok(AssignOutcome::Assigned) => {
                            assigned.push(client.name.clone());
                            let note = format!(
                                "Your trainer assigned you a new habit: {} - {} {} {}. \
                                 Send /log to track it!",
                                habit.habit_name, habit.target_value, habit.unit, habit.frequency
                            );
                            // The assignment is already committed; a lost
                            // heads-up doesn't undo it.
                            if let Err(err) =
                                self.svc.messaging.send_text(&client.phone, &note).await
                            {
                                tracing::warn!(
                                    %err,
                                    client_id = %client.client_id,
                                    "could not notify client of new habit"
                                );
                            }
                        }
                        Ok(AssignOutcome::AlreadyAssigned) => already.push(client.name.clone()),
                        Err(err) => {
                            tracing::warn!(
                                %err,
                                client_id = %client.client_id,
                                "assignment failed"
                            );
                            failed.push(client.client_id.clone());
                        }
                    }
                }

                let mut lines = Vec::new();
                if !assigned.is_empty() {
                    lines.push(format!("✅ Assigned: {}", assigned.join(", ")));
                }
                if !already.is_empty() {
                    lines.push(format!("ℹ️ Already had it: {}", already.join(", ")));
                }
                if !failed.is_empty() {
                    lines.push(format!("❌ Couldn't assign: {}", failed.join(", ")));
                }
                if lines.is_empty() {
                    lines.push("Nothing to assign.".to_string());
                }
                self.svc.messaging.send_text(phone, &lines.join("\n")).await?;
                Ok(())
            }
        }
    }

    /// Assign one habit to one client, reactivating a prior assignment
    /// rather than duplicating it.
    async fn assign_one(
        &self,
        trainer: &Trainer,
        habit: &Habit,
        client_id: &str,
    ) -> Result<AssignOutcome, FlowError> {
        if let Some(existing) = self.svc.db.get_assignment(&habit.habit_id, client_id).await? {
            if existing.is_active {
                return Ok(AssignOutcome::AlreadyAssigned);
            }
            self.svc
                .db
                .set_assignment_active(&habit.habit_id, client_id, true)
                .await?;
            return Ok(AssignOutcome::Assigned);
        }
        let assignment = HabitAssignment {
            id: uuid::Uuid::new_v4(),
            habit_id: habit.habit_id.clone(),
            client_id: client_id.to_string(),
            trainer_id: trainer.trainer_id.clone(),
            is_active: true,
            assigned_date: Utc::now().date_naive(),
        };
        self.svc.db.insert_assignment(&assignment).await?;
        Ok(AssignOutcome::Assigned)
    }

    // ── Unassign ────────────────────────────────────────────────────

    pub async fn start_unassign(&self, trainer: &Trainer) -> Result<(), FlowError> {
        let clients = self
            .svc
            .db
            .list_clients_for_trainer(&trainer.trainer_id)
            .await?;
        if clients.is_empty() {
            self.svc
                .messaging
                .send_text(&trainer.phone, "You have no clients yet.")
                .await?;
            return Ok(());
        }
        let data = TaskData::HabitUnassign {
            step: HabitUnassignStep::AwaitClientId,
        };
        self.svc
            .db
            .create_task(&trainer.phone, crate::store::model::Role::Trainer, &data)
            .await?;
        let lines: Vec<String> = clients
            .iter()
            .map(|c| format!("{} ({})", c.name, c.client_id))
            .collect();
        let body = format!(
            "Which client? Reply with a client id:\n{}",
            lines.join("\n")
        );
        self.svc.messaging.send_text(&trainer.phone, &body).await?;
        Ok(())
    }

    pub async fn handle_unassign(
        &self,
        trainer: &Trainer,
        task: &Task,
        input: &str,
    ) -> Result<(), FlowError> {
        let TaskData::HabitUnassign { step } = &task.data else {
            return Err(FlowError::Integration(
                "habit-unassign handler got the wrong task".into(),
            ));
        };
        let phone = &task.user_key;

        match step {
            HabitUnassignStep::AwaitClientId => {
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
                let habits = self
                    .svc
                    .db
                    .list_active_habits_for_client(&client.client_id)
                    .await?;
                let mine: Vec<&Habit> = habits
                    .iter()
                    .filter(|h| h.trainer_id == trainer.trainer_id)
                    .collect();
                if mine.is_empty() {
                    self.svc.db.complete_task(task.id).await?;
                    self.svc
                        .messaging
                        .send_text(phone, "That client has no habits from you.")
                        .await?;
                    return Ok(());
                }
                let data = TaskData::HabitUnassign {
                    step: HabitUnassignStep::AwaitHabitId {
                        client_id: client.client_id.clone(),
                    },
                };
                self.svc.db.update_task(task.id, &data).await?;
                let lines: Vec<String> =
                    mine.iter().map(|h| Self::describe(h)).collect();
                let body = format!(
                    "Which habit should come off {}'s plan?\n{}",
                    client.name,
                    lines.join("\n")
                );
                self.svc.messaging.send_text(phone, &body).await?;
                Ok(())
            }
            HabitUnassignStep::AwaitHabitId { client_id } => {
                let Some(habit) = self.owned_habit(&trainer.trainer_id, input).await? else {
                    self.svc
                        .messaging
                        .send_text(phone, "I don't know that habit id. Try again, or /stop.")
                        .await?;
                    return Ok(());
                };
                let assignment = self
                    .svc
                    .db
                    .get_assignment(&habit.habit_id, client_id)
                    .await?;
                if !assignment.map(|a| a.is_active).unwrap_or(false) {
                    self.svc
                        .messaging
                        .send_text(phone, "That habit isn't on this client's plan.")
                        .await?;
                    return Ok(());
                }
                let data = TaskData::HabitUnassign {
                    step: HabitUnassignStep::Confirm {
                        client_id: client_id.clone(),
                        habit_id: habit.habit_id.clone(),
                    },
                };
                self.svc.db.update_task(task.id, &data).await?;
                let body = format!(
                    "Take {} off this client's plan? Their history stays. \
                     Reply YES to confirm, or NO to cancel.",
                    habit.habit_name
                );
                self.svc.messaging.send_text(phone, &body).await?;
                Ok(())
            }
            HabitUnassignStep::Confirm {
                client_id,
                habit_id,
            } => match parse_confirm(input) {
                ConfirmReply::Yes => {
                    self.svc.db.complete_task(task.id).await?;
                    self.svc
                        .db
                        .set_assignment_active(habit_id, client_id, false)
                        .await?;
                    self.svc
                        .messaging
                        .send_text(phone, "Done. The habit is off their plan; history is kept.")
                        .await?;
                    Ok(())
                }
                ConfirmReply::No => {
                    self.svc.db.complete_task(task.id).await?;
                    self.svc
                        .messaging
                        .send_text(phone, "Okay, nothing changed.")
                        .await?;
                    Ok(())
                }
                ConfirmReply::Unclear => {
                    self.svc
                        .messaging
                        .send_text(phone, "Please reply YES to take it off, or NO to cancel.")
                        .await?;
                    Ok(())
                }
            },
        }
    }

    /// Habits as an interactive list (ids double as reply payloads).
    async fn send_habit_list(
        &self,
        phone: &str,
        body: &str,
        habits: &[Habit],
    ) -> Result<(), FlowError> {
        let rows: Vec<ListRow> = habits
            .iter()
            .map(|h| {
                ListRow::new(&h.habit_id, &h.habit_name)
                    .with_description(format!("{} {} {}", h.target_value, h.unit, h.frequency))
            })
            .collect();
        self.svc
            .messaging
            .send_list(phone, body, "Choose a habit", &rows)
            .await?;
        Ok(())
    }
}

enum AssignOutcome {
    Assigned,
    AlreadyAssigned,
}

fn text(collected: &Collected, key: &str) -> Option<String> {
    collected
        .get(key)
        .and_then(serde_json::Value::as_str)
        .map(String::from)
}

fn number(collected: &Collected, key: &str) -> Option<f64> {
    collected.get(key).and_then(serde_json::Value::as_f64)
}
