//! Client-side habit logging. Logs are append-only; a day's progress is
//! the sum of that day's values against the habit target.

use chrono::Utc;

use crate::channels::ListRow;
use crate::error::FlowError;
use crate::flows::task::{HabitLogStep, Task, TaskData};
use crate::flows::FlowServices;
use crate::store::model::{Client, Habit, HabitLog, Role};

pub struct LoggingFlow {
    svc: FlowServices,
}

impl LoggingFlow {
    pub fn new(svc: FlowServices) -> Self {
        Self { svc }
    }

    /// Show the client's assigned habits.
    pub async fn list_habits(&self, client: &Client) -> Result<(), FlowError> {
        let habits = self
            .svc
            .db
            .list_active_habits_for_client(&client.client_id)
            .await?;
        let body = if habits.is_empty() {
            "You have no habits assigned yet. Your trainer sets those up.".to_string()
        } else {
            let lines: Vec<String> = habits
                .iter()
                .map(|h| format!("{} - {} {} {}", h.habit_name, h.target_value, h.unit, h.frequency))
                .collect();
            format!("Your habits:\n{}", lines.join("\n"))
        };
        self.svc.messaging.send_text(&client.phone, &body).await?;
        Ok(())
    }

    /// Begin logging: offer the client's habits as a list.
    ///
    /// A single assigned habit skips the pick step and goes straight to
    /// the value question.
    pub async fn start(&self, client: &Client) -> Result<(), FlowError> {
        let habits = self
            .svc
            .db
            .list_active_habits_for_client(&client.client_id)
            .await?;
        if habits.is_empty() {
            self.svc
                .messaging
                .send_text(
                    &client.phone,
                    "You have no habits to log yet. Your trainer sets those up.",
                )
                .await?;
            return Ok(());
        }

        if habits.len() == 1 {
            let habit = &habits[0];
            let data = TaskData::HabitLog {
                step: HabitLogStep::AwaitValue {
                    habit_id: habit.habit_id.clone(),
                },
            };
            self.svc
                .db
                .create_task(&client.phone, Role::Client, &data)
                .await?;
            self.ask_value(&client.phone, habit).await?;
            return Ok(());
        }

        let offered: Vec<String> = habits.iter().map(|h| h.habit_id.clone()).collect();
        let data = TaskData::HabitLog {
            step: HabitLogStep::AwaitHabit { offered },
        };
        self.svc
            .db
            .create_task(&client.phone, Role::Client, &data)
            .await?;

        let rows: Vec<ListRow> = habits
            .iter()
            .enumerate()
            .map(|(i, h)| {
                ListRow::new(&h.habit_id, format!("{}. {}", i + 1, h.habit_name))
                    .with_description(format!("target {} {}", h.target_value, h.unit))
            })
            .collect();
        self.svc
            .messaging
            .send_list(
                &client.phone,
                "Which habit are you logging? You can also reply with its number.",
                "Choose a habit",
                &rows,
            )
            .await?;
        Ok(())
    }

    pub async fn handle(
        &self,
        client: &Client,
        task: &Task,
        input: &str,
    ) -> Result<(), FlowError> {
        let TaskData::HabitLog { step } = &task.data else {
            return Err(FlowError::Integration(
                "logging handler got a non-logging task".into(),
            ));
        };
        let phone = &task.user_key;

        match step {
            HabitLogStep::AwaitHabit { offered } => {
                let Some(habit_id) = resolve_choice(offered, input) else {
                    self.svc
                        .messaging
                        .send_text(
                            phone,
                            "I didn't recognize that habit. Reply with its number or id, or /stop.",
                        )
                        .await?;
                    return Ok(());
                };
                let habit = self
                    .svc
                    .db
                    .get_habit(&habit_id)
                    .await?
                    .ok_or_else(|| FlowError::NotFound {
                        entity: "habit".into(),
                        id: habit_id.clone(),
                    })?;
                let data = TaskData::HabitLog {
                    step: HabitLogStep::AwaitValue { habit_id },
                };
                self.svc.db.update_task(task.id, &data).await?;
                self.ask_value(phone, &habit).await?;
                Ok(())
            }
            HabitLogStep::AwaitValue { habit_id } => {
                let Ok(value) = input.trim().parse::<f64>() else {
                    self.svc
                        .messaging
                        .send_text(phone, "Please reply with just a number, e.g. 3.")
                        .await?;
                    return Ok(());
                };
                if value <= 0.0 {
                    self.svc
                        .messaging
                        .send_text(phone, "The amount must be greater than zero.")
                        .await?;
                    return Ok(());
                }
                let habit = self
                    .svc
                    .db
                    .get_habit(habit_id)
                    .await?
                    .ok_or_else(|| FlowError::NotFound {
                        entity: "habit".into(),
                        id: habit_id.clone(),
                    })?;

                self.svc.db.complete_task(task.id).await?;

                let today = Utc::now().date_naive();
                self.svc
                    .db
                    .insert_habit_log(&HabitLog {
                        id: uuid::Uuid::new_v4(),
                        client_id: client.client_id.clone(),
                        habit_id: habit.habit_id.clone(),
                        value,
                        logged_on: today,
                        logged_at: Utc::now(),
                    })
                    .await?;

                let total = self
                    .svc
                    .db
                    .sum_logs_for_day(&client.client_id, &habit.habit_id, today)
                    .await?;
                let percent = if habit.target_value > 0.0 {
                    total / habit.target_value * 100.0
                } else {
                    100.0
                };
                let body = format!(
                    "Logged {value} {unit} of {name}. Today: {total}/{target} {unit} ({percent:.0}%).\n{line}",
                    unit = habit.unit,
                    name = habit.habit_name,
                    target = habit.target_value,
                    line = self.svc.messages.progress_line(percent),
                );
                self.svc.messaging.send_text(phone, &body).await?;
                Ok(())
            }
        }
    }

    async fn ask_value(&self, phone: &str, habit: &Habit) -> Result<(), FlowError> {
        let body = format!(
            "How many {} of {} today? (target {})",
            habit.unit, habit.habit_name, habit.target_value
        );
        self.svc.messaging.send_text(phone, &body).await?;
        Ok(())
    }
}

/// Map a reply to a habit id: a 1-based number into the offered list,
/// or an id typed/tapped directly.
fn resolve_choice(offered: &[String], input: &str) -> Option<String> {
    let trimmed = input.trim();
    if let Ok(n) = trimmed.parse::<usize>() {
        if n >= 1 && n <= offered.len() {
            return Some(offered[n - 1].clone());
        }
        return None;
    }
    let upper = trimmed.to_uppercase();
    offered.iter().find(|id| **id == upper).cloned()
}
