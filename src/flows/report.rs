//! Client progress reporting and CSV export of habit logs.

use std::collections::HashMap;

use chrono::{Duration, Utc};

use crate::error::FlowError;
use crate::flows::FlowServices;
use crate::store::model::{Client, Habit};

const REPORT_DAYS: i64 = 7;
const EXPORT_DAYS: i64 = 30;

pub struct ReportFlow {
    svc: FlowServices,
}

impl ReportFlow {
    pub fn new(svc: FlowServices) -> Self {
        Self { svc }
    }

    /// `/progress`: per-habit summary of the last seven days plus
    /// today's standing against the target.
    pub async fn progress(&self, client: &Client) -> Result<(), FlowError> {
        let habits = self
            .svc
            .db
            .list_active_habits_for_client(&client.client_id)
            .await?;
        if habits.is_empty() {
            self.svc
                .messaging
                .send_text(&client.phone, "No habits assigned yet, so nothing to report.")
                .await?;
            return Ok(());
        }

        let today = Utc::now().date_naive();
        let since = today - Duration::days(REPORT_DAYS - 1);
        let logs = self.svc.db.list_logs_since(&client.client_id, since).await?;

        let mut week_totals: HashMap<&str, f64> = HashMap::new();
        for log in &logs {
            for habit in &habits {
                if habit.habit_id == log.habit_id {
                    *week_totals.entry(habit.habit_id.as_str()).or_default() += log.value;
                }
            }
        }

        let mut lines = vec![format!("Your last {REPORT_DAYS} days, {}:", client.name)];
        for habit in &habits {
            let today_total = self
                .svc
                .db
                .sum_logs_for_day(&client.client_id, &habit.habit_id, today)
                .await?;
            let percent = if habit.target_value > 0.0 {
                today_total / habit.target_value * 100.0
            } else {
                100.0
            };
            let week = week_totals
                .get(habit.habit_id.as_str())
                .copied()
                .unwrap_or(0.0);
            lines.push(format!(
                "{name}: today {today_total}/{target} {unit} ({percent:.0}%), {week} {unit} this week",
                name = habit.habit_name,
                target = habit.target_value,
                unit = habit.unit,
            ));
        }
        lines.push(
            self.svc
                .messages
                .progress_line(overall_percent(&habits, &week_totals))
                .to_string(),
        );
        self.svc
            .messaging
            .send_text(&client.phone, &lines.join("\n"))
            .await?;
        Ok(())
    }

    /// `/export`: last thirty days of logs as a CSV document.
    pub async fn export_csv(&self, client: &Client) -> Result<(), FlowError> {
        let since = Utc::now().date_naive() - Duration::days(EXPORT_DAYS - 1);
        let logs = self.svc.db.list_logs_since(&client.client_id, since).await?;
        if logs.is_empty() {
            self.svc
                .messaging
                .send_text(
                    &client.phone,
                    "No logs in the last 30 days, so there's nothing to export.",
                )
                .await?;
            return Ok(());
        }

        // Habit lookup, including retired habits that still have logs.
        let mut habits: HashMap<String, Habit> = HashMap::new();
        for log in &logs {
            if !habits.contains_key(&log.habit_id) {
                if let Some(habit) = self.svc.db.get_habit(&log.habit_id).await? {
                    habits.insert(log.habit_id.clone(), habit);
                }
            }
        }

        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record(["date", "habit_id", "habit_name", "value", "unit", "target"])
            .map_err(|e| FlowError::Integration(e.to_string()))?;
        for log in &logs {
            let (name, unit, target) = habits
                .get(&log.habit_id)
                .map(|h| {
                    (
                        h.habit_name.clone(),
                        h.unit.clone(),
                        h.target_value.to_string(),
                    )
                })
                .unwrap_or_else(|| ("unknown".to_string(), String::new(), String::new()));
            writer
                .write_record([
                    log.logged_on.to_string(),
                    log.habit_id.clone(),
                    name,
                    log.value.to_string(),
                    unit,
                    target,
                ])
                .map_err(|e| FlowError::Integration(e.to_string()))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| FlowError::Integration(e.to_string()))?;

        let filename = format!(
            "refiloe-logs-{}-{}.csv",
            client.client_id,
            Utc::now().format("%Y%m%d")
        );
        let url = self.svc.storage.upload(&filename, bytes).await?;
        self.svc
            .messaging
            .send_document_link(
                &client.phone,
                &url,
                &filename,
                Some("Your habit logs for the last 30 days."),
            )
            .await?;
        Ok(())
    }
}

/// Average of each habit's week total against seven times its daily
/// target, for the closing celebration line.
fn overall_percent(habits: &[Habit], week_totals: &HashMap<&str, f64>) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for habit in habits {
        if habit.target_value <= 0.0 {
            continue;
        }
        let week = week_totals
            .get(habit.habit_id.as_str())
            .copied()
            .unwrap_or(0.0);
        sum += week / (habit.target_value * REPORT_DAYS as f64) * 100.0;
        count += 1;
    }
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::SentMessage;
    use crate::flows::testutil;
    use crate::store::model::{HabitAssignment, HabitLog};

    const TRAINER_PHONE: &str = "27820000040";
    const CLIENT_PHONE: &str = "27820000041";

    async fn seed(
        db: &dyn crate::store::Database,
    ) -> (crate::store::model::Trainer, Client, Habit) {
        let trainer = testutil::seed_trainer(db, TRAINER_PHONE).await;
        let client = testutil::seed_client(db, CLIENT_PHONE).await;
        let habit = Habit {
            habit_id: crate::ids::habit_id(),
            trainer_id: trainer.trainer_id.clone(),
            habit_name: "Drink water".to_string(),
            description: None,
            target_value: 8.0,
            unit: "glasses".to_string(),
            frequency: "daily".to_string(),
            is_active: true,
            created_at: Utc::now(),
        };
        db.insert_habit(&habit).await.unwrap();
        db.insert_assignment(&HabitAssignment {
            id: uuid::Uuid::new_v4(),
            habit_id: habit.habit_id.clone(),
            client_id: client.client_id.clone(),
            trainer_id: trainer.trainer_id.clone(),
            is_active: true,
            assigned_date: Utc::now().date_naive(),
        })
        .await
        .unwrap();
        (trainer, client, habit)
    }

    async fn log(db: &dyn crate::store::Database, client: &Client, habit: &Habit, value: f64) {
        db.insert_habit_log(&HabitLog {
            id: uuid::Uuid::new_v4(),
            client_id: client.client_id.clone(),
            habit_id: habit.habit_id.clone(),
            value,
            logged_on: Utc::now().date_naive(),
            logged_at: Utc::now(),
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn progress_reports_today_and_week() {
        let (svc, messaging, db) = testutil::services().await;
        let (_trainer, client, habit) = seed(db.as_ref()).await;
        log(db.as_ref(), &client, &habit, 4.0).await;
        log(db.as_ref(), &client, &habit, 2.0).await;

        let flow = ReportFlow::new(svc);
        flow.progress(&client).await.unwrap();

        let texts = messaging.texts_to(CLIENT_PHONE);
        let body = texts.last().unwrap();
        assert!(body.contains("Drink water"));
        assert!(body.contains("6/8"));
        assert!(body.contains("75%"));
    }

    #[tokio::test]
    async fn progress_without_habits_is_a_notice() {
        let (svc, messaging, db) = testutil::services().await;
        let client = testutil::seed_client(db.as_ref(), CLIENT_PHONE).await;

        let flow = ReportFlow::new(svc);
        flow.progress(&client).await.unwrap();
        assert!(messaging
            .texts_to(CLIENT_PHONE)
            .last()
            .unwrap()
            .contains("nothing to report"));
    }

    #[tokio::test]
    async fn export_uploads_csv_and_sends_document() {
        let (svc, messaging, db) = testutil::services().await;
        let storage = std::sync::Arc::new(crate::channels::FakeStorage::default());
        let svc = FlowServices {
            storage: storage.clone(),
            ..svc
        };
        let (_trainer, client, habit) = seed(db.as_ref()).await;
        log(db.as_ref(), &client, &habit, 5.0).await;

        let flow = ReportFlow::new(svc);
        flow.export_csv(&client).await.unwrap();

        let uploads = storage.uploads();
        assert_eq!(uploads.len(), 1);
        let content = String::from_utf8(uploads[0].1.clone()).unwrap();
        assert!(content.starts_with("date,habit_id,habit_name,value,unit,target"));
        assert!(content.contains("Drink water"));
        assert!(content.contains("glasses"));

        match messaging.last().unwrap() {
            SentMessage::Document { to, filename, .. } => {
                assert_eq!(to, CLIENT_PHONE);
                assert!(filename.ends_with(".csv"));
            }
            other => panic!("expected a document send, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn export_with_no_logs_is_a_notice() {
        let (svc, messaging, db) = testutil::services().await;
        let (_trainer, client, _habit) = seed(db.as_ref()).await;

        let flow = ReportFlow::new(svc);
        flow.export_csv(&client).await.unwrap();
        assert!(messaging
            .texts_to(CLIENT_PHONE)
            .last()
            .unwrap()
            .contains("nothing to export"));
    }
}
