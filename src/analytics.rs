//! Registration analytics: aggregates over registration task rows.
//!
//! Pure functions over [`RegistrationTaskRow`]s; the HTTP layer fetches
//! the rows and picks the window.

use serde::Serialize;

use crate::flows::fields::{CLIENT_REGISTRATION_FIELDS, TRAINER_REGISTRATION_FIELDS};
use crate::flows::task::TaskStatus;
use crate::store::model::Role;
use crate::store::RegistrationTaskRow;

/// Query window bounds, in days.
pub const MIN_DAYS: u32 = 1;
pub const MAX_DAYS: u32 = 365;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RoleBreakdown {
    pub started: usize,
    pub completed: usize,
    pub stopped: usize,
    pub running: usize,
    /// Completed over started, as a percentage. Zero when nothing started.
    pub completion_rate: f64,
}

impl RoleBreakdown {
    fn from_rows<'a>(rows: impl Iterator<Item = &'a RegistrationTaskRow>) -> Self {
        let mut out = Self {
            started: 0,
            completed: 0,
            stopped: 0,
            running: 0,
            completion_rate: 0.0,
        };
        for row in rows {
            out.started += 1;
            match row.status {
                TaskStatus::Completed => out.completed += 1,
                TaskStatus::Stopped => out.stopped += 1,
                TaskStatus::Running => out.running += 1,
            }
        }
        out.completion_rate = rate(out.completed, out.started);
        out
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistrationSummary {
    pub days: u32,
    pub total_started: usize,
    pub total_completed: usize,
    pub completion_rate: f64,
    /// Per-role breakdowns, present in detailed format only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trainers: Option<RoleBreakdown>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clients: Option<RoleBreakdown>,
}

/// One step of the registration funnel for one role.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FunnelStep {
    pub field_index: usize,
    /// Tasks that reached this question (answered everything before it).
    pub reached: usize,
    /// Abandoned tasks whose last unanswered question was this one.
    pub dropped: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistrationFunnel {
    pub days: u32,
    pub trainer: Vec<FunnelStep>,
    pub client: Vec<FunnelStep>,
}

fn rate(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

/// Headline registration numbers. `detailed` adds per-role breakdowns.
pub fn summarize(rows: &[RegistrationTaskRow], days: u32, detailed: bool) -> RegistrationSummary {
    let total_started = rows.len();
    let total_completed = rows
        .iter()
        .filter(|r| r.status == TaskStatus::Completed)
        .count();
    let (trainers, clients) = if detailed {
        (
            Some(RoleBreakdown::from_rows(
                rows.iter().filter(|r| r.role == Role::Trainer),
            )),
            Some(RoleBreakdown::from_rows(
                rows.iter().filter(|r| r.role == Role::Client),
            )),
        )
    } else {
        (None, None)
    };
    RegistrationSummary {
        days,
        total_started,
        total_completed,
        completion_rate: rate(total_completed, total_started),
        trainers,
        clients,
    }
}

/// Where abandoned registrations stall, per question and role.
pub fn funnel(rows: &[RegistrationTaskRow], days: u32) -> RegistrationFunnel {
    RegistrationFunnel {
        days,
        trainer: funnel_for(rows, Role::Trainer, TRAINER_REGISTRATION_FIELDS.len()),
        client: funnel_for(rows, Role::Client, CLIENT_REGISTRATION_FIELDS.len()),
    }
}

fn funnel_for(rows: &[RegistrationTaskRow], role: Role, field_count: usize) -> Vec<FunnelStep> {
    let rows: Vec<&RegistrationTaskRow> = rows.iter().filter(|r| r.role == role).collect();
    (0..field_count)
        .map(|i| {
            let reached = rows
                .iter()
                .filter(|r| r.field_index >= i || r.status == TaskStatus::Completed)
                .count();
            let dropped = rows
                .iter()
                .filter(|r| r.status == TaskStatus::Stopped && r.field_index == i)
                .count();
            FunnelStep {
                field_index: i,
                reached,
                dropped,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn row(role: Role, status: TaskStatus, field_index: usize) -> RegistrationTaskRow {
        RegistrationTaskRow {
            role,
            status,
            field_index,
            created_at: Utc::now(),
        }
    }

    fn sample() -> Vec<RegistrationTaskRow> {
        vec![
            row(Role::Trainer, TaskStatus::Completed, 4),
            row(Role::Trainer, TaskStatus::Stopped, 1),
            row(Role::Trainer, TaskStatus::Running, 2),
            row(Role::Client, TaskStatus::Completed, 3),
            row(Role::Client, TaskStatus::Completed, 3),
            row(Role::Client, TaskStatus::Stopped, 0),
        ]
    }

    #[test]
    fn summary_totals_and_rate() {
        let summary = summarize(&sample(), 30, false);
        assert_eq!(summary.total_started, 6);
        assert_eq!(summary.total_completed, 3);
        assert_eq!(summary.completion_rate, 50.0);
        assert!(summary.trainers.is_none());
    }

    #[test]
    fn detailed_summary_breaks_down_by_role() {
        let summary = summarize(&sample(), 30, true);
        let trainers = summary.trainers.unwrap();
        assert_eq!(trainers.started, 3);
        assert_eq!(trainers.completed, 1);
        assert_eq!(trainers.stopped, 1);
        assert_eq!(trainers.running, 1);

        let clients = summary.clients.unwrap();
        assert_eq!(clients.started, 3);
        assert!((clients.completion_rate - 66.666).abs() < 0.01);
    }

    #[test]
    fn empty_rows_have_zero_rate() {
        let summary = summarize(&[], 7, true);
        assert_eq!(summary.completion_rate, 0.0);
        assert_eq!(summary.trainers.unwrap().completion_rate, 0.0);
    }

    #[test]
    fn funnel_counts_reached_and_dropped() {
        let funnel = funnel(&sample(), 30);
        assert_eq!(funnel.trainer.len(), 4);
        assert_eq!(funnel.client.len(), 3);

        // All three trainer tasks reached field 0.
        assert_eq!(funnel.trainer[0].reached, 3);
        // The stopped trainer task stalled on field 1.
        assert_eq!(funnel.trainer[1].dropped, 1);
        // Only the completed and running tasks got past field 1.
        assert_eq!(funnel.trainer[2].reached, 2);

        // The stopped client never answered the first question.
        assert_eq!(funnel.client[0].dropped, 1);
    }

    #[test]
    fn summary_serializes_without_null_roles() {
        let json = serde_json::to_value(summarize(&sample(), 30, false)).unwrap();
        assert!(json.get("trainers").is_none());
        assert_eq!(json["total_started"], 6);
    }
}
