//! Canned reply text, kept in one place so the bot speaks with one voice.

use crate::flows::task::TaskType;
use crate::store::model::Role;

/// Builds every fixed reply string. Stateless; handlers hold a copy.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageBuilder;

impl MessageBuilder {
    pub fn new() -> Self {
        Self
    }

    // ── Entry points ────────────────────────────────────────────────

    /// Greeting for a phone number with no profile at all.
    pub fn welcome_unregistered(&self) -> String {
        "Hi, I'm Refiloe! 💪 I help trainers and clients stay on top of \
         their fitness habits.\n\nAre you a trainer or a client?"
            .to_string()
    }

    /// Fallback for a registered user whose message matched nothing.
    pub fn fallback(&self, name: &str) -> String {
        format!("Hi {name}! I didn't catch that. Send /help to see what I can do.")
    }

    pub fn help(&self, role: Role) -> String {
        let common = "General:\n\
            /help - this message\n\
            /stop - cancel what we're doing\n\
            /edit-profile - update your details\n\
            /switch-role - use your other profile\n\
            /logout - clear your active role\n\
            /delete-account - remove your profile\n";
        match role {
            Role::Trainer => format!(
                "Here's what I can do for you as a trainer:\n\n\
                 Habits:\n\
                 /create-habit - create a habit\n\
                 /habits - list your habits\n\
                 /edit-habit - change a habit\n\
                 /delete-habit - retire a habit\n\
                 /assign-habit - assign a habit to clients\n\
                 /unassign-habit - take a habit off a client\n\n\
                 Clients:\n\
                 /invite - invite a client by phone\n\
                 /clients - list your clients\n\
                 /find-client - search clients by name\n\
                 /remove-client - end a client relationship\n\n\
                 {common}"
            ),
            Role::Client => format!(
                "Here's what I can do for you:\n\n\
                 Habits:\n\
                 /log - log today's habits\n\
                 /habits - see your assigned habits\n\
                 /progress - your progress report\n\
                 /export - download your logs as CSV\n\n\
                 {common}"
            ),
        }
    }

    // ── Task lifecycle ──────────────────────────────────────────────

    pub fn task_stopped(&self) -> String {
        "Okay, I've stopped that. What would you like to do next?".to_string()
    }

    pub fn nothing_to_stop(&self) -> String {
        "There's nothing in progress to stop.".to_string()
    }

    /// Sent when a step handler fails and the task is force-stopped.
    pub fn task_failed(&self, task_type: TaskType) -> String {
        format!(
            "Sorry, something went wrong on my side and I had to stop. \
             Please send {} to try again.",
            task_type.retry_command()
        )
    }

    // ── Registration ────────────────────────────────────────────────

    pub fn already_registered(&self, role: Role) -> String {
        format!(
            "You're already registered as a {}. Send /help to see what you can do.",
            role.as_str()
        )
    }

    pub fn registration_resumed(&self) -> String {
        "Welcome back! Let's pick up your registration where we left off.".to_string()
    }

    pub fn registration_complete(&self, role: Role, id: &str, name: &str) -> String {
        match role {
            Role::Trainer => format!(
                "You're all set, {name}! 🎉 Your trainer ID is {id}.\n\
                 Send /create-habit to build your first habit, or /help to see everything."
            ),
            Role::Client => format!(
                "Welcome aboard, {name}! 🎉 Your client ID is {id}.\n\
                 Once your trainer assigns habits, send /log to track them."
            ),
        }
    }

    // ── Role gating ─────────────────────────────────────────────────

    pub fn trainer_only(&self) -> String {
        "That command is for trainers. Send /help to see yours.".to_string()
    }

    pub fn client_only(&self) -> String {
        "That command is for clients. Send /help to see yours.".to_string()
    }

    pub fn not_registered(&self) -> String {
        "You're not registered yet. Reply 'trainer' or 'client' to get started."
            .to_string()
    }

    // ── Progress banding ────────────────────────────────────────────

    /// Celebration line for a day's percentage toward target.
    pub fn progress_line(&self, percent: f64) -> &'static str {
        if percent >= 100.0 {
            "🎉 Target smashed! Amazing work!"
        } else if percent >= 75.0 {
            "🔥 So close! Keep pushing!"
        } else if percent >= 50.0 {
            "💪 Over halfway there!"
        } else {
            "Every bit counts. Keep going!"
        }
    }
}
