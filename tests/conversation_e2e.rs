//! End-to-end conversation tests through the HTTP webhook.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use refiloe::channels::{FakeMessagingClient, FakeStorage, SentMessage};
use refiloe::router::Router;
use refiloe::server::{app, AppState};
use refiloe::store::model::Role;
use refiloe::store::{Database, LibSqlBackend};

const TRAINER_PHONE: &str = "27821110001";
const CLIENT_PHONE: &str = "27821110002";

struct Harness {
    state: AppState,
    messaging: Arc<FakeMessagingClient>,
    db: Arc<LibSqlBackend>,
}

impl Harness {
    async fn new() -> Self {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let messaging = Arc::new(FakeMessagingClient::default());
        let storage = Arc::new(FakeStorage::default());
        let router = Arc::new(Router::new(db.clone(), messaging.clone(), storage));
        let state = AppState {
            router,
            db: db.clone(),
            verify_token: "verify".to_string(),
        };
        Self {
            state,
            messaging,
            db,
        }
    }

    /// Deliver one text message through POST /webhook.
    async fn text(&self, from: &str, body: &str) {
        let payload = serde_json::json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "changes": [{
                    "value": {
                        "messages": [{
                            "from": from,
                            "type": "text",
                            "text": { "body": body },
                        }],
                    },
                }],
            }],
        });
        self.deliver(payload).await;
    }

    /// Deliver one button tap through POST /webhook.
    async fn tap(&self, from: &str, button_id: &str) {
        let payload = serde_json::json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "changes": [{
                    "value": {
                        "messages": [{
                            "from": from,
                            "type": "interactive",
                            "interactive": {
                                "type": "button_reply",
                                "button_reply": { "id": button_id, "title": "" },
                            },
                        }],
                    },
                }],
            }],
        });
        self.deliver(payload).await;
    }

    async fn deliver(&self, payload: serde_json::Value) {
        let response = app(self.state.clone())
            .oneshot(
                Request::post("/webhook")
                    .header("content-type", "application/json")
                    .body(Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    fn last_text_to(&self, phone: &str) -> String {
        self.messaging
            .texts_to(phone)
            .last()
            .cloned()
            .unwrap_or_default()
    }

    /// Register a trainer through the conversation.
    async fn register_trainer(&self) {
        self.text(TRAINER_PHONE, "trainer").await;
        for answer in ["Coach Thandi", "skip", "skip", "skip"] {
            self.text(TRAINER_PHONE, answer).await;
        }
    }
}

#[tokio::test]
async fn new_user_registers_as_trainer() {
    let h = Harness::new().await;

    h.text(TRAINER_PHONE, "Hi").await;
    assert!(matches!(
        h.messaging.last().unwrap(),
        SentMessage::Buttons { .. }
    ));

    h.tap(TRAINER_PHONE, "register_trainer").await;
    h.text(TRAINER_PHONE, "Coach Thandi").await;
    h.text(TRAINER_PHONE, "thandi@example.com").await;
    h.text(TRAINER_PHONE, "Thandi Fitness").await;
    h.text(TRAINER_PHONE, "strength").await;

    let trainer = h
        .db
        .get_trainer_by_phone(TRAINER_PHONE)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(trainer.name, "Coach Thandi");
    assert_eq!(trainer.business_name.as_deref(), Some("Thandi Fitness"));
    assert!(h.last_text_to(TRAINER_PHONE).contains(&trainer.trainer_id));
}

#[tokio::test]
async fn habit_creation_and_logging_round_trip() {
    let h = Harness::new().await;
    h.register_trainer().await;

    // Create a habit.
    h.text(TRAINER_PHONE, "/create-habit").await;
    for answer in ["Drink water", "Stay hydrated", "8", "glasses", "daily"] {
        h.text(TRAINER_PHONE, answer).await;
    }
    let trainer = h
        .db
        .get_trainer_by_phone(TRAINER_PHONE)
        .await
        .unwrap()
        .unwrap();
    let habits = h
        .db
        .list_habits_for_trainer(&trainer.trainer_id)
        .await
        .unwrap();
    assert_eq!(habits.len(), 1);

    // Invite the client; they accept and register.
    h.text(TRAINER_PHONE, "/invite").await;
    h.text(TRAINER_PHONE, CLIENT_PHONE).await;
    let invitation = h
        .db
        .get_pending_invitation_for_phone(CLIENT_PHONE)
        .await
        .unwrap()
        .unwrap();
    h.tap(
        CLIENT_PHONE,
        &format!("invite_accept:{}", invitation.invitation_id),
    )
    .await;
    for answer in ["Sipho N", "skip", "Run a 10k"] {
        h.text(CLIENT_PHONE, answer).await;
    }
    let client = h
        .db
        .get_client_by_phone(CLIENT_PHONE)
        .await
        .unwrap()
        .unwrap();
    assert!(h
        .db
        .get_relationship(&trainer.trainer_id, &client.client_id)
        .await
        .unwrap()
        .unwrap()
        .is_active);

    // Assign the habit to everyone.
    h.text(TRAINER_PHONE, "/assign-habit").await;
    h.text(TRAINER_PHONE, &habits[0].habit_id).await;
    h.text(TRAINER_PHONE, "all").await;
    assert!(h.last_text_to(TRAINER_PHONE).contains("Assigned"));

    // The client logs twice; the day's total accumulates.
    h.text(CLIENT_PHONE, "/log").await;
    h.text(CLIENT_PHONE, "3").await;
    h.text(CLIENT_PHONE, "/log").await;
    h.text(CLIENT_PHONE, "5").await;
    let last = h.last_text_to(CLIENT_PHONE);
    assert!(last.contains("8/8"), "unexpected reply: {last}");
    assert!(last.contains("100%"));
}

#[tokio::test]
async fn stop_command_cancels_mid_registration() {
    let h = Harness::new().await;
    h.text(TRAINER_PHONE, "trainer").await;
    h.text(TRAINER_PHONE, "/stop").await;

    assert!(h
        .db
        .get_running_task(TRAINER_PHONE, Role::Trainer)
        .await
        .unwrap()
        .is_none());
    assert!(h.last_text_to(TRAINER_PHONE).contains("stopped"));
}

#[tokio::test]
async fn analytics_reflects_conversations() {
    let h = Harness::new().await;
    h.register_trainer().await;
    // A second registration that gets abandoned.
    h.text(CLIENT_PHONE, "client").await;
    h.text(CLIENT_PHONE, "/stop").await;

    let response = app(h.state.clone())
        .oneshot(
            Request::get("/api/registration/analytics/summary?format=detailed")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["total_started"], 2);
    assert_eq!(json["total_completed"], 1);
    assert_eq!(json["trainers"]["completed"], 1);
    assert_eq!(json["clients"]["stopped"], 1);
}
