//! WhatsApp Business Cloud API client and webhook payload parsing.
//!
//! All sends go through `POST /{phone_number_id}/messages` on the Graph
//! API with a JSON body; the shape varies per message type.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::channels::{Button, InboundMessage, ListRow, MessagingClient};
use crate::error::ChannelError;
use crate::store::model::Role;

const GRAPH_API_BASE: &str = "https://graph.facebook.com/v20.0";

/// WhatsApp Cloud API client.
pub struct WhatsAppClient {
    token: SecretString,
    phone_number_id: String,
    registration_flow_id: Option<String>,
    client: reqwest::Client,
    base_url: String,
}

impl WhatsAppClient {
    pub fn new(
        token: SecretString,
        phone_number_id: String,
        registration_flow_id: Option<String>,
    ) -> Self {
        Self {
            token,
            phone_number_id,
            registration_flow_id,
            client: reqwest::Client::new(),
            base_url: GRAPH_API_BASE.to_string(),
        }
    }

    /// Override the API base URL (tests point this at a local server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn messages_url(&self) -> String {
        format!("{}/{}/messages", self.base_url, self.phone_number_id)
    }

    /// POST a message body, mapping failures to `ChannelError::SendFailed`.
    async fn post_message(
        &self,
        kind: &str,
        to: &str,
        body: &serde_json::Value,
    ) -> Result<(), ChannelError> {
        let resp = self
            .client
            .post(self.messages_url())
            .bearer_auth(self.token.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                kind: kind.into(),
                recipient: to.into(),
                reason: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let err_body = resp.text().await.unwrap_or_default();
            tracing::warn!(%status, kind, to, "WhatsApp send failed");
            return Err(ChannelError::SendFailed {
                kind: kind.into(),
                recipient: to.into(),
                reason: format!("{status}: {err_body}"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl MessagingClient for WhatsAppClient {
    async fn send_text(&self, to: &str, body: &str) -> Result<(), ChannelError> {
        let payload = serde_json::json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": "text",
            "text": { "body": body },
        });
        self.post_message("text", to, &payload).await
    }

    async fn send_buttons(
        &self,
        to: &str,
        body: &str,
        buttons: &[Button],
    ) -> Result<(), ChannelError> {
        // The API rejects more than three reply buttons.
        let buttons: Vec<serde_json::Value> = buttons
            .iter()
            .take(3)
            .map(|b| {
                serde_json::json!({
                    "type": "reply",
                    "reply": { "id": b.id, "title": b.title },
                })
            })
            .collect();

        let payload = serde_json::json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": "interactive",
            "interactive": {
                "type": "button",
                "body": { "text": body },
                "action": { "buttons": buttons },
            },
        });
        self.post_message("buttons", to, &payload).await
    }

    async fn send_list(
        &self,
        to: &str,
        body: &str,
        button_label: &str,
        rows: &[ListRow],
    ) -> Result<(), ChannelError> {
        let rows: Vec<serde_json::Value> = rows
            .iter()
            .take(10)
            .map(|r| {
                serde_json::json!({
                    "id": r.id,
                    "title": r.title,
                    "description": r.description,
                })
            })
            .collect();

        let payload = serde_json::json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": "interactive",
            "interactive": {
                "type": "list",
                "body": { "text": body },
                "action": {
                    "button": button_label,
                    "sections": [{ "rows": rows }],
                },
            },
        });
        self.post_message("list", to, &payload).await
    }

    async fn send_document_link(
        &self,
        to: &str,
        url: &str,
        filename: &str,
        caption: Option<&str>,
    ) -> Result<(), ChannelError> {
        let mut document = serde_json::json!({
            "link": url,
            "filename": filename,
        });
        if let Some(cap) = caption {
            document["caption"] = serde_json::Value::String(cap.to_string());
        }
        let payload = serde_json::json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": "document",
            "document": document,
        });
        self.post_message("document", to, &payload).await
    }

    async fn send_registration_flow(&self, to: &str, role: Role) -> Result<(), ChannelError> {
        let Some(flow_id) = self.registration_flow_id.as_deref() else {
            return Err(ChannelError::SendFailed {
                kind: "flow".into(),
                recipient: to.into(),
                reason: "No registration flow configured".into(),
            });
        };

        let payload = serde_json::json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": "interactive",
            "interactive": {
                "type": "flow",
                "body": { "text": "Tap below to complete your registration." },
                "action": {
                    "name": "flow",
                    "parameters": {
                        "flow_id": flow_id,
                        "flow_cta": "Register",
                        "flow_action_payload": { "role": role.as_str() },
                    },
                },
            },
        });
        self.post_message("flow", to, &payload).await
    }
}

// ── Webhook payload parsing ─────────────────────────────────────────

/// Extract inbound messages from a Cloud API webhook payload.
///
/// Statuses, reactions, and media-only messages are skipped. An
/// unrecognized top-level shape is an error; an empty delivery is not.
pub fn parse_webhook_payload(
    payload: &serde_json::Value,
) -> Result<Vec<InboundMessage>, ChannelError> {
    let entries = payload
        .get("entry")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| ChannelError::InvalidPayload("missing entry array".into()))?;

    let mut out = Vec::new();
    for entry in entries {
        let Some(changes) = entry.get("changes").and_then(serde_json::Value::as_array) else {
            continue;
        };
        for change in changes {
            let Some(messages) = change
                .get("value")
                .and_then(|v| v.get("messages"))
                .and_then(serde_json::Value::as_array)
            else {
                continue;
            };
            for message in messages {
                if let Some(parsed) = parse_message(message) {
                    out.push(parsed);
                }
            }
        }
    }
    Ok(out)
}

/// Parse one message object into an `InboundMessage`, if it carries
/// something routable.
fn parse_message(message: &serde_json::Value) -> Option<InboundMessage> {
    let phone = message.get("from").and_then(serde_json::Value::as_str)?;
    let msg_type = message.get("type").and_then(serde_json::Value::as_str)?;

    match msg_type {
        "text" => {
            let body = message
                .get("text")
                .and_then(|t| t.get("body"))
                .and_then(serde_json::Value::as_str)?;
            Some(InboundMessage::text(phone, body))
        }
        "interactive" => {
            let interactive = message.get("interactive")?;
            let reply = interactive
                .get("button_reply")
                .or_else(|| interactive.get("list_reply"))?;
            let id = reply.get("id").and_then(serde_json::Value::as_str)?;
            let title = reply
                .get("title")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("");
            Some(InboundMessage::button(phone, id, title))
        }
        "button" => {
            // Template quick-reply buttons arrive as a separate type.
            let button = message.get("button")?;
            let payload_id = button.get("payload").and_then(serde_json::Value::as_str)?;
            let text = button
                .get("text")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("");
            Some(InboundMessage::button(phone, payload_id, text))
        }
        _ => None,
    }
}

/// Normalize a phone number: strip everything but digits and a leading `+`,
/// then drop the `+`.
pub fn normalize_phone(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_digit())
        .collect::<String>()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn webhook_with_message(message: serde_json::Value) -> serde_json::Value {
        serde_json::json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "id": "123",
                "changes": [{
                    "field": "messages",
                    "value": {
                        "messaging_product": "whatsapp",
                        "messages": [message],
                    },
                }],
            }],
        })
    }

    #[test]
    fn parses_text_message() {
        let payload = webhook_with_message(serde_json::json!({
            "from": "27821234567",
            "id": "wamid.1",
            "type": "text",
            "text": { "body": "Hi" },
        }));
        let messages = parse_webhook_payload(&payload).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].phone, "27821234567");
        assert_eq!(messages[0].text, "Hi");
        assert_eq!(messages[0].button_id, None);
    }

    #[test]
    fn parses_button_reply() {
        let payload = webhook_with_message(serde_json::json!({
            "from": "27821234567",
            "id": "wamid.2",
            "type": "interactive",
            "interactive": {
                "type": "button_reply",
                "button_reply": { "id": "register_trainer", "title": "Trainer" },
            },
        }));
        let messages = parse_webhook_payload(&payload).unwrap();
        assert_eq!(messages[0].button_id.as_deref(), Some("register_trainer"));
        assert_eq!(messages[0].text, "Trainer");
    }

    #[test]
    fn parses_list_reply() {
        let payload = webhook_with_message(serde_json::json!({
            "from": "27821234567",
            "id": "wamid.3",
            "type": "interactive",
            "interactive": {
                "type": "list_reply",
                "list_reply": { "id": "HB123", "title": "Drink water" },
            },
        }));
        let messages = parse_webhook_payload(&payload).unwrap();
        assert_eq!(messages[0].button_id.as_deref(), Some("HB123"));
    }

    #[test]
    fn skips_status_only_delivery() {
        let payload = serde_json::json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "changes": [{
                    "value": { "statuses": [{ "status": "delivered" }] },
                }],
            }],
        });
        let messages = parse_webhook_payload(&payload).unwrap();
        assert!(messages.is_empty());
    }

    #[test]
    fn skips_media_message() {
        let payload = webhook_with_message(serde_json::json!({
            "from": "27821234567",
            "type": "image",
            "image": { "id": "media1" },
        }));
        let messages = parse_webhook_payload(&payload).unwrap();
        assert!(messages.is_empty());
    }

    #[test]
    fn rejects_malformed_payload() {
        let payload = serde_json::json!({ "object": "something_else" });
        assert!(parse_webhook_payload(&payload).is_err());
    }

    #[test]
    fn normalize_phone_strips_formatting() {
        assert_eq!(normalize_phone("+27 82 123-4567"), "27821234567");
        assert_eq!(normalize_phone("27821234567"), "27821234567");
    }

    #[test]
    fn messages_url_includes_phone_number_id() {
        let client = WhatsAppClient::new(
            SecretString::from("token"),
            "10987654321".to_string(),
            None,
        );
        assert_eq!(
            client.messages_url(),
            "https://graph.facebook.com/v20.0/10987654321/messages"
        );
    }

    #[tokio::test]
    async fn flow_send_fails_without_flow_id() {
        let client = WhatsAppClient::new(
            SecretString::from("token"),
            "10987654321".to_string(),
            None,
        );
        let err = client
            .send_registration_flow("27821234567", Role::Trainer)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No registration flow configured"));
    }
}
