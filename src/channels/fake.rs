//! In-memory `MessagingClient` fake for tests.
//!
//! Records every send instead of calling the network. Flow sends can be
//! forced to fail to exercise the text-registration fallback.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::channels::{Button, ListRow, MessagingClient};
use crate::error::ChannelError;
use crate::store::model::Role;

/// One recorded outgoing message.
#[derive(Debug, Clone, PartialEq)]
pub enum SentMessage {
    Text {
        to: String,
        body: String,
    },
    Buttons {
        to: String,
        body: String,
        button_ids: Vec<String>,
    },
    List {
        to: String,
        body: String,
        row_ids: Vec<String>,
    },
    Document {
        to: String,
        url: String,
        filename: String,
    },
    Flow {
        to: String,
        role: Role,
    },
}

/// Recording fake. Construct with `FakeMessagingClient::default()`;
/// flow sends fail unless `with_flow_support()` is used, mirroring a
/// deployment without a published WhatsApp Flow.
#[derive(Default)]
pub struct FakeMessagingClient {
    sent: Mutex<Vec<SentMessage>>,
    flow_supported: bool,
    failing_text_recipients: Mutex<Vec<String>>,
}

impl FakeMessagingClient {
    pub fn with_flow_support() -> Self {
        Self {
            flow_supported: true,
            ..Self::default()
        }
    }

    /// Make every `send_text` to this recipient fail.
    pub fn fail_texts_to(&self, phone: &str) {
        self.failing_text_recipients
            .lock()
            .unwrap()
            .push(phone.to_string());
    }

    /// All recorded sends, in order.
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// The last recorded send, if any.
    pub fn last(&self) -> Option<SentMessage> {
        self.sent.lock().unwrap().last().cloned()
    }

    /// Bodies of all text sends to one recipient, joined for assertions.
    pub fn texts_to(&self, phone: &str) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|m| match m {
                SentMessage::Text { to, body } if to == phone => Some(body.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, message: SentMessage) {
        self.sent.lock().unwrap().push(message);
    }
}

#[async_trait]
impl MessagingClient for FakeMessagingClient {
    async fn send_text(&self, to: &str, body: &str) -> Result<(), ChannelError> {
        if self
            .failing_text_recipients
            .lock()
            .unwrap()
            .iter()
            .any(|p| p == to)
        {
            return Err(ChannelError::SendFailed {
                kind: "text".into(),
                recipient: to.into(),
                reason: "text sends disabled in fake".into(),
            });
        }
        self.record(SentMessage::Text {
            to: to.into(),
            body: body.into(),
        });
        Ok(())
    }

    async fn send_buttons(
        &self,
        to: &str,
        body: &str,
        buttons: &[Button],
    ) -> Result<(), ChannelError> {
        self.record(SentMessage::Buttons {
            to: to.into(),
            body: body.into(),
            button_ids: buttons.iter().map(|b| b.id.clone()).collect(),
        });
        Ok(())
    }

    async fn send_list(
        &self,
        to: &str,
        body: &str,
        _button_label: &str,
        rows: &[ListRow],
    ) -> Result<(), ChannelError> {
        self.record(SentMessage::List {
            to: to.into(),
            body: body.into(),
            row_ids: rows.iter().map(|r| r.id.clone()).collect(),
        });
        Ok(())
    }

    async fn send_document_link(
        &self,
        to: &str,
        url: &str,
        filename: &str,
        _caption: Option<&str>,
    ) -> Result<(), ChannelError> {
        self.record(SentMessage::Document {
            to: to.into(),
            url: url.into(),
            filename: filename.into(),
        });
        Ok(())
    }

    async fn send_registration_flow(&self, to: &str, role: Role) -> Result<(), ChannelError> {
        if !self.flow_supported {
            return Err(ChannelError::SendFailed {
                kind: "flow".into(),
                recipient: to.into(),
                reason: "flow sends disabled in fake".into(),
            });
        }
        self.record(SentMessage::Flow {
            to: to.into(),
            role,
        });
        Ok(())
    }
}
