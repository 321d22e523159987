//! Messaging abstraction for WhatsApp I/O.

pub mod fake;
pub mod storage;
pub mod whatsapp;

pub use fake::{FakeMessagingClient, SentMessage};
pub use storage::{DisabledStorage, FakeStorage, FileStorage, SupabaseStorage};
pub use whatsapp::WhatsAppClient;

use async_trait::async_trait;

use crate::error::ChannelError;
use crate::store::model::Role;

/// One inbound webhook message, reduced to what routing needs.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Sender phone number in international digits (no `+`).
    pub phone: String,
    /// Message text, or the button/list title when a control was tapped.
    pub text: String,
    /// Reply id when the user tapped a button or list row.
    pub button_id: Option<String>,
}

impl InboundMessage {
    pub fn text(phone: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            phone: phone.into(),
            text: text.into(),
            button_id: None,
        }
    }

    pub fn button(
        phone: impl Into<String>,
        button_id: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            phone: phone.into(),
            text: title.into(),
            button_id: Some(button_id.into()),
        }
    }
}

/// An interactive reply button (WhatsApp allows at most three).
#[derive(Debug, Clone)]
pub struct Button {
    pub id: String,
    pub title: String,
}

impl Button {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
        }
    }
}

/// One row of an interactive list message.
#[derive(Debug, Clone)]
pub struct ListRow {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
}

impl ListRow {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Outbound messaging interface. Implemented by the WhatsApp Cloud API
/// client and by an in-memory fake for tests.
#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// Send a plain text message.
    async fn send_text(&self, to: &str, body: &str) -> Result<(), ChannelError>;

    /// Send a message with up to three reply buttons.
    async fn send_buttons(
        &self,
        to: &str,
        body: &str,
        buttons: &[Button],
    ) -> Result<(), ChannelError>;

    /// Send an interactive list message.
    async fn send_list(
        &self,
        to: &str,
        body: &str,
        button_label: &str,
        rows: &[ListRow],
    ) -> Result<(), ChannelError>;

    /// Send a document by public URL (the platform downloads it).
    async fn send_document_link(
        &self,
        to: &str,
        url: &str,
        filename: &str,
        caption: Option<&str>,
    ) -> Result<(), ChannelError>;

    /// Send the structured registration form (WhatsApp Flow).
    ///
    /// Callers fall back to the plain text registration steps when this
    /// fails — an unconfigured or rejected Flow is not fatal.
    async fn send_registration_flow(&self, to: &str, role: Role) -> Result<(), ChannelError>;
}
