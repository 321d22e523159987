//! Conversation flows: multi-step tasks driven by inbound messages.

pub mod engine;
pub mod fields;
pub mod habits;
pub mod logging;
pub mod messages;
pub mod profile;
pub mod registration;
pub mod relationships;
pub mod report;
pub mod task;

use std::sync::Arc;

use crate::channels::{FileStorage, MessagingClient};
use crate::flows::messages::MessageBuilder;
use crate::store::Database;

/// Shared dependencies handed to every flow handler.
#[derive(Clone)]
pub struct FlowServices {
    pub db: Arc<dyn Database>,
    pub messaging: Arc<dyn MessagingClient>,
    pub storage: Arc<dyn FileStorage>,
    pub messages: MessageBuilder,
}

impl FlowServices {
    pub fn new(
        db: Arc<dyn Database>,
        messaging: Arc<dyn MessagingClient>,
        storage: Arc<dyn FileStorage>,
    ) -> Self {
        Self {
            db,
            messaging,
            storage,
            messages: MessageBuilder::new(),
        }
    }
}
