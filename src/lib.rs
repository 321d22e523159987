//! Refiloe — a WhatsApp fitness coaching assistant.

pub mod analytics;
pub mod channels;
pub mod config;
pub mod error;
pub mod flows;
pub mod ids;
pub mod router;
pub mod server;
pub mod store;
