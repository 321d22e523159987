//! Object storage for CSV exports.
//!
//! Exports are uploaded and then delivered to the user as a
//! document-by-link message; the storage service itself is external.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::error::StorageError;

/// Upload bytes, get back a public URL.
#[async_trait]
pub trait FileStorage: Send + Sync {
    async fn upload(&self, name: &str, bytes: Vec<u8>) -> Result<String, StorageError>;
}

/// Supabase Storage over its REST API.
pub struct SupabaseStorage {
    base_url: String,
    api_key: SecretString,
    bucket: String,
    client: reqwest::Client,
}

impl SupabaseStorage {
    pub fn new(base_url: String, api_key: SecretString, bucket: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            bucket,
            client: reqwest::Client::new(),
        }
    }

    fn object_url(&self, name: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url, self.bucket, name
        )
    }

    fn public_url(&self, name: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, self.bucket, name
        )
    }
}

#[async_trait]
impl FileStorage for SupabaseStorage {
    async fn upload(&self, name: &str, bytes: Vec<u8>) -> Result<String, StorageError> {
        let resp = self
            .client
            .post(self.object_url(name))
            .bearer_auth(self.api_key.expose_secret())
            .header("Content-Type", "text/csv")
            .header("x-upsert", "true")
            .body(bytes)
            .send()
            .await
            .map_err(|e| StorageError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(StorageError::UploadFailed {
                name: name.into(),
                reason: format!("{status}: {body}"),
            });
        }

        Ok(self.public_url(name))
    }
}

/// Stand-in used when no storage backend is configured. Every upload
/// fails, which surfaces to the user as an export failure.
pub struct DisabledStorage;

#[async_trait]
impl FileStorage for DisabledStorage {
    async fn upload(&self, _name: &str, _bytes: Vec<u8>) -> Result<String, StorageError> {
        Err(StorageError::NotConfigured)
    }
}

/// In-memory storage fake for tests: remembers uploads, returns a
/// deterministic URL.
#[derive(Default)]
pub struct FakeStorage {
    uploads: std::sync::Mutex<Vec<(String, Vec<u8>)>>,
}

impl FakeStorage {
    pub fn uploads(&self) -> Vec<(String, Vec<u8>)> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl FileStorage for FakeStorage {
    async fn upload(&self, name: &str, bytes: Vec<u8>) -> Result<String, StorageError> {
        self.uploads
            .lock()
            .unwrap()
            .push((name.to_string(), bytes));
        Ok(format!("https://storage.test/exports/{name}"))
    }
}
