//! HTTP client for a PostgREST-style relational API with an object storage
//! endpoint (the layout Supabase exposes).

use async_trait::async_trait;
use log::{debug, info};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Response};
use secrecy::{ExposeSecret, SecretString};

use super::{AttachmentUpload, RemoteError, RemoteStore};
use crate::config::RemoteConfig;
use crate::model::{CatalogEntry, FormRecord};
use crate::secrets::SecretError;

/// Conflict target that makes registration inserts idempotent.
pub const CLIENT_REF_FIELD: &str = "client_ref";

/// Remote store reached over HTTP.
pub struct HttpRemoteStore {
    client: Client,
    base_url: String,
    registrations_table: String,
    catalog_table: String,
    bucket: String,
    request_timeout: std::time::Duration,
}

fn create_http_client(config: &RemoteConfig, api_key: &SecretString) -> crate::error::Result<Client> {
    let key = api_key.expose_secret();
    let mut headers = HeaderMap::new();
    let mut apikey = HeaderValue::from_str(key).map_err(|_| SecretError::NotHeaderSafe)?;
    apikey.set_sensitive(true);
    let mut bearer =
        HeaderValue::from_str(&format!("Bearer {}", key)).map_err(|_| SecretError::NotHeaderSafe)?;
    bearer.set_sensitive(true);
    headers.insert("apikey", apikey);
    headers.insert(AUTHORIZATION, bearer);

    Client::builder()
        .default_headers(headers)
        .connect_timeout(config.connect_timeout())
        .timeout(config.request_timeout())
        .build()
        .map_err(|e| RemoteError::Transport(format!("Failed to create HTTP client: {}", e)).into())
}

impl HttpRemoteStore {
    /// Fails with a secret error if the API key cannot be sent as a header.
    pub fn new(config: &RemoteConfig, api_key: SecretString) -> crate::error::Result<Self> {
        Ok(Self {
            client: create_http_client(config, &api_key)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            registrations_table: config.registrations_table.clone(),
            catalog_table: config.catalog_table.clone(),
            bucket: config.attachments_bucket.clone(),
            request_timeout: config.request_timeout(),
        })
    }

    /// Public URL of an object in the attachments bucket.
    pub fn public_url(&self, object_path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, self.bucket, object_path
        )
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn map_send_error(&self, e: reqwest::Error) -> RemoteError {
        if e.is_timeout() {
            RemoteError::Timeout(self.request_timeout)
        } else {
            RemoteError::Transport(e.to_string())
        }
    }

    async fn ensure_success(response: Response) -> Result<Response, RemoteError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(RemoteError::from_status(status.as_u16(), &body))
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn upload_attachment(&self, upload: AttachmentUpload<'_>) -> Result<String, RemoteError> {
        let url = format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url, self.bucket, upload.object_path
        );
        debug!(
            "Uploading {} bytes to {}",
            upload.attachment.bytes.len(),
            upload.object_path
        );

        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, upload.attachment.content_type.as_str())
            .header("x-upsert", "true")
            .body(upload.attachment.bytes.clone())
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        Self::ensure_success(response).await?;

        Ok(self.public_url(upload.object_path))
    }

    async fn insert_registration(&self, record: &FormRecord) -> Result<(), RemoteError> {
        let response = self
            .client
            .post(self.table_url(&self.registrations_table))
            .query(&[("on_conflict", CLIENT_REF_FIELD)])
            .header("Prefer", "resolution=ignore-duplicates,return=minimal")
            .json(&[record])
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        Self::ensure_success(response).await?;
        Ok(())
    }

    async fn fetch_catalog(&self) -> Result<Vec<CatalogEntry>, RemoteError> {
        let response = self
            .client
            .get(self.table_url(&self.catalog_table))
            .query(&[("select", "*")])
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        let response = Self::ensure_success(response).await?;

        let entries: Vec<CatalogEntry> = response.json().await.map_err(|e| {
            RemoteError::InvalidResponse(format!("Failed to parse catalog: {}", e))
        })?;
        info!("Fetched {} catalog entries", entries.len());
        Ok(entries)
    }
}
