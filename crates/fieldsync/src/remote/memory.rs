//! In-memory remote store with scripted failures.

use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use super::http::CLIENT_REF_FIELD;
use super::{AttachmentUpload, RemoteError, RemoteStore};
use crate::model::{CatalogEntry, FormRecord};

#[derive(Default)]
struct State {
    reachable: bool,
    registrations: Vec<FormRecord>,
    seen_refs: HashSet<String>,
    uploads: Vec<(String, Vec<u8>)>,
    catalog: Vec<CatalogEntry>,
    insert_failures: VecDeque<RemoteError>,
    failing_insert_calls: Vec<(usize, RemoteError)>,
    upload_failures: VecDeque<RemoteError>,
    rejected_values: Vec<(String, String)>,
    drop_next_ack: bool,
    insert_calls: usize,
    response_delay: Option<Duration>,
}

/// A remote store held in memory.
///
/// Inserts are de-duplicated on `client_ref` like the real endpoint.
/// Failures can be scripted per call or switched on wholesale with
/// [`set_reachable`](Self::set_reachable).
pub struct InMemoryRemote {
    state: Mutex<State>,
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                reachable: true,
                ..State::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic in another test thread must not hide this double's state.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn with_catalog(self, catalog: Vec<CatalogEntry>) -> Self {
        self.set_catalog(catalog);
        self
    }

    pub fn set_catalog(&self, catalog: Vec<CatalogEntry>) {
        self.lock().catalog = catalog;
    }

    /// When unreachable, every call fails with a transport error.
    pub fn set_reachable(&self, reachable: bool) {
        self.lock().reachable = reachable;
    }

    /// The next insert call fails with `error`. Calls queue up in order.
    pub fn fail_next_insert(&self, error: RemoteError) {
        self.lock().insert_failures.push_back(error);
    }

    /// The `call`-th insert call since creation (1-based) fails with `error`.
    pub fn fail_insert_call(&self, call: usize, error: RemoteError) {
        self.lock().failing_insert_calls.push((call, error));
    }

    /// Every call waits `delay` before doing anything. A delay longer than
    /// the caller's timeout stands in for a server that never answers.
    pub fn set_response_delay(&self, delay: Option<Duration>) {
        self.lock().response_delay = delay;
    }

    async fn respond_later(&self) {
        let delay = self.lock().response_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    /// The next upload call fails with `error`.
    pub fn fail_next_upload(&self, error: RemoteError) {
        self.lock().upload_failures.push_back(error);
    }

    /// The next accepted insert is stored, but the caller gets a transport
    /// error as if the connection dropped before the response arrived.
    pub fn drop_next_insert_ack(&self) {
        self.lock().drop_next_ack = true;
    }

    /// Any record whose `field` equals `value` is rejected as invalid.
    pub fn reject_where(&self, field: &str, value: &str) {
        self.lock()
            .rejected_values
            .push((field.to_string(), value.to_string()));
    }

    /// Accepted registrations, in arrival order.
    pub fn registrations(&self) -> Vec<FormRecord> {
        self.lock().registrations.clone()
    }

    /// Uploaded objects as `(object_path, bytes)`.
    pub fn uploads(&self) -> Vec<(String, Vec<u8>)> {
        self.lock().uploads.clone()
    }

    /// Number of insert calls received, including failed and duplicate ones.
    pub fn insert_calls(&self) -> usize {
        self.lock().insert_calls
    }

    /// Public locator for an object path.
    pub fn locator_for(object_path: &str) -> String {
        format!("memory://evidencias/{}", object_path)
    }
}

fn unreachable() -> RemoteError {
    RemoteError::Transport("remote unreachable".to_string())
}

#[async_trait]
impl RemoteStore for InMemoryRemote {
    async fn upload_attachment(&self, upload: AttachmentUpload<'_>) -> Result<String, RemoteError> {
        self.respond_later().await;
        let mut state = self.lock();
        if !state.reachable {
            return Err(unreachable());
        }
        if let Some(error) = state.upload_failures.pop_front() {
            return Err(error);
        }
        state
            .uploads
            .push((upload.object_path.to_string(), upload.attachment.bytes.clone()));
        Ok(Self::locator_for(upload.object_path))
    }

    async fn insert_registration(&self, record: &FormRecord) -> Result<(), RemoteError> {
        self.respond_later().await;
        let mut state = self.lock();
        state.insert_calls += 1;
        if !state.reachable {
            return Err(unreachable());
        }
        if let Some(error) = state.insert_failures.pop_front() {
            return Err(error);
        }
        let call = state.insert_calls;
        if let Some(pos) = state.failing_insert_calls.iter().position(|(n, _)| *n == call) {
            return Err(state.failing_insert_calls.remove(pos).1);
        }
        for (field, value) in &state.rejected_values {
            if record.get_str(field) == Some(value.as_str()) {
                return Err(RemoteError::Rejected {
                    status: 400,
                    message: format!("invalid value for {}", field),
                });
            }
        }

        let duplicate = match record.get_str(CLIENT_REF_FIELD) {
            Some(client_ref) => !state.seen_refs.insert(client_ref.to_string()),
            None => false,
        };
        if !duplicate {
            state.registrations.push(record.clone());
        }

        if std::mem::take(&mut state.drop_next_ack) {
            return Err(RemoteError::Transport(
                "connection dropped before response".to_string(),
            ));
        }
        Ok(())
    }

    async fn fetch_catalog(&self) -> Result<Vec<CatalogEntry>, RemoteError> {
        self.respond_later().await;
        let state = self.lock();
        if !state.reachable {
            return Err(unreachable());
        }
        Ok(state.catalog.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_duplicate_client_ref_is_ignored() {
        let remote = InMemoryRemote::new();
        let record = FormRecord::new().with(CLIENT_REF_FIELD, "r1");
        remote.insert_registration(&record).await.unwrap();
        remote.insert_registration(&record).await.unwrap();

        assert_eq!(remote.registrations().len(), 1);
        assert_eq!(remote.insert_calls(), 2);
    }

    #[tokio::test]
    async fn test_scripted_failures_are_consumed_in_order() {
        let remote = InMemoryRemote::new();
        remote.fail_next_insert(RemoteError::Timeout(std::time::Duration::from_secs(1)));

        assert!(remote.insert_registration(&FormRecord::new()).await.is_err());
        assert!(remote.insert_registration(&FormRecord::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_dropped_ack_still_stores_record() {
        let remote = InMemoryRemote::new();
        remote.drop_next_insert_ack();
        let record = FormRecord::new().with(CLIENT_REF_FIELD, "r1");

        assert!(remote.insert_registration(&record).await.is_err());
        assert!(remote.insert_registration(&record).await.is_ok());
        assert_eq!(remote.registrations().len(), 1);
    }

    #[tokio::test]
    async fn test_response_delay_outlasts_timeout() {
        let remote = InMemoryRemote::new();
        remote.set_response_delay(Some(Duration::from_secs(30)));

        let result = tokio::time::timeout(
            Duration::from_millis(20),
            remote.insert_registration(&FormRecord::new()),
        )
        .await;

        assert!(result.is_err());
        assert!(remote.registrations().is_empty());
        assert_eq!(remote.insert_calls(), 0);
    }

    #[tokio::test]
    async fn test_unreachable() {
        let remote = InMemoryRemote::new();
        remote.set_reachable(false);
        assert!(remote.fetch_catalog().await.unwrap_err().is_retryable());
    }
}
