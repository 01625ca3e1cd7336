//! Catalog cache synchronizer.
//!
//! Mirrors the remote course catalog into the local store so the form can
//! offer it offline. A refresh replaces the cache wholesale or not at all.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use log::{info, warn};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::Instrument;

use crate::db::{catalog_repo, Database, DatabaseError};
use crate::error::CatalogError;
use crate::events::{SyncEventBroadcaster, SyncEventKind};
use crate::model::CatalogEntry;
use crate::remote::{RemoteError, RemoteStore};

/// Result of a successful refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub entries: usize,
    pub synced_at: DateTime<Utc>,
}

/// How many suggestions the topic picker shows.
pub const DEFAULT_SUGGESTION_LIMIT: usize = 5;

/// Filter for [`CatalogSynchronizer::search`].
#[derive(Debug, Clone, Copy)]
pub struct CatalogQuery<'a> {
    /// Only entries of this level are considered.
    pub level: &'a str,
    /// Case-insensitive substring of the entry name. Blank matches nothing.
    pub text: &'a str,
    /// Names already picked on the form.
    pub exclude: &'a [String],
    /// Maximum number of suggestions returned.
    pub limit: usize,
}

impl<'a> CatalogQuery<'a> {
    pub fn new(level: &'a str, text: &'a str) -> Self {
        Self {
            level,
            text,
            exclude: &[],
            limit: DEFAULT_SUGGESTION_LIMIT,
        }
    }

    pub fn excluding(mut self, picked: &'a [String]) -> Self {
        self.exclude = picked;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

#[derive(Clone)]
pub struct CatalogSynchronizer {
    db: Database,
    remote: Arc<dyn RemoteStore>,
    events: SyncEventBroadcaster,
    refresh_lock: Arc<Mutex<()>>,
    fetch_timeout: Duration,
}

impl CatalogSynchronizer {
    pub fn new(
        db: Database,
        remote: Arc<dyn RemoteStore>,
        events: SyncEventBroadcaster,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            db,
            remote,
            events,
            refresh_lock: Arc::new(Mutex::new(())),
            fetch_timeout,
        }
    }

    /// Fetches the remote catalog and replaces the local copy.
    ///
    /// On any failure the previous cache is left exactly as it was.
    /// Concurrent refreshes run one after the other.
    pub async fn refresh(&self) -> Result<RefreshReport, CatalogError> {
        let _guard = self.refresh_lock.lock().await;

        let result = self
            .refresh_locked()
            .instrument(tracing::info_span!("catalog_refresh"))
            .await;

        match &result {
            Ok(report) => {
                info!("Catalog cache refreshed with {} entries", report.entries);
                self.events.send(SyncEventKind::CatalogRefreshed {
                    entries: report.entries,
                });
            }
            Err(e) => {
                warn!("Catalog refresh failed, keeping cached copy: {}", e);
                self.events.send(SyncEventKind::CatalogRefreshFailed {
                    message: e.to_string(),
                });
            }
        }
        result
    }

    async fn refresh_locked(&self) -> Result<RefreshReport, CatalogError> {
        let entries = match tokio::time::timeout(self.fetch_timeout, self.remote.fetch_catalog()).await {
            Ok(result) => result?,
            Err(_) => return Err(RemoteError::Timeout(self.fetch_timeout).into()),
        };

        let synced_at = Utc::now();
        catalog_repo::replace_all(&self.db, &entries, synced_at.timestamp_millis())?;

        Ok(RefreshReport {
            entries: entries.len(),
            synced_at,
        })
    }

    /// The cached catalog. Never touches the network.
    pub fn entries(&self) -> Result<Vec<CatalogEntry>, DatabaseError> {
        catalog_repo::list_all(&self.db)
    }

    /// When the cache was last replaced, or `None` if it never was.
    pub fn last_synced_at(&self) -> Result<Option<DateTime<Utc>>, DatabaseError> {
        Ok(catalog_repo::last_synced_at(&self.db)?
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()))
    }

    /// Suggestions for the topic picker, from the cache only.
    pub fn search(&self, query: &CatalogQuery<'_>) -> Result<Vec<CatalogEntry>, DatabaseError> {
        let needle = query.text.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }

        Ok(catalog_repo::list_by_level(&self.db, query.level)?
            .into_iter()
            .filter(|entry| entry.name.to_lowercase().contains(&needle))
            .filter(|entry| !query.exclude.iter().any(|picked| picked == &entry.name))
            .take(query.limit)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::InMemoryRemote;

    fn entry(id: i64, level: &str, name: &str) -> CatalogEntry {
        CatalogEntry {
            id,
            level: level.to_string(),
            name: name.to_string(),
            kind: Some("Diplomado".to_string()),
        }
    }

    fn sample_catalog() -> Vec<CatalogEntry> {
        vec![
            entry(1, "Inicial", "Psicomotricidad"),
            entry(2, "Primaria", "Comprensión Lectora"),
            entry(3, "Primaria", "Matemática Lúdica"),
            entry(4, "Secundaria", "Matemática Avanzada"),
        ]
    }

    fn synchronizer(remote: Arc<InMemoryRemote>) -> CatalogSynchronizer {
        CatalogSynchronizer::new(
            Database::open_in_memory().unwrap(),
            remote,
            SyncEventBroadcaster::default(),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_refresh_replaces_cache() {
        let remote = Arc::new(InMemoryRemote::new().with_catalog(sample_catalog()));
        let sync = synchronizer(remote.clone());
        assert!(sync.last_synced_at().unwrap().is_none());

        let report = sync.refresh().await.unwrap();
        assert_eq!(report.entries, 4);
        assert_eq!(sync.entries().unwrap().len(), 4);
        assert!(sync.last_synced_at().unwrap().is_some());

        remote.set_catalog(vec![entry(9, "Inicial", "Arte")]);
        sync.refresh().await.unwrap();
        let entries = sync.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, 9);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_cache() {
        let remote = Arc::new(InMemoryRemote::new().with_catalog(sample_catalog()));
        let sync = synchronizer(remote.clone());
        sync.refresh().await.unwrap();
        let before = sync.entries().unwrap();
        let synced_before = sync.last_synced_at().unwrap();

        remote.set_reachable(false);
        let err = sync.refresh().await.unwrap_err();

        assert!(matches!(err, CatalogError::Remote(_)));
        assert_eq!(sync.entries().unwrap(), before);
        assert_eq!(sync.last_synced_at().unwrap(), synced_before);
    }

    #[tokio::test]
    async fn test_empty_catalog_still_counts_as_synced() {
        let remote = Arc::new(InMemoryRemote::new());
        let sync = synchronizer(remote);

        let report = sync.refresh().await.unwrap();

        assert_eq!(report.entries, 0);
        assert!(sync.entries().unwrap().is_empty());
        assert_eq!(
            sync.last_synced_at().unwrap().map(|t| t.timestamp_millis()),
            Some(report.synced_at.timestamp_millis())
        );
    }

    #[tokio::test]
    async fn test_refresh_is_idempotent() {
        let remote = Arc::new(InMemoryRemote::new().with_catalog(sample_catalog()));
        let sync = synchronizer(remote);

        sync.refresh().await.unwrap();
        let first = sync.entries().unwrap();
        sync.refresh().await.unwrap();

        assert_eq!(sync.entries().unwrap(), first);
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_serialize() {
        let remote = Arc::new(InMemoryRemote::new().with_catalog(sample_catalog()));
        let sync = synchronizer(remote);

        let (a, b) = tokio::join!(sync.refresh(), sync.refresh());
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(sync.entries().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_search() {
        let remote = Arc::new(InMemoryRemote::new().with_catalog(sample_catalog()));
        let sync = synchronizer(remote.clone());
        sync.refresh().await.unwrap();
        remote.set_reachable(false);

        let names = |level: &str, text: &str, exclude: &[String]| -> Vec<String> {
            sync.search(&CatalogQuery::new(level, text).excluding(exclude))
                .unwrap()
                .into_iter()
                .map(|e| e.name)
                .collect()
        };

        assert_eq!(names("Primaria", "MATEM", &[]), vec!["Matemática Lúdica"]);
        assert_eq!(
            names("Primaria", "a", &[]),
            vec!["Comprensión Lectora", "Matemática Lúdica"]
        );
        assert_eq!(
            names("Primaria", "a", &["Matemática Lúdica".to_string()]),
            vec!["Comprensión Lectora"]
        );
        assert!(names("Primaria", "   ", &[]).is_empty());
        assert!(names("Inicial", "matem", &[]).is_empty());
    }

    #[tokio::test]
    async fn test_search_caps_suggestions() {
        let many: Vec<_> = (1..=8)
            .map(|i| entry(i, "Secundaria", &format!("Taller {}", i)))
            .collect();
        let sync = synchronizer(Arc::new(InMemoryRemote::new().with_catalog(many)));
        sync.refresh().await.unwrap();

        let hits = sync.search(&CatalogQuery::new("Secundaria", "taller")).unwrap();
        assert_eq!(hits.len(), DEFAULT_SUGGESTION_LIMIT);
        assert_eq!(hits[0].name, "Taller 1");

        let hits = sync
            .search(&CatalogQuery::new("Secundaria", "taller").with_limit(2))
            .unwrap();
        assert_eq!(hits.len(), 2);
    }
}
