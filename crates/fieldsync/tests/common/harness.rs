//! Test harness for isolated queue tests.
//!
//! The `TestHarness` owns a temp directory holding the SQLite file, an
//! in-memory remote and a connectivity monitor. `reopen` simulates an app
//! restart against the same file.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use fieldsync::db::pending_repo;
use fieldsync::{
    ConnectivityMonitor, Database, InMemoryRemote, NetworkState, SubmissionQueue,
    SyncEventBroadcaster,
};

pub struct TestHarness {
    temp_dir: TempDir,
    pub db_path: PathBuf,
    pub db: Database,
    pub remote: Arc<InMemoryRemote>,
    pub connectivity: ConnectivityMonitor,
    pub queue: SubmissionQueue,
}

impl TestHarness {
    pub fn new(state: NetworkState) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("data").join("fieldsync.db");
        let remote = Arc::new(InMemoryRemote::new());
        let connectivity = ConnectivityMonitor::new(state);
        let db = Database::open(&db_path).expect("Failed to open database");
        let queue = Self::build_queue(&db, &remote, &connectivity);

        Self {
            temp_dir,
            db_path,
            db,
            remote,
            connectivity,
            queue,
        }
    }

    pub fn offline() -> Self {
        Self::new(NetworkState::Offline)
    }

    pub fn online() -> Self {
        Self::new(NetworkState::Online)
    }

    fn build_queue(
        db: &Database,
        remote: &Arc<InMemoryRemote>,
        connectivity: &ConnectivityMonitor,
    ) -> SubmissionQueue {
        SubmissionQueue::new(
            db.clone(),
            remote.clone(),
            connectivity.clone(),
            SyncEventBroadcaster::default(),
            Duration::from_secs(5),
        )
        .expect("Failed to create queue")
    }

    /// Drops the store handle and opens the same file again.
    pub fn reopen(&mut self) {
        self.db = Database::open(&self.db_path).expect("Failed to reopen database");
        self.queue = Self::build_queue(&self.db, &self.remote, &self.connectivity);
    }

    pub fn pending(&self) -> u64 {
        pending_repo::count(&self.db).expect("Failed to count pending")
    }

    pub fn pending_dnis(&self) -> Vec<String> {
        pending_repo::list_in_capture_order(&self.db)
            .expect("Failed to list pending")
            .into_iter()
            .filter_map(|p| p.fields.get_str("dni").map(str::to_string))
            .collect()
    }

    pub fn delivered_dnis(&self) -> Vec<String> {
        self.remote
            .registrations()
            .iter()
            .filter_map(|r| r.get_str("dni").map(str::to_string))
            .collect()
    }

    pub fn go_online(&self) {
        self.connectivity.report(NetworkState::Online);
    }

    pub fn go_offline(&self) {
        self.connectivity.report(NetworkState::Offline);
    }
}
