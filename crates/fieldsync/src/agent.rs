//! Sync agent: wires the store, the remote client and the connectivity
//! monitor together and reacts to reconnects.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use crate::catalog::{CatalogSynchronizer, RefreshReport};
use crate::config::{self, SyncConfig};
use crate::connectivity::ConnectivityMonitor;
use crate::db::{Database, DatabaseError};
use crate::drain::{DrainReport, Drainer};
use crate::error::{CatalogError, DrainError, QueueError};
use crate::events::{SyncEventBroadcaster, SyncEventKind};
use crate::model::{Attachments, FormRecord, RejectedSubmission};
use crate::queue::{SubmissionQueue, SubmitOutcome};
use crate::registration::{Promoter, RegistrationDraft};
use crate::remote::{HttpRemoteStore, RemoteStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentOptions {
    /// Upper bound for one delivery attempt and one catalog fetch.
    pub delivery_timeout: Duration,
    /// Drain the queue when connectivity returns. The catalog is refreshed
    /// on reconnect either way.
    pub drain_on_reconnect: bool,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            delivery_timeout: Duration::from_secs(45),
            drain_on_reconnect: true,
        }
    }
}

impl From<&SyncConfig> for AgentOptions {
    fn from(config: &SyncConfig) -> Self {
        Self {
            delivery_timeout: config.delivery_timeout(),
            drain_on_reconnect: config.drain_on_reconnect,
        }
    }
}

/// What one sync cycle did.
#[derive(Debug)]
pub struct SyncCycleReport {
    pub catalog: Result<RefreshReport, CatalogError>,
    pub drain: Option<Result<DrainReport, DrainError>>,
}

/// Owns the queue, drainer and catalog synchronizer for one device.
///
/// Cloning is cheap; clones drive the same components.
#[derive(Clone)]
pub struct SyncAgent {
    connectivity: ConnectivityMonitor,
    queue: SubmissionQueue,
    drainer: Drainer,
    catalog: CatalogSynchronizer,
    events: SyncEventBroadcaster,
    options: AgentOptions,
    trigger: broadcast::Sender<()>,
    shutdown: Arc<AtomicBool>,
}

impl SyncAgent {
    /// Opens the local store and the HTTP remote described by `config`.
    pub fn open(config: &SyncConfig, connectivity: ConnectivityMonitor) -> crate::error::Result<Self> {
        config::validate_config(config)?;
        let db = Database::open(&config.resolve_database_path()?)?;
        let api_key = config.remote.resolve_api_key()?;
        let remote = HttpRemoteStore::new(&config.remote, api_key)?;

        Ok(Self::new(
            db,
            Arc::new(remote),
            connectivity,
            AgentOptions::from(config),
        )?)
    }

    pub fn new(
        db: Database,
        remote: Arc<dyn RemoteStore>,
        connectivity: ConnectivityMonitor,
        options: AgentOptions,
    ) -> Result<Self, DatabaseError> {
        let events = SyncEventBroadcaster::default();
        let queue = SubmissionQueue::new(
            db.clone(),
            Arc::clone(&remote),
            connectivity.clone(),
            events.clone(),
            options.delivery_timeout,
        )?;
        let drainer = queue.drainer();
        let catalog = CatalogSynchronizer::new(db, remote, events.clone(), options.delivery_timeout);
        let (trigger, _) = broadcast::channel(16);

        Ok(Self {
            connectivity,
            queue,
            drainer,
            catalog,
            events,
            options,
            trigger,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    pub fn queue(&self) -> &SubmissionQueue {
        &self.queue
    }

    pub fn drainer(&self) -> &Drainer {
        &self.drainer
    }

    pub fn catalog(&self) -> &CatalogSynchronizer {
        &self.catalog
    }

    pub fn events(&self) -> &SyncEventBroadcaster {
        &self.events
    }

    pub async fn submit(
        &self,
        fields: FormRecord,
        attachments: Attachments,
    ) -> Result<SubmitOutcome, QueueError> {
        self.queue.submit(fields, attachments).await
    }

    /// Validates a form draft and submits it.
    pub async fn submit_registration(
        &self,
        draft: RegistrationDraft,
        promoter: &Promoter,
        attachments: Attachments,
    ) -> crate::error::Result<SubmitOutcome> {
        let fields = draft.into_form_record(promoter)?;
        Ok(self.queue.submit(fields, attachments).await?)
    }

    /// Submissions a drain set aside, for the operator to correct or discard.
    pub fn rejected(&self) -> Result<Vec<RejectedSubmission>, DatabaseError> {
        self.queue.rejected()
    }

    pub fn discard_rejected(&self, id: i64) -> Result<bool, DatabaseError> {
        self.queue.discard_rejected(id)
    }

    /// Refreshes the catalog, then drains the queue.
    pub async fn sync_now(&self) -> SyncCycleReport {
        self.run_cycle(true).await
    }

    async fn run_cycle(&self, drain: bool) -> SyncCycleReport {
        let catalog = self.catalog.refresh().await;
        let drain = if drain {
            let result = self.drainer.drain().await;
            if let Err(e) = &result {
                log::error!("Drain aborted by local store failure: {}", e);
            }
            Some(result)
        } else {
            None
        };
        SyncCycleReport { catalog, drain }
    }

    /// Asks the running agent for a sync cycle. Returns `false` if the agent
    /// has not been started.
    pub fn trigger_sync(&self) -> bool {
        self.trigger.send(()).is_ok()
    }

    /// Starts the background task.
    ///
    /// Runs one cycle right away if the device is online, then one on every
    /// transition to online and on every manual trigger.
    pub fn start(&self) -> JoinHandle<()> {
        let agent = self.clone();
        let mut trigger_rx = self.trigger.subscribe();
        let mut network_rx = self.connectivity.subscribe();

        tokio::spawn(async move {
            let mut last = *network_rx.borrow_and_update();
            if last.is_online() {
                agent.run_cycle(true).await;
            } else {
                log::info!("Starting offline; submissions will be queued locally");
            }

            loop {
                if agent.shutdown.load(Ordering::Acquire) {
                    break;
                }

                tokio::select! {
                    changed = network_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let state = *network_rx.borrow_and_update();
                        if state == last {
                            continue;
                        }
                        last = state;
                        agent.events.send(SyncEventKind::ConnectivityChanged { state });

                        if agent.shutdown.load(Ordering::Acquire) {
                            break;
                        }
                        if state.is_online() {
                            log::info!("Back online, syncing");
                            agent.run_cycle(agent.options.drain_on_reconnect).await;
                        } else {
                            log::info!("Went offline; submissions will be queued locally");
                        }
                    }
                    msg = trigger_rx.recv() => match msg {
                        Ok(()) | Err(RecvError::Lagged(_)) => {
                            if agent.shutdown.load(Ordering::Acquire) {
                                break;
                            }
                            log::info!("Manual sync triggered");
                            agent.run_cycle(true).await;
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }

            log::info!("Sync agent stopped");
        })
    }

    /// Signals the background task to stop after its current cycle.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
        // Wake the select loop so it sees the flag.
        let _ = self.trigger.send(());
    }
}
