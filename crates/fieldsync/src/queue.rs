//! Submission queue manager.
//!
//! [`SubmissionQueue::submit`] is the single entry point for a finished
//! registration. It tries the remote store when the monitor reports online
//! and falls back to the local store on any failure. Either way the record
//! ends up in exactly one place.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{error, info, warn};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tracing::Instrument;
use uuid::Uuid;

use crate::connectivity::ConnectivityMonitor;
use crate::db::pending_repo::{self, NewPendingSubmission};
use crate::db::{rejected_repo, Database, DatabaseError};
use crate::delivery::{self, Delivery};
use crate::drain::Drainer;
use crate::error::QueueError;
use crate::events::{SyncEventBroadcaster, SyncEventKind};
use crate::model::{Attachments, FormRecord, PendingId, PendingSubmission, RejectedSubmission};
use crate::remote::RemoteStore;

/// Why a submission went to the local store instead of the remote one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "lowercase")]
pub enum QueueReason {
    /// The monitor reported offline; no network call was made.
    Offline,
    /// The delivery attempt failed in a way that may clear up later.
    Unreachable(String),
    /// The remote store refused the record. It is kept so nothing is lost;
    /// the drainer moves it to the rejected collection if that repeats.
    Rejected(String),
}

impl std::fmt::Display for QueueReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueReason::Offline => f.write_str("offline"),
            QueueReason::Unreachable(message) => write!(f, "unreachable: {}", message),
            QueueReason::Rejected(message) => write!(f, "rejected: {}", message),
        }
    }
}

/// Where a submission ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SubmitOutcome {
    /// Accepted by the remote store. Nothing was stored locally.
    Delivered,
    /// Stored locally for a later drain.
    Queued { id: PendingId, reason: QueueReason },
}

impl SubmitOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, SubmitOutcome::Delivered)
    }
}

/// Keeps the published pending and rejected counts in step with the store.
#[derive(Clone)]
pub(crate) struct QueueCounters {
    db: Database,
    pending: Arc<watch::Sender<u64>>,
    rejected: Arc<watch::Sender<u64>>,
    events: SyncEventBroadcaster,
}

fn publish(sender: &watch::Sender<u64>, value: u64) -> bool {
    sender.send_if_modified(|current| {
        let changed = *current != value;
        *current = value;
        changed
    })
}

impl QueueCounters {
    fn new(db: Database, events: SyncEventBroadcaster) -> Result<Self, DatabaseError> {
        let (pending, _) = watch::channel(pending_repo::count(&db)?);
        let (rejected, _) = watch::channel(rejected_repo::count(&db)?);
        Ok(Self {
            db,
            pending: Arc::new(pending),
            rejected: Arc::new(rejected),
            events,
        })
    }

    /// Recounts both collections and publishes the results.
    pub(crate) fn refresh(&self) -> Result<(), DatabaseError> {
        let pending = pending_repo::count(&self.db)?;
        let rejected = rejected_repo::count(&self.db)?;
        if publish(&self.pending, pending) {
            self.events
                .send(SyncEventKind::PendingCountChanged { pending });
        }
        if publish(&self.rejected, rejected) {
            self.events
                .send(SyncEventKind::RejectedCountChanged { rejected });
        }
        Ok(())
    }

    /// Like [`refresh`](Self::refresh), but a failure is only logged. Used
    /// after a store write has already committed.
    pub(crate) fn refresh_or_log(&self) {
        if let Err(e) = self.refresh() {
            error!("Failed to recount queued submissions: {}", e);
        }
    }
}

struct QueueInner {
    db: Database,
    remote: Arc<dyn RemoteStore>,
    connectivity: ConnectivityMonitor,
    events: SyncEventBroadcaster,
    /// Serializes writes to the pending collection between submit and drain.
    pending_lock: Arc<Mutex<()>>,
    /// Held for the whole of a drain so drains never overlap.
    drain_lock: Arc<Mutex<()>>,
    counters: QueueCounters,
    delivery_timeout: Duration,
}

/// Entry point for finished registrations.
///
/// Cloning is cheap; clones share the store, the remote client and the
/// pending count.
#[derive(Clone)]
pub struct SubmissionQueue {
    inner: Arc<QueueInner>,
}

impl SubmissionQueue {
    pub fn new(
        db: Database,
        remote: Arc<dyn RemoteStore>,
        connectivity: ConnectivityMonitor,
        events: SyncEventBroadcaster,
        delivery_timeout: Duration,
    ) -> Result<Self, DatabaseError> {
        let counters = QueueCounters::new(db.clone(), events.clone())?;
        Ok(Self {
            inner: Arc::new(QueueInner {
                db,
                remote,
                connectivity,
                events,
                pending_lock: Arc::new(Mutex::new(())),
                drain_lock: Arc::new(Mutex::new(())),
                counters,
                delivery_timeout,
            }),
        })
    }

    /// Delivers a registration or queues it locally.
    ///
    /// Runs on its own task: dropping the returned future does not abandon a
    /// submission halfway. An `Err` means the local store failed and the
    /// record was not kept anywhere.
    pub async fn submit(
        &self,
        fields: FormRecord,
        attachments: Attachments,
    ) -> Result<SubmitOutcome, QueueError> {
        let inner = Arc::clone(&self.inner);
        let span = tracing::info_span!(
            "submission",
            attachments = attachments.len(),
            online = inner.connectivity.is_online()
        );
        tokio::spawn(async move { inner.submit(fields, attachments).await }.instrument(span))
            .await
            .map_err(|e| QueueError::TaskFailed(e.to_string()))?
    }

    /// Number of submissions waiting in the local store.
    pub fn pending_count(&self) -> Result<u64, DatabaseError> {
        pending_repo::count(&self.inner.db)
    }

    /// Receiver for the pending count, updated after every enqueue and
    /// every delivered or rejected item during a drain.
    pub fn watch_pending_count(&self) -> watch::Receiver<u64> {
        self.inner.counters.pending.subscribe()
    }

    /// Pending submissions, oldest capture first.
    pub fn pending(&self) -> Result<Vec<PendingSubmission>, DatabaseError> {
        pending_repo::list_in_capture_order(&self.inner.db)
    }

    /// Submissions set aside by a drain, oldest rejection first.
    ///
    /// To correct one, submit the fixed record again and then discard the
    /// rejected copy.
    pub fn rejected(&self) -> Result<Vec<RejectedSubmission>, DatabaseError> {
        rejected_repo::list_all(&self.inner.db)
    }

    pub fn rejected_count(&self) -> Result<u64, DatabaseError> {
        rejected_repo::count(&self.inner.db)
    }

    /// Receiver for the rejected count.
    pub fn watch_rejected_count(&self) -> watch::Receiver<u64> {
        self.inner.counters.rejected.subscribe()
    }

    /// Deletes a rejected submission. Returns `false` if `id` is unknown.
    pub fn discard_rejected(&self, id: i64) -> Result<bool, DatabaseError> {
        let removed = rejected_repo::delete(&self.inner.db, id)?;
        if removed {
            info!("Rejected submission #{} discarded", id);
            self.inner.counters.refresh_or_log();
        }
        Ok(removed)
    }

    /// A drainer sharing this queue's store, remote and locks.
    pub fn drainer(&self) -> Drainer {
        Drainer::new(
            self.inner.db.clone(),
            Arc::clone(&self.inner.remote),
            Arc::clone(&self.inner.pending_lock),
            Arc::clone(&self.inner.drain_lock),
            self.inner.counters.clone(),
            self.inner.events.clone(),
            self.inner.delivery_timeout,
        )
    }
}

impl QueueInner {
    async fn submit(
        &self,
        fields: FormRecord,
        attachments: Attachments,
    ) -> Result<SubmitOutcome, QueueError> {
        let submission_ref = Uuid::new_v4().simple().to_string();
        let captured_at = Utc::now().timestamp_millis();

        let reason = if !self.connectivity.is_online() {
            QueueReason::Offline
        } else {
            let attempt = delivery::deliver_within(
                self.remote.as_ref(),
                Delivery {
                    submission_ref: &submission_ref,
                    fields: &fields,
                    captured_at,
                    attachments: &attachments,
                },
                self.delivery_timeout,
            )
            .await;

            match attempt {
                Ok(()) => {
                    info!("Submission {} delivered", submission_ref);
                    self.events
                        .send(SyncEventKind::SubmissionDelivered { submission_ref });
                    return Ok(SubmitOutcome::Delivered);
                }
                Err(e) if e.is_permanent() => {
                    warn!("Remote store rejected submission {}: {}", submission_ref, e);
                    QueueReason::Rejected(e.to_string())
                }
                Err(e) => {
                    warn!("Delivery of {} failed, queueing: {}", submission_ref, e);
                    QueueReason::Unreachable(e.to_string())
                }
            }
        };

        let id = {
            let _guard = self.pending_lock.lock().await;
            pending_repo::insert(
                &self.db,
                &NewPendingSubmission {
                    submission_ref,
                    fields,
                    captured_at,
                    attachments,
                },
            )?
        };

        info!("Submission queued locally as #{} ({})", id, reason);
        self.counters.refresh_or_log();
        self.events.send(SyncEventKind::SubmissionQueued {
            id,
            reason: reason.to_string(),
        });

        Ok(SubmitOutcome::Queued { id, reason })
    }
}
