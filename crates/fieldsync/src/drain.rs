//! Reconciliation drainer.
//!
//! Replays pending submissions oldest first. Each item is removed only after
//! the remote store confirmed it, so a drain interrupted at any point can be
//! re-run and continues where it stopped.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::Instrument;

use crate::db::pending_repo;
use crate::db::rejected_repo;
use crate::db::{Database, DatabaseError};
use crate::delivery::{self, Delivery};
use crate::error::DrainError;
use crate::events::{SyncEventBroadcaster, SyncEventKind};
use crate::queue::QueueCounters;
use crate::remote::RemoteStore;

/// Result of one drain run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Items delivered and removed from the pending collection.
    pub drained: usize,
    /// Items the remote refused permanently, moved to the rejected collection.
    pub rejected: usize,
    /// Pending items left when the run ended.
    pub remaining: u64,
    /// The transient failure that ended the run early, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped_on: Option<String>,
    /// Another drain was already running; this one did nothing.
    pub skipped: bool,
}

impl DrainReport {
    pub fn is_complete(&self) -> bool {
        self.remaining == 0
    }
}

/// Replays the pending collection against the remote store.
///
/// Obtained from [`SubmissionQueue::drainer`](crate::queue::SubmissionQueue::drainer)
/// so it shares the queue's locks and pending count.
#[derive(Clone)]
pub struct Drainer {
    db: Database,
    remote: Arc<dyn RemoteStore>,
    pending_lock: Arc<Mutex<()>>,
    drain_lock: Arc<Mutex<()>>,
    counters: QueueCounters,
    events: SyncEventBroadcaster,
    delivery_timeout: Duration,
}

impl Drainer {
    pub(crate) fn new(
        db: Database,
        remote: Arc<dyn RemoteStore>,
        pending_lock: Arc<Mutex<()>>,
        drain_lock: Arc<Mutex<()>>,
        counters: QueueCounters,
        events: SyncEventBroadcaster,
        delivery_timeout: Duration,
    ) -> Self {
        Self {
            db,
            remote,
            pending_lock,
            drain_lock,
            counters,
            events,
            delivery_timeout,
        }
    }

    /// Drains the pending collection.
    ///
    /// Stops at the first transient failure, leaving that item and every later
    /// one queued. A permanent rejection moves the item aside and the run
    /// continues. If a drain is already running this returns at once with
    /// `skipped` set.
    pub async fn drain(&self) -> Result<DrainReport, DrainError> {
        let _drain_guard = match self.drain_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("Drain already in progress, skipping");
                return Ok(DrainReport {
                    remaining: pending_repo::count(&self.db)?,
                    skipped: true,
                    ..DrainReport::default()
                });
            }
        };

        let span = tracing::info_span!("drain");
        self.drain_locked().instrument(span).await
    }

    async fn drain_locked(&self) -> Result<DrainReport, DrainError> {
        let mut report = DrainReport::default();

        loop {
            let _pending_guard = self.pending_lock.lock().await;
            let item = match pending_repo::find_oldest(&self.db) {
                Ok(Some(item)) => item,
                Ok(None) => break,
                // Unreadable rows go aside so the rows behind them still drain.
                Err(DatabaseError::Record { id, source }) => {
                    error!("Pending submission #{} is unreadable, setting it aside: {}", id, source);
                    let reason = format!("Unreadable form record: {}", source);
                    if !rejected_repo::move_from_pending(
                        &self.db,
                        id,
                        &reason,
                        Utc::now().timestamp_millis(),
                    )? {
                        break;
                    }
                    report.rejected += 1;
                    self.counters.refresh_or_log();
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let attempt = delivery::deliver_within(
                self.remote.as_ref(),
                Delivery {
                    submission_ref: &item.submission_ref,
                    fields: &item.fields,
                    captured_at: item.captured_at,
                    attachments: &item.attachments,
                },
                self.delivery_timeout,
            )
            .await;

            match attempt {
                Ok(()) => {
                    pending_repo::delete(&self.db, item.id)?;
                    report.drained += 1;
                    debug!("Drained pending submission #{}", item.id);
                }
                Err(e) if e.is_permanent() => {
                    rejected_repo::move_from_pending(
                        &self.db,
                        item.id,
                        &e.to_string(),
                        Utc::now().timestamp_millis(),
                    )?;
                    report.rejected += 1;
                    warn!("Pending submission #{} rejected by remote store: {}", item.id, e);
                }
                Err(e) => {
                    warn!(
                        "Drain stopped at pending submission #{}: {}",
                        item.id, e
                    );
                    report.stopped_on = Some(e.to_string());
                    break;
                }
            }

            self.counters.refresh_or_log();
        }

        report.remaining = pending_repo::count(&self.db)?;
        self.counters.refresh_or_log();

        info!(
            "Drain finished: {} delivered, {} rejected, {} remaining",
            report.drained, report.rejected, report.remaining
        );
        self.events.send(SyncEventKind::DrainFinished {
            drained: report.drained,
            rejected: report.rejected,
            remaining: report.remaining,
        });

        Ok(report)
    }
}
