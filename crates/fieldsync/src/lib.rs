pub mod agent;
pub mod catalog;
pub mod config;
pub mod connectivity;
pub mod db;
mod delivery;
pub mod drain;
pub mod error;
pub mod events;
pub mod logging;
pub mod model;
pub mod queue;
pub mod registration;
pub mod remote;
pub mod secrets;

pub use agent::{AgentOptions, SyncAgent, SyncCycleReport};
pub use catalog::{CatalogQuery, CatalogSynchronizer, RefreshReport, DEFAULT_SUGGESTION_LIMIT};
pub use config::{load_config, RemoteConfig, SyncConfig};
pub use connectivity::{ConnectivityMonitor, NetworkState};
pub use db::{Database, DatabaseError};
pub use drain::{DrainReport, Drainer};
pub use error::{CatalogError, ConfigError, DrainError, FieldSyncError, QueueError, Result};
pub use events::{SyncEvent, SyncEventBroadcaster, SyncEventKind};
pub use logging::{init_logging, LogFormat};
pub use model::{
    Attachment, AttachmentKind, Attachments, CatalogEntry, FormRecord, PendingId,
    PendingSubmission, RejectedSubmission,
};
pub use queue::{QueueReason, SubmissionQueue, SubmitOutcome};
pub use registration::{Promoter, RegistrationDraft, ValidationError};
pub use remote::{HttpRemoteStore, InMemoryRemote, RemoteError, RemoteStore};
pub use secrets::{resolve_secret, SecretError};
