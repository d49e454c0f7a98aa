//! # codetrack-sync
//!
//! Directory-to-object-store sync engine.
//!
//! Build a [`RemoteSync`] over the local store folder and a
//! [`RemoteDestination`], then call [`SyncJob::run_once`] whenever the
//! folder should be pushed. Progress is reported to a [`ProgressListener`],
//! usually an [`UploadStatsListener`].

pub mod destination;
pub mod error;
pub mod filters;
pub mod progress;
pub mod remote_sync;

pub use destination::{
    DirectoryDestination, NoOpDestination, RemoteDestination, SessionMarker, SESSION_START_KEY,
    SESSION_STOP_KEY,
};
pub use error::SyncError;
pub use filters::{Filters, DEFAULT_SUFFIXES};
pub use progress::{ProgressListener, UploadStatsListener};
pub use remote_sync::{RemoteSync, SyncJob, SyncReport, LOCK_SUFFIX};
