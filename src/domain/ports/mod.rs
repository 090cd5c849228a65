mod config_synchronizer;
mod health_probe;
mod process_runner;
mod record_store;
mod snapshot_archive;

pub use config_synchronizer::{ConfigSynchronizer, FileSyncError, PatchReport};
pub use health_probe::HealthProbe;
pub use process_runner::{ProcessError, ProcessRunner};
pub use record_store::{RecordStore, StoreError};
pub use snapshot_archive::{ArchiveError, SnapshotArchive};
