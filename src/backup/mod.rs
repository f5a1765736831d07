//! Backup creation: component export, artifact layout and bundling.

pub mod artifacts;
pub mod compression;
mod orchestrator;
pub mod types;

pub use artifacts::{compute_checksum, generate_backup_id, validate_backup_id, CollectionManifest};
pub use orchestrator::BackupOrchestrator;
pub use types::{
    BackupFilter, BackupMetadata, BackupOptions, BackupRecord, BackupStatus, BackupType, Component,
};
