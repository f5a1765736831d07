//! # Platform Backup
//!
//! Backup, two-phase restore, integrity verification and retention for a
//! platform whose state lives in several backends: a graph store
//! (FalkorDB), a vector store (Qdrant), a relational store (PostgreSQL) and
//! the platform configuration.
//!
//! ## Quick Start
//!
//! ```rust
//! use platform_backup::backends::{BackendSet, InMemoryComponentBackend};
//! use platform_backup::storage::StorageProviderConfig;
//! use platform_backup::{BackupEngine, BackupOptions, Component, EngineConfig, RestoreOptions};
//! use std::sync::Arc;
//!
//! # async fn example() -> platform_backup::Result<()> {
//! let config = EngineConfig::new()
//!     .with_provider("local", StorageProviderConfig::local("/var/backups/platform"));
//! let backends = BackendSet::new()
//!     .with(Arc::new(InMemoryComponentBackend::new(Component::Config)));
//! let engine = BackupEngine::from_config(&config, backends).await?;
//!
//! let backup = engine.create_backup(BackupOptions::new()).await?;
//!
//! // Preview never touches live data; it issues a token
//! let preview = engine.restore_backup(&backup.id, RestoreOptions::preview()).await?;
//! if let Some(token) = preview.token {
//!     engine.approve_restore(&token, "on-call", Some("planned rollback")).await?;
//!     engine.restore_backup(&backup.id, RestoreOptions::apply(token)).await?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`storage`]: artifact storage providers, factory and registry
//! - [`backends`]: the component backends being backed up
//! - [`backup`]: backup orchestration, artifact layout and bundles
//! - [`restore`]: preview, tokens, approval and apply
//! - [`integrity`]: checksum and artifact verification
//! - [`retention`]: age / count / size retention
//! - [`metadata`]: durable backup records

#![warn(rustdoc::missing_crate_level_docs)]

pub mod backends;
pub mod backup;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod integrity;
pub mod metadata;
pub mod metrics;
pub mod restore;
pub mod retention;
pub mod storage;
pub mod telemetry;

pub use backup::{BackupFilter, BackupMetadata, BackupOptions, BackupRecord, BackupStatus, BackupType, Component};
pub use config::{ConfigError, EngineConfig, MetadataStoreConfig, StorageSettings, TokenStoreConfig};
pub use engine::BackupEngine;
pub use error::{BackupError, ErrorCode, Result, Stage};
pub use integrity::IntegrityReport;
pub use restore::{
    RestoreMode, RestoreOptions, RestorePolicyConfig, RestorePreviewToken, RestoreResult, RestoreState,
};
pub use retention::{RetentionPolicyConfig, RetentionReport};
