//! Two-phase restore.
//!
//! A preview inspects the stored artifacts, never the live backends, and
//! always issues a [`RestorePreviewToken`]. An apply presents that token,
//! passes the approval and integrity gates, and imports every backed-up
//! component in a fixed order, aborting on the first failure.

pub mod audit;
mod orchestrator;
pub mod redis_store;
pub mod token;
pub mod validation;

pub use audit::{RestoreAuditEvent, RestoreAuditEventType, RestoreAuditLog};
pub use orchestrator::{
    RestoreMode, RestoreOptions, RestoreOrchestrator, RestorePolicyConfig, RestoreResult, RestoreState,
};
pub use redis_store::{RedisTokenStore, RedisTokenStoreConfig};
pub use token::{
    InMemoryTokenStore, RestorePreviewToken, RestoreTokenStore, TokenLookup, TokenMetadata, TokenStoreError,
};
pub use validation::{ComponentValidation, ValidationStatus};
