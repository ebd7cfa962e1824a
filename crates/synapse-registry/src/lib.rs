//! SYNAPSE Entity Registry
//!
//! Durable, content-addressed registry of framework artifacts: agents,
//! tasks, templates, scripts, modules, checklists, and data files.
//!
//! # Architecture
//!
//! 1. **Content-addressed records**: every entity stores the SHA-256 of its
//!    file bytes; change detection and integrity checks hang off that hash.
//! 2. **Single writer**: all mutation flows through the updater under a
//!    cross-process advisory lock beside the registry file. Readers take
//!    consistent in-memory snapshots.
//! 3. **Derived reverse index**: `usedBy` is rebuilt from `dependencies`
//!    after every batch, never edited in place.
//! 4. **Bounded self-healing**: the healer fixes what is provably safe and
//!    routes the rest to humans, always under a pre-heal backup.
//!
//! # Example
//!
//! ```rust,ignore
//! use synapse_registry::{Change, ChangeAction, Registry, RegistryConfig, RegistryUpdater};
//! use std::sync::Arc;
//!
//! let registry = Arc::new(Registry::new(RegistryConfig::new("/repo")));
//! let updater = RegistryUpdater::new(Arc::clone(&registry));
//! updater
//!     .process_changes(vec![Change::new(ChangeAction::Add, "/repo/tasks/parse-yaml.md")])
//!     .await?;
//!
//! let hits = registry.query_by_keywords(&["yaml"]);
//! ```

pub mod analysis;
pub mod audit;
pub mod config;
pub mod content_hash;
pub mod entity;
pub mod error;
pub mod healer;
pub mod store;
pub mod updater;
pub mod watcher;

// Re-exports for convenience
pub use audit::{AuditRecord, JsonlLog, LogFilter};
pub use config::RegistryConfig;
pub use content_hash::ContentHash;
pub use entity::{
    Adaptability, Category, CategoryDescriptor, CreateJustification, Entity, RegistryDocument,
    RegistryMetadata, Relationships,
};
pub use error::{RegistryError, Result};
pub use healer::{
    HealOptions, HealOutcome, HealRule, HealthIssue, HealthReport, HealthSummary,
    ManualFixWarning, NotificationSink, RegistryHealer, Severity,
};
pub use store::Registry;
pub use updater::{AgentTask, BatchOutcome, Change, ChangeAction, RegistryUpdater};
pub use watcher::RegistryWatcher;
