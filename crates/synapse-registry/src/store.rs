//! Registry store and query surface.
//!
//! The on-disk form is a single pretty-printed JSON document. Loading is
//! forgiving: a missing, malformed, or schema-mismatched file is treated as
//! an empty registry with a warning, never an error. All writes go through
//! the updater or healer; the store only ever reads and snapshots.

use crate::config::RegistryConfig;
use crate::entity::{
    Category, Entity, RegistryDocument, RegistryMetadata, Relationships, REGISTRY_VERSION,
};
use crate::error::Result;
use crate::ContentHash;
use parking_lot::RwLock;
use std::path::Path;

/// Read a registry document from disk.
///
/// Missing file, corrupt JSON, and version mismatches all yield an empty
/// document; only the latter two warn.
pub fn read_document(path: &Path) -> RegistryDocument {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return RegistryDocument::empty();
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read registry, starting empty");
            return RegistryDocument::empty();
        }
    };

    let doc: RegistryDocument = match serde_json::from_slice(&bytes) {
        Ok(doc) => doc,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "registry document is corrupt, starting empty");
            return RegistryDocument::empty();
        }
    };

    if !version_compatible(&doc.metadata.version) {
        tracing::warn!(
            path = %path.display(),
            found = %doc.metadata.version,
            expected = REGISTRY_VERSION,
            "registry schema mismatch, treating as absent"
        );
        return RegistryDocument::empty();
    }

    doc
}

/// Major-version prefix check (`"2.0"` accepts `"2.0"`, `"2.0.1"`, ...).
fn version_compatible(found: &str) -> bool {
    let major = |v: &str| v.split('.').next().map(str::to_string);
    major(found) == major(REGISTRY_VERSION)
}

/// Serialize a document and write it atomically: temp file in the same
/// directory, fsync, rename over the target, then best-effort directory
/// fsync. A failure leaves the previous document intact.
pub fn write_document_atomic(path: &Path, doc: &RegistryDocument) -> Result<()> {
    use std::io::Write;

    let data = serde_json::to_vec_pretty(doc)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let temp_name = format!(
        ".{}.{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("registry"),
        uuid::Uuid::new_v4()
    );
    let temp_path = path.with_file_name(&temp_name);

    let mut file = std::fs::File::create(&temp_path)?;
    if let Err(e) = file.write_all(&data).and_then(|_| file.sync_all()) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e.into());
    }
    drop(file);

    if let Err(e) = std::fs::rename(&temp_path, path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e.into());
    }

    #[cfg(unix)]
    {
        if let Some(parent) = path.parent() {
            if let Ok(dir) = std::fs::File::open(parent) {
                let _ = dir.sync_all();
            }
        }
    }

    Ok(())
}

/// In-memory handle over the persisted registry.
///
/// Readers take consistent snapshots; the updater and healer refresh the
/// cached document after each committed mutation.
pub struct Registry {
    config: RegistryConfig,
    doc: RwLock<Option<RegistryDocument>>,
}

impl Registry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            doc: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Load the document if it is not already cached. Idempotent.
    pub fn load(&self) {
        let mut guard = self.doc.write();
        if guard.is_none() {
            *guard = Some(read_document(&self.config.registry_path));
        }
    }

    /// Drop the cache so the next read goes back to disk.
    pub fn invalidate(&self) {
        *self.doc.write() = None;
    }

    /// Replace the cached document (called by the updater after a commit).
    pub(crate) fn replace(&self, doc: RegistryDocument) {
        *self.doc.write() = Some(doc);
    }

    /// A consistent copy of the current document.
    pub fn snapshot(&self) -> RegistryDocument {
        self.load();
        self.doc
            .read()
            .clone()
            .unwrap_or_else(RegistryDocument::empty)
    }

    /// Total entity count.
    pub fn count(&self) -> usize {
        self.snapshot().entity_count()
    }

    /// The registry-wide metadata block.
    pub fn get_metadata(&self) -> RegistryMetadata {
        self.snapshot().metadata
    }

    /// Look up a single entity by id.
    pub fn get(&self, id: &str) -> Option<Entity> {
        self.snapshot().find(id).cloned()
    }

    /// Entities whose keyword set intersects `keywords`, case-insensitive.
    pub fn query_by_keywords(&self, keywords: &[&str]) -> Vec<Entity> {
        let wanted: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();
        self.snapshot()
            .all_entities()
            .filter(|e| e.keywords.iter().any(|k| wanted.iter().any(|w| w == k)))
            .cloned()
            .collect()
    }

    /// Entities of the given artifact type.
    pub fn query_by_type(&self, artifact_type: &str) -> Vec<Entity> {
        self.snapshot()
            .all_entities()
            .filter(|e| e.artifact_type == artifact_type)
            .cloned()
            .collect()
    }

    /// Entities whose path contains the fragment.
    pub fn query_by_path(&self, fragment: &str) -> Vec<Entity> {
        self.snapshot()
            .all_entities()
            .filter(|e| e.path.contains(fragment))
            .cloned()
            .collect()
    }

    /// Entities whose purpose contains the fragment, case-insensitive.
    pub fn query_by_purpose(&self, fragment: &str) -> Vec<Entity> {
        let needle = fragment.to_lowercase();
        self.snapshot()
            .all_entities()
            .filter(|e| e.purpose.to_lowercase().contains(&needle))
            .cloned()
            .collect()
    }

    /// Forward and reverse edges for one entity.
    pub fn get_relationships(&self, id: &str) -> Option<Relationships> {
        self.snapshot().find(id).map(|e| Relationships {
            used_by: e.used_by.clone(),
            dependencies: e.dependencies.clone(),
        })
    }

    /// Recompute the checksum of an entity's file and compare.
    ///
    /// `Ok(false)` with a warning when the file is unreadable; the healer
    /// owns turning that into an actionable issue.
    pub fn verify_checksum(&self, id: &str) -> Result<bool> {
        let snapshot = self.snapshot();
        let entity = snapshot
            .find(id)
            .ok_or_else(|| crate::error::RegistryError::EntityNotFound(id.to_string()))?;
        let abs = self.config.repo_root.join(&entity.path);
        match ContentHash::from_file(&abs) {
            Ok(hash) => Ok(hash == entity.checksum),
            Err(e) => {
                tracing::warn!(id, path = %abs.display(), error = %e, "checksum verification could not read file");
                Ok(false)
            }
        }
    }

    /// All entities by category, for callers that iterate a category at a time.
    pub fn entities_in(&self, category: Category) -> Vec<Entity> {
        self.snapshot()
            .entities
            .get(&category)
            .map(|by_id| by_id.values().cloned().collect())
            .unwrap_or_default()
    }
}
