//! Entity data model for the registry.
//!
//! An entity is any tracked framework artifact: a task, template, script,
//! module, agent, checklist, or data file. Each entity carries a
//! content-addressed checksum, extracted keywords and purpose, and the
//! forward/reverse edges of the usage graph (`dependencies` / `usedBy`).
//!
//! The reverse index (`usedBy`) is derived, never authoritative: after any
//! mutation batch the updater rebuilds it from scratch out of every entity's
//! `dependencies`.

use crate::content_hash::ContentHash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Registry document schema version. Documents with a different major
/// version are treated as absent.
pub const REGISTRY_VERSION: &str = "2.0";

/// Top-level grouping for entities. Serialized lowercase (directory names).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Tasks,
    Templates,
    Scripts,
    Modules,
    Agents,
    Checklists,
    Data,
}

impl Category {
    /// Every category, in canonical order.
    pub const ALL: [Category; 7] = [
        Category::Tasks,
        Category::Templates,
        Category::Scripts,
        Category::Modules,
        Category::Agents,
        Category::Checklists,
        Category::Data,
    ];

    /// The directory name / wire form of this category.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Tasks => "tasks",
            Category::Templates => "templates",
            Category::Scripts => "scripts",
            Category::Modules => "modules",
            Category::Agents => "agents",
            Category::Checklists => "checklists",
            Category::Data => "data",
        }
    }

    /// The singular artifact kind recorded in an entity's `type` field.
    pub fn artifact_type(&self) -> &'static str {
        match self {
            Category::Tasks => "task",
            Category::Templates => "template",
            Category::Scripts => "script",
            Category::Modules => "module",
            Category::Agents => "agent",
            Category::Checklists => "checklist",
            Category::Data => "data",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How safely an entity may be modified: a 0-1 score plus the constraints
/// and extension points that bound an adaptation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Adaptability {
    pub score: f64,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub extension_points: Vec<String>,
}

impl Adaptability {
    pub fn with_score(score: f64) -> Self {
        Self {
            score,
            constraints: Vec::new(),
            extension_points: Vec::new(),
        }
    }
}

/// Record attached to an entity born out of a CREATE decision.
///
/// Field names stay snake_case on the wire; these records are archived
/// verbatim into the registry document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateJustification {
    /// Ids of the top existing patterns that were evaluated and rejected.
    pub evaluated_patterns: Vec<String>,
    /// Per-pattern rejection reasons, `"; "`-joined.
    pub rejection_reasons: BTreeMap<String, String>,
    /// The new capability the entity introduces (trimmed intent).
    pub new_capability: String,
    /// When the CREATE decision is due for promotion review.
    pub review_scheduled: DateTime<Utc>,
}

/// A tracked framework artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    /// Unique across the whole registry, not just its category.
    pub id: String,
    pub category: Category,
    #[serde(rename = "type")]
    pub artifact_type: String,
    /// Repo-relative, forward-slash normalized.
    pub path: String,
    /// At most 200 chars, extracted from the artifact's header.
    pub purpose: String,
    /// At most 15 lowercase tokens, first-seen order.
    pub keywords: Vec<String>,
    /// Entity ids this artifact references. Kept sorted for canonical output.
    pub dependencies: Vec<String>,
    /// Entity ids that reference this artifact. Derived; kept sorted.
    pub used_by: Vec<String>,
    pub adaptability: Adaptability,
    pub checksum: ContentHash,
    pub last_verified: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_justification: Option<CreateJustification>,
}

/// Descriptor for one category in the registry metadata block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryDescriptor {
    pub name: Category,
    pub artifact_type: String,
    /// Repo-relative root directory ingested for this category.
    pub root: String,
}

/// Registry-wide metadata block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryMetadata {
    pub version: String,
    pub last_updated: DateTime<Utc>,
    pub entity_count: usize,
    pub checksum_algorithm: String,
    pub categories: Vec<CategoryDescriptor>,
}

/// Forward and reverse edges for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationships {
    pub used_by: Vec<String>,
    pub dependencies: Vec<String>,
}

/// The canonical persisted document: metadata plus entities nested by
/// category. `BTreeMap` keys give a stable serialization order, so
/// `load ∘ serialize ∘ load` is a fixed point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryDocument {
    pub metadata: RegistryMetadata,
    pub entities: BTreeMap<Category, BTreeMap<String, Entity>>,
    pub categories: Vec<Category>,
}

impl RegistryDocument {
    /// A fresh, empty registry document.
    pub fn empty() -> Self {
        let mut entities = BTreeMap::new();
        for category in Category::ALL {
            entities.insert(category, BTreeMap::new());
        }
        Self {
            metadata: RegistryMetadata {
                version: REGISTRY_VERSION.to_string(),
                last_updated: Utc::now(),
                entity_count: 0,
                checksum_algorithm: "sha256".to_string(),
                categories: Vec::new(),
            },
            entities,
            categories: Category::ALL.to_vec(),
        }
    }

    /// Iterate every entity across all categories.
    pub fn all_entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values().flat_map(|by_id| by_id.values())
    }

    /// Mutable iteration over every entity.
    pub fn all_entities_mut(&mut self) -> impl Iterator<Item = &mut Entity> {
        self.entities
            .values_mut()
            .flat_map(|by_id| by_id.values_mut())
    }

    /// Total number of entities.
    pub fn entity_count(&self) -> usize {
        self.entities.values().map(|by_id| by_id.len()).sum()
    }

    /// Whether any category holds an entity with this id.
    pub fn contains_id(&self, id: &str) -> bool {
        self.entities.values().any(|by_id| by_id.contains_key(id))
    }

    /// Look up an entity by id across all categories.
    pub fn find(&self, id: &str) -> Option<&Entity> {
        self.entities.values().find_map(|by_id| by_id.get(id))
    }

    /// Mutable lookup by id across all categories.
    pub fn find_mut(&mut self, id: &str) -> Option<&mut Entity> {
        self.entities
            .values_mut()
            .find_map(|by_id| by_id.get_mut(id))
    }

    /// Insert an entity under its category. Returns false (and leaves the
    /// document untouched) when the id already exists anywhere.
    pub fn insert(&mut self, entity: Entity) -> bool {
        if self.contains_id(&entity.id) {
            return false;
        }
        self.entities
            .entry(entity.category)
            .or_default()
            .insert(entity.id.clone(), entity);
        true
    }

    /// Remove the entity matching both id and path, if present.
    /// Returns the removed entity.
    pub fn remove_by_id_and_path(&mut self, id: &str, path: &str) -> Option<Entity> {
        for by_id in self.entities.values_mut() {
            let matches = by_id
                .get(id)
                .map(|e| e.path == path)
                .unwrap_or(false);
            if matches {
                return by_id.remove(id);
            }
        }
        None
    }

    /// Rebuild every `usedBy` set from scratch out of `dependencies`.
    ///
    /// Only existing entity ids ever land in a reverse set, so edges to
    /// removed entities vanish here.
    pub fn rebuild_used_by(&mut self) {
        let mut reverse: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for entity in self.all_entities() {
            for dep in &entity.dependencies {
                reverse
                    .entry(dep.clone())
                    .or_default()
                    .push(entity.id.clone());
            }
        }
        for entity in self.all_entities_mut() {
            let mut used_by = reverse.remove(&entity.id).unwrap_or_default();
            used_by.sort();
            used_by.dedup();
            entity.used_by = used_by;
        }
    }

    /// Refresh the metadata block after a mutation batch.
    pub fn touch_metadata(&mut self) {
        self.metadata.entity_count = self.entity_count();
        self.metadata.last_updated = Utc::now();
    }
}
