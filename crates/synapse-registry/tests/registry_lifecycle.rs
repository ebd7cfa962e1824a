//! End-to-end registry lifecycle: ingestion, healing, and durability.

use std::path::Path;
use std::sync::Arc;
use synapse_registry::{
    Change, ChangeAction, ContentHash, HealOptions, Registry, RegistryConfig, RegistryHealer,
    RegistryUpdater,
};

fn workspace(dir: &Path) -> (Arc<Registry>, Arc<RegistryUpdater>) {
    let config = RegistryConfig::new(dir);
    for root in config.category_roots.values() {
        std::fs::create_dir_all(root).unwrap();
    }
    let registry = Arc::new(Registry::new(config));
    let updater = Arc::new(RegistryUpdater::new(Arc::clone(&registry)));
    (registry, updater)
}

#[tokio::test]
async fn add_modify_delete_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, updater) = workspace(dir.path());

    let path = dir.path().join("tasks/foo.md");
    std::fs::write(&path, "# Validate payloads\nvalidate every payload\n").unwrap();
    updater
        .process_changes(vec![Change::new(ChangeAction::Add, path.clone())])
        .await
        .unwrap();

    let entity = registry.get("foo").unwrap();
    assert!(entity.keywords.contains(&"validate".to_string()));
    let first_checksum = entity.checksum.clone();

    std::fs::write(&path, "# Verify payloads\nverify every payload\n").unwrap();
    updater
        .process_changes(vec![Change::new(ChangeAction::Change, path.clone())])
        .await
        .unwrap();

    let entity = registry.get("foo").unwrap();
    assert!(entity.keywords.contains(&"verify".to_string()));
    assert_ne!(entity.checksum, first_checksum);

    std::fs::remove_file(&path).unwrap();
    updater
        .process_changes(vec![Change::new(ChangeAction::Unlink, path)])
        .await
        .unwrap();

    assert!(registry.get("foo").is_none());
    let snapshot = registry.snapshot();
    assert!(snapshot
        .all_entities()
        .all(|e| !e.used_by.iter().any(|id| id == "foo")));
}

#[tokio::test]
async fn registry_state_survives_process_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let (_registry, updater) = workspace(dir.path());
        let path = dir.path().join("modules/cache-layer.md");
        std::fs::write(&path, "# Cache layer\nshared cache module\n").unwrap();
        updater
            .process_changes(vec![Change::new(ChangeAction::Add, path)])
            .await
            .unwrap();
    }

    // Fresh handles over the same directory see the committed state.
    let registry = Registry::new(RegistryConfig::new(dir.path()));
    assert_eq!(registry.count(), 1);
    let entity = registry.get("cache-layer").unwrap();
    assert_eq!(entity.path, "modules/cache-layer.md");
    assert!(registry.verify_checksum("cache-layer").unwrap());
}

#[tokio::test]
async fn heal_restores_checksum_invariant_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, updater) = workspace(dir.path());

    let path = dir.path().join("scripts/deploy.sh");
    std::fs::write(&path, "#!/bin/sh\necho deploy\n").unwrap();
    updater
        .process_changes(vec![Change::new(ChangeAction::Add, path.clone())])
        .await
        .unwrap();

    // Drift the file behind the registry's back.
    std::fs::write(&path, "#!/bin/sh\necho deploy v2\n").unwrap();
    registry.invalidate();
    assert!(!registry.verify_checksum("deploy").unwrap());

    let healer = RegistryHealer::new(Arc::clone(&registry));
    let report = healer.run_health_check();
    assert_eq!(report.summary.total, 1);

    let outcome = healer
        .heal(&report.issues, HealOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome.healed.len(), 1);
    assert!(outcome.errors.is_empty());

    registry.invalidate();
    assert!(registry.verify_checksum("deploy").unwrap());
    let entity = registry.get("deploy").unwrap();
    assert_eq!(
        entity.checksum,
        ContentHash::from_bytes(b"#!/bin/sh\necho deploy v2\n")
    );
}
