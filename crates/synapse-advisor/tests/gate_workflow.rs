//! Gates composed over a live decision engine and registry.

use std::sync::Arc;
use synapse_advisor::{
    epic_creation_gate, story_creation_gate, DecisionEngine, GateContext,
};
use synapse_registry::{
    store::write_document_atomic, Adaptability, Category, ContentHash, Entity, Registry,
    RegistryConfig, RegistryDocument,
};

fn entity(id: &str, category: Category, keywords: &[&str], purpose: &str) -> Entity {
    Entity {
        id: id.to_string(),
        category,
        artifact_type: category.artifact_type().to_string(),
        path: format!("{}/{id}.md", category.as_str()),
        purpose: purpose.to_string(),
        keywords: keywords.iter().map(|s| s.to_string()).collect(),
        dependencies: Vec::new(),
        used_by: Vec::new(),
        adaptability: Adaptability::with_score(0.7),
        checksum: ContentHash::from_bytes(id.as_bytes()),
        last_verified: chrono::Utc::now(),
        create_justification: None,
    }
}

fn seeded_engine(dir: &std::path::Path) -> Arc<DecisionEngine> {
    let registry = Arc::new(Registry::new(RegistryConfig::new(dir)));
    let mut doc = RegistryDocument::empty();
    doc.insert(entity(
        "validate-schema",
        Category::Tasks,
        &["validate", "schema", "input"],
        "Validate an input schema",
    ));
    doc.insert(entity(
        "story-template",
        Category::Templates,
        &["story", "template", "acceptance"],
        "Template for story documents with acceptance criteria",
    ));
    doc.touch_metadata();
    write_document_atomic(&registry.config().registry_path, &doc).unwrap();
    Arc::new(DecisionEngine::new(registry))
}

#[tokio::test]
async fn epic_gate_surfaces_reuse_opportunities() {
    let dir = tempfile::tempdir().unwrap();
    let gate = epic_creation_gate(seeded_engine(dir.path()));

    let result = gate
        .verify(&GateContext::with_intent("validate the input schema"))
        .await;

    assert!(result.result.passed);
    assert!(!result.result.opportunities.is_empty());
    assert_eq!(result.result.opportunities[0].entity, "validate-schema");
    assert_eq!(result.circuit_breaker_state, "CLOSED");
    assert_eq!(result.gate_id, "epic-creation");
}

#[tokio::test]
async fn story_gate_merges_task_and_template_matches() {
    let dir = tempfile::tempdir().unwrap();
    let gate = story_creation_gate(seeded_engine(dir.path()));

    let mut ctx = GateContext::with_intent("write a story template");
    ctx.acceptance_criteria = vec![
        "story follows the template".to_string(),
        "acceptance criteria listed".to_string(),
    ];
    let result = gate.verify(&ctx).await;

    assert!(result.result.passed);
    let entities: Vec<&str> = result
        .result
        .opportunities
        .iter()
        .map(|o| o.entity.as_str())
        .collect();
    assert!(entities.contains(&"story-template"));
    // Sorted by relevance descending.
    let relevances: Vec<f64> = result
        .result
        .opportunities
        .iter()
        .map(|o| o.relevance)
        .collect();
    let mut sorted = relevances.clone();
    sorted.sort_by(|a, b| b.partial_cmp(a).unwrap());
    assert_eq!(relevances, sorted);
}
