//! The whole prompt path: session update, pipeline run, formatted output.

use std::path::Path;
use synapse_pipeline::{
    format_synapse_rules, DiagnosticsReporter, FormatArgs, PipelineConfig, PromptPipeline,
};
use synapse_session::{SessionPatch, SessionStore};

fn rules_fixture(dir: &Path) -> PipelineConfig {
    let rules = dir.join("rules");
    std::fs::create_dir_all(rules.join("agents")).unwrap();
    std::fs::write(
        rules.join("constitution.md"),
        "- verify before you trust\n- registry first, new code second\n",
    )
    .unwrap();
    std::fs::write(rules.join("global.md"), "- keep diffs small\n").unwrap();
    std::fs::write(rules.join("agents/dev.md"), "- tests ship with code\n").unwrap();
    PipelineConfig::new(rules, dir.join("metrics"))
}

#[tokio::test]
async fn prompt_path_produces_bounded_rule_block() {
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path().join("sessions"));
    let pipeline = PromptPipeline::new(rules_fixture(dir.path()));

    store.create("session-1", "/repo", "main").unwrap();
    let patch = SessionPatch {
        active_agent: Some(synapse_session::ActiveAgentPatch {
            id: Some("dev".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    };
    let session = store.update("session-1", &patch).unwrap();

    let run = pipeline.run("tighten the parser error messages", Some(&session)).await;
    assert!(run.contributions().count() >= 3);

    let text = format_synapse_rules(&FormatArgs {
        results: &run.outcomes,
        bracket: run.bracket,
        context_percent: run.context_percent,
        session: Some(&session),
        devmode: false,
        metrics: Some(&run),
        budget: Some(500),
        warning: None,
    });

    assert!(text.starts_with("<synapse-rules>"));
    assert!(text.ends_with("</synapse-rules>"));
    assert!(text.contains("## CONSTITUTION"));
    assert!(text.contains("## AGENT"));
    assert!(text.contains("- tests ship with code"));
    assert!(synapse_pipeline::estimate_tokens(&text) <= 500);

    // The run landed in the metrics documents.
    let report = DiagnosticsReporter::new(dir.path().join("metrics")).report();
    assert_eq!(report.runs, 1);
    assert_eq!(report.health, "healthy");
    assert!(report.last_run.is_some());
}

#[tokio::test]
async fn session_updates_walk_sessions_toward_critical() {
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path().join("sessions"));
    let pipeline = PromptPipeline::new(rules_fixture(dir.path()));

    store.create("session-2", "/repo", "main").unwrap();
    let mut last_percent = 101.0;
    let mut brackets = Vec::new();
    for _ in 0..40 {
        let session = store.update("session-2", &SessionPatch::default()).unwrap();
        let run = pipeline.run("next step", Some(&session)).await;
        assert!(run.context_percent <= last_percent);
        last_percent = run.context_percent;
        brackets.push(run.bracket);
    }

    use synapse_pipeline::ContextBracket;
    assert_eq!(brackets.first().copied(), Some(ContextBracket::Fresh));
    assert_eq!(brackets.last().copied(), Some(ContextBracket::Critical));
}
