//! Session document model.
//!
//! One JSON document per session uuid. Documents keep the snake_case wire
//! form they have always had; a `schema_version` guard makes documents
//! from other schema generations read as absent rather than half-parsed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Current session document schema.
pub const SESSION_SCHEMA_VERSION: u32 = 1;

/// The agent currently driving a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveAgent {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    pub activated_at: DateTime<Utc>,
}

/// Last-known context window facts for bracket computation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_bracket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_tokens_used: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_context_percent: Option<f64>,
}

/// Append-only usage history. Arrays are set-unioned on update, preserving
/// first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionHistory {
    #[serde(default)]
    pub star_commands_used: Vec<String>,
    #[serde(default)]
    pub domains_loaded_last: Vec<String>,
    #[serde(default)]
    pub agents_activated: Vec<String>,
}

/// One session document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub uuid: String,
    pub schema_version: u32,
    pub started: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub cwd: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub prompt_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_agent: Option<ActiveAgent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_workflow: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_squad: Option<String>,
    #[serde(default)]
    pub context: SessionContext,
    #[serde(default)]
    pub overrides: BTreeMap<String, String>,
    #[serde(default)]
    pub history: SessionHistory,
}

impl Session {
    pub fn new(uuid: &str, cwd: &str, label: &str) -> Self {
        let now = Utc::now();
        Self {
            uuid: uuid.to_string(),
            schema_version: SESSION_SCHEMA_VERSION,
            started: now,
            last_activity: now,
            cwd: cwd.to_string(),
            label: label.to_string(),
            title: None,
            prompt_count: 0,
            active_agent: None,
            active_workflow: None,
            active_task: None,
            active_squad: None,
            context: SessionContext::default(),
            overrides: BTreeMap::new(),
            history: SessionHistory::default(),
        }
    }
}

/// A partial update. Merge rules:
///
/// - history arrays: set-union, existing order preserved, new entries
///   appended in their given order;
/// - `overrides`, `context`, `active_agent`: shallow merge field by field;
/// - every other field: replaced when present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_agent: Option<ActiveAgentPatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_workflow: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_squad: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<SessionContextPatch>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub overrides: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<SessionHistory>,
}

/// Shallow patch for the active agent block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActiveAgentPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activated_at: Option<DateTime<Utc>>,
}

/// Shallow patch for the context block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionContextPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_bracket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_tokens_used: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_context_percent: Option<f64>,
}

impl SessionPatch {
    /// Apply the documented merge rules. Callers own the monotone fields
    /// (`prompt_count`, `last_activity`); this only merges content.
    pub fn apply_to(&self, session: &mut Session) {
        if let Some(cwd) = &self.cwd {
            session.cwd = cwd.clone();
        }
        if let Some(label) = &self.label {
            session.label = label.clone();
        }
        if let Some(title) = &self.title {
            session.title = Some(title.clone());
        }
        if let Some(workflow) = &self.active_workflow {
            session.active_workflow = Some(workflow.clone());
        }
        if let Some(task) = &self.active_task {
            session.active_task = Some(task.clone());
        }
        if let Some(squad) = &self.active_squad {
            session.active_squad = Some(squad.clone());
        }

        if let Some(patch) = &self.active_agent {
            let agent = session.active_agent.get_or_insert_with(|| ActiveAgent {
                id: String::new(),
                quality: None,
                activated_at: Utc::now(),
            });
            if let Some(id) = &patch.id {
                agent.id = id.clone();
            }
            if let Some(quality) = &patch.quality {
                agent.quality = Some(quality.clone());
            }
            if let Some(at) = &patch.activated_at {
                agent.activated_at = *at;
            }
        }

        if let Some(patch) = &self.context {
            if let Some(bracket) = &patch.last_bracket {
                session.context.last_bracket = Some(bracket.clone());
            }
            if let Some(tokens) = patch.last_tokens_used {
                session.context.last_tokens_used = Some(tokens);
            }
            if let Some(percent) = patch.last_context_percent {
                session.context.last_context_percent = Some(percent);
            }
        }

        for (key, value) in &self.overrides {
            session.overrides.insert(key.clone(), value.clone());
        }

        if let Some(history) = &self.history {
            union_into(&mut session.history.star_commands_used, &history.star_commands_used);
            union_into(&mut session.history.domains_loaded_last, &history.domains_loaded_last);
            union_into(&mut session.history.agents_activated, &history.agents_activated);
        }
    }
}

fn union_into(existing: &mut Vec<String>, new_entries: &[String]) {
    for entry in new_entries {
        if !existing.iter().any(|e| e == entry) {
            existing.push(entry.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_union_preserves_order() {
        let mut session = Session::new("u", "/repo", "main");
        session.history.star_commands_used = vec!["*agent".to_string(), "*help".to_string()];

        let patch = SessionPatch {
            history: Some(SessionHistory {
                star_commands_used: vec!["*help".to_string(), "*squad".to_string()],
                ..Default::default()
            }),
            ..Default::default()
        };
        patch.apply_to(&mut session);
        assert_eq!(
            session.history.star_commands_used,
            vec!["*agent", "*help", "*squad"]
        );
    }

    #[test]
    fn test_shallow_merge_of_context_and_agent() {
        let mut session = Session::new("u", "/repo", "main");
        session.context.last_bracket = Some("FRESH".to_string());
        session.context.last_tokens_used = Some(100);

        let patch = SessionPatch {
            context: Some(SessionContextPatch {
                last_tokens_used: Some(250),
                ..Default::default()
            }),
            active_agent: Some(ActiveAgentPatch {
                id: Some("dev".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        patch.apply_to(&mut session);

        // Untouched context fields survive; patched ones move.
        assert_eq!(session.context.last_bracket.as_deref(), Some("FRESH"));
        assert_eq!(session.context.last_tokens_used, Some(250));
        assert_eq!(session.active_agent.as_ref().map(|a| a.id.as_str()), Some("dev"));
    }

    #[test]
    fn test_plain_fields_are_replaced() {
        let mut session = Session::new("u", "/repo", "main");
        let patch = SessionPatch {
            label: Some("feature-work".to_string()),
            active_workflow: Some("implement".to_string()),
            ..Default::default()
        };
        patch.apply_to(&mut session);
        assert_eq!(session.label, "feature-work");
        assert_eq!(session.active_workflow.as_deref(), Some("implement"));
    }

    #[test]
    fn test_wire_form_is_snake_case() {
        let session = Session::new("u", "/repo", "main");
        let json = serde_json::to_value(&session).unwrap();
        assert!(json.get("schema_version").is_some());
        assert!(json.get("last_activity").is_some());
        assert!(json.get("prompt_count").is_some());
    }
}
