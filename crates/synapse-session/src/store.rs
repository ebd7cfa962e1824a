//! Session persistence.
//!
//! One JSON document per uuid in the sessions directory. Updates rewrite
//! the document atomically (temp file + rename); every update bumps
//! `prompt_count` and refreshes `last_activity`. Anything unreadable is
//! treated as absent: a corrupt or schema-mismatched session never breaks
//! the prompt path, it just starts over.

use crate::error::{Result, SessionError};
use crate::session::{Session, SessionPatch, SESSION_SCHEMA_VERSION};
use chrono::{Duration as ChronoDuration, Utc};
use std::io::Write;
use std::path::{Path, PathBuf};

/// What `clean_stale` did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanOutcome {
    pub removed: usize,
    pub kept: usize,
    /// Unreadable documents left in place.
    pub skipped: usize,
}

/// Store of per-session JSON documents.
#[derive(Debug, Clone)]
pub struct SessionStore {
    sessions_dir: PathBuf,
    stale_hours: i64,
    max_title_chars: usize,
}

impl SessionStore {
    pub fn new(sessions_dir: impl Into<PathBuf>) -> Self {
        Self {
            sessions_dir: sessions_dir.into(),
            stale_hours: 24,
            max_title_chars: 50,
        }
    }

    pub fn with_stale_hours(mut self, hours: i64) -> Self {
        self.stale_hours = hours;
        self
    }

    pub fn sessions_dir(&self) -> &Path {
        &self.sessions_dir
    }

    /// Create and persist a fresh session document.
    pub fn create(&self, uuid: &str, cwd: &str, label: &str) -> Result<Session> {
        let path = self.session_path(uuid)?;
        self.ensure_dir()?;
        let session = Session::new(uuid, cwd, label);
        self.write_atomic(&path, &session)?;
        Ok(session)
    }

    /// Load a session; missing, malformed, and schema-mismatched documents
    /// all read as `None`.
    pub fn load(&self, uuid: &str) -> Result<Option<Session>> {
        let path = self.session_path(uuid)?;
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(parse_session(&bytes, &path))
    }

    /// Merge a patch into a session, bump `prompt_count`, refresh
    /// `last_activity`, and rewrite atomically.
    pub fn update(&self, uuid: &str, patch: &SessionPatch) -> Result<Session> {
        let path = self.session_path(uuid)?;
        let mut session = self
            .load(uuid)?
            .ok_or_else(|| SessionError::NotFound(uuid.to_string()))?;

        patch.apply_to(&mut session);
        session.prompt_count += 1;
        session.last_activity = Utc::now();

        self.write_atomic(&path, &session)?;
        Ok(session)
    }

    /// Remove a session document. Returns whether one existed.
    pub fn delete(&self, uuid: &str) -> Result<bool> {
        let path = self.session_path(uuid)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete sessions idle past the cutoff. Corrupt documents are
    /// tolerated and skipped.
    pub fn clean_stale(&self, max_age_hours: Option<i64>) -> Result<CleanOutcome> {
        let cutoff = Utc::now() - ChronoDuration::hours(max_age_hours.unwrap_or(self.stale_hours));
        let mut outcome = CleanOutcome::default();

        let read_dir = match std::fs::read_dir(&self.sessions_dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(outcome),
            Err(e) => return Err(e.into()),
        };

        for entry in read_dir.filter_map(|entry| entry.ok()) {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(bytes) = std::fs::read(&path) else {
                outcome.skipped += 1;
                continue;
            };
            match parse_session(&bytes, &path) {
                Some(session) if session.last_activity < cutoff => {
                    match std::fs::remove_file(&path) {
                        Ok(()) => outcome.removed += 1,
                        Err(e) => {
                            tracing::warn!(path = %path.display(), error = %e, "failed to evict stale session");
                            outcome.skipped += 1;
                        }
                    }
                }
                Some(_) => outcome.kept += 1,
                None => outcome.skipped += 1,
            }
        }
        Ok(outcome)
    }

    /// Derive a short display title from the first prompt.
    ///
    /// Star-commands, single words, and near-empty prompts yield nothing;
    /// otherwise the first `max_title_chars` characters, cut back to a
    /// word boundary.
    pub fn generate_title(&self, prompt: &str) -> Option<String> {
        let prompt = prompt.trim();
        if prompt.starts_with('*') || prompt.chars().count() < 3 {
            return None;
        }
        if !prompt.contains(char::is_whitespace) {
            return None;
        }

        if prompt.chars().count() <= self.max_title_chars {
            return Some(prompt.to_string());
        }

        let head: String = prompt.chars().take(self.max_title_chars).collect();
        let cut = head
            .rfind(char::is_whitespace)
            .map(|at| head[..at].to_string())
            .unwrap_or(head);
        Some(cut.trim_end().to_string())
    }

    /// Traversal-safe path for a session id.
    fn session_path(&self, uuid: &str) -> Result<PathBuf> {
        let safe = !uuid.is_empty()
            && uuid
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            && !uuid.contains("..");
        if !safe {
            return Err(SessionError::PathTraversal(uuid.to_string()));
        }
        let path = self.sessions_dir.join(format!("{uuid}.json"));
        if !path.starts_with(&self.sessions_dir) {
            return Err(SessionError::PathTraversal(uuid.to_string()));
        }
        Ok(path)
    }

    /// Create the sessions directory and drop a `.gitignore` in it so
    /// session documents never end up in version control.
    fn ensure_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.sessions_dir)?;
        let gitignore = self.sessions_dir.join(".gitignore");
        if !gitignore.exists() {
            std::fs::write(&gitignore, "*\n")?;
        }
        Ok(())
    }

    fn write_atomic(&self, path: &Path, session: &Session) -> Result<()> {
        let data = serde_json::to_vec_pretty(session)?;
        let temp_name = format!(
            ".{}.{}.tmp",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("session"),
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
        Ok(())
    }
}

fn parse_session(bytes: &[u8], path: &Path) -> Option<Session> {
    let session: Session = match serde_json::from_slice(bytes) {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "session document unreadable, treating as absent");
            return None;
        }
    };
    if session.schema_version != SESSION_SCHEMA_VERSION {
        tracing::warn!(
            path = %path.display(),
            found = session.schema_version,
            expected = SESSION_SCHEMA_VERSION,
            "session schema mismatch, treating as absent"
        );
        return None;
    }
    Some(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionContextPatch, SessionHistory};

    fn store(dir: &Path) -> SessionStore {
        SessionStore::new(dir.join("sessions"))
    }

    #[test]
    fn test_create_load_round_trip_and_gitignore() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let created = store.create("abc-123", "/repo", "main").unwrap();
        let loaded = store.load("abc-123").unwrap().unwrap();
        assert_eq!(created, loaded);
        assert!(store.sessions_dir().join(".gitignore").exists());
    }

    #[test]
    fn test_update_is_monotone() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.create("abc", "/repo", "main").unwrap();

        let before = store.load("abc").unwrap().unwrap();
        let after = store.update("abc", &SessionPatch::default()).unwrap();
        assert_eq!(after.prompt_count, before.prompt_count + 1);
        assert!(after.last_activity >= before.last_activity);

        let third = store.update("abc", &SessionPatch::default()).unwrap();
        assert_eq!(third.prompt_count, 2);
    }

    #[test]
    fn test_update_merges_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.create("abc", "/repo", "main").unwrap();

        let patch = SessionPatch {
            title: Some("parser work".to_string()),
            context: Some(SessionContextPatch {
                last_bracket: Some("MODERATE".to_string()),
                ..Default::default()
            }),
            history: Some(SessionHistory {
                agents_activated: vec!["dev".to_string()],
                ..Default::default()
            }),
            ..Default::default()
        };
        store.update("abc", &patch).unwrap();

        let loaded = store.load("abc").unwrap().unwrap();
        assert_eq!(loaded.title.as_deref(), Some("parser work"));
        assert_eq!(loaded.context.last_bracket.as_deref(), Some("MODERATE"));
        assert_eq!(loaded.history.agents_activated, vec!["dev"]);
    }

    #[test]
    fn test_update_missing_session_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        assert!(matches!(
            store.update("ghost", &SessionPatch::default()),
            Err(SessionError::NotFound(_))
        ));
    }

    #[test]
    fn test_traversal_ids_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        for bad in ["../escape", "a/b", "a\\b", "", "..", "x..y/../z"] {
            assert!(
                matches!(store.load(bad), Err(SessionError::PathTraversal(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_corrupt_and_mismatched_documents_read_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.create("abc", "/repo", "main").unwrap();

        std::fs::write(store.sessions_dir().join("abc.json"), b"{broken").unwrap();
        assert!(store.load("abc").unwrap().is_none());

        let mut session = Session::new("abc", "/repo", "main");
        session.schema_version = 99;
        std::fs::write(
            store.sessions_dir().join("abc.json"),
            serde_json::to_vec(&session).unwrap(),
        )
        .unwrap();
        assert!(store.load("abc").unwrap().is_none());
    }

    #[test]
    fn test_clean_stale_evicts_only_old_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.create("fresh", "/repo", "main").unwrap();

        let mut old = Session::new("old", "/repo", "main");
        old.last_activity = Utc::now() - ChronoDuration::hours(48);
        std::fs::write(
            store.sessions_dir().join("old.json"),
            serde_json::to_vec(&old).unwrap(),
        )
        .unwrap();
        std::fs::write(store.sessions_dir().join("junk.json"), b"not json").unwrap();

        let outcome = store.clean_stale(Some(24)).unwrap();
        assert_eq!(outcome.removed, 1);
        assert_eq!(outcome.kept, 1);
        assert_eq!(outcome.skipped, 1);
        assert!(store.load("fresh").unwrap().is_some());
        assert!(store.load("old").unwrap().is_none());
    }

    #[test]
    fn test_generate_title_rules() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        assert_eq!(store.generate_title("*agent dev"), None);
        assert_eq!(store.generate_title("hi"), None);
        assert_eq!(store.generate_title("singleword"), None);
        assert_eq!(
            store.generate_title("fix the parser"),
            Some("fix the parser".to_string())
        );

        let long = "implement the incremental registry updater with debounce and locking";
        let title = store.generate_title(long).unwrap();
        assert!(title.chars().count() <= 50);
        assert!(long.starts_with(&title));
        // Cut lands on a word boundary, not mid-word.
        assert!(!title.ends_with(char::is_whitespace));
        assert!(long[title.len()..].starts_with(char::is_whitespace));
    }
}
