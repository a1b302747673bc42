//! File-based session storage.
//!
//! One JSON document per session, replaced atomically on every write:
//! ```text
//! {sessions_dir}/
//!   {session_file_name}.json
//! ```

use super::{apply_assignment, apply_closed, ClosedFilter, SessionStore, StorageError, StorageResult};
use crate::session::{ChatMessage, ClientData, HistoryTurn, Session, SessionStatus};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;
use uuid::Uuid;

/// File-based implementation of `SessionStore`.
///
/// Writes for one session are serialized by the write-behind queue; reads
/// may race them but always observe a complete document thanks to the
/// temp-file-and-rename write.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    sessions_dir: PathBuf,
}

impl FileSessionStore {
    /// The directory is created when the first session is stored.
    pub fn new(sessions_dir: impl Into<PathBuf>) -> Self {
        Self {
            sessions_dir: sessions_dir.into(),
        }
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        self.sessions_dir
            .join(format!("{}.json", file_stem(session_id)))
    }

    async fn load(&self, session_id: &str) -> StorageResult<Option<Session>> {
        let path = self.session_path(session_id);
        let contents = match fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::file_io(&path, e)),
        };

        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|e| StorageError::file_deserialization(&path, e.to_string()))
    }

    async fn save(&self, session: &Session) -> StorageResult<()> {
        fs::create_dir_all(&self.sessions_dir)
            .await
            .map_err(|e| StorageError::file_io(&self.sessions_dir, e))?;

        let final_path = self.session_path(&session.session_id);
        let temp_path = final_path.with_extension("json.tmp");

        let json = serde_json::to_string_pretty(session)
            .map_err(|e| StorageError::serialization(e.to_string()))?;

        fs::write(&temp_path, json.as_bytes())
            .await
            .map_err(|e| StorageError::file_io(&temp_path, e))?;

        fs::rename(&temp_path, &final_path)
            .await
            .map_err(|e| StorageError::file_io(&final_path, e))?;

        Ok(())
    }

    async fn modify(&self, session_id: &str, f: impl FnOnce(&mut Session)) -> StorageResult<()> {
        let mut session = self
            .load(session_id)
            .await?
            .ok_or_else(|| StorageError::not_found(session_id))?;
        f(&mut session);
        self.save(&session).await
    }

    async fn load_all(&self) -> StorageResult<Vec<Session>> {
        let mut entries = match fs::read_dir(&self.sessions_dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::file_io(&self.sessions_dir, e)),
        };

        let mut sessions = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::file_io(&self.sessions_dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let contents = fs::read_to_string(&path)
                .await
                .map_err(|e| StorageError::file_io(&path, e))?;
            match serde_json::from_str::<Session>(&contents) {
                Ok(session) => sessions.push(session),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable session file");
                }
            }
        }

        Ok(sessions)
    }
}

/// Longest stem written as-is; keeps `{stem}.json.tmp` under the usual
/// 255-byte file name limit.
const MAX_STEM_LEN: usize = 200;

/// Session ids come from visitors, so only a safe alphabet is used verbatim.
/// Anything else is hex-encoded behind a `~` prefix, which never appears in
/// a verbatim name. Encodings too long for a file name become `~~` plus a
/// name-based UUID of the id.
fn file_stem(session_id: &str) -> String {
    let safe = !session_id.is_empty()
        && session_id.len() <= 128
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if safe {
        return session_id.to_string();
    }
    let hex: String = session_id.bytes().map(|b| format!("{:02x}", b)).collect();
    if hex.len() < MAX_STEM_LEN {
        return format!("~{}", hex);
    }
    let digest = Uuid::new_v5(&Uuid::NAMESPACE_OID, session_id.as_bytes());
    format!("~~{}", digest.simple())
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn find_or_create(&self, session_id: &str) -> StorageResult<Session> {
        if let Some(session) = self.load(session_id).await? {
            return Ok(session);
        }
        let session = Session::new(session_id);
        self.save(&session).await?;
        Ok(session)
    }

    async fn upsert(&self, session: &Session) -> StorageResult<()> {
        self.save(session).await
    }

    async fn append_message(&self, session_id: &str, message: &ChatMessage) -> StorageResult<()> {
        self.modify(session_id, |s| s.push_message(message.clone()))
            .await
    }

    async fn append_history(&self, session_id: &str, turn: &HistoryTurn) -> StorageResult<()> {
        self.modify(session_id, |s| s.push_turn(turn.clone())).await
    }

    async fn update_profile(
        &self,
        session_id: &str,
        client_data: &ClientData,
    ) -> StorageResult<()> {
        let mut session = self
            .load(session_id)
            .await?
            .unwrap_or_else(|| Session::new(session_id));
        session.submit_profile(client_data.clone());
        self.save(&session).await
    }

    async fn update_assignment(
        &self,
        session_id: &str,
        assigned_to: Option<&str>,
        status: SessionStatus,
    ) -> StorageResult<()> {
        self.modify(session_id, |s| apply_assignment(s, assigned_to, status))
            .await
    }

    async fn mark_closed(&self, session_id: &str) -> StorageResult<()> {
        self.modify(session_id, apply_closed).await
    }

    async fn find_open(&self) -> StorageResult<Vec<Session>> {
        Ok(self
            .load_all()
            .await?
            .into_iter()
            .filter(|s| !s.is_closed())
            .collect())
    }

    async fn find_closed(&self, filter: &ClosedFilter) -> StorageResult<Vec<Session>> {
        Ok(filter.select(self.load_all().await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_stem_escapes_unsafe_ids() {
        assert_eq!(file_stem("session_ab12-x"), "session_ab12-x");
        assert_eq!(file_stem("../etc/passwd"), "~2e2e2f6574632f706173737764");
        assert_eq!(file_stem(""), "~");
    }

    #[test]
    fn test_file_stem_digests_long_ids() {
        let long = format!("visitor.{}", "a".repeat(120));
        let stem = file_stem(&long);
        assert!(stem.starts_with("~~"));
        assert!(stem.len() < MAX_STEM_LEN);
        assert_eq!(stem, file_stem(&long));
        assert_ne!(stem, file_stem(&format!("visitor.{}", "b".repeat(120))));
    }

    #[tokio::test]
    async fn test_long_unsafe_id_is_persisted() {
        let dir = TempDir::new().unwrap();
        let store = FileSessionStore::new(dir.path());
        let long = format!("visitor.{}", "a".repeat(120));

        store.find_or_create(&long).await.unwrap();
        store
            .append_message(&long, &ChatMessage::visitor("still here"))
            .await
            .unwrap();

        let open = store.find_open().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].session_id, long);
        assert_eq!(open[0].messages.len(), 1);
    }

    #[tokio::test]
    async fn test_round_trip_through_disk() {
        let dir = TempDir::new().unwrap();
        let store = FileSessionStore::new(dir.path().join("sessions"));

        let created = store.find_or_create("s1").await.unwrap();
        assert_eq!(created.status, SessionStatus::Active);

        store
            .append_message("s1", &ChatMessage::visitor("hello"))
            .await
            .unwrap();
        store
            .update_assignment("s1", Some("bob"), SessionStatus::InProgress)
            .await
            .unwrap();

        let reopened = FileSessionStore::new(dir.path().join("sessions"));
        let loaded = reopened.find_or_create("s1").await.unwrap();
        assert_eq!(loaded.messages.len(), 1);
        assert_eq!(loaded.messages[0].content, "hello");
        assert_eq!(loaded.assigned_to.as_deref(), Some("bob"));
    }

    #[tokio::test]
    async fn test_missing_dir_lists_nothing() {
        let dir = TempDir::new().unwrap();
        let store = FileSessionStore::new(dir.path().join("absent"));
        assert!(store.find_open().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_closed_sessions_leave_open_list() {
        let dir = TempDir::new().unwrap();
        let store = FileSessionStore::new(dir.path());

        store.find_or_create("a").await.unwrap();
        store.find_or_create("b").await.unwrap();
        store
            .update_assignment("b", Some("bob"), SessionStatus::InProgress)
            .await
            .unwrap();
        store.mark_closed("b").await.unwrap();

        let open = store.find_open().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].session_id, "a");

        let closed = store
            .find_closed(&ClosedFilter {
                assigned_to: None,
                limit: 100,
            })
            .await
            .unwrap();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].session_id, "b");
    }

    #[tokio::test]
    async fn test_unsafe_id_stays_inside_dir() {
        let dir = TempDir::new().unwrap();
        let store = FileSessionStore::new(dir.path().join("sessions"));
        store.find_or_create("../escape").await.unwrap();

        assert!(!dir.path().join("escape.json").exists());
        let open = store.find_open().await.unwrap();
        assert_eq!(open[0].session_id, "../escape");
    }
}
