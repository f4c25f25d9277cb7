//! In-memory checkpoint store

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use tracing::debug;

use stepgraph_kernel::checkpoint::{Checkpoint, CheckpointStore};
use stepgraph_kernel::error::{GraphError, GraphResult};

/// Process-local [`CheckpointStore`] keeping every version of every session.
///
/// Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCheckpointStore {
    sessions: Arc<DashMap<String, Vec<Checkpoint>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of checkpoints stored for a session
    pub fn checkpoint_count(&self, session_id: &str) -> usize {
        self.sessions.get(session_id).map(|v| v.len()).unwrap_or(0)
    }
}

fn stale(session_id: &str, latest: u64, actual: u64) -> GraphError {
    GraphError::StaleVersion {
        session_id: session_id.to_string(),
        expected: latest + 1,
        actual,
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, checkpoint: Checkpoint) -> GraphResult<()> {
        let session_id = checkpoint.session_id.clone();
        let version = checkpoint.version;
        // The entry guard holds the shard lock, so check-and-append is atomic per session
        match self.sessions.entry(session_id.clone()) {
            Entry::Occupied(mut entry) => {
                let latest = entry.get().last().map(|c| c.version).unwrap_or(0);
                if version != latest + 1 {
                    return Err(stale(&session_id, latest, version));
                }
                entry.get_mut().push(checkpoint);
            }
            Entry::Vacant(entry) => {
                if version != 1 {
                    return Err(stale(&session_id, 0, version));
                }
                entry.insert(vec![checkpoint]);
            }
        }
        debug!(session = %session_id, version, "Checkpoint saved");
        Ok(())
    }

    async fn load(&self, session_id: &str) -> GraphResult<Checkpoint> {
        self.sessions
            .get(session_id)
            .and_then(|history| history.last().cloned())
            .ok_or_else(|| GraphError::CheckpointNotFound(format!("session '{}'", session_id)))
    }

    async fn load_version(&self, session_id: &str, version: u64) -> GraphResult<Checkpoint> {
        self.sessions
            .get(session_id)
            .and_then(|history| history.iter().find(|c| c.version == version).cloned())
            .ok_or_else(|| {
                GraphError::CheckpointNotFound(format!(
                    "session '{}' version {}",
                    session_id, version
                ))
            })
    }

    async fn history(&self, session_id: &str) -> GraphResult<Vec<Checkpoint>> {
        Ok(self
            .sessions
            .get(session_id)
            .map(|history| history.iter().rev().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete(&self, session_id: &str) -> GraphResult<bool> {
        Ok(self.sessions.remove(session_id).is_some())
    }

    async fn sessions(&self) -> GraphResult<Vec<String>> {
        let mut ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        Ok(ids)
    }
}
