//! Per-session run leases
//!
//! At most one `invoke`/`resume`/`step`/`update_state`/`rollback` may hold a
//! session at a time. A second caller fails fast with `SessionBusy` instead
//! of waiting.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

use stepgraph_kernel::error::{GraphError, GraphResult};

#[derive(Debug, Clone, Default)]
pub struct SessionLeases {
    active: Arc<Mutex<HashSet<String>>>,
}

impl SessionLeases {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take exclusive hold of a session until the returned lease is dropped
    pub fn acquire(&self, session_id: &str) -> GraphResult<SessionLease> {
        let mut active = self.active.lock();
        if !active.insert(session_id.to_string()) {
            return Err(GraphError::SessionBusy(session_id.to_string()));
        }
        Ok(SessionLease {
            session_id: session_id.to_string(),
            active: self.active.clone(),
        })
    }

    pub fn is_held(&self, session_id: &str) -> bool {
        self.active.lock().contains(session_id)
    }
}

/// RAII guard releasing the session on drop
#[derive(Debug)]
pub struct SessionLease {
    session_id: String,
    active: Arc<Mutex<HashSet<String>>>,
}

impl SessionLease {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.active.lock().remove(&self.session_id);
    }
}
