use std::{
    collections::{HashMap, hash_map::Entry},
    sync::Arc,
};

use tokio::sync::Mutex;
use tracing::debug;

use crate::{
    receiver::MessageReceiver,
    session::{Session, SessionId},
};

/// The set of live sessions of one relay.
///
/// One lock covers membership changes and the whole of every broadcast, so a
/// broadcast always sees a single membership snapshot and two broadcasts
/// never interleave their per-recipient writes. The price is that a slow
/// recipient holds up every other sender, and new sessions wait to register
/// until the stalled broadcast finishes. The accept loop itself keeps running.
#[derive(Debug, Default)]
pub struct Registry {
    sessions: Mutex<HashMap<SessionId, Arc<Session>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `session`. Returns `false` if a session with the same id is
    /// already registered, leaving the existing entry in place.
    pub async fn add(&self, session: Arc<Session>) -> bool {
        let mut sessions = self.sessions.lock().await;
        match sessions.entry(session.id()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(session);
                true
            }
        }
    }

    pub async fn remove(&self, id: SessionId) -> Option<Arc<Session>> {
        let mut sessions = self.sessions.lock().await;
        sessions.remove(&id)
    }

    /// Sends `text` to every registered session except `sender`, then hands it
    /// to `local` when the message came from a session.
    ///
    /// Returns the number of sessions a send was attempted on.
    pub async fn broadcast_except(
        &self,
        sender: Option<SessionId>,
        text: &str,
        local: Option<&dyn MessageReceiver>,
    ) -> usize {
        let sessions = self.sessions.lock().await;

        let mut attempted = 0;
        for (id, session) in sessions.iter() {
            if Some(*id) == sender {
                continue;
            }
            debug!(session = %id, "relaying message: ({text})");
            session.send(text).await;
            attempted += 1;
        }

        if let (Some(_), Some(local)) = (sender, local) {
            local.receive_message(text);
        }

        attempted
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    pub async fn contains(&self, id: SessionId) -> bool {
        self.sessions.lock().await.contains_key(&id)
    }

    /// Registered ids in ascending order.
    pub async fn ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<_> = self.sessions.lock().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
