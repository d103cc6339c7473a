//! The node's concrete replication sink.
//!
//! Maps the repository's abstract recipients onto live transports: mirror
//! peers get every `Mirrors` replica, logged-in sessions get the replicas
//! addressed to their key. Files are read eagerly (dispatch may unlink them
//! right after `send` returns) and queued without blocking; a full outbound
//! queue drops the replica with a diagnostic.

use std::{
    collections::HashMap,
    fs,
    path::Path,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use asn_proto::{Pdu, PubEncr};
use asn_repo::{Recipient, Sender};

use crate::transport::Transport;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Sender bound to this node's mirror peers and logged-in sessions.
#[derive(Default)]
pub struct NodeSender {
    mirrors: Mutex<Vec<Arc<Transport>>>,
    sessions: Mutex<HashMap<PubEncr, Arc<Transport>>>,
}

impl NodeSender {
    /// Empty sender; transports register as they come up.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a peer transport to the mirror set.
    pub fn add_mirror(&self, t: Arc<Transport>) {
        lock(&self.mirrors).push(t);
    }

    /// Bind a logged-in session to its identity key.
    pub fn register(&self, key: PubEncr, t: Arc<Transport>) {
        lock(&self.sessions).insert(key, t);
    }

    /// Drop a session binding (logout or connection close).
    pub fn unregister(&self, key: &PubEncr) {
        lock(&self.sessions).remove(key);
    }

    fn targets(&self, to: Recipient) -> Vec<Arc<Transport>> {
        match to {
            Recipient::Mirrors => {
                let mut mirrors = lock(&self.mirrors);
                mirrors.retain(|t| !t.is_closed());
                mirrors.clone()
            },
            Recipient::Key(key) => {
                lock(&self.sessions).get(&key).filter(|t| !t.is_closed()).cloned()
                    .into_iter()
                    .collect()
            },
        }
    }
}

impl Sender for NodeSender {
    fn send(&self, to: Recipient, src: &Path) {
        let bytes = match fs::read(src) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(src = %src.display(), "replica read failed: {e}");
                return;
            },
        };
        for t in self.targets(to) {
            if let Err(e) = t.try_send(Pdu::from_bytes(bytes.clone())) {
                tracing::warn!(peer = %t.peer_name(), "replica dropped: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_key_has_no_targets() {
        let sender = NodeSender::new();
        assert!(sender.targets(Recipient::Key(PubEncr([1; 32]))).is_empty());
        assert!(sender.targets(Recipient::Mirrors).is_empty());
    }

    #[test]
    fn missing_file_is_a_diagnostic() {
        let sender = NodeSender::new();
        // Must not panic or error; the failure is the sink's problem.
        sender.send(Recipient::Mirrors, Path::new("/nonexistent/replica"));
    }
}
