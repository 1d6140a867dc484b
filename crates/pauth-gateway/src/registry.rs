//! The pending-pair registry: the one piece of state every connection task
//! shares mutably (spec.md §3, §5).
//!
//! Rather than letting the primary's task reach into the secondary's socket
//! directly — which the source implementation did, and which spec.md §9
//! flags as needing a redesign — each connection task owns an inbox
//! (`mpsc::UnboundedSender<ServerEvent>`) and the registry maps a pairing
//! token to the *secondary's* inbox sender. The primary posts an event; the
//! secondary's own task performs the actual socket write. If the sender is
//! closed (the secondary disconnected), the send fails and the primary
//! reports `ASSOC_FAILURE` — no unsafe cross-task aliasing, no close/send
//! race on a socket neither task can safely share.

use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc::UnboundedSender;

/// A message posted from one connection task into another's inbox.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// The primary confirmed this token's pairing. The secondary's task
    /// adopts `username` into its own session and sends `ACCEPTED` itself.
    PairAccepted { username: String },
}

/// `token -> secondary's inbox sender`, guarded by a single mutex that is
/// never held across an `.await`.
#[derive(Default)]
pub struct PendingPairRegistry {
    inner: Mutex<HashMap<String, UnboundedSender<ServerEvent>>>,
}

impl PendingPairRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the secondary's inbox under its freshly minted token.
    pub fn register(&self, token: String, sender: UnboundedSender<ServerEvent>) {
        self.inner.lock().expect("pending-pair registry mutex poisoned").insert(token, sender);
    }

    /// Remove and return the sender for `token`, if still present. Used by
    /// the primary's confirm path: the entry is consumed exactly once,
    /// whether the send below succeeds or not.
    pub fn take(&self, token: &str) -> Option<UnboundedSender<ServerEvent>> {
        self.inner.lock().expect("pending-pair registry mutex poisoned").remove(token)
    }

    /// Remove an entry without caring whether it was present — used when a
    /// secondary disconnects or its token expires before confirmation.
    pub fn remove(&self, token: &str) {
        self.inner.lock().expect("pending-pair registry mutex poisoned").remove(token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn take_removes_the_entry() {
        let registry = PendingPairRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.register("tok".into(), tx);
        assert!(registry.take("tok").is_some());
        assert!(registry.take("tok").is_none());
    }

    #[test]
    fn remove_is_a_no_op_on_a_missing_key() {
        let registry = PendingPairRegistry::new();
        registry.remove("never-registered");
    }
}
