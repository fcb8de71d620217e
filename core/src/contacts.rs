//! Locally known contacts, used to put a name on incoming calls whose
//! offer carries no display metadata.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::models::{CallPeer, Identity, User};

#[derive(Debug, Default)]
pub struct ContactBook {
    peers: RwLock<HashMap<Identity, CallPeer>>,
}

impl ContactBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores or replaces the entry for `peer.id`.
    pub fn remember(&self, peer: CallPeer) {
        self.peers.write().insert(peer.id.clone(), peer);
    }

    pub fn lookup(&self, id: &Identity) -> Option<CallPeer> {
        self.peers.read().get(id).cloned()
    }

    pub fn import(&self, users: &[User]) {
        let mut peers = self.peers.write();
        for user in users {
            peers.insert(user.user_id.clone(), CallPeer::from(user));
        }
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_falls_back_to_id_for_name() {
        let book = ContactBook::new();
        book.import(&[
            User {
                user_id: Identity::from("alice"),
                display_name: Some("Alice".into()),
                avatar: None,
            },
            User {
                user_id: Identity::from("bob"),
                display_name: None,
                avatar: Some("bob.png".into()),
            },
        ]);

        assert_eq!(book.len(), 2);
        assert_eq!(book.lookup(&Identity::from("alice")).unwrap().name, "Alice");
        let bob = book.lookup(&Identity::from("bob")).unwrap();
        assert_eq!(bob.name, "bob");
        assert_eq!(bob.avatar.as_deref(), Some("bob.png"));
        assert!(book.lookup(&Identity::from("carol")).is_none());
    }

    #[test]
    fn test_remember_replaces() {
        let book = ContactBook::new();
        book.remember(CallPeer::new("alice", "Old"));
        book.remember(CallPeer::new("alice", "New"));

        assert_eq!(book.len(), 1);
        assert_eq!(book.lookup(&Identity::from("alice")).unwrap().name, "New");
    }
}
