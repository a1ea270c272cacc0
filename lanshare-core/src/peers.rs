//! Peer registry: nickname-keyed, first-seen wins, lives for the process.

use std::collections::HashMap;
use std::time::SystemTime;

/// A discovered peer. The nickname is the unique key.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerRecord {
    pub nickname: String,
    pub ip: String,
    pub first_seen: SystemTime,
}

/// Registry of discovered peers. Duplicate nicknames keep the first record
/// (no update) and entries never expire.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: HashMap<String, PeerRecord>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a peer. Returns true when the nickname was new; an existing
    /// record is left untouched.
    pub fn insert(&mut self, nickname: &str, ip: &str) -> bool {
        if self.peers.contains_key(nickname) {
            return false;
        }
        self.peers.insert(
            nickname.to_string(),
            PeerRecord {
                nickname: nickname.to_string(),
                ip: ip.to_string(),
                first_seen: SystemTime::now(),
            },
        );
        true
    }

    pub fn get(&self, nickname: &str) -> Option<&PeerRecord> {
        self.peers.get(nickname)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerRecord> {
        self.peers.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_new_peer() {
        let mut reg = PeerRegistry::new();
        assert!(reg.insert("alice", "10.0.0.2"));
        assert_eq!(reg.get("alice").unwrap().ip, "10.0.0.2");
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn first_seen_wins_on_duplicate() {
        let mut reg = PeerRegistry::new();
        assert!(reg.insert("alice", "10.0.0.2"));
        assert!(!reg.insert("alice", "10.0.0.99"));
        assert_eq!(reg.get("alice").unwrap().ip, "10.0.0.2");
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn distinct_nicknames_coexist() {
        let mut reg = PeerRegistry::new();
        assert!(reg.insert("alice", "10.0.0.2"));
        assert!(reg.insert("bob", "10.0.0.3"));
        assert_eq!(reg.len(), 2);
    }
}
