use std::collections::HashMap;

use huddle_common::types::Identity;

/// Identities currently typing in a room, keyed by identity id.
#[derive(Debug, Default)]
pub struct TypingSet {
    typing: HashMap<String, Identity>,
}

impl TypingSet {
    /// Returns true on the not-typing -> typing transition.
    pub fn start(&mut self, identity: &Identity) -> bool {
        if self.typing.contains_key(&identity.id) {
            return false;
        }
        self.typing.insert(identity.id.clone(), identity.clone());
        true
    }

    /// Returns true on the typing -> not-typing transition.
    pub fn stop(&mut self, identity_id: &str) -> bool {
        self.typing.remove(identity_id).is_some()
    }

    pub fn contains(&self, identity_id: &str) -> bool {
        self.typing.contains_key(identity_id)
    }

    /// Typing identities, sorted by id for stable output.
    pub fn identities(&self) -> Vec<Identity> {
        let mut identities: Vec<_> = self.typing.values().cloned().collect();
        identities.sort_by(|left, right| left.id.cmp(&right.id));
        identities
    }
}
