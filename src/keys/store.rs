//! Ordered in-memory key store.

use tracing::trace;

use super::{Key, KeyRequirements};
use crate::config::KEY_STORE_INITIAL_CAPACITY;

/// An insertion-ordered collection of owned keys.
///
/// The backing vector starts at a small fixed capacity and doubles as it
/// grows, so appends stay amortised O(1). Lookup is a linear scan in
/// insertion order; the first match wins and is handed out as a deep copy,
/// so callers can mutate their result without touching the store.
pub struct KeyStore {
    keys: Vec<Key>,
}

impl Default for KeyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self { keys: Vec::with_capacity(KEY_STORE_INITIAL_CAPACITY) }
    }

    /// Appends a key; the store becomes its owner.
    pub fn add(&mut self, key: Key) {
        self.keys.push(key);
    }

    /// Returns a duplicate of the first key matching all supplied criteria,
    /// or `None`. Matching follows [`Key::matches`]: name equality when a
    /// name is supplied, algorithm class when demanded, key-type
    /// intersection, and exact bit size when demanded.
    #[must_use]
    pub fn find(&self, name: Option<&str>, requirements: &KeyRequirements) -> Option<Key> {
        let found = self.keys.iter().find(|key| key.matches(name, requirements));
        trace!(name, hit = found.is_some(), "key store lookup");
        found.cloned()
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// True when the store holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// The stored keys, insertion order.
    #[must_use]
    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    /// Borrows the most recently added key.
    #[must_use]
    pub fn last(&self) -> Option<&Key> {
        self.keys.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{KeyAlgorithm, KeyTypeMask};

    fn symmetric(requirement_bits: usize) -> KeyRequirements {
        KeyRequirements {
            algorithm: Some(KeyAlgorithm::Aes),
            key_type: KeyTypeMask::SYMMETRIC,
            bits: requirement_bits,
        }
    }

    #[test]
    fn test_find_respects_insertion_order() {
        let mut store = KeyStore::new();
        store.add(Key::new_symmetric(Some("dup"), vec![1; 16]));
        store.add(Key::new_symmetric(Some("dup"), vec![2; 16]));
        let found = store.find(Some("dup"), &symmetric(128)).unwrap();
        let crate::keys::KeyValue::Symmetric(bytes) = found.value() else {
            panic!("expected symmetric key");
        };
        assert_eq!(bytes.expose(), &[1; 16]);
    }

    #[test]
    fn test_find_requires_exact_size_when_demanded() {
        let mut store = KeyStore::new();
        store.add(Key::new_symmetric(Some("bob"), vec![7; 32]));
        assert!(store.find(Some("bob"), &symmetric(128)).is_none());

        store.add(Key::new_symmetric(Some("bob"), vec![9; 16]));
        let found = store.find(Some("bob"), &symmetric(128)).unwrap();
        assert_eq!(found.bits(), 128);
    }

    #[test]
    fn test_find_returns_duplicate_not_a_handle() {
        let mut store = KeyStore::new();
        store.add(Key::new_symmetric(Some("a"), vec![0; 16]));
        let mut found = store.find(Some("a"), &symmetric(0)).unwrap();
        found.set_name(Some("renamed"));
        assert_eq!(store.keys()[0].name(), Some("a"));
        assert!(store.find(Some("renamed"), &symmetric(0)).is_none());
    }

    #[test]
    fn test_find_without_name() {
        let mut store = KeyStore::new();
        store.add(Key::new_symmetric(None, vec![0; 24]));
        store.add(Key::new_symmetric(Some("named"), vec![0; 16]));
        let found = store.find(None, &symmetric(128)).unwrap();
        assert_eq!(found.name(), Some("named"));
        assert!(store.find(Some("absent"), &symmetric(0)).is_none());
    }

    #[test]
    fn test_growth_keeps_all_keys() {
        let mut store = KeyStore::new();
        for index in 0..100 {
            store.add(Key::new_symmetric(Some(&format!("k{index}")), vec![0; 16]));
        }
        assert_eq!(store.len(), 100);
        assert!(store.find(Some("k99"), &symmetric(128)).is_some());
    }
}
