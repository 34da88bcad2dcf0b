//! Keyring to perform rPGP operations with.

/// An in-memory keyring.
///
/// Instances are usually constructed just for one crypto operation and
/// are short-lived.
#[derive(Clone, Debug, Default)]
pub struct Keyring<T> {
    keys: Vec<T>,
}

impl<T> Keyring<T> {
    /// New empty keyring.
    pub fn new() -> Keyring<T> {
        Keyring { keys: Vec::new() }
    }

    /// Add a key to the keyring.
    pub fn add(&mut self, key: T) {
        self.keys.push(key);
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// All keys in the keyring.
    pub fn keys(&self) -> &[T] {
        &self.keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{SignedPublicKey, SignedSecretKey};
    use crate::test_utils::alice_keypair;

    #[test]
    fn test_keyring_add_keys() {
        let alice = alice_keypair();
        let mut pub_ring: Keyring<SignedPublicKey> = Keyring::new();
        pub_ring.add(alice.public.clone());
        assert_eq!(pub_ring.keys(), [alice.public]);
        assert_eq!(pub_ring.len(), 1);

        let mut sec_ring: Keyring<SignedSecretKey> = Keyring::new();
        sec_ring.add(alice.secret.clone());
        assert_eq!(sec_ring.keys(), [alice.secret]);
        assert!(!sec_ring.is_empty());
    }
}
