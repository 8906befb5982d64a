//! Symmetric ticket keys and the providers that hold them.

use std::collections::HashMap;
use std::sync::Arc;

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::identity::KeyError;

/// Length of an AES-256 key.
pub const TICKET_KEY_LEN: usize = 32;

/// An AES-256-GCM key with a 4-byte identifier.
///
/// The identifier is the first four bytes of SHA-256 over the key, so it is
/// stable across restarts without storing extra metadata.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct TicketKey {
    #[zeroize(skip)]
    id: u32,
    bytes: [u8; TICKET_KEY_LEN],
}

impl TicketKey {
    /// Generate a fresh random key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; TICKET_KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        let key = Self::from_array(bytes);
        bytes.zeroize();
        key
    }

    /// Load a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::InvalidLength` unless exactly 32 bytes are given.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let array: [u8; TICKET_KEY_LEN] =
            bytes.try_into().map_err(|_| KeyError::InvalidLength {
                expected: TICKET_KEY_LEN,
                actual: bytes.len(),
            })?;
        Ok(Self::from_array(array))
    }

    fn from_array(bytes: [u8; TICKET_KEY_LEN]) -> Self {
        let digest = Sha256::digest(bytes);
        let id = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
        Self { id, bytes }
    }

    /// The key identifier carried in each ticket header.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Raw key bytes, for persistence only.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; TICKET_KEY_LEN] {
        &self.bytes
    }
}

impl std::fmt::Debug for TicketKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TicketKey({:08x})", self.id)
    }
}

/// Source of ticket keys.
///
/// Issuing always uses [`TicketKeyProvider::current`]. Opening looks the key up
/// by the identifier in the ticket header, so a provider that keeps retired
/// keys can rotate without invalidating tickets still inside their window.
pub trait TicketKeyProvider: Send + Sync {
    /// The key new tickets are sealed under.
    fn current(&self) -> Arc<TicketKey>;

    /// Find a key by identifier.
    fn lookup(&self, id: u32) -> Option<Arc<TicketKey>>;
}

/// A provider holding exactly one key.
#[derive(Debug, Clone)]
pub struct StaticKeyProvider {
    key: Arc<TicketKey>,
}

impl StaticKeyProvider {
    #[must_use]
    pub fn new(key: TicketKey) -> Self {
        Self { key: Arc::new(key) }
    }
}

impl TicketKeyProvider for StaticKeyProvider {
    fn current(&self) -> Arc<TicketKey> {
        Arc::clone(&self.key)
    }

    fn lookup(&self, id: u32) -> Option<Arc<TicketKey>> {
        (self.key.id() == id).then(|| Arc::clone(&self.key))
    }
}

/// A current key plus any number of retired keys that may still open tickets.
#[derive(Debug, Clone)]
pub struct KeyRing {
    current: Arc<TicketKey>,
    keys: HashMap<u32, Arc<TicketKey>>,
}

impl KeyRing {
    /// Create a ring whose current key is `current`.
    #[must_use]
    pub fn new(current: TicketKey) -> Self {
        let current = Arc::new(current);
        let mut keys = HashMap::new();
        keys.insert(current.id(), Arc::clone(&current));
        Self { current, keys }
    }

    /// Keep `key` available for opening tickets without issuing under it.
    pub fn retain(&mut self, key: TicketKey) {
        self.keys.entry(key.id()).or_insert_with(|| Arc::new(key));
    }

    /// Make `key` current. The previous current key stays in the ring.
    pub fn rotate(&mut self, key: TicketKey) {
        let key = Arc::new(key);
        self.keys.insert(key.id(), Arc::clone(&key));
        self.current = key;
    }

    /// Number of keys held, including the current one. Never zero.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.keys.len()
    }
}

impl TicketKeyProvider for KeyRing {
    fn current(&self) -> Arc<TicketKey> {
        Arc::clone(&self.current)
    }

    fn lookup(&self, id: u32) -> Option<Arc<TicketKey>> {
        self.keys.get(&id).cloned()
    }
}
