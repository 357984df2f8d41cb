//! Credential Rotation
//!
//! Round-robin over the API keys configured for one provider instance. Each
//! provider owns its rotator; concurrent turns sharing the provider advance
//! the same cursor through a single mutex.

use std::sync::Mutex;

#[derive(Debug)]
pub struct CredentialRotator {
    keys: Vec<String>,
    enabled: bool,
    cursor: Mutex<usize>,
}

impl CredentialRotator {
    pub fn new(keys: Vec<String>, enabled: bool) -> Self {
        let keys = keys
            .into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        Self {
            keys,
            enabled,
            cursor: Mutex::new(0),
        }
    }

    /// A rotator with no keys (local providers).
    pub fn empty() -> Self {
        Self::new(Vec::new(), false)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// The key to use for the next request. With rotation disabled the first
    /// key is always returned.
    pub fn next_key(&self) -> Option<String> {
        if self.keys.is_empty() {
            return None;
        }
        if !self.enabled || self.keys.len() == 1 {
            return self.keys.first().cloned();
        }
        let mut cursor = self.cursor.lock().unwrap_or_else(|e| e.into_inner());
        let key = self.keys[*cursor % self.keys.len()].clone();
        *cursor = (*cursor + 1) % self.keys.len();
        Some(key)
    }
}
