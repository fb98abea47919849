//! Memoized responses keyed by the exact request bytes.

use std::collections::HashMap;

/// Off by default. Disabling also forgets every entry.
#[derive(Debug, Default)]
pub(crate) struct ResponseCache {
    enabled: bool,
    entries: HashMap<Vec<u8>, Vec<u8>>,
}

impl ResponseCache {
    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
        self.entries.clear();
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn get(&self, request: &[u8]) -> Option<Vec<u8>> {
        if !self.enabled {
            return None;
        }
        self.entries.get(request).cloned()
    }

    /// No-op while disabled.
    pub fn insert(&mut self, request: &[u8], response: &[u8]) {
        if self.enabled {
            self.entries.insert(request.to_vec(), response.to_vec());
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
