//! Durable key-value persistence used to mirror flag data between sessions.
use std::{collections::HashMap, sync::Mutex};

use crate::{Error, Result};

/// A string-keyed durable key-value store.
///
/// Values are opaque to the backend. Implementations must be safe to call from multiple threads.
pub trait StorageBackend: Send + Sync {
    /// Read the value stored under `key`. Returns `None` if nothing was stored yet.
    fn get(&self, key: &str) -> Option<String>;

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Implementations should return [`Error::Storage`] if the value could not be persisted.
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// A [`StorageBackend`] that keeps values in memory. Used when no durable storage is configured.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    values: Mutex<HashMap<String, String>>,
}

impl InMemoryStorage {
    /// Create an empty storage.
    pub fn new() -> InMemoryStorage {
        InMemoryStorage::default()
    }
}

impl StorageBackend for InMemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| Error::Storage("storage lock poisoned".to_owned()))?;
        values.insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}
