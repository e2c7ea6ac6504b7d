//! Versioned, user-partitioned flag data store.
//!
//! [`DataStore`] is the single source of truth for flag data during a session. Every user has its
//! own partition holding a [`FullDataSet`] snapshot. Readers receive the snapshot as an `Arc`, so a
//! bulk replacement ([`DataStore::init`]) is observed either completely or not at all.
//!
//! The configured [`StorageBackend`] is a durable mirror: it is read when a user partition is
//! first loaded ([`DataStore::preload`]) and rewritten after every applied change.
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use serde::{Deserialize, Serialize};

use crate::{FeatureFlag, Result, StorageBackend, User};

/// State of a single flag key inside a user partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum ItemDescriptor {
    /// The key has never been seen.
    Absent,
    /// The flag was deleted at `version`. Writes with a lower or equal version are rejected.
    Tombstone {
        /// Version at which the flag was deleted.
        version: u64,
    },
    /// The flag exists.
    Present {
        /// Version of the stored flag.
        version: u64,
        /// The flag record.
        flag: FeatureFlag,
    },
}

impl ItemDescriptor {
    /// Wrap `flag`, using its own version.
    pub fn present(flag: FeatureFlag) -> ItemDescriptor {
        ItemDescriptor::Present {
            version: flag.version,
            flag,
        }
    }

    /// Deletion marker at `version`.
    pub fn tombstone(version: u64) -> ItemDescriptor {
        ItemDescriptor::Tombstone { version }
    }

    /// Returns the version, or `None` for [`ItemDescriptor::Absent`].
    pub fn version(&self) -> Option<u64> {
        match self {
            ItemDescriptor::Absent => None,
            ItemDescriptor::Tombstone { version } | ItemDescriptor::Present { version, .. } => {
                Some(*version)
            }
        }
    }

    /// Returns the flag if it is present. Absent and deleted flags both read as `None`.
    pub fn flag(&self) -> Option<&FeatureFlag> {
        match self {
            ItemDescriptor::Present { flag, .. } => Some(flag),
            _ => None,
        }
    }

    /// Returns `true` for [`ItemDescriptor::Absent`].
    pub fn is_absent(&self) -> bool {
        matches!(self, ItemDescriptor::Absent)
    }
}

/// Complete flag state of one user at a point in time.
///
/// Never contains [`ItemDescriptor::Absent`] entries: absence is expressed by the key not being in
/// the set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FullDataSet {
    items: HashMap<String, ItemDescriptor>,
}

impl FullDataSet {
    /// Create an empty data set.
    pub fn new() -> FullDataSet {
        FullDataSet::default()
    }

    /// Decode a server payload: a JSON object mapping flag keys to flag records.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedPayload`](crate::Error::MalformedPayload) if any part of the
    /// payload cannot be decoded. Partially valid payloads are rejected as a whole.
    pub fn from_payload(payload: &str) -> Result<FullDataSet> {
        let flags: HashMap<String, FeatureFlag> = serde_json::from_str(payload)?;
        Ok(FullDataSet::from_flags(flags))
    }

    /// Build a data set where every flag is present.
    pub fn from_flags(flags: impl IntoIterator<Item = (String, FeatureFlag)>) -> FullDataSet {
        flags
            .into_iter()
            .map(|(key, flag)| (key, ItemDescriptor::present(flag)))
            .collect()
    }

    /// Insert an item, replacing the previous one. Absent items are ignored.
    pub fn insert(&mut self, key: impl Into<String>, item: ItemDescriptor) {
        if !item.is_absent() {
            self.items.insert(key.into(), item);
        }
    }

    /// Look up the item stored under `key`.
    pub fn get(&self, key: &str) -> Option<&ItemDescriptor> {
        self.items.get(key)
    }

    /// Iterate over all items, tombstones included.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ItemDescriptor)> {
        self.items.iter()
    }

    /// Iterate over present flags only.
    pub fn flags(&self) -> impl Iterator<Item = (&String, &FeatureFlag)> {
        self.items
            .iter()
            .filter_map(|(key, item)| item.flag().map(|flag| (key, flag)))
    }

    /// Number of items, tombstones included.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if there are no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl FromIterator<(String, ItemDescriptor)> for FullDataSet {
    fn from_iter<I: IntoIterator<Item = (String, ItemDescriptor)>>(iter: I) -> Self {
        let mut data = FullDataSet::new();
        for (key, item) in iter {
            data.insert(key, item);
        }
        data
    }
}

/// `DataStore` holds versioned flag data for every user loaded during the session.
///
/// Readers (flag evaluation) and writers (the update processor) may use the store concurrently
/// from any thread.
pub struct DataStore {
    partitions: RwLock<HashMap<String, Arc<FullDataSet>>>,
    /// Serializes writers so the backend mirror receives snapshots in the same order they were
    /// applied in memory. Readers never take it.
    write_lock: Mutex<()>,
    /// `None` once the store is disposed.
    backend: RwLock<Option<Arc<dyn StorageBackend>>>,
}

impl DataStore {
    /// Create a store mirroring its data to `backend`.
    pub fn new(backend: Arc<dyn StorageBackend>) -> DataStore {
        DataStore {
            partitions: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(()),
            backend: RwLock::new(Some(backend)),
        }
    }

    /// Load persisted data for `user` if its partition has not been loaded yet.
    ///
    /// A user without persisted data (or with unreadable data) starts with an empty data set.
    pub fn preload(&self, user: &User) {
        if self.read_partitions().contains_key(user.key()) {
            return;
        }

        let _writer = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.load_partition(user);
    }

    /// Atomically replace all flag data of `user` with `data`.
    pub fn init(&self, user: &User, data: FullDataSet) {
        // Constructing new value before requesting the lock to minimize lock span.
        self.replace(user, Arc::new(data));
    }

    /// Same as [`DataStore::init`], returning the snapshot that was replaced.
    pub(crate) fn replace(
        &self,
        user: &User,
        snapshot: Arc<FullDataSet>,
    ) -> Option<Arc<FullDataSet>> {
        let _writer = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = self
            .write_partitions()
            .insert(user.key().to_owned(), snapshot.clone());

        self.persist(user, &snapshot);
        previous
    }

    /// Get the current state of `key` for `user`.
    ///
    /// Returns [`ItemDescriptor::Absent`] if the key was never known for this user (or the user
    /// was never loaded).
    pub fn get(&self, user: &User, key: &str) -> ItemDescriptor {
        self.get_all(user)
            .and_then(|data| data.get(key).cloned())
            .unwrap_or(ItemDescriptor::Absent)
    }

    /// Get a snapshot of all flag data of `user`. Returns `None` if the user was never loaded.
    ///
    /// The snapshot is not affected by later writes.
    pub fn get_all(&self, user: &User) -> Option<Arc<FullDataSet>> {
        self.read_partitions().get(user.key()).cloned()
    }

    /// Store `item` under `key` if its version is higher than the stored one.
    ///
    /// Tombstones count as stored versions. Returns `true` if the write was applied. A user that
    /// has not been loaded yet is preloaded first, so persisted flags are kept.
    pub fn upsert(&self, user: &User, key: &str, item: ItemDescriptor) -> bool {
        self.upsert_replacing(user, key, item).is_some()
    }

    /// Same as [`DataStore::upsert`]. Returns the replaced state if the write was applied.
    pub(crate) fn upsert_replacing(
        &self,
        user: &User,
        key: &str,
        item: ItemDescriptor,
    ) -> Option<ItemDescriptor> {
        let new_version = item.version()?;

        let _writer = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.load_partition(user);

        let (previous, snapshot) = {
            let mut partitions = self.write_partitions();
            let partition = partitions.entry(user.key().to_owned()).or_default();

            let previous = partition
                .get(key)
                .cloned()
                .unwrap_or(ItemDescriptor::Absent);
            if let Some(current_version) = previous.version() {
                if current_version >= new_version {
                    log::debug!(target: "flagsync",
                                user_key = user.key(), flag_key = key, current_version, new_version;
                                "ignoring outdated flag update");
                    return None;
                }
            }

            // Copies the partition only if a reader still holds the previous snapshot.
            Arc::make_mut(partition).insert(key, item);
            (previous, partition.clone())
        };

        self.persist(user, &snapshot);
        Some(previous)
    }

    /// Release the storage backend. Data already in memory stays readable; further writes are no
    /// longer persisted.
    pub fn dispose(&self) {
        let backend = self
            .backend
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if backend.is_some() {
            log::debug!(target: "flagsync", "data store disposed");
        }
    }

    /// Insert the persisted partition of `user` unless one is loaded already. Callers must hold
    /// `write_lock`.
    fn load_partition(&self, user: &User) {
        if self.read_partitions().contains_key(user.key()) {
            return;
        }

        let data = self.load_persisted(user).unwrap_or_default();
        log::debug!(target: "flagsync", user_key = user.key(), flags = data.len(); "preloaded user flags");

        self.write_partitions()
            .insert(user.key().to_owned(), Arc::new(data));
    }

    fn load_persisted(&self, user: &User) -> Option<FullDataSet> {
        let backend = self.backend()?;
        let serialized = backend.get(&storage_key(user))?;

        serde_json::from_str(&serialized)
            .inspect_err(|err| {
                log::warn!(target: "flagsync", user_key = user.key();
                           "discarding unreadable persisted flags: {:?}", err);
            })
            .ok()
    }

    fn persist(&self, user: &User, data: &FullDataSet) {
        let Some(backend) = self.backend() else {
            return;
        };

        let result = serde_json::to_string(data)
            .map_err(crate::Error::from)
            .and_then(|serialized| backend.set(&storage_key(user), &serialized));

        if let Err(err) = result {
            log::warn!(target: "flagsync", user_key = user.key(); "failed to persist flags: {:?}", err);
        }
    }

    fn backend(&self) -> Option<Arc<dyn StorageBackend>> {
        self.backend
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn read_partitions(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<FullDataSet>>> {
        self.partitions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_partitions(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<FullDataSet>>> {
        self.partitions.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Storage key of the user's partition. The user key is hashed so it never appears verbatim in
/// durable storage.
fn storage_key(user: &User) -> String {
    format!("flags_{:x}", md5::compute(user.key()))
}
