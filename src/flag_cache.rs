//! Evaluation-friendly view over [`DataStore`].
use std::{collections::HashMap, sync::Arc};

use crate::{
    data_store::{DataStore, FullDataSet, ItemDescriptor},
    signal::{Listeners, Subscription},
    FeatureFlag, FlagValue, User,
};

/// Describes a change of a flag value in the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct FlagChange {
    /// Key of the changed flag.
    pub flag_key: String,
    /// Value before the change. `None` if the flag was unknown or deleted.
    pub old_value: Option<FlagValue>,
    /// Value after the change. `None` if the flag was deleted.
    pub new_value: Option<FlagValue>,
}

/// `FlagCacheManager` exposes flag data of a user as plain [`FeatureFlag`] records, hiding
/// versioning and tombstones from the evaluation path.
///
/// All writes are forwarded to the underlying [`DataStore`], so they are subject to the same
/// version rules. Listeners registered with [`FlagCacheManager::on_flag_change`] are notified
/// about every value that changed as a result of a write.
pub struct FlagCacheManager {
    store: Arc<DataStore>,
    listeners: Listeners<FlagChange>,
}

impl FlagCacheManager {
    /// Create a cache view over `store`.
    pub fn new(store: Arc<DataStore>) -> FlagCacheManager {
        FlagCacheManager {
            store,
            listeners: Listeners::new(),
        }
    }

    /// The underlying data store.
    pub fn store(&self) -> &Arc<DataStore> {
        &self.store
    }

    /// Replace all flags of `user` with `flags` received from the server.
    pub fn cache_flags_from_service(&self, flags: FullDataSet, user: &User) {
        let current = Arc::new(flags);
        let previous = self.store.replace(user, Arc::clone(&current));

        self.notify_changes(previous.as_deref(), Some(current.as_ref()));
    }

    /// Returns the flag if it is present. Unknown and deleted flags both return `None`.
    pub fn flag_for_user(&self, flag_key: &str, user: &User) -> Option<FeatureFlag> {
        self.store.get(user, flag_key).flag().cloned()
    }

    /// Store a new version of a single flag. Returns `true` if the update was newer than the
    /// stored state and got applied.
    pub fn update_flag_for_user(&self, flag_key: &str, flag: FeatureFlag, user: &User) -> bool {
        self.write(flag_key, ItemDescriptor::present(flag), user)
    }

    /// Delete a single flag at `version`. Returns `true` if the deletion was newer than the
    /// stored state and got applied.
    pub fn remove_flag_for_user(&self, flag_key: &str, version: u64, user: &User) -> bool {
        self.write(flag_key, ItemDescriptor::tombstone(version), user)
    }

    /// All present flags of `user`.
    pub fn flags_for_user(&self, user: &User) -> HashMap<String, FeatureFlag> {
        self.store
            .get_all(user)
            .map(|data| {
                data.flags()
                    .map(|(key, flag)| (key.clone(), flag.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Register `callback` to be notified about flag value changes.
    pub fn on_flag_change(
        &self,
        callback: impl Fn(&FlagChange) + Send + Sync + 'static,
    ) -> Subscription {
        self.listeners.subscribe(callback)
    }

    fn write(&self, flag_key: &str, item: ItemDescriptor, user: &User) -> bool {
        let new_value = item.flag().map(|flag| flag.value.clone());

        // Old value is the state this write replaced, not a separate read.
        let Some(previous) = self.store.upsert_replacing(user, flag_key, item) else {
            return false;
        };
        let old_value = previous.flag().map(|flag| flag.value.clone());

        if old_value != new_value {
            self.listeners.notify(&FlagChange {
                flag_key: flag_key.to_owned(),
                old_value,
                new_value,
            });
        }
        true
    }

    fn notify_changes(&self, previous: Option<&FullDataSet>, current: Option<&FullDataSet>) {
        let value_of = |data: Option<&FullDataSet>, key: &str| {
            data.and_then(|data| data.get(key))
                .and_then(ItemDescriptor::flag)
                .map(|flag| flag.value.clone())
        };

        let mut keys: Vec<&String> = previous
            .into_iter()
            .chain(current)
            .flat_map(|data| data.flags().map(|(key, _)| key))
            .collect();
        keys.sort();
        keys.dedup();

        for key in keys {
            let old_value = value_of(previous, key.as_str());
            let new_value = value_of(current, key.as_str());
            if old_value != new_value {
                log::trace!(target: "flagsync", flag_key = key.as_str(); "flag value changed");
                self.listeners.notify(&FlagChange {
                    flag_key: key.clone(),
                    old_value,
                    new_value,
                });
            }
        }
    }
}
