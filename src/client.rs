//! The client facade used by applications to evaluate flags.
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, RwLock,
    },
};

use crate::{
    data_store::DataStore,
    events::{EvaluationEvent, EventFactory},
    flag_cache::{FlagCacheManager, FlagChange},
    platform::PlatformInfo,
    poller::{PollingConfig, PollingProcessor},
    requestor::FlagRequestor,
    signal::{PlatformSignals, Signal, Subscription},
    update_processor::{NullUpdateProcessor, StartFuture, UpdateProcessor},
    Config, ErrorKind, EvaluationDetail, EventProcessor, FlagValue, User,
};

/// A client that evaluates feature flags for the current user.
///
/// Flag data is fetched in the background once [`Client::start`] is called and is mirrored to the
/// configured storage, so values from the previous session are available right after creation.
/// Evaluation never blocks on the network: when no data is available the caller's default value
/// is returned.
///
/// # Examples
/// ```
/// # use flagsync::{Client, Config, User};
/// let client = Client::new(Config::from_mobile_key("mob-key").offline(true), User::with_key("user"));
/// assert_eq!(client.bool_variation("flag", false), false);
/// ```
pub struct Client {
    cache: Arc<FlagCacheManager>,
    user: RwLock<User>,
    processor: Mutex<Box<dyn UpdateProcessor>>,
    /// Start future of the current processor.
    start_future: RwLock<StartFuture>,
    started: AtomicBool,
    offline: AtomicBool,
    signals: PlatformSignals,
    event_factory: EventFactory,
    event_processor: Arc<dyn EventProcessor + Send + Sync>,
    requestor: Arc<dyn FlagRequestor>,
    platform: Arc<dyn PlatformInfo>,
    polling_config: PollingConfig,
}

impl Client {
    /// Create a new `Client` for `user` using the specified configuration.
    ///
    /// Flags stored for `user` by a previous session are loaded immediately. No requests are made
    /// until [`Client::start`] is called.
    pub fn new(config: Config, user: User) -> Client {
        let user = user.with_platform(&*config.platform);

        let store = Arc::new(DataStore::new(Arc::clone(&config.storage)));
        store.preload(&user);
        let cache = Arc::new(FlagCacheManager::new(store));

        let mut client = Client {
            cache,
            user: RwLock::new(user.clone()),
            processor: Mutex::new(Box::new(NullUpdateProcessor::new())),
            start_future: RwLock::new(StartFuture::pending()),
            started: AtomicBool::new(false),
            offline: AtomicBool::new(config.offline),
            signals: PlatformSignals::default(),
            event_factory: EventFactory::new(config.evaluation_reasons),
            event_processor: Arc::clone(&config.event_processor),
            requestor: config.build_requestor(),
            platform: Arc::clone(&config.platform),
            polling_config: config.polling_config(),
        };
        let processor = client.build_processor(&user);
        *client
            .processor
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner) = processor;
        client
    }

    /// Start fetching flags in the background.
    ///
    /// The returned future resolves to `true` once flags for the current user have been received
    /// (immediately when offline), or to `false` if the client cannot be initialized (e.g., the
    /// mobile key is invalid). The client can be used for evaluation before that; it returns
    /// cached values or defaults.
    ///
    /// ```
    /// # use std::time::Duration;
    /// # use flagsync::{Client, Config, User};
    /// let client = Config::from_mobile_key("mob-key").offline(true).to_client(User::with_key("user"));
    /// let initialized = client.start().wait_timeout(Duration::from_secs(5));
    /// assert_eq!(initialized, Some(true));
    /// ```
    pub fn start(&self) -> StartFuture {
        self.started.store(true, Ordering::SeqCst);
        let processor = self.lock_processor();
        self.track(processor.start())
    }

    /// Returns `true` once the flags for the current user have been received.
    pub fn initialized(&self) -> bool {
        self.start_future
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .succeeded()
    }

    /// The user flags are currently evaluated for.
    pub fn user(&self) -> User {
        self.user.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Switch to a different user.
    ///
    /// Flags stored for `user` are loaded immediately and a new fetch is started. The returned
    /// future resolves when flags for the new user have been received.
    pub fn identify(&self, user: User) -> StartFuture {
        let user = user.with_platform(&*self.platform);
        log::debug!(target: "flagsync", user_key = user.key(); "identifying user");

        self.cache.store().preload(&user);
        *self.user.write().unwrap_or_else(PoisonError::into_inner) = user.clone();

        self.started.store(true, Ordering::SeqCst);
        let mut processor = self.lock_processor();
        processor.dispose();
        *processor = self.build_processor(&user);
        self.track(processor.start())
    }

    /// Stop or resume contacting the flag service. Cached flags stay available while offline.
    pub fn set_offline(&self, offline: bool) {
        if self.offline.swap(offline, Ordering::SeqCst) == offline {
            return;
        }
        log::debug!(target: "flagsync", offline; "switching connection mode");

        let user = self.user();
        let mut processor = self.lock_processor();
        processor.dispose();
        *processor = self.build_processor(&user);
        if self.started.load(Ordering::SeqCst) {
            self.track(processor.start());
        } else {
            self.track(StartFuture::pending());
        }
    }

    /// Returns `true` if the client does not contact the flag service.
    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    /// Network connectivity as reported by the application. Polling pauses while disconnected.
    ///
    /// ```
    /// # use flagsync::{Client, Config, User};
    /// # let client = Config::from_mobile_key("mob-key").offline(true).to_client(User::with_key("user"));
    /// client.connectivity().set(false);
    /// ```
    pub fn connectivity(&self) -> &Signal {
        &self.signals.connected
    }

    /// Whether the application is in background. Polling pauses while in background.
    pub fn background(&self) -> &Signal {
        &self.signals.backgrounded
    }

    /// Register `callback` to be called whenever a flag value of the current user changes.
    /// The callback is unregistered when the returned [`Subscription`] is dropped.
    pub fn on_flag_change(
        &self,
        callback: impl Fn(&FlagChange) + Send + Sync + 'static,
    ) -> Subscription {
        self.cache.on_flag_change(callback)
    }

    /// Values of all known flags of the current user. Does not produce evaluation events.
    pub fn all_flags(&self) -> HashMap<String, FlagValue> {
        self.cache
            .flags_for_user(&self.user())
            .into_iter()
            .map(|(key, flag)| (key, flag.value))
            .collect()
    }

    /// Evaluate a boolean flag.
    pub fn bool_variation(&self, flag_key: &str, default: bool) -> bool {
        self.bool_variation_detail(flag_key, default).value
    }

    /// Evaluate a boolean flag and explain the result.
    pub fn bool_variation_detail(&self, flag_key: &str, default: bool) -> EvaluationDetail<bool> {
        self.evaluate(flag_key, default, FlagValue::as_bool)
    }

    /// Evaluate an integer flag. Numeric values are truncated towards zero.
    pub fn int_variation(&self, flag_key: &str, default: i64) -> i64 {
        self.int_variation_detail(flag_key, default).value
    }

    /// Evaluate an integer flag and explain the result.
    pub fn int_variation_detail(&self, flag_key: &str, default: i64) -> EvaluationDetail<i64> {
        self.evaluate(flag_key, default, FlagValue::as_i64)
    }

    /// Evaluate a numeric flag.
    pub fn float_variation(&self, flag_key: &str, default: f64) -> f64 {
        self.float_variation_detail(flag_key, default).value
    }

    /// Evaluate a numeric flag and explain the result.
    pub fn float_variation_detail(&self, flag_key: &str, default: f64) -> EvaluationDetail<f64> {
        self.evaluate(flag_key, default, FlagValue::as_f64)
    }

    /// Evaluate a string flag.
    pub fn string_variation(&self, flag_key: &str, default: impl Into<String>) -> String {
        self.string_variation_detail(flag_key, default).value
    }

    /// Evaluate a string flag and explain the result.
    pub fn string_variation_detail(
        &self,
        flag_key: &str,
        default: impl Into<String>,
    ) -> EvaluationDetail<String> {
        self.evaluate(flag_key, default.into(), |value| {
            value.as_str().map(str::to_owned)
        })
    }

    /// Evaluate a flag of any type.
    pub fn json_variation(&self, flag_key: &str, default: impl Into<FlagValue>) -> FlagValue {
        self.variation_detail(flag_key, default).value
    }

    /// Evaluate a flag of any type and explain the result.
    pub fn variation_detail(
        &self,
        flag_key: &str,
        default: impl Into<FlagValue>,
    ) -> EvaluationDetail<FlagValue> {
        self.evaluate(flag_key, default.into(), |value| Some(value.clone()))
    }

    /// Stop fetching flags and release storage. Cached values remain available for evaluation.
    pub fn close(&self) {
        log::debug!(target: "flagsync", "closing client");
        self.lock_processor().dispose();
        self.cache.store().dispose();
    }

    fn evaluate<T: Clone + Into<FlagValue>>(
        &self,
        flag_key: &str,
        default: T,
        convert: impl FnOnce(&FlagValue) -> Option<T>,
    ) -> EvaluationDetail<T> {
        let user = self.user();
        let user_key = user.key();

        let Some(flag) = self.cache.flag_for_user(flag_key, &user) else {
            let has_cached_flags = self
                .cache
                .store()
                .get_all(&user)
                .is_some_and(|data| !data.is_empty());
            let error_kind = if self.initialized() || has_cached_flags {
                ErrorKind::FlagNotFound
            } else {
                ErrorKind::ClientNotReady
            };
            log::info!(target: "flagsync", flag_key, user_key, error_kind:?; "unknown flag, returning default value");
            self.send_event(self.event_factory.new_unknown_flag_evaluation_event(
                flag_key,
                &user,
                default.clone().into(),
                error_kind,
            ));
            return EvaluationDetail::error(default, error_kind);
        };

        if flag.value.is_null() {
            log::info!(target: "flagsync", flag_key, user_key; "flag has no value, returning default value");
            let detail = EvaluationDetail {
                value: default.clone().into(),
                variation_index: None,
                reason: flag.reason.clone(),
            };
            self.send_event(self.event_factory.new_evaluation_event(
                flag_key,
                &flag,
                &user,
                &detail,
                default.clone().into(),
            ));
            return detail.map(|_| default);
        }

        let Some(value) = convert(&flag.value) else {
            log::warn!(target: "flagsync", flag_key, user_key; "flag value has unexpected type, returning default value");
            self.send_event(self.event_factory.new_default_value_evaluation_event(
                flag_key,
                &flag,
                &user,
                default.clone().into(),
                ErrorKind::WrongType,
            ));
            return EvaluationDetail::error(default, ErrorKind::WrongType);
        };

        let detail = EvaluationDetail {
            value: flag.value.clone(),
            variation_index: flag.variation,
            reason: flag.reason.clone(),
        };
        log::trace!(target: "flagsync", flag_key, user_key, value:serde = detail.value; "evaluated a flag");
        self.send_event(self.event_factory.new_evaluation_event(
            flag_key,
            &flag,
            &user,
            &detail,
            default.into(),
        ));
        detail.map(|_| value)
    }

    fn send_event(&self, event: EvaluationEvent) {
        log::trace!(target: "flagsync", event:serde; "sending evaluation event");
        self.event_processor.send_event(event);
    }

    fn build_processor(&self, user: &User) -> Box<dyn UpdateProcessor> {
        if self.is_offline() {
            Box::new(NullUpdateProcessor::new())
        } else {
            Box::new(PollingProcessor::new(
                Arc::clone(&self.requestor),
                Arc::clone(&self.cache),
                user.clone(),
                self.polling_config.clone(),
                self.signals.clone(),
            ))
        }
    }

    /// Remember `start_future` as the current one. Called with the processor lock held.
    fn track(&self, start_future: StartFuture) -> StartFuture {
        *self
            .start_future
            .write()
            .unwrap_or_else(PoisonError::into_inner) = start_future.clone();
        start_future
    }

    fn lock_processor(&self) -> MutexGuard<'_, Box<dyn UpdateProcessor>> {
        self.processor.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Mutex},
        time::Duration,
    };

    use crate::{
        Client, Config, ErrorKind, EvaluationEvent, FlagValue, InMemoryStorage, Reason,
        StorageBackend, User,
    };

    const PAYLOAD: &str = r#"{
        "bool-flag": {"value": true, "version": 2, "variation": 0},
        "int-flag": {"value": 15, "version": 3, "variation": 1, "flagVersion": 9},
        "string-flag": {"value": "text", "version": 4, "variation": 2,
                        "reason": {"kind": "FALLTHROUGH"}},
        "null-flag": {"value": null, "version": 5}
    }"#;

    fn online_client(config: Config) -> (Client, Arc<Mutex<Vec<EvaluationEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let config = {
            let events = Arc::clone(&events);
            config
                .flag_requestor(|_: &User| -> crate::Result<String> { Ok(PAYLOAD.to_owned()) })
                .event_processor(move |event: EvaluationEvent| events.lock().unwrap().push(event))
        };
        let client = Client::new(config, User::with_key("user"));
        assert_eq!(client.start().wait_timeout(Duration::from_secs(5)), Some(true));
        (client, events)
    }

    #[test]
    fn returns_defaults_before_start() {
        let client = Config::from_mobile_key("mob-key")
            .flag_requestor(|_: &User| -> crate::Result<String> { Ok(PAYLOAD.to_owned()) })
            .to_client(User::with_key("user"));

        let detail = client.bool_variation_detail("bool-flag", false);
        assert!(!detail.value);
        assert_eq!(detail.error_kind(), Some(ErrorKind::ClientNotReady));
    }

    #[test]
    fn cached_flags_count_as_ready_before_start() {
        let storage = Arc::new(InMemoryStorage::new());
        {
            let (client, _) = online_client(
                Config::from_mobile_key("mob-key").storage(SharedStorage(Arc::clone(&storage))),
            );
            client.close();
        }

        let client = Config::from_mobile_key("mob-key")
            .flag_requestor(|_: &User| -> crate::Result<String> {
                Err(crate::Error::UnexpectedStatus(500))
            })
            .storage(SharedStorage(storage))
            .to_client(User::with_key("user"));

        assert!(!client.initialized());
        assert_eq!(client.int_variation("int-flag", 0), 15);
        assert_eq!(
            client.bool_variation_detail("missing", false).error_kind(),
            Some(ErrorKind::FlagNotFound)
        );
    }

    #[test]
    fn evaluation_does_not_wait_for_processor() {
        let (client, _) = online_client(Config::from_mobile_key("mob-key"));
        let client = &client;
        let (sender, receiver) = std::sync::mpsc::channel();

        let processor = client.lock_processor();
        let result = std::thread::scope(|scope| {
            scope.spawn(move || {
                let detail = client.string_variation_detail("missing", "default");
                let _ = sender.send((client.initialized(), detail.error_kind()));
            });
            let result = receiver.recv_timeout(Duration::from_secs(5));
            drop(processor);
            result
        });

        assert_eq!(result.ok(), Some((true, Some(ErrorKind::FlagNotFound))));
    }

    #[test]
    fn evaluates_typed_flags() {
        let (client, events) = online_client(Config::from_mobile_key("mob-key"));

        assert!(client.initialized());
        assert!(client.bool_variation("bool-flag", false));
        assert_eq!(client.int_variation("int-flag", 0), 15);
        assert_eq!(client.float_variation("int-flag", 0.0), 15.0);
        assert_eq!(client.string_variation("string-flag", "default"), "text");
        assert_eq!(client.json_variation("int-flag", FlagValue::Null), FlagValue::from(15));

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 5);
        assert_eq!(events[1].key, "int-flag");
        assert_eq!(events[1].version, Some(9));
        assert_eq!(events[1].variation, Some(1));
        assert_eq!(events[1].default, FlagValue::from(0));
    }

    #[test]
    fn wrong_type_returns_default() {
        let (client, events) = online_client(Config::from_mobile_key("mob-key"));

        let detail = client.int_variation_detail("string-flag", 7);
        assert_eq!(detail.value, 7);
        assert_eq!(detail.variation_index, None);
        assert_eq!(detail.error_kind(), Some(ErrorKind::WrongType));

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].value, FlagValue::from(7));
        assert_eq!(events[0].version, Some(4));
        assert_eq!(events[0].variation, None);
    }

    #[test]
    fn unknown_flag_returns_default() {
        let (client, events) = online_client(Config::from_mobile_key("mob-key"));

        let detail = client.string_variation_detail("missing", "default");
        assert_eq!(detail.value, "default");
        assert_eq!(detail.error_kind(), Some(ErrorKind::FlagNotFound));

        let events = events.lock().unwrap();
        assert_eq!(events[0].version, None);
    }

    #[test]
    fn null_value_returns_default() {
        let (client, events) = online_client(Config::from_mobile_key("mob-key"));

        assert_eq!(client.string_variation("null-flag", "default"), "default");

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].value, FlagValue::from("default"));
        assert_eq!(events[0].version, Some(5));
    }

    #[test]
    fn detail_carries_reason() {
        let (client, events) =
            online_client(Config::from_mobile_key("mob-key").evaluation_reasons(true));

        let detail = client.string_variation_detail("string-flag", "default");
        assert_eq!(detail.variation_index, Some(2));
        assert_eq!(
            detail.reason,
            Some(Reason::Fallthrough {
                in_experiment: false
            })
        );
        assert_eq!(events.lock().unwrap()[0].reason, detail.reason);
    }

    #[test]
    fn all_flags_does_not_send_events() {
        let (client, events) = online_client(Config::from_mobile_key("mob-key"));

        let flags = client.all_flags();
        assert_eq!(flags.len(), 4);
        assert_eq!(flags["bool-flag"], FlagValue::Bool(true));
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn offline_client_uses_stored_flags() {
        let storage = Arc::new(InMemoryStorage::new());
        {
            let (client, _) = online_client(
                Config::from_mobile_key("mob-key").storage(SharedStorage(Arc::clone(&storage))),
            );
            client.close();
        }

        let client = Config::from_mobile_key("mob-key")
            .offline(true)
            .storage(SharedStorage(storage))
            .to_client(User::with_key("user"));

        assert!(client.is_offline());
        assert_eq!(client.int_variation("int-flag", 0), 15);
        assert_eq!(client.start().result(), Some(true));
    }

    #[test]
    fn identify_switches_partition() {
        let (client, _) = online_client(Config::from_mobile_key("mob-key"));

        let started = client.identify(User::with_key("other"));
        assert_eq!(client.user().key(), "other");
        assert_eq!(started.wait_timeout(Duration::from_secs(5)), Some(true));
        assert_eq!(client.int_variation("int-flag", 0), 15);
    }

    #[test]
    fn set_offline_keeps_cached_flags() {
        let (client, _) = online_client(Config::from_mobile_key("mob-key"));

        client.set_offline(true);
        assert!(client.is_offline());
        assert!(client.bool_variation("bool-flag", false));

        client.set_offline(false);
        assert!(!client.is_offline());
    }

    struct SharedStorage(Arc<InMemoryStorage>);

    impl StorageBackend for SharedStorage {
        fn get(&self, key: &str) -> Option<String> {
            self.0.get(key)
        }

        fn set(&self, key: &str, value: &str) -> crate::Result<()> {
            self.0.set(key, value)
        }
    }
}
