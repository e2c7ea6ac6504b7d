//! Client configuration.
use std::{sync::Arc, time::Duration};

use crate::{
    event_processor::NoopEventProcessor,
    platform::{DefaultPlatform, PlatformInfo},
    poller::PollingConfig,
    requestor::{FlagRequestor, HttpFlagRequestor, HttpFlagRequestorConfig},
    storage::{InMemoryStorage, StorageBackend},
    Client, EventProcessor, User,
};

/// Configuration for [`Client`].
///
/// A `Config` is consumed when the client is created and cannot be changed afterwards.
pub struct Config {
    pub(crate) mobile_key: String,
    pub(crate) base_url: String,
    pub(crate) poll_interval: Duration,
    pub(crate) initial_delay: Duration,
    pub(crate) offline: bool,
    pub(crate) evaluation_reasons: bool,
    pub(crate) event_processor: Arc<dyn EventProcessor + Send + Sync>,
    pub(crate) storage: Arc<dyn StorageBackend>,
    pub(crate) flag_requestor: Option<Arc<dyn FlagRequestor>>,
    pub(crate) platform: Arc<dyn PlatformInfo>,
}

impl Config {
    /// Default base URL for API calls.
    pub const DEFAULT_BASE_URL: &'static str = "https://app.launchdarkly.com";

    /// Default interval between flag requests.
    pub const DEFAULT_POLL_INTERVAL: Duration = PollingConfig::DEFAULT_POLL_INTERVAL;

    /// Shortest allowed interval between flag requests.
    pub const MINIMUM_POLL_INTERVAL: Duration = Duration::from_secs(5 * 60);

    /// Random jitter applied to every poll interval.
    pub const DEFAULT_POLL_JITTER: Duration = PollingConfig::DEFAULT_POLL_JITTER;

    /// Create a default configuration using the specified mobile key.
    ///
    /// ```
    /// # use flagsync::Config;
    /// Config::from_mobile_key("mob-key");
    /// ```
    pub fn from_mobile_key(mobile_key: impl Into<String>) -> Config {
        Config {
            mobile_key: mobile_key.into(),
            base_url: Config::DEFAULT_BASE_URL.to_owned(),
            poll_interval: Config::DEFAULT_POLL_INTERVAL,
            initial_delay: Duration::ZERO,
            offline: false,
            evaluation_reasons: false,
            event_processor: Arc::new(NoopEventProcessor),
            storage: Arc::new(InMemoryStorage::new()),
            flag_requestor: None,
            platform: Arc::new(DefaultPlatform),
        }
    }

    /// Override base URL for API calls. Clients should use the default setting in most cases.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Config {
        self.base_url = base_url.into();
        self
    }

    /// Set the interval between flag requests. Values below [`Config::MINIMUM_POLL_INTERVAL`]
    /// are raised to the minimum.
    pub fn poll_interval(mut self, poll_interval: Duration) -> Config {
        if poll_interval < Config::MINIMUM_POLL_INTERVAL {
            log::warn!(target: "flagsync",
                       "poll interval {:?} is below the minimum, using {:?}",
                       poll_interval, Config::MINIMUM_POLL_INTERVAL);
            self.poll_interval = Config::MINIMUM_POLL_INTERVAL;
        } else {
            self.poll_interval = poll_interval;
        }
        self
    }

    /// Delay the first flag request after start.
    pub fn initial_delay(mut self, initial_delay: Duration) -> Config {
        self.initial_delay = initial_delay;
        self
    }

    /// Never contact the flag service. Flags come from storage only.
    pub fn offline(mut self, offline: bool) -> Config {
        self.offline = offline;
        self
    }

    /// Request evaluation reasons from the server and always include them in evaluation events.
    pub fn evaluation_reasons(mut self, evaluation_reasons: bool) -> Config {
        self.evaluation_reasons = evaluation_reasons;
        self
    }

    /// Set event processor to pass evaluation events to your analytics pipeline.
    ///
    /// ```
    /// # use flagsync::{Config, EvaluationEvent};
    /// let config = Config::from_mobile_key("mob-key").event_processor(|event: EvaluationEvent| {
    ///   println!("{:?}", event);
    /// });
    /// ```
    pub fn event_processor(
        mut self,
        event_processor: impl EventProcessor + Send + Sync + 'static,
    ) -> Config {
        self.event_processor = Arc::new(event_processor);
        self
    }

    /// Persist flag data in `storage`. Defaults to [`InMemoryStorage`].
    pub fn storage(mut self, storage: impl StorageBackend + 'static) -> Config {
        self.storage = Arc::new(storage);
        self
    }

    /// Replace the HTTP requestor with a custom source of flag data.
    pub fn flag_requestor(mut self, flag_requestor: impl FlagRequestor + 'static) -> Config {
        self.flag_requestor = Some(Arc::new(flag_requestor));
        self
    }

    /// Override how the device is described to the server.
    pub fn platform(mut self, platform: impl PlatformInfo + 'static) -> Config {
        self.platform = Arc::new(platform);
        self
    }

    /// Create a new [`Client`] for `user` using this configuration.
    ///
    /// ```
    /// # use flagsync::{Client, Config, User};
    /// let client: Client = Config::from_mobile_key("mob-key")
    ///     .offline(true)
    ///     .to_client(User::with_key("user-key"));
    /// ```
    pub fn to_client(self, user: User) -> Client {
        Client::new(self, user)
    }

    pub(crate) fn polling_config(&self) -> PollingConfig {
        PollingConfig::new()
            .with_interval(self.poll_interval)
            .with_initial_delay(self.initial_delay)
    }

    pub(crate) fn build_requestor(&self) -> Arc<dyn FlagRequestor> {
        match &self.flag_requestor {
            Some(requestor) => Arc::clone(requestor),
            None => Arc::new(HttpFlagRequestor::new(HttpFlagRequestorConfig {
                base_url: self.base_url.clone(),
                mobile_key: self.mobile_key.clone(),
                with_reasons: self.evaluation_reasons,
            })),
        }
    }
}
