//! A client-side feature flag SDK for mobile and desktop applications.
//!
//! # Overview
//!
//! The SDK revolves around a [`Client`] that evaluates feature flags for the current [`User`].
//! Flag values are computed by the server for one user at a time; the client fetches them in the
//! background, keeps them in a versioned, per-user [`DataStore`] and mirrors them to a
//! [`StorageBackend`], so the previous session's values are available before the first fetch
//! completes.
//!
//! An [`EventProcessor`] should be provided to deliver [`EvaluationEvent`]s to your analytics
//! pipeline, facilitating tracking of which user received which flag values.
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum.
//!
//! Flag evaluation never fails: when a flag cannot be evaluated, the caller's default value is
//! returned and the reason is reported via [`EvaluationDetail`]. Background fetch errors are
//! logged and retried; only unrecoverable ones (see [`Error::is_unrecoverable`]) resolve the
//! [`StartFuture`] to `false`.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging
//! messages under the `flagsync` target. Consider integrating a `log`-compatible logger
//! implementation for better visibility into SDK operations.
//!
//! # Examples
//!
//! Examples can be found in the `demos` directory of the crate repository.

#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

mod client;
mod config;
mod data_store;
mod error;
mod event_processor;
mod events;
mod flag;
mod flag_cache;
mod platform;
mod poller;
mod reason;
mod requestor;
mod signal;
mod storage;
mod update_processor;
mod user;

pub use client::Client;
pub use config::Config;
pub use data_store::{DataStore, FullDataSet, ItemDescriptor};
pub use error::{Error, Result};
pub use event_processor::EventProcessor;
pub use events::{EvaluationEvent, EventFactory};
pub use flag::{FeatureFlag, FlagValue};
pub use flag_cache::{FlagCacheManager, FlagChange};
pub use platform::{DefaultPlatform, PlatformInfo};
pub use poller::{PollingConfig, PollingProcessor};
pub use reason::{ErrorKind, EvaluationDetail, Reason};
pub use requestor::{FlagRequestor, HttpFlagRequestor, HttpFlagRequestorConfig};
pub use signal::{PlatformSignals, Signal, Subscription};
pub use storage::{InMemoryStorage, StorageBackend};
pub use update_processor::{NullUpdateProcessor, StartFuture, UpdateProcessor};
pub use user::{AttributeValue, Attributes, User};
