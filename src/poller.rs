//! A background poller thread that periodically requests flag data for a user and stores it in the
//! flag cache.
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{Receiver, RecvTimeoutError, SyncSender},
        Arc, Mutex, PoisonError,
    },
    thread::JoinHandle,
    time::Duration,
};

use rand::{thread_rng, Rng};

use crate::{
    flag_cache::FlagCacheManager,
    requestor::FlagRequestor,
    signal::{PlatformSignals, Signal, Subscription},
    update_processor::{StartFuture, UpdateProcessor},
    Error, FullDataSet, Result, User,
};

/// Configuration for [`PollingProcessor`].
// Not implementing `Copy` as we may add non-copyable fields in the future.
#[derive(Debug, Clone)]
pub struct PollingConfig {
    /// Interval to wait between requests for flag data.
    ///
    /// Defaults to [`PollingConfig::DEFAULT_POLL_INTERVAL`].
    pub interval: Duration,
    /// Jitter shortens every wait by a random duration up to this value, so that many devices do
    /// not synchronize their requests.
    ///
    /// Defaults to [`PollingConfig::DEFAULT_POLL_JITTER`].
    pub jitter: Duration,
    /// Delay before the first request. Defaults to zero.
    pub initial_delay: Duration,
}

impl PollingConfig {
    /// Default value for [`PollingConfig::interval`].
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5 * 60);
    /// Default value for [`PollingConfig::jitter`].
    pub const DEFAULT_POLL_JITTER: Duration = Duration::from_secs(30);

    /// Create a new `PollingConfig` using default configuration.
    pub fn new() -> PollingConfig {
        PollingConfig::default()
    }

    /// Update poll interval with `interval`.
    pub fn with_interval(mut self, interval: Duration) -> PollingConfig {
        self.interval = interval;
        self
    }

    /// Update poll interval jitter with `jitter`.
    pub fn with_jitter(mut self, jitter: Duration) -> PollingConfig {
        self.jitter = jitter;
        self
    }

    /// Update delay before the first request with `initial_delay`.
    pub fn with_initial_delay(mut self, initial_delay: Duration) -> PollingConfig {
        self.initial_delay = initial_delay;
        self
    }
}

impl Default for PollingConfig {
    fn default() -> PollingConfig {
        PollingConfig {
            interval: PollingConfig::DEFAULT_POLL_INTERVAL,
            jitter: PollingConfig::DEFAULT_POLL_JITTER,
            initial_delay: Duration::ZERO,
        }
    }
}

/// State shared between the processor handle and its poller thread.
struct Shared {
    requestor: Arc<dyn FlagRequestor>,
    cache: Arc<FlagCacheManager>,
    user: User,
    config: PollingConfig,
    signals: PlatformSignals,
    start_future: StartFuture,
    stopped: AtomicBool,
}

enum State {
    NotStarted,
    Polling {
        join_handle: JoinHandle<()>,
        /// Wakes the poller thread up to re-check its state. Buffer size of 1 is enough: if the
        /// buffer is full, the thread is going to wake up anyway.
        wake_sender: SyncSender<()>,
        /// Keeps platform signal callbacks registered while polling.
        _subscriptions: [Subscription; 2],
    },
    Disposed,
}

/// An [`UpdateProcessor`] that polls the flag service on a fixed interval.
///
/// The first request is made as soon as the processor is started (after
/// [`PollingConfig::initial_delay`]). Fetch failures leave the cached data untouched and are
/// retried on the next interval. Polling pauses while the application is in background or
/// offline, and resumes with an immediate request.
pub struct PollingProcessor {
    shared: Arc<Shared>,
    state: Mutex<State>,
}

impl PollingProcessor {
    /// Create a processor that keeps flags of `user` in `cache` up to date. Nothing happens until
    /// [`UpdateProcessor::start`] is called.
    pub fn new(
        requestor: Arc<dyn FlagRequestor>,
        cache: Arc<FlagCacheManager>,
        user: User,
        config: PollingConfig,
        signals: PlatformSignals,
    ) -> PollingProcessor {
        PollingProcessor {
            shared: Arc::new(Shared {
                requestor,
                cache,
                user,
                config,
                signals,
                start_future: StartFuture::pending(),
                stopped: AtomicBool::new(false),
            }),
            state: Mutex::new(State::NotStarted),
        }
    }

    /// Dispose the processor and block waiting for the poller thread to exit.
    ///
    /// The thread exits after the in-flight request (if any) completes. If you don't need to wait
    /// for the thread to exit, use [`UpdateProcessor::dispose`] instead.
    ///
    /// # Errors
    ///
    /// - [`Error::PollerThreadPanicked`] if the thread has panicked.
    pub fn shutdown(&self) -> Result<()> {
        let Some(join_handle) = self.stop() else {
            return Ok(());
        };

        // Joining from the poller thread itself (e.g., from a flag change listener) would never
        // return.
        if join_handle.thread().id() == std::thread::current().id() {
            return Ok(());
        }

        join_handle
            .join()
            .map_err(|_| Error::PollerThreadPanicked)
    }

    fn stop(&self) -> Option<JoinHandle<()>> {
        self.shared.stopped.store(true, Ordering::SeqCst);

        let previous = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *state, State::Disposed)
        };

        // Nobody is going to resolve a pending start future anymore.
        self.shared.start_future.resolve(false);

        match previous {
            State::Polling {
                join_handle,
                wake_sender,
                _subscriptions,
            } => {
                log::debug!(target: "flagsync", user_key = self.shared.user.key(); "stopping poller thread");
                // Error means that the thread has exited already or that the buffer is full
                // (the thread will wake up anyway).
                let _ = wake_sender.try_send(());
                Some(join_handle)
            }
            State::NotStarted | State::Disposed => None,
        }
    }
}

impl UpdateProcessor for PollingProcessor {
    fn start(&self) -> StartFuture {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !matches!(*state, State::NotStarted) {
            return self.shared.start_future.clone();
        }

        // Using `sync_channel` here as it makes the sender `Sync`, so it can be moved into signal
        // callbacks.
        let (wake_sender, wake_receiver) = std::sync::mpsc::sync_channel::<()>(1);

        let subscribe = |signal: &Signal| {
            let wake_sender = wake_sender.clone();
            signal.subscribe(move |_| {
                let _ = wake_sender.try_send(());
            })
        };
        let subscriptions = [
            subscribe(&self.shared.signals.connected),
            subscribe(&self.shared.signals.backgrounded),
        ];

        let spawned = {
            let shared = Arc::clone(&self.shared);
            std::thread::Builder::new()
                .name("flagsync-poller".to_owned())
                .spawn(move || {
                    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        shared.run(&wake_receiver);
                    }));

                    // If catch_unwind returns Err, it means a panic occurred.
                    if result.is_err() {
                        log::warn!(target: "flagsync", "poller thread panicked");
                        shared.start_future.resolve(false);
                    }
                })
        };

        match spawned {
            Ok(join_handle) => {
                *state = State::Polling {
                    join_handle,
                    wake_sender,
                    _subscriptions: subscriptions,
                };
            }
            Err(err) => {
                log::warn!(target: "flagsync", "failed to start poller thread: {:?}", err);
                *state = State::Disposed;
                self.shared.start_future.resolve(false);
            }
        }

        self.shared.start_future.clone()
    }

    fn initialized(&self) -> bool {
        self.shared.start_future.succeeded()
    }

    fn dispose(&self) {
        // Dropping the handle detaches the thread; it exits on its own.
        let _ = self.stop();
    }
}

impl Drop for PollingProcessor {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl Shared {
    fn run(&self, wake_receiver: &Receiver<()>) {
        let initial_delay = self.config.initial_delay;
        if !initial_delay.is_zero() && !self.sleep(wake_receiver, initial_delay) {
            return;
        }

        loop {
            if self.is_stopped() {
                return;
            }

            if self.signals.is_paused() {
                log::debug!(target: "flagsync", "polling paused");
                // Block until a signal changes or the processor is disposed.
                match wake_receiver.recv() {
                    Ok(()) => continue,
                    Err(_) => return,
                }
            }

            log::debug!(target: "flagsync", user_key = self.user.key(); "polling for flags");
            match self.fetch() {
                Ok(data) => {
                    if self.is_stopped() {
                        return;
                    }
                    self.cache.cache_flags_from_service(data, &self.user);
                    if self.start_future.resolve(true) {
                        log::debug!(target: "flagsync", user_key = self.user.key(); "initialized");
                    }
                }
                Err(err) if err.is_unrecoverable() => {
                    log::warn!(target: "flagsync", "stopping poller thread on unrecoverable error: {:?}", err);
                    self.start_future.resolve(false);
                    return;
                }
                Err(err) => {
                    // Other errors are retriable, keep the cached flags and try again later.
                    log::warn!(target: "flagsync", "error while polling for flags: {:?}", err);
                }
            }

            let timeout = jitter(self.config.interval, self.config.jitter);
            if !self.sleep(wake_receiver, timeout) {
                return;
            }
        }
    }

    fn fetch(&self) -> Result<FullDataSet> {
        let payload = self.requestor.fetch(&self.user)?;
        FullDataSet::from_payload(&payload)
    }

    /// Wait for `timeout` or until woken up. Returns `false` if the thread should exit.
    fn sleep(&self, wake_receiver: &Receiver<()>, timeout: Duration) -> bool {
        match wake_receiver.recv_timeout(timeout) {
            // Timed out or woken up by a signal change. Loop back to fetch flags.
            Ok(()) | Err(RecvTimeoutError::Timeout) => !self.is_stopped(),
            Err(RecvTimeoutError::Disconnected) => {
                log::debug!(target: "flagsync", "poller thread received disconnected");
                false
            }
        }
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Apply randomized `jitter` to `interval`.
fn jitter(interval: Duration, jitter: Duration) -> Duration {
    Duration::saturating_sub(interval, thread_rng().gen_range(Duration::ZERO..=jitter))
}
