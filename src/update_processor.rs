//! Background components that keep the data store in sync with the flag service.
use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Condvar, Mutex, MutexGuard, PoisonError,
    },
    task::{Context, Poll, Waker},
    time::Duration,
};

/// Acquires flag data in the background.
///
/// Implementations are started once and disposed once. Evaluation never waits on the processor:
/// it reads whatever the data store currently holds.
pub trait UpdateProcessor: Send + Sync {
    /// Begin data acquisition without blocking the caller.
    ///
    /// The returned future resolves to `true` the first time a complete data set has been stored,
    /// or to `false` on an unrecoverable error. Calling `start()` again returns the same future.
    fn start(&self) -> StartFuture;

    /// Returns `true` once the future returned by [`start`](UpdateProcessor::start) has resolved
    /// to `true`. Stays `true` even if later updates fail.
    fn initialized(&self) -> bool;

    /// Stop scheduled work and release resources. Never blocks on in-flight requests. Safe to
    /// call multiple times, from any thread, before or after `start()`.
    fn dispose(&self);
}

#[derive(Default)]
struct StartState {
    result: Option<bool>,
    wakers: Vec<Waker>,
}

/// Completion of [`UpdateProcessor::start`].
///
/// `StartFuture` resolves exactly once. It can be awaited from async code or waited on from
/// blocking code, with or without a timeout. Timing out never cancels the background work: the
/// processor keeps trying and the future still resolves later.
///
/// ```
/// # use std::time::Duration;
/// # use flagsync::{NullUpdateProcessor, UpdateProcessor};
/// let processor = NullUpdateProcessor::new();
/// let started = processor.start();
/// assert_eq!(started.wait_timeout(Duration::from_secs(1)), Some(true));
/// ```
#[derive(Clone, Default)]
pub struct StartFuture {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<StartState>,
    resolved: Condvar,
    /// Mirrors `state.result == Some(true)` for lock-free reads.
    succeeded: AtomicBool,
}

impl StartFuture {
    pub(crate) fn pending() -> StartFuture {
        StartFuture::default()
    }

    pub(crate) fn resolved(value: bool) -> StartFuture {
        let future = StartFuture::pending();
        future.resolve(value);
        future
    }

    /// Resolve the future with `value`. Returns `false` if it had already been resolved, in which
    /// case `value` is ignored.
    pub(crate) fn resolve(&self, value: bool) -> bool {
        let wakers = {
            let mut state = self.lock();
            if state.result.is_some() {
                return false;
            }
            state.result = Some(value);
            self.inner.succeeded.store(value, Ordering::SeqCst);
            std::mem::take(&mut state.wakers)
        };

        self.inner.resolved.notify_all();
        for waker in wakers {
            waker.wake();
        }
        true
    }

    /// Returns the result without blocking. `None` if the future is still pending.
    pub fn result(&self) -> Option<bool> {
        self.lock().result
    }

    /// Returns `true` if the future has resolved to `true`. Never blocks or locks.
    pub fn succeeded(&self) -> bool {
        self.inner.succeeded.load(Ordering::SeqCst)
    }

    /// Block until the future resolves.
    pub fn wait(&self) -> bool {
        let state = self
            .inner
            .resolved
            .wait_while(self.lock(), |state| state.result.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        state.result.unwrap_or(false)
    }

    /// Block until the future resolves or `timeout` elapses. Returns `None` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<bool> {
        let (state, _timeout_result) = self
            .inner
            .resolved
            .wait_timeout_while(self.lock(), timeout, |state| state.result.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        state.result
    }

    fn lock(&self) -> MutexGuard<'_, StartState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Future for StartFuture {
    type Output = bool;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<bool> {
        let mut state = self.lock();
        match state.result {
            Some(result) => Poll::Ready(result),
            None => {
                if !state.wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
                    state.wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

impl std::fmt::Debug for StartFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StartFuture")
            .field("result", &self.result())
            .finish()
    }
}

/// Update processor used when the SDK is configured offline.
///
/// Never contacts the flag service and never writes to the data store. Evaluation relies on data
/// loaded from storage or on the caller's defaults.
#[derive(Debug, Default)]
pub struct NullUpdateProcessor {
    started: AtomicBool,
}

impl NullUpdateProcessor {
    /// Create a new offline processor.
    pub fn new() -> NullUpdateProcessor {
        NullUpdateProcessor::default()
    }
}

impl UpdateProcessor for NullUpdateProcessor {
    fn start(&self) -> StartFuture {
        self.started.store(true, Ordering::SeqCst);
        StartFuture::resolved(true)
    }

    fn initialized(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    fn dispose(&self) {}
}
