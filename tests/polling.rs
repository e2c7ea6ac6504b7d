use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use flagsync::{
    DataStore, Error, FlagCacheManager, FlagRequestor, FlagValue, InMemoryStorage,
    PlatformSignals, PollingConfig, PollingProcessor, Result, UpdateProcessor, User,
};

const PAYLOAD: &str = r#"{
    "int-flag": {"value": 15, "version": 1},
    "float-flag": {"value": 13.5, "version": 1},
    "string-flag": {"value": "markw@magenic.com", "version": 1}
}"#;

/// Replies with scripted responses in order, repeating the last one when the script runs out.
struct ScriptedRequestor {
    responses: Mutex<VecDeque<Result<String>>>,
    calls: AtomicUsize,
}

impl ScriptedRequestor {
    fn new(responses: impl IntoIterator<Item = Result<String>>) -> Arc<ScriptedRequestor> {
        Arc::new(ScriptedRequestor {
            responses: Mutex::new(responses.into_iter().collect()),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FlagRequestor for ScriptedRequestor {
    fn fetch(&self, _user: &User) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut responses = self.responses.lock().unwrap();
        if responses.len() > 1 {
            responses.pop_front().unwrap()
        } else {
            responses.front().cloned().unwrap()
        }
    }
}

struct Fixture {
    requestor: Arc<ScriptedRequestor>,
    cache: Arc<FlagCacheManager>,
    signals: PlatformSignals,
    user: User,
    processor: PollingProcessor,
}

fn fixture(responses: impl IntoIterator<Item = Result<String>>) -> Fixture {
    let requestor = ScriptedRequestor::new(responses);
    let store = Arc::new(DataStore::new(Arc::new(InMemoryStorage::new())));
    let cache = Arc::new(FlagCacheManager::new(store));
    let signals = PlatformSignals::default();
    let user = User::with_key("user");
    let processor = PollingProcessor::new(
        requestor.clone(),
        cache.clone(),
        user.clone(),
        PollingConfig::new()
            .with_interval(Duration::from_millis(10))
            .with_jitter(Duration::ZERO),
        signals.clone(),
    );

    Fixture {
        requestor,
        cache,
        signals,
        user,
        processor,
    }
}

fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

const TIMEOUT: Duration = Duration::from_secs(5);

#[test]
fn initial_poll_populates_cache() {
    let f = fixture([Ok(PAYLOAD.to_owned())]);

    assert!(!f.processor.initialized());
    assert_eq!(f.processor.start().wait_timeout(TIMEOUT), Some(true));
    assert!(f.processor.initialized());

    let flags = f.cache.flags_for_user(&f.user);
    assert_eq!(flags.len(), 3);
    assert_eq!(flags["int-flag"].value, FlagValue::from(15));
    assert_eq!(flags["float-flag"].value, FlagValue::Number(13.5));
    assert_eq!(flags["string-flag"].value, FlagValue::from("markw@magenic.com"));

    f.processor.shutdown().unwrap();
}

#[test]
fn start_twice_returns_same_future() {
    let f = fixture([Ok(PAYLOAD.to_owned())]);

    let first = f.processor.start();
    let second = f.processor.start();
    assert_eq!(first.wait_timeout(TIMEOUT), Some(true));
    assert_eq!(second.result(), Some(true));

    f.processor.shutdown().unwrap();
}

#[test]
fn keeps_polling_on_interval() {
    let f = fixture([Ok(PAYLOAD.to_owned())]);

    f.processor.start();
    assert!(wait_until(|| f.requestor.calls() >= 3));

    f.processor.shutdown().unwrap();
}

#[test]
fn failures_keep_cached_flags() {
    let f = fixture([
        Ok(PAYLOAD.to_owned()),
        Err(Error::UnexpectedStatus(500)),
        Ok("not json".to_owned()),
        Err(Error::UnexpectedStatus(503)),
    ]);

    assert_eq!(f.processor.start().wait_timeout(TIMEOUT), Some(true));
    assert!(wait_until(|| f.requestor.calls() >= 5));

    assert!(f.processor.initialized());
    assert_eq!(f.cache.flags_for_user(&f.user).len(), 3);

    f.processor.shutdown().unwrap();
}

#[test]
fn retries_until_first_success() {
    let f = fixture([
        Err(Error::UnexpectedStatus(500)),
        Ok("{\"int-flag\": ".to_owned()),
        Ok(PAYLOAD.to_owned()),
    ]);

    let started = f.processor.start();
    assert_eq!(started.wait_timeout(TIMEOUT), Some(true));
    assert!(f.requestor.calls() >= 3);

    f.processor.shutdown().unwrap();
}

#[test]
fn unauthorized_resolves_false_and_stops() {
    let f = fixture([Err(Error::Unauthorized)]);

    assert_eq!(f.processor.start().wait_timeout(TIMEOUT), Some(false));
    assert!(!f.processor.initialized());

    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(f.requestor.calls(), 1);
    assert!(f.cache.flags_for_user(&f.user).is_empty());

    f.processor.shutdown().unwrap();
}

#[test]
fn pauses_while_in_background() {
    let f = fixture([Ok(PAYLOAD.to_owned())]);
    f.signals.backgrounded.set(true);

    let started = f.processor.start();
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(f.requestor.calls(), 0);
    assert_eq!(started.result(), None);

    f.signals.backgrounded.set(false);
    assert_eq!(started.wait_timeout(TIMEOUT), Some(true));

    f.processor.shutdown().unwrap();
}

#[test]
fn pauses_while_disconnected() {
    let f = fixture([Ok(PAYLOAD.to_owned())]);

    assert_eq!(f.processor.start().wait_timeout(TIMEOUT), Some(true));
    f.signals.connected.set(false);
    // Let an in-flight poll finish.
    std::thread::sleep(Duration::from_millis(30));
    let calls = f.requestor.calls();

    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(f.requestor.calls(), calls);

    f.signals.connected.set(true);
    assert!(wait_until(|| f.requestor.calls() > calls));

    f.processor.shutdown().unwrap();
}

#[test]
fn dispose_stops_polling() {
    let f = fixture([Ok(PAYLOAD.to_owned())]);

    assert_eq!(f.processor.start().wait_timeout(TIMEOUT), Some(true));
    f.processor.shutdown().unwrap();
    let calls = f.requestor.calls();

    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(f.requestor.calls(), calls);
    // Cached data survives disposal.
    assert_eq!(f.cache.flags_for_user(&f.user).len(), 3);
    assert!(f.processor.initialized());

    f.processor.dispose();
}

#[test]
fn start_after_dispose_resolves_false() {
    let f = fixture([Ok(PAYLOAD.to_owned())]);

    f.processor.dispose();
    f.processor.dispose();

    assert_eq!(f.processor.start().result(), Some(false));
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(f.requestor.calls(), 0);
}

#[test]
fn dispose_resolves_pending_future() {
    let f = fixture([Err(Error::UnexpectedStatus(500))]);

    let started = f.processor.start();
    assert!(wait_until(|| f.requestor.calls() >= 1));
    f.processor.dispose();

    assert_eq!(started.wait_timeout(TIMEOUT), Some(false));
}

#[tokio::test]
async fn start_future_can_be_awaited_with_timeout() {
    let f = fixture([Ok(PAYLOAD.to_owned())]);

    let result = tokio::time::timeout(TIMEOUT, f.processor.start()).await;
    assert_eq!(result.ok(), Some(true));

    f.processor.dispose();
}
