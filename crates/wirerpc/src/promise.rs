//! # Promises
//!
//! A `Promise` is the caller's handle to the eventual outcome of one call. It
//! is paired with exactly one `Resolver` (which may be cloned, but resolves at
//! most once across all clones). The first resolution wins and every later
//! attempt is ignored, so a late reply racing a timeout is harmless.
//!
//! Waiting works from both worlds: `wait`/`wait_timeout` block the current
//! thread on a condvar, `resolved().await` parks an async task on a
//! `tokio::sync::Notify`.

use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::time::Duration;

use tokio::sync::Notify;
use wirepack::Unpack;

use crate::error::CallError;
use crate::handles::CorrelationId;

/// What a resolved promise holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The encoded return value.
    Value(Vec<u8>),
    Failed(CallError),
}

impl Outcome {
    pub fn is_value(&self) -> bool {
        matches!(self, Outcome::Value(_))
    }

    pub fn value(&self) -> Option<&[u8]> {
        match self {
            Outcome::Value(bytes) => Some(bytes),
            Outcome::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&CallError> {
        match self {
            Outcome::Value(_) => None,
            Outcome::Failed(e) => Some(e),
        }
    }

    pub fn into_result(self) -> Result<Vec<u8>, CallError> {
        match self {
            Outcome::Value(bytes) => Ok(bytes),
            Outcome::Failed(e) => Err(e),
        }
    }

    /// Decodes the value as `T`; a value of the wrong shape is a decode failure.
    pub fn decode<T: Unpack>(&self) -> Result<T, CallError> {
        match self {
            Outcome::Value(bytes) => Ok(wirepack::from_bytes(bytes)?),
            Outcome::Failed(e) => Err(e.clone()),
        }
    }
}

/// Observable state of a promise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseState {
    Waiting,
    Success,
    Failed,
    /// Failed with a timeout error.
    TimedOut,
}

struct Shared {
    id: CorrelationId,
    outcome: Mutex<Option<Outcome>>,
    ready: Condvar,
    notify: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Option<Outcome>> {
        self.outcome.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone)]
pub struct Promise {
    shared: Arc<Shared>,
}

#[derive(Clone)]
pub struct Resolver {
    shared: Arc<Shared>,
}

impl Promise {
    /// Creates an unresolved promise and its resolver.
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> (Promise, Resolver) {
        Self::with_id(0)
    }

    /// Like `new`, but tagged with the correlation id it waits on.
    pub fn with_id(id: CorrelationId) -> (Promise, Resolver) {
        let shared = Arc::new(Shared {
            id,
            outcome: Mutex::new(None),
            ready: Condvar::new(),
            notify: Notify::new(),
        });
        (Promise { shared: shared.clone() }, Resolver { shared })
    }

    pub fn id(&self) -> CorrelationId {
        self.shared.id
    }

    pub fn state(&self) -> PromiseState {
        match self.shared.lock().as_ref() {
            None => PromiseState::Waiting,
            Some(Outcome::Value(_)) => PromiseState::Success,
            Some(Outcome::Failed(e)) if e.is(crate::error::ErrorKind::Timeout) => {
                PromiseState::TimedOut
            }
            Some(Outcome::Failed(_)) => PromiseState::Failed,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.shared.lock().is_some()
    }

    pub fn succeeded(&self) -> bool {
        self.state() == PromiseState::Success
    }

    /// True for any failure, timeouts included.
    pub fn failed(&self) -> bool {
        matches!(self.state(), PromiseState::Failed | PromiseState::TimedOut)
    }

    /// Returns the outcome without waiting, if there is one.
    pub fn try_get(&self) -> Option<Outcome> {
        self.shared.lock().clone()
    }

    /// Blocks the current thread until the promise resolves.
    ///
    /// Never call this from inside an async task that the resolving side
    /// depends on; use `resolved().await` there.
    pub fn wait(&self) -> Outcome {
        let mut slot = self.shared.lock();
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            slot = self.shared.ready.wait(slot).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Blocks for at most `timeout`. Returns `None` if still unresolved.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Outcome> {
        let slot = self.shared.lock();
        let (slot, _) = self
            .shared
            .ready
            .wait_timeout_while(slot, timeout, |outcome| outcome.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        slot.clone()
    }

    pub async fn resolved(&self) -> Outcome {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            // register interest before checking, or a resolve in between is lost
            notified.as_mut().enable();
            if let Some(outcome) = self.try_get() {
                return outcome;
            }
            notified.await;
        }
    }

    /// Blocks, then decodes the value as `T`.
    pub fn get<T: Unpack>(&self) -> Result<T, CallError> {
        self.wait().decode()
    }

    pub async fn get_async<T: Unpack>(&self) -> Result<T, CallError> {
        self.resolved().await.decode()
    }
}

impl std::fmt::Debug for Promise {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise")
            .field("id", &self.shared.id)
            .field("state", &self.state())
            .finish()
    }
}

impl Resolver {
    pub fn id(&self) -> CorrelationId {
        self.shared.id
    }

    /// Resolves the promise. Returns `false` if it was already resolved.
    pub fn resolve(&self, outcome: Outcome) -> bool {
        let mut slot = self.shared.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(outcome);
        drop(slot);
        self.shared.ready.notify_all();
        self.shared.notify.notify_waiters();
        true
    }

    pub fn fulfill(&self, value: Vec<u8>) -> bool {
        self.resolve(Outcome::Value(value))
    }

    pub fn fail(&self, error: CallError) -> bool {
        self.resolve(Outcome::Failed(error))
    }

    pub fn is_resolved(&self) -> bool {
        self.shared.lock().is_some()
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver").field("id", &self.shared.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_first_resolution_wins() {
        let (promise, resolver) = Promise::new();
        let other = resolver.clone();
        assert!(resolver.fulfill(vec![1]));
        assert!(!other.fail(CallError::internal("late")));
        assert!(!resolver.fulfill(vec![2]));
        assert_eq!(promise.try_get(), Some(Outcome::Value(vec![1])));
        assert!(promise.succeeded());
    }

    #[test]
    fn test_states() {
        let (promise, resolver) = Promise::with_id(5);
        assert_eq!(promise.id(), 5);
        assert_eq!(promise.state(), PromiseState::Waiting);
        resolver.fail(CallError::timeout(Duration::from_millis(1)));
        assert_eq!(promise.state(), PromiseState::TimedOut);
        assert!(promise.failed());
        assert!(!promise.succeeded());
    }

    #[test]
    fn test_wait_timeout_unresolved() {
        let (promise, _resolver) = Promise::new();
        assert_eq!(promise.wait_timeout(Duration::from_millis(10)), None);
    }

    #[test]
    fn test_wait_across_threads() {
        let (promise, resolver) = Promise::new();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            resolver.fulfill(wirepack::to_bytes(&7u32).unwrap())
        });
        assert_eq!(promise.get::<u32>(), Ok(7));
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_wrong_value_shape_is_decode_failure() {
        let (promise, resolver) = Promise::new();
        resolver.fulfill(wirepack::to_bytes("text").unwrap());
        let err = promise.get::<u32>().unwrap_err();
        assert!(err.is(ErrorKind::DecodeFailure));
    }

    #[tokio::test]
    async fn test_resolved_wakes_task() {
        let (promise, resolver) = Promise::new();
        let waiter = tokio::spawn({
            let promise = promise.clone();
            async move { promise.get_async::<String>().await }
        });
        tokio::task::yield_now().await;
        resolver.fulfill(wirepack::to_bytes("done").unwrap());
        assert_eq!(waiter.await.unwrap(), Ok("done".to_string()));
    }

    #[tokio::test]
    async fn test_resolved_after_resolution() {
        let (promise, resolver) = Promise::new();
        resolver.fail(CallError::business(1, "no"));
        assert_eq!(promise.resolved().await, Outcome::Failed(CallError::business(1, "no")));
    }
}
