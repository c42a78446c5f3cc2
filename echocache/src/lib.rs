//! # Echo cache
//!
//! A keyed cache for values produced by async functions, where concurrent
//! requests for the same missing key share one computation. The first caller
//! starts the computation on the tokio runtime and every caller arriving while
//! it runs hears the same answer echoed back.
//!
//! Successful values are kept until they expire (or forever without a
//! lifetime). Expired values are dropped when they are next looked up, or
//! swept whenever a new value is stored. Errors are handed to every waiter and
//! then forgotten, so the next request tries again.
//!
//! ```
//! # async fn example() {
//! use std::time::Duration;
//! use echocache::EchoCache;
//!
//! let cache: EchoCache<String, String, String> = EchoCache::new(Some(Duration::from_secs(60)));
//!
//! let page = cache
//!     .get_or_try_insert_with("/".to_owned(), || async { Ok("<html>".to_owned()) })
//!     .await
//!     .unwrap();
//! assert_eq!(page, "<html>");
//! # }
//! ```

use std::{
    collections::HashMap,
    fmt,
    future::Future,
    hash::Hash,
    pin::Pin,
    sync::{Arc, Weak},
    time::Duration,
};

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::Instant;

type BoxFut<'f, O> = Pin<Box<dyn Future<Output = O> + Send + 'f>>;

#[derive(Debug)]
struct RequestInner<T> {
    inflight: Option<Weak<broadcast::Sender<T>>>,
}

impl<T> RequestInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn get_receiver(&self) -> Option<broadcast::Receiver<T>> {
        self.inflight
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|tx| tx.subscribe())
    }
}

/// A waiter on an in-flight computation.
struct Handle<T> {
    fut: BoxFut<'static, Result<T, RecvError>>,
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle").finish()
    }
}

impl<T> Future for Handle<T> {
    type Output = Result<T, RecvError>;

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        self.fut.poll_unpin(cx)
    }
}

impl<T> Handle<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn new(mut receiver: broadcast::Receiver<T>) -> Self {
        Self {
            fut: Box::pin(async move { receiver.recv().await }),
        }
    }
}

/// A coalesced computation: at most one runs at a time, and everyone asking
/// while it runs gets its result.
#[derive(Debug)]
struct Request<T> {
    inner: Arc<Mutex<RequestInner<T>>>,
}

impl<T> Clone for Request<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Request<T> {
    fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Request<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RequestInner { inflight: None })),
        }
    }

    /// Join the in-flight computation, or start `f` if there is none.
    fn handle<F>(&self, f: F) -> Handle<T>
    where
        F: FnOnce() -> BoxFut<'static, T>,
    {
        // Hold the lock so no one else can start the computation concurrently.
        let mut inner = self.inner.lock();
        if let Some(rx) = inner.get_receiver() {
            tracing::trace!("joining in-flight computation");
            return Handle::new(rx);
        }

        let (tx, rx) = broadcast::channel::<T>(1);
        let tx = Arc::new(tx);
        inner.inflight = Some(Arc::downgrade(&tx));

        let fut = (f)();
        let shared = Arc::clone(&self.inner);
        tracing::trace!("starting computation");
        tokio::spawn(async move {
            let res = fut.await;

            // Send under the lock, so a subscriber can't sneak in between
            // the send and clearing the in-flight marker and miss the result.
            let mut inner = shared.lock();
            inner.inflight = None;
            let _ = tx.send(res);
        });

        Handle::new(rx)
    }
}

#[derive(Debug)]
enum Slot<V, E> {
    Inflight(Request<Result<V, E>>),
    Cached { value: V, expires: Option<Instant> },
}

impl<V, E> Slot<V, E> {
    fn fresh(&self) -> Option<&V> {
        match self {
            Slot::Cached { value, .. } if !self.expired() => Some(value),
            _ => None,
        }
    }

    fn expired(&self) -> bool {
        match self {
            Slot::Cached {
                expires: Some(expires),
                ..
            } => *expires <= Instant::now(),
            _ => false,
        }
    }

    fn started_by(&self, request: &Request<Result<V, E>>) -> bool {
        matches!(self, Slot::Inflight(inflight) if inflight.same(request))
    }
}

/// Why [`EchoCache::get_or_try_insert_with`] produced no value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EchoError<E> {
    /// The computation failed.
    Failed(E),

    /// The computation stopped without an answer (it panicked, or the runtime
    /// shut down).
    Abandoned,
}

impl<E: fmt::Display> fmt::Display for EchoError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EchoError::Failed(error) => error.fmt(f),
            EchoError::Abandoned => f.write_str("cached computation was abandoned"),
        }
    }
}

impl<E> std::error::Error for EchoError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EchoError::Failed(error) => error.source(),
            EchoError::Abandoned => None,
        }
    }
}

/// A keyed, expiring, request-coalescing cache.
///
/// Clones share the same entries.
pub struct EchoCache<K, V, E> {
    entries: Arc<Mutex<HashMap<K, Slot<V, E>>>>,
    lifetime: Option<Duration>,
}

impl<K, V, E> fmt::Debug for EchoCache<K, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EchoCache")
            .field("entries", &self.entries.lock().len())
            .field("lifetime", &self.lifetime)
            .finish()
    }
}

impl<K, V, E> Clone for EchoCache<K, V, E> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            lifetime: self.lifetime,
        }
    }
}

impl<K, V, E> Default for EchoCache<K, V, E> {
    fn default() -> Self {
        Self::new(None)
    }
}

impl<K, V, E> EchoCache<K, V, E> {
    /// An empty cache. Values live for `lifetime`, or forever with `None`.
    #[must_use]
    pub fn new(lifetime: Option<Duration>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            lifetime,
        }
    }

    /// Drop every entry. In-flight computations still answer their waiters,
    /// but their results are not kept.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of entries held, including in-flight computations and expired
    /// values not yet swept.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V, E> EchoCache<K, V, E>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// The cached value for `key`, if there is a fresh one.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock();
        if entries.get(key).is_some_and(Slot::expired) {
            entries.remove(key);
            return None;
        }
        entries.get(key).and_then(Slot::fresh).cloned()
    }

    /// Drop the entry for `key`.
    pub fn invalidate(&self, key: &K) {
        self.entries.lock().remove(key);
    }

    /// Return the fresh value for `key`, join the computation already running
    /// for it, or start `f` and cache what it produces.
    pub async fn get_or_try_insert_with<F, Fut>(&self, key: K, f: F) -> Result<V, EchoError<E>>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let handle = {
            let mut entries = self.entries.lock();
            if let Some(value) = entries.get(&key).and_then(Slot::fresh) {
                return Ok(value.clone());
            }

            match entries.get(&key) {
                Some(Slot::Inflight(request)) => request.handle(|| Box::pin(f())),
                _ => {
                    let request = Request::new();
                    let ours = request.clone();
                    let handle = request.handle(|| {
                        let entries = Arc::clone(&self.entries);
                        let lifetime = self.lifetime;
                        let key = key.clone();
                        let fut = f();
                        Box::pin(async move {
                            let result = fut.await;

                            let mut entries = entries.lock();
                            // Only fill the slot we started; it may have been
                            // invalidated and handed to a newer computation.
                            let started = entries
                                .get(&key)
                                .is_some_and(|slot| slot.started_by(&ours));
                            match &result {
                                Ok(value) if started => {
                                    entries.retain(|_, slot| !slot.expired());
                                    let expires = lifetime.map(|lifetime| Instant::now() + lifetime);
                                    entries.insert(
                                        key,
                                        Slot::Cached {
                                            value: value.clone(),
                                            expires,
                                        },
                                    );
                                }
                                Err(_) if started => {
                                    entries.remove(&key);
                                }
                                _ => {}
                            }
                            result
                        })
                    });

                    entries.insert(key, Slot::Inflight(request));
                    handle
                }
            }
        };

        match handle.await {
            Ok(result) => result.map_err(EchoError::Failed),
            Err(_) => Err(EchoError::Abandoned),
        }
    }
}
