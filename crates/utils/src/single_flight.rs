//! Fetch-once, broadcast-to-many result caches.
//!
//! [`ResultCache`] runs its fetch function at most once at a time. The first
//! caller to find the cache empty performs the fetch; every caller arriving
//! while that fetch is in flight parks on a watch channel and receives a clone
//! of the same `Result`. Once the fetch completes the result (including an
//! error) is kept until [`ResultCache::refresh`] or [`ResultCache::invalidate`]
//! is called.
//!
//! The state mutex only guards transitions. It is never held across an
//! `.await`, so unrelated caches never serialize on each other and a slow
//! fetch never blocks callers from joining it.

use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::watch;

type FetchFn<T, E> = Box<dyn Fn() -> BoxFuture<'static, Result<T, E>> + Send + Sync>;
type KeyedFetchFn<K, T, E> = Arc<dyn Fn(K) -> BoxFuture<'static, Result<T, E>> + Send + Sync>;
type Broadcast<T, E> = Option<Result<T, E>>;

/// Observable state of a [`ResultCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Empty,
    Fetching,
    Ready,
}

enum State<T, E> {
    Empty,
    Fetching {
        generation: u64,
        rx: watch::Receiver<Broadcast<T, E>>,
        waiters: usize,
    },
    Ready(Result<T, E>),
}

enum Action<T, E> {
    Wait {
        generation: u64,
        rx: watch::Receiver<Broadcast<T, E>>,
    },
    Fetch {
        generation: u64,
        tx: watch::Sender<Broadcast<T, E>>,
    },
}

/// A permanent-result, single-flight cache around one fetch function.
pub struct ResultCache<T, E> {
    state: Mutex<State<T, E>>,
    fetch: FetchFn<T, E>,
    generations: AtomicU64,
}

impl<T, E> ResultCache<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new<F, Fut>(fetch: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self {
            state: Mutex::new(State::Empty),
            fetch: Box::new(move || fetch().boxed()),
            generations: AtomicU64::new(0),
        }
    }

    /// Returns the cached result, fetching it if nobody has yet.
    ///
    /// Callers that arrive while a fetch is in flight receive that fetch's
    /// result. If the fetching caller is dropped before it completes, parked
    /// callers race to start a new fetch, so exactly one of them takes over.
    pub async fn get(&self) -> Result<T, E> {
        loop {
            let action = {
                let mut state = self.lock_state();
                match &mut *state {
                    State::Ready(result) => return result.clone(),
                    State::Fetching {
                        generation,
                        rx,
                        waiters,
                    } => {
                        *waiters += 1;
                        Action::Wait {
                            generation: *generation,
                            rx: rx.clone(),
                        }
                    }
                    State::Empty => {
                        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
                        let (tx, rx) = watch::channel(None);
                        *state = State::Fetching {
                            generation,
                            rx,
                            waiters: 0,
                        };
                        Action::Fetch { generation, tx }
                    }
                }
            };

            match action {
                Action::Fetch { generation, tx } => return self.run_fetch(generation, tx).await,
                Action::Wait { generation, mut rx } => {
                    let _waiter = WaiterGuard {
                        cache: self,
                        generation,
                    };
                    let outcome = match rx.wait_for(Option::is_some).await {
                        Ok(published) => published.clone(),
                        // sender dropped without publishing: the fetch was abandoned
                        Err(_) => None,
                    };
                    if let Some(result) = outcome {
                        return result;
                    }
                    tracing::debug!(generation, "in-flight fetch abandoned, retrying");
                }
            }
        }
    }

    /// Discards a stored result and fetches again.
    ///
    /// If a fetch is already in flight the caller joins it instead of
    /// starting a second one.
    pub async fn refresh(&self) -> Result<T, E> {
        self.invalidate();
        self.get().await
    }

    /// Discards a stored result without fetching. In-flight fetches are unaffected.
    pub fn invalidate(&self) {
        let mut state = self.lock_state();
        if matches!(&*state, State::Ready(_)) {
            *state = State::Empty;
        }
    }

    /// The stored result, if the cache is ready.
    pub fn peek(&self) -> Option<Result<T, E>> {
        match &*self.lock_state() {
            State::Ready(result) => Some(result.clone()),
            _ => None,
        }
    }

    pub fn state(&self) -> CacheState {
        match &*self.lock_state() {
            State::Empty => CacheState::Empty,
            State::Fetching { .. } => CacheState::Fetching,
            State::Ready(_) => CacheState::Ready,
        }
    }

    /// Number of callers parked on the in-flight fetch.
    pub fn waiter_count(&self) -> usize {
        match &*self.lock_state() {
            State::Fetching { waiters, .. } => *waiters,
            _ => 0,
        }
    }

    async fn run_fetch(&self, generation: u64, tx: watch::Sender<Broadcast<T, E>>) -> Result<T, E> {
        let mut abandon = FetchGuard {
            cache: self,
            generation,
            armed: true,
        };

        let result = (self.fetch)().await;

        {
            let mut state = self.lock_state();
            if matches!(&*state, State::Fetching { generation: g, .. } if *g == generation) {
                *state = State::Ready(result.clone());
            }
        }
        abandon.armed = false;

        tx.send_replace(Some(result.clone()));
        result
    }

    fn lock_state(&self) -> MutexGuard<'_, State<T, E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Resets the cache to `Empty` if the fetching caller is dropped mid-fetch.
///
/// Dropping the cache's receiver together with the caller's sender closes the
/// channel, which wakes every parked waiter.
struct FetchGuard<'a, T, E> {
    cache: &'a ResultCache<T, E>,
    generation: u64,
    armed: bool,
}

impl<T, E> Drop for FetchGuard<'_, T, E> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self
            .cache
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if matches!(&*state, State::Fetching { generation, .. } if *generation == self.generation)
        {
            *state = State::Empty;
        }
    }
}

/// Un-counts a parked waiter whose future is dropped before the fetch finishes.
struct WaiterGuard<'a, T, E> {
    cache: &'a ResultCache<T, E>,
    generation: u64,
}

impl<T, E> Drop for WaiterGuard<'_, T, E> {
    fn drop(&mut self) {
        let mut state = self
            .cache
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let State::Fetching {
            generation,
            waiters,
            ..
        } = &mut *state
        {
            if *generation == self.generation {
                *waiters = waiters.saturating_sub(1);
            }
        }
    }
}

/// One [`ResultCache`] per key, created lazily.
///
/// Fetches for different keys run concurrently; fetches for the same key are
/// single-flight.
pub struct KeyedResultCache<K, T, E>
where
    K: Hash + Eq + Clone,
{
    cells: DashMap<K, Arc<ResultCache<T, E>>>,
    fetch: KeyedFetchFn<K, T, E>,
}

impl<K, T, E> KeyedResultCache<K, T, E>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new<F, Fut>(fetch: F) -> Self
    where
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self {
            cells: DashMap::new(),
            fetch: Arc::new(move |key| fetch(key).boxed()),
        }
    }

    pub async fn get(&self, key: &K) -> Result<T, E> {
        self.cell(key).get().await
    }

    pub async fn refresh(&self, key: &K) -> Result<T, E> {
        self.cell(key).refresh().await
    }

    pub fn invalidate(&self, key: &K) {
        if let Some(cell) = self.cells.get(key) {
            cell.invalidate();
        }
    }

    /// Number of keys that have a cell.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    fn cell(&self, key: &K) -> Arc<ResultCache<T, E>> {
        self.cells
            .entry(key.clone())
            .or_insert_with(|| {
                let fetch = Arc::clone(&self.fetch);
                let key = key.clone();
                Arc::new(ResultCache::new(move || fetch(key.clone())))
            })
            .value()
            .clone()
    }
}
