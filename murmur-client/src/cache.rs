use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
    fmt,
    rc::Rc,
    sync::Arc,
};

use async_trait::async_trait;
use chrono::Utc;
use futures::{
    channel::oneshot,
    future::{AbortHandle, AbortRegistration, Abortable},
    task::{LocalSpawn, LocalSpawnExt},
    FutureExt,
};

use crate::{
    api::{Comment, Post, PostId, RemoteError, Time},
    error::normalize,
    fetch::with_retries,
    NormalizedError, PostPages,
};

/// Logical address of a cached resource
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum CacheKey {
    /// The paginated posts collection
    Posts,
    /// Detail of one post
    Post(PostId),
    /// Flat comment list of one post
    Comments(PostId),
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Posts => write!(f, "posts"),
            CacheKey::Post(id) => write!(f, "post/{id}"),
            CacheKey::Comments(id) => write!(f, "comments/{id}"),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CacheValue {
    Posts(Arc<PostPages>),
    Post(Arc<Post>),
    Comments(Arc<Vec<Comment>>),
}

impl CacheValue {
    pub fn as_posts(&self) -> Option<&Arc<PostPages>> {
        match self {
            CacheValue::Posts(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_post(&self) -> Option<&Arc<Post>> {
        match self {
            CacheValue::Post(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_comments(&self) -> Option<&Arc<Vec<Comment>>> {
        match self {
            CacheValue::Comments(c) => Some(c),
            _ => None,
        }
    }
}

/// Metadata of a cache entry
#[derive(Clone, Debug)]
pub struct EntryStatus {
    pub stale: bool,
    pub fetching: bool,
    pub updated_at: Time,
    /// Why the last background refetch gave up, if it did
    pub last_error: Option<NormalizedError>,
}

/// Loads the authoritative value behind a key
#[async_trait(?Send)]
pub trait Fetcher {
    async fn fetch(&self, key: &CacheKey, current: Option<CacheValue>)
        -> Result<CacheValue, RemoteError>;
}

/// Proof that a fetch was started, needed to store its result
#[derive(Debug)]
pub struct FetchTicket {
    key: CacheKey,
    generation: u64,
}

impl FetchTicket {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }
}

struct Entry {
    value: CacheValue,
    stale: bool,
    updated_at: Time,
    last_error: Option<NormalizedError>,
}

struct InFlight {
    generation: u64,
    abort: Option<AbortHandle>,
}

struct Background {
    fetcher: Rc<dyn Fetcher>,
    spawner: Rc<dyn LocalSpawn>,
    retries: u32,
}

struct State {
    page_size: usize,
    entries: HashMap<CacheKey, Entry>,
    in_flight: HashMap<CacheKey, InFlight>,
    next_generation: u64,
    /// Keys an open mutation works on, along with whoever waits for them
    held: HashMap<CacheKey, Vec<oneshot::Sender<()>>>,
    background: Option<Background>,
}

/// The in-memory store every other component reads from
///
/// Cloning gives another handle on the same store. It is meant to be used from
/// a single thread: no borrow of the state outlives a method call, so handles
/// can be freely used across await points.
#[derive(Clone)]
pub struct ResourceCache {
    state: Rc<RefCell<State>>,
}

impl ResourceCache {
    pub fn new(page_size: usize) -> ResourceCache {
        ResourceCache {
            state: Rc::new(RefCell::new(State {
                page_size,
                entries: HashMap::new(),
                in_flight: HashMap::new(),
                next_generation: 0,
                held: HashMap::new(),
                background: None,
            })),
        }
    }

    pub fn page_size(&self) -> usize {
        self.state.borrow().page_size
    }

    /// Enables background refetching of stale entries on read
    pub fn register_fetcher(
        &self,
        fetcher: Rc<dyn Fetcher>,
        spawner: Rc<dyn LocalSpawn>,
        retries: u32,
    ) {
        self.state.borrow_mut().background = Some(Background {
            fetcher,
            spawner,
            retries,
        });
    }

    /// Cancels everything pending and drops all entries
    pub fn teardown(&self) {
        let mut st = self.state.borrow_mut();
        for (_, f) in st.in_flight.drain() {
            if let Some(abort) = f.abort {
                abort.abort();
            }
        }
        st.entries.clear();
        st.held.clear();
        st.background = None;
    }

    /// Current value, without scheduling anything
    pub(crate) fn peek(&self, key: &CacheKey) -> Option<CacheValue> {
        self.state.borrow().entries.get(key).map(|e| e.value.clone())
    }

    /// Current value of `key`; a stale entry also gets refetched in the background
    pub fn read(&self, key: &CacheKey) -> Option<CacheValue> {
        let (value, refetch) = {
            let st = self.state.borrow();
            match st.entries.get(key) {
                None => (None, false),
                Some(e) => {
                    let refetch = e.stale
                        && e.last_error.is_none()
                        && st.background.is_some()
                        && !st.in_flight.contains_key(key)
                        && !st.held.contains_key(key);
                    (Some(e.value.clone()), refetch)
                }
            }
        };
        if refetch {
            self.spawn_refetch(key.clone());
        }
        value
    }

    pub fn posts(&self) -> Option<Arc<PostPages>> {
        self.read(&CacheKey::Posts)
            .and_then(|v| v.as_posts().cloned())
    }

    pub fn post(&self, id: &PostId) -> Option<Arc<Post>> {
        self.read(&CacheKey::Post(id.clone()))
            .and_then(|v| v.as_post().cloned())
    }

    pub fn comments(&self, post: &PostId) -> Option<Arc<Vec<Comment>>> {
        self.read(&CacheKey::Comments(post.clone()))
            .and_then(|v| v.as_comments().cloned())
    }

    pub fn status(&self, key: &CacheKey) -> Option<EntryStatus> {
        let st = self.state.borrow();
        st.entries.get(key).map(|e| EntryStatus {
            stale: e.stale,
            fetching: st.in_flight.contains_key(key),
            updated_at: e.updated_at,
            last_error: e.last_error.clone(),
        })
    }

    /// Replaces the value of `key`, which becomes fresh
    pub(crate) fn write(&self, key: CacheKey, value: CacheValue) {
        tracing::trace!(%key, "cache write");
        self.state.borrow_mut().entries.insert(
            key,
            Entry {
                value,
                stale: false,
                updated_at: Utc::now(),
                last_error: None,
            },
        );
    }

    fn empty_value(&self, key: &CacheKey) -> Option<CacheValue> {
        match key {
            CacheKey::Posts => Some(CacheValue::Posts(Arc::new(PostPages::new(
                self.page_size(),
            )))),
            CacheKey::Comments(_) => Some(CacheValue::Comments(Arc::new(Vec::new()))),
            CacheKey::Post(_) => None,
        }
    }

    /// Transforms the current value, starting from an empty one if there is
    /// none; keys without an empty value are left alone
    pub(crate) fn update_in_place(&self, key: &CacheKey, f: impl FnOnce(CacheValue) -> CacheValue) {
        if let Some(current) = self.peek(key).or_else(|| self.empty_value(key)) {
            self.write(key.clone(), f(current));
        }
    }

    /// Transforms the current value, if there is one
    pub(crate) fn update_existing(&self, key: &CacheKey, f: impl FnOnce(CacheValue) -> CacheValue) {
        if let Some(current) = self.peek(key) {
            self.write(key.clone(), f(current));
        }
    }

    /// Marks `key` as needing a refetch
    pub fn invalidate(&self, key: &CacheKey) {
        if let Some(e) = self.state.borrow_mut().entries.get_mut(key) {
            tracing::trace!(%key, "cache invalidate");
            e.stale = true;
            e.last_error = None;
        }
    }

    pub(crate) fn remove(&self, key: &CacheKey) {
        self.cancel_in_flight(key);
        self.state.borrow_mut().entries.remove(key);
    }

    /// Aborts the pending fetch of `key`, whose result will be discarded if it still arrives
    pub(crate) fn cancel_in_flight(&self, key: &CacheKey) {
        if let Some(f) = self.state.borrow_mut().in_flight.remove(key) {
            tracing::debug!(%key, "cancelling in-flight fetch");
            if let Some(abort) = f.abort {
                abort.abort();
            }
        }
    }

    fn register_fetch(&self, key: &CacheKey, abort: Option<AbortHandle>) -> FetchTicket {
        self.cancel_in_flight(key);
        let mut st = self.state.borrow_mut();
        st.next_generation += 1;
        let generation = st.next_generation;
        st.in_flight
            .insert(key.clone(), InFlight { generation, abort });
        FetchTicket {
            key: key.clone(),
            generation,
        }
    }

    /// Starts a fetch of `key`, superseding any other one in flight
    pub(crate) fn begin_fetch(&self, key: &CacheKey) -> FetchTicket {
        self.register_fetch(key, None)
    }

    fn take_ticket(&self, ticket: &FetchTicket) -> bool {
        let mut st = self.state.borrow_mut();
        match st.in_flight.get(&ticket.key) {
            Some(f) if f.generation == ticket.generation => {
                st.in_flight.remove(&ticket.key);
                true
            }
            _ => false,
        }
    }

    /// Returns whether the ticket was still current and `value` got stored
    pub(crate) fn complete_fetch(&self, ticket: FetchTicket, value: CacheValue) -> bool {
        if !self.take_ticket(&ticket) {
            tracing::debug!(key = %ticket.key, "discarding result of a cancelled fetch");
            return false;
        }
        self.write(ticket.key, value);
        true
    }

    /// Like [`complete_fetch`](Self::complete_fetch), for a fetch that only
    /// brought part of the entry: a stale entry stays stale
    pub(crate) fn complete_partial_fetch(&self, ticket: FetchTicket, value: CacheValue) -> bool {
        let key = ticket.key.clone();
        let was_stale = self
            .state
            .borrow()
            .entries
            .get(&key)
            .map_or(false, |e| e.stale);
        if !self.complete_fetch(ticket, value) {
            return false;
        }
        if was_stale {
            self.invalidate(&key);
        }
        true
    }

    /// Releases the ticket without storing anything
    pub(crate) fn abandon_fetch(&self, ticket: FetchTicket) {
        self.take_ticket(&ticket);
    }

    fn fail_fetch(&self, ticket: FetchTicket, err: NormalizedError) {
        if !self.take_ticket(&ticket) {
            return;
        }
        if err.is_not_found() && matches!(ticket.key, CacheKey::Post(_)) {
            tracing::info!(key = %ticket.key, "resource is gone, evicting");
            self.state.borrow_mut().entries.remove(&ticket.key);
            return;
        }
        tracing::warn!(key = %ticket.key, %err, "background refetch failed");
        if let Some(e) = self.state.borrow_mut().entries.get_mut(&ticket.key) {
            e.last_error = Some(err);
        }
    }

    fn spawn_refetch(&self, key: CacheKey) {
        let (fetcher, spawner, retries) = match &self.state.borrow().background {
            None => return,
            Some(b) => (b.fetcher.clone(), b.spawner.clone(), b.retries),
        };
        let current = self.peek(&key);
        let (abort, registration): (AbortHandle, AbortRegistration) = AbortHandle::new_pair();
        let ticket = self.register_fetch(&key, Some(abort));
        tracing::debug!(%key, "starting background refetch");
        let cache = self.clone();
        let refetch = async move {
            let res = with_retries(retries, &ticket.key, || {
                fetcher.fetch(&ticket.key, current.clone())
            })
            .await;
            match res {
                Ok(value) => {
                    cache.complete_fetch(ticket, value);
                }
                Err(err) => cache.fail_fetch(ticket, normalize(err)),
            }
        };
        if let Err(err) = spawner.spawn_local(Abortable::new(refetch, registration).map(|_| ())) {
            tracing::error!(%key, ?err, "failed spawning background refetch");
            self.cancel_in_flight(&key);
        }
    }

    /// Waits until no open mutation holds any of `keys`, then holds them all
    pub(crate) async fn hold(&self, keys: &[CacheKey]) -> KeyGuard {
        loop {
            let wait = {
                let mut st = self.state.borrow_mut();
                match keys.iter().find(|k| st.held.contains_key(*k)).cloned() {
                    None => {
                        for k in keys {
                            st.held.insert(k.clone(), Vec::new());
                        }
                        None
                    }
                    Some(busy) => {
                        let (sender, receiver) = oneshot::channel();
                        if let Some(waiters) = st.held.get_mut(&busy) {
                            waiters.push(sender);
                        }
                        Some(receiver)
                    }
                }
            };
            match wait {
                None => {
                    return KeyGuard {
                        cache: self.clone(),
                        keys: keys.iter().cloned().collect(),
                    }
                }
                Some(receiver) => {
                    let _ = receiver.await;
                }
            }
        }
    }

    /// Waits until no open mutation holds `key`
    pub(crate) async fn wait_released(&self, key: &CacheKey) {
        loop {
            let receiver = {
                let mut st = self.state.borrow_mut();
                match st.held.get_mut(key) {
                    None => return,
                    Some(waiters) => {
                        let (sender, receiver) = oneshot::channel();
                        waiters.push(sender);
                        receiver
                    }
                }
            };
            let _ = receiver.await;
        }
    }
}

/// Keys held by one open mutation, released on drop
pub(crate) struct KeyGuard {
    cache: ResourceCache,
    keys: HashSet<CacheKey>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        let mut st = self.cache.state.borrow_mut();
        for k in self.keys.iter() {
            for waiter in st.held.remove(k).into_iter().flatten() {
                let _ = waiter.send(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comment::tests::comment;
    use futures::executor::LocalPool;
    use std::cell::Cell;

    fn comments_key() -> CacheKey {
        CacheKey::Comments(PostId::stub())
    }

    fn comments_value(ids: &[&str]) -> CacheValue {
        CacheValue::Comments(Arc::new(
            ids.iter().map(|id| comment(id, None, 0)).collect(),
        ))
    }

    /// Answers with a fixed value, counting calls and failing the first `failures` ones
    struct CountingFetcher {
        calls: Cell<usize>,
        failures: Cell<usize>,
        failure_status: u16,
        value: CacheValue,
    }

    #[async_trait(?Send)]
    impl Fetcher for CountingFetcher {
        async fn fetch(
            &self,
            _key: &CacheKey,
            _current: Option<CacheValue>,
        ) -> Result<CacheValue, RemoteError> {
            self.calls.set(self.calls.get() + 1);
            if self.failures.get() > 0 {
                self.failures.set(self.failures.get() - 1);
                return Err(RemoteError::Status {
                    status: self.failure_status,
                    body: None,
                });
            }
            Ok(self.value.clone())
        }
    }

    fn setup(failures: usize, failure_status: u16) -> (LocalPool, ResourceCache, Rc<CountingFetcher>) {
        let pool = LocalPool::new();
        let cache = ResourceCache::new(20);
        let fetcher = Rc::new(CountingFetcher {
            calls: Cell::new(0),
            failures: Cell::new(failures),
            failure_status,
            value: comments_value(&["fresh"]),
        });
        cache.register_fetcher(fetcher.clone(), Rc::new(pool.spawner()), 2);
        (pool, cache, fetcher)
    }

    #[test]
    fn update_in_place_starts_from_empty() {
        let cache = ResourceCache::new(20);
        cache.update_in_place(&comments_key(), |v| {
            let mut c = v.as_comments().unwrap().as_ref().clone();
            c.push(comment("1", None, 0));
            CacheValue::Comments(Arc::new(c))
        });
        assert_eq!(cache.peek(&comments_key()), Some(comments_value(&["1"])));

        let detail = CacheKey::Post(PostId::stub());
        cache.update_in_place(&detail, |v| v);
        assert_eq!(cache.peek(&detail), None);
        cache.update_existing(&CacheKey::Posts, |v| v);
        assert_eq!(cache.peek(&CacheKey::Posts), None);
    }

    #[test]
    fn stale_reads_refetch_in_the_background() {
        let (mut pool, cache, fetcher) = setup(0, 500);
        cache.write(comments_key(), comments_value(&["old"]));
        assert_eq!(cache.read(&comments_key()), Some(comments_value(&["old"])));
        pool.run_until_stalled();
        assert_eq!(fetcher.calls.get(), 0, "fresh entries are not refetched");

        cache.invalidate(&comments_key());
        assert_eq!(cache.read(&comments_key()), Some(comments_value(&["old"])));
        assert!(cache.status(&comments_key()).unwrap().fetching);
        pool.run_until_stalled();
        assert_eq!(fetcher.calls.get(), 1);
        assert_eq!(cache.peek(&comments_key()), Some(comments_value(&["fresh"])));
        assert!(!cache.status(&comments_key()).unwrap().stale);
    }

    #[test]
    fn server_errors_are_retried_twice() {
        let (mut pool, cache, fetcher) = setup(2, 503);
        cache.write(comments_key(), comments_value(&["old"]));
        cache.invalidate(&comments_key());
        cache.read(&comments_key());
        pool.run_until_stalled();
        assert_eq!(fetcher.calls.get(), 3);
        assert_eq!(cache.peek(&comments_key()), Some(comments_value(&["fresh"])));
    }

    #[test]
    fn exhausted_retries_are_surfaced() {
        let (mut pool, cache, fetcher) = setup(3, 500);
        cache.write(comments_key(), comments_value(&["old"]));
        cache.invalidate(&comments_key());
        cache.read(&comments_key());
        pool.run_until_stalled();
        assert_eq!(fetcher.calls.get(), 3);
        let status = cache.status(&comments_key()).unwrap();
        assert!(status.stale);
        assert_eq!(status.last_error.unwrap().message, "Server error");

        // no refetch storm on further reads, until the next invalidation
        cache.read(&comments_key());
        pool.run_until_stalled();
        assert_eq!(fetcher.calls.get(), 3);
    }

    #[test]
    fn client_errors_are_not_retried() {
        let (mut pool, cache, fetcher) = setup(1, 400);
        cache.write(comments_key(), comments_value(&["old"]));
        cache.invalidate(&comments_key());
        cache.read(&comments_key());
        pool.run_until_stalled();
        assert_eq!(fetcher.calls.get(), 1);
        assert_eq!(cache.peek(&comments_key()), Some(comments_value(&["old"])));
    }

    #[test]
    fn missing_details_are_evicted() {
        let (mut pool, cache, _) = setup(1, 404);
        let key = CacheKey::Post(PostId::stub());
        cache.write(key.clone(), comments_value(&[]));
        cache.invalidate(&key);
        cache.read(&key);
        pool.run_until_stalled();
        assert_eq!(cache.peek(&key), None);
    }

    #[test]
    fn cancelled_fetches_are_discarded() {
        let (mut pool, cache, fetcher) = setup(0, 500);
        cache.write(comments_key(), comments_value(&["old"]));
        cache.invalidate(&comments_key());
        cache.read(&comments_key());
        cache.cancel_in_flight(&comments_key());
        pool.run_until_stalled();
        assert_eq!(fetcher.calls.get(), 0);
        assert_eq!(cache.peek(&comments_key()), Some(comments_value(&["old"])));

        let ticket = cache.begin_fetch(&comments_key());
        cache.cancel_in_flight(&comments_key());
        assert!(!cache.complete_fetch(ticket, comments_value(&["late"])));
        assert_eq!(cache.peek(&comments_key()), Some(comments_value(&["old"])));
    }

    #[test]
    fn newer_fetches_supersede_older_ones() {
        let cache = ResourceCache::new(20);
        let first = cache.begin_fetch(&comments_key());
        let second = cache.begin_fetch(&comments_key());
        assert!(cache.complete_fetch(second, comments_value(&["2"])));
        assert!(!cache.complete_fetch(first, comments_value(&["1"])));
        assert_eq!(cache.peek(&comments_key()), Some(comments_value(&["2"])));
    }

    #[test]
    fn partial_fetches_keep_entries_stale() {
        let cache = ResourceCache::new(20);
        let fresh = cache.begin_fetch(&comments_key());
        assert!(cache.complete_partial_fetch(fresh, comments_value(&["1"])));
        assert!(!cache.status(&comments_key()).unwrap().stale);

        cache.invalidate(&comments_key());
        let ticket = cache.begin_fetch(&comments_key());
        assert!(cache.complete_partial_fetch(ticket, comments_value(&["1", "2"])));
        assert_eq!(cache.peek(&comments_key()), Some(comments_value(&["1", "2"])));
        assert!(cache.status(&comments_key()).unwrap().stale);
    }

    #[test]
    fn held_keys_are_not_refetched() {
        let (mut pool, cache, fetcher) = setup(0, 500);
        cache.write(comments_key(), comments_value(&["old"]));
        let guard = pool.run_until(cache.hold(&[comments_key()]));
        cache.invalidate(&comments_key());
        cache.read(&comments_key());
        pool.run_until_stalled();
        assert_eq!(fetcher.calls.get(), 0);
        drop(guard);
        cache.read(&comments_key());
        pool.run_until_stalled();
        assert_eq!(fetcher.calls.get(), 1);
    }

    #[test]
    fn holds_queue_up_per_key() {
        let mut pool = LocalPool::new();
        let cache = ResourceCache::new(20);
        let first = pool.run_until(cache.hold(&[comments_key(), CacheKey::Posts]));
        assert!(cache.state.borrow().held.contains_key(&CacheKey::Posts));

        let order = Rc::new(RefCell::new(Vec::new()));
        {
            let (cache, order) = (cache.clone(), order.clone());
            pool.spawner()
                .spawn_local(async move {
                    let _guard = cache.hold(&[CacheKey::Posts]).await;
                    order.borrow_mut().push("second");
                })
                .unwrap();
        }
        pool.run_until_stalled();
        assert!(order.borrow().is_empty());

        // unrelated keys are not blocked
        let other = CacheKey::Comments(PostId(String::from("other")));
        drop(pool.run_until(cache.hold(&[other])));

        drop(first);
        pool.run_until_stalled();
        assert_eq!(*order.borrow(), vec!["second"]);
        assert!(!cache.state.borrow().held.contains_key(&CacheKey::Posts));
    }

    #[test]
    fn teardown_forgets_everything() {
        let (mut pool, cache, fetcher) = setup(0, 500);
        cache.write(comments_key(), comments_value(&["old"]));
        cache.invalidate(&comments_key());
        cache.read(&comments_key());
        cache.teardown();
        pool.run_until_stalled();
        assert_eq!(fetcher.calls.get(), 0);
        assert_eq!(cache.peek(&comments_key()), None);
    }
}
