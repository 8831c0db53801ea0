use std::{rc::Rc, sync::Arc};

use async_trait::async_trait;

use crate::{
    api::{Comment, Post, PostId, Remote, RemoteError},
    cache::{CacheKey, CacheValue, KeyGuard, ResourceCache},
    error::normalize,
    NormalizedError, PostPages, TempIdSource,
};

mod comment;
pub use comment::{CreateComment, DeleteComment, UpdateComment};

mod post;
pub use post::{CreatePost, DeletePost, UpdatePost};

/// What a mutation needs to undo itself
#[derive(Debug)]
pub struct MutationContext {
    /// Value of every touched key right before the optimistic change, `None` if absent
    snapshots: Vec<(CacheKey, Option<CacheValue>)>,
    temp_id: Option<String>,
}

impl MutationContext {
    pub fn temp_id(&self) -> Option<&str> {
        self.temp_id.as_deref()
    }

    pub fn snapshot(&self, key: &CacheKey) -> Option<&CacheValue> {
        self.snapshots
            .iter()
            .find(|(k, _)| k == key)
            .and_then(|(_, v)| v.as_ref())
    }
}

/// One optimistic change to the remote state
#[async_trait(?Send)]
pub trait Mutation {
    type Output;

    fn describe(&self) -> String;

    /// Every cache key the optimistic change or the reconciliation writes to
    fn touched_keys(&self) -> Vec<CacheKey>;

    /// Prefix of the temporary id to generate, for mutations creating an entity
    fn temp_id_prefix(&self) -> Option<&'static str> {
        None
    }

    fn apply_optimistic(&self, cache: &ResourceCache, ctx: &MutationContext);

    async fn send(&self, remote: &dyn Remote) -> Result<Self::Output, RemoteError>;

    /// Folds the confirmed result into the cache; applying it twice changes nothing more
    fn reconcile(&self, cache: &ResourceCache, ctx: &MutationContext, output: &Self::Output);
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    /// Optimistic change applied, request not sent yet
    Begun,
    /// Server answered, answer not folded in yet
    Sent,
    Settled,
}

/// Runs mutations against a cache and a remote
pub struct Orchestrator {
    cache: ResourceCache,
    remote: Rc<dyn Remote>,
    ids: Rc<dyn TempIdSource>,
}

impl Orchestrator {
    pub fn new(cache: ResourceCache, remote: Rc<dyn Remote>, ids: Rc<dyn TempIdSource>) -> Self {
        Orchestrator { cache, remote, ids }
    }

    /// Applies the optimistic change of `mutation`
    ///
    /// Waits first for any other open mutation on the same keys to settle.
    pub async fn begin<M: Mutation>(&self, mutation: M) -> InFlightMutation<'_, M> {
        let keys = mutation.touched_keys();
        let guard = self.cache.hold(&keys).await;
        for k in keys.iter() {
            self.cache.cancel_in_flight(k);
        }
        let ctx = MutationContext {
            snapshots: keys
                .into_iter()
                .map(|k| {
                    let v = self.cache.peek(&k);
                    (k, v)
                })
                .collect(),
            temp_id: mutation.temp_id_prefix().map(|p| self.ids.generate(p)),
        };
        tracing::debug!(mutation = %mutation.describe(), temp_id = ?ctx.temp_id, "applying optimistic change");
        mutation.apply_optimistic(&self.cache, &ctx);
        InFlightMutation {
            orchestrator: self,
            mutation,
            ctx,
            phase: Phase::Begun,
            outcome: None,
            _guard: guard,
        }
    }

    /// Goes through the whole begin / send / reconcile / settle lifecycle
    pub async fn run<M: Mutation>(&self, mutation: M) -> Result<M::Output, NormalizedError> {
        let mut m = self.begin(mutation).await;
        m.send().await;
        m.finish()
    }
}

/// A mutation whose optimistic change is visible in the cache
///
/// Dropping it before [`finish`](InFlightMutation::finish) rolls the change
/// back, exactly like [`cancel`](InFlightMutation::cancel).
pub struct InFlightMutation<'a, M: Mutation> {
    orchestrator: &'a Orchestrator,
    mutation: M,
    ctx: MutationContext,
    phase: Phase,
    outcome: Option<Result<M::Output, RemoteError>>,
    _guard: KeyGuard,
}

impl<'a, M: Mutation> InFlightMutation<'a, M> {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn context(&self) -> &MutationContext {
        &self.ctx
    }

    pub async fn send(&mut self) {
        if self.phase != Phase::Begun {
            return;
        }
        let res = self.mutation.send(&*self.orchestrator.remote).await;
        self.outcome = Some(res);
        self.phase = Phase::Sent;
    }

    /// Reconciles on success, rolls back on failure, and settles either way
    pub fn finish(mut self) -> Result<M::Output, NormalizedError> {
        let res = match self.outcome.take() {
            Some(Ok(output)) => {
                tracing::debug!(mutation = %self.mutation.describe(), "reconciling confirmed change");
                self.mutation
                    .reconcile(&self.orchestrator.cache, &self.ctx, &output);
                Ok(output)
            }
            Some(Err(err)) => {
                let err = normalize(err);
                tracing::warn!(mutation = %self.mutation.describe(), %err, "mutation failed, rolling back");
                self.rollback();
                Err(err)
            }
            None => {
                self.rollback();
                Err(normalize(RemoteError::Other(anyhow::anyhow!(
                    "mutation finished before its request was sent"
                ))))
            }
        };
        self.settle();
        res
    }

    pub fn cancel(mut self) {
        tracing::debug!(mutation = %self.mutation.describe(), "mutation cancelled");
        self.rollback();
        self.settle();
    }

    fn rollback(&self) {
        let cache = &self.orchestrator.cache;
        for (key, snapshot) in self.ctx.snapshots.iter() {
            match snapshot {
                Some(v) => cache.write(key.clone(), v.clone()),
                None => cache.remove(key),
            }
        }
    }

    /// Confirmed or not, the server has the final word: refetch everything touched
    fn settle(&mut self) {
        for (key, _) in self.ctx.snapshots.iter() {
            self.orchestrator.cache.invalidate(key);
        }
        self.phase = Phase::Settled;
    }
}

impl<'a, M: Mutation> Drop for InFlightMutation<'a, M> {
    fn drop(&mut self) {
        if self.phase != Phase::Settled {
            tracing::warn!(mutation = %self.mutation.describe(), "mutation dropped before settling, rolling back");
            self.rollback();
            self.settle();
        }
    }
}

fn edit_posts(cache: &ResourceCache, create: bool, f: impl FnOnce(&mut PostPages)) {
    let edit = |v: CacheValue| match v {
        CacheValue::Posts(mut p) => {
            f(Arc::make_mut(&mut p));
            CacheValue::Posts(p)
        }
        other => other,
    };
    match create {
        true => cache.update_in_place(&CacheKey::Posts, edit),
        false => cache.update_existing(&CacheKey::Posts, edit),
    }
}

fn edit_post(cache: &ResourceCache, id: &PostId, f: impl FnOnce(&mut Post)) {
    cache.update_existing(&CacheKey::Post(id.clone()), |v| match v {
        CacheValue::Post(mut p) => {
            f(Arc::make_mut(&mut p));
            CacheValue::Post(p)
        }
        other => other,
    })
}

fn edit_comments(
    cache: &ResourceCache,
    post: &PostId,
    create: bool,
    f: impl FnOnce(&mut Vec<Comment>),
) {
    let key = CacheKey::Comments(post.clone());
    let edit = |v: CacheValue| match v {
        CacheValue::Comments(mut c) => {
            f(Arc::make_mut(&mut c));
            CacheValue::Comments(c)
        }
        other => other,
    };
    match create {
        true => cache.update_in_place(&key, edit),
        false => cache.update_existing(&key, edit),
    }
}
