/// Run one pass step; a `Some` outcome ends the pass with that requeue.
macro_rules! step {
    ($e:expr) => {
        if let Some(requeue) = $e.await? {
            return Ok(requeue);
        }
    };
}

pub mod application;
pub mod backoff;
pub mod converge;
pub mod environment;
pub mod finalizer;
pub mod identity;
pub mod owner;
pub mod shared_map;
pub mod site;
pub mod status;
pub mod sync;

use std::sync::Arc;
use std::time::Duration;

use kube::{Resource, ResourceExt, runtime::controller::Action};
use tracing::{debug, info, warn};

use crate::config::OperatorConfig;
use crate::external::{SqlConnector, SqlError};
use crate::store::StoreError;

use backoff::ErrorBackoff;

/// Delay used for "retry now": long enough for the watch cache to observe
/// the write that triggered it.
pub const REQUEUE_NOW: Duration = Duration::from_millis(200);

#[derive(thiserror::Error, Debug)]
pub enum ReconcileErr {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("sql error: {0}")]
    Sql(#[from] SqlError),
    #[error("invalid job command: {0}")]
    Command(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for ReconcileErr {
    fn from(e: serde_json::Error) -> Self {
        ReconcileErr::Store(StoreError::Serialization(e))
    }
}

impl ReconcileErr {
    /// Lost an optimistic-concurrency race; retried from a fresh read
    /// rather than counted as a failure.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            ReconcileErr::Store(e) if e.is_conflict() || e.is_already_exists()
        )
    }
}

/// Outcome of one reconcile pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    /// Converged; wait for the next watch event.
    Done,
    /// Something was written; look again right away.
    Now,
    /// A dependency is not ready; look again after a fixed delay.
    After(Duration),
}

impl Requeue {
    pub fn into_action(self) -> Action {
        match self {
            Requeue::Done => Action::await_change(),
            Requeue::Now => Action::requeue(REQUEUE_NOW),
            Requeue::After(d) => Action::requeue(d),
        }
    }
}

/// Result of a single step of a pass: `Some` ends the pass early.
pub type Step = Result<Option<Requeue>, ReconcileErr>;

pub struct Context<S> {
    pub store: S,
    pub sql: Arc<dyn SqlConnector>,
    pub cfg: OperatorConfig,
    pub backoff: ErrorBackoff,
}

impl<S> Context<S> {
    pub fn new(store: S, sql: Arc<dyn SqlConnector>, cfg: OperatorConfig) -> Self {
        let backoff = ErrorBackoff::new(
            Duration::from_secs(cfg.retry.error_backoff_base_secs),
            Duration::from_secs(cfg.retry.error_backoff_max_secs),
        );
        Self {
            store,
            sql,
            cfg,
            backoff,
        }
    }
}

/// Treat an unreachable external system as a dependency that is not ready
/// yet; every other SQL failure is a real error.
pub(crate) fn unreachable_as_delay(
    result: Result<(), SqlError>,
    delay: Duration,
    what: &str,
) -> Step {
    match result {
        Ok(()) => Ok(None),
        Err(e) if e.is_unreachable() => {
            info!(%what, error = %e, "unreachable; retrying later");
            Ok(Some(Requeue::After(delay)))
        }
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn object_key<K: Resource<DynamicType = ()>>(obj: &K) -> String {
    match obj.namespace() {
        Some(ns) => format!("{}/{}/{}", K::kind(&()), ns, obj.name_any()),
        None => format!("{}/{}", K::kind(&()), obj.name_any()),
    }
}

/// Maps a finished pass onto the controller's action, resetting the error
/// backoff on success and turning lost races into an immediate retry.
pub(crate) fn finish<K, S>(
    ctx: &Context<S>,
    obj: &K,
    outcome: Result<Requeue, ReconcileErr>,
) -> Result<Action, ReconcileErr>
where
    K: Resource<DynamicType = ()>,
{
    let key = object_key(obj);
    match outcome {
        Ok(requeue) => {
            ctx.backoff.reset(&key);
            Ok(requeue.into_action())
        }
        Err(e) if e.is_conflict() => {
            debug!(%key, error = %e, "conflict; retrying from a fresh read");
            Ok(Requeue::Now.into_action())
        }
        Err(e) => Err(e),
    }
}

pub fn error_policy<K, S>(
    obj: Arc<K>,
    err: &ReconcileErr,
    ctx: Arc<Context<S>>,
) -> Action
where
    K: Resource<DynamicType = ()>,
{
    let key = object_key(obj.as_ref());
    let (attempt, delay) = ctx.backoff.record_failure(&key);
    warn!(
        %key,
        attempt,
        delay_secs = delay.as_secs(),
        error = %err,
        "reconcile failed; backing off"
    );
    Action::requeue(delay)
}
