//! The controller harness: watch, queue, workers.
//!
//! A [`Controller`] keeps a reflector cache of its primary kind, turns every watch event
//! into a [`ReconcileRequest`] on a [`WorkQueue`] and runs a fixed number of workers that
//! hand requests to a [`Reconciler`].

use std::fmt::{self, Debug, Display};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use kube::runtime::reflector::{self, store::Writer, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{Error, Result};

pub mod clock;
pub mod context;
pub mod ownership;
pub mod workqueue;

pub use clock::{Clock, SystemClock};
pub use context::OperandContext;
pub use workqueue::WorkQueue;

pub const DEFAULT_WORKERS: usize = 1;
pub const DEFAULT_RESYNC_PERIOD: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_CACHE_SYNC_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Identifies the object a reconcile pass works on.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ReconcileRequest {
    pub namespace: Option<String>,
    pub name: String,
}

impl ReconcileRequest {
    pub fn new(namespace: Option<String>, name: impl Into<String>) -> Self {
        Self {
            namespace,
            name: name.into(),
        }
    }

    pub fn for_object<K: Resource>(object: &K) -> Self {
        Self::new(object.namespace(), object.name_any())
    }
}

impl Display for ReconcileRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{}/{}", namespace, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// What the worker should do with a request after a successful pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcileResult {
    pub requeue: bool,
    pub requeue_after: Option<Duration>,
}

impl ReconcileResult {
    pub fn requeue() -> Self {
        Self {
            requeue: true,
            requeue_after: None,
        }
    }

    pub fn requeue_after(after: Duration) -> Self {
        Self {
            requeue: true,
            requeue_after: Some(after),
        }
    }

    pub fn is_requeue(&self) -> bool {
        self.requeue || self.requeue_after.is_some_and(|after| !after.is_zero())
    }
}

#[async_trait]
pub trait Reconciler: Send + Sync {
    async fn reconcile(&self, request: &ReconcileRequest) -> Result<ReconcileResult>;
}

/// Feeds requests into a controller's queue, typically from watches on owned objects.
#[async_trait]
pub trait Enqueuer<T>: Send + Sync {
    async fn enqueue(&self, owned: &T) -> Result<()>;
}

type StartedHook = Box<dyn FnOnce() + Send>;

pub struct Controller<K>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    name: String,
    workers: usize,
    resync_period: Option<Duration>,
    cache_sync_timeout: Duration,
    queue: WorkQueue<ReconcileRequest>,
    store: Store<K>,
    writer: Writer<K>,
    reconciler: Arc<dyn Reconciler>,
    on_started: Option<StartedHook>,
}

impl<K> Controller<K>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    /// The queue and cache are created before the reconciler so the reconciler (and any
    /// enqueuer) can share them.
    pub fn new(
        name: impl Into<String>,
        queue: WorkQueue<ReconcileRequest>,
        (store, writer): (Store<K>, Writer<K>),
        reconciler: Arc<dyn Reconciler>,
    ) -> Self {
        Self {
            name: name.into(),
            workers: DEFAULT_WORKERS,
            resync_period: Some(DEFAULT_RESYNC_PERIOD),
            cache_sync_timeout: DEFAULT_CACHE_SYNC_TIMEOUT,
            queue,
            store,
            writer,
            reconciler,
            on_started: None,
        }
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Re-enqueue every cached object at this interval. `None` disables it.
    pub fn resync_period(mut self, period: Option<Duration>) -> Self {
        self.resync_period = period.filter(|period| !period.is_zero());
        self
    }

    pub fn cache_sync_timeout(mut self, timeout: Duration) -> Self {
        self.cache_sync_timeout = timeout;
        self
    }

    /// Called once the cache has synced and the workers are running.
    pub fn on_started(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_started = Some(Box::new(hook));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn queue(&self) -> WorkQueue<ReconcileRequest> {
        self.queue.clone()
    }

    pub fn store(&self) -> Store<K> {
        self.store.clone()
    }

    pub fn reconciler(&self) -> Arc<dyn Reconciler> {
        self.reconciler.clone()
    }

    /// Drive the controller until `shutdown` fires.
    ///
    /// Fails when the cache does not sync within the configured timeout.
    pub async fn run<S>(self, events: S, shutdown: CancellationToken) -> Result<()>
    where
        S: Stream<Item = watcher::Result<watcher::Event<K>>> + Send + 'static,
    {
        let Controller {
            name,
            workers,
            resync_period,
            cache_sync_timeout,
            queue,
            store,
            writer,
            reconciler,
            on_started,
        } = self;

        info!(controller = %name, "starting informer");
        let informer = tokio::spawn(inform(
            name.clone(),
            reflector::reflector(writer, events.default_backoff()),
            queue.clone(),
            shutdown.clone(),
        ));

        info!(controller = %name, "waiting for informer cache to sync");
        let synced = tokio::select! {
            ready = tokio::time::timeout(cache_sync_timeout, store.wait_until_ready()) => matches!(ready, Ok(Ok(()))),
            _ = shutdown.cancelled() => false,
        };
        if !synced {
            queue.shut_down().await;
            informer.abort();
            return Err(Error::CacheSyncFailed { controller: name });
        }

        let handles: Vec<_> = (0..workers)
            .map(|_| tokio::spawn(work(name.clone(), queue.clone(), reconciler.clone())))
            .collect();
        let resync = resync_period.map(|period| {
            tokio::spawn(resync_loop(period, store.clone(), queue.clone(), shutdown.clone()))
        });
        info!(controller = %name, "started {} worker(s)", workers);
        if let Some(hook) = on_started {
            hook();
        }

        shutdown.cancelled().await;

        info!(controller = %name, "shutting down queue");
        queue.shut_down().await;
        for handle in futures::future::join_all(handles).await {
            if let Err(err) = handle {
                error!(controller = %name, "worker terminated abnormally: {}", err);
            }
        }
        if let Some(resync) = resync {
            resync.abort();
        }
        informer.abort();
        Ok(())
    }
}

async fn inform<K, S>(
    name: String,
    events: S,
    queue: WorkQueue<ReconcileRequest>,
    shutdown: CancellationToken,
) where
    K: Resource + Send + Sync + 'static,
    S: Stream<Item = watcher::Result<watcher::Event<K>>> + Send,
{
    let handle = events.for_each(|event| {
        let queue = queue.clone();
        let name = &name;
        async move {
            match event {
                Ok(watcher::Event::Apply(object))
                | Ok(watcher::Event::InitApply(object))
                | Ok(watcher::Event::Delete(object)) => {
                    queue.add(ReconcileRequest::for_object(&object)).await;
                }
                Ok(watcher::Event::Init) | Ok(watcher::Event::InitDone) => {}
                Err(err) => warn!(controller = %name, "watch error: {}", err),
            }
        }
    });
    tokio::select! {
        _ = handle => {}
        _ = shutdown.cancelled() => {}
    }
}

async fn resync_loop<K>(
    period: Duration,
    store: Store<K>,
    queue: WorkQueue<ReconcileRequest>,
    shutdown: CancellationToken,
) where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
{
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for object in store.state() {
                    queue.add(ReconcileRequest::for_object(object.as_ref())).await;
                }
            }
            _ = shutdown.cancelled() => return,
        }
    }
}

/// Pull requests off the queue until it shuts down.
async fn work(name: String, queue: WorkQueue<ReconcileRequest>, reconciler: Arc<dyn Reconciler>) {
    debug!(controller = %name, "starting to process work item(s)");
    while let Some(request) = queue.get().await {
        match reconciler.reconcile(&request).await {
            Err(err) => {
                queue.add_rate_limited(request.clone()).await;
                error!(controller = %name, "error syncing '{}': {}, requeuing", request, err);
            }
            Ok(ReconcileResult {
                requeue_after: Some(after),
                ..
            }) if !after.is_zero() => {
                queue.forget(&request).await;
                queue.add_after(request.clone(), after).await;
            }
            Ok(ReconcileResult { requeue: true, .. }) => {
                queue.add_rate_limited(request.clone()).await;
            }
            Ok(_) => queue.forget(&request).await,
        }
        queue.done(&request).await;
    }
    debug!(controller = %name, "shutting down");
}
