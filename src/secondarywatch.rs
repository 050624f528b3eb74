use std::collections::hash_map::DefaultHasher;
use std::fmt::Debug;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use futures::{Stream, StreamExt};
use k8s_openapi::api::admissionregistration::v1::MutatingWebhookConfiguration;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Secret, Service, ServiceAccount};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::runtime::Enqueuer;

/// Objects are only passed on when their resourceVersion moved.
fn version_predicate<K: Resource>(obj: &K) -> Option<u64> {
    let mut hasher = DefaultHasher::new();
    obj.meta().resource_version.as_ref()?.hash(&mut hasher);
    Some(hasher.finish())
}

/// Watches on every kind installed for the operand.
pub struct SecondaryWatch<E> {
    client: Client,
    namespace: String,
    enqueuer: Arc<E>,
}

impl<E> SecondaryWatch<E>
where
    E: Enqueuer<Deployment>
        + Enqueuer<DaemonSet>
        + Enqueuer<Pod>
        + Enqueuer<ConfigMap>
        + Enqueuer<Service>
        + Enqueuer<Secret>
        + Enqueuer<ServiceAccount>
        + Enqueuer<MutatingWebhookConfiguration>
        + 'static,
{
    pub fn new(client: Client, namespace: impl Into<String>, enqueuer: E) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            enqueuer: Arc::new(enqueuer),
        }
    }

    /// Start one watch per kind. They run until `shutdown` fires.
    pub fn start(&self, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let client = &self.client;
        let namespace = self.namespace.as_str();
        vec![
            self.spawn(Api::<Deployment>::namespaced(client.clone(), namespace), &shutdown),
            self.spawn(Api::<DaemonSet>::namespaced(client.clone(), namespace), &shutdown),
            self.spawn(Api::<Pod>::namespaced(client.clone(), namespace), &shutdown),
            self.spawn(Api::<ConfigMap>::namespaced(client.clone(), namespace), &shutdown),
            self.spawn(Api::<Service>::namespaced(client.clone(), namespace), &shutdown),
            self.spawn(Api::<Secret>::namespaced(client.clone(), namespace), &shutdown),
            self.spawn(Api::<ServiceAccount>::namespaced(client.clone(), namespace), &shutdown),
            self.spawn(Api::<MutatingWebhookConfiguration>::all(client.clone()), &shutdown),
        ]
    }

    fn spawn<K>(&self, api: Api<K>, shutdown: &CancellationToken) -> JoinHandle<()>
    where
        K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
        E: Enqueuer<K>,
    {
        let objects = watcher(api, watcher::Config::default())
            .default_backoff()
            .touched_objects()
            .predicate_filter(version_predicate);
        tokio::spawn(forward(objects, self.enqueuer.clone(), shutdown.clone()))
    }
}

/// Hand every object of `objects` to `enqueuer` until the stream ends or `shutdown` fires.
///
/// Watch and enqueue failures are logged; neither stops the watch.
pub async fn forward<K, S, E>(objects: S, enqueuer: Arc<E>, shutdown: CancellationToken)
where
    K: Resource<DynamicType = ()>,
    S: Stream<Item = Result<K, watcher::Error>> + Send,
    E: Enqueuer<K> + ?Sized,
{
    let kind = K::kind(&()).to_string();
    info!(kind = %kind, "Starting secondary watch");
    let handle = objects.for_each(|object| {
        let enqueuer = enqueuer.clone();
        let kind = &kind;
        async move {
            match object {
                Ok(object) => match enqueuer.enqueue(&object).await {
                    Ok(()) => debug!(kind = %kind, name = %object.name_any(), "Enqueued owner"),
                    Err(err) => debug!(kind = %kind, name = %object.name_any(), "{}", err),
                },
                Err(err) => warn!(kind = %kind, "watch error: {}", err),
            }
        }
    });
    tokio::select! {
        _ = handle => {}
        _ = shutdown.cancelled() => {}
    }
    debug!(kind = %kind, "Secondary watch stopped");
}
