use async_trait::async_trait;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::{Resource, ResourceExt};
use tracing::debug;

use crate::resources::clusterresourceoverrides::ClusterResourceOverride;
use crate::runtime::{ownership, Enqueuer, ReconcileRequest, WorkQueue};
use crate::{Error, Result};

/// Maps an operand object back to the ClusterResourceOverride that owns it.
#[derive(Clone)]
pub struct OwnerEnqueuer {
    queue: WorkQueue<ReconcileRequest>,
    store: Store<ClusterResourceOverride>,
    owner_annotation_key: String,
}

impl OwnerEnqueuer {
    pub fn new(
        queue: WorkQueue<ReconcileRequest>,
        store: Store<ClusterResourceOverride>,
        owner_annotation_key: impl Into<String>,
    ) -> Self {
        Self {
            queue,
            store,
            owner_annotation_key: owner_annotation_key.into(),
        }
    }

    /// The controller reference wins over the owner annotation.
    fn owner_of<K: Resource>(&self, owned: &K) -> Option<String> {
        let kind = ClusterResourceOverride::kind(&());
        ownership::controller_of(owned.meta())
            .filter(|reference| reference.kind == kind)
            .map(|reference| reference.name.clone())
            .or_else(|| owned.annotations().get(&self.owner_annotation_key).cloned())
    }
}

#[async_trait]
impl<K> Enqueuer<K> for OwnerEnqueuer
where
    K: Resource + Send + Sync,
{
    async fn enqueue(&self, owned: &K) -> Result<()> {
        let Some(owner) = self.owner_of(owned) else {
            return Err(Error::OwnerNotFound {
                namespace: owned.namespace().unwrap_or_default(),
                name: owned.name_any(),
            });
        };

        if self.store.get(&ObjectRef::new(&owner)).is_none() {
            return Err(Error::EnqueueIgnored(format!(
                "clusterresourceoverride \"{owner}\" not found"
            )));
        }

        debug!(owner = %owner, object = %owned.name_any(), "Enqueuing owner");
        self.queue.add(ReconcileRequest::new(None, owner)).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::Deployment;
    use k8s_openapi::api::core::v1::Secret;
    use kube::api::ObjectMeta;
    use kube::runtime::reflector::store::Writer;
    use kube::runtime::watcher;

    const OWNER_KEY: &str = "clusterresourceoverride.operator.autoscaling.openshift.io/owner";

    fn enqueuer(owners: &[&str]) -> (OwnerEnqueuer, WorkQueue<ReconcileRequest>) {
        let mut writer: Writer<ClusterResourceOverride> = Writer::default();
        for name in owners {
            let mut owner = ClusterResourceOverride::new(name, Default::default());
            owner.metadata.uid = Some(format!("uid-{name}"));
            writer.apply_watcher_event(&watcher::Event::Apply(owner));
        }
        let queue = WorkQueue::new();
        let enqueuer = OwnerEnqueuer::new(queue.clone(), writer.as_reader(), OWNER_KEY);
        (enqueuer, queue)
    }

    fn owned_by(owner: &str) -> Deployment {
        let mut deployment = Deployment {
            metadata: ObjectMeta {
                name: Some("clusterresourceoverride".into()),
                namespace: Some("clusterresourceoverride-operator".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut cro = ClusterResourceOverride::new(owner, Default::default());
        cro.metadata.uid = Some(format!("uid-{owner}"));
        ownership::set_controller(&mut deployment.metadata, &cro);
        deployment
    }

    #[tokio::test]
    async fn controller_reference_names_the_owner() {
        let (enqueuer, queue) = enqueuer(&["cluster"]);
        enqueuer.enqueue(&owned_by("cluster")).await.unwrap();
        assert_eq!(queue.get().await, Some(ReconcileRequest::new(None, "cluster")));
    }

    #[tokio::test]
    async fn owner_annotation_is_the_fallback() {
        let (enqueuer, queue) = enqueuer(&["cluster"]);
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some("server-serving-cert-clusterresourceoverride".into()),
                namespace: Some("clusterresourceoverride-operator".into()),
                annotations: Some([(OWNER_KEY.to_string(), "cluster".to_string())].into()),
                ..Default::default()
            },
            ..Default::default()
        };
        enqueuer.enqueue(&secret).await.unwrap();
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn objects_without_owner_are_rejected() {
        let (enqueuer, queue) = enqueuer(&["cluster"]);
        let orphan = Secret {
            metadata: ObjectMeta {
                name: Some("orphan".into()),
                namespace: Some("clusterresourceoverride-operator".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let err = enqueuer.enqueue(&orphan).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "could not find owner for clusterresourceoverride-operator/orphan"
        );
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn unknown_owners_are_ignored() {
        let (enqueuer, queue) = enqueuer(&[]);
        let err = enqueuer.enqueue(&owned_by("cluster")).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "ignoring request to enqueue - clusterresourceoverride \"cluster\" not found"
        );
        assert!(queue.is_empty().await);
    }
}
