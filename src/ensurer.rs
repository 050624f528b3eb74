use std::sync::Arc;

use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, error};

use crate::cluster::{self, api_resource, from_dynamic, is_already_exists, Cluster};
use crate::{Error, Result};

/// Builds the patch sent for an object that already exists.
type PatchGenerator = fn(&Value, &Value) -> Result<Value>;

/// Idempotent create-or-patch of a desired object.
#[derive(Clone)]
pub struct Ensurer {
    cluster: Arc<dyn Cluster>,
    generate_patch: PatchGenerator,
}

impl Ensurer {
    pub fn new(cluster: Arc<dyn Cluster>) -> Self {
        Self {
            cluster,
            generate_patch: two_way_merge_patch,
        }
    }

    #[cfg(test)]
    fn with_patch_generator(mut self, generate_patch: PatchGenerator) -> Self {
        self.generate_patch = generate_patch;
        self
    }

    /// Create `desired`, or patch the live object towards it when it already exists.
    ///
    /// The patch only carries fields whose desired value differs from the live one, so
    /// fields the operator does not render are left alone. Service accounts keep the
    /// secret references the token controller added to them.
    pub async fn ensure<K>(&self, desired: &K) -> Result<K>
    where
        K: Resource<DynamicType = ()> + Serialize + DeserializeOwned,
    {
        let resource = api_resource::<K>();
        let kind = resource.kind.clone();
        let namespace = desired.meta().namespace.clone();
        let name = desired.meta().name.clone().unwrap_or_default();

        debug!("Ensuring {} {} in namespace {:?}", kind, name, namespace);
        match cluster::create(self.cluster.as_ref(), desired).await {
            Ok(created) => return Ok(created),
            Err(err) if is_already_exists(&err) => {}
            Err(err) => return Err(Error::EnsureFailed(format!("failed to create {kind} - {err}"))),
        }

        let current = self
            .cluster
            .get(&resource, namespace.as_deref(), &name)
            .await
            .map_err(|err| Error::EnsureFailed(format!("failed to retrieve {kind} - {err}")))?;
        let original = serde_json::to_value(&current)?;

        let mut modified = serde_json::to_value(desired)?;
        for field in ["resourceVersion", "uid"] {
            if let Some(value) = original["metadata"].get(field) {
                modified["metadata"][field] = value.clone();
            }
        }
        if kind == "ServiceAccount" {
            for field in ["secrets", "imagePullSecrets"] {
                if let Some(value) = original.get(field) {
                    modified[field] = value.clone();
                }
            }
        }

        let patch = match (self.generate_patch)(&original, &modified) {
            Ok(patch) => patch,
            Err(err) => {
                // Apply the whole desired object rather than give up on the update
                error!("failed to generate patch for {} {} - {}", kind, name, err);
                modified.clone()
            }
        };

        let patched = self
            .cluster
            .patch(&resource, namespace.as_deref(), &name, &patch)
            .await?;
        Ok(from_dynamic(patched)?)
    }
}

/// Patch that turns `original` into `modified` without removing anything.
///
/// Keys present only in `original` are not mentioned; lists are replaced as a whole.
pub fn two_way_merge_patch(original: &Value, modified: &Value) -> Result<Value> {
    match (original, modified) {
        (Value::Object(original), Value::Object(modified)) => Ok(Value::Object(diff(original, modified))),
        _ => Err(Error::PatchGeneration(
            "both the live and the desired object must be JSON objects".to_string(),
        )),
    }
}

fn diff(original: &Map<String, Value>, modified: &Map<String, Value>) -> Map<String, Value> {
    let mut patch = Map::new();
    for (key, desired) in modified {
        match (original.get(key), desired) {
            (Some(live), desired) if live == desired => {}
            (Some(Value::Object(live)), Value::Object(desired)) => {
                let nested = diff(live, desired);
                if !nested.is_empty() {
                    patch.insert(key.clone(), Value::Object(nested));
                }
            }
            _ => {
                patch.insert(key.clone(), desired.clone());
            }
        }
    }
    patch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::{FakeCluster, Verb};
    use k8s_openapi::api::core::v1::{ConfigMap, ServiceAccount};
    use kube::api::ObjectMeta;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn meta(name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("operator".to_string()),
            ..Default::default()
        }
    }

    fn config_map(data: &[(&str, &str)]) -> ConfigMap {
        ConfigMap {
            metadata: meta("clusterresourceoverride-configuration"),
            data: Some(
                data.iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect::<BTreeMap<_, _>>(),
            ),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn creates_missing_objects_once() {
        let fake = Arc::new(FakeCluster::default());
        let ensurer = Ensurer::new(fake.clone());

        let created = ensurer.ensure(&config_map(&[("a", "1")])).await.unwrap();

        assert!(created.metadata.resource_version.is_some());
        assert_eq!(fake.count(Verb::Create, "ConfigMap"), 1);
        assert_eq!(fake.count(Verb::Get, "ConfigMap"), 0);
        assert_eq!(fake.count(Verb::Patch, "ConfigMap"), 0);
    }

    #[tokio::test]
    async fn patches_existing_objects() {
        let fake = Arc::new(FakeCluster::default());
        fake.insert(&config_map(&[("a", "1")]));
        let ensurer = Ensurer::new(fake.clone());

        let updated = ensurer.ensure(&config_map(&[("a", "2")])).await.unwrap();

        assert_eq!(updated.data.unwrap()["a"], "2");
        assert_eq!(fake.count(Verb::Create, "ConfigMap"), 1);
        assert_eq!(fake.count(Verb::Get, "ConfigMap"), 1);
        assert_eq!(fake.count(Verb::Patch, "ConfigMap"), 1);
    }

    #[tokio::test]
    async fn service_account_secrets_survive() {
        let fake = Arc::new(FakeCluster::default());
        let live: ServiceAccount = serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "ServiceAccount",
            "metadata": {"name": "clusterresourceoverride", "namespace": "operator"},
            "secrets": [{"name": "clusterresourceoverride-token-abcde"}],
            "imagePullSecrets": [{"name": "clusterresourceoverride-dockercfg-xyz"}]
        }))
        .unwrap();
        fake.insert(&live);

        let mut desired = ServiceAccount {
            metadata: meta("clusterresourceoverride"),
            ..Default::default()
        };
        desired.metadata.labels = Some(BTreeMap::from([(
            "operator.autoscaling.openshift.io/clusterresourceoverride".to_string(),
            "true".to_string(),
        )]));

        let ensured = Ensurer::new(fake.clone()).ensure(&desired).await.unwrap();

        assert_eq!(ensured.secrets, live.secrets);
        assert_eq!(ensured.image_pull_secrets, live.image_pull_secrets);
        assert!(ensured.metadata.labels.is_some());
    }

    #[tokio::test]
    async fn create_failures_other_than_conflict_are_fatal() {
        let fake = Arc::new(FakeCluster::default());
        fake.fail_next(
            Verb::Create,
            "ConfigMap",
            crate::cluster::fake::api_error(403, "Forbidden", "denied".to_string()),
        );

        let err = Ensurer::new(fake.clone())
            .ensure(&config_map(&[("a", "1")]))
            .await
            .unwrap_err();

        assert!(err.to_string().starts_with("failed to create ConfigMap - "));
        assert_eq!(fake.count(Verb::Get, "ConfigMap"), 0);
    }

    #[tokio::test]
    async fn failed_patch_generation_sends_the_desired_object() {
        let fake = Arc::new(FakeCluster::default());
        fake.insert(&config_map(&[("a", "1")]));
        let ensurer = Ensurer::new(fake.clone())
            .with_patch_generator(|_, _| Err(Error::PatchGeneration("no diff".to_string())));

        let updated = ensurer.ensure(&config_map(&[("a", "2")])).await.unwrap();

        assert_eq!(updated.data.unwrap()["a"], "2");
        assert_eq!(fake.count(Verb::Patch, "ConfigMap"), 1);
    }

    #[test]
    fn patch_leaves_unowned_fields_alone() {
        let original = json!({
            "metadata": {"name": "a", "resourceVersion": "7", "annotations": {"foreign": "x"}},
            "data": {"a": "1", "b": "2"},
            "secrets": [{"name": "token"}]
        });
        let modified = json!({
            "metadata": {"name": "a", "resourceVersion": "7", "annotations": {"mine": "y"}},
            "data": {"a": "1", "b": "3"}
        });

        let patch = two_way_merge_patch(&original, &modified).unwrap();

        assert_eq!(
            patch,
            json!({
                "metadata": {"annotations": {"mine": "y"}},
                "data": {"b": "3"}
            })
        );
    }

    #[test]
    fn patch_of_identical_objects_is_empty() {
        let object = json!({"metadata": {"name": "a"}, "spec": {"replicas": 1, "ports": [443]}});
        assert_eq!(two_way_merge_patch(&object, &object).unwrap(), json!({}));
    }

    #[test]
    fn patch_generation_requires_objects() {
        assert!(two_way_merge_patch(&json!([]), &json!({})).is_err());
    }
}
