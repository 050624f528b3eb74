//! In-memory [`Cluster`] used by unit tests.
//!
//! Objects are stored as JSON keyed by kind, namespace and name. Every write bumps a
//! global resourceVersion; patches are applied as JSON merge patches. Every call is
//! recorded so tests can assert on the traffic a reconcile generates.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use kube::core::{ApiResource, DynamicObject};
use kube::error::ErrorResponse;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::{api_resource, Cluster};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verb {
    Get,
    Create,
    Patch,
    PatchStatus,
    Delete,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Call {
    pub verb: Verb,
    pub kind: String,
    pub name: String,
}

type Key = (String, Option<String>, String);

#[derive(Default)]
struct Inner {
    objects: BTreeMap<Key, Value>,
    version: u64,
    calls: Vec<Call>,
    failures: Vec<(Verb, String, kube::Error)>,
}

#[derive(Default)]
pub struct FakeCluster {
    inner: Mutex<Inner>,
}

pub fn api_error(code: u16, reason: &str, message: String) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message,
        reason: reason.to_string(),
        code,
    })
}

fn not_found(kind: &str, name: &str) -> kube::Error {
    api_error(404, "NotFound", format!("{kind} \"{name}\" not found"))
}

fn key(resource: &ApiResource, namespace: Option<&str>, name: &str) -> Key {
    (
        resource.kind.clone(),
        namespace.map(str::to_string),
        name.to_string(),
    )
}

fn merge(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Default::default());
    }
    if let Value::Object(target) = target {
        for (key, value) in patch {
            if value.is_null() {
                target.remove(key);
            } else {
                merge(target.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

fn to_object(value: &Value) -> kube::Result<DynamicObject> {
    serde_json::from_value(value.clone()).map_err(kube::Error::SerdeError)
}

impl Inner {
    fn record(&mut self, verb: Verb, resource: &ApiResource, name: &str) -> kube::Result<()> {
        self.calls.push(Call {
            verb,
            kind: resource.kind.clone(),
            name: name.to_string(),
        });
        match self
            .failures
            .iter()
            .position(|(v, kind, _)| *v == verb && *kind == resource.kind)
        {
            Some(index) => Err(self.failures.remove(index).2),
            None => Ok(()),
        }
    }

    fn stamp(&mut self, object: &mut Value) {
        self.version += 1;
        object["metadata"]["resourceVersion"] = Value::String(self.version.to_string());
    }

    fn store(&mut self, key: Key, mut object: Value) -> Value {
        self.stamp(&mut object);
        if object["metadata"].get("uid").is_none() {
            object["metadata"]["uid"] = Value::String(format!("uid-{}", self.version));
        }
        self.objects.insert(key, object.clone());
        object
    }

    fn apply_patch(&mut self, key: Key, patch: &Value) -> kube::Result<Value> {
        let Some(mut current) = self.objects.get(&key).cloned() else {
            return Err(not_found(&key.0, &key.2));
        };
        if let Some(expected) = patch["metadata"]["resourceVersion"].as_str() {
            if current["metadata"]["resourceVersion"].as_str() != Some(expected) {
                return Err(api_error(
                    409,
                    "Conflict",
                    format!(
                        "Operation cannot be fulfilled on {} \"{}\": the object has been modified",
                        key.0, key.2
                    ),
                ));
            }
        }
        let before = current.clone();
        merge(&mut current, patch);
        // Like the API server, a patch that changes nothing keeps the resourceVersion
        if current == before {
            return Ok(before);
        }
        Ok(self.store(key, current))
    }
}

impl FakeCluster {
    /// Store an object as if it had been created out of band.
    pub fn insert<K>(&self, object: &K)
    where
        K: Resource<DynamicType = ()> + Serialize,
    {
        let mut inner = self.inner.lock().unwrap();
        let value = serde_json::to_value(object).unwrap();
        let key = key(
            &api_resource::<K>(),
            object.meta().namespace.as_deref(),
            object.meta().name.as_deref().unwrap(),
        );
        inner.store(key, value);
    }

    pub fn object<K>(&self, namespace: Option<&str>, name: &str) -> Option<K>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        let inner = self.inner.lock().unwrap();
        inner
            .objects
            .get(&key(&api_resource::<K>(), namespace, name))
            .map(|value| serde_json::from_value(value.clone()).unwrap())
    }

    /// Apply a merge patch outside of the recorded traffic, e.g. to simulate a controller
    /// updating a Deployment status.
    pub fn modify<K>(&self, namespace: Option<&str>, name: &str, patch: Value)
    where
        K: Resource<DynamicType = ()>,
    {
        let mut inner = self.inner.lock().unwrap();
        inner
            .apply_patch(key(&api_resource::<K>(), namespace, name), &patch)
            .unwrap();
    }

    /// Fail the next call of `verb` on `kind` with `error`.
    pub fn fail_next(&self, verb: Verb, kind: &str, error: kube::Error) {
        let mut inner = self.inner.lock().unwrap();
        inner.failures.push((verb, kind.to_string(), error));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn count(&self, verb: Verb, kind: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.verb == verb && call.kind == kind)
            .count()
    }

    /// Calls that changed cluster state.
    pub fn writes(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| call.verb != Verb::Get)
            .collect()
    }

    pub fn clear_calls(&self) {
        self.inner.lock().unwrap().calls.clear();
    }
}

#[async_trait]
impl Cluster for FakeCluster {
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> kube::Result<DynamicObject> {
        let mut inner = self.inner.lock().unwrap();
        inner.record(Verb::Get, resource, name)?;
        match inner.objects.get(&key(resource, namespace, name)) {
            Some(value) => to_object(value),
            None => Err(not_found(&resource.kind, name)),
        }
    }

    async fn create(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        object: &DynamicObject,
    ) -> kube::Result<DynamicObject> {
        let name = object.metadata.name.clone().unwrap_or_default();
        let mut inner = self.inner.lock().unwrap();
        inner.record(Verb::Create, resource, &name)?;
        let key = key(resource, namespace, &name);
        if inner.objects.contains_key(&key) {
            return Err(api_error(
                409,
                "AlreadyExists",
                format!("{} \"{name}\" already exists", resource.kind),
            ));
        }
        let mut value = serde_json::to_value(object).map_err(kube::Error::SerdeError)?;
        value["apiVersion"] = Value::String(resource.api_version.clone());
        value["kind"] = Value::String(resource.kind.clone());
        let stored = inner.store(key, value);
        to_object(&stored)
    }

    async fn patch(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        patch: &Value,
    ) -> kube::Result<DynamicObject> {
        let mut inner = self.inner.lock().unwrap();
        inner.record(Verb::Patch, resource, name)?;
        let stored = inner.apply_patch(key(resource, namespace, name), patch)?;
        to_object(&stored)
    }

    async fn patch_status(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        patch: &Value,
    ) -> kube::Result<DynamicObject> {
        let mut inner = self.inner.lock().unwrap();
        inner.record(Verb::PatchStatus, resource, name)?;
        let mut status_only = serde_json::json!({ "status": patch["status"].clone() });
        if let Some(version) = patch["metadata"].get("resourceVersion") {
            status_only["metadata"] = serde_json::json!({ "resourceVersion": version });
        }
        let stored = inner.apply_patch(key(resource, namespace, name), &status_only)?;
        to_object(&stored)
    }

    async fn delete(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> kube::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.record(Verb::Delete, resource, name)?;
        match inner.objects.remove(&key(resource, namespace, name)) {
            Some(_) => Ok(()),
            None => Err(not_found(&resource.kind, name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{self, is_not_found};
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;

    fn config_map(name: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("operator".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn writes_bump_the_resource_version() {
        let fake = FakeCluster::default();
        let created = cluster::create(&fake, &config_map("a")).await.unwrap();
        let first = created.metadata.resource_version.clone().unwrap();

        fake.patch(
            &api_resource::<ConfigMap>(),
            Some("operator"),
            "a",
            &serde_json::json!({"data": {"k": "v"}}),
        )
        .await
        .unwrap();

        let patched: ConfigMap = fake.object(Some("operator"), "a").unwrap();
        assert_ne!(patched.metadata.resource_version.unwrap(), first);
        assert_eq!(patched.data.unwrap()["k"], "v");
        assert!(patched.metadata.uid.is_some());
    }

    #[tokio::test]
    async fn empty_patches_keep_the_resource_version() {
        let fake = FakeCluster::default();
        let created = cluster::create(&fake, &config_map("a")).await.unwrap();

        fake.patch(
            &api_resource::<ConfigMap>(),
            Some("operator"),
            "a",
            &serde_json::json!({}),
        )
        .await
        .unwrap();

        let patched: ConfigMap = fake.object(Some("operator"), "a").unwrap();
        assert_eq!(patched.metadata.resource_version, created.metadata.resource_version);
    }

    #[tokio::test]
    async fn stale_versions_conflict() {
        let fake = FakeCluster::default();
        fake.insert(&config_map("a"));
        let err = fake
            .patch_status(
                &api_resource::<ConfigMap>(),
                Some("operator"),
                "a",
                &serde_json::json!({"metadata": {"resourceVersion": "0"}, "status": {}}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, kube::Error::Api(ref response) if response.code == 409));
    }

    #[tokio::test]
    async fn injected_failures_fire_once() {
        let fake = FakeCluster::default();
        fake.insert(&config_map("a"));
        fake.fail_next(Verb::Get, "ConfigMap", not_found("ConfigMap", "a"));

        let first: kube::Result<ConfigMap> = cluster::get(&fake, Some("operator"), "a").await;
        assert!(is_not_found(&first.unwrap_err()));
        let second: kube::Result<ConfigMap> = cluster::get(&fake, Some("operator"), "a").await;
        assert!(second.is_ok());
        assert_eq!(fake.count(Verb::Get, "ConfigMap"), 2);
    }
}
