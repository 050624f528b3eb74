use async_trait::async_trait;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::core::{ApiResource, DynamicObject};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;

#[cfg(test)]
pub mod fake;

/// Field manager recorded on every write made by the operator.
pub const FIELD_MANAGER: &str = "clusterresourceoverride-operator";

/// The calls the operator makes against the cluster API.
///
/// Objects travel as [`DynamicObject`] so a single implementation serves every kind;
/// the typed helpers in this module convert to and from concrete resources.
/// `namespace` is `None` for cluster-scoped kinds.
#[async_trait]
pub trait Cluster: Send + Sync {
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> kube::Result<DynamicObject>;

    async fn create(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        object: &DynamicObject,
    ) -> kube::Result<DynamicObject>;

    /// Strategic merge patch of the whole object.
    async fn patch(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        patch: &serde_json::Value,
    ) -> kube::Result<DynamicObject>;

    /// Merge patch of the status subresource. A `metadata.resourceVersion` in the patch
    /// is a precondition; a stale version is rejected with a conflict.
    async fn patch_status(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        patch: &serde_json::Value,
    ) -> kube::Result<DynamicObject>;

    async fn delete(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> kube::Result<()>;
}

/// [`Cluster`] backed by a live API server.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, resource: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(namespace) => Api::namespaced_with(self.client.clone(), namespace, resource),
            None => Api::all_with(self.client.clone(), resource),
        }
    }
}

#[async_trait]
impl Cluster for KubeCluster {
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> kube::Result<DynamicObject> {
        self.api(resource, namespace).get(name).await
    }

    async fn create(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        object: &DynamicObject,
    ) -> kube::Result<DynamicObject> {
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        self.api(resource, namespace).create(&params, object).await
    }

    async fn patch(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        patch: &serde_json::Value,
    ) -> kube::Result<DynamicObject> {
        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        self.api(resource, namespace)
            .patch(name, &params, &Patch::Strategic(patch))
            .await
    }

    async fn patch_status(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        patch: &serde_json::Value,
    ) -> kube::Result<DynamicObject> {
        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        self.api(resource, namespace)
            .patch_status(name, &params, &Patch::Merge(patch))
            .await
    }

    async fn delete(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> kube::Result<()> {
        self.api(resource, namespace)
            .delete(name, &DeleteParams::background())
            .await?;
        Ok(())
    }
}

pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == 404)
}

pub fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.reason == "AlreadyExists")
}

pub fn api_resource<K: Resource<DynamicType = ()>>() -> ApiResource {
    ApiResource::erase::<K>(&())
}

pub fn to_dynamic<K: Serialize>(object: &K) -> kube::Result<DynamicObject> {
    let value = serde_json::to_value(object).map_err(kube::Error::SerdeError)?;
    serde_json::from_value(value).map_err(kube::Error::SerdeError)
}

pub fn from_dynamic<K: DeserializeOwned>(object: DynamicObject) -> kube::Result<K> {
    let value = serde_json::to_value(object).map_err(kube::Error::SerdeError)?;
    serde_json::from_value(value).map_err(kube::Error::SerdeError)
}

pub async fn get<K>(cluster: &dyn Cluster, namespace: Option<&str>, name: &str) -> kube::Result<K>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    let object = cluster.get(&api_resource::<K>(), namespace, name).await?;
    from_dynamic(object)
}

/// Like [`get`], but a missing object is `Ok(None)`.
pub async fn get_opt<K>(
    cluster: &dyn Cluster,
    namespace: Option<&str>,
    name: &str,
) -> kube::Result<Option<K>>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    match get(cluster, namespace, name).await {
        Ok(object) => Ok(Some(object)),
        Err(err) if is_not_found(&err) => Ok(None),
        Err(err) => Err(err),
    }
}

pub async fn create<K>(cluster: &dyn Cluster, object: &K) -> kube::Result<K>
where
    K: Resource<DynamicType = ()> + Serialize + DeserializeOwned,
{
    let created = cluster
        .create(
            &api_resource::<K>(),
            object.meta().namespace.as_deref(),
            &to_dynamic(object)?,
        )
        .await?;
    from_dynamic(created)
}

pub async fn delete<K>(cluster: &dyn Cluster, namespace: Option<&str>, name: &str) -> kube::Result<()>
where
    K: Resource<DynamicType = ()>,
{
    cluster.delete(&api_resource::<K>(), namespace, name).await
}
