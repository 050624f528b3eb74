use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::Resource;

/// Make `owner` the controller of `owned`, keeping any other owner references.
///
/// Nothing changes when `owned` is already controlled by `owner`. An owner without a
/// name or uid cannot be referenced and is ignored.
pub fn set_controller<K: Resource<DynamicType = ()>>(owned: &mut ObjectMeta, owner: &K) {
    let Some(reference) = owner.controller_owner_ref(&()) else {
        return;
    };
    if is_controlled_by(owned, &reference) {
        return;
    }
    owned
        .owner_references
        .get_or_insert_with(Vec::new)
        .push(reference);
}

fn is_controlled_by(owned: &ObjectMeta, owner: &OwnerReference) -> bool {
    controller_of(owned).is_some_and(|reference| reference.uid == owner.uid)
}

/// The owner reference flagged as controller, if any.
pub fn controller_of(owned: &ObjectMeta) -> Option<&OwnerReference> {
    owned
        .owner_references
        .iter()
        .flatten()
        .find(|reference| reference.controller == Some(true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::clusterresourceoverrides::ClusterResourceOverride;

    fn owner(uid: &str) -> ClusterResourceOverride {
        let mut cro = ClusterResourceOverride::new("cluster", Default::default());
        cro.metadata.uid = Some(uid.to_string());
        cro
    }

    #[test]
    fn adds_a_controller_reference_once() {
        let mut owned = ObjectMeta::default();
        set_controller(&mut owned, &owner("1234"));
        set_controller(&mut owned, &owner("1234"));

        let references = owned.owner_references.as_ref().unwrap();
        assert_eq!(references.len(), 1);
        assert_eq!(references[0].kind, "ClusterResourceOverride");
        assert_eq!(references[0].api_version, "operator.autoscaling.openshift.io/v1");
        assert_eq!(references[0].name, "cluster");
        assert_eq!(references[0].controller, Some(true));
        assert_eq!(controller_of(&owned).unwrap().uid, "1234");
    }

    #[test]
    fn keeps_existing_references() {
        let mut owned = ObjectMeta {
            owner_references: Some(vec![OwnerReference {
                api_version: "v1".to_string(),
                kind: "ConfigMap".to_string(),
                name: "other".to_string(),
                uid: "5678".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        };
        set_controller(&mut owned, &owner("1234"));
        assert_eq!(owned.owner_references.unwrap().len(), 2);
    }

    #[test]
    fn owners_without_uid_are_ignored() {
        let mut owned = ObjectMeta::default();
        set_controller(&mut owned, &ClusterResourceOverride::new("cluster", Default::default()));
        assert!(owned.owner_references.is_none());
    }
}
