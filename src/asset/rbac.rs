use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{
    ClusterRole, ClusterRoleBinding, PolicyRule, Role, RoleBinding, RoleRef, Subject,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use super::Asset;

const RBAC_GROUP: &str = "rbac.authorization.k8s.io";

/// One object of the webhook server's RBAC set.
#[derive(Clone, Debug)]
pub enum RbacObject {
    ServiceAccount(ServiceAccount),
    Role(Role),
    RoleBinding(RoleBinding),
    ClusterRole(ClusterRole),
    ClusterRoleBinding(ClusterRoleBinding),
}

impl RbacObject {
    /// Plural resource name, used in error messages.
    pub fn resource(&self) -> &'static str {
        match self {
            RbacObject::ServiceAccount(_) => "serviceaccounts",
            RbacObject::Role(_) => "roles",
            RbacObject::RoleBinding(_) => "rolebindings",
            RbacObject::ClusterRole(_) => "clusterroles",
            RbacObject::ClusterRoleBinding(_) => "clusterrolebindings",
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            RbacObject::ServiceAccount(o) => &o.metadata,
            RbacObject::Role(o) => &o.metadata,
            RbacObject::RoleBinding(o) => &o.metadata,
            RbacObject::ClusterRole(o) => &o.metadata,
            RbacObject::ClusterRoleBinding(o) => &o.metadata,
        }
    }

    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            RbacObject::ServiceAccount(o) => &mut o.metadata,
            RbacObject::Role(o) => &mut o.metadata,
            RbacObject::RoleBinding(o) => &mut o.metadata,
            RbacObject::ClusterRole(o) => &mut o.metadata,
            RbacObject::ClusterRoleBinding(o) => &mut o.metadata,
        }
    }
}

fn rule(groups: &[&str], resources: &[&str], verbs: &[&str]) -> PolicyRule {
    PolicyRule {
        api_groups: Some(groups.iter().map(|g| g.to_string()).collect()),
        resources: Some(resources.iter().map(|r| r.to_string()).collect()),
        verbs: verbs.iter().map(|v| v.to_string()).collect(),
        ..Default::default()
    }
}

fn role_ref(kind: &str, name: impl Into<String>) -> RoleRef {
    RoleRef {
        api_group: RBAC_GROUP.into(),
        kind: kind.into(),
        name: name.into(),
    }
}

impl Asset {
    /// The RBAC objects in the order they are ensured.
    pub fn rbac(&self) -> Vec<RbacObject> {
        let name = &self.values.name;
        let read = ["get", "list", "watch"];

        let service_account = Subject {
            kind: "ServiceAccount".into(),
            name: self.values.service_account_name.clone(),
            namespace: Some(self.values.namespace.clone()),
            api_group: None,
        };

        let aggregated = format!("default-aggregated-apiserver-{name}");
        let scc = format!("{name}-scc-hostnetwork-use");
        let anonymous = format!("{name}-anonymous-access");

        let mut authentication_reader =
            self.cluster_meta(format!("extension-server-authentication-reader-{name}"));
        authentication_reader.namespace = Some("kube-system".into());

        vec![
            RbacObject::ServiceAccount(ServiceAccount {
                metadata: ObjectMeta {
                    name: Some(self.values.service_account_name.clone()),
                    namespace: Some(self.values.namespace.clone()),
                    ..Default::default()
                },
                ..Default::default()
            }),
            RbacObject::RoleBinding(RoleBinding {
                metadata: authentication_reader,
                role_ref: role_ref("Role", "extension-apiserver-authentication-reader"),
                subjects: Some(vec![service_account.clone()]),
            }),
            RbacObject::ClusterRole(ClusterRole {
                metadata: self.cluster_meta(format!("system:{name}-requester")),
                rules: Some(vec![rule(
                    &["autoscaling.openshift.io"],
                    &[name.as_str()],
                    &["create"],
                )]),
                ..Default::default()
            }),
            RbacObject::ClusterRole(ClusterRole {
                metadata: self.cluster_meta(aggregated.clone()),
                rules: Some(vec![
                    rule(
                        &["admissionregistration.k8s.io"],
                        &["validatingwebhookconfigurations", "mutatingwebhookconfigurations"],
                        &read,
                    ),
                    rule(&[""], &["namespaces", "limitranges"], &read),
                    rule(
                        &["flowcontrol.apiserver.k8s.io"],
                        &["prioritylevelconfigurations", "flowschemas"],
                        &read,
                    ),
                ]),
                ..Default::default()
            }),
            RbacObject::ClusterRoleBinding(ClusterRoleBinding {
                metadata: self.cluster_meta(aggregated.clone()),
                role_ref: role_ref("ClusterRole", aggregated),
                subjects: Some(vec![service_account.clone()]),
            }),
            RbacObject::ClusterRoleBinding(ClusterRoleBinding {
                metadata: self.cluster_meta(format!("auth-delegator-{name}")),
                role_ref: role_ref("ClusterRole", "system:auth-delegator"),
                subjects: Some(vec![service_account.clone()]),
            }),
            RbacObject::Role(Role {
                metadata: self.object_meta(scc.clone()),
                rules: Some(vec![PolicyRule {
                    resource_names: Some(vec!["hostnetwork-v2".into()]),
                    ..rule(&["security.openshift.io"], &["securitycontextconstraints"], &["use"])
                }]),
            }),
            RbacObject::RoleBinding(RoleBinding {
                metadata: self.object_meta(scc.clone()),
                role_ref: role_ref("Role", scc),
                subjects: Some(vec![service_account]),
            }),
            RbacObject::ClusterRole(ClusterRole {
                metadata: self.cluster_meta(anonymous.clone()),
                rules: Some(vec![rule(
                    &[self.values.admission_api_group.as_str()],
                    &[self.values.admission_api_resource.as_str()],
                    &["create"],
                )]),
                ..Default::default()
            }),
            RbacObject::ClusterRoleBinding(ClusterRoleBinding {
                metadata: self.cluster_meta(anonymous.clone()),
                role_ref: role_ref("ClusterRole", anonymous),
                subjects: Some(vec![Subject {
                    api_group: Some(RBAC_GROUP.into()),
                    kind: "User".into(),
                    name: "system:anonymous".into(),
                    namespace: None,
                }]),
            }),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::test_asset;

    #[test]
    fn rbac_set_is_ordered_and_labelled() {
        let objects = test_asset().rbac();
        let names: Vec<_> = objects
            .iter()
            .map(|o| (o.resource(), o.metadata().name.clone().unwrap()))
            .collect();
        assert_eq!(
            names,
            vec![
                ("serviceaccounts", "clusterresourceoverride".to_string()),
                ("rolebindings", "extension-server-authentication-reader-clusterresourceoverride".to_string()),
                ("clusterroles", "system:clusterresourceoverride-requester".to_string()),
                ("clusterroles", "default-aggregated-apiserver-clusterresourceoverride".to_string()),
                ("clusterrolebindings", "default-aggregated-apiserver-clusterresourceoverride".to_string()),
                ("clusterrolebindings", "auth-delegator-clusterresourceoverride".to_string()),
                ("roles", "clusterresourceoverride-scc-hostnetwork-use".to_string()),
                ("rolebindings", "clusterresourceoverride-scc-hostnetwork-use".to_string()),
                ("clusterroles", "clusterresourceoverride-anonymous-access".to_string()),
                ("clusterrolebindings", "clusterresourceoverride-anonymous-access".to_string()),
            ]
        );

        for object in &objects[1..] {
            let labels = object.metadata().labels.as_ref().unwrap();
            assert_eq!(
                labels["operator.autoscaling.openshift.io/clusterresourceoverride"],
                "true"
            );
        }
        assert!(objects[0].metadata().labels.is_none());
    }

    #[test]
    fn scopes_follow_the_kind() {
        let objects = test_asset().rbac();
        assert_eq!(
            objects[1].metadata().namespace.as_deref(),
            Some("kube-system")
        );
        assert_eq!(objects[2].metadata().namespace, None);
        assert_eq!(
            objects[6].metadata().namespace.as_deref(),
            Some("clusterresourceoverride-operator")
        );

        let RbacObject::Role(role) = &objects[6] else {
            panic!("expected a Role");
        };
        let rules = role.rules.as_ref().unwrap();
        assert_eq!(rules[0].resource_names, Some(vec!["hostnetwork-v2".to_string()]));
        assert_eq!(rules[0].verbs, vec!["use".to_string()]);
    }
}
