use kube::CustomResourceExt;

fn main() {
    print!(
        "{}",
        serde_yaml::to_string(
            &clusterresourceoverride_operator::resources::clusterresourceoverrides::ClusterResourceOverride::crd()
        )
        .unwrap()
    )
}
