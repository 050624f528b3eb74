pub mod clusterresourceoverrides;
