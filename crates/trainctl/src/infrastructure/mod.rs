pub mod helm;
pub mod k8s;
pub mod kube_client;
pub mod kubectl;
pub mod tools;
