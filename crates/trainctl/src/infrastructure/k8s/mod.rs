//! Kubernetes integration module.
//!
//! Everything the job core needs from the cluster goes through the
//! [`ClusterStore`] trait: optimistic creation, label-selected listing and
//! whole-object replacement of backing records, plus read access to pods and
//! workload controllers. [`KubeStore`] is the real implementation.

pub mod backing_record;
pub mod kube_store;
pub mod labels;
pub mod store;
pub mod types;

pub use kube_store::KubeStore;
pub use store::ClusterStore;
pub use store::ControllerObject;
pub use types::StoreError;
