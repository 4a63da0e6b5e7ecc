//! trainctl: submit, track and delete GPU training workloads.

pub mod config;
pub mod context;
pub mod domain;
pub mod infrastructure;
pub mod mock;
pub mod output;

pub use context::Context;
