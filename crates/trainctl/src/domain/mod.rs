//! Job identity and lifecycle: name allocation, submission, discovery and
//! status resolution.

pub mod allocator;
pub mod error;
pub mod jobs;
pub mod poll;
pub mod record;
pub mod retry;
pub mod status;
pub mod submission;
pub mod trainer;
pub mod view;
