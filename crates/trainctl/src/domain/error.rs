use core::error::Error;

/// Errors raised by the name allocator.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum AllocationError {
    /// Recoverable: pick another name or allow a suffix.
    #[display("Job name {name} is already taken")]
    NameTaken { name: String },
    #[display("Could not allocate a name for {base_name} after {attempts} attempts")]
    AllocationExhausted { base_name: String, attempts: u32 },
    /// Never retried. The store's reason is kept verbatim.
    #[display("Not allowed to create jobs: {reason}")]
    AuthorizationDenied { reason: String },
    /// The name cannot be stored as a label value.
    #[display("Invalid job name {name}: {reason}")]
    InvalidName { name: String, reason: String },
    #[display("Cluster store error during allocation")]
    Store,
}

impl Error for AllocationError {}

/// Errors raised by the submission pipeline, tagged with the failed stage.
///
/// `Render` and `Allocate` leave nothing behind. `Record` leaves an
/// incomplete backing record and `PartialSubmission` a complete one plus
/// whatever the apply tool managed to create.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum SubmitError {
    #[display("Render failed; nothing was created")]
    Render,
    #[display("Name allocation failed; nothing was created")]
    Allocate,
    #[display("Failed to record the manifest of {name}; the incomplete backing record remains")]
    Record { name: String },
    #[display("Apply failed for {name}; backing record and created objects were left in place")]
    PartialSubmission { name: String },
    #[display("Failed to write the rendered manifest")]
    DryRunOutput,
}

impl SubmitError {
    /// The pipeline stage that failed, as shown to the operator.
    pub const fn stage(&self) -> &'static str {
        match self {
            Self::Render | Self::DryRunOutput => "render",
            Self::Allocate => "allocate",
            Self::Record { .. } => "record",
            Self::PartialSubmission { .. } => "apply",
        }
    }
}

impl Error for SubmitError {}

/// Errors raised by the job service.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum JobError {
    /// Neither a backing record nor any workload controller exists.
    #[display("Job {name} not found in namespace {namespace}")]
    NotFound { name: String, namespace: String },
    #[display("Cluster store error")]
    Store,
    #[display("Failed to delete job {name}")]
    Delete { name: String },
    #[display("Timed out waiting for {what}")]
    Timeout { what: String },
    #[display("Cancelled while waiting for {what}")]
    Cancelled { what: String },
}

impl Error for JobError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_errors_name_their_stage() {
        assert_eq!(SubmitError::Render.stage(), "render");
        assert_eq!(SubmitError::Allocate.stage(), "allocate");
        assert_eq!(
            SubmitError::PartialSubmission {
                name: "train".to_string()
            }
            .stage(),
            "apply"
        );
    }

    #[test]
    fn authorization_reason_is_verbatim() {
        let err = AllocationError::AuthorizationDenied {
            reason: "configmaps is forbidden: User \"bob\" cannot create".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Not allowed to create jobs: configmaps is forbidden: User \"bob\" cannot create"
        );
    }
}
