use core::error::Error;

/// Errors that can occur while talking to the cluster store.
///
/// `AlreadyExists` and `Forbidden` are kept apart from the generic `Api`
/// variant because the name allocator treats them very differently: the
/// former is a lost race, the latter can never succeed on retry.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum StoreError {
    #[display("Failed to connect to Kubernetes API: {message}")]
    ConnectionFailed { message: String },
    #[display("{kind} {name} already exists")]
    AlreadyExists { kind: String, name: String },
    #[display("Forbidden: {reason}")]
    Forbidden { reason: String },
    #[display("{kind} {name} not found in namespace {namespace}")]
    NotFound {
        kind: String,
        name: String,
        namespace: String,
    },
    #[display("Kubernetes API error: {message}")]
    Api { message: String },
    #[display("Malformed {kind} {name}: {message}")]
    Malformed {
        kind: String,
        name: String,
        message: String,
    },
}

impl Error for StoreError {}
