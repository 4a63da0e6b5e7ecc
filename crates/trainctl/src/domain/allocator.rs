//! Name allocation through optimistic creation of backing records.
//!
//! Exclusivity comes only from the store's atomic create-if-absent: a name
//! belongs to whoever created its backing record first. When suffixes are
//! allowed the allocator computes the smallest free index among the records
//! sharing the base name and races for it, retrying a bounded number of
//! times when another allocator wins the same index.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use api_types::WorkloadKind;
use error_stack::Report;
use tracing::info;

use crate::domain::error::AllocationError;
use crate::domain::record::allocated_name;
use crate::domain::record::BackingRecord;
use crate::domain::retry::retry_bounded;
use crate::domain::retry::Attempt;
use crate::infrastructure::k8s::labels;
use crate::infrastructure::k8s::ClusterStore;
use crate::infrastructure::k8s::StoreError;

/// Attempts made for suffixed names after the unsuffixed name is taken.
pub const MAX_ALLOCATION_ATTEMPTS: u32 = 5;

enum CreateFailure {
    /// Someone else holds the name
    Taken,
    Fatal(Report<AllocationError>),
}

pub struct NameAllocator {
    store: Arc<dyn ClusterStore>,
    namespace: String,
    max_attempts: u32,
}

impl NameAllocator {
    pub fn new(store: Arc<dyn ClusterStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            max_attempts: MAX_ALLOCATION_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Claim `base_name`, or with `allow_suffix` the first free
    /// `{base_name}-{index}` if the base is taken.
    ///
    /// The returned record is empty apart from its identity; the caller owns
    /// the name from this point on.
    #[tracing::instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn allocate(
        &self,
        base_name: &str,
        allow_suffix: bool,
        kind: WorkloadKind,
    ) -> Result<BackingRecord, Report<AllocationError>> {
        // the base name is stored as a label value
        labels::validate_label_value(base_name).map_err(|reason| {
            Report::new(AllocationError::InvalidName {
                name: base_name.to_string(),
                reason,
            })
        })?;

        match self.try_create(base_name, 0, kind).await {
            Ok(record) => {
                info!(name = %record.name, "Allocated job name");
                return Ok(record);
            }
            Err(CreateFailure::Taken) if !allow_suffix => {
                return Err(Report::new(AllocationError::NameTaken {
                    name: base_name.to_string(),
                }));
            }
            Err(CreateFailure::Taken) => {}
            Err(CreateFailure::Fatal(report)) => return Err(report),
        }

        // Indices seen in listings or lost in a create race. Kept across
        // attempts because a fresh listing may lag behind a record we
        // already collided with.
        let taken = Mutex::new(BTreeSet::from([0u32]));
        let taken = &taken;
        let this = self;
        let outcome = retry_bounded(self.max_attempts, "allocate", move |attempt| async move {
            let existing = match this
                .store
                .list_records(&this.namespace, &labels::base_name_selector(base_name))
                .await
            {
                Ok(records) => records,
                Err(report) => return Attempt::Abort(classify(report)),
            };

            let index = {
                let mut taken = taken.lock().unwrap_or_else(PoisonError::into_inner);
                taken.extend(existing.iter().map(|record| record.index));
                smallest_free_index(&taken)
            };

            match this.try_create(base_name, index, kind).await {
                Ok(record) => Attempt::Done(record),
                Err(CreateFailure::Taken) => {
                    taken
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(index);
                    Attempt::Retry(format!(
                        "{} was taken (attempt {attempt})",
                        allocated_name(base_name, index)
                    ))
                }
                Err(CreateFailure::Fatal(report)) => Attempt::Abort(report),
            }
        })
        .await;

        match outcome {
            Ok(Ok(record)) => {
                info!(name = %record.name, index = record.index, "Allocated suffixed job name");
                Ok(record)
            }
            Ok(Err(report)) => Err(report),
            Err(report) => Err(report.change_context(AllocationError::AllocationExhausted {
                base_name: base_name.to_string(),
                attempts: self.max_attempts,
            })),
        }
    }

    async fn try_create(
        &self,
        base_name: &str,
        index: u32,
        kind: WorkloadKind,
    ) -> Result<BackingRecord, CreateFailure> {
        let claim = BackingRecord::claim(&self.namespace, base_name, index, kind);
        match self.store.create_record(&claim).await {
            Ok(record) => Ok(record),
            Err(report) if matches!(report.current_context(), StoreError::AlreadyExists { .. }) => {
                Err(CreateFailure::Taken)
            }
            Err(report) => Err(CreateFailure::Fatal(classify(report))),
        }
    }
}

fn classify(report: Report<StoreError>) -> Report<AllocationError> {
    let context = match report.current_context() {
        StoreError::Forbidden { reason } => AllocationError::AuthorizationDenied {
            reason: reason.clone(),
        },
        _ => AllocationError::Store,
    };
    report.change_context(context)
}

/// Smallest positive index not in `taken`. Gaps left by deleted jobs are
/// reused.
fn smallest_free_index(taken: &BTreeSet<u32>) -> u32 {
    (1..)
        .find(|index| !taken.contains(index))
        .unwrap_or(u32::MAX)
}
