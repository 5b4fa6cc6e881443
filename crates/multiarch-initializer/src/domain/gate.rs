//! Pending-initializer queue handling.

use core::error::Error;

use error_stack::Report;

use crate::domain::pod::Initializers;
use crate::domain::pod::InitializingPod;

#[derive(Debug, derive_more::Display)]
pub enum GateError {
    #[display("Initializer {name} is not at the head of the pending queue (head: {head:?})")]
    NotHead { name: String, head: Option<String> },
}

impl Error for GateError {}

/// Whether `my_name` is the next initializer to run on `pod`.
pub fn is_head_initializer(pod: &InitializingPod, my_name: &str) -> bool {
    pod.metadata
        .initializers
        .as_ref()
        .and_then(Initializers::head)
        == Some(my_name)
}

/// Copy of `queue` with its head removed.
///
/// Returns `None` once nothing is left pending so the whole `initializers` block is dropped
/// from the object instead of leaving an empty list behind.
///
/// # Errors
///
/// - [`GateError::NotHead`] if `my_name` is not the head of `queue`
pub fn dequeue(
    queue: &Initializers,
    my_name: &str,
) -> Result<Option<Initializers>, Report<GateError>> {
    if queue.head() != Some(my_name) {
        return Err(Report::new(GateError::NotHead {
            name: my_name.to_string(),
            head: queue.head().map(str::to_string),
        }));
    }

    if queue.pending.len() == 1 {
        return Ok(None);
    }

    Ok(Some(Initializers {
        pending: queue.pending[1..].to_vec(),
        result: queue.result.clone(),
    }))
}
