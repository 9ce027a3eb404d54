//! Document lifecycle transition table
//!
//! pending_upload → {validated | rejected} → extracting → {extracted | rejected} → ready
//!
//! Every writer consults this table before issuing a conditional write, so the
//! store only ever sees legal transitions.

use crate::error::OrchestrationError;
use crate::models::DocumentStatus;
use crate::Result;

impl DocumentStatus {
    /// Whether `self → next` is a legal lifecycle step.
    pub fn can_transition_to(&self, next: DocumentStatus) -> bool {
        use DocumentStatus::*;

        matches!(
            (self, next),
            (PendingUpload, Validated)
                | (PendingUpload, Rejected)
                | (Validated, Extracting)
                | (Extracted, Extracting)
                | (Extracting, Extracted)
                | (Extracting, Rejected)
                | (Extracted, Ready)
        )
    }
}

/// Fails when `expected` contains a state that cannot reach `next`.
pub fn check_transition(expected: &[DocumentStatus], next: DocumentStatus) -> Result<()> {
    if expected.is_empty() {
        return Err(OrchestrationError::Storage(format!(
            "Transition to {} needs at least one expected state",
            next
        )));
    }

    for from in expected {
        if !from.can_transition_to(next) {
            return Err(OrchestrationError::Storage(format!(
                "Illegal document transition {} → {}",
                from, next
            )));
        }
    }

    Ok(())
}
