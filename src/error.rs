use std::time::Duration;

/// Why a protected execution did not return the work's value
///
/// Admission failures (`RateLimited`, `CircuitOpen`, `DuplicateInProgress`)
/// mean the work was not invoked and no ledger entry remains for it.
#[derive(Debug, thiserror::Error)]
pub enum InvokeError<E> {
    #[error("Rate limit exceeded for {key}")]
    RateLimited { key: String },

    #[error("Circuit breaker is open for {name}")]
    CircuitOpen { name: String },

    #[error("Operation {operation_id} for client {client_key} is already in progress")]
    DuplicateInProgress {
        client_key: String,
        operation_id: String,
    },

    /// The stored failure of an earlier attempt, replayed
    #[error("Operation previously failed: {message}")]
    PreviouslyFailed { message: String },

    #[error("Call to {name} timed out after {after:?}")]
    TimedOut { name: String, after: Duration },

    /// The work's own error, unchanged
    #[error("Operation failed: {0}")]
    Work(#[source] E),

    #[error("Idempotency ledger error: {0:#}")]
    Ledger(anyhow::Error),
}

impl<E> InvokeError<E> {
    /// True when the work was never invoked because admission was refused
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            InvokeError::RateLimited { .. }
                | InvokeError::CircuitOpen { .. }
                | InvokeError::DuplicateInProgress { .. }
        )
    }

    /// Label used for the execution outcome metric
    pub(crate) fn outcome(&self) -> &'static str {
        match self {
            InvokeError::RateLimited { .. } => "rate_limited",
            InvokeError::CircuitOpen { .. } => "circuit_open",
            InvokeError::DuplicateInProgress { .. } => "duplicate",
            InvokeError::PreviouslyFailed { .. } => "previously_failed",
            InvokeError::TimedOut { .. } => "timed_out",
            InvokeError::Work(_) => "failure",
            InvokeError::Ledger(_) => "ledger_error",
        }
    }
}
