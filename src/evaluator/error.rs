//! Evaluator error types.

use thiserror::Error;

use crate::store::StoreError;

/// Errors that abort an evaluation tick.
///
/// Failures on individual rows never abort a tick; they are logged and
/// counted in the tick report.
#[derive(Debug, Error)]
pub enum EvaluatorError {
    /// A table could not be read at all
    #[error("Failed to list {table}: {source}")]
    Listing {
        table: &'static str,
        #[source]
        source: StoreError,
    },

    /// The blocking task running the tick did not complete
    #[error("Evaluation task aborted: {0}")]
    Aborted(String),
}
