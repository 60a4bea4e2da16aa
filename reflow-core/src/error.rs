//! Error types for Reflow.
//!
//! Stream failures are generic: a `Stream<T, E>` carries whatever error type
//! its producer chose and the operators never wrap it. The enums here cover
//! the few failures that belong to the library itself.

use thiserror::Error;

/// Errors raised by a [`TriggerHandle`](crate::trigger::TriggerHandle).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TriggerError {
    #[error("trigger was released by its owner")]
    Released,
}
