//! Error types shared by every filter and stage in the crate.

use thiserror::Error;

/// Errors surfaced by filter construction, processing, and state restore.
///
/// Every failure is synchronous and final for the call that raised it:
/// nothing is retried or logged internally, and no partial output written
/// before the error is valid.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FilterError {
    /// Rejected constructor arguments: a zero window or tap count, an
    /// out-of-range learning rate or leakage factor, an empty kernel, a
    /// zero channel count. Construction never recovers from these.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// A processing call that violates the instance's contract, such as an
    /// input block whose length is not a whole number of frames for the
    /// configured channel count.
    #[error("contract violation: {0}")]
    Contract(String),

    /// A restored state that disagrees with the live instance (window
    /// size, tap count, channel count, operating mode) or whose running
    /// statistics fail the consistency check against the restored buffer.
    /// A failed restore leaves the instance unchanged.
    #[error("state mismatch: {0}")]
    StateMismatch(String),
}
