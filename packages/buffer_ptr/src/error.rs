use thiserror::Error;

use crate::Contract;

/// Errors that can occur when negotiating, exposing or releasing a memory view.
///
/// None of these are retried internally. Retrying an acquisition without changing either the
/// contract or the source cannot succeed.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The value does not support exporting a memory view at all.
    #[error("value of type {type_name} does not support exporting a memory view")]
    UnsupportedSource {
        /// Name of the type of the offending value, for diagnostics.
        type_name: &'static str,
    },

    /// The source cannot satisfy the requested contiguity or shape without copying.
    #[error("source cannot satisfy contract {contract}: {problem}")]
    IncompatibleLayout {
        /// The contract that could not be satisfied.
        contract: Contract,

        /// A human-readable description of the mismatch.
        problem: String,
    },

    /// The contract is internally inconsistent.
    #[error("invalid contract {contract}: {problem}")]
    InvalidContract {
        /// The offending contract.
        contract: Contract,

        /// Which consistency rule was violated.
        problem: &'static str,
    },

    /// The address or view of a pointer was requested after its view was released.
    #[error("pointer used after its memory view was released")]
    UseAfterRelease,

    /// Read-write access was requested from a source that only exports read-only views.
    #[error("source is read-only but a writable view was requested")]
    ReadOnly,

    /// The source refused the export because it conflicts with an outstanding export.
    ///
    /// A writable export is exclusive with respect to every other export of the same memory.
    #[error(
        "conflicting export: {shared} read-only and {exclusive} writable views are outstanding"
    )]
    ExportConflict {
        /// Number of outstanding read-only exports.
        shared: usize,

        /// Number of outstanding writable exports (zero or one).
        exclusive: usize,
    },

    /// The source refused an operation that would move or resize memory while views of it
    /// are outstanding.
    #[error("memory cannot be moved or resized while {outstanding} views are exported")]
    BufferExported {
        /// Number of outstanding exports at the time of the refusal.
        outstanding: usize,
    },
}

/// A specialized `Result` type for buffer pointer operations, returning the crate's
/// [`Error`] type as the error value.
pub type Result<T> = std::result::Result<T, Error>;
