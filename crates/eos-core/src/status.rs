//! Library-wide status codes.
//!
//! Every fallible operation in the crate returns the same error enumeration
//! so that a flight executive can branch on a single discriminant. The
//! human-readable cause is delivered through the log sink at the point of
//! failure; the variant is the machine-facing contract.

use thiserror::Error;

/// Failure classes shared by every public entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EosError {
    /// An internal precondition was violated by the caller or by corrupted
    /// state; not recoverable within the call.
    #[error("internal assertion failed")]
    Assert,
    /// A public call was made without required library setup.
    #[error("library is not initialized")]
    NotInitialized,
    /// The arena cannot satisfy an allocation, or the initial region is
    /// smaller than the declared requirement.
    #[error("insufficient memory")]
    InsufficientMemory,
    /// An arena buffer was released out of stack order.
    #[error("memory not released in LIFO order")]
    LifoViolation,
    /// A validated parameter failed its range check.
    #[error("parameter check failed")]
    Param,
    /// A numerical precondition failed (e.g. covariance of fewer than two
    /// samples).
    #[error("value error")]
    Value,
    #[error("malformed E-THEMIS observation file")]
    EthemisLoad,
    #[error("unsupported E-THEMIS file version")]
    EthemisVersion,
    #[error("malformed MISE observation file")]
    MiseLoad,
    #[error("unsupported MISE file version")]
    MiseVersion,
    #[error("malformed PIMS observation file")]
    PimsLoad,
    #[error("unsupported PIMS file version")]
    PimsVersion,
    /// A PIMS streaming call arrived before an algorithm was selected.
    #[error("PIMS algorithm state is not initialized")]
    PimsNotInitialized,
    /// A PIMS observation disagreed with queued history or with its mode's
    /// bin definitions.
    #[error("PIMS bin definitions do not match")]
    PimsBinsMismatch,
    #[error("PIMS observation queue is empty")]
    PimsQueueEmpty,
    #[error("PIMS observation queue is full")]
    PimsQueueFull,
}
