//! The error module for failure handling during beacon DKG runs.

use thiserror::Error;

/// Errors that terminate a distributed key generation run.
///
/// Peer misbehavior is deliberately absent from this enum: misbehaving peers
/// are recorded on the group's disqualification ledger and the run continues
/// as long as enough members remain qualified. Every variant here is a
/// terminal outcome for the local member.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DkgError {
    /// An input fell outside its algebraic domain. This indicates a local
    /// bug, never peer behavior.
    #[error("input outside the algebraic domain: {0}")]
    Domain(String),

    /// A local protocol invariant was violated. This indicates a local bug,
    /// never peer behavior.
    #[error("protocol invariant violated: {0}")]
    Protocol(String),

    /// Too many members were disqualified for the run to produce a key.
    #[error("only {qualified} members qualified, need at least {required}")]
    InsufficientQualifiedMembers {
        /// Number of members left in the qualified set.
        qualified: usize,
        /// Minimum qualified set size for the run to continue.
        required: usize,
    },

    /// The enclosing run context was cancelled.
    #[error("run cancelled")]
    Cancelled,

    /// A configured deadline elapsed without the awaited event.
    #[error("timed out waiting for {0}")]
    Timeout(String),

    /// The chain adapter or network provider became unavailable.
    #[error("chain or network unavailable: {0}")]
    External(String),
}

/// Type alias for a `Result` returning a [`DkgError`] on failure.
pub type DkgResult<T> = Result<T, DkgError>;
