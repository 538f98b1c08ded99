//! Error type for forest operations.

use thiserror::Error;

/// Errors surfaced by the public forest API.
///
/// Local octree algorithms clamp their arguments instead of failing; errors
/// are reserved for protocol violations and inconsistent input topology.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ForestError {
    /// The macro-block connectivity does not form a closed complex,
    /// e.g. more than two blocks share a face.
    #[error("macro mesh topology error: {0}")]
    Topology(String),

    /// An operation was called before its prerequisite.
    #[error("operation requires `{0}` to have been called first")]
    MissingPrerequisite(&'static str),

    /// Shared-node classification disagreed between the two sides of a
    /// block interface. This indicates the forest was mutated after
    /// balancing or the balance invariant is broken.
    #[error("inconsistent node classification across a block interface")]
    InterfaceMismatch,
}
