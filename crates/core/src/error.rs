use thiserror::Error;

/// Error type for structural parse failures.
///
/// Only violations of load-bearing invariants are fatal: a bad container
/// magic, or a mandatory metadata block that is missing or too short to
/// contain its fixed header. Everything else (truncated sections, short
/// reads mid-chain, unresolvable bases) is clamped and *counted* in the
/// output structures rather than surfaced as an error, because the input
/// formats are undocumented and partially understood — the goal is always
/// to return the best structure available.
#[derive(Debug, Error)]
pub enum FormatError {
    /// The container header magic did not match.
    #[error("unexpected container magic {magic:#x} at offset {offset:#x}")]
    BadMagic { offset: u64, magic: u32 },

    /// No chained-fixups metadata block was declared by the container.
    #[error("container declares no chained-fixups block")]
    MissingFixups,

    /// The fixups metadata block is too short for its fixed header.
    #[error("fixups block truncated at offset {offset:#x}; need {needed} bytes")]
    TruncatedFixups { offset: u64, needed: usize },

    /// Underlying I/O error while reading the container.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type for parse operations.
pub type ProbeResult<T> = Result<T, FormatError>;
