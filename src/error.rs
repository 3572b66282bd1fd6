//! Error taxonomy for the interop layer.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, InteropError>;

/// Errors raised while loading the Swift runtime, synthesizing metadata, or
/// moving values across the boundary.
#[derive(Error, Debug)]
pub enum InteropError {
    /// The native layout disagrees with what the host side expects. This is
    /// a fatal diagnostic: continuing would corrupt memory.
    #[error("ABI mismatch for {type_name}: {detail}")]
    AbiMismatch { type_name: String, detail: String },

    #[error("failed to open library `{path}`: {source}")]
    LibraryOpen {
        path: String,
        #[source]
        source: libloading::Error,
    },

    #[error("symbol `{symbol}` not found in `{library}`")]
    MissingSymbol { symbol: String, library: String },

    #[error("allocation of {size} bytes failed")]
    AllocationFailed { size: usize },

    #[error("relative pointer out of range: {0}")]
    RelativeOffset(#[from] graftr_abi::OffsetOverflow),

    #[error("unsupported type shape: {0}")]
    Unsupported(String),

    /// A witness-table fixup pass left placeholder slots behind, meaning the
    /// runtime expected requirements no witness was supplied for.
    #[error("conformance of `{type_name}` to `{protocol}` left {remaining} witness slot(s) unresolved")]
    IncompleteConformance {
        type_name: String,
        protocol: String,
        remaining: usize,
    },

    #[error("Swift runtime entry points are not installed")]
    RuntimeNotLoaded,
}
