use crate::space::MemorySpace;

/// Errors surfaced by tilark.
///
/// The precondition variants (`EmptyTensor`, `RankMismatch`, `Incongruent`,
/// `MemorySpaceMismatch`, `StorageSizeMismatch`) signal a programming error
/// in the caller: every kernel validates its operands before any device
/// call is issued, and none of these conditions is recoverable mid-chain.
/// `Device`/`Blas` wrap vendor-layer failures; a non-success status from
/// the driver or cuBLAS invalidates anything computed afterwards, so they
/// are never retried.
#[derive(Debug, thiserror::Error)]
pub enum TilarkError {
    #[error("operation requires a non-empty {role} tensor")]
    EmptyTensor { role: &'static str },

    #[error("{role} tensor has rank {actual}, contraction expects rank {expected}")]
    RankMismatch {
        role: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{left} and {right} ranges are incongruent over their {dims} dimensions")]
    Incongruent {
        left: &'static str,
        right: &'static str,
        dims: &'static str,
    },

    #[error("binary operands occupy different memory spaces: {left} vs {right}")]
    MemorySpaceMismatch {
        left: MemorySpace,
        right: MemorySpace,
    },

    #[error("storage holds {size} elements but range volume is {volume}")]
    StorageSizeMismatch { size: usize, volume: usize },

    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error("invalid contraction: {0}")]
    InvalidContraction(String),

    #[error("{0} is not implemented for host-resident tensors")]
    Unimplemented(&'static str),

    #[error("CUDA driver error: {0}")]
    Device(String),

    #[error("cuBLAS error: {0}")]
    Blas(String),
}
