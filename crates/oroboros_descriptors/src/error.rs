//! # Descriptor Heap Error Types
//!
//! All errors that can occur while managing descriptor heaps.

use oroboros_alloc::AllocError;
use thiserror::Error;

use crate::handle::ChunkId;
use crate::heap::DescriptorHeapKind;

/// Errors that can occur in the descriptor heap pools.
#[derive(Error, Debug)]
pub enum HeapError {
    /// The underlying range allocator reported a contract violation.
    #[error(transparent)]
    Alloc(#[from] AllocError),

    /// Zero descriptors were requested.
    #[error("descriptor count must be non-zero")]
    ZeroCount,

    /// The heap factory failed to create a native heap.
    #[error("failed to create {kind} heap with {capacity} descriptors: {reason}")]
    HeapCreation {
        /// Kind of heap requested.
        kind: DescriptorHeapKind,
        /// Number of descriptors requested.
        capacity: u32,
        /// Factory-provided failure reason.
        reason: String,
    },

    /// A shader-visible heap was requested for a kind that cannot be one.
    #[error("{0} heaps cannot be shader-visible")]
    NotShaderVisible(DescriptorHeapKind),

    /// A handle was freed through a pool that did not issue it.
    #[error("handle from chunk {chunk} was freed through a pool that did not issue it")]
    WrongOwner {
        /// Chunk recorded in the handle.
        chunk: ChunkId,
    },

    /// A handle's address range does not lie inside the chunk it names.
    #[error("handle does not address a valid range of chunk {chunk}")]
    ForeignHandle {
        /// Chunk the handle was checked against.
        chunk: ChunkId,
    },

    /// The pool has no chunk with this id.
    #[error("no chunk {0} in this pool")]
    UnknownChunk(ChunkId),

    /// An immediate free hit a deferred chunk, or the other way round.
    #[error("chunk {chunk} does not support this release policy")]
    PolicyMismatch {
        /// The chunk that rejected the free.
        chunk: ChunkId,
    },

    /// A freshly created chunk could not satisfy the request that caused it.
    #[error("no space for {requested} {kind} descriptors")]
    OutOfDescriptors {
        /// Kind of heap.
        kind: DescriptorHeapKind,
        /// Number of descriptors requested.
        requested: u32,
    },

    /// Configuration values are out of range.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Configuration file could not be parsed.
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for descriptor heap operations.
pub type HeapResult<T> = Result<T, HeapError>;
