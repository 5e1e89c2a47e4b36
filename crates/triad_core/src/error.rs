//! # Core Error Types
//!
//! Errors that can occur while allocating buffer space, talking to the GPU
//! backend, or loading configuration.
//!
//! Programming errors (double deallocation, writes past the end of a buffer,
//! touching a deleted index group) are not represented here. They are
//! `debug_assert!` checks, compiled out of release builds.

use thiserror::Error;

use crate::gpu::GpuBufferId;

/// Errors returned by the buffer allocators and the stores built on them.
///
/// These are normal outcomes. Callers check them at every call site and
/// either grow an upstream pool or skip the higher-level operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocError {
    /// The request would push the buffer past its maximum size.
    #[error("capacity exceeded: requested {requested} bytes, {available} available")]
    CapacityExceeded {
        /// Number of bytes requested.
        requested: usize,
        /// Bytes that could still be handed out under the cap.
        available: usize,
    },

    /// A contiguous allocation of zero records has no first index.
    #[error("zero-sized allocation")]
    ZeroSized,

    /// The request would produce a record index the index width cannot address.
    #[error("index range exceeded: last index would be {requested_last}, max is {max_index}")]
    IndexRangeExceeded {
        /// Highest index the allocation would have produced.
        requested_last: usize,
        /// Highest index representable by the store's index type.
        max_index: usize,
    },
}

/// Errors reported by a [`BufferBackend`](crate::gpu::BufferBackend).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GpuError {
    /// The backend could not create a buffer resource.
    #[error("GPU resource creation failed for {size} bytes: {reason}")]
    ResourceCreationFailed {
        /// Requested resource size in bytes.
        size: usize,
        /// Backend-provided reason.
        reason: String,
    },

    /// An upload addressed bytes outside the resource.
    #[error("upload out of bounds: {offset}+{len} exceeds resource size {size}")]
    UploadOutOfBounds {
        /// Byte offset of the upload.
        offset: usize,
        /// Length of the upload.
        len: usize,
        /// Size of the target resource.
        size: usize,
    },

    /// The handle does not name a live resource.
    #[error("unknown GPU buffer {0:?}")]
    UnknownBuffer(GpuBufferId),
}

/// Errors while loading an [`EngineConfig`](crate::config::EngineConfig).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config: {0}")]
    Io(String),

    /// The config file is not valid TOML for the expected schema.
    #[error("failed to parse config: {0}")]
    Parse(String),

    /// The config parsed but holds unusable values.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Result type for allocation operations.
pub type AllocResult<T> = Result<T, AllocError>;

/// Result type for GPU backend operations.
pub type GpuResult<T> = Result<T, GpuError>;
