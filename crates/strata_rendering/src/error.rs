//! # Storage Error Types
//!
//! Recoverable failures of the clustered vertex storage. Usage-discipline
//! violations (wrong thread, releasing a live slab) are debug assertions,
//! not error values.

use thiserror::Error;

use crate::cluster::RealmKind;

/// Errors returned by region allocation and release.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClusterError {
    /// The region handle was already released or invalidated by a clear.
    #[error("stale region handle")]
    StaleHandle,

    /// The transfer buffer is not a whole number of vertex records.
    #[error("transfer buffer of {bytes} bytes is not a multiple of {bytes_per_vertex}-byte vertices")]
    MisalignedTransfer {
        /// Size of the transfer buffer.
        bytes: u32,
        /// Configured vertex record size.
        bytes_per_vertex: u32,
    },

    /// Allocation was attempted after the realm was closed.
    #[error("{0:?} realm is closed")]
    RealmClosed(RealmKind),

    /// The render side of the upload channel is gone.
    #[error("upload queue closed")]
    UploadQueueClosed,
}

/// Result type for cluster operations.
pub type ClusterResult<T> = Result<T, ClusterError>;

/// Errors raised while loading or validating [`ClusterConfig`](crate::ClusterConfig).
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// The config file is not valid TOML for this schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is outside its allowed range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
