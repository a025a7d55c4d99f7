//! # Storage Configuration
//!
//! Buffer sizing and clustering parameters, loaded once at startup from TOML.
//!
//! ```toml
//! slab_bytes_increment = 2097152
//! bytes_per_vertex = 32
//! cluster_shift = 8
//! flawless_frames = false
//! ```
//!
//! Changing any sizing value requires a full [`clear`](crate::ClusteredVertexStorage::clear).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default slab growth increment: 2 MiB.
pub const SLAB_BYTES_INCREMENT: u32 = 0x20_0000;

/// Default vertex record size in bytes.
pub const DEFAULT_BYTES_PER_VERTEX: u32 = 32;

/// Default cluster coarsening shift (in block coordinates).
pub const DEFAULT_CLUSTER_SHIFT: u32 = 8;

/// GPU buffer copies must be aligned to this many bytes.
pub const COPY_ALIGNMENT: u32 = 4;

/// Tunables for the clustered vertex storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Slab capacities are rounded up to a multiple of this many bytes.
    pub slab_bytes_increment: u32,
    /// Size of one vertex record.
    pub bytes_per_vertex: u32,
    /// Region origins are shifted right by this many bits to form cluster keys.
    pub cluster_shift: u32,
    /// Region handles reserved up front per realm.
    pub region_capacity: usize,
    /// Ignore the compaction deadline so no work is deferred.
    pub flawless_frames: bool,
    /// Bound of the worker to render thread upload channel.
    pub upload_queue_capacity: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            slab_bytes_increment: SLAB_BYTES_INCREMENT,
            bytes_per_vertex: DEFAULT_BYTES_PER_VERTEX,
            cluster_shift: DEFAULT_CLUSTER_SHIFT,
            region_capacity: 4096,
            flawless_frames: false,
            upload_queue_capacity: 256,
        }
    }
}

impl ClusterConfig {
    /// Parses and validates a config from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML and
    /// [`ConfigError::Invalid`] for out-of-range values.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`ClusterConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Checks every value against its allowed range.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bytes_per_vertex == 0 || self.bytes_per_vertex % COPY_ALIGNMENT != 0 {
            return Err(ConfigError::Invalid(format!(
                "bytes_per_vertex must be a non-zero multiple of {COPY_ALIGNMENT}, got {}",
                self.bytes_per_vertex
            )));
        }
        if self.slab_bytes_increment < self.bytes_per_vertex {
            return Err(ConfigError::Invalid(format!(
                "slab_bytes_increment ({}) must hold at least one vertex ({} bytes)",
                self.slab_bytes_increment, self.bytes_per_vertex
            )));
        }
        if self.slab_bytes_increment % COPY_ALIGNMENT != 0 {
            return Err(ConfigError::Invalid(format!(
                "slab_bytes_increment must be a multiple of {COPY_ALIGNMENT}, got {}",
                self.slab_bytes_increment
            )));
        }
        if self.cluster_shift >= 31 {
            return Err(ConfigError::Invalid(format!(
                "cluster_shift must be below 31, got {}",
                self.cluster_shift
            )));
        }
        if self.upload_queue_capacity == 0 {
            return Err(ConfigError::Invalid("upload_queue_capacity must be non-zero".into()));
        }
        Ok(())
    }
}
