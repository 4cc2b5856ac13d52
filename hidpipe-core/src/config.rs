// SPDX-License-Identifier: Apache-2.0

//! YAML configuration parser with strict schema validation.
//!
//! Validates pipeline configuration at startup time. Any invalid field
//! results in a HardValidationError that prevents the session from being
//! established. Notification behavior is explicit per-queue configuration,
//! never process-wide mutable state.

use std::path::Path;

use serde::Deserialize;

use crate::error::{HardValidationError, HidError, HidResult};
use crate::shm::{QueueOptions, SharedMemoryRegion, MIN_CAPACITY, QUEUE_HEADER_SIZE};
use crate::types::DeviceId;

/// Raw queue configuration as parsed from YAML (before validation).
#[derive(Debug, Deserialize)]
struct RawQueueConfig {
    #[serde(default = "default_capacity")]
    capacity: usize,
    #[serde(default)]
    force_notify: bool,
    #[serde(default)]
    suppress_full_notify: bool,
}

fn default_capacity() -> usize {
    16 * 1024
}

impl Default for RawQueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            force_notify: false,
            suppress_full_notify: false,
        }
    }
}

/// Raw root configuration file.
#[derive(Debug, Deserialize)]
struct RawPipelineConfig {
    device_id: String,
    #[serde(default)]
    queue: RawQueueConfig,
}

/// Validated queue configuration.
#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    /// Data area capacity in bytes (4-byte multiple).
    pub capacity: usize,
    /// Notification behavior for the owning queue.
    pub options: QueueOptions,
}

impl QueueConfig {
    /// Region size needed to back a queue of this capacity.
    pub fn region_size(&self) -> usize {
        (QUEUE_HEADER_SIZE + self.capacity).max(SharedMemoryRegion::MIN_SIZE)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            options: QueueOptions::default(),
        }
    }
}

/// Complete validated pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub device_id: DeviceId,
    pub queue: QueueConfig,
}

/// Configuration loader with strict validation.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate configuration from a YAML file.
    pub fn load_file(path: impl AsRef<Path>) -> HidResult<PipelineConfig> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(HidError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| HidError::Io {
            context: "reading config file",
            source: e,
        })?;

        Self::load_string(&content)
    }

    /// Load and validate configuration from a YAML string.
    pub fn load_string(content: &str) -> HidResult<PipelineConfig> {
        let raw: RawPipelineConfig =
            serde_yaml::from_str(content).map_err(|e| HidError::ConfigParse {
                message: format!("YAML parse error: {}", e),
            })?;

        Self::validate(raw)
    }

    /// Validate raw configuration and convert to validated types.
    fn validate(raw: RawPipelineConfig) -> HidResult<PipelineConfig> {
        let device_id = DeviceId::new(raw.device_id)?;
        let queue = Self::validate_queue(raw.queue)?;

        Ok(PipelineConfig { device_id, queue })
    }

    fn validate_queue(raw: RawQueueConfig) -> HidResult<QueueConfig> {
        // The data area must fit in a region alongside the header.
        const MAX_QUEUE_CAPACITY: usize = SharedMemoryRegion::MAX_SIZE - QUEUE_HEADER_SIZE;

        if raw.capacity < MIN_CAPACITY || raw.capacity > MAX_QUEUE_CAPACITY {
            return Err(HardValidationError::CapacityOutOfBounds {
                capacity: raw.capacity,
                min: MIN_CAPACITY,
                max: MAX_QUEUE_CAPACITY,
            }
            .into());
        }

        if raw.capacity % 4 != 0 {
            return Err(HardValidationError::InvalidFieldValue {
                field: "capacity",
                value: raw.capacity.to_string(),
                reason: "Queue capacity must be a multiple of 4".to_string(),
            }
            .into());
        }

        Ok(QueueConfig {
            capacity: raw.capacity,
            options: QueueOptions {
                force_notify: raw.force_notify,
                suppress_full_notify: raw.suppress_full_notify,
            },
        })
    }
}
