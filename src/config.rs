//! Engine configuration
//!
//! Loaded from and saved to JSON. Every field has a default, so a partial
//! file (or `{}`) is a valid configuration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::{CarveError, CarveResult};

/// Default buffered reader size (256 KiB)
pub const DEFAULT_BUFFER_SIZE: usize = 256 * 1024;
/// Smallest buffer a `BufferedReader` accepts
pub const MIN_BUFFER_SIZE: usize = 16;
/// Read-back margin is `buffer_size / DEFAULT_READ_BACK_DIVISOR`
pub const DEFAULT_READ_BACK_DIVISOR: usize = 32;
/// Default cap on bytes inspected when probing a codec stream (4 MiB)
pub const DEFAULT_MAX_INSPECT_BYTES: u64 = 4 * 1024 * 1024;
/// Default maximum number of simultaneously open per-file readers
pub const DEFAULT_MAX_OPEN_READERS: usize = 32;
/// Upper bound for the automatically derived cache budget (64 MiB)
pub const MAX_AUTO_CACHE_BUDGET: u64 = 64 * 1024 * 1024;

/// Tunables consumed by readers, scanners and the block cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CarveConfig {
    /// Size of each buffered reader's buffer in bytes
    pub buffer_size: usize,
    /// Fraction of the buffer kept behind the read position on forward shifts
    pub read_back_divisor: usize,
    /// Whether container blocks from different detectors may overlap
    pub allow_container_overlap: bool,
    /// Whether codec blocks from different detectors may overlap
    pub allow_codec_overlap: bool,
    /// Maximum share of unknown bytes (percent) in a complete codec stream
    pub completeness_percentage: u8,
    /// Absolute floor for the unknown-byte allowance
    pub completeness_min_bytes: u64,
    /// Cap on bytes inspected per codec stream probe
    pub max_inspect_bytes: u64,
    /// Maximum number of per-file readers a pool keeps open
    pub max_open_readers: usize,
    /// Block cache byte budget; `None` derives it from available memory
    pub cache_budget_bytes: Option<u64>,
    /// Hard-fail on non-deterministic detectors; `None` follows the build profile
    pub strict_consistency: Option<bool>,
}

impl Default for CarveConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            read_back_divisor: DEFAULT_READ_BACK_DIVISOR,
            allow_container_overlap: true,
            allow_codec_overlap: false,
            completeness_percentage: 5,
            completeness_min_bytes: 1024,
            max_inspect_bytes: DEFAULT_MAX_INSPECT_BYTES,
            max_open_readers: DEFAULT_MAX_OPEN_READERS,
            cache_budget_bytes: None,
            strict_consistency: None,
        }
    }
}

impl CarveConfig {
    /// Check every field against its allowed range
    pub fn validate(&self) -> CarveResult<()> {
        if self.buffer_size < MIN_BUFFER_SIZE {
            return Err(CarveError::Config(format!(
                "buffer_size {} is below the minimum of {}",
                self.buffer_size, MIN_BUFFER_SIZE
            )));
        }
        if self.read_back_divisor < 2 {
            return Err(CarveError::Config(format!(
                "read_back_divisor must be at least 2, got {}",
                self.read_back_divisor
            )));
        }
        if self.completeness_percentage > 100 {
            return Err(CarveError::Config(format!(
                "completeness_percentage {} exceeds 100",
                self.completeness_percentage
            )));
        }
        if self.max_inspect_bytes == 0 {
            return Err(CarveError::Config("max_inspect_bytes must be positive".into()));
        }
        if self.max_open_readers == 0 {
            return Err(CarveError::Config("max_open_readers must be positive".into()));
        }
        Ok(())
    }

    /// Load and validate a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> CarveResult<Self> {
        let path = path.as_ref();
        info!("Loading carve configuration from: {:?}", path);

        let json = fs::read_to_string(path).map_err(|e| CarveError::io(path, e))?;
        let config: CarveConfig = serde_json::from_str(&json)
            .map_err(|e| CarveError::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;

        debug!(?config, "Configuration loaded");
        Ok(config)
    }

    /// Save as pretty JSON
    pub fn save(&self, path: impl AsRef<Path>) -> CarveResult<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| CarveError::Config(format!("Failed to serialize: {}", e)))?;
        fs::write(path, &json).map_err(|e| CarveError::io(path, e))?;
        info!("Configuration saved: {} bytes", json.len());
        Ok(())
    }

    /// Bytes kept behind the read position when a buffer shifts forward
    pub fn read_back_bytes(&self) -> usize {
        self.buffer_size / self.read_back_divisor.max(1)
    }

    /// Maximum number of unknown bytes a codec stream of `length` bytes may
    /// contain and still be considered complete
    pub fn completeness_threshold(&self, length: u64) -> u64 {
        let share = length.saturating_mul(self.completeness_percentage as u64) / 100;
        share.max(self.completeness_min_bytes)
    }

    /// Whether consistency mismatches are fatal
    pub fn strict(&self) -> bool {
        self.strict_consistency.unwrap_or(cfg!(debug_assertions))
    }

    /// Effective block cache budget in bytes
    pub fn cache_budget(&self) -> u64 {
        if let Some(budget) = self.cache_budget_bytes {
            return budget;
        }

        let mut system = sysinfo::System::new();
        system.refresh_memory();
        let available = system.available_memory();
        if available == 0 {
            warn!("Available memory unknown, using maximum automatic cache budget");
            return MAX_AUTO_CACHE_BUDGET;
        }
        (available / 16).min(MAX_AUTO_CACHE_BUDGET)
    }
}
