//! Descriptor ring configuration
//!
//! Compile-time defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Environment variables (runtime)
//! 2. File named by `DESCRING_CONFIG_RS` (compile-time)
//! 3. Library defaults
//!
//! # Example
//!
//! ```rust,ignore
//! use descring_runtime::config::DescConfig;
//!
//! let config = DescConfig::from_env()
//!     .num_cores(4)
//!     .ring_capacity(256);
//! ```

pub mod defaults;

use std::time::Duration;

use descring_core::constants::{MAX_CORES, TAG_SPACE};
use descring_core::env::env_get;

/// Bootstrap configuration with builder pattern.
#[derive(Debug, Clone)]
pub struct DescConfig {
    /// Number of cores (rings, pool pairs, reclamation workers)
    pub num_cores: usize,
    /// Descriptors per core
    pub ring_capacity: usize,
    /// Entries per core lazy completion list
    pub lazy_capacity: usize,
    /// Pre-mapped inbound pages per core
    pub read_pool_pages: usize,
    /// Pre-mapped outbound pages per core
    pub write_pool_pages: usize,
    /// Lazy list length at which completion kicks the core's worker
    pub lazy_kick_threshold: usize,
    /// Idle park timeout of reclamation workers
    pub worker_park_timeout: Duration,
    /// Consecutive mapping failures tolerated while filling one pool
    pub map_retry_limit: usize,
}

impl Default for DescConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

fn detected_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .min(MAX_CORES)
}

fn default_cores() -> usize {
    if defaults::NUM_CORES == 0 {
        detected_cores()
    } else {
        defaults::NUM_CORES
    }
}

impl DescConfig {
    /// Create config from compile-time defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `DESCRING_NUM_CORES` - Number of cores
    /// - `DESCRING_RING_CAPACITY` - Descriptors per core
    /// - `DESCRING_LAZY_CAPACITY` - Lazy list entries per core
    /// - `DESCRING_READ_POOL_PAGES` - Inbound pool pages per core
    /// - `DESCRING_WRITE_POOL_PAGES` - Outbound pool pages per core
    /// - `DESCRING_LAZY_KICK_THRESHOLD` - Lazy length that kicks the worker
    /// - `DESCRING_WORKER_PARK_TIMEOUT_MS` - Worker idle park timeout
    /// - `DESCRING_MAP_RETRY_LIMIT` - Mapping failures tolerated per pool
    pub fn from_env() -> Self {
        Self {
            num_cores: env_get("DESCRING_NUM_CORES", default_cores()),
            ring_capacity: env_get("DESCRING_RING_CAPACITY", defaults::RING_CAPACITY),
            lazy_capacity: env_get("DESCRING_LAZY_CAPACITY", defaults::LAZY_CAPACITY),
            read_pool_pages: env_get("DESCRING_READ_POOL_PAGES", defaults::READ_POOL_PAGES),
            write_pool_pages: env_get("DESCRING_WRITE_POOL_PAGES", defaults::WRITE_POOL_PAGES),
            lazy_kick_threshold: env_get(
                "DESCRING_LAZY_KICK_THRESHOLD",
                defaults::LAZY_KICK_THRESHOLD,
            ),
            worker_park_timeout: Duration::from_millis(env_get(
                "DESCRING_WORKER_PARK_TIMEOUT_MS",
                defaults::WORKER_PARK_TIMEOUT_MS,
            )),
            map_retry_limit: env_get("DESCRING_MAP_RETRY_LIMIT", defaults::MAP_RETRY_LIMIT),
        }
    }

    /// Create config with explicit defaults (no env override).
    pub fn new() -> Self {
        Self {
            num_cores: default_cores(),
            ring_capacity: defaults::RING_CAPACITY,
            lazy_capacity: defaults::LAZY_CAPACITY,
            read_pool_pages: defaults::READ_POOL_PAGES,
            write_pool_pages: defaults::WRITE_POOL_PAGES,
            lazy_kick_threshold: defaults::LAZY_KICK_THRESHOLD,
            worker_park_timeout: Duration::from_millis(defaults::WORKER_PARK_TIMEOUT_MS),
            map_retry_limit: defaults::MAP_RETRY_LIMIT,
        }
    }

    // Builder methods

    pub fn num_cores(mut self, n: usize) -> Self {
        self.num_cores = n;
        self
    }

    pub fn ring_capacity(mut self, n: usize) -> Self {
        self.ring_capacity = n;
        self
    }

    pub fn lazy_capacity(mut self, n: usize) -> Self {
        self.lazy_capacity = n;
        self
    }

    pub fn read_pool_pages(mut self, n: usize) -> Self {
        self.read_pool_pages = n;
        self
    }

    pub fn write_pool_pages(mut self, n: usize) -> Self {
        self.write_pool_pages = n;
        self
    }

    pub fn lazy_kick_threshold(mut self, n: usize) -> Self {
        self.lazy_kick_threshold = n;
        self
    }

    pub fn worker_park_timeout(mut self, d: Duration) -> Self {
        self.worker_park_timeout = d;
        self
    }

    pub fn map_retry_limit(mut self, n: usize) -> Self {
        self.map_retry_limit = n;
        self
    }

    /// Total descriptor slots across all rings
    #[inline]
    pub fn total_slots(&self) -> usize {
        self.num_cores.saturating_mul(self.ring_capacity)
    }

    /// Whether every slot can be named by a device command identifier
    #[inline]
    pub fn fits_tag_space(&self) -> bool {
        self.total_slots() <= TAG_SPACE
    }

    /// Validate configuration and return errors if invalid.
    ///
    /// The tag-space bound is not checked here; bootstrap asserts it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_cores == 0 {
            return Err(ConfigError::InvalidValue("num_cores must be > 0"));
        }
        if self.num_cores > MAX_CORES {
            return Err(ConfigError::InvalidValue("num_cores exceeds MAX_CORES"));
        }
        if self.ring_capacity == 0 {
            return Err(ConfigError::InvalidValue("ring_capacity must be > 0"));
        }
        if self.ring_capacity > u16::MAX as usize {
            return Err(ConfigError::InvalidValue("ring_capacity must fit in u16"));
        }
        if self.lazy_capacity < self.ring_capacity {
            return Err(ConfigError::InvalidValue(
                "lazy_capacity must be >= ring_capacity",
            ));
        }
        if self.lazy_kick_threshold == 0 {
            return Err(ConfigError::InvalidValue("lazy_kick_threshold must be > 0"));
        }
        Ok(())
    }

    /// Print configuration (for debugging)
    pub fn print(&self) {
        eprintln!("descring configuration:");
        eprintln!("  num_cores:            {}", self.num_cores);
        eprintln!("  ring_capacity:        {}", self.ring_capacity);
        eprintln!("  lazy_capacity:        {}", self.lazy_capacity);
        eprintln!("  read_pool_pages:      {}", self.read_pool_pages);
        eprintln!("  write_pool_pages:     {}", self.write_pool_pages);
        eprintln!("  lazy_kick_threshold:  {}", self.lazy_kick_threshold);
        eprintln!("  worker_park_timeout:  {:?}", self.worker_park_timeout);
        eprintln!("  map_retry_limit:      {}", self.map_retry_limit);
    }
}

/// Configuration error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for descring_core::DescError {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::InvalidValue(msg) => descring_core::DescError::InvalidConfig(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = DescConfig::new();
        assert!(config.num_cores >= 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = DescConfig::new()
            .num_cores(2)
            .ring_capacity(4)
            .lazy_capacity(4)
            .worker_park_timeout(Duration::from_millis(5));

        assert_eq!(config.num_cores, 2);
        assert_eq!(config.total_slots(), 8);
        assert_eq!(config.worker_park_timeout, Duration::from_millis(5));
        assert!(config.fits_tag_space());
    }

    #[test]
    fn test_validation() {
        assert!(DescConfig::new().num_cores(0).validate().is_err());
        assert!(DescConfig::new().num_cores(MAX_CORES + 1).validate().is_err());
        assert!(DescConfig::new().ring_capacity(0).validate().is_err());

        let undersized = DescConfig::new().ring_capacity(64).lazy_capacity(32);
        assert_eq!(
            undersized.validate(),
            Err(ConfigError::InvalidValue("lazy_capacity must be >= ring_capacity"))
        );
    }

    #[test]
    fn test_tag_space() {
        let config = DescConfig::new().num_cores(64).ring_capacity(1024);
        assert!(!config.fits_tag_space());
        assert!(config.validate().is_ok());
    }
}
