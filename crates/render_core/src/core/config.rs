//! # Unified Configuration
//!
//! All tunables of the rendering core in one serializable structure. Files
//! may be TOML or RON; any section left out takes its default.
//!
//! ## Configuration Categories
//!
//! - **Texture units**: hardware unit count and maximum context nesting
//! - **Pools**: soft and hard byte limits per render-target pool
//! - **Scene**: initial capacity reserved by each scene set
//! - **Logging**: the level the demo binary hands to `env_logger`

use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub use crate::config::{Config, ConfigError};

const MIB: u64 = 1024 * 1024;

/// # Texture Unit Configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextureUnitConfig {
    /// Number of hardware texture units to manage
    pub units: u32,
    /// Maximum number of live contexts, the root included
    pub max_stack_depth: usize,
}

impl TextureUnitConfig {
    /// Create a texture unit configuration
    pub const fn new(units: u32, max_stack_depth: usize) -> Self {
        Self {
            units,
            max_stack_depth,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.units == 0 {
            return Err("Texture unit count must be at least 1".to_string());
        }
        if self.max_stack_depth == 0 {
            return Err("Texture unit stack depth must be at least 1".to_string());
        }
        Ok(())
    }
}

impl Default for TextureUnitConfig {
    fn default() -> Self {
        Self::new(16, 32)
    }
}

/// # Pool Limits
///
/// Byte ceilings for one render-target pool. Held bytes never exceed
/// `hard_bytes`. Whenever they exceed `soft_bytes`, idle entries are evicted
/// until held bytes drop to `soft_bytes - eviction_margin_bytes` or nothing
/// idle is left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolLimits {
    /// Advisory ceiling
    pub soft_bytes: u64,
    /// Strict ceiling
    pub hard_bytes: u64,
    /// How far below the soft ceiling eviction goes once triggered
    pub eviction_margin_bytes: u64,
}

impl PoolLimits {
    /// Limits with no eviction margin
    pub const fn new(soft_bytes: u64, hard_bytes: u64) -> Self {
        Self {
            soft_bytes,
            hard_bytes,
            eviction_margin_bytes: 0,
        }
    }

    /// Set the eviction margin
    pub const fn with_eviction_margin(mut self, margin_bytes: u64) -> Self {
        self.eviction_margin_bytes = margin_bytes;
        self
    }

    /// Held bytes that soft eviction aims for
    pub const fn eviction_target(&self) -> u64 {
        self.soft_bytes.saturating_sub(self.eviction_margin_bytes)
    }

    /// Validate the limits
    pub fn validate(&self) -> Result<(), String> {
        if self.soft_bytes > self.hard_bytes {
            return Err(format!(
                "Soft limit {} exceeds hard limit {}",
                self.soft_bytes, self.hard_bytes
            ));
        }
        if self.eviction_margin_bytes > self.soft_bytes {
            return Err(format!(
                "Eviction margin {} exceeds soft limit {}",
                self.eviction_margin_bytes, self.soft_bytes
            ));
        }
        Ok(())
    }
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self::new(64 * MIB, 256 * MIB)
    }
}

/// # Pool Configuration
///
/// One set of limits per concrete render-target pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Geometry buffer pool
    pub geometry: PoolLimits,
    /// Light buffer pool
    pub light: PoolLimits,
    /// Image buffer pool
    pub image: PoolLimits,
    /// Depth variance (shadow map) pool
    pub depth_variance: PoolLimits,
    /// Ambient occlusion pool
    pub ambient_occlusion: PoolLimits,
}

impl PoolConfig {
    /// Validate every pool's limits
    pub fn validate(&self) -> Result<(), String> {
        let pools = [
            ("geometry", &self.geometry),
            ("light", &self.light),
            ("image", &self.image),
            ("depth_variance", &self.depth_variance),
            ("ambient_occlusion", &self.ambient_occlusion),
        ];
        for (name, limits) in pools {
            limits.validate().map_err(|e| format!("{} pool: {}", name, e))?;
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            geometry: PoolLimits::new(64 * MIB, 256 * MIB),
            light: PoolLimits::new(32 * MIB, 128 * MIB),
            image: PoolLimits::new(64 * MIB, 256 * MIB),
            depth_variance: PoolLimits::new(32 * MIB, 128 * MIB),
            ambient_occlusion: PoolLimits::new(16 * MIB, 64 * MIB),
        }
    }
}

/// # Scene Configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    /// Items reserved up front by each scene set
    pub initial_capacity: usize,
}

impl SceneConfig {
    /// Set the initial capacity
    pub const fn with_initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 256,
        }
    }
}

/// # Logging Configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level name (`off`, `error`, `warn`, `info`, `debug`, `trace`)
    pub level: String,
}

impl LoggingConfig {
    /// Set log level
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// The configured level as a `log` filter
    pub fn level_filter(&self) -> Result<log::LevelFilter, String> {
        log::LevelFilter::from_str(&self.level)
            .map_err(|_| format!("Unknown log level: {}", self.level))
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// # Complete Rendering Core Configuration
///
/// Top-level structure applications load and hand to each subsystem.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderCoreConfig {
    /// Texture unit allocator
    pub texture_units: TextureUnitConfig,
    /// Render-target pools
    pub pools: PoolConfig,
    /// Scene sets
    pub scene: SceneConfig,
    /// Logging
    pub logging: LoggingConfig,
}

impl RenderCoreConfig {
    /// Set texture unit configuration
    pub fn with_texture_units(mut self, texture_units: TextureUnitConfig) -> Self {
        self.texture_units = texture_units;
        self
    }

    /// Set pool configuration
    pub fn with_pools(mut self, pools: PoolConfig) -> Self {
        self.pools = pools;
        self
    }

    /// Set scene configuration
    pub fn with_scene(mut self, scene: SceneConfig) -> Self {
        self.scene = scene;
        self
    }

    /// Set logging configuration
    pub fn with_logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = logging;
        self
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), String> {
        self.texture_units.validate()?;
        self.pools.validate()?;
        self.logging.level_filter()?;
        Ok(())
    }

    /// Load from a `.toml` or `.ron` file and validate
    pub fn load_validated(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let config = Self::load_from_file(path)?;
        config.validate().map_err(ConfigError::Validation)?;
        Ok(config)
    }
}

impl Config for RenderCoreConfig {}
