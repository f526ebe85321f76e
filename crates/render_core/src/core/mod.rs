//! # Core Module
//!
//! Shared configuration for every subsystem of the rendering core.
//!
//! ## Organization
//!
//! - **Config**: one serializable structure covering texture units, pools,
//!   scene sets and logging

pub mod config;

pub use config::{
    LoggingConfig, PoolConfig, PoolLimits, RenderCoreConfig, SceneConfig, TextureUnitConfig,
};
pub use crate::config::{Config, ConfigError};
