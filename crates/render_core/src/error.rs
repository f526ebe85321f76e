//! Crate-wide error type
//!
//! Each subsystem reports its own error enum. Callers that drive several of
//! them at once, such as a frame loop, can use [`RenderCoreError`] and `?`
//! their way through.

use crate::config::ConfigError;
use crate::device::DeviceError;
use crate::render::targets::PoolError;
use crate::render::textures::TextureUnitError;
use crate::scene::SceneError;
use thiserror::Error;

/// Result type for operations spanning several subsystems
pub type RenderCoreResult<T> = Result<T, RenderCoreError>;

/// Any error the rendering core can report
#[derive(Debug, Error)]
pub enum RenderCoreError {
    /// Graphics device failure
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Texture unit stack discipline or exhaustion
    #[error(transparent)]
    TextureUnits(#[from] TextureUnitError),

    /// Render target pool failure
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// Scene set contract violation
    #[error(transparent)]
    Scene(#[from] SceneError),

    /// Configuration could not be loaded or is invalid
    #[error(transparent)]
    Config(#[from] ConfigError),
}
