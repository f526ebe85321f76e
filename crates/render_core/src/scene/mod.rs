//! # Scene Batching
//!
//! Per-frame containers for everything a deferred frame draws, organised so
//! a render pass can walk them with as few state changes as possible.
//!
//! ## Architecture
//!
//! Every set follows the same frame lifecycle:
//!
//! ```text
//! reset() ──► add_*(...) ... ──► execute(&mut consumer) ──► reset() ...
//! ```
//!
//! Population and traversal never overlap: `execute` takes `&mut self`, so
//! the borrow checker rules out adding while a pass is walking the set.
//!
//! Inside each group, items are indexed shader -> material -> instance and
//! visited in that nesting, with instances sorted by array object so a pass
//! binds each mesh once per run.
//!
//! ## Organization
//!
//! - **opaques**: lit geometry, single/batched/billboarded ([`SceneOpaques`])
//! - **depth**: depth-only geometry with a face culling flag ([`DepthInstances`])
//! - **lights**: lights with optional clip volumes ([`SceneLights`])
//! - **stencils**: ungrouped stencil instances ([`SceneStencils`])
//! - **group**, **instance**, **material**: the values the sets hold

pub mod depth;
pub mod group;
mod index;
pub mod instance;
pub mod lights;
pub mod material;
pub mod opaques;
pub mod stencils;

pub use depth::{DepthInstances, DepthInstancesConsumer, FaceSelection};
pub use group::{Group, MAXIMUM_GROUPS};
pub use instance::{Billboard, Instance, InstanceBatched, InstanceBillboarded, InstanceSingle};
pub use lights::{ClipGroup, LightSingle, LightsConsumer, SceneLights};
pub use material::{Material, MaterialBinding, Shader};
pub use opaques::{OpaquesConsumer, SceneOpaques};
pub use stencils::{SceneStencils, StencilMode, StencilsConsumer};

use crate::foundation::ids::{InstanceId, LightId};

/// Result type for scene set operations
pub type SceneResult<T> = Result<T, SceneError>;

/// Contract violations raised while populating a scene set
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SceneError {
    /// The instance was already added to this set since the last reset
    #[error("Instance {instance} is already visible (added again in {group})")]
    InstanceAlreadyVisible {
        /// The duplicated instance
        instance: InstanceId,
        /// Group of the rejected addition
        group: Group,
    },

    /// The light was already added to this group since the last reset
    #[error("Light {light} is already visible in {group}")]
    LightAlreadyVisible {
        /// The duplicated light
        light: LightId,
        /// Group it was added to
        group: Group,
    },

    /// Group numbers are `1..MAXIMUM_GROUPS`
    #[error("Invalid group {0}, expected 1..{max}", max = MAXIMUM_GROUPS)]
    InvalidGroup(u8),

    /// The clip group handle predates the last reset
    #[error("Clip group was deleted by a reset")]
    ClipGroupDeleted,

    /// A clip group for this volume already exists in the group
    #[error("Clip group for volume {volume} already exists in {group}")]
    ClipGroupAlreadyExists {
        /// Volume instance bounding the clip group
        volume: InstanceId,
        /// Group holding it
        group: Group,
    },
}
