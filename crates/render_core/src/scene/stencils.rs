//! Stencil instances
//!
//! Ungrouped single instances rasterised into the stencil buffer before the
//! geometry pass, to mask where the scene is (or is not) drawn. Adding an
//! instance twice replaces the earlier entry.

use super::instance::{Instance, InstanceSingle};
use crate::foundation::diagnostics::{default_diagnostics, report, Diagnostics, Level};
use crate::foundation::ids::InstanceId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

const TARGET: &str = "render_core::scene::stencils";

/// How stencil instances affect the rest of the frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StencilMode {
    /// Only pixels covered by an instance are rendered
    InstancesArePositive,
    /// Pixels covered by an instance are not rendered
    #[default]
    InstancesAreNegative,
}

/// Callbacks driven by [`SceneStencils::execute`]
#[allow(unused_variables)]
pub trait StencilsConsumer {
    /// Error type returned by the pass
    type Error;

    /// Start of the traversal
    fn on_start(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    /// First instance of a run sharing one array object
    fn on_instance_single_array_start(&mut self, instance: &InstanceSingle) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Draw one instance
    fn on_instance_single(&mut self, instance: &InstanceSingle) -> Result<(), Self::Error> {
        Ok(())
    }

    /// End of the traversal, called even when an earlier callback failed
    fn on_finish(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// The frame's stencil instances
#[derive(Debug)]
pub struct SceneStencils {
    instances: HashMap<InstanceId, Arc<InstanceSingle>>,
    sorted: Vec<InstanceId>,
    mode: StencilMode,
    diagnostics: Arc<dyn Diagnostics>,
}

impl Default for SceneStencils {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneStencils {
    /// Create an empty set in [`StencilMode::InstancesAreNegative`]
    pub fn new() -> Self {
        Self::with_diagnostics(0, default_diagnostics())
    }

    /// Create an empty set reporting through the given sink
    pub fn with_diagnostics(capacity: usize, diagnostics: Arc<dyn Diagnostics>) -> Self {
        Self {
            instances: HashMap::with_capacity(capacity),
            sorted: Vec::with_capacity(capacity),
            mode: StencilMode::default(),
            diagnostics,
        }
    }

    /// Current mode
    pub const fn mode(&self) -> StencilMode {
        self.mode
    }

    /// Change the mode. Survives `reset`.
    pub fn set_mode(&mut self, mode: StencilMode) {
        self.mode = mode;
    }

    /// Add an instance, replacing any earlier one with the same id
    pub fn add_single(&mut self, instance: Arc<InstanceSingle>) {
        let id = instance.instance_id();
        report!(self.diagnostics, Level::Trace, TARGET, "stencil add single ({})", id);
        self.instances.insert(id, instance);
    }

    /// Remove every instance
    pub fn reset(&mut self) {
        report!(self.diagnostics, Level::Trace, TARGET, "reset");
        self.instances.clear();
        self.sorted.clear();
    }

    /// Number of instances
    pub fn count(&self) -> usize {
        self.instances.len()
    }

    /// Whether the set holds nothing
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Walk the instances sorted by array object, then id
    pub fn execute<C: StencilsConsumer>(&mut self, consumer: &mut C) -> Result<(), C::Error> {
        let instances = &self.instances;
        self.sorted.clear();
        self.sorted.extend(instances.keys().copied());
        self.sorted
            .sort_unstable_by_key(|id| (instances.get(id).map(|i| i.array_object()), *id));

        let walked = consumer.on_start().and_then(|()| self.walk(consumer));
        let finished = consumer.on_finish();
        walked.and(finished)
    }

    fn walk<C: StencilsConsumer>(&self, consumer: &mut C) -> Result<(), C::Error> {
        let mut current_array = None;
        for instance in self.sorted.iter().filter_map(|id| self.instances.get(id)) {
            if current_array != Some(instance.array_object()) {
                consumer.on_instance_single_array_start(instance)?;
                current_array = Some(instance.array_object());
            }
            consumer.on_instance_single(instance)?;
        }
        Ok(())
    }
}
