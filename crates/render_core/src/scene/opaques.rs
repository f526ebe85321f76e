//! Opaque instances
//!
//! The set the geometry pass draws from. Three kinds of instance share one
//! group range: batched, billboarded and single. Per frame:
//!
//! ```text
//! on_start
//! on_instance_batched_update        once per batched instance
//! on_instance_billboarded_update    once per billboarded instance
//! for each non-empty group, lowest first:
//!     on_start_group
//!     batched     shader > material > array > instance
//!     billboarded shader > material > array > instance
//!     single      shader > material > array > instance
//!     on_finish_group
//! on_finish
//! ```

use super::group::Group;
use super::index::{InstanceSet, Visit};
use super::instance::{Instance, InstanceBatched, InstanceBillboarded, InstanceSingle};
use super::material::{Material, Shader};
use super::SceneResult;
use crate::foundation::diagnostics::{default_diagnostics, report, Diagnostics, Level};
use std::sync::Arc;

const TARGET: &str = "render_core::scene::opaques";

/// Callbacks driven by [`SceneOpaques::execute`]
///
/// Every callback defaults to doing nothing, so a pass only implements the
/// ones it draws with. The first error stops the traversal; `on_finish` still
/// runs.
#[allow(unused_variables)]
pub trait OpaquesConsumer {
    /// Error type returned by the pass
    type Error;

    /// Start of the frame's traversal
    fn on_start(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Upload per-frame data for a batched instance
    fn on_instance_batched_update(&mut self, instance: &InstanceBatched) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Upload per-frame data for a billboarded instance
    fn on_instance_billboarded_update(
        &mut self,
        instance: &InstanceBillboarded,
    ) -> Result<(), Self::Error> {
        Ok(())
    }

    /// A group with at least one instance begins
    fn on_start_group(&mut self, group: Group) -> Result<(), Self::Error> {
        Ok(())
    }

    /// First batched instance drawn with this shader
    fn on_instance_batched_shader_start(&mut self, shader: &Shader) -> Result<(), Self::Error> {
        Ok(())
    }

    /// First batched instance drawn with this material
    fn on_instance_batched_material_start(&mut self, material: &Material) -> Result<(), Self::Error> {
        Ok(())
    }

    /// First batched instance of a run sharing one array object
    fn on_instance_batched_array_start(&mut self, instance: &InstanceBatched) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Draw one batched instance
    fn on_instance_batched(
        &mut self,
        material: &Material,
        instance: &InstanceBatched,
    ) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Last batched instance of this material has been drawn
    fn on_instance_batched_material_finish(&mut self, material: &Material) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Last batched instance of this shader has been drawn
    fn on_instance_batched_shader_finish(&mut self, shader: &Shader) -> Result<(), Self::Error> {
        Ok(())
    }

    /// First billboarded instance drawn with this shader
    fn on_instance_billboarded_shader_start(&mut self, shader: &Shader) -> Result<(), Self::Error> {
        Ok(())
    }

    /// First billboarded instance drawn with this material
    fn on_instance_billboarded_material_start(&mut self, material: &Material) -> Result<(), Self::Error> {
        Ok(())
    }

    /// First billboarded instance of a run sharing one array object
    fn on_instance_billboarded_array_start(
        &mut self,
        instance: &InstanceBillboarded,
    ) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Draw one billboarded instance
    fn on_instance_billboarded(
        &mut self,
        material: &Material,
        instance: &InstanceBillboarded,
    ) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Last billboarded instance of this material has been drawn
    fn on_instance_billboarded_material_finish(&mut self, material: &Material) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Last billboarded instance of this shader has been drawn
    fn on_instance_billboarded_shader_finish(&mut self, shader: &Shader) -> Result<(), Self::Error> {
        Ok(())
    }

    /// First single instance drawn with this shader
    fn on_instance_single_shader_start(&mut self, shader: &Shader) -> Result<(), Self::Error> {
        Ok(())
    }

    /// First single instance drawn with this material
    fn on_instance_single_material_start(&mut self, material: &Material) -> Result<(), Self::Error> {
        Ok(())
    }

    /// First single instance of a run sharing one array object
    fn on_instance_single_array_start(&mut self, instance: &InstanceSingle) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Draw one single instance
    fn on_instance_single(
        &mut self,
        material: &Material,
        instance: &InstanceSingle,
    ) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Last single instance of this material has been drawn
    fn on_instance_single_material_finish(&mut self, material: &Material) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Last single instance of this shader has been drawn
    fn on_instance_single_shader_finish(&mut self, shader: &Shader) -> Result<(), Self::Error> {
        Ok(())
    }

    /// The group's last instance has been visited
    fn on_finish_group(&mut self, group: Group) -> Result<(), Self::Error> {
        Ok(())
    }

    /// End of the traversal, called even when an earlier callback failed
    fn on_finish(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

fn visit_batched<C: OpaquesConsumer>(
    consumer: &mut C,
    visit: Visit<'_, InstanceBatched>,
) -> Result<(), C::Error> {
    match visit {
        Visit::ShaderStart(s) => consumer.on_instance_batched_shader_start(s),
        Visit::MaterialStart(m) => consumer.on_instance_batched_material_start(m),
        Visit::ArrayStart(i) => consumer.on_instance_batched_array_start(i),
        Visit::Item(m, i) => consumer.on_instance_batched(m, i),
        Visit::MaterialFinish(m) => consumer.on_instance_batched_material_finish(m),
        Visit::ShaderFinish(s) => consumer.on_instance_batched_shader_finish(s),
    }
}

fn visit_billboarded<C: OpaquesConsumer>(
    consumer: &mut C,
    visit: Visit<'_, InstanceBillboarded>,
) -> Result<(), C::Error> {
    match visit {
        Visit::ShaderStart(s) => consumer.on_instance_billboarded_shader_start(s),
        Visit::MaterialStart(m) => consumer.on_instance_billboarded_material_start(m),
        Visit::ArrayStart(i) => consumer.on_instance_billboarded_array_start(i),
        Visit::Item(m, i) => consumer.on_instance_billboarded(m, i),
        Visit::MaterialFinish(m) => consumer.on_instance_billboarded_material_finish(m),
        Visit::ShaderFinish(s) => consumer.on_instance_billboarded_shader_finish(s),
    }
}

fn visit_single<C: OpaquesConsumer>(
    consumer: &mut C,
    visit: Visit<'_, InstanceSingle>,
) -> Result<(), C::Error> {
    match visit {
        Visit::ShaderStart(s) => consumer.on_instance_single_shader_start(s),
        Visit::MaterialStart(m) => consumer.on_instance_single_material_start(m),
        Visit::ArrayStart(i) => consumer.on_instance_single_array_start(i),
        Visit::Item(m, i) => consumer.on_instance_single(m, i),
        Visit::MaterialFinish(m) => consumer.on_instance_single_material_finish(m),
        Visit::ShaderFinish(s) => consumer.on_instance_single_shader_finish(s),
    }
}

/// The frame's opaque instances
#[derive(Debug)]
pub struct SceneOpaques {
    batched: InstanceSet<InstanceBatched>,
    billboarded: InstanceSet<InstanceBillboarded>,
    singles: InstanceSet<InstanceSingle>,
    diagnostics: Arc<dyn Diagnostics>,
}

impl Default for SceneOpaques {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneOpaques {
    /// Create an empty set
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create an empty set sized for `capacity` single instances
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_diagnostics(capacity, default_diagnostics())
    }

    /// Create an empty set reporting through the given sink
    pub fn with_diagnostics(capacity: usize, diagnostics: Arc<dyn Diagnostics>) -> Self {
        Self {
            batched: InstanceSet::with_capacity(0),
            billboarded: InstanceSet::with_capacity(0),
            singles: InstanceSet::with_capacity(capacity),
            diagnostics,
        }
    }

    /// Add a single instance to the default group
    pub fn add_single(&mut self, instance: Arc<InstanceSingle>, material: Arc<Material>) -> SceneResult<()> {
        self.add_single_grouped(instance, material, Group::DEFAULT)
    }

    /// Add a single instance
    ///
    /// # Errors
    ///
    /// [`SceneError::InstanceAlreadyVisible`](super::SceneError::InstanceAlreadyVisible)
    /// if the instance was added since the last reset.
    pub fn add_single_grouped(
        &mut self,
        instance: Arc<InstanceSingle>,
        material: Arc<Material>,
        group: Group,
    ) -> SceneResult<()> {
        self.trace_add("single", instance.instance_id(), group, &material);
        self.singles.insert(instance, material, group)
    }

    /// Add a batched instance to the default group
    pub fn add_batched(&mut self, instance: Arc<InstanceBatched>, material: Arc<Material>) -> SceneResult<()> {
        self.add_batched_grouped(instance, material, Group::DEFAULT)
    }

    /// Add a batched instance
    pub fn add_batched_grouped(
        &mut self,
        instance: Arc<InstanceBatched>,
        material: Arc<Material>,
        group: Group,
    ) -> SceneResult<()> {
        self.trace_add("batched", instance.instance_id(), group, &material);
        self.batched.insert(instance, material, group)
    }

    /// Add a billboarded instance to the default group
    pub fn add_billboarded(
        &mut self,
        instance: Arc<InstanceBillboarded>,
        material: Arc<Material>,
    ) -> SceneResult<()> {
        self.add_billboarded_grouped(instance, material, Group::DEFAULT)
    }

    /// Add a billboarded instance
    pub fn add_billboarded_grouped(
        &mut self,
        instance: Arc<InstanceBillboarded>,
        material: Arc<Material>,
        group: Group,
    ) -> SceneResult<()> {
        self.trace_add("billboarded", instance.instance_id(), group, &material);
        self.billboarded.insert(instance, material, group)
    }

    fn trace_add(&self, kind: &str, instance: impl std::fmt::Display, group: Group, material: &Material) {
        report!(
            self.diagnostics,
            Level::Trace,
            TARGET,
            "add {} ({}, {}, {}, {})",
            kind,
            instance,
            group,
            material.id(),
            material.shader().id()
        );
    }

    /// Remove everything, keeping allocated capacity
    pub fn reset(&mut self) {
        report!(self.diagnostics, Level::Trace, TARGET, "reset");
        self.batched.reset();
        self.billboarded.reset();
        self.singles.reset();
    }

    /// Number of instances of every kind
    pub fn count(&self) -> usize {
        self.batched.len() + self.billboarded.len() + self.singles.len()
    }

    /// Whether the set holds nothing
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// One past the highest group used since the last reset
    pub fn group_max(&self) -> usize {
        self.batched
            .group_max()
            .max(self.billboarded.group_max())
            .max(self.singles.group_max())
    }

    /// Walk the set, driving `consumer`
    ///
    /// # Errors
    ///
    /// The first error any callback returns. `on_finish` is called in every
    /// case; if it fails too, the earlier error wins.
    pub fn execute<C: OpaquesConsumer>(&mut self, consumer: &mut C) -> Result<(), C::Error> {
        self.batched.sort_active();
        self.billboarded.sort_active();
        self.singles.sort_active();

        let walked = consumer.on_start().and_then(|()| self.walk(consumer));
        let finished = consumer.on_finish();
        walked.and(finished)
    }

    fn walk<C: OpaquesConsumer>(&self, consumer: &mut C) -> Result<(), C::Error> {
        for (_, group) in self.batched.active_groups() {
            for instance in group.instances() {
                consumer.on_instance_batched_update(instance)?;
            }
        }
        for (_, group) in self.billboarded.active_groups() {
            for instance in group.instances() {
                consumer.on_instance_billboarded_update(instance)?;
            }
        }

        for group in Group::all().take(self.group_max().saturating_sub(1)) {
            let batched = self.batched.group(group);
            let billboarded = self.billboarded.group(group);
            let singles = self.singles.group(group);
            if batched.is_empty() && billboarded.is_empty() && singles.is_empty() {
                continue;
            }

            consumer.on_start_group(group)?;
            batched.traverse(|v| visit_batched(consumer, v))?;
            billboarded.traverse(|v| visit_billboarded(consumer, v))?;
            singles.traverse(|v| visit_single(consumer, v))?;
            consumer.on_finish_group(group)?;
        }
        Ok(())
    }
}
