//! Depth-only instances
//!
//! Geometry rendered into depth (and depth-variance) buffers, typically from
//! a light's point of view. Grouped like opaques, without billboards, and
//! carrying the face culling mode the depth pass should use.

use super::group::Group;
use super::index::{InstanceSet, Visit};
use super::instance::{Instance, InstanceBatched, InstanceSingle};
use super::material::{Material, Shader};
use super::SceneResult;
use crate::foundation::diagnostics::{default_diagnostics, report, Diagnostics, Level};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const TARGET: &str = "render_core::scene::depth";

/// Faces discarded by culling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FaceSelection {
    /// Cull back faces
    #[default]
    Back,
    /// Cull front faces
    Front,
    /// Cull everything; only useful for stencil-only passes
    FrontAndBack,
}

/// Callbacks driven by [`DepthInstances::execute`]
#[allow(unused_variables)]
pub trait DepthInstancesConsumer {
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

    /// A group with at least one entry begins
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

    /// The group begun by `on_start_group` is done, called even after a failure inside it
    fn on_finish_group(&mut self, group: Group) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Called even when an earlier callback failed
    fn on_finish(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// The frame's depth-only instances
#[derive(Debug)]
pub struct DepthInstances {
    batched: InstanceSet<InstanceBatched>,
    singles: InstanceSet<InstanceSingle>,
    face_culling: FaceSelection,
    diagnostics: Arc<dyn Diagnostics>,
}

impl Default for DepthInstances {
    fn default() -> Self {
        Self::new()
    }
}

impl DepthInstances {
    /// Create an empty set culling back faces
    pub fn new() -> Self {
        Self::with_diagnostics(0, default_diagnostics())
    }

    /// Create an empty set reporting through the given sink
    pub fn with_diagnostics(capacity: usize, diagnostics: Arc<dyn Diagnostics>) -> Self {
        Self {
            batched: InstanceSet::with_capacity(0),
            singles: InstanceSet::with_capacity(capacity),
            face_culling: FaceSelection::default(),
            diagnostics,
        }
    }

    /// Faces the depth pass culls
    pub const fn face_culling(&self) -> FaceSelection {
        self.face_culling
    }

    /// Change the culled faces. Survives `reset`.
    pub fn set_face_culling(&mut self, faces: FaceSelection) {
        self.face_culling = faces;
    }

    /// Add a single instance to the default group
    pub fn add_single(&mut self, instance: Arc<InstanceSingle>, material: Arc<Material>) -> SceneResult<()> {
        self.add_single_grouped(instance, material, Group::DEFAULT)
    }

    /// Add a single instance
    pub fn add_single_grouped(
        &mut self,
        instance: Arc<InstanceSingle>,
        material: Arc<Material>,
        group: Group,
    ) -> SceneResult<()> {
        report!(
            self.diagnostics,
            Level::Trace,
            TARGET,
            "add single ({}, {}, {}, {})",
            instance.instance_id(),
            group,
            material.id(),
            material.shader().id()
        );
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
        report!(
            self.diagnostics,
            Level::Trace,
            TARGET,
            "add batched ({}, {}, {}, {})",
            instance.instance_id(),
            group,
            material.id(),
            material.shader().id()
        );
        self.batched.insert(instance, material, group)
    }

    /// Remove every instance, keeping allocated capacity and the culling mode
    pub fn reset(&mut self) {
        report!(self.diagnostics, Level::Trace, TARGET, "reset");
        self.batched.reset();
        self.singles.reset();
    }

    /// Number of instances of both kinds
    pub fn count(&self) -> usize {
        self.batched.len() + self.singles.len()
    }

    /// Whether the set holds nothing
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Walk the set, driving `consumer`. `on_finish` always runs.
    pub fn execute<C: DepthInstancesConsumer>(&mut self, consumer: &mut C) -> Result<(), C::Error> {
        self.batched.sort_active();
        self.singles.sort_active();

        let walked = consumer.on_start().and_then(|()| self.walk(consumer));
        let finished = consumer.on_finish();
        walked.and(finished)
    }

    fn walk<C: DepthInstancesConsumer>(&self, consumer: &mut C) -> Result<(), C::Error> {
        for (_, group) in self.batched.active_groups() {
            for instance in group.instances() {
                consumer.on_instance_batched_update(instance)?;
            }
        }

        let group_max = self.batched.group_max().max(self.singles.group_max());
        for group in Group::all().take(group_max.saturating_sub(1)) {
            let batched = self.batched.group(group);
            let singles = self.singles.group(group);
            if batched.is_empty() && singles.is_empty() {
                continue;
            }

            consumer.on_start_group(group)?;
            batched.traverse(|visit| match visit {
                Visit::ShaderStart(s) => consumer.on_instance_batched_shader_start(s),
                Visit::MaterialStart(m) => consumer.on_instance_batched_material_start(m),
                Visit::ArrayStart(i) => consumer.on_instance_batched_array_start(i),
                Visit::Item(m, i) => consumer.on_instance_batched(m, i),
                Visit::MaterialFinish(m) => consumer.on_instance_batched_material_finish(m),
                Visit::ShaderFinish(s) => consumer.on_instance_batched_shader_finish(s),
            })?;
            singles.traverse(|visit| match visit {
                Visit::ShaderStart(s) => consumer.on_instance_single_shader_start(s),
                Visit::MaterialStart(m) => consumer.on_instance_single_material_start(m),
                Visit::ArrayStart(i) => consumer.on_instance_single_array_start(i),
                Visit::Item(m, i) => consumer.on_instance_single(m, i),
                Visit::MaterialFinish(m) => consumer.on_instance_single_material_finish(m),
                Visit::ShaderFinish(s) => consumer.on_instance_single_shader_finish(s),
            })?;
            consumer.on_finish_group(group)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ArrayObjectId, ProgramId};
    use crate::foundation::ids::IdPool;
    use crate::scene::SceneError;

    #[derive(Default)]
    struct Recorder(Vec<String>);

    impl DepthInstancesConsumer for Recorder {
        type Error = std::convert::Infallible;

        fn on_instance_batched_update(&mut self, i: &InstanceBatched) -> Result<(), Self::Error> {
            self.0.push(format!("update {}", i.instance_id()));
            Ok(())
        }
        fn on_start_group(&mut self, g: Group) -> Result<(), Self::Error> {
            self.0.push(format!("start {g}"));
            Ok(())
        }
        fn on_instance_batched(&mut self, _: &Material, i: &InstanceBatched) -> Result<(), Self::Error> {
            self.0.push(format!("batched {}", i.instance_id()));
            Ok(())
        }
        fn on_instance_single_array_start(&mut self, i: &InstanceSingle) -> Result<(), Self::Error> {
            self.0.push(format!("array {}", i.array_object().0));
            Ok(())
        }
        fn on_instance_single(&mut self, _: &Material, i: &InstanceSingle) -> Result<(), Self::Error> {
            self.0.push(format!("single {}", i.instance_id()));
            Ok(())
        }
        fn on_finish_group(&mut self, g: Group) -> Result<(), Self::Error> {
            self.0.push(format!("finish {g}"));
            Ok(())
        }
    }

    #[test]
    fn test_face_culling_default_and_survives_reset() {
        let mut depth = DepthInstances::new();
        assert_eq!(depth.face_culling(), FaceSelection::Back);
        depth.set_face_culling(FaceSelection::Front);
        depth.reset();
        assert_eq!(depth.face_culling(), FaceSelection::Front);
    }

    #[test]
    fn test_groups_batched_before_single_sorted_by_array() {
        let ids = IdPool::new();
        let shader = Arc::new(Shader::new(ids.fresh_shader(), "depth", ProgramId(3)));
        let material = Arc::new(Material::without_parameters(ids.fresh_material(), shader));
        let g2 = Group::new(2).unwrap();

        let s1 = Arc::new(InstanceSingle::new(ids.fresh_instance(), ArrayObjectId(8), 3));
        let s2 = Arc::new(InstanceSingle::new(ids.fresh_instance(), ArrayObjectId(4), 3));
        let b1 = Arc::new(InstanceBatched::new(ids.fresh_instance(), ArrayObjectId(1), 3));

        let mut depth = DepthInstances::new();
        depth.add_single_grouped(Arc::clone(&s1), Arc::clone(&material), g2).unwrap();
        depth.add_single_grouped(Arc::clone(&s2), Arc::clone(&material), g2).unwrap();
        depth.add_batched_grouped(Arc::clone(&b1), Arc::clone(&material), g2).unwrap();
        assert_eq!(
            depth.add_batched(Arc::clone(&b1), Arc::clone(&material)),
            Err(SceneError::InstanceAlreadyVisible {
                instance: b1.instance_id(),
                group: Group::DEFAULT
            })
        );
        assert_eq!(depth.count(), 3);

        let mut recorder = Recorder::default();
        depth.execute(&mut recorder).unwrap();
        assert_eq!(
            recorder.0,
            [
                format!("update {}", b1.instance_id()),
                "start group 2".into(),
                format!("batched {}", b1.instance_id()),
                "array 4".into(),
                format!("single {}", s2.instance_id()),
                "array 8".into(),
                format!("single {}", s1.instance_id()),
                "finish group 2".into(),
            ]
        );

        depth.reset();
        assert!(depth.is_empty());
    }
}
