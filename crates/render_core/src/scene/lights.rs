//! Lights
//!
//! The set the light pass draws from. Lights carry no material: each is
//! drawn with a light shader, and the set is indexed group -> shader ->
//! lights.
//!
//! A group may also hold **clip groups**. A clip group is bound to one
//! volume instance, and its lights only affect pixels the volume covers. The
//! pass stencils the volume once and draws the clip group's lights inside
//! it. All clip groups are traversed before any ordinary group:
//!
//! ```text
//! on_start
//! for each group, for each non-empty clip group (creation order):
//!     on_start_clip_group(volume, group)
//!     shader > array > light
//!     on_finish_clip_group(volume, group)
//! for each group with unclipped lights:
//!     on_start_group(group)
//!     shader > array > light
//!     on_finish_group(group)
//! on_finish
//! ```
//!
//! Lights under a shader are sorted by array object, then by light id.
//! Every `on_finish*` runs even if a callback inside its scope failed.

use super::group::{Group, MAXIMUM_GROUPS};
use super::instance::{Instance, InstanceSingle};
use super::material::Shader;
use super::{SceneError, SceneResult};
use crate::device::ArrayObjectId;
use crate::foundation::diagnostics::{default_diagnostics, report, Diagnostics, Level};
use crate::foundation::ids::{InstanceId, LightId, ShaderId};
use nalgebra::Vector3;
use std::collections::HashMap;
use std::sync::Arc;

const TARGET: &str = "render_core::scene::lights";

/// A light drawn as a single volume mesh
#[derive(Debug, Clone, PartialEq)]
pub struct LightSingle {
    id: LightId,
    array_object: ArrayObjectId,
    /// World position
    pub position: Vector3<f32>,
    /// Linear RGB color
    pub color: Vector3<f32>,
    /// Intensity multiplier
    pub intensity: f32,
    /// Radius of influence
    pub radius: f32,
}

impl LightSingle {
    /// A white light of unit intensity and radius at the origin
    pub fn new(id: LightId, array_object: ArrayObjectId) -> Self {
        Self {
            id,
            array_object,
            position: Vector3::zeros(),
            color: Vector3::new(1.0, 1.0, 1.0),
            intensity: 1.0,
            radius: 1.0,
        }
    }

    /// Place the light
    pub fn with_position(mut self, position: Vector3<f32>) -> Self {
        self.position = position;
        self
    }

    /// Set color and intensity
    pub fn with_color(mut self, color: Vector3<f32>, intensity: f32) -> Self {
        self.color = color;
        self.intensity = intensity;
        self
    }

    /// Set the radius of influence
    pub fn with_radius(mut self, radius: f32) -> Self {
        self.radius = radius;
        self
    }

    /// Identifier
    pub const fn light_id(&self) -> LightId {
        self.id
    }

    /// Volume mesh drawn for this light
    pub const fn array_object(&self) -> ArrayObjectId {
        self.array_object
    }
}

/// Handle to a clip group, valid until the next [`SceneLights::reset`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipGroup {
    group: Group,
    volume: InstanceId,
    epoch: u64,
}

impl ClipGroup {
    /// The group holding this clip group
    pub const fn group(&self) -> Group {
        self.group
    }

    /// The volume instance bounding it
    pub const fn volume(&self) -> InstanceId {
        self.volume
    }
}

/// Callbacks driven by [`SceneLights::execute`]
#[allow(unused_variables)]
pub trait LightsConsumer {
    /// Error type returned by the pass
    type Error;

    /// Start of the frame's traversal
    fn on_start(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    /// A clip group with at least one light begins
    fn on_start_clip_group(&mut self, volume: &InstanceSingle, group: Group) -> Result<(), Self::Error> {
        Ok(())
    }

    /// First light in the current clip group drawn with this shader
    fn on_clip_group_light_single_shader_start(&mut self, shader: &Shader) -> Result<(), Self::Error> {
        Ok(())
    }

    /// First clip group light of a run sharing one array object
    fn on_clip_group_light_single_array_start(&mut self, light: &LightSingle) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Draw one light in the current clip group
    fn on_clip_group_light_single(&mut self, shader: &Shader, light: &LightSingle) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Last clip group light of this shader has been drawn
    fn on_clip_group_light_single_shader_finish(&mut self, shader: &Shader) -> Result<(), Self::Error> {
        Ok(())
    }

    /// The current clip group is done, called even after a failure inside it
    fn on_finish_clip_group(&mut self, volume: &InstanceSingle, group: Group) -> Result<(), Self::Error> {
        Ok(())
    }

    /// A group with at least one unclipped light begins
    fn on_start_group(&mut self, group: Group) -> Result<(), Self::Error> {
        Ok(())
    }

    /// First light drawn with this shader
    fn on_light_single_shader_start(&mut self, shader: &Shader) -> Result<(), Self::Error> {
        Ok(())
    }

    /// First light of a run sharing one array object
    fn on_light_single_array_start(&mut self, light: &LightSingle) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Draw one light
    fn on_light_single(&mut self, shader: &Shader, light: &LightSingle) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Last light of this shader has been drawn
    fn on_light_single_shader_finish(&mut self, shader: &Shader) -> Result<(), Self::Error> {
        Ok(())
    }

    /// The group begun by `on_start_group` is done, called even after a failure inside it
    fn on_finish_group(&mut self, group: Group) -> Result<(), Self::Error> {
        Ok(())
    }

    /// End of the traversal, called even when an earlier callback failed
    fn on_finish(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

enum LightVisit<'a> {
    ShaderStart(&'a Shader),
    ArrayStart(&'a LightSingle),
    Light(&'a Shader, &'a LightSingle),
    ShaderFinish(&'a Shader),
}

/// Lights keyed by shader, shaders in first-use order
#[derive(Debug, Default)]
struct ShaderLights {
    order: Vec<ShaderId>,
    lights: HashMap<ShaderId, Vec<LightId>>,
    spare: Vec<Vec<LightId>>,
}

impl ShaderLights {
    fn insert(&mut self, shader: ShaderId, light: LightId) {
        if !self.lights.contains_key(&shader) {
            self.order.push(shader);
            let list = self.spare.pop().unwrap_or_default();
            self.lights.insert(shader, list);
        }
        self.lights.entry(shader).or_default().push(light);
    }

    fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn clear(&mut self) {
        for (_, mut list) in self.lights.drain() {
            list.clear();
            self.spare.push(list);
        }
        self.order.clear();
    }

    fn sort(&mut self, lights: &HashMap<LightId, Arc<LightSingle>>) {
        for list in self.lights.values_mut() {
            list.sort_by_key(|id| (lights.get(id).map(|l| l.array_object()), *id));
        }
    }

    fn traverse<E>(
        &self,
        shaders: &HashMap<ShaderId, Arc<Shader>>,
        lights: &HashMap<LightId, Arc<LightSingle>>,
        mut visit: impl FnMut(LightVisit<'_>) -> Result<(), E>,
    ) -> Result<(), E> {
        for shader_id in &self.order {
            let (Some(shader), Some(ids)) = (shaders.get(shader_id), self.lights.get(shader_id)) else {
                continue;
            };
            visit(LightVisit::ShaderStart(shader))?;
            let mut current_array = None;
            for light in ids.iter().filter_map(|id| lights.get(id)) {
                if current_array != Some(light.array_object()) {
                    visit(LightVisit::ArrayStart(light))?;
                    current_array = Some(light.array_object());
                }
                visit(LightVisit::Light(shader, light))?;
            }
            visit(LightVisit::ShaderFinish(shader))?;
        }
        Ok(())
    }
}

#[derive(Debug)]
struct ClipGroupEntry {
    volume: Arc<InstanceSingle>,
    lights: ShaderLights,
}

#[derive(Debug, Default)]
struct LightGroup {
    lights: HashMap<LightId, Arc<LightSingle>>,
    shaders: HashMap<ShaderId, Arc<Shader>>,
    unclipped: ShaderLights,
    clip_groups: Vec<ClipGroupEntry>,
    clip_index: HashMap<InstanceId, usize>,
    spare_clip_lights: Vec<ShaderLights>,
}

impl LightGroup {
    fn insert_light(&mut self, light: Arc<LightSingle>, shader: Arc<Shader>, group: Group) -> SceneResult<()> {
        let id = light.light_id();
        if self.lights.contains_key(&id) {
            return Err(SceneError::LightAlreadyVisible { light: id, group });
        }
        self.lights.insert(id, light);
        self.shaders.entry(shader.id()).or_insert(shader);
        Ok(())
    }

    fn clear(&mut self) {
        self.lights.clear();
        self.shaders.clear();
        self.unclipped.clear();
        for mut entry in self.clip_groups.drain(..) {
            entry.lights.clear();
            self.spare_clip_lights.push(entry.lights);
        }
        self.clip_index.clear();
    }
}

/// The frame's lights
#[derive(Debug)]
pub struct SceneLights {
    groups: Vec<LightGroup>,
    group_max: usize,
    epoch: u64,
    diagnostics: Arc<dyn Diagnostics>,
}

impl Default for SceneLights {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneLights {
    /// Create an empty set
    pub fn new() -> Self {
        Self::with_diagnostics(default_diagnostics())
    }

    /// Create an empty set reporting through the given sink
    pub fn with_diagnostics(diagnostics: Arc<dyn Diagnostics>) -> Self {
        Self {
            groups: (0..MAXIMUM_GROUPS).map(|_| LightGroup::default()).collect(),
            group_max: 1,
            epoch: 0,
            diagnostics,
        }
    }

    fn raise_group_max(&mut self, group: Group) {
        self.group_max = self.group_max.max(group.index() + 1);
    }

    /// Add an unclipped light to the default group
    pub fn add_single(&mut self, light: Arc<LightSingle>, shader: Arc<Shader>) -> SceneResult<()> {
        self.add_single_grouped(light, shader, Group::DEFAULT)
    }

    /// Add an unclipped light
    ///
    /// # Errors
    ///
    /// [`SceneError::LightAlreadyVisible`] if the light is already in the
    /// group, clipped or not.
    pub fn add_single_grouped(
        &mut self,
        light: Arc<LightSingle>,
        shader: Arc<Shader>,
        group: Group,
    ) -> SceneResult<()> {
        let (light_id, shader_id) = (light.light_id(), shader.id());
        let slot = &mut self.groups[group.index()];
        slot.insert_light(light, shader, group)?;
        slot.unclipped.insert(shader_id, light_id);
        self.raise_group_max(group);

        report!(
            self.diagnostics,
            Level::Trace,
            TARGET,
            "light add single ({}, {}, {})",
            light_id,
            group,
            shader_id
        );
        Ok(())
    }

    /// Open a clip group bounded by `volume`
    ///
    /// # Errors
    ///
    /// [`SceneError::ClipGroupAlreadyExists`] if the group already has a clip
    /// group for this volume.
    pub fn new_clip_group(&mut self, volume: Arc<InstanceSingle>, group: Group) -> SceneResult<ClipGroup> {
        let volume_id = volume.instance_id();
        let slot = &mut self.groups[group.index()];
        if slot.clip_index.contains_key(&volume_id) {
            return Err(SceneError::ClipGroupAlreadyExists {
                volume: volume_id,
                group,
            });
        }

        let lights = slot.spare_clip_lights.pop().unwrap_or_default();
        slot.clip_index.insert(volume_id, slot.clip_groups.len());
        slot.clip_groups.push(ClipGroupEntry { volume, lights });
        self.raise_group_max(group);

        report!(
            self.diagnostics,
            Level::Trace,
            TARGET,
            "new clip group ({}, {})",
            volume_id,
            group
        );
        Ok(ClipGroup {
            group,
            volume: volume_id,
            epoch: self.epoch,
        })
    }

    /// Add a light to a clip group
    ///
    /// # Errors
    ///
    /// [`SceneError::ClipGroupDeleted`] if the handle predates the last
    /// reset, [`SceneError::LightAlreadyVisible`] if the light is already in
    /// the clip group's group.
    pub fn clip_group_add_single(
        &mut self,
        clip: &ClipGroup,
        light: Arc<LightSingle>,
        shader: Arc<Shader>,
    ) -> SceneResult<()> {
        if clip.epoch != self.epoch {
            return Err(SceneError::ClipGroupDeleted);
        }

        let (light_id, shader_id) = (light.light_id(), shader.id());
        let slot = &mut self.groups[clip.group.index()];
        let index = *slot
            .clip_index
            .get(&clip.volume)
            .ok_or(SceneError::ClipGroupDeleted)?;
        slot.insert_light(light, shader, clip.group)?;
        slot.clip_groups[index].lights.insert(shader_id, light_id);

        report!(
            self.diagnostics,
            Level::Trace,
            TARGET,
            "light add single ({}, {}, clip group {})",
            light_id,
            shader_id,
            clip.volume
        );
        Ok(())
    }

    /// Remove every light and clip group, invalidating clip group handles
    pub fn reset(&mut self) {
        report!(self.diagnostics, Level::Trace, TARGET, "reset");
        for group in self.groups.iter_mut().take(self.group_max).skip(1) {
            group.clear();
        }
        self.group_max = 1;
        self.epoch += 1;
    }

    /// Number of lights, clipped and unclipped
    pub fn count(&self) -> usize {
        self.groups.iter().map(|g| g.lights.len()).sum()
    }

    /// Whether the set holds no lights
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Walk the set, driving `consumer`. `on_finish` always runs.
    pub fn execute<C: LightsConsumer>(&mut self, consumer: &mut C) -> Result<(), C::Error> {
        for group in self.groups.iter_mut().take(self.group_max).skip(1) {
            let LightGroup {
                lights,
                unclipped,
                clip_groups,
                ..
            } = group;
            unclipped.sort(lights);
            for clip in clip_groups.iter_mut() {
                clip.lights.sort(lights);
            }
        }

        let walked = consumer
            .on_start()
            .and_then(|()| self.walk_clip_groups(consumer))
            .and_then(|()| self.walk_groups(consumer));
        let finished = consumer.on_finish();
        walked.and(finished)
    }

    fn active_groups(&self) -> impl Iterator<Item = (Group, &LightGroup)> {
        self.groups
            .iter()
            .enumerate()
            .take(self.group_max)
            .skip(1)
            .map(|(index, g)| (Group::from_index(index), g))
    }

    fn walk_clip_groups<C: LightsConsumer>(&self, consumer: &mut C) -> Result<(), C::Error> {
        for (group, slot) in self.active_groups() {
            for clip in slot.clip_groups.iter().filter(|c| !c.lights.is_empty()) {
                consumer.on_start_clip_group(&clip.volume, group)?;
                let body = clip.lights.traverse(&slot.shaders, &slot.lights, |visit| match visit {
                    LightVisit::ShaderStart(s) => consumer.on_clip_group_light_single_shader_start(s),
                    LightVisit::ArrayStart(l) => consumer.on_clip_group_light_single_array_start(l),
                    LightVisit::Light(s, l) => consumer.on_clip_group_light_single(s, l),
                    LightVisit::ShaderFinish(s) => consumer.on_clip_group_light_single_shader_finish(s),
                });
                let finished = consumer.on_finish_clip_group(&clip.volume, group);
                body.and(finished)?;
            }
        }
        Ok(())
    }

    fn walk_groups<C: LightsConsumer>(&self, consumer: &mut C) -> Result<(), C::Error> {
        for (group, slot) in self.active_groups().filter(|(_, s)| !s.unclipped.is_empty()) {
            consumer.on_start_group(group)?;
            let body = slot.unclipped.traverse(&slot.shaders, &slot.lights, |visit| match visit {
                LightVisit::ShaderStart(s) => consumer.on_light_single_shader_start(s),
                LightVisit::ArrayStart(l) => consumer.on_light_single_array_start(l),
                LightVisit::Light(s, l) => consumer.on_light_single(s, l),
                LightVisit::ShaderFinish(s) => consumer.on_light_single_shader_finish(s),
            });
            let finished = consumer.on_finish_group(group);
            body.and(finished)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::ProgramId;
    use crate::foundation::ids::IdPool;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
        fail_on_light: bool,
    }

    impl LightsConsumer for Recorder {
        type Error = String;

        fn on_start(&mut self) -> Result<(), String> {
            self.calls.push("start".into());
            Ok(())
        }
        fn on_start_clip_group(&mut self, volume: &InstanceSingle, group: Group) -> Result<(), String> {
            self.calls.push(format!("clip {} {group}", volume.instance_id()));
            Ok(())
        }
        fn on_clip_group_light_single_array_start(&mut self, l: &LightSingle) -> Result<(), String> {
            self.calls.push(format!("clip array {}", l.array_object().0));
            Ok(())
        }
        fn on_clip_group_light_single(&mut self, _: &Shader, l: &LightSingle) -> Result<(), String> {
            self.calls.push(format!("clip light {}", l.light_id()));
            Ok(())
        }
        fn on_finish_clip_group(&mut self, volume: &InstanceSingle, _: Group) -> Result<(), String> {
            self.calls.push(format!("/clip {}", volume.instance_id()));
            Ok(())
        }
        fn on_start_group(&mut self, group: Group) -> Result<(), String> {
            self.calls.push(format!("start {group}"));
            Ok(())
        }
        fn on_light_single_shader_start(&mut self, s: &Shader) -> Result<(), String> {
            self.calls.push(format!("shader {}", s.name()));
            Ok(())
        }
        fn on_light_single_array_start(&mut self, l: &LightSingle) -> Result<(), String> {
            self.calls.push(format!("array {}", l.array_object().0));
            Ok(())
        }
        fn on_light_single(&mut self, _: &Shader, l: &LightSingle) -> Result<(), String> {
            self.calls.push(format!("light {}", l.light_id()));
            if self.fail_on_light {
                return Err("light failed".into());
            }
            Ok(())
        }
        fn on_light_single_shader_finish(&mut self, s: &Shader) -> Result<(), String> {
            self.calls.push(format!("/shader {}", s.name()));
            Ok(())
        }
        fn on_finish_group(&mut self, group: Group) -> Result<(), String> {
            self.calls.push(format!("finish {group}"));
            Ok(())
        }
        fn on_finish(&mut self) -> Result<(), String> {
            self.calls.push("finish".into());
            Ok(())
        }
    }

    fn light(ids: &IdPool, array: u32) -> Arc<LightSingle> {
        Arc::new(LightSingle::new(ids.fresh_light(), ArrayObjectId(array)))
    }

    fn shader(ids: &IdPool, name: &str) -> Arc<Shader> {
        Arc::new(Shader::new(ids.fresh_shader(), name, ProgramId(1)))
    }

    #[test]
    fn test_lights_sorted_by_array_then_id() {
        let ids = IdPool::new();
        let sphere = shader(&ids, "sphere");
        let l1 = light(&ids, 2);
        let l2 = light(&ids, 1);
        let l3 = light(&ids, 2);
        let l4 = light(&ids, 1);

        let mut lights = SceneLights::new();
        for l in [&l3, &l1, &l4, &l2] {
            lights.add_single(Arc::clone(l), Arc::clone(&sphere)).unwrap();
        }
        assert_eq!(lights.count(), 4);

        let mut recorder = Recorder::default();
        lights.execute(&mut recorder).unwrap();
        assert_eq!(
            recorder.calls,
            [
                "start".to_string(),
                "start group 1".into(),
                "shader sphere".into(),
                "array 1".into(),
                format!("light {}", l2.light_id()),
                format!("light {}", l4.light_id()),
                "array 2".into(),
                format!("light {}", l1.light_id()),
                format!("light {}", l3.light_id()),
                "/shader sphere".into(),
                "finish group 1".into(),
                "finish".into(),
            ]
        );
    }

    #[test]
    fn test_clip_groups_precede_groups() {
        let ids = IdPool::new();
        let sphere = shader(&ids, "sphere");
        let volume = Arc::new(InstanceSingle::new(ids.fresh_instance(), ArrayObjectId(9), 36));
        let clipped = light(&ids, 1);
        let free = light(&ids, 1);
        let g2 = Group::new(2).unwrap();

        let mut lights = SceneLights::new();
        lights.add_single(Arc::clone(&free), Arc::clone(&sphere)).unwrap();
        let clip = lights.new_clip_group(Arc::clone(&volume), g2).unwrap();
        assert_eq!(clip.group(), g2);
        assert_eq!(clip.volume(), volume.instance_id());
        lights
            .clip_group_add_single(&clip, Arc::clone(&clipped), Arc::clone(&sphere))
            .unwrap();

        let mut recorder = Recorder::default();
        lights.execute(&mut recorder).unwrap();
        assert_eq!(
            recorder.calls,
            [
                "start".to_string(),
                format!("clip {} group 2", volume.instance_id()),
                "clip array 1".into(),
                format!("clip light {}", clipped.light_id()),
                format!("/clip {}", volume.instance_id()),
                "start group 1".into(),
                "shader sphere".into(),
                "array 1".into(),
                format!("light {}", free.light_id()),
                "/shader sphere".into(),
                "finish group 1".into(),
                "finish".into(),
            ]
        );
    }

    #[test]
    fn test_duplicate_light_across_clip_group_and_group() {
        let ids = IdPool::new();
        let sphere = shader(&ids, "sphere");
        let volume = Arc::new(InstanceSingle::new(ids.fresh_instance(), ArrayObjectId(9), 36));
        let l = light(&ids, 1);

        let mut lights = SceneLights::new();
        let clip = lights.new_clip_group(Arc::clone(&volume), Group::DEFAULT).unwrap();
        lights
            .clip_group_add_single(&clip, Arc::clone(&l), Arc::clone(&sphere))
            .unwrap();
        assert_eq!(
            lights.add_single(Arc::clone(&l), Arc::clone(&sphere)),
            Err(SceneError::LightAlreadyVisible {
                light: l.light_id(),
                group: Group::DEFAULT
            })
        );
        assert_eq!(
            lights.new_clip_group(Arc::clone(&volume), Group::DEFAULT),
            Err(SceneError::ClipGroupAlreadyExists {
                volume: volume.instance_id(),
                group: Group::DEFAULT
            })
        );

        // A different group is independent.
        lights
            .add_single_grouped(Arc::clone(&l), sphere, Group::new(5).unwrap())
            .unwrap();
        assert_eq!(lights.count(), 2);
    }

    #[test]
    fn test_clip_group_deleted_by_reset() {
        let ids = IdPool::new();
        let sphere = shader(&ids, "sphere");
        let volume = Arc::new(InstanceSingle::new(ids.fresh_instance(), ArrayObjectId(9), 36));

        let mut lights = SceneLights::new();
        let clip = lights.new_clip_group(Arc::clone(&volume), Group::DEFAULT).unwrap();
        lights.reset();
        lights.reset();
        assert!(lights.is_empty());
        assert_eq!(
            lights.clip_group_add_single(&clip, light(&ids, 1), Arc::clone(&sphere)),
            Err(SceneError::ClipGroupDeleted)
        );

        // The same volume may open a new clip group after the reset.
        let clip = lights.new_clip_group(volume, Group::DEFAULT).unwrap();
        lights.clip_group_add_single(&clip, light(&ids, 1), sphere).unwrap();
        assert_eq!(lights.count(), 1);
    }

    #[test]
    fn test_group_finish_runs_after_failure() {
        let ids = IdPool::new();
        let sphere = shader(&ids, "sphere");
        let mut lights = SceneLights::new();
        lights.add_single(light(&ids, 1), sphere).unwrap();

        let mut recorder = Recorder {
            fail_on_light: true,
            ..Recorder::default()
        };
        assert_eq!(lights.execute(&mut recorder), Err("light failed".to_string()));
        let tail: Vec<_> = recorder.calls.iter().rev().take(2).cloned().collect();
        assert_eq!(tail, ["finish", "finish group 1"]);
    }
}
