//! Per-group instance index
//!
//! The structure every instance-carrying scene set is built on. For each
//! group it keeps six maps:
//!
//! ```text
//! instance -> instance        instance -> material
//! material -> material        shader   -> shader
//! shader   -> [material]      material -> [instance]
//! ```
//!
//! Shaders are traversed in first-use order, materials in first-use order
//! per shader. Nothing is sorted at insertion time; instance lists are sorted
//! by array object just before traversal.
//!
//! `clear` keeps every map's capacity, and the per-key lists are recycled
//! through spare pools so a steady-state frame allocates nothing.

use super::group::{Group, MAXIMUM_GROUPS};
use super::instance::Instance;
use super::material::{Material, Shader};
use super::SceneError;
use crate::foundation::ids::{InstanceId, MaterialId, ShaderId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// One step of a shader -> material -> instance traversal
#[derive(Debug)]
pub(crate) enum Visit<'a, I> {
    ShaderStart(&'a Shader),
    MaterialStart(&'a Material),
    /// First instance of a run sharing one array object
    ArrayStart(&'a I),
    Item(&'a Material, &'a I),
    MaterialFinish(&'a Material),
    ShaderFinish(&'a Shader),
}

#[derive(Debug)]
pub(crate) struct GroupIndex<I> {
    instances: HashMap<InstanceId, Arc<I>>,
    instance_material: HashMap<InstanceId, MaterialId>,
    materials: HashMap<MaterialId, Arc<Material>>,
    shaders: HashMap<ShaderId, Arc<Shader>>,
    shader_materials: HashMap<ShaderId, Vec<MaterialId>>,
    material_instances: HashMap<MaterialId, Vec<InstanceId>>,
    shader_order: Vec<ShaderId>,
    instance_order: Vec<InstanceId>,
    spare_material_lists: Vec<Vec<MaterialId>>,
    spare_instance_lists: Vec<Vec<InstanceId>>,
}

impl<I> Default for GroupIndex<I> {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

impl<I> GroupIndex<I> {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            instances: HashMap::with_capacity(capacity),
            instance_material: HashMap::with_capacity(capacity),
            materials: HashMap::new(),
            shaders: HashMap::new(),
            shader_materials: HashMap::new(),
            material_instances: HashMap::new(),
            shader_order: Vec::new(),
            instance_order: Vec::with_capacity(capacity),
            spare_material_lists: Vec::new(),
            spare_instance_lists: Vec::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.instances.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Instances in insertion order
    pub(crate) fn instances(&self) -> impl Iterator<Item = &I> {
        self.instance_order
            .iter()
            .filter_map(|id| self.instances.get(id).map(|i| &**i))
    }

    /// The material an instance was added with
    pub(crate) fn material_of(&self, instance: InstanceId) -> Option<&Arc<Material>> {
        self.instance_material
            .get(&instance)
            .and_then(|id| self.materials.get(id))
    }

    pub(crate) fn clear(&mut self) {
        for (_, mut list) in self.shader_materials.drain() {
            list.clear();
            self.spare_material_lists.push(list);
        }
        for (_, mut list) in self.material_instances.drain() {
            list.clear();
            self.spare_instance_lists.push(list);
        }
        self.instances.clear();
        self.instance_material.clear();
        self.materials.clear();
        self.shaders.clear();
        self.shader_order.clear();
        self.instance_order.clear();
    }
}

impl<I: Instance> GroupIndex<I> {
    /// Index an instance. The caller has already rejected duplicates.
    pub(crate) fn insert(&mut self, instance: Arc<I>, material: Arc<Material>) {
        let instance_id = instance.instance_id();
        let material_id = material.id();
        let shader_id = material.shader().id();

        if !self.shaders.contains_key(&shader_id) {
            self.shaders.insert(shader_id, Arc::clone(material.shader()));
            self.shader_order.push(shader_id);
            let list = self.spare_material_lists.pop().unwrap_or_default();
            self.shader_materials.insert(shader_id, list);
        }

        if !self.materials.contains_key(&material_id) {
            self.materials.insert(material_id, material);
            self.shader_materials
                .entry(shader_id)
                .or_default()
                .push(material_id);
            let list = self.spare_instance_lists.pop().unwrap_or_default();
            self.material_instances.insert(material_id, list);
        }

        self.material_instances
            .entry(material_id)
            .or_default()
            .push(instance_id);
        self.instance_material.insert(instance_id, material_id);
        self.instances.insert(instance_id, instance);
        self.instance_order.push(instance_id);
    }

    /// Stable-sort every material's instances by array object
    pub(crate) fn sort_by_array_object(&mut self) {
        let instances = &self.instances;
        for list in self.material_instances.values_mut() {
            list.sort_by_key(|id| instances.get(id).map(|i| i.array_object()));
        }
    }

    /// Walk shader -> material -> instance, announcing array object changes
    pub(crate) fn traverse<E>(
        &self,
        mut visit: impl FnMut(Visit<'_, I>) -> Result<(), E>,
    ) -> Result<(), E> {
        for shader_id in &self.shader_order {
            let (Some(shader), Some(material_ids)) = (
                self.shaders.get(shader_id),
                self.shader_materials.get(shader_id),
            ) else {
                continue;
            };

            visit(Visit::ShaderStart(shader))?;
            for material_id in material_ids {
                let (Some(material), Some(instance_ids)) = (
                    self.materials.get(material_id),
                    self.material_instances.get(material_id),
                ) else {
                    continue;
                };

                visit(Visit::MaterialStart(material))?;
                let mut current_array = None;
                for instance_id in instance_ids {
                    let Some(instance) = self.instances.get(instance_id) else {
                        continue;
                    };
                    let array = instance.array_object();
                    if current_array != Some(array) {
                        visit(Visit::ArrayStart(instance))?;
                        current_array = Some(array);
                    }
                    visit(Visit::Item(material, instance))?;
                }
                visit(Visit::MaterialFinish(material))?;
            }
            visit(Visit::ShaderFinish(shader))?;
        }
        Ok(())
    }
}

/// One kind of instance across every group of a scene set
#[derive(Debug)]
pub(crate) struct InstanceSet<I> {
    groups: Vec<GroupIndex<I>>,
    visible: HashSet<InstanceId>,
    group_max: usize,
}

impl<I> InstanceSet<I> {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        let groups = (0..MAXIMUM_GROUPS)
            .map(|index| {
                if usize::from(index) == Group::DEFAULT.index() {
                    GroupIndex::with_capacity(capacity)
                } else {
                    GroupIndex::default()
                }
            })
            .collect();
        Self {
            groups,
            visible: HashSet::with_capacity(capacity),
            group_max: 1,
        }
    }

    /// One past the highest group used since the last reset
    pub(crate) const fn group_max(&self) -> usize {
        self.group_max
    }

    pub(crate) fn len(&self) -> usize {
        self.visible.len()
    }

    pub(crate) fn contains(&self, instance: InstanceId) -> bool {
        self.visible.contains(&instance)
    }

    pub(crate) fn group(&self, group: Group) -> &GroupIndex<I> {
        &self.groups[group.index()]
    }

    pub(crate) fn group_mut(&mut self, group: Group) -> &mut GroupIndex<I> {
        &mut self.groups[group.index()]
    }

    /// Groups that may hold instances, lowest first
    pub(crate) fn active_groups(&self) -> impl Iterator<Item = (Group, &GroupIndex<I>)> {
        self.groups
            .iter()
            .enumerate()
            .take(self.group_max)
            .skip(1)
            .map(|(index, g)| (Group::from_index(index), g))
    }

    pub(crate) fn reset(&mut self) {
        for group in self.groups.iter_mut().take(self.group_max).skip(1) {
            group.clear();
        }
        self.visible.clear();
        self.group_max = 1;
    }
}

impl<I: Instance> InstanceSet<I> {
    pub(crate) fn insert(
        &mut self,
        instance: Arc<I>,
        material: Arc<Material>,
        group: Group,
    ) -> Result<(), SceneError> {
        let id = instance.instance_id();
        if !self.visible.insert(id) {
            return Err(SceneError::InstanceAlreadyVisible {
                instance: id,
                group,
            });
        }
        self.group_max = self.group_max.max(group.index() + 1);
        self.groups[group.index()].insert(instance, material);
        Ok(())
    }

    pub(crate) fn sort_active(&mut self) {
        for group in self.groups.iter_mut().take(self.group_max).skip(1) {
            group.sort_by_array_object();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ArrayObjectId, ProgramId};
    use crate::foundation::ids::IdPool;
    use crate::scene::instance::InstanceSingle;

    fn shader(ids: &IdPool) -> Arc<Shader> {
        Arc::new(Shader::new(ids.fresh_shader(), "s", ProgramId(1)))
    }

    fn material(ids: &IdPool, shader: &Arc<Shader>) -> Arc<Material> {
        Arc::new(Material::without_parameters(ids.fresh_material(), Arc::clone(shader)))
    }

    fn single(ids: &IdPool, array: u32) -> Arc<InstanceSingle> {
        Arc::new(InstanceSingle::new(ids.fresh_instance(), ArrayObjectId(array), 3))
    }

    fn trace(index: &GroupIndex<InstanceSingle>) -> Vec<String> {
        let mut out = Vec::new();
        index
            .traverse(|visit| {
                out.push(match visit {
                    Visit::ShaderStart(s) => format!("shader {}", s.id()),
                    Visit::MaterialStart(m) => format!("material {}", m.id()),
                    Visit::ArrayStart(i) => format!("array {}", i.array_object().0),
                    Visit::Item(_, i) => format!("item {}", i.instance_id()),
                    Visit::MaterialFinish(m) => format!("/material {}", m.id()),
                    Visit::ShaderFinish(s) => format!("/shader {}", s.id()),
                });
                Ok::<(), ()>(())
            })
            .unwrap();
        out
    }

    #[test]
    fn test_traversal_groups_by_shader_and_material() {
        let ids = IdPool::new();
        let s1 = shader(&ids); // 0
        let s2 = shader(&ids); // 1
        let m1 = material(&ids, &s1); // 2
        let m2 = material(&ids, &s2); // 3
        let m3 = material(&ids, &s1); // 4

        let mut index = GroupIndex::default();
        index.insert(single(&ids, 9), Arc::clone(&m1)); // 5
        index.insert(single(&ids, 9), Arc::clone(&m2)); // 6
        index.insert(single(&ids, 9), Arc::clone(&m3)); // 7
        index.insert(single(&ids, 9), Arc::clone(&m1)); // 8
        index.sort_by_array_object();

        assert_eq!(
            trace(&index),
            [
                "shader shader#0",
                "material material#2",
                "array 9",
                "item instance#5",
                "item instance#8",
                "/material material#2",
                "material material#4",
                "array 9",
                "item instance#7",
                "/material material#4",
                "/shader shader#0",
                "shader shader#1",
                "material material#3",
                "array 9",
                "item instance#6",
                "/material material#3",
                "/shader shader#1",
            ]
        );
    }

    #[test]
    fn test_sort_keeps_equal_arrays_contiguous_and_stable() {
        let ids = IdPool::new();
        let s = shader(&ids);
        let m = material(&ids, &s);

        let mut index = GroupIndex::default();
        for array in [5, 2, 5, 2, 7] {
            index.insert(single(&ids, array), Arc::clone(&m));
        }
        index.sort_by_array_object();

        let lines = trace(&index);
        let arrays: Vec<_> = lines.iter().filter(|l| l.starts_with("array")).collect();
        assert_eq!(arrays, ["array 2", "array 5", "array 7"]);

        // Instances 3 and 5 share array 2 and keep insertion order.
        let items: Vec<_> = lines.iter().filter(|l| l.starts_with("item")).collect();
        assert_eq!(
            items,
            [
                "item instance#3",
                "item instance#5",
                "item instance#2",
                "item instance#4",
                "item instance#6"
            ]
        );
    }

    #[test]
    fn test_clear_retains_capacity_and_recycles_lists() {
        let ids = IdPool::new();
        let s = shader(&ids);
        let m = material(&ids, &s);

        let mut index = GroupIndex::default();
        for _ in 0..64 {
            index.insert(single(&ids, 1), Arc::clone(&m));
        }
        let capacity = index.instances.capacity();
        index.clear();

        assert!(index.is_empty());
        assert!(index.instances.capacity() >= capacity);
        assert_eq!(index.spare_instance_lists.len(), 1);
        assert!(index.spare_instance_lists[0].capacity() >= 64);

        index.insert(single(&ids, 1), Arc::clone(&m));
        assert!(index.spare_instance_lists.is_empty());
        assert_eq!(index.len(), 1);
        assert!(index.material_of(index.instance_order[0]).is_some());
    }

    #[test]
    fn test_instance_set_duplicates_and_group_max() {
        let ids = IdPool::new();
        let s = shader(&ids);
        let m = material(&ids, &s);
        let mut set = InstanceSet::with_capacity(4);
        let a = single(&ids, 1);

        let g3 = Group::new(3).unwrap();
        set.insert(Arc::clone(&a), Arc::clone(&m), g3).unwrap();
        assert_eq!(set.group_max(), 4);

        let err = set
            .insert(Arc::clone(&a), Arc::clone(&m), Group::DEFAULT)
            .unwrap_err();
        assert_eq!(
            err,
            SceneError::InstanceAlreadyVisible {
                instance: a.instance_id(),
                group: Group::DEFAULT
            }
        );
        assert_eq!(set.len(), 1);
        assert!(set.contains(a.instance_id()));
        assert_eq!(set.active_groups().count(), 3);

        set.reset();
        assert_eq!(set.group_max(), 1);
        assert_eq!(set.len(), 0);
        assert!(set.group(g3).is_empty());
        set.insert(a, m, g3).unwrap();
        assert_eq!(set.group_mut(g3).len(), 1);
    }
}
