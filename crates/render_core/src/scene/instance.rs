//! Renderable instances
//!
//! Instances are created by the application, shared with the scene sets by
//! `Arc`, and identified by an [`InstanceId`] minted from the engine's
//! [`IdPool`](crate::foundation::IdPool).

use crate::device::ArrayObjectId;
use crate::foundation::ids::InstanceId;
use nalgebra::{Matrix4, Vector3};

/// Anything a scene set can index and sort
pub trait Instance {
    /// Stable identifier
    fn instance_id(&self) -> InstanceId;

    /// Array object drawn for this instance; used as the sort key
    fn array_object(&self) -> ArrayObjectId;
}

/// An individually transformed mesh
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceSingle {
    id: InstanceId,
    array_object: ArrayObjectId,
    index_count: u32,
    transform: Matrix4<f32>,
}

impl InstanceSingle {
    /// Create an instance with an identity transform
    pub fn new(id: InstanceId, array_object: ArrayObjectId, index_count: u32) -> Self {
        Self {
            id,
            array_object,
            index_count,
            transform: Matrix4::identity(),
        }
    }

    /// Set the model transform
    pub fn with_transform(mut self, transform: Matrix4<f32>) -> Self {
        self.transform = transform;
        self
    }

    /// Model transform
    pub const fn transform(&self) -> &Matrix4<f32> {
        &self.transform
    }

    /// Replace the model transform
    pub fn set_transform(&mut self, transform: Matrix4<f32>) {
        self.transform = transform;
    }

    /// Indices drawn per instance
    pub const fn index_count(&self) -> u32 {
        self.index_count
    }
}

impl Instance for InstanceSingle {
    fn instance_id(&self) -> InstanceId {
        self.id
    }

    fn array_object(&self) -> ArrayObjectId {
        self.array_object
    }
}

/// One mesh drawn many times with per-instance transforms
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceBatched {
    id: InstanceId,
    array_object: ArrayObjectId,
    index_count: u32,
    transforms: Vec<Matrix4<f32>>,
}

impl InstanceBatched {
    /// Create an empty batch
    pub fn new(id: InstanceId, array_object: ArrayObjectId, index_count: u32) -> Self {
        Self {
            id,
            array_object,
            index_count,
            transforms: Vec::new(),
        }
    }

    /// Append one member transform
    pub fn push(&mut self, transform: Matrix4<f32>) {
        self.transforms.push(transform);
    }

    /// Member transforms, uploaded once per frame
    pub fn transforms(&self) -> &[Matrix4<f32>] {
        &self.transforms
    }

    /// Number of members
    pub fn instance_count(&self) -> u32 {
        self.transforms.len() as u32
    }

    /// Indices drawn per member
    pub const fn index_count(&self) -> u32 {
        self.index_count
    }
}

impl Instance for InstanceBatched {
    fn instance_id(&self) -> InstanceId {
        self.id
    }

    fn array_object(&self) -> ArrayObjectId {
        self.array_object
    }
}

/// A camera-facing sprite
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Billboard {
    /// World position
    pub position: Vector3<f32>,
    /// Uniform scale
    pub scale: f32,
    /// Rotation around the view axis in radians
    pub rotation: f32,
}

/// A set of billboards sharing one quad
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceBillboarded {
    id: InstanceId,
    array_object: ArrayObjectId,
    billboards: Vec<Billboard>,
}

impl InstanceBillboarded {
    /// Create an empty set
    pub fn new(id: InstanceId, array_object: ArrayObjectId) -> Self {
        Self {
            id,
            array_object,
            billboards: Vec::new(),
        }
    }

    /// Append a billboard
    pub fn push(&mut self, billboard: Billboard) {
        self.billboards.push(billboard);
    }

    /// All billboards
    pub fn billboards(&self) -> &[Billboard] {
        &self.billboards
    }

    /// Number of billboards
    pub fn instance_count(&self) -> u32 {
        self.billboards.len() as u32
    }
}

impl Instance for InstanceBillboarded {
    fn instance_id(&self) -> InstanceId {
        self.id
    }

    fn array_object(&self) -> ArrayObjectId {
        self.array_object
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::ids::IdPool;
    use approx::assert_relative_eq;
    use nalgebra::{Point3, Rotation3};

    const EPSILON: f32 = 1e-6;

    #[test]
    fn test_single_transform_moves_vertices() {
        let ids = IdPool::new();
        let mut mesh = InstanceSingle::new(ids.fresh_instance(), ArrayObjectId(1), 36)
            .with_transform(Matrix4::new_translation(&Vector3::new(1.0, 2.0, 3.0)));

        let moved = mesh.transform().transform_point(&Point3::origin());
        assert_relative_eq!(moved, Point3::new(1.0, 2.0, 3.0), epsilon = EPSILON);

        let quarter_turn = Rotation3::from_axis_angle(&Vector3::z_axis(), std::f32::consts::FRAC_PI_2);
        mesh.set_transform(quarter_turn.to_homogeneous());
        let turned = mesh.transform().transform_point(&Point3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(turned, Point3::new(0.0, 1.0, 0.0), epsilon = EPSILON);
    }

    #[test]
    fn test_batched_keeps_transforms_in_push_order() {
        let ids = IdPool::new();
        let mut crowd = InstanceBatched::new(ids.fresh_instance(), ArrayObjectId(2), 6);
        for i in 0..4 {
            crowd.push(Matrix4::new_translation(&Vector3::new(0.0, i as f32 * 0.5, 0.0)));
        }

        assert_eq!(crowd.instance_count(), 4);
        for (i, transform) in crowd.transforms().iter().enumerate() {
            let origin = transform.transform_point(&Point3::origin());
            assert_relative_eq!(origin.y, i as f32 * 0.5, epsilon = EPSILON);
        }
    }

    #[test]
    fn test_billboards_keep_their_parameters() {
        let ids = IdPool::new();
        let mut sprites = InstanceBillboarded::new(ids.fresh_instance(), ArrayObjectId(3));
        sprites.push(Billboard {
            position: Vector3::new(0.25, 0.0, -1.0),
            scale: 0.1,
            rotation: std::f32::consts::FRAC_PI_4,
        });

        let sprite = sprites.billboards()[0];
        assert_eq!(sprites.instance_count(), 1);
        assert_relative_eq!(sprite.position, Vector3::new(0.25, 0.0, -1.0), epsilon = EPSILON);
        assert_relative_eq!(sprite.rotation.tan(), 1.0, epsilon = EPSILON);
    }
}
