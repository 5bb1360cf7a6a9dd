use serde::{Deserialize, Serialize};
use ultraviolet::Vec3;

#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn from_points(points: &[Vec3]) -> Self {
        let mut aabb = Aabb {
            min: Vec3::broadcast(f32::MAX),
            max: Vec3::broadcast(f32::MIN),
        };
        for point in points {
            aabb.min = aabb.min.min_by_component(*point);
            aabb.max = aabb.max.max_by_component(*point);
        }
        if points.is_empty() {
            aabb.min = Vec3::zero();
            aabb.max = Vec3::zero();
        }
        aabb
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }
}

/// Poses blended on the GPU. Every target holds one absolute position per mesh vertex.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MorphTargets {
    pub targets: Vec<Vec<Vec3>>,
    /// Current animation weights, one per target. Driven by the animation system.
    pub weights: Vec<f32>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Mesh {
    pub positions: Vec<Vec3>,
    pub indices: Vec<u32>,
    pub aabb: Aabb,
    pub morph_targets: Option<MorphTargets>,
}

impl Mesh {
    pub fn new(positions: Vec<Vec3>, indices: Vec<u32>) -> Self {
        let aabb = Aabb::from_points(&positions);
        Self {
            positions,
            indices,
            aabb,
            morph_targets: None,
        }
    }

    pub fn with_morph_targets(mut self, targets: Vec<Vec<Vec3>>) -> Self {
        assert!(
            targets.iter().all(|t| t.len() == self.positions.len()),
            "Every morph target needs one position per vertex"
        );
        let weights = vec![0.0; targets.len()];
        self.morph_targets = Some(MorphTargets { targets, weights });
        self
    }

    pub fn is_deformable(&self) -> bool {
        self.morph_targets.is_some()
    }

    pub fn vertex_count(&self) -> u32 {
        self.positions.len() as u32
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    pub fn primitive_count(&self) -> u32 {
        self.index_count() / 3
    }
}
