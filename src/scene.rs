mod material;
mod mesh;

pub use material::*;
pub use mesh::*;

use serde::{Deserialize, Serialize};
use ultraviolet::Vec3;

use crate::transform::Transform;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Instance {
    pub mesh: usize,
    pub material: usize,
    pub transform: Transform,
    /// Transform of the previous frame, for motion vectors. Refreshed while gathering instances.
    pub previous_transform: Option<Transform>,
    /// Updatable instances get their own BLAS and a live transform in the TLAS.
    pub allow_update: bool,
    pub forced_emission: bool,
}

impl Instance {
    pub fn new(mesh: usize, material: usize, transform: Transform) -> Self {
        Self {
            mesh,
            material,
            transform,
            previous_transform: None,
            allow_update: false,
            forced_emission: false,
        }
    }

    pub fn dynamic(mut self) -> Self {
        self.allow_update = true;
        self
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Scene {
    pub meshes: Vec<Mesh>,
    pub materials: Vec<Material>,
    pub instances: Vec<Instance>,
}

impl Scene {
    pub fn add_mesh(&mut self, mesh: Mesh) -> usize {
        self.meshes.push(mesh);
        self.meshes.len() - 1
    }

    pub fn add_material(&mut self, material: Material) -> usize {
        self.materials.push(material);
        self.materials.len() - 1
    }

    pub fn add_instance(&mut self, instance: Instance) -> usize {
        self.instances.push(instance);
        self.instances.len() - 1
    }

    pub fn material_of(&self, instance: &Instance) -> &Material {
        &self.materials[instance.material]
    }

    pub fn mesh_of(&self, instance: &Instance) -> &Mesh {
        &self.meshes[instance.mesh]
    }

    /// Meshes with morph targets that are referenced by an updatable, visible instance.
    /// Sorted by mesh index.
    pub fn deformable_meshes(&self) -> Vec<usize> {
        let mut meshes: Vec<usize> = self
            .instances
            .iter()
            .filter(|i| i.allow_update && !self.material_of(i).is_off())
            .map(|i| i.mesh)
            .filter(|&mesh| self.meshes[mesh].is_deformable())
            .collect();
        meshes.sort_unstable();
        meshes.dedup();
        meshes
    }

    /// Duplicates every thick enough transparent instance, shrunk by `thickness`, so that
    /// glass gets a back face to refract through. Returns the number of added instances.
    pub fn add_inner_glass_surfaces(&mut self, thickness: f32) -> usize {
        let mut inner = Vec::new();
        for instance in &self.instances {
            if !self.material_of(instance).is_transparent() {
                continue;
            }

            let size = self.mesh_of(instance).aabb.size() * instance.transform.scale;
            if size.component_min() < thickness * 2.0 {
                continue;
            }

            let shrink = (size - Vec3::broadcast(thickness)) / (size + Vec3::broadcast(1e-15));
            let mut inner_instance = instance.clone();
            inner_instance.transform.scale = instance.transform.scale * shrink;
            inner.push(inner_instance);
        }

        let added = inner.len();
        self.instances.extend(inner);
        added
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cube(size: f32) -> Mesh {
        let h = size * 0.5;
        let positions = vec![
            Vec3::new(-h, -h, -h),
            Vec3::new(h, -h, -h),
            Vec3::new(h, h, -h),
            Vec3::new(-h, h, h),
        ];
        Mesh::new(positions, vec![0, 1, 2, 0, 2, 3])
    }

    #[test]
    fn inner_glass_skips_thin_and_opaque_objects() {
        let mut scene = Scene::default();
        let thick = scene.add_mesh(cube(1.0));
        let thin = scene.add_mesh(cube(0.003));
        let glass = scene.add_material(Material::transparent());
        let wall = scene.add_material(Material::opaque());
        scene.add_instance(Instance::new(thick, glass, Transform::default()));
        scene.add_instance(Instance::new(thin, glass, Transform::default()));
        scene.add_instance(Instance::new(thick, wall, Transform::default()));

        assert_eq!(scene.add_inner_glass_surfaces(0.002), 1);
        assert_eq!(scene.instances.len(), 4);

        let inner = &scene.instances[3];
        assert_eq!(inner.mesh, thick);
        let expected = (1.0 - 0.002) / 1.0;
        assert!((inner.transform.scale.x - expected).abs() < 1e-6);
    }

    #[test]
    fn deformable_meshes_are_deduplicated() {
        let mut scene = Scene::default();
        let base = cube(1.0);
        let target = base.positions.clone();
        let mesh = scene.add_mesh(base.with_morph_targets(vec![target]));
        let material = scene.add_material(Material::opaque());
        scene.add_instance(Instance::new(mesh, material, Transform::default()).dynamic());
        scene.add_instance(Instance::new(mesh, material, Transform::default()).dynamic());
        scene.add_instance(Instance::new(mesh, material, Transform::default()));
        assert_eq!(scene.deformable_meshes(), vec![mesh]);
    }
}
