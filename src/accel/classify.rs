use crate::scene::Scene;

/// Instance indices sorted into the buckets the bottom-level structures are built from.
///
/// Every visible instance is in exactly one of `opaque`, `transparent` and `dynamic`.
/// `emissive` is an additional tag on static instances, which get merged into the light
/// structure as well.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    pub opaque: Vec<usize>,
    pub transparent: Vec<usize>,
    pub emissive: Vec<usize>,
    pub dynamic: Vec<usize>,
    /// One entry per mesh referenced by a dynamic instance, in first seen order.
    pub dynamic_meshes: Vec<usize>,
}

impl Classification {
    pub fn classify(scene: &Scene) -> Self {
        let mut result = Self::default();
        for (index, instance) in scene.instances.iter().enumerate() {
            let material = scene.material_of(instance);
            if material.is_off() {
                continue;
            }

            if instance.allow_update {
                result.dynamic.push(index);
                if !result.dynamic_meshes.contains(&instance.mesh) {
                    result.dynamic_meshes.push(instance.mesh);
                }
                continue;
            }

            if material.is_transparent() {
                result.transparent.push(index);
            } else {
                result.opaque.push(index);
            }
            if material.emissive {
                result.emissive.push(index);
            }
        }
        result
    }

    /// Instances that end up in any bottom-level structure.
    pub fn traced_count(&self) -> usize {
        self.opaque.len() + self.transparent.len() + self.dynamic.len()
    }

    /// Shader visible ids handed out per frame. Merged emissive instances get their own ids.
    pub fn id_count(&self) -> usize {
        self.traced_count() + self.emissive.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        scene::{Instance, Material, Mesh},
        transform::Transform,
    };
    use ultraviolet::Vec3;

    fn scene_with_every_kind() -> Scene {
        let mut scene = Scene::default();
        let triangle = Mesh::new(
            vec![Vec3::zero(), Vec3::unit_x(), Vec3::unit_y()],
            vec![0, 1, 2],
        );
        let rock = scene.add_mesh(triangle.clone());
        let crate_mesh = scene.add_mesh(triangle);
        let opaque = scene.add_material(Material::opaque());
        let glass = scene.add_material(Material::transparent());
        let lamp = scene.add_material(Material::emissive());
        let hidden = scene.add_material(Material::off());

        let t = Transform::default();
        scene.add_instance(Instance::new(rock, opaque, t.clone()));
        scene.add_instance(Instance::new(rock, glass, t.clone()));
        scene.add_instance(Instance::new(rock, lamp, t.clone()));
        scene.add_instance(Instance::new(rock, hidden, t.clone()));
        scene.add_instance(Instance::new(crate_mesh, opaque, t.clone()).dynamic());
        scene.add_instance(Instance::new(crate_mesh, lamp, t.clone()).dynamic());
        scene.add_instance(Instance::new(rock, glass, t).dynamic());
        scene
    }

    #[test]
    fn visible_instances_are_partitioned() {
        let scene = scene_with_every_kind();
        let classes = Classification::classify(&scene);

        for (index, instance) in scene.instances.iter().enumerate() {
            let buckets = [&classes.opaque, &classes.transparent, &classes.dynamic]
                .iter()
                .filter(|bucket| bucket.contains(&index))
                .count();
            let expected = if scene.material_of(instance).is_off() { 0 } else { 1 };
            assert_eq!(buckets, expected, "instance {index}");
        }
        assert_eq!(classes.traced_count(), 6);
    }

    #[test]
    fn emission_is_an_extra_tag() {
        let classes = Classification::classify(&scene_with_every_kind());
        assert_eq!(classes.emissive, vec![2]);
        assert!(classes.opaque.contains(&2));
        assert_eq!(classes.id_count(), 7);
    }

    #[test]
    fn dynamic_meshes_are_unique() {
        let classes = Classification::classify(&scene_with_every_kind());
        assert_eq!(classes.dynamic, vec![4, 5, 6]);
        assert_eq!(classes.dynamic_meshes, vec![1, 0]);
    }
}
