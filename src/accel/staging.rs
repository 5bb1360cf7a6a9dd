use ultraviolet::Vec3;

use crate::{
    arena::ResourceHandle,
    device::{BufferSlice, TriangleGeometry},
    scene::{Instance, Scene},
    utility::{aligned_size, transform_3x4},
};

use super::{
    bottom_level::{BlasKind, LogicalBlas},
    classify::Classification,
};

pub const RIGID_VERTEX_STRIDE: u64 = 12;
/// Deformable positions share their layout with the morph output, `vec4` per vertex.
pub const DEFORMABLE_VERTEX_STRIDE: u64 = 16;
const TRANSFORM_SIZE: u64 = 48;

/// A geometry object, with offsets into the upload buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedGeometry {
    pub vertex_offset: u64,
    pub vertex_stride: u64,
    pub vertex_count: u32,
    pub index_offset: u64,
    pub index_count: u32,
    pub transform_offset: Option<u64>,
    pub opaque: bool,
}

impl StagedGeometry {
    pub fn resolve(&self, upload: ResourceHandle) -> TriangleGeometry {
        TriangleGeometry {
            vertices: BufferSlice {
                buffer: upload,
                offset: self.vertex_offset,
            },
            vertex_stride: self.vertex_stride,
            vertex_count: self.vertex_count,
            indices: BufferSlice {
                buffer: upload,
                offset: self.index_offset,
            },
            index_count: self.index_count,
            transform: self.transform_offset.map(|offset| BufferSlice {
                buffer: upload,
                offset,
            }),
            opaque: self.opaque,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StagedBlas {
    pub logical: LogicalBlas,
    pub kind: BlasKind,
    pub geometries: Vec<StagedGeometry>,
}

/// Contents of the upload buffer: every baked transform first, then per geometry object its
/// positions followed by its indices.
#[derive(Debug, Clone)]
pub struct StagedScene {
    pub bytes: Vec<u8>,
    pub blases: Vec<StagedBlas>,
}

impl StagedScene {
    pub fn stage(scene: &Scene, classes: &Classification) -> Self {
        let merged = [
            (LogicalBlas::MergedOpaque, &classes.opaque),
            (LogicalBlas::MergedTransparent, &classes.transparent),
            (LogicalBlas::MergedEmissive, &classes.emissive),
        ];
        let static_count: usize = merged.iter().map(|(_, bucket)| bucket.len()).sum();

        let mut writer = StagingWriter {
            bytes: vec![0; static_count * TRANSFORM_SIZE as usize],
        };
        let mut blases = Vec::new();
        let mut transform_index = 0;

        for (logical, bucket) in merged {
            if bucket.is_empty() {
                continue;
            }
            let mut geometries = Vec::with_capacity(bucket.len());
            for &index in bucket {
                let instance = &scene.instances[index];
                let mesh = scene.mesh_of(instance);
                let transform_offset = transform_index as u64 * TRANSFORM_SIZE;
                let matrix = instance.transform.matrix_around(mesh.aabb.center(), Vec3::zero());
                writer.write_at(transform_offset, bytemuck::cast_slice(&transform_3x4(&matrix)));
                transform_index += 1;

                let mut geometry = writer.push_mesh(scene, instance, RIGID_VERTEX_STRIDE);
                geometry.transform_offset = Some(transform_offset);
                geometries.push(geometry);
            }
            blases.push(StagedBlas {
                logical,
                kind: BlasKind::RigidStatic,
                geometries,
            });
        }

        for &mesh in &classes.dynamic_meshes {
            let Some(instance) = first_dynamic_instance(scene, classes, mesh) else {
                continue;
            };
            let (kind, stride) = if scene.meshes[mesh].is_deformable() {
                (BlasKind::Deformable, DEFORMABLE_VERTEX_STRIDE)
            } else {
                (BlasKind::RigidDynamic, RIGID_VERTEX_STRIDE)
            };
            blases.push(StagedBlas {
                logical: LogicalBlas::Dynamic { mesh },
                kind,
                geometries: vec![writer.push_mesh(scene, instance, stride)],
            });
        }

        Self {
            bytes: writer.bytes,
            blases,
        }
    }

    pub fn geometry_count(&self) -> usize {
        self.blases.iter().map(|b| b.geometries.len()).sum()
    }
}

/// Whether a dynamic mesh's geometry is flagged opaque. The first dynamic instance decides.
pub fn dynamic_mesh_opaque(scene: &Scene, classes: &Classification, mesh: usize) -> bool {
    first_dynamic_instance(scene, classes, mesh)
        .map(|instance| !scene.material_of(instance).is_masked())
        .unwrap_or(true)
}

fn first_dynamic_instance<'a>(
    scene: &'a Scene,
    classes: &Classification,
    mesh: usize,
) -> Option<&'a Instance> {
    classes
        .dynamic
        .iter()
        .map(|&index| &scene.instances[index])
        .find(|instance| instance.mesh == mesh)
}

struct StagingWriter {
    bytes: Vec<u8>,
}

impl StagingWriter {
    fn write_at(&mut self, offset: u64, data: &[u8]) {
        let start = offset as usize;
        self.bytes[start..start + data.len()].copy_from_slice(data);
    }

    fn push(&mut self, alignment: u64, data: &[u8]) -> u64 {
        let offset = aligned_size(self.bytes.len() as u64, alignment);
        self.bytes.resize(offset as usize, 0);
        self.bytes.extend_from_slice(data);
        offset
    }

    fn push_mesh(&mut self, scene: &Scene, instance: &Instance, stride: u64) -> StagedGeometry {
        let mesh = scene.mesh_of(instance);
        let vertex_offset = if stride == DEFORMABLE_VERTEX_STRIDE {
            let padded: Vec<[f32; 4]> = mesh
                .positions
                .iter()
                .map(|p| [p.x, p.y, p.z, 0.0])
                .collect();
            self.push(DEFORMABLE_VERTEX_STRIDE, bytemuck::cast_slice(&padded))
        } else {
            let packed: Vec<[f32; 3]> = mesh.positions.iter().map(|p| [p.x, p.y, p.z]).collect();
            self.push(4, bytemuck::cast_slice(&packed))
        };
        let index_offset = self.push(4, bytemuck::cast_slice(&mesh.indices));

        StagedGeometry {
            vertex_offset,
            vertex_stride: stride,
            vertex_count: mesh.vertex_count(),
            index_offset,
            index_count: mesh.index_count(),
            transform_offset: None,
            opaque: !scene.material_of(instance).is_masked(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        scene::{Instance, Material, Mesh},
        transform::Transform,
    };

    fn quad() -> Mesh {
        Mesh::new(
            vec![
                Vec3::zero(),
                Vec3::unit_x(),
                Vec3::new(1.0, 1.0, 0.0),
                Vec3::unit_y(),
            ],
            vec![0, 1, 2, 0, 2, 3],
        )
    }

    #[test]
    fn transforms_come_first_and_emissive_geometry_is_staged_twice() {
        let mut scene = Scene::default();
        let mesh = scene.add_mesh(quad());
        let wall = scene.add_material(Material::opaque());
        let lamp = scene.add_material(Material::emissive());
        scene.add_instance(Instance::new(
            mesh,
            wall,
            Transform::from_position(Vec3::new(5.0, 0.0, 0.0)),
        ));
        scene.add_instance(Instance::new(mesh, lamp, Transform::default()));

        let classes = Classification::classify(&scene);
        let staged = StagedScene::stage(&scene, &classes);

        assert_eq!(staged.blases.len(), 2);
        assert_eq!(staged.blases[0].logical, LogicalBlas::MergedOpaque);
        assert_eq!(staged.blases[0].geometries.len(), 2);
        assert_eq!(staged.blases[1].logical, LogicalBlas::MergedEmissive);
        assert_eq!(staged.geometry_count(), 3);

        let transforms: Vec<_> = staged
            .blases
            .iter()
            .flat_map(|b| &b.geometries)
            .map(|g| g.transform_offset.unwrap())
            .collect();
        assert_eq!(transforms, vec![0, 48, 96]);

        let first = &staged.blases[0].geometries[0];
        assert_eq!(first.vertex_offset, 3 * 48);
        assert_eq!(first.index_offset, first.vertex_offset + 4 * 12);
        assert_eq!(first.index_offset % 4, 0);

        let translation: &[f32] = bytemuck::cast_slice(&staged.bytes[..48]);
        assert_eq!(translation[3], 5.0);
    }

    #[test]
    fn deformable_meshes_use_padded_positions_and_no_transform() {
        let mut scene = Scene::default();
        let base = quad();
        let target = base.positions.clone();
        let mesh = scene.add_mesh(base.with_morph_targets(vec![target]));
        let material = scene.add_material(Material::opaque());
        scene.add_instance(Instance::new(mesh, material, Transform::default()).dynamic());

        let classes = Classification::classify(&scene);
        let staged = StagedScene::stage(&scene, &classes);

        assert_eq!(staged.blases.len(), 1);
        let blas = &staged.blases[0];
        assert_eq!(blas.kind, BlasKind::Deformable);
        let geometry = &blas.geometries[0];
        assert_eq!(geometry.vertex_stride, DEFORMABLE_VERTEX_STRIDE);
        assert_eq!(geometry.transform_offset, None);
        assert_eq!(geometry.index_offset, geometry.vertex_offset + 4 * 16);
        assert!(geometry.opaque);
    }
}
