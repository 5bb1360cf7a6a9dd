use std::f32::consts::TAU;

use ultraviolet::{Rotor3, Vec3};

use rt_scheduler::{
    scene::{Instance, Material, Mesh, Scene},
    transform::Transform,
};

pub struct DemoScene {
    pub scene: Scene,
    spinning: Vec<usize>,
    morphing: Vec<usize>,
}

fn cube(size: f32) -> Mesh {
    let h = size * 0.5;
    let positions = (0..8)
        .map(|i| {
            Vec3::new(
                if i & 1 == 0 { -h } else { h },
                if i & 2 == 0 { -h } else { h },
                if i & 4 == 0 { -h } else { h },
            )
        })
        .collect();
    #[rustfmt::skip]
    let indices = vec![
        0, 2, 1, 1, 2, 3,
        4, 5, 6, 5, 7, 6,
        0, 1, 4, 1, 5, 4,
        2, 6, 3, 3, 6, 7,
        0, 4, 2, 2, 4, 6,
        1, 3, 5, 3, 7, 5,
    ];
    Mesh::new(positions, indices)
}

/// A flat grid of `n` by `n` quads in the xz plane.
fn sheet(n: u32, size: f32) -> Mesh {
    let step = size / n as f32;
    let mut positions = Vec::new();
    for z in 0..=n {
        for x in 0..=n {
            positions.push(Vec3::new(x as f32 * step - size * 0.5, 0.0, z as f32 * step - size * 0.5));
        }
    }
    let mut indices = Vec::new();
    let row = n + 1;
    for z in 0..n {
        for x in 0..n {
            let i = z * row + x;
            indices.extend_from_slice(&[i, i + row, i + 1, i + 1, i + row, i + row + 1]);
        }
    }
    Mesh::new(positions, indices)
}

impl DemoScene {
    /// Rows of opaque boxes, a few glass panes, a light panel, spinning props and, when
    /// `deformable` is set, a waving cloth sheet.
    pub fn new(deformable: bool) -> Self {
        let mut scene = Scene::default();
        let opaque = scene.add_material(Material::opaque());
        let glass = scene.add_material(Material::transparent());
        let light = scene.add_material(Material::emissive());

        let box_mesh = scene.add_mesh(cube(1.0));
        let pane_mesh = scene.add_mesh(cube(1.0));

        for x in -4..4 {
            for z in -4..4 {
                let position = Vec3::new(x as f32 * 2.5, 0.5, z as f32 * 2.5);
                scene.add_instance(Instance::new(
                    box_mesh,
                    opaque,
                    Transform::from_position(position),
                ));
            }
        }

        for i in 0..3 {
            let mut transform = Transform::from_position(Vec3::new(i as f32 * 3.0 - 3.0, 1.5, -12.0));
            transform.scale = Vec3::new(2.0, 2.0, 0.1);
            scene.add_instance(Instance::new(pane_mesh, glass, transform));
        }

        let mut panel = Transform::from_position(Vec3::new(0.0, 8.0, 0.0));
        panel.scale = Vec3::new(4.0, 0.05, 4.0);
        scene.add_instance(Instance::new(box_mesh, light, panel));

        let prop_mesh = scene.add_mesh(cube(0.75));
        let spinning = (0..3)
            .map(|i| {
                let transform = Transform::from_position(Vec3::new(i as f32 * 2.0 - 2.0, 3.0, 4.0));
                scene.add_instance(Instance::new(prop_mesh, opaque, transform).dynamic())
            })
            .collect();

        let mut morphing = Vec::new();
        if deformable {
            let base = sheet(16, 4.0);
            let wave: Vec<Vec3> = base
                .positions
                .iter()
                .map(|p| *p + Vec3::unit_y() * (p.x * 1.5).sin() * 0.4)
                .collect();
            let fold: Vec<Vec3> = base
                .positions
                .iter()
                .map(|p| *p + Vec3::unit_y() * (p.z * 0.25).powi(2))
                .collect();
            let cloth_mesh = scene.add_mesh(base.with_morph_targets(vec![wave, fold]));
            scene.add_instance(
                Instance::new(cloth_mesh, opaque, Transform::from_position(Vec3::new(0.0, 2.0, 8.0)))
                    .dynamic(),
            );
            morphing.push(cloth_mesh);
        }

        Self {
            scene,
            spinning,
            morphing,
        }
    }

    /// Advances the animation to `time` seconds.
    pub fn animate(&mut self, time: f32) {
        for (i, &instance) in self.spinning.iter().enumerate() {
            let angle = time * (1.0 + i as f32 * 0.5) % TAU;
            self.scene.instances[instance].transform.orientation = Rotor3::from_rotation_xz(angle);
        }
        for &mesh in &self.morphing {
            if let Some(morph) = &mut self.scene.meshes[mesh].morph_targets {
                for (i, weight) in morph.weights.iter_mut().enumerate() {
                    *weight = 0.5 + 0.5 * (time * 2.0 + i as f32).sin();
                }
            }
        }
    }
}
