use log::{debug, info};
use ultraviolet::Vec3;

use crate::{
    accel::{
        bottom_level::{build_bottom_level, BlasTable, BuildStats},
        classify::Classification,
        deformable::{BlasRefresh, DeformableUpdater, MorphShaderCode},
        top_level::{gather_instances, TopLevelPipeline},
    },
    config_loader::Config,
    denoiser::{Denoiser, DenoiserTextures},
    device::Device,
    error::{CoreError, Result},
    pass::PassContext,
    scene::Scene,
    streamer::FrameStreamer,
    vulkan::sync_manager::{transition_batcher::TransitionBatcher, ResourceStateRegistry},
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSettings {
    pub paused: bool,
    pub camera_position: Vec3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameStats {
    pub frame_index: u64,
    pub blas_refresh: BlasRefresh,
    pub world_instances: usize,
    pub light_instances: usize,
    pub folded_states: usize,
    pub barriers: usize,
    pub commands: usize,
}

/// Owns the device and every structure built from the scene, and records one frame at a time.
pub struct Renderer<D: Device> {
    device: D,
    ctx: PassContext,
    classes: Classification,
    blas: BlasTable,
    top_level: TopLevelPipeline,
    deformable: Option<DeformableUpdater>,
    streamer: FrameStreamer,
    denoiser: Box<dyn Denoiser>,
    denoiser_textures: DenoiserTextures,
    load_stats: BuildStats,
    emission: bool,
    frame_index: u64,
}

impl<D: Device> Renderer<D> {
    /// Loads the scene: inner glass surfaces, classification, bottom-level builds and everything
    /// the per-frame path reuses.
    pub fn new(
        mut device: D,
        scene: &mut Scene,
        config: &Config,
        denoiser: Box<dyn Denoiser>,
        morph_shaders: Option<&MorphShaderCode>,
    ) -> Result<Self> {
        let mut ctx = PassContext::new(TransitionBatcher::new(config.max_transitions_per_batch));

        if config.inner_glass_surfaces {
            let added = scene.add_inner_glass_surfaces(config.glass_thickness);
            debug!("Added {added} inner glass surfaces");
        }
        let classes = Classification::classify(scene);
        let (blas, load_stats) = build_bottom_level(&mut device, &mut ctx, scene, &classes)?;

        let deformable = match morph_shaders {
            Some(shaders) => {
                DeformableUpdater::new(&mut device, &mut ctx, scene, &classes, &blas, shaders)?
            }
            None if !scene.deformable_meshes().is_empty() => {
                return Err(CoreError::Config(
                    "the scene has deformable meshes but no morph shaders are configured".into(),
                ));
            }
            None => None,
        };

        let top_level = TopLevelPipeline::new(&mut device, &mut ctx, &blas, &classes)?;
        let streamer = FrameStreamer::new(
            &mut device,
            &mut ctx,
            config.stream_buffer_size,
            config.queued_frame_count,
        )?;
        let denoiser_textures = DenoiserTextures::new(
            &mut device,
            &mut ctx,
            config.denoiser,
            config.render_resolution,
        )?;

        info!(
            "Loaded scene: {} opaque, {} transparent, {} emissive, {} dynamic instances",
            classes.opaque.len(),
            classes.transparent.len(),
            classes.emissive.len(),
            classes.dynamic.len()
        );
        Ok(Self {
            device,
            ctx,
            classes,
            blas,
            top_level,
            deformable,
            streamer,
            denoiser,
            denoiser_textures,
            load_stats,
            emission: config.emission,
            frame_index: 0,
        })
    }

    /// Records and submits one frame: deformable refresh, top-level rebuild, denoising.
    pub fn render_frame(&mut self, scene: &mut Scene, settings: FrameSettings) -> Result<FrameStats> {
        let frame_index = self.frame_index;
        self.device.begin_frame(frame_index)?;
        self.streamer.begin_frame(frame_index);

        let blas_refresh = match &mut self.deformable {
            Some(deformable) => deformable.record(
                &self.device,
                &mut self.ctx,
                scene,
                &self.blas,
                settings.paused,
                frame_index,
            )?,
            None => BlasRefresh::Skipped,
        };

        let gathered = gather_instances(
            scene,
            &self.classes,
            &self.blas,
            &self.device,
            settings.camera_position,
            self.emission,
        )?;
        self.top_level
            .record(&mut self.device, &mut self.ctx, &mut self.streamer, &gathered)?;

        let folded_states = self
            .denoiser_textures
            .denoise(&mut self.ctx, self.denoiser.as_mut())?;

        let commands = self.ctx.finish();
        let stats = FrameStats {
            frame_index,
            blas_refresh,
            world_instances: gathered.world.len(),
            light_instances: gathered.light.len(),
            folded_states,
            barriers: commands.barrier_count(),
            commands: commands.len(),
        };
        self.device.submit_frame(commands)?;
        self.frame_index += 1;
        debug!("{stats:?}");
        Ok(stats)
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn registry(&self) -> &ResourceStateRegistry {
        self.ctx.registry()
    }

    pub fn blas_table(&self) -> &BlasTable {
        &self.blas
    }

    pub fn top_level(&self) -> &TopLevelPipeline {
        &self.top_level
    }

    pub fn deformable(&self) -> Option<&DeformableUpdater> {
        self.deformable.as_ref()
    }

    pub fn classification(&self) -> &Classification {
        &self.classes
    }

    pub fn load_stats(&self) -> &BuildStats {
        &self.load_stats
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Waits for the GPU, destroys everything and hands the device back.
    pub fn shutdown(mut self) -> Result<D> {
        self.device.wait_idle()?;
        let device = &mut self.device;
        let ctx = &mut self.ctx;
        if let Some(deformable) = self.deformable.take() {
            deformable.destroy(device, ctx);
        }
        self.top_level.destroy(device, ctx);
        self.blas.destroy(device, ctx);
        self.streamer.destroy(device, ctx);
        self.denoiser_textures.destroy(device, ctx);
        Ok(self.device)
    }
}
