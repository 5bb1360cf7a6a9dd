mod demo_scene;

use anyhow::Context;
use env_logger::Env;
use log::info;
use ultraviolet::Vec3;

use rt_scheduler::{
    accel::deformable::{BlasRefresh, MorphShaderCode},
    config_loader::ConfigFileLoader,
    denoiser::BarrierOnlyDenoiser,
    frame::{FrameSettings, Renderer},
    vulkan::device::VulkanDevice,
};

use demo_scene::DemoScene;

/// Seconds per frame of the fixed animation clock.
const FRAME_TIME: f32 = 1.0 / 60.0;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let mut config_loader = ConfigFileLoader::new("config.json");
    let config = config_loader
        .get_or_load_config()
        .context("Could not load config.json")?
        .clone();

    let morph_shaders = config
        .morph_shaders
        .as_ref()
        .map(MorphShaderCode::load)
        .transpose()
        .context("Could not load the morph shaders")?;

    let mut demo = DemoScene::new(morph_shaders.is_some());
    let device = VulkanDevice::new(config.queued_frame_count).context("Could not set up Vulkan")?;
    let mut renderer = Renderer::new(
        device,
        &mut demo.scene,
        &config,
        Box::new(BarrierOnlyDenoiser::default()),
        morph_shaders.as_ref(),
    )
    .context("Could not load the scene")?;

    let stats = renderer.load_stats();
    info!(
        "{} bottom-level structures, {} of {} bytes after compaction, built in {} ms",
        stats.blas_count, stats.compacted_bytes, stats.uncompacted_bytes, stats.build_millis
    );

    let mut refits = 0;
    let mut rebuilds = 0;
    for frame in 0..config.frames {
        let time = frame as f32 * FRAME_TIME;
        if !config.pause_animation {
            demo.animate(time);
        }
        let settings = FrameSettings {
            paused: config.pause_animation,
            camera_position: Vec3::new(0.0, 4.0, -16.0),
        };
        let frame_stats = renderer.render_frame(&mut demo.scene, settings)?;
        match frame_stats.blas_refresh {
            BlasRefresh::Updated => refits += 1,
            BlasRefresh::Rebuilt => rebuilds += 1,
            BlasRefresh::Skipped => {}
        }
    }

    info!(
        "Rendered {} frames, {} refits, {} rebuilds",
        config.frames, refits, rebuilds
    );
    renderer.shutdown()?;
    config_loader.save_config()?;
    Ok(())
}
