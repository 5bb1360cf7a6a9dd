pub mod accel;
pub mod arena;
pub mod config_loader;
pub mod denoiser;
pub mod device;
pub mod error;
pub mod frame;
pub mod pass;
pub mod scene;
pub mod streamer;
pub mod transform;
pub mod utility;
pub mod vulkan;
