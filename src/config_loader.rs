use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{denoiser::DenoiserVariant, error::Result};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Upper bound on barriers per batch. Exceeding it aborts.
    pub max_transitions_per_batch: usize,
    /// Frames the CPU may record ahead of the GPU.
    pub queued_frame_count: u32,
    pub denoiser: DenoiserVariant,
    pub render_resolution: [u32; 2],
    pub pause_animation: bool,
    /// Marks every third updatable instance as emissive for the light structure.
    pub emission: bool,
    pub inner_glass_surfaces: bool,
    /// Meters.
    pub glass_thickness: f32,
    /// Bytes of upload memory per queued frame.
    pub stream_buffer_size: u64,
    pub morph_shaders: Option<MorphShaderPaths>,
    pub frames: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MorphShaderPaths {
    pub update_vertices: PathBuf,
    pub update_primitives: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_transitions_per_batch: 32,
            queued_frame_count: 2,
            denoiser: DenoiserVariant::Radiance,
            render_resolution: [1920, 1080],
            pause_animation: false,
            emission: false,
            inner_glass_surfaces: true,
            glass_thickness: 0.002,
            stream_buffer_size: 4 * 1024 * 1024,
            morph_shaders: None,
            frames: 240,
        }
    }
}

impl Config {
    pub fn from_str(value: &str) -> Result<Self> {
        Ok(serde_json::from_str(value)?)
    }
}

pub struct ConfigFileLoader {
    pub path: PathBuf,
    config: Option<Config>,
}

impl ConfigFileLoader {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().into(),
            config: None,
        }
    }

    /// Reads the file, or writes and returns the defaults when there is none.
    pub fn load_config(&mut self) -> Result<&mut Config> {
        let config = match std::fs::read_to_string(&self.path) {
            Ok(content) => Config::from_str(&content)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No config at {:?}, writing defaults", self.path);
                self.config = Some(Config::default());
                self.save_config()?;
                Config::default()
            }
            Err(err) => return Err(err.into()),
        };
        Ok(self.config.insert(config))
    }

    pub fn get_or_load_config(&mut self) -> Result<&mut Config> {
        match self.config {
            Some(ref mut config) => Ok(config),
            None => self.load_config(),
        }
    }

    pub fn save_config(&self) -> Result<()> {
        if let Some(config) = &self.config {
            let content = serde_json::to_string_pretty(config)?;
            std::fs::write(&self.path, content)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut loader = ConfigFileLoader::new(&path);

        let config = loader.load_config().unwrap().clone();
        assert_eq!(config, Config::default());
        assert!(path.exists());

        let written = Config::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, config);
    }

    #[test]
    fn partial_file_falls_back_per_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "max_transitions_per_batch": 64, "denoiser": "Occlusion" }"#)
            .unwrap();

        let mut loader = ConfigFileLoader::new(&path);
        let config = loader.get_or_load_config().unwrap();
        assert_eq!(config.max_transitions_per_batch, 64);
        assert_eq!(config.denoiser, DenoiserVariant::Occlusion);
        assert_eq!(config.queued_frame_count, 2);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(ConfigFileLoader::new(&path).load_config().is_err());
    }
}
