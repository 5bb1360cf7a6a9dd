use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum AlphaMode {
    Opaque,
    /// Alpha tested. Needs any-hit, so its geometry is never flagged opaque.
    Masked,
    Transparent,
    /// Fully invisible, never traced.
    Off,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Material {
    pub alpha_mode: AlphaMode,
    pub emissive: bool,
}

impl Material {
    pub fn opaque() -> Self {
        Self {
            alpha_mode: AlphaMode::Opaque,
            emissive: false,
        }
    }

    pub fn transparent() -> Self {
        Self {
            alpha_mode: AlphaMode::Transparent,
            emissive: false,
        }
    }

    pub fn emissive() -> Self {
        Self {
            alpha_mode: AlphaMode::Opaque,
            emissive: true,
        }
    }

    pub fn off() -> Self {
        Self {
            alpha_mode: AlphaMode::Off,
            emissive: false,
        }
    }

    pub fn is_off(&self) -> bool {
        self.alpha_mode == AlphaMode::Off
    }

    pub fn is_transparent(&self) -> bool {
        self.alpha_mode == AlphaMode::Transparent
    }

    pub fn is_masked(&self) -> bool {
        self.alpha_mode == AlphaMode::Masked
    }
}
