//! Hand-off to an external denoiser that issues its own barriers.

use ash::vk;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    arena::ResourceHandle,
    device::{Command, CommandList, Device, TextureDesc},
    error::Result,
    pass::PassContext,
    vulkan::sync_manager::{
        resource_access::{AccessKind, ResourceState},
        transition_batcher::{Barrier, BarrierBatch},
    },
};

/// Which signals get denoised. Picks the texture set at startup.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DenoiserVariant {
    #[default]
    Radiance,
    Occlusion,
    Sh,
    DirectionalOcclusion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DenoiserSlot {
    InMotionVectors,
    InNormalRoughness,
    InViewZ,
    InBaseColorMetalness,
    OutValidation,
    InDiffRadianceHitDist,
    OutDiffRadianceHitDist,
    InDiffHitDist,
    OutDiffHitDist,
    InDiffSh0,
    InDiffSh1,
    OutDiffSh0,
    OutDiffSh1,
    InDiffDirectionHitDist,
    OutDiffDirectionHitDist,
    InSpecRadianceHitDist,
    OutSpecRadianceHitDist,
    InSpecHitDist,
    OutSpecHitDist,
    InSpecSh0,
    InSpecSh1,
    OutSpecSh0,
    OutSpecSh1,
    InPenumbra,
    InTranslucency,
    OutShadowTranslucency,
    InSignal,
    OutSignal,
}

impl DenoiserSlot {
    pub fn is_output(self) -> bool {
        use DenoiserSlot::*;
        matches!(
            self,
            OutValidation
                | OutDiffRadianceHitDist
                | OutDiffHitDist
                | OutDiffSh0
                | OutDiffSh1
                | OutDiffDirectionHitDist
                | OutSpecRadianceHitDist
                | OutSpecHitDist
                | OutSpecSh0
                | OutSpecSh1
                | OutShadowTranslucency
                | OutSignal
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalTexture {
    MotionVectors,
    NormalRoughness,
    ViewZ,
    BaseColorMetalness,
    Validation,
    UnfilteredDiff,
    UnfilteredDiffSh,
    Diff,
    DiffSh,
    UnfilteredSpec,
    UnfilteredSpecSh,
    Spec,
    SpecSh,
    UnfilteredPenumbra,
    UnfilteredTranslucency,
    Shadow,
    Composed,
}

impl LogicalTexture {
    pub fn format(self) -> vk::Format {
        use LogicalTexture::*;
        match self {
            MotionVectors => vk::Format::R16G16B16A16_SFLOAT,
            NormalRoughness => vk::Format::A2B10G10R10_UNORM_PACK32,
            ViewZ | UnfilteredPenumbra => vk::Format::R16_SFLOAT,
            BaseColorMetalness | Validation | UnfilteredTranslucency | Shadow => {
                vk::Format::R8G8B8A8_UNORM
            }
            UnfilteredDiff | UnfilteredDiffSh | Diff | DiffSh | UnfilteredSpec
            | UnfilteredSpecSh | Spec | SpecSh | Composed => vk::Format::R16G16B16A16_SFLOAT,
        }
    }
}

pub type Binding = (DenoiserSlot, LogicalTexture);

const COMMON_BINDINGS: &[Binding] = &[
    (DenoiserSlot::InMotionVectors, LogicalTexture::MotionVectors),
    (DenoiserSlot::InNormalRoughness, LogicalTexture::NormalRoughness),
    (DenoiserSlot::InViewZ, LogicalTexture::ViewZ),
    (DenoiserSlot::InBaseColorMetalness, LogicalTexture::BaseColorMetalness),
    (DenoiserSlot::OutValidation, LogicalTexture::Validation),
    (DenoiserSlot::InDiffRadianceHitDist, LogicalTexture::UnfilteredDiff),
    (DenoiserSlot::OutDiffRadianceHitDist, LogicalTexture::Diff),
    (DenoiserSlot::InSpecRadianceHitDist, LogicalTexture::UnfilteredSpec),
    (DenoiserSlot::OutSpecRadianceHitDist, LogicalTexture::Spec),
    (DenoiserSlot::InPenumbra, LogicalTexture::UnfilteredPenumbra),
    (DenoiserSlot::InTranslucency, LogicalTexture::UnfilteredTranslucency),
    (DenoiserSlot::OutShadowTranslucency, LogicalTexture::Shadow),
    (DenoiserSlot::InSignal, LogicalTexture::Composed),
    (DenoiserSlot::OutSignal, LogicalTexture::Composed),
];

const OCCLUSION_BINDINGS: &[Binding] = &[
    (DenoiserSlot::InDiffHitDist, LogicalTexture::UnfilteredDiff),
    (DenoiserSlot::OutDiffHitDist, LogicalTexture::Diff),
    (DenoiserSlot::InSpecHitDist, LogicalTexture::UnfilteredSpec),
    (DenoiserSlot::OutSpecHitDist, LogicalTexture::Spec),
];

const SH_BINDINGS: &[Binding] = &[
    (DenoiserSlot::InDiffSh0, LogicalTexture::UnfilteredDiff),
    (DenoiserSlot::InDiffSh1, LogicalTexture::UnfilteredDiffSh),
    (DenoiserSlot::OutDiffSh0, LogicalTexture::Diff),
    (DenoiserSlot::OutDiffSh1, LogicalTexture::DiffSh),
    (DenoiserSlot::InSpecSh0, LogicalTexture::UnfilteredSpec),
    (DenoiserSlot::InSpecSh1, LogicalTexture::UnfilteredSpecSh),
    (DenoiserSlot::OutSpecSh0, LogicalTexture::Spec),
    (DenoiserSlot::OutSpecSh1, LogicalTexture::SpecSh),
];

const DIRECTIONAL_OCCLUSION_BINDINGS: &[Binding] = &[
    (DenoiserSlot::InDiffDirectionHitDist, LogicalTexture::UnfilteredDiff),
    (DenoiserSlot::OutDiffDirectionHitDist, LogicalTexture::Diff),
];

impl DenoiserVariant {
    pub fn bindings(self) -> impl Iterator<Item = Binding> {
        let extra: &[Binding] = match self {
            DenoiserVariant::Radiance => &[],
            DenoiserVariant::Occlusion => OCCLUSION_BINDINGS,
            DenoiserVariant::Sh => SH_BINDINGS,
            DenoiserVariant::DirectionalOcclusion => DIRECTIONAL_OCCLUSION_BINDINGS,
        };
        COMMON_BINDINGS.iter().chain(extra).copied()
    }

    /// Every texture the variant binds, without duplicates.
    pub fn textures(self) -> Vec<LogicalTexture> {
        let mut textures = Vec::new();
        for (_, texture) in self.bindings() {
            if !textures.contains(&texture) {
                textures.push(texture);
            }
        }
        textures
    }
}

/// One bound slot. The denoiser overwrites `final_state` with the state it leaves the resource in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DenoiserResource {
    pub slot: DenoiserSlot,
    pub resource: ResourceHandle,
    pub initial: ResourceState,
    pub final_state: ResourceState,
}

pub trait Denoiser {
    /// When true, resources are handed back in their initial state. A resource that cannot be
    /// restored reports the state it was left in instead, and only those are folded back.
    fn restores_initial_state(&self) -> bool;

    fn denoise(
        &mut self,
        commands: &mut CommandList,
        resources: &mut [DenoiserResource],
    ) -> Result<()>;
}

/// The textures a variant needs, created once at startup.
pub struct DenoiserTextures {
    variant: DenoiserVariant,
    textures: Vec<(LogicalTexture, ResourceHandle)>,
}

impl DenoiserTextures {
    pub fn new(
        device: &mut dyn Device,
        ctx: &mut PassContext,
        variant: DenoiserVariant,
        [width, height]: [u32; 2],
    ) -> Result<Self> {
        let mut textures = Vec::new();
        for texture in variant.textures() {
            let handle = device.create_texture(
                ctx.registry_mut(),
                &TextureDesc {
                    name: format!("{texture:?}"),
                    format: texture.format(),
                    width,
                    height,
                },
            )?;
            textures.push((texture, handle));
        }
        Ok(Self { variant, textures })
    }

    pub fn get(&self, texture: LogicalTexture) -> Option<ResourceHandle> {
        self.textures
            .iter()
            .find(|(t, _)| *t == texture)
            .map(|(_, handle)| *handle)
    }

    pub fn variant(&self) -> DenoiserVariant {
        self.variant
    }

    pub fn destroy(self, device: &mut dyn Device, ctx: &mut PassContext) {
        for (_, handle) in self.textures {
            device.destroy_texture(ctx.registry_mut(), handle);
        }
    }

    /// Runs the denoiser over every bound texture and records the states it left them in. A
    /// restoring denoiser only reports the resources it did not restore. Returns how many
    /// resources were folded back.
    pub fn denoise(&self, ctx: &mut PassContext, denoiser: &mut dyn Denoiser) -> Result<usize> {
        let mut resources: Vec<_> = self
            .variant
            .bindings()
            .filter_map(|(slot, texture)| self.get(texture).map(|resource| (slot, resource)))
            .map(|(slot, resource)| {
                let initial = ctx.registry().get(resource);
                DenoiserResource {
                    slot,
                    resource,
                    initial,
                    final_state: initial,
                }
            })
            .collect();

        denoiser.denoise(ctx.commands_mut(), &mut resources)?;
        let restored = denoiser.restores_initial_state();

        let mut reported: Vec<(ResourceHandle, ResourceState)> = Vec::new();
        for r in &resources {
            if restored && r.final_state == r.initial {
                continue;
            }
            match reported.iter_mut().find(|(handle, _)| *handle == r.resource) {
                Some(entry) => entry.1 = r.final_state,
                None => reported.push((r.resource, r.final_state)),
            }
        }
        if !reported.is_empty() {
            ctx.fold_external(&reported);
        }
        Ok(reported.len())
    }
}

/// Moves inputs to shader read and outputs to storage with its own barriers, without doing any
/// filtering. Stands in for a real denoiser.
#[derive(Debug, Default)]
pub struct BarrierOnlyDenoiser {
    pub restore_initial_state: bool,
}

impl Denoiser for BarrierOnlyDenoiser {
    fn restores_initial_state(&self) -> bool {
        self.restore_initial_state
    }

    fn denoise(
        &mut self,
        commands: &mut CommandList,
        resources: &mut [DenoiserResource],
    ) -> Result<()> {
        let mut into = BarrierBatch::default();
        let mut back = BarrierBatch::default();
        for i in 0..resources.len() {
            let resource = resources[i].resource;
            if resources[..i].iter().any(|r| r.resource == resource) {
                continue;
            }
            let written = resources
                .iter()
                .any(|r| r.resource == resource && r.slot.is_output());
            let access = if written {
                AccessKind::Storage
            } else {
                AccessKind::ShaderRead
            };
            let initial = resources[i].initial;
            let after = ResourceState::texture(access);
            if initial != after || access.is_write() {
                into.barriers.push(Barrier {
                    resource,
                    before: initial,
                    after,
                });
            }
            // An unused texture has no contents to go back to, it stays where the pass left it.
            let restore = self.restore_initial_state && initial.access != AccessKind::None;
            if restore && initial != after {
                back.barriers.push(Barrier {
                    resource,
                    before: after,
                    after: initial,
                });
            }

            let final_state = if restore { initial } else { after };
            for r in resources.iter_mut().filter(|r| r.resource == resource) {
                r.final_state = final_state;
            }
        }

        debug!("Denoiser transitions {} resources", into.len());
        if !into.is_empty() {
            commands.push(Command::Barrier(into));
        }
        if !back.is_empty() {
            commands.push(Command::Barrier(back));
        }
        Ok(())
    }
}
