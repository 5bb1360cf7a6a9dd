mod common;

use common::MockDevice;
use rt_scheduler::{
    denoiser::{BarrierOnlyDenoiser, DenoiserTextures, DenoiserVariant},
    device::Command,
    pass::PassContext,
    vulkan::sync_manager::{
        resource_access::{AccessKind, ResourceState},
        transition_batcher::{PendingTransition, TransitionBatcher},
    },
};

fn setup(variant: DenoiserVariant) -> (MockDevice, PassContext, DenoiserTextures) {
    let mut device = MockDevice::new();
    let mut ctx = PassContext::new(TransitionBatcher::default());
    let textures = DenoiserTextures::new(&mut device, &mut ctx, variant, [64, 64]).unwrap();
    (device, ctx, textures)
}

#[test]
fn reported_states_become_the_registry_baseline() {
    let variant = DenoiserVariant::Radiance;
    let (_, mut ctx, textures) = setup(variant);
    let mut denoiser = BarrierOnlyDenoiser::default();

    let folded = textures.denoise(&mut ctx, &mut denoiser).unwrap();
    assert_eq!(folded, variant.textures().len());

    for (slot, texture) in variant.bindings() {
        let handle = textures.get(texture).unwrap();
        let expected = if variant
            .bindings()
            .any(|(s, t)| t == texture && s.is_output())
        {
            AccessKind::Storage
        } else {
            AccessKind::ShaderRead
        };
        assert_eq!(
            ctx.registry().get(handle),
            ResourceState::texture(expected),
            "{slot:?}"
        );
    }

    // Inputs are already readable, so asking for that again records nothing.
    let inputs: Vec<_> = variant
        .bindings()
        .filter(|(_, texture)| {
            !variant
                .bindings()
                .any(|(s, t)| t == *texture && s.is_output())
        })
        .filter_map(|(_, texture)| textures.get(texture))
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .map(|handle| PendingTransition::texture(handle, AccessKind::ShaderRead))
        .collect();
    assert!(!inputs.is_empty());
    assert_eq!(ctx.transition(&inputs).unwrap(), 0);
}

#[test]
fn restoring_denoisers_leave_the_registry_alone() {
    let variant = DenoiserVariant::Occlusion;
    let (_, mut ctx, textures) = setup(variant);

    let all: Vec<_> = variant
        .textures()
        .into_iter()
        .filter_map(|texture| textures.get(texture))
        .map(|handle| PendingTransition::texture(handle, AccessKind::ShaderRead))
        .collect();
    ctx.transition_all(&all).unwrap();
    let _ = ctx.finish();

    let mut denoiser = BarrierOnlyDenoiser {
        restore_initial_state: true,
    };
    assert_eq!(textures.denoise(&mut ctx, &mut denoiser).unwrap(), 0);
    for transition in &all {
        assert_eq!(ctx.registry().get(transition.resource), transition.state);
    }
    // Outputs go to storage and come back.
    assert_eq!(ctx.commands().len(), 2);
}

#[test]
fn unused_textures_keep_the_state_a_restoring_denoiser_left() {
    let variant = DenoiserVariant::Radiance;
    let (_, mut ctx, textures) = setup(variant);

    let mut denoiser = BarrierOnlyDenoiser {
        restore_initial_state: true,
    };
    let folded = textures.denoise(&mut ctx, &mut denoiser).unwrap();
    assert_eq!(folded, variant.textures().len());

    // Only the barriers into the pass, nothing leads back to an undefined layout.
    let commands = ctx.finish();
    assert_eq!(commands.len(), 1);

    let mut last = std::collections::HashMap::new();
    for command in commands.commands() {
        if let Command::Barrier(batch) = command {
            for barrier in batch.iter() {
                last.insert(barrier.resource, barrier.after);
            }
        }
    }
    assert_eq!(last.len(), variant.textures().len());
    for (resource, state) in last {
        assert_ne!(state, ResourceState::UNUSED);
        assert_eq!(ctx.registry().get(resource), state);
    }
}

#[test]
fn textures_start_unused_and_are_destroyed() {
    let variant = DenoiserVariant::Sh;
    let (mut device, mut ctx, textures) = setup(variant);
    assert_eq!(device.textures.len(), variant.textures().len());
    for texture in variant.textures() {
        let handle = textures.get(texture).unwrap();
        assert_eq!(ctx.registry().get(handle), ResourceState::UNUSED);
    }
    textures.destroy(&mut device, &mut ctx);
    assert!(device.textures.is_empty());
    assert!(ctx.registry().is_empty());
}
