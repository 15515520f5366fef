//! Cache identity, sharing and eviction across draws.

mod common;

use std::sync::Arc;

use common::*;
use lattice_core::{Context, ContextConfig, ContextError, RasterizerState};
use lattice_gl::recording::{Call, RecordingDriver};
use lattice_gl::{BufferTarget, Capability, DeviceCaps, PrimitiveMode, RawName, ShaderStage};
use lattice_psb::test_utils::SourceChunkBuilder;
use pretty_assertions::assert_eq;

#[test]
fn rebinding_a_previous_shader_hits_the_pipeline_cache() {
    let mut ctx = context();
    let setup = draw_ready(&mut ctx);
    ctx.draw(0, 3).expect("first draw");

    let variant = ctx
        .create_shader(ShaderStage::Fragment, &fragment_blob_variant())
        .expect("variant shader");
    ctx.set_shader(ShaderStage::Fragment, Some(variant)).expect("bind variant");
    ctx.draw(0, 3).expect("variant draw");
    assert_eq!(ctx.pipeline_cache().len(), 2);
    assert_eq!(ctx.pipeline_cache().stats.misses, 2);
    // Identical resource declarations intern to the same unit maps.
    assert_eq!(ctx.unit_map_cache().stats.hits, 2);
    assert_eq!(ctx.unit_map_cache().len(), 2);

    ctx.set_shader(ShaderStage::Fragment, Some(setup.fs)).expect("rebind");
    ctx.driver_mut().clear_calls();
    ctx.draw(0, 3).expect("draw after rebind");
    assert!(matches!(
        ctx.driver().calls.as_slice(),
        [Call::UseProgram(_), Call::DrawArrays { .. }]
    ));
    assert!(ctx.pipeline_cache().stats.hits >= 1);
}

#[test]
fn reordered_color_attachments_are_distinct_framebuffers() {
    let mut ctx = context();
    let setup = draw_ready(&mut ctx);
    let second = texture_view(&mut ctx, 102, RGBA8);
    ctx.draw(0, 3).expect("single target draw");

    ctx.set_render_targets(&[Some(setup.rt), Some(second)], None, None).expect("ab");
    ctx.draw(0, 3).expect("ab draw");
    ctx.set_render_targets(&[Some(second), Some(setup.rt)], None, None).expect("ba");
    ctx.draw(0, 3).expect("ba draw");
    assert_eq!(ctx.framebuffer_cache().len(), 3);
    assert_eq!(ctx.framebuffer_cache().stats.misses, 3);
    assert_eq!(ctx.framebuffer_cache().stats.hits, 0);

    ctx.set_render_targets(&[Some(setup.rt), Some(second)], None, None).expect("ab again");
    ctx.driver_mut().clear_calls();
    ctx.draw(0, 3).expect("ab redraw");
    assert!(matches!(
        ctx.driver().calls.as_slice(),
        [Call::BindDrawFramebuffer(_), Call::DrawArrays { .. }]
    ));
    assert_eq!(ctx.framebuffer_cache().stats.hits, 1);
}

#[test]
fn destroying_an_attached_view_evicts_its_framebuffers() {
    let mut ctx = context();
    let setup = draw_ready(&mut ctx);
    ctx.draw(0, 3).expect("draw");

    ctx.driver_mut().clear_calls();
    ctx.destroy_view(setup.rt).expect("destroy view");
    assert_eq!(ctx.driver().count(|c| matches!(c, Call::DeleteFramebuffer(_))), 1);
    assert_eq!(ctx.driver().count(|c| matches!(c, Call::BindDrawFramebuffer(0))), 1);
    assert_eq!(ctx.driver().count(|c| matches!(c, Call::DeleteTexture(100))), 1);
    assert!(ctx.framebuffer_cache().is_empty());
}

#[test]
fn destroying_a_shader_evicts_its_pipelines() {
    let mut ctx = context();
    let setup = draw_ready(&mut ctx);
    ctx.draw(0, 3).expect("draw");

    ctx.driver_mut().clear_calls();
    ctx.destroy_shader(setup.fs).expect("destroy shader");
    assert_eq!(ctx.driver().count(|c| matches!(c, Call::DeleteProgram(_))), 1);
    assert!(ctx.pipeline_cache().is_empty());

    let fs = ctx
        .create_shader(ShaderStage::Fragment, &fragment_blob())
        .expect("new shader");
    ctx.set_shader(ShaderStage::Fragment, Some(fs)).expect("rebind");
    ctx.driver_mut().clear_calls();
    ctx.draw(0, 3).expect("rebuild draw");
    assert_eq!(ctx.driver().count(|c| matches!(c, Call::LinkProgram(_))), 1);
    assert_eq!(ctx.pipeline_cache().len(), 1);
}

#[test]
fn failed_compilation_leaves_no_cache_entry_and_keeps_failing() {
    let mut ctx = context();
    let vs = ctx
        .create_shader(ShaderStage::Vertex, &vertex_blob())
        .expect("vertex shader");
    let fs = ctx
        .create_shader(ShaderStage::Fragment, &broken_fragment_blob())
        .expect("broken blob still parses");
    ctx.set_shader(ShaderStage::Vertex, Some(vs)).expect("bind vs");
    ctx.set_shader(ShaderStage::Fragment, Some(fs)).expect("bind fs");

    for _ in 0..2 {
        let err = ctx.draw(0, 3).unwrap_err();
        assert!(matches!(
            err,
            ContextError::ShaderCompile {
                stage: ShaderStage::Fragment,
                ..
            }
        ));
    }
    assert_eq!(ctx.pipeline_cache().stats.misses, 2);
    assert!(ctx.pipeline_cache().is_empty());
    assert_eq!(ctx.driver().count(|c| matches!(c, Call::LinkProgram(_))), 0);
    assert_eq!(ctx.driver().count(|c| matches!(c, Call::UseProgram(_))), 0);
    assert_eq!(ctx.driver().count(|c| matches!(c, Call::DrawArrays { .. })), 0);
    // The successfully compiled vertex shader must not leak.
    assert_eq!(
        ctx.driver().count(|c| matches!(c, Call::CompileSource { .. })),
        ctx.driver().count(|c| matches!(c, Call::DeleteShader(_)))
    );
}

#[test]
fn overdeclared_shaders_fail_the_pipeline_build_cleanly() {
    let mut ctx = context();
    let setup = draw_ready(&mut ctx);
    ctx.draw(0, 3).expect("baseline draw");

    // More fragment samplers than the device has texture units in total.
    let mut builder = SourceChunkBuilder::new("uniform sampler2D tex_s;\nvoid main() {}\n");
    for i in 0..100 {
        builder = builder.sampler(i, i, i, true, false, "tex_s", "");
    }
    let fs = ctx
        .create_shader(ShaderStage::Fragment, &builder.build_blob(None, None))
        .expect("blob still parses");
    ctx.set_shader(ShaderStage::Fragment, Some(fs)).expect("bind fs");

    ctx.driver_mut().clear_calls();
    for _ in 0..2 {
        let err = ctx.draw(0, 3).unwrap_err();
        assert!(matches!(err, ContextError::Unsupported { .. }));
    }
    assert_eq!(ctx.pipeline_cache().len(), 1);
    assert_eq!(ctx.driver().count(|c| matches!(c, Call::DrawArrays { .. })), 0);
    // The program of the failed build must not leak.
    assert_eq!(
        ctx.driver().count(|c| matches!(c, Call::CreateProgram(_))),
        ctx.driver().count(|c| matches!(c, Call::DeleteProgram(_)))
    );

    ctx.set_shader(ShaderStage::Fragment, Some(setup.fs)).expect("rebind");
    ctx.draw(0, 3).expect("recovered draw");
}

#[test]
fn incomplete_framebuffers_are_destroyed_not_cached() {
    let mut ctx = context();
    let view = texture_view(&mut ctx, 100, RGBA8);
    // The first driver-generated name is the framebuffer the clear builds.
    ctx.driver_mut().incomplete_framebuffers.insert(1);

    let err = ctx.clear_render_target(view, [0.0; 4]).unwrap_err();
    assert!(matches!(err, ContextError::IncompleteFrameBuffer));
    assert_eq!(ctx.driver().count(|c| matches!(c, Call::DeleteFramebuffer(1))), 1);
    assert_eq!(
        ctx.driver().count(|c| matches!(c, Call::ClearColorBuffer { .. })),
        0
    );
    assert!(ctx.framebuffer_cache().is_empty());
}

#[test]
fn contexts_on_one_device_assign_identical_units() {
    let device = device_with(DeviceCaps::desktop());
    let mut a = Context::new(
        RecordingDriver::new(),
        Arc::clone(&device),
        ContextConfig::default(),
    );
    let mut b = Context::new(RecordingDriver::new(), device, ContextConfig::default());
    draw_ready(&mut a);
    a.draw(0, 3).expect("draw a");
    draw_ready(&mut b);
    b.draw(0, 3).expect("draw b");

    let uniform_units = |driver: &RecordingDriver| -> Vec<u32> {
        driver
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::BindBufferRange {
                    target: BufferTarget::Uniform,
                    unit,
                    ..
                } => Some(*unit),
                _ => None,
            })
            .collect()
    };
    let units = uniform_units(a.driver());
    assert!(!units.is_empty());
    assert_eq!(units, uniform_units(b.driver()));
    assert_eq!(
        a.driver().count(|c| matches!(c, Call::ActiveTexture(_))),
        b.driver().count(|c| matches!(c, Call::ActiveTexture(_)))
    );
}

#[test]
fn disabling_depth_clip_without_native_clamp_rebuilds_the_pipeline() {
    let mut caps = DeviceCaps::desktop();
    caps.depth_clamp = false;
    let mut ctx = context_with(caps);

    let vs = ctx
        .create_shader(ShaderStage::Vertex, &vertex_blob_with_depth_clamp())
        .expect("vertex shader");
    let fs = ctx
        .create_shader(ShaderStage::Fragment, &fragment_blob())
        .expect("fragment shader");
    ctx.set_shader(ShaderStage::Vertex, Some(vs)).expect("bind vs");
    ctx.set_shader(ShaderStage::Fragment, Some(fs)).expect("bind fs");
    ctx.draw(0, 3).expect("first draw");

    let raster = RasterizerState {
        depth_clip: false,
        ..RasterizerState::default()
    };
    ctx.set_rasterizer_state(&raster);
    assert_eq!(
        ctx.driver().count(|c| matches!(
            c,
            Call::SetCapability {
                cap: Capability::DepthClamp,
                ..
            }
        )),
        0
    );
    ctx.draw(0, 3).expect("clamped draw");

    let vertex_shaders: Vec<RawName> = ctx
        .driver()
        .calls
        .iter()
        .filter_map(|c| match c {
            Call::CompileSource {
                stage: ShaderStage::Vertex,
                name,
            } => Some(*name),
            _ => None,
        })
        .collect();
    assert_eq!(vertex_shaders.len(), 2);
    let first = ctx.driver().source_of(vertex_shaders[0]).expect("source");
    let second = ctx.driver().source_of(vertex_shaders[1]).expect("source");
    assert!(!first.contains("#define IMPORT_0 1"));
    assert!(second.contains("#define IMPORT_0 1"));
    assert_eq!(ctx.pipeline_cache().len(), 2);
}

#[test]
fn compute_dispatch_binds_storage_and_image_units() {
    let mut ctx = context();
    let cs = ctx
        .create_shader(ShaderStage::Compute, &compute_blob())
        .expect("compute shader");
    ctx.set_shader(ShaderStage::Compute, Some(cs)).expect("bind cs");
    ctx.set_constant_data(ShaderStage::Compute, 0, &[5u8; 32]);

    let buffer = ctx.create_buffer(1 << 12);
    let storage = ctx
        .create_buffer_view(buffer, 0, 1 << 12, RGBA8)
        .expect("storage view");
    ctx.set_storage_buffer(ShaderStage::Compute, 0, Some(storage)).expect("storage");
    let image = texture_view(&mut ctx, 200, RGBA8);
    ctx.set_image(ShaderStage::Compute, 0, Some(image)).expect("image");

    ctx.dispatch(8, 8, 1).expect("first dispatch");
    assert_eq!(
        ctx.driver().count(|c| matches!(
            c,
            Call::BindBufferRange {
                target: BufferTarget::Storage,
                unit: 0,
                ..
            }
        )),
        1
    );
    assert_eq!(
        ctx.driver()
            .count(|c| matches!(c, Call::BindImage { unit: 0, format, .. } if *format == RGBA8_NATIVE)),
        1
    );
    assert_eq!(
        ctx.driver().count(|c| matches!(c, Call::NamedBufferSubData { len: 32, .. })),
        1
    );

    ctx.driver_mut().clear_calls();
    ctx.dispatch(8, 8, 1).expect("second dispatch");
    assert_eq!(ctx.driver().calls, vec![Call::Dispatch { x: 8, y: 8, z: 1 }]);
}

#[test]
fn srgb_capability_follows_the_bound_framebuffer() {
    let mut ctx = context();
    let setup = draw_ready(&mut ctx);
    let srgb_rt = texture_view(&mut ctx, 102, SRGBA8);
    ctx.draw(0, 3).expect("linear draw");
    assert_eq!(
        ctx.driver().count(|c| matches!(
            c,
            Call::SetCapability {
                cap: Capability::FramebufferSrgb,
                ..
            }
        )),
        0
    );
    let linear_fb = ctx
        .driver()
        .calls
        .iter()
        .find_map(|c| match c {
            Call::GenFramebuffer(name) => Some(*name),
            _ => None,
        })
        .expect("framebuffer name");

    ctx.set_render_targets(&[Some(srgb_rt)], None, None).expect("srgb target");
    ctx.draw(0, 3).expect("srgb draw");
    assert_eq!(
        ctx.driver().count(|c| matches!(
            c,
            Call::SetCapability {
                cap: Capability::FramebufferSrgb,
                enabled: true
            }
        )),
        1
    );

    ctx.set_render_targets(&[Some(setup.rt)], None, None).expect("linear target");
    ctx.driver_mut().clear_calls();
    ctx.draw(0, 3).expect("back to linear");
    assert_eq!(
        ctx.driver().calls,
        vec![
            Call::BindDrawFramebuffer(linear_fb),
            Call::SetCapability {
                cap: Capability::FramebufferSrgb,
                enabled: false
            },
            Call::DrawArrays {
                mode: PrimitiveMode::Triangles,
                first: 0,
                count: 3,
                instances: 1,
            },
        ]
    );
}
