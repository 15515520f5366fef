//! Flush minimality: after a state class is reconciled once, re-issuing
//! the same configuration must not reach the driver again.

mod common;

use common::*;
use lattice_core::{
    BlendState, ContextError, DepthStencilState, IndexBufferBinding, RasterizerState, Viewport,
};
use lattice_gl::recording::Call;
use lattice_gl::{
    BlendFactor, Capability, ColorWrites, CullFace, DeviceCaps, IndexType, PrimitiveMode,
    ShaderStage, TextureTarget,
};
use pretty_assertions::assert_eq;

#[test]
fn second_identical_draw_emits_only_the_draw() {
    let mut ctx = context();
    draw_ready(&mut ctx);

    ctx.draw(0, 3).expect("first draw");
    assert!(ctx.driver().count(|c| matches!(c, Call::CompileSource { .. })) == 2);
    assert!(ctx.driver().count(|c| matches!(c, Call::LinkProgram(_))) == 1);

    ctx.driver_mut().clear_calls();
    ctx.draw(0, 3).expect("second draw");
    assert_eq!(
        ctx.driver().calls,
        vec![Call::DrawArrays {
            mode: PrimitiveMode::Triangles,
            first: 0,
            count: 3,
            instances: 1,
        }]
    );
}

#[test]
fn redundant_setters_reach_no_native_call() {
    let mut ctx = context();
    let setup = draw_ready(&mut ctx);
    let viewport = Viewport {
        x: 0.0,
        y: 0.0,
        width: 800.0,
        height: 600.0,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    ctx.set_viewports(&[viewport]);
    ctx.draw(0, 3).expect("first draw");

    ctx.driver_mut().clear_calls();
    ctx.set_blend_state(&BlendState::default()).expect("blend");
    ctx.set_depth_stencil_state(&DepthStencilState::default());
    ctx.set_rasterizer_state(&RasterizerState::default());
    ctx.set_viewports(&[viewport]);
    ctx.set_shader(ShaderStage::Vertex, Some(setup.vs)).expect("vs");
    ctx.set_shader(ShaderStage::Fragment, Some(setup.fs)).expect("fs");
    ctx.set_render_targets(&[Some(setup.rt)], None, None).expect("targets");
    ctx.set_shader_texture(ShaderStage::Fragment, 0, Some(setup.tex)).expect("texture");
    assert_eq!(ctx.driver().calls, vec![]);

    ctx.draw(0, 3).expect("second draw");
    assert_eq!(ctx.driver().count(|c| !matches!(c, Call::DrawArrays { .. })), 0);
}

#[test]
fn blend_state_emits_only_changed_groups() {
    let mut ctx = context();
    let mut state = BlendState::default();
    state.targets[0].enable = true;
    state.targets[0].src_color = BlendFactor::SrcAlpha;
    state.targets[0].dst_color = BlendFactor::OneMinusSrcAlpha;

    ctx.set_blend_state(&state).expect("blend");
    assert_eq!(
        ctx.driver().calls,
        vec![
            Call::SetCapability {
                cap: Capability::Blend,
                enabled: true
            },
            Call::BlendFunc {
                target: None,
                src_rgb: BlendFactor::SrcAlpha,
                dst_rgb: BlendFactor::OneMinusSrcAlpha,
                src_alpha: BlendFactor::One,
                dst_alpha: BlendFactor::Zero,
            },
        ]
    );

    ctx.driver_mut().clear_calls();
    ctx.set_blend_state(&state).expect("blend again");
    assert_eq!(ctx.driver().calls, vec![]);

    state.targets[0].write_mask = ColorWrites::RED | ColorWrites::GREEN;
    ctx.set_blend_state(&state).expect("mask change");
    assert_eq!(
        ctx.driver().calls,
        vec![Call::ColorMask {
            target: None,
            mask: ColorWrites::RED | ColorWrites::GREEN
        }]
    );
}

#[test]
fn unsupported_independent_blend_changes_nothing() {
    let mut caps = DeviceCaps::desktop();
    caps.independent_blend = false;
    let mut ctx = context_with(caps);

    let mut state = BlendState::default();
    state.independent = true;
    state.targets[1].enable = true;
    let err = ctx.set_blend_state(&state).unwrap_err();
    assert!(matches!(err, ContextError::Unsupported { .. }));
    assert_eq!(ctx.driver().calls, vec![]);
    assert_eq!(ctx.mirror().blend, BlendState::default());
}

#[test]
fn sample_mask_follows_device_support() {
    let mut ctx = context();
    ctx.set_sample_mask(0x0F).expect("mask");
    assert_eq!(
        ctx.driver().calls,
        vec![
            Call::SetCapability {
                cap: Capability::SampleMask,
                enabled: true
            },
            Call::SampleMask(0x0F),
        ]
    );
    ctx.driver_mut().clear_calls();
    ctx.set_sample_mask(0x0F).expect("same mask");
    assert_eq!(ctx.driver().calls, vec![]);
    ctx.set_sample_mask(!0).expect("disable");
    assert_eq!(
        ctx.driver().calls,
        vec![Call::SetCapability {
            cap: Capability::SampleMask,
            enabled: false
        }]
    );

    let mut caps = DeviceCaps::desktop();
    caps.sample_mask = false;
    let mut ctx = context_with(caps);
    assert!(ctx.set_sample_mask(0x0F).is_err());
    assert!(ctx.set_sample_mask(!0).is_ok());
    assert_eq!(ctx.driver().calls, vec![]);
}

#[test]
fn stencil_reference_change_reemits_both_faces_only() {
    let mut ctx = context();
    let mut state = DepthStencilState {
        stencil_enable: true,
        stencil_ref: 1,
        ..DepthStencilState::default()
    };
    ctx.set_depth_stencil_state(&state);
    assert!(ctx.driver().count(|c| matches!(c, Call::StencilFunc { .. })) == 2);

    ctx.driver_mut().clear_calls();
    state.stencil_ref = 2;
    ctx.set_depth_stencil_state(&state);
    assert_eq!(
        ctx.driver().calls,
        vec![
            Call::StencilFunc {
                face: CullFace::Front,
                func: state.front.func,
                reference: 2,
                mask: !0,
            },
            Call::StencilFunc {
                face: CullFace::Back,
                func: state.back.func,
                reference: 2,
                mask: !0,
            },
        ]
    );
}

#[test]
fn viewport_rect_and_depth_range_diff_separately() {
    let mut ctx = context();
    let mut viewport = Viewport {
        x: 0.0,
        y: 0.0,
        width: 800.0,
        height: 600.0,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    ctx.set_viewports(&[viewport]);
    assert_eq!(ctx.driver().count(|c| matches!(c, Call::Viewport { .. })), 1);
    assert_eq!(ctx.driver().count(|c| matches!(c, Call::DepthRange { .. })), 1);

    ctx.driver_mut().clear_calls();
    viewport.max_depth = 0.5;
    ctx.set_viewports(&[viewport]);
    assert_eq!(
        ctx.driver().calls,
        vec![Call::DepthRange {
            index: 0,
            near: 0.0,
            far: 0.5
        }]
    );
}

#[test]
fn clear_rebinds_the_pending_framebuffer_at_the_next_draw() {
    let mut ctx = context();
    draw_ready(&mut ctx);
    ctx.draw(0, 3).expect("draw");
    let framebuffer = ctx
        .driver()
        .calls
        .iter()
        .find_map(|c| match c {
            Call::GenFramebuffer(name) => Some(*name),
            _ => None,
        })
        .expect("framebuffer built");

    let scratch = texture_view(&mut ctx, 102, RGBA8);
    ctx.driver_mut().clear_calls();
    ctx.clear_render_target(scratch, [0.0, 0.0, 0.0, 1.0]).expect("clear");
    assert_eq!(
        ctx.driver().count(|c| matches!(
            c,
            Call::ClearColorBuffer { draw_buffer: 0, .. }
        )),
        1
    );

    ctx.driver_mut().clear_calls();
    ctx.draw(0, 3).expect("draw after clear");
    assert_eq!(
        ctx.driver().calls,
        vec![
            Call::BindDrawFramebuffer(framebuffer),
            Call::DrawArrays {
                mode: PrimitiveMode::Triangles,
                first: 0,
                count: 3,
                instances: 1,
            },
        ]
    );
}

#[test]
fn packed_depth_stencil_view_attaches_once() {
    let mut ctx = context();
    let setup = draw_ready(&mut ctx);
    let ds = texture_view(&mut ctx, 103, D24S8);
    ctx.set_render_targets(&[Some(setup.rt)], Some(ds), Some(ds)).expect("targets");
    ctx.draw(0, 3).expect("draw");

    use lattice_gl::Attachment;
    assert_eq!(
        ctx.driver().count(|c| matches!(
            c,
            Call::FramebufferTexture {
                attachment: Attachment::DepthStencil,
                ..
            }
        )),
        1
    );
    assert_eq!(
        ctx.driver().count(|c| matches!(
            c,
            Call::FramebufferTexture {
                attachment: Attachment::Depth,
                ..
            } | Call::FramebufferTexture {
                attachment: Attachment::Stencil,
                ..
            }
        )),
        0
    );
}

#[test]
fn indexed_draws_bind_the_element_buffer_once() {
    let mut ctx = context();
    draw_ready(&mut ctx);
    let ib = ctx.create_buffer(1 << 9);
    ctx.set_index_buffer(Some(IndexBufferBinding {
        buffer: ib,
        index_type: IndexType::U16,
        offset: 4,
    }))
    .expect("index buffer");

    ctx.draw_indexed(2, 6, 0).expect("first indexed draw");
    assert_eq!(
        ctx.driver().count(|c| matches!(
            c,
            Call::BindBuffer {
                target: lattice_gl::BufferTarget::ElementArray,
                ..
            }
        )),
        1
    );

    ctx.driver_mut().clear_calls();
    ctx.draw_indexed(2, 6, 0).expect("second indexed draw");
    assert_eq!(
        ctx.driver().calls,
        vec![Call::DrawElements {
            mode: PrimitiveMode::Triangles,
            count: 6,
            index_type: IndexType::U16,
            offset: 8,
            base_vertex: 0,
            instances: 1,
        }]
    );
}

#[test]
fn patch_control_points_flush_once() {
    let mut ctx = context();
    draw_ready(&mut ctx);
    ctx.set_topology(PrimitiveMode::Patches, 16);
    ctx.draw(0, 32).expect("first draw");
    assert_eq!(ctx.driver().count(|c| matches!(c, Call::PatchVertices(16))), 1);

    ctx.driver_mut().clear_calls();
    ctx.draw(0, 32).expect("second draw");
    assert_eq!(ctx.driver().count(|c| matches!(c, Call::PatchVertices(_))), 0);
}

#[test]
fn unbinding_a_texture_slot_clears_the_unit() {
    let mut ctx = context();
    draw_ready(&mut ctx);
    ctx.draw(0, 3).expect("draw");

    ctx.set_shader_texture(ShaderStage::Fragment, 0, None).expect("unbind");
    ctx.driver_mut().clear_calls();
    ctx.draw(0, 3).expect("draw after unbind");
    assert_eq!(
        ctx.driver().calls,
        vec![
            Call::BindTexture {
                target: TextureTarget::Tex2D,
                name: 0
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

#[test]
fn out_of_range_slots_are_ignored() {
    let mut ctx = context();
    let setup = draw_ready(&mut ctx);
    ctx.draw(0, 3).expect("draw");

    ctx.set_shader_texture(ShaderStage::Fragment, 500, Some(setup.tex)).expect("slot");
    ctx.set_sampler(ShaderStage::Fragment, 500, None);
    ctx.driver_mut().clear_calls();
    ctx.draw(0, 3).expect("draw again");
    assert_eq!(ctx.driver().count(|c| !matches!(c, Call::DrawArrays { .. })), 0);
}

#[test]
fn streamed_constants_upload_once_per_frame() {
    let mut ctx = context();
    draw_ready(&mut ctx);
    ctx.set_constant_data(ShaderStage::Vertex, 0, &[7u8; 64]);
    ctx.draw(0, 3).expect("first draw");
    assert_eq!(
        ctx.driver().count(|c| matches!(c, Call::NamedBufferSubData { len: 64, .. })),
        1
    );

    ctx.driver_mut().clear_calls();
    ctx.draw(0, 3).expect("second draw");
    assert_eq!(ctx.driver().count(|c| !matches!(c, Call::DrawArrays { .. })), 0);

    ctx.switch_frame();
    ctx.driver_mut().clear_calls();
    ctx.draw(0, 3).expect("draw in new frame");
    assert_eq!(
        ctx.driver().count(|c| matches!(c, Call::NamedBufferSubData { len: 64, .. })),
        1
    );
    assert_eq!(
        ctx.driver().count(|c| matches!(
            c,
            Call::BindBufferRange {
                target: lattice_gl::BufferTarget::Uniform,
                ..
            }
        )),
        1
    );
}
