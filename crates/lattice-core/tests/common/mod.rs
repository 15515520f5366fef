//! Shared fixtures for context integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use lattice_core::{
    ConstantBufferBinding, Context, ContextConfig, Device, FormatDesc, FormatId, FormatTable,
    InputLayout, ShaderId, VertexAttrib, VertexBufferBinding, ViewCaps, ViewDesc, ViewId,
};
use lattice_gl::recording::RecordingDriver;
use lattice_gl::{
    AttribKind, DeviceCaps, RawName, ShaderStage, TextureTarget, VertexAttribFormat,
};
use lattice_psb::test_utils::SourceChunkBuilder;
use lattice_psb::SymbolType;

pub const RGBA8: FormatId = FormatId(1);
pub const SRGBA8: FormatId = FormatId(2);
pub const D24S8: FormatId = FormatId(3);

pub const RGBA8_NATIVE: u32 = 0x8058;

pub fn device_with(caps: DeviceCaps) -> Arc<Device> {
    let mut formats = FormatTable::new();
    formats.register(RGBA8, FormatDesc::color(RGBA8_NATIVE));
    formats.register(
        SRGBA8,
        FormatDesc {
            color_renderable: true,
            depth_renderable: false,
            stencil_renderable: false,
            srgb: true,
            native_image_format: 0x8C43,
        },
    );
    formats.register(
        D24S8,
        FormatDesc {
            color_renderable: false,
            depth_renderable: true,
            stencil_renderable: true,
            srgb: false,
            native_image_format: 0x88F0,
        },
    );
    Device::new(caps, formats)
}

pub fn context() -> Context<RecordingDriver> {
    context_with(DeviceCaps::desktop())
}

pub fn context_with(caps: DeviceCaps) -> Context<RecordingDriver> {
    Context::new(RecordingDriver::new(), device_with(caps), ContextConfig::default())
}

pub fn float4() -> VertexAttribFormat {
    VertexAttribFormat {
        components: 4,
        kind: AttribKind::F32,
        normalized: false,
        integer: false,
    }
}

pub fn vertex_blob() -> Vec<u8> {
    SourceChunkBuilder::new("uniform cb_vs { vec4 u_mvp; };\nvoid main() { gl_Position = u_mvp; }\n")
        .uniform_buffer(0, "cb_vs")
        .build_blob(None, None)
}

/// Vertex source with a depth-clamp import symbol defaulting to off.
pub fn vertex_blob_with_depth_clamp() -> Vec<u8> {
    SourceChunkBuilder::new("uniform cb_vs { vec4 u_mvp; };\nvoid main() { gl_Position = u_mvp; }\n")
        .uniform_buffer(0, "cb_vs")
        .import(SymbolType::EmulateDepthClamp, 0, 0)
        .build_blob(None, None)
}

pub fn fragment_blob() -> Vec<u8> {
    SourceChunkBuilder::new(
        "uniform sampler2D tex_color;\nuniform cb_fs { vec4 u_tint; };\nout vec4 o_color;\nvoid main() { o_color = u_tint; }\n",
    )
    .sampler(0, 0, 0, true, false, "tex_color", "")
    .uniform_buffer(0, "cb_fs")
    .build_blob(None, None)
}

/// Same declarations as [`fragment_blob`], different body.
pub fn fragment_blob_variant() -> Vec<u8> {
    SourceChunkBuilder::new(
        "uniform sampler2D tex_color;\nuniform cb_fs { vec4 u_tint; };\nout vec4 o_color;\nvoid main() { o_color = 2.0 * u_tint; }\n",
    )
    .sampler(0, 0, 0, true, false, "tex_color", "")
    .uniform_buffer(0, "cb_fs")
    .build_blob(None, None)
}

pub fn broken_fragment_blob() -> Vec<u8> {
    SourceChunkBuilder::new("out vec4 o_color;\nvoid main() { COMPILE_ERROR }\n").build_blob(None, None)
}

pub fn compute_blob() -> Vec<u8> {
    SourceChunkBuilder::new(
        "uniform cb_cs { vec4 u_params; };\nbuffer sb_data { float values[]; };\nuniform image2D img_out;\nvoid main() {}\n",
    )
    .uniform_buffer(0, "cb_cs")
    .storage_buffer(0, "sb_data")
    .image(0, "img_out")
    .build_blob(None, None)
}

pub fn texture_view(ctx: &mut Context<RecordingDriver>, name: RawName, format: FormatId) -> ViewId {
    ctx.create_view(ViewDesc {
        name,
        kind: lattice_core::ViewKind::Texture {
            target: TextureTarget::Tex2D,
            level: 0,
            layer: None,
        },
        format,
        caps: ViewCaps::TEXTURE | ViewCaps::ATTACHMENT | ViewCaps::IMAGE,
    })
}

pub struct DrawSetup {
    pub vs: ShaderId,
    pub fs: ShaderId,
    pub rt: ViewId,
    pub tex: ViewId,
}

/// Binds everything a plain textured draw needs.
pub fn draw_ready(ctx: &mut Context<RecordingDriver>) -> DrawSetup {
    let vs = ctx
        .create_shader(ShaderStage::Vertex, &vertex_blob())
        .expect("vertex shader");
    let fs = ctx
        .create_shader(ShaderStage::Fragment, &fragment_blob())
        .expect("fragment shader");
    ctx.set_shader(ShaderStage::Vertex, Some(vs)).expect("bind vs");
    ctx.set_shader(ShaderStage::Fragment, Some(fs)).expect("bind fs");

    let rt = texture_view(ctx, 100, RGBA8);
    ctx.set_render_targets(&[Some(rt)], None, None).expect("render targets");

    let vb = ctx.create_buffer(1 << 10);
    ctx.set_vertex_buffer(
        0,
        Some(VertexBufferBinding {
            buffer: vb,
            stride: 16,
            offset: 0,
        }),
    )
    .expect("vertex buffer");
    ctx.set_input_layout(InputLayout {
        attribs: vec![VertexAttrib {
            buffer_slot: 0,
            format: float4(),
            offset: 0,
            divisor: 0,
        }],
    });

    let cb = ctx.create_buffer(512);
    ctx.set_constant_buffer(
        ShaderStage::Vertex,
        0,
        Some(ConstantBufferBinding {
            buffer: cb,
            offset: 0,
            size: 64,
        }),
    )
    .expect("vs constants");
    ctx.set_constant_buffer(
        ShaderStage::Fragment,
        0,
        Some(ConstantBufferBinding {
            buffer: cb,
            offset: 256,
            size: 64,
        }),
    )
    .expect("fs constants");

    let tex = texture_view(ctx, 101, RGBA8);
    ctx.set_shader_texture(ShaderStage::Fragment, 0, Some(tex)).expect("texture");
    let sampler = ctx.create_sampler();
    ctx.set_sampler(ShaderStage::Fragment, 0, Some(sampler));

    DrawSetup { vs, fs, rt, tex }
}
