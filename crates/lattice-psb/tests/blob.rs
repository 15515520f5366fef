//! End-to-end parsing of complete blobs through the public API.

use lattice_psb::test_utils::{build_container, build_signature_chunk, SourceChunkBuilder};
use lattice_psb::{
    FourCC, PsbError, PsbFile, ShaderReflection, SymbolType, CHUNK_GLSL, CHUNK_ISGN, CHUNK_OSGN,
};
use pretty_assertions::assert_eq;

const VS_SOURCE: &str = "\
uniform sampler2D tex_diffuse;
uniform cb_object { mat4 u_world; };
void main() { gl_Position = vec4(0.0); }
";

fn vertex_blob() -> Vec<u8> {
    let isgn = build_signature_chunk(&[
        ("POSITION", 0, 0, 3, 0, 0b1111, 0b1111),
        ("TEXCOORD", 0, 0, 3, 1, 0b0011, 0b0011),
    ]);
    let osgn = build_signature_chunk(&[("SV_Position", 0, 1, 3, 0, 0b1111, 0b1111)]);
    SourceChunkBuilder::new(VS_SOURCE)
        .input_hash(0x1234_5678)
        .sampler(0, 0, 0, true, false, "tex_diffuse", "")
        .uniform_buffer(0, "cb_object")
        .import(SymbolType::EmulateDepthClamp, 0, 0)
        .build_blob(Some(&isgn), Some(&osgn))
}

#[test]
fn reflection_aggregates_all_chunks() {
    let refl = ShaderReflection::parse(&vertex_blob()).expect("parse");

    assert_eq!(refl.shader_model.major, 5);
    assert_eq!(refl.source.input_hash, 0x1234_5678);
    assert_eq!(refl.source.source, VS_SOURCE);
    assert_eq!(refl.source.samplers.len(), 1);
    assert_eq!(refl.source.samplers[0].normal_name, "tex_diffuse");
    assert_eq!(refl.source.uniform_buffers[0].name, "cb_object");
    assert_eq!(refl.source.imports[0].ty, SymbolType::EmulateDepthClamp);

    assert_eq!(refl.input_signature.entries.len(), 2);
    assert_eq!(refl.output_signature.entries.len(), 1);
    let texcoord = refl.input_signature.find("texcoord", 0).expect("entry");
    assert_eq!(texcoord.register, 1);
    assert_eq!(texcoord.mask, 0b0011);
}

#[test]
fn container_exposes_chunks_in_declaration_order() {
    let blob = vertex_blob();
    let file = PsbFile::parse(&blob).expect("parse");

    assert_eq!(file.header().chunk_count, 3);
    assert_eq!(file.header().total_size as usize, blob.len());
    let tags: Vec<FourCC> = file.chunks().map(|c| c.fourcc).collect();
    assert_eq!(tags, vec![CHUNK_GLSL, CHUNK_ISGN, CHUNK_OSGN]);
    assert!(file.find_chunk(FourCC(*b"XTRA")).is_none());
}

#[test]
fn blobs_without_signatures_reflect_empty_tables() {
    let blob = SourceChunkBuilder::new("void main() {}\n").build_blob(None, None);
    let refl = ShaderReflection::parse(&blob).expect("parse");
    assert!(refl.input_signature.entries.is_empty());
    assert!(refl.output_signature.entries.is_empty());
}

#[test]
fn every_truncation_is_rejected_without_panicking() {
    let blob = vertex_blob();
    for len in 0..blob.len() {
        assert!(ShaderReflection::parse(&blob[..len]).is_err(), "len {len}");
    }
}

#[test]
fn foreign_container_magic_is_rejected() {
    let mut blob = vertex_blob();
    blob[..4].copy_from_slice(b"DXBC");
    assert!(matches!(
        ShaderReflection::parse(&blob),
        Err(PsbError::MalformedHeader(_))
    ));
}

#[test]
fn missing_source_chunk_is_reported_as_such() {
    let isgn = build_signature_chunk(&[]);
    let blob = build_container(&[(CHUNK_ISGN, &isgn)]);
    assert!(matches!(
        ShaderReflection::parse(&blob),
        Err(PsbError::MissingChunk(_))
    ));
}
