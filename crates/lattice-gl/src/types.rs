//! Vocabulary types shared by the driver seam and the caching layer.

use bitflags::bitflags;

/// Number of shader stages a pipeline can reference.
pub const STAGE_COUNT: usize = 6;
/// Number of stages that participate in a graphics pipeline.
pub const GRAPHICS_STAGE_COUNT: usize = 5;

/// A shader stage, in linkage order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    TessControl,
    TessEvaluation,
    Geometry,
    Fragment,
    Compute,
}

impl ShaderStage {
    /// Stable index of this stage, usable for per-stage arrays.
    pub fn index(self) -> usize {
        match self {
            Self::Vertex => 0,
            Self::TessControl => 1,
            Self::TessEvaluation => 2,
            Self::Geometry => 3,
            Self::Fragment => 4,
            Self::Compute => 5,
        }
    }

    /// All stages, in [`ShaderStage::index`] order.
    pub const ALL: [ShaderStage; STAGE_COUNT] = [
        Self::Vertex,
        Self::TessControl,
        Self::TessEvaluation,
        Self::Geometry,
        Self::Fragment,
        Self::Compute,
    ];
}

/// Server-side capabilities toggled through `glEnable`/`glDisable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Blend,
    DepthTest,
    StencilTest,
    CullFace,
    ScissorTest,
    DepthClamp,
    FramebufferSrgb,
    SampleMask,
    PolygonOffsetFill,
    MultisampleAlphaToCoverage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareFunc {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstColor,
    OneMinusDstColor,
    DstAlpha,
    OneMinusDstAlpha,
    ConstantColor,
    OneMinusConstantColor,
    ConstantAlpha,
    OneMinusConstantAlpha,
    SrcAlphaSaturate,
    Src1Color,
    OneMinusSrc1Color,
    Src1Alpha,
    OneMinusSrc1Alpha,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendOp {
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StencilOp {
    Keep,
    Zero,
    Replace,
    IncrClamp,
    DecrClamp,
    Invert,
    IncrWrap,
    DecrWrap,
}

/// Face selector for culling and two-sided stencil state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CullFace {
    Front,
    Back,
    FrontAndBack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FillMode {
    Solid,
    Wireframe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrontFace {
    CounterClockwise,
    Clockwise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveMode {
    Points,
    Lines,
    LineStrip,
    LinesAdjacency,
    LineStripAdjacency,
    Triangles,
    TriangleStrip,
    TrianglesAdjacency,
    TriangleStripAdjacency,
    Patches,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexType {
    U16,
    U32,
}

impl IndexType {
    /// Size of one index, in bytes.
    pub fn size(self) -> usize {
        match self {
            Self::U16 => 2,
            Self::U32 => 4,
        }
    }
}

/// Binding target of a buffer object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferTarget {
    Array,
    ElementArray,
    Uniform,
    Storage,
    DrawIndirect,
    DispatchIndirect,
}

/// Binding target of a texture object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureTarget {
    Tex1D,
    Tex1DArray,
    Tex2D,
    Tex2DArray,
    Tex3D,
    Cube,
    CubeArray,
    Tex2DMultisample,
    Tex2DMultisampleArray,
    Buffer,
}

bitflags! {
    /// Per-channel color write mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ColorWrites: u8 {
        const RED = 1 << 0;
        const GREEN = 1 << 1;
        const BLUE = 1 << 2;
        const ALPHA = 1 << 3;
    }
}

impl ColorWrites {
    /// Write mask enabling all four channels.
    pub const ALL: ColorWrites = ColorWrites::all();
}

/// Scalar kind of a vertex attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttribKind {
    F32,
    F16,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
}

/// How a vertex attribute is fetched from its element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribFormat {
    /// Component count, 1 through 4.
    pub components: u8,
    /// Scalar kind of each component.
    pub kind: AttribKind,
    /// Whether integer components are normalized into [0, 1] / [-1, 1].
    pub normalized: bool,
    /// Whether the attribute is declared integral in the shader (selects
    /// the integer pointer setup instead of the float one).
    pub integer: bool,
}
