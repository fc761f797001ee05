// src/state.rs
//! Fixed-function pipeline state.
//!
//! Everything a pipeline is compiled against that is not a shader lives here.
//! Every type is `#[repr(C)]` + `Pod` with no padding, so the exact in-memory
//! bytes double as the hashing input and the on-disk representation of a
//! [`PipelineStateKey`](crate::key::PipelineStateKey).

use std::fmt;
use std::hash::{Hash, Hasher};

use bytemuck::{Pod, Zeroable};
use xxhash_rust::xxh3::xxh3_64;

// ----------------------------------------------------------------------------
// Limits
// ----------------------------------------------------------------------------

pub const MAX_VERTEX_ATTRIBUTES: usize = 16;
pub const MAX_VERTEX_BINDINGS: usize = 16;
pub const MAX_RENDER_TARGETS: usize = 8;

/// All four colour channels.
pub const COLOR_WRITE_ALL: u32 = 0xF;

// ----------------------------------------------------------------------------
// Enumerated fields
// ----------------------------------------------------------------------------

/// Declares a `u32` newtype with named constants.
///
/// Plain Rust enums are not `Pod` (not every bit pattern is a valid value), and
/// a record read back from disk may legally carry any value.
macro_rules! state_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $value:expr),+ $(,)? }) => {
        $(#[$meta])*
        #[repr(transparent)]
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Pod, Zeroable)]
        pub struct $name(pub u32);

        impl $name {
            $(pub const $variant: Self = Self($value);)+

            #[inline]
            pub const fn raw(self) -> u32 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match *self {
                    $(Self::$variant => f.write_str(stringify!($variant)),)+
                    Self(other) => write!(f, "{}({})", stringify!($name), other),
                }
            }
        }
    };
}

state_enum! {
    /// 32-bit boolean, matching how drivers consume flags.
    Bool32 { FALSE = 0, TRUE = 1 }
}

impl Bool32 {
    #[inline]
    pub const fn is_true(self) -> bool {
        self.0 != 0
    }
}

impl From<bool> for Bool32 {
    #[inline]
    fn from(value: bool) -> Self {
        if value {
            Self::TRUE
        } else {
            Self::FALSE
        }
    }
}

state_enum! {
    PrimitiveTopology {
        POINT_LIST = 0,
        LINE_LIST = 1,
        LINE_STRIP = 2,
        TRIANGLE_LIST = 3,
        TRIANGLE_STRIP = 4,
        TRIANGLE_FAN = 5,
        PATCH_LIST = 10,
    }
}

state_enum! {
    PolygonMode { FILL = 0, LINE = 1, POINT = 2 }
}

state_enum! {
    CullMode { NONE = 0, FRONT = 1, BACK = 2, FRONT_AND_BACK = 3 }
}

state_enum! {
    FrontFace { COUNTER_CLOCKWISE = 0, CLOCKWISE = 1 }
}

state_enum! {
    CompareOp {
        NEVER = 0,
        LESS = 1,
        EQUAL = 2,
        LESS_OR_EQUAL = 3,
        GREATER = 4,
        NOT_EQUAL = 5,
        GREATER_OR_EQUAL = 6,
        ALWAYS = 7,
    }
}

state_enum! {
    StencilOp {
        KEEP = 0,
        ZERO = 1,
        REPLACE = 2,
        INCREMENT_AND_CLAMP = 3,
        DECREMENT_AND_CLAMP = 4,
        INVERT = 5,
        INCREMENT_AND_WRAP = 6,
        DECREMENT_AND_WRAP = 7,
    }
}

state_enum! {
    BlendFactor {
        ZERO = 0,
        ONE = 1,
        SRC_COLOR = 2,
        ONE_MINUS_SRC_COLOR = 3,
        DST_COLOR = 4,
        ONE_MINUS_DST_COLOR = 5,
        SRC_ALPHA = 6,
        ONE_MINUS_SRC_ALPHA = 7,
        DST_ALPHA = 8,
        ONE_MINUS_DST_ALPHA = 9,
        CONSTANT_COLOR = 10,
        ONE_MINUS_CONSTANT_COLOR = 11,
        SRC_ALPHA_SATURATE = 14,
    }
}

state_enum! {
    BlendOp { ADD = 0, SUBTRACT = 1, REVERSE_SUBTRACT = 2, MIN = 3, MAX = 4 }
}

state_enum! {
    LogicOp {
        CLEAR = 0,
        AND = 1,
        AND_REVERSE = 2,
        COPY = 3,
        AND_INVERTED = 4,
        NO_OP = 5,
        XOR = 6,
        OR = 7,
        NOR = 8,
        EQUIVALENT = 9,
        INVERT = 10,
        OR_REVERSE = 11,
        COPY_INVERTED = 12,
        OR_INVERTED = 13,
        NAND = 14,
        SET = 15,
    }
}

state_enum! {
    VertexInputRate { VERTEX = 0, INSTANCE = 1 }
}

state_enum! {
    /// Attachment and vertex attribute formats. Values follow the Vulkan numbering.
    Format {
        UNDEFINED = 0,
        R8G8B8A8_UNORM = 37,
        R8G8B8A8_SRGB = 43,
        B8G8R8A8_UNORM = 44,
        B8G8R8A8_SRGB = 50,
        R16G16B16A16_SFLOAT = 97,
        R32_SFLOAT = 100,
        R32G32_SFLOAT = 103,
        R32G32B32_SFLOAT = 106,
        R32G32B32A32_SFLOAT = 109,
        D16_UNORM = 124,
        D32_SFLOAT = 126,
        D24_UNORM_S8_UINT = 129,
        D32_SFLOAT_S8_UINT = 130,
    }
}

impl Format {
    #[inline]
    pub const fn is_defined(self) -> bool {
        self.0 != 0
    }
}

// ----------------------------------------------------------------------------
// Sub-states
// ----------------------------------------------------------------------------

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct InputAssemblyState {
    pub topology: PrimitiveTopology,
    pub primitive_restart: Bool32,
    /// Only meaningful for [`PrimitiveTopology::PATCH_LIST`].
    pub patch_vertex_count: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct VertexAttribute {
    pub location: u32,
    pub binding: u32,
    pub format: Format,
    pub offset: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct VertexBinding {
    pub binding: u32,
    pub stride: u32,
    pub input_rate: VertexInputRate,
    /// Instance step rate; ignored for per-vertex bindings.
    pub divisor: u32,
}

/// Vertex input layout. Only the first `attribute_count` / `binding_count`
/// entries are meaningful, the remainder stays zeroed so equality holds.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct VertexInputState {
    pub attribute_count: u32,
    pub binding_count: u32,
    pub attributes: [VertexAttribute; MAX_VERTEX_ATTRIBUTES],
    pub bindings: [VertexBinding; MAX_VERTEX_BINDINGS],
}

impl VertexInputState {
    pub fn attributes(&self) -> &[VertexAttribute] {
        let count = (self.attribute_count as usize).min(MAX_VERTEX_ATTRIBUTES);
        &self.attributes[..count]
    }

    pub fn bindings(&self) -> &[VertexBinding] {
        let count = (self.binding_count as usize).min(MAX_VERTEX_BINDINGS);
        &self.bindings[..count]
    }

    /// Appends an attribute. Returns `false` once the table is full.
    pub fn push_attribute(&mut self, attribute: VertexAttribute) -> bool {
        let index = self.attribute_count as usize;
        if index >= MAX_VERTEX_ATTRIBUTES {
            return false;
        }
        self.attributes[index] = attribute;
        self.attribute_count += 1;
        true
    }

    /// Appends a binding. Returns `false` once the table is full.
    pub fn push_binding(&mut self, binding: VertexBinding) -> bool {
        let index = self.binding_count as usize;
        if index >= MAX_VERTEX_BINDINGS {
            return false;
        }
        self.bindings[index] = binding;
        self.binding_count += 1;
        true
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct RasterizerState {
    pub depth_clamp_enable: Bool32,
    pub depth_bias_enable: Bool32,
    pub polygon_mode: PolygonMode,
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    pub viewport_count: u32,
}

impl Default for RasterizerState {
    fn default() -> Self {
        Self {
            depth_clamp_enable: Bool32::FALSE,
            depth_bias_enable: Bool32::FALSE,
            polygon_mode: PolygonMode::FILL,
            cull_mode: CullMode::BACK,
            front_face: FrontFace::CLOCKWISE,
            viewport_count: 1,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct MultisampleState {
    pub sample_count: u32,
    pub sample_mask: u32,
    pub alpha_to_coverage: Bool32,
    pub alpha_to_one: Bool32,
}

impl Default for MultisampleState {
    fn default() -> Self {
        Self {
            sample_count: 1,
            sample_mask: u32::MAX,
            alpha_to_coverage: Bool32::FALSE,
            alpha_to_one: Bool32::FALSE,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct StencilOpState {
    pub fail_op: StencilOp,
    pub pass_op: StencilOp,
    pub depth_fail_op: StencilOp,
    pub compare_op: CompareOp,
    pub compare_mask: u32,
    pub write_mask: u32,
    pub reference: u32,
}

impl Default for StencilOpState {
    fn default() -> Self {
        Self {
            fail_op: StencilOp::KEEP,
            pass_op: StencilOp::KEEP,
            depth_fail_op: StencilOp::KEEP,
            compare_op: CompareOp::ALWAYS,
            compare_mask: 0xFF,
            write_mask: 0xFF,
            reference: 0,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct DepthStencilState {
    pub depth_test: Bool32,
    pub depth_write: Bool32,
    pub stencil_test: Bool32,
    pub depth_compare_op: CompareOp,
    pub front: StencilOpState,
    pub back: StencilOpState,
}

impl Default for DepthStencilState {
    fn default() -> Self {
        Self {
            depth_test: Bool32::TRUE,
            depth_write: Bool32::TRUE,
            stencil_test: Bool32::FALSE,
            depth_compare_op: CompareOp::LESS_OR_EQUAL,
            front: StencilOpState::default(),
            back: StencilOpState::default(),
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct BlendAttachment {
    pub blend_enable: Bool32,
    pub src_color_factor: BlendFactor,
    pub dst_color_factor: BlendFactor,
    pub color_op: BlendOp,
    pub src_alpha_factor: BlendFactor,
    pub dst_alpha_factor: BlendFactor,
    pub alpha_op: BlendOp,
    pub write_mask: u32,
}

impl Default for BlendAttachment {
    fn default() -> Self {
        Self {
            blend_enable: Bool32::FALSE,
            src_color_factor: BlendFactor::ONE,
            dst_color_factor: BlendFactor::ZERO,
            color_op: BlendOp::ADD,
            src_alpha_factor: BlendFactor::ONE,
            dst_alpha_factor: BlendFactor::ZERO,
            alpha_op: BlendOp::ADD,
            write_mask: COLOR_WRITE_ALL,
        }
    }
}

impl BlendAttachment {
    /// Classic `src * a + dst * (1 - a)` blending.
    pub fn alpha_blending() -> Self {
        Self {
            blend_enable: Bool32::TRUE,
            src_color_factor: BlendFactor::SRC_ALPHA,
            dst_color_factor: BlendFactor::ONE_MINUS_SRC_ALPHA,
            src_alpha_factor: BlendFactor::ONE,
            dst_alpha_factor: BlendFactor::ONE_MINUS_SRC_ALPHA,
            ..Self::default()
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct OutputMergerState {
    pub logic_op_enable: Bool32,
    pub logic_op: LogicOp,
    pub attachments: [BlendAttachment; MAX_RENDER_TARGETS],
}

impl Default for OutputMergerState {
    fn default() -> Self {
        Self {
            logic_op_enable: Bool32::FALSE,
            logic_op: LogicOp::COPY,
            attachments: [BlendAttachment::default(); MAX_RENDER_TARGETS],
        }
    }
}

// ----------------------------------------------------------------------------
// State vector
// ----------------------------------------------------------------------------

/// Every piece of non-dynamic pipeline configuration.
///
/// Two state vectors are the same pipeline only if *every* field matches;
/// there is no partial matching anywhere in the crate.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct StateVector {
    pub input_assembly: InputAssemblyState,
    pub vertex_input: VertexInputState,
    pub rasterizer: RasterizerState,
    pub multisample: MultisampleState,
    pub depth_stencil: DepthStencilState,
    pub output_merger: OutputMergerState,
}

impl StateVector {
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    /// Hash of the raw layout; stable within one build.
    #[inline]
    pub fn hash64(&self) -> u64 {
        xxh3_64(self.as_bytes())
    }
}

impl Hash for StateVector {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash64());
    }
}

// ----------------------------------------------------------------------------
// Render-pass format
// ----------------------------------------------------------------------------

/// Attachment formats a pipeline is compiled against.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct RenderPassFormat {
    pub sample_count: u32,
    pub depth: Format,
    pub colors: [Format; MAX_RENDER_TARGETS],
}

impl Default for RenderPassFormat {
    fn default() -> Self {
        Self {
            sample_count: 1,
            depth: Format::UNDEFINED,
            colors: [Format::UNDEFINED; MAX_RENDER_TARGETS],
        }
    }
}

impl RenderPassFormat {
    /// Single colour target, optional depth.
    pub fn single(color: Format, depth: Format) -> Self {
        let mut format = Self {
            depth,
            ..Self::default()
        };
        format.colors[0] = color;
        format
    }

    pub fn with_color(mut self, index: usize, format: Format) -> Self {
        if index < MAX_RENDER_TARGETS {
            self.colors[index] = format;
        }
        self
    }

    /// Bit `i` is set if colour target `i` has a format.
    pub fn color_mask(&self) -> u32 {
        self.colors
            .iter()
            .enumerate()
            .filter(|(_, f)| f.is_defined())
            .fold(0, |mask, (i, _)| mask | (1 << i))
    }
}
