//! Enum correspondences shared by the writer and the reader.

use rspirv::spirv;
use spindle_ir::{BuiltIn, MathFunction, ScalarKind, StorageClass, StorageFormat, TextureDimension};

pub(crate) const GLSL_STD_450: &str = "GLSL.std.450";

pub(crate) fn storage_class(space: StorageClass) -> spirv::StorageClass {
    match space {
        StorageClass::Function => spirv::StorageClass::Function,
        StorageClass::Private => spirv::StorageClass::Private,
        StorageClass::Workgroup => spirv::StorageClass::Workgroup,
        StorageClass::Uniform => spirv::StorageClass::Uniform,
        StorageClass::Storage => spirv::StorageClass::StorageBuffer,
        StorageClass::Input => spirv::StorageClass::Input,
        StorageClass::Output => spirv::StorageClass::Output,
        StorageClass::Handle => spirv::StorageClass::UniformConstant,
    }
}

pub(crate) fn storage_class_from(class: spirv::StorageClass) -> Option<StorageClass> {
    Some(match class {
        spirv::StorageClass::Function => StorageClass::Function,
        spirv::StorageClass::Private => StorageClass::Private,
        spirv::StorageClass::Workgroup => StorageClass::Workgroup,
        spirv::StorageClass::Uniform => StorageClass::Uniform,
        spirv::StorageClass::StorageBuffer => StorageClass::Storage,
        spirv::StorageClass::Input => StorageClass::Input,
        spirv::StorageClass::Output => StorageClass::Output,
        spirv::StorageClass::UniformConstant => StorageClass::Handle,
        _ => return None,
    })
}

/// `position` read by a fragment shader is `FragCoord` in SPIR-V.
pub(crate) fn builtin(builtin: BuiltIn, space: StorageClass) -> spirv::BuiltIn {
    match builtin {
        BuiltIn::Position if space == StorageClass::Input => spirv::BuiltIn::FragCoord,
        BuiltIn::Position => spirv::BuiltIn::Position,
        BuiltIn::VertexIndex => spirv::BuiltIn::VertexIndex,
        BuiltIn::InstanceIndex => spirv::BuiltIn::InstanceIndex,
        BuiltIn::FrontFacing => spirv::BuiltIn::FrontFacing,
        BuiltIn::FragDepth => spirv::BuiltIn::FragDepth,
        BuiltIn::SampleIndex => spirv::BuiltIn::SampleId,
        BuiltIn::SampleMask => spirv::BuiltIn::SampleMask,
        BuiltIn::GlobalInvocationId => spirv::BuiltIn::GlobalInvocationId,
        BuiltIn::LocalInvocationId => spirv::BuiltIn::LocalInvocationId,
        BuiltIn::LocalInvocationIndex => spirv::BuiltIn::LocalInvocationIndex,
        BuiltIn::WorkgroupId => spirv::BuiltIn::WorkgroupId,
        BuiltIn::NumWorkgroups => spirv::BuiltIn::NumWorkgroups,
    }
}

pub(crate) fn builtin_from(builtin: spirv::BuiltIn) -> Option<BuiltIn> {
    Some(match builtin {
        spirv::BuiltIn::Position | spirv::BuiltIn::FragCoord => BuiltIn::Position,
        spirv::BuiltIn::VertexIndex => BuiltIn::VertexIndex,
        spirv::BuiltIn::InstanceIndex => BuiltIn::InstanceIndex,
        spirv::BuiltIn::FrontFacing => BuiltIn::FrontFacing,
        spirv::BuiltIn::FragDepth => BuiltIn::FragDepth,
        spirv::BuiltIn::SampleId => BuiltIn::SampleIndex,
        spirv::BuiltIn::SampleMask => BuiltIn::SampleMask,
        spirv::BuiltIn::GlobalInvocationId => BuiltIn::GlobalInvocationId,
        spirv::BuiltIn::LocalInvocationId => BuiltIn::LocalInvocationId,
        spirv::BuiltIn::LocalInvocationIndex => BuiltIn::LocalInvocationIndex,
        spirv::BuiltIn::WorkgroupId => BuiltIn::WorkgroupId,
        spirv::BuiltIn::NumWorkgroups => BuiltIn::NumWorkgroups,
        _ => return None,
    })
}

pub(crate) fn dim(dim: TextureDimension) -> spirv::Dim {
    match dim {
        TextureDimension::D1 => spirv::Dim::Dim1D,
        TextureDimension::D2 | TextureDimension::D2Array => spirv::Dim::Dim2D,
        TextureDimension::D3 => spirv::Dim::Dim3D,
        TextureDimension::Cube | TextureDimension::CubeArray => spirv::Dim::DimCube,
    }
}

pub(crate) fn texture_dimension(dim: spirv::Dim, arrayed: bool) -> Option<TextureDimension> {
    Some(match (dim, arrayed) {
        (spirv::Dim::Dim1D, false) => TextureDimension::D1,
        (spirv::Dim::Dim2D, false) => TextureDimension::D2,
        (spirv::Dim::Dim2D, true) => TextureDimension::D2Array,
        (spirv::Dim::Dim3D, false) => TextureDimension::D3,
        (spirv::Dim::DimCube, false) => TextureDimension::Cube,
        (spirv::Dim::DimCube, true) => TextureDimension::CubeArray,
        _ => return None,
    })
}

const FORMATS: [(StorageFormat, spirv::ImageFormat); 16] = [
    (StorageFormat::R32Uint, spirv::ImageFormat::R32ui),
    (StorageFormat::R32Sint, spirv::ImageFormat::R32i),
    (StorageFormat::R32Float, spirv::ImageFormat::R32f),
    (StorageFormat::Rg32Uint, spirv::ImageFormat::Rg32ui),
    (StorageFormat::Rg32Sint, spirv::ImageFormat::Rg32i),
    (StorageFormat::Rg32Float, spirv::ImageFormat::Rg32f),
    (StorageFormat::Rgba8Unorm, spirv::ImageFormat::Rgba8),
    (StorageFormat::Rgba8Snorm, spirv::ImageFormat::Rgba8Snorm),
    (StorageFormat::Rgba8Uint, spirv::ImageFormat::Rgba8ui),
    (StorageFormat::Rgba8Sint, spirv::ImageFormat::Rgba8i),
    (StorageFormat::Rgba16Uint, spirv::ImageFormat::Rgba16ui),
    (StorageFormat::Rgba16Sint, spirv::ImageFormat::Rgba16i),
    (StorageFormat::Rgba16Float, spirv::ImageFormat::Rgba16f),
    (StorageFormat::Rgba32Uint, spirv::ImageFormat::Rgba32ui),
    (StorageFormat::Rgba32Sint, spirv::ImageFormat::Rgba32i),
    (StorageFormat::Rgba32Float, spirv::ImageFormat::Rgba32f),
];

pub(crate) fn image_format(format: StorageFormat) -> spirv::ImageFormat {
    FORMATS
        .iter()
        .find(|(f, _)| *f == format)
        .map_or(spirv::ImageFormat::Unknown, |(_, spv)| *spv)
}

pub(crate) fn storage_format_from(format: spirv::ImageFormat) -> Option<StorageFormat> {
    FORMATS
        .iter()
        .find(|(_, spv)| *spv == format)
        .map(|(f, _)| *f)
}

/// Formats that need `StorageImageExtendedFormats`.
pub(crate) fn is_extended_format(format: StorageFormat) -> bool {
    matches!(
        format,
        StorageFormat::Rg32Uint | StorageFormat::Rg32Sint | StorageFormat::Rg32Float
    )
}

// ---- GLSL.std.450 ---------------------------------------------------------------------------

pub(crate) mod glsl {
    pub const ROUND_EVEN: u32 = 2;
    pub const TRUNC: u32 = 3;
    pub const F_ABS: u32 = 4;
    pub const S_ABS: u32 = 5;
    pub const FLOOR: u32 = 8;
    pub const CEIL: u32 = 9;
    pub const FRACT: u32 = 10;
    pub const SIN: u32 = 13;
    pub const COS: u32 = 14;
    pub const TAN: u32 = 15;
    pub const ASIN: u32 = 16;
    pub const ACOS: u32 = 17;
    pub const ATAN: u32 = 18;
    pub const SINH: u32 = 19;
    pub const COSH: u32 = 20;
    pub const TANH: u32 = 21;
    pub const ATAN2: u32 = 25;
    pub const POW: u32 = 26;
    pub const EXP: u32 = 27;
    pub const LOG: u32 = 28;
    pub const EXP2: u32 = 29;
    pub const LOG2: u32 = 30;
    pub const SQRT: u32 = 31;
    pub const INVERSE_SQRT: u32 = 32;
    pub const F_MIN: u32 = 37;
    pub const U_MIN: u32 = 38;
    pub const S_MIN: u32 = 39;
    pub const F_MAX: u32 = 40;
    pub const U_MAX: u32 = 41;
    pub const S_MAX: u32 = 42;
    pub const F_CLAMP: u32 = 43;
    pub const U_CLAMP: u32 = 44;
    pub const S_CLAMP: u32 = 45;
    pub const F_MIX: u32 = 46;
    pub const STEP: u32 = 48;
    pub const SMOOTH_STEP: u32 = 49;
    pub const FMA: u32 = 50;
    pub const LENGTH: u32 = 66;
    pub const DISTANCE: u32 = 67;
    pub const CROSS: u32 = 68;
    pub const NORMALIZE: u32 = 69;
}

/// Extended instruction implementing `fun` on operands of `kind`. `dot`
/// is a core instruction and has none.
pub(crate) fn glsl_instruction(fun: MathFunction, kind: ScalarKind) -> Option<u32> {
    use MathFunction as M;
    let by_kind = |float, sint, uint| match kind {
        ScalarKind::Float => Some(float),
        ScalarKind::Sint => Some(sint),
        ScalarKind::Uint => Some(uint),
        ScalarKind::Bool => None,
    };
    match fun {
        M::Abs => match kind {
            ScalarKind::Float => Some(glsl::F_ABS),
            ScalarKind::Sint => Some(glsl::S_ABS),
            _ => None,
        },
        M::Min => by_kind(glsl::F_MIN, glsl::S_MIN, glsl::U_MIN),
        M::Max => by_kind(glsl::F_MAX, glsl::S_MAX, glsl::U_MAX),
        M::Clamp => by_kind(glsl::F_CLAMP, glsl::S_CLAMP, glsl::U_CLAMP),
        M::Floor => Some(glsl::FLOOR),
        M::Ceil => Some(glsl::CEIL),
        M::Round => Some(glsl::ROUND_EVEN),
        M::Fract => Some(glsl::FRACT),
        M::Trunc => Some(glsl::TRUNC),
        M::Sin => Some(glsl::SIN),
        M::Cos => Some(glsl::COS),
        M::Tan => Some(glsl::TAN),
        M::Asin => Some(glsl::ASIN),
        M::Acos => Some(glsl::ACOS),
        M::Atan => Some(glsl::ATAN),
        M::Atan2 => Some(glsl::ATAN2),
        M::Sinh => Some(glsl::SINH),
        M::Cosh => Some(glsl::COSH),
        M::Tanh => Some(glsl::TANH),
        M::Sqrt => Some(glsl::SQRT),
        M::InverseSqrt => Some(glsl::INVERSE_SQRT),
        M::Log => Some(glsl::LOG),
        M::Log2 => Some(glsl::LOG2),
        M::Exp => Some(glsl::EXP),
        M::Exp2 => Some(glsl::EXP2),
        M::Pow => Some(glsl::POW),
        M::Dot => None,
        M::Cross => Some(glsl::CROSS),
        M::Normalize => Some(glsl::NORMALIZE),
        M::Length => Some(glsl::LENGTH),
        M::Distance => Some(glsl::DISTANCE),
        M::Mix => Some(glsl::F_MIX),
        M::Step => Some(glsl::STEP),
        M::SmoothStep => Some(glsl::SMOOTH_STEP),
        M::Fma => Some(glsl::FMA),
    }
}

pub(crate) fn math_from_glsl(instruction: u32) -> Option<MathFunction> {
    use MathFunction as M;
    Some(match instruction {
        glsl::F_ABS | glsl::S_ABS => M::Abs,
        glsl::F_MIN | glsl::S_MIN | glsl::U_MIN => M::Min,
        glsl::F_MAX | glsl::S_MAX | glsl::U_MAX => M::Max,
        glsl::F_CLAMP | glsl::S_CLAMP | glsl::U_CLAMP => M::Clamp,
        glsl::FLOOR => M::Floor,
        glsl::CEIL => M::Ceil,
        glsl::ROUND_EVEN => M::Round,
        glsl::FRACT => M::Fract,
        glsl::TRUNC => M::Trunc,
        glsl::SIN => M::Sin,
        glsl::COS => M::Cos,
        glsl::TAN => M::Tan,
        glsl::ASIN => M::Asin,
        glsl::ACOS => M::Acos,
        glsl::ATAN => M::Atan,
        glsl::ATAN2 => M::Atan2,
        glsl::SINH => M::Sinh,
        glsl::COSH => M::Cosh,
        glsl::TANH => M::Tanh,
        glsl::SQRT => M::Sqrt,
        glsl::INVERSE_SQRT => M::InverseSqrt,
        glsl::LOG => M::Log,
        glsl::LOG2 => M::Log2,
        glsl::EXP => M::Exp,
        glsl::EXP2 => M::Exp2,
        glsl::POW => M::Pow,
        glsl::CROSS => M::Cross,
        glsl::NORMALIZE => M::Normalize,
        glsl::LENGTH => M::Length,
        glsl::DISTANCE => M::Distance,
        glsl::F_MIX => M::Mix,
        glsl::STEP => M::Step,
        glsl::SMOOTH_STEP => M::SmoothStep,
        glsl::FMA => M::Fma,
        _ => return None,
    })
}
