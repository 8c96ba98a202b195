//! Type system and the per-module type interner.
//!
//! Every [`Type`] lives in a [`TypeInterner`] owned by a [`Module`](crate::Module).
//! Structurally equal requests always produce the same [`Handle<Type>`], so
//! type equality anywhere else in the crate is plain handle comparison.
//! Struct types are nominal: they are keyed by name, which lets a struct be
//! declared first and given its members later (needed for self-referential
//! structs such as linked nodes that point at their own type).

use std::hash::{Hash, Hasher};

use crate::arena::{Handle, UniqueArena};
use crate::error::IrError;
use crate::global::StorageClass;

/// Width of a scalar type in bytes.
pub type Bytes = u8;

/// The kind of a scalar type.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum ScalarKind {
    /// Boolean.
    Bool,
    /// Signed integer.
    Sint,
    /// Unsigned integer.
    Uint,
    /// Floating point.
    Float,
}

/// A scalar type: kind + byte width.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Scalar {
    pub kind: ScalarKind,
    pub width: Bytes,
}

impl Scalar {
    pub const BOOL: Self = Self {
        kind: ScalarKind::Bool,
        width: 1,
    };
    pub const I32: Self = Self {
        kind: ScalarKind::Sint,
        width: 4,
    };
    pub const U32: Self = Self {
        kind: ScalarKind::Uint,
        width: 4,
    };
    pub const F32: Self = Self {
        kind: ScalarKind::Float,
        width: 4,
    };

    /// Returns `true` for signed and unsigned integers.
    pub fn is_integer(self) -> bool {
        matches!(self.kind, ScalarKind::Sint | ScalarKind::Uint)
    }

    /// Returns `true` for integers and floats.
    pub fn is_numeric(self) -> bool {
        self.kind != ScalarKind::Bool
    }

    fn is_supported(self) -> bool {
        match self.kind {
            ScalarKind::Bool => self.width == 1,
            _ => self.width == 4,
        }
    }
}

/// Number of components in a vector.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum VectorSize {
    /// 2 components.
    Bi = 2,
    /// 3 components.
    Tri = 3,
    /// 4 components.
    Quad = 4,
}

impl TryFrom<u32> for VectorSize {
    type Error = IrError;

    fn try_from(width: u32) -> Result<Self, IrError> {
        match width {
            2 => Ok(Self::Bi),
            3 => Ok(Self::Tri),
            4 => Ok(Self::Quad),
            _ => Err(IrError::InvalidType(format!(
                "vector width {width} is not one of 2, 3 or 4"
            ))),
        }
    }
}

/// Size of an array.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum ArraySize {
    /// Fixed-size array.
    Constant(u32),
    /// Runtime-sized array.
    Dynamic,
}

/// Access granted through a pointer, an access-controlled type or a
/// storage texture.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum AccessMode {
    Read,
    Write,
    ReadWrite,
}

impl AccessMode {
    pub fn can_read(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    pub fn can_write(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }

    /// Name used in canonical type names (`read_only`, `write_only`, `read_write`).
    pub fn canonical_name(self) -> &'static str {
        match self {
            Self::Read => "read_only",
            Self::Write => "write_only",
            Self::ReadWrite => "read_write",
        }
    }

    /// WGSL spelling (`read`, `write`, `read_write`).
    pub fn wgsl_name(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::ReadWrite => "read_write",
        }
    }
}

/// Dimensionality of a texture.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum TextureDimension {
    D1,
    D2,
    D2Array,
    D3,
    Cube,
    CubeArray,
}

impl TextureDimension {
    pub fn name(self) -> &'static str {
        match self {
            Self::D1 => "1d",
            Self::D2 => "2d",
            Self::D2Array => "2d_array",
            Self::D3 => "3d",
            Self::Cube => "cube",
            Self::CubeArray => "cube_array",
        }
    }

    pub fn is_arrayed(self) -> bool {
        matches!(self, Self::D2Array | Self::CubeArray)
    }
}

/// Texel format of a storage texture.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum StorageFormat {
    R32Uint,
    R32Sint,
    R32Float,
    Rg32Uint,
    Rg32Sint,
    Rg32Float,
    Rgba8Unorm,
    Rgba8Snorm,
    Rgba8Uint,
    Rgba8Sint,
    Rgba16Uint,
    Rgba16Sint,
    Rgba16Float,
    Rgba32Uint,
    Rgba32Sint,
    Rgba32Float,
}

impl StorageFormat {
    pub fn name(self) -> &'static str {
        match self {
            Self::R32Uint => "r32uint",
            Self::R32Sint => "r32sint",
            Self::R32Float => "r32float",
            Self::Rg32Uint => "rg32uint",
            Self::Rg32Sint => "rg32sint",
            Self::Rg32Float => "rg32float",
            Self::Rgba8Unorm => "rgba8unorm",
            Self::Rgba8Snorm => "rgba8snorm",
            Self::Rgba8Uint => "rgba8uint",
            Self::Rgba8Sint => "rgba8sint",
            Self::Rgba16Uint => "rgba16uint",
            Self::Rgba16Sint => "rgba16sint",
            Self::Rgba16Float => "rgba16float",
            Self::Rgba32Uint => "rgba32uint",
            Self::Rgba32Sint => "rgba32sint",
            Self::Rgba32Float => "rgba32float",
        }
    }

    /// Kind of the texel channels when read or written.
    pub fn channel_kind(self) -> ScalarKind {
        match self {
            Self::R32Uint | Self::Rg32Uint | Self::Rgba8Uint | Self::Rgba16Uint | Self::Rgba32Uint => {
                ScalarKind::Uint
            }
            Self::R32Sint | Self::Rg32Sint | Self::Rgba8Sint | Self::Rgba16Sint | Self::Rgba32Sint => {
                ScalarKind::Sint
            }
            _ => ScalarKind::Float,
        }
    }
}

/// What a texture holds and how it is accessed.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum TextureClass {
    /// Sampled texture with the given channel kind.
    Sampled {
        kind: ScalarKind,
        multisampled: bool,
    },
    /// Depth texture.
    Depth,
    /// Storage texture.
    Storage {
        format: StorageFormat,
        access: AccessMode,
    },
}

/// A member of a struct type.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct StructMember {
    pub name: String,
    pub ty: Handle<Type>,
    /// Byte offset from the start of the struct.
    pub offset: u32,
}

/// A nominal struct type.
///
/// Equality and hashing only look at `name`: the members are backfilled
/// after the struct has been declared.
#[derive(Clone, Debug)]
pub struct StructType {
    pub name: String,
    pub members: Vec<StructMember>,
    pub span: u32,
}

impl StructType {
    /// Returns `true` once the members have been provided.
    pub fn is_defined(&self) -> bool {
        !self.members.is_empty()
    }
}

impl PartialEq for StructType {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for StructType {}

impl Hash for StructType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

/// The concrete shape of a type.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub enum Type {
    /// The absence of a value (function results only).
    Void,
    /// A single scalar value.
    Scalar(Scalar),
    /// A vector of scalars.
    Vector { size: VectorSize, scalar: Scalar },
    /// A matrix of column vectors.
    Matrix {
        columns: VectorSize,
        rows: VectorSize,
        scalar: Scalar,
    },
    /// A fixed-size or runtime-sized array. The stride is derived from the
    /// element layout when the type is interned.
    Array {
        base: Handle<Type>,
        size: ArraySize,
        stride: u32,
    },
    /// A pointer to a value in a given storage class.
    Pointer {
        base: Handle<Type>,
        space: StorageClass,
        access: AccessMode,
    },
    /// A composite struct type.
    Struct(StructType),
    /// A texture handle.
    Texture {
        dim: TextureDimension,
        class: TextureClass,
    },
    /// A sampler handle.
    Sampler { comparison: bool },
    /// A type wrapped with an access mode (storage buffers).
    AccessControlled { base: Handle<Type>, access: AccessMode },
}

impl Type {
    /// Returns the scalar of a scalar or vector type.
    pub fn scalar(&self) -> Option<Scalar> {
        match *self {
            Self::Scalar(s) | Self::Vector { scalar: s, .. } => Some(s),
            _ => None,
        }
    }

    /// Returns the component count of a vector type.
    pub fn vector_size(&self) -> Option<VectorSize> {
        match *self {
            Self::Vector { size, .. } => Some(size),
            _ => None,
        }
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, Self::Pointer { .. })
    }
}

/// Size and alignment of a host-shareable type, in bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Layout {
    pub size: u32,
    pub align: u32,
}

fn round_up(align: u32, value: u32) -> Option<u32> {
    value.checked_next_multiple_of(align)
}

fn too_large(what: impl std::fmt::Display) -> IrError {
    IrError::InvalidType(format!("{what} is too large"))
}

/// Canonical registry of types for one module.
#[derive(Clone, Debug, Default)]
pub struct TypeInterner {
    arena: UniqueArena<Type>,
}

impl TypeInterner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle<Type>, &Type)> {
        self.arena.iter()
    }

    pub fn try_get(&self, handle: Handle<Type>) -> Option<&Type> {
        self.arena.try_get(handle)
    }

    /// Returns the handle of an already interned type equal to `ty`.
    pub fn lookup(&self, ty: &Type) -> Option<Handle<Type>> {
        self.arena.get(ty)
    }

    fn check(&self, handle: Handle<Type>) -> Result<&Type, IrError> {
        self.arena.try_get(handle).ok_or(IrError::BadHandle {
            index: handle.index(),
            size: self.arena.len(),
        })
    }

    /// Returns the handle for `ty`, creating it if no equal type exists.
    ///
    /// Array strides are recomputed from the element layout, and struct
    /// types must go through [`declare_struct`](Self::declare_struct).
    pub fn intern(&mut self, ty: Type) -> Result<Handle<Type>, IrError> {
        let ty = self.normalize(ty)?;
        if let Some(existing) = self.arena.get(&ty) {
            return Ok(existing);
        }
        self.validate(&ty)?;
        let handle = self.arena.insert(ty);
        log::debug!("interned type {}", self.type_name(handle));
        Ok(handle)
    }

    fn normalize(&self, ty: Type) -> Result<Type, IrError> {
        Ok(match ty {
            Type::Array { base, size, .. } => {
                self.check(base)?;
                let layout = self.layout(base).ok_or_else(|| {
                    IrError::InvalidType(format!(
                        "array element type {} has no fixed size",
                        self.type_name(base)
                    ))
                })?;
                let stride = round_up(layout.align, layout.size)
                    .ok_or_else(|| too_large(format!("array of {}", self.type_name(base))))?;
                Type::Array { base, size, stride }
            }
            Type::Struct(ref st) if self.arena.get(&ty).is_none() => {
                return Err(IrError::InvalidType(format!(
                    "struct `{}` must be declared before use",
                    st.name
                )));
            }
            other => other,
        })
    }

    fn validate(&self, ty: &Type) -> Result<(), IrError> {
        match *ty {
            Type::Void | Type::Sampler { .. } => Ok(()),
            Type::Scalar(s) | Type::Vector { scalar: s, .. } => {
                if s.is_supported() {
                    Ok(())
                } else {
                    Err(IrError::InvalidType(format!(
                        "unsupported scalar width {} bytes",
                        s.width
                    )))
                }
            }
            Type::Matrix { scalar, .. } => {
                if scalar == Scalar::F32 {
                    Ok(())
                } else {
                    Err(IrError::InvalidType(
                        "matrix components must be f32".into(),
                    ))
                }
            }
            Type::Array { base, size, stride } => {
                if size == ArraySize::Constant(0) {
                    return Err(IrError::InvalidType("array length must be non-zero".into()));
                }
                if let ArraySize::Constant(n) = size
                    && n.checked_mul(stride).is_none()
                {
                    return Err(too_large(format!(
                        "array<{}, {n}>",
                        self.type_name(base)
                    )));
                }
                match *self.check(base)? {
                    Type::Void
                    | Type::Pointer { .. }
                    | Type::Texture { .. }
                    | Type::Sampler { .. } => Err(IrError::InvalidType(format!(
                        "arrays of {} are not allowed",
                        self.type_name(base)
                    ))),
                    Type::Array {
                        size: ArraySize::Dynamic,
                        ..
                    } => Err(IrError::InvalidType(
                        "arrays of runtime-sized arrays are not allowed".into(),
                    )),
                    _ => Ok(()),
                }
            }
            Type::Pointer { base, .. } => match *self.check(base)? {
                Type::Void => Err(IrError::InvalidType("pointer to void".into())),
                Type::Pointer { .. } => {
                    Err(IrError::InvalidType("pointer to pointer".into()))
                }
                Type::AccessControlled { .. } => Err(IrError::InvalidType(
                    "pointers carry access modes directly".into(),
                )),
                _ => Ok(()),
            },
            Type::Struct(_) => Ok(()),
            Type::Texture { class, .. } => match class {
                TextureClass::Sampled {
                    kind: ScalarKind::Bool,
                    ..
                } => Err(IrError::InvalidType(
                    "sampled textures cannot hold bool".into(),
                )),
                _ => Ok(()),
            },
            Type::AccessControlled { base, .. } => match *self.check(base)? {
                Type::Void => Err(IrError::InvalidType("access control on void".into())),
                Type::AccessControlled { .. } => Err(IrError::InvalidType(
                    "nested access control".into(),
                )),
                _ => Ok(()),
            },
        }
    }

    pub fn void(&mut self) -> Handle<Type> {
        self.arena.insert(Type::Void)
    }

    pub fn bool(&mut self) -> Handle<Type> {
        self.arena.insert(Type::Scalar(Scalar::BOOL))
    }

    pub fn i32(&mut self) -> Handle<Type> {
        self.arena.insert(Type::Scalar(Scalar::I32))
    }

    pub fn u32(&mut self) -> Handle<Type> {
        self.arena.insert(Type::Scalar(Scalar::U32))
    }

    pub fn f32(&mut self) -> Handle<Type> {
        self.arena.insert(Type::Scalar(Scalar::F32))
    }

    pub fn scalar(&mut self, scalar: Scalar) -> Result<Handle<Type>, IrError> {
        self.intern(Type::Scalar(scalar))
    }

    /// `vecN<scalar>`; fails with `InvalidType` unless `width` is 2, 3 or 4.
    pub fn vector(&mut self, scalar: Scalar, width: u32) -> Result<Handle<Type>, IrError> {
        let size = VectorSize::try_from(width)?;
        self.intern(Type::Vector { size, scalar })
    }

    /// `matCxR<f32>`.
    pub fn matrix(&mut self, columns: u32, rows: u32) -> Result<Handle<Type>, IrError> {
        self.intern(Type::Matrix {
            columns: VectorSize::try_from(columns)?,
            rows: VectorSize::try_from(rows)?,
            scalar: Scalar::F32,
        })
    }

    /// `array<base, count>`, or a runtime-sized array when `count` is `None`.
    pub fn array(
        &mut self,
        base: Handle<Type>,
        count: Option<u32>,
    ) -> Result<Handle<Type>, IrError> {
        let size = match count {
            Some(n) => ArraySize::Constant(n),
            None => ArraySize::Dynamic,
        };
        self.intern(Type::Array {
            base,
            size,
            stride: 0,
        })
    }

    /// Pointer with the storage class's default access. An access-controlled
    /// pointee is unwrapped and its access mode moves onto the pointer.
    pub fn pointer(
        &mut self,
        base: Handle<Type>,
        space: StorageClass,
    ) -> Result<Handle<Type>, IrError> {
        match *self.check(base)? {
            Type::AccessControlled { base: inner, access } => {
                self.pointer_with_access(inner, space, access)
            }
            _ => self.pointer_with_access(base, space, space.default_access()),
        }
    }

    pub fn pointer_with_access(
        &mut self,
        base: Handle<Type>,
        space: StorageClass,
        access: AccessMode,
    ) -> Result<Handle<Type>, IrError> {
        self.intern(Type::Pointer {
            base,
            space,
            access,
        })
    }

    pub fn sampler(&mut self, comparison: bool) -> Handle<Type> {
        self.arena.insert(Type::Sampler { comparison })
    }

    pub fn texture(
        &mut self,
        dim: TextureDimension,
        class: TextureClass,
    ) -> Result<Handle<Type>, IrError> {
        self.intern(Type::Texture { dim, class })
    }

    pub fn access_controlled(
        &mut self,
        base: Handle<Type>,
        access: AccessMode,
    ) -> Result<Handle<Type>, IrError> {
        self.intern(Type::AccessControlled { base, access })
    }

    /// Reserves the nominal slot for struct `name`. Declaring the same name
    /// twice returns the same handle.
    pub fn declare_struct(&mut self, name: &str) -> Result<Handle<Type>, IrError> {
        if name.is_empty() {
            return Err(IrError::InvalidType("struct name must not be empty".into()));
        }
        let (handle, fresh) = self.arena.insert_full(Type::Struct(StructType {
            name: name.to_string(),
            members: Vec::new(),
            span: 0,
        }));
        if fresh {
            log::debug!("declared struct `{name}`");
        }
        Ok(handle)
    }

    /// Backfills the members of a declared struct.
    pub fn define_struct(
        &mut self,
        handle: Handle<Type>,
        members: Vec<StructMember>,
    ) -> Result<(), IrError> {
        let name = match self.check(handle)? {
            Type::Struct(st) if st.is_defined() => {
                return Err(IrError::InvalidType(format!(
                    "struct `{}` is already defined",
                    st.name
                )));
            }
            Type::Struct(st) => st.name.clone(),
            _ => {
                return Err(IrError::InvalidType(format!(
                    "{} is not a struct",
                    self.type_name(handle)
                )));
            }
        };
        if members.is_empty() {
            return Err(IrError::InvalidType(format!(
                "struct `{name}` must have at least one member"
            )));
        }

        let mut prev_end: Option<u32> = None;
        let mut align = 1;
        for (i, member) in members.iter().enumerate() {
            if member.name.is_empty() {
                return Err(IrError::InvalidType(format!(
                    "struct `{name}` member {i} has no name"
                )));
            }
            if members[..i].iter().any(|m| m.name == member.name) {
                return Err(IrError::InvalidType(format!(
                    "struct `{name}` has duplicate member `{}`",
                    member.name
                )));
            }
            let member_ty = self.check(member.ty)?;
            if matches!(member_ty, Type::Void) {
                return Err(IrError::InvalidType(format!(
                    "struct `{name}` member `{}` is void",
                    member.name
                )));
            }
            if self.contains_by_value(member.ty, handle) {
                return Err(IrError::InvalidType(format!(
                    "struct `{name}` contains itself through member `{}`",
                    member.name
                )));
            }
            let is_last = i + 1 == members.len();
            if !is_last
                && matches!(
                    member_ty,
                    Type::Array {
                        size: ArraySize::Dynamic,
                        ..
                    }
                )
            {
                return Err(IrError::InvalidType(format!(
                    "runtime-sized member `{}` must be the last member of `{name}`",
                    member.name
                )));
            }
            if let Some(end) = prev_end
                && member.offset < end
            {
                return Err(IrError::InvalidType(format!(
                    "member `{}` of `{name}` at offset {} overlaps the previous member",
                    member.name, member.offset
                )));
            }
            match self.layout(member.ty) {
                Some(layout) => {
                    if member.offset % layout.align != 0 {
                        return Err(IrError::InvalidType(format!(
                            "member `{}` of `{name}` at offset {} is not {}-byte aligned",
                            member.name, member.offset, layout.align
                        )));
                    }
                    align = align.max(layout.align);
                    let end = member.offset.checked_add(layout.size).ok_or_else(|| {
                        too_large(format!("member `{}` of `{name}`", member.name))
                    })?;
                    prev_end = Some(end);
                }
                None => {
                    if let Some(element_align) = self.element_align(member.ty) {
                        align = align.max(element_align);
                    }
                    prev_end = Some(member.offset);
                }
            }
        }

        let last_end = prev_end.unwrap_or(0);
        let span =
            round_up(align, last_end).ok_or_else(|| too_large(format!("struct `{name}`")))?;
        if let Type::Struct(st) = self.arena.get_mut(handle) {
            st.members = members;
            st.span = span;
        }
        log::debug!("defined struct `{name}` (span {span})");
        Ok(())
    }

    /// Assigns offsets to `members` using the host-shareable layout rules.
    pub fn layout_members(
        &self,
        members: Vec<(String, Handle<Type>)>,
    ) -> Result<Vec<StructMember>, IrError> {
        let mut offset = 0;
        let mut out = Vec::with_capacity(members.len());
        for (name, ty) in members {
            let (size, align) = match self.layout(ty) {
                Some(layout) => (layout.size, layout.align),
                None => match self.element_align(ty) {
                    Some(align) => (0, align),
                    None => {
                        return Err(IrError::InvalidType(format!(
                            "member `{name}` of type {} has no layout",
                            self.type_name(ty)
                        )));
                    }
                },
            };
            let overflow = || too_large(format!("member `{name}`"));
            let start = round_up(align, offset).ok_or_else(overflow)?;
            offset = start.checked_add(size).ok_or_else(overflow)?;
            out.push(StructMember {
                name,
                ty,
                offset: start,
            });
        }
        Ok(out)
    }

    fn element_align(&self, ty: Handle<Type>) -> Option<u32> {
        match self.arena[ty] {
            Type::Array {
                base,
                size: ArraySize::Dynamic,
                ..
            } => self.layout(base).map(|l| l.align),
            _ => None,
        }
    }

    fn contains_by_value(&self, ty: Handle<Type>, needle: Handle<Type>) -> bool {
        if ty == needle {
            return true;
        }
        match &self.arena[ty] {
            Type::Array { base, .. } | Type::AccessControlled { base, .. } => {
                self.contains_by_value(*base, needle)
            }
            Type::Struct(st) => st
                .members
                .iter()
                .any(|m| self.contains_by_value(m.ty, needle)),
            _ => false,
        }
    }

    /// Host-shareable size and alignment, or `None` for unsized and opaque
    /// types.
    pub fn layout(&self, ty: Handle<Type>) -> Option<Layout> {
        match self.arena.try_get(ty)? {
            Type::Void
            | Type::Pointer { .. }
            | Type::Texture { .. }
            | Type::Sampler { .. } => None,
            Type::Scalar(_) => Some(Layout { size: 4, align: 4 }),
            Type::Vector { size, .. } => Some(vector_layout(*size)),
            Type::Matrix { columns, rows, .. } => {
                let column = vector_layout(*rows);
                Some(Layout {
                    size: (*columns as u32).checked_mul(round_up(column.align, column.size)?)?,
                    align: column.align,
                })
            }
            Type::Array {
                base,
                size: ArraySize::Constant(n),
                stride,
            } => Some(Layout {
                size: n.checked_mul(*stride)?,
                align: self.layout(*base)?.align,
            }),
            Type::Array {
                size: ArraySize::Dynamic,
                ..
            } => None,
            Type::Struct(st) => {
                if !st.is_defined() {
                    return None;
                }
                let mut align = 1;
                for member in &st.members {
                    align = align.max(self.layout(member.ty)?.align);
                }
                Some(Layout {
                    size: st.span,
                    align,
                })
            }
            Type::AccessControlled { base, .. } => self.layout(*base),
        }
    }

    /// Removes an access-control wrapper, if any.
    pub fn strip_access(&self, ty: Handle<Type>) -> Handle<Type> {
        match self.arena[ty] {
            Type::AccessControlled { base, .. } => base,
            _ => ty,
        }
    }

    /// Returns `true` for types that can be built with a constructor or a
    /// zero value: scalars, vectors, matrices, fixed arrays and structs of
    /// those.
    pub fn is_constructible(&self, ty: Handle<Type>) -> bool {
        match &self.arena[ty] {
            Type::Scalar(_) | Type::Vector { .. } | Type::Matrix { .. } => true,
            Type::Array {
                base,
                size: ArraySize::Constant(_),
                ..
            } => self.is_constructible(*base),
            Type::Struct(st) => {
                st.is_defined() && st.members.iter().all(|m| self.is_constructible(m.ty))
            }
            _ => false,
        }
    }

    /// Canonical, structure-derived type name (`__vec_3__f32`, ...).
    pub fn type_name(&self, ty: Handle<Type>) -> String {
        let Some(inner) = self.arena.try_get(ty) else {
            return format!("__invalid{ty:?}");
        };
        match inner {
            Type::Void => "__void".into(),
            Type::Scalar(s) => format!("__{s}"),
            Type::Vector { size, scalar } => format!("__vec_{}__{scalar}", *size as u32),
            Type::Matrix {
                columns,
                rows,
                scalar,
            } => format!("__mat_{}_{}__{scalar}", *rows as u32, *columns as u32),
            Type::Array { base, size, .. } => match size {
                ArraySize::Constant(n) => format!("__array{}_{n}", self.type_name(*base)),
                ArraySize::Dynamic => format!("__array{}", self.type_name(*base)),
            },
            Type::Pointer {
                base,
                space,
                access,
            } => {
                let mut name = format!("__ptr_{}{}", space.name(), self.type_name(*base));
                if *access != space.default_access() {
                    name.push('_');
                    name.push_str(access.canonical_name());
                }
                name
            }
            Type::Struct(st) => format!("__struct_{}", st.name),
            Type::Texture { dim, class } => match class {
                TextureClass::Sampled {
                    kind,
                    multisampled: false,
                } => format!("__sampled_texture_{}__{}", dim.name(), kind_name(*kind)),
                TextureClass::Sampled {
                    kind,
                    multisampled: true,
                } => format!("__multisampled_texture_{}__{}", dim.name(), kind_name(*kind)),
                TextureClass::Depth => format!("__depth_texture_{}", dim.name()),
                TextureClass::Storage { format, access } => format!(
                    "__storage_texture_{}_{}_{}",
                    access.canonical_name(),
                    dim.name(),
                    format.name()
                ),
            },
            Type::Sampler { comparison: false } => "__sampler_sampler".into(),
            Type::Sampler { comparison: true } => "__sampler_comparison".into(),
            Type::AccessControlled { base, access } => format!(
                "__access_control_{}{}",
                access.canonical_name(),
                self.type_name(*base)
            ),
        }
    }

    /// WGSL spelling of a type (`vec3<f32>`, `array<f32, 4>`, ...).
    pub fn wgsl_name(&self, ty: Handle<Type>) -> String {
        match &self.arena[ty] {
            Type::Void => "void".into(),
            Type::Scalar(s) => s.to_string(),
            Type::Vector { size, scalar } => format!("vec{}<{scalar}>", *size as u32),
            Type::Matrix {
                columns,
                rows,
                scalar,
            } => format!("mat{}x{}<{scalar}>", *columns as u32, *rows as u32),
            Type::Array { base, size, .. } => match size {
                ArraySize::Constant(n) => format!("array<{}, {n}>", self.wgsl_name(*base)),
                ArraySize::Dynamic => format!("array<{}>", self.wgsl_name(*base)),
            },
            Type::Pointer {
                base,
                space,
                access,
            } => match space {
                StorageClass::Storage => format!(
                    "ptr<storage, {}, {}>",
                    self.wgsl_name(*base),
                    access.wgsl_name()
                ),
                _ => format!("ptr<{}, {}>", space.wgsl_name(), self.wgsl_name(*base)),
            },
            Type::Struct(st) => st.name.clone(),
            Type::Texture { dim, class } => match class {
                TextureClass::Sampled {
                    kind,
                    multisampled: false,
                } => format!("texture_{}<{}>", dim.name(), wgsl_kind_name(*kind)),
                TextureClass::Sampled {
                    kind,
                    multisampled: true,
                } => format!(
                    "texture_multisampled_{}<{}>",
                    dim.name(),
                    wgsl_kind_name(*kind)
                ),
                TextureClass::Depth => format!("texture_depth_{}", dim.name()),
                TextureClass::Storage { format, access } => format!(
                    "texture_storage_{}<{}, {}>",
                    dim.name(),
                    format.name(),
                    access.wgsl_name()
                ),
            },
            Type::Sampler { comparison: false } => "sampler".into(),
            Type::Sampler { comparison: true } => "sampler_comparison".into(),
            Type::AccessControlled { base, .. } => self.wgsl_name(*base),
        }
    }
}

impl std::ops::Index<Handle<Type>> for TypeInterner {
    type Output = Type;

    fn index(&self, handle: Handle<Type>) -> &Type {
        &self.arena[handle]
    }
}

fn vector_layout(size: VectorSize) -> Layout {
    match size {
        VectorSize::Bi => Layout { size: 8, align: 8 },
        VectorSize::Tri => Layout {
            size: 12,
            align: 16,
        },
        VectorSize::Quad => Layout {
            size: 16,
            align: 16,
        },
    }
}

fn kind_name(kind: ScalarKind) -> &'static str {
    match kind {
        ScalarKind::Bool => "bool",
        ScalarKind::Sint => "i32",
        ScalarKind::Uint => "u32",
        ScalarKind::Float => "f32",
    }
}

fn wgsl_kind_name(kind: ScalarKind) -> &'static str {
    kind_name(kind)
}
