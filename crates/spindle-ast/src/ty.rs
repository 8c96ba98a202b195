//! Type expressions as written in source.

use spindle_ir::{AccessMode, ScalarKind, StorageClass, StorageFormat, TextureDimension};

use crate::symbol::{Symbol, SymbolTable};

/// A type as spelled in the program. Named types refer to struct
/// declarations and are resolved during lowering.
#[derive(Clone, Debug, PartialEq)]
pub enum TypeDecl {
    Void,
    Bool,
    I32,
    U32,
    F32,
    Vector {
        size: u32,
        element: Box<TypeDecl>,
    },
    /// Matrix of `f32` columns.
    Matrix {
        columns: u32,
        rows: u32,
    },
    Array {
        element: Box<TypeDecl>,
        /// `None` for a runtime-sized array.
        count: Option<u32>,
    },
    Pointer {
        base: Box<TypeDecl>,
        class: StorageClass,
    },
    Named(Symbol),
    Sampler {
        comparison: bool,
    },
    SampledTexture {
        dim: TextureDimension,
        kind: ScalarKind,
    },
    MultisampledTexture {
        dim: TextureDimension,
        kind: ScalarKind,
    },
    DepthTexture {
        dim: TextureDimension,
    },
    StorageTexture {
        dim: TextureDimension,
        format: StorageFormat,
        access: AccessMode,
    },
    AccessControl {
        access: AccessMode,
        base: Box<TypeDecl>,
    },
}

impl TypeDecl {
    pub fn vector(size: u32, element: TypeDecl) -> Self {
        Self::Vector {
            size,
            element: Box::new(element),
        }
    }

    pub fn array(element: TypeDecl, count: Option<u32>) -> Self {
        Self::Array {
            element: Box::new(element),
            count,
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, Self::Bool | Self::I32 | Self::U32 | Self::F32)
    }

    /// Structural well-formedness, without resolving names.
    pub fn is_valid(&self) -> bool {
        match self {
            Self::Vector { size, element } => (2..=4).contains(size) && element.is_scalar(),
            Self::Matrix { columns, rows } => (2..=4).contains(columns) && (2..=4).contains(rows),
            Self::Array { element, count } => {
                count.is_none_or(|n| n > 0)
                    && !matches!(**element, Self::Void | Self::Pointer { .. })
                    && element.is_valid()
            }
            Self::Pointer { base, .. } => !matches!(**base, Self::Void) && base.is_valid(),
            Self::SampledTexture { kind, .. } | Self::MultisampledTexture { kind, .. } => {
                *kind != ScalarKind::Bool
            }
            Self::DepthTexture { dim } => !matches!(dim, TextureDimension::D1 | TextureDimension::D3),
            Self::AccessControl { base, .. } => !matches!(**base, Self::Void) && base.is_valid(),
            _ => true,
        }
    }

    /// Canonical name, matching the IR type names.
    pub fn to_str(&self, symbols: &SymbolTable) -> String {
        match self {
            Self::Void => "__void".into(),
            Self::Bool => "__bool".into(),
            Self::I32 => "__i32".into(),
            Self::U32 => "__u32".into(),
            Self::F32 => "__f32".into(),
            Self::Vector { size, element } => format!("__vec_{size}{}", element.to_str(symbols)),
            Self::Matrix { columns, rows } => format!("__mat_{rows}_{columns}__f32"),
            Self::Array { element, count } => match count {
                Some(n) => format!("__array{}_{n}", element.to_str(symbols)),
                None => format!("__array{}", element.to_str(symbols)),
            },
            Self::Pointer { base, class } => format!("__ptr_{}{}", class.name(), base.to_str(symbols)),
            Self::Named(name) => format!("__struct_{}", symbols.name(*name)),
            Self::Sampler { comparison: false } => "__sampler_sampler".into(),
            Self::Sampler { comparison: true } => "__sampler_comparison".into(),
            Self::SampledTexture { dim, kind } => {
                format!("__sampled_texture_{}{}", dim.name(), kind_name(*kind))
            }
            Self::MultisampledTexture { dim, kind } => {
                format!("__multisampled_texture_{}{}", dim.name(), kind_name(*kind))
            }
            Self::DepthTexture { dim } => format!("__depth_texture_{}", dim.name()),
            Self::StorageTexture {
                dim,
                format,
                access,
            } => format!(
                "__storage_texture_{}_{}_{}",
                access.canonical_name(),
                dim.name(),
                format.name()
            ),
            Self::AccessControl { access, base } => {
                format!("__access_control_{}{}", access.canonical_name(), base.to_str(symbols))
            }
        }
    }
}

fn kind_name(kind: ScalarKind) -> &'static str {
    match kind {
        ScalarKind::Bool => "__bool",
        ScalarKind::Sint => "__i32",
        ScalarKind::Uint => "__u32",
        ScalarKind::Float => "__f32",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_match_ir_spelling() {
        let symbols = SymbolTable::new();
        assert_eq!(TypeDecl::vector(3, TypeDecl::F32).to_str(&symbols), "__vec_3__f32");
        assert_eq!(
            TypeDecl::array(TypeDecl::F32, Some(4)).to_str(&symbols),
            "__array__f32_4"
        );
        assert_eq!(
            TypeDecl::Matrix {
                columns: 4,
                rows: 3
            }
            .to_str(&symbols),
            "__mat_3_4__f32"
        );
    }

    #[test]
    fn struct_names_use_the_symbol_table() {
        let mut symbols = SymbolTable::new();
        let light = symbols.register("Light");
        assert_eq!(TypeDecl::Named(light).to_str(&symbols), "__struct_Light");
    }

    #[test]
    fn validity() {
        assert!(TypeDecl::vector(4, TypeDecl::Bool).is_valid());
        assert!(!TypeDecl::vector(5, TypeDecl::F32).is_valid());
        assert!(!TypeDecl::vector(2, TypeDecl::vector(2, TypeDecl::F32)).is_valid());
        assert!(!TypeDecl::array(TypeDecl::F32, Some(0)).is_valid());
        assert!(!TypeDecl::array(TypeDecl::Void, None).is_valid());
        assert!(
            !TypeDecl::SampledTexture {
                dim: TextureDimension::D2,
                kind: ScalarKind::Bool
            }
            .is_valid()
        );
    }
}
