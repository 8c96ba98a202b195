//! Literal values and the per-module constant interner.
//!
//! Scalars are keyed by `(type, bit pattern)`, composites by `(type, ordered
//! children)`. Floats keep their exact IEEE-754 bits, so two NaNs with
//! different payloads are different constants, and `-0.0` differs from
//! `0.0`.

use std::fmt;

use crate::arena::{Handle, UniqueArena};
use crate::error::IrError;
use crate::types::{ArraySize, Scalar, ScalarKind, Type, TypeInterner};

/// A scalar literal value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Literal {
    Bool(bool),
    I32(i32),
    U32(u32),
    F32(f32),
}

impl Literal {
    pub fn scalar(self) -> Scalar {
        match self {
            Self::Bool(_) => Scalar::BOOL,
            Self::I32(_) => Scalar::I32,
            Self::U32(_) => Scalar::U32,
            Self::F32(_) => Scalar::F32,
        }
    }

    /// 32-bit pattern of the value.
    pub fn bits(self) -> u32 {
        match self {
            Self::Bool(b) => b as u32,
            Self::I32(v) => v as u32,
            Self::U32(v) => v,
            Self::F32(v) => v.to_bits(),
        }
    }

    /// Reinterprets `bits` as a value of `scalar`.
    pub fn from_bits(scalar: Scalar, bits: u32) -> Option<Self> {
        Some(match scalar.kind {
            ScalarKind::Bool => match bits {
                0 => Self::Bool(false),
                1 => Self::Bool(true),
                _ => return None,
            },
            ScalarKind::Sint => Self::I32(bits as i32),
            ScalarKind::Uint => Self::U32(bits),
            ScalarKind::Float => Self::F32(f32::from_bits(bits)),
        })
    }

    /// The zero value of `scalar`.
    pub fn zero(scalar: Scalar) -> Self {
        match scalar.kind {
            ScalarKind::Bool => Self::Bool(false),
            ScalarKind::Sint => Self::I32(0),
            ScalarKind::Uint => Self::U32(0),
            ScalarKind::Float => Self::F32(0.0),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::I32(v) => write!(f, "{v}i"),
            Self::U32(v) => write!(f, "{v}u"),
            Self::F32(v) => write!(f, "{v:?}f"),
        }
    }
}

/// An interned constant value.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub enum Constant {
    /// A scalar, stored as its 32-bit pattern.
    Scalar { ty: Handle<Type>, bits: u32 },
    /// A vector, matrix, array or struct built from child constants.
    Composite {
        ty: Handle<Type>,
        components: Vec<Handle<Constant>>,
    },
    /// The zero value of a constructible type.
    Zero { ty: Handle<Type> },
}

impl Constant {
    pub fn ty(&self) -> Handle<Type> {
        match *self {
            Self::Scalar { ty, .. } | Self::Composite { ty, .. } | Self::Zero { ty } => ty,
        }
    }
}

/// Canonical registry of constants for one module.
#[derive(Clone, Debug, Default)]
pub struct ConstantInterner {
    arena: UniqueArena<Constant>,
}

impl ConstantInterner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle<Constant>, &Constant)> {
        self.arena.iter()
    }

    pub fn try_get(&self, handle: Handle<Constant>) -> Option<&Constant> {
        self.arena.try_get(handle)
    }

    fn intern(&mut self, types: &TypeInterner, constant: Constant) -> Handle<Constant> {
        let (handle, fresh) = self.arena.insert_full(constant);
        if fresh {
            log::debug!("interned constant {}", self.name(types, handle));
        }
        handle
    }

    /// Scalar constant of type `ty` with raw `bits`.
    pub fn scalar(
        &mut self,
        types: &TypeInterner,
        ty: Handle<Type>,
        bits: u32,
    ) -> Result<Handle<Constant>, IrError> {
        let scalar = match types.try_get(ty) {
            Some(Type::Scalar(s)) => *s,
            Some(_) => {
                return Err(IrError::TypeMismatch {
                    expected: "a scalar type".into(),
                    found: types.type_name(ty),
                });
            }
            None => {
                return Err(IrError::BadHandle {
                    index: ty.index(),
                    size: types.len(),
                });
            }
        };
        if scalar.kind == ScalarKind::Bool && bits > 1 {
            return Err(IrError::TypeMismatch {
                expected: "bool bits 0 or 1".into(),
                found: format!("{bits:#x}"),
            });
        }
        Ok(self.intern(types, Constant::Scalar { ty, bits }))
    }

    /// Scalar constant for a literal, interning its type as needed.
    pub fn literal(&mut self, types: &mut TypeInterner, literal: Literal) -> Handle<Constant> {
        let ty = match literal {
            Literal::Bool(_) => types.bool(),
            Literal::I32(_) => types.i32(),
            Literal::U32(_) => types.u32(),
            Literal::F32(_) => types.f32(),
        };
        self.intern(
            types,
            Constant::Scalar {
                ty,
                bits: literal.bits(),
            },
        )
    }

    /// Composite constant. Children must match the composite's shape.
    pub fn composite(
        &mut self,
        types: &TypeInterner,
        ty: Handle<Type>,
        components: Vec<Handle<Constant>>,
    ) -> Result<Handle<Constant>, IrError> {
        let expected = composite_member_types(types, ty)?;
        if expected.len() != components.len() {
            return Err(IrError::TypeMismatch {
                expected: format!("{} components for {}", expected.len(), types.type_name(ty)),
                found: format!("{} components", components.len()),
            });
        }
        for (&want, &child) in expected.iter().zip(&components) {
            let child_ty = self
                .arena
                .try_get(child)
                .ok_or(IrError::BadHandle {
                    index: child.index(),
                    size: self.arena.len(),
                })?
                .ty();
            if child_ty != want {
                return Err(IrError::TypeMismatch {
                    expected: types.type_name(want),
                    found: types.type_name(child_ty),
                });
            }
        }
        Ok(self.intern(types, Constant::Composite { ty, components }))
    }

    /// Zero value of a constructible type.
    pub fn zero(
        &mut self,
        types: &TypeInterner,
        ty: Handle<Type>,
    ) -> Result<Handle<Constant>, IrError> {
        if types.try_get(ty).is_none() || !types.is_constructible(ty) {
            return Err(IrError::TypeMismatch {
                expected: "a constructible type".into(),
                found: types.type_name(ty),
            });
        }
        Ok(self.intern(types, Constant::Zero { ty }))
    }

    /// Recovers the literal of a scalar constant.
    pub fn literal_value(&self, types: &TypeInterner, handle: Handle<Constant>) -> Option<Literal> {
        match *self.arena.try_get(handle)? {
            Constant::Scalar { ty, bits } => Literal::from_bits(types[ty].scalar()?, bits),
            Constant::Zero { ty } => match types[ty] {
                Type::Scalar(s) => Some(Literal::zero(s)),
                _ => None,
            },
            Constant::Composite { .. } => None,
        }
    }

    /// Per-component literals of a scalar or vector constant (zero included).
    pub fn components(&self, types: &TypeInterner, handle: Handle<Constant>) -> Option<Vec<Literal>> {
        match self.arena.try_get(handle)? {
            Constant::Scalar { .. } => Some(vec![self.literal_value(types, handle)?]),
            Constant::Zero { ty } => match types[*ty] {
                Type::Scalar(s) => Some(vec![Literal::zero(s)]),
                Type::Vector { size, scalar } => Some(vec![Literal::zero(scalar); size as usize]),
                _ => None,
            },
            Constant::Composite { ty, components } => match types[*ty] {
                Type::Vector { .. } => components
                    .iter()
                    .map(|&c| self.literal_value(types, c))
                    .collect(),
                _ => None,
            },
        }
    }

    /// Deterministic, value-derived name (`__sint__i32_10`, `__float47.2`, ...).
    pub fn name(&self, types: &TypeInterner, handle: Handle<Constant>) -> String {
        let Some(constant) = self.arena.try_get(handle) else {
            return format!("__invalid{handle:?}");
        };
        match constant {
            Constant::Scalar { ty, bits } => match types[*ty].scalar() {
                Some(s) => match Literal::from_bits(s, *bits) {
                    Some(Literal::Bool(b)) => format!("__bool_{b}"),
                    Some(Literal::I32(v)) => format!("__sint{}_{v}", types.type_name(*ty)),
                    Some(Literal::U32(v)) => format!("__uint{}_{v}", types.type_name(*ty)),
                    Some(Literal::F32(v)) => format!("__float{v:?}"),
                    None => format!("__invalid_bits_{bits:#x}"),
                },
                None => format!("__invalid_bits_{bits:#x}"),
            },
            Constant::Zero { ty } => format!("__zero{}", types.type_name(*ty)),
            Constant::Composite { ty, components } => {
                let children: Vec<String> =
                    components.iter().map(|&c| self.name(types, c)).collect();
                format!("__composite{}({})", types.type_name(*ty), children.join(", "))
            }
        }
    }
}

impl std::ops::Index<Handle<Constant>> for ConstantInterner {
    type Output = Constant;

    fn index(&self, handle: Handle<Constant>) -> &Constant {
        &self.arena[handle]
    }
}

/// Types each child of a composite of type `ty` must have.
pub(crate) fn composite_member_types(
    types: &TypeInterner,
    ty: Handle<Type>,
) -> Result<Vec<Handle<Type>>, IrError> {
    let mismatch = || IrError::TypeMismatch {
        expected: "a composite type".into(),
        found: types.type_name(ty),
    };
    let inner = types.try_get(ty).ok_or_else(mismatch)?;
    Ok(match inner {
        Type::Vector { size, scalar } => {
            let element = types.lookup(&Type::Scalar(*scalar)).ok_or_else(mismatch)?;
            vec![element; *size as usize]
        }
        Type::Matrix {
            columns,
            rows,
            scalar,
        } => {
            let column = types
                .lookup(&Type::Vector {
                    size: *rows,
                    scalar: *scalar,
                })
                .ok_or_else(mismatch)?;
            vec![column; *columns as usize]
        }
        Type::Array {
            base,
            size: ArraySize::Constant(n),
            ..
        } => vec![*base; *n as usize],
        Type::Struct(st) if st.is_defined() => st.members.iter().map(|m| m.ty).collect(),
        _ => return Err(mismatch()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_canonicalization() {
        let mut types = TypeInterner::new();
        let mut consts = ConstantInterner::new();
        let a = consts.literal(&mut types, Literal::I32(10));
        let b = consts.literal(&mut types, Literal::I32(10));
        let c = consts.literal(&mut types, Literal::U32(10));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(consts.name(&types, a), "__sint__i32_10");
        assert_eq!(consts.name(&types, c), "__uint__u32_10");
    }

    #[test]
    fn bool_names() {
        let mut types = TypeInterner::new();
        let mut consts = ConstantInterner::new();
        let t = consts.literal(&mut types, Literal::Bool(true));
        let f = consts.literal(&mut types, Literal::Bool(false));
        assert_eq!(consts.name(&types, t), "__bool_true");
        assert_eq!(consts.name(&types, f), "__bool_false");
    }

    #[test]
    fn bool_bits_must_be_zero_or_one() {
        let mut types = TypeInterner::new();
        let mut consts = ConstantInterner::new();
        let bool_ty = types.bool();
        assert!(consts.scalar(&types, bool_ty, 2).is_err());
        assert!(consts.scalar(&types, bool_ty, 1).is_ok());
    }

    #[test]
    fn float_name_round_trips_bits() {
        let mut types = TypeInterner::new();
        let mut consts = ConstantInterner::new();
        for value in [47.2f32, 42.1, 1.0, -0.0, 1.0e-40, f32::MAX, 0.1] {
            let h = consts.literal(&mut types, Literal::F32(value));
            let name = consts.name(&types, h);
            let decimal = name.strip_prefix("__float").unwrap();
            let parsed: f32 = decimal.parse().unwrap();
            assert_eq!(parsed.to_bits(), value.to_bits(), "{name}");
        }
    }

    #[test]
    fn nan_payloads_are_distinct() {
        let mut types = TypeInterner::new();
        let mut consts = ConstantInterner::new();
        let f32_ty = types.f32();
        let a = consts.scalar(&types, f32_ty, 0x7fc0_0000).unwrap();
        let b = consts.scalar(&types, f32_ty, 0x7fc0_0001).unwrap();
        assert_ne!(a, b);
        assert_eq!(consts.name(&types, a), consts.name(&types, b));
        match consts.literal_value(&types, b) {
            Some(Literal::F32(v)) => assert_eq!(v.to_bits(), 0x7fc0_0001),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn negative_zero_is_distinct() {
        let mut types = TypeInterner::new();
        let mut consts = ConstantInterner::new();
        let pos = consts.literal(&mut types, Literal::F32(0.0));
        let neg = consts.literal(&mut types, Literal::F32(-0.0));
        assert_ne!(pos, neg);
    }

    #[test]
    fn composite_vector() {
        let mut types = TypeInterner::new();
        let mut consts = ConstantInterner::new();
        let v2 = types.vector(Scalar::F32, 2).unwrap();
        let one = consts.literal(&mut types, Literal::F32(1.0));
        let two = consts.literal(&mut types, Literal::F32(2.0));
        let a = consts.composite(&types, v2, vec![one, two]).unwrap();
        let b = consts.composite(&types, v2, vec![one, two]).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            consts.name(&types, a),
            "__composite__vec_2__f32(__float1.0, __float2.0)"
        );
        assert_eq!(
            consts.components(&types, a),
            Some(vec![Literal::F32(1.0), Literal::F32(2.0)])
        );
    }

    #[test]
    fn composite_arity_mismatch() {
        let mut types = TypeInterner::new();
        let mut consts = ConstantInterner::new();
        let v3 = types.vector(Scalar::F32, 3).unwrap();
        let one = consts.literal(&mut types, Literal::F32(1.0));
        let err = consts.composite(&types, v3, vec![one, one]).unwrap_err();
        assert!(matches!(err, IrError::TypeMismatch { .. }));
    }

    #[test]
    fn composite_child_type_mismatch() {
        let mut types = TypeInterner::new();
        let mut consts = ConstantInterner::new();
        let v2 = types.vector(Scalar::F32, 2).unwrap();
        let one = consts.literal(&mut types, Literal::F32(1.0));
        let int = consts.literal(&mut types, Literal::I32(1));
        let err = consts.composite(&types, v2, vec![one, int]).unwrap_err();
        assert!(matches!(err, IrError::TypeMismatch { .. }));
    }

    #[test]
    fn zero_requires_constructible_type() {
        let mut types = TypeInterner::new();
        let mut consts = ConstantInterner::new();
        let m = types.matrix(2, 2).unwrap();
        let z = consts.zero(&types, m).unwrap();
        assert_eq!(consts.name(&types, z), "__zero__mat_2_2__f32");
        let sampler = types.sampler(false);
        assert!(consts.zero(&types, sampler).is_err());
    }

    #[test]
    fn literal_value_recovers_scalars() {
        let mut types = TypeInterner::new();
        let mut consts = ConstantInterner::new();
        let h = consts.literal(&mut types, Literal::I32(-7));
        assert_eq!(consts.literal_value(&types, h), Some(Literal::I32(-7)));
        assert_eq!(consts.name(&types, h), "__sint__i32_-7");
    }
}
