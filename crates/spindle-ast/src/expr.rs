//! Expression nodes.

use std::fmt::Write as _;

use spindle_ir::{BinaryOp, Source, UnaryOp};

use crate::symbol::{Symbol, SymbolTable};
use crate::ty::TypeDecl;

/// A scalar literal as written.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Literal {
    Bool(bool),
    Sint(i32),
    Uint(u32),
    Float(f32),
}

impl Literal {
    pub fn to_ir(self) -> spindle_ir::Literal {
        match self {
            Self::Bool(v) => spindle_ir::Literal::Bool(v),
            Self::Sint(v) => spindle_ir::Literal::I32(v),
            Self::Uint(v) => spindle_ir::Literal::U32(v),
            Self::Float(v) => spindle_ir::Literal::F32(v),
        }
    }

    /// `true`, `-3`, `7u`, `1.5`.
    pub fn to_str(self) -> String {
        match self {
            Self::Bool(v) => v.to_string(),
            Self::Sint(v) => v.to_string(),
            Self::Uint(v) => format!("{v}u"),
            Self::Float(v) => format!("{v:?}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Expression {
    pub kind: ExpressionKind,
    pub source: Source,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExpressionKind {
    Identifier(Symbol),
    ScalarConstructor(Literal),
    /// `vec3<f32>(a, b, c)`, `f32(i)`, `Light()`.
    TypeConstructor {
        ty: TypeDecl,
        values: Vec<Expression>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expression>,
        rhs: Box<Expression>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expression>,
    },
    ArrayAccessor {
        array: Box<Expression>,
        index: Box<Expression>,
    },
    /// Struct member or vector swizzle (`v.xy`, `v.rgb`).
    MemberAccessor {
        structure: Box<Expression>,
        member: Symbol,
    },
    /// A user function, or a math builtin when no function has the name.
    Call {
        function: Symbol,
        args: Vec<Expression>,
    },
    Bitcast {
        ty: TypeDecl,
        expr: Box<Expression>,
    },
    /// A child the parser could not produce.
    Missing,
}

impl Expression {
    pub fn new(kind: ExpressionKind, source: Source) -> Self {
        Self { kind, source }
    }

    pub fn missing(source: Source) -> Self {
        Self::new(ExpressionKind::Missing, source)
    }

    pub fn identifier(symbol: Symbol, source: Source) -> Self {
        Self::new(ExpressionKind::Identifier(symbol), source)
    }

    pub fn literal(literal: Literal, source: Source) -> Self {
        Self::new(ExpressionKind::ScalarConstructor(literal), source)
    }

    pub fn binary(op: BinaryOp, lhs: Expression, rhs: Expression, source: Source) -> Self {
        Self::new(
            ExpressionKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            source,
        )
    }

    pub fn array_accessor(array: Expression, index: Expression, source: Source) -> Self {
        Self::new(
            ExpressionKind::ArrayAccessor {
                array: Box::new(array),
                index: Box::new(index),
            },
            source,
        )
    }

    pub fn member(structure: Expression, member: Symbol, source: Source) -> Self {
        Self::new(
            ExpressionKind::MemberAccessor {
                structure: Box::new(structure),
                member,
            },
            source,
        )
    }

    /// Node name used in dumps and diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            ExpressionKind::Identifier(_) => "Identifier",
            ExpressionKind::ScalarConstructor(_) => "ScalarConstructor",
            ExpressionKind::TypeConstructor { .. } => "TypeConstructor",
            ExpressionKind::Binary { .. } => "Binary",
            ExpressionKind::Unary { .. } => "Unary",
            ExpressionKind::ArrayAccessor { .. } => "ArrayAccessor",
            ExpressionKind::MemberAccessor { .. } => "MemberAccessor",
            ExpressionKind::Call { .. } => "Call",
            ExpressionKind::Bitcast { .. } => "Bitcast",
            ExpressionKind::Missing => "Missing",
        }
    }

    /// A node is valid when it and all of its children are present and
    /// structurally well-formed.
    pub fn is_valid(&self) -> bool {
        match &self.kind {
            ExpressionKind::Identifier(_) | ExpressionKind::ScalarConstructor(_) => true,
            ExpressionKind::TypeConstructor { ty, values } => {
                ty.is_valid() && values.iter().all(Expression::is_valid)
            }
            ExpressionKind::Binary { lhs, rhs, .. } => lhs.is_valid() && rhs.is_valid(),
            ExpressionKind::Unary { expr, .. } => expr.is_valid(),
            ExpressionKind::ArrayAccessor { array, index } => array.is_valid() && index.is_valid(),
            ExpressionKind::MemberAccessor { structure, .. } => structure.is_valid(),
            ExpressionKind::Call { args, .. } => args.iter().all(Expression::is_valid),
            ExpressionKind::Bitcast { ty, expr } => ty.is_valid() && expr.is_valid(),
            ExpressionKind::Missing => false,
        }
    }

    pub fn to_str(&self, symbols: &SymbolTable) -> String {
        let mut out = String::new();
        self.write(&mut out, symbols, 0);
        out
    }

    pub(crate) fn write(&self, out: &mut String, symbols: &SymbolTable, indent: usize) {
        let pad = " ".repeat(indent);
        let name = self.kind_name();
        let children: Vec<&Expression> = match &self.kind {
            ExpressionKind::Identifier(sym) => {
                let _ = writeln!(out, "{pad}{name}{{{}}}", symbols.name(*sym));
                return;
            }
            ExpressionKind::ScalarConstructor(lit) => {
                let _ = writeln!(out, "{pad}{name}{{{}}}", lit.to_str());
                return;
            }
            ExpressionKind::Missing => {
                let _ = writeln!(out, "{pad}{name}{{}}");
                return;
            }
            ExpressionKind::TypeConstructor { ty, values } => {
                let _ = write!(out, "{pad}{name} {}{{", ty.to_str(symbols));
                values.iter().collect()
            }
            ExpressionKind::Binary { op, lhs, rhs } => {
                let _ = write!(out, "{pad}{name} {op:?}{{");
                vec![&**lhs, &**rhs]
            }
            ExpressionKind::Unary { op, expr } => {
                let _ = write!(out, "{pad}{name} {op:?}{{");
                vec![&**expr]
            }
            ExpressionKind::ArrayAccessor { array, index } => {
                let _ = write!(out, "{pad}{name}{{");
                vec![&**array, &**index]
            }
            ExpressionKind::MemberAccessor { structure, member } => {
                let _ = write!(out, "{pad}{name} {}{{", symbols.name(*member));
                vec![&**structure]
            }
            ExpressionKind::Call { function, args } => {
                let _ = write!(out, "{pad}{name} {}{{", symbols.name(*function));
                args.iter().collect()
            }
            ExpressionKind::Bitcast { ty, expr } => {
                let _ = write!(out, "{pad}{name} {}{{", ty.to_str(symbols));
                vec![&**expr]
            }
        };
        if children.is_empty() {
            out.push_str("}\n");
            return;
        }
        out.push('\n');
        for child in children {
            child.write(out, symbols, indent + 2);
        }
        let _ = writeln!(out, "{pad}}}");
    }
}
