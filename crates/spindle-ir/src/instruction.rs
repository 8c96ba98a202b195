//! Instructions, values and basic blocks.
//!
//! Every function owns three arenas: [`Value`]s, [`Instruction`]s and
//! [`Block`]s. Instructions refer to their operands through
//! `Handle<Value>` and never own them. A value is defined by exactly one
//! instruction, parameter, materialized constant or global reference.

use crate::arena::Handle;
use crate::constant::Constant;
use crate::diagnostic::Source;
use crate::func::Function;
use crate::global::GlobalVariable;
use crate::types::Type;

/// Unary operators.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum UnaryOp {
    Negate,
    LogicalNot,
    BitwiseNot,
}

/// Binary operators.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    LogicalAnd,
    LogicalOr,
    BitwiseAnd,
    BitwiseOr,
    BitwiseXor,
    ShiftLeft,
    ShiftRight,
}

impl BinaryOp {
    /// Returns `true` for operators producing a boolean from two operands
    /// of the same type.
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Equal
                | Self::NotEqual
                | Self::Less
                | Self::LessEqual
                | Self::Greater
                | Self::GreaterEqual
        )
    }

    /// WGSL operator token.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Modulo => "%",
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::Less => "<",
            Self::LessEqual => "<=",
            Self::Greater => ">",
            Self::GreaterEqual => ">=",
            Self::LogicalAnd => "&&",
            Self::LogicalOr => "||",
            Self::BitwiseAnd => "&",
            Self::BitwiseOr => "|",
            Self::BitwiseXor => "^",
            Self::ShiftLeft => "<<",
            Self::ShiftRight => ">>",
        }
    }
}

/// Built-in math functions.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum MathFunction {
    // Component-wise
    Abs,
    Min,
    Max,
    Clamp,
    // Rounding
    Floor,
    Ceil,
    Round,
    Fract,
    Trunc,
    // Trigonometric
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Atan2,
    Sinh,
    Cosh,
    Tanh,
    // Exponential
    Sqrt,
    InverseSqrt,
    Log,
    Log2,
    Exp,
    Exp2,
    Pow,
    // Linear algebra
    Dot,
    Cross,
    Normalize,
    Length,
    Distance,
    // Interpolation
    Mix,
    Step,
    SmoothStep,
    Fma,
}

impl MathFunction {
    pub const ALL: [Self; 35] = [
        Self::Abs,
        Self::Min,
        Self::Max,
        Self::Clamp,
        Self::Floor,
        Self::Ceil,
        Self::Round,
        Self::Fract,
        Self::Trunc,
        Self::Sin,
        Self::Cos,
        Self::Tan,
        Self::Asin,
        Self::Acos,
        Self::Atan,
        Self::Atan2,
        Self::Sinh,
        Self::Cosh,
        Self::Tanh,
        Self::Sqrt,
        Self::InverseSqrt,
        Self::Log,
        Self::Log2,
        Self::Exp,
        Self::Exp2,
        Self::Pow,
        Self::Dot,
        Self::Cross,
        Self::Normalize,
        Self::Length,
        Self::Distance,
        Self::Mix,
        Self::Step,
        Self::SmoothStep,
        Self::Fma,
    ];

    /// Number of arguments.
    pub fn arity(self) -> usize {
        match self {
            Self::Min
            | Self::Max
            | Self::Atan2
            | Self::Pow
            | Self::Dot
            | Self::Cross
            | Self::Distance
            | Self::Step => 2,
            Self::Clamp | Self::Mix | Self::SmoothStep | Self::Fma => 3,
            _ => 1,
        }
    }

    /// WGSL builtin name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Abs => "abs",
            Self::Min => "min",
            Self::Max => "max",
            Self::Clamp => "clamp",
            Self::Floor => "floor",
            Self::Ceil => "ceil",
            Self::Round => "round",
            Self::Fract => "fract",
            Self::Trunc => "trunc",
            Self::Sin => "sin",
            Self::Cos => "cos",
            Self::Tan => "tan",
            Self::Asin => "asin",
            Self::Acos => "acos",
            Self::Atan => "atan",
            Self::Atan2 => "atan2",
            Self::Sinh => "sinh",
            Self::Cosh => "cosh",
            Self::Tanh => "tanh",
            Self::Sqrt => "sqrt",
            Self::InverseSqrt => "inverseSqrt",
            Self::Log => "log",
            Self::Log2 => "log2",
            Self::Exp => "exp",
            Self::Exp2 => "exp2",
            Self::Pow => "pow",
            Self::Dot => "dot",
            Self::Cross => "cross",
            Self::Normalize => "normalize",
            Self::Length => "length",
            Self::Distance => "distance",
            Self::Mix => "mix",
            Self::Step => "step",
            Self::SmoothStep => "smoothstep",
            Self::Fma => "fma",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }
}

/// Vector component selector.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum SwizzleComponent {
    X = 0,
    Y = 1,
    Z = 2,
    W = 3,
}

impl SwizzleComponent {
    pub const XYZW: [Self; 4] = [Self::X, Self::Y, Self::Z, Self::W];

    pub fn letter(self) -> char {
        match self {
            Self::X => 'x',
            Self::Y => 'y',
            Self::Z => 'z',
            Self::W => 'w',
        }
    }

    /// Parses `x`/`y`/`z`/`w` and the `r`/`g`/`b`/`a` aliases.
    pub fn from_letter(c: char) -> Option<Self> {
        match c {
            'x' | 'r' => Some(Self::X),
            'y' | 'g' => Some(Self::Y),
            'z' | 'b' => Some(Self::Z),
            'w' | 'a' => Some(Self::W),
            _ => None,
        }
    }
}

/// Index used by one access-chain step.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum AccessIndex {
    Constant(u32),
    Dynamic(Handle<Value>),
}

/// One step of an access chain, with the element type it reaches.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct AccessStep {
    pub index: AccessIndex,
    pub ty: Handle<Type>,
}

/// A `switch` arm: every selector constant branches to `target`.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct SwitchCase {
    pub selectors: Vec<Handle<Constant>>,
    pub target: Handle<Block>,
}

/// Opcode and operands of an instruction.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub enum Op {
    Unary {
        op: UnaryOp,
        operand: Handle<Value>,
    },
    Binary {
        op: BinaryOp,
        left: Handle<Value>,
        right: Handle<Value>,
    },
    /// A function-local variable; the result is a pointer.
    Variable {
        init: Option<Handle<Constant>>,
    },
    Load {
        pointer: Handle<Value>,
    },
    Store {
        pointer: Handle<Value>,
        value: Handle<Value>,
    },
    AccessChain {
        base: Handle<Value>,
        steps: Vec<AccessStep>,
    },
    Extract {
        composite: Handle<Value>,
        indices: Vec<u32>,
    },
    Construct {
        components: Vec<Handle<Value>>,
    },
    Splat {
        value: Handle<Value>,
    },
    Swizzle {
        vector: Handle<Value>,
        pattern: Vec<SwizzleComponent>,
    },
    Select {
        condition: Handle<Value>,
        accept: Handle<Value>,
        reject: Handle<Value>,
    },
    /// Numeric conversion between scalar kinds.
    Convert {
        value: Handle<Value>,
    },
    /// Bit reinterpretation between 32-bit kinds.
    Bitcast {
        value: Handle<Value>,
    },
    Call {
        function: Handle<Function>,
        arguments: Vec<Handle<Value>>,
    },
    Math {
        fun: MathFunction,
        arguments: Vec<Handle<Value>>,
    },
    Branch {
        target: Handle<Block>,
    },
    CondBranch {
        condition: Handle<Value>,
        accept: Handle<Block>,
        reject: Handle<Block>,
        merge: Option<Handle<Block>>,
    },
    /// Loop header: jumps to `body`; `continuing` branches back here.
    Loop {
        body: Handle<Block>,
        continuing: Handle<Block>,
        merge: Handle<Block>,
    },
    Switch {
        selector: Handle<Value>,
        cases: Vec<SwitchCase>,
        default: Handle<Block>,
        merge: Option<Handle<Block>>,
    },
    Return {
        value: Option<Handle<Value>>,
    },
    Discard,
    Unreachable,
}

impl Op {
    /// Short lowercase opcode name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unary { .. } => "unary",
            Self::Binary { .. } => "binary",
            Self::Variable { .. } => "variable",
            Self::Load { .. } => "load",
            Self::Store { .. } => "store",
            Self::AccessChain { .. } => "access_chain",
            Self::Extract { .. } => "extract",
            Self::Construct { .. } => "construct",
            Self::Splat { .. } => "splat",
            Self::Swizzle { .. } => "swizzle",
            Self::Select { .. } => "select",
            Self::Convert { .. } => "convert",
            Self::Bitcast { .. } => "bitcast",
            Self::Call { .. } => "call",
            Self::Math { .. } => "math",
            Self::Branch { .. } => "branch",
            Self::CondBranch { .. } => "cond_branch",
            Self::Loop { .. } => "loop",
            Self::Switch { .. } => "switch",
            Self::Return { .. } => "return",
            Self::Discard => "discard",
            Self::Unreachable => "unreachable",
        }
    }

    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Self::Branch { .. }
                | Self::CondBranch { .. }
                | Self::Loop { .. }
                | Self::Switch { .. }
                | Self::Return { .. }
                | Self::Discard
                | Self::Unreachable
        )
    }

    /// Side-effect-free ops whose result depends only on their operands.
    pub fn is_pure(&self) -> bool {
        matches!(
            self,
            Self::Unary { .. }
                | Self::Binary { .. }
                | Self::AccessChain { .. }
                | Self::Extract { .. }
                | Self::Construct { .. }
                | Self::Splat { .. }
                | Self::Swizzle { .. }
                | Self::Select { .. }
                | Self::Convert { .. }
                | Self::Bitcast { .. }
                | Self::Math { .. }
        )
    }

    /// Value operands in order.
    pub fn operands(&self) -> Vec<Handle<Value>> {
        match self {
            Self::Unary { operand, .. } => vec![*operand],
            Self::Binary { left, right, .. } => vec![*left, *right],
            Self::Variable { .. } | Self::Discard | Self::Unreachable => Vec::new(),
            Self::Branch { .. } | Self::Loop { .. } => Vec::new(),
            Self::Load { pointer } => vec![*pointer],
            Self::Store { pointer, value } => vec![*pointer, *value],
            Self::AccessChain { base, steps } => std::iter::once(*base)
                .chain(steps.iter().filter_map(|s| match s.index {
                    AccessIndex::Dynamic(v) => Some(v),
                    AccessIndex::Constant(_) => None,
                }))
                .collect(),
            Self::Extract { composite, .. } => vec![*composite],
            Self::Construct { components } => components.clone(),
            Self::Splat { value } | Self::Convert { value } | Self::Bitcast { value } => {
                vec![*value]
            }
            Self::Swizzle { vector, .. } => vec![*vector],
            Self::Select {
                condition,
                accept,
                reject,
            } => vec![*condition, *accept, *reject],
            Self::Call { arguments, .. } | Self::Math { arguments, .. } => arguments.clone(),
            Self::CondBranch { condition, .. } => vec![*condition],
            Self::Switch { selector, .. } => vec![*selector],
            Self::Return { value } => value.iter().copied().collect(),
        }
    }

    /// Control-flow edges leaving the block.
    pub fn successors(&self) -> Vec<Handle<Block>> {
        match self {
            Self::Branch { target } => vec![*target],
            Self::CondBranch { accept, reject, .. } => vec![*accept, *reject],
            Self::Loop { body, .. } => vec![*body],
            Self::Switch { cases, default, .. } => cases
                .iter()
                .map(|c| c.target)
                .chain(std::iter::once(*default))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Every block named by the terminator, edges and merge annotations
    /// alike, with merge and continuing blocks first.
    pub fn structured_successors(&self) -> Vec<Handle<Block>> {
        match self {
            Self::CondBranch {
                accept,
                reject,
                merge,
                ..
            } => merge.iter().copied().chain([*reject, *accept]).collect(),
            Self::Loop {
                body,
                continuing,
                merge,
            } => vec![*merge, *continuing, *body],
            Self::Switch {
                cases,
                default,
                merge,
                ..
            } => merge
                .iter()
                .copied()
                .chain(std::iter::once(*default))
                .chain(cases.iter().rev().map(|c| c.target))
                .collect(),
            _ => self.successors(),
        }
    }
}

/// An instruction inside a block.
#[derive(Clone, Debug)]
pub struct Instruction {
    pub op: Op,
    pub result: Option<Handle<Value>>,
    pub block: Handle<Block>,
    pub source: Option<Source>,
}

/// How a value came to be.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum ValueDef {
    /// The n-th function parameter.
    Parameter(u32),
    /// A materialized module constant.
    Constant(Handle<Constant>),
    /// A reference to a global variable; its type is a pointer.
    Global(Handle<GlobalVariable>),
    /// The result of an instruction.
    Instruction(Handle<Instruction>),
}

/// A typed SSA value.
#[derive(Clone, Debug)]
pub struct Value {
    pub ty: Handle<Type>,
    pub def: ValueDef,
    pub name: Option<String>,
}

/// An ordered list of instructions ending in a terminator.
#[derive(Clone, Debug, Default)]
pub struct Block {
    pub instructions: Vec<Handle<Instruction>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;

    #[test]
    fn terminators_and_purity() {
        let mut blocks: Arena<Block> = Arena::new();
        let b = blocks.append(Block::default());
        assert!(Op::Branch { target: b }.is_terminator());
        assert!(Op::Discard.is_terminator());
        assert!(!Op::Discard.is_pure());
        assert!(!Op::Variable { init: None }.is_terminator());
    }

    #[test]
    fn loop_successors() {
        let mut blocks: Arena<Block> = Arena::new();
        let body = blocks.append(Block::default());
        let continuing = blocks.append(Block::default());
        let merge = blocks.append(Block::default());
        let op = Op::Loop {
            body,
            continuing,
            merge,
        };
        assert_eq!(op.successors(), vec![body]);
        assert_eq!(op.structured_successors(), vec![merge, continuing, body]);
    }

    #[test]
    fn math_names_round_trip() {
        for fun in MathFunction::ALL {
            assert_eq!(MathFunction::from_name(fun.name()), Some(fun));
        }
        assert_eq!(MathFunction::Clamp.arity(), 3);
        assert_eq!(MathFunction::Dot.arity(), 2);
        assert_eq!(MathFunction::Sqrt.arity(), 1);
    }

    #[test]
    fn swizzle_letters() {
        assert_eq!(SwizzleComponent::from_letter('g'), Some(SwizzleComponent::Y));
        assert_eq!(SwizzleComponent::W.letter(), 'w');
        assert_eq!(SwizzleComponent::from_letter('q'), None);
    }
}
