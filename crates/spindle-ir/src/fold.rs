//! Constant folding of scalar and vector arithmetic.
//!
//! Operands arrive as per-component literals; a single-component operand
//! is broadcast against a vector. Integer arithmetic wraps. Division or
//! remainder by zero and float results that are not finite are left
//! unfolded, as are shifts by the bit width or more.

use crate::constant::Literal;
use crate::instruction::{BinaryOp, UnaryOp};

pub(crate) fn unary(op: UnaryOp, operand: &[Literal]) -> Option<Vec<Literal>> {
    operand.iter().map(|&lit| unary_scalar(op, lit)).collect()
}

fn unary_scalar(op: UnaryOp, lit: Literal) -> Option<Literal> {
    use Literal::*;

    match (op, lit) {
        (UnaryOp::Negate, I32(v)) => Some(I32(v.wrapping_neg())),
        (UnaryOp::Negate, F32(v)) => finite(-v),
        (UnaryOp::LogicalNot, Bool(b)) => Some(Bool(!b)),
        (UnaryOp::BitwiseNot, I32(v)) => Some(I32(!v)),
        (UnaryOp::BitwiseNot, U32(v)) => Some(U32(!v)),
        _ => None,
    }
}

pub(crate) fn binary(op: BinaryOp, left: &[Literal], right: &[Literal]) -> Option<Vec<Literal>> {
    let len = left.len().max(right.len());
    if left.is_empty() || right.is_empty() {
        return None;
    }
    let pick = |side: &[Literal], i: usize| if side.len() == 1 { side[0] } else { side[i] };
    (0..len)
        .map(|i| binary_scalar(op, pick(left, i), pick(right, i)))
        .collect()
}

fn binary_scalar(op: BinaryOp, a: Literal, b: Literal) -> Option<Literal> {
    use BinaryOp as B;
    use Literal::*;

    Some(match (a, b) {
        (I32(x), I32(y)) => match op {
            B::Add => I32(x.wrapping_add(y)),
            B::Subtract => I32(x.wrapping_sub(y)),
            B::Multiply => I32(x.wrapping_mul(y)),
            B::Divide => I32(x.checked_div(y).or_else(|| (y == -1).then_some(x))?),
            B::Modulo => I32(x.checked_rem(y).or_else(|| (y == -1).then_some(0))?),
            B::BitwiseAnd => I32(x & y),
            B::BitwiseOr => I32(x | y),
            B::BitwiseXor => I32(x ^ y),
            _ => Bool(compare(op, x.cmp(&y))?),
        },
        (U32(x), U32(y)) => match op {
            B::Add => U32(x.wrapping_add(y)),
            B::Subtract => U32(x.wrapping_sub(y)),
            B::Multiply => U32(x.wrapping_mul(y)),
            B::Divide => U32(x.checked_div(y)?),
            B::Modulo => U32(x.checked_rem(y)?),
            B::BitwiseAnd => U32(x & y),
            B::BitwiseOr => U32(x | y),
            B::BitwiseXor => U32(x ^ y),
            B::ShiftLeft => U32(x.checked_shl(y)?),
            B::ShiftRight => U32(x.checked_shr(y)?),
            _ => Bool(compare(op, x.cmp(&y))?),
        },
        (I32(x), U32(s)) => match op {
            B::ShiftLeft => I32(x.checked_shl(s)?),
            B::ShiftRight => I32(x.checked_shr(s)?),
            _ => return None,
        },
        (F32(x), F32(y)) => match op {
            B::Add => return finite(x + y),
            B::Subtract => return finite(x - y),
            B::Multiply => return finite(x * y),
            B::Divide => return finite(x / y),
            B::Modulo => return finite(x % y),
            B::Equal => Bool(x == y),
            B::NotEqual => Bool(x != y),
            B::Less => Bool(x < y),
            B::LessEqual => Bool(x <= y),
            B::Greater => Bool(x > y),
            B::GreaterEqual => Bool(x >= y),
            _ => return None,
        },
        (Bool(x), Bool(y)) => match op {
            B::Equal => Bool(x == y),
            B::NotEqual => Bool(x != y),
            B::LogicalAnd | B::BitwiseAnd => Bool(x && y),
            B::LogicalOr | B::BitwiseOr => Bool(x || y),
            B::BitwiseXor => Bool(x != y),
            _ => return None,
        },
        _ => return None,
    })
}

fn compare(op: BinaryOp, ordering: std::cmp::Ordering) -> Option<bool> {
    use std::cmp::Ordering::*;

    Some(match op {
        BinaryOp::Equal => ordering == Equal,
        BinaryOp::NotEqual => ordering != Equal,
        BinaryOp::Less => ordering == Less,
        BinaryOp::LessEqual => ordering != Greater,
        BinaryOp::Greater => ordering == Greater,
        BinaryOp::GreaterEqual => ordering != Less,
        _ => return None,
    })
}

fn finite(v: f32) -> Option<Literal> {
    v.is_finite().then_some(Literal::F32(v))
}
