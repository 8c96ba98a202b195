//! The mutation API that appends instructions to a function.
//!
//! Every emitting method validates its operand types first. A type error
//! marks the function [`FunctionState::Failed`]: later calls return
//! [`IrError::FunctionFailed`] and the function can never be sealed.
//!
//! The builder also canonicalizes what it emits so that the same program
//! always produces the same graph:
//!
//! - pure instructions repeated in one block are reused,
//! - scalar/vector arithmetic on constants is folded,
//! - vector/scalar mixes are splatted (float `vector * scalar` and matrix
//!   products excepted), scalar operands of commutative float products
//!   move to the right,
//! - `&`, `|` and `^` on booleans become logical operators,
//! - signed/unsigned conversions become bitcasts, and conversions from or
//!   to `bool` become selects and comparisons,
//! - single-component swizzles become extracts and identity swizzles
//!   disappear,
//! - constructors that repeat one scalar become splats.

use crate::Module;
use crate::arena::Handle;
use crate::constant::{Constant, ConstantInterner, Literal, composite_member_types};
use crate::diagnostic::Source;
use crate::error::IrError;
use crate::fold;
use crate::func::{Function, FunctionState};
use crate::global::{GlobalVariable, StorageClass};
use crate::instruction::{
    AccessIndex, AccessStep, BinaryOp, Block, Instruction, MathFunction, Op, SwitchCase,
    SwizzleComponent, UnaryOp, Value, ValueDef,
};
use crate::types::{AccessMode, ArraySize, Scalar, ScalarKind, Type, TypeInterner, VectorSize};

/// Knobs controlling builder canonicalization.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BuildOptions {
    /// Fold arithmetic on constant operands.
    pub fold_constants: bool,
    /// Reuse identical pure instructions and constant values.
    pub deduplicate: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            fold_constants: true,
            deduplicate: true,
        }
    }
}

impl BuildOptions {
    /// No folding and no deduplication: the graph mirrors the calls made.
    pub fn verbatim() -> Self {
        Self {
            fold_constants: false,
            deduplicate: false,
        }
    }
}

/// Appends instructions to one function of a module.
pub struct Builder<'m> {
    module: &'m mut Module,
    function: Handle<Function>,
    options: BuildOptions,
    source: Option<Source>,
}

type Shape = (Scalar, Option<VectorSize>);

impl<'m> Builder<'m> {
    pub(crate) fn new(
        module: &'m mut Module,
        function: Handle<Function>,
        options: BuildOptions,
    ) -> Result<Self, IrError> {
        let size = module.functions.len();
        let func = module
            .functions
            .try_get_mut(function)
            .ok_or(IrError::BadHandle {
                index: function.index(),
                size,
            })?;
        match func.state {
            FunctionState::Sealed => {
                return Err(IrError::InvalidState(format!(
                    "function `{}` is already sealed",
                    func.name
                )));
            }
            FunctionState::Failed => {
                return Err(IrError::FunctionFailed {
                    function: func.name.clone(),
                });
            }
            FunctionState::Empty => {
                let entry = func.blocks.append(Block::default());
                func.entry = Some(entry);
                func.cursor = Some(entry);
                func.state = FunctionState::InProgress;
                log::debug!("started building `{}`", func.name);
            }
            FunctionState::InProgress => {}
        }
        Ok(Self {
            module,
            function,
            options,
            source: None,
        })
    }

    /// Read access to the module under construction.
    pub fn module(&self) -> &Module {
        self.module
    }

    /// Mutable access to the interners, for creating types and constants.
    pub fn interners(&mut self) -> (&mut TypeInterner, &mut ConstantInterner) {
        (&mut self.module.types, &mut self.module.constants)
    }

    pub fn function(&self) -> Handle<Function> {
        self.function
    }

    pub fn options(&self) -> BuildOptions {
        self.options
    }

    fn func(&self) -> &Function {
        &self.module.functions[self.function]
    }

    fn func_mut(&mut self) -> &mut Function {
        &mut self.module.functions[self.function]
    }

    fn ensure_active(&self) -> Result<(), IrError> {
        let func = self.func();
        match func.state {
            FunctionState::InProgress => Ok(()),
            FunctionState::Failed => Err(IrError::FunctionFailed {
                function: func.name.clone(),
            }),
            _ => Err(IrError::InvalidState(format!(
                "function `{}` is not being built",
                func.name
            ))),
        }
    }

    /// Records an operand type violation and poisons the function.
    fn fail(&mut self, op: &'static str, reason: impl Into<String>) -> IrError {
        let reason = reason.into();
        let func = self.func_mut();
        func.state = FunctionState::Failed;
        log::debug!("`{}` failed at `{op}`: {reason}", func.name);
        IrError::IrType { op, reason }
    }

    fn type_name(&self, ty: Handle<Type>) -> String {
        self.module.types.type_name(ty)
    }

    /// Type of `value`.
    pub fn value_type(&self, value: Handle<Value>) -> Result<Handle<Type>, IrError> {
        let values = &self.func().values;
        values
            .try_get(value)
            .map(|v| v.ty)
            .ok_or(IrError::BadHandle {
                index: value.index(),
                size: values.len(),
            })
    }

    fn operand(&self, value: Handle<Value>) -> Result<(Handle<Type>, Type), IrError> {
        let ty = self.value_type(value)?;
        Ok((ty, self.module.types[ty].clone()))
    }

    fn shape(&self, ty: Handle<Type>) -> Option<Shape> {
        match self.module.types[ty] {
            Type::Scalar(s) => Some((s, None)),
            Type::Vector { size, scalar } => Some((scalar, Some(size))),
            _ => None,
        }
    }

    fn shape_type(&mut self, scalar: Scalar, size: Option<VectorSize>) -> Result<Handle<Type>, IrError> {
        match size {
            None => self.module.types.scalar(scalar),
            Some(size) => self.module.types.intern(Type::Vector { size, scalar }),
        }
    }

    /// The constant a value was materialized from, if any.
    pub fn constant_of(&self, value: Handle<Value>) -> Option<Handle<Constant>> {
        match self.func().values.try_get(value)?.def {
            ValueDef::Constant(c) => Some(c),
            _ => None,
        }
    }

    fn literals_of(&self, value: Handle<Value>) -> Option<Vec<Literal>> {
        let constant = self.constant_of(value)?;
        self.module
            .constants
            .components(&self.module.types, constant)
    }

    fn current(&self) -> Result<Handle<Block>, IrError> {
        let func = self.func();
        let block = func
            .cursor
            .ok_or_else(|| IrError::InvalidState("no insertion block".into()))?;
        if func.terminator(block).is_some() {
            return Err(IrError::BlockTerminated {
                block: block.index(),
            });
        }
        Ok(block)
    }

    fn emit(&mut self, op: Op, ty: Handle<Type>) -> Result<Handle<Value>, IrError> {
        self.ensure_active()?;
        let block = self.current()?;
        let dedup = self.options.deduplicate && op.is_pure();
        let source = self.source;
        let func = self.func_mut();
        if dedup && let Some(&existing) = func.pure_values.get(&(block, op.clone(), ty)) {
            return Ok(existing);
        }
        let inst = func.instructions.next_handle();
        let value = func.values.append(Value {
            ty,
            def: ValueDef::Instruction(inst),
            name: None,
        });
        let key = dedup.then(|| (block, op.clone(), ty));
        func.instructions.append(Instruction {
            op,
            result: Some(value),
            block,
            source,
        });
        func.blocks[block].instructions.push(inst);
        if let Some(key) = key {
            func.pure_values.insert(key, value);
        }
        Ok(value)
    }

    fn emit_void(&mut self, op: Op) -> Result<(), IrError> {
        self.ensure_active()?;
        let block = self.current()?;
        let source = self.source;
        let func = self.func_mut();
        let inst = func.instructions.append(Instruction {
            op,
            result: None,
            block,
            source,
        });
        func.blocks[block].instructions.push(inst);
        Ok(())
    }

    fn check_block(&mut self, op: &'static str, block: Handle<Block>) -> Result<(), IrError> {
        if self.func().blocks.contains(block) {
            Ok(())
        } else {
            Err(self.fail(op, format!("block {} does not exist", block.index())))
        }
    }

    // ---- values without instructions -------------------------------------------------

    /// Materializes a module constant as a value.
    pub fn constant(&mut self, constant: Handle<Constant>) -> Result<Handle<Value>, IrError> {
        self.ensure_active()?;
        let ty = self
            .module
            .constants
            .try_get(constant)
            .ok_or(IrError::BadHandle {
                index: constant.index(),
                size: self.module.constants.len(),
            })?
            .ty();
        let dedup = self.options.deduplicate;
        let func = self.func_mut();
        if dedup && let Some(&existing) = func.constant_values.get(&constant) {
            return Ok(existing);
        }
        let value = func.values.append(Value {
            ty,
            def: ValueDef::Constant(constant),
            name: None,
        });
        if dedup {
            func.constant_values.insert(constant, value);
        }
        Ok(value)
    }

    /// Materializes a literal as a value.
    pub fn literal(&mut self, literal: Literal) -> Result<Handle<Value>, IrError> {
        let constant = self
            .module
            .constants
            .literal(&mut self.module.types, literal);
        self.constant(constant)
    }

    /// A pointer value referring to a global variable.
    pub fn global(&mut self, global: Handle<GlobalVariable>) -> Result<Handle<Value>, IrError> {
        self.ensure_active()?;
        let ty = self
            .module
            .global_variables
            .try_get(global)
            .ok_or(IrError::BadHandle {
                index: global.index(),
                size: self.module.global_variables.len(),
            })?
            .pointer_ty;
        let dedup = self.options.deduplicate;
        let func = self.func_mut();
        if dedup && let Some(&existing) = func.global_values.get(&global) {
            return Ok(existing);
        }
        let value = func.values.append(Value {
            ty,
            def: ValueDef::Global(global),
            name: None,
        });
        if dedup {
            func.global_values.insert(global, value);
        }
        Ok(value)
    }

    /// The value of the `index`-th parameter.
    pub fn parameter(&self, index: usize) -> Result<Handle<Value>, IrError> {
        self.ensure_active()?;
        let func = self.func();
        func.parameter_value(index).ok_or_else(|| {
            IrError::InvalidState(format!("function `{}` has no parameter {index}", func.name))
        })
    }

    /// Attaches a debug name to a value.
    pub fn name_value(&mut self, value: Handle<Value>, name: impl Into<String>) {
        if let Some(v) = self.func_mut().values.try_get_mut(value) {
            v.name = Some(name.into());
        }
    }

    /// Source location recorded on subsequently emitted instructions.
    pub fn set_source(&mut self, source: Option<Source>) {
        self.source = source;
    }

    // ---- blocks ---------------------------------------------------------------------------

    pub fn create_block(&mut self) -> Result<Handle<Block>, IrError> {
        self.ensure_active()?;
        Ok(self.func_mut().blocks.append(Block::default()))
    }

    /// Moves the insertion point to the end of `block`.
    pub fn set_block(&mut self, block: Handle<Block>) -> Result<(), IrError> {
        self.ensure_active()?;
        let func = self.func_mut();
        if !func.blocks.contains(block) {
            return Err(IrError::BadHandle {
                index: block.index(),
                size: func.blocks.len(),
            });
        }
        func.cursor = Some(block);
        Ok(())
    }

    pub fn current_block(&self) -> Option<Handle<Block>> {
        self.func().cursor
    }

    pub fn entry_block(&self) -> Option<Handle<Block>> {
        self.func().entry
    }

    /// Returns `true` once `block` ends with a terminator.
    pub fn is_terminated(&self, block: Handle<Block>) -> bool {
        self.func().terminator(block).is_some()
    }

    // ---- arithmetic -----------------------------------------------------------------------

    fn constant_from_literals(
        &mut self,
        ty: Handle<Type>,
        literals: &[Literal],
    ) -> Result<Handle<Value>, IrError> {
        let Module {
            types, constants, ..
        } = &mut *self.module;
        let constant = match types[ty] {
            Type::Scalar(_) => constants.literal(types, literals[0]),
            _ => {
                let children = literals
                    .iter()
                    .map(|&lit| constants.literal(types, lit))
                    .collect();
                constants.composite(types, ty, children)?
            }
        };
        self.constant(constant)
    }

    pub fn unary(&mut self, op: UnaryOp, operand: Handle<Value>) -> Result<Handle<Value>, IrError> {
        self.ensure_active()?;
        let ty = self.value_type(operand)?;
        let Some((scalar, _)) = self.shape(ty) else {
            let found = self.type_name(ty);
            return Err(self.fail("unary", format!("operand must be a scalar or vector, found {found}")));
        };
        let ok = match op {
            UnaryOp::Negate => matches!(scalar.kind, ScalarKind::Sint | ScalarKind::Float),
            UnaryOp::LogicalNot => scalar.kind == ScalarKind::Bool,
            UnaryOp::BitwiseNot => scalar.is_integer(),
        };
        if !ok {
            let found = self.type_name(ty);
            return Err(self.fail("unary", format!("{op:?} is not defined for {found}")));
        }
        if self.options.fold_constants
            && let Some(lits) = self.literals_of(operand)
            && let Some(folded) = fold::unary(op, &lits)
        {
            log::debug!("folded {op:?}");
            return self.constant_from_literals(ty, &folded);
        }
        self.emit(Op::Unary { op, operand }, ty)
    }

    fn binary_result_type(
        &mut self,
        op: BinaryOp,
        lt: Handle<Type>,
        rt: Handle<Type>,
    ) -> Result<Handle<Type>, String> {
        let names = |this: &Self| format!("{} and {}", this.type_name(lt), this.type_name(rt));
        let left = self.module.types[lt].clone();
        let right = self.module.types[rt].clone();

        if matches!(op, BinaryOp::Add | BinaryOp::Subtract | BinaryOp::Multiply)
            && (matches!(left, Type::Matrix { .. }) || matches!(right, Type::Matrix { .. }))
        {
            let types = &mut self.module.types;
            return match (op, &left, &right) {
                (BinaryOp::Add | BinaryOp::Subtract, Type::Matrix { .. }, _) if lt == rt => Ok(lt),
                (
                    BinaryOp::Multiply,
                    Type::Matrix {
                        columns, rows, ..
                    },
                    Type::Matrix {
                        columns: k,
                        rows: inner,
                        ..
                    },
                ) if inner == columns => types
                    .intern(Type::Matrix {
                        columns: *k,
                        rows: *rows,
                        scalar: Scalar::F32,
                    })
                    .map_err(|e| e.to_string()),
                (
                    BinaryOp::Multiply,
                    Type::Matrix { columns, rows, .. },
                    Type::Vector { size, scalar },
                ) if size == columns && *scalar == Scalar::F32 => types
                    .intern(Type::Vector {
                        size: *rows,
                        scalar: Scalar::F32,
                    })
                    .map_err(|e| e.to_string()),
                (
                    BinaryOp::Multiply,
                    Type::Vector { size, scalar },
                    Type::Matrix { columns, rows, .. },
                ) if size == rows && *scalar == Scalar::F32 => types
                    .intern(Type::Vector {
                        size: *columns,
                        scalar: Scalar::F32,
                    })
                    .map_err(|e| e.to_string()),
                (BinaryOp::Multiply, Type::Matrix { .. }, Type::Scalar(Scalar::F32)) => Ok(lt),
                (BinaryOp::Multiply, Type::Scalar(Scalar::F32), Type::Matrix { .. }) => Ok(rt),
                _ => Err(format!("incompatible operands {}", names(self))),
            };
        }

        let (Some((ls, lsize)), Some((rs, rsize))) = (self.shape(lt), self.shape(rt)) else {
            return Err(format!("operands must be scalars or vectors, found {}", names(self)));
        };
        match op {
            BinaryOp::ShiftLeft | BinaryOp::ShiftRight => {
                if !ls.is_integer() || rs != Scalar::U32 || lsize != rsize {
                    return Err(format!(
                        "shift needs an integer and a matching u32 amount, found {}",
                        names(self)
                    ));
                }
                return Ok(lt);
            }
            _ if ls != rs => {
                return Err(format!("operand types differ: {}", names(self)));
            }
            _ => {}
        }
        let scalar = ls;
        let mixed = lsize != rsize;
        let size = lsize.or(rsize);
        match op {
            BinaryOp::Add
            | BinaryOp::Subtract
            | BinaryOp::Multiply
            | BinaryOp::Divide
            | BinaryOp::Modulo => {
                if !scalar.is_numeric() {
                    return Err(format!("arithmetic on {}", names(self)));
                }
                if mixed && lsize.is_some() && rsize.is_some() {
                    return Err(format!("vector sizes differ: {}", names(self)));
                }
                Ok(if lsize.is_some() { lt } else { rt })
            }
            BinaryOp::Equal | BinaryOp::NotEqual => {
                if mixed {
                    return Err(format!("comparison of {}", names(self)));
                }
                self.shape_type(Scalar::BOOL, size).map_err(|e| e.to_string())
            }
            BinaryOp::Less | BinaryOp::LessEqual | BinaryOp::Greater | BinaryOp::GreaterEqual => {
                if mixed || !scalar.is_numeric() {
                    return Err(format!("ordering of {}", names(self)));
                }
                self.shape_type(Scalar::BOOL, size).map_err(|e| e.to_string())
            }
            BinaryOp::LogicalAnd | BinaryOp::LogicalOr => {
                if mixed || scalar.kind != ScalarKind::Bool {
                    return Err(format!("logical operator on {}", names(self)));
                }
                Ok(lt)
            }
            BinaryOp::BitwiseAnd | BinaryOp::BitwiseOr | BinaryOp::BitwiseXor => {
                if mixed || scalar.kind == ScalarKind::Float {
                    return Err(format!("bitwise operator on {}", names(self)));
                }
                Ok(lt)
            }
            BinaryOp::ShiftLeft | BinaryOp::ShiftRight => Ok(lt),
        }
    }

    pub fn binary(
        &mut self,
        op: BinaryOp,
        left: Handle<Value>,
        right: Handle<Value>,
    ) -> Result<Handle<Value>, IrError> {
        self.ensure_active()?;
        let lt = self.value_type(left)?;
        let rt = self.value_type(right)?;
        let ty = match self.binary_result_type(op, lt, rt) {
            Ok(ty) => ty,
            Err(reason) => return Err(self.fail("binary", reason)),
        };

        let is_bool = self.shape(lt).is_some_and(|(s, _)| s.kind == ScalarKind::Bool);
        let op = match op {
            BinaryOp::BitwiseAnd if is_bool => BinaryOp::LogicalAnd,
            BinaryOp::BitwiseOr if is_bool => BinaryOp::LogicalOr,
            BinaryOp::BitwiseXor if is_bool => BinaryOp::NotEqual,
            other => other,
        };

        if self.options.fold_constants
            && let (Some(l), Some(r)) = (self.literals_of(left), self.literals_of(right))
            && let Some(folded) = fold::binary(op, &l, &r)
        {
            log::debug!("folded {op:?}");
            return self.constant_from_literals(ty, &folded);
        }

        let (mut left, mut right) = (left, right);
        let left_shape = self.shape(lt);
        let right_shape = self.shape(rt);
        let is_float = left_shape.is_some_and(|(s, _)| s.kind == ScalarKind::Float);
        match (left_shape, right_shape) {
            (Some((_, None)), Some((_, Some(_)))) if op == BinaryOp::Multiply && is_float => {
                std::mem::swap(&mut left, &mut right);
            }
            (Some((_, Some(size))), Some((_, None))) if !(op == BinaryOp::Multiply && is_float) => {
                if !matches!(op, BinaryOp::ShiftLeft | BinaryOp::ShiftRight) {
                    right = self.splat(size as u32, right)?;
                }
            }
            (Some((_, None)), Some((_, Some(size)))) => {
                left = self.splat(size as u32, left)?;
            }
            (Some((Scalar::F32, None)), None) if op == BinaryOp::Multiply => {
                // scalar * matrix
                std::mem::swap(&mut left, &mut right);
            }
            _ => {}
        }
        self.emit(Op::Binary { op, left, right }, ty)
    }

    // ---- memory ---------------------------------------------------------------------------

    /// Declares a function-local variable at the head of the entry block.
    pub fn local_variable(
        &mut self,
        ty: Handle<Type>,
        init: Option<Handle<Constant>>,
    ) -> Result<Handle<Value>, IrError> {
        self.ensure_active()?;
        if self.module.types.try_get(ty).is_none() {
            return Err(IrError::BadHandle {
                index: ty.index(),
                size: self.module.types.len(),
            });
        }
        if !self.module.types.is_constructible(ty) {
            let found = self.type_name(ty);
            return Err(self.fail("variable", format!("{found} cannot be stored in a variable")));
        }
        if let Some(init) = init {
            let init_ty = self.module.constants.try_get(init).map(Constant::ty);
            if init_ty != Some(ty) {
                let expected = self.type_name(ty);
                return Err(self.fail(
                    "variable",
                    format!("initializer does not have type {expected}"),
                ));
            }
        }
        let pointer_ty = self.module.types.pointer(ty, StorageClass::Function)?;
        let source = self.source;
        let func = self.func_mut();
        let entry = func
            .entry
            .ok_or_else(|| IrError::InvalidState("function has no entry block".into()))?;
        let inst = func.instructions.next_handle();
        let value = func.values.append(Value {
            ty: pointer_ty,
            def: ValueDef::Instruction(inst),
            name: None,
        });
        func.instructions.append(Instruction {
            op: Op::Variable { init },
            result: Some(value),
            block: entry,
            source,
        });
        let at = func.variable_count;
        func.blocks[entry].instructions.insert(at, inst);
        func.variable_count += 1;
        Ok(value)
    }

    fn pointee(
        &mut self,
        op: &'static str,
        pointer: Handle<Value>,
    ) -> Result<(Handle<Type>, StorageClass, AccessMode), IrError> {
        let (ty, inner) = self.operand(pointer)?;
        match inner {
            Type::Pointer {
                base,
                space,
                access,
            } => Ok((base, space, access)),
            _ => {
                let found = self.type_name(ty);
                Err(self.fail(op, format!("expected a pointer, found {found}")))
            }
        }
    }

    pub fn load(&mut self, pointer: Handle<Value>) -> Result<Handle<Value>, IrError> {
        self.ensure_active()?;
        let (base, _, access) = self.pointee("load", pointer)?;
        if !access.can_read() {
            return Err(self.fail("load", "pointer is write-only"));
        }
        if matches!(
            self.module.types[base],
            Type::Array {
                size: ArraySize::Dynamic,
                ..
            }
        ) {
            return Err(self.fail("load", "cannot load a runtime-sized array"));
        }
        self.emit(Op::Load { pointer }, base)
    }

    pub fn store(&mut self, pointer: Handle<Value>, value: Handle<Value>) -> Result<(), IrError> {
        self.ensure_active()?;
        let (base, _, access) = self.pointee("store", pointer)?;
        if !access.can_write() {
            return Err(self.fail("store", "pointer is read-only"));
        }
        let ty = self.value_type(value)?;
        if ty != base {
            let (expected, found) = (self.type_name(base), self.type_name(ty));
            return Err(self.fail("store", format!("storing {found} through a pointer to {expected}")));
        }
        self.emit_void(Op::Store { pointer, value })
    }

    fn index_step(
        &mut self,
        op: &'static str,
        current: Handle<Type>,
        index: AccessIndex,
    ) -> Result<Handle<Type>, IrError> {
        let current = self.module.types.strip_access(current);
        let inner = self.module.types[current].clone();
        let (element, bound) = match inner {
            Type::Vector { size, scalar } => (Some(self.module.types.scalar(scalar)?), Some(size as u32)),
            Type::Matrix {
                columns,
                rows,
                scalar,
            } => (
                Some(self.module.types.intern(Type::Vector { size: rows, scalar })?),
                Some(columns as u32),
            ),
            Type::Array { base, size, .. } => (
                Some(base),
                match size {
                    ArraySize::Constant(n) => Some(n),
                    ArraySize::Dynamic => None,
                },
            ),
            Type::Struct(ref st) => match index {
                AccessIndex::Constant(i) => match st.members.get(i as usize) {
                    Some(member) => return Ok(member.ty),
                    None => {
                        return Err(self.fail(
                            op,
                            format!("struct `{}` has no member {i}", st.name),
                        ));
                    }
                },
                AccessIndex::Dynamic(_) => {
                    return Err(self.fail(op, "struct members need a constant index"));
                }
            },
            _ => (None, None),
        };
        let Some(element) = element else {
            let found = self.type_name(current);
            return Err(self.fail(op, format!("{found} cannot be indexed")));
        };
        match index {
            AccessIndex::Constant(i) => {
                if let Some(bound) = bound
                    && i >= bound
                {
                    return Err(self.fail(op, format!("index {i} is out of bounds for {bound} elements")));
                }
            }
            AccessIndex::Dynamic(value) => {
                let ty = self.value_type(value)?;
                if !matches!(self.module.types[ty], Type::Scalar(s) if s.is_integer()) {
                    let found = self.type_name(ty);
                    return Err(self.fail(op, format!("index must be i32 or u32, found {found}")));
                }
            }
        }
        Ok(element)
    }

    /// Pointer to an element of the aggregate `base` points to.
    ///
    /// Constant dynamic indices become constant steps, and a chain based on
    /// another chain is flattened into a single instruction.
    pub fn access_chain(
        &mut self,
        base: Handle<Value>,
        indices: &[AccessIndex],
    ) -> Result<Handle<Value>, IrError> {
        self.ensure_active()?;
        let (mut current, space, access) = self.pointee("access_chain", base)?;
        if indices.is_empty() {
            return Ok(base);
        }

        let (root, mut steps) = match self.func().values[base].def {
            ValueDef::Instruction(inst) => match &self.func().instructions[inst].op {
                Op::AccessChain { base, steps } => (*base, steps.clone()),
                _ => (base, Vec::new()),
            },
            _ => (base, Vec::new()),
        };

        for &index in indices {
            let index = match index {
                AccessIndex::Dynamic(value) => match self.literals_of(value).as_deref() {
                    Some([Literal::U32(i)]) => AccessIndex::Constant(*i),
                    Some([Literal::I32(i)]) if *i >= 0 => AccessIndex::Constant(*i as u32),
                    Some([Literal::I32(i)]) => {
                        let i = *i;
                        return Err(self.fail("access_chain", format!("negative index {i}")));
                    }
                    _ => index,
                },
                constant => constant,
            };
            current = self.index_step("access_chain", current, index)?;
            steps.push(AccessStep { index, ty: current });
        }

        let pointer_ty = self
            .module
            .types
            .pointer_with_access(current, space, access)?;
        self.emit(Op::AccessChain { base: root, steps }, pointer_ty)
    }

    /// Element of a composite value.
    pub fn extract(
        &mut self,
        composite: Handle<Value>,
        indices: &[u32],
    ) -> Result<Handle<Value>, IrError> {
        self.ensure_active()?;
        let mut current = self.value_type(composite)?;
        if indices.is_empty() {
            return Ok(composite);
        }
        if self.module.types[current].is_pointer() {
            return Err(self.fail("extract", "cannot extract from a pointer; use access_chain"));
        }
        for &i in indices {
            current = self.index_step("extract", current, AccessIndex::Constant(i))?;
        }
        self.emit(
            Op::Extract {
                composite,
                indices: indices.to_vec(),
            },
            current,
        )
    }

    // ---- construction ---------------------------------------------------------------------

    /// Builds a composite of type `ty`.
    ///
    /// Vectors may mix scalars and smaller vectors; a single scalar or a
    /// repeated scalar becomes a splat.
    pub fn construct(
        &mut self,
        ty: Handle<Type>,
        components: &[Handle<Value>],
    ) -> Result<Handle<Value>, IrError> {
        self.ensure_active()?;
        if self.module.types.try_get(ty).is_none() {
            return Err(IrError::BadHandle {
                index: ty.index(),
                size: self.module.types.len(),
            });
        }
        let mut component_types = Vec::with_capacity(components.len());
        for &c in components {
            component_types.push(self.value_type(c)?);
        }

        if let Type::Vector { size, scalar } = self.module.types[ty] {
            let mut count = 0;
            for &ct in &component_types {
                match self.shape(ct) {
                    Some((s, n)) if s == scalar => count += n.map_or(1, |n| n as u32),
                    _ => {
                        let (expected, found) = (self.type_name(ty), self.type_name(ct));
                        return Err(self.fail(
                            "construct",
                            format!("{found} cannot be a component of {expected}"),
                        ));
                    }
                }
            }
            let all_same_scalar = component_types
                .first()
                .is_some_and(|&first| self.shape(first).is_some_and(|(_, n)| n.is_none()))
                && components.iter().all(|&c| c == components[0]);
            if (components.len() == 1 && count == 1) || (all_same_scalar && count == size as u32) {
                return self.splat(size as u32, components[0]);
            }
            if count != size as u32 {
                let expected = self.type_name(ty);
                return Err(self.fail(
                    "construct",
                    format!("{expected} needs {} components, found {count}", size as u32),
                ));
            }
        } else {
            let expected = match composite_member_types(&self.module.types, ty) {
                Ok(expected) => expected,
                Err(_) => {
                    let found = self.type_name(ty);
                    return Err(self.fail("construct", format!("{found} is not a composite type")));
                }
            };
            if expected.len() != components.len() {
                let name = self.type_name(ty);
                return Err(self.fail(
                    "construct",
                    format!("{name} needs {} components, found {}", expected.len(), components.len()),
                ));
            }
            for (&want, &found) in expected.iter().zip(&component_types) {
                if want != found {
                    let (want, found) = (self.type_name(want), self.type_name(found));
                    return Err(self.fail("construct", format!("expected {want}, found {found}")));
                }
            }
        }

        if self.options.fold_constants {
            let children: Option<Vec<_>> = components.iter().map(|&c| self.constant_of(c)).collect();
            let exact = composite_member_types(&self.module.types, ty)
                .is_ok_and(|expected| expected == component_types);
            if let Some(children) = children
                && exact
            {
                let Module {
                    types, constants, ..
                } = &mut *self.module;
                let constant = constants.composite(types, ty, children)?;
                return self.constant(constant);
            }
        }

        self.emit(
            Op::Construct {
                components: components.to_vec(),
            },
            ty,
        )
    }

    /// A vector with every component equal to the scalar `value`.
    pub fn splat(&mut self, width: u32, value: Handle<Value>) -> Result<Handle<Value>, IrError> {
        self.ensure_active()?;
        let ty = self.value_type(value)?;
        let Type::Scalar(scalar) = self.module.types[ty] else {
            let found = self.type_name(ty);
            return Err(self.fail("splat", format!("splat needs a scalar, found {found}")));
        };
        let vector = match self.module.types.vector(scalar, width) {
            Ok(v) => v,
            Err(e) => return Err(self.fail("splat", e.to_string())),
        };
        if self.options.fold_constants
            && let Some(c) = self.constant_of(value)
        {
            let Module {
                types, constants, ..
            } = &mut *self.module;
            let constant = constants.composite(types, vector, vec![c; width as usize])?;
            return self.constant(constant);
        }
        self.emit(Op::Splat { value }, vector)
    }

    /// Selects vector components by `pattern`.
    pub fn swizzle(
        &mut self,
        vector: Handle<Value>,
        pattern: &[SwizzleComponent],
    ) -> Result<Handle<Value>, IrError> {
        self.ensure_active()?;
        let ty = self.value_type(vector)?;
        let Type::Vector { size, scalar } = self.module.types[ty] else {
            let found = self.type_name(ty);
            return Err(self.fail("swizzle", format!("swizzle needs a vector, found {found}")));
        };
        if pattern.is_empty() || pattern.len() > 4 {
            return Err(self.fail("swizzle", format!("{} components selected", pattern.len())));
        }
        if let Some(c) = pattern.iter().find(|c| **c as u32 >= size as u32) {
            let letter = c.letter();
            return Err(self.fail("swizzle", format!("component `{letter}` is out of range")));
        }
        if pattern.len() == 1 {
            return self.extract(vector, &[pattern[0] as u32]);
        }
        if pattern.len() == size as usize && pattern.iter().enumerate().all(|(i, c)| *c as usize == i) {
            return Ok(vector);
        }
        let result = self.module.types.vector(scalar, pattern.len() as u32)?;
        self.emit(
            Op::Swizzle {
                vector,
                pattern: pattern.to_vec(),
            },
            result,
        )
    }

    pub fn select(
        &mut self,
        condition: Handle<Value>,
        accept: Handle<Value>,
        reject: Handle<Value>,
    ) -> Result<Handle<Value>, IrError> {
        self.ensure_active()?;
        let ct = self.value_type(condition)?;
        let at = self.value_type(accept)?;
        let rt = self.value_type(reject)?;
        if at != rt {
            let (a, r) = (self.type_name(at), self.type_name(rt));
            return Err(self.fail("select", format!("branches differ: {a} and {r}")));
        }
        let value_shape = self.shape(at);
        match (self.shape(ct), value_shape) {
            (Some((Scalar::BOOL, None)), Some(_)) => {}
            (Some((Scalar::BOOL, Some(n))), Some((_, Some(m)))) if n == m => {}
            _ => {
                let (c, a) = (self.type_name(ct), self.type_name(at));
                return Err(self.fail("select", format!("cannot select {a} with {c}")));
            }
        }
        self.emit(
            Op::Select {
                condition,
                accept,
                reject,
            },
            at,
        )
    }

    /// Numeric conversion of `value` to the scalar kind of `target`.
    pub fn convert(&mut self, value: Handle<Value>, target: Handle<Type>) -> Result<Handle<Value>, IrError> {
        self.ensure_active()?;
        let ty = self.value_type(value)?;
        if ty == target {
            return Ok(value);
        }
        let (Some((from, from_size)), Some((to, to_size))) = (self.shape(ty), self.shape(target)) else {
            let (f, t) = (self.type_name(ty), self.type_name(target));
            return Err(self.fail("convert", format!("cannot convert {f} to {t}")));
        };
        if from_size != to_size {
            let (f, t) = (self.type_name(ty), self.type_name(target));
            return Err(self.fail("convert", format!("cannot convert {f} to {t}")));
        }
        match (from.kind, to.kind) {
            (ScalarKind::Sint, ScalarKind::Uint) | (ScalarKind::Uint, ScalarKind::Sint) => {
                self.bitcast(value, target)
            }
            (ScalarKind::Bool, _) => {
                let one = self.shaped_literal(to, to_size, one_of(to))?;
                let zero = self.shaped_literal(to, to_size, Literal::zero(to))?;
                self.select(value, one, zero)
            }
            (_, ScalarKind::Bool) => {
                let zero = self.shaped_literal(from, from_size, Literal::zero(from))?;
                self.binary(BinaryOp::NotEqual, value, zero)
            }
            _ => self.emit(Op::Convert { value }, target),
        }
    }

    fn shaped_literal(
        &mut self,
        scalar: Scalar,
        size: Option<VectorSize>,
        literal: Literal,
    ) -> Result<Handle<Value>, IrError> {
        debug_assert_eq!(literal.scalar(), scalar);
        let Module {
            types, constants, ..
        } = &mut *self.module;
        let component = constants.literal(types, literal);
        let constant = match size {
            None => component,
            Some(size) => {
                let ty = types.vector(scalar, size as u32)?;
                constants.composite(types, ty, vec![component; size as usize])?
            }
        };
        self.constant(constant)
    }

    /// Reinterprets the bits of `value` as `target`.
    pub fn bitcast(&mut self, value: Handle<Value>, target: Handle<Type>) -> Result<Handle<Value>, IrError> {
        self.ensure_active()?;
        let ty = self.value_type(value)?;
        if ty == target {
            return Ok(value);
        }
        match (self.shape(ty), self.shape(target)) {
            (Some((from, n)), Some((to, m)))
                if n == m && from.is_numeric() && to.is_numeric() && from.width == to.width => {}
            _ => {
                let (f, t) = (self.type_name(ty), self.type_name(target));
                return Err(self.fail("bitcast", format!("cannot bitcast {f} to {t}")));
            }
        }
        self.emit(Op::Bitcast { value }, target)
    }

    /// Calls `function`. Returns `None` for void functions.
    pub fn call(
        &mut self,
        function: Handle<Function>,
        arguments: &[Handle<Value>],
    ) -> Result<Option<Handle<Value>>, IrError> {
        self.ensure_active()?;
        let Some(callee) = self.module.functions.try_get(function) else {
            return Err(self.fail("call", format!("function {} does not exist", function.index())));
        };
        if callee.is_entry_point() {
            let name = callee.name.clone();
            return Err(self.fail("call", format!("entry point `{name}` cannot be called")));
        }
        let params: Vec<_> = callee.parameters.iter().map(|p| p.ty).collect();
        let (callee_name, return_type) = (callee.name.clone(), callee.return_type);
        if params.len() != arguments.len() {
            return Err(self.fail(
                "call",
                format!(
                    "`{callee_name}` takes {} arguments, {} given",
                    params.len(),
                    arguments.len()
                ),
            ));
        }
        for (i, (&want, &arg)) in params.iter().zip(arguments).enumerate() {
            let found = self.value_type(arg)?;
            if found != want {
                let (want, found) = (self.type_name(want), self.type_name(found));
                return Err(self.fail(
                    "call",
                    format!("argument {i} of `{callee_name}`: expected {want}, found {found}"),
                ));
            }
        }
        let op = Op::Call {
            function,
            arguments: arguments.to_vec(),
        };
        if matches!(self.module.types[return_type], Type::Void) {
            self.emit_void(op)?;
            Ok(None)
        } else {
            self.emit(op, return_type).map(Some)
        }
    }

    /// Calls a built-in math function.
    pub fn math(
        &mut self,
        fun: MathFunction,
        arguments: &[Handle<Value>],
    ) -> Result<Handle<Value>, IrError> {
        self.ensure_active()?;
        if arguments.len() != fun.arity() {
            return Err(self.fail(
                "math",
                format!("{} takes {} arguments, {} given", fun.name(), fun.arity(), arguments.len()),
            ));
        }
        let first = self.value_type(arguments[0])?;
        for &arg in &arguments[1..] {
            let ty = self.value_type(arg)?;
            if ty != first {
                let (a, b) = (self.type_name(first), self.type_name(ty));
                return Err(self.fail("math", format!("{} arguments differ: {a} and {b}", fun.name())));
            }
        }
        let Some((scalar, size)) = self.shape(first) else {
            let found = self.type_name(first);
            return Err(self.fail("math", format!("{} of {found}", fun.name())));
        };
        let float_only = !matches!(
            fun,
            MathFunction::Abs | MathFunction::Min | MathFunction::Max | MathFunction::Clamp
        );
        let valid = match fun {
            MathFunction::Abs => matches!(scalar.kind, ScalarKind::Sint | ScalarKind::Float),
            MathFunction::Cross => size == Some(VectorSize::Tri) && scalar == Scalar::F32,
            MathFunction::Dot | MathFunction::Normalize => size.is_some() && scalar == Scalar::F32,
            _ if float_only => scalar == Scalar::F32,
            _ => scalar.is_numeric(),
        };
        if !valid {
            let found = self.type_name(first);
            return Err(self.fail("math", format!("{} is not defined for {found}", fun.name())));
        }
        let result = match fun {
            MathFunction::Dot | MathFunction::Length | MathFunction::Distance => {
                self.module.types.f32()
            }
            _ => first,
        };
        self.emit(
            Op::Math {
                fun,
                arguments: arguments.to_vec(),
            },
            result,
        )
    }

    // ---- terminators ----------------------------------------------------------------------

    pub fn branch(&mut self, target: Handle<Block>) -> Result<(), IrError> {
        self.ensure_active()?;
        self.check_block("branch", target)?;
        self.emit_void(Op::Branch { target })
    }

    /// Two-way branch; `merge` marks where a structured `if` reconverges.
    pub fn cond_branch(
        &mut self,
        condition: Handle<Value>,
        accept: Handle<Block>,
        reject: Handle<Block>,
        merge: Option<Handle<Block>>,
    ) -> Result<(), IrError> {
        self.ensure_active()?;
        let ty = self.value_type(condition)?;
        if !matches!(self.module.types[ty], Type::Scalar(Scalar::BOOL)) {
            let found = self.type_name(ty);
            return Err(self.fail("cond_branch", format!("condition must be bool, found {found}")));
        }
        for block in [accept, reject].into_iter().chain(merge) {
            self.check_block("cond_branch", block)?;
        }
        self.emit_void(Op::CondBranch {
            condition,
            accept,
            reject,
            merge,
        })
    }

    /// Terminates a loop header block.
    pub fn loop_header(
        &mut self,
        body: Handle<Block>,
        continuing: Handle<Block>,
        merge: Handle<Block>,
    ) -> Result<(), IrError> {
        self.ensure_active()?;
        for block in [body, continuing, merge] {
            self.check_block("loop", block)?;
        }
        self.emit_void(Op::Loop {
            body,
            continuing,
            merge,
        })
    }

    pub fn switch(
        &mut self,
        selector: Handle<Value>,
        cases: Vec<SwitchCase>,
        default: Handle<Block>,
        merge: Option<Handle<Block>>,
    ) -> Result<(), IrError> {
        self.ensure_active()?;
        let ty = self.value_type(selector)?;
        if !matches!(self.module.types[ty], Type::Scalar(s) if s.is_integer()) {
            let found = self.type_name(ty);
            return Err(self.fail("switch", format!("selector must be i32 or u32, found {found}")));
        }
        let mut seen = Vec::new();
        for case in &cases {
            self.check_block("switch", case.target)?;
            for &selector in &case.selectors {
                let selector_ty = self.module.constants.try_get(selector).map(Constant::ty);
                if selector_ty != Some(ty) {
                    let expected = self.type_name(ty);
                    return Err(self.fail("switch", format!("case selector is not {expected}")));
                }
                if seen.contains(&selector) {
                    let name = self.module.constants.name(&self.module.types, selector);
                    return Err(self.fail("switch", format!("duplicate case selector {name}")));
                }
                seen.push(selector);
            }
        }
        for block in std::iter::once(default).chain(merge) {
            self.check_block("switch", block)?;
        }
        self.emit_void(Op::Switch {
            selector,
            cases,
            default,
            merge,
        })
    }

    /// Returns from the function. Return types are checked when sealing.
    pub fn ret(&mut self, value: Option<Handle<Value>>) -> Result<(), IrError> {
        self.ensure_active()?;
        if let Some(v) = value {
            self.value_type(v)?;
        }
        self.emit_void(Op::Return { value })
    }

    pub fn discard(&mut self) -> Result<(), IrError> {
        self.emit_void(Op::Discard)
    }

    pub fn unreachable(&mut self) -> Result<(), IrError> {
        self.emit_void(Op::Unreachable)
    }
}

fn one_of(scalar: Scalar) -> Literal {
    match scalar.kind {
        ScalarKind::Bool => Literal::Bool(true),
        ScalarKind::Sint => Literal::I32(1),
        ScalarKind::Uint => Literal::U32(1),
        ScalarKind::Float => Literal::F32(1.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::func::FunctionDecl;
    use crate::GlobalDecl;
    use crate::types::StructMember;

    fn module_with_main() -> (Module, Handle<Function>) {
        let mut module = Module::new();
        let void = module.types.void();
        let f = module.add_function(FunctionDecl::new("main", void)).unwrap();
        (module, f)
    }

    fn instruction_count(module: &Module, f: Handle<Function>) -> usize {
        module.functions[f].instructions.len()
    }

    #[test]
    fn literals_are_deduplicated_per_function() {
        let (mut module, f) = module_with_main();
        let mut b = module.builder(f).unwrap();
        let a = b.literal(Literal::F32(1.0)).unwrap();
        let c = b.literal(Literal::F32(1.0)).unwrap();
        assert_eq!(a, c);
        let d = b.literal(Literal::I32(1)).unwrap();
        assert_ne!(a, d);
    }

    #[test]
    fn constant_arithmetic_is_folded() {
        let (mut module, f) = module_with_main();
        let mut b = module.builder(f).unwrap();
        let two = b.literal(Literal::I32(2)).unwrap();
        let three = b.literal(Literal::I32(3)).unwrap();
        let sum = b.binary(BinaryOp::Add, two, three).unwrap();
        let five = b.literal(Literal::I32(5)).unwrap();
        assert_eq!(sum, five);
        assert_eq!(instruction_count(&module, f), 0);
    }

    #[test]
    fn folding_can_be_disabled() {
        let (mut module, f) = module_with_main();
        let mut b = module.builder_with_options(f, BuildOptions::verbatim()).unwrap();
        let two = b.literal(Literal::I32(2)).unwrap();
        let sum = b.binary(BinaryOp::Add, two, two).unwrap();
        let again = b.binary(BinaryOp::Add, two, two).unwrap();
        assert_ne!(sum, again);
        assert_eq!(instruction_count(&module, f), 2);
    }

    #[test]
    fn division_by_zero_stays_an_instruction() {
        let (mut module, f) = module_with_main();
        let mut b = module.builder(f).unwrap();
        let one = b.literal(Literal::I32(1)).unwrap();
        let zero = b.literal(Literal::I32(0)).unwrap();
        let q = b.binary(BinaryOp::Divide, one, zero).unwrap();
        assert!(b.constant_of(q).is_none());
    }

    #[test]
    fn pure_instructions_are_reused_within_a_block() {
        let mut module = Module::new();
        let f32_ty = module.types.f32();
        let f = module
            .add_function(FunctionDecl::new("f", f32_ty).parameter("x", f32_ty, None))
            .unwrap();
        let mut b = module.builder(f).unwrap();
        let x = b.parameter(0).unwrap();
        let a = b.binary(BinaryOp::Multiply, x, x).unwrap();
        let c = b.binary(BinaryOp::Multiply, x, x).unwrap();
        assert_eq!(a, c);

        let next = b.create_block().unwrap();
        b.branch(next).unwrap();
        b.set_block(next).unwrap();
        let d = b.binary(BinaryOp::Multiply, x, x).unwrap();
        assert_ne!(a, d);
        b.ret(Some(d)).unwrap();
        module.seal_function(f).unwrap();
    }

    #[test]
    fn type_error_poisons_function() {
        let (mut module, f) = module_with_main();
        let mut b = module.builder(f).unwrap();
        let one = b.literal(Literal::I32(1)).unwrap();
        let half = b.literal(Literal::F32(0.5)).unwrap();
        let err = b.binary(BinaryOp::Add, one, half).unwrap_err();
        assert!(matches!(err, IrError::IrType { op: "binary", .. }), "{err}");
        let err = b.ret(None).unwrap_err();
        assert!(matches!(err, IrError::FunctionFailed { .. }));
        assert_eq!(module.functions[f].state(), FunctionState::Failed);
        assert!(matches!(
            module.seal_function(f),
            Err(IrError::FunctionFailed { .. })
        ));
        assert!(matches!(
            module.builder(f),
            Err(IrError::FunctionFailed { .. })
        ));
    }

    #[test]
    fn signed_unsigned_mix_is_an_error() {
        let (mut module, f) = module_with_main();
        let mut b = module.builder(f).unwrap();
        let i = b.literal(Literal::I32(1)).unwrap();
        let u = b.literal(Literal::U32(1)).unwrap();
        assert!(b.binary(BinaryOp::Less, i, u).is_err());
    }

    #[test]
    fn appending_after_terminator_fails() {
        let (mut module, f) = module_with_main();
        let mut b = module.builder(f).unwrap();
        b.ret(None).unwrap();
        let err = b.unreachable().unwrap_err();
        assert!(matches!(err, IrError::BlockTerminated { block: 0 }));
        // Not a type error: the function can still be sealed.
        module.seal_function(f).unwrap();
    }

    #[test]
    fn variables_go_to_entry_head() {
        let mut module = Module::new();
        let void = module.types.void();
        let f32_ty = module.types.f32();
        let f = module
            .add_function(FunctionDecl::new("f", void).parameter("x", f32_ty, None))
            .unwrap();
        let zero = module.constants.literal(&mut module.types, Literal::F32(0.0));
        let mut b = module.builder(f).unwrap();
        let x = b.parameter(0).unwrap();
        let next = b.create_block().unwrap();
        b.branch(next).unwrap();
        b.set_block(next).unwrap();
        let var = b.local_variable(f32_ty, Some(zero)).unwrap();
        b.store(var, x).unwrap();
        b.ret(None).unwrap();
        module.seal_function(f).unwrap();

        let func = &module.functions[f];
        let entry = func.entry.unwrap();
        let first = func.blocks[entry].instructions[0];
        assert!(matches!(func.instructions[first].op, Op::Variable { init: Some(_) }));
        assert_eq!(
            module.types.type_name(func.values[var].ty),
            "__ptr_function__f32"
        );
    }

    #[test]
    fn access_chain_through_struct_array_and_vector() {
        let mut module = Module::new();
        let f32_ty = module.types.f32();
        let v4 = module.types.vector(Scalar::F32, 4).unwrap();
        let arr = module.types.array(v4, None).unwrap();
        let s = module.types.declare_struct("Particles").unwrap();
        let members = module
            .types
            .layout_members(vec![("count".into(), f32_ty), ("data".into(), arr)])
            .unwrap();
        assert_eq!(
            members,
            vec![
                StructMember {
                    name: "count".into(),
                    ty: f32_ty,
                    offset: 0
                },
                StructMember {
                    name: "data".into(),
                    ty: arr,
                    offset: 16
                },
            ]
        );
        module.types.define_struct(s, members).unwrap();
        let buf = module.types.access_controlled(s, AccessMode::ReadWrite).unwrap();
        let g = module
            .add_global(GlobalDecl::new("particles", StorageClass::Storage, buf).binding(0, 0))
            .unwrap();
        let u32_ty = module.types.u32();
        let void = module.types.void();
        let f = module
            .add_function(FunctionDecl::new("f", void).parameter("i", u32_ty, None))
            .unwrap();
        let mut b = module.builder(f).unwrap();
        let i = b.parameter(0).unwrap();
        let base = b.global(g).unwrap();
        let elem = b
            .access_chain(base, &[AccessIndex::Constant(1), AccessIndex::Dynamic(i)])
            .unwrap();
        let two = b.literal(Literal::U32(2)).unwrap();
        let comp = b.access_chain(elem, &[AccessIndex::Dynamic(two)]).unwrap();
        let value = b.load(comp).unwrap();
        let doubled = b.binary(BinaryOp::Add, value, value).unwrap();
        b.store(comp, doubled).unwrap();
        b.ret(None).unwrap();
        module.seal_function(f).unwrap();

        let func = &module.functions[f];
        let ValueDef::Instruction(inst) = func.values[comp].def else {
            panic!("expected instruction");
        };
        match &func.instructions[inst].op {
            Op::AccessChain { base: root, steps } => {
                assert_eq!(*root, base);
                assert_eq!(steps.len(), 3);
                assert_eq!(steps[2].index, AccessIndex::Constant(2));
                assert_eq!(steps[2].ty, f32_ty);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            module.types.type_name(func.values[comp].ty),
            "__ptr_storage__f32_read_write"
        );
    }

    #[test]
    fn matrix_chain_yields_column_then_scalar() {
        let mut module = Module::new();
        let m = module.types.matrix(3, 2).unwrap();
        let void = module.types.void();
        let f = module.add_function(FunctionDecl::new("f", void)).unwrap();
        let mut b = module.builder(f).unwrap();
        let var = b.local_variable(m, None).unwrap();
        let column = b.access_chain(var, &[AccessIndex::Constant(2)]).unwrap();
        let scalar = b.access_chain(var, &[AccessIndex::Constant(2), AccessIndex::Constant(1)]).unwrap();
        let column_ty = b.value_type(column).unwrap();
        let scalar_ty = b.value_type(scalar).unwrap();
        assert!(b.access_chain(var, &[AccessIndex::Constant(3)]).is_err());
        assert_eq!(module.types.type_name(column_ty), "__ptr_function__vec_2__f32");
        assert_eq!(module.types.type_name(scalar_ty), "__ptr_function__f32");
    }

    #[test]
    fn store_through_read_only_pointer_fails() {
        let mut module = Module::new();
        let f32_ty = module.types.f32();
        let g = module
            .add_global(GlobalDecl::new("params", StorageClass::Uniform, f32_ty).binding(0, 0))
            .unwrap();
        let f = {
            let void = module.types.void();
            module.add_function(FunctionDecl::new("f", void)).unwrap()
        };
        let mut b = module.builder(f).unwrap();
        let p = b.global(g).unwrap();
        let one = b.literal(Literal::F32(1.0)).unwrap();
        assert!(matches!(b.store(p, one), Err(IrError::IrType { op: "store", .. })));
    }

    #[test]
    fn constant_construct_folds_to_composite() {
        let (mut module, f) = module_with_main();
        let v2 = module.types.vector(Scalar::F32, 2).unwrap();
        let mut b = module.builder(f).unwrap();
        let one = b.literal(Literal::F32(1.0)).unwrap();
        let two = b.literal(Literal::F32(2.0)).unwrap();
        let v = b.construct(v2, &[one, two]).unwrap();
        let c = b.constant_of(v).unwrap();
        assert_eq!(
            module.constants.name(&module.types, c),
            "__composite__vec_2__f32(__float1.0, __float2.0)"
        );
    }

    #[test]
    fn repeated_scalar_construct_becomes_splat() {
        let mut module = Module::new();
        let f32_ty = module.types.f32();
        let v3 = module.types.vector(Scalar::F32, 3).unwrap();
        let f = module
            .add_function(FunctionDecl::new("f", v3).parameter("x", f32_ty, None))
            .unwrap();
        let mut b = module.builder(f).unwrap();
        let x = b.parameter(0).unwrap();
        let v = b.construct(v3, &[x, x, x]).unwrap();
        let w = b.construct(v3, &[x]).unwrap();
        assert_eq!(v, w);
        b.ret(Some(v)).unwrap();
        let func = &module.functions[f];
        let ValueDef::Instruction(inst) = func.values[v].def else {
            panic!("expected instruction");
        };
        assert!(matches!(func.instructions[inst].op, Op::Splat { .. }));
    }

    #[test]
    fn vector_construct_from_smaller_vectors() {
        let mut module = Module::new();
        let f32_ty = module.types.f32();
        let v2 = module.types.vector(Scalar::F32, 2).unwrap();
        let v4 = module.types.vector(Scalar::F32, 4).unwrap();
        let f = module
            .add_function(
                FunctionDecl::new("f", v4)
                    .parameter("xy", v2, None)
                    .parameter("z", f32_ty, None),
            )
            .unwrap();
        let mut b = module.builder(f).unwrap();
        let xy = b.parameter(0).unwrap();
        let z = b.parameter(1).unwrap();
        let v = b.construct(v4, &[xy, z, z]).unwrap();
        assert_eq!(b.value_type(v).unwrap(), v4);
        assert!(b.construct(v4, &[xy, z]).is_err());
    }

    #[test]
    fn signed_to_unsigned_convert_is_bitcast() {
        let mut module = Module::new();
        let i32_ty = module.types.i32();
        let u32_ty = module.types.u32();
        let f = module
            .add_function(FunctionDecl::new("f", u32_ty).parameter("x", i32_ty, None))
            .unwrap();
        let mut b = module.builder(f).unwrap();
        let x = b.parameter(0).unwrap();
        let u = b.convert(x, u32_ty).unwrap();
        b.ret(Some(u)).unwrap();
        let func = &module.functions[f];
        let ValueDef::Instruction(inst) = func.values[u].def else {
            panic!("expected instruction");
        };
        assert!(matches!(func.instructions[inst].op, Op::Bitcast { .. }));
    }

    #[test]
    fn scalar_times_vector_is_reordered() {
        let mut module = Module::new();
        let f32_ty = module.types.f32();
        let v3 = module.types.vector(Scalar::F32, 3).unwrap();
        let f = module
            .add_function(
                FunctionDecl::new("f", v3)
                    .parameter("s", f32_ty, None)
                    .parameter("v", v3, None),
            )
            .unwrap();
        let mut b = module.builder(f).unwrap();
        let s = b.parameter(0).unwrap();
        let v = b.parameter(1).unwrap();
        let p = b.binary(BinaryOp::Multiply, s, v).unwrap();
        let q = b.binary(BinaryOp::Multiply, v, s).unwrap();
        assert_eq!(p, q);
        let r = b.binary(BinaryOp::Add, v, s).unwrap();
        b.ret(Some(r)).unwrap();
        let func = &module.functions[f];
        // Add with a scalar splats the scalar first.
        let ValueDef::Instruction(inst) = func.values[r].def else {
            panic!("expected instruction");
        };
        match func.instructions[inst].op {
            Op::Binary { right, .. } => assert_eq!(func.values[right].ty, v3),
            ref other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn matrix_vector_product_type() {
        let mut module = Module::new();
        let m = module.types.matrix(4, 3).unwrap();
        let v4 = module.types.vector(Scalar::F32, 4).unwrap();
        let v3 = module.types.vector(Scalar::F32, 3).unwrap();
        let f = module
            .add_function(
                FunctionDecl::new("f", v3)
                    .parameter("m", m, None)
                    .parameter("v", v4, None),
            )
            .unwrap();
        let mut b = module.builder(f).unwrap();
        let mv = b.parameter(0).unwrap();
        let v = b.parameter(1).unwrap();
        let p = b.binary(BinaryOp::Multiply, mv, v).unwrap();
        assert_eq!(b.value_type(p).unwrap(), v3);
        assert!(b.binary(BinaryOp::Multiply, v, mv).is_err());
    }

    #[test]
    fn switch_rejects_duplicate_selectors() {
        let mut module = Module::new();
        let i32_ty = module.types.i32();
        let void = module.types.void();
        let f = module
            .add_function(FunctionDecl::new("f", void).parameter("x", i32_ty, None))
            .unwrap();
        let one = module.constants.literal(&mut module.types, Literal::I32(1));
        let mut b = module.builder(f).unwrap();
        let x = b.parameter(0).unwrap();
        let case = b.create_block().unwrap();
        let default = b.create_block().unwrap();
        let cases = vec![
            SwitchCase {
                selectors: vec![one],
                target: case,
            },
            SwitchCase {
                selectors: vec![one],
                target: default,
            },
        ];
        assert!(b.switch(x, cases, default, None).is_err());
    }

    #[test]
    fn math_type_rules() {
        let mut module = Module::new();
        let v3 = module.types.vector(Scalar::F32, 3).unwrap();
        let f32_ty = module.types.f32();
        let f = module
            .add_function(FunctionDecl::new("f", f32_ty).parameter("v", v3, None))
            .unwrap();
        let mut b = module.builder(f).unwrap();
        let v = b.parameter(0).unwrap();
        let len = b.math(MathFunction::Length, &[v]).unwrap();
        assert_eq!(b.value_type(len).unwrap(), f32_ty);
        let c = b.math(MathFunction::Cross, &[v, v]).unwrap();
        assert_eq!(b.value_type(c).unwrap(), v3);
        assert!(b.math(MathFunction::Pow, &[v]).is_err());
    }

    #[test]
    fn single_swizzle_is_extract() {
        let mut module = Module::new();
        let v4 = module.types.vector(Scalar::F32, 4).unwrap();
        let f32_ty = module.types.f32();
        let f = module
            .add_function(FunctionDecl::new("f", f32_ty).parameter("v", v4, None))
            .unwrap();
        let mut b = module.builder(f).unwrap();
        let v = b.parameter(0).unwrap();
        let same = b.swizzle(v, &SwizzleComponent::XYZW).unwrap();
        assert_eq!(same, v);
        let y = b.swizzle(v, &[SwizzleComponent::Y]).unwrap();
        let y2 = b.extract(v, &[1]).unwrap();
        assert_eq!(y, y2);
        let zyx = b.swizzle(v, &[SwizzleComponent::Z, SwizzleComponent::Y, SwizzleComponent::X]).unwrap();
        assert_eq!(module.types.type_name(module.functions[f].values[zyx].ty), "__vec_3__f32");
    }
}
