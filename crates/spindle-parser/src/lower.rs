//! Lowering pass: `naga::Module` → `spindle_ir::Module`.
//!
//! Types and constant expressions are lowered on first use and memoized.
//! Function bodies go through the IR [`Builder`]: naga's structured
//! statements become blocks with merge annotations, and expressions are
//! lowered in `Emit` order so loads and calls keep their program position.

use std::collections::HashMap;

use spindle_ir::{
    AccessIndex, AccessMode, BinaryOp, BuildOptions, Builder, Binding, Block, BuiltIn, Constant,
    ConstantInterner, Function, FunctionDecl, FunctionParameter, GlobalDecl, GlobalVariable,
    Handle, Literal, MathFunction, Module, PipelineStage, Scalar, Source, StorageClass,
    StorageFormat, StructMember, SwitchCase, SwizzleComponent, TextureClass, TextureDimension,
    Type, TypeInterner, UnaryOp, Value,
};

use crate::ParseError;

// ---------------------------------------------------------------------------
// Contexts
// ---------------------------------------------------------------------------

/// Module-level lowering state: handle mappings from naga arenas to the
/// Spindle module.
struct Lowerer<'n> {
    naga: &'n naga::Module,
    source: Option<&'n str>,
    options: BuildOptions,
    types: HashMap<naga::Handle<naga::Type>, Handle<Type>>,
    constants: HashMap<naga::Handle<naga::Expression>, Handle<Constant>>,
    globals: HashMap<naga::Handle<naga::GlobalVariable>, Handle<GlobalVariable>>,
    functions: HashMap<naga::Handle<naga::Function>, Handle<Function>>,
}

/// The innermost construct a `break` or `continue` leaves.
#[derive(Clone, Copy, Debug)]
enum Construct {
    Loop {
        continuing: Handle<Block>,
        merge: Handle<Block>,
    },
    Switch {
        merge: Handle<Block>,
    },
}

/// Per-function lowering state.
struct FunctionLowerer<'a, 'n, 'm> {
    ctx: &'a mut Lowerer<'n>,
    function: &'n naga::Function,
    builder: Builder<'m>,
    values: HashMap<naga::Handle<naga::Expression>, Handle<Value>>,
    locals: HashMap<naga::Handle<naga::LocalVariable>, Handle<Value>>,
    constructs: Vec<Construct>,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn lower_module(
    naga: &naga::Module,
    source: Option<&str>,
    options: BuildOptions,
) -> Result<Module, ParseError> {
    let mut module = Module::new();
    let mut ctx = Lowerer {
        naga,
        source,
        options,
        types: HashMap::new(),
        constants: HashMap::new(),
        globals: HashMap::new(),
        functions: HashMap::new(),
    };

    ctx.lower_global_variables(&mut module)?;

    // Declare everything first so bodies can call any function.
    let mut bodies = Vec::new();
    for (naga_handle, function) in naga.functions.iter() {
        let name = function
            .name
            .clone()
            .unwrap_or_else(|| format!("function{}", naga_handle.index()));
        let decl = ctx.function_decl(&mut module.types, name, function, None)?;
        let handle = module.add_function(decl)?;
        ctx.functions.insert(naga_handle, handle);
        bodies.push((handle, function));
    }
    for ep in &naga.entry_points {
        let stage = lower_stage(ep)?;
        let decl = ctx.function_decl(&mut module.types, ep.name.clone(), &ep.function, Some(stage))?;
        let handle = module.add_function(decl)?;
        bodies.push((handle, &ep.function));
    }

    for (handle, function) in bodies {
        ctx.lower_function(&mut module, handle, function)?;
    }

    module.seal()?;
    Ok(module)
}

// ---------------------------------------------------------------------------
// Types and constants
// ---------------------------------------------------------------------------

impl Lowerer<'_> {
    fn ty(
        &mut self,
        types: &mut TypeInterner,
        handle: naga::Handle<naga::Type>,
    ) -> Result<Handle<Type>, ParseError> {
        if let Some(&ty) = self.types.get(&handle) {
            return Ok(ty);
        }
        let naga = self.naga;
        let naga_ty = &naga.types[handle];
        let ty = match naga_ty.inner {
            naga::TypeInner::Scalar(s) => types.scalar(lower_scalar(s)?)?,
            naga::TypeInner::Vector { size, scalar } => {
                types.vector(lower_scalar(scalar)?, size as u32)?
            }
            naga::TypeInner::Matrix {
                columns,
                rows,
                scalar,
            } => {
                if lower_scalar(scalar)? != Scalar::F32 {
                    return Err(unsupported("matrices of non-f32 scalars"));
                }
                types.matrix(columns as u32, rows as u32)?
            }
            naga::TypeInner::Array { base, size, .. } => {
                let base = self.ty(types, base)?;
                let count = match size {
                    naga::ArraySize::Constant(n) => Some(n.get()),
                    naga::ArraySize::Dynamic => None,
                    naga::ArraySize::Pending(_) => {
                        return Err(unsupported("override-sized arrays"));
                    }
                };
                types.array(base, count)?
            }
            naga::TypeInner::Struct { ref members, .. } => {
                let name = naga_ty
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("Struct{}", handle.index()));
                let st = types.declare_struct(&name)?;
                self.types.insert(handle, st);
                let mut lowered = Vec::with_capacity(members.len());
                for (i, member) in members.iter().enumerate() {
                    lowered.push(StructMember {
                        name: member
                            .name
                            .clone()
                            .unwrap_or_else(|| format!("member{i}")),
                        ty: self.ty(types, member.ty)?,
                        offset: member.offset,
                    });
                }
                types.define_struct(st, lowered)?;
                return Ok(st);
            }
            naga::TypeInner::Pointer { base, space } => {
                let base = self.ty(types, base)?;
                lower_pointer(types, base, space)?
            }
            naga::TypeInner::ValuePointer {
                size,
                scalar,
                space,
            } => {
                let scalar = lower_scalar(scalar)?;
                let base = match size {
                    Some(size) => types.vector(scalar, size as u32)?,
                    None => types.scalar(scalar)?,
                };
                lower_pointer(types, base, space)?
            }
            naga::TypeInner::Image {
                dim,
                arrayed,
                ref class,
            } => types.texture(lower_dimension(dim, arrayed)?, lower_image_class(class)?)?,
            naga::TypeInner::Sampler { comparison } => types.sampler(comparison),
            naga::TypeInner::Atomic(_) => return Err(unsupported("atomic types")),
            _ => {
                return Err(unsupported(format!(
                    "type `{}`",
                    naga_ty.name.as_deref().unwrap_or("<anonymous>")
                )));
            }
        };
        self.types.insert(handle, ty);
        Ok(ty)
    }

    /// Lowers an expression of `naga.global_expressions` to a constant.
    fn const_expr(
        &mut self,
        types: &mut TypeInterner,
        constants: &mut ConstantInterner,
        handle: naga::Handle<naga::Expression>,
    ) -> Result<Handle<Constant>, ParseError> {
        if let Some(&c) = self.constants.get(&handle) {
            return Ok(c);
        }
        let naga = self.naga;
        let constant = match naga.global_expressions[handle] {
            naga::Expression::Literal(lit) => constants.literal(types, lower_literal(lit)?),
            naga::Expression::Constant(h) => {
                self.const_expr(types, constants, naga.constants[h].init)?
            }
            naga::Expression::ZeroValue(ty) => {
                let ty = self.ty(types, ty)?;
                constants.zero(types, ty)?
            }
            naga::Expression::Compose { ty, ref components } => {
                let ty = self.ty(types, ty)?;
                let mut children = Vec::with_capacity(components.len());
                for &component in components {
                    children.push(self.const_expr(types, constants, component)?);
                }
                let children = flatten_vector_components(types, constants, ty, children);
                constants.composite(types, ty, children)?
            }
            naga::Expression::Splat { size, value } => {
                let value = self.const_expr(types, constants, value)?;
                let scalar = constants
                    .try_get(value)
                    .and_then(|c| types[c.ty()].scalar())
                    .ok_or_else(|| ParseError::Lowering("splat of a non-scalar constant".into()))?;
                let vector = types.vector(scalar, size as u32)?;
                constants.composite(types, vector, vec![value; size as usize])?
            }
            naga::Expression::Override(_) => return Err(unsupported("pipeline overrides")),
            _ => {
                return Err(unsupported(format!(
                    "constant expression {handle:?}"
                )));
            }
        };
        self.constants.insert(handle, constant);
        Ok(constant)
    }
}

/// Vector composites may be spelled with vector children
/// (`vec4(v.xy, 0.0, 1.0)`); the interner wants one scalar per lane.
fn flatten_vector_components(
    types: &mut TypeInterner,
    constants: &mut ConstantInterner,
    ty: Handle<Type>,
    children: Vec<Handle<Constant>>,
) -> Vec<Handle<Constant>> {
    if !matches!(types[ty], Type::Vector { .. }) {
        return children;
    }
    let mut flat = Vec::with_capacity(4);
    for child in children {
        match constants.try_get(child).cloned() {
            Some(Constant::Composite { components, .. }) => flat.extend(components),
            Some(Constant::Zero { ty }) => match types[ty] {
                Type::Vector { size, scalar } => {
                    let zero = constants.literal(types, Literal::zero(scalar));
                    flat.extend(std::iter::repeat_n(zero, size as usize));
                }
                _ => flat.push(child),
            },
            _ => flat.push(child),
        }
    }
    flat
}

// ---------------------------------------------------------------------------
// Globals and function declarations
// ---------------------------------------------------------------------------

impl<'n> Lowerer<'n> {
    fn lower_global_variables(&mut self, module: &mut Module) -> Result<(), ParseError> {
        for (naga_handle, var) in self.naga.global_variables.iter() {
            let name = var
                .name
                .clone()
                .unwrap_or_else(|| format!("global{}", naga_handle.index()));
            let mut ty = self.ty(&mut module.types, var.ty)?;
            let space = match var.space {
                naga::AddressSpace::Storage { access } => {
                    ty = module.types.access_controlled(ty, lower_access(access))?;
                    StorageClass::Storage
                }
                other => lower_storage_class(other)?,
            };
            let mut decl = GlobalDecl::new(name, space, ty);
            if let Some(init) = var.init {
                decl = decl.init(self.const_expr(&mut module.types, &mut module.constants, init)?);
            }
            if let Some(ref binding) = var.binding {
                decl = decl.binding(binding.group, binding.binding);
            }
            let handle = module.add_global(decl)?;
            self.globals.insert(naga_handle, handle);
        }
        Ok(())
    }

    fn function_decl(
        &mut self,
        types: &mut TypeInterner,
        name: String,
        function: &naga::Function,
        stage: Option<PipelineStage>,
    ) -> Result<FunctionDecl, ParseError> {
        let return_type = match function.result {
            Some(ref result) => self.ty(types, result.ty)?,
            None => types.void(),
        };
        let mut decl = FunctionDecl::new(name, return_type);
        for arg in &function.arguments {
            let binding = arg.binding.as_ref().map(lower_binding).transpose()?;
            if stage.is_some() && binding.is_none() {
                return Err(unsupported(format!(
                    "entry point `{}` takes a structure as input",
                    decl.name
                )));
            }
            decl.parameters.push(FunctionParameter {
                name: arg.name.clone(),
                ty: self.ty(types, arg.ty)?,
                binding,
            });
        }
        if let Some(ref result) = function.result {
            match result.binding {
                Some(ref binding) => decl = decl.result_binding(lower_binding(binding)?),
                None if stage.is_some() => {
                    return Err(unsupported(format!(
                        "entry point `{}` returns a structure",
                        decl.name
                    )));
                }
                None => {}
            }
        }
        if let Some(stage) = stage {
            decl = decl.stage(stage);
        }
        Ok(decl)
    }

    fn lower_function(
        &mut self,
        module: &mut Module,
        handle: Handle<Function>,
        function: &'n naga::Function,
    ) -> Result<(), ParseError> {
        let builder = module.builder_with_options(handle, self.options)?;
        log::debug!("lowering function `{}`", module_function_name(function));
        FunctionLowerer {
            ctx: self,
            function,
            builder,
            values: HashMap::new(),
            locals: HashMap::new(),
            constructs: Vec::new(),
        }
        .lower()
    }
}

fn module_function_name(function: &naga::Function) -> &str {
    function.name.as_deref().unwrap_or("<anonymous>")
}

// ---------------------------------------------------------------------------
// Function bodies
// ---------------------------------------------------------------------------

impl<'n> FunctionLowerer<'_, 'n, '_> {
    fn lower(mut self) -> Result<(), ParseError> {
        let function = self.function;
        for (naga_handle, var) in function.local_variables.iter() {
            let ty = self.ty(var.ty)?;
            let init = var.init.map(|h| self.expr(h)).transpose()?;
            let constant = init.and_then(|v| self.builder.constant_of(v));
            let pointer = self.builder.local_variable(ty, constant)?;
            if let Some(ref name) = var.name {
                self.builder.name_value(pointer, name.clone());
            }
            if let (Some(value), None) = (init, constant) {
                self.builder.store(pointer, value)?;
            }
            self.locals.insert(naga_handle, pointer);
        }

        self.block(&function.body)?;

        if let Some(current) = self.builder.current_block()
            && !self.builder.is_terminated(current)
        {
            if function.result.is_none() {
                self.builder.ret(None)?;
            } else {
                self.builder.unreachable()?;
            }
        }

        for (naga_handle, name) in &function.named_expressions {
            if let Some(&value) = self.values.get(naga_handle) {
                self.builder.name_value(value, name.clone());
            }
        }
        Ok(())
    }

    fn ty(&mut self, handle: naga::Handle<naga::Type>) -> Result<Handle<Type>, ParseError> {
        let (types, _) = self.builder.interners();
        self.ctx.ty(types, handle)
    }

    fn set_source(&mut self, span: &naga::Span) {
        let source = self
            .ctx
            .source
            .filter(|_| span.is_defined())
            .map(|text| {
                let loc = span.location(text);
                Source::at(loc.line_number, loc.line_position)
            });
        self.builder.set_source(source);
    }

    /// Branches to `target` unless the current block already ended.
    fn close(&mut self, target: Handle<Block>) -> Result<(), ParseError> {
        if let Some(current) = self.builder.current_block()
            && !self.builder.is_terminated(current)
        {
            self.builder.branch(target)?;
        }
        Ok(())
    }

    // ---- statements ------------------------------------------------------------------------

    fn block(&mut self, block: &'n naga::Block) -> Result<(), ParseError> {
        for (statement, span) in block.span_iter() {
            // Code after a terminator lands in a fresh, unreachable block.
            if let Some(current) = self.builder.current_block()
                && self.builder.is_terminated(current)
            {
                let fresh = self.builder.create_block()?;
                self.builder.set_block(fresh)?;
            }
            self.set_source(span);
            self.statement(statement)?;
        }
        Ok(())
    }

    fn statement(&mut self, statement: &'n naga::Statement) -> Result<(), ParseError> {
        match *statement {
            naga::Statement::Emit(ref range) => {
                for handle in range.clone() {
                    self.expr(handle)?;
                }
            }
            naga::Statement::Block(ref block) => self.block(block)?,
            naga::Statement::If {
                condition,
                ref accept,
                ref reject,
            } => self.if_statement(condition, accept, reject)?,
            naga::Statement::Switch {
                selector,
                ref cases,
            } => self.switch_statement(selector, cases)?,
            naga::Statement::Loop {
                ref body,
                ref continuing,
                break_if,
            } => self.loop_statement(body, continuing, break_if)?,
            naga::Statement::Break => {
                let target = match self.constructs.last() {
                    Some(Construct::Loop { merge, .. } | Construct::Switch { merge }) => *merge,
                    None => {
                        return Err(ParseError::Lowering(
                            "`break` outside of a loop or switch".into(),
                        ));
                    }
                };
                self.builder.branch(target)?;
            }
            naga::Statement::Continue => {
                let target = self
                    .constructs
                    .iter()
                    .rev()
                    .find_map(|c| match *c {
                        Construct::Loop { continuing, .. } => Some(continuing),
                        Construct::Switch { .. } => None,
                    })
                    .ok_or_else(|| ParseError::Lowering("`continue` outside of a loop".into()))?;
                self.builder.branch(target)?;
            }
            naga::Statement::Return { value } => {
                let value = value.map(|h| self.expr(h)).transpose()?;
                self.builder.ret(value)?;
            }
            naga::Statement::Kill => self.builder.discard()?,
            naga::Statement::Store { pointer, value } => {
                let pointer = self.expr(pointer)?;
                let value = self.expr(value)?;
                self.builder.store(pointer, value)?;
            }
            naga::Statement::Call {
                function,
                ref arguments,
                result,
            } => {
                let callee = self.ctx.functions.get(&function).copied().ok_or_else(|| {
                    ParseError::Lowering(format!("unmapped called function {function:?}"))
                })?;
                let arguments = self.exprs(arguments)?;
                let value = self.builder.call(callee, &arguments)?;
                match (result, value) {
                    (Some(handle), Some(value)) => {
                        self.values.insert(handle, value);
                    }
                    (Some(_), None) => {
                        return Err(ParseError::Lowering(
                            "result of a void call is used".into(),
                        ));
                    }
                    (None, _) => {}
                }
            }
            naga::Statement::ControlBarrier(_) | naga::Statement::MemoryBarrier(_) => {
                return Err(unsupported("barriers"));
            }
            naga::Statement::Atomic { .. } => return Err(unsupported("atomic operations")),
            naga::Statement::ImageStore { .. } => return Err(unsupported("texture stores")),
            naga::Statement::ImageAtomic { .. } => return Err(unsupported("texture atomics")),
            naga::Statement::WorkGroupUniformLoad { .. } => {
                return Err(unsupported("workgroupUniformLoad"));
            }
            naga::Statement::RayQuery { .. } => return Err(unsupported("ray queries")),
            naga::Statement::SubgroupBallot { .. }
            | naga::Statement::SubgroupGather { .. }
            | naga::Statement::SubgroupCollectiveOperation { .. } => {
                return Err(unsupported("subgroup operations"));
            }
        }
        Ok(())
    }

    fn if_statement(
        &mut self,
        condition: naga::Handle<naga::Expression>,
        accept: &'n naga::Block,
        reject: &'n naga::Block,
    ) -> Result<(), ParseError> {
        let condition = self.expr(condition)?;
        let accept_block = self.builder.create_block()?;
        let merge = self.builder.create_block()?;
        let reject_block = if reject.is_empty() {
            merge
        } else {
            self.builder.create_block()?
        };
        self.builder
            .cond_branch(condition, accept_block, reject_block, Some(merge))?;

        self.builder.set_block(accept_block)?;
        self.block(accept)?;
        self.close(merge)?;

        if !reject.is_empty() {
            self.builder.set_block(reject_block)?;
            self.block(reject)?;
            self.close(merge)?;
        }
        self.builder.set_block(merge)?;
        Ok(())
    }

    fn loop_statement(
        &mut self,
        body: &'n naga::Block,
        continuing: &'n naga::Block,
        break_if: Option<naga::Handle<naga::Expression>>,
    ) -> Result<(), ParseError> {
        let header = self.builder.create_block()?;
        let body_block = self.builder.create_block()?;
        let continuing_block = self.builder.create_block()?;
        let merge = self.builder.create_block()?;

        self.builder.branch(header)?;
        self.builder.set_block(header)?;
        self.builder.loop_header(body_block, continuing_block, merge)?;

        self.constructs.push(Construct::Loop {
            continuing: continuing_block,
            merge,
        });
        self.builder.set_block(body_block)?;
        self.block(body)?;
        self.close(continuing_block)?;

        self.builder.set_block(continuing_block)?;
        self.block(continuing)?;
        if let Some(current) = self.builder.current_block()
            && !self.builder.is_terminated(current)
        {
            match break_if {
                Some(condition) => {
                    let condition = self.expr(condition)?;
                    self.builder.cond_branch(condition, merge, header, None)?;
                }
                None => self.builder.branch(header)?,
            }
        }
        self.constructs.pop();

        self.builder.set_block(merge)?;
        Ok(())
    }

    /// Selectors of empty fall-through cases (`case 1, 2:`) join the next
    /// case that has a body.
    fn switch_statement(
        &mut self,
        selector: naga::Handle<naga::Expression>,
        cases: &'n [naga::SwitchCase],
    ) -> Result<(), ParseError> {
        let selector = self.expr(selector)?;
        let merge = self.builder.create_block()?;

        let mut arms: Vec<(Handle<Block>, &'n naga::Block, bool)> = Vec::new();
        let mut switch_cases = Vec::new();
        let mut pending = Vec::new();
        let mut pending_default = false;
        let mut default = None;
        for case in cases {
            let literal = match case.value {
                naga::SwitchValue::I32(v) => Some(Literal::I32(v)),
                naga::SwitchValue::U32(v) => Some(Literal::U32(v)),
                naga::SwitchValue::Default => None,
            };
            match literal {
                Some(literal) => {
                    let (types, constants) = self.builder.interners();
                    pending.push(constants.literal(types, literal));
                }
                None => pending_default = true,
            }
            if case.body.is_empty() && case.fall_through {
                continue;
            }
            let target = self.builder.create_block()?;
            if std::mem::take(&mut pending_default) {
                default = Some(target);
            }
            if !pending.is_empty() {
                switch_cases.push(SwitchCase {
                    selectors: std::mem::take(&mut pending),
                    target,
                });
            }
            arms.push((target, &case.body, case.fall_through));
        }

        let default = default.unwrap_or(merge);
        self.builder
            .switch(selector, switch_cases, default, Some(merge))?;

        self.constructs.push(Construct::Switch { merge });
        for i in 0..arms.len() {
            let (target, body, fall_through) = arms[i];
            self.builder.set_block(target)?;
            self.block(body)?;
            let next = match arms.get(i + 1) {
                Some(&(next, _, _)) if fall_through => next,
                _ => merge,
            };
            self.close(next)?;
        }
        self.constructs.pop();

        self.builder.set_block(merge)?;
        Ok(())
    }

    // ---- expressions -----------------------------------------------------------------------

    fn expr(&mut self, handle: naga::Handle<naga::Expression>) -> Result<Handle<Value>, ParseError> {
        if let Some(&value) = self.values.get(&handle) {
            return Ok(value);
        }
        let value = self.lower_expression(handle)?;
        self.values.insert(handle, value);
        Ok(value)
    }

    fn exprs(
        &mut self,
        handles: &[naga::Handle<naga::Expression>],
    ) -> Result<Vec<Handle<Value>>, ParseError> {
        handles.iter().map(|&h| self.expr(h)).collect()
    }

    fn is_pointer(&self, value: Handle<Value>) -> Result<bool, ParseError> {
        let ty = self.builder.value_type(value)?;
        Ok(self.builder.module().types[ty].is_pointer())
    }

    /// The index a constant value denotes, if any.
    fn constant_index(&self, value: Handle<Value>) -> Option<u32> {
        let constant = self.builder.constant_of(value)?;
        let module = self.builder.module();
        match module.constants.literal_value(&module.types, constant)? {
            Literal::U32(i) => Some(i),
            Literal::I32(i) => u32::try_from(i).ok(),
            _ => None,
        }
    }

    /// Type with the shape of `value` and the scalar kind `kind`.
    fn retype(
        &mut self,
        value: Handle<Value>,
        kind: naga::ScalarKind,
    ) -> Result<Handle<Type>, ParseError> {
        let scalar = match kind {
            naga::ScalarKind::Bool => Scalar::BOOL,
            naga::ScalarKind::Sint => Scalar::I32,
            naga::ScalarKind::Uint => Scalar::U32,
            naga::ScalarKind::Float => Scalar::F32,
            naga::ScalarKind::AbstractInt | naga::ScalarKind::AbstractFloat => {
                return Err(unsupported("conversion to an abstract type"));
            }
        };
        let ty = self.builder.value_type(value)?;
        let size = self.builder.module().types[ty].vector_size();
        let (types, _) = self.builder.interners();
        Ok(match size {
            Some(size) => types.vector(scalar, size as u32)?,
            None => types.scalar(scalar)?,
        })
    }

    fn lower_expression(
        &mut self,
        handle: naga::Handle<naga::Expression>,
    ) -> Result<Handle<Value>, ParseError> {
        let function = self.function;
        let value = match function.expressions[handle] {
            naga::Expression::Literal(lit) => self.builder.literal(lower_literal(lit)?)?,
            naga::Expression::Constant(h) => {
                let init = self.ctx.naga.constants[h].init;
                let (types, constants) = self.builder.interners();
                let constant = self.ctx.const_expr(types, constants, init)?;
                self.builder.constant(constant)?
            }
            naga::Expression::ZeroValue(ty) => {
                let ty = self.ty(ty)?;
                let (types, constants) = self.builder.interners();
                let constant = constants.zero(types, ty)?;
                self.builder.constant(constant)?
            }
            naga::Expression::Compose { ty, ref components } => {
                let ty = self.ty(ty)?;
                let components = self.exprs(components)?;
                self.builder.construct(ty, &components)?
            }
            naga::Expression::Access { base, index } => {
                let base = self.expr(base)?;
                let index = self.expr(index)?;
                if self.is_pointer(base)? {
                    self.builder
                        .access_chain(base, &[AccessIndex::Dynamic(index)])?
                } else {
                    match self.constant_index(index) {
                        Some(i) => self.builder.extract(base, &[i])?,
                        None => {
                            return Err(unsupported(
                                "dynamic indexing of a value (index through a variable)",
                            ));
                        }
                    }
                }
            }
            naga::Expression::AccessIndex { base, index } => {
                let base = self.expr(base)?;
                if self.is_pointer(base)? {
                    self.builder
                        .access_chain(base, &[AccessIndex::Constant(index)])?
                } else {
                    self.builder.extract(base, &[index])?
                }
            }
            naga::Expression::Splat { size, value } => {
                let value = self.expr(value)?;
                self.builder.splat(size as u32, value)?
            }
            naga::Expression::Swizzle {
                size,
                vector,
                pattern,
            } => {
                let vector = self.expr(vector)?;
                let pattern: Vec<_> = pattern[..size as usize]
                    .iter()
                    .map(|&c| lower_swizzle_component(c))
                    .collect();
                self.builder.swizzle(vector, &pattern)?
            }
            naga::Expression::FunctionArgument(index) => self.builder.parameter(index as usize)?,
            naga::Expression::GlobalVariable(h) => {
                let global = self.ctx.globals.get(&h).copied().ok_or_else(|| {
                    ParseError::Lowering(format!("unmapped global variable {h:?}"))
                })?;
                self.builder.global(global)?
            }
            naga::Expression::LocalVariable(h) => {
                self.locals.get(&h).copied().ok_or_else(|| {
                    ParseError::Lowering(format!("unmapped local variable {h:?}"))
                })?
            }
            naga::Expression::Load { pointer } => {
                let pointer = self.expr(pointer)?;
                self.builder.load(pointer)?
            }
            naga::Expression::Unary { op, expr } => {
                let operand = self.expr(expr)?;
                self.builder.unary(lower_unary_op(op), operand)?
            }
            naga::Expression::Binary { op, left, right } => {
                let left = self.expr(left)?;
                let right = self.expr(right)?;
                self.builder.binary(lower_binary_op(op), left, right)?
            }
            naga::Expression::Select {
                condition,
                accept,
                reject,
            } => {
                let condition = self.expr(condition)?;
                let accept = self.expr(accept)?;
                let reject = self.expr(reject)?;
                self.builder.select(condition, accept, reject)?
            }
            naga::Expression::Math {
                fun,
                arg,
                arg1,
                arg2,
                arg3,
            } => {
                let fun = lower_math_function(fun)?;
                let mut arguments = vec![self.expr(arg)?];
                for extra in [arg1, arg2, arg3].into_iter().flatten() {
                    arguments.push(self.expr(extra)?);
                }
                self.builder.math(fun, &arguments)?
            }
            naga::Expression::As {
                expr,
                kind,
                convert,
            } => {
                let value = self.expr(expr)?;
                let target = self.retype(value, kind)?;
                match convert {
                    Some(_) => self.builder.convert(value, target)?,
                    None => self.builder.bitcast(value, target)?,
                }
            }
            naga::Expression::CallResult(_) => {
                return Err(ParseError::Lowering(format!(
                    "call result {handle:?} used before its call"
                )));
            }
            naga::Expression::Override(_) => return Err(unsupported("pipeline overrides")),
            naga::Expression::ArrayLength(_) => return Err(unsupported("arrayLength")),
            naga::Expression::AtomicResult { .. } => {
                return Err(unsupported("atomic operations"));
            }
            naga::Expression::Derivative { .. } => return Err(unsupported("derivatives")),
            naga::Expression::Relational { .. } => {
                return Err(unsupported("relational builtins (all, any, isnan, isinf)"));
            }
            naga::Expression::ImageSample { .. }
            | naga::Expression::ImageLoad { .. }
            | naga::Expression::ImageQuery { .. } => {
                return Err(unsupported("texture operations"));
            }
            naga::Expression::RayQueryProceedResult
            | naga::Expression::RayQueryGetIntersection { .. }
            | naga::Expression::RayQueryVertexPositions { .. } => {
                return Err(unsupported("ray queries"));
            }
            naga::Expression::SubgroupBallotResult
            | naga::Expression::SubgroupOperationResult { .. } => {
                return Err(unsupported("subgroup operations"));
            }
            naga::Expression::WorkGroupUniformLoadResult { .. } => {
                return Err(unsupported("workgroupUniformLoad"));
            }
        };
        Ok(value)
    }
}

// ---------------------------------------------------------------------------
// Enum mapping helpers
// ---------------------------------------------------------------------------

fn lower_scalar(s: naga::Scalar) -> Result<Scalar, ParseError> {
    match (s.kind, s.width) {
        (naga::ScalarKind::Bool, _) => Ok(Scalar::BOOL),
        (naga::ScalarKind::Sint, 4) => Ok(Scalar::I32),
        (naga::ScalarKind::Uint, 4) => Ok(Scalar::U32),
        (naga::ScalarKind::Float, 4) => Ok(Scalar::F32),
        (kind, width) => Err(unsupported(format!("{width}-byte {kind:?} scalars"))),
    }
}

fn lower_storage_class(space: naga::AddressSpace) -> Result<StorageClass, ParseError> {
    match space {
        naga::AddressSpace::Function => Ok(StorageClass::Function),
        naga::AddressSpace::Private => Ok(StorageClass::Private),
        naga::AddressSpace::WorkGroup => Ok(StorageClass::Workgroup),
        naga::AddressSpace::Uniform => Ok(StorageClass::Uniform),
        naga::AddressSpace::Storage { .. } => Ok(StorageClass::Storage),
        naga::AddressSpace::Handle => Ok(StorageClass::Handle),
        other => Err(unsupported(format!("{other:?} address space"))),
    }
}

fn lower_access(access: naga::StorageAccess) -> AccessMode {
    let load = access.contains(naga::StorageAccess::LOAD);
    let store = access.contains(naga::StorageAccess::STORE);
    match (load, store) {
        (true, true) => AccessMode::ReadWrite,
        (false, true) => AccessMode::Write,
        _ => AccessMode::Read,
    }
}

fn lower_pointer(
    types: &mut TypeInterner,
    base: Handle<Type>,
    space: naga::AddressSpace,
) -> Result<Handle<Type>, ParseError> {
    Ok(match space {
        naga::AddressSpace::Storage { access } => {
            types.pointer_with_access(base, StorageClass::Storage, lower_access(access))?
        }
        other => types.pointer(base, lower_storage_class(other)?)?,
    })
}

fn lower_dimension(dim: naga::ImageDimension, arrayed: bool) -> Result<TextureDimension, ParseError> {
    match (dim, arrayed) {
        (naga::ImageDimension::D1, false) => Ok(TextureDimension::D1),
        (naga::ImageDimension::D2, false) => Ok(TextureDimension::D2),
        (naga::ImageDimension::D2, true) => Ok(TextureDimension::D2Array),
        (naga::ImageDimension::D3, false) => Ok(TextureDimension::D3),
        (naga::ImageDimension::Cube, false) => Ok(TextureDimension::Cube),
        (naga::ImageDimension::Cube, true) => Ok(TextureDimension::CubeArray),
        (dim, true) => Err(unsupported(format!("arrayed {dim:?} textures"))),
    }
}

fn lower_image_class(class: &naga::ImageClass) -> Result<TextureClass, ParseError> {
    match *class {
        naga::ImageClass::Sampled { kind, multi } => Ok(TextureClass::Sampled {
            kind: match kind {
                naga::ScalarKind::Sint => spindle_ir::ScalarKind::Sint,
                naga::ScalarKind::Uint => spindle_ir::ScalarKind::Uint,
                _ => spindle_ir::ScalarKind::Float,
            },
            multisampled: multi,
        }),
        naga::ImageClass::Depth { multi: false } => Ok(TextureClass::Depth),
        naga::ImageClass::Storage { format, access } => Ok(TextureClass::Storage {
            format: lower_storage_format(format)?,
            access: lower_access(access),
        }),
        _ => Err(unsupported("multisampled depth textures")),
    }
}

fn lower_storage_format(format: naga::StorageFormat) -> Result<StorageFormat, ParseError> {
    use naga::StorageFormat as F;

    Ok(match format {
        F::R32Uint => StorageFormat::R32Uint,
        F::R32Sint => StorageFormat::R32Sint,
        F::R32Float => StorageFormat::R32Float,
        F::Rg32Uint => StorageFormat::Rg32Uint,
        F::Rg32Sint => StorageFormat::Rg32Sint,
        F::Rg32Float => StorageFormat::Rg32Float,
        F::Rgba8Unorm => StorageFormat::Rgba8Unorm,
        F::Rgba8Snorm => StorageFormat::Rgba8Snorm,
        F::Rgba8Uint => StorageFormat::Rgba8Uint,
        F::Rgba8Sint => StorageFormat::Rgba8Sint,
        F::Rgba16Uint => StorageFormat::Rgba16Uint,
        F::Rgba16Sint => StorageFormat::Rgba16Sint,
        F::Rgba16Float => StorageFormat::Rgba16Float,
        F::Rgba32Uint => StorageFormat::Rgba32Uint,
        F::Rgba32Sint => StorageFormat::Rgba32Sint,
        F::Rgba32Float => StorageFormat::Rgba32Float,
        other => return Err(unsupported(format!("{other:?} storage textures"))),
    })
}

fn lower_stage(ep: &naga::EntryPoint) -> Result<PipelineStage, ParseError> {
    if ep.stage == naga::ShaderStage::Compute {
        Ok(PipelineStage::Compute {
            workgroup_size: ep.workgroup_size,
        })
    } else if ep.stage == naga::ShaderStage::Vertex {
        Ok(PipelineStage::Vertex)
    } else if ep.stage == naga::ShaderStage::Fragment {
        Ok(PipelineStage::Fragment)
    } else {
        Err(unsupported(format!("{:?} shaders", ep.stage)))
    }
}

fn lower_builtin(builtin: naga::BuiltIn) -> Result<BuiltIn, ParseError> {
    match builtin {
        naga::BuiltIn::Position { .. } => Ok(BuiltIn::Position),
        naga::BuiltIn::VertexIndex => Ok(BuiltIn::VertexIndex),
        naga::BuiltIn::InstanceIndex => Ok(BuiltIn::InstanceIndex),
        naga::BuiltIn::FrontFacing => Ok(BuiltIn::FrontFacing),
        naga::BuiltIn::FragDepth => Ok(BuiltIn::FragDepth),
        naga::BuiltIn::SampleIndex => Ok(BuiltIn::SampleIndex),
        naga::BuiltIn::SampleMask => Ok(BuiltIn::SampleMask),
        naga::BuiltIn::GlobalInvocationId => Ok(BuiltIn::GlobalInvocationId),
        naga::BuiltIn::LocalInvocationId => Ok(BuiltIn::LocalInvocationId),
        naga::BuiltIn::LocalInvocationIndex => Ok(BuiltIn::LocalInvocationIndex),
        naga::BuiltIn::WorkGroupId => Ok(BuiltIn::WorkgroupId),
        naga::BuiltIn::NumWorkGroups => Ok(BuiltIn::NumWorkgroups),
        other => Err(unsupported(format!("{other:?} builtin"))),
    }
}

fn lower_binding(binding: &naga::Binding) -> Result<Binding, ParseError> {
    match *binding {
        naga::Binding::BuiltIn(b) => Ok(Binding::BuiltIn(lower_builtin(b)?)),
        naga::Binding::Location { location, .. } => Ok(Binding::Location { location }),
    }
}

fn lower_unary_op(op: naga::UnaryOperator) -> UnaryOp {
    match op {
        naga::UnaryOperator::Negate => UnaryOp::Negate,
        naga::UnaryOperator::LogicalNot => UnaryOp::LogicalNot,
        naga::UnaryOperator::BitwiseNot => UnaryOp::BitwiseNot,
    }
}

fn lower_binary_op(op: naga::BinaryOperator) -> BinaryOp {
    match op {
        naga::BinaryOperator::Add => BinaryOp::Add,
        naga::BinaryOperator::Subtract => BinaryOp::Subtract,
        naga::BinaryOperator::Multiply => BinaryOp::Multiply,
        naga::BinaryOperator::Divide => BinaryOp::Divide,
        naga::BinaryOperator::Modulo => BinaryOp::Modulo,
        naga::BinaryOperator::Equal => BinaryOp::Equal,
        naga::BinaryOperator::NotEqual => BinaryOp::NotEqual,
        naga::BinaryOperator::Less => BinaryOp::Less,
        naga::BinaryOperator::LessEqual => BinaryOp::LessEqual,
        naga::BinaryOperator::Greater => BinaryOp::Greater,
        naga::BinaryOperator::GreaterEqual => BinaryOp::GreaterEqual,
        naga::BinaryOperator::And => BinaryOp::BitwiseAnd,
        naga::BinaryOperator::ExclusiveOr => BinaryOp::BitwiseXor,
        naga::BinaryOperator::InclusiveOr => BinaryOp::BitwiseOr,
        naga::BinaryOperator::LogicalAnd => BinaryOp::LogicalAnd,
        naga::BinaryOperator::LogicalOr => BinaryOp::LogicalOr,
        naga::BinaryOperator::ShiftLeft => BinaryOp::ShiftLeft,
        naga::BinaryOperator::ShiftRight => BinaryOp::ShiftRight,
    }
}

fn lower_math_function(fun: naga::MathFunction) -> Result<MathFunction, ParseError> {
    use naga::MathFunction as M;

    Ok(match fun {
        M::Abs => MathFunction::Abs,
        M::Min => MathFunction::Min,
        M::Max => MathFunction::Max,
        M::Clamp => MathFunction::Clamp,
        M::Floor => MathFunction::Floor,
        M::Ceil => MathFunction::Ceil,
        M::Round => MathFunction::Round,
        M::Fract => MathFunction::Fract,
        M::Trunc => MathFunction::Trunc,
        M::Sin => MathFunction::Sin,
        M::Cos => MathFunction::Cos,
        M::Tan => MathFunction::Tan,
        M::Asin => MathFunction::Asin,
        M::Acos => MathFunction::Acos,
        M::Atan => MathFunction::Atan,
        M::Atan2 => MathFunction::Atan2,
        M::Sinh => MathFunction::Sinh,
        M::Cosh => MathFunction::Cosh,
        M::Tanh => MathFunction::Tanh,
        M::Sqrt => MathFunction::Sqrt,
        M::InverseSqrt => MathFunction::InverseSqrt,
        M::Log => MathFunction::Log,
        M::Log2 => MathFunction::Log2,
        M::Exp => MathFunction::Exp,
        M::Exp2 => MathFunction::Exp2,
        M::Pow => MathFunction::Pow,
        M::Dot => MathFunction::Dot,
        M::Cross => MathFunction::Cross,
        M::Normalize => MathFunction::Normalize,
        M::Length => MathFunction::Length,
        M::Distance => MathFunction::Distance,
        M::Mix => MathFunction::Mix,
        M::Step => MathFunction::Step,
        M::SmoothStep => MathFunction::SmoothStep,
        M::Fma => MathFunction::Fma,
        other => return Err(unsupported(format!("{other:?} math function"))),
    })
}

fn lower_literal(lit: naga::Literal) -> Result<Literal, ParseError> {
    match lit {
        naga::Literal::Bool(v) => Ok(Literal::Bool(v)),
        naga::Literal::I32(v) => Ok(Literal::I32(v)),
        naga::Literal::U32(v) => Ok(Literal::U32(v)),
        naga::Literal::F32(v) => Ok(Literal::F32(v)),
        naga::Literal::AbstractInt(v) => i32::try_from(v)
            .map(Literal::I32)
            .map_err(|_| unsupported(format!("integer literal {v} does not fit in i32"))),
        naga::Literal::AbstractFloat(v) => Ok(Literal::F32(v as f32)),
        other => Err(unsupported(format!("{other:?} literal"))),
    }
}

fn lower_swizzle_component(c: naga::SwizzleComponent) -> SwizzleComponent {
    match c {
        naga::SwizzleComponent::X => SwizzleComponent::X,
        naga::SwizzleComponent::Y => SwizzleComponent::Y,
        naga::SwizzleComponent::Z => SwizzleComponent::Z,
        naga::SwizzleComponent::W => SwizzleComponent::W,
    }
}

fn unsupported(what: impl Into<String>) -> ParseError {
    ParseError::Unsupported(what.into())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars() {
        assert_eq!(lower_scalar(naga::Scalar::F32).unwrap(), Scalar::F32);
        assert_eq!(lower_scalar(naga::Scalar::BOOL).unwrap(), Scalar::BOOL);
        assert!(lower_scalar(naga::Scalar::F64).is_err());
    }

    #[test]
    fn binary_ops() {
        assert_eq!(lower_binary_op(naga::BinaryOperator::Add), BinaryOp::Add);
        assert_eq!(
            lower_binary_op(naga::BinaryOperator::And),
            BinaryOp::BitwiseAnd
        );
        assert_eq!(
            lower_binary_op(naga::BinaryOperator::LogicalAnd),
            BinaryOp::LogicalAnd
        );
    }

    #[test]
    fn storage_access() {
        assert_eq!(lower_access(naga::StorageAccess::LOAD), AccessMode::Read);
        assert_eq!(
            lower_access(naga::StorageAccess::LOAD | naga::StorageAccess::STORE),
            AccessMode::ReadWrite
        );
        assert_eq!(lower_access(naga::StorageAccess::STORE), AccessMode::Write);
    }

    #[test]
    fn address_spaces() {
        assert_eq!(
            lower_storage_class(naga::AddressSpace::WorkGroup).unwrap(),
            StorageClass::Workgroup
        );
        assert_eq!(
            lower_storage_class(naga::AddressSpace::Handle).unwrap(),
            StorageClass::Handle
        );
        assert!(lower_storage_class(naga::AddressSpace::PushConstant).is_err());
    }

    #[test]
    fn math_functions() {
        assert_eq!(
            lower_math_function(naga::MathFunction::Dot).unwrap(),
            MathFunction::Dot
        );
        assert!(lower_math_function(naga::MathFunction::Determinant).is_err());
    }

    #[test]
    fn abstract_literals_are_concretized() {
        assert_eq!(
            lower_literal(naga::Literal::AbstractInt(7)).unwrap(),
            Literal::I32(7)
        );
        assert!(lower_literal(naga::Literal::AbstractInt(i64::MAX)).is_err());
    }

    #[test]
    fn arrayed_3d_textures_are_rejected() {
        assert!(lower_dimension(naga::ImageDimension::D3, true).is_err());
        assert_eq!(
            lower_dimension(naga::ImageDimension::Cube, true).unwrap(),
            TextureDimension::CubeArray
        );
    }

    #[test]
    fn lower_simple_module() {
        let source = "@group(0) @binding(0) var<storage, read_write> buf: array<f32>;

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    buf[i] = buf[i] + 1.0;
}";
        let naga_module = naga::front::wgsl::parse_str(source).expect("WGSL parse failed");
        let module = lower_module(&naga_module, Some(source), BuildOptions::default())
            .expect("lowering failed");

        assert!(module.is_sealed());
        let (_, main) = module.entry_points().next().expect("entry point");
        assert_eq!(main.name, "main");
        assert_eq!(
            main.stage,
            Some(PipelineStage::Compute {
                workgroup_size: [64, 1, 1]
            })
        );
        let buf = module.global_by_name("buf").expect("buf");
        assert_eq!(
            module.types.type_name(module.global_variables[buf].ty),
            "__access_control_read_write__array__f32"
        );
    }

    #[test]
    fn instructions_carry_source_lines() {
        let source = "@group(0) @binding(0) var<storage, read_write> buf: array<f32>;

@compute @workgroup_size(1)
fn main() {
    buf[0] = 2.0;
}";
        let naga_module = naga::front::wgsl::parse_str(source).unwrap();
        let module = lower_module(&naga_module, Some(source), BuildOptions::default()).unwrap();
        let (_, main) = module.entry_points().next().unwrap();
        let store = main
            .instructions
            .iter()
            .find(|(_, inst)| matches!(inst.op, spindle_ir::Op::Store { .. }))
            .map(|(_, inst)| inst)
            .unwrap();
        assert_eq!(store.source.map(|s| s.begin.line), Some(5));
    }
}
