//! Lowering pass: `Program` → `spindle_ir::Module`.

use std::collections::{HashMap, HashSet};

use spindle_ir::{
    AccessIndex, AccessMode, Block, Builder, Constant, ConstantInterner, Function, GlobalVariable,
    Handle, IrError, MathFunction, Module, Scalar, Source, StorageClass, SwitchCase,
    SwizzleComponent, TextureClass, Type, TypeInterner, UnaryOp, Value,
};

use crate::decl::{FunctionDecl, GlobalDecl, Program, StructDecl};
use crate::expr::{Expression, ExpressionKind, Literal};
use crate::stmt::{CaseStatement, ElseIf, Statement, StatementKind, VariableDecl};
use crate::symbol::Symbol;
use crate::ty::TypeDecl;
use crate::{LowerError, LowerOptions, validate};

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Validates `program`, lowers it and seals the result.
pub fn lower(program: &Program, options: &LowerOptions) -> Result<Module, LowerError> {
    validate(program, options).map_err(LowerError::Invalid)?;

    let mut module = Module::new();
    let mut ctx = ModuleContext {
        program,
        options,
        structs: HashMap::new(),
        names: HashMap::new(),
        functions: HashMap::new(),
    };
    ctx.lower_structs(&mut module)?;
    for decl in &program.globals {
        ctx.lower_global(&mut module, decl)?;
    }
    let mut bodies = Vec::with_capacity(program.functions.len());
    for decl in &program.functions {
        let handle = ctx.declare_function(&mut module, decl)?;
        bodies.push((handle, decl));
    }
    for (handle, decl) in bodies {
        let builder = module
            .builder_with_options(handle, options.build)
            .at(decl.source)?;
        FunctionLowerer {
            ctx: &ctx,
            builder,
            scopes: Vec::new(),
            constructs: Vec::new(),
            depth: 0,
        }
        .lower(decl)?;
    }

    module.seal()?;
    log::debug!(
        "lowered program: {} functions, {} globals",
        module.functions.len(),
        module.global_variables.len()
    );
    Ok(module)
}

/// Attaches a source range to IR errors.
trait Locate<T> {
    fn at(self, source: Source) -> Result<T, LowerError>;
}

impl<T> Locate<T> for Result<T, IrError> {
    fn at(self, source: Source) -> Result<T, LowerError> {
        self.map_err(|err| LowerError::Located {
            message: err.to_string(),
            location: source,
        })
    }
}

fn located(source: Source, message: impl Into<String>) -> LowerError {
    LowerError::Located {
        message: message.into(),
        location: source,
    }
}

// ---------------------------------------------------------------------------
// Module scope
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug)]
enum ModuleName {
    Global(Handle<GlobalVariable>),
    Constant(Handle<Constant>),
}

struct ModuleContext<'p> {
    program: &'p Program,
    options: &'p LowerOptions,
    structs: HashMap<Symbol, Handle<Type>>,
    names: HashMap<Symbol, ModuleName>,
    functions: HashMap<Symbol, Handle<Function>>,
}

impl ModuleContext<'_> {
    fn name(&self, symbol: Symbol) -> &str {
        self.program.symbols.name(symbol)
    }

    fn ty(
        &self,
        types: &mut TypeInterner,
        decl: &TypeDecl,
        source: Source,
    ) -> Result<Handle<Type>, LowerError> {
        let ty = match decl {
            TypeDecl::Void => types.void(),
            TypeDecl::Bool => types.bool(),
            TypeDecl::I32 => types.i32(),
            TypeDecl::U32 => types.u32(),
            TypeDecl::F32 => types.f32(),
            TypeDecl::Vector { size, element } => {
                let scalar = scalar_of(element)
                    .ok_or_else(|| located(source, "vector elements must be scalars"))?;
                types.vector(scalar, *size).at(source)?
            }
            TypeDecl::Matrix { columns, rows } => types.matrix(*columns, *rows).at(source)?,
            TypeDecl::Array { element, count } => {
                let element = self.ty(types, element, source)?;
                types.array(element, *count).at(source)?
            }
            TypeDecl::Pointer { base, class } => {
                let base = self.ty(types, base, source)?;
                types.pointer(base, *class).at(source)?
            }
            TypeDecl::Named(name) => *self
                .structs
                .get(name)
                .ok_or_else(|| located(source, format!("unknown type `{}`", self.name(*name))))?,
            TypeDecl::Sampler { comparison } => types.sampler(*comparison),
            TypeDecl::SampledTexture { dim, kind } => types
                .texture(
                    *dim,
                    TextureClass::Sampled {
                        kind: *kind,
                        multisampled: false,
                    },
                )
                .at(source)?,
            TypeDecl::MultisampledTexture { dim, kind } => types
                .texture(
                    *dim,
                    TextureClass::Sampled {
                        kind: *kind,
                        multisampled: true,
                    },
                )
                .at(source)?,
            TypeDecl::DepthTexture { dim } => types.texture(*dim, TextureClass::Depth).at(source)?,
            TypeDecl::StorageTexture {
                dim,
                format,
                access,
            } => types
                .texture(
                    *dim,
                    TextureClass::Storage {
                        format: *format,
                        access: *access,
                    },
                )
                .at(source)?,
            TypeDecl::AccessControl { access, base } => {
                let base = self.ty(types, base, source)?;
                types.access_controlled(base, *access).at(source)?
            }
        };
        Ok(ty)
    }

    /// Declares every struct, then defines them once the structs they hold
    /// by value are defined.
    fn lower_structs(&mut self, module: &mut Module) -> Result<(), LowerError> {
        let program = self.program;
        for decl in &program.structs {
            let handle = module
                .types
                .declare_struct(self.name(decl.name))
                .at(decl.source)?;
            self.structs.insert(decl.name, handle);
        }

        let mut pending: Vec<&StructDecl> = program.structs.iter().collect();
        let mut defined = HashSet::new();
        while !pending.is_empty() {
            let (ready, blocked): (Vec<_>, Vec<_>) = pending.into_iter().partition(|decl| {
                decl.members.iter().all(|m| {
                    let mut deps = Vec::new();
                    by_value_structs(&m.ty, &mut deps);
                    deps.iter().all(|d| defined.contains(d))
                })
            });
            if ready.is_empty() {
                let decl = blocked[0];
                return Err(located(
                    decl.source,
                    format!("struct `{}` contains itself", self.name(decl.name)),
                ));
            }
            for decl in ready {
                self.define_struct(module, decl)?;
                defined.insert(decl.name);
            }
            pending = blocked;
        }
        Ok(())
    }

    fn define_struct(&self, module: &mut Module, decl: &StructDecl) -> Result<(), LowerError> {
        let mut members = Vec::with_capacity(decl.members.len());
        for member in &decl.members {
            let ty = self.ty(&mut module.types, &member.ty, member.source)?;
            members.push((self.name(member.name).to_string(), ty));
        }
        let mut members = module.types.layout_members(members).at(decl.source)?;
        // An explicit offset pushes every following member along with it.
        let mut end: u32 = 0;
        for (member, written) in members.iter_mut().zip(&decl.members) {
            let layout = module.types.layout(member.ty);
            let name = member.name.clone();
            let overflow = || {
                located(
                    written.source,
                    format!("member `{name}` lies beyond the largest struct size"),
                )
            };
            member.offset = match written.offset {
                Some(offset) => offset,
                None => {
                    let align = layout.map_or(1, |l| l.align);
                    let next = end.checked_next_multiple_of(align).ok_or_else(overflow)?;
                    member.offset.max(next)
                }
            };
            end = member
                .offset
                .checked_add(layout.map_or(0, |l| l.size))
                .ok_or_else(overflow)?;
        }
        let handle = self.structs[&decl.name];
        module.types.define_struct(handle, members).at(decl.source)
    }

    fn lower_global(&mut self, module: &mut Module, decl: &GlobalDecl) -> Result<(), LowerError> {
        let mut ty = self.ty(&mut module.types, &decl.ty, decl.source)?;
        let init = match &decl.init {
            Some(init) => Some(self.const_value(module, init, Some(ty))?),
            None => None,
        };

        if decl.is_const {
            let value =
                init.ok_or_else(|| located(decl.source, "constant without an initializer"))?;
            self.names.insert(decl.name, ModuleName::Constant(value));
            return Ok(());
        }

        let class = decl.class.unwrap_or(StorageClass::Private);
        if class == StorageClass::Storage
            && !matches!(module.types[ty], Type::AccessControlled { .. })
        {
            let access = decl.access.unwrap_or(AccessMode::Read);
            ty = module.types.access_controlled(ty, access).at(decl.source)?;
        }
        let mut global = spindle_ir::GlobalDecl::new(self.name(decl.name), class, ty);
        if let Some(init) = init {
            global = global.init(init);
        }
        if let Some((group, binding)) = decl.binding {
            global = global.binding(group, binding);
        }
        if let Some(io) = decl.io {
            global = global.io(io);
        }
        let handle = module.add_global(global).at(decl.source)?;
        self.names.insert(decl.name, ModuleName::Global(handle));
        Ok(())
    }

    /// Evaluates a module-scope initializer.
    fn const_value(
        &self,
        module: &mut Module,
        expr: &Expression,
        expected: Option<Handle<Type>>,
    ) -> Result<Handle<Constant>, LowerError> {
        let source = expr.source;
        let constant = match &expr.kind {
            ExpressionKind::ScalarConstructor(lit) => {
                module.constants.literal(&mut module.types, lit.to_ir())
            }
            ExpressionKind::Identifier(name) => match self.names.get(name) {
                Some(ModuleName::Constant(c)) => *c,
                _ => {
                    return Err(located(
                        source,
                        format!("`{}` is not a constant", self.name(*name)),
                    ));
                }
            },
            ExpressionKind::Unary {
                op: UnaryOp::Negate,
                expr: inner,
            } => match inner.kind {
                ExpressionKind::ScalarConstructor(Literal::Sint(v)) => module
                    .constants
                    .literal(&mut module.types, spindle_ir::Literal::I32(v.wrapping_neg())),
                ExpressionKind::ScalarConstructor(Literal::Float(v)) => module
                    .constants
                    .literal(&mut module.types, spindle_ir::Literal::F32(-v)),
                _ => return Err(located(source, "not a constant expression")),
            },
            ExpressionKind::TypeConstructor { ty, values } => {
                let ty = self.ty(&mut module.types, ty, source)?;
                if values.is_empty() {
                    module.constants.zero(&module.types, ty).at(source)?
                } else {
                    let mut children = Vec::with_capacity(values.len());
                    for value in values {
                        children.push(self.const_value(module, value, None)?);
                    }
                    let children = expand_vector_children(module, ty, children);
                    module
                        .constants
                        .composite(&module.types, ty, children)
                        .at(source)?
                }
            }
            _ => return Err(located(source, "not a constant expression")),
        };
        if let Some(expected) = expected {
            let found = module.constants[constant].ty();
            if found != expected {
                return Err(located(
                    source,
                    format!(
                        "initializer has type {}, expected {}",
                        module.types.type_name(found),
                        module.types.type_name(expected)
                    ),
                ));
            }
        }
        Ok(constant)
    }

    fn declare_function(
        &mut self,
        module: &mut Module,
        decl: &FunctionDecl,
    ) -> Result<Handle<Function>, LowerError> {
        let return_type = self.ty(&mut module.types, &decl.return_type, decl.source)?;
        let mut ir = spindle_ir::FunctionDecl::new(self.name(decl.name), return_type);
        for param in &decl.params {
            let ty = self.ty(&mut module.types, &param.ty, param.source)?;
            ir = ir.parameter(self.name(param.name), ty, param.binding);
        }
        if let Some(binding) = decl.return_binding {
            ir = ir.result_binding(binding);
        }
        if let Some(stage) = decl.stage {
            ir = ir.stage(stage);
        }
        let handle = module.add_function(ir).at(decl.source)?;
        self.functions.insert(decl.name, handle);
        Ok(handle)
    }
}

fn scalar_of(decl: &TypeDecl) -> Option<Scalar> {
    match decl {
        TypeDecl::Bool => Some(Scalar::BOOL),
        TypeDecl::I32 => Some(Scalar::I32),
        TypeDecl::U32 => Some(Scalar::U32),
        TypeDecl::F32 => Some(Scalar::F32),
        _ => None,
    }
}

/// Structs a member of type `decl` contains by value.
fn by_value_structs(decl: &TypeDecl, out: &mut Vec<Symbol>) {
    match decl {
        TypeDecl::Named(name) => out.push(*name),
        TypeDecl::Array { element: inner, .. } | TypeDecl::AccessControl { base: inner, .. } => {
            by_value_structs(inner, out)
        }
        _ => {}
    }
}

/// `vec4(v2, 0.0, 1.0)`: vector children of a vector constant are spread
/// into scalars, and a lone scalar is repeated.
fn expand_vector_children(
    module: &mut Module,
    ty: Handle<Type>,
    children: Vec<Handle<Constant>>,
) -> Vec<Handle<Constant>> {
    let Type::Vector { size, scalar } = module.types[ty] else {
        return children;
    };
    let mut flat = Vec::with_capacity(size as usize);
    for &child in &children {
        match module.constants[child].clone() {
            Constant::Composite { components, .. } => flat.extend(components),
            Constant::Zero { ty: zero_ty } => {
                if let Some(n) = module.types[zero_ty].vector_size() {
                    let zero = module
                        .constants
                        .literal(&mut module.types, spindle_ir::Literal::zero(scalar));
                    flat.extend(std::iter::repeat_n(zero, n as usize));
                } else {
                    flat.push(child);
                }
            }
            Constant::Scalar { .. } => flat.push(child),
        }
    }
    if flat.len() == 1 {
        flat = vec![flat[0]; size as usize];
    }
    flat
}

// ---------------------------------------------------------------------------
// Function bodies
// ---------------------------------------------------------------------------

/// What a local name denotes.
#[derive(Clone, Copy, Debug)]
enum Local {
    /// A `let` binding or parameter.
    Value(Handle<Value>),
    /// A `var`; reads load through the pointer.
    Variable(Handle<Value>),
}

/// An expression result: a value, or a reference that can be loaded or
/// stored through.
#[derive(Clone, Copy, Debug)]
enum Place {
    Value(Handle<Value>),
    Reference(Handle<Value>),
}

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

struct FunctionLowerer<'a, 'p, 'm> {
    ctx: &'a ModuleContext<'p>,
    builder: Builder<'m>,
    scopes: Vec<HashMap<Symbol, Local>>,
    constructs: Vec<Construct>,
    depth: usize,
}

impl FunctionLowerer<'_, '_, '_> {
    fn lower(mut self, decl: &FunctionDecl) -> Result<(), LowerError> {
        let mut params = HashMap::new();
        for (i, param) in decl.params.iter().enumerate() {
            let value = self.builder.parameter(i).at(param.source)?;
            params.insert(param.name, Local::Value(value));
        }
        self.scopes.push(params);
        self.statements(&decl.body)?;
        self.scopes.pop();

        if let Some(current) = self.builder.current_block()
            && !self.builder.is_terminated(current)
        {
            if decl.return_type == TypeDecl::Void {
                self.builder.ret(None).at(decl.source)?;
            } else {
                self.builder.unreachable().at(decl.source)?;
            }
        }
        Ok(())
    }

    fn enter(&mut self, source: Source) -> Result<(), LowerError> {
        self.depth += 1;
        let limit = self.ctx.options.max_nesting_depth;
        if self.depth > limit {
            return Err(LowerError::NestingTooDeep {
                limit,
                location: source,
            });
        }
        Ok(())
    }

    fn ty(&mut self, decl: &TypeDecl, source: Source) -> Result<Handle<Type>, LowerError> {
        let (types, _) = self.builder.interners();
        self.ctx.ty(types, decl, source)
    }

    fn type_of(&self, value: Handle<Value>, source: Source) -> Result<Type, LowerError> {
        let ty = self.builder.value_type(value).at(source)?;
        Ok(self.builder.module().types[ty].clone())
    }

    fn close(&mut self, target: Handle<Block>, source: Source) -> Result<(), LowerError> {
        if let Some(current) = self.builder.current_block()
            && !self.builder.is_terminated(current)
        {
            self.builder.branch(target).at(source)?;
        }
        Ok(())
    }

    // ---- statements ------------------------------------------------------------------------

    /// Lowers `body` in a fresh scope.
    fn statements(&mut self, body: &[Statement]) -> Result<(), LowerError> {
        self.scopes.push(HashMap::new());
        for stmt in body {
            self.statement(stmt)?;
        }
        self.scopes.pop();
        Ok(())
    }

    fn nested(&mut self, body: &[Statement], source: Source) -> Result<(), LowerError> {
        self.enter(source)?;
        self.statements(body)?;
        self.depth -= 1;
        Ok(())
    }

    fn statement(&mut self, stmt: &Statement) -> Result<(), LowerError> {
        let source = stmt.source;
        // Code after a terminator lands in a fresh, unreachable block.
        if let Some(current) = self.builder.current_block()
            && self.builder.is_terminated(current)
        {
            let fresh = self.builder.create_block().at(source)?;
            self.builder.set_block(fresh).at(source)?;
        }
        self.builder.set_source(Some(source));

        match &stmt.kind {
            StatementKind::VariableDecl(decl) => self.variable_decl(decl, source)?,
            StatementKind::Assign { lhs, rhs } => {
                let Place::Reference(pointer) = self.place(lhs)? else {
                    return Err(located(lhs.source, "cannot assign to a value"));
                };
                let value = self.expr(rhs)?;
                self.builder.store(pointer, value).at(source)?;
            }
            StatementKind::If {
                condition,
                body,
                else_ifs,
                else_body,
            } => self.if_statement(condition, body, else_ifs, else_body.as_deref(), source)?,
            StatementKind::Loop { body, continuing } => {
                self.loop_statement(body, continuing, source)?
            }
            StatementKind::Break => {
                let target = match self.constructs.last() {
                    Some(Construct::Loop { merge, .. } | Construct::Switch { merge }) => *merge,
                    None => return Err(located(source, "`break` outside of a loop or switch")),
                };
                self.builder.branch(target).at(source)?;
            }
            StatementKind::Continue => {
                let target = self
                    .constructs
                    .iter()
                    .rev()
                    .find_map(|c| match *c {
                        Construct::Loop { continuing, .. } => Some(continuing),
                        Construct::Switch { .. } => None,
                    })
                    .ok_or_else(|| located(source, "`continue` outside of a loop"))?;
                self.builder.branch(target).at(source)?;
            }
            StatementKind::Return(value) => {
                let value = match value {
                    Some(value) => Some(self.expr(value)?),
                    None => None,
                };
                self.builder.ret(value).at(source)?;
            }
            StatementKind::Discard => self.builder.discard().at(source)?,
            StatementKind::Switch { selector, cases } => {
                self.switch_statement(selector, cases, source)?
            }
            StatementKind::Fallthrough => {
                return Err(located(
                    source,
                    "`fallthrough` must be the last statement of a case",
                ));
            }
            StatementKind::Call { function, args } => {
                self.call(*function, args, source)?;
            }
            StatementKind::Block(body) => self.nested(body, source)?,
        }
        Ok(())
    }

    fn variable_decl(&mut self, decl: &VariableDecl, source: Source) -> Result<(), LowerError> {
        let init = match &decl.init {
            Some(init) => Some(self.expr(init)?),
            None => None,
        };
        let name = self.ctx.name(decl.name).to_string();

        if decl.is_const {
            let value = init.ok_or_else(|| {
                located(source, format!("`let` declaration of `{name}` needs an initializer"))
            })?;
            if self.builder.constant_of(value).is_none() {
                self.builder.name_value(value, name);
            }
            self.bind(decl.name, Local::Value(value));
            return Ok(());
        }

        let ty = match (&decl.ty, init) {
            (Some(ty), _) => self.ty(ty, source)?,
            (None, Some(value)) => self.builder.value_type(value).at(source)?,
            (None, None) => {
                return Err(located(
                    source,
                    format!("declaration of `{name}` needs a type or an initializer"),
                ));
            }
        };
        let constant = init.and_then(|v| self.builder.constant_of(v));
        let pointer = self.builder.local_variable(ty, constant).at(source)?;
        self.builder.name_value(pointer, name);
        if let (Some(value), None) = (init, constant) {
            self.builder.store(pointer, value).at(source)?;
        }
        self.bind(decl.name, Local::Variable(pointer));
        Ok(())
    }

    fn bind(&mut self, name: Symbol, local: Local) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name, local);
        }
    }

    fn if_statement(
        &mut self,
        condition: &Expression,
        body: &[Statement],
        else_ifs: &[ElseIf],
        else_body: Option<&[Statement]>,
        source: Source,
    ) -> Result<(), LowerError> {
        let condition = self.expr(condition)?;
        let accept = self.builder.create_block().at(source)?;
        let merge = self.builder.create_block().at(source)?;
        let has_else = !else_ifs.is_empty() || else_body.is_some();
        let reject = if has_else {
            self.builder.create_block().at(source)?
        } else {
            merge
        };
        self.builder
            .cond_branch(condition, accept, reject, Some(merge))
            .at(source)?;

        self.builder.set_block(accept).at(source)?;
        self.nested(body, source)?;
        self.close(merge, source)?;

        if has_else {
            self.builder.set_block(reject).at(source)?;
            match else_ifs.split_first() {
                Some((first, rest)) => {
                    self.enter(first.source)?;
                    self.if_statement(&first.condition, &first.body, rest, else_body, first.source)?;
                    self.depth -= 1;
                }
                None => {
                    if let Some(else_body) = else_body {
                        self.nested(else_body, source)?;
                    }
                }
            }
            self.close(merge, source)?;
        }
        self.builder.set_block(merge).at(source)?;
        Ok(())
    }

    fn loop_statement(
        &mut self,
        body: &[Statement],
        continuing: &[Statement],
        source: Source,
    ) -> Result<(), LowerError> {
        self.enter(source)?;
        let header = self.builder.create_block().at(source)?;
        let body_block = self.builder.create_block().at(source)?;
        let continuing_block = self.builder.create_block().at(source)?;
        let merge = self.builder.create_block().at(source)?;

        self.builder.branch(header).at(source)?;
        self.builder.set_block(header).at(source)?;
        self.builder
            .loop_header(body_block, continuing_block, merge)
            .at(source)?;

        // Names declared in the body stay visible in `continuing`.
        self.scopes.push(HashMap::new());
        self.constructs.push(Construct::Loop {
            continuing: continuing_block,
            merge,
        });
        self.builder.set_block(body_block).at(source)?;
        for stmt in body {
            self.statement(stmt)?;
        }
        self.close(continuing_block, source)?;

        self.builder.set_block(continuing_block).at(source)?;
        self.statements(continuing)?;
        self.close(header, source)?;
        self.constructs.pop();
        self.scopes.pop();

        self.builder.set_block(merge).at(source)?;
        self.depth -= 1;
        Ok(())
    }

    fn switch_statement(
        &mut self,
        selector: &Expression,
        cases: &[CaseStatement],
        source: Source,
    ) -> Result<(), LowerError> {
        let selector = self.expr(selector)?;
        let merge = self.builder.create_block().at(source)?;

        let mut targets = Vec::with_capacity(cases.len());
        let mut switch_cases = Vec::new();
        let mut default = merge;
        for case in cases {
            let target = self.builder.create_block().at(case.source)?;
            targets.push(target);
            if case.is_default() {
                default = target;
                continue;
            }
            let (types, constants) = self.builder.interners();
            let selectors = case
                .selectors
                .iter()
                .map(|lit| constants.literal(types, lit.to_ir()))
                .collect();
            switch_cases.push(SwitchCase { selectors, target });
        }
        self.builder
            .switch(selector, switch_cases, default, Some(merge))
            .at(source)?;

        self.constructs.push(Construct::Switch { merge });
        for (i, case) in cases.iter().enumerate() {
            self.enter(case.source)?;
            let (body, next) = match case.body.split_last() {
                Some((last, rest)) if last.kind == StatementKind::Fallthrough => {
                    let next = targets
                        .get(i + 1)
                        .copied()
                        .ok_or_else(|| located(last.source, "`fallthrough` in the last case"))?;
                    (rest, next)
                }
                _ => (&case.body[..], merge),
            };
            self.builder.set_block(targets[i]).at(case.source)?;
            self.statements(body)?;
            self.close(next, case.source)?;
            self.depth -= 1;
        }
        self.constructs.pop();

        self.builder.set_block(merge).at(source)?;
        Ok(())
    }

    // ---- expressions -----------------------------------------------------------------------

    fn expr(&mut self, expr: &Expression) -> Result<Handle<Value>, LowerError> {
        match self.place(expr)? {
            Place::Value(value) => Ok(value),
            Place::Reference(pointer) => self.builder.load(pointer).at(expr.source),
        }
    }

    fn place(&mut self, expr: &Expression) -> Result<Place, LowerError> {
        self.enter(expr.source)?;
        let place = self.lower_expression(expr)?;
        self.depth -= 1;
        Ok(place)
    }

    fn lookup(&mut self, name: Symbol, source: Source) -> Result<Place, LowerError> {
        let local = self
            .scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(&name).copied());
        match local {
            Some(Local::Value(value)) => return Ok(Place::Value(value)),
            Some(Local::Variable(pointer)) => return Ok(Place::Reference(pointer)),
            None => {}
        }
        match self.ctx.names.get(&name) {
            Some(&ModuleName::Global(global)) => {
                Ok(Place::Reference(self.builder.global(global).at(source)?))
            }
            Some(&ModuleName::Constant(constant)) => {
                Ok(Place::Value(self.builder.constant(constant).at(source)?))
            }
            None => Err(located(
                source,
                format!("unknown identifier `{}`", self.ctx.name(name)),
            )),
        }
    }

    fn call(
        &mut self,
        function: Symbol,
        args: &[Expression],
        source: Source,
    ) -> Result<Option<Handle<Value>>, LowerError> {
        let mut arguments = Vec::with_capacity(args.len());
        for arg in args {
            arguments.push(self.expr(arg)?);
        }
        if let Some(&callee) = self.ctx.functions.get(&function) {
            return self.builder.call(callee, &arguments).at(source);
        }
        let ctx = self.ctx;
        let name = ctx.name(function);
        match MathFunction::from_name(name) {
            Some(fun) => Ok(Some(self.builder.math(fun, &arguments).at(source)?)),
            None => Err(located(source, format!("unknown function `{name}`"))),
        }
    }

    fn lower_expression(&mut self, expr: &Expression) -> Result<Place, LowerError> {
        let source = expr.source;
        let value = match &expr.kind {
            ExpressionKind::Identifier(name) => return self.lookup(*name, source),
            ExpressionKind::ScalarConstructor(lit) => {
                self.builder.literal(lit.to_ir()).at(source)?
            }
            ExpressionKind::TypeConstructor { ty, values } => {
                let ty = self.ty(ty, source)?;
                let mut components = Vec::with_capacity(values.len());
                for value in values {
                    components.push(self.expr(value)?);
                }
                let is_scalar = matches!(self.builder.module().types[ty], Type::Scalar(_));
                match components.as_slice() {
                    [] => {
                        let (types, constants) = self.builder.interners();
                        let zero = constants.zero(types, ty).at(source)?;
                        self.builder.constant(zero).at(source)?
                    }
                    [single] if is_scalar => self.builder.convert(*single, ty).at(source)?,
                    _ => self.builder.construct(ty, &components).at(source)?,
                }
            }
            ExpressionKind::Binary { op, lhs, rhs } => {
                let lhs = self.expr(lhs)?;
                let rhs = self.expr(rhs)?;
                self.builder.binary(*op, lhs, rhs).at(source)?
            }
            ExpressionKind::Unary { op, expr: inner } => {
                let operand = self.expr(inner)?;
                self.builder.unary(*op, operand).at(source)?
            }
            ExpressionKind::ArrayAccessor { array, index } => {
                return self.array_accessor(array, index, source);
            }
            ExpressionKind::MemberAccessor { structure, member } => {
                return self.member_accessor(structure, *member, source);
            }
            ExpressionKind::Call { function, args } => self
                .call(*function, args, source)?
                .ok_or_else(|| {
                    located(
                        source,
                        format!("`{}` does not return a value", self.ctx.name(*function)),
                    )
                })?,
            ExpressionKind::Bitcast { ty, expr: inner } => {
                let ty = self.ty(ty, source)?;
                let value = self.expr(inner)?;
                self.builder.bitcast(value, ty).at(source)?
            }
            ExpressionKind::Missing => return Err(located(source, "missing expression")),
        };
        Ok(Place::Value(value))
    }

    fn array_accessor(
        &mut self,
        array: &Expression,
        index: &Expression,
        source: Source,
    ) -> Result<Place, LowerError> {
        let base = self.place(array)?;
        let index = self.expr(index)?;
        let pointer = match base {
            Place::Reference(pointer) => pointer,
            Place::Value(value) => {
                if let Some(i) = self.constant_index(index) {
                    return Ok(Place::Value(self.builder.extract(value, &[i]).at(source)?));
                }
                // Dynamic index into a value: go through a temporary.
                let ty = self.builder.value_type(value).at(source)?;
                let temp = self.builder.local_variable(ty, None).at(source)?;
                self.builder.store(temp, value).at(source)?;
                let element = self
                    .builder
                    .access_chain(temp, &[AccessIndex::Dynamic(index)])
                    .at(source)?;
                return Ok(Place::Value(self.builder.load(element).at(source)?));
            }
        };
        Ok(Place::Reference(
            self.builder
                .access_chain(pointer, &[AccessIndex::Dynamic(index)])
                .at(source)?,
        ))
    }

    fn constant_index(&self, value: Handle<Value>) -> Option<u32> {
        let constant = self.builder.constant_of(value)?;
        let module = self.builder.module();
        match module.constants.literal_value(&module.types, constant)? {
            spindle_ir::Literal::I32(i) => u32::try_from(i).ok(),
            spindle_ir::Literal::U32(i) => Some(i),
            _ => None,
        }
    }

    fn member_accessor(
        &mut self,
        structure: &Expression,
        member: Symbol,
        source: Source,
    ) -> Result<Place, LowerError> {
        let base = self.place(structure)?;
        let (handle, is_reference) = match base {
            Place::Value(v) => (v, false),
            Place::Reference(p) => (p, true),
        };
        let ctx = self.ctx;
        let name = ctx.name(member);
        let mut ty = self.type_of(handle, source)?;
        if is_reference && let Type::Pointer { base, .. } = ty {
            let module = self.builder.module();
            ty = module.types[module.types.strip_access(base)].clone();
        }

        match ty {
            Type::Struct(st) => {
                let index = st
                    .members
                    .iter()
                    .position(|m| m.name == name)
                    .ok_or_else(|| {
                        located(source, format!("struct `{}` has no member `{name}`", st.name))
                    })? as u32;
                if is_reference {
                    let pointer = self
                        .builder
                        .access_chain(handle, &[AccessIndex::Constant(index)])
                        .at(source)?;
                    Ok(Place::Reference(pointer))
                } else {
                    Ok(Place::Value(self.builder.extract(handle, &[index]).at(source)?))
                }
            }
            Type::Vector { .. } => {
                let pattern = parse_swizzle(name)
                    .ok_or_else(|| located(source, format!("invalid swizzle `{name}`")))?;
                match (is_reference, pattern.as_slice()) {
                    (true, [single]) => {
                        let pointer = self
                            .builder
                            .access_chain(handle, &[AccessIndex::Constant(*single as u32)])
                            .at(source)?;
                        Ok(Place::Reference(pointer))
                    }
                    (true, _) => {
                        let vector = self.builder.load(handle).at(source)?;
                        Ok(Place::Value(self.builder.swizzle(vector, &pattern).at(source)?))
                    }
                    (false, _) => Ok(Place::Value(self.builder.swizzle(handle, &pattern).at(source)?)),
                }
            }
            _ => Err(located(source, format!("no member `{name}` on this type"))),
        }
    }
}

/// `xyzw` or `rgba` component letters; the two sets cannot be mixed.
fn parse_swizzle(name: &str) -> Option<Vec<SwizzleComponent>> {
    let position = name.chars().all(|c| "xyzw".contains(c));
    let color = name.chars().all(|c| "rgba".contains(c));
    if name.is_empty() || name.len() > 4 || !(position || color) {
        return None;
    }
    name.chars()
        .map(|c| match c {
            'x' | 'r' => Some(SwizzleComponent::X),
            'y' | 'g' => Some(SwizzleComponent::Y),
            'z' | 'b' => Some(SwizzleComponent::Z),
            'w' | 'a' => Some(SwizzleComponent::W),
            _ => None,
        })
        .collect()
}
