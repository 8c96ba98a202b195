//! Sealed IR to WGSL source.
//!
//! Module-scope items come out in a fixed order: structs, globals, then
//! functions. Function bodies are rebuilt from the CFG by following the
//! merge annotations the builder records: a conditional branch with a
//! merge block becomes an `if`, a loop header a `loop` with its
//! `continuing` block, a switch with a merge block a `switch`. Branches to
//! the innermost loop's continuing block or to a loop/switch merge become
//! `continue` and `break`. Anything that does not fit those shapes is
//! rejected rather than guessed at.
//!
//! Every value-producing instruction is bound with `let`; access chains
//! are not bound but inlined into the load or store that uses them as a
//! reference expression (`data[i].pos.x`).

use std::collections::{HashMap, HashSet};

use spindle_backend_core::{BackendError, ensure_sealed};
use spindle_ir::{
    AccessIndex, AccessMode, Binding, Block, Constant, Function, GlobalVariable, Handle,
    Instruction, Literal, Module, Op, PipelineStage, ScalarKind, StorageClass, StructType,
    SwitchCase, SwizzleComponent, Type, UnaryOp, Value, ValueDef,
};

use crate::namer::Namer;

const INDENT: &str = "    ";

/// Translates a sealed module into WGSL source text.
pub fn write_module(module: &Module) -> Result<String, BackendError> {
    ensure_sealed(module)?;
    let mut writer = Writer::new(module);
    writer.write()?;
    log::debug!(
        "wrote {} function(s) as WGSL ({} bytes)",
        module.functions.len(),
        writer.out.len()
    );
    Ok(writer.out)
}

/// Renders a scalar literal.
///
/// Floats use the shortest exponent form that reads back to the same bits
/// (`1e0`, `4.72e1`); infinities and NaNs have no WGSL spelling and go
/// through `bitcast`.
pub fn literal(literal: Literal) -> String {
    match literal {
        Literal::Bool(b) => b.to_string(),
        Literal::I32(i32::MIN) => "i32(-2147483648)".into(),
        Literal::I32(v) => format!("{v}i"),
        Literal::U32(v) => format!("{v}u"),
        Literal::F32(v) if v.is_finite() => format!("{v:e}"),
        Literal::F32(v) => format!("bitcast<f32>({:#x}u)", v.to_bits()),
    }
}

struct Writer<'a> {
    module: &'a Module,
    out: String,
    namer: Namer,
    globals: HashMap<Handle<GlobalVariable>, String>,
    functions: HashMap<Handle<Function>, String>,
}

impl<'a> Writer<'a> {
    fn new(module: &'a Module) -> Self {
        Self {
            module,
            out: String::new(),
            namer: Namer::new(),
            globals: HashMap::new(),
            functions: HashMap::new(),
        }
    }

    fn write(&mut self) -> Result<(), BackendError> {
        let module = self.module;

        let structs: Vec<&StructType> = module
            .types
            .iter()
            .filter_map(|(_, ty)| match ty {
                Type::Struct(st) => Some(st),
                _ => None,
            })
            .collect();
        for st in &structs {
            self.namer.reserve(&st.name);
        }
        for (handle, var) in module.global_variables.iter() {
            let name = self.namer.call(&var.name);
            self.globals.insert(handle, name);
        }
        for (handle, func) in module.functions.iter() {
            let name = self.namer.call(&func.name);
            self.functions.insert(handle, name);
        }

        for st in structs {
            self.write_struct(st)?;
        }
        for (handle, var) in module.global_variables.iter() {
            self.write_global(handle, var)?;
        }
        for (handle, func) in module.functions.iter() {
            let text = FunctionWriter::new(self, func).write(handle)?;
            if !self.out.is_empty() {
                self.out.push('\n');
            }
            self.out.push_str(&text);
        }
        Ok(())
    }

    // ---- module scope -------------------------------------------------------------------

    fn write_struct(&mut self, st: &StructType) -> Result<(), BackendError> {
        let types = &self.module.types;
        if !st.is_defined() {
            return Err(BackendError::located(
                format!("struct `{}`", st.name),
                "declared but never defined",
            ));
        }
        let mut text = format!("struct {} {{\n", st.name);
        for (i, member) in st.members.iter().enumerate() {
            text.push_str(INDENT);
            // Explicit offsets that leave a gap after a member are kept by
            // widening that member.
            if let (Some(next), Some(layout)) = (st.members.get(i + 1), types.layout(member.ty)) {
                let span = next.offset.saturating_sub(member.offset);
                if span != layout.size {
                    text.push_str(&format!("@size({span}) "));
                }
            }
            text.push_str(&format!("{}: {},\n", member.name, types.wgsl_name(member.ty)));
        }
        text.push_str("}\n");
        if !self.out.is_empty() {
            self.out.push('\n');
        }
        self.out.push_str(&text);
        Ok(())
    }

    fn write_global(
        &mut self,
        handle: Handle<GlobalVariable>,
        var: &GlobalVariable,
    ) -> Result<(), BackendError> {
        let types = &self.module.types;
        let location = || format!("global `{}`", var.name);
        let qualifier = match var.space {
            StorageClass::Uniform => "<uniform>".to_string(),
            StorageClass::Storage => match var.access(types) {
                AccessMode::Read => "<storage, read>".into(),
                AccessMode::ReadWrite => "<storage, read_write>".into(),
                AccessMode::Write => {
                    return Err(BackendError::located(
                        location(),
                        "write-only storage buffers cannot be declared in WGSL",
                    ));
                }
            },
            StorageClass::Private => "<private>".into(),
            StorageClass::Workgroup => "<workgroup>".into(),
            StorageClass::Handle => String::new(),
            StorageClass::Input | StorageClass::Output => {
                return Err(BackendError::located(
                    location(),
                    "stage input/output globals have no WGSL equivalent",
                ));
            }
            StorageClass::Function => {
                return Err(BackendError::located(location(), "function storage at module scope"));
            }
        };

        let mut text = String::new();
        if let Some(binding) = var.binding {
            text.push_str(&format!("@group({}) @binding({})\n", binding.group, binding.binding));
        }
        let name = &self.globals[&handle];
        text.push_str(&format!("var{qualifier} {name}: {}", types.wgsl_name(var.ty)));
        if let Some(init) = var.init {
            text.push_str(" = ");
            text.push_str(&constant(self.module, init)?);
        }
        text.push_str(";\n");
        if !self.out.is_empty() {
            self.out.push('\n');
        }
        self.out.push_str(&text);
        Ok(())
    }
}

/// Renders a module constant as a WGSL expression.
fn constant(module: &Module, handle: Handle<Constant>) -> Result<String, BackendError> {
    let types = &module.types;
    let bad = || BackendError::Other(format!("invalid constant handle {}", handle.index()));
    match module.constants.try_get(handle).ok_or_else(bad)? {
        Constant::Scalar { .. } => {
            let value = module.constants.literal_value(types, handle).ok_or_else(bad)?;
            Ok(literal(value))
        }
        Constant::Composite { ty, components } => {
            let parts = components
                .iter()
                .map(|&c| constant(module, c))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(format!("{}({})", types.wgsl_name(*ty), parts.join(", ")))
        }
        Constant::Zero { ty } => Ok(format!("{}()", types.wgsl_name(*ty))),
    }
}

fn stage_attributes(stage: PipelineStage) -> String {
    match stage {
        PipelineStage::Vertex => "@vertex".into(),
        PipelineStage::Fragment => "@fragment".into(),
        PipelineStage::Compute {
            workgroup_size: [x, y, z],
        } => format!("@compute @workgroup_size({x}, {y}, {z})"),
    }
}

fn is_integer(module: &Module, ty: Handle<Type>) -> bool {
    module
        .types
        .try_get(ty)
        .and_then(Type::scalar)
        .is_some_and(|s| matches!(s.kind, ScalarKind::Sint | ScalarKind::Uint))
}

/// `@builtin(..)` / `@location(..)` prefix, with flat interpolation where
/// integer values cross the rasterizer.
fn binding_attributes(binding: Binding, flat: bool) -> String {
    match binding {
        Binding::BuiltIn(b) => format!("@builtin({}) ", b.name()),
        Binding::Location { location } if flat => {
            format!("@location({location}) @interpolate(flat) ")
        }
        Binding::Location { location } => format!("@location({location}) "),
    }
}

// ---- function bodies ---------------------------------------------------------------------

/// A memory location usable on either side of an assignment.
#[derive(Clone, Debug)]
struct Place {
    reference: String,
    /// Set when the place is reached through a pointer value.
    pointer: Option<String>,
}

impl Place {
    fn pointer(&self) -> String {
        match &self.pointer {
            Some(p) => p.clone(),
            None => format!("&{}", self.reference),
        }
    }
}

#[derive(Clone, Debug)]
enum Construct {
    Loop {
        continuing: Handle<Block>,
        merge: Handle<Block>,
    },
    Switch {
        merge: Handle<Block>,
        targets: Vec<Handle<Block>>,
    },
}

struct FunctionWriter<'w, 'a> {
    writer: &'w Writer<'a>,
    func: &'a Function,
    location: String,
    namer: Namer,
    exprs: HashMap<Handle<Value>, String>,
    places: HashMap<Handle<Value>, Place>,
    constructs: Vec<Construct>,
    visited: HashSet<Handle<Block>>,
    out: String,
    depth: usize,
}

impl<'w, 'a> FunctionWriter<'w, 'a> {
    fn new(writer: &'w Writer<'a>, func: &'a Function) -> Self {
        Self {
            writer,
            func,
            location: format!("function `{}`", func.name),
            namer: writer.namer.clone(),
            exprs: HashMap::new(),
            places: HashMap::new(),
            constructs: Vec::new(),
            visited: HashSet::new(),
            out: String::new(),
            depth: 0,
        }
    }

    fn error(&self, message: impl Into<String>) -> BackendError {
        BackendError::located(self.location.clone(), message)
    }

    fn line(&mut self, text: impl AsRef<str>) {
        for _ in 0..self.depth {
            self.out.push_str(INDENT);
        }
        self.out.push_str(text.as_ref());
        self.out.push('\n');
    }

    fn write(mut self, handle: Handle<Function>) -> Result<String, BackendError> {
        let module = self.writer.module;
        let func = self.func;
        let types = &module.types;

        let flat_inputs = func.stage == Some(PipelineStage::Fragment);
        let flat_result = func.stage == Some(PipelineStage::Vertex);
        let mut params = Vec::with_capacity(func.parameters.len());
        for (i, param) in func.parameters.iter().enumerate() {
            let value = func
                .parameter_value(i)
                .ok_or_else(|| self.error(format!("parameter {i} has no value")))?;
            let base = param.name.clone().unwrap_or_else(|| format!("param{i}"));
            let name = self.namer.call(&base);
            let mut text = String::new();
            if let Some(binding) = param.binding {
                text.push_str(&binding_attributes(
                    binding,
                    flat_inputs && is_integer(module, param.ty),
                ));
            }
            text.push_str(&format!("{name}: {}", types.wgsl_name(param.ty)));
            params.push(text);

            if matches!(types.try_get(param.ty), Some(Type::Pointer { .. })) {
                self.places.insert(
                    value,
                    Place {
                        reference: format!("(*{name})"),
                        pointer: Some(name),
                    },
                );
            } else {
                self.exprs.insert(value, name);
            }
        }

        let name = &self.writer.functions[&handle];
        let mut header = String::new();
        if let Some(stage) = func.stage {
            header.push_str(&stage_attributes(stage));
            header.push('\n');
        }
        header.push_str(&format!("fn {name}({})", params.join(", ")));
        if !matches!(types.try_get(func.return_type), Some(Type::Void) | None) {
            header.push_str(" -> ");
            if let Some(binding) = func.result_binding {
                header.push_str(&binding_attributes(
                    binding,
                    flat_result && is_integer(module, func.return_type),
                ));
            }
            header.push_str(&types.wgsl_name(func.return_type));
        }
        header.push_str(" {");
        self.line(header);

        let entry = func
            .entry
            .ok_or_else(|| self.error("function has no body"))?;
        self.depth += 1;
        self.region(entry, None)?;
        self.depth -= 1;
        self.line("}");
        Ok(self.out)
    }

    // ---- control flow -------------------------------------------------------------------

    /// `break`/`continue` for a branch leaving the current construct.
    fn exit(&self, target: Handle<Block>) -> Result<Option<&'static str>, BackendError> {
        match self.constructs.last() {
            Some(Construct::Loop { merge, .. }) if *merge == target => return Ok(Some("break;")),
            Some(Construct::Switch { merge, .. }) if *merge == target => {
                return Ok(Some("break;"));
            }
            Some(Construct::Switch { targets, .. }) if targets.contains(&target) => {
                return Err(self.error("switch fallthrough cannot be expressed in WGSL"));
            }
            _ => {}
        }
        let innermost_loop = self.constructs.iter().rev().find_map(|c| match c {
            Construct::Loop { continuing, .. } => Some(*continuing),
            Construct::Switch { .. } => None,
        });
        Ok((innermost_loop == Some(target)).then_some("continue;"))
    }

    fn loop_merge(&self) -> Option<Handle<Block>> {
        match self.constructs.last() {
            Some(Construct::Loop { merge, .. }) => Some(*merge),
            _ => None,
        }
    }

    /// Writes the blocks reached from `start` until control arrives at
    /// `stop` or leaves the region.
    fn region(
        &mut self,
        start: Handle<Block>,
        stop: Option<Handle<Block>>,
    ) -> Result<(), BackendError> {
        let func = self.func;
        let mut block = start;
        loop {
            if Some(block) == stop {
                return Ok(());
            }
            if !self.visited.insert(block) {
                return Err(self.error(format!(
                    "block {} is reached outside structured control flow",
                    block.index()
                )));
            }
            let instructions = &func
                .blocks
                .try_get(block)
                .ok_or_else(|| self.error(format!("invalid block {}", block.index())))?
                .instructions;
            let Some((&last, body)) = instructions.split_last() else {
                return Err(self.error(format!("block {} is empty", block.index())));
            };
            for &inst in body {
                self.statement(inst)?;
            }

            match &func.instructions[last].op {
                Op::Return { value: None } => {
                    self.line("return;");
                    return Ok(());
                }
                Op::Return { value: Some(v) } => {
                    let v = self.expr(*v)?;
                    self.line(format!("return {v};"));
                    return Ok(());
                }
                Op::Discard => {
                    self.line("discard;");
                    return Ok(());
                }
                Op::Unreachable => return Ok(()),
                Op::Branch { target } => {
                    if Some(*target) == stop {
                        return Ok(());
                    }
                    if let Some(jump) = self.exit(*target)? {
                        self.line(jump);
                        return Ok(());
                    }
                    block = *target;
                }
                Op::CondBranch {
                    condition,
                    accept,
                    reject,
                    merge: Some(merge),
                } => {
                    let condition = self.expr(*condition)?;
                    self.line(format!("if {condition} {{"));
                    self.depth += 1;
                    self.region(*accept, Some(*merge))?;
                    self.depth -= 1;
                    if reject != merge {
                        self.line("} else {");
                        self.depth += 1;
                        self.region(*reject, Some(*merge))?;
                        self.depth -= 1;
                    }
                    self.line("}");
                    block = *merge;
                }
                Op::CondBranch {
                    condition,
                    accept,
                    reject,
                    merge: None,
                } => {
                    let condition = self.expr(*condition)?;
                    let loop_merge = self.loop_merge();
                    // The back edge of a `continuing` block.
                    if stop == Some(*reject) && loop_merge == Some(*accept) {
                        self.line(format!("break if {condition};"));
                        return Ok(());
                    }
                    if stop == Some(*accept) && loop_merge == Some(*reject) {
                        self.line(format!("break if !({condition});"));
                        return Ok(());
                    }
                    if let Some(jump) = self.exit(*accept)? {
                        self.line(format!("if {condition} {{ {jump} }}"));
                        block = *reject;
                    } else if let Some(jump) = self.exit(*reject)? {
                        self.line(format!("if !({condition}) {{ {jump} }}"));
                        block = *accept;
                    } else {
                        return Err(self.error("conditional branch without a merge block"));
                    }
                }
                Op::Loop {
                    body,
                    continuing,
                    merge,
                } => {
                    self.write_loop(block, *body, *continuing, *merge)?;
                    block = *merge;
                }
                Op::Switch {
                    selector,
                    cases,
                    default,
                    merge: Some(merge),
                } => {
                    let selector = self.expr(*selector)?;
                    self.write_switch(selector, cases, *default, *merge)?;
                    block = *merge;
                }
                Op::Switch { merge: None, .. } => {
                    return Err(self.error("switch without a merge block"));
                }
                op => {
                    return Err(self.error(format!("`{}` does not end a block", op.name())));
                }
            }
        }
    }

    fn write_loop(
        &mut self,
        header: Handle<Block>,
        body: Handle<Block>,
        continuing: Handle<Block>,
        merge: Handle<Block>,
    ) -> Result<(), BackendError> {
        self.line("loop {");
        self.depth += 1;
        self.constructs.push(Construct::Loop { continuing, merge });
        self.region(body, Some(continuing))?;

        let mark = self.out.len();
        self.line("continuing {");
        let inner = self.out.len();
        self.depth += 1;
        self.region(continuing, Some(header))?;
        self.depth -= 1;
        if self.out.len() == inner {
            self.out.truncate(mark);
        } else {
            self.line("}");
        }

        self.constructs.pop();
        self.depth -= 1;
        self.line("}");
        Ok(())
    }

    fn write_switch(
        &mut self,
        selector: String,
        cases: &[SwitchCase],
        default: Handle<Block>,
        merge: Handle<Block>,
    ) -> Result<(), BackendError> {
        let module = self.writer.module;
        // Cases sharing a target become one clause.
        let mut clauses: Vec<(Handle<Block>, Vec<String>)> = Vec::new();
        for case in cases {
            let labels = case
                .selectors
                .iter()
                .map(|&c| constant(module, c))
                .collect::<Result<Vec<_>, _>>()?;
            match clauses.iter_mut().find(|(target, _)| *target == case.target) {
                Some((_, existing)) => existing.extend(labels),
                None => clauses.push((case.target, labels)),
            }
        }
        let mut default_written = false;
        for (target, labels) in &mut clauses {
            if *target == default {
                labels.push("default".into());
                default_written = true;
            }
        }

        self.line(format!("switch {selector} {{"));
        self.depth += 1;
        self.constructs.push(Construct::Switch {
            merge,
            targets: clauses.iter().map(|(t, _)| *t).collect(),
        });
        for (target, labels) in &clauses {
            self.line(format!("case {}: {{", labels.join(", ")));
            self.depth += 1;
            self.region(*target, Some(merge))?;
            self.depth -= 1;
            self.line("}");
        }
        if !default_written {
            if default == merge {
                self.line("default: {}");
            } else {
                self.line("default: {");
                self.depth += 1;
                self.region(default, Some(merge))?;
                self.depth -= 1;
                self.line("}");
            }
        }
        self.constructs.pop();
        self.depth -= 1;
        self.line("}");
        Ok(())
    }

    // ---- statements ---------------------------------------------------------------------

    fn value_name(&mut self, value: Handle<Value>) -> String {
        let func = self.func;
        let base = func.values[value]
            .name
            .clone()
            .unwrap_or_else(|| format!("_e{}", value.index()));
        self.namer.call(&base)
    }

    fn statement(&mut self, inst: Handle<Instruction>) -> Result<(), BackendError> {
        let module = self.writer.module;
        let func = self.func;
        let types = &module.types;
        let instruction = &func.instructions[inst];
        let result = instruction.result;

        match &instruction.op {
            Op::Variable { init } => {
                let value = self.result(instruction)?;
                let pointee = self.pointee(value)?;
                let name = self.value_name(value);
                let mut text = format!("var {name}: {}", types.wgsl_name(pointee));
                if let Some(init) = init {
                    text.push_str(" = ");
                    text.push_str(&constant(module, *init)?);
                }
                text.push(';');
                self.line(text);
                self.places.insert(
                    value,
                    Place {
                        reference: name,
                        pointer: None,
                    },
                );
            }
            Op::Load { pointer } => {
                let value = self.result(instruction)?;
                let place = self.place(*pointer)?;
                let loaded = &func.values[value];
                if matches!(
                    types.try_get(loaded.ty),
                    Some(Type::Texture { .. } | Type::Sampler { .. })
                ) {
                    self.exprs.insert(value, place.reference);
                } else {
                    self.bind(value, place.reference);
                }
            }
            Op::Store { pointer, value } => {
                let place = self.place(*pointer)?;
                let value = self.expr(*value)?;
                self.line(format!("{} = {value};", place.reference));
            }
            Op::AccessChain { base, steps } => {
                let value = self.result(instruction)?;
                let base_place = self.place(*base)?;
                let mut current = self.pointee(*base)?;
                let mut reference = base_place.reference;
                for step in steps {
                    match step.index {
                        AccessIndex::Constant(i) => {
                            reference.push_str(&self.component(current, i)?.0);
                        }
                        AccessIndex::Dynamic(index) => {
                            let index = self.expr(index)?;
                            reference.push_str(&format!("[{index}]"));
                        }
                    }
                    current = step.ty;
                }
                self.places.insert(
                    value,
                    Place {
                        reference,
                        pointer: None,
                    },
                );
            }
            Op::Call {
                function,
                arguments,
            } => {
                let name = self
                    .writer
                    .functions
                    .get(function)
                    .cloned()
                    .ok_or_else(|| self.error("call to an unknown function"))?;
                let arguments = self.arguments(arguments)?;
                let call = format!("{name}({})", arguments.join(", "));
                match result {
                    Some(value) => self.bind(value, call),
                    None => self.line(format!("{call};")),
                }
            }
            op => {
                let value = self.result(instruction)?;
                let expr = self.expression(op, value)?;
                self.bind(value, expr);
            }
        }
        Ok(())
    }

    fn result(&self, instruction: &Instruction) -> Result<Handle<Value>, BackendError> {
        instruction
            .result
            .ok_or_else(|| self.error(format!("`{}` has no result", instruction.op.name())))
    }

    fn bind(&mut self, value: Handle<Value>, expr: String) {
        let name = self.value_name(value);
        self.line(format!("let {name} = {expr};"));
        self.exprs.insert(value, name);
    }

    fn arguments(&self, values: &[Handle<Value>]) -> Result<Vec<String>, BackendError> {
        let types = &self.writer.module.types;
        values
            .iter()
            .map(|&v| match types.try_get(self.func.values[v].ty) {
                Some(Type::Pointer { .. }) => Ok(self.place(v)?.pointer()),
                _ => self.expr(v),
            })
            .collect()
    }

    /// The right-hand side of a `let` for a pure instruction.
    fn expression(&self, op: &Op, result: Handle<Value>) -> Result<String, BackendError> {
        let types = &self.writer.module.types;
        let result_ty = self.func.values[result].ty;
        Ok(match op {
            Op::Unary { op, operand } => {
                let symbol = match op {
                    UnaryOp::Negate => "-",
                    UnaryOp::LogicalNot => "!",
                    UnaryOp::BitwiseNot => "~",
                };
                format!("{symbol}({})", self.expr(*operand)?)
            }
            Op::Binary { op, left, right } => {
                format!(
                    "{} {} {}",
                    self.expr(*left)?,
                    op.symbol(),
                    self.expr(*right)?
                )
            }
            Op::Extract {
                composite,
                indices,
            } => {
                let mut text = self.expr(*composite)?;
                let mut current = self.func.values[*composite].ty;
                for &index in indices {
                    let (part, next) = self.component(current, index)?;
                    text.push_str(&part);
                    current = next;
                }
                text
            }
            Op::Construct { components } => {
                let parts = components
                    .iter()
                    .map(|&c| self.expr(c))
                    .collect::<Result<Vec<_>, _>>()?;
                format!("{}({})", types.wgsl_name(result_ty), parts.join(", "))
            }
            Op::Splat { value } | Op::Convert { value } => {
                format!("{}({})", types.wgsl_name(result_ty), self.expr(*value)?)
            }
            Op::Bitcast { value } => {
                format!("bitcast<{}>({})", types.wgsl_name(result_ty), self.expr(*value)?)
            }
            Op::Swizzle { vector, pattern } => {
                let letters: String = pattern.iter().map(|c| c.letter()).collect();
                format!("{}.{letters}", self.expr(*vector)?)
            }
            Op::Select {
                condition,
                accept,
                reject,
            } => format!(
                "select({}, {}, {})",
                self.expr(*reject)?,
                self.expr(*accept)?,
                self.expr(*condition)?
            ),
            Op::Math { fun, arguments } => {
                let arguments = self.arguments(arguments)?;
                format!("{}({})", fun.name(), arguments.join(", "))
            }
            op => return Err(self.error(format!("`{}` cannot appear inside a block", op.name()))),
        })
    }

    // ---- values -------------------------------------------------------------------------

    fn expr(&self, value: Handle<Value>) -> Result<String, BackendError> {
        let module = self.writer.module;
        let v = self
            .func
            .values
            .try_get(value)
            .ok_or_else(|| self.error(format!("invalid value {}", value.index())))?;
        match v.def {
            ValueDef::Constant(c) => constant(module, c),
            ValueDef::Global(_) => Err(self.error("a global reference is used as a value")),
            ValueDef::Parameter(_) | ValueDef::Instruction(_) => {
                self.exprs.get(&value).cloned().ok_or_else(|| {
                    self.error(format!(
                        "value {} is used outside the scope that defines it",
                        value.index()
                    ))
                })
            }
        }
    }

    fn place(&self, value: Handle<Value>) -> Result<Place, BackendError> {
        let v = &self.func.values[value];
        if let ValueDef::Global(global) = v.def {
            let name = self
                .writer
                .globals
                .get(&global)
                .cloned()
                .ok_or_else(|| self.error("reference to an unknown global"))?;
            return Ok(Place {
                reference: name,
                pointer: None,
            });
        }
        self.places
            .get(&value)
            .cloned()
            .ok_or_else(|| self.error(format!("value {} is not a pointer", value.index())))
    }

    fn pointee(&self, pointer: Handle<Value>) -> Result<Handle<Type>, BackendError> {
        let types = &self.writer.module.types;
        match types.try_get(self.func.values[pointer].ty) {
            Some(Type::Pointer { base, .. }) => Ok(types.strip_access(*base)),
            _ => Err(self.error(format!("value {} is not a pointer", pointer.index()))),
        }
    }

    /// Accessor text for element `index` of a `container` value, and the
    /// element type.
    fn component(
        &self,
        container: Handle<Type>,
        index: u32,
    ) -> Result<(String, Handle<Type>), BackendError> {
        let types = &self.writer.module.types;
        let missing = || self.error(format!("index {index} is out of range"));
        let container = types.strip_access(container);
        match &types[container] {
            Type::Struct(st) => {
                let member = st.members.get(index as usize).ok_or_else(missing)?;
                Ok((format!(".{}", member.name), member.ty))
            }
            Type::Vector { size, scalar } => {
                let letter = SwizzleComponent::XYZW
                    .get(index as usize)
                    .filter(|_| index < *size as u32)
                    .ok_or_else(missing)?
                    .letter();
                let element = types.lookup(&Type::Scalar(*scalar)).ok_or_else(missing)?;
                Ok((format!(".{letter}"), element))
            }
            Type::Matrix {
                columns,
                rows,
                scalar,
            } => {
                if index >= *columns as u32 {
                    return Err(missing());
                }
                let column = types
                    .lookup(&Type::Vector {
                        size: *rows,
                        scalar: *scalar,
                    })
                    .ok_or_else(missing)?;
                Ok((format!("[{index}]"), column))
            }
            Type::Array { base, .. } => Ok((format!("[{index}]"), *base)),
            _ => Err(self.error(format!(
                "{} has no components",
                types.wgsl_name(container)
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spindle_ir::{BinaryOp, BuiltIn, FunctionDecl, GlobalDecl, Scalar, StructMember};

    fn storage_array(module: &mut Module) -> Handle<Type> {
        let u32_ty = module.types.u32();
        let runtime = module.types.array(u32_ty, None).unwrap();
        module
            .types
            .access_controlled(runtime, AccessMode::ReadWrite)
            .unwrap()
    }

    #[test]
    fn compute_shader_with_inlined_access_chain() {
        let mut module = Module::new();
        let rw = storage_array(&mut module);
        let data = module
            .add_global(GlobalDecl::new("data", StorageClass::Storage, rw).binding(0, 0))
            .unwrap();
        let uvec3 = module.types.vector(Scalar::U32, 3).unwrap();
        let void = module.types.void();
        let main = module
            .add_function(
                FunctionDecl::new("main", void)
                    .parameter(
                        "gid",
                        uvec3,
                        Some(Binding::BuiltIn(BuiltIn::GlobalInvocationId)),
                    )
                    .stage(PipelineStage::Compute {
                        workgroup_size: [64, 1, 1],
                    }),
            )
            .unwrap();
        {
            let mut b = module.builder(main).unwrap();
            let gid = b.parameter(0).unwrap();
            let index = b.extract(gid, &[0]).unwrap();
            b.name_value(index, "index");
            let buffer = b.global(data).unwrap();
            let slot = b
                .access_chain(buffer, &[AccessIndex::Dynamic(index)])
                .unwrap();
            let value = b.load(slot).unwrap();
            b.name_value(value, "value");
            let two = b.literal(Literal::U32(2)).unwrap();
            let doubled = b.binary(BinaryOp::Multiply, value, two).unwrap();
            b.name_value(doubled, "doubled");
            b.store(slot, doubled).unwrap();
            b.ret(None).unwrap();
        }
        module.seal().unwrap();

        assert_eq!(
            write_module(&module).unwrap(),
            "\
@group(0) @binding(0)
var<storage, read_write> data: array<u32>;

@compute @workgroup_size(64, 1, 1)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let index = gid.x;
    let value = data[index];
    let doubled = value * 2u;
    data[index] = doubled;
    return;
}
"
        );
    }

    #[test]
    fn loop_with_break_and_break_if() {
        let mut module = Module::new();
        let u32_ty = module.types.u32();
        let f = module
            .add_function(FunctionDecl::new("count", u32_ty).parameter("n", u32_ty, None))
            .unwrap();
        {
            let mut b = module.builder(f).unwrap();
            let zero = {
                let (types, constants) = b.interners();
                constants.literal(types, Literal::U32(0))
            };
            let i = b.local_variable(u32_ty, Some(zero)).unwrap();
            b.name_value(i, "i");
            let header = b.create_block().unwrap();
            let body = b.create_block().unwrap();
            let leave = b.create_block().unwrap();
            let after_if = b.create_block().unwrap();
            let continuing = b.create_block().unwrap();
            let merge = b.create_block().unwrap();
            b.branch(header).unwrap();

            b.set_block(header).unwrap();
            b.loop_header(body, continuing, merge).unwrap();

            b.set_block(body).unwrap();
            let n = b.parameter(0).unwrap();
            let iv = b.load(i).unwrap();
            b.name_value(iv, "iv");
            let done = b.binary(BinaryOp::GreaterEqual, iv, n).unwrap();
            b.name_value(done, "done");
            b.cond_branch(done, leave, after_if, Some(after_if)).unwrap();

            b.set_block(leave).unwrap();
            b.branch(merge).unwrap();

            b.set_block(after_if).unwrap();
            b.branch(continuing).unwrap();

            b.set_block(continuing).unwrap();
            let current = b.load(i).unwrap();
            b.name_value(current, "current");
            let one = b.literal(Literal::U32(1)).unwrap();
            let next = b.binary(BinaryOp::Add, current, one).unwrap();
            b.name_value(next, "next");
            b.store(i, next).unwrap();
            let hundred = b.literal(Literal::U32(100)).unwrap();
            let limit = b.binary(BinaryOp::GreaterEqual, next, hundred).unwrap();
            b.name_value(limit, "limit");
            b.cond_branch(limit, merge, header, None).unwrap();

            b.set_block(merge).unwrap();
            let result = b.load(i).unwrap();
            b.name_value(result, "result");
            b.ret(Some(result)).unwrap();
        }
        module.seal().unwrap();

        assert_eq!(
            write_module(&module).unwrap(),
            "\
fn count(n: u32) -> u32 {
    var i: u32 = 0u;
    loop {
        let iv = i;
        let done = iv >= n;
        if done {
            break;
        }
        continuing {
            let current = i;
            let next = current + 1u;
            i = next;
            let limit = next >= 100u;
            break if limit;
        }
    }
    let result = i;
    return result;
}
"
        );
    }

    #[test]
    fn switch_with_shared_default() {
        let mut module = Module::new();
        let i32_ty = module.types.i32();
        let f = module
            .add_function(FunctionDecl::new("classify", i32_ty).parameter("x", i32_ty, None))
            .unwrap();
        {
            let mut b = module.builder(f).unwrap();
            let (one, two, three) = {
                let (types, constants) = b.interners();
                (
                    constants.literal(types, Literal::I32(1)),
                    constants.literal(types, Literal::I32(2)),
                    constants.literal(types, Literal::I32(3)),
                )
            };
            let small = b.create_block().unwrap();
            let large = b.create_block().unwrap();
            let merge = b.create_block().unwrap();
            let x = b.parameter(0).unwrap();
            b.switch(
                x,
                vec![
                    SwitchCase {
                        selectors: vec![one, two],
                        target: small,
                    },
                    SwitchCase {
                        selectors: vec![three],
                        target: large,
                    },
                ],
                large,
                Some(merge),
            )
            .unwrap();
            for (block, value) in [(small, 10), (large, -20)] {
                b.set_block(block).unwrap();
                let v = b.literal(Literal::I32(value)).unwrap();
                b.ret(Some(v)).unwrap();
            }
            b.set_block(merge).unwrap();
            b.unreachable().unwrap();
        }
        module.seal().unwrap();

        assert_eq!(
            write_module(&module).unwrap(),
            "\
fn classify(x: i32) -> i32 {
    switch x {
        case 1i, 2i: {
            return 10i;
        }
        case 3i, default: {
            return -20i;
        }
    }
}
"
        );
    }

    #[test]
    fn struct_gaps_become_size_attributes() {
        let mut module = Module::new();
        let f32_ty = module.types.f32();
        let vec4 = module.types.vector(Scalar::F32, 4).unwrap();
        let light = module.types.declare_struct("Light").unwrap();
        module
            .types
            .define_struct(
                light,
                vec![
                    StructMember {
                        name: "intensity".into(),
                        ty: f32_ty,
                        offset: 0,
                    },
                    StructMember {
                        name: "color".into(),
                        ty: vec4,
                        offset: 32,
                    },
                ],
            )
            .unwrap();
        module
            .add_global(GlobalDecl::new("light", StorageClass::Uniform, light).binding(0, 1))
            .unwrap();
        module.seal().unwrap();

        assert_eq!(
            write_module(&module).unwrap(),
            "\
struct Light {
    @size(32) intensity: f32,
    color: vec4<f32>,
}

@group(0) @binding(1)
var<uniform> light: Light;
"
        );
    }

    #[test]
    fn stage_io_globals_are_unsupported() {
        let mut module = Module::new();
        let vec4 = module.types.vector(Scalar::F32, 4).unwrap();
        module
            .add_global(
                GlobalDecl::new("color", StorageClass::Output, vec4)
                    .io(Binding::Location { location: 0 }),
            )
            .unwrap();
        module.seal().unwrap();
        let err = write_module(&module).unwrap_err();
        assert_eq!(
            err.to_string(),
            "global `color`: stage input/output globals have no WGSL equivalent"
        );
    }

    #[test]
    fn branch_without_merge_is_rejected() {
        let mut module = Module::new();
        let bool_ty = module.types.bool();
        let void = module.types.void();
        let f = module
            .add_function(FunctionDecl::new("f", void).parameter("c", bool_ty, None))
            .unwrap();
        {
            let mut b = module.builder(f).unwrap();
            let c = b.parameter(0).unwrap();
            let a = b.create_block().unwrap();
            let other = b.create_block().unwrap();
            b.cond_branch(c, a, other, None).unwrap();
            b.set_block(a).unwrap();
            b.ret(None).unwrap();
            b.set_block(other).unwrap();
            b.discard().unwrap();
        }
        module.seal().unwrap();
        let err = write_module(&module).unwrap_err();
        assert_eq!(
            err.to_string(),
            "function `f`: conditional branch without a merge block"
        );
    }

    #[test]
    fn pointer_parameters_are_dereferenced() {
        let mut module = Module::new();
        let f32_ty = module.types.f32();
        let ptr = module.types.pointer(f32_ty, StorageClass::Function).unwrap();
        let void = module.types.void();
        let bump = module
            .add_function(FunctionDecl::new("bump", void).parameter("p", ptr, None))
            .unwrap();
        {
            let mut b = module.builder(bump).unwrap();
            let p = b.parameter(0).unwrap();
            let old = b.load(p).unwrap();
            b.name_value(old, "old");
            let one = b.literal(Literal::F32(1.0)).unwrap();
            let bumped = b.binary(BinaryOp::Add, old, one).unwrap();
            b.name_value(bumped, "bumped");
            b.store(p, bumped).unwrap();
            b.ret(None).unwrap();
        }
        let caller = module.add_function(FunctionDecl::new("caller", void)).unwrap();
        {
            let mut b = module.builder(caller).unwrap();
            let v = b.local_variable(f32_ty, None).unwrap();
            b.name_value(v, "x");
            b.call(bump, &[v]).unwrap();
            b.ret(None).unwrap();
        }
        module.seal().unwrap();

        let text = write_module(&module).unwrap();
        assert!(text.contains("fn bump(p: ptr<function, f32>) {"), "{text}");
        assert!(text.contains("let old = (*p);"), "{text}");
        assert!(text.contains("let bumped = old + 1e0;"), "{text}");
        assert!(text.contains("(*p) = bumped;"), "{text}");
        assert!(text.contains("var x: f32;"), "{text}");
        assert!(text.contains("bump(&x);"), "{text}");
    }
}
