//! Display implementations and the canonical text dump.
//!
//! The dump is deterministic: value numbers are assigned in block layout
//! order, constants print by canonical name and globals by `@name`, so
//! two structurally identical modules dump to the same text regardless of
//! how their arenas happen to be ordered. Debug names and source
//! locations are left out.

use std::collections::HashMap;
use std::fmt::{self, Write as _};

use crate::Module;
use crate::arena::Handle;
use crate::constant::Constant;
use crate::func::{Function, PipelineStage};
use crate::global::{Binding, BuiltIn, GlobalVariable, ResourceBinding, StorageClass};
use crate::instruction::{
    AccessIndex, Block, Instruction, MathFunction, Op, SwizzleComponent, Value, ValueDef,
};
use crate::types::{Scalar, ScalarKind, Type, VectorSize};

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ScalarKind::Bool => write!(f, "bool"),
            ScalarKind::Sint => write!(f, "i{}", self.width * 8),
            ScalarKind::Uint => write!(f, "u{}", self.width * 8),
            ScalarKind::Float => write!(f, "f{}", self.width * 8),
        }
    }
}

impl fmt::Display for VectorSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as u32)
    }
}

impl fmt::Display for StorageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for BuiltIn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BuiltIn(b) => write!(f, "builtin {b}"),
            Self::Location { location } => write!(f, "location {location}"),
        }
    }
}

impl fmt::Display for ResourceBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group {} binding {}", self.group, self.binding)
    }
}

impl fmt::Display for MathFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for SwizzleComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_char(self.letter())
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compute {
                workgroup_size: [x, y, z],
            } => write!(f, "@compute({x}, {y}, {z})"),
            other => write!(f, "@{}", other.name()),
        }
    }
}

/// `Type{__vec_3__f32}`.
pub fn dump_type(module: &Module, ty: Handle<Type>) -> String {
    format!("Type{{{}}}", module.types.type_name(ty))
}

/// `Constant{__float1.0}`.
pub fn dump_constant(module: &Module, constant: Handle<Constant>) -> String {
    format!(
        "Constant{{{}}}",
        module.constants.name(&module.types, constant)
    )
}

/// `Variable{@name class type ...}`.
pub fn dump_global(module: &Module, global: Handle<GlobalVariable>) -> String {
    let var = &module.global_variables[global];
    let mut out = format!(
        "Variable{{@{} {} {}",
        var.name,
        var.space,
        module.types.type_name(var.ty)
    );
    if let Some(init) = var.init {
        let _ = write!(out, " init {}", module.constants.name(&module.types, init));
    }
    if let Some(binding) = var.binding {
        let _ = write!(out, " {binding}");
    }
    if let Some(io) = var.io {
        let _ = write!(out, " {io}");
    }
    out.push('}');
    out
}

/// Dumps one instruction of `function`, numbering values as the function
/// dump would.
pub fn dump_instruction(
    module: &Module,
    function: Handle<Function>,
    instruction: Handle<Instruction>,
) -> String {
    let func = &module.functions[function];
    let writer = FunctionWriter::new(module, func);
    writer.instruction(instruction)
}

/// Dumps one function, without a trailing newline.
pub fn dump_function(module: &Module, function: Handle<Function>) -> String {
    let func = &module.functions[function];
    let mut out = String::new();
    FunctionWriter::new(module, func).write(&mut out, 0);
    out.truncate(out.trim_end().len());
    out
}

/// Dumps the whole module.
pub fn dump_module(module: &Module) -> String {
    let mut out = String::from("Module{\n");

    let mut structs: Vec<_> = module
        .types
        .iter()
        .filter_map(|(_, ty)| match ty {
            Type::Struct(st) if st.is_defined() => Some(st),
            _ => None,
        })
        .collect();
    structs.sort_by(|a, b| a.name.cmp(&b.name));
    for st in structs {
        let _ = writeln!(out, "  Struct{{{}", st.name);
        for member in &st.members {
            let _ = writeln!(
                out,
                "    {} {} {}",
                member.name,
                module.types.type_name(member.ty),
                member.offset
            );
        }
        out.push_str("  }\n");
    }

    for global in module.global_variables.handles() {
        let _ = writeln!(out, "  {}", dump_global(module, global));
    }

    for (_, func) in module.functions.iter() {
        FunctionWriter::new(module, func).write(&mut out, 2);
    }

    out.push_str("}\n");
    out
}

struct FunctionWriter<'a> {
    module: &'a Module,
    func: &'a Function,
    layout: Vec<Handle<Block>>,
    block_ids: HashMap<Handle<Block>, usize>,
    value_ids: HashMap<Handle<Value>, usize>,
}

impl<'a> FunctionWriter<'a> {
    fn new(module: &'a Module, func: &'a Function) -> Self {
        let layout = func.layout();
        let block_ids = layout.iter().enumerate().map(|(i, &b)| (b, i)).collect();
        let mut value_ids = HashMap::new();
        for index in 0..func.parameters.len() {
            if let Some(value) = func.parameter_value(index) {
                value_ids.insert(value, index);
            }
        }
        for &block in &layout {
            for &inst in &func.blocks[block].instructions {
                if let Some(result) = func.instructions[inst].result {
                    let next = value_ids.len();
                    value_ids.insert(result, next);
                }
            }
        }
        Self {
            module,
            func,
            layout,
            block_ids,
            value_ids,
        }
    }

    fn ty(&self, ty: Handle<Type>) -> String {
        self.module.types.type_name(ty)
    }

    fn block(&self, block: Handle<Block>) -> String {
        match self.block_ids.get(&block) {
            Some(id) => format!("b{id}"),
            None => format!("b?{}", block.index()),
        }
    }

    fn value(&self, value: Handle<Value>) -> String {
        let Some(v) = self.func.values.try_get(value) else {
            return format!("%?{}", value.index());
        };
        match v.def {
            ValueDef::Constant(c) => self.module.constants.name(&self.module.types, c),
            ValueDef::Global(g) => format!("@{}", self.module.global_variables[g].name),
            ValueDef::Parameter(_) | ValueDef::Instruction(_) => match self.value_ids.get(&value) {
                Some(id) => format!("%{id}"),
                None => format!("%?{}", value.index()),
            },
        }
    }

    fn values(&self, values: &[Handle<Value>]) -> String {
        values
            .iter()
            .map(|&v| format!(" {}", self.value(v)))
            .collect()
    }

    fn write(&self, out: &mut String, indent: usize) {
        let pad = " ".repeat(indent);
        let func = self.func;
        let _ = write!(out, "{pad}Function{{{} -> {}", func.name, self.ty(func.return_type));
        if let Some(stage) = func.stage {
            let _ = write!(out, " {stage}");
        }
        if let Some(binding) = func.result_binding {
            let _ = write!(out, " {binding}");
        }
        out.push('\n');

        for (index, param) in func.parameters.iter().enumerate() {
            let id = func
                .parameter_value(index)
                .map(|v| self.value(v))
                .unwrap_or_default();
            let _ = write!(out, "{pad}  Parameter{{{id} {}", self.ty(param.ty));
            if let Some(binding) = param.binding {
                let _ = write!(out, " {binding}");
            }
            out.push_str("}\n");
        }

        for &block in &self.layout {
            let _ = writeln!(out, "{pad}  Block{{{}", self.block(block));
            for &inst in &func.blocks[block].instructions {
                let _ = writeln!(out, "{pad}    {}", self.instruction(inst));
            }
            let _ = writeln!(out, "{pad}  }}");
        }
        let _ = writeln!(out, "{pad}}}");
    }

    fn instruction(&self, handle: Handle<Instruction>) -> String {
        let inst = &self.func.instructions[handle];
        let ty = inst
            .result
            .map(|r| self.ty(self.func.values[r].ty))
            .unwrap_or_else(|| "__void".into());
        let body = match &inst.op {
            Op::Unary { op, operand } => format!("Unary{{{ty} {op:?} {}}}", self.value(*operand)),
            Op::Binary { op, left, right } => format!(
                "Binary{{{ty} {op:?} {} {}}}",
                self.value(*left),
                self.value(*right)
            ),
            Op::Variable { init } => match init {
                Some(c) => format!(
                    "Variable{{{ty} init {}}}",
                    self.module.constants.name(&self.module.types, *c)
                ),
                None => format!("Variable{{{ty}}}"),
            },
            Op::Load { pointer } => format!("Load{{{ty} {}}}", self.value(*pointer)),
            Op::Store { pointer, value } => {
                format!("Store{{{} {}}}", self.value(*pointer), self.value(*value))
            }
            Op::AccessChain { base, steps } => {
                let indices: String = steps
                    .iter()
                    .map(|step| match step.index {
                        AccessIndex::Constant(i) => format!(" {i}"),
                        AccessIndex::Dynamic(v) => format!(" {}", self.value(v)),
                    })
                    .collect();
                format!("AccessChain{{{ty} {}{indices}}}", self.value(*base))
            }
            Op::Extract { composite, indices } => {
                let indices: String = indices.iter().map(|i| format!(" {i}")).collect();
                format!("Extract{{{ty} {}{indices}}}", self.value(*composite))
            }
            Op::Construct { components } => {
                format!("Construct{{{ty}{}}}", self.values(components))
            }
            Op::Splat { value } => format!("Splat{{{ty} {}}}", self.value(*value)),
            Op::Swizzle { vector, pattern } => {
                let letters: String = pattern.iter().map(|c| c.letter()).collect();
                format!("Swizzle{{{ty} {} {letters}}}", self.value(*vector))
            }
            Op::Select {
                condition,
                accept,
                reject,
            } => format!(
                "Select{{{ty} {} {} {}}}",
                self.value(*condition),
                self.value(*accept),
                self.value(*reject)
            ),
            Op::Convert { value } => format!("Convert{{{ty} {}}}", self.value(*value)),
            Op::Bitcast { value } => format!("Bitcast{{{ty} {}}}", self.value(*value)),
            Op::Call {
                function,
                arguments,
            } => {
                let name = self
                    .module
                    .functions
                    .try_get(*function)
                    .map_or("?", |f| f.name.as_str());
                format!("Call{{{ty} {name}{}}}", self.values(arguments))
            }
            Op::Math { fun, arguments } => {
                format!("Math{{{ty} {fun}{}}}", self.values(arguments))
            }
            Op::Branch { target } => format!("Branch{{{}}}", self.block(*target)),
            Op::CondBranch {
                condition,
                accept,
                reject,
                merge,
            } => {
                let mut s = format!(
                    "CondBranch{{{} {} {}",
                    self.value(*condition),
                    self.block(*accept),
                    self.block(*reject)
                );
                if let Some(merge) = merge {
                    let _ = write!(s, " merge {}", self.block(*merge));
                }
                s.push('}');
                s
            }
            Op::Loop {
                body,
                continuing,
                merge,
            } => format!(
                "Loop{{body {} continuing {} merge {}}}",
                self.block(*body),
                self.block(*continuing),
                self.block(*merge)
            ),
            Op::Switch {
                selector,
                cases,
                default,
                merge,
            } => {
                let mut s = format!("Switch{{{}", self.value(*selector));
                for case in cases {
                    s.push_str(" case");
                    for &c in &case.selectors {
                        let _ = write!(s, " {}", self.module.constants.name(&self.module.types, c));
                    }
                    let _ = write!(s, " {}", self.block(case.target));
                }
                let _ = write!(s, " default {}", self.block(*default));
                if let Some(merge) = merge {
                    let _ = write!(s, " merge {}", self.block(*merge));
                }
                s.push('}');
                s
            }
            Op::Return { value } => match value {
                Some(v) => format!("Return{{{}}}", self.value(*v)),
                None => "Return{}".into(),
            },
            Op::Discard => "Discard{}".into(),
            Op::Unreachable => "Unreachable{}".into(),
        };
        match inst.result {
            Some(result) => format!("{} = {body}", self.value(result)),
            None => body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constant::Literal;
    use crate::func::FunctionDecl;
    use crate::global::GlobalDecl;
    use crate::instruction::BinaryOp;

    #[test]
    fn scalar_display() {
        assert_eq!(Scalar::F32.to_string(), "f32");
        assert_eq!(Scalar::BOOL.to_string(), "bool");
        assert_eq!(Scalar::U32.to_string(), "u32");
    }

    #[test]
    fn dump_small_function() {
        let mut module = Module::new();
        let f32_ty = module.types.f32();
        let g = module
            .add_global(GlobalDecl::new("scale", StorageClass::Uniform, f32_ty).binding(0, 1))
            .unwrap();
        let f = module
            .add_function(FunctionDecl::new("scaled", f32_ty).parameter("x", f32_ty, None))
            .unwrap();
        let mut b = module.builder(f).unwrap();
        let x = b.parameter(0).unwrap();
        let p = b.global(g).unwrap();
        let s = b.load(p).unwrap();
        let two = b.literal(Literal::F32(2.0)).unwrap();
        let y = b.binary(BinaryOp::Multiply, x, s).unwrap();
        let z = b.binary(BinaryOp::Add, y, two).unwrap();
        b.ret(Some(z)).unwrap();
        module.seal().unwrap();

        assert_eq!(
            dump_module(&module),
            "Module{\n\
             \x20 Variable{@scale uniform __f32 group 0 binding 1}\n\
             \x20 Function{scaled -> __f32\n\
             \x20   Parameter{%0 __f32}\n\
             \x20   Block{b0\n\
             \x20     %1 = Load{__f32 @scale}\n\
             \x20     %2 = Binary{__f32 Multiply %0 %1}\n\
             \x20     %3 = Binary{__f32 Add %2 __float2.0}\n\
             \x20     Return{%3}\n\
             \x20   }\n\
             \x20 }\n\
             }\n"
        );
        assert_eq!(dump_type(&module, f32_ty), "Type{__f32}");
    }

    #[test]
    fn blocks_are_numbered_by_layout() {
        let mut module = Module::new();
        let void = module.types.void();
        let bool_ty = module.types.bool();
        let f = module
            .add_function(
                FunctionDecl::new("main", void)
                    .parameter("c", bool_ty, None)
                    .stage(PipelineStage::Compute {
                        workgroup_size: [8, 1, 1],
                    }),
            )
            .unwrap();
        let mut b = module.builder(f).unwrap();
        let c = b.parameter(0).unwrap();
        // Created out of order on purpose.
        let merge = b.create_block().unwrap();
        let accept = b.create_block().unwrap();
        b.cond_branch(c, accept, merge, Some(merge)).unwrap();
        b.set_block(accept).unwrap();
        b.branch(merge).unwrap();
        b.set_block(merge).unwrap();
        b.ret(None).unwrap();
        module.seal().unwrap();

        assert_eq!(
            dump_function(&module, f),
            "Function{main -> __void @compute(8, 1, 1)\n\
             \x20 Parameter{%0 __bool}\n\
             \x20 Block{b0\n\
             \x20   CondBranch{%0 b1 b2 merge b2}\n\
             \x20 }\n\
             \x20 Block{b1\n\
             \x20   Branch{b2}\n\
             \x20 }\n\
             \x20 Block{b2\n\
             \x20   Return{}\n\
             \x20 }\n\
             }"
        );
    }

    #[test]
    fn struct_dump_sorted_by_name() {
        let mut module = Module::new();
        let f32_ty = module.types.f32();
        for name in ["B", "A"] {
            let s = module.types.declare_struct(name).unwrap();
            let members = module
                .types
                .layout_members(vec![("x".into(), f32_ty)])
                .unwrap();
            module.types.define_struct(s, members).unwrap();
        }
        let dump = dump_module(&module);
        let a = dump.find("Struct{A").unwrap();
        let b = dump.find("Struct{B").unwrap();
        assert!(a < b);
        assert!(dump.contains("    x __f32 0\n"));
    }
}
