//! SPIR-V binary back to Spindle IR.
//!
//! Reads the subset of SPIR-V the writer produces: logical addressing,
//! 32-bit scalars, structured control flow and `GLSL.std.450` math. Block
//! wrappers around buffers are unwrapped again and entry point interface
//! variables named `<entry>::<parameter>` become parameters.
//!
//! Function bodies are rebuilt through a verbatim [`Builder`], so the
//! resulting module holds exactly the instructions found in the binary.

use std::collections::HashMap;

use rspirv::binary::parse_words;
use rspirv::dr::{self, Instruction, Loader, Operand};
use rspirv::spirv::{self, Word};
use spindle_ir::{
    AccessIndex, AccessMode, BinaryOp, Binding, BuildOptions, Builder, Constant, Function,
    FunctionDecl, FunctionParameter, GlobalDecl, GlobalVariable, Handle, IrError, MathFunction,
    Module, PipelineStage, Scalar, StorageClass, StructMember, SwitchCase,
    SwizzleComponent, TextureClass, Type, UnaryOp, Value,
};

use crate::mapping;

/// Errors raised while reading a SPIR-V binary.
#[derive(Debug, thiserror::Error)]
pub enum SpirvReadError {
    /// The binary could not be decoded.
    #[error("invalid SPIR-V binary: {0}")]
    Parse(String),
    #[error("unsupported instruction `Op{0:?}`")]
    UnsupportedOp(spirv::Op),
    #[error("reference to unknown id %{0}")]
    UnknownId(Word),
    #[error("malformed `Op{op:?}`: {reason}")]
    Malformed { op: spirv::Op, reason: String },
    /// The decoded module does not form valid IR.
    #[error(transparent)]
    Ir(#[from] IrError),
}

/// Reads a module from a little-endian byte stream.
pub fn read_bytes(bytes: &[u8]) -> Result<Module, SpirvReadError> {
    if bytes.len() % 4 != 0 {
        return Err(SpirvReadError::Parse(format!(
            "length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    read_module(&words)
}

/// Reads a module from SPIR-V words and seals it.
pub fn read_module(words: &[u32]) -> Result<Module, SpirvReadError> {
    let mut loader = Loader::new();
    parse_words(words, &mut loader).map_err(|e| SpirvReadError::Parse(format!("{e:?}")))?;
    let spv = loader.module();

    let mut module = Module::new();
    let ctx = Context::new(&spv, &mut module)?;
    for (function, &handle) in spv.functions.iter().zip(&ctx.function_order) {
        read_body(&ctx, &mut module, handle, function)?;
    }
    module.seal()?;
    log::debug!(
        "read SPIR-V module: {} globals, {} functions",
        module.global_variables.len(),
        module.functions.len()
    );
    Ok(module)
}

// ---- operand helpers ----------------------------------------------------------------------

fn malformed(inst: &Instruction, reason: impl Into<String>) -> SpirvReadError {
    SpirvReadError::Malformed {
        op: inst.class.opcode,
        reason: reason.into(),
    }
}

fn id_operand(inst: &Instruction, index: usize) -> Result<Word, SpirvReadError> {
    match inst.operands.get(index) {
        Some(Operand::IdRef(id)) => Ok(*id),
        _ => Err(malformed(inst, format!("operand {index} is not an id"))),
    }
}

fn literal_operand(inst: &Instruction, index: usize) -> Result<u32, SpirvReadError> {
    match inst.operands.get(index) {
        Some(Operand::LiteralBit32(v)) => Ok(*v),
        _ => Err(malformed(inst, format!("operand {index} is not a 32-bit literal"))),
    }
}

fn string_operand(inst: &Instruction, index: usize) -> Result<&str, SpirvReadError> {
    match inst.operands.get(index) {
        Some(Operand::LiteralString(s)) => Ok(s),
        _ => Err(malformed(inst, format!("operand {index} is not a string"))),
    }
}

fn result_id(inst: &Instruction) -> Result<Word, SpirvReadError> {
    inst.result_id.ok_or_else(|| malformed(inst, "missing result id"))
}

fn result_type(inst: &Instruction) -> Result<Word, SpirvReadError> {
    inst.result_type.ok_or_else(|| malformed(inst, "missing result type"))
}

fn id_operands(inst: &Instruction, from: usize) -> Result<Vec<Word>, SpirvReadError> {
    (from..inst.operands.len()).map(|i| id_operand(inst, i)).collect()
}

// ---- module-level state -------------------------------------------------------------------

#[derive(Clone, Debug, Default)]
struct Decorations {
    set: Option<u32>,
    binding: Option<u32>,
    location: Option<u32>,
    builtin: Option<spirv::BuiltIn>,
    block: bool,
    non_writable: bool,
    non_readable: bool,
}

impl Decorations {
    fn io(&self) -> Option<Binding> {
        match (self.builtin, self.location) {
            (Some(builtin), _) => mapping::builtin_from(builtin).map(Binding::BuiltIn),
            (None, Some(location)) => Some(Binding::Location { location }),
            (None, None) => None,
        }
    }

    fn access(&self) -> AccessMode {
        match (self.non_writable, self.non_readable) {
            (true, _) => AccessMode::Read,
            (false, true) => AccessMode::Write,
            (false, false) => AccessMode::ReadWrite,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct GlobalRef {
    handle: Handle<GlobalVariable>,
    /// Declared inside a block wrapper; member 0 holds the value.
    wrapped: bool,
}

#[derive(Debug, Default)]
struct EntryInfo {
    name: String,
    stage: Option<PipelineStage>,
    /// Input variables and their name suffixes, in interface order.
    params: Vec<(Word, String)>,
    result: Option<Word>,
}

struct Context<'m> {
    names: HashMap<Word, &'m str>,
    member_names: HashMap<(Word, u32), &'m str>,
    decorations: HashMap<Word, Decorations>,
    member_offsets: HashMap<(Word, u32), u32>,
    defs: HashMap<Word, &'m Instruction>,
    types: HashMap<Word, Handle<Type>>,
    constants: HashMap<Word, Handle<Constant>>,
    globals: HashMap<Word, GlobalRef>,
    functions: HashMap<Word, Handle<Function>>,
    function_order: Vec<Handle<Function>>,
    /// Entry point input variable -> parameter index.
    param_vars: HashMap<Word, usize>,
    result_vars: Vec<Word>,
    glsl: Option<Word>,
}

impl<'m> Context<'m> {
    fn new(spv: &'m dr::Module, module: &mut Module) -> Result<Self, SpirvReadError> {
        let mut ctx = Self {
            names: HashMap::new(),
            member_names: HashMap::new(),
            decorations: HashMap::new(),
            member_offsets: HashMap::new(),
            defs: HashMap::new(),
            types: HashMap::new(),
            constants: HashMap::new(),
            globals: HashMap::new(),
            functions: HashMap::new(),
            function_order: Vec::new(),
            param_vars: HashMap::new(),
            result_vars: Vec::new(),
            glsl: None,
        };
        for inst in &spv.ext_inst_imports {
            if string_operand(inst, 0)? == mapping::GLSL_STD_450 {
                ctx.glsl = Some(result_id(inst)?);
            }
        }
        ctx.collect_debug(spv)?;
        ctx.collect_annotations(spv)?;
        for inst in &spv.types_global_values {
            if let Some(id) = inst.result_id {
                ctx.defs.insert(id, inst);
            }
        }
        let entries = ctx.collect_entries(spv)?;
        for inst in &spv.types_global_values {
            ctx.global_value(module, inst)?;
        }
        ctx.declare_functions(spv, module, &entries)?;
        Ok(ctx)
    }

    fn collect_debug(&mut self, spv: &'m dr::Module) -> Result<(), SpirvReadError> {
        for inst in &spv.debug_names {
            match inst.class.opcode {
                spirv::Op::Name => {
                    self.names.insert(id_operand(inst, 0)?, string_operand(inst, 1)?);
                }
                spirv::Op::MemberName => {
                    let key = (id_operand(inst, 0)?, literal_operand(inst, 1)?);
                    self.member_names.insert(key, string_operand(inst, 2)?);
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn collect_annotations(&mut self, spv: &dr::Module) -> Result<(), SpirvReadError> {
        for inst in &spv.annotations {
            match inst.class.opcode {
                spirv::Op::Decorate => {
                    let target = id_operand(inst, 0)?;
                    let Some(Operand::Decoration(decoration)) = inst.operands.get(1) else {
                        return Err(malformed(inst, "missing decoration"));
                    };
                    let entry = self.decorations.entry(target).or_default();
                    match decoration {
                        spirv::Decoration::DescriptorSet => entry.set = Some(literal_operand(inst, 2)?),
                        spirv::Decoration::Binding => entry.binding = Some(literal_operand(inst, 2)?),
                        spirv::Decoration::Location => entry.location = Some(literal_operand(inst, 2)?),
                        spirv::Decoration::BuiltIn => match inst.operands.get(2) {
                            Some(Operand::BuiltIn(builtin)) => entry.builtin = Some(*builtin),
                            _ => return Err(malformed(inst, "missing built-in")),
                        },
                        spirv::Decoration::Block => entry.block = true,
                        spirv::Decoration::NonWritable => entry.non_writable = true,
                        spirv::Decoration::NonReadable => entry.non_readable = true,
                        _ => {}
                    }
                }
                spirv::Op::MemberDecorate => {
                    if let Some(Operand::Decoration(spirv::Decoration::Offset)) = inst.operands.get(2) {
                        let key = (id_operand(inst, 0)?, literal_operand(inst, 1)?);
                        self.member_offsets.insert(key, literal_operand(inst, 3)?);
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Entry points by function id. Interface variables named
    /// `<entry>::<suffix>` are claimed as parameters or the result.
    fn collect_entries(&mut self, spv: &dr::Module) -> Result<HashMap<Word, EntryInfo>, SpirvReadError> {
        let mut entries: HashMap<Word, EntryInfo> = HashMap::new();
        for inst in &spv.entry_points {
            let Some(Operand::ExecutionModel(model)) = inst.operands.first() else {
                return Err(malformed(inst, "missing execution model"));
            };
            let function = id_operand(inst, 1)?;
            let name = string_operand(inst, 2)?.to_string();
            let stage = match model {
                spirv::ExecutionModel::Vertex => PipelineStage::Vertex,
                spirv::ExecutionModel::Fragment => PipelineStage::Fragment,
                spirv::ExecutionModel::GLCompute => PipelineStage::Compute {
                    workgroup_size: [1, 1, 1],
                },
                other => {
                    return Err(malformed(inst, format!("execution model {other:?}")));
                }
            };
            let prefix = format!("{name}::");
            let mut info = EntryInfo {
                name,
                stage: Some(stage),
                ..EntryInfo::default()
            };
            for var in id_operands(inst, 3)? {
                let Some(suffix) = self.names.get(&var).and_then(|n| n.strip_prefix(&prefix)) else {
                    continue;
                };
                let class = self
                    .defs
                    .get(&var)
                    .and_then(|v| v.operands.first())
                    .cloned();
                match class {
                    Some(Operand::StorageClass(spirv::StorageClass::Input)) => {
                        self.param_vars.insert(var, info.params.len());
                        info.params.push((var, suffix.to_string()));
                    }
                    Some(Operand::StorageClass(spirv::StorageClass::Output)) if suffix == "result" => {
                        self.result_vars.push(var);
                        info.result = Some(var);
                    }
                    _ => {}
                }
            }
            entries.insert(function, info);
        }
        for inst in &spv.execution_modes {
            let function = id_operand(inst, 0)?;
            if let Some(Operand::ExecutionMode(spirv::ExecutionMode::LocalSize)) = inst.operands.get(1)
                && let Some(EntryInfo {
                    stage: Some(PipelineStage::Compute { workgroup_size }),
                    ..
                }) = entries.get_mut(&function)
            {
                *workgroup_size = [
                    literal_operand(inst, 2)?,
                    literal_operand(inst, 3)?,
                    literal_operand(inst, 4)?,
                ];
            }
        }
        Ok(entries)
    }

    fn is_interface_var(&self, id: Word) -> bool {
        self.param_vars.contains_key(&id) || self.result_vars.contains(&id)
    }

    fn ty(&self, id: Word) -> Result<Handle<Type>, SpirvReadError> {
        self.types.get(&id).copied().ok_or(SpirvReadError::UnknownId(id))
    }

    fn constant(&self, id: Word) -> Result<Handle<Constant>, SpirvReadError> {
        self.constants.get(&id).copied().ok_or(SpirvReadError::UnknownId(id))
    }

    /// Member 0 of a block wrapper struct.
    fn block_member(&self, id: Word) -> Option<Word> {
        let def = self.defs.get(&id)?;
        let is_block = self.decorations.get(&id).is_some_and(|d| d.block);
        if def.class.opcode == spirv::Op::TypeStruct && is_block {
            id_operand(def, 0).ok()
        } else {
            None
        }
    }

    fn pointee(&self, pointer_type: Word) -> Result<Word, SpirvReadError> {
        let def = self
            .defs
            .get(&pointer_type)
            .ok_or(SpirvReadError::UnknownId(pointer_type))?;
        if def.class.opcode != spirv::Op::TypePointer {
            return Err(malformed(def, "expected a pointer type"));
        }
        id_operand(def, 1)
    }

    // ---- types, constants and globals ---------------------------------------------------

    fn global_value(&mut self, module: &mut Module, inst: &'m Instruction) -> Result<(), SpirvReadError> {
        use spirv::Op;

        let opcode = inst.class.opcode;
        let types = &mut module.types;
        let handle = match opcode {
            Op::TypeVoid => types.void(),
            Op::TypeBool => types.bool(),
            Op::TypeInt => {
                if literal_operand(inst, 0)? != 32 {
                    return Err(malformed(inst, "only 32-bit integers are supported"));
                }
                if literal_operand(inst, 1)? == 1 {
                    types.i32()
                } else {
                    types.u32()
                }
            }
            Op::TypeFloat => {
                if literal_operand(inst, 0)? != 32 {
                    return Err(malformed(inst, "only 32-bit floats are supported"));
                }
                types.f32()
            }
            Op::TypeVector => {
                let scalar = types[self.ty(id_operand(inst, 0)?)?]
                    .scalar()
                    .ok_or_else(|| malformed(inst, "vector of a non-scalar"))?;
                types.vector(scalar, literal_operand(inst, 1)?)?
            }
            Op::TypeMatrix => {
                let rows = types[self.ty(id_operand(inst, 0)?)?]
                    .vector_size()
                    .ok_or_else(|| malformed(inst, "matrix column is not a vector"))?;
                types.matrix(literal_operand(inst, 1)?, rows as u32)?
            }
            Op::TypeArray => {
                let base = self.ty(id_operand(inst, 0)?)?;
                let length_id = id_operand(inst, 1)?;
                let length = self
                    .defs
                    .get(&length_id)
                    .filter(|d| d.class.opcode == Op::Constant)
                    .ok_or_else(|| malformed(inst, "array length is not a constant"))?;
                types
                    .array(base, Some(literal_operand(length, 0)?))
                    .map_err(|e| malformed(inst, e.to_string()))?
            }
            Op::TypeRuntimeArray => types.array(self.ty(id_operand(inst, 0)?)?, None)?,
            Op::TypeStruct => {
                let id = result_id(inst)?;
                if self.decorations.get(&id).is_some_and(|d| d.block) {
                    return Ok(());
                }
                self.struct_type(module, inst, id)?
            }
            Op::TypePointer => {
                let Some(Operand::StorageClass(class)) = inst.operands.first() else {
                    return Err(malformed(inst, "missing storage class"));
                };
                let space = mapping::storage_class_from(*class)
                    .ok_or_else(|| malformed(inst, format!("storage class {class:?}")))?;
                let pointee = id_operand(inst, 1)?;
                let base = self.ty(self.block_member(pointee).unwrap_or(pointee))?;
                types.pointer(base, space)?
            }
            Op::TypeImage => self.image_type(module, inst, AccessMode::ReadWrite)?,
            Op::TypeSampler => types.sampler(false),
            Op::TypeFunction => return Ok(()),
            Op::Constant | Op::ConstantTrue | Op::ConstantFalse => {
                let ty = self.ty(result_type(inst)?)?;
                let bits = match opcode {
                    Op::ConstantTrue => 1,
                    Op::ConstantFalse => 0,
                    _ => literal_operand(inst, 0)?,
                };
                let c = module.constants.scalar(&module.types, ty, bits)?;
                self.constants.insert(result_id(inst)?, c);
                return Ok(());
            }
            Op::ConstantComposite => {
                let ty = self.ty(result_type(inst)?)?;
                let components = id_operands(inst, 0)?
                    .into_iter()
                    .map(|id| self.constant(id))
                    .collect::<Result<Vec<_>, _>>()?;
                let c = module.constants.composite(&module.types, ty, components)?;
                self.constants.insert(result_id(inst)?, c);
                return Ok(());
            }
            Op::ConstantNull => {
                let ty = self.ty(result_type(inst)?)?;
                let c = module.constants.zero(&module.types, ty)?;
                self.constants.insert(result_id(inst)?, c);
                return Ok(());
            }
            Op::Variable => return self.global_variable(module, inst),
            other => return Err(SpirvReadError::UnsupportedOp(other)),
        };
        self.types.insert(result_id(inst)?, handle);
        Ok(())
    }

    fn struct_type(&mut self, module: &mut Module, inst: &Instruction, id: Word) -> Result<Handle<Type>, SpirvReadError> {
        let name = match self.names.get(&id) {
            Some(name) => (*name).to_string(),
            None => format!("Struct{id}"),
        };
        let handle = module.types.declare_struct(&name)?;
        let mut members = Vec::with_capacity(inst.operands.len());
        let mut offsets = Vec::with_capacity(inst.operands.len());
        for (index, member) in id_operands(inst, 0)?.into_iter().enumerate() {
            let index = index as u32;
            let name = match self.member_names.get(&(id, index)) {
                Some(name) => (*name).to_string(),
                None => format!("member{index}"),
            };
            members.push((name, self.ty(member)?));
            offsets.push(self.member_offsets.get(&(id, index)).copied());
        }
        let members: Vec<StructMember> = match offsets.into_iter().collect::<Option<Vec<_>>>() {
            Some(offsets) => members
                .into_iter()
                .zip(offsets)
                .map(|((name, ty), offset)| StructMember { name, ty, offset })
                .collect(),
            None => module.types.layout_members(members)?,
        };
        module.types.define_struct(handle, members)?;
        Ok(handle)
    }

    fn image_type(&self, module: &mut Module, inst: &Instruction, access: AccessMode) -> Result<Handle<Type>, SpirvReadError> {
        let kind = module.types[self.ty(id_operand(inst, 0)?)?]
            .scalar()
            .map(|s| s.kind)
            .ok_or_else(|| malformed(inst, "image of a non-scalar"))?;
        let Some(Operand::Dim(dim)) = inst.operands.get(1) else {
            return Err(malformed(inst, "missing dimension"));
        };
        let depth = literal_operand(inst, 2)?;
        let arrayed = literal_operand(inst, 3)? == 1;
        let multisampled = literal_operand(inst, 4)? == 1;
        let sampled = literal_operand(inst, 5)?;
        let dim = mapping::texture_dimension(*dim, arrayed)
            .ok_or_else(|| malformed(inst, format!("dimension {dim:?}")))?;
        let class = if sampled == 2 {
            let Some(Operand::ImageFormat(format)) = inst.operands.get(6) else {
                return Err(malformed(inst, "missing image format"));
            };
            let format = mapping::storage_format_from(*format)
                .ok_or_else(|| malformed(inst, format!("image format {format:?}")))?;
            TextureClass::Storage { format, access }
        } else if depth == 1 {
            TextureClass::Depth
        } else {
            TextureClass::Sampled { kind, multisampled }
        };
        Ok(module.types.texture(dim, class)?)
    }

    fn global_variable(&mut self, module: &mut Module, inst: &Instruction) -> Result<(), SpirvReadError> {
        let id = result_id(inst)?;
        if self.is_interface_var(id) {
            return Ok(());
        }
        let Some(Operand::StorageClass(class)) = inst.operands.first() else {
            return Err(malformed(inst, "missing storage class"));
        };
        let space = mapping::storage_class_from(*class)
            .ok_or_else(|| malformed(inst, format!("storage class {class:?}")))?;
        let pointee = self.pointee(result_type(inst)?)?;
        let member = self.block_member(pointee);
        let decorations = self.decorations.get(&id).cloned().unwrap_or_default();

        let mut ty = self.ty(member.unwrap_or(pointee))?;
        if let Some(def) = self.defs.get(&pointee)
            && def.class.opcode == spirv::Op::TypeImage
            && matches!(module.types[ty], Type::Texture { class: TextureClass::Storage { .. }, .. })
        {
            ty = self.image_type(module, def, decorations.access())?;
        }
        if space == StorageClass::Storage {
            ty = module.types.access_controlled(ty, decorations.access())?;
        }

        let name = match self.names.get(&id) {
            Some(name) => (*name).to_string(),
            None => format!("global{id}"),
        };
        let mut decl = GlobalDecl::new(name, space, ty);
        if inst.operands.len() > 1 {
            decl = decl.init(self.constant(id_operand(inst, 1)?)?);
        }
        if let (Some(group), Some(binding)) = (decorations.set, decorations.binding) {
            decl = decl.binding(group, binding);
        }
        decl.io = decorations.io();
        let handle = module.add_global(decl)?;
        self.globals.insert(
            id,
            GlobalRef {
                handle,
                wrapped: member.is_some(),
            },
        );
        Ok(())
    }

    // ---- functions ----------------------------------------------------------------------

    fn declare_functions(
        &mut self,
        spv: &dr::Module,
        module: &mut Module,
        entries: &HashMap<Word, EntryInfo>,
    ) -> Result<(), SpirvReadError> {
        for function in &spv.functions {
            let def = function
                .def
                .as_ref()
                .ok_or_else(|| SpirvReadError::Parse("function without OpFunction".into()))?;
            let id = result_id(def)?;
            let decl = match entries.get(&id) {
                Some(entry) => self.entry_decl(module, entry)?,
                None => {
                    let name = match self.names.get(&id) {
                        Some(name) => (*name).to_string(),
                        None => format!("function{id}"),
                    };
                    let mut decl = FunctionDecl::new(name, self.ty(result_type(def)?)?);
                    for param in &function.parameters {
                        let param_id = result_id(param)?;
                        decl.parameters.push(FunctionParameter {
                            name: self.names.get(&param_id).map(|n| (*n).to_string()),
                            ty: self.ty(result_type(param)?)?,
                            binding: None,
                        });
                    }
                    decl
                }
            };
            let handle = module.add_function(decl)?;
            self.functions.insert(id, handle);
            self.function_order.push(handle);
        }
        Ok(())
    }

    fn entry_decl(&self, module: &mut Module, entry: &EntryInfo) -> Result<FunctionDecl, SpirvReadError> {
        let var_type = |var: Word| -> Result<Handle<Type>, SpirvReadError> {
            let def = self.defs.get(&var).ok_or(SpirvReadError::UnknownId(var))?;
            self.ty(self.pointee(result_type(def)?)?)
        };
        let io = |var: Word| self.decorations.get(&var).and_then(Decorations::io);

        let return_type = match entry.result {
            Some(var) => var_type(var)?,
            None => module.types.void(),
        };
        let mut decl = FunctionDecl::new(entry.name.clone(), return_type);
        decl.stage = entry.stage;
        decl.result_binding = entry.result.and_then(io);
        for (index, (var, suffix)) in entry.params.iter().enumerate() {
            let unnamed = suffix.parse::<usize>().ok() == Some(index);
            decl.parameters.push(FunctionParameter {
                name: (!unnamed).then(|| suffix.clone()),
                ty: var_type(*var)?,
                binding: io(*var),
            });
        }
        Ok(decl)
    }
}

// ---- function bodies ----------------------------------------------------------------------

enum Merge {
    Selection(Word),
    Loop { merge: Word, continuing: Word },
}

struct BodyReader<'c, 'm, 'b> {
    ctx: &'c Context<'m>,
    builder: Builder<'b>,
    values: HashMap<Word, Handle<Value>>,
    blocks: HashMap<Word, Handle<spindle_ir::Block>>,
    merge: Option<Merge>,
    /// Value stored to the entry point's result variable.
    returning: Option<Handle<Value>>,
    /// Bool vectors built by repeating one scalar, kept unbuilt until a use
    /// other than a `select` condition needs them.
    pending_splats: HashMap<Word, (u32, Word)>,
}

fn read_body(
    ctx: &Context<'_>,
    module: &mut Module,
    function: Handle<Function>,
    spv_fn: &dr::Function,
) -> Result<(), SpirvReadError> {
    let builder = module.builder_with_options(function, BuildOptions::verbatim())?;
    let mut reader = BodyReader {
        ctx,
        builder,
        values: HashMap::new(),
        blocks: HashMap::new(),
        merge: None,
        returning: None,
        pending_splats: HashMap::new(),
    };
    for (index, param) in spv_fn.parameters.iter().enumerate() {
        let value = reader.builder.parameter(index)?;
        reader.values.insert(result_id(param)?, value);
    }
    let mut labels = Vec::with_capacity(spv_fn.blocks.len());
    for (index, block) in spv_fn.blocks.iter().enumerate() {
        let label = block
            .label
            .as_ref()
            .and_then(|l| l.result_id)
            .ok_or_else(|| SpirvReadError::Parse("block without a label".into()))?;
        labels.push(label);
        let handle = if index == 0 {
            reader
                .builder
                .entry_block()
                .ok_or_else(|| SpirvReadError::Parse("function without an entry block".into()))?
        } else {
            reader.builder.create_block()?
        };
        reader.blocks.insert(label, handle);
    }
    for (block, label) in spv_fn.blocks.iter().zip(labels) {
        let handle = reader.block(label)?;
        reader.builder.set_block(handle)?;
        for inst in &block.instructions {
            reader.instruction(inst)?;
        }
    }
    Ok(())
}

impl BodyReader<'_, '_, '_> {
    fn block(&self, label: Word) -> Result<Handle<spindle_ir::Block>, SpirvReadError> {
        self.blocks.get(&label).copied().ok_or(SpirvReadError::UnknownId(label))
    }

    fn value(&mut self, id: Word) -> Result<Handle<Value>, SpirvReadError> {
        if let Some(&value) = self.values.get(&id) {
            return Ok(value);
        }
        let value = if let Some((width, scalar)) = self.pending_splats.remove(&id) {
            let scalar = self.value(scalar)?;
            self.builder.splat(width, scalar)?
        } else if let Some(&constant) = self.ctx.constants.get(&id) {
            self.builder.constant(constant)?
        } else if let Some(global) = self.ctx.globals.get(&id) {
            self.builder.global(global.handle)?
        } else {
            return Err(SpirvReadError::UnknownId(id));
        };
        self.values.insert(id, value);
        Ok(value)
    }

    fn values(&mut self, ids: &[Word]) -> Result<Vec<Handle<Value>>, SpirvReadError> {
        ids.iter().map(|&id| self.value(id)).collect()
    }

    fn define(&mut self, inst: &Instruction, value: Handle<Value>) -> Result<(), SpirvReadError> {
        let id = result_id(inst)?;
        if let Some(name) = self.ctx.names.get(&id) {
            self.builder.name_value(value, *name);
        }
        self.values.insert(id, value);
        Ok(())
    }

    fn instruction(&mut self, inst: &Instruction) -> Result<(), SpirvReadError> {
        use spirv::Op;

        let opcode = inst.class.opcode;
        if let Some(op) = unary_op(opcode) {
            let operand = self.value(id_operand(inst, 0)?)?;
            let value = self.builder.unary(op, operand)?;
            return self.define(inst, value);
        }
        if let Some(op) = binary_op(opcode) {
            let left = self.value(id_operand(inst, 0)?)?;
            let right = self.value(id_operand(inst, 1)?)?;
            let value = self.builder.binary(op, left, right)?;
            return self.define(inst, value);
        }

        match opcode {
            Op::Variable => {
                let ty = self.ctx.ty(self.ctx.pointee(result_type(inst)?)?)?;
                let init = match inst.operands.get(1) {
                    Some(_) => Some(self.ctx.constant(id_operand(inst, 1)?)?),
                    None => None,
                };
                let value = self.builder.local_variable(ty, init)?;
                self.define(inst, value)?;
            }
            Op::Load => {
                let pointer = id_operand(inst, 0)?;
                let value = match self.ctx.param_vars.get(&pointer) {
                    Some(&index) => {
                        let value = self.builder.parameter(index)?;
                        self.values.insert(result_id(inst)?, value);
                        return Ok(());
                    }
                    None => {
                        let pointer = self.value(pointer)?;
                        self.builder.load(pointer)?
                    }
                };
                self.define(inst, value)?;
            }
            Op::Store => {
                let pointer = id_operand(inst, 0)?;
                let value = self.value(id_operand(inst, 1)?)?;
                if self.ctx.result_vars.contains(&pointer) {
                    self.returning = Some(value);
                } else {
                    let pointer = self.value(pointer)?;
                    self.builder.store(pointer, value)?;
                }
            }
            Op::AccessChain | Op::InBoundsAccessChain => {
                let base_id = id_operand(inst, 0)?;
                let mut indices = id_operands(inst, 1)?;
                let base = match self.ctx.globals.get(&base_id) {
                    Some(global) if global.wrapped => {
                        if indices.is_empty() {
                            return Err(malformed(inst, "buffer access without a member index"));
                        }
                        indices.remove(0);
                        self.builder.global(global.handle)?
                    }
                    _ => self.value(base_id)?,
                };
                let mut steps = Vec::with_capacity(indices.len());
                for id in indices {
                    let index = match self.constant_index(id) {
                        Some(i) => AccessIndex::Constant(i),
                        None => AccessIndex::Dynamic(self.value(id)?),
                    };
                    steps.push(index);
                }
                let value = self.builder.access_chain(base, &steps)?;
                self.define(inst, value)?;
            }
            Op::CompositeExtract => {
                let composite = self.value(id_operand(inst, 0)?)?;
                let indices = (1..inst.operands.len())
                    .map(|i| literal_operand(inst, i))
                    .collect::<Result<Vec<_>, _>>()?;
                let value = self.builder.extract(composite, &indices)?;
                self.define(inst, value)?;
            }
            Op::CompositeConstruct => {
                let ty = self.ctx.ty(result_type(inst)?)?;
                let ids = id_operands(inst, 0)?;
                let is_bvec = matches!(
                    self.builder.module().types[ty],
                    Type::Vector { scalar: Scalar::BOOL, .. }
                );
                if is_bvec && ids.len() > 1 && ids.iter().all(|&id| id == ids[0]) {
                    self.pending_splats
                        .insert(result_id(inst)?, (ids.len() as u32, ids[0]));
                    return Ok(());
                }
                let components = self.values(&ids)?;
                let value = self.builder.construct(ty, &components)?;
                self.define(inst, value)?;
            }
            Op::VectorShuffle => {
                let (first, second) = (id_operand(inst, 0)?, id_operand(inst, 1)?);
                let vector = self.value(first)?;
                let width = self
                    .builder
                    .value_type(vector)
                    .ok()
                    .and_then(|ty| self.builder.module().types[ty].vector_size())
                    .ok_or_else(|| malformed(inst, "shuffle of a non-vector"))? as u32;
                let mut pattern = Vec::with_capacity(inst.operands.len().saturating_sub(2));
                for i in 2..inst.operands.len() {
                    let component = literal_operand(inst, i)?;
                    let component = if first == second && component >= width {
                        component - width
                    } else {
                        component
                    };
                    let component = [
                        SwizzleComponent::X,
                        SwizzleComponent::Y,
                        SwizzleComponent::Z,
                        SwizzleComponent::W,
                    ]
                    .get(component as usize)
                    .copied()
                    .filter(|_| component < width)
                    .ok_or_else(|| malformed(inst, "component from the second vector"))?;
                    pattern.push(component);
                }
                let value = self.builder.swizzle(vector, &pattern)?;
                self.define(inst, value)?;
            }
            Op::Select => {
                let condition_id = id_operand(inst, 0)?;
                let condition = match self.pending_splats.get(&condition_id) {
                    Some(&(_, scalar)) => self.value(scalar)?,
                    None => self.value(condition_id)?,
                };
                let accept = self.value(id_operand(inst, 1)?)?;
                let reject = self.value(id_operand(inst, 2)?)?;
                let value = self.builder.select(condition, accept, reject)?;
                self.define(inst, value)?;
            }
            Op::ConvertFToS | Op::ConvertFToU | Op::ConvertSToF | Op::ConvertUToF => {
                let ty = self.ctx.ty(result_type(inst)?)?;
                let operand = self.value(id_operand(inst, 0)?)?;
                let value = self.builder.convert(operand, ty)?;
                self.define(inst, value)?;
            }
            Op::Bitcast => {
                let ty = self.ctx.ty(result_type(inst)?)?;
                let operand = self.value(id_operand(inst, 0)?)?;
                let value = self.builder.bitcast(operand, ty)?;
                self.define(inst, value)?;
            }
            Op::FunctionCall => {
                let callee = id_operand(inst, 0)?;
                let function = *self
                    .ctx
                    .functions
                    .get(&callee)
                    .ok_or(SpirvReadError::UnknownId(callee))?;
                let arguments = self.values(&id_operands(inst, 1)?)?;
                if let Some(value) = self.builder.call(function, &arguments)? {
                    self.define(inst, value)?;
                }
            }
            Op::ExtInst => {
                let set = id_operand(inst, 0)?;
                if Some(set) != self.ctx.glsl {
                    return Err(malformed(inst, "unknown extended instruction set"));
                }
                let Some(Operand::LiteralExtInstInteger(number)) = inst.operands.get(1) else {
                    return Err(malformed(inst, "missing extended instruction number"));
                };
                let fun = mapping::math_from_glsl(*number)
                    .ok_or_else(|| malformed(inst, format!("GLSL.std.450 instruction {number}")))?;
                let arguments = self.values(&id_operands(inst, 2)?)?;
                let value = self.builder.math(fun, &arguments)?;
                self.define(inst, value)?;
            }
            Op::Dot => {
                let arguments = self.values(&id_operands(inst, 0)?)?;
                let value = self.builder.math(MathFunction::Dot, &arguments)?;
                self.define(inst, value)?;
            }
            Op::SelectionMerge => self.merge = Some(Merge::Selection(id_operand(inst, 0)?)),
            Op::LoopMerge => {
                self.merge = Some(Merge::Loop {
                    merge: id_operand(inst, 0)?,
                    continuing: id_operand(inst, 1)?,
                });
            }
            Op::Branch => {
                let target = self.block(id_operand(inst, 0)?)?;
                match self.merge.take() {
                    Some(Merge::Loop { merge, continuing }) => {
                        let (continuing, merge) = (self.block(continuing)?, self.block(merge)?);
                        self.builder.loop_header(target, continuing, merge)?;
                    }
                    Some(Merge::Selection(_)) => {
                        return Err(malformed(inst, "selection merge before an unconditional branch"));
                    }
                    None => self.builder.branch(target)?,
                }
            }
            Op::BranchConditional => {
                let condition = self.value(id_operand(inst, 0)?)?;
                let accept = self.block(id_operand(inst, 1)?)?;
                let reject = self.block(id_operand(inst, 2)?)?;
                let merge = self.selection_merge(inst)?;
                self.builder.cond_branch(condition, accept, reject, merge)?;
            }
            Op::Switch => {
                let selector = self.value(id_operand(inst, 0)?)?;
                let default = self.block(id_operand(inst, 1)?)?;
                let selector_ty = self.builder.value_type(selector)?;
                let mut cases: Vec<SwitchCase> = Vec::new();
                let mut i = 2;
                while i + 1 < inst.operands.len() {
                    let bits = literal_operand(inst, i)?;
                    let target = self.block(id_operand(inst, i + 1)?)?;
                    let (types, constants) = self.builder.interners();
                    let constant = constants.scalar(types, selector_ty, bits)?;
                    match cases.last_mut() {
                        Some(case) if case.target == target => case.selectors.push(constant),
                        _ => cases.push(SwitchCase {
                            selectors: vec![constant],
                            target,
                        }),
                    }
                    i += 2;
                }
                let merge = self.selection_merge(inst)?;
                self.builder.switch(selector, cases, default, merge)?;
            }
            Op::Return => {
                let value = self.returning.take();
                self.builder.ret(value)?;
            }
            Op::ReturnValue => {
                let value = self.value(id_operand(inst, 0)?)?;
                self.builder.ret(Some(value))?;
            }
            Op::Kill => self.builder.discard()?,
            Op::Unreachable => self.builder.unreachable()?,
            Op::Nop | Op::Line | Op::NoLine => {}
            other => return Err(SpirvReadError::UnsupportedOp(other)),
        }
        Ok(())
    }

    fn selection_merge(&mut self, inst: &Instruction) -> Result<Option<Handle<spindle_ir::Block>>, SpirvReadError> {
        match self.merge.take() {
            Some(Merge::Selection(label)) => Ok(Some(self.block(label)?)),
            Some(Merge::Loop { .. }) => Err(malformed(inst, "loop merge before a conditional branch")),
            None => Ok(None),
        }
    }

    /// Literal value of an integer constant used as an index.
    fn constant_index(&self, id: Word) -> Option<u32> {
        let constant = *self.ctx.constants.get(&id)?;
        let module = self.builder.module();
        match module.constants[constant] {
            Constant::Scalar { ty, bits } => module.types[ty]
                .scalar()
                .filter(|s| s.is_integer())
                .map(|_| bits),
            Constant::Zero { ty } => module.types[ty]
                .scalar()
                .filter(|s| s.is_integer())
                .map(|_| 0),
            Constant::Composite { .. } => None,
        }
    }
}

fn unary_op(opcode: spirv::Op) -> Option<UnaryOp> {
    use spirv::Op;
    Some(match opcode {
        Op::SNegate | Op::FNegate => UnaryOp::Negate,
        Op::LogicalNot => UnaryOp::LogicalNot,
        Op::Not => UnaryOp::BitwiseNot,
        _ => return None,
    })
}

fn binary_op(opcode: spirv::Op) -> Option<BinaryOp> {
    use spirv::Op;
    Some(match opcode {
        Op::FAdd | Op::IAdd => BinaryOp::Add,
        Op::FSub | Op::ISub => BinaryOp::Subtract,
        Op::FMul
        | Op::IMul
        | Op::VectorTimesScalar
        | Op::MatrixTimesScalar
        | Op::MatrixTimesVector
        | Op::VectorTimesMatrix
        | Op::MatrixTimesMatrix => BinaryOp::Multiply,
        Op::FDiv | Op::SDiv | Op::UDiv => BinaryOp::Divide,
        Op::FRem | Op::FMod | Op::SRem | Op::SMod | Op::UMod => BinaryOp::Modulo,
        Op::LogicalEqual | Op::IEqual | Op::FOrdEqual | Op::FUnordEqual => BinaryOp::Equal,
        Op::LogicalNotEqual | Op::INotEqual | Op::FUnordNotEqual | Op::FOrdNotEqual => {
            BinaryOp::NotEqual
        }
        Op::FOrdLessThan | Op::SLessThan | Op::ULessThan => BinaryOp::Less,
        Op::FOrdLessThanEqual | Op::SLessThanEqual | Op::ULessThanEqual => BinaryOp::LessEqual,
        Op::FOrdGreaterThan | Op::SGreaterThan | Op::UGreaterThan => BinaryOp::Greater,
        Op::FOrdGreaterThanEqual | Op::SGreaterThanEqual | Op::UGreaterThanEqual => {
            BinaryOp::GreaterEqual
        }
        Op::LogicalAnd => BinaryOp::LogicalAnd,
        Op::LogicalOr => BinaryOp::LogicalOr,
        Op::BitwiseAnd => BinaryOp::BitwiseAnd,
        Op::BitwiseOr => BinaryOp::BitwiseOr,
        Op::BitwiseXor => BinaryOp::BitwiseXor,
        Op::ShiftLeftLogical => BinaryOp::ShiftLeft,
        Op::ShiftRightLogical | Op::ShiftRightArithmetic => BinaryOp::ShiftRight,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rspirv::binary::Assemble;

    #[test]
    fn rejects_garbage() {
        let err = read_module(&[0xdead_beef, 0, 0]).unwrap_err();
        assert!(matches!(err, SpirvReadError::Parse(_)), "{err}");
    }

    #[test]
    fn rejects_truncated_bytes() {
        let err = read_bytes(&[0x03, 0x02, 0x23]).unwrap_err();
        assert!(err.to_string().contains("multiple of 4"), "{err}");
    }

    fn nested_arrays(inner_len: u32, outer_len: u32) -> Vec<u32> {
        let mut b = dr::Builder::new();
        b.set_version(1, 3);
        b.capability(spirv::Capability::Shader);
        b.memory_model(spirv::AddressingModel::Logical, spirv::MemoryModel::GLSL450);
        let f32_ty = b.type_float(32);
        let vec4 = b.type_vector(f32_ty, 4);
        let u32_ty = b.type_int(32, 0);
        let inner_len = b.constant_bit32(u32_ty, inner_len);
        let outer_len = b.constant_bit32(u32_ty, outer_len);
        let inner = b.type_array(vec4, inner_len);
        b.type_array(inner, outer_len);
        b.module().assemble()
    }

    #[test]
    fn oversized_arrays_are_rejected() {
        for (inner, outer) in [(1 << 28, 2), (1 << 27, 2), (2, 1 << 30)] {
            let err = read_module(&nested_arrays(inner, outer)).unwrap_err();
            match &err {
                SpirvReadError::Malformed { op, reason } => {
                    assert_eq!(*op, spirv::Op::TypeArray);
                    assert!(reason.contains("too large"), "{err}");
                }
                other => panic!("unexpected error: {other}"),
            }
        }
        assert!(read_module(&nested_arrays(4, 2)).is_ok());
    }

    #[test]
    fn opcode_tables() {
        assert_eq!(binary_op(spirv::Op::VectorTimesScalar), Some(BinaryOp::Multiply));
        assert_eq!(binary_op(spirv::Op::FUnordNotEqual), Some(BinaryOp::NotEqual));
        assert_eq!(binary_op(spirv::Op::ShiftRightArithmetic), Some(BinaryOp::ShiftRight));
        assert_eq!(binary_op(spirv::Op::Load), None);
        assert_eq!(unary_op(spirv::Op::FNegate), Some(UnaryOp::Negate));
        assert_eq!(unary_op(spirv::Op::Not), Some(UnaryOp::BitwiseNot));
    }

    #[test]
    fn decoration_access() {
        let read_only = Decorations {
            non_writable: true,
            ..Decorations::default()
        };
        let write_only = Decorations {
            non_readable: true,
            ..Decorations::default()
        };
        assert_eq!(read_only.access(), AccessMode::Read);
        assert_eq!(write_only.access(), AccessMode::Write);
        assert_eq!(Decorations::default().access(), AccessMode::ReadWrite);
        assert_eq!(Decorations::default().io(), None);
    }
}
