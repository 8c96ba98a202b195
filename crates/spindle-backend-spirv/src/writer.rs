//! Sealed IR to a SPIR-V binary.
//!
//! The module is assembled section by section in an `rspirv::dr::Module`.
//! Types, constants and pointer types are emitted on first use and
//! memoized, so the types section never holds duplicates. Uniform and
//! storage buffers live inside a `Block`-decorated wrapper struct with a
//! single member; every use of such a global goes through member 0.
//!
//! Entry points take no SPIR-V parameters: each IR parameter becomes an
//! `Input` variable named `<function>::<parameter>` and the result an
//! `Output` variable named `<function>::result`, which is what the reader
//! looks for when it rebuilds the signature.

use std::collections::{HashMap, HashSet};

use rspirv::binary::Assemble;
use rspirv::dr::{self, Instruction, Operand};
use rspirv::spirv::{self, Word};
use spindle_backend_core::{BackendError, BackendOptions, ensure_sealed};
use spindle_ir::{
    AccessIndex, AccessMode, ArraySize, BinaryOp, Binding, BuiltIn, Constant, Function,
    GlobalVariable, Handle, MathFunction, Module, Op, PipelineStage, Scalar, ScalarKind,
    StorageClass, StorageFormat, StructType, TextureClass, TextureDimension, Type, UnaryOp, Value,
    ValueDef, VectorSize,
};

use crate::mapping;

/// Translates a sealed module into SPIR-V words.
pub fn write_module(module: &Module, options: &BackendOptions) -> Result<Vec<u32>, BackendError> {
    ensure_sealed(module)?;
    let mut writer = Writer::new(module, options);
    writer.write()?;
    let spv = writer.finish();
    Ok(spv.assemble())
}

struct GlobalEntry {
    id: Word,
    /// Pointer to member 0 of the block wrapper, for buffers.
    member_pointer: Option<Word>,
}

struct EntryPoint {
    function: Word,
    name: String,
    stage: PipelineStage,
    interface: Vec<Word>,
    depth_replacing: bool,
}

type ImageKey = (TextureDimension, ScalarKind, u32, u32, u32, Option<StorageFormat>);

struct Writer<'a> {
    module: &'a Module,
    options: &'a BackendOptions,
    spv: dr::Module,
    next_id: Word,
    capabilities: Vec<spirv::Capability>,
    extensions: Vec<&'static str>,
    glsl: Option<Word>,
    types: HashMap<Handle<Type>, Word>,
    in_progress: HashSet<Handle<Type>>,
    void_type: Option<Word>,
    sampler_type: Option<Word>,
    scalar_types: HashMap<Scalar, Word>,
    vector_types: HashMap<(Scalar, VectorSize), Word>,
    pointer_types: HashMap<(StorageClass, Word), Word>,
    function_types: HashMap<(Word, Vec<Word>), Word>,
    image_types: HashMap<ImageKey, Word>,
    scalar_constants: HashMap<(Word, u32), Word>,
    constants: HashMap<Handle<Constant>, Word>,
    globals: HashMap<Handle<GlobalVariable>, GlobalEntry>,
    functions: HashMap<Handle<Function>, Word>,
    entry_points: Vec<EntryPoint>,
}

/// Per-function ids.
#[derive(Default)]
struct Body {
    location: String,
    values: HashMap<Handle<Value>, Word>,
    labels: HashMap<Handle<spindle_ir::Block>, Word>,
    result_var: Option<Word>,
}

impl Body {
    fn error(&self, message: impl Into<String>) -> BackendError {
        BackendError::located(self.location.clone(), message)
    }
}

fn inst(op: spirv::Op, result_type: Option<Word>, result_id: Option<Word>, operands: Vec<Operand>) -> Instruction {
    Instruction::new(op, result_type, result_id, operands)
}

impl<'a> Writer<'a> {
    fn new(module: &'a Module, options: &'a BackendOptions) -> Self {
        Self {
            module,
            options,
            spv: dr::Module::new(),
            next_id: 1,
            capabilities: vec![spirv::Capability::Shader],
            extensions: Vec::new(),
            glsl: None,
            types: HashMap::new(),
            in_progress: HashSet::new(),
            void_type: None,
            sampler_type: None,
            scalar_types: HashMap::new(),
            vector_types: HashMap::new(),
            pointer_types: HashMap::new(),
            function_types: HashMap::new(),
            image_types: HashMap::new(),
            scalar_constants: HashMap::new(),
            constants: HashMap::new(),
            globals: HashMap::new(),
            functions: HashMap::new(),
            entry_points: Vec::new(),
        }
    }

    fn id(&mut self) -> Word {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn version_at_least(&self, major: u8, minor: u8) -> bool {
        self.options.spirv_version >= (major, minor)
    }

    fn capability(&mut self, capability: spirv::Capability) {
        if !self.capabilities.contains(&capability) {
            self.capabilities.push(capability);
        }
    }

    fn extension(&mut self, name: &'static str) {
        if !self.extensions.contains(&name) {
            self.extensions.push(name);
        }
    }

    fn glsl(&mut self) -> Word {
        if let Some(id) = self.glsl {
            return id;
        }
        let id = self.id();
        self.spv.ext_inst_imports.push(inst(
            spirv::Op::ExtInstImport,
            None,
            Some(id),
            vec![Operand::LiteralString(mapping::GLSL_STD_450.into())],
        ));
        self.glsl = Some(id);
        id
    }

    fn global_inst(&mut self, op: spirv::Op, result_type: Option<Word>, result_id: Option<Word>, operands: Vec<Operand>) {
        self.spv
            .types_global_values
            .push(inst(op, result_type, result_id, operands));
    }

    fn name(&mut self, id: Word, name: &str) {
        if self.options.emit_debug_names && !name.is_empty() {
            self.spv.debug_names.push(inst(
                spirv::Op::Name,
                None,
                None,
                vec![Operand::IdRef(id), Operand::LiteralString(name.into())],
            ));
        }
    }

    fn member_name(&mut self, id: Word, member: u32, name: &str) {
        if self.options.emit_debug_names {
            self.spv.debug_names.push(inst(
                spirv::Op::MemberName,
                None,
                None,
                vec![
                    Operand::IdRef(id),
                    Operand::LiteralBit32(member),
                    Operand::LiteralString(name.into()),
                ],
            ));
        }
    }

    fn decorate(&mut self, id: Word, decoration: spirv::Decoration, extra: &[Operand]) {
        let mut operands = vec![Operand::IdRef(id), Operand::Decoration(decoration)];
        operands.extend_from_slice(extra);
        self.spv
            .annotations
            .push(inst(spirv::Op::Decorate, None, None, operands));
    }

    fn member_decorate(&mut self, id: Word, member: u32, decoration: spirv::Decoration, extra: &[Operand]) {
        let mut operands = vec![
            Operand::IdRef(id),
            Operand::LiteralBit32(member),
            Operand::Decoration(decoration),
        ];
        operands.extend_from_slice(extra);
        self.spv
            .annotations
            .push(inst(spirv::Op::MemberDecorate, None, None, operands));
    }

    // ---- types ------------------------------------------------------------------------------

    fn void_type(&mut self) -> Word {
        if let Some(id) = self.void_type {
            return id;
        }
        let id = self.id();
        self.global_inst(spirv::Op::TypeVoid, None, Some(id), Vec::new());
        self.void_type = Some(id);
        id
    }

    fn scalar_type(&mut self, scalar: Scalar) -> Word {
        if let Some(&id) = self.scalar_types.get(&scalar) {
            return id;
        }
        let id = self.id();
        let bits = u32::from(scalar.width) * 8;
        let (op, operands) = match scalar.kind {
            ScalarKind::Bool => (spirv::Op::TypeBool, Vec::new()),
            ScalarKind::Sint => (
                spirv::Op::TypeInt,
                vec![Operand::LiteralBit32(bits), Operand::LiteralBit32(1)],
            ),
            ScalarKind::Uint => (
                spirv::Op::TypeInt,
                vec![Operand::LiteralBit32(bits), Operand::LiteralBit32(0)],
            ),
            ScalarKind::Float => (spirv::Op::TypeFloat, vec![Operand::LiteralBit32(bits)]),
        };
        self.global_inst(op, None, Some(id), operands);
        self.scalar_types.insert(scalar, id);
        id
    }

    fn vector_type(&mut self, scalar: Scalar, size: VectorSize) -> Word {
        if let Some(&id) = self.vector_types.get(&(scalar, size)) {
            return id;
        }
        let component = self.scalar_type(scalar);
        let id = self.id();
        self.global_inst(
            spirv::Op::TypeVector,
            None,
            Some(id),
            vec![Operand::IdRef(component), Operand::LiteralBit32(size as u32)],
        );
        self.vector_types.insert((scalar, size), id);
        id
    }

    fn pointer_type(&mut self, space: StorageClass, pointee: Word) -> Word {
        if let Some(&id) = self.pointer_types.get(&(space, pointee)) {
            return id;
        }
        let id = self.id();
        self.global_inst(
            spirv::Op::TypePointer,
            None,
            Some(id),
            vec![
                Operand::StorageClass(mapping::storage_class(space)),
                Operand::IdRef(pointee),
            ],
        );
        self.pointer_types.insert((space, pointee), id);
        id
    }

    fn function_type(&mut self, result: Word, parameters: Vec<Word>) -> Word {
        let key = (result, parameters);
        if let Some(&id) = self.function_types.get(&key) {
            return id;
        }
        let id = self.id();
        let operands = std::iter::once(key.0)
            .chain(key.1.iter().copied())
            .map(Operand::IdRef)
            .collect();
        self.global_inst(spirv::Op::TypeFunction, None, Some(id), operands);
        self.function_types.insert(key, id);
        id
    }

    fn ty(&mut self, handle: Handle<Type>) -> Result<Word, BackendError> {
        if let Some(&id) = self.types.get(&handle) {
            return Ok(id);
        }
        let module = self.module;
        let id = match &module.types[handle] {
            Type::Void => self.void_type(),
            Type::Scalar(scalar) => self.scalar_type(*scalar),
            Type::Vector { size, scalar } => self.vector_type(*scalar, *size),
            Type::Matrix {
                columns,
                rows,
                scalar,
            } => {
                let column = self.vector_type(*scalar, *rows);
                let id = self.id();
                self.global_inst(
                    spirv::Op::TypeMatrix,
                    None,
                    Some(id),
                    vec![Operand::IdRef(column), Operand::LiteralBit32(*columns as u32)],
                );
                id
            }
            Type::Array { base, size, stride } => {
                let element = self.ty(*base)?;
                let id = self.id();
                match size {
                    ArraySize::Constant(n) => {
                        let length = self.u32_constant(*n);
                        self.global_inst(
                            spirv::Op::TypeArray,
                            None,
                            Some(id),
                            vec![Operand::IdRef(element), Operand::IdRef(length)],
                        );
                    }
                    ArraySize::Dynamic => self.global_inst(
                        spirv::Op::TypeRuntimeArray,
                        None,
                        Some(id),
                        vec![Operand::IdRef(element)],
                    ),
                }
                if *stride > 0 {
                    self.decorate(id, spirv::Decoration::ArrayStride, &[Operand::LiteralBit32(*stride)]);
                }
                id
            }
            Type::Pointer { base, space, .. } => {
                let pointee = self.ty(*base)?;
                self.pointer_type(*space, pointee)
            }
            Type::Struct(st) => self.struct_type(handle, st)?,
            Type::Texture { dim, class } => self.image_type(*dim, *class),
            Type::Sampler { .. } => match self.sampler_type {
                Some(id) => id,
                None => {
                    let id = self.id();
                    self.global_inst(spirv::Op::TypeSampler, None, Some(id), Vec::new());
                    self.sampler_type = Some(id);
                    id
                }
            },
            Type::AccessControlled { base, .. } => self.ty(*base)?,
        };
        self.types.insert(handle, id);
        Ok(id)
    }

    fn struct_type(&mut self, handle: Handle<Type>, st: &StructType) -> Result<Word, BackendError> {
        let location = format!("struct `{}`", st.name);
        if !st.is_defined() {
            return Err(BackendError::located(location, "declared but never defined"));
        }
        if !self.in_progress.insert(handle) {
            return Err(BackendError::located(location, "struct contains itself"));
        }
        let mut members = Vec::with_capacity(st.members.len());
        for member in &st.members {
            members.push(Operand::IdRef(self.ty(member.ty)?));
        }
        self.in_progress.remove(&handle);

        let id = self.id();
        self.global_inst(spirv::Op::TypeStruct, None, Some(id), members);
        self.name(id, &st.name);
        for (index, member) in st.members.iter().enumerate() {
            let index = index as u32;
            self.member_name(id, index, &member.name);
            self.member_decorate(id, index, spirv::Decoration::Offset, &[Operand::LiteralBit32(member.offset)]);
            self.matrix_layout(id, index, member.ty);
        }
        Ok(id)
    }

    fn matrix_layout(&mut self, struct_id: Word, member: u32, ty: Handle<Type>) {
        let types = &self.module.types;
        let ty = types.strip_access(ty);
        if let Type::Matrix { rows, .. } = types[ty] {
            let stride = if rows == VectorSize::Bi { 8 } else { 16 };
            self.member_decorate(struct_id, member, spirv::Decoration::ColMajor, &[]);
            self.member_decorate(
                struct_id,
                member,
                spirv::Decoration::MatrixStride,
                &[Operand::LiteralBit32(stride)],
            );
        }
    }

    fn image_type(&mut self, dim: TextureDimension, class: TextureClass) -> Word {
        let (kind, depth, multisampled, sampled, format) = match class {
            TextureClass::Sampled { kind, multisampled } => (kind, 0, u32::from(multisampled), 1, None),
            TextureClass::Depth => (ScalarKind::Float, 1, 0, 1, None),
            TextureClass::Storage { format, .. } => (format.channel_kind(), 0, 0, 2, Some(format)),
        };
        let key = (dim, kind, depth, multisampled, sampled, format);
        if let Some(&id) = self.image_types.get(&key) {
            return id;
        }
        let storage = sampled == 2;
        match dim {
            TextureDimension::D1 if storage => self.capability(spirv::Capability::Image1D),
            TextureDimension::D1 => self.capability(spirv::Capability::Sampled1D),
            TextureDimension::CubeArray if storage => self.capability(spirv::Capability::ImageCubeArray),
            TextureDimension::CubeArray => self.capability(spirv::Capability::SampledCubeArray),
            _ => {}
        }
        if format.is_some_and(mapping::is_extended_format) {
            self.capability(spirv::Capability::StorageImageExtendedFormats);
        }
        let sampled_type = self.scalar_type(Scalar { kind, width: 4 });
        let id = self.id();
        self.global_inst(
            spirv::Op::TypeImage,
            None,
            Some(id),
            vec![
                Operand::IdRef(sampled_type),
                Operand::Dim(mapping::dim(dim)),
                Operand::LiteralBit32(depth),
                Operand::LiteralBit32(u32::from(dim.is_arrayed())),
                Operand::LiteralBit32(multisampled),
                Operand::LiteralBit32(sampled),
                Operand::ImageFormat(format.map_or(spirv::ImageFormat::Unknown, mapping::image_format)),
            ],
        );
        self.image_types.insert(key, id);
        id
    }

    // ---- constants --------------------------------------------------------------------------

    fn scalar_constant(&mut self, ty: Word, scalar: Scalar, bits: u32) -> Word {
        if let Some(&id) = self.scalar_constants.get(&(ty, bits)) {
            return id;
        }
        let id = self.id();
        match scalar.kind {
            ScalarKind::Bool if bits != 0 => {
                self.global_inst(spirv::Op::ConstantTrue, Some(ty), Some(id), Vec::new())
            }
            ScalarKind::Bool => {
                self.global_inst(spirv::Op::ConstantFalse, Some(ty), Some(id), Vec::new())
            }
            _ => self.global_inst(
                spirv::Op::Constant,
                Some(ty),
                Some(id),
                vec![Operand::LiteralBit32(bits)],
            ),
        }
        self.scalar_constants.insert((ty, bits), id);
        id
    }

    fn u32_constant(&mut self, value: u32) -> Word {
        let ty = self.scalar_type(Scalar::U32);
        self.scalar_constant(ty, Scalar::U32, value)
    }

    fn constant(&mut self, handle: Handle<Constant>) -> Result<Word, BackendError> {
        if let Some(&id) = self.constants.get(&handle) {
            return Ok(id);
        }
        let module = self.module;
        let id = match &module.constants[handle] {
            Constant::Scalar { ty, bits } => {
                let scalar = module.types[*ty].scalar().ok_or_else(|| {
                    BackendError::Other(format!(
                        "scalar constant of type {}",
                        module.types.type_name(*ty)
                    ))
                })?;
                let ty = self.ty(*ty)?;
                self.scalar_constant(ty, scalar, *bits)
            }
            Constant::Composite { ty, components } => {
                let mut operands = Vec::with_capacity(components.len());
                for &component in components {
                    operands.push(Operand::IdRef(self.constant(component)?));
                }
                let ty = self.ty(*ty)?;
                let id = self.id();
                self.global_inst(spirv::Op::ConstantComposite, Some(ty), Some(id), operands);
                id
            }
            Constant::Zero { ty } => {
                let ty = self.ty(*ty)?;
                let id = self.id();
                self.global_inst(spirv::Op::ConstantNull, Some(ty), Some(id), Vec::new());
                id
            }
        };
        self.constants.insert(handle, id);
        Ok(id)
    }

    // ---- globals ----------------------------------------------------------------------------

    fn decorate_io(&mut self, id: Word, io: Binding, space: StorageClass, ty: Handle<Type>) {
        match io {
            Binding::BuiltIn(builtin) => self.decorate(
                id,
                spirv::Decoration::BuiltIn,
                &[Operand::BuiltIn(mapping::builtin(builtin, space))],
            ),
            Binding::Location { location } => {
                self.decorate(id, spirv::Decoration::Location, &[Operand::LiteralBit32(location)]);
                if self.module.types[ty].scalar().is_some_and(Scalar::is_integer) {
                    self.decorate(id, spirv::Decoration::Flat, &[]);
                }
            }
        }
    }

    fn write_global(&mut self, handle: Handle<GlobalVariable>, var: &GlobalVariable) -> Result<(), BackendError> {
        let module = self.module;
        if var.space == StorageClass::Storage && !self.version_at_least(1, 3) {
            self.extension("SPV_KHR_storage_buffer_storage_class");
        }
        let inner = self.ty(var.ty)?;
        let (pointee, member_pointer) = match var.space {
            StorageClass::Uniform | StorageClass::Storage => {
                let wrapper = self.id();
                self.global_inst(spirv::Op::TypeStruct, None, Some(wrapper), vec![Operand::IdRef(inner)]);
                self.name(wrapper, &format!("{}_block", var.name));
                self.decorate(wrapper, spirv::Decoration::Block, &[]);
                self.member_decorate(wrapper, 0, spirv::Decoration::Offset, &[Operand::LiteralBit32(0)]);
                self.matrix_layout(wrapper, 0, var.ty);
                (wrapper, Some(self.pointer_type(var.space, inner)))
            }
            _ => (inner, None),
        };
        let pointer = self.pointer_type(var.space, pointee);
        let id = self.id();
        let mut operands = vec![Operand::StorageClass(mapping::storage_class(var.space))];
        if let Some(init) = var.init {
            operands.push(Operand::IdRef(self.constant(init)?));
        }
        self.global_inst(spirv::Op::Variable, Some(pointer), Some(id), operands);
        self.name(id, &var.name);

        if let Some(binding) = var.binding {
            self.decorate(id, spirv::Decoration::DescriptorSet, &[Operand::LiteralBit32(binding.group)]);
            self.decorate(id, spirv::Decoration::Binding, &[Operand::LiteralBit32(binding.binding)]);
        }
        if let Some(io) = var.io {
            self.decorate_io(id, io, var.space, var.ty);
        }
        let access = match module.types[var.ty] {
            Type::Texture {
                class: TextureClass::Storage { access, .. },
                ..
            } => Some(access),
            _ if var.space == StorageClass::Storage => Some(var.access(&module.types)),
            _ => None,
        };
        if let Some(access) = access {
            if !access.can_write() {
                self.decorate(id, spirv::Decoration::NonWritable, &[]);
            }
            if !access.can_read() {
                self.decorate(id, spirv::Decoration::NonReadable, &[]);
            }
        }
        self.globals.insert(handle, GlobalEntry { id, member_pointer });
        Ok(())
    }

    // ---- functions --------------------------------------------------------------------------

    fn write(&mut self) -> Result<(), BackendError> {
        let module = self.module;
        for handle in module.functions.handles() {
            let id = self.id();
            self.functions.insert(handle, id);
        }
        for (handle, ty) in module.types.iter() {
            if matches!(ty, Type::Struct(st) if st.is_defined()) {
                self.ty(handle)?;
            }
        }
        for (handle, var) in module.global_variables.iter() {
            self.write_global(handle, var)?;
        }
        for (handle, func) in module.functions.iter() {
            self.write_function(handle, func)?;
        }
        Ok(())
    }

    fn write_function(&mut self, handle: Handle<Function>, func: &'a Function) -> Result<(), BackendError> {
        let module = self.module;
        let types = &module.types;
        let function_id = self.functions[&handle];
        let mut body = Body {
            location: format!("function `{}`", func.name),
            ..Body::default()
        };
        let mut spv_fn = dr::Function::new();
        let mut parameter_loads = Vec::new();

        if let Some(stage) = func.stage {
            let void = self.void_type();
            let fn_ty = self.function_type(void, Vec::new());
            spv_fn.def = Some(inst(
                spirv::Op::Function,
                Some(void),
                Some(function_id),
                vec![
                    Operand::FunctionControl(spirv::FunctionControl::NONE),
                    Operand::IdRef(fn_ty),
                ],
            ));
            let mut interface = Vec::new();
            for (index, param) in func.parameters.iter().enumerate() {
                let ty = self.ty(param.ty)?;
                let pointer = self.pointer_type(StorageClass::Input, ty);
                let var = self.id();
                self.global_inst(
                    spirv::Op::Variable,
                    Some(pointer),
                    Some(var),
                    vec![Operand::StorageClass(spirv::StorageClass::Input)],
                );
                let label = param.name.clone().unwrap_or_else(|| index.to_string());
                self.name(var, &format!("{}::{label}", func.name));
                if let Some(binding) = param.binding {
                    self.decorate_io(var, binding, StorageClass::Input, param.ty);
                }
                interface.push(var);
                let value = func
                    .parameter_value(index)
                    .ok_or_else(|| body.error(format!("parameter {index} has no value")))?;
                let loaded = self.id();
                parameter_loads.push(inst(spirv::Op::Load, Some(ty), Some(loaded), vec![Operand::IdRef(var)]));
                body.values.insert(value, loaded);
            }
            if !matches!(types[func.return_type], Type::Void) {
                let ty = self.ty(func.return_type)?;
                let pointer = self.pointer_type(StorageClass::Output, ty);
                let var = self.id();
                self.global_inst(
                    spirv::Op::Variable,
                    Some(pointer),
                    Some(var),
                    vec![Operand::StorageClass(spirv::StorageClass::Output)],
                );
                self.name(var, &format!("{}::result", func.name));
                if let Some(binding) = func.result_binding {
                    self.decorate_io(var, binding, StorageClass::Output, func.return_type);
                }
                interface.push(var);
                body.result_var = Some(var);
            }
            let frag_depth = Some(Binding::BuiltIn(BuiltIn::FragDepth));
            let depth_replacing = stage == PipelineStage::Fragment
                && (func.result_binding == frag_depth
                    || module
                        .global_variables
                        .iter()
                        .any(|(_, g)| g.space == StorageClass::Output && g.io == frag_depth));
            self.entry_points.push(EntryPoint {
                function: function_id,
                name: func.name.clone(),
                stage,
                interface,
                depth_replacing,
            });
        } else {
            let result = self.ty(func.return_type)?;
            let mut parameters = Vec::with_capacity(func.parameters.len());
            for param in &func.parameters {
                parameters.push(self.ty(param.ty)?);
            }
            let fn_ty = self.function_type(result, parameters.clone());
            spv_fn.def = Some(inst(
                spirv::Op::Function,
                Some(result),
                Some(function_id),
                vec![
                    Operand::FunctionControl(spirv::FunctionControl::NONE),
                    Operand::IdRef(fn_ty),
                ],
            ));
            for (index, (param, ty)) in func.parameters.iter().zip(parameters).enumerate() {
                let id = self.id();
                spv_fn
                    .parameters
                    .push(inst(spirv::Op::FunctionParameter, Some(ty), Some(id), Vec::new()));
                if let Some(name) = &param.name {
                    self.name(id, name);
                }
                if let Some(value) = func.parameter_value(index) {
                    body.values.insert(value, id);
                }
            }
        }
        spv_fn.end = Some(inst(spirv::Op::FunctionEnd, None, None, Vec::new()));
        self.name(function_id, &func.name);

        let layout = func.layout();
        for &block in &layout {
            let label = self.id();
            body.labels.insert(block, label);
        }
        for (_, instruction) in func.instructions.iter() {
            if let Some(result) = instruction.result {
                let id = self.id();
                body.values.insert(result, id);
            }
        }
        for (handle, value) in func.values.iter() {
            if let (Some(name), Some(&id)) = (&value.name, body.values.get(&handle))
                && matches!(value.def, ValueDef::Instruction(_))
            {
                self.name(id, name);
            }
        }

        for &block in &layout {
            let mut out = dr::Block::new();
            out.label = Some(inst(spirv::Op::Label, None, Some(body.labels[&block]), Vec::new()));
            for &handle in &func.blocks[block].instructions {
                let op = &func.instructions[handle].op;
                if !parameter_loads.is_empty() && !matches!(op, Op::Variable { .. }) {
                    out.instructions.append(&mut parameter_loads);
                }
                let result = func.instructions[handle].result;
                self.instruction(func, &body, op, result, &mut out.instructions)?;
            }
            spv_fn.blocks.push(out);
        }
        self.spv.functions.push(spv_fn);
        Ok(())
    }

    /// Id of `value` as an operand. Buffer globals are addressed through
    /// member 0 of their wrapper.
    fn operand(&mut self, func: &Function, body: &Body, value: Handle<Value>, out: &mut Vec<Instruction>) -> Result<Word, BackendError> {
        let def = func
            .values
            .try_get(value)
            .ok_or_else(|| body.error(format!("value {} does not exist", value.index())))?
            .def;
        match def {
            ValueDef::Constant(c) => self.constant(c),
            ValueDef::Global(g) => {
                let entry = self
                    .globals
                    .get(&g)
                    .ok_or_else(|| body.error("reference to an undeclared global"))?;
                let (var, member_pointer) = (entry.id, entry.member_pointer);
                match member_pointer {
                    Some(pointer) => {
                        let zero = self.u32_constant(0);
                        let id = self.id();
                        out.push(inst(
                            spirv::Op::AccessChain,
                            Some(pointer),
                            Some(id),
                            vec![Operand::IdRef(var), Operand::IdRef(zero)],
                        ));
                        Ok(id)
                    }
                    None => Ok(var),
                }
            }
            ValueDef::Parameter(_) | ValueDef::Instruction(_) => body
                .values
                .get(&value)
                .copied()
                .ok_or_else(|| body.error(format!("value {} is used before it is defined", value.index()))),
        }
    }

    fn operands(&mut self, func: &Function, body: &Body, values: &[Handle<Value>], out: &mut Vec<Instruction>) -> Result<Vec<Operand>, BackendError> {
        let mut operands = Vec::with_capacity(values.len());
        for &value in values {
            operands.push(Operand::IdRef(self.operand(func, body, value, out)?));
        }
        Ok(operands)
    }

    fn block(&self, body: &Body, block: Handle<spindle_ir::Block>) -> Result<Word, BackendError> {
        body.labels
            .get(&block)
            .copied()
            .ok_or_else(|| body.error(format!("block {} is not laid out", block.index())))
    }

    fn instruction(
        &mut self,
        func: &'a Function,
        body: &Body,
        op: &Op,
        result: Option<Handle<Value>>,
        out: &mut Vec<Instruction>,
    ) -> Result<(), BackendError> {
        let module = self.module;
        let types = &module.types;
        let value_ty = |v: Handle<Value>| func.values[v].ty;
        // Type id and result id of a value-producing instruction.
        let target = |this: &mut Self| -> Result<(Word, Word), BackendError> {
            let result = result.ok_or_else(|| body.error(format!("{} has no result", op.name())))?;
            let ty = this.ty(func.values[result].ty)?;
            let id = body.values.get(&result).copied().ok_or_else(|| body.error("result without an id"))?;
            Ok((ty, id))
        };

        match op {
            Op::Unary { op: unary, operand } => {
                let kind = types[value_ty(*operand)].scalar().map(|s| s.kind);
                let opcode = match unary {
                    UnaryOp::Negate if kind == Some(ScalarKind::Sint) => spirv::Op::SNegate,
                    UnaryOp::Negate => spirv::Op::FNegate,
                    UnaryOp::LogicalNot => spirv::Op::LogicalNot,
                    UnaryOp::BitwiseNot => spirv::Op::Not,
                };
                let operands = self.operands(func, body, &[*operand], out)?;
                let (ty, id) = target(self)?;
                out.push(inst(opcode, Some(ty), Some(id), operands));
            }
            Op::Binary { op: binary, left, right } => {
                let (lt, rt) = (&types[value_ty(*left)], &types[value_ty(*right)]);
                let l = self.operand(func, body, *left, out)?;
                let r = self.operand(func, body, *right, out)?;
                let (ty, id) = target(self)?;
                if let (BinaryOp::Add | BinaryOp::Subtract, Type::Matrix { columns, rows, scalar }) = (binary, lt) {
                    let opcode = if *binary == BinaryOp::Add {
                        spirv::Op::FAdd
                    } else {
                        spirv::Op::FSub
                    };
                    let column_ty = self.vector_type(*scalar, *rows);
                    let mut parts = Vec::with_capacity(*columns as usize);
                    for column in 0..*columns as u32 {
                        let a = self.id();
                        let b = self.id();
                        let part = self.id();
                        for (dst, src) in [(a, l), (b, r)] {
                            out.push(inst(
                                spirv::Op::CompositeExtract,
                                Some(column_ty),
                                Some(dst),
                                vec![Operand::IdRef(src), Operand::LiteralBit32(column)],
                            ));
                        }
                        out.push(inst(opcode, Some(column_ty), Some(part), vec![Operand::IdRef(a), Operand::IdRef(b)]));
                        parts.push(Operand::IdRef(part));
                    }
                    out.push(inst(spirv::Op::CompositeConstruct, Some(ty), Some(id), parts));
                } else {
                    let opcode = binary_opcode(*binary, lt, rt);
                    out.push(inst(opcode, Some(ty), Some(id), vec![Operand::IdRef(l), Operand::IdRef(r)]));
                }
            }
            Op::Variable { init } => {
                let mut operands = vec![Operand::StorageClass(spirv::StorageClass::Function)];
                if let Some(init) = init {
                    operands.push(Operand::IdRef(self.constant(*init)?));
                }
                let (ty, id) = target(self)?;
                out.push(inst(spirv::Op::Variable, Some(ty), Some(id), operands));
            }
            Op::Load { pointer } => {
                let operands = self.operands(func, body, &[*pointer], out)?;
                let (ty, id) = target(self)?;
                out.push(inst(spirv::Op::Load, Some(ty), Some(id), operands));
            }
            Op::Store { pointer, value } => {
                let operands = self.operands(func, body, &[*pointer, *value], out)?;
                out.push(inst(spirv::Op::Store, None, None, operands));
            }
            Op::AccessChain { base, steps } => {
                let mut operands = Vec::with_capacity(steps.len() + 2);
                let wrapped = match func.values[*base].def {
                    ValueDef::Global(g) => self.globals.get(&g).filter(|e| e.member_pointer.is_some()).map(|e| e.id),
                    _ => None,
                };
                match wrapped {
                    Some(var) => {
                        operands.push(Operand::IdRef(var));
                        operands.push(Operand::IdRef(self.u32_constant(0)));
                    }
                    None => operands.push(Operand::IdRef(self.operand(func, body, *base, out)?)),
                }
                for step in steps {
                    let index = match step.index {
                        AccessIndex::Constant(i) => self.u32_constant(i),
                        AccessIndex::Dynamic(v) => self.operand(func, body, v, out)?,
                    };
                    operands.push(Operand::IdRef(index));
                }
                let (ty, id) = target(self)?;
                out.push(inst(spirv::Op::AccessChain, Some(ty), Some(id), operands));
            }
            Op::Extract { composite, indices } => {
                let mut operands = self.operands(func, body, &[*composite], out)?;
                operands.extend(indices.iter().map(|&i| Operand::LiteralBit32(i)));
                let (ty, id) = target(self)?;
                out.push(inst(spirv::Op::CompositeExtract, Some(ty), Some(id), operands));
            }
            Op::Construct { components } => {
                let operands = self.operands(func, body, components, out)?;
                let (ty, id) = target(self)?;
                out.push(inst(spirv::Op::CompositeConstruct, Some(ty), Some(id), operands));
            }
            Op::Splat { value } => {
                let component = self.operand(func, body, *value, out)?;
                let (ty, id) = target(self)?;
                let width = result
                    .and_then(|r| types[func.values[r].ty].vector_size())
                    .ok_or_else(|| body.error("splat without a vector result"))?;
                let operands = vec![Operand::IdRef(component); width as usize];
                out.push(inst(spirv::Op::CompositeConstruct, Some(ty), Some(id), operands));
            }
            Op::Swizzle { vector, pattern } => {
                let v = self.operand(func, body, *vector, out)?;
                let mut operands = vec![Operand::IdRef(v), Operand::IdRef(v)];
                operands.extend(pattern.iter().map(|&c| Operand::LiteralBit32(c as u32)));
                let (ty, id) = target(self)?;
                out.push(inst(spirv::Op::VectorShuffle, Some(ty), Some(id), operands));
            }
            Op::Select {
                condition,
                accept,
                reject,
            } => {
                let mut c = self.operand(func, body, *condition, out)?;
                let width = types[value_ty(*accept)].vector_size();
                if let Some(size) = width
                    && types[value_ty(*condition)].vector_size().is_none()
                    && !self.version_at_least(1, 4)
                {
                    let bvec = self.vector_type(Scalar::BOOL, size);
                    let splat = self.id();
                    out.push(inst(
                        spirv::Op::CompositeConstruct,
                        Some(bvec),
                        Some(splat),
                        vec![Operand::IdRef(c); size as usize],
                    ));
                    c = splat;
                }
                let mut operands = vec![Operand::IdRef(c)];
                operands.extend(self.operands(func, body, &[*accept, *reject], out)?);
                let (ty, id) = target(self)?;
                out.push(inst(spirv::Op::Select, Some(ty), Some(id), operands));
            }
            Op::Convert { value } => {
                let from = types[value_ty(*value)].scalar().map(|s| s.kind);
                let to = result.and_then(|r| types[func.values[r].ty].scalar()).map(|s| s.kind);
                let opcode = match (from, to) {
                    (Some(ScalarKind::Float), Some(ScalarKind::Sint)) => spirv::Op::ConvertFToS,
                    (Some(ScalarKind::Float), Some(ScalarKind::Uint)) => spirv::Op::ConvertFToU,
                    (Some(ScalarKind::Sint), Some(ScalarKind::Float)) => spirv::Op::ConvertSToF,
                    (Some(ScalarKind::Uint), Some(ScalarKind::Float)) => spirv::Op::ConvertUToF,
                    _ => return Err(body.error(format!("unsupported conversion {from:?} to {to:?}"))),
                };
                let operands = self.operands(func, body, &[*value], out)?;
                let (ty, id) = target(self)?;
                out.push(inst(opcode, Some(ty), Some(id), operands));
            }
            Op::Bitcast { value } => {
                let operands = self.operands(func, body, &[*value], out)?;
                let (ty, id) = target(self)?;
                out.push(inst(spirv::Op::Bitcast, Some(ty), Some(id), operands));
            }
            Op::Call { function, arguments } => {
                let callee = *self
                    .functions
                    .get(function)
                    .ok_or_else(|| body.error("call to an undeclared function"))?;
                let return_type = self.ty(module.functions[*function].return_type)?;
                let mut operands = vec![Operand::IdRef(callee)];
                operands.extend(self.operands(func, body, arguments, out)?);
                let id = match result.and_then(|r| body.values.get(&r)) {
                    Some(&id) => id,
                    None => self.id(),
                };
                out.push(inst(spirv::Op::FunctionCall, Some(return_type), Some(id), operands));
            }
            Op::Math { fun, arguments } => {
                let kind = arguments
                    .first()
                    .and_then(|&a| types[value_ty(a)].scalar())
                    .map_or(ScalarKind::Float, |s| s.kind);
                let args = self.operands(func, body, arguments, out)?;
                let (ty, id) = target(self)?;
                if *fun == MathFunction::Dot {
                    out.push(inst(spirv::Op::Dot, Some(ty), Some(id), args));
                } else {
                    let number = mapping::glsl_instruction(*fun, kind)
                        .ok_or_else(|| body.error(format!("`{}` is not available for {kind:?}", fun.name())))?;
                    let set = self.glsl();
                    let mut operands = vec![Operand::IdRef(set), Operand::LiteralExtInstInteger(number)];
                    operands.extend(args);
                    out.push(inst(spirv::Op::ExtInst, Some(ty), Some(id), operands));
                }
            }
            Op::Branch { target: block } => {
                let label = self.block(body, *block)?;
                out.push(inst(spirv::Op::Branch, None, None, vec![Operand::IdRef(label)]));
            }
            Op::CondBranch {
                condition,
                accept,
                reject,
                merge,
            } => {
                let c = self.operand(func, body, *condition, out)?;
                if let Some(merge) = merge {
                    let merge = self.block(body, *merge)?;
                    out.push(selection_merge(merge));
                }
                out.push(inst(
                    spirv::Op::BranchConditional,
                    None,
                    None,
                    vec![
                        Operand::IdRef(c),
                        Operand::IdRef(self.block(body, *accept)?),
                        Operand::IdRef(self.block(body, *reject)?),
                    ],
                ));
            }
            Op::Loop {
                body: loop_body,
                continuing,
                merge,
            } => {
                out.push(inst(
                    spirv::Op::LoopMerge,
                    None,
                    None,
                    vec![
                        Operand::IdRef(self.block(body, *merge)?),
                        Operand::IdRef(self.block(body, *continuing)?),
                        Operand::LoopControl(spirv::LoopControl::NONE),
                    ],
                ));
                let label = self.block(body, *loop_body)?;
                out.push(inst(spirv::Op::Branch, None, None, vec![Operand::IdRef(label)]));
            }
            Op::Switch {
                selector,
                cases,
                default,
                merge,
            } => {
                let s = self.operand(func, body, *selector, out)?;
                if let Some(merge) = merge {
                    let merge = self.block(body, *merge)?;
                    out.push(selection_merge(merge));
                }
                let mut operands = vec![Operand::IdRef(s), Operand::IdRef(self.block(body, *default)?)];
                for case in cases {
                    let label = self.block(body, case.target)?;
                    for &constant in &case.selectors {
                        let bits = match module.constants[constant] {
                            Constant::Scalar { bits, .. } => bits,
                            Constant::Zero { .. } => 0,
                            Constant::Composite { .. } => {
                                return Err(body.error("composite switch selector"));
                            }
                        };
                        operands.push(Operand::LiteralBit32(bits));
                        operands.push(Operand::IdRef(label));
                    }
                }
                out.push(inst(spirv::Op::Switch, None, None, operands));
            }
            Op::Return { value } => match (value, body.result_var) {
                (Some(value), Some(var)) => {
                    let v = self.operand(func, body, *value, out)?;
                    out.push(inst(spirv::Op::Store, None, None, vec![Operand::IdRef(var), Operand::IdRef(v)]));
                    out.push(inst(spirv::Op::Return, None, None, Vec::new()));
                }
                (Some(value), None) => {
                    let operands = self.operands(func, body, &[*value], out)?;
                    out.push(inst(spirv::Op::ReturnValue, None, None, operands));
                }
                (None, _) => out.push(inst(spirv::Op::Return, None, None, Vec::new())),
            },
            Op::Discard => out.push(inst(spirv::Op::Kill, None, None, Vec::new())),
            Op::Unreachable => out.push(inst(spirv::Op::Unreachable, None, None, Vec::new())),
        }
        Ok(())
    }

    // ---- module layout ----------------------------------------------------------------------

    fn finish(mut self) -> dr::Module {
        let module = self.module;
        let all_globals = self.version_at_least(1, 4);
        let entry_points = std::mem::take(&mut self.entry_points);
        for entry in entry_points {
            let model = match entry.stage {
                PipelineStage::Vertex => spirv::ExecutionModel::Vertex,
                PipelineStage::Fragment => spirv::ExecutionModel::Fragment,
                PipelineStage::Compute { .. } => spirv::ExecutionModel::GLCompute,
            };
            let mut operands = vec![
                Operand::ExecutionModel(model),
                Operand::IdRef(entry.function),
                Operand::LiteralString(entry.name),
            ];
            operands.extend(entry.interface.iter().map(|&id| Operand::IdRef(id)));
            for (handle, var) in module.global_variables.iter() {
                let listed = all_globals || matches!(var.space, StorageClass::Input | StorageClass::Output);
                if listed && let Some(global) = self.globals.get(&handle) {
                    operands.push(Operand::IdRef(global.id));
                }
            }
            self.spv
                .entry_points
                .push(inst(spirv::Op::EntryPoint, None, None, operands));

            let mut modes = Vec::new();
            match entry.stage {
                PipelineStage::Compute {
                    workgroup_size: [x, y, z],
                } => modes.push((
                    spirv::ExecutionMode::LocalSize,
                    vec![
                        Operand::LiteralBit32(x),
                        Operand::LiteralBit32(y),
                        Operand::LiteralBit32(z),
                    ],
                )),
                PipelineStage::Fragment => {
                    modes.push((spirv::ExecutionMode::OriginUpperLeft, Vec::new()));
                    if entry.depth_replacing {
                        modes.push((spirv::ExecutionMode::DepthReplacing, Vec::new()));
                    }
                }
                PipelineStage::Vertex => {}
            }
            for (mode, literals) in modes {
                let mut operands = vec![Operand::IdRef(entry.function), Operand::ExecutionMode(mode)];
                operands.extend(literals);
                self.spv
                    .execution_modes
                    .push(inst(spirv::Op::ExecutionMode, None, None, operands));
            }
        }

        self.spv.capabilities = self
            .capabilities
            .iter()
            .map(|&c| inst(spirv::Op::Capability, None, None, vec![Operand::Capability(c)]))
            .collect();
        self.spv.extensions = self
            .extensions
            .iter()
            .map(|&e| inst(spirv::Op::Extension, None, None, vec![Operand::LiteralString(e.into())]))
            .collect();
        self.spv.memory_model = Some(inst(
            spirv::Op::MemoryModel,
            None,
            None,
            vec![
                Operand::AddressingModel(spirv::AddressingModel::Logical),
                Operand::MemoryModel(spirv::MemoryModel::GLSL450),
            ],
        ));
        let (major, minor) = self.options.spirv_version;
        let mut header = dr::ModuleHeader::new(self.next_id);
        header.set_version(major, minor);
        self.spv.header = Some(header);
        log::debug!(
            "wrote SPIR-V {major}.{minor}: {} functions, id bound {}",
            self.spv.functions.len(),
            self.next_id
        );
        self.spv
    }
}

fn selection_merge(merge: Word) -> Instruction {
    inst(
        spirv::Op::SelectionMerge,
        None,
        None,
        vec![
            Operand::IdRef(merge),
            Operand::SelectionControl(spirv::SelectionControl::NONE),
        ],
    )
}

fn binary_opcode(op: BinaryOp, left: &Type, right: &Type) -> spirv::Op {
    let kind = left.scalar().map_or(ScalarKind::Float, |s| s.kind);
    let (float, signed, boolean) = (
        kind == ScalarKind::Float,
        kind == ScalarKind::Sint,
        kind == ScalarKind::Bool,
    );
    let pick = |f, s, u| {
        if float {
            f
        } else if signed {
            s
        } else {
            u
        }
    };
    match op {
        BinaryOp::Add => pick(spirv::Op::FAdd, spirv::Op::IAdd, spirv::Op::IAdd),
        BinaryOp::Subtract => pick(spirv::Op::FSub, spirv::Op::ISub, spirv::Op::ISub),
        BinaryOp::Multiply => match (left, right) {
            (Type::Matrix { .. }, Type::Matrix { .. }) => spirv::Op::MatrixTimesMatrix,
            (Type::Matrix { .. }, Type::Vector { .. }) => spirv::Op::MatrixTimesVector,
            (Type::Vector { .. }, Type::Matrix { .. }) => spirv::Op::VectorTimesMatrix,
            (Type::Matrix { .. }, _) => spirv::Op::MatrixTimesScalar,
            (Type::Vector { .. }, Type::Scalar(_)) if float => spirv::Op::VectorTimesScalar,
            _ => pick(spirv::Op::FMul, spirv::Op::IMul, spirv::Op::IMul),
        },
        BinaryOp::Divide => pick(spirv::Op::FDiv, spirv::Op::SDiv, spirv::Op::UDiv),
        BinaryOp::Modulo => pick(spirv::Op::FRem, spirv::Op::SRem, spirv::Op::UMod),
        BinaryOp::Equal if boolean => spirv::Op::LogicalEqual,
        BinaryOp::Equal => pick(spirv::Op::FOrdEqual, spirv::Op::IEqual, spirv::Op::IEqual),
        BinaryOp::NotEqual if boolean => spirv::Op::LogicalNotEqual,
        BinaryOp::NotEqual => pick(spirv::Op::FUnordNotEqual, spirv::Op::INotEqual, spirv::Op::INotEqual),
        BinaryOp::Less => pick(spirv::Op::FOrdLessThan, spirv::Op::SLessThan, spirv::Op::ULessThan),
        BinaryOp::LessEqual => pick(
            spirv::Op::FOrdLessThanEqual,
            spirv::Op::SLessThanEqual,
            spirv::Op::ULessThanEqual,
        ),
        BinaryOp::Greater => pick(
            spirv::Op::FOrdGreaterThan,
            spirv::Op::SGreaterThan,
            spirv::Op::UGreaterThan,
        ),
        BinaryOp::GreaterEqual => pick(
            spirv::Op::FOrdGreaterThanEqual,
            spirv::Op::SGreaterThanEqual,
            spirv::Op::UGreaterThanEqual,
        ),
        BinaryOp::LogicalAnd => spirv::Op::LogicalAnd,
        BinaryOp::LogicalOr => spirv::Op::LogicalOr,
        BinaryOp::BitwiseAnd => spirv::Op::BitwiseAnd,
        BinaryOp::BitwiseOr => spirv::Op::BitwiseOr,
        BinaryOp::BitwiseXor => spirv::Op::BitwiseXor,
        BinaryOp::ShiftLeft => spirv::Op::ShiftLeftLogical,
        BinaryOp::ShiftRight if signed => spirv::Op::ShiftRightArithmetic,
        BinaryOp::ShiftRight => spirv::Op::ShiftRightLogical,
    }
}

#[cfg(test)]
mod tests {
    use spindle_ir::{FunctionDecl, GlobalDecl, Literal};

    use super::*;

    fn words_of(module: &Module) -> Vec<u32> {
        write_module(module, &BackendOptions::default()).unwrap()
    }

    fn load(words: &[u32]) -> dr::Module {
        rspirv::dr::load_words(words).unwrap()
    }

    fn opcodes(spv: &dr::Module) -> Vec<spirv::Op> {
        spv.functions
            .iter()
            .flat_map(|f| f.blocks.iter())
            .flat_map(|b| b.instructions.iter())
            .map(|i| i.class.opcode)
            .collect()
    }

    fn empty_compute() -> Module {
        let mut module = Module::new();
        let void = module.types.void();
        let f = module
            .add_function(FunctionDecl::new("main", void).stage(PipelineStage::Compute {
                workgroup_size: [8, 4, 1],
            }))
            .unwrap();
        module.builder(f).unwrap().ret(None).unwrap();
        module.seal().unwrap();
        module
    }

    #[test]
    fn header_version_and_entry_point() {
        let words = words_of(&empty_compute());
        assert_eq!(words[0], spirv::MAGIC_NUMBER);
        assert_eq!(words[1], 0x0001_0300);
        let spv = load(&words);
        assert_eq!(spv.entry_points.len(), 1);
        assert_eq!(
            spv.entry_points[0].operands[2],
            Operand::LiteralString("main".into())
        );
        let mode = &spv.execution_modes[0];
        assert_eq!(
            mode.operands[1..],
            [
                Operand::ExecutionMode(spirv::ExecutionMode::LocalSize),
                Operand::LiteralBit32(8),
                Operand::LiteralBit32(4),
                Operand::LiteralBit32(1),
            ]
        );
    }

    #[test]
    fn requested_version_is_written() {
        let options = BackendOptions {
            spirv_version: (1, 5),
            emit_debug_names: false,
        };
        let words = write_module(&empty_compute(), &options).unwrap();
        assert_eq!(words[1], 0x0001_0500);
        assert!(load(&words).debug_names.is_empty());
    }

    #[test]
    fn unsealed_module_is_rejected() {
        let mut module = Module::new();
        let void = module.types.void();
        module.add_function(FunctionDecl::new("f", void)).unwrap();
        let err = write_module(&module, &BackendOptions::default()).unwrap_err();
        assert!(matches!(err, BackendError::NotSealed));
    }

    #[test]
    fn storage_buffer_is_wrapped_and_decorated() {
        let mut module = Module::new();
        let u32_ty = module.types.u32();
        let arr = module.types.array(u32_ty, None).unwrap();
        let data = module
            .add_global(GlobalDecl::new("data", StorageClass::Storage, arr).binding(0, 2))
            .unwrap();
        let void = module.types.void();
        let f = module.add_function(FunctionDecl::new("f", void)).unwrap();
        {
            let mut b = module.builder(f).unwrap();
            let g = b.global(data).unwrap();
            let zero = b.literal(Literal::U32(0)).unwrap();
            let p = b.access_chain(g, &[AccessIndex::Dynamic(zero)]).unwrap();
            b.load(p).unwrap();
            b.ret(None).unwrap();
        }
        module.seal().unwrap();
        let spv = load(&words_of(&module));

        let decorations: Vec<_> = spv
            .annotations
            .iter()
            .filter(|a| a.class.opcode == spirv::Op::Decorate)
            .filter_map(|a| match a.operands.get(1) {
                Some(Operand::Decoration(d)) => Some(*d),
                _ => None,
            })
            .collect();
        for expected in [
            spirv::Decoration::ArrayStride,
            spirv::Decoration::Block,
            spirv::Decoration::DescriptorSet,
            spirv::Decoration::Binding,
            spirv::Decoration::NonWritable,
        ] {
            assert!(decorations.contains(&expected), "{expected:?} missing");
        }
        let chain = spv.functions[0].blocks[0]
            .instructions
            .iter()
            .find(|i| i.class.opcode == spirv::Op::AccessChain)
            .unwrap();
        // Base, member 0 of the wrapper, then the element index.
        assert_eq!(chain.operands.len(), 3);
    }

    #[test]
    fn math_uses_glsl_std_450() {
        let mut module = Module::new();
        let f32_ty = module.types.f32();
        let f = module
            .add_function(FunctionDecl::new("f", f32_ty).parameter("x", f32_ty, None))
            .unwrap();
        {
            let mut b = module.builder(f).unwrap();
            let x = b.parameter(0).unwrap();
            let s = b.math(MathFunction::Sqrt, &[x]).unwrap();
            b.ret(Some(s)).unwrap();
        }
        module.seal().unwrap();
        let spv = load(&words_of(&module));
        assert_eq!(spv.ext_inst_imports.len(), 1);
        let ext = spv.functions[0].blocks[0]
            .instructions
            .iter()
            .find(|i| i.class.opcode == spirv::Op::ExtInst)
            .unwrap();
        assert_eq!(
            ext.operands[1],
            Operand::LiteralExtInstInteger(mapping::glsl::SQRT)
        );
        assert_eq!(spv.functions[0].parameters.len(), 1);
    }

    #[test]
    fn matrix_addition_is_column_wise() {
        let mut module = Module::new();
        let mat = module.types.matrix(2, 3).unwrap();
        let f = module
            .add_function(
                FunctionDecl::new("f", mat)
                    .parameter("a", mat, None)
                    .parameter("b", mat, None),
            )
            .unwrap();
        {
            let mut b = module.builder(f).unwrap();
            let x = b.parameter(0).unwrap();
            let y = b.parameter(1).unwrap();
            let sum = b.binary(BinaryOp::Add, x, y).unwrap();
            b.ret(Some(sum)).unwrap();
        }
        module.seal().unwrap();
        let ops = opcodes(&load(&words_of(&module)));
        assert_eq!(ops.iter().filter(|&&op| op == spirv::Op::FAdd).count(), 2);
        assert_eq!(
            ops.iter()
                .filter(|&&op| op == spirv::Op::CompositeExtract)
                .count(),
            4
        );
        assert!(ops.contains(&spirv::Op::CompositeConstruct));
    }

    #[test]
    fn undefined_struct_is_a_located_error() {
        let mut module = Module::new();
        let node = module.types.declare_struct("Node").unwrap();
        let options = BackendOptions::default();
        let mut writer = Writer::new(&module, &options);
        let err = writer.ty(node).unwrap_err();
        assert_eq!(err.to_string(), "struct `Node`: declared but never defined");
    }

    #[test]
    fn opcode_selection() {
        let f = Type::Scalar(Scalar::F32);
        let i = Type::Scalar(Scalar::I32);
        let u = Type::Scalar(Scalar::U32);
        let v = Type::Vector {
            size: VectorSize::Tri,
            scalar: Scalar::F32,
        };
        assert_eq!(binary_opcode(BinaryOp::Divide, &i, &i), spirv::Op::SDiv);
        assert_eq!(binary_opcode(BinaryOp::Divide, &u, &u), spirv::Op::UDiv);
        assert_eq!(binary_opcode(BinaryOp::Modulo, &f, &f), spirv::Op::FRem);
        assert_eq!(binary_opcode(BinaryOp::Multiply, &v, &f), spirv::Op::VectorTimesScalar);
        assert_eq!(binary_opcode(BinaryOp::ShiftRight, &i, &u), spirv::Op::ShiftRightArithmetic);
        assert_eq!(binary_opcode(BinaryOp::ShiftRight, &u, &u), spirv::Op::ShiftRightLogical);
        assert_eq!(
            binary_opcode(BinaryOp::NotEqual, &Type::Scalar(Scalar::BOOL), &Type::Scalar(Scalar::BOOL)),
            spirv::Op::LogicalNotEqual
        );
    }
}
