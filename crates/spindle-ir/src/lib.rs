//! Spindle intermediate representation.
//!
//! A typed, SSA-like instruction graph for shader programs. Types and
//! constants are interned per [`Module`], functions are control-flow graphs
//! of blocks built through a [`Builder`] and frozen by [`Module::seal`]
//! before any backend sees them.

pub mod arena;
mod builder;
mod constant;
mod diagnostic;
mod display;
mod error;
mod fold;
mod func;
mod global;
mod instruction;
pub mod seal;
mod types;

pub use arena::{Arena, Handle, UniqueArena};
pub use builder::{BuildOptions, Builder};
pub use constant::{Constant, ConstantInterner, Literal};
pub use diagnostic::{DEFAULT_MAX_ERRORS, Diagnostic, Diagnostics, Location, Severity, Source};
pub use display::{
    dump_constant, dump_function, dump_global, dump_instruction, dump_module, dump_type,
};
pub use error::IrError;
pub use func::{Function, FunctionDecl, FunctionParameter, FunctionState, PipelineStage};
pub use global::{
    Binding, BuiltIn, GlobalDecl, GlobalVariable, ResourceBinding, StorageClass,
};
pub use instruction::{
    AccessIndex, AccessStep, BinaryOp, Block, Instruction, MathFunction, Op, SwitchCase,
    SwizzleComponent, UnaryOp, Value, ValueDef,
};
pub use types::{
    AccessMode, ArraySize, Bytes, Layout, Scalar, ScalarKind, StorageFormat, StructMember,
    StructType, TextureClass, TextureDimension, Type, TypeInterner, VectorSize,
};

/// A compilation unit: interned types and constants, globals and functions.
#[derive(Clone, Debug, Default)]
pub struct Module {
    /// Canonical type registry.
    pub types: TypeInterner,
    /// Canonical constant registry.
    pub constants: ConstantInterner,
    /// Module-scope variables, in declaration order.
    pub global_variables: Arena<GlobalVariable>,
    /// Functions, in declaration order.
    pub functions: Arena<Function>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a module-scope variable.
    ///
    /// Storage buffers are normalized to an access-controlled type
    /// (read-only unless the type already carries an access mode).
    pub fn add_global(&mut self, decl: GlobalDecl) -> Result<Handle<GlobalVariable>, IrError> {
        if decl.name.is_empty() {
            return Err(IrError::InvalidState("global variable without a name".into()));
        }
        if self.global_by_name(&decl.name).is_some() {
            return Err(IrError::InvalidState(format!(
                "global `{}` is already declared",
                decl.name
            )));
        }
        if !decl.space.is_global() {
            return Err(IrError::InvalidState(format!(
                "global `{}` cannot live in the function storage class",
                decl.name
            )));
        }
        let inner = self.types.try_get(decl.ty).ok_or(IrError::BadHandle {
            index: decl.ty.index(),
            size: self.types.len(),
        })?;
        let is_controlled = matches!(inner, Type::AccessControlled { .. });
        if matches!(inner, Type::Void) {
            return Err(IrError::InvalidType(format!("global `{}` is void", decl.name)));
        }
        let ty = match decl.space {
            StorageClass::Storage if !is_controlled => {
                self.types.access_controlled(decl.ty, AccessMode::Read)?
            }
            StorageClass::Storage => decl.ty,
            _ if is_controlled => {
                return Err(IrError::InvalidType(format!(
                    "only storage buffers can be access-controlled (global `{}`)",
                    decl.name
                )));
            }
            _ => decl.ty,
        };
        if let Some(init) = decl.init {
            let init_ty = self
                .constants
                .try_get(init)
                .ok_or(IrError::BadHandle {
                    index: init.index(),
                    size: self.constants.len(),
                })?
                .ty();
            if init_ty != ty {
                return Err(IrError::TypeMismatch {
                    expected: self.types.type_name(ty),
                    found: self.types.type_name(init_ty),
                });
            }
            if !matches!(decl.space, StorageClass::Private | StorageClass::Output) {
                return Err(IrError::InvalidState(format!(
                    "global `{}` in the {} storage class cannot have an initializer",
                    decl.name,
                    decl.space.name()
                )));
            }
        }
        let pointer_ty = self.types.pointer(ty, decl.space)?;
        log::debug!("declared global `{}`: {}", decl.name, self.types.type_name(ty));
        Ok(self.global_variables.append(GlobalVariable {
            name: decl.name,
            space: decl.space,
            ty,
            pointer_ty,
            init: decl.init,
            binding: decl.binding,
            io: decl.io,
        }))
    }

    /// Declares a function. Its body is built later with [`Module::builder`].
    pub fn add_function(&mut self, decl: FunctionDecl) -> Result<Handle<Function>, IrError> {
        if decl.name.is_empty() {
            return Err(IrError::InvalidState("function without a name".into()));
        }
        if self.function_by_name(&decl.name).is_some() {
            return Err(IrError::InvalidState(format!(
                "function `{}` is already declared",
                decl.name
            )));
        }
        if let Some(PipelineStage::Compute { workgroup_size }) = decl.stage
            && workgroup_size.contains(&0)
        {
            return Err(IrError::InvalidWorkgroupSize(workgroup_size));
        }
        for param in &decl.parameters {
            match self.types.try_get(param.ty) {
                None => {
                    return Err(IrError::BadHandle {
                        index: param.ty.index(),
                        size: self.types.len(),
                    });
                }
                Some(Type::Void) => {
                    return Err(IrError::InvalidType(format!(
                        "parameter of `{}` is void",
                        decl.name
                    )));
                }
                Some(_) => {}
            }
        }
        if self.types.try_get(decl.return_type).is_none() {
            return Err(IrError::BadHandle {
                index: decl.return_type.index(),
                size: self.types.len(),
            });
        }
        log::debug!("declared function `{}`", decl.name);
        Ok(self.functions.append(Function::from_decl(decl)))
    }

    /// Starts or resumes building the body of `function`.
    pub fn builder(&mut self, function: Handle<Function>) -> Result<Builder<'_>, IrError> {
        self.builder_with_options(function, BuildOptions::default())
    }

    pub fn builder_with_options(
        &mut self,
        function: Handle<Function>,
        options: BuildOptions,
    ) -> Result<Builder<'_>, IrError> {
        Builder::new(self, function, options)
    }

    /// Validates `function` and moves it to [`FunctionState::Sealed`].
    pub fn seal_function(&mut self, function: Handle<Function>) -> Result<(), IrError> {
        let func = self
            .functions
            .try_get(function)
            .ok_or(IrError::BadHandle {
                index: function.index(),
                size: self.functions.len(),
            })?;
        if func.state == FunctionState::Sealed {
            return Ok(());
        }
        seal::check_function(self, func)?;
        let func = &mut self.functions[function];
        func.state = FunctionState::Sealed;
        func.cursor = None;
        func.pure_values.clear();
        log::debug!("sealed function `{}`", func.name);
        Ok(())
    }

    /// Seals every function, stopping at the first failure.
    pub fn seal(&mut self) -> Result<(), IrError> {
        let handles: Vec<_> = self.functions.handles().collect();
        for function in handles {
            self.seal_function(function)?;
        }
        Ok(())
    }

    /// Returns `true` when every function is sealed.
    pub fn is_sealed(&self) -> bool {
        self.functions
            .iter()
            .all(|(_, f)| f.state == FunctionState::Sealed)
    }

    pub fn function_by_name(&self, name: &str) -> Option<Handle<Function>> {
        self.functions
            .iter()
            .find(|(_, f)| f.name == name)
            .map(|(h, _)| h)
    }

    pub fn global_by_name(&self, name: &str) -> Option<Handle<GlobalVariable>> {
        self.global_variables
            .iter()
            .find(|(_, g)| g.name == name)
            .map(|(h, _)| h)
    }

    /// Functions that carry a pipeline stage.
    pub fn entry_points(&self) -> impl Iterator<Item = (Handle<Function>, &Function)> {
        self.functions.iter().filter(|(_, f)| f.is_entry_point())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn module_is_send_and_sync() {
        assert_send_sync::<Module>();
    }

    #[test]
    fn storage_globals_are_access_controlled() {
        let mut module = Module::new();
        let u32_ty = module.types.u32();
        let arr = module.types.array(u32_ty, None).unwrap();
        let g = module
            .add_global(GlobalDecl::new("data", StorageClass::Storage, arr).binding(0, 1))
            .unwrap();
        let global = &module.global_variables[g];
        assert_eq!(
            module.types.type_name(global.ty),
            "__access_control_read_only__array__u32"
        );
        assert_eq!(global.access(&module.types), AccessMode::Read);
        assert_eq!(
            module.types.type_name(global.pointer_ty),
            "__ptr_storage__array__u32"
        );
    }

    #[test]
    fn duplicate_globals_are_rejected() {
        let mut module = Module::new();
        let f32_ty = module.types.f32();
        module
            .add_global(GlobalDecl::new("x", StorageClass::Private, f32_ty))
            .unwrap();
        assert!(
            module
                .add_global(GlobalDecl::new("x", StorageClass::Private, f32_ty))
                .is_err()
        );
    }

    #[test]
    fn initializer_type_must_match() {
        let mut module = Module::new();
        let f32_ty = module.types.f32();
        let one = module.constants.literal(&mut module.types, Literal::I32(1));
        let err = module
            .add_global(GlobalDecl::new("x", StorageClass::Private, f32_ty).init(one))
            .unwrap_err();
        assert!(matches!(err, IrError::TypeMismatch { .. }));
    }

    #[test]
    fn zero_workgroup_size_is_rejected() {
        let mut module = Module::new();
        let void = module.types.void();
        let err = module
            .add_function(FunctionDecl::new("main", void).stage(PipelineStage::Compute {
                workgroup_size: [0, 1, 1],
            }))
            .unwrap_err();
        assert_eq!(err, IrError::InvalidWorkgroupSize([0, 1, 1]));
    }

    #[test]
    fn seal_marks_module_sealed() {
        let mut module = Module::new();
        let void = module.types.void();
        let f = module.add_function(FunctionDecl::new("main", void)).unwrap();
        assert!(!module.is_sealed());
        module.builder(f).unwrap().ret(None).unwrap();
        module.seal().unwrap();
        assert!(module.is_sealed());
        assert!(matches!(module.builder(f), Err(IrError::InvalidState(_))));
    }
}
