mod common;

use spindle_backend_core::{Backend, BackendError, BackendOptions, BackendRegistry, IrDumpBackend};

#[test]
fn invalid_wgsl_is_rejected() {
    let result = spindle_parser::parse("this is not valid WGSL @@@ {{{");
    assert!(result.is_err());
}

#[test]
fn parse_errors_are_located() {
    let source = "fn main() {\n    let x = ;\n}\n";
    let err = spindle_parser::parse(source).unwrap_err();
    let rendered = err.diagnostic(source).render("bad.wgsl", source);
    assert!(rendered.starts_with("bad.wgsl:2:"), "{rendered}");
    assert!(rendered.contains("let x = ;"), "{rendered}");
}

#[test]
fn ir_dump_empty_module_ok() {
    let module = spindle_ir::Module::default();
    let result = IrDumpBackend.compile(&module, &BackendOptions::default());
    assert!(result.is_ok());
}

#[test]
fn unsealed_modules_are_refused_by_every_backend() {
    let mut module = spindle_ir::Module::new();
    let void = module.types.void();
    module
        .add_function(spindle_ir::FunctionDecl::new("main", void))
        .unwrap();

    let mut registry = BackendRegistry::with_builtins();
    registry.register(Box::new(spindle_backend_spirv::SpirvBackend));
    registry.register(Box::new(spindle_backend_wgsl::WgslBackend));
    for target in ["ir-dump", "spirv", "wgsl"] {
        let backend = registry.find(target).unwrap();
        let result = backend.compile(&module, &BackendOptions::default());
        assert!(
            matches!(result, Err(BackendError::NotSealed)),
            "{target}: {result:?}"
        );
    }
}

#[test]
fn garbage_spirv_is_rejected() {
    assert!(spindle_backend_spirv::read_bytes(&[1, 2, 3]).is_err());
    assert!(spindle_backend_spirv::read_bytes(&[0; 8]).is_err());
}
