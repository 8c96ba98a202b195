//! WGSL backend for Spindle.
//!
//! Prints a sealed [`Module`] back as WGSL source. Structured control flow
//! is recovered from the merge annotations recorded while the IR was
//! built, so modules produced by the WGSL front end or read back from
//! SPIR-V print as `if`/`loop`/`switch` without a restructuring pass.

mod namer;
mod writer;

pub use writer::{literal, write_module};

use spindle_backend_core::{
    Backend, BackendError, BackendOptions, BackendOutput, OutputContent, OutputFile,
};
use spindle_ir::Module;

/// WGSL backend.
#[derive(Debug)]
pub struct WgslBackend;

impl Backend for WgslBackend {
    fn name(&self) -> &str {
        "WGSL"
    }

    fn targets(&self) -> &[&str] {
        &["wgsl"]
    }

    fn compile(
        &self,
        module: &Module,
        _opts: &BackendOptions,
    ) -> Result<BackendOutput, BackendError> {
        let text = write_module(module)?;
        Ok(BackendOutput {
            files: vec![OutputFile {
                name: "module.wgsl".into(),
                content: OutputContent::Text(text),
            }],
            diagnostics: vec![],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spindle_ir::{FunctionDecl, Literal, PipelineStage};

    #[test]
    fn backend_targets() {
        assert_eq!(WgslBackend.name(), "WGSL");
        assert_eq!(WgslBackend.targets(), &["wgsl"]);
    }

    #[test]
    fn compile_produces_text() {
        let mut module = Module::new();
        let void = module.types.void();
        let f = module
            .add_function(FunctionDecl::new("main", void).stage(PipelineStage::Compute {
                workgroup_size: [1, 1, 1],
            }))
            .unwrap();
        module.builder(f).unwrap().ret(None).unwrap();
        module.seal().unwrap();

        let output = WgslBackend
            .compile(&module, &BackendOptions::default())
            .unwrap();
        assert_eq!(output.files[0].name, "module.wgsl");
        let OutputContent::Text(text) = &output.files[0].content else {
            panic!("expected text output");
        };
        assert_eq!(
            text,
            "@compute @workgroup_size(1, 1, 1)\nfn main() {\n    return;\n}\n"
        );
    }

    #[test]
    fn unsealed_module_is_rejected() {
        let mut module = Module::new();
        let void = module.types.void();
        module.add_function(FunctionDecl::new("main", void)).unwrap();
        assert!(matches!(
            WgslBackend.compile(&module, &BackendOptions::default()),
            Err(BackendError::NotSealed)
        ));
    }

    #[test]
    fn literal_spelling() {
        assert_eq!(literal(Literal::U32(10)), "10u");
        assert_eq!(literal(Literal::I32(10)), "10i");
        assert_eq!(literal(Literal::I32(-3)), "-3i");
        assert_eq!(literal(Literal::I32(i32::MIN)), "i32(-2147483648)");
        assert_eq!(literal(Literal::F32(1.0)), "1e0");
        assert_eq!(literal(Literal::F32(47.2)), "4.72e1");
        assert_eq!(literal(Literal::F32(0.1)), "1e-1");
        assert_eq!(literal(Literal::Bool(true)), "true");
        assert_eq!(
            literal(Literal::F32(f32::INFINITY)),
            "bitcast<f32>(0x7f800000u)"
        );
    }
}
