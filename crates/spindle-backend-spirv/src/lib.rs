//! SPIR-V backend for Spindle.
//!
//! [`write_module`] turns a sealed [`Module`] into SPIR-V words built with
//! `rspirv`; [`read_module`] goes the other way for binaries in the shape
//! the writer produces. Writing a module and reading it back yields the
//! same IR dump.

mod mapping;
mod reader;
mod writer;

pub use reader::{SpirvReadError, read_bytes, read_module};
pub use writer::write_module;

use spindle_backend_core::{
    Backend, BackendError, BackendOptions, BackendOutput, OutputContent, OutputFile,
};
use spindle_ir::Module;

/// SPIR-V backend.
#[derive(Debug)]
pub struct SpirvBackend;

impl Backend for SpirvBackend {
    fn name(&self) -> &str {
        "SPIR-V"
    }

    fn targets(&self) -> &[&str] {
        &["spirv", "spv"]
    }

    fn compile(
        &self,
        module: &Module,
        opts: &BackendOptions,
    ) -> Result<BackendOutput, BackendError> {
        let words = write_module(module, opts)?;
        let bytes = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        Ok(BackendOutput {
            files: vec![OutputFile {
                name: "module.spv".into(),
                content: OutputContent::Binary(bytes),
            }],
            diagnostics: vec![],
        })
    }
}
