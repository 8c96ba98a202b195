#![warn(missing_docs)]
//! Backend trait and plugin architecture for Spindle.
//!
//! Defines the [`Backend`] trait that every translator implements, along
//! with supporting types ([`BackendOptions`], [`BackendOutput`],
//! [`BackendError`]) and a [`BackendRegistry`] for CLI dispatch.

use std::fmt::{self, Debug};

use spindle_ir::{Diagnostic, Module};

/// A backend that translates a sealed Spindle module to a target format.
pub trait Backend: Debug + Send + Sync {
    /// Human-readable name (e.g. "SPIR-V").
    fn name(&self) -> &str;

    /// Target identifiers this backend handles (for `--target` dispatch).
    fn targets(&self) -> &[&str];

    /// Translates a sealed module. Backends never mutate the IR and
    /// produce no output at all when they fail.
    fn compile(&self, module: &Module, opts: &BackendOptions)
    -> Result<BackendOutput, BackendError>;
}

/// Options passed to a backend during compilation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendOptions {
    /// SPIR-V version written into the module header, as (major, minor).
    pub spirv_version: (u8, u8),
    /// Emit debug names for functions, globals, struct members and named
    /// values.
    pub emit_debug_names: bool,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            spirv_version: (1, 3),
            emit_debug_names: true,
        }
    }
}

impl fmt::Display for BackendOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BackendOptions {{ spirv_version: {}.{}, emit_debug_names: {} }}",
            self.spirv_version.0, self.spirv_version.1, self.emit_debug_names
        )
    }
}

/// The output produced by a backend.
#[derive(Clone, Debug)]
pub struct BackendOutput {
    /// One or more output files.
    pub files: Vec<OutputFile>,
    /// Non-fatal diagnostics.
    pub diagnostics: Vec<Diagnostic>,
}

impl fmt::Display for BackendOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} file(s), {} diagnostic(s)",
            self.files.len(),
            self.diagnostics.len()
        )
    }
}

/// A single output file.
#[derive(Clone, Debug)]
pub struct OutputFile {
    /// Suggested filename (e.g. "module.spv", "module.ir").
    pub name: String,
    /// The file content.
    pub content: OutputContent,
}

impl fmt::Display for OutputFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Content of an output file.
#[derive(Clone, Debug)]
pub enum OutputContent {
    /// UTF-8 text.
    Text(String),
    /// Raw binary data.
    Binary(Vec<u8>),
}

impl fmt::Display for OutputContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "Text({} chars)", s.len()),
            Self::Binary(b) => write!(f, "Binary({} bytes)", b.len()),
        }
    }
}

/// Errors that can occur during backend compilation.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The module uses an IR feature not supported by this backend.
    #[error("unsupported: {0}")]
    Unsupported(String),
    /// The module still has functions that are not sealed.
    #[error("module is not sealed")]
    NotSealed,
    /// A translation failure tied to a place in the module.
    #[error("{location}: {message}")]
    Located {
        /// What went wrong.
        message: String,
        /// Where, e.g. "function `main`" or "struct `Light`".
        location: String,
    },
    /// A general backend error.
    #[error("{0}")]
    Other(String),
}

impl BackendError {
    /// Shorthand for [`BackendError::Located`].
    pub fn located(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Located {
            message: message.into(),
            location: location.into(),
        }
    }
}

/// Fails with [`BackendError::NotSealed`] unless every function of
/// `module` is sealed.
pub fn ensure_sealed(module: &Module) -> Result<(), BackendError> {
    if module.is_sealed() {
        Ok(())
    } else {
        Err(BackendError::NotSealed)
    }
}

/// Registry of available backends, used for CLI `--target` dispatch.
pub struct BackendRegistry {
    backends: Vec<Box<dyn Backend>>,
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            backends: Vec::new(),
        }
    }

    /// Creates a registry pre-populated with built-in backends.
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        reg.register(Box::new(IrDumpBackend));
        reg
    }

    /// Registers a backend.
    pub fn register(&mut self, backend: Box<dyn Backend>) {
        self.backends.push(backend);
    }

    /// Finds a backend that handles the given target identifier.
    pub fn find(&self, target: &str) -> Option<&dyn Backend> {
        self.backends
            .iter()
            .find(|b| b.targets().contains(&target))
            .map(|b| &**b)
    }

    /// Lists all supported target identifiers.
    pub fn list_targets(&self) -> Vec<&str> {
        self.backends
            .iter()
            .flat_map(|b| b.targets().iter().copied())
            .collect()
    }
}

/// Built-in backend that dumps the IR as text using
/// [`spindle_ir::dump_module`].
#[derive(Debug)]
pub struct IrDumpBackend;

impl Backend for IrDumpBackend {
    fn name(&self) -> &str {
        "IR Dump"
    }

    fn targets(&self) -> &[&str] {
        &["ir-dump", "ir"]
    }

    fn compile(
        &self,
        module: &Module,
        _opts: &BackendOptions,
    ) -> Result<BackendOutput, BackendError> {
        ensure_sealed(module)?;
        let text = spindle_ir::dump_module(module);
        Ok(BackendOutput {
            files: vec![OutputFile {
                name: "module.ir".into(),
                content: OutputContent::Text(text),
            }],
            diagnostics: vec![],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spindle_ir::FunctionDecl;

    fn sealed_module() -> Module {
        let mut module = Module::new();
        let void = module.types.void();
        let f = module.add_function(FunctionDecl::new("main", void)).unwrap();
        module.builder(f).unwrap().ret(None).unwrap();
        module.seal().unwrap();
        module
    }

    #[test]
    fn ir_dump_backend_targets() {
        let backend = IrDumpBackend;
        assert_eq!(backend.name(), "IR Dump");
        assert!(backend.targets().contains(&"ir-dump"));
        assert!(backend.targets().contains(&"ir"));
    }

    #[test]
    fn ir_dump_backend_compile() {
        let module = sealed_module();
        let output = IrDumpBackend
            .compile(&module, &BackendOptions::default())
            .unwrap();
        assert_eq!(output.files.len(), 1);
        assert_eq!(output.files[0].name, "module.ir");
        match &output.files[0].content {
            OutputContent::Text(text) => {
                assert!(text.starts_with("Module{\n"));
                assert!(text.contains("Function{main -> __void"));
            }
            _ => panic!("expected text output"),
        }
    }

    #[test]
    fn unsealed_module_is_rejected() {
        let mut module = Module::new();
        let void = module.types.void();
        module.add_function(FunctionDecl::new("main", void)).unwrap();
        let err = IrDumpBackend
            .compile(&module, &BackendOptions::default())
            .unwrap_err();
        assert!(matches!(err, BackendError::NotSealed));
    }

    #[test]
    fn registry_find_builtin() {
        let reg = BackendRegistry::with_builtins();
        assert!(reg.find("ir-dump").is_some());
        assert!(reg.find("ir").is_some());
        assert!(reg.find("nonexistent").is_none());
    }

    #[test]
    fn registry_custom_backend() {
        #[derive(Debug)]
        struct TestBackend;
        impl Backend for TestBackend {
            fn name(&self) -> &str {
                "test"
            }
            fn targets(&self) -> &[&str] {
                &["test-target"]
            }
            fn compile(
                &self,
                _module: &Module,
                _opts: &BackendOptions,
            ) -> Result<BackendOutput, BackendError> {
                Ok(BackendOutput {
                    files: vec![],
                    diagnostics: vec![],
                })
            }
        }

        let mut reg = BackendRegistry::new();
        reg.register(Box::new(TestBackend));
        assert!(reg.find("test-target").is_some());
        assert_eq!(reg.list_targets(), vec!["test-target"]);
    }

    #[test]
    fn registry_default_is_empty() {
        let reg = BackendRegistry::default();
        assert!(reg.list_targets().is_empty());
    }

    #[test]
    fn default_options() {
        let opts = BackendOptions::default();
        assert_eq!(opts.spirv_version, (1, 3));
        assert!(opts.emit_debug_names);
        assert_eq!(
            opts.to_string(),
            "BackendOptions { spirv_version: 1.3, emit_debug_names: true }"
        );
    }

    #[test]
    fn display_backend_output() {
        let output = BackendOutput {
            files: vec![
                OutputFile {
                    name: "a.spv".into(),
                    content: OutputContent::Binary(vec![1, 2, 3]),
                },
                OutputFile {
                    name: "b.wgsl".into(),
                    content: OutputContent::Text("hello".into()),
                },
            ],
            diagnostics: vec![Diagnostic::warning(spindle_ir::Source::default(), "unused")],
        };
        assert_eq!(format!("{output}"), "2 file(s), 1 diagnostic(s)");
        assert_eq!(format!("{}", output.files[0]), "a.spv");
        assert_eq!(
            format!("{}", output.files[0].content),
            "Binary(3 bytes)"
        );
    }

    #[test]
    fn backend_error_display() {
        let e1 = BackendError::Unsupported("texture sampling".into());
        assert_eq!(format!("{e1}"), "unsupported: texture sampling");

        let e2 = BackendError::located("struct `Node`", "recursive type");
        assert_eq!(format!("{e2}"), "struct `Node`: recursive type");

        assert_eq!(BackendError::NotSealed.to_string(), "module is not sealed");
    }
}
