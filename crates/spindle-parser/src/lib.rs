//! WGSL front end for Spindle.
//!
//! Parses WGSL source text with [naga](https://crates.io/crates/naga)'s
//! WGSL frontend and lowers the resulting `naga::Module` into a sealed
//! [`spindle_ir::Module`] through the IR builder.

mod lower;

use spindle_ir::{BuildOptions, Diagnostic, IrError, Module, Source};

/// Parse WGSL source into a sealed Spindle IR module.
pub fn parse(source: &str) -> Result<Module, ParseError> {
    parse_with_options(source, BuildOptions::default())
}

/// Like [`parse`], with explicit builder canonicalization options.
pub fn parse_with_options(source: &str, options: BuildOptions) -> Result<Module, ParseError> {
    let naga_module = naga::front::wgsl::parse_str(source)?;
    lower::lower_module(&naga_module, Some(source), options)
}

/// Lower an already parsed naga module. Instructions carry no source
/// locations.
pub fn lower(naga_module: &naga::Module, options: BuildOptions) -> Result<Module, ParseError> {
    lower::lower_module(naga_module, None, options)
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error(transparent)]
    Wgsl(#[from] naga::front::wgsl::ParseError),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("lowering: {0}")]
    Lowering(String),
    #[error(transparent)]
    Ir(#[from] IrError),
}

impl ParseError {
    /// The error as a diagnostic, located in `source` when naga reported a
    /// position.
    pub fn diagnostic(&self, source: &str) -> Diagnostic {
        match self {
            Self::Wgsl(err) => {
                let location = err
                    .location(source)
                    .map(|loc| Source::at(loc.line_number, loc.line_position))
                    .unwrap_or_default();
                Diagnostic::error(location, err.message())
            }
            other => Diagnostic::error(Source::default(), other.to_string()),
        }
    }
}
