//! Shader abstract syntax tree for Spindle.
//!
//! A [`Program`] is what a front end hands to the IR: declarations,
//! statements and expressions with source ranges, identifiers interned in a
//! per-program [`SymbolTable`]. [`validate`] reports every problem it finds
//! up to an error cap; [`lower`] validates, then builds and seals a
//! [`spindle_ir::Module`].

mod decl;
mod expr;
mod lower;
mod stmt;
mod symbol;
mod ty;
mod validate;

pub use decl::{FunctionDecl, GlobalDecl, ParameterDecl, Program, StructDecl, StructMemberDecl};
pub use expr::{Expression, ExpressionKind, Literal};
pub use lower::lower;
pub use spindle_ir::{Location, Source};
pub use stmt::{CaseStatement, ElseIf, Statement, StatementKind, VariableDecl};
pub use symbol::{Symbol, SymbolTable};
pub use ty::TypeDecl;
pub use validate::validate;

use spindle_ir::{BuildOptions, DEFAULT_MAX_ERRORS, Diagnostic, Diagnostics, IrError};

/// Default bound on expression and block nesting.
pub const DEFAULT_MAX_NESTING_DEPTH: usize = 128;

/// Options for [`validate`] and [`lower`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LowerOptions {
    /// Validation stops collecting errors after this many.
    pub max_errors: usize,
    pub max_nesting_depth: usize,
    /// Canonicalization performed by the IR builder.
    pub build: BuildOptions,
}

impl Default for LowerOptions {
    fn default() -> Self {
        Self {
            max_errors: DEFAULT_MAX_ERRORS,
            max_nesting_depth: DEFAULT_MAX_NESTING_DEPTH,
            build: BuildOptions::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LowerError {
    /// Validation failed; every collected diagnostic is kept.
    #[error("{0}")]
    Invalid(Diagnostics),
    #[error("{}: {message}", .location.begin)]
    Located { message: String, location: Source },
    #[error("nesting too deep: limit is {limit}")]
    NestingTooDeep { limit: usize, location: Source },
    #[error(transparent)]
    Ir(#[from] IrError),
}

impl LowerError {
    /// The error as renderable diagnostics.
    pub fn diagnostics(&self) -> Diagnostics {
        match self {
            Self::Invalid(diags) => diags.clone(),
            Self::Located { message, location } => single(Diagnostic::error(*location, message.clone())),
            Self::NestingTooDeep { location, .. } => {
                single(Diagnostic::error(*location, self.to_string()))
            }
            Self::Ir(err) => single(Diagnostic::error(Source::default(), err.to_string())),
        }
    }
}

fn single(diagnostic: Diagnostic) -> Diagnostics {
    let mut diags = Diagnostics::default();
    diags.push(diagnostic);
    diags
}
