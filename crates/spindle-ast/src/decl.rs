//! Module-scope declarations and the program root.

use std::fmt::Write as _;

use spindle_ir::{AccessMode, Binding, PipelineStage, Source, StorageClass};

use crate::expr::Expression;
use crate::stmt::Statement;
use crate::symbol::{Symbol, SymbolTable};
use crate::ty::TypeDecl;

#[derive(Clone, Debug, PartialEq)]
pub struct StructMemberDecl {
    pub name: Symbol,
    pub ty: TypeDecl,
    /// Explicit `@offset`; computed from the layout rules when absent.
    pub offset: Option<u32>,
    pub source: Source,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StructDecl {
    pub name: Symbol,
    pub members: Vec<StructMemberDecl>,
    pub source: Source,
}

/// A module-scope `var` or `const`.
#[derive(Clone, Debug, PartialEq)]
pub struct GlobalDecl {
    pub name: Symbol,
    pub is_const: bool,
    /// `None` defaults to `private` for variables.
    pub class: Option<StorageClass>,
    /// Access of a storage buffer; read-only when absent.
    pub access: Option<AccessMode>,
    pub ty: TypeDecl,
    pub init: Option<Expression>,
    /// `@group(g) @binding(b)`.
    pub binding: Option<(u32, u32)>,
    /// `@location` or `@builtin` of a stage input or output variable.
    pub io: Option<Binding>,
    pub source: Source,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParameterDecl {
    pub name: Symbol,
    pub ty: TypeDecl,
    pub binding: Option<Binding>,
    pub source: Source,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FunctionDecl {
    pub name: Symbol,
    pub params: Vec<ParameterDecl>,
    pub return_type: TypeDecl,
    pub return_binding: Option<Binding>,
    /// Pipeline stage; compute stages carry the workgroup size.
    pub stage: Option<PipelineStage>,
    pub body: Vec<Statement>,
    pub source: Source,
}

/// A whole shader: identifier table plus declarations in source order.
#[derive(Clone, Debug, Default)]
pub struct Program {
    pub symbols: SymbolTable,
    pub structs: Vec<StructDecl>,
    pub globals: Vec<GlobalDecl>,
    pub functions: Vec<FunctionDecl>,
}

impl StructDecl {
    pub fn is_valid(&self) -> bool {
        !self.members.is_empty() && self.members.iter().all(|m| m.ty.is_valid())
    }

    pub fn to_str(&self, symbols: &SymbolTable) -> String {
        let mut out = format!("Struct {}{{\n", symbols.name(self.name));
        for member in &self.members {
            let _ = write!(
                out,
                "  StructMember{{{} {}",
                symbols.name(member.name),
                member.ty.to_str(symbols)
            );
            if let Some(offset) = member.offset {
                let _ = write!(out, " offset {offset}");
            }
            out.push_str("}\n");
        }
        out.push_str("}\n");
        out
    }
}

impl GlobalDecl {
    /// A `private` variable with no attributes.
    pub fn private(name: Symbol, ty: TypeDecl, source: Source) -> Self {
        Self {
            name,
            is_const: false,
            class: None,
            access: None,
            ty,
            init: None,
            binding: None,
            io: None,
            source,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.ty.is_valid()
            && self.init.as_ref().is_none_or(Expression::is_valid)
            && (!self.is_const || self.init.is_some())
    }

    pub fn to_str(&self, symbols: &SymbolTable) -> String {
        let keyword = if self.is_const { "const" } else { "var" };
        let mut out = format!("Global{{{keyword} {}", symbols.name(self.name));
        if let Some(class) = self.class {
            let _ = write!(out, " {class}");
        }
        if let Some(access) = self.access {
            let _ = write!(out, " {}", access.canonical_name());
        }
        let _ = write!(out, " {}", self.ty.to_str(symbols));
        if let Some((group, binding)) = self.binding {
            let _ = write!(out, " group {group} binding {binding}");
        }
        if let Some(io) = self.io {
            let _ = write!(out, " {io}");
        }
        match &self.init {
            Some(init) => {
                out.push('\n');
                let mut body = String::new();
                init.write(&mut body, symbols, 2);
                out.push_str(&body);
                out.push_str("}\n");
            }
            None => out.push_str("}\n"),
        }
        out
    }
}

impl FunctionDecl {
    pub fn is_valid(&self) -> bool {
        self.params.iter().all(|p| p.ty.is_valid())
            && self.return_type.is_valid()
            && self.body.iter().all(Statement::is_valid)
    }

    pub fn to_str(&self, symbols: &SymbolTable) -> String {
        let mut out = format!("Function {} -> {}", symbols.name(self.name), self.return_type.to_str(symbols));
        if let Some(stage) = self.stage {
            let _ = write!(out, " {stage}");
        }
        if let Some(binding) = self.return_binding {
            let _ = write!(out, " {binding}");
        }
        out.push_str("{\n");
        for param in &self.params {
            let _ = write!(
                out,
                "  Parameter{{{} {}",
                symbols.name(param.name),
                param.ty.to_str(symbols)
            );
            if let Some(binding) = param.binding {
                let _ = write!(out, " {binding}");
            }
            out.push_str("}\n");
        }
        for stmt in &self.body {
            for line in stmt.to_str(symbols).lines() {
                let _ = writeln!(out, "  {line}");
            }
        }
        out.push_str("}\n");
        out
    }
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.structs.iter().all(StructDecl::is_valid)
            && self.globals.iter().all(GlobalDecl::is_valid)
            && self.functions.iter().all(FunctionDecl::is_valid)
    }

    pub fn function(&self, name: Symbol) -> Option<&FunctionDecl> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Dumps every declaration in order: structs, globals, functions.
    pub fn to_str(&self) -> String {
        let mut out = String::new();
        for decl in &self.structs {
            out.push_str(&decl.to_str(&self.symbols));
        }
        for decl in &self.globals {
            out.push_str(&decl.to_str(&self.symbols));
        }
        for decl in &self.functions {
            out.push_str(&decl.to_str(&self.symbols));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use spindle_ir::BuiltIn;

    use super::*;
    use crate::expr::Literal;
    use crate::stmt::StatementKind;

    #[test]
    fn function_dump() {
        let mut program = Program::new();
        let main = program.symbols.register("main");
        let pos = program.symbols.register("pos");
        program.functions.push(FunctionDecl {
            name: main,
            params: vec![ParameterDecl {
                name: pos,
                ty: TypeDecl::vector(4, TypeDecl::F32),
                binding: Some(Binding::BuiltIn(BuiltIn::Position)),
                source: Source::default(),
            }],
            return_type: TypeDecl::Void,
            return_binding: None,
            stage: Some(PipelineStage::Fragment),
            body: vec![Statement::new(StatementKind::Discard, Source::default())],
            source: Source::default(),
        });
        assert_eq!(
            program.to_str(),
            "Function main -> __void @fragment{\n  Parameter{pos __vec_4__f32 builtin position}\n  Discard{}\n}\n"
        );
    }

    #[test]
    fn const_global_needs_initializer() {
        let mut symbols = SymbolTable::new();
        let pi = symbols.register("PI");
        let mut decl = GlobalDecl::private(pi, TypeDecl::F32, Source::default());
        decl.is_const = true;
        assert!(!decl.is_valid());
        decl.init = Some(Expression::literal(
            Literal::Float(std::f32::consts::PI),
            Source::default(),
        ));
        assert!(decl.is_valid());
        assert!(decl.to_str(&symbols).starts_with("Global{const PI __f32\n  ScalarConstructor{3.1415927}\n"));
    }

    #[test]
    fn empty_struct_is_invalid() {
        let mut symbols = SymbolTable::new();
        let s = symbols.register("S");
        let decl = StructDecl {
            name: s,
            members: Vec::new(),
            source: Source::default(),
        };
        assert!(!decl.is_valid());
        assert_eq!(decl.to_str(&symbols), "Struct S{\n}\n");
    }
}
