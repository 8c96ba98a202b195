//! Program validation: collects every problem found, up to the error cap.

use std::collections::HashSet;

use spindle_ir::{Diagnostics, MathFunction, Source};

use crate::LowerOptions;
use crate::decl::{FunctionDecl, GlobalDecl, Program, StructDecl};
use crate::expr::{Expression, ExpressionKind};
use crate::stmt::{CaseStatement, Statement, StatementKind, VariableDecl};
use crate::symbol::Symbol;
use crate::ty::TypeDecl;

/// Checks `program` without lowering it.
///
/// Reports invalid or missing nodes, unknown identifiers, types and
/// functions, duplicate declarations, misplaced `break`, `continue` and
/// `fallthrough`, and nesting deeper than `options.max_nesting_depth`.
pub fn validate(program: &Program, options: &LowerOptions) -> Result<(), Diagnostics> {
    let mut validator = Validator {
        program,
        max_depth: options.max_nesting_depth,
        diags: Diagnostics::new(options.max_errors),
        structs: HashSet::new(),
        module_names: HashSet::new(),
        scopes: Vec::new(),
        constructs: Vec::new(),
        depth: 0,
        too_deep: false,
    };
    validator.program();
    if validator.diags.has_errors() {
        Err(validator.diags)
    } else {
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Construct {
    Loop,
    Continuing,
    Switch,
}

struct Validator<'p> {
    program: &'p Program,
    max_depth: usize,
    diags: Diagnostics,
    structs: HashSet<Symbol>,
    /// Globals and functions.
    module_names: HashSet<Symbol>,
    scopes: Vec<HashSet<Symbol>>,
    constructs: Vec<Construct>,
    depth: usize,
    too_deep: bool,
}

impl Validator<'_> {
    fn name(&self, symbol: Symbol) -> &str {
        self.program.symbols.name(symbol)
    }

    fn error(&mut self, source: Source, message: impl Into<String>) {
        self.diags.error(source, message);
    }

    /// Enters one nesting level. Returns `false` past the limit, reporting it
    /// once.
    fn enter(&mut self, source: Source) -> bool {
        self.depth += 1;
        if self.depth > self.max_depth {
            if !self.too_deep {
                self.too_deep = true;
                let limit = self.max_depth;
                self.error(source, format!("nesting too deep: limit is {limit}"));
            }
            return false;
        }
        true
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    // ---- declarations ----------------------------------------------------------------------

    fn program(&mut self) {
        let program = self.program;
        for decl in &program.structs {
            if !self.structs.insert(decl.name) {
                let name = self.name(decl.name).to_string();
                self.error(decl.source, format!("duplicate declaration of struct `{name}`"));
            }
        }
        for decl in &program.structs {
            self.struct_decl(decl);
        }
        for decl in &program.globals {
            self.global_decl(decl);
        }
        for decl in &program.functions {
            if !self.module_names.insert(decl.name) {
                let name = self.name(decl.name).to_string();
                self.error(decl.source, format!("duplicate declaration of `{name}`"));
            }
        }
        for decl in &program.functions {
            self.function_decl(decl);
        }
    }

    fn struct_decl(&mut self, decl: &StructDecl) {
        if decl.members.is_empty() {
            let name = self.name(decl.name).to_string();
            self.error(decl.source, format!("struct `{name}` has no members"));
        }
        let mut seen = HashSet::new();
        for member in &decl.members {
            if !seen.insert(member.name) {
                let name = self.name(member.name).to_string();
                self.error(member.source, format!("duplicate member `{name}`"));
            }
            self.type_decl(&member.ty, member.source);
        }
    }

    fn global_decl(&mut self, decl: &GlobalDecl) {
        if !self.module_names.insert(decl.name) {
            let name = self.name(decl.name).to_string();
            self.error(decl.source, format!("duplicate declaration of `{name}`"));
        }
        self.type_decl(&decl.ty, decl.source);
        match &decl.init {
            Some(init) => self.expression(init),
            None if decl.is_const => {
                let name = self.name(decl.name).to_string();
                self.error(decl.source, format!("constant `{name}` needs an initializer"));
            }
            None => {}
        }
    }

    fn function_decl(&mut self, decl: &FunctionDecl) {
        self.type_decl(&decl.return_type, decl.source);
        self.scopes.push(HashSet::new());
        for param in &decl.params {
            self.type_decl(&param.ty, param.source);
            self.declare(param.name, param.source);
        }
        self.block(&decl.body);
        self.scopes.pop();
    }

    fn declare(&mut self, name: Symbol, source: Source) {
        let fresh = self.scopes.last_mut().is_none_or(|scope| scope.insert(name));
        if !fresh {
            let name = self.name(name).to_string();
            self.error(source, format!("duplicate declaration of `{name}`"));
        }
    }

    fn type_decl(&mut self, ty: &TypeDecl, source: Source) {
        if !ty.is_valid() {
            let name = ty.to_str(&self.program.symbols);
            self.error(source, format!("invalid type `{name}`"));
            return;
        }
        match ty {
            TypeDecl::Named(name) if !self.structs.contains(name) => {
                let name = self.name(*name).to_string();
                self.error(source, format!("unknown type `{name}`"));
            }
            TypeDecl::Vector { element: inner, .. }
            | TypeDecl::Array { element: inner, .. }
            | TypeDecl::Pointer { base: inner, .. }
            | TypeDecl::AccessControl { base: inner, .. } => self.type_decl(inner, source),
            _ => {}
        }
    }

    // ---- statements ------------------------------------------------------------------------

    fn block(&mut self, body: &[Statement]) {
        self.scopes.push(HashSet::new());
        for stmt in body {
            self.statement(stmt);
        }
        self.scopes.pop();
    }

    fn nested(&mut self, body: &[Statement], construct: Option<Construct>, source: Source) {
        if !self.enter(source) {
            self.leave();
            return;
        }
        if let Some(construct) = construct {
            self.constructs.push(construct);
        }
        self.block(body);
        if construct.is_some() {
            self.constructs.pop();
        }
        self.leave();
    }

    fn statement(&mut self, stmt: &Statement) {
        let source = stmt.source;
        match &stmt.kind {
            StatementKind::VariableDecl(decl) => self.variable_decl(decl, source),
            StatementKind::Assign { lhs, rhs } => {
                self.expression(lhs);
                self.expression(rhs);
            }
            StatementKind::If {
                condition,
                body,
                else_ifs,
                else_body,
            } => {
                self.expression(condition);
                self.nested(body, None, source);
                for arm in else_ifs {
                    self.expression(&arm.condition);
                    self.nested(&arm.body, None, arm.source);
                }
                if let Some(else_body) = else_body {
                    self.nested(else_body, None, source);
                }
            }
            StatementKind::Loop { body, continuing } => {
                // Names declared in the body stay visible in `continuing`.
                if !self.enter(source) {
                    self.leave();
                    return;
                }
                self.scopes.push(HashSet::new());
                self.constructs.push(Construct::Loop);
                for stmt in body {
                    self.statement(stmt);
                }
                self.constructs.pop();
                self.nested(continuing, Some(Construct::Continuing), source);
                self.scopes.pop();
                self.leave();
            }
            StatementKind::Break => {
                if !matches!(
                    self.constructs.last(),
                    Some(Construct::Loop | Construct::Switch)
                ) {
                    self.error(source, "`break` outside of a loop or switch");
                }
            }
            StatementKind::Continue => {
                let innermost_loop = self
                    .constructs
                    .iter()
                    .rev()
                    .find(|c| **c != Construct::Switch);
                match innermost_loop {
                    Some(Construct::Loop) => {}
                    Some(_) => self.error(source, "`continue` inside a continuing block"),
                    None => self.error(source, "`continue` outside of a loop"),
                }
            }
            StatementKind::Return(value) => {
                if let Some(value) = value {
                    self.expression(value);
                }
            }
            StatementKind::Discard => {}
            StatementKind::Switch { selector, cases } => {
                self.expression(selector);
                if cases.iter().filter(|c| c.is_default()).count() > 1 {
                    self.error(source, "switch has more than one default case");
                }
                for (i, case) in cases.iter().enumerate() {
                    self.case(case, i + 1 == cases.len());
                }
            }
            StatementKind::Fallthrough => {
                self.error(source, "`fallthrough` must be the last statement of a case");
            }
            StatementKind::Call { function, args } => self.call(*function, args, source),
            StatementKind::Block(body) => self.nested(body, None, source),
        }
    }

    fn variable_decl(&mut self, decl: &VariableDecl, source: Source) {
        if let Some(ty) = &decl.ty {
            self.type_decl(ty, source);
        }
        match &decl.init {
            Some(init) => self.expression(init),
            None if decl.is_const => {
                let name = self.name(decl.name).to_string();
                self.error(source, format!("`let` declaration of `{name}` needs an initializer"));
            }
            None if decl.ty.is_none() => {
                let name = self.name(decl.name).to_string();
                self.error(
                    source,
                    format!("declaration of `{name}` needs a type or an initializer"),
                );
            }
            None => {}
        }
        // Declared after the initializer: `var x = x;` refers to an outer `x`.
        self.declare(decl.name, source);
    }

    fn case(&mut self, case: &CaseStatement, is_last: bool) {
        if !self.enter(case.source) {
            self.leave();
            return;
        }
        let body = match case.body.split_last() {
            Some((last, rest)) if last.kind == StatementKind::Fallthrough => {
                if is_last {
                    self.error(last.source, "`fallthrough` in the last case");
                }
                rest
            }
            _ => &case.body[..],
        };
        self.constructs.push(Construct::Switch);
        self.block(body);
        self.constructs.pop();
        self.leave();
    }

    // ---- expressions -----------------------------------------------------------------------

    fn is_visible(&self, name: Symbol) -> bool {
        self.scopes.iter().any(|scope| scope.contains(&name)) || self.module_names.contains(&name)
    }

    fn call(&mut self, function: Symbol, args: &[Expression], source: Source) {
        let known = self.program.function(function).is_some()
            || MathFunction::from_name(self.name(function)).is_some();
        if !known {
            let name = self.name(function).to_string();
            self.error(source, format!("unknown function `{name}`"));
        }
        for arg in args {
            self.expression(arg);
        }
    }

    fn expression(&mut self, expr: &Expression) {
        if !self.enter(expr.source) {
            self.leave();
            return;
        }
        match &expr.kind {
            ExpressionKind::Identifier(name) => {
                if !self.is_visible(*name) {
                    let name = self.name(*name).to_string();
                    self.error(expr.source, format!("unknown identifier `{name}`"));
                }
            }
            ExpressionKind::ScalarConstructor(_) => {}
            ExpressionKind::TypeConstructor { ty, values } => {
                self.type_decl(ty, expr.source);
                for value in values {
                    self.expression(value);
                }
            }
            ExpressionKind::Binary { lhs, rhs, .. } => {
                self.expression(lhs);
                self.expression(rhs);
            }
            ExpressionKind::Unary { expr: inner, .. }
            | ExpressionKind::MemberAccessor {
                structure: inner, ..
            } => self.expression(inner),
            ExpressionKind::ArrayAccessor { array, index } => {
                self.expression(array);
                self.expression(index);
            }
            ExpressionKind::Call { function, args } => self.call(*function, args, expr.source),
            ExpressionKind::Bitcast { ty, expr: inner } => {
                self.type_decl(ty, expr.source);
                self.expression(inner);
            }
            ExpressionKind::Missing => self.error(expr.source, "missing expression"),
        }
        self.leave();
    }
}
