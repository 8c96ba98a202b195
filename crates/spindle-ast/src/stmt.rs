//! Statement nodes.

use std::fmt::Write as _;

use spindle_ir::Source;

use crate::expr::{Expression, Literal};
use crate::symbol::{Symbol, SymbolTable};
use crate::ty::TypeDecl;

#[derive(Clone, Debug, PartialEq)]
pub struct Statement {
    pub kind: StatementKind,
    pub source: Source,
}

/// `let` or `var` inside a function.
#[derive(Clone, Debug, PartialEq)]
pub struct VariableDecl {
    pub name: Symbol,
    /// `true` for `let`.
    pub is_const: bool,
    pub ty: Option<TypeDecl>,
    pub init: Option<Expression>,
}

/// One `else if` arm.
#[derive(Clone, Debug, PartialEq)]
pub struct ElseIf {
    pub condition: Expression,
    pub body: Vec<Statement>,
    pub source: Source,
}

/// A switch arm. Empty `selectors` marks the default arm.
#[derive(Clone, Debug, PartialEq)]
pub struct CaseStatement {
    pub selectors: Vec<Literal>,
    pub body: Vec<Statement>,
    pub source: Source,
}

#[derive(Clone, Debug, PartialEq)]
pub enum StatementKind {
    VariableDecl(VariableDecl),
    Assign {
        lhs: Expression,
        rhs: Expression,
    },
    If {
        condition: Expression,
        body: Vec<Statement>,
        else_ifs: Vec<ElseIf>,
        else_body: Option<Vec<Statement>>,
    },
    Loop {
        body: Vec<Statement>,
        continuing: Vec<Statement>,
    },
    Break,
    Continue,
    Return(Option<Expression>),
    Discard,
    Switch {
        selector: Expression,
        cases: Vec<CaseStatement>,
    },
    /// Continue into the next case; only valid as the last statement of a
    /// case body.
    Fallthrough,
    Call {
        function: Symbol,
        args: Vec<Expression>,
    },
    Block(Vec<Statement>),
}

impl CaseStatement {
    pub fn new(selectors: Vec<Literal>, body: Vec<Statement>, source: Source) -> Self {
        Self {
            selectors,
            body,
            source,
        }
    }

    pub fn is_default(&self) -> bool {
        self.selectors.is_empty()
    }

    pub fn is_valid(&self) -> bool {
        self.body.iter().all(Statement::is_valid)
    }

    /// `Case 1, 2{` ... `}`, or `Default{` ... `}`.
    pub fn to_str(&self, symbols: &SymbolTable) -> String {
        let mut out = String::new();
        self.write(&mut out, symbols, 0);
        out
    }

    fn write(&self, out: &mut String, symbols: &SymbolTable, indent: usize) {
        let pad = " ".repeat(indent);
        if self.is_default() {
            let _ = write!(out, "{pad}Default{{");
        } else {
            let selectors: Vec<String> = self.selectors.iter().map(|s| s.to_str()).collect();
            let _ = write!(out, "{pad}Case {}{{", selectors.join(", "));
        }
        write_body(out, symbols, &self.body, indent);
    }
}

impl Statement {
    pub fn new(kind: StatementKind, source: Source) -> Self {
        Self { kind, source }
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            StatementKind::VariableDecl(_) => "VariableDecl",
            StatementKind::Assign { .. } => "Assignment",
            StatementKind::If { .. } => "If",
            StatementKind::Loop { .. } => "Loop",
            StatementKind::Break => "Break",
            StatementKind::Continue => "Continue",
            StatementKind::Return(_) => "Return",
            StatementKind::Discard => "Discard",
            StatementKind::Switch { .. } => "Switch",
            StatementKind::Fallthrough => "Fallthrough",
            StatementKind::Call { .. } => "Call",
            StatementKind::Block(_) => "Block",
        }
    }

    pub fn is_valid(&self) -> bool {
        let all = |stmts: &[Statement]| stmts.iter().all(Statement::is_valid);
        match &self.kind {
            StatementKind::VariableDecl(decl) => {
                decl.ty.as_ref().is_none_or(TypeDecl::is_valid)
                    && decl.init.as_ref().is_none_or(Expression::is_valid)
                    && (decl.ty.is_some() || decl.init.is_some())
                    && (!decl.is_const || decl.init.is_some())
            }
            StatementKind::Assign { lhs, rhs } => lhs.is_valid() && rhs.is_valid(),
            StatementKind::If {
                condition,
                body,
                else_ifs,
                else_body,
            } => {
                condition.is_valid()
                    && all(body)
                    && else_ifs
                        .iter()
                        .all(|e| e.condition.is_valid() && all(&e.body))
                    && else_body.as_deref().is_none_or(all)
            }
            StatementKind::Loop { body, continuing } => all(body) && all(continuing),
            StatementKind::Return(value) => value.as_ref().is_none_or(Expression::is_valid),
            StatementKind::Switch { selector, cases } => {
                selector.is_valid()
                    && cases.iter().all(CaseStatement::is_valid)
                    && cases.iter().filter(|c| c.is_default()).count() <= 1
            }
            StatementKind::Call { args, .. } => args.iter().all(Expression::is_valid),
            StatementKind::Block(body) => all(body),
            StatementKind::Break
            | StatementKind::Continue
            | StatementKind::Discard
            | StatementKind::Fallthrough => true,
        }
    }

    pub fn to_str(&self, symbols: &SymbolTable) -> String {
        let mut out = String::new();
        self.write(&mut out, symbols, 0);
        out
    }

    fn write(&self, out: &mut String, symbols: &SymbolTable, indent: usize) {
        let pad = " ".repeat(indent);
        let name = self.kind_name();
        let inner = " ".repeat(indent + 2);
        match &self.kind {
            StatementKind::Break
            | StatementKind::Continue
            | StatementKind::Discard
            | StatementKind::Fallthrough
            | StatementKind::Return(None) => {
                let _ = writeln!(out, "{pad}{name}{{}}");
            }
            StatementKind::Return(Some(value)) => {
                let _ = writeln!(out, "{pad}{name}{{");
                value.write(out, symbols, indent + 2);
                let _ = writeln!(out, "{pad}}}");
            }
            StatementKind::VariableDecl(decl) => {
                let keyword = if decl.is_const { "let" } else { "var" };
                let _ = write!(out, "{pad}{name} {keyword} {}", symbols.name(decl.name));
                if let Some(ty) = &decl.ty {
                    let _ = write!(out, " {}", ty.to_str(symbols));
                }
                match &decl.init {
                    Some(init) => {
                        out.push_str("{\n");
                        init.write(out, symbols, indent + 2);
                        let _ = writeln!(out, "{pad}}}");
                    }
                    None => out.push_str("{}\n"),
                }
            }
            StatementKind::Assign { lhs, rhs } => {
                let _ = writeln!(out, "{pad}{name}{{");
                lhs.write(out, symbols, indent + 2);
                rhs.write(out, symbols, indent + 2);
                let _ = writeln!(out, "{pad}}}");
            }
            StatementKind::If {
                condition,
                body,
                else_ifs,
                else_body,
            } => {
                let _ = writeln!(out, "{pad}{name}{{");
                condition.write(out, symbols, indent + 2);
                let _ = write!(out, "{inner}Then{{");
                write_body(out, symbols, body, indent + 2);
                for arm in else_ifs {
                    let _ = writeln!(out, "{inner}ElseIf{{");
                    arm.condition.write(out, symbols, indent + 4);
                    let _ = write!(out, "{}Then{{", " ".repeat(indent + 4));
                    write_body(out, symbols, &arm.body, indent + 4);
                    let _ = writeln!(out, "{inner}}}");
                }
                if let Some(else_body) = else_body {
                    let _ = write!(out, "{inner}Else{{");
                    write_body(out, symbols, else_body, indent + 2);
                }
                let _ = writeln!(out, "{pad}}}");
            }
            StatementKind::Loop { body, continuing } => {
                let _ = write!(out, "{pad}{name}{{");
                if continuing.is_empty() {
                    write_body(out, symbols, body, indent);
                } else {
                    out.push('\n');
                    for stmt in body {
                        stmt.write(out, symbols, indent + 2);
                    }
                    let _ = write!(out, "{inner}Continuing{{");
                    write_body(out, symbols, continuing, indent + 2);
                    let _ = writeln!(out, "{pad}}}");
                }
            }
            StatementKind::Switch { selector, cases } => {
                let _ = writeln!(out, "{pad}{name}{{");
                selector.write(out, symbols, indent + 2);
                for case in cases {
                    case.write(out, symbols, indent + 2);
                }
                let _ = writeln!(out, "{pad}}}");
            }
            StatementKind::Call { function, args } => {
                let _ = write!(out, "{pad}{name} {}{{", symbols.name(*function));
                if args.is_empty() {
                    out.push_str("}\n");
                } else {
                    out.push('\n');
                    for arg in args {
                        arg.write(out, symbols, indent + 2);
                    }
                    let _ = writeln!(out, "{pad}}}");
                }
            }
            StatementKind::Block(body) => {
                let _ = write!(out, "{pad}{name}{{");
                write_body(out, symbols, body, indent);
            }
        }
    }
}

/// Writes `}` directly after an opening brace for an empty body, otherwise
/// the statements on their own lines and a closing brace at `indent`.
fn write_body(out: &mut String, symbols: &SymbolTable, body: &[Statement], indent: usize) {
    if body.is_empty() {
        out.push_str("}\n");
        return;
    }
    out.push('\n');
    for stmt in body {
        stmt.write(out, symbols, indent + 2);
    }
    let _ = writeln!(out, "{}}}", " ".repeat(indent));
}
