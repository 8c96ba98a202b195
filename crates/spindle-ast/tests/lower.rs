//! Integration tests: build programs by hand, lower them and inspect the IR.

use spindle_ast::{
    CaseStatement, Expression, ExpressionKind, FunctionDecl, GlobalDecl, Literal, LowerError,
    LowerOptions, Program, Source, Statement, StatementKind, StructDecl, StructMemberDecl,
    TypeDecl, VariableDecl, lower,
};
use spindle_ir::{
    BinaryOp, Function, Module, Op, PipelineStage, StorageClass, Type, dump_function,
};

fn at(line: u32) -> Source {
    Source::at(line, 1)
}

fn stmt(kind: StatementKind, line: u32) -> Statement {
    Statement::new(kind, at(line))
}

fn function(name: spindle_ast::Symbol, return_type: TypeDecl, body: Vec<Statement>) -> FunctionDecl {
    FunctionDecl {
        name,
        params: Vec::new(),
        return_type,
        return_binding: None,
        stage: None,
        body,
        source: at(1),
    }
}

fn let_decl(name: spindle_ast::Symbol, init: Expression, line: u32) -> Statement {
    stmt(
        StatementKind::VariableDecl(VariableDecl {
            name,
            is_const: true,
            ty: None,
            init: Some(init),
        }),
        line,
    )
}

fn only_function(module: &Module) -> &Function {
    let (_, function) = module.functions.iter().next().expect("one function");
    function
}

fn count_ops(function: &Function, pred: impl Fn(&Op) -> bool) -> usize {
    function
        .instructions
        .iter()
        .filter(|(_, inst)| pred(&inst.op))
        .count()
}

#[test]
fn let_of_constant_adds_no_instructions() {
    // fn f() -> vec2<f32> { let x = vec2<f32>(1.0, 2.0); let y = x; return y; }
    let mut program = Program::new();
    let f = program.symbols.register("f");
    let x = program.symbols.register("x");
    let y = program.symbols.register("y");
    let vec2 = TypeDecl::vector(2, TypeDecl::F32);
    let init = Expression::new(
        ExpressionKind::TypeConstructor {
            ty: vec2.clone(),
            values: vec![
                Expression::literal(Literal::Float(1.0), at(2)),
                Expression::literal(Literal::Float(2.0), at(2)),
            ],
        },
        at(2),
    );
    program.functions.push(function(
        f,
        vec2,
        vec![
            let_decl(x, init, 2),
            let_decl(y, Expression::identifier(x, at(3)), 3),
            stmt(
                StatementKind::Return(Some(Expression::identifier(y, at(4)))),
                4,
            ),
        ],
    ));

    let module = lower(&program, &LowerOptions::default()).unwrap();
    assert!(module.is_sealed());
    let func = only_function(&module);
    assert_eq!(func.instructions.len(), 1);
    let dump = dump_function(&module, module.function_by_name("f").unwrap());
    assert!(
        dump.contains("Return{__composite__vec_2__f32(__float1.0, __float2.0)}"),
        "{dump}"
    );
}

#[test]
fn let_of_computed_value_aliases_it() {
    // fn f(p: f32) -> f32 { let x = p * 2.0; let y = x; return y; }
    let mut program = Program::new();
    let f = program.symbols.register("f");
    let p = program.symbols.register("p");
    let x = program.symbols.register("x");
    let y = program.symbols.register("y");
    let product = Expression::binary(
        BinaryOp::Multiply,
        Expression::identifier(p, at(2)),
        Expression::literal(Literal::Float(2.0), at(2)),
        at(2),
    );
    let mut decl = function(
        f,
        TypeDecl::F32,
        vec![
            let_decl(x, product, 2),
            let_decl(y, Expression::identifier(x, at(3)), 3),
            stmt(
                StatementKind::Return(Some(Expression::identifier(y, at(4)))),
                4,
            ),
        ],
    );
    decl.params.push(spindle_ast::ParameterDecl {
        name: p,
        ty: TypeDecl::F32,
        binding: None,
        source: at(1),
    });
    program.functions.push(decl);

    let module = lower(&program, &LowerOptions::default()).unwrap();
    let func = only_function(&module);
    assert_eq!(func.instructions.len(), 2);
    let product = func
        .instructions
        .iter()
        .find_map(|(_, inst)| match inst.op {
            Op::Binary { .. } => inst.result,
            _ => None,
        })
        .expect("a multiply");
    let returned = func
        .instructions
        .iter()
        .find_map(|(_, inst)| match inst.op {
            Op::Return { value } => value,
            _ => None,
        })
        .expect("a returned value");
    assert_eq!(returned, product);
}

#[test]
fn struct_past_the_address_limit_is_rejected() {
    // struct Far { @offset(0xfffffff0) v: vec4<f32>, w: f32 }
    let mut program = Program::new();
    let far = program.symbols.register("Far");
    let v = program.symbols.register("v");
    let w = program.symbols.register("w");
    program.structs.push(StructDecl {
        name: far,
        members: vec![
            StructMemberDecl {
                name: v,
                ty: TypeDecl::vector(4, TypeDecl::F32),
                offset: Some(0xFFFF_FFF0),
                source: at(2),
            },
            StructMemberDecl {
                name: w,
                ty: TypeDecl::F32,
                offset: None,
                source: at(3),
            },
        ],
        source: at(1),
    });

    match lower(&program, &LowerOptions::default()) {
        Err(LowerError::Located { message, location }) => {
            assert!(message.contains("member `v`"), "{message}");
            assert_eq!(location.begin.line, 2);
        }
        other => panic!("expected a located error, got {other:?}"),
    }
}

#[test]
fn shared_case_lowers_to_one_target() {
    // fn f(s: i32) { switch s { case 1, 2: { discard; } default: {} } }
    let mut program = Program::new();
    let f = program.symbols.register("f");
    let s = program.symbols.register("s");
    let case = CaseStatement::new(
        vec![Literal::Sint(1), Literal::Sint(2)],
        vec![stmt(StatementKind::Discard, 3)],
        at(3),
    );
    assert_eq!(
        case.to_str(&program.symbols),
        "Case 1, 2{\n  Discard{}\n}\n"
    );
    let mut decl = function(
        f,
        TypeDecl::Void,
        vec![stmt(
            StatementKind::Switch {
                selector: Expression::identifier(s, at(2)),
                cases: vec![case, CaseStatement::new(Vec::new(), Vec::new(), at(4))],
            },
            2,
        )],
    );
    decl.params.push(spindle_ast::ParameterDecl {
        name: s,
        ty: TypeDecl::I32,
        binding: None,
        source: at(1),
    });
    program.functions.push(decl);

    let module = lower(&program, &LowerOptions::default()).unwrap();
    let func = only_function(&module);
    let (cases, default) = func
        .instructions
        .iter()
        .find_map(|(_, inst)| match &inst.op {
            Op::Switch { cases, default, .. } => Some((cases.clone(), *default)),
            _ => None,
        })
        .expect("a switch");
    assert_eq!(cases.len(), 1);
    let names: Vec<String> = cases[0]
        .selectors
        .iter()
        .map(|&c| module.constants.name(&module.types, c))
        .collect();
    assert_eq!(names, ["__sint__i32_1", "__sint__i32_2"]);
    let target = &func.blocks[cases[0].target];
    let ops: Vec<&Op> = target
        .instructions
        .iter()
        .map(|&i| &func.instructions[i].op)
        .collect();
    assert_eq!(ops, [&Op::Discard]);
    assert_ne!(default, cases[0].target);
}

#[test]
fn missing_expression_is_reported_before_lowering() {
    let mut program = Program::new();
    let f = program.symbols.register("f");
    let a = program.symbols.register("a");
    let b = program.symbols.register("b");
    let accessor = Expression::array_accessor(
        Expression::identifier(a, at(2)),
        Expression::missing(at(2)),
        at(2),
    );
    program.functions.push(function(
        f,
        TypeDecl::Void,
        vec![
            let_decl(a, Expression::literal(Literal::Sint(1), at(1)), 1),
            let_decl(b, accessor, 2),
        ],
    ));

    match lower(&program, &LowerOptions::default()) {
        Err(LowerError::Invalid(diags)) => {
            assert!(diags.has_errors());
            assert!(diags.to_string().contains("missing expression"), "{diags}");
        }
        other => panic!("expected validation errors, got {other:?}"),
    }
}

#[test]
fn struct_offsets_follow_layout_and_explicit_offsets() {
    // struct S { a: f32, b: vec3<f32>, @offset(32) c: f32, d: f32 }
    let mut program = Program::new();
    let s = program.symbols.register("S");
    let member = |name: &str, ty: TypeDecl, offset: Option<u32>, program: &mut Program| {
        StructMemberDecl {
            name: program.symbols.register(name),
            ty,
            offset,
            source: at(2),
        }
    };
    let members = vec![
        member("a", TypeDecl::F32, None, &mut program),
        member("b", TypeDecl::vector(3, TypeDecl::F32), None, &mut program),
        member("c", TypeDecl::F32, Some(32), &mut program),
        member("d", TypeDecl::F32, None, &mut program),
    ];
    program.structs.push(StructDecl {
        name: s,
        members,
        source: at(1),
    });

    let module = lower(&program, &LowerOptions::default()).unwrap();
    let st = module
        .types
        .iter()
        .find_map(|(_, ty)| match ty {
            Type::Struct(st) if st.name == "S" => Some(st.clone()),
            _ => None,
        })
        .expect("struct S");
    let offsets: Vec<u32> = st.members.iter().map(|m| m.offset).collect();
    assert_eq!(offsets, [0, 16, 32, 36]);
}

#[test]
fn nested_structs_are_defined_in_dependency_order() {
    // struct Outer { inner: Inner } declared before struct Inner { v: f32 }
    let mut program = Program::new();
    let outer = program.symbols.register("Outer");
    let inner = program.symbols.register("Inner");
    let field = program.symbols.register("inner");
    let v = program.symbols.register("v");
    program.structs.push(StructDecl {
        name: outer,
        members: vec![StructMemberDecl {
            name: field,
            ty: TypeDecl::Named(inner),
            offset: None,
            source: at(2),
        }],
        source: at(1),
    });
    program.structs.push(StructDecl {
        name: inner,
        members: vec![StructMemberDecl {
            name: v,
            ty: TypeDecl::F32,
            offset: None,
            source: at(5),
        }],
        source: at(4),
    });

    let module = lower(&program, &LowerOptions::default()).unwrap();
    let defined = module
        .types
        .iter()
        .filter(|(_, ty)| matches!(ty, Type::Struct(st) if st.is_defined()))
        .count();
    assert_eq!(defined, 2);
}

#[test]
fn loop_with_var_break_and_continue_seals() {
    // fn f() -> i32 {
    //     var i = 0;
    //     loop {
    //         if i > 4 { break; }
    //         if i == 2 { continue; }
    //         continuing { i = i + 1; }
    //     }
    //     return i;
    // }
    let mut program = Program::new();
    let f = program.symbols.register("f");
    let i = program.symbols.register("i");
    let ident = |line| Expression::identifier(i, at(line));
    let int = |v, line| Expression::literal(Literal::Sint(v), at(line));
    let if_then = |cond: Expression, kind: StatementKind, line| {
        stmt(
            StatementKind::If {
                condition: cond,
                body: vec![stmt(kind, line)],
                else_ifs: Vec::new(),
                else_body: None,
            },
            line,
        )
    };
    let body = vec![
        stmt(
            StatementKind::VariableDecl(VariableDecl {
                name: i,
                is_const: false,
                ty: None,
                init: Some(int(0, 2)),
            }),
            2,
        ),
        stmt(
            StatementKind::Loop {
                body: vec![
                    if_then(
                        Expression::binary(BinaryOp::Greater, ident(4), int(4, 4), at(4)),
                        StatementKind::Break,
                        4,
                    ),
                    if_then(
                        Expression::binary(BinaryOp::Equal, ident(5), int(2, 5), at(5)),
                        StatementKind::Continue,
                        5,
                    ),
                ],
                continuing: vec![stmt(
                    StatementKind::Assign {
                        lhs: ident(6),
                        rhs: Expression::binary(BinaryOp::Add, ident(6), int(1, 6), at(6)),
                    },
                    6,
                )],
            },
            3,
        ),
        stmt(StatementKind::Return(Some(ident(8))), 8),
    ];
    program.functions.push(function(f, TypeDecl::I32, body));

    let module = lower(&program, &LowerOptions::default()).unwrap();
    let func = only_function(&module);
    assert_eq!(count_ops(func, |op| matches!(op, Op::Loop { .. })), 1);
    assert_eq!(count_ops(func, |op| matches!(op, Op::Variable { .. })), 1);
    assert_eq!(count_ops(func, |op| matches!(op, Op::Store { .. })), 1);
    assert_eq!(
        count_ops(func, |op| matches!(op, Op::Return { value: Some(_) })),
        1
    );

    // The store carries the line of the assignment.
    let store = func
        .instructions
        .iter()
        .find(|(_, inst)| matches!(inst.op, Op::Store { .. }))
        .map(|(_, inst)| inst.source)
        .unwrap();
    assert_eq!(store.unwrap().begin.line, 6);
}

#[test]
fn storage_globals_and_entry_points() {
    // @group(0) @binding(0) var<storage, read_write> data: array<u32>;
    // @compute @workgroup_size(64) fn main() { data[0] = 7u; }
    let mut program = Program::new();
    let data = program.symbols.register("data");
    let main = program.symbols.register("main");
    let mut global = GlobalDecl::private(data, TypeDecl::array(TypeDecl::U32, None), at(1));
    global.class = Some(StorageClass::Storage);
    global.access = Some(spindle_ir::AccessMode::ReadWrite);
    global.binding = Some((0, 0));
    program.globals.push(global);
    let mut decl = function(
        main,
        TypeDecl::Void,
        vec![stmt(
            StatementKind::Assign {
                lhs: Expression::array_accessor(
                    Expression::identifier(data, at(3)),
                    Expression::literal(Literal::Sint(0), at(3)),
                    at(3),
                ),
                rhs: Expression::literal(Literal::Uint(7), at(3)),
            },
            3,
        )],
    );
    decl.stage = Some(PipelineStage::Compute {
        workgroup_size: [64, 1, 1],
    });
    program.functions.push(decl);

    let module = lower(&program, &LowerOptions::default()).unwrap();
    let handle = module.global_by_name("data").unwrap();
    let global = &module.global_variables[handle];
    assert_eq!(
        global.access(&module.types),
        spindle_ir::AccessMode::ReadWrite
    );
    assert_eq!(module.types.type_name(global.ty), "__access_control_read_write__array__u32");
    let (_, entry) = module.entry_points().next().unwrap();
    assert_eq!(entry.name, "main");
    let func = only_function(&module);
    assert_eq!(count_ops(func, |op| matches!(op, Op::AccessChain { .. })), 1);
    assert_eq!(count_ops(func, |op| matches!(op, Op::Store { .. })), 1);
}

#[test]
fn nesting_limit_is_enforced() {
    let mut program = Program::new();
    let f = program.symbols.register("f");
    let mut body = vec![stmt(StatementKind::Discard, 1)];
    for line in 0..6 {
        body = vec![stmt(StatementKind::Block(body), line + 2)];
    }
    program.functions.push(function(f, TypeDecl::Void, body));

    let options = LowerOptions {
        max_nesting_depth: 3,
        ..LowerOptions::default()
    };
    let err = lower(&program, &options).unwrap_err();
    assert!(err.to_string().contains("nesting too deep"), "{err}");
    assert!(err.diagnostics().has_errors());
}

#[test]
fn assigning_to_a_let_fails_with_location() {
    let mut program = Program::new();
    let f = program.symbols.register("f");
    let x = program.symbols.register("x");
    program.functions.push(function(
        f,
        TypeDecl::Void,
        vec![
            let_decl(x, Expression::literal(Literal::Sint(1), at(2)), 2),
            stmt(
                StatementKind::Assign {
                    lhs: Expression::identifier(x, at(3)),
                    rhs: Expression::literal(Literal::Sint(2), at(3)),
                },
                3,
            ),
        ],
    ));

    match lower(&program, &LowerOptions::default()) {
        Err(LowerError::Located { message, location }) => {
            assert_eq!(message, "cannot assign to a value");
            assert_eq!(location.begin.line, 3);
        }
        other => panic!("expected a located error, got {other:?}"),
    }
}
