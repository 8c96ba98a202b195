//! Integration tests for the WGSL front end.

use spindle_ir::{
    AccessMode, Binding, BuiltIn, Function, Module, Op, PipelineStage, StorageClass, dump_module,
};
use spindle_parser::{ParseError, parse};

fn function<'m>(module: &'m Module, name: &str) -> &'m Function {
    let handle = module
        .function_by_name(name)
        .unwrap_or_else(|| panic!("no function `{name}`"));
    &module.functions[handle]
}

fn count_ops(function: &Function, pred: impl Fn(&Op) -> bool) -> usize {
    function
        .instructions
        .iter()
        .filter(|(_, inst)| pred(&inst.op))
        .count()
}

#[test]
fn parse_vecadd() {
    let source = include_str!("../../../shaders/vecadd.wgsl");
    let module = parse(source).expect("vecadd should parse");
    assert!(module.is_sealed());

    assert_eq!(module.global_variables.len(), 3);
    let result = module.global_by_name("result").unwrap();
    let result = &module.global_variables[result];
    assert_eq!(result.space, StorageClass::Storage);
    assert_eq!(result.access(&module.types), AccessMode::ReadWrite);
    let a = &module.global_variables[module.global_by_name("a").unwrap()];
    assert_eq!(a.access(&module.types), AccessMode::Read);

    let (_, main) = module.entry_points().next().unwrap();
    assert_eq!(main.name, "main");
    assert_eq!(
        main.stage,
        Some(PipelineStage::Compute {
            workgroup_size: [256, 1, 1]
        })
    );
    assert_eq!(
        main.parameters[0].binding,
        Some(Binding::BuiltIn(BuiltIn::GlobalInvocationId))
    );

    assert_eq!(count_ops(main, |op| matches!(op, Op::Extract { .. })), 1);
    assert_eq!(count_ops(main, |op| matches!(op, Op::Load { .. })), 2);
    assert_eq!(count_ops(main, |op| matches!(op, Op::Store { .. })), 1);
    assert_eq!(count_ops(main, |op| matches!(op, Op::AccessChain { .. })), 3);

    let dump = dump_module(&module);
    assert!(dump.contains("Extract{__u32 %0 0}"), "{dump}");
    assert!(dump.contains("AccessChain{__ptr_storage__f32_read_write @result"));
}

#[test]
fn parse_vertex_and_fragment_stages() {
    let source = include_str!("../../../shaders/camera.wgsl");
    let module = parse(source).expect("camera should parse");

    let camera = module.global_by_name("camera").unwrap();
    assert_eq!(module.global_variables[camera].space, StorageClass::Uniform);

    let dump = dump_module(&module);
    assert!(dump.starts_with("Module{\n  Struct{Camera\n    view_proj __mat_4_4__f32 0\n  }\n"));
    assert!(dump.contains("Function{vs_main -> __vec_4__f32 @vertex builtin position\n"));
    assert!(dump.contains("Parameter{%0 __vec_4__f32 location 0}"));
    assert!(dump.contains("Function{fs_main -> __vec_4__f32 @fragment location 0\n"));

    let fs = function(&module, "fs_main");
    assert_eq!(
        count_ops(fs, |op| matches!(op, Op::Math { .. })),
        1,
        "{dump}"
    );
}

#[test]
fn parse_loops_calls_and_early_returns() {
    let source = include_str!("../../../shaders/prefix_sum.wgsl");
    let module = parse(source).expect("prefix_sum should parse");
    assert!(module.is_sealed());
    assert_eq!(module.functions.len(), 3);

    let main = function(&module, "main");
    assert_eq!(count_ops(main, |op| matches!(op, Op::Loop { .. })), 1);
    assert_eq!(count_ops(main, |op| matches!(op, Op::Call { .. })), 2);

    let clamp = function(&module, "clamp_index");
    assert_eq!(
        count_ops(clamp, |op| matches!(op, Op::Return { value: Some(_) })),
        2
    );
    assert_eq!(
        count_ops(clamp, |op| matches!(op, Op::CondBranch { merge: Some(_), .. })),
        1
    );
}

#[test]
fn break_if_closes_the_loop() {
    let source = "
fn count(n: u32) -> u32 {
    var total = 0u;
    var k = 0u;
    loop {
        total = total + k;
        continuing {
            k = k + 1u;
            break if k >= n;
        }
    }
    return total;
}
";
    let module = parse(source).unwrap();
    let count = function(&module, "count");
    let dump = spindle_ir::dump_function(&module, module.function_by_name("count").unwrap());
    assert_eq!(count_ops(count, |op| matches!(op, Op::Loop { .. })), 1, "{dump}");
    // The back edge is a conditional branch without a merge annotation.
    assert_eq!(
        count_ops(count, |op| matches!(op, Op::CondBranch { merge: None, .. })),
        1,
        "{dump}"
    );
}

#[test]
fn fall_through_selectors_share_one_case() {
    let source = "
@fragment
fn main(@location(0) @interpolate(flat) sel: i32) -> @location(0) vec4<f32> {
    switch sel {
        case 1, 2: {
            discard;
        }
        default: {}
    }
    return vec4<f32>(1.0);
}
";
    let module = parse(source).unwrap();
    let main = function(&module, "main");
    let (cases, default) = main
        .instructions
        .iter()
        .find_map(|(_, inst)| match inst.op {
            Op::Switch {
                ref cases, default, ..
            } => Some((cases.clone(), default)),
            _ => None,
        })
        .expect("switch");
    assert_eq!(cases.len(), 1);
    let names: Vec<String> = cases[0]
        .selectors
        .iter()
        .map(|&c| module.constants.name(&module.types, c))
        .collect();
    assert_eq!(names, ["__sint__i32_1", "__sint__i32_2"]);

    let target = cases[0].target;
    let in_target: Vec<&Op> = main
        .instructions
        .iter()
        .filter(|(_, inst)| inst.block == target)
        .map(|(_, inst)| &inst.op)
        .collect();
    assert_eq!(in_target, [&Op::Discard]);
    assert_ne!(default, target);
}

#[test]
fn let_bindings_add_no_instructions() {
    let source = "
fn id(x: f32) -> f32 {
    let y = x;
    return y;
}
";
    let module = parse(source).unwrap();
    let id = function(&module, "id");
    assert_eq!(id.instructions.len(), 1);
    assert!(matches!(
        id.instructions.iter().next().map(|(_, inst)| &inst.op),
        Some(Op::Return { value: Some(_) })
    ));
}

#[test]
fn storage_texture_type_names() {
    let source = "
@group(0) @binding(0) var out_tex: texture_storage_2d<rgba32float, write>;

@compute @workgroup_size(8, 8)
fn main() {}
";
    let module = parse(source).unwrap();
    let tex = &module.global_variables[module.global_by_name("out_tex").unwrap()];
    assert_eq!(tex.space, StorageClass::Handle);
    assert_eq!(
        module.types.type_name(tex.ty),
        "__storage_texture_write_only_2d_rgba32float"
    );
}

#[test]
fn syntax_errors_are_located() {
    let source = "fn main() {\n    let x = ;\n}\n";
    let err = parse(source).unwrap_err();
    assert!(matches!(err, ParseError::Wgsl(_)));
    let diag = err.diagnostic(source);
    assert_eq!(diag.source.begin.line, 2);
    assert!(!diag.message.is_empty());
}

#[test]
fn atomics_are_unsupported() {
    let source = "
var<workgroup> counter: atomic<u32>;

@compute @workgroup_size(1)
fn main() {}
";
    let err = parse(source).unwrap_err();
    assert!(matches!(err, ParseError::Unsupported(_)), "{err}");
    assert!(err.to_string().starts_with("unsupported: "));
}

#[test]
fn barriers_are_unsupported() {
    let source = "
@compute @workgroup_size(64)
fn main() {
    workgroupBarrier();
}
";
    let err = parse(source).unwrap_err();
    assert!(matches!(err, ParseError::Unsupported(_)), "{err}");
    assert_eq!(err.to_string(), "unsupported: barriers");
}
