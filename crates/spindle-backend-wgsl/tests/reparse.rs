//! Writer output must be accepted by an independent WGSL front end.

use spindle_backend_wgsl::write_module;
use spindle_ir::{
    AccessIndex, AccessMode, BinaryOp, Binding, BuiltIn, FunctionDecl, GlobalDecl, Literal,
    MathFunction, Module, PipelineStage, Scalar, StorageClass, SwitchCase, SwizzleComponent,
    UnaryOp,
};

fn reparse(module: &Module) -> naga::Module {
    let text = write_module(module).unwrap();
    match naga::front::wgsl::parse_str(&text) {
        Ok(parsed) => parsed,
        Err(e) => panic!("{}\n{text}", e.emit_to_string(&text)),
    }
}

#[test]
fn fragment_shader_with_uniform_struct() {
    let mut module = Module::new();
    let vec4 = module.types.vector(Scalar::F32, 4).unwrap();
    let f32_ty = module.types.f32();
    let params = module.types.declare_struct("Params").unwrap();
    let members = module
        .types
        .layout_members(vec![("tint".into(), vec4), ("scale".into(), f32_ty)])
        .unwrap();
    module.types.define_struct(params, members).unwrap();
    let global = module
        .add_global(GlobalDecl::new("params", StorageClass::Uniform, params).binding(1, 0))
        .unwrap();
    let main = module
        .add_function(
            FunctionDecl::new("fs_main", vec4)
                .parameter("position", vec4, Some(Binding::BuiltIn(BuiltIn::Position)))
                .stage(PipelineStage::Fragment)
                .result_binding(Binding::Location { location: 0 }),
        )
        .unwrap();
    {
        let mut b = module.builder(main).unwrap();
        let position = b.parameter(0).unwrap();
        let base = b.global(global).unwrap();
        let tint_ptr = b.access_chain(base, &[AccessIndex::Constant(0)]).unwrap();
        let tint = b.load(tint_ptr).unwrap();
        let scale_ptr = b.access_chain(base, &[AccessIndex::Constant(1)]).unwrap();
        let scale = b.load(scale_ptr).unwrap();
        let scaled = b.binary(BinaryOp::Multiply, tint, scale).unwrap();
        let color = b.binary(BinaryOp::Add, scaled, position).unwrap();
        let zero = b.literal(Literal::F32(0.0)).unwrap();
        let one = b.literal(Literal::F32(1.0)).unwrap();
        let lo = b.splat(4, zero).unwrap();
        let hi = b.splat(4, one).unwrap();
        let clamped = b.math(MathFunction::Clamp, &[color, lo, hi]).unwrap();
        let rgb = b
            .swizzle(
                clamped,
                &[SwizzleComponent::X, SwizzleComponent::Y, SwizzleComponent::Z],
            )
            .unwrap();
        let alpha = b.extract(clamped, &[3]).unwrap();
        let faded = b.binary(BinaryOp::Less, alpha, scale).unwrap();
        let kill = b.create_block().unwrap();
        let keep = b.create_block().unwrap();
        b.cond_branch(faded, kill, keep, Some(keep)).unwrap();
        b.set_block(kill).unwrap();
        b.discard().unwrap();
        b.set_block(keep).unwrap();
        let result = b.construct(vec4, &[rgb, one]).unwrap();
        b.ret(Some(result)).unwrap();
    }
    module.seal().unwrap();

    let parsed = reparse(&module);
    assert_eq!(parsed.entry_points.len(), 1);
    assert_eq!(parsed.entry_points[0].name, "fs_main");
    assert_eq!(parsed.entry_points[0].stage, naga::ShaderStage::Fragment);
}

#[test]
fn vertex_shader_with_flat_integer_output() {
    let mut module = Module::new();
    let u32_ty = module.types.u32();
    let i32_ty = module.types.i32();
    let f32_ty = module.types.f32();
    let main = module
        .add_function(
            FunctionDecl::new("vs_main", u32_ty)
                .parameter(
                    "index",
                    u32_ty,
                    Some(Binding::BuiltIn(BuiltIn::VertexIndex)),
                )
                .stage(PipelineStage::Vertex)
                .result_binding(Binding::Location { location: 1 }),
        )
        .unwrap();
    {
        let mut b = module.builder(main).unwrap();
        let index = b.parameter(0).unwrap();
        let signed = b.convert(index, i32_ty).unwrap();
        let negated = b.unary(UnaryOp::Negate, signed).unwrap();
        let as_float = b.convert(negated, f32_ty).unwrap();
        let bits = b.bitcast(as_float, u32_ty).unwrap();
        let mask = b.literal(Literal::U32(0xff)).unwrap();
        let masked = b.binary(BinaryOp::BitwiseAnd, bits, mask).unwrap();
        b.ret(Some(masked)).unwrap();
    }
    module.seal().unwrap();

    let text = write_module(&module).unwrap();
    assert!(text.contains("-> @location(1) @interpolate(flat) u32"), "{text}");
    reparse(&module);
}

#[test]
fn nested_loop_with_switch_and_continue() {
    let mut module = Module::new();
    let u32_ty = module.types.u32();
    let runtime = module.types.array(u32_ty, None).unwrap();
    let rw = module
        .types
        .access_controlled(runtime, AccessMode::ReadWrite)
        .unwrap();
    let data = module
        .add_global(GlobalDecl::new("data", StorageClass::Storage, rw).binding(0, 0))
        .unwrap();
    let void = module.types.void();
    let main = module
        .add_function(FunctionDecl::new("main", void).stage(PipelineStage::Compute {
            workgroup_size: [1, 1, 1],
        }))
        .unwrap();
    {
        let mut b = module.builder(main).unwrap();
        let zero = {
            let (types, constants) = b.interners();
            constants.literal(types, Literal::U32(0))
        };
        let i = b.local_variable(u32_ty, Some(zero)).unwrap();
        let header = b.create_block().unwrap();
        let body = b.create_block().unwrap();
        let exit = b.create_block().unwrap();
        let run = b.create_block().unwrap();
        let skip = b.create_block().unwrap();
        let write = b.create_block().unwrap();
        let switch_merge = b.create_block().unwrap();
        let continuing = b.create_block().unwrap();
        let merge = b.create_block().unwrap();
        b.branch(header).unwrap();

        b.set_block(header).unwrap();
        b.loop_header(body, continuing, merge).unwrap();

        // if i >= 8u { break; }
        b.set_block(body).unwrap();
        let iv = b.load(i).unwrap();
        let eight = b.literal(Literal::U32(8)).unwrap();
        let done = b.binary(BinaryOp::GreaterEqual, iv, eight).unwrap();
        b.cond_branch(done, exit, run, Some(run)).unwrap();
        b.set_block(exit).unwrap();
        b.branch(merge).unwrap();

        // switch i % 3u { case 0u: { continue; } case 1u: { data[i] = i; } default: {} }
        b.set_block(run).unwrap();
        let three = b.literal(Literal::U32(3)).unwrap();
        let rem = b.binary(BinaryOp::Modulo, iv, three).unwrap();
        let (c0, c1) = {
            let (types, constants) = b.interners();
            (
                constants.literal(types, Literal::U32(0)),
                constants.literal(types, Literal::U32(1)),
            )
        };
        b.switch(
            rem,
            vec![
                SwitchCase {
                    selectors: vec![c0],
                    target: skip,
                },
                SwitchCase {
                    selectors: vec![c1],
                    target: write,
                },
            ],
            switch_merge,
            Some(switch_merge),
        )
        .unwrap();
        b.set_block(skip).unwrap();
        b.branch(continuing).unwrap();
        b.set_block(write).unwrap();
        let buffer = b.global(data).unwrap();
        let slot = b.access_chain(buffer, &[AccessIndex::Dynamic(iv)]).unwrap();
        b.store(slot, iv).unwrap();
        b.branch(switch_merge).unwrap();
        b.set_block(switch_merge).unwrap();
        b.branch(continuing).unwrap();

        b.set_block(continuing).unwrap();
        let current = b.load(i).unwrap();
        let one = b.literal(Literal::U32(1)).unwrap();
        let next = b.binary(BinaryOp::Add, current, one).unwrap();
        b.store(i, next).unwrap();
        b.branch(header).unwrap();

        b.set_block(merge).unwrap();
        b.ret(None).unwrap();
    }
    module.seal().unwrap();

    let text = write_module(&module).unwrap();
    assert!(text.contains("continue;"), "{text}");
    assert!(text.contains("default: {}"), "{text}");
    assert!(text.contains("break;"), "{text}");
    reparse(&module);
}

#[test]
fn private_globals_keep_composite_initializers() {
    let mut module = Module::new();
    let vec2 = module.types.vector(Scalar::F32, 2).unwrap();
    let init = {
        let one = module
            .constants
            .literal(&mut module.types, Literal::F32(1.5));
        let quarter = module
            .constants
            .literal(&mut module.types, Literal::F32(-0.25));
        module
            .constants
            .composite(&module.types, vec2, vec![one, quarter])
            .unwrap()
    };
    module
        .add_global(GlobalDecl::new("offset", StorageClass::Private, vec2).init(init))
        .unwrap();
    let min = module
        .constants
        .literal(&mut module.types, Literal::I32(i32::MIN));
    let i32_ty = module.types.i32();
    module
        .add_global(GlobalDecl::new("lowest", StorageClass::Private, i32_ty).init(min))
        .unwrap();
    module.seal().unwrap();

    let text = write_module(&module).unwrap();
    assert!(
        text.contains("var<private> offset: vec2<f32> = vec2<f32>(1.5e0, -2.5e-1);"),
        "{text}"
    );
    assert!(text.contains("var<private> lowest: i32 = i32(-2147483648);"), "{text}");
    let parsed = reparse(&module);
    assert_eq!(parsed.global_variables.len(), 2);
}
