mod common;

use spindle_backend_core::{Backend, BackendOptions};
use spindle_backend_spirv::{SpirvBackend, read_bytes};
use spindle_backend_wgsl::{WgslBackend, write_module};
use spindle_ir::dump_module;

#[test]
fn shaders_print_as_valid_wgsl() {
    common::init_logging();
    for name in common::SHADERS {
        let output = common::compile_wgsl(&common::load_shader(name), &WgslBackend);
        assert_eq!(output.files[0].name, "module.wgsl");
        let parsed = common::naga_parse(common::first_text(&output));
        assert!(!parsed.entry_points.is_empty(), "{name}");
    }
}

#[test]
fn printed_wgsl_parses_back_to_the_same_ir() {
    for name in common::SHADERS {
        let module = common::parse_wgsl(&common::load_shader(name));
        let text = write_module(&module).unwrap();
        let again = common::parse_wgsl(&text);
        assert_eq!(dump_module(&again), dump_module(&module), "{name}\n{text}");
    }
}

#[test]
fn spirv_binaries_print_as_wgsl() {
    for name in common::SHADERS {
        let module = common::parse_wgsl(&common::load_shader(name));
        let output = SpirvBackend
            .compile(&module, &BackendOptions::default())
            .unwrap();
        let back = read_bytes(common::first_binary(&output)).unwrap();
        let text = write_module(&back).unwrap();
        common::naga_parse(&text);
    }
}

#[test]
fn vecadd_reads_like_the_source() {
    let output = common::compile_wgsl(&common::load_shader("vecadd"), &WgslBackend);
    let text = common::first_text(&output);
    assert!(text.contains("var<storage, read> a: array<f32>;"), "{text}");
    assert!(text.contains("var<storage, read_write> result: array<f32>;"), "{text}");
    assert!(text.contains("@compute @workgroup_size(256, 1, 1)"), "{text}");
    assert!(
        text.contains("fn main(@builtin(global_invocation_id) gid: vec3<u32>) {"),
        "{text}"
    );
    assert!(text.contains("let i = gid.x;"), "{text}");
}

#[test]
fn control_flow_survives_printing() {
    let source = "
fn pick(x: i32) -> f32 {
    var acc = 0.5;
    loop {
        if x > 3 {
            acc = acc * 2.0;
        } else {
            acc = acc + 1.0;
        }
        switch x {
            case 1, 2: {
                acc = -acc;
            }
            default: {
                break;
            }
        }
        continuing {
            break if acc > 100.0;
        }
    }
    return acc;
}

@compute @workgroup_size(1)
fn main() {
    _ = pick(2);
}
";
    let module = common::parse_wgsl(source);
    let text = write_module(&module).unwrap();
    assert!(text.contains("loop {"), "{text}");
    assert!(text.contains("} else {"), "{text}");
    assert!(text.contains("case 1i, 2i: {"), "{text}");
    assert!(text.contains("break if "), "{text}");
    common::naga_parse(&text);
    let again = common::parse_wgsl(&text);
    assert_eq!(dump_module(&again), dump_module(&module), "{text}");
}
