mod common;

use spindle_backend_core::{Backend, BackendOptions};
use spindle_backend_spirv::{SpirvBackend, read_bytes};
use spindle_ir::dump_module;

#[test]
fn shaders_round_trip_through_spirv() {
    common::init_logging();
    for name in common::SHADERS {
        let module = common::parse_wgsl(&common::load_shader(name));
        let output = SpirvBackend
            .compile(&module, &BackendOptions::default())
            .unwrap_or_else(|e| panic!("{name}: {e}"));
        let back = read_bytes(common::first_binary(&output))
            .unwrap_or_else(|e| panic!("{name}: {e}"));
        assert_eq!(dump_module(&back), dump_module(&module), "{name}");
    }
}

#[test]
fn round_trip_holds_for_every_version() {
    let module = common::parse_wgsl(&common::load_shader("prefix_sum"));
    for minor in 0..=6 {
        let opts = BackendOptions {
            spirv_version: (1, minor),
            ..Default::default()
        };
        let output = SpirvBackend.compile(&module, &opts).unwrap();
        let bytes = common::first_binary(&output);
        // Version word: 0x00MMmm00.
        assert_eq!(bytes[4..8], [0, minor, 1, 0]);
        let back = read_bytes(bytes).unwrap();
        assert_eq!(dump_module(&back), dump_module(&module), "1.{minor}");
    }
}

#[test]
fn unfolded_modules_round_trip() {
    let source = common::load_shader("camera");
    let module =
        spindle_parser::parse_with_options(&source, spindle_ir::BuildOptions::verbatim())
            .unwrap();
    let output = SpirvBackend
        .compile(&module, &BackendOptions::default())
        .unwrap();
    let back = read_bytes(common::first_binary(&output)).unwrap();
    assert_eq!(dump_module(&back), dump_module(&module));
}

#[test]
fn compiling_in_parallel_matches_sequential_output() {
    let modules: Vec<_> = common::SHADERS
        .iter()
        .map(|name| common::parse_wgsl(&common::load_shader(name)))
        .collect();
    let sequential: Vec<Vec<u8>> = modules
        .iter()
        .map(|m| {
            let output = SpirvBackend.compile(m, &BackendOptions::default()).unwrap();
            common::first_binary(&output).to_vec()
        })
        .collect();

    let backend: &dyn Backend = &SpirvBackend;
    let parallel: Vec<Vec<u8>> = std::thread::scope(|scope| {
        let handles: Vec<_> = modules
            .iter()
            .map(|m| {
                scope.spawn(move || {
                    let output = backend.compile(m, &BackendOptions::default()).unwrap();
                    common::first_binary(&output).to_vec()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert_eq!(parallel, sequential);
}
