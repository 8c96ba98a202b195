#![no_main]

use libfuzzer_sys::fuzz_target;
use spindle_backend_core::BackendOptions;

fuzz_target!(|data: &[u8]| {
    if let Ok(source) = std::str::from_utf8(data) {
        // Parsing, lowering and both writers should never panic.
        if let Ok(module) = spindle_parser::parse(source) {
            let _ = spindle_backend_spirv::write_module(&module, &BackendOptions::default());
            let _ = spindle_backend_wgsl::write_module(&module);
        }
    }
});
