#![no_main]

use libfuzzer_sys::fuzz_target;
use spindle_backend_core::BackendOptions;

fuzz_target!(|data: &[u8]| {
    // Arbitrary words must be rejected with an error, never a panic, and
    // anything accepted must be writable again.
    if let Ok(module) = spindle_backend_spirv::read_bytes(data) {
        let _ = spindle_ir::dump_module(&module);
        let _ = spindle_backend_spirv::write_module(&module, &BackendOptions::default());
    }
});
