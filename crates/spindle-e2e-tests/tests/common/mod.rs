use spindle_backend_core::{Backend, BackendOptions, BackendOutput, OutputContent};
#[allow(unused_imports)]
use spindle_ir::Module;

/// Shader sources shipped in the repository's `shaders/` directory.
pub const SHADERS: &[&str] = &["vecadd", "prefix_sum", "camera"];

/// Load a shader by name (without extension).
#[allow(dead_code)]
pub fn load_shader(name: &str) -> String {
    let path = format!("{}/../../shaders/{name}.wgsl", env!("CARGO_MANIFEST_DIR"));
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("failed to load {path}: {e}"))
}

/// Parse WGSL to Module.
#[allow(dead_code)]
pub fn parse_wgsl(source: &str) -> Module {
    spindle_parser::parse(source).unwrap_or_else(|e| {
        panic!("WGSL parse failed:\n{}", e.diagnostic(source).render("<test>", source))
    })
}

/// Parse WGSL source and compile it with the backend.
#[allow(dead_code)]
pub fn compile_wgsl(source: &str, backend: &dyn Backend) -> BackendOutput {
    let module = parse_wgsl(source);
    backend
        .compile(&module, &BackendOptions::default())
        .expect("backend compilation failed")
}

/// Extract the first binary output from a `BackendOutput`.
#[allow(dead_code)]
pub fn first_binary(output: &BackendOutput) -> &[u8] {
    match &output.files[0].content {
        OutputContent::Binary(b) => b,
        OutputContent::Text(_) => panic!("expected binary output, got text"),
    }
}

/// Extract the first text output from a `BackendOutput`.
#[allow(dead_code)]
pub fn first_text(output: &BackendOutput) -> &str {
    match &output.files[0].content {
        OutputContent::Text(t) => t,
        OutputContent::Binary(_) => panic!("expected text output, got binary"),
    }
}

/// Re-parse WGSL text with naga, panicking with a rendered error.
#[allow(dead_code)]
pub fn naga_parse(text: &str) -> naga::Module {
    naga::front::wgsl::parse_str(text)
        .unwrap_or_else(|e| panic!("{}\n{text}", e.emit_to_string(text)))
}

#[allow(dead_code)]
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
