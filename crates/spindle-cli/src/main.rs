use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use miette::{Context, IntoDiagnostic};

use spindle_backend_core::{BackendOptions, BackendRegistry, OutputContent};
use spindle_ir::{BuildOptions, Module};

/// Spindle: WGSL and SPIR-V shader compiler
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Input file: WGSL source, or a SPIR-V binary when it ends in `.spv`
    input: PathBuf,

    /// Target backend (default: ir-dump)
    #[arg(short, long, default_value = "ir-dump")]
    target: String,

    /// Output path (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Dump IR to stderr before backend compilation
    #[arg(long)]
    emit_ir: bool,

    /// Parse and build the IR without producing output
    #[arg(long)]
    dry_run: bool,

    /// Do not fold arithmetic on constants while building the IR
    #[arg(long)]
    no_fold: bool,

    /// Do not reuse identical instructions and constants
    #[arg(long)]
    no_dedup: bool,

    /// SPIR-V version to emit, as MAJOR.MINOR
    #[arg(long, default_value = "1.3", value_parser = parse_spirv_version)]
    spirv_version: (u8, u8),

    /// Leave debug names out of SPIR-V output
    #[arg(long)]
    no_debug_names: bool,
}

fn parse_spirv_version(s: &str) -> Result<(u8, u8), String> {
    let invalid = || format!("invalid SPIR-V version '{s}', expected 1.0 through 1.6");
    let (major, minor) = s.split_once('.').ok_or_else(invalid)?;
    let major: u8 = major.parse().map_err(|_| invalid())?;
    let minor: u8 = minor.parse().map_err(|_| invalid())?;
    if major != 1 || minor > 6 {
        return Err(invalid());
    }
    Ok((major, minor))
}

fn main() -> ExitCode {
    env_logger::init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

fn registry() -> BackendRegistry {
    let mut registry = BackendRegistry::with_builtins();
    registry.register(Box::new(spindle_backend_spirv::SpirvBackend));
    registry.register(Box::new(spindle_backend_wgsl::WgslBackend));
    registry
}

fn is_spirv(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "spv")
}

fn load(cli: &Cli) -> miette::Result<Module> {
    let file = cli.input.display().to_string();

    if is_spirv(&cli.input) {
        let bytes = std::fs::read(&cli.input)
            .into_diagnostic()
            .wrap_err_with(|| format!("failed to read {file}"))?;
        return spindle_backend_spirv::read_bytes(&bytes)
            .map_err(|e| miette::miette!("{e}"))
            .wrap_err_with(|| format!("{file}: SPIR-V read failed"));
    }

    let source = std::fs::read_to_string(&cli.input)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to read {file}"))?;
    let options = BuildOptions {
        fold_constants: !cli.no_fold,
        deduplicate: !cli.no_dedup,
    };
    spindle_parser::parse_with_options(&source, options)
        .map_err(|e| {
            let rendered = e.diagnostic(&source).render(&file, &source);
            miette::miette!("{}", rendered.trim_end())
        })
        .wrap_err("WGSL parse failed")
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();

    // 1. Read and parse the input.
    let module = load(&cli)?;
    log::info!(
        "loaded {} function(s), {} global(s)",
        module.functions.len(),
        module.global_variables.len()
    );

    // 2. Optionally dump IR to stderr.
    if cli.emit_ir {
        eprintln!("{}", spindle_ir::dump_module(&module));
    }

    // 3. Dry-run: stop here.
    if cli.dry_run {
        return Ok(());
    }

    // 4. Backend dispatch.
    let registry = registry();
    let backend = registry.find(&cli.target).ok_or_else(|| {
        let available = registry.list_targets().join(", ");
        miette::miette!("unknown target '{}' (available: {})", cli.target, available)
    })?;

    let opts = BackendOptions {
        spirv_version: cli.spirv_version,
        emit_debug_names: !cli.no_debug_names,
    };
    log::debug!("compiling with {} using {opts}", backend.name());

    let output = backend
        .compile(&module, &opts)
        .map_err(|e| miette::miette!("{e}"))
        .wrap_err("backend compilation failed")?;

    // 5. Print diagnostics.
    for diag in &output.diagnostics {
        eprintln!("{diag}");
    }

    // 6. Write output.
    for file in &output.files {
        match (&cli.output, &file.content) {
            (Some(path), OutputContent::Text(text)) => {
                std::fs::write(path, text)
                    .into_diagnostic()
                    .wrap_err_with(|| format!("failed to write {}", path.display()))?;
            }
            (Some(path), OutputContent::Binary(data)) => {
                std::fs::write(path, data)
                    .into_diagnostic()
                    .wrap_err_with(|| format!("failed to write {}", path.display()))?;
            }
            (None, OutputContent::Text(text)) => {
                print!("{text}");
            }
            (None, OutputContent::Binary(_)) => {
                return Err(miette::miette!(
                    "backend produced binary output but no --output path was specified"
                ));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spirv_version_flag() {
        assert_eq!(parse_spirv_version("1.3"), Ok((1, 3)));
        assert_eq!(parse_spirv_version("1.6"), Ok((1, 6)));
        assert!(parse_spirv_version("2.0").is_err());
        assert!(parse_spirv_version("1.7").is_err());
        assert!(parse_spirv_version("13").is_err());
    }

    #[test]
    fn every_target_is_registered() {
        let registry = registry();
        for target in ["ir-dump", "ir", "spirv", "spv", "wgsl"] {
            assert!(registry.find(target).is_some(), "missing {target}");
        }
        assert!(registry.find("onnx").is_none());
    }

    #[test]
    fn flags_parse() {
        let cli = Cli::try_parse_from([
            "spindle",
            "shader.wgsl",
            "--target",
            "spirv",
            "-o",
            "out.spv",
            "--no-fold",
            "--no-dedup",
            "--spirv-version",
            "1.5",
        ])
        .unwrap();
        assert_eq!(cli.target, "spirv");
        assert!(cli.no_fold && cli.no_dedup && !cli.dry_run);
        assert_eq!(cli.spirv_version, (1, 5));
        assert!(!is_spirv(&cli.input));
        assert!(is_spirv(Path::new("module.spv")));
    }
}
