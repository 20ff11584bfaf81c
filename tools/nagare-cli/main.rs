use clap::Parser;
use std::fs;
use std::time::Instant;

use nagare::diagnostic::Diagnostic;
use nagare::prelude::*;
use nagare::program::CompiledProgram;

/// A flow-graph compiler CLI.
///
/// Reads an editor-format flow JSON file, validates it, and emits
/// flow-script source. Diagnostics go to stderr, generated code to stdout,
/// so the output can be piped straight into an executor request.
#[derive(Parser, Debug)]
#[command(name = "nagare-cli", version, about, long_about = None)]
struct Cli {
    /// Path to the flow JSON file
    flow_path: String,

    /// Program name embedded in the generated script (defaults to the file stem)
    #[arg(short, long)]
    name: Option<String>,

    /// Validate only; print the report and exit non-zero on errors
    #[arg(long)]
    check: bool,

    /// Print the detected flow variables as JSON and exit
    #[arg(long)]
    variables: bool,

    /// Print the full compile output (code plus diagnostics) as JSON
    #[arg(long)]
    json: bool,

    /// Write a binary program artifact to this path after a successful compile
    #[arg(short, long)]
    artifact: Option<String>,
}

fn main() {
    let cli = Cli::parse();

    let flow_json = fs::read_to_string(&cli.flow_path).unwrap_or_else(|e| {
        exit_with_error(&format!("Failed to read flow file '{}': {}", &cli.flow_path, e))
    });
    let graph = graph_from_editor_json(&flow_json)
        .unwrap_or_else(|e| exit_with_error(&format!("Failed to parse flow JSON: {}", e)));

    let name = cli.name.unwrap_or_else(|| file_stem(&cli.flow_path));
    let compiler = Compiler::builder(graph).with_name(&name).build();

    if cli.variables {
        let variables = compiler.variables();
        println!(
            "{}",
            serde_json::to_string_pretty(&variables)
                .unwrap_or_else(|e| exit_with_error(&format!("Failed to serialize: {}", e)))
        );
        return;
    }

    if cli.check {
        let report = compiler.validate();
        print_diagnostics(&report.errors);
        print_diagnostics(&report.warnings);
        if report.is_valid {
            eprintln!("Flow is valid ({} warning(s))", report.warnings.len());
        } else {
            eprintln!("Flow is invalid: {} error(s)", report.errors.len());
            std::process::exit(1);
        }
        return;
    }

    let compile_start = Instant::now();
    let output = compiler.compile();
    let compile_duration = compile_start.elapsed();

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&output)
                .unwrap_or_else(|e| exit_with_error(&format!("Failed to serialize: {}", e)))
        );
        if !output.is_valid {
            std::process::exit(1);
        }
        return;
    }

    print_diagnostics(&output.errors);
    print_diagnostics(&output.warnings);

    if !output.is_valid {
        eprintln!("Compilation failed: {} error(s)", output.errors.len());
        std::process::exit(1);
    }

    eprintln!("Compiled '{}' in {:?}", name, compile_duration);

    if let Some(artifact_path) = cli.artifact {
        let program = CompiledProgram::from_output(&name, &output)
            .unwrap_or_else(|| exit_with_error("Compile output carried no code"));
        program.save(&artifact_path).unwrap_or_else(|e| {
            exit_with_error(&format!("Failed to write artifact '{}': {}", artifact_path, e))
        });
        eprintln!("Artifact written to {}", artifact_path);
    }

    print!("{}", output.code);
}

fn print_diagnostics(diagnostics: &[Diagnostic]) {
    for diag in diagnostics {
        let label = if diag.is_error() { "error" } else { "warning" };
        match &diag.block_id {
            Some(block_id) => eprintln!("{}: [{}] {}", label, block_id, diag.message),
            None => eprintln!("{}: {}", label, diag.message),
        }
    }
}

fn file_stem(path: &str) -> String {
    std::path::Path::new(path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("flow")
        .to_string()
}

fn exit_with_error(message: &str) -> ! {
    eprintln!("\nError: {}", message);
    std::process::exit(1);
}
