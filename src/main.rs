//! BPL Compiler back end
//!
//! Reads a type-annotated program produced by the front end and emits
//! LLVM textual IR.

mod backend;
mod config;
mod frontend;
mod middle;
mod types;
mod utils;

use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::info;

use backend::{CodeGen, GeneratedModule, LlvmCodeGen};
use config::{CodegenConfig, DiagnosticMode, UnhandledException};
use frontend::ast::Program;
use utils::Error;

/// BPL compiler back end
#[derive(Parser, Debug)]
#[command(name = "bplc")]
#[command(version = "0.1.0")]
#[command(about = "BPL compiler back end - annotated AST to LLVM IR")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    options: Options,
}

/// Overrides applied on top of the config file
#[derive(Args, Debug)]
struct Options {
    /// JSON code generation config
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Call depth at which StackOverflowError is raised
    #[arg(long, global = true, value_name = "N")]
    stack_limit: Option<u32>,

    /// Keep going after errors and report them all
    #[arg(long, global = true)]
    collect_all: bool,

    /// Re-raise exceptions no catch clause matched
    #[arg(long, global = true)]
    abort_unhandled: bool,

    /// Target triple written into the module
    #[arg(long, global = true, value_name = "TRIPLE")]
    target: Option<String>,

    /// Emit DWARF debug metadata
    #[arg(short = 'g', long, global = true)]
    debug_info: bool,

    /// Source file named in the debug metadata
    #[arg(long, global = true, value_name = "FILE")]
    source: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate IR for an annotated program
    Build {
        /// Annotated AST (JSON)
        input: PathBuf,

        /// Output file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Report errors without writing IR
    Check {
        /// Annotated AST (JSON)
        input: PathBuf,
    },
    /// Print version information
    Version,
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(err) => {
            eprintln!("error: {:#}", err);
            process::exit(1);
        }
    }
}

/// Returns whether the run was free of diagnostics
fn run(cli: Cli) -> Result<bool> {
    match cli.command {
        Commands::Build { input, output } => {
            let config = load_config(&cli.options, &input)?;
            let module = generate(&input, config)?;
            let out = output.unwrap_or_else(|| input.with_extension("ll"));
            fs::write(&out, &module.ir).with_context(|| format!("failed to write {}", out.display()))?;
            info!("wrote {}", out.display());
            report(&input, &module.diagnostics);
            Ok(module.is_clean())
        }
        Commands::Check { input } => {
            let mut config = load_config(&cli.options, &input)?;
            config.diagnostics = DiagnosticMode::CollectAll;
            let module = generate(&input, config)?;
            report(&input, &module.diagnostics);
            if module.is_clean() {
                println!("No errors found");
            }
            Ok(module.is_clean())
        }
        Commands::Version => {
            println!("bplc 0.1.0");
            println!("BPL compiler back end");
            println!("License: Apache-2.0");
            Ok(true)
        }
    }
}

fn load_config(options: &Options, input: &Path) -> Result<CodegenConfig> {
    let mut config = match &options.config {
        Some(path) => {
            let text = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
            CodegenConfig::from_json(&text).with_context(|| format!("invalid config {}", path.display()))?
        }
        None => CodegenConfig::default(),
    };
    if let Some(stem) = input.file_stem().and_then(|s| s.to_str()) {
        config.module_name = stem.to_string();
    }
    if let Some(limit) = options.stack_limit {
        config.stack_depth_limit = limit;
    }
    if options.collect_all {
        config.diagnostics = DiagnosticMode::CollectAll;
    }
    if options.abort_unhandled {
        config.unhandled_exception = UnhandledException::Abort;
    }
    if let Some(target) = &options.target {
        config.target_triple = Some(target.clone());
    }
    if options.debug_info {
        config.debug_info = true;
    }
    if let Some(source) = &options.source {
        config.source_file = Some(source.clone());
    }
    Ok(config)
}

fn generate(input: &Path, config: CodegenConfig) -> Result<GeneratedModule> {
    let text = fs::read_to_string(input).with_context(|| format!("failed to read {}", input.display()))?;
    let program: Program =
        serde_json::from_str(&text).with_context(|| format!("{} is not an annotated program", input.display()))?;
    info!("loaded {} declarations from {}", program.decls.len(), input.display());

    let mut codegen = LlvmCodeGen::new(config);
    info!("backend {} targeting '{}'", codegen.name(), codegen.target_triple());
    let module = codegen.generate(&program).map_err(|err| {
        report(input, std::slice::from_ref(&err));
        anyhow::anyhow!("code generation failed")
    })?;
    Ok(module)
}

fn report(input: &Path, diagnostics: &[Error]) {
    for err in diagnostics {
        match err.span() {
            Some(span) if span.line > 0 => {
                eprintln!("{}:{}:{}: error: {}", input.display(), span.line, span.column, err)
            }
            _ => eprintln!("{}: error: {}", input.display(), err),
        }
        if let Some(hint) = err.hint() {
            eprintln!("  hint: {}", hint);
        }
    }
}
