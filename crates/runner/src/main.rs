//! Smile Bootstrap CLI
//!
//! Reads core-form programs, compiles them against a fresh environment,
//! and runs them on the VM. This is the bootstrap driver surface, not the
//! full language front end: programs are written as core-form trees (see
//! `reader`).

mod reader;

use clap::{CommandFactory, Parser};
use clap_complete::Shell;
use smile_runtime::{Env, EvalResult, eval_run};
use smilec::{Compiler, Severity, has_errors};
use std::path::PathBuf;
use std::process;
use std::rc::Rc;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "smile")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Smile interpreter (bootstrap driver)", long_about = None)]
struct Cli {
    /// Program files to run, in order
    files: Vec<PathBuf>,

    /// Check the programs (compile only, run nothing)
    #[arg(short = 'c', long = "check")]
    check: bool,

    /// Evaluate a script given on the command line
    #[arg(short = 'e', value_name = "SCRIPT")]
    script: Option<String>,

    /// Define a global constant, e.g. -D limit=100
    #[arg(short = 'D', value_name = "NAME=VALUE")]
    defines: Vec<String>,

    /// Don't print result values; only show errors
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,

    /// Verbose logging to stderr
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Treat compile-time warnings as errors
    #[arg(long = "warnings-as-errors")]
    warnings_as_errors: bool,

    /// Emit diagnostics as JSON (with --check)
    #[arg(long = "json")]
    json: bool,

    /// Print shell completions and exit
    #[arg(long = "completions", value_name = "SHELL", value_enum)]
    completions: Option<Shell>,
}

fn main() {
    let cli = Cli::parse();

    if let Some(shell) = cli.completions {
        let mut command = Cli::command();
        clap_complete::generate(shell, &mut command, "smile", &mut std::io::stdout());
        return;
    }

    let default_level = if cli.verbose { "smile=debug" } else { "smile=warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(default_level.parse().expect("static directive")),
        )
        .with_writer(std::io::stderr)
        .init();

    if cli.script.is_none() && cli.files.is_empty() {
        eprintln!("smile: no input; pass a program file or -e 'script'");
        process::exit(2);
    }

    let env = Env::new();
    for define in &cli.defines {
        match apply_define(&env, define) {
            Ok(name) => debug!("defined global '{}'", name),
            Err(message) => {
                eprintln!("smile: {}", message);
                process::exit(2);
            }
        }
    }

    let mut inputs: Vec<(String, String)> = Vec::new();
    if let Some(script) = &cli.script {
        inputs.push(("<script>".to_string(), script.clone()));
    }
    for path in &cli.files {
        match std::fs::read_to_string(path) {
            Ok(text) => inputs.push((path.display().to_string(), text)),
            Err(e) => {
                eprintln!("smile: cannot read {}: {}", path.display(), e);
                process::exit(2);
            }
        }
    }

    let mut failed = false;
    for (name, text) in &inputs {
        info!("evaluating {}", name);
        if !run_one(&cli, &env, name, text) {
            failed = true;
        }
    }
    process::exit(if failed { 1 } else { 0 });
}

/// Compile (and unless checking, run) one input. Returns success.
fn run_one(cli: &Cli, env: &Env, name: &str, text: &str) -> bool {
    let (tables, function, diagnostics) = {
        let mut symbols = env.symbols.borrow_mut();
        let tree = match reader::Reader::new(&mut symbols, name, text).read_program() {
            Ok(tree) => tree,
            Err(message) => {
                eprintln!("smile: {}", message);
                return false;
            }
        };
        let mut compiler = Compiler::new(&mut symbols, env.globals.clone());
        let function = compiler.compile_global(&tree);
        let diagnostics = std::mem::take(&mut compiler.diagnostics);
        (Rc::new(compiler.finish()), function, diagnostics)
    };

    report_diagnostics(cli, &diagnostics);
    if has_errors(&diagnostics, cli.warnings_as_errors) {
        return false;
    }
    if cli.check {
        return true;
    }

    match eval_run(env, &tables, &function) {
        EvalResult::Value(value) => {
            if !cli.quiet {
                println!("{}", value.stringify(&env.symbols.borrow()));
            }
            true
        }
        EvalResult::Exception(e) => {
            let symbols = env.symbols.borrow();
            eprintln!("smile: uncaught {}: {}", symbols.name(e.kind), e.message);
            for entry in e.stack_trace.iter_list() {
                eprintln!("    at {}", entry.stringify(&symbols));
            }
            false
        }
        EvalResult::ParseErrors(diagnostics) => {
            report_diagnostics(cli, &diagnostics);
            false
        }
        EvalResult::Break(info) => {
            eprintln!("smile: stopped at breakpoint (pc {})", info.pc);
            true
        }
    }
}

fn report_diagnostics(cli: &Cli, diagnostics: &[smilec::Diagnostic]) {
    if diagnostics.is_empty() {
        return;
    }
    if cli.json {
        match serde_json::to_string_pretty(diagnostics) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("smile: cannot serialize diagnostics: {}", e),
        }
        return;
    }
    for diagnostic in diagnostics {
        if diagnostic.severity == Severity::Info && cli.quiet {
            continue;
        }
        eprintln!("{}", diagnostic);
    }
}

/// `-D name=value`: value is read as a single atom (or defaults to true).
fn apply_define(env: &Env, define: &str) -> Result<String, String> {
    let (name, value_text) = match define.split_once('=') {
        Some((name, value)) => (name, value),
        None => (define, "true"),
    };
    if name.is_empty() {
        return Err(format!("malformed define '{}'", define));
    }
    let value = {
        let mut symbols = env.symbols.borrow_mut();
        let parsed = reader::Reader::new(&mut symbols, "<define>", value_text)
            .read_program()
            .map_err(|e| format!("malformed define '{}': {}", define, e))?;
        match parsed {
            smile_core::Value::Symbol(sym) => {
                // Bare names defined on the command line become their
                // global value if one exists, else the symbol itself.
                env.globals
                    .get_global(sym)
                    .unwrap_or(smile_core::Value::Symbol(sym))
            }
            other => other,
        }
    };
    env.declare_global(name, value);
    Ok(name.to_string())
}
