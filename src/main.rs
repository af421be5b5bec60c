//! NumPy to Native Compiler CLI
//!
//! Usage:
//!   numpy2native kernels.py --language c --wrapper
//!   numpy2native -e "def f(x: int) -> int:\n    return x + 1" --eval "f(5)"
//!   cat kernels.py | numpy2native --json

use clap::Parser as ClapParser;
use colored::Colorize;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use numpy_to_native::{
    compile_with_diagnostics, evaluate, CompiledModule, CompilerConfig, Diagnostics, Language,
};

#[derive(ClapParser, Debug)]
#[command(name = "numpy2native")]
#[command(author = "Compiler Team")]
#[command(version = "0.1.0")]
#[command(about = "Compiles typed Python/NumPy functions to Fortran or C")]
struct Args {
    /// Source file to compile
    #[arg(value_name = "FILE")]
    input: Option<PathBuf>,

    /// Inline source instead of a file (`\n` starts a new line)
    #[arg(short = 'e', long = "expr", conflicts_with = "input")]
    inline: Option<String>,

    /// Target language
    #[arg(short = 'l', long = "language")]
    language: Option<Language>,

    /// Also generate the Python C-API wrapper
    #[arg(short = 'w', long = "wrapper")]
    wrapper: bool,

    /// Generate the binding header
    #[arg(long = "header", overrides_with = "no_header")]
    header: bool,

    /// Skip the binding header
    #[arg(long = "no-header")]
    no_header: bool,

    /// Name of the generated module (defaults to the input file stem)
    #[arg(short = 'm', long = "module")]
    module_name: Option<String>,

    /// JSON configuration file; flags override its values
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Write the generated files into this directory
    #[arg(short = 'o', long = "out-dir")]
    out_dir: Option<PathBuf>,

    /// Run a call such as "f(5)" with the reference evaluator
    #[arg(long = "eval", value_name = "CALL")]
    eval: Option<String>,

    /// Output as JSON
    #[arg(short = 'j', long = "json")]
    json_output: bool,

    /// Verbose output
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

fn fail(what: &str, message: impl std::fmt::Display) -> ! {
    eprintln!("{}: {}", what.red(), message);
    std::process::exit(1);
}

fn read_source(args: &Args) -> String {
    if let Some(inline) = &args.inline {
        inline.replace("\\n", "\n")
    } else if let Some(file) = &args.input {
        fs::read_to_string(file)
            .unwrap_or_else(|e| fail("Error", format!("Failed to read file '{}': {}", file.display(), e)))
    } else {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .unwrap_or_else(|e| fail("Error", format!("Failed to read stdin: {}", e)));
        buffer
    }
}

fn build_config(args: &Args) -> CompilerConfig {
    let mut config = match &args.config {
        Some(path) => CompilerConfig::from_file(path).unwrap_or_else(|e| fail("Configuration error", e)),
        None => CompilerConfig::default(),
    };
    if let Some(language) = args.language {
        config.language = language;
    }
    if args.wrapper {
        config.wrapper = true;
    }
    if args.header {
        config.header = true;
    }
    if args.no_header {
        config.header = false;
    }
    let stem = args.input.as_deref().and_then(Path::file_stem).map(|s| s.to_string_lossy().into_owned());
    if let Some(name) = args.module_name.clone().or(stem) {
        config.module_name = Some(name);
    }
    config
}

fn main() {
    if let Ok(filter) = EnvFilter::try_from_env("NUMPY2NATIVE_LOG") {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .without_time()
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }

    let args = Args::parse();
    let source = read_source(&args);
    let config = build_config(&args);

    if args.verbose {
        println!("{}", "NumPy to Native Compiler".bold().blue());
        println!("{}", "=".repeat(35));
        println!();
        println!("{}: {}", "Target".green(), config.language);
        println!("{}: {}", "Module".green(), config.module_name());
        println!("{}: {}", "Wrapper".green(), config.wrapper);
        println!();
    }

    let mut diagnostics = Diagnostics::new();
    if let Some(file) = &args.input {
        diagnostics.set_file_context(file.display().to_string());
    }

    let result = match compile_with_diagnostics(&source, &config, &mut diagnostics) {
        Ok(result) => result,
        Err(e) => {
            if args.json_output {
                if let Ok(json) = diagnostics.to_json() {
                    println!("{}", json);
                }
            } else {
                eprint!("{}", diagnostics.render());
            }
            fail("Compilation error", e);
        }
    };

    if let Some(call) = &args.eval {
        match evaluate(&source, call) {
            Ok(value) => println!("{} = {}", call.trim().cyan(), value),
            Err(e) => fail("Evaluation error", e),
        }
        return;
    }

    if let Some(dir) = &args.out_dir {
        write_files(&result, dir);
    }

    if args.json_output {
        match result.to_json() {
            Ok(json) => println!("{}", json),
            Err(e) => fail("Error", format!("Failed to serialize to JSON: {}", e)),
        }
    } else {
        if !diagnostics.messages().is_empty() {
            eprint!("{}", diagnostics.render());
        }
        print_module(&result, args.verbose || args.out_dir.is_none());
    }
}

fn write_files(result: &CompiledModule, dir: &Path) {
    if let Err(e) = fs::create_dir_all(dir) {
        fail("Error", format!("Failed to create '{}': {}", dir.display(), e));
    }
    for file in &result.files {
        let path = dir.join(&file.name);
        if let Err(e) = fs::write(&path, &file.contents) {
            fail("Error", format!("Failed to write '{}': {}", path.display(), e));
        }
    }
}

fn print_module(result: &CompiledModule, show_contents: bool) {
    println!("{}", "Compilation Results".bold().green());
    println!("{}", "=".repeat(50));
    println!();
    print!("{}", result);

    if show_contents {
        for file in &result.files {
            println!();
            println!("{} {}", "File".bold(), file.name.bold().yellow());
            println!("{}", "-".repeat(50));
            print!("{}", file.contents);
        }
    }
}
