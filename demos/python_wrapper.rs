//! Example: Python Wrapper
//!
//! Generates the C-API extension module for a file with an optional
//! argument and an interface of two overloads.
//!
//! Run with: cargo run --example python_wrapper

use numpy_to_native::{compile, CompilerConfig, FileKind, Language};

const SOURCE: &str = "def scale(a: 'float[:]', factor: float = 2.0, offset: 'float' = None):\n\
    a[:] = a * factor\n\
    if offset is not None:\n        a[:] = a + offset\n\
@types('int')\n@types('float')\ndef twice(x):\n    return x * 2\n";

fn main() {
    println!("=== Python Wrapper Example ===\n");
    println!("Source:\n{}", SOURCE);

    let config = CompilerConfig::new(Language::Fortran).with_wrapper(true).with_module_name("kernels");
    let result = compile(SOURCE, &config).unwrap();
    println!("{}", result);

    for kind in [FileKind::Source, FileKind::Header, FileKind::Wrapper] {
        if let Some(file) = result.file(kind) {
            println!("--- {} ---", file.name);
            println!("{}", file.contents);
        }
    }

    println!("JSON output:");
    println!("{}", result.to_json().unwrap());
}
