//! Example: Scalar Function
//!
//! Compiles a one-line integer function to Fortran and C, then runs it with
//! the reference evaluator.
//!
//! Run with: cargo run --example scalar_function

use numpy_to_native::{compile, evaluate, CompilerConfig, Language};

const SOURCE: &str = "def f(x: int) -> int:\n    return x + 1\n";

fn main() {
    println!("=== Scalar Function Example ===\n");
    println!("Source:\n{}", SOURCE);

    // Example 1: Fortran module with its binding header
    println!("Example 1: Fortran\n");
    let fortran = compile(SOURCE, &CompilerConfig::new(Language::Fortran)).unwrap();
    println!("{}", fortran.source());
    println!("Header:\n{}", fortran.header().unwrap_or_default());

    // Example 2: the same function in C
    println!("Example 2: C\n");
    let c = compile(SOURCE, &CompilerConfig::new(Language::C)).unwrap();
    println!("{}", c.source());

    // Example 3: f(5) evaluated on the expanded tree
    println!("Example 3: Evaluation");
    println!("f(5) = {}", evaluate(SOURCE, "f(5)").unwrap());
}
