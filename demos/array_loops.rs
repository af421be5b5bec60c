//! Example: Array Loops
//!
//! Shows how one whole-array statement is kept as an array expression in
//! Fortran and expanded to explicit nested loops in C.
//!
//! Run with: cargo run --example array_loops

use numpy_to_native::ast::StmtKind;
use numpy_to_native::{annotate, compile, evaluate, CompilerConfig, Language};

const SOURCE: &str = "from numpy import zeros, sum\n\
def f(n: int) -> float:\n    a = zeros((n, 4))\n    b = a + 1.0\n    return sum(b)\n";

fn main() {
    println!("=== Array Loops Example ===\n");
    println!("Source:\n{}", SOURCE);

    // Example 1: annotated and expanded statements per target
    for language in [Language::Fortran, Language::C] {
        let module = annotate(SOURCE, &CompilerConfig::new(language)).unwrap();
        let body = &module.functions[0].body;
        let loops = body.iter().filter(|s| matches!(s.kind, StmtKind::For(_))).count();
        println!("Example 1 ({}): {} statement(s), {} loop nest(s)", language, body.len(), loops);
    }

    println!();

    // Example 2: generated sources
    println!("Example 2: Fortran\n");
    println!("{}", compile(SOURCE, &CompilerConfig::new(Language::Fortran)).unwrap().source());
    println!("Example 2: C\n");
    println!("{}", compile(SOURCE, &CompilerConfig::new(Language::C)).unwrap().source());

    // Expected: 3 rows of 4 ones
    println!("Example 3: f(3) = {}", evaluate(SOURCE, "f(3)").unwrap());
}
