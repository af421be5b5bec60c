//! NumPy to Native Compiler
//!
//! This library translates a statically typed subset of Python and NumPy into
//! Fortran or C, and can emit a Python C-API extension module exposing the
//! generated functions back to Python.
//!
//! # Example
//!
//! ```rust
//! use numpy_to_native::{compile, CompilerConfig, Language};
//!
//! let config = CompilerConfig::new(Language::C).with_wrapper(true);
//! let result = compile("def f(x: int) -> int:\n    return x + 1\n", &config).unwrap();
//! println!("{}", result.source());
//! ```

pub mod ast;
pub mod codegen;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod eval;
pub mod expansion;
pub mod lexer;
pub mod output;
pub mod parser;
pub mod semantic;
pub mod types;

pub use ast::Module;
pub use codegen::{CodePrinter, CPrinter, CWrapperPrinter, FortranPrinter, HeaderPrinter};
pub use config::{CompilerConfig, Language};
pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use error::{CompileError, CompileResult};
pub use eval::{Interpreter, Value};
pub use output::{CompiledModule, FileKind};
pub use parser::Parser;

use tracing::info;

use crate::codegen::runtime;
use crate::diagnostics::Stage;

/// Main compilation function: source text in, generated files out
pub fn compile(source: &str, config: &CompilerConfig) -> CompileResult<CompiledModule> {
    let mut diagnostics = Diagnostics::new();
    compile_with_diagnostics(source, config, &mut diagnostics)
}

/// Compile, collecting every message into `diagnostics` even when compilation fails
pub fn compile_with_diagnostics(
    source: &str,
    config: &CompilerConfig,
    diagnostics: &mut Diagnostics,
) -> CompileResult<CompiledModule> {
    let module = annotate_with_diagnostics(source, config, diagnostics)?;
    let mut output = CompiledModule::new(module.name.clone(), config.language);

    let mut printer = codegen::printer_for(config);
    let text = printer
        .print_module(&module, diagnostics)
        .map_err(|e| diagnostics.fatal_from(Stage::Codegen, e, None))?;
    output.add_file(FileKind::Source, printer.extension(), text);

    if config.header {
        let mut printer = HeaderPrinter::new(config.clone());
        let text = printer
            .print_module(&module, diagnostics)
            .map_err(|e| diagnostics.fatal_from(Stage::Codegen, e, None))?;
        output.add_file(FileKind::Header, printer.extension(), text);
    }

    if config.wrapper {
        let mut printer = CWrapperPrinter::new(config.clone());
        let text = printer
            .print_module(&module, diagnostics)
            .map_err(|e| diagnostics.fatal_from(Stage::Codegen, e, None))?;
        output.add_file(FileKind::Wrapper, printer.extension(), text);
    }

    if config.language == Language::C || config.wrapper {
        output.add_file(FileKind::Runtime, "h", runtime::NDARRAYS_SOURCE.to_string());
    }

    diagnostics.check()?;
    output.diagnostics = diagnostics.messages().to_vec();
    info!(module = %output.module_name, files = output.files.len(), "compiled");
    Ok(output)
}

/// Typed tree after annotation and loop expansion
pub fn annotate(source: &str, config: &CompilerConfig) -> CompileResult<Module> {
    let mut diagnostics = Diagnostics::new();
    annotate_with_diagnostics(source, config, &mut diagnostics)
}

pub fn annotate_with_diagnostics(
    source: &str,
    config: &CompilerConfig,
    diagnostics: &mut Diagnostics,
) -> CompileResult<Module> {
    let mut module = semantic::annotate_source(source, config, diagnostics)?;
    expansion::expand_module(&mut module, config.language, diagnostics)?;
    diagnostics.check()?;
    Ok(module)
}

/// Run `call` (for instance `"f(5)"`) against the module defined by `source`
///
/// Evaluation always uses the loop form produced for C, so the result
/// reflects what the expansion pass generated.
pub fn evaluate(source: &str, call: &str) -> CompileResult<Value> {
    let module = annotate(source, &CompilerConfig::new(Language::C))?;
    let (name, args) = eval::parse_call(call)?;
    Interpreter::new(&module).call(&name, args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::StmtKind;
    use pretty_assertions::assert_eq;

    const INCREMENT: &str = "def f(x: int) -> int:\n    return x + 1\n";

    #[test]
    fn test_increment_evaluates_to_six() {
        assert_eq!(evaluate(INCREMENT, "f(5)").unwrap(), Value::int(6));
    }

    #[test]
    fn test_increment_compiles_for_both_targets() {
        let fortran = compile(INCREMENT, &CompilerConfig::default()).unwrap();
        assert!(fortran.source().contains("function f(x) result(Out_0001)"));
        assert_eq!(fortran.files.len(), 2);

        let c = compile(INCREMENT, &CompilerConfig::new(Language::C)).unwrap();
        assert!(c.source().contains("int64_t f(int64_t x)"));
        assert!(c.file(FileKind::Runtime).is_some());
    }

    #[test]
    fn test_add_one_loops_only_without_vectors() {
        let source = "from numpy import zeros\ndef f():\n    a = zeros(shape=(3, 4))\n    b = a + 1\n";
        let loops = |language| {
            let module = annotate(source, &CompilerConfig::new(language)).unwrap();
            module.functions[0]
                .body
                .iter()
                .filter_map(|s| match &s.kind {
                    StmtKind::For(l) => Some(l.body.iter().filter(|s| matches!(s.kind, StmtKind::For(_))).count()),
                    _ => None,
                })
                .collect::<Vec<_>>()
        };
        // `zeros` is filled by the printer; `a + 1` is one nest of two loops
        assert_eq!(loops(Language::C), vec![1]);
        assert!(loops(Language::Fortran).is_empty());
    }

    #[test]
    fn test_tuple_variables_compile_for_both_targets() {
        let source = "def f(k: int) -> int:\n    t = (1, 2, 3)\n    return t[k]\n";
        let c = compile(source, &CompilerConfig::new(Language::C)).unwrap();
        assert!(c.source().contains("int64_t t_buffer[3];"), "{}", c.source());
        let fortran = compile(source, &CompilerConfig::default()).unwrap();
        assert!(fortran.source().contains("t(0:2)"), "{}", fortran.source());
        assert_eq!(evaluate(source, "f(2)").unwrap(), Value::int(3));
    }

    #[test]
    fn test_mixed_order_matmul_fails() {
        let source = "from numpy import matmul\n\
                      def h(a: 'float[:,:](order=C)', b: 'float[:,:](order=F)'):\n    c = matmul(a, b)\n";
        let mut diagnostics = Diagnostics::new();
        assert!(compile_with_diagnostics(source, &CompilerConfig::default(), &mut diagnostics).is_err());
        assert!(diagnostics.render().contains("mixed order"));
    }

    #[test]
    fn test_absent_optional_skips_conversion() {
        let source = "def f(x: int, z: 'int' = None) -> int:\n    if z is None:\n        return x\n    return x + z\n";
        let config = CompilerConfig::new(Language::C).with_wrapper(true);
        let compiled = compile(source, &config).unwrap();
        let wrapper = compiled.wrapper().unwrap();
        assert!(wrapper.contains("if (py_z != NULL && py_z != Py_None)"));
        assert!(wrapper.contains("int64_t* z = NULL;"));
    }

    #[test]
    fn test_errors_are_collected() {
        let source = "def f(x: int):\n    y = 1\n    y = 2.5\n    z = y + x\n    return z\n";
        let mut diagnostics = Diagnostics::new();
        let err = compile_with_diagnostics(source, &CompilerConfig::default(), &mut diagnostics).unwrap_err();
        assert!(matches!(err, CompileError::Errors { count: 1 }));
        assert_eq!(diagnostics.count(Severity::Error), 1);
    }

    #[test]
    fn test_module_name_names_the_files() {
        let config = CompilerConfig::new(Language::Fortran).with_wrapper(true).with_module_name("geometry");
        let compiled = compile(INCREMENT, &config).unwrap();
        let names: Vec<&str> = compiled.files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["geometry.f90", "geometry.h", "geometry_wrapper.c", "ndarrays.h"]);
        assert!(compiled.source().contains("bind_c_f"));
    }
}
