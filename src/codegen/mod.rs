//! Source printers
//!
//! Every printer walks an annotated, expanded [`Module`] and returns the text
//! of one output file. Statements the target cannot express directly, such as
//! reductions in C, are first lowered to plain loops by [`lowering`] and then
//! printed like any other statement.

pub mod c;
pub mod cwrapper;
pub mod fortran;
pub mod header;
pub mod lowering;
pub mod runtime;

use std::collections::{HashMap, HashSet};

use crate::ast::{Dim, FunctionDef, Module, StmtKind, TypedExpr, TypedStmt, Variable};
use crate::config::{CompilerConfig, Language};
use crate::diagnostics::Diagnostics;
use crate::error::CompileResult;

pub use c::CPrinter;
pub use cwrapper::CWrapperPrinter;
pub use fortran::FortranPrinter;
pub use header::HeaderPrinter;

/// A tree-to-text printer for one kind of output file
pub trait CodePrinter {
    /// Extension of the file this printer produces
    fn extension(&self) -> &'static str;

    fn print_module(&mut self, module: &Module, diagnostics: &mut Diagnostics) -> CompileResult<String>;
}

/// Printer of the main source file for the configured language
pub fn printer_for(config: &CompilerConfig) -> Box<dyn CodePrinter> {
    match config.language {
        Language::Fortran => Box::new(FortranPrinter::new(config.clone())),
        Language::C => Box::new(CPrinter::new(config.clone())),
    }
}

/// Identifiers already taken in one printing scope
///
/// Printers draw helper names (loop indices of lowered statements,
/// accumulators, wrapper storage) from here so that they never shadow a
/// user variable.
#[derive(Debug, Clone, Default)]
pub struct NameRegistry {
    used: HashSet<String>,
}

impl NameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every module-level name and every variable of `function`
    pub fn for_function(module: &Module, function: &FunctionDef) -> Self {
        let mut names = Self::new();
        for f in module.all_functions() {
            names.reserve(f.name());
        }
        for i in &module.interfaces {
            names.reserve(i.name.as_str());
        }
        for c in &module.constants {
            names.reserve(c.var.name.as_str());
        }
        for v in function.args().chain(function.results()).chain(function.locals.iter()) {
            names.reserve(v.name.as_str());
        }
        names
    }

    pub fn reserve(&mut self, name: impl Into<String>) {
        self.used.insert(name.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.used.contains(name)
    }

    /// `base` if it is free, else the first free `base_<n>`
    pub fn fresh(&mut self, base: &str) -> String {
        let name = if self.used.contains(base) {
            (1..)
                .map(|n| format!("{}_{}", base, n))
                .find(|candidate| !self.used.contains(candidate))
                .unwrap_or_else(|| base.to_string())
        } else {
            base.to_string()
        };
        self.used.insert(name.clone());
        name
    }
}

/// Indentation-aware text buffer
#[derive(Debug, Clone)]
pub struct CodeWriter {
    text: String,
    indent: usize,
    unit: &'static str,
}

impl CodeWriter {
    pub fn new(unit: &'static str) -> Self {
        Self { text: String::new(), indent: 0, unit }
    }

    /// Empty writer starting at another writer's depth
    pub fn nested(&self) -> Self {
        Self { text: String::new(), indent: self.indent, unit: self.unit }
    }

    /// Write one line at the current depth; an empty line carries no indentation
    pub fn line(&mut self, text: impl AsRef<str>) {
        let text = text.as_ref();
        if !text.is_empty() {
            for _ in 0..self.indent {
                self.text.push_str(self.unit);
            }
            self.text.push_str(text);
        }
        self.text.push('\n');
    }

    pub fn blank(&mut self) {
        self.text.push('\n');
    }

    /// Execute `f` one level deeper, then restore
    pub fn indented<F, T>(&mut self, f: F) -> T
    where
        F: FnOnce(&mut Self) -> T,
    {
        self.indent += 1;
        let result = f(self);
        self.indent -= 1;
        result
    }

    /// Append text produced by another writer verbatim
    pub fn append(&mut self, other: CodeWriter) {
        self.text.push_str(&other.text);
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn finish(self) -> String {
        self.text
    }
}

/// Every variable a function can refer to, by name
pub fn symbol_table(module: &Module, function: &FunctionDef) -> HashMap<String, Variable> {
    module
        .constants
        .iter()
        .map(|c| &c.var)
        .chain(function.args())
        .chain(function.results())
        .chain(function.locals.iter())
        .map(|v| (v.name.clone(), v.clone()))
        .collect()
}

fn visit_statements<'a>(body: &'a [TypedStmt], visit: &mut impl FnMut(&'a TypedStmt)) {
    for stmt in body {
        visit(stmt);
        for inner in stmt.bodies() {
            visit_statements(inner, visit);
        }
    }
}

/// Names some statement of the function writes to
pub fn written_names(function: &FunctionDef) -> HashSet<String> {
    function.body.iter().flat_map(TypedStmt::written_names).collect()
}

/// Arrays some pointer of the function is aliased to
pub fn alias_targets(function: &FunctionDef) -> HashSet<String> {
    let mut targets = HashSet::new();
    visit_statements(&function.body, &mut |stmt| {
        if let StmtKind::AliasAssign { rhs, .. } = &stmt.kind {
            match rhs {
                TypedExpr::Var(v) => {
                    targets.insert(v.name.clone());
                }
                TypedExpr::Indexed(i) => {
                    targets.insert(i.base.name.clone());
                }
                _ => {}
            }
        }
    });
    targets
}

/// Locals whose array storage must be released when the function exits
pub fn owned_arrays(function: &FunctionDef) -> Vec<&Variable> {
    function.locals.iter().filter(|v| v.rank > 0 && !v.is_argument).collect()
}

/// Infix text of a dimension; `size_of` spells the length of one axis of a variable
pub fn print_dim(dim: &Dim, size_of: &dyn Fn(&str, usize) -> String) -> String {
    let grouped = |d: &Dim| match d {
        Dim::Add(..) | Dim::Sub(..) => format!("({})", print_dim(d, size_of)),
        _ => print_dim(d, size_of),
    };
    match dim {
        Dim::Lit(n) => n.to_string(),
        Dim::Var(name) => name.clone(),
        Dim::SizeOf { var, axis } => size_of(var, *axis),
        Dim::Add(a, b) => format!("{} + {}", print_dim(a, size_of), print_dim(b, size_of)),
        Dim::Sub(a, b) => format!("{} - {}", print_dim(a, size_of), grouped(b)),
        Dim::Mul(a, b) => format!("{} * {}", grouped(a), grouped(b)),
        Dim::FloorDiv(a, b) => match **b {
            Dim::Lit(_) | Dim::Var(_) | Dim::SizeOf { .. } => format!("{} / {}", grouped(a), print_dim(b, size_of)),
            _ => format!("{} / ({})", grouped(a), print_dim(b, size_of)),
        },
    }
}

/// `dim - 1`, folded when possible
pub fn last_position(dim: &Dim) -> Dim {
    Dim::Sub(Box::new(dim.clone()), Box::new(Dim::Lit(1))).simplify()
}

/// Value of a literal integer expression, such as a loop step
pub fn literal_int(e: &TypedExpr) -> Option<i64> {
    match e {
        TypedExpr::Literal(l) => l.as_int(),
        _ => None,
    }
}

/// Decimal text of a float that both targets read back exactly
pub fn float_text(x: f64) -> String {
    let text = format!("{:?}", x);
    if text.contains(['.', 'e', 'E']) || !x.is_finite() {
        text
    } else {
        format!("{}.0", text)
    }
}

/// Whether a block ends with a return on every path
pub fn ends_with_return(body: &[TypedStmt]) -> bool {
    matches!(body.last().map(|s| &s.kind), Some(StmtKind::Return(_)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::annotate_source;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_fresh_names_avoid_collisions() {
        let mut names = NameRegistry::new();
        names.reserve("k");
        names.reserve("k_1");
        assert_eq!(names.fresh("k"), "k_2");
        assert_eq!(names.fresh("acc"), "acc");
        assert_eq!(names.fresh("acc"), "acc_1");
        assert!(names.contains("k_2"));
    }

    #[test]
    fn test_dimension_text() {
        let n = Dim::Var("n".to_string());
        let d = Dim::Mul(Box::new(Dim::Add(Box::new(n.clone()), Box::new(Dim::Lit(1)))), Box::new(Dim::size_of("a", 1)));
        let text = print_dim(&d, &|var, axis| format!("{}.shape[{}]", var, axis));
        assert_eq!(text, "(n + 1) * a.shape[1]");
        assert_eq!(last_position(&Dim::Lit(4)), Dim::Lit(3));
        assert_eq!(print_dim(&last_position(&n), &|_, _| String::new()), "n - 1");
        assert_eq!(float_text(2.0), "2.0");
        assert_eq!(float_text(0.5), "0.5");
    }

    #[test]
    fn test_writer_indentation() {
        let mut w = CodeWriter::new("  ");
        w.line("do i = 0, 3");
        w.indented(|w| w.line("x = i"));
        w.blank();
        w.line("end do");
        assert_eq!(w.finish(), "do i = 0, 3\n  x = i\n\nend do\n");
    }

    #[test]
    fn test_function_registry_reserves_locals() {
        let source = "def f(k: int) -> int:\n    acc = k + 1\n    return acc\n";
        let module = annotate_source(source, &CompilerConfig::default(), &mut Diagnostics::new()).unwrap();
        let mut names = NameRegistry::for_function(&module, &module.functions[0]);
        assert_eq!(names.fresh("k"), "k_1");
        assert_eq!(names.fresh("acc"), "acc_1");
        assert_eq!(names.fresh("f"), "f_1");
    }

    #[test]
    fn test_alias_targets_and_owned_arrays() {
        let source = "from numpy import zeros\ndef f(a: 'float[:]'):\n    b = a[1:]\n    c = zeros(3)\n";
        let module = annotate_source(source, &CompilerConfig::default(), &mut Diagnostics::new()).unwrap();
        let f = &module.functions[0];
        assert!(alias_targets(f).contains("a"));
        let owned: Vec<&str> = owned_arrays(f).iter().map(|v| v.name.as_str()).collect();
        assert_eq!(owned, vec!["b", "c"]);
    }
}
