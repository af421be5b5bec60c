//! Semantic annotation
//!
//! Turns the untyped syntax tree into a typed [`Module`]:
//! - resolves every name against a stack of scopes (module, function)
//! - freezes the type of each variable at its first assignment and checks
//!   later assignments against it
//! - binds call arguments to parameters by position and keyword
//! - reads decorators and annotations into function headers, building an
//!   interface when a function carries several `@types` headers
//!
//! Type problems are reported as errors and the offending statement is
//! dropped so that annotation can go on; unresolved names and malformed
//! headers or argument lists are fatal.

pub mod calls;
pub mod expressions;
pub mod headers;
pub mod interface;
pub mod scope;
pub mod statements;

use std::collections::{HashMap, HashSet};

use tracing::{debug, instrument};

use crate::ast::syntax::{self, Expr, Program, Statement, StatementKind, Subscript};
use crate::ast::{Constant, FunctionArg, FunctionDef, FunctionSignature, Module, Operator, TypedExpr, Variable};
use crate::config::{CompilerConfig, Language};
use crate::diagnostics::{Diagnostic, Diagnostics, Location, Stage};
use crate::error::{CompileError, CompileResult};
use crate::types::{resolve_precision, TypeSpec};

pub use headers::{parse_header, FunctionHeader, Overload};
pub use interface::{build_interface, dispatch_key, DispatchKey};
pub use scope::{ScopeKind, ScopeStack, Symbol, UsageIndex};

/// State of the function being annotated
#[derive(Debug)]
pub(crate) struct FunctionContext {
    pub name: String,
    pub declared_results: Option<Vec<TypeSpec>>,
    /// Fixed by the first `return`
    pub results: Option<Vec<Variable>>,
    pub stack_arrays: Vec<String>,
    /// Arrays whose storage exists at this point of the walk
    pub allocated: HashSet<String>,
    /// Names taken by the source or by generated temporaries
    pub reserved: HashSet<String>,
    pub loop_depth: usize,
    /// Names whose assignment was rejected and that have no type
    pub rejected: HashSet<String>,
    /// Some statement was dropped after a recoverable error
    pub recovered: bool,
}

impl FunctionContext {
    fn new(name: &str, header: &FunctionHeader, overload: &Overload, reserved: HashSet<String>) -> Self {
        Self {
            name: name.to_string(),
            declared_results: overload.results.clone(),
            results: None,
            stack_arrays: header.stack_arrays.clone(),
            allocated: HashSet::new(),
            reserved,
            loop_depth: 0,
            rejected: HashSet::new(),
            recovered: false,
        }
    }
}

/// Annotator for one module
pub struct Annotator<'d> {
    pub(crate) language: Language,
    pub(crate) diagnostics: &'d mut Diagnostics,
    pub(crate) scopes: ScopeStack,
    pub(crate) function: Option<FunctionContext>,
    /// Definitions not annotated yet
    pending: HashMap<String, (syntax::FunctionDef, Location)>,
    in_progress: HashSet<String>,
    module: Module,
}

impl<'d> Annotator<'d> {
    pub fn new(config: &CompilerConfig, diagnostics: &'d mut Diagnostics) -> Self {
        Self {
            language: config.language,
            diagnostics,
            scopes: ScopeStack::new(),
            function: None,
            pending: HashMap::new(),
            in_progress: HashSet::new(),
            module: Module::new(config.module_name()),
        }
    }

    /// Where each symbol was referenced during annotation
    pub fn usages(&self) -> &UsageIndex {
        self.scopes.usages()
    }

    /// Annotate a whole module
    #[instrument(skip_all, fields(module = %self.module.name))]
    pub fn annotate(&mut self, program: &Program) -> CompileResult<Module> {
        for stmt in &program.body {
            if let StatementKind::FunctionDef(def) = &stmt.kind {
                if self.pending.contains_key(&def.name) {
                    let err = CompileError::specification(format!("function '{}' is defined twice", def.name));
                    return Err(self.fatal(err, Some(stmt.location)));
                }
                self.pending.insert(def.name.clone(), (def.clone(), stmt.location));
            }
        }

        for stmt in &program.body {
            let location = Some(stmt.location);
            match &stmt.kind {
                StatementKind::FunctionDef(def) => {
                    if self.pending.contains_key(&def.name) {
                        self.annotate_pending(&def.name)?;
                    }
                }
                StatementKind::Import { .. } | StatementKind::FromImport { .. } => {
                    self.import(stmt).map_err(|e| self.fatal(e, location))?;
                }
                StatementKind::Assign { target: Expr::Name(name), value } => {
                    if let Err(err) = self.module_constant(name, value, location) {
                        self.recover(err, location)?;
                    }
                }
                StatementKind::If { branches, .. } if is_main_guard(branches) => {
                    self.diagnostics.report(
                        Diagnostic::warning(Stage::Semantic, "the main program block is ignored").at(location),
                    )?;
                }
                StatementKind::Pass | StatementKind::Pragma(_) => {}
                StatementKind::Expr(Expr::Str(_)) => {}
                _ => {
                    let err = CompileError::restriction("executable statements at module level", self.language);
                    self.recover(err, location)?;
                }
            }
        }

        debug!(
            functions = self.module.functions.len(),
            interfaces = self.module.interfaces.len(),
            "annotated module"
        );
        Ok(std::mem::replace(&mut self.module, Module::new(String::new())))
    }

    /// `NAME = literal` at module level
    fn module_constant(&mut self, name: &str, value: &Expr, location: Option<Location>) -> CompileResult<()> {
        let typed = self.annotate_expr(value, location)?;
        let TypedExpr::Literal(literal) = &typed else {
            return Err(CompileError::restriction(
                format!("module variable '{}' with a non-literal value", name),
                self.language,
            ));
        };
        let dtype = literal.dtype();
        if !dtype.is_numeric() {
            return Err(CompileError::type_error(format!("constant '{}' must be numeric", name)));
        }
        let mut var = Variable::new(name, dtype.clone(), resolve_precision(&dtype, literal.precision));
        var.is_const = true;
        self.scopes.insert_global(name, Symbol::Constant(var.clone(), typed.clone()));
        self.module.constants.push(Constant { var, value: typed });
        Ok(())
    }

    /// Annotate a definition the first time it is needed
    pub(crate) fn annotate_pending(&mut self, name: &str) -> CompileResult<()> {
        let Some((def, location)) = self.pending.remove(name) else {
            return Ok(());
        };
        self.in_progress.insert(name.to_string());
        let saved_scopes = self.scopes.suspend();
        let saved_function = self.function.take();

        let result = self.annotate_function(&def, location);

        self.function = saved_function;
        self.scopes.resume(saved_scopes);
        self.in_progress.remove(name);
        result
    }

    pub(crate) fn is_pending(&self, name: &str) -> bool {
        self.pending.contains_key(name)
    }

    pub(crate) fn is_in_progress(&self, name: &str) -> bool {
        self.in_progress.contains(name)
    }

    #[instrument(skip_all, fields(function = %def.name))]
    fn annotate_function(&mut self, def: &syntax::FunctionDef, location: Location) -> CompileResult<()> {
        let header = parse_header(def, self.diagnostics).map_err(|e| self.fatal(e, Some(location)))?;

        if header.is_interface() {
            let mut functions = Vec::new();
            for (k, overload) in header.overloads.iter().enumerate() {
                let name = format!("{}_{}", def.name, k);
                let mut f = self.annotate_overload(def, &header, overload, &name, location)?;
                f.signature.flags.is_interface_member = true;
                functions.push(f);
            }
            let interface = build_interface(def.name.clone(), functions).map_err(|e| self.fatal(e, Some(location)))?;
            let signatures = interface.functions.iter().map(|f| f.signature.clone()).collect();
            self.scopes.insert_global(def.name.clone(), Symbol::Interface(signatures));
            self.module.interfaces.push(interface);
        } else {
            let f = self.annotate_overload(def, &header, &header.overloads[0], &def.name, location)?;
            self.scopes.insert_global(def.name.clone(), Symbol::Function(f.signature.clone()));
            self.module.functions.push(f);
        }
        Ok(())
    }

    fn annotate_overload(
        &mut self,
        def: &syntax::FunctionDef,
        header: &FunctionHeader,
        overload: &Overload,
        name: &str,
        location: Location,
    ) -> CompileResult<FunctionDef> {
        debug!(function = name, "annotating overload");
        self.scopes.push(ScopeKind::Function);
        self.function = Some(FunctionContext::new(name, header, overload, source_names(def)));

        let mut args = Vec::new();
        for (param, spec) in def.params.iter().zip(&overload.args) {
            let arg = match self.function_argument(param, spec, Some(location)) {
                Ok(arg) => arg,
                Err(e) => {
                    self.scopes.pop();
                    self.function = None;
                    return Err(self.fatal(e, Some(location)));
                }
            };
            self.scopes.insert(arg.var.name.clone(), Symbol::Variable(arg.var.clone()));
            args.push(arg);
        }

        // Declared results allow recursive calls before the body is known
        if let Some(declared) = &overload.results {
            if !header.is_interface() {
                let results = declared
                    .iter()
                    .enumerate()
                    .map(|(k, spec)| result_variable(&format!("Out_{:04}", k + 1), spec))
                    .collect();
                let provisional = FunctionSignature {
                    name: name.to_string(),
                    args: args.clone(),
                    results,
                    flags: header.flags.clone(),
                };
                self.scopes.insert_global(name, Symbol::Function(provisional));
            }
        }

        let (doc, body_start) = match def.body.first().and_then(Statement::docstring) {
            Some(doc) => (Some(doc.to_string()), 1),
            None => (None, 0),
        };
        let body = self.annotate_block(&def.body[body_start..]);

        let context = self.function.take();
        let mut locals = self.scopes.pop();
        let body = body?;
        let Some(context) = context else {
            return Err(CompileError::specification(format!("lost the context of '{}'", name)));
        };

        let declared = context.declared_results.as_ref().map(Vec::len).unwrap_or(0);
        let mut results = context.results.unwrap_or_default();
        if declared > 0 && results.is_empty() && !context.recovered {
            self.diagnostics.report(
                Diagnostic::error(Stage::Semantic, format!("'{}' declares results but never returns a value", name))
                    .with_symbol(name)
                    .at(location),
            )?;
        }

        // Latest declarations win: reallocation may have changed a shape
        for result in results.iter_mut() {
            if let Some(latest) = locals.iter().find(|v| v.name == result.name) {
                *result = latest.clone();
            }
        }
        let result_names: HashSet<&str> = results.iter().map(|r| r.name.as_str()).collect();
        locals.retain(|v| !v.is_argument && !result_names.contains(v.name.as_str()));

        Ok(FunctionDef {
            signature: FunctionSignature { name: name.to_string(), args, results, flags: header.flags.clone() },
            locals,
            body,
            doc,
            location: Some(location),
        })
    }

    fn function_argument(
        &mut self,
        param: &syntax::Param,
        spec: &TypeSpec,
        location: Option<Location>,
    ) -> CompileResult<FunctionArg> {
        let mut spec = spec.clone();
        spec.precision = resolve_precision(&spec.dtype, spec.precision);
        let mut var = Variable::argument(param.name.clone(), &spec);
        let default = match &param.default {
            None => None,
            Some(Expr::None) => {
                var.is_optional = true;
                Some(TypedExpr::Nil)
            }
            Some(value) => {
                let typed = self.annotate_expr(value, location)?;
                let TypedExpr::Literal(literal) = typed else {
                    return Err(CompileError::specification(format!(
                        "default value of '{}' must be a literal",
                        param.name
                    )));
                };
                let fits = literal.dtype().lattice_level() <= var.dtype.lattice_level() && var.rank == 0;
                if !fits {
                    return Err(CompileError::type_error(format!(
                        "default value of '{}' does not fit its type {}",
                        param.name, spec
                    )));
                }
                Some(self.convert_literal(literal, &var))
            }
        };
        Ok(FunctionArg { var, default })
    }

    /// Record a recoverable problem as an error, or escalate it to fatal
    pub(crate) fn recover(&mut self, err: CompileError, location: Option<Location>) -> CompileResult<()> {
        if is_recoverable(&err) {
            let symbol = self.function.as_ref().map(|f| f.name.clone());
            let mut diagnostic = Diagnostic::error(Stage::Semantic, err.to_string()).at(location);
            if let Some(symbol) = symbol {
                diagnostic = diagnostic.with_symbol(symbol);
            }
            self.diagnostics.report(diagnostic)
        } else {
            Err(self.fatal(err, location))
        }
    }

    pub(crate) fn fatal(&mut self, err: CompileError, location: Option<Location>) -> CompileError {
        self.diagnostics.fatal_from(Stage::Semantic, err, location)
    }

    pub(crate) fn warn(&mut self, message: impl Into<String>, location: Option<Location>) -> CompileResult<()> {
        self.diagnostics.report(Diagnostic::warning(Stage::Semantic, message).at(location))
    }

    /// A name not used by the source nor by an earlier temporary
    pub(crate) fn fresh_name(&mut self, prefix: &str) -> String {
        let Some(context) = self.function.as_mut() else {
            return prefix.to_string();
        };
        let mut k = 1;
        loop {
            let candidate = format!("{}_{:04}", prefix, k);
            if !context.reserved.contains(&candidate) && self.scopes.lookup(&candidate).is_none() {
                context.reserved.insert(candidate.clone());
                return candidate;
            }
            k += 1;
        }
    }
}

/// Type problems that leave the tree consistent
fn is_recoverable(err: &CompileError) -> bool {
    matches!(
        err,
        CompileError::TypeError { .. }
            | CompileError::ShapeMismatch { .. }
            | CompileError::Restriction { .. }
    )
}

fn is_main_guard(branches: &[(Expr, Vec<Statement>)]) -> bool {
    matches!(
        branches.first(),
        Some((Expr::Binary { op: Operator::Eq, left, right }, _))
            if **left == Expr::Name("__name__".to_string()) && **right == Expr::Str("__main__".to_string())
    )
}

/// Result variable of a declared type; array shapes are only known at run time
pub(crate) fn result_variable(name: &str, spec: &TypeSpec) -> Variable {
    let mut var = Variable::argument(name, spec);
    var.precision = resolve_precision(&spec.dtype, spec.precision);
    var.is_argument = false;
    var.is_temp = true;
    var
}

/// Every identifier a function definition mentions
fn source_names(def: &syntax::FunctionDef) -> HashSet<String> {
    let mut names: HashSet<String> = def.params.iter().map(|p| p.name.clone()).collect();
    names.insert(def.name.clone());
    for stmt in &def.body {
        statement_names(stmt, &mut names);
    }
    names
}

fn statement_names(stmt: &Statement, names: &mut HashSet<String>) {
    match &stmt.kind {
        StatementKind::Expr(e) | StatementKind::Return(Some(e)) => expr_names(e, names),
        StatementKind::Assign { target, value } | StatementKind::AugAssign { target, value, .. } => {
            expr_names(target, names);
            expr_names(value, names);
        }
        StatementKind::If { branches, orelse } => {
            for (cond, body) in branches {
                expr_names(cond, names);
                body.iter().for_each(|s| statement_names(s, names));
            }
            orelse.iter().for_each(|s| statement_names(s, names));
        }
        StatementKind::For { target, iter, body } => {
            names.insert(target.clone());
            expr_names(iter, names);
            body.iter().for_each(|s| statement_names(s, names));
        }
        StatementKind::While { cond, body } => {
            expr_names(cond, names);
            body.iter().for_each(|s| statement_names(s, names));
        }
        StatementKind::FunctionDef(def) => {
            names.extend(source_names(def));
        }
        _ => {}
    }
}

pub(crate) fn expr_names(expr: &Expr, names: &mut HashSet<String>) {
    match expr {
        Expr::Name(n) => {
            names.insert(n.clone());
        }
        Expr::Attribute { value, .. } => expr_names(value, names),
        Expr::Call { func, args, kwargs } => {
            expr_names(func, names);
            args.iter().for_each(|a| expr_names(a, names));
            kwargs.iter().for_each(|(_, a)| expr_names(a, names));
        }
        Expr::Subscript { value, indices } => {
            expr_names(value, names);
            for index in indices {
                match index {
                    Subscript::Index(e) => expr_names(e, names),
                    Subscript::Slice { start, stop, step } => {
                        for part in [start, stop, step].into_iter().flatten() {
                            expr_names(part, names);
                        }
                    }
                }
            }
        }
        Expr::Binary { left, right, .. } => {
            expr_names(left, names);
            expr_names(right, names);
        }
        Expr::Unary { operand, .. } => expr_names(operand, names),
        Expr::IfExp { cond, then, orelse } => {
            expr_names(cond, names);
            expr_names(then, names);
            expr_names(orelse, names);
        }
        Expr::Tuple(items) | Expr::List(items) => items.iter().for_each(|i| expr_names(i, names)),
        _ => {}
    }
}

/// Parse and annotate `source` in one go
pub fn annotate_source(
    source: &str,
    config: &CompilerConfig,
    diagnostics: &mut Diagnostics,
) -> CompileResult<Module> {
    let program = crate::parser::parse(source)?;
    let mut annotator = Annotator::new(config, diagnostics);
    let module = annotator.annotate(&program)?;
    diagnostics.check()?;
    Ok(module)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Dim, StmtKind};
    use crate::diagnostics::Severity;
    use crate::types::{DataType, Order};
    use pretty_assertions::assert_eq;

    fn annotate_ok(source: &str) -> Module {
        annotate_source(source, &CompilerConfig::default(), &mut Diagnostics::new()).unwrap()
    }

    #[test]
    fn test_scalar_function() {
        let module = annotate_ok("def f(x: int) -> int:\n    y = x * 2\n    return y + 1\n");
        let f = module.function("f").unwrap();
        assert_eq!(f.args().map(|a| a.name.as_str()).collect::<Vec<_>>(), vec!["x"]);
        assert_eq!(f.results().len(), 1);
        assert_eq!(f.results()[0].dtype, DataType::Integer);
        assert_eq!(f.results()[0].precision, 8);
        assert_eq!(f.locals.iter().map(|v| v.name.as_str()).collect::<Vec<_>>(), vec!["y"]);
    }

    #[test]
    fn test_array_expression_types() {
        let module = annotate_ok(
            "from numpy import zeros\ndef g(n: int):\n    a = zeros((n, 3), order='F')\n    b = a + 1\n",
        );
        let b = module.function("g").unwrap().variable("b").unwrap().clone();
        assert_eq!((b.dtype, b.rank, b.order), (DataType::Real, 2, Some(Order::F)));
        assert_eq!(b.shape, vec![Dim::Var("n".to_string()), Dim::Lit(3)]);
    }

    #[test]
    fn test_mixed_order_matmul_is_an_error() {
        let source = "from numpy import matmul\n\
                      def h(a: 'float[:,:]', b: 'float[:,:](order=F)'):\n    c = matmul(a, b)\n";
        let mut diagnostics = Diagnostics::new();
        let err = annotate_source(source, &CompilerConfig::default(), &mut diagnostics).unwrap_err();
        assert!(matches!(err, CompileError::Errors { .. }));
        assert_eq!(diagnostics.count(Severity::Error), 1);
    }

    #[test]
    fn test_optional_and_default_arguments() {
        let module = annotate_ok(
            "def f(x: int, y: float = 2, z: 'int' = None) -> float:\n    return x + y\n\
             def g() -> float:\n    return f(1, z=None) + f(2, 3.0)\n",
        );
        let f = module.function("f").unwrap();
        let y = &f.signature.args[1];
        assert_eq!(y.default, Some(TypedExpr::Literal(crate::ast::Literal::float(2.0).with_precision(8))));
        assert!(f.signature.args[2].is_optional());
        assert!(module.function("g").is_some());
    }

    #[test]
    fn test_call_before_definition() {
        let module = annotate_ok("def g(x: float) -> float:\n    return f(x) * 2.0\ndef f(x: float) -> float:\n    return x\n");
        let names: Vec<&str> = module.functions.iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["f", "g"]);
    }

    #[test]
    fn test_interface_members_and_dispatch() {
        let module = annotate_ok("@types('int')\n@types('float')\ndef f(x):\n    return x + 1\ndef g() -> float:\n    return f(1.5)\n");
        let interface = module.interface("f").unwrap();
        let names: Vec<&str> = interface.functions.iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["f_0", "f_1"]);
        assert!(interface.functions.iter().all(|f| f.signature.flags.is_interface_member));
        let StmtKind::Assign { rhs: TypedExpr::Call(call), .. } = &module.function("g").unwrap().body[0].kind else {
            panic!("Expected the call to be assigned to the result");
        };
        assert_eq!(call.callee.name, "f_1");
    }

    #[test]
    fn test_indistinguishable_overloads_are_fatal() {
        let source = "@types('int')\n@types('int64')\ndef f(x):\n    return x\n";
        let mut diagnostics = Diagnostics::new();
        let err = annotate_source(source, &CompilerConfig::default(), &mut diagnostics).unwrap_err();
        assert!(matches!(err, CompileError::Fatal(_)));
        assert_eq!(diagnostics.count(Severity::Fatal), 1);
    }

    #[test]
    fn test_undefined_symbol_is_fatal() {
        let mut diagnostics = Diagnostics::new();
        let err = annotate_source("def f(x: int):\n    y = x + q\n", &CompilerConfig::default(), &mut diagnostics)
            .unwrap_err();
        assert!(matches!(err, CompileError::Fatal(_)));
        assert!(diagnostics.render().contains("Undefined symbol: q"));
    }

    #[test]
    fn test_module_constants_and_main_guard() {
        let mut diagnostics = Diagnostics::new();
        let module = annotate_source(
            "N = 4\ndef f() -> int:\n    return N * 2\nif __name__ == '__main__':\n    print(f())\n",
            &CompilerConfig::default(),
            &mut diagnostics,
        )
        .unwrap();
        assert_eq!(module.constants.len(), 1);
        assert_eq!(module.constants[0].var.name, "N");
        assert_eq!(diagnostics.count(Severity::Warning), 1);
    }

    #[test]
    fn test_usage_index() {
        let program = crate::parser::parse("def f(x: int) -> int:\n    y = x\n    return y + x\n").unwrap();
        let mut diagnostics = Diagnostics::new();
        let mut annotator = Annotator::new(&CompilerConfig::default(), &mut diagnostics);
        annotator.annotate(&program).unwrap();
        assert_eq!(annotator.usages().locations("x").len(), 2);
    }

    #[test]
    fn test_unsupported_type_is_fatal() {
        let mut diagnostics = Diagnostics::new();
        let mut annotator = Annotator::new(&CompilerConfig::default(), &mut diagnostics);
        let restriction = CompileError::restriction("slices with a negative step", Language::C);
        annotator.recover(restriction, None).unwrap();
        let unsupported =
            CompileError::UnsupportedType { dtype: "float".to_string(), precision: 2, target: "c".to_string() };
        let err = annotator.recover(unsupported, None).unwrap_err();
        assert!(matches!(err, CompileError::Fatal(_)));
        assert_eq!(diagnostics.count(Severity::Error), 1);
        assert_eq!(diagnostics.count(Severity::Fatal), 1);
    }
}
