//! Function headers: decorators and annotations
//!
//! A header fixes the type of every argument and, optionally, of the
//! results. It comes either from one or more `@types(...)` decorators or
//! from PEP-484 annotations on the parameters. Several `@types` decorators
//! produce one overload each.

use crate::ast::syntax::{Decorator, Expr, FunctionDef};
use crate::ast::FunctionFlags;
use crate::diagnostics::{Diagnostic, Diagnostics, Stage};
use crate::error::{CompileError, CompileResult};
use crate::types::{self, TypeSpec};

/// Argument and result types of one overload
#[derive(Debug, Clone, PartialEq)]
pub struct Overload {
    pub args: Vec<TypeSpec>,
    /// `None` when the results are inferred from `return` statements
    pub results: Option<Vec<TypeSpec>>,
}

/// Everything the decorators and annotations say about a function
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionHeader {
    pub overloads: Vec<Overload>,
    pub flags: FunctionFlags,
    /// Locals to place in automatic storage
    pub stack_arrays: Vec<String>,
}

impl FunctionHeader {
    pub fn is_interface(&self) -> bool {
        self.overloads.len() > 1
    }
}

/// Type of an annotation or header argument
pub fn type_spec_from_expr(expr: &Expr) -> CompileResult<TypeSpec> {
    match expr {
        Expr::Str(text) => TypeSpec::parse(text),
        Expr::Name(_) | Expr::Attribute { .. } => {
            let name = expr
                .dotted_name()
                .ok_or_else(|| CompileError::specification("invalid type annotation"))?;
            types::lookup(&name)
                .map(|(dtype, precision)| TypeSpec::scalar(dtype, precision))
                .ok_or_else(|| CompileError::specification(format!("unknown type '{}'", name)))
        }
        // `float[:,:]` written without quotes
        Expr::Subscript { value, indices } => {
            let base = value
                .dotted_name()
                .ok_or_else(|| CompileError::specification("invalid type annotation"))?;
            let full = indices.iter().all(|s| {
                matches!(s, crate::ast::syntax::Subscript::Slice { start: None, stop: None, step: None })
            });
            if !full {
                return Err(CompileError::specification(format!(
                    "array annotation of '{}' may only contain ':'",
                    base
                )));
            }
            TypeSpec::parse(&format!("{}[{}]", base, vec![":"; indices.len()].join(",")))
        }
        _ => Err(CompileError::specification("invalid type annotation")),
    }
}

fn result_specs(expr: &Expr) -> CompileResult<Vec<TypeSpec>> {
    match expr {
        Expr::None => Ok(Vec::new()),
        Expr::Tuple(items) | Expr::List(items) => items.iter().map(type_spec_from_expr).collect(),
        other => Ok(vec![type_spec_from_expr(other)?]),
    }
}

fn string_args(decorator: &Decorator) -> CompileResult<Vec<String>> {
    decorator
        .args
        .iter()
        .map(|a| match a {
            Expr::Str(s) => Ok(s.clone()),
            Expr::Name(n) => Ok(n.clone()),
            _ => Err(CompileError::specification(format!(
                "arguments of @{} must be variable names",
                decorator.name
            ))),
        })
        .collect()
}

fn types_overload(def: &FunctionDef, decorator: &Decorator) -> CompileResult<Overload> {
    let args = decorator
        .args
        .iter()
        .map(type_spec_from_expr)
        .collect::<CompileResult<Vec<_>>>()?;
    if args.len() != def.params.len() {
        return Err(CompileError::specification(format!(
            "@types of '{}' lists {} types for {} arguments",
            def.name,
            args.len(),
            def.params.len()
        )));
    }
    let mut results = None;
    for (key, value) in &decorator.kwargs {
        if key != "results" {
            return Err(CompileError::specification(format!(
                "unexpected keyword '{}' in @types of '{}'",
                key, def.name
            )));
        }
        results = Some(result_specs(value)?);
    }
    Ok(Overload { args, results })
}

fn annotated_overload(def: &FunctionDef) -> CompileResult<Overload> {
    let args = def
        .params
        .iter()
        .map(|p| match &p.annotation {
            Some(annotation) => type_spec_from_expr(annotation),
            None => Err(CompileError::specification(format!(
                "argument '{}' of '{}' has no type",
                p.name, def.name
            ))),
        })
        .collect::<CompileResult<Vec<_>>>()?;
    let results = def.returns.as_ref().map(result_specs).transpose()?;
    Ok(Overload { args, results })
}

/// Read the decorators and annotations of `def`
pub fn parse_header(def: &FunctionDef, diagnostics: &mut Diagnostics) -> CompileResult<FunctionHeader> {
    let mut overloads = Vec::new();
    let mut flags = FunctionFlags::default();
    let mut stack_arrays = Vec::new();

    for decorator in &def.decorators {
        match decorator.name.as_str() {
            "types" => overloads.push(types_overload(def, decorator)?),
            "pure" => flags.is_pure = true,
            "elemental" => flags.is_elemental = true,
            "private" => flags.is_private = true,
            "inline" => flags.is_inline = true,
            "stack_array" => stack_arrays.extend(string_args(decorator)?),
            "allow_negative_index" => {
                string_args(decorator)?;
            }
            other => {
                diagnostics.report(
                    Diagnostic::warning(Stage::Semantic, format!("unknown decorator '{}' is ignored", other))
                        .with_symbol(def.name.clone())
                        .at(decorator.location),
                )?;
            }
        }
    }

    if overloads.is_empty() {
        overloads.push(annotated_overload(def)?);
    }
    if flags.is_elemental {
        let array = overloads.iter().flat_map(|o| o.args.iter()).any(|a| a.rank > 0);
        if array {
            return Err(CompileError::specification(format!(
                "elemental function '{}' must take scalar arguments",
                def.name
            )));
        }
    }
    Ok(FunctionHeader { overloads, flags, stack_arrays })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::ast::syntax::StatementKind;
    use crate::types::{DataType, Order};
    use pretty_assertions::assert_eq;

    fn header(source: &str) -> CompileResult<FunctionHeader> {
        let program = parse(source).unwrap();
        let StatementKind::FunctionDef(def) = &program.body[0].kind else {
            panic!("Expected function definition");
        };
        parse_header(def, &mut Diagnostics::new())
    }

    #[test]
    fn test_types_decorator_with_results() {
        let h = header("@types('int', 'float[:,:](order=F)', results='float')\ndef f(n, a):\n    pass\n").unwrap();
        assert_eq!(h.overloads.len(), 1);
        let o = &h.overloads[0];
        assert_eq!(o.args[0], TypeSpec::scalar(DataType::Integer, 0));
        assert_eq!((o.args[1].rank, o.args[1].order), (2, Some(Order::F)));
        assert_eq!(o.results, Some(vec![TypeSpec::scalar(DataType::Real, 0)]));
    }

    #[test]
    fn test_annotations() {
        let h = header("def f(x: int, y: 'float32[:]') -> float:\n    pass\n").unwrap();
        let o = &h.overloads[0];
        assert_eq!(o.args[1], TypeSpec { dtype: DataType::Real, precision: 4, rank: 1, order: None });
        assert_eq!(o.results.as_ref().map(Vec::len), Some(1));
        assert!(!h.is_interface());
    }

    #[test]
    fn test_several_types_make_an_interface() {
        let h = header("@types('int')\n@types('float')\ndef f(x):\n    pass\n").unwrap();
        assert!(h.is_interface());
    }

    #[test]
    fn test_header_errors() {
        assert!(matches!(
            header("@types('int', 'int')\ndef f(x):\n    pass\n"),
            Err(CompileError::Specification { .. })
        ));
        assert!(matches!(
            header("@types('int', returns='int')\ndef f(x):\n    pass\n"),
            Err(CompileError::Specification { .. })
        ));
        assert!(matches!(header("def f(x):\n    pass\n"), Err(CompileError::Specification { .. })));
    }

    #[test]
    fn test_flags_and_unknown_decorator() {
        let program = parse("@pure\n@stack_array('tmp')\n@fancy\ndef f(x: int):\n    pass\n").unwrap();
        let StatementKind::FunctionDef(def) = &program.body[0].kind else {
            panic!("Expected function definition");
        };
        let mut diagnostics = Diagnostics::new();
        let h = parse_header(def, &mut diagnostics).unwrap();
        assert!(h.flags.is_pure);
        assert_eq!(h.stack_arrays, vec!["tmp".to_string()]);
        assert_eq!(diagnostics.num_messages(), 1);
        assert!(!diagnostics.has_errors());
    }
}
