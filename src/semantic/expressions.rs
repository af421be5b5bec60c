//! Typing of expressions

use std::f64::consts::PI;

use tracing::trace;

use super::calls::library_member;
use super::{Annotator, Symbol};
use crate::ast::syntax::{Expr, Subscript};
use crate::ast::{
    BinaryOp, Dim, IfTernary, Index, IndexedElement, Literal, LiteralValue, Operator, Slice, TypedExpr, UnaryOp,
    UnaryOperator, Variable,
};
use crate::diagnostics::Location;
use crate::error::{CompileError, CompileResult};
use crate::types::DataType;

/// Integer scalar expressions can index and size arrays
pub(crate) fn is_integer_scalar(e: &TypedExpr) -> bool {
    e.rank() == 0 && matches!(e.dtype(), DataType::Integer | DataType::Bool) && !matches!(e, TypedExpr::Nil)
}

/// `(a.shape[0], a.shape[1], ...)`
pub(crate) fn shape_tuple(e: &TypedExpr) -> TypedExpr {
    TypedExpr::Tuple(e.shape().into_iter().map(TypedExpr::Size).collect())
}

fn negated(literal: &Literal) -> Option<TypedExpr> {
    let value = match literal.value {
        LiteralValue::Int(n) => LiteralValue::Int(-n),
        LiteralValue::Float(x) => LiteralValue::Float(-x),
        LiteralValue::Complex { re, im } => LiteralValue::Complex { re: -re, im: -im },
        _ => return None,
    };
    Some(TypedExpr::Literal(Literal { value, precision: literal.precision }))
}

impl Annotator<'_> {
    pub(crate) fn annotate_expr(&mut self, expr: &Expr, location: Option<Location>) -> CompileResult<TypedExpr> {
        let typed = match expr {
            Expr::Name(name) => self.annotate_name(name, location)?,
            Expr::Int(n) => TypedExpr::Literal(Literal::int(*n)),
            Expr::Float(x) => TypedExpr::Literal(Literal::float(*x)),
            Expr::Imag(x) => TypedExpr::Literal(Literal::complex(0.0, *x)),
            Expr::Str(s) => TypedExpr::Literal(Literal::string(s.clone())),
            Expr::Bool(b) => TypedExpr::Literal(Literal::boolean(*b)),
            Expr::None => TypedExpr::Nil,
            Expr::Attribute { value, attr } => self.annotate_attribute(expr, value, attr, location)?,
            Expr::Call { func, args, kwargs } => self.annotate_call(func, args, kwargs, location)?,
            Expr::Subscript { value, indices } => self.annotate_subscript(value, indices, location)?,
            Expr::Binary { op, left, right } => {
                let left = self.annotate_expr(left, location)?;
                let right = self.annotate_expr(right, location)?;
                TypedExpr::Binary(BinaryOp::new(*op, left, right)?)
            }
            Expr::Unary { op, operand } => {
                let operand = self.annotate_expr(operand, location)?;
                let folded = match (op, &operand) {
                    (UnaryOperator::Neg, TypedExpr::Literal(lit)) => negated(lit),
                    _ => None,
                };
                let passthrough = *op == UnaryOperator::Pos && operand.dtype().is_numeric()
                    && operand.dtype() != DataType::Bool;
                match folded {
                    Some(folded) => folded,
                    None if passthrough => operand,
                    None => TypedExpr::Unary(UnaryOp::new(*op, operand)?),
                }
            }
            Expr::IfExp { cond, then, orelse } => {
                let cond = self.annotate_expr(cond, location)?;
                let then = self.annotate_expr(then, location)?;
                let orelse = self.annotate_expr(orelse, location)?;
                TypedExpr::IfTernary(IfTernary::new(cond, then, orelse)?)
            }
            Expr::Tuple(items) => TypedExpr::Tuple(
                items
                    .iter()
                    .map(|i| self.annotate_expr(i, location))
                    .collect::<CompileResult<Vec<_>>>()?,
            ),
            Expr::List(_) => {
                return Err(CompileError::restriction("lists outside of array(...)", self.language));
            }
        };
        trace!(expr = %typed, dtype = %typed.dtype(), rank = typed.rank(), "typed expression");
        Ok(typed)
    }

    pub(crate) fn annotate_name(&mut self, name: &str, location: Option<Location>) -> CompileResult<TypedExpr> {
        self.scopes.record_usage(name, location);
        match self.scopes.lookup(name) {
            Some(Symbol::Variable(v)) => Ok(TypedExpr::Var(v.clone())),
            Some(Symbol::Constant(var, _)) => Ok(TypedExpr::Var(var.clone())),
            Some(Symbol::Library(lib)) if lib == "pi" => Ok(TypedExpr::Literal(Literal::float(PI))),
            Some(_) => Err(CompileError::type_error(format!("'{}' cannot be used as a value", name))),
            None if self.is_pending(name) || self.is_in_progress(name) => {
                Err(CompileError::type_error(format!("function '{}' cannot be used as a value", name)))
            }
            None => Err(CompileError::undefined(name)),
        }
    }

    /// Library name behind `np.linalg.norm` and similar dotted chains
    pub(crate) fn resolve_dotted(&self, expr: &Expr) -> Option<String> {
        let dotted = expr.dotted_name()?;
        let mut parts = dotted.split('.');
        let Some(Symbol::Module(mut module)) = self.scopes.lookup(parts.next()?).cloned() else {
            return None;
        };
        let mut parts = parts.peekable();
        while let Some(part) = parts.next() {
            match library_member(&module, part)? {
                Symbol::Module(sub) => module = sub,
                Symbol::Library(name) if parts.peek().is_none() => return Some(name),
                _ => return None,
            }
        }
        None
    }

    fn annotate_attribute(
        &mut self,
        expr: &Expr,
        value: &Expr,
        attr: &str,
        location: Option<Location>,
    ) -> CompileResult<TypedExpr> {
        if let Some(name) = self.resolve_dotted(expr) {
            if name == "pi" {
                return Ok(TypedExpr::Literal(Literal::float(PI)));
            }
            return Err(CompileError::type_error(format!(
                "'{}' cannot be used as a value",
                expr.dotted_name().unwrap_or(name)
            )));
        }
        if let Some(Symbol::Module(module)) = value.dotted_name().and_then(|n| self.scopes.lookup(&n).cloned()) {
            return Err(CompileError::undefined(format!("{}.{}", module, attr)));
        }
        let base = self.annotate_expr(value, location)?;
        match attr {
            "shape" if base.rank() > 0 => Ok(shape_tuple(&base)),
            "size" if base.rank() > 0 => {
                let total = base.shape().into_iter().reduce(|a, b| Dim::Mul(Box::new(a), Box::new(b)));
                Ok(TypedExpr::Size(total.map(|d| d.simplify()).unwrap_or(Dim::Lit(1))))
            }
            _ => Err(CompileError::restriction(format!("attribute '{}'", attr), self.language)),
        }
    }

    /// Index expression for one axis, turning literal negative indices into
    /// offsets from the axis length
    fn index_expr(
        &mut self,
        e: &Expr,
        base: &Variable,
        axis: usize,
        location: Option<Location>,
    ) -> CompileResult<TypedExpr> {
        let typed = self.annotate_expr(e, location)?;
        if let TypedExpr::Literal(Literal { value: LiteralValue::Int(n), .. }) = &typed {
            let n = *n;
            if n < 0 {
                let length = TypedExpr::Size(base.shape[axis].clone());
                return Ok(TypedExpr::Binary(BinaryOp::new(Operator::Sub, length, TypedExpr::int(-n))?));
            }
        }
        if typed.rank() > 0 {
            return Err(CompileError::restriction("indexing with arrays", self.language));
        }
        Ok(typed)
    }

    pub(crate) fn annotate_subscript(
        &mut self,
        value: &Expr,
        indices: &[Subscript],
        location: Option<Location>,
    ) -> CompileResult<TypedExpr> {
        let base = self.annotate_expr(value, location)?;
        let var = match base {
            TypedExpr::Var(v) if v.rank > 0 => v,
            // `a.shape[k]`, `shape(a)[k]`
            TypedExpr::Tuple(items) => {
                let [Subscript::Index(index)] = indices else {
                    return Err(CompileError::restriction("slicing a tuple", self.language));
                };
                let k = match self.annotate_expr(index, location)? {
                    TypedExpr::Literal(Literal { value: LiteralValue::Int(k), .. }) => k,
                    _ => return Err(CompileError::type_error("tuples can only be indexed by integer literals")),
                };
                let position = if k < 0 { items.len() as i64 + k } else { k };
                return usize::try_from(position)
                    .ok()
                    .and_then(|p| items.get(p).cloned())
                    .ok_or_else(|| CompileError::type_error(format!("tuple index {} out of range", k)));
            }
            other => {
                return Err(CompileError::type_error(format!("'{}' is not subscriptable", other)));
            }
        };
        if indices.len() > var.rank {
            return Err(CompileError::type_error(format!(
                "too many indices for '{}': rank {}, got {}",
                var.name,
                var.rank,
                indices.len()
            )));
        }

        let mut typed = Vec::with_capacity(indices.len());
        for (axis, index) in indices.iter().enumerate() {
            let index = match index {
                Subscript::Index(e) => Index::Elem(self.index_expr(e, &var, axis, location)?),
                Subscript::Slice { start, stop, step } => {
                    let step = step.as_ref().map(|s| self.annotate_expr(s, location)).transpose()?;
                    if let Some(TypedExpr::Literal(Literal { value: LiteralValue::Int(n), .. })) = &step {
                        if *n <= 0 {
                            return Err(CompileError::restriction("non-positive slice steps", self.language));
                        }
                    }
                    let start = start.as_ref().map(|s| self.index_expr(s, &var, axis, location)).transpose()?;
                    let stop = stop.as_ref().map(|s| self.index_expr(s, &var, axis, location)).transpose()?;
                    Index::Slice(Slice::new(start, stop, step)?)
                }
            };
            typed.push(index);
        }
        Ok(TypedExpr::Indexed(IndexedElement::new(var, typed)?))
    }

    /// A literal stored in a variable of `target`'s type
    pub(crate) fn convert_literal(&self, literal: Literal, target: &Variable) -> TypedExpr {
        let value = match (&literal.value, &target.dtype) {
            (LiteralValue::Int(n), DataType::Real) => LiteralValue::Float(*n as f64),
            (LiteralValue::Int(n), DataType::Complex) => LiteralValue::Complex { re: *n as f64, im: 0.0 },
            (LiteralValue::Float(x), DataType::Complex) => LiteralValue::Complex { re: *x, im: 0.0 },
            (LiteralValue::Bool(b), DataType::Integer) => LiteralValue::Int(i64::from(*b)),
            (value, _) => value.clone(),
        };
        TypedExpr::Literal(Literal { value, precision: target.precision })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerConfig;
    use crate::diagnostics::Diagnostics;
    use crate::semantic::ScopeKind;
    use crate::types::TypeSpec;
    use pretty_assertions::assert_eq;

    fn with_annotator<T>(f: impl FnOnce(&mut Annotator<'_>) -> T) -> T {
        let mut diagnostics = Diagnostics::new();
        let mut annotator = Annotator::new(&CompilerConfig::default(), &mut diagnostics);
        annotator.scopes.push(ScopeKind::Function);
        let a = Variable::argument("a", &TypeSpec::parse("float[:,:]").unwrap());
        annotator.scopes.insert("a", Symbol::Variable(a));
        annotator.scopes.insert("n", Symbol::Variable(Variable::new("n", DataType::Integer, 8)));
        annotator.scopes.insert_global("np", Symbol::Module("numpy".to_string()));
        f(&mut annotator)
    }

    fn expr(source: &str) -> Expr {
        match &crate::parser::parse(source).unwrap().body[0].kind {
            crate::ast::syntax::StatementKind::Expr(e) => e.clone(),
            other => panic!("Expected expression, got {:?}", other),
        }
    }

    #[test]
    fn test_negative_index_uses_axis_length() {
        let typed = with_annotator(|an| an.annotate_expr(&expr("a[-1, 0]"), None)).unwrap();
        assert_eq!(typed.rank(), 0);
        assert_eq!(typed.to_string(), "a[a.shape[0] - 1, 0]");
    }

    #[test]
    fn test_shape_attribute_and_index() {
        let typed = with_annotator(|an| an.annotate_expr(&expr("a.shape[1]"), None)).unwrap();
        assert_eq!(typed, TypedExpr::Size(Dim::size_of("a", 1)));
    }

    #[test]
    fn test_promotion_through_binary() {
        let typed = with_annotator(|an| an.annotate_expr(&expr("n * 2.0 + 1j"), None)).unwrap();
        assert_eq!(typed.dtype(), DataType::Complex);
    }

    #[test]
    fn test_pi_from_module() {
        let typed = with_annotator(|an| an.annotate_expr(&expr("np.pi"), None)).unwrap();
        assert_eq!(typed, TypedExpr::Literal(Literal::float(PI)));
    }

    #[test]
    fn test_undefined_name() {
        let err = with_annotator(|an| an.annotate_expr(&expr("b + 1"), None)).unwrap_err();
        assert!(matches!(err, CompileError::UndefinedSymbol { .. }));
    }

    #[test]
    fn test_negative_literal_folding() {
        let typed = with_annotator(|an| an.annotate_expr(&expr("-2.5"), None)).unwrap();
        assert_eq!(typed, TypedExpr::Literal(Literal::float(-2.5)));
    }
}
