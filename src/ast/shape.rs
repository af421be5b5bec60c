//! Symbolic array dimensions
//!
//! Shapes are small closed expressions over literal sizes, integer scalar
//! variables and the runtime size of another array's axis.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::expr::TypedExpr;
use super::operators::Operator;
use crate::types::DataType;

/// One axis length
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dim {
    Lit(i64),
    /// An integer scalar variable
    Var(String),
    /// Runtime length of `var` along a (row-major numbered) axis
    SizeOf { var: String, axis: usize },
    Add(Box<Dim>, Box<Dim>),
    Sub(Box<Dim>, Box<Dim>),
    Mul(Box<Dim>, Box<Dim>),
    FloorDiv(Box<Dim>, Box<Dim>),
}

impl Dim {
    pub fn size_of(var: impl Into<String>, axis: usize) -> Self {
        Dim::SizeOf { var: var.into(), axis }
    }

    pub fn as_literal(&self) -> Option<i64> {
        match self {
            Dim::Lit(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_one(&self) -> bool {
        self.as_literal() == Some(1)
    }

    /// Fold constant sub-expressions and drop neutral elements
    pub fn simplify(&self) -> Dim {
        use Dim::*;
        match self {
            Add(a, b) => match (a.simplify(), b.simplify()) {
                (Lit(x), Lit(y)) => Lit(x + y),
                (x, Lit(0)) | (Lit(0), x) => x,
                (Sub(x, y), z) if *y == z => *x,
                (x, y) => Add(Box::new(x), Box::new(y)),
            },
            Sub(a, b) => match (a.simplify(), b.simplify()) {
                (Lit(x), Lit(y)) => Lit(x - y),
                (x, Lit(0)) => x,
                (x, y) if x == y => Lit(0),
                (Add(x, y), z) if *y == z => *x,
                (x, y) => Sub(Box::new(x), Box::new(y)),
            },
            Mul(a, b) => match (a.simplify(), b.simplify()) {
                (Lit(x), Lit(y)) => Lit(x * y),
                (Lit(0), _) | (_, Lit(0)) => Lit(0),
                (x, Lit(1)) | (Lit(1), x) => x,
                (x, y) => Mul(Box::new(x), Box::new(y)),
            },
            FloorDiv(a, b) => match (a.simplify(), b.simplify()) {
                (Lit(x), Lit(y)) if y != 0 => Lit(x.div_euclid(y)),
                (x, Lit(1)) => x,
                (x, y) => FloorDiv(Box::new(x), Box::new(y)),
            },
            other => other.clone(),
        }
    }

    /// Convert an integer scalar expression into a dimension, when it has
    /// the restricted form dimensions can express
    pub fn from_expr(expr: &TypedExpr) -> Option<Dim> {
        match expr {
            TypedExpr::Literal(lit) => lit.as_int().map(Dim::Lit),
            TypedExpr::Var(v) if v.rank == 0 && v.dtype == DataType::Integer => Some(Dim::Var(v.name.clone())),
            TypedExpr::Size(d) => Some(d.clone()),
            TypedExpr::Binary(b) => {
                let left = Box::new(Dim::from_expr(&b.left)?);
                let right = Box::new(Dim::from_expr(&b.right)?);
                match b.op {
                    Operator::Add => Some(Dim::Add(left, right)),
                    Operator::Sub => Some(Dim::Sub(left, right)),
                    Operator::Mul => Some(Dim::Mul(left, right)),
                    Operator::FloorDiv => Some(Dim::FloorDiv(left, right)),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Names of the variables this dimension refers to
    pub fn variables(&self) -> Vec<&str> {
        match self {
            Dim::Lit(_) => Vec::new(),
            Dim::Var(name) | Dim::SizeOf { var: name, .. } => vec![name.as_str()],
            Dim::Add(a, b) | Dim::Sub(a, b) | Dim::Mul(a, b) | Dim::FloorDiv(a, b) => {
                let mut v = a.variables();
                v.extend(b.variables());
                v
            }
        }
    }

    /// Replace references to array `from` by references to array `to`
    pub fn rename(&self, from: &str, to: &str) -> Dim {
        match self {
            Dim::Var(n) if n == from => Dim::Var(to.to_string()),
            Dim::SizeOf { var, axis } if var == from => Dim::SizeOf { var: to.to_string(), axis: *axis },
            Dim::Add(a, b) => Dim::Add(Box::new(a.rename(from, to)), Box::new(b.rename(from, to))),
            Dim::Sub(a, b) => Dim::Sub(Box::new(a.rename(from, to)), Box::new(b.rename(from, to))),
            Dim::Mul(a, b) => Dim::Mul(Box::new(a.rename(from, to)), Box::new(b.rename(from, to))),
            Dim::FloorDiv(a, b) => Dim::FloorDiv(Box::new(a.rename(from, to)), Box::new(b.rename(from, to))),
            other => other.clone(),
        }
    }

    /// Number of elements selected by `start:stop:step` on an axis of this length
    pub fn slice_length(&self, start: Option<Dim>, stop: Option<Dim>, step: Option<Dim>) -> Dim {
        let start = start.unwrap_or(Dim::Lit(0));
        let stop = stop.unwrap_or_else(|| self.clone());
        let extent = Dim::Sub(Box::new(stop), Box::new(start));
        match step {
            None => extent.simplify(),
            Some(step) if step.is_one() => extent.simplify(),
            Some(step) => {
                let rounded = Dim::Add(
                    Box::new(extent),
                    Box::new(Dim::Sub(Box::new(step.clone()), Box::new(Dim::Lit(1)))),
                );
                Dim::FloorDiv(Box::new(rounded), Box::new(step)).simplify()
            }
        }
    }
}

/// Two dimensions may describe the same axis length; symbolic sizes match anything
pub fn dims_compatible(a: &Dim, b: &Dim) -> bool {
    match (a.simplify(), b.simplify()) {
        (Dim::Lit(x), Dim::Lit(y)) => x == y,
        _ => true,
    }
}

fn fmt_operand(f: &mut fmt::Formatter<'_>, d: &Dim) -> fmt::Result {
    match d {
        Dim::Add(..) | Dim::Sub(..) => write!(f, "({})", d),
        _ => write!(f, "{}", d),
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Lit(n) => write!(f, "{}", n),
            Dim::Var(name) => write!(f, "{}", name),
            Dim::SizeOf { var, axis } => write!(f, "{}.shape[{}]", var, axis),
            Dim::Add(a, b) => write!(f, "{} + {}", a, b),
            Dim::Sub(a, b) => {
                write!(f, "{} - ", a)?;
                fmt_operand(f, b)
            }
            Dim::Mul(a, b) => {
                fmt_operand(f, a)?;
                write!(f, " * ")?;
                fmt_operand(f, b)
            }
            Dim::FloorDiv(a, b) => {
                fmt_operand(f, a)?;
                write!(f, " // ")?;
                fmt_operand(f, b)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_simplify_constants() {
        let d = Dim::Mul(
            Box::new(Dim::Add(Box::new(Dim::Lit(1)), Box::new(Dim::Lit(2)))),
            Box::new(Dim::Lit(4)),
        );
        assert_eq!(d.simplify(), Dim::Lit(12));
    }

    #[test]
    fn test_simplify_keeps_symbols() {
        let n = Dim::Var("n".to_string());
        let d = Dim::Sub(Box::new(Dim::Add(Box::new(n.clone()), Box::new(Dim::Lit(1)))), Box::new(Dim::Lit(1)));
        assert_eq!(d.simplify(), n);
        assert_eq!(Dim::Mul(Box::new(n.clone()), Box::new(Dim::Lit(1))).simplify(), n);
    }

    #[test]
    fn test_slice_length() {
        let axis = Dim::Lit(10);
        assert_eq!(axis.slice_length(Some(Dim::Lit(2)), None, None), Dim::Lit(8));
        assert_eq!(axis.slice_length(None, None, Some(Dim::Lit(3))), Dim::Lit(4));

        let axis = Dim::size_of("a", 0);
        assert_eq!(
            axis.slice_length(Some(Dim::Lit(1)), None, None).to_string(),
            "a.shape[0] - 1"
        );
    }

    #[test]
    fn test_compatibility() {
        assert!(dims_compatible(&Dim::Lit(3), &Dim::Lit(3)));
        assert!(!dims_compatible(&Dim::Lit(3), &Dim::Lit(4)));
        assert!(dims_compatible(&Dim::Var("n".to_string()), &Dim::Lit(4)));
    }
}
