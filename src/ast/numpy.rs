//! Numeric library nodes (`numpy`, `math`)
//!
//! Each node infers its result type from its operands. Constructors enforce
//! the operand allow-lists so that malformed trees are rejected when they are
//! built rather than in a later pass.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::expr::{Literal, TypedExpr};
use super::operators::{dominant, widest_precision};
use super::shape::Dim;
use crate::error::{CompileError, CompileResult};
use crate::types::{DataType, Order, Precision};

fn require_numeric(func: &str, e: &TypedExpr) -> CompileResult<()> {
    if matches!(e, TypedExpr::Tuple(_) | TypedExpr::Nil) || !e.dtype().is_numeric() {
        return Err(CompileError::type_error(format!(
            "argument of {} must be numeric, got {}",
            func,
            e.dtype()
        )));
    }
    Ok(())
}

/// Initial content of an allocated array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FillKind {
    Zeros,
    Ones,
    Empty,
    Full(Box<TypedExpr>),
}

/// `zeros`, `ones`, `empty`, `full` (and their `*_like` forms)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayCreation {
    pub fill: FillKind,
    pub shape: Vec<Dim>,
    pub dtype: DataType,
    pub precision: Precision,
    pub order: Option<Order>,
}

impl ArrayCreation {
    pub fn new(
        fill: FillKind,
        shape: Vec<Dim>,
        dtype: Option<(DataType, Precision)>,
        order: Option<Order>,
    ) -> CompileResult<Self> {
        if let FillKind::Full(value) = &fill {
            require_numeric("full", value)?;
            if value.rank() != 0 {
                return Err(CompileError::type_error("fill value of full must be a scalar"));
            }
        }
        let (dtype, precision) = match (dtype, &fill) {
            (Some(explicit), _) => explicit,
            (None, FillKind::Full(value)) => (value.dtype(), value.precision()),
            (None, _) => (DataType::Real, 0),
        };
        let order = if shape.len() >= 2 { Some(order.unwrap_or_default()) } else { None };
        Ok(Self { fill, shape, dtype, precision, order })
    }

    /// Value every element starts with; `None` for `empty`
    pub fn fill_value(&self) -> Option<TypedExpr> {
        let literal = |n: i64| {
            let lit = match self.dtype {
                DataType::Bool => Literal::boolean(n != 0),
                DataType::Integer => Literal::int(n),
                DataType::Complex => Literal::complex(n as f64, 0.0),
                _ => Literal::float(n as f64),
            };
            TypedExpr::Literal(lit.with_precision(self.precision))
        };
        match &self.fill {
            FillKind::Zeros => Some(literal(0)),
            FillKind::Ones => Some(literal(1)),
            FillKind::Empty => None,
            FillKind::Full(value) => Some((**value).clone()),
        }
    }
}

/// `array([[1, 2], [3, 4]])`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayLiteral {
    /// Elements in row-major order
    pub elements: Vec<TypedExpr>,
    pub shape: Vec<usize>,
    pub dtype: DataType,
    pub precision: Precision,
    pub order: Option<Order>,
}

impl ArrayLiteral {
    pub fn new(
        elements: Vec<TypedExpr>,
        shape: Vec<usize>,
        dtype: Option<(DataType, Precision)>,
        order: Option<Order>,
    ) -> CompileResult<Self> {
        if shape.iter().product::<usize>() != elements.len() || elements.is_empty() {
            return Err(CompileError::type_error("array literal must be a non-empty rectangular list"));
        }
        for e in &elements {
            require_numeric("array", e)?;
            if e.rank() != 0 {
                return Err(CompileError::type_error("array literal elements must be scalars"));
            }
        }
        let (dtype, precision) = match dtype {
            Some(explicit) => explicit,
            None => {
                let mut dtype = elements[0].dtype();
                for e in &elements[1..] {
                    dtype = dtype.promote(&e.dtype())?;
                }
                let precision = widest_precision(&dtype, &elements);
                (dtype, precision)
            }
        };
        let order = if shape.len() >= 2 { Some(order.unwrap_or_default()) } else { None };
        Ok(Self { elements, shape, dtype, precision, order })
    }
}

/// `linspace(start, stop, num)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Linspace {
    pub start: Box<TypedExpr>,
    pub stop: Box<TypedExpr>,
    pub num: Dim,
}

impl Linspace {
    pub fn new(start: TypedExpr, stop: TypedExpr, num: Dim) -> CompileResult<Self> {
        for e in [&start, &stop] {
            require_numeric("linspace", e)?;
            if e.rank() != 0 {
                return Err(CompileError::type_error("linspace bounds must be scalars"));
            }
        }
        Ok(Self { start: Box::new(start), stop: Box::new(stop), num })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReductionKind {
    Sum,
    Prod,
    Norm,
}

/// `sum`, `prod` and `linalg.norm`, optionally along one axis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reduction {
    pub kind: ReductionKind,
    pub arg: Box<TypedExpr>,
    pub axis: Option<usize>,
}

impl Reduction {
    pub fn new(kind: ReductionKind, arg: TypedExpr, axis: Option<usize>) -> CompileResult<Self> {
        require_numeric("a reduction", &arg)?;
        if let Some(axis) = axis {
            if axis >= arg.rank() {
                return Err(CompileError::type_error(format!(
                    "axis {} is out of bounds for an array of rank {}",
                    axis,
                    arg.rank()
                )));
            }
        }
        Ok(Self { kind, arg: Box::new(arg), axis })
    }

    pub fn result_dtype(&self) -> DataType {
        match self.kind {
            ReductionKind::Norm => DataType::Real,
            _ => self.arg.dtype(),
        }
    }

    pub fn result_precision(&self) -> Precision {
        match (self.kind, self.arg.dtype()) {
            (ReductionKind::Norm, DataType::Real | DataType::Complex) => self.arg.precision(),
            (ReductionKind::Norm, _) => 0,
            _ => self.arg.precision(),
        }
    }

    pub fn result_rank(&self) -> usize {
        match self.axis {
            Some(_) => self.arg.rank() - 1,
            None => 0,
        }
    }

    pub fn result_shape(&self) -> Vec<Dim> {
        match self.axis {
            Some(axis) => {
                let mut shape = self.arg.shape();
                shape.remove(axis);
                shape
            }
            None => Vec::new(),
        }
    }
}

/// `matmul(a, b)` / `a @ b`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matmul {
    pub a: Box<TypedExpr>,
    pub b: Box<TypedExpr>,
}

impl Matmul {
    pub fn new(a: TypedExpr, b: TypedExpr) -> CompileResult<Self> {
        require_numeric("matmul", &a)?;
        require_numeric("matmul", &b)?;
        if !(1..=2).contains(&a.rank()) || !(1..=2).contains(&b.rank()) {
            return Err(CompileError::type_error("matmul operands must be vectors or matrices"));
        }
        if let (Some(oa), Some(ob)) = (a.order(), b.order()) {
            if oa != ob {
                return Err(CompileError::type_error("mixed order not supported in matmul"));
            }
        }
        Ok(Self { a: Box::new(a), b: Box::new(b) })
    }

    pub fn result_rank(&self) -> usize {
        match (self.a.rank(), self.b.rank()) {
            (1, 1) => 0,
            (2, 2) => 2,
            _ => 1,
        }
    }

    pub fn result_shape(&self) -> Vec<Dim> {
        let (sa, sb) = (self.a.shape(), self.b.shape());
        match (sa.len(), sb.len()) {
            (2, 2) => vec![sa[0].clone(), sb[1].clone()],
            (2, 1) => vec![sa[0].clone()],
            (1, 2) => vec![sb[1].clone()],
            _ => Vec::new(),
        }
    }

    pub fn result_order(&self) -> Option<Order> {
        if self.result_rank() == 2 {
            Some(self.a.order().or(self.b.order()).unwrap_or_default())
        } else {
            None
        }
    }
}

/// Elementwise math functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MathFunction {
    Sqrt,
    Exp,
    Log,
    Sin,
    Cos,
    Tan,
    Arcsin,
    Arccos,
    Arctan,
    Sinh,
    Cosh,
    Tanh,
    Floor,
    Abs,
}

impl MathFunction {
    pub fn from_name(name: &str) -> Option<Self> {
        let f = match name {
            "sqrt" => MathFunction::Sqrt,
            "exp" => MathFunction::Exp,
            "log" => MathFunction::Log,
            "sin" => MathFunction::Sin,
            "cos" => MathFunction::Cos,
            "tan" => MathFunction::Tan,
            "arcsin" | "asin" => MathFunction::Arcsin,
            "arccos" | "acos" => MathFunction::Arccos,
            "arctan" | "atan" => MathFunction::Arctan,
            "sinh" => MathFunction::Sinh,
            "cosh" => MathFunction::Cosh,
            "tanh" => MathFunction::Tanh,
            "floor" => MathFunction::Floor,
            "abs" | "absolute" | "fabs" => MathFunction::Abs,
            _ => return None,
        };
        Some(f)
    }

    pub fn name(&self) -> &'static str {
        match self {
            MathFunction::Sqrt => "sqrt",
            MathFunction::Exp => "exp",
            MathFunction::Log => "log",
            MathFunction::Sin => "sin",
            MathFunction::Cos => "cos",
            MathFunction::Tan => "tan",
            MathFunction::Arcsin => "asin",
            MathFunction::Arccos => "acos",
            MathFunction::Arctan => "atan",
            MathFunction::Sinh => "sinh",
            MathFunction::Cosh => "cosh",
            MathFunction::Tanh => "tanh",
            MathFunction::Floor => "floor",
            MathFunction::Abs => "abs",
        }
    }
}

impl fmt::Display for MathFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// `sqrt(x)` and friends, applied elementwise
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MathCall {
    pub func: MathFunction,
    pub arg: Box<TypedExpr>,
}

impl MathCall {
    pub fn new(func: MathFunction, arg: TypedExpr) -> CompileResult<Self> {
        require_numeric(func.name(), &arg)?;
        Ok(Self { func, arg: Box::new(arg) })
    }

    pub fn result_dtype(&self) -> DataType {
        match (self.func, self.arg.dtype()) {
            (MathFunction::Abs, DataType::Complex) => DataType::Real,
            (MathFunction::Abs, DataType::Bool) => DataType::Integer,
            (MathFunction::Abs, other) => other,
            (MathFunction::Floor, _) => DataType::Real,
            (_, DataType::Complex) => DataType::Complex,
            _ => DataType::Real,
        }
    }

    pub fn result_precision(&self) -> Precision {
        match self.arg.dtype() {
            DataType::Real | DataType::Complex => self.arg.precision(),
            DataType::Integer if self.func == MathFunction::Abs => self.arg.precision(),
            _ => 0,
        }
    }
}

/// Numeric library call nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NumpyFunction {
    Create(ArrayCreation),
    Array(ArrayLiteral),
    /// `array(x)` with an array argument: an elementwise copy
    Copy(Box<TypedExpr>),
    Linspace(Linspace),
    Reduce(Reduction),
    Matmul(Matmul),
    /// Cross product of two 3-vectors
    Cross(Box<TypedExpr>, Box<TypedExpr>),
    /// Vector to diagonal matrix, or matrix to its diagonal
    Diag(Box<TypedExpr>),
    Math(MathCall),
}

impl NumpyFunction {
    pub fn cross(a: TypedExpr, b: TypedExpr) -> CompileResult<Self> {
        require_numeric("cross", &a)?;
        require_numeric("cross", &b)?;
        if a.rank() != 1 || b.rank() != 1 {
            return Err(CompileError::type_error("cross is only supported for vectors"));
        }
        Ok(NumpyFunction::Cross(Box::new(a), Box::new(b)))
    }

    pub fn diag(arg: TypedExpr) -> CompileResult<Self> {
        require_numeric("diag", &arg)?;
        if !(1..=2).contains(&arg.rank()) {
            return Err(CompileError::type_error("diag expects a vector or a matrix"));
        }
        Ok(NumpyFunction::Diag(Box::new(arg)))
    }

    pub fn copy(arg: TypedExpr) -> CompileResult<Self> {
        require_numeric("array", &arg)?;
        Ok(NumpyFunction::Copy(Box::new(arg)))
    }

    /// Applied independently to each element of its arguments
    pub fn is_elemental(&self) -> bool {
        matches!(self, NumpyFunction::Math(_) | NumpyFunction::Copy(_))
    }

    /// Produces a new array rather than computing elementwise
    pub fn is_creation(&self) -> bool {
        matches!(
            self,
            NumpyFunction::Create(_) | NumpyFunction::Array(_) | NumpyFunction::Linspace(_)
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            NumpyFunction::Create(c) => match c.fill {
                FillKind::Zeros => "zeros",
                FillKind::Ones => "ones",
                FillKind::Empty => "empty",
                FillKind::Full(_) => "full",
            },
            NumpyFunction::Array(_) | NumpyFunction::Copy(_) => "array",
            NumpyFunction::Linspace(_) => "linspace",
            NumpyFunction::Reduce(r) => match r.kind {
                ReductionKind::Sum => "sum",
                ReductionKind::Prod => "prod",
                ReductionKind::Norm => "norm",
            },
            NumpyFunction::Matmul(_) => "matmul",
            NumpyFunction::Cross(..) => "cross",
            NumpyFunction::Diag(_) => "diag",
            NumpyFunction::Math(m) => m.func.name(),
        }
    }

    pub fn args(&self) -> Vec<&TypedExpr> {
        match self {
            NumpyFunction::Create(c) => match &c.fill {
                FillKind::Full(v) => vec![v.as_ref()],
                _ => Vec::new(),
            },
            NumpyFunction::Array(a) => a.elements.iter().collect(),
            NumpyFunction::Copy(e) | NumpyFunction::Diag(e) => vec![e.as_ref()],
            NumpyFunction::Linspace(l) => vec![l.start.as_ref(), l.stop.as_ref()],
            NumpyFunction::Reduce(r) => vec![r.arg.as_ref()],
            NumpyFunction::Matmul(m) => vec![m.a.as_ref(), m.b.as_ref()],
            NumpyFunction::Cross(a, b) => vec![a.as_ref(), b.as_ref()],
            NumpyFunction::Math(m) => vec![m.arg.as_ref()],
        }
    }

    pub fn args_mut(&mut self) -> Vec<&mut TypedExpr> {
        match self {
            NumpyFunction::Create(c) => match &mut c.fill {
                FillKind::Full(v) => vec![v.as_mut()],
                _ => Vec::new(),
            },
            NumpyFunction::Array(a) => a.elements.iter_mut().collect(),
            NumpyFunction::Copy(e) | NumpyFunction::Diag(e) => vec![e.as_mut()],
            NumpyFunction::Linspace(l) => vec![l.start.as_mut(), l.stop.as_mut()],
            NumpyFunction::Reduce(r) => vec![r.arg.as_mut()],
            NumpyFunction::Matmul(m) => vec![m.a.as_mut(), m.b.as_mut()],
            NumpyFunction::Cross(a, b) => vec![a.as_mut(), b.as_mut()],
            NumpyFunction::Math(m) => vec![m.arg.as_mut()],
        }
    }

    pub fn dtype(&self) -> DataType {
        match self {
            NumpyFunction::Create(c) => c.dtype.clone(),
            NumpyFunction::Array(a) => a.dtype.clone(),
            NumpyFunction::Copy(e) | NumpyFunction::Diag(e) => e.dtype(),
            NumpyFunction::Linspace(l) => match l.start.dtype().promote(&l.stop.dtype()) {
                Ok(DataType::Complex) => DataType::Complex,
                _ => DataType::Real,
            },
            NumpyFunction::Reduce(r) => r.result_dtype(),
            NumpyFunction::Matmul(m) => m.a.dtype().promote(&m.b.dtype()).unwrap_or(DataType::Generic),
            NumpyFunction::Cross(a, b) => a.dtype().promote(&b.dtype()).unwrap_or(DataType::Generic),
            NumpyFunction::Math(m) => m.result_dtype(),
        }
    }

    pub fn precision(&self) -> Precision {
        match self {
            NumpyFunction::Create(c) => c.precision,
            NumpyFunction::Array(a) => a.precision,
            NumpyFunction::Copy(e) | NumpyFunction::Diag(e) => e.precision(),
            NumpyFunction::Reduce(r) => r.result_precision(),
            NumpyFunction::Math(m) => m.result_precision(),
            other => widest_precision(&other.dtype(), other.args()),
        }
    }

    pub fn rank(&self) -> usize {
        match self {
            NumpyFunction::Create(c) => c.shape.len(),
            NumpyFunction::Array(a) => a.shape.len(),
            NumpyFunction::Copy(e) => e.rank(),
            NumpyFunction::Linspace(_) | NumpyFunction::Cross(..) => 1,
            NumpyFunction::Diag(e) => 3 - e.rank(),
            NumpyFunction::Reduce(r) => r.result_rank(),
            NumpyFunction::Matmul(m) => m.result_rank(),
            NumpyFunction::Math(m) => m.arg.rank(),
        }
    }

    pub fn shape(&self) -> Vec<Dim> {
        match self {
            NumpyFunction::Create(c) => c.shape.clone(),
            NumpyFunction::Array(a) => a.shape.iter().map(|&n| Dim::Lit(n as i64)).collect(),
            NumpyFunction::Copy(e) => e.shape(),
            NumpyFunction::Linspace(l) => vec![l.num.clone()],
            NumpyFunction::Cross(a, _) => a.shape(),
            NumpyFunction::Diag(e) => {
                let shape = e.shape();
                match shape.len() {
                    1 => vec![shape[0].clone(), shape[0].clone()],
                    _ => vec![shape[0].clone()],
                }
            }
            NumpyFunction::Reduce(r) => r.result_shape(),
            NumpyFunction::Matmul(m) => m.result_shape(),
            NumpyFunction::Math(m) => m.arg.shape(),
        }
    }

    pub fn order(&self) -> Option<Order> {
        if self.rank() < 2 {
            return None;
        }
        match self {
            NumpyFunction::Create(c) => c.order,
            NumpyFunction::Array(a) => a.order,
            NumpyFunction::Matmul(m) => m.result_order(),
            NumpyFunction::Reduce(r) => r.arg.order(),
            NumpyFunction::Diag(_) => Some(Order::C),
            other => dominant(other.args()).and_then(|e| e.order()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Variable;
    use pretty_assertions::assert_eq;

    fn array(name: &str, shape: Vec<Dim>, order: Option<Order>) -> TypedExpr {
        let rank = shape.len();
        TypedExpr::Var(Variable::new(name, DataType::Real, 8).with_shape(rank, shape, order))
    }

    #[test]
    fn test_constructor_shape_independent_of_fill() {
        let shape = vec![Dim::Lit(3), Dim::Var("n".to_string()), Dim::Lit(2)];
        let fills = [
            FillKind::Zeros,
            FillKind::Ones,
            FillKind::Empty,
            FillKind::Full(Box::new(TypedExpr::Literal(Literal::int(7)))),
        ];
        for fill in fills {
            let f = NumpyFunction::Create(ArrayCreation::new(fill, shape.clone(), None, None).unwrap());
            assert_eq!(f.rank(), 3);
            assert_eq!(f.shape(), shape);
            assert_eq!(f.order(), Some(Order::C));
        }
    }

    #[test]
    fn test_fill_values() {
        let zeros = ArrayCreation::new(FillKind::Zeros, vec![Dim::Lit(2)], Some((DataType::Integer, 4)), None).unwrap();
        assert_eq!(zeros.fill_value(), Some(TypedExpr::Literal(Literal::int(0).with_precision(4))));
        let empty = ArrayCreation::new(FillKind::Empty, vec![Dim::Lit(2)], None, None).unwrap();
        assert_eq!(empty.fill_value(), None);
        let full = ArrayCreation::new(
            FillKind::Full(Box::new(TypedExpr::Literal(Literal::complex(1.0, 2.0)))),
            vec![Dim::Lit(2)],
            None,
            None,
        )
        .unwrap();
        assert_eq!(full.dtype, DataType::Complex);
    }

    #[test]
    fn test_reduction_rank() {
        let a = array("a", vec![Dim::Lit(3), Dim::Lit(4)], None);
        let total = NumpyFunction::Reduce(Reduction::new(ReductionKind::Sum, a.clone(), None).unwrap());
        assert_eq!(total.rank(), 0);
        let rows = NumpyFunction::Reduce(Reduction::new(ReductionKind::Sum, a.clone(), Some(0)).unwrap());
        assert_eq!(rows.shape(), vec![Dim::Lit(4)]);
        assert!(Reduction::new(ReductionKind::Prod, a, Some(2)).is_err());
    }

    #[test]
    fn test_matmul_shapes() {
        let a = array("a", vec![Dim::Lit(3), Dim::Lit(4)], None);
        let b = array("b", vec![Dim::Lit(4), Dim::Lit(5)], None);
        let v = array("v", vec![Dim::Lit(4)], None);
        let m = NumpyFunction::Matmul(Matmul::new(a.clone(), b).unwrap());
        assert_eq!(m.shape(), vec![Dim::Lit(3), Dim::Lit(5)]);
        let mv = NumpyFunction::Matmul(Matmul::new(a, v.clone()).unwrap());
        assert_eq!(mv.shape(), vec![Dim::Lit(3)]);
        let vv = NumpyFunction::Matmul(Matmul::new(v.clone(), v).unwrap());
        assert_eq!(vv.rank(), 0);
    }

    #[test]
    fn test_matmul_mixed_order() {
        let a = array("a", vec![Dim::Lit(2), Dim::Lit(2)], Some(Order::C));
        let b = array("b", vec![Dim::Lit(2), Dim::Lit(2)], Some(Order::F));
        let err = Matmul::new(a, b).unwrap_err();
        assert!(err.to_string().contains("mixed order not supported"));
    }

    #[test]
    fn test_math_dtypes() {
        let i = TypedExpr::Literal(Literal::int(4));
        assert_eq!(MathCall::new(MathFunction::Sqrt, i.clone()).unwrap().result_dtype(), DataType::Real);
        assert_eq!(MathCall::new(MathFunction::Abs, i).unwrap().result_dtype(), DataType::Integer);
        let z = TypedExpr::Literal(Literal::complex(0.0, 1.0));
        assert_eq!(MathCall::new(MathFunction::Abs, z.clone()).unwrap().result_dtype(), DataType::Real);
        assert_eq!(MathCall::new(MathFunction::Exp, z).unwrap().result_dtype(), DataType::Complex);
    }

    #[test]
    fn test_diag_rank() {
        let v = array("v", vec![Dim::Lit(3)], None);
        let d = NumpyFunction::diag(v).unwrap();
        assert_eq!((d.rank(), d.shape()), (2, vec![Dim::Lit(3), Dim::Lit(3)]));
    }
}
