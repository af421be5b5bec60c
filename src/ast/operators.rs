//! Elementwise operators and their type inference rules
//!
//! Arithmetic promotes along `Bool < Integer < Real < Complex`, comparisons
//! and boolean connectives produce `Bool`. Rank is the largest operand rank
//! and the shape is taken from the highest-rank operand; shape agreement
//! between two arrays is left to the expansion pass.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::expr::TypedExpr;
use super::shape::Dim;
use crate::error::{CompileError, CompileResult};
use crate::types::{DataType, Order, Precision};

/// Binary operators of the dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Is,
    IsNot,
}

impl Operator {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            Operator::Eq | Operator::Ne | Operator::Lt | Operator::Le | Operator::Gt | Operator::Ge
        )
    }

    pub fn is_boolean(&self) -> bool {
        matches!(self, Operator::And | Operator::Or | Operator::Is | Operator::IsNot)
    }

    pub fn is_arithmetic(&self) -> bool {
        !self.is_comparison() && !self.is_boolean()
    }

    /// Binding strength, higher binds tighter
    pub fn precedence(&self) -> u8 {
        match self {
            Operator::Or => 1,
            Operator::And => 2,
            Operator::Is | Operator::IsNot => 4,
            Operator::Eq | Operator::Ne | Operator::Lt | Operator::Le | Operator::Gt | Operator::Ge => 4,
            Operator::Add | Operator::Sub => 5,
            Operator::Mul | Operator::Div | Operator::FloorDiv | Operator::Mod => 6,
            Operator::Pow => 8,
        }
    }

    /// Python spelling
    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Add => "+",
            Operator::Sub => "-",
            Operator::Mul => "*",
            Operator::Div => "/",
            Operator::FloorDiv => "//",
            Operator::Mod => "%",
            Operator::Pow => "**",
            Operator::Eq => "==",
            Operator::Ne => "!=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::And => "and",
            Operator::Or => "or",
            Operator::Is => "is",
            Operator::IsNot => "is not",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// Unary operators of the dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOperator {
    Neg,
    Pos,
    Not,
}

impl UnaryOperator {
    pub fn precedence(&self) -> u8 {
        match self {
            UnaryOperator::Not => 3,
            UnaryOperator::Neg | UnaryOperator::Pos => 7,
        }
    }
}

/// Precision of a result of type `dtype`: the widest operand of that type
pub(crate) fn widest_precision<'a>(dtype: &DataType, operands: impl IntoIterator<Item = &'a TypedExpr>) -> Precision {
    operands
        .into_iter()
        .filter(|e| e.dtype() == *dtype)
        .map(|e| e.precision())
        .max()
        .unwrap_or(0)
}

/// Shape and order of the highest-rank operand
pub(crate) fn dominant<'a>(operands: impl IntoIterator<Item = &'a TypedExpr>) -> Option<&'a TypedExpr> {
    operands.into_iter().fold(None, |best: Option<&'a TypedExpr>, e| match best {
        Some(b) if b.rank() >= e.rank() => Some(b),
        _ => Some(e),
    })
}

fn check_operand(op: impl fmt::Display, side: &str, operand: &TypedExpr) -> CompileResult<()> {
    match operand {
        TypedExpr::Tuple(_) => Err(CompileError::type_error(format!(
            "{} operand of '{}' cannot be a tuple",
            side, op
        ))),
        TypedExpr::Nil => Err(CompileError::type_error(format!(
            "{} operand of '{}' cannot be None",
            side, op
        ))),
        e if !e.dtype().is_numeric() => Err(CompileError::type_error(format!(
            "{} operand of '{}' has unsupported type {}",
            side,
            op,
            e.dtype()
        ))),
        _ => Ok(()),
    }
}

/// `left op right`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryOp {
    pub op: Operator,
    pub left: Box<TypedExpr>,
    pub right: Box<TypedExpr>,
}

impl BinaryOp {
    pub fn new(op: Operator, left: TypedExpr, right: TypedExpr) -> CompileResult<Self> {
        match op {
            Operator::Is | Operator::IsNot => {
                if !matches!(right, TypedExpr::Nil) && right.dtype() != DataType::Bool {
                    return Err(CompileError::type_error(format!(
                        "'{}' is only supported against None or a boolean",
                        op
                    )));
                }
            }
            _ => {
                check_operand(op, "left", &left)?;
                check_operand(op, "right", &right)?;
            }
        }
        Ok(Self { op, left: Box::new(left), right: Box::new(right) })
    }

    pub fn operands(&self) -> [&TypedExpr; 2] {
        [self.left.as_ref(), self.right.as_ref()]
    }

    pub fn result_dtype(&self) -> DataType {
        if !self.op.is_arithmetic() {
            return DataType::Bool;
        }
        let promoted = self
            .left
            .dtype()
            .promote(&self.right.dtype())
            .unwrap_or(DataType::Generic);
        if self.op == Operator::Div && matches!(promoted, DataType::Bool | DataType::Integer) {
            DataType::Real
        } else {
            promoted
        }
    }

    pub fn result_precision(&self) -> Precision {
        if !self.op.is_arithmetic() {
            return 0;
        }
        widest_precision(&self.result_dtype(), self.operands())
    }

    pub fn result_rank(&self) -> usize {
        self.left.rank().max(self.right.rank())
    }

    pub fn result_shape(&self) -> Vec<Dim> {
        dominant(self.operands()).map(|e| e.shape()).unwrap_or_default()
    }

    pub fn result_order(&self) -> Option<Order> {
        dominant(self.operands()).and_then(|e| e.order())
    }
}

/// `op operand`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnaryOp {
    pub op: UnaryOperator,
    pub operand: Box<TypedExpr>,
}

impl UnaryOp {
    pub fn new(op: UnaryOperator, operand: TypedExpr) -> CompileResult<Self> {
        let symbol = match op {
            UnaryOperator::Neg => "-",
            UnaryOperator::Pos => "+",
            UnaryOperator::Not => "not",
        };
        check_operand(symbol, "the", &operand)?;
        Ok(Self { op, operand: Box::new(operand) })
    }

    pub fn result_dtype(&self) -> DataType {
        match self.op {
            UnaryOperator::Not => DataType::Bool,
            _ => match self.operand.dtype() {
                DataType::Bool => DataType::Integer,
                other => other,
            },
        }
    }

    pub fn result_precision(&self) -> Precision {
        match self.op {
            UnaryOperator::Not => 0,
            _ if self.operand.dtype() == DataType::Bool => 0,
            _ => self.operand.precision(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Literal, Variable};
    use pretty_assertions::assert_eq;

    fn var(name: &str, dtype: DataType, precision: Precision, shape: Vec<Dim>) -> TypedExpr {
        let rank = shape.len();
        TypedExpr::Var(Variable::new(name, dtype, precision).with_shape(rank, shape, None))
    }

    #[test]
    fn test_promotion_table() {
        let kinds = [DataType::Bool, DataType::Integer, DataType::Real, DataType::Complex];
        for a in &kinds {
            for b in &kinds {
                let x = var("x", a.clone(), 0, vec![]);
                let y = var("y", b.clone(), 0, vec![]);
                let xy = BinaryOp::new(Operator::Add, x.clone(), y.clone()).unwrap();
                let yx = BinaryOp::new(Operator::Add, y, x).unwrap();
                assert_eq!(xy.result_dtype(), yx.result_dtype());
                assert_eq!(xy.result_dtype().lattice_level(), a.lattice_level().max(b.lattice_level()));
            }
        }
    }

    #[test]
    fn test_precision_and_division() {
        let x = var("x", DataType::Real, 4, vec![]);
        let one = TypedExpr::Literal(Literal::int(1));
        let add = BinaryOp::new(Operator::Add, x, one.clone()).unwrap();
        assert_eq!((add.result_dtype(), add.result_precision()), (DataType::Real, 4));

        let div = BinaryOp::new(Operator::Div, one.clone(), one).unwrap();
        assert_eq!((div.result_dtype(), div.result_precision()), (DataType::Real, 0));
    }

    #[test]
    fn test_scalar_broadcast_shape() {
        let a = var("a", DataType::Real, 8, vec![Dim::Lit(3), Dim::Lit(4)]);
        let op = BinaryOp::new(Operator::Mul, TypedExpr::Literal(Literal::float(2.0)), a).unwrap();
        assert_eq!(op.result_rank(), 2);
        assert_eq!(op.result_shape(), vec![Dim::Lit(3), Dim::Lit(4)]);
    }

    #[test]
    fn test_comparison_is_bool() {
        let a = var("a", DataType::Integer, 8, vec![Dim::Lit(3)]);
        let op = BinaryOp::new(Operator::Lt, a, TypedExpr::Literal(Literal::int(0))).unwrap();
        assert_eq!(op.result_dtype(), DataType::Bool);
        assert_eq!(op.result_rank(), 1);
    }

    #[test]
    fn test_rejects_disallowed_operands() {
        let s = TypedExpr::Literal(Literal::string("x"));
        let err = BinaryOp::new(Operator::Add, s, TypedExpr::Literal(Literal::int(1))).unwrap_err();
        assert!(err.to_string().contains("left operand"));
        assert!(BinaryOp::new(Operator::Add, TypedExpr::Nil, TypedExpr::Literal(Literal::int(1))).is_err());
        assert!(BinaryOp::new(Operator::Is, var("x", DataType::Integer, 8, vec![]), TypedExpr::Nil).is_ok());
    }
}
