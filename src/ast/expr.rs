//! Typed expressions
//!
//! Call-like nodes do not store their result type: `dtype()`, `rank()` and
//! friends are recomputed from the operands, so a tree stays consistent when
//! the expansion pass substitutes indexed elements for whole arrays.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::builtins::Cast;
use super::index::{Index, IndexedElement};
use super::numpy::NumpyFunction;
use super::operators::{dominant, widest_precision, BinaryOp, UnaryOp, UnaryOperator};
use super::shape::Dim;
use super::stmt::FunctionSignature;
use super::variable::Variable;
use crate::error::{CompileError, CompileResult};
use crate::types::{DataType, Order, Precision};

/// Value of a literal constant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LiteralValue {
    Int(i64),
    Float(f64),
    Complex { re: f64, im: f64 },
    Bool(bool),
    Str(String),
}

/// A literal with its precision (0 for the default width)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Literal {
    pub value: LiteralValue,
    pub precision: Precision,
}

impl Literal {
    pub fn int(n: i64) -> Self {
        Self { value: LiteralValue::Int(n), precision: 0 }
    }

    pub fn float(x: f64) -> Self {
        Self { value: LiteralValue::Float(x), precision: 0 }
    }

    pub fn complex(re: f64, im: f64) -> Self {
        Self { value: LiteralValue::Complex { re, im }, precision: 0 }
    }

    pub fn boolean(b: bool) -> Self {
        Self { value: LiteralValue::Bool(b), precision: 0 }
    }

    pub fn string(s: impl Into<String>) -> Self {
        Self { value: LiteralValue::Str(s.into()), precision: 0 }
    }

    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    pub fn dtype(&self) -> DataType {
        match self.value {
            LiteralValue::Int(_) => DataType::Integer,
            LiteralValue::Float(_) => DataType::Real,
            LiteralValue::Complex { .. } => DataType::Complex,
            LiteralValue::Bool(_) => DataType::Bool,
            LiteralValue::Str(_) => DataType::String,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self.value {
            LiteralValue::Int(n) => Some(n),
            _ => None,
        }
    }
}

/// Call of a user function, resolved against its signature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub callee: FunctionSignature,
    /// One entry per declared parameter; `Nil` for an omitted optional
    pub args: Vec<TypedExpr>,
}

impl FunctionCall {
    pub fn is_elemental(&self) -> bool {
        self.callee.flags.is_elemental
    }

    fn array_args(&self) -> impl Iterator<Item = &TypedExpr> {
        self.args.iter().filter(|a| a.rank() > 0)
    }

    /// Result dimensions expressed in terms of the caller's arguments; `None`
    /// where the size is only known inside the callee
    pub fn result_shape(&self, result: usize) -> Vec<Option<Dim>> {
        let Some(var) = self.callee.results.get(result) else {
            return Vec::new();
        };
        var.shape.iter().map(|d| self.map_dim(d)).collect()
    }

    fn map_dim(&self, dim: &Dim) -> Option<Dim> {
        let position = |name: &str| self.callee.args.iter().position(|a| a.var.name == name);
        match dim {
            Dim::Lit(n) => Some(Dim::Lit(*n)),
            Dim::Var(name) => Dim::from_expr(self.args.get(position(name)?)?),
            Dim::SizeOf { var, axis } => self.args.get(position(var)?)?.shape().get(*axis).cloned(),
            Dim::Add(a, b) => Some(Dim::Add(Box::new(self.map_dim(a)?), Box::new(self.map_dim(b)?))),
            Dim::Sub(a, b) => Some(Dim::Sub(Box::new(self.map_dim(a)?), Box::new(self.map_dim(b)?))),
            Dim::Mul(a, b) => Some(Dim::Mul(Box::new(self.map_dim(a)?), Box::new(self.map_dim(b)?))),
            Dim::FloorDiv(a, b) => Some(Dim::FloorDiv(Box::new(self.map_dim(a)?), Box::new(self.map_dim(b)?))),
        }
    }

    pub fn dtype(&self) -> DataType {
        self.callee.results.first().map(|r| r.dtype.clone()).unwrap_or(DataType::Generic)
    }

    pub fn precision(&self) -> Precision {
        self.callee.results.first().map(|r| r.precision).unwrap_or(0)
    }

    pub fn rank(&self) -> usize {
        let declared = self.callee.results.first().map(|r| r.rank).unwrap_or(0);
        if self.is_elemental() {
            self.array_args().map(|a| a.rank()).max().unwrap_or(0).max(declared)
        } else {
            declared
        }
    }

    pub fn shape(&self) -> Vec<Dim> {
        if self.is_elemental() {
            return dominant(self.array_args()).map(|a| a.shape()).unwrap_or_default();
        }
        let Some(result) = self.callee.results.first() else {
            return Vec::new();
        };
        self.result_shape(0)
            .into_iter()
            .enumerate()
            .map(|(axis, d)| d.unwrap_or_else(|| Dim::size_of(result.name.clone(), axis)))
            .collect()
    }

    pub fn order(&self) -> Option<Order> {
        if self.is_elemental() {
            dominant(self.array_args()).and_then(|a| a.order())
        } else {
            self.callee.results.first().and_then(|r| r.order)
        }
    }
}

/// `then if cond else orelse`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfTernary {
    pub cond: Box<TypedExpr>,
    pub then: Box<TypedExpr>,
    pub orelse: Box<TypedExpr>,
}

impl IfTernary {
    pub fn new(cond: TypedExpr, then: TypedExpr, orelse: TypedExpr) -> CompileResult<Self> {
        if cond.rank() != 0 || !cond.dtype().is_numeric() {
            return Err(CompileError::type_error("condition of a ternary expression must be a scalar"));
        }
        then.dtype().promote(&orelse.dtype())?;
        Ok(Self { cond: Box::new(cond), then: Box::new(then), orelse: Box::new(orelse) })
    }

    fn branches(&self) -> [&TypedExpr; 2] {
        [self.then.as_ref(), self.orelse.as_ref()]
    }
}

/// Node kinds used to filter tree queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Literal,
    Variable,
    Indexed,
    Operator,
    /// `zeros`, `array`, `linspace`: nodes producing a new array
    ArrayCreation,
    /// Reductions and linear algebra: results not computed per element
    NumpyReduction,
    /// Elementwise math and copies
    NumpyElemental,
    Cast,
    ElementalCall,
    FunctionCall,
    Tuple,
    Size,
    IfTernary,
    Nil,
}

/// A fully typed expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypedExpr {
    Literal(Literal),
    Var(Variable),
    Indexed(IndexedElement),
    Binary(BinaryOp),
    Unary(UnaryOp),
    Numpy(NumpyFunction),
    Cast(Cast),
    Call(FunctionCall),
    Tuple(Vec<TypedExpr>),
    /// Integer length of an array axis or a symbolic size
    Size(Dim),
    IfTernary(IfTernary),
    /// The `None` object
    Nil,
}

impl TypedExpr {
    pub fn int(n: i64) -> Self {
        TypedExpr::Literal(Literal::int(n))
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            TypedExpr::Literal(_) => NodeKind::Literal,
            TypedExpr::Var(_) => NodeKind::Variable,
            TypedExpr::Indexed(_) => NodeKind::Indexed,
            TypedExpr::Binary(_) | TypedExpr::Unary(_) => NodeKind::Operator,
            TypedExpr::Numpy(f) if f.is_creation() => NodeKind::ArrayCreation,
            TypedExpr::Numpy(f) if f.is_elemental() => NodeKind::NumpyElemental,
            TypedExpr::Numpy(_) => NodeKind::NumpyReduction,
            TypedExpr::Cast(_) => NodeKind::Cast,
            TypedExpr::Call(c) if c.is_elemental() => NodeKind::ElementalCall,
            TypedExpr::Call(_) => NodeKind::FunctionCall,
            TypedExpr::Tuple(_) => NodeKind::Tuple,
            TypedExpr::Size(_) => NodeKind::Size,
            TypedExpr::IfTernary(_) => NodeKind::IfTernary,
            TypedExpr::Nil => NodeKind::Nil,
        }
    }

    pub fn dtype(&self) -> DataType {
        match self {
            TypedExpr::Literal(l) => l.dtype(),
            TypedExpr::Var(v) => v.dtype.clone(),
            TypedExpr::Indexed(i) => i.base.dtype.clone(),
            TypedExpr::Binary(b) => b.result_dtype(),
            TypedExpr::Unary(u) => u.result_dtype(),
            TypedExpr::Numpy(f) => f.dtype(),
            TypedExpr::Cast(c) => c.dtype.clone(),
            TypedExpr::Call(c) => c.dtype(),
            TypedExpr::Tuple(items) => items.first().map(|e| e.dtype()).unwrap_or(DataType::Generic),
            TypedExpr::Size(_) => DataType::Integer,
            TypedExpr::IfTernary(t) => t.then.dtype().promote(&t.orelse.dtype()).unwrap_or(DataType::Generic),
            TypedExpr::Nil => DataType::Generic,
        }
    }

    pub fn precision(&self) -> Precision {
        match self {
            TypedExpr::Literal(l) => l.precision,
            TypedExpr::Var(v) => v.precision,
            TypedExpr::Indexed(i) => i.base.precision,
            TypedExpr::Binary(b) => b.result_precision(),
            TypedExpr::Unary(u) => u.result_precision(),
            TypedExpr::Numpy(f) => f.precision(),
            TypedExpr::Cast(c) => c.precision,
            TypedExpr::Call(c) => c.precision(),
            TypedExpr::Tuple(items) => items.first().map(|e| e.precision()).unwrap_or(0),
            TypedExpr::Size(_) => 8,
            TypedExpr::IfTernary(t) => widest_precision(&self.dtype(), t.branches()),
            TypedExpr::Nil => 0,
        }
    }

    pub fn rank(&self) -> usize {
        match self {
            TypedExpr::Var(v) => v.rank,
            TypedExpr::Indexed(i) => i.rank(),
            TypedExpr::Binary(b) => b.result_rank(),
            TypedExpr::Unary(u) => u.operand.rank(),
            TypedExpr::Numpy(f) => f.rank(),
            TypedExpr::Call(c) => c.rank(),
            TypedExpr::IfTernary(t) => t.then.rank().max(t.orelse.rank()),
            TypedExpr::Literal(_)
            | TypedExpr::Cast(_)
            | TypedExpr::Tuple(_)
            | TypedExpr::Size(_)
            | TypedExpr::Nil => 0,
        }
    }

    pub fn shape(&self) -> Vec<Dim> {
        match self {
            TypedExpr::Var(v) => v.shape.clone(),
            TypedExpr::Indexed(i) => i.shape(),
            TypedExpr::Binary(b) => b.result_shape(),
            TypedExpr::Unary(u) => u.operand.shape(),
            TypedExpr::Numpy(f) => f.shape(),
            TypedExpr::Call(c) => c.shape(),
            TypedExpr::IfTernary(t) => dominant(t.branches()).map(|e| e.shape()).unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    pub fn order(&self) -> Option<Order> {
        if self.rank() < 2 {
            return None;
        }
        match self {
            TypedExpr::Var(v) => v.order,
            TypedExpr::Indexed(i) => i.order(),
            TypedExpr::Binary(b) => b.result_order(),
            TypedExpr::Unary(u) => u.operand.order(),
            TypedExpr::Numpy(f) => f.order(),
            TypedExpr::Call(c) => c.order(),
            TypedExpr::IfTernary(t) => dominant(t.branches()).and_then(|e| e.order()),
            _ => None,
        }
    }

    /// Direct sub-expressions
    pub fn children(&self) -> Vec<&TypedExpr> {
        match self {
            TypedExpr::Indexed(i) => i
                .indices
                .iter()
                .flat_map(|index| match index {
                    Index::Elem(e) => vec![e],
                    Index::Slice(s) => [&s.start, &s.stop, &s.step]
                        .into_iter()
                        .filter_map(|p| p.as_deref())
                        .collect(),
                })
                .collect(),
            TypedExpr::Binary(b) => vec![b.left.as_ref(), b.right.as_ref()],
            TypedExpr::Unary(u) => vec![u.operand.as_ref()],
            TypedExpr::Numpy(f) => f.args(),
            TypedExpr::Cast(c) => vec![c.arg.as_ref()],
            TypedExpr::Call(c) => c.args.iter().collect(),
            TypedExpr::Tuple(items) => items.iter().collect(),
            TypedExpr::IfTernary(t) => vec![t.cond.as_ref(), t.then.as_ref(), t.orelse.as_ref()],
            TypedExpr::Literal(_) | TypedExpr::Var(_) | TypedExpr::Size(_) | TypedExpr::Nil => Vec::new(),
        }
    }

    pub fn children_mut(&mut self) -> Vec<&mut TypedExpr> {
        match self {
            TypedExpr::Indexed(i) => i
                .indices
                .iter_mut()
                .flat_map(|index| match index {
                    Index::Elem(e) => vec![e],
                    Index::Slice(s) => [&mut s.start, &mut s.stop, &mut s.step]
                        .into_iter()
                        .filter_map(|p| p.as_deref_mut())
                        .collect(),
                })
                .collect(),
            TypedExpr::Binary(b) => vec![b.left.as_mut(), b.right.as_mut()],
            TypedExpr::Unary(u) => vec![u.operand.as_mut()],
            TypedExpr::Numpy(f) => f.args_mut(),
            TypedExpr::Cast(c) => vec![c.arg.as_mut()],
            TypedExpr::Call(c) => c.args.iter_mut().collect(),
            TypedExpr::Tuple(items) => items.iter_mut().collect(),
            TypedExpr::IfTernary(t) => vec![t.cond.as_mut(), t.then.as_mut(), t.orelse.as_mut()],
            TypedExpr::Literal(_) | TypedExpr::Var(_) | TypedExpr::Size(_) | TypedExpr::Nil => Vec::new(),
        }
    }

    /// Collect every node of one of `kinds` at or below this node, without
    /// entering subtrees rooted at one of `excluded`
    pub fn attribute_nodes<'a>(&'a self, kinds: &[NodeKind], excluded: &[NodeKind]) -> Vec<&'a TypedExpr> {
        let mut found = Vec::new();
        self.collect_nodes(kinds, excluded, &mut found);
        found
    }

    fn collect_nodes<'a>(&'a self, kinds: &[NodeKind], excluded: &[NodeKind], found: &mut Vec<&'a TypedExpr>) {
        let kind = self.kind();
        if excluded.contains(&kind) {
            return;
        }
        if kinds.contains(&kind) {
            found.push(self);
        }
        for child in self.children() {
            child.collect_nodes(kinds, excluded, found);
        }
    }

    /// Replace every occurrence of `old[k]` by `new[k]`, without entering
    /// subtrees rooted at one of `excluded`. Replacements are not revisited.
    pub fn substitute(&mut self, old: &[TypedExpr], new: &[TypedExpr], excluded: &[NodeKind]) {
        if let Some(k) = old.iter().position(|o| *o == *self) {
            if let Some(replacement) = new.get(k) {
                *self = replacement.clone();
                return;
            }
        }
        if excluded.contains(&self.kind()) {
            return;
        }
        for child in self.children_mut() {
            child.substitute(old, new, excluded);
        }
    }

    /// Names of all variables read by this expression, including shape references
    pub fn variable_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.collect_names(&mut names);
        names
    }

    fn collect_names(&self, names: &mut Vec<String>) {
        match self {
            TypedExpr::Var(v) => names.push(v.name.clone()),
            TypedExpr::Indexed(i) => names.push(i.base.name.clone()),
            TypedExpr::Size(d) => names.extend(d.variables().into_iter().map(str::to_string)),
            _ => {}
        }
        for child in self.children() {
            child.collect_names(names);
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, TypedExpr::Literal(_))
    }

    fn precedence(&self) -> u8 {
        match self {
            TypedExpr::Binary(b) => b.op.precedence(),
            TypedExpr::Unary(u) => u.op.precedence(),
            TypedExpr::IfTernary(_) => 0,
            _ => 10,
        }
    }
}

fn write_operand(f: &mut fmt::Formatter<'_>, e: &TypedExpr, min: u8) -> fmt::Result {
    if e.precedence() < min {
        write!(f, "({})", e)
    } else {
        write!(f, "{}", e)
    }
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: impl IntoIterator<Item = T>) -> fmt::Result {
    for (k, item) in items.into_iter().enumerate() {
        if k > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Index::Elem(e) => write!(f, "{}", e),
            Index::Slice(s) => {
                if let Some(start) = &s.start {
                    write!(f, "{}", start)?;
                }
                write!(f, ":")?;
                if let Some(stop) = &s.stop {
                    write!(f, "{}", stop)?;
                }
                if let Some(step) = &s.step {
                    write!(f, ":{}", step)?;
                }
                Ok(())
            }
        }
    }
}

/// Python-like rendering, used for diagnostics
impl fmt::Display for TypedExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypedExpr::Literal(l) => match &l.value {
                LiteralValue::Int(n) => write!(f, "{}", n),
                LiteralValue::Float(x) => write!(f, "{:?}", x),
                LiteralValue::Complex { re, im } => write!(f, "({:?}+{:?}j)", re, im),
                LiteralValue::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
                LiteralValue::Str(s) => write!(f, "{:?}", s),
            },
            TypedExpr::Var(v) => write!(f, "{}", v.name),
            TypedExpr::Indexed(i) => {
                write!(f, "{}[", i.base.name)?;
                write_list(f, &i.indices)?;
                write!(f, "]")
            }
            TypedExpr::Binary(b) => {
                let p = b.op.precedence();
                write_operand(f, &b.left, p)?;
                write!(f, " {} ", b.op)?;
                write_operand(f, &b.right, p + 1)
            }
            TypedExpr::Unary(u) => {
                let symbol = match u.op {
                    UnaryOperator::Neg => "-",
                    UnaryOperator::Pos => "+",
                    UnaryOperator::Not => "not ",
                };
                write!(f, "{}", symbol)?;
                write_operand(f, &u.operand, u.op.precedence())
            }
            TypedExpr::Numpy(func) => {
                write!(f, "{}(", func.name())?;
                write_list(f, func.args())?;
                write!(f, ")")
            }
            TypedExpr::Cast(c) => write!(f, "{}({})", crate::types::type_name(&c.dtype, c.precision), c.arg),
            TypedExpr::Call(c) => {
                write!(f, "{}(", c.callee.name)?;
                write_list(f, c.args.iter().filter(|a| !matches!(a, TypedExpr::Nil)))?;
                write!(f, ")")
            }
            TypedExpr::Tuple(items) => {
                write!(f, "(")?;
                write_list(f, items)?;
                write!(f, ")")
            }
            TypedExpr::Size(d) => write!(f, "{}", d),
            TypedExpr::IfTernary(t) => write!(f, "{} if {} else {}", t.then, t.cond, t.orelse),
            TypedExpr::Nil => write!(f, "None"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Operator, Slice};
    use pretty_assertions::assert_eq;

    fn array(name: &str, n: usize) -> Variable {
        Variable::new(name, DataType::Real, 8).with_shape(n, vec![Dim::Lit(3); n], None)
    }

    #[test]
    fn test_attribute_nodes_with_exclusion() {
        let a = TypedExpr::Var(array("a", 1));
        let b = TypedExpr::Var(array("b", 1));
        let total = TypedExpr::Numpy(NumpyFunction::Reduce(
            crate::ast::Reduction::new(crate::ast::ReductionKind::Sum, b, None).unwrap(),
        ));
        let e = TypedExpr::Binary(BinaryOp::new(Operator::Add, a.clone(), total).unwrap());

        let all = e.attribute_nodes(&[NodeKind::Variable], &[]);
        assert_eq!(all.len(), 2);
        let outside = e.attribute_nodes(&[NodeKind::Variable], &[NodeKind::NumpyReduction]);
        assert_eq!(outside, vec![&a]);
    }

    #[test]
    fn test_substitute_makes_scalar() {
        let a = array("a", 1);
        let mut e = TypedExpr::Binary(
            BinaryOp::new(Operator::Add, TypedExpr::Var(a.clone()), TypedExpr::int(1)).unwrap(),
        );
        assert_eq!(e.rank(), 1);
        let indexed = TypedExpr::Indexed(
            IndexedElement::new(a.clone(), vec![Index::Elem(TypedExpr::Var(Variable::index("i_0")))]).unwrap(),
        );
        e.substitute(&[TypedExpr::Var(a)], &[indexed], &[]);
        assert_eq!(e.rank(), 0);
        assert_eq!(e.to_string(), "a[i_0] + 1");
    }

    #[test]
    fn test_substitute_respects_exclusion() {
        let a = TypedExpr::Var(array("a", 1));
        let mut e = TypedExpr::Numpy(NumpyFunction::Reduce(
            crate::ast::Reduction::new(crate::ast::ReductionKind::Sum, a.clone(), None).unwrap(),
        ));
        let before = e.clone();
        e.substitute(&[a], &[TypedExpr::int(0)], &[NodeKind::NumpyReduction]);
        assert_eq!(e, before);
    }

    #[test]
    fn test_display_slices_and_precedence() {
        let a = array("a", 1);
        let s = Slice::new(Some(TypedExpr::int(1)), None, None).unwrap();
        let e = TypedExpr::Indexed(IndexedElement::new(a, vec![Index::Slice(s)]).unwrap());
        assert_eq!(e.to_string(), "a[1:]");

        let x = TypedExpr::Var(Variable::new("x", DataType::Integer, 8));
        let sum = TypedExpr::Binary(BinaryOp::new(Operator::Add, x.clone(), TypedExpr::int(1)).unwrap());
        let prod = TypedExpr::Binary(BinaryOp::new(Operator::Mul, sum, x).unwrap());
        assert_eq!(prod.to_string(), "(x + 1) * x");
    }
}
