//! Lowering of whole-array library calls to scalar loops
//!
//! A statement `lhs = <call>` whose call has no elementwise form in the
//! target (a reduction or `matmul` in C, `diag` or `linspace` anywhere) is
//! rewritten into loops over scalar element assignments. Element access
//! reuses the index insertion of the expansion pass, so slices, broadcasts
//! and unit axes behave exactly as in expanded statements.

use tracing::debug;

use super::NameRegistry;
use crate::ast::{
    BinaryOp, Dim, ForLoop, Literal, MathCall, MathFunction, Matmul, NumpyFunction, Operator, Reduction, ReductionKind,
    StmtKind, TypedExpr, TypedStmt, Variable,
};
use crate::config::Language;
use crate::diagnostics::Location;
use crate::error::{CompileError, CompileResult};
use crate::expansion::insert_index;
use crate::types::{DataType, Precision};

/// Literal `n` of the given type
pub fn typed_literal(n: i64, dtype: &DataType, precision: Precision) -> TypedExpr {
    let literal = match dtype {
        DataType::Bool => Literal::boolean(n != 0),
        DataType::Integer => Literal::int(n),
        DataType::Complex => Literal::complex(n as f64, 0.0),
        _ => Literal::float(n as f64),
    };
    TypedExpr::Literal(literal.with_precision(precision))
}

/// `expr` indexed on its leading axes by `indices`
pub fn element(expr: &TypedExpr, indices: &[TypedExpr]) -> CompileResult<TypedExpr> {
    let mut e = expr.clone();
    for index in indices.iter().rev() {
        e = insert_index(&e, index)?;
    }
    Ok(e)
}

fn binary(op: Operator, left: TypedExpr, right: TypedExpr) -> CompileResult<TypedExpr> {
    Ok(TypedExpr::Binary(BinaryOp::new(op, left, right)?))
}

fn target_name(lhs: &TypedExpr) -> Option<&str> {
    match lhs {
        TypedExpr::Var(v) => Some(&v.name),
        TypedExpr::Indexed(i) => Some(&i.base.name),
        _ => None,
    }
}

fn reads_target(lhs: &TypedExpr, operands: &[&TypedExpr]) -> bool {
    let Some(name) = target_name(lhs) else {
        return false;
    };
    operands.iter().any(|e| e.variable_names().iter().any(|n| n == name))
}

/// Per-function lowering state: loop indices are shared by depth across all
/// lowered statements of the function
#[derive(Debug)]
pub struct Lowering {
    language: Language,
    names: NameRegistry,
    indices: Vec<Variable>,
    locals: Vec<Variable>,
}

impl Lowering {
    pub fn new(language: Language, names: NameRegistry) -> Self {
        Self { language, names, indices: Vec::new(), locals: Vec::new() }
    }

    /// Variables introduced so far, which the printer must declare
    pub fn locals(&self) -> &[Variable] {
        &self.locals
    }

    pub fn names_mut(&mut self) -> &mut NameRegistry {
        &mut self.names
    }

    fn index(&mut self, depth: usize) -> TypedExpr {
        while self.indices.len() <= depth {
            let var = Variable::index(self.names.fresh("k"));
            self.indices.push(var.clone());
            self.locals.push(var);
        }
        TypedExpr::Var(self.indices[depth].clone())
    }

    fn scalar(&mut self, base: &str, dtype: DataType, precision: Precision) -> TypedExpr {
        let mut var = Variable::new(self.names.fresh(base), dtype, precision);
        var.is_temp = true;
        self.locals.push(var.clone());
        TypedExpr::Var(var)
    }

    fn loop_over(index: &TypedExpr, length: &Dim, body: Vec<TypedStmt>, location: Option<Location>) -> CompileResult<TypedStmt> {
        let TypedExpr::Var(var) = index else {
            return Err(CompileError::type_error("loop index must be a variable"));
        };
        let looped = ForLoop::over(var.clone(), TypedExpr::Size(length.clone()), body);
        Ok(TypedStmt::new(StmtKind::For(looped), location))
    }

    /// Wrap `body` in one loop per axis of `shape`, outermost first, the
    /// indices being those of depths `0..shape.len()`
    fn nest(&mut self, shape: &[Dim], body: Vec<TypedStmt>, location: Option<Location>) -> CompileResult<Vec<TypedStmt>> {
        let indices: Vec<TypedExpr> = (0..shape.len()).map(|d| self.index(d)).collect();
        let mut stmts = body;
        for (index, length) in indices.iter().zip(shape).rev() {
            stmts = vec![Self::loop_over(index, length, stmts, location)?];
        }
        Ok(stmts)
    }

    fn indices_for(&mut self, rank: usize) -> Vec<TypedExpr> {
        (0..rank).map(|d| self.index(d)).collect()
    }

    fn overwrite_error(&self, func: &NumpyFunction) -> CompileError {
        CompileError::restriction(format!("{}() whose result overwrites one of its operands", func.name()), self.language)
    }

    /// Statements computing `lhs = func(...)` one element at a time
    pub fn lower(&mut self, lhs: &TypedExpr, func: &NumpyFunction, location: Option<Location>) -> CompileResult<Vec<TypedStmt>> {
        if reads_target(lhs, &func.args()) && !matches!(func, NumpyFunction::Reduce(r) if r.axis.is_none()) {
            return Err(self.overwrite_error(func));
        }
        debug!(target = %lhs, call = func.name(), "lowering library call to loops");
        let rhs = TypedExpr::Numpy(func.clone());
        match func {
            NumpyFunction::Create(c) => match c.fill_value() {
                Some(value) => self.fill(lhs, &c.shape, value, location),
                None => Ok(Vec::new()),
            },
            NumpyFunction::Array(a) => {
                let mut stmts = Vec::with_capacity(a.elements.len());
                for (k, value) in a.elements.iter().enumerate() {
                    let position = row_major_position(k, &a.shape);
                    let indices: Vec<TypedExpr> = position.into_iter().map(TypedExpr::int).collect();
                    stmts.push(TypedStmt::assign(element(lhs, &indices)?, value.clone(), location));
                }
                Ok(stmts)
            }
            NumpyFunction::Copy(arg) => {
                let shape = lhs.shape();
                let indices = self.indices_for(shape.len());
                let assign = TypedStmt::assign(element(lhs, &indices)?, element(arg, &indices)?, location);
                self.nest(&shape, vec![assign], location)
            }
            NumpyFunction::Linspace(l) => {
                let i = self.index(0);
                let extent = binary(Operator::Sub, (*l.stop).clone(), (*l.start).clone())?;
                let intervals = binary(Operator::Sub, TypedExpr::Size(l.num.clone()), TypedExpr::int(1))?;
                let step = binary(Operator::Div, extent, intervals)?;
                let value = binary(Operator::Add, (*l.start).clone(), binary(Operator::Mul, i.clone(), step)?)?;
                let assign = TypedStmt::assign(element(lhs, &[i.clone()])?, value, location);
                Ok(vec![Self::loop_over(&i, &l.num, vec![assign], location)?])
            }
            NumpyFunction::Reduce(r) => self.lower_reduction(lhs, r, &rhs, location),
            NumpyFunction::Matmul(m) => self.lower_matmul(lhs, m, &rhs, location),
            NumpyFunction::Cross(a, b) => {
                let mut stmts = Vec::with_capacity(3);
                for k in 0..3i64 {
                    let (p, q) = (TypedExpr::int((k + 1) % 3), TypedExpr::int((k + 2) % 3));
                    let forward = binary(Operator::Mul, element(a, &[p.clone()])?, element(b, &[q.clone()])?)?;
                    let backward = binary(Operator::Mul, element(a, &[q])?, element(b, &[p])?)?;
                    let value = binary(Operator::Sub, forward, backward)?;
                    stmts.push(TypedStmt::assign(element(lhs, &[TypedExpr::int(k)])?, value, location));
                }
                Ok(stmts)
            }
            NumpyFunction::Diag(arg) => {
                let i = self.index(0);
                if arg.rank() == 1 {
                    let length = arg.shape()[0].clone();
                    let zero = typed_literal(0, &rhs.dtype(), rhs.precision());
                    let mut stmts = self.fill(lhs, &[length.clone(), length.clone()], zero, location)?;
                    let assign =
                        TypedStmt::assign(element(lhs, &[i.clone(), i.clone()])?, element(arg, &[i.clone()])?, location);
                    stmts.push(Self::loop_over(&i, &length, vec![assign], location)?);
                    Ok(stmts)
                } else {
                    let length = rhs.shape()[0].clone();
                    let assign =
                        TypedStmt::assign(element(lhs, &[i.clone()])?, element(arg, &[i.clone(), i.clone()])?, location);
                    Ok(vec![Self::loop_over(&i, &length, vec![assign], location)?])
                }
            }
            NumpyFunction::Math(m) => Err(CompileError::restriction(
                format!("lowering the elementwise function {}()", m.func),
                self.language,
            )),
        }
    }

    fn fill(&mut self, lhs: &TypedExpr, shape: &[Dim], value: TypedExpr, location: Option<Location>) -> CompileResult<Vec<TypedStmt>> {
        let indices = self.indices_for(shape.len());
        let assign = TypedStmt::assign(element(lhs, &indices)?, value, location);
        self.nest(shape, vec![assign], location)
    }

    fn lower_reduction(
        &mut self,
        lhs: &TypedExpr,
        r: &Reduction,
        rhs: &TypedExpr,
        location: Option<Location>,
    ) -> CompileResult<Vec<TypedStmt>> {
        let (dtype, precision) = (rhs.dtype(), rhs.precision());
        let (start, op) = match r.kind {
            ReductionKind::Sum | ReductionKind::Norm => (0, Operator::Add),
            ReductionKind::Prod => (1, Operator::Mul),
        };
        let term = |e: TypedExpr| -> CompileResult<TypedExpr> {
            match r.kind {
                ReductionKind::Norm if e.dtype() == DataType::Complex => {
                    let modulus = TypedExpr::Numpy(NumpyFunction::Math(MathCall::new(MathFunction::Abs, e)?));
                    binary(Operator::Mul, modulus.clone(), modulus)
                }
                ReductionKind::Norm => binary(Operator::Mul, e.clone(), e),
                _ => Ok(e),
            }
        };
        let root = |e: TypedExpr| -> CompileResult<TypedExpr> {
            Ok(TypedExpr::Numpy(NumpyFunction::Math(MathCall::new(MathFunction::Sqrt, e)?)))
        };
        let shape = r.arg.shape();
        let indices = self.indices_for(shape.len());
        let Some(axis) = r.axis else {
            let needs_accumulator = r.kind == ReductionKind::Norm || reads_target(lhs, &[&r.arg]);
            let target = if needs_accumulator { self.scalar("acc", dtype.clone(), precision) } else { lhs.clone() };
            let mut stmts = vec![TypedStmt::assign(target.clone(), typed_literal(start, &dtype, precision), location)];
            let update = StmtKind::AugAssign { lhs: target.clone(), op, rhs: term(element(&r.arg, &indices)?)? };
            stmts.extend(self.nest(&shape, vec![TypedStmt::new(update, location)], location)?);
            match r.kind {
                ReductionKind::Norm => stmts.push(TypedStmt::assign(lhs.clone(), root(target)?, location)),
                _ if needs_accumulator => stmts.push(TypedStmt::assign(lhs.clone(), target, location)),
                _ => {}
            }
            return Ok(stmts);
        };
        let out_shape = r.result_shape();
        let mut stmts = self.fill(lhs, &out_shape, typed_literal(start, &dtype, precision), location)?;
        let mut out_indices = indices.clone();
        out_indices.remove(axis);
        let out = element(lhs, &out_indices)?;
        let update = StmtKind::AugAssign { lhs: out, op, rhs: term(element(&r.arg, &indices)?)? };
        stmts.extend(self.nest(&shape, vec![TypedStmt::new(update, location)], location)?);
        if r.kind == ReductionKind::Norm {
            let out_indices = self.indices_for(out_shape.len());
            let out = element(lhs, &out_indices)?;
            let assign = TypedStmt::assign(out.clone(), root(out)?, location);
            stmts.extend(self.nest(&out_shape, vec![assign], location)?);
        }
        Ok(stmts)
    }

    fn lower_matmul(&mut self, lhs: &TypedExpr, m: &Matmul, rhs: &TypedExpr, location: Option<Location>) -> CompileResult<Vec<TypedStmt>> {
        let (a, b) = (&*m.a, &*m.b);
        let (sa, sb) = (a.shape(), b.shape());
        let zero = typed_literal(0, &rhs.dtype(), rhs.precision());
        let product = |ia: &[TypedExpr], ib: &[TypedExpr]| -> CompileResult<TypedExpr> {
            binary(Operator::Mul, element(a, ia)?, element(b, ib)?)
        };
        let accumulate = |out: TypedExpr, value: TypedExpr| {
            TypedStmt::new(StmtKind::AugAssign { lhs: out, op: Operator::Add, rhs: value }, location)
        };
        // Output axes take the outer depths, the contracted axis the innermost one
        let (outer, inner) = match (a.rank(), b.rank()) {
            (2, 2) => (vec![sa[0].clone(), sb[1].clone()], sa[1].clone()),
            (2, 1) => (vec![sa[0].clone()], sa[1].clone()),
            (1, 2) => (vec![sb[1].clone()], sb[0].clone()),
            _ => (Vec::new(), sa[0].clone()),
        };
        let out_indices = self.indices_for(outer.len());
        let k = self.index(outer.len());
        let value = match (a.rank(), b.rank()) {
            (2, 2) => product(&[out_indices[0].clone(), k.clone()], &[k.clone(), out_indices[1].clone()])?,
            (2, 1) => product(&[out_indices[0].clone(), k.clone()], &[k.clone()])?,
            (1, 2) => product(&[k.clone()], &[k.clone(), out_indices[0].clone()])?,
            _ => product(&[k.clone()], &[k.clone()])?,
        };
        let out = element(lhs, &out_indices)?;
        let body = vec![
            TypedStmt::assign(out.clone(), zero, location),
            Self::loop_over(&k, &inner, vec![accumulate(out, value)], location)?,
        ];
        self.nest(&outer, body, location)
    }
}

/// Multi-index of the `k`-th element of a row-major array of `shape`
fn row_major_position(k: usize, shape: &[usize]) -> Vec<i64> {
    let mut position = vec![0; shape.len()];
    let mut rest = k;
    for (axis, &length) in shape.iter().enumerate().rev() {
        let length = length.max(1);
        position[axis] = (rest % length) as i64;
        rest /= length;
    }
    position
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ArrayLiteral, Index};
    use crate::types::Order;
    use pretty_assertions::assert_eq;

    fn array(name: &str, shape: Vec<Dim>) -> TypedExpr {
        let rank = shape.len();
        TypedExpr::Var(Variable::new(name, DataType::Real, 8).with_shape(rank, shape, Some(Order::C)))
    }

    fn scalar(name: &str) -> TypedExpr {
        TypedExpr::Var(Variable::new(name, DataType::Real, 8))
    }

    fn lowering() -> Lowering {
        Lowering::new(Language::C, NameRegistry::new())
    }

    fn render(stmts: &[TypedStmt], depth: usize, out: &mut Vec<String>) {
        for stmt in stmts {
            let pad = "  ".repeat(depth);
            match &stmt.kind {
                StmtKind::Assign { lhs, rhs } => out.push(format!("{}{} = {}", pad, lhs, rhs)),
                StmtKind::AugAssign { lhs, op, rhs } => out.push(format!("{}{} {}= {}", pad, lhs, op, rhs)),
                StmtKind::For(l) => {
                    out.push(format!("{}for {} < {}", pad, l.index.name, l.stop));
                    render(&l.body, depth + 1, out);
                }
                other => out.push(format!("{}{:?}", pad, other)),
            }
        }
    }

    fn lines(stmts: &[TypedStmt]) -> Vec<String> {
        let mut out = Vec::new();
        render(stmts, 0, &mut out);
        out
    }

    #[test]
    fn test_sum_accumulates_in_place() {
        let a = array("a", vec![Dim::Lit(3), Dim::Lit(4)]);
        let r = Reduction::new(ReductionKind::Sum, a, None).unwrap();
        let stmts = lowering().lower(&scalar("s"), &NumpyFunction::Reduce(r), None).unwrap();
        assert_eq!(
            lines(&stmts),
            vec!["s = 0.0", "for k < 3", "  for k_1 < 4", "    s += a[k, k_1]"]
        );
    }

    #[test]
    fn test_norm_uses_accumulator() {
        let v = array("v", vec![Dim::Var("n".to_string())]);
        let r = Reduction::new(ReductionKind::Norm, v, None).unwrap();
        let mut lowering = lowering();
        let stmts = lowering.lower(&scalar("s"), &NumpyFunction::Reduce(r), None).unwrap();
        assert_eq!(lines(&stmts), vec!["acc = 0.0", "for k < n", "  acc += v[k] * v[k]", "s = sqrt(acc)"]);
        let declared: Vec<&str> = lowering.locals().iter().map(|v| v.name.as_str()).collect();
        assert_eq!(declared, vec!["k", "acc"]);
    }

    #[test]
    fn test_axis_reduction() {
        let a = array("a", vec![Dim::Lit(3), Dim::Lit(4)]);
        let r = Reduction::new(ReductionKind::Prod, a, Some(0)).unwrap();
        let stmts = lowering().lower(&array("p", vec![Dim::Lit(4)]), &NumpyFunction::Reduce(r), None).unwrap();
        assert_eq!(
            lines(&stmts),
            vec!["for k < 4", "  p[k] = 1.0", "for k < 3", "  for k_1 < 4", "    p[k_1] *= a[k, k_1]"]
        );
    }

    #[test]
    fn test_matrix_product() {
        let a = array("a", vec![Dim::Var("n".to_string()), Dim::Lit(3)]);
        let b = array("b", vec![Dim::Lit(3), Dim::Lit(2)]);
        let m = Matmul::new(a, b).unwrap();
        let c = array("c", vec![Dim::Var("n".to_string()), Dim::Lit(2)]);
        let stmts = lowering().lower(&c, &NumpyFunction::Matmul(m), None).unwrap();
        assert_eq!(
            lines(&stmts),
            vec![
                "for k < n",
                "  for k_1 < 2",
                "    c[k, k_1] = 0.0",
                "    for k_2 < 3",
                "      c[k, k_1] += a[k, k_2] * b[k_2, k_1]",
            ]
        );
    }

    #[test]
    fn test_cross_product() {
        let (a, b) = (array("a", vec![Dim::Lit(3)]), array("b", vec![Dim::Lit(3)]));
        let cross = NumpyFunction::cross(a, b).unwrap();
        let stmts = lowering().lower(&array("c", vec![Dim::Lit(3)]), &cross, None).unwrap();
        assert_eq!(
            lines(&stmts),
            vec![
                "c[0] = a[1] * b[2] - a[2] * b[1]",
                "c[1] = a[2] * b[0] - a[0] * b[2]",
                "c[2] = a[0] * b[1] - a[1] * b[0]",
            ]
        );
    }

    #[test]
    fn test_array_literal_positions() {
        let elements = (1..=4).map(TypedExpr::int).collect();
        let literal = ArrayLiteral::new(elements, vec![2, 2], None, None).unwrap();
        let target = TypedExpr::Var(
            Variable::new("m", DataType::Integer, 8).with_shape(2, vec![Dim::Lit(2), Dim::Lit(2)], None),
        );
        let stmts = lowering().lower(&target, &NumpyFunction::Array(literal), None).unwrap();
        assert_eq!(lines(&stmts), vec!["m[0, 0] = 1", "m[0, 1] = 2", "m[1, 0] = 3", "m[1, 1] = 4"]);
    }

    #[test]
    fn test_overwriting_an_operand_is_a_restriction() {
        let a = array("a", vec![Dim::Lit(3)]);
        let diag = NumpyFunction::diag(a.clone()).unwrap();
        let err = lowering().lower(&a, &diag, None).unwrap_err();
        assert!(matches!(err, CompileError::Restriction { .. }));
    }

    #[test]
    fn test_element_of_slice() {
        let a = array("a", vec![Dim::Lit(5)]);
        let TypedExpr::Var(base) = &a else { unreachable!() };
        let slice = crate::ast::Slice::new(Some(TypedExpr::int(1)), None, None).unwrap();
        let view = TypedExpr::Indexed(crate::ast::IndexedElement::new(base.clone(), vec![Index::Slice(slice)]).unwrap());
        assert_eq!(element(&view, &[TypedExpr::Var(Variable::index("k"))]).unwrap().to_string(), "a[1 + k]");
    }
}
