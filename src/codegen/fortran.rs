//! Fortran 2003 printer
//!
//! Arrays keep zero-based bounds so subscripts print unchanged. An array in
//! C order is stored transposed: its subscripts, bounds and extents print in
//! reverse and axis arguments of reductions count from the other end. Public
//! procedures get a `bind(c)` companion when a wrapper or a header is
//! requested, described by [`CSignature`].

use std::collections::{HashMap, HashSet};

use tracing::{debug, instrument};

use super::header::{CSignature, ParamRole};
use super::lowering::{typed_literal, Lowering};
use super::{
    alias_targets, float_text, last_position, literal_int, print_dim, symbol_table, written_names, CodePrinter,
    CodeWriter, NameRegistry,
};
use crate::ast::{
    ArrayLiteral, BinaryOp, Cast, Dim, FunctionCall, FunctionDef, IfTernary, Index, IndexedElement, Literal,
    LiteralValue, MathFunction, Matmul, Module, NumpyFunction, Operator, Reduction, ReductionKind, Slice, StmtKind,
    TypedExpr, TypedStmt, UnaryOp, UnaryOperator, Variable,
};
use crate::config::{CompilerConfig, Language};
use crate::diagnostics::{Diagnostic, Diagnostics, Location, Stage};
use crate::error::{CompileError, CompileResult};
use crate::types::{native_type, resolve_precision, DataType, Order, Precision};

const SEPARATOR: &str = "!........................................";

/// `ISO_C_BINDING` kind parameter of a scalar type
fn kind(dtype: &DataType, precision: Precision) -> CompileResult<&'static str> {
    let resolved = resolve_precision(dtype, precision);
    let kind = match (dtype, resolved) {
        (DataType::Integer, 1) => Some("C_INT8_T"),
        (DataType::Integer, 2) => Some("C_INT16_T"),
        (DataType::Integer, 4) => Some("C_INT32_T"),
        (DataType::Integer, 8) => Some("C_INT64_T"),
        (DataType::Real | DataType::Complex, 4) => Some("C_FLOAT"),
        (DataType::Real | DataType::Complex, 8) => Some("C_DOUBLE"),
        (DataType::Bool, _) => Some("C_BOOL"),
        _ => None,
    };
    kind.ok_or_else(|| CompileError::UnsupportedType {
        dtype: dtype.to_string(),
        precision: resolved,
        target: Language::Fortran.to_string(),
    })
}

fn type_of(v: &Variable) -> CompileResult<&'static str> {
    native_type(&v.dtype, v.precision, Language::Fortran)
}

fn transposed(rank: usize, order: Option<Order>) -> bool {
    rank >= 2 && order == Some(Order::C)
}

/// One-based storage dimension holding axis `axis`
fn storage_dim(rank: usize, order: Option<Order>, axis: usize) -> usize {
    if transposed(rank, order) {
        rank - axis
    } else {
        axis + 1
    }
}

fn in_storage_order<T>(mut items: Vec<T>, rank: usize, order: Option<Order>) -> Vec<T> {
    if transposed(rank, order) {
        items.reverse();
    }
    items
}

fn integral(e: &TypedExpr) -> bool {
    matches!(e.dtype(), DataType::Integer | DataType::Bool)
}

fn literal(l: &Literal) -> CompileResult<String> {
    let text = match &l.value {
        LiteralValue::Int(n) => format!("{}_{}", n, kind(&DataType::Integer, l.precision)?),
        LiteralValue::Float(x) => format!("{}_{}", float_text(*x), kind(&DataType::Real, l.precision)?),
        LiteralValue::Complex { re, im } => {
            let k = kind(&DataType::Complex, l.precision)?;
            format!("({}_{}, {}_{})", float_text(*re), k, float_text(*im), k)
        }
        LiteralValue::Bool(true) => ".True._C_BOOL".to_string(),
        LiteralValue::Bool(false) => ".False._C_BOOL".to_string(),
        LiteralValue::Str(s) => format!("'{}'", s.replace('\'', "''")),
    };
    Ok(text)
}

/// Expression printing within one procedure
struct Scope {
    symbols: HashMap<String, Variable>,
}

impl Scope {
    fn size_of(&self, var: &str, axis: usize) -> String {
        let (rank, order) = self.symbols.get(var).map_or((axis + 1, None), |v| (v.rank, v.order));
        format!("size({}, {}, C_INT64_T)", var, storage_dim(rank, order, axis))
    }

    fn dim(&self, d: &Dim) -> String {
        print_dim(d, &|var, axis| self.size_of(var, axis))
    }

    fn expr(&self, e: &TypedExpr) -> CompileResult<String> {
        match e {
            TypedExpr::Literal(l) => literal(l),
            TypedExpr::Var(v) => Ok(v.name.clone()),
            TypedExpr::Indexed(i) => self.indexed(i),
            TypedExpr::Binary(b) => self.binary(b),
            TypedExpr::Unary(u) => self.unary(u),
            TypedExpr::Numpy(f) => self.numpy(f),
            TypedExpr::Cast(c) => self.cast(c),
            TypedExpr::Call(c) if c.callee.results.len() == 1 => {
                Ok(format!("{}({})", c.callee.name, self.call_args(c, &[])?))
            }
            TypedExpr::Call(c) => Err(CompileError::restriction(
                format!("using the {} results of '{}' inside an expression", c.callee.results.len(), c.callee.name),
                Language::Fortran,
            )),
            TypedExpr::Size(d) => Ok(self.dim(d)),
            TypedExpr::IfTernary(IfTernary { cond, then, orelse }) => {
                Ok(format!("merge({}, {}, {})", self.expr(then)?, self.expr(orelse)?, self.expr(cond)?))
            }
            TypedExpr::Tuple(_) => Err(CompileError::restriction("tuple expression", Language::Fortran)),
            TypedExpr::Nil => Err(CompileError::restriction("None outside of an identity test", Language::Fortran)),
        }
    }

    /// `e`, parenthesized when it binds looser than `min`
    fn operand(&self, e: &TypedExpr, min: u8) -> CompileResult<String> {
        let precedence = match e {
            // .eqv. binds looser than every other operator
            TypedExpr::Binary(b) if matches!(b.op, Operator::Eq | Operator::Ne) && Self::logical(b) => 0,
            TypedExpr::Binary(b) => b.op.precedence(),
            TypedExpr::Unary(u) if u.op == UnaryOperator::Not => u.op.precedence(),
            TypedExpr::Unary(_) => 0,
            TypedExpr::Literal(l) => match l.value {
                LiteralValue::Int(n) if n < 0 => 0,
                LiteralValue::Float(x) if x < 0.0 => 0,
                _ => 10,
            },
            _ => 10,
        };
        let text = self.expr(e)?;
        Ok(if precedence < min { format!("({})", text) } else { text })
    }

    fn logical(b: &BinaryOp) -> bool {
        b.left.dtype() == DataType::Bool && b.right.dtype() == DataType::Bool
    }

    fn binary(&self, b: &BinaryOp) -> CompileResult<String> {
        let (left, right) = (&*b.left, &*b.right);
        let p = b.op.precedence();
        let symbol = match b.op {
            Operator::Div if integral(left) && integral(right) => {
                let k = kind(&DataType::Real, b.result_precision())?;
                return Ok(format!("real({}, {}) / real({}, {})", self.expr(left)?, k, self.expr(right)?, k));
            }
            Operator::FloorDiv => {
                let (l, r) = (self.expr(left)?, self.expr(right)?);
                return Ok(format!("({} - modulo({}, {})) / {}", l, l, r, self.operand(right, 10)?));
            }
            Operator::Mod => return Ok(format!("modulo({}, {})", self.expr(left)?, self.expr(right)?)),
            Operator::Is | Operator::IsNot => return self.identity(b),
            Operator::Eq if Self::logical(b) => ".eqv.",
            Operator::Ne if Self::logical(b) => ".neqv.",
            Operator::Add => "+",
            Operator::Sub => "-",
            Operator::Mul => "*",
            Operator::Div => "/",
            Operator::Pow => "**",
            Operator::Eq => "==",
            Operator::Ne => "/=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::And => ".and.",
            Operator::Or => ".or.",
        };
        let (left_min, right_min) = if b.op == Operator::Pow { (p + 1, p) } else { (p, p + 1) };
        Ok(format!("{} {} {}", self.operand(left, left_min)?, symbol, self.operand(right, right_min)?))
    }

    /// `x is None` tests whether an optional argument is absent
    fn identity(&self, b: &BinaryOp) -> CompileResult<String> {
        let tested = match (&*b.left, &*b.right) {
            (x, TypedExpr::Nil) | (TypedExpr::Nil, x) => x,
            (l, r) => {
                let symbol = if b.op == Operator::Is { ".eqv." } else { ".neqv." };
                return Ok(format!("{} {} {}", self.operand(l, 1)?, symbol, self.operand(r, 1)?));
            }
        };
        let present = format!("present({})", self.expr(tested)?);
        Ok(if b.op == Operator::Is { format!(".not. {}", present) } else { present })
    }

    fn unary(&self, u: &UnaryOp) -> CompileResult<String> {
        match u.op {
            UnaryOperator::Neg => Ok(format!("-{}", self.operand(&u.operand, 7)?)),
            UnaryOperator::Pos => self.expr(&u.operand),
            UnaryOperator::Not => Ok(format!(".not. {}", self.operand(&u.operand, 4)?)),
        }
    }

    fn cast(&self, c: &Cast) -> CompileResult<String> {
        let arg = self.expr(&c.arg)?;
        let from_bool = c.arg.dtype() == DataType::Bool;
        let text = match c.dtype {
            DataType::Integer | DataType::Real if from_bool => {
                let one = self.expr(&typed_literal(1, &c.dtype, c.precision))?;
                let zero = self.expr(&typed_literal(0, &c.dtype, c.precision))?;
                format!("merge({}, {}, {})", one, zero, arg)
            }
            DataType::Integer => format!("int({}, {})", arg, kind(&c.dtype, c.precision)?),
            DataType::Real => format!("real({}, {})", arg, kind(&c.dtype, c.precision)?),
            DataType::Complex => format!("cmplx({}, kind = {})", arg, kind(&c.dtype, c.precision)?),
            DataType::Bool if from_bool => format!("logical({}, C_BOOL)", arg),
            DataType::Bool => format!("{} /= 0", self.operand(&c.arg, 5)?),
            _ => return Err(CompileError::restriction(format!("conversion to {}", c.dtype), Language::Fortran)),
        };
        Ok(text)
    }

    fn call_args(&self, call: &FunctionCall, outputs: &[TypedExpr]) -> CompileResult<String> {
        let mut keyword = false;
        let mut args = Vec::with_capacity(call.args.len() + outputs.len());
        let params = call.callee.args.iter().map(|a| &a.var).chain(&call.callee.results);
        for (param, arg) in params.zip(call.args.iter().chain(outputs)) {
            if matches!(arg, TypedExpr::Nil) {
                keyword = true;
                continue;
            }
            let text = self.expr(arg)?;
            args.push(if keyword { format!("{} = {}", param.name, text) } else { text });
        }
        Ok(args.join(", "))
    }

    fn indexed(&self, i: &IndexedElement) -> CompileResult<String> {
        let mut parts = Vec::with_capacity(i.base.rank);
        for (axis, index) in i.full_indices().iter().enumerate() {
            parts.push(match index {
                Index::Elem(e) => self.expr(e)?,
                Index::Slice(s) => self.slice(s, &i.base, axis)?,
            });
        }
        let parts = in_storage_order(parts, i.base.rank, i.base.order);
        Ok(format!("{}({})", i.base.name, parts.join(", ")))
    }

    /// Python bounds are half-open, Fortran ones inclusive
    fn slice(&self, s: &Slice, base: &Variable, axis: usize) -> CompileResult<String> {
        let step = s.step.as_deref();
        let negative = step.and_then(literal_int).is_some_and(|n| n < 0);
        let start = match (s.start.as_deref(), negative) {
            (Some(e), _) => self.expr(e)?,
            (None, true) => format!("ubound({}, {})", base.name, storage_dim(base.rank, base.order, axis)),
            (None, false) => String::new(),
        };
        let stop = match s.stop.as_deref() {
            Some(e) => self.shifted(e, if negative { 1 } else { -1 })?,
            None => String::new(),
        };
        let mut text = format!("{}:{}", start, stop);
        if let Some(step) = step.filter(|e| literal_int(e) != Some(1)) {
            text.push(':');
            text.push_str(&self.expr(step)?);
        }
        Ok(text)
    }

    fn shifted(&self, e: &TypedExpr, delta: i64) -> CompileResult<String> {
        if let Some(n) = literal_int(e) {
            return Ok((n + delta).to_string());
        }
        if let TypedExpr::Size(d) = e {
            let shifted = Dim::Add(Box::new(d.clone()), Box::new(Dim::Lit(delta))).simplify();
            return Ok(self.dim(&shifted));
        }
        let sign = if delta < 0 { "-" } else { "+" };
        Ok(format!("{} {} {}", self.operand(e, 5)?, sign, delta.abs()))
    }

    fn numpy(&self, f: &NumpyFunction) -> CompileResult<String> {
        match f {
            NumpyFunction::Array(a) => self.array_literal(a),
            NumpyFunction::Copy(arg) => self.expr(arg),
            NumpyFunction::Reduce(r) => self.reduction(r),
            NumpyFunction::Matmul(m) => self.matmul(m),
            NumpyFunction::Math(m) => {
                let arg = self.expr(&m.arg)?;
                let result = TypedExpr::Numpy(f.clone());
                let real_kind = kind(&DataType::Real, result.precision())?;
                let text = match m.func {
                    MathFunction::Abs => format!("abs({})", arg),
                    MathFunction::Floor if integral(&m.arg) => format!("real({}, {})", arg, real_kind),
                    MathFunction::Floor => format!("real(floor({}, C_INT64_T), {})", arg, real_kind),
                    func if integral(&m.arg) => format!("{}(real({}, {}))", func.name(), arg, real_kind),
                    func => format!("{}({})", func.name(), arg),
                };
                Ok(text)
            }
            other => Err(CompileError::restriction(format!("{}() inside an expression", other.name()), Language::Fortran)),
        }
    }

    fn array_literal(&self, a: &ArrayLiteral) -> CompileResult<String> {
        let ty = native_type(&a.dtype, a.precision, Language::Fortran)?;
        let elements = a.elements.iter().map(|e| self.expr(e)).collect::<CompileResult<Vec<_>>>()?;
        let values = format!("[{} :: {}]", ty, elements.join(", "));
        let rank = a.shape.len();
        if rank == 1 {
            return Ok(values);
        }
        let shape: Vec<String> = in_storage_order(a.shape.iter().map(|n| n.to_string()).collect(), rank, a.order);
        if transposed(rank, a.order) {
            // Row-major elements already fill the transposed storage in order
            Ok(format!("reshape({}, [{}])", values, shape.join(", ")))
        } else {
            let order: Vec<String> = (1..=rank).rev().map(|n| n.to_string()).collect();
            Ok(format!("reshape({}, [{}], order = [{}])", values, shape.join(", "), order.join(", ")))
        }
    }

    fn reduction(&self, r: &Reduction) -> CompileResult<String> {
        let arg = self.expr(&r.arg)?;
        if r.arg.rank() == 0 {
            return Ok(match r.kind {
                ReductionKind::Norm => format!("abs({})", arg),
                _ => arg,
            });
        }
        let dim = r
            .axis
            .map(|axis| format!(", {}", storage_dim(r.arg.rank(), r.arg.order(), axis)))
            .unwrap_or_default();
        let text = match (r.kind, r.arg.dtype()) {
            (ReductionKind::Sum, _) => format!("sum({}{})", arg, dim),
            (ReductionKind::Prod, _) => format!("product({}{})", arg, dim),
            (ReductionKind::Norm, DataType::Complex) => format!("sqrt(sum(abs({})**2{}))", arg, dim),
            (ReductionKind::Norm, DataType::Real) => format!("norm2({}{})", arg, dim),
            (ReductionKind::Norm, _) => format!("norm2(real({}, C_DOUBLE){})", arg, dim),
        };
        Ok(text)
    }

    fn matmul(&self, m: &Matmul) -> CompileResult<String> {
        let (a, b) = (self.expr(&m.a)?, self.expr(&m.b)?);
        if m.a.rank() == 1 && m.b.rank() == 1 {
            return Ok(format!("sum({} * {})", self.operand(&m.a, 7)?, self.operand(&m.b, 7)?));
        }
        // Transposed operands give the transposed product when swapped
        if m.a.order().or(m.b.order()) == Some(Order::C) {
            Ok(format!("matmul({}, {})", b, a))
        } else {
            Ok(format!("matmul({}, {})", a, b))
        }
    }
}

/// Printing state of one procedure
struct Procedure<'a> {
    function: &'a FunctionDef,
    scope: Scope,
    lowering: Lowering,
}

impl<'a> Procedure<'a> {
    fn new(module: &Module, function: &'a FunctionDef) -> Self {
        let names = NameRegistry::for_function(module, function);
        Self {
            function,
            scope: Scope { symbols: symbol_table(module, function) },
            lowering: Lowering::new(Language::Fortran, names),
        }
    }

    fn print(mut self, w: &mut CodeWriter) -> CompileResult<()> {
        let f = self.function;
        let results = f.results();
        let is_function = results.len() == 1;
        let prefix = match (f.signature.flags.is_elemental, f.signature.flags.is_pure) {
            (true, _) => "elemental ",
            (false, true) => "pure ",
            _ => "",
        };
        let mut names: Vec<&str> = f.args().map(|a| a.name.as_str()).collect();
        let (unit, header) = if is_function {
            let header = format!("{}function {}({}) result({})", prefix, f.name(), names.join(", "), results[0].name);
            ("function", header)
        } else {
            names.extend(results.iter().map(|r| r.name.as_str()));
            ("subroutine", format!("{}subroutine {}({})", prefix, f.name(), names.join(", ")))
        };

        let statements = match f.body.split_last() {
            Some((last, rest)) if matches!(last.kind, StmtKind::Return(_)) => rest,
            _ => &f.body[..],
        };
        let mut body = w.nested();
        body.indented(|b| self.block(statements, b))?;

        if let Some(doc) = &f.doc {
            for line in doc.lines() {
                w.line(format!("! {}", line.trim()).trim_end());
            }
        }
        w.line(header);
        let declarations = self.declarations(is_function)?;
        w.indented(|w| {
            for d in &declarations {
                w.line(d);
            }
        });
        if !declarations.is_empty() && !body.is_empty() {
            w.blank();
        }
        w.append(body);
        w.line(format!("end {} {}", unit, f.name()));
        Ok(())
    }

    fn declarations(&self, is_function: bool) -> CompileResult<Vec<String>> {
        let f = self.function;
        let written = written_names(f);
        let aliased = alias_targets(f);
        let deferred = |rank: usize| {
            if rank == 0 {
                String::new()
            } else {
                format!("({})", vec![":"; rank].join(", "))
            }
        };
        let mut lines = Vec::new();
        for arg in &f.signature.args {
            let v = &arg.var;
            let mut attrs = vec![type_of(v)?.to_string()];
            let intent = if written.contains(&v.name) { "intent(inout)" } else { "intent(in)" };
            if arg.is_optional() {
                attrs.extend(["optional".to_string(), intent.to_string()]);
            } else if v.rank == 0 && v.dtype != DataType::String {
                attrs.push("value".to_string());
            } else {
                attrs.push(intent.to_string());
            }
            if aliased.contains(&v.name) {
                attrs.push("target".to_string());
            }
            let dims = if v.rank > 0 { format!("({})", vec!["0:"; v.rank].join(", ")) } else { String::new() };
            lines.push(format!("{} :: {}{}", attrs.join(", "), v.name, dims));
        }
        for r in f.results() {
            let mut attrs = vec![type_of(r)?.to_string()];
            if !is_function {
                attrs.push("intent(out)".to_string());
            }
            if r.rank > 0 {
                attrs.push("allocatable".to_string());
            }
            if aliased.contains(&r.name) {
                attrs.push("target".to_string());
            }
            lines.push(format!("{} :: {}{}", attrs.join(", "), r.name, deferred(r.rank)));
        }
        for v in f.locals.iter().chain(self.lowering.locals()) {
            let mut attrs = vec![match v.dtype {
                DataType::String => "character(len=:)".to_string(),
                _ => type_of(v)?.to_string(),
            }];
            let dims = if v.is_stack_array {
                let bounds: Vec<String> =
                    v.shape.iter().map(|d| format!("0:{}", self.scope.dim(&last_position(d)))).collect();
                format!("({})", in_storage_order(bounds, v.rank, v.order).join(", "))
            } else {
                deferred(v.rank)
            };
            if v.is_pointer {
                attrs.push("pointer".to_string());
            } else if (v.rank > 0 && !v.is_stack_array) || v.dtype == DataType::String {
                attrs.push("allocatable".to_string());
            }
            if aliased.contains(&v.name) {
                attrs.push("target".to_string());
            }
            lines.push(format!("{} :: {}{}", attrs.join(", "), v.name, dims));
        }
        Ok(lines)
    }

    fn block(&mut self, body: &[TypedStmt], w: &mut CodeWriter) -> CompileResult<()> {
        for stmt in body {
            self.stmt(stmt, w)?;
        }
        Ok(())
    }

    fn stmt(&mut self, stmt: &TypedStmt, w: &mut CodeWriter) -> CompileResult<()> {
        match &stmt.kind {
            StmtKind::Assign { lhs, rhs } => self.assign(lhs, rhs, stmt.location, w)?,
            StmtKind::AugAssign { lhs, op, rhs } => {
                let value = BinaryOp::new(*op, lhs.clone(), rhs.clone())?;
                w.line(format!("{} = {}", self.scope.expr(lhs)?, self.scope.binary(&value)?));
            }
            StmtKind::AliasAssign { lhs, rhs } => {
                let bounds = vec!["0:"; lhs.rank].join(", ");
                w.line(format!("{}({}) => {}", lhs.name, bounds, self.scope.expr(rhs)?));
            }
            StmtKind::For(l) => {
                for pragma in &l.pragmas {
                    w.line(format!("!${}", pragma));
                }
                let step = literal_int(&l.step);
                let stop = self.scope.shifted(&l.stop, if step.is_some_and(|s| s < 0) { 1 } else { -1 })?;
                let mut header = format!("do {} = {}, {}", l.index.name, self.scope.expr(&l.start)?, stop);
                if step != Some(1) {
                    header.push_str(&format!(", {}", self.scope.expr(&l.step)?));
                }
                w.line(header);
                w.indented(|w| self.block(&l.body, w))?;
                w.line("end do");
            }
            StmtKind::While { cond, body } => {
                w.line(format!("do while ({})", self.scope.expr(cond)?));
                w.indented(|w| self.block(body, w))?;
                w.line("end do");
            }
            StmtKind::If { branches, orelse } => {
                for (k, (cond, body)) in branches.iter().enumerate() {
                    let keyword = if k == 0 { "if" } else { "else if" };
                    w.line(format!("{} ({}) then", keyword, self.scope.expr(cond)?));
                    w.indented(|w| self.block(body, w))?;
                }
                if !orelse.is_empty() {
                    w.line("else");
                    w.indented(|w| self.block(orelse, w))?;
                }
                w.line("end if");
            }
            StmtKind::Return(_) => w.line("return"),
            StmtKind::Allocate { var, reallocate } => {
                if *reallocate {
                    w.line(format!("if (allocated({})) deallocate({})", var.name, var.name));
                }
                let bounds: Vec<String> =
                    var.shape.iter().map(|d| format!("0:{}", self.scope.dim(&last_position(d)))).collect();
                let bounds = in_storage_order(bounds, var.rank, var.order);
                w.line(format!("allocate({}({}))", var.name, bounds.join(", ")));
            }
            StmtKind::Deallocate(var) if var.is_pointer => w.line(format!("nullify({})", var.name)),
            StmtKind::Deallocate(var) => w.line(format!("if (allocated({})) deallocate({})", var.name, var.name)),
            StmtKind::Expr(TypedExpr::Call(c)) if c.callee.results.is_empty() => {
                w.line(format!("call {}({})", c.callee.name, self.scope.call_args(c, &[])?));
            }
            StmtKind::Expr(TypedExpr::Call(c)) => {
                return Err(CompileError::restriction(
                    format!("discarding the result of '{}'", c.callee.name),
                    Language::Fortran,
                ))
            }
            StmtKind::Expr(e) => debug!(expr = %e, "dropping expression statement without effect"),
            StmtKind::Print(args) => {
                let args = args.iter().map(|a| self.scope.expr(a)).collect::<CompileResult<Vec<_>>>()?;
                if args.is_empty() {
                    w.line("print *, ''");
                } else {
                    w.line(format!("print *, {}", args.join(", ")));
                }
            }
            StmtKind::Pass => {}
            StmtKind::Break => w.line("exit"),
            StmtKind::Continue => w.line("cycle"),
            StmtKind::Pragma(text) => w.line(format!("!${}", text)),
        }
        Ok(())
    }

    fn assign(&mut self, lhs: &TypedExpr, rhs: &TypedExpr, location: Option<Location>, w: &mut CodeWriter) -> CompileResult<()> {
        match rhs {
            TypedExpr::Call(c) if c.callee.results.len() != 1 => {
                let outputs = match lhs {
                    TypedExpr::Tuple(items) => items.clone(),
                    other => vec![other.clone()],
                };
                w.line(format!("call {}({})", c.callee.name, self.scope.call_args(c, &outputs)?));
            }
            TypedExpr::Numpy(f @ (NumpyFunction::Linspace(_) | NumpyFunction::Diag(_) | NumpyFunction::Cross(..))) => {
                let lowered = self.lowering.lower(lhs, f, location)?;
                self.block(&lowered, w)?;
            }
            TypedExpr::Numpy(NumpyFunction::Create(c)) => {
                if let Some(value) = c.fill_value() {
                    w.line(format!("{} = {}", self.scope.expr(lhs)?, self.scope.expr(&value)?));
                }
            }
            _ => w.line(format!("{} = {}", self.scope.expr(lhs)?, self.scope.expr(rhs)?)),
        }
        Ok(())
    }
}

/// Printer of the Fortran module
pub struct FortranPrinter {
    config: CompilerConfig,
}

impl FortranPrinter {
    pub fn new(config: CompilerConfig) -> Self {
        Self { config }
    }

    fn print_constants(&self, module: &Module, w: &mut CodeWriter) -> CompileResult<()> {
        let scope = Scope { symbols: HashMap::new() };
        for c in &module.constants {
            w.line(format!("{}, parameter :: {} = {}", type_of(&c.var)?, c.var.name, scope.expr(&c.value)?));
        }
        if !module.constants.is_empty() {
            w.blank();
        }
        Ok(())
    }

    /// `bind(c)` procedure forwarding to `function` with C-compatible arguments
    fn print_companion(&self, function: &FunctionDef, signature: &CSignature, w: &mut CodeWriter) -> CompileResult<()> {
        let written = written_names(function);
        let intent = |name: &str| if written.contains(name) { "intent(inout)" } else { "intent(in)" };
        let params: Vec<&str> = signature.params.iter().map(|p| p.name.as_str()).collect();
        let returned = signature.returns.map(|k| &function.results()[k]);
        let (unit, header) = match returned {
            Some(r) => (
                "function",
                format!(
                    "function {}({}) bind(c, name = \"{}\") result({})",
                    signature.name,
                    params.join(", "),
                    signature.name,
                    r.name
                ),
            ),
            None => (
                "subroutine",
                format!("subroutine {}({}) bind(c, name = \"{}\")", signature.name, params.join(", "), signature.name),
            ),
        };
        let extents: HashMap<(usize, usize), &str> = signature
            .params
            .iter()
            .filter_map(|p| match p.role {
                ParamRole::Extent { arg, axis } => Some(((arg, axis), p.name.as_str())),
                _ => None,
            })
            .collect();

        w.line(header);
        w.indented(|w| -> CompileResult<()> {
            let mut forwarded = Vec::new();
            let mut outputs = Vec::new();
            for p in &signature.params {
                match p.role {
                    ParamRole::Value(k) => {
                        w.line(format!("{}, value :: {}", type_of(&function.signature.args[k].var)?, p.name));
                        forwarded.push(p.name.clone());
                    }
                    ParamRole::Optional(k) => {
                        let v = &function.signature.args[k].var;
                        w.line(format!("{}, optional, {} :: {}", type_of(v)?, intent(&v.name), p.name));
                        forwarded.push(p.name.clone());
                    }
                    ParamRole::Extent { .. } => w.line(format!("integer(C_INT64_T), value :: {}", p.name)),
                    ParamRole::Data(k) => {
                        let v = &function.signature.args[k].var;
                        let bounds: Vec<String> = (0..v.rank)
                            .map(|axis| format!("0:{} - 1", extents.get(&(k, axis)).copied().unwrap_or("0")))
                            .collect();
                        let bounds = in_storage_order(bounds, v.rank, v.order);
                        w.line(format!("{}, {} :: {}({})", type_of(v)?, intent(&v.name), p.name, bounds.join(", ")));
                        forwarded.push(p.name.clone());
                    }
                    ParamRole::Result(k) => {
                        w.line(format!("{}, intent(out) :: {}", type_of(&function.results()[k])?, p.name));
                        outputs.push(p.name.clone());
                    }
                    ParamRole::Array(_) => {
                        return Err(CompileError::restriction("array descriptor parameter", Language::Fortran))
                    }
                }
            }
            if let Some(r) = returned {
                w.line(format!("{} :: {}", type_of(r)?, r.name));
            }
            w.blank();
            match returned {
                Some(r) => w.line(format!("{} = {}({})", r.name, function.name(), forwarded.join(", "))),
                None => {
                    forwarded.extend(outputs);
                    w.line(format!("call {}({})", function.name(), forwarded.join(", ")));
                }
            }
            Ok(())
        })?;
        w.line(format!("end {} {}", unit, signature.name));
        Ok(())
    }
}

impl CodePrinter for FortranPrinter {
    fn extension(&self) -> &'static str {
        Language::Fortran.extension()
    }

    #[instrument(skip_all, fields(module = %module.name))]
    fn print_module(&mut self, module: &Module, diagnostics: &mut Diagnostics) -> CompileResult<String> {
        let mut w = CodeWriter::new("  ");
        w.line(format!("module {}", module.name));
        w.blank();
        w.line("use ISO_C_BINDING");
        w.blank();
        w.line("implicit none");
        w.blank();
        self.print_constants(module, &mut w)?;

        let private: Vec<&str> = module.all_functions().filter(|f| !f.is_public()).map(|f| f.name()).collect();
        if !private.is_empty() {
            w.line(format!("private :: {}", private.join(", ")));
            w.blank();
        }
        for interface in &module.interfaces {
            w.line(format!("interface {}", interface.name));
            w.indented(|w| {
                for f in &interface.functions {
                    w.line(format!("module procedure {}", f.name()));
                }
            });
            w.line(format!("end interface {}", interface.name));
            w.blank();
        }

        w.line("contains");
        w.blank();
        for function in module.all_functions() {
            Procedure::new(module, function).print(&mut w)?;
            w.line(SEPARATOR);
            w.blank();
        }

        if self.config.wrapper || self.config.header {
            let mut seen = HashSet::new();
            for function in module.all_functions().filter(|f| f.is_public()) {
                if !seen.insert(function.name()) {
                    continue;
                }
                match CSignature::new(&function.signature, Language::Fortran) {
                    Ok(signature) => {
                        self.print_companion(function, &signature, &mut w)?;
                        w.line(SEPARATOR);
                        w.blank();
                    }
                    Err(err) => diagnostics.report(
                        Diagnostic::warning(Stage::Codegen, format!("no C binding for '{}': {}", function.name(), err))
                            .with_symbol(function.name())
                            .at(function.location),
                    )?,
                }
            }
        }

        w.line(format!("end module {}", module.name));
        Ok(w.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Severity;
    use crate::expansion::expand_module;
    use crate::semantic::annotate_source;
    use pretty_assertions::assert_eq;

    fn print_with(source: &str, config: CompilerConfig) -> (String, Diagnostics) {
        let mut diagnostics = Diagnostics::new();
        let mut module = annotate_source(source, &config, &mut diagnostics).unwrap();
        expand_module(&mut module, Language::Fortran, &mut diagnostics).unwrap();
        let text = FortranPrinter::new(config).print_module(&module, &mut diagnostics).unwrap();
        (text, diagnostics)
    }

    fn fortran(source: &str) -> String {
        print_with(source, CompilerConfig::new(Language::Fortran)).0
    }

    #[test]
    fn test_scalar_function() {
        let text = fortran("def f(x: int) -> int:\n    y = x * 2\n    return y + 1\n");
        assert!(text.starts_with("module mod\n\nuse ISO_C_BINDING\n\nimplicit none\n"), "{}", text);
        assert!(text.contains("function f(x) result(Out_0001)"), "{}", text);
        assert!(text.contains("  integer(C_INT64_T), value :: x\n"), "{}", text);
        assert!(text.contains("  integer(C_INT64_T) :: Out_0001\n"), "{}", text);
        assert!(text.contains("  y = x * 2_C_INT64_T\n"), "{}", text);
        assert!(text.contains("  Out_0001 = y + 1_C_INT64_T\n"), "{}", text);
        assert!(text.contains("end function f\n"));
        assert!(!text.contains("return"));
        assert!(text.trim_end().ends_with("end module mod"));
    }

    #[test]
    fn test_array_arguments_are_assumed_shape() {
        let text = fortran("def g(a: 'float[:]', b: 'float[:]'):\n    b[:] = 2.0 * a\n");
        assert!(text.contains("subroutine g(a, b)"), "{}", text);
        assert!(text.contains("real(C_DOUBLE), intent(in) :: a(0:)"), "{}", text);
        assert!(text.contains("real(C_DOUBLE), intent(inout) :: b(0:)"), "{}", text);
        assert!(text.contains("b(:) = 2.0_C_DOUBLE * a"), "{}", text);
    }

    #[test]
    fn test_c_order_subscripts_are_reversed() {
        let text = fortran("def h(m: 'float[:,:]') -> float:\n    return m[0, 1]\n");
        assert!(text.contains("Out_0001 = m(1_C_INT64_T, 0_C_INT64_T)"), "{}", text);
    }

    #[test]
    fn test_several_results_make_a_subroutine() {
        let text = fortran("def g(x: float):\n    return x, 2.0 * x\n");
        assert!(text.contains("subroutine g(x, Out_0001, Out_0002)"), "{}", text);
        assert!(text.contains("real(C_DOUBLE), intent(out) :: Out_0002"), "{}", text);
    }

    #[test]
    fn test_allocation_bounds_follow_storage_order() {
        let text = fortran("from numpy import zeros\ndef f(n: int):\n    a = zeros((n, 3))\n");
        assert!(text.contains("real(C_DOUBLE), allocatable :: a(:, :)"), "{}", text);
        assert!(text.contains("allocate(a(0:2, 0:n - 1))"), "{}", text);
        assert!(text.contains("a = 0.0_C_DOUBLE"), "{}", text);
    }

    #[test]
    fn test_reduction_axis_counts_from_the_end_in_c_order() {
        let text = fortran(
            "from numpy import sum\ndef s(a: 'float[:,:]', b: 'float[:,:](order=F)'):\n    \
             x = sum(a, axis=0)\n    y = sum(b, axis=0)\n",
        );
        assert!(text.contains("x = sum(a, 2)"), "{}", text);
        assert!(text.contains("y = sum(b, 1)"), "{}", text);
    }

    #[test]
    fn test_matmul_swaps_c_order_operands() {
        let text = fortran("from numpy import matmul\ndef p(a: 'float[:,:]', b: 'float[:,:]'):\n    c = matmul(a, b)\n");
        assert!(text.contains("c = matmul(b, a)"), "{}", text);
    }

    #[test]
    fn test_integer_division_and_floor_division() {
        let text = fortran("def d(x: int, y: int):\n    r = x / y\n    q = x // y\n");
        assert!(text.contains("r = real(x, C_DOUBLE) / real(y, C_DOUBLE)"), "{}", text);
        assert!(text.contains("q = (x - modulo(x, y)) / y"), "{}", text);
    }

    #[test]
    fn test_optional_argument_presence() {
        let text = fortran("def f(x: int, z: 'int' = None) -> int:\n    y = x\n    if z is not None:\n        y = x + z\n    return y\n");
        assert!(text.contains("integer(C_INT64_T), optional, intent(in) :: z"), "{}", text);
        assert!(text.contains("if (present(z)) then"), "{}", text);
    }

    #[test]
    fn test_loops_and_pragmas() {
        let text = fortran("def f(n: int) -> int:\n    s = 0\n    #$ omp parallel do\n    for i in range(n):\n        s += i\n    return s\n");
        assert!(text.contains("!$omp parallel do\n"), "{}", text);
        assert!(text.contains("do i = 0_C_INT64_T, n - 1\n"), "{}", text);
        assert!(text.contains("s = s + i"), "{}", text);
        assert!(text.contains("end do"));
    }

    #[test]
    fn test_diag_is_lowered_to_loops() {
        let text = fortran("from numpy import diag\ndef f(v: 'float[:]'):\n    m = diag(v)\n");
        assert!(text.contains("integer(C_INT64_T) :: k"), "{}", text);
        assert!(text.contains("m(k, k) = v(k)"), "{}", text);
    }

    #[test]
    fn test_companions_only_with_header_or_wrapper() {
        let source = "def f(a: 'float[:,:]', x: int) -> float:\n    return a[0, 0] + x\n";
        let plain = CompilerConfig { header: false, ..CompilerConfig::new(Language::Fortran) };
        assert!(!print_with(source, plain).0.contains("bind(c"));
        let (text, _) = print_with(source, CompilerConfig::new(Language::Fortran).with_wrapper(true));
        assert!(
            text.contains("function bind_c_f(n0_a, n1_a, a, x) bind(c, name = \"bind_c_f\") result(Out_0001)"),
            "{}",
            text
        );
        assert!(text.contains("real(C_DOUBLE), intent(in) :: a(0:n1_a - 1, 0:n0_a - 1)"), "{}", text);
        assert!(text.contains("Out_0001 = f(a, x)"), "{}", text);
    }

    #[test]
    fn test_array_result_has_no_companion() {
        let source = "from numpy import ones\ndef f(n: int):\n    a = ones(n)\n    return a\n";
        let (text, diagnostics) = print_with(source, CompilerConfig::new(Language::Fortran).with_wrapper(true));
        assert!(!text.contains("bind_c_f"));
        assert_eq!(diagnostics.count(Severity::Warning), 1);
    }
}
