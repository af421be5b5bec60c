//! C99 printer
//!
//! Arrays are `t_ndarray` descriptors from `ndarrays.h`; elements are read
//! and written through `GET_ELEMENT`, so both memory orders print alike.
//! Whole-array library calls left at the root of a statement are lowered to
//! loops first. Owned arrays are released before every return.

use std::collections::{HashMap, HashSet};

use tracing::{debug, instrument};

use super::header::{CSignature, ParamRole};
use super::lowering::Lowering;
use super::{
    float_text, literal_int, owned_arrays, print_dim, symbol_table, CodePrinter, CodeWriter, NameRegistry,
};
use crate::ast::{
    BinaryOp, Cast, Dim, FunctionCall, FunctionDef, IfTernary, Index, IndexedElement, Literal, LiteralValue,
    MathFunction, Module, NumpyFunction, Operator, Slice, StmtKind, TypedExpr, TypedStmt, UnaryOp, UnaryOperator,
    Variable,
};
use crate::config::{CompilerConfig, Language};
use crate::diagnostics::{Diagnostics, Location};
use crate::error::{CompileError, CompileResult};
use crate::types::{native_type, ndarray_field, resolve_precision, DataType, Order};

const SEPARATOR: &str = "/*........................................*/";

fn restriction(construct: impl Into<String>) -> CompileError {
    CompileError::restriction(construct, Language::C)
}

fn c_type(v: &Variable) -> CompileResult<&'static str> {
    if v.rank > 0 {
        Ok("t_ndarray")
    } else {
        native_type(&v.dtype, v.precision, Language::C)
    }
}

fn order_flag(order: Option<Order>) -> &'static str {
    match order {
        Some(Order::F) => "order_f",
        _ => "order_c",
    }
}

fn integral(e: &TypedExpr) -> bool {
    matches!(e.dtype(), DataType::Integer | DataType::Bool)
}

pub(super) fn literal(l: &Literal) -> String {
    match &l.value {
        LiteralValue::Int(n) if i32::try_from(*n).is_ok() => n.to_string(),
        LiteralValue::Int(n) => format!("INT64_C({})", n),
        LiteralValue::Float(x) if resolve_precision(&DataType::Real, l.precision) == 4 => format!("{}f", float_text(*x)),
        LiteralValue::Float(x) => float_text(*x),
        LiteralValue::Complex { re, im } => format!("({} + {} * _Complex_I)", float_text(*re), float_text(*im)),
        LiteralValue::Bool(b) => b.to_string(),
        LiteralValue::Str(s) => format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
    }
}

/// Call arguments that are array sections, outermost first
fn sections<'e>(e: &'e TypedExpr, found: &mut Vec<&'e TypedExpr>) {
    if let TypedExpr::Call(c) = e {
        for arg in &c.args {
            if matches!(arg, TypedExpr::Indexed(_)) && arg.rank() > 0 && !found.contains(&arg) {
                found.push(arg);
            }
        }
    }
    for child in e.children() {
        sections(child, found);
    }
}

/// Expression printing within one function
struct Scope {
    symbols: HashMap<String, Variable>,
    /// Parameters received by address
    by_reference: HashSet<String>,
}

impl Scope {
    fn var(&self, name: &str) -> String {
        if self.by_reference.contains(name) {
            format!("(*{})", name)
        } else {
            name.to_string()
        }
    }

    fn dim(&self, d: &Dim) -> String {
        print_dim(d, &|var, axis| format!("{}.shape[{}]", self.var(var), axis))
    }

    fn expr(&self, e: &TypedExpr) -> CompileResult<String> {
        match e {
            TypedExpr::Literal(l) => Ok(literal(l)),
            TypedExpr::Var(v) => Ok(self.var(&v.name)),
            TypedExpr::Indexed(i) => self.element(i),
            TypedExpr::Binary(b) => self.binary(b),
            TypedExpr::Unary(u) => self.unary(u),
            TypedExpr::Numpy(f) => self.numpy(f, e),
            TypedExpr::Cast(c) => self.cast(c),
            TypedExpr::Call(c) if c.callee.results.len() == 1 => Ok(format!("{}({})", c.callee.name, self.call_args(c, &[])?)),
            TypedExpr::Call(c) => Err(restriction(format!(
                "using the {} results of '{}' inside an expression",
                c.callee.results.len(),
                c.callee.name
            ))),
            TypedExpr::Size(d) => Ok(self.dim(d)),
            TypedExpr::IfTernary(IfTernary { cond, then, orelse }) => Ok(format!(
                "{} ? {} : {}",
                self.operand(cond, 1)?,
                self.operand(then, 1)?,
                self.operand(orelse, 1)?
            )),
            TypedExpr::Tuple(_) => Err(restriction("tuple expression")),
            TypedExpr::Nil => Ok("NULL".to_string()),
        }
    }

    fn operand(&self, e: &TypedExpr, min: u8) -> CompileResult<String> {
        let precedence = match e {
            TypedExpr::Binary(b) if b.op == Operator::Pow => 10,
            TypedExpr::Binary(b) => b.op.precedence(),
            TypedExpr::Unary(_) | TypedExpr::Cast(_) => 9,
            TypedExpr::IfTernary(_) => 0,
            TypedExpr::Literal(l) => match l.value {
                LiteralValue::Int(n) if n < 0 => 9,
                LiteralValue::Float(x) if x < 0.0 => 9,
                _ => 10,
            },
            _ => 10,
        };
        let text = self.expr(e)?;
        Ok(if precedence < min { format!("({})", text) } else { text })
    }

    /// Subscript passed through `...`, which must be a 64-bit integer
    fn subscript(&self, e: &TypedExpr) -> CompileResult<String> {
        if let Some(n) = literal_int(e) {
            return Ok(format!("INT64_C({})", n));
        }
        let text = self.expr(e)?;
        let wide = e.dtype() == DataType::Integer
            && resolve_precision(&DataType::Integer, e.precision()) == 8
            && !e.variable_names().is_empty();
        Ok(if wide { text } else { format!("(int64_t)({})", text) })
    }

    fn element(&self, i: &IndexedElement) -> CompileResult<String> {
        let mut subscripts = Vec::with_capacity(i.base.rank);
        for index in i.full_indices() {
            match index {
                Index::Elem(e) => subscripts.push(self.subscript(&e)?),
                Index::Slice(_) => return Err(restriction(format!("array section of '{}' inside an expression", i.base.name))),
            }
        }
        let field = ndarray_field(&i.base.dtype, i.base.precision)?;
        Ok(format!("GET_ELEMENT({}, {}, {})", self.var(&i.base.name), field, subscripts.join(", ")))
    }

    /// View descriptor of an array section
    fn section(&self, i: &IndexedElement) -> CompileResult<String> {
        let base = self.var(&i.base.name);
        let mut slices = Vec::with_capacity(i.base.rank);
        for (axis, index) in i.full_indices().iter().enumerate() {
            let slice = match index {
                Index::Elem(e) => {
                    let at = self.subscript(e)?;
                    format!("new_slice({}, {} + 1, 0)", at, at)
                }
                Index::Slice(s) => self.slice(s, &base, axis)?,
            };
            slices.push(slice);
        }
        let rank = i.rank();
        Ok(format!("array_slicing({}, {}, {})", base, rank, slices.join(", ")))
    }

    fn slice(&self, s: &Slice, base: &str, axis: usize) -> CompileResult<String> {
        let step = s.step.as_deref();
        let negative = step.and_then(literal_int).is_some_and(|n| n < 0);
        let bound = |e: Option<&TypedExpr>, default: String| -> CompileResult<String> {
            match e {
                Some(e) => self.subscript(e),
                None => Ok(default),
            }
        };
        let length = format!("{}.shape[{}]", base, axis);
        let (start, stop) = if negative {
            (bound(s.start.as_deref(), format!("{} - 1", length))?, bound(s.stop.as_deref(), "-1".to_string())?)
        } else {
            (bound(s.start.as_deref(), "0".to_string())?, bound(s.stop.as_deref(), length)?)
        };
        let step = bound(step, "1".to_string())?;
        Ok(format!("new_slice({}, {}, {})", start, stop, step))
    }

    fn binary(&self, b: &BinaryOp) -> CompileResult<String> {
        let (left, right) = (&*b.left, &*b.right);
        let p = b.op.precedence();
        let both_integral = integral(left) && integral(right);
        let symbol = match b.op {
            Operator::Div if both_integral => {
                let real = native_type(&DataType::Real, b.result_precision(), Language::C)?;
                return Ok(format!("({}){} / ({}){}", real, self.operand(left, 10)?, real, self.operand(right, 10)?));
            }
            Operator::FloorDiv if both_integral => {
                let (l, r) = (self.expr(left)?, self.expr(right)?);
                let int = native_type(&b.result_dtype(), b.result_precision(), Language::C)?;
                return Ok(format!("({})floor((double)({}) / (double)({}))", int, l, r));
            }
            Operator::FloorDiv => return Ok(format!("floor({} / {})", self.operand(left, p)?, self.operand(right, p + 1)?)),
            Operator::Mod if both_integral => {
                let (l, r) = (self.operand(left, 10)?, self.operand(right, 10)?);
                return Ok(format!("(({} % {}) + {}) % {}", l, r, r, r));
            }
            Operator::Mod => {
                let (l, r) = (self.expr(left)?, self.expr(right)?);
                return Ok(format!("fmod(fmod({}, {}) + {}, {})", l, r, r, r));
            }
            Operator::Pow => {
                let power = format!("pow({}, {})", self.expr(left)?, self.expr(right)?);
                return Ok(match b.result_dtype() {
                    DataType::Integer => format!("({})({})", native_type(&DataType::Integer, b.result_precision(), Language::C)?, power),
                    _ => power,
                });
            }
            Operator::Is | Operator::IsNot => return self.identity(b),
            Operator::Add => "+",
            Operator::Sub => "-",
            Operator::Mul => "*",
            Operator::Div => "/",
            Operator::Eq => "==",
            Operator::Ne => "!=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::And => "&&",
            Operator::Or => "||",
        };
        Ok(format!("{} {} {}", self.operand(left, p)?, symbol, self.operand(right, p + 1)?))
    }

    /// `x is None` compares the address of an optional argument with NULL
    fn identity(&self, b: &BinaryOp) -> CompileResult<String> {
        let symbol = if b.op == Operator::Is { "==" } else { "!=" };
        match (&*b.left, &*b.right) {
            (TypedExpr::Var(v), TypedExpr::Nil) | (TypedExpr::Nil, TypedExpr::Var(v)) => {
                Ok(format!("{} {} NULL", v.name, symbol))
            }
            (l, r) if l.dtype() == DataType::Bool && r.dtype() == DataType::Bool => {
                Ok(format!("{} {} {}", self.operand(l, 5)?, symbol, self.operand(r, 5)?))
            }
            _ => Err(restriction("identity test between values")),
        }
    }

    fn unary(&self, u: &UnaryOp) -> CompileResult<String> {
        match u.op {
            UnaryOperator::Neg => Ok(format!("-{}", self.operand(&u.operand, 10)?)),
            UnaryOperator::Pos => self.expr(&u.operand),
            UnaryOperator::Not => Ok(format!("!{}", self.operand(&u.operand, 10)?)),
        }
    }

    fn cast(&self, c: &Cast) -> CompileResult<String> {
        let arg = self.operand(&c.arg, 10)?;
        match c.dtype {
            DataType::Bool => Ok(format!("{} != 0", self.operand(&c.arg, 5)?)),
            DataType::Integer | DataType::Real | DataType::Complex => {
                Ok(format!("({}){}", native_type(&c.dtype, c.precision, Language::C)?, arg))
            }
            _ => Err(restriction(format!("conversion to {}", c.dtype))),
        }
    }

    fn numpy(&self, f: &NumpyFunction, node: &TypedExpr) -> CompileResult<String> {
        match f {
            NumpyFunction::Copy(arg) if arg.rank() == 0 => self.expr(arg),
            NumpyFunction::Math(m) => {
                let arg = self.expr(&m.arg)?;
                let real = native_type(&DataType::Real, node.precision(), Language::C)?;
                let text = match (m.func, m.arg.dtype()) {
                    (MathFunction::Abs, DataType::Integer) => format!("llabs({})", arg),
                    (MathFunction::Abs, DataType::Bool) => format!("(int64_t)({})", arg),
                    (MathFunction::Abs, _) => format!("fabs({})", arg),
                    (func, DataType::Integer | DataType::Bool) => format!("{}(({}){})", func.name(), real, self.operand(&m.arg, 10)?),
                    (func, _) => format!("{}({})", func.name(), arg),
                };
                Ok(text)
            }
            other => Err(restriction(format!("{}() inside an expression", other.name()))),
        }
    }

    fn call_args(&self, call: &FunctionCall, outputs: &[TypedExpr]) -> CompileResult<String> {
        let mut args = Vec::with_capacity(call.args.len() + outputs.len());
        for (param, arg) in call.callee.args.iter().zip(&call.args) {
            let text = match arg {
                TypedExpr::Nil => "NULL".to_string(),
                TypedExpr::Var(v) if param.is_optional() => format!("&{}", self.var(&v.name)),
                value if param.is_optional() => {
                    let ty = c_type(&param.var)?;
                    format!("&({}){{{}}}", ty, self.expr(value)?)
                }
                value => self.expr(value)?,
            };
            args.push(text);
        }
        for out in outputs {
            args.push(format!("&{}", self.expr(out)?));
        }
        Ok(args.join(", "))
    }
}

/// Printing state of one function
struct Function<'a> {
    function: &'a FunctionDef,
    signature: CSignature,
    scope: Scope,
    lowering: Lowering,
    /// Extra declarations: stack buffers and section views
    views: Vec<String>,
}

impl<'a> Function<'a> {
    fn new(module: &Module, function: &'a FunctionDef) -> CompileResult<Self> {
        let signature = CSignature::new(&function.signature, Language::C)?;
        let by_reference = signature
            .params
            .iter()
            .filter(|p| matches!(p.role, ParamRole::Optional(_) | ParamRole::Result(_)))
            .map(|p| p.name.clone())
            .collect();
        let names = NameRegistry::for_function(module, function);
        Ok(Self {
            function,
            signature,
            scope: Scope { symbols: symbol_table(module, function), by_reference },
            lowering: Lowering::new(Language::C, names),
            views: Vec::new(),
        })
    }

    fn print(mut self, w: &mut CodeWriter) -> CompileResult<()> {
        let f = self.function;
        let mut body = w.nested();
        body.indented(|b| -> CompileResult<()> {
            self.block(&f.body, b)?;
            if !super::ends_with_return(&f.body) {
                self.release(b);
            }
            Ok(())
        })?;

        let declarations = self.declarations()?;
        let prefix = if f.is_public() { "" } else { "static " };
        w.line(format!("{}{}", prefix, self.signature.prototype()));
        w.line("{");
        w.indented(|w| {
            for d in &declarations {
                w.line(d);
            }
        });
        if !declarations.is_empty() && !body.is_empty() {
            w.blank();
        }
        w.append(body);
        w.line("}");
        Ok(())
    }

    fn declarations(&mut self) -> CompileResult<Vec<String>> {
        let f = self.function;
        let mut lines = Vec::new();
        let returned = self.signature.returns.map(|k| &f.results()[k]);
        let locals: Vec<Variable> = returned.into_iter().chain(&f.locals).chain(self.lowering.locals()).cloned().collect();
        for v in &locals {
            if v.is_stack_array {
                lines.extend(self.stack_array(v)?);
            } else if v.rank > 0 {
                lines.push(format!("t_ndarray {} = {{.shape = NULL}};", v.name));
            } else {
                lines.push(format!("{} {};", c_type(v)?, v.name));
            }
        }
        lines.append(&mut self.views);
        Ok(lines)
    }

    /// Buffer on the stack and the descriptor viewing it
    fn stack_array(&mut self, v: &Variable) -> CompileResult<Vec<String>> {
        let known = |name: &str| self.scope.symbols.get(name).is_some_and(|s| s.is_argument || s.is_const);
        if let Some(unknown) = v.shape.iter().flat_map(Dim::variables).find(|n| !known(*n)) {
            return Err(restriction(format!(
                "stack array '{}' sized by '{}', which is not an argument",
                v.name, unknown
            )));
        }
        let buffer = self.lowering.names_mut().fresh(&format!("{}_buffer", v.name));
        let dims: Vec<String> = v.shape.iter().map(|d| self.scope.dim(d)).collect();
        let length: Vec<String> = v.shape.iter().map(|d| match d {
            Dim::Add(..) | Dim::Sub(..) => format!("({})", self.scope.dim(d)),
            _ => self.scope.dim(d),
        }).collect();
        let element = native_type(&v.dtype, v.precision, Language::C)?;
        Ok(vec![
            format!("{} {}[{}];", element, buffer, length.join(" * ")),
            format!(
                "t_ndarray {} = stack_array_init({}, (int64_t[]){{{}}}, {}, {}, {});",
                v.name,
                v.rank,
                dims.join(", "),
                ndarray_field(&v.dtype, v.precision)?,
                order_flag(v.order),
                buffer
            ),
        ])
    }

    /// Free every array the function owns
    fn release(&self, w: &mut CodeWriter) {
        for v in owned_arrays(self.function) {
            if v.is_pointer || v.is_stack_array {
                w.line(format!("free_pointer(&{});", v.name));
            } else {
                w.line(format!("free_array(&{});", v.name));
            }
        }
    }

    fn block(&mut self, body: &[TypedStmt], w: &mut CodeWriter) -> CompileResult<()> {
        for stmt in body {
            self.stmt(stmt, w)?;
        }
        Ok(())
    }

    /// `e` with its section arguments replaced by views declared before the statement
    fn bind_sections(&mut self, e: &TypedExpr, w: &mut CodeWriter, views: &mut Vec<String>) -> CompileResult<TypedExpr> {
        let mut found = Vec::new();
        sections(e, &mut found);
        if found.is_empty() {
            return Ok(e.clone());
        }
        let (mut old, mut new) = (Vec::new(), Vec::new());
        for section in found {
            let TypedExpr::Indexed(i) = section else { continue };
            let name = self.lowering.names_mut().fresh("view");
            let mut view = i.base.renamed(name.clone()).with_shape(section.rank(), section.shape(), section.order());
            view.is_pointer = true;
            view.is_argument = false;
            self.views.push(format!("t_ndarray {} = {{.shape = NULL}};", name));
            w.line(format!("{} = {};", name, self.scope.section(i)?));
            views.push(name);
            old.push(section.clone());
            new.push(TypedExpr::Var(view));
        }
        let mut bound = e.clone();
        bound.substitute(&old, &new, &[]);
        Ok(bound)
    }

    fn stmt(&mut self, stmt: &TypedStmt, w: &mut CodeWriter) -> CompileResult<()> {
        let mut views = Vec::new();
        match &stmt.kind {
            StmtKind::Assign { lhs, rhs } => {
                let rhs = self.bind_sections(rhs, w, &mut views)?;
                self.assign(lhs, &rhs, stmt.location, w)?;
            }
            StmtKind::AugAssign { lhs, op, rhs } => {
                let rhs = self.bind_sections(rhs, w, &mut views)?;
                let target = self.scope.expr(lhs)?;
                match op {
                    Operator::Add | Operator::Sub | Operator::Mul => {
                        let symbol = op.symbol();
                        w.line(format!("{} {}= {};", target, symbol, self.scope.expr(&rhs)?));
                    }
                    _ => {
                        let value = BinaryOp::new(*op, lhs.clone(), rhs)?;
                        w.line(format!("{} = {};", target, self.scope.binary(&value)?));
                    }
                }
            }
            StmtKind::AliasAssign { lhs, rhs } => {
                let target = self.scope.var(&lhs.name);
                w.line(format!("free_pointer(&{});", target));
                match rhs {
                    TypedExpr::Var(v) => w.line(format!("alias_assign(&{}, {});", target, self.scope.var(&v.name))),
                    TypedExpr::Indexed(i) => w.line(format!("{} = {};", target, self.scope.section(i)?)),
                    other => return Err(restriction(format!("aliasing the value of {}", other))),
                }
            }
            StmtKind::For(l) => {
                for pragma in &l.pragmas {
                    self.pragma(pragma, w);
                }
                let index = &l.index.name;
                let step = literal_int(&l.step);
                let comparison = if step.is_some_and(|s| s < 0) { ">" } else { "<" };
                let increment = match step {
                    Some(1) => format!("{} += 1", index),
                    _ => format!("{} += {}", index, self.scope.operand(&l.step, 10)?),
                };
                w.line(format!(
                    "for ({} = {}; {} {} {}; {})",
                    index,
                    self.scope.expr(&l.start)?,
                    index,
                    comparison,
                    self.scope.operand(&l.stop, 5)?,
                    increment
                ));
                self.braced(&l.body, w)?;
            }
            StmtKind::While { cond, body } => {
                w.line(format!("while ({})", self.scope.expr(cond)?));
                self.braced(body, w)?;
            }
            StmtKind::If { branches, orelse } => {
                for (k, (cond, body)) in branches.iter().enumerate() {
                    let keyword = if k == 0 { "if" } else { "else if" };
                    w.line(format!("{} ({})", keyword, self.scope.expr(cond)?));
                    self.braced(body, w)?;
                }
                if !orelse.is_empty() {
                    w.line("else");
                    self.braced(orelse, w)?;
                }
            }
            StmtKind::Return(results) => {
                self.release(w);
                match self.signature.returns {
                    Some(k) => w.line(format!("return {};", results.get(k).map_or_else(
                        || self.function.results()[k].name.clone(),
                        |r| r.name.clone(),
                    ))),
                    None => w.line("return;"),
                }
            }
            StmtKind::Allocate { var, .. } if var.is_stack_array => {}
            StmtKind::Allocate { var, reallocate } => {
                let target = self.scope.var(&var.name);
                if *reallocate {
                    w.line(format!("free_array(&{});", target));
                }
                let dims: Vec<String> = var.shape.iter().map(|d| self.scope.dim(d)).collect();
                w.line(format!(
                    "{} = array_create({}, (int64_t[]){{{}}}, {}, false, {});",
                    target,
                    var.rank,
                    dims.join(", "),
                    ndarray_field(&var.dtype, var.precision)?,
                    order_flag(var.order)
                ));
            }
            StmtKind::Deallocate(var) if var.is_pointer => w.line(format!("free_pointer(&{});", self.scope.var(&var.name))),
            StmtKind::Deallocate(var) => w.line(format!("free_array(&{});", self.scope.var(&var.name))),
            StmtKind::Expr(e @ TypedExpr::Call(_)) => {
                if let TypedExpr::Call(c) = self.bind_sections(e, w, &mut views)? {
                    w.line(format!("{}({});", c.callee.name, self.scope.call_args(&c, &[])?));
                }
            }
            StmtKind::Expr(e) => debug!(expr = %e, "dropping expression statement without effect"),
            StmtKind::Print(args) => w.line(self.print_call(args)?),
            StmtKind::Pass => {}
            StmtKind::Break => w.line("break;"),
            StmtKind::Continue => w.line("continue;"),
            StmtKind::Pragma(text) => self.pragma(text, w),
        }
        for view in views {
            w.line(format!("free_pointer(&{});", view));
        }
        Ok(())
    }

    fn braced(&mut self, body: &[TypedStmt], w: &mut CodeWriter) -> CompileResult<()> {
        w.line("{");
        w.indented(|w| self.block(body, w))?;
        w.line("}");
        Ok(())
    }

    fn pragma(&self, text: &str, w: &mut CodeWriter) {
        // Closing directives only exist in Fortran
        if text.split_whitespace().nth(1) == Some("end") {
            debug!(pragma = text, "skipping closing directive");
            return;
        }
        w.line(format!("#pragma {}", text));
    }

    fn assign(&mut self, lhs: &TypedExpr, rhs: &TypedExpr, location: Option<Location>, w: &mut CodeWriter) -> CompileResult<()> {
        match rhs {
            TypedExpr::Call(c) if c.callee.results.len() != 1 => {
                let outputs = match lhs {
                    TypedExpr::Tuple(items) => items.clone(),
                    other => vec![other.clone()],
                };
                w.line(format!("{}({});", c.callee.name, self.scope.call_args(c, &outputs)?));
            }
            TypedExpr::Numpy(f) if !f.is_elemental() => {
                let lowered = self.lowering.lower(lhs, f, location)?;
                self.block(&lowered, w)?;
            }
            _ => w.line(format!("{} = {};", self.scope.expr(lhs)?, self.scope.expr(rhs)?)),
        }
        Ok(())
    }

    fn print_call(&self, args: &[TypedExpr]) -> CompileResult<String> {
        let mut formats = Vec::with_capacity(args.len());
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            if arg.rank() > 0 {
                return Err(restriction("printing an array"));
            }
            let value = self.scope.expr(arg)?;
            match arg.dtype() {
                DataType::Integer => {
                    formats.push("%lld");
                    values.push(format!("(long long)({})", value));
                }
                DataType::Real => {
                    formats.push("%.15g");
                    values.push(value);
                }
                DataType::Complex => {
                    formats.push("(%.15g%+.15gj)");
                    values.push(format!("creal({})", value));
                    values.push(format!("cimag({})", value));
                }
                DataType::Bool => {
                    formats.push("%s");
                    values.push(format!("{} ? \"True\" : \"False\"", self.scope.operand(arg, 1)?));
                }
                DataType::String => {
                    formats.push("%s");
                    values.push(value);
                }
                other => return Err(restriction(format!("printing a value of type {}", other))),
            }
        }
        let mut call = format!("printf(\"{}\\n\"", formats.join(" "));
        for v in values {
            call.push_str(", ");
            call.push_str(&v);
        }
        call.push_str(");");
        Ok(call)
    }
}

/// Printer of the C source file
pub struct CPrinter {
    config: CompilerConfig,
}

impl CPrinter {
    pub fn new(config: CompilerConfig) -> Self {
        Self { config }
    }
}

impl CodePrinter for CPrinter {
    fn extension(&self) -> &'static str {
        Language::C.extension()
    }

    #[instrument(skip_all, fields(module = %module.name))]
    fn print_module(&mut self, module: &Module, _diagnostics: &mut Diagnostics) -> CompileResult<String> {
        let mut w = CodeWriter::new("    ");
        if self.config.header {
            w.line(format!("#include \"{}.h\"", module.name));
        }
        for include in ["stdlib.h", "stdint.h", "stdbool.h", "stdio.h", "tgmath.h"] {
            w.line(format!("#include <{}>", include));
        }
        w.line(format!("#include \"{}\"", super::runtime::NDARRAYS_HEADER));
        w.blank();

        let constants = Scope { symbols: HashMap::new(), by_reference: HashSet::new() };
        for c in &module.constants {
            w.line(format!("static const {} {} = {};", c_type(&c.var)?, c.var.name, constants.expr(&c.value)?));
        }
        if !module.constants.is_empty() {
            w.blank();
        }

        let mut prototypes = Vec::new();
        for function in module.all_functions() {
            if function.is_public() && self.config.header {
                continue;
            }
            let prefix = if function.is_public() { "" } else { "static " };
            prototypes.push(format!("{}{};", prefix, CSignature::new(&function.signature, Language::C)?.prototype()));
        }
        if !prototypes.is_empty() {
            for p in &prototypes {
                w.line(p);
            }
            w.blank();
        }

        for function in module.all_functions() {
            w.line(SEPARATOR);
            Function::new(module, function)?.print(&mut w)?;
            w.line(SEPARATOR);
            w.blank();
        }
        Ok(w.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expansion::expand_module;
    use crate::semantic::annotate_source;

    fn c_source(source: &str) -> String {
        let config = CompilerConfig::new(Language::C);
        let mut diagnostics = Diagnostics::new();
        let mut module = annotate_source(source, &config, &mut diagnostics).unwrap();
        expand_module(&mut module, Language::C, &mut diagnostics).unwrap();
        CPrinter::new(config).print_module(&module, &mut diagnostics).unwrap()
    }

    #[test]
    fn test_scalar_function() {
        let text = c_source("def f(x: int) -> int:\n    y = x * 2\n    return y + 1\n");
        assert!(text.contains("#include \"ndarrays.h\""));
        assert!(text.contains("int64_t f(int64_t x)\n{\n"), "{}", text);
        assert!(text.contains("    int64_t Out_0001;\n    int64_t y;\n"), "{}", text);
        assert!(text.contains("    y = x * 2;\n"), "{}", text);
        assert!(text.contains("    Out_0001 = y + 1;\n    return Out_0001;\n}"), "{}", text);
    }

    #[test]
    fn test_array_statement_is_looped() {
        let text = c_source("def g(a: 'float[:]', b: 'float[:]'):\n    b[:] = 2.0 * a\n");
        assert!(text.contains("void g(t_ndarray a, t_ndarray b)"), "{}", text);
        assert!(text.contains("for (i_0 = 0; i_0 < "), "{}", text);
        assert!(text.contains("GET_ELEMENT(b, nd_double, i_0) = 2.0 * GET_ELEMENT(a, nd_double, i_0);"), "{}", text);
    }

    #[test]
    fn test_reduction_is_lowered_and_arrays_released() {
        let text = c_source("from numpy import sum, ones\ndef f(n: int) -> float:\n    a = ones(n)\n    return sum(a)\n");
        assert!(text.contains("t_ndarray a = {.shape = NULL};"), "{}", text);
        assert!(text.contains("a = array_create(1, (int64_t[]){n}, nd_double, false, order_c);"), "{}", text);
        assert!(text.contains("GET_ELEMENT(a, nd_double, k) = 1.0;"), "{}", text);
        assert!(text.contains("Out_0001 = 0.0;"), "{}", text);
        assert!(text.contains("Out_0001 += GET_ELEMENT(a, nd_double, k);"), "{}", text);
        assert!(text.contains("free_array(&a);\n    return Out_0001;"), "{}", text);
    }

    #[test]
    fn test_optional_arguments() {
        let text = c_source(
            "def f(x: int, z: 'int' = None) -> int:\n    y = x\n    if z is not None:\n        y = x + z\n    return y\n\
             def h() -> int:\n    return f(1) + f(2, 3)\n",
        );
        assert!(text.contains("int64_t f(int64_t x, int64_t* z)"), "{}", text);
        assert!(text.contains("if (z != NULL)"), "{}", text);
        assert!(text.contains("y = x + (*z);"), "{}", text);
        assert!(text.contains("f(1, NULL) + f(2, &(int64_t){3})"), "{}", text);
    }

    #[test]
    fn test_several_results_are_written_through_pointers() {
        let text = c_source("def g(x: float):\n    return x, 2.0 * x\ndef h(y: float) -> float:\n    a, b = g(y)\n    return a + b\n");
        assert!(text.contains("void g(double x, double* Out_0001, double* Out_0002)"), "{}", text);
        assert!(text.contains("(*Out_0002) = 2.0 * x;"), "{}", text);
        assert!(text.contains("g(y, &a, &b);"), "{}", text);
    }

    #[test]
    fn test_alias_of_section() {
        let text = c_source("def f(a: 'float[:]'):\n    b = a[1:]\n    b[0] = 1.0\n");
        assert!(text.contains("b = array_slicing(a, 1, new_slice(INT64_C(1), a.shape[0], 1));"), "{}", text);
        assert!(text.contains("GET_ELEMENT(b, nd_double, INT64_C(0)) = 1.0;"), "{}", text);
        assert!(text.trim_end().contains("free_pointer(&b);\n}"), "{}", text);
    }

    #[test]
    fn test_python_division_semantics() {
        let text = c_source("def d(x: int, y: int):\n    r = x / y\n    q = x // y\n    m = x % y\n");
        assert!(text.contains("r = (double)x / (double)y;"), "{}", text);
        assert!(text.contains("q = (int64_t)floor((double)(x) / (double)(y));"), "{}", text);
        assert!(text.contains("m = ((x % y) + y) % y;"), "{}", text);
    }

    #[test]
    fn test_private_functions_are_static() {
        let text = c_source("@private\ndef helper(x: float) -> float:\n    return x\ndef f(x: float) -> float:\n    return helper(x)\n");
        assert!(text.contains("static double helper(double x);"), "{}", text);
        assert!(text.contains("static double helper(double x)\n{"), "{}", text);
    }
}
