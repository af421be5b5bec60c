//! Reference evaluator
//!
//! Runs an annotated module whose array statements were expanded to explicit
//! loops (the form produced for C). Library calls left at the root of an
//! assignment are lowered to loops exactly as the C printer lowers them, so
//! evaluating a function exercises the same trees the printers consume.
//!
//! Arrays share their storage between aliases, as NumPy views do.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use tracing::{debug, instrument, trace};

use crate::ast::syntax::Expr;
use crate::ast::{
    BinaryOp, Dim, FunctionArg, FunctionDef, Index, IndexedElement, LiteralValue, MathFunction, Module, NumpyFunction,
    Operator, StmtKind, TypedExpr, TypedStmt, UnaryOperator,
};
use crate::codegen::lowering::Lowering;
use crate::codegen::{float_text, NameRegistry};
use crate::config::Language;
use crate::diagnostics::Location;
use crate::error::{CompileError, CompileResult};
use crate::parser::Parser;
use crate::types::{DataType, Order};

const MAX_CALL_DEPTH: usize = 256;

fn error(msg: impl Into<String>) -> CompileError {
    CompileError::evaluation(msg)
}

/// A single number
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Complex(f64, f64),
}

impl Scalar {
    pub fn dtype(&self) -> DataType {
        match self {
            Scalar::Bool(_) => DataType::Bool,
            Scalar::Int(_) => DataType::Integer,
            Scalar::Float(_) => DataType::Real,
            Scalar::Complex(..) => DataType::Complex,
        }
    }

    fn zero(dtype: &DataType) -> CompileResult<Self> {
        Scalar::Int(0).cast(dtype)
    }

    fn as_int(&self) -> CompileResult<i64> {
        match *self {
            Scalar::Bool(b) => Ok(i64::from(b)),
            Scalar::Int(n) => Ok(n),
            other => Err(error(format!("expected an integer, got {}", other))),
        }
    }

    fn as_float(&self) -> CompileResult<f64> {
        match *self {
            Scalar::Bool(b) => Ok(f64::from(u8::from(b))),
            Scalar::Int(n) => Ok(n as f64),
            Scalar::Float(x) => Ok(x),
            Scalar::Complex(..) => Err(error(format!("expected a real number, got {}", self))),
        }
    }

    fn as_complex(&self) -> (f64, f64) {
        match *self {
            Scalar::Complex(re, im) => (re, im),
            Scalar::Bool(b) => (f64::from(u8::from(b)), 0.0),
            Scalar::Int(n) => (n as f64, 0.0),
            Scalar::Float(x) => (x, 0.0),
        }
    }

    pub fn truthy(&self) -> bool {
        match *self {
            Scalar::Bool(b) => b,
            Scalar::Int(n) => n != 0,
            Scalar::Float(x) => x != 0.0,
            Scalar::Complex(re, im) => re != 0.0 || im != 0.0,
        }
    }

    /// Conversion with Python's rules (`int()` truncates)
    pub fn cast(&self, dtype: &DataType) -> CompileResult<Self> {
        let cast = match dtype {
            DataType::Bool => Scalar::Bool(self.truthy()),
            DataType::Integer => match *self {
                Scalar::Float(x) => Scalar::Int(x.trunc() as i64),
                Scalar::Complex(..) => return Err(error(format!("cannot convert {} to int", self))),
                other => Scalar::Int(other.as_int()?),
            },
            DataType::Real => Scalar::Float(self.as_float()?),
            DataType::Complex => {
                let (re, im) = self.as_complex();
                Scalar::Complex(re, im)
            }
            other => return Err(error(format!("no numeric value of type {}", other))),
        };
        Ok(cast)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Scalar::Bool(true) => write!(f, "True"),
            Scalar::Bool(false) => write!(f, "False"),
            Scalar::Int(n) => write!(f, "{}", n),
            Scalar::Float(x) => write!(f, "{}", float_text(x)),
            Scalar::Complex(re, im) if im < 0.0 => write!(f, "({}-{}j)", float_text(re), float_text(-im)),
            Scalar::Complex(re, im) => write!(f, "({}+{}j)", float_text(re), float_text(im)),
        }
    }
}

/// Strided view of shared storage
#[derive(Debug, Clone)]
pub struct Array {
    data: Rc<RefCell<Vec<Scalar>>>,
    offset: i64,
    shape: Vec<usize>,
    strides: Vec<i64>,
    dtype: DataType,
}

/// Selection along one axis of an array
enum Selection {
    At(i64),
    Range { start: Option<i64>, stop: Option<i64>, step: i64 },
}

fn contiguous_strides(shape: &[usize], order: Option<Order>) -> Vec<i64> {
    let mut strides = vec![0; shape.len()];
    let mut stride = 1i64;
    let axes: Vec<usize> = match order {
        Some(Order::F) => (0..shape.len()).collect(),
        _ => (0..shape.len()).rev().collect(),
    };
    for axis in axes {
        strides[axis] = stride;
        stride *= shape[axis] as i64;
    }
    strides
}

impl Array {
    pub fn zeros(shape: Vec<usize>, dtype: DataType, order: Option<Order>) -> CompileResult<Self> {
        let length = shape.iter().product();
        let data = vec![Scalar::zero(&dtype)?; length];
        Ok(Self {
            data: Rc::new(RefCell::new(data)),
            offset: 0,
            strides: contiguous_strides(&shape, order),
            shape,
            dtype,
        })
    }

    /// Row-major array holding `values`
    pub fn from_values(shape: Vec<usize>, values: Vec<Scalar>) -> CompileResult<Self> {
        if shape.iter().product::<usize>() != values.len() {
            return Err(error(format!("{} values do not fill shape {:?}", values.len(), shape)));
        }
        let dtype = values
            .iter()
            .map(Scalar::dtype)
            .try_fold(DataType::Bool, |acc, d| acc.promote(&d))?;
        let values = values.iter().map(|v| v.cast(&dtype)).collect::<CompileResult<Vec<_>>>()?;
        Ok(Self {
            data: Rc::new(RefCell::new(values)),
            offset: 0,
            strides: contiguous_strides(&shape, None),
            shape,
            dtype,
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn dtype(&self) -> &DataType {
        &self.dtype
    }

    fn position(&self, index: &[i64]) -> CompileResult<usize> {
        if index.len() != self.shape.len() {
            return Err(error(format!("{} indices for an array of rank {}", index.len(), self.shape.len())));
        }
        let mut position = self.offset;
        for (axis, (&i, &length)) in index.iter().zip(&self.shape).enumerate() {
            if i < 0 || i >= length as i64 {
                return Err(error(format!("index {} out of bounds for axis {} of length {}", i, axis, length)));
            }
            position += i * self.strides[axis];
        }
        usize::try_from(position).map_err(|_| error("position before the start of the array"))
    }

    pub fn get(&self, index: &[i64]) -> CompileResult<Scalar> {
        let position = self.position(index)?;
        self.data
            .borrow()
            .get(position)
            .copied()
            .ok_or_else(|| error("position past the end of the array"))
    }

    pub fn set(&self, index: &[i64], value: Scalar) -> CompileResult<()> {
        let position = self.position(index)?;
        let value = value.cast(&self.dtype)?;
        match self.data.borrow_mut().get_mut(position) {
            Some(slot) => *slot = value,
            None => return Err(error("position past the end of the array")),
        }
        Ok(())
    }

    fn section(&self, selections: &[Selection]) -> CompileResult<Array> {
        let mut view = Array { shape: Vec::new(), strides: Vec::new(), ..self.clone() };
        for (axis, selection) in selections.iter().enumerate() {
            let length = self.shape[axis] as i64;
            let stride = self.strides[axis];
            match *selection {
                Selection::At(i) => {
                    if i < 0 || i >= length {
                        return Err(error(format!("index {} out of bounds for axis {} of length {}", i, axis, length)));
                    }
                    view.offset += i * stride;
                }
                Selection::Range { start, stop, step } => {
                    let (start, extent) = if step > 0 {
                        let start = start.unwrap_or(0).clamp(0, length);
                        let stop = stop.unwrap_or(length).clamp(0, length);
                        (start, (stop - start + step - 1) / step)
                    } else if step < 0 {
                        let start = start.unwrap_or(length - 1).clamp(-1, length - 1);
                        let stop = stop.unwrap_or(-1).clamp(-1, length - 1);
                        (start, (start - stop - step - 1) / -step)
                    } else {
                        return Err(error("slice step cannot be zero"));
                    };
                    let extent = extent.max(0);
                    if extent > 0 {
                        view.offset += start * stride;
                    }
                    view.shape.push(extent as usize);
                    view.strides.push(stride * step);
                }
            }
        }
        Ok(view)
    }

    /// Elements in row-major order
    pub fn values(&self) -> Vec<Scalar> {
        let data = self.data.borrow();
        let mut values = Vec::with_capacity(self.shape.iter().product());
        let mut index = vec![0usize; self.shape.len()];
        if self.shape.contains(&0) {
            return values;
        }
        loop {
            let position = self.offset + index.iter().zip(&self.strides).map(|(&i, s)| i as i64 * s).sum::<i64>();
            if let Some(v) = usize::try_from(position).ok().and_then(|p| data.get(p)) {
                values.push(*v);
            }
            let mut axis = self.shape.len();
            loop {
                if axis == 0 {
                    return values;
                }
                axis -= 1;
                index[axis] += 1;
                if index[axis] < self.shape[axis] {
                    break;
                }
                index[axis] = 0;
            }
        }
    }
}

impl PartialEq for Array {
    fn eq(&self, other: &Self) -> bool {
        self.shape == other.shape && self.values() == other.values()
    }
}

impl fmt::Display for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn nested(values: &[Scalar], shape: &[usize]) -> String {
            match shape.split_first() {
                None => values.first().map_or_else(String::new, ToString::to_string),
                Some((&n, rest)) => {
                    let chunk: usize = rest.iter().product::<usize>().max(1);
                    let items: Vec<String> = (0..n)
                        .map(|k| nested(values.get(k * chunk..(k + 1) * chunk).unwrap_or(&[]), rest))
                        .collect();
                    format!("[{}]", items.join(", "))
                }
            }
        }
        write!(f, "{}", nested(&self.values(), &self.shape))
    }
}

/// Any value a variable can hold
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(Scalar),
    Array(Array),
    Str(String),
    Tuple(Vec<Value>),
    None,
}

impl Value {
    pub fn int(n: i64) -> Self {
        Value::Scalar(Scalar::Int(n))
    }

    pub fn float(x: f64) -> Self {
        Value::Scalar(Scalar::Float(x))
    }

    fn scalar(&self) -> CompileResult<Scalar> {
        match self {
            Value::Scalar(s) => Ok(*s),
            other => Err(error(format!("expected a number, got {}", other))),
        }
    }

    fn array(&self) -> CompileResult<&Array> {
        match self {
            Value::Array(a) => Ok(a),
            other => Err(error(format!("expected an array, got {}", other))),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Scalar(s) => write!(f, "{}", s),
            Value::Array(a) => write!(f, "{}", a),
            Value::Str(s) => write!(f, "{}", s),
            Value::Tuple(items) => {
                let items: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "({})", items.join(", "))
            }
            Value::None => write!(f, "None"),
        }
    }
}

/// Arguments of `name(...)` written as a Python call
pub fn parse_call(text: &str) -> CompileResult<(String, Vec<Value>)> {
    let expr = Parser::new(text)?.parse_test()?;
    let Expr::Call { func, args, kwargs } = expr else {
        return Err(error(format!("expected a call such as f(5), got '{}'", text.trim())));
    };
    if let Some((name, _)) = kwargs.first() {
        return Err(error(format!("keyword argument '{}' is not supported here", name)));
    }
    let name = func.dotted_name().ok_or_else(|| error("callee must be a function name"))?;
    let values = args.iter().map(value_of).collect::<CompileResult<Vec<_>>>()?;
    Ok((name, values))
}

fn value_of(expr: &Expr) -> CompileResult<Value> {
    let value = match expr {
        Expr::Int(n) => Value::int(*n),
        Expr::Float(x) => Value::float(*x),
        Expr::Imag(x) => Value::Scalar(Scalar::Complex(0.0, *x)),
        Expr::Bool(b) => Value::Scalar(Scalar::Bool(*b)),
        Expr::Str(s) => Value::Str(s.clone()),
        Expr::None => Value::None,
        Expr::Unary { op: UnaryOperator::Neg, operand } => {
            let s = value_of(operand)?.scalar()?;
            Value::Scalar(negate(s))
        }
        Expr::Binary { op: op @ (Operator::Add | Operator::Sub), left, right } => {
            let (l, r) = (value_of(left)?.scalar()?, value_of(right)?.scalar()?);
            let dtype = l.dtype().promote(&r.dtype())?;
            Value::Scalar(arithmetic(*op, l, r, &dtype)?)
        }
        Expr::List(_) => {
            let mut shape = Vec::new();
            let mut values = Vec::new();
            flatten(expr, 0, &mut shape, &mut values)?;
            Value::Array(Array::from_values(shape, values)?)
        }
        Expr::Tuple(items) => Value::Tuple(items.iter().map(value_of).collect::<CompileResult<_>>()?),
        _ => return Err(error("arguments must be literals")),
    };
    Ok(value)
}

fn flatten(expr: &Expr, depth: usize, shape: &mut Vec<usize>, values: &mut Vec<Scalar>) -> CompileResult<()> {
    match expr {
        Expr::List(items) => {
            match shape.get(depth) {
                Some(&n) if n != items.len() => return Err(error("nested lists must be rectangular")),
                Some(_) => {}
                None => shape.push(items.len()),
            }
            for item in items {
                flatten(item, depth + 1, shape, values)?;
            }
            Ok(())
        }
        other if depth == shape.len() => {
            values.push(value_of(other)?.scalar()?);
            Ok(())
        }
        _ => Err(error("nested lists must be rectangular")),
    }
}

fn negate(s: Scalar) -> Scalar {
    match s {
        Scalar::Bool(b) => Scalar::Int(-i64::from(b)),
        Scalar::Int(n) => Scalar::Int(n.wrapping_neg()),
        Scalar::Float(x) => Scalar::Float(-x),
        Scalar::Complex(re, im) => Scalar::Complex(-re, -im),
    }
}

fn integer_op(op: Operator, a: i64, b: i64) -> CompileResult<i64> {
    let zero_check = || if b == 0 { Err(error("integer division or modulo by zero")) } else { Ok(()) };
    let value = match op {
        Operator::Add => a.wrapping_add(b),
        Operator::Sub => a.wrapping_sub(b),
        Operator::Mul => a.wrapping_mul(b),
        Operator::FloorDiv => {
            zero_check()?;
            let q = a.wrapping_div(b);
            if a % b != 0 && ((a < 0) != (b < 0)) {
                q - 1
            } else {
                q
            }
        }
        Operator::Mod => {
            zero_check()?;
            ((a % b) + b) % b
        }
        Operator::Pow => {
            let exponent = u32::try_from(b).map_err(|_| error("negative integer power"))?;
            a.wrapping_pow(exponent)
        }
        other => return Err(error(format!("operator {} on integers", other))),
    };
    Ok(value)
}

fn float_op(op: Operator, a: f64, b: f64) -> CompileResult<f64> {
    let value = match op {
        Operator::Add => a + b,
        Operator::Sub => a - b,
        Operator::Mul => a * b,
        Operator::Div | Operator::FloorDiv | Operator::Mod if b == 0.0 => return Err(error("float division by zero")),
        Operator::Div => a / b,
        Operator::FloorDiv => (a / b).floor(),
        Operator::Mod => a - b * (a / b).floor(),
        Operator::Pow => a.powf(b),
        other => return Err(error(format!("operator {} on reals", other))),
    };
    Ok(value)
}

fn complex_op(op: Operator, (a, b): (f64, f64), (c, d): (f64, f64)) -> CompileResult<(f64, f64)> {
    let value = match op {
        Operator::Add => (a + c, b + d),
        Operator::Sub => (a - c, b - d),
        Operator::Mul => (a * c - b * d, a * d + b * c),
        Operator::Div => {
            let norm = c * c + d * d;
            if norm == 0.0 {
                return Err(error("complex division by zero"));
            }
            ((a * c + b * d) / norm, (b * c - a * d) / norm)
        }
        Operator::Pow => {
            if a == 0.0 && b == 0.0 {
                return Ok(if c == 0.0 && d == 0.0 { (1.0, 0.0) } else { (0.0, 0.0) });
            }
            let (modulus, argument) = (a.hypot(b), b.atan2(a));
            let log = (modulus.ln(), argument);
            let (re, im) = (log.0 * c - log.1 * d, log.0 * d + log.1 * c);
            (re.exp() * im.cos(), re.exp() * im.sin())
        }
        other => return Err(error(format!("operator {} on complex numbers", other))),
    };
    Ok(value)
}

/// Arithmetic computed in `dtype`
fn arithmetic(op: Operator, l: Scalar, r: Scalar, dtype: &DataType) -> CompileResult<Scalar> {
    match dtype {
        DataType::Bool | DataType::Integer => Ok(Scalar::Int(integer_op(op, l.as_int()?, r.as_int()?)?)),
        DataType::Real => Ok(Scalar::Float(float_op(op, l.as_float()?, r.as_float()?)?)),
        DataType::Complex => {
            let (re, im) = complex_op(op, l.as_complex(), r.as_complex())?;
            Ok(Scalar::Complex(re, im))
        }
        other => Err(error(format!("arithmetic on values of type {}", other))),
    }
}

fn compare(op: Operator, l: Scalar, r: Scalar) -> CompileResult<bool> {
    let dtype = l.dtype().promote(&r.dtype())?;
    let ordering = match dtype {
        DataType::Complex => {
            let equal = l.as_complex() == r.as_complex();
            return match op {
                Operator::Eq => Ok(equal),
                Operator::Ne => Ok(!equal),
                _ => Err(error("complex numbers have no ordering")),
            };
        }
        DataType::Real => l.as_float()?.partial_cmp(&r.as_float()?),
        _ => Some(l.as_int()?.cmp(&r.as_int()?)),
    };
    let Some(ordering) = ordering else {
        return Ok(op == Operator::Ne);
    };
    Ok(match op {
        Operator::Eq => ordering.is_eq(),
        Operator::Ne => ordering.is_ne(),
        Operator::Lt => ordering.is_lt(),
        Operator::Le => ordering.is_le(),
        Operator::Gt => ordering.is_gt(),
        _ => ordering.is_ge(),
    })
}

fn math(func: MathFunction, s: Scalar, dtype: &DataType) -> CompileResult<Scalar> {
    if func == MathFunction::Abs {
        return match s {
            Scalar::Bool(b) => Ok(Scalar::Int(i64::from(b))),
            Scalar::Int(n) => Ok(Scalar::Int(n.wrapping_abs())),
            Scalar::Float(x) => Ok(Scalar::Float(x.abs())),
            Scalar::Complex(re, im) => Ok(Scalar::Float(re.hypot(im))),
        };
    }
    let x = s.as_float()?;
    let value = match func {
        MathFunction::Sqrt => x.sqrt(),
        MathFunction::Exp => x.exp(),
        MathFunction::Log => x.ln(),
        MathFunction::Sin => x.sin(),
        MathFunction::Cos => x.cos(),
        MathFunction::Tan => x.tan(),
        MathFunction::Arcsin => x.asin(),
        MathFunction::Arccos => x.acos(),
        MathFunction::Arctan => x.atan(),
        MathFunction::Sinh => x.sinh(),
        MathFunction::Cosh => x.cosh(),
        MathFunction::Tanh => x.tanh(),
        MathFunction::Floor | MathFunction::Abs => x.floor(),
    };
    Scalar::Float(value).cast(dtype)
}

enum Flow {
    Next,
    Break,
    Continue,
    /// Names of the variables holding the results
    Return(Vec<String>),
}

/// Variables of one running call
struct Frame {
    vars: HashMap<String, Value>,
    lowering: Lowering,
}

impl Frame {
    fn get(&self, name: &str) -> CompileResult<&Value> {
        self.vars.get(name).ok_or_else(|| error(format!("'{}' is used before it is assigned", name)))
    }
}

/// Runs the functions of one module
pub struct Interpreter<'m> {
    module: &'m Module,
    printed: Vec<String>,
    depth: usize,
}

impl<'m> Interpreter<'m> {
    pub fn new(module: &'m Module) -> Self {
        Self { module, printed: Vec::new(), depth: 0 }
    }

    /// Lines written by `print` so far
    pub fn printed(&self) -> &[String] {
        &self.printed
    }

    /// Call a function or an interface; several results come back as a tuple
    #[instrument(skip(self, args))]
    pub fn call(&mut self, name: &str, args: Vec<Value>) -> CompileResult<Value> {
        let function = self.resolve(name, &args)?;
        let results = self.invoke(function, args)?;
        Ok(pack(results))
    }

    fn resolve(&self, name: &str, args: &[Value]) -> CompileResult<&'m FunctionDef> {
        if let Some(interface) = self.module.interface(name) {
            return interface
                .functions
                .iter()
                .find(|f| f.signature.args.iter().zip(args).all(|(param, value)| accepts(param, value)))
                .ok_or_else(|| error(format!("no overload of '{}' accepts these arguments", name)));
        }
        self.module.function(name).ok_or_else(|| CompileError::undefined(name))
    }

    fn invoke(&mut self, function: &FunctionDef, args: Vec<Value>) -> CompileResult<Vec<Value>> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(error(format!("call depth exceeded in '{}'", function.name())));
        }
        let params = &function.signature.args;
        if args.len() > params.len() {
            return Err(CompileError::type_error(format!(
                "'{}' takes {} arguments but {} were given",
                function.name(),
                params.len(),
                args.len()
            )));
        }
        let names = NameRegistry::for_function(self.module, function);
        let mut frame = Frame { vars: HashMap::new(), lowering: Lowering::new(Language::C, names) };
        let mut args = args.into_iter();
        for param in params {
            let value = match (args.next(), &param.default) {
                (Some(value), _) => value,
                (None, Some(TypedExpr::Nil)) => Value::None,
                (None, Some(default)) => self.eval(default, &mut frame)?,
                (None, None) => {
                    return Err(CompileError::type_error(format!(
                        "missing argument '{}' of '{}'",
                        param.var.name,
                        function.name()
                    )))
                }
            };
            let value = match value {
                Value::Scalar(s) if param.var.rank == 0 => Value::Scalar(s.cast(&param.var.dtype)?),
                other => other,
            };
            frame.vars.insert(param.var.name.clone(), value);
        }

        trace!(function = function.name(), depth = self.depth, "entering");
        self.depth += 1;
        let flow = self.block(&function.body, &mut frame);
        self.depth -= 1;
        let returned = match flow? {
            Flow::Return(names) if !names.is_empty() => names,
            _ => function.results().iter().map(|r| r.name.clone()).collect(),
        };
        returned.iter().map(|name| frame.get(name).cloned()).collect()
    }

    fn block(&mut self, body: &[TypedStmt], frame: &mut Frame) -> CompileResult<Flow> {
        for stmt in body {
            match self.stmt(stmt, frame)? {
                Flow::Next => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Next)
    }

    fn stmt(&mut self, stmt: &TypedStmt, frame: &mut Frame) -> CompileResult<Flow> {
        match &stmt.kind {
            StmtKind::Assign { lhs, rhs } => self.assign(lhs, rhs, stmt.location, frame)?,
            StmtKind::AugAssign { lhs, op, rhs } => {
                let value = self.binary(&BinaryOp::new(*op, lhs.clone(), rhs.clone())?, frame)?;
                self.store(lhs, value, frame)?;
            }
            StmtKind::AliasAssign { lhs, rhs } => {
                let view = self.eval(rhs, frame)?;
                view.array()?;
                frame.vars.insert(lhs.name.clone(), view);
            }
            StmtKind::For(l) => {
                let start = self.eval(&l.start, frame)?.scalar()?.as_int()?;
                let stop = self.eval(&l.stop, frame)?.scalar()?.as_int()?;
                let step = self.eval(&l.step, frame)?.scalar()?.as_int()?;
                if step == 0 {
                    return Err(error("range() step cannot be zero"));
                }
                let mut i = start;
                while (step > 0 && i < stop) || (step < 0 && i > stop) {
                    frame.vars.insert(l.index.name.clone(), Value::int(i));
                    match self.block(&l.body, frame)? {
                        Flow::Break => break,
                        Flow::Return(names) => return Ok(Flow::Return(names)),
                        Flow::Next | Flow::Continue => {}
                    }
                    i += step;
                }
            }
            StmtKind::While { cond, body } => {
                while self.eval(cond, frame)?.scalar()?.truthy() {
                    match self.block(body, frame)? {
                        Flow::Break => break,
                        Flow::Return(names) => return Ok(Flow::Return(names)),
                        Flow::Next | Flow::Continue => {}
                    }
                }
            }
            StmtKind::If { branches, orelse } => {
                for (cond, body) in branches {
                    if self.eval(cond, frame)?.scalar()?.truthy() {
                        return self.block(body, frame);
                    }
                }
                return self.block(orelse, frame);
            }
            StmtKind::Return(results) => return Ok(Flow::Return(results.iter().map(|r| r.name.clone()).collect())),
            StmtKind::Allocate { var, .. } => {
                let shape = var
                    .shape
                    .iter()
                    .map(|d| self.dim(d, frame).and_then(|n| usize::try_from(n).map_err(|_| error("negative dimension"))))
                    .collect::<CompileResult<Vec<_>>>()?;
                debug!(var = %var.name, ?shape, "allocating");
                let array = Array::zeros(shape, var.dtype.clone(), var.order)?;
                frame.vars.insert(var.name.clone(), Value::Array(array));
            }
            StmtKind::Expr(e) => {
                self.eval(e, frame)?;
            }
            StmtKind::Print(args) => {
                let parts = args
                    .iter()
                    .map(|a| self.eval(a, frame).map(|v| v.to_string()))
                    .collect::<CompileResult<Vec<_>>>()?;
                self.printed.push(parts.join(" "));
            }
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Deallocate(_) | StmtKind::Pass | StmtKind::Pragma(_) => {}
        }
        Ok(Flow::Next)
    }

    fn assign(&mut self, lhs: &TypedExpr, rhs: &TypedExpr, location: Option<Location>, frame: &mut Frame) -> CompileResult<()> {
        match rhs {
            TypedExpr::Numpy(f) if !f.is_elemental() => {
                if let TypedExpr::Var(v) = lhs {
                    if v.rank > 0 && !frame.vars.contains_key(&v.name) {
                        let allocate = TypedStmt::new(StmtKind::Allocate { var: v.clone(), reallocate: false }, location);
                        self.stmt(&allocate, frame)?;
                    }
                }
                let lowered = frame.lowering.lower(lhs, f, location)?;
                self.block(&lowered, frame)?;
                Ok(())
            }
            _ => {
                let value = self.eval(rhs, frame)?;
                self.store(lhs, value, frame)
            }
        }
    }

    fn store(&mut self, lhs: &TypedExpr, value: Value, frame: &mut Frame) -> CompileResult<()> {
        match lhs {
            TypedExpr::Var(v) => {
                let value = match value {
                    Value::Scalar(s) if v.rank == 0 => Value::Scalar(s.cast(&v.dtype)?),
                    other => other,
                };
                frame.vars.insert(v.name.clone(), value);
            }
            TypedExpr::Indexed(i) => {
                let index = self.element_index(i, frame)?;
                frame.get(&i.base.name)?.array()?.set(&index, value.scalar()?)?;
            }
            TypedExpr::Tuple(targets) => {
                let Value::Tuple(values) = value else {
                    return Err(error(format!("cannot unpack {} into {} targets", value, targets.len())));
                };
                if values.len() != targets.len() {
                    return Err(error(format!("cannot unpack {} values into {} targets", values.len(), targets.len())));
                }
                for (target, value) in targets.iter().zip(values) {
                    self.store(target, value, frame)?;
                }
            }
            other => return Err(error(format!("cannot assign to {}", other))),
        }
        Ok(())
    }

    fn int(&mut self, e: &TypedExpr, frame: &mut Frame) -> CompileResult<i64> {
        self.eval(e, frame)?.scalar()?.as_int()
    }

    fn element_index(&mut self, i: &IndexedElement, frame: &mut Frame) -> CompileResult<Vec<i64>> {
        i.full_indices()
            .iter()
            .map(|index| match index {
                Index::Elem(e) => self.int(e, frame),
                Index::Slice(_) => Err(error(format!("array section of '{}' used as a number", i.base.name))),
            })
            .collect()
    }

    fn indexed(&mut self, i: &IndexedElement, frame: &mut Frame) -> CompileResult<Value> {
        let is_section = i.indices.iter().any(|index| matches!(index, Index::Slice(_)));
        if !is_section {
            let index = self.element_index(i, frame)?;
            return Ok(Value::Scalar(frame.get(&i.base.name)?.array()?.get(&index)?));
        }
        let mut selections = Vec::with_capacity(i.base.rank);
        for index in i.full_indices() {
            let selection = match index {
                Index::Elem(e) => Selection::At(self.int(&e, frame)?),
                Index::Slice(s) => {
                    let mut bound = |e: Option<&TypedExpr>| e.map(|e| self.int(e, frame)).transpose();
                    let start = bound(s.start.as_deref())?;
                    let stop = bound(s.stop.as_deref())?;
                    let step = bound(s.step.as_deref())?.unwrap_or(1);
                    Selection::Range { start, stop, step }
                }
            };
            selections.push(selection);
        }
        Ok(Value::Array(frame.get(&i.base.name)?.array()?.section(&selections)?))
    }

    fn dim(&self, d: &Dim, frame: &Frame) -> CompileResult<i64> {
        let value = match d {
            Dim::Lit(n) => *n,
            Dim::Var(name) => match frame.vars.get(name) {
                Some(value) => value.scalar()?.as_int()?,
                None => self.constant(name)?.scalar()?.as_int()?,
            },
            Dim::SizeOf { var, axis } => {
                let array = frame.get(var)?.array()?;
                let length = array.shape().get(*axis).ok_or_else(|| error(format!("'{}' has no axis {}", var, axis)))?;
                *length as i64
            }
            Dim::Add(a, b) => self.dim(a, frame)? + self.dim(b, frame)?,
            Dim::Sub(a, b) => self.dim(a, frame)? - self.dim(b, frame)?,
            Dim::Mul(a, b) => self.dim(a, frame)? * self.dim(b, frame)?,
            Dim::FloorDiv(a, b) => integer_op(Operator::FloorDiv, self.dim(a, frame)?, self.dim(b, frame)?)?,
        };
        Ok(value)
    }

    fn constant(&self, name: &str) -> CompileResult<Value> {
        let constant = self
            .module
            .constants
            .iter()
            .find(|c| c.var.name == name)
            .ok_or_else(|| CompileError::undefined(name))?;
        match &constant.value {
            TypedExpr::Literal(l) => Ok(literal(&l.value)),
            other => Err(error(format!("constant '{}' is not a literal: {}", name, other))),
        }
    }

    fn eval(&mut self, e: &TypedExpr, frame: &mut Frame) -> CompileResult<Value> {
        let value = match e {
            TypedExpr::Literal(l) => literal(&l.value),
            TypedExpr::Var(v) => match frame.vars.get(&v.name) {
                Some(value) => value.clone(),
                None => self.constant(&v.name).map_err(|_| error(format!("'{}' is used before it is assigned", v.name)))?,
            },
            TypedExpr::Indexed(i) => self.indexed(i, frame)?,
            TypedExpr::Binary(b) => self.binary(b, frame)?,
            TypedExpr::Unary(u) => {
                let s = self.eval(&u.operand, frame)?.scalar()?;
                Value::Scalar(match u.op {
                    UnaryOperator::Neg => negate(s),
                    UnaryOperator::Pos => s,
                    UnaryOperator::Not => Scalar::Bool(!s.truthy()),
                })
            }
            TypedExpr::Numpy(NumpyFunction::Math(m)) => {
                let s = self.eval(&m.arg, frame)?.scalar()?;
                Value::Scalar(math(m.func, s, &m.result_dtype())?)
            }
            TypedExpr::Numpy(NumpyFunction::Copy(arg)) if arg.rank() == 0 => self.eval(arg, frame)?,
            TypedExpr::Numpy(f) => return Err(error(format!("{}() inside an expression", f.name()))),
            TypedExpr::Cast(c) => Value::Scalar(self.eval(&c.arg, frame)?.scalar()?.cast(&c.dtype)?),
            TypedExpr::Call(c) => {
                let function = self
                    .module
                    .function(&c.callee.name)
                    .ok_or_else(|| CompileError::undefined(c.callee.name.as_str()))?;
                let args = c.args.iter().map(|a| self.eval(a, frame)).collect::<CompileResult<Vec<_>>>()?;
                pack(self.invoke(function, args)?)
            }
            TypedExpr::Size(d) => Value::int(self.dim(d, frame)?),
            TypedExpr::IfTernary(t) => {
                if self.eval(&t.cond, frame)?.scalar()?.truthy() {
                    self.eval(&t.then, frame)?
                } else {
                    self.eval(&t.orelse, frame)?
                }
            }
            TypedExpr::Tuple(items) => {
                Value::Tuple(items.iter().map(|item| self.eval(item, frame)).collect::<CompileResult<_>>()?)
            }
            TypedExpr::Nil => Value::None,
        };
        Ok(value)
    }

    fn binary(&mut self, b: &BinaryOp, frame: &mut Frame) -> CompileResult<Value> {
        if matches!(b.op, Operator::Is | Operator::IsNot) {
            let (l, r) = (self.eval(&b.left, frame)?, self.eval(&b.right, frame)?);
            let same = match (&l, &r) {
                (Value::None, Value::None) => true,
                (Value::None, _) | (_, Value::None) => false,
                (l, r) => l == r,
            };
            return Ok(Value::Scalar(Scalar::Bool(same == (b.op == Operator::Is))));
        }
        // Python evaluates the right operand of `and`/`or` only when needed
        if matches!(b.op, Operator::And | Operator::Or) {
            let l = self.eval(&b.left, frame)?.scalar()?.truthy();
            let value = match (b.op, l) {
                (Operator::And, false) => false,
                (Operator::Or, true) => true,
                _ => self.eval(&b.right, frame)?.scalar()?.truthy(),
            };
            return Ok(Value::Scalar(Scalar::Bool(value)));
        }
        let l = self.eval(&b.left, frame)?.scalar()?;
        let r = self.eval(&b.right, frame)?.scalar()?;
        if b.op.is_comparison() {
            return Ok(Value::Scalar(Scalar::Bool(compare(b.op, l, r)?)));
        }
        let dtype = b.result_dtype();
        Ok(Value::Scalar(arithmetic(b.op, l, r, &dtype)?.cast(&dtype)?))
    }
}

fn literal(value: &LiteralValue) -> Value {
    match value {
        LiteralValue::Int(n) => Value::int(*n),
        LiteralValue::Float(x) => Value::float(*x),
        LiteralValue::Complex { re, im } => Value::Scalar(Scalar::Complex(*re, *im)),
        LiteralValue::Bool(b) => Value::Scalar(Scalar::Bool(*b)),
        LiteralValue::Str(s) => Value::Str(s.clone()),
    }
}

fn accepts(param: &FunctionArg, value: &Value) -> bool {
    match value {
        Value::None => param.is_optional(),
        Value::Scalar(s) => param.var.rank == 0 && s.dtype() == param.var.dtype,
        Value::Array(a) => param.var.rank == a.shape().len() && *a.dtype() == param.var.dtype,
        Value::Str(_) => param.var.dtype == DataType::String,
        Value::Tuple(_) => false,
    }
}

fn pack(mut results: Vec<Value>) -> Value {
    match results.len() {
        0 => Value::None,
        1 => results.remove(0),
        _ => Value::Tuple(results),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerConfig;
    use crate::diagnostics::Diagnostics;
    use crate::expansion::expand_module;
    use crate::semantic::annotate_source;
    use pretty_assertions::assert_eq;

    fn module(source: &str) -> Module {
        let config = CompilerConfig::new(Language::C);
        let mut diagnostics = Diagnostics::new();
        let mut module = annotate_source(source, &config, &mut diagnostics).unwrap();
        expand_module(&mut module, Language::C, &mut diagnostics).unwrap();
        module
    }

    fn run(source: &str, call: &str) -> Value {
        let module = module(source);
        let (name, args) = parse_call(call).unwrap();
        Interpreter::new(&module).call(&name, args).unwrap()
    }

    #[test]
    fn test_increment() {
        assert_eq!(run("def f(x: int) -> int:\n    return x + 1\n", "f(5)"), Value::int(6));
    }

    #[test]
    fn test_python_division_semantics() {
        let source = "def d(x: int, y: int):\n    return x // y, x % y, x / y\n";
        let value = run(source, "d(-7, 2)");
        assert_eq!(value, Value::Tuple(vec![Value::int(-4), Value::int(1), Value::float(-3.5)]));
    }

    #[test]
    fn test_array_loops_and_reductions() {
        let source = "from numpy import zeros, sum\n\
                      def f(n: int) -> float:\n    a = zeros((n, 3))\n    b = a + 2.0\n    return sum(b)\n";
        assert_eq!(run(source, "f(4)"), Value::float(24.0));
    }

    #[test]
    fn test_array_arguments_and_sections() {
        let source = "def total(a: 'float[:]') -> float:\n    s = 0.0\n    b = a[1:]\n    for i in range(len(b)):\n        s += b[i]\n    return s\n";
        assert_eq!(run(source, "total([1.0, 2.0, 3.0])"), Value::float(5.0));
    }

    #[test]
    fn test_matmul_is_lowered() {
        let source = "from numpy import matmul, sum\n\
                      def f(a: 'float[:,:]', b: 'float[:,:]') -> float:\n    c = matmul(a, b)\n    return c[0, 1]\n";
        assert_eq!(run(source, "f([[1.0, 2.0], [3.0, 4.0]], [[5.0, 6.0], [7.0, 8.0]])"), Value::float(22.0));
    }

    #[test]
    fn test_optional_argument() {
        let source = "def f(x: int, z: 'int' = None) -> int:\n    y = x\n    if z is not None:\n        y = x + z\n    return y\n";
        assert_eq!(run(source, "f(1)"), Value::int(1));
        assert_eq!(run(source, "f(1, 2)"), Value::int(3));
    }

    #[test]
    fn test_interface_picks_overload() {
        let source = "@types('int')\n@types('float')\ndef g(x):\n    return x * 2\n";
        assert_eq!(run(source, "g(2)"), Value::int(4));
        assert_eq!(run(source, "g(1.5)"), Value::float(3.0));
    }

    #[test]
    fn test_while_and_print() {
        let module = module("def f(n: int) -> int:\n    k = 0\n    while k < n:\n        print(k)\n        k += 1\n    return k\n");
        let mut interpreter = Interpreter::new(&module);
        assert_eq!(interpreter.call("f", vec![Value::int(3)]).unwrap(), Value::int(3));
        assert_eq!(interpreter.printed(), ["0", "1", "2"]);
    }

    #[test]
    fn test_overlapping_update_reads_old_values() {
        let source = "from numpy import ones\ndef f() -> float:\n    a = ones(5)\n    a[1:] = a[:-1] + a[1:]\n    return a[4]\n";
        assert_eq!(run(source, "f()"), Value::float(2.0));
    }

    #[test]
    fn test_elemental_function_over_array() {
        let source = "@elemental\ndef sq(x: float) -> float:\n    return x * x\n\n\
                      def f(a: 'float[:]') -> float:\n    b = sq(a)\n    return b[2]\n";
        assert_eq!(run(source, "f([1.0, 2.0, 3.0])"), Value::float(9.0));
    }

    #[test]
    fn test_tuple_indexing_and_unpacking() {
        let source = "def f(k: int) -> int:\n    t = (1, 2, 3)\n    x, y, z = t\n    return t[k] + x * 100 + z * 10\n";
        assert_eq!(run(source, "f(1)"), Value::int(132));
    }

    #[test]
    fn test_out_of_bounds_is_reported() {
        let module = module("def f(a: 'int[:]') -> int:\n    return a[5]\n");
        let (_, args) = parse_call("f([1, 2])").unwrap();
        let err = Interpreter::new(&module).call("f", args).unwrap_err();
        assert!(matches!(err, CompileError::Evaluation { .. }));
    }

    #[test]
    fn test_array_display() {
        let array = Array::from_values(vec![2, 2], (1..=4).map(Scalar::Int).collect()).unwrap();
        assert_eq!(array.to_string(), "[[1, 2], [3, 4]]");
        assert_eq!(Value::Scalar(Scalar::Complex(1.0, -2.0)).to_string(), "(1.0-2.0j)");
    }
}
