//! Imports, library functions and call resolution

use tracing::debug;

use super::expressions::{is_integer_scalar, shape_tuple};
use super::interface::select_overload;
use super::{Annotator, Symbol};
use crate::ast::syntax::{Expr, Statement, StatementKind};
use crate::ast::{
    ArrayCreation, ArrayLiteral, BinaryOp, Builtin, Cast, Dim, FillKind, FunctionCall, FunctionSignature, Linspace,
    Literal, MathCall, MathFunction, Matmul, NumpyFunction, Operator, Reduction, ReductionKind,
    TypedExpr, Variable,
};
use crate::diagnostics::Location;
use crate::error::{CompileError, CompileResult};
use crate::types::{self, resolve_precision, DataType, Order, Precision};

const NUMPY: &[&str] = &[
    "array", "zeros", "ones", "empty", "full", "zeros_like", "ones_like", "empty_like", "full_like", "sum", "prod",
    "matmul", "cross", "diag", "linspace", "shape", "sqrt", "exp", "log", "sin", "cos", "tan", "arcsin", "arccos",
    "arctan", "sinh", "cosh", "tanh", "floor", "abs", "absolute", "pi", "int8", "int16", "int32", "int64",
    "float32", "float64", "complex64", "complex128",
];

const NUMPY_LINALG: &[&str] = &["norm"];

const MATH: &[&str] = &[
    "sqrt", "exp", "log", "sin", "cos", "tan", "asin", "acos", "atan", "sinh", "cosh", "tanh", "floor", "fabs", "pi",
];

fn library_names(module: &str) -> Option<&'static [&'static str]> {
    match module {
        "numpy" => Some(NUMPY),
        "numpy.linalg" => Some(NUMPY_LINALG),
        "math" => Some(MATH),
        _ => None,
    }
}

/// What `module.name` refers to
pub(crate) fn library_member(module: &str, name: &str) -> Option<Symbol> {
    if module == "numpy" && name == "linalg" {
        return Some(Symbol::Module("numpy.linalg".to_string()));
    }
    library_names(module)?
        .contains(&name)
        .then(|| Symbol::Library(name.to_string()))
}

/// Modules whose only purpose is to provide decorators
fn is_decorator_module(module: &str) -> bool {
    module.rsplit('.').next() == Some("decorators")
}

/// Parameter names of a library function
fn library_params(name: &str) -> &'static [&'static str] {
    match name {
        "zeros" | "ones" | "empty" => &["shape", "dtype", "order"],
        "full" => &["shape", "fill_value", "dtype", "order"],
        "zeros_like" | "ones_like" | "empty_like" => &["a", "dtype", "order"],
        "full_like" => &["a", "fill_value", "dtype", "order"],
        "array" => &["object", "dtype", "order"],
        "linspace" => &["start", "stop", "num"],
        "sum" | "prod" => &["a", "axis"],
        "norm" => &["x", "ord", "axis"],
        "matmul" | "cross" => &["a", "b"],
        "diag" => &["v"],
        "shape" => &["a"],
        "complex" => &["real", "imag"],
        _ => &["x"],
    }
}

/// Arguments of a library call, matched by position or keyword against the
/// parameter names of the function
struct ArgList<'a> {
    func: &'a str,
    params: &'static [&'static str],
    positional: &'a [Expr],
    keywords: &'a [(String, Expr)],
}

impl<'a> ArgList<'a> {
    fn new(func: &'a str, positional: &'a [Expr], keywords: &'a [(String, Expr)]) -> CompileResult<Self> {
        let params = library_params(func);
        if positional.len() > params.len() {
            return Err(CompileError::specification(format!(
                "{}() takes at most {} arguments, {} given",
                func,
                params.len(),
                positional.len()
            )));
        }
        for (k, (name, _)) in keywords.iter().enumerate() {
            let Some(pos) = params.iter().position(|p| p == name) else {
                return Err(CompileError::specification(format!(
                    "{}() got an unexpected keyword argument '{}'",
                    func, name
                )));
            };
            if pos < positional.len() || keywords[..k].iter().any(|(other, _)| other == name) {
                return Err(CompileError::specification(format!(
                    "{}() got multiple values for argument '{}'",
                    func, name
                )));
            }
        }
        Ok(Self { func, params, positional, keywords })
    }

    fn get(&self, name: &str) -> Option<&'a Expr> {
        let pos = self.params.iter().position(|p| *p == name)?;
        self.positional
            .get(pos)
            .or_else(|| self.keywords.iter().find(|(k, _)| k == name).map(|(_, v)| v))
            .filter(|e| !matches!(e, Expr::None))
    }

    fn require(&self, name: &str) -> CompileResult<&'a Expr> {
        self.get(name).ok_or_else(|| {
            CompileError::specification(format!("{}() missing required argument '{}'", self.func, name))
        })
    }
}

impl Annotator<'_> {
    /// `import numpy as np`, `from numpy import zeros`, ...
    pub(crate) fn import(&mut self, stmt: &Statement) -> CompileResult<()> {
        match &stmt.kind {
            StatementKind::Import { module, alias } => {
                if is_decorator_module(module) {
                    return Ok(());
                }
                if library_names(module).is_none() {
                    return Err(CompileError::restriction(format!("import of module '{}'", module), self.language));
                }
                match alias {
                    Some(alias) => self.scopes.insert(alias.clone(), Symbol::Module(module.clone())),
                    None => {
                        let root = module.split('.').next().unwrap_or(module);
                        self.scopes.insert(root, Symbol::Module(root.to_string()));
                    }
                }
            }
            StatementKind::FromImport { module, names } => {
                if is_decorator_module(module) {
                    return Ok(());
                }
                let Some(available) = library_names(module) else {
                    return Err(CompileError::restriction(format!("import of module '{}'", module), self.language));
                };
                for (name, alias) in names {
                    if name == "*" {
                        for member in available {
                            self.scopes.insert(*member, Symbol::Library(member.to_string()));
                        }
                        continue;
                    }
                    let symbol = library_member(module, name)
                        .ok_or_else(|| CompileError::undefined(format!("{}.{}", module, name)))?;
                    self.scopes.insert(alias.clone().unwrap_or_else(|| name.clone()), symbol);
                }
            }
            _ => {}
        }
        Ok(())
    }

    pub(crate) fn annotate_call(
        &mut self,
        func: &Expr,
        args: &[Expr],
        kwargs: &[(String, Expr)],
        location: Option<Location>,
    ) -> CompileResult<TypedExpr> {
        let name = match func {
            Expr::Name(name) => name,
            Expr::Attribute { value, attr } => {
                if let Some(library) = self.resolve_dotted(func) {
                    return self.call_library(&library, args, kwargs, location);
                }
                if let Some(Symbol::Module(module)) = value.dotted_name().and_then(|n| self.scopes.lookup(&n)) {
                    return Err(CompileError::undefined(format!("{}.{}", module, attr)));
                }
                return Err(CompileError::restriction(format!("method call '.{}()'", attr), self.language));
            }
            _ => return Err(CompileError::restriction("calls of computed functions", self.language)),
        };
        self.scopes.record_usage(name, location);

        if self.scopes.lookup(name).is_none() && self.is_pending(name) {
            debug!(callee = %name, "annotating callee on demand");
            self.annotate_pending(name)?;
        }
        match self.scopes.lookup(name).cloned() {
            Some(Symbol::Function(signature)) => self.call_function(signature, args, kwargs, location),
            Some(Symbol::Interface(overloads)) => self.call_interface(name, &overloads, args, kwargs, location),
            Some(Symbol::Library(library)) => self.call_library(&library, args, kwargs, location),
            Some(_) => Err(CompileError::type_error(format!("'{}' is not callable", name))),
            None if self.is_in_progress(name) => Err(CompileError::specification(format!(
                "recursive function '{}' must declare its results",
                name
            ))),
            None => match Builtin::from_name(name) {
                Some(builtin) => self.call_builtin(name, builtin, args, kwargs, location),
                None => Err(CompileError::undefined(name.clone())),
            },
        }
    }

    fn annotate_args(&mut self, args: &[Expr], location: Option<Location>) -> CompileResult<Vec<TypedExpr>> {
        args.iter().map(|a| self.annotate_expr(a, location)).collect()
    }

    fn annotate_kwargs(
        &mut self,
        kwargs: &[(String, Expr)],
        location: Option<Location>,
    ) -> CompileResult<Vec<(String, TypedExpr)>> {
        kwargs
            .iter()
            .map(|(k, v)| Ok((k.clone(), self.annotate_expr(v, location)?)))
            .collect()
    }

    fn call_function(
        &mut self,
        callee: FunctionSignature,
        args: &[Expr],
        kwargs: &[(String, Expr)],
        location: Option<Location>,
    ) -> CompileResult<TypedExpr> {
        let positional = self.annotate_args(args, location)?;
        let keywords = self.annotate_kwargs(kwargs, location)?;
        let args = self.bind_arguments(&callee, positional, keywords)?;
        Ok(TypedExpr::Call(FunctionCall { callee, args }))
    }

    fn call_interface(
        &mut self,
        name: &str,
        overloads: &[FunctionSignature],
        args: &[Expr],
        kwargs: &[(String, Expr)],
        location: Option<Location>,
    ) -> CompileResult<TypedExpr> {
        let positional = self.annotate_args(args, location)?;
        let keywords = self.annotate_kwargs(kwargs, location)?;
        let callee = select_overload(name, overloads, &positional)?.clone();
        debug!(interface = name, overload = %callee.name, "selected overload");
        let args = self.bind_arguments(&callee, positional, keywords)?;
        Ok(TypedExpr::Call(FunctionCall { callee, args }))
    }

    /// Match call arguments to parameters: positions first, then keywords,
    /// then defaults
    pub(crate) fn bind_arguments(
        &self,
        callee: &FunctionSignature,
        positional: Vec<TypedExpr>,
        keywords: Vec<(String, TypedExpr)>,
    ) -> CompileResult<Vec<TypedExpr>> {
        let name = &callee.name;
        if positional.len() > callee.args.len() {
            return Err(CompileError::specification(format!(
                "{}() takes {} arguments but {} were given",
                name,
                callee.args.len(),
                positional.len()
            )));
        }
        let mut slots: Vec<Option<TypedExpr>> = positional.into_iter().map(Some).collect();
        slots.resize(callee.args.len(), None);
        for (keyword, value) in keywords {
            let Some(pos) = callee.args.iter().position(|a| a.var.name == keyword) else {
                return Err(CompileError::specification(format!(
                    "{}() got an unexpected keyword argument '{}'",
                    name, keyword
                )));
            };
            if slots[pos].is_some() {
                return Err(CompileError::specification(format!(
                    "{}() got multiple values for argument '{}'",
                    name, keyword
                )));
            }
            slots[pos] = Some(value);
        }

        callee
            .args
            .iter()
            .zip(slots)
            .map(|(param, slot)| match (slot, &param.default) {
                (Some(arg), _) => self.check_argument(callee, &param.var, arg),
                (None, Some(default)) => Ok(default.clone()),
                (None, None) => Err(CompileError::specification(format!(
                    "{}() missing required argument '{}'",
                    name, param.var.name
                ))),
            })
            .collect()
    }

    /// Check one argument against its parameter, converting scalars that
    /// widen implicitly
    fn check_argument(&self, callee: &FunctionSignature, param: &Variable, arg: TypedExpr) -> CompileResult<TypedExpr> {
        let describe = || format!("argument '{}' of '{}'", param.name, callee.name);
        match &arg {
            TypedExpr::Nil if param.is_optional => return Ok(arg),
            TypedExpr::Nil => return Err(CompileError::type_error(format!("{} cannot be None", describe()))),
            TypedExpr::Tuple(_) => return Err(CompileError::type_error(format!("{} cannot be a tuple", describe()))),
            _ => {}
        }

        let rank_ok = if callee.flags.is_elemental { arg.rank() >= param.rank } else { arg.rank() == param.rank };
        if !rank_ok {
            return Err(CompileError::type_error(format!(
                "{} expects rank {}, got rank {}",
                describe(),
                param.rank,
                arg.rank()
            )));
        }
        if param.rank >= 2 && arg.order().is_some() && arg.order() != param.order {
            return Err(CompileError::type_error(format!("{} has a different memory order", describe())));
        }

        let (from, to) = (arg.dtype(), &param.dtype);
        let same_precision =
            resolve_precision(&from, arg.precision()) == resolve_precision(to, param.precision);
        if from == *to && same_precision {
            return Ok(arg);
        }
        if let TypedExpr::Literal(literal) = &arg {
            if from.lattice_level() <= to.lattice_level() && to.is_numeric() {
                return Ok(self.convert_literal(literal.clone(), param));
            }
        }
        let widening = from.is_numeric() && from.lattice_level() <= to.lattice_level();
        if arg.rank() == 0 && widening {
            return Ok(TypedExpr::Cast(Cast::new(to.clone(), param.precision, arg)?));
        }
        Err(CompileError::type_error(format!(
            "{} expects {}, got {}",
            describe(),
            types::type_name(to, param.precision),
            types::type_name(&from, arg.precision())
        )))
    }

    fn call_builtin(
        &mut self,
        name: &str,
        builtin: Builtin,
        args: &[Expr],
        kwargs: &[(String, Expr)],
        location: Option<Location>,
    ) -> CompileResult<TypedExpr> {
        match builtin {
            Builtin::Range => Err(CompileError::restriction("range outside of a for loop header", self.language)),
            Builtin::Print => Err(CompileError::restriction("print inside an expression", self.language)),
            Builtin::Len => {
                let list = ArgList::new(name, args, kwargs)?;
                let arg = self.annotate_expr(list.require("x")?, location)?;
                match arg.shape().into_iter().next() {
                    Some(length) => Ok(TypedExpr::Size(length)),
                    None => Err(CompileError::type_error(format!("len() of scalar '{}'", arg))),
                }
            }
            Builtin::Abs => self.call_library("abs", args, kwargs, location),
            Builtin::Cast(dtype, precision) => self.cast(name, dtype, precision, args, kwargs, location),
        }
    }

    fn cast(
        &mut self,
        name: &str,
        dtype: DataType,
        precision: Precision,
        args: &[Expr],
        kwargs: &[(String, Expr)],
        location: Option<Location>,
    ) -> CompileResult<TypedExpr> {
        let list = ArgList::new(if dtype == DataType::Complex { "complex" } else { name }, args, kwargs)?;
        let first = list.params[0];
        let value = self.annotate_expr(list.require(first)?, location)?;

        // complex(re, im) == re + im * 1j
        if let Some(imag) = list.get("imag") {
            let imag = self.annotate_expr(imag, location)?;
            let real = TypedExpr::Cast(Cast::new(dtype.clone(), precision, value)?);
            let unit = TypedExpr::Literal(Literal::complex(0.0, 1.0).with_precision(precision));
            let imag = TypedExpr::Binary(BinaryOp::new(Operator::Mul, imag, unit)?);
            return Ok(TypedExpr::Binary(BinaryOp::new(Operator::Add, real, imag)?));
        }

        if let TypedExpr::Literal(literal) = &value {
            if value.dtype().lattice_level() <= dtype.lattice_level() {
                let target = Variable::new("", dtype, precision);
                return Ok(self.convert_literal(literal.clone(), &target));
            }
        }
        Ok(TypedExpr::Cast(Cast::new(dtype, precision, value)?))
    }

    /// Calls of `numpy`, `numpy.linalg` and `math` functions
    fn call_library(
        &mut self,
        name: &str,
        args: &[Expr],
        kwargs: &[(String, Expr)],
        location: Option<Location>,
    ) -> CompileResult<TypedExpr> {
        if let Some((dtype, precision)) = types::lookup(name) {
            return self.cast(name, dtype, precision, args, kwargs, location);
        }
        let list = ArgList::new(name, args, kwargs)?;
        let function = match name {
            "zeros" | "ones" | "empty" | "full" => {
                let shape = self.shape_arg(list.require("shape")?, location)?;
                let fill = self.fill_kind(name, &list, location)?;
                let dtype = self.dtype_arg(list.get("dtype"))?;
                let order = self.order_arg(list.get("order"))?;
                NumpyFunction::Create(ArrayCreation::new(fill, shape, dtype, order)?)
            }
            "zeros_like" | "ones_like" | "empty_like" | "full_like" => {
                let model = self.annotate_expr(list.require("a")?, location)?;
                if model.rank() == 0 {
                    return Err(CompileError::type_error(format!("{}() expects an array", name)));
                }
                let fill = self.fill_kind(name.trim_end_matches("_like"), &list, location)?;
                let dtype = self.dtype_arg(list.get("dtype"))?.or(Some((model.dtype(), model.precision())));
                let order = self.order_arg(list.get("order"))?.or(model.order());
                NumpyFunction::Create(ArrayCreation::new(fill, model.shape(), dtype, order)?)
            }
            "array" => return self.array_call(&list, location),
            "linspace" => {
                let start = self.annotate_expr(list.require("start")?, location)?;
                let stop = self.annotate_expr(list.require("stop")?, location)?;
                let num = match list.get("num") {
                    Some(num) => {
                        let num = self.annotate_expr(num, location)?;
                        self.dim_of(&num)?
                    }
                    None => Dim::Lit(50),
                };
                NumpyFunction::Linspace(Linspace::new(start, stop, num)?)
            }
            "sum" | "prod" | "norm" => {
                let arg_name = if name == "norm" { "x" } else { "a" };
                if name == "norm" && list.get("ord").is_some() {
                    return Err(CompileError::restriction("norm with an explicit ord", self.language));
                }
                let arg = self.annotate_expr(list.require(arg_name)?, location)?;
                let axis = list.get("axis").map(|a| self.axis_arg(a, arg.rank())).transpose()?;
                let kind = match name {
                    "sum" => ReductionKind::Sum,
                    "prod" => ReductionKind::Prod,
                    _ => ReductionKind::Norm,
                };
                NumpyFunction::Reduce(Reduction::new(kind, arg, axis)?)
            }
            "matmul" | "cross" => {
                let a = self.annotate_expr(list.require("a")?, location)?;
                let b = self.annotate_expr(list.require("b")?, location)?;
                if name == "cross" {
                    NumpyFunction::cross(a, b)?
                } else {
                    NumpyFunction::Matmul(Matmul::new(a, b)?)
                }
            }
            "diag" => NumpyFunction::diag(self.annotate_expr(list.require("v")?, location)?)?,
            "shape" => {
                let arg = self.annotate_expr(list.require("a")?, location)?;
                return Ok(shape_tuple(&arg));
            }
            "pi" => return Err(CompileError::type_error("'pi' is not callable")),
            other => {
                let Some(func) = MathFunction::from_name(other) else {
                    return Err(CompileError::undefined(other.to_string()));
                };
                let arg = self.annotate_expr(list.require("x")?, location)?;
                NumpyFunction::Math(MathCall::new(func, arg)?)
            }
        };
        Ok(TypedExpr::Numpy(function))
    }

    fn fill_kind(&mut self, name: &str, list: &ArgList<'_>, location: Option<Location>) -> CompileResult<FillKind> {
        Ok(match name {
            "zeros" => FillKind::Zeros,
            "ones" => FillKind::Ones,
            "empty" => FillKind::Empty,
            _ => FillKind::Full(Box::new(self.annotate_expr(list.require("fill_value")?, location)?)),
        })
    }

    /// `array([[1, 2], [3, 4]])` or a copy of an existing array
    fn array_call(&mut self, list: &ArgList<'_>, location: Option<Location>) -> CompileResult<TypedExpr> {
        let object = list.require("object")?;
        let dtype = self.dtype_arg(list.get("dtype"))?;
        let order = self.order_arg(list.get("order"))?;
        if matches!(object, Expr::List(_) | Expr::Tuple(_)) {
            let mut shape = Vec::new();
            let mut leaves = Vec::new();
            flatten_nested(object, 0, &mut shape, &mut leaves)?;
            let elements = leaves
                .into_iter()
                .map(|e| self.annotate_expr(e, location))
                .collect::<CompileResult<Vec<_>>>()?;
            let literal = ArrayLiteral::new(elements, shape, dtype, order)?;
            return Ok(TypedExpr::Numpy(NumpyFunction::Array(literal)));
        }

        let source = self.annotate_expr(object, location)?;
        if source.rank() == 0 {
            return Err(CompileError::type_error(format!("array() of scalar '{}'", source)));
        }
        if let Some((dtype, precision)) = dtype {
            let same = dtype == source.dtype()
                && resolve_precision(&dtype, precision) == resolve_precision(&source.dtype(), source.precision());
            if !same {
                return Err(CompileError::restriction("array copies changing the dtype", self.language));
            }
        }
        if order.is_some() && source.order().is_some() && order != source.order() {
            return Err(CompileError::restriction("array copies changing the memory order", self.language));
        }
        Ok(TypedExpr::Numpy(NumpyFunction::copy(source)?))
    }

    /// Array shape from an integer or a tuple of integers
    pub(crate) fn shape_arg(&mut self, expr: &Expr, location: Option<Location>) -> CompileResult<Vec<Dim>> {
        let items = match expr {
            Expr::Tuple(items) | Expr::List(items) => {
                items.iter().map(|i| self.annotate_expr(i, location)).collect::<CompileResult<Vec<_>>>()?
            }
            other => match self.annotate_expr(other, location)? {
                TypedExpr::Tuple(items) => items,
                single => vec![single],
            },
        };
        items.iter().map(|i| self.dim_of(i)).collect()
    }

    fn dim_of(&self, e: &TypedExpr) -> CompileResult<Dim> {
        if !is_integer_scalar(e) {
            return Err(CompileError::type_error(format!("array size '{}' must be an integer scalar", e)));
        }
        Dim::from_expr(e)
            .map(|d| d.simplify())
            .ok_or_else(|| CompileError::restriction(format!("array size '{}'", e), self.language))
    }

    fn axis_arg(&self, expr: &Expr, rank: usize) -> CompileResult<usize> {
        let axis = match expr {
            Expr::Int(n) => *n,
            Expr::Unary { op: crate::ast::UnaryOperator::Neg, operand } => match operand.as_ref() {
                Expr::Int(n) => -*n,
                _ => return Err(CompileError::restriction("non-literal reduction axes", self.language)),
            },
            _ => return Err(CompileError::restriction("non-literal reduction axes", self.language)),
        };
        let resolved = if axis < 0 { rank as i64 + axis } else { axis };
        usize::try_from(resolved).map_err(|_| {
            CompileError::type_error(format!("axis {} is out of bounds for an array of rank {}", axis, rank))
        })
    }

    /// `dtype=float`, `dtype='int32'`, `dtype=np.complex128`
    fn dtype_arg(&self, expr: Option<&Expr>) -> CompileResult<Option<(DataType, Precision)>> {
        let Some(expr) = expr else {
            return Ok(None);
        };
        let name = match expr {
            Expr::Str(s) => Some(s.clone()),
            other => self.resolve_dotted(other).or_else(|| other.dotted_name()),
        };
        let found = name.as_deref().and_then(types::lookup).filter(|(dtype, _)| dtype.is_numeric());
        match found {
            Some(found) => Ok(Some(found)),
            None => Err(CompileError::type_error(format!(
                "unsupported dtype '{}'",
                name.unwrap_or_else(|| "?".to_string())
            ))),
        }
    }

    fn order_arg(&self, expr: Option<&Expr>) -> CompileResult<Option<Order>> {
        match expr {
            None => Ok(None),
            Some(Expr::Str(s)) if s == "C" => Ok(Some(Order::C)),
            Some(Expr::Str(s)) if s == "F" => Ok(Some(Order::F)),
            Some(_) => Err(CompileError::specification("order must be 'C' or 'F'")),
        }
    }
}

/// Collect the leaves of a nested list literal, checking it is rectangular
fn flatten_nested<'a>(expr: &'a Expr, depth: usize, shape: &mut Vec<usize>, leaves: &mut Vec<&'a Expr>) -> CompileResult<()> {
    match expr {
        Expr::List(items) | Expr::Tuple(items) => {
            if shape.len() == depth {
                if !leaves.is_empty() {
                    return Err(CompileError::type_error("array literal must be rectangular"));
                }
                shape.push(items.len());
            } else if shape.get(depth) != Some(&items.len()) {
                return Err(CompileError::type_error("array literal must be rectangular"));
            }
            items.iter().try_for_each(|i| flatten_nested(i, depth + 1, shape, leaves))
        }
        leaf => {
            if depth != shape.len() {
                return Err(CompileError::type_error("array literal must be rectangular"));
            }
            leaves.push(leaf);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::syntax::StatementKind;
    use crate::config::CompilerConfig;
    use crate::diagnostics::Diagnostics;
    use crate::parser::parse;
    use crate::semantic::ScopeKind;
    use pretty_assertions::assert_eq;

    fn annotate_in(setup: &str, expression: &str) -> CompileResult<TypedExpr> {
        let mut diagnostics = Diagnostics::new();
        let mut annotator = Annotator::new(&CompilerConfig::default(), &mut diagnostics);
        for stmt in &parse(setup).unwrap().body {
            annotator.import(stmt)?;
        }
        annotator.scopes.push(ScopeKind::Function);
        let n = Variable::new("n", DataType::Integer, 8);
        annotator.scopes.insert("n", Symbol::Variable(n));
        let program = parse(expression).unwrap();
        let StatementKind::Expr(e) = &program.body[0].kind else {
            panic!("Expected expression");
        };
        annotator.annotate_expr(e, None)
    }

    #[test]
    fn test_zeros_with_keywords() {
        let e = annotate_in("import numpy as np", "np.zeros(shape=(3, n), dtype='int32', order='F')").unwrap();
        assert_eq!(e.rank(), 2);
        assert_eq!(e.shape(), vec![Dim::Lit(3), Dim::Var("n".to_string())]);
        assert_eq!((e.dtype(), e.precision(), e.order()), (DataType::Integer, 4, Some(Order::F)));
    }

    #[test]
    fn test_array_literal_shape() {
        let e = annotate_in("from numpy import array", "array([[1, 2, 3], [4, 5, 6.0]])").unwrap();
        assert_eq!(e.shape(), vec![Dim::Lit(2), Dim::Lit(3)]);
        assert_eq!(e.dtype(), DataType::Real);
        assert!(annotate_in("from numpy import array", "array([[1, 2], [3]])").is_err());
    }

    #[test]
    fn test_linalg_norm_through_module() {
        let e = annotate_in("import numpy as np", "np.linalg.norm(np.ones(4))").unwrap();
        assert_eq!((e.dtype(), e.rank()), (DataType::Real, 0));
    }

    #[test]
    fn test_unknown_library_keyword() {
        let err = annotate_in("from numpy import zeros", "zeros(3, shap=2)").unwrap_err();
        assert!(matches!(err, CompileError::Specification { .. }));
    }

    #[test]
    fn test_complex_from_parts() {
        let e = annotate_in("", "complex(n, 2.0)").unwrap();
        assert_eq!(e.dtype(), DataType::Complex);
        let e = annotate_in("", "float(3)").unwrap();
        assert_eq!(e, TypedExpr::Literal(Literal::float(3.0)));
    }

    #[test]
    fn test_math_module() {
        let e = annotate_in("from math import sqrt, pi", "sqrt(n) * pi").unwrap();
        assert_eq!(e.dtype(), DataType::Real);
        let err = annotate_in("import scipy", "1").unwrap_err();
        assert!(matches!(err, CompileError::Restriction { .. }));
    }

    #[test]
    fn test_reduction_axis() {
        let e = annotate_in("from numpy import ones, sum", "sum(ones((2, 5)), axis=-1)").unwrap();
        assert_eq!(e.shape(), vec![Dim::Lit(2)]);
    }

    #[test]
    fn test_len_and_method_calls() {
        let e = annotate_in("from numpy import ones", "len(ones(7))").unwrap();
        assert_eq!(e, TypedExpr::Size(Dim::Lit(7)));
        let err = annotate_in("", "n.bit_length()").unwrap_err();
        assert!(matches!(err, CompileError::Restriction { .. }));
    }
}
