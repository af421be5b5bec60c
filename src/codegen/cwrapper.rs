//! Python C-API extension module
//!
//! Every public function gets a `PyCFunction` that parses its arguments,
//! converts them to native storage, calls the compiled function (through its
//! `bind(c)` companion for Fortran) and builds the Python result. Arguments
//! the `PyArg` machinery cannot store directly go through converter
//! functions, one per distinct argument type. Interfaces get a dispatcher
//! computing the packed type key of the actual arguments.

use tracing::{debug, instrument};

use super::c::literal;
use super::header::{CSignature, ParamRole};
use super::{CodePrinter, CodeWriter, NameRegistry};
use crate::ast::{FunctionArg, FunctionDef, Interface, Module, TypedExpr, Variable};
use crate::config::{CompilerConfig, Language};
use crate::diagnostics::{Diagnostic, Diagnostics, Stage};
use crate::error::{CompileError, CompileResult};
use crate::semantic::interface::{argument_flag, dispatch_key, type_flag, FLAG_BITS};
use crate::types::{native_type, ndarray_field, resolve_precision, type_name, DataType, Order, Precision};

const SEPARATOR: &str = "/*........................................*/";

/// `t_ndarray` view of the data of a NumPy array
const NDARRAY_FROM_NUMPY: &str = "static t_ndarray ndarray_from_numpy(PyArrayObject* a, enum e_types type, enum e_order order)
{
    t_ndarray arr;
    int32_t nd = PyArray_NDIM(a);
    arr.nd = nd;
    arr.type = type;
    arr.type_size = nd_type_size[type];
    arr.order = order;
    arr.is_view = true;
    arr.raw_data = PyArray_DATA(a);
    arr.length = PyArray_SIZE(a);
    arr.shape = malloc((nd > 0 ? nd : 1) * sizeof(int64_t));
    arr.strides = malloc((nd > 0 ? nd : 1) * sizeof(int64_t));
    for (int32_t k = 0; k < nd; ++k)
    {
        arr.shape[k] = PyArray_DIM(a, k);
        arr.strides[k] = PyArray_STRIDE(a, k) / arr.type_size;
    }
    return arr;
}";

fn unsupported(construct: impl Into<String>) -> CompileError {
    CompileError::restriction(construct, "the Python wrapper")
}

/// NumPy type number of an element type
fn numpy_type(dtype: &DataType, precision: Precision) -> CompileResult<&'static str> {
    let name = match (dtype, resolve_precision(dtype, precision)) {
        (DataType::Integer, 1) => "NPY_INT8",
        (DataType::Integer, 2) => "NPY_INT16",
        (DataType::Integer, 4) => "NPY_INT32",
        (DataType::Integer, 8) => "NPY_INT64",
        (DataType::Real, 4) => "NPY_FLOAT",
        (DataType::Real, 8) => "NPY_DOUBLE",
        (DataType::Complex, 4) => "NPY_CFLOAT",
        (DataType::Complex, 8) => "NPY_CDOUBLE",
        (DataType::Bool, _) => "NPY_BOOL",
        _ => return Err(unsupported(format!("arrays of {}", dtype))),
    };
    Ok(name)
}

/// `PyArg_Parse` format unit storing a scalar directly
fn parse_flag(v: &Variable) -> Option<char> {
    if v.rank > 0 {
        return None;
    }
    match (&v.dtype, resolve_precision(&v.dtype, v.precision)) {
        (DataType::Integer, 2) => Some('h'),
        (DataType::Integer, 4) => Some('i'),
        (DataType::Integer, 8) => Some('L'),
        (DataType::Real, 4) => Some('f'),
        (DataType::Real, 8) => Some('d'),
        _ => None,
    }
}

/// `Py_BuildValue` format unit and argument of a scalar result
fn build_value(v: &Variable) -> CompileResult<(&'static str, String)> {
    if v.rank > 0 {
        return Err(unsupported(format!("array result '{}'", v.name)));
    }
    let name = &v.name;
    let unit = match (&v.dtype, resolve_precision(&v.dtype, v.precision)) {
        (DataType::Integer, 1) => ("b", name.clone()),
        (DataType::Integer, 2) => ("h", name.clone()),
        (DataType::Integer, 4) => ("i", name.clone()),
        (DataType::Integer, 8) => ("L", format!("(long long){}", name)),
        (DataType::Real, 4) => ("f", name.clone()),
        (DataType::Real, 8) => ("d", name.clone()),
        (DataType::Complex, _) => ("N", format!("PyComplex_FromDoubles(creal({}), cimag({}))", name, name)),
        (DataType::Bool, _) => ("O", format!("{} ? Py_True : Py_False", name)),
        (other, _) => return Err(unsupported(format!("result '{}' of type {}", name, other))),
    };
    Ok(unit)
}

/// Type test and value extraction of a scalar converter
fn scalar_conversion(v: &Variable, c_type: &str) -> CompileResult<(&'static str, String)> {
    let conversion = match v.dtype {
        DataType::Integer => (
            "PyLong_Check(p_arg) || PyArray_IsScalar(p_arg, Integer)",
            format!("({})PyLong_AsLongLong(p_arg)", c_type),
        ),
        DataType::Real => (
            "PyFloat_Check(p_arg) || PyLong_Check(p_arg) || PyArray_IsScalar(p_arg, Number)",
            format!("({})PyFloat_AsDouble(p_arg)", c_type),
        ),
        DataType::Complex => (
            "PyComplex_Check(p_arg) || PyFloat_Check(p_arg) || PyLong_Check(p_arg) || PyArray_IsScalar(p_arg, Number)",
            format!(
                "({})(PyComplex_RealAsDouble(p_arg) + PyComplex_ImagAsDouble(p_arg) * _Complex_I)",
                c_type
            ),
        ),
        DataType::Bool => ("PyBool_Check(p_arg) || PyArray_IsScalar(p_arg, Bool)", "PyObject_IsTrue(p_arg) == 1".to_string()),
        ref other => return Err(unsupported(format!("argument '{}' of type {}", v.name, other))),
    };
    Ok(conversion)
}

fn flag_name(v: &Variable) -> String {
    let suffix = if v.rank > 0 { format!("[{}]", vec![":"; v.rank].join(",")) } else { String::new() };
    format!("{}{}", type_name(&v.dtype, v.precision), suffix)
}

/// C string literal
fn quoted(text: &str) -> String {
    let escaped = text.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n");
    format!("\"{}\"", escaped)
}

/// Identity of a converter: values of equal key share one function
#[derive(Debug, Clone, PartialEq)]
struct ConverterKey {
    dtype: DataType,
    precision: Precision,
    rank: usize,
    order: Option<Order>,
}

impl ConverterKey {
    fn of(v: &Variable) -> Self {
        Self {
            dtype: v.dtype.clone(),
            precision: resolve_precision(&v.dtype, v.precision),
            rank: v.rank,
            order: v.order,
        }
    }
}

/// One argument of a wrapper and the C variables holding it
struct WrappedArg<'f> {
    arg: &'f FunctionArg,
    /// `PyObject*` the argument is parsed into, when not parsed natively
    py: Option<String>,
    /// Storage behind the pointer of an optional argument
    storage: Option<String>,
}

impl WrappedArg<'_> {
    fn var(&self) -> &Variable {
        &self.arg.var
    }

    /// Variable that receives the converted value
    fn target(&self) -> &str {
        self.storage.as_deref().unwrap_or(&self.arg.var.name)
    }
}

/// Printer of the `<module>_wrapper.c` extension module
pub struct CWrapperPrinter {
    config: CompilerConfig,
    names: NameRegistry,
    converters: Vec<(ConverterKey, String)>,
    converter_code: CodeWriter,
    uses_arrays: bool,
    uses_dispatch: bool,
}

impl CWrapperPrinter {
    pub fn new(config: CompilerConfig) -> Self {
        Self {
            config,
            names: NameRegistry::new(),
            converters: Vec::new(),
            converter_code: CodeWriter::new("    "),
            uses_arrays: false,
            uses_dispatch: false,
        }
    }

    fn reset(&mut self, module: &Module) {
        self.names = NameRegistry::new();
        for function in module.all_functions() {
            self.names.reserve(function.name());
        }
        for interface in &module.interfaces {
            self.names.reserve(interface.name.as_str());
        }
        for reserved in ["argument_flag", "ndarray_from_numpy"] {
            self.names.reserve(reserved);
        }
        self.converters.clear();
        self.converter_code = CodeWriter::new("    ");
        self.uses_arrays = false;
        self.uses_dispatch = false;
    }

    /// Name of the converter for values like `v`, written on first use
    fn converter(&mut self, v: &Variable) -> CompileResult<String> {
        let key = ConverterKey::of(v);
        if let Some((_, name)) = self.converters.iter().find(|(k, _)| *k == key) {
            return Ok(name.clone());
        }
        let name = if v.rank > 0 {
            let order = match v.order {
                Some(Order::C) => "_c",
                Some(Order::F) => "_f",
                None => "",
            };
            self.names.fresh(&format!("py_to_ndarray_{}_{}{}", type_name(&v.dtype, v.precision), v.rank, order))
        } else {
            self.names.fresh(&format!("py_to_{}", type_name(&v.dtype, v.precision)))
        };
        debug!(converter = %name, "new argument converter");
        let mut w = self.converter_code.nested();
        if v.rank > 0 {
            self.uses_arrays = true;
            self.array_converter(&name, v, &mut w)?;
        } else {
            let c_type = native_type(&v.dtype, v.precision, Language::C)
                .map_err(|_| unsupported(format!("argument '{}' of type {}", v.name, v.dtype)))?;
            let (check, value) = scalar_conversion(v, c_type)?;
            w.line(format!("static int {}(PyObject* p_arg, {}* c_arg, const char* parameter)", name, c_type));
            w.line("{");
            w.indented(|w| {
                w.line(format!("if (!({}))", check));
                w.line("{");
                w.indented(|w| {
                    w.line(format!(
                        "PyErr_Format(PyExc_TypeError, \"%s must be {}, not %s\", parameter, Py_TYPE(p_arg)->tp_name);",
                        type_name(&v.dtype, v.precision)
                    ));
                    w.line("return 0;");
                });
                w.line("}");
                w.line(format!("*c_arg = {};", value));
                w.line("return !PyErr_Occurred();");
            });
            w.line("}");
        }
        w.blank();
        self.converter_code.append(w);
        self.converters.push((key, name.clone()));
        Ok(name)
    }

    fn array_converter(&self, name: &str, v: &Variable, w: &mut CodeWriter) -> CompileResult<()> {
        let npy = numpy_type(&v.dtype, v.precision)?;
        let field = ndarray_field(&v.dtype, v.precision)?;
        let (order_flag, order) = match v.order {
            Some(Order::F) => ("NPY_ARRAY_F_CONTIGUOUS", "order_f"),
            _ => ("NPY_ARRAY_C_CONTIGUOUS", "order_c"),
        };
        // Companions read the data as one contiguous block
        let contiguity = match (v.rank, self.config.language) {
            (1, Language::Fortran) => Some(("NPY_ARRAY_C_CONTIGUOUS", "\"%s must be contiguous\", parameter".to_string())),
            (1, Language::C) => None,
            _ => Some((
                order_flag,
                format!("\"%s does not have the expected ordering ({})\", parameter", v.order.unwrap_or_default()),
            )),
        };
        let fail = |w: &mut CodeWriter, exception: &str, args: String| {
            w.line("{");
            w.indented(|w| {
                w.line(format!("PyErr_Format({}, {});", exception, args));
                w.line("return 0;");
            });
            w.line("}");
        };
        w.line(format!("static int {}(PyObject* p_arg, t_ndarray* c_arg, const char* parameter)", name));
        w.line("{");
        w.indented(|w| {
            w.line("PyArrayObject* a;");
            w.line("if (!PyArray_Check(p_arg))");
            fail(
                w,
                "PyExc_TypeError",
                "\"%s must be numpy.ndarray, not %s\", parameter, Py_TYPE(p_arg)->tp_name".to_string(),
            );
            w.line("a = (PyArrayObject*)p_arg;");
            w.line(format!("if (PyArray_TYPE(a) != {})", npy));
            fail(
                w,
                "PyExc_TypeError",
                format!("\"%s must contain {} elements\", parameter", type_name(&v.dtype, v.precision)),
            );
            w.line(format!("if (PyArray_NDIM(a) != {})", v.rank));
            fail(
                w,
                "PyExc_TypeError",
                format!("\"%s must have rank {}, not %d\", parameter, PyArray_NDIM(a)", v.rank),
            );
            if let Some((flag, message)) = contiguity {
                w.line(format!("if (!PyArray_CHKFLAGS(a, {}))", flag));
                fail(w, "PyExc_NotImplementedError", message);
            }
            w.line(format!("*c_arg = ndarray_from_numpy(a, {}, {});", field, order));
            w.line("return 1;");
        });
        w.line("}");
        Ok(())
    }

    /// Runtime counterpart of the dispatch flags computed at compile time
    fn argument_flag_function(&self) -> CompileResult<String> {
        let mut w = CodeWriter::new("    ");
        let arrays = [
            ("NPY_INT32", DataType::Integer, 4),
            ("NPY_INT64", DataType::Integer, 8),
            ("NPY_FLOAT", DataType::Real, 4),
            ("NPY_DOUBLE", DataType::Real, 8),
            ("NPY_CDOUBLE", DataType::Complex, 8),
            ("NPY_BOOL", DataType::Bool, 0),
        ];
        let scalars = [
            ("PyBool_Check(o) || PyArray_IsScalar(o, Bool)", DataType::Bool, 0),
            ("PyArray_IsScalar(o, Int8)", DataType::Integer, 1),
            ("PyArray_IsScalar(o, Int16)", DataType::Integer, 2),
            ("PyArray_IsScalar(o, Int32)", DataType::Integer, 4),
            ("PyLong_Check(o) || PyArray_IsScalar(o, Int64)", DataType::Integer, 8),
            ("PyArray_IsScalar(o, Float32)", DataType::Real, 4),
            ("PyFloat_Check(o)", DataType::Real, 8),
            ("PyArray_IsScalar(o, Complex64)", DataType::Complex, 4),
            ("PyComplex_Check(o)", DataType::Complex, 8),
        ];
        w.line("static int64_t argument_flag(PyObject* o)");
        w.line("{");
        w.indented(|w| -> CompileResult<()> {
            w.line("if (PyArray_Check(o))");
            w.line("{");
            w.indented(|w| -> CompileResult<()> {
                w.line("switch (PyArray_TYPE((PyArrayObject*)o))");
                w.line("{");
                w.indented(|w| -> CompileResult<()> {
                    for (npy, dtype, precision) in &arrays {
                        w.line(format!("case {}: return {};", npy, type_flag(dtype, *precision, 1)?));
                    }
                    w.line("default: return 0;");
                    Ok(())
                })?;
                w.line("}");
                Ok(())
            })?;
            w.line("}");
            for (check, dtype, precision) in &scalars {
                w.line(format!("if ({}) return {};", check, type_flag(dtype, *precision, 0)?));
            }
            w.line("return 0;");
            Ok(())
        })?;
        w.line("}");
        Ok(w.finish())
    }

    /// Why `function` cannot be called from Python, if it cannot
    fn signature(&self, function: &FunctionDef) -> CompileResult<CSignature> {
        let signature = CSignature::new(&function.signature, self.config.language)?;
        if let Some(r) = function.results().iter().find(|r| r.rank > 0) {
            return Err(unsupported(format!("array result '{}'", r.name)));
        }
        if let Some(a) = function.signature.args.iter().find(|a| a.var.dtype == DataType::String) {
            return Err(unsupported(format!("string argument '{}'", a.var.name)));
        }
        Ok(signature)
    }

    /// `PyCFunction` raising `NotImplementedError`
    fn placeholder(&self, wrapper: &str, function: &str, reason: &CompileError, w: &mut CodeWriter) {
        w.line(format!("static PyObject* {}(PyObject* self, PyObject* args, PyObject* kwargs)", wrapper));
        w.line("{");
        w.indented(|w| {
            let message = format!("{} cannot be called from Python: {}", function, reason);
            w.line(format!("PyErr_SetString(PyExc_NotImplementedError, {});", quoted(&message)));
            w.line("return NULL;");
        });
        w.line("}");
    }

    /// Conversions, call and result of one function, the arguments having
    /// been parsed already
    fn call_and_build(
        &mut self,
        function: &FunctionDef,
        signature: &CSignature,
        args: &[WrappedArg],
        result: &str,
        w: &mut CodeWriter,
    ) -> CompileResult<()> {
        let arrays: Vec<&str> = args.iter().filter(|a| a.var().rank > 0).map(|a| a.target()).collect();
        let release = |w: &mut CodeWriter| {
            for a in &arrays {
                w.line(format!("free_pointer(&{});", a));
            }
        };
        for a in args {
            let Some(py) = &a.py else { continue };
            let converter = self.converter(a.var())?;
            let convert = format!("if (!{}({}, &{}, {}))", converter, py, a.target(), quoted(&a.var().name));
            let fail = |w: &mut CodeWriter| {
                w.line("{");
                w.indented(|w| {
                    release(w);
                    w.line("return NULL;");
                });
                w.line("}");
            };
            if a.arg.is_optional() {
                w.line(format!("if ({} != NULL && {} != Py_None)", py, py));
                w.line("{");
                w.indented(|w| {
                    w.line(&convert);
                    fail(w);
                    w.line(format!("{} = &{};", a.var().name, a.target()));
                });
                w.line("}");
            } else if a.arg.has_default() {
                w.line(format!("if ({} != NULL)", py));
                w.line("{");
                w.indented(|w| {
                    w.line(&convert);
                    fail(w);
                });
                w.line("}");
            } else {
                w.line(&convert);
                fail(w);
            }
        }

        let results = function.results();
        let mut call_args = Vec::with_capacity(signature.params.len());
        for p in &signature.params {
            let text = match p.role {
                ParamRole::Value(k) | ParamRole::Optional(k) | ParamRole::Array(k) => args[k].var().name.clone(),
                ParamRole::Extent { arg, axis } => format!("{}.shape[{}]", args[arg].var().name, axis),
                ParamRole::Data(k) => {
                    let v = args[k].var();
                    format!("{}.{}", v.name, ndarray_field(&v.dtype, v.precision)?)
                }
                ParamRole::Result(k) => format!("&{}", results[k].name),
            };
            call_args.push(text);
        }
        let call = format!("{}({})", signature.name, call_args.join(", "));
        match signature.returns {
            Some(k) => w.line(format!("{} = {};", results[k].name, call)),
            None => w.line(format!("{};", call)),
        }

        release(w);
        if results.is_empty() {
            w.line("Py_RETURN_NONE;");
            return Ok(());
        }
        let mut units = String::new();
        let mut values = Vec::with_capacity(results.len());
        for r in results {
            let (unit, value) = build_value(r)?;
            units.push_str(unit);
            values.push(value);
        }
        if results.len() > 1 {
            units = format!("({})", units);
        }
        w.line(format!("{} = Py_BuildValue(\"{}\", {});", result, units, values.join(", ")));
        w.line(format!("return {};", result));
        Ok(())
    }

    /// Declarations of the C storage of arguments and results
    fn declare(&self, args: &[WrappedArg], function: &FunctionDef, w: &mut CodeWriter) -> CompileResult<()> {
        for a in args {
            let v = a.var();
            let c_type = if v.rank > 0 { "t_ndarray" } else { native_type(&v.dtype, v.precision, Language::C)? };
            let init = if v.rank > 0 { " = {.shape = NULL}" } else { "" };
            match &a.storage {
                Some(storage) => {
                    w.line(format!("{} {}{};", c_type, storage, init));
                    w.line(format!("{}* {} = NULL;", c_type, v.name));
                }
                None => w.line(format!("{} {}{};", c_type, v.name, init)),
            }
        }
        for r in function.results() {
            w.line(format!("{} {};", native_type(&r.dtype, r.precision, Language::C)?, r.name));
        }
        Ok(())
    }

    fn local_names(function: &FunctionDef) -> NameRegistry {
        let mut names = NameRegistry::new();
        for reserved in ["self", "args", "kwargs"] {
            names.reserve(reserved);
        }
        for v in function.args().chain(function.results()) {
            names.reserve(v.name.as_str());
        }
        names
    }

    fn kwlist(names: &[&str], kwlist: &str) -> String {
        let quoted: Vec<String> = names.iter().map(|n| quoted(n)).chain(["NULL".to_string()]).collect();
        format!("static char* {}[] = {{{}}};", kwlist, quoted.join(", "))
    }

    /// Wrapper of a free function
    fn wrap_function(&mut self, function: &FunctionDef, wrapper: &str, w: &mut CodeWriter) -> CompileResult<()> {
        let signature = self.signature(function)?;
        let mut names = Self::local_names(function);
        let mut args = Vec::with_capacity(function.signature.args.len());
        for arg in &function.signature.args {
            let native = parse_flag(&arg.var).is_some() && !arg.is_optional();
            let py = (!native).then(|| names.fresh(&format!("py_{}", arg.var.name)));
            let storage = arg.is_optional().then(|| names.fresh(&format!("{}_value", arg.var.name)));
            args.push(WrappedArg { arg, py, storage });
        }
        let result = names.fresh("result");
        let kwlist = names.fresh("kwlist");

        let mut flags = String::new();
        let mut targets = Vec::with_capacity(args.len());
        for (k, a) in args.iter().enumerate() {
            if a.arg.has_default() && !function.signature.args[..k].iter().any(FunctionArg::has_default) {
                flags.push('|');
            }
            match &a.py {
                Some(py) => {
                    flags.push('O');
                    targets.push(format!("&{}", py));
                }
                None => {
                    flags.push(parse_flag(a.var()).unwrap_or('O'));
                    targets.push(format!("&{}", a.var().name));
                }
            }
        }

        let mut body = w.nested();
        body.indented(|b| -> CompileResult<()> {
            self.declare(&args, function, b)?;
            for a in &args {
                if let Some(py) = &a.py {
                    b.line(format!("PyObject* {} = NULL;", py));
                }
            }
            if !function.results().is_empty() {
                b.line(format!("PyObject* {};", result));
            }
            let keywords: Vec<&str> = args.iter().map(|a| a.var().name.as_str()).collect();
            b.line(Self::kwlist(&keywords, &kwlist));
            b.blank();
            for a in &args {
                if let Some(TypedExpr::Literal(value)) = &a.arg.default {
                    b.line(format!("{} = {};", a.target(), literal(value)));
                }
            }
            let targets = if targets.is_empty() { String::new() } else { format!(", {}", targets.join(", ")) };
            b.line(format!(
                "if (!PyArg_ParseTupleAndKeywords(args, kwargs, \"{}\", {}{}))",
                flags, kwlist, targets
            ));
            b.line("{");
            b.indented(|b| b.line("return NULL;"));
            b.line("}");
            self.call_and_build(function, &signature, &args, &result, b)
        })?;

        w.line(format!("static PyObject* {}(PyObject* self, PyObject* args, PyObject* kwargs)", wrapper));
        w.line("{");
        w.append(body);
        w.line("}");
        Ok(())
    }

    /// Wrapper of one overload, taking the parsed Python objects
    fn wrap_overload(&mut self, function: &FunctionDef, wrapper: &str, params: &[String], w: &mut CodeWriter) -> CompileResult<()> {
        let signature = self.signature(function)?;
        let mut names = Self::local_names(function);
        for p in params {
            names.reserve(p.as_str());
        }
        let args: Vec<WrappedArg> = function
            .signature
            .args
            .iter()
            .zip(params)
            .map(|(arg, py)| WrappedArg { arg, py: Some(py.clone()), storage: None })
            .collect();
        let result = names.fresh("result");
        let declared: Vec<String> = params.iter().map(|p| format!("PyObject* {}", p)).collect();
        w.line(format!("static PyObject* {}({})", wrapper, declared.join(", ")));
        w.line("{");
        w.indented(|w| -> CompileResult<()> {
            self.declare(&args, function, w)?;
            if !function.results().is_empty() {
                w.line(format!("PyObject* {};", result));
            }
            w.blank();
            self.call_and_build(function, &signature, &args, &result, w)
        })?;
        w.line("}");
        Ok(())
    }

    /// Overload wrappers, the type check and the dispatcher of an interface
    fn wrap_interface(&mut self, interface: &Interface, wrapper: &str, w: &mut CodeWriter) -> CompileResult<()> {
        let Some(first) = interface.functions.first() else {
            return Ok(());
        };
        self.uses_dispatch = true;
        let mut names = Self::local_names(first);
        let params: Vec<String> = first.args().map(|v| names.fresh(&format!("py_{}", v.name))).collect();
        let key = names.fresh("key");
        let kwlist = names.fresh("kwlist");

        let mut branches = Vec::with_capacity(interface.functions.len());
        for function in &interface.functions {
            let overload = self.names.fresh(&format!("{}_wrapper", function.name()));
            match self.wrap_overload(function, &overload, &params, w) {
                Ok(()) => {
                    w.blank();
                    branches.push((dispatch_key(&function.signature)?, overload));
                }
                Err(err) => debug!(overload = function.name(), %err, "overload left out of dispatch"),
            }
        }

        let check = self.names.fresh(&format!("{}_type_check", interface.name));
        let declared: Vec<String> = params.iter().map(|p| format!("PyObject* {}", p)).collect();
        w.line(format!("static int64_t {}({})", check, declared.join(", ")));
        w.line("{");
        w.indented(|w| -> CompileResult<()> {
            w.line("int64_t key = 0;");
            w.line("int64_t flag;");
            for (k, (py, v)) in params.iter().zip(first.args()).enumerate() {
                let mut accepted: Vec<(u8, String)> = Vec::new();
                for function in &interface.functions {
                    let var = &function.signature.args[k].var;
                    let flag = argument_flag(var)?;
                    if !accepted.iter().any(|(f, _)| *f == flag) {
                        accepted.push((flag, flag_name(var)));
                    }
                }
                let test: Vec<String> = accepted.iter().map(|(f, _)| format!("flag != {}", f)).collect();
                let expected: Vec<&str> = accepted.iter().map(|(_, n)| n.as_str()).collect();
                w.line(format!("flag = argument_flag({});", py));
                w.line(format!("if ({})", test.join(" && ")));
                w.line("{");
                w.indented(|w| {
                    let message = format!("{} must be ({})", v.name, expected.join(" or "));
                    w.line(format!("PyErr_SetString(PyExc_TypeError, {});", quoted(&message)));
                    w.line("return -1;");
                });
                w.line("}");
                w.line(format!("key = (key << {}) + flag;", FLAG_BITS));
            }
            w.line("return key;");
            Ok(())
        })?;
        w.line("}");
        w.blank();

        w.line(format!("static PyObject* {}(PyObject* self, PyObject* args, PyObject* kwargs)", wrapper));
        w.line("{");
        w.indented(|w| {
            for p in &params {
                w.line(format!("PyObject* {} = NULL;", p));
            }
            w.line(format!("int64_t {};", key));
            let keywords: Vec<&str> = first.args().map(|v| v.name.as_str()).collect();
            w.line(Self::kwlist(&keywords, &kwlist));
            w.blank();
            let targets: String = params.iter().map(|p| format!(", &{}", p)).collect();
            w.line(format!(
                "if (!PyArg_ParseTupleAndKeywords(args, kwargs, \"{}\", {}{}))",
                "O".repeat(params.len()),
                kwlist,
                targets
            ));
            w.line("{");
            w.indented(|w| w.line("return NULL;"));
            w.line("}");
            w.line(format!("{} = {}({});", key, check, params.join(", ")));
            w.line(format!("if ({} < 0)", key));
            w.line("{");
            w.indented(|w| w.line("return NULL;"));
            w.line("}");
            for (flag, overload) in &branches {
                w.line(format!("if ({} == {})", key, flag));
                w.line("{");
                w.indented(|w| w.line(format!("return {}({});", overload, params.join(", "))));
                w.line("}");
            }
            w.line("PyErr_SetString(PyExc_TypeError, \"Arguments combinations don't exist\");");
            w.line("return NULL;");
        });
        w.line("}");
        Ok(())
    }
}

impl CodePrinter for CWrapperPrinter {
    fn extension(&self) -> &'static str {
        "c"
    }

    #[instrument(skip_all, fields(module = %module.name))]
    fn print_module(&mut self, module: &Module, diagnostics: &mut Diagnostics) -> CompileResult<String> {
        self.reset(module);
        let mut prototypes = Vec::new();
        let mut methods = Vec::new();
        let mut wrappers = CodeWriter::new("    ");

        for function in module.functions.iter().filter(|f| f.is_public()) {
            let wrapper = self.names.fresh(&format!("{}_wrapper", function.name()));
            if let Ok(signature) = CSignature::new(&function.signature, self.config.language) {
                prototypes.push(format!("{};", signature.prototype()));
            }
            let mut w = wrappers.nested();
            if let Err(err) = self.wrap_function(function, &wrapper, &mut w) {
                diagnostics.report(
                    Diagnostic::warning(Stage::Codegen, format!("'{}' is not callable from Python: {}", function.name(), err))
                        .with_symbol(function.name())
                        .at(function.location),
                )?;
                w = wrappers.nested();
                self.placeholder(&wrapper, function.name(), &err, &mut w);
            }
            wrappers.append(w);
            wrappers.blank();
            methods.push((function.name().to_string(), wrapper, function.doc.clone()));
        }

        for interface in &module.interfaces {
            let Some(first) = interface.functions.first() else { continue };
            if !first.is_public() {
                continue;
            }
            for function in &interface.functions {
                if let Ok(signature) = CSignature::new(&function.signature, self.config.language) {
                    prototypes.push(format!("{};", signature.prototype()));
                }
            }
            let wrapper = self.names.fresh(&format!("{}_wrapper", interface.name));
            self.wrap_interface(interface, &wrapper, &mut wrappers)?;
            wrappers.blank();
            methods.push((interface.name.clone(), wrapper, first.doc.clone()));
        }

        let mut w = CodeWriter::new("    ");
        w.line("#define PY_ARRAY_UNIQUE_SYMBOL CWRAPPER_ARRAY_API");
        w.line("#define NPY_NO_DEPRECATED_API NPY_1_7_API_VERSION");
        w.line("#include <Python.h>");
        w.line("#include <numpy/arrayobject.h>");
        for include in ["stdint.h", "stdbool.h", "complex.h"] {
            w.line(format!("#include <{}>", include));
        }
        w.line(format!("#include \"{}\"", super::runtime::NDARRAYS_HEADER));
        w.blank();
        for p in &prototypes {
            w.line(p);
        }
        w.blank();
        w.line(SEPARATOR);
        w.blank();
        if self.uses_arrays {
            w.line(NDARRAY_FROM_NUMPY);
            w.blank();
        }
        if self.uses_dispatch {
            w.line(self.argument_flag_function()?);
            w.blank();
        }
        let converters = std::mem::replace(&mut self.converter_code, CodeWriter::new("    "));
        w.append(converters);
        w.line(SEPARATOR);
        w.blank();
        w.append(wrappers);

        let table = self.names.fresh(&format!("{}_methods", module.name));
        w.line(format!("static PyMethodDef {}[] = {{", table));
        w.indented(|w| {
            for (name, wrapper, doc) in &methods {
                let doc = quoted(doc.as_deref().unwrap_or(""));
                w.line(format!("{{\"{}\", (PyCFunction){}, METH_VARARGS | METH_KEYWORDS, {}}},", name, wrapper, doc));
            }
            w.line("{NULL, NULL, 0, NULL}");
        });
        w.line("};");
        w.blank();
        w.line(SEPARATOR);
        w.blank();

        let definition = self.names.fresh(&format!("{}_module", module.name));
        w.line(format!("static struct PyModuleDef {} = {{", definition));
        w.indented(|w| {
            w.line("PyModuleDef_HEAD_INIT,");
            w.line(format!("\"{}\",", module.name));
            w.line("NULL,");
            w.line("-1,");
            w.line(table.as_str());
        });
        w.line("};");
        w.blank();
        w.line(SEPARATOR);
        w.blank();

        w.line(format!("PyMODINIT_FUNC PyInit_{}(void)", module.name));
        w.line("{");
        w.indented(|w| {
            w.line("PyObject* m;");
            w.blank();
            w.line("import_array();");
            w.line(format!("m = PyModule_Create(&{});", definition));
            w.line("if (m == NULL)");
            w.line("{");
            w.indented(|w| w.line("return NULL;"));
            w.line("}");
            w.line("return m;");
        });
        w.line("}");
        Ok(w.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expansion::expand_module;
    use crate::semantic::annotate_source;
    use pretty_assertions::assert_eq;

    fn wrapper(source: &str, language: Language) -> (String, Diagnostics) {
        let config = CompilerConfig::new(language).with_wrapper(true);
        let mut diagnostics = Diagnostics::new();
        let mut module = annotate_source(source, &config, &mut diagnostics).unwrap();
        expand_module(&mut module, language, &mut diagnostics).unwrap();
        let text = CWrapperPrinter::new(config).print_module(&module, &mut diagnostics).unwrap();
        (text, diagnostics)
    }

    #[test]
    fn test_scalar_function_calls_companion() {
        let (text, _) = wrapper("def f(x: int) -> int:\n    return x + 1\n", Language::Fortran);
        assert!(text.contains("int64_t bind_c_f(int64_t x);"), "{}", text);
        assert!(text.contains("static PyObject* f_wrapper(PyObject* self, PyObject* args, PyObject* kwargs)"));
        assert!(text.contains("static char* kwlist[] = {\"x\", NULL};"), "{}", text);
        assert!(text.contains("if (!PyArg_ParseTupleAndKeywords(args, kwargs, \"L\", kwlist, &x))"), "{}", text);
        assert!(text.contains("    Out_0001 = bind_c_f(x);\n"), "{}", text);
        assert!(text.contains("result = Py_BuildValue(\"L\", (long long)Out_0001);"), "{}", text);
        assert!(text.contains("{\"f\", (PyCFunction)f_wrapper, METH_VARARGS | METH_KEYWORDS, \"\"},"), "{}", text);
        assert!(text.contains("PyMODINIT_FUNC PyInit_mod(void)"));
        assert!(text.contains("import_array();"));
    }

    #[test]
    fn test_c_target_calls_function_directly() {
        let (text, _) = wrapper("def f(x: float, y: float) -> float:\n    return x * y\n", Language::C);
        assert!(text.contains("double f(double x, double y);"), "{}", text);
        assert!(text.contains("\"dd\", kwlist, &x, &y"), "{}", text);
        assert!(text.contains("Out_0001 = f(x, y);"), "{}", text);
    }

    #[test]
    fn test_absent_optional_skips_conversion() {
        let (text, _) = wrapper(
            "def f(x: int, z: 'int' = None) -> int:\n    y = x\n    if z is not None:\n        y = x + z\n    return y\n",
            Language::C,
        );
        assert!(text.contains("int64_t z_value;\n    int64_t* z = NULL;\n"), "{}", text);
        assert!(text.contains("\"L|O\", kwlist, &x, &py_z"), "{}", text);
        let guard = text.find("if (py_z != NULL && py_z != Py_None)").unwrap();
        let conversion = text.find("if (!py_to_int64(py_z, &z_value, \"z\"))").unwrap();
        assert!(guard < conversion);
        assert!(text.contains("z = &z_value;"));
        assert!(text.contains("y = f(x, z);"), "{}", text);
    }

    #[test]
    fn test_array_converters_are_shared() {
        let source = "def f(a: 'float[:,:]', b: 'float[:,:]', x: int) -> float:\n    return a[0, 0] + b[0, 0] + x\n";
        let (text, _) = wrapper(source, Language::Fortran);
        assert_eq!(text.matches("static int py_to_ndarray_float64_2_c(").count(), 1);
        assert!(text.contains("if (PyArray_TYPE(a) != NPY_DOUBLE)"));
        assert!(text.contains("if (!PyArray_CHKFLAGS(a, NPY_ARRAY_C_CONTIGUOUS))"));
        assert!(text.contains("bind_c_f(a.shape[0], a.shape[1], a.nd_double, b.shape[0], b.shape[1], b.nd_double, x)"), "{}", text);
        assert!(text.contains("free_pointer(&a);\n    free_pointer(&b);\n    result = Py_BuildValue"), "{}", text);
    }

    #[test]
    fn test_interface_dispatch() {
        let (text, _) = wrapper("@types('int')\n@types('float')\ndef g(x):\n    return x\n", Language::C);
        assert!(text.contains("static int64_t argument_flag(PyObject* o)"));
        assert!(text.contains("static PyObject* g_0_wrapper(PyObject* py_x)"), "{}", text);
        assert!(text.contains("if (flag != 4 && flag != 6)"), "{}", text);
        assert!(text.contains("\"x must be (int64 or float64)\""), "{}", text);
        assert!(text.contains("if (key == 4)\n    {\n        return g_0_wrapper(py_x);"), "{}", text);
        assert!(text.contains("if (key == 6)\n    {\n        return g_1_wrapper(py_x);"), "{}", text);
        assert!(text.contains("Arguments combinations don't exist"));
        assert!(text.contains("{\"g\", (PyCFunction)g_wrapper,"));
    }

    #[test]
    fn test_several_results_build_a_tuple() {
        let (text, _) = wrapper("def g(x: float, b: bool):\n    return x, b\n", Language::C);
        assert!(text.contains("g(x, b, &Out_0001, &Out_0002);"), "{}", text);
        assert!(text.contains("Py_BuildValue(\"(dO)\", Out_0001, Out_0002 ? Py_True : Py_False)"), "{}", text);
    }

    #[test]
    fn test_array_result_raises_not_implemented() {
        let (text, diagnostics) = wrapper("from numpy import zeros\ndef h(n: int):\n    a = zeros(n)\n    return a\n", Language::C);
        assert!(text.contains("PyErr_SetString(PyExc_NotImplementedError, \"h cannot be called from Python: "), "{}", text);
        assert_eq!(diagnostics.num_messages(), 1);
    }

    #[test]
    fn test_procedures_declare_no_result() {
        let (text, _) = wrapper("def p(x: int):\n    print(x)\n", Language::C);
        assert!(text.contains("Py_RETURN_NONE;"), "{}", text);
        assert!(!text.contains("PyObject* result;"), "{}", text);

        let (text, _) = wrapper("@types('int')\n@types('float')\ndef g(x):\n    print(x)\n", Language::C);
        assert!(text.contains("static PyObject* g_1_wrapper(PyObject* py_x)"), "{}", text);
        assert!(!text.contains("PyObject* result;"), "{}", text);

        let (text, _) = wrapper("@types('int')\n@types('float')\ndef g(x):\n    return x\n", Language::C);
        assert!(text.contains("PyObject* result;"), "{}", text);
    }

    #[test]
    fn test_private_functions_are_not_exported() {
        let (text, _) = wrapper("@private\ndef helper(x: float) -> float:\n    return x\n", Language::C);
        assert!(!text.contains("helper_wrapper"));
        assert!(text.contains("{NULL, NULL, 0, NULL}"));
    }
}
