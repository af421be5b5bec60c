//! C binding header
//!
//! [`CSignature`] describes how a function is called from C: directly for
//! the C target, through its `bind(c)` companion for Fortran. The header
//! printer, the Fortran companions and the wrapper all build on it so that
//! the three agree on parameter order and types.

use tracing::debug;

use super::{CodePrinter, CodeWriter, NameRegistry};
use crate::ast::{FunctionSignature, Module};
use crate::config::{CompilerConfig, Language};
use crate::diagnostics::Diagnostics;
use crate::error::{CompileError, CompileResult};
use crate::types::native_type;

/// Symbol of the C-callable companion of a Fortran procedure
pub fn companion_name(name: &str) -> String {
    format!("bind_c_{}", name)
}

/// What a C-level parameter carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamRole {
    /// Scalar argument passed by value
    Value(usize),
    /// Optional argument passed by address, NULL when absent
    Optional(usize),
    /// Array descriptor
    Array(usize),
    /// Length of one axis of an array argument
    Extent { arg: usize, axis: usize },
    /// First element of a contiguous array argument
    Data(usize),
    /// Address receiving one of several results
    Result(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CParam {
    pub name: String,
    pub c_type: String,
    pub role: ParamRole,
}

/// C-level calling convention of one function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CSignature {
    pub name: String,
    pub return_type: String,
    /// Result returned by value, if any
    pub returns: Option<usize>,
    pub params: Vec<CParam>,
}

fn unsupported(construct: String) -> CompileError {
    CompileError::restriction(construct, "C binding")
}

impl CSignature {
    pub fn new(signature: &FunctionSignature, language: Language) -> CompileResult<Self> {
        match language {
            Language::C => Self::direct(signature),
            Language::Fortran => Self::companion(signature),
        }
    }

    fn direct(signature: &FunctionSignature) -> CompileResult<Self> {
        let mut params = Vec::new();
        for (k, arg) in signature.args.iter().enumerate() {
            let v = &arg.var;
            let base = if v.rank > 0 { "t_ndarray" } else { native_type(&v.dtype, v.precision, Language::C)? };
            let (c_type, role) = match (arg.is_optional(), v.rank > 0) {
                (true, _) => (format!("{}*", base), ParamRole::Optional(k)),
                (false, true) => (base.to_string(), ParamRole::Array(k)),
                (false, false) => (base.to_string(), ParamRole::Value(k)),
            };
            params.push(CParam { name: v.name.clone(), c_type, role });
        }
        let c_type = |k: usize| -> CompileResult<&'static str> {
            let r = &signature.results[k];
            if r.rank > 0 {
                Ok("t_ndarray")
            } else {
                native_type(&r.dtype, r.precision, Language::C)
            }
        };
        let (return_type, returns) = match signature.results.len() {
            0 => ("void".to_string(), None),
            1 => (c_type(0)?.to_string(), Some(0)),
            n => {
                for k in 0..n {
                    let name = signature.results[k].name.clone();
                    params.push(CParam { name, c_type: format!("{}*", c_type(k)?), role: ParamRole::Result(k) });
                }
                ("void".to_string(), None)
            }
        };
        Ok(Self { name: signature.name.clone(), return_type, returns, params })
    }

    fn companion(signature: &FunctionSignature) -> CompileResult<Self> {
        let mut names = NameRegistry::new();
        for a in &signature.args {
            names.reserve(a.var.name.as_str());
        }
        for r in &signature.results {
            names.reserve(r.name.as_str());
        }
        let mut params = Vec::new();
        for (k, arg) in signature.args.iter().enumerate() {
            let v = &arg.var;
            let c_type = native_type(&v.dtype, v.precision, Language::C)
                .map_err(|_| unsupported(format!("argument '{}' of type {}", v.name, v.dtype)))?;
            if c_type == "char *" {
                return Err(unsupported(format!("string argument '{}'", v.name)));
            }
            if v.rank == 0 {
                let role = if arg.is_optional() { ParamRole::Optional(k) } else { ParamRole::Value(k) };
                let c_type = if arg.is_optional() { format!("{}*", c_type) } else { c_type.to_string() };
                params.push(CParam { name: v.name.clone(), c_type, role });
                continue;
            }
            if arg.is_optional() {
                return Err(unsupported(format!("optional array argument '{}'", v.name)));
            }
            for axis in 0..v.rank {
                let name = names.fresh(&format!("n{}_{}", axis, v.name));
                params.push(CParam { name, c_type: "int64_t".to_string(), role: ParamRole::Extent { arg: k, axis } });
            }
            params.push(CParam { name: v.name.clone(), c_type: format!("{}*", c_type), role: ParamRole::Data(k) });
        }
        if let Some(r) = signature.results.iter().find(|r| r.rank > 0) {
            return Err(unsupported(format!("array result '{}'", r.name)));
        }
        let c_type = |k: usize| native_type(&signature.results[k].dtype, signature.results[k].precision, Language::C);
        let (return_type, returns) = match signature.results.len() {
            0 => ("void".to_string(), None),
            1 => (c_type(0)?.to_string(), Some(0)),
            n => {
                for k in 0..n {
                    let name = signature.results[k].name.clone();
                    params.push(CParam { name, c_type: format!("{}*", c_type(k)?), role: ParamRole::Result(k) });
                }
                ("void".to_string(), None)
            }
        };
        Ok(Self { name: companion_name(&signature.name), return_type, returns, params })
    }

    /// `int64_t f(int64_t x, double* y)`
    pub fn prototype(&self) -> String {
        let params: Vec<String> = self.params.iter().map(|p| format!("{} {}", p.c_type, p.name)).collect();
        let params = if params.is_empty() { "void".to_string() } else { params.join(", ") };
        format!("{} {}({})", self.return_type, self.name, params)
    }
}

/// Printer of the `<module>.h` binding header
pub struct HeaderPrinter {
    config: CompilerConfig,
}

impl HeaderPrinter {
    pub fn new(config: CompilerConfig) -> Self {
        Self { config }
    }
}

impl CodePrinter for HeaderPrinter {
    fn extension(&self) -> &'static str {
        "h"
    }

    fn print_module(&mut self, module: &Module, _diagnostics: &mut Diagnostics) -> CompileResult<String> {
        let guard = format!("{}_H", module.name.to_uppercase());
        let mut w = CodeWriter::new("    ");
        w.line(format!("#ifndef {}", guard));
        w.line(format!("#define {}", guard));
        w.blank();
        for include in ["stdlib.h", "stdint.h", "stdbool.h", "complex.h"] {
            w.line(format!("#include <{}>", include));
        }
        if self.config.language == Language::C {
            w.line(format!("#include \"{}\"", super::runtime::NDARRAYS_HEADER));
        }
        w.blank();
        for function in module.all_functions().filter(|f| f.is_public()) {
            match CSignature::new(&function.signature, self.config.language) {
                Ok(signature) => w.line(format!("{};", signature.prototype())),
                // Already reported when the Fortran module was printed
                Err(err) => debug!(function = function.name(), %err, "no prototype"),
            }
        }
        w.blank();
        w.line(format!("#endif /* {} */", guard));
        Ok(w.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::annotate_source;
    use pretty_assertions::assert_eq;

    fn header(source: &str, language: Language) -> String {
        let config = CompilerConfig::new(language);
        let mut diagnostics = Diagnostics::new();
        let module = annotate_source(source, &config, &mut diagnostics).unwrap();
        HeaderPrinter::new(config).print_module(&module, &mut diagnostics).unwrap()
    }

    const SOURCE: &str = "def f(a: 'float[:,:]', x: int, z: 'int' = None) -> float:\n    return a[0, 0] + x\n";

    #[test]
    fn test_c_prototypes_take_descriptors() {
        let text = header(SOURCE, Language::C);
        assert!(text.contains("#include \"ndarrays.h\""));
        assert!(text.contains("double f(t_ndarray a, int64_t x, int64_t* z);"), "{}", text);
    }

    #[test]
    fn test_fortran_companions_take_extents_and_data() {
        let text = header(SOURCE, Language::Fortran);
        assert!(!text.contains("ndarrays.h"));
        assert!(
            text.contains("double bind_c_f(int64_t n0_a, int64_t n1_a, double* a, int64_t x, int64_t* z);"),
            "{}",
            text
        );
    }

    #[test]
    fn test_multiple_results_are_returned_through_pointers() {
        let text = header("def g(x: float):\n    return x, 2 * x\n", Language::C);
        assert!(text.contains("void g(double x, double* Out_0001, double* Out_0002);"), "{}", text);
    }

    #[test]
    fn test_array_results_have_no_companion() {
        let source = "from numpy import zeros\ndef h(n: int):\n    a = zeros(n)\n    return a\n";
        let text = header(source, Language::Fortran);
        assert!(!text.contains("bind_c_h"));
        let text = header(source, Language::C);
        assert!(text.contains("t_ndarray h(int64_t n);"), "{}", text);
    }

    #[test]
    fn test_guard_uses_module_name() {
        let text = header("def f():\n    pass\n", Language::C);
        assert!(text.starts_with("#ifndef MOD_H\n#define MOD_H\n"));
        assert!(text.contains("void f(void);"));
    }
}
