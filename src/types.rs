//! Data type registry
//!
//! Maps the dialect's type names onto canonical `(DataType, precision)` pairs
//! and those pairs onto target language spellings. Precision is a byte width;
//! `0` stands for the default width of the data type and is resolved with
//! [`resolve_precision`] before any target spelling is looked up.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::Language;
use crate::error::{CompileError, CompileResult};

/// Byte width of a value, 0 meaning the default for its data type
pub type Precision = u8;

/// Semantic kind of a value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Bool,
    Integer,
    Real,
    Complex,
    String,
    Generic,
    User(String),
}

impl DataType {
    /// Position on the promotion lattice `Bool < Integer < Real < Complex`
    pub fn lattice_level(&self) -> Option<u8> {
        match self {
            DataType::Bool => Some(0),
            DataType::Integer => Some(1),
            DataType::Real => Some(2),
            DataType::Complex => Some(3),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        self.lattice_level().is_some()
    }

    /// The richer of two numeric kinds
    pub fn promote(&self, other: &DataType) -> CompileResult<DataType> {
        match (self.lattice_level(), other.lattice_level()) {
            (Some(a), Some(b)) => Ok(if a >= b { self.clone() } else { other.clone() }),
            _ => Err(CompileError::type_error(format!(
                "cannot combine values of type {} and {}",
                self, other
            ))),
        }
    }

    pub fn default_precision(&self) -> Precision {
        match self {
            DataType::Integer | DataType::Real | DataType::Complex => 8,
            DataType::Bool => 4,
            _ => 0,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Bool => write!(f, "bool"),
            DataType::Integer => write!(f, "int"),
            DataType::Real => write!(f, "float"),
            DataType::Complex => write!(f, "complex"),
            DataType::String => write!(f, "str"),
            DataType::Generic => write!(f, "*"),
            DataType::User(name) => write!(f, "{}", name),
        }
    }
}

/// Memory layout of an array of rank 2 or more
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Order {
    /// Row-major
    #[default]
    C,
    /// Column-major
    F,
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Order::C => write!(f, "C"),
            Order::F => write!(f, "F"),
        }
    }
}

/// Replace a default precision with the concrete width of the data type
pub fn resolve_precision(dtype: &DataType, precision: Precision) -> Precision {
    if precision == 0 {
        dtype.default_precision()
    } else {
        precision
    }
}

/// Look up a scalar type name of the dialect (`int`, `float32`, `complex128`, ...)
pub fn lookup(name: &str) -> Option<(DataType, Precision)> {
    let name = name.strip_prefix("np.").or_else(|| name.strip_prefix("numpy.")).unwrap_or(name);
    let found = match name {
        "int" => (DataType::Integer, 0),
        "int8" => (DataType::Integer, 1),
        "int16" => (DataType::Integer, 2),
        "int32" => (DataType::Integer, 4),
        "int64" => (DataType::Integer, 8),
        "float" | "real" => (DataType::Real, 0),
        "float32" => (DataType::Real, 4),
        "float64" | "double" => (DataType::Real, 8),
        "complex" => (DataType::Complex, 0),
        "complex64" => (DataType::Complex, 4),
        "complex128" => (DataType::Complex, 8),
        "bool" => (DataType::Bool, 0),
        "str" => (DataType::String, 0),
        "*" => (DataType::Generic, 0),
        _ => return None,
    };
    Some(found)
}

/// Dialect spelling of a `(dtype, precision)` pair, used in messages
pub fn type_name(dtype: &DataType, precision: Precision) -> String {
    let precision = resolve_precision(dtype, precision);
    match dtype {
        DataType::Integer => format!("int{}", precision as u32 * 8),
        DataType::Real => format!("float{}", precision as u32 * 8),
        DataType::Complex => format!("complex{}", precision as u32 * 16),
        other => other.to_string(),
    }
}

/// Native spelling of a scalar of this type in the target language
pub fn native_type(dtype: &DataType, precision: Precision, language: Language) -> CompileResult<&'static str> {
    let resolved = resolve_precision(dtype, precision);
    let name = match language {
        Language::C => match (dtype, resolved) {
            (DataType::Integer, 1) => Some("int8_t"),
            (DataType::Integer, 2) => Some("int16_t"),
            (DataType::Integer, 4) => Some("int32_t"),
            (DataType::Integer, 8) => Some("int64_t"),
            (DataType::Real, 4) => Some("float"),
            (DataType::Real, 8) => Some("double"),
            (DataType::Complex, 4) => Some("float complex"),
            (DataType::Complex, 8) => Some("double complex"),
            (DataType::Bool, _) => Some("bool"),
            (DataType::String, _) => Some("char *"),
            _ => None,
        },
        Language::Fortran => match (dtype, resolved) {
            (DataType::Integer, 1) => Some("integer(C_INT8_T)"),
            (DataType::Integer, 2) => Some("integer(C_INT16_T)"),
            (DataType::Integer, 4) => Some("integer(C_INT32_T)"),
            (DataType::Integer, 8) => Some("integer(C_INT64_T)"),
            (DataType::Real, 4) => Some("real(C_FLOAT)"),
            (DataType::Real, 8) => Some("real(C_DOUBLE)"),
            (DataType::Complex, 4) => Some("complex(C_FLOAT_COMPLEX)"),
            (DataType::Complex, 8) => Some("complex(C_DOUBLE_COMPLEX)"),
            (DataType::Bool, _) => Some("logical(C_BOOL)"),
            (DataType::String, _) => Some("character(len=*)"),
            _ => None,
        },
    };
    name.ok_or_else(|| CompileError::UnsupportedType {
        dtype: dtype.to_string(),
        precision: resolved,
        target: language.to_string(),
    })
}

/// Element field of `t_ndarray` holding data of this type
pub fn ndarray_field(dtype: &DataType, precision: Precision) -> CompileResult<&'static str> {
    let resolved = resolve_precision(dtype, precision);
    let field = match (dtype, resolved) {
        (DataType::Integer, 1) => Some("nd_int8"),
        (DataType::Integer, 2) => Some("nd_int16"),
        (DataType::Integer, 4) => Some("nd_int32"),
        (DataType::Integer, 8) => Some("nd_int64"),
        (DataType::Real, 4) => Some("nd_float"),
        (DataType::Real, 8) => Some("nd_double"),
        (DataType::Complex, 4) => Some("nd_cfloat"),
        (DataType::Complex, 8) => Some("nd_cdouble"),
        (DataType::Bool, _) => Some("nd_bool"),
        _ => None,
    };
    field.ok_or_else(|| CompileError::UnsupportedType {
        dtype: dtype.to_string(),
        precision: resolved,
        target: "c".to_string(),
    })
}

/// Type of a function argument or result as written in a header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeSpec {
    pub dtype: DataType,
    pub precision: Precision,
    pub rank: usize,
    pub order: Option<Order>,
}

impl TypeSpec {
    pub fn scalar(dtype: DataType, precision: Precision) -> Self {
        Self { dtype, precision, rank: 0, order: None }
    }

    /// Parse a header type string such as `float[:,:](order=F)` or `int32`
    pub fn parse(text: &str) -> CompileResult<Self> {
        let text: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        let text = text.trim_matches(|c| c == '\'' || c == '"');

        let (head, order) = match text.find('(') {
            Some(pos) => {
                let tail = &text[pos..];
                let order = match tail {
                    "(order=C)" | "(order='C')" => Order::C,
                    "(order=F)" | "(order='F')" => Order::F,
                    _ => {
                        return Err(CompileError::specification(format!(
                            "invalid order clause '{}' in type '{}'",
                            tail, text
                        )))
                    }
                };
                (&text[..pos], Some(order))
            }
            None => (text, None),
        };

        let (base, rank) = match head.find('[') {
            Some(pos) => {
                let dims = &head[pos..];
                if !dims.ends_with(']') || dims[1..dims.len() - 1].split(',').any(|d| d != ":") {
                    return Err(CompileError::specification(format!("invalid rank suffix in type '{}'", text)));
                }
                (&head[..pos], dims[1..dims.len() - 1].split(',').count())
            }
            None => (head, 0),
        };

        let (dtype, precision) = lookup(base)
            .ok_or_else(|| CompileError::specification(format!("unknown type '{}'", base)))?;

        // Orders only matter from rank 2 upwards
        let order = if rank >= 2 { Some(order.unwrap_or_default()) } else { None };
        Ok(Self { dtype, precision, rank, order })
    }
}

impl fmt::Display for TypeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", type_name(&self.dtype, self.precision))?;
        if self.rank > 0 {
            write!(f, "[{}]", vec![":"; self.rank].join(","))?;
        }
        if let Some(order) = self.order {
            write!(f, "(order={})", order)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_promotion_is_symmetric() {
        let kinds = [DataType::Bool, DataType::Integer, DataType::Real, DataType::Complex];
        for a in &kinds {
            for b in &kinds {
                let ab = a.promote(b).unwrap();
                let ba = b.promote(a).unwrap();
                assert_eq!(ab, ba);
                assert_eq!(ab.lattice_level(), a.lattice_level().max(b.lattice_level()));
            }
        }
    }

    #[test]
    fn test_promotion_rejects_strings() {
        assert!(DataType::String.promote(&DataType::Integer).is_err());
    }

    #[test]
    fn test_parse_type_strings() {
        let spec = TypeSpec::parse("float[:,:](order=F)").unwrap();
        assert_eq!(spec.dtype, DataType::Real);
        assert_eq!(spec.rank, 2);
        assert_eq!(spec.order, Some(Order::F));

        let spec = TypeSpec::parse("int32[:]").unwrap();
        assert_eq!((spec.dtype, spec.precision, spec.rank, spec.order), (DataType::Integer, 4, 1, None));

        let spec = TypeSpec::parse("'complex128'").unwrap();
        assert_eq!(spec, TypeSpec::scalar(DataType::Complex, 8));

        assert!(TypeSpec::parse("quaternion").is_err());
        assert!(TypeSpec::parse("int[:,1]").is_err());
    }

    #[test]
    fn test_native_names() {
        assert_eq!(native_type(&DataType::Integer, 0, Language::C).unwrap(), "int64_t");
        assert_eq!(native_type(&DataType::Real, 4, Language::Fortran).unwrap(), "real(C_FLOAT)");
        assert_eq!(native_type(&DataType::Complex, 8, Language::C).unwrap(), "double complex");
        assert_eq!(type_name(&DataType::Complex, 0), "complex128");
    }

    #[test]
    fn test_missing_mapping_is_an_error() {
        let err = native_type(&DataType::Real, 2, Language::C).unwrap_err();
        assert!(matches!(err, CompileError::UnsupportedType { precision: 2, .. }));
        assert!(native_type(&DataType::Generic, 0, Language::Fortran).is_err());
    }
}
