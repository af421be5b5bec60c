//! Python builtins and numpy scalar casts

use serde::{Deserialize, Serialize};

use super::expr::TypedExpr;
use crate::error::{CompileError, CompileResult};
use crate::types::{self, DataType, Precision};

/// Builtin names the annotator resolves without a declaration
#[derive(Debug, Clone, PartialEq)]
pub enum Builtin {
    Range,
    Len,
    Abs,
    Print,
    Cast(DataType, Precision),
}

impl Builtin {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "range" => Some(Builtin::Range),
            "len" => Some(Builtin::Len),
            "abs" => Some(Builtin::Abs),
            "print" => Some(Builtin::Print),
            "str" => None,
            _ => types::lookup(name).map(|(dtype, precision)| Builtin::Cast(dtype, precision)),
        }
    }
}

/// `float(x)`, `int32(x)`, ...
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cast {
    pub dtype: DataType,
    pub precision: Precision,
    pub arg: Box<TypedExpr>,
}

impl Cast {
    pub fn new(dtype: DataType, precision: Precision, arg: TypedExpr) -> CompileResult<Self> {
        let source = arg.dtype();
        let target = types::type_name(&dtype, precision);
        if matches!(arg, TypedExpr::Nil | TypedExpr::Tuple(_)) || !source.is_numeric() {
            return Err(CompileError::type_error(format!("cannot cast a value of type {} to {}", source, target)));
        }
        if !dtype.is_numeric() {
            return Err(CompileError::type_error(format!("unsupported cast target {}", target)));
        }
        if source == DataType::Complex && matches!(dtype, DataType::Integer | DataType::Real) {
            return Err(CompileError::type_error(format!("cannot cast a complex value to {}", target)));
        }
        if arg.rank() != 0 {
            return Err(CompileError::type_error(format!("{} expects a scalar argument", target)));
        }
        Ok(Self { dtype, precision, arg: Box::new(arg) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Literal;

    #[test]
    fn test_builtin_lookup() {
        assert_eq!(Builtin::from_name("range"), Some(Builtin::Range));
        assert_eq!(Builtin::from_name("int32"), Some(Builtin::Cast(DataType::Integer, 4)));
        assert_eq!(Builtin::from_name("float"), Some(Builtin::Cast(DataType::Real, 0)));
        assert_eq!(Builtin::from_name("zeros"), None);
    }

    #[test]
    fn test_cast_rules() {
        let z = TypedExpr::Literal(Literal::complex(1.0, 1.0));
        assert!(Cast::new(DataType::Real, 0, z.clone()).is_err());
        assert!(Cast::new(DataType::Complex, 4, z).is_ok());
        assert!(Cast::new(DataType::Integer, 0, TypedExpr::Literal(Literal::string("1"))).is_err());
        let c = Cast::new(DataType::Integer, 4, TypedExpr::Literal(Literal::float(2.5))).unwrap();
        assert_eq!((c.dtype, c.precision), (DataType::Integer, 4));
    }
}
