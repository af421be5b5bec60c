//! Interfaces: overload sets and their runtime dispatch keys
//!
//! Every argument of an overload maps to a 4-bit flag describing its
//! concrete type. The flags are packed left to right into one integer, so
//! the wrapper can compute the key of the actual arguments at run time and
//! pick the matching overload with a single comparison.

use crate::ast::{FunctionDef, FunctionSignature, Interface, TypedExpr, Variable};
use crate::error::{CompileError, CompileResult};
use crate::types::{resolve_precision, type_name, DataType, Precision};

/// Packed dispatch key
pub type DispatchKey = u64;

/// Bits used per argument
pub const FLAG_BITS: u32 = 4;

/// 4-bit flag of a scalar or array of the given type
pub fn type_flag(dtype: &DataType, precision: Precision, rank: usize) -> CompileResult<u8> {
    let precision = resolve_precision(dtype, precision);
    let flag = match (rank > 0, dtype, precision) {
        (false, DataType::Integer, 1) => Some(1),
        (false, DataType::Integer, 2) => Some(2),
        (false, DataType::Integer, 4) => Some(3),
        (false, DataType::Integer, 8) => Some(4),
        (false, DataType::Real, 4) => Some(5),
        (false, DataType::Real, 8) => Some(6),
        (false, DataType::Complex, 4) => Some(7),
        (false, DataType::Complex, 8) => Some(8),
        (false, DataType::Bool, _) => Some(9),
        (true, DataType::Integer, 4) => Some(10),
        (true, DataType::Integer, 8) => Some(11),
        (true, DataType::Real, 4) => Some(12),
        (true, DataType::Real, 8) => Some(13),
        (true, DataType::Complex, 8) => Some(14),
        (true, DataType::Bool, _) => Some(15),
        _ => None,
    };
    flag.ok_or_else(|| {
        let suffix = if rank > 0 { "[:]" } else { "" };
        CompileError::specification(format!(
            "type {}{} cannot be dispatched on in an interface",
            type_name(dtype, precision),
            suffix
        ))
    })
}

pub fn argument_flag(var: &Variable) -> CompileResult<u8> {
    type_flag(&var.dtype, var.precision, var.rank)
}

/// Pack one flag per argument, first argument in the most significant bits
pub fn pack_flags(flags: impl IntoIterator<Item = u8>) -> DispatchKey {
    flags
        .into_iter()
        .fold(0, |key, flag| (key << FLAG_BITS) + DispatchKey::from(flag))
}

/// Dispatch key of an overload
pub fn dispatch_key(signature: &FunctionSignature) -> CompileResult<DispatchKey> {
    if signature.args.len() > (DispatchKey::BITS / FLAG_BITS) as usize {
        return Err(CompileError::specification(format!(
            "'{}' has too many arguments to be part of an interface",
            signature.name
        )));
    }
    let flags = signature
        .args
        .iter()
        .map(|a| argument_flag(&a.var))
        .collect::<CompileResult<Vec<_>>>()?;
    Ok(pack_flags(flags))
}

/// Group overloads under one name, rejecting two overloads that no runtime
/// check could tell apart
pub fn build_interface(name: impl Into<String>, functions: Vec<FunctionDef>) -> CompileResult<Interface> {
    let name = name.into();
    let mut seen: Vec<(DispatchKey, &str)> = Vec::new();
    for f in &functions {
        let key = dispatch_key(&f.signature)?;
        if let Some((_, other)) = seen.iter().find(|(k, _)| *k == key) {
            return Err(CompileError::specification(format!(
                "overloads '{}' and '{}' of interface '{}' have the same argument types",
                other,
                f.name(),
                name
            )));
        }
        seen.push((key, f.name()));
    }
    tracing::debug!(interface = %name, overloads = functions.len(), "built interface");
    Ok(Interface { name, functions })
}

/// Whether a call argument can be passed for a parameter without conversion
fn argument_matches(param: &Variable, arg: &TypedExpr) -> bool {
    if matches!(arg, TypedExpr::Nil) {
        return param.is_optional;
    }
    if arg.rank() != param.rank {
        return false;
    }
    let same_dtype = arg.dtype() == param.dtype;
    let same_precision =
        resolve_precision(&arg.dtype(), arg.precision()) == resolve_precision(&param.dtype, param.precision);
    // Literals adopt the precision of the parameter
    same_dtype && (same_precision || arg.is_literal())
}

/// Pick the overload whose parameters match the positional arguments
pub fn select_overload<'a>(
    name: &str,
    overloads: &'a [FunctionSignature],
    args: &[TypedExpr],
) -> CompileResult<&'a FunctionSignature> {
    overloads
        .iter()
        .find(|sig| {
            args.len() <= sig.args.len()
                && sig.args.iter().enumerate().all(|(k, param)| match args.get(k) {
                    Some(arg) => argument_matches(&param.var, arg),
                    None => param.has_default(),
                })
        })
        .ok_or_else(|| {
            let given: Vec<String> = args
                .iter()
                .map(|a| {
                    let suffix = if a.rank() > 0 { format!("[{}]", vec![":"; a.rank()].join(",")) } else { String::new() };
                    format!("{}{}", type_name(&a.dtype(), a.precision()), suffix)
                })
                .collect();
            CompileError::type_error(format!(
                "no overload of '{}' accepts arguments ({})",
                name,
                given.join(", ")
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{FunctionArg, FunctionFlags, Literal};
    use crate::types::TypeSpec;
    use pretty_assertions::assert_eq;

    fn function(name: &str, types: &[&str]) -> FunctionDef {
        let args = types
            .iter()
            .enumerate()
            .map(|(k, t)| FunctionArg::required(Variable::argument(format!("x{}", k), &TypeSpec::parse(t).unwrap())))
            .collect();
        FunctionDef {
            signature: FunctionSignature {
                name: name.to_string(),
                args,
                results: Vec::new(),
                flags: FunctionFlags::default(),
            },
            locals: Vec::new(),
            body: Vec::new(),
            doc: None,
            location: None,
        }
    }

    #[test]
    fn test_flags_are_distinct() {
        let mut flags = Vec::new();
        for (dtype, precisions) in [
            (DataType::Integer, vec![1, 2, 4, 8]),
            (DataType::Real, vec![4, 8]),
            (DataType::Complex, vec![4, 8]),
            (DataType::Bool, vec![4]),
        ] {
            for p in precisions {
                flags.push(type_flag(&dtype, p, 0).unwrap());
            }
        }
        flags.push(type_flag(&DataType::Real, 8, 1).unwrap());
        flags.push(type_flag(&DataType::Integer, 8, 2).unwrap());
        let mut sorted = flags.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), flags.len());
        assert!(flags.iter().all(|&f| f > 0 && f < 16));
    }

    #[test]
    fn test_key_packing() {
        let f = function("f_0", &["int", "float[:]"]);
        assert_eq!(dispatch_key(&f.signature).unwrap(), (4 << 4) + 13);
        assert_eq!(pack_flags([1, 2, 3]), 0x123);
    }

    #[test]
    fn test_colliding_overloads_rejected() {
        let err = build_interface("f", vec![function("f_0", &["int"]), function("f_1", &["int64"])]).unwrap_err();
        assert!(matches!(err, CompileError::Specification { .. }));
        assert!(build_interface("f", vec![function("f_0", &["int"]), function("f_1", &["float"])]).is_ok());
    }

    #[test]
    fn test_unsupported_array_type() {
        assert!(type_flag(&DataType::Integer, 2, 1).is_err());
    }

    #[test]
    fn test_select_overload() {
        let overloads: Vec<FunctionSignature> = vec![
            function("f_0", &["int"]).signature,
            function("f_1", &["float"]).signature,
        ];
        let chosen = select_overload("f", &overloads, &[TypedExpr::Literal(Literal::float(1.0))]).unwrap();
        assert_eq!(chosen.name, "f_1");
        let err = select_overload("f", &overloads, &[TypedExpr::Literal(Literal::string("x"))]).unwrap_err();
        assert!(err.to_string().contains("no overload of 'f'"));
    }
}
