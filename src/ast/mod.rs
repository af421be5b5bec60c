//! Abstract syntax trees
//!
//! `syntax` holds the untyped tree straight out of the parser. The other
//! modules define the typed tree built by the annotator, consumed by the
//! expansion pass and read by the printers.

pub mod builtins;
pub mod expr;
pub mod index;
pub mod numpy;
pub mod operators;
pub mod shape;
pub mod stmt;
pub mod syntax;
pub mod variable;

pub use builtins::{Builtin, Cast};
pub use expr::{FunctionCall, IfTernary, Literal, LiteralValue, NodeKind, TypedExpr};
pub use index::{Index, IndexedElement, Slice};
pub use numpy::{
    ArrayCreation, ArrayLiteral, FillKind, Linspace, MathCall, MathFunction, Matmul, NumpyFunction, Reduction,
    ReductionKind,
};
pub use operators::{BinaryOp, Operator, UnaryOp, UnaryOperator};
pub use shape::{dims_compatible, Dim};
pub use stmt::{
    Constant, ForLoop, FunctionArg, FunctionDef, FunctionFlags, FunctionSignature, Interface, Module, StmtKind,
    TypedStmt,
};
pub use variable::Variable;
