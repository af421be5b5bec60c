//! Untyped syntax tree produced by the parser
//!
//! Nodes here carry no type information; they only record what was written
//! and where.

use crate::diagnostics::Location;

use super::operators::{Operator, UnaryOperator};

/// A complete module
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub body: Vec<Statement>,
}

/// Expression types
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Name(String),
    Int(i64),
    Float(f64),
    /// Imaginary literal `2j`
    Imag(f64),
    Str(String),
    Bool(bool),
    None,

    /// `value.attr`
    Attribute { value: Box<Expr>, attr: String },

    /// `func(args, key=value)`
    Call { func: Box<Expr>, args: Vec<Expr>, kwargs: Vec<(String, Expr)> },

    /// `value[i, j:k]`
    Subscript { value: Box<Expr>, indices: Vec<Subscript> },

    Binary { op: Operator, left: Box<Expr>, right: Box<Expr> },
    Unary { op: UnaryOperator, operand: Box<Expr> },

    /// `then if cond else orelse`
    IfExp { cond: Box<Expr>, then: Box<Expr>, orelse: Box<Expr> },

    Tuple(Vec<Expr>),
    List(Vec<Expr>),
}

impl Expr {
    /// Dotted name of a plain `a.b.c` chain
    pub fn dotted_name(&self) -> Option<String> {
        match self {
            Expr::Name(n) => Some(n.clone()),
            Expr::Attribute { value, attr } => Some(format!("{}.{}", value.dotted_name()?, attr)),
            _ => None,
        }
    }
}

/// One position of a subscript
#[derive(Debug, Clone, PartialEq)]
pub enum Subscript {
    Index(Expr),
    Slice { start: Option<Expr>, stop: Option<Expr>, step: Option<Expr> },
}

/// `@name(args, key=value)`
#[derive(Debug, Clone, PartialEq)]
pub struct Decorator {
    pub name: String,
    pub args: Vec<Expr>,
    pub kwargs: Vec<(String, Expr)>,
    pub location: Location,
}

/// Parameter with optional annotation and default
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub annotation: Option<Expr>,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<Param>,
    pub returns: Option<Expr>,
    pub decorators: Vec<Decorator>,
    pub body: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatementKind {
    Expr(Expr),
    Assign { target: Expr, value: Expr },
    AugAssign { target: Expr, op: Operator, value: Expr },
    Return(Option<Expr>),
    If { branches: Vec<(Expr, Vec<Statement>)>, orelse: Vec<Statement> },
    For { target: String, iter: Expr, body: Vec<Statement> },
    While { cond: Expr, body: Vec<Statement> },
    FunctionDef(FunctionDef),
    /// `import module [as alias]`
    Import { module: String, alias: Option<String> },
    /// `from module import name [as alias], ...`
    FromImport { module: String, names: Vec<(String, Option<String>)> },
    Pass,
    Break,
    Continue,
    Pragma(String),
}

/// A statement with its source position
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub kind: StatementKind,
    pub location: Location,
}

impl Statement {
    pub fn new(kind: StatementKind, location: Location) -> Self {
        Self { kind, location }
    }

    /// Docstrings are expression statements holding a string
    pub fn docstring(&self) -> Option<&str> {
        match &self.kind {
            StatementKind::Expr(Expr::Str(s)) => Some(s),
            _ => None,
        }
    }
}
