//! Typed statements, functions and modules

use serde::{Deserialize, Serialize};

use super::expr::{NodeKind, TypedExpr};
use super::operators::Operator;
use super::variable::Variable;
use crate::diagnostics::Location;

/// `for index in range(start, stop, step)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForLoop {
    pub index: Variable,
    pub start: TypedExpr,
    pub stop: TypedExpr,
    pub step: TypedExpr,
    pub body: Vec<TypedStmt>,
    /// Opaque `omp`/`acc` directives attached to this loop
    pub pragmas: Vec<String>,
}

impl ForLoop {
    /// `for index in range(0, length)` around `body`
    pub fn over(index: Variable, length: TypedExpr, body: Vec<TypedStmt>) -> Self {
        Self {
            index,
            start: TypedExpr::int(0),
            stop: length,
            step: TypedExpr::int(1),
            body,
            pragmas: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StmtKind {
    /// `lhs = rhs`; `lhs` is a variable, an indexed element or a tuple of those
    Assign { lhs: TypedExpr, rhs: TypedExpr },
    AugAssign { lhs: TypedExpr, op: Operator, rhs: TypedExpr },
    /// `lhs` becomes a view of the array `rhs`
    AliasAssign { lhs: Variable, rhs: TypedExpr },
    For(ForLoop),
    While { cond: TypedExpr, body: Vec<TypedStmt> },
    If { branches: Vec<(TypedExpr, Vec<TypedStmt>)>, orelse: Vec<TypedStmt> },
    /// Leave the function; the listed results hold the returned values
    Return(Vec<Variable>),
    /// Heap storage for `var`, sized from its shape
    Allocate { var: Variable, reallocate: bool },
    /// Release the heap storage of `var` before it is overwritten
    Deallocate(Variable),
    Expr(TypedExpr),
    Print(Vec<TypedExpr>),
    Pass,
    Break,
    Continue,
    Pragma(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedStmt {
    pub kind: StmtKind,
    pub location: Option<Location>,
}

impl TypedStmt {
    pub fn new(kind: StmtKind, location: Option<Location>) -> Self {
        Self { kind, location }
    }

    pub fn assign(lhs: TypedExpr, rhs: TypedExpr, location: Option<Location>) -> Self {
        Self::new(StmtKind::Assign { lhs, rhs }, location)
    }

    /// Expressions held directly by this statement, nested bodies excluded
    pub fn exprs(&self) -> Vec<&TypedExpr> {
        match &self.kind {
            StmtKind::Assign { lhs, rhs } | StmtKind::AugAssign { lhs, rhs, .. } => vec![lhs, rhs],
            StmtKind::AliasAssign { rhs, .. } => vec![rhs],
            StmtKind::For(f) => vec![&f.start, &f.stop, &f.step],
            StmtKind::While { cond, .. } => vec![cond],
            StmtKind::If { branches, .. } => branches.iter().map(|(c, _)| c).collect(),
            StmtKind::Expr(e) => vec![e],
            StmtKind::Print(items) => items.iter().collect(),
            StmtKind::Return(_)
            | StmtKind::Allocate { .. }
            | StmtKind::Deallocate(_)
            | StmtKind::Pass
            | StmtKind::Break
            | StmtKind::Continue
            | StmtKind::Pragma(_) => Vec::new(),
        }
    }

    pub fn exprs_mut(&mut self) -> Vec<&mut TypedExpr> {
        match &mut self.kind {
            StmtKind::Assign { lhs, rhs } | StmtKind::AugAssign { lhs, rhs, .. } => vec![lhs, rhs],
            StmtKind::AliasAssign { rhs, .. } => vec![rhs],
            StmtKind::For(f) => vec![&mut f.start, &mut f.stop, &mut f.step],
            StmtKind::While { cond, .. } => vec![cond],
            StmtKind::If { branches, .. } => branches.iter_mut().map(|(c, _)| c).collect(),
            StmtKind::Expr(e) => vec![e],
            StmtKind::Print(items) => items.iter_mut().collect(),
            StmtKind::Return(_)
            | StmtKind::Allocate { .. }
            | StmtKind::Deallocate(_)
            | StmtKind::Pass
            | StmtKind::Break
            | StmtKind::Continue
            | StmtKind::Pragma(_) => Vec::new(),
        }
    }

    /// Nested statement lists
    pub fn bodies(&self) -> Vec<&Vec<TypedStmt>> {
        match &self.kind {
            StmtKind::For(f) => vec![&f.body],
            StmtKind::While { body, .. } => vec![body],
            StmtKind::If { branches, orelse } => {
                let mut v: Vec<&Vec<TypedStmt>> = branches.iter().map(|(_, b)| b).collect();
                v.push(orelse);
                v
            }
            _ => Vec::new(),
        }
    }

    pub fn bodies_mut(&mut self) -> Vec<&mut Vec<TypedStmt>> {
        match &mut self.kind {
            StmtKind::For(f) => vec![&mut f.body],
            StmtKind::While { body, .. } => vec![body],
            StmtKind::If { branches, orelse } => {
                let mut v: Vec<&mut Vec<TypedStmt>> = branches.iter_mut().map(|(_, b)| b).collect();
                v.push(orelse);
                v
            }
            _ => Vec::new(),
        }
    }

    /// Nodes of one of `kinds` in this statement and every nested body
    pub fn attribute_nodes<'a>(&'a self, kinds: &[NodeKind], excluded: &[NodeKind]) -> Vec<&'a TypedExpr> {
        let mut found: Vec<&TypedExpr> = self
            .exprs()
            .into_iter()
            .flat_map(|e| e.attribute_nodes(kinds, excluded))
            .collect();
        for body in self.bodies() {
            for stmt in body {
                found.extend(stmt.attribute_nodes(kinds, excluded));
            }
        }
        found
    }

    /// Substitute inside this statement and every nested body
    pub fn substitute(&mut self, old: &[TypedExpr], new: &[TypedExpr], excluded: &[NodeKind]) {
        for e in self.exprs_mut() {
            e.substitute(old, new, excluded);
        }
        for body in self.bodies_mut() {
            for stmt in body.iter_mut() {
                stmt.substitute(old, new, excluded);
            }
        }
    }

    /// Names of the variables this statement writes to
    pub fn written_names(&self) -> Vec<String> {
        let mut names = match &self.kind {
            StmtKind::Assign { lhs, .. } | StmtKind::AugAssign { lhs, .. } => lhs
                .attribute_nodes(&[NodeKind::Variable, NodeKind::Indexed], &[])
                .into_iter()
                .filter_map(|e| match e {
                    TypedExpr::Var(v) => Some(v.name.clone()),
                    TypedExpr::Indexed(i) => Some(i.base.name.clone()),
                    _ => None,
                })
                .take(if matches!(lhs, TypedExpr::Tuple(_)) { usize::MAX } else { 1 })
                .collect(),
            StmtKind::AliasAssign { lhs, .. } => vec![lhs.name.clone()],
            StmtKind::For(f) => vec![f.index.name.clone()],
            StmtKind::Allocate { var, .. } | StmtKind::Deallocate(var) => vec![var.name.clone()],
            _ => Vec::new(),
        };
        for body in self.bodies() {
            for stmt in body {
                names.extend(stmt.written_names());
            }
        }
        names
    }
}

/// Capability flags set by decorators
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionFlags {
    pub is_pure: bool,
    pub is_elemental: bool,
    pub is_private: bool,
    pub is_inline: bool,
    /// Overload generated for one `@types` header of an interface
    pub is_interface_member: bool,
}

/// A parameter; `default` holds the value of a valued argument or `Nil`
/// for an optional one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionArg {
    pub var: Variable,
    pub default: Option<TypedExpr>,
}

impl FunctionArg {
    pub fn required(var: Variable) -> Self {
        Self { var, default: None }
    }

    pub fn is_optional(&self) -> bool {
        matches!(self.default, Some(TypedExpr::Nil))
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }
}

/// What a call site needs to know about a function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSignature {
    pub name: String,
    pub args: Vec<FunctionArg>,
    pub results: Vec<Variable>,
    pub flags: FunctionFlags,
}

/// An annotated function definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub signature: FunctionSignature,
    /// Every other variable that needs a declaration, loop indices included
    pub locals: Vec<Variable>,
    pub body: Vec<TypedStmt>,
    pub doc: Option<String>,
    pub location: Option<Location>,
}

impl FunctionDef {
    pub fn name(&self) -> &str {
        &self.signature.name
    }

    pub fn args(&self) -> impl Iterator<Item = &Variable> {
        self.signature.args.iter().map(|a| &a.var)
    }

    pub fn results(&self) -> &[Variable] {
        &self.signature.results
    }

    pub fn is_public(&self) -> bool {
        !self.signature.flags.is_private
    }

    /// Look a name up among arguments, results and locals
    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.args()
            .chain(self.signature.results.iter())
            .chain(self.locals.iter())
            .find(|v| v.name == name)
    }
}

/// Overloads sharing one public name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interface {
    pub name: String,
    pub functions: Vec<FunctionDef>,
}

/// A module constant `NAME = literal`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constant {
    pub var: Variable,
    pub value: TypedExpr,
}

/// An annotated, expanded module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub constants: Vec<Constant>,
    pub functions: Vec<FunctionDef>,
    pub interfaces: Vec<Interface>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constants: Vec::new(),
            functions: Vec::new(),
            interfaces: Vec::new(),
        }
    }

    /// Free functions and interface members alike
    pub fn all_functions(&self) -> impl Iterator<Item = &FunctionDef> {
        self.functions
            .iter()
            .chain(self.interfaces.iter().flat_map(|i| i.functions.iter()))
    }

    pub fn function(&self, name: &str) -> Option<&FunctionDef> {
        self.all_functions().find(|f| f.name() == name)
    }

    pub fn interface(&self, name: &str) -> Option<&Interface> {
        self.interfaces.iter().find(|i| i.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Dim, Index, IndexedElement};
    use crate::types::DataType;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_written_names_in_nested_loops() {
        let a = Variable::new("a", DataType::Real, 8).with_shape(1, vec![Dim::Lit(3)], None);
        let i = Variable::index("i");
        let elem = TypedExpr::Indexed(IndexedElement::new(a, vec![Index::Elem(TypedExpr::Var(i.clone()))]).unwrap());
        let body = vec![TypedStmt::assign(elem, TypedExpr::int(0), None)];
        let stmt = TypedStmt::new(StmtKind::For(ForLoop::over(i, TypedExpr::int(3), body)), None);
        assert_eq!(stmt.written_names(), vec!["i".to_string(), "a".to_string()]);
    }

    #[test]
    fn test_optional_argument() {
        let arg = FunctionArg { var: Variable::new("x", DataType::Integer, 8), default: Some(TypedExpr::Nil) };
        assert!(arg.is_optional());
        assert!(!FunctionArg::required(Variable::new("y", DataType::Integer, 8)).is_optional());
    }
}
