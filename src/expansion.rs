//! Array-loop expansion
//!
//! Rewrites elementwise array statements into explicit index loops when
//! the target cannot compute them as one vector operation. Axes are indexed
//! from the innermost outward and indexing stops as soon as the statement
//! becomes computable, so a Fortran statement mixing memory orders gets only
//! the loops it needs while a C statement is indexed down to scalars.
//!
//! Consecutive statements looping over the same lengths share their loops
//! unless one of them reads what another writes in a way that is not
//! element-for-element (broadcasts, subscripts, reductions, calls).
//!
//! Loop indices come from one pool per function, named by nesting depth
//! (`i_0` outermost), so statements with matching shapes reuse them.

use std::collections::HashSet;

use tracing::{debug, instrument, trace};

use crate::ast::{
    dims_compatible, BinaryOp, Dim, ForLoop, FunctionDef, Index, IndexedElement, Module, Operator, Slice, StmtKind,
    TypedExpr, TypedStmt, Variable,
};
use crate::config::Language;
use crate::diagnostics::{Diagnostic, Diagnostics, Stage};
use crate::error::{CompileError, CompileResult};

/// Expand every function of a module in place
#[instrument(skip_all, fields(module = %module.name, language = %language))]
pub fn expand_module(module: &mut Module, language: Language, diagnostics: &mut Diagnostics) -> CompileResult<()> {
    let interface_members = module.interfaces.iter_mut().flat_map(|i| i.functions.iter_mut());
    for function in module.functions.iter_mut().chain(interface_members) {
        expand_function(function, language, diagnostics)?;
    }
    Ok(())
}

pub fn expand_function(function: &mut FunctionDef, language: Language, diagnostics: &mut Diagnostics) -> CompileResult<()> {
    let reserved = function
        .args()
        .chain(function.results())
        .chain(&function.locals)
        .map(|v| v.name.clone())
        .collect();
    let mut expander = Expander { language, diagnostics, function: function.name().to_string(), reserved, pool: Vec::new() };
    let body = std::mem::take(&mut function.body);
    function.body = expander.expand_block(body)?;
    debug!(function = %function.name(), indices = expander.pool.len(), "expanded function");
    function.locals.extend(expander.pool);
    Ok(())
}

/// Index the last free axis of every array operand of `expr` with `index`.
/// Operands whose axis has length one are indexed at zero instead.
pub fn insert_index(expr: &TypedExpr, index: &TypedExpr) -> CompileResult<TypedExpr> {
    let mut indexed = expr.clone();
    index_last_axis(&mut indexed, index)?;
    Ok(indexed)
}

fn index_last_axis(expr: &mut TypedExpr, index: &TypedExpr) -> CompileResult<()> {
    if expr.rank() == 0 {
        return Ok(());
    }
    match expr {
        TypedExpr::Var(v) => {
            let last = v.rank - 1;
            let element = if v.shape.get(last).is_some_and(Dim::is_one) { TypedExpr::int(0) } else { index.clone() };
            let mut indices: Vec<Index> = (0..last).map(|_| Index::Slice(Slice::full())).collect();
            indices.push(Index::Elem(element));
            *expr = TypedExpr::Indexed(IndexedElement::new(v.clone(), indices)?);
            Ok(())
        }
        TypedExpr::Indexed(ie) => {
            let mut indices = ie.full_indices();
            let Some(position) = indices.iter().rposition(|i| matches!(i, Index::Slice(_))) else {
                return Ok(());
            };
            if let Index::Slice(slice) = &indices[position] {
                let axis = ie.base.shape.get(position).cloned().unwrap_or(Dim::Lit(1));
                let element = if slice.length(&axis).is_one() { TypedExpr::int(0) } else { index.clone() };
                indices[position] = Index::Elem(slice_element(slice, &axis, element)?);
            }
            *expr = TypedExpr::Indexed(IndexedElement::new(ie.base.clone(), indices)?);
            Ok(())
        }
        TypedExpr::Numpy(f) if !f.is_elemental() => Err(CompileError::restriction(
            format!("elementwise use of the array result of {}()", f.name()),
            "loop expansion",
        )),
        TypedExpr::Call(c) if !c.is_elemental() => Err(CompileError::restriction(
            format!("elementwise use of the array result of {}()", c.callee.name),
            "loop expansion",
        )),
        _ => {
            for child in expr.children_mut() {
                index_last_axis(child, index)?;
            }
            Ok(())
        }
    }
}

/// Position selected by `index` within `slice` of an axis of length `axis`
fn slice_element(slice: &Slice, axis: &Dim, index: TypedExpr) -> CompileResult<TypedExpr> {
    let step = slice.step.as_deref();
    let negative = matches!(step, Some(TypedExpr::Literal(l)) if l.as_int().is_some_and(|s| s < 0));
    let start = match slice.start.as_deref() {
        Some(start) => Some(start.clone()),
        None if negative => Some(TypedExpr::Binary(BinaryOp::new(
            Operator::Sub,
            TypedExpr::Size(axis.clone()),
            TypedExpr::int(1),
        )?)),
        None => None,
    };
    if index == TypedExpr::int(0) {
        return Ok(start.unwrap_or_else(|| TypedExpr::int(0)));
    }
    let scaled = match step {
        None => index,
        Some(s) if *s == TypedExpr::int(1) => index,
        Some(s) => TypedExpr::Binary(BinaryOp::new(Operator::Mul, index, s.clone())?),
    };
    match start {
        None => Ok(scaled),
        Some(s) if s == TypedExpr::int(0) => Ok(scaled),
        Some(s) => Ok(TypedExpr::Binary(BinaryOp::new(Operator::Add, s, scaled)?)),
    }
}

/// Operands whose shapes decide whether a statement is computable as is
fn array_operands<'a>(expr: &'a TypedExpr, operands: &mut Vec<&'a TypedExpr>) {
    match expr {
        TypedExpr::Var(_) | TypedExpr::Indexed(_) => operands.push(expr),
        TypedExpr::Numpy(f) if !f.is_elemental() => operands.push(expr),
        TypedExpr::Call(c) if !c.is_elemental() => operands.push(expr),
        _ => expr.children().into_iter().for_each(|c| array_operands(c, operands)),
    }
}

fn sides(stmt: &TypedStmt) -> Option<(&TypedExpr, &TypedExpr)> {
    match &stmt.kind {
        StmtKind::Assign { lhs, rhs } | StmtKind::AugAssign { lhs, rhs, .. } => Some((lhs, rhs)),
        _ => None,
    }
}

fn sides_mut(stmt: &mut TypedStmt) -> Option<(&mut TypedExpr, &mut TypedExpr)> {
    match &mut stmt.kind {
        StmtKind::Assign { lhs, rhs } | StmtKind::AugAssign { lhs, rhs, .. } => Some((lhs, rhs)),
        _ => None,
    }
}

/// Whether the target can run the statement without further indexing
fn is_compatible(lhs: &TypedExpr, rhs: &TypedExpr, language: Language) -> bool {
    let mut operands = Vec::new();
    array_operands(lhs, &mut operands);
    array_operands(rhs, &mut operands);
    if operands.iter().all(|o| o.rank() == 0) {
        return true;
    }
    if !language.has_vectors() {
        return false;
    }
    let (rank, shape, order) = (lhs.rank(), lhs.shape(), lhs.order());
    operands.iter().filter(|o| o.rank() > 0).all(|o| {
        o.rank() == rank
            && o.shape().iter().zip(&shape).all(|(a, b)| dims_compatible(a, b))
            && (rank < 2 || o.order() == order)
    })
}

/// `(a, b) = (x, y)` becomes one assignment per element
fn split_tuples(stmt: TypedStmt) -> Vec<TypedStmt> {
    match stmt.kind {
        StmtKind::Assign { lhs: TypedExpr::Tuple(targets), rhs: TypedExpr::Tuple(values) }
            if targets.len() == values.len() =>
        {
            targets
                .into_iter()
                .zip(values)
                .flat_map(|(lhs, rhs)| split_tuples(TypedStmt::assign(lhs, rhs, stmt.location)))
                .collect()
        }
        kind => vec![TypedStmt::new(kind, stmt.location)],
    }
}

/// Variables a statement touches, sorted by how fusion has to treat them
#[derive(Debug, Default)]
struct Dependencies {
    writes: HashSet<String>,
    /// Written through a subscript other than `:`
    sliced_writes: HashSet<String>,
    reads: HashSet<String>,
    /// Read other than element for element
    strict_reads: HashSet<String>,
}

impl Dependencies {
    fn of(stmt: &TypedStmt) -> Self {
        let mut deps = Dependencies::default();
        let Some((lhs, rhs)) = sides(stmt) else {
            return deps;
        };
        match lhs {
            TypedExpr::Var(v) => {
                deps.writes.insert(v.name.clone());
            }
            TypedExpr::Indexed(ie) => {
                deps.writes.insert(ie.base.name.clone());
                if ie.indices.iter().any(|i| !matches!(i, Index::Slice(s) if s.is_full())) {
                    deps.sliced_writes.insert(ie.base.name.clone());
                }
                for index in lhs.children() {
                    deps.reads.extend(index.variable_names());
                }
            }
            _ => {}
        }
        deps.reads.extend(rhs.variable_names());
        strict_reads(rhs, lhs.rank(), &mut deps.strict_reads);
        deps
    }

    fn conflicts(&self, other: &Dependencies) -> bool {
        let touches = |names: &HashSet<String>, deps: &Dependencies| {
            names.iter().any(|n| deps.reads.contains(n) || deps.writes.contains(n))
        };
        !self.writes.is_disjoint(&other.strict_reads)
            || !other.writes.is_disjoint(&self.strict_reads)
            || touches(&self.sliced_writes, other)
            || touches(&other.sliced_writes, self)
    }

    fn merge(&mut self, other: Dependencies) {
        self.writes.extend(other.writes);
        self.sliced_writes.extend(other.sliced_writes);
        self.reads.extend(other.reads);
        self.strict_reads.extend(other.strict_reads);
    }
}

fn strict_reads(expr: &TypedExpr, lhs_rank: usize, names: &mut HashSet<String>) {
    match expr {
        TypedExpr::Var(v) => {
            if v.rank > 0 && v.rank < lhs_rank {
                names.insert(v.name.clone());
            }
        }
        TypedExpr::Indexed(ie) => {
            let partial = ie.indices.iter().any(|i| !matches!(i, Index::Slice(s) if s.is_full()));
            if partial || ie.rank() < lhs_rank {
                names.insert(ie.base.name.clone());
            }
            expr.children().into_iter().for_each(|c| strict_reads(c, lhs_rank, names));
        }
        TypedExpr::Numpy(f) if !f.is_elemental() => names.extend(expr.variable_names()),
        TypedExpr::Call(c) if !c.is_elemental() => names.extend(expr.variable_names()),
        _ => expr.children().into_iter().for_each(|c| strict_reads(c, lhs_rank, names)),
    }
}

enum LoopItem {
    Stmt(TypedStmt),
    Loop(LoopBlock),
}

struct LoopBlock {
    index: Variable,
    length: Dim,
    body: Vec<LoopItem>,
}

impl LoopBlock {
    /// Chain of nested loops around one statement
    fn around(loops: &[(Variable, Dim)], stmt: TypedStmt) -> Option<Self> {
        let ((index, length), rest) = loops.split_first()?;
        let body = match LoopBlock::around(rest, stmt.clone()) {
            Some(inner) => LoopItem::Loop(inner),
            None => LoopItem::Stmt(stmt),
        };
        Some(LoopBlock { index: index.clone(), length: length.clone(), body: vec![body] })
    }

    /// Place `stmt` inside this block, reusing the innermost open loops
    /// whose lengths match `loops` (this block matching `loops[0]`)
    fn insert(&mut self, loops: &[(Variable, Dim)], stmt: TypedStmt) {
        let rest = &loops[1..];
        let Some((_, length)) = rest.first() else {
            self.body.push(LoopItem::Stmt(stmt));
            return;
        };
        if let Some(LoopItem::Loop(inner)) = self.body.last_mut() {
            if inner.length == *length {
                inner.insert(rest, stmt);
                return;
            }
        }
        if let Some(chain) = LoopBlock::around(rest, stmt) {
            self.body.push(LoopItem::Loop(chain));
        }
    }

    fn into_stmt(self) -> TypedStmt {
        let body = self
            .body
            .into_iter()
            .map(|item| match item {
                LoopItem::Stmt(s) => s,
                LoopItem::Loop(l) => l.into_stmt(),
            })
            .collect::<Vec<_>>();
        let location = body.first().and_then(|s| s.location);
        TypedStmt::new(StmtKind::For(ForLoop::over(self.index, TypedExpr::Size(self.length), body)), location)
    }
}

/// Loops being filled by consecutive statements
struct Group {
    root: LoopBlock,
    deps: Dependencies,
}

impl Group {
    fn accepts(&self, loops: &[(Variable, Dim)], deps: &Dependencies) -> bool {
        loops.first().is_some_and(|(_, length)| *length == self.root.length) && !self.deps.conflicts(deps)
    }
}

enum Expansion {
    Unchanged(TypedStmt),
    /// Indexed without any loop (axes of length one only)
    Rewritten(TypedStmt),
    Looped(Vec<(Variable, Dim)>, TypedStmt),
}

struct Expander<'d> {
    language: Language,
    diagnostics: &'d mut Diagnostics,
    function: String,
    reserved: HashSet<String>,
    pool: Vec<Variable>,
}

impl Expander<'_> {
    fn expand_block(&mut self, statements: Vec<TypedStmt>) -> CompileResult<Vec<TypedStmt>> {
        let mut out = Vec::with_capacity(statements.len());
        let mut group: Option<Group> = None;
        for mut stmt in statements {
            // Storage for an array the open nest does not touch can be set up before it
            if let (StmtKind::Allocate { var, .. }, Some(open)) = (&stmt.kind, group.as_ref()) {
                if !open.deps.reads.contains(&var.name) && !open.deps.writes.contains(&var.name) {
                    out.push(stmt);
                    continue;
                }
            }
            for body in stmt.bodies_mut() {
                let inner = std::mem::take(body);
                *body = self.expand_block(inner)?;
            }
            for single in split_tuples(stmt) {
                let deps = Dependencies::of(&single);
                let location = single.location;
                match self.expand_statement(single) {
                    Ok(Expansion::Looped(loops, indexed)) => match group.as_mut() {
                        Some(open) if open.accepts(&loops, &deps) => {
                            trace!(depth = loops.len(), "fusing with the open loop nest");
                            open.root.insert(&loops, indexed);
                            open.deps.merge(deps);
                        }
                        _ => {
                            out.extend(group.take().map(|g| g.root.into_stmt()));
                            group = LoopBlock::around(&loops, indexed).map(|root| Group { root, deps });
                        }
                    },
                    Ok(Expansion::Rewritten(s) | Expansion::Unchanged(s)) => {
                        out.extend(group.take().map(|g| g.root.into_stmt()));
                        out.push(s);
                    }
                    Err((err, original)) => {
                        if !matches!(err, CompileError::Restriction { .. }) {
                            return Err(self.diagnostics.fatal_from(Stage::Semantic, err, location));
                        }
                        self.diagnostics.report(
                            Diagnostic::error(Stage::Semantic, err.to_string())
                                .with_symbol(self.function.clone())
                                .at(location),
                        )?;
                        out.extend(group.take().map(|g| g.root.into_stmt()));
                        out.push(original);
                    }
                }
            }
        }
        out.extend(group.take().map(|g| g.root.into_stmt()));
        Ok(out)
    }

    /// Loop index of nesting depth `depth`
    fn pool_index(&mut self, depth: usize) -> Variable {
        while self.pool.len() <= depth {
            let d = self.pool.len();
            let name = (0..)
                .map(|k| if k == 0 { format!("i_{}", d) } else { format!("i_{}_{}", d, k) })
                .find(|n| !self.reserved.contains(n))
                .unwrap_or_else(|| format!("i_{}", d));
            self.reserved.insert(name.clone());
            self.pool.push(Variable::index(name));
        }
        self.pool[depth].clone()
    }

    fn expand_statement(&mut self, stmt: TypedStmt) -> Result<Expansion, (CompileError, TypedStmt)> {
        let Some((lhs, rhs)) = sides(&stmt) else {
            return Ok(Expansion::Unchanged(stmt));
        };
        let opaque_root = matches!(stmt.kind, StmtKind::Assign { .. })
            && match rhs {
                TypedExpr::Numpy(f) => !f.is_elemental(),
                TypedExpr::Call(c) => !c.is_elemental(),
                _ => false,
            };
        if opaque_root || matches!(lhs, TypedExpr::Tuple(_)) || is_compatible(lhs, rhs, self.language) {
            return Ok(Expansion::Unchanged(stmt));
        }

        let mut indexed = stmt.clone();
        let mut placeholders = Vec::new();
        let mut lengths = Vec::new();
        loop {
            let Some((lhs, rhs)) = sides_mut(&mut indexed) else {
                return Ok(Expansion::Unchanged(stmt));
            };
            if is_compatible(lhs, rhs, self.language) {
                break;
            }
            let Some(length) = lhs.shape().last().map(Dim::simplify) else {
                let err = CompileError::restriction(format!("computing '{}' elementwise", rhs), self.language);
                return Err((err, stmt));
            };
            let index = if length.is_one() {
                TypedExpr::int(0)
            } else {
                let placeholder = TypedExpr::Var(Variable::index(format!("__axis{}", placeholders.len())));
                placeholders.push(placeholder.clone());
                lengths.push(length);
                placeholder
            };
            if let Err(err) = index_last_axis(lhs, &index).and_then(|_| index_last_axis(rhs, &index)) {
                return Err((err, stmt));
            }
        }

        if placeholders.is_empty() {
            return Ok(Expansion::Rewritten(indexed));
        }
        // Placeholders were created innermost first
        let depth = placeholders.len();
        let loops: Vec<(Variable, Dim)> = (0..depth)
            .map(|d| (self.pool_index(d), lengths[depth - 1 - d].clone()))
            .collect();
        let indices: Vec<TypedExpr> = (0..depth).map(|k| TypedExpr::Var(loops[depth - 1 - k].0.clone())).collect();
        indexed.substitute(&placeholders, &indices, &[]);
        debug!(function = %self.function, depth, "expanded statement into loops");
        Ok(Expansion::Looped(loops, indexed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerConfig;
    use crate::semantic::annotate_source;
    use crate::types::DataType;
    use pretty_assertions::assert_eq;

    fn expanded(source: &str, language: Language) -> FunctionDef {
        let mut diagnostics = Diagnostics::new();
        let mut module = annotate_source(source, &CompilerConfig::new(language), &mut diagnostics).unwrap();
        expand_module(&mut module, language, &mut diagnostics).unwrap();
        module.functions.remove(0)
    }

    fn loops(body: &[TypedStmt]) -> Vec<&ForLoop> {
        body.iter()
            .filter_map(|s| match &s.kind {
                StmtKind::For(l) => Some(l),
                _ => None,
            })
            .collect()
    }

    const ADD_ONE: &str = "from numpy import zeros\ndef f():\n    a = zeros(shape=(3, 4))\n    b = a + 1\n";

    #[test]
    fn test_two_loops_without_vector_operations() {
        let f = expanded(ADD_ONE, Language::C);
        let outer = loops(&f.body);
        assert_eq!(outer.len(), 1);
        assert_eq!(outer[0].stop, TypedExpr::Size(Dim::Lit(3)));
        assert_eq!(outer[0].index.name, "i_0");
        let inner = loops(&outer[0].body);
        assert_eq!(inner.len(), 1);
        assert_eq!(inner[0].stop, TypedExpr::Size(Dim::Lit(4)));
        assert_eq!(inner[0].body.len(), 1);
        let StmtKind::Assign { lhs, rhs } = &inner[0].body[0].kind else {
            panic!("Expected the elementwise assignment");
        };
        assert_eq!(lhs.to_string(), "b[i_0, i_1]");
        assert_eq!(rhs.to_string(), "a[i_0, i_1] + 1");
        assert!(f.locals.iter().any(|v| v.name == "i_1" && v.dtype == DataType::Integer));
    }

    #[test]
    fn test_no_loops_with_vector_operations() {
        let f = expanded(ADD_ONE, Language::Fortran);
        assert!(loops(&f.body).is_empty());
    }

    #[test]
    fn test_expansion_is_idempotent() {
        let mut f = expanded(ADD_ONE, Language::C);
        let before = f.body.clone();
        expand_function(&mut f, Language::C, &mut Diagnostics::new()).unwrap();
        assert_eq!(f.body, before);
        assert_eq!(f.locals.iter().filter(|v| v.name.starts_with("i_")).count(), 2);
    }

    #[test]
    fn test_unit_axis_collapses_to_zero() {
        let f = expanded("from numpy import zeros\ndef f():\n    a = zeros((3, 1))\n    b = a * 2.0\n", Language::C);
        let outer = loops(&f.body);
        assert_eq!(outer.len(), 1);
        assert!(loops(&outer[0].body).is_empty());
        let StmtKind::Assign { lhs, .. } = &outer[0].body[0].kind else {
            panic!("Expected an assignment");
        };
        assert_eq!(lhs.to_string(), "b[i_0, 0]");
    }

    #[test]
    fn test_matching_statements_share_loops() {
        let source = "from numpy import ones\ndef f(n: int):\n    a = ones(n)\n    b = a + 1.0\n    c = b * a\n";
        let f = expanded(source, Language::C);
        let nests = loops(&f.body);
        assert_eq!(nests.len(), 1);
        assert_eq!(nests[0].body.len(), 2);
    }

    #[test]
    fn test_broadcast_read_blocks_fusion() {
        let source = "from numpy import ones\ndef f():\n    a = ones((3, 4))\n    b = a + 1.0\n    c = a + b[0]\n";
        let f = expanded(source, Language::C);
        assert_eq!(loops(&f.body).len(), 2);
    }

    #[test]
    fn test_mixed_orders_loop_once_in_fortran() {
        let source = "def f(a: 'float[:,:]', b: 'float[:,:](order=F)'):\n    b[:, :] = a\n";
        let f = expanded(source, Language::Fortran);
        let nests = loops(&f.body);
        assert_eq!(nests.len(), 1);
        assert!(loops(&nests[0].body).is_empty());
    }

    #[test]
    fn test_insert_index_into_slice() {
        let a = Variable::new("a", DataType::Real, 8).with_shape(1, vec![Dim::Lit(10)], None);
        let slice = Slice::new(Some(TypedExpr::int(2)), None, None).unwrap();
        let view = TypedExpr::Indexed(IndexedElement::new(a, vec![Index::Slice(slice)]).unwrap());
        let i = TypedExpr::Var(Variable::index("i"));
        assert_eq!(insert_index(&view, &i).unwrap().to_string(), "a[2 + i]");
    }

    const SQUARE: &str = "@elemental\ndef sq(x: float) -> float:\n    return x * x\n\n\
                          def f(a: 'float[:]'):\n    b = sq(a)\n";

    fn expanded_named(source: &str, language: Language, name: &str) -> FunctionDef {
        let mut diagnostics = Diagnostics::new();
        let mut module = annotate_source(source, &CompilerConfig::new(language), &mut diagnostics).unwrap();
        expand_module(&mut module, language, &mut diagnostics).unwrap();
        module.function(name).cloned().unwrap()
    }

    #[test]
    fn test_elemental_call_is_indexed_per_element() {
        let f = expanded_named(SQUARE, Language::C, "f");
        let nests = loops(&f.body);
        assert_eq!(nests.len(), 1);
        let StmtKind::Assign { lhs, rhs } = &nests[0].body[0].kind else {
            panic!("Expected the elementwise call");
        };
        assert_eq!(lhs.to_string(), "b[i_0]");
        assert_eq!(rhs.to_string(), "sq(a[i_0])");

        let f = expanded_named(SQUARE, Language::Fortran, "f");
        assert!(loops(&f.body).is_empty());
    }

    #[test]
    fn test_scalar_call_arguments_stay_whole() {
        let source = "def total(x: 'float[:]') -> float:\n    s = 0.0\n    for i in range(len(x)):\n        s += x[i]\n    return s\n\n\
                      def f(a: 'float[:]'):\n    b = a * total(a)\n";
        let f = expanded_named(source, Language::C, "f");
        let nests = loops(&f.body);
        assert_eq!(nests.len(), 1);
        let StmtKind::Assign { rhs, .. } = &nests[0].body[0].kind else {
            panic!("Expected the elementwise assignment");
        };
        assert_eq!(rhs.to_string(), "a[i_0] * total(a)");
    }

    #[test]
    fn test_array_call_result_cannot_be_indexed() {
        let source = "def twice(x: 'float[:]'):\n    y = x * 2.0\n    return y\n\n\
                      def f(a: 'float[:]'):\n    b = twice(a) + 1.0\n";
        let mut diagnostics = Diagnostics::new();
        let module = annotate_source(source, &CompilerConfig::default(), &mut diagnostics).unwrap();
        let f = module.function("f").unwrap();
        let rhs = f
            .body
            .iter()
            .find_map(|s| match &s.kind {
                StmtKind::Assign { rhs, .. } if rhs.rank() > 0 => Some(rhs),
                _ => None,
            })
            .unwrap();
        let err = insert_index(rhs, &TypedExpr::Var(Variable::index("i_0"))).unwrap_err();
        assert!(matches!(err, CompileError::Restriction { .. }));
    }
}
