//! Typing of statements
//!
//! Assignments freeze the type of a name on first use. Arrays get an
//! explicit `Allocate` before their first value, views become
//! `AliasAssign`s, and reassigning an array with another shape of the same
//! rank reallocates it with a warning. Array temporaries are hoisted out of
//! nested expressions the target cannot print in place; without vector
//! operations that leaves every expression computable one element at a time.

use tracing::{debug, trace};

use super::Annotator;
use super::Symbol;
use crate::ast::syntax::{Expr, Statement, StatementKind};
use crate::ast::{
    dims_compatible, ArrayLiteral, BinaryOp, Dim, ForLoop, FunctionCall, Index, IndexedElement, NumpyFunction, Operator,
    Slice, StmtKind, TypedExpr, TypedStmt, Variable,
};
use crate::config::Language;
use crate::diagnostics::Location;
use crate::error::{CompileError, CompileResult};
use crate::types::{resolve_precision, type_name, DataType};

use super::expressions::is_integer_scalar;
use super::result_variable;

fn shape_text(shape: &[Dim]) -> String {
    let dims: Vec<String> = shape.iter().map(Dim::to_string).collect();
    format!("({})", dims.join(", "))
}

/// Arrays read through another name rather than copied
fn is_view(e: &TypedExpr) -> bool {
    match e {
        TypedExpr::Var(v) => v.rank > 0,
        TypedExpr::Indexed(i) => i.rank() > 0,
        _ => false,
    }
}

/// Array results of non-elemental calls are allocated by the callee
fn is_call_result(e: &TypedExpr) -> bool {
    matches!(e, TypedExpr::Call(c) if !c.is_elemental() && e.rank() > 0)
}

/// Nodes that cannot be printed inside a larger expression. Without vector
/// operations that is anything not computed elementwise; Fortran only lacks
/// expression forms for array constructors, `diag` and `cross`.
fn needs_hoisting(e: &TypedExpr, language: Language) -> bool {
    match e {
        TypedExpr::Numpy(f) if language.has_vectors() => {
            f.is_creation() || matches!(f, NumpyFunction::Diag(_) | NumpyFunction::Cross(..))
        }
        TypedExpr::Numpy(f) => !f.is_elemental(),
        TypedExpr::Call(c) => !language.has_vectors() && !c.is_elemental() && e.rank() > 0,
        _ => false,
    }
}

/// Deepest expression below `e` that must be stored in a temporary first
fn find_hoistable(e: &TypedExpr, is_root: bool, language: Language) -> Option<TypedExpr> {
    for child in e.children() {
        if let Some(found) = find_hoistable(child, false, language) {
            return Some(found);
        }
    }
    if let TypedExpr::Call(call) = e {
        if !call.is_elemental() && !language.has_vectors() {
            let computed = call
                .args
                .iter()
                .find(|a| a.rank() > 0 && !matches!(a, TypedExpr::Var(_) | TypedExpr::Indexed(_)));
            if let Some(arg) = computed {
                return Some(arg.clone());
            }
        }
    }
    (!is_root && needs_hoisting(e, language)).then(|| e.clone())
}

fn hoist_candidate(stmt: &TypedStmt, language: Language) -> Option<TypedExpr> {
    let root = match &stmt.kind {
        StmtKind::Assign { lhs, rhs } if matches!(lhs, TypedExpr::Var(_) | TypedExpr::Tuple(_)) || rhs.rank() == 0 => {
            Some(rhs)
        }
        StmtKind::Expr(e) => Some(e),
        _ => None,
    };
    stmt.exprs()
        .into_iter()
        .find_map(|e| find_hoistable(e, root.is_some_and(|r| std::ptr::eq(r, e)), language))
}

/// Name a target expression writes to
fn target_name(target: &Expr) -> Option<&str> {
    match target {
        Expr::Name(name) => Some(name),
        Expr::Subscript { value, .. } => target_name(value),
        _ => None,
    }
}

impl Annotator<'_> {
    /// Annotate a statement list, recording recoverable errors and dropping
    /// the statements that caused them
    pub(crate) fn annotate_block(&mut self, body: &[Statement]) -> CompileResult<Vec<TypedStmt>> {
        let mut block = Vec::new();
        let mut pragmas = Vec::new();
        for stmt in body {
            let location = Some(stmt.location);
            if let StatementKind::Pragma(text) = &stmt.kind {
                pragmas.push(text.clone());
                continue;
            }
            let attached = std::mem::take(&mut pragmas);
            match self.annotate_statement(stmt).and_then(|typed| self.hoist_nested(typed)) {
                Ok(mut typed) => {
                    match typed.last_mut() {
                        Some(TypedStmt { kind: StmtKind::For(l), .. }) => l.pragmas.extend(attached),
                        _ => block.extend(attached.into_iter().map(|p| TypedStmt::new(StmtKind::Pragma(p), location))),
                    }
                    block.extend(typed);
                }
                Err(CompileError::UndefinedSymbol { name }) if self.is_rejected(&name) => {
                    debug!(symbol = %name, "dropping a statement reading a rejected name");
                    self.declare_rejected(stmt, location);
                }
                Err(err) => {
                    self.recover(err, location)?;
                    self.declare_rejected(stmt, location);
                }
            }
        }
        block.extend(pragmas.into_iter().map(|p| TypedStmt::new(StmtKind::Pragma(p), None)));
        Ok(block)
    }

    fn is_rejected(&self, name: &str) -> bool {
        self.function.as_ref().is_some_and(|f| f.rejected.contains(name))
    }

    /// Give the names a rejected assignment would have introduced the type of
    /// its value, so later statements are still checked. Names whose value
    /// has no type either are remembered and their uses dropped silently.
    fn declare_rejected(&mut self, stmt: &Statement, location: Option<Location>) {
        let Some(context) = self.function.as_mut() else {
            return;
        };
        context.recovered = true;
        let StatementKind::Assign { target, value } = &stmt.kind else {
            return;
        };
        let names: Vec<&str> = match target {
            Expr::Name(name) => vec![name.as_str()],
            Expr::Tuple(targets) | Expr::List(targets) => targets.iter().filter_map(target_name).collect(),
            _ => Vec::new(),
        };
        let undeclared: Vec<&str> = names.into_iter().filter(|n| self.scopes.lookup(n).is_none()).collect();
        if undeclared.is_empty() {
            return;
        }
        let value = match (target, self.annotate_expr(value, location)) {
            (Expr::Name(_), Ok(value)) if self.check_value(undeclared[0], &value).is_ok() => Some(value),
            _ => None,
        };
        for name in undeclared {
            match &value {
                Some(value) => {
                    let dtype = value.dtype();
                    let precision = resolve_precision(&dtype, value.precision());
                    let shape = self.value_shape(name, value);
                    let var = Variable::new(name, dtype, precision).with_shape(value.rank(), shape, value.order());
                    debug!(symbol = name, "declared the target of a rejected assignment");
                    self.scopes.insert(name, Symbol::Variable(var));
                }
                None => {
                    if let Some(context) = self.function.as_mut() {
                        context.rejected.insert(name.to_string());
                    }
                }
            }
        }
    }

    fn annotate_statement(&mut self, stmt: &Statement) -> CompileResult<Vec<TypedStmt>> {
        let location = Some(stmt.location);
        let one = |kind| Ok(vec![TypedStmt::new(kind, location)]);
        match &stmt.kind {
            StatementKind::Expr(Expr::Call { func, args, kwargs }) if self.is_print(func) => {
                if !kwargs.is_empty() {
                    return Err(CompileError::restriction("keyword arguments of print", self.language));
                }
                let items = args
                    .iter()
                    .map(|a| self.annotate_expr(a, location))
                    .collect::<CompileResult<Vec<_>>>()?;
                one(StmtKind::Print(items))
            }
            StatementKind::Expr(Expr::Str(_)) => Ok(Vec::new()),
            StatementKind::Expr(e) => {
                let typed = self.annotate_expr(e, location)?;
                if !matches!(typed, TypedExpr::Call(_)) {
                    self.warn(format!("expression '{}' has no effect", typed), location)?;
                }
                one(StmtKind::Expr(typed))
            }
            StatementKind::Assign { target, value } => self.annotate_assign(target, value, location),
            StatementKind::AugAssign { target, op, value } => {
                self.annotate_aug_assign(target, *op, value, location).map(|s| vec![s])
            }
            StatementKind::Return(value) => self.annotate_return(value.as_ref(), location),
            StatementKind::If { branches, orelse } => {
                let mut typed = Vec::with_capacity(branches.len());
                for (cond, body) in branches {
                    let cond = self.condition(cond, location)?;
                    typed.push((cond, self.annotate_block(body)?));
                }
                let orelse = self.annotate_block(orelse)?;
                one(StmtKind::If { branches: typed, orelse })
            }
            StatementKind::For { target, iter, body } => self.annotate_for(target, iter, body, location),
            StatementKind::While { cond, body } => {
                let cond = self.condition(cond, location)?;
                let body = self.in_loop(|an| an.annotate_block(body))?;
                one(StmtKind::While { cond, body })
            }
            StatementKind::FunctionDef(def) => {
                Err(CompileError::restriction(format!("nested function '{}'", def.name), self.language))
            }
            StatementKind::Import { .. } | StatementKind::FromImport { .. } => {
                self.import(stmt)?;
                Ok(Vec::new())
            }
            StatementKind::Pass => one(StmtKind::Pass),
            StatementKind::Break | StatementKind::Continue if self.loop_depth() == 0 => {
                Err(CompileError::parse_error(stmt.location.line, "'break' or 'continue' outside of a loop"))
            }
            StatementKind::Break => one(StmtKind::Break),
            StatementKind::Continue => one(StmtKind::Continue),
            StatementKind::Pragma(text) => one(StmtKind::Pragma(text.clone())),
        }
    }

    fn is_print(&self, func: &Expr) -> bool {
        matches!(func, Expr::Name(n) if n == "print") && self.scopes.lookup("print").is_none()
    }

    fn condition(&mut self, cond: &Expr, location: Option<Location>) -> CompileResult<TypedExpr> {
        let cond = self.annotate_expr(cond, location)?;
        if cond.rank() != 0 || !cond.dtype().is_numeric() || matches!(cond, TypedExpr::Tuple(_)) {
            return Err(CompileError::type_error(format!("condition '{}' must be a scalar", cond)));
        }
        Ok(cond)
    }

    pub(crate) fn loop_depth(&self) -> usize {
        self.function.as_ref().map_or(0, |f| f.loop_depth)
    }

    /// Run `f` one loop level deeper
    fn in_loop<T>(&mut self, f: impl FnOnce(&mut Self) -> CompileResult<T>) -> CompileResult<T> {
        if let Some(context) = self.function.as_mut() {
            context.loop_depth += 1;
        }
        let result = f(self);
        if let Some(context) = self.function.as_mut() {
            context.loop_depth -= 1;
        }
        result
    }

    fn annotate_for(
        &mut self,
        target: &str,
        iter: &Expr,
        body: &[Statement],
        location: Option<Location>,
    ) -> CompileResult<Vec<TypedStmt>> {
        let range_args = match iter {
            Expr::Call { func, args, kwargs }
                if matches!(func.as_ref(), Expr::Name(n) if n == "range")
                    && self.scopes.lookup("range").is_none()
                    && kwargs.is_empty() =>
            {
                args
            }
            _ => return Err(CompileError::restriction("for loops over anything but range()", self.language)),
        };
        let bounds = range_args
            .iter()
            .map(|a| self.annotate_expr(a, location))
            .collect::<CompileResult<Vec<_>>>()?;
        if let Some(bad) = bounds.iter().find(|b| !is_integer_scalar(b)) {
            return Err(CompileError::type_error(format!("range() bound '{}' must be an integer scalar", bad)));
        }
        let mut bounds = bounds.into_iter();
        let (start, stop, step) = match range_args.len() {
            1 => (TypedExpr::int(0), bounds.next(), TypedExpr::int(1)),
            2 => (bounds.next().unwrap_or(TypedExpr::int(0)), bounds.next(), TypedExpr::int(1)),
            3 => {
                let start = bounds.next().unwrap_or(TypedExpr::int(0));
                let stop = bounds.next();
                (start, stop, bounds.next().unwrap_or(TypedExpr::int(1)))
            }
            n => {
                return Err(CompileError::specification(format!("range() takes 1 to 3 arguments, {} given", n)));
            }
        };
        let Some(stop) = stop else {
            return Err(CompileError::specification("range() needs a stop value"));
        };
        if step == TypedExpr::int(0) {
            return Err(CompileError::type_error("range() step must not be zero"));
        }

        let index = match self.scopes.lookup(target).cloned() {
            Some(Symbol::Variable(v)) if is_integer_scalar(&TypedExpr::Var(v.clone())) => v,
            Some(_) => {
                return Err(CompileError::type_error(format!("loop index '{}' must be an integer scalar", target)));
            }
            None => {
                let index = Variable::new(target, DataType::Integer, 8);
                self.scopes.insert(target, Symbol::Variable(index.clone()));
                index
            }
        };
        let body = self.in_loop(|an| an.annotate_block(body))?;
        trace!(index = %index.name, "annotated for loop");
        Ok(vec![TypedStmt::new(
            StmtKind::For(ForLoop { index, start, stop, step, body, pragmas: Vec::new() }),
            location,
        )])
    }

    fn annotate_assign(&mut self, target: &Expr, value: &Expr, location: Option<Location>) -> CompileResult<Vec<TypedStmt>> {
        match target {
            Expr::Tuple(targets) | Expr::List(targets) => self.assign_tuple(targets, value, location),
            Expr::Name(_) | Expr::Subscript { .. } => {
                let rhs = self.annotate_expr(value, location)?;
                self.assign_target(target, rhs, location)
            }
            Expr::Attribute { attr, .. } => {
                Err(CompileError::restriction(format!("assignment to attribute '{}'", attr), self.language))
            }
            other => Err(CompileError::parse_error(
                location.map_or(0, |l| l.line),
                format!("cannot assign to {:?}", other),
            )),
        }
    }

    fn assign_target(&mut self, target: &Expr, value: TypedExpr, location: Option<Location>) -> CompileResult<Vec<TypedStmt>> {
        match target {
            Expr::Name(name) => self.assign_to_name(name, value, location),
            Expr::Subscript { .. } => self.assign_to_subscript(target, value, location).map(|s| vec![s]),
            Expr::Tuple(targets) | Expr::List(targets) => match value {
                TypedExpr::Tuple(items) if items.len() == targets.len() => {
                    let mut out = Vec::new();
                    for (t, v) in targets.iter().zip(items) {
                        out.extend(self.assign_target(t, v, location)?);
                    }
                    Ok(out)
                }
                TypedExpr::Var(v) if v.rank == 1 && v.shape == [Dim::Lit(targets.len() as i64)] => {
                    let mut out = Vec::new();
                    for (k, t) in targets.iter().enumerate() {
                        let element = IndexedElement::new(v.clone(), vec![Index::Elem(TypedExpr::int(k as i64))])?;
                        out.extend(self.assign_target(t, TypedExpr::Indexed(element), location)?);
                    }
                    Ok(out)
                }
                other => Err(CompileError::type_error(format!(
                    "cannot unpack '{}' into {} targets",
                    other,
                    targets.len()
                ))),
            },
            _ => Err(CompileError::restriction("this assignment target", self.language)),
        }
    }

    /// `a, b = ...`
    fn assign_tuple(&mut self, targets: &[Expr], value: &Expr, location: Option<Location>) -> CompileResult<Vec<TypedStmt>> {
        let Expr::Tuple(values) = value else {
            return match self.annotate_expr(value, location)? {
                TypedExpr::Call(call) if call.callee.results.len() > 1 => self.assign_results(targets, call, location),
                other => {
                    let targets = Expr::Tuple(targets.to_vec());
                    self.assign_target(&targets, other, location)
                }
            };
        };
        if values.len() != targets.len() {
            return Err(CompileError::type_error(format!(
                "cannot unpack {} values into {} targets",
                values.len(),
                targets.len()
            )));
        }
        let typed = values
            .iter()
            .map(|v| self.annotate_expr(v, location))
            .collect::<CompileResult<Vec<_>>>()?;

        // Values reading a name written earlier in the tuple are saved first
        let written: Vec<Option<&str>> = targets.iter().map(target_name).collect();
        let mut out = Vec::new();
        let mut staged = Vec::with_capacity(typed.len());
        for (k, value) in typed.into_iter().enumerate() {
            let reads = value.variable_names();
            let clobbered = written[..k].iter().flatten().any(|w| reads.iter().any(|r| r.as_str() == *w));
            if !clobbered {
                staged.push(value);
                continue;
            }
            if value.rank() > 0 {
                return Err(CompileError::restriction("swapping arrays in a tuple assignment", self.language));
            }
            let name = self.fresh_name("Dummy");
            out.extend(self.assign_to_name(&name, value, location)?);
            let saved = self
                .scopes
                .variable(&name)
                .cloned()
                .ok_or_else(|| CompileError::undefined(name.clone()))?;
            staged.push(TypedExpr::Var(saved));
        }
        for (target, value) in targets.iter().zip(staged) {
            out.extend(self.assign_target(target, value, location)?);
        }
        Ok(out)
    }

    /// `a, b = f(x)` for a function with several results
    fn assign_results(&mut self, targets: &[Expr], call: FunctionCall, location: Option<Location>) -> CompileResult<Vec<TypedStmt>> {
        if targets.len() != call.callee.results.len() {
            return Err(CompileError::type_error(format!(
                "'{}' returns {} values, {} targets given",
                call.callee.name,
                call.callee.results.len(),
                targets.len()
            )));
        }
        let mut out = Vec::new();
        let mut lhs = Vec::new();
        for (k, (target, result)) in targets.iter().zip(&call.callee.results).enumerate() {
            let Expr::Name(name) = target else {
                return Err(CompileError::restriction("unpacking results into subscripts", self.language));
            };
            let shape: Vec<Dim> = call
                .result_shape(k)
                .into_iter()
                .enumerate()
                .map(|(axis, d)| d.unwrap_or_else(|| Dim::size_of(name.clone(), axis)))
                .collect();
            let var = match self.scopes.lookup(name).cloned() {
                None => {
                    let var = Variable::new(name.clone(), result.dtype.clone(), result.precision)
                        .with_shape(result.rank, shape, result.order);
                    self.scopes.insert(name.clone(), Symbol::Variable(var.clone()));
                    var
                }
                Some(Symbol::Variable(existing)) => {
                    let value = TypedExpr::Var(result.clone());
                    self.check_reassignment(&existing, &value)?;
                    if existing.is_heap_array() && self.is_allocated(name) {
                        out.push(TypedStmt::new(StmtKind::Deallocate(existing.clone()), location));
                    }
                    let mut updated = existing;
                    updated.shape = shape;
                    self.scopes.update_variable(updated.clone());
                    updated
                }
                Some(_) => return Err(CompileError::type_error(format!("cannot assign to '{}'", name))),
            };
            if var.is_heap_array() {
                self.mark_allocated(name);
            }
            lhs.push(TypedExpr::Var(var));
        }
        out.push(TypedStmt::assign(TypedExpr::Tuple(lhs), TypedExpr::Call(call), location));
        Ok(out)
    }

    fn check_value(&self, name: &str, value: &TypedExpr) -> CompileResult<()> {
        match value {
            TypedExpr::Nil => Err(CompileError::type_error(format!("cannot assign None to '{}'", name))),
            TypedExpr::Tuple(_) => Err(CompileError::type_error(format!("cannot store a tuple in '{}'", name))),
            TypedExpr::Call(c) if c.callee.results.is_empty() => {
                Err(CompileError::type_error(format!("'{}' does not return a value", c.callee.name)))
            }
            TypedExpr::Call(c) if c.callee.results.len() > 1 => Err(CompileError::type_error(format!(
                "'{}' returns {} values",
                c.callee.name,
                c.callee.results.len()
            ))),
            v if !v.dtype().is_numeric() => {
                Err(CompileError::restriction(format!("variables of type {}", v.dtype()), self.language))
            }
            _ => Ok(()),
        }
    }

    /// Shape of a variable holding `value`; sizes only known inside a callee
    /// become the runtime size of the variable itself
    fn value_shape(&self, name: &str, value: &TypedExpr) -> Vec<Dim> {
        let shape = match value {
            TypedExpr::Call(c) if !c.is_elemental() => c
                .result_shape(0)
                .into_iter()
                .enumerate()
                .map(|(axis, d)| d.unwrap_or_else(|| Dim::size_of(name, axis)))
                .collect(),
            other => other.shape(),
        };
        shape
            .into_iter()
            .enumerate()
            .map(|(axis, d)| {
                let known = d.variables().into_iter().all(|v| v == name || self.scopes.lookup(v).is_some());
                if known {
                    d.simplify()
                } else {
                    Dim::size_of(name, axis)
                }
            })
            .collect()
    }

    fn is_allocated(&self, name: &str) -> bool {
        self.function.as_ref().is_some_and(|f| f.allocated.contains(name))
    }

    fn mark_allocated(&mut self, name: &str) {
        if let Some(context) = self.function.as_mut() {
            context.allocated.insert(name.to_string());
        }
    }

    fn is_stack_array(&self, name: &str) -> bool {
        self.function.as_ref().is_some_and(|f| f.stack_arrays.iter().any(|s| s == name))
    }

    /// Allocation preceding the first value of `var`, when it needs one
    fn allocation(&self, var: &Variable, value: &TypedExpr, location: Option<Location>) -> Option<TypedStmt> {
        let self_sized = var.shape.iter().any(|d| d.variables().contains(&var.name.as_str()));
        (var.is_heap_array() && !is_call_result(value) && !self_sized).then(|| {
            TypedStmt::new(
                StmtKind::Allocate { var: var.clone(), reallocate: self.loop_depth() > 0 },
                location,
            )
        })
    }

    pub(crate) fn assign_to_name(&mut self, name: &str, value: TypedExpr, location: Option<Location>) -> CompileResult<Vec<TypedStmt>> {
        let value = match value {
            TypedExpr::Tuple(items) => self.tuple_array(name, items)?,
            other => other,
        };
        self.check_value(name, &value)?;
        self.scopes.record_usage(name, location);
        match self.scopes.lookup(name).cloned() {
            None => self.declare(name, value, location),
            Some(Symbol::Variable(existing)) => self.reassign(existing, value, location),
            Some(Symbol::Constant(..)) => Err(CompileError::type_error(format!("cannot assign to constant '{}'", name))),
            Some(_) => Err(CompileError::type_error(format!("cannot rebind '{}' to a value", name))),
        }
    }

    /// A homogeneous tuple is kept as a rank-1 array on the stack
    fn tuple_array(&mut self, name: &str, items: Vec<TypedExpr>) -> CompileResult<TypedExpr> {
        let Some(dtype) = items.first().map(TypedExpr::dtype) else {
            return Err(CompileError::type_error(format!("cannot store an empty tuple in '{}'", name)));
        };
        let homogeneous = items
            .iter()
            .all(|i| i.rank() == 0 && i.dtype() == dtype && !matches!(i, TypedExpr::Tuple(_) | TypedExpr::Nil));
        if !homogeneous || !dtype.is_numeric() {
            return Err(CompileError::restriction(format!("inhomogeneous tuple stored in '{}'", name), self.language));
        }
        let length = items.len();
        let literal = ArrayLiteral::new(items, vec![length], None, None)?;
        if let Some(context) = self.function.as_mut() {
            if !context.stack_arrays.iter().any(|s| s == name) {
                context.stack_arrays.push(name.to_string());
            }
        }
        Ok(TypedExpr::Numpy(NumpyFunction::Array(literal)))
    }

    fn declare(&mut self, name: &str, value: TypedExpr, location: Option<Location>) -> CompileResult<Vec<TypedStmt>> {
        let dtype = value.dtype();
        let precision = resolve_precision(&dtype, value.precision());
        let shape = self.value_shape(name, &value);
        let mut var = Variable::new(name, dtype, precision).with_shape(value.rank(), shape, value.order());

        if is_view(&value) {
            var.is_pointer = true;
            debug!(alias = name, target = %value, "declared array alias");
            self.scopes.insert(name, Symbol::Variable(var.clone()));
            return Ok(vec![TypedStmt::new(StmtKind::AliasAssign { lhs: var, rhs: value }, location)]);
        }
        var.is_stack_array = var.rank > 0 && self.is_stack_array(name);
        var.is_temp = name.starts_with("Dummy_");
        self.scopes.insert(name, Symbol::Variable(var.clone()));

        let mut out = Vec::new();
        if let Some(allocate) = self.allocation(&var, &value, location) {
            out.push(allocate);
        }
        if var.is_heap_array() {
            self.mark_allocated(name);
        }
        trace!(variable = name, dtype = %var.dtype, rank = var.rank, "declared variable");
        out.push(TypedStmt::assign(TypedExpr::Var(var), value, location));
        Ok(out)
    }

    /// Type rules for storing `value` into an existing variable
    fn check_reassignment(&self, existing: &Variable, value: &TypedExpr) -> CompileResult<()> {
        let name = &existing.name;
        if existing.is_const {
            return Err(CompileError::type_error(format!("cannot assign to constant '{}'", name)));
        }
        if value.rank() != existing.rank {
            return Err(CompileError::type_error(format!(
                "'{}' was declared with rank {}, cannot assign a value of rank {}",
                name,
                existing.rank,
                value.rank()
            )));
        }
        let (from, to) = (value.dtype(), &existing.dtype);
        if from.lattice_level() > to.lattice_level() {
            return Err(CompileError::type_error(format!(
                "cannot store a {} value in '{}' of type {}",
                from, name, to
            )));
        }
        if existing.rank > 0 {
            let same_precision =
                resolve_precision(&from, value.precision()) == resolve_precision(to, existing.precision);
            if from != *to || !same_precision {
                return Err(CompileError::type_error(format!(
                    "array '{}' of type {} cannot change its type to {}",
                    name,
                    type_name(to, existing.precision),
                    type_name(&from, value.precision())
                )));
            }
        }
        Ok(())
    }

    fn reassign(&mut self, existing: Variable, value: TypedExpr, location: Option<Location>) -> CompileResult<Vec<TypedStmt>> {
        self.check_reassignment(&existing, &value)?;
        let name = existing.name.clone();

        if existing.is_pointer {
            if !is_view(&value) {
                return Err(CompileError::type_error(format!(
                    "'{}' is an alias; assign to {}[:] to copy values into it",
                    name, name
                )));
            }
            return Ok(vec![TypedStmt::new(StmtKind::AliasAssign { lhs: existing, rhs: value }, location)]);
        }
        if existing.rank == 0 {
            return Ok(vec![TypedStmt::assign(TypedExpr::Var(existing), value, location)]);
        }
        if existing.is_argument {
            return Err(CompileError::type_error(format!(
                "cannot rebind array argument '{}'; assign to {}[:] instead",
                name, name
            )));
        }
        if is_view(&value) {
            return Err(CompileError::type_error(format!(
                "'{}' owns its storage and cannot become an alias of '{}'",
                name, value
            )));
        }

        let mut out = Vec::new();
        let mut var = existing.clone();
        let shape = self.value_shape(&name, &value);
        if is_call_result(&value) {
            if self.is_allocated(&name) && !value.variable_names().contains(&name) {
                out.push(TypedStmt::new(StmtKind::Deallocate(existing.clone()), location));
            }
            var.shape = shape;
        } else if shape != existing.shape {
            let provably_different = shape.iter().zip(&existing.shape).any(|(a, b)| !dims_compatible(a, b));
            if var.is_stack_array && provably_different {
                return Err(CompileError::type_error(format!(
                    "stack array '{}' of shape {} cannot be reallocated with shape {}",
                    name,
                    shape_text(&existing.shape),
                    shape_text(&shape)
                )));
            }
            if !var.is_stack_array {
                self.warn(
                    format!(
                        "array '{}' is reallocated from shape {} to {}",
                        name,
                        shape_text(&existing.shape),
                        shape_text(&shape)
                    ),
                    location,
                )?;
                var.shape = shape;
                out.push(TypedStmt::new(StmtKind::Allocate { var: var.clone(), reallocate: true }, location));
            }
        } else if !self.is_allocated(&name) {
            out.extend(self.allocation(&var, &value, location));
        }
        if var.is_heap_array() {
            self.mark_allocated(&name);
        }
        self.scopes.update_variable(var.clone());
        out.push(TypedStmt::assign(TypedExpr::Var(var), value, location));
        Ok(out)
    }

    fn assign_to_subscript(&mut self, target: &Expr, value: TypedExpr, location: Option<Location>) -> CompileResult<TypedStmt> {
        let lhs = self.annotate_expr(target, location)?;
        let TypedExpr::Indexed(indexed) = &lhs else {
            return Err(CompileError::type_error(format!("cannot assign to '{}'", lhs)));
        };
        let base = &indexed.base;
        if base.is_const {
            return Err(CompileError::type_error(format!("cannot assign to constant '{}'", base.name)));
        }
        if matches!(value, TypedExpr::Nil | TypedExpr::Tuple(_)) || !value.dtype().is_numeric() {
            return Err(CompileError::type_error(format!("cannot store '{}' in '{}'", value, lhs)));
        }
        let (target_shape, value_shape) = (lhs.shape(), value.shape());
        let skip = target_shape.len().saturating_sub(value_shape.len());
        let mismatch = value_shape.len() > target_shape.len()
            || target_shape[skip..].iter().zip(&value_shape).any(|(a, b)| !dims_compatible(a, b));
        if mismatch {
            return Err(CompileError::ShapeMismatch {
                expected: shape_text(&target_shape),
                got: shape_text(&value_shape),
            });
        }
        if value.dtype().lattice_level() > base.dtype.lattice_level() {
            return Err(CompileError::type_error(format!(
                "cannot store a {} value in '{}' of type {}",
                value.dtype(),
                base.name,
                base.dtype
            )));
        }
        Ok(TypedStmt::assign(lhs, value, location))
    }

    fn annotate_aug_assign(&mut self, target: &Expr, op: Operator, value: &Expr, location: Option<Location>) -> CompileResult<TypedStmt> {
        let rhs = self.annotate_expr(value, location)?;
        let lhs = self.annotate_expr(target, location)?;
        let base = match &lhs {
            TypedExpr::Var(v) => v,
            TypedExpr::Indexed(i) => &i.base,
            other => return Err(CompileError::type_error(format!("cannot assign to '{}'", other))),
        };
        if base.is_const {
            return Err(CompileError::type_error(format!("cannot assign to constant '{}'", base.name)));
        }
        let combined = BinaryOp::new(op, lhs.clone(), rhs.clone())?;
        if combined.result_dtype().lattice_level() > lhs.dtype().lattice_level() {
            return Err(CompileError::type_error(format!(
                "'{} {}= {}' would change the type of '{}' to {}",
                lhs,
                op,
                rhs,
                base.name,
                combined.result_dtype()
            )));
        }
        if rhs.rank() > lhs.rank() {
            return Err(CompileError::ShapeMismatch {
                expected: shape_text(&lhs.shape()),
                got: shape_text(&rhs.shape()),
            });
        }
        Ok(TypedStmt::new(StmtKind::AugAssign { lhs, op, rhs }, location))
    }

    fn annotate_return(&mut self, value: Option<&Expr>, location: Option<Location>) -> CompileResult<Vec<TypedStmt>> {
        let values = match value {
            None | Some(Expr::None) => Vec::new(),
            Some(Expr::Tuple(items)) => items
                .iter()
                .map(|i| self.annotate_expr(i, location))
                .collect::<CompileResult<Vec<_>>>()?,
            Some(e) => vec![self.annotate_expr(e, location)?],
        };
        if let [TypedExpr::Call(c)] = values.as_slice() {
            if c.callee.results.len() > 1 {
                return Err(CompileError::restriction("returning the results of a multi-result call", self.language));
            }
        }
        let Some(context) = self.function.as_ref() else {
            return Err(CompileError::restriction("return outside of a function", self.language));
        };
        let (function, declared, existing) =
            (context.name.clone(), context.declared_results.clone(), context.results.clone());

        let mut out = Vec::new();
        let results = match existing {
            Some(results) => {
                if results.len() != values.len() {
                    return Err(CompileError::type_error(format!(
                        "'{}' returns {} values here but {} elsewhere",
                        function,
                        values.len(),
                        results.len()
                    )));
                }
                for (result, value) in results.iter().zip(values) {
                    if matches!(&value, TypedExpr::Var(v) if v.name == result.name) {
                        continue;
                    }
                    let current = self.scopes.variable(&result.name).cloned().unwrap_or_else(|| result.clone());
                    out.extend(self.reassign(current, value, location)?);
                }
                results
            }
            None => {
                if let Some(declared) = &declared {
                    if declared.len() != values.len() {
                        return Err(CompileError::type_error(format!(
                            "'{}' declares {} results but returns {} values",
                            function,
                            declared.len(),
                            values.len()
                        )));
                    }
                }
                let mut results: Vec<Variable> = Vec::with_capacity(values.len());
                for (k, value) in values.into_iter().enumerate() {
                    self.check_value("the result", &value)?;
                    let spec = declared.as_ref().and_then(|d| d.get(k));
                    if let Some(spec) = spec {
                        let expected = result_variable("result", spec);
                        self.check_reassignment(&expected, &value)?;
                    }
                    if let TypedExpr::Var(v) = &value {
                        let reusable = !v.is_pointer
                            && !v.is_argument
                            && !v.is_stack_array
                            && !v.is_const
                            && !results.iter().any(|r| r.name == v.name)
                            && spec.map_or(true, |s| {
                                let declared = result_variable(&v.name, s);
                                declared.dtype == v.dtype
                                    && declared.precision == v.precision
                                    && declared.rank == v.rank
                                    && declared.order == v.order
                            });
                        if reusable {
                            results.push(v.clone());
                            continue;
                        }
                    }
                    let name = self.fresh_name("Out");
                    let shape = self.value_shape(&name, &value);
                    let mut var = match spec {
                        Some(spec) => {
                            let mut var = result_variable(&name, spec);
                            var.shape = shape;
                            var
                        }
                        None => {
                            let dtype = value.dtype();
                            let precision = resolve_precision(&dtype, value.precision());
                            Variable::new(name.clone(), dtype, precision).with_shape(value.rank(), shape, value.order())
                        }
                    };
                    var.is_temp = true;
                    self.scopes.insert(name.clone(), Symbol::Variable(var.clone()));
                    out.extend(self.allocation(&var, &value, location));
                    if var.is_heap_array() {
                        self.mark_allocated(&name);
                    }
                    out.push(TypedStmt::assign(TypedExpr::Var(var.clone()), value, location));
                    results.push(var);
                }
                if let Some(context) = self.function.as_mut() {
                    context.results = Some(results.clone());
                }
                results
            }
        };
        out.push(TypedStmt::new(StmtKind::Return(results), location));
        Ok(out)
    }

    /// Store array temporaries computed inside larger expressions in their
    /// own variables first, for targets without vector operations. The
    /// temporaries of one source statement all precede its statements.
    fn hoist_nested(&mut self, statements: Vec<TypedStmt>) -> CompileResult<Vec<TypedStmt>> {
        let mut prelude = Vec::new();
        let mut group = Vec::with_capacity(statements.len());
        for mut stmt in statements {
            while let Some(nested) = hoist_candidate(&stmt, self.language) {
                if matches!(stmt.kind, StmtKind::While { .. }) {
                    return Err(CompileError::restriction(
                        format!("'{}' in a while condition", nested),
                        self.language,
                    ));
                }
                let temp = self.store_temporary(&nested, stmt.location, &mut prelude)?;
                for e in stmt.exprs_mut() {
                    e.substitute(std::slice::from_ref(&nested), &[temp.clone()], &[]);
                }
            }
            if !self.language.has_vectors() {
                self.hoist_overlap(&mut stmt, &mut prelude)?;
            }
            group.push(stmt);
        }
        prelude.extend(group);
        Ok(prelude)
    }

    /// A loop writing `a[1:]` while reading `a[:-1]` would see its own
    /// updates, so such a right-hand side is computed into a temporary
    fn hoist_overlap(&mut self, stmt: &mut TypedStmt, prelude: &mut Vec<TypedStmt>) -> CompileResult<()> {
        let (StmtKind::Assign { lhs, rhs } | StmtKind::AugAssign { lhs, rhs, .. }) = &mut stmt.kind else {
            return Ok(());
        };
        if rhs.rank() == 0 && lhs.rank() == 0 {
            return Ok(());
        }
        let Some((base, written)) = written_section(lhs) else {
            return Ok(());
        };
        if !reads_differently(rhs, &base, &written) {
            return Ok(());
        }
        debug!(array = %base, rhs = %rhs, "right-hand side overlaps the written section");
        let value = rhs.clone();
        *rhs = self.store_temporary(&value, stmt.location, prelude)?;
        Ok(())
    }

    fn store_temporary(&mut self, value: &TypedExpr, location: Option<Location>, prelude: &mut Vec<TypedStmt>) -> CompileResult<TypedExpr> {
        let name = self.fresh_name("Dummy");
        debug!(temporary = %name, expr = %value, "hoisting array expression");
        prelude.extend(self.assign_to_name(&name, value.clone(), location)?);
        self.scopes
            .variable(&name)
            .cloned()
            .map(TypedExpr::Var)
            .ok_or_else(|| CompileError::undefined(name))
    }
}

/// Array an assignment target writes and the section it writes, with every
/// axis spelled out
fn written_section(lhs: &TypedExpr) -> Option<(String, Vec<Index>)> {
    match lhs {
        TypedExpr::Var(v) if v.rank > 0 => Some((v.name.clone(), vec![Index::Slice(Slice::full()); v.rank])),
        TypedExpr::Indexed(i) if i.rank() > 0 => Some((i.base.name.clone(), i.full_indices())),
        _ => None,
    }
}

/// Whether `e` reads array `base` anywhere but exactly at `written`
fn reads_differently(e: &TypedExpr, base: &str, written: &[Index]) -> bool {
    match e {
        TypedExpr::Var(v) if v.name == base => written.iter().any(|i| !matches!(i, Index::Slice(s) if s.is_full())),
        TypedExpr::Indexed(i) if i.base.name == base => {
            i.full_indices() != written || e.children().into_iter().any(|c| reads_differently(c, base, written))
        }
        other => other.children().into_iter().any(|c| reads_differently(c, base, written)),
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::{StmtKind, TypedExpr};
    use crate::config::{CompilerConfig, Language};
    use crate::diagnostics::{Diagnostics, Severity};
    use crate::error::CompileError;
    use crate::semantic::annotate_source;
    use pretty_assertions::assert_eq;

    fn kinds(body: &[crate::ast::TypedStmt]) -> Vec<&'static str> {
        body.iter()
            .map(|s| match &s.kind {
                StmtKind::Assign { .. } => "assign",
                StmtKind::AugAssign { .. } => "augassign",
                StmtKind::AliasAssign { .. } => "alias",
                StmtKind::For(_) => "for",
                StmtKind::While { .. } => "while",
                StmtKind::If { .. } => "if",
                StmtKind::Return(_) => "return",
                StmtKind::Allocate { .. } => "allocate",
                StmtKind::Deallocate(_) => "deallocate",
                StmtKind::Expr(_) => "expr",
                StmtKind::Print(_) => "print",
                StmtKind::Pass => "pass",
                StmtKind::Break => "break",
                StmtKind::Continue => "continue",
                StmtKind::Pragma(_) => "pragma",
            })
            .collect()
    }

    #[test]
    fn test_array_declaration_allocates() {
        let source = "from numpy import zeros\ndef f(n: int):\n    a = zeros(n)\n    b = a\n    a[0] = 1.0\n";
        let module = annotate_source(source, &CompilerConfig::default(), &mut Diagnostics::new()).unwrap();
        let f = &module.functions[0];
        assert_eq!(kinds(&f.body), vec!["allocate", "assign", "alias", "assign"]);
        let b = f.variable("b").unwrap();
        assert!(b.is_pointer);
    }

    #[test]
    fn test_reallocation_is_a_warning() {
        let source = "from numpy import zeros\ndef f():\n    a = zeros(3)\n    a = zeros(4)\n";
        let mut diagnostics = Diagnostics::new();
        let module = annotate_source(source, &CompilerConfig::default(), &mut diagnostics).unwrap();
        assert_eq!(diagnostics.count(Severity::Warning), 1);
        let f = &module.functions[0];
        assert_eq!(kinds(&f.body), vec!["allocate", "assign", "allocate", "assign"]);
        assert!(matches!(f.body[2].kind, StmtKind::Allocate { reallocate: true, .. }));
    }

    #[test]
    fn test_type_errors_are_recovered() {
        let source = "def f(x: int):\n    y = 1\n    y = 2.5\n    z = y + x\n    return z\n";
        let mut diagnostics = Diagnostics::new();
        let err = annotate_source(source, &CompilerConfig::default(), &mut diagnostics).unwrap_err();
        assert!(matches!(err, CompileError::Errors { count: 1 }));
        assert_eq!(diagnostics.count(Severity::Error), 1);
    }

    #[test]
    fn test_integer_true_division_update_rejected() {
        let source = "def f(x: int):\n    x /= 2\n";
        let mut diagnostics = Diagnostics::new();
        assert!(annotate_source(source, &CompilerConfig::default(), &mut diagnostics).is_err());
        assert!(diagnostics.render().contains("would change the type"));
    }

    #[test]
    fn test_return_reuses_local() {
        let source = "def f(x: int) -> int:\n    y = x + 1\n    return y\n";
        let module = annotate_source(source, &CompilerConfig::default(), &mut Diagnostics::new()).unwrap();
        let f = &module.functions[0];
        assert_eq!(f.results()[0].name, "y");
        assert!(f.locals.is_empty());
    }

    #[test]
    fn test_return_expression_gets_result_variable() {
        let source = "def f(x: float):\n    return x * 2.0, x\n";
        let module = annotate_source(source, &CompilerConfig::default(), &mut Diagnostics::new()).unwrap();
        let names: Vec<&str> = module.functions[0].results().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Out_0001", "Out_0002"]);
    }

    #[test]
    fn test_swap_uses_temporary() {
        let source = "def f(a: int, b: int):\n    a, b = b, a\n";
        let module = annotate_source(source, &CompilerConfig::default(), &mut Diagnostics::new()).unwrap();
        let f = &module.functions[0];
        assert_eq!(kinds(&f.body), vec!["assign", "assign", "assign"]);
        let StmtKind::Assign { lhs: TypedExpr::Var(temp), .. } = &f.body[0].kind else {
            panic!("Expected a temporary first");
        };
        assert_eq!(temp.name, "Dummy_0001");
    }

    #[test]
    fn test_pragma_attaches_to_loop() {
        let source = "def f(n: int):\n    s = 0\n    #$ omp parallel do\n    for i in range(n):\n        s += i\n";
        let module = annotate_source(source, &CompilerConfig::default(), &mut Diagnostics::new()).unwrap();
        let StmtKind::For(l) = &module.functions[0].body[1].kind else {
            panic!("Expected a loop");
        };
        assert_eq!(l.pragmas, vec!["omp parallel do".to_string()]);
    }

    #[test]
    fn test_nested_reduction_hoisted_for_c() {
        let source = "from numpy import sum, ones\ndef f(n: int) -> float:\n    a = ones(n)\n    return sum(a) + 1.0\n";
        let config = CompilerConfig::new(Language::C);
        let module = annotate_source(source, &config, &mut Diagnostics::new()).unwrap();
        let f = &module.functions[0];
        assert_eq!(kinds(&f.body), vec!["allocate", "assign", "assign", "assign", "return"]);

        let fortran = annotate_source(source, &CompilerConfig::default(), &mut Diagnostics::new()).unwrap();
        assert_eq!(kinds(&fortran.functions[0].body), vec!["allocate", "assign", "assign", "return"]);
    }

    #[test]
    fn test_nested_constructor_hoisted_for_fortran() {
        let source = "from numpy import zeros\ndef f():\n    b = zeros(3) + 1.0\n";
        let module = annotate_source(source, &CompilerConfig::default(), &mut Diagnostics::new()).unwrap();
        let f = &module.functions[0];
        assert_eq!(kinds(&f.body), vec!["allocate", "assign", "allocate", "assign"]);
        assert!(f.variable("Dummy_0001").is_some());
    }

    #[test]
    fn test_overlapping_sections_use_temporary_for_c() {
        let source = "from numpy import ones\ndef f() -> float:\n    a = ones(5)\n    a[1:] = a[:-1] + a[1:]\n    return a[4]\n";
        let module = annotate_source(source, &CompilerConfig::new(Language::C), &mut Diagnostics::new()).unwrap();
        let f = &module.functions[0];
        assert_eq!(kinds(&f.body), vec!["allocate", "assign", "allocate", "assign", "assign", "assign", "return"]);
        let StmtKind::Assign { rhs: TypedExpr::Var(temp), .. } = &f.body[4].kind else {
            panic!("Expected the section to be copied from a temporary");
        };
        assert_eq!(temp.name, "Dummy_0001");

        let fortran = annotate_source(source, &CompilerConfig::default(), &mut Diagnostics::new()).unwrap();
        assert!(fortran.functions[0].variable("Dummy_0001").is_none());
    }

    #[test]
    fn test_same_section_needs_no_temporary() {
        let source = "def f(a: 'float[:]'):\n    a[1:] = a[1:] * 2.0\n    a[:] = a + 1.0\n";
        let module = annotate_source(source, &CompilerConfig::new(Language::C), &mut Diagnostics::new()).unwrap();
        assert_eq!(kinds(&module.functions[0].body), vec!["assign", "assign"]);
    }

    #[test]
    fn test_rejected_assignment_does_not_cascade() {
        let source = "def f(a: 'float[:]') -> float:\n    b = a[::-2]\n    return b[1]\n";
        let mut diagnostics = Diagnostics::new();
        let err = annotate_source(source, &CompilerConfig::default(), &mut diagnostics).unwrap_err();
        assert!(matches!(err, CompileError::Errors { count: 1 }));
        assert_eq!(diagnostics.count(Severity::Fatal), 0);
    }

    #[test]
    fn test_independent_errors_surface_after_rejection() {
        let source = "def f(a: 'float[:]', x: int):\n    b = a[::-2]\n    c = a + b\n    d = c[0]\n    x = 2.5\n";
        let mut diagnostics = Diagnostics::new();
        let err = annotate_source(source, &CompilerConfig::default(), &mut diagnostics).unwrap_err();
        assert!(matches!(err, CompileError::Errors { count: 2 }));
        assert!(diagnostics.render().contains("cannot store a float value in 'x'"));
    }

    #[test]
    fn test_homogeneous_tuple_is_a_stack_array() {
        let source = "def f() -> int:\n    t = (1, 2, 3)\n    x, y, z = t\n    return t[1] + y\n";
        let module = annotate_source(source, &CompilerConfig::new(Language::C), &mut Diagnostics::new()).unwrap();
        let f = &module.functions[0];
        let t = f.variable("t").unwrap();
        assert!(t.is_stack_array);
        assert_eq!((t.rank, t.shape.clone()), (1, vec![crate::ast::Dim::Lit(3)]));
        assert_eq!(kinds(&f.body), vec!["assign", "assign", "assign", "assign", "assign", "return"]);
        let StmtKind::Assign { rhs, .. } = &f.body[2].kind else {
            panic!("Expected the second unpacked element");
        };
        assert_eq!(rhs.to_string(), "t[1]");
    }

    #[test]
    fn test_inhomogeneous_tuple_rejected() {
        let source = "def f():\n    t = (1, 2.5)\n    u = t\n";
        let mut diagnostics = Diagnostics::new();
        let err = annotate_source(source, &CompilerConfig::default(), &mut diagnostics).unwrap_err();
        assert!(matches!(err, CompileError::Errors { count: 1 }));
        assert!(diagnostics.render().contains("inhomogeneous tuple"));
    }

    #[test]
    fn test_rebinding_array_argument_rejected() {
        let source = "from numpy import zeros\ndef f(a: 'float[:]'):\n    a = zeros(3)\n";
        let mut diagnostics = Diagnostics::new();
        assert!(annotate_source(source, &CompilerConfig::default(), &mut diagnostics).is_err());
        assert!(diagnostics.render().contains("a[:]"));
    }
}
