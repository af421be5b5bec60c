//! Subscripts: element indices and slices

use serde::{Deserialize, Serialize};

use super::expr::TypedExpr;
use super::shape::Dim;
use super::variable::Variable;
use crate::error::{CompileError, CompileResult};
use crate::types::{DataType, Order};

/// `start:stop:step`, each part optional
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slice {
    pub start: Option<Box<TypedExpr>>,
    pub stop: Option<Box<TypedExpr>>,
    pub step: Option<Box<TypedExpr>>,
}

impl Slice {
    /// Every part must be an integer scalar
    pub fn new(start: Option<TypedExpr>, stop: Option<TypedExpr>, step: Option<TypedExpr>) -> CompileResult<Self> {
        for (what, part) in [("start", &start), ("stop", &stop), ("step", &step)] {
            if let Some(e) = part {
                if e.dtype() != DataType::Integer || e.rank() != 0 {
                    return Err(CompileError::type_error(format!(
                        "slice {} must be an integer scalar, got {}",
                        what,
                        e.dtype()
                    )));
                }
            }
        }
        Ok(Self {
            start: start.map(Box::new),
            stop: stop.map(Box::new),
            step: step.map(Box::new),
        })
    }

    /// The full slice `:`
    pub fn full() -> Self {
        Self { start: None, stop: None, step: None }
    }

    pub fn is_full(&self) -> bool {
        self.start.is_none() && self.stop.is_none() && self.step.is_none()
    }

    /// Number of selected elements on an axis of length `axis`
    pub fn length(&self, axis: &Dim) -> Dim {
        let part = |e: &Option<Box<TypedExpr>>| e.as_deref().and_then(Dim::from_expr);
        axis.slice_length(part(&self.start), part(&self.stop), part(&self.step))
    }
}

/// One subscript position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Index {
    Elem(TypedExpr),
    Slice(Slice),
}

/// `base[i, j:k, ...]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedElement {
    pub base: Variable,
    pub indices: Vec<Index>,
}

impl IndexedElement {
    pub fn new(base: Variable, indices: Vec<Index>) -> CompileResult<Self> {
        if indices.len() > base.rank {
            return Err(CompileError::type_error(format!(
                "too many indices for '{}': rank {}, got {}",
                base.name,
                base.rank,
                indices.len()
            )));
        }
        for index in &indices {
            if let Index::Elem(e) = index {
                if e.dtype() != DataType::Integer && e.dtype() != DataType::Bool {
                    return Err(CompileError::type_error(format!(
                        "index into '{}' must be an integer, got {}",
                        base.name,
                        e.dtype()
                    )));
                }
            }
        }
        Ok(Self { base, indices })
    }

    /// Subscripts for every axis, missing trailing ones filled with `:`
    pub fn full_indices(&self) -> Vec<Index> {
        let mut out = self.indices.clone();
        out.extend((self.indices.len()..self.base.rank).map(|_| Index::Slice(Slice::full())));
        out
    }

    pub fn rank(&self) -> usize {
        let elems = self.indices.iter().filter(|i| matches!(i, Index::Elem(_))).count();
        self.base.rank - elems
    }

    pub fn shape(&self) -> Vec<Dim> {
        self.full_indices()
            .iter()
            .zip(&self.base.shape)
            .filter_map(|(index, axis)| match index {
                Index::Elem(_) => None,
                Index::Slice(s) => Some(s.length(axis)),
            })
            .collect()
    }

    pub fn order(&self) -> Option<Order> {
        if self.rank() >= 2 {
            self.base.order
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Literal;
    use pretty_assertions::assert_eq;

    fn matrix() -> Variable {
        Variable::new("a", DataType::Real, 8).with_shape(2, vec![Dim::Lit(3), Dim::Lit(4)], None)
    }

    fn int(n: i64) -> TypedExpr {
        TypedExpr::Literal(Literal::int(n))
    }

    #[test]
    fn test_full_indexing_is_scalar() {
        let e = IndexedElement::new(matrix(), vec![Index::Elem(int(0)), Index::Elem(int(1))]).unwrap();
        assert_eq!(e.rank(), 0);
        assert!(e.shape().is_empty());
    }

    #[test]
    fn test_trailing_slice_keeps_one_axis() {
        let e = IndexedElement::new(matrix(), vec![Index::Elem(int(2))]).unwrap();
        assert_eq!(e.rank(), 1);
        assert_eq!(e.shape(), vec![Dim::Lit(4)]);
        assert_eq!(e.order(), None);
    }

    #[test]
    fn test_slice_shape() {
        let s = Slice::new(Some(int(1)), None, None).unwrap();
        let e = IndexedElement::new(matrix(), vec![Index::Slice(s)]).unwrap();
        assert_eq!(e.shape(), vec![Dim::Lit(2), Dim::Lit(4)]);
    }

    #[test]
    fn test_slice_rejects_real_step() {
        let err = Slice::new(None, None, Some(TypedExpr::Literal(Literal::float(0.5)))).unwrap_err();
        assert!(err.to_string().contains("slice step"));
    }

    #[test]
    fn test_too_many_indices() {
        let idx = vec![Index::Elem(int(0)), Index::Elem(int(0)), Index::Elem(int(0))];
        assert!(IndexedElement::new(matrix(), idx).is_err());
    }
}
