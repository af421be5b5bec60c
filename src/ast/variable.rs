//! Named, typed storage locations

use serde::{Deserialize, Serialize};

use super::shape::Dim;
use crate::types::{DataType, Order, Precision, TypeSpec};

/// A variable with its frozen type information and storage flags
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub dtype: DataType,
    pub precision: Precision,
    pub rank: usize,
    /// One entry per axis, in row-major axis numbering
    pub shape: Vec<Dim>,
    /// Memory layout; only set when `rank >= 2`
    pub order: Option<Order>,
    /// Aliases the storage of another array
    pub is_pointer: bool,
    /// Argument that may be absent (`None` default)
    pub is_optional: bool,
    /// Array with automatic (stack) storage instead of heap allocation
    pub is_stack_array: bool,
    pub is_const: bool,
    pub is_argument: bool,
    /// Introduced by the compiler (results, loop indices)
    pub is_temp: bool,
}

impl Variable {
    pub fn new(name: impl Into<String>, dtype: DataType, precision: Precision) -> Self {
        Self {
            name: name.into(),
            dtype,
            precision,
            rank: 0,
            shape: Vec::new(),
            order: None,
            is_pointer: false,
            is_optional: false,
            is_stack_array: false,
            is_const: false,
            is_argument: false,
            is_temp: false,
        }
    }

    /// Default-width integer scalar, used for loop indices
    pub fn index(name: impl Into<String>) -> Self {
        let mut v = Self::new(name, DataType::Integer, 8);
        v.is_temp = true;
        v
    }

    /// Argument declared by a header type; its shape is only known at run time
    pub fn argument(name: impl Into<String>, spec: &TypeSpec) -> Self {
        let name = name.into();
        let shape = (0..spec.rank).map(|axis| Dim::size_of(name.clone(), axis)).collect();
        let mut v = Self::new(name, spec.dtype.clone(), spec.precision).with_shape(spec.rank, shape, spec.order);
        v.is_argument = true;
        v
    }

    pub fn with_shape(mut self, rank: usize, shape: Vec<Dim>, order: Option<Order>) -> Self {
        self.rank = rank;
        self.shape = shape;
        self.order = if rank >= 2 { Some(order.unwrap_or_default()) } else { None };
        self
    }

    pub fn is_array(&self) -> bool {
        self.rank > 0
    }

    /// Array whose storage this variable owns on the heap
    pub fn is_heap_array(&self) -> bool {
        self.rank > 0 && !self.is_pointer && !self.is_stack_array && !self.is_argument
    }

    pub fn type_spec(&self) -> TypeSpec {
        TypeSpec {
            dtype: self.dtype.clone(),
            precision: self.precision,
            rank: self.rank,
            order: self.order,
        }
    }

    /// Same variable under another name, shape references updated
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        let name = name.into();
        let mut v = self.clone();
        v.shape = self.shape.iter().map(|d| d.rename(&self.name, &name)).collect();
        v.name = name;
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argument_shape_is_symbolic() {
        let spec = TypeSpec::parse("float[:,:]").unwrap();
        let v = Variable::argument("a", &spec);
        assert_eq!(v.rank, 2);
        assert_eq!(v.shape, vec![Dim::size_of("a", 0), Dim::size_of("a", 1)]);
        assert_eq!(v.order, Some(Order::C));
        assert!(!v.is_heap_array());
    }

    #[test]
    fn test_order_only_from_rank_two() {
        let v = Variable::new("x", DataType::Real, 8).with_shape(1, vec![Dim::Lit(3)], Some(Order::F));
        assert_eq!(v.order, None);
        assert!(v.is_heap_array());
    }

    #[test]
    fn test_renamed_updates_shape() {
        let spec = TypeSpec::parse("int[:]").unwrap();
        let v = Variable::argument("a", &spec).renamed("b");
        assert_eq!(v.shape, vec![Dim::size_of("b", 0)]);
    }
}
