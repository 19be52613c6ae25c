//! Value and type seams shared by the heap operators.

use z3::ast::{Ast, Bool, BV};

/// A term together with its poison guard; `non_poison` is true when the
/// value is well-defined. Pointer comparisons use the `Bool` instantiation,
/// where the guard carries the same-block requirement.
#[derive(Debug, Clone)]
pub struct StateValue<'ctx, T = BV<'ctx>> {
    pub value: T,
    pub non_poison: Bool<'ctx>,
}

impl<'ctx, T> StateValue<'ctx, T> {
    pub fn new(value: T, non_poison: Bool<'ctx>) -> Self {
        Self { value, non_poison }
    }
}

impl<'ctx> StateValue<'ctx, Bool<'ctx>> {
    /// Conjunction of the comparison and its guard. Range membership checks
    /// in the bulk heap operators go through this.
    pub fn both(&self) -> Bool<'ctx> {
        Bool::and(self.value.get_ctx(), &[&self.value, &self.non_poison])
    }
}

/// How a `bits()`-wide block of heap bytes is reinterpreted as a typed
/// value. Integers are the identity; richer types (floats, vectors) live
/// outside this crate and implement the same seam.
pub trait ValueType<'ctx> {
    fn bits(&self) -> u32;
    /// Lower a typed value to its raw bit pattern for storing.
    fn to_bv(&self, val: StateValue<'ctx>) -> StateValue<'ctx>;
    /// Recombine a raw bit pattern after loading.
    fn from_bv(&self, val: StateValue<'ctx>) -> StateValue<'ctx>;
}

/// Fixed-width integer type; its bit pattern is the value itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntType {
    pub bitwidth: u32,
}

impl IntType {
    pub fn new(bitwidth: u32) -> Self {
        Self { bitwidth }
    }
}

impl<'ctx> ValueType<'ctx> for IntType {
    fn bits(&self) -> u32 {
        self.bitwidth
    }

    fn to_bv(&self, val: StateValue<'ctx>) -> StateValue<'ctx> {
        val
    }

    fn from_bv(&self, val: StateValue<'ctx>) -> StateValue<'ctx> {
        val
    }
}
