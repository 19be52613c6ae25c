//! Symbolic memory model for translation validation of a typed SSA IR.
//!
//! Given a source function and a candidate target function, the surrounding
//! engine emits a first-order formula over bit-vectors whose unsatisfiability
//! proves the target refines the source. This crate supplies the memory piece
//! of that encoding: symbolic pointers and their algebra, a flat byte heap
//! with load/store/memset/memcpy/alloc operators, and the constant-expression
//! sub-language whose folding agrees with the heap's bit-vector semantics.
//!
//! Terms are built over the [`z3`] crate. The crate never runs a solver; it
//! only constructs formulae and accumulates precondition and UB sets in a
//! [`symbolic::state::State`]. The verification driver, the type system and
//! the IR parser live outside.

pub mod config;
pub mod constant;
pub mod error;
pub mod symbolic;
