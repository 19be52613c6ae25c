//! Verification state shared by every heap of a run.

use std::cell::RefCell;

use z3::ast::Bool;
use z3::Context;

use super::value::StateValue;

/// Accumulates the predicate sets a run emits while a function is executed
/// symbolically: preconditions (assumed), UB conditions (asserted) and
/// return values, plus the flag separating the source run from the target
/// run. The state outlives every heap and pointer created under it; they
/// reach it through a shared borrow, so the sets use interior mutability.
pub struct State<'ctx> {
    ctx: &'ctx Context,
    source: bool,
    preconditions: RefCell<Vec<Bool<'ctx>>>,
    ub_conditions: RefCell<Vec<Bool<'ctx>>>,
    return_values: RefCell<Vec<StateValue<'ctx>>>,
}

impl<'ctx> State<'ctx> {
    pub fn new(ctx: &'ctx Context, source: bool) -> Self {
        Self {
            ctx,
            source,
            preconditions: RefCell::new(Vec::new()),
            ub_conditions: RefCell::new(Vec::new()),
            return_values: RefCell::new(Vec::new()),
        }
    }

    pub fn ctx(&self) -> &'ctx Context {
        self.ctx
    }

    /// True for the source run; decides run-qualified UF names.
    pub fn is_source(&self) -> bool {
        self.source
    }

    /// Record a condition the environment must satisfy for the function to
    /// execute at all, such as alignment of fresh allocations.
    pub fn add_pre(&self, cond: Bool<'ctx>) {
        tracing::trace!(%cond, "add_pre");
        self.preconditions.borrow_mut().push(cond);
    }

    /// Record a condition whose violation is undefined behavior.
    pub fn add_ub(&self, cond: Bool<'ctx>) {
        tracing::trace!(%cond, "add_ub");
        self.ub_conditions.borrow_mut().push(cond);
    }

    /// Record a function return value.
    pub fn add_return(&self, val: StateValue<'ctx>) {
        self.return_values.borrow_mut().push(val);
    }

    /// Conjunction of every recorded precondition.
    pub fn precondition(&self) -> Bool<'ctx> {
        Self::conjunct(self.ctx, &self.preconditions.borrow())
    }

    /// Conjunction of every recorded UB condition. A model violating this
    /// formula exhibits undefined behavior.
    pub fn ub_condition(&self) -> Bool<'ctx> {
        Self::conjunct(self.ctx, &self.ub_conditions.borrow())
    }

    pub fn return_values(&self) -> Vec<StateValue<'ctx>> {
        self.return_values.borrow().clone()
    }

    fn conjunct(ctx: &'ctx Context, conds: &[Bool<'ctx>]) -> Bool<'ctx> {
        if conds.is_empty() {
            return Bool::from_bool(ctx, true);
        }
        let refs: Vec<&Bool<'ctx>> = conds.iter().collect();
        Bool::and(ctx, &refs)
    }
}
