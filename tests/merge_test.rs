use tvalid::config::MemConfig;
use tvalid::symbolic::memory::Memory;
use tvalid::symbolic::state::State;
use tvalid::symbolic::value::{IntType, StateValue};
use tvalid::symbolic::z3_ext::select_bv;
use z3::ast::{Ast, Bool, BV};
use z3::{Config, Context, SatResult, Solver};

/// Discharge a claim by refuting its negation.
fn prove(solver: &Solver, claim: &Bool) {
    solver.push();
    solver.assert(&claim.not());
    assert_eq!(solver.check(), SatResult::Unsat, "claim must be valid");
    solver.pop(1);
}

#[test]
fn test_merge_selects_between_branch_heaps() {
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    let solver = Solver::new(&ctx);
    let state = State::new(&ctx, true);
    let mut base = Memory::new(&ctx, &state, MemConfig::default());

    let p = base.alloc(&BV::from_u64(&ctx, 4, 32), 1, true);
    let mut h_then = base.clone();
    let h_else = base.clone();

    let x = StateValue::new(
        BV::from_u64(&ctx, 0xCAFE_F00D, 32),
        Bool::from_bool(&ctx, true),
    );
    h_then.store(&p, &x, &IntType::new(32), 1);

    let cond = Bool::new_const(&ctx, "cond");
    let merged = Memory::merge(&cond, &h_then, &h_else);
    let loaded = merged.load(&p, &IntType::new(32), 1);

    solver.push();
    solver.assert(&cond);
    prove(&solver, &loaded.value._eq(&BV::from_u64(&ctx, 0xCAFE_F00D, 32)));
    prove(&solver, &loaded.non_poison);
    solver.pop(1);

    solver.push();
    solver.assert(&cond.not());
    let else_loaded = h_else.load(&p, &IntType::new(32), 1);
    prove(&solver, &loaded.value._eq(&else_loaded.value));
    prove(&solver, &loaded.non_poison.not());
    solver.pop(1);
}

#[test]
fn test_merge_commutes_under_negated_condition() {
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    let solver = Solver::new(&ctx);
    let state = State::new(&ctx, true);
    let mut base = Memory::new(&ctx, &state, MemConfig::default());

    let p = base.alloc(&BV::from_u64(&ctx, 4, 32), 1, true);
    let mut h_then = base.clone();
    let mut h_else = base.clone();

    let x = StateValue::new(BV::from_u64(&ctx, 0x11, 8), Bool::from_bool(&ctx, true));
    let y = StateValue::new(BV::from_u64(&ctx, 0x22, 8), Bool::from_bool(&ctx, true));
    h_then.store(&p, &x, &IntType::new(8), 1);
    h_else.store(&p, &y, &IntType::new(8), 1);

    let cond = Bool::new_const(&ctx, "cond");
    let m1 = Memory::merge(&cond.not(), &h_then, &h_else);
    let m2 = Memory::merge(&cond, &h_else, &h_then);

    let probe = BV::new_const(&ctx, "probe", 24);
    prove(
        &solver,
        &select_bv(&m1.blocks_val, &probe)._eq(&select_bv(&m2.blocks_val, &probe)),
    );
    assert_eq!(m1.last_bid, m2.last_bid);
    assert_eq!(m1.last_idx_ptr, m2.last_idx_ptr);
}

#[test]
fn test_merge_takes_counter_maxima() {
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    let state = State::new(&ctx, true);
    let base = Memory::new(&ctx, &state, MemConfig::default());

    let mut h_then = base.clone();
    let mut h_else = base.clone();
    let size = BV::from_u64(&ctx, 8, 32);
    h_then.alloc(&size, 1, true);
    h_then.alloc(&size, 1, true);

    let p = h_else.alloc(&size, 1, true);
    let len = BV::new_const(&ctx, "len", 32);
    let fill = StateValue::new(BV::from_u64(&ctx, 0, 8), Bool::from_bool(&ctx, true));
    h_else.memset(&p, &fill, &len, 1);

    let cond = Bool::new_const(&ctx, "cond");
    let merged = Memory::merge(&cond, &h_then, &h_else);
    assert_eq!(merged.last_bid, 2);
    assert_eq!(merged.last_idx_ptr, 1);
}

#[test]
#[should_panic(expected = "share a verification state")]
fn test_merge_rejects_heaps_of_different_states() {
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    let src = State::new(&ctx, true);
    let tgt = State::new(&ctx, false);

    let a = Memory::new(&ctx, &src, MemConfig::default());
    let b = Memory::new(&ctx, &tgt, MemConfig::default());
    let cond = Bool::new_const(&ctx, "cond");
    let _ = Memory::merge(&cond, &a, &b);
}
