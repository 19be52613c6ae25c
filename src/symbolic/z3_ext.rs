//! Helpers over the z3 ast surface used by the memory model.
//!
//! Everything here is pure term construction; nothing touches a solver.

use z3::ast::{Array, Ast, Bool, Dynamic, BV};
use z3::{Context, FuncDecl, Sort};

/// Coerce `bv` to exactly `bits` by zero-extension or truncation.
pub fn zext_or_trunc<'ctx>(bv: &BV<'ctx>, bits: u32) -> BV<'ctx> {
    let width = bv.get_size();
    if bits > width {
        bv.zero_ext(bits - width)
    } else if bits < width {
        bv.extract(bits - 1, 0)
    } else {
        bv.clone()
    }
}

/// Coerce `bv` to exactly `bits` by sign-extension or truncation.
pub fn sext_or_trunc<'ctx>(bv: &BV<'ctx>, bits: u32) -> BV<'ctx> {
    let width = bv.get_size();
    if bits > width {
        bv.sign_ext(bits - width)
    } else if bits < width {
        bv.extract(bits - 1, 0)
    } else {
        bv.clone()
    }
}

/// Keep only the low `bits` bits.
pub fn trunc<'ctx>(bv: &BV<'ctx>, bits: u32) -> BV<'ctx> {
    if bits < bv.get_size() {
        bv.extract(bits - 1, 0)
    } else {
        bv.clone()
    }
}

/// `a + b` does not wrap under the signed interpretation.
pub fn add_no_soverflow<'ctx>(a: &BV<'ctx>, b: &BV<'ctx>) -> Bool<'ctx> {
    Bool::and(
        a.get_ctx(),
        &[&a.bvadd_no_overflow(b, true), &a.bvadd_no_underflow(b)],
    )
}

/// `a + b` does not wrap under the unsigned interpretation.
pub fn add_no_uoverflow<'ctx>(a: &BV<'ctx>, b: &BV<'ctx>) -> Bool<'ctx> {
    a.bvadd_no_overflow(b, false)
}

/// A boolean as a single bit, 1 when true.
pub fn bool_to_bv<'ctx>(ctx: &'ctx Context, b: &Bool<'ctx>) -> BV<'ctx> {
    b.ite(&BV::from_u64(ctx, 1, 1), &BV::from_u64(ctx, 0, 1))
}

/// Apply the uninterpreted function `name` to bit-vector arguments, yielding
/// a `range_bits` wide result. Declarations are keyed by name, so every call
/// site using the same name denotes the same function.
pub fn mk_uf<'ctx>(
    ctx: &'ctx Context,
    name: &str,
    args: &[&BV<'ctx>],
    range_bits: u32,
) -> BV<'ctx> {
    let domain: Vec<Sort<'ctx>> = args
        .iter()
        .map(|a| Sort::bitvector(ctx, a.get_size()))
        .collect();
    let domain_refs: Vec<&Sort<'ctx>> = domain.iter().collect();
    let decl = FuncDecl::new(ctx, name, &domain_refs, &Sort::bitvector(ctx, range_bits));
    let arg_refs: Vec<&dyn Ast<'ctx>> = args.iter().map(|a| *a as &dyn Ast<'ctx>).collect();
    decl.apply(&arg_refs)
        .as_bv()
        .expect("uninterpreted function declared with a bit-vector range")
}

/// Fresh named array from `domain_bits` wide indices to `range_bits` wide
/// values.
pub fn mk_val_array<'ctx>(
    ctx: &'ctx Context,
    name: &str,
    domain_bits: u32,
    range_bits: u32,
) -> Array<'ctx> {
    Array::new_const(
        ctx,
        name,
        &Sort::bitvector(ctx, domain_bits),
        &Sort::bitvector(ctx, range_bits),
    )
}

/// Array defined pointwise by `body` over the bound index constant `bound`.
pub fn mk_lambda<'ctx>(ctx: &'ctx Context, bound: &BV<'ctx>, body: &BV<'ctx>) -> Array<'ctx> {
    z3::ast::lambda_const(ctx, &[bound as &dyn Ast<'ctx>], &Dynamic::from_ast(body))
}

/// Read an array cell as a bit-vector.
pub fn select_bv<'ctx>(arr: &Array<'ctx>, idx: &BV<'ctx>) -> BV<'ctx> {
    arr.select(idx)
        .as_bv()
        .expect("array declared with a bit-vector range")
}

/// Probe for a ground constant, letting z3 do the folding first.
pub fn as_const_u64(bv: &BV<'_>) -> Option<u64> {
    bv.simplify().as_u64()
}

/// `Some(k)` iff `n` is a power of two with `k = log2(n) > 0`.
pub fn pow2_bits(n: u64) -> Option<u32> {
    if n.is_power_of_two() && n > 1 {
        Some(n.trailing_zeros())
    } else {
        None
    }
}
