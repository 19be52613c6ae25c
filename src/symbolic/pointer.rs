//! Symbolic pointers over the `offset ++ local_bid ++ nonlocal_bid` encoding.

use std::fmt;

use z3::ast::{Ast, Bool, BV};

use super::memory::Memory;
use super::value::StateValue;
use super::z3_ext;

/// A pointer value bound to its enclosing heap. Immutable; arithmetic
/// returns new pointers. Cloning duplicates one term handle and the heap
/// back-reference.
#[derive(Clone)]
pub struct Pointer<'m, 's, 'ctx> {
    m: &'m Memory<'s, 'ctx>,
    p: BV<'ctx>,
}

macro_rules! ptr_cmp {
    ($name:ident, $op:ident) => {
        /// Offset comparison; the non-poison flag carries the same-block
        /// requirement. Comparing pointers into different blocks is not UB,
        /// it yields a poisoned boolean.
        pub fn $name(&self, rhs: &Pointer<'m, 's, 'ctx>) -> StateValue<'ctx, Bool<'ctx>> {
            StateValue::new(
                self.get_offset().$op(&rhs.get_offset()),
                self.get_bid()._eq(&rhs.get_bid()),
            )
        }
    };
}

impl<'m, 's, 'ctx> Pointer<'m, 's, 'ctx> {
    /// Fresh symbolic pointer of the full encoded width.
    pub fn from_name(m: &'m Memory<'s, 'ctx>, name: &str) -> Self {
        let p = BV::new_const(m.ctx(), name, m.cfg().ptr_bits());
        Self { m, p }
    }

    /// Pointer at offset zero into the given block.
    pub fn from_bid(m: &'m Memory<'s, 'ctx>, bid: u64, local: bool) -> Self {
        let cfg = m.cfg();
        let bid_expr = if local {
            BV::from_u64(m.ctx(), bid << cfg.bits_for_nonlocal_bid, cfg.bid_bits())
        } else {
            BV::from_u64(m.ctx(), bid, cfg.bid_bits())
        };
        let p = BV::from_u64(m.ctx(), 0, cfg.bits_for_offset).concat(&bid_expr);
        Self { m, p }
    }

    /// Pointer assembled from its three fields; widths must match the
    /// configured layout exactly.
    pub fn from_parts(
        m: &'m Memory<'s, 'ctx>,
        offset: &BV<'ctx>,
        local_bid: &BV<'ctx>,
        nonlocal_bid: &BV<'ctx>,
    ) -> Self {
        let cfg = m.cfg();
        debug_assert_eq!(offset.get_size(), cfg.bits_for_offset);
        debug_assert_eq!(local_bid.get_size(), cfg.bits_for_local_bid);
        debug_assert_eq!(nonlocal_bid.get_size(), cfg.bits_for_nonlocal_bid);
        Self {
            m,
            p: offset.concat(local_bid).concat(nonlocal_bid),
        }
    }

    /// Wrap an encoded pointer term produced elsewhere.
    pub fn from_term(m: &'m Memory<'s, 'ctx>, p: BV<'ctx>) -> Self {
        debug_assert_eq!(p.get_size(), m.cfg().ptr_bits());
        Self { m, p }
    }

    pub fn term(&self) -> &BV<'ctx> {
        &self.p
    }

    /// Give up the wrapper and keep the raw encoded term.
    pub fn into_term(self) -> BV<'ctx> {
        self.p
    }

    fn bid_bits(&self) -> u32 {
        self.m.cfg().bid_bits()
    }

    /// Both fields are checked: a symbolic input can have the local and
    /// non-local ids nonzero at once, and such a pointer is not local.
    pub fn is_local(&self) -> Bool<'ctx> {
        let ctx = self.m.ctx();
        let cfg = self.m.cfg();
        let local_zero = BV::from_u64(ctx, 0, cfg.bits_for_local_bid);
        let nonlocal_zero = BV::from_u64(ctx, 0, cfg.bits_for_nonlocal_bid);
        Bool::and(
            ctx,
            &[
                &self.get_local_bid()._eq(&local_zero).not(),
                &self.get_nonlocal_bid()._eq(&nonlocal_zero),
            ],
        )
    }

    /// The combined `local ++ nonlocal` id field.
    pub fn get_bid(&self) -> BV<'ctx> {
        self.p.extract(self.bid_bits() - 1, 0)
    }

    pub fn get_local_bid(&self) -> BV<'ctx> {
        self.p
            .extract(self.bid_bits() - 1, self.m.cfg().bits_for_nonlocal_bid)
    }

    pub fn get_nonlocal_bid(&self) -> BV<'ctx> {
        self.p.extract(self.m.cfg().bits_for_nonlocal_bid - 1, 0)
    }

    pub fn get_offset(&self) -> BV<'ctx> {
        let cfg = self.m.cfg();
        self.p.extract(cfg.ptr_bits() - 1, self.bid_bits())
    }

    /// Numeric address: the sign-extended offset plus the block's base. The
    /// base comes from the run-qualified UF for local blocks and the shared
    /// one for non-local blocks. This is the only place the model injects
    /// addresses.
    pub fn get_address(&self) -> BV<'ctx> {
        let ctx = self.m.ctx();
        let bits = self.m.cfg().bits_size_t;
        let offset = z3_ext::sext_or_trunc(&self.get_offset(), bits);
        let local = z3_ext::mk_uf(
            ctx,
            &self.m.mk_name("blks_addr"),
            &[&self.get_local_bid()],
            bits,
        );
        let nonlocal = z3_ext::mk_uf(ctx, "blks_addr", &[&self.get_nonlocal_bid()], bits);
        offset.bvadd(&self.is_local().ite(&local, &nonlocal))
    }

    /// Declared size of the pointed-to block, zero-extended to a full
    /// size_t. Sizes live on one bit less than a size_t: a program can
    /// allocate at most half the address space, which keeps sign-extended
    /// negative offsets below every size under the unsigned order.
    pub fn block_size(&self) -> BV<'ctx> {
        let ctx = self.m.ctx();
        let bits = self.m.cfg().bits_size_t;
        let local = z3_ext::mk_uf(
            ctx,
            &self.m.mk_name("blks_size"),
            &[&self.get_local_bid()],
            bits - 1,
        );
        let nonlocal = z3_ext::mk_uf(ctx, "blks_size", &[&self.get_nonlocal_bid()], bits - 1);
        BV::from_u64(ctx, 0, 1).concat(&self.is_local().ite(&local, &nonlocal))
    }

    /// Displacement by a byte count. The block id is unchanged; offset
    /// arithmetic wraps silently at the offset width, overflow checks are
    /// emitted separately by dereference sites.
    pub fn add(&self, bytes: &BV<'ctx>) -> Pointer<'m, 's, 'ctx> {
        let cfg = self.m.cfg();
        let off = z3_ext::sext_or_trunc(&self.get_offset(), cfg.bits_size_t)
            .bvadd(&z3_ext::zext_or_trunc(bytes, cfg.bits_size_t));
        let off = z3_ext::trunc(&off, cfg.bits_for_offset);
        Pointer {
            m: self.m,
            p: off.concat(&self.get_bid()),
        }
    }

    pub fn add_u64(&self, bytes: u64) -> Pointer<'m, 's, 'ctx> {
        self.add(&BV::from_u64(
            self.m.ctx(),
            bytes,
            self.m.cfg().bits_for_offset,
        ))
    }

    /// The signed offset addition itself stays in range.
    pub fn add_no_overflow(&self, offset: &BV<'ctx>) -> Bool<'ctx> {
        z3_ext::add_no_soverflow(&self.get_offset(), offset)
    }

    /// Field-wise equality. Addresses are never compared: distinct blocks
    /// may alias through the address UFs.
    pub fn eq(&self, rhs: &Pointer<'m, 's, 'ctx>) -> Bool<'ctx> {
        Bool::and(
            self.m.ctx(),
            &[
                &self.get_bid()._eq(&rhs.get_bid()),
                &self.get_offset()._eq(&rhs.get_offset()),
            ],
        )
    }

    pub fn ne(&self, rhs: &Pointer<'m, 's, 'ctx>) -> Bool<'ctx> {
        self.eq(rhs).not()
    }

    ptr_cmp!(sle, bvsle);
    ptr_cmp!(slt, bvslt);
    ptr_cmp!(sge, bvsge);
    ptr_cmp!(sgt, bvsgt);
    ptr_cmp!(ule, bvule);
    ptr_cmp!(ult, bvult);
    ptr_cmp!(uge, bvuge);
    ptr_cmp!(ugt, bvugt);

    /// Offset within `[0, block_size]`. The unsigned test also rejects
    /// negative offsets because sizes never reach the top address bit.
    pub fn inbounds(&self) -> Bool<'ctx> {
        let offset = z3_ext::sext_or_trunc(&self.get_offset(), self.m.cfg().bits_size_t);
        offset.bvule(&self.block_size())
    }

    /// Address is a multiple of `align` when `align` is a power of two;
    /// trivially true otherwise.
    pub fn is_aligned(&self, align: u64) -> Bool<'ctx> {
        match z3_ext::pow2_bits(align) {
            Some(bits) => {
                let zero = BV::from_u64(self.m.ctx(), 0, bits);
                self.get_address().extract(bits - 1, 0)._eq(&zero)
            }
            None => Bool::from_bool(self.m.ctx(), true),
        }
    }

    /// Emit the dereferenceability guard for an access of `bytes` bytes as
    /// UB into the enclosing state. A zero-length access is always allowed.
    pub fn is_dereferenceable(&self, bytes: &BV<'ctx>, align: u64) {
        let ctx = self.m.ctx();
        let bits = self.m.cfg().bits_size_t;
        let block_sz = self.block_size();
        let offset = z3_ext::sext_or_trunc(&self.get_offset(), bits);
        let bytes = z3_ext::zext_or_trunc(bytes, bits);

        // In bounds, and the end-of-access arithmetic must not wrap.
        let mut cond = offset.bvadd(&bytes).bvule(&block_sz);
        cond = Bool::and(ctx, &[&cond, &z3_ext::add_no_uoverflow(&offset, &bytes)]);
        cond = Bool::and(ctx, &[&cond, &self.is_aligned(align)]);

        // TODO: require the block to still be alive once free() tracks
        // liveness.

        let zero = BV::from_u64(ctx, 0, bits);
        self.m.state().add_ub(bytes.bvugt(&zero).implies(&cond));
    }

    pub fn is_dereferenceable_u64(&self, bytes: u64, align: u64) {
        let bytes = BV::from_u64(self.m.ctx(), bytes, self.m.cfg().bits_for_offset);
        self.is_dereferenceable(&bytes, align);
    }

    /// Emit as UB that `[self, self+len1)` and `[ptr2, ptr2+len2)` do not
    /// overlap when both land in the same block. Callers guarantee the
    /// interval ends do not wrap.
    pub fn is_disjoint(&self, len1: &BV<'ctx>, ptr2: &Pointer<'m, 's, 'ctx>, len2: &BV<'ctx>) {
        let bits = self.m.cfg().bits_size_t;
        let cond = Bool::or(
            self.m.ctx(),
            &[
                &self.get_bid()._eq(&ptr2.get_bid()).not(),
                &disjoint(
                    &z3_ext::sext_or_trunc(&self.get_offset(), bits),
                    &z3_ext::zext_or_trunc(len1, bits),
                    &z3_ext::sext_or_trunc(&ptr2.get_offset(), bits),
                    &z3_ext::zext_or_trunc(len2, bits),
                ),
            ],
        );
        self.m.state().add_ub(cond);
    }
}

/// Unsigned interval disjointness; assumes both `begin + len` stay in range.
fn disjoint<'ctx>(
    begin1: &BV<'ctx>,
    len1: &BV<'ctx>,
    begin2: &BV<'ctx>,
    len2: &BV<'ctx>,
) -> Bool<'ctx> {
    Bool::or(
        begin1.get_ctx(),
        &[
            &begin1.bvuge(&begin2.bvadd(len2)),
            &begin2.bvuge(&begin1.bvadd(len1)),
        ],
    )
}

impl fmt::Display for Pointer<'_, '_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.is_local().simplify().as_bool() {
            Some(true) => "local",
            _ => "non-local",
        };
        let bid = self.get_bid().simplify();
        let bid = match bid.as_u64() {
            Some(v) => v.to_string(),
            None => bid.to_string(),
        };
        let offset = self.get_offset().simplify();
        let offset = match offset.as_i64() {
            Some(v) => v.to_string(),
            None => offset.to_string(),
        };
        write!(f, "pointer({kind}, block_id={bid}, offset={offset})")
    }
}
