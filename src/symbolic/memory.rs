//! The symbolic heap: one flat byte array keyed by encoded pointer bits.

use z3::ast::{Array, Ast, Bool, BV};
use z3::Context;

use crate::config::MemConfig;

use super::pointer::Pointer;
use super::state::State;
use super::value::{StateValue, ValueType};
use super::z3_ext;

/// Symbolic memory of one run. `blocks_val` maps every encoded pointer to a
/// 9-bit `non_poison ++ byte` cell; `last_bid` mints local block ids and
/// `last_idx_ptr` numbers fresh lambda indices. Between operations the heap
/// is a plain value: clone it at branches, merge the clones at joins.
#[derive(Clone)]
pub struct Memory<'s, 'ctx> {
    ctx: &'ctx Context,
    state: &'s State<'ctx>,
    cfg: MemConfig,
    pub blocks_val: Array<'ctx>,
    pub last_bid: u64,
    pub last_idx_ptr: u64,
}

impl<'s, 'ctx> Memory<'s, 'ctx> {
    /// Fresh heap in which every local-block byte is poison and non-local
    /// contents are unconstrained.
    pub fn new(ctx: &'ctx Context, state: &'s State<'ctx>, cfg: MemConfig) -> Self {
        debug_assert!(cfg.bits_for_offset <= cfg.bits_size_t);
        let blocks_val = z3_ext::mk_val_array(ctx, "blks_val", cfg.ptr_bits(), 9);
        let mut mem = Self {
            ctx,
            state,
            cfg,
            blocks_val,
            last_bid: 0,
            last_idx_ptr: 0,
        };
        let init = {
            let idx = Pointer::from_name(&mem, "#idx0");
            let poison = BV::from_u64(ctx, 0, 9);
            let body = idx
                .is_local()
                .ite(&poison, &z3_ext::select_bv(&mem.blocks_val, idx.term()));
            z3_ext::mk_lambda(ctx, idx.term(), &body)
        };
        mem.blocks_val = init;
        mem
    }

    pub fn ctx(&self) -> &'ctx Context {
        self.ctx
    }

    pub fn state(&self) -> &'s State<'ctx> {
        self.state
    }

    pub fn cfg(&self) -> MemConfig {
        self.cfg
    }

    /// Run-qualified UF name: `_src` or `_tgt` by the state's flag.
    pub fn mk_name(&self, base: &str) -> String {
        format!(
            "{}_{}",
            base,
            if self.state.is_source() { "src" } else { "tgt" }
        )
    }

    /// Symbolic non-local pointer for a function input: a fresh variable
    /// split into offset (high) and non-local bid (low), with the local id
    /// forced to zero. Returns the encoded pointer together with the fresh
    /// variables it introduced.
    pub fn mk_input(&self, name: &str) -> (BV<'ctx>, Vec<BV<'ctx>>) {
        let bits = self.cfg.bits_for_nonlocal_bid + self.cfg.bits_for_offset;
        let var = BV::new_const(self.ctx, name, bits);
        let offset = var.extract(bits - 1, self.cfg.bits_for_nonlocal_bid);
        let bid = var.extract(self.cfg.bits_for_nonlocal_bid - 1, 0);
        let local_bid = BV::from_u64(self.ctx, 0, self.cfg.bits_for_local_bid);
        let ptr = Pointer::from_parts(self, &offset, &local_bid, &bid);
        (ptr.into_term(), vec![var])
    }

    /// Mint a block and constrain its base and size. Alignment and declared
    /// size are assumptions about the environment, not UB.
    pub fn alloc(&mut self, bytes: &BV<'ctx>, align: u64, local: bool) -> BV<'ctx> {
        self.last_bid += 1;
        tracing::debug!(bid = self.last_bid, local, align, "alloc");
        let ptr = Pointer::from_bid(self, self.last_bid, local);
        self.state.add_pre(ptr.is_aligned(align));
        let size = z3_ext::zext_or_trunc(bytes, self.cfg.bits_size_t);
        self.state.add_pre(ptr.block_size()._eq(&size));
        ptr.into_term()
    }

    /// Deallocation stub; the block stays allocated.
    pub fn free(&mut self, _ptr: &BV<'ctx>) {
        // TODO: track liveness so dereferencing a freed block becomes UB.
        tracing::debug!("free is not modeled");
    }

    /// Store a typed value at `p`, little-endian, one 9-bit cell per byte.
    pub fn store(
        &mut self,
        p: &BV<'ctx>,
        v: &StateValue<'ctx>,
        ty: &dyn ValueType<'ctx>,
        align: u64,
    ) {
        let val = ty.to_bv(v.clone());
        let bits = val.value.get_size();
        let bytes = bits.div_ceil(8);
        let value = z3_ext::zext_or_trunc(&val.value, bytes * 8);
        let non_poison = z3_ext::bool_to_bv(self.ctx, &val.non_poison);

        let mut blocks = self.blocks_val.clone();
        {
            let ptr = Pointer::from_term(self, p.clone());
            ptr.is_dereferenceable_u64(u64::from(bytes), align);
            for i in 0..bytes {
                let data = value.extract((i + 1) * 8 - 1, i * 8);
                let cell = non_poison.concat(&data);
                let p_i = ptr.add_u64(u64::from(i)).into_term();
                blocks = blocks.store(&p_i, &cell);
            }
        }
        self.blocks_val = blocks;
    }

    /// Load a typed value at `p`. Bytes are reassembled little-endian, the
    /// concatenation is truncated to the type's width, and the non-poison
    /// bits of the participating bytes are or-ed into the result's flag.
    pub fn load(&self, p: &BV<'ctx>, ty: &dyn ValueType<'ctx>, align: u64) -> StateValue<'ctx> {
        let bits = ty.bits();
        let bytes = bits.div_ceil(8);
        let ptr = Pointer::from_term(self, p.clone());
        ptr.is_dereferenceable_u64(u64::from(bytes), align);

        let mut value: Option<BV<'ctx>> = None;
        let mut non_poison: Option<BV<'ctx>> = None;
        for i in 0..bytes {
            let p_i = ptr.add_u64(u64::from(i)).into_term();
            let cell = z3_ext::select_bv(&self.blocks_val, &p_i);
            let v = cell.extract(7, 0);
            let np = cell.extract(8, 8);
            value = Some(match value {
                Some(acc) => v.concat(&acc),
                None => v,
            });
            non_poison = Some(match non_poison {
                Some(acc) => np.bvor(&acc),
                None => np,
            });
        }
        let value = z3_ext::trunc(&value.expect("typed loads span at least one byte"), bits);
        let non_poison = non_poison
            .expect("typed loads span at least one byte")
            ._eq(&BV::from_u64(self.ctx, 1, 1));
        ty.from_bv(StateValue::new(value, non_poison))
    }

    /// Fill `bytes` bytes at `p` with one value cell. Ground lengths up to
    /// four unroll into stores; anything else becomes a lambda over a fresh
    /// index pointer.
    pub fn memset(&mut self, p: &BV<'ctx>, val: &StateValue<'ctx>, bytes: &BV<'ctx>, align: u64) {
        let cell = z3_ext::bool_to_bv(self.ctx, &val.non_poison).concat(&val.value);
        debug_assert_eq!(cell.get_size(), 9);

        match z3_ext::as_const_u64(bytes) {
            Some(n) if n <= 4 => {
                tracing::trace!(n, "memset unrolled");
                let mut blocks = self.blocks_val.clone();
                {
                    let ptr = Pointer::from_term(self, p.clone());
                    ptr.is_dereferenceable(bytes, align);
                    for i in 0..n {
                        let p_i = ptr.add_u64(i).into_term();
                        blocks = blocks.store(&p_i, &cell);
                    }
                }
                self.blocks_val = blocks;
            }
            _ => {
                tracing::trace!("memset via lambda");
                let name = format!("#idx_{}", self.last_idx_ptr);
                self.last_idx_ptr += 1;
                let blocks = self.blocks_val.clone();
                let updated = {
                    let ptr = Pointer::from_term(self, p.clone());
                    ptr.is_dereferenceable(bytes, align);
                    let idx = Pointer::from_name(self, &name);
                    let in_range = Bool::and(
                        self.ctx,
                        &[&idx.uge(&ptr).both(), &idx.ult(&ptr.add(bytes)).both()],
                    );
                    let body = in_range.ite(&cell, &z3_ext::select_bv(&blocks, idx.term()));
                    z3_ext::mk_lambda(self.ctx, idx.term(), &body)
                };
                self.blocks_val = updated;
            }
        }
    }

    /// Copy `bytes` bytes from `s` to `d`. Without move semantics the two
    /// ranges must be disjoint, emitted as UB. Reads always resolve against
    /// the pre-copy heap, so move semantics are well-defined on overlapping
    /// ranges.
    pub fn memcpy(
        &mut self,
        d: &BV<'ctx>,
        s: &BV<'ctx>,
        bytes: &BV<'ctx>,
        align_dst: u64,
        align_src: u64,
        is_move: bool,
    ) {
        match z3_ext::as_const_u64(bytes) {
            Some(n) if n <= 4 => {
                tracing::trace!(n, "memcpy unrolled");
                let snapshot = self.blocks_val.clone();
                let mut blocks = self.blocks_val.clone();
                {
                    let dst = Pointer::from_term(self, d.clone());
                    let src = Pointer::from_term(self, s.clone());
                    dst.is_dereferenceable(bytes, align_dst);
                    src.is_dereferenceable(bytes, align_src);
                    if !is_move {
                        src.is_disjoint(bytes, &dst, bytes);
                    }
                    for i in 0..n {
                        let src_i = src.add_u64(i).into_term();
                        let dst_i = dst.add_u64(i).into_term();
                        blocks = blocks.store(&dst_i, &snapshot.select(&src_i));
                    }
                }
                self.blocks_val = blocks;
            }
            _ => {
                tracing::trace!("memcpy via lambda");
                let name = format!("#idx_{}", self.last_idx_ptr);
                self.last_idx_ptr += 1;
                let blocks = self.blocks_val.clone();
                let updated = {
                    let dst = Pointer::from_term(self, d.clone());
                    let src = Pointer::from_term(self, s.clone());
                    dst.is_dereferenceable(bytes, align_dst);
                    src.is_dereferenceable(bytes, align_src);
                    if !is_move {
                        src.is_disjoint(bytes, &dst, bytes);
                    }
                    let dst_idx = Pointer::from_name(self, &name);
                    let src_idx = src.add(&dst_idx.get_offset().bvsub(&dst.get_offset()));
                    let in_range = Bool::and(
                        self.ctx,
                        &[
                            &dst_idx.uge(&dst).both(),
                            &dst_idx.ult(&dst.add(bytes)).both(),
                        ],
                    );
                    let body = in_range.ite(
                        &z3_ext::select_bv(&blocks, src_idx.term()),
                        &z3_ext::select_bv(&blocks, dst_idx.term()),
                    );
                    z3_ext::mk_lambda(self.ctx, dst_idx.term(), &body)
                };
                self.blocks_val = updated;
            }
        }
    }

    /// Numeric address of an encoded pointer.
    pub fn ptr2int(&self, ptr: &BV<'ctx>) -> BV<'ctx> {
        Pointer::from_term(self, ptr.clone()).get_address()
    }

    /// Integer-to-pointer is not modeled: the block identity behind an
    /// address is unrecoverable here, so every cast lands on the null
    /// pointer.
    pub fn int2ptr(&self, _val: &BV<'ctx>) -> BV<'ctx> {
        tracing::debug!("int2ptr is not modeled, yielding the null pointer");
        Pointer::from_bid(self, 0, false).into_term()
    }

    /// Join-point merge. Both heaps must live under one state; counters
    /// take the max so ids minted after the join are fresh with respect to
    /// either branch.
    pub fn merge(
        cond: &Bool<'ctx>,
        then: &Memory<'s, 'ctx>,
        els: &Memory<'s, 'ctx>,
    ) -> Memory<'s, 'ctx> {
        assert!(
            std::ptr::eq(then.state, els.state),
            "merged heaps must share a verification state"
        );
        // TODO: thread the bid allocator through the state instead; two
        // branches that each mint id k produce distinct blocks behind one
        // symbolic identifier.
        let mut out = then.clone();
        out.blocks_val = cond.ite(&then.blocks_val, &els.blocks_val);
        out.last_bid = then.last_bid.max(els.last_bid);
        out.last_idx_ptr = then.last_idx_ptr.max(els.last_idx_ptr);
        tracing::trace!(last_bid = out.last_bid, "heap merge");
        out
    }
}
