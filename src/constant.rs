//! Constant-expression sub-language folded alongside the memory model.
//!
//! Constants lower to a `(value, ub)` pair in the same term algebra as the
//! runtime operators, so folding agrees bit-for-bit with the heap encoding.
//! The pseudo-functions fold eagerly; a `log2` whose operand is not ground
//! is the crate's one recoverable failure.

use std::fmt;

use z3::ast::{Ast, Bool, BV};
use z3::Context;

use crate::error::ConstFoldError;
use crate::symbolic::state::State;
use crate::symbolic::value::StateValue;
use crate::symbolic::z3_ext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    SDiv,
    UDiv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstFn {
    Log2,
    Width,
}

/// A constant expression: a ground term, a binary operator over two
/// constants, or a pseudo-function call.
#[derive(Clone)]
pub enum Constant<'ctx> {
    Term(BV<'ctx>),
    BinOp {
        op: BinOp,
        lhs: Box<Constant<'ctx>>,
        rhs: Box<Constant<'ctx>>,
    },
    Fn {
        func: ConstFn,
        args: Vec<Constant<'ctx>>,
    },
}

impl<'ctx> Constant<'ctx> {
    /// Lower to `(value, ub)`: `ub` is true exactly when evaluating the
    /// expression is undefined (division by zero, signed division
    /// overflow), accumulated as a disjunction over the operand subtrees.
    pub fn to_smt(&self, ctx: &'ctx Context) -> Result<(BV<'ctx>, Bool<'ctx>), ConstFoldError> {
        match self {
            Constant::Term(bv) => Ok((bv.clone(), Bool::from_bool(ctx, false))),
            Constant::BinOp { op, lhs, rhs } => {
                let (lv, lub) = lhs.to_smt(ctx)?;
                let (rv, rub) = rhs.to_smt(ctx)?;
                let value = match op {
                    BinOp::Add => lv.bvadd(&rv),
                    BinOp::Sub => lv.bvsub(&rv),
                    BinOp::SDiv => lv.bvsdiv(&rv),
                    BinOp::UDiv => lv.bvudiv(&rv),
                };
                let zero = BV::from_u64(ctx, 0, rv.get_size());
                let op_ub = match op {
                    BinOp::Add | BinOp::Sub => Bool::from_bool(ctx, false),
                    BinOp::SDiv => Bool::or(
                        ctx,
                        &[&rv._eq(&zero), &lv.bvsdiv_no_overflow(&rv).not()],
                    ),
                    BinOp::UDiv => rv._eq(&zero),
                };
                Ok((value, Bool::or(ctx, &[&lub, &rub, &op_ub])))
            }
            Constant::Fn { func, args } => fold_fn(ctx, *func, args),
        }
    }

    /// Evaluate under `state`: the no-UB requirement is asserted into the
    /// state and the resulting value is unconditionally non-poison.
    pub fn to_state_value(&self, state: &State<'ctx>) -> Result<StateValue<'ctx>, ConstFoldError> {
        let (value, ub) = self.to_smt(state.ctx())?;
        state.add_ub(ub.not());
        Ok(StateValue::new(value, Bool::from_bool(state.ctx(), true)))
    }
}

fn fold_fn<'ctx>(
    ctx: &'ctx Context,
    func: ConstFn,
    args: &[Constant<'ctx>],
) -> Result<(BV<'ctx>, Bool<'ctx>), ConstFoldError> {
    match func {
        ConstFn::Log2 => {
            let [arg] = args else {
                return Err(ConstFoldError::BadArity {
                    func: "log2",
                    expected: 1,
                    got: args.len(),
                });
            };
            let (v, _) = arg.to_smt(ctx)?;
            let n = z3_ext::as_const_u64(&v)
                .ok_or_else(|| ConstFoldError::NonConstantLog2(v.to_string()))?;
            let folded = if n == 0 { 0 } else { u64::from(n.ilog2()) };
            Ok((
                BV::from_u64(ctx, folded, v.get_size()),
                Bool::from_bool(ctx, false),
            ))
        }
        ConstFn::Width => {
            let [arg] = args else {
                return Err(ConstFoldError::BadArity {
                    func: "width",
                    expected: 1,
                    got: args.len(),
                });
            };
            let (v, _) = arg.to_smt(ctx)?;
            Ok((
                BV::from_u64(ctx, u64::from(v.get_size()), v.get_size()),
                Bool::from_bool(ctx, false),
            ))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Sle,
    Slt,
    Sge,
    Sgt,
    Ule,
    Ult,
    Uge,
    Ugt,
}

/// Boolean predicate over constant operands; leaves are comparisons whose
/// signedness is fixed by the tag.
#[derive(Clone)]
pub enum Predicate<'ctx> {
    Bool {
        op: BoolOp,
        lhs: Box<Predicate<'ctx>>,
        rhs: Box<Predicate<'ctx>>,
    },
    Cmp {
        op: CmpOp,
        lhs: Constant<'ctx>,
        rhs: Constant<'ctx>,
    },
}

impl<'ctx> Predicate<'ctx> {
    pub fn to_smt(&self, ctx: &'ctx Context) -> Result<Bool<'ctx>, ConstFoldError> {
        match self {
            Predicate::Bool { op, lhs, rhs } => {
                let l = lhs.to_smt(ctx)?;
                let r = rhs.to_smt(ctx)?;
                Ok(match op {
                    BoolOp::And => Bool::and(ctx, &[&l, &r]),
                    BoolOp::Or => Bool::or(ctx, &[&l, &r]),
                })
            }
            Predicate::Cmp { op, lhs, rhs } => {
                let (l, _) = lhs.to_smt(ctx)?;
                let (r, _) = rhs.to_smt(ctx)?;
                Ok(match op {
                    CmpOp::Eq => l._eq(&r),
                    CmpOp::Ne => l._eq(&r).not(),
                    CmpOp::Sle => l.bvsle(&r),
                    CmpOp::Slt => l.bvslt(&r),
                    CmpOp::Sge => l.bvsge(&r),
                    CmpOp::Sgt => l.bvsgt(&r),
                    CmpOp::Ule => l.bvule(&r),
                    CmpOp::Ult => l.bvult(&r),
                    CmpOp::Uge => l.bvuge(&r),
                    CmpOp::Ugt => l.bvugt(&r),
                })
            }
        }
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::SDiv => "sdiv",
            BinOp::UDiv => "udiv",
        })
    }
}

impl fmt::Display for ConstFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConstFn::Log2 => "log2",
            ConstFn::Width => "width",
        })
    }
}

impl fmt::Display for Constant<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Term(bv) => write!(f, "{bv}"),
            Constant::BinOp { op, lhs, rhs } => write!(f, "({op} {lhs} {rhs})"),
            Constant::Fn { func, args } => {
                write!(f, "{func}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
        }
    }
}

impl fmt::Display for BoolOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BoolOp::And => "&&",
            BoolOp::Or => "||",
        })
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Sle => "<=s",
            CmpOp::Slt => "<s",
            CmpOp::Sge => ">=s",
            CmpOp::Sgt => ">s",
            CmpOp::Ule => "<=u",
            CmpOp::Ult => "<u",
            CmpOp::Uge => ">=u",
            CmpOp::Ugt => ">u",
        })
    }
}

impl fmt::Display for Predicate<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Bool { op, lhs, rhs } => write!(f, "({lhs} {op} {rhs})"),
            Predicate::Cmp { op, lhs, rhs } => write!(f, "({lhs} {op} {rhs})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConstFoldError;
    use z3::Config;

    fn term(ctx: &Context, v: u64, bits: u32) -> Constant<'_> {
        Constant::Term(BV::from_u64(ctx, v, bits))
    }

    fn binop<'ctx>(op: BinOp, lhs: Constant<'ctx>, rhs: Constant<'ctx>) -> Constant<'ctx> {
        Constant::BinOp {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    #[test]
    fn test_add_sub_fold_without_ub() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);

        let e = binop(BinOp::Add, term(&ctx, 40, 32), term(&ctx, 2, 32));
        let (v, ub) = e.to_smt(&ctx).unwrap();
        assert_eq!(z3_ext::as_const_u64(&v), Some(42));
        assert_eq!(ub.simplify().as_bool(), Some(false));

        let e = binop(BinOp::Sub, term(&ctx, 2, 32), term(&ctx, 3, 32));
        let (v, ub) = e.to_smt(&ctx).unwrap();
        assert_eq!(z3_ext::as_const_u64(&v), Some(0xFFFF_FFFF));
        assert_eq!(ub.simplify().as_bool(), Some(false));
    }

    #[test]
    fn test_udiv_by_zero_is_ub() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);

        let e = binop(BinOp::UDiv, term(&ctx, 7, 8), term(&ctx, 0, 8));
        let (_, ub) = e.to_smt(&ctx).unwrap();
        assert_eq!(ub.simplify().as_bool(), Some(true));

        let e = binop(BinOp::UDiv, term(&ctx, 7, 8), term(&ctx, 2, 8));
        let (v, ub) = e.to_smt(&ctx).unwrap();
        assert_eq!(z3_ext::as_const_u64(&v), Some(3));
        assert_eq!(ub.simplify().as_bool(), Some(false));
    }

    #[test]
    fn test_sdiv_overflow_is_ub() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);

        // INT8_MIN / -1 overflows.
        let e = binop(BinOp::SDiv, term(&ctx, 0x80, 8), term(&ctx, 0xFF, 8));
        let (_, ub) = e.to_smt(&ctx).unwrap();
        assert_eq!(ub.simplify().as_bool(), Some(true));

        let e = binop(BinOp::SDiv, term(&ctx, 0x80, 8), term(&ctx, 2, 8));
        let (v, ub) = e.to_smt(&ctx).unwrap();
        assert_eq!(z3_ext::as_const_u64(&v), Some(0xC0));
        assert_eq!(ub.simplify().as_bool(), Some(false));
    }

    #[test]
    fn test_ub_propagates_from_operands() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);

        let div0 = binop(BinOp::UDiv, term(&ctx, 1, 8), term(&ctx, 0, 8));
        let e = binop(BinOp::Add, div0, term(&ctx, 1, 8));
        let (_, ub) = e.to_smt(&ctx).unwrap();
        assert_eq!(ub.simplify().as_bool(), Some(true));
    }

    #[test]
    fn test_log2_folds_ground_operands() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);

        let e = Constant::Fn {
            func: ConstFn::Log2,
            args: vec![term(&ctx, 8, 32)],
        };
        let (v, _) = e.to_smt(&ctx).unwrap();
        assert_eq!(z3_ext::as_const_u64(&v), Some(3));
        assert_eq!(v.get_size(), 32);

        // Folds through a foldable operand too.
        let e = Constant::Fn {
            func: ConstFn::Log2,
            args: vec![binop(BinOp::Add, term(&ctx, 30, 32), term(&ctx, 2, 32))],
        };
        let (v, _) = e.to_smt(&ctx).unwrap();
        assert_eq!(z3_ext::as_const_u64(&v), Some(5));
    }

    #[test]
    fn test_log2_of_symbolic_operand_fails() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);

        let e = Constant::Fn {
            func: ConstFn::Log2,
            args: vec![Constant::Term(BV::new_const(&ctx, "n", 32))],
        };
        assert!(matches!(
            e.to_smt(&ctx),
            Err(ConstFoldError::NonConstantLog2(_))
        ));
    }

    #[test]
    fn test_width_folds_structurally() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);

        // Width needs no ground operand.
        let e = Constant::Fn {
            func: ConstFn::Width,
            args: vec![Constant::Term(BV::new_const(&ctx, "n", 24))],
        };
        let (v, ub) = e.to_smt(&ctx).unwrap();
        assert_eq!(z3_ext::as_const_u64(&v), Some(24));
        assert_eq!(ub.simplify().as_bool(), Some(false));
    }

    #[test]
    fn test_fn_arity_is_checked() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);

        let e = Constant::Fn {
            func: ConstFn::Log2,
            args: vec![term(&ctx, 1, 8), term(&ctx, 2, 8)],
        };
        assert!(matches!(
            e.to_smt(&ctx),
            Err(ConstFoldError::BadArity { func: "log2", .. })
        ));
    }

    #[test]
    fn test_predicates_fold_by_signedness() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);

        // 0xFF is -1 signed, 255 unsigned.
        let slt = Predicate::Cmp {
            op: CmpOp::Slt,
            lhs: term(&ctx, 0xFF, 8),
            rhs: term(&ctx, 1, 8),
        };
        assert_eq!(slt.to_smt(&ctx).unwrap().simplify().as_bool(), Some(true));

        let ult = Predicate::Cmp {
            op: CmpOp::Ult,
            lhs: term(&ctx, 0xFF, 8),
            rhs: term(&ctx, 1, 8),
        };
        assert_eq!(ult.to_smt(&ctx).unwrap().simplify().as_bool(), Some(false));

        let both = Predicate::Bool {
            op: BoolOp::And,
            lhs: Box::new(slt),
            rhs: Box::new(ult),
        };
        assert_eq!(both.to_smt(&ctx).unwrap().simplify().as_bool(), Some(false));
    }

    #[test]
    fn test_to_state_value_asserts_no_ub() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let state = State::new(&ctx, true);

        let div0 = binop(BinOp::UDiv, term(&ctx, 1, 8), term(&ctx, 0, 8));
        let sv = div0.to_state_value(&state).unwrap();
        assert_eq!(sv.non_poison.simplify().as_bool(), Some(true));
        // The recorded UB condition is the negated (true) UB, hence false.
        assert_eq!(state.ub_condition().simplify().as_bool(), Some(false));
    }

    #[test]
    fn test_display_renders_nested_expressions() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);

        let e = binop(
            BinOp::Add,
            term(&ctx, 1, 8),
            Constant::Fn {
                func: ConstFn::Log2,
                args: vec![term(&ctx, 16, 8)],
            },
        );
        let s = format!("{e}");
        assert!(s.starts_with("(add "));
        assert!(s.contains("log2("));
    }
}
