use thiserror::Error;

pub type Result<T> = std::result::Result<T, ModelError>;

/// Top-level error of the crate. Term construction never fails; the only
/// synchronous failure in this layer is constant folding.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("constant folding failed: {0}")]
    ConstFold(#[from] ConstFoldError),
}

/// Recoverable failure from the constant-expression folder. The enclosing
/// translator decides whether to keep the expression symbolic or abort the
/// function.
#[derive(Debug, Error)]
pub enum ConstFoldError {
    #[error("log2 applied to a non-constant operand: {0}")]
    NonConstantLog2(String),
    #[error("{func} expects {expected} argument(s), got {got}")]
    BadArity {
        func: &'static str,
        expected: usize,
        got: usize,
    },
}
