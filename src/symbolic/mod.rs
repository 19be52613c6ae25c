pub mod memory;
pub mod pointer;
pub mod state;
pub mod value;
pub mod z3_ext;

pub use memory::Memory;
pub use pointer::Pointer;
pub use state::State;
pub use value::{IntType, StateValue, ValueType};
