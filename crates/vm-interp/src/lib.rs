//! Dispatch-loop interpreter for the register VM.
//!
//! Executes the program image directly from guest memory: decode, mutate
//! register and memory state, advance PC, repeat. One `match` dispatch per
//! instruction.

mod interp;

pub use interp::Interpreter;
