//! x86-64 template JIT.
//!
//! Same shape as the AArch64 translator: one pass over the image emitting
//! per-opcode templates, then a replay pass for branch sites whose targets
//! were unmapped. Encoders compose REX prefix, opcode bytes, ModR/M, an
//! optional SIB byte, and displacement/immediate fields directly.

mod enc;
mod engine;
mod regs;
mod translate;

pub use engine::X8664Jit;
