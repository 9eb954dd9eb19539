//! AArch64 template JIT.
//!
//! Translates the whole program image to AArch64 machine code in one pass,
//! with a second pass patching branch sites whose targets were still
//! unmapped the first time through. Every emitted instruction is a 32-bit
//! word assembled from named opcode masks; no external assembler.

mod enc;
mod engine;
mod regs;
mod translate;

pub use engine::Aarch64Jit;
