//! Engine facade: pick an engine, size guest memory, run a program.
//!
//! The Rust-facing surface is [`run_program`]; embedders link against the
//! C-callable [`vm_run`], which maps any error to a one-line diagnostic
//! and a process abort. Errors are never recoverable (see `vm_core`).

use vm_core::Engine;
pub use vm_core::{RegisterDump, VmError};
pub use vm_interp::Interpreter;
pub use vm_jit_aarch64::Aarch64Jit;
pub use vm_jit_x86_64::X8664Jit;

/// Which engine variant executes the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EngineKind {
    /// Direct interpretation.
    Interpreter = 1,
    /// Ahead-of-execution translation to AArch64.
    Aarch64Jit = 2,
    /// Ahead-of-execution translation to x86-64.
    X8664Jit = 3,
}

impl EngineKind {
    /// Map the wire id used by the C entry point.
    pub fn from_id(id: u8) -> Result<Self, VmError> {
        match id {
            1 => Ok(Self::Interpreter),
            2 => Ok(Self::Aarch64Jit),
            3 => Ok(Self::X8664Jit),
            _ => Err(VmError::UnknownEngine(id)),
        }
    }
}

/// Configuration for one run.
#[derive(Debug, Clone, Copy)]
pub struct VmConfig {
    /// Requested guest memory in MiB; rounded up to a power of two, at
    /// least 4.
    pub memory_mib: usize,
    /// Engine variant.
    pub engine: EngineKind,
    /// Enable the decode trace and the JIT disassembly side channel.
    pub debug: bool,
}

/// Round a requested MiB count to the granted size: the next power of two
/// no smaller than 4.
#[must_use]
pub fn adjust_memory_mib(mib: usize) -> usize {
    mib.max(4).next_power_of_two()
}

/// Run `prog` to completion and return the final registers.
pub fn run_program(prog: &[u8], config: &VmConfig) -> Result<RegisterDump, VmError> {
    let mem_size = adjust_memory_mib(config.memory_mib) << 20;
    match config.engine {
        EngineKind::Interpreter => Interpreter::new(prog, mem_size, config.debug).run(),
        EngineKind::Aarch64Jit => Aarch64Jit::new(prog, mem_size, config.debug).run(),
        EngineKind::X8664Jit => X8664Jit::new(prog, mem_size, config.debug).run(),
    }
}

/// C-callable entry point.
///
/// `engine` is 1 for the interpreter, 2 for the AArch64 JIT, 3 for the
/// x86-64 JIT. Any failure prints a single-line diagnostic and aborts the
/// process.
///
/// # Safety
///
/// `prog` must point to `prog_size` readable bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn vm_run(
    prog: *const u8,
    prog_size: usize,
    mem_size_mib: usize,
    engine: u8,
    debug: bool,
) {
    // SAFETY: caller contract.
    let prog = unsafe { std::slice::from_raw_parts(prog, prog_size) };

    let result = EngineKind::from_id(engine).and_then(|kind| {
        let config = VmConfig { memory_mib: mem_size_mib, engine: kind, debug };
        run_program(prog, &config)
    });
    if let Err(err) = result {
        eprintln!("[ERROR] {err}");
        std::process::abort();
    }
}
