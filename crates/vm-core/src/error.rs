//! Fatal VM errors.
//!
//! Nothing here is recoverable: once an engine reports an error the run is
//! over and no partial results are defined. The C entry point turns any of
//! these into a single-line diagnostic and a process abort.

use thiserror::Error;

/// Everything that can go fatally wrong while running a program.
#[derive(Debug, Error)]
pub enum VmError {
    /// An opcode outside the defined set was fetched.
    #[error("unsupported instruction 0x{bits:02x} at offset 0x{offset:x}")]
    UnknownInstruction {
        /// The 6-bit opcode field value.
        bits: u8,
        /// Image offset the fetch happened at.
        offset: u64,
    },

    /// A syscall id outside the defined set was passed to CALL 0.
    #[error("unsupported syscall id {0}")]
    UnknownSyscall(u64),

    /// VM_EXIT reached the display helper, which must never see it.
    #[error("internal error: VM_EXIT reached the syscall helper")]
    ExitInHelper,

    /// Anonymous mapping for a guest region failed.
    #[error("failed to allocate {0} VM memory")]
    MemoryMap(&'static str),

    /// Unmapping a guest region failed.
    #[error("failed to release {0} VM memory")]
    MemoryUnmap(&'static str),

    /// The engine id passed to `vm_run` is not one of the known engines.
    #[error("unsupported execution engine id {0}")]
    UnknownEngine(u8),

    /// Code was translated for one architecture on a host of another.
    #[error("cannot execute {target} code on a {host} host")]
    HostArchMismatch {
        /// Architecture the translator emitted for.
        target: &'static str,
        /// Architecture of the running host.
        host: &'static str,
    },

    /// The debug disassembly side channel hit an I/O failure.
    #[error("code dump failed: {0}")]
    Dump(#[from] std::io::Error),
}
