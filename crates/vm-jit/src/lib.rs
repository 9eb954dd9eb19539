//! Shared plumbing for the template JITs.
//!
//! Everything here is architecture-neutral: mapped text/data regions, the
//! bounds-checked emission cursor, the guest-offset address maps, the
//! deferred-site queue, the host-state block the emitted code points into,
//! and the debug disassembly side channel. The per-architecture crates
//! own the encoders and translation templates.

mod code;
mod dump;
mod host;
mod jit;
mod map;
mod mem;

pub use code::CodeBuffer;
pub use jit::JitCore;
pub use dump::DumpFormat;
pub use host::{HostState, sys_enter};
pub use map::{AddrMap, DeferredSite};
pub use mem::{JitMemory, Mapping};
