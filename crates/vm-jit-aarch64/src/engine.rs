//! The AArch64 JIT engine.

use log::debug;

use vm_core::{Engine, RegisterDump, VmError};
use vm_jit::{DumpFormat, JitCore};

use crate::translate;

const DUMP_FORMAT: DumpFormat = DumpFormat { machine: "aarch64", options: &[] };

/// Translates the program to AArch64 code at load time and jumps into it.
pub struct Aarch64Jit<'a> {
    core: JitCore<'a>,
}

impl<'a> Aarch64Jit<'a> {
    /// Create an engine for `prog` with `mem_size` bytes of guest memory.
    #[must_use]
    pub fn new(prog: &'a [u8], mem_size: usize, debug: bool) -> Self {
        debug!("\ttype 'AArch64 JIT'");
        Self { core: JitCore::new(prog, mem_size, debug) }
    }

    /// The translation-side state, for inspection in tests.
    #[must_use]
    pub fn core(&self) -> &JitCore<'a> {
        &self.core
    }
}

impl Engine for Aarch64Jit<'_> {
    fn init(&mut self) -> Result<(), VmError> {
        self.core.init()
    }

    fn load(&mut self) -> Result<(), VmError> {
        self.core.begin_emit();
        translate::emit_block(&mut self.core)?;
        self.core.end_emit();
        if self.core.debug() {
            self.core.dump_code(&DUMP_FORMAT)?;
        }
        Ok(())
    }

    fn exec(&mut self) -> Result<(), VmError> {
        self.core.exec(translate::TARGET_ARCH)
    }

    fn fini(&mut self) -> Result<(), VmError> {
        self.core.fini()
    }

    fn registers(&self) -> RegisterDump {
        self.core.registers()
    }
}
