//! Architecture-neutral engine state shared by both translators.

use log::debug;

use vm_core::{Decoded, RegisterDump, VmError, reg};

use crate::code::CodeBuffer;
use crate::dump::{self, DumpFormat};
use crate::host::{HostState, sys_enter};
use crate::map::{AddrMap, DeferredSite};
use crate::mem::JitMemory;

/// Common state of a JIT engine: the program image, the mapped regions,
/// the emission cursor, both address maps, the deferred queue, and the
/// host-state block.
///
/// The per-architecture engines own one of these and drive it through the
/// usual four phases; all pointer-level bookkeeping stays in this crate.
pub struct JitCore<'a> {
    prog: &'a [u8],
    mem_size: usize,
    debug: bool,
    mem: Option<JitMemory>,
    buf: Option<CodeBuffer>,
    map: AddrMap,
    deferred: Vec<DeferredSite>,
    state: Box<HostState>,
    guest_pos: u64,
    stub_addr: u64,
    stack_top: u64,
    dump: RegisterDump,
}

impl<'a> JitCore<'a> {
    /// Record configuration; nothing is mapped until [`JitCore::init`].
    #[must_use]
    pub fn new(prog: &'a [u8], mem_size: usize, debug: bool) -> Self {
        debug!("Initializing VM with:");
        debug!("\tprogram size {}", prog.len());
        debug!("\tmemory 0x{mem_size:x} bytes");
        Self {
            prog,
            mem_size,
            debug,
            mem: None,
            buf: None,
            map: AddrMap::new(prog.len()),
            deferred: Vec::new(),
            state: HostState::boxed(),
            guest_pos: 0,
            stub_addr: 0,
            stack_top: 0,
            dump: RegisterDump::default(),
        }
    }

    /// Map the text and data regions and point the emission cursor at the
    /// start of text.
    pub fn init(&mut self) -> Result<(), VmError> {
        let mem = JitMemory::map(self.mem_size)?;
        self.stack_top = mem.stack_top();
        // SAFETY: the text mapping stays alive for the life of the engine;
        // the buffer is dropped in fini before the mapping is released.
        self.buf = Some(unsafe { CodeBuffer::new(mem.text.base(), mem.text.len()) });
        self.mem = Some(mem);
        Ok(())
    }

    /// The program image being translated.
    #[must_use]
    pub fn prog(&self) -> &'a [u8] {
        self.prog
    }

    /// Whether the debug side channels are enabled.
    #[must_use]
    pub fn debug(&self) -> bool {
        self.debug
    }

    /// The emission cursor.
    pub fn code(&mut self) -> &mut CodeBuffer {
        self.buf.as_mut().expect("init has run")
    }

    /// Everything emitted so far. Valid between `init` and `fini`.
    #[must_use]
    pub fn emitted(&self) -> &[u8] {
        self.buf.as_ref().expect("init has run").emitted()
    }

    /// Host address of the start of the text region.
    #[must_use]
    pub fn text_base(&self) -> u64 {
        self.buf.as_ref().expect("init has run").addr_at(0)
    }

    /// Guest cursor: image offset of the next instruction to translate.
    #[must_use]
    pub fn guest_pos(&self) -> u64 {
        self.guest_pos
    }

    /// Move the guest cursor (deferred replay and stub emission).
    pub fn set_guest_pos(&mut self, pos: u64) {
        self.guest_pos = pos;
    }

    /// Advance the guest cursor past a translated instruction.
    pub fn advance_guest(&mut self, len: u64) {
        self.guest_pos += len;
    }

    /// Record `va→aa` for the instruction about to be translated.
    pub fn record_mapping(&mut self) {
        let aa = self.code().addr();
        let va = self.guest_pos;
        self.map.record(va, aa);
    }

    /// Record the decode of a finished translation.
    pub fn record_decoded(&mut self, d: Decoded) {
        self.map.record_decoded(d);
    }

    /// Host address of the translation at `va`, if already mapped.
    #[must_use]
    pub fn host_addr(&self, va: u64) -> Option<u64> {
        self.map.host_addr(va)
    }

    /// The address maps.
    #[must_use]
    pub fn map(&self) -> &AddrMap {
        &self.map
    }

    /// Queue a deferred site.
    pub fn push_deferred(&mut self, site: DeferredSite) {
        self.deferred.push(site);
    }

    /// Drain the deferred queue for the replay pass.
    pub fn take_deferred(&mut self) -> Vec<DeferredSite> {
        std::mem::take(&mut self.deferred)
    }

    /// Host address of the emitted syscall trampoline.
    #[must_use]
    pub fn stub_addr(&self) -> u64 {
        self.stub_addr
    }

    /// Record the trampoline address once emitted.
    pub fn set_stub_addr(&mut self, addr: u64) {
        self.stub_addr = addr;
    }

    /// Initial guest stack pointer (top of the data region).
    #[must_use]
    pub fn stack_top(&self) -> u64 {
        self.stack_top
    }

    /// Address of the native syscall helper the trampoline calls.
    #[must_use]
    pub fn sys_enter_addr(&self) -> u64 {
        sys_enter as usize as u64
    }

    /// The host-state block the emitted code points into.
    #[must_use]
    pub fn state(&self) -> &HostState {
        &self.state
    }

    /// Enable writes to the text region for emission.
    pub fn begin_emit(&mut self) {
        self.memory().set_text_writable(true);
    }

    /// Seal the text region and invalidate the instruction cache.
    pub fn end_emit(&mut self) {
        let mem = self.memory();
        mem.set_text_writable(false);
        mem.flush_icache();
    }

    /// Write the emitted code through the objdump side channel,
    /// interleaving guest instructions (debug only).
    pub fn dump_code(&mut self, fmt: &DumpFormat) -> Result<(), VmError> {
        let base = self.code().addr_at(0);
        let end = self.code().pos();
        let emitted = self.buf.as_ref().expect("init has run").emitted();
        debug!("JIT code dump ({end} bytes):");
        dump::dump_code(emitted, base, fmt, &self.map, self.prog)
    }

    /// Jump into the emitted block.
    ///
    /// `target` names the architecture the code was emitted for; running
    /// it on any other host is refused rather than crashed into.
    pub fn exec(&mut self, target: &'static str) -> Result<(), VmError> {
        if target != std::env::consts::ARCH {
            return Err(VmError::HostArchMismatch { target, host: std::env::consts::ARCH });
        }

        debug!("Running program ...");
        let base = self.memory().text.base();
        // SAFETY: the block was fully emitted for this architecture, the
        // icache has been flushed, and the entry sequence preserves the
        // host calling convention.
        let entry: extern "C" fn() = unsafe { std::mem::transmute(base) };
        entry();

        if self.debug {
            self.dump_registers();
        }
        Ok(())
    }

    /// Capture the register dump and release both regions.
    pub fn fini(&mut self) -> Result<(), VmError> {
        let mut dump = RegisterDump::default();
        dump.r.copy_from_slice(&self.state.reg_dump[..reg::NUM_GPRS]);
        dump.stack_used = self.stack_top.wrapping_sub(self.state.reg_dump[reg::NUM_GPRS]);
        self.dump = dump;

        self.buf = None;
        if let Some(mem) = self.mem.as_mut() {
            mem.release()?;
        }
        self.mem = None;
        Ok(())
    }

    /// Final registers, captured in [`JitCore::fini`].
    #[must_use]
    pub fn registers(&self) -> RegisterDump {
        self.dump
    }

    fn memory(&self) -> &JitMemory {
        self.mem.as_ref().expect("init has run")
    }

    fn dump_registers(&self) {
        debug!("Registers:");
        for (i, value) in self.state.reg_dump[..reg::NUM_GPRS].iter().enumerate() {
            debug!("\t{:5} = 0x{value:016x}", reg::NAMES[i].to_uppercase());
        }
        debug!("\tFLAGS = N/A");
        debug!("\tSP    = 0x{:016x}", self.state.reg_dump[reg::NUM_GPRS]);
        debug!("\tPC    = N/A");
    }
}
