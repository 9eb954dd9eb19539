//! Execution engine lifecycle.

use crate::error::VmError;

/// Final register file snapshot, observable after a run.
///
/// `stack_used` reports the distance between the initial stack top and the
/// final SP rather than the raw SP value: under a JIT the stack pointer
/// holds a host address, under the interpreter a byte offset, and only the
/// depth is comparable across engines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegisterDump {
    /// General-purpose registers R0..R12.
    pub r: [u64; 13],
    /// Bytes of guest stack in use at exit.
    pub stack_used: u64,
}

/// An execution engine.
///
/// Every engine runs the same four-phase lifecycle: acquire resources,
/// bring the program into executable form, execute it, release resources.
/// For the interpreter "load" copies the image into guest memory; for a
/// JIT it translates the whole image ahead of execution.
pub trait Engine {
    /// Acquire guest memory and any engine state.
    fn init(&mut self) -> Result<(), VmError>;

    /// Make the program executable (copy or translate).
    fn load(&mut self) -> Result<(), VmError>;

    /// Run the guest until it issues VM_EXIT.
    fn exec(&mut self) -> Result<(), VmError>;

    /// Release guest memory. The register dump must survive this.
    fn fini(&mut self) -> Result<(), VmError>;

    /// Final registers. Meaningful once `fini` has completed.
    fn registers(&self) -> RegisterDump;

    /// Drive the full lifecycle and return the final registers.
    fn run(&mut self) -> Result<RegisterDump, VmError> {
        self.init()?;
        self.load()?;
        self.exec()?;
        self.fini()?;
        Ok(self.registers())
    }
}
