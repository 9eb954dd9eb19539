//! Host-side state the emitted code points into, and the native syscall
//! helper it calls.

use vm_core::{SYS_DISPLAY_SINT, SYS_DISPLAY_UINT, SYS_VM_EXIT, VmError};

/// Number of 64-bit slots in the register dump area: R0..R12 and SP.
pub const REG_DUMP_SLOTS: usize = 14;

/// Engine-owned storage with a stable heap address.
///
/// The emitted code embeds absolute addresses of these fields, so the
/// block is boxed once at engine construction and never moved. `host_sp`
/// and `vm_sp` are the stack-switch slots used by the x86-64 trampoline;
/// the dump area is written by the emitted exit path on both
/// architectures.
#[derive(Debug)]
#[repr(C)]
pub struct HostState {
    /// Saved host stack pointer across the whole guest run.
    pub host_sp: u64,
    /// Saved guest stack pointer across a native helper call.
    pub vm_sp: u64,
    /// Final VM registers, written by the emitted exit sequence.
    pub reg_dump: [u64; REG_DUMP_SLOTS],
}

impl HostState {
    /// Fresh zeroed state on the heap.
    #[must_use]
    pub fn boxed() -> Box<Self> {
        Box::new(Self { host_sp: 0, vm_sp: 0, reg_dump: [0; REG_DUMP_SLOTS] })
    }

    /// Address of the `host_sp` slot.
    #[must_use]
    pub fn host_sp_addr(&self) -> u64 {
        std::ptr::from_ref(&self.host_sp) as u64
    }

    /// Address of the `vm_sp` slot.
    #[must_use]
    pub fn vm_sp_addr(&self) -> u64 {
        std::ptr::from_ref(&self.vm_sp) as u64
    }

    /// Address of the first dump slot.
    #[must_use]
    pub fn reg_dump_addr(&self) -> u64 {
        self.reg_dump.as_ptr() as u64
    }
}

/// Native half of a guest syscall.
///
/// Called from the emitted trampoline with a pointer to the guest stack
/// top: `sp[0]` is the guest return address, `sp[1]` the syscall id,
/// `sp[2]` the argument. Handles the display syscalls, moves the return
/// address up over the consumed slots, and returns the adjusted stack
/// pointer. VM_EXIT never reaches this function (the trampoline filters
/// it); seeing it or an unknown id here is fatal, and fatal means abort —
/// this is called from emitted code and must not unwind.
///
/// # Safety
///
/// `sp` must point at least three valid 64-bit slots into the guest stack.
pub unsafe extern "C" fn sys_enter(sp: *mut u64) -> *mut u64 {
    // SAFETY: the trampoline passes the guest SP after a syscall CALL, so
    // the three frame slots are present per the syscall ABI.
    unsafe {
        match *sp.add(1) {
            SYS_VM_EXIT => fatal(&VmError::ExitInHelper),
            SYS_DISPLAY_SINT => println!("{}", *sp.add(2) as i64),
            SYS_DISPLAY_UINT => println!("{}", *sp.add(2)),
            id => fatal(&VmError::UnknownSyscall(id)),
        }
        *sp.add(2) = *sp;
        sp.add(2)
    }
}

fn fatal(err: &VmError) -> ! {
    eprintln!("[ERROR] {err}");
    std::process::abort()
}
