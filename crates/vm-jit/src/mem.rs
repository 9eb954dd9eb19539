//! Anonymous mappings for guest text and data.

use std::ptr;

use log::debug;

use vm_core::VmError;

/// One anonymous memory mapping.
pub struct Mapping {
    base: *mut u8,
    len: usize,
    label: &'static str,
}

impl Mapping {
    /// Map `len` bytes of anonymous memory, executable when asked.
    ///
    /// Executable mappings are requested read+write+execute; on macOS the
    /// `MAP_JIT` flag is added and writes are toggled per-thread around
    /// emission instead.
    pub fn anonymous(len: usize, executable: bool, label: &'static str) -> Result<Self, VmError> {
        let mut prot = libc::PROT_READ | libc::PROT_WRITE;
        #[allow(unused_mut)]
        let mut flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
        if executable {
            prot |= libc::PROT_EXEC;
            #[cfg(target_os = "macos")]
            {
                flags |= libc::MAP_JIT;
            }
        }

        // SAFETY: anonymous mapping with no fixed address; the kernel
        // picks the placement and the result is checked below.
        let base = unsafe { libc::mmap(ptr::null_mut(), len, prot, flags, -1, 0) };
        if base == libc::MAP_FAILED {
            return Err(VmError::MemoryMap(label));
        }
        Ok(Self { base: base.cast(), len, label })
    }

    /// Base address of the mapping.
    #[must_use]
    pub fn base(&self) -> *mut u8 {
        self.base
    }

    /// Mapping length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True once released.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.base.is_null()
    }

    /// Unmap, reporting failure.
    pub fn release(&mut self) -> Result<(), VmError> {
        if self.base.is_null() {
            return Ok(());
        }
        // SAFETY: base/len came from a successful mmap and are unmapped
        // exactly once.
        let rc = unsafe { libc::munmap(self.base.cast(), self.len) };
        self.base = ptr::null_mut();
        if rc != 0 {
            return Err(VmError::MemoryUnmap(self.label));
        }
        Ok(())
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        // Backstop for early-error paths; the engine releases explicitly.
        let _ = self.release();
    }
}

// SAFETY: the mapping is private to the owning engine and the VM is
// single-threaded; the raw pointer does not alias anything else.
unsafe impl Send for Mapping {}

/// Guest memory for a JIT engine: a text region for emitted host code and
/// a data region holding the guest stack.
pub struct JitMemory {
    /// Executable region, one quarter of the configured size.
    pub text: Mapping,
    /// Read-write region, the remaining three quarters.
    pub data: Mapping,
}

impl JitMemory {
    /// Map text and data regions totalling `mem_size` bytes.
    pub fn map(mem_size: usize) -> Result<Self, VmError> {
        debug!("Initializing memory ...");
        let text_size = mem_size / 4;
        let text = Mapping::anonymous(text_size, true, "text")?;
        let data = Mapping::anonymous(mem_size - text_size, false, "data")?;
        debug!("\t.text @{:p}[0x{:x}]", text.base(), text.len());
        debug!("\t.data @{:p}[0x{:x}]", data.base(), data.len());
        Ok(Self { text, data })
    }

    /// Top of the guest stack: one past the end of the data region.
    #[must_use]
    pub fn stack_top(&self) -> u64 {
        self.data.base() as u64 + self.data.len() as u64
    }

    /// Toggle write access to the text region where the platform demands
    /// W^X for JIT pages. Only macOS needs this; elsewhere the region is
    /// mapped RWX and this is a no-op.
    pub fn set_text_writable(&self, writable: bool) {
        #[cfg(target_os = "macos")]
        // SAFETY: toggles this thread's JIT write permission; the region
        // was mapped with MAP_JIT.
        unsafe {
            libc::pthread_jit_write_protect_np(i32::from(!writable));
        }
        #[cfg(not(target_os = "macos"))]
        let _ = writable;
    }

    /// Invalidate the instruction cache over the whole text region.
    pub fn flush_icache(&self) {
        // x86-64 keeps its instruction cache coherent with stores;
        // AArch64 does not.
        #[cfg(target_arch = "aarch64")]
        // SAFETY: compiler-rt builtin over a valid mapped range.
        unsafe {
            __clear_cache(
                self.text.base().cast(),
                self.text.base().add(self.text.len()).cast(),
            );
        }
    }

    /// Release both regions.
    pub fn release(&mut self) -> Result<(), VmError> {
        self.text.release()?;
        self.data.release()
    }
}

#[cfg(target_arch = "aarch64")]
unsafe extern "C" {
    fn __clear_cache(start: *mut core::ffi::c_char, end: *mut core::ffi::c_char);
}
