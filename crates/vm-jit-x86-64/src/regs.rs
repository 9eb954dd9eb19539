//! Host register numbers and the fixed VM-to-host binding.

/// rax.
pub const RAX: u8 = 0;
/// rcx.
pub const RCX: u8 = 1;
/// rdx.
pub const RDX: u8 = 2;
/// rbx.
pub const RBX: u8 = 3;
/// rsp, bound to the VM stack pointer while guest code runs.
pub const RSP: u8 = 4;
/// rbp, the translator's scratch register.
pub const RBP: u8 = 5;
/// rsi.
pub const RSI: u8 = 6;
/// rdi, first argument register of the SysV ABI.
pub const RDI: u8 = 7;
/// r8.
pub const R8: u8 = 8;
/// r9.
pub const R9: u8 = 9;
/// r10.
pub const R10: u8 = 10;
/// r11.
pub const R11: u8 = 11;
/// r12, one of the SIB-special bases.
pub const R12: u8 = 12;
/// r13.
pub const R13: u8 = 13;
/// r14.
pub const R14: u8 = 14;
/// r15.
pub const R15: u8 = 15;

/// Scratch register alias.
pub const SCRATCH: u8 = RBP;
/// VM stack pointer alias.
pub const VM_SP: u8 = RSP;

/// Host register holding a VM general-purpose register.
///
/// R0..R7 take r8..r15; R8..R12 take rax, rcx, rdx, rbx, rsi. RSP carries
/// the VM SP so PUSH/POP and CALL/RET use the native forms; RBP stays
/// free as scratch.
#[must_use]
pub fn host_reg(vm: u8) -> u8 {
    match vm {
        0..=7 => R8 + vm,
        8 => RAX,
        9 => RCX,
        10 => RDX,
        11 => RBX,
        12 => RSI,
        14 => RSP,
        _ => panic!("vm register {vm} has no host binding"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_is_a_bijection() {
        let mut seen = [false; 16];
        for vm in (0..=12).chain([14]) {
            let host = host_reg(vm);
            assert!(!seen[host as usize], "host reg {host} bound twice");
            seen[host as usize] = true;
        }
        // RBP is the one general register left unbound.
        assert!(!seen[RBP as usize]);
    }
}
