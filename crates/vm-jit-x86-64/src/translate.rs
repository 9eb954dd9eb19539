//! Per-opcode translation templates and block scaffolding.

use log::debug;

use vm_core::{AddrMode, Decoded, Opcode, PROGRAM_ENTRY, VmError};
use vm_jit::{CodeBuffer, DeferredSite, JitCore};

use crate::enc::{self, Cc};
use crate::regs::{
    R8, R9, R10, R11, R12, R13, R14, R15, RAX, RBP, RBX, RCX, RDI, RDX, RSI, SCRATCH, VM_SP,
    host_reg,
};

pub(crate) const TARGET_ARCH: &str = "x86_64";

/// Emit the whole translation block: entry sequence, syscall trampoline,
/// register init, the translated program, and the VM-exit guard.
pub(crate) fn emit_block(core: &mut JitCore) -> Result<(), VmError> {
    emit_entry_seq(core);
    emit_sys_enter_stub(core);
    emit_reg_init(core);
    translate_program(core)?;
    emit_exit_guard(core);
    Ok(())
}

fn translate_program(core: &mut JitCore) -> Result<(), VmError> {
    debug!("Translating program ...");

    let prog_len = core.prog().len() as u64;
    while core.guest_pos() < prog_len {
        core.record_mapping();
        translate_instruction(core)?;
    }

    for site in core.take_deferred() {
        let guest = core.guest_pos();
        let host = core.code().pos();
        core.set_guest_pos(site.guest);
        core.code().set_pos(site.host);
        translate_instruction(core)?;
        core.set_guest_pos(guest);
        core.code().set_pos(host);
    }
    Ok(())
}

fn translate_instruction(core: &mut JitCore) -> Result<(), VmError> {
    let d = Decoded::decode(core.prog(), core.guest_pos())?;

    let dst = d.dst;
    let src = d.src;
    match d.opcode {
        Opcode::Load => {
            enc::mov_reg_b32d(core.code(), host_reg(dst), host_reg(src), i32::from(d.disp));
        }
        Opcode::Store => {
            enc::mov_b32d_reg(core.code(), host_reg(dst), i32::from(d.disp), host_reg(src));
        }
        Opcode::Mov => {
            let buf = core.code();
            match d.mode {
                AddrMode::Reg => enc::mov_reg_reg(buf, host_reg(dst), host_reg(src)),
                AddrMode::Imm => enc::mov_reg_imm(buf, host_reg(dst), d.imm_u),
            }
        }
        Opcode::Add => binary_op(core, &d, enc::add_reg_reg),
        Opcode::Sub => binary_op(core, &d, enc::sub_reg_reg),
        Opcode::And => binary_op(core, &d, enc::and_reg_reg),
        Opcode::Or => binary_op(core, &d, enc::or_reg_reg),
        Opcode::Xor => binary_op(core, &d, enc::xor_reg_reg),
        Opcode::Not => enc::not_reg(core.code(), host_reg(dst)),
        Opcode::Cmp => {
            let buf = core.code();
            match d.mode {
                AddrMode::Reg => enc::cmp_reg_reg(buf, host_reg(dst), host_reg(src)),
                AddrMode::Imm => emit_cmp_imm(buf, host_reg(dst), d.imm_u),
            }
        }
        Opcode::Push => enc::push_reg(core.code(), host_reg(dst)),
        Opcode::Pop => enc::pop_reg(core.code(), host_reg(dst)),
        Opcode::Call => {
            if let Some(aa) = core.host_addr(d.imm_u) {
                enc::call_abs(core.code(), aa);
            } else {
                defer(core, enc::ABS_BRANCH_LEN);
            }
        }
        Opcode::Ret => enc::ret(core.code()),
        Opcode::Jmp => {
            if let Some(aa) = core.host_addr(d.imm_u) {
                enc::jmp_abs(core.code(), aa);
            } else {
                defer(core, enc::ABS_BRANCH_LEN);
            }
        }
        Opcode::JmpEq => conditional_jump(core, &d, Cc::Eq),
        Opcode::JmpNe => conditional_jump(core, &d, Cc::Ne),
        Opcode::JmpGt => conditional_jump(core, &d, Cc::Gt),
        Opcode::JmpLt => conditional_jump(core, &d, Cc::Lt),
        Opcode::JmpGe => conditional_jump(core, &d, Cc::Ge),
        Opcode::JmpLe => conditional_jump(core, &d, Cc::Le),
    }

    core.record_decoded(d);
    core.advance_guest(d.encoded_len());
    Ok(())
}

/// REG-form uses the bound host registers directly; IMM-form materializes
/// into the scratch register first.
fn binary_op(core: &mut JitCore, d: &Decoded, op: fn(&mut CodeBuffer, u8, u8)) {
    let rd = host_reg(d.dst);
    let buf = core.code();
    match d.mode {
        AddrMode::Reg => op(buf, rd, host_reg(d.src)),
        AddrMode::Imm => {
            enc::mov_reg_imm(buf, SCRATCH, d.imm_u);
            op(buf, rd, SCRATCH);
        }
    }
}

fn conditional_jump(core: &mut JitCore, d: &Decoded, cc: Cc) {
    if let Some(aa) = core.host_addr(d.imm_u) {
        let here = core.code().addr();
        enc::jcc_rel32(core.code(), cc, (aa as i64 - here as i64) as i32);
    } else {
        defer(core, enc::JCC_LEN);
    }
}

/// Record the cursors and pad with exactly the number of bytes the
/// resolved form will need, so the replay overwrites the slot in place.
fn defer(core: &mut JitCore, bytes: usize) {
    let site = DeferredSite { guest: core.guest_pos(), host: core.code().pos() };
    core.push_deferred(site);
    for _ in 0..bytes {
        enc::nop(core.code());
    }
}

fn emit_cmp_imm(buf: &mut CodeBuffer, rs: u8, imm: u64) {
    enc::mov_reg_imm(buf, SCRATCH, imm);
    enc::cmp_reg_reg(buf, rs, SCRATCH);
}

fn emit_add_imm(buf: &mut CodeBuffer, rd: u8, imm: u64) {
    enc::mov_reg_imm(buf, SCRATCH, imm);
    enc::add_reg_reg(buf, rd, SCRATCH);
}

/// Host-to-guest entry: push the callee-saved registers the binding
/// claims and remember the host stack pointer.
fn emit_entry_seq(core: &mut JitCore) {
    let host_sp = core.state().host_sp_addr();
    let buf = core.code();
    enc::push_reg(buf, RBP);
    enc::push_reg(buf, RBX);
    enc::push_reg(buf, R12);
    enc::push_reg(buf, R13);
    enc::push_reg(buf, R14);
    enc::push_reg(buf, R15);
    enc::mov_reg_imm(buf, RBP, host_sp);
    enc::mov_b8d_reg(buf, RBP, 0, VM_SP);
}

/// Guest-to-host exit: back onto the host stack, restore, return.
fn emit_exit_seq(core: &mut JitCore) {
    let host_sp = core.state().host_sp_addr();
    let buf = core.code();
    enc::mov_reg_imm(buf, RBP, host_sp);
    enc::mov_reg_b8d(buf, VM_SP, RBP, 0);
    enc::pop_reg(buf, R15);
    enc::pop_reg(buf, R14);
    enc::pop_reg(buf, R13);
    enc::pop_reg(buf, R12);
    enc::pop_reg(buf, RBX);
    enc::pop_reg(buf, RBP);
    enc::ret(buf);
}

/// Park the guest stack pointer in `vm_sp`, hop onto the host stack, and
/// save every VM register living in a caller-saved host register. The
/// extra RBP push keeps the host stack ABI-aligned at the helper call.
fn emit_helper_entry_seq(core: &mut JitCore) {
    let vm_sp = core.state().vm_sp_addr();
    let host_sp = core.state().host_sp_addr();
    let buf = core.code();
    enc::mov_reg_imm(buf, RBP, vm_sp);
    enc::mov_b8d_reg(buf, RBP, 0, VM_SP);
    enc::mov_reg_imm(buf, RBP, host_sp);
    enc::mov_reg_b8d(buf, VM_SP, RBP, 0);

    enc::push_reg(buf, RBP);
    for r in [R8, R9, R10, R11, RAX, RCX, RDX, RSI] {
        enc::push_reg(buf, r);
    }
}

/// Restore the saved registers and re-select the (adjusted) guest stack.
fn emit_helper_exit_seq(core: &mut JitCore) {
    let vm_sp = core.state().vm_sp_addr();
    let buf = core.code();
    for r in [RSI, RDX, RCX, RAX, R11, R10, R9, R8] {
        enc::pop_reg(buf, r);
    }
    enc::pop_reg(buf, RBP);

    enc::mov_reg_imm(buf, RBP, vm_sp);
    enc::mov_reg_b8d(buf, VM_SP, RBP, 0);
}

/// Call the native helper with the parked guest stack pointer and park
/// the adjusted value it returns.
fn emit_helper_call(core: &mut JitCore) {
    let vm_sp = core.state().vm_sp_addr();
    let helper = core.sys_enter_addr();
    let buf = core.code();
    enc::mov_reg_imm(buf, RBP, vm_sp);
    enc::mov_reg_b8d(buf, RDI, RBP, 0);

    enc::call_abs(buf, helper);

    enc::mov_reg_imm(buf, RBP, vm_sp);
    enc::mov_b8d_reg(buf, RBP, 0, RAX);
}

/// The syscall trampoline. Guest CALL 0 resolves here.
fn emit_sys_enter_stub(core: &mut JitCore) {
    let skip_at = core.code().pos();
    core.code().set_pos(skip_at + enc::JMP_REL32_LEN);

    let stub_addr = core.code().addr();
    core.set_stub_addr(stub_addr);
    core.record_mapping();

    // Syscall id into VM R0's host register, then test for VM_EXIT.
    let buf = core.code();
    enc::mov_reg_b32d(buf, host_reg(0), VM_SP, 8);
    emit_cmp_imm(buf, host_reg(0), 0);
    let exit_branch_at = buf.pos();
    buf.set_pos(exit_branch_at + enc::JCC_LEN);

    // Display path: run the helper, then return to the guest through the
    // return address it left on top of the guest stack.
    emit_helper_entry_seq(core);
    emit_helper_call(core);
    emit_helper_exit_seq(core);
    enc::ret(core.code());

    // VM-exit path: discard the return-address and id slots, then leave.
    let exit_at = core.code().pos();
    emit_add_imm(core.code(), VM_SP, 16);
    emit_reg_save_seq(core);
    emit_exit_seq(core);
    let end_at = core.code().pos();

    let buf = core.code();
    buf.set_pos(skip_at);
    enc::jmp_rel32(buf, (end_at - skip_at) as i32);
    buf.set_pos(exit_branch_at);
    enc::jcc_rel32(buf, Cc::Eq, (exit_at - exit_branch_at) as i32);
    buf.set_pos(end_at);

    // The stub owns the nine reserved image bytes.
    core.set_guest_pos(PROGRAM_ENTRY);
}

/// Store R0..R12 and SP into the dump area.
fn emit_reg_save_seq(core: &mut JitCore) {
    let dump = core.state().reg_dump_addr();
    let buf = core.code();
    enc::mov_reg_imm(buf, RBP, dump);
    for vm in 0..=12 {
        enc::mov_b32d_reg(buf, RBP, i32::from(vm) * 8, host_reg(vm));
    }
    enc::mov_b32d_reg(buf, RBP, 13 * 8, VM_SP);
}

/// Zero every VM register and point the VM stack at the top of data.
fn emit_reg_init(core: &mut JitCore) {
    let stack_top = core.stack_top();
    let buf = core.code();
    for vm in 0..=12 {
        enc::mov_reg_imm32(buf, host_reg(vm), 0);
    }
    enc::mov_reg_imm(buf, VM_SP, stack_top);
}

/// Appended after the last translated instruction: push a zero syscall id
/// and call the trampoline so that falling off the end takes the VM_EXIT
/// path instead of running past the buffer.
fn emit_exit_guard(core: &mut JitCore) {
    let stub = core.stub_addr();
    let buf = core.code();
    enc::mov_reg_imm32(buf, RBP, 0);
    enc::push_reg(buf, RBP);
    enc::call_abs(buf, stub);
}
