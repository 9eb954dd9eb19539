//! Per-opcode translation templates and block scaffolding.

use log::debug;

use vm_core::{AddrMode, Decoded, Opcode, PROGRAM_ENTRY, VmError};
use vm_jit::{CodeBuffer, DeferredSite, JitCore};

use crate::enc::{self, Cond};
use crate::regs::{FP, LR, SCRATCH, SP, VM_SP, X0, XZR, host_reg};

pub(crate) const TARGET_ARCH: &str = "aarch64";

/// Host bytes reserved for a deferred CALL: ADR + push + fixed 4-word
/// materialization + BR.
const CALL_WORDS: usize = 7;
/// Host bytes reserved for a deferred JMP: fixed materialization + BR.
const JMP_WORDS: usize = 5;
/// A deferred JMPcc is a single B.cond.
const JMPCC_WORDS: usize = 1;

/// Emit the whole translation block: entry sequence, syscall trampoline,
/// register init, the translated program, and the VM-exit guard.
pub(crate) fn emit_block(core: &mut JitCore) -> Result<(), VmError> {
    emit_entry_seq(core.code());
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

    // Replay pass: every guest offset is mapped now, so each saved site
    // re-translates into exactly its reserved placeholder.
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
            let buf = core.code();
            enc::mov_imm(buf, SCRATCH, d.disp as i64 as u64);
            enc::adds_ereg(buf, SCRATCH, host_reg(src), SCRATCH);
            enc::ldr_unsigned(buf, host_reg(dst), SCRATCH, 0);
        }
        Opcode::Store => {
            let buf = core.code();
            enc::mov_imm(buf, SCRATCH, d.disp as i64 as u64);
            enc::adds_ereg(buf, SCRATCH, host_reg(dst), SCRATCH);
            enc::str_unsigned(buf, host_reg(src), SCRATCH, 0);
        }
        Opcode::Mov => {
            let buf = core.code();
            match d.mode {
                AddrMode::Reg => enc::mov_reg(buf, host_reg(dst), host_reg(src)),
                AddrMode::Imm => enc::mov_imm(buf, host_reg(dst), d.imm_u),
            }
        }
        Opcode::Add => binary_op(core, &d, enc::adds_ereg),
        Opcode::Sub => binary_op(core, &d, enc::subs_ereg),
        Opcode::And => binary_op(core, &d, enc::and_sreg),
        Opcode::Or => binary_op(core, &d, enc::orr_sreg),
        Opcode::Xor => binary_op(core, &d, enc::eor_sreg),
        Opcode::Not => {
            enc::orn_sreg(core.code(), host_reg(dst), XZR, host_reg(dst));
        }
        Opcode::Cmp => {
            let buf = core.code();
            match d.mode {
                AddrMode::Reg => enc::subs_ereg(buf, XZR, host_reg(dst), host_reg(src)),
                AddrMode::Imm => emit_cmp_imm(buf, host_reg(dst), d.imm_u),
            }
        }
        Opcode::Push => emit_push(core.code(), host_reg(dst)),
        Opcode::Pop => emit_pop(core.code(), host_reg(dst)),
        Opcode::Call => {
            if let Some(aa) = core.host_addr(d.imm_u) {
                let buf = core.code();
                // Return address lands just past the BR: seven words from
                // the ADR itself.
                enc::adr(buf, SCRATCH, (CALL_WORDS * 4) as i32);
                emit_push(buf, SCRATCH);
                enc::mov_imm_fixed(buf, SCRATCH, aa);
                enc::br(buf, SCRATCH);
            } else {
                defer(core, CALL_WORDS);
            }
        }
        Opcode::Ret => {
            let buf = core.code();
            emit_pop(buf, LR);
            enc::ret(buf);
        }
        Opcode::Jmp => {
            if let Some(aa) = core.host_addr(d.imm_u) {
                let buf = core.code();
                enc::mov_imm_fixed(buf, SCRATCH, aa);
                enc::br(buf, SCRATCH);
            } else {
                defer(core, JMP_WORDS);
            }
        }
        Opcode::JmpEq => conditional_jump(core, &d, Cond::Eq),
        Opcode::JmpNe => conditional_jump(core, &d, Cond::Ne),
        Opcode::JmpGt => conditional_jump(core, &d, Cond::Gt),
        Opcode::JmpLt => conditional_jump(core, &d, Cond::Lt),
        Opcode::JmpGe => conditional_jump(core, &d, Cond::Ge),
        Opcode::JmpLe => conditional_jump(core, &d, Cond::Le),
    }

    core.record_decoded(d);
    core.advance_guest(d.encoded_len());
    Ok(())
}

/// REG-form uses the bound host registers directly; IMM-form goes through
/// the scratch register.
fn binary_op(core: &mut JitCore, d: &Decoded, op: fn(&mut CodeBuffer, u8, u8, u8)) {
    let rd = host_reg(d.dst);
    let buf = core.code();
    match d.mode {
        AddrMode::Reg => op(buf, rd, rd, host_reg(d.src)),
        AddrMode::Imm => {
            enc::mov_imm(buf, SCRATCH, d.imm_u);
            op(buf, rd, rd, SCRATCH);
        }
    }
}

fn conditional_jump(core: &mut JitCore, d: &Decoded, cond: Cond) {
    if let Some(aa) = core.host_addr(d.imm_u) {
        let here = core.code().addr();
        let words = ((aa as i64 - here as i64) >> 2) as i32;
        enc::b_cond(core.code(), cond, words);
    } else {
        defer(core, JMPCC_WORDS);
    }
}

/// Record the cursors and pad with exactly the number of words the
/// resolved form will need, so the replay overwrites the slot in place.
fn defer(core: &mut JitCore, words: usize) {
    let site = DeferredSite { guest: core.guest_pos(), host: core.code().pos() };
    core.push_deferred(site);
    for _ in 0..words {
        enc::nop(core.code());
    }
}

/// Compare against an immediate of any width: materialize, then SUBS into
/// the zero register. The 12-bit ADDS/SUBS immediate form is never used.
fn emit_cmp_imm(buf: &mut CodeBuffer, rn: u8, imm: u64) {
    enc::mov_imm(buf, SCRATCH, imm);
    enc::subs_ereg(buf, XZR, rn, SCRATCH);
}

fn emit_push(buf: &mut CodeBuffer, rs: u8) {
    enc::str_pre_idx(buf, rs, VM_SP, -8);
}

fn emit_pop(buf: &mut CodeBuffer, rd: u8) {
    enc::ldr_post_idx(buf, rd, VM_SP, 8);
}

/// Host-to-guest entry: save FP/LR and every callee-saved register the VM
/// binding claims.
fn emit_entry_seq(buf: &mut CodeBuffer) {
    enc::stp_pre_idx(buf, FP, LR, SP, -16);
    enc::mov_reg_sp(buf, FP, SP);

    enc::stp_pre_idx(buf, 19, 20, SP, -16);
    enc::stp_pre_idx(buf, 21, 22, SP, -16);
    enc::stp_pre_idx(buf, 23, 24, SP, -16);
    enc::stp_pre_idx(buf, 25, 26, SP, -16);
    enc::stp_pre_idx(buf, 27, 28, SP, -16);
}

/// Guest-to-host exit: restore what the entry sequence saved and return
/// to the emitted block's caller.
fn emit_exit_seq(buf: &mut CodeBuffer) {
    enc::ldp_post_idx(buf, 27, 28, SP, 16);
    enc::ldp_post_idx(buf, 25, 26, SP, 16);
    enc::ldp_post_idx(buf, 23, 24, SP, 16);
    enc::ldp_post_idx(buf, 21, 22, SP, 16);
    enc::ldp_post_idx(buf, 19, 20, SP, 16);

    enc::ldp_post_idx(buf, FP, LR, SP, 16);
    enc::ret(buf);
}

/// Save the VM registers living in caller-saved hosts (R9..R12 on
/// x12..x15) across the native helper call.
fn emit_caller_saved_save(buf: &mut CodeBuffer) {
    enc::stp_pre_idx(buf, 14, 15, SP, -16);
    enc::stp_pre_idx(buf, 12, 13, SP, -16);
}

fn emit_caller_saved_restore(buf: &mut CodeBuffer) {
    enc::ldp_post_idx(buf, 12, 13, SP, 16);
    enc::ldp_post_idx(buf, 14, 15, SP, 16);
}

/// The syscall trampoline. Guest CALL 0 resolves here.
///
/// Layout: a jump over the stub, then the stub body. The body reads the
/// syscall id from `[VM_SP + 8]` into R0's host register and either takes
/// the VM-exit path (drop two stack slots, dump registers, run the exit
/// sequence) or calls the native helper and returns to the guest. Both
/// forward branches are patched once their targets are known.
fn emit_sys_enter_stub(core: &mut JitCore) {
    let helper = core.sys_enter_addr();

    let skip_at = core.code().pos();
    core.code().set_pos(skip_at + 4);

    let stub_addr = core.code().addr();
    core.set_stub_addr(stub_addr);
    core.record_mapping();

    let buf = core.code();
    enc::ldr_unsigned(buf, host_reg(0), VM_SP, 1);
    emit_cmp_imm(buf, host_reg(0), 0);
    let exit_branch_at = buf.pos();
    buf.set_pos(exit_branch_at + 4);

    // Display path.
    emit_caller_saved_save(buf);
    enc::mov_reg(buf, X0, VM_SP);
    enc::mov_imm(buf, SCRATCH, helper);
    enc::blr(buf, SCRATCH);
    enc::mov_reg(buf, VM_SP, X0);
    emit_caller_saved_restore(buf);
    emit_pop(buf, LR);
    enc::ret(buf);

    // VM-exit path: discard the return-address and id slots, then leave.
    let exit_at = buf.pos();
    enc::add_imm(buf, VM_SP, VM_SP, 16);
    emit_reg_save_seq(core);
    emit_exit_seq(core.code());
    let end_at = core.code().pos();

    let buf = core.code();
    buf.set_pos(skip_at);
    enc::b(buf, ((end_at - skip_at) / 4) as i32);
    buf.set_pos(exit_branch_at);
    enc::b_cond(buf, Cond::Eq, ((exit_at - exit_branch_at) / 4) as i32);
    buf.set_pos(end_at);

    // The stub owns the nine reserved image bytes.
    core.set_guest_pos(PROGRAM_ENTRY);
}

/// Walk the dump area with post-indexed stores: R0..R12, then SP.
fn emit_reg_save_seq(core: &mut JitCore) {
    let dump = core.state().reg_dump_addr();
    let buf = core.code();
    enc::mov_imm(buf, SCRATCH, dump);
    for vm in 0..=12 {
        enc::str_post_idx(buf, host_reg(vm), SCRATCH, 8);
    }
    enc::str_post_idx(buf, VM_SP, SCRATCH, 8);
}

/// Zero every VM register and point the VM stack at the top of data.
fn emit_reg_init(core: &mut JitCore) {
    let stack_top = core.stack_top();
    let buf = core.code();
    for vm in 0..=12 {
        enc::mov_imm(buf, host_reg(vm), 0);
    }
    enc::mov_imm(buf, VM_SP, stack_top);
}

/// Appended after the last translated instruction: push a zero syscall id
/// and call the trampoline so that falling off the end takes the VM_EXIT
/// path instead of running past the buffer.
fn emit_exit_guard(core: &mut JitCore) {
    let stub = core.stub_addr();
    let buf = core.code();
    enc::mov_imm(buf, host_reg(0), 0);
    emit_push(buf, host_reg(0));
    enc::adr(buf, SCRATCH, 12);
    emit_push(buf, SCRATCH);
    let here = buf.addr();
    enc::b(buf, ((stub as i64 - here as i64) >> 2) as i32);
}
