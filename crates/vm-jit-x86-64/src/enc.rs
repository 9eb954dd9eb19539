//! x86-64 instruction encoders.
//!
//! Every emitter assembles {REX, opcode, ModR/M, SIB?, disp?, imm?} by
//! hand. The REX.W prefix is always present on 64-bit data instructions;
//! REX.R/REX.B are ORed in when an operand lives in r8..r15. A SIB byte is
//! required whenever the base register of a memory form is RSP or R12.

use vm_jit::CodeBuffer;

use crate::regs::{R12, RSP};

const REX_W: u8 = 0b0100_1000;
const REX_R: u8 = 0b0100_0100;
const REX_B: u8 = 0b0100_0001;

const MOD_B8D: u8 = 0b0100_0000;
const MOD_B32D: u8 = 0b1000_0000;
const MOD_REG: u8 = 0b1100_0000;

/// Index-less SIB byte for an RSP/R12 base.
const SIB_BASE_SP: u8 = 0b0010_0100;

fn base(r: u8) -> u8 {
    r & 0b111
}

fn rex_r(r: u8) -> u8 {
    if base(r) == r { 0 } else { REX_R }
}

fn rex_b(m: u8) -> u8 {
    if base(m) == m { 0 } else { REX_B }
}

fn rex_rm(r: u8, m: u8) -> u8 {
    rex_r(r) | rex_b(m)
}

fn modrm_reg(buf: &mut CodeBuffer, r: u8, m: u8) {
    buf.put_u8(MOD_REG | base(r) << 3 | base(m));
}

/// Memory operand `[base + disp8]`, with the SIB byte when needed.
fn modrm_b8d(buf: &mut CodeBuffer, r: u8, b: u8, d: i8) {
    buf.put_u8(MOD_B8D | base(r) << 3 | base(b));
    if base(b) == RSP || b == R12 {
        buf.put_u8(SIB_BASE_SP);
    }
    buf.put_u8(d as u8);
}

/// Memory operand `[base + disp32]`, with the SIB byte when needed.
fn modrm_b32d(buf: &mut CodeBuffer, r: u8, b: u8, d: i32) {
    buf.put_u8(MOD_B32D | base(r) << 3 | base(b));
    if base(b) == RSP || b == R12 {
        buf.put_u8(SIB_BASE_SP);
    }
    buf.put_i32(d);
}

/// `add rd, rs`.
pub fn add_reg_reg(buf: &mut CodeBuffer, rd: u8, rs: u8) {
    buf.put_u8(REX_W | rex_rm(rd, rs));
    buf.put_u8(0x03);
    modrm_reg(buf, rd, rs);
}

/// `sub rd, rs`.
pub fn sub_reg_reg(buf: &mut CodeBuffer, rd: u8, rs: u8) {
    buf.put_u8(REX_W | rex_rm(rd, rs));
    buf.put_u8(0x2b);
    modrm_reg(buf, rd, rs);
}

/// `and rd, rs`.
pub fn and_reg_reg(buf: &mut CodeBuffer, rd: u8, rs: u8) {
    buf.put_u8(REX_W | rex_rm(rd, rs));
    buf.put_u8(0x23);
    modrm_reg(buf, rd, rs);
}

/// `or rd, rs`.
pub fn or_reg_reg(buf: &mut CodeBuffer, rd: u8, rs: u8) {
    buf.put_u8(REX_W | rex_rm(rd, rs));
    buf.put_u8(0x0b);
    modrm_reg(buf, rd, rs);
}

/// `xor rd, rs`.
pub fn xor_reg_reg(buf: &mut CodeBuffer, rd: u8, rs: u8) {
    buf.put_u8(REX_W | rex_rm(rd, rs));
    buf.put_u8(0x33);
    modrm_reg(buf, rd, rs);
}

/// `cmp rs1, rs2` (opcode 0x39: rs1 is the r/m operand).
pub fn cmp_reg_reg(buf: &mut CodeBuffer, rs1: u8, rs2: u8) {
    buf.put_u8(REX_W | rex_rm(rs2, rs1));
    buf.put_u8(0x39);
    modrm_reg(buf, rs2, rs1);
}

/// `not r`.
pub fn not_reg(buf: &mut CodeBuffer, r: u8) {
    buf.put_u8(REX_W | rex_b(r));
    buf.put_u8(0xf7);
    buf.put_u8(MOD_REG | 0b010 << 3 | base(r));
}

/// `mov rd, rs`.
pub fn mov_reg_reg(buf: &mut CodeBuffer, rd: u8, rs: u8) {
    buf.put_u8(REX_W | rex_rm(rd, rs));
    buf.put_u8(0x8b);
    modrm_reg(buf, rd, rs);
}

/// `mov rd, imm32` (sign-extended), the 7-byte form.
pub fn mov_reg_imm32(buf: &mut CodeBuffer, rd: u8, imm: i32) {
    buf.put_u8(REX_W | rex_b(rd));
    buf.put_u8(0xc7);
    buf.put_u8(MOD_REG | base(rd));
    buf.put_i32(imm);
}

/// `mov rd, imm64`, the 10-byte form.
pub fn mov_reg_imm64(buf: &mut CodeBuffer, rd: u8, imm: u64) {
    buf.put_u8(REX_W | rex_b(rd));
    buf.put_u8(0xb8 | base(rd));
    buf.put_u64(imm);
}

/// Materialize a 64-bit immediate: the short form when the value equals
/// its own 32-bit sign-extension (`C7 /0` sign-extends), the long form
/// otherwise. This is the encoder's only size-dependent choice.
pub fn mov_reg_imm(buf: &mut CodeBuffer, rd: u8, imm: u64) {
    if imm as i32 as u64 == imm {
        mov_reg_imm32(buf, rd, imm as i32);
    } else {
        mov_reg_imm64(buf, rd, imm);
    }
}

/// `mov [rb + disp8], rs`.
pub fn mov_b8d_reg(buf: &mut CodeBuffer, rb: u8, d: i8, rs: u8) {
    buf.put_u8(REX_W | rex_rm(rs, rb));
    buf.put_u8(0x89);
    modrm_b8d(buf, rs, rb, d);
}

/// `mov rd, [rb + disp8]`.
pub fn mov_reg_b8d(buf: &mut CodeBuffer, rd: u8, rb: u8, d: i8) {
    buf.put_u8(REX_W | rex_rm(rd, rb));
    buf.put_u8(0x8b);
    modrm_b8d(buf, rd, rb, d);
}

/// `mov [rb + disp32], rs`.
pub fn mov_b32d_reg(buf: &mut CodeBuffer, rb: u8, d: i32, rs: u8) {
    buf.put_u8(REX_W | rex_rm(rs, rb));
    buf.put_u8(0x89);
    modrm_b32d(buf, rs, rb, d);
}

/// `mov rd, [rb + disp32]`.
pub fn mov_reg_b32d(buf: &mut CodeBuffer, rd: u8, rb: u8, d: i32) {
    buf.put_u8(REX_W | rex_rm(rd, rb));
    buf.put_u8(0x8b);
    modrm_b32d(buf, rd, rb, d);
}

/// `push rs`, REX.B for r8..r15.
pub fn push_reg(buf: &mut CodeBuffer, rs: u8) {
    if base(rs) != rs {
        buf.put_u8(REX_B);
    }
    buf.put_u8(0x50 | base(rs));
}

/// `pop rd`, REX.B for r8..r15.
pub fn pop_reg(buf: &mut CodeBuffer, rd: u8) {
    if base(rd) != rd {
        buf.put_u8(REX_B);
    }
    buf.put_u8(0x58 | base(rd));
}

/// `call rs`.
pub fn call_reg(buf: &mut CodeBuffer, rs: u8) {
    buf.put_u8(REX_W | rex_b(rs));
    buf.put_u8(0xff);
    buf.put_u8(MOD_REG | 0b010 << 3 | base(rs));
}

/// `jmp rs`.
pub fn jmp_reg(buf: &mut CodeBuffer, rs: u8) {
    buf.put_u8(REX_W | rex_b(rs));
    buf.put_u8(0xff);
    buf.put_u8(MOD_REG | 0b100 << 3 | base(rs));
}

/// Width of an absolute call/jump: 10-byte materialization plus the
/// 3-byte register form.
pub const ABS_BRANCH_LEN: usize = 13;

/// Call an absolute address through the scratch register. Always the
/// long materialization so the emission length never depends on the
/// address value.
pub fn call_abs(buf: &mut CodeBuffer, addr: u64) {
    mov_reg_imm64(buf, crate::regs::SCRATCH, addr);
    call_reg(buf, crate::regs::SCRATCH);
}

/// Jump to an absolute address through the scratch register.
pub fn jmp_abs(buf: &mut CodeBuffer, addr: u64) {
    mov_reg_imm64(buf, crate::regs::SCRATCH, addr);
    jmp_reg(buf, crate::regs::SCRATCH);
}

/// Width of the rel32 conditional jumps.
pub const JCC_LEN: usize = 6;
/// Width of the rel32 unconditional jump.
pub const JMP_REL32_LEN: usize = 5;

/// Conditional near jumps. `diff` is `target − site`; the rel32 field is
/// relative to the end of the instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Cc {
    Eq = 0x84,
    Ne = 0x85,
    Lt = 0x8c,
    Ge = 0x8d,
    Le = 0x8e,
    Gt = 0x8f,
}

/// `jcc rel32`.
pub fn jcc_rel32(buf: &mut CodeBuffer, cc: Cc, diff: i32) {
    buf.put_u8(0x0f);
    buf.put_u8(cc as u8);
    buf.put_i32(diff - JCC_LEN as i32);
}

/// `jmp rel32`.
pub fn jmp_rel32(buf: &mut CodeBuffer, diff: i32) {
    buf.put_u8(0xe9);
    buf.put_i32(diff - JMP_REL32_LEN as i32);
}

/// `ret`.
pub fn ret(buf: &mut CodeBuffer) {
    buf.put_u8(0xc3);
}

/// `nop`, the placeholder unit for deferred sites.
pub fn nop(buf: &mut CodeBuffer) {
    buf.put_u8(0x90);
}
