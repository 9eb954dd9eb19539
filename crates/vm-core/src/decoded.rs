//! Decoded instruction records.
//!
//! One record per decoded instruction, shared by the interpreter trace,
//! the translators, and the JIT disassembly interleave. Only the fields an
//! opcode actually encodes are meaningful; the rest stay zero.

use std::fmt::Write as _;

use crate::error::VmError;
use crate::isa::{self, AddrMode, Opcode, reg};

/// A fully decoded instruction at a known image offset.
#[derive(Debug, Clone, Copy)]
pub struct Decoded {
    /// Byte offset of the instruction in the program image.
    pub offset: u64,
    /// Instruction opcode.
    pub opcode: Opcode,
    /// Addressing mode (meaningful for data-processing opcodes).
    pub mode: AddrMode,
    /// Destination register index.
    pub dst: u8,
    /// Source register index.
    pub src: u8,
    /// Signed 16-bit displacement (LOAD/STORE).
    pub disp: i16,
    /// Unsigned view of the 64-bit immediate.
    pub imm_u: u64,
    /// Signed view of the 64-bit immediate.
    pub imm_s: i64,
}

impl Decoded {
    /// Decode the instruction at `offset` in `image`.
    ///
    /// The engine does not validate operand ranges; a malformed image is
    /// the producer's responsibility. Unknown opcodes are the one fatal
    /// decode error.
    pub fn decode(image: &[u8], offset: u64) -> Result<Self, VmError> {
        let at = offset as usize;
        let byte = image[at];
        let Some(opcode) = Opcode::from_bits(isa::opcode_bits(byte)) else {
            return Err(VmError::UnknownInstruction { bits: isa::opcode_bits(byte), offset });
        };

        let mut d = Self {
            offset,
            opcode,
            mode: AddrMode::Reg,
            dst: 0,
            src: 0,
            disp: 0,
            imm_u: 0,
            imm_s: 0,
        };

        match opcode {
            Opcode::Load | Opcode::Store => {
                d.dst = isa::reg_dst(image[at + 1]);
                d.src = isa::reg_src(image[at + 1]);
                d.disp = isa::imm16(&image[at + 2..]);
            }
            Opcode::Mov
            | Opcode::Add
            | Opcode::Sub
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor
            | Opcode::Cmp => {
                d.mode = isa::addr_mode(byte);
                d.dst = isa::reg_dst(image[at + 1]);
                match d.mode {
                    AddrMode::Reg => d.src = isa::reg_src(image[at + 1]),
                    AddrMode::Imm => {
                        d.imm_u = isa::imm64u(&image[at + 2..]);
                        d.imm_s = d.imm_u as i64;
                    }
                }
            }
            Opcode::Not | Opcode::Push | Opcode::Pop => {
                d.dst = isa::reg_dst(image[at + 1]);
            }
            Opcode::Ret => {}
            Opcode::Call
            | Opcode::Jmp
            | Opcode::JmpEq
            | Opcode::JmpNe
            | Opcode::JmpGt
            | Opcode::JmpLt
            | Opcode::JmpGe
            | Opcode::JmpLe => {
                d.imm_u = isa::imm64u(&image[at + 1..]);
                d.imm_s = d.imm_u as i64;
            }
        }
        Ok(d)
    }

    /// Encoded size in bytes, as determined by opcode and addressing mode.
    #[must_use]
    pub const fn encoded_len(&self) -> u64 {
        match self.opcode {
            Opcode::Load | Opcode::Store => 4,
            Opcode::Mov
            | Opcode::Add
            | Opcode::Sub
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor
            | Opcode::Cmp => match self.mode {
                AddrMode::Reg => 2,
                AddrMode::Imm => 10,
            },
            Opcode::Not | Opcode::Push | Opcode::Pop => 2,
            Opcode::Ret => 1,
            Opcode::Call
            | Opcode::Jmp
            | Opcode::JmpEq
            | Opcode::JmpNe
            | Opcode::JmpGt
            | Opcode::JmpLt
            | Opcode::JmpGe
            | Opcode::JmpLe => 9,
        }
    }

    /// Render the trace line: offset, raw bytes, mnemonic and operands.
    ///
    /// `image` is the memory the instruction was decoded from; the raw
    /// bytes are re-read from it for the hex column.
    #[must_use]
    pub fn trace_line(&self, image: &[u8]) -> String {
        let mut line = format!("vm > 0x{:05x}   ", self.offset);

        let len = self.encoded_len() as usize;
        let at = self.offset as usize;
        for i in 0..10 {
            if i < len {
                let _ = write!(line, "{:02x} ", image[at + i]);
            } else {
                line.push_str("   ");
            }
        }
        line.push_str("   ");

        let dst = reg::NAMES[self.dst as usize];
        let src = reg::NAMES[self.src as usize];
        let mn = self.opcode.mnemonic();
        match self.opcode {
            Opcode::Load => {
                let _ = write!(line, "{mn} {dst}, [{src}{}]", disp_suffix(self.disp));
            }
            Opcode::Store => {
                let _ = write!(line, "{mn} [{dst}{}], {src}", disp_suffix(self.disp));
            }
            Opcode::Mov | Opcode::Add | Opcode::Sub | Opcode::Cmp => match self.mode {
                AddrMode::Reg => {
                    let _ = write!(line, "{mn} {dst}, {src}");
                }
                AddrMode::Imm => {
                    let _ = write!(line, "{mn} {dst}, {}", self.imm_s);
                }
            },
            Opcode::And | Opcode::Or | Opcode::Xor => match self.mode {
                AddrMode::Reg => {
                    let _ = write!(line, "{mn} {dst}, {src}");
                }
                AddrMode::Imm => {
                    let _ = write!(line, "{mn} {dst}, {}", self.imm_u);
                }
            },
            Opcode::Not | Opcode::Push | Opcode::Pop => {
                let _ = write!(line, "{mn} {dst}");
            }
            Opcode::Ret => line.push_str(mn),
            Opcode::Call
            | Opcode::Jmp
            | Opcode::JmpEq
            | Opcode::JmpNe
            | Opcode::JmpGt
            | Opcode::JmpLt
            | Opcode::JmpGe
            | Opcode::JmpLe => {
                let _ = write!(line, "{mn} 0x{:x}", self.imm_u);
            }
        }
        line
    }
}

fn disp_suffix(disp: i16) -> String {
    match disp {
        0 => String::new(),
        d if d > 0 => format!(" + {d}"),
        d => format!(" - {}", -i32::from(d)),
    }
}
