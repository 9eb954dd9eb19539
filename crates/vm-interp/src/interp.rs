//! The interpreter engine.

use log::debug;

use vm_core::{
    AddrMode, Decoded, Engine, FLAG_EQ, FLAG_GT, FLAG_LT, Opcode, PROGRAM_ENTRY, RegisterDump,
    SYS_DISPLAY_SINT, SYS_DISPLAY_UINT, SYS_ENTER_ADDR, SYS_VM_EXIT, VmError, reg,
};

/// Interprets the program image in place.
///
/// Guest memory is a plain byte vector; the image is copied to offset 0
/// and SP starts at the top. All sixteen registers live in one array
/// indexed by their wire encoding, so operand nibbles naming FLAGS, SP or
/// PC work without special cases.
pub struct Interpreter<'a> {
    prog: &'a [u8],
    mem: Vec<u8>,
    regs: [u64; reg::COUNT],
    mem_size: usize,
    debug: bool,
    dump: RegisterDump,
}

impl<'a> Interpreter<'a> {
    /// Create an interpreter for `prog` with `mem_size` bytes of guest
    /// memory.
    #[must_use]
    pub fn new(prog: &'a [u8], mem_size: usize, debug: bool) -> Self {
        debug!("Initializing VM with:");
        debug!("\tprogram size {}", prog.len());
        debug!("\tmemory 0x{mem_size:x} bytes");
        debug!("\ttype 'interpreter'");
        Self {
            prog,
            mem: Vec::new(),
            regs: [0; reg::COUNT],
            mem_size,
            debug,
            dump: RegisterDump::default(),
        }
    }

    fn read64(&self, addr: u64) -> u64 {
        let at = addr as usize;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.mem[at..at + 8]);
        u64::from_le_bytes(bytes)
    }

    fn write64(&mut self, addr: u64, value: u64) {
        let at = addr as usize;
        self.mem[at..at + 8].copy_from_slice(&value.to_le_bytes());
    }

    /// Effective address for LOAD/STORE: base register plus sign-extended
    /// displacement.
    fn effective(&self, base: u8, disp: i16) -> u64 {
        self.regs[base as usize].wrapping_add(disp as i64 as u64)
    }

    fn push(&mut self, value: u64) {
        self.regs[reg::SP] -= 8;
        self.write64(self.regs[reg::SP], value);
    }

    fn pop(&mut self) -> u64 {
        let value = self.read64(self.regs[reg::SP]);
        self.regs[reg::SP] += 8;
        value
    }

    fn compare(&mut self, lhs: i64, rhs: i64) {
        self.regs[reg::FLAGS] = if lhs < rhs {
            FLAG_LT
        } else if lhs > rhs {
            FLAG_GT
        } else {
            FLAG_EQ
        };
    }

    /// Conditional branch: absolute target if the flag test passes, fall
    /// through by the encoded length otherwise.
    fn branch_if(&mut self, taken: bool, target: u64) {
        if taken {
            self.regs[reg::PC] = target;
        } else {
            self.regs[reg::PC] += 9;
        }
    }

    /// Handle a display syscall. VM_EXIT never reaches this point; the
    /// dispatch loop intercepts it.
    fn sys_enter(&mut self) -> Result<(), VmError> {
        let sp = self.regs[reg::SP];
        match self.read64(sp + 8) {
            SYS_VM_EXIT => Err(VmError::ExitInHelper),
            SYS_DISPLAY_SINT => {
                println!("{}", self.read64(sp + 16) as i64);
                self.retire_syscall_frame();
                Ok(())
            }
            SYS_DISPLAY_UINT => {
                println!("{}", self.read64(sp + 16));
                self.retire_syscall_frame();
                Ok(())
            }
            id => Err(VmError::UnknownSyscall(id)),
        }
    }

    /// Drop the id slot and reuse the argument slot for the return
    /// address, leaving the saved PC on top of the stack for the RET that
    /// follows.
    fn retire_syscall_frame(&mut self) {
        let sp = self.regs[reg::SP];
        let ret = self.read64(sp);
        self.write64(sp + 16, ret);
        self.regs[reg::SP] = sp + 16;
    }

    fn dump_registers(&self) {
        debug!("Registers:");
        for (i, value) in self.regs.iter().enumerate() {
            debug!("\t{:5} = 0x{value:016x}", reg::NAMES[i].to_uppercase());
        }
    }
}

impl Engine for Interpreter<'_> {
    fn init(&mut self) -> Result<(), VmError> {
        debug!("Initializing memory ...");
        self.mem = vec![0; self.mem_size];
        debug!("Initializing registers ...");
        self.regs = [0; reg::COUNT];
        self.regs[reg::SP] = self.mem_size as u64;
        self.regs[reg::PC] = PROGRAM_ENTRY;
        Ok(())
    }

    fn load(&mut self) -> Result<(), VmError> {
        debug!("Loading program ...");
        self.mem[..self.prog.len()].copy_from_slice(self.prog);
        Ok(())
    }

    fn exec(&mut self) -> Result<(), VmError> {
        if self.prog.len() as u64 <= self.regs[reg::PC] {
            return Ok(());
        }

        debug!("Running program ...");

        loop {
            let pc = self.regs[reg::PC];
            let d = Decoded::decode(&self.mem, pc)?;
            if self.debug {
                debug!("{}", d.trace_line(&self.mem));
            }

            let dst = d.dst as usize;
            let next = pc + d.encoded_len();
            match d.opcode {
                Opcode::Load => {
                    self.regs[dst] = self.read64(self.effective(d.src, d.disp));
                    self.regs[reg::PC] = next;
                }
                Opcode::Store => {
                    let addr = self.effective(d.dst, d.disp);
                    self.write64(addr, self.regs[d.src as usize]);
                    self.regs[reg::PC] = next;
                }
                Opcode::Mov => {
                    self.regs[dst] = match d.mode {
                        AddrMode::Reg => self.regs[d.src as usize],
                        AddrMode::Imm => d.imm_u,
                    };
                    self.regs[reg::PC] = next;
                }
                Opcode::Add => {
                    let rhs = self.operand(&d);
                    self.regs[dst] = self.regs[dst].wrapping_add(rhs);
                    self.regs[reg::PC] = next;
                }
                Opcode::Sub => {
                    let rhs = self.operand(&d);
                    self.regs[dst] = self.regs[dst].wrapping_sub(rhs);
                    self.regs[reg::PC] = next;
                }
                Opcode::And => {
                    let rhs = self.operand(&d);
                    self.regs[dst] &= rhs;
                    self.regs[reg::PC] = next;
                }
                Opcode::Or => {
                    let rhs = self.operand(&d);
                    self.regs[dst] |= rhs;
                    self.regs[reg::PC] = next;
                }
                Opcode::Xor => {
                    let rhs = self.operand(&d);
                    self.regs[dst] ^= rhs;
                    self.regs[reg::PC] = next;
                }
                Opcode::Not => {
                    self.regs[dst] = !self.regs[dst];
                    self.regs[reg::PC] = next;
                }
                Opcode::Cmp => {
                    let rhs = self.operand(&d) as i64;
                    let lhs = self.regs[dst] as i64;
                    self.compare(lhs, rhs);
                    self.regs[reg::PC] = next;
                }
                Opcode::Push => {
                    self.push(self.regs[dst]);
                    self.regs[reg::PC] = next;
                }
                Opcode::Pop => {
                    let value = self.pop();
                    self.regs[dst] = value;
                    self.regs[reg::PC] = next;
                }
                Opcode::Call => {
                    self.push(pc + 9);
                    self.regs[reg::PC] = d.imm_u;
                }
                Opcode::Ret => {
                    let ret = self.pop();
                    self.regs[reg::PC] = ret;
                }
                Opcode::Jmp => {
                    if pc == SYS_ENTER_ADDR {
                        // CALL 0 landed on the syscall anchor.
                        let id = self.read64(self.regs[reg::SP] + 8);
                        if id == SYS_VM_EXIT {
                            self.regs[reg::SP] += 16;
                            return Ok(());
                        }
                        self.sys_enter()?;
                        let ret = self.pop();
                        self.regs[reg::PC] = ret;
                    } else {
                        self.regs[reg::PC] = d.imm_u;
                    }
                }
                Opcode::JmpEq => {
                    self.branch_if(self.regs[reg::FLAGS] & FLAG_EQ != 0, d.imm_u);
                }
                Opcode::JmpNe => {
                    self.branch_if(self.regs[reg::FLAGS] & FLAG_EQ == 0, d.imm_u);
                }
                Opcode::JmpGt => {
                    self.branch_if(self.regs[reg::FLAGS] & FLAG_GT != 0, d.imm_u);
                }
                Opcode::JmpLt => {
                    self.branch_if(self.regs[reg::FLAGS] & FLAG_LT != 0, d.imm_u);
                }
                Opcode::JmpGe => {
                    self.branch_if(self.regs[reg::FLAGS] & (FLAG_GT | FLAG_EQ) != 0, d.imm_u);
                }
                Opcode::JmpLe => {
                    self.branch_if(self.regs[reg::FLAGS] & (FLAG_LT | FLAG_EQ) != 0, d.imm_u);
                }
            }
        }
    }

    fn fini(&mut self) -> Result<(), VmError> {
        let mut dump = RegisterDump::default();
        dump.r.copy_from_slice(&self.regs[..reg::NUM_GPRS]);
        dump.stack_used = (self.mem_size as u64).wrapping_sub(self.regs[reg::SP]);
        self.dump = dump;
        self.mem = Vec::new();
        self.dump_registers();
        Ok(())
    }

    fn registers(&self) -> RegisterDump {
        self.dump
    }
}

impl Interpreter<'_> {
    /// Second operand of a data-processing instruction.
    fn operand(&self, d: &Decoded) -> u64 {
        match d.mode {
            AddrMode::Reg => self.regs[d.src as usize],
            AddrMode::Imm => d.imm_u,
        }
    }
}
