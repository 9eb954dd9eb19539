//! Interpreter tests over hand-assembled guest programs.

use vm_core::asm::Prog;
use vm_core::{Engine, Opcode, RegisterDump, VmError};
use vm_interp::Interpreter;

const MEM_SIZE: usize = 4 << 20;

fn run(prog: &[u8]) -> RegisterDump {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut engine = Interpreter::new(prog, MEM_SIZE, false);
    engine.run().expect("program runs to completion")
}

fn run_err(prog: &[u8]) -> VmError {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut engine = Interpreter::new(prog, MEM_SIZE, false);
    engine.run().expect_err("program must fail")
}

#[test]
fn empty_program_exits_cleanly() {
    let prog = Prog::new().into_bytes();
    let dump = run(&prog);
    assert_eq!(dump, RegisterDump::default());
}

#[test]
fn mov_and_arithmetic() {
    let mut p = Prog::new();
    p.mov_imm(1, 40);
    p.alu_imm(Opcode::Add, 1, 2); // r1 = 42
    p.mov_reg(2, 1);
    p.alu_imm(Opcode::Sub, 2, 50); // r2 = -8
    p.mov_imm(3, 5);
    p.alu_reg(Opcode::Add, 3, 1); // r3 = 47
    p.sys_exit();
    let dump = run(&p.into_bytes());
    assert_eq!(dump.r[1], 42);
    assert_eq!(dump.r[2], (-8i64) as u64);
    assert_eq!(dump.r[3], 47);
}

#[test]
fn bitwise_operations() {
    let mut p = Prog::new();
    p.mov_imm(1, 0b1100);
    p.alu_imm(Opcode::And, 1, 0b1010); // r1 = 0b1000
    p.mov_imm(2, 0b1100);
    p.alu_imm(Opcode::Or, 2, 0b0011); // r2 = 0b1111
    p.mov_imm(3, 0b1100);
    p.alu_imm(Opcode::Xor, 3, 0b1010); // r3 = 0b0110
    p.mov_imm(4, 0);
    p.not(4); // r4 = !0
    p.sys_exit();
    let dump = run(&p.into_bytes());
    assert_eq!(dump.r[1], 0b1000);
    assert_eq!(dump.r[2], 0b1111);
    assert_eq!(dump.r[3], 0b0110);
    assert_eq!(dump.r[4], u64::MAX);
}

#[test]
fn push_pop_round_trip() {
    let mut p = Prog::new();
    p.mov_imm(1, 11);
    p.mov_imm(2, 22);
    p.push(1);
    p.push(2);
    p.pop(3); // 22
    p.pop(4); // 11
    p.sys_exit();
    let dump = run(&p.into_bytes());
    assert_eq!(dump.r[3], 22);
    assert_eq!(dump.r[4], 11);
    // Only the exit syscall's reserved argument slot remains.
    assert_eq!(dump.stack_used, 8);
}

#[test]
fn display_syscall_balances_the_stack() {
    let mut p = Prog::new();
    p.mov_imm(1, 42);
    p.sys_display_sint(1);
    p.sys_exit();
    let dump = run(&p.into_bytes());
    assert_eq!(dump.r[1], 42);
    // The display frame is fully retired; only the exit argument slot is
    // left, and R0 still holds the id it was loaded with.
    assert_eq!(dump.stack_used, 8);
    assert_eq!(dump.r[0], 0);
}

#[test]
fn sum_one_to_ten() {
    let mut p = Prog::new();
    p.mov_imm(1, 0);
    p.mov_imm(2, 1);
    let loop_top = p.here();
    p.alu_imm(Opcode::Cmp, 2, 10);
    let done = p.branch_fwd(Opcode::JmpGt);
    p.alu_reg(Opcode::Add, 1, 2);
    p.alu_imm(Opcode::Add, 2, 1);
    p.branch(Opcode::Jmp, loop_top);
    p.bind(done);
    p.sys_display_sint(1);
    p.sys_exit();
    let dump = run(&p.into_bytes());
    assert_eq!(dump.r[1], 55);
    assert_eq!(dump.r[2], 11);
}

#[test]
fn memory_round_trip_through_a_data_pointer() {
    let mut p = Prog::new();
    p.mov_imm(1, 0xdead_beef);
    p.mov_reg(12, 14); // r12 = sp
    p.alu_imm(Opcode::Sub, 12, 1024);
    p.store(12, 0, 1);
    p.load(2, 12, 0);
    p.store(12, 8, 2);
    p.load(3, 12, 8);
    p.load(4, 12, 8); // and once more through a positive displacement
    p.sys_exit();
    let dump = run(&p.into_bytes());
    assert_eq!(dump.r[2], 0xdead_beef);
    assert_eq!(dump.r[3], 0xdead_beef);
    assert_eq!(dump.r[4], 0xdead_beef);
}

#[test]
fn negative_displacement_addressing() {
    let mut p = Prog::new();
    p.mov_reg(12, 14);
    p.mov_imm(1, 7);
    p.store(12, -64, 1);
    p.load(2, 12, -64);
    p.sys_exit();
    let dump = run(&p.into_bytes());
    assert_eq!(dump.r[2], 7);
}

#[test]
fn signed_compare_takes_the_less_than_branch() {
    let mut p = Prog::new();
    p.mov_imm(1, -5);
    p.alu_imm(Opcode::Cmp, 1, -3);
    let less = p.branch_fwd(Opcode::JmpLt);
    p.mov_imm(2, 0);
    let done = p.branch_fwd(Opcode::Jmp);
    p.bind(less);
    p.mov_imm(2, 1);
    p.bind(done);
    p.sys_exit();
    let dump = run(&p.into_bytes());
    assert_eq!(dump.r[2], 1);
}

#[test]
fn flags_are_exclusive_and_conditions_honor_them() {
    // For an equal compare: EQ-style branches taken, strict ones not.
    let mut p = Prog::new();
    p.mov_imm(1, 3);
    p.alu_imm(Opcode::Cmp, 1, 3);
    let ge = p.branch_fwd(Opcode::JmpGe);
    p.mov_imm(2, 0);
    p.sys_exit();
    p.bind(ge);
    p.alu_imm(Opcode::Cmp, 1, 3);
    let gt = p.branch_fwd(Opcode::JmpGt);
    p.mov_imm(2, 1); // expected: JMPGT falls through on equality
    p.sys_exit();
    p.bind(gt);
    p.mov_imm(2, 2);
    p.sys_exit();
    let dump = run(&p.into_bytes());
    assert_eq!(dump.r[2], 1);
}

#[test]
fn jmpge_and_jmple_honor_the_flag_set() {
    // One bit per branch decision in r2; a wrong decision either skips
    // its bit or exits early with a partial value.
    let mut p = Prog::new();
    p.mov_imm(2, 0);
    p.mov_imm(1, 3);

    p.alu_imm(Opcode::Cmp, 1, 3);
    let ge_eq = p.branch_fwd(Opcode::JmpGe); // taken on equality
    p.sys_exit();
    p.bind(ge_eq);
    p.alu_imm(Opcode::Add, 2, 1);

    p.alu_imm(Opcode::Cmp, 1, -7);
    let ge_gt = p.branch_fwd(Opcode::JmpGe); // taken, 3 > -7 signed
    p.sys_exit();
    p.bind(ge_gt);
    p.alu_imm(Opcode::Add, 2, 2);

    p.alu_imm(Opcode::Cmp, 1, 5);
    let ge_lt = p.branch_fwd(Opcode::JmpGe); // falls through
    p.alu_imm(Opcode::Add, 2, 4);
    p.bind(ge_lt);

    p.alu_imm(Opcode::Cmp, 1, 10);
    let le_lt = p.branch_fwd(Opcode::JmpLe); // taken, strictly less
    p.sys_exit();
    p.bind(le_lt);
    p.alu_imm(Opcode::Add, 2, 8);

    p.alu_imm(Opcode::Cmp, 1, 3);
    let le_eq = p.branch_fwd(Opcode::JmpLe); // taken on equality
    p.sys_exit();
    p.bind(le_eq);
    p.alu_imm(Opcode::Add, 2, 16);

    p.alu_imm(Opcode::Cmp, 1, -7);
    let le_gt = p.branch_fwd(Opcode::JmpLe); // falls through
    p.alu_imm(Opcode::Add, 2, 32);
    p.bind(le_gt);

    p.sys_exit();
    let dump = run(&p.into_bytes());
    assert_eq!(dump.r[2], 63);
}

#[test]
fn not_taken_conditionals_fall_through_on_clear_flags() {
    // FLAGS is zero at startup: everything except JMPNE falls through.
    let mut p = Prog::new();
    for op in [Opcode::JmpEq, Opcode::JmpGt, Opcode::JmpLt, Opcode::JmpGe, Opcode::JmpLe] {
        p.branch(op, 0xffff); // would run off the image if taken
    }
    p.mov_imm(1, 1);
    p.sys_exit();
    let dump = run(&p.into_bytes());
    assert_eq!(dump.r[1], 1);
}

#[test]
fn jmpne_branches_on_clear_flags() {
    let mut p = Prog::new();
    let taken = p.branch_fwd(Opcode::JmpNe);
    p.mov_imm(1, 0);
    p.sys_exit();
    p.bind(taken);
    p.mov_imm(1, 1);
    p.sys_exit();
    let dump = run(&p.into_bytes());
    assert_eq!(dump.r[1], 1);
}

#[test]
fn call_and_ret_nest() {
    let mut p = Prog::new();
    p.mov_imm(1, 0);
    let f = p.branch_fwd(Opcode::Call);
    p.alu_imm(Opcode::Add, 1, 100); // after return
    p.sys_exit();
    p.bind(f);
    p.alu_imm(Opcode::Add, 1, 1);
    p.ret();
    let dump = run(&p.into_bytes());
    assert_eq!(dump.r[1], 101);
    assert_eq!(dump.stack_used, 8);
}

#[test]
fn recursive_factorial_of_five() {
    let mut p = Prog::new();
    p.mov_imm(1, 5);
    let fact = p.branch_fwd(Opcode::Call);
    p.sys_display_sint(2);
    p.sys_exit();

    // fact: r1 = n, returns r2 = n!.
    let fact_entry = p.here();
    p.bind(fact);
    p.alu_imm(Opcode::Cmp, 1, 1);
    let recurse = p.branch_fwd(Opcode::JmpGt);
    p.mov_imm(2, 1);
    p.ret();

    p.bind(recurse);
    p.push(1);
    p.alu_imm(Opcode::Sub, 1, 1);
    let again = p.branch_fwd(Opcode::Call);
    p.bind_to(again, fact_entry);
    p.pop(1);
    // r2 = r2 * r1, by repeated addition.
    p.mov_reg(3, 2);
    p.mov_reg(4, 1);
    p.alu_imm(Opcode::Sub, 4, 1);
    let mul_top = p.here();
    p.alu_imm(Opcode::Cmp, 4, 0);
    let mul_done = p.branch_fwd(Opcode::JmpEq);
    p.alu_reg(Opcode::Add, 2, 3);
    p.alu_imm(Opcode::Sub, 4, 1);
    p.branch(Opcode::Jmp, mul_top);
    p.bind(mul_done);
    p.ret();

    let dump = run(&p.into_bytes());
    assert_eq!(dump.r[2], 120);
}

#[test]
fn countdown_loop_runs_a_million_iterations() {
    let mut p = Prog::new();
    p.mov_imm(1, 1_000_000);
    let top = p.here();
    p.alu_imm(Opcode::Sub, 1, 1);
    p.alu_imm(Opcode::Cmp, 1, 0);
    p.branch(Opcode::JmpNe, top);
    p.sys_exit();
    let dump = run(&p.into_bytes());
    assert_eq!(dump.r[1], 0);
}

#[test]
fn unknown_opcode_is_fatal() {
    let mut bytes = Prog::new().into_bytes();
    bytes.push(0xff); // opcode bits 0x3f
    bytes.push(0x00);
    let err = run_err(&bytes);
    assert!(matches!(err, VmError::UnknownInstruction { bits: 0x3f, offset: 9 }));
}

#[test]
fn unknown_syscall_id_is_fatal() {
    let mut p = Prog::new();
    p.push(0);
    p.mov_imm(0, 9);
    p.push(0);
    p.branch(Opcode::Call, 0);
    let err = run_err(&p.into_bytes());
    assert!(matches!(err, VmError::UnknownSyscall(9)));
}
