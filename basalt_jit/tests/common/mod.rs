//! Shared helpers for JIT integration tests.
#![allow(dead_code)]

use basalt_core::{
    BytecodeProgram, Constant, FunctionId, Instruction, InterpreterState, Opcode, ProgramBuilder,
    Value,
};
use basalt_jit::codegen::CompiledCode;
use rand::Rng;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;

/// Seeded generator so failures reproduce.
pub fn rng(seed: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed)
}

/// `1 + 2`.
pub fn add_program() -> BytecodeProgram {
    ProgramBuilder::new()
        .name("add")
        .load_int(1)
        .load_int(2)
        .op(Opcode::Add)
        .op(Opcode::Return)
        .build()
}

/// `((c0 op c1) op c2) ...` over `n` constants, cycling add/sub/mul.
pub fn arith_chain(n: usize) -> BytecodeProgram {
    let ops = [Opcode::Add, Opcode::Sub, Opcode::Mul];
    let mut builder = ProgramBuilder::new().name("chain").load_int(1);
    for i in 1..n {
        builder = builder.load_int(i as i64).op(ops[i % ops.len()]);
    }
    builder.op(Opcode::Return).build()
}

/// `n` constants pushed and never consumed, so all are live together.
pub fn wide_program(n: usize) -> BytecodeProgram {
    let mut builder = ProgramBuilder::new().name("wide");
    for i in 0..n {
        builder = builder.load_int(i as i64);
    }
    for _ in 1..n {
        builder = builder.op(Opcode::Add);
    }
    builder.op(Opcode::Return).build()
}

/// A random program over the full opcode set.
///
/// Stack discipline is not enforced; liveness must tolerate it.
pub fn random_program(rng: &mut ChaCha8Rng, len: usize) -> BytecodeProgram {
    let mut instructions = Vec::with_capacity(len);
    let mut constants = Vec::new();
    for _ in 0..len {
        let opcode = Opcode::ALL[rng.gen_range(0..Opcode::ALL.len())];
        let instr = match opcode {
            Opcode::LoadConst => {
                let idx = constants.len() as u32;
                constants.push(random_constant(rng));
                Instruction::op_a(opcode, idx)
            }
            Opcode::LoadLocal | Opcode::StoreLocal => {
                Instruction::op_a(opcode, rng.gen_range(0..8))
            }
            Opcode::Jump | Opcode::JumpIfFalse => {
                Instruction::op_a(opcode, rng.gen_range(0..len as u32))
            }
            _ => Instruction::op(opcode),
        };
        instructions.push(instr);
    }
    BytecodeProgram::new(instructions, constants).with_name("random")
}

fn random_constant(rng: &mut ChaCha8Rng) -> Constant {
    match rng.gen_range(0..5) {
        0 => Constant::Int(rng.gen_range(-1_000_000..1_000_000)),
        1 => Constant::Bool(rng.gen()),
        2 => Constant::Float(rng.gen_range(-100..100) as f64),
        3 => Constant::Str("s".into()),
        _ => Constant::None,
    }
}

/// Compiled code of a given size, for cache tests.
pub fn code_of_size(size: usize) -> Arc<CompiledCode> {
    Arc::new(CompiledCode::new(vec![0x90; size], Vec::new(), 64, Vec::new()))
}

/// Function id shorthand.
pub fn fid(n: u64) -> FunctionId {
    FunctionId::new(n)
}

/// An interpreter state with nested and heap-backed values.
pub fn sample_state() -> InterpreterState {
    InterpreterState::new(
        vec![
            Value::Int(10),
            Value::List(vec![Value::Int(1), Value::Str("nested".into())]),
            Value::Float(2.5),
        ],
        vec![Value::Str("local".into()), Value::Bool(false), Value::None],
    )
}
