//! End-to-end compilation tests.

mod common;

use basalt_core::{BytecodeProgram, Opcode, ProgramBuilder};
use basalt_jit::codegen::{max_code_size, EPILOGUE_SIZE, PROLOGUE_SIZE};
use basalt_jit::{BaselineCompiler, CompilerConfig, JitError};
use common::{add_program, arith_chain, random_program, rng};

#[test]
fn test_add_program_compiles_to_33_bytes() {
    let code = BaselineCompiler::new()
        .compile_function(&add_program(), None)
        .unwrap();

    assert_eq!(code.size(), 33);
    assert_eq!(code.code().len(), 33);
    assert_eq!(code.code()[0], 0x55);
    assert_eq!(code.code().last(), Some(&0xC3));
    assert!(code.deopt().is_none());
    assert!(code.ic_sites().is_empty());
}

#[test]
fn test_empty_program() {
    let code = BaselineCompiler::new()
        .compile_function(&BytecodeProgram::empty(), None)
        .unwrap();
    assert_eq!(code.size(), PROLOGUE_SIZE + EPILOGUE_SIZE);
    assert!(code.offset_table().is_empty());
}

#[test]
fn test_arith_chain_size() {
    for n in [2, 5, 20, 100] {
        let program = arith_chain(n);
        let code = BaselineCompiler::new().compile_function(&program, None).unwrap();
        // n loads, n-1 ops (mul is 4 bytes, add/sub 3)
        let muls = (1..n).filter(|i| i % 3 == 2).count();
        let expected = PROLOGUE_SIZE + n * 7 + (n - 1) * 3 + muls + EPILOGUE_SIZE;
        assert_eq!(code.size(), expected, "n = {}", n);
    }
}

#[test]
fn test_compilation_is_deterministic_across_compilers() {
    let mut rng = rng(0xBA5A17);
    for _ in 0..50 {
        let program = random_program(&mut rng, 64);
        let a = BaselineCompiler::new().compile_function(&program, None).unwrap();
        let b = BaselineCompiler::new().compile_function(&program, None).unwrap();
        assert_eq!(a.code(), b.code());
        assert_eq!(a.offset_table(), b.offset_table());
    }
}

#[test]
fn test_random_programs_respect_layout() {
    let mut rng = rng(7);
    for len in [0, 1, 8, 64, 512] {
        for _ in 0..10 {
            let program = random_program(&mut rng, len);
            let code = BaselineCompiler::new().compile_function(&program, None).unwrap();

            assert_eq!(code.size(), code.code().len());
            assert!(code.size() <= max_code_size(&program));
            assert_eq!(code.code().last(), Some(&0xC3));
            assert_eq!(code.offset_table().len(), program.len());
            assert!(code.offset_table().windows(2).all(|w| w[0] <= w[1]));
            assert!(code
                .offset_table()
                .iter()
                .all(|&off| off as usize >= PROLOGUE_SIZE && code.contains_offset(off)));
        }
    }
}

#[test]
fn test_unlowered_are_reported_not_fatal() {
    let program = ProgramBuilder::new()
        .load_int(0)
        .store_local(0)
        .load_local(0)
        .jump(Opcode::JumpIfFalse, 5)
        .jump(Opcode::Jump, 2)
        .load_local(0)
        .op(Opcode::Return)
        .build();

    let code = BaselineCompiler::new().compile_function(&program, None).unwrap();
    let positions: Vec<u32> = code.unlowered().iter().map(|op| op.position).collect();
    assert_eq!(positions, vec![1, 2, 3, 4, 5]);

    let strict = BaselineCompiler::with_config(CompilerConfig::default().with_strict_coverage(true));
    let err = strict.compile_function(&program, None).unwrap_err();
    assert!(matches!(err, JitError::Unsupported { ref ops } if ops.len() == 5));
    assert_eq!(
        err.to_string(),
        "5 instruction(s) have no baseline lowering (first: STORE_LOCAL at 1)"
    );
}

#[test]
fn test_numeric_constant_kinds() {
    use basalt_core::Constant;

    let program = ProgramBuilder::new()
        .load_const(Constant::Bool(true))
        .load_const(Constant::Float(-4.0))
        .op(Opcode::Mul)
        .op(Opcode::Return)
        .build();
    let code = BaselineCompiler::new().compile_function(&program, None).unwrap();
    // mov rax, 1
    assert_eq!(&code.code()[11..18], &[0x48, 0xC7, 0xC0, 1, 0, 0, 0]);
    // mov rcx, -4
    assert_eq!(&code.code()[18..25], &[0x48, 0xC7, 0xC1, 0xFC, 0xFF, 0xFF, 0xFF]);
}
