//! Runtime tier-up, background compilation and cache pressure.

mod common;

use basalt_core::{InterpreterState, Opcode, ProgramBuilder};
use basalt_jit::runtime::MAX_RETAINED_RESULTS;
use basalt_jit::{BaselineCompiler, JitRuntime, RuntimeConfig, TIER_UP_THRESHOLD};
use common::{add_program, arith_chain, fid};
use std::sync::Arc;

#[test]
fn test_default_tier_up_threshold() {
    let compiler = BaselineCompiler::new();
    assert!(!compiler.should_compile(fid(1), 0));
    assert!(!compiler.should_compile(fid(1), TIER_UP_THRESHOLD - 1));
    assert!(compiler.should_compile(fid(1), TIER_UP_THRESHOLD));
    assert!(compiler.should_compile(fid(1), u64::MAX));

    let runtime = JitRuntime::new(RuntimeConfig::default());
    let program = Arc::new(add_program());
    assert!(runtime.on_call(fid(1), &program, 999).unwrap().is_none());
    assert!(runtime.cache().is_empty());
    assert!(runtime.on_call(fid(1), &program, 1000).unwrap().is_some());
    assert!(runtime.cache().contains(fid(1)));
}

#[test]
fn test_interpreted_calls_until_hot() {
    let runtime = JitRuntime::new(RuntimeConfig::for_testing());
    let program = Arc::new(arith_chain(8));
    let id = fid(7);

    let mut first_compiled = None;
    for calls in 1..=20u64 {
        if runtime.on_call(id, &program, calls).unwrap().is_some() && first_compiled.is_none() {
            first_compiled = Some(calls);
        }
    }
    assert_eq!(first_compiled, Some(10));

    let stats = runtime.stats();
    assert_eq!(stats.compilations, 1);
    assert_eq!(stats.cache_misses, 10);
    assert_eq!(stats.cache_hits, 10);
    assert!((stats.hit_rate() - 0.5).abs() < 1e-9);
}

#[test]
fn test_strict_runtime_reports_failure() {
    let config = RuntimeConfig {
        strict_coverage: true,
        ..RuntimeConfig::for_testing()
    };
    let runtime = JitRuntime::new(config);
    let program = Arc::new(
        ProgramBuilder::new()
            .load_int(1)
            .op(Opcode::Dup)
            .op(Opcode::Add)
            .op(Opcode::Return)
            .build(),
    );

    assert!(runtime.on_call(fid(1), &program, 10).is_err());
    assert_eq!(runtime.stats().failures, 1);
    assert!(!runtime.cache().contains(fid(1)));
}

#[test]
fn test_cache_pressure_evicts_cold_functions() {
    // add_program is 33 bytes; room for three.
    let config = RuntimeConfig {
        max_code_size: 100,
        ..RuntimeConfig::for_testing()
    };
    let runtime = JitRuntime::new(config);
    let program = Arc::new(add_program());

    for n in 0..3 {
        runtime.on_call(fid(n), &program, 10).unwrap();
    }
    assert_eq!(runtime.cache().count(), 3);

    // Keep 0 warm, then compile a fourth function.
    runtime.on_call(fid(0), &program, 11).unwrap();
    runtime.on_call(fid(3), &program, 10).unwrap();

    assert!(runtime.cache().contains(fid(0)));
    assert!(!runtime.cache().contains(fid(1)));
    assert!(runtime.cache().size() <= 100);
}

#[test]
fn test_code_larger_than_cache_is_kept_alone() {
    let config = RuntimeConfig {
        max_code_size: 20,
        ..RuntimeConfig::for_testing()
    };
    let runtime = JitRuntime::new(config);
    let program = Arc::new(add_program());

    let code = runtime.on_call(fid(1), &program, 10).unwrap().unwrap();
    assert_eq!(code.size(), 33);
    assert_eq!(runtime.cache().count(), 1);
    assert_eq!(runtime.cache().size(), 33);

    runtime.on_call(fid(2), &program, 10).unwrap().unwrap();
    assert_eq!(runtime.cache().recency_order(), vec![fid(2)]);
    assert_eq!(runtime.stats().failures, 0);
}

#[test]
fn test_function_size_limit_is_separate_from_cache() {
    let config = RuntimeConfig {
        max_function_size: 20,
        ..RuntimeConfig::for_testing()
    };
    let runtime = JitRuntime::new(config);
    assert!(runtime.on_call(fid(1), &Arc::new(add_program()), 10).is_err());
    assert_eq!(runtime.cache().max_size(), 1024);
    assert!(runtime.cache().is_empty());
}

#[test]
fn test_back_edges_leave_cache_order_and_stats_alone() {
    let runtime = JitRuntime::new(RuntimeConfig::for_testing());
    let program = Arc::new(add_program());
    runtime.on_call(fid(1), &program, 10).unwrap();
    runtime.on_call(fid(2), &program, 10).unwrap();
    let before = runtime.cache().stats();

    for _ in 0..50 {
        runtime
            .on_back_edge(fid(1), 0, &InterpreterState::default())
            .unwrap()
            .unwrap();
    }

    assert_eq!(runtime.cache().stats(), before);
    assert_eq!(runtime.cache().recency_order(), vec![fid(2), fid(1)]);
    assert_eq!(runtime.stats().cache_hits, 0);
}

#[test]
fn test_background_results_are_drained_and_bounded() {
    let config = RuntimeConfig {
        background_compilation: true,
        max_code_size: 1 << 20,
        ..RuntimeConfig::for_testing()
    };
    let runtime = JitRuntime::new(config);
    let program = Arc::new(add_program());

    for n in 0..3 {
        runtime.on_call(fid(n), &program, 10).unwrap();
    }
    runtime.wait_for_background();
    let results = runtime.take_compilation_results();
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.is_ok() && r.code_size == 33));
    assert!(runtime.take_compilation_results().is_empty());

    let total = MAX_RETAINED_RESULTS as u64 + 100;
    for n in 100..100 + total {
        runtime.on_call(fid(n), &program, 10).unwrap();
        runtime.wait_for_background();
    }
    let results = runtime.take_compilation_results();
    assert_eq!(results.len(), MAX_RETAINED_RESULTS);
    assert_eq!(results.last().unwrap().id, fid(100 + total - 1));
    assert_eq!(runtime.compiler_stats().unwrap().results_dropped, 100);
    assert!(runtime.take_compilation_results().is_empty());
}

#[test]
fn test_synchronous_runtime_has_no_results() {
    let runtime = JitRuntime::new(RuntimeConfig::for_testing());
    runtime.on_call(fid(1), &Arc::new(add_program()), 10).unwrap();
    assert!(runtime.take_compilation_results().is_empty());
}

#[test]
fn test_background_compiles_many_functions() {
    let config = RuntimeConfig {
        background_compilation: true,
        max_code_size: 1 << 20,
        ..RuntimeConfig::for_testing()
    };
    let mut runtime = JitRuntime::new(config);
    assert!(runtime.is_background());

    let programs: Vec<_> = (0..32).map(|n| Arc::new(arith_chain(n + 2))).collect();
    for (n, program) in programs.iter().enumerate() {
        assert!(runtime.on_call(fid(n as u64), program, 10).unwrap().is_none());
        // Re-requesting while queued does not enqueue twice.
        runtime.on_call(fid(n as u64), program, 11).unwrap();
    }
    runtime.wait_for_background();

    for (n, program) in programs.iter().enumerate() {
        let code = runtime.on_call(fid(n as u64), program, 12).unwrap().unwrap();
        let direct = BaselineCompiler::new().compile_function(program, None).unwrap();
        assert_eq!(code.code(), direct.code());
    }

    let compiler_stats = runtime.compiler_stats().unwrap();
    assert_eq!(compiler_stats.compilations, 32);
    assert_eq!(compiler_stats.failures, 0);

    runtime.shutdown();
    runtime.shutdown();
}
