//! Register allocator invariants over seeded random programs.

mod common;

use basalt_jit::backend::x64::registers::{Gpr, GprSet};
use basalt_jit::regalloc::{self, AllocatorConfig, Liveness, ValueId};
use common::{random_program, rng, wide_program};

#[test]
fn test_no_register_shared_by_overlapping_ranges() {
    let mut rng = rng(0x5EED);
    for round in 0..200 {
        let program = random_program(&mut rng, 96);
        let ranges = Liveness::analyze(&program).into_ranges();
        let alloc = regalloc::allocate(&program);

        for (i, a) in ranges.iter().enumerate() {
            for b in &ranges[i + 1..] {
                if !a.overlaps(b) {
                    continue;
                }
                if let (Some(ra), Some(rb)) = (alloc.get(a.value), alloc.get(b.value)) {
                    assert_ne!(
                        ra, rb,
                        "round {}: {:?} and {:?} overlap but share {}",
                        round, a, b, ra
                    );
                }
            }
        }
    }
}

#[test]
fn test_every_value_is_accounted_for() {
    let mut rng = rng(42);
    for _ in 0..100 {
        let program = random_program(&mut rng, 128);
        let live = Liveness::analyze(&program);
        let alloc = regalloc::allocate(&program);

        assert_eq!(alloc.len(), live.num_values());
        for range in live.ranges() {
            let assigned = alloc.get(range.value).is_some();
            assert!(assigned != alloc.is_spilled(range.value));
        }
    }
}

#[test]
fn test_frame_registers_never_assigned() {
    let mut rng = rng(1);
    for _ in 0..100 {
        let program = random_program(&mut rng, 128);
        let used = regalloc::allocate(&program).used_registers();
        assert!(!used.contains(Gpr::Rsp));
        assert!(!used.contains(Gpr::Rbp));
    }
}

#[test]
fn test_capacity_spills_excess() {
    let program = wide_program(20);
    let alloc = regalloc::allocate(&program);

    for pos in 0..14 {
        assert!(alloc.register_at(pos).is_some(), "v{} should be in a register", pos);
    }
    for pos in 14..20 {
        assert!(alloc.is_spilled(ValueId::new(pos)), "v{} should be spilled", pos);
    }
}

#[test]
fn test_restricted_register_file() {
    let config = AllocatorConfig::default().with_registers(
        GprSet::EMPTY.insert(Gpr::R12).insert(Gpr::R13),
    );
    let program = wide_program(4);
    let (alloc, stats) = regalloc::allocate_with(&program, config);

    assert_eq!(alloc.register_at(0), Some(Gpr::R12));
    assert_eq!(alloc.register_at(1), Some(Gpr::R13));
    assert!(alloc.is_spilled(ValueId::new(2)));
    assert!(alloc.is_spilled(ValueId::new(3)));
    assert_eq!(stats.num_values, alloc.len());
    assert!(alloc
        .used_registers()
        .iter()
        .all(|r| r == Gpr::R12 || r == Gpr::R13));
}

#[test]
fn test_allocation_is_deterministic() {
    let mut rng = rng(99);
    for _ in 0..20 {
        let program = random_program(&mut rng, 200);
        assert_eq!(regalloc::allocate(&program), regalloc::allocate(&program));
    }
}
