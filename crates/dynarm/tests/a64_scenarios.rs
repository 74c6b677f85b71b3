//! End-to-end A64 scenarios through the full pipeline, including the
//! `DC ZVA` lowering the optimizer performs when cache-op hooking is off.

mod common;

use std::sync::Arc;

use common::{Shared, TestEnv};
use dynarm::{A64Config, A64Cpu};

fn cpu_with(shared: &Arc<Shared>) -> A64Cpu {
    let cpu = A64Cpu::new(A64Config::new(TestEnv::new(shared.clone()))).unwrap();
    shared.attach_halt(cpu.halt_handle());
    cpu
}

#[test]
fn movz_then_svc_halts_with_the_value() {
    let shared = Shared::new(4096);
    // movz x0, #42; svc #0
    shared.write_words(0, &[0xD280_0540, 0xD400_0001]);
    let mut cpu = cpu_with(&shared);
    cpu.set_pc(0);
    cpu.run();
    assert_eq!(cpu.x(0), 42);
    assert_eq!(cpu.pc(), 8);
    assert_eq!(shared.svc_calls.lock().unwrap().as_slice(), &[0]);
}

#[test]
fn dc_zva_zeroes_the_configured_block() {
    let shared = Shared::new(4096);
    // dc zva, x3; svc #0
    shared.write_words(0, &[0xD50B_7423, 0xD400_0001]);
    // 0xFF everywhere around the target block.
    shared.fill(0x180, 0x100, 0xFF);
    let mut cpu = cpu_with(&shared);
    cpu.set_x(3, 0x200);
    cpu.set_pc(0);
    cpu.run();
    // dczid_el0 defaults to 4: a 64-byte zeroing block.
    for offset in 0..64u32 {
        assert_eq!(shared.byte(0x200 + offset), 0, "byte {offset} not zeroed");
    }
    assert_eq!(shared.byte(0x1FF), 0xFF, "bytes below the block untouched");
    assert_eq!(shared.byte(0x240), 0xFF, "bytes above the block untouched");
}

#[test]
fn cbz_branches_on_zero() {
    let shared = Shared::new(4096);
    // cbz x1, +12; movz x0, #1; svc; movz x0, #2; svc
    shared.write_words(
        0,
        &[0xB400_0061, 0xD280_0020, 0xD400_0001, 0xD280_0040, 0xD400_0001],
    );
    let mut cpu = cpu_with(&shared);
    cpu.set_x(1, 0);
    cpu.set_pc(0);
    cpu.run();
    assert_eq!(cpu.x(0), 2, "x1 == 0 takes the branch to the second arm");

    let shared2 = Shared::new(4096);
    shared2.write_words(
        0,
        &[0xB400_0061, 0xD280_0020, 0xD400_0001, 0xD280_0040, 0xD400_0001],
    );
    let mut cpu2 = cpu_with(&shared2);
    cpu2.set_x(1, 5);
    cpu2.set_pc(0);
    cpu2.run();
    assert_eq!(cpu2.x(0), 1, "x1 != 0 falls through");
}

#[test]
fn subs_flags_feed_a_conditional_branch() {
    let shared = Shared::new(4096);
    // subs xzr, x0, #5 (cmp); b.eq +8; movz x1, #1; svc; movz x1, #2; svc
    shared.write_words(
        0,
        &[
            0xF100_141F,
            0x5400_0060,
            0xD280_0021,
            0xD400_0001,
            0xD280_0041,
            0xD400_0001,
        ],
    );
    let mut cpu = cpu_with(&shared);
    cpu.set_x(0, 5);
    cpu.set_pc(0);
    cpu.run();
    assert_eq!(cpu.x(1), 2, "equal compare takes the branch");

    let shared2 = Shared::new(4096);
    shared2.write_words(
        0,
        &[
            0xF100_141F,
            0x5400_0060,
            0xD280_0021,
            0xD400_0001,
            0xD280_0041,
            0xD400_0001,
        ],
    );
    let mut cpu2 = cpu_with(&shared2);
    cpu2.set_x(0, 7);
    cpu2.set_pc(0);
    cpu2.run();
    assert_eq!(cpu2.x(1), 1);
}

#[test]
fn loads_and_stores_roundtrip_through_memory() {
    let shared = Shared::new(4096);
    // ldr x1, [x0]; add x1, x1, #1; str x1, [x0, #8]; svc
    shared.write_words(
        0,
        &[0xF940_0001, 0x9100_0421, 0xF900_0401, 0xD400_0001],
    );
    shared.write_words(0x100, &[0x1234_5678, 0]);
    let mut cpu = cpu_with(&shared);
    cpu.set_x(0, 0x100);
    cpu.set_pc(0);
    cpu.run();
    assert_eq!(cpu.x(1), 0x1234_5679);
    assert_eq!(shared.word(0x108), 0x1234_5679);
}

#[test]
fn bl_and_ret_return_through_the_rsb() {
    let shared = Shared::new(4096);
    // bl +8; svc; ret
    shared.write_words(0, &[0x9400_0002, 0xD400_0001, 0xD65F_03C0]);
    let mut cpu = cpu_with(&shared);
    cpu.set_pc(0);
    cpu.run();
    assert_eq!(cpu.x(30), 4);
    assert_eq!(cpu.pc(), 8);
}

#[test]
fn fadd_double_produces_the_sum_and_clears_upper_lanes() {
    let shared = Shared::new(4096);
    // fadd d2, d0, d1; svc
    shared.write_words(0, &[0x1E61_2802, 0xD400_0001]);
    let mut cpu = cpu_with(&shared);
    cpu.set_vector(0, 1.5f64.to_bits() as u128);
    cpu.set_vector(1, (2.25f64.to_bits() as u128) | (0xAAAA_u128 << 64));
    cpu.set_vector(2, u128::MAX);
    cpu.set_pc(0);
    cpu.run();
    assert_eq!(cpu.vector(2), 3.75f64.to_bits() as u128, "scalar write zeroes the upper lane");
}

#[test]
fn vector_add_works_per_lane() {
    let shared = Shared::new(4096);
    // add v0.4s, v1.4s, v2.4s; svc
    shared.write_words(0, &[0x4EA2_8420, 0xD400_0001]);
    let mut cpu = cpu_with(&shared);
    cpu.set_vector(1, 0x00000003_00000002_00000001_00000000u128);
    cpu.set_vector(2, 0x00000010_00000010_00000010_00000010u128);
    cpu.set_pc(0);
    cpu.run();
    assert_eq!(cpu.vector(0), 0x00000013_00000012_00000011_00000010u128);
}

#[test]
fn mrs_reads_the_configured_id_registers() {
    let shared = Shared::new(4096);
    // mrs x0, dczid_el0; svc
    shared.write_words(0, &[0xD53B_00E0, 0xD400_0001]);
    let mut cpu = cpu_with(&shared);
    cpu.set_pc(0);
    cpu.run();
    assert_eq!(cpu.x(0), 4);
}

#[test]
fn ldxr_stxr_pair_commits_when_uninterrupted() {
    let shared = Shared::new(4096);
    // ldxr x0, [x1]; stxr w2, x0, [x1]; svc
    shared.write_words(0, &[0xC85F_7C20, 0xC802_7C20, 0xD400_0001]);
    shared.write_words(0x100, &[0x55, 0]);
    let mut cpu = cpu_with(&shared);
    cpu.set_x(1, 0x100);
    cpu.set_pc(0);
    cpu.run();
    assert_eq!(cpu.x(0), 0x55);
    assert_eq!(cpu.x(2), 0, "uninterrupted exclusive store succeeds");
}
