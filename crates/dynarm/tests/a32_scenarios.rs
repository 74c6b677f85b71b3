//! End-to-end A32/Thumb scenarios: translate, optimize, emit, and execute
//! real guest code through the full pipeline.

mod common;

use std::sync::Arc;

use common::{Shared, TestEnv};
use dynarm::{A32Config, A32Cpu, ExclusiveMonitor};

fn cpu_with(shared: &Arc<Shared>) -> A32Cpu {
    let cpu = A32Cpu::new(A32Config::new(TestEnv::new(shared.clone()))).unwrap();
    shared.attach_halt(cpu.halt_handle());
    cpu
}

#[test]
fn mla_computes_multiply_accumulate() {
    let shared = Shared::new(4096);
    // mla r3, r3, r2, r0 at PC 0; the fetch past the program traps.
    shared.write_words(0, &[0xE023_0293]);
    let mut cpu = cpu_with(&shared);
    cpu.set_reg(0, 1);
    cpu.set_reg(2, 2);
    cpu.set_reg(3, 3);
    cpu.set_cpsr(0x1D0);
    cpu.set_pc(0);
    cpu.run();
    assert_eq!(cpu.reg(3), 7);
    assert_eq!(cpu.pc(), 4);
    assert_eq!(cpu.cpsr(), 0x1D0);
}

#[test]
fn thumb2_push_pop_roundtrip() {
    let shared = Shared::new(4096);
    // push.w {r3, r4}; pop {r0, r1}; push.w {r1, r2}
    shared.write_halfwords(0, &[0xE92D, 0x0018, 0xBC03, 0xE92D, 0x0006]);
    let mut cpu = cpu_with(&shared);
    cpu.set_reg(1, 2);
    cpu.set_reg(3, 3);
    cpu.set_reg(4, 4);
    cpu.set_reg(13, 24);
    cpu.set_cpsr(0x1D0 | (1 << 5));
    cpu.set_pc(0);
    cpu.step();
    cpu.step();
    cpu.step();
    assert_eq!(cpu.reg(0), 3);
    assert_eq!(cpu.reg(1), 4);
    assert_eq!(cpu.reg(13), 16);
    assert_eq!(cpu.pc(), 10);
}

#[test]
fn it_block_executes_under_a_true_condition() {
    let shared = Shared::new(4096);
    // it eq; moveq r0, #1; svc #0
    shared.write_halfwords(0, &[0xBF08, 0x2001, 0xDF00]);
    let mut cpu = cpu_with(&shared);
    // Z set, Thumb mode.
    cpu.set_cpsr(0x4000_0030 | 0x1C0);
    cpu.set_pc(0);
    cpu.run();
    assert_eq!(cpu.reg(0), 1);
    assert_eq!(cpu.pc(), 6);
}

#[test]
fn it_block_skips_under_a_false_condition_and_still_advances() {
    let shared = Shared::new(4096);
    shared.write_halfwords(0, &[0xBF08, 0x2001, 0xDF00]);
    let mut cpu = cpu_with(&shared);
    // Z clear, Thumb mode.
    cpu.set_cpsr(0x0000_0030 | 0x1C0);
    cpu.set_pc(0);
    cpu.run();
    assert_eq!(cpu.reg(0), 0, "the guarded MOV must not have executed");
    assert_eq!(
        cpu.pc(),
        6,
        "PC advances over the skipped IT region to the trailing SVC"
    );
}

#[test]
fn ldrex_strex_pair_succeeds_when_uninterrupted() {
    let shared = Shared::new(4096);
    // ldrex r0, [r2]; strex r1, r0, [r2]
    shared.write_words(0, &[0xE192_0F9F, 0xE182_1F90]);
    shared.write_words(0x100, &[5]);
    let mut cpu = cpu_with(&shared);
    cpu.set_reg(2, 0x100);
    cpu.set_pc(0);
    cpu.step();
    assert_eq!(cpu.reg(0), 5);
    cpu.step();
    assert_eq!(cpu.reg(1), 0, "the exclusive store must have committed");
    assert_eq!(shared.word(0x100), 5);
}

#[test]
fn strex_fails_when_another_processor_writes_in_between() {
    let shared = Shared::new(4096);
    shared.write_words(0, &[0xE192_0F9F, 0xE182_1F90]);
    // CPU1's program: mov r3, #9; str r3, [r2]; svc #0
    shared.write_words(0x200, &[0xE3A0_3009, 0xE582_3000, 0xEF00_0000]);
    shared.write_words(0x100, &[5]);

    let monitor = Arc::new(ExclusiveMonitor::new(2));
    let mut config0 = A32Config::new(TestEnv::new(shared.clone()));
    config0.processor_id = 0;
    config0.global_monitor = Some(monitor.clone());
    let mut cpu0 = A32Cpu::new(config0).unwrap();
    shared.attach_halt(cpu0.halt_handle());

    let mut config1 = A32Config::new(TestEnv::new(shared.clone()));
    config1.processor_id = 1;
    config1.global_monitor = Some(monitor);
    let mut cpu1 = A32Cpu::new(config1).unwrap();

    cpu0.set_reg(2, 0x100);
    cpu0.set_pc(0);
    cpu0.step(); // ldrex observes 5 and claims

    cpu1.set_reg(2, 0x100);
    cpu1.set_pc(0x200);
    cpu1.step();
    cpu1.step(); // str r3, [r2] lands 9 in memory

    cpu0.step(); // strex
    assert_eq!(cpu0.reg(1), 1, "the interrupted exclusive store must fail");
    assert_eq!(shared.word(0x100), 9, "the intervening store survives");
}

#[test]
fn bl_and_bx_lr_return_through_the_rsb() {
    let shared = Shared::new(4096);
    // bl +0 (target 8); svc #0; bx lr
    shared.write_words(0, &[0xEB00_0000, 0xEF00_0000, 0xE12F_FF1E]);
    let mut cpu = cpu_with(&shared);
    cpu.set_pc(0);
    cpu.run();
    assert_eq!(cpu.reg(14), 4, "BL must record the return address");
    assert_eq!(cpu.pc(), 8, "execution halts after the SVC at PC 4");
    assert_eq!(shared.svc_calls.lock().unwrap().as_slice(), &[0]);
}

#[test]
fn undefined_instruction_surfaces_to_the_embedder() {
    let shared = Shared::new(4096);
    shared.write_words(0, &[0xE7F0_00F0]);
    let mut cpu = cpu_with(&shared);
    cpu.set_pc(0);
    cpu.run();
    let exceptions = shared.exceptions.lock().unwrap();
    assert_eq!(exceptions.len(), 1);
    assert_eq!(exceptions[0].0, 0);
}

#[test]
fn invalidated_code_is_retranslated() {
    let shared = Shared::new(4096);
    // mov r0, #1; svc #0
    shared.write_words(0, &[0xE3A0_0001, 0xEF00_0000]);
    let mut cpu = cpu_with(&shared);
    cpu.set_pc(0);
    cpu.run();
    assert_eq!(cpu.reg(0), 1);

    // Guest code self-modifies: mov r0, #2.
    shared.write_words(0, &[0xE3A0_0002]);
    cpu.invalidate_cache_range(0, 4);
    cpu.set_pc(0);
    cpu.run();
    assert_eq!(cpu.reg(0), 2);
}

#[test]
fn conditional_flags_drive_data_processing() {
    let shared = Shared::new(4096);
    // cmp r0, #5; moveq r1, #1; svc #0
    shared.write_words(0, &[0xE350_0005, 0x03A0_1001, 0xEF00_0000]);
    let mut cpu = cpu_with(&shared);
    cpu.set_reg(0, 5);
    cpu.set_pc(0);
    cpu.run();
    assert_eq!(cpu.reg(1), 1, "CMP sets Z, so the MOVEQ executes");
    assert_ne!(cpu.cpsr() & 0x4000_0000, 0, "Z must be set by the compare");

    let shared2 = Shared::new(4096);
    shared2.write_words(0, &[0xE350_0005, 0x03A0_1001, 0xEF00_0000]);
    let mut cpu2 = cpu_with(&shared2);
    cpu2.set_reg(0, 7);
    cpu2.set_reg(1, 0);
    cpu2.set_pc(0);
    cpu2.run();
    assert_eq!(cpu2.reg(1), 0, "with Z clear the MOVEQ is skipped");
}

#[test]
fn register_writes_read_back_through_the_api() {
    let shared = Shared::new(64);
    let mut cpu = cpu_with(&shared);
    for i in 0..16 {
        cpu.set_reg(i, 0x1000 + i as u32);
        assert_eq!(cpu.reg(i), 0x1000 + i as u32);
    }
    cpu.set_cpsr(0xF000_01D0);
    assert_eq!(cpu.cpsr(), 0xF000_01D0);
    cpu.set_ext_reg(7, 0xDEAD_BEEF);
    assert_eq!(cpu.ext_reg(7), 0xDEAD_BEEF);
    assert_eq!(cpu.ext_reg(6), 0);
    cpu.set_fpcr(0x0300_0000);
    assert_eq!(cpu.fpcr(), 0x0300_0000);
}

#[test]
fn disassembly_is_available_for_compiled_blocks() {
    let shared = Shared::new(4096);
    shared.write_words(0, &[0xE3A0_0001, 0xEF00_0000]);
    let mut cpu = cpu_with(&shared);
    cpu.set_pc(0);
    cpu.run();
    cpu.set_pc(0);
    let text = cpu.disassemble(0).expect("block 0 is compiled");
    assert!(text.contains("mov"), "dump was:\n{text}");
}
