//! Shared test environment: a flat guest memory image behind the callback
//! tables, with recorded SVCs/exceptions and a halt handle wired in after
//! CPU construction so guest traps stop the run loop.

#![allow(dead_code)]

use std::sync::{Arc, Mutex, OnceLock};

use dynarm::{A32Callbacks, A64Callbacks, ExceptionKind, HaltHandle};

/// A32 code fetches that miss the memory image decode as permanently
/// undefined, raising an exception the environment halts on.
pub const A32_TRAP_WORD: u32 = 0xE7F0_00F0;

pub struct Shared {
    pub memory: Mutex<Vec<u8>>,
    pub halt: OnceLock<HaltHandle>,
    pub svc_calls: Mutex<Vec<u32>>,
    pub exceptions: Mutex<Vec<(u64, ExceptionKind)>>,
    pub read32_count: Mutex<usize>,
}

impl Shared {
    pub fn new(memory_size: usize) -> Arc<Shared> {
        Arc::new(Shared {
            memory: Mutex::new(vec![0u8; memory_size]),
            halt: OnceLock::new(),
            svc_calls: Mutex::new(Vec::new()),
            exceptions: Mutex::new(Vec::new()),
            read32_count: Mutex::new(0),
        })
    }

    pub fn attach_halt(&self, handle: HaltHandle) {
        let _ = self.halt.set(handle);
    }

    fn request_halt(&self) {
        if let Some(handle) = self.halt.get() {
            handle.halt();
        }
    }

    pub fn write_words(&self, addr: u32, words: &[u32]) {
        let mut mem = self.memory.lock().unwrap();
        for (i, w) in words.iter().enumerate() {
            let at = addr as usize + i * 4;
            mem[at..at + 4].copy_from_slice(&w.to_le_bytes());
        }
    }

    pub fn write_halfwords(&self, addr: u32, halfwords: &[u16]) {
        let mut mem = self.memory.lock().unwrap();
        for (i, h) in halfwords.iter().enumerate() {
            let at = addr as usize + i * 2;
            mem[at..at + 2].copy_from_slice(&h.to_le_bytes());
        }
    }

    pub fn fill(&self, addr: u32, len: usize, byte: u8) {
        let mut mem = self.memory.lock().unwrap();
        mem[addr as usize..addr as usize + len].fill(byte);
    }

    pub fn byte(&self, addr: u32) -> u8 {
        self.memory.lock().unwrap()[addr as usize]
    }

    pub fn word(&self, addr: u32) -> u32 {
        let mem = self.memory.lock().unwrap();
        let at = addr as usize;
        u32::from_le_bytes(mem[at..at + 4].try_into().unwrap())
    }

    fn read(&self, vaddr: u64, bytes: usize) -> u64 {
        let mem = self.memory.lock().unwrap();
        let at = vaddr as usize;
        if at + bytes > mem.len() {
            return 0;
        }
        let mut value = 0u64;
        for i in (0..bytes).rev() {
            value = (value << 8) | mem[at + i] as u64;
        }
        value
    }

    fn write(&self, vaddr: u64, bytes: usize, value: u64) {
        let mut mem = self.memory.lock().unwrap();
        let at = vaddr as usize;
        if at + bytes > mem.len() {
            return;
        }
        for i in 0..bytes {
            mem[at + i] = (value >> (8 * i)) as u8;
        }
    }

    /// Compare-and-swap under the memory lock, the embedder half of the
    /// exclusive-store contract.
    fn write_exclusive(&self, vaddr: u64, bytes: usize, value: u64, expected: u64) -> bool {
        let mut mem = self.memory.lock().unwrap();
        let at = vaddr as usize;
        if at + bytes > mem.len() {
            return false;
        }
        let mut current = 0u64;
        for i in (0..bytes).rev() {
            current = (current << 8) | mem[at + i] as u64;
        }
        if current != expected {
            return false;
        }
        for i in 0..bytes {
            mem[at + i] = (value >> (8 * i)) as u8;
        }
        true
    }
}

pub struct TestEnv {
    pub shared: Arc<Shared>,
    pub ticks: u64,
}

impl TestEnv {
    pub fn new(shared: Arc<Shared>) -> Box<TestEnv> {
        Box::new(TestEnv {
            shared,
            ticks: 10_000,
        })
    }
}

impl A32Callbacks for TestEnv {
    fn memory_read_code(&mut self, vaddr: u32) -> u32 {
        let aligned = (vaddr & !3) as u64;
        let mem = self.shared.memory.lock().unwrap();
        let at = aligned as usize;
        if at + 4 > mem.len() {
            return A32_TRAP_WORD;
        }
        u32::from_le_bytes(mem[at..at + 4].try_into().unwrap())
    }

    fn memory_read_8(&mut self, vaddr: u32) -> u8 {
        self.shared.read(vaddr as u64, 1) as u8
    }
    fn memory_read_16(&mut self, vaddr: u32) -> u16 {
        self.shared.read(vaddr as u64, 2) as u16
    }
    fn memory_read_32(&mut self, vaddr: u32) -> u32 {
        *self.shared.read32_count.lock().unwrap() += 1;
        self.shared.read(vaddr as u64, 4) as u32
    }
    fn memory_read_64(&mut self, vaddr: u32) -> u64 {
        self.shared.read(vaddr as u64, 8)
    }

    fn memory_write_8(&mut self, vaddr: u32, value: u8) {
        self.shared.write(vaddr as u64, 1, value as u64);
    }
    fn memory_write_16(&mut self, vaddr: u32, value: u16) {
        self.shared.write(vaddr as u64, 2, value as u64);
    }
    fn memory_write_32(&mut self, vaddr: u32, value: u32) {
        self.shared.write(vaddr as u64, 4, value as u64);
    }
    fn memory_write_64(&mut self, vaddr: u32, value: u64) {
        self.shared.write(vaddr as u64, 8, value);
    }

    fn memory_write_exclusive_8(&mut self, vaddr: u32, value: u8, expected: u8) -> bool {
        self.shared
            .write_exclusive(vaddr as u64, 1, value as u64, expected as u64)
    }
    fn memory_write_exclusive_16(&mut self, vaddr: u32, value: u16, expected: u16) -> bool {
        self.shared
            .write_exclusive(vaddr as u64, 2, value as u64, expected as u64)
    }
    fn memory_write_exclusive_32(&mut self, vaddr: u32, value: u32, expected: u32) -> bool {
        self.shared
            .write_exclusive(vaddr as u64, 4, value as u64, expected as u64)
    }
    fn memory_write_exclusive_64(&mut self, vaddr: u32, value: u64, expected: u64) -> bool {
        self.shared.write_exclusive(vaddr as u64, 8, value, expected)
    }

    fn call_svc(&mut self, swi: u32) {
        self.shared.svc_calls.lock().unwrap().push(swi);
        self.shared.request_halt();
    }

    fn exception_raised(&mut self, pc: u32, kind: ExceptionKind) {
        self.shared.exceptions.lock().unwrap().push((pc as u64, kind));
        self.shared.request_halt();
    }

    fn interpreter_fallback(&mut self, _pc: u32, _num_instructions: usize) {
        self.shared.request_halt();
    }

    fn add_ticks(&mut self, ticks: u64) {
        self.ticks = self.ticks.saturating_sub(ticks);
    }

    fn get_ticks_remaining(&mut self) -> u64 {
        self.ticks.max(1)
    }
}

impl A64Callbacks for TestEnv {
    fn memory_read_code(&mut self, vaddr: u64) -> u32 {
        let aligned = (vaddr & !3) as usize;
        let mem = self.shared.memory.lock().unwrap();
        if aligned + 4 > mem.len() {
            // Not a valid A64 encoding; decodes as undefined.
            return 0;
        }
        u32::from_le_bytes(mem[aligned..aligned + 4].try_into().unwrap())
    }

    fn memory_read_8(&mut self, vaddr: u64) -> u8 {
        self.shared.read(vaddr, 1) as u8
    }
    fn memory_read_16(&mut self, vaddr: u64) -> u16 {
        self.shared.read(vaddr, 2) as u16
    }
    fn memory_read_32(&mut self, vaddr: u64) -> u32 {
        *self.shared.read32_count.lock().unwrap() += 1;
        self.shared.read(vaddr, 4) as u32
    }
    fn memory_read_64(&mut self, vaddr: u64) -> u64 {
        self.shared.read(vaddr, 8)
    }

    fn memory_write_8(&mut self, vaddr: u64, value: u8) {
        self.shared.write(vaddr, 1, value as u64);
    }
    fn memory_write_16(&mut self, vaddr: u64, value: u16) {
        self.shared.write(vaddr, 2, value as u64);
    }
    fn memory_write_32(&mut self, vaddr: u64, value: u32) {
        self.shared.write(vaddr, 4, value as u64);
    }
    fn memory_write_64(&mut self, vaddr: u64, value: u64) {
        self.shared.write(vaddr, 8, value);
    }

    fn memory_write_exclusive_8(&mut self, vaddr: u64, value: u8, expected: u8) -> bool {
        self.shared
            .write_exclusive(vaddr, 1, value as u64, expected as u64)
    }
    fn memory_write_exclusive_16(&mut self, vaddr: u64, value: u16, expected: u16) -> bool {
        self.shared
            .write_exclusive(vaddr, 2, value as u64, expected as u64)
    }
    fn memory_write_exclusive_32(&mut self, vaddr: u64, value: u32, expected: u32) -> bool {
        self.shared
            .write_exclusive(vaddr, 4, value as u64, expected as u64)
    }
    fn memory_write_exclusive_64(&mut self, vaddr: u64, value: u64, expected: u64) -> bool {
        self.shared.write_exclusive(vaddr, 8, value, expected)
    }

    fn call_svc(&mut self, swi: u32) {
        self.shared.svc_calls.lock().unwrap().push(swi);
        self.shared.request_halt();
    }

    fn exception_raised(&mut self, pc: u64, kind: ExceptionKind) {
        self.shared.exceptions.lock().unwrap().push((pc, kind));
        self.shared.request_halt();
    }

    fn interpreter_fallback(&mut self, _pc: u64, _num_instructions: usize) {
        self.shared.request_halt();
    }

    fn get_cntpct(&mut self) -> u64 {
        0x1234_5678
    }

    fn add_ticks(&mut self, ticks: u64) {
        self.ticks = self.ticks.saturating_sub(ticks);
    }

    fn get_ticks_remaining(&mut self) -> u64 {
        self.ticks.max(1)
    }
}
