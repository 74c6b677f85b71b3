//! Debug-only textual dump of emitted host code,
//! using an independent disassembler rather than the encoder's own
//! formatter so the dump cross-checks what was actually emitted.

use capstone::prelude::*;

pub fn dump(bytes: &[u8]) -> String {
    let cs = match Capstone::new()
        .x86()
        .mode(arch::x86::ArchMode::Mode64)
        .build()
    {
        Ok(cs) => cs,
        Err(e) => return format!("<disassembler unavailable: {e}>"),
    };
    let mut out = String::new();
    match cs.disasm_all(bytes, 0) {
        Ok(insns) => {
            for insn in insns.iter() {
                out.push_str(&format!(
                    "{:#06x}: {} {}\n",
                    insn.address(),
                    insn.mnemonic().unwrap_or("?"),
                    insn.op_str().unwrap_or(""),
                ));
            }
        }
        Err(e) => out.push_str(&format!("<disassembly failed: {e}>")),
    }
    out
}
