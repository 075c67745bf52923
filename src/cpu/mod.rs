pub mod decode;
pub mod exec;
pub mod trap;
pub mod unit;

use crate::mem::Word;

pub const NUM_REGISTERS: usize = 16;

/// Sixteen signed general-purpose registers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegisterFile([i32; NUM_REGISTERS]);

impl RegisterFile {
    pub fn get(&self, idx: u8) -> i32 {
        self.0[idx as usize & (NUM_REGISTERS - 1)]
    }

    pub fn set(&mut self, idx: u8, val: i32) {
        self.0[idx as usize & (NUM_REGISTERS - 1)] = val;
    }

    pub fn as_slice(&self) -> &[i32] {
        &self.0
    }
}

/// Architectural state a job carries between dispatches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cpu {
    pub regs: RegisterFile,
    pub pc: usize,
}

impl Cpu {
    /// Fetch, decode and execute the instruction at `pc` from `mem`.
    pub fn step(&mut self, mem: &mut [Word]) -> Result<(exec::Flow, decode::Instr), trap::Trap> {
        use trap::WithPc;

        let pc = self.pc;
        let word = mem
            .get(pc)
            .copied()
            .ok_or(crate::mem::MemError::Oob(pc as i64))
            .with_pc(pc)?;
        let instr = decode::decode(word).with_pc(pc)?;
        let flow = exec::execute(self, mem, instr)?;
        Ok((flow, instr))
    }
}
