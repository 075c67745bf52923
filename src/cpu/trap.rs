use crate::cpu::decode::DecodeError;
use crate::mem::MemError;
use thiserror::Error;

/// A fault that ends one job's instruction loop. Never fatal to the unit.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Trap {
    #[error("decode error at pc={pc}: {err}")]
    Decode { pc: usize, err: DecodeError },

    #[error("memory fault at pc={pc}: {err}")]
    Mem { pc: usize, err: MemError },

    #[error("instruction limit of {limit} reached at pc={pc}")]
    StepLimit { pc: usize, limit: u64 },
}

impl Trap {
    /// Returns the PC of the instruction that trapped
    pub fn pc(&self) -> usize {
        match self {
            Trap::Decode { pc, .. } => *pc,
            Trap::Mem { pc, .. } => *pc,
            Trap::StepLimit { pc, .. } => *pc,
        }
    }

    pub fn is_decode(&self) -> bool {
        matches!(self, Trap::Decode { .. })
    }

    pub fn is_memory_fault(&self) -> bool {
        matches!(self, Trap::Mem { .. })
    }
}

/// Trait for adding PC context to errors that can become Traps
pub trait WithPc<T> {
    fn with_pc(self, pc: usize) -> Result<T, Trap>;
}

impl<T> WithPc<T> for Result<T, MemError> {
    fn with_pc(self, pc: usize) -> Result<T, Trap> {
        self.map_err(|err| Trap::Mem { pc, err })
    }
}

impl<T> WithPc<T> for Result<T, DecodeError> {
    fn with_pc(self, pc: usize) -> Result<T, Trap> {
        self.map_err(|err| Trap::Decode { pc, err })
    }
}
