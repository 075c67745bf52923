//! Run configuration. Fixed for the duration of one run.

use std::time::Duration;

use crate::cpu::unit::UnitConfig;
use crate::sched::SchedulerMode;

#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Number of execution units.
    pub units: usize,
    /// Working-memory size in words.
    pub ram_words: usize,
    /// Backing-storage size in words.
    pub disk_words: usize,
    /// Per-unit working-set size in words.
    pub cache_words: usize,
    pub mode: SchedulerMode,
    /// Simulated cost of one instruction.
    pub delay: Duration,
    /// Time slice in instructions (0 = run each dispatch to completion).
    pub quantum: u64,
    /// Per-job instruction limit (0 = unlimited).
    pub max_insns: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            units: 4,
            ram_words: 1024,
            disk_words: 2048,
            cache_words: 128,
            mode: SchedulerMode::Priority,
            delay: Duration::ZERO,
            quantum: 0,
            max_insns: 0,
        }
    }
}

impl SimConfig {
    pub fn unit_config(&self) -> UnitConfig {
        UnitConfig {
            cache_words: self.cache_words,
            delay: self.delay,
            quantum: self.quantum,
            max_insns: self.max_insns,
        }
    }
}
