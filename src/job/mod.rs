//! Job records (process control blocks) and the ordering used to rank them.

use std::cmp::Ordering;
use std::fmt;
use std::ops::Range;
use std::time::{Duration, Instant};

use crate::cpu::Cpu;
use crate::cpu::trap::Trap;
use crate::mem::Word;

pub type JobId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    New,
    Ready,
    Running,
    Blocked,
}

impl JobState {
    /// Scheduling rank: lower runs first. Blocked jobs are the most urgent.
    pub fn rank(self) -> u8 {
        match self {
            JobState::Blocked => 0,
            JobState::Ready => 1,
            JobState::New => 2,
            JobState::Running => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Buffers {
    pub input: usize,
    pub output: usize,
    pub temp: usize,
}

impl Buffers {
    pub fn total(&self) -> usize {
        self.input + self.output + self.temp
    }
}

/// How a job's instruction loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Reached HLT.
    Halted,
    /// PC ran off the end of the program.
    EndOfProgram,
    Faulted(Trap),
    /// Could never be placed (larger than working memory or the unit's working set).
    Rejected(String),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Halted | Outcome::EndOfProgram)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Halted => f.write_str("halted"),
            Outcome::EndOfProgram => f.write_str("end-of-program"),
            Outcome::Faulted(trap) => write!(f, "faulted: {}", trap),
            Outcome::Rejected(why) => write!(f, "rejected: {}", why),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Timestamps {
    pub added: Option<Instant>,
    pub started: Option<Instant>,
    pub completed: Option<Instant>,
}

#[derive(Debug, Clone, Default)]
pub struct JobStats {
    pub unit: Option<usize>,
    pub io_ops: u64,
    pub instructions: u64,
    pub dispatches: u32,
    pub interrupts: u32,
    /// Occupied working-memory words right after this job was placed.
    pub ram_usage_at_dispatch: usize,
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub priority: u32,
    pub num_instructions: usize,
    pub buffers: Buffers,
    pub state: JobState,
    /// Saved registers and program counter.
    pub context: Cpu,
    pub disk_start: usize,
    /// `[ram_start, ram_end)` while resident.
    pub residency: Option<Range<usize>>,
    /// Working-set image saved on interrupt, restaged on the next dispatch.
    pub suspended: Option<Vec<Word>>,
    /// Working-set image captured when the job finished.
    pub final_image: Option<Vec<Word>>,
    pub times: Timestamps,
    pub stats: JobStats,
    pub outcome: Option<Outcome>,
}

impl Job {
    pub fn new(id: JobId, num_instructions: usize, priority: u32, disk_start: usize) -> Self {
        Self {
            id,
            priority,
            num_instructions,
            buffers: Buffers::default(),
            state: JobState::New,
            context: Cpu::default(),
            disk_start,
            residency: None,
            suspended: None,
            final_image: None,
            times: Timestamps::default(),
            stats: JobStats::default(),
            outcome: None,
        }
    }

    pub fn with_buffers(mut self, input: usize, output: usize, temp: usize) -> Self {
        self.buffers = Buffers {
            input,
            output,
            temp,
        };
        self
    }

    /// Instructions plus every buffer, in words.
    pub fn total_size(&self) -> usize {
        self.num_instructions + self.buffers.total()
    }

    pub fn is_resuming(&self) -> bool {
        self.suspended.is_some()
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn wait_time(&self) -> Option<Duration> {
        Some(self.times.started?.saturating_duration_since(self.times.added?))
    }

    pub fn completion_time(&self) -> Option<Duration> {
        Some(self.times.completed?.saturating_duration_since(self.times.started?))
    }

    /// Three-level eligibility order: state rank, then priority, then
    /// instruction count. `Less` means "runs first".
    pub fn eligibility_cmp(&self, other: &Job) -> Ordering {
        self.state
            .rank()
            .cmp(&other.state.rank())
            .then(self.priority.cmp(&other.priority))
            .then(self.num_instructions.cmp(&other.num_instructions))
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "job {} (prio {}, {} insns, {} words, {:?})",
            self.id,
            self.priority,
            self.num_instructions,
            self.total_size(),
            self.state
        )
    }
}
