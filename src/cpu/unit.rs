//! Execution units: the workers that pull jobs and run them to completion.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam_utils::Backoff;

use super::Cpu;
use super::exec::Flow;
use super::trap::Trap;
use crate::dispatch::Dispatcher;
use crate::job::{Job, JobId, Outcome};
use crate::mem::Word;
use crate::sched::Scheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Free,
    Executing,
}

#[derive(Debug, Clone, Copy)]
pub struct UnitConfig {
    /// Working-set capacity in words.
    pub cache_words: usize,
    /// Simulated cost of one instruction.
    pub delay: Duration,
    /// Instructions per dispatch before the unit interrupts itself (0 = off).
    pub quantum: u64,
    /// Instructions per job before it is faulted (0 = unlimited).
    pub max_insns: u64,
}

impl Default for UnitConfig {
    fn default() -> Self {
        Self {
            cache_words: 128,
            delay: Duration::ZERO,
            quantum: 0,
            max_insns: 0,
        }
    }
}

/// Cooperative interrupt signal for one unit, polled between instructions.
#[derive(Debug, Clone, Default)]
pub struct InterruptLine(Arc<AtomicBool>);

impl InterruptLine {
    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

#[derive(Debug, Clone, Default)]
pub struct UnitStats {
    pub io_ops: u64,
    pub instructions: u64,
    pub jobs_run: u64,
    pub busy: Duration,
}

/// How one dispatch of a job ended.
enum Exit {
    Done(Outcome),
    Preempted,
}

pub struct ExecUnit {
    id: usize,
    config: UnitConfig,
    interrupt: InterruptLine,
    pub(crate) cpu: Cpu,
    pub(crate) cache: Vec<Word>,
    pub(crate) state: UnitState,
    pub(crate) current: Option<JobId>,
    pub(crate) stats: UnitStats,
}

impl ExecUnit {
    pub fn new(id: usize, config: UnitConfig) -> Self {
        Self::with_interrupt(id, config, InterruptLine::default())
    }

    pub fn with_interrupt(id: usize, config: UnitConfig, interrupt: InterruptLine) -> Self {
        Self {
            id,
            config,
            interrupt,
            cpu: Cpu::default(),
            cache: Vec::with_capacity(config.cache_words),
            state: UnitState::Free,
            current: None,
            stats: UnitStats::default(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn cache_capacity(&self) -> usize {
        self.config.cache_words
    }

    pub fn state(&self) -> UnitState {
        self.state
    }

    pub fn current_job(&self) -> Option<JobId> {
        self.current
    }

    pub fn stats(&self) -> &UnitStats {
        &self.stats
    }

    pub fn interrupt_line(&self) -> InterruptLine {
        self.interrupt.clone()
    }

    /// Pull jobs until the ready queue is empty.
    pub fn run(&mut self, scheduler: &Scheduler, dispatcher: &Dispatcher) {
        let backoff = Backoff::new();

        while scheduler.has_next() {
            let Some(mut job) = scheduler.next_job() else {
                continue;
            };

            if let Err(err) = dispatcher.load(&mut job, self) {
                if err.is_retryable() {
                    log::debug!("unit {}: {}, requeueing", self.id, err);
                    scheduler.requeue(job);
                    if backoff.is_completed() {
                        std::thread::sleep(Duration::from_millis(1));
                    } else {
                        backoff.snooze();
                    }
                } else {
                    log::warn!("unit {}: {}", self.id, err);
                    job.outcome = Some(Outcome::Rejected(err.to_string()));
                    scheduler.retire(job);
                }
                continue;
            }
            backoff.reset();
            // a raise while idle was aimed at no job
            self.interrupt.take();

            match self.execute_job(&mut job) {
                Exit::Preempted => match dispatcher.suspend(&mut job, self) {
                    Ok(()) => scheduler.handle_interrupt(job),
                    Err(err) => {
                        log::error!("unit {}: {}", self.id, err);
                        job.outcome = Some(Outcome::Rejected(err.to_string()));
                        scheduler.retire(job);
                    }
                },
                Exit::Done(outcome) => {
                    if let Err(err) = dispatcher.unload(&mut job, self) {
                        log::error!("unit {}: {}", self.id, err);
                    }
                    self.stats.jobs_run += 1;
                    match &outcome {
                        Outcome::Faulted(trap) => log::warn!("job {} {}", job.id, trap),
                        _ => log::info!(
                            "job {} {} on unit {} after {} instructions",
                            job.id,
                            outcome,
                            self.id,
                            job.stats.instructions
                        ),
                    }
                    job.outcome = Some(outcome);
                    scheduler.retire(job);
                }
            }
        }

        log::debug!("unit {} idle, ready queue empty", self.id);
    }

    /// Fetch-decode-execute until HLT, the end of the program, a fault, or an
    /// interrupt.
    fn execute_job(&mut self, job: &mut Job) -> Exit {
        let started = Instant::now();
        let mut slice = 0u64;

        let exit = loop {
            if self.cpu.pc >= job.num_instructions {
                break Exit::Done(Outcome::EndOfProgram);
            }
            if self.interrupt.take() {
                break Exit::Preempted;
            }
            if self.config.quantum > 0 && slice >= self.config.quantum {
                break Exit::Preempted;
            }
            if self.config.max_insns > 0 && job.stats.instructions >= self.config.max_insns {
                break Exit::Done(Outcome::Faulted(Trap::StepLimit {
                    pc: self.cpu.pc,
                    limit: self.config.max_insns,
                }));
            }

            if log::log_enabled!(log::Level::Trace) {
                crate::debug::trace(self.id, job.id, &self.cpu, job.stats.instructions);
            }

            let step = self.cpu.step(&mut self.cache);
            slice += 1;
            job.stats.instructions += 1;
            self.stats.instructions += 1;

            match step {
                Ok((flow, instr)) => {
                    if instr.opcode.is_io() {
                        job.stats.io_ops += 1;
                        self.stats.io_ops += 1;
                    }
                    if flow == Flow::Halt {
                        break Exit::Done(Outcome::Halted);
                    }
                }
                Err(trap) => break Exit::Done(Outcome::Faulted(trap)),
            }

            if !self.config.delay.is_zero() {
                std::thread::sleep(self.config.delay);
            }
        };

        self.stats.busy += started.elapsed();
        exit
    }
}
