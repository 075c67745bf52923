//! Ties the pieces together: one scheduler, one dispatcher (and the memory it
//! guards) and a pool of execution units running on scoped threads.

use std::io;
use std::path::Path;
use std::thread;
use std::time::Instant;

use crate::config::SimConfig;
use crate::cpu::unit::{ExecUnit, InterruptLine};
use crate::dispatch::Dispatcher;
use crate::job::Job;
use crate::loader::{self, LoadError};
use crate::mem::Memory;
use crate::metrics::RunReport;
use crate::sched::Scheduler;

pub struct Kernel {
    config: SimConfig,
    scheduler: Scheduler,
    dispatcher: Dispatcher,
    lines: Vec<InterruptLine>,
}

impl Kernel {
    /// `memory` must already hold every job's words in backing storage.
    pub fn new(config: SimConfig, memory: Memory) -> Self {
        let lines = (0..config.units).map(|_| InterruptLine::default()).collect();
        Self {
            scheduler: Scheduler::new(config.mode),
            dispatcher: Dispatcher::new(memory),
            lines,
            config,
        }
    }

    /// Load job definitions from text and enqueue them in file order.
    pub fn boot(config: SimConfig, source: &str) -> Result<Self, LoadError> {
        let mut memory = Memory::new(config.ram_words, config.disk_words);
        let jobs = loader::load_jobs(source, &mut memory)?;
        Ok(Self::with_jobs(config, memory, jobs))
    }

    pub fn boot_file(config: SimConfig, path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let mut memory = Memory::new(config.ram_words, config.disk_words);
        let jobs = loader::load_file(path, &mut memory)?;
        Ok(Self::with_jobs(config, memory, jobs))
    }

    fn with_jobs(config: SimConfig, memory: Memory, jobs: Vec<Job>) -> Self {
        let kernel = Self::new(config, memory);
        for job in jobs {
            kernel.submit(job);
        }
        kernel
    }

    pub fn submit(&self, job: Job) {
        self.scheduler.add_job(job);
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Interrupt line of each unit, indexed by unit id.
    pub fn interrupt_lines(&self) -> &[InterruptLine] {
        &self.lines
    }

    /// Run every unit until the ready queue drains, then collect metrics.
    /// Fails only if a unit thread cannot be spawned.
    pub fn run(&self) -> io::Result<RunReport> {
        let pending = self.scheduler.pending();
        log::info!(
            "starting {} units on {} jobs ({:?} mode)",
            self.config.units,
            pending,
            self.scheduler.mode()
        );

        let started = Instant::now();
        let unit_config = self.config.unit_config();
        let scheduler = &self.scheduler;
        let dispatcher = &self.dispatcher;

        let units = thread::scope(|s| -> io::Result<Vec<ExecUnit>> {
            let handles = self
                .lines
                .iter()
                .enumerate()
                .map(|(id, line)| {
                    let line = line.clone();
                    thread::Builder::new()
                        .name(format!("cpu-{id}"))
                        .spawn_scoped(s, move || {
                            let mut unit = ExecUnit::with_interrupt(id, unit_config, line);
                            unit.run(scheduler, dispatcher);
                            unit
                        })
                })
                .collect::<io::Result<Vec<_>>>()?;

            Ok(handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|p| std::panic::resume_unwind(p)))
                .collect())
        })?;
        let elapsed = started.elapsed();

        let report = RunReport::new(
            self.scheduler.finished(),
            &units,
            self.config.ram_words,
            self.config.cache_words,
            elapsed,
        );
        log::info!(
            "{} jobs finished in {:?}, {} failed, {} words still resident",
            report.jobs.len(),
            elapsed,
            report.failures(),
            self.dispatcher.usage()
        );
        Ok(report)
    }
}
