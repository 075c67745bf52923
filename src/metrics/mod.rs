//! Post-run metrics. Everything here only reads finished jobs and units.

use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use crate::cpu::unit::ExecUnit;
use crate::job::{Job, JobId};

fn ratio(part: f64, whole: f64) -> f64 {
    if whole == 0.0 {
        return 0.0;
    }
    (part / whole * 1000.0).round() / 1000.0
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

#[derive(Debug, Clone)]
pub struct JobReport {
    pub job_id: JobId,
    pub unit_id: Option<usize>,
    pub wait: Duration,
    pub completion: Duration,
    pub io_ops: u64,
    pub instructions: u64,
    pub dispatches: u32,
    /// Working memory occupied by all jobs when this one was placed.
    pub ram_pct: f64,
    /// This job's share of working memory.
    pub job_ram_pct: f64,
    /// This job's share of its unit's working set.
    pub job_cache_pct: f64,
    pub outcome: String,
    pub success: bool,
}

impl JobReport {
    pub fn new(job: &Job, ram_words: usize, cache_words: usize) -> Self {
        let size = job.total_size() as f64;
        Self {
            job_id: job.id,
            unit_id: job.stats.unit,
            wait: job.wait_time().unwrap_or_default(),
            completion: job.completion_time().unwrap_or_default(),
            io_ops: job.stats.io_ops,
            instructions: job.stats.instructions,
            dispatches: job.stats.dispatches,
            ram_pct: ratio(job.stats.ram_usage_at_dispatch as f64, ram_words as f64),
            job_ram_pct: ratio(size, ram_words as f64),
            job_cache_pct: ratio(size, cache_words as f64),
            outcome: job
                .outcome
                .as_ref()
                .map_or_else(|| "unfinished".to_string(), |o| o.to_string()),
            success: job.outcome.as_ref().is_some_and(|o| o.is_success()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UnitReport {
    pub unit_id: usize,
    pub busy: Duration,
    pub io_ops: u64,
    pub instructions: u64,
    pub jobs_run: u64,
    /// This unit's share of the jobs every unit ran. Rejected jobs ran
    /// nowhere and are not counted.
    pub share: f64,
}

impl UnitReport {
    pub fn new(unit: &ExecUnit, total_run: u64) -> Self {
        let stats = unit.stats();
        Self {
            unit_id: unit.id(),
            busy: stats.busy,
            io_ops: stats.io_ops,
            instructions: stats.instructions,
            jobs_run: stats.jobs_run,
            share: ratio(stats.jobs_run as f64, total_run as f64),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub jobs: Vec<JobReport>,
    pub units: Vec<UnitReport>,
    pub elapsed: Duration,
    /// The finished job records, sorted by id.
    pub finished: Vec<Job>,
}

impl RunReport {
    pub fn new(
        mut finished: Vec<Job>,
        units: &[ExecUnit],
        ram_words: usize,
        cache_words: usize,
        elapsed: Duration,
    ) -> Self {
        finished.sort_by_key(|j| j.id);
        let jobs = finished
            .iter()
            .map(|j| JobReport::new(j, ram_words, cache_words))
            .collect();
        let total_run = units.iter().map(|u| u.stats().jobs_run).sum();
        let units = units
            .iter()
            .map(|u| UnitReport::new(u, total_run))
            .collect();
        Self {
            jobs,
            units,
            elapsed,
            finished,
        }
    }

    pub fn job(&self, id: JobId) -> Option<&Job> {
        self.finished.iter().find(|j| j.id == id)
    }

    pub fn failures(&self) -> usize {
        self.jobs.iter().filter(|j| !j.success).count()
    }

    pub fn write_jobs_csv(&self, mut w: impl Write) -> io::Result<()> {
        writeln!(
            w,
            "Job ID,CPU ID,Waiting Time (ms),Completion Time (ms),I/O Processes,Instructions,Dispatches,MMU RAM % Used,Job RAM % Used,Job Cache % Used,Outcome"
        )?;
        for j in &self.jobs {
            let unit = j.unit_id.map_or_else(|| "-".to_string(), |u| u.to_string());
            writeln!(
                w,
                "{},{},{:.3},{:.3},{},{},{},{},{},{},{}",
                j.job_id,
                unit,
                millis(j.wait),
                millis(j.completion),
                j.io_ops,
                j.instructions,
                j.dispatches,
                j.ram_pct,
                j.job_ram_pct,
                j.job_cache_pct,
                j.outcome.replace(',', ";")
            )?;
        }
        Ok(())
    }

    pub fn write_units_csv(&self, mut w: impl Write) -> io::Result<()> {
        writeln!(
            w,
            "CPU ID,Busy Time (ms),I/O Processes,Instructions,Number of Jobs,% of Jobs"
        )?;
        for u in &self.units {
            writeln!(
                w,
                "{},{:.3},{},{},{},{}",
                u.unit_id,
                millis(u.busy),
                u.io_ops,
                u.instructions,
                u.jobs_run,
                u.share
            )?;
        }
        Ok(())
    }

    /// Final working-set image of every job, in the loader's text format.
    pub fn write_images(&self, mut w: impl Write) -> io::Result<()> {
        for job in &self.finished {
            let Some(image) = &job.final_image else {
                continue;
            };
            writeln!(
                w,
                "// JOB {:X} {:X} {:X}",
                job.id, job.num_instructions, job.priority
            )?;
            for (i, word) in image.iter().enumerate() {
                if i == job.num_instructions {
                    let b = job.buffers;
                    writeln!(w, "// Data {:X} {:X} {:X}", b.input, b.output, b.temp)?;
                }
                writeln!(w, "0x{:08X}", word)?;
            }
            writeln!(w, "// END")?;
        }
        Ok(())
    }

    /// Write `jobs.csv`, `units.csv` and `images.txt` under `dir`.
    pub fn write_to_dir(&self, dir: impl AsRef<Path>) -> io::Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let mut jobs = BufWriter::new(File::create(dir.join("jobs.csv"))?);
        self.write_jobs_csv(&mut jobs)?;
        jobs.flush()?;

        let mut units = BufWriter::new(File::create(dir.join("units.csv"))?);
        self.write_units_csv(&mut units)?;
        units.flush()?;

        let mut images = BufWriter::new(File::create(dir.join("images.txt"))?);
        self.write_images(&mut images)?;
        images.flush()
    }

    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{} jobs in {:.3} ms, {} failed",
            self.jobs.len(),
            millis(self.elapsed),
            self.failures()
        );
        for u in &self.units {
            let _ = writeln!(
                out,
                "  unit {}: {} jobs ({:.1}%), {} instructions, {} I/O, busy {:.3} ms",
                u.unit_id,
                u.jobs_run,
                u.share * 100.0,
                u.instructions,
                u.io_ops,
                millis(u.busy)
            );
        }
        out
    }
}
