use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use os_sim::config::SimConfig;
use os_sim::kernel::Kernel;
use os_sim::sched::SchedulerMode;

#[derive(Parser, Debug)]
struct Args {
    /// Path to a job definition file
    #[arg(long)]
    jobs: String,

    /// Number of execution units
    #[arg(long, default_value_t = 4)]
    units: usize,

    /// Working memory size in words
    #[arg(long, default_value_t = 1024)]
    ram_words: usize,

    /// Backing storage size in words
    #[arg(long, default_value_t = 2048)]
    disk_words: usize,

    /// Per-unit working set size in words
    #[arg(long, default_value_t = 128)]
    cache_words: usize,

    /// Ready queue ordering
    #[arg(long, value_enum, default_value_t = SchedulerMode::Priority)]
    mode: SchedulerMode,

    /// Simulated delay per instruction, in microseconds
    #[arg(long, default_value_t = 0)]
    delay_us: u64,

    /// Interrupt a job after N instructions per dispatch (0 = never)
    #[arg(long, default_value_t = 0)]
    quantum: u64,

    /// Fault a job after N instructions (0 = no limit)
    #[arg(long, default_value_t = 0)]
    max_insns: u64,

    /// Directory for jobs.csv, units.csv and images.txt
    #[arg(long)]
    metrics_dir: Option<String>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = SimConfig {
        units: args.units,
        ram_words: args.ram_words,
        disk_words: args.disk_words,
        cache_words: args.cache_words,
        mode: args.mode,
        delay: Duration::from_micros(args.delay_us),
        quantum: args.quantum,
        max_insns: args.max_insns,
    };
    if config.units == 0 {
        anyhow::bail!("need at least one execution unit");
    }

    let kernel = Kernel::boot_file(config, &args.jobs)
        .with_context(|| format!("loading {}", args.jobs))?;
    println!(
        "Loaded {} jobs from {} ({} units, {:?} mode)",
        kernel.scheduler().pending(),
        args.jobs,
        kernel.config().units,
        kernel.config().mode
    );

    let report = kernel.run().context("starting execution units")?;
    print!("{}", report.summary());

    for job in report.jobs.iter().filter(|j| !j.success) {
        eprintln!("job {}: {}", job.job_id, job.outcome);
    }

    if let Some(dir) = &args.metrics_dir {
        report
            .write_to_dir(dir)
            .with_context(|| format!("writing metrics to {dir}"))?;
        println!("Metrics written to {}", dir);
    }

    Ok(())
}
