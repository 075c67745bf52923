use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use os_sim::config::SimConfig;
use os_sim::cpu::decode::{Address, Instr, Opcode, Operands, encode};
use os_sim::job::{Job, JobId, Outcome};
use os_sim::kernel::Kernel;
use os_sim::mem::{Memory, Word};

const RAM_WORDS: usize = 48;
const LOOPS: u32 = 20;
const PROGRAM_LEN: usize = 7;

fn reg_addr(opcode: Opcode, reg1: u8, reg2: u8, index: u32) -> Word {
    encode(Instr {
        opcode,
        operands: Operands::Conditional {
            reg1,
            reg2,
            addr: Address::from_raw(index * 4),
        },
    })
}

/// Load `id` into R1, count R2 up to `LOOPS`, then write R1 to the output
/// word just past `pad` input words.
fn program(id: JobId, pad: usize) -> Vec<Word> {
    let out = (PROGRAM_LEN + pad) as u32;
    let mut words = vec![
        reg_addr(Opcode::Ldi, 0, 1, id),
        reg_addr(Opcode::Ldi, 0, 2, 0),
        reg_addr(Opcode::Addi, 0, 2, 0),
        reg_addr(Opcode::Slti, 2, 3, LOOPS),
        reg_addr(Opcode::Bnz, 3, 0, 2),
        encode(Instr {
            opcode: Opcode::Wr,
            operands: Operands::Io {
                reg1: 1,
                reg2: 0,
                addr: Address::from_raw(out * 4),
            },
        }),
        encode(Instr {
            opcode: Opcode::Hlt,
            operands: Operands::Unconditional {
                addr: Address::from_raw(0),
            },
        }),
    ];
    assert_eq!(words.len(), PROGRAM_LEN);
    words.extend(std::iter::repeat_n(0xFFFF_FFFF, pad + 1));
    words
}

/// Boot a kernel over `count` generated jobs of 8 to 17 words each.
fn kernel(count: u32, config: SimConfig) -> Kernel {
    let mut memory = Memory::new(config.ram_words, config.disk_words);
    let mut disk = 0;
    let mut jobs = Vec::new();
    for id in 1..=count {
        let pad = (id as usize % 4) * 3;
        let words = program(id, pad);
        for (i, w) in words.iter().enumerate() {
            memory.store_disk(disk + i, *w).unwrap();
        }
        jobs.push(Job::new(id, PROGRAM_LEN, id % 3, disk).with_buffers(pad, 1, 0));
        disk += words.len();
    }

    let kernel = Kernel::new(config, memory);
    for job in jobs {
        kernel.submit(job);
    }
    kernel
}

fn contended_config(quantum: u64) -> SimConfig {
    SimConfig {
        units: 4,
        ram_words: RAM_WORDS,
        disk_words: 1024,
        delay: Duration::from_micros(20),
        quantum,
        ..SimConfig::default()
    }
}

fn check_outputs(jobs: &[Job], count: u32) {
    assert_eq!(jobs.len(), count as usize);
    let mut ids: Vec<JobId> = jobs.iter().map(|j| j.id).collect();
    ids.dedup();
    assert_eq!(ids, (1..=count).collect::<Vec<_>>(), "each job finishes once");

    for job in jobs {
        assert_eq!(job.outcome, Some(Outcome::Halted), "job {}", job.id);
        let image = job.final_image.as_ref().unwrap();
        assert_eq!(image.len(), job.total_size());
        assert_eq!(*image.last().unwrap(), job.id, "job {} output", job.id);
        assert_eq!(job.context.regs.get(2), LOOPS as i32);
        assert_eq!(job.stats.instructions, 2 + 3 * LOOPS as u64 + 2);
        assert!(job.stats.ram_usage_at_dispatch >= job.total_size());
        assert!(job.stats.ram_usage_at_dispatch <= RAM_WORDS);
    }
}

/// Sample the residency ledger from another thread for the whole run.
fn run_audited(kernel: &Kernel, pester: bool) -> os_sim::metrics::RunReport {
    let done = AtomicBool::new(false);
    thread::scope(|s| {
        let auditor = s.spawn(|| {
            let mut samples = 0u64;
            while !done.load(Ordering::Acquire) {
                if let Err(why) = kernel.dispatcher().audit() {
                    panic!("ledger out of sync: {why}");
                }
                samples += 1;
                thread::yield_now();
            }
            samples
        });

        if pester {
            s.spawn(|| {
                let mut n = 0usize;
                while !done.load(Ordering::Acquire) {
                    let lines = kernel.interrupt_lines();
                    lines[n % lines.len()].raise();
                    n += 1;
                    thread::sleep(Duration::from_micros(200));
                }
            });
        }

        let report = kernel.run().unwrap();
        done.store(true, Ordering::Release);
        assert!(auditor.join().unwrap() > 0);
        report
    })
}

#[test]
fn units_never_share_memory() {
    let count = 30;
    let kernel = kernel(count, contended_config(0));
    let report = run_audited(&kernel, false);

    check_outputs(&report.finished, count);
    for job in &report.finished {
        assert_eq!(job.stats.dispatches, 1);
    }
    assert_eq!(kernel.dispatcher().usage(), 0);
    assert!(kernel.dispatcher().resident().is_empty());
    assert_eq!(kernel.scheduler().pending(), 0);

    let total: u64 = report.units.iter().map(|u| u.jobs_run).sum();
    assert_eq!(total, count as u64);
}

#[test]
fn preempted_jobs_resume_correctly() {
    let count = 24;
    let kernel = kernel(count, contended_config(5));
    let report = run_audited(&kernel, true);

    check_outputs(&report.finished, count);
    for job in &report.finished {
        assert!(job.stats.dispatches > 1, "job {} was never sliced", job.id);
        assert_eq!(job.stats.dispatches, job.stats.interrupts + 1);
    }
    assert_eq!(kernel.dispatcher().usage(), 0);
}

#[test]
fn oversized_job_does_not_stall_the_rest() {
    let count = 6;
    let kernel = kernel(count, contended_config(0));
    // larger than working memory, never placeable
    kernel.submit(Job::new(99, RAM_WORDS + 1, 0, 0));
    let report = kernel.run().unwrap();

    let (rejected, done): (Vec<Job>, Vec<Job>) =
        report.finished.into_iter().partition(|j| j.id == 99);
    check_outputs(&done, count);
    assert!(matches!(rejected[0].outcome, Some(Outcome::Rejected(_))));
    assert_eq!(kernel.dispatcher().usage(), 0);
}
