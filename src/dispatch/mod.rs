//! Binding jobs to execution units.
//!
//! The single lock here covers the whole allocate/stage/release sequence and
//! the residency ledger, so two units can never both observe the same free
//! run before one of them claims it.

use std::collections::BTreeMap;
use std::ops::Range;
use std::time::Instant;

use parking_lot::Mutex;
use thiserror::Error;

use crate::cpu::Cpu;
use crate::cpu::unit::{ExecUnit, UnitState};
use crate::job::{Job, JobId, JobState};
use crate::mem::{MemError, Memory, Word};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("no room for job {job}: {err}")]
    OutOfMemory { job: JobId, err: MemError },

    #[error("job {job} needs {size} words but {what} holds {capacity}")]
    TooLarge {
        job: JobId,
        size: usize,
        capacity: usize,
        what: &'static str,
    },

    #[error("job {job} is not resident")]
    NotResident { job: JobId },

    #[error("memory error for job {job}: {err}")]
    Mem { job: JobId, err: MemError },
}

impl DispatchError {
    /// Out-of-memory clears once other jobs release their ranges.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DispatchError::OutOfMemory { .. })
    }
}

struct Guarded {
    memory: Memory,
    // ram_start -> (ram_end, job)
    resident: BTreeMap<usize, (usize, JobId)>,
}

impl Guarded {
    fn overlaps(&self, range: &Range<usize>) -> bool {
        self.resident
            .range(..range.end)
            .next_back()
            .is_some_and(|(_, (end, _))| *end > range.start)
    }
}

pub struct Dispatcher {
    inner: Mutex<Guarded>,
}

impl Dispatcher {
    pub fn new(memory: Memory) -> Self {
        Self {
            inner: Mutex::new(Guarded {
                memory,
                resident: BTreeMap::new(),
            }),
        }
    }

    /// Place `job` in working memory and hand its context to `unit`.
    ///
    /// On error nothing changes: the job keeps its state and no words stay
    /// claimed.
    pub fn load(&self, job: &mut Job, unit: &mut ExecUnit) -> Result<(), DispatchError> {
        let size = job.total_size();
        if size > unit.cache_capacity() {
            return Err(DispatchError::TooLarge {
                job: job.id,
                size,
                capacity: unit.cache_capacity(),
                what: "the unit working set",
            });
        }

        let mut g = self.inner.lock();
        let capacity = g.memory.capacity();
        if size > capacity {
            return Err(DispatchError::TooLarge {
                job: job.id,
                size,
                capacity,
                what: "working memory",
            });
        }

        // an empty job owns no words and never enters the ledger
        let range = if size == 0 {
            unit.cache = Vec::new();
            0..0
        } else {
            let start = g.memory.allocate(size).map_err(|err| match err {
                MemError::OutOfMemory { .. } => DispatchError::OutOfMemory { job: job.id, err },
                err => DispatchError::Mem { job: job.id, err },
            })?;
            let range = start..start + size;
            debug_assert!(!g.overlaps(&range), "allocator handed out a resident range");

            let staged = match job.suspended.as_deref() {
                Some(image) => g.memory.stage_image(start, image),
                None => g.memory.stage(job.disk_start, start, size),
            };
            let words: Result<Vec<Word>, MemError> =
                staged.and_then(|()| range.clone().map(|i| g.memory.load(i)).collect());
            match words {
                Ok(words) => unit.cache = words,
                Err(err) => {
                    // give the claimed run back before reporting
                    let released = g.memory.release(range.start, range.end);
                    debug_assert!(released.is_ok(), "claimed run out of bounds");
                    return Err(DispatchError::Mem { job: job.id, err });
                }
            }

            g.resident.insert(range.start, (range.end, job.id));
            range
        };
        job.stats.ram_usage_at_dispatch = g.memory.usage();
        drop(g);

        job.suspended = None;
        job.residency = Some(range.clone());
        job.state = JobState::Running;
        job.stats.unit = Some(unit.id());
        job.stats.dispatches += 1;
        if job.times.started.is_none() {
            job.times.started = Some(Instant::now());
        }

        unit.cpu = std::mem::take(&mut job.context);
        unit.state = UnitState::Executing;
        unit.current = Some(job.id);

        log::debug!(
            "unit {} <- {} at [{}, {})",
            unit.id(),
            job,
            range.start,
            range.end
        );
        Ok(())
    }

    /// Finished job: stamp completion, save registers, free its range.
    pub fn unload(&self, job: &mut Job, unit: &mut ExecUnit) -> Result<(), DispatchError> {
        let image = self.evict(job, unit)?;
        job.times.completed = Some(Instant::now());
        job.final_image = Some(image);
        log::debug!("unit {} -> job {} unloaded", unit.id(), job.id);
        Ok(())
    }

    /// Interrupted job: like `unload` but keeps the working-set image on the
    /// job so the next `load` resumes where it stopped.
    pub fn suspend(&self, job: &mut Job, unit: &mut ExecUnit) -> Result<(), DispatchError> {
        let image = self.evict(job, unit)?;
        job.suspended = Some(image);
        log::debug!(
            "unit {} -> job {} suspended at pc={}",
            unit.id(),
            job.id,
            job.context.pc
        );
        Ok(())
    }

    fn evict(&self, job: &mut Job, unit: &mut ExecUnit) -> Result<Vec<Word>, DispatchError> {
        let range = job
            .residency
            .take()
            .ok_or(DispatchError::NotResident { job: job.id })?;

        job.context = std::mem::replace(&mut unit.cpu, Cpu::default());
        let image = std::mem::take(&mut unit.cache);
        unit.state = UnitState::Free;
        unit.current = None;

        if range.is_empty() {
            return Ok(image);
        }
        let mut g = self.inner.lock();
        g.resident.remove(&range.start);
        g.memory
            .release(range.start, range.end)
            .map_err(|err| DispatchError::Mem { job: job.id, err })?;

        Ok(image)
    }

    /// Current `[start, end)` ranges and their owners, in address order.
    pub fn resident(&self) -> Vec<(Range<usize>, JobId)> {
        self.inner
            .lock()
            .resident
            .iter()
            .map(|(start, (end, id))| (*start..*end, *id))
            .collect()
    }

    /// Check the ledger against working memory in one critical section:
    /// ranges are disjoint, every owned word is occupied, and nothing else is.
    pub fn audit(&self) -> Result<(), String> {
        let g = self.inner.lock();
        let mut owned = 0;
        let mut last_end = 0;
        for (start, (end, id)) in &g.resident {
            if *start < last_end {
                return Err(format!("job {id} at [{start}, {end}) overlaps a lower range"));
            }
            if let Some(free) = (*start..*end).find(|i| g.memory.dump()[*i].is_none()) {
                return Err(format!("job {id} owns free word {free}"));
            }
            owned += end - start;
            last_end = *end;
        }
        let used = g.memory.usage();
        if used != owned {
            return Err(format!("{used} words occupied but {owned} owned"));
        }
        Ok(())
    }

    pub fn usage(&self) -> usize {
        self.inner.lock().memory.usage()
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().memory.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::unit::UnitConfig;

    fn setup(ram: usize) -> (Dispatcher, ExecUnit) {
        let mut mem = Memory::new(ram, 64);
        for i in 0..64 {
            mem.store_disk(i, 0x100 + i as Word).unwrap();
        }
        (Dispatcher::new(mem), ExecUnit::new(0, UnitConfig::default()))
    }

    #[test]
    fn load_stages_and_binds() {
        let (d, mut unit) = setup(32);
        let mut job = Job::new(7, 4, 1, 10).with_buffers(2, 1, 1);
        job.context.regs.set(3, 99);

        d.load(&mut job, &mut unit).unwrap();
        assert_eq!(job.residency, Some(0..8));
        assert_eq!(job.state, JobState::Running);
        assert_eq!(job.stats.ram_usage_at_dispatch, 8);
        assert_eq!(unit.state, UnitState::Executing);
        assert_eq!(unit.current_job(), Some(7));
        assert_eq!(unit.cpu.regs.get(3), 99);
        assert_eq!(unit.cache, (0..8u32).map(|i| 0x10A + i).collect::<Vec<_>>());
        assert_eq!(d.resident(), vec![(0..8, 7)]);
        assert_eq!(d.usage(), 8);
    }

    #[test]
    fn unload_saves_context_and_frees() {
        let (d, mut unit) = setup(32);
        let mut job = Job::new(7, 4, 1, 0);
        d.load(&mut job, &mut unit).unwrap();
        unit.cpu.regs.set(1, -4);
        unit.cpu.pc = 3;
        unit.cache[2] = 0xDEAD;

        d.unload(&mut job, &mut unit).unwrap();
        assert_eq!(job.context.regs.get(1), -4);
        assert_eq!(job.context.pc, 3);
        assert!(job.times.completed.is_some());
        assert_eq!(job.final_image.as_ref().unwrap()[2], 0xDEAD);
        assert!(job.residency.is_none());
        assert_eq!(unit.state, UnitState::Free);
        assert!(unit.current_job().is_none());
        assert_eq!(d.usage(), 0);
        assert!(d.resident().is_empty());
        assert_eq!(
            d.unload(&mut job, &mut unit),
            Err(DispatchError::NotResident { job: 7 })
        );
    }

    #[test]
    fn out_of_memory_leaves_job_untouched() {
        let (d, mut a) = setup(10);
        let mut b = ExecUnit::new(1, UnitConfig::default());
        let mut first = Job::new(1, 6, 1, 0);
        let mut second = Job::new(2, 6, 1, 0);
        second.state = JobState::Ready;

        d.load(&mut first, &mut a).unwrap();
        let err = d.load(&mut second, &mut b).unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(second.state, JobState::Ready);
        assert!(second.residency.is_none());
        assert_eq!(b.state, UnitState::Free);
        assert_eq!(d.usage(), 6);

        d.unload(&mut first, &mut a).unwrap();
        d.load(&mut second, &mut b).unwrap();
        assert_eq!(second.residency, Some(0..6));
    }

    #[test]
    fn oversized_jobs_are_not_retryable() {
        let (d, mut unit) = setup(16);
        let mut huge = Job::new(1, 17, 1, 0);
        let err = d.load(&mut huge, &mut unit).unwrap_err();
        assert!(!err.is_retryable());

        let mut small_cache = ExecUnit::new(
            1,
            UnitConfig {
                cache_words: 4,
                ..UnitConfig::default()
            },
        );
        let mut job = Job::new(2, 5, 1, 0);
        assert!(matches!(
            d.load(&mut job, &mut small_cache),
            Err(DispatchError::TooLarge { .. })
        ));
    }

    #[test]
    fn failed_staging_gives_the_run_back() {
        let (d, mut unit) = setup(32);
        // backing storage holds 64 words, so staging 4 from 62 runs off the end
        let mut job = Job::new(3, 4, 1, 62);
        assert!(matches!(
            d.load(&mut job, &mut unit),
            Err(DispatchError::Mem { job: 3, .. })
        ));
        assert_eq!(d.usage(), 0);
        assert!(d.resident().is_empty());
        assert!(job.residency.is_none());
        assert_eq!(unit.state, UnitState::Free);
        assert!(d.audit().is_ok());
    }

    #[test]
    fn empty_job_binds_without_claiming_words() {
        let (d, mut unit) = setup(8);
        let mut resident = Job::new(1, 3, 1, 0);
        let mut a = ExecUnit::new(1, UnitConfig::default());
        d.load(&mut resident, &mut a).unwrap();

        let mut empty = Job::new(2, 0, 1, 0);
        d.load(&mut empty, &mut unit).unwrap();
        assert_eq!(empty.residency, Some(0..0));
        assert!(unit.cache.is_empty());
        assert_eq!(unit.current_job(), Some(2));
        assert_eq!(d.resident(), vec![(0..3, 1)]);
        assert_eq!(d.usage(), 3);

        // evicting it must leave the job resident at word 0 alone
        d.unload(&mut empty, &mut unit).unwrap();
        assert_eq!(empty.final_image, Some(Vec::new()));
        assert_eq!(d.resident(), vec![(0..3, 1)]);
        assert_eq!(d.usage(), 3);
        assert!(d.audit().is_ok());
    }

    #[test]
    fn suspend_and_resume_from_image() {
        let (d, mut unit) = setup(32);
        let mut job = Job::new(4, 3, 1, 0).with_buffers(0, 1, 0);
        d.load(&mut job, &mut unit).unwrap();
        unit.cache[3] = 0x55;
        unit.cpu.pc = 2;
        d.suspend(&mut job, &mut unit).unwrap();
        assert!(job.is_resuming());
        assert!(job.times.completed.is_none());
        assert_eq!(d.usage(), 0);

        // something else takes the low words, job comes back elsewhere
        let mut other = Job::new(5, 2, 1, 40);
        let mut b = ExecUnit::new(1, UnitConfig::default());
        d.load(&mut other, &mut b).unwrap();

        d.load(&mut job, &mut unit).unwrap();
        assert_eq!(job.residency, Some(2..6));
        assert_eq!(unit.cpu.pc, 2);
        assert_eq!(unit.cache[3], 0x55);
        assert!(!job.is_resuming());
        assert_eq!(job.stats.dispatches, 2);
    }
}
