//! Ready queue shared by every execution unit.
//!
//! All operations take the same lock, so `has_next`/`next_job`/`add_job`
//! never observe a half-updated queue and a job is handed out at most once.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::time::Instant;

use parking_lot::Mutex;

use crate::job::{Job, JobState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum SchedulerMode {
    Fifo,
    #[default]
    Priority,
}

/// Heap entry. `BinaryHeap` pops the greatest, so the comparison is
/// reversed; `seq` keeps equal jobs in insertion order.
struct Ranked {
    seq: u64,
    job: Job,
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .job
            .eligibility_cmp(&self.job)
            .then(other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

enum ReadyQueue {
    Priority(BinaryHeap<Ranked>),
    Fifo(VecDeque<Job>),
}

struct Inner {
    ready: ReadyQueue,
    seq: u64,
    submitted: usize,
    finished: Vec<Job>,
}

impl Inner {
    fn push(&mut self, job: Job) {
        match &mut self.ready {
            ReadyQueue::Priority(heap) => {
                let seq = self.seq;
                self.seq += 1;
                heap.push(Ranked { seq, job });
            }
            ReadyQueue::Fifo(queue) => queue.push_back(job),
        }
    }

    fn pop(&mut self) -> Option<Job> {
        match &mut self.ready {
            ReadyQueue::Priority(heap) => heap.pop().map(|r| r.job),
            ReadyQueue::Fifo(queue) => queue.pop_front(),
        }
    }

    fn len(&self) -> usize {
        match &self.ready {
            ReadyQueue::Priority(heap) => heap.len(),
            ReadyQueue::Fifo(queue) => queue.len(),
        }
    }
}

pub struct Scheduler {
    mode: SchedulerMode,
    inner: Mutex<Inner>,
}

impl Scheduler {
    pub fn new(mode: SchedulerMode) -> Self {
        let ready = match mode {
            SchedulerMode::Priority => ReadyQueue::Priority(BinaryHeap::new()),
            SchedulerMode::Fifo => ReadyQueue::Fifo(VecDeque::new()),
        };
        Self {
            mode,
            inner: Mutex::new(Inner {
                ready,
                seq: 0,
                submitted: 0,
                finished: Vec::new(),
            }),
        }
    }

    pub fn mode(&self) -> SchedulerMode {
        self.mode
    }

    /// Stamp `added` and enqueue. A new job becomes ready; a blocked job keeps
    /// its state so it ranks ahead of everything else.
    pub fn add_job(&self, mut job: Job) {
        job.times.added = Some(Instant::now());
        if job.state == JobState::New {
            job.state = JobState::Ready;
        }
        let mut inner = self.inner.lock();
        inner.submitted += 1;
        inner.push(job);
    }

    pub fn has_next(&self) -> bool {
        self.inner.lock().len() > 0
    }

    /// Remove the most eligible job and mark it running.
    pub fn next_job(&self) -> Option<Job> {
        let mut job = self.inner.lock().pop()?;
        job.state = JobState::Running;
        Some(job)
    }

    /// Running job interrupted between instructions: block and re-enqueue.
    pub fn handle_interrupt(&self, mut job: Job) {
        log::debug!("job {} interrupted at pc={}", job.id, job.context.pc);
        job.state = JobState::Blocked;
        job.stats.interrupts += 1;
        self.inner.lock().push(job);
    }

    /// Put back a job that could not be dispatched. `added` is left alone so
    /// the wait time covers the retries.
    pub fn requeue(&self, mut job: Job) {
        job.state = if job.is_resuming() {
            JobState::Blocked
        } else {
            JobState::Ready
        };
        self.inner.lock().push(job);
    }

    pub fn retire(&self, job: Job) {
        self.inner.lock().finished.push(job);
    }

    pub fn pending(&self) -> usize {
        self.inner.lock().len()
    }

    /// Jobs submitted through `add_job` over the scheduler's lifetime.
    pub fn submitted(&self) -> usize {
        self.inner.lock().submitted
    }

    /// Drain retired jobs.
    pub fn finished(&self) -> Vec<Job> {
        std::mem::take(&mut self.inner.lock().finished)
    }
}
