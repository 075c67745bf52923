//! Job-execution core of a teaching operating system: an instruction-set
//! machine, a contiguous memory allocator, a priority/FIFO scheduler and the
//! dispatch protocol that lets several execution units share them.

pub mod config;
pub mod cpu;
pub mod debug;
pub mod dispatch;
pub mod job;
pub mod kernel;
pub mod loader;
pub mod mem;
pub mod metrics;
pub mod sched;
