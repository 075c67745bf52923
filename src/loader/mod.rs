//! Job-definition text loader.
//!
//! ```text
//! // JOB 1 17 2
//! 0xC050005C
//! ...
//! // Data 14 C C
//! 0x0000000A
//! ...
//! // END
//! ```
//!
//! Control lines start with `//`; every other non-blank line is one word
//! appended to backing storage. Numbers on control lines are hex.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::cpu::decode::parse_word;
use crate::job::{Buffers, Job};
use crate::mem::{MemError, Memory};

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("line {line}: unknown directive {directive:?}")]
    UnknownDirective { line: usize, directive: String },

    #[error("line {line}: expected {expected} hex fields after {directive}")]
    MissingFields {
        line: usize,
        directive: &'static str,
        expected: usize,
    },

    #[error("line {line}: bad hex value {text:?}")]
    BadNumber { line: usize, text: String },

    #[error("line {line}: bad word {text:?}")]
    BadWord { line: usize, text: String },

    #[error("line {line}: {directive} outside of a JOB block")]
    Orphan { line: usize, directive: &'static str },

    #[error("line {line}: job {job} declares {declared} words but defines {found}")]
    SizeMismatch {
        line: usize,
        job: u32,
        declared: usize,
        found: usize,
    },

    #[error("line {line}: backing storage full")]
    DiskFull {
        line: usize,
        #[source]
        err: MemError,
    },

    #[error("job {job} has no END")]
    Unterminated { job: u32 },
}

fn hex(line: usize, text: &str) -> Result<u32, LoadError> {
    u32::from_str_radix(text, 16).map_err(|_| LoadError::BadNumber {
        line,
        text: text.to_string(),
    })
}

fn fields<const N: usize>(
    line: usize,
    directive: &'static str,
    args: &[&str],
) -> Result<[u32; N], LoadError> {
    if args.len() < N {
        return Err(LoadError::MissingFields {
            line,
            directive,
            expected: N,
        });
    }
    let mut out = [0; N];
    for (slot, text) in out.iter_mut().zip(args) {
        *slot = hex(line, text)?;
    }
    Ok(out)
}

/// Parse `source`, write every word to backing storage and return the jobs
/// in the order their `END` lines appear.
pub fn load_jobs(source: &str, mem: &mut Memory) -> Result<Vec<Job>, LoadError> {
    let mut jobs = Vec::new();
    let mut current: Option<Job> = None;
    let mut disk_index = 0;

    for (n, raw) in source.lines().enumerate() {
        let line = n + 1;
        let text = raw.trim();
        if text.is_empty() {
            continue;
        }

        let Some(control) = text.strip_prefix("//") else {
            let word = parse_word(text).map_err(|_| LoadError::BadWord {
                line,
                text: text.to_string(),
            })?;
            mem.store_disk(disk_index, word)
                .map_err(|err| LoadError::DiskFull { line, err })?;
            disk_index += 1;
            continue;
        };

        let parts: Vec<&str> = control.split_whitespace().collect();
        let Some((directive, args)) = parts.split_first() else {
            continue;
        };

        match directive.to_ascii_uppercase().as_str() {
            "JOB" => {
                if let Some(open) = &current {
                    return Err(LoadError::Unterminated { job: open.id });
                }
                let [id, count, priority] = fields::<3>(line, "JOB", args)?;
                current = Some(Job::new(id, count as usize, priority, disk_index));
            }
            "DATA" => {
                let job = current.as_mut().ok_or(LoadError::Orphan {
                    line,
                    directive: "DATA",
                })?;
                let [input, output, temp] = fields::<3>(line, "DATA", args)?;
                job.buffers = Buffers {
                    input: input as usize,
                    output: output as usize,
                    temp: temp as usize,
                };
            }
            "END" => {
                let job = current.take().ok_or(LoadError::Orphan {
                    line,
                    directive: "END",
                })?;
                let found = disk_index - job.disk_start;
                if found != job.total_size() {
                    return Err(LoadError::SizeMismatch {
                        line,
                        job: job.id,
                        declared: job.total_size(),
                        found,
                    });
                }
                log::debug!("loaded {} from disk offset {}", job, job.disk_start);
                jobs.push(job);
            }
            other => {
                return Err(LoadError::UnknownDirective {
                    line,
                    directive: other.to_string(),
                });
            }
        }
    }

    if let Some(open) = current {
        return Err(LoadError::Unterminated { job: open.id });
    }

    Ok(jobs)
}

pub fn load_file(path: impl AsRef<Path>, mem: &mut Memory) -> Result<Vec<Job>, LoadError> {
    let path = path.as_ref();
    let source = fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.display().to_string(),
        source,
    })?;
    load_jobs(&source, mem)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_JOBS: &str = "\
// JOB 1 3 2
0xC0100014
0x4F010000
0x92000000
// Data 1 1 0
0x0000000A
0x00000000
// END

// JOB A 2 1
0x4F010000
0x92000000
// END
";

    #[test]
    fn parses_jobs_and_fills_disk() {
        let mut mem = Memory::new(16, 16);
        let jobs = load_jobs(TWO_JOBS, &mut mem).unwrap();
        assert_eq!(jobs.len(), 2);

        let first = &jobs[0];
        assert_eq!((first.id, first.num_instructions, first.priority), (1, 3, 2));
        assert_eq!(first.buffers.input, 1);
        assert_eq!(first.buffers.output, 1);
        assert_eq!(first.total_size(), 5);
        assert_eq!(first.disk_start, 0);

        let second = &jobs[1];
        assert_eq!(second.id, 0xA);
        assert_eq!(second.disk_start, 5);
        assert_eq!(second.total_size(), 2);

        assert_eq!(mem.load_disk(0).unwrap(), 0xC0100014);
        assert_eq!(mem.load_disk(3).unwrap(), 0xA);
        assert_eq!(mem.load_disk(6).unwrap(), 0x92000000);
    }

    #[test]
    fn rejects_size_mismatch() {
        let src = "// JOB 1 3 1\n0x92000000\n// END\n";
        let err = load_jobs(src, &mut Memory::new(4, 4)).unwrap_err();
        assert!(matches!(
            err,
            LoadError::SizeMismatch {
                line: 3,
                declared: 3,
                found: 1,
                ..
            }
        ));
    }

    #[test]
    fn reports_bad_input_with_line_numbers() {
        let mut mem = Memory::new(4, 4);
        assert!(matches!(
            load_jobs("// JOB 1 1\n", &mut mem),
            Err(LoadError::MissingFields { line: 1, .. })
        ));
        assert!(matches!(
            load_jobs("// JOB 1 1 1\nnothex\n// END\n", &mut mem),
            Err(LoadError::BadWord { line: 2, .. })
        ));
        assert!(matches!(
            load_jobs("// END\n", &mut mem),
            Err(LoadError::Orphan { line: 1, .. })
        ));
        assert!(matches!(
            load_jobs("// JOB 1 1 1\n0x0\n", &mut mem),
            Err(LoadError::Unterminated { job: 1 })
        ));
        assert!(matches!(
            load_jobs("// FOO\n", &mut mem),
            Err(LoadError::UnknownDirective { line: 1, .. })
        ));
    }

    #[test]
    fn disk_overflow() {
        let src = "// JOB 1 3 1\n0x1\n0x2\n0x3\n// END\n";
        assert!(matches!(
            load_jobs(src, &mut Memory::new(4, 2)),
            Err(LoadError::DiskFull { line: 4, .. })
        ));
    }
}
