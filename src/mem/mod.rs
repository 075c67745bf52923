use thiserror::Error;

/// One storage cell. Externally this is 8 hex characters.
pub type Word = u32;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemError {
    #[error("address out of range: {0}")]
    Oob(i64),

    #[error("word {0} is not occupied")]
    Unoccupied(usize),

    #[error("out of memory: no free run of {requested} words (capacity {capacity})")]
    OutOfMemory { requested: usize, capacity: usize },

    #[error("invalid allocation request of {0} words")]
    InvalidRequest(usize),
}

/// Working memory plus backing storage.
///
/// Working memory slots are `None` while free. The allocator needs no other
/// metadata: a word is occupied iff some resident job owns it.
pub struct Memory {
    ram: Vec<Option<Word>>,
    disk: Vec<Word>,
}

impl Memory {
    pub fn new(ram_words: usize, disk_words: usize) -> Self {
        Self {
            ram: vec![None; ram_words],
            disk: vec![0; disk_words],
        }
    }

    fn check_oob(len: usize, start: usize, size: usize) -> Result<(), MemError> {
        let end = start
            .checked_add(size)
            .ok_or(MemError::Oob(start as i64))?;
        if end > len {
            return Err(MemError::Oob(end as i64 - 1));
        }
        Ok(())
    }

    /// First-fit scan for `size` consecutive free words.
    ///
    /// The returned run is claimed (zero-filled) before returning so that
    /// `usage()` already counts it.
    pub fn allocate(&mut self, size: usize) -> Result<usize, MemError> {
        if size == 0 {
            return Err(MemError::InvalidRequest(size));
        }

        let mut run = 0;
        for i in 0..self.ram.len() {
            if self.ram[i].is_some() {
                run = 0;
                continue;
            }
            run += 1;
            if run == size {
                let start = i + 1 - size;
                for slot in &mut self.ram[start..=i] {
                    *slot = Some(0);
                }
                return Ok(start);
            }
        }

        Err(MemError::OutOfMemory {
            requested: size,
            capacity: self.ram.len(),
        })
    }

    /// Word-by-word copy from backing storage into working memory.
    pub fn stage(&mut self, disk_start: usize, ram_start: usize, size: usize) -> Result<(), MemError> {
        Self::check_oob(self.disk.len(), disk_start, size)?;
        Self::check_oob(self.ram.len(), ram_start, size)?;
        for i in 0..size {
            let word = self.disk[disk_start + i];
            self.store(ram_start + i, word)?;
        }
        Ok(())
    }

    /// Copy an image into claimed working memory starting at `ram_start`.
    pub fn stage_image(&mut self, ram_start: usize, image: &[Word]) -> Result<(), MemError> {
        Self::check_oob(self.ram.len(), ram_start, image.len())?;
        for (i, w) in image.iter().enumerate() {
            self.store(ram_start + i, *w)?;
        }
        Ok(())
    }

    pub fn release(&mut self, start: usize, end: usize) -> Result<(), MemError> {
        if end < start {
            return Err(MemError::Oob(end as i64));
        }
        Self::check_oob(self.ram.len(), start, end - start)?;
        for slot in &mut self.ram[start..end] {
            *slot = None;
        }
        Ok(())
    }

    pub fn load(&self, index: usize) -> Result<Word, MemError> {
        match self.ram.get(index) {
            Some(Some(w)) => Ok(*w),
            Some(None) => Err(MemError::Unoccupied(index)),
            None => Err(MemError::Oob(index as i64)),
        }
    }

    /// Overwrite an occupied word. Only `allocate` claims free words.
    pub fn store(&mut self, index: usize, word: Word) -> Result<(), MemError> {
        match self.ram.get_mut(index) {
            Some(Some(slot)) => {
                *slot = word;
                Ok(())
            }
            Some(None) => Err(MemError::Unoccupied(index)),
            None => Err(MemError::Oob(index as i64)),
        }
    }

    pub fn load_disk(&self, index: usize) -> Result<Word, MemError> {
        self.disk.get(index).copied().ok_or(MemError::Oob(index as i64))
    }

    pub fn store_disk(&mut self, index: usize, word: Word) -> Result<(), MemError> {
        let slot = self.disk.get_mut(index).ok_or(MemError::Oob(index as i64))?;
        *slot = word;
        Ok(())
    }

    /// Number of occupied working-memory words.
    pub fn usage(&self) -> usize {
        self.ram.iter().filter(|w| w.is_some()).count()
    }

    pub fn capacity(&self) -> usize {
        self.ram.len()
    }

    /// Snapshot of working memory, `None` for free words.
    pub fn dump(&self) -> &[Option<Word>] {
        &self.ram
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_fit_takes_leftmost_run() {
        let mut mem = Memory::new(16, 16);
        assert_eq!(mem.allocate(4).unwrap(), 0);
        assert_eq!(mem.allocate(4).unwrap(), 4);
        assert_eq!(mem.allocate(2).unwrap(), 8);
        mem.release(0, 4).unwrap();

        // [0,4) is free again and fits 3
        assert_eq!(mem.allocate(3).unwrap(), 0);
        // the 1-word hole at 3 is too small for 2, next fit is at 10
        assert_eq!(mem.allocate(2).unwrap(), 10);
        assert_eq!(mem.usage(), 3 + 4 + 2 + 2);
    }

    #[test]
    fn exhaustion_is_an_error() {
        let mut mem = Memory::new(8, 8);
        mem.allocate(5).unwrap();
        assert_eq!(
            mem.allocate(4),
            Err(MemError::OutOfMemory {
                requested: 4,
                capacity: 8
            })
        );
        assert_eq!(mem.allocate(3).unwrap(), 5);
        assert_eq!(mem.allocate(0), Err(MemError::InvalidRequest(0)));
    }

    #[test]
    fn stage_copies_from_disk() {
        let mut mem = Memory::new(8, 8);
        for i in 0..4 {
            mem.store_disk(2 + i, 0xA0 + i as Word).unwrap();
        }
        let start = mem.allocate(4).unwrap();
        mem.stage(2, start, 4).unwrap();
        assert_eq!(mem.load(start).unwrap(), 0xA0);
        assert_eq!(mem.load(start + 3).unwrap(), 0xA3);
        assert_eq!(mem.load(start + 4), Err(MemError::Unoccupied(4)));
        assert!(mem.stage(6, 0, 4).is_err());
    }

    #[test]
    fn store_never_claims_free_words() {
        let mut mem = Memory::new(8, 8);
        assert_eq!(mem.store(2, 7), Err(MemError::Unoccupied(2)));
        assert_eq!(mem.usage(), 0);
        // staging into an unclaimed run fails the same way
        assert_eq!(mem.stage(0, 0, 2), Err(MemError::Unoccupied(0)));
        assert_eq!(mem.stage_image(4, &[1, 2]), Err(MemError::Unoccupied(4)));
        assert_eq!(mem.usage(), 0);

        let start = mem.allocate(3).unwrap();
        mem.store(start + 1, 0xBEEF).unwrap();
        assert_eq!(mem.load(start + 1).unwrap(), 0xBEEF);
        assert_eq!(mem.usage(), 3);
    }

    #[test]
    fn release_clears_exact_range() {
        let mut mem = Memory::new(8, 0);
        mem.allocate(8).unwrap();
        mem.release(2, 5).unwrap();
        assert_eq!(mem.usage(), 5);
        assert!(mem.load(1).is_ok());
        assert!(mem.load(2).is_err());
        assert!(mem.load(5).is_ok());
        assert_eq!(mem.release(6, 9), Err(MemError::Oob(8)));
    }

    #[test]
    fn out_of_bounds_access() {
        let mut mem = Memory::new(4, 4);
        assert_eq!(mem.load(4), Err(MemError::Oob(4)));
        assert_eq!(mem.store(9, 1), Err(MemError::Oob(9)));
        assert_eq!(mem.load_disk(4), Err(MemError::Oob(4)));
    }
}
