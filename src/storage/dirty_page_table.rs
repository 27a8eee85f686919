use std::collections::HashMap;

use crate::{
    error::{Error, ErrorKind, Result},
    storage::{Lsn, Pgno, NULL_LSN},
};

/// Upper bound on tracked dirty pages.
pub const MAX_DIRTY_PAGES: usize = 1024;

/// The dirty-page table (DPT): pgno → recLSN, the LSN of the first record
/// that dirtied the page since its last clean flush. The recLSN is never
/// advanced by later dirties; the entry leaves the table when the frame is
/// flushed clean.
pub struct DirtyPageTable {
    entries: HashMap<Pgno, Lsn>,
}

impl DirtyPageTable {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Add an entry if the page is not already tracked.
    pub fn add(&mut self, pg: Pgno, rec_lsn: Lsn) -> Result<()> {
        if self.entries.contains_key(&pg) {
            return Ok(());
        }
        if self.entries.len() >= MAX_DIRTY_PAGES {
            return Err(Error::new(
                ErrorKind::DpgtFull,
                "not enough space in the dirty page table",
            ));
        }
        self.entries.insert(pg, rec_lsn);
        Ok(())
    }

    /// Adopt a checkpoint-snapshot entry during recovery analysis: keep
    /// whichever recLSN is smaller.
    pub fn merge_min(&mut self, pg: Pgno, rec_lsn: Lsn) -> Result<()> {
        match self.entries.get_mut(&pg) {
            Some(existing) => {
                if rec_lsn < *existing {
                    *existing = rec_lsn;
                }
                Ok(())
            }
            None => self.add(pg, rec_lsn),
        }
    }

    pub fn get(&self, pg: Pgno) -> Option<Lsn> {
        self.entries.get(&pg).copied()
    }

    pub fn remove(&mut self, pg: Pgno) {
        self.entries.remove(&pg);
    }

    /// Starting point of the redo pass.
    pub fn min_rec_lsn(&self) -> Lsn {
        self.entries.values().copied().min().unwrap_or(NULL_LSN)
    }

    pub fn snapshot(&self) -> Vec<(Pgno, Lsn)> {
        let mut v: Vec<(Pgno, Lsn)> = self.entries.iter().map(|(p, l)| (*p, *l)).collect();
        v.sort_unstable();
        v
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rec_lsn_is_sticky() {
        let mut dpt = DirtyPageTable::new();
        dpt.add(7, 100).unwrap();
        // A later dirty must not advance the recLSN.
        dpt.add(7, 200).unwrap();
        assert_eq!(dpt.get(7), Some(100));
    }

    #[test]
    fn test_min_rec_lsn() {
        let mut dpt = DirtyPageTable::new();
        assert_eq!(dpt.min_rec_lsn(), NULL_LSN);

        dpt.add(1, 300).unwrap();
        dpt.add(2, 100).unwrap();
        dpt.add(3, 200).unwrap();
        assert_eq!(dpt.min_rec_lsn(), 100);

        dpt.remove(2);
        assert_eq!(dpt.min_rec_lsn(), 200);
    }

    #[test]
    fn test_capacity_cap() {
        let mut dpt = DirtyPageTable::new();
        for pg in 0..MAX_DIRTY_PAGES as u64 {
            dpt.add(pg, pg).unwrap();
        }
        assert_eq!(
            dpt.add(u64::MAX - 1, 0).unwrap_err().kind(),
            ErrorKind::DpgtFull
        );
    }
}
