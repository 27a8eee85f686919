use std::collections::HashMap;

use crate::{
    error::{Error, ErrorKind, Result},
    storage::{Lsn, Tid, NULL_LSN},
};

/// Upper bound on concurrently active transactions.
pub const MAX_ACTIVE_TXNS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Active,
    Committed,
    Aborted,
}

impl TxnState {
    pub fn to_u8(self) -> u8 {
        match self {
            TxnState::Active => 0,
            TxnState::Committed => 1,
            TxnState::Aborted => 2,
        }
    }

    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(TxnState::Active),
            1 => Ok(TxnState::Committed),
            2 => Ok(TxnState::Aborted),
            _ => Err(Error::new(
                ErrorKind::Corrupt,
                &format!("invalid transaction state {}", v),
            )),
        }
    }
}

/// A transaction handle. The actual state lives in the active-transaction
/// table; the handle is freely copyable into cursors and requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Txn {
    tid: Tid,
}

impl Txn {
    pub(crate) fn new(tid: Tid) -> Self {
        Self { tid }
    }

    pub fn tid(&self) -> Tid {
        self.tid
    }
}

/// One ATT entry as carried by a CKPT_END record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxnSnapshot {
    pub tid: Tid,
    pub state: TxnState,
    pub last_lsn: Lsn,
    pub undo_next_lsn: Lsn,
}

#[derive(Debug, Clone)]
pub struct TxnEntry {
    pub state: TxnState,
    pub last_lsn: Lsn,
    pub undo_next_lsn: Lsn,
}

/// The active-transaction table (ATT).
pub struct TxnTable {
    entries: HashMap<Tid, TxnEntry>,
}

impl TxnTable {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn insert(&mut self, tid: Tid) -> Result<()> {
        if self.entries.len() >= MAX_ACTIVE_TXNS {
            return Err(Error::new(
                ErrorKind::TxnFull,
                &format!("already {} active transactions", self.entries.len()),
            ));
        }
        self.entries.insert(
            tid,
            TxnEntry {
                state: TxnState::Active,
                last_lsn: NULL_LSN,
                undo_next_lsn: NULL_LSN,
            },
        );
        Ok(())
    }

    /// Re-insert an entry discovered during recovery analysis; bypasses
    /// the active cap since losers are drained immediately after.
    pub fn insert_recovered(&mut self, snap: TxnSnapshot) {
        self.entries
            .entry(snap.tid)
            .and_modify(|e| {
                if snap.last_lsn != NULL_LSN
                    && (e.last_lsn == NULL_LSN || snap.last_lsn > e.last_lsn)
                {
                    e.last_lsn = snap.last_lsn;
                    e.undo_next_lsn = snap.undo_next_lsn;
                }
            })
            .or_insert(TxnEntry {
                state: snap.state,
                last_lsn: snap.last_lsn,
                undo_next_lsn: snap.undo_next_lsn,
            });
    }

    pub fn get(&self, tid: Tid) -> Result<&TxnEntry> {
        self.entries
            .get(&tid)
            .ok_or_else(|| Error::new(ErrorKind::NoTxn, &format!("tx_{} not in table", tid)))
    }

    pub fn get_mut(&mut self, tid: Tid) -> Result<&mut TxnEntry> {
        self.entries
            .get_mut(&tid)
            .ok_or_else(|| Error::new(ErrorKind::NoTxn, &format!("tx_{} not in table", tid)))
    }

    pub fn contains(&self, tid: Tid) -> bool {
        self.entries.contains_key(&tid)
    }

    pub fn remove(&mut self, tid: Tid) {
        self.entries.remove(&tid);
    }

    /// Record an UPDATE or CLR chained onto this transaction.
    pub fn record(&mut self, tid: Tid, lsn: Lsn, undo_next: Lsn) -> Result<()> {
        let e = self.get_mut(tid)?;
        e.last_lsn = lsn;
        e.undo_next_lsn = undo_next;
        Ok(())
    }

    pub fn set_state(&mut self, tid: Tid, state: TxnState) -> Result<()> {
        self.get_mut(tid)?.state = state;
        Ok(())
    }

    pub fn tids(&self) -> Vec<Tid> {
        self.entries.keys().copied().collect()
    }

    /// Transactions that never reached COMMITTED; the undo pass rolls
    /// these back.
    pub fn losers(&self) -> Vec<(Tid, Lsn)> {
        self.entries
            .iter()
            .filter(|(_, e)| e.state != TxnState::Committed)
            .map(|(tid, e)| (*tid, e.last_lsn))
            .collect()
    }

    pub fn snapshot(&self) -> Vec<TxnSnapshot> {
        self.entries
            .iter()
            .map(|(tid, e)| TxnSnapshot {
                tid: *tid,
                state: e.state,
                last_lsn: e.last_lsn,
                undo_next_lsn: e.undo_next_lsn,
            })
            .collect()
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
    fn test_insert_and_record() {
        let mut att = TxnTable::new();
        att.insert(1).unwrap();

        att.record(1, 100, 100).unwrap();
        let e = att.get(1).unwrap();
        assert_eq!(e.last_lsn, 100);
        assert_eq!(e.undo_next_lsn, 100);
        assert_eq!(e.state, TxnState::Active);

        att.remove(1);
        assert_eq!(att.get(1).unwrap_err().kind(), ErrorKind::NoTxn);
    }

    #[test]
    fn test_capacity_cap() {
        let mut att = TxnTable::new();
        for tid in 0..MAX_ACTIVE_TXNS as u64 {
            att.insert(tid).unwrap();
        }
        assert_eq!(
            att.insert(999).unwrap_err().kind(),
            ErrorKind::TxnFull
        );
    }

    #[test]
    fn test_losers_exclude_committed() {
        let mut att = TxnTable::new();
        att.insert(1).unwrap();
        att.insert(2).unwrap();
        att.record(1, 10, 10).unwrap();
        att.record(2, 20, 20).unwrap();
        att.set_state(1, TxnState::Committed).unwrap();

        let losers = att.losers();
        assert_eq!(losers, vec![(2, 20)]);
    }

    #[test]
    fn test_recovered_merge_takes_later_lsn() {
        let mut att = TxnTable::new();
        att.insert(5).unwrap();
        att.record(5, 300, 300).unwrap();

        att.insert_recovered(TxnSnapshot {
            tid: 5,
            state: TxnState::Active,
            last_lsn: 100,
            undo_next_lsn: 100,
        });
        assert_eq!(att.get(5).unwrap().last_lsn, 300);

        att.insert_recovered(TxnSnapshot {
            tid: 5,
            state: TxnState::Active,
            last_lsn: 500,
            undo_next_lsn: 500,
        });
        assert_eq!(att.get(5).unwrap().last_lsn, 500);
    }
}
