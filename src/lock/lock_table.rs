use std::{
    collections::{HashMap, VecDeque},
    sync::{Condvar, Mutex},
    time::{Duration, Instant},
};

use log::trace;

use crate::{
    error::{Error, ErrorKind, Result},
    lock::{
        adaptive_map::AdaptiveMap,
        lock_id::{LockId, LockKind},
    },
    storage::Tid,
};

/// How long a single lock wait may block before it is presumed to be a
/// deadlock.
const LOCK_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockMode {
    IntentShared,
    IntentExclusive,
    Shared,
    SharedIntentExclusive,
    Exclusive,
}

impl LockMode {
    /// The standard IS/IX/S/SIX/X compatibility matrix.
    pub fn compatible(self, other: LockMode) -> bool {
        use LockMode::*;
        match (self, other) {
            (IntentShared, Exclusive) | (Exclusive, IntentShared) => false,
            (IntentShared, _) | (_, IntentShared) => true,
            (IntentExclusive, IntentExclusive) => true,
            (Shared, Shared) => true,
            _ => false,
        }
    }

    /// Does holding `self` already grant everything `want` would?
    pub fn covers(self, want: LockMode) -> bool {
        use LockMode::*;
        match self {
            Exclusive => true,
            SharedIntentExclusive => {
                matches!(want, SharedIntentExclusive | Shared | IntentExclusive | IntentShared)
            }
            Shared => matches!(want, Shared | IntentShared),
            IntentExclusive => matches!(want, IntentExclusive | IntentShared),
            IntentShared => matches!(want, IntentShared),
        }
    }

    /// The least mode granting both held and wanted rights. The only
    /// combination not on the ladder is S + IX = SIX.
    fn combine(self, other: LockMode) -> LockMode {
        use LockMode::*;
        if self.covers(other) {
            return self;
        }
        if other.covers(self) {
            return other;
        }
        match (self, other) {
            (Shared, IntentExclusive) | (IntentExclusive, Shared) => SharedIntentExclusive,
            _ => self.max(other),
        }
    }

    /// Mode required on the parent before acquiring a child in `self`.
    pub fn parent_mode(self) -> LockMode {
        use LockMode::*;
        match self {
            IntentShared | Shared => IntentShared,
            IntentExclusive | SharedIntentExclusive | Exclusive => IntentExclusive,
        }
    }
}

struct LockEntry {
    holders: Vec<(Tid, LockMode)>,
    waiters: VecDeque<(u64, Tid)>,
}

struct Inner {
    table: AdaptiveMap<LockId, LockEntry>,
    /// Per-transaction chain of held lock identities, for strict 2PL
    /// release.
    held: HashMap<Tid, Vec<LockId>>,
    next_ticket: u64,
}

/// The hierarchical lock table. Acquiring a child lock first acquires the
/// implied intent modes on every ancestor; all locks are released in one
/// sweep at commit/abort.
pub struct LockTable {
    inner: Mutex<Inner>,
    cv: Condvar,
    timeout: Duration,
}

impl LockTable {
    pub fn new() -> Self {
        Self::with_timeout(LOCK_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                table: AdaptiveMap::new(),
                held: HashMap::new(),
                next_ticket: 0,
            }),
            cv: Condvar::new(),
            timeout,
        }
    }

    /// Acquire `mode` on `(kind, payload)` for `tid`, blocking on
    /// conflict. Parents are locked first, in the intent mode the child
    /// requires. A wait that exceeds the timeout fails with `Deadlock`.
    pub fn lock(&self, tid: Tid, kind: LockKind, payload: u64, mode: LockMode) -> Result<()> {
        self.lock_id(tid, LockId::new(kind, payload), mode)
    }

    fn lock_id(&self, tid: Tid, id: LockId, mode: LockMode) -> Result<()> {
        if let Some(parent) = id.parent() {
            self.lock_id(tid, parent, mode.parent_mode())?;
        }
        self.lock_once(tid, id, mode)
    }

    fn lock_once(&self, tid: Tid, id: LockId, mode: LockMode) -> Result<()> {
        let deadline = Instant::now() + self.timeout;
        let mut ticket: Option<u64> = None;

        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.table.get(&id).is_none() {
                inner.table.insert(
                    id,
                    LockEntry {
                        holders: Vec::new(),
                        waiters: VecDeque::new(),
                    },
                );
            }
            let entry = inner.table.get_mut(&id).unwrap();

            if let Some(pos) = entry.holders.iter().position(|(t, _)| *t == tid) {
                // Already a holder: re-grant or upgrade.
                let held = entry.holders[pos].1;
                if held.covers(mode) {
                    self.forget_ticket(&mut inner, id, ticket);
                    return Ok(());
                }
                let upgraded = held.combine(mode);
                let others_ok = entry
                    .holders
                    .iter()
                    .all(|(t, m)| *t == tid || m.compatible(upgraded));
                if others_ok {
                    let entry = inner.table.get_mut(&id).unwrap();
                    let pos = entry.holders.iter().position(|(t, _)| *t == tid).unwrap();
                    entry.holders[pos].1 = upgraded;
                    self.forget_ticket(&mut inner, id, ticket);
                    trace!("tx_{} upgraded {:?} to {:?}", tid, id, upgraded);
                    return Ok(());
                }
            } else {
                let holders_ok = entry.holders.iter().all(|(_, m)| m.compatible(mode));
                let front_ok = match (entry.waiters.front(), ticket) {
                    (None, _) => true,
                    (Some((front, _)), Some(t)) => *front == t,
                    (Some(_), None) => false,
                };
                if holders_ok && front_ok {
                    if ticket.is_some() {
                        entry.waiters.pop_front();
                    }
                    entry.holders.push((tid, mode));
                    inner.held.entry(tid).or_insert_with(Vec::new).push(id);
                    trace!("tx_{} acquired {:?} in {:?}", tid, id, mode);
                    // Later compatible waiters may be grantable too.
                    self.cv.notify_all();
                    return Ok(());
                }
                if ticket.is_none() {
                    let t = inner.next_ticket;
                    inner.next_ticket += 1;
                    ticket = Some(t);
                    inner
                        .table
                        .get_mut(&id)
                        .unwrap()
                        .waiters
                        .push_back((t, tid));
                }
            }

            let now = Instant::now();
            if now >= deadline {
                self.forget_ticket(&mut inner, id, ticket);
                self.cv.notify_all();
                let err = Error::new(
                    ErrorKind::Deadlock,
                    &format!("tx_{} timed out waiting for {:?} in {:?}", tid, id, mode),
                );
                err.show_backtrace();
                return Err(err);
            }
            let (guard, _) = self.cv.wait_timeout(inner, deadline - now).unwrap();
            inner = guard;
        }
    }

    fn forget_ticket(&self, inner: &mut Inner, id: LockId, ticket: Option<u64>) {
        if let Some(t) = ticket {
            if let Some(entry) = inner.table.get_mut(&id) {
                entry.waiters.retain(|(tk, _)| *tk != t);
            }
        }
    }

    /// Strict 2PL release: drop every lock `tid` holds and wake waiters.
    /// Lock objects with no holders and no waiters leave the table.
    pub fn unlock_all(&self, tid: Tid) {
        let mut inner = self.inner.lock().unwrap();
        let ids = inner.held.remove(&tid).unwrap_or_default();
        for id in ids {
            if let Some(entry) = inner.table.get_mut(&id) {
                entry.holders.retain(|(t, _)| *t != tid);
                if entry.holders.is_empty() && entry.waiters.is_empty() {
                    inner.table.remove(&id);
                }
            }
        }
        trace!("tx_{} released all locks", tid);
        self.cv.notify_all();
    }

    /// The locks `tid` currently holds; test and debugging aid.
    pub fn held_by(&self, tid: Tid) -> Vec<(LockId, LockMode)> {
        let inner = self.inner.lock().unwrap();
        let mut out = Vec::new();
        for id in inner.held.get(&tid).cloned().unwrap_or_default() {
            if let Some(entry) = inner.table.get(&id) {
                if let Some((_, m)) = entry.holders.iter().find(|(t, _)| *t == tid) {
                    out.push((id, *m));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_compatibility_matrix() {
        use LockMode::*;
        assert!(IntentShared.compatible(SharedIntentExclusive));
        assert!(!IntentShared.compatible(Exclusive));
        assert!(IntentExclusive.compatible(IntentExclusive));
        assert!(!IntentExclusive.compatible(Shared));
        assert!(Shared.compatible(Shared));
        assert!(!Shared.compatible(SharedIntentExclusive));
        assert!(!SharedIntentExclusive.compatible(SharedIntentExclusive));
        assert!(!Exclusive.compatible(Exclusive));
    }

    #[test]
    fn test_parent_intents_are_acquired() {
        let lt = LockTable::new();
        lt.lock(1, LockKind::VarHashSlot, 7, LockMode::Exclusive)
            .unwrap();

        let held = lt.held_by(1);
        let mode_of = |k: LockKind| {
            held.iter()
                .find(|(id, _)| id.kind() == k)
                .map(|(_, m)| *m)
        };
        assert_eq!(mode_of(LockKind::VarHashSlot), Some(LockMode::Exclusive));
        assert_eq!(mode_of(LockKind::VarHash), Some(LockMode::IntentExclusive));
        assert_eq!(mode_of(LockKind::Db), Some(LockMode::IntentExclusive));

        lt.unlock_all(1);
        assert!(lt.held_by(1).is_empty());
    }

    #[test]
    fn test_shared_holders_coexist() {
        let lt = LockTable::new();
        lt.lock(1, LockKind::Var, 3, LockMode::Shared).unwrap();
        lt.lock(2, LockKind::Var, 3, LockMode::Shared).unwrap();
        lt.unlock_all(1);
        lt.unlock_all(2);
    }

    #[test]
    fn test_conflict_times_out_as_deadlock() {
        let lt = LockTable::with_timeout(Duration::from_millis(50));
        lt.lock(1, LockKind::Var, 3, LockMode::Exclusive).unwrap();

        let err = lt
            .lock(2, LockKind::Var, 3, LockMode::Shared)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Deadlock);
        lt.unlock_all(1);
    }

    #[test]
    fn test_blocked_writer_wakes_on_release() {
        let lt = Arc::new(LockTable::new());
        lt.lock(1, LockKind::Var, 9, LockMode::Shared).unwrap();

        let lt2 = Arc::clone(&lt);
        let waiter = std::thread::spawn(move || {
            lt2.lock(2, LockKind::Var, 9, LockMode::Exclusive).unwrap();
            lt2.unlock_all(2);
        });

        std::thread::sleep(Duration::from_millis(50));
        lt.unlock_all(1);
        waiter.join().unwrap();
    }

    #[test]
    fn test_upgrade_s_plus_ix_is_six() {
        let lt = LockTable::new();
        lt.lock(1, LockKind::Var, 4, LockMode::Shared).unwrap();
        lt.lock(1, LockKind::Var, 4, LockMode::IntentExclusive)
            .unwrap();

        let held = lt.held_by(1);
        let (_, m) = held
            .iter()
            .find(|(id, _)| id.kind() == LockKind::Var)
            .unwrap();
        assert_eq!(*m, LockMode::SharedIntentExclusive);
        lt.unlock_all(1);
    }

    #[test]
    fn test_reacquire_is_idempotent() {
        let lt = LockTable::new();
        lt.lock(1, LockKind::RpTree, 2, LockMode::Exclusive).unwrap();
        lt.lock(1, LockKind::RpTree, 2, LockMode::Shared).unwrap();
        lt.lock(1, LockKind::RpTree, 2, LockMode::Exclusive).unwrap();

        let held = lt.held_by(1);
        assert_eq!(
            held.iter()
                .filter(|(id, _)| id.kind() == LockKind::RpTree)
                .count(),
            1
        );
        lt.unlock_all(1);
    }
}
