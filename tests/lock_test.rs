mod common;

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use common::{le_u32s, open_db, scratch, setup};
use rope_db::{
    lock::{LockKind, LockMode},
    ErrorKind, Prim, ValueType,
};

/// A writer blocks behind a reader's shared lock and proceeds once the
/// reader's transaction releases it.
#[test]
fn test_exclusive_waits_for_shared() {
    setup();
    let dir = scratch();
    let db = Arc::new(open_db(&dir));

    db.create("v", &ValueType::Prim(Prim::U32)).unwrap();
    db.insert("v", 0, &le_u32s(0..10)).unwrap();

    // Transaction A holds S on the variable.
    let tx_a = db.pager().begin_txn().unwrap();
    let var = rope_db::catalog::open_variable(db.pager(), &tx_a, "v")
        .unwrap()
        .unwrap();
    db.pager()
        .locks()
        .lock(tx_a.tid(), LockKind::Var, var.vp_pgno, LockMode::Shared)
        .unwrap();

    let acquired = Arc::new(AtomicBool::new(false));
    let db2 = Arc::clone(&db);
    let flag = Arc::clone(&acquired);
    let vp = var.vp_pgno;

    // Transaction B wants X on the same variable; it must block.
    let writer = thread::spawn(move || {
        let tx_b = db2.pager().begin_txn().unwrap();
        db2.pager()
            .locks()
            .lock(tx_b.tid(), LockKind::Var, vp, LockMode::Exclusive)
            .unwrap();
        flag.store(true, Ordering::SeqCst);
        db2.pager().commit(tx_b).unwrap();
    });

    thread::sleep(Duration::from_millis(100));
    assert!(
        !acquired.load(Ordering::SeqCst),
        "writer acquired X while S was held"
    );

    // Commit A: strict 2PL releases its locks, the writer unblocks.
    db.pager().commit(tx_a).unwrap();
    writer.join().unwrap();
    assert!(acquired.load(Ordering::SeqCst));
}

/// Holding a child lock implies the matching intent mode on every
/// ancestor.
#[test]
fn test_lock_hierarchy_intents() {
    setup();
    let dir = scratch();
    let db = open_db(&dir);

    let tx = db.pager().begin_txn().unwrap();
    db.pager()
        .locks()
        .lock(tx.tid(), LockKind::VarNext, 7, LockMode::Exclusive)
        .unwrap();

    let held = db.pager().locks().held_by(tx.tid());
    let mode_of = |k: LockKind| {
        held.iter()
            .find(|(id, _)| id.kind() == k)
            .map(|(_, m)| *m)
    };

    assert_eq!(mode_of(LockKind::VarNext), Some(LockMode::Exclusive));
    assert_eq!(mode_of(LockKind::Var), Some(LockMode::IntentExclusive));
    assert_eq!(mode_of(LockKind::Db), Some(LockMode::IntentExclusive));

    db.pager().commit(tx).unwrap();
    assert!(db.pager().locks().held_by(tx.tid()).is_empty());
}

/// Two IX holders coexist; their X children on different payloads never
/// conflict.
#[test]
fn test_intent_locks_allow_disjoint_children() {
    setup();
    let dir = scratch();
    let db = open_db(&dir);

    let tx_a = db.pager().begin_txn().unwrap();
    let tx_b = db.pager().begin_txn().unwrap();

    db.pager()
        .locks()
        .lock(tx_a.tid(), LockKind::Var, 1, LockMode::Exclusive)
        .unwrap();
    db.pager()
        .locks()
        .lock(tx_b.tid(), LockKind::Var, 2, LockMode::Exclusive)
        .unwrap();

    db.pager().commit(tx_a).unwrap();
    db.pager().commit(tx_b).unwrap();
}

/// An irresolvable wait surfaces as the distinguished deadlock error.
#[test]
fn test_lock_timeout_reports_deadlock() {
    use rope_db::{lock::LockTable, Pager};

    setup();
    let dir = scratch();
    let pager = Pager::open_with(
        dir.path().join("t.db"),
        dir.path().join("t.wal"),
        16,
        LockTable::with_timeout(Duration::from_millis(50)),
    )
    .unwrap();

    let tx_a = pager.begin_txn().unwrap();
    let tx_b = pager.begin_txn().unwrap();

    pager
        .locks()
        .lock(tx_a.tid(), LockKind::Var, 9, LockMode::Exclusive)
        .unwrap();
    let err = pager
        .locks()
        .lock(tx_b.tid(), LockKind::Var, 9, LockMode::Shared)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Deadlock);

    pager.rollback(tx_b).unwrap();
    pager.commit(tx_a).unwrap();
}

/// Concurrent committed appends through the full stack serialize
/// cleanly under the variable lock.
#[test]
fn test_concurrent_inserts_serialize() {
    setup();
    let dir = scratch();
    let db = Arc::new(open_db(&dir));

    db.create("v", &ValueType::Prim(Prim::U32)).unwrap();

    let mut handles = Vec::new();
    for t in 0..4u32 {
        let db = Arc::clone(&db);
        handles.push(thread::spawn(move || {
            for i in 0..25u32 {
                let val = t * 1000 + i;
                // Append at the end; the Var lock orders the writers.
                let len = db.len("v").unwrap();
                db.insert("v", len, &le_u32s(val..val + 1)).unwrap();
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(db.len("v").unwrap(), 100);
    common::validate_variable(&db, "v");
}
