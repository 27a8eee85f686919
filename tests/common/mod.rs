#![allow(dead_code)]

use std::{path::PathBuf, sync::Once};

use itertools::Itertools;
use rope_db::{
    storage::{
        page::{data_list, inner_node, PageKind},
        Pgno, NULL_PGNO,
    },
    Db, Pager,
};

static INIT: Once = Once::new();

/// Set up log configuration once per test binary.
pub fn setup() {
    INIT.call_once(rope_db::utils::init_log);
}

pub fn scratch() -> tempfile::TempDir {
    tempfile::tempdir().unwrap()
}

pub fn paths(dir: &tempfile::TempDir) -> (PathBuf, PathBuf) {
    (dir.path().join("test.db"), dir.path().join("test.wal"))
}

pub fn open_db(dir: &tempfile::TempDir) -> Db {
    let (db, wal) = paths(dir);
    Db::open(db, wal).unwrap()
}

/// Little-endian u32 payload bytes for a range of values.
pub fn le_u32s<I: IntoIterator<Item = u32>>(vals: I) -> Vec<u8> {
    let mut out = Vec::new();
    for v in vals {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

pub fn as_u32s(bytes: &[u8]) -> Vec<u32> {
    assert_eq!(bytes.len() % 4, 0);
    bytes
        .chunks(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

const TREE_MASK: u8 = PageKind::DataList as u8 | PageKind::InnerNode as u8;

fn walk(pager: &Pager, pg: Pgno, is_root: bool, leaves: &mut Vec<(Pgno, usize)>) -> u64 {
    let h = pager.get(TREE_MASK, pg).unwrap();
    let kind = h.ro().kind().unwrap();

    if kind == PageKind::DataList {
        let used = data_list::used(&h.ro());
        drop(h);
        leaves.push((pg, used));
        return used as u64;
    }

    let n = inner_node::nkeys(&h.ro());
    assert!(n >= 1, "inner node {} has no keys", pg);
    if !is_root {
        assert!(
            n >= inner_node::IN_MIN_KEYS,
            "non-root inner node {} holds {} keys, minimum is {}",
            pg,
            n,
            inner_node::IN_MIN_KEYS
        );
    }
    let entries: Vec<(Pgno, u64)> = (0..n).map(|i| inner_node::entry(&h.ro(), i)).collect();
    drop(h);

    let mut sum = 0;
    for (child, key) in entries {
        let size = walk(pager, child, false, leaves);
        assert_eq!(
            key, size,
            "node {}: stored key {} != subtree byte count {}",
            pg, key, size
        );
        sum += size;
    }
    sum
}

/// Offline scan of a rope tree: checks the key invariant (every inner key
/// equals its subtree's byte count), the leaf sibling chain, and the
/// fill bounds. Returns the tree's total byte size.
pub fn validate_tree(pager: &Pager, root: Pgno) -> u64 {
    if root == NULL_PGNO {
        return 0;
    }

    let mut leaves = Vec::new();
    let total = walk(pager, root, true, &mut leaves);

    for ((a, _), (b, _)) in leaves.iter().tuple_windows() {
        let ha = pager.get(PageKind::DataList as u8, *a).unwrap();
        assert_eq!(data_list::next(&ha.ro()), *b, "leaf {} next link broken", a);
        drop(ha);
        let hb = pager.get(PageKind::DataList as u8, *b).unwrap();
        assert_eq!(data_list::prev(&hb.ro()), *a, "leaf {} prev link broken", b);
    }

    for (i, (pg, used)) in leaves.iter().enumerate() {
        let is_last = i == leaves.len() - 1;
        if !is_last {
            assert!(
                *used >= data_list::DL_MIN_FILL,
                "leaf {} holds {} bytes, minimum is {}",
                pg,
                used,
                data_list::DL_MIN_FILL
            );
        }
    }

    total
}

/// Validate the tree behind a named variable, returning its byte size.
pub fn validate_variable(db: &Db, name: &str) -> u64 {
    let tx = db.pager().begin_txn().unwrap();
    let var = rope_db::catalog::open_variable(db.pager(), &tx, name)
        .unwrap()
        .unwrap();
    let total = validate_tree(db.pager(), var.root);
    assert_eq!(total, var.total_size, "variable byte count out of sync");
    db.pager().commit(tx).unwrap();
    total
}
