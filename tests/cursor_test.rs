mod common;

use common::{as_u32s, le_u32s, open_db, scratch, setup, validate_variable};
use rand::prelude::*;
use rope_db::{Prim, ValueType};

/// Write integers 0..999 in order, then read them all back.
#[test]
fn test_sequential_write_read() {
    setup();
    let dir = scratch();
    let db = open_db(&dir);

    db.create("v", &ValueType::Prim(Prim::U32)).unwrap();
    db.insert("v", 0, &le_u32s(0..1000)).unwrap();

    let bytes = db.read("v", 0, 1000, 1).unwrap();
    assert_eq!(as_u32s(&bytes), (0..1000).collect::<Vec<u32>>());
    assert_eq!(db.len("v").unwrap(), 1000);
    validate_variable(&db, "v");
}

/// Strided read: every second element.
#[test]
fn test_strided_read() {
    setup();
    let dir = scratch();
    let db = open_db(&dir);

    db.create("v", &ValueType::Prim(Prim::U32)).unwrap();
    db.insert("v", 0, &le_u32s(0..1000)).unwrap();

    let bytes = db.read("v", 0, 500, 2).unwrap();
    let expect: Vec<u32> = (0..1000).step_by(2).collect();
    assert_eq!(as_u32s(&bytes), expect);
}

/// Insert 2000 bytes, carve 500 out of the middle, read what remains.
#[test]
fn test_insert_then_remove_middle() {
    setup();
    let dir = scratch();
    let db = open_db(&dir);

    let input: Vec<u8> = (0..2000u32).map(|i| (i % 251) as u8).collect();
    db.create("v", &ValueType::Prim(Prim::U8)).unwrap();
    db.insert("v", 0, &input).unwrap();

    let removed = db.remove("v", 700, 500, 1).unwrap();
    assert_eq!(removed, input[700..1200]);

    let rest = db.read("v", 0, 0, 1).unwrap();
    assert_eq!(rest.len(), 1500);
    assert_eq!(&rest[..700], &input[..700]);
    assert_eq!(&rest[700..], &input[1200..]);
    validate_variable(&db, "v");
}

/// Insert one byte at offset 0, 4097 times: forces repeated leaf splits.
#[test]
fn test_single_byte_prepends_split_leaves() {
    setup();
    let dir = scratch();
    let db = open_db(&dir);

    db.create("v", &ValueType::Prim(Prim::U8)).unwrap();
    for i in 0..4097u32 {
        db.insert("v", 0, &[(i % 256) as u8]).unwrap();
    }

    assert_eq!(db.len("v").unwrap(), 4097);
    validate_variable(&db, "v");

    // The most recent prepend sits at 0; the first one at the end.
    for &at in &[0u64, 1, 2048, 4096] {
        let got = db.read("v", at, 1, 1).unwrap();
        let expect = ((4096 - at as u32) % 256) as u8;
        assert_eq!(got, vec![expect], "byte at {}", at);
    }
}

/// Insert into the middle, then remove the same range: the variable is
/// restored byte for byte.
#[test]
fn test_insert_remove_idempotence() {
    setup();
    let dir = scratch();
    let db = open_db(&dir);

    let base: Vec<u8> = (0..9000u32).map(|i| (i % 241) as u8).collect();
    db.create("v", &ValueType::Prim(Prim::U8)).unwrap();
    db.insert("v", 0, &base).unwrap();

    let wedge: Vec<u8> = (0..5000u32).map(|i| (i % 13) as u8 + 200).collect();
    db.insert("v", 4444, &wedge).unwrap();
    validate_variable(&db, "v");

    let removed = db.remove("v", 4444, wedge.len() as u64, 1).unwrap();
    assert_eq!(removed, wedge);

    let all = db.read("v", 0, 0, 1).unwrap();
    assert_eq!(all, base);
    validate_variable(&db, "v");
}

/// A multi-level tree built from bulk inserts stays consistent through
/// random insert/remove churn.
#[test]
fn test_randomized_churn_keeps_tree_valid() {
    setup();
    let dir = scratch();
    let db = open_db(&dir);

    db.create("v", &ValueType::Prim(Prim::U8)).unwrap();

    let mut rng = StdRng::seed_from_u64(0xDB);
    let mut model: Vec<u8> = Vec::new();

    for round in 0..40 {
        if model.is_empty() || rng.gen_bool(0.6) {
            let len = rng.gen_range(1, 20_000);
            let at = rng.gen_range(0, model.len() as u64 + 1);
            let data: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            db.insert("v", at, &data).unwrap();
            let at = at as usize;
            model.splice(at..at, data);
        } else {
            let at = rng.gen_range(0, model.len() as u64);
            let n = rng.gen_range(1, (model.len() as u64 - at).max(2));
            let removed = db.remove("v", at, n, 1).unwrap();
            let at = at as usize;
            let expect: Vec<u8> = model
                .splice(at..(at + removed.len()).min(model.len()), std::iter::empty())
                .collect();
            assert_eq!(removed, expect, "round {}", round);
        }

        let total = validate_variable(&db, "v");
        assert_eq!(total, model.len() as u64, "round {}", round);
    }

    let all = db.read("v", 0, 0, 1).unwrap();
    assert_eq!(all, model);
}

/// Strided remove keeps the skipped elements, in order.
#[test]
fn test_strided_remove() {
    setup();
    let dir = scratch();
    let db = open_db(&dir);

    db.create("v", &ValueType::Prim(Prim::U32)).unwrap();
    db.insert("v", 0, &le_u32s(0..100)).unwrap();

    // Remove every second element starting at 0: 0, 2, 4, ...
    let removed = db.remove("v", 0, 50, 2).unwrap();
    let expect: Vec<u32> = (0..100).step_by(2).collect();
    assert_eq!(as_u32s(&removed), expect);

    let rest = db.read("v", 0, 0, 1).unwrap();
    let expect: Vec<u32> = (0..100).filter(|v| v % 2 == 1).collect();
    assert_eq!(as_u32s(&rest), expect);
    validate_variable(&db, "v");
}

/// In-place overwrite replaces elements without changing the size.
#[test]
fn test_overwrite_in_place() {
    setup();
    let dir = scratch();
    let db = open_db(&dir);

    db.create("v", &ValueType::Prim(Prim::U32)).unwrap();
    db.insert("v", 0, &le_u32s(0..100)).unwrap();

    let n = db.overwrite("v", 10, &le_u32s(1000..1005), 1).unwrap();
    assert_eq!(n, 5);
    assert_eq!(db.len("v").unwrap(), 100);

    let all = as_u32s(&db.read("v", 0, 0, 1).unwrap());
    for i in 0..100u32 {
        let expect = if (10..15).contains(&i) { 1000 + i - 10 } else { i };
        assert_eq!(all[i as usize], expect, "element {}", i);
    }
}

/// Strided overwrite touches every second element.
#[test]
fn test_strided_overwrite() {
    setup();
    let dir = scratch();
    let db = open_db(&dir);

    db.create("v", &ValueType::Prim(Prim::U32)).unwrap();
    db.insert("v", 0, &le_u32s(0..10)).unwrap();

    db.overwrite("v", 0, &le_u32s(100..105), 2).unwrap();

    let all = as_u32s(&db.read("v", 0, 0, 1).unwrap());
    assert_eq!(all, vec![100, 1, 101, 3, 102, 5, 103, 7, 104, 9]);
}

/// Reads past the end clamp; reads of empty variables return nothing.
#[test]
fn test_edge_reads() {
    setup();
    let dir = scratch();
    let db = open_db(&dir);

    db.create("v", &ValueType::Prim(Prim::U32)).unwrap();
    assert!(db.read("v", 0, 10, 1).unwrap().is_empty());

    db.insert("v", 0, &le_u32s(0..10)).unwrap();
    let tail = db.read("v", 8, 100, 1).unwrap();
    assert_eq!(as_u32s(&tail), vec![8, 9]);
    assert!(db.read("v", 10, 5, 1).unwrap().is_empty());
}

/// Tuple-typed elements move as indivisible units.
#[test]
fn test_tuple_elements() {
    setup();
    let dir = scratch();
    let db = open_db(&dir);

    // (u32, f64): 12 bytes per element.
    let vtype = ValueType::Tuple(vec![ValueType::Prim(Prim::U32), ValueType::Prim(Prim::F64)]);
    db.create("pairs", &vtype).unwrap();

    let mut payload = Vec::new();
    for i in 0..500u32 {
        payload.extend_from_slice(&i.to_le_bytes());
        payload.extend_from_slice(&(i as f64 * 0.5).to_le_bytes());
    }
    db.insert("pairs", 0, &payload).unwrap();
    assert_eq!(db.len("pairs").unwrap(), 500);

    let one = db.read("pairs", 42, 1, 1).unwrap();
    assert_eq!(one.len(), 12);
    assert_eq!(u32::from_le_bytes([one[0], one[1], one[2], one[3]]), 42);
    validate_variable(&db, "pairs");
}
