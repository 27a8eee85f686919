mod common;

use common::{as_u32s, le_u32s, open_db, paths, scratch, setup, validate_variable};
use rope_db::{lock::LockTable, Db, ErrorKind, Pager, Prim, ValueType};

/// A buffer pool far smaller than the working set forces evictions; the
/// WAL rule keeps every page readable afterwards.
#[test]
fn test_eviction_under_tiny_pool() {
    setup();
    let dir = scratch();
    let (dbp, walp) = paths(&dir);

    {
        let pager = Pager::open_with(&dbp, &walp, 8, LockTable::new()).unwrap();
        let db = Db::from_pager(pager);

        db.create("v", &ValueType::Prim(Prim::U32)).unwrap();
        // ~400 KiB of data through 8 frames.
        for chunk in 0..10u32 {
            let at = (chunk * 10_000) as u64;
            db.insert("v", at, &le_u32s(chunk * 10_000..(chunk + 1) * 10_000))
                .unwrap();
        }

        let all = as_u32s(&db.read("v", 0, 0, 1).unwrap());
        assert_eq!(all, (0..100_000).collect::<Vec<u32>>());
        validate_variable(&db, "v");
        db.close().unwrap();
    }

    let db = Db::open(dbp, walp).unwrap();
    assert_eq!(db.len("v").unwrap(), 100_000);
}

/// Deleted pages go to the tombstone list and later allocations reuse
/// them instead of growing the file.
#[test]
fn test_tombstone_reuse_bounds_file_growth() {
    setup();
    let dir = scratch();
    let db = open_db(&dir);

    db.create("v", &ValueType::Prim(Prim::U8)).unwrap();
    let payload: Vec<u8> = (0..60_000u32).map(|i| i as u8).collect();
    db.insert("v", 0, &payload).unwrap();
    let peak = db.pager().num_pages();

    // Shrink to nothing, then fill back up: the file must not grow.
    db.remove("v", 0, 0, 1).unwrap();
    db.insert("v", 0, &payload).unwrap();
    assert!(
        db.pager().num_pages() <= peak + 2,
        "file grew from {} to {} despite the free list",
        peak,
        db.pager().num_pages()
    );
    validate_variable(&db, "v");
}

/// A database file with a torn size is rejected as corrupt.
#[test]
fn test_torn_file_is_corrupt() {
    setup();
    let dir = scratch();
    let (dbp, walp) = paths(&dir);

    std::fs::write(&dbp, vec![0u8; 5000]).unwrap();
    let err = Db::open(dbp, walp).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Corrupt);
}

/// Catalog round trip with a name + type payload large enough to
/// overflow the var page into var-tail pages.
#[test]
fn test_catalog_overflow_payload() {
    setup();
    let dir = scratch();
    let db = open_db(&dir);

    // A long name plus a wide tuple pushes the payload past what one
    // var page holds.
    let name: String = std::iter::repeat('w').take(1000).collect();
    let members: Vec<ValueType> = (0..1700).map(|_| ValueType::Prim(Prim::U16)).collect();
    let vtype = ValueType::Tuple(members);
    let tlen = vtype.to_type_string().unwrap().len();
    assert!(name.len() + tlen > 4047, "payload fits in one page");

    db.create(&name, &vtype).unwrap();

    let tx = db.pager().begin_txn().unwrap();
    let var = rope_db::catalog::open_variable(db.pager(), &tx, &name)
        .unwrap()
        .unwrap();
    assert_eq!(var.vtype, vtype);
    db.pager().commit(tx).unwrap();

    // One element is 3400 bytes.
    let payload = vec![7u8; 3400 * 3];
    db.insert(&name, 0, &payload).unwrap();
    assert_eq!(db.len(&name).unwrap(), 3);

    db.delete(&name).unwrap();
    assert!(db.len(&name).is_err());
}

/// Duplicate creation and unknown names surface as invalid arguments.
#[test]
fn test_catalog_errors() {
    setup();
    let dir = scratch();
    let db = open_db(&dir);

    db.create("v", &ValueType::Prim(Prim::U32)).unwrap();
    assert_eq!(
        db.create("v", &ValueType::Prim(Prim::U32)).unwrap_err().kind(),
        ErrorKind::InvalidArgument
    );
    assert_eq!(
        db.read("missing", 0, 1, 1).unwrap_err().kind(),
        ErrorKind::InvalidArgument
    );
    assert_eq!(
        db.delete("missing").unwrap_err().kind(),
        ErrorKind::InvalidArgument
    );

    // Payloads that do not divide into whole elements are rejected.
    assert_eq!(
        db.insert("v", 0, &[1, 2, 3]).unwrap_err().kind(),
        ErrorKind::InvalidArgument
    );
}

/// Many variables hash into the same directory; all stay reachable.
#[test]
fn test_many_variables() {
    setup();
    let dir = scratch();
    let db = open_db(&dir);

    for i in 0..64u32 {
        let name = format!("metric_{}", i);
        db.create(&name, &ValueType::Prim(Prim::U32)).unwrap();
        db.insert(&name, 0, &le_u32s(i * 100..i * 100 + 50)).unwrap();
    }

    for i in 0..64u32 {
        let name = format!("metric_{}", i);
        let got = as_u32s(&db.read(&name, 0, 0, 1).unwrap());
        assert_eq!(got, (i * 100..i * 100 + 50).collect::<Vec<u32>>());
    }
}
