//! Tombstone pages carry only a "next tombstone" pointer; together they
//! form the free list of reclaimable pages.

use crate::{
    io::{get_u64, put_u64},
    storage::{
        page::{Page, PageKind, PG_HDR_END},
        Pgno, NULL_PGNO,
    },
};

const TMB_NEXT_OFST: usize = PG_HDR_END;

pub fn init(p: &mut Page) {
    p.set_kind(PageKind::Tombstone);
    set_next(p, NULL_PGNO);
}

pub fn next(p: &Page) -> Pgno {
    get_u64(p.bytes(), TMB_NEXT_OFST)
}

pub fn set_next(p: &mut Page, pg: Pgno) {
    put_u64(p.bytes_mut(), TMB_NEXT_OFST, pg);
}
