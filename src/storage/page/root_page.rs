//! The root page (page 0): first-tombstone pointer, master-save LSN and
//! the variable-hash-page pointer.

use crate::{
    io::{get_u64, put_u64},
    storage::{
        page::{Page, PageKind, PG_HDR_END},
        Lsn, Pgno, NULL_LSN, NULL_PGNO,
    },
};

const RN_FSTMB_OFST: usize = PG_HDR_END;
const RN_MSLSN_OFST: usize = RN_FSTMB_OFST + 8;
const RN_VHP_OFST: usize = RN_MSLSN_OFST + 8;

pub fn init(p: &mut Page) {
    p.set_kind(PageKind::Root);
    set_first_tombstone(p, NULL_PGNO);
    set_master_lsn(p, NULL_LSN);
    set_var_hash(p, NULL_PGNO);
}

pub fn first_tombstone(p: &Page) -> Pgno {
    get_u64(p.bytes(), RN_FSTMB_OFST)
}

pub fn set_first_tombstone(p: &mut Page, pg: Pgno) {
    put_u64(p.bytes_mut(), RN_FSTMB_OFST, pg);
}

pub fn master_lsn(p: &Page) -> Lsn {
    get_u64(p.bytes(), RN_MSLSN_OFST)
}

pub fn set_master_lsn(p: &mut Page, lsn: Lsn) {
    put_u64(p.bytes_mut(), RN_MSLSN_OFST, lsn);
}

pub fn var_hash(p: &Page) -> Pgno {
    get_u64(p.bytes(), RN_VHP_OFST)
}

pub fn set_var_hash(p: &mut Page, pg: Pgno) {
    put_u64(p.bytes_mut(), RN_VHP_OFST, pg);
}
