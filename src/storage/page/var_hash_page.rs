//! Variable hash pages: a fixed bucket array of var-page chain heads.
//! Collisions chain through the var pages' `next` pointers.

use crate::{
    io::{get_u64, put_u64},
    storage::{
        page::{Page, PageKind, PG_HDR_END},
        Pgno, NULL_PGNO, PAGE_SIZE,
    },
};

/// Bucket count per hash page.
pub const VH_SLOTS: usize = (PAGE_SIZE - PG_HDR_END) / 8;

pub fn init(p: &mut Page) {
    p.set_kind(PageKind::VarHash);
    for i in 0..VH_SLOTS {
        set_slot(p, i, NULL_PGNO);
    }
}

pub fn slot(p: &Page, idx: usize) -> Pgno {
    debug_assert!(idx < VH_SLOTS);
    get_u64(p.bytes(), PG_HDR_END + idx * 8)
}

pub fn set_slot(p: &mut Page, idx: usize, pg: Pgno) {
    debug_assert!(idx < VH_SLOTS);
    put_u64(p.bytes_mut(), PG_HDR_END + idx * 8, pg);
}

/// Bucket index for a variable name. FNV-1a, the same flavor the lock
/// identities use.
pub fn bucket_of(name: &str) -> usize {
    (crate::lock::lock_id::fnv1a(name.as_bytes()) % VH_SLOTS as u64) as usize
}
