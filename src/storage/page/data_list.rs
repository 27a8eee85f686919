//! Data-list leaves: raw tuple bytes with prev/next sibling pointers and
//! a used-bytes count.

use crate::{
    io::{get_u16, get_u64, put_u16, put_u64},
    storage::{
        page::{Page, PageKind, PG_HDR_END},
        Pgno, NULL_PGNO, PAGE_SIZE,
    },
};

const DL_NEXT_OFST: usize = PG_HDR_END;
const DL_PREV_OFST: usize = DL_NEXT_OFST + 8;
const DL_USED_OFST: usize = DL_PREV_OFST + 8;
const DL_DATA_OFST: usize = DL_USED_OFST + 2;

pub const DL_DATA_SIZE: usize = PAGE_SIZE - DL_DATA_OFST;
pub const DL_MIN_FILL: usize = DL_DATA_SIZE / 2;

pub fn init(p: &mut Page) {
    p.set_kind(PageKind::DataList);
    set_next(p, NULL_PGNO);
    set_prev(p, NULL_PGNO);
    set_used(p, 0);
}

pub fn next(p: &Page) -> Pgno {
    get_u64(p.bytes(), DL_NEXT_OFST)
}

pub fn set_next(p: &mut Page, pg: Pgno) {
    put_u64(p.bytes_mut(), DL_NEXT_OFST, pg);
}

pub fn prev(p: &Page) -> Pgno {
    get_u64(p.bytes(), DL_PREV_OFST)
}

pub fn set_prev(p: &mut Page, pg: Pgno) {
    put_u64(p.bytes_mut(), DL_PREV_OFST, pg);
}

pub fn used(p: &Page) -> usize {
    get_u16(p.bytes(), DL_USED_OFST) as usize
}

pub fn set_used(p: &mut Page, used: usize) {
    debug_assert!(used <= DL_DATA_SIZE);
    put_u16(p.bytes_mut(), DL_USED_OFST, used as u16);
}

pub fn avail(p: &Page) -> usize {
    DL_DATA_SIZE - used(p)
}

pub fn is_full(p: &Page) -> bool {
    used(p) == DL_DATA_SIZE
}

pub fn data(p: &Page) -> &[u8] {
    &p.bytes()[DL_DATA_OFST..DL_DATA_OFST + used(p)]
}

/// Read `len` bytes starting at `ofst`.
pub fn read_at(p: &Page, ofst: usize, len: usize) -> &[u8] {
    debug_assert!(ofst + len <= used(p));
    &p.bytes()[DL_DATA_OFST + ofst..DL_DATA_OFST + ofst + len]
}

/// Overwrite bytes at `ofst` without changing `used`.
pub fn write_at(p: &mut Page, ofst: usize, bytes: &[u8]) {
    debug_assert!(ofst + bytes.len() <= used(p));
    p.bytes_mut()[DL_DATA_OFST + ofst..DL_DATA_OFST + ofst + bytes.len()].copy_from_slice(bytes);
}

/// Append bytes at the end, returning how many fit.
pub fn append(p: &mut Page, bytes: &[u8]) -> usize {
    let u = used(p);
    let n = bytes.len().min(DL_DATA_SIZE - u);
    p.bytes_mut()[DL_DATA_OFST + u..DL_DATA_OFST + u + n].copy_from_slice(&bytes[..n]);
    set_used(p, u + n);
    n
}

/// Copy `len` bytes from `src[src_ofst..]` into `dest[dest_ofst..]`,
/// raising `dest.used` when the copy extends it. The two offsets may
/// address the same page through `shift_within`.
pub fn copy_between(dest: &mut Page, src: &Page, dest_ofst: usize, src_ofst: usize, len: usize) {
    debug_assert!(src_ofst + len <= used(src));
    debug_assert!(dest_ofst + len <= DL_DATA_SIZE);
    let from = &src.bytes()[DL_DATA_OFST + src_ofst..DL_DATA_OFST + src_ofst + len];
    dest.bytes_mut()[DL_DATA_OFST + dest_ofst..DL_DATA_OFST + dest_ofst + len]
        .copy_from_slice(from);
    if dest_ofst + len > used(dest) {
        set_used(dest, dest_ofst + len);
    }
}

/// Move `len` bytes from `src_ofst` down to `dest_ofst` inside one page
/// (`dest_ofst <= src_ofst`). `used` is not adjusted.
pub fn shift_within(p: &mut Page, dest_ofst: usize, src_ofst: usize, len: usize) {
    debug_assert!(dest_ofst <= src_ofst);
    debug_assert!(src_ofst + len <= used(p));
    p.bytes_mut()
        .copy_within(DL_DATA_OFST + src_ofst..DL_DATA_OFST + src_ofst + len, DL_DATA_OFST + dest_ofst);
}
