//! Variable pages hold one variable's metadata: the hash-chain link, the
//! rope-tree root, the total byte length, and the name + type string. When
//! name and type do not fit, the remainder continues in var-tail pages
//! chained through `ovnext`.

use crate::{
    error::{Error, ErrorKind, Result},
    io::{get_u16, get_u64, put_u16, put_u64},
    storage::{
        page::{Page, PageKind, PG_HDR_END},
        Pgno, NULL_PGNO, PAGE_SIZE,
    },
};

const VP_NEXT_OFST: usize = PG_HDR_END;
const VP_OVNX_OFST: usize = VP_NEXT_OFST + 8;
const VP_VLEN_OFST: usize = VP_OVNX_OFST + 8;
const VP_TLEN_OFST: usize = VP_VLEN_OFST + 2;
const VP_ROOT_OFST: usize = VP_TLEN_OFST + 2;
const VP_TOTAL_OFST: usize = VP_ROOT_OFST + 8;
pub const VP_DATA_OFST: usize = VP_TOTAL_OFST + 8;

/// Name + type bytes held in the var page itself.
pub const VP_DATA_SIZE: usize = PAGE_SIZE - VP_DATA_OFST;

pub const MAX_VSTR: usize = 1024;
pub const MAX_TSTR: usize = 4096;

pub fn init(p: &mut Page) {
    p.set_kind(PageKind::Var);
    set_next(p, NULL_PGNO);
    set_ovnext(p, NULL_PGNO);
    set_vlen(p, 0);
    set_tlen(p, 0);
    set_root(p, NULL_PGNO);
    set_total(p, 0);
}

pub fn next(p: &Page) -> Pgno {
    get_u64(p.bytes(), VP_NEXT_OFST)
}

pub fn set_next(p: &mut Page, pg: Pgno) {
    put_u64(p.bytes_mut(), VP_NEXT_OFST, pg);
}

pub fn ovnext(p: &Page) -> Pgno {
    get_u64(p.bytes(), VP_OVNX_OFST)
}

pub fn set_ovnext(p: &mut Page, pg: Pgno) {
    put_u64(p.bytes_mut(), VP_OVNX_OFST, pg);
}

pub fn vlen(p: &Page) -> usize {
    get_u16(p.bytes(), VP_VLEN_OFST) as usize
}

pub fn set_vlen(p: &mut Page, len: usize) {
    put_u16(p.bytes_mut(), VP_VLEN_OFST, len as u16);
}

pub fn tlen(p: &Page) -> usize {
    get_u16(p.bytes(), VP_TLEN_OFST) as usize
}

pub fn set_tlen(p: &mut Page, len: usize) {
    put_u16(p.bytes_mut(), VP_TLEN_OFST, len as u16);
}

pub fn root(p: &Page) -> Pgno {
    get_u64(p.bytes(), VP_ROOT_OFST)
}

pub fn set_root(p: &mut Page, pg: Pgno) {
    put_u64(p.bytes_mut(), VP_ROOT_OFST, pg);
}

pub fn total(p: &Page) -> u64 {
    get_u64(p.bytes(), VP_TOTAL_OFST)
}

pub fn set_total(p: &mut Page, total: u64) {
    put_u64(p.bytes_mut(), VP_TOTAL_OFST, total);
}

/// The name + type payload slice held by this page.
pub fn data(p: &Page) -> &[u8] {
    let held = held_len(p);
    &p.bytes()[VP_DATA_OFST..VP_DATA_OFST + held]
}

pub fn write_data(p: &mut Page, bytes: &[u8]) {
    debug_assert!(bytes.len() <= VP_DATA_SIZE);
    p.bytes_mut()[VP_DATA_OFST..VP_DATA_OFST + bytes.len()].copy_from_slice(bytes);
}

/// Bytes of the name + type payload stored in this page (the rest
/// overflows into var tails).
pub fn held_len(p: &Page) -> usize {
    (vlen(p) + tlen(p)).min(VP_DATA_SIZE)
}

pub fn is_overflow(p: &Page) -> bool {
    vlen(p) + tlen(p) > VP_DATA_SIZE
}

pub fn validate(p: &Page) -> Result<()> {
    if vlen(p) == 0 {
        return Err(Error::new(ErrorKind::Corrupt, "empty variable name"));
    }
    if tlen(p) == 0 {
        return Err(Error::new(ErrorKind::Corrupt, "empty type string"));
    }
    if vlen(p) > MAX_VSTR {
        return Err(Error::new(ErrorKind::Corrupt, "variable name overflow"));
    }
    if tlen(p) > MAX_TSTR {
        return Err(Error::new(ErrorKind::Corrupt, "type string overflow"));
    }
    if is_overflow(p) && ovnext(p) == NULL_PGNO {
        return Err(Error::new(
            ErrorKind::Corrupt,
            "var page requires overflow but has no tail pointer",
        ));
    }
    Ok(())
}

/// Var-tail pages: plain byte continuation of a var page.
pub mod tail {
    use super::*;

    const VT_NEXT_OFST: usize = PG_HDR_END;
    const VT_USED_OFST: usize = VT_NEXT_OFST + 8;
    const VT_DATA_OFST: usize = VT_USED_OFST + 2;

    pub const VT_DATA_SIZE: usize = PAGE_SIZE - VT_DATA_OFST;

    pub fn init(p: &mut Page) {
        p.set_kind(PageKind::VarTail);
        set_next(p, NULL_PGNO);
        set_used(p, 0);
    }

    pub fn next(p: &Page) -> Pgno {
        get_u64(p.bytes(), VT_NEXT_OFST)
    }

    pub fn set_next(p: &mut Page, pg: Pgno) {
        put_u64(p.bytes_mut(), VT_NEXT_OFST, pg);
    }

    pub fn used(p: &Page) -> usize {
        get_u16(p.bytes(), VT_USED_OFST) as usize
    }

    pub fn set_used(p: &mut Page, used: usize) {
        put_u16(p.bytes_mut(), VT_USED_OFST, used as u16);
    }

    pub fn data(p: &Page) -> &[u8] {
        &p.bytes()[VT_DATA_OFST..VT_DATA_OFST + used(p)]
    }

    pub fn write_data(p: &mut Page, bytes: &[u8]) {
        debug_assert!(bytes.len() <= VT_DATA_SIZE);
        p.bytes_mut()[VT_DATA_OFST..VT_DATA_OFST + bytes.len()].copy_from_slice(bytes);
        set_used(p, bytes.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_empty_fields() {
        let mut p = Page::new_zeroed();
        init(&mut p);
        assert_eq!(validate(&p).unwrap_err().kind(), ErrorKind::Corrupt);

        set_vlen(&mut p, 3);
        set_tlen(&mut p, 2);
        validate(&p).unwrap();
    }

    #[test]
    fn test_overflow_needs_tail_pointer() {
        let mut p = Page::new_zeroed();
        init(&mut p);
        set_vlen(&mut p, 100);
        set_tlen(&mut p, VP_DATA_SIZE);
        assert!(is_overflow(&p));
        assert_eq!(validate(&p).unwrap_err().kind(), ErrorKind::Corrupt);

        set_ovnext(&mut p, 9);
        validate(&p).unwrap();
    }

    #[test]
    fn test_payload_round_trip() {
        let mut p = Page::new_zeroed();
        init(&mut p);
        set_vlen(&mut p, 3);
        set_tlen(&mut p, 4);
        write_data(&mut p, b"posu32\x01");
        assert_eq!(data(&p), b"posu32\x01");
    }
}
