use crate::{
    error::{Error, ErrorKind, Result},
    io::{get_u32, get_u64, put_u32, put_u64},
    storage::{Lsn, PAGE_SIZE},
};

/// Common page header layout, shared by every page kind:
///
/// - byte 0: page type tag
/// - bytes 1..9: page LSN (LSN of the last log record that modified it)
/// - bytes 9..13: CRC-32 over the page with the CRC field zeroed
///
/// The kind-specific body starts at `PG_HDR_END`.
pub const PG_HDR_END: usize = 13;

const TYPE_OFST: usize = 0;
const LSN_OFST: usize = 1;
const CRC_OFST: usize = 9;

/// Page type tags. Each tag is a single bit so callers can pass a mask of
/// acceptable kinds when fetching a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageKind {
    Root = 0x01,
    Tombstone = 0x02,
    VarHash = 0x04,
    Var = 0x08,
    VarTail = 0x10,
    InnerNode = 0x20,
    DataList = 0x40,
}

impl PageKind {
    pub const ANY: u8 = 0x7F;

    pub fn from_tag(tag: u8) -> Option<PageKind> {
        match tag {
            0x01 => Some(PageKind::Root),
            0x02 => Some(PageKind::Tombstone),
            0x04 => Some(PageKind::VarHash),
            0x08 => Some(PageKind::Var),
            0x10 => Some(PageKind::VarTail),
            0x20 => Some(PageKind::InnerNode),
            0x40 => Some(PageKind::DataList),
            _ => None,
        }
    }

    pub fn matches(self, mask: u8) -> bool {
        (self as u8) & mask != 0
    }
}

/// A fixed-size byte block. All interpretation is done by the accessor
/// modules next to this file; `Page` itself only knows the common header.
#[derive(Debug)]
pub struct Page {
    data: Box<[u8]>,
}

impl Page {
    pub fn new_zeroed() -> Self {
        Self {
            data: vec![0u8; PAGE_SIZE].into_boxed_slice(),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        debug_assert_eq!(bytes.len(), PAGE_SIZE);
        Self {
            data: bytes.to_vec().into_boxed_slice(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn kind(&self) -> Result<PageKind> {
        PageKind::from_tag(self.data[TYPE_OFST]).ok_or_else(|| {
            Error::new(
                ErrorKind::Corrupt,
                &format!("unknown page type tag {:#04x}", self.data[TYPE_OFST]),
            )
        })
    }

    pub fn set_kind(&mut self, kind: PageKind) {
        self.data[TYPE_OFST] = kind as u8;
    }

    /// Check the tag against a mask of acceptable kinds.
    pub fn expect_kind(&self, mask: u8) -> Result<PageKind> {
        let kind = self.kind()?;
        if !kind.matches(mask) {
            return Err(Error::new(
                ErrorKind::Corrupt,
                &format!("expected page kind mask {:#04x}, got {:?}", mask, kind),
            ));
        }
        Ok(kind)
    }

    pub fn page_lsn(&self) -> Lsn {
        get_u64(&self.data, LSN_OFST)
    }

    pub fn set_page_lsn(&mut self, lsn: Lsn) {
        put_u64(&mut self.data, LSN_OFST, lsn);
    }

    pub fn checksum(&self) -> u32 {
        get_u32(&self.data, CRC_OFST)
    }

    fn compute_checksum(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.data[..CRC_OFST]);
        hasher.update(&[0u8; 4]);
        hasher.update(&self.data[PG_HDR_END..]);
        hasher.finalize()
    }

    pub fn refresh_checksum(&mut self) {
        let crc = self.compute_checksum();
        put_u32(&mut self.data, CRC_OFST, crc);
    }

    pub fn verify_checksum(&self) -> Result<()> {
        let stored = self.checksum();
        let actual = self.compute_checksum();
        if stored != actual {
            return Err(Error::new(
                ErrorKind::Corrupt,
                &format!(
                    "page checksum mismatch: stored {:#010x}, actual {:#010x}",
                    stored, actual
                ),
            ));
        }
        Ok(())
    }
}

impl Clone for Page {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_round_trip() {
        let mut p = Page::new_zeroed();
        p.set_kind(PageKind::DataList);
        p.set_page_lsn(1234);

        assert_eq!(p.kind().unwrap(), PageKind::DataList);
        assert_eq!(p.page_lsn(), 1234);
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let mut p = Page::new_zeroed();
        p.set_kind(PageKind::InnerNode);
        p.refresh_checksum();
        p.verify_checksum().unwrap();

        p.bytes_mut()[2048] ^= 0xFF;
        assert_eq!(
            p.verify_checksum().unwrap_err().kind(),
            ErrorKind::Corrupt
        );
    }

    #[test]
    fn test_kind_mask() {
        let mut p = Page::new_zeroed();
        p.set_kind(PageKind::InnerNode);

        let mask = PageKind::InnerNode as u8 | PageKind::DataList as u8;
        assert!(p.expect_kind(mask).is_ok());
        assert!(p.expect_kind(PageKind::Root as u8).is_err());
    }

    #[test]
    fn test_unknown_tag_is_corrupt() {
        let mut p = Page::new_zeroed();
        p.bytes_mut()[0] = 0x33;
        assert_eq!(p.kind().unwrap_err().kind(), ErrorKind::Corrupt);
    }
}
