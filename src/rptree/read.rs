use crate::{
    error::{Error, ErrorKind, Result},
    lock::LockMode,
    storage::{
        page::{data_list, PageKind},
        NULL_PGNO,
    },
};

use super::cursor::{CursorState, RptCursor};

const LEAF_MASK: u8 = PageKind::DataList as u8;

impl<'a> RptCursor<'a> {
    /// Read up to `max_nread` elements of `bsize` bytes into `dest`,
    /// taking every `stride`-th element (`stride == 1` reads densely).
    /// `max_nread == 0` reads to the end. Leaves the cursor unseeked and
    /// returns the number of elements read.
    pub fn read(
        &mut self,
        dest: &mut Vec<u8>,
        max_nread: u64,
        bsize: usize,
        stride: u32,
    ) -> Result<u64> {
        if bsize == 0 || stride == 0 {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                "read requires a positive element size and stride",
            ));
        }
        if self.state == CursorState::Unseeked && self.root == NULL_PGNO {
            return Ok(0);
        }
        self.expect_state(CursorState::Seeked)?;
        self.lock_tree(LockMode::Shared)?;
        self.state = CursorState::DlReading;

        let max_bytes = max_nread
            .checked_mul(bsize as u64)
            .ok_or_else(|| Error::new(ErrorKind::Arith, "read size overflow"))?;

        let mut bnext = bsize;
        let mut active = true;
        let mut total = 0u64;

        loop {
            if max_bytes > 0 && total == max_bytes {
                break;
            }

            let used = data_list::used(&self.cur.ro());
            let mut n = (used - self.lidx).min(bnext);
            if active && max_bytes > 0 {
                n = n.min((max_bytes - total) as usize);
            }

            if n == 0 {
                if self.lidx >= used {
                    let next = data_list::next(&self.cur.ro());
                    if next == NULL_PGNO {
                        break;
                    }
                    let nh = self.pager.get(LEAF_MASK, next)?;
                    drop(self.cur.take());
                    self.cur = nh;
                    self.lidx = 0;
                    continue;
                }
                break;
            }

            if active {
                dest.extend_from_slice(data_list::read_at(&self.cur.ro(), self.lidx, n));
                total += n as u64;
            }
            self.lidx += n;
            self.gidx += n as u64;
            bnext -= n;

            if bnext == 0 {
                if active {
                    bnext = (stride as usize - 1) * bsize;
                    active = false;
                }
                if bnext == 0 {
                    bnext = bsize;
                    active = true;
                }
            }
        }

        self.unseek();

        if total % bsize as u64 != 0 {
            return Err(Error::new(
                ErrorKind::Corrupt,
                &format!(
                    "read {} bytes but element size is {}, incomplete element indicates corruption",
                    total, bsize
                ),
            ));
        }
        Ok(total / bsize as u64)
    }
}
