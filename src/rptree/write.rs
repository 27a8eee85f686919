use crate::{
    error::{Error, ErrorKind, Result},
    lock::LockMode,
    storage::{
        page::{data_list, PageKind},
        pager::HandleMode,
        NULL_PGNO,
    },
};

use super::cursor::{CursorState, RptCursor};

const LEAF_MASK: u8 = PageKind::DataList as u8;

impl<'a> RptCursor<'a> {
    /// Overwrite existing elements in place from the seeked position:
    /// every `stride`-th element of `bsize` bytes is replaced from `src`.
    /// The variable's size never changes, so no rebalancing happens; the
    /// walk stops at the end of the data. `max_write` bounds the bytes
    /// taken from `src` (0 = no bound). Returns elements written.
    pub fn write(&mut self, src: &[u8], max_write: u64, bsize: usize, stride: u32) -> Result<u64> {
        if bsize == 0 || stride == 0 {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                "write requires a positive element size and stride",
            ));
        }
        if self.state == CursorState::Unseeked && self.root == NULL_PGNO {
            return Ok(0);
        }
        self.expect_state(CursorState::Seeked)?;
        self.lock_tree(LockMode::Exclusive)?;

        let tx = self.tx;
        let mut bnext = bsize;
        let mut active = true;
        let mut consumed = 0usize;

        loop {
            if consumed == src.len() || (max_write > 0 && consumed as u64 == max_write) {
                break;
            }

            let used = data_list::used(&self.cur.ro());
            let mut n = (used - self.lidx).min(bnext);
            if active {
                n = n.min(src.len() - consumed);
                if max_write > 0 {
                    n = n.min((max_write - consumed as u64) as usize);
                }
            }

            if n == 0 {
                if self.lidx >= used {
                    let next = data_list::next(&self.cur.ro());
                    if next == NULL_PGNO {
                        break;
                    }
                    let old = self.cur.take();
                    self.pager.release(old)?;
                    self.cur = self.pager.get(LEAF_MASK, next)?;
                    self.lidx = 0;
                    continue;
                }
                break;
            }

            if active {
                // Pages are staged lazily: only leaves that actually get
                // bytes written see an UPDATE record.
                if self.cur.mode() != HandleMode::X {
                    self.pager.make_writable(&tx, &mut self.cur)?;
                }
                data_list::write_at(self.cur.rw(), self.lidx, &src[consumed..consumed + n]);
                consumed += n;
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

        let cur = self.cur.take();
        self.pager.release(cur)?;
        self.unseek();

        if consumed % bsize != 0 {
            return Err(Error::new(
                ErrorKind::Corrupt,
                &format!(
                    "wrote {} bytes but element size is {}, incomplete element indicates corruption",
                    consumed, bsize
                ),
            ));
        }
        Ok((consumed / bsize) as u64)
    }
}
