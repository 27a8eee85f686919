use crate::{
    error::{Error, ErrorKind, Result},
    lock::LockMode,
    storage::{
        page::{data_list, data_list::DL_DATA_SIZE, PageKind},
        pager::PageHandle,
        NULL_PGNO,
    },
};

use super::{
    cursor::{CursorState, RptCursor},
    rebalance::LeafEvent,
};

const LEAF_MASK: u8 = PageKind::DataList as u8;

impl<'a> RptCursor<'a> {
    /// Remove up to `max_remove` elements of `bsize` bytes from the
    /// seeked position, taking every `stride`-th element and shifting the
    /// skipped ones down. Removed bytes are copied into `dest` when one
    /// is given. `max_remove == 0` removes to the end. Completes with a
    /// rebalance pass; returns the number of elements removed.
    ///
    /// Two pointers walk the leaf chain: the write side (`cur`, `wpos`)
    /// compacts kept bytes, the read side (`rpage`, `rpos`) consumes.
    /// Fully consumed read pages are tombstoned on the way.
    pub fn remove(
        &mut self,
        mut dest: Option<&mut Vec<u8>>,
        max_remove: u64,
        bsize: usize,
        stride: u32,
    ) -> Result<u64> {
        if bsize == 0 || stride == 0 {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                "remove requires a positive element size and stride",
            ));
        }
        if self.state == CursorState::Unseeked && self.root == NULL_PGNO {
            return Ok(0);
        }
        self.expect_state(CursorState::Seeked)?;
        self.lock_tree(LockMode::Exclusive)?;

        let tx = self.tx;
        self.pager.make_writable(&tx, &mut self.cur)?;
        self.state = CursorState::DlRemoving;

        let max_bytes = max_remove
            .checked_mul(bsize as u64)
            .ok_or_else(|| Error::new(ErrorKind::Arith, "remove size overflow"))?;

        let mut events = vec![LeafEvent {
            pg: self.cur.pgno(),
            new: false,
            removed: false,
        }];

        let mut wpos = self.lidx;
        // An unowned rpage means the read side is still inside `cur`.
        let mut rpage = PageHandle::none();
        let mut rpos = self.lidx;
        let mut bnext = bsize;
        let mut removing = true;
        let mut removed = 0u64;
        let mut drained = false;

        loop {
            if max_bytes > 0 && removed == max_bytes {
                break;
            }

            let same = rpage.is_none();
            let r_used = if same {
                data_list::used(&self.cur.ro())
            } else {
                data_list::used(&rpage.ro())
            };
            let src_avail = r_used - rpos;

            let mut n = bnext.min(src_avail);
            if removing {
                if max_bytes > 0 {
                    n = n.min((max_bytes - removed) as usize);
                }
            } else {
                n = n.min(DL_DATA_SIZE - wpos);
            }

            if n == 0 {
                if src_avail == 0 {
                    // Read side exhausted its page.
                    let next = if same {
                        data_list::next(&self.cur.ro())
                    } else {
                        data_list::next(&rpage.ro())
                    };
                    if !same {
                        // Everything in it was consumed or shifted out.
                        let dead = rpage.take();
                        let dead_pg = dead.pgno();
                        self.pager.delete_and_release(&tx, dead)?;
                        events.push(LeafEvent {
                            pg: dead_pg,
                            new: false,
                            removed: true,
                        });
                    }
                    if next == NULL_PGNO {
                        data_list::set_used(self.cur.rw(), wpos);
                        data_list::set_next(self.cur.rw(), NULL_PGNO);
                        drained = true;
                        break;
                    }
                    rpage = self.pager.get_writable(&tx, LEAF_MASK, next)?;
                    rpos = 0;
                    continue;
                }

                // The write page is full while shifting kept bytes: hand
                // the write role over to the read page.
                debug_assert!(!removing);
                debug_assert!(!same);
                data_list::set_used(self.cur.rw(), wpos);
                data_list::set_next(self.cur.rw(), rpage.pgno());
                data_list::set_prev(rpage.rw(), self.cur.pgno());
                let old = std::mem::replace(&mut self.cur, rpage.take());
                self.pager.release(old)?;
                if !events.iter().any(|e| e.pg == self.cur.pgno()) {
                    events.push(LeafEvent {
                        pg: self.cur.pgno(),
                        new: false,
                        removed: false,
                    });
                }
                wpos = 0;
                continue;
            }

            if removing {
                if let Some(d) = dest.as_mut() {
                    if same {
                        d.extend_from_slice(data_list::read_at(&self.cur.ro(), rpos, n));
                    } else {
                        d.extend_from_slice(data_list::read_at(&rpage.ro(), rpos, n));
                    }
                }
                rpos += n;
                removed += n as u64;
            } else {
                if same {
                    if wpos != rpos {
                        data_list::shift_within(self.cur.rw(), wpos, rpos, n);
                    }
                } else {
                    data_list::copy_between(self.cur.rw(), &rpage.ro(), wpos, rpos, n);
                }
                wpos += n;
                rpos += n;
            }
            bnext -= n;

            if bnext == 0 {
                if removing {
                    bnext = (stride as usize - 1) * bsize;
                    removing = false;
                }
                if bnext == 0 {
                    bnext = bsize;
                    removing = true;
                }
            }
        }

        // Drain: the kept remainder of the read side joins the write
        // side, by merge when it fits, by compaction otherwise.
        if !drained {
            if rpage.is_none() {
                let used = data_list::used(&self.cur.ro());
                let rem = used - rpos;
                if wpos != rpos {
                    if rem > 0 {
                        data_list::shift_within(self.cur.rw(), wpos, rpos, rem);
                    }
                    data_list::set_used(self.cur.rw(), wpos + rem);
                }
            } else {
                let r_used = data_list::used(&rpage.ro());
                let rem = r_used - rpos;
                let cap = DL_DATA_SIZE - wpos;
                if rem <= cap {
                    if rem > 0 {
                        data_list::copy_between(self.cur.rw(), &rpage.ro(), wpos, rpos, rem);
                    }
                    data_list::set_used(self.cur.rw(), wpos + rem);

                    let rnext = data_list::next(&rpage.ro());
                    data_list::set_next(self.cur.rw(), rnext);
                    if rnext != NULL_PGNO {
                        let mut nh = self.pager.get_writable(&tx, LEAF_MASK, rnext)?;
                        data_list::set_prev(nh.rw(), self.cur.pgno());
                        self.pager.release(nh)?;
                    }
                    let dead = rpage.take();
                    let dead_pg = dead.pgno();
                    self.pager.delete_and_release(&tx, dead)?;
                    events.push(LeafEvent {
                        pg: dead_pg,
                        new: false,
                        removed: true,
                    });
                } else {
                    data_list::set_used(self.cur.rw(), wpos);
                    data_list::set_next(self.cur.rw(), rpage.pgno());
                    data_list::set_prev(rpage.rw(), self.cur.pgno());
                    data_list::shift_within(rpage.rw(), 0, rpos, rem);
                    data_list::set_used(rpage.rw(), rem);

                    let pg = rpage.pgno();
                    self.pager.release(rpage.take())?;
                    events.push(LeafEvent {
                        pg,
                        new: false,
                        removed: false,
                    });
                }
            }
        }

        self.total_size -= removed;

        let cur = self.cur.take();
        self.pager.release(cur)?;

        if removed % bsize as u64 != 0 {
            self.unseek();
            return Err(Error::new(
                ErrorKind::Corrupt,
                &format!(
                    "removed {} bytes but element size is {}, incomplete element indicates corruption",
                    removed, bsize
                ),
            ));
        }

        self.finish_leaf_level(events)?;
        Ok(removed / bsize as u64)
    }
}
