use crate::{
    error::Result,
    lock::LockMode,
    storage::{
        page::{data_list, PageKind},
        NULL_PGNO,
    },
};

use super::{
    cursor::{CursorState, RptCursor},
    rebalance::LeafEvent,
};

const LEAF_MASK: u8 = PageKind::DataList as u8;

impl<'a> RptCursor<'a> {
    /// Insert `src` at the seeked position, pushing the existing tail of
    /// the current leaf to the right. `max_write` bounds the bytes taken
    /// from `src` (0 = no bound). Completes with a rebalance pass and
    /// leaves the cursor unseeked. Returns the bytes written.
    pub fn insert(&mut self, src: &[u8], max_write: u64) -> Result<u64> {
        self.expect_state(CursorState::Seeked)?;
        self.lock_tree(LockMode::Exclusive)?;

        let tx = self.tx;
        self.pager.make_writable(&tx, &mut self.cur)?;
        self.state = CursorState::DlInserting;

        // Save the tail after the insertion point; it is re-appended
        // once the source is consumed.
        let used = data_list::used(&self.cur.ro());
        debug_assert!(self.lidx <= used);
        let tail: Vec<u8> =
            data_list::read_at(&self.cur.ro(), self.lidx, used - self.lidx).to_vec();
        data_list::set_used(self.cur.rw(), self.lidx);
        let orig_next = data_list::next(&self.cur.ro());

        let mut events = vec![LeafEvent {
            pg: self.cur.pgno(),
            new: false,
            removed: false,
        }];

        let written = self.insert_pump(src, max_write, &mut events)?;
        self.insert_pump(&tail, 0, &mut events)?;

        // Relink the chain to the original right neighbor.
        if data_list::next(&self.cur.ro()) != orig_next {
            data_list::set_next(self.cur.rw(), orig_next);
            if orig_next != NULL_PGNO {
                let mut nh = self.pager.get_writable(&tx, LEAF_MASK, orig_next)?;
                data_list::set_prev(nh.rw(), self.cur.pgno());
                self.pager.release(nh)?;
            }
        }

        self.total_size += written;

        let cur = self.cur.take();
        self.pager.release(cur)?;

        self.finish_leaf_level(events)?;
        Ok(written)
    }

    /// Append bytes at the cursor, allocating and linking new right
    /// siblings whenever the current leaf fills up.
    fn insert_pump(
        &mut self,
        bytes: &[u8],
        limit: u64,
        events: &mut Vec<LeafEvent>,
    ) -> Result<u64> {
        let tx = self.tx;
        let mut consumed = 0usize;
        let mut written = 0u64;

        loop {
            let avail = data_list::avail(&self.cur.ro());
            let mut n = avail.min(bytes.len() - consumed);
            if limit > 0 {
                n = n.min((limit - written) as usize);
            }

            if n == 0 {
                if consumed == bytes.len() || (limit > 0 && written == limit) {
                    break;
                }
                // The leaf is full and there is more to write: advance
                // into a fresh right sibling.
                let mut new = self.pager.new_page(&tx, PageKind::DataList)?;
                data_list::set_prev(new.rw(), self.cur.pgno());
                data_list::set_next(self.cur.rw(), new.pgno());

                let old = std::mem::replace(&mut self.cur, new);
                self.pager.release(old)?;
                events.push(LeafEvent {
                    pg: self.cur.pgno(),
                    new: true,
                    removed: false,
                });
                self.lidx = 0;
                continue;
            }

            data_list::append(self.cur.rw(), &bytes[consumed..consumed + n]);
            consumed += n;
            written += n as u64;
            self.lidx += n;
            self.gidx += n as u64;
        }

        Ok(written)
    }
}
