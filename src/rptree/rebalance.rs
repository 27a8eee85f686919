//! Rebalancing moves one node per step: leaf-level changes are reduced to
//! an ordered update list of `(page, subtree byte count)` entries, then
//! applied to each ancestor level in turn while walking the inner-node
//! sibling chain. Splits, borrows and merges at one level emit the update
//! list for the next.

use crate::{
    error::{Error, ErrorKind, Result},
    storage::{
        page::{
            data_list,
            inner_node::{self, IN_MAX_KEYS, IN_MIN_KEYS},
            PageKind,
        },
        pager::PageHandle,
        Pgno, NULL_PGNO,
    },
};

use super::cursor::{CursorState, RptCursor, SeekFrame};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChangeKind {
    /// The child's subtree byte count changed.
    Set(u64),
    /// A new child to splice in right after the previously located one.
    Insert(u64),
    /// The child page was merged away.
    Remove,
}

/// One entry of a level's update list, ordered left to right.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Change {
    pub pg: Pgno,
    pub kind: ChangeKind,
}

/// Leaf pages touched by an insert or remove, in chain order.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LeafEvent {
    pub pg: Pgno,
    pub new: bool,
    pub removed: bool,
}

struct NodeRec {
    pg: Pgno,
    new: bool,
    removed: bool,
}

const LEAF_MASK: u8 = PageKind::DataList as u8;
const INNER_MASK: u8 = PageKind::InnerNode as u8;

impl<'a> RptCursor<'a> {
    /// Close out a mutating leaf operation: fix leaf underflow, then push
    /// the update list up the ancestor stack.
    pub(crate) fn finish_leaf_level(&mut self, mut events: Vec<LeafEvent>) -> Result<()> {
        self.state = CursorState::InRebalancing;

        self.rebalance_leaves(&mut events)?;

        let mut changes = Vec::with_capacity(events.len());
        for ev in events {
            if ev.removed {
                if !ev.new {
                    changes.push(Change {
                        pg: ev.pg,
                        kind: ChangeKind::Remove,
                    });
                }
                continue;
            }
            let h = self.pager.get(LEAF_MASK, ev.pg)?;
            let used = data_list::used(&h.ro()) as u64;
            drop(h);
            changes.push(Change {
                pg: ev.pg,
                kind: if ev.new {
                    ChangeKind::Insert(used)
                } else {
                    ChangeKind::Set(used)
                },
            });
        }

        self.propagate(changes)
    }

    /// Bring every surviving leaf of the operation back above the
    /// minimum fill by borrowing from or merging with its right
    /// neighbor. The tree's last leaf is exempt.
    fn rebalance_leaves(&mut self, events: &mut Vec<LeafEvent>) -> Result<()> {
        let tx = self.tx;
        let mut i = 0;

        while i < events.len() {
            if events[i].removed {
                i += 1;
                continue;
            }
            let pg = events[i].pg;

            let mut h = self.pager.get(LEAF_MASK, pg)?;
            let used = data_list::used(&h.ro());
            if used >= data_list::DL_MIN_FILL {
                i += 1;
                continue;
            }

            let right = data_list::next(&h.ro());
            if right == NULL_PGNO {
                // The tree's last leaf may run light.
                i += 1;
                continue;
            }

            let mut rn = self.pager.get_writable(&tx, LEAF_MASK, right)?;
            let r_used = data_list::used(&rn.ro());

            if used + r_used >= 2 * data_list::DL_MIN_FILL {
                // Borrow: pull the right neighbor's head until both
                // sides hold half of the combined bytes.
                let take = (used + r_used) / 2 - used;
                self.pager.make_writable(&tx, &mut h)?;
                data_list::copy_between(h.rw(), &rn.ro(), used, 0, take);
                data_list::shift_within(rn.rw(), 0, take, r_used - take);
                data_list::set_used(rn.rw(), r_used - take);
                self.pager.release(h)?;
                self.pager.release(rn)?;

                if !events.iter().any(|e| e.pg == right) {
                    events.push(LeafEvent {
                        pg: right,
                        new: false,
                        removed: false,
                    });
                }
                i += 1;
            } else {
                // Merge the right neighbor in and tombstone it. The
                // combined leaf may still be light; the next round of
                // the loop keeps working on it.
                self.pager.make_writable(&tx, &mut h)?;
                data_list::copy_between(h.rw(), &rn.ro(), used, 0, r_used);

                let rnext = data_list::next(&rn.ro());
                data_list::set_next(h.rw(), rnext);
                if rnext != NULL_PGNO {
                    let mut nh = self.pager.get_writable(&tx, LEAF_MASK, rnext)?;
                    data_list::set_prev(nh.rw(), pg);
                    self.pager.release(nh)?;
                }
                self.pager.release(h)?;
                self.pager.delete_and_release(&tx, rn)?;

                match events.iter_mut().find(|e| e.pg == right) {
                    Some(ev) => ev.removed = true,
                    None => events.push(LeafEvent {
                        pg: right,
                        new: false,
                        removed: true,
                    }),
                }
            }
        }
        Ok(())
    }

    /// Drive the update list level by level to the root, then resolve
    /// root growth or collapse.
    pub(crate) fn propagate(&mut self, mut changes: Vec<Change>) -> Result<()> {
        while let Some(frame) = self.stack.pop() {
            changes = self.apply_level(frame, changes)?;
        }

        // The update list now describes the root's replacement entries.
        changes.retain(|c| c.kind != ChangeKind::Remove);
        if changes.is_empty() {
            return Err(Error::new(
                ErrorKind::Corrupt,
                "rope tree root vanished during rebalance",
            ));
        }

        // Root split: stack new inner levels until one node spans
        // everything.
        while changes.len() > 1 {
            let tx = self.tx;
            let mut next_changes = Vec::new();
            let mut level: Vec<PageHandle> = Vec::new();

            // Spread the entries evenly so no node of the new level
            // starts below the minimum.
            let nnodes = (changes.len() + IN_MAX_KEYS - 1) / IN_MAX_KEYS;
            let per_node = (changes.len() + nnodes - 1) / nnodes;

            for chunk in changes.chunks(per_node) {
                let mut node = self.pager.new_page(&tx, PageKind::InnerNode)?;
                for c in chunk {
                    let count = match c.kind {
                        ChangeKind::Set(n) | ChangeKind::Insert(n) => n,
                        ChangeKind::Remove => continue,
                    };
                    inner_node::push_entry(node.rw(), c.pg, count);
                }
                next_changes.push(Change {
                    pg: node.pgno(),
                    kind: ChangeKind::Insert(inner_node::total_size(&node.ro())),
                });
                level.push(node);
            }

            // Chain the freshly built level left to right.
            for i in 0..level.len() {
                if i > 0 {
                    let prev_pg = level[i - 1].pgno();
                    inner_node::set_prev(level[i].rw(), prev_pg);
                }
                if i + 1 < level.len() {
                    let next_pg = level[i + 1].pgno();
                    inner_node::set_next(level[i].rw(), next_pg);
                }
            }
            for node in level {
                self.pager.release(node)?;
            }
            changes = next_changes;
        }
        self.root = changes[0].pg;

        // Root collapse: a root inner node with a single child hands the
        // root role to that child.
        loop {
            let h = self
                .pager
                .get(INNER_MASK | LEAF_MASK, self.root)?;
            let kind = h.ro().kind()?;
            if kind != PageKind::InnerNode || inner_node::nkeys(&h.ro()) != 1 {
                drop(h);
                break;
            }
            let child = inner_node::child(&h.ro(), 0);
            let tx = self.tx;
            self.pager.delete_and_release(&tx, h)?;
            self.root = child;
        }

        self.stack.clear();
        self.state = CursorState::Unseeked;
        Ok(())
    }

    /// Apply one level's update list to the inner nodes of that level,
    /// walking rightward along sibling links (with at most one step left
    /// of the seek path, for a borrowed-from left neighbor). Returns the
    /// update list for the next level up.
    fn apply_level(&mut self, frame: SeekFrame, changes: Vec<Change>) -> Result<Vec<Change>> {
        let tx = self.tx;
        let mut recs: Vec<NodeRec> = vec![NodeRec {
            pg: frame.pgno,
            new: false,
            removed: false,
        }];
        let mut node = self.pager.get(INNER_MASK, frame.pgno)?;
        // Split-born siblings still to visit, leftmost first.
        let mut pending: Vec<PageHandle> = Vec::new();
        let mut pos: usize = 0;
        let mut first_change = true;

        for change in changes {
            match change.kind {
                ChangeKind::Set(count) => {
                    pos = self.locate(
                        &mut node,
                        &mut pending,
                        &mut recs,
                        &mut pos,
                        change.pg,
                        first_change,
                    )?;
                    self.pager.make_writable(&tx, &mut node)?;
                    inner_node::set_key(node.rw(), pos, count);
                    pos += 1;
                }
                ChangeKind::Remove => {
                    pos = self.locate(
                        &mut node,
                        &mut pending,
                        &mut recs,
                        &mut pos,
                        change.pg,
                        first_change,
                    )?;
                    self.pager.make_writable(&tx, &mut node)?;
                    inner_node::remove_entry(node.rw(), pos);
                }
                ChangeKind::Insert(count) => {
                    if inner_node::is_full(&node.ro()) {
                        self.split_node(&mut node, &mut pending, &mut recs)?;
                        let n_now = inner_node::nkeys(&node.ro());
                        if pos > n_now {
                            pos -= n_now;
                            self.advance(&mut node, &mut pending, &mut recs)?;
                        }
                    }
                    self.pager.make_writable(&tx, &mut node)?;
                    inner_node::insert_entry(node.rw(), pos, change.pg, count);
                    pos += 1;
                }
            }
            first_change = false;
        }

        self.pager.release(node)?;
        for h in pending {
            self.pager.release(h)?;
        }

        self.fix_inner_underflow(&mut recs)?;

        let mut out = Vec::with_capacity(recs.len());
        for rec in recs {
            if rec.removed {
                if !rec.new {
                    out.push(Change {
                        pg: rec.pg,
                        kind: ChangeKind::Remove,
                    });
                }
                continue;
            }
            let h = self.pager.get(INNER_MASK, rec.pg)?;
            let total = inner_node::total_size(&h.ro());
            drop(h);
            out.push(Change {
                pg: rec.pg,
                kind: if rec.new {
                    ChangeKind::Insert(total)
                } else {
                    ChangeKind::Set(total)
                },
            });
        }
        Ok(out)
    }

    /// Find `pg` among the children of the current node, walking right
    /// (or, for the very first change, one node left) as needed. Returns
    /// the child index; the walk state is updated in place.
    fn locate(
        &mut self,
        node: &mut PageHandle,
        pending: &mut Vec<PageHandle>,
        recs: &mut Vec<NodeRec>,
        pos: &mut usize,
        pg: Pgno,
        first_change: bool,
    ) -> Result<usize> {
        // The first change may refer to the leaf's left neighbor, which
        // can live under the parent's left sibling.
        if first_change {
            if let Some(i) = inner_node::find_child(&node.ro(), pg, 0) {
                return Ok(i);
            }
            let prev = inner_node::prev(&node.ro());
            if prev != NULL_PGNO {
                let pnode = self.pager.get(INNER_MASK, prev)?;
                let found = inner_node::find_child(&pnode.ro(), pg, 0);
                if let Some(i) = found {
                    recs.insert(
                        0,
                        NodeRec {
                            pg: prev,
                            new: false,
                            removed: false,
                        },
                    );
                    let old = std::mem::replace(node, pnode);
                    pending.insert(0, old);
                    *pos = 0;
                    return Ok(i);
                }
            }
            return Err(Error::new(
                ErrorKind::Corrupt,
                &format!("child {} not found under its recorded parent", pg),
            ));
        }

        let mut hops = 0;
        loop {
            if let Some(i) = inner_node::find_child(&node.ro(), pg, *pos) {
                return Ok(i);
            }
            self.advance(node, pending, recs)?;
            *pos = 0;
            hops += 1;
            if hops > 64 {
                return Err(Error::new(
                    ErrorKind::Corrupt,
                    &format!("child {} not found walking the level", pg),
                ));
            }
        }
    }

    /// Move the walk one node right: into the first pending split
    /// sibling, or the on-disk next sibling.
    fn advance(
        &mut self,
        node: &mut PageHandle,
        pending: &mut Vec<PageHandle>,
        recs: &mut Vec<NodeRec>,
    ) -> Result<()> {
        let next = if !pending.is_empty() {
            pending.remove(0)
        } else {
            let next_pg = inner_node::next(&node.ro());
            if next_pg == NULL_PGNO {
                return Err(Error::new(
                    ErrorKind::Corrupt,
                    "level walk ran off the right edge",
                ));
            }
            self.pager.get(INNER_MASK, next_pg)?
        };

        if !recs.iter().any(|r| r.pg == next.pgno()) {
            recs.push(NodeRec {
                pg: next.pgno(),
                new: false,
                removed: false,
            });
        }

        let old = std::mem::replace(node, next);
        self.pager.release(old)?;
        Ok(())
    }

    /// Split a full inner node: a new right sibling takes the tail half.
    fn split_node(
        &mut self,
        node: &mut PageHandle,
        pending: &mut Vec<PageHandle>,
        recs: &mut Vec<NodeRec>,
    ) -> Result<()> {
        let tx = self.tx;
        let mut right = self.pager.new_page(&tx, PageKind::InnerNode)?;

        self.pager.make_writable(&tx, node)?;
        inner_node::move_right(node.rw(), right.rw(), IN_MAX_KEYS / 2);

        let old_next = inner_node::next(&node.ro());
        inner_node::set_next(node.rw(), right.pgno());
        inner_node::set_prev(right.rw(), node.pgno());
        inner_node::set_next(right.rw(), old_next);

        if old_next != NULL_PGNO {
            // The old neighbor may be a split sibling we still hold.
            if let Some(h) = pending.iter_mut().find(|h| h.pgno() == old_next) {
                self.pager.make_writable(&tx, h)?;
                inner_node::set_prev(h.rw(), right.pgno());
            } else {
                let mut nh = self.pager.get_writable(&tx, INNER_MASK, old_next)?;
                inner_node::set_prev(nh.rw(), right.pgno());
                self.pager.release(nh)?;
            }
        }

        // The new sibling sits immediately after the current node, ahead
        // of rights from earlier splits.
        let at = recs
            .iter()
            .position(|r| r.pg == node.pgno())
            .map(|i| i + 1)
            .unwrap_or(recs.len());
        recs.insert(
            at,
            NodeRec {
                pg: right.pgno(),
                new: true,
                removed: false,
            },
        );
        pending.insert(0, right);
        Ok(())
    }

    /// After a level's updates are in place, fix nodes that fell below
    /// the minimum: borrow from or merge with the right sibling. The
    /// rightmost node of a level and the root are exempt.
    fn fix_inner_underflow(&mut self, recs: &mut Vec<NodeRec>) -> Result<()> {
        let tx = self.tx;
        let pgs: Vec<Pgno> = recs.iter().filter(|r| !r.removed).map(|r| r.pg).collect();

        for pg in pgs {
            if recs.iter().any(|r| r.pg == pg && r.removed) {
                continue;
            }
            let mut h = self.pager.get(INNER_MASK, pg)?;
            let n = inner_node::nkeys(&h.ro());

            if n == 0 {
                // Emptied entirely: unlink and tombstone.
                let prev = inner_node::prev(&h.ro());
                let next = inner_node::next(&h.ro());
                if prev != NULL_PGNO {
                    let mut ph = self.pager.get_writable(&tx, INNER_MASK, prev)?;
                    inner_node::set_next(ph.rw(), next);
                    self.pager.release(ph)?;
                }
                if next != NULL_PGNO {
                    let mut nh = self.pager.get_writable(&tx, INNER_MASK, next)?;
                    inner_node::set_prev(nh.rw(), prev);
                    self.pager.release(nh)?;
                }
                self.pager.delete_and_release(&tx, h)?;
                mark_removed(recs, pg);
                continue;
            }

            if n >= IN_MIN_KEYS {
                continue;
            }
            let right = inner_node::next(&h.ro());
            if right != NULL_PGNO {
                let mut rn = self.pager.get_writable(&tx, INNER_MASK, right)?;
                let rn_n = inner_node::nkeys(&rn.ro());

                if n + rn_n >= 2 * IN_MIN_KEYS {
                    let take = (n + rn_n) / 2 - n;
                    self.pager.make_writable(&tx, &mut h)?;
                    inner_node::move_left(h.rw(), rn.rw(), take);
                    self.pager.release(h)?;
                    self.pager.release(rn)?;
                    ensure_rec(recs, right);
                } else if n + rn_n <= IN_MAX_KEYS {
                    self.pager.make_writable(&tx, &mut h)?;
                    inner_node::move_left(h.rw(), rn.rw(), rn_n);

                    let rnext = inner_node::next(&rn.ro());
                    inner_node::set_next(h.rw(), rnext);
                    if rnext != NULL_PGNO {
                        let mut nh = self.pager.get_writable(&tx, INNER_MASK, rnext)?;
                        inner_node::set_prev(nh.rw(), pg);
                        self.pager.release(nh)?;
                    }
                    self.pager.release(h)?;
                    self.pager.delete_and_release(&tx, rn)?;

                    ensure_rec(recs, right);
                    mark_removed(recs, right);
                }
                continue;
            }

            // Rightmost node of its level: lean on the left sibling.
            let left = inner_node::prev(&h.ro());
            if left == NULL_PGNO {
                // Alone at this level, which makes it the root; exempt.
                continue;
            }
            let mut ln = self.pager.get_writable(&tx, INNER_MASK, left)?;
            let ln_n = inner_node::nkeys(&ln.ro());

            let at = recs.iter().position(|r| r.pg == pg).unwrap_or(0);
            if n + ln_n >= 2 * IN_MIN_KEYS {
                let take = (n + ln_n) / 2 - n;
                self.pager.make_writable(&tx, &mut h)?;
                inner_node::move_right(ln.rw(), h.rw(), take);
                self.pager.release(h)?;
                self.pager.release(ln)?;
                if !recs.iter().any(|r| r.pg == left) {
                    recs.insert(
                        at,
                        NodeRec {
                            pg: left,
                            new: false,
                            removed: false,
                        },
                    );
                }
            } else if n + ln_n <= IN_MAX_KEYS {
                self.pager.make_writable(&tx, &mut h)?;
                inner_node::move_left(ln.rw(), h.rw(), n);
                inner_node::set_next(ln.rw(), NULL_PGNO);
                self.pager.release(ln)?;
                self.pager.delete_and_release(&tx, h)?;

                if !recs.iter().any(|r| r.pg == left) {
                    recs.insert(
                        at,
                        NodeRec {
                            pg: left,
                            new: false,
                            removed: false,
                        },
                    );
                }
                ensure_rec(recs, pg);
                mark_removed(recs, pg);
            }
        }
        Ok(())
    }
}

fn ensure_rec(recs: &mut Vec<NodeRec>, pg: Pgno) {
    if !recs.iter().any(|r| r.pg == pg) {
        recs.push(NodeRec {
            pg,
            new: false,
            removed: false,
        });
    }
}

fn mark_removed(recs: &mut Vec<NodeRec>, pg: Pgno) {
    if let Some(r) = recs.iter_mut().find(|r| r.pg == pg) {
        r.removed = true;
    }
}
