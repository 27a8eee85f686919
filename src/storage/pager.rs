use std::{
    collections::BinaryHeap,
    ops::Deref,
    path::Path,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, RwLockReadGuard,
    },
};

use log::{debug, info};

use crate::{
    error::{Error, ErrorKind, Result},
    lock::{LockKind, LockMode, LockTable},
    storage::{
        buffer_pool::{BufferPool, Frame, DEFAULT_POOL_SIZE},
        dirty_page_table::DirtyPageTable,
        file_pager::FilePager,
        page::{root_page, tombstone_page, Page, PageKind},
        txn_table::{Txn, TxnState, TxnTable},
        wal::{Wal, WalRecord},
        Lsn, Pgno, Tid, NULL_LSN, NULL_PGNO,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleMode {
    None,
    S,
    X,
}

/// A read view of a handle's page: the shared frame buffer in S mode, the
/// owned shadow buffer in X mode.
pub enum PageRef<'a> {
    Guard(RwLockReadGuard<'a, Page>),
    Plain(&'a Page),
}

impl<'a> Deref for PageRef<'a> {
    type Target = Page;

    fn deref(&self) -> &Page {
        match self {
            PageRef::Guard(g) => g,
            PageRef::Plain(p) => p,
        }
    }
}

/// A shared or exclusive reference to a cached page. Ownership transfer
/// is explicit (`take` invalidates the source); dropping a handle unpins
/// its frame, discarding any unsaved shadow buffer.
pub struct PageHandle {
    mode: HandleMode,
    frame: Option<Arc<Frame>>,
    shadow: Option<Box<Page>>,
    tid: Tid,
}

impl PageHandle {
    pub fn none() -> Self {
        Self {
            mode: HandleMode::None,
            frame: None,
            shadow: None,
            tid: 0,
        }
    }

    pub fn mode(&self) -> HandleMode {
        self.mode
    }

    pub fn is_none(&self) -> bool {
        self.mode == HandleMode::None
    }

    pub fn pgno(&self) -> Pgno {
        match &self.frame {
            Some(f) => f.pgno(),
            None => NULL_PGNO,
        }
    }

    pub fn ro(&self) -> PageRef<'_> {
        match (&self.shadow, &self.frame) {
            (Some(shadow), _) => PageRef::Plain(shadow),
            (None, Some(frame)) => PageRef::Guard(frame.page()),
            _ => panic!("read through an unowned page handle"),
        }
    }

    pub fn rw(&mut self) -> &mut Page {
        debug_assert_eq!(self.mode, HandleMode::X);
        match &mut self.shadow {
            Some(shadow) => shadow,
            None => panic!("write through a non-exclusive page handle"),
        }
    }

    /// Transfer ownership out, leaving this handle unowned.
    pub fn take(&mut self) -> PageHandle {
        std::mem::replace(self, PageHandle::none())
    }
}

impl Drop for PageHandle {
    fn drop(&mut self) {
        if let Some(frame) = self.frame.take() {
            frame.unpin();
        }
    }
}

/// The pager façade: file pager, buffer pool, WAL, DPT, ATT and the lock
/// table behind one handle. There is no global instance; recovery runs
/// exactly once, inside `open`.
pub struct Pager {
    file: Mutex<FilePager>,
    pool: BufferPool,
    wal: Mutex<Wal>,
    dpt: Mutex<DirtyPageTable>,
    att: Mutex<TxnTable>,
    locks: LockTable,
    next_tid: AtomicU64,
}

impl Pager {
    pub fn open<P: AsRef<Path>>(db_path: P, wal_path: P) -> Result<Self> {
        Self::open_with(db_path, wal_path, DEFAULT_POOL_SIZE, LockTable::new())
    }

    pub fn open_with<P: AsRef<Path>>(
        db_path: P,
        wal_path: P,
        pool_size: usize,
        locks: LockTable,
    ) -> Result<Self> {
        let mut file = FilePager::open(db_path)?;

        // A brand-new database gets its root page before the WAL exists;
        // there is nothing to recover yet.
        if file.num_pages() == 0 {
            let pg = file.new_page()?;
            debug_assert_eq!(pg, 0);
            let mut root = Page::new_zeroed();
            root_page::init(&mut root);
            root.set_page_lsn(NULL_LSN);
            root.refresh_checksum();
            file.write_page(0, root.bytes())?;
            file.sync()?;
            info!("initialized fresh database");
        }

        let wal = Wal::open(wal_path)?;

        let pager = Self {
            file: Mutex::new(file),
            pool: BufferPool::new(pool_size),
            wal: Mutex::new(wal),
            dpt: Mutex::new(DirtyPageTable::new()),
            att: Mutex::new(TxnTable::new()),
            locks,
            next_tid: AtomicU64::new(1),
        };

        pager.crash_recover()?;
        Ok(pager)
    }

    pub fn locks(&self) -> &LockTable {
        &self.locks
    }

    pub fn num_pages(&self) -> Pgno {
        self.file.lock().unwrap().num_pages()
    }

    /// Graceful shutdown: push every dirty page out, then checkpoint so
    /// the next open starts from an empty table snapshot.
    pub fn close(self) -> Result<()> {
        self.flush_all_pages()?;
        self.checkpoint()?;
        Ok(())
    }

    /// Simulated crash for recovery tests: volatile state (unflushed WAL
    /// tail, dirty frames) is dropped on the floor.
    pub fn crash(self) {
        drop(self);
    }

    //////////////////////////////////////////////////////////////
    //////// Transaction control

    pub fn begin_txn(&self) -> Result<Txn> {
        let tid = self.next_tid.fetch_add(1, Ordering::SeqCst);
        self.att.lock().unwrap().insert(tid)?;
        self.wal
            .lock()
            .unwrap()
            .append(&WalRecord::Begin { tid })?;
        debug!("tx_{} begun", tid);
        Ok(Txn::new(tid))
    }

    /// Force-log-at-commit: the COMMIT record is durable before this
    /// returns; pages follow lazily (no-force).
    pub fn commit(&self, tx: Txn) -> Result<()> {
        let tid = tx.tid();

        // step 1: write and force the COMMIT record
        let lsn = {
            let prev = self.att.lock().unwrap().get(tid)?.last_lsn;
            let mut wal = self.wal.lock().unwrap();
            let lsn = wal.append(&WalRecord::Commit { tid, prev })?;
            wal.flush_to(lsn)?;
            lsn
        };

        // step 2: strict 2PL release happens only after the commit
        // record is durable
        self.locks.unlock_all(tid);

        // step 3: END record, then the transaction leaves the table
        {
            let mut att = self.att.lock().unwrap();
            att.set_state(tid, TxnState::Committed)?;
            self.wal
                .lock()
                .unwrap()
                .append(&WalRecord::End { tid, prev: lsn })?;
            att.remove(tid);
        }

        debug!("tx_{} committed at lsn {}", tid, lsn);
        Ok(())
    }

    /// Abort: roll back everything, then release locks and retire the
    /// transaction.
    pub fn rollback(&self, tx: Txn) -> Result<()> {
        let tid = tx.tid();
        self.rollback_to(tx, NULL_LSN)?;

        self.locks.unlock_all(tid);

        let mut att = self.att.lock().unwrap();
        let prev = att.get(tid)?.last_lsn;
        att.set_state(tid, TxnState::Aborted)?;
        self.wal
            .lock()
            .unwrap()
            .append(&WalRecord::End { tid, prev })?;
        att.remove(tid);

        debug!("tx_{} aborted", tid);
        Ok(())
    }

    /// Walk the undo chain back to `save_lsn` (NULL_LSN rolls back the
    /// whole transaction), emitting a CLR for every UPDATE undone.
    pub fn rollback_to(&self, tx: Txn, save_lsn: Lsn) -> Result<()> {
        let tid = tx.tid();
        let mut cur = self.att.lock().unwrap().get(tid)?.last_lsn;

        while cur != NULL_LSN && cur != save_lsn {
            let rec = self.wal.lock().unwrap().pread(cur)?;
            match rec {
                WalRecord::Update {
                    prev, pg, undo, ..
                } => {
                    let clr_lsn = {
                        let last = self.att.lock().unwrap().get(tid)?.last_lsn;
                        self.wal.lock().unwrap().append(&WalRecord::Clr {
                            tid,
                            prev: last,
                            pg,
                            undo_next: prev,
                            redo: undo.clone(),
                        })?
                    };
                    self.att.lock().unwrap().record(tid, clr_lsn, prev)?;
                    self.apply_image(pg, &undo, clr_lsn)?;
                    cur = prev;
                }
                WalRecord::Clr { undo_next, .. } => {
                    // CLRs are never themselves undone.
                    cur = undo_next;
                }
                WalRecord::Begin { .. } => {
                    cur = NULL_LSN;
                }
                WalRecord::Commit { prev, .. } | WalRecord::End { prev, .. } => {
                    cur = prev;
                }
                _ => {
                    return Err(Error::new(
                        ErrorKind::Corrupt,
                        &format!("unexpected record in undo chain at lsn {}", cur),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Fuzzy checkpoint: CKPT_BEGIN, snapshot of ATT and DPT in
    /// CKPT_END, then the root page adopts the new master-save LSN. Runs
    /// in its own transaction so the master write serializes with the
    /// other root-page writers.
    pub fn checkpoint(&self) -> Result<()> {
        let tx = self.begin_txn()?;
        match self.checkpoint_with(&tx) {
            Ok(()) => self.commit(tx),
            Err(e) => {
                let _ = self.rollback(tx);
                Err(e)
            }
        }
    }

    fn checkpoint_with(&self, tx: &Txn) -> Result<()> {
        // All root-page fields share page 0 and a save puts the whole
        // page image back: writers of page 0 take Root exclusive before
        // their field lock.
        self.locks
            .lock(tx.tid(), LockKind::Root, 0, LockMode::Exclusive)?;
        self.locks
            .lock(tx.tid(), LockKind::MasterLsn, 0, LockMode::Exclusive)?;

        let (begin_lsn, end_lsn) = {
            let att_snap = self.att.lock().unwrap().snapshot();
            let dpt_snap = self.dpt.lock().unwrap().snapshot();

            let mut wal = self.wal.lock().unwrap();
            let begin = wal.append(&WalRecord::CkptBegin)?;
            let end = wal.append(&WalRecord::CkptEnd {
                att: att_snap,
                dpt: dpt_snap,
            })?;
            wal.flush_to(end)?;
            (begin, end)
        };

        // The master pointer is recovery bookkeeping, not user data: it
        // is written through without a log record. A crash between the
        // flush above and this write only lengthens the next analysis
        // scan.
        let frame = self.fetch_frame(0)?;
        {
            let mut page = frame.page_mut();
            root_page::set_master_lsn(&mut page, begin_lsn);
            page.refresh_checksum();
            self.file.lock().unwrap().write_page(0, page.bytes())?;
        }
        frame.set_dirty(false);
        self.dpt.lock().unwrap().remove(0);
        frame.unpin();
        self.file.lock().unwrap().sync()?;

        debug!("checkpoint at lsn {}..{}", begin_lsn, end_lsn);
        Ok(())
    }

    //////////////////////////////////////////////////////////////
    //////// Page fetching

    fn flush_frame(&self, frame: &Frame) -> Result<()> {
        let page = frame.page();
        // WAL rule: the log covering this page must be durable before
        // the page goes to disk.
        self.wal.lock().unwrap().flush_to(page.page_lsn())?;
        self.file
            .lock()
            .unwrap()
            .write_page(frame.pgno(), page.bytes())?;
        self.dpt.lock().unwrap().remove(frame.pgno());
        Ok(())
    }

    fn fetch_frame(&self, pgno: Pgno) -> Result<Arc<Frame>> {
        if let Some(frame) = self.pool.lookup(pgno) {
            return Ok(frame);
        }

        let mut page = Page::new_zeroed();
        self.file.lock().unwrap().read_page(pgno, page.bytes_mut())?;
        page.verify_checksum()
            .map_err(|e| e.ctx(&format!("reading page {}", pgno)))?;

        self.pool.install(pgno, page, |victim| self.flush_frame(victim))
    }

    /// Fetch a page in shared mode, checking its type against `mask`.
    pub fn get(&self, mask: u8, pgno: Pgno) -> Result<PageHandle> {
        let frame = self.fetch_frame(pgno)?;
        if let Err(e) = frame.page().expect_kind(mask) {
            frame.unpin();
            return Err(e);
        }
        Ok(PageHandle {
            mode: HandleMode::S,
            frame: Some(frame),
            shadow: None,
            tid: 0,
        })
    }

    /// Fetch shared, then upgrade.
    pub fn get_writable(&self, tx: &Txn, mask: u8, pgno: Pgno) -> Result<PageHandle> {
        let mut h = self.get(mask, pgno)?;
        self.make_writable(tx, &mut h)?;
        Ok(h)
    }

    /// S → X: stage a shadow copy of the page for this writer. Nothing
    /// is logged until `save`.
    pub fn make_writable(&self, tx: &Txn, h: &mut PageHandle) -> Result<()> {
        match h.mode {
            HandleMode::X => Ok(()),
            HandleMode::S => {
                let frame = h.frame.as_ref().ok_or_else(|| {
                    Error::new(ErrorKind::RptreeInvalid, "make_writable on unowned handle")
                })?;
                h.shadow = Some(Box::new(frame.page().clone()));
                h.mode = HandleMode::X;
                h.tid = tx.tid();
                Ok(())
            }
            HandleMode::None => Err(Error::new(
                ErrorKind::RptreeInvalid,
                "make_writable on unowned handle",
            )),
        }
    }

    /// Allocate a page: reuse the head of the tombstone list when there
    /// is one, extend the file otherwise. The returned handle is
    /// exclusive with the page initialized as `kind`; the caller saves
    /// it. Every free-list step is logged through `save`.
    pub fn new_page(&self, tx: &Txn, kind: PageKind) -> Result<PageHandle> {
        // Root before the field lock: the free-list head shares page 0
        // with the other root fields, and a save writes the whole page.
        self.locks
            .lock(tx.tid(), LockKind::Root, 0, LockMode::Exclusive)?;
        self.locks.lock(
            tx.tid(),
            LockKind::FirstTombstone,
            0,
            LockMode::Exclusive,
        )?;

        let mut root = self.get(PageKind::Root as u8, 0)?;
        let first = root_page::first_tombstone(&root.ro());

        if first != NULL_PGNO {
            // Unlink the head tombstone and re-initialize it.
            let mut tmb = self.get_writable(tx, PageKind::Tombstone as u8, first)?;
            let next = tombstone_page::next(&tmb.ro());

            init_page(tmb.rw(), kind);

            self.make_writable(tx, &mut root)?;
            root_page::set_first_tombstone(root.rw(), next);
            self.save(&mut root)?;
            drop(root);

            debug!("page {} reused from tombstone list", first);
            return Ok(tmb);
        }
        drop(root);

        let pgno = self.file.lock().unwrap().new_page()?;
        let frame = self
            .pool
            .install(pgno, Page::new_zeroed(), |victim| self.flush_frame(victim))?;

        let mut shadow = Box::new(Page::new_zeroed());
        init_page(&mut shadow, kind);

        debug!("page {} allocated by extending the file", pgno);
        Ok(PageHandle {
            mode: HandleMode::X,
            frame: Some(frame),
            shadow: Some(shadow),
            tid: tx.tid(),
        })
    }

    /// Convert a page into a tombstone and push it onto the free list.
    pub fn delete_and_release(&self, tx: &Txn, mut h: PageHandle) -> Result<()> {
        self.locks
            .lock(tx.tid(), LockKind::Root, 0, LockMode::Exclusive)?;
        self.locks.lock(
            tx.tid(),
            LockKind::FirstTombstone,
            0,
            LockMode::Exclusive,
        )?;

        self.make_writable(tx, &mut h)?;
        let mut root = self.get_writable(tx, PageKind::Root as u8, 0)?;

        let old_first = root_page::first_tombstone(&root.ro());
        init_page(h.rw(), PageKind::Tombstone);
        tombstone_page::set_next(h.rw(), old_first);
        self.save(&mut h)?;

        root_page::set_first_tombstone(root.rw(), h.pgno());
        self.save(&mut root)?;

        debug!("page {} tombstoned", h.pgno());
        Ok(())
    }

    /// Publish an exclusive handle's shadow buffer: emit the UPDATE
    /// record (undo = shared image, redo = shadow image), stamp the page
    /// LSN, copy the shadow over the shared buffer and downgrade to S.
    pub fn save(&self, h: &mut PageHandle) -> Result<()> {
        if h.mode != HandleMode::X {
            return Err(Error::new(
                ErrorKind::RptreeInvalid,
                "save on a non-exclusive handle",
            ));
        }
        let tid = h.tid;
        let frame = h.frame.as_ref().unwrap();
        let pgno = frame.pgno();

        let undo = frame.page().clone();
        let mut shadow = h.shadow.take().unwrap();

        let lsn = {
            let prev = self.att.lock().unwrap().get(tid)?.last_lsn;
            self.wal.lock().unwrap().append(&WalRecord::Update {
                tid,
                prev,
                pg: pgno,
                undo,
                redo: shadow.as_ref().clone(),
            })?
        };

        shadow.set_page_lsn(lsn);
        shadow.refresh_checksum();
        *frame.page_mut() = *shadow;
        frame.set_dirty(true);

        self.att.lock().unwrap().record(tid, lsn, lsn)?;
        self.dpt.lock().unwrap().add(pgno, lsn)?;

        h.mode = HandleMode::S;
        Ok(())
    }

    /// Drop a handle; exclusive handles are saved first. Release is
    /// mandatory on every successful exit path — plain `drop` discards
    /// an unsaved shadow, which is what error paths want.
    pub fn release(&self, mut h: PageHandle) -> Result<()> {
        if h.mode == HandleMode::X {
            self.save(&mut h)?;
        }
        drop(h);
        Ok(())
    }

    pub fn flush_wal(&self) -> Result<()> {
        self.wal.lock().unwrap().flush_all()
    }

    /// Write every dirty frame to disk (WAL first, per the WAL rule).
    pub fn flush_all_pages(&self) -> Result<()> {
        for frame in self.pool.frames() {
            if frame.is_dirty() {
                self.flush_frame(&frame)?;
                frame.set_dirty(false);
            }
        }
        self.file.lock().unwrap().sync()?;
        Ok(())
    }

    /// Install an image into the cache (used by rollback), stamping the
    /// given LSN.
    fn apply_image(&self, pgno: Pgno, image: &Page, lsn: Lsn) -> Result<()> {
        let frame = self.fetch_frame(pgno)?;
        {
            let mut page = frame.page_mut();
            *page = image.clone();
            page.set_page_lsn(lsn);
            page.refresh_checksum();
        }
        frame.set_dirty(true);
        self.dpt.lock().unwrap().add(pgno, lsn)?;
        frame.unpin();
        Ok(())
    }

    //////////////////////////////////////////////////////////////
    //////// ARIES restart

    /// Three-pass restart: analysis from the master-save LSN, redo from
    /// the minimum recLSN, undo of every loser with CLRs. Ends with a
    /// truncated log and a fresh checkpoint.
    pub fn crash_recover(&self) -> Result<()> {
        let master = {
            let file = self.file.lock().unwrap();
            let mut root = Page::new_zeroed();
            file.read_page(0, root.bytes_mut())?;
            root_page::master_lsn(&root)
        };
        let start = if master == NULL_LSN { 0 } else { master };

        // ---- analysis ----
        {
            let mut att = self.att.lock().unwrap();
            let mut dpt = self.dpt.lock().unwrap();
            let mut wal = self.wal.lock().unwrap();
            wal.seek_read(start);

            let mut max_tid = 0;
            while let Some((lsn, rec)) = wal.read_next()? {
                if let Some(tid) = rec.tid() {
                    max_tid = max_tid.max(tid);
                }
                match rec {
                    WalRecord::CkptEnd { att: snaps, dpt: entries } => {
                        for snap in snaps {
                            att.insert_recovered(snap);
                        }
                        for (pg, rec_lsn) in entries {
                            dpt.merge_min(pg, rec_lsn)?;
                        }
                    }
                    WalRecord::Begin { tid } => {
                        att.insert_recovered(crate::storage::txn_table::TxnSnapshot {
                            tid,
                            state: TxnState::Active,
                            last_lsn: NULL_LSN,
                            undo_next_lsn: NULL_LSN,
                        });
                    }
                    WalRecord::Update { tid, pg, .. } => {
                        self.analysis_touch(&mut att, tid, lsn, lsn);
                        dpt.add(pg, lsn)?;
                    }
                    WalRecord::Clr { tid, pg, undo_next, .. } => {
                        self.analysis_touch(&mut att, tid, lsn, undo_next);
                        dpt.add(pg, lsn)?;
                    }
                    WalRecord::Commit { tid, .. } => {
                        self.analysis_touch(&mut att, tid, lsn, NULL_LSN);
                        let _ = att.set_state(tid, TxnState::Committed);
                    }
                    WalRecord::End { tid, .. } => {
                        att.remove(tid);
                    }
                    WalRecord::CkptBegin => {}
                }
            }
            wal.write_mode();
            self.next_tid.store(max_tid + 1, Ordering::SeqCst);

            if att.is_empty() && dpt.is_empty() && start == 0 && wal.end_lsn() == 0 {
                // Nothing ever happened; skip the ceremony below.
                return Ok(());
            }
            info!(
                "recovery analysis: {} live transactions, {} dirty pages",
                att.len(),
                dpt.len()
            );
        }

        // ---- redo ----
        {
            let dpt = self.dpt.lock().unwrap();
            let redo_start = dpt.min_rec_lsn();
            drop(dpt);

            if redo_start != NULL_LSN {
                let mut wal = self.wal.lock().unwrap();
                wal.seek_read(redo_start);
                while let Some((lsn, rec)) = wal.read_next()? {
                    let (pg, redo) = match &rec {
                        WalRecord::Update { pg, redo, .. } => (*pg, redo),
                        WalRecord::Clr { pg, redo, .. } => (*pg, redo),
                        _ => continue,
                    };
                    let rec_lsn = match self.dpt.lock().unwrap().get(pg) {
                        Some(l) => l,
                        None => continue,
                    };
                    if lsn < rec_lsn {
                        continue;
                    }
                    self.redo_apply(pg, redo, lsn)?;
                }
            }
        }

        // ---- undo ----
        {
            let losers: Vec<(Tid, Lsn)> = self.att.lock().unwrap().losers();
            let mut heap: BinaryHeap<(Lsn, Tid)> = losers
                .into_iter()
                .filter(|(_, lsn)| *lsn != NULL_LSN)
                .map(|(tid, lsn)| (lsn, tid))
                .collect();

            while let Some((lsn, tid)) = heap.pop() {
                let rec = self.wal.lock().unwrap().pread(lsn)?;
                let next = match rec {
                    WalRecord::Update { prev, pg, undo, .. } => {
                        let clr_lsn = {
                            let last = self.att.lock().unwrap().get(tid)?.last_lsn;
                            self.wal.lock().unwrap().append(&WalRecord::Clr {
                                tid,
                                prev: last,
                                pg,
                                undo_next: prev,
                                redo: undo.clone(),
                            })?
                        };
                        self.att.lock().unwrap().record(tid, clr_lsn, prev)?;
                        self.redo_apply(pg, &undo, clr_lsn)?;
                        prev
                    }
                    WalRecord::Clr { undo_next, .. } => undo_next,
                    WalRecord::Begin { .. } => NULL_LSN,
                    WalRecord::Commit { prev, .. } | WalRecord::End { prev, .. } => prev,
                    _ => NULL_LSN,
                };

                if next != NULL_LSN {
                    heap.push((next, tid));
                } else {
                    let mut att = self.att.lock().unwrap();
                    let last = att.get(tid)?.last_lsn;
                    self.wal
                        .lock()
                        .unwrap()
                        .append(&WalRecord::End { tid, prev: last })?;
                    att.remove(tid);
                }
            }

            // Committed transactions that were still in the table never
            // got their END; write it now.
            let leftover = self.att.lock().unwrap().tids();
            for tid in leftover {
                let last = self.att.lock().unwrap().get(tid)?.last_lsn;
                self.wal
                    .lock()
                    .unwrap()
                    .append(&WalRecord::End { tid, prev: last })?;
                self.att.lock().unwrap().remove(tid);
            }
        }

        // ---- finalize: everything is on disk, start a fresh log ----
        self.wal.lock().unwrap().flush_all()?;
        self.file.lock().unwrap().sync()?;
        self.dpt.lock().unwrap().clear();
        self.wal.lock().unwrap().reset()?;
        self.pool.clear();
        self.checkpoint()?;

        info!("recovery complete");
        Ok(())
    }

    fn analysis_touch(&self, att: &mut TxnTable, tid: Tid, lsn: Lsn, undo_next: Lsn) {
        if !att.contains(tid) {
            att.insert_recovered(crate::storage::txn_table::TxnSnapshot {
                tid,
                state: TxnState::Active,
                last_lsn: NULL_LSN,
                undo_next_lsn: NULL_LSN,
            });
        }
        let _ = att.record(tid, lsn, undo_next);
    }

    /// Apply a WAL page image straight to the database file during
    /// restart, when the image on disk is older than the record.
    fn redo_apply(&self, pg: Pgno, image: &Page, lsn: Lsn) -> Result<()> {
        let mut file = self.file.lock().unwrap();
        file.ensure_page(pg)?;

        let mut on_disk = Page::new_zeroed();
        file.read_page(pg, on_disk.bytes_mut())?;
        let stale = on_disk.verify_checksum().is_err() || on_disk.page_lsn() < lsn;
        if !stale {
            return Ok(());
        }

        let mut fresh = image.clone();
        fresh.set_page_lsn(lsn);
        fresh.refresh_checksum();
        file.write_page(pg, fresh.bytes())?;
        Ok(())
    }
}

/// Initialize a zeroed page as the requested kind.
pub fn init_page(p: &mut Page, kind: PageKind) {
    use crate::storage::page::*;

    // Clear the body so tombstone reuse starts from a clean slate.
    for b in p.bytes_mut().iter_mut() {
        *b = 0;
    }
    match kind {
        PageKind::Root => root_page::init(p),
        PageKind::Tombstone => tombstone_page::init(p),
        PageKind::VarHash => var_hash_page::init(p),
        PageKind::Var => var_page::init(p),
        PageKind::VarTail => var_page::tail::init(p),
        PageKind::InnerNode => inner_node::init(p),
        PageKind::DataList => data_list::init(p),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::data_list;

    fn open_pager(dir: &tempfile::TempDir) -> Pager {
        Pager::open(dir.path().join("test.db"), dir.path().join("test.wal")).unwrap()
    }

    #[test]
    fn test_fresh_database_has_root() {
        let dir = tempfile::tempdir().unwrap();
        let pager = open_pager(&dir);
        assert_eq!(pager.num_pages(), 1);

        let root = pager.get(PageKind::Root as u8, 0).unwrap();
        assert_eq!(root_page::first_tombstone(&root.ro()), NULL_PGNO);
    }

    #[test]
    fn test_new_page_extends_then_reuses_tombstones() {
        let dir = tempfile::tempdir().unwrap();
        let pager = open_pager(&dir);

        let tx = pager.begin_txn().unwrap();
        let h = pager.new_page(&tx, PageKind::DataList).unwrap();
        let pg = h.pgno();
        assert_eq!(pg, 1);
        pager.release(h).unwrap();

        // Delete it; the free list should now lead with it.
        let h = pager.get(PageKind::DataList as u8, pg).unwrap();
        pager.delete_and_release(&tx, h).unwrap();
        let root = pager.get(PageKind::Root as u8, 0).unwrap();
        assert_eq!(root_page::first_tombstone(&root.ro()), pg);
        drop(root);

        // The next allocation consumes the tombstone, not the file end.
        let h = pager.new_page(&tx, PageKind::InnerNode).unwrap();
        assert_eq!(h.pgno(), pg);
        pager.release(h).unwrap();
        assert_eq!(pager.num_pages(), 2);

        pager.commit(tx).unwrap();
    }

    #[test]
    fn test_save_stamps_page_lsn() {
        let dir = tempfile::tempdir().unwrap();
        let pager = open_pager(&dir);

        let tx = pager.begin_txn().unwrap();
        let mut h = pager.new_page(&tx, PageKind::DataList).unwrap();
        data_list::append(h.rw(), b"hello");
        pager.save(&mut h).unwrap();

        assert_eq!(h.mode(), HandleMode::S);
        let lsn = h.ro().page_lsn();
        assert_ne!(lsn, NULL_LSN);
        drop(h);
        pager.commit(tx).unwrap();
    }

    #[test]
    fn test_rollback_restores_before_image() {
        let dir = tempfile::tempdir().unwrap();
        let pager = open_pager(&dir);

        // Commit a page with known content.
        let tx = pager.begin_txn().unwrap();
        let mut h = pager.new_page(&tx, PageKind::DataList).unwrap();
        let pg = h.pgno();
        data_list::append(h.rw(), b"stable");
        pager.save(&mut h).unwrap();
        drop(h);
        pager.commit(tx).unwrap();

        // Scribble in a second transaction, then abort.
        let tx = pager.begin_txn().unwrap();
        let mut h = pager.get_writable(&tx, PageKind::DataList as u8, pg).unwrap();
        data_list::append(h.rw(), b" scribble");
        pager.save(&mut h).unwrap();
        drop(h);
        pager.rollback(tx).unwrap();

        let h = pager.get(PageKind::DataList as u8, pg).unwrap();
        assert_eq!(data_list::data(&h.ro()), b"stable");
    }

    #[test]
    fn test_commit_survives_crash() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("test.db");
        let wal = dir.path().join("test.wal");

        let pg;
        {
            let pager = Pager::open(&db, &wal).unwrap();
            let tx = pager.begin_txn().unwrap();
            let mut h = pager.new_page(&tx, PageKind::DataList).unwrap();
            pg = h.pgno();
            data_list::append(h.rw(), b"durable bytes");
            pager.save(&mut h).unwrap();
            drop(h);
            pager.commit(tx).unwrap();
            // No page flush, no checkpoint: the WAL alone carries it.
            pager.crash();
        }

        let pager = Pager::open(&db, &wal).unwrap();
        let h = pager.get(PageKind::DataList as u8, pg).unwrap();
        assert_eq!(data_list::data(&h.ro()), b"durable bytes");
    }

    #[test]
    fn test_uncommitted_work_vanishes_after_crash() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("test.db");
        let wal = dir.path().join("test.wal");

        let pg;
        {
            let pager = Pager::open(&db, &wal).unwrap();
            let tx = pager.begin_txn().unwrap();
            let mut h = pager.new_page(&tx, PageKind::DataList).unwrap();
            pg = h.pgno();
            data_list::append(h.rw(), b"committed");
            pager.save(&mut h).unwrap();
            drop(h);
            pager.commit(tx).unwrap();

            // A second transaction mutates the page and even forces its
            // dirty frame to disk, but never commits.
            let tx = pager.begin_txn().unwrap();
            let mut h = pager.get_writable(&tx, PageKind::DataList as u8, pg).unwrap();
            data_list::append(h.rw(), b" but lost");
            pager.save(&mut h).unwrap();
            drop(h);
            pager.flush_wal().unwrap();
            pager.flush_all_pages().unwrap();
            pager.crash();
        }

        let pager = Pager::open(&db, &wal).unwrap();
        let h = pager.get(PageKind::DataList as u8, pg).unwrap();
        assert_eq!(data_list::data(&h.ro()), b"committed");
    }

    #[test]
    fn test_checkpoint_then_recover() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("test.db");
        let wal = dir.path().join("test.wal");

        let pg;
        {
            let pager = Pager::open(&db, &wal).unwrap();
            let tx = pager.begin_txn().unwrap();
            let mut h = pager.new_page(&tx, PageKind::DataList).unwrap();
            pg = h.pgno();
            data_list::append(h.rw(), b"before ckpt");
            pager.save(&mut h).unwrap();
            drop(h);
            pager.commit(tx).unwrap();
            pager.checkpoint().unwrap();

            let tx = pager.begin_txn().unwrap();
            let mut h = pager.get_writable(&tx, PageKind::DataList as u8, pg).unwrap();
            data_list::append(h.rw(), b" after");
            pager.save(&mut h).unwrap();
            drop(h);
            pager.commit(tx).unwrap();
            pager.crash();
        }

        let pager = Pager::open(&db, &wal).unwrap();
        let h = pager.get(PageKind::DataList as u8, pg).unwrap();
        assert_eq!(data_list::data(&h.ro()), b"before ckpt after");
    }
}
