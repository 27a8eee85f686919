use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, Mutex, RwLock,
    },
};

use log::trace;

use crate::{
    error::{Error, ErrorKind, Result},
    storage::{page::Page, Pgno},
    utils::HandyRwLock,
};

/// Default frame count of the pool.
pub const DEFAULT_POOL_SIZE: usize = 64;

/// One buffer-pool slot. The content latch (`buf`) is shared for readers;
/// the writer's staging copy lives in the page handle as a shadow buffer
/// and is swapped in on save, so readers never see a half-written page.
#[derive(Debug)]
pub struct Frame {
    pgno: Pgno,
    pin: AtomicU32,
    refbit: AtomicBool,
    dirty: AtomicBool,
    buf: RwLock<Page>,
}

impl Frame {
    fn new(pgno: Pgno, page: Page) -> Self {
        Self {
            pgno,
            pin: AtomicU32::new(1),
            refbit: AtomicBool::new(true),
            dirty: AtomicBool::new(false),
            buf: RwLock::new(page),
        }
    }

    pub fn pgno(&self) -> Pgno {
        self.pgno
    }

    pub fn pin_count(&self) -> u32 {
        self.pin.load(Ordering::SeqCst)
    }

    pub fn unpin(&self) {
        let prev = self.pin.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    pub fn set_dirty(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::SeqCst);
    }

    pub fn page(&self) -> std::sync::RwLockReadGuard<'_, Page> {
        self.buf.rl()
    }

    pub fn page_mut(&self) -> std::sync::RwLockWriteGuard<'_, Page> {
        self.buf.wl()
    }
}

struct PoolInner {
    slots: Vec<Option<Arc<Frame>>>,
    map: HashMap<Pgno, usize>,
    hand: usize,
}

/// Fixed-capacity frame cache with CLOCK replacement. All frame-index
/// lookups and replacement decisions are serialized by the pool latch;
/// page content is protected by the per-frame latch.
pub struct BufferPool {
    inner: Mutex<PoolInner>,
}

impl BufferPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(PoolInner {
                slots: (0..capacity).map(|_| None).collect(),
                map: HashMap::new(),
                hand: 0,
            }),
        }
    }

    /// Look up a cached page, pinning the frame on a hit.
    pub fn lookup(&self, pgno: Pgno) -> Option<Arc<Frame>> {
        let inner = self.inner.lock().unwrap();
        let idx = *inner.map.get(&pgno)?;
        let frame = inner.slots[idx].as_ref().unwrap();
        frame.pin.fetch_add(1, Ordering::SeqCst);
        frame.refbit.store(true, Ordering::SeqCst);
        Some(Arc::clone(frame))
    }

    /// Insert a page read from disk (or freshly allocated), returning a
    /// pinned frame. When the pool is full a victim is chosen by CLOCK:
    /// scan until a pin-count-zero frame with a clear reference bit turns
    /// up, clearing reference bits along the way. Dirty victims are handed
    /// to `flush` first, which is where the pager enforces the WAL rule.
    pub fn install<F>(&self, pgno: Pgno, page: Page, mut flush: F) -> Result<Arc<Frame>>
    where
        F: FnMut(&Frame) -> Result<()>,
    {
        let mut inner = self.inner.lock().unwrap();
        debug_assert!(!inner.map.contains_key(&pgno));

        let idx = match inner.slots.iter().position(|s| s.is_none()) {
            Some(free) => free,
            None => {
                let victim = self.evict_idx(&mut inner)?;
                let old = inner.slots[victim].as_ref().unwrap();
                if old.is_dirty() {
                    flush(old)?;
                    old.set_dirty(false);
                }
                let old_pgno = old.pgno;
                trace!("buffer pool evicted page {}", old_pgno);
                inner.map.remove(&old_pgno);
                inner.slots[victim] = None;
                victim
            }
        };

        let frame = Arc::new(Frame::new(pgno, page));
        inner.slots[idx] = Some(Arc::clone(&frame));
        inner.map.insert(pgno, idx);
        Ok(frame)
    }

    fn evict_idx(&self, inner: &mut PoolInner) -> Result<usize> {
        let n = inner.slots.len();
        // Two full sweeps: the first may only clear reference bits.
        for _ in 0..2 * n {
            let idx = inner.hand;
            inner.hand = (inner.hand + 1) % n;

            let frame = match inner.slots[idx].as_ref() {
                Some(f) => f,
                None => continue,
            };
            if frame.pin_count() != 0 {
                continue;
            }
            if frame.refbit.swap(false, Ordering::SeqCst) {
                continue;
            }
            return Ok(idx);
        }
        Err(Error::new(
            ErrorKind::PagerFull,
            "buffer pool has no evictable frame",
        ))
    }

    /// Drop a cached page without writing it anywhere.
    pub fn discard(&self, pgno: Pgno) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(idx) = inner.map.remove(&pgno) {
            inner.slots[idx] = None;
        }
    }

    /// Snapshot of all resident frames, for flush-everything paths.
    pub fn frames(&self) -> Vec<Arc<Frame>> {
        let inner = self.inner.lock().unwrap();
        inner
            .slots
            .iter()
            .filter_map(|s| s.as_ref().map(Arc::clone))
            .collect()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        for s in inner.slots.iter_mut() {
            *s = None;
        }
        inner.map.clear();
        inner.hand = 0;
    }
}
