//! The embedded façade: one call, one transaction. Every operation
//! acquires its variable's lock, runs a cursor over the rope tree, and
//! commits; any error rolls the transaction back before it surfaces.

use std::path::Path;

use crate::{
    catalog::{self, Variable},
    error::{Error, ErrorKind, Result},
    lock::{LockKind, LockMode},
    rptree::RptCursor,
    storage::{pager::Pager, txn_table::Txn},
    value_type::ValueType,
};

pub struct Db {
    pager: Pager,
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db").finish_non_exhaustive()
    }
}

impl Db {
    pub fn open<P: AsRef<Path>>(db_path: P, wal_path: P) -> Result<Db> {
        Ok(Db {
            pager: Pager::open(db_path, wal_path)?,
        })
    }

    /// Wrap an already opened pager (e.g. one with a custom pool size or
    /// lock timeout).
    pub fn from_pager(pager: Pager) -> Db {
        Db { pager }
    }

    pub fn pager(&self) -> &Pager {
        &self.pager
    }

    pub fn checkpoint(&self) -> Result<()> {
        self.pager.checkpoint()
    }

    pub fn close(self) -> Result<()> {
        self.pager.close()
    }

    /// Drop everything volatile, for recovery tests.
    pub fn crash(self) {
        self.pager.crash();
    }

    fn with_txn<R>(&self, f: impl FnOnce(&Txn) -> Result<R>) -> Result<R> {
        let tx = self.pager.begin_txn()?;
        match f(&tx) {
            Ok(r) => {
                self.pager.commit(tx)?;
                Ok(r)
            }
            Err(e) => {
                let _ = self.pager.rollback(tx);
                Err(e)
            }
        }
    }

    fn open_existing(&self, tx: &Txn, name: &str, mode: LockMode) -> Result<Variable> {
        let var = catalog::open_variable(&self.pager, tx, name)?.ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidArgument,
                &format!("no such variable '{}'", name),
            )
        })?;
        self.pager
            .locks()
            .lock(tx.tid(), LockKind::Var, var.vp_pgno, mode)?;
        Ok(var)
    }

    pub fn create(&self, name: &str, vtype: &ValueType) -> Result<()> {
        self.with_txn(|tx| catalog::create_variable(&self.pager, tx, name, vtype))
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        self.with_txn(|tx| catalog::delete_variable(&self.pager, tx, name))
    }

    /// Number of elements currently stored in a variable.
    pub fn len(&self, name: &str) -> Result<u64> {
        self.with_txn(|tx| {
            let var = self.open_existing(tx, name, LockMode::Shared)?;
            let bsize = var.vtype.byte_size()?;
            Ok(var.total_size / bsize)
        })
    }

    /// Insert elements at element offset `at`, shifting the rest right.
    pub fn insert(&self, name: &str, at: u64, data: &[u8]) -> Result<()> {
        self.with_txn(|tx| {
            let mut var = self.open_existing(tx, name, LockMode::Exclusive)?;
            let bsize = var.vtype.byte_size()?;
            if data.len() as u64 % bsize != 0 {
                return Err(Error::new(
                    ErrorKind::InvalidArgument,
                    &format!("payload is not a multiple of the element size {}", bsize),
                ));
            }
            let loc = at
                .checked_mul(bsize)
                .ok_or_else(|| Error::new(ErrorKind::Arith, "element offset overflow"))?;

            let mut cursor = RptCursor::new(&self.pager, *tx);
            cursor.bind(var.root, var.total_size);
            cursor.seek(loc, true)?;
            cursor.insert(data, 0)?;

            var.root = cursor.root();
            var.total_size = cursor.total_size();
            drop(cursor);
            catalog::save_variable(&self.pager, tx, &var)
        })
    }

    /// Read up to `n` elements starting at element offset `at`, taking
    /// every `stride`-th one. `n == 0` reads to the end.
    pub fn read(&self, name: &str, at: u64, n: u64, stride: u32) -> Result<Vec<u8>> {
        self.with_txn(|tx| {
            let var = self.open_existing(tx, name, LockMode::Shared)?;
            let bsize = var.vtype.byte_size()?;
            let loc = at
                .checked_mul(bsize)
                .ok_or_else(|| Error::new(ErrorKind::Arith, "element offset overflow"))?;

            let mut cursor = RptCursor::new(&self.pager, *tx);
            cursor.bind(var.root, var.total_size);
            let mut out = Vec::new();
            if cursor.seek(loc, false)? {
                cursor.read(&mut out, n, bsize as usize, stride)?;
            }
            Ok(out)
        })
    }

    /// Remove up to `n` elements starting at element offset `at`, taking
    /// every `stride`-th one; the removed bytes are returned. `n == 0`
    /// removes to the end.
    pub fn remove(&self, name: &str, at: u64, n: u64, stride: u32) -> Result<Vec<u8>> {
        self.with_txn(|tx| {
            let mut var = self.open_existing(tx, name, LockMode::Exclusive)?;
            let bsize = var.vtype.byte_size()?;
            let loc = at
                .checked_mul(bsize)
                .ok_or_else(|| Error::new(ErrorKind::Arith, "element offset overflow"))?;

            let mut cursor = RptCursor::new(&self.pager, *tx);
            cursor.bind(var.root, var.total_size);
            let mut out = Vec::new();
            if cursor.seek(loc, false)? {
                cursor.remove(Some(&mut out), n, bsize as usize, stride)?;
                var.root = cursor.root();
                var.total_size = cursor.total_size();
                drop(cursor);
                catalog::save_variable(&self.pager, tx, &var)?;
            }
            Ok(out)
        })
    }

    /// Overwrite elements in place starting at element offset `at`,
    /// replacing every `stride`-th one. Returns elements written.
    pub fn overwrite(&self, name: &str, at: u64, data: &[u8], stride: u32) -> Result<u64> {
        self.with_txn(|tx| {
            let var = self.open_existing(tx, name, LockMode::Exclusive)?;
            let bsize = var.vtype.byte_size()?;
            if data.len() as u64 % bsize != 0 {
                return Err(Error::new(
                    ErrorKind::InvalidArgument,
                    &format!("payload is not a multiple of the element size {}", bsize),
                ));
            }
            let loc = at
                .checked_mul(bsize)
                .ok_or_else(|| Error::new(ErrorKind::Arith, "element offset overflow"))?;

            let mut cursor = RptCursor::new(&self.pager, *tx);
            cursor.bind(var.root, var.total_size);
            if !cursor.seek(loc, false)? {
                return Ok(0);
            }
            cursor.write(data, 0, bsize as usize, stride)
        })
    }
}
