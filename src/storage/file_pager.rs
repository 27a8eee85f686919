use std::{
    fs::{File, OpenOptions},
    path::Path,
};

#[cfg(unix)]
use std::os::unix::fs::FileExt;

use log::trace;

use crate::{
    error::{Error, ErrorKind, Result},
    storage::{Pgno, PAGE_SIZE},
};

/// A thin shim over positional file I/O. No caching, no locking; used
/// only through the buffer pool and recovery.
#[derive(Debug)]
pub struct FilePager {
    file: File,
    npages: Pgno,
}

impl FilePager {
    /// Open the database file read/write, deriving the page count from
    /// the file size. A size that is not a multiple of `PAGE_SIZE` is
    /// corruption.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        let size = file.metadata()?.len();
        if size % PAGE_SIZE as u64 != 0 {
            return Err(Error::new(
                ErrorKind::Corrupt,
                &format!(
                    "database file size should be a multiple of {}, actual size was {}",
                    PAGE_SIZE, size
                ),
            ));
        }

        Ok(Self {
            file,
            npages: size / PAGE_SIZE as u64,
        })
    }

    pub fn num_pages(&self) -> Pgno {
        self.npages
    }

    /// Extend the file by one page; the new pgno equals the prior page
    /// count.
    pub fn new_page(&mut self) -> Result<Pgno> {
        self.file
            .set_len(PAGE_SIZE as u64 * (self.npages + 1))?;
        let pg = self.npages;
        self.npages += 1;
        trace!("file pager extended, total pages: {}", self.npages);
        Ok(pg)
    }

    /// Grow the file so that `pg` is addressable. Used by redo, which may
    /// reference pages allocated after the last metadata sync.
    pub fn ensure_page(&mut self, pg: Pgno) -> Result<()> {
        while self.npages <= pg {
            self.new_page()?;
        }
        Ok(())
    }

    /// Full-page positional read. Partial reads are retried by
    /// `read_exact_at`; an out-of-range page is the caller's bug turned
    /// into `PgOutOfRange`.
    pub fn read_page(&self, pg: Pgno, buf: &mut [u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        if pg >= self.npages {
            return Err(Error::new(
                ErrorKind::PgOutOfRange,
                &format!("page read {} but total pages is {}", pg, self.npages),
            ));
        }

        self.file
            .read_exact_at(buf, pg * PAGE_SIZE as u64)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    Error::new(ErrorKind::Corrupt, "empty page read")
                } else {
                    Error::new(ErrorKind::Io, &e.to_string())
                }
            })?;
        Ok(())
    }

    /// Full-page positional write. Partial writes are retried by
    /// `write_all_at`.
    pub fn write_page(&self, pg: Pgno, buf: &[u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        if pg >= self.npages {
            return Err(Error::new(
                ErrorKind::PgOutOfRange,
                &format!("page write {} but total pages is {}", pg, self.npages),
            ));
        }

        self.file.write_all_at(buf, pg * PAGE_SIZE as u64)?;
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    /// Truncate to zero pages.
    pub fn reset(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        self.npages = 0;
        Ok(())
    }
}
