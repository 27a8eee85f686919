use std::{
    fs::{File, OpenOptions},
    io::Cursor,
    path::Path,
};

#[cfg(unix)]
use std::os::unix::fs::FileExt;

use log::debug;

use crate::{
    error::{Error, ErrorKind, Result},
    io::{read_exact, read_into, ByteWriter},
    storage::{
        page::Page,
        txn_table::{TxnSnapshot, TxnState},
        Lsn, Pgno, Tid, PAGE_SIZE,
    },
};

const WL_BEGIN: u8 = 1;
const WL_COMMIT: u8 = 2;
const WL_END: u8 = 3;
const WL_UPDATE: u8 = 4;
const WL_CLR: u8 = 5;
const WL_CKPT_BEGIN: u8 = 6;
const WL_CKPT_END: u8 = 7;
const WL_EOF: u8 = 8;

/// header = type byte + total record length.
const WL_HDR_LEN: usize = 5;
const WL_CRC_LEN: usize = 4;

/// Sanity cap on a single record: a CKPT_END with full tables is the
/// largest thing we ever write, well under this.
const WL_MAX_RECORD: usize = 1 << 20;

/// A fully decoded log record.
pub enum WalRecord {
    Begin {
        tid: Tid,
    },
    Commit {
        tid: Tid,
        prev: Lsn,
    },
    End {
        tid: Tid,
        prev: Lsn,
    },
    Update {
        tid: Tid,
        prev: Lsn,
        pg: Pgno,
        undo: Page,
        redo: Page,
    },
    Clr {
        tid: Tid,
        prev: Lsn,
        pg: Pgno,
        undo_next: Lsn,
        redo: Page,
    },
    CkptBegin,
    CkptEnd {
        att: Vec<TxnSnapshot>,
        dpt: Vec<(Pgno, Lsn)>,
    },
}

impl WalRecord {
    fn type_tag(&self) -> u8 {
        match self {
            WalRecord::Begin { .. } => WL_BEGIN,
            WalRecord::Commit { .. } => WL_COMMIT,
            WalRecord::End { .. } => WL_END,
            WalRecord::Update { .. } => WL_UPDATE,
            WalRecord::Clr { .. } => WL_CLR,
            WalRecord::CkptBegin => WL_CKPT_BEGIN,
            WalRecord::CkptEnd { .. } => WL_CKPT_END,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            WalRecord::Begin { .. } => "BEGIN",
            WalRecord::Commit { .. } => "COMMIT",
            WalRecord::End { .. } => "END",
            WalRecord::Update { .. } => "UPDATE",
            WalRecord::Clr { .. } => "CLR",
            WalRecord::CkptBegin => "CKPT_BEGIN",
            WalRecord::CkptEnd { .. } => "CKPT_END",
        }
    }

    pub fn tid(&self) -> Option<Tid> {
        match self {
            WalRecord::Begin { tid }
            | WalRecord::Commit { tid, .. }
            | WalRecord::End { tid, .. }
            | WalRecord::Update { tid, .. }
            | WalRecord::Clr { tid, .. } => Some(*tid),
            _ => None,
        }
    }

    fn body(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        match self {
            WalRecord::Begin { tid } => {
                w.write(tid);
            }
            WalRecord::Commit { tid, prev } | WalRecord::End { tid, prev } => {
                w.write(tid);
                w.write(prev);
            }
            WalRecord::Update {
                tid,
                prev,
                pg,
                undo,
                redo,
            } => {
                w.write(tid);
                w.write(prev);
                w.write(pg);
                w.write_bytes(undo.bytes());
                w.write_bytes(redo.bytes());
            }
            WalRecord::Clr {
                tid,
                prev,
                pg,
                undo_next,
                redo,
            } => {
                w.write(tid);
                w.write(prev);
                w.write(pg);
                w.write(undo_next);
                w.write_bytes(redo.bytes());
            }
            WalRecord::CkptBegin => {}
            WalRecord::CkptEnd { att, dpt } => {
                w.write(&(att.len() as u32));
                for t in att {
                    w.write(&t.tid);
                    w.write(&t.state.to_u8());
                    w.write(&t.last_lsn);
                    w.write(&t.undo_next_lsn);
                }
                w.write(&(dpt.len() as u32));
                for (pg, rec_lsn) in dpt {
                    w.write(pg);
                    w.write(rec_lsn);
                }
            }
        }
        w.to_bytes()
    }

    fn encode(&self) -> Vec<u8> {
        let body = self.body();
        let total = WL_HDR_LEN + body.len() + WL_CRC_LEN;

        let mut w = ByteWriter::new();
        w.write(&self.type_tag());
        w.write(&(total as u32));
        w.write_bytes(&body);

        let mut hasher = crc32fast::Hasher::new();
        let head = w.to_bytes();
        hasher.update(&head);
        let crc = hasher.finalize();

        let mut out = head;
        out.extend_from_slice(&crc.to_le_bytes());
        out
    }

    /// Decode one record from `buf`. Returns the record and its total
    /// length, or `None` at the EOF sentinel or on a torn/invalid tail.
    fn decode(buf: &[u8]) -> Option<(WalRecord, usize)> {
        if buf.is_empty() || buf[0] == WL_EOF || buf[0] == 0 {
            return None;
        }
        if buf.len() < WL_HDR_LEN {
            return None;
        }

        let tag = buf[0];
        let total = u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
        if total < WL_HDR_LEN + WL_CRC_LEN || total > buf.len() {
            return None;
        }

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&buf[..total - WL_CRC_LEN]);
        let crc = hasher.finalize();
        let stored = u32::from_le_bytes([
            buf[total - 4],
            buf[total - 3],
            buf[total - 2],
            buf[total - 1],
        ]);
        if crc != stored {
            return None;
        }

        let mut r = Cursor::new(&buf[WL_HDR_LEN..total - WL_CRC_LEN]);
        let rec = match tag {
            WL_BEGIN => WalRecord::Begin {
                tid: read_into(&mut r).ok()?,
            },
            WL_COMMIT => WalRecord::Commit {
                tid: read_into(&mut r).ok()?,
                prev: read_into(&mut r).ok()?,
            },
            WL_END => WalRecord::End {
                tid: read_into(&mut r).ok()?,
                prev: read_into(&mut r).ok()?,
            },
            WL_UPDATE => WalRecord::Update {
                tid: read_into(&mut r).ok()?,
                prev: read_into(&mut r).ok()?,
                pg: read_into(&mut r).ok()?,
                undo: Page::from_bytes(&read_exact(&mut r, PAGE_SIZE).ok()?),
                redo: Page::from_bytes(&read_exact(&mut r, PAGE_SIZE).ok()?),
            },
            WL_CLR => WalRecord::Clr {
                tid: read_into(&mut r).ok()?,
                prev: read_into(&mut r).ok()?,
                pg: read_into(&mut r).ok()?,
                undo_next: read_into(&mut r).ok()?,
                redo: Page::from_bytes(&read_exact(&mut r, PAGE_SIZE).ok()?),
            },
            WL_CKPT_BEGIN => WalRecord::CkptBegin,
            WL_CKPT_END => {
                let natt: u32 = read_into(&mut r).ok()?;
                let mut att = Vec::with_capacity(natt as usize);
                for _ in 0..natt {
                    att.push(TxnSnapshot {
                        tid: read_into(&mut r).ok()?,
                        state: TxnState::from_u8(read_into(&mut r).ok()?).ok()?,
                        last_lsn: read_into(&mut r).ok()?,
                        undo_next_lsn: read_into(&mut r).ok()?,
                    });
                }
                let ndpt: u32 = read_into(&mut r).ok()?;
                let mut dpt = Vec::with_capacity(ndpt as usize);
                for _ in 0..ndpt {
                    let pg: Pgno = read_into(&mut r).ok()?;
                    let rec_lsn: Lsn = read_into(&mut r).ok()?;
                    dpt.push((pg, rec_lsn));
                }
                WalRecord::CkptEnd { att, dpt }
            }
            _ => return None,
        };

        Some((rec, total))
    }
}

/// The write-ahead log. Appended records sit in a volatile tail buffer
/// until `flush_to` makes them durable; the durable prefix of the file
/// always ends with the single-byte EOF sentinel, overwritten by the next
/// flush.
pub struct Wal {
    file: File,
    /// File length of the durable, validated prefix. Every record whose
    /// LSN is below this mark is on disk.
    base: u64,
    /// Appended records awaiting flush.
    tail: Vec<u8>,
    /// Forward-scan cursor for recovery.
    read_pos: u64,
    /// End of the last valid record seen by the scan.
    valid_end: u64,
}

impl Wal {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        Ok(Self {
            file,
            base: 0,
            tail: Vec::new(),
            read_pos: 0,
            valid_end: 0,
        })
    }

    /// Append a record, returning its LSN (the byte offset where it
    /// begins). Not durable until `flush_to`.
    pub fn append(&mut self, rec: &WalRecord) -> Result<Lsn> {
        let lsn = self.base + self.tail.len() as u64;
        self.tail.extend_from_slice(&rec.encode());
        debug!("wal append {} at lsn {}", rec.type_name(), lsn);
        Ok(lsn)
    }

    /// Everything strictly below this mark is durable.
    pub fn flushed_lsn(&self) -> Lsn {
        self.base
    }

    /// LSN the next append will receive.
    pub fn end_lsn(&self) -> Lsn {
        self.base + self.tail.len() as u64
    }

    /// Make all records up to (and including) `lsn` durable. The tail is
    /// flushed wholesale: flushing more than asked is always safe.
    pub fn flush_to(&mut self, lsn: Lsn) -> Result<()> {
        if lsn < self.base || self.tail.is_empty() {
            return Ok(());
        }
        self.flush_all()
    }

    pub fn flush_all(&mut self) -> Result<()> {
        if self.tail.is_empty() {
            return Ok(());
        }
        let mut out = std::mem::replace(&mut self.tail, Vec::new());
        out.push(WL_EOF);
        self.file.write_all_at(&out, self.base)?;
        self.file.sync_data()?;
        self.base += (out.len() - 1) as u64;
        Ok(())
    }

    /// Read one whole record out of the file at `ofst`, using the length
    /// header to size the read. Returns `None` at the EOF sentinel or on
    /// a torn/oversized record.
    fn read_record_at(&self, ofst: u64) -> Result<Option<(WalRecord, usize)>> {
        let flen = self.file.metadata()?.len();
        if ofst >= flen || flen - ofst < WL_HDR_LEN as u64 {
            return Ok(None);
        }

        let mut hdr = [0u8; WL_HDR_LEN];
        self.file.read_exact_at(&mut hdr, ofst)?;
        if hdr[0] == WL_EOF || hdr[0] == 0 {
            return Ok(None);
        }

        let total = u32::from_le_bytes([hdr[1], hdr[2], hdr[3], hdr[4]]) as u64;
        if total > WL_MAX_RECORD as u64 || ofst + total > flen {
            return Ok(None);
        }

        let mut buf = vec![0u8; total as usize];
        self.file.read_exact_at(&mut buf, ofst)?;
        Ok(WalRecord::decode(&buf))
    }

    /// Scan the next record from the durable log. Returns `None` at the
    /// EOF sentinel or at a torn tail record.
    pub fn read_next(&mut self) -> Result<Option<(Lsn, WalRecord)>> {
        match self.read_record_at(self.read_pos)? {
            Some((rec, len)) => {
                let lsn = self.read_pos;
                self.read_pos += len as u64;
                self.valid_end = self.read_pos;
                Ok(Some((lsn, rec)))
            }
            None => Ok(None),
        }
    }

    /// Reposition the forward scan.
    pub fn seek_read(&mut self, lsn: Lsn) {
        self.read_pos = lsn;
    }

    /// Random-access read of one record, served from the volatile tail
    /// when the record has not been flushed yet.
    pub fn pread(&self, lsn: Lsn) -> Result<WalRecord> {
        if lsn >= self.base {
            let ofst = (lsn - self.base) as usize;
            if ofst >= self.tail.len() {
                return Err(Error::new(
                    ErrorKind::Corrupt,
                    &format!("wal pread at {} beyond log end", lsn),
                ));
            }
            return WalRecord::decode(&self.tail[ofst..])
                .map(|(rec, _)| rec)
                .ok_or_else(|| {
                    Error::new(ErrorKind::Corrupt, &format!("bad wal record at {}", lsn))
                });
        }

        self.read_record_at(lsn)?
            .map(|(rec, _)| rec)
            .ok_or_else(|| Error::new(ErrorKind::Corrupt, &format!("bad wal record at {}", lsn)))
    }

    /// Position the log for appending after a read scan: the tail begins
    /// where the last valid record ended.
    pub fn write_mode(&mut self) {
        self.base = self.valid_end;
        self.tail.clear();
    }

    /// Truncate the log (recovery finalization).
    pub fn reset(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        self.file.write_all_at(&[WL_EOF], 0)?;
        self.file.sync_data()?;
        self.base = 0;
        self.tail.clear();
        self.read_pos = 0;
        self.valid_end = 0;
        Ok(())
    }

    /// Dump the durable log for debugging.
    pub fn show_contents(&mut self) -> Result<()> {
        let saved = self.read_pos;
        self.read_pos = 0;

        let mut depiction = String::new();
        while let Some((lsn, rec)) = self.read_next()? {
            depiction.push_str(&format!("├── {}-[lsn {}]\n", rec.type_name(), lsn));
            match &rec {
                WalRecord::Update { tid, pg, undo, redo, .. } => {
                    depiction.push_str(&format!("│   ├── tid: {}, pg: {}\n", tid, pg));
                    depiction.push_str(&format!(
                        "│   ├── undo: {}...\n",
                        hex::encode(&undo.bytes()[..16])
                    ));
                    depiction.push_str(&format!(
                        "│   └── redo: {}...\n",
                        hex::encode(&redo.bytes()[..16])
                    ));
                }
                WalRecord::Clr { tid, pg, undo_next, .. } => {
                    depiction.push_str(&format!(
                        "│   └── tid: {}, pg: {}, undo_next: {}\n",
                        tid, pg, undo_next
                    ));
                }
                _ => {
                    if let Some(tid) = rec.tid() {
                        depiction.push_str(&format!("│   └── tid: {}\n", tid));
                    }
                }
            }
        }

        debug!("wal contents:\n{}", depiction);
        self.read_pos = saved;
        Ok(())
    }
}
