//! The variable directory: `name → (rope root, type string, total size)`
//! over hash bucket pages. Collisions chain through var-page `next`
//! pointers; oversized name+type payloads continue into var-tail pages.

use std::io::Cursor;

use log::debug;

use crate::{
    error::{Error, ErrorKind, Result},
    io::Decodeable,
    lock::{LockKind, LockMode},
    storage::{
        page::{
            data_list, inner_node, root_page,
            var_hash_page::{self, bucket_of},
            var_page::{self, tail, MAX_TSTR, MAX_VSTR, VP_DATA_SIZE},
            PageKind,
        },
        pager::Pager,
        txn_table::Txn,
        Pgno, NULL_PGNO,
    },
    value_type::ValueType,
};

/// An opened variable. Mutating cursor operations change `root` and
/// `total_size`; `save_variable` writes them back.
#[derive(Debug, Clone)]
pub struct Variable {
    pub vp_pgno: Pgno,
    pub root: Pgno,
    pub total_size: u64,
    pub name: String,
    pub vtype: ValueType,
}

const VAR_MASK: u8 = PageKind::Var as u8;
const TAIL_MASK: u8 = PageKind::VarTail as u8;

/// Read a var page's full name+type payload, following overflow tails.
fn read_payload(pager: &Pager, vp_pgno: Pgno) -> Result<(Vec<u8>, Pgno, Pgno, u64, usize)> {
    let vp = pager.get(VAR_MASK, vp_pgno)?;
    var_page::validate(&vp.ro())?;

    let vlen = var_page::vlen(&vp.ro());
    let tlen = var_page::tlen(&vp.ro());
    let want = vlen + tlen;

    let mut payload = Vec::with_capacity(want);
    payload.extend_from_slice(var_page::data(&vp.ro()));

    let mut tail_pg = var_page::ovnext(&vp.ro());
    while payload.len() < want {
        if tail_pg == NULL_PGNO {
            return Err(Error::new(
                ErrorKind::Corrupt,
                "var payload ends before its declared length",
            ));
        }
        let th = pager.get(TAIL_MASK, tail_pg)?;
        payload.extend_from_slice(tail::data(&th.ro()));
        tail_pg = tail::next(&th.ro());
    }
    payload.truncate(want);

    let next = var_page::next(&vp.ro());
    let root = var_page::root(&vp.ro());
    let total = var_page::total(&vp.ro());
    Ok((payload, next, root, total, vlen))
}

/// Look a variable up by name. Takes a shared slot lock.
pub fn open_variable(pager: &Pager, tx: &Txn, name: &str) -> Result<Option<Variable>> {
    let bucket = bucket_of(name);
    pager.locks().lock(
        tx.tid(),
        LockKind::VarHashSlot,
        bucket as u64,
        LockMode::Shared,
    )?;

    let root_h = pager.get(PageKind::Root as u8, 0)?;
    let vhp_pg = root_page::var_hash(&root_h.ro());
    drop(root_h);
    if vhp_pg == NULL_PGNO {
        return Ok(None);
    }

    let vhp = pager.get(PageKind::VarHash as u8, vhp_pg)?;
    let mut pg = var_hash_page::slot(&vhp.ro(), bucket);
    drop(vhp);

    while pg != NULL_PGNO {
        let (payload, next, root, total, vlen) = read_payload(pager, pg)?;
        if &payload[..vlen] == name.as_bytes() {
            let vtype = ValueType::decode_from(&mut Cursor::new(&payload[vlen..]))?;
            return Ok(Some(Variable {
                vp_pgno: pg,
                root,
                total_size: total,
                name: name.to_string(),
                vtype,
            }));
        }
        pg = next;
    }
    Ok(None)
}

/// Create a variable. Fails with `InvalidArgument` if the name is taken.
pub fn create_variable(pager: &Pager, tx: &Txn, name: &str, vtype: &ValueType) -> Result<()> {
    if name.is_empty() || name.len() > MAX_VSTR {
        return Err(Error::new(
            ErrorKind::InvalidArgument,
            &format!("variable name must be 1 to {} bytes", MAX_VSTR),
        ));
    }
    vtype.byte_size()?;
    let type_string = vtype.to_type_string()?;
    if type_string.len() > MAX_TSTR {
        return Err(Error::new(
            ErrorKind::InvalidArgument,
            "type string too long",
        ));
    }

    let bucket = bucket_of(name);
    pager.locks().lock(
        tx.tid(),
        LockKind::VarHashSlot,
        bucket as u64,
        LockMode::Exclusive,
    )?;

    if open_variable(pager, tx, name)?.is_some() {
        return Err(Error::new(
            ErrorKind::InvalidArgument,
            &format!("variable '{}' already exists", name),
        ));
    }

    // Make sure the hash page exists. Mutating the pointer touches page
    // 0, whose writers all serialize on Root exclusive; the pointer is
    // re-read under that lock in case another creator got there first.
    let root_h = pager.get(PageKind::Root as u8, 0)?;
    let mut vhp_pg = root_page::var_hash(&root_h.ro());
    drop(root_h);

    if vhp_pg == NULL_PGNO {
        pager
            .locks()
            .lock(tx.tid(), LockKind::Root, 0, LockMode::Exclusive)?;

        let mut root_h = pager.get(PageKind::Root as u8, 0)?;
        vhp_pg = root_page::var_hash(&root_h.ro());
        if vhp_pg == NULL_PGNO {
            let vhp = pager.new_page(tx, PageKind::VarHash)?;
            vhp_pg = vhp.pgno();
            pager.release(vhp)?;

            pager.make_writable(tx, &mut root_h)?;
            root_page::set_var_hash(root_h.rw(), vhp_pg);
            pager.save(&mut root_h)?;
        }
        drop(root_h);
    }

    // Lay the name+type payload into the var page, overflowing into
    // tails as needed.
    let payload: Vec<u8> = name
        .as_bytes()
        .iter()
        .chain(type_string.iter())
        .copied()
        .collect();

    let mut vp = pager.new_page(tx, PageKind::Var)?;
    var_page::set_vlen(vp.rw(), name.len());
    var_page::set_tlen(vp.rw(), type_string.len());

    let head = payload.len().min(VP_DATA_SIZE);
    var_page::write_data(vp.rw(), &payload[..head]);

    let mut rest = &payload[head..];
    let mut prev_tail: Option<crate::storage::pager::PageHandle> = None;
    while !rest.is_empty() {
        let take = rest.len().min(tail::VT_DATA_SIZE);
        let mut th = pager.new_page(tx, PageKind::VarTail)?;
        tail::write_data(th.rw(), &rest[..take]);
        rest = &rest[take..];

        match prev_tail.take() {
            Some(mut prev) => {
                tail::set_next(prev.rw(), th.pgno());
                pager.release(prev)?;
            }
            None => {
                var_page::set_ovnext(vp.rw(), th.pgno());
            }
        }
        prev_tail = Some(th);
    }
    if let Some(last) = prev_tail.take() {
        pager.release(last)?;
    }

    // Splice into the bucket chain, head first.
    let vhp_h = pager.get(PageKind::VarHash as u8, vhp_pg)?;
    let old_head = var_hash_page::slot(&vhp_h.ro(), bucket);
    drop(vhp_h);

    var_page::set_next(vp.rw(), old_head);
    let vp_pgno = vp.pgno();
    pager.release(vp)?;

    let mut vhp_h = pager.get_writable(tx, PageKind::VarHash as u8, vhp_pg)?;
    var_hash_page::set_slot(vhp_h.rw(), bucket, vp_pgno);
    pager.release(vhp_h)?;

    debug!("variable '{}' created at page {}", name, vp_pgno);
    Ok(())
}

/// Delete a variable: unlink it from its bucket chain and tombstone its
/// var page, tails, and the whole rope tree.
pub fn delete_variable(pager: &Pager, tx: &Txn, name: &str) -> Result<()> {
    let bucket = bucket_of(name);
    pager.locks().lock(
        tx.tid(),
        LockKind::VarHashSlot,
        bucket as u64,
        LockMode::Exclusive,
    )?;

    let var = open_variable(pager, tx, name)?.ok_or_else(|| {
        Error::new(
            ErrorKind::InvalidArgument,
            &format!("no such variable '{}'", name),
        )
    })?;
    pager.locks().lock(
        tx.tid(),
        LockKind::Var,
        var.vp_pgno,
        LockMode::Exclusive,
    )?;

    // Unlink from the bucket chain.
    let root_h = pager.get(PageKind::Root as u8, 0)?;
    let vhp_pg = root_page::var_hash(&root_h.ro());
    drop(root_h);

    let vhp_h = pager.get(PageKind::VarHash as u8, vhp_pg)?;
    let head = var_hash_page::slot(&vhp_h.ro(), bucket);
    drop(vhp_h);

    if head == var.vp_pgno {
        let next = var_page::next(&pager.get(VAR_MASK, var.vp_pgno)?.ro());
        let mut vhp_h = pager.get_writable(tx, PageKind::VarHash as u8, vhp_pg)?;
        var_hash_page::set_slot(vhp_h.rw(), bucket, next);
        pager.release(vhp_h)?;
    } else {
        let mut pg = head;
        loop {
            if pg == NULL_PGNO {
                return Err(Error::new(
                    ErrorKind::Corrupt,
                    "variable missing from its bucket chain",
                ));
            }
            let h = pager.get(VAR_MASK, pg)?;
            let next = var_page::next(&h.ro());
            drop(h);
            if next == var.vp_pgno {
                let target = var_page::next(&pager.get(VAR_MASK, var.vp_pgno)?.ro());
                let mut h = pager.get_writable(tx, VAR_MASK, pg)?;
                var_page::set_next(h.rw(), target);
                pager.release(h)?;
                break;
            }
            pg = next;
        }
    }

    // Free the rope tree.
    if var.root != NULL_PGNO {
        pager
            .locks()
            .lock(tx.tid(), LockKind::RpTree, var.root, LockMode::Exclusive)?;
        free_tree(pager, tx, var.root)?;
    }

    // Free the overflow tails.
    let vp = pager.get(VAR_MASK, var.vp_pgno)?;
    let mut tail_pg = var_page::ovnext(&vp.ro());
    drop(vp);
    while tail_pg != NULL_PGNO {
        let th = pager.get(TAIL_MASK, tail_pg)?;
        let next = tail::next(&th.ro());
        pager.delete_and_release(tx, th)?;
        tail_pg = next;
    }

    // Free the var page itself.
    let vp = pager.get(VAR_MASK, var.vp_pgno)?;
    pager.delete_and_release(tx, vp)?;

    debug!("variable '{}' deleted", name);
    Ok(())
}

/// Tombstone every page of a rope tree.
fn free_tree(pager: &Pager, tx: &Txn, root: Pgno) -> Result<()> {
    let mask = PageKind::InnerNode as u8 | PageKind::DataList as u8;
    let mut stack = vec![root];

    while let Some(pg) = stack.pop() {
        let h = pager.get(mask, pg)?;
        if h.ro().kind()? == PageKind::InnerNode {
            for i in 0..inner_node::nkeys(&h.ro()) {
                stack.push(inner_node::child(&h.ro(), i));
            }
        } else {
            debug_assert!(data_list::used(&h.ro()) <= data_list::DL_DATA_SIZE);
        }
        pager.delete_and_release(tx, h)?;
    }
    Ok(())
}

/// Write a variable's root pointer and total size back to its page.
pub fn save_variable(pager: &Pager, tx: &Txn, var: &Variable) -> Result<()> {
    let mut vp = pager.get_writable(tx, VAR_MASK, var.vp_pgno)?;
    var_page::set_root(vp.rw(), var.root);
    var_page::set_total(vp.rw(), var.total_size);
    pager.release(vp)?;
    Ok(())
}
