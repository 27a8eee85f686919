use crate::lock::adaptive_map::AdaptiveKey;

/// Every lockable thing in the engine has a typed identity. Kinds without
/// a payload are singletons (the whole database, the root page fields);
/// the rest carry the pgno or slot they guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockKind {
    Db,
    Root,
    FirstTombstone,
    MasterLsn,
    VarHash,
    VarHashSlot,
    Var,
    VarNext,
    RpTree,
    Tombstone,
}

impl LockKind {
    fn tag(self) -> u8 {
        match self {
            LockKind::Db => 0,
            LockKind::Root => 1,
            LockKind::FirstTombstone => 2,
            LockKind::MasterLsn => 3,
            LockKind::VarHash => 4,
            LockKind::VarHashSlot => 5,
            LockKind::Var => 6,
            LockKind::VarNext => 7,
            LockKind::RpTree => 8,
            LockKind::Tombstone => 9,
        }
    }

    /// Does this kind's identity include a payload?
    fn keyed(self) -> bool {
        match self {
            LockKind::Db
            | LockKind::Root
            | LockKind::FirstTombstone
            | LockKind::MasterLsn
            | LockKind::VarHash => false,
            LockKind::VarHashSlot
            | LockKind::Var
            | LockKind::VarNext
            | LockKind::RpTree
            | LockKind::Tombstone => true,
        }
    }

    /// The lock hierarchy: each kind has at most one parent; `Db` is the
    /// root. Acquiring a child implies intent locks up the chain.
    pub fn parent(self) -> Option<LockKind> {
        match self {
            LockKind::Db => None,
            LockKind::Root => Some(LockKind::Db),
            LockKind::FirstTombstone => Some(LockKind::Root),
            LockKind::MasterLsn => Some(LockKind::Root),
            LockKind::VarHash => Some(LockKind::Db),
            LockKind::VarHashSlot => Some(LockKind::VarHash),
            LockKind::Var => Some(LockKind::Db),
            LockKind::VarNext => Some(LockKind::Var),
            LockKind::RpTree => Some(LockKind::Db),
            LockKind::Tombstone => Some(LockKind::Db),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockId {
    kind: LockKind,
    payload: u64,
}

impl LockId {
    pub fn new(kind: LockKind, payload: u64) -> Self {
        // Singleton kinds normalize the payload so equality and hashing
        // stay consistent no matter what the caller passed.
        let payload = if kind.keyed() { payload } else { 0 };
        Self { kind, payload }
    }

    pub fn kind(&self) -> LockKind {
        self.kind
    }

    pub fn payload(&self) -> u64 {
        self.payload
    }

    /// Identity of this lock's parent in the hierarchy. The payload rides
    /// along; singleton parents drop it in the constructor.
    pub fn parent(&self) -> Option<LockId> {
        self.kind.parent().map(|k| LockId::new(k, self.payload))
    }
}

/// FNV-1a over a byte string.
pub fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;

    let mut h = OFFSET;
    for &b in bytes {
        h ^= b as u64;
        h = h.wrapping_mul(PRIME);
    }
    h
}

impl AdaptiveKey for LockId {
    fn hash64(&self) -> u64 {
        let mut code = [0u8; 9];
        code[0] = self.kind.tag();
        let len = if self.kind.keyed() {
            code[1..9].copy_from_slice(&self.payload.to_le_bytes());
            9
        } else {
            1
        };
        fnv1a(&code[..len])
    }
}
