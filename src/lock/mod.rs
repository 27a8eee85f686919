pub mod adaptive_map;
pub mod lock_id;
pub mod lock_table;

pub use lock_id::{LockId, LockKind};
pub use lock_table::{LockMode, LockTable};
