mod cursor;
mod insert;
mod read;
mod rebalance;
mod remove;
mod write;

pub use cursor::{CursorState, RptCursor};
