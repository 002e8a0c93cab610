//! Internal utilities: the record arena and the time queue.

mod arena;
mod timeq;

pub use arena::{Arena, ArenaIndex};
pub use timeq::TimeQueue;
