//! Coordination primitives: flags, tracked values, locks.

mod flag;
mod lock;
mod tracked;

pub use flag::Flag;
pub use lock::{Lock, LockGuard};
pub use tracked::{Operand, Tracked};
