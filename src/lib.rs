//! musim: a deterministic discrete-event simulation kernel.
//!
//! # Overview
//!
//! musim runs cooperative activities over virtual time. Activities are
//! `async` closures receiving a [`Sim`] capability handle; they suspend on
//! conditions (time comparisons, flags, tracked values, task completion)
//! and the kernel resumes them with strictly deterministic ordering: a FIFO
//! turn queue within an instant, a FIFO bucket per timestamp across
//! instants, subscription order when a notification fires.
//!
//! # Core guarantees
//!
//! - **Determinism**: identical roots and time bound produce identical
//!   observable sequences.
//! - **Structured concurrency**: every task is owned by a scope; a scope
//!   exits only when all of its children are terminal.
//! - **Exception-shaped cancellation**: teardown surfaces as `Err` at the
//!   next suspension point and unwinds through `?`, releasing locks and
//!   resources via drop guards on every exit path.
//! - **Aggregated failure**: concurrent child failures surface as one
//!   [`Concurrent`] with typed matching.
//!
//! # Example
//!
//! ```
//! use musim::Simulation;
//!
//! let mut sim = Simulation::new();
//! sim.spawn::<(), _, _>(|sim| async move {
//!     let mut beats = sim.every_delay(1.0);
//!     loop {
//!         let now = beats.next(&sim).await?;
//!         let _ = now; // tick
//!     }
//! });
//! sim.run_until(5.0).unwrap();
//! ```
//!
//! # Module structure
//!
//! - [`Simulation`]: kernel loop and root scope
//! - [`Sim`]: per-task capability handle (time, waiting, scopes)
//! - [`Cond`]: the condition algebra (`&`, `|`, `!`)
//! - [`Flag`], [`Tracked`], [`Lock`]: coordination primitives
//! - [`Channel`], [`Queue`]: broadcast and anycast streams
//! - [`Resources`], [`Capacities`]: multi-commodity counters
//! - [`Fault`]: the failure taxonomy, with [`Concurrent`] aggregation

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::should_implement_trait)]

mod channel;
mod cx;
mod error;
mod kernel;
mod notify;
mod resources;
mod sync;
mod time;
mod types;
mod util;

pub mod tracing_compat;

pub use channel::{Channel, ChannelReader, Queue};
pub use cx::{Scope, Sim, Task};
pub use error::{
    AppFault, Concurrent, ExitSimulation, Fault, ResourcesUnavailable, ScopeInterrupt,
    StreamClosed, TaskCancelled, TaskClosed, TypeSet, UsageError, VolatileTaskClosed,
};
pub use kernel::Simulation;
pub use notify::condition::Cond;
pub use resources::{Borrowed, Capacities, Resources};
pub use sync::{Flag, Lock, LockGuard, Operand, Tracked};
pub use time::Every;
pub use types::{ScopeId, SimTime, TaskId, TaskState};

#[doc(hidden)]
pub use error::test_support;
