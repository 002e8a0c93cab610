//! Message streams: broadcast channels and anycast queues.
//!
//! A [`Channel`] hands every message to all receivers pending at that
//! moment and buffers nothing; a [`Queue`] buffers messages and hands each
//! to exactly one receiver, first come first served. Both report
//! [`StreamClosed`](crate::StreamClosed) after closing, except that a queue
//! first drains what it buffered.

use crate::cx::Sim;
use crate::error::{Fault, StreamClosed};
use crate::kernel::wake::WakeToken;
use crate::kernel::Handle;
use crate::notify::{Hibernate, Waiter};
use crate::tracing_compat::trace;
use core::fmt;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

// ---------------------------------------------------------------------------
// Broadcast channel
// ---------------------------------------------------------------------------

struct RecvSlot<T> {
    waiter: Waiter,
    cell: Rc<RefCell<Option<T>>>,
}

struct ReaderEntry<T> {
    buffer: Rc<RefCell<VecDeque<T>>>,
    waiter: Option<Waiter>,
}

struct ChannelState<T> {
    pending: Vec<RecvSlot<T>>,
    readers: Vec<ReaderEntry<T>>,
    closed: bool,
}

/// Unbuffered stream that broadcasts every message to all consumers.
///
/// `put` delivers a clone of the message to every receiver waiting at that
/// instant and to every registered [`reader`](Self::reader); consumers not
/// waiting miss the message. Senders never block.
pub struct Channel<T> {
    state: Rc<RefCell<ChannelState<T>>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T> Default for Channel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Channel")
            .field("pending", &state.pending.len())
            .field("readers", &state.readers.len())
            .field("closed", &state.closed)
            .finish()
    }
}

impl<T> Channel<T> {
    /// Creates an open channel.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(ChannelState {
                pending: Vec::new(),
                readers: Vec::new(),
                closed: false,
            })),
        }
    }

    /// Whether the channel has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }

    /// Closes the channel, waking every pending receiver into
    /// [`StreamClosed`](crate::StreamClosed).
    pub fn close(&self, sim: &Sim) {
        let mut state = self.state.borrow_mut();
        if state.closed {
            return;
        }
        state.closed = true;
        let mut core = sim.rt().borrow_mut();
        for slot in state.pending.drain(..) {
            core.schedule_task(slot.waiter.task, &slot.waiter.token);
        }
        for reader in &mut state.readers {
            if let Some(waiter) = reader.waiter.take() {
                core.schedule_task(waiter.task, &waiter.token);
            }
        }
        trace!("channel closed");
    }
}

impl<T: Clone + 'static> Channel<T> {
    /// Broadcasts a message to every consumer pending right now.
    pub async fn put(&self, sim: &Sim, item: T) -> Result<(), Fault> {
        {
            let mut state = self.state.borrow_mut();
            if state.closed {
                return Err(StreamClosed.into());
            }
            let mut core = sim.rt().borrow_mut();
            for slot in state.pending.drain(..) {
                *slot.cell.borrow_mut() = Some(item.clone());
                core.schedule_task(slot.waiter.task, &slot.waiter.token);
            }
            for reader in &mut state.readers {
                reader.buffer.borrow_mut().push_back(item.clone());
                if let Some(waiter) = reader.waiter.take() {
                    core.schedule_task(waiter.task, &waiter.token);
                }
            }
        }
        sim.postpone().await
    }

    /// Receives the next message broadcast after this call.
    pub async fn recv(&self, sim: &Sim) -> Result<T, Fault> {
        if self.state.borrow().closed {
            return Err(StreamClosed.into());
        }
        let token = WakeToken::new();
        let cell = Rc::new(RefCell::new(None));
        self.state.borrow_mut().pending.push(RecvSlot {
            waiter: Waiter {
                task: sim.task(),
                token: token.clone(),
            },
            cell: cell.clone(),
        });
        let registered = SlotGuard {
            state: self.state.clone(),
            token: token.clone(),
        };
        Hibernate::new(sim.rt().clone(), sim.task(), token).await?;
        drop(registered);
        let value = cell.borrow_mut().take();
        match value {
            Some(value) => Ok(value),
            // Woken by close, not by a message.
            None => Err(StreamClosed.into()),
        }
    }

    /// Registers a buffering subscription.
    ///
    /// Unlike bare [`recv`](Self::recv), a reader keeps messages broadcast
    /// while its consumer is busy elsewhere, so iteration misses nothing
    /// from registration on.
    #[must_use]
    pub fn reader(&self) -> ChannelReader<T> {
        let buffer = Rc::new(RefCell::new(VecDeque::new()));
        self.state.borrow_mut().readers.push(ReaderEntry {
            buffer: buffer.clone(),
            waiter: None,
        });
        ChannelReader {
            channel: self.clone(),
            buffer,
        }
    }
}

/// Removes a pending receive slot if it is still registered.
struct SlotGuard<T> {
    state: Rc<RefCell<ChannelState<T>>>,
    token: WakeToken,
}

impl<T> Drop for SlotGuard<T> {
    fn drop(&mut self) {
        self.state
            .borrow_mut()
            .pending
            .retain(|slot| !slot.waiter.token.ptr_eq(&self.token));
    }
}

/// A buffering subscription to a [`Channel`].
pub struct ChannelReader<T> {
    channel: Channel<T>,
    buffer: Rc<RefCell<VecDeque<T>>>,
}

impl<T: Clone + 'static> ChannelReader<T> {
    /// Returns the next buffered message, suspending while the buffer is
    /// empty. `Ok(None)` signals that the channel closed and the buffer is
    /// drained.
    pub async fn next(&mut self, sim: &Sim) -> Result<Option<T>, Fault> {
        loop {
            if let Some(value) = self.buffer.borrow_mut().pop_front() {
                return Ok(Some(value));
            }
            if self.channel.state.borrow().closed {
                return Ok(None);
            }
            let token = WakeToken::new();
            {
                let mut state = self.channel.state.borrow_mut();
                if let Some(entry) = state
                    .readers
                    .iter_mut()
                    .find(|entry| Rc::ptr_eq(&entry.buffer, &self.buffer))
                {
                    entry.waiter = Some(Waiter {
                        task: sim.task(),
                        token: token.clone(),
                    });
                }
            }
            Hibernate::new(sim.rt().clone(), sim.task(), token).await?;
        }
    }
}

impl<T> Drop for ChannelReader<T> {
    fn drop(&mut self) {
        self.channel
            .state
            .borrow_mut()
            .readers
            .retain(|entry| !Rc::ptr_eq(&entry.buffer, &self.buffer));
    }
}

impl<T> fmt::Debug for ChannelReader<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelReader")
            .field("buffered", &self.buffer.borrow().len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Anycast queue
// ---------------------------------------------------------------------------

struct QueueState<T> {
    buffer: VecDeque<T>,
    waiters: VecDeque<Waiter>,
    closed: bool,
}

/// Buffered stream that anycasts each message to one consumer.
///
/// Messages queue up; each `put` wakes at most the oldest waiting consumer.
/// Closing drains the buffer to subsequent `get`s before reporting
/// [`StreamClosed`](crate::StreamClosed).
pub struct Queue<T> {
    state: Rc<RefCell<QueueState<T>>>,
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Queue")
            .field("buffered", &state.buffer.len())
            .field("waiters", &state.waiters.len())
            .field("closed", &state.closed)
            .finish()
    }
}

impl<T> Queue<T> {
    /// Creates an open, empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(QueueState {
                buffer: VecDeque::new(),
                waiters: VecDeque::new(),
                closed: false,
            })),
        }
    }

    /// Whether the queue has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }

    /// Closes the queue. Buffered messages remain retrievable; waiters
    /// beyond them observe [`StreamClosed`](crate::StreamClosed).
    pub fn close(&self, sim: &Sim) {
        let mut state = self.state.borrow_mut();
        if state.closed {
            return;
        }
        state.closed = true;
        let mut core = sim.rt().borrow_mut();
        while let Some(waiter) = state.waiters.pop_front() {
            core.schedule_task(waiter.task, &waiter.token);
        }
        trace!("queue closed");
    }
}

impl<T: 'static> Queue<T> {
    /// Enqueues a message, waking the oldest waiting consumer.
    pub async fn put(&self, sim: &Sim, item: T) -> Result<(), Fault> {
        {
            let mut state = self.state.borrow_mut();
            if state.closed {
                return Err(StreamClosed.into());
            }
            state.buffer.push_back(item);
            wake_next(&mut state, sim.rt());
        }
        sim.postpone().await
    }

    /// Dequeues the next message. Returns synchronously while messages are
    /// buffered; otherwise suspends until one arrives or the queue closes.
    pub async fn get(&self, sim: &Sim) -> Result<T, Fault> {
        loop {
            let token = WakeToken::new();
            {
                let mut state = self.state.borrow_mut();
                if let Some(value) = state.buffer.pop_front() {
                    return Ok(value);
                }
                if state.closed {
                    return Err(StreamClosed.into());
                }
                state.waiters.push_back(Waiter {
                    task: sim.task(),
                    token: token.clone(),
                });
            }
            let registered = QueueWaitGuard {
                state: self.state.clone(),
                rt: sim.rt().clone(),
                token: token.clone(),
                armed: true,
            };
            Hibernate::new(sim.rt().clone(), sim.task(), token).await?;
            let mut registered = registered;
            registered.armed = false;
            // Woken: either a message is buffered for us or the queue
            // closed; loop to find out.
        }
    }
}

/// Wakes the oldest live waiter, discarding stale entries.
fn wake_next<T>(state: &mut QueueState<T>, rt: &Handle) {
    let mut core = rt.borrow_mut();
    while let Some(waiter) = state.waiters.pop_front() {
        if core.schedule_task(waiter.task, &waiter.token) {
            return;
        }
    }
}

/// Cleans up a cancelled `get`: if this consumer was already designated to
/// take a message, pass the wake on to the next waiter.
struct QueueWaitGuard<T> {
    state: Rc<RefCell<QueueState<T>>>,
    rt: Handle,
    token: WakeToken,
    armed: bool,
}

impl<T> Drop for QueueWaitGuard<T> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.state.borrow_mut();
        let was_designated = !state
            .waiters
            .iter()
            .any(|w| w.token.ptr_eq(&self.token));
        state.waiters.retain(|w| !w.token.ptr_eq(&self.token));
        if was_designated && !state.buffer.is_empty() {
            wake_next(&mut state, &self.rt);
        }
    }
}
