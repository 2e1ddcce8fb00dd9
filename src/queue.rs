//! Named message queues: the host-side endpoints of device streams.
//!
//! Each declared stream gets one queue for the lifetime of a session. A
//! [`MessageQueue`] is the locking FIFO both directions share: bounded or
//! unbounded, with a block-producer or drop-oldest policy when full, and a
//! callback registry fired once per arriving message. [`OutputQueue`] wraps
//! it with a reader thread that drains the transport; [`InputQueue`] wraps
//! it with a writer thread that forwards host sends to the transport.
//!
//! Callbacks run synchronously on the delivery thread shared by every
//! consumer of the queue; callback bodies must not block.

use crate::error::{Error, Result};
use crate::message::Message;
use crate::transport::{StreamReceiver, StreamSender};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Default queue capacity for newly opened streams.
pub const DEFAULT_CAPACITY: usize = 16;

/// Handle returned by callback registration, usable for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

/// Arrival callback: receives the stream name and a shared view of the
/// message. Runs on the delivery thread; must not block.
pub type MessageCallback = Box<dyn Fn(&str, &Arc<Message>) + Send + Sync + 'static>;

struct QueueState {
    messages: VecDeque<Arc<Message>>,
    /// Maximum buffered messages; 0 means unbounded.
    capacity: usize,
    /// Full-queue policy: block the producer, or evict the oldest entry.
    blocking: bool,
    closed: bool,
    total_arrived: u64,
    total_dropped: u64,
}

impl QueueState {
    fn is_full(&self) -> bool {
        self.capacity != 0 && self.messages.len() >= self.capacity
    }
}

struct CallbackRegistry {
    next_id: u64,
    // Vec keeps registration order for invocation.
    entries: Vec<(CallbackId, MessageCallback)>,
}

/// A bounded or unbounded FIFO of typed messages bound to one named stream.
///
/// FIFO order is preserved end-to-end from arrival to pop. Once closed, all
/// blocked pushes and pops unblock with [`Error::QueueClosed`]; `try_pop`
/// keeps draining already-buffered messages.
pub struct MessageQueue {
    name: String,
    state: Mutex<QueueState>,
    not_empty: Condvar,
    not_full: Condvar,
    callbacks: Mutex<CallbackRegistry>,
}

impl MessageQueue {
    /// Create a queue. `capacity` of 0 means unbounded; `blocking` selects
    /// the full-queue policy (block producer vs. drop oldest).
    pub fn new(name: impl Into<String>, capacity: usize, blocking: bool) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(QueueState {
                messages: VecDeque::with_capacity(capacity.min(1024)),
                capacity,
                blocking,
                closed: false,
                total_arrived: 0,
                total_dropped: 0,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            callbacks: Mutex::new(CallbackRegistry {
                next_id: 0,
                entries: Vec::new(),
            }),
        }
    }

    /// Stream name this queue is bound to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current number of buffered messages.
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().messages.len()
    }

    /// Check if no messages are buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if the queue has been closed.
    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    /// Reconfigure the capacity (0 = unbounded). Messages already buffered
    /// beyond a smaller capacity stay until popped.
    pub fn set_capacity(&self, capacity: usize) {
        let mut state = self.state.lock().unwrap();
        state.capacity = capacity;
        self.not_full.notify_all();
    }

    /// Reconfigure the full-queue policy.
    pub fn set_blocking(&self, blocking: bool) {
        let mut state = self.state.lock().unwrap();
        state.blocking = blocking;
        if !blocking {
            self.not_full.notify_all();
        }
    }

    /// Total messages dropped by the drop-oldest policy.
    pub fn total_dropped(&self) -> u64 {
        self.state.lock().unwrap().total_dropped
    }

    /// Enqueue a message, then invoke the registered callbacks in
    /// registration order.
    ///
    /// With the blocking policy the caller suspends while the queue is
    /// full, failing with [`Error::QueueClosed`] if the queue closes in the
    /// meantime. With the drop policy the oldest entry is evicted to make
    /// room.
    pub fn push(&self, message: Arc<Message>) -> Result<()> {
        // Without a deadline the only non-success outcome is closure.
        self.push_deadline(message, None).map(|_| ())
    }

    /// [`push`](Self::push) with an upper bound on the time spent blocked.
    /// Returns `Ok(false)` on timeout.
    pub fn push_timeout(&self, message: Arc<Message>, timeout: Duration) -> Result<bool> {
        self.push_deadline(message, Some(Instant::now() + timeout))
    }

    /// Enqueue without blocking. Returns `Ok(false)` if the queue is full
    /// under the blocking policy.
    pub fn try_push(&self, message: Arc<Message>) -> Result<bool> {
        {
            let mut state = self.state.lock().unwrap();
            if state.closed {
                return Err(Error::QueueClosed(self.name.clone()));
            }
            if state.is_full() && state.blocking {
                return Ok(false);
            }
            self.enqueue_locked(&mut state, Arc::clone(&message));
        }
        self.run_callbacks(&message);
        Ok(true)
    }

    /// `Ok(true)` once enqueued, `Ok(false)` when the deadline expires
    /// first, `Err(QueueClosed)` when the queue closes while blocked.
    fn push_deadline(&self, message: Arc<Message>, deadline: Option<Instant>) -> Result<bool> {
        {
            let mut state = self.state.lock().unwrap();
            loop {
                if state.closed {
                    return Err(Error::QueueClosed(self.name.clone()));
                }
                if !state.is_full() {
                    break;
                }
                if !state.blocking {
                    // Evict exactly one oldest entry to make room.
                    state.messages.pop_front();
                    state.total_dropped += 1;
                    metrics::counter!(
                        crate::observability::MESSAGES_DROPPED,
                        "queue" => self.name.clone()
                    )
                    .increment(1);
                    tracing::trace!("queue '{}': dropped oldest message", self.name);
                    break;
                }
                state = match deadline {
                    Some(d) => {
                        let now = Instant::now();
                        if now >= d {
                            return Ok(false);
                        }
                        let (s, _) = self.not_full.wait_timeout(state, d - now).unwrap();
                        s
                    }
                    None => self.not_full.wait(state).unwrap(),
                };
            }
            self.enqueue_locked(&mut state, Arc::clone(&message));
        }
        // Message is visible to pop before any callback observes it.
        self.run_callbacks(&message);
        Ok(true)
    }

    fn enqueue_locked(&self, state: &mut QueueState, message: Arc<Message>) {
        state.messages.push_back(message);
        state.total_arrived += 1;
        metrics::counter!(crate::observability::MESSAGES_ARRIVED, "queue" => self.name.clone())
            .increment(1);
        self.not_empty.notify_all();
    }

    fn run_callbacks(&self, message: &Arc<Message>) {
        let callbacks = self.callbacks.lock().unwrap();
        for (_, callback) in &callbacks.entries {
            callback(&self.name, message);
        }
    }

    /// Blocking pop. Suspends until a message is available; fails with
    /// [`Error::QueueClosed`] once the queue is closed and drained.
    pub fn pop(&self) -> Result<Arc<Message>> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(message) = state.messages.pop_front() {
                self.not_full.notify_all();
                return Ok(message);
            }
            if state.closed {
                return Err(Error::QueueClosed(self.name.clone()));
            }
            state = self.not_empty.wait(state).unwrap();
        }
    }

    /// Blocking pop with a timeout. `Ok(None)` on expiry, so timeout and
    /// closure stay distinguishable.
    pub fn pop_timeout(&self, timeout: Duration) -> Result<Option<Arc<Message>>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(message) = state.messages.pop_front() {
                self.not_full.notify_all();
                return Ok(Some(message));
            }
            if state.closed {
                return Err(Error::QueueClosed(self.name.clone()));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let (s, _) = self.not_empty.wait_timeout(state, deadline - now).unwrap();
            state = s;
        }
    }

    /// Non-suspending pop. Keeps returning buffered messages after close
    /// until the queue is drained.
    pub fn try_pop(&self) -> Option<Arc<Message>> {
        let mut state = self.state.lock().unwrap();
        let message = state.messages.pop_front();
        if message.is_some() {
            self.not_full.notify_all();
        }
        message
    }

    /// Register a callback invoked once per arriving message, in arrival
    /// order, after the message is visible to pop.
    pub fn add_callback(
        &self,
        callback: impl Fn(&str, &Arc<Message>) + Send + Sync + 'static,
    ) -> CallbackId {
        let mut callbacks = self.callbacks.lock().unwrap();
        let id = CallbackId(callbacks.next_id);
        callbacks.next_id += 1;
        callbacks.entries.push((id, Box::new(callback)));
        id
    }

    /// Remove a previously registered callback. Returns whether the handle
    /// was still registered.
    pub fn remove_callback(&self, id: CallbackId) -> bool {
        let mut callbacks = self.callbacks.lock().unwrap();
        let before = callbacks.entries.len();
        callbacks.entries.retain(|(cid, _)| *cid != id);
        callbacks.entries.len() != before
    }

    /// Close the queue. Idempotent; wakes every blocked pusher and popper.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return;
        }
        state.closed = true;
        drop(state);
        self.not_empty.notify_all();
        self.not_full.notify_all();
        tracing::debug!("queue '{}' closed", self.name);
    }
}

/// Host-side endpoint of a device-to-host stream.
///
/// Owns the reader thread that drains the transport channel into the queue
/// and fires arrival callbacks.
pub struct OutputQueue {
    queue: Arc<MessageQueue>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl OutputQueue {
    /// Open an output queue over a transport stream and start its reader
    /// thread.
    pub fn new(receiver: StreamReceiver, capacity: usize, blocking: bool) -> Arc<Self> {
        let queue = Arc::new(MessageQueue::new(receiver.name(), capacity, blocking));
        let reader = {
            let queue = Arc::clone(&queue);
            std::thread::Builder::new()
                .name(format!("fl-out-{}", receiver.name()))
                .spawn(move || {
                    tracing::debug!("reader for '{}' started", queue.name());
                    while let Some(message) = receiver.recv() {
                        if queue.push(message).is_err() {
                            break;
                        }
                    }
                    // Transport gone or queue closed: either way the stream
                    // delivers nothing further.
                    queue.close();
                    tracing::debug!("reader for '{}' finished", queue.name());
                })
                .expect("failed to spawn reader thread")
        };
        Arc::new(Self {
            queue,
            reader: Mutex::new(Some(reader)),
        })
    }

    /// Stream name.
    pub fn name(&self) -> &str {
        self.queue.name()
    }

    /// Blocking pop; see [`MessageQueue::pop`].
    pub fn pop(&self) -> Result<Arc<Message>> {
        self.queue.pop()
    }

    /// Blocking pop with timeout; see [`MessageQueue::pop_timeout`].
    pub fn pop_timeout(&self, timeout: Duration) -> Result<Option<Arc<Message>>> {
        self.queue.pop_timeout(timeout)
    }

    /// Non-suspending pop; see [`MessageQueue::try_pop`].
    pub fn try_pop(&self) -> Option<Arc<Message>> {
        self.queue.try_pop()
    }

    /// Register an arrival callback; see [`MessageQueue::add_callback`].
    pub fn add_callback(
        &self,
        callback: impl Fn(&str, &Arc<Message>) + Send + Sync + 'static,
    ) -> CallbackId {
        self.queue.add_callback(callback)
    }

    /// Remove an arrival callback.
    pub fn remove_callback(&self, id: CallbackId) -> bool {
        self.queue.remove_callback(id)
    }

    /// Number of buffered messages.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Check if no messages are buffered.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Check if the queue has been closed.
    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    /// Reconfigure capacity; see [`MessageQueue::set_capacity`].
    pub fn set_capacity(&self, capacity: usize) {
        self.queue.set_capacity(capacity)
    }

    /// Reconfigure the full-queue policy; see [`MessageQueue::set_blocking`].
    pub fn set_blocking(&self, blocking: bool) {
        self.queue.set_blocking(blocking)
    }

    /// Close the queue, unblocking all waiters.
    pub fn close(&self) {
        self.queue.close();
    }

    pub(crate) fn join_reader(&self) {
        if let Some(handle) = self.reader.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

/// Host-side endpoint of a host-to-device stream.
///
/// Sends are buffered through the queue and forwarded to the transport by a
/// writer thread, so `send` observes the queue's capacity and policy rather
/// than the transport's.
pub struct InputQueue {
    queue: Arc<MessageQueue>,
    max_data_size: usize,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl InputQueue {
    /// Open an input queue over a transport stream and start its writer
    /// thread. `max_data_size` of 0 disables the size check.
    pub fn new(
        sender: StreamSender,
        capacity: usize,
        blocking: bool,
        max_data_size: usize,
    ) -> Arc<Self> {
        let queue = Arc::new(MessageQueue::new(sender.name(), capacity, blocking));
        let writer = {
            let queue = Arc::clone(&queue);
            std::thread::Builder::new()
                .name(format!("fl-in-{}", sender.name()))
                .spawn(move || {
                    tracing::debug!("writer for '{}' started", queue.name());
                    loop {
                        let message = match queue.pop() {
                            Ok(message) => message,
                            Err(_) => break,
                        };
                        if let Err(e) = sender.send(message) {
                            tracing::warn!("writer for '{}': {}", queue.name(), e);
                            break;
                        }
                    }
                    queue.close();
                    tracing::debug!("writer for '{}' finished", queue.name());
                })
                .expect("failed to spawn writer thread")
        };
        Arc::new(Self {
            queue,
            max_data_size,
            writer: Mutex::new(Some(writer)),
        })
    }

    /// Stream name.
    pub fn name(&self) -> &str {
        self.queue.name()
    }

    /// Send a message toward the device, observing the queue's capacity
    /// and policy. Fails with [`Error::MessageTooLarge`] if the payload
    /// exceeds the stream's declared maximum.
    pub fn send(&self, message: Arc<Message>) -> Result<()> {
        self.check_size(&message)?;
        self.queue.push(message)
    }

    /// [`send`](Self::send) with an upper bound on the time spent blocked.
    /// Returns `Ok(false)` on timeout.
    pub fn send_timeout(&self, message: Arc<Message>, timeout: Duration) -> Result<bool> {
        self.check_size(&message)?;
        self.queue.push_timeout(message, timeout)
    }

    /// Non-blocking send. Returns `Ok(false)` if the queue is full under
    /// the blocking policy.
    pub fn try_send(&self, message: Arc<Message>) -> Result<bool> {
        self.check_size(&message)?;
        self.queue.try_push(message)
    }

    /// Register a callback fired for every message accepted by `send`.
    pub fn add_callback(
        &self,
        callback: impl Fn(&str, &Arc<Message>) + Send + Sync + 'static,
    ) -> CallbackId {
        self.queue.add_callback(callback)
    }

    /// Remove a send callback.
    pub fn remove_callback(&self, id: CallbackId) -> bool {
        self.queue.remove_callback(id)
    }

    /// Number of messages waiting to be forwarded.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Check if no messages are waiting.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Check if the queue has been closed.
    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    /// Reconfigure capacity; see [`MessageQueue::set_capacity`].
    pub fn set_capacity(&self, capacity: usize) {
        self.queue.set_capacity(capacity)
    }

    /// Reconfigure the full-queue policy; see [`MessageQueue::set_blocking`].
    pub fn set_blocking(&self, blocking: bool) {
        self.queue.set_blocking(blocking)
    }

    /// Close the queue, unblocking all waiters.
    pub fn close(&self) {
        self.queue.close();
    }

    pub(crate) fn join_writer(&self) {
        if let Some(handle) = self.writer.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    fn check_size(&self, message: &Arc<Message>) -> Result<()> {
        if self.max_data_size != 0 && message.len() > self.max_data_size {
            return Err(Error::MessageTooLarge {
                stream: self.queue.name().to_string(),
                size: message.len(),
                limit: self.max_data_size,
            });
        }
        Ok(())
    }
}
