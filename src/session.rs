//! Device sessions: queue ownership and the event multiplexer.
//!
//! A [`DeviceSession`] owns every named queue of one active device
//! connection. Queues are created in bulk when the session starts a
//! compiled pipeline and cleared only at close; during normal operation the
//! queue maps are effectively immutable, so lookups need no locking.
//!
//! The event multiplexer answers "which of these output queues just
//! received something" without polling: every output queue carries an
//! arrival callback that pushes the queue's name into one bounded,
//! session-wide FIFO, and [`queue_events`](DeviceSession::queue_events)
//! blocks on that FIFO under a single mutex and condition variable. The
//! FIFO is a best-effort notification channel: on overflow the oldest
//! entries are evicted, and consumers still pop the actual queue for data.

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::message::{MessageCodec, RawCodec};
use crate::pipeline::PipelineDescription;
use crate::queue::{CallbackId, InputQueue, OutputQueue, DEFAULT_CAPACITY};
use crate::record::{RecordController, RecordState};
use crate::transport::Transport;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Maximum entries buffered by a session's event queue; pushing beyond it
/// evicts the oldest entries first.
pub const EVENT_QUEUE_MAXIMUM_SIZE: usize = 2048;

struct EventHubState {
    events: VecDeque<String>,
    shutdown: bool,
}

/// Session-wide arrival notification FIFO, shared by all output queues.
struct EventHub {
    state: Mutex<EventHubState>,
    available: Condvar,
}

impl EventHub {
    fn new() -> Self {
        Self {
            state: Mutex::new(EventHubState {
                events: VecDeque::new(),
                shutdown: false,
            }),
            available: Condvar::new(),
        }
    }

    fn push(&self, name: String) {
        {
            let mut state = self.state.lock().unwrap();
            if state.events.len() >= EVENT_QUEUE_MAXIMUM_SIZE {
                // Evict exactly enough oldest entries to fit this one.
                let num_to_remove = state.events.len() - EVENT_QUEUE_MAXIMUM_SIZE + 1;
                state.events.drain(..num_to_remove);
                metrics::counter!(crate::observability::EVENTS_EVICTED)
                    .increment(num_to_remove as u64);
            }
            state.events.push_back(name);
        }
        self.available.notify_all();
    }

    fn shutdown(&self) {
        self.state.lock().unwrap().shutdown = true;
        self.available.notify_all();
    }
}

/// An active connection to a device: the full set of named queues for one
/// started pipeline, plus the event multiplexer and record controller.
///
/// Dropping the session closes it.
pub struct DeviceSession {
    transport: Arc<dyn Transport>,
    outputs: HashMap<String, Arc<OutputQueue>>,
    inputs: HashMap<String, Arc<InputQueue>>,
    // Declaration order, for stable name listings.
    output_names: Vec<String>,
    input_names: Vec<String>,
    event_hub: Arc<EventHub>,
    event_callback_ids: HashMap<String, CallbackId>,
    recorder: Mutex<RecordController>,
    closed: AtomicBool,
}

impl DeviceSession {
    /// Start a session over `transport` for a compiled pipeline, using the
    /// default record codec.
    ///
    /// Opens one queue per declared stream, wires arrival callbacks into
    /// the event queue, and starts record threads if the configuration
    /// enables them. Fails with [`Error::DuplicateStream`] when two
    /// declared streams share a name.
    pub fn start(
        transport: Arc<dyn Transport>,
        pipeline: &PipelineDescription,
        config: &SessionConfig,
    ) -> Result<Self> {
        Self::start_with_codec(transport, pipeline, config, Arc::new(RawCodec))
    }

    /// [`start`](Self::start) with an explicit record codec.
    pub fn start_with_codec(
        transport: Arc<dyn Transport>,
        pipeline: &PipelineDescription,
        config: &SessionConfig,
        codec: Arc<dyn MessageCodec>,
    ) -> Result<Self> {
        let event_hub = Arc::new(EventHub::new());

        let mut inputs = HashMap::new();
        let mut input_names = Vec::new();
        for stream in &pipeline.inputs {
            if inputs.contains_key(&stream.name) {
                return Err(Error::DuplicateStream(stream.name.clone()));
            }
            let sender = transport.open_input(&stream.name, stream.max_data_size)?;
            inputs.insert(
                stream.name.clone(),
                InputQueue::new(sender, DEFAULT_CAPACITY, true, stream.max_data_size),
            );
            input_names.push(stream.name.clone());
        }

        let mut outputs = HashMap::new();
        let mut output_names = Vec::new();
        let mut event_callback_ids = HashMap::new();
        for stream in &pipeline.outputs {
            if outputs.contains_key(&stream.name) {
                return Err(Error::DuplicateStream(stream.name.clone()));
            }
            let receiver = transport.open_output(&stream.name)?;
            let queue = OutputQueue::new(receiver, DEFAULT_CAPACITY, true);

            // Every inbound arrival notifies the session's event queue.
            let hub = Arc::clone(&event_hub);
            let id = queue.add_callback(move |name, _| hub.push(name.to_string()));
            event_callback_ids.insert(stream.name.clone(), id);

            outputs.insert(stream.name.clone(), queue);
            output_names.push(stream.name.clone());
        }

        let record_sources: Vec<Arc<OutputQueue>> = pipeline
            .outputs
            .iter()
            .filter(|s| s.record_source)
            .filter_map(|s| outputs.get(&s.name).cloned())
            .collect();
        let recorder =
            RecordController::start(config, &transport.device_id(), &record_sources, codec);

        tracing::debug!(
            "session started: {} input(s), {} output(s), device '{}'",
            input_names.len(),
            output_names.len(),
            transport.device_id()
        );

        Ok(Self {
            transport,
            outputs,
            inputs,
            output_names,
            input_names,
            event_hub,
            event_callback_ids,
            recorder: Mutex::new(recorder),
            closed: AtomicBool::new(false),
        })
    }

    /// Unique identifier of the connected device.
    pub fn device_id(&self) -> String {
        self.transport.device_id()
    }

    /// Look up an output queue by stream name.
    pub fn output_queue(&self, name: &str) -> Result<Arc<OutputQueue>> {
        self.outputs
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    /// Look up an output queue and reconfigure its capacity and policy.
    pub fn output_queue_with(
        &self,
        name: &str,
        capacity: usize,
        blocking: bool,
    ) -> Result<Arc<OutputQueue>> {
        let queue = self.output_queue(name)?;
        queue.set_capacity(capacity);
        queue.set_blocking(blocking);
        Ok(queue)
    }

    /// Look up an input queue by stream name.
    pub fn input_queue(&self, name: &str) -> Result<Arc<InputQueue>> {
        self.inputs
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    /// Look up an input queue and reconfigure its capacity and policy.
    pub fn input_queue_with(
        &self,
        name: &str,
        capacity: usize,
        blocking: bool,
    ) -> Result<Arc<InputQueue>> {
        let queue = self.input_queue(name)?;
        queue.set_capacity(capacity);
        queue.set_blocking(blocking);
        Ok(queue)
    }

    /// Names of all output queues, in declaration order.
    pub fn output_queue_names(&self) -> Vec<String> {
        self.output_names.clone()
    }

    /// Names of all input queues, in declaration order.
    pub fn input_queue_names(&self) -> Vec<String> {
        self.input_names.clone()
    }

    /// Wait for arrival events on the named output queues.
    ///
    /// Validates every requested name upfront (fails fast with
    /// [`Error::NotFound`], before blocking). Then removes matching entries
    /// from the event queue in queue order, up to `max_events`, waiting up
    /// to `timeout` (`None` = wait forever) for the first match. Matched
    /// names may interleave across the requested streams; duplicates mean
    /// multiple arrivals. Returns the (possibly empty) matches collected so
    /// far on timeout or session close.
    pub fn queue_events(
        &self,
        queue_names: &[impl AsRef<str>],
        max_events: usize,
        timeout: Option<Duration>,
    ) -> Result<Vec<String>> {
        // Fail fast on unknown names, before any blocking.
        for name in queue_names {
            if !self.outputs.contains_key(name.as_ref()) {
                return Err(Error::NotFound(name.as_ref().to_string()));
            }
        }
        if max_events == 0 {
            return Ok(Vec::new());
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        let mut found = Vec::new();
        let mut state = self.event_hub.state.lock().unwrap();
        loop {
            // Scan in queue order, removing every match.
            let mut i = 0;
            while i < state.events.len() {
                let matches = queue_names.iter().any(|n| n.as_ref() == state.events[i]);
                if matches {
                    if let Some(event) = state.events.remove(i) {
                        found.push(event);
                    }
                    if found.len() >= max_events {
                        return Ok(found);
                    }
                } else {
                    i += 1;
                }
            }
            if !found.is_empty() || state.shutdown {
                return Ok(found);
            }
            state = match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return Ok(found);
                    }
                    let (s, _) = self.event_hub.available.wait_timeout(state, d - now).unwrap();
                    s
                }
                None => self.event_hub.available.wait(state).unwrap(),
            };
        }
    }

    /// [`queue_events`](Self::queue_events) across all output queues.
    pub fn queue_events_all(
        &self,
        max_events: usize,
        timeout: Option<Duration>,
    ) -> Result<Vec<String>> {
        self.queue_events(&self.output_names, max_events, timeout)
    }

    /// Wait for a single arrival event on the named output queues.
    /// `Ok(None)` on timeout.
    pub fn queue_event(
        &self,
        queue_names: &[impl AsRef<str>],
        timeout: Option<Duration>,
    ) -> Result<Option<String>> {
        let mut events = self.queue_events(queue_names, 1, timeout)?;
        Ok(events.pop())
    }

    /// Wait for a single arrival event on any output queue.
    pub fn queue_event_any(&self, timeout: Option<Duration>) -> Result<Option<String>> {
        let mut events = self.queue_events_all(1, timeout)?;
        Ok(events.pop())
    }

    /// Current record/replay state.
    pub fn record_state(&self) -> RecordState {
        self.recorder.lock().unwrap().state()
    }

    /// Whether record and replay paths were configured together (both are
    /// disabled when so).
    pub fn config_conflict(&self) -> bool {
        self.recorder.lock().unwrap().config_conflict()
    }

    /// Names of the streams actually being captured to files.
    pub fn recorded_streams(&self) -> Vec<String> {
        self.recorder.lock().unwrap().recorded_streams()
    }

    /// Check if the session has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close the session. Idempotent.
    ///
    /// Ordering matters here: first the event callbacks are removed so no
    /// new events are generated, then the transport closes, then every
    /// queue closes (unblocking suspended pops and pushes and any
    /// `queue_events` waiter), and finally the record threads are stopped
    /// and joined after draining their queues' remaining buffered content.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!("closing session for device '{}'", self.transport.device_id());

        for (name, id) in &self.event_callback_ids {
            if let Some(queue) = self.outputs.get(name) {
                queue.remove_callback(*id);
            }
        }

        self.transport.close();

        for name in &self.output_names {
            self.outputs[name].close();
        }
        for name in &self.input_names {
            self.inputs[name].close();
        }
        self.event_hub.shutdown();

        // Record threads drain what is left in their queues, then exit;
        // files close with the threads, before the joins return.
        self.recorder.lock().unwrap().stop();

        for name in &self.output_names {
            self.outputs[name].join_reader();
        }
        for name in &self.input_names {
            self.inputs[name].join_writer();
        }
        tracing::debug!("session closed");
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.close();
    }
}
