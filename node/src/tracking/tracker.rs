use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use log::{debug, trace};
use parking_lot::{Condvar, Mutex};

/// One-shot callback run when a tracked request receives all of its responses.
pub type MessageCallback = Box<dyn FnOnce() + Send>;

/// The bookkeeping of one in-flight request.
struct Record {
    expected: u32,
    received: u32,
    payloads: Vec<Vec<u8>>,
    callback: Option<MessageCallback>,
    /// Each record gets its own condition so a completion only wakes its own waiter.
    cond: Arc<Condvar>,
    waiting: bool,
    created: Instant,
}

impl Record {
    fn new(expected: u32) -> Self {
        Self {
            expected,
            received: 0,
            payloads: Vec::new(),
            callback: None,
            cond: Arc::new(Condvar::new()),
            waiting: false,
            created: Instant::now(),
        }
    }

    fn is_complete(&self) -> bool {
        self.received >= self.expected
    }
}

struct Tracks {
    records: HashMap<u64, Record>,
    closed: bool,
    last_sweep: Instant,
}

impl Tracks {
    fn new() -> Self {
        Self {
            records: HashMap::new(),
            closed: false,
            last_sweep: Instant::now(),
        }
    }

    /// Drops records nobody waits on anymore once they outlived `retention`.
    ///
    /// Runs at most once every half `retention`.
    fn sweep(&mut self, retention: Duration) {
        if self.last_sweep.elapsed() < retention / 2 {
            return;
        }

        self.last_sweep = Instant::now();
        let before = self.records.len();
        self.records
            .retain(|_, record| record.waiting || record.created.elapsed() < retention);

        let swept = before - self.records.len();
        if swept > 0 {
            debug!(swept = swept; "swept stale request records");
        }
    }
}

/// Correlates outbound requests with their inbound responses.
///
/// Every request gets a process-unique id and a record counting the responses it still
/// expects. A single caller per request may block until the count is reached.
pub struct MessageTracker {
    next_request_id: AtomicU64,
    tracks: Mutex<Tracks>,
    retention: Duration,
}

impl MessageTracker {
    /// Creates a new `MessageTracker`.
    ///
    /// # Arguments
    /// * `retention` - How long a record without a waiter is kept around.
    ///
    /// # Returns
    /// A new `MessageTracker` instance.
    pub fn new(retention: Duration) -> Self {
        Self {
            next_request_id: AtomicU64::new(0),
            tracks: Mutex::new(Tracks::new()),
            retention,
        }
    }

    /// Starts tracking a new request.
    ///
    /// # Arguments
    /// * `expected` - The amount of responses that complete the request.
    ///
    /// # Returns
    /// The request id, never handed out twice by this tracker.
    pub fn add_message_track(&self, expected: u32) -> u64 {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed) + 1;

        let mut tracks = self.tracks.lock();
        tracks.sweep(self.retention);
        tracks.records.insert(request_id, Record::new(expected));

        trace!(request_id = request_id, expected = expected; "tracking request");
        request_id
    }

    /// Counts one response for `request_id`.
    ///
    /// Responses for unknown, already completed or already released requests are ignored.
    pub fn notify_message_arrival(&self, request_id: u64) {
        self.notify_message_arrival_with(request_id, None);
    }

    /// Counts one response for `request_id` and keeps its payload for the waiter.
    ///
    /// # Arguments
    /// * `request_id` - The id carried by the response.
    /// * `payload` - The response's data, if any.
    ///
    /// # Returns
    /// Whether the response was counted.
    pub fn notify_message_arrival_with(&self, request_id: u64, payload: Option<Vec<u8>>) -> bool {
        let callback = {
            let mut tracks = self.tracks.lock();

            let Some(record) = tracks.records.get_mut(&request_id) else {
                debug!(request_id = request_id; "dropping response for an untracked request");
                return false;
            };

            if record.is_complete() {
                debug!(request_id = request_id; "dropping duplicate response");
                return false;
            }

            record.received += 1;
            record.payloads.extend(payload);

            if !record.is_complete() {
                return true;
            }

            record.cond.notify_all();
            record.callback.take()
        };

        if let Some(callback) = callback {
            callback();
        }

        true
    }

    /// Returns whether `request_id` received every response it expected.
    pub fn check_message_track(&self, request_id: u64) -> bool {
        self.tracks
            .lock()
            .records
            .get(&request_id)
            .is_some_and(Record::is_complete)
    }

    /// Blocks until `request_id` completes or `timeout` elapses.
    ///
    /// A completed request is released and forgotten. A timed out one stays tracked, so
    /// late responses are still counted, but nobody is woken for them.
    ///
    /// # Returns
    /// Whether the completion was observed.
    pub fn wait(&self, request_id: u64, timeout: Duration) -> bool {
        self.wait_for_responses(request_id, timeout).is_some()
    }

    /// Same as `wait`, but hands out the collected response payloads.
    ///
    /// # Returns
    /// The payloads in arrival order, or `None` on timeout, shutdown or an unknown id.
    pub fn wait_for_responses(&self, request_id: u64, timeout: Duration) -> Option<Vec<Vec<u8>>> {
        let deadline = Instant::now() + timeout;
        let mut tracks = self.tracks.lock();
        let mut timed_out = false;

        loop {
            let closed = tracks.closed;
            let record = tracks.records.get_mut(&request_id)?;

            if record.is_complete() {
                let record = tracks.records.remove(&request_id)?;
                return Some(record.payloads);
            }

            if closed || timed_out {
                record.waiting = false;
                debug!(request_id = request_id, closed = closed; "stopped waiting for request");
                return None;
            }

            record.waiting = true;
            let cond = record.cond.clone();
            timed_out = cond.wait_until(&mut tracks, deadline).timed_out();
        }
    }

    /// Registers a callback run once `request_id` completes.
    ///
    /// Runs it right away if the request already completed.
    ///
    /// # Returns
    /// `false` if the request isn't tracked, the callback is dropped then.
    pub fn set_message_callback(&self, request_id: u64, callback: MessageCallback) -> bool {
        {
            let mut tracks = self.tracks.lock();
            let Some(record) = tracks.records.get_mut(&request_id) else {
                return false;
            };

            if !record.is_complete() {
                record.callback = Some(callback);
                return true;
            }
        }

        callback();
        true
    }

    /// Forgets `request_id`, used when its request never left the node.
    pub fn discard(&self, request_id: u64) {
        self.tracks.lock().records.remove(&request_id);
    }

    /// Wakes every waiter, later waits return right away unless already complete.
    pub fn close(&self) {
        let mut tracks = self.tracks.lock();
        tracks.closed = true;

        for record in tracks.records.values() {
            record.cond.notify_all();
        }
    }

    /// Returns whether `close` was called.
    pub fn is_closed(&self) -> bool {
        self.tracks.lock().closed
    }

    /// Returns the amount of records currently tracked.
    pub fn pending(&self) -> usize {
        self.tracks.lock().records.len()
    }
}
