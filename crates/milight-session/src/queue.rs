//! Paced command queue.
//!
//! [`QueuedSend`] sends [`QueueItem`]s from a single consumer thread,
//! pausing after each datagram so the bridge is not flooded. Two rules
//! apply on top of FIFO order:
//!
//! - **Supersession.** Items carrying the same non-zero category replace
//!   each other. When an item is dequeued while a newer item of its
//!   category has been enqueued, it is dropped. Brightness changes from a
//!   slider only send the final value that way.
//! - **Chains.** An item may carry follow-up links sent right after it,
//!   without any other item in between. Individual links can be cancelled
//!   through their [`CancelToken`]; cancelling the head drops the whole
//!   chain.
//!
//! Repeatable links are sent `repeat_commands` times back to back, as
//! bridges occasionally miss a datagram.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{select, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use crate::transport::DatagramSink;

/// Category of items that are never superseded.
pub const NO_CATEGORY: u32 = 0;

/// Number of items the queue holds before [`QueuedSend::enqueue`] blocks.
pub const QUEUE_CAPACITY: usize = 20;

const CLOSE_TIMEOUT: Duration = Duration::from_millis(200);

/// Invalidates a queued link.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Mark the link as invalid. It is skipped when its turn comes.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether [`cancel`](Self::cancel) was called on any clone.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone)]
struct Link {
    payload: Vec<u8>,
    repeatable: bool,
    delay: Option<Duration>,
    repeat: Option<u8>,
    cancel: CancelToken,
}

impl Link {
    fn new(payload: Vec<u8>, repeatable: bool) -> Self {
        Link {
            payload,
            repeatable,
            delay: None,
            repeat: None,
            cancel: CancelToken::default(),
        }
    }
}

/// A datagram, optionally followed by a chain of further datagrams.
#[derive(Debug, Clone)]
pub struct QueueItem {
    category: u32,
    destination: SocketAddr,
    delay: Option<Duration>,
    repeat: Option<u8>,
    links: Vec<Link>,
}

impl QueueItem {
    fn new(destination: SocketAddr, category: u32, payload: Vec<u8>, repeatable: bool) -> Self {
        QueueItem {
            category,
            destination,
            delay: None,
            repeat: None,
            links: vec![Link::new(payload, repeatable)],
        }
    }

    /// An item sent `repeat_commands` times.
    pub fn repeatable(destination: SocketAddr, category: u32, payload: Vec<u8>) -> Self {
        Self::new(destination, category, payload, true)
    }

    /// An item sent exactly once, e.g. link and unlink frames.
    pub fn non_repeatable(destination: SocketAddr, category: u32, payload: Vec<u8>) -> Self {
        Self::new(destination, category, payload, false)
    }

    /// Append a repeatable link to the chain.
    pub fn add_repeatable(mut self, payload: Vec<u8>) -> Self {
        self.links.push(Link::new(payload, true));
        self
    }

    /// Append a non-repeatable link to the chain.
    pub fn add_non_repeatable(mut self, payload: Vec<u8>) -> Self {
        self.links.push(Link::new(payload, false));
        self
    }

    /// Pause after each link, overriding the queue's delay.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Send repeatable links this many times, overriding the queue's count.
    pub fn with_repeat(mut self, repeat: u8) -> Self {
        self.repeat = Some(repeat);
        self
    }

    /// Pause after the most recently added link only.
    pub fn with_link_delay(mut self, delay: Duration) -> Self {
        if let Some(link) = self.links.last_mut() {
            link.delay = Some(delay);
        }
        self
    }

    /// Repeat count of the most recently added link only.
    pub fn with_link_repeat(mut self, repeat: u8) -> Self {
        if let Some(link) = self.links.last_mut() {
            link.repeat = Some(repeat);
        }
        self
    }

    /// Token cancelling the whole item.
    pub fn cancel_token(&self) -> CancelToken {
        self.links[0].cancel.clone()
    }

    /// Token cancelling the link at `index` (0 is the head).
    pub fn link_cancel_token(&self, index: usize) -> Option<CancelToken> {
        self.links.get(index).map(|link| link.cancel.clone())
    }

    /// Supersession category, [`NO_CATEGORY`] if none.
    pub fn category(&self) -> u32 {
        self.category
    }

    /// Address every link is sent to.
    pub fn destination(&self) -> SocketAddr {
        self.destination
    }

    /// Number of links including the head.
    pub fn link_count(&self) -> usize {
        self.links.len()
    }
}

struct Entry {
    item: QueueItem,
    generation: u64,
}

/// Latest generation enqueued per category.
type Generations = Arc<Mutex<HashMap<u32, u64>>>;

struct Consumer {
    sink: Arc<dyn DatagramSink>,
    entries: Receiver<Entry>,
    shutdown: Receiver<()>,
    latest: Generations,
    repeat_commands: u8,
    delay: Duration,
}

struct Worker {
    handle: JoinHandle<()>,
    done: Receiver<()>,
}

/// Bounded FIFO of datagrams with a pacing consumer thread.
pub struct QueuedSend {
    sink: Arc<dyn DatagramSink>,
    entries_tx: Sender<Entry>,
    entries_rx: Mutex<Option<Receiver<Entry>>>,
    shutdown_tx: Mutex<Option<Sender<()>>>,
    shutdown_rx: Receiver<()>,
    latest: Generations,
    next_generation: AtomicU64,
    // Held from generation allocation until the entry is in the channel
    producer: Mutex<()>,
    repeat_commands: u8,
    delay: Duration,
    worker: Mutex<Option<Worker>>,
    closed: AtomicBool,
}

impl QueuedSend {
    /// Create a queue sending through `sink`.
    ///
    /// The consumer runs once [`start`](Self::start) is called; items
    /// enqueued before that wait in the queue.
    pub fn new(sink: Arc<dyn DatagramSink>, repeat_commands: u8, delay: Duration) -> Self {
        let (entries_tx, entries_rx) = crossbeam_channel::bounded(QUEUE_CAPACITY);
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(0);
        QueuedSend {
            sink,
            entries_tx,
            entries_rx: Mutex::new(Some(entries_rx)),
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            shutdown_rx,
            latest: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
            producer: Mutex::new(()),
            repeat_commands,
            delay,
            worker: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Create a queue paced by the repeat count and delay of `config`.
    pub fn from_config(sink: Arc<dyn DatagramSink>, config: &SessionConfig) -> Self {
        Self::new(sink, config.repeat_commands, config.delay())
    }

    /// Spawn the consumer thread. Calling it again does nothing.
    pub fn start(&self) -> SessionResult<()> {
        let Some(entries) = self.entries_rx.lock().take() else {
            return Ok(());
        };
        let consumer = Consumer {
            sink: Arc::clone(&self.sink),
            entries,
            shutdown: self.shutdown_rx.clone(),
            latest: Arc::clone(&self.latest),
            repeat_commands: self.repeat_commands,
            delay: self.delay,
        };
        let (done_tx, done) = crossbeam_channel::bounded(1);
        let handle = thread::Builder::new()
            .name("milight-queue".to_string())
            .spawn(move || {
                consumer.run();
                let _ = done_tx.send(());
            })?;
        *self.worker.lock() = Some(Worker { handle, done });
        Ok(())
    }

    /// Add an item to the queue, blocking while the queue is full.
    ///
    /// A non-zero category marks earlier queued items of that category as
    /// superseded. Concurrent producers are serialized, so channel order
    /// and generation order agree.
    pub fn enqueue(&self, item: QueueItem) -> SessionResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SessionError::QueueClosed);
        }
        let _producer = self.producer.lock();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        if item.category != NO_CATEGORY {
            let previous = self.latest.lock().insert(item.category, generation);
            if previous.is_some() {
                trace!("queue: category {:#08x} superseded", item.category);
            }
        }
        self.entries_tx
            .send(Entry { item, generation })
            .map_err(|_| SessionError::QueueClosed)
    }

    /// Number of items waiting.
    pub fn len(&self) -> usize {
        self.entries_tx.len()
    }

    /// Whether no items are waiting. The consumer may still be sending
    /// the last one.
    pub fn is_empty(&self) -> bool {
        self.entries_tx.is_empty()
    }

    /// Stop the consumer. Items still waiting are dropped.
    ///
    /// Waits at most 200 ms for the consumer thread. Safe to call more than
    /// once.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown_tx.lock().take();
        self.entries_rx.lock().take();

        if let Some(worker) = self.worker.lock().take() {
            match worker.done.recv_timeout(CLOSE_TIMEOUT) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    if worker.handle.join().is_err() {
                        warn!("queue: consumer thread panicked");
                    }
                }
                Err(RecvTimeoutError::Timeout) => warn!(
                    "queue: consumer did not stop within {} ms",
                    CLOSE_TIMEOUT.as_millis()
                ),
            }
        }
        debug!("queue: closed");
    }
}

impl Drop for QueuedSend {
    fn drop(&mut self) {
        self.close();
    }
}

impl Consumer {
    fn run(self) {
        loop {
            let entry = select! {
                recv(self.shutdown) -> _ => None,
                recv(self.entries) -> entry => entry.ok(),
            };
            let Some(entry) = entry else {
                break;
            };
            if !self.send_item(entry) {
                break;
            }
        }
        trace!("queue: consumer stopped");
    }

    fn is_current(&self, entry: &Entry) -> bool {
        entry.item.category == NO_CATEGORY
            || self
                .latest
                .lock()
                .get(&entry.item.category)
                .map_or(true, |latest| *latest == entry.generation)
    }

    /// Send an item and its chain. Returns false on shutdown.
    fn send_item(&self, entry: Entry) -> bool {
        if !self.is_current(&entry) {
            trace!(
                "queue: dropping superseded item of category {:#08x}",
                entry.item.category
            );
            return true;
        }
        let item = entry.item;
        if item.links[0].cancel.is_cancelled() {
            trace!("queue: dropping cancelled item");
            return true;
        }

        for link in &item.links {
            if link.cancel.is_cancelled() {
                continue;
            }
            let times = if link.repeatable {
                link.repeat.or(item.repeat).unwrap_or(self.repeat_commands)
            } else {
                1
            };
            for _ in 0..times {
                if let Err(e) = self.sink.send_datagram(&link.payload, item.destination) {
                    warn!("queue: send to {} failed: {}", item.destination, e);
                }
            }

            let pause = link.delay.or(item.delay).unwrap_or(self.delay);
            if !pause.is_zero() {
                match self.shutdown.recv_timeout(pause) {
                    Err(RecvTimeoutError::Timeout) => {}
                    _ => return false,
                }
            }
        }
        true
    }
}
