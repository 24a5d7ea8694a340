//! Bridge session manager.
//!
//! [`BridgeSessionManager`] owns the UDP socket and the receive thread that
//! drives a [`SessionCore`]. The receive thread is the only code touching
//! session state. Callers communicate with it through a mailbox and read
//! the latest [`SessionSnapshot`], which is republished whenever it changes.
//!
//! ```no_run
//! use std::sync::Arc;
//! use milight_session::{BridgeSessionManager, SessionConfig, SessionState};
//!
//! let config = SessionConfig::new("ACCF23F57AD4").with_keep_alive_ms(1000);
//! let observer = Arc::new(|state: SessionState, addr: std::net::SocketAddr| {
//!     println!("{} via {}", state, addr);
//! });
//! let manager = BridgeSessionManager::new(&config, observer)?;
//! manager.start()?;
//! // ...
//! manager.close();
//! # Ok::<(), milight_session::SessionError>(())
//! ```

use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use milight_protocol::bulb::{BulbCommand, BulbType};
use milight_protocol::{
    command_frame, link_frame, BridgeId, ProtocolError, COMMAND_DATA_LEN, MSG_COMMAND,
};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use crate::config::SessionConfig;
use crate::error::SessionResult;
use crate::sequence::SequenceCounter;
use crate::session::{Outcome, SessionCore, SessionRequest, SessionSnapshot};
use crate::state::SessionState;
use crate::transport::{DatagramSink, DatagramSource};

/// How long [`BridgeSessionManager::close`] waits for the receive thread.
pub const CLOSE_TIMEOUT: Duration = Duration::from_millis(200);

const RECV_BUFFER_LEN: usize = 1024;

/// Consecutive receive errors after which the receive thread gives up.
pub const MAX_RECV_FAILURES: u32 = 3;

/// Receives session state changes.
///
/// Called on the receive thread once the published snapshot already shows
/// the new state. Implementations must not block for long.
pub trait SessionObserver: Send + Sync {
    /// The session entered `state`; the bridge is reached at `address`.
    fn session_state_changed(&self, state: SessionState, address: SocketAddr);
}

impl<F> SessionObserver for F
where
    F: Fn(SessionState, SocketAddr) + Send + Sync,
{
    fn session_state_changed(&self, state: SessionState, address: SocketAddr) {
        self(state, address)
    }
}

/// State shared between the manager and its receive thread.
struct Shared {
    snapshot: RwLock<Arc<SessionSnapshot>>,
    sequence: Arc<SequenceCounter>,
    stop: AtomicBool,
}

impl Shared {
    fn load(&self) -> Arc<SessionSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    fn publish(&self, snapshot: SessionSnapshot) {
        let mut current = self.snapshot.write();
        if **current != snapshot {
            *current = Arc::new(snapshot);
        }
    }
}

/// Everything the receive thread takes ownership of on start.
struct Pending {
    core: SessionCore,
    requests: Receiver<SessionRequest>,
    observer: Arc<dyn SessionObserver>,
}

struct Worker {
    handle: JoinHandle<()>,
    done: Receiver<()>,
}

/// Maintains the session with one bridge.
pub struct BridgeSessionManager {
    bridge_id: BridgeId,
    socket: Arc<UdpSocket>,
    shared: Arc<Shared>,
    mailbox: Sender<SessionRequest>,
    pending: Mutex<Option<Pending>>,
    worker: Mutex<Option<Worker>>,
    closed: AtomicBool,
}

impl BridgeSessionManager {
    /// Validate the config and bind a broadcast-capable socket.
    ///
    /// The handshake begins with [`start`](Self::start).
    pub fn new(config: &SessionConfig, observer: Arc<dyn SessionObserver>) -> SessionResult<Self> {
        let bridge_id = config.validate()?;

        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.set_broadcast(true)?;

        let client_session_id = config
            .client_session_id
            .unwrap_or_else(rand::random::<[u8; 2]>);
        let sequence = Arc::new(SequenceCounter::new());
        let core = SessionCore::new(
            bridge_id,
            config.password,
            client_session_id,
            config.destination(),
            config.keep_alive(),
            Arc::clone(&sequence),
            Instant::now(),
        );

        debug!(
            "Session[{}]: bound {} (client session {:02X}{:02X})",
            bridge_id,
            socket.local_addr()?,
            client_session_id[0],
            client_session_id[1]
        );

        let (mailbox, requests) = crossbeam_channel::unbounded();
        let shared = Arc::new(Shared {
            snapshot: RwLock::new(Arc::new(core.snapshot())),
            sequence,
            stop: AtomicBool::new(false),
        });

        Ok(BridgeSessionManager {
            bridge_id,
            socket: Arc::new(socket),
            shared,
            mailbox,
            pending: Mutex::new(Some(Pending {
                core,
                requests,
                observer,
            })),
            worker: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// Spawn the receive thread and begin the handshake.
    ///
    /// Calling it again, or after [`close`](Self::close), does nothing.
    pub fn start(&self) -> SessionResult<()> {
        let Some(pending) = self.pending.lock().take() else {
            return Ok(());
        };
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }

        let socket = Arc::clone(&self.socket);
        let shared = Arc::clone(&self.shared);
        let (done_tx, done) = crossbeam_channel::bounded(1);

        let handle = thread::Builder::new()
            .name(format!("milight-{}", self.bridge_id))
            .spawn(move || {
                receive_loop(pending, socket.as_ref(), socket.as_ref(), &shared);
                let _ = done_tx.send(());
            })?;

        *self.worker.lock() = Some(Worker { handle, done });
        Ok(())
    }

    /// Stop the receive thread and drop the session.
    ///
    /// Waits at most [`CLOSE_TIMEOUT`] for the thread. Safe to call more
    /// than once.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.stop.store(true, Ordering::Release);
        self.pending.lock().take();
        self.wake();

        if let Some(worker) = self.worker.lock().take() {
            match worker.done.recv_timeout(CLOSE_TIMEOUT) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    if worker.handle.join().is_err() {
                        warn!("Session[{}]: receive thread panicked", self.bridge_id);
                    }
                }
                Err(RecvTimeoutError::Timeout) => warn!(
                    "Session[{}]: receive thread did not stop within {} ms",
                    self.bridge_id,
                    CLOSE_TIMEOUT.as_millis()
                ),
            }
        }

        let current = self.shared.load();
        self.shared.publish(SessionSnapshot {
            state: SessionState::Invalid,
            key: milight_protocol::SessionKey {
                session_id: [0, 0],
                password: current.key.password,
            },
            bridge_addr: current.bridge_addr,
            in_flight: 0,
        });
        debug!("Session[{}]: closed", self.bridge_id);
    }

    /// Build a command frame and register it as in flight.
    ///
    /// Fails if `data` is longer than five bytes.
    pub fn make_command(&self, wb: u8, zone: u8, data: &[u8]) -> SessionResult<Vec<u8>> {
        if data.len() > COMMAND_DATA_LEN {
            return Err(ProtocolError::TooMuchData {
                max: COMMAND_DATA_LEN,
                actual: data.len(),
            }
            .into());
        }
        let key = self.shared.load().key;
        let sequence = self.track_next();
        Ok(command_frame(MSG_COMMAND, &key, sequence, wb, zone, data)?)
    }

    /// Build the command frame for a bulb command.
    pub fn make_bulb_command(
        &self,
        bulb: BulbType,
        zone: u8,
        command: BulbCommand,
    ) -> SessionResult<Vec<u8>> {
        let data = command.data(bulb)?;
        self.make_command(bulb.type_byte(), zone, &data)
    }

    /// Build a link (`true`) or unlink (`false`) frame and register it as in
    /// flight.
    pub fn make_link(&self, wb: u8, zone: u8, link: bool) -> Vec<u8> {
        let key = self.shared.load().key;
        let sequence = self.track_next();
        link_frame(&key, sequence, wb, zone, link)
    }

    /// Skip discovery and register with a known session id.
    pub fn set_session_id(&self, session_id: [u8; 2]) {
        if self
            .mailbox
            .send(SessionRequest::SetSessionId(session_id))
            .is_ok()
        {
            self.wake();
        }
    }

    /// Bridge this manager talks to.
    pub fn bridge_id(&self) -> &BridgeId {
        &self.bridge_id
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> Arc<SessionSnapshot> {
        self.shared.load()
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.shared.load().state
    }

    /// Whether commands can be sent.
    pub fn is_valid(&self) -> bool {
        self.shared.load().is_valid()
    }

    /// Session id as two space separated hex bytes.
    pub fn session(&self) -> String {
        self.shared.load().session()
    }

    /// Address the bridge is reached at.
    pub fn bridge_addr(&self) -> SocketAddr {
        self.shared.load().bridge_addr
    }

    /// Number of commands waiting for acknowledgement.
    pub fn in_flight(&self) -> usize {
        self.shared.load().in_flight
    }

    /// The session socket, for sending command frames.
    pub fn socket(&self) -> Arc<UdpSocket> {
        Arc::clone(&self.socket)
    }

    fn track_next(&self) -> u16 {
        let sequence = self.shared.sequence.allocate();
        let _ = self.mailbox.send(SessionRequest::Track {
            sequence,
            sent_at: Instant::now(),
        });
        sequence
    }

    /// Unblock the receive thread with an empty datagram to ourselves.
    fn wake(&self) {
        let port = match self.socket.local_addr() {
            Ok(addr) => addr.port(),
            Err(e) => {
                trace!("Session[{}]: no local address: {}", self.bridge_id, e);
                return;
            }
        };
        if let Err(e) = self.socket.send_to(&[], (Ipv4Addr::LOCALHOST, port)) {
            trace!("Session[{}]: wake-up failed: {}", self.bridge_id, e);
        }
    }
}

impl Drop for BridgeSessionManager {
    fn drop(&mut self) {
        self.close();
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

/// ICMP errors surfaced by some platforms on the next receive.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionRefused
    )
}

fn receive_loop(
    pending: Pending,
    source: &dyn DatagramSource,
    sink: &dyn DatagramSink,
    shared: &Shared,
) {
    let Pending {
        mut core,
        requests,
        observer,
    } = pending;
    let bridge_id = *core.bridge_id();
    let mut buf = [0u8; RECV_BUFFER_LEN];

    // Transmit, publish, then report; returns the next receive timeout
    let apply = |core: &SessionCore, outcome: Outcome| -> Duration {
        if let Some(datagram) = outcome.outbound {
            if let Err(e) = sink.send_datagram(&datagram.payload, datagram.destination) {
                warn!(
                    "Session[{}]: send to {} failed: {}",
                    bridge_id, datagram.destination, e
                );
            }
        }
        // Observers read the snapshot from inside the callback
        shared.publish(core.snapshot());
        if let Some((state, address)) = outcome.notify {
            observer.session_state_changed(state, address);
        }
        outcome.timeout
    };

    let outcome = core.start(Instant::now());
    let mut timeout = apply(&core, outcome);
    let mut failures = 0;

    while !shared.stop.load(Ordering::Acquire) {
        let received = source.recv_datagram(&mut buf, timeout);
        if shared.stop.load(Ordering::Acquire) {
            break;
        }

        // Requests first so that acknowledgements find their command
        let now = Instant::now();
        for request in requests.try_iter() {
            if let Some(outcome) = core.handle_request(request, now) {
                timeout = apply(&core, outcome);
            }
        }

        let outcome = match received {
            // Wake-up from the manager
            Ok((0, _)) => {
                shared.publish(core.snapshot());
                continue;
            }
            Ok((len, from)) => {
                failures = 0;
                core.handle_datagram(&buf[..len], from, Instant::now())
            }
            Err(e) if is_timeout(&e) => {
                failures = 0;
                core.tick(Instant::now())
            }
            Err(e) if is_transient(&e) => {
                debug!("Session[{}]: ignoring receive error: {}", bridge_id, e);
                core.tick(Instant::now())
            }
            Err(e) => {
                failures += 1;
                warn!(
                    "Session[{}]: receive failed ({}/{}): {}",
                    bridge_id, failures, MAX_RECV_FAILURES, e
                );
                if failures >= MAX_RECV_FAILURES {
                    break;
                }
                continue;
            }
        };
        timeout = apply(&core, outcome);
    }

    let previous = core.state();
    core.reset();
    shared.publish(core.snapshot());
    // A closed session is not reported, a lost one is
    if previous != SessionState::Invalid && !shared.stop.load(Ordering::Acquire) {
        observer.session_state_changed(SessionState::Invalid, core.bridge_addr());
    }
    debug!("Session[{}]: receive thread stopped", bridge_id);
}
