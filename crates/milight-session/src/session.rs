//! The session actor.
//!
//! [`SessionCore`] owns every piece of mutable session state: the session
//! id, the state machine, the in-flight tracker and the address the bridge
//! was last heard from. It is driven by exactly one thread (the receive
//! thread of [`BridgeSessionManager`](crate::BridgeSessionManager)); other
//! threads reach it through [`SessionRequest`] messages and read the
//! published [`SessionSnapshot`].
//!
//! The core performs no I/O. Each call returns an [`Outcome`] telling the
//! caller what to transmit, how long to wait for the next datagram and
//! what to report to the observer.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use milight_protocol::{
    establish_session_frame, keep_alive_frame, registration_frame, search_frame, BridgeId,
    BridgeMessage, SessionKey, MAX_PACKET_IN_FLIGHT_MS,
};
use tracing::{debug, info, trace, warn};

use crate::sequence::{SequenceCounter, SequenceTracker};
use crate::state::{Action, Input, SessionState, StateMachine};

/// Messages from other threads to the session actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionRequest {
    /// Use this session id and continue with the registration.
    SetSessionId([u8; 2]),
    /// A command with this sequence number was built and is about to be sent.
    Track {
        /// Sequence number of the command.
        sequence: u16,
        /// When the command was built.
        sent_at: Instant,
    },
}

/// Immutable view of the session, published after every evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Current state.
    pub state: SessionState,
    /// Session id and password to stamp into commands.
    pub key: SessionKey,
    /// Where the bridge is reached.
    pub bridge_addr: SocketAddr,
    /// Number of commands waiting for acknowledgement.
    pub in_flight: usize,
}

impl SessionSnapshot {
    /// Whether commands can be sent.
    pub fn is_valid(&self) -> bool {
        self.state.is_valid()
    }

    /// Session id as two space separated hex bytes, e.g. `"10 20"`.
    pub fn session(&self) -> String {
        format!("{:02X} {:02X}", self.key.session_id[0], self.key.session_id[1])
    }
}

/// A datagram to transmit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    /// Bytes to send.
    pub payload: Vec<u8>,
    /// Where to send them.
    pub destination: SocketAddr,
}

/// What the driving thread has to do after an evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// Handshake or keep-alive packet to transmit.
    pub outbound: Option<Datagram>,
    /// How long to wait for the next datagram.
    pub timeout: Duration,
    /// State and bridge address to report to the observer.
    pub notify: Option<(SessionState, SocketAddr)>,
}

/// Session state owned by the receive thread.
pub struct SessionCore {
    bridge_id: BridgeId,
    client_session_id: [u8; 2],
    key: SessionKey,
    machine: StateMachine,
    tracker: SequenceTracker,
    sequence: Arc<SequenceCounter>,
    configured_addr: SocketAddr,
    bridge_addr: SocketAddr,
}

impl SessionCore {
    /// Create a session in [`SessionState::Invalid`].
    pub fn new(
        bridge_id: BridgeId,
        password: [u8; 2],
        client_session_id: [u8; 2],
        configured_addr: SocketAddr,
        keep_alive: Duration,
        sequence: Arc<SequenceCounter>,
        now: Instant,
    ) -> Self {
        SessionCore {
            bridge_id,
            client_session_id,
            key: SessionKey {
                session_id: [0, 0],
                password,
            },
            machine: StateMachine::new(keep_alive, now),
            tracker: SequenceTracker::new(),
            sequence,
            configured_addr,
            bridge_addr: configured_addr,
        }
    }

    /// Bridge this session talks to.
    pub fn bridge_id(&self) -> &BridgeId {
        &self.bridge_id
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.machine.state()
    }

    /// Session id as two space separated hex bytes.
    pub fn session(&self) -> String {
        self.snapshot().session()
    }

    /// Address the bridge is currently reached at.
    pub fn bridge_addr(&self) -> SocketAddr {
        self.bridge_addr
    }

    /// In-flight tracker.
    pub fn tracker(&self) -> &SequenceTracker {
        &self.tracker
    }

    /// Current view of the session.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.machine.state(),
            key: self.key,
            bridge_addr: self.bridge_addr,
            in_flight: self.tracker.len(),
        }
    }

    /// Kick off the handshake.
    pub fn start(&mut self, now: Instant) -> Outcome {
        self.evaluate(Input::NoInput, now)
    }

    /// The socket timeout expired without a datagram.
    pub fn tick(&mut self, now: Instant) -> Outcome {
        self.evaluate(Input::Timeout, now)
    }

    /// Process a datagram received from `from`.
    pub fn handle_datagram(&mut self, buf: &[u8], from: SocketAddr, now: Instant) -> Outcome {
        let input = self.classify(buf, from, now);
        self.evaluate(input, now)
    }

    /// Process a request from another thread.
    ///
    /// Returns an outcome when the request changed the handshake.
    pub fn handle_request(&mut self, request: SessionRequest, now: Instant) -> Option<Outcome> {
        match request {
            SessionRequest::Track { sequence, sent_at } => {
                self.tracker.track(sequence, sent_at);
                None
            }
            SessionRequest::SetSessionId(session_id) => {
                debug!(
                    "Session[{}]: session id {:02X} {:02X} supplied externally",
                    self.bridge_id, session_id[0], session_id[1]
                );
                let previous = self.machine.state();
                self.key.session_id = session_id;
                self.machine.set_state(SessionState::NeedRegister);

                let mut outcome = self.evaluate(Input::NoInput, now);
                if outcome.notify.is_none() && previous != SessionState::NeedRegister {
                    outcome.notify = Some((self.machine.state(), self.bridge_addr));
                }
                Some(outcome)
            }
        }
    }

    /// Drop the session, e.g. on close.
    pub fn reset(&mut self) {
        self.machine.set_state(SessionState::Invalid);
        self.key.session_id = [0, 0];
        self.tracker.clear();
        self.bridge_addr = self.configured_addr;
    }

    fn classify(&mut self, buf: &[u8], from: SocketAddr, now: Instant) -> Input {
        let message = match BridgeMessage::decode(buf) {
            Ok(message) => message,
            Err(e) => {
                debug!("Session[{}]: discarding datagram from {}: {}", self.bridge_id, from, e);
                return Input::NoInput;
            }
        };

        if let Some(mac) = message.mac() {
            if !self.bridge_id.matches(mac) {
                debug!(
                    "Session[{}]: ignoring {} from other bridge {} at {}",
                    self.bridge_id,
                    message.name(),
                    BridgeId::new(*mac),
                    from
                );
                return Input::NoInput;
            }
        }

        match message {
            BridgeMessage::Notice { .. } => {
                debug!("Session[{}]: notice from bridge at {}", self.bridge_id, from);
                self.bridge_addr = from;
                Input::NoInput
            }

            BridgeMessage::SearchResponse { .. } => {
                trace!("Session[{}]: bridge answered search from {}", self.bridge_id, from);
                self.bridge_addr = from;
                Input::BridgeConfirmed
            }

            BridgeMessage::SessionId { session_id, .. } => {
                if self.machine.state() != SessionState::WaitForSessionSid {
                    debug!(
                        "Session[{}]: unexpected session id in state {}",
                        self.bridge_id,
                        self.machine.state()
                    );
                    return Input::NoInput;
                }
                self.key.session_id = session_id;
                Input::SessionIdReceived
            }

            BridgeMessage::RegistrationConfirmed { .. } => Input::SessionEstablished,

            BridgeMessage::CommandAck { sequence, ok } => {
                match self.tracker.confirm(sequence, now) {
                    Some(latency) if ok => trace!(
                        "Session[{}]: command {} confirmed after {} ms",
                        self.bridge_id,
                        sequence,
                        latency.as_millis()
                    ),
                    Some(_) => warn!(
                        "Session[{}]: bridge reported failure for command {}",
                        self.bridge_id, sequence
                    ),
                    None => debug!(
                        "Session[{}]: confirmation for unknown command {}",
                        self.bridge_id, sequence
                    ),
                }
                Input::NoInput
            }

            BridgeMessage::KeepAlive { .. } => Input::KeepAliveReceived,
        }
    }

    fn evaluate(&mut self, input: Input, now: Instant) -> Outcome {
        let step = self.machine.step(input, now);

        if step.timed_out {
            warn!(
                "Session[{}]: no confirmation from bridge, restarting handshake",
                self.bridge_id
            );
            if self.bridge_addr != self.configured_addr {
                info!(
                    "Session[{}]: falling back from {} to {}",
                    self.bridge_id, self.bridge_addr, self.configured_addr
                );
                self.bridge_addr = self.configured_addr;
            }
        }
        if step.session_reset {
            self.tracker.clear();
        }

        for sequence in self.tracker.evict_expired(now) {
            warn!(
                "Session[{}]: command {} not confirmed within {} ms",
                self.bridge_id, sequence, MAX_PACKET_IN_FLIGHT_MS
            );
        }

        let payload = match step.action {
            Action::None => None,
            Action::SendSearch => Some(search_frame(self.client_session_id, &self.bridge_id)),
            Action::SendEstablishSession => Some(establish_session_frame(self.client_session_id)),
            Action::SendRegistration => {
                Some(registration_frame(&self.key, self.sequence.allocate()))
            }
            Action::SendKeepAlive => Some(keep_alive_frame(self.key.session_id)),
        };

        if let Some(state) = step.notify {
            if state == SessionState::ValidKeepAlive {
                trace!("Session[{}]: keep-alive confirmed", self.bridge_id);
            } else {
                info!("Session[{}]: {}", self.bridge_id, state);
            }
        }

        Outcome {
            outbound: payload.map(|payload| Datagram {
                payload,
                destination: self.bridge_addr,
            }),
            timeout: step.timeout,
            notify: step.notify.map(|state| (state, self.bridge_addr)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use milight_protocol::*;

    const MAC: [u8; 6] = [0xAA, 0xCC, 0xFF, 0x22, 0x33, 0x44];
    const CLIENT_SID: [u8; 2] = [0xAB, 0xCD];

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn bridge_addr() -> SocketAddr {
        "192.168.1.40:5987".parse().unwrap()
    }

    fn core(t0: Instant) -> SessionCore {
        SessionCore::new(
            "AACCFF223344".parse().unwrap(),
            [0x01, 0x02],
            CLIENT_SID,
            "255.255.255.255:5987".parse().unwrap(),
            ms(1000),
            Arc::new(SequenceCounter::new()),
            t0,
        )
    }

    fn with_header(msg_type: u8, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![msg_type, 0, 0, 0, payload.len() as u8];
        buf.extend_from_slice(payload);
        buf
    }

    fn search_response(mac: [u8; 6]) -> Vec<u8> {
        let mut payload = vec![0x02];
        payload.extend_from_slice(&mac);
        payload.extend_from_slice(&[0x00, 0x20]);
        with_header(RESP_SEARCH, &payload)
    }

    fn session_id_response(mac: [u8; 6], sid: [u8; 2]) -> Vec<u8> {
        let mut payload = vec![0x00, 0x02];
        payload.extend_from_slice(&mac);
        payload.extend_from_slice(&[0x69, 0xF0, 0x3C, 0x23, 0x00, 0x01, sid[0], sid[1], 0x00]);
        with_header(RESP_SESSION_ID, &payload)
    }

    fn registration_response(mac: [u8; 6]) -> Vec<u8> {
        let mut payload = mac.to_vec();
        payload.extend_from_slice(&[0x05, 0x02, 0x00, 0x34, 0x00]);
        with_header(RESP_REGISTRATION, &payload)
    }

    fn keep_alive_response(mac: [u8; 6]) -> Vec<u8> {
        let mut payload = mac.to_vec();
        payload.push(0x01);
        with_header(RESP_KEEP_ALIVE, &payload)
    }

    fn ack(sequence: u16) -> Vec<u8> {
        let seq = sequence.to_le_bytes();
        with_header(RESP_COMMAND_ACK, &[0x00, seq[0], seq[1]])
    }

    fn established(t0: Instant) -> SessionCore {
        let mut core = core(t0);
        core.start(t0);
        core.handle_datagram(&search_response(MAC), bridge_addr(), t0);
        core.handle_datagram(&session_id_response(MAC, [0x10, 0x20]), bridge_addr(), t0);
        core.handle_datagram(&registration_response(MAC), bridge_addr(), t0);
        assert_eq!(core.state(), SessionState::Valid);
        core
    }

    #[test]
    fn test_full_handshake() {
        let t0 = Instant::now();
        let mut core = core(t0);

        let out = core.start(t0);
        assert_eq!(core.state(), SessionState::WaitForBridge);
        let search = out.outbound.unwrap();
        assert_eq!(search.payload, search_frame(CLIENT_SID, core.bridge_id()));
        assert_eq!(search.destination, "255.255.255.255:5987".parse().unwrap());

        let out = core.handle_datagram(&search_response(MAC), bridge_addr(), t0 + ms(20));
        assert_eq!(core.state(), SessionState::WaitForSessionSid);
        assert_eq!(
            out.notify,
            Some((SessionState::WaitForSessionSid, bridge_addr()))
        );
        let establish = out.outbound.unwrap();
        assert_eq!(establish.payload, establish_session_frame(CLIENT_SID));
        assert_eq!(establish.destination, bridge_addr());

        let out = core.handle_datagram(
            &session_id_response(MAC, [0x10, 0x20]),
            bridge_addr(),
            t0 + ms(40),
        );
        assert_eq!(core.state(), SessionState::NeedRegister);
        assert_eq!(core.session(), "10 20");
        let registration = out.outbound.unwrap().payload;
        assert_eq!(registration[0], MSG_COMMAND);
        assert_eq!(registration[10], CMD_REGISTER);
        assert_eq!(&registration[5..7], &[0x10, 0x20]);
        assert_eq!(&registration[11..13], &[0x01, 0x02]);
        assert!(!core.snapshot().is_valid());

        let out = core.handle_datagram(&registration_response(MAC), bridge_addr(), t0 + ms(60));
        assert_eq!(core.state(), SessionState::Valid);
        assert!(core.snapshot().is_valid());
        assert_eq!(out.notify, Some((SessionState::Valid, bridge_addr())));
        assert!(out.outbound.is_none());
    }

    #[test]
    fn test_wrong_mac_never_advances() {
        let t0 = Instant::now();
        let other = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06];
        let mut core = core(t0);
        core.start(t0);

        let out = core.handle_datagram(&search_response(other), bridge_addr(), t0);
        assert_eq!(core.state(), SessionState::WaitForBridge);
        assert!(out.notify.is_none());
        // The search is repeated to the configured address
        let search = out.outbound.unwrap();
        assert_eq!(search.payload[0], MSG_SEARCH);
        assert_eq!(search.destination, "255.255.255.255:5987".parse().unwrap());
    }

    #[test]
    fn test_out_of_order_datagrams_never_advance() {
        let t0 = Instant::now();
        let mut core = core(t0);
        core.start(t0);

        core.handle_datagram(&session_id_response(MAC, [0x10, 0x20]), bridge_addr(), t0);
        assert_eq!(core.state(), SessionState::WaitForBridge);
        assert_eq!(core.session(), "00 00");

        core.handle_datagram(&registration_response(MAC), bridge_addr(), t0);
        assert_eq!(core.state(), SessionState::WaitForBridge);

        core.handle_datagram(&search_response(MAC), bridge_addr(), t0);
        core.handle_datagram(&registration_response(MAC), bridge_addr(), t0);
        assert_eq!(core.state(), SessionState::WaitForSessionSid);
    }

    #[test]
    fn test_malformed_datagram_ignored() {
        let t0 = Instant::now();
        let mut core = established(t0);
        let out = core.handle_datagram(&[0x18, 0, 0], bridge_addr(), t0 + ms(5));
        assert_eq!(core.state(), SessionState::Valid);
        assert!(out.notify.is_none());
        assert!(out.outbound.is_none());
    }

    #[test]
    fn test_keep_alive_keeps_key() {
        let t0 = Instant::now();
        let mut core = established(t0);
        let key = core.snapshot().key;

        for i in 1..=15u64 {
            let now = t0 + ms(i * 1000);
            let out = core.tick(now);
            let keep_alive = out.outbound.unwrap();
            assert_eq!(keep_alive.payload, keep_alive_frame([0x10, 0x20]));

            let out = core.handle_datagram(&keep_alive_response(MAC), bridge_addr(), now);
            assert_eq!(
                out.notify,
                Some((SessionState::ValidKeepAlive, bridge_addr()))
            );
            assert_eq!(core.snapshot().key, key);
            assert_eq!(core.state(), SessionState::Valid);
        }
    }

    #[test]
    fn test_timeout_falls_back_to_configured_address() {
        let t0 = Instant::now();
        let mut core = established(t0);
        assert_eq!(core.bridge_addr(), bridge_addr());

        let out = core.tick(t0 + ms(10_500));
        assert_eq!(core.state(), SessionState::WaitForBridge);
        let search = out.outbound.unwrap();
        assert_eq!(search.payload[0], MSG_SEARCH);
        assert_eq!(search.destination, "255.255.255.255:5987".parse().unwrap());
        assert_eq!(
            out.notify,
            Some((
                SessionState::WaitForBridge,
                "255.255.255.255:5987".parse().unwrap()
            ))
        );
    }

    #[test]
    fn test_command_ack_and_expiry() {
        let t0 = Instant::now();
        let mut core = established(t0);

        core.handle_request(SessionRequest::Track { sequence: 7, sent_at: t0 }, t0);
        core.handle_request(SessionRequest::Track { sequence: 8, sent_at: t0 }, t0);
        assert_eq!(core.snapshot().in_flight, 2);

        core.handle_datagram(&ack(7), bridge_addr(), t0 + ms(30));
        assert!(!core.tracker().contains(7));
        assert!(core.tracker().contains(8));

        // Unknown sequence numbers are harmless
        core.handle_datagram(&ack(99), bridge_addr(), t0 + ms(40));
        assert_eq!(core.state(), SessionState::Valid);

        core.handle_datagram(&keep_alive_response(MAC), bridge_addr(), t0 + ms(2500));
        assert!(core.tracker().is_empty());
    }

    #[test]
    fn test_notice_learns_address() {
        let t0 = Instant::now();
        let mut core = core(t0);
        core.start(t0);

        let mut payload = vec![0x03, 0xD3, 0x54, 0x11];
        payload.extend_from_slice(&MAC);
        let out = core.handle_datagram(&with_header(RESP_NOTICE, &payload), bridge_addr(), t0);
        assert_eq!(core.state(), SessionState::WaitForBridge);
        assert_eq!(core.bridge_addr(), bridge_addr());
        assert_eq!(out.outbound.unwrap().destination, bridge_addr());
    }

    #[test]
    fn test_set_session_id_skips_to_registration() {
        let t0 = Instant::now();
        let mut core = core(t0);
        core.start(t0);

        let out = core
            .handle_request(SessionRequest::SetSessionId([0x33, 0x44]), t0 + ms(5))
            .unwrap();
        assert_eq!(core.state(), SessionState::NeedRegister);
        assert_eq!(core.session(), "33 44");
        assert_eq!(out.notify.map(|(s, _)| s), Some(SessionState::NeedRegister));
        let registration = out.outbound.unwrap().payload;
        assert_eq!(&registration[5..7], &[0x33, 0x44]);
    }

    #[test]
    fn test_reset_clears_session() {
        let t0 = Instant::now();
        let mut core = established(t0);
        core.handle_request(SessionRequest::Track { sequence: 1, sent_at: t0 }, t0);
        core.reset();
        let snapshot = core.snapshot();
        assert_eq!(snapshot.state, SessionState::Invalid);
        assert_eq!(snapshot.session(), "00 00");
        assert_eq!(snapshot.in_flight, 0);
        assert_eq!(snapshot.key.password, [0x01, 0x02]);
    }
}
