//! Session state machine.
//!
//! The handshake is modelled as a transition function: given the current
//! state, a classified input and the current time, [`StateMachine::step`]
//! returns the new state together with the packet to transmit next and how
//! long to wait for an answer. The machine performs no I/O itself.
//!
//! ## Transitions
//!
//! ```text
//! Invalid ──▶ WaitForBridge ──BridgeConfirmed──▶ WaitForSessionSid
//!                  ▲                                   │ SessionIdReceived
//!                  │ timeout / InvalidCommand          ▼
//!                  └──────────── Valid ◀──Established── NeedRegister
//! ```
//!
//! When the expected input has not arrived yet, the packet that triggers it
//! is sent again. When it has arrived, evaluation continues with the next
//! state in the same call, so the follow-up packet goes out immediately.

use std::fmt;
use std::time::{Duration, Instant};

use milight_protocol::{
    REGISTRATION_TIMEOUT_MS, SEARCH_TIMEOUT_MS, SESSION_ID_TIMEOUT_MS, SESSION_TIMEOUT_MS,
};

/// Shortest socket timeout handed out. A zero timeout means "block forever"
/// for most socket APIs.
const MIN_TIMEOUT: Duration = Duration::from_millis(1);

/// State of a bridge session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No session. Starts the handshake on the next evaluation.
    Invalid,
    /// Searching for the bridge.
    WaitForBridge,
    /// Bridge found, waiting for a session id.
    WaitForSessionSid,
    /// Session id received, registration pending.
    NeedRegister,
    /// Session established.
    Valid,
    /// Session established and a keep-alive was just confirmed. Reported to
    /// observers; the machine itself stays in [`SessionState::Valid`].
    ValidKeepAlive,
}

impl SessionState {
    /// Whether commands can be sent in this state.
    pub fn is_valid(self) -> bool {
        matches!(self, SessionState::Valid | SessionState::ValidKeepAlive)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Invalid => "SESSION_INVALID",
            SessionState::WaitForBridge => "SESSION_WAIT_FOR_BRIDGE",
            SessionState::WaitForSessionSid => "SESSION_WAIT_FOR_SESSION_SID",
            SessionState::NeedRegister => "SESSION_NEED_REGISTER",
            SessionState::Valid => "SESSION_VALID",
            SessionState::ValidKeepAlive => "SESSION_VALID_KEEP_ALIVE",
        };
        write!(f, "{}", name)
    }
}

/// Classified input to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    /// A datagram arrived that does not drive the handshake.
    NoInput,
    /// The socket timeout expired without a datagram.
    Timeout,
    /// The session must be dropped.
    InvalidCommand,
    /// Keep-alive answered.
    KeepAliveReceived,
    /// Search answered by our bridge.
    BridgeConfirmed,
    /// Session id received.
    SessionIdReceived,
    /// Registration confirmed.
    SessionEstablished,
}

/// Packet the session has to transmit after an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Nothing to send.
    None,
    /// Search for the bridge.
    SendSearch,
    /// Ask for a session id.
    SendEstablishSession,
    /// Register with the session id.
    SendRegistration,
    /// Renew the session.
    SendKeepAlive,
}

/// Result of one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    /// State after the evaluation.
    pub state: SessionState,
    /// Packet to transmit.
    pub action: Action,
    /// How long to wait for the next datagram.
    pub timeout: Duration,
    /// State to report to the observer, if any.
    pub notify: Option<SessionState>,
    /// The handshake started over; in-flight tracking must be cleared.
    pub session_reset: bool,
    /// The session expired; the learned bridge address must be forgotten.
    pub timed_out: bool,
}

/// The session state machine.
#[derive(Debug, Clone)]
pub struct StateMachine {
    state: SessionState,
    last_confirmed: Instant,
    keep_alive: Duration,
    session_timeout: Duration,
}

impl StateMachine {
    /// Create a machine in [`SessionState::Invalid`].
    pub fn new(keep_alive: Duration, now: Instant) -> Self {
        StateMachine {
            state: SessionState::Invalid,
            last_confirmed: now,
            keep_alive,
            session_timeout: Duration::from_millis(SESSION_TIMEOUT_MS),
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Time of the last confirmation from the bridge.
    pub fn last_confirmed(&self) -> Instant {
        self.last_confirmed
    }

    /// Configured keep-alive interval.
    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    /// Force a state, e.g. after a session id was supplied from outside.
    pub fn set_state(&mut self, state: SessionState) {
        self.state = state;
    }

    fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_confirmed)
    }

    /// Evaluate one input.
    pub fn step(&mut self, input: Input, now: Instant) -> Step {
        let previous = self.state;
        let mut input = input;
        let mut notify = None;
        let mut session_reset = false;
        let mut timed_out = false;

        if self.state != SessionState::Invalid && self.elapsed(now) > self.session_timeout {
            self.state = SessionState::Invalid;
            timed_out = true;
        }
        if input == Input::InvalidCommand {
            self.state = SessionState::Invalid;
        }

        let (action, timeout) = loop {
            match self.state {
                SessionState::Invalid => {
                    self.state = SessionState::WaitForBridge;
                    self.last_confirmed = now;
                    session_reset = true;
                    // Whatever arrived belongs to the dropped session
                    input = Input::NoInput;
                }

                SessionState::WaitForBridge => {
                    if input != Input::BridgeConfirmed {
                        break (Action::SendSearch, Duration::from_millis(SEARCH_TIMEOUT_MS));
                    }
                    self.state = SessionState::WaitForSessionSid;
                    input = Input::NoInput;
                }

                SessionState::WaitForSessionSid => {
                    if input != Input::SessionIdReceived {
                        break (
                            Action::SendEstablishSession,
                            Duration::from_millis(SESSION_ID_TIMEOUT_MS),
                        );
                    }
                    self.state = SessionState::NeedRegister;
                    input = Input::NoInput;
                }

                SessionState::NeedRegister => {
                    if input != Input::SessionEstablished {
                        break (
                            Action::SendRegistration,
                            Duration::from_millis(REGISTRATION_TIMEOUT_MS),
                        );
                    }
                    self.state = SessionState::Valid;
                    self.last_confirmed = now;
                    input = Input::NoInput;
                }

                SessionState::Valid | SessionState::ValidKeepAlive => {
                    if input == Input::KeepAliveReceived {
                        self.last_confirmed = now;
                        notify = Some(SessionState::ValidKeepAlive);
                    }

                    let elapsed = self.elapsed(now);
                    if elapsed >= self.keep_alive {
                        break (Action::SendKeepAlive, self.keep_alive);
                    }
                    break (Action::None, (self.keep_alive - elapsed).max(MIN_TIMEOUT));
                }
            }
        };

        if self.state != previous && notify.is_none() {
            notify = Some(self.state);
        }

        Step {
            state: self.state,
            action,
            timeout,
            notify,
            session_reset,
            timed_out,
        }
    }
}
