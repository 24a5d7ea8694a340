//! Session management for Milight V6 bridges.
//!
//! This crate keeps a session with one bridge alive and paces the command
//! datagrams sent to it.
//!
//! ## Architecture
//!
//! - [`StateMachine`]: pure transition function of the handshake
//!   (search, session id, registration) and keep-alive cycle
//! - [`SessionCore`]: owns the session state and classifies inbound
//!   datagrams; performs no I/O
//! - [`BridgeSessionManager`]: socket plus receive thread driving the core,
//!   publishes [`SessionSnapshot`]s and notifies a [`SessionObserver`]
//! - [`QueuedSend`]: bounded command queue with category supersession and
//!   chained items
//!
//! ## State flow
//!
//! ```text
//! Invalid -> WaitForBridge -> WaitForSessionSid -> NeedRegister -> Valid
//!    ^                                                               |
//!    +---------------- no confirmation for 10 s ---------------------+
//! ```

mod config;
mod error;
mod manager;
mod queue;
mod sequence;
mod session;
mod state;
mod transport;

pub use config::*;
pub use error::*;
pub use manager::*;
pub use queue::*;
pub use sequence::*;
pub use session::*;
pub use state::*;
pub use transport::*;
