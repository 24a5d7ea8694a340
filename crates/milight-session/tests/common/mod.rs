//! Loopback fake bridge shared by the integration tests.

#![allow(dead_code)]

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use milight_session::{SessionConfig, SessionObserver, SessionState};

pub const MAC: [u8; 6] = [0xAA, 0xCC, 0xFF, 0x22, 0x33, 0x44];
pub const BRIDGE_ID: &str = "AACCFF223344";
pub const SESSION_ID: [u8; 2] = [0x10, 0x20];

/// Install a test log writer once per test binary.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("milight_session=trace")
        .with_test_writer()
        .try_init();
}

/// Answers the handshake, keep-alives and commands like a real bridge.
pub struct FakeBridge {
    pub addr: SocketAddr,
    pub frames: Receiver<Vec<u8>>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl FakeBridge {
    pub fn spawn() -> Self {
        Self::spawn_with(true)
    }

    /// A bridge that ignores search requests.
    pub fn spawn_hidden() -> Self {
        Self::spawn_with(false)
    }

    fn spawn_with(answer_search: bool) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").expect("bind fake bridge");
        socket
            .set_read_timeout(Some(Duration::from_millis(20)))
            .expect("set timeout");
        let addr = socket.local_addr().expect("local addr");
        let stop = Arc::new(AtomicBool::new(false));
        let (frames_tx, frames) = crossbeam_channel::unbounded();

        let thread_stop = Arc::clone(&stop);
        let thread = thread::spawn(move || {
            serve(&socket, &thread_stop, &frames_tx, answer_search);
        });

        FakeBridge {
            addr,
            frames,
            stop,
            thread: Some(thread),
        }
    }

    /// Session config pointing at this bridge.
    pub fn config(&self) -> SessionConfig {
        SessionConfig::new(BRIDGE_ID)
            .with_host(self.addr.ip())
            .with_port(self.addr.port())
            .with_password([0x01, 0x02])
            .with_keep_alive_ms(1000)
            .with_delay_ms(0)
    }

    /// Wait for the next received frame of the given type.
    pub fn wait_for_frame(&self, msg_type: u8, timeout: Duration) -> Option<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        loop {
            let left = deadline.checked_duration_since(Instant::now())?;
            match self.frames.recv_timeout(left) {
                Ok(frame) if frame.first() == Some(&msg_type) => return Some(frame),
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    }
}

impl Drop for FakeBridge {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn serve(socket: &UdpSocket, stop: &AtomicBool, frames: &Sender<Vec<u8>>, answer_search: bool) {
    let mut buf = [0u8; 256];
    while !stop.load(Ordering::Acquire) {
        let Ok((len, from)) = socket.recv_from(&mut buf) else {
            continue;
        };
        let frame = buf[..len].to_vec();
        if let Some(reply) = respond(&frame, answer_search) {
            let _ = socket.send_to(&reply, from);
        }
        let _ = frames.send(frame);
    }
}

fn with_header(msg_type: u8, payload: &[u8]) -> Vec<u8> {
    let mut buf = vec![msg_type, 0, 0, 0, payload.len() as u8];
    buf.extend_from_slice(payload);
    buf
}

fn respond(frame: &[u8], answer_search: bool) -> Option<Vec<u8>> {
    match *frame.first()? {
        0x10 if answer_search => {
            let mut payload = vec![0x02];
            payload.extend_from_slice(&MAC);
            payload.extend_from_slice(&[0x00, 0x20]);
            Some(with_header(0x18, &payload))
        }
        0x20 => {
            let mut payload = vec![0x00, 0x02];
            payload.extend_from_slice(&MAC);
            payload.extend_from_slice(&[0x69, 0xF0, 0x3C, 0x23, 0x00, 0x01]);
            payload.extend_from_slice(&SESSION_ID);
            payload.push(0x00);
            Some(with_header(0x28, &payload))
        }
        0x80 if frame.len() == 22 && frame[10] == 0x33 => {
            let mut payload = MAC.to_vec();
            payload.extend_from_slice(&[0x05, 0x02, 0x00, 0x34, 0x00]);
            Some(with_header(0x80, &payload))
        }
        0x80 | 0x3D | 0x3E if frame.len() == 22 => {
            Some(with_header(0x88, &[0x00, frame[7], frame[8]]))
        }
        0xD0 => {
            let mut payload = MAC.to_vec();
            payload.push(0x01);
            Some(with_header(0xD8, &payload))
        }
        _ => None,
    }
}

/// Observer forwarding every state change to a channel.
pub fn channel_observer() -> (Arc<dyn SessionObserver>, Receiver<(SessionState, SocketAddr)>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    let observer: Arc<dyn SessionObserver> = Arc::new(move |state: SessionState, addr: SocketAddr| {
        let _ = tx.send((state, addr));
    });
    (observer, rx)
}

/// Collect observed states until `target` shows up.
pub fn wait_for_state(
    rx: &Receiver<(SessionState, SocketAddr)>,
    target: SessionState,
    timeout: Duration,
) -> Option<Vec<SessionState>> {
    let deadline = Instant::now() + timeout;
    let mut seen = Vec::new();
    loop {
        let left = deadline.checked_duration_since(Instant::now())?;
        let (state, _) = rx.recv_timeout(left).ok()?;
        seen.push(state);
        if state == target {
            return Some(seen);
        }
    }
}
