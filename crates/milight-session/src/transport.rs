//! Datagram I/O seams.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

/// Something that can transmit a datagram.
///
/// Implemented for [`UdpSocket`]; tests substitute a recording sink.
pub trait DatagramSink: Send + Sync {
    /// Transmit `payload` to `destination`.
    fn send_datagram(&self, payload: &[u8], destination: SocketAddr) -> io::Result<()>;
}

impl DatagramSink for UdpSocket {
    fn send_datagram(&self, payload: &[u8], destination: SocketAddr) -> io::Result<()> {
        self.send_to(payload, destination).map(|_| ())
    }
}

/// Something datagrams arrive from.
pub trait DatagramSource: Send + Sync {
    /// Wait at most `timeout` for the next datagram.
    ///
    /// An expired timeout is reported as `WouldBlock` or `TimedOut`.
    fn recv_datagram(&self, buf: &mut [u8], timeout: Duration) -> io::Result<(usize, SocketAddr)>;
}

impl DatagramSource for UdpSocket {
    fn recv_datagram(&self, buf: &mut [u8], timeout: Duration) -> io::Result<(usize, SocketAddr)> {
        self.set_read_timeout(Some(timeout))?;
        self.recv_from(buf)
    }
}
