//! Default forwarding engine.
//!
//! Packets travel between a stream handle and a datagram handle:
//!
//! ```text
//! stream (client)                          datagram (tun)
//! [u16 BE length][packet] ... ───────────► [packet]
//! [u16 BE length][packet] ... ◄─────────── [packet]
//! ```
//!
//! Both data handles are switched to non-blocking mode and driven by `poll`.
//! At most one packet is buffered per direction; while a packet waits to be
//! written, its source is not read. A zero length on the stream ends the
//! session.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};

use nix::errno::Errno;
use nix::fcntl::{FcntlArg, OFlag, fcntl};
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use tracing::{debug, info, warn};

use super::engine::{EngineStatus, ForwardingEngine};

/// Buffer size per direction, including the length prefix.
const BUFFER_SIZE: usize = 4096;

/// Length prefix on the stream side.
const HEADER_LEN: usize = 2;

/// Largest packet that fits a buffer.
const MAX_PACKET: usize = BUFFER_SIZE - HEADER_LEN;

/// Poll-driven packet pump between a framed stream and a tun device.
#[derive(Debug, Clone, Copy, Default)]
pub struct PacketForwarder;

impl ForwardingEngine for PacketForwarder {
    fn forward(&self, control: OwnedFd, data: OwnedFd, interface: OwnedFd) -> EngineStatus {
        let stream = File::from(data);
        let tun = File::from(interface);

        // All three handles are closed when they drop at the end of this call
        match pump(&control, &stream, &tun) {
            Ok(()) => EngineStatus::CLEAN,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                info!("Forwarding peer closed the connection");
                EngineStatus::CLEAN
            }
            Err(e) => {
                warn!("Forwarding stopped: {}", e);
                EngineStatus::from_io(&e)
            }
        }
    }
}

/// Run until the control handle is signalled or a data handle fails.
fn pump(control: &OwnedFd, stream: &File, tun: &File) -> io::Result<()> {
    set_nonblocking(stream.as_fd())?;
    set_nonblocking(tun.as_fd())?;

    let mut inbound = StreamFrame::new(); // stream -> tun
    let mut outbound = DatagramFrame::new(); // tun -> stream
    let readable = PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR;

    loop {
        let read_stream = !inbound.ready();
        let write_tun = inbound.ready();
        let read_tun = !outbound.pending();
        let write_stream = outbound.pending();

        let (ctl, s, t) = {
            let mut fds = [
                PollFd::new(control.as_fd(), PollFlags::POLLIN),
                PollFd::new(stream.as_fd(), interest(read_stream, write_stream)),
                PollFd::new(tun.as_fd(), interest(read_tun, write_tun)),
            ];
            match poll(&mut fds, PollTimeout::NONE) {
                Ok(_) => {}
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }
            (revents(&fds[0]), revents(&fds[1]), revents(&fds[2]))
        };

        if !ctl.is_empty() {
            debug!("Control handle signalled, stopping");
            return Ok(());
        }
        if s.contains(PollFlags::POLLNVAL) || t.contains(PollFlags::POLLNVAL) {
            return Err(io::Error::from_raw_os_error(libc::EBADF));
        }

        // Ends the session even while the stream is not being read
        let hangup = PollFlags::POLLHUP | PollFlags::POLLERR;
        if !read_stream && s.intersects(hangup) {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }

        if read_stream && s.intersects(readable) {
            inbound.read_from(stream)?;
        }
        if write_stream && s.intersects(PollFlags::POLLOUT | PollFlags::POLLERR) {
            outbound.write_to(stream)?;
        }
        if read_tun && t.intersects(readable) {
            outbound.read_from(tun)?;
        }
        if write_tun && t.intersects(PollFlags::POLLOUT | PollFlags::POLLERR) {
            inbound.write_to(tun)?;
        }
    }
}

fn interest(read: bool, write: bool) -> PollFlags {
    let mut flags = PollFlags::empty();
    if read {
        flags |= PollFlags::POLLIN;
    }
    if write {
        flags |= PollFlags::POLLOUT;
    }
    flags
}

fn revents(fd: &PollFd<'_>) -> PollFlags {
    fd.revents().unwrap_or(PollFlags::empty())
}

fn set_nonblocking(fd: BorrowedFd<'_>) -> io::Result<()> {
    let raw = fd.as_raw_fd();
    let flags = OFlag::from_bits_truncate(fcntl(raw, FcntlArg::F_GETFL)?);
    fcntl(raw, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

/// Non-blocking read. `None` means nothing was available; EOF is an error.
fn read_some(mut file: &File, buf: &mut [u8]) -> io::Result<Option<usize>> {
    match file.read(buf) {
        Ok(0) => Err(io::ErrorKind::UnexpectedEof.into()),
        Ok(n) => Ok(Some(n)),
        Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Non-blocking write. `None` means the handle was not ready.
fn write_some(mut file: &File, buf: &[u8]) -> io::Result<Option<usize>> {
    match file.write(buf) {
        Ok(n) => Ok(Some(n)),
        Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// A length-prefixed packet being assembled from the stream.
struct StreamFrame {
    header: [u8; HEADER_LEN],
    header_filled: usize,
    buf: Box<[u8; BUFFER_SIZE]>,
    len: usize,
    filled: usize,
}

impl StreamFrame {
    fn new() -> Self {
        Self {
            header: [0; HEADER_LEN],
            header_filled: 0,
            buf: Box::new([0; BUFFER_SIZE]),
            len: 0,
            filled: 0,
        }
    }

    /// A complete packet is waiting to be written.
    fn ready(&self) -> bool {
        self.len > 0 && self.filled == self.len
    }

    fn read_from(&mut self, stream: &File) -> io::Result<()> {
        if self.header_filled < HEADER_LEN {
            let Some(n) = read_some(stream, &mut self.header[self.header_filled..])? else {
                return Ok(());
            };
            self.header_filled += n;
            if self.header_filled < HEADER_LEN {
                return Ok(());
            }

            let len = u16::from_be_bytes(self.header) as usize;
            if len == 0 {
                return Err(io::Error::from_raw_os_error(libc::EPROTO));
            }
            if len > MAX_PACKET {
                return Err(io::Error::from_raw_os_error(libc::EMSGSIZE));
            }
            self.len = len;
            self.filled = 0;
        }

        if let Some(n) = read_some(stream, &mut self.buf[self.filled..self.len])? {
            self.filled += n;
        }
        Ok(())
    }

    fn write_to(&mut self, tun: &File) -> io::Result<()> {
        // A tun write takes the whole packet or nothing
        if write_some(tun, &self.buf[..self.len])?.is_some() {
            self.header_filled = 0;
            self.len = 0;
            self.filled = 0;
        }
        Ok(())
    }
}

/// A packet from the tun device, prefixed and being written to the stream.
struct DatagramFrame {
    buf: Box<[u8; BUFFER_SIZE]>,
    len: usize,
    sent: usize,
}

impl DatagramFrame {
    fn new() -> Self {
        Self {
            buf: Box::new([0; BUFFER_SIZE]),
            len: 0,
            sent: 0,
        }
    }

    fn pending(&self) -> bool {
        self.sent < self.len
    }

    fn read_from(&mut self, tun: &File) -> io::Result<()> {
        if let Some(n) = read_some(tun, &mut self.buf[HEADER_LEN..])? {
            self.buf[..HEADER_LEN].copy_from_slice(&(n as u16).to_be_bytes());
            self.len = HEADER_LEN + n;
            self.sent = 0;
        }
        Ok(())
    }

    fn write_to(&mut self, stream: &File) -> io::Result<()> {
        if let Some(n) = write_some(stream, &self.buf[self.sent..self.len])? {
            self.sent += n;
        }
        if !self.pending() {
            self.len = 0;
            self.sent = 0;
        }
        Ok(())
    }
}
