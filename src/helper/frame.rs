//! Helper frame wire format.
//!
//! One datagram per frame: a single command byte followed by a
//! command-specific payload. File descriptors ride alongside as
//! SCM_RIGHTS ancillary data on the same sendmsg.

use std::io;
use std::os::fd::RawFd;

use nix::sys::socket::{ControlMessage, MsgFlags, sendmsg};

/// Largest payload a helper frame may carry.
pub const MAX_FRAME_PAYLOAD: usize = 2048;

/// One control-channel frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperFrame {
    pub cmd: u8,
    pub payload: Vec<u8>,
    /// Descriptors to pass with the frame (not serialized into payload).
    pub fds: Vec<RawFd>,
}

impl HelperFrame {
    pub fn new(cmd: u8, payload: Vec<u8>) -> Self {
        HelperFrame {
            cmd,
            payload,
            fds: Vec::new(),
        }
    }

    pub fn with_fds(cmd: u8, payload: Vec<u8>, fds: Vec<RawFd>) -> Self {
        HelperFrame { cmd, payload, fds }
    }

    /// The datagram body: command byte then payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.payload.len());
        out.push(self.cmd);
        out.extend_from_slice(&self.payload);
        out
    }

    /// Send over a datagram socket, attaching fds via SCM_RIGHTS.
    pub fn send_on(&self, sock: RawFd) -> io::Result<usize> {
        let body = self.to_bytes();
        let iov = [io::IoSlice::new(&body)];
        let cmsgs: Vec<ControlMessage<'_>> = if self.fds.is_empty() {
            Vec::new()
        } else {
            vec![ControlMessage::ScmRights(&self.fds)]
        };
        sendmsg::<nix::sys::socket::UnixAddr>(sock, &iov, &cmsgs, MsgFlags::empty(), None)
            .map_err(|e| io::Error::from_raw_os_error(e as i32))
    }
}

/// Parse one received datagram into a frame (fds arrive separately via
/// the recvmsg ancillary data and are attached by the caller).
pub fn parse_frame(datagram: &[u8]) -> Option<HelperFrame> {
    let (&cmd, payload) = datagram.split_first()?;
    if payload.len() > MAX_FRAME_PAYLOAD {
        return None;
    }
    Some(HelperFrame::new(cmd, payload.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let frame = HelperFrame::new(b'Z', vec![1, 2, 3]);
        let bytes = frame.to_bytes();
        assert_eq!(bytes, vec![b'Z', 1, 2, 3]);
        assert_eq!(parse_frame(&bytes), Some(frame));
    }

    #[test]
    fn test_empty_datagram_rejected() {
        assert_eq!(parse_frame(&[]), None);
    }

    #[test]
    fn test_oversize_rejected() {
        let mut datagram = vec![b'A'];
        datagram.extend(vec![0u8; MAX_FRAME_PAYLOAD + 1]);
        assert_eq!(parse_frame(&datagram), None);
    }
}
