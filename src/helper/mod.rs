//! Helper-process control channel.
//!
//! TLS/zlib, ident/DNS, and WebSocket framing run in child processes;
//! the core speaks a one-byte-command datagram protocol to them that can
//! also carry file descriptors. This module owns the frame codec, the
//! per-role command constructors, and the respawn supervisor.

mod frame;
mod supervise;

pub use frame::{HelperFrame, MAX_FRAME_PAYLOAD, parse_frame};
pub use supervise::{HelperRole, HelperSupervisor, RestartTracker};

/// ssld: wrap an accepted socket. `A <connid16be> [fds: ssl, plain]`.
pub fn ssld_accept(conn_id: u32) -> HelperFrame {
    HelperFrame::with_fds(b'A', conn_id.to_be_bytes().to_vec(), Vec::new())
}

/// ssld: wrap an outbound socket. `C <connid16be> [fds: ssl, plain]`.
pub fn ssld_connect(conn_id: u32) -> HelperFrame {
    HelperFrame::with_fds(b'C', conn_id.to_be_bytes().to_vec(), Vec::new())
}

/// ssld: reload cert material. `K <cert>\0<key>\0<dh>\0`.
pub fn ssld_keys(cert: &str, key: &str, dh: &str) -> HelperFrame {
    let mut payload = Vec::new();
    for part in [cert, key, dh] {
        payload.extend_from_slice(part.as_bytes());
        payload.push(0);
    }
    HelperFrame::new(b'K', payload)
}

/// ssld: seed the PRNG. `I <seed-type> <path>\0`.
pub fn ssld_init_prng(seed_type: u8, path: &str) -> HelperFrame {
    let mut payload = vec![seed_type];
    payload.extend_from_slice(path.as_bytes());
    payload.push(0);
    HelperFrame::new(b'I', payload)
}

/// ssld: ask for zipstats. `S <connid16be> <servername>\0`.
pub fn ssld_zipstats(conn_id: u32, server_name: &str) -> HelperFrame {
    let mut payload = conn_id.to_be_bytes().to_vec();
    payload.extend_from_slice(server_name.as_bytes());
    payload.push(0);
    HelperFrame::new(b'S', payload)
}

/// ssld: begin zlib on a link. `Z <connid16be> <level> <recvq...>`.
pub fn ssld_start_zlib(conn_id: u32, level: u8, recvq: &[u8]) -> HelperFrame {
    let mut payload = conn_id.to_be_bytes().to_vec();
    payload.push(level);
    payload.extend_from_slice(recvq);
    HelperFrame::new(b'Z', payload)
}

/// A reply from a helper, already classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HelperReply {
    /// `D <connid> <reason>\0` - the wrapped connection died.
    Dead { conn_id: u32, reason: String },
    /// `F <connid> <fp bytes>` - client certificate fingerprint.
    CertFp { conn_id: u32, fingerprint: String },
    /// `S <connid> <in> <in_wire> <out> <out_wire>` - zipstats.
    ZipStats {
        conn_id: u32,
        bytes_in: u64,
        wire_in: u64,
        bytes_out: u64,
        wire_out: u64,
    },
    /// authd verdicts: accept/reject for a pending client.
    AuthVerdict { conn_id: u32, accepted: bool, text: String },
    /// `N` - a notice the core should pass to the client.
    Notice { conn_id: u32, text: String },
    /// Status bytes with no payload the core needs (`U`, `z`, `I`).
    Status(u8),
}

/// Decode one helper frame into a reply.
pub fn classify_reply(frame: &HelperFrame) -> Option<HelperReply> {
    let conn_id = |p: &[u8]| -> Option<u32> {
        Some(u32::from_be_bytes(p.get(0..4)?.try_into().ok()?))
    };
    match frame.cmd {
        b'D' => Some(HelperReply::Dead {
            conn_id: conn_id(&frame.payload)?,
            reason: cstr_at(&frame.payload, 4),
        }),
        b'F' => Some(HelperReply::CertFp {
            conn_id: conn_id(&frame.payload)?,
            fingerprint: hex(&frame.payload[4..]),
        }),
        b'S' => {
            let p = &frame.payload;
            let word = |i: usize| -> Option<u64> {
                Some(u64::from_be_bytes(p.get(i..i + 8)?.try_into().ok()?))
            };
            Some(HelperReply::ZipStats {
                conn_id: conn_id(p)?,
                bytes_in: word(4)?,
                wire_in: word(12)?,
                bytes_out: word(20)?,
                wire_out: word(28)?,
            })
        }
        b'A' | b'R' => Some(HelperReply::AuthVerdict {
            conn_id: conn_id(&frame.payload)?,
            accepted: frame.cmd == b'A',
            text: cstr_at(&frame.payload, 4),
        }),
        b'N' => Some(HelperReply::Notice {
            conn_id: conn_id(&frame.payload)?,
            text: cstr_at(&frame.payload, 4),
        }),
        b'U' | b'z' | b'I' => Some(HelperReply::Status(frame.cmd)),
        _ => None,
    }
}

fn cstr_at(payload: &[u8], offset: usize) -> String {
    let tail = payload.get(offset..).unwrap_or_default();
    let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
    String::from_utf8_lossy(&tail[..end]).into_owned()
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_dead() {
        let mut payload = 7u32.to_be_bytes().to_vec();
        payload.extend_from_slice(b"TLS handshake failed\0");
        let frame = HelperFrame::new(b'D', payload);
        assert_eq!(
            classify_reply(&frame),
            Some(HelperReply::Dead {
                conn_id: 7,
                reason: "TLS handshake failed".to_string(),
            })
        );
    }

    #[test]
    fn test_classify_certfp_hex() {
        let mut payload = 3u32.to_be_bytes().to_vec();
        payload.extend_from_slice(&[0xde, 0xad]);
        let frame = HelperFrame::new(b'F', payload);
        assert_eq!(
            classify_reply(&frame),
            Some(HelperReply::CertFp {
                conn_id: 3,
                fingerprint: "dead".to_string(),
            })
        );
    }

    #[test]
    fn test_classify_zipstats() {
        let mut payload = 9u32.to_be_bytes().to_vec();
        for v in [100u64, 40, 200, 80] {
            payload.extend_from_slice(&v.to_be_bytes());
        }
        let frame = HelperFrame::new(b'S', payload);
        assert_eq!(
            classify_reply(&frame),
            Some(HelperReply::ZipStats {
                conn_id: 9,
                bytes_in: 100,
                wire_in: 40,
                bytes_out: 200,
                wire_out: 80,
            })
        );
    }

    #[test]
    fn test_keys_frame_null_separated() {
        let frame = ssld_keys("cert.pem", "key.pem", "dh.pem");
        assert_eq!(frame.cmd, b'K');
        assert_eq!(frame.payload, b"cert.pem\0key.pem\0dh.pem\0");
    }

    #[test]
    fn test_truncated_replies_rejected() {
        let frame = HelperFrame::new(b'D', vec![0, 1]);
        assert_eq!(classify_reply(&frame), None);
        let frame = HelperFrame::new(b'S', 5u32.to_be_bytes().to_vec());
        assert_eq!(classify_reply(&frame), None);
    }
}
