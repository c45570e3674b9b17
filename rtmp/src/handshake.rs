use std::{
    io::{Read, Write},
    time::Instant,
};

use rand::RngCore;

use crate::error::RtmpError;

const RTMP_VERSION: u8 = 3;
const HANDSHAKE_SIZE: usize = 1536;

/// Performs the client side of the C0/C1/C2 handshake.
pub(crate) fn perform<S>(stream: &mut S) -> Result<(), RtmpError>
where
    S: Read + Write,
{
    let send_time = Instant::now();

    // C0 version
    stream.write_all(&[RTMP_VERSION])?;

    // C1 timestamp(4 bytes), zero(4 bytes), random(1528 bytes)
    let mut c1 = [0u8; HANDSHAKE_SIZE];
    c1[0..4].copy_from_slice(&0u32.to_be_bytes());
    rand::rng().fill_bytes(&mut c1[8..]);
    stream.write_all(&c1)?;
    stream.flush()?;

    // S0 version
    let mut s0 = [0u8; 1];
    stream.read_exact(&mut s0)?;
    if s0[0] != RTMP_VERSION {
        return Err(RtmpError::HandshakeFailed(
            format!("server proposed RTMP version {}", s0[0]).into(),
        ));
    }

    // S1 mirrors the C1 layout
    let mut s1 = [0u8; HANDSHAKE_SIZE];
    stream.read_exact(&mut s1)?;
    let s1_read_timestamp = send_time.elapsed().as_millis() as u32;

    // C2 echoes S1 with our read timestamp
    let mut c2 = s1;
    c2[4..8].copy_from_slice(&s1_read_timestamp.to_be_bytes());
    stream.write_all(&c2)?;
    stream.flush()?;

    // S2 echoes C1
    let mut s2 = [0u8; HANDSHAKE_SIZE];
    stream.read_exact(&mut s2)?;
    if s2[0..4] != c1[0..4] || s2[8..] != c1[8..] {
        return Err(RtmpError::HandshakeFailed("S2 does not match C1".into()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Cursor};

    // Read + Write backed by separate in-memory buffers, standing in for a
    // well-behaved server.
    struct FakeServer {
        inbound: Cursor<Vec<u8>>,
        outbound: Vec<u8>,
    }

    impl Read for FakeServer {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.inbound.read(buf)
        }
    }

    impl Write for FakeServer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.outbound.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn rejects_mismatched_s2() {
        let mut inbound = vec![RTMP_VERSION];
        inbound.extend_from_slice(&[0u8; HANDSHAKE_SIZE]); // S1
        inbound.extend_from_slice(&[0xAAu8; HANDSHAKE_SIZE]); // bogus S2
        let mut server = FakeServer {
            inbound: Cursor::new(inbound),
            outbound: Vec::new(),
        };

        assert!(matches!(
            perform(&mut server),
            Err(RtmpError::HandshakeFailed(_))
        ));
        // C0 + C1 + C2 were sent before the mismatch was detected.
        assert_eq!(server.outbound.len(), 1 + 2 * HANDSHAKE_SIZE);
        assert_eq!(server.outbound[0], RTMP_VERSION);
    }

    #[test]
    fn rejects_unknown_version() {
        let mut server = FakeServer {
            inbound: Cursor::new(vec![9u8]),
            outbound: Vec::new(),
        };
        assert!(matches!(
            perform(&mut server),
            Err(RtmpError::HandshakeFailed(_))
        ));
    }
}
