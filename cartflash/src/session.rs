//! Bootloader command session: synchronous request/response primitives.
//!
//! A [`BootSession`] exclusively owns the open serial connection for its
//! entire lifetime. Every primitive writes a command, then blocks for the
//! defined-length reply; there is never more than one request in flight.

use byteorder::{BigEndian, WriteBytesExt};
use log::{debug, trace};
use std::thread;
use std::time::Duration;

use crate::chip::ChipIdentity;
use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::{Command, LedState, MIN_PROTOCOL_VERSION};

/// Settle delay between the two JEDEC confirmation reads.
const JEDEC_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// An open bootloader session.
///
/// Generic over the port type `P` so the same protocol code runs against
/// a real serial port or a scripted test port.
pub struct BootSession<P: Port> {
    port: P,
    jedec_settle: Duration,
}

impl<P: Port> BootSession<P> {
    /// Wrap an already-open port configured at the protocol data rate.
    pub fn new(port: P) -> Self {
        Self {
            port,
            jedec_settle: JEDEC_SETTLE_DELAY,
        }
    }

    /// Override the settle delay between the two identify reads.
    #[must_use]
    pub fn with_jedec_settle(mut self, settle: Duration) -> Self {
        self.jedec_settle = settle;
        self
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Get a mutable reference to the underlying port.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Write a command frame and block for its fixed-length reply.
    fn command(&mut self, frame: &[u8], reply: &mut [u8]) -> Result<()> {
        self.port.write_all(frame)?;
        self.port.flush()?;
        if !reply.is_empty() {
            self.port.read_exact(reply)?;
        }
        Ok(())
    }

    /// Query the bootloader protocol version.
    ///
    /// The device answers with two ASCII decimal digits.
    pub fn get_version(&mut self) -> Result<u8> {
        let mut reply = [0u8; 2];
        self.command(&[Command::Version as u8], &mut reply)?;
        let text = std::str::from_utf8(&reply)
            .map_err(|_| Error::Protocol(format!("non-ASCII version reply: {reply:02X?}")))?;
        let version = text
            .parse::<u8>()
            .map_err(|_| Error::Protocol(format!("unparseable version reply: {text:?}")))?;
        debug!("Bootloader protocol version {version}");
        Ok(version)
    }

    /// Query the version and require flash cart support.
    ///
    /// Too-old firmware is terminal for the run; there is no workaround.
    pub fn check_version(&mut self) -> Result<u8> {
        let found = self.get_version()?;
        if found < MIN_PROTOCOL_VERSION {
            return Err(Error::IncompatibleBootloader {
                found,
                min: MIN_PROTOCOL_VERSION,
            });
        }
        Ok(found)
    }

    fn read_jedec_once(&mut self) -> Result<[u8; 3]> {
        let mut reply = [0u8; 3];
        self.command(&[Command::Identify as u8], &mut reply)?;
        Ok(reply)
    }

    /// Read the JEDEC identity twice and require byte-identical replies.
    ///
    /// A missing or half-seated cart returns floating-bus values that
    /// differ between reads, so a single read cannot be trusted. A
    /// mismatch is immediately fatal; there is no further retry.
    pub fn read_chip_identity(&mut self) -> Result<ChipIdentity> {
        let first = self.read_jedec_once()?;
        thread::sleep(self.jedec_settle);
        let second = self.read_jedec_once()?;
        if first != second {
            return Err(Error::UnstableChipId { first, second });
        }
        trace!("JEDEC identity confirmed: {first:02X?}");
        Ok(ChipIdentity::from_bytes(first))
    }

    /// Select the destination page address for the next data write.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn set_address(&mut self, page: u16) -> Result<()> {
        let mut frame = Vec::with_capacity(3);
        frame.push(Command::SetAddress as u8);
        frame.write_u16::<BigEndian>(page).unwrap();
        let mut ack = [0u8; 1];
        self.command(&frame, &mut ack)?;
        trace!("SetAddress page {page} acked ({:02X})", ack[0]);
        Ok(())
    }

    /// Declare the byte length of the following data write. No reply.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn set_length(&mut self, len: u16) -> Result<()> {
        let mut frame = Vec::with_capacity(3);
        frame.push(Command::SetLength as u8);
        frame.write_u16::<BigEndian>(len).unwrap();
        self.command(&frame, &mut [])
    }

    /// Stream a data block to the previously selected address.
    pub fn write_data(&mut self, data: &[u8]) -> Result<()> {
        self.port.write_all(&[Command::WriteData as u8])?;
        self.port.write_all(data)?;
        self.port.flush()?;
        let mut ack = [0u8; 1];
        self.port.read_exact(&mut ack)?;
        trace!("{} bytes acked ({:02X})", data.len(), ack[0]);
        Ok(())
    }

    /// Set the RGB status LED.
    pub fn set_led(&mut self, state: LedState) -> Result<()> {
        let mut ack = [0u8; 1];
        self.command(&[Command::SetLed as u8, state as u8], &mut ack)
    }

    /// Leave the bootloader, resume application firmware, and close the port.
    ///
    /// The port is released even if it was already closed; calling this
    /// twice is harmless apart from the second command failing.
    pub fn exit(&mut self) -> Result<()> {
        let mut ack = [0u8; 1];
        let result = self.command(&[Command::Exit as u8], &mut ack);
        self.port.close()?;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::mock::MockPort;

    fn session(port: MockPort) -> BootSession<MockPort> {
        BootSession::new(port).with_jedec_settle(Duration::ZERO)
    }

    #[test]
    fn test_get_version_parses_ascii_decimal() {
        let mut s = session(MockPort::new().reply(b"13"));
        assert_eq!(s.get_version().unwrap(), 13);
        assert_eq!(s.port().written(), b"V");
    }

    #[test]
    fn test_get_version_rejects_garbage() {
        let mut s = session(MockPort::new().reply(&[0xFF, 0xFE]));
        assert!(matches!(s.get_version(), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_check_version_rejects_version_12() {
        let mut s = session(MockPort::new().reply(b"12"));
        assert!(matches!(
            s.check_version(),
            Err(Error::IncompatibleBootloader { found: 12, min: 13 })
        ));
    }

    #[test]
    fn test_check_version_accepts_minimum() {
        let mut s = session(MockPort::new().reply(b"13"));
        assert_eq!(s.check_version().unwrap(), 13);
    }

    #[test]
    fn test_chip_identity_requires_identical_reads() {
        let mut s = session(MockPort::new().reply(&[0xEF, 0x40, 0x15, 0xEF, 0x40, 0x15]));
        let id = s.read_chip_identity().unwrap();
        assert_eq!(id.manufacturer, 0xEF);
        assert_eq!(id.capacity_exp, 0x15);
        // Two identify round-trips on the wire.
        assert_eq!(s.port().written(), b"jj");
    }

    #[test]
    fn test_chip_identity_mismatch_is_fatal() {
        let mut s = session(MockPort::new().reply(&[0xEF, 0x40, 0x15, 0xFF, 0x40, 0x15]));
        assert!(matches!(
            s.read_chip_identity(),
            Err(Error::UnstableChipId { .. })
        ));
    }

    #[test]
    fn test_set_address_is_big_endian() {
        let mut s = session(MockPort::new().reply(&[0x00]));
        s.set_address(0x1234).unwrap();
        assert_eq!(s.port().written(), &[b'A', 0x12, 0x34]);
    }

    #[test]
    fn test_set_length_has_no_reply() {
        // No reply queued: set_length must not attempt a read.
        let mut s = session(MockPort::new());
        s.set_length(904).unwrap();
        assert_eq!(s.port().written(), &[b'B', 0x03, 0x88]);
    }

    #[test]
    fn test_write_data_streams_payload_then_waits_for_ack() {
        let mut s = session(MockPort::new().reply(&[0x00]));
        s.write_data(&[0xAA, 0xBB, 0xCC]).unwrap();
        assert_eq!(s.port().written(), &[b'C', 0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn test_write_data_surfaces_missing_ack_as_transport_error() {
        let mut s = session(MockPort::new());
        assert!(matches!(s.write_data(&[0xAA]), Err(Error::Io(_))));
    }

    #[test]
    fn test_set_led_sends_state_code() {
        let mut s = session(MockPort::new().reply(&[0x00]));
        s.set_led(LedState::Red).unwrap();
        assert_eq!(s.port().written(), &[b'x', 0x42]);
    }

    #[test]
    fn test_exit_closes_port() {
        let mut s = session(MockPort::new().reply(&[0x00]));
        s.exit().unwrap();
        assert_eq!(s.port().written(), b"E");
        assert!(s.port().is_closed());
    }

    #[test]
    fn test_exit_closes_port_even_without_ack() {
        let mut s = session(MockPort::new());
        assert!(s.exit().is_err());
        assert!(s.port().is_closed());
    }
}
