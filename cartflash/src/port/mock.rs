//! Scripted in-memory port for protocol unit tests.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;
use crate::port::Port;

/// A port whose reads are served from a pre-queued reply buffer and whose
/// writes are captured for inspection.
///
/// When the reply buffer runs dry, reads fail with `TimedOut`, mirroring
/// how a real serial port behaves when the device stops answering.
pub(crate) struct MockPort {
    replies: VecDeque<u8>,
    written: Vec<u8>,
    timeout: Duration,
    closed: bool,
}

impl MockPort {
    pub(crate) fn new() -> Self {
        Self {
            replies: VecDeque::new(),
            written: Vec::new(),
            timeout: Duration::from_millis(100),
            closed: false,
        }
    }

    /// Queue bytes the "device" will answer with, in order.
    pub(crate) fn reply(mut self, bytes: &[u8]) -> Self {
        self.replies.extend(bytes);
        self
    }

    /// Everything the session wrote, in order.
    pub(crate) fn written(&self) -> &[u8] {
        &self.written
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.replies.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "no reply queued",
            ));
        }
        let n = buf.len().min(self.replies.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.replies.pop_front().unwrap();
        }
        Ok(n)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Port for MockPort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn clear_buffers(&mut self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
