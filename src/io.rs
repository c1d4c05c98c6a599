//! Byte-stream view of a client connection.
//!
//! [`ConnectionIo`] adapts one connection to `embedded_io_async` so regular
//! protocol code can run over it. Reads drain the connection's buffered
//! inbound chain; writes go through the blocking send path, so a `write`
//! only returns once the modem confirmed the payload.

use embedded_io_async::{Read, Write};

use crate::conn::ConnId;
use crate::device::Driver;
use crate::error::Error;

impl embedded_io::Error for Error {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            Error::Timeout => embedded_io::ErrorKind::TimedOut,
            Error::Closed => embedded_io::ErrorKind::NotConnected,
            Error::NoMem => embedded_io::ErrorKind::OutOfMemory,
            _ => embedded_io::ErrorKind::Other,
        }
    }
}

pub struct ConnectionIo<'a> {
    driver: Driver<'a>,
    id: ConnId,
}

impl<'a> ConnectionIo<'a> {
    /// Wraps an open connection. Enables receive buffering on it so data
    /// arriving between `read` calls is retained.
    pub fn new(driver: Driver<'a>, id: ConnId) -> Self {
        driver.set_receive_buffering(id, true);
        Self { driver, id }
    }

    pub fn id(&self) -> ConnId {
        self.id
    }
}

impl embedded_io::ErrorType for ConnectionIo<'_> {
    type Error = Error;
}

impl Read for ConnectionIo<'_> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            let n = self.driver.receive(self.id, buf);
            if n > 0 {
                return Ok(n);
            }
            if !self.driver.is_active(self.id) {
                // Remote closed; report end of stream.
                return Ok(0);
            }
            embassy_futures::yield_now().await;
        }
    }
}

impl Write for ConnectionIo<'_> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.driver.send(self.id, buf).await
    }
}
