//! Connection table and per-connection I/O state.
//!
//! The modem multiplexes up to [`MAX_CONNS`] logical connections over one
//! UART. Each one owns a slot in a fixed table: status flags, the remote
//! endpoint, an inbound packet chain and a staging buffer for outbound
//! writes. The table is shared between the link runner (parser side), the
//! event pump and user API calls, so every access goes through a short
//! blocking-mutex critical section.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use heapless::String;

use crate::device::Driver;
use crate::error::Error;
use crate::pbuf::PacketBuf;
use crate::pipeline::{CmdPayload, Operation};

/// Number of logical connections the modem firmware supports.
pub const MAX_CONNS: usize = 5;

/// Upper bound for a single `CIPSEND` payload. Larger buffers are split.
pub const CONN_MAX_DATA_LEN: usize = 2048;

/// Identifier of a connection slot, `0..MAX_CONNS`. Matches the link id
/// the modem reports in `+IPD`, `<id>,CONNECT` and `<id>,CLOSED` lines.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnId(pub(crate) u8);

impl ConnId {
    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub(crate) fn from_index(index: usize) -> Self {
        debug_assert!(index < MAX_CONNS);
        Self(index as u8)
    }
}

/// Transport type of a logical connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnType {
    Tcp,
    Udp,
    Ssl,
}

impl ConnType {
    pub(crate) fn as_at_str(self) -> &'static str {
        match self {
            ConnType::Tcp => "TCP",
            ConnType::Udp => "UDP",
            ConnType::Ssl => "SSL",
        }
    }
}

/// Snapshot of one slot, as returned by status queries.
#[derive(Clone, Debug, Default)]
pub struct ConnInfo {
    pub active: bool,
    pub client: bool,
    pub conn_type: Option<ConnType>,
    pub remote_host: Option<String<64>>,
    pub remote_port: u16,
    /// Bytes confirmed by the modem over the connection's lifetime
    pub bytes_sent: usize,
}

/// One slot of the connection table.
pub(crate) struct ConnEntry {
    /// Connection is established on the modem
    pub(crate) active: bool,
    /// Slot claimed by a local `connect()` that is still in flight
    pub(crate) reserved: bool,
    /// Opened locally (client) rather than accepted by the server
    pub(crate) client: bool,
    /// `<id>,CLOSED` seen, final event not yet dispatched
    pub(crate) closing: bool,
    pub(crate) conn_type: ConnType,
    pub(crate) remote_host: Option<String<64>>,
    pub(crate) remote_port: u16,

    /// Inbound chain, fed by the parser, drained by `Driver::receive`
    pub(crate) rx_chain: PacketBuf,
    /// Keep inbound data in `rx_chain` in addition to the event delivery
    pub(crate) buffer_rx: bool,

    /// Outbound staging buffer for `Driver::write`
    pub(crate) staging: alloc::vec::Vec<u8>,
    /// Bytes handed to the pipeline but not yet confirmed by `SEND OK`
    pub(crate) in_flight: usize,
    /// Lifetime counter of confirmed bytes
    pub(crate) bytes_sent: usize,
}

impl ConnEntry {
    pub(crate) const fn new() -> Self {
        Self {
            active: false,
            reserved: false,
            client: false,
            closing: false,
            conn_type: ConnType::Tcp,
            remote_host: None,
            remote_port: 0,
            rx_chain: PacketBuf::new(),
            buffer_rx: false,
            staging: alloc::vec::Vec::new(),
            in_flight: 0,
            bytes_sent: 0,
        }
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::new();
    }

    /// Staging bytes still acceptable before the next automatic flush.
    pub(crate) fn write_credit(&self) -> usize {
        CONN_MAX_DATA_LEN.saturating_sub(self.staging.len())
    }
}

/// Wifi session status maintained from unsolicited messages.
#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WifiStatus {
    pub joined: bool,
    pub ip_assigned: bool,
    pub ready: bool,
}

/// Driver state shared between the runners and the user API.
pub(crate) struct Shared {
    pub(crate) conns: [ConnEntry; MAX_CONNS],
    pub(crate) wifi: WifiStatus,
    /// Events lost because the consumer queue was full
    pub(crate) events_dropped: u32,
}

impl Shared {
    pub(crate) const fn new() -> Self {
        Self {
            conns: [
                ConnEntry::new(),
                ConnEntry::new(),
                ConnEntry::new(),
                ConnEntry::new(),
                ConnEntry::new(),
            ],
            wifi: WifiStatus {
                joined: false,
                ip_assigned: false,
                ready: false,
            },
            events_dropped: 0,
        }
    }

    /// Claims the lowest free slot for an outgoing connection.
    pub(crate) fn claim_free(&mut self) -> Option<usize> {
        let index = self
            .conns
            .iter()
            .position(|c| !c.active && !c.reserved && !c.closing)?;
        let entry = &mut self.conns[index];
        entry.reset();
        entry.reserved = true;
        entry.client = true;
        Some(index)
    }
}

pub(crate) type SharedState = Mutex<CriticalSectionRawMutex, RefCell<Shared>>;

impl Driver<'_> {
    /// Opens an outgoing connection. The lowest free slot is claimed and
    /// announced to the modem as the explicit link id; the call resolves
    /// once the modem reports both `<id>,CONNECT` and the terminal `OK`.
    pub async fn connect(
        &self,
        conn_type: ConnType,
        host: &str,
        port: u16,
    ) -> Result<ConnId, Error> {
        let host: String<64> = String::try_from(host).map_err(|_| Error::ParamErr)?;

        let index = self
            .shared
            .lock(|s| s.borrow_mut().claim_free())
            .ok_or(Error::NoMem)?;
        let id = ConnId::from_index(index);

        self.shared.lock(|s| {
            let mut s = s.borrow_mut();
            let entry = &mut s.conns[index];
            entry.conn_type = conn_type;
            entry.remote_host = Some(host.clone());
            entry.remote_port = port;
            entry.buffer_rx = true;
        });

        let cmd = crate::commands::ConnectCommand::new(
            id.0,
            conn_type.as_at_str(),
            host,
            port,
        );
        self.request(Operation::Start { id, cmd }).await?;
        Ok(id)
    }

    /// Closes a connection. The slot is recycled after the final
    /// `ConnClosed` event was dispatched.
    pub async fn close(&self, id: ConnId) -> Result<(), Error> {
        self.ensure_active(id)?;
        let cmd = crate::commands::CloseCommand::new(id.0);
        self.request(Operation::Close { id, cmd }).await?;
        Ok(())
    }

    /// Requests a close without waiting for the outcome.
    pub fn close_later(&self, id: ConnId) -> Result<(), Error> {
        let cmd = crate::commands::CloseCommand::new(id.0);
        self.submit(Operation::Close { id, cmd })
    }

    /// Sends `data`, splitting it into modem-sized payloads, and waits for
    /// every `SEND OK`. Returns the number of bytes the modem confirmed.
    pub async fn send(&self, id: ConnId, data: &[u8]) -> Result<usize, Error> {
        self.ensure_active(id)?;
        let mut sent = 0;
        for chunk in data.chunks(CONN_MAX_DATA_LEN) {
            self.shared
                .lock(|s| s.borrow_mut().conns[id.index()].in_flight += chunk.len());
            match self
                .request(Operation::Send {
                    id,
                    data: crate::pbuf::PacketBuf::from_slice(chunk),
                })
                .await
            {
                Ok(CmdPayload::Sent(n)) => sent += n,
                Ok(_) => sent += chunk.len(),
                Err(e) => {
                    return if sent > 0 { Ok(sent) } else { Err(e) };
                }
            }
        }
        Ok(sent)
    }

    /// Queues an owned chain for transmission without blocking. Completion
    /// arrives as `ConnDataSent`/`ConnDataSendErr` events per payload unit.
    pub fn send_chain(&self, id: ConnId, mut data: crate::pbuf::PacketBuf) -> Result<(), Error> {
        self.ensure_active(id)?;
        while !data.is_empty() {
            let head = data.split_off_front(CONN_MAX_DATA_LEN);
            self.shared
                .lock(|s| s.borrow_mut().conns[id.index()].in_flight += head.len());
            self.submit(Operation::Send { id, data: head })?;
        }
        Ok(())
    }

    /// Appends bytes to the connection's staging buffer, automatically
    /// flushing each time a full modem payload accumulates. Returns the
    /// number of accepted bytes (all of them unless the pipeline queue
    /// fills up).
    pub fn write(&self, id: ConnId, data: &[u8]) -> Result<usize, Error> {
        let mut flushes: alloc::vec::Vec<crate::pbuf::PacketBuf> = alloc::vec::Vec::new();

        self.shared.lock(|s| {
            let mut s = s.borrow_mut();
            let entry = &mut s.conns[id.index()];
            if !entry.active {
                return Err(Error::Closed);
            }
            let mut rest = data;
            while !rest.is_empty() {
                let space = CONN_MAX_DATA_LEN - entry.staging.len();
                let take = space.min(rest.len());
                entry.staging.extend_from_slice(&rest[..take]);
                rest = &rest[take..];
                if entry.staging.len() == CONN_MAX_DATA_LEN {
                    let payload = core::mem::take(&mut entry.staging);
                    entry.in_flight += payload.len();
                    flushes.push(crate::pbuf::PacketBuf::from_vec(payload));
                }
            }
            Ok(())
        })?;

        for payload in flushes {
            self.submit(Operation::Send { id, data: payload })?;
        }
        Ok(data.len())
    }

    /// Flushes staged bytes as one payload.
    pub fn flush(&self, id: ConnId) -> Result<(), Error> {
        let payload = self.shared.lock(|s| {
            let mut s = s.borrow_mut();
            let entry = &mut s.conns[id.index()];
            if !entry.active || entry.staging.is_empty() {
                return None;
            }
            let payload = core::mem::take(&mut entry.staging);
            entry.in_flight += payload.len();
            Some(crate::pbuf::PacketBuf::from_vec(payload))
        });
        match payload {
            Some(payload) => self.submit(Operation::Send { id, data: payload }),
            None => Ok(()),
        }
    }

    /// Transmit credit currently available for `write` without queueing
    /// another payload: zero while bytes are in flight.
    pub fn write_credit(&self, id: ConnId) -> usize {
        self.shared.lock(|s| {
            let s = s.borrow();
            let entry = &s.conns[id.index()];
            if entry.in_flight > 0 {
                0
            } else {
                entry.write_credit()
            }
        })
    }

    /// Drains buffered inbound data into `buf`. Only connections with
    /// receive buffering enabled accumulate data here; everyone else gets
    /// the `ConnDataRecv` events only.
    pub fn receive(&self, id: ConnId, buf: &mut [u8]) -> usize {
        self.shared.lock(|s| {
            let mut s = s.borrow_mut();
            let entry = &mut s.conns[id.index()];
            let n = entry.rx_chain.copy_to(buf, 0);
            entry.rx_chain.advance(n);
            n
        })
    }

    /// Bytes waiting in the connection's inbound chain.
    pub fn bytes_available(&self, id: ConnId) -> usize {
        self.shared.lock(|s| s.borrow().conns[id.index()].rx_chain.len())
    }

    /// Enables or disables inbound buffering for [`Driver::receive`].
    pub fn set_receive_buffering(&self, id: ConnId, enabled: bool) {
        self.shared.lock(|s| {
            let mut s = s.borrow_mut();
            let entry = &mut s.conns[id.index()];
            entry.buffer_rx = enabled;
            if !enabled {
                entry.rx_chain = PacketBuf::new();
            }
        });
    }

    pub fn is_active(&self, id: ConnId) -> bool {
        self.shared.lock(|s| s.borrow().conns[id.index()].active)
    }

    pub fn is_client(&self, id: ConnId) -> bool {
        self.shared.lock(|s| {
            let s = s.borrow();
            let entry = &s.conns[id.index()];
            entry.active && entry.client
        })
    }

    /// Snapshot of one connection slot.
    pub fn conn_info(&self, id: ConnId) -> ConnInfo {
        self.shared.lock(|s| {
            let s = s.borrow();
            let entry = &s.conns[id.index()];
            ConnInfo {
                active: entry.active,
                client: entry.client,
                conn_type: entry.active.then_some(entry.conn_type),
                remote_host: entry.remote_host.clone(),
                remote_port: entry.remote_port,
                bytes_sent: entry.bytes_sent,
            }
        })
    }

    fn ensure_active(&self, id: ConnId) -> Result<(), Error> {
        let (active, closing) = self.shared.lock(|s| {
            let s = s.borrow();
            let entry = &s.conns[id.index()];
            (entry.active, entry.closing)
        });
        if closing || !active {
            return Err(Error::Closed);
        }
        Ok(())
    }
}
