//! Events delivered to user code.
//!
//! Everything the driver reports back travels through one sum type so user
//! callbacks are a single `match`. Events for one connection are dispatched
//! in parse order by the event pump; events of different connections only
//! order relative to each other as they were parsed.

use crate::conn::ConnId;
use crate::device::Driver;
use crate::error::Error;
use crate::pbuf::PacketBuf;
use crate::pipeline::OpKind;

/// Driver event, dispatched by [`EventPump`](crate::device::EventPump).
/// Cloning is cheap: packet payloads are shared, not copied.
#[derive(Clone, Debug)]
pub enum Event {
    /// Initial command sequence finished
    InitFinish,
    /// Modem finished booting
    Ready,
    /// Station joined the access point
    WifiConnected,
    /// Station lost the access point
    WifiDisconnected,
    /// DHCP assigned an address
    WifiGotIp,
    /// A connection became active. `client` is false for connections the
    /// modem server accepted.
    ConnActive { id: ConnId, client: bool },
    /// A `+IPD` payload arrived for a connection
    ConnDataRecv { id: ConnId, data: PacketBuf },
    /// The modem confirmed an outbound payload, reporting how many staged
    /// bytes the connection accepts again
    ConnDataSent {
        id: ConnId,
        len: usize,
        mem_available: usize,
    },
    /// The modem rejected an outbound payload
    ConnDataSendErr { id: ConnId },
    /// Final event of a connection; its slot is recycled after dispatch
    ConnClosed { id: ConnId, forced: bool },
    /// Periodic tick for every active connection
    ConnPoll { id: ConnId },
    /// A non-blocking command finished
    CommandDone { op: OpKind, result: Result<(), Error> },
}

/// User callback surface for the event pump.
pub trait EventHandler {
    fn on_event(&mut self, driver: &Driver<'_>, event: Event);
}

/// Composes two handlers; each sees every event. Useful to run the HTTP
/// server next to application connection handling.
pub struct Chain<A, B>(pub A, pub B);

impl<A: EventHandler, B: EventHandler> EventHandler for Chain<A, B> {
    fn on_event(&mut self, driver: &Driver<'_>, event: Event) {
        self.0.on_event(driver, event.clone());
        self.1.on_event(driver, event);
    }
}
