//! Command pipeline plumbing.
//!
//! API calls build an [`Operation`], wrap it in a [`Message`] and push it
//! onto the producer channel. The link runner executes messages strictly in
//! order, one at a time: it encodes the AT text, waits for the terminal
//! reply (or, for `CIPSEND`, for the `>` prompt followed by the payload
//! phase) and resolves the message either through a completion slot (the
//! caller is blocked on it) or as a `CommandDone`/connection event on the
//! consumer channel.

use core::net::Ipv4Addr;

use atat::AtatCmd;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::Duration;
use heapless::String;

use crate::commands::*;
use crate::conn::ConnId;
use crate::error::Error;
use crate::pbuf::PacketBuf;

/// Scratch size for one encoded command line.
pub(crate) const CMD_BUF_LEN: usize = 192;

/// Number of in-flight blocking API calls supported at once.
pub(crate) const COMPLETION_SLOTS: usize = 8;

/// Hard pipeline timeout for ordinary commands.
pub(crate) const DEFAULT_CMD_TIMEOUT: Duration = Duration::from_secs(60);

/// Hard pipeline timeout for connection establishment.
pub(crate) const START_TIMEOUT: Duration = Duration::from_secs(180);

/// Command code, used for event reporting and parser dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OpKind {
    Reset,
    WifiMode,
    Join,
    Quit,
    ApList,
    StaIpGet,
    StaIpSet,
    ApIpGet,
    ApIpSet,
    StaMacGet,
    StaMacSet,
    ApMacGet,
    ApMacSet,
    Mux,
    DataInfo,
    Server,
    ServerMaxConns,
    ServerTimeout,
    Start,
    Close,
    Send,
    Status,
    Baudrate,
    SslBufferSize,
}

/// One AT operation with its owned parameters.
pub(crate) enum Operation {
    Reset(RestartCommand),
    WifiMode(WifiModeCommand),
    Join(AccessPointConnectCommand),
    JoinDefault(AccessPointConnectDefaultCommand),
    Quit(QuitAccessPointCommand),
    ApList(ListAccessPointsCommand),
    StaIpGet(StationIpQueryCommand),
    StaIpSet(StationIpSetCommand),
    StaIpSetDefault(StationIpSetDefaultCommand),
    ApIpGet(ApIpQueryCommand),
    ApIpSet(ApIpSetCommand),
    StaMacGet(StationMacQueryCommand),
    StaMacSet(StationMacSetCommand),
    ApMacGet(ApMacQueryCommand),
    ApMacSet(ApMacSetCommand),
    Mux(SetMultipleConnectionsCommand),
    DataInfo(SetDataInfoCommand),
    Server(ServerCommand),
    ServerMaxConns(ServerMaxConnectionsCommand),
    ServerTimeout(ServerTimeoutCommand),
    Start { id: ConnId, cmd: ConnectCommand },
    Close { id: ConnId, cmd: CloseCommand },
    Send { id: ConnId, data: PacketBuf },
    Status(ConnectionStatusCommand),
    Baudrate(SetBaudrateCommand),
    SslBufferSize(SslBufferSizeCommand),
}

impl Operation {
    pub(crate) fn kind(&self) -> OpKind {
        match self {
            Operation::Reset(_) => OpKind::Reset,
            Operation::WifiMode(_) => OpKind::WifiMode,
            Operation::Join(_) | Operation::JoinDefault(_) => OpKind::Join,
            Operation::Quit(_) => OpKind::Quit,
            Operation::ApList(_) => OpKind::ApList,
            Operation::StaIpGet(_) => OpKind::StaIpGet,
            Operation::StaIpSet(_) | Operation::StaIpSetDefault(_) => OpKind::StaIpSet,
            Operation::ApIpGet(_) => OpKind::ApIpGet,
            Operation::ApIpSet(_) => OpKind::ApIpSet,
            Operation::StaMacGet(_) => OpKind::StaMacGet,
            Operation::StaMacSet(_) => OpKind::StaMacSet,
            Operation::ApMacGet(_) => OpKind::ApMacGet,
            Operation::ApMacSet(_) => OpKind::ApMacSet,
            Operation::Mux(_) => OpKind::Mux,
            Operation::DataInfo(_) => OpKind::DataInfo,
            Operation::Server(_) => OpKind::Server,
            Operation::ServerMaxConns(_) => OpKind::ServerMaxConns,
            Operation::ServerTimeout(_) => OpKind::ServerTimeout,
            Operation::Start { .. } => OpKind::Start,
            Operation::Close { .. } => OpKind::Close,
            Operation::Send { .. } => OpKind::Send,
            Operation::Status(_) => OpKind::Status,
            Operation::Baudrate(_) => OpKind::Baudrate,
            Operation::SslBufferSize(_) => OpKind::SslBufferSize,
        }
    }

    /// Connection a conn-scoped operation belongs to.
    pub(crate) fn conn(&self) -> Option<ConnId> {
        match self {
            Operation::Start { id, .. }
            | Operation::Close { id, .. }
            | Operation::Send { id, .. } => Some(*id),
            _ => None,
        }
    }

    /// Encodes the command line into `buf` and returns its length.
    pub(crate) fn write(&self, buf: &mut [u8]) -> usize {
        match self {
            Operation::Reset(cmd) => cmd.write(buf),
            Operation::WifiMode(cmd) => cmd.write(buf),
            Operation::Join(cmd) => cmd.write(buf),
            Operation::JoinDefault(cmd) => cmd.write(buf),
            Operation::Quit(cmd) => cmd.write(buf),
            Operation::ApList(cmd) => cmd.write(buf),
            Operation::StaIpGet(cmd) => cmd.write(buf),
            Operation::StaIpSet(cmd) => cmd.write(buf),
            Operation::StaIpSetDefault(cmd) => cmd.write(buf),
            Operation::ApIpGet(cmd) => cmd.write(buf),
            Operation::ApIpSet(cmd) => cmd.write(buf),
            Operation::StaMacGet(cmd) => cmd.write(buf),
            Operation::StaMacSet(cmd) => cmd.write(buf),
            Operation::ApMacGet(cmd) => cmd.write(buf),
            Operation::ApMacSet(cmd) => cmd.write(buf),
            Operation::Mux(cmd) => cmd.write(buf),
            Operation::DataInfo(cmd) => cmd.write(buf),
            Operation::Server(cmd) => cmd.write(buf),
            Operation::ServerMaxConns(cmd) => cmd.write(buf),
            Operation::ServerTimeout(cmd) => cmd.write(buf),
            Operation::Start { cmd, .. } => cmd.write(buf),
            Operation::Close { cmd, .. } => cmd.write(buf),
            Operation::Send { id, data } => {
                TransmissionPrepareCommand::new(id.0, data.len()).write(buf)
            }
            Operation::Status(cmd) => cmd.write(buf),
            Operation::Baudrate(cmd) => cmd.write(buf),
            Operation::SslBufferSize(cmd) => cmd.write(buf),
        }
    }

    /// Hard timeout reclaiming the in-flight slot.
    pub(crate) fn pipeline_timeout(&self) -> Duration {
        match self {
            Operation::Start { .. } => START_TIMEOUT,
            Operation::Send { data, .. } => {
                Duration::from_secs(10) + Duration::from_millis(data.len() as u64)
            }
            _ => DEFAULT_CMD_TIMEOUT,
        }
    }
}

/// A queued pipeline message.
pub(crate) struct Message {
    pub(crate) op: Operation,
    pub(crate) token: Option<u8>,
    pub(crate) timeout: Duration,
}

/// Station or soft-AP address configuration read back from the modem.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IpConfig {
    pub ip: Option<Ipv4Addr>,
    pub gateway: Option<Ipv4Addr>,
    pub netmask: Option<Ipv4Addr>,
}

/// One `+CWLAP` scan entry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccessPoint {
    /// Encryption scheme, 0 = open .. 4 = WPA_WPA2_PSK
    pub ecn: u8,
    pub ssid: String<32>,
    pub rssi: i16,
    pub mac: String<17>,
    pub channel: u8,
}

/// Payload of a completed command.
#[derive(Clone, Debug)]
pub(crate) enum CmdPayload {
    None,
    Sent(usize),
    Ip(IpConfig),
    Mac(String<17>),
    ApList(alloc::vec::Vec<AccessPoint>),
}

pub(crate) type CmdResult = Result<CmdPayload, Error>;

const SLOT_FREE: u8 = 0;
const SLOT_PENDING: u8 = 1;
const SLOT_ABANDONED: u8 = 2;

struct CompletionSlot {
    state: core::cell::Cell<u8>,
    result: Signal<CriticalSectionRawMutex, CmdResult>,
}

// Slot state cells are only touched inside critical sections.
unsafe impl Sync for CompletionSlab {}

/// Fixed set of completion slots for blocking API calls.
///
/// A caller claims a slot, enqueues its message carrying the slot token and
/// waits on the slot's signal. If the caller gives up first the slot is
/// flagged abandoned and the runner releases it when the late result
/// arrives, matching the "reply is consumed and discarded" contract.
pub(crate) struct CompletionSlab {
    slots: [CompletionSlot; COMPLETION_SLOTS],
}

impl CompletionSlab {
    pub(crate) const fn new() -> Self {
        const SLOT: CompletionSlot = CompletionSlot {
            state: core::cell::Cell::new(SLOT_FREE),
            result: Signal::new(),
        };
        Self {
            slots: [SLOT; COMPLETION_SLOTS],
        }
    }

    pub(crate) fn claim(&self) -> Option<u8> {
        critical_section::with(|_| {
            for (i, slot) in self.slots.iter().enumerate() {
                if slot.state.get() == SLOT_FREE {
                    slot.state.set(SLOT_PENDING);
                    slot.result.reset();
                    return Some(i as u8);
                }
            }
            None
        })
    }

    /// Called by the runner with the final result of a message.
    pub(crate) fn complete(&self, token: u8, result: CmdResult) {
        let slot = &self.slots[token as usize];
        critical_section::with(|_| {
            if slot.state.get() == SLOT_ABANDONED {
                slot.state.set(SLOT_FREE);
            } else {
                slot.result.signal(result);
            }
        });
    }

    /// Awaits the result, bounded by `block` when given. On expiry the slot
    /// is left for the runner to reclaim and `Error::Timeout` is returned.
    pub(crate) async fn wait(&self, token: u8, block: Option<Duration>) -> CmdResult {
        let slot = &self.slots[token as usize];
        let result = match block {
            None => Some(slot.result.wait().await),
            Some(limit) => match embassy_time::with_timeout(limit, slot.result.wait()).await {
                Ok(result) => Some(result),
                Err(_) => None,
            },
        };
        critical_section::with(|_| match result {
            Some(result) => {
                slot.state.set(SLOT_FREE);
                Ok(result)
            }
            None => {
                // Late result may have landed between the timeout and here.
                if let Some(result) = slot.result.try_take() {
                    slot.state.set(SLOT_FREE);
                    Ok(result)
                } else {
                    slot.state.set(SLOT_ABANDONED);
                    Err(Error::Timeout)
                }
            }
        })?
    }
}
