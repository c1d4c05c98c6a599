//! Access point and modem management.
//!
//! The high-level half of the [`Driver`](crate::device::Driver) handle:
//! joining a network, reading and writing address configuration, scanning,
//! and switching modem-level settings like the server port or the UART
//! baudrate. Every call builds one pipeline operation and waits for its
//! terminal reply; connection state changes keep arriving as events while
//! a call is in flight.
//!
//! ## Example
//!
//! ````ignore
//! let status = driver.join("test_wifi", "secret", JoinOptions::default()).await?;
//! assert!(status.joined);
//!
//! while !driver.wifi_status().ip_assigned {}
//! let config = driver.station_ip().await?;
//! ````

use core::fmt::Write as _;
use core::net::Ipv4Addr;

use heapless::String;

use crate::commands::*;
use crate::device::Driver;
use crate::error::Error;
use crate::event::Event;
use crate::pipeline::{AccessPoint, CmdPayload, IpConfig, Operation};

/// Options for [`Driver::join`].
#[derive(Clone, Debug, Default)]
pub struct JoinOptions {
    /// Only join the access point with this BSSID
    pub bssid: Option<[u8; 6]>,
    /// Store the credentials in modem flash (`_DEF` command variant)
    pub save: bool,
}

/// Possible errors when joining an access point
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum JoinError {
    /// Given SSID is longer than the max. size of 32 chars
    InvalidSsidLength,

    /// Given password is longer than the max. size of 64 chars
    InvalidPasswordLength,

    /// The modem rejected the credentials or could not find the network
    Failed,

    /// Pipeline-level failure
    Command(Error),
}

impl From<Error> for JoinError {
    fn from(e: Error) -> Self {
        match e {
            Error::ConnFail => JoinError::Failed,
            other => JoinError::Command(other),
        }
    }
}

/// Current WIFI connection state
#[derive(Copy, Clone, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct JoinState {
    /// True if connected to an WIFI access point
    pub joined: bool,

    /// True if an IP was assigned
    pub ip_assigned: bool,
}

impl Driver<'_> {
    /// Brings the modem into its defined starting state: reset, station
    /// mode, multiple connections, remote info on `+IPD`, and a connection
    /// table refresh. Emits [`Event::InitFinish`] when done.
    pub async fn init(&self) -> Result<(), Error> {
        self.request(Operation::Reset(RestartCommand::default()))
            .await?;
        self.wait_ready().await;

        self.request(Operation::WifiMode(WifiModeCommand::station_mode()))
            .await?;
        self.request(Operation::Mux(SetMultipleConnectionsCommand::multiple()))
            .await?;
        self.request(Operation::DataInfo(SetDataInfoCommand::enabled()))
            .await?;
        self.request(Operation::Status(ConnectionStatusCommand::default()))
            .await?;

        self.post(Event::InitFinish);
        Ok(())
    }

    /// Waits for the boot banner after a reset, bounded by the configured
    /// ready timeout. A modem that stays silent is simply assumed ready.
    async fn wait_ready(&self) {
        let task = async {
            while !self.shared.lock(|s| s.borrow().wifi.ready) {
                embassy_futures::yield_now().await;
            }
        };
        let _ = embassy_futures::select::select(
            embassy_time::Timer::after(self.config.ready_timeout),
            task,
        )
        .await;
    }

    /// Joins an access point as station.
    pub async fn join(
        &self,
        ssid: &str,
        password: &str,
        options: JoinOptions,
    ) -> Result<JoinState, JoinError> {
        let ssid: String<32> = String::try_from(ssid).map_err(|_| JoinError::InvalidSsidLength)?;
        let password: String<64> =
            String::try_from(password).map_err(|_| JoinError::InvalidPasswordLength)?;
        let bssid = options.bssid.map(format_mac);

        let op = if options.save {
            Operation::JoinDefault(AccessPointConnectDefaultCommand::new(ssid, password, bssid))
        } else {
            Operation::Join(AccessPointConnectCommand::new(ssid, password, bssid))
        };
        self.request(op).await?;

        let wifi = self.wifi_status();
        Ok(JoinState {
            joined: wifi.joined,
            ip_assigned: wifi.ip_assigned,
        })
    }

    /// Disconnects from the current access point.
    pub async fn quit(&self) -> Result<(), Error> {
        self.request(Operation::Quit(QuitAccessPointCommand::default()))
            .await?;
        Ok(())
    }

    /// Scans for visible access points, optionally restricted to one SSID.
    pub async fn scan(&self, ssid: Option<&str>) -> Result<alloc::vec::Vec<AccessPoint>, Error> {
        let cmd = match ssid {
            Some(ssid) => ListAccessPointsCommand::matching(
                String::try_from(ssid).map_err(|_| Error::ParamErr)?,
            ),
            None => ListAccessPointsCommand::all(),
        };
        match self.request(Operation::ApList(cmd)).await? {
            CmdPayload::ApList(aps) => Ok(aps),
            _ => Ok(alloc::vec::Vec::new()),
        }
    }

    /// Reads the station IP configuration.
    pub async fn station_ip(&self) -> Result<IpConfig, Error> {
        match self
            .request(Operation::StaIpGet(StationIpQueryCommand::default()))
            .await?
        {
            CmdPayload::Ip(config) => Ok(config),
            _ => Err(Error::Err),
        }
    }

    /// Sets the station IP configuration. Gateway and netmask must be given
    /// together; `save` selects the persistent command variant.
    pub async fn set_station_ip(
        &self,
        ip: Ipv4Addr,
        gateway: Option<(Ipv4Addr, Ipv4Addr)>,
        save: bool,
    ) -> Result<(), Error> {
        let ip = format_ip(ip);
        let (gw, nm) = match gateway {
            Some((gw, nm)) => (Some(format_ip(gw)), Some(format_ip(nm))),
            None => (None, None),
        };
        let op = if save {
            Operation::StaIpSetDefault(StationIpSetDefaultCommand::new(ip, gw, nm))
        } else {
            Operation::StaIpSet(StationIpSetCommand::new(ip, gw, nm))
        };
        self.request(op).await?;
        Ok(())
    }

    /// Reads the soft-AP IP configuration.
    pub async fn ap_ip(&self) -> Result<IpConfig, Error> {
        match self
            .request(Operation::ApIpGet(ApIpQueryCommand::default()))
            .await?
        {
            CmdPayload::Ip(config) => Ok(config),
            _ => Err(Error::Err),
        }
    }

    /// Sets the soft-AP IP configuration.
    pub async fn set_ap_ip(
        &self,
        ip: Ipv4Addr,
        gateway: Option<(Ipv4Addr, Ipv4Addr)>,
    ) -> Result<(), Error> {
        let ip = format_ip(ip);
        let (gw, nm) = match gateway {
            Some((gw, nm)) => (Some(format_ip(gw)), Some(format_ip(nm))),
            None => (None, None),
        };
        self.request(Operation::ApIpSet(ApIpSetCommand::new(ip, gw, nm)))
            .await?;
        Ok(())
    }

    /// Reads the station MAC address.
    pub async fn station_mac(&self) -> Result<String<17>, Error> {
        match self
            .request(Operation::StaMacGet(StationMacQueryCommand::default()))
            .await?
        {
            CmdPayload::Mac(mac) => Ok(mac),
            _ => Err(Error::Err),
        }
    }

    /// Sets the station MAC address.
    pub async fn set_station_mac(&self, mac: [u8; 6]) -> Result<(), Error> {
        self.request(Operation::StaMacSet(StationMacSetCommand::new(format_mac(
            mac,
        ))))
        .await?;
        Ok(())
    }

    /// Reads the soft-AP MAC address.
    pub async fn ap_mac(&self) -> Result<String<17>, Error> {
        match self
            .request(Operation::ApMacGet(ApMacQueryCommand::default()))
            .await?
        {
            CmdPayload::Mac(mac) => Ok(mac),
            _ => Err(Error::Err),
        }
    }

    /// Sets the soft-AP MAC address. Bit 0 of the first byte must be 0.
    pub async fn set_ap_mac(&self, mac: [u8; 6]) -> Result<(), Error> {
        if mac[0] & 0x01 != 0 {
            return Err(Error::ParamErr);
        }
        self.request(Operation::ApMacSet(ApMacSetCommand::new(format_mac(mac))))
            .await?;
        Ok(())
    }

    /// Enables multiple-connection mode. Required for everything this
    /// driver does; `init` already issues it.
    pub async fn set_mux(&self) -> Result<(), Error> {
        self.request(Operation::Mux(SetMultipleConnectionsCommand::multiple()))
            .await?;
        Ok(())
    }

    /// Asks the modem to include remote address information in `+IPD`
    /// frames. `init` already issues it.
    pub async fn set_data_info(&self) -> Result<(), Error> {
        self.request(Operation::DataInfo(SetDataInfoCommand::enabled()))
            .await?;
        Ok(())
    }

    /// Switches the WIFI operating mode (1 station, 2 soft-AP, 3 both).
    pub async fn set_wifi_mode(&self, mode: u8) -> Result<(), Error> {
        if !(1..=3).contains(&mode) {
            return Err(Error::ParamErr);
        }
        self.request(Operation::WifiMode(WifiModeCommand::new(mode)))
            .await?;
        Ok(())
    }

    /// Starts the modem-side TCP server. Incoming connections surface as
    /// `ConnActive { client: false }` events; register a handler (e.g. the
    /// HTTP server) on the event pump to serve them.
    pub async fn set_server(
        &self,
        port: u16,
        max_conns: Option<u8>,
        timeout_s: Option<u16>,
    ) -> Result<(), Error> {
        if let Some(max_conns) = max_conns {
            self.request(Operation::ServerMaxConns(ServerMaxConnectionsCommand::new(
                max_conns,
            )))
            .await?;
        }
        self.request(Operation::Server(ServerCommand::listen(port)))
            .await?;
        if let Some(timeout_s) = timeout_s {
            self.request(Operation::ServerTimeout(ServerTimeoutCommand::new(
                timeout_s,
            )))
            .await?;
        }
        Ok(())
    }

    /// Stops the modem-side TCP server.
    pub async fn stop_server(&self) -> Result<(), Error> {
        self.request(Operation::Server(ServerCommand::stop()))
            .await?;
        Ok(())
    }

    /// Refreshes the connection table from `AT+CIPSTATUS`.
    pub async fn refresh_conn_status(&self) -> Result<(), Error> {
        self.request(Operation::Status(ConnectionStatusCommand::default()))
            .await?;
        Ok(())
    }

    /// Changes the AT UART baudrate for the current session.
    pub async fn set_baudrate(&self, baudrate: u32) -> Result<(), Error> {
        self.request(Operation::Baudrate(SetBaudrateCommand::new(baudrate)))
            .await?;
        Ok(())
    }

    /// Sets the modem's SSL receive buffer size (2048..=4096 bytes).
    pub async fn set_ssl_buffer_size(&self, size: u16) -> Result<(), Error> {
        self.request(Operation::SslBufferSize(SslBufferSizeCommand::new(size)))
            .await?;
        Ok(())
    }
}

fn format_ip(ip: Ipv4Addr) -> String<15> {
    let mut s = String::new();
    let _ = write!(s, "{ip}");
    s
}

fn format_mac(mac: [u8; 6]) -> String<17> {
    let mut s = String::new();
    let _ = write!(
        s,
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    );
    s
}
