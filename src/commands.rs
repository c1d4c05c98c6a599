//! AT command encoders.
//!
//! Every operation the pipeline can issue is a dedicated [`AtatCmd`] type;
//! the derive takes care of argument serialisation (decimal numerics,
//! double-quoted strings, comma separation). The pipeline only uses the
//! encoding half: replies are framed and interpreted by the link parser, so
//! all commands declare [`NoResponse`].

use atat::atat_derive::AtatCmd;
use atat::heapless::String;

use crate::responses::NoResponse;

/// Restarts the module, `AT+RST`
#[derive(Clone, Default, AtatCmd)]
#[at_cmd("+RST", NoResponse, timeout_ms = 5_000)]
pub struct RestartCommand {}

/// Sets the WIFI mode of the current session
#[derive(Clone, AtatCmd)]
#[at_cmd("+CWMODE_CUR", NoResponse, timeout_ms = 1_000)]
pub struct WifiModeCommand {
    /// WIFI mode:
    ///     1: Station mode.
    ///     2: SoftAP mode.
    ///     3: SoftAP+Station mode.
    #[at_arg(position = 0)]
    mode: u8,
}

impl WifiModeCommand {
    pub fn station_mode() -> Self {
        Self { mode: 1 }
    }

    pub fn new(mode: u8) -> Self {
        Self { mode }
    }
}

/// Joins an access point without touching the stored configuration
#[derive(Clone, AtatCmd)]
#[at_cmd("+CWJAP_CUR", NoResponse, timeout_ms = 30_000, attempts = 1)]
pub struct AccessPointConnectCommand {
    /// The SSID of the target access point
    #[at_arg(position = 0)]
    ssid: String<32>,

    /// The password/key of the target access point
    #[at_arg(position = 1)]
    password: String<64>,

    /// Optional BSSID, used when several access points share the SSID
    #[at_arg(position = 2)]
    bssid: Option<String<17>>,
}

impl AccessPointConnectCommand {
    pub fn new(ssid: String<32>, password: String<64>, bssid: Option<String<17>>) -> Self {
        Self {
            ssid,
            password,
            bssid,
        }
    }
}

/// Joins an access point and stores it as the default, `AT+CWJAP_DEF`
#[derive(Clone, AtatCmd)]
#[at_cmd("+CWJAP_DEF", NoResponse, timeout_ms = 30_000, attempts = 1)]
pub struct AccessPointConnectDefaultCommand {
    #[at_arg(position = 0)]
    ssid: String<32>,

    #[at_arg(position = 1)]
    password: String<64>,

    #[at_arg(position = 2)]
    bssid: Option<String<17>>,
}

impl AccessPointConnectDefaultCommand {
    pub fn new(ssid: String<32>, password: String<64>, bssid: Option<String<17>>) -> Self {
        Self {
            ssid,
            password,
            bssid,
        }
    }
}

/// Disconnects from the current access point, `AT+CWQAP`
#[derive(Clone, Default, AtatCmd)]
#[at_cmd("+CWQAP", NoResponse, timeout_ms = 5_000)]
pub struct QuitAccessPointCommand {}

/// Lists visible access points, optionally filtered by SSID
#[derive(Clone, AtatCmd)]
#[at_cmd("+CWLAP", NoResponse, timeout_ms = 20_000)]
pub struct ListAccessPointsCommand {
    #[at_arg(position = 0)]
    ssid: Option<String<32>>,
}

impl ListAccessPointsCommand {
    pub fn all() -> Self {
        Self { ssid: None }
    }

    pub fn matching(ssid: String<32>) -> Self {
        Self { ssid: Some(ssid) }
    }
}

/// Queries the station address configuration, `AT+CIPSTA_CUR?`
#[derive(Clone, Default, AtatCmd)]
#[at_cmd("+CIPSTA_CUR?", NoResponse, timeout_ms = 1_000)]
pub struct StationIpQueryCommand {}

/// Sets the station address configuration
#[derive(Clone, AtatCmd)]
#[at_cmd("+CIPSTA_CUR", NoResponse, timeout_ms = 1_000)]
pub struct StationIpSetCommand {
    #[at_arg(position = 0)]
    ip: String<15>,

    #[at_arg(position = 1)]
    gateway: Option<String<15>>,

    #[at_arg(position = 2)]
    netmask: Option<String<15>>,
}

impl StationIpSetCommand {
    pub fn new(ip: String<15>, gateway: Option<String<15>>, netmask: Option<String<15>>) -> Self {
        Self {
            ip,
            gateway,
            netmask,
        }
    }
}

/// Persistent variant of [`StationIpSetCommand`]
#[derive(Clone, AtatCmd)]
#[at_cmd("+CIPSTA_DEF", NoResponse, timeout_ms = 1_000)]
pub struct StationIpSetDefaultCommand {
    #[at_arg(position = 0)]
    ip: String<15>,

    #[at_arg(position = 1)]
    gateway: Option<String<15>>,

    #[at_arg(position = 2)]
    netmask: Option<String<15>>,
}

impl StationIpSetDefaultCommand {
    pub fn new(ip: String<15>, gateway: Option<String<15>>, netmask: Option<String<15>>) -> Self {
        Self {
            ip,
            gateway,
            netmask,
        }
    }
}

/// Queries the soft-AP address configuration, `AT+CIPAP_CUR?`
#[derive(Clone, Default, AtatCmd)]
#[at_cmd("+CIPAP_CUR?", NoResponse, timeout_ms = 1_000)]
pub struct ApIpQueryCommand {}

/// Sets the soft-AP address configuration
#[derive(Clone, AtatCmd)]
#[at_cmd("+CIPAP_CUR", NoResponse, timeout_ms = 1_000)]
pub struct ApIpSetCommand {
    #[at_arg(position = 0)]
    ip: String<15>,

    #[at_arg(position = 1)]
    gateway: Option<String<15>>,

    #[at_arg(position = 2)]
    netmask: Option<String<15>>,
}

impl ApIpSetCommand {
    pub fn new(ip: String<15>, gateway: Option<String<15>>, netmask: Option<String<15>>) -> Self {
        Self {
            ip,
            gateway,
            netmask,
        }
    }
}

/// Queries the station MAC address, `AT+CIPSTAMAC_CUR?`
#[derive(Clone, Default, AtatCmd)]
#[at_cmd("+CIPSTAMAC_CUR?", NoResponse, timeout_ms = 1_000)]
pub struct StationMacQueryCommand {}

/// Sets the station MAC address
#[derive(Clone, AtatCmd)]
#[at_cmd("+CIPSTAMAC_CUR", NoResponse, timeout_ms = 1_000)]
pub struct StationMacSetCommand {
    #[at_arg(position = 0)]
    mac: String<17>,
}

impl StationMacSetCommand {
    pub fn new(mac: String<17>) -> Self {
        Self { mac }
    }
}

/// Queries the soft-AP MAC address, `AT+CIPAPMAC_CUR?`
#[derive(Clone, Default, AtatCmd)]
#[at_cmd("+CIPAPMAC_CUR?", NoResponse, timeout_ms = 1_000)]
pub struct ApMacQueryCommand {}

/// Sets the soft-AP MAC address
#[derive(Clone, AtatCmd)]
#[at_cmd("+CIPAPMAC_CUR", NoResponse, timeout_ms = 1_000)]
pub struct ApMacSetCommand {
    #[at_arg(position = 0)]
    mac: String<17>,
}

impl ApMacSetCommand {
    pub fn new(mac: String<17>) -> Self {
        Self { mac }
    }
}

/// Enables/Disables multiple connections
#[derive(Clone, AtatCmd)]
#[at_cmd("+CIPMUX", NoResponse, timeout_ms = 1_000)]
pub struct SetMultipleConnectionsCommand {
    /// 0: single connection, 1: multiple connections
    mode: u8,
}

impl SetMultipleConnectionsCommand {
    /// Enables multiple connections
    pub fn multiple() -> Self {
        Self { mode: 1 }
    }
}

/// Asks the modem to include remote address information in `+IPD` frames
#[derive(Clone, AtatCmd)]
#[at_cmd("+CIPDINFO", NoResponse, timeout_ms = 1_000)]
pub struct SetDataInfoCommand {
    /// 0: `+IPD,<id>,<len>:`, 1: `+IPD,<id>,<len>,"<ip>",<port>:`
    mode: u8,
}

impl SetDataInfoCommand {
    pub fn enabled() -> Self {
        Self { mode: 1 }
    }
}

/// Starts or stops the TCP server
#[derive(Clone, AtatCmd)]
#[at_cmd("+CIPSERVER", NoResponse, timeout_ms = 1_000)]
pub struct ServerCommand {
    /// 0: stop the server, 1: start it
    mode: u8,

    /// Listening port, only meaningful when starting
    port: Option<u16>,
}

impl ServerCommand {
    pub fn listen(port: u16) -> Self {
        Self {
            mode: 1,
            port: Some(port),
        }
    }

    pub fn stop() -> Self {
        Self { mode: 0, port: None }
    }
}

/// Limits the number of simultaneous server connections
#[derive(Clone, AtatCmd)]
#[at_cmd("+CIPSERVERMAXCONN", NoResponse, timeout_ms = 1_000)]
pub struct ServerMaxConnectionsCommand {
    max_conns: u8,
}

impl ServerMaxConnectionsCommand {
    pub fn new(max_conns: u8) -> Self {
        Self { max_conns }
    }
}

/// Sets the server inactivity timeout in seconds, `AT+CIPSTO`
#[derive(Clone, AtatCmd)]
#[at_cmd("+CIPSTO", NoResponse, timeout_ms = 1_000)]
pub struct ServerTimeoutCommand {
    seconds: u16,
}

impl ServerTimeoutCommand {
    pub fn new(seconds: u16) -> Self {
        Self { seconds }
    }
}

/// Establishes a TCP connection, UDP transmission or SSL connection
#[derive(Clone, AtatCmd)]
#[at_cmd("+CIPSTART", NoResponse, timeout_ms = 180_000, attempts = 1)]
pub struct ConnectCommand {
    /// Link id claimed for this connection
    link_id: u8,

    /// Connection type: TCP, UDP or SSL
    connection_type: String<3>,

    /// Remote host, IP as string or hostname
    remote_host: String<64>,

    /// Remote port
    port: u16,
}

impl ConnectCommand {
    pub fn new(link_id: u8, connection_type: &str, remote_host: String<64>, port: u16) -> Self {
        Self {
            link_id,
            connection_type: String::try_from(connection_type).unwrap_or_default(),
            remote_host,
            port,
        }
    }
}

/// Closes a connection
#[derive(Clone, AtatCmd)]
#[at_cmd("+CIPCLOSE", NoResponse, timeout_ms = 5_000)]
pub struct CloseCommand {
    link_id: u8,
}

impl CloseCommand {
    pub fn new(link_id: u8) -> Self {
        Self { link_id }
    }
}

/// Announces a payload of `length` bytes for a connection. The modem
/// answers with a `>` prompt after which the raw bytes follow.
#[derive(Clone, AtatCmd)]
#[at_cmd("+CIPSEND", NoResponse, timeout_ms = 10_000)]
pub struct TransmissionPrepareCommand {
    link_id: u8,

    length: u32,
}

impl TransmissionPrepareCommand {
    pub fn new(link_id: u8, length: usize) -> Self {
        Self {
            link_id,
            length: length as u32,
        }
    }
}

/// Queries the state of all logical connections, `AT+CIPSTATUS`
#[derive(Clone, Default, AtatCmd)]
#[at_cmd("+CIPSTATUS", NoResponse, timeout_ms = 1_000)]
pub struct ConnectionStatusCommand {}

/// Changes the AT port baudrate for the current session
#[derive(Clone, AtatCmd)]
#[at_cmd("+UART_CUR", NoResponse, timeout_ms = 1_000)]
pub struct SetBaudrateCommand {
    baudrate: u32,
    databits: u8,
    stopbits: u8,
    parity: u8,
    flow_control: u8,
}

impl SetBaudrateCommand {
    /// 8N1, no flow control
    pub fn new(baudrate: u32) -> Self {
        Self {
            baudrate,
            databits: 8,
            stopbits: 1,
            parity: 0,
            flow_control: 0,
        }
    }
}

/// Sets the modem-side SSL buffer size in bytes
#[derive(Clone, AtatCmd)]
#[at_cmd("+CIPSSLSIZE", NoResponse, timeout_ms = 1_000)]
pub struct SslBufferSizeCommand {
    size: u16,
}

impl SslBufferSizeCommand {
    pub fn new(size: u16) -> Self {
        Self { size }
    }
}
