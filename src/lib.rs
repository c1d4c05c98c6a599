//! # Asynchronous ESP8266 AT driver
//!
//! Driver core for Wi-Fi modems speaking the ESP8266 AT dialect over a
//! serial link, with multiplexed TCP/UDP/SSL connections and an embedded
//! HTTP server with CGI, POST streaming and SSI templating.
//!
//! The driver is split into four cooperating parts created from one
//! [`Resources`] pool:
//!
//! * [`Driver`]: the public API handle. Join an access point, open and
//!   close connections, send and receive bytes.
//! * [`Input`]: receive-side byte push, called by the UART driver (safe
//!   from interrupt context).
//! * [`LinkRunner`]: background future owning the UART transmit path.
//!   Executes commands strictly in order, exactly one in flight, and
//!   parses every reply line and `+IPD` payload frame.
//! * [`EventPump`]: background future dispatching [`Event`]s to an
//!   [`EventHandler`] in parse order.
//!
//! ## Setup
//!
//! ````ignore
//! use esp_at_stack::{mem::Allocator, Config, Resources};
//!
//! #[global_allocator]
//! static HEAP: Allocator<16384> = Allocator::new();
//! static RESOURCES: StaticCell<Resources> = StaticCell::new();
//!
//! let (driver, mut input, runner, pump) =
//!     esp_at_stack::new(RESOURCES.init(Resources::new()), uart_tx, Config::default());
//!
//! spawner.spawn(link_task(runner)).unwrap();
//! spawner.spawn(event_task(pump)).unwrap();
//!
//! driver.init().await?;
//! driver.join("test_wifi", "secret", Default::default()).await?;
//! ````
#![cfg_attr(not(test), no_std)]
#![cfg_attr(feature = "strict", deny(warnings))]

extern crate alloc;

pub(crate) mod commands;
pub mod conn;
mod device;
pub mod error;
pub mod event;
pub mod http;
pub mod input;
pub mod io;
pub mod mem;
pub(crate) mod parser;
pub mod pbuf;
pub(crate) mod pipeline;
pub(crate) mod responses;
pub mod urc;
pub mod wifi;

#[cfg(test)]
mod tests;

pub use conn::{ConnId, ConnType, CONN_MAX_DATA_LEN, MAX_CONNS};
pub use device::{new, Config, Driver, EventPump, LinkRunner, Resources};
pub use error::Error;
pub use event::{Event, EventHandler};
pub use input::Input;
pub use pbuf::PacketBuf;
pub use pipeline::{AccessPoint, IpConfig, OpKind};
pub use wifi::{JoinError, JoinOptions, JoinState};
