//! A USB/IP server exporting the devices of a local USB host controller.
//!
//! The crate is split into a protocol codec ([usbip_protocol]), three pieces
//! of bookkeeping ([DeviceRegistry], [ClientRegistry], [TransferTable]) owned
//! by a single [UsbIpServer](server::UsbIpServer), and a thin boundary to the
//! USB host stack ([host]).
//!
//! Every transfer a remote client submits is correlated with its completion
//! through the transfer table, which admits at most one in-flight transfer
//! per `(device, endpoint)` pair.
use log::*;
use num_derive::FromPrimitive;
use std::collections::HashMap;
use std::net::SocketAddr;

mod client;
mod config;
mod consts;
mod device;
mod endpoint;
mod error;
pub mod host;
mod interface;
pub mod server;
mod setup;
mod transfer;
pub mod usbip_protocol;
mod util;

pub use client::*;
pub use config::*;
pub use consts::*;
pub use device::*;
pub use endpoint::*;
pub use error::*;
pub use interface::*;
pub use setup::*;
pub use transfer::*;
