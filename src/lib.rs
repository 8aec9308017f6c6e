#![cfg_attr(not(feature = "std"), no_std)]
//! JVS is the half-duplex RS-485 bus that connects arcade main boards to
//! their I/O boards. One host polls up to 31 nodes, which are addressed one
//! by one along a daisy chain with the help of a sense line.
//!
//! This crate implements both ends without touching any hardware: the
//! embedding application implements the traits in [`client`] for its UART,
//! GPIOs and timer, and drives a [`Node`] or a [`Host`] from a polling loop.
//! No allocation happens anywhere, so it runs on bare-metal targets with the
//! `std` feature disabled.
//!
//! The node engine answers the bus management commands (reset, address
//! assignment, revision queries, retry, link-speed negotiation) by itself and
//! hands the rest to the application, see [`Node`]. The host engine runs the
//! whole handshake and input polling, see [`Host`].

mod buffer;
pub mod client;
pub mod command;
pub mod frame;
pub mod host;
pub mod node;
mod nom_parser;
pub mod types;

pub use client::{DataClient, HostClient, LedClient, SenseClient, TimeClient};
pub use command::{command_size, CommandSize, Opcode};
pub use frame::Packet;
pub use host::{Host, HostTiming, SessionError, SyncState};
pub use node::{Command, Delivery, Node};
pub use types::{Address, CommMode, Error, Status, REPORT_OK};
