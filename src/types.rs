//! This module defines range-checked types for JVS addresses, report
//! statuses and link speeds, meant to simplify correct usage of the API.

use snafu::{ensure, OptionExt, Snafu};

use core::convert::{TryFrom, TryInto};
use core::ops::Deref;

/// Error type for this module
#[derive(Debug, Snafu, PartialEq)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum Error {
    /// The value isn't a valid JVS node address.
    #[snafu(display("Invalid address"))]
    InvalidAddress,
    /// The value isn't a known link-speed code.
    #[snafu(display("Invalid communication mode"))]
    InvalidCommMode,
    /// The payload doesn't fit into a single frame.
    #[snafu(display("Payload too large"))]
    PayloadTooLarge,
}

/// Address is an 8-bit bus address. `0x00` is the host, `0xFF` is broadcast
/// and everything in between can be assigned to a node.
///
/// ## Example
/// ```
/// use jvs_proto::Address;
/// let addr = Address::node(1).unwrap();
/// assert!(Address::node(0xFF).is_err());
/// assert_eq!(*Address::BROADCAST, 0xFF);
/// ```
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Copy, Clone, Hash)]
#[repr(transparent)]
pub struct Address(u8);

impl Address {
    /// The bus master.
    pub const HOST: Address = Address(0x00);
    /// Frames sent here are processed by every node.
    pub const BROADCAST: Address = Address(0xFF);

    /// Create a new node address, checking that it is in \[0x01, 0xFE\].
    /// # Errors
    /// Returns [`Error::InvalidAddress`] if `address` is out of range.
    pub fn node(address: impl TryInto<u8>) -> Result<Self, Error> {
        let address = address.try_into().ok().context(InvalidAddressSnafu)?;
        ensure!(address != 0x00 && address != 0xFF, InvalidAddressSnafu);
        Ok(Self(address))
    }

    /// Wrap a raw address byte as found on the wire, reserved values included.
    pub const fn from_wire(address: u8) -> Self {
        Self(address)
    }

    pub const fn is_broadcast(self) -> bool {
        self.0 == 0xFF
    }

    pub const fn is_host(self) -> bool {
        self.0 == 0x00
    }

    /// The next node address in assignment order, or `None` once the address
    /// space is used up.
    pub fn next(self) -> Option<Self> {
        Self::node(self.0.checked_add(1)?).ok()
    }
}

impl Deref for Address {
    type Target = u8;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Address> for u8 {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl PartialEq<u8> for Address {
    fn eq(&self, other: &u8) -> bool {
        self.0 == *other
    }
}


/// Status byte leading every packet a node sends to the host.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
#[repr(u8)]
pub enum Status {
    Ok = 0x01,
    UnknownCommand = 0x02,
    ChecksumError = 0x03,
    Overflow = 0x04,
}

impl From<Status> for u8 {
    fn from(status: Status) -> Self {
        status as u8
    }
}

/// Report byte marking a command as handled.
pub const REPORT_OK: u8 = 0x01;

/// Link speed. The base rate is always available, the faster ones are
/// negotiated through the capability query and mode change commands.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
#[repr(u8)]
pub enum CommMode {
    /// 115.2 kbps
    Base = 0,
    /// 1 Mbps
    Fast1M = 1,
    /// 3 Mbps
    Fast3M = 2,
}

impl Default for CommMode {
    fn default() -> Self {
        CommMode::Base
    }
}

impl TryFrom<u8> for CommMode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(CommMode::Base),
            1 => Ok(CommMode::Fast1M),
            2 => Ok(CommMode::Fast3M),
            _ => InvalidCommModeSnafu.fail(),
        }
    }
}
