//! Interfaces the engines use to reach the hardware.
//!
//! Implement these for your board: the engines never touch a UART, a GPIO
//! or a timer directly.

use crate::host::SyncState;
use crate::types::{Address, CommMode};

/// Byte-oriented half-duplex channel.
pub trait DataClient {
    /// At least one received byte is waiting.
    fn available(&mut self) -> bool;
    /// Take one received byte. Only called after `available()` returned true.
    fn read(&mut self) -> u8;
    fn write(&mut self, byte: u8);

    /// Switch the bus driver to receive.
    fn set_input(&mut self);
    /// Switch the bus driver to transmit.
    fn set_output(&mut self);

    /// Called before the first byte of an outgoing frame.
    fn start_transaction(&mut self) {}
    /// Called after the last byte of an outgoing frame.
    fn end_transaction(&mut self) {}

    /// Switch the link speed. With `dry_run` only report whether `mode` is
    /// supported. The default supports nothing but the base rate.
    fn set_comm_mode(&mut self, mode: CommMode, dry_run: bool) -> bool {
        let _ = dry_run;
        mode == CommMode::Base
    }

    /// Best-effort diagnostic output.
    fn dump(&mut self, label: &str, data: &[u8]) {
        log::debug!("{}: {:02x?}", label, data);
    }
}

/// The sense line, used for daisy-chain address assignment.
pub trait SenseClient {
    /// Drive our own upstream sense output.
    fn set(&mut self, ready: bool);
    /// Downstream has been addressed, or nothing is connected downstream.
    fn is_ready(&mut self) -> bool;
    /// Host side: a node is plugged in.
    fn is_connected(&mut self) -> bool;
}

pub trait LedClient {
    fn set(&mut self, ready: bool);
}

/// Tick source and delays. Ticks are expected in milliseconds and may wrap.
pub trait TimeClient {
    fn tick(&mut self) -> u32;
    fn delay_microseconds(&mut self, usec: u32);
    fn delay(&mut self, msec: u32);
}

/// Host-side notifications. Every method defaults to doing nothing.
#[allow(unused_variables)]
pub trait HostClient {
    fn io_id_received(&mut self, address: Address, id: &[u8]) {}
    fn command_rev_received(&mut self, address: Address, rev: u8) {}
    fn jv_rev_received(&mut self, address: Address, rev: u8) {}
    fn protocol_ver_received(&mut self, address: Address, rev: u8) {}
    fn function_check_received(&mut self, address: Address, functions: &[u8]) {}
    /// A polling cycle over every device finished.
    fn synced(&mut self, state: &SyncState) {}
}

impl HostClient for () {}
