//! Enumerate the I/O boards on a serial port and print their inputs.
//! Usage: serial_host [PORT] [POLL_MS]

mod serial_client;

use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use jvs_proto::{Address, Host, HostClient, SyncState};
use serial_client::SerialClient;

struct Printer;

impl HostClient for Printer {
    fn io_id_received(&mut self, address: Address, id: &[u8]) {
        println!("{:>3}: {}", *address, String::from_utf8_lossy(id));
    }

    fn command_rev_received(&mut self, address: Address, rev: u8) {
        println!("{:>3}: command rev {:x}", *address, rev);
    }

    fn function_check_received(&mut self, address: Address, functions: &[u8]) {
        println!("{:>3}: functions {:02x?}", *address, functions);
    }

    fn synced(&mut self, state: &SyncState) {
        println!(
            "system {:02x} coins {:04b} sw0 {:02x?} sw1 {:02x?}",
            state.system, state.coins, state.sw_state0, state.sw_state1
        );
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let mut args = std::env::args();
    args.next(); // Skip program name
    let port = args.next().unwrap_or_else(|| "/dev/ttyUSB0".to_string());
    let interval = match args.next() {
        Some(ms) => ms.parse().context("Poll interval must be in milliseconds")?,
        None => 16,
    };
    let interval = Duration::from_millis(interval);

    let mut host = Host::new(SerialClient::open(&port)?);
    let mut last_sync = Instant::now();
    loop {
        if host.run(&mut Printer) && last_sync.elapsed() >= interval {
            host.sync();
            last_sync = Instant::now();
        }
        std::thread::sleep(Duration::from_micros(200));
    }
}
