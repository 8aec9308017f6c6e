//! Collaborator traits over a USB RS-485 adapter.
//!
//! RTS drives the transceiver direction, DTR is our sense output and CTS
//! reads the sense line from the next node down the chain.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serialport::SerialPort;

use jvs_proto::{DataClient, LedClient, SenseClient, TimeClient};

pub struct SerialClient {
    port: Box<dyn SerialPort>,
    rx: VecDeque<u8>,
    started: Instant,
}

impl SerialClient {
    pub fn open(path: &str) -> Result<Self> {
        let port = serialport::new(path, 115_200)
            .timeout(Duration::from_millis(1))
            .open()
            .with_context(|| format!("Failed to open serial port {}", path))?;
        Ok(Self {
            port,
            rx: VecDeque::new(),
            started: Instant::now(),
        })
    }

    fn fill(&mut self) {
        let pending = match self.port.bytes_to_read() {
            Ok(0) | Err(_) => return,
            Ok(n) => n as usize,
        };
        let mut buf = vec![0; pending];
        match self.port.read(&mut buf) {
            Ok(len) => self.rx.extend(&buf[..len]),
            Err(e) => log::warn!("read failed: {}", e),
        }
    }
}

impl DataClient for SerialClient {
    fn available(&mut self) -> bool {
        if self.rx.is_empty() {
            self.fill();
        }
        !self.rx.is_empty()
    }

    fn read(&mut self) -> u8 {
        self.rx.pop_front().unwrap_or(0)
    }

    fn write(&mut self, byte: u8) {
        if let Err(e) = self.port.write_all(&[byte]) {
            log::warn!("write failed: {}", e);
        }
    }

    fn set_input(&mut self) {
        let _ = self.port.flush();
        let _ = self.port.write_request_to_send(false);
    }

    fn set_output(&mut self) {
        let _ = self.port.write_request_to_send(true);
    }
}

impl SenseClient for SerialClient {
    fn set(&mut self, ready: bool) {
        let _ = self.port.write_data_terminal_ready(ready);
    }

    fn is_ready(&mut self) -> bool {
        // adapters without the line wired report nothing downstream
        self.port.read_clear_to_send().unwrap_or(true)
    }

    fn is_connected(&mut self) -> bool {
        true
    }
}

impl LedClient for SerialClient {
    fn set(&mut self, ready: bool) {
        log::info!("ready LED {}", if ready { "on" } else { "off" });
    }
}

impl TimeClient for SerialClient {
    fn tick(&mut self) -> u32 {
        self.started.elapsed().as_millis() as u32
    }

    fn delay_microseconds(&mut self, usec: u32) {
        std::thread::sleep(Duration::from_micros(u64::from(usec)));
    }

    fn delay(&mut self, msec: u32) {
        std::thread::sleep(Duration::from_millis(u64::from(msec)));
    }
}
