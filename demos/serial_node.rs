//! A one-player I/O board on a serial port. Usage: serial_node [PORT]

mod serial_client;

use anyhow::Result;

use jvs_proto::{Delivery, Node, Opcode, REPORT_OK};
use serial_client::SerialClient;

const IO_ID: &[u8] = b"jvs-proto;Demo I/O;Ver1.0\0";
// one player with 13 buttons, two coin slots
const FUNCTIONS: [u8; 9] = [0x01, 0x01, 0x0D, 0x00, 0x02, 0x02, 0x00, 0x00, 0x00];

fn main() -> Result<()> {
    env_logger::init();

    let mut args = std::env::args();
    args.next(); // Skip program name
    let port = args.next().unwrap_or_else(|| "/dev/ttyUSB0".to_string());

    let mut node = Node::new(SerialClient::open(&port)?, 1);
    let mut coins = [0u16; 2];

    loop {
        let command = match node.next_command() {
            Delivery::Command(command) => command,
            Delivery::Incomplete => continue,
            Delivery::Idle => {
                std::thread::sleep(std::time::Duration::from_micros(100));
                continue;
            }
        };
        log::debug!("command {:02x?}", &command[..]);

        match command.opcode() {
            Some(Opcode::Reset) => coins = [0; 2],
            Some(Opcode::IoId) => {
                node.push_report(REPORT_OK);
                IO_ID.iter().for_each(|b| node.push_report(*b));
            }
            Some(Opcode::FunctionCheck) => {
                node.push_report(REPORT_OK);
                FUNCTIONS.iter().for_each(|b| node.push_report(*b));
            }
            Some(Opcode::SwInput) => {
                node.push_report(REPORT_OK);
                node.push_report(0); // system
                for _ in 0..usize::from(command[1]) * usize::from(command[2]) {
                    node.push_report(0);
                }
            }
            Some(Opcode::CoinInput) => {
                node.push_report(REPORT_OK);
                for slot in 0..usize::from(command[1]) {
                    let count = coins.get(slot).copied().unwrap_or(0);
                    count.to_be_bytes().iter().for_each(|b| node.push_report(*b));
                }
            }
            Some(Opcode::CoinSub) => {
                let slot = usize::from(command[1]).saturating_sub(1);
                let amount = u16::from_be_bytes([command[2], command[3]]);
                if let Some(count) = coins.get_mut(slot) {
                    *count = count.saturating_sub(amount);
                }
                node.push_report(REPORT_OK);
            }
            Some(Opcode::DriverOutput) => node.push_report(REPORT_OK),
            _ => node.send_unknown_status(),
        }
    }
}
