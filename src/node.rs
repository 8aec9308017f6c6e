//! See [`Node`] for more details.

use arrayvec::ArrayVec;
use core::convert::TryFrom;
use core::ops::Deref;

use crate::client::{DataClient, LedClient, SenseClient, TimeClient};
use crate::command::{command_size, CommandSize, Opcode};
use crate::frame::{
    replies_to_checksum_error, write_frame, Decoded, FrameDecoder, Role, RxState,
    MAX_PAYLOAD_SIZE,
};
use crate::types::{Address, CommMode, Status, REPORT_OK};

/// Logical devices one node can present to the daisy chain.
pub const MAX_DEVICES: usize = 4;

/// address, length and status come before the reports
pub const MAX_REPORTS: usize = 253;
const TX_SIZE: usize = 3 + MAX_REPORTS;

// Revisions reported for the mandatory queries.
const COMMAND_REV: u8 = 0x13;
const JV_REV: u8 = 0x30;
const PROTOCOL_VER: u8 = 0x10;
const PROTOCOL_VER_DASH: u8 = 0x20;

/// Inter-packet guard time at the base rate.
const GUARD_MICROS: u32 = 100;

/// A command the node doesn't handle itself, handed to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    data: ArrayVec<u8, MAX_PAYLOAD_SIZE>,
    device: Option<usize>,
    committed: bool,
}

impl Command {
    pub fn opcode(&self) -> Option<Opcode> {
        self.data.first().and_then(|b| Opcode::try_from(*b).ok())
    }

    /// Index in the daisy-chain table of the device the packet was sent to,
    /// `None` for broadcasts.
    pub const fn device(&self) -> Option<usize> {
        self.device
    }

    /// False while the enclosing packet's checksum hasn't arrived yet.
    /// Effects of an uncommitted command should be easy to take back.
    pub const fn is_committed(&self) -> bool {
        self.committed
    }
}

impl Deref for Command {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

/// Result of polling the node for its next command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Command(Command),
    /// A packet for us is still arriving.
    Incomplete,
    /// Nothing to do.
    Idle,
}

impl Delivery {
    pub fn command(self) -> Option<Command> {
        match self {
            Delivery::Command(command) => Some(command),
            _ => None,
        }
    }
}

/// Bus node (peripheral) part of the JVS protocol.
///
/// The node answers the bus management commands by itself: reset, address
/// assignment, revision queries, retry and link-speed negotiation. Every
/// other command is returned to the application, which answers by pushing
/// report bytes. The status packet is sent once the last command of a packet
/// has been handed out.
///
/// # Example
///
/// ```
/// use jvs_proto::client::{DataClient, LedClient, SenseClient, TimeClient};
/// use jvs_proto::node::{Delivery, Node};
/// use jvs_proto::{Opcode, REPORT_OK};
///
/// fn poll<C>(node: &mut Node<C>)
/// where
///     C: DataClient + SenseClient + LedClient + TimeClient,
/// {
///     while let Delivery::Command(command) = node.next_command() {
///         match command.opcode() {
///             Some(Opcode::IoId) => {
///                 node.push_report(REPORT_OK);
///                 for byte in b"ACME;I/O;Ver1.0\0" {
///                     node.push_report(*byte);
///                 }
///             }
///             Some(Opcode::Reset) => {}
///             _ => node.send_unknown_status(),
///         }
///     }
/// }
/// ```
#[derive(Debug)]
pub struct Node<C> {
    client: C,
    rx: FrameDecoder,
    // An unknown command was found before the packet was verified.
    rejected: bool,
    addresses: ArrayVec<Option<Address>, MAX_DEVICES>,
    new_address: Option<Address>,
    downstream_ready: bool,
    reports: ArrayVec<u8, MAX_REPORTS>,
    last_status: ArrayVec<u8, TX_SIZE>,
    comm_mode: CommMode,
}

impl<C> Node<C>
where
    C: DataClient + SenseClient + LedClient + TimeClient,
{
    /// Create a node presenting `devices` logical devices, clamped to
    /// \[1, [`MAX_DEVICES`]\].
    pub fn new(mut client: C, devices: usize) -> Self {
        let devices = devices.max(1).min(MAX_DEVICES);
        client.set_input();
        let mut addresses = ArrayVec::new();
        for _ in 0..devices {
            addresses.push(None);
        }
        Self {
            client,
            rx: FrameDecoder::new(),
            rejected: false,
            addresses,
            new_address: None,
            downstream_ready: false,
            reports: ArrayVec::new(),
            last_status: ArrayVec::new(),
            comm_mode: CommMode::Base,
        }
    }

    /// Process received bytes and return the next command once the whole
    /// packet has arrived and passed its checksum.
    pub fn next_command(&mut self) -> Delivery {
        self.next(false)
    }

    /// Like [`next_command()`](Self::next_command), but commands are handed
    /// out as soon as their bytes are buffered, before the checksum is
    /// known. The last command of a packet, and commands that change bus
    /// state, still wait for the checksum.
    pub fn next_speculative_command(&mut self) -> Delivery {
        self.next(true)
    }

    /// Append a report byte to the status packet for the current packet.
    /// An overflowing report sends an overflow status right away.
    pub fn push_report(&mut self, report: u8) {
        if self.rx.state() == RxState::Idle {
            return;
        }
        if self.reports.try_push(report).is_err() {
            log::warn!("report buffer overflow");
            self.reply(Status::Overflow);
        }
    }

    /// Answer the current packet with an unknown command status, skipping
    /// the rest of its commands.
    pub fn send_unknown_status(&mut self) {
        match self.rx.state() {
            RxState::Idle => {}
            RxState::Framing => self.rejected = true,
            RxState::Verified => self.reply(Status::UnknownCommand),
        }
    }

    /// Reports are waiting to be sent.
    pub fn is_busy(&self) -> bool {
        !self.reports.is_empty()
    }

    pub fn comm_mode(&self) -> CommMode {
        self.comm_mode
    }

    /// Address of the device at `index` in the daisy-chain table.
    pub fn address(&self, index: usize) -> Option<Address> {
        self.addresses.get(index).copied().flatten()
    }

    /// Every device has an address.
    pub fn is_addressed(&self) -> bool {
        self.addresses.iter().all(Option::is_some)
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }

    fn next(&mut self, speculative: bool) -> Delivery {
        loop {
            self.receive();

            let committed = match self.rx.state() {
                RxState::Idle => return Delivery::Idle,
                RxState::Framing if !speculative || self.rejected => {
                    return Delivery::Incomplete
                }
                RxState::Framing => false,
                RxState::Verified => true,
            };
            let end = match self.rx.checksum_pos() {
                Some(end) => end,
                None => return Delivery::Incomplete,
            };
            let read_pos = self.rx.buffer().read_pos();
            if committed && self.rejected {
                self.reply(Status::UnknownCommand);
                return Delivery::Idle;
            }
            if committed && read_pos >= end {
                self.reply(Status::Ok);
                return Delivery::Idle;
            }

            let command = self.rx.buffer().unread(end);
            let resolved = command_size(command);
            let (size, opcode) = match (resolved, command.first().map(|b| Opcode::try_from(*b))) {
                (CommandSize::Size(size), Some(Ok(opcode))) if size <= command.len() => {
                    (size, opcode)
                }
                (CommandSize::Unknown, _) if !committed => {
                    self.reject_unknown();
                    return Delivery::Incomplete;
                }
                _ if !committed => return Delivery::Incomplete,
                _ => {
                    // unknown opcode, or a length running past the checksum
                    self.reject_unknown();
                    continue;
                }
            };
            if !committed && (read_pos + size == end || opcode.needs_verification()) {
                return Delivery::Incomplete;
            }

            let arg = command.get(1).copied().unwrap_or(0);
            let mut data = ArrayVec::new();
            data.try_extend_from_slice(&command[..size]).ok();
            let delivered = Command {
                data,
                device: self.device_index(),
                committed,
            };

            if let Some(delivery) = self.dispatch(opcode, arg, delivered) {
                return delivery;
            }
            if self.rx.state() == RxState::Idle {
                return Delivery::Idle;
            }
            self.rx.buffer_mut().consume(size);
        }
    }

    /// Handle bus management commands. Returns `None` to move on to the
    /// next command in the packet.
    fn dispatch(&mut self, opcode: Opcode, arg: u8, command: Command) -> Option<Delivery> {
        use Opcode::*;
        match opcode {
            Reset => {
                self.set_ready(false);
                for address in self.addresses.iter_mut() {
                    *address = None;
                }
                self.client.dump("reset", &[]);
                self.rx.reset();
                return Some(Delivery::Command(command));
            }
            AddressSet => {
                let free_slot = self.addresses.iter().any(Option::is_none);
                match Address::node(arg) {
                    Ok(address) if self.downstream_ready && free_slot => {
                        self.new_address = Some(address);
                        self.push_report(REPORT_OK);
                    }
                    _ => {
                        self.rx.reset();
                        return Some(Delivery::Idle);
                    }
                }
            }
            CommandRev => {
                self.push_report(REPORT_OK);
                self.push_report(COMMAND_REV);
            }
            JvRev => {
                self.push_report(REPORT_OK);
                self.push_report(JV_REV);
            }
            ProtocolVer => {
                let dash = self.client.set_comm_mode(CommMode::Fast1M, true)
                    || self.client.set_comm_mode(CommMode::Fast3M, true);
                self.push_report(REPORT_OK);
                self.push_report(if dash { PROTOCOL_VER_DASH } else { PROTOCOL_VER });
            }
            MainId => {
                // The main board announces itself, nothing to keep.
                self.push_report(REPORT_OK);
            }
            Retry => {
                self.rx.reset();
                self.resend();
                return Some(Delivery::Idle);
            }
            CommSup => {
                let mut modes = 1;
                if self.client.set_comm_mode(CommMode::Fast1M, true) {
                    modes |= 2;
                }
                if self.client.set_comm_mode(CommMode::Fast3M, true) {
                    modes |= 4;
                }
                self.push_report(REPORT_OK);
                self.push_report(modes);
            }
            CommChg => {
                match CommMode::try_from(arg) {
                    Ok(mode) if self.client.set_comm_mode(mode, false) => {
                        log::debug!("link speed changed to {:?}", mode);
                        self.comm_mode = mode;
                    }
                    _ => log::warn!("link speed change to {:#04x} refused", arg),
                }
                self.rx.reset();
                return Some(Delivery::Idle);
            }
            IoId | FunctionCheck | SwInput | CoinInput | AnalogInput | RotaryInput
            | KeyCodeInput | ScreenPositionInput | CoinSub | DriverOutput | AnalogOutput
            | CharacterOutput | CoinAdd | Namco => {
                self.rx.buffer_mut().consume(command.len());
                return Some(Delivery::Command(command));
            }
        }
        None
    }

    fn receive(&mut self) {
        while self.rx.state() != RxState::Verified && self.client.available() {
            let byte = self.client.read();
            match self.rx.push(byte) {
                Decoded::Sync => self.start_frame(),
                Decoded::Data if self.rx.frame().len() == 1 => {
                    if !self.accepts(self.rx.address()) {
                        self.rx.reset();
                    }
                }
                Decoded::ChecksumError => {
                    if replies_to_checksum_error(Role::Node, self.rx.frame()) {
                        self.reply(Status::ChecksumError);
                    }
                }
                _ => {}
            }
        }
    }

    fn start_frame(&mut self) {
        self.rejected = false;
        self.new_address = None;
        self.reports.clear();
        self.downstream_ready = SenseClient::is_ready(&mut self.client);
    }

    fn accepts(&self, address: Option<Address>) -> bool {
        match address {
            Some(address) => address.is_broadcast() || self.addresses.contains(&Some(address)),
            None => false,
        }
    }

    fn device_index(&self) -> Option<usize> {
        let address = self.rx.address()?;
        self.addresses.iter().position(|a| *a == Some(address))
    }

    fn reject_unknown(&mut self) {
        if !self.rejected {
            let unread = self.rx.buffer().unread(self.rx.frame().len());
            let opcode = unread.first().copied().unwrap_or(0);
            self.client.dump("unknown command", &[opcode]);
        }
        self.rejected = true;
    }

    fn set_ready(&mut self, ready: bool) {
        SenseClient::set(&mut self.client, ready);
        LedClient::set(&mut self.client, ready);
    }

    /// Compose and send the status packet, closing the current packet.
    fn reply(&mut self, status: Status) {
        self.rx.reset();
        let mut packet = ArrayVec::<u8, TX_SIZE>::new();
        packet.push(*Address::HOST);
        packet.push(0);
        packet.push(status.into());
        if matches!(status, Status::Ok | Status::UnknownCommand) {
            packet.extend(self.reports.drain(..));
        }
        self.reports.clear();
        packet[1] = (packet.len() - 1) as u8;
        self.transmit(packet);
    }

    fn resend(&mut self) {
        if self.last_status.is_empty() {
            log::warn!("retry requested before any status was sent");
            return;
        }
        let packet = self.last_status.clone();
        self.transmit(packet);
    }

    fn transmit(&mut self, packet: ArrayVec<u8, TX_SIZE>) {
        self.client.set_output();
        if self.comm_mode == CommMode::Base {
            self.client.delay_microseconds(GUARD_MICROS);
        }
        // The sense line changes as late as possible, so the upstream node
        // can't mistake the address for its own.
        self.commit_address();

        log::trace!("tx {:02x?}", &packet[..]);
        self.client.start_transaction();
        let client = &mut self.client;
        write_frame(&packet, |byte| client.write(byte));
        self.client.end_transaction();
        self.client.set_input();
        self.last_status = packet;
    }

    fn commit_address(&mut self) {
        let address = match self.new_address.take() {
            Some(address) => address,
            None => return,
        };
        if let Some(slot) = self.addresses.iter().position(Option::is_none) {
            self.addresses[slot] = Some(address);
            self.client.dump("address", &[*address]);
            if slot == self.addresses.len() - 1 {
                self.set_ready(true);
            }
        }
    }
}
