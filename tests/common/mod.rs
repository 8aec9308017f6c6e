#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use jvs_proto::{CommMode, DataClient, LedClient, Packet, SenseClient, TimeClient};

/// Simulated RS-485 daisy chain. Link 0 is the host, links 1.. are nodes in
/// chain order, link 1 being closest to the host. Host output reaches every
/// node, node output reaches the host.
#[derive(Default)]
pub struct Rs485Bus {
    links: Vec<Link>,
    now: u32,
    connected: bool,
    dash: bool,
}

#[derive(Default)]
struct Link {
    rx: VecDeque<u8>,
    sense_out: bool,
    sense_raised: usize,
    led: bool,
    comm_mode: Option<CommMode>,
    transactions: usize,
}

pub type SharedBus = Rc<RefCell<Rs485Bus>>;

impl Rs485Bus {
    /// A bus with a host link and `nodes` node links.
    pub fn new(nodes: usize) -> SharedBus {
        let mut links = Vec::new();
        links.resize_with(nodes + 1, Link::default);
        Rc::new(RefCell::new(Rs485Bus {
            links,
            connected: nodes > 0,
            ..Default::default()
        }))
    }

    pub fn interface(bus: &SharedBus, index: usize) -> BusInterface {
        BusInterface {
            bus: Rc::clone(bus),
            index,
        }
    }

    /// Nodes accept the faster link speeds.
    pub fn set_dash(&mut self, dash: bool) {
        self.dash = dash;
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    pub fn advance(&mut self, ticks: u32) {
        self.now = self.now.wrapping_add(ticks);
    }

    pub fn set_now(&mut self, now: u32) {
        self.now = now;
    }

    /// Put a packet on the wire as if the host sent it.
    pub fn send_from_host(&mut self, address: u8, payload: &[u8]) {
        let packet = Packet::new(jvs_proto::Address::from_wire(address), payload)
            .expect("payload fits");
        for byte in packet.encode() {
            self.send_to_nodes(byte);
        }
    }

    /// Raw bytes from the host side, framing is up to the caller.
    pub fn send_raw_from_host(&mut self, data: &[u8]) {
        for byte in data {
            self.send_to_nodes(*byte);
        }
    }

    /// Everything the nodes sent since the last call.
    pub fn take_host_rx(&mut self) -> Vec<u8> {
        self.links[0].rx.drain(..).collect()
    }

    /// Decode the first complete packet the nodes sent.
    pub fn take_reply(&mut self) -> Option<Packet> {
        let wire = self.take_host_rx();
        let mut rx = jvs_proto::frame::FrameDecoder::new();
        for byte in wire {
            rx.push(byte);
            if rx.state() == jvs_proto::frame::RxState::Verified {
                break;
            }
        }
        Packet::from_frame(rx.frame())
    }

    pub fn sense(&self, index: usize) -> bool {
        self.links[index].sense_out
    }

    /// How often the link drove its sense line high.
    pub fn sense_raised(&self, index: usize) -> usize {
        self.links[index].sense_raised
    }

    pub fn led(&self, index: usize) -> bool {
        self.links[index].led
    }

    pub fn comm_mode(&self, index: usize) -> Option<CommMode> {
        self.links[index].comm_mode
    }

    pub fn transactions(&self, index: usize) -> usize {
        self.links[index].transactions
    }

    fn send_to_nodes(&mut self, byte: u8) {
        for link in self.links.iter_mut().skip(1) {
            link.rx.push_back(byte);
        }
    }

    fn send_to_host(&mut self, byte: u8) {
        self.links[0].rx.push_back(byte);
    }
}

pub struct BusInterface {
    bus: SharedBus,
    index: usize,
}

impl BusInterface {
    fn is_host(&self) -> bool {
        self.index == 0
    }
}

impl DataClient for BusInterface {
    fn available(&mut self) -> bool {
        !self.bus.borrow().links[self.index].rx.is_empty()
    }

    fn read(&mut self) -> u8 {
        self.bus.borrow_mut().links[self.index]
            .rx
            .pop_front()
            .expect("read without available data")
    }

    fn write(&mut self, byte: u8) {
        let mut bus = self.bus.borrow_mut();
        if self.is_host() {
            bus.send_to_nodes(byte);
        } else {
            bus.send_to_host(byte);
        }
    }

    fn set_input(&mut self) {}

    fn set_output(&mut self) {}

    fn start_transaction(&mut self) {
        self.bus.borrow_mut().links[self.index].transactions += 1;
    }

    fn set_comm_mode(&mut self, mode: CommMode, dry_run: bool) -> bool {
        let mut bus = self.bus.borrow_mut();
        let supported = mode == CommMode::Base || bus.dash;
        if supported && !dry_run {
            bus.links[self.index].comm_mode = Some(mode);
        }
        supported
    }
}

impl SenseClient for BusInterface {
    fn set(&mut self, ready: bool) {
        let mut bus = self.bus.borrow_mut();
        let link = &mut bus.links[self.index];
        link.sense_out = ready;
        if ready {
            link.sense_raised += 1;
        }
    }

    /// The next link down the chain has its address, or there is none.
    fn is_ready(&mut self) -> bool {
        let bus = self.bus.borrow();
        bus.links
            .get(self.index + 1)
            .map_or(true, |link| link.sense_out)
    }

    fn is_connected(&mut self) -> bool {
        self.bus.borrow().connected
    }
}

impl LedClient for BusInterface {
    fn set(&mut self, ready: bool) {
        self.bus.borrow_mut().links[self.index].led = ready;
    }
}

impl TimeClient for BusInterface {
    fn tick(&mut self) -> u32 {
        self.bus.borrow().now
    }

    fn delay_microseconds(&mut self, _usec: u32) {}

    fn delay(&mut self, msec: u32) {
        self.bus.borrow_mut().advance(msec);
    }
}
