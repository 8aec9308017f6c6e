mod common;

use common::{BusInterface, Rs485Bus, SharedBus};
use jvs_proto::host::{DeviceInfo, State};
use jvs_proto::{
    Address, Delivery, Host, HostClient, Node, Opcode, SessionError, SyncState, REPORT_OK,
};

struct Board {
    id: &'static [u8],
    system: u8,
    switches: [u8; 2],
    coins: u16,
}

fn serve(node: &mut Node<BusInterface>, board: &mut Board) {
    while let Delivery::Command(command) = node.next_command() {
        match command.opcode() {
            Some(Opcode::Reset) => {}
            Some(Opcode::IoId) => {
                node.push_report(REPORT_OK);
                for byte in board.id {
                    node.push_report(*byte);
                }
            }
            Some(Opcode::FunctionCheck) => {
                node.push_report(REPORT_OK);
                for byte in &[0x01, 0x01, 0x0C, 0x00, 0x02, 0x01, 0x00, 0x00, 0x00] {
                    node.push_report(*byte);
                }
            }
            Some(Opcode::SwInput) => {
                node.push_report(REPORT_OK);
                node.push_report(board.system);
                for _ in 0..command[1] {
                    for byte in board.switches.iter().take(usize::from(command[2])) {
                        node.push_report(*byte);
                    }
                }
            }
            Some(Opcode::CoinInput) => {
                node.push_report(REPORT_OK);
                for _ in 0..command[1] {
                    for byte in &board.coins.to_be_bytes() {
                        node.push_report(*byte);
                    }
                }
            }
            Some(Opcode::CoinSub) => {
                let amount = u16::from_be_bytes([command[2], command[3]]);
                board.coins = board.coins.saturating_sub(amount);
                node.push_report(REPORT_OK);
            }
            _ => node.send_unknown_status(),
        }
    }
}

#[derive(Default)]
struct Events {
    ids: Vec<(Address, Vec<u8>)>,
    synced: Vec<SyncState>,
}

impl HostClient for Events {
    fn io_id_received(&mut self, address: Address, id: &[u8]) {
        self.ids.push((address, id.to_vec()));
    }

    fn synced(&mut self, state: &SyncState) {
        self.synced.push(state.clone());
    }
}

struct Cabinet {
    bus: SharedBus,
    host: Host<BusInterface>,
    nodes: Vec<(Node<BusInterface>, Board)>,
    events: Events,
}

impl Cabinet {
    fn new(boards: Vec<Board>) -> Self {
        let bus = Rs485Bus::new(boards.len());
        let host = Host::new(Rs485Bus::interface(&bus, 0));
        let nodes = boards
            .into_iter()
            .enumerate()
            .map(|(i, board)| (Node::new(Rs485Bus::interface(&bus, i + 1), 1), board))
            .collect();
        Cabinet {
            bus,
            host,
            nodes,
            events: Events::default(),
        }
    }

    /// Step everything until `done` holds, one tick per round.
    fn run_until(&mut self, mut done: impl FnMut(&mut Self) -> bool) {
        for _ in 0..5000 {
            self.host.run(&mut self.events);
            for (node, board) in self.nodes.iter_mut() {
                serve(node, board);
            }
            if done(self) {
                return;
            }
            self.bus.borrow_mut().advance(1);
        }
        panic!("stuck in {:?}", self.host.state());
    }
}

fn boards() -> Vec<Board> {
    vec![
        Board {
            id: b"ACME;Near;Ver1.0\0",
            system: 0x80,
            switches: [0x56, 0x78],
            coins: 0,
        },
        Board {
            id: b"ACME;Far;Ver1.0\0",
            system: 0x00,
            switches: [0x12, 0x34],
            coins: 1,
        },
    ]
}

#[test]
fn enumerate_daisy_chain() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut cabinet = Cabinet::new(boards());
    cabinet.run_until(|c| c.host.state() == State::Ready);

    assert_eq!(cabinet.host.devices(), 2);
    // the far end of the chain gets the first address
    assert_eq!(cabinet.nodes[1].0.address(0), Address::node(1).ok());
    assert_eq!(cabinet.nodes[0].0.address(0), Address::node(2).ok());
    assert_eq!(
        cabinet.events.ids,
        vec![
            (Address::node(1).unwrap(), b"ACME;Far;Ver1.0\0".to_vec()),
            (Address::node(2).unwrap(), b"ACME;Near;Ver1.0\0".to_vec()),
        ]
    );
    assert_eq!(
        cabinet.host.device_info(Address::node(2).unwrap()),
        Some(DeviceInfo {
            players: 1,
            buttons: 12,
            coin_slots: 1
        })
    );
    assert_eq!(cabinet.host.sync_state().players, 2);
}

#[test]
fn poll_inputs_and_coins() {
    let mut cabinet = Cabinet::new(boards());
    cabinet.run_until(|c| c.host.state() == State::Ready);

    cabinet.host.sync();
    cabinet.run_until(|c| !c.events.synced.is_empty());
    let state = cabinet.events.synced.pop().unwrap();
    assert_eq!(state.players, 2);
    assert_eq!(state.system, 0x80);
    assert_eq!(state.coins, 0b01);
    assert_eq!(state.sw_state0, [0x12, 0x56, 0, 0]);
    assert_eq!(state.sw_state1, [0x34, 0x78, 0, 0]);
    assert_eq!(cabinet.nodes[1].1.coins, 0);

    cabinet.host.sync();
    cabinet.run_until(|c| !c.events.synced.is_empty());
    assert_eq!(cabinet.events.synced.pop().unwrap().coins, 0);
}

#[test]
fn silent_node_restarts_handshake() {
    let bus = Rs485Bus::new(1);
    let mut host = Host::new(Rs485Bus::interface(&bus, 0));
    let mut events = Events::default();

    let mut states = Vec::new();
    for _ in 0..1200 {
        host.run(&mut events);
        if states.last() != Some(&host.state()) {
            states.push(host.state());
        }
        if host.state() == State::Disconnected && states.len() > 1 {
            break;
        }
        bus.borrow_mut().advance(1);
    }
    assert_eq!(
        states,
        vec![
            State::Connected,
            State::Reset,
            State::ResetWaitInterval,
            State::Reset2,
            State::Address,
            State::AddressWaitResponse,
            State::Failed(SessionError::Timeout),
            State::Disconnected,
        ]
    );
    assert_eq!(host.last_error(), Some(SessionError::Timeout));

    bus.borrow_mut().set_connected(false);
    host.run(&mut events);
    bus.borrow_mut().advance(1000);
    host.run(&mut events);
    assert_eq!(host.state(), State::Disconnected);

    bus.borrow_mut().set_connected(true);
    host.run(&mut events);
    assert_eq!(host.state(), State::Connected);
    bus.borrow_mut().advance(501);
    host.run(&mut events);
    host.run(&mut events);
    assert_eq!(host.state(), State::ResetWaitInterval);
    // two resets and an address-set before, one fresh reset now
    assert_eq!(bus.borrow().transactions(0), 4);
}
