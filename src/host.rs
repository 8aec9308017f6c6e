//! See [`Host`] for more details.

use arrayvec::ArrayVec;
use snafu::{ensure, OptionExt, Snafu};

use crate::client::{DataClient, HostClient, SenseClient, TimeClient};
use crate::command::Opcode;
use crate::frame::{write_frame, Decoded, FrameDecoder, RxState, MAX_PAYLOAD_SIZE};
use crate::node::MAX_DEVICES;
use crate::nom_parser;
use crate::types::Address;

/// Players tracked in a [`SyncState`].
pub const MAX_PLAYERS: usize = 4;

// The reset packet carries a fixed second byte.
const RESET_MAGIC: u8 = 0xD9;

/// A handshake or polling exchange that went wrong. The host starts over
/// from [`State::Disconnected`] after any of these.
#[derive(Debug, Snafu, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionError {
    #[snafu(display("No response in time"))]
    Timeout,
    #[snafu(display("Malformed or unexpected response"))]
    InvalidResponse,
    #[snafu(display("No node address left to assign"))]
    AddressExhausted,
}

/// Protocol timing, in ticks of [`TimeClient::tick()`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HostTiming {
    /// Settle time before each of the two resets.
    pub reset_interval: u32,
    pub response_timeout: u32,
    /// How long the sense line may take to follow an address assignment.
    pub ready_grace: u32,
}

impl Default for HostTiming {
    fn default() -> Self {
        Self {
            reset_interval: 500,
            response_timeout: 100,
            ready_grace: 2,
        }
    }
}

/// Per-device queries issued once every device has an address.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Query {
    IoId,
    CommandRev,
    JvRev,
    ProtocolVer,
    FunctionCheck,
}

impl Query {
    pub const fn opcode(self) -> Opcode {
        match self {
            Query::IoId => Opcode::IoId,
            Query::CommandRev => Opcode::CommandRev,
            Query::JvRev => Opcode::JvRev,
            Query::ProtocolVer => Opcode::ProtocolVer,
            Query::FunctionCheck => Opcode::FunctionCheck,
        }
    }

    const fn next(self) -> Option<Query> {
        match self {
            Query::IoId => Some(Query::CommandRev),
            Query::CommandRev => Some(Query::JvRev),
            Query::JvRev => Some(Query::ProtocolVer),
            Query::ProtocolVer => Some(Query::FunctionCheck),
            Query::FunctionCheck => None,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum State {
    Disconnected,
    /// Waiting for the bus to settle before the first reset.
    Connected,
    Reset,
    ResetWaitInterval,
    Reset2,
    Address,
    AddressWaitResponse,
    /// Waiting for the sense line after an address assignment.
    ReadyCheck,
    Request(Query),
    Wait(Query),
    Ready,
    RequestSync,
    WaitSyncResponse,
    WaitCoinSyncResponse,
    /// Held for one step before returning to `Disconnected`.
    Failed(SessionError),
}

/// Capabilities learned from a device's function-check report.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub players: u8,
    pub buttons: u8,
    pub coin_slots: u8,
}

impl DeviceInfo {
    /// Switch bytes per player.
    pub fn button_bytes(&self) -> u8 {
        ((u16::from(self.buttons) + 7) >> 3) as u8
    }
}

/// Input snapshot across every device, handed to [`HostClient::synced`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncState {
    /// Players over all devices, at most [`MAX_PLAYERS`].
    pub players: u8,
    /// System switches, bit 7 is the test switch.
    pub system: u8,
    /// One bit per coin slot, set in the cycle a new coin was taken.
    pub coins: u8,
    pub sw_state0: [u8; MAX_PLAYERS],
    pub sw_state1: [u8; MAX_PLAYERS],
}

/// Bus master part of the JVS protocol.
///
/// [`run()`](Host::run) advances the session by one small step and must be
/// called from a polling loop. The host resets the bus, assigns addresses
/// along the daisy chain, interrogates every device and then polls inputs
/// whenever [`sync()`](Host::sync) is called.
///
/// ```
/// use jvs_proto::client::{DataClient, SenseClient, TimeClient};
/// use jvs_proto::host::{Host, SyncState};
/// use jvs_proto::HostClient;
///
/// struct Printer;
///
/// impl HostClient for Printer {
///     fn synced(&mut self, state: &SyncState) {
///         println!("player 1: {:02x}", state.sw_state0[0]);
///     }
/// }
///
/// fn poll<C: DataClient + SenseClient + TimeClient>(host: &mut Host<C>) {
///     if host.run(&mut Printer) {
///         host.sync();
///     }
/// }
/// ```
#[derive(Debug)]
pub struct Host<C> {
    client: C,
    rx: FrameDecoder,
    timing: HostTiming,
    state: State,
    tick: u32,
    devices: u8,
    target: u8,
    info: [DeviceInfo; MAX_DEVICES],
    sync: SyncState,
    last_error: Option<SessionError>,
}

impl<C> Host<C>
where
    C: DataClient + SenseClient + TimeClient,
{
    pub fn new(client: C) -> Self {
        Self::with_timing(client, HostTiming::default())
    }

    pub fn with_timing(mut client: C, timing: HostTiming) -> Self {
        client.set_input();
        Self {
            client,
            rx: FrameDecoder::new(),
            timing,
            state: State::Disconnected,
            tick: 0,
            devices: 0,
            target: 0,
            info: Default::default(),
            sync: SyncState::default(),
            last_error: None,
        }
    }

    /// Take one step. Returns true while the session is ready for
    /// [`sync()`](Self::sync).
    pub fn run(&mut self, events: &mut impl HostClient) -> bool {
        if !self.client.is_connected() {
            if self.state != State::Disconnected {
                log::debug!("node disconnected");
            }
            self.state = State::Disconnected;
            return false;
        }

        let next = self.step(events);
        if next != self.state {
            log::trace!("{:?} -> {:?}", self.state, next);
        }
        if let State::Failed(error) = next {
            log::warn!("session failed in {:?}: {}", self.state, error);
            self.last_error = Some(error);
        }
        self.state = next;
        self.state == State::Ready
    }

    /// Start an input polling cycle. Ignored unless the session is ready.
    pub fn sync(&mut self) {
        if self.state != State::Ready {
            return;
        }
        self.target = 1;
        self.sync.system = 0;
        self.state = State::RequestSync;
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Addresses handed out since the last reset.
    pub fn devices(&self) -> u8 {
        self.devices
    }

    /// Capabilities of the device at `address`. Only the first
    /// [`MAX_DEVICES`] devices are tracked.
    pub fn device_info(&self, address: Address) -> Option<DeviceInfo> {
        if address.is_broadcast() || *address > self.devices {
            return None;
        }
        self.info.get(usize::from(*address).checked_sub(1)?).copied()
    }

    pub fn sync_state(&self) -> &SyncState {
        &self.sync
    }

    /// The error behind the most recent restart of the handshake.
    pub fn last_error(&self) -> Option<SessionError> {
        self.last_error
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }

    fn step(&mut self, events: &mut impl HostClient) -> State {
        let state = self.state;
        match state {
            State::Disconnected => {
                self.tick = self.client.tick();
                State::Connected
            }
            State::Connected | State::ResetWaitInterval
                if !self.elapsed(self.timing.reset_interval) =>
            {
                state
            }
            State::Connected => State::Reset,
            State::ResetWaitInterval => State::Reset2,
            State::Reset => {
                self.send_reset();
                State::ResetWaitInterval
            }
            State::Reset2 => {
                self.send_reset();
                State::Address
            }
            State::Address => match Address::from_wire(self.devices).next() {
                Some(address) => {
                    self.devices = *address;
                    self.send(Address::BROADCAST, &[Opcode::AddressSet.into(), *address]);
                    State::AddressWaitResponse
                }
                None => State::Failed(AddressExhaustedSnafu.build()),
            },
            State::AddressWaitResponse => self.await_response(state, |host, status| {
                ensure!(nom_parser::ack(status), InvalidResponseSnafu);
                host.tick = host.client.tick();
                Ok(State::ReadyCheck)
            }),
            State::ReadyCheck => {
                if self.client.is_ready() {
                    self.target = 1;
                    State::Request(Query::IoId)
                } else if self.elapsed(self.timing.ready_grace) {
                    // another device further down the chain
                    State::Address
                } else {
                    state
                }
            }
            State::Request(query) => {
                self.send(self.target_address(), &[query.opcode().into()]);
                State::Wait(query)
            }
            State::Wait(query) => self.await_response(state, |host, status| {
                host.on_query(query, status, events)
            }),
            State::Ready => state,
            State::RequestSync => {
                let info = self.target_info();
                self.send(
                    self.target_address(),
                    &[
                        Opcode::SwInput.into(),
                        info.players,
                        info.button_bytes(),
                        Opcode::CoinInput.into(),
                        info.coin_slots,
                    ],
                );
                State::WaitSyncResponse
            }
            State::WaitSyncResponse => {
                self.await_response(state, |host, status| host.on_inputs(status, events))
            }
            State::WaitCoinSyncResponse => self.await_response(state, |host, status| {
                ensure!(nom_parser::ack(status), InvalidResponseSnafu);
                Ok(host.next_sync_target(events))
            }),
            State::Failed(_) => State::Disconnected,
        }
    }

    fn on_query(
        &mut self,
        query: Query,
        status: &[u8],
        events: &mut impl HostClient,
    ) -> Result<State, SessionError> {
        let address = self.target_address();
        match query {
            Query::IoId => {
                let id = nom_parser::identification(status).context(InvalidResponseSnafu)?;
                events.io_id_received(address, id);
            }
            Query::CommandRev => {
                let rev = nom_parser::revision(status).context(InvalidResponseSnafu)?;
                events.command_rev_received(address, rev);
            }
            Query::JvRev => {
                let rev = nom_parser::revision(status).context(InvalidResponseSnafu)?;
                events.jv_rev_received(address, rev);
            }
            Query::ProtocolVer => {
                let rev = nom_parser::revision(status).context(InvalidResponseSnafu)?;
                events.protocol_ver_received(address, rev);
            }
            Query::FunctionCheck => {
                let (records, functions) =
                    nom_parser::function_check(status).context(InvalidResponseSnafu)?;
                if let Some(info) = self.info.get_mut(usize::from(self.target) - 1) {
                    info.players = functions.players;
                    info.buttons = functions.buttons;
                    info.coin_slots = functions.coin_slots;
                    let players = self.sync.players.saturating_add(functions.players);
                    self.sync.players = players.min(MAX_PLAYERS as u8);
                } else {
                    log::warn!("device {} not tracked", self.target);
                }
                events.function_check_received(address, records);
            }
        }

        Ok(match query.next() {
            Some(query) => State::Request(query),
            None if self.target < self.devices => {
                self.target += 1;
                State::Request(Query::IoId)
            }
            None => {
                log::debug!("{} devices ready", self.devices);
                State::Ready
            }
        })
    }

    fn on_inputs(
        &mut self,
        status: &[u8],
        events: &mut impl HostClient,
    ) -> Result<State, SessionError> {
        let info = self.target_info();
        let button_bytes = usize::from(info.button_bytes());
        let inputs = nom_parser::switch_and_coins(
            status,
            info.players,
            info.button_bytes(),
            info.coin_slots,
        )
        .context(InvalidResponseSnafu)?;

        // players of the devices before this one
        let first_player: usize = self
            .info
            .iter()
            .take(usize::from(self.target) - 1)
            .map(|info| usize::from(info.players))
            .sum();

        self.sync.system |= inputs.system;
        for player in 0..usize::from(info.players) {
            let index = first_player + player;
            if index >= MAX_PLAYERS {
                break;
            }
            let switches = inputs.switches.get(button_bytes * player..).unwrap_or(&[]);
            self.sync.sw_state0[index] = switches.first().copied().unwrap_or(0);
            self.sync.sw_state1[index] = match button_bytes {
                0 | 1 => 0,
                _ => switches.get(1).copied().unwrap_or(0),
            };
        }

        for slot in 0..info.coin_slots {
            let mask = match 1u8.checked_shl((first_player + usize::from(slot)) as u32) {
                Some(mask) => mask,
                None => break,
            };
            if self.sync.coins & mask != 0 {
                self.sync.coins &= !mask;
                continue;
            }
            let coin = inputs.coin(usize::from(slot)).unwrap_or(0);
            // upper bits flag a jammed or disconnected mechanism
            if coin & 0xC000 != 0 || coin == 0 {
                continue;
            }
            self.sync.coins |= mask;
            self.send(
                self.target_address(),
                &[Opcode::CoinSub.into(), slot + 1, 0x00, 0x01],
            );
            return Ok(State::WaitCoinSyncResponse);
        }
        Ok(self.next_sync_target(events))
    }

    fn next_sync_target(&mut self, events: &mut impl HostClient) -> State {
        if self.target < self.devices {
            self.target += 1;
            State::RequestSync
        } else {
            events.synced(&self.sync);
            State::Ready
        }
    }

    /// Poll for the response to the last request, `waiting` stays the
    /// state until it arrives or times out.
    fn await_response<F>(&mut self, waiting: State, handle: F) -> State
    where
        F: FnOnce(&mut Self, &[u8]) -> Result<State, SessionError>,
    {
        match self.receive_status() {
            Ok(Some(status)) => handle(self, &status).unwrap_or_else(State::Failed),
            Ok(None) => waiting,
            Err(error) => State::Failed(error),
        }
    }

    fn receive_status(&mut self) -> Result<Option<ArrayVec<u8, MAX_PAYLOAD_SIZE>>, SessionError> {
        while self.rx.state() != RxState::Verified && self.client.available() {
            let byte = self.client.read();
            // corrupted frames are dropped silently, the host never answers
            if let Decoded::Data = self.rx.push(byte) {
                if self.rx.frame().len() == 1 && !self.accepts(self.rx.address()) {
                    self.rx.reset();
                }
            }
        }
        if self.rx.state() == RxState::Verified {
            let mut status = ArrayVec::new();
            status.try_extend_from_slice(self.rx.payload()).ok();
            log::trace!("rx {:02x?}", &status[..]);
            self.rx.reset();
            return Ok(Some(status));
        }
        ensure!(!self.elapsed(self.timing.response_timeout), TimeoutSnafu);
        Ok(None)
    }

    fn accepts(&self, address: Option<Address>) -> bool {
        matches!(address, Some(address) if address.is_host() || address.is_broadcast())
    }

    fn send_reset(&mut self) {
        self.client.dump("reset", &[]);
        self.send(Address::BROADCAST, &[Opcode::Reset.into(), RESET_MAGIC]);
        self.devices = 0;
        self.info = Default::default();
        self.sync = SyncState::default();
    }

    fn send(&mut self, address: Address, payload: &[u8]) {
        let mut packet = ArrayVec::<u8, 8>::new();
        packet.push(*address);
        packet.push(payload.len() as u8 + 1);
        packet.extend(payload.iter().copied());
        log::trace!("tx {:02x?}", &packet[..]);

        self.rx.reset();
        self.client.set_output();
        self.client.start_transaction();
        let client = &mut self.client;
        write_frame(&packet, |byte| client.write(byte));
        self.client.end_transaction();
        self.client.set_input();
        self.tick = self.client.tick();
    }

    /// Wraparound-safe check whether more than `duration` ticks passed since
    /// the last request.
    fn elapsed(&mut self, duration: u32) -> bool {
        self.client.tick().wrapping_sub(self.tick) > duration
    }

    fn target_address(&self) -> Address {
        Address::from_wire(self.target)
    }

    fn target_info(&self) -> DeviceInfo {
        usize::from(self.target)
            .checked_sub(1)
            .and_then(|index| self.info.get(index))
            .copied()
            .unwrap_or_default()
    }
}
