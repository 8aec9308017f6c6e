//! Frame codec: escape encoding, packet composition and the incremental
//! frame decoder shared by the node and the host.
//!
//! Wire layout after the sync byte, every byte escaped:
//!
//! ```text
//! address(1) length(1) payload(length - 1) checksum(1)
//! ```
//!
//! `length` counts the payload and the checksum, the checksum is the sum of
//! everything before it modulo 256.

use arrayvec::ArrayVec;
use core::convert::TryFrom;
use snafu::ensure;

use crate::buffer::{Buffer, MAX_FRAME_SIZE};
use crate::command::Opcode;
use crate::types::{Address, Error, PayloadTooLargeSnafu};

/// Start of frame.
pub const SYNC: u8 = 0xE0;
/// Escape marker, the following byte is transmitted one less than its value.
pub const MARKER: u8 = 0xD0;

/// The length byte also counts the checksum.
pub const MAX_PAYLOAD_SIZE: usize = u8::MAX as usize - 1;

/// Sync byte plus every other byte escaped.
pub const MAX_ENCODED_SIZE: usize = 1 + 2 * (MAX_FRAME_SIZE + 1);

pub(crate) fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |sum, byte| sum.wrapping_add(*byte))
}

/// Emit `byte` through `write`, escaping the two reserved values.
pub fn write_escaped(byte: u8, mut write: impl FnMut(u8)) {
    if byte == MARKER || byte == SYNC {
        write(MARKER);
        write(byte - 1);
    } else {
        write(byte);
    }
}

/// Emit a complete frame: sync, `header_and_payload` escaped, and the
/// escaped checksum. `header_and_payload` starts with address and length.
pub(crate) fn write_frame(header_and_payload: &[u8], mut write: impl FnMut(u8)) {
    write(SYNC);
    for byte in header_and_payload {
        write_escaped(*byte, &mut write);
    }
    write_escaped(checksum(header_and_payload), &mut write);
}

/// A logical packet, before escaping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    address: Address,
    payload: ArrayVec<u8, MAX_PAYLOAD_SIZE>,
}

impl Packet {
    /// # Errors
    /// Returns [`Error::PayloadTooLarge`] if `payload` can't be counted by the
    /// length byte.
    pub fn new(address: Address, payload: &[u8]) -> Result<Self, Error> {
        ensure!(payload.len() <= MAX_PAYLOAD_SIZE, PayloadTooLargeSnafu);
        let mut data = ArrayVec::new();
        data.try_extend_from_slice(payload)
            .map_err(|_| Error::PayloadTooLarge)?;
        Ok(Self {
            address,
            payload: data,
        })
    }

    /// Split a decoded frame (address through checksum) into a packet.
    /// Returns `None` if the frame is truncated or the checksum is wrong.
    pub fn from_frame(frame: &[u8]) -> Option<Self> {
        let (&sum, body) = frame.split_last()?;
        let length = *body.get(1)? as usize;
        if length == 0 || body.len() != length + 1 || checksum(body) != sum {
            return None;
        }
        Self::new(Address::from_wire(body[0]), &body[2..]).ok()
    }

    pub const fn address(&self) -> Address {
        self.address
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The on-wire length field.
    pub fn length(&self) -> u8 {
        (self.payload.len() + 1) as u8
    }

    pub fn checksum(&self) -> u8 {
        checksum(&self.payload)
            .wrapping_add(*self.address)
            .wrapping_add(self.length())
    }

    /// Escape the packet, handing every wire byte to `write`.
    pub fn write_to(&self, mut write: impl FnMut(u8)) {
        write(SYNC);
        write_escaped(*self.address, &mut write);
        write_escaped(self.length(), &mut write);
        for byte in self.payload.iter() {
            write_escaped(*byte, &mut write);
        }
        write_escaped(self.checksum(), &mut write);
    }

    pub fn encode(&self) -> ArrayVec<u8, MAX_ENCODED_SIZE> {
        let mut out = ArrayVec::new();
        self.write_to(|byte| out.push(byte));
        out
    }
}

/// Which end of the bus a decoder runs on.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Role {
    Host,
    Node,
}

/// Whether a frame that failed its checksum gets a checksum-error status.
///
/// The host never answers. A node stays silent for reset and link-speed
/// change packets, which never receive replies.
pub fn replies_to_checksum_error(role: Role, frame: &[u8]) -> bool {
    match role {
        Role::Host => false,
        Role::Node => !matches!(
            frame.get(2).map(|b| Opcode::try_from(*b)),
            Some(Ok(Opcode::Reset)) | Some(Ok(Opcode::CommChg))
        ),
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RxState {
    /// Discarding bytes until the next sync.
    Idle,
    Framing,
    /// A complete frame with a valid checksum is held in the buffer.
    Verified,
}

/// Outcome of feeding one wire byte to the [`FrameDecoder`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// Not part of a frame.
    Skipped,
    /// A sync byte started a new frame.
    Sync,
    /// An escape marker was swallowed.
    Escape,
    /// A byte was stored.
    Data,
    /// The frame is complete and the checksum matched.
    Verified,
    /// The frame is complete but the checksum didn't match. The decoder is
    /// back to idle, the bytes stay readable until the next sync.
    ChecksumError,
}

/// Incremental decoder turning the escaped byte stream into frames.
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    buffer: Buffer,
    state: RxState,
    escaping: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buffer: Buffer::new(),
            state: RxState::Idle,
            escaping: false,
        }
    }

    pub fn push(&mut self, byte: u8) -> Decoded {
        if byte == SYNC {
            self.buffer.clear();
            self.buffer.seek(2);
            self.state = RxState::Framing;
            self.escaping = false;
            return Decoded::Sync;
        }
        if self.state != RxState::Framing {
            return Decoded::Skipped;
        }
        if byte == MARKER {
            self.escaping = true;
            return Decoded::Escape;
        }
        let byte = if self.escaping {
            self.escaping = false;
            byte.wrapping_add(1)
        } else {
            byte
        };
        if !self.buffer.write(byte) {
            log::warn!("frame overrun, dropping");
            self.state = RxState::Idle;
            return Decoded::Skipped;
        }
        if let [_, 0] = self.buffer.as_slice() {
            // a length of zero can't even hold the checksum
            log::warn!("empty frame, dropping");
            self.state = RxState::Idle;
            return Decoded::Skipped;
        }
        if !self.is_complete() {
            return Decoded::Data;
        }
        let frame = self.buffer.as_slice();
        let (sum, body) = (frame[frame.len() - 1], &frame[..frame.len() - 1]);
        if checksum(body) == sum {
            self.state = RxState::Verified;
            Decoded::Verified
        } else {
            log::warn!("checksum mismatch: {:02x?}", frame);
            self.state = RxState::Idle;
            Decoded::ChecksumError
        }
    }

    fn is_complete(&self) -> bool {
        let frame = self.buffer.as_slice();
        frame.len() >= 2 && frame.len() == frame[1] as usize + 2
    }

    pub fn state(&self) -> RxState {
        self.state
    }

    /// Stop processing the current frame, skip bytes until the next sync.
    pub fn reset(&mut self) {
        self.state = RxState::Idle;
        self.escaping = false;
    }

    /// Everything stored since the last sync.
    pub fn frame(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    pub fn address(&self) -> Option<Address> {
        self.buffer.as_slice().first().copied().map(Address::from_wire)
    }

    /// Index of the checksum byte, once the length field is buffered.
    pub fn checksum_pos(&self) -> Option<usize> {
        self.buffer.as_slice().get(1).map(|len| *len as usize + 1)
    }

    /// Payload of a verified frame (status and reports for the host,
    /// commands for a node).
    pub fn payload(&self) -> &[u8] {
        let frame = self.buffer.as_slice();
        match self.state {
            RxState::Verified => frame.get(2..frame.len().saturating_sub(1)).unwrap_or(&[]),
            _ => &[],
        }
    }

    pub(crate) fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub(crate) fn buffer_mut(&mut self) -> &mut Buffer {
        &mut self.buffer
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
