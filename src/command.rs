//! Opcodes and the command length table.
//!
//! A JVS packet carries several commands back to back without any
//! separators, so the only way to find where one command ends is to know
//! the length of every opcode. [`command_size()`] resolves that length from
//! however many bytes of the command are buffered so far.

use core::convert::TryFrom;

#[derive(PartialEq, Eq, Debug, Copy, Clone, Hash)]
pub enum Opcode {
    Reset,
    AddressSet,
    IoId,
    CommandRev,
    JvRev,
    ProtocolVer,
    FunctionCheck,
    MainId,
    SwInput,
    CoinInput,
    AnalogInput,
    RotaryInput,
    KeyCodeInput,
    ScreenPositionInput,
    Retry,
    CoinSub,
    DriverOutput,
    AnalogOutput,
    CharacterOutput,
    CoinAdd,
    /// Vendor extension, the sub-op lives at offset 4.
    Namco,
    CommSup,
    CommChg,
}

impl Opcode {
    pub const fn to_byte(self) -> u8 {
        use Opcode::*;
        match self {
            Reset => 0xF0,
            AddressSet => 0xF1,
            IoId => 0x10,
            CommandRev => 0x11,
            JvRev => 0x12,
            ProtocolVer => 0x13,
            FunctionCheck => 0x14,
            MainId => 0x15,
            SwInput => 0x20,
            CoinInput => 0x21,
            AnalogInput => 0x22,
            RotaryInput => 0x23,
            KeyCodeInput => 0x24,
            ScreenPositionInput => 0x25,
            Retry => 0x2F,
            CoinSub => 0x30,
            DriverOutput => 0x32,
            AnalogOutput => 0x33,
            CharacterOutput => 0x34,
            CoinAdd => 0x35,
            Namco => 0x70,
            CommSup => 0xD0,
            CommChg => 0xF2,
        }
    }

    /// Commands that change bus or node state and therefore must not run
    /// before the enclosing packet passed its checksum.
    pub const fn needs_verification(self) -> bool {
        matches!(
            self,
            Opcode::Reset | Opcode::AddressSet | Opcode::CommChg | Opcode::Retry
        )
    }
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    /// Returns the unknown byte as the error.
    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        use Opcode::*;
        Ok(match byte {
            0xF0 => Reset,
            0xF1 => AddressSet,
            0x10 => IoId,
            0x11 => CommandRev,
            0x12 => JvRev,
            0x13 => ProtocolVer,
            0x14 => FunctionCheck,
            0x15 => MainId,
            0x20 => SwInput,
            0x21 => CoinInput,
            0x22 => AnalogInput,
            0x23 => RotaryInput,
            0x24 => KeyCodeInput,
            0x25 => ScreenPositionInput,
            0x2F => Retry,
            0x30 => CoinSub,
            0x32 => DriverOutput,
            0x33 => AnalogOutput,
            0x34 => CharacterOutput,
            0x35 => CoinAdd,
            0x70 => Namco,
            0xD0 => CommSup,
            0xF2 => CommChg,
            other => return Err(other),
        })
    }
}

impl From<Opcode> for u8 {
    fn from(opcode: Opcode) -> Self {
        opcode.to_byte()
    }
}

#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub enum CommandSize {
    /// Total length of the command, opcode included.
    Size(usize),
    /// More bytes are needed before the length is known.
    Incomplete,
    Unknown,
}

/// Resolve the length of the command starting at `command[0]`.
///
/// `command` holds the opcode and whatever follows it in the buffer.
/// Variable length commands return [`CommandSize::Incomplete`] until their
/// count field (or terminator) is buffered. The returned size may exceed
/// `command.len()`; callers wait for the rest in that case.
pub fn command_size(command: &[u8]) -> CommandSize {
    use CommandSize::*;
    use Opcode::*;

    let opcode = match command.first().map(|b| Opcode::try_from(*b)) {
        None => return Incomplete,
        Some(Err(_)) => return Unknown,
        Some(Ok(opcode)) => opcode,
    };

    let count = |offset: usize, scale: usize, overhead: usize| match command.get(offset) {
        Some(n) => Size(*n as usize * scale + overhead),
        None => Incomplete,
    };

    match opcode {
        Reset | AddressSet => Size(2),
        IoId | CommandRev | JvRev | ProtocolVer | FunctionCheck => Size(1),
        MainId => terminated_size(command),
        SwInput => Size(3),
        CoinInput | AnalogInput | RotaryInput => Size(2),
        KeyCodeInput => Size(1),
        ScreenPositionInput => Size(2),
        Retry => Size(1),
        CoinSub | CoinAdd => Size(4),
        DriverOutput | CharacterOutput => count(1, 1, 2),
        AnalogOutput => count(1, 2, 2),
        Namco => match command.get(4) {
            None => Incomplete,
            Some(0x02) => Size(7),
            Some(0x14) => Size(12),
            Some(0x80) => Size(6),
            Some(_) => Unknown,
        },
        CommSup => Size(1),
        CommChg => Size(2),
    }
}

// Opcode followed by a NUL terminated string.
fn terminated_size(command: &[u8]) -> CommandSize {
    match command.iter().skip(1).position(|b| *b == 0) {
        Some(pos) => CommandSize::Size(pos + 2),
        None => CommandSize::Incomplete,
    }
}
