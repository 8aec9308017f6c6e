//! Parsers for the status packets the host receives.
//!
//! Every parser takes the payload of a verified frame: the status byte
//! followed by one report per command that was sent.

use nom::bytes::complete::{tag, take};
use nom::combinator::{all_consuming, map, rest, verify};
use nom::multi::fold_many0;
use nom::number::complete::{be_u16, u8};
use nom::sequence::{preceded, tuple};
use nom::IResult;

use crate::types::{Status, REPORT_OK};

type Buf = [u8];

const OK_OK: &Buf = &[Status::Ok as u8, REPORT_OK];

/// Switch and coin records from a function-check report.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub(crate) struct Functions {
    pub players: u8,
    pub buttons: u8,
    pub coin_slots: u8,
}

/// Switch and coin reports for one device.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct Inputs<'a> {
    pub system: u8,
    /// `button_bytes` per player.
    pub switches: &'a Buf,
    /// Two bytes per slot.
    pub coins: &'a Buf,
}

impl Inputs<'_> {
    /// Coin counter of `slot`, status bits included.
    pub fn coin(&self, slot: usize) -> Option<u16> {
        let counter = self.coins.get(slot * 2..)?;
        be_u16::<_, ()>(counter).ok().map(|(_, coin)| coin)
    }
}

/// A lone OK report, as sent for address assignment and coin handling.
pub(crate) fn ack(buf: &Buf) -> bool {
    all_consuming(ok_ok)(buf).is_ok()
}

/// A single revision byte.
pub(crate) fn revision(buf: &Buf) -> Option<u8> {
    finish(all_consuming(preceded(ok_ok, u8))(buf))
}

/// Identification text, terminator included.
pub(crate) fn identification(buf: &Buf) -> Option<&Buf> {
    finish(preceded(ok_ok, verify(rest, |id: &Buf| !id.is_empty()))(buf))
}

/// Fold the 4-byte function records up to the terminating zero code.
/// Records other than switches and coins are skipped.
pub(crate) fn function_check(buf: &Buf) -> Option<(&Buf, Functions)> {
    let (records, _) = ok_ok(buf).ok()?;
    if records.is_empty() {
        return None;
    }
    let record = tuple((verify(u8, |code: &u8| *code != 0), u8, u8, u8));
    let functions = fold_many0(record, Functions::default, add_record)(records);
    finish(functions).map(|functions| (records, functions))
}

fn add_record(mut functions: Functions, (code, a, b, _): (u8, u8, u8, u8)) -> Functions {
    match code {
        0x01 => {
            functions.players = a;
            functions.buttons = b;
        }
        0x02 => functions.coin_slots = a,
        _ => {}
    }
    functions
}

/// Combined reply to a switch-input and coin-input request.
pub(crate) fn switch_and_coins(
    buf: &Buf,
    players: u8,
    button_bytes: u8,
    coin_slots: u8,
) -> Option<Inputs<'_>> {
    let switch_len = players as usize * button_bytes as usize;
    let coin_len = coin_slots as usize * 2;
    let inputs = all_consuming(map(
        tuple((
            ok_ok,
            u8,
            take(switch_len),
            tag(&[REPORT_OK][..]),
            take(coin_len),
        )),
        |(_, system, switches, _, coins)| Inputs {
            system,
            switches,
            coins,
        },
    ))(buf);
    finish(inputs)
}

fn ok_ok(buf: &Buf) -> IResult<&Buf, &Buf> {
    tag(OK_OK)(buf)
}

fn finish<'a, O>(result: IResult<&'a Buf, O>) -> Option<O> {
    result.ok().map(|(_, out)| out)
}
