//! S7 address grammar.
//!
//! Translates an address string like `DB1.DBX0.3` or `MW200` into the
//! structured access metadata the driver's read/write dispatch works with.
//! Four forms, evaluated in this order with first match winning:
//!
//! 1. String: `DB<n>.STRING<offset>[(<maxlen>)]`
//! 2. Data block: `DB<n>.DB[B|W|D|X]<offset>[.<bit>]`
//! 3. Extended memory: `[V|M|I|Q][B|W|D]<offset>` (e.g. `VD100`, `MW200`)
//! 4. Simple: `[I|Q|M|V|T|C]<offset>[.<bit>]` (e.g. `Q5.2`, `M10`)
//!
//! Anything else is a parse error; the owning tag is then permanently
//! excluded from I/O. Matching is case-insensitive throughout.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::core::data::DataType;
use crate::core::error::{AgentError, Result};

/// PLC memory area.
///
/// The discriminants are the S7 wire area codes, shared verbatim between
/// this parser and the transport's read/write requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum Area {
    /// Data block (`DB<n>`).
    DataBlock = 0x84,
    /// Process inputs (`I`).
    Input = 0x81,
    /// Process outputs (`Q`).
    Output = 0x82,
    /// Internal memory / merkers (`M`).
    Memory = 0x83,
    /// Timers (`T`).
    Timer = 0x1D,
    /// Counters (`C`).
    Counter = 0x1C,
}

impl Area {
    /// Wire code of this area.
    #[inline]
    pub const fn code(self) -> u8 {
        self as u8
    }
}

/// Access granularity implied by the address suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum WordLen {
    Bit = 0x01,
    Byte = 0x02,
    Word = 0x04,
    DWord = 0x06,
}

/// Parsed S7 access metadata for one tag.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct S7Address {
    /// Memory area.
    pub area: Area,

    /// Data block number; meaningful only for [`Area::DataBlock`].
    pub db_number: u16,

    /// Byte offset within the area.
    pub start: usize,

    /// Bit index (0-7) for bit-granular addresses.
    pub bit: u8,

    /// Access granularity.
    pub word_len: WordLen,

    /// Read window length in bytes.
    pub length: usize,

    /// Datatype implied by the address form. The tag's declared datatype
    /// takes precedence at decode time; this records what the address
    /// itself expresses.
    pub datatype: DataType,
}

static STRING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^DB(\d+)\.STRING(\d+)(?:\((\d+)\))?$").unwrap());
static DB_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^DB(\d+)\.DB([BXWD])(\d+)(?:\.(\d))?$").unwrap());
static MEM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^([VMIQ])([BWD])(\d+)$").unwrap());
static SIMPLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^([PIQMVTCS])(\d+)(?:\.(\d))?$").unwrap());

/// Default window length for string addresses without an explicit maximum.
const DEFAULT_STRING_LEN: usize = 32;

fn bad(address: &str, detail: &str) -> AgentError {
    AgentError::AddressParse(format!("{}: {}", detail, address))
}

fn parse_num<T: std::str::FromStr>(address: &str, s: &str) -> Result<T> {
    s.parse()
        .map_err(|_| bad(address, "numeric field out of range"))
}

/// Parse an S7 address string.
pub fn parse_address(address: &str) -> Result<S7Address> {
    // 1. String form
    if let Some(m) = STRING_RE.captures(address) {
        let db_number = parse_num(address, &m[1])?;
        let start = parse_num(address, &m[2])?;
        let length = match m.get(3) {
            Some(l) => match l.as_str().parse::<usize>() {
                Ok(max) if (1..=254).contains(&max) => max + 2,
                _ => DEFAULT_STRING_LEN,
            },
            None => DEFAULT_STRING_LEN,
        };
        return Ok(S7Address {
            area: Area::DataBlock,
            db_number,
            start,
            bit: 0,
            word_len: WordLen::Byte,
            length,
            datatype: DataType::String,
        });
    }

    // 2. Data-block form
    if let Some(m) = DB_RE.captures(address) {
        let db_number = parse_num(address, &m[1])?;
        let start = parse_num(address, &m[3])?;
        let (word_len, length, datatype) = size_suffix(address, &m[2])?;

        let mut bit = 0;
        if word_len == WordLen::Bit {
            let b = m
                .get(4)
                .ok_or_else(|| bad(address, "bit address requires a bit index"))?;
            bit = parse_bit(address, b.as_str())?;
        }

        return Ok(S7Address {
            area: Area::DataBlock,
            db_number,
            start,
            bit,
            word_len,
            length,
            datatype,
        });
    }

    // 3. Extended memory form (VD100, MW200, ...)
    if let Some(m) = MEM_RE.captures(address) {
        let (area, db_number) = area_letter(address, &m[1])?;
        let start = parse_num(address, &m[3])?;
        let (word_len, length, datatype) = size_suffix(address, &m[2])?;

        return Ok(S7Address {
            area,
            db_number,
            start,
            bit: 0,
            word_len,
            length,
            datatype,
        });
    }

    // 4. Simple form (M10, Q5.2, ...)
    if let Some(m) = SIMPLE_RE.captures(address) {
        let (area, db_number) = area_letter(address, &m[1])?;
        let start = parse_num(address, &m[2])?;

        let (bit, word_len, datatype) = match m.get(3) {
            Some(b) => (parse_bit(address, b.as_str())?, WordLen::Bit, DataType::Bool),
            None => (0, WordLen::Byte, DataType::Byte),
        };

        return Ok(S7Address {
            area,
            db_number,
            start,
            bit,
            word_len,
            length: 1,
            datatype,
        });
    }

    Err(bad(address, "invalid address format"))
}

/// Resolve an area letter from the memory/simple forms.
///
/// `V` is the data-block alias: it maps to `DB1`, the convention used by
/// compact PLC lines that expose one flat data block.
fn area_letter(address: &str, letter: &str) -> Result<(Area, u16)> {
    match letter.to_ascii_uppercase().as_str() {
        "I" => Ok((Area::Input, 0)),
        "Q" => Ok((Area::Output, 0)),
        "M" => Ok((Area::Memory, 0)),
        "V" => Ok((Area::DataBlock, 1)),
        "T" => Ok((Area::Timer, 0)),
        "C" => Ok((Area::Counter, 0)),
        _ => Err(bad(address, "unsupported area")),
    }
}

fn size_suffix(address: &str, letter: &str) -> Result<(WordLen, usize, DataType)> {
    match letter.to_ascii_uppercase().as_str() {
        "B" => Ok((WordLen::Byte, 1, DataType::Byte)),
        "W" => Ok((WordLen::Word, 2, DataType::UInt16)),
        "D" => Ok((WordLen::DWord, 4, DataType::UInt32)),
        "X" => Ok((WordLen::Bit, 1, DataType::Bool)),
        _ => Err(bad(address, "unsupported size suffix")),
    }
}

fn parse_bit(address: &str, s: &str) -> Result<u8> {
    let bit: u8 = parse_num(address, s)?;
    if bit > 7 {
        return Err(bad(address, "bit index must be 0-7"));
    }
    Ok(bit)
}
