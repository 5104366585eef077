use std::fmt;

use crate::tftp::OPCODE_RRQ;

pub const DEFAULT_BLOCK_SIZE: u16 = 512;
/// Largest DATA payload that fits an untagged Ethernet frame. Clients may
/// ask for up to 65464; anything above this gets clamped.
pub const MAX_ETHERNET_BLOCK_SIZE: u16 = 1450;

/// A parsed read request. Transfer mode is always `octet`; any other mode
/// is rejected during parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rrq {
    pub filename: String,
    /// Negotiated block size, already clamped for Ethernet. `None` means
    /// the client sent no `blksize` option: no OACK, 512-byte blocks.
    pub block_size: Option<u16>,
}

impl Rrq {
    pub fn effective_block_size(&self) -> u16 {
        self.block_size.unwrap_or(DEFAULT_BLOCK_SIZE)
    }
}

/// Parse failures, reported back to the client inside a TFTP ERROR packet.
#[derive(Debug, PartialEq, Eq)]
pub enum RrqError {
    TooShort(usize),
    NotReadRequest(u16),
    MissingFilename,
    MissingMode,
    UnsupportedMode(String),
    UnterminatedOptionName,
    UnterminatedOptionValue(String),
    NonIntegerOption { option: String, value: String },
    BlockSizeOutOfRange(i64),
}

impl fmt::Display for RrqError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RrqError::TooShort(len) => write!(f, "packet of {len} bytes too small to be an RRQ"),
            RrqError::NotReadRequest(op) => write!(f, "opcode {op} is not an RRQ"),
            RrqError::MissingFilename => write!(f, "request contains no filename"),
            RrqError::MissingMode => write!(f, "request has no transfer mode"),
            RrqError::UnsupportedMode(mode) => {
                write!(f, "unsupported transfer mode {mode:?}")
            }
            RrqError::UnterminatedOptionName => write!(f, "unterminated option name"),
            RrqError::UnterminatedOptionValue(opt) => {
                write!(f, "unterminated value for option {opt:?}")
            }
            RrqError::NonIntegerOption { option, value } => {
                write!(f, "non-integer value {value:?} for option {option:?}")
            }
            RrqError::BlockSizeOutOfRange(val) => {
                write!(f, "unsupported blocksize {val}")
            }
        }
    }
}

impl std::error::Error for RrqError {}

/// Parse a raw datagram into an [`Rrq`].
///
/// Layout: opcode 0x0001, null-terminated filename, null-terminated mode,
/// then zero or more null-terminated (name, value) option pairs. Unknown
/// options are skipped; a malformed pair fails the whole request.
pub fn parse_rrq(data: &[u8]) -> Result<Rrq, RrqError> {
    // Smallest a useful RRQ can be is 6 bytes: 2b opcode, 1b filename,
    // 1b null, 1b mode, 1b null.
    if data.len() < 6 {
        return Err(RrqError::TooShort(data.len()));
    }

    let opcode = u16::from_be_bytes([data[0], data[1]]);
    if opcode != OPCODE_RRQ {
        return Err(RrqError::NotReadRequest(opcode));
    }

    let (filename, rest) = null_str(&data[2..]).ok_or(RrqError::MissingFilename)?;
    if filename.is_empty() {
        return Err(RrqError::MissingFilename);
    }

    let (mode, mut rest) = null_str(rest).ok_or(RrqError::MissingMode)?;
    if mode != "octet" {
        return Err(RrqError::UnsupportedMode(mode.to_string()));
    }

    let mut block_size = None;
    while !rest.is_empty() {
        let (option, after_name) = null_str(rest).ok_or(RrqError::UnterminatedOptionName)?;
        let (value, after_value) =
            null_str(after_name).ok_or_else(|| RrqError::UnterminatedOptionValue(option.to_string()))?;
        rest = after_value;

        // Signed: a negative blksize is out of range, not a parse failure.
        let parsed: i64 = value.parse().map_err(|_| RrqError::NonIntegerOption {
            option: option.to_string(),
            value: value.to_string(),
        })?;

        if option == "blksize" {
            if !(8..=65464).contains(&parsed) {
                return Err(RrqError::BlockSizeOutOfRange(parsed));
            }
            block_size = Some((parsed as u16).min(MAX_ETHERNET_BLOCK_SIZE));
        }
    }

    Ok(Rrq {
        filename: filename.to_string(),
        block_size,
    })
}

/// Split a null-terminated string off the front of `b`.
fn null_str(b: &[u8]) -> Option<(&str, &[u8])> {
    let off = b.iter().position(|&c| c == 0)?;
    let s = std::str::from_utf8(&b[..off]).ok()?;
    Some((s, &b[off + 1..]))
}
