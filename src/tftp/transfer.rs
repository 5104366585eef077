use std::fmt;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use crate::tftp::parser::Rrq;
use crate::tftp::{OPCODE_ACK, OPCODE_DATA, OPCODE_ERROR, OPCODE_OACK};

/// Attempts per packet before the transfer is declared dead.
pub const NUM_RETRIES: u32 = 5;
/// How long each attempt waits for the matching ACK.
const ACK_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub enum TransferError {
    /// The client never acknowledged the OACK. Some PXE ROMs probe with a
    /// tsize request and abort straight away; callers log this at debug.
    OackAborted(String),
    /// All retry attempts for one block elapsed without a matching ACK.
    TimedOut { block: u16 },
    /// The client sent a TFTP ERROR packet; its message is preserved.
    /// No reply is sent and nothing is retried.
    ClientAborted(String),
    Io(io::Error),
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferError::OackAborted(e) => write!(f, "client abandoned option negotiation: {e}"),
            TransferError::TimedOut { block } => {
                write!(f, "timed out waiting for ACK #{block}")
            }
            TransferError::ClientAborted(msg) => {
                write!(f, "client aborted transfer ({msg:?})")
            }
            TransferError::Io(e) => write!(f, "transfer socket: {e}"),
        }
    }
}

impl std::error::Error for TransferError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransferError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for TransferError {
    fn from(e: io::Error) -> Self {
        TransferError::Io(e)
    }
}

/// Run one full transfer to `client`, returning the number of payload bytes
/// delivered.
///
/// The data flows over a fresh ephemeral socket so the well-known listener
/// port stays free; the client learns the new port from the first packet it
/// receives. If the client negotiated a block size, an OACK goes out as
/// block 0 before any DATA. Each DATA block then follows the stop-and-wait
/// discipline in [`send_packet`]. The final block is the one shorter than
/// the negotiated size; a payload that is an exact multiple of it is closed
/// out with an empty DATA block.
pub fn transfer(client: SocketAddr, req: &Rrq, payload: &[u8]) -> Result<usize, TransferError> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect(client)?;

    let block_size = req.effective_block_size() as usize;
    if let Some(negotiated) = req.block_size {
        let mut oack = vec![0, OPCODE_OACK as u8];
        oack.extend_from_slice(format!("blksize\0{negotiated}\0").as_bytes());
        send_packet(&socket, &oack, 0).map_err(|e| TransferError::OackAborted(e.to_string()))?;
    }

    let mut remaining = payload;
    let mut sent_total = 0usize;
    let mut seq: u16 = 1;
    let mut packet = Vec::with_capacity(block_size + 4);
    loop {
        let chunk = remaining.len().min(block_size);
        packet.clear();
        packet.extend_from_slice(&[0, OPCODE_DATA as u8]);
        packet.extend_from_slice(&seq.to_be_bytes());
        packet.extend_from_slice(&remaining[..chunk]);

        send_packet(&socket, &packet, seq)?;

        sent_total += chunk;
        remaining = &remaining[chunk..];
        seq = seq.wrapping_add(1);

        if chunk < block_size {
            break;
        }
    }

    Ok(sent_total)
}

/// Send one packet and wait for its ACK: up to [`NUM_RETRIES`] attempts,
/// each re-sending the packet and then reading replies until [`ACK_TIMEOUT`]
/// elapses. Runts (< 4 bytes) and ACKs for other blocks are ignored within
/// the attempt's budget. A client ERROR aborts immediately.
fn send_packet(socket: &UdpSocket, packet: &[u8], seq: u16) -> Result<(), TransferError> {
    let mut recv = [0u8; 256];
    for _attempt in 0..NUM_RETRIES {
        socket.send(packet)?;
        let deadline = Instant::now() + ACK_TIMEOUT;

        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            socket.set_read_timeout(Some(deadline - now))?;

            let n = match socket.recv(&mut recv) {
                Ok(n) => n,
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    break;
                }
                Err(e) => return Err(e.into()),
            };

            if n < 4 {
                continue;
            }
            let opcode = u16::from_be_bytes([recv[0], recv[1]]);
            match opcode {
                OPCODE_ACK => {
                    if u16::from_be_bytes([recv[2], recv[3]]) == seq {
                        return Ok(());
                    }
                }
                OPCODE_ERROR => {
                    let msg = recv[4..n]
                        .split(|&c| c == 0)
                        .next()
                        .unwrap_or_default();
                    return Err(TransferError::ClientAborted(
                        String::from_utf8_lossy(msg).into_owned(),
                    ));
                }
                _ => {}
            }
        }
    }

    Err(TransferError::TimedOut { block: seq })
}
