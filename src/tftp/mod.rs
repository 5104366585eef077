//! Read-only TFTP service for PXE clients: RFC 1350 with the RFC 2348
//! `blksize` option. Every request is answered with the same caller-supplied
//! payload — the PXE chain needs exactly one artifact, so there is no
//! filename dispatch.

use std::net::UdpSocket;
use std::sync::{mpsc, Arc};

use arc_swap::ArcSwap;
use tracing::{debug, error, info, warn};

use crate::analytics::events::{BootEvent, TftpEvent};

pub mod parser;
pub mod transfer;

#[cfg(test)]
mod tests;

pub(crate) const OPCODE_RRQ: u16 = 1;
pub(crate) const OPCODE_DATA: u16 = 3;
pub(crate) const OPCODE_ACK: u16 = 4;
pub(crate) const OPCODE_ERROR: u16 = 5;
pub(crate) const OPCODE_OACK: u16 = 6;

/// Build a TFTP ERROR packet: opcode 5, error code 0, readable message.
pub fn error_packet(message: &str) -> Vec<u8> {
    let mut pkt = Vec::with_capacity(message.len() + 5);
    pkt.extend_from_slice(&[0, OPCODE_ERROR as u8, 0, 0]);
    pkt.extend_from_slice(message.as_bytes());
    pkt.push(0);
    pkt
}

/// Accept loop for the well-known port. Malformed datagrams get an ERROR
/// reply; each well-formed RRQ runs on its own thread with a snapshot of the
/// current payload, so a SIGHUP reload never changes bytes mid-transfer.
/// The listener itself never blocks on a transfer.
pub fn serve(
    socket: UdpSocket,
    payload: Arc<ArcSwap<Vec<u8>>>,
    event_channel: Option<mpsc::Sender<BootEvent>>,
) {
    match socket.local_addr() {
        Ok(addr) => info!(%addr, "TFTP listening"),
        Err(_) => info!("TFTP listening"),
    }

    // An RRQ is tiny; 512 bytes is far more than any real request.
    let mut buf = [0u8; 512];
    loop {
        let (n, addr) = match socket.recv_from(&mut buf) {
            Ok(x) => x,
            Err(e) => {
                error!("Reading from TFTP socket: {e}");
                continue;
            }
        };

        let req = match parser::parse_rrq(&buf[..n]) {
            Ok(req) => req,
            Err(e) => {
                debug!(%addr, %e, "rejecting TFTP request");
                let _ = socket.send_to(&error_packet(&e.to_string()), addr);
                continue;
            }
        };

        let blob = payload.load_full();
        let events = event_channel.clone();
        let spawned = std::thread::Builder::new()
            .name("tftp-xfer".to_string())
            .spawn(move || run_transfer(addr, req, &blob, events));
        if let Err(e) = spawned {
            error!(%addr, %e, "failed to spawn transfer thread");
        }
    }
}

fn run_transfer(
    addr: std::net::SocketAddr,
    req: parser::Rrq,
    blob: &[u8],
    events: Option<mpsc::Sender<BootEvent>>,
) {
    let block_size = req.effective_block_size();
    let outcome = transfer::transfer(addr, &req, blob);

    let event = match &outcome {
        Ok(bytes) => {
            info!(%addr, bytes, filename = %req.filename, "sent boot payload");
            TftpEvent::completed(addr, &req.filename, block_size, *bytes)
        }
        Err(e @ transfer::TransferError::OackAborted(_)) => {
            // tsize probes abort here as part of a normal boot sequence.
            debug!(%addr, %e, "transfer ended during negotiation");
            TftpEvent::failed(addr, &req.filename, block_size, "oack_abort")
        }
        Err(e @ transfer::TransferError::ClientAborted(_)) => {
            info!(%addr, %e, "client aborted transfer");
            TftpEvent::failed(addr, &req.filename, block_size, "client_abort")
        }
        Err(e @ transfer::TransferError::TimedOut { .. }) => {
            warn!(%addr, %e, "transfer timed out");
            TftpEvent::failed(addr, &req.filename, block_size, "timeout")
        }
        Err(e) => {
            warn!(%addr, %e, "transfer failed");
            TftpEvent::failed(addr, &req.filename, block_size, "io_error")
        }
    };

    if let Some(sender) = events {
        let _ = sender.send(BootEvent::Tftp(event));
    }
}
