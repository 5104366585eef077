use dhcproto::{v4, Decodable, Encodable};
use std::{
    io,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket},
    sync::{mpsc, Arc},
    time::Duration,
};
use tracing::{debug, error, info, trace};

use crate::analytics::events::{BootEvent, DhcpEvent};
use crate::config::Config;
use crate::dhcp::handlers::{handle_message, DhcpV4Response};
use crate::dhcp::pool::LeasePool;

/// Receive loop for the DHCP service socket. Parses each datagram, runs the
/// handler against the lease pool and writes the reply back out. Clients
/// that do not have an address yet are answered on the broadcast address.
pub fn v4_worker(
    socket: UdpSocket,
    pool: Arc<LeasePool>,
    config: Arc<Config>,
    event_channel: Option<mpsc::Sender<BootEvent>>,
) {
    let mut read_buf = [0u8; 2048];
    let mut error_count: u32 = 0;
    const MAX_BACKOFF_MS: u64 = 1000;

    loop {
        let (amount, src) = match socket.recv_from(&mut read_buf) {
            Ok((amount, src)) => {
                error_count = 0;
                debug!("Received {amount} bytes from {src:?}");
                trace!("Data: {:x?}", &read_buf[..amount]);
                (amount, src)
            }
            Err(err) => {
                match err.kind() {
                    io::ErrorKind::ConnectionReset => {
                        info!("Sent response to host that responded with ICMP unreachable");
                    }
                    io::ErrorKind::Interrupted => {
                        debug!("recv_from interrupted, retrying");
                    }
                    _ => {
                        error!("Unexpected socket error: {err:?}");
                        // Exponential backoff keeps a persistent socket error
                        // from spinning the CPU.
                        error_count = error_count.saturating_add(1);
                        let backoff_ms = std::cmp::min(
                            10_u64.saturating_mul(2_u64.saturating_pow(error_count)),
                            MAX_BACKOFF_MS,
                        );
                        std::thread::sleep(Duration::from_millis(backoff_ms));
                    }
                }
                continue;
            }
        };

        let msg = match v4::Message::from_bytes(&read_buf[..amount]) {
            Ok(msg) => msg,
            Err(e) => {
                error!("Unable to parse dhcpv4 message {}", e);
                continue;
            }
        };

        match handle_message(&pool, &config, &msg) {
            DhcpV4Response::NoResponse(reason) => {
                debug!("Not responding {:?}", reason);
                if let Some(ref event_sender) = event_channel {
                    let _ = event_sender.send(BootEvent::Dhcp(DhcpEvent::dropped(&msg, reason)));
                }
            }
            DhcpV4Response::Message(resp) => {
                let write_buf = match resp.to_vec() {
                    Ok(buf) => buf,
                    Err(e) => {
                        error!("Failed to encode DHCPv4 response: {e}");
                        continue;
                    }
                };
                let dest = reply_destination(src);
                match socket.send_to(&write_buf, dest) {
                    Ok(sent) => {
                        debug!("responded to {dest} with {sent} bytes");
                        if let Some(ref event_sender) = event_channel {
                            let _ =
                                event_sender.send(BootEvent::Dhcp(DhcpEvent::replied(&msg, &resp)));
                        }
                    }
                    Err(e) => error!("Problem sending response message: {e}"),
                }
            }
        }
    }
}

/// A client in INIT state sources its DISCOVER from 0.0.0.0 and cannot
/// receive unicast yet; everyone else is answered where they came from.
fn reply_destination(src: SocketAddr) -> SocketAddr {
    match src {
        SocketAddr::V4(v4_src) if v4_src.ip().is_unspecified() => {
            SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::BROADCAST, 68))
        }
        other => other,
    }
}
