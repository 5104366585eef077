//! Proxy-DHCP responder.
//!
//! PXE firmware that got its address from the DHCP service follows up on
//! port 4011 to ask who serves the boot file. The reply carries no address
//! assignment at all, only siaddr, the boot file name and the `PXEClient`
//! class; anything that is not a PXE request is ignored.

use dhcproto::{v4, Decodable, Encodable};
use std::net::{Ipv4Addr, UdpSocket};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::dhcp::extensions::BootMessageExt;

pub fn pxe_worker(socket: UdpSocket, config: Arc<Config>) {
    match socket.local_addr() {
        Ok(addr) => info!(%addr, "proxy-DHCP listening"),
        Err(_) => info!("proxy-DHCP listening"),
    }

    let mut read_buf = [0u8; 2048];
    loop {
        let (amount, src) = match socket.recv_from(&mut read_buf) {
            Ok(r) => r,
            Err(e) => {
                error!("Reading from PXE socket: {e}");
                continue;
            }
        };

        let msg = match v4::Message::from_bytes(&read_buf[..amount]) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(%src, "Unable to parse PXE datagram: {e}");
                continue;
            }
        };

        let reply = match handle_pxe_request(&config, &msg) {
            Some(reply) => reply,
            None => continue,
        };

        match reply.to_vec() {
            Ok(write_buf) => {
                if let Err(e) = socket.send_to(&write_buf, src) {
                    error!(%src, "Problem sending PXE response: {e}");
                } else {
                    debug!(%src, "answered PXE boot request");
                }
            }
            Err(e) => error!("Failed to encode PXE response: {e}"),
        }
    }
}

fn handle_pxe_request(config: &Config, msg: &v4::Message) -> Option<v4::Message> {
    match msg.opcode() {
        v4::Opcode::BootRequest => {}
        _ => return None,
    }
    // Only PXE firmware speaks to this port.
    if !msg
        .class_identifier()
        .is_some_and(|id| id.starts_with(b"PXEClient"))
    {
        debug!(xid = %msg.xid(), "ignoring non-PXE datagram on proxy-DHCP port");
        return None;
    }

    let unspecified = Ipv4Addr::UNSPECIFIED;
    let mut reply = v4::Message::new_with_id(
        msg.xid(),
        unspecified,
        unspecified,
        config.server_ip,
        msg.giaddr(),
        msg.chaddr(),
    );
    reply.set_opcode(v4::Opcode::BootReply);
    reply.set_secs(0);
    reply.set_flags(msg.flags());
    reply.set_sname(config.server_name.as_bytes());
    reply.set_fname(config.boot_filename.as_bytes());

    let opts = reply.opts_mut();
    opts.insert(v4::DhcpOption::MessageType(v4::MessageType::Ack));
    opts.insert(v4::DhcpOption::ServerIdentifier(config.server_ip));
    opts.insert(v4::DhcpOption::ClassIdentifier(b"PXEClient".to_vec()));
    opts.insert(v4::DhcpOption::End);

    Some(reply)
}
