use advmac::MacAddr6;
use dhcproto::v4::{self, DhcpOption, Flags};
use std::net::Ipv4Addr;
use tracing::{debug, error, field, info, instrument, warn, Span};

use crate::config::Config;
use crate::dhcp::extensions::BootMessageExt;
use crate::dhcp::pool::{LeasePool, PoolError};

/// Non-replies carry the reason so the worker can log and report it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    NotBootRequest,
    NoMessageType,
    UnhandledMessageType,
    BadHardwareAddress,
    ForeignServer,
    UnknownRequestVariant,
    PoolExhausted,
    StoreUnavailable,
    InvalidLeaseData,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::NotBootRequest => "not_boot_request",
            DropReason::NoMessageType => "no_message_type",
            DropReason::UnhandledMessageType => "unhandled_message_type",
            DropReason::BadHardwareAddress => "bad_hardware_address",
            DropReason::ForeignServer => "foreign_server",
            DropReason::UnknownRequestVariant => "unknown_request_variant",
            DropReason::PoolExhausted => "pool_exhausted",
            DropReason::StoreUnavailable => "store_unavailable",
            DropReason::InvalidLeaseData => "invalid_lease_data",
        }
    }
}

pub enum DhcpV4Response {
    Message(v4::Message),
    NoResponse(DropReason),
}

/// 4.3 A DHCP server can receive the following messages from a client:
/// * DHCPDISCOVER
/// * DHCPREQUEST
/// * DHCPDECLINE
/// * DHCPRELEASE
/// * DHCPINFORM
///
/// Only DISCOVER and REQUEST drive the lease pool; the rest need nothing
/// from a pool-driven allocator and are ignored.
pub fn handle_message(pool: &LeasePool, config: &Config, msg: &v4::Message) -> DhcpV4Response {
    let message_type = match msg.opcode() {
        v4::Opcode::BootRequest => match msg.message_type() {
            Some(mt) => mt,
            None => return DhcpV4Response::NoResponse(DropReason::NoMessageType),
        },
        // Servers don't receive BootReply
        _ => return DhcpV4Response::NoResponse(DropReason::NotBootRequest),
    };

    match message_type {
        v4::MessageType::Discover => handle_discover(pool, config, msg),
        v4::MessageType::Request => handle_request(pool, config, msg),
        _ => DhcpV4Response::NoResponse(DropReason::UnhandledMessageType),
    }
}

fn pool_failure(err: PoolError) -> DhcpV4Response {
    match err {
        PoolError::LeasePoolIsFull => {
            warn!("lease range exhausted");
            DhcpV4Response::NoResponse(DropReason::PoolExhausted)
        }
        PoolError::FoundInvalidLease => {
            error!("lease store holds an invalid record");
            DhcpV4Response::NoResponse(DropReason::InvalidLeaseData)
        }
        // RefreshNoMatch is answered with a NAK before reaching here; if it
        // ever leaks through it is dropped like any other pool failure.
        e => {
            error!(%e, "lease store failure");
            DhcpV4Response::NoResponse(DropReason::StoreUnavailable)
        }
    }
}

/// Client is discovering available DHCP servers; pick an address from the
/// pool and reply with DHCPOFFER.
///
/// <https://datatracker.ietf.org/doc/html/rfc2131#section-4.3.1>
#[instrument(skip(pool, config, msg), fields(mac = field::Empty, xid = %msg.xid()))]
fn handle_discover(pool: &LeasePool, config: &Config, msg: &v4::Message) -> DhcpV4Response {
    let mac_addr = match MacAddr6::try_from(msg.chaddr()) {
        Ok(mac) => mac,
        Err(_) => return DhcpV4Response::NoResponse(DropReason::BadHardwareAddress),
    };
    Span::current().record("mac", field::display(mac_addr));
    info!("DHCPDiscover");

    let assigned = match pool.assign(&mac_addr.to_string()) {
        Ok(ip) => ip,
        Err(e) => return pool_failure(e),
    };

    info!(ip = %assigned, "offering address");
    DhcpV4Response::Message(build_reply(
        config,
        msg,
        assigned,
        v4::MessageType::Offer,
    ))
}

/// DHCPREQUEST - the client is selecting our offer, confirming an address
/// after reboot, or extending its lease. Confirm through the pool; a refused
/// claim gets a DHCPNAK so the client falls back to DISCOVER.
///
/// <https://datatracker.ietf.org/doc/html/rfc2131#section-4.3.2>
#[instrument(skip(pool, config, msg), fields(mac = field::Empty, xid = %msg.xid()))]
fn handle_request(pool: &LeasePool, config: &Config, msg: &v4::Message) -> DhcpV4Response {
    // Four variants of DHCPREQUEST
    //  * SELECTING: server id set and must match, ciaddr zero, requested ip set
    //  * INIT-REBOOT: no server id, ciaddr zero, requested ip set
    //  * RENEW: unicast, ciaddr filled, no requested ip
    //  * REBINDING: as RENEW but via broadcast/relay
    let mac_addr = match MacAddr6::try_from(msg.chaddr()) {
        Ok(mac) => mac,
        Err(_) => return DhcpV4Response::NoResponse(DropReason::BadHardwareAddress),
    };
    Span::current().record("mac", field::display(mac_addr));
    info!("DHCPRequest");

    let variant_tuple = (msg.server_id(), &msg.ciaddr(), msg.requested_ip_addr());
    let claimed_ip = match variant_tuple {
        (Some(server_id), &Ipv4Addr::UNSPECIFIED, Some(requested_ip)) => {
            debug!("variant: selecting");
            if server_id != &config.server_ip {
                info!(%server_id, "SELECTING server id did not match");
                return DhcpV4Response::NoResponse(DropReason::ForeignServer);
            }
            *requested_ip
        }
        (None, &Ipv4Addr::UNSPECIFIED, Some(requested_ip)) => {
            debug!("variant: init-reboot");
            *requested_ip
        }
        (None, ciaddr, None) if ciaddr != &Ipv4Addr::UNSPECIFIED => {
            if msg.giaddr() == Ipv4Addr::UNSPECIFIED {
                debug!("variant: renew")
            } else {
                debug!("variant: rebinding")
            }
            *ciaddr
        }
        _ => {
            info!("Unrecognized DHCPREQUEST variant");
            return DhcpV4Response::NoResponse(DropReason::UnknownRequestVariant);
        }
    };

    match pool.request(&mac_addr.to_string(), claimed_ip) {
        Ok(confirmed) => {
            info!(ip = %confirmed, "acknowledging address");
            DhcpV4Response::Message(build_reply(config, msg, confirmed, v4::MessageType::Ack))
        }
        Err(PoolError::RefreshNoMatch) => {
            warn!(%claimed_ip, "claim refused, sending DHCPNAK");
            DhcpV4Response::Message(build_nak(config, msg))
        }
        Err(e) => pool_failure(e),
    }
}

/// OFFER/ACK share everything but the message type: the assigned address in
/// yiaddr, this server in siaddr, the bootloader in the file field, and the
/// network parameters as options.
fn build_reply(
    config: &Config,
    msg: &v4::Message,
    assigned: Ipv4Addr,
    message_type: v4::MessageType,
) -> v4::Message {
    let lease_secs = config.lease_duration.num_seconds() as u32;
    let unspecified = Ipv4Addr::UNSPECIFIED;
    let mut reply = v4::Message::new_with_id(
        msg.xid(),
        unspecified,
        assigned,
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
    opts.insert(DhcpOption::MessageType(message_type));
    opts.insert(DhcpOption::ServerIdentifier(config.server_ip));
    opts.insert(DhcpOption::SubnetMask(config.subnet.netmask()));
    opts.insert(DhcpOption::Router(vec![config.router]));
    opts.insert(DhcpOption::DomainNameServer(config.dns.clone()));
    opts.insert(DhcpOption::AddressLeaseTime(lease_secs));
    // T1/T2 per RFC 2131 guidance: 0.5 and 0.875 of the lease time.
    opts.insert(DhcpOption::Renewal(lease_secs / 2));
    opts.insert(DhcpOption::Rebinding(lease_secs * 7 / 8));
    opts.insert(DhcpOption::End);

    reply
}

fn build_nak(config: &Config, msg: &v4::Message) -> v4::Message {
    let unspecified = Ipv4Addr::UNSPECIFIED;
    let mut reply = v4::Message::new_with_id(
        msg.xid(),
        unspecified,
        // RFC 2131 Table 3: yiaddr in DHCPNAK MUST be 0
        unspecified,
        unspecified,
        msg.giaddr(),
        msg.chaddr(),
    );
    reply.set_opcode(v4::Opcode::BootReply);
    reply.set_secs(0);
    reply.set_flags(msg.flags());
    if msg.giaddr() != Ipv4Addr::UNSPECIFIED {
        // init-reboot NAK should set broadcast bit when relayed
        let flags = reply.flags();
        reply.set_flags(Flags::set_broadcast(flags));
    }
    let opts = reply.opts_mut();
    opts.insert(DhcpOption::MessageType(v4::MessageType::Nak));
    opts.insert(DhcpOption::ServerIdentifier(config.server_ip));
    opts.insert(DhcpOption::End);

    reply
}
