use dhcproto::v4::{self, DhcpOption};
use std::net::Ipv4Addr;

/// Option accessors for `dhcproto::v4::Message`.
///
/// Every accessor is the same scan over the options map with a different
/// variant picked out; [`find_option`] is that scan.
pub trait BootMessageExt {
    fn message_type(&self) -> Option<&v4::MessageType>;
    fn server_id(&self) -> Option<&Ipv4Addr>;
    fn requested_ip_addr(&self) -> Option<&Ipv4Addr>;
    fn class_identifier(&self) -> Option<&[u8]>;
}

fn find_option<'a, T: ?Sized>(
    msg: &'a v4::Message,
    pick: fn(&'a DhcpOption) -> Option<&'a T>,
) -> Option<&'a T> {
    msg.opts().iter().find_map(|o| pick(o.1))
}

impl BootMessageExt for v4::Message {
    fn message_type(&self) -> Option<&v4::MessageType> {
        find_option(self, |o| match o {
            DhcpOption::MessageType(mt) => Some(mt),
            _ => None,
        })
    }

    fn server_id(&self) -> Option<&Ipv4Addr> {
        find_option(self, |o| match o {
            DhcpOption::ServerIdentifier(addr) => Some(addr),
            _ => None,
        })
    }

    fn requested_ip_addr(&self) -> Option<&Ipv4Addr> {
        find_option(self, |o| match o {
            DhcpOption::RequestedIpAddress(addr) => Some(addr),
            _ => None,
        })
    }

    fn class_identifier(&self) -> Option<&[u8]> {
        find_option(self, |o| match o {
            DhcpOption::ClassIdentifier(id) => Some(id.as_slice()),
            _ => None,
        })
    }
}
