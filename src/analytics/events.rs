use advmac::MacAddr6;
use dhcproto::v4;
use serde::Serialize;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::dhcp::extensions::BootMessageExt;
use crate::dhcp::handlers::DropReason;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// One line of boot telemetry, JSON-encoded for the collector.
#[derive(Serialize)]
#[serde(tag = "service", rename_all = "lowercase")]
pub enum BootEvent {
    Dhcp(DhcpEvent),
    Tftp(TftpEvent),
    /// Synthesized by the writer after a collector outage: how many events
    /// of each kind were lost while the link was down.
    Drops(DropReport),
}

#[derive(Serialize)]
pub struct DropReport {
    pub timestamp_ms: u64,
    pub dhcp: u64,
    pub tftp: u64,
}

impl DropReport {
    pub fn new(dhcp: u64, tftp: u64) -> Self {
        DropReport {
            timestamp_ms: now_ms(),
            dhcp,
            tftp,
        }
    }
}

#[derive(Serialize)]
pub struct DhcpEvent {
    pub timestamp_ms: u64,
    pub xid: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_ip: Option<Ipv4Addr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<&'static str>,
}

fn mac_string(msg: &v4::Message) -> Option<String> {
    MacAddr6::try_from(msg.chaddr()).ok().map(|m| m.to_string())
}

impl DhcpEvent {
    pub fn replied(input: &v4::Message, reply: &v4::Message) -> Self {
        let kind = match reply.message_type() {
            Some(v4::MessageType::Offer) => "offer",
            Some(v4::MessageType::Ack) => "ack",
            Some(v4::MessageType::Nak) => "nak",
            _ => "other",
        };
        let assigned = match reply.yiaddr() {
            Ipv4Addr::UNSPECIFIED => None,
            ip => Some(ip),
        };
        DhcpEvent {
            timestamp_ms: now_ms(),
            xid: input.xid(),
            mac: mac_string(input),
            reply: Some(kind),
            assigned_ip: assigned,
            failure_reason: None,
        }
    }

    pub fn dropped(input: &v4::Message, reason: DropReason) -> Self {
        DhcpEvent {
            timestamp_ms: now_ms(),
            xid: input.xid(),
            mac: mac_string(input),
            reply: None,
            assigned_ip: None,
            failure_reason: Some(reason.as_str()),
        }
    }
}

#[derive(Serialize)]
pub struct TftpEvent {
    pub timestamp_ms: u64,
    pub client: String,
    pub filename: String,
    pub block_size: u16,
    pub bytes_sent: usize,
    pub outcome: &'static str,
}

impl TftpEvent {
    pub fn completed(client: SocketAddr, filename: &str, block_size: u16, bytes_sent: usize) -> Self {
        TftpEvent {
            timestamp_ms: now_ms(),
            client: client.to_string(),
            filename: filename.to_string(),
            block_size,
            bytes_sent,
            outcome: "sent",
        }
    }

    pub fn failed(client: SocketAddr, filename: &str, block_size: u16, outcome: &'static str) -> Self {
        TftpEvent {
            timestamp_ms: now_ms(),
            client: client.to_string(),
            filename: filename.to_string(),
            block_size,
            bytes_sent: 0,
            outcome,
        }
    }
}
