use std::net::Ipv4Addr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// One binding of an IPv4 address to a client hardware address.
///
/// Stored as a self-describing JSON blob under `<dir>/leases/<ip>`; the
/// timestamps are UTC and round-trip exactly through the codec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub nic: String,
    pub ip: Ipv4Addr,
    pub first_assigned: DateTime<Utc>,
    pub last_assigned: DateTime<Utc>,
    pub expire_time: DateTime<Utc>,
}

impl Lease {
    /// Build a lease expiring `expire_duration` from now. Passing the prior
    /// binding's `first_assigned` preserves it across a renewal; `None`
    /// stamps a fresh binding.
    pub fn new(
        nic: &str,
        ip: Ipv4Addr,
        expire_duration: Duration,
        first_assigned: Option<DateTime<Utc>>,
    ) -> Self {
        let now = Utc::now();
        Lease {
            nic: nic.to_string(),
            ip,
            first_assigned: first_assigned.unwrap_or(now),
            last_assigned: now,
            expire_time: now + expire_duration,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expire_time < now
    }

    /// A lease is well-formed iff the nic is non-empty and the timestamps
    /// are ordered `first_assigned <= last_assigned <= expire_time`.
    pub fn is_valid(&self) -> bool {
        !self.nic.is_empty()
            && self.first_assigned <= self.last_assigned
            && self.last_assigned <= self.expire_time
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(data: &str) -> serde_json::Result<Lease> {
        serde_json::from_str(data)
    }
}
