use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{Duration, Utc};
use tracing::{debug, info};

use crate::lease::Lease;
use crate::store::{KvStore, StoreError};

#[derive(Debug)]
pub enum PoolError {
    /// Every address in the range is bound and unexpired.
    LeasePoolIsFull,
    /// The requested ip cannot be confirmed for this nic.
    RefreshNoMatch,
    /// A record under the leases subtree failed to decode or validate.
    /// Fatal for the operation; never silently dropped.
    FoundInvalidLease,
    StoreUnavailable(StoreError),
    Encoding(serde_json::Error),
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::LeasePoolIsFull => write!(f, "no free address in the lease range"),
            PoolError::RefreshNoMatch => {
                write!(f, "requested ip does not match an assignable binding")
            }
            PoolError::FoundInvalidLease => write!(f, "invalid lease record in the store"),
            PoolError::StoreUnavailable(e) => write!(f, "lease store unavailable: {e}"),
            PoolError::Encoding(e) => write!(f, "encoding lease record: {e}"),
        }
    }
}

impl std::error::Error for PoolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PoolError::StoreUnavailable(e) => Some(e),
            PoolError::Encoding(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for PoolError {
    fn from(e: StoreError) -> Self {
        PoolError::StoreUnavailable(e)
    }
}

impl From<serde_json::Error> for PoolError {
    fn from(e: serde_json::Error) -> Self {
        PoolError::Encoding(e)
    }
}

/// Externally persisted IPv4 allocator.
///
/// The pool owns the `<dir>/leases/<ip>` subtree of its store. All direct
/// store traffic is serialized by `data_lock`; allocation decisions
/// (`assign`, `request`) additionally hold `assign_lock` for their whole
/// read-all → pick → write sequence, so within one process they are
/// linearized. `assign_lock` is always taken before any `data_lock` call,
/// never the reverse. Across processes sharing one store there is no
/// coordination; racing instances may double-assign and converge later.
///
/// The pool never retries store operations; the DHCP layer is free to retry
/// on its own timer.
pub struct LeasePool {
    datasource: Arc<dyn KvStore>,
    dir: String,
    start_ip: Ipv4Addr,
    range_len: u32,
    expire_duration: Duration,
    data_lock: Mutex<()>,
    assign_lock: Mutex<()>,
}

fn ip_add(start: Ipv4Addr, offset: u32) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(start).wrapping_add(offset))
}

fn lock(m: &Mutex<()>) -> MutexGuard<'_, ()> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LeasePool {
    pub fn new(
        datasource: Arc<dyn KvStore>,
        dir: &str,
        start_ip: Ipv4Addr,
        range_len: u32,
        expire_duration: Duration,
    ) -> Self {
        LeasePool {
            datasource,
            dir: dir.trim_matches('/').to_string(),
            start_ip,
            range_len,
            expire_duration,
            data_lock: Mutex::new(()),
            assign_lock: Mutex::new(()),
        }
    }

    fn leases_dir(&self) -> String {
        format!("{}/leases", self.dir)
    }

    fn lease_key(&self, ip: Ipv4Addr) -> String {
        format!("{}/leases/{ip}", self.dir)
    }

    /// Write `lease` to the store, overwriting any existing record.
    pub fn store(&self, lease: &Lease) -> Result<(), PoolError> {
        let _data = lock(&self.data_lock);
        let record = lease.to_json()?;
        self.datasource.set(&self.lease_key(lease.ip), &record)?;
        Ok(())
    }

    /// All current leases, keyed by dotted-quad IP. A missing subtree is
    /// created empty; any undecodable or invalid record aborts the listing.
    pub fn leases(&self) -> Result<HashMap<String, Lease>, PoolError> {
        let _data = lock(&self.data_lock);
        let mut leases = HashMap::new();
        let entries = match self.datasource.list(&self.leases_dir()) {
            Ok(entries) => entries,
            Err(StoreError::NotFound) => {
                self.datasource.make_dir(&self.leases_dir())?;
                return Ok(leases);
            }
            Err(e) => return Err(e.into()),
        };
        for (_, value) in entries {
            match Lease::from_json(&value) {
                Ok(lease) if lease.is_valid() => {
                    leases.insert(lease.ip.to_string(), lease);
                }
                _ => return Err(PoolError::FoundInvalidLease),
            }
        }
        Ok(leases)
    }

    /// Administrative wipe of the whole leases subtree. An already-absent
    /// subtree is not an error.
    pub fn reset(&self) -> Result<(), PoolError> {
        let _data = lock(&self.data_lock);
        match self.datasource.delete_dir(&self.leases_dir()) {
            Ok(()) | Err(StoreError::NotFound) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Pick an IP for `nic`: the sticky binding if one exists, else the
    /// first unassigned slot in the range, else an expired lease to rebind.
    pub fn assign(&self, nic: &str) -> Result<Ipv4Addr, PoolError> {
        let _assign = lock(&self.assign_lock);
        let leases = self.leases()?;

        for lease in leases.values() {
            if lease.nic == nic {
                let renewed = Lease::new(
                    nic,
                    lease.ip,
                    self.expire_duration,
                    Some(lease.first_assigned),
                );
                self.store(&renewed)?;
                debug!(%nic, ip = %lease.ip, "renewed sticky binding");
                return Ok(lease.ip);
            }
        }

        for i in 0..self.range_len {
            let ip = ip_add(self.start_ip, i);
            if !leases.contains_key(&ip.to_string()) {
                self.store(&Lease::new(nic, ip, self.expire_duration, None))?;
                info!(%nic, %ip, "assigned fresh lease");
                return Ok(ip);
            }
        }

        let now = Utc::now();
        for lease in leases.values() {
            if lease.is_expired(now) {
                // Binding identity changes here, so first_assigned restarts.
                self.store(&Lease::new(nic, lease.ip, self.expire_duration, None))?;
                info!(%nic, ip = %lease.ip, evicted = %lease.nic, "rebound expired lease");
                return Ok(lease.ip);
            }
        }

        Err(PoolError::LeasePoolIsFull)
    }

    /// Confirm a client-proposed IP (DHCPREQUEST refresh semantics).
    ///
    /// An IP held by a different nic refuses even when that lease has
    /// expired; reclamation is deferred to the next DISCOVER.
    pub fn request(&self, nic: &str, current_ip: Ipv4Addr) -> Result<Ipv4Addr, PoolError> {
        let _assign = lock(&self.assign_lock);
        let leases = self.leases()?;
        let now = Utc::now();

        match leases.get(&current_ip.to_string()) {
            Some(lease) if lease.nic == nic => {
                let renewed = Lease::new(
                    nic,
                    lease.ip,
                    self.expire_duration,
                    Some(lease.first_assigned),
                );
                self.store(&renewed)?;
                debug!(%nic, ip = %lease.ip, "confirmed own binding");
                Ok(lease.ip)
            }
            Some(_) => Err(PoolError::RefreshNoMatch),
            None => {
                // A client may not hold two unexpired leases.
                if leases.values().any(|l| l.nic == nic && !l.is_expired(now)) {
                    return Err(PoolError::RefreshNoMatch);
                }
                self.store(&Lease::new(nic, current_ip, self.expire_duration, None))?;
                info!(%nic, ip = %current_ip, "accepted client-proposed binding");
                Ok(current_ip)
            }
        }
    }
}
