//! bootforge — a network-boot orchestrator for bare-metal machines.
//!
//! A booting client broadcasts DHCPDISCOVER; the DHCP worker consults the
//! [`dhcp::LeasePool`] to pick an IPv4 address and replies with an OFFER that
//! points `siaddr`/`file` at this server. The client then fetches the
//! bootloader over TFTP ([`tftp`]) and the kernel/initramfs over HTTP
//! ([`http`]).
//!
//! Leases are persisted through the [`store::KvStore`] contract so the pool
//! survives process restarts and multiple instances sharing one store
//! converge on the same bindings.

pub mod analytics;
pub mod config;
pub mod dhcp;
pub mod http;
pub mod lease;
pub mod logging;
pub mod mgmt;
pub mod pxe;
pub mod signal;
pub mod store;
pub mod tftp;

pub use config::Config;
pub use lease::Lease;
