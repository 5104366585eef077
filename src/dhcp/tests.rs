#![cfg(test)]

use advmac::MacAddr6;
use chrono::{Duration, Utc};
use dhcproto::v4::{self, DhcpOption, Opcode};
use std::net::Ipv4Addr;
use std::sync::Arc;

use crate::config::Config;
use crate::dhcp::extensions::BootMessageExt;
use crate::dhcp::handlers::{handle_message, DhcpV4Response, DropReason};
use crate::dhcp::pool::{LeasePool, PoolError};
use crate::lease::Lease;
use crate::store::{KvStore, MemStore};

const TEST_MAC: MacAddr6 = MacAddr6::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
const TEST_MAC_2: MacAddr6 = MacAddr6::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

const START_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 10);

fn create_test_env() -> (Config, Arc<MemStore>, LeasePool) {
    let config = Config {
        server_ip: Ipv4Addr::new(10, 0, 0, 1),
        subnet: "10.0.0.0/24".parse().unwrap(),
        router: Ipv4Addr::new(10, 0, 0, 1),
        dns: vec![Ipv4Addr::new(8, 8, 8, 8), Ipv4Addr::new(8, 8, 4, 4)],
        lease_start: START_IP,
        lease_range: 3,
        lease_duration: Duration::hours(1),
        ..Config::default()
    };

    let store = Arc::new(MemStore::new());
    let pool = LeasePool::new(
        Arc::clone(&store) as Arc<dyn KvStore>,
        "testcluster",
        config.lease_start,
        config.lease_range,
        config.lease_duration,
    );

    (config, store, pool)
}

fn expired_lease(nic: &str, ip: Ipv4Addr) -> Lease {
    let now = Utc::now();
    Lease {
        nic: nic.to_string(),
        ip,
        first_assigned: now - Duration::hours(3),
        last_assigned: now - Duration::hours(2),
        expire_time: now - Duration::hours(1),
    }
}

// ─── pool policy ────────────────────────────────────────────────────────────

#[test]
fn sticky_binding() {
    let (_, _, pool) = create_test_env();
    let first = pool.assign("aa:aa").unwrap();
    let second = pool.assign("aa:aa").unwrap();
    assert_eq!(first, second);

    // The renewal keeps the binding's original first_assigned.
    let leases = pool.leases().unwrap();
    let lease = &leases[&first.to_string()];
    assert_eq!(lease.nic, "aa:aa");
    assert!(lease.first_assigned <= lease.last_assigned);
}

#[test]
fn distinct_nics_get_distinct_ips() {
    let (_, _, pool) = create_test_env();
    let a = pool.assign("aa:aa").unwrap();
    let b = pool.assign("bb:bb").unwrap();
    assert_ne!(a, b);
}

#[test]
fn assigns_range_in_order_then_exhausts() {
    let (_, _, pool) = create_test_env();
    assert_eq!(pool.assign("aa:aa").unwrap(), Ipv4Addr::new(10, 0, 0, 10));
    assert_eq!(pool.assign("bb:bb").unwrap(), Ipv4Addr::new(10, 0, 0, 11));
    assert_eq!(pool.assign("cc:cc").unwrap(), Ipv4Addr::new(10, 0, 0, 12));
    assert!(matches!(
        pool.assign("dd:dd"),
        Err(PoolError::LeasePoolIsFull)
    ));
}

#[test]
fn reclaims_expired_lease_for_new_nic() {
    let (_, _, pool) = create_test_env();
    pool.assign("bb:bb").unwrap();
    pool.assign("cc:cc").unwrap();
    pool.assign("ee:ee").unwrap();
    // Overwrite one binding with an expired record, as if its clock ran out.
    pool.store(&expired_lease("bb:bb", Ipv4Addr::new(10, 0, 0, 10)))
        .unwrap();

    let reclaimed = pool.assign("dd:dd").unwrap();
    assert_eq!(reclaimed, Ipv4Addr::new(10, 0, 0, 10));

    // The eviction rebinds, so first_assigned restarts for the new owner.
    let leases = pool.leases().unwrap();
    let lease = &leases[&reclaimed.to_string()];
    assert_eq!(lease.nic, "dd:dd");
    assert!(lease.expire_time > Utc::now());
}

#[test]
fn request_confirms_own_binding() {
    let (_, _, pool) = create_test_env();
    let ip = pool.assign("aa:aa").unwrap();
    let before = pool.leases().unwrap()[&ip.to_string()].clone();

    let confirmed = pool.request("aa:aa", ip).unwrap();
    assert_eq!(confirmed, ip);

    let after = pool.leases().unwrap()[&ip.to_string()].clone();
    assert_eq!(after.first_assigned, before.first_assigned);
    assert!(after.last_assigned >= before.last_assigned);
    assert!(after.expire_time >= before.expire_time);
}

#[test]
fn request_rejects_foreign_active_binding() {
    let (_, _, pool) = create_test_env();
    let ip = pool.assign("aa:aa").unwrap();
    assert!(matches!(
        pool.request("bb:bb", ip),
        Err(PoolError::RefreshNoMatch)
    ));
}

#[test]
fn request_rejects_foreign_expired_binding() {
    // Expired-but-foreign still refuses; the claimant has to go through
    // DISCOVER so reclamation stays in one place.
    let (_, _, pool) = create_test_env();
    let ip = Ipv4Addr::new(10, 0, 0, 11);
    pool.store(&expired_lease("aa:aa", ip)).unwrap();
    assert!(matches!(
        pool.request("bb:bb", ip),
        Err(PoolError::RefreshNoMatch)
    ));
}

#[test]
fn request_accepts_unbound_ip() {
    let (_, _, pool) = create_test_env();
    let ip = Ipv4Addr::new(10, 0, 0, 11);
    assert_eq!(pool.request("aa:aa", ip).unwrap(), ip);
    assert_eq!(pool.leases().unwrap()[&ip.to_string()].nic, "aa:aa");
}

#[test]
fn request_rejects_second_lease_for_same_nic() {
    let (_, _, pool) = create_test_env();
    let held = pool.assign("aa:aa").unwrap();
    let other = Ipv4Addr::new(10, 0, 0, 12);
    assert_ne!(held, other);
    assert!(matches!(
        pool.request("aa:aa", other),
        Err(PoolError::RefreshNoMatch)
    ));
}

#[test]
fn invalid_record_aborts_listing() {
    let (_, store, pool) = create_test_env();
    pool.assign("aa:aa").unwrap();
    store
        .set("testcluster/leases/10.0.0.99", "not a lease")
        .unwrap();

    assert!(matches!(pool.leases(), Err(PoolError::FoundInvalidLease)));
    // Allocation reads the same listing, so it must refuse too.
    assert!(matches!(
        pool.assign("bb:bb"),
        Err(PoolError::FoundInvalidLease)
    ));
}

#[test]
fn reset_wipes_pool_and_tolerates_missing_subtree() {
    let (_, _, pool) = create_test_env();
    pool.assign("aa:aa").unwrap();
    pool.assign("bb:bb").unwrap();

    pool.reset().unwrap();
    assert!(pool.leases().unwrap().is_empty());
    // leases() recreated the directory; resetting twice more is still fine.
    pool.reset().unwrap();
    pool.reset().unwrap();

    // The range is free again.
    assert_eq!(pool.assign("cc:cc").unwrap(), START_IP);
}

#[test]
fn empty_pool_lists_empty() {
    let (_, _, pool) = create_test_env();
    assert!(pool.leases().unwrap().is_empty());
}

// ─── handlers ───────────────────────────────────────────────────────────────

fn create_discover(mac: MacAddr6, xid: u32) -> v4::Message {
    let mut msg = v4::Message::new_with_id(
        xid,
        Ipv4Addr::UNSPECIFIED, // ciaddr
        Ipv4Addr::UNSPECIFIED, // yiaddr
        Ipv4Addr::UNSPECIFIED, // siaddr
        Ipv4Addr::UNSPECIFIED, // giaddr
        &mac.to_array(),
    );
    msg.set_opcode(Opcode::BootRequest);
    msg.opts_mut()
        .insert(DhcpOption::MessageType(v4::MessageType::Discover));
    msg
}

fn create_request_selecting(
    mac: MacAddr6,
    xid: u32,
    server_id: Ipv4Addr,
    requested_ip: Ipv4Addr,
) -> v4::Message {
    let mut msg = v4::Message::new_with_id(
        xid,
        Ipv4Addr::UNSPECIFIED, // ciaddr must be zero
        Ipv4Addr::UNSPECIFIED,
        Ipv4Addr::UNSPECIFIED,
        Ipv4Addr::UNSPECIFIED,
        &mac.to_array(),
    );
    msg.set_opcode(Opcode::BootRequest);
    let opts = msg.opts_mut();
    opts.insert(DhcpOption::MessageType(v4::MessageType::Request));
    opts.insert(DhcpOption::ServerIdentifier(server_id));
    opts.insert(DhcpOption::RequestedIpAddress(requested_ip));
    msg
}

fn create_request_renew(mac: MacAddr6, xid: u32, ciaddr: Ipv4Addr) -> v4::Message {
    let mut msg = v4::Message::new_with_id(
        xid,
        ciaddr,
        Ipv4Addr::UNSPECIFIED,
        Ipv4Addr::UNSPECIFIED,
        Ipv4Addr::UNSPECIFIED,
        &mac.to_array(),
    );
    msg.set_opcode(Opcode::BootRequest);
    msg.opts_mut()
        .insert(DhcpOption::MessageType(v4::MessageType::Request));
    msg
}

fn expect_message(resp: DhcpV4Response) -> v4::Message {
    match resp {
        DhcpV4Response::Message(msg) => msg,
        DhcpV4Response::NoResponse(reason) => panic!("expected reply, dropped: {reason:?}"),
    }
}

#[test]
fn discover_offers_pool_address() {
    let (config, _, pool) = create_test_env();
    let reply = expect_message(handle_message(
        &pool,
        &config,
        &create_discover(TEST_MAC, 0x1234),
    ));

    assert_eq!(reply.xid(), 0x1234);
    assert!(matches!(reply.opcode(), Opcode::BootReply));
    assert_eq!(reply.message_type(), Some(&v4::MessageType::Offer));
    assert_eq!(reply.yiaddr(), START_IP);
    assert_eq!(reply.siaddr(), config.server_ip);
    assert_eq!(reply.server_id(), Some(&config.server_ip));
}

#[test]
fn selecting_request_acknowledges_offer() {
    let (config, _, pool) = create_test_env();
    let offer = expect_message(handle_message(
        &pool,
        &config,
        &create_discover(TEST_MAC, 1),
    ));
    let offered = offer.yiaddr();

    let ack = expect_message(handle_message(
        &pool,
        &config,
        &create_request_selecting(TEST_MAC, 2, config.server_ip, offered),
    ));
    assert_eq!(ack.message_type(), Some(&v4::MessageType::Ack));
    assert_eq!(ack.yiaddr(), offered);
}

#[test]
fn renew_request_extends_lease() {
    let (config, _, pool) = create_test_env();
    let ip = pool.assign(&TEST_MAC.to_string()).unwrap();

    let ack = expect_message(handle_message(
        &pool,
        &config,
        &create_request_renew(TEST_MAC, 3, ip),
    ));
    assert_eq!(ack.message_type(), Some(&v4::MessageType::Ack));
    assert_eq!(ack.yiaddr(), ip);
}

#[test]
fn foreign_claim_gets_nak() {
    let (config, _, pool) = create_test_env();
    let taken = pool.assign(&TEST_MAC.to_string()).unwrap();

    let nak = expect_message(handle_message(
        &pool,
        &config,
        &create_request_selecting(TEST_MAC_2, 4, config.server_ip, taken),
    ));
    assert_eq!(nak.message_type(), Some(&v4::MessageType::Nak));
    // RFC 2131: NAK carries no address.
    assert_eq!(nak.yiaddr(), Ipv4Addr::UNSPECIFIED);
}

#[test]
fn foreign_server_id_is_ignored() {
    let (config, _, pool) = create_test_env();
    let resp = handle_message(
        &pool,
        &config,
        &create_request_selecting(TEST_MAC, 5, Ipv4Addr::new(192, 0, 2, 1), START_IP),
    );
    assert!(matches!(
        resp,
        DhcpV4Response::NoResponse(DropReason::ForeignServer)
    ));
}

#[test]
fn discover_on_full_pool_is_dropped() {
    let (config, _, pool) = create_test_env();
    pool.assign("aa:aa").unwrap();
    pool.assign("bb:bb").unwrap();
    pool.assign("cc:cc").unwrap();

    let resp = handle_message(&pool, &config, &create_discover(TEST_MAC, 6));
    assert!(matches!(
        resp,
        DhcpV4Response::NoResponse(DropReason::PoolExhausted)
    ));
}

#[test]
fn boot_reply_messages_are_not_answered() {
    let (config, _, pool) = create_test_env();
    let mut msg = create_discover(TEST_MAC, 7);
    msg.set_opcode(Opcode::BootReply);
    assert!(matches!(
        handle_message(&pool, &config, &msg),
        DhcpV4Response::NoResponse(DropReason::NotBootRequest)
    ));
}
