#![cfg(test)]

use std::net::UdpSocket;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;

use crate::tftp::parser::{parse_rrq, Rrq, RrqError};
use crate::tftp::transfer::{transfer, TransferError};
use crate::tftp::{error_packet, serve};

// ─── parser ─────────────────────────────────────────────────────────────────

#[test]
fn parses_rrq_with_blksize() {
    let req = parse_rrq(b"\x00\x01foo\x00octet\x00blksize\x001024\x00").unwrap();
    assert_eq!(
        req,
        Rrq {
            filename: "foo".to_string(),
            block_size: Some(1024),
        }
    );
}

#[test]
fn clamps_oversized_blksize_for_ethernet() {
    let req = parse_rrq(b"\x00\x01foo\x00octet\x00blksize\x004096\x00").unwrap();
    assert_eq!(req.block_size, Some(1450));
}

#[test]
fn rejects_out_of_range_blksize() {
    assert_eq!(
        parse_rrq(b"\x00\x01foo\x00octet\x00blksize\x007\x00"),
        Err(RrqError::BlockSizeOutOfRange(7))
    );
    assert_eq!(
        parse_rrq(b"\x00\x01foo\x00octet\x00blksize\x0065465\x00"),
        Err(RrqError::BlockSizeOutOfRange(65465))
    );
    // Negative is an out-of-range size, not a parse failure.
    assert_eq!(
        parse_rrq(b"\x00\x01foo\x00octet\x00blksize\x00-1\x00"),
        Err(RrqError::BlockSizeOutOfRange(-1))
    );
}

#[test]
fn defaults_to_512_without_blksize() {
    let req = parse_rrq(b"\x00\x01pxelinux.0\x00octet\x00").unwrap();
    assert_eq!(req.filename, "pxelinux.0");
    assert_eq!(req.block_size, None);
    assert_eq!(req.effective_block_size(), 512);
}

#[test]
fn rejects_non_octet_mode() {
    assert_eq!(
        parse_rrq(b"\x00\x01foo\x00netascii\x00"),
        Err(RrqError::UnsupportedMode("netascii".to_string()))
    );
}

#[test]
fn rejects_runts_and_wrong_opcodes() {
    assert_eq!(parse_rrq(b"\x00\x01a\x00"), Err(RrqError::TooShort(4)));
    assert_eq!(
        parse_rrq(b"\x00\x02foo\x00octet\x00"),
        Err(RrqError::NotReadRequest(2))
    );
}

#[test]
fn rejects_empty_filename() {
    assert_eq!(
        parse_rrq(b"\x00\x01\x00octet\x00\x00"),
        Err(RrqError::MissingFilename)
    );
}

#[test]
fn ignores_unknown_options() {
    let req = parse_rrq(b"\x00\x01foo\x00octet\x00tsize\x000\x00").unwrap();
    assert_eq!(req.block_size, None);
}

#[test]
fn rejects_malformed_options() {
    assert_eq!(
        parse_rrq(b"\x00\x01foo\x00octet\x00blksize"),
        Err(RrqError::UnterminatedOptionName)
    );
    assert_eq!(
        parse_rrq(b"\x00\x01foo\x00octet\x00blksize\x00512"),
        Err(RrqError::UnterminatedOptionValue("blksize".to_string()))
    );
    assert_eq!(
        parse_rrq(b"\x00\x01foo\x00octet\x00blksize\x00large\x00"),
        Err(RrqError::NonIntegerOption {
            option: "blksize".to_string(),
            value: "large".to_string(),
        })
    );
}

#[test]
fn error_packet_layout() {
    assert_eq!(error_packet("x"), vec![0, 5, 0, 0, b'x', 0]);
}

// ─── transfer engine ────────────────────────────────────────────────────────

fn ack(block: u16) -> [u8; 4] {
    let be = block.to_be_bytes();
    [0, 4, be[0], be[1]]
}

fn client_socket() -> UdpSocket {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();
    socket
}

#[test]
fn transfer_negotiates_blksize_and_chunks_payload() {
    let client = client_socket();
    let client_addr = client.local_addr().unwrap();
    let payload: Vec<u8> = (0..1500u32).map(|i| i as u8).collect();
    let expected = payload.clone();

    let handle = std::thread::spawn(move || {
        let req = Rrq {
            filename: "foo".to_string(),
            block_size: Some(512),
        };
        transfer(client_addr, &req, &payload)
    });

    let mut buf = [0u8; 2048];
    // The OACK arrives from the transfer's ephemeral port, not port 69.
    let (n, server) = client.recv_from(&mut buf).unwrap();
    assert_eq!(&buf[..2], &[0, 6]);
    assert_eq!(&buf[2..n], b"blksize\x00512\x00");
    client.send_to(&ack(0), server).unwrap();

    let mut received = Vec::new();
    let mut sizes = Vec::new();
    for block in 1..=3u16 {
        let (n, from) = client.recv_from(&mut buf).unwrap();
        assert_eq!(from, server);
        assert_eq!(&buf[..2], &[0, 3]);
        assert_eq!(u16::from_be_bytes([buf[2], buf[3]]), block);
        sizes.push(n - 4);
        received.extend_from_slice(&buf[4..n]);
        client.send_to(&ack(block), server).unwrap();
    }

    assert_eq!(sizes, vec![512, 512, 476]);
    assert_eq!(received, expected);
    assert_eq!(handle.join().unwrap().unwrap(), 1500);
}

#[test]
fn exact_multiple_payload_ends_with_empty_block() {
    let client = client_socket();
    let client_addr = client.local_addr().unwrap();
    let payload = vec![0xAB; 1024];

    let handle = std::thread::spawn(move || {
        // No blksize option: no OACK, 512-byte blocks.
        let req = Rrq {
            filename: "foo".to_string(),
            block_size: None,
        };
        transfer(client_addr, &req, &payload)
    });

    let mut buf = [0u8; 2048];
    let mut sizes = Vec::new();
    for block in 1..=3u16 {
        let (n, server) = client.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..2], &[0, 3]);
        assert_eq!(u16::from_be_bytes([buf[2], buf[3]]), block);
        sizes.push(n - 4);
        client.send_to(&ack(block), server).unwrap();
    }

    assert_eq!(sizes, vec![512, 512, 0]);
    assert_eq!(handle.join().unwrap().unwrap(), 1024);
}

#[test]
fn dropped_acks_are_retried() {
    let client = client_socket();
    let client_addr = client.local_addr().unwrap();
    let payload = b"bootloader".to_vec();

    let handle = std::thread::spawn(move || {
        let req = Rrq {
            filename: "foo".to_string(),
            block_size: None,
        };
        transfer(client_addr, &req, &payload)
    });

    let mut buf = [0u8; 2048];
    // Swallow two retransmissions of DATA 1, then finally acknowledge.
    for _ in 0..2 {
        let (_, _) = client.recv_from(&mut buf).unwrap();
    }
    let (n, server) = client.recv_from(&mut buf).unwrap();
    assert_eq!(u16::from_be_bytes([buf[2], buf[3]]), 1);
    assert_eq!(&buf[4..n], b"bootloader");
    client.send_to(&ack(1), server).unwrap();

    assert_eq!(handle.join().unwrap().unwrap(), 10);
}

#[test]
fn transfer_fails_after_retry_budget() {
    let client = client_socket();
    let client_addr = client.local_addr().unwrap();

    let handle = std::thread::spawn(move || {
        let req = Rrq {
            filename: "foo".to_string(),
            block_size: None,
        };
        transfer(client_addr, &req, b"payload")
    });

    // Never acknowledge anything: five sends of DATA 1, then failure.
    let mut buf = [0u8; 2048];
    let mut sends = 0;
    while client.recv_from(&mut buf).is_ok() {
        sends += 1;
        if sends == 5 {
            break;
        }
    }
    assert_eq!(sends, 5);

    match handle.join().unwrap() {
        Err(TransferError::TimedOut { block: 1 }) => {}
        other => panic!("expected timeout for block 1, got {other:?}"),
    }
}

#[test]
fn client_error_aborts_transfer() {
    let client = client_socket();
    let client_addr = client.local_addr().unwrap();

    let handle = std::thread::spawn(move || {
        let req = Rrq {
            filename: "foo".to_string(),
            block_size: None,
        };
        transfer(client_addr, &req, b"payload")
    });

    let mut buf = [0u8; 2048];
    let (_, server) = client.recv_from(&mut buf).unwrap();
    let mut error = vec![0, 5, 0, 0];
    error.extend_from_slice(b"no thanks\x00");
    client.send_to(&error, server).unwrap();

    match handle.join().unwrap() {
        Err(TransferError::ClientAborted(msg)) => assert_eq!(msg, "no thanks"),
        other => panic!("expected client abort, got {other:?}"),
    }
}

#[test]
fn stray_acks_do_not_advance_transfer() {
    let client = client_socket();
    let client_addr = client.local_addr().unwrap();

    let handle = std::thread::spawn(move || {
        let req = Rrq {
            filename: "foo".to_string(),
            block_size: None,
        };
        transfer(client_addr, &req, b"payload")
    });

    let mut buf = [0u8; 2048];
    let (_, server) = client.recv_from(&mut buf).unwrap();
    // A stale ACK for a different block is ignored within the attempt.
    client.send_to(&ack(7), server).unwrap();
    client.send_to(&ack(1), server).unwrap();

    assert_eq!(handle.join().unwrap().unwrap(), 7);
}

// ─── listener ───────────────────────────────────────────────────────────────

#[test]
fn listener_rejects_bad_mode_and_serves_good_requests() {
    let listener_socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let listener_addr = listener_socket.local_addr().unwrap();
    let payload = Arc::new(ArcSwap::from_pointee(b"blob!".to_vec()));

    std::thread::spawn(move || serve(listener_socket, payload, None));

    let client = client_socket();

    // A netascii request draws an ERROR packet and no DATA.
    client
        .send_to(b"\x00\x01foo\x00netascii\x00", listener_addr)
        .unwrap();
    let mut buf = [0u8; 2048];
    let (n, _) = client.recv_from(&mut buf).unwrap();
    assert_eq!(&buf[..4], &[0, 5, 0, 0]);
    assert!(n > 4);

    // A well-formed RRQ gets the payload from a fresh transfer port.
    client
        .send_to(b"\x00\x01foo\x00octet\x00", listener_addr)
        .unwrap();
    let (n, transfer_port) = client.recv_from(&mut buf).unwrap();
    assert_ne!(transfer_port, listener_addr);
    assert_eq!(&buf[..4], &[0, 3, 0, 1]);
    assert_eq!(&buf[4..n], b"blob!");
    client.send_to(&ack(1), transfer_port).unwrap();
}
