use std::net::{SocketAddr, TcpListener, UdpSocket};
use std::process::exit;
use std::sync::{mpsc, Arc};

use arc_swap::ArcSwap;
use tracing::{error, info};

use bootforge::config::Config;
use bootforge::dhcp::LeasePool;
use bootforge::store::FsStore;
use bootforge::{analytics, dhcp, http, logging, mgmt, pxe, signal, tftp};

fn main() {
    let config_dir = std::env::args().nth(1).unwrap_or_else(|| ".".to_string());
    let config = match Config::load_from_files(&config_dir) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("{e}");
            exit(1);
        }
    };
    logging::init_stdout(config.log_level);
    info!(version = env!("CARGO_PKG_VERSION"), "starting bootforge");

    let datasource = match FsStore::open(&config.store_root) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(%e, root = %config.store_root.display(), "cannot open lease store");
            exit(1);
        }
    };
    let pool = Arc::new(LeasePool::new(
        datasource,
        &config.store_dir,
        config.lease_start,
        config.lease_range,
        config.lease_duration,
    ));

    let payload = match std::fs::read(&config.boot_file) {
        Ok(blob) => {
            info!(bytes = blob.len(), path = %config.boot_file.display(), "loaded boot payload");
            Arc::new(ArcSwap::from_pointee(blob))
        }
        Err(e) => {
            error!(%e, path = %config.boot_file.display(), "cannot read boot payload");
            exit(1);
        }
    };

    let event_channel = config.events_address.map(|addr| {
        let (tx, rx) = mpsc::channel();
        std::thread::Builder::new()
            .name("analytics".to_string())
            .spawn(move || analytics::writer::tcp_writer(addr, rx))
            .expect("Failed to spawn analytics thread");
        tx
    });

    let dhcp_socket = match UdpSocket::bind(SocketAddr::V4(config.dhcp_bind_address)) {
        Ok(socket) => socket,
        Err(e) => {
            error!(%e, addr = %config.dhcp_bind_address, "cannot bind DHCP socket");
            exit(1);
        }
    };
    // Clients in INIT state can only hear broadcast replies.
    if let Err(e) = dhcp_socket.set_broadcast(true) {
        error!(%e, "cannot enable broadcast on DHCP socket");
        exit(1);
    }
    {
        let pool = Arc::clone(&pool);
        let config = Arc::clone(&config);
        let events = event_channel.clone();
        std::thread::Builder::new()
            .name("dhcp".to_string())
            .spawn(move || dhcp::v4_worker(dhcp_socket, pool, config, events))
            .expect("Failed to spawn DHCP thread");
    }

    let tftp_socket = match UdpSocket::bind(SocketAddr::V4(config.tftp_bind_address)) {
        Ok(socket) => socket,
        Err(e) => {
            error!(%e, addr = %config.tftp_bind_address, "cannot bind TFTP socket");
            exit(1);
        }
    };
    {
        let payload = Arc::clone(&payload);
        let events = event_channel.clone();
        std::thread::Builder::new()
            .name("tftp".to_string())
            .spawn(move || tftp::serve(tftp_socket, payload, events))
            .expect("Failed to spawn TFTP thread");
    }

    let pxe_socket = match UdpSocket::bind(SocketAddr::V4(config.pxe_bind_address)) {
        Ok(socket) => socket,
        Err(e) => {
            error!(%e, addr = %config.pxe_bind_address, "cannot bind proxy-DHCP socket");
            exit(1);
        }
    };
    {
        let config = Arc::clone(&config);
        std::thread::Builder::new()
            .name("pxe".to_string())
            .spawn(move || pxe::pxe_worker(pxe_socket, config))
            .expect("Failed to spawn PXE thread");
    }

    http::spawn(config.http_bind_address, config.workspace.clone());

    if let Some(addr) = config.mgmt_address {
        match TcpListener::bind(addr) {
            Ok(listener) => {
                let pool = Arc::clone(&pool);
                std::thread::Builder::new()
                    .name("mgmt".to_string())
                    .spawn(move || mgmt::listener(listener, pool))
                    .expect("Failed to spawn management thread");
            }
            Err(e) => {
                error!(%e, %addr, "cannot bind management listener");
                exit(1);
            }
        }
    }

    // The SIGHUP thread runs for the life of the process; joining it parks
    // the main thread without busy-waiting.
    let sighup = signal::spawn_sighup_handler(payload, config.boot_file.clone());
    let _ = sighup.join();
}
