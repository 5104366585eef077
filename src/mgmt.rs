use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::dhcp::pool::LeasePool;
use crate::lease::Lease;

#[derive(Deserialize)]
#[serde(tag = "command")]
pub enum MgmtRequest {
    /// Report the number of stored leases.
    #[serde(rename = "status")]
    Status,
    /// Dump the full IP → lease map.
    #[serde(rename = "leases")]
    Leases,
    /// Wipe the leases subtree. Every binding is forgotten.
    #[serde(rename = "reset")]
    Reset,
}

#[derive(Serialize)]
pub struct MgmtResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leases: Option<HashMap<String, Lease>>,
}

impl MgmtResponse {
    fn failure(error: String) -> Self {
        MgmtResponse {
            success: false,
            error: Some(error),
            message: None,
            lease_count: None,
            leases: None,
        }
    }
}

/// Main management listener loop
pub fn listener(listener: TcpListener, pool: Arc<LeasePool>) {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let peer = stream.peer_addr().ok();
                handle_client(stream, &pool);
                if let Some(addr) = peer {
                    info!(%addr, "handled management request");
                }
            }
            Err(e) => {
                warn!(%e, "failed to accept management connection");
            }
        }
    }
}

fn handle_client(stream: TcpStream, pool: &LeasePool) {
    stream.set_read_timeout(Some(Duration::from_secs(5))).ok();
    stream.set_write_timeout(Some(Duration::from_secs(5))).ok();

    let mut reader = BufReader::new(&stream);
    let mut line = String::new();

    match reader.read_line(&mut line) {
        Ok(0) => return, // EOF
        Ok(_) => {}
        Err(e) => {
            warn!(%e, "failed to read from management client");
            return;
        }
    }

    let response = match serde_json::from_str::<MgmtRequest>(&line) {
        Ok(MgmtRequest::Status) => match pool.leases() {
            Ok(leases) => MgmtResponse {
                success: true,
                error: None,
                message: Some("Status OK".into()),
                lease_count: Some(leases.len()),
                leases: None,
            },
            Err(e) => MgmtResponse::failure(format!("Failed to list leases: {}", e)),
        },
        Ok(MgmtRequest::Leases) => match pool.leases() {
            Ok(leases) => MgmtResponse {
                success: true,
                error: None,
                message: None,
                lease_count: Some(leases.len()),
                leases: Some(leases),
            },
            Err(e) => MgmtResponse::failure(format!("Failed to list leases: {}", e)),
        },
        Ok(MgmtRequest::Reset) => match pool.reset() {
            Ok(()) => {
                info!("lease pool reset via management endpoint");
                MgmtResponse {
                    success: true,
                    error: None,
                    message: Some("Lease pool reset".into()),
                    lease_count: Some(0),
                    leases: None,
                }
            }
            Err(e) => MgmtResponse::failure(format!("Failed to reset pool: {}", e)),
        },
        Err(e) => MgmtResponse::failure(format!("Invalid request: {}", e)),
    };

    let mut writer = stream;
    if let Err(e) = serde_json::to_writer(&mut writer, &response) {
        warn!(%e, "failed to write response");
    }
    let _ = writer.write_all(b"\n");
}
