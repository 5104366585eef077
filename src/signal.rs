use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use signal_hook::consts::SIGHUP;
use signal_hook::iterator::Signals;
use tracing::{error, info};

/// Spawn a thread that handles SIGHUP by reloading the boot payload from
/// disk. Transfers already in flight keep the snapshot they started with;
/// new requests see the fresh blob.
pub fn spawn_sighup_handler(
    payload: Arc<ArcSwap<Vec<u8>>>,
    boot_file: PathBuf,
) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name("sighup".to_string())
        .spawn(move || {
            let mut signals = Signals::new([SIGHUP]).expect("Failed to register SIGHUP handler");

            for sig in signals.forever() {
                if sig == SIGHUP {
                    info!("received SIGHUP, reloading boot payload");
                    match std::fs::read(&boot_file) {
                        Ok(blob) => {
                            let bytes = blob.len();
                            payload.store(Arc::new(blob));
                            info!(bytes, path = %boot_file.display(), "reloaded boot payload");
                        }
                        Err(e) => error!(%e, path = %boot_file.display(), "failed to reload boot payload"),
                    }
                }
            }
        })
        .expect("Failed to spawn SIGHUP handler thread")
}
