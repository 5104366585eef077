use crate::analytics::events::{BootEvent, DropReport};
use std::io::{self, BufWriter, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::mpsc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const BATCH_LIMIT: usize = 128;
const FLUSH_INTERVAL: Duration = Duration::from_secs(2);
const REDIAL_DELAY: Duration = Duration::from_secs(5);

/// Connection to the collector plus the running tally of events lost while
/// it was down. The writer never blocks the producing workers: with the
/// collector unreachable, batches are counted into the tally and thrown
/// away, and the tally goes out as a [`BootEvent::Drops`] line once the
/// link is back — so the collector can see the gap it missed.
struct Collector {
    addr: SocketAddr,
    stream: Option<BufWriter<TcpStream>>,
    last_dial: Option<Instant>,
    dhcp_dropped: u64,
    tftp_dropped: u64,
}

impl Collector {
    fn new(addr: SocketAddr) -> Self {
        Collector {
            addr,
            stream: None,
            last_dial: None,
            dhcp_dropped: 0,
            tftp_dropped: 0,
        }
    }

    /// Redial at most once per [`REDIAL_DELAY`].
    fn ensure_connected(&mut self) -> bool {
        if self.stream.is_some() {
            return true;
        }
        if self
            .last_dial
            .is_some_and(|dialed| dialed.elapsed() < REDIAL_DELAY)
        {
            return false;
        }
        self.last_dial = Some(Instant::now());
        match TcpStream::connect(self.addr) {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                let _ = stream.set_write_timeout(Some(Duration::from_secs(2)));
                self.stream = Some(BufWriter::new(stream));
                true
            }
            Err(e) => {
                warn!(%e, addr = %self.addr, "collector unreachable");
                false
            }
        }
    }

    fn discard(&mut self, batch: &[BootEvent]) {
        for ev in batch {
            match ev {
                BootEvent::Dhcp(_) => self.dhcp_dropped += 1,
                BootEvent::Tftp(_) => self.tftp_dropped += 1,
                // A gap report that itself failed to ship folds back in.
                BootEvent::Drops(report) => {
                    self.dhcp_dropped += report.dhcp;
                    self.tftp_dropped += report.tftp;
                }
            }
        }
    }

    fn ship(&mut self, batch: &mut Vec<BootEvent>) {
        if !self.ensure_connected() {
            self.discard(batch);
            return;
        }

        if self.dhcp_dropped > 0 || self.tftp_dropped > 0 {
            info!(
                dhcp = self.dhcp_dropped,
                tftp = self.tftp_dropped,
                "collector is back, reporting dropped events"
            );
            batch.insert(0, BootEvent::Drops(DropReport::new(self.dhcp_dropped, self.tftp_dropped)));
            self.dhcp_dropped = 0;
            self.tftp_dropped = 0;
        }

        if let Err(e) = self.write_all(batch) {
            warn!(%e, "lost connection to collector");
            self.stream = None;
            self.discard(batch);
        }
    }

    fn write_all(&mut self, batch: &[BootEvent]) -> io::Result<()> {
        let writer = match self.stream.as_mut() {
            Some(writer) => writer,
            None => return Err(io::ErrorKind::NotConnected.into()),
        };
        for ev in batch {
            serde_json::to_writer(&mut *writer, ev)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()
    }
}

/// Forward boot events to a TCP collector as newline-delimited JSON,
/// batching up to [`BATCH_LIMIT`] events or [`FLUSH_INTERVAL`], whichever
/// fills first.
pub fn tcp_writer(addr: SocketAddr, rx: mpsc::Receiver<BootEvent>) {
    info!(%addr, "starting analytics writer");
    let mut collector = Collector::new(addr);
    let mut pending: Vec<BootEvent> = Vec::with_capacity(BATCH_LIMIT);

    loop {
        // Block for the event that opens the next batch.
        match rx.recv() {
            Ok(ev) => pending.push(ev),
            Err(_) => break,
        }
        let opened = Instant::now();

        while pending.len() < BATCH_LIMIT {
            let Some(left) = FLUSH_INTERVAL.checked_sub(opened.elapsed()) else {
                break;
            };
            match rx.recv_timeout(left) {
                Ok(ev) => pending.push(ev),
                Err(_) => break,
            }
        }

        collector.ship(&mut pending);
        pending.clear();
    }

    // Producers are gone; push out whatever is buffered.
    if let Some(mut writer) = collector.stream {
        let _ = writer.flush();
    }
}
